//! A [`GitRepo`] implementation backed by invoking the `git` binary.
//!
//! `gix` has no high-level worktree lifecycle API (linked worktrees touch
//! `.git/worktrees/<name>/` administrative files in ways the library does
//! not model), so this backend shells out to `git` directly rather than
//! reimplementing worktree bookkeeping against the object database.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::debug;

use crate::error::GitError;
use crate::repo::GitRepo;
use crate::types::{ChangeType, DiffEntry, GitOid, StatusEntry, WorktreeInfo};

/// A [`GitRepo`] backed by the `git` binary on `PATH`, operating against one
/// repository root.
#[derive(Clone, Debug)]
pub struct CliGitRepo {
    /// The main repository's working directory (not a linked worktree).
    repo_root: PathBuf,
}

impl CliGitRepo {
    /// Open a repository rooted at `repo_root`. Does not validate that a
    /// `.git` directory exists there — the first command run will fail with
    /// [`GitError::CommandFailed`] if it doesn't.
    #[must_use]
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    fn run(&self, cwd: &Path, label: &str, args: &[&str]) -> Result<Output, GitError> {
        debug!(?args, ?cwd, "git");
        Command::new("git")
            .current_dir(cwd)
            .args(args)
            .output()
            .map_err(|e| GitError::SpawnFailed(format!("{label}: {e}")))
    }

    fn run_ok(&self, cwd: &Path, label: &str, args: &[&str]) -> Result<String, GitError> {
        let output = self.run(cwd, label, args)?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: label.to_owned(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl GitRepo for CliGitRepo {
    fn rev_parse(&self, spec: &str) -> Result<GitOid, GitError> {
        let out = self.run_ok(&self.repo_root, "rev-parse", &["rev-parse", spec])?;
        let oid = out.trim();
        GitOid::new(oid).map_err(|e| GitError::InvalidRevision {
            value: spec.to_owned(),
            reason: e.reason,
        })
    }

    fn create_branch(&self, branch: &str, start_point: &str) -> Result<(), GitError> {
        self.run_ok(&self.repo_root, "branch", &["branch", branch, start_point])?;
        Ok(())
    }

    fn worktree_add(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        if path.exists() {
            return Err(GitError::WorktreeExists {
                path: path.to_path_buf(),
            });
        }
        let path_str = path.to_string_lossy().into_owned();
        self.run_ok(
            &self.repo_root,
            "worktree add",
            &["worktree", "add", &path_str, branch],
        )?;
        Ok(())
    }

    fn worktree_remove(&self, path: &Path, force: bool) -> Result<(), GitError> {
        let path_str = path.to_string_lossy().into_owned();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);
        self.run_ok(&self.repo_root, "worktree remove", &args)?;
        Ok(())
    }

    fn worktree_list(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        let out = self.run_ok(
            &self.repo_root,
            "worktree list",
            &["worktree", "list", "--porcelain"],
        )?;
        Ok(parse_worktree_porcelain(&out))
    }

    fn commit_all(&self, workdir: &Path, message: &str) -> Result<Option<GitOid>, GitError> {
        if !self.is_dirty(workdir)? {
            return Ok(None);
        }
        self.run_ok(workdir, "add", &["add", "-A"])?;
        let status = self.run(workdir, "commit", &["commit", "-m", message])?;
        if !status.status.success() {
            let stderr = String::from_utf8_lossy(&status.stderr);
            if stderr.contains("nothing to commit") {
                return Ok(None);
            }
            return Err(GitError::CommandFailed {
                command: "commit".to_owned(),
                exit_code: status.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_owned(),
            });
        }
        Ok(Some(self.rev_parse_in(workdir, "HEAD")?))
    }

    fn is_dirty(&self, workdir: &Path) -> Result<bool, GitError> {
        let out = self.run_ok(workdir, "status", &["status", "--porcelain"])?;
        Ok(!out.trim().is_empty())
    }

    fn status(&self, workdir: &Path) -> Result<Vec<StatusEntry>, GitError> {
        let out = self.run_ok(workdir, "status", &["status", "--porcelain=v1"])?;
        Ok(out
            .lines()
            .filter(|l| l.len() > 3)
            .map(|l| StatusEntry {
                code: l[..2].to_owned(),
                path: l[3..].to_owned(),
            })
            .collect())
    }

    fn diff_name_status(
        &self,
        workdir: &Path,
        base: &str,
        head: Option<&str>,
    ) -> Result<Vec<DiffEntry>, GitError> {
        let head = head.unwrap_or("HEAD");
        let out = self.run_ok(
            workdir,
            "diff --name-status",
            &["diff", "--name-status", base, head],
        )?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(2, '\t');
                let code = parts.next()?;
                let path = parts.next()?;
                Some(DiffEntry {
                    path: path.to_owned(),
                    change: ChangeType::from_status_byte(code.as_bytes().first().copied()?),
                })
            })
            .collect())
    }
}

impl CliGitRepo {
    fn rev_parse_in(&self, cwd: &Path, spec: &str) -> Result<GitOid, GitError> {
        let out = self.run_ok(cwd, "rev-parse", &["rev-parse", spec])?;
        GitOid::new(out.trim()).map_err(|e| GitError::InvalidRevision {
            value: spec.to_owned(),
            reason: e.reason,
        })
    }
}

/// Parse `git worktree list --porcelain` output.
///
/// Entries are separated by blank lines; each entry has `worktree <path>`,
/// then `HEAD <oid>` or `bare`, then `branch <ref>` or `detached`, and
/// optionally a `locked` line.
fn parse_worktree_porcelain(out: &str) -> Vec<WorktreeInfo> {
    let mut result = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut head: Option<GitOid> = None;
    let mut branch: Option<String> = None;
    let mut locked = false;

    let flush = |path: &mut Option<PathBuf>,
                 head: &mut Option<GitOid>,
                 branch: &mut Option<String>,
                 locked: &mut bool,
                 out: &mut Vec<WorktreeInfo>| {
        if let Some(p) = path.take() {
            out.push(WorktreeInfo {
                path: p,
                head: head.take(),
                branch: branch.take(),
                locked: *locked,
            });
        }
        *locked = false;
    };

    for line in out.lines() {
        if line.is_empty() {
            flush(&mut path, &mut head, &mut branch, &mut locked, &mut result);
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            flush(&mut path, &mut head, &mut branch, &mut locked, &mut result);
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            head = GitOid::new(rest).ok();
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(rest.to_owned());
        } else if line == "locked" || line.starts_with("locked ") {
            locked = true;
        }
    }
    flush(&mut path, &mut head, &mut branch, &mut locked, &mut result);
    result
}
