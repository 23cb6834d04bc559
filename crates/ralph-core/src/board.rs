//! Task Board Parser.
//!
//! The board is a single human-editable markdown file. Tasks are list items
//! of the shape:
//!
//! ```text
//! - [ ] **[TASK-0001]** Add the frobnicator
//!   - Description: Wire up the frobnicator to the combobulator.
//!   - Priority: HIGH
//!   - Dependencies: TASK-0000
//! ```
//!
//! Additional indented sub-bullets are preserved verbatim but ignored by the
//! scheduler.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{RalphError, Result};
use crate::fsio::atomic_write;
use crate::model::{Priority, TaskId, TaskStatus};

/// One parsed task block from the board.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    /// The task's identifier.
    pub id: TaskId,
    /// Current status character.
    pub status: TaskStatus,
    /// The title following `**[ID]**` on the header line.
    pub title: String,
    /// The `Description:` field, if present.
    pub description: Option<String>,
    /// The `Priority:` field.
    pub priority: Priority,
    /// IDs listed in `Dependencies:` (empty if the field is `none` or absent).
    pub dependencies: Vec<TaskId>,
    /// Any other `- Key: value` sub-bullets, preserved verbatim and in order,
    /// but not interpreted by the scheduler.
    pub extra_fields: Vec<(String, String)>,
}

/// A lightweight cache over one board file, invalidated by file mtime: one
/// linear pass, cached with file-mtime invalidation.
#[derive(Debug, Default)]
pub struct BoardCache {
    cached: Option<(SystemTime, Vec<Task>)>,
}

impl BoardCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the parsed tasks, re-parsing only if `path`'s mtime has
    /// changed since the last call.
    pub fn parse_all(&mut self, path: &Path) -> Result<&[Task]> {
        let mtime = fs::metadata(path)
            .map_err(|_| RalphError::BoardNotFound {
                path: path.to_path_buf(),
            })?
            .modified()?;
        let needs_parse = match &self.cached {
            Some((cached_mtime, _)) => *cached_mtime != mtime,
            None => true,
        };
        if needs_parse {
            let tasks = parse_all(path)?;
            self.cached = Some((mtime, tasks));
        }
        Ok(&self.cached.as_ref().unwrap().1)
    }
}

/// Parse every task block in `path` in one linear pass.
///
/// # Errors
/// Returns [`RalphError::BoardNotFound`] if the file doesn't exist, or
/// [`RalphError::MalformedTask`] / [`RalphError::DuplicateTaskId`] for
/// structurally invalid blocks. Malformed tasks are never silently dropped —
/// callers that want a best-effort list should use [`validate`] first to
/// enumerate problems, then filter.
pub fn parse_all(path: &Path) -> Result<Vec<Task>> {
    let content = fs::read_to_string(path).map_err(|_| RalphError::BoardNotFound {
        path: path.to_path_buf(),
    })?;
    let blocks = split_blocks(&content);
    let mut tasks = Vec::with_capacity(blocks.len());
    let mut seen = HashSet::new();
    for block in blocks {
        let task = parse_block(&block)?;
        if !seen.insert(task.id.clone()) {
            return Err(RalphError::DuplicateTaskId {
                id: task.id.as_str().to_owned(),
            });
        }
        tasks.push(task);
    }
    Ok(tasks)
}

/// Render the full markdown block for one task (its header line plus every
/// sub-bullet), for use as a worker's PRD input.
///
/// # Errors
/// Returns [`RalphError::TaskNotFound`] if `id` isn't in the board.
pub fn extract_full_task(id: &TaskId, path: &Path) -> Result<String> {
    let content = fs::read_to_string(path).map_err(|_| RalphError::BoardNotFound {
        path: path.to_path_buf(),
    })?;
    for block in split_blocks(&content) {
        if let Some(header) = block.lines().next() {
            if header_id(header).as_deref() == Some(id.as_str()) {
                return Ok(block.trim_end().to_owned());
            }
        }
    }
    Err(RalphError::TaskNotFound {
        id: id.as_str().to_owned(),
    })
}

/// Rewrite exactly the single status character for `id`'s block, under an
/// exclusive file lock.
///
/// # Errors
/// Returns [`RalphError::TaskNotFound`] if `id` isn't in the board.
pub fn set_status(path: &Path, lock_path: &Path, id: &TaskId, new_status: TaskStatus) -> Result<()> {
    crate::fsio::with_exclusive_lock(lock_path, || {
        let content = fs::read_to_string(path).map_err(|_| RalphError::BoardNotFound {
            path: path.to_path_buf(),
        })?;
        let mut found = false;
        let mut out = String::with_capacity(content.len());
        for line in content.split_inclusive('\n') {
            let trimmed = line.trim_end_matches('\n');
            if !found {
                if let Some(line_id) = header_id(trimmed) {
                    if line_id == id.as_str() {
                        found = true;
                        out.push_str(&replace_status_char(trimmed, new_status));
                        if line.ends_with('\n') {
                            out.push('\n');
                        }
                        continue;
                    }
                }
            }
            out.push_str(line);
        }
        if !found {
            return Err(RalphError::TaskNotFound {
                id: id.as_str().to_owned(),
            });
        }
        atomic_write(path, out.as_bytes())
    })
}

/// Archive every block whose status is `x` (complete): delete the blocks and
/// prepend a single `<!-- done: ID, ID, ... -->` comment. Section headings
/// left with no remaining tasks are deleted too.
///
/// # Errors
/// Propagates I/O and malformed-board errors.
pub fn collapse_completed(path: &Path, lock_path: &Path) -> Result<Vec<TaskId>> {
    crate::fsio::with_exclusive_lock(lock_path, || {
        let content = fs::read_to_string(path).map_err(|_| RalphError::BoardNotFound {
            path: path.to_path_buf(),
        })?;
        let (kept, done_ids) = collapse_content(&content)?;
        atomic_write(path, kept.as_bytes())?;
        Ok(done_ids)
    })
}

fn collapse_content(content: &str) -> Result<(String, Vec<TaskId>)> {
    let mut out_lines: Vec<String> = Vec::new();
    let mut done_ids = Vec::new();
    let mut pending_heading: Option<String> = None;
    let mut heading_had_task = false;

    let lines: Vec<&str> = content.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if is_heading(line) {
            if let Some(heading) = pending_heading.take() {
                if heading_had_task {
                    out_lines.push(heading);
                }
            }
            pending_heading = Some(line.to_owned());
            heading_had_task = false;
            i += 1;
            continue;
        }
        if let Some(status_char) = header_status(line) {
            let id = header_id(line);
            let block_end = block_end_index(&lines, i);
            if status_char == 'x' {
                if let Some(id) = id {
                    done_ids.push(TaskId::new(id).map_err(|e| RalphError::MalformedTask {
                        id: String::new(),
                        reason: e.reason,
                    })?);
                }
                i = block_end;
                continue;
            }
            heading_had_task = true;
            for l in &lines[i..block_end] {
                out_lines.push((*l).to_owned());
            }
            i = block_end;
            continue;
        }
        out_lines.push(line.to_owned());
        i += 1;
    }
    if let Some(heading) = pending_heading {
        if heading_had_task {
            out_lines.push(heading);
        }
    }

    let mut result = String::new();
    if !done_ids.is_empty() {
        let ids_csv = done_ids
            .iter()
            .map(TaskId::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        result.push_str(&format!("<!-- done: {ids_csv} -->\n"));
    }
    result.push_str(&out_lines.join("\n"));
    if !out_lines.is_empty() {
        result.push('\n');
    }
    Ok((result, done_ids))
}

fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn block_end_index(lines: &[&str], start: usize) -> usize {
    let mut end = start + 1;
    while end < lines.len() && is_sub_bullet(lines[end]) {
        end += 1;
    }
    end
}

fn is_sub_bullet(line: &str) -> bool {
    let trimmed = line.trim_start();
    (line.starts_with(' ') || line.starts_with('\t'))
        && (trimmed.starts_with("- ") || trimmed.starts_with('-'))
}

/// One structural validation error, per the usual `validate`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoardError {
    /// A task block is missing a required field or has an unparsable header.
    Malformed {
        /// Best-effort identifying text (ID if known, else the header line).
        id: String,
        /// What's wrong.
        reason: String,
    },
    /// Two tasks share an ID.
    DuplicateId(String),
    /// A `Priority:` value isn't one of the four known levels.
    UnknownPriority {
        /// The owning task.
        id: String,
        /// The invalid value.
        value: String,
    },
    /// A dependency references an ID not present in the board.
    DanglingDependency {
        /// The task declaring the dependency.
        id: String,
        /// The missing dependency.
        dependency: String,
    },
    /// A dependency cycle, rendered as `SELF:<id>` or `CYCLE:<ids>`.
    Cycle(String),
}

/// Run every static check: missing required fields,
/// malformed IDs, duplicate IDs, unknown priority, dangling dependencies,
/// cycles. Does not raise on I/O failure to find the board — that surfaces
/// as a single-element error list via the `BoardNotFound` mapping at the
/// call site.
pub fn validate(path: &Path) -> Result<Vec<BoardError>> {
    let content = fs::read_to_string(path).map_err(|_| RalphError::BoardNotFound {
        path: path.to_path_buf(),
    })?;
    let mut errors = Vec::new();
    let mut seen_ids: HashMap<String, ()> = HashMap::new();
    let mut all_ids = HashSet::new();
    let mut deps_by_id: HashMap<String, Vec<String>> = HashMap::new();

    for block in split_blocks(&content) {
        let Some(header) = block.lines().next() else {
            continue;
        };
        let id_raw = header_id(header);
        let id_display = id_raw.clone().unwrap_or_else(|| header.to_owned());

        if let Some(id) = &id_raw {
            if TaskId::new(id).is_err() {
                errors.push(BoardError::Malformed {
                    id: id_display.clone(),
                    reason: "task ID must match <PREFIX>-<1-4 digits>".to_owned(),
                });
            } else if seen_ids.insert(id.clone(), ()).is_some() {
                errors.push(BoardError::DuplicateId(id.clone()));
            } else {
                all_ids.insert(id.clone());
            }
        } else {
            errors.push(BoardError::Malformed {
                id: id_display.clone(),
                reason: "could not parse **[ID]** from header".to_owned(),
            });
            continue;
        }

        let fields = sub_fields(&block);
        let priority_val = fields.iter().find(|(k, _)| k == "Priority").map(|(_, v)| v);
        match priority_val {
            None => errors.push(BoardError::Malformed {
                id: id_display.clone(),
                reason: "missing required field 'Priority'".to_owned(),
            }),
            Some(v) => {
                if v.parse::<Priority>().is_err() {
                    errors.push(BoardError::UnknownPriority {
                        id: id_display.clone(),
                        value: v.clone(),
                    });
                }
            }
        }

        let deps = fields
            .iter()
            .find(|(k, _)| k == "Dependencies")
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| "none".to_owned());
        let dep_ids = parse_dependency_list(&deps);
        if let Some(id) = id_raw {
            deps_by_id.insert(id, dep_ids);
        }
    }

    for (id, deps) in &deps_by_id {
        for dep in deps {
            if !all_ids.contains(dep) {
                errors.push(BoardError::DanglingDependency {
                    id: id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    for cycle in detect_cycles_raw(&deps_by_id) {
        errors.push(BoardError::Cycle(cycle));
    }

    Ok(errors)
}

/// Detect cycles in the dependency graph via DFS (Tarjan-style), returning
/// `SELF:<id>` for a direct self-dependency or `CYCLE:<ids>` for a longer
/// cycle.
pub fn detect_cycles(path: &Path) -> Result<Vec<String>> {
    let tasks = parse_all(path)?;
    let deps_by_id: HashMap<String, Vec<String>> = tasks
        .iter()
        .map(|t| {
            (
                t.id.as_str().to_owned(),
                t.dependencies.iter().map(|d| d.as_str().to_owned()).collect(),
            )
        })
        .collect();
    Ok(detect_cycles_raw(&deps_by_id))
}

fn detect_cycles_raw(deps_by_id: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut marks: HashMap<&str, Mark> = deps_by_id.keys().map(|k| (k.as_str(), Mark::Unvisited)).collect();
    let mut cycles = Vec::new();
    let mut ids: Vec<&str> = deps_by_id.keys().map(String::as_str).collect();
    ids.sort_unstable();

    for start in ids {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        let mut path: Vec<&str> = Vec::new();
        dfs_visit(start, deps_by_id, &mut marks, &mut path, &mut cycles);
    }
    cycles
}

fn dfs_visit<'a>(
    node: &'a str,
    deps_by_id: &'a HashMap<String, Vec<String>>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    cycles: &mut Vec<String>,
) {
    marks.insert(node, Mark::InStack);
    path.push(node);

    if let Some(deps) = deps_by_id.get(node) {
        for dep in deps {
            let dep: &str = dep.as_str();
            if dep == node {
                cycles.push(format!("SELF:{node}"));
                continue;
            }
            match marks.get(dep).copied().unwrap_or(Mark::Unvisited) {
                Mark::InStack => {
                    if let Some(pos) = path.iter().position(|n| *n == dep) {
                        let mut cyc: Vec<&str> = path[pos..].to_vec();
                        cyc.push(dep);
                        cycles.push(format!("CYCLE:{}", cyc.join(",")));
                    }
                }
                Mark::Unvisited => {
                    // Dangling deps (not a key in deps_by_id) are reported
                    // separately by `validate`; just skip them here.
                    if deps_by_id.contains_key(dep) {
                        dfs_visit(dep, deps_by_id, marks, path, cycles);
                    }
                }
                Mark::Done => {}
            }
        }
    }

    path.pop();
    marks.insert(node, Mark::Done);
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InStack,
    Done,
}

fn parse_dependency_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    raw.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect()
}

// ---------------------------------------------------------------------------
// Low-level line scanning
// ---------------------------------------------------------------------------

/// Split the board into task blocks: each is the header line plus its
/// contiguous run of indented sub-bullets.
fn split_blocks(content: &str) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if header_status(lines[i]).is_some() {
            let end = block_end_index(&lines, i);
            blocks.push(lines[i..end].join("\n"));
            i = end;
        } else {
            i += 1;
        }
    }
    blocks
}

/// Match `- [<status>] **[<ID>]** <title>` and return the status character.
fn header_status(line: &str) -> Option<char> {
    let rest = line.trim_start().strip_prefix("- [")?;
    let status = rest.chars().next()?;
    let rest = rest.strip_prefix(status)?.strip_prefix(']')?;
    let rest = rest.trim_start();
    if rest.starts_with("**[") {
        Some(status)
    } else {
        None
    }
}

/// Extract the `ID` from a header line of the expected shape.
fn header_id(line: &str) -> Option<String> {
    let idx = line.find("**[")?;
    let after = &line[idx + 3..];
    let end = after.find("]**")?;
    Some(after[..end].to_owned())
}

/// Extract the title following `**[ID]**` on the header line.
fn header_title(line: &str) -> String {
    match line.find("]**") {
        Some(idx) => line[idx + 3..].trim().to_owned(),
        None => String::new(),
    }
}

fn replace_status_char(line: &str, new_status: TaskStatus) -> String {
    let indent_len = line.len() - line.trim_start().len();
    let (indent, rest) = line.split_at(indent_len);
    let Some(after_bracket) = rest.strip_prefix("- [") else {
        return line.to_owned();
    };
    let mut chars = after_bracket.chars();
    chars.next();
    let remainder: String = chars.collect();
    format!("{indent}- [{}]{remainder}", new_status.as_char())
}

/// Parse `- Key: value` sub-bullets from a block (skipping the header line).
fn sub_fields(block: &str) -> Vec<(String, String)> {
    block
        .lines()
        .skip(1)
        .filter_map(|line| {
            let trimmed = line.trim_start().trim_start_matches("- ");
            let (key, value) = trimmed.split_once(':')?;
            Some((key.trim().to_owned(), value.trim().to_owned()))
        })
        .collect()
}

fn parse_block(block: &str) -> Result<Task> {
    let header = block.lines().next().unwrap_or_default();
    let status_char = header_status(header).ok_or_else(|| RalphError::MalformedTask {
        id: String::new(),
        reason: "could not parse status character from header".to_owned(),
    })?;
    let id_raw = header_id(header).ok_or_else(|| RalphError::MalformedTask {
        id: String::new(),
        reason: "could not parse **[ID]** from header".to_owned(),
    })?;
    let id = TaskId::new(&id_raw).map_err(|e| RalphError::MalformedTask {
        id: id_raw.clone(),
        reason: e.reason,
    })?;
    let status = TaskStatus::from_char(status_char).map_err(|e| RalphError::MalformedTask {
        id: id_raw.clone(),
        reason: e.reason,
    })?;
    let title = header_title(header);

    let fields = sub_fields(block);
    let description = fields.iter().find(|(k, _)| k == "Description").map(|(_, v)| v.clone());
    let priority_raw = fields
        .iter()
        .find(|(k, _)| k == "Priority")
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| RalphError::MalformedTask {
            id: id_raw.clone(),
            reason: "missing required field 'Priority'".to_owned(),
        })?;
    let priority = priority_raw.parse::<Priority>().map_err(|e| RalphError::MalformedTask {
        id: id_raw.clone(),
        reason: e.reason,
    })?;

    let deps_raw = fields
        .iter()
        .find(|(k, _)| k == "Dependencies")
        .map(|(_, v)| v.clone())
        .unwrap_or_else(|| "none".to_owned());
    let mut dependencies = Vec::new();
    for dep in parse_dependency_list(&deps_raw) {
        dependencies.push(TaskId::new(&dep).map_err(|e| RalphError::MalformedTask {
            id: id_raw.clone(),
            reason: format!("bad dependency '{dep}': {e}"),
        })?);
    }

    let known = ["Description", "Priority", "Dependencies"];
    let extra_fields = fields.into_iter().filter(|(k, _)| !known.contains(&k.as_str())).collect();

    Ok(Task {
        id,
        status,
        title,
        description,
        priority,
        dependencies,
        extra_fields,
    })
}

/// Default relative path of the board under a project's `.ralph/` tree.
#[must_use]
pub fn default_board_path(ralph_dir: &Path) -> PathBuf {
    ralph_dir.join("kanban.md")
}
