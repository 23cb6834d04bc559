//! Atomic file writes and advisory file locking.
//!
//! Every writer touching shared state under `.ralph/` (the kanban board, the
//! pool index, the events log, the conflict queue, per-worker lifecycle and
//! resume state, checkpoints) goes through [`atomic_write`] and, where the
//! read-modify-write needs to be indivisible, [`with_exclusive_lock`]. Every
//! write is atomic (write-to-temp + fsync + rename) so a crash never
//! corrupts the file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt;

use crate::error::{RalphError, Result};

/// Default bound on lock acquisition: wait up to 5s, retrying.
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);
/// Number of retries within the wait budget.
const DEFAULT_LOCK_RETRIES: u32 = 3;

/// Write `contents` to `path` atomically: write to a sibling temp file,
/// `fsync` it, then rename over the destination. A reader can never observe
/// a partially-written file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = tmp_path_for(path);
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(contents)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| RalphError::Json {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    atomic_write(path, &body)
}

/// Read and parse a JSON file, mapping parse failures to
/// [`RalphError::Json`] with the offending path attached.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let body = fs::read(path)?;
    serde_json::from_slice(&body).map_err(|e| RalphError::Json {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmp".to_owned());
    path.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()))
}

/// Acquire an exclusive `flock`-style lock on `path` (created if absent),
/// run `f`, then release the lock. Retries with backoff up to
/// [`DEFAULT_LOCK_RETRIES`] times within [`DEFAULT_LOCK_WAIT`] before
/// returning [`RalphError::LockTimeout`].
///
/// The lock file itself carries no content — it exists purely as a
/// mutual-exclusion token alongside the file(s) it protects.
pub fn with_exclusive_lock<T>(
    lock_path: &Path,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?;

    let deadline = Instant::now() + DEFAULT_LOCK_WAIT;
    let mut attempt = 0;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => break,
            Err(_) if attempt < DEFAULT_LOCK_RETRIES && Instant::now() < deadline => {
                attempt += 1;
                std::thread::sleep(DEFAULT_LOCK_WAIT / (DEFAULT_LOCK_RETRIES + 1));
            }
            Err(_) => {
                return Err(RalphError::LockTimeout {
                    path: lock_path.to_path_buf(),
                });
            }
        }
    }

    let result = f();
    let _ = FileExt::unlock(&file);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn atomic_write_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/board.md");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        // No leftover temp file.
        let entries: Vec<_> = fs::read_dir(dir.path().join("sub"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn exclusive_lock_serializes_access() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("board.lock");
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock_path = lock_path.clone();
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                with_exclusive_lock(&lock_path, || {
                    let before = counter.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    assert_eq!(counter.load(Ordering::SeqCst), before + 1);
                    Ok(())
                })
                .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
