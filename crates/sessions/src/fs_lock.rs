//! Sidecar lock files with stale-lock recovery.
//!
//! A lock is an exclusively-created file next to the resource it guards.
//! The gateway process is the sole legitimate owner of session files, so a
//! lock older than `stale_ms` can only be the residue of a crashed process
//! and is removed.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use drost_domain::{Error, Result};

/// Lock acquisition parameters.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Total wait budget before giving up with `LockConflict`.
    pub timeout_ms: u64,
    /// Age after which a held lock is treated as abandoned.
    pub stale_ms: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 600,
            stale_ms: 30_000,
        }
    }
}

/// A held lock. Released (file removed) on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock at `path`, waiting up to `opts.timeout_ms`.
    pub fn acquire(path: &Path, opts: &LockOptions) -> Result<FileLock> {
        let deadline = Instant::now() + Duration::from_millis(opts.timeout_ms);

        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(FileLock {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(path, opts.stale_ms) {
                        tracing::warn!(path = %path.display(), "removing stale lock");
                        let _ = std::fs::remove_file(path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(Error::LockConflict(format!(
                            "could not acquire '{}' within {}ms",
                            path.display(),
                            opts.timeout_ms
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn lock_is_stale(path: &Path, stale_ms: u64) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        // Lock vanished between the failed create and this check.
        return false;
    };
    let Ok(mtime) = meta.modified() else {
        return false;
    };
    match SystemTime::now().duration_since(mtime) {
        Ok(age) => age > Duration::from_millis(stale_ms),
        Err(_) => false,
    }
}
