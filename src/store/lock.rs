use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use uuid::Uuid;

use crate::error::{Result, TodoError};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive access to the store directory for as long as the guard lives.
///
/// Backed by a lock file created with `create_new` and holding an owner
/// token. Dropping the guard removes the file if it still carries that
/// token, on every exit path including panics and `?` returns.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    token: String,
}

impl StoreLock {
    pub fn acquire(path: &Path, timeout: Duration, stale_after: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TodoError::io(parent, e))?;
        }

        let token = format!("{}:{}", std::process::id(), Uuid::new_v4());
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    file.write_all(token.as_bytes())
                        .map_err(|e| TodoError::io(path, e))?;
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    evict_if_stale(path, stale_after);
                    if started.elapsed() > timeout {
                        return Err(TodoError::Lock(path.to_path_buf()));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(TodoError::io(path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        match std::fs::read_to_string(&self.path) {
            Ok(owner) if owner == self.token => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    log::warn!("Failed to release lock {}: {}", self.path.display(), e);
                }
            }
            Ok(_) => log::warn!("Lock {} was taken over; leaving it", self.path.display()),
            Err(e) => log::warn!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let Ok(modified) = std::fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    age > stale_after
}

// A holder killed mid-run leaves its lock file behind. The file is renamed
// aside and its owner re-checked before deletion, so a waiter never deletes
// a lock another waiter just created.
fn evict_if_stale(path: &Path, stale_after: Duration) {
    let Ok(observed) = std::fs::read_to_string(path) else {
        return;
    };
    if is_stale(path, stale_after) {
        evict(path, &observed);
    }
}

// Remove the lock at `path` only if it still carries `observed`.
fn evict(path: &Path, observed: &str) {
    let mut aside = path.as_os_str().to_os_string();
    aside.push(format!(".evict.{}", Uuid::new_v4()));
    let aside = PathBuf::from(aside);
    if std::fs::rename(path, &aside).is_err() {
        return;
    }

    let moved = std::fs::read_to_string(&aside).unwrap_or_default();
    if moved == observed {
        log::warn!("Evicted stale lock {} (owner {})", path.display(), observed);
    } else if std::fs::hard_link(&aside, path).is_err() {
        // A fresh lock was moved by mistake and another waiter already took
        // the path; the moved owner finds a foreign token on drop.
        log::warn!("Lock {} changed hands during eviction", path.display());
    }
    let _ = std::fs::remove_file(&aside);
}
