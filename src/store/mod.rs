//! Persisted state: the task document, the shared annotation cache and the
//! lock that serializes access to both across processes.

pub mod lock;

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::core::link::{LinkIndex, RemoteRef};
use crate::core::task::{Task, TaskList};
use crate::error::{Result, TodoError};
use crate::sync::cache::CacheTable;
pub use lock::StoreLock;

pub const DOCUMENT_VERSION: u32 = 1;

const TASKS_FILE: &str = "tasks.json";
const CACHE_FILE: &str = "cache.json";
const LOCK_FILE: &str = "tasks.lock";

fn document_version() -> u32 {
    DOCUMENT_VERSION
}

/// Everything `tasks.json` holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "document_version")]
    pub version: u32,
    #[serde(default)]
    pub tasks: TaskList,
    #[serde(default)]
    pub links: LinkIndex,
}

impl Document {
    pub fn new() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            ..Self::default()
        }
    }

    /// The annotation a task was pulled from, while the link is active.
    pub fn origin_of(&self, task: Uuid) -> Option<&RemoteRef> {
        self.links.remote_for(task)
    }

    /// Delete task `id`. Its link, if any, stays behind as a pending remote
    /// removal for the next Push.
    pub fn delete(&mut self, id: u32) -> Result<Task> {
        self.tasks.remove(id)
    }

    /// Delete the task the user confirmed as `#id`, wherever renumbering by
    /// another invocation has moved it since.
    pub fn delete_confirmed(&mut self, id: u32, uid: Uuid) -> Result<Task> {
        let current = self
            .tasks
            .get_by_uid(uid)
            .map(|t| t.id)
            .ok_or(TodoError::NotFound(id))?;
        self.delete(current)
    }

    pub fn complete(&mut self, id: u32) -> Result<Task> {
        self.tasks.complete(id)
    }

    fn repair(&mut self) {
        if self.tasks.normalize() {
            log::warn!("Task ids were not contiguous; renumbered");
        }
        let dropped = self.links.dedupe();
        if dropped > 0 {
            log::warn!("Dropped {} duplicate links", dropped);
        }
        self.version = DOCUMENT_VERSION;
    }
}

/// Handle to the on-disk store directory.
#[derive(Debug, Clone)]
pub struct TaskStore {
    dir: PathBuf,
    lock_timeout: Duration,
    stale_lock_after: Duration,
}

impl TaskStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| TodoError::io(&dir, e))?;
        Ok(Self {
            dir,
            lock_timeout: Duration::from_secs(5),
            stale_lock_after: Duration::from_secs(30),
        })
    }

    #[cfg(test)]
    fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.dir.join(TASKS_FILE)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir.join(CACHE_FILE)
    }

    pub fn lock(&self) -> Result<StoreLock> {
        StoreLock::acquire(&self.dir.join(LOCK_FILE), self.lock_timeout, self.stale_lock_after)
    }

    /// Load the document. A missing file is an empty document.
    pub fn load(&self, _guard: &StoreLock) -> Result<Document> {
        let path = self.tasks_path();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => return Err(TodoError::io(path, e)),
        };
        let mut doc: Document = serde_json::from_slice(&bytes)
            .map_err(|source| TodoError::Corrupt { path, source })?;
        doc.repair();
        Ok(doc)
    }

    pub fn save(&self, _guard: &StoreLock, doc: &Document) -> Result<()> {
        let json = serde_json::to_vec_pretty(doc).map_err(|source| TodoError::Corrupt {
            path: self.tasks_path(),
            source,
        })?;
        write_atomic(&self.tasks_path(), &json)
    }

    /// Load the shared cache. Unreadable cache state is discarded.
    pub fn load_cache(&self, _guard: &StoreLock) -> CacheTable {
        let path = self.cache_path();
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt cache {}: {}", path.display(), e);
                CacheTable::default()
            }),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to read cache {}: {}", path.display(), e);
                }
                CacheTable::default()
            }
        }
    }

    pub fn save_cache(&self, _guard: &StoreLock, table: &CacheTable) -> Result<()> {
        let json = serde_json::to_vec(table).map_err(|source| TodoError::Corrupt {
            path: self.cache_path(),
            source,
        })?;
        write_atomic(&self.cache_path(), &json)
    }

    /// Read-only snapshot of the document.
    pub fn read(&self) -> Result<Document> {
        let guard = self.lock()?;
        self.load(&guard)
    }

    /// Load, mutate and save under the lock. Nothing is written if `f`
    /// fails or leaves the document unchanged.
    pub fn transact<T>(&self, f: impl FnOnce(&mut Document) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let before = self.load(&guard)?;
        let mut doc = before.clone();
        let out = f(&mut doc)?;
        if doc != before {
            self.save(&guard, &doc)?;
        }
        Ok(out)
    }

    /// Like `transact`, with the shared cache loaded alongside.
    pub fn transact_with_cache<T>(
        &self,
        f: impl FnOnce(&mut Document, &mut CacheTable) -> Result<T>,
    ) -> Result<T> {
        let guard = self.lock()?;
        let before = self.load(&guard)?;
        let cache_before = self.load_cache(&guard);
        let mut doc = before.clone();
        let mut cache = cache_before.clone();
        let out = f(&mut doc, &mut cache)?;
        if doc != before {
            self.save(&guard, &doc)?;
        }
        if cache != cache_before {
            if let Err(e) = self.save_cache(&guard, &cache) {
                log::warn!("Failed to save annotation cache: {}", e);
            }
        }
        Ok(out)
    }
}

/// Write `bytes` to `path` via a temp file, fsync and rename, so readers see
/// either the old content or the new, never a partial file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TodoError::io(parent, e))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let result = (|| {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)
    })();

    result.map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        TodoError::io(path, e)
    })
}
