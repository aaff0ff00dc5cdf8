//! Server-side artifact cache.
//!
//! The orchestrator stores the combined+minified output under its derived
//! key, and an independently addressed gzip variant under `"{key}.gz"`. The
//! store is freshness-checked, not time-expired: an entry is usable when its
//! write time is at least the request's `last_modified_time` watermark, so a
//! touched source file invalidates implicitly and nothing ever needs an
//! explicit delete from this crate. Eviction is the store's own business.
//!
//! Two implementations:
//!
//! - [`FileCache`] — one file per key in a cache directory; write time is
//!   the file mtime. Keys come from [`derive_key`](crate::key::derive_key)
//!   and are filesystem-safe by construction.
//! - [`MemCache`] — a mutex-guarded map, for embedding in a long-lived
//!   process and for tests.
//!
//! Concurrency: concurrent readers and writers to distinct keys are fine.
//! Two requests racing to populate the same miss both compute and write the
//! same bytes (the key is a pure function of the inputs), so writes are
//! last-writer-wins and idempotent by design.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry missing: {0}")]
    Missing(String),
}

/// Key → artifact store consumed by the serve orchestrator.
pub trait CacheStore: Send + Sync {
    /// Whether a usable entry exists for `key` that is at least as fresh as
    /// `since` (epoch seconds).
    fn is_valid(&self, key: &str, since: u64) -> bool;

    /// Store bytes under `key`, replacing any previous entry.
    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError>;

    /// Fetch the stored bytes.
    fn fetch(&self, key: &str) -> Result<Vec<u8>, CacheError>;

    /// Stored size in bytes, `None` when absent.
    fn size(&self, key: &str) -> Option<u64>;

    /// Stream the entry into `out` without buffering it whole. Default goes
    /// through [`fetch`](CacheStore::fetch); file-backed stores can do
    /// better.
    fn write_to(&self, key: &str, out: &mut dyn Write) -> Result<(), CacheError> {
        let bytes = self.fetch(key)?;
        out.write_all(&bytes)?;
        Ok(())
    }
}

/// File-per-key cache in a directory.
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    /// Use (and create if needed) `root` as the cache directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl CacheStore for FileCache {
    fn is_valid(&self, key: &str, since: u64) -> bool {
        let Ok(metadata) = std::fs::metadata(self.path_for(key)) else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        let mtime = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        mtime >= since
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        std::fs::write(self.path_for(key), bytes)?;
        Ok(())
    }

    fn fetch(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let path = self.path_for(key);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CacheError::Missing(key.to_string())
            } else {
                CacheError::Io(e)
            }
        })
    }

    fn size(&self, key: &str) -> Option<u64> {
        std::fs::metadata(self.path_for(key)).ok().map(|m| m.len())
    }

    fn write_to(&self, key: &str, out: &mut dyn Write) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let mut file = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CacheError::Missing(key.to_string())
            } else {
                CacheError::Io(e)
            }
        })?;
        std::io::copy(&mut file, out)?;
        Ok(())
    }
}

/// In-process cache for embedding and tests.
#[derive(Default)]
pub struct MemCache {
    entries: Mutex<HashMap<String, MemEntry>>,
}

struct MemEntry {
    stored_at: u64,
    bytes: Vec<u8>,
}

impl MemCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemCache {
    fn is_valid(&self, key: &str, since: u64) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|e| e.stored_at >= since)
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let stored_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.entries.lock().unwrap().insert(
            key.to_string(),
            MemEntry {
                stored_at,
                bytes: bytes.to_vec(),
            },
        );
        Ok(())
    }

    fn fetch(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .map(|e| e.bytes.clone())
            .ok_or_else(|| CacheError::Missing(key.to_string()))
    }

    fn size(&self, key: &str) -> Option<u64> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .map(|e| e.bytes.len() as u64)
    }
}
