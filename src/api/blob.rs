//! Blob store seam
//!
//! Large binary payloads (blob-sequence points) bypass the write RPC and go
//! to a blob store keyed by a deterministic object path; the store assigns
//! the id that later appears in the time-series point.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::Result;

/// Binary payload storage with server-allocated ids.
pub trait BlobStore: Send + Sync {
    /// Store `data` under `path`, returning the assigned blob id.
    ///
    /// # Errors
    ///
    /// Transport errors only.
    fn put(&self, path: &str, data: &[u8]) -> Result<String>;
}

/// In-memory blob store for tests and offline tooling.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, (String, Vec<u8>)>,
    puts: AtomicU64,
}

impl MemoryBlobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls accepted so far.
    #[must_use]
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Fetch a stored blob by its assigned id.
    #[must_use]
    pub fn get(&self, blob_id: &str) -> Option<Vec<u8>> {
        self.objects.get(blob_id).map(|entry| entry.1.clone())
    }

    /// Path a blob id was stored under.
    #[must_use]
    pub fn path_of(&self, blob_id: &str) -> Option<String> {
        self.objects.get(blob_id).map(|entry| entry.0.clone())
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, path: &str, data: &[u8]) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        self.objects
            .insert(id.clone(), (path.to_string(), data.to_vec()));
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_assigns_unique_ids() {
        let store = MemoryBlobStore::new();
        let a = store.put("folder/x", b"one").unwrap();
        let b = store.put("folder/x", b"two").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.put_count(), 2);
        assert_eq!(store.get(&a), Some(b"one".to_vec()));
        assert_eq!(store.get(&b), Some(b"two".to_vec()));
    }

    #[test]
    fn test_path_recorded() {
        let store = MemoryBlobStore::new();
        let id = store.put("folder/tensorboard-tb/e/r/ts/u", b"payload").unwrap();
        assert_eq!(
            store.path_of(&id).unwrap(),
            "folder/tensorboard-tb/e/r/ts/u"
        );
    }
}
