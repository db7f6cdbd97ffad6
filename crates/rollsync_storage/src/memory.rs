//! In-memory storage backend for testing.

use crate::backend::SnapshotBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// An in-memory storage backend.
///
/// This backend stores the blob in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// It can be told to reject upcoming commits, which lets tests prove that a
/// failed commit leaves the previous state untouched.
///
/// # Example
///
/// ```rust
/// use rollsync_storage::{InMemoryBackend, SnapshotBackend};
///
/// let backend = InMemoryBackend::new();
/// assert!(backend.load().unwrap().is_none());
/// backend.commit(b"v1").unwrap();
/// assert_eq!(backend.commit_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Option<Vec<u8>>>,
    commits: AtomicU64,
    fail_commits: AtomicU32,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with pre-existing data.
    ///
    /// Useful for testing migrations of older documents.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(Some(data)),
            ..Self::default()
        }
    }

    /// Returns a copy of the committed blob.
    #[must_use]
    pub fn data(&self) -> Option<Vec<u8>> {
        self.data.read().clone()
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Makes the next `n` commits fail without writing.
    pub fn fail_next_commits(&self, n: u32) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }
}

impl SnapshotBackend for InMemoryBackend {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().clone())
    }

    fn commit(&self, data: &[u8]) -> StorageResult<()> {
        let injected = self
            .fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::CommitRejected("injected failure".into()));
        }

        *self.data.write() = Some(data.to_vec());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
