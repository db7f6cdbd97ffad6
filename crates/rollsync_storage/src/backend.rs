//! Storage backend trait definition.

use crate::error::StorageResult;

/// A single-blob persistence backend for the local store.
///
/// # Invariants
///
/// - `load` returns exactly the bytes of the last successful `commit`
/// - `commit` is all-or-nothing; a failed commit leaves the previous blob
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait SnapshotBackend: Send + Sync {
    /// Reads the committed blob, or `None` if nothing was ever committed.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn load(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the committed blob.
    ///
    /// After this returns successfully the new bytes survive process
    /// termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or the durability sync fails.
    fn commit(&self, data: &[u8]) -> StorageResult<()>;

    /// Short human-readable description used in logs.
    fn describe(&self) -> String;
}

impl<T: SnapshotBackend + ?Sized> SnapshotBackend for std::sync::Arc<T> {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        (**self).load()
    }

    fn commit(&self, data: &[u8]) -> StorageResult<()> {
        (**self).commit(data)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
