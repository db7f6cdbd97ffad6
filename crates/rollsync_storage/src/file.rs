//! File-based storage backend for persistent storage.

use crate::backend::SnapshotBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file-based storage backend.
///
/// The blob lives in a single file. Commits write a sibling temp file,
/// `fsync` it, and rename it over the target, so a crash mid-commit leaves
/// the previous blob intact.
///
/// # Locking
///
/// An exclusive lock on `<file>.lock` is held for the lifetime of the
/// backend so two processes never write the same store.
///
/// # Example
///
/// ```no_run
/// use rollsync_storage::{FileBackend, SnapshotBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("school.json")).unwrap();
/// backend.commit(br#"{"schemaVersion":2}"#).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileBackend {
    /// Opens a file backend at the given path and takes the lock.
    ///
    /// The data file itself is created on the first commit.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the lock,
    /// or an I/O error if the lock file cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let lock_path = sibling(path, ".lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked { path: lock_path });
        }

        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Opens a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the lock is held.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::open(path)
    }

    /// Returns the path to the data file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotBackend for FileBackend {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn commit(&self, data: &[u8]) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        let tmp_path = sibling(&self.path, ".tmp");

        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(data)?;
            tmp.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path);

        debug!(path = %self.path.display(), bytes = data.len(), "committed snapshot file");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_missing_loads_none() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("store.json")).unwrap();
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn file_commit_and_load() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("store.json")).unwrap();

        backend.commit(b"one").unwrap();
        backend.commit(b"two").unwrap();
        assert_eq!(backend.load().unwrap().unwrap(), b"two");
        assert!(!dir.path().join("store.json.tmp").exists());
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let backend = FileBackend::open(&path).unwrap();
            backend.commit(b"persistent").unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.load().unwrap().unwrap(), b"persistent");
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let _first = FileBackend::open(&path).unwrap();
        let second = FileBackend::open(&path);
        assert!(matches!(second, Err(StorageError::Locked { .. })));
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("store.json");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        backend.commit(b"x").unwrap();
        assert!(path.exists());
        assert_eq!(backend.path(), path.as_path());
    }
}
