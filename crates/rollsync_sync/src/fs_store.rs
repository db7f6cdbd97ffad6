//! Directory-backed remote store.
//!
//! Layout:
//!
//! ```text
//! <root>/
//! └─ backups/
//!    ├─ owner-1.json           # metadata document
//!    └─ owner-1/
//!       └─ chunks/
//!          ├─ chunk_0.json
//!          └─ chunk_1.json
//! ```
//!
//! Useful for a shared network folder or a removable drive, and for driving
//! the CLI without a hosted backend.

use crate::error::TransportError;
use crate::remote::{child_collection_path, sort_documents, Fields, RemoteDocument, RemoteDocumentStore};
use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

const DOCUMENT_EXT: &str = "json";

/// A [`RemoteDocumentStore`] keeping one JSON file per document.
#[derive(Debug, Clone)]
pub struct DirectoryDocumentStore {
    root: PathBuf,
    document_limit: Option<usize>,
}

impl DirectoryDocumentStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            document_limit: None,
        }
    }

    /// Rejects documents larger than `limit` bytes.
    #[must_use]
    pub fn with_document_limit(mut self, limit: usize) -> Self {
        self.document_limit = Some(limit);
        self
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, TransportError> {
        let mut dir = self.root.clone();
        for segment in collection.split('/') {
            dir.push(checked_segment(segment)?);
        }
        Ok(dir)
    }

    fn document_path(&self, collection: &str, key: &str) -> Result<PathBuf, TransportError> {
        let mut path = self.collection_dir(collection)?;
        path.push(format!("{}.{DOCUMENT_EXT}", checked_segment(key)?));
        Ok(path)
    }

    async fn read_document(path: &Path) -> Result<Option<Fields>, TransportError> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice::<Fields>(&bytes)
                .map(Some)
                .map_err(|e| TransportError::malformed(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, &e)),
        }
    }
}

fn checked_segment(segment: &str) -> Result<&str, TransportError> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !segment.contains(['/', '\\']) => Ok(segment),
        _ => Err(TransportError::malformed(format!(
            "invalid path segment {segment:?}"
        ))),
    }
}

fn io_error(path: &Path, error: &io::Error) -> TransportError {
    match error.kind() {
        io::ErrorKind::PermissionDenied => {
            TransportError::PermissionDenied(format!("{}: {error}", path.display()))
        }
        _ => TransportError::unavailable(format!("{}: {error}", path.display())),
    }
}

#[async_trait]
impl RemoteDocumentStore for DirectoryDocumentStore {
    async fn put_document(
        &self,
        collection: &str,
        key: &str,
        fields: Fields,
    ) -> Result<(), TransportError> {
        let path = self.document_path(collection, key)?;
        let bytes =
            serde_json::to_vec(&fields).map_err(|e| TransportError::malformed(e.to_string()))?;
        if let Some(limit) = self.document_limit {
            if bytes.len() > limit {
                return Err(TransportError::DocumentTooLarge {
                    size: bytes.len(),
                    limit,
                });
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, &e))?;
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await.map_err(|e| io_error(&tmp, &e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, &e))?;

        debug!(path = %path.display(), bytes = bytes.len(), "document written");
        Ok(())
    }

    async fn get_document(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Fields>, TransportError> {
        let path = self.document_path(collection, key)?;
        Self::read_document(&path).await
    }

    async fn list_children(
        &self,
        collection: &str,
        key: &str,
        order_by: &str,
    ) -> Result<Vec<RemoteDocument>, TransportError> {
        let dir = self.collection_dir(&child_collection_path(collection, key))?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, &e)),
        };

        let mut docs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, &e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXT) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            // A concurrent delete may remove the file after listing.
            if let Some(fields) = Self::read_document(&path).await? {
                docs.push(RemoteDocument { key, fields });
            }
        }

        sort_documents(&mut docs, order_by);
        Ok(docs)
    }

    async fn delete_document(&self, collection: &str, key: &str) -> Result<(), TransportError> {
        let path = self.document_path(collection, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    fn describe(&self) -> String {
        format!("dir:{}", self.root.display())
    }
}
