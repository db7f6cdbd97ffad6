//! Remote document store abstraction.

use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// A remote document: a JSON object.
pub type Fields = Map<String, Value>;

/// Name of the child collection under a backup document.
pub const CHILD_COLLECTION: &str = "chunks";

/// Path of the child collection under `collection/key`.
#[must_use]
pub fn child_collection_path(collection: &str, key: &str) -> String {
    format!("{collection}/{key}/{CHILD_COLLECTION}")
}

/// A document returned by [`RemoteDocumentStore::list_children`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    /// Document key within its collection.
    pub key: String,
    /// Document fields.
    pub fields: Fields,
}

/// A remote document store.
///
/// This trait abstracts the cloud backend, allowing for different
/// implementations (a hosted document database, a directory, an in-memory
/// mock for testing). Documents are addressed by `collection` and `key`;
/// each document may own a child collection at
/// [`child_collection_path`].
///
/// Implementations report transient failures as retryable
/// [`TransportError`]s and never retry on their own.
#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    /// Creates or replaces a document.
    async fn put_document(
        &self,
        collection: &str,
        key: &str,
        fields: Fields,
    ) -> Result<(), TransportError>;

    /// Reads a document.
    async fn get_document(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Fields>, TransportError>;

    /// Lists the child documents of `collection/key`, ordered by the numeric
    /// (or string) value of `order_by`. Documents without the field come last.
    async fn list_children(
        &self,
        collection: &str,
        key: &str,
        order_by: &str,
    ) -> Result<Vec<RemoteDocument>, TransportError>;

    /// Deletes a document. Deleting a missing document succeeds.
    async fn delete_document(&self, collection: &str, key: &str) -> Result<(), TransportError>;

    /// Short human-readable description used in logs.
    fn describe(&self) -> String;
}

/// Sorts documents by `order_by` the way [`RemoteDocumentStore::list_children`]
/// promises.
pub fn sort_documents(docs: &mut [RemoteDocument], order_by: &str) {
    docs.sort_by(|a, b| compare_field(a.fields.get(order_by), b.fields.get(order_by)));
}

fn compare_field(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal),
            _ => a.to_string().cmp(&b.to_string()),
        },
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    }
}

/// Call counters of a [`MemoryDocumentStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `put_document` calls.
    pub puts: u64,
    /// `get_document` calls.
    pub gets: u64,
    /// `list_children` calls.
    pub lists: u64,
    /// `delete_document` calls.
    pub deletes: u64,
}

/// An in-memory remote store for testing.
///
/// Enforces a per-document size limit like a hosted document database, and
/// can inject transient failures and latency.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Fields>>>,
    document_limit: Option<usize>,
    latency: Option<Duration>,
    fail_calls: AtomicU32,
    puts: AtomicU64,
    gets: AtomicU64,
    lists: AtomicU64,
    deletes: AtomicU64,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    /// Creates an empty store with the default 1 MiB document limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            document_limit: Some(crate::config::DEFAULT_DOCUMENT_LIMIT),
            latency: None,
            fail_calls: AtomicU32::new(0),
            puts: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            lists: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Sets (or removes) the per-document size limit.
    #[must_use]
    pub fn with_document_limit(mut self, limit: Option<usize>) -> Self {
        self.document_limit = limit;
        self
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next `n` calls fail with a retryable error.
    pub fn fail_next_calls(&self, n: u32) {
        self.fail_calls.store(n, Ordering::SeqCst);
    }

    /// Returns the call counters.
    #[must_use]
    pub fn call_counts(&self) -> CallCounts {
        CallCounts {
            puts: self.puts.load(Ordering::SeqCst),
            gets: self.gets.load(Ordering::SeqCst),
            lists: self.lists.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Number of documents in `collection`.
    #[must_use]
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Reads a document without counting the call or injecting failures.
    #[must_use]
    pub fn peek(&self, collection: &str, key: &str) -> Option<Fields> {
        self.collections.read().get(collection)?.get(key).cloned()
    }

    async fn enter(&self, counter: &AtomicU64) -> Result<(), TransportError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .fail_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::unavailable("injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDocumentStore for MemoryDocumentStore {
    async fn put_document(
        &self,
        collection: &str,
        key: &str,
        fields: Fields,
    ) -> Result<(), TransportError> {
        self.enter(&self.puts).await?;

        if let Some(limit) = self.document_limit {
            let size = serde_json::to_vec(&fields)
                .map_err(|e| TransportError::malformed(e.to_string()))?
                .len();
            if size > limit {
                return Err(TransportError::DocumentTooLarge { size, limit });
            }
        }

        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), fields);
        Ok(())
    }

    async fn get_document(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Fields>, TransportError> {
        self.enter(&self.gets).await?;
        Ok(self.peek(collection, key))
    }

    async fn list_children(
        &self,
        collection: &str,
        key: &str,
        order_by: &str,
    ) -> Result<Vec<RemoteDocument>, TransportError> {
        self.enter(&self.lists).await?;
        let path = child_collection_path(collection, key);
        let mut docs: Vec<RemoteDocument> = self
            .collections
            .read()
            .get(&path)
            .map(|docs| {
                docs.iter()
                    .map(|(key, fields)| RemoteDocument {
                        key: key.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        sort_documents(&mut docs, order_by);
        Ok(docs)
    }

    async fn delete_document(&self, collection: &str, key: &str) -> Result<(), TransportError> {
        self.enter(&self.deletes).await?;
        let mut collections = self.collections.write();
        if let Some(docs) = collections.get_mut(collection) {
            docs.remove(key);
            if docs.is_empty() {
                collections.remove(collection);
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
