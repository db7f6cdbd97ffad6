//! Fault-injecting remote store.

use async_trait::async_trait;
use parking_lot::Mutex;
use rollsync_sync::{Fields, RemoteDocument, RemoteDocumentStore, TransportError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Wraps a [`RemoteDocumentStore`] and misbehaves on request.
///
/// - transient failures on the next `n` calls
/// - chunk listings that omit an index, as seen by a pull racing a push
/// - chunk listings with an extra trailing chunk, as seen when that push grew
///   the chunk set
/// - chunk listings in reverse order
pub struct FlakyRemote {
    inner: Arc<dyn RemoteDocumentStore>,
    fail_calls: AtomicU32,
    hidden_child: Mutex<Option<(String, u32)>>,
    extra_child: Mutex<Option<(RemoteDocument, u32)>>,
    reverse_listings: Mutex<bool>,
}

impl FlakyRemote {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn RemoteDocumentStore>) -> Self {
        Self {
            inner,
            fail_calls: AtomicU32::new(0),
            hidden_child: Mutex::new(None),
            extra_child: Mutex::new(None),
            reverse_listings: Mutex::new(false),
        }
    }

    /// Makes the next `n` calls fail with [`TransportError::Unavailable`].
    pub fn fail_next_calls(&self, n: u32) {
        self.fail_calls.store(n, Ordering::SeqCst);
    }

    /// Omits `key` from the next `times` child listings.
    pub fn hide_child(&self, key: impl Into<String>, times: u32) {
        *self.hidden_child.lock() = Some((key.into(), times));
    }

    /// Appends `doc` to the next `times` child listings.
    pub fn extra_child(&self, doc: RemoteDocument, times: u32) {
        *self.extra_child.lock() = Some((doc, times));
    }

    /// Returns child listings in reverse order.
    pub fn reverse_listings(&self, reverse: bool) {
        *self.reverse_listings.lock() = reverse;
    }

    fn inject(&self) -> Result<(), TransportError> {
        let injected = self
            .fail_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::unavailable("flaky remote"));
        }
        Ok(())
    }

    fn take_hidden(&self) -> Option<String> {
        let mut hidden = self.hidden_child.lock();
        match hidden.as_mut() {
            Some((key, times)) if *times > 0 => {
                *times -= 1;
                Some(key.clone())
            }
            _ => None,
        }
    }

    fn take_extra(&self) -> Option<RemoteDocument> {
        let mut extra = self.extra_child.lock();
        match extra.as_mut() {
            Some((doc, times)) if *times > 0 => {
                *times -= 1;
                Some(doc.clone())
            }
            _ => None,
        }
    }
}

#[async_trait]
impl RemoteDocumentStore for FlakyRemote {
    async fn put_document(
        &self,
        collection: &str,
        key: &str,
        fields: Fields,
    ) -> Result<(), TransportError> {
        self.inject()?;
        self.inner.put_document(collection, key, fields).await
    }

    async fn get_document(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Fields>, TransportError> {
        self.inject()?;
        self.inner.get_document(collection, key).await
    }

    async fn list_children(
        &self,
        collection: &str,
        key: &str,
        order_by: &str,
    ) -> Result<Vec<RemoteDocument>, TransportError> {
        self.inject()?;
        let mut docs = self.inner.list_children(collection, key, order_by).await?;
        if let Some(hidden) = self.take_hidden() {
            docs.retain(|doc| doc.key != hidden);
        }
        if let Some(extra) = self.take_extra() {
            docs.push(extra);
        }
        if *self.reverse_listings.lock() {
            docs.reverse();
        }
        Ok(docs)
    }

    async fn delete_document(&self, collection: &str, key: &str) -> Result<(), TransportError> {
        self.inject()?;
        self.inner.delete_document(collection, key).await
    }

    fn describe(&self) -> String {
        format!("flaky({})", self.inner.describe())
    }
}
