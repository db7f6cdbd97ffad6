//! Chunked backup transport.
//!
//! Stores one envelope per backup key. Payloads that fit comfortably in one
//! remote document are stored inline in the metadata document; larger ones are
//! split into `chunk_{index}` child documents:
//!
//! ```text
//! backups/<key>                 { ownerId, lastModified, isChunked: true,
//!                                 totalChunks: N, algorithmId, ..., encoded: "" }
//! backups/<key>/chunks/chunk_0  { index: 0, data: "<slice 0>" }
//! backups/<key>/chunks/chunk_N-1
//! ```
//!
//! A push deletes the previous chunk set, writes the metadata, then writes the
//! chunks. A pull reads the metadata first, so a pull racing a push may see
//! fewer chunks than announced, or more when the other push grew the set.
//! Both surface as retryable errors ([`TransportError::MissingChunk`] and
//! [`TransportError::ExtraChunk`]) and the retry re-reads the metadata.

use crate::config::{ChunkConfig, SyncConfig, CHUNK_DOCUMENT_OVERHEAD};
use crate::error::TransportError;
use crate::metadata::{BackupMetadata, BackupProbe};
use crate::remote::{child_collection_path, Fields, RemoteDocumentStore};
use rollsync_crypto::{payload_field, Envelope};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const F_INDEX: &str = "index";
const F_DATA: &str = "data";

/// How a payload will be laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPlan {
    /// Stored in the metadata document.
    Inline,
    /// Split into this many chunk documents.
    Chunked(u32),
}

/// Reads and writes envelopes through a [`RemoteDocumentStore`].
#[derive(Clone)]
pub struct ChunkedTransport {
    remote: Arc<dyn RemoteDocumentStore>,
    collection: String,
    config: ChunkConfig,
    request_timeout: Duration,
}

impl std::fmt::Debug for ChunkedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedTransport")
            .field("remote", &self.remote.describe())
            .field("collection", &self.collection)
            .field("config", &self.config)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ChunkedTransport {
    /// Creates a transport writing into `collection`.
    pub fn new(
        remote: Arc<dyn RemoteDocumentStore>,
        collection: impl Into<String>,
        config: ChunkConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            collection: collection.into(),
            config,
            request_timeout,
        }
    }

    /// Creates a transport from the sync configuration.
    pub fn from_config(remote: Arc<dyn RemoteDocumentStore>, config: &SyncConfig) -> Self {
        Self::new(
            remote,
            config.collection.clone(),
            config.chunk.clone(),
            config.request_timeout,
        )
    }

    /// Returns the chunking configuration.
    #[must_use]
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Returns the remote store.
    #[must_use]
    pub fn remote(&self) -> &Arc<dyn RemoteDocumentStore> {
        &self.remote
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.request_timeout)),
        }
    }

    /// Decides how a payload of `payload_len` bytes will be stored.
    ///
    /// # Errors
    ///
    /// [`TransportError::QuotaExceeded`] if the chunk size leaves no room for
    /// the chunk document fields, or the payload needs more than
    /// `max_chunks` chunks.
    pub fn plan(&self, payload_len: usize) -> Result<ChunkPlan, TransportError> {
        if payload_len <= self.config.threshold_bytes() {
            return Ok(ChunkPlan::Inline);
        }
        self.check_chunk_size()?;
        let count = payload_len.div_ceil(self.config.chunk_size);
        self.check_chunk_count(count)?;
        // Bounded by max_chunks above.
        Ok(ChunkPlan::Chunked(count as u32))
    }

    fn check_chunk_size(&self) -> Result<(), TransportError> {
        let size = self.config.chunk_size;
        if size == 0 || size.saturating_add(CHUNK_DOCUMENT_OVERHEAD) > self.config.document_limit
        {
            return Err(TransportError::quota(format!(
                "chunk size {size} leaves no headroom below the {} byte document limit",
                self.config.document_limit
            )));
        }
        Ok(())
    }

    fn check_chunk_count(&self, count: usize) -> Result<(), TransportError> {
        if count > self.config.max_chunks as usize {
            return Err(TransportError::quota(format!(
                "payload needs {count} chunks, limit is {}",
                self.config.max_chunks
            )));
        }
        Ok(())
    }

    /// Stores `envelope` under `key`, replacing any previous backup.
    ///
    /// Returns the metadata as written, with `isChunked`, `totalChunks`,
    /// `sizeHint` and `encrypted` filled in from the envelope.
    ///
    /// # Errors
    ///
    /// Quota problems are reported before the remote is touched.
    pub async fn store(
        &self,
        key: &str,
        envelope: &Envelope,
        meta: &BackupMetadata,
    ) -> Result<BackupMetadata, TransportError> {
        let mut doc = envelope.to_fields();
        let field = envelope.payload_field();
        let payload = match doc.remove(field) {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };

        let chunks = match self.plan(payload.len())? {
            ChunkPlan::Inline => Vec::new(),
            ChunkPlan::Chunked(_) => {
                let chunks = split_payload(&payload, self.config.chunk_size);
                self.check_chunk_count(chunks.len())?;
                chunks
            }
        };

        let mut meta = meta.clone();
        meta.size_hint = payload.len() as u64;
        meta.encrypted = envelope.is_encrypted();
        meta.is_chunked = !chunks.is_empty();
        meta.total_chunks = chunks.len() as u32;

        let purged = self.purge_chunks(key).await?;

        for (name, value) in meta.to_fields()? {
            doc.insert(name, value);
        }
        let inline = if chunks.is_empty() { payload.as_str() } else { "" };
        doc.insert(field.to_string(), Value::String(inline.to_string()));
        self.call(self.remote.put_document(&self.collection, key, doc))
            .await?;

        let child = child_collection_path(&self.collection, key);
        for (index, data) in chunks.iter().enumerate() {
            let mut fields = Fields::new();
            fields.insert(F_INDEX.into(), Value::from(index as u64));
            fields.insert(F_DATA.into(), Value::String((*data).to_string()));
            self.call(
                self.remote
                    .put_document(&child, &chunk_key(index as u32), fields),
            )
            .await?;
        }

        info!(
            key,
            bytes = payload.len(),
            chunks = chunks.len(),
            purged,
            encrypted = meta.encrypted,
            "backup stored"
        );
        Ok(meta)
    }

    async fn purge_chunks(&self, key: &str) -> Result<usize, TransportError> {
        let stale = self
            .call(self.remote.list_children(&self.collection, key, F_INDEX))
            .await?;
        let child = child_collection_path(&self.collection, key);
        for doc in &stale {
            self.call(self.remote.delete_document(&child, &doc.key))
                .await?;
        }
        if !stale.is_empty() {
            debug!(key, count = stale.len(), "purged stale chunks");
        }
        Ok(stale.len())
    }

    /// Reads the backup document under `key` with its payload reassembled.
    ///
    /// # Errors
    ///
    /// [`TransportError::MissingChunk`] when fewer chunks than announced are
    /// readable, [`TransportError::ExtraChunk`] when more are listed, and
    /// [`TransportError::UnexpectedChunk`] for duplicate indexes.
    pub async fn load_document(&self, key: &str) -> Result<Option<Fields>, TransportError> {
        let Some(mut doc) = self
            .call(self.remote.get_document(&self.collection, key))
            .await?
        else {
            return Ok(None);
        };

        let meta = BackupMetadata::from_fields(&doc)?;
        if !meta.is_chunked {
            return Ok(Some(doc));
        }

        let children = self
            .call(self.remote.list_children(&self.collection, key, F_INDEX))
            .await?;
        let mut chunks = Vec::with_capacity(children.len());
        for child in &children {
            let index = child
                .fields
                .get(F_INDEX)
                .and_then(Value::as_u64)
                .and_then(|i| u32::try_from(i).ok())
                .ok_or_else(|| {
                    TransportError::malformed(format!("chunk {} has no index", child.key))
                })?;
            let data = child
                .fields
                .get(F_DATA)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    TransportError::malformed(format!("chunk {} has no data", child.key))
                })?;
            chunks.push((index, data));
        }

        let payload = reassemble(key, meta.total_chunks, chunks)?;
        debug!(key, chunks = meta.total_chunks, bytes = payload.len(), "backup reassembled");
        doc.insert(payload_field(&doc).to_string(), Value::String(payload));
        Ok(Some(doc))
    }

    /// Reads the envelope stored under `key`.
    ///
    /// Documents written before envelopes existed come back as
    /// [`Envelope::Legacy`].
    pub async fn load(&self, key: &str) -> Result<Option<Envelope>, TransportError> {
        match self.load_document(key).await? {
            None => Ok(None),
            Some(doc) => Envelope::from_fields(&doc)
                .map(Some)
                .map_err(|e| TransportError::malformed(format!("backup envelope: {e}"))),
        }
    }

    /// Reads only the metadata document.
    pub async fn exists(&self, key: &str) -> Result<BackupProbe, TransportError> {
        match self
            .call(self.remote.get_document(&self.collection, key))
            .await?
        {
            None => Ok(BackupProbe::missing()),
            Some(doc) => Ok(BackupProbe::from_metadata(&BackupMetadata::from_fields(&doc)?)),
        }
    }
}

/// Key of the chunk document with `index`.
#[must_use]
pub fn chunk_key(index: u32) -> String {
    format!("chunk_{index}")
}

/// Splits `payload` into slices of at most `chunk_size` bytes, cutting only
/// on character boundaries.
#[must_use]
pub fn split_payload(payload: &str, chunk_size: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let mut end = chunk_size.min(rest.len());
        while end > 0 && !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

/// Orders chunks by index and concatenates them.
///
/// # Errors
///
/// Fails on an index past `total`, a duplicate index, or a gap.
pub fn reassemble(
    key: &str,
    total: u32,
    mut chunks: Vec<(u32, &str)>,
) -> Result<String, TransportError> {
    chunks.sort_by_key(|(index, _)| *index);

    let mut expected = 0u32;
    let mut payload = String::new();
    for (index, data) in chunks {
        if index >= total {
            return Err(TransportError::ExtraChunk {
                key: key.to_string(),
                index,
                total,
            });
        }
        if index < expected {
            return Err(TransportError::UnexpectedChunk {
                key: key.to_string(),
                index,
                total,
            });
        }
        if index > expected {
            return Err(TransportError::MissingChunk {
                key: key.to_string(),
                index: expected,
                total,
            });
        }
        payload.push_str(data);
        expected += 1;
    }

    if expected < total {
        return Err(TransportError::MissingChunk {
            key: key.to_string(),
            index: expected,
            total,
        });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryDocumentStore;
    use chrono::{TimeZone, Utc};

    fn meta() -> BackupMetadata {
        BackupMetadata::new("owner-1", Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap())
    }

    fn small_chunks() -> ChunkConfig {
        ChunkConfig::new()
            .with_document_limit(4096)
            .with_chunk_size(1000)
            .with_max_chunks(16)
    }

    fn transport(remote: Arc<MemoryDocumentStore>, config: ChunkConfig) -> ChunkedTransport {
        ChunkedTransport::new(remote, "backups", config, Duration::from_secs(5))
    }

    #[test]
    fn split_respects_char_boundaries() {
        assert_eq!(split_payload("abcdefg", 3), vec!["abc", "def", "g"]);
        assert!(split_payload("", 3).is_empty());

        let text = "aé€😀b";
        let parts = split_payload(text, 2);
        assert_eq!(parts.concat(), text);
        assert!(parts.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn plan_thresholds() {
        let t = transport(Arc::new(MemoryDocumentStore::new()), small_chunks());
        // 90% of 4096.
        assert_eq!(t.plan(3686).unwrap(), ChunkPlan::Inline);
        assert_eq!(t.plan(3687).unwrap(), ChunkPlan::Chunked(4));
        assert_eq!(t.plan(16_000).unwrap(), ChunkPlan::Chunked(16));
        assert!(matches!(t.plan(16_001), Err(TransportError::QuotaExceeded(_))));
    }

    #[test]
    fn chunk_size_without_headroom_is_quota() {
        let config = small_chunks().with_chunk_size(4000);
        let t = transport(Arc::new(MemoryDocumentStore::new()), config);
        assert!(matches!(t.plan(10_000), Err(TransportError::QuotaExceeded(_))));
    }

    #[test]
    fn reassemble_validates_indexes() {
        let ok = reassemble("k", 3, vec![(2, "c"), (0, "a"), (1, "b")]).unwrap();
        assert_eq!(ok, "abc");

        assert!(matches!(
            reassemble("k", 3, vec![(0, "a"), (2, "c")]),
            Err(TransportError::MissingChunk { index: 1, total: 3, .. })
        ));
        assert!(matches!(
            reassemble("k", 3, vec![(0, "a"), (1, "b")]),
            Err(TransportError::MissingChunk { index: 2, .. })
        ));
        assert!(matches!(
            reassemble("k", 2, vec![(0, "a"), (1, "b"), (2, "c")]),
            Err(TransportError::ExtraChunk { index: 2, total: 2, .. })
        ));
        assert!(matches!(
            reassemble("k", 2, vec![(0, "a"), (0, "a")]),
            Err(TransportError::UnexpectedChunk { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn small_payload_is_inline() {
        let remote = Arc::new(MemoryDocumentStore::new());
        let t = transport(Arc::clone(&remote), small_chunks());
        let envelope = Envelope::Legacy(b"{\"collections\":{}}".to_vec());

        let written = t.store("owner-1", &envelope, &meta()).await.unwrap();
        assert!(!written.is_chunked);
        assert!(!written.encrypted);
        assert_eq!(remote.document_count("backups/owner-1/chunks"), 0);

        assert_eq!(t.load("owner-1").await.unwrap(), Some(envelope));
        let probe = t.exists("owner-1").await.unwrap();
        assert!(probe.exists);
        assert!(!probe.is_chunked);
    }

    #[tokio::test]
    async fn large_payload_is_chunked_and_reassembled() {
        let remote = Arc::new(MemoryDocumentStore::new());
        let t = transport(Arc::clone(&remote), small_chunks());
        let payload: String = (0..5500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let envelope = Envelope::Legacy(payload.clone().into_bytes());

        let written = t.store("owner-1", &envelope, &meta()).await.unwrap();
        assert!(written.is_chunked);
        assert_eq!(written.total_chunks, 6);
        assert_eq!(written.size_hint, 5500);

        let doc = remote.peek("backups", "owner-1").unwrap();
        assert_eq!(doc["data"], Value::String(String::new()));
        assert_eq!(remote.document_count("backups/owner-1/chunks"), 6);

        assert_eq!(t.load("owner-1").await.unwrap(), Some(envelope));
    }

    #[tokio::test]
    async fn stale_chunks_are_purged() {
        let remote = Arc::new(MemoryDocumentStore::new());
        let t = transport(Arc::clone(&remote), small_chunks());

        let big = Envelope::Legacy(vec![b'x'; 9000]);
        t.store("owner-1", &big, &meta()).await.unwrap();
        assert_eq!(remote.document_count("backups/owner-1/chunks"), 9);

        let medium = Envelope::Legacy(vec![b'y'; 4500]);
        t.store("owner-1", &medium, &meta()).await.unwrap();
        assert_eq!(remote.document_count("backups/owner-1/chunks"), 5);
        assert_eq!(t.load("owner-1").await.unwrap(), Some(medium));

        let small = Envelope::Legacy(vec![b'z'; 10]);
        t.store("owner-1", &small, &meta()).await.unwrap();
        assert_eq!(remote.document_count("backups/owner-1/chunks"), 0);
    }

    #[tokio::test]
    async fn quota_is_checked_before_writing() {
        let remote = Arc::new(MemoryDocumentStore::new());
        let t = transport(Arc::clone(&remote), small_chunks().with_max_chunks(2));
        let err = t
            .store("owner-1", &Envelope::Legacy(vec![b'x'; 9000]), &meta())
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::QuotaExceeded(_)));
        assert_eq!(remote.call_counts().puts, 0);
        assert_eq!(remote.call_counts().deletes, 0);
    }

    #[tokio::test]
    async fn missing_chunk_is_reported() {
        let remote = Arc::new(MemoryDocumentStore::new());
        let t = transport(Arc::clone(&remote), small_chunks());
        t.store("owner-1", &Envelope::Legacy(vec![b'x'; 5000]), &meta())
            .await
            .unwrap();
        remote
            .delete_document("backups/owner-1/chunks", "chunk_3")
            .await
            .unwrap();

        let err = t.load("owner-1").await.unwrap_err();
        assert!(matches!(err, TransportError::MissingChunk { index: 3, total: 5, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn grown_chunk_set_is_retryable() {
        let remote = Arc::new(MemoryDocumentStore::new());
        let t = transport(Arc::clone(&remote), small_chunks());
        t.store("owner-1", &Envelope::Legacy(vec![b'x'; 5000]), &meta())
            .await
            .unwrap();

        let mut fields = Fields::new();
        fields.insert(F_INDEX.into(), Value::from(5u64));
        fields.insert(F_DATA.into(), Value::String("x".into()));
        remote
            .put_document("backups/owner-1/chunks", &chunk_key(5), fields)
            .await
            .unwrap();

        let err = t.load("owner-1").await.unwrap_err();
        assert!(matches!(err, TransportError::ExtraChunk { index: 5, total: 5, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_backup() {
        let t = transport(Arc::new(MemoryDocumentStore::new()), small_chunks());
        assert!(t.load("nobody").await.unwrap().is_none());
        assert!(!t.exists("nobody").await.unwrap().exists);
    }

    #[tokio::test]
    async fn slow_remote_times_out() {
        let remote = Arc::new(MemoryDocumentStore::new().with_latency(Duration::from_millis(200)));
        let t = ChunkedTransport::new(remote, "backups", small_chunks(), Duration::from_millis(20));
        let err = t.exists("owner-1").await.unwrap_err();
        assert_eq!(err, TransportError::Timeout(Duration::from_millis(20)));
        assert!(err.is_retryable());
    }

    mod properties {
        use super::super::{reassemble, split_payload};
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn reassembly_ignores_listing_order(
                payload in "[a-zA-Z0-9+/=é]{0,400}",
                chunk_size in 1usize..64,
                seed in any::<u64>(),
            ) {
                let chunks = split_payload(&payload, chunk_size);
                let mut indexed: Vec<(u32, &str)> = chunks
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (i as u32, *c))
                    .collect();
                let n = indexed.len();
                for i in 0..n {
                    let j = (seed as usize).wrapping_add(i * 7) % n;
                    indexed.swap(i, j);
                }

                let total = n as u32;
                prop_assert_eq!(reassemble("k", total, indexed).unwrap(), payload);
            }

            #[test]
            fn chunks_respect_size_on_ascii(payload in "[a-z]{1,300}", chunk_size in 1usize..50) {
                let chunks = split_payload(&payload, chunk_size);
                prop_assert!(chunks.iter().all(|c| c.len() <= chunk_size));
                prop_assert_eq!(chunks.len(), payload.len().div_ceil(chunk_size));
            }
        }
    }
}
