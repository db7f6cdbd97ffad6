//! Backup metadata document.

use crate::error::TransportError;
use crate::remote::Fields;
use chrono::{DateTime, Utc};
use rollsync_model::time::{iso8601_opt, parse_iso8601};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Metadata field names, in wire spelling.
const METADATA_FIELDS: &[&str] = &[
    "ownerId",
    "lastModified",
    "isChunked",
    "totalChunks",
    "sizeHint",
    "backupReason",
    "recordCounts",
    "studentCount",
    "encrypted",
];

/// Why a push happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackupReason {
    /// Periodic full cycle.
    Periodic,
    /// User-initiated.
    #[default]
    Forced,
    /// Safety backup before an application update.
    PreUpdateSafety,
    /// No backup existed yet.
    FirstBackup,
    /// Debounced local change.
    DataChanged,
}

impl BackupReason {
    /// Wire spelling.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Periodic => "periodic",
            Self::Forced => "forced",
            Self::PreUpdateSafety => "pre-update-safety",
            Self::FirstBackup => "first-backup",
            Self::DataChanged => "data-changed",
        }
    }
}

impl fmt::Display for BackupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes one pushed backup.
///
/// Stored alongside the inline envelope fields in the backup document and
/// overwritten on every successful push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    /// Owner of the backup.
    #[serde(default)]
    pub owner_id: String,
    /// Push time; the remote side of the sync decision.
    #[serde(default, with = "iso8601_opt")]
    pub last_modified: Option<DateTime<Utc>>,
    /// Whether the payload lives in child chunk documents.
    #[serde(default)]
    pub is_chunked: bool,
    /// Number of chunk documents (0 when inline).
    #[serde(default)]
    pub total_chunks: u32,
    /// Size of the encoded payload in bytes.
    #[serde(default)]
    pub size_hint: u64,
    /// Why the push happened.
    #[serde(default)]
    pub backup_reason: BackupReason,
    /// Records per collection at push time.
    #[serde(default)]
    pub record_counts: BTreeMap<String, u64>,
    /// Number of student records at push time.
    #[serde(default)]
    pub student_count: u64,
    /// False for plaintext fallback and legacy payloads.
    #[serde(default)]
    pub encrypted: bool,
}

/// Envelope field present only on sealed payloads.
const SEALED_MARKER: &str = "algorithmId";

impl BackupMetadata {
    /// Creates metadata for a push by `owner_id`.
    pub fn new(owner_id: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            owner_id: owner_id.into(),
            last_modified: Some(last_modified),
            is_chunked: false,
            total_chunks: 0,
            size_hint: 0,
            backup_reason: BackupReason::default(),
            record_counts: BTreeMap::new(),
            student_count: 0,
            encrypted: true,
        }
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: BackupReason) -> Self {
        self.backup_reason = reason;
        self
    }

    /// Sets the record counts and derives the student count from
    /// `student_collection`.
    #[must_use]
    pub fn with_record_counts(
        mut self,
        counts: BTreeMap<String, u64>,
        student_collection: &str,
    ) -> Self {
        self.student_count = counts.get(student_collection).copied().unwrap_or(0);
        self.record_counts = counts;
        self
    }

    /// Renders the metadata fields (without the payload).
    pub fn to_fields(&self) -> Result<Fields, TransportError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => Ok(fields),
            Ok(_) => Err(TransportError::malformed("metadata is not an object")),
            Err(e) => Err(TransportError::malformed(e.to_string())),
        }
    }

    /// Reads the metadata fields out of a backup document.
    ///
    /// Envelope and unknown fields are ignored. Documents written before
    /// metadata existed fall back to the envelope `timestamp`, and count as
    /// encrypted only if they carry a sealed envelope.
    pub fn from_fields(fields: &Fields) -> Result<Self, TransportError> {
        let known: Fields = METADATA_FIELDS
            .iter()
            .filter_map(|name| fields.get(*name).map(|v| ((*name).to_string(), v.clone())))
            .collect();

        let mut meta: Self = serde_json::from_value(Value::Object(known))
            .map_err(|e| TransportError::malformed(format!("backup metadata: {e}")))?;

        if !fields.contains_key("encrypted") {
            meta.encrypted = fields.contains_key(SEALED_MARKER);
        }
        if meta.last_modified.is_none() {
            meta.last_modified = fields
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|raw| parse_iso8601(raw).ok());
        }
        Ok(meta)
    }
}

/// Answer to "does a backup exist, and how fresh is it".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BackupProbe {
    /// Whether a backup document exists.
    pub exists: bool,
    /// Remote push time.
    pub last_modified: Option<DateTime<Utc>>,
    /// Records per collection at push time.
    pub record_counts: BTreeMap<String, u64>,
    /// Whether the payload is chunked.
    pub is_chunked: bool,
    /// Announced chunk count.
    pub total_chunks: u32,
    /// Whether the payload is encrypted.
    pub encrypted: bool,
    /// Why the backup was pushed.
    pub backup_reason: Option<BackupReason>,
}

impl BackupProbe {
    /// Probe result for a missing backup.
    #[must_use]
    pub fn missing() -> Self {
        Self::default()
    }

    /// Probe result for an existing backup.
    #[must_use]
    pub fn from_metadata(meta: &BackupMetadata) -> Self {
        Self {
            exists: true,
            last_modified: meta.last_modified,
            record_counts: meta.record_counts.clone(),
            is_chunked: meta.is_chunked,
            total_chunks: meta.total_chunks,
            encrypted: meta.encrypted,
            backup_reason: Some(meta.backup_reason),
        }
    }
}
