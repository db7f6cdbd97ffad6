//! The complete local dataset.

use crate::error::{ModelError, ModelResult};
use crate::record::{type_name, Record};
use crate::settings::Settings;
use crate::time::iso8601_opt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// A full export of the local store.
///
/// Snapshots are what gets sealed and pushed; a push always carries the whole
/// dataset so the remote copy is replaced rather than patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Schema version of this document.
    pub schema_version: u32,
    /// When the snapshot was taken.
    #[serde(default, with = "iso8601_opt", skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    /// Settings, keyed by name.
    #[serde(default)]
    pub settings: Settings,
    /// Record collections, keyed by collection name.
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<Record>>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    /// Creates an empty snapshot at the current schema version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            exported_at: None,
            settings: Settings::new(),
            collections: BTreeMap::new(),
        }
    }

    /// Returns the records of a collection (empty if absent).
    #[must_use]
    pub fn collection(&self, name: &str) -> &[Record] {
        self.collections.get(name).map_or(&[], Vec::as_slice)
    }

    /// Number of records per collection.
    #[must_use]
    pub fn record_counts(&self) -> BTreeMap<String, u64> {
        self.collections
            .iter()
            .map(|(name, records)| (name.clone(), records.len() as u64))
            .collect()
    }

    /// Total number of records across collections.
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Serializes to compact JSON bytes.
    pub fn to_json_bytes(&self) -> ModelResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses JSON bytes produced by [`to_json_bytes`](Self::to_json_bytes).
    pub fn from_json_bytes(bytes: &[u8]) -> ModelResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Converts an already-parsed JSON document.
    pub fn from_value(value: Value) -> ModelResult<Self> {
        if !value.is_object() {
            return Err(ModelError::invalid_shape(format!(
                "snapshot must be a JSON object, got {}",
                type_name(&value)
            )));
        }
        Ok(serde_json::from_value(value)?)
    }
}
