//! Timestamped settings entries.

use crate::time::iso8601_opt;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// All settings of a snapshot, keyed by setting name.
pub type Settings = BTreeMap<String, SettingsEntry>;

/// A single setting and the time it was last written locally.
///
/// A missing `updated_at` means the entry predates timestamping and loses
/// every timestamp comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsEntry {
    /// Scalar or nested mapping.
    pub value: Value,
    /// Last local write.
    #[serde(default, with = "iso8601_opt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SettingsEntry {
    /// Creates a stamped entry.
    #[must_use]
    pub fn new(value: Value, updated_at: DateTime<Utc>) -> Self {
        Self {
            value,
            updated_at: Some(updated_at),
        }
    }

    /// Creates an entry with no timestamp.
    #[must_use]
    pub fn unstamped(value: Value) -> Self {
        Self {
            value,
            updated_at: None,
        }
    }

    /// Replaces the value and refreshes the stamp.
    ///
    /// The new stamp is strictly later than the previous one even if the
    /// clock has not moved or went backwards.
    pub fn overwrite(&mut self, value: Value, now: DateTime<Utc>) {
        self.value = value;
        self.updated_at = Some(next_stamp(self.updated_at, now));
    }

    /// Returns true if both sides hold JSON objects.
    #[must_use]
    pub fn both_objects(&self, other: &Self) -> bool {
        self.value.is_object() && other.value.is_object()
    }
}

/// Computes a write stamp strictly after `previous`.
#[must_use]
pub fn next_stamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if prev >= now => prev + Duration::milliseconds(1),
        _ => now,
    }
}
