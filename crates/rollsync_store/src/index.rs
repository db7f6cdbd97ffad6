//! Natural-key index.

use crate::config::StoreConfig;
use rollsync_model::{NaturalKey, Record, Snapshot};
use std::collections::HashMap;

/// Maps natural keys to record positions, one map per collection.
///
/// The index is derived state: it is never persisted and is rebuilt after
/// every load or import. Unkeyed records are not indexed.
#[derive(Debug, Default)]
pub struct NaturalKeyIndex {
    collections: HashMap<String, HashMap<NaturalKey, usize>>,
}

impl NaturalKeyIndex {
    /// Builds the index for every collection of `snapshot`.
    #[must_use]
    pub fn build(snapshot: &Snapshot, config: &StoreConfig) -> Self {
        let mut index = Self::default();
        for (name, records) in &snapshot.collections {
            index.rebuild_collection(name, records, config);
        }
        index
    }

    /// Rebuilds the entries of one collection.
    pub fn rebuild_collection(&mut self, name: &str, records: &[Record], config: &StoreConfig) {
        let field = config.policy_for(name).natural_key_field;
        let mut entries = HashMap::with_capacity(records.len());
        for (pos, record) in records.iter().enumerate() {
            if let Some(key) = record.natural_key(&field) {
                // First occurrence wins; a clean store has no duplicates.
                entries.entry(key).or_insert(pos);
            }
        }
        self.collections.insert(name.to_string(), entries);
    }

    /// Returns the position of `key` in `collection`.
    #[must_use]
    pub fn lookup(&self, collection: &str, key: &NaturalKey) -> Option<usize> {
        self.collections.get(collection)?.get(key).copied()
    }

    /// Records that `key` now lives at `pos`.
    pub fn insert(&mut self, collection: &str, key: NaturalKey, pos: usize) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(key, pos);
    }

    /// Number of indexed keys in `collection`.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, HashMap::len)
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.values().all(HashMap::is_empty)
    }
}
