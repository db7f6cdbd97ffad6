//! Local store configuration.

use rollsync_merge::MergePolicy;
use std::collections::BTreeMap;

/// Key field used by collections without an explicit policy.
pub const DEFAULT_KEY_FIELD: &str = "id";

/// Configuration for opening a [`LocalStore`](crate::LocalStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Merge policy per collection.
    pub policies: BTreeMap<String, MergePolicy>,

    /// Whether every mutation is committed immediately.
    ///
    /// When false, mutations only mark the store dirty and callers decide
    /// when to [`flush`](crate::LocalStore::flush).
    pub auto_flush: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert("students".to_string(), MergePolicy::students());
        for name in ["groups", "customFields", "documents"] {
            policies.insert(name.to_string(), MergePolicy::new(DEFAULT_KEY_FIELD));
        }
        Self {
            policies,
            auto_flush: true,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with the default school collections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the merge policy of a collection.
    #[must_use]
    pub fn with_collection(mut self, name: impl Into<String>, policy: MergePolicy) -> Self {
        self.policies.insert(name.into(), policy);
        self
    }

    /// Sets whether mutations are committed immediately.
    #[must_use]
    pub const fn auto_flush(mut self, value: bool) -> Self {
        self.auto_flush = value;
        self
    }

    /// Returns the policy for `collection`, falling back to keying on `id`.
    #[must_use]
    pub fn policy_for(&self, collection: &str) -> MergePolicy {
        self.policies
            .get(collection)
            .cloned()
            .unwrap_or_else(|| MergePolicy::new(DEFAULT_KEY_FIELD))
    }
}
