//! Per-collection merge policy.

use serde::{Deserialize, Serialize};

/// How records of one collection are keyed and ranked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePolicy {
    /// Field holding the natural key (e.g. `grNo`).
    pub natural_key_field: String,
    /// Identity-proof fields (e.g. a government ID). A record carrying any
    /// of these is preferred as the merge base.
    #[serde(default)]
    pub identity_fields: Vec<String>,
}

impl MergePolicy {
    /// Creates a policy keyed on `natural_key_field` with no identity fields.
    #[must_use]
    pub fn new(natural_key_field: impl Into<String>) -> Self {
        Self {
            natural_key_field: natural_key_field.into(),
            identity_fields: Vec::new(),
        }
    }

    /// Adds an identity-proof field.
    #[must_use]
    pub fn with_identity_field(mut self, field: impl Into<String>) -> Self {
        self.identity_fields.push(field.into());
        self
    }

    /// Policy for student records: keyed by general-register number,
    /// with the Aadhaar number as identity proof.
    #[must_use]
    pub fn students() -> Self {
        Self::new("grNo").with_identity_field("aadharNo")
    }
}
