//! Natural-key record merge.

use crate::policy::MergePolicy;
use rollsync_model::{is_empty_value, NaturalKey, Record, Value};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// Something a merge resolved by heuristic that deserves an audit trail.
///
/// Anomalies are not errors; the merge result is still deterministic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MergeAnomaly {
    /// Two records sharing a natural key carry different identity proofs.
    /// The base record's proof was kept.
    ConflictingIdentity {
        /// Normalized natural key.
        key: String,
        /// Identity field name.
        field: String,
        /// Value kept on the merged record.
        kept: Value,
        /// Value that lost.
        discarded: Value,
    },
}

/// Counters describing a merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// Incoming records with a key not present before.
    pub inserted: usize,
    /// Stored records that gained at least one field.
    pub updated: usize,
    /// Incoming records that contributed nothing new.
    pub unchanged: usize,
    /// Records folded into another record with the same key.
    pub collapsed_duplicates: usize,
    /// Records without a usable natural key.
    pub unkeyed: usize,
    /// Heuristic resolutions worth auditing.
    pub anomalies: Vec<MergeAnomaly>,
}

impl MergeReport {
    /// Folds another report into this one.
    pub fn absorb(&mut self, other: MergeReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.collapsed_duplicates += other.collapsed_duplicates;
        self.unkeyed += other.unkeyed;
        self.anomalies.extend(other.anomalies);
    }
}

/// Merged records plus what happened.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// One record per natural key (unkeyed records pass through).
    pub records: Vec<Record>,
    /// Merge counters and anomalies.
    pub report: MergeReport,
}

enum Slot {
    Keyed(NaturalKey),
    Unkeyed(Record),
}

/// Merges records of one collection by natural key.
#[derive(Debug, Clone)]
pub struct RecordMerger {
    policy: MergePolicy,
}

impl RecordMerger {
    /// Creates a merger for `policy`.
    #[must_use]
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Collapses a batch so each natural key appears once.
    ///
    /// Within a group the first record carrying an identity proof becomes
    /// the base (else the first record), and gaps in the base are filled
    /// from the others in input order. Output keeps first-appearance order.
    #[must_use]
    pub fn dedupe(&self, batch: Vec<Record>) -> MergeOutcome {
        let mut report = MergeReport::default();
        let records = self.collapse(batch, &mut report);
        MergeOutcome { records, report }
    }

    /// Merges `incoming` into `existing`.
    ///
    /// Existing non-empty fields always win; incoming values only fill
    /// absent or empty fields. Keys not present before are appended in
    /// first-appearance order. Unkeyed incoming records are appended unless
    /// an identical record is already stored.
    #[must_use]
    pub fn merge_into(&self, existing: Vec<Record>, incoming: Vec<Record>) -> MergeOutcome {
        let key_field = self.policy.natural_key_field.as_str();

        let mut stored_report = MergeReport::default();
        let mut stored = self.collapse(existing, &mut stored_report);

        let mut report = MergeReport {
            collapsed_duplicates: stored_report.collapsed_duplicates,
            anomalies: stored_report.anomalies,
            ..MergeReport::default()
        };
        let incoming = self.collapse(incoming, &mut report);

        let mut index: HashMap<NaturalKey, usize> = stored
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.natural_key(key_field).map(|k| (k, i)))
            .collect();

        for record in incoming {
            match record.natural_key(key_field) {
                Some(key) => match index.get(&key) {
                    Some(&i) => {
                        self.check_identity(&key, &stored[i], &record, &mut report);
                        if backfill(&mut stored[i], &record) {
                            report.updated += 1;
                        } else {
                            report.unchanged += 1;
                        }
                    }
                    None => {
                        index.insert(key, stored.len());
                        stored.push(record);
                        report.inserted += 1;
                    }
                },
                None => {
                    if stored.iter().any(|r| r == &record) {
                        report.unchanged += 1;
                    } else {
                        stored.push(record);
                        report.inserted += 1;
                    }
                }
            }
        }

        MergeOutcome {
            records: stored,
            report,
        }
    }

    fn collapse(&self, batch: Vec<Record>, report: &mut MergeReport) -> Vec<Record> {
        let key_field = self.policy.natural_key_field.as_str();
        let mut slots = Vec::with_capacity(batch.len());
        let mut groups: HashMap<NaturalKey, Vec<Record>> = HashMap::new();

        for record in batch {
            match record.natural_key(key_field) {
                Some(key) => {
                    let group = groups.entry(key.clone()).or_default();
                    if group.is_empty() {
                        slots.push(Slot::Keyed(key));
                    }
                    group.push(record);
                }
                None => {
                    report.unkeyed += 1;
                    slots.push(Slot::Unkeyed(record));
                }
            }
        }

        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Keyed(key) => {
                    let group = groups.remove(&key).unwrap_or_default();
                    if let Some(merged) = self.collapse_group(&key, group, report) {
                        out.push(merged);
                    }
                }
                Slot::Unkeyed(record) => out.push(record),
            }
        }
        out
    }

    fn collapse_group(
        &self,
        key: &NaturalKey,
        mut group: Vec<Record>,
        report: &mut MergeReport,
    ) -> Option<Record> {
        if group.is_empty() {
            return None;
        }

        let base_idx = group
            .iter()
            .position(|r| self.has_identity(r))
            .unwrap_or(0);
        let mut base = group.remove(base_idx);
        report.collapsed_duplicates += group.len();

        for other in &group {
            self.check_identity(key, &base, other, report);
            backfill(&mut base, other);
        }
        Some(base)
    }

    fn has_identity(&self, record: &Record) -> bool {
        self.policy
            .identity_fields
            .iter()
            .any(|f| record.has_value(f))
    }

    fn check_identity(
        &self,
        key: &NaturalKey,
        base: &Record,
        other: &Record,
        report: &mut MergeReport,
    ) {
        for field in &self.policy.identity_fields {
            let (Some(kept), Some(discarded)) = (base.get(field), other.get(field)) else {
                continue;
            };
            if is_empty_value(kept) || is_empty_value(discarded) {
                continue;
            }
            if identity_text(kept) == identity_text(discarded) {
                continue;
            }

            warn!(
                target: "rollsync::audit",
                key = %key,
                field = %field,
                "records share a natural key but carry different identity proofs; keeping base value"
            );
            report.anomalies.push(MergeAnomaly::ConflictingIdentity {
                key: key.to_string(),
                field: field.clone(),
                kept: kept.clone(),
                discarded: discarded.clone(),
            });
        }
    }
}

/// Copies fields of `donor` that are absent or empty in `base`.
/// Returns true if `base` changed.
fn backfill(base: &mut Record, donor: &Record) -> bool {
    let mut changed = false;
    for (name, value) in donor.fields() {
        let fill = match base.get(name) {
            None => true,
            Some(current) => is_empty_value(current) && !is_empty_value(value),
        };
        if fill && base.get(name) != Some(value) {
            base.insert(name.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

/// Identity proofs compare on their alphanumeric characters only, so
/// `"1234 5678"` and `"1234-5678"` are the same proof.
fn identity_text(value: &Value) -> String {
    match value {
        Value::String(s) => s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect(),
        other => other.to_string(),
    }
}
