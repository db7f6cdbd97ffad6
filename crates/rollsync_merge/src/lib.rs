//! # rollsync Merge
//!
//! Reconciliation of two versions of the same logical dataset.
//!
//! This crate provides:
//! - [`RecordMerger`] - natural-key deduplication and gap-filling merges
//! - [`merge_settings`] - per-key settings merge by timestamp and shape
//! - [`MergeReport`] / [`MergeAnomaly`] - what a merge did, for audit logs
//!
//! This is a pure crate with no I/O.
//!
//! ## Key Invariants
//!
//! - Merges are idempotent: `merge(merge(a, b), b) == merge(a, b)`
//! - No non-empty field of any contributing record is dropped silently
//! - Stored records win over incoming ones; incoming data only fills gaps

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod policy;
mod records;
mod settings;

pub use policy::MergePolicy;
pub use records::{MergeAnomaly, MergeOutcome, MergeReport, RecordMerger};
pub use settings::{merge_settings, SettingsMergeReport};
