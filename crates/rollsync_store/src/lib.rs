//! # rollsync Store
//!
//! Versioned local persistence for rollsync.
//!
//! This crate provides:
//! - [`LocalStore`] - the in-memory dataset committed as one atomic blob
//! - [`MigrationManager`] - forward-only schema migrations of snapshot documents
//! - [`NaturalKeyIndex`] - natural-key lookups per collection
//! - [`StoreConfig`] - per-collection merge policies and flush behavior
//!
//! Imports go through the merge engine on a staged copy and are committed in
//! one write, so a crash mid-import leaves the previous state intact.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod index;
mod migration;
mod store;

pub use config::{StoreConfig, DEFAULT_KEY_FIELD};
pub use error::{StoreError, StoreResult};
pub use index::NaturalKeyIndex;
pub use migration::{
    Migration, MigrationContext, MigrationInfo, MigrationManager, MigrationRunResult,
    SchemaVersion,
};
pub use store::{ImportReport, LocalStore};
