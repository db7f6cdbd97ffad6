//! # rollsync Testkit
//!
//! Test utilities for rollsync.
//!
//! This crate provides:
//! - Fixtures: cheap codecs, sample snapshots, temporary stores
//! - [`TestDevice`] - a local store and coordinator on a shared remote
//! - Property-based test generators using proptest
//! - [`FlakyRemote`] - a remote store that fails, hides chunks or reorders
//!   listings on request
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rollsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn two_devices() {
//!     let remote = Arc::new(MemoryDocumentStore::new());
//!     let clock = Arc::new(ManualClock::new(fixed_time()));
//!     let laptop = TestDevice::new("owner-1", remote.clone(), clock.clone());
//!     let phone = TestDevice::new("owner-1", remote, clock);
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use fixtures::*;
pub use generators::*;
pub use remote::*;
