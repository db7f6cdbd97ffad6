//! # rollsync Storage
//!
//! Snapshot storage backends for rollsync.
//!
//! Backends are **opaque byte stores** holding exactly one blob: the
//! serialized local state. They know nothing about records, settings or
//! schema versions.
//!
//! ## Design Principles
//!
//! - `commit` replaces the blob atomically: a reader sees the old bytes or
//!   the new bytes, never a mix
//! - Backends must be `Send + Sync`
//! - The local store owns all format interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral stores
//! - [`FileBackend`] - Atomic rename-based persistence with a lock file
//!
//! ## Example
//!
//! ```rust
//! use rollsync_storage::{InMemoryBackend, SnapshotBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.commit(b"{}").unwrap();
//! assert_eq!(backend.load().unwrap().as_deref(), Some(&b"{}"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::SnapshotBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
