//! # rollsync Sync
//!
//! Offline-first backup synchronization for rollsync.
//!
//! This crate provides:
//! - The [`RemoteDocumentStore`] contract with in-memory and directory
//!   implementations
//! - [`ChunkedTransport`] - envelopes split across size-limited documents
//! - [`SyncCoordinator`] - the pull/push state machine with retry
//! - [`SyncScheduler`] - debounced, periodic and forced triggers
//!
//! ## Architecture
//!
//! Each cycle compares the local sync cursor with the remote backup's
//! `lastModified`:
//! 1. No backup yet: push (`first-backup`)
//! 2. Remote newer: pull, decrypt, merge into the local store
//! 3. Otherwise: push the full local snapshot
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time
//! - The cursor is updated only after a pull or push fully commits
//! - Push writes metadata before chunks; pull reads metadata before chunks
//! - Crypto and local-store errors are never retried
//! - Nothing is truncated to fit the remote; oversize backups fail loudly

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chunked;
mod config;
mod coordinator;
mod error;
mod fs_store;
mod metadata;
mod remote;
mod scheduler;
mod sealer;

pub use chunked::{chunk_key, reassemble, split_payload, ChunkPlan, ChunkedTransport};
pub use config::{
    ChunkConfig, RetryConfig, SchedulerConfig, SyncConfig, CHUNK_DOCUMENT_OVERHEAD,
    DEFAULT_DOCUMENT_LIMIT,
};
pub use coordinator::{
    decide, SyncCoordinator, SyncDirection, SyncOutcome, SyncState, SyncStats, SyncTrigger,
};
pub use error::{SyncError, SyncResult, TransportError};
pub use fs_store::DirectoryDocumentStore;
pub use metadata::{BackupMetadata, BackupProbe, BackupReason};
pub use remote::{
    child_collection_path, sort_documents, CallCounts, Fields, MemoryDocumentStore,
    RemoteDocument, RemoteDocumentStore, CHILD_COLLECTION,
};
pub use scheduler::SyncScheduler;
pub use sealer::{EnvelopeSealer, SecretSealer};
