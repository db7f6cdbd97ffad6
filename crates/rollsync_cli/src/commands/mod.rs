//! CLI command implementations.

pub mod backup;
pub mod import;
pub mod inspect;
pub mod migrate;
pub mod sync;

use clap::ValueEnum;
use rollsync_crypto::{CodecConfig, CryptoCodec, CryptoError, UserSecret};
use rollsync_storage::StorageError;
use rollsync_store::{LocalStore, StoreConfig, StoreError};
use rollsync_sync::{
    DirectoryDocumentStore, SecretSealer, SyncConfig, SyncCoordinator, SyncError,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A required option was neither passed nor set in the environment.
    #[error("--{flag} is required (or set {env})")]
    MissingOption {
        /// Flag name without dashes.
        flag: &'static str,
        /// Environment variable that can stand in for the flag.
        env: &'static str,
    },

    /// Local store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Snapshot file failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Sync failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Codec setup failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// File I/O failure.
    #[error("{path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    /// Local store file.
    pub store: Option<PathBuf>,
    /// Remote directory.
    pub remote: Option<PathBuf>,
    /// Backup owner.
    pub owner: Option<String>,
    /// Application secret.
    pub app_secret: Option<String>,
    /// Remote backup collection.
    pub collection: String,
}

impl Context {
    fn store_path(&self) -> CliResult<&Path> {
        self.store.as_deref().ok_or(CliError::MissingOption {
            flag: "store",
            env: "ROLLSYNC_STORE",
        })
    }

    /// Opens the local store file.
    pub fn open_store(&self) -> CliResult<LocalStore> {
        Ok(LocalStore::open_path(self.store_path()?, StoreConfig::default())?)
    }

    /// Builds a coordinator over the local store and the remote directory.
    pub fn coordinator(&self, allow_plaintext: bool) -> CliResult<SyncCoordinator> {
        let owner = self.owner.as_deref().ok_or(CliError::MissingOption {
            flag: "owner",
            env: "ROLLSYNC_OWNER",
        })?;
        let secret = self.app_secret.as_deref().ok_or(CliError::MissingOption {
            flag: "app-secret",
            env: "ROLLSYNC_APP_SECRET",
        })?;
        let remote_root = self.remote.as_deref().ok_or(CliError::MissingOption {
            flag: "remote",
            env: "ROLLSYNC_REMOTE",
        })?;

        let config = SyncConfig::new(owner)
            .with_collection(self.collection.clone())
            .with_plaintext_fallback(allow_plaintext);
        let codec = CryptoCodec::new(CodecConfig::new())?;
        let sealer = SecretSealer::new(codec, UserSecret::new(secret.as_bytes().to_vec(), owner));
        let remote = Arc::new(DirectoryDocumentStore::new(remote_root));

        Ok(SyncCoordinator::new(
            config,
            Arc::new(self.open_store()?),
            remote,
            Arc::new(sealer),
        ))
    }
}

/// Prints `value` as pretty JSON.
pub(crate) fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
