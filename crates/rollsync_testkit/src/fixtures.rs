//! Test fixtures and device helpers.
//!
//! Provides convenience functions for setting up local stores, codecs and
//! simulated devices sharing one remote.

use chrono::{DateTime, TimeZone, Utc};
use rollsync_crypto::{CodecConfig, CryptoCodec, UserSecret};
use rollsync_model::{Clock, ManualClock, Record, SettingsEntry, Snapshot};
use rollsync_storage::InMemoryBackend;
use rollsync_store::{LocalStore, StoreConfig};
use rollsync_sync::{RemoteDocumentStore, SecretSealer, SyncConfig, SyncCoordinator};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// KDF iterations used by test codecs.
///
/// Requires the `testing` feature of `rollsync_crypto`.
pub const TEST_KDF_ITERATIONS: u32 = 1_000;

/// Application secret used by test sealers.
pub const TEST_APP_SECRET: &[u8] = b"rollsync-test-secret";

/// A fixed instant tests start from.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0)
        .single()
        .expect("valid fixed time")
}

/// A codec with a cheap KDF.
pub fn test_codec() -> CryptoCodec {
    CryptoCodec::new(CodecConfig::new().with_kdf_iterations(TEST_KDF_ITERATIONS))
        .expect("test codec")
}

/// A sealer for `owner` under [`TEST_APP_SECRET`].
pub fn test_sealer(owner: &str) -> SecretSealer {
    SecretSealer::new(test_codec(), UserSecret::new(TEST_APP_SECRET.to_vec(), owner))
}

/// A student record.
pub fn student(gr_no: &str, name: &str) -> Record {
    Record::new().with("grNo", gr_no).with("name", name)
}

/// A small dataset with students, a group and a few settings.
pub fn sample_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::new();
    snapshot.collections.insert(
        "students".into(),
        vec![
            student("101", "Asha").with("class", "5A"),
            student("102", "Ravi").with("class", "5B"),
            student("103", "Meera").with("aadharNo", "1234 5678 9012"),
        ],
    );
    snapshot.collections.insert(
        "groups".into(),
        vec![Record::new().with("id", "g1").with("name", "Choir")],
    );
    snapshot.settings.insert(
        "schoolName".into(),
        SettingsEntry::new(json!("Green Valley School"), fixed_time()),
    );
    snapshot.settings.insert(
        "receipt".into(),
        SettingsEntry::new(json!({"prefix": "GV", "next": 41}), fixed_time()),
    );
    snapshot
}

/// A local store over a temporary file, removed on drop.
pub struct TestStoreFile {
    /// The store.
    pub store: LocalStore,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TestStoreFile {
    /// Creates a store file with the default configuration.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("local.json");
        let store = LocalStore::open_path(&path, StoreConfig::default())
            .expect("Failed to open store file");
        Self {
            store,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Path of the store file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Default for TestStoreFile {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStoreFile {
    type Target = LocalStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary file-backed store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&LocalStore) -> R,
{
    let file = TestStoreFile::new();
    f(&file.store)
}

/// One simulated device: a local store and a coordinator on a shared remote.
pub struct TestDevice {
    /// The device's local store.
    pub store: Arc<LocalStore>,
    /// The device's coordinator.
    pub coordinator: SyncCoordinator,
    backend: Arc<InMemoryBackend>,
}

impl TestDevice {
    /// Creates a device for `owner` with default sync settings.
    pub fn new(
        owner: &str,
        remote: Arc<dyn RemoteDocumentStore>,
        clock: Arc<ManualClock>,
    ) -> Self {
        Self::with_config(SyncConfig::new(owner), remote, clock)
    }

    /// Creates a device with an explicit sync configuration.
    pub fn with_config(
        config: SyncConfig,
        remote: Arc<dyn RemoteDocumentStore>,
        clock: Arc<ManualClock>,
    ) -> Self {
        let sealer = test_sealer(&config.owner_id);
        Self::with_sealer(config, remote, clock, Arc::new(sealer))
    }

    /// Creates a device with a custom sealer.
    pub fn with_sealer(
        config: SyncConfig,
        remote: Arc<dyn RemoteDocumentStore>,
        clock: Arc<ManualClock>,
        sealer: Arc<dyn rollsync_sync::EnvelopeSealer>,
    ) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let clock: Arc<dyn Clock> = clock;
        let store = Arc::new(
            LocalStore::open(
                Box::new(Arc::clone(&backend)),
                Arc::clone(&clock),
                StoreConfig::default(),
            )
            .expect("Failed to open device store"),
        );
        let coordinator =
            SyncCoordinator::new(config, Arc::clone(&store), remote, sealer).with_clock(clock);
        Self {
            store,
            coordinator,
            backend,
        }
    }

    /// Reopens the committed local state, as after an app restart.
    pub fn reopen(&self) -> LocalStore {
        let data = self.backend.data().unwrap_or_default();
        LocalStore::open(
            Box::new(InMemoryBackend::with_data(data)),
            Arc::new(ManualClock::new(fixed_time())),
            StoreConfig::default(),
        )
        .expect("Failed to reopen device store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_snapshot_shape() {
        let snapshot = sample_snapshot();
        assert_eq!(snapshot.collection("students").len(), 3);
        assert_eq!(snapshot.total_records(), 4);
    }

    #[test]
    fn temp_store_persists() {
        let file = TestStoreFile::new();
        file.put_record("students", student("7", "Kiran")).unwrap();
        assert!(file.path().exists());
    }

    #[test]
    fn with_temp_store_runs_closure() {
        let count = with_temp_store(|store| {
            store.put_record("students", student("1", "A")).unwrap();
            store.records("students").len()
        });
        assert_eq!(count, 1);
    }
}
