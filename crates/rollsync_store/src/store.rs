//! The local store facade.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::index::NaturalKeyIndex;
use crate::migration::{MigrationManager, MigrationRunResult, SchemaVersion};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rollsync_merge::{merge_settings, MergeReport, RecordMerger, SettingsMergeReport};
use rollsync_model::time::iso8601_opt;
use rollsync_model::{
    is_empty_value, next_stamp, Clock, NaturalKey, Record, SettingsEntry, Snapshot, SystemClock,
    Value,
};
use rollsync_storage::{FileBackend, InMemoryBackend, SnapshotBackend};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// The committed blob: the snapshot plus bookkeeping the sync engine needs.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState {
    revision: u64,
    #[serde(default, with = "iso8601_opt", skip_serializing_if = "Option::is_none")]
    cursor: Option<DateTime<Utc>>,
    #[serde(default, with = "iso8601_opt", skip_serializing_if = "Option::is_none")]
    modified_at: Option<DateTime<Utc>>,
    snapshot: Value,
}

#[derive(Debug)]
struct StoreState {
    snapshot: Snapshot,
    index: NaturalKeyIndex,
    cursor: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
    revision: u64,
    dirty: bool,
}

/// What [`LocalStore::import_all`] did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// Record merge report per imported collection.
    pub collections: BTreeMap<String, MergeReport>,
    /// Settings merge report.
    pub settings: SettingsMergeReport,
    /// Schema version of the imported document, if it had to be migrated.
    pub migrated_from: Option<SchemaVersion>,
    /// Store revision after the import.
    pub revision: u64,
    /// Whether the merged store holds data the imported document lacks,
    /// either unsynced local edits or fields and settings it never had.
    pub local_ahead: bool,
}

impl ImportReport {
    /// Total anomalies across collections.
    #[must_use]
    pub fn anomaly_count(&self) -> usize {
        self.collections.values().map(|r| r.anomalies.len()).sum()
    }

    /// Total records inserted across collections.
    #[must_use]
    pub fn inserted(&self) -> usize {
        self.collections.values().map(|r| r.inserted).sum()
    }

    /// Merge counters summed over all collections.
    #[must_use]
    pub fn totals(&self) -> MergeReport {
        let mut totals = MergeReport::default();
        for report in self.collections.values() {
            totals.absorb(report.clone());
        }
        totals
    }
}

impl StoreState {
    fn has_unsynced_changes(&self) -> bool {
        match (self.modified_at, self.cursor) {
            (Some(modified), Some(cursor)) => modified > cursor,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Returns true if `staged` holds something `incoming` does not.
///
/// A keyed record is covered when every non-empty field is also non-empty on
/// an incoming record with the same key; with `exact`, the values must match
/// too. Unkeyed records need an identical incoming twin. Settings must match
/// entry for entry.
fn holds_more_than(
    staged: &Snapshot,
    incoming: &Snapshot,
    config: &StoreConfig,
    exact: bool,
) -> bool {
    for (name, records) in &staged.collections {
        let key_field = config.policy_for(name).natural_key_field;
        let theirs = incoming.collection(name);
        let mut by_key: HashMap<NaturalKey, Vec<&Record>> = HashMap::new();
        for record in theirs {
            if let Some(key) = record.natural_key(&key_field) {
                by_key.entry(key).or_default().push(record);
            }
        }

        for record in records {
            let Some(key) = record.natural_key(&key_field) else {
                if !theirs.contains(record) {
                    return true;
                }
                continue;
            };
            let Some(twins) = by_key.get(&key) else {
                return true;
            };
            let uncovered = record
                .fields()
                .filter(|(field, value)| *field != &key_field && !is_empty_value(value))
                .any(|(field, value)| {
                    !twins.iter().any(|twin| match twin.get(field) {
                        Some(other) if exact => other == value,
                        Some(other) => !is_empty_value(other),
                        None => false,
                    })
                });
            if uncovered {
                return true;
            }
        }
    }

    staged
        .settings
        .iter()
        .any(|(key, entry)| incoming.settings.get(key) != Some(entry))
}

/// Versioned local persistence of the whole dataset.
///
/// `LocalStore` holds the current [`Snapshot`] in memory and commits it as a
/// single blob through a [`SnapshotBackend`]. It provides:
/// - Record and settings CRUD keyed by natural key
/// - Whole-dataset export and merge-import for sync
/// - The sync cursor (the last successful sync time)
/// - Schema migration of stored and imported documents
///
/// # Atomicity
///
/// Imports merge into a staged copy and commit it with one backend write;
/// the in-memory state only changes after the write succeeds. Single-record
/// writes change memory first; if the commit fails the store stays dirty and
/// the next [`flush`](Self::flush) retries.
///
/// # Example
///
/// ```rust
/// use rollsync_store::LocalStore;
/// use rollsync_model::Record;
///
/// let store = LocalStore::open_in_memory().unwrap();
/// store.put_record("students", Record::new().with("grNo", "12").with("name", "Ravi")).unwrap();
/// assert!(store.get_record("students", "0012").is_some());
/// ```
pub struct LocalStore {
    backend: Box<dyn SnapshotBackend>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    migrations: MigrationManager,
    state: RwLock<StoreState>,
}

impl LocalStore {
    /// Opens a store over `backend`.
    ///
    /// Stored documents from older builds are migrated on open; with
    /// `auto_flush` the migrated form is committed right away.
    ///
    /// # Errors
    ///
    /// Fails if the blob cannot be read, parsed or migrated.
    pub fn open(
        backend: Box<dyn SnapshotBackend>,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let migrations = MigrationManager::with_builtins(&config);
        migrations.validate()?;

        let (state, run) = match backend.load()? {
            None => (
                StoreState {
                    snapshot: Snapshot::new(),
                    index: NaturalKeyIndex::default(),
                    cursor: None,
                    modified_at: None,
                    revision: 0,
                    dirty: false,
                },
                None,
            ),
            Some(bytes) => {
                let (state, run) = Self::decode(&bytes, &migrations, &config)?;
                (state, Some(run))
            }
        };

        let store = Self {
            backend,
            clock,
            config,
            migrations,
            state: RwLock::new(state),
        };

        if let Some(run) = run.filter(MigrationRunResult::changed) {
            info!(
                backend = %store.backend.describe(),
                from = run.from_version,
                to = run.final_version,
                "migrated stored snapshot"
            );
            let mut state = store.state.write();
            state.dirty = true;
            if store.config.auto_flush {
                store.write_state(&state)?;
                state.dirty = false;
            }
        }

        debug!(backend = %store.backend.describe(), "local store opened");
        Ok(store)
    }

    /// Opens (or creates) a store file at `path`, holding its lock file.
    pub fn open_path(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open(Box::new(backend), Arc::new(SystemClock), config)
    }

    /// Opens a fresh in-memory store for testing.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(
            Box::new(InMemoryBackend::new()),
            Arc::new(SystemClock),
            StoreConfig::default(),
        )
    }

    fn decode(
        bytes: &[u8],
        migrations: &MigrationManager,
        config: &StoreConfig,
    ) -> StoreResult<(StoreState, MigrationRunResult)> {
        let doc: Value = serde_json::from_slice(bytes)?;
        let persisted = if doc.get("snapshot").is_some() && doc.get("revision").is_some() {
            serde_json::from_value::<PersistedState>(doc)?
        } else {
            // A bare snapshot, as written by exports and older builds.
            PersistedState {
                revision: 0,
                cursor: None,
                modified_at: None,
                snapshot: doc,
            }
        };

        let (migrated, run) = migrations.run(persisted.snapshot)?;
        let snapshot = Snapshot::from_value(migrated)?;
        let index = NaturalKeyIndex::build(&snapshot, config);

        Ok((
            StoreState {
                snapshot,
                index,
                cursor: persisted.cursor,
                modified_at: persisted.modified_at,
                revision: persisted.revision,
                dirty: false,
            },
            run,
        ))
    }

    fn write_state(&self, state: &StoreState) -> StoreResult<()> {
        self.write_parts(
            &state.snapshot,
            state.cursor,
            state.modified_at,
            state.revision,
        )
    }

    fn write_parts(
        &self,
        snapshot: &Snapshot,
        cursor: Option<DateTime<Utc>>,
        modified_at: Option<DateTime<Utc>>,
        revision: u64,
    ) -> StoreResult<()> {
        let persisted = PersistedState {
            revision,
            cursor,
            modified_at,
            snapshot: serde_json::to_value(snapshot)?,
        };
        let bytes = serde_json::to_vec(&persisted)?;
        self.backend.commit(&bytes)?;
        debug!(revision, bytes = bytes.len(), "local store committed");
        Ok(())
    }

    /// Marks a local mutation and commits it if `auto_flush` is set.
    fn touch(&self, state: &mut StoreState) -> StoreResult<()> {
        state.revision += 1;
        state.modified_at = Some(next_stamp(state.modified_at, self.clock.now()));
        state.dirty = true;
        if self.config.auto_flush {
            self.write_state(state)?;
            state.dirty = false;
        }
        Ok(())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns a copy of the whole dataset, stamped with the export time.
    #[must_use]
    pub fn export_all(&self) -> Snapshot {
        let mut snapshot = self.state.read().snapshot.clone();
        snapshot.exported_at = Some(self.clock.now());
        snapshot
    }

    /// Merges a snapshot into the store and commits the result.
    ///
    /// The snapshot is migrated first if it carries an older schema version.
    pub fn import_all(&self, snapshot: Snapshot) -> StoreResult<ImportReport> {
        self.import_document(serde_json::to_value(&snapshot)?)
    }

    /// Merges a raw snapshot document into the store and commits the result.
    ///
    /// Records are merged per collection by natural key (stored fields win,
    /// incoming fields fill gaps), settings by timestamp.
    ///
    /// # Errors
    ///
    /// Fails without touching the store if the document cannot be migrated
    /// or the commit fails.
    pub fn import_document(&self, doc: Value) -> StoreResult<ImportReport> {
        let (migrated, run) = self.migrations.run(doc)?;
        let incoming = Snapshot::from_value(migrated)?;

        let mut state = self.state.write();
        let mut staged = state.snapshot.clone();
        let mut report = ImportReport {
            migrated_from: run.changed().then_some(run.from_version),
            ..ImportReport::default()
        };

        for (name, records) in &incoming.collections {
            let existing = staged.collections.remove(name).unwrap_or_default();
            let merger = RecordMerger::new(self.config.policy_for(name));
            let outcome = merger.merge_into(existing, records.clone());
            staged.collections.insert(name.clone(), outcome.records);
            report.collections.insert(name.clone(), outcome.report);
        }

        let (settings, settings_report) = merge_settings(&staged.settings, &incoming.settings);
        staged.settings = settings;
        report.settings = settings_report;

        // Local edits to values the incoming side also holds survive the
        // merge (stored fields win), so they only count while still unsynced.
        report.local_ahead = holds_more_than(&staged, &incoming, &self.config, false)
            || (state.has_unsynced_changes()
                && holds_more_than(&staged, &incoming, &self.config, true));

        let revision = state.revision + 1;
        self.write_parts(&staged, state.cursor, state.modified_at, revision)?;

        state.index = NaturalKeyIndex::build(&staged, &self.config);
        state.snapshot = staged;
        state.revision = revision;
        state.dirty = false;
        report.revision = revision;

        info!(
            revision,
            inserted = report.inserted(),
            anomalies = report.anomaly_count(),
            local_ahead = report.local_ahead,
            "imported snapshot"
        );
        Ok(report)
    }

    /// Last successful sync time.
    #[must_use]
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.state.read().cursor
    }

    /// Sets the sync cursor and commits immediately.
    ///
    /// Any pending record or settings changes are committed with it.
    pub fn set_cursor(&self, ts: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write();
        self.write_parts(&state.snapshot, Some(ts), state.modified_at, state.revision)?;
        state.cursor = Some(ts);
        state.dirty = false;
        Ok(())
    }

    /// Time of the last local mutation.
    #[must_use]
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().modified_at
    }

    /// Returns true if the store was modified locally after the last sync.
    #[must_use]
    pub fn has_unsynced_changes(&self) -> bool {
        self.state.read().has_unsynced_changes()
    }

    /// Stamps the store as modified after the current cursor and commits.
    ///
    /// Used after a pull that left local data the remote does not have, so
    /// the next decision pushes it.
    pub fn mark_unsynced(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        let floor = match (state.modified_at, state.cursor) {
            (Some(modified), Some(cursor)) => Some(modified.max(cursor)),
            (modified, cursor) => modified.or(cursor),
        };
        let modified_at = next_stamp(floor, self.clock.now());
        self.write_parts(&state.snapshot, state.cursor, Some(modified_at), state.revision)?;
        state.modified_at = Some(modified_at);
        state.dirty = false;
        Ok(())
    }

    /// Inserts or replaces a record by natural key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingKey`] if the record has no natural key.
    pub fn put_record(&self, collection: &str, record: Record) -> StoreResult<()> {
        let field = self.config.policy_for(collection).natural_key_field;
        let key = record
            .natural_key(&field)
            .ok_or_else(|| StoreError::missing_key(collection, &field))?;

        let mut state = self.state.write();
        let state = &mut *state;
        match state.index.lookup(collection, &key) {
            Some(pos) => {
                let records = state.snapshot.collections.entry(collection.to_string()).or_default();
                if let Some(slot) = records.get_mut(pos) {
                    *slot = record;
                }
            }
            None => {
                let records = state.snapshot.collections.entry(collection.to_string()).or_default();
                records.push(record);
                let pos = records.len() - 1;
                state.index.insert(collection, key, pos);
            }
        }
        self.touch(state)
    }

    /// Returns the record with natural key `key`.
    #[must_use]
    pub fn get_record(&self, collection: &str, key: &str) -> Option<Record> {
        let key = NaturalKey::parse(key)?;
        let state = self.state.read();
        let pos = state.index.lookup(collection, &key)?;
        state.snapshot.collection(collection).get(pos).cloned()
    }

    /// Removes the record with natural key `key`.
    pub fn remove_record(&self, collection: &str, key: &str) -> StoreResult<Option<Record>> {
        let Some(key) = NaturalKey::parse(key) else {
            return Ok(None);
        };

        let mut state = self.state.write();
        let state = &mut *state;
        let Some(pos) = state.index.lookup(collection, &key) else {
            return Ok(None);
        };
        let Some(records) = state.snapshot.collections.get_mut(collection) else {
            return Ok(None);
        };
        if pos >= records.len() {
            return Ok(None);
        }
        let removed = records.remove(pos);
        state
            .index
            .rebuild_collection(collection, records, &self.config);
        self.touch(state)?;
        Ok(Some(removed))
    }

    /// Returns all records of a collection.
    #[must_use]
    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.state.read().snapshot.collection(collection).to_vec()
    }


    /// Writes a setting, refreshing its timestamp.
    pub fn set_setting(&self, key: &str, value: Value) -> StoreResult<()> {
        let now = self.clock.now();
        let mut state = self.state.write();
        match state.snapshot.settings.get_mut(key) {
            Some(entry) => entry.overwrite(value, now),
            None => {
                state
                    .snapshot
                    .settings
                    .insert(key.to_string(), SettingsEntry::new(value, now));
            }
        }
        self.touch(&mut state)
    }

    /// Returns a setting.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<SettingsEntry> {
        self.state.read().snapshot.settings.get(key).cloned()
    }

    /// Commits pending changes. Returns true if anything was written.
    pub fn flush(&self) -> StoreResult<bool> {
        let mut state = self.state.write();
        if !state.dirty {
            return Ok(false);
        }
        self.write_state(&state)?;
        state.dirty = false;
        Ok(true)
    }

    /// Returns true if there are uncommitted changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Monotonic mutation counter.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Schema version of the in-memory snapshot.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.state.read().snapshot.schema_version
    }

    /// Number of records per collection.
    #[must_use]
    pub fn record_counts(&self) -> BTreeMap<String, u64> {
        self.state.read().snapshot.record_counts()
    }
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("LocalStore")
            .field("backend", &self.backend.describe())
            .field("revision", &state.revision)
            .field("cursor", &state.cursor)
            .field("dirty", &state.dirty)
            .finish_non_exhaustive()
    }
}
