//! Snapshot schema migrations.
//!
//! Snapshots written by older builds (and snapshots pulled from a remote
//! written by an older device) are upgraded before they are read into a
//! [`Snapshot`](rollsync_model::Snapshot).
//!
//! Migrations are:
//! - **Document-level**: they rewrite the raw JSON document, so they can fix
//!   shapes the current types would refuse to parse
//! - **Forward-only**: there are no down migrations
//! - **All-or-nothing**: a failed run returns an error and the caller keeps
//!   the original document
//!
//! ## Usage
//!
//! ```
//! use rollsync_store::{MigrationManager, StoreConfig};
//! use serde_json::json;
//!
//! let manager = MigrationManager::with_builtins(&StoreConfig::default());
//! let legacy = json!({"settings": {"lang": "mr"}, "students": [{"grNo": "1"}]});
//! let (migrated, run) = manager.run(legacy).unwrap();
//! assert_eq!(run.final_version, 2);
//! assert_eq!(migrated["settings"]["lang"]["value"], "mr");
//! ```

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use rollsync_merge::RecordMerger;
use rollsync_model::{Record, CURRENT_SCHEMA_VERSION};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::info;

/// Schema version number.
pub type SchemaVersion = u32;

const SCHEMA_VERSION_FIELD: &str = "schemaVersion";
const SETTINGS_FIELD: &str = "settings";
const COLLECTIONS_FIELD: &str = "collections";

/// Information about a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    /// Version the document has after this migration.
    pub version: SchemaVersion,
    /// Human-readable name.
    pub name: String,
    /// Description of what this migration does.
    pub description: Option<String>,
}

/// Result of migrating one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRunResult {
    /// Version the document had before the run.
    pub from_version: SchemaVersion,
    /// Version the document has now.
    pub final_version: SchemaVersion,
    /// Migrations that were applied, in order.
    pub applied: Vec<MigrationInfo>,
    /// Notes recorded by the migrations.
    pub notes: Vec<String>,
}

impl MigrationRunResult {
    /// Returns true if any migration ran.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Context passed to migrations.
#[derive(Debug)]
pub struct MigrationContext {
    /// Version of the document before this migration.
    pub from_version: SchemaVersion,
    notes: Vec<String>,
}

impl MigrationContext {
    fn new(from_version: SchemaVersion) -> Self {
        Self {
            from_version,
            notes: Vec::new(),
        }
    }

    /// Records what the migration did.
    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// A single schema upgrade step.
pub trait Migration: Send + Sync {
    /// Version the document has after this migration runs.
    ///
    /// Versions must be unique and sequential starting from 1.
    fn version(&self) -> SchemaVersion;

    /// Returns the name of this migration.
    fn name(&self) -> &str;

    /// Returns an optional description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Rewrites the document in place.
    fn up(&self, doc: &mut Map<String, Value>, ctx: &mut MigrationContext) -> StoreResult<()>;
}

/// Runs registered migrations against snapshot documents.
pub struct MigrationManager {
    migrations: BTreeMap<SchemaVersion, Box<dyn Migration>>,
}

impl MigrationManager {
    /// Creates an empty migration manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// Creates a manager with the built-in migrations up to
    /// [`CURRENT_SCHEMA_VERSION`].
    #[must_use]
    pub fn with_builtins(config: &StoreConfig) -> Self {
        let mut migrations: BTreeMap<SchemaVersion, Box<dyn Migration>> = BTreeMap::new();
        migrations.insert(1, Box::new(NestCollectionsAndWrapSettings));
        migrations.insert(
            2,
            Box::new(DedupeNaturalKeys {
                config: config.clone(),
            }),
        );
        Self { migrations }
    }

    /// Registers a migration.
    ///
    /// Returns an error if a migration with the same version already exists.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> StoreResult<()> {
        let version = migration.version();
        if self.migrations.contains_key(&version) {
            return Err(StoreError::migration_failed(format!(
                "migration version {version} already registered"
            )));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Returns the registered migrations in version order.
    #[must_use]
    pub fn list(&self) -> Vec<MigrationInfo> {
        self.migrations.values().map(|m| info_of(m.as_ref())).collect()
    }

    /// Returns the migrations a document at `from` still needs.
    #[must_use]
    pub fn pending(&self, from: SchemaVersion) -> Vec<MigrationInfo> {
        self.migrations
            .range(from.saturating_add(1)..)
            .map(|(_, m)| info_of(m.as_ref()))
            .collect()
    }

    /// Highest registered version, or 0 with no migrations.
    #[must_use]
    pub fn latest_version(&self) -> SchemaVersion {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }

    /// Validates that migrations are sequential with no gaps.
    pub fn validate(&self) -> StoreResult<()> {
        for (i, version) in self.migrations.keys().enumerate() {
            let expected = i as SchemaVersion + 1;
            if *version != expected {
                return Err(StoreError::migration_failed(format!(
                    "migration version gap: expected {expected}, got {version}"
                )));
            }
        }
        Ok(())
    }

    /// Upgrades a snapshot document to the latest registered version.
    ///
    /// A document without `schemaVersion` is treated as version 0.
    ///
    /// # Errors
    ///
    /// Fails if the document is not an object, was written by a newer build,
    /// or a migration fails. The input is consumed either way; callers that
    /// need the original must keep a copy.
    pub fn run(&self, doc: Value) -> StoreResult<(Value, MigrationRunResult)> {
        let Value::Object(mut map) = doc else {
            return Err(StoreError::invalid_format("snapshot document is not an object"));
        };

        let from_version = read_version(&map)?;
        let supported = self.latest_version().max(CURRENT_SCHEMA_VERSION);
        if from_version > supported {
            return Err(StoreError::SchemaTooNew {
                found: from_version,
                supported,
            });
        }

        let mut current = from_version;
        let mut applied = Vec::new();
        let mut notes = Vec::new();

        for (version, migration) in self.migrations.range(from_version.saturating_add(1)..) {
            let mut ctx = MigrationContext::new(current);
            migration.up(&mut map, &mut ctx).map_err(|e| {
                StoreError::migration_failed(format!(
                    "{} (v{}): {}",
                    migration.name(),
                    version,
                    e
                ))
            })?;

            map.insert(SCHEMA_VERSION_FIELD.to_string(), Value::from(*version));
            info!(
                version = *version,
                name = migration.name(),
                "applied snapshot migration"
            );

            current = *version;
            applied.push(info_of(migration.as_ref()));
            notes.extend(ctx.notes);
        }

        Ok((
            Value::Object(map),
            MigrationRunResult {
                from_version,
                final_version: current,
                applied,
                notes,
            },
        ))
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager")
            .field("versions", &self.migrations.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn info_of(migration: &dyn Migration) -> MigrationInfo {
    MigrationInfo {
        version: migration.version(),
        name: migration.name().to_string(),
        description: migration.description().map(String::from),
    }
}

fn read_version(doc: &Map<String, Value>) -> StoreResult<SchemaVersion> {
    match doc.get(SCHEMA_VERSION_FIELD) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value
            .as_u64()
            .and_then(|v| SchemaVersion::try_from(v).ok())
            .ok_or_else(|| {
                StoreError::invalid_format(format!("invalid schemaVersion: {value}"))
            }),
    }
}

/// Version 1: moves top-level record arrays under `collections` and wraps
/// bare settings values into `{ "value": ... }` entries.
///
/// Unversioned exports kept each collection as a top-level array and stored
/// settings without timestamps. Wrapped settings stay unstamped, so any
/// stamped value wins against them in a settings merge.
struct NestCollectionsAndWrapSettings;

impl Migration for NestCollectionsAndWrapSettings {
    fn version(&self) -> SchemaVersion {
        1
    }

    fn name(&self) -> &str {
        "nest_collections_and_wrap_settings"
    }

    fn description(&self) -> Option<&str> {
        Some("move top-level arrays under collections and wrap bare settings")
    }

    fn up(&self, doc: &mut Map<String, Value>, ctx: &mut MigrationContext) -> StoreResult<()> {
        let names: Vec<String> = doc
            .iter()
            .filter(|(_, v)| v.is_array())
            .map(|(k, _)| k.clone())
            .collect();
        let loose: Vec<(String, Value)> = names
            .into_iter()
            .filter_map(|name| doc.remove(&name).map(|v| (name, v)))
            .collect();

        if !loose.is_empty() {
            let collections = doc
                .entry(COLLECTIONS_FIELD)
                .or_insert_with(|| Value::Object(Map::new()));
            let Value::Object(collections) = collections else {
                return Err(StoreError::invalid_format("collections is not an object"));
            };

            let moved: Vec<&str> = loose.iter().map(|(name, _)| name.as_str()).collect();
            ctx.note(format!("nested collections: {}", moved.join(", ")));

            for (name, records) in loose {
                match collections.get_mut(&name) {
                    // Both layouts present: keep everything, the dedupe step
                    // collapses overlaps.
                    Some(Value::Array(existing)) => {
                        if let Value::Array(extra) = records {
                            existing.extend(extra);
                        }
                    }
                    Some(_) => {
                        return Err(StoreError::invalid_format(format!(
                            "collection {name} is not an array"
                        )));
                    }
                    None => {
                        collections.insert(name, records);
                    }
                }
            }
        }

        match doc.get_mut(SETTINGS_FIELD) {
            None | Some(Value::Null) => {}
            Some(Value::Object(settings)) => {
                let mut wrapped = 0usize;
                for value in settings.values_mut() {
                    if !is_settings_entry(value) {
                        let bare = value.take();
                        let mut entry = Map::new();
                        entry.insert("value".to_string(), bare);
                        *value = Value::Object(entry);
                        wrapped += 1;
                    }
                }
                if wrapped > 0 {
                    ctx.note(format!("wrapped {wrapped} bare settings"));
                }
            }
            Some(_) => return Err(StoreError::invalid_format("settings is not an object")),
        }

        Ok(())
    }
}

fn is_settings_entry(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key("value") && map.keys().all(|k| k == "value" || k == "updatedAt")
        }
        _ => false,
    }
}

/// Version 2: collapses records that share a natural key.
///
/// Older builds could store the same student twice (for example once with
/// `"02205"` and once with `2205`). The collapse uses the same merge rules as
/// an import, so no non-empty field is lost.
struct DedupeNaturalKeys {
    config: StoreConfig,
}

impl Migration for DedupeNaturalKeys {
    fn version(&self) -> SchemaVersion {
        2
    }

    fn name(&self) -> &str {
        "dedupe_natural_keys"
    }

    fn description(&self) -> Option<&str> {
        Some("collapse records sharing a natural key")
    }

    fn up(&self, doc: &mut Map<String, Value>, ctx: &mut MigrationContext) -> StoreResult<()> {
        let Some(collections) = doc.get_mut(COLLECTIONS_FIELD) else {
            return Ok(());
        };
        let Value::Object(collections) = collections else {
            return Err(StoreError::invalid_format("collections is not an object"));
        };

        for (name, records) in collections.iter_mut() {
            let Value::Array(items) = records.take() else {
                return Err(StoreError::invalid_format(format!(
                    "collection {name} is not an array"
                )));
            };
            let batch = items
                .into_iter()
                .map(Record::from_value)
                .collect::<Result<Vec<_>, _>>()?;

            let merger = RecordMerger::new(self.config.policy_for(name));
            let outcome = merger.dedupe(batch);
            if outcome.report.collapsed_duplicates > 0 {
                ctx.note(format!(
                    "{name}: collapsed {} duplicate records",
                    outcome.report.collapsed_duplicates
                ));
            }

            *records = Value::Array(
                outcome
                    .records
                    .into_iter()
                    .map(|r| Value::Object(r.into_map()))
                    .collect(),
            );
        }
        Ok(())
    }
}
