//! Migration command.

use super::{CliError, CliResult};
use rollsync_model::Value;
use rollsync_storage::{FileBackend, SnapshotBackend};
use rollsync_store::{MigrationManager, MigrationRunResult, SchemaVersion, StoreConfig};
use std::io;
use std::path::Path;
use tracing::info;

/// Upgrades a snapshot file in place.
///
/// With `dry_run`, lists the migrations that would run and leaves the file
/// untouched.
pub fn run(file: &Path, dry_run: bool) -> CliResult<()> {
    info!("Migrating snapshot file {:?}", file);

    let backend = FileBackend::open(file)?;
    let bytes = backend.load()?.ok_or_else(|| {
        CliError::io(file, io::Error::new(io::ErrorKind::NotFound, "no such file"))
    })?;
    let doc: Value = serde_json::from_slice(&bytes)?;

    let manager = MigrationManager::with_builtins(&StoreConfig::default());
    let (migrated, result) = manager.run(doc)?;

    print_result(&manager, &result, dry_run);

    if dry_run || !result.changed() {
        return Ok(());
    }

    backend.commit(&serde_json::to_vec_pretty(&migrated)?)?;
    println!("✓ Snapshot upgraded to schema v{}", result.final_version);
    Ok(())
}

fn print_result(manager: &MigrationManager, result: &MigrationRunResult, dry_run: bool) {
    println!("Snapshot Migration");
    println!("==================");
    println!("  File version:   v{}", result.from_version);
    println!("  Latest version: v{}", manager.latest_version());
    println!();
    println!("Migrations:");
    for line in migration_lines(manager, result.from_version, dry_run) {
        println!("  {line}");
    }

    if !result.changed() {
        println!();
        println!("  Already up to date.");
        return;
    }

    println!();
    for note in &result.notes {
        println!("  - {note}");
    }
    if dry_run {
        println!();
        println!("Dry run - no changes written");
    }
}

/// One line per registered migration, with its status for a file at `from`.
fn migration_lines(manager: &MigrationManager, from: SchemaVersion, dry_run: bool) -> Vec<String> {
    let pending: Vec<SchemaVersion> = manager.pending(from).iter().map(|m| m.version).collect();
    manager
        .list()
        .into_iter()
        .map(|m| {
            let status = match (pending.contains(&m.version), dry_run) {
                (false, _) => "done",
                (true, true) => "pending",
                (true, false) => "applied",
            };
            match m.description {
                Some(desc) => format!("v{} [{status}] {}: {desc}", m.version, m.name),
                None => format!("v{} [{status}] {}", m.version, m.name),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn legacy_file_is_rewritten() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("export.json");
        let legacy = json!({"settings": {"lang": "mr"}, "students": [{"grNo": "1"}]});
        std::fs::write(&file, serde_json::to_vec(&legacy).unwrap()).unwrap();

        run(&file, false).unwrap();

        let upgraded: Value = serde_json::from_slice(&std::fs::read(&file).unwrap()).unwrap();
        assert_eq!(upgraded["schemaVersion"], 2);
        assert_eq!(upgraded["settings"]["lang"]["value"], "mr");
        assert!(upgraded["collections"]["students"].is_array());
    }

    #[test]
    fn dry_run_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("export.json");
        let original = serde_json::to_vec(&json!({"settings": {"lang": "mr"}})).unwrap();
        std::fs::write(&file, &original).unwrap();

        run(&file, true).unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), original);
    }

    #[test]
    fn lines_mark_each_registered_migration() {
        let manager = MigrationManager::with_builtins(&StoreConfig::default());

        let lines = migration_lines(&manager, 0, true);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("v1 [pending] nest_collections_and_wrap_settings"));
        assert!(lines[1].starts_with("v2 [pending] dedupe_natural_keys"));

        let lines = migration_lines(&manager, 1, false);
        assert!(lines[0].starts_with("v1 [done]"));
        assert!(lines[1].starts_with("v2 [applied]"));

        assert!(migration_lines(&manager, 2, true)
            .iter()
            .all(|l| l.contains("[done]")));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(run(&dir.path().join("absent.json"), true).is_err());
    }
}
