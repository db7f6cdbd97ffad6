//! Import command implementation.

use super::sync::print_outcome;
use super::{CliError, CliResult, Context, OutputFormat};
use rollsync_model::Value;
use rollsync_store::{ImportReport, LocalStore};
use rollsync_sync::SyncOutcome;
use std::path::Path;

/// Merges a snapshot file into the local store and flushes it.
pub fn run(ctx: &Context, file: &Path, format: OutputFormat) -> CliResult<()> {
    let store = ctx.open_store()?;
    let report = import_file(&store, file)?;
    let outcome = SyncOutcome::Pulled {
        report,
        remote_modified: None,
        pushed_back: false,
    };
    print_outcome(&outcome, format)
}

pub(crate) fn import_file(store: &LocalStore, file: &Path) -> CliResult<ImportReport> {
    let bytes = std::fs::read(file).map_err(|e| CliError::io(file, e))?;
    let doc: Value = serde_json::from_slice(&bytes)?;
    let report = store.import_document(doc)?;
    store.flush()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollsync_store::StoreConfig;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn legacy_file_merges_into_store() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("legacy.json");
        let legacy = json!({
            "settings": {"schoolName": "Green Valley"},
            "students": [
                {"grNo": "2205", "name": "Asha"},
                {"grNo": "02205", "phone": "98200"}
            ]
        });
        std::fs::write(&file, serde_json::to_vec(&legacy).unwrap()).unwrap();

        let store_path = dir.path().join("local.json");
        let store = LocalStore::open_path(&store_path, StoreConfig::default()).unwrap();
        let report = import_file(&store, &file).unwrap();

        assert_eq!(report.migrated_from, Some(0));
        let students = store.records("students");
        assert_eq!(students.len(), 1);
        assert!(!store.is_dirty());
        assert!(store.setting("schoolName").is_some());
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open_path(&dir.path().join("s.json"), StoreConfig::default())
            .unwrap();
        let err = import_file(&store, &dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("nope.json"));
    }
}
