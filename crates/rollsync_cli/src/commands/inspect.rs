//! Inspect command implementation.

use super::sync::fmt_time;
use super::{format_size, print_json, CliResult, Context, OutputFormat};
use chrono::{DateTime, Utc};
use rollsync_store::LocalStore;
use serde::Serialize;
use std::path::Path;

/// Local store inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    /// Store file path.
    pub path: String,
    /// Store file size in bytes.
    pub file_size: u64,
    /// Snapshot schema version.
    pub schema_version: u32,
    /// Commit counter.
    pub revision: u64,
    /// Last local change.
    pub modified_at: Option<DateTime<Utc>>,
    /// Last successful sync.
    pub last_sync: Option<DateTime<Utc>>,
    /// Whether local changes have not been pushed yet.
    pub unsynced_changes: bool,
    /// Number of records across collections.
    pub total_records: u64,
    /// Per-collection statistics (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<CollectionStats>>,
}

/// Statistics for a single collection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Number of records.
    pub record_count: u64,
}

/// Runs the inspect command.
pub fn run(ctx: &Context, show_collections: bool, format: OutputFormat) -> CliResult<()> {
    let store = ctx.open_store()?;
    let path = ctx.store.as_deref().unwrap_or_else(|| Path::new(""));
    let result = inspect(&store, path, show_collections);

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

fn inspect(store: &LocalStore, path: &Path, show_collections: bool) -> InspectResult {
    let counts = store.record_counts();
    let collections = show_collections.then(|| {
        counts
            .iter()
            .map(|(name, count)| CollectionStats {
                name: name.clone(),
                record_count: *count,
            })
            .collect()
    });

    InspectResult {
        path: path.display().to_string(),
        file_size: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        schema_version: store.schema_version(),
        revision: store.revision(),
        modified_at: store.modified_at(),
        last_sync: store.cursor(),
        unsynced_changes: store.has_unsynced_changes(),
        total_records: counts.values().sum(),
        collections,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("rollsync Store Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {}", format_size(result.file_size));
    println!();
    println!("State:");
    println!("  Schema version: v{}", result.schema_version);
    println!("  Revision:       {}", result.revision);
    println!("  Modified at:    {}", fmt_time(result.modified_at));
    println!("  Last sync:      {}", fmt_time(result.last_sync));
    println!(
        "  Unsynced:       {}",
        if result.unsynced_changes { "yes" } else { "no" }
    );
    println!();
    println!("Records: {}", result.total_records);

    if let Some(collections) = &result.collections {
        println!();
        println!("Collections:");
        for col in collections {
            println!("  {}: {} records", col.name, col.record_count);
        }
    }
}
