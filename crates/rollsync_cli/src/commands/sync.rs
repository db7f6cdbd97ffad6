//! Sync and probe command implementations.

use super::{print_json, CliResult, Context, OutputFormat};
use chrono::{DateTime, Utc};
use rollsync_merge::MergeReport;
use rollsync_store::ImportReport;
use rollsync_sync::{BackupProbe, SyncOutcome, SyncTrigger};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Remote backup probe result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    /// Remote description.
    pub remote: String,
    /// Backup owner.
    pub owner: String,
    /// Whether a backup exists.
    pub exists: bool,
    /// Remote push time.
    pub last_modified: Option<DateTime<Utc>>,
    /// Local sync cursor.
    pub local_cursor: Option<DateTime<Utc>>,
    /// Records per collection at push time.
    pub record_counts: BTreeMap<String, u64>,
    /// Chunk documents, 0 when inline.
    pub total_chunks: u32,
    /// Whether the payload is encrypted.
    pub encrypted: bool,
    /// Why the backup was pushed.
    pub backup_reason: Option<String>,
}

impl ProbeResult {
    fn new(ctx: &Context, remote: String, probe: BackupProbe, cursor: Option<DateTime<Utc>>) -> Self {
        Self {
            remote,
            owner: ctx.owner.clone().unwrap_or_default(),
            exists: probe.exists,
            last_modified: probe.last_modified,
            local_cursor: cursor,
            record_counts: probe.record_counts,
            total_chunks: if probe.is_chunked { probe.total_chunks } else { 0 },
            encrypted: probe.encrypted,
            backup_reason: probe.backup_reason.map(|r| r.to_string()),
        }
    }
}

/// Runs one sync cycle.
pub async fn run(ctx: &Context, format: OutputFormat) -> CliResult<()> {
    let coordinator = ctx.coordinator(false)?;
    let outcome = coordinator.sync(SyncTrigger::Forced).await?;
    print_outcome(&outcome, format)
}

/// Shows what the remote holds.
pub async fn probe(ctx: &Context, format: OutputFormat) -> CliResult<()> {
    let coordinator = ctx.coordinator(false)?;
    let probe = coordinator.probe().await?;
    let result = ProbeResult::new(
        ctx,
        coordinator.transport().remote().describe(),
        probe,
        coordinator.store().cursor(),
    );

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_probe(&result),
    }
    Ok(())
}

fn print_probe(result: &ProbeResult) {
    println!("Remote: {}", result.remote);
    println!("Owner:  {}", result.owner);
    println!();
    if !result.exists {
        println!("No backup found");
        return;
    }
    println!("Backup:");
    println!("  Pushed at:  {}", fmt_time(result.last_modified));
    println!("  Reason:     {}", result.backup_reason.as_deref().unwrap_or("-"));
    println!("  Encrypted:  {}", if result.encrypted { "yes" } else { "NO" });
    if result.total_chunks > 0 {
        println!("  Chunks:     {}", result.total_chunks);
    } else {
        println!("  Chunks:     inline");
    }
    for (collection, count) in &result.record_counts {
        println!("  {collection}: {count} records");
    }
    println!();
    println!("Local cursor: {}", fmt_time(result.local_cursor));
}

/// Prints the outcome of a cycle.
pub(crate) fn print_outcome(outcome: &SyncOutcome, format: OutputFormat) -> CliResult<()> {
    if format == OutputFormat::Json {
        let value = match outcome {
            SyncOutcome::Pulled {
                report,
                remote_modified,
                pushed_back,
            } => json!({
                "outcome": "pulled",
                "remoteModified": remote_modified,
                "pushedBack": pushed_back,
                "report": report,
            }),
            SyncOutcome::Pushed {
                reason,
                chunks,
                encrypted,
            } => json!({
                "outcome": "pushed",
                "reason": reason,
                "chunks": chunks,
                "encrypted": encrypted,
            }),
            SyncOutcome::UpToDate => json!({"outcome": "up-to-date"}),
            SyncOutcome::Skipped => json!({"outcome": "skipped"}),
        };
        return print_json(&value);
    }

    match outcome {
        SyncOutcome::Pulled {
            report,
            remote_modified,
            pushed_back,
        } => {
            println!("✓ Pulled backup from {}", fmt_time(*remote_modified));
            print_report(report);
            if *pushed_back {
                println!("✓ Merged snapshot pushed back");
            } else if report.local_ahead {
                println!("  Local data not in the backup is pending the next sync");
            }
        }
        SyncOutcome::Pushed {
            reason,
            chunks,
            encrypted,
        } => {
            println!("✓ Backup pushed ({reason})");
            if *chunks > 0 {
                println!("  Chunks: {chunks}");
            }
            if !encrypted {
                println!("  WARNING: encryption failed, backup stored as plaintext");
            }
        }
        SyncOutcome::UpToDate => println!("✓ Already up to date"),
        SyncOutcome::Skipped => println!("Another sync is running, nothing done"),
    }
    Ok(())
}

fn print_report(report: &ImportReport) {
    if let Some(version) = report.migrated_from {
        println!("  Migrated from schema v{version}");
    }
    for (collection, merge) in &report.collections {
        println!("  {collection}: {}", merge_line(merge));
    }
    if report.collections.len() > 1 {
        println!("  total: {}", merge_line(&report.totals()));
    }
    let settings = &report.settings;
    println!(
        "  settings: {} added, {} replaced, {} kept, {} merged",
        settings.added, settings.took_incoming, settings.kept_local, settings.merged_objects
    );
    let anomalies = report.anomaly_count();
    if anomalies > 0 {
        println!("  {anomalies} merge anomalies, see the rollsync::audit log");
    }
    println!("  Store revision: {}", report.revision);
}

fn merge_line(merge: &MergeReport) -> String {
    format!(
        "{} inserted, {} updated, {} unchanged, {} duplicates collapsed",
        merge.inserted, merge.updated, merge.unchanged, merge.collapsed_duplicates
    )
}

pub(crate) fn fmt_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
}
