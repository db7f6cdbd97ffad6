//! Backup and restore command implementations.

use super::sync::print_outcome;
use super::{CliResult, Context, OutputFormat};
use rollsync_sync::SyncTrigger;
use tracing::info;

/// Pushes the local snapshot, whatever the remote holds.
pub async fn create(
    ctx: &Context,
    pre_update: bool,
    allow_plaintext: bool,
    format: OutputFormat,
) -> CliResult<()> {
    let coordinator = ctx.coordinator(allow_plaintext)?;
    let trigger = if pre_update {
        SyncTrigger::PreUpdate
    } else {
        SyncTrigger::Forced
    };

    info!(
        owner = %coordinator.config().owner_id,
        remote = %coordinator.transport().remote().describe(),
        "creating backup"
    );
    let outcome = coordinator.backup(trigger).await?;
    print_outcome(&outcome, format)
}

/// Merges the remote backup into the local store.
///
/// Fails with "no backup" if the owner never pushed.
pub async fn restore(ctx: &Context, format: OutputFormat) -> CliResult<()> {
    let coordinator = ctx.coordinator(false)?;
    info!(owner = %coordinator.config().owner_id, "restoring backup");
    let outcome = coordinator.restore().await?;
    print_outcome(&outcome, format)
}
