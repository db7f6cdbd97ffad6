//! Background trigger loop.

use crate::config::SchedulerConfig;
use crate::coordinator::{SyncCoordinator, SyncOutcome, SyncTrigger};
use crate::error::SyncResult;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug)]
enum Command {
    DataChanged,
    Shutdown,
}

/// Drives a [`SyncCoordinator`] from a tokio task.
///
/// - [`notify_data_changed`](Self::notify_data_changed) (re)arms a debounce
///   timer; the cycle fires after a quiet period.
/// - A periodic timer runs a full cycle every `periodic_interval`.
/// - [`force_sync`](Self::force_sync) runs a cycle immediately, still subject
///   to the single-flight guard.
#[derive(Debug)]
pub struct SyncScheduler {
    coordinator: Arc<SyncCoordinator>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawns the trigger loop on the current runtime.
    pub fn spawn(coordinator: Arc<SyncCoordinator>, config: SchedulerConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_loop(Arc::clone(&coordinator), config, rx));
        Self {
            coordinator,
            commands,
            task,
        }
    }

    /// Records a local change. The sync fires once no further change has
    /// arrived for the debounce period.
    pub fn notify_data_changed(&self) {
        if self.commands.send(Command::DataChanged).is_err() {
            debug!("scheduler stopped, data change ignored");
        }
    }

    /// Runs a forced cycle now, bypassing the debounce timer.
    pub async fn force_sync(&self) -> SyncResult<SyncOutcome> {
        self.coordinator.sync(SyncTrigger::Forced).await
    }

    /// Best-effort local flush for app suspension. Never touches the network
    /// and never fails.
    pub fn suspend(&self) {
        match self.coordinator.flush_local() {
            Ok(written) => debug!(written, "local store flushed on suspend"),
            Err(e) => warn!(error = %e, "flush on suspend failed"),
        }
    }

    /// Returns the coordinator.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Stops triggering new cycles and waits for the loop to exit.
    ///
    /// A cycle already running completes first.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
    }
}

async fn run_loop(
    coordinator: Arc<SyncCoordinator>,
    config: SchedulerConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut periodic = time::interval_at(
        Instant::now() + config.periodic_interval,
        config.periodic_interval,
    );
    periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut debounce: Option<Instant> = None;

    info!(
        debounce = ?config.debounce,
        periodic = ?config.periodic_interval,
        "sync scheduler started"
    );

    loop {
        let deadline = debounce;
        tokio::select! {
            () = async {
                match deadline {
                    Some(at) => time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                debounce = None;
                run(&coordinator, SyncTrigger::DataChanged).await;
            }
            _ = periodic.tick() => {
                run(&coordinator, SyncTrigger::Periodic).await;
            }
            command = commands.recv() => match command {
                Some(Command::DataChanged) => {
                    debounce = Some(Instant::now() + config.debounce);
                }
                Some(Command::Shutdown) | None => break,
            },
        }
    }

    info!("sync scheduler stopped");
}

async fn run(coordinator: &SyncCoordinator, trigger: SyncTrigger) {
    match coordinator.sync(trigger).await {
        Ok(outcome) => debug!(?trigger, ?outcome, "scheduled sync finished"),
        Err(e) => warn!(?trigger, error = %e, "scheduled sync failed"),
    }
}
