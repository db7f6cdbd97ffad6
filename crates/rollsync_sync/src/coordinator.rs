//! Sync coordinator state machine.
//!
//! One cycle:
//!
//! ```text
//! Idle ─► Checking ─┬─► Pulling ─► Idle     remote newer than the cursor
//!                   │      └─► Pushing ─► Idle  merge kept data the remote lacks
//!                   ├─► Pushing ─► Idle     local newer, or no backup yet
//!                   └─► Idle                nothing changed
//!          any active state ─► Error ─► Idle (next cycle or take_error)
//! ```
//!
//! Conflict resolution between devices is last-write-wins by wall clock at the
//! snapshot level; record-level loss is avoided by merging on pull and always
//! pushing the full local snapshot. A pull whose merge kept local data the
//! backup lacks pushes the merged snapshot in the same cycle.

use crate::chunked::ChunkedTransport;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult, TransportError};
use crate::metadata::{BackupMetadata, BackupProbe, BackupReason};
use crate::remote::RemoteDocumentStore;
use crate::sealer::EnvelopeSealer;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rollsync_model::{Clock, ModelError, SystemClock, Value};
use rollsync_store::{ImportReport, LocalStore};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// The current state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Probing the remote backup.
    Checking,
    /// Downloading and merging the remote backup.
    Pulling,
    /// Uploading the local snapshot.
    Pushing,
    /// The last cycle failed; see [`SyncCoordinator::take_error`].
    Error,
}

impl SyncState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Checking | Self::Pulling | Self::Pushing)
    }

    /// Returns true if a new cycle may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Debounced local change.
    DataChanged,
    /// Periodic timer.
    Periodic,
    /// User request.
    Forced,
    /// Safety backup before an application update.
    PreUpdate,
}

impl SyncTrigger {
    /// Reason recorded when this trigger pushes.
    pub fn reason(&self) -> BackupReason {
        match self {
            Self::DataChanged => BackupReason::DataChanged,
            Self::Periodic => BackupReason::Periodic,
            Self::Forced => BackupReason::Forced,
            Self::PreUpdate => BackupReason::PreUpdateSafety,
        }
    }

    /// Whether a cycle with nothing to push may end without writing.
    fn may_skip_push(&self) -> bool {
        matches!(self, Self::DataChanged)
    }
}

/// Direction chosen by [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// No remote backup exists; push with reason `first-backup`.
    FirstBackup,
    /// The remote is newer than the last sync.
    Pull,
    /// The local side is at least as new.
    Push,
}

/// Last-write-wins decision between the sync cursor and the remote backup.
///
/// A remote backup without a timestamp is pulled unless the local side has
/// synced before.
pub fn decide(local: Option<DateTime<Utc>>, probe: &BackupProbe) -> SyncDirection {
    if !probe.exists {
        return SyncDirection::FirstBackup;
    }
    match (probe.last_modified, local) {
        (Some(remote), Some(local)) if remote > local => SyncDirection::Pull,
        (Some(_), Some(_)) => SyncDirection::Push,
        (Some(_), None) | (None, None) => SyncDirection::Pull,
        (None, Some(_)) => SyncDirection::Push,
    }
}

/// Result of one [`SyncCoordinator::sync`] call.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// The remote backup was merged into the local store.
    Pulled {
        /// Merge report.
        report: ImportReport,
        /// Push time of the pulled backup.
        remote_modified: Option<DateTime<Utc>>,
        /// Whether local data the backup lacked was pushed in the same cycle.
        pushed_back: bool,
    },
    /// The local snapshot was pushed.
    Pushed {
        /// Recorded reason.
        reason: BackupReason,
        /// Chunk documents written (0 when inline).
        chunks: u32,
        /// False if the plaintext fallback was used.
        encrypted: bool,
    },
    /// Nothing to do.
    UpToDate,
    /// Another cycle was in flight; this trigger was dropped.
    Skipped,
}

/// Statistics about sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles started.
    pub cycles: u64,
    /// Successful pulls.
    pub pulls: u64,
    /// Successful pushes.
    pub pushes: u64,
    /// Triggers dropped because a cycle was in flight.
    pub skipped: u64,
    /// Cycles that found nothing to do.
    pub up_to_date: u64,
    /// Failed cycles.
    pub failures: u64,
    /// Retried remote calls.
    pub retries: u64,
    /// Completion time of the last successful cycle.
    pub last_sync: Option<DateTime<Utc>>,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum CycleMode {
    Auto(SyncTrigger),
    Restore,
    Backup(BackupReason),
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Coordinates the local store, the codec and the remote backup.
///
/// At most one cycle runs at a time; triggers arriving mid-cycle return
/// [`SyncOutcome::Skipped`].
pub struct SyncCoordinator {
    config: SyncConfig,
    store: Arc<LocalStore>,
    transport: ChunkedTransport,
    sealer: Arc<dyn EnvelopeSealer>,
    clock: Arc<dyn Clock>,
    state: RwLock<SyncState>,
    in_flight: AtomicBool,
    stats: RwLock<SyncStats>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("owner_id", &self.config.owner_id)
            .field("transport", &self.transport)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Creates a coordinator using the system clock.
    pub fn new(
        config: SyncConfig,
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteDocumentStore>,
        sealer: Arc<dyn EnvelopeSealer>,
    ) -> Self {
        let transport = ChunkedTransport::from_config(remote, &config);
        Self {
            config,
            store,
            transport,
            sealer,
            clock: Arc::new(SystemClock),
            state: RwLock::new(SyncState::Idle),
            in_flight: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Replaces the clock used for cursors and metadata timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Returns the transport.
    pub fn transport(&self) -> &ChunkedTransport {
        &self.transport
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Returns a copy of the statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a cycle is running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Returns the last failure and moves `Error` back to `Idle`.
    pub fn take_error(&self) -> Option<String> {
        let mut state = self.state.write();
        if *state != SyncState::Error {
            return None;
        }
        *state = SyncState::Idle;
        self.stats.read().last_error.clone()
    }

    /// Commits pending local changes without touching the network.
    pub fn flush_local(&self) -> SyncResult<bool> {
        Ok(self.store.flush()?)
    }

    /// Reads the remote backup metadata.
    pub async fn probe(&self) -> SyncResult<BackupProbe> {
        let key = self.config.owner_id.as_str();
        self.with_retry("probe", || self.transport.exists(key))
            .await
    }

    /// Runs one cycle in the direction [`decide`] picks.
    pub async fn sync(&self, trigger: SyncTrigger) -> SyncResult<SyncOutcome> {
        self.guarded(CycleMode::Auto(trigger)).await
    }

    /// Pulls the remote backup regardless of timestamps.
    ///
    /// # Errors
    ///
    /// [`SyncError::NoBackup`] if nothing was ever pushed.
    pub async fn restore(&self) -> SyncResult<SyncOutcome> {
        self.guarded(CycleMode::Restore).await
    }

    /// Pushes the local snapshot regardless of timestamps.
    pub async fn backup(&self, trigger: SyncTrigger) -> SyncResult<SyncOutcome> {
        self.guarded(CycleMode::Backup(trigger.reason())).await
    }

    async fn guarded(&self, mode: CycleMode) -> SyncResult<SyncOutcome> {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            self.stats.write().skipped += 1;
            info!(?mode, "sync already in flight, trigger dropped");
            return Ok(SyncOutcome::Skipped);
        };

        let span = info_span!("sync_cycle", owner = %self.config.owner_id, ?mode);
        self.run_cycle(mode).instrument(span).await
    }

    async fn run_cycle(&self, mode: CycleMode) -> SyncResult<SyncOutcome> {
        self.stats.write().cycles += 1;
        self.set_state(SyncState::Checking);

        match self.cycle(mode).await {
            Ok(outcome) => {
                self.set_state(SyncState::Idle);
                let mut stats = self.stats.write();
                match &outcome {
                    SyncOutcome::Pulled { pushed_back, .. } => {
                        stats.pulls += 1;
                        if *pushed_back {
                            stats.pushes += 1;
                        }
                    }
                    SyncOutcome::Pushed { .. } => stats.pushes += 1,
                    SyncOutcome::UpToDate => stats.up_to_date += 1,
                    SyncOutcome::Skipped => {}
                }
                stats.last_sync = Some(self.clock.now());
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, retryable = e.is_retryable(), "sync cycle failed");
                {
                    let mut stats = self.stats.write();
                    stats.failures += 1;
                    stats.last_error = Some(e.to_string());
                }
                self.set_state(SyncState::Error);
                Err(e)
            }
        }
    }

    async fn cycle(&self, mode: CycleMode) -> SyncResult<SyncOutcome> {
        let key = self.config.owner_id.as_str();
        let probe = self
            .with_retry("probe", || self.transport.exists(key))
            .await?;
        let cursor = self.store.cursor();

        match mode {
            CycleMode::Restore => {
                if !probe.exists {
                    return Err(SyncError::NoBackup {
                        key: key.to_string(),
                    });
                }
                self.pull(&probe, None).await
            }
            CycleMode::Backup(reason) => self.push(reason).await,
            CycleMode::Auto(trigger) => {
                let direction = decide(cursor, &probe);
                debug!(
                    ?direction,
                    ?cursor,
                    remote = ?probe.last_modified,
                    "sync direction decided"
                );
                match direction {
                    SyncDirection::FirstBackup => self.push(BackupReason::FirstBackup).await,
                    SyncDirection::Pull => self.pull(&probe, Some(trigger.reason())).await,
                    SyncDirection::Push
                        if trigger.may_skip_push() && !self.store.has_unsynced_changes() =>
                    {
                        debug!("no local changes since last sync");
                        Ok(SyncOutcome::UpToDate)
                    }
                    SyncDirection::Push => self.push(trigger.reason()).await,
                }
            }
        }
    }

    /// Merges the remote backup into the local store.
    ///
    /// If the merged store holds data the backup lacks, it is pushed right
    /// away with `push_back`, or left marked unsynced when that is `None` or
    /// the push fails.
    async fn pull(
        &self,
        probe: &BackupProbe,
        push_back: Option<BackupReason>,
    ) -> SyncResult<SyncOutcome> {
        self.set_state(SyncState::Pulling);
        let key = self.config.owner_id.as_str();

        let envelope = self
            .with_retry("load", || self.transport.load(key))
            .await?
            .ok_or_else(|| SyncError::NoBackup {
                key: key.to_string(),
            })?;

        let sealer = Arc::clone(&self.sealer);
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let report = tokio::task::spawn_blocking(move || -> SyncResult<ImportReport> {
            let plaintext = sealer.open(&envelope)?;
            let doc: Value = serde_json::from_slice(&plaintext).map_err(ModelError::from)?;
            let report = store.import_document(doc)?;
            store.set_cursor(clock.now())?;
            Ok(report)
        })
        .await??;

        info!(
            revision = report.revision,
            inserted = report.inserted(),
            anomalies = report.anomaly_count(),
            local_ahead = report.local_ahead,
            "pulled remote backup"
        );

        let mut pushed_back = false;
        if report.local_ahead {
            match push_back {
                Some(reason) => {
                    if let Err(e) = self.push(reason).await {
                        self.keep_unsynced();
                        return Err(e);
                    }
                    pushed_back = true;
                }
                None => self.keep_unsynced(),
            }
        }

        Ok(SyncOutcome::Pulled {
            report,
            remote_modified: probe.last_modified,
            pushed_back,
        })
    }

    /// Keeps local data the remote lacks pending for the next cycle.
    fn keep_unsynced(&self) {
        if let Err(e) = self.store.mark_unsynced() {
            warn!(error = %e, "could not mark local changes as unsynced");
        }
    }

    async fn push(&self, reason: BackupReason) -> SyncResult<SyncOutcome> {
        self.set_state(SyncState::Pushing);
        let key = self.config.owner_id.as_str();
        let now = self.clock.now();

        let sealer = Arc::clone(&self.sealer);
        let store = Arc::clone(&self.store);
        let allow_fallback = self.config.allow_plaintext_fallback;
        let (envelope, counts) = tokio::task::spawn_blocking(move || -> SyncResult<_> {
            store.flush()?;
            let snapshot = store.export_all();
            let bytes = snapshot.to_json_bytes()?;
            let envelope = match sealer.seal(&bytes, now) {
                Ok(envelope) => envelope,
                Err(e) if allow_fallback => {
                    error!(
                        target: "rollsync::audit",
                        error = %e,
                        "sealing failed, pushing unencrypted fallback"
                    );
                    sealer.fallback(&bytes, now)
                }
                Err(e) => return Err(e.into()),
            };
            Ok((envelope, snapshot.record_counts()))
        })
        .await??;

        let meta = BackupMetadata::new(key, now)
            .with_reason(reason)
            .with_record_counts(counts, &self.config.student_collection);
        let written = self
            .with_retry("store", || self.transport.store(key, &envelope, &meta))
            .await?;

        self.store.set_cursor(now)?;

        info!(
            %reason,
            chunks = written.total_chunks,
            bytes = written.size_hint,
            encrypted = written.encrypted,
            "pushed local snapshot"
        );
        Ok(SyncOutcome::Pushed {
            reason,
            chunks: written.total_chunks,
            encrypted: written.encrypted,
        })
    }

    /// Runs a remote call, retrying retryable failures with backoff.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    if attempt >= retry.max_attempts {
                        return Err(SyncError::RetriesExhausted {
                            attempts: attempt,
                            last: e,
                        });
                    }
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(op, attempt, ?delay, error = %e, "remote call failed, retrying");
                    self.stats.write().retries += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }
}
