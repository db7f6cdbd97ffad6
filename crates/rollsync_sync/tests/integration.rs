//! Integration tests for the sync coordinator, chunked transport and remote
//! stores.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rollsync_crypto::{CryptoError, CryptoResult, Envelope, UserSecret};
use rollsync_model::{ManualClock, Record};
use rollsync_sync::{
    BackupMetadata, BackupReason, ChunkConfig, ChunkedTransport, DirectoryDocumentStore,
    EnvelopeSealer, Fields, MemoryDocumentStore, RemoteDocument, RemoteDocumentStore,
    RetryConfig, SecretSealer, SyncConfig, SyncError, SyncOutcome, SyncState, SyncTrigger,
    TransportError,
};
use rollsync_testkit::{fixed_time, student, test_codec, test_sealer, FlakyRemote, TestDevice};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const OWNER: &str = "owner-1";

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(fixed_time()))
}

fn tick(clock: &ManualClock) {
    clock.advance(ChronoDuration::minutes(1));
}

fn fast_retry() -> RetryConfig {
    RetryConfig::new(3)
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter(false)
}

fn small_chunks() -> ChunkConfig {
    ChunkConfig::new()
        .with_document_limit(4096)
        .with_chunk_size(1000)
        .with_max_chunks(64)
}

fn small_remote() -> Arc<MemoryDocumentStore> {
    Arc::new(MemoryDocumentStore::new().with_document_limit(Some(4096)))
}

/// Hex text that deflate cannot shrink much below half.
fn noise(seed: u64, len: usize) -> String {
    let mut x = seed;
    (0..len)
        .map(|_| {
            x = x
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            char::from_digit(((x >> 60) & 0xf) as u32, 16).unwrap()
        })
        .collect()
}

fn fill_noisy_students(device: &TestDevice, count: u32) {
    for i in 0..count {
        let record = student(&(100 + i).to_string(), &format!("Student {i}"))
            .with("notes", noise(u64::from(i) + 1, 2000));
        device.store.put_record("students", record).unwrap();
    }
}

// ============================================================================
// Two devices
// ============================================================================

#[tokio::test]
async fn first_backup_then_pull_then_push() {
    let remote = Arc::new(MemoryDocumentStore::new());
    let clock = clock();
    let laptop = TestDevice::new(OWNER, remote.clone(), clock.clone());
    let phone = TestDevice::new(OWNER, remote.clone(), clock.clone());

    laptop
        .store
        .put_record("students", student("101", "Asha"))
        .unwrap();
    let outcome = laptop.coordinator.sync(SyncTrigger::DataChanged).await.unwrap();
    assert!(matches!(
        outcome,
        SyncOutcome::Pushed {
            reason: BackupReason::FirstBackup,
            encrypted: true,
            ..
        }
    ));
    assert_eq!(laptop.store.cursor(), Some(fixed_time()));

    let meta = BackupMetadata::from_fields(&remote.peek("backups", OWNER).unwrap()).unwrap();
    assert_eq!(meta.owner_id, OWNER);
    assert_eq!(meta.student_count, 1);
    assert_eq!(meta.last_modified, Some(fixed_time()));

    // The phone has never synced: pull.
    tick(&clock);
    let outcome = phone.coordinator.sync(SyncTrigger::Periodic).await.unwrap();
    match outcome {
        SyncOutcome::Pulled {
            report,
            remote_modified,
            ..
        } => {
            assert_eq!(report.inserted(), 1);
            assert_eq!(remote_modified, Some(fixed_time()));
        }
        other => panic!("expected pull, got {other:?}"),
    }
    assert!(phone.store.get_record("students", "101").is_some());

    // A change on the phone is pushed.
    tick(&clock);
    phone
        .store
        .put_record("students", student("102", "Ravi"))
        .unwrap();
    let outcome = phone.coordinator.sync(SyncTrigger::DataChanged).await.unwrap();
    assert!(matches!(
        outcome,
        SyncOutcome::Pushed {
            reason: BackupReason::DataChanged,
            ..
        }
    ));

    // The laptop sees a newer backup and pulls it.
    tick(&clock);
    let outcome = laptop.coordinator.sync(SyncTrigger::Periodic).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Pulled { .. }));
    assert_eq!(laptop.store.records("students").len(), 2);

    // Nothing changed since: a data-change trigger ends in Idle.
    tick(&clock);
    let outcome = laptop.coordinator.sync(SyncTrigger::DataChanged).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::UpToDate));
    assert_eq!(laptop.coordinator.state(), SyncState::Idle);

    // The cursor survives a restart.
    let reopened = laptop.reopen();
    assert!(reopened.cursor().is_some());
    assert_eq!(reopened.records("students").len(), 2);
}

#[tokio::test]
async fn pull_merges_records_by_natural_key() {
    let remote = Arc::new(MemoryDocumentStore::new());
    let clock = clock();
    let office = TestDevice::new(OWNER, remote.clone(), clock.clone());
    let home = TestDevice::new(OWNER, remote.clone(), clock.clone());

    office
        .store
        .put_record(
            "students",
            student("2205", "Asha")
                .with("aadharNo", "1234 5678 9012")
                .with("class", "5A"),
        )
        .unwrap();
    office.coordinator.sync(SyncTrigger::Forced).await.unwrap();

    tick(&clock);
    home.store
        .put_record(
            "students",
            student("02205", "Asha").with("phone", "9876543210"),
        )
        .unwrap();
    let outcome = home.coordinator.sync(SyncTrigger::DataChanged).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Pulled { .. }));

    let records = home.store.records("students");
    assert_eq!(records.len(), 1);
    let merged = home.store.get_record("students", "2205").unwrap();
    assert_eq!(merged.get("grNo"), Some(&json!("02205")));
    assert_eq!(merged.get("phone"), Some(&json!("9876543210")));
    assert_eq!(merged.get("aadharNo"), Some(&json!("1234 5678 9012")));
    assert_eq!(merged.get("class"), Some(&json!("5A")));
}

#[tokio::test]
async fn edits_made_before_a_pull_reach_the_remote() {
    let remote = Arc::new(MemoryDocumentStore::new());
    let clock = clock();
    let a = TestDevice::new(OWNER, remote.clone(), clock.clone());
    let b = TestDevice::new(OWNER, remote.clone(), clock.clone());

    a.store.put_record("students", student("1", "Asha")).unwrap();
    a.coordinator.sync(SyncTrigger::Forced).await.unwrap();
    tick(&clock);
    b.coordinator.sync(SyncTrigger::Periodic).await.unwrap();

    // B edits offline while A keeps pushing.
    tick(&clock);
    b.store.put_record("students", student("2", "Ravi")).unwrap();
    b.store
        .put_record("students", student("1", "Asha Patil"))
        .unwrap();
    tick(&clock);
    a.store.put_record("students", student("3", "Meera")).unwrap();
    let outcome = a.coordinator.sync(SyncTrigger::DataChanged).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Pushed { .. }));

    // B's next cycle pulls A's backup and pushes the merge back.
    tick(&clock);
    let outcome = b.coordinator.sync(SyncTrigger::DataChanged).await.unwrap();
    match outcome {
        SyncOutcome::Pulled {
            report,
            pushed_back,
            ..
        } => {
            assert!(report.local_ahead);
            assert!(pushed_back);
        }
        other => panic!("expected pull, got {other:?}"),
    }
    assert!(!b.store.has_unsynced_changes());
    assert_eq!(b.coordinator.stats().pushes, 1);

    let meta = BackupMetadata::from_fields(&remote.peek("backups", OWNER).unwrap()).unwrap();
    assert_eq!(meta.student_count, 3);
    assert_eq!(meta.backup_reason, BackupReason::DataChanged);

    // Nothing left to send.
    tick(&clock);
    let outcome = b.coordinator.sync(SyncTrigger::DataChanged).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::UpToDate));

    // A new device sees both of B's edits.
    let c = TestDevice::new(OWNER, remote.clone(), clock.clone());
    c.coordinator.restore().await.unwrap();
    assert_eq!(c.store.records("students").len(), 3);
    assert_eq!(
        c.store.get_record("students", "1").unwrap().get("name"),
        Some(&json!("Asha Patil"))
    );

    // A picks up the new student without pushing anything back.
    let outcome = a.coordinator.sync(SyncTrigger::Periodic).await.unwrap();
    assert!(matches!(
        outcome,
        SyncOutcome::Pulled {
            pushed_back: false,
            ..
        }
    ));
    assert!(a.store.get_record("students", "2").is_some());
}

#[tokio::test]
async fn settings_merge_on_pull() {
    let remote = Arc::new(MemoryDocumentStore::new());
    let clock = clock();
    let a = TestDevice::new(OWNER, remote.clone(), clock.clone());
    let b = TestDevice::new(OWNER, remote.clone(), clock.clone());

    b.store.set_setting("schoolName", json!("Old Name")).unwrap();
    tick(&clock);
    a.store.set_setting("schoolName", json!("Green Valley")).unwrap();
    a.store.set_setting("receipt", json!({"prefix": "GV"})).unwrap();
    a.coordinator.sync(SyncTrigger::Forced).await.unwrap();

    tick(&clock);
    b.coordinator.sync(SyncTrigger::Periodic).await.unwrap();
    assert_eq!(
        b.store.setting("schoolName").unwrap().value,
        json!("Green Valley")
    );
    assert_eq!(b.store.setting("receipt").unwrap().value, json!({"prefix": "GV"}));
}

// ============================================================================
// Chunking
// ============================================================================

#[tokio::test]
async fn five_megabytes_become_six_chunks_in_any_order() {
    let memory = Arc::new(MemoryDocumentStore::new());
    let flaky = Arc::new(FlakyRemote::new(memory.clone()));
    flaky.reverse_listings(true);

    let transport = ChunkedTransport::new(
        flaky,
        "backups",
        ChunkConfig::default(),
        Duration::from_secs(30),
    );
    let payload: Vec<u8> = (0..5 * 1024 * 1024)
        .map(|i: usize| b'a' + (i % 26) as u8)
        .collect();
    let envelope = Envelope::Legacy(payload);
    let meta = BackupMetadata::new(OWNER, fixed_time());

    let written = transport.store(OWNER, &envelope, &meta).await.unwrap();
    assert!(written.is_chunked);
    assert_eq!(written.total_chunks, 6);
    assert_eq!(memory.document_count("backups/owner-1/chunks"), 6);

    let loaded = transport.load(OWNER).await.unwrap().unwrap();
    assert_eq!(loaded, envelope);
}

#[tokio::test]
async fn chunked_backup_round_trips_between_devices() {
    let remote = small_remote();
    let clock = clock();
    let config = SyncConfig::new(OWNER)
        .with_chunk(small_chunks())
        .with_retry(fast_retry());
    let a = TestDevice::with_config(config.clone(), remote.clone(), clock.clone());
    let b = TestDevice::with_config(config, remote.clone(), clock.clone());

    fill_noisy_students(&a, 10);
    let outcome = a.coordinator.sync(SyncTrigger::Forced).await.unwrap();
    let SyncOutcome::Pushed { chunks, .. } = outcome else {
        panic!("expected push, got {outcome:?}");
    };
    assert!(chunks > 1);

    tick(&clock);
    b.coordinator.restore().await.unwrap();
    assert_eq!(b.store.records("students").len(), 10);
    assert_eq!(
        b.store.get_record("students", "105"),
        a.store.get_record("students", "105")
    );
}

#[tokio::test]
async fn pull_racing_a_push_retries_missing_chunk() {
    let memory = small_remote();
    let flaky = Arc::new(FlakyRemote::new(memory.clone()));
    let clock = clock();
    let config = SyncConfig::new(OWNER)
        .with_chunk(small_chunks())
        .with_retry(fast_retry());
    let writer = TestDevice::with_config(config.clone(), memory.clone(), clock.clone());
    let reader = TestDevice::with_config(config, flaky.clone(), clock.clone());

    fill_noisy_students(&writer, 10);
    writer.coordinator.sync(SyncTrigger::Forced).await.unwrap();

    tick(&clock);
    flaky.hide_child("chunk_1", 1);
    let outcome = reader.coordinator.sync(SyncTrigger::Periodic).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Pulled { .. }));
    assert_eq!(reader.coordinator.stats().retries, 1);
    assert_eq!(reader.store.records("students").len(), 10);
}

#[tokio::test]
async fn pull_seeing_a_grown_chunk_set_retries() {
    let memory = small_remote();
    let flaky = Arc::new(FlakyRemote::new(memory.clone()));
    let clock = clock();
    let config = SyncConfig::new(OWNER)
        .with_chunk(small_chunks())
        .with_retry(fast_retry());
    let writer = TestDevice::with_config(config.clone(), memory.clone(), clock.clone());
    let reader = TestDevice::with_config(config, flaky.clone(), clock.clone());

    fill_noisy_students(&writer, 10);
    writer.coordinator.sync(SyncTrigger::Forced).await.unwrap();
    let total = BackupMetadata::from_fields(&memory.peek("backups", OWNER).unwrap())
        .unwrap()
        .total_chunks;

    // A push from another device lands between the metadata read and the
    // chunk listing and writes one more chunk than announced.
    let mut fields = Fields::new();
    fields.insert("index".into(), json!(total));
    fields.insert("data".into(), json!("AAAA"));
    flaky.extra_child(
        RemoteDocument {
            key: format!("chunk_{total}"),
            fields,
        },
        1,
    );

    tick(&clock);
    let outcome = reader.coordinator.sync(SyncTrigger::Periodic).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Pulled { .. }));
    assert_eq!(reader.coordinator.stats().retries, 1);
    assert_eq!(reader.store.records("students").len(), 10);
}

#[tokio::test]
async fn persistent_missing_chunk_exhausts_retries() {
    let memory = small_remote();
    let flaky = Arc::new(FlakyRemote::new(memory.clone()));
    let clock = clock();
    let config = SyncConfig::new(OWNER)
        .with_chunk(small_chunks())
        .with_retry(fast_retry());
    let writer = TestDevice::with_config(config.clone(), memory.clone(), clock.clone());
    let reader = TestDevice::with_config(config, flaky.clone(), clock.clone());

    fill_noisy_students(&writer, 10);
    writer.coordinator.sync(SyncTrigger::Forced).await.unwrap();

    tick(&clock);
    flaky.hide_child("chunk_0", 10);
    let err = reader
        .coordinator
        .sync(SyncTrigger::Periodic)
        .await
        .unwrap_err();
    match err {
        SyncError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(last, TransportError::MissingChunk { index: 0, .. }));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    assert!(reader.store.cursor().is_none());
    assert!(reader.store.records("students").is_empty());
    assert_eq!(reader.coordinator.state(), SyncState::Error);
}

#[tokio::test]
async fn oversize_backup_is_quota_exceeded() {
    let remote = small_remote();
    let clock = clock();
    let config = SyncConfig::new(OWNER)
        .with_chunk(small_chunks().with_max_chunks(2))
        .with_retry(fast_retry());
    let device = TestDevice::with_config(config, remote.clone(), clock);

    fill_noisy_students(&device, 10);
    let err = device
        .coordinator
        .sync(SyncTrigger::Forced)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Transport(TransportError::QuotaExceeded(_))
    ));
    assert!(!err.is_retryable());
    assert_eq!(remote.call_counts().puts, 0);
    assert!(device.store.cursor().is_none());
}

// ============================================================================
// Crypto
// ============================================================================

#[tokio::test]
async fn wrong_secret_is_mac_mismatch() {
    let remote = Arc::new(MemoryDocumentStore::new());
    let clock = clock();
    let owner = TestDevice::new(OWNER, remote.clone(), clock.clone());
    let intruder = TestDevice::with_sealer(
        SyncConfig::new(OWNER),
        remote.clone(),
        clock.clone(),
        Arc::new(SecretSealer::new(
            test_codec(),
            UserSecret::new(b"not-the-app-secret".to_vec(), OWNER),
        )),
    );

    owner
        .store
        .put_record("students", student("1", "Asha"))
        .unwrap();
    owner.coordinator.sync(SyncTrigger::Forced).await.unwrap();

    tick(&clock);
    let err = intruder.coordinator.restore().await.unwrap_err();
    assert!(matches!(err, SyncError::Crypto(CryptoError::MacMismatch)));
    assert!(intruder.store.records("students").is_empty());
    assert!(intruder.store.cursor().is_none());
    assert!(intruder.coordinator.take_error().is_some());
    assert_eq!(intruder.coordinator.state(), SyncState::Idle);
}

/// Seals nothing; delegates everything else.
struct BrokenSealer(SecretSealer);

impl EnvelopeSealer for BrokenSealer {
    fn seal(&self, _plaintext: &[u8], _timestamp: DateTime<Utc>) -> CryptoResult<Envelope> {
        Err(CryptoError::Encrypt("keystore unavailable".into()))
    }

    fn open(&self, envelope: &Envelope) -> CryptoResult<Vec<u8>> {
        self.0.open(envelope)
    }

    fn fallback(&self, plaintext: &[u8], timestamp: DateTime<Utc>) -> Envelope {
        self.0.fallback(plaintext, timestamp)
    }
}

#[tokio::test]
async fn seal_failure_uses_plaintext_fallback_when_allowed() {
    let remote = Arc::new(MemoryDocumentStore::new());
    let clock = clock();
    let device = TestDevice::with_sealer(
        SyncConfig::new(OWNER).with_plaintext_fallback(true),
        remote.clone(),
        clock.clone(),
        Arc::new(BrokenSealer(test_sealer(OWNER))),
    );
    device
        .store
        .put_record("students", student("1", "Asha"))
        .unwrap();

    let outcome = device.coordinator.sync(SyncTrigger::Forced).await.unwrap();
    assert!(matches!(
        outcome,
        SyncOutcome::Pushed {
            encrypted: false,
            ..
        }
    ));

    let doc = remote.peek("backups", OWNER).unwrap();
    assert_eq!(doc["unencrypted"], json!(true));
    assert_eq!(doc["encrypted"], json!(false));
    assert!(doc.get("algorithmId").is_none());

    // Any device can read it back.
    tick(&clock);
    let other = TestDevice::new(OWNER, remote.clone(), clock.clone());
    other.coordinator.restore().await.unwrap();
    assert!(other.store.get_record("students", "1").is_some());
}

#[tokio::test]
async fn seal_failure_without_fallback_pushes_nothing() {
    let remote = Arc::new(MemoryDocumentStore::new());
    let device = TestDevice::with_sealer(
        SyncConfig::new(OWNER),
        remote.clone(),
        clock(),
        Arc::new(BrokenSealer(test_sealer(OWNER))),
    );

    let err = device
        .coordinator
        .sync(SyncTrigger::Forced)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Crypto(CryptoError::Encrypt(_))));
    assert!(remote.peek("backups", OWNER).is_none());
    assert!(device.store.cursor().is_none());
}

// ============================================================================
// Concurrency and legacy data
// ============================================================================

#[tokio::test]
async fn concurrent_trigger_is_skipped() {
    let remote = Arc::new(MemoryDocumentStore::new().with_latency(Duration::from_millis(30)));
    let device = TestDevice::new(OWNER, remote, clock());

    let (first, second) = tokio::join!(
        device.coordinator.sync(SyncTrigger::Forced),
        device.coordinator.sync(SyncTrigger::DataChanged),
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Skipped))
        .count();
    assert_eq!(skipped, 1);
    assert_eq!(device.coordinator.stats().skipped, 1);
    assert_eq!(device.coordinator.stats().pushes, 1);
    assert!(!device.coordinator.is_syncing());
}

#[tokio::test]
async fn legacy_remote_document_is_migrated_on_pull() {
    let remote = Arc::new(MemoryDocumentStore::new());
    let legacy = json!({
        "students": [
            {"grNo": "7", "name": "Kiran"},
            {"grNo": "007", "phone": "12345"}
        ],
        "settings": {"schoolName": "Hill School"}
    });
    let mut fields = Fields::new();
    fields.insert("data".into(), json!(legacy.to_string()));
    remote.put_document("backups", OWNER, fields).await.unwrap();

    let device = TestDevice::new(OWNER, remote.clone(), clock());
    let probe = device.coordinator.probe().await.unwrap();
    assert!(probe.exists);
    assert!(probe.last_modified.is_none());

    let outcome = device.coordinator.sync(SyncTrigger::Periodic).await.unwrap();
    let SyncOutcome::Pulled { report, .. } = outcome else {
        panic!("expected pull, got {outcome:?}");
    };
    assert_eq!(report.migrated_from, Some(0));

    let records = device.store.records("students");
    assert_eq!(records.len(), 1);
    let kiran = device.store.get_record("students", "7").unwrap();
    assert_eq!(kiran.get("phone"), Some(&json!("12345")));
    assert_eq!(
        device.store.setting("schoolName").unwrap().value,
        json!("Hill School")
    );
}

#[tokio::test]
async fn directory_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let remote: Arc<dyn RemoteDocumentStore> = Arc::new(DirectoryDocumentStore::new(dir.path()));
    let clock = clock();
    let a = TestDevice::new(OWNER, remote.clone(), clock.clone());
    let b = TestDevice::new(OWNER, remote.clone(), clock.clone());

    a.store
        .put_record("students", Record::new().with("grNo", "5").with("name", "Meera"))
        .unwrap();
    a.coordinator.sync(SyncTrigger::Forced).await.unwrap();
    assert!(dir.path().join("backups").join("owner-1.json").exists());

    tick(&clock);
    b.coordinator.sync(SyncTrigger::Periodic).await.unwrap();
    assert!(b.store.get_record("students", "5").is_some());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let memory = Arc::new(MemoryDocumentStore::new());
    let flaky = Arc::new(FlakyRemote::new(memory.clone()));
    let device = TestDevice::with_config(
        SyncConfig::new(OWNER).with_retry(fast_retry()),
        flaky.clone(),
        clock(),
    );

    flaky.fail_next_calls(2);
    let outcome = device.coordinator.sync(SyncTrigger::Forced).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Pushed { .. }));
    assert_eq!(device.coordinator.stats().retries, 2);
    assert!(memory.peek("backups", OWNER).is_some());
}
