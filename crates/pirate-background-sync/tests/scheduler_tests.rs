//! Scheduler and retry loop tests
//!
//! Tests cover:
//! - Idempotent registration of the durable work
//! - Immediate work budgets and expedited fallback
//! - Cancelling all sync work
//! - Backoff timing and cancellation between attempts

use pirate_background_sync::{
    AttemptOutcome, BackgroundSyncConfig, CancelToken, EngineError, EngineResponse, Error,
    ErrorCategory, MemoryWalletDirectory, MemoryWorkPlatform, NetworkRequirement,
    RecordingNotifier, RecordingPromoter, Schedule, ScriptedWalletEngine, SyncExecutor, SyncMode,
    SyncRunner, SyncScheduler, WorkKind, WorkPlatform, WorkSpec, COMPACT_WORK_NAME,
    DEEP_WORK_NAME,
};
use pirate_keystore::MemoryPreferenceStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn scheduler() -> (SyncScheduler, Arc<MemoryWorkPlatform>) {
    let platform = Arc::new(MemoryWorkPlatform::new());
    let scheduler = SyncScheduler::new(platform.clone(), BackgroundSyncConfig::default()).unwrap();
    (scheduler, platform)
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn test_register_twice_keeps_one_of_each() {
    let (scheduler, platform) = scheduler();
    scheduler.register_periodic().unwrap();
    scheduler.register_periodic().unwrap();

    let durable: Vec<_> = platform
        .scheduled()
        .into_iter()
        .filter(|w| w.spec.is_durable())
        .collect();
    assert_eq!(durable.len(), 2);

    let compact = platform.unique_work(COMPACT_WORK_NAME).unwrap();
    assert_eq!(compact.registrations, 2);
    assert_eq!(compact.spec.max_duration_secs, 60);
    assert_eq!(compact.spec.max_blocks, 5_000);
    assert_eq!(
        compact.spec.schedule,
        Schedule::Periodic {
            interval: Duration::from_secs(15 * 60),
            flex: Duration::from_secs(5 * 60),
        }
    );

    let deep = platform.unique_work(DEEP_WORK_NAME).unwrap();
    assert_eq!(deep.spec.max_blocks, 50_000);
    assert_eq!(deep.spec.constraints.network, NetworkRequirement::Unmetered);
    assert!(deep.spec.constraints.requires_charging);

    assert!(scheduler.status().is_fully_registered());
}

#[test]
fn test_reregister_applies_new_config() {
    let platform = Arc::new(MemoryWorkPlatform::new());
    SyncScheduler::new(platform.clone(), BackgroundSyncConfig::default())
        .unwrap()
        .register_periodic()
        .unwrap();

    let config = BackgroundSyncConfig {
        compact_max_blocks: 2_000,
        ..Default::default()
    };
    SyncScheduler::new(platform.clone(), config)
        .unwrap()
        .register_periodic()
        .unwrap();

    let compact = platform.unique_work(COMPACT_WORK_NAME).unwrap();
    assert_eq!(compact.spec.max_blocks, 2_000);
    assert_eq!(compact.registrations, 2);
}

// =============================================================================
// Immediate work
// =============================================================================

#[test]
fn test_immediate_budgets_and_uniqueness() {
    let (scheduler, platform) = scheduler();

    let compact = scheduler.trigger_immediate(SyncMode::Compact).unwrap();
    let deep = scheduler.trigger_immediate(SyncMode::Deep).unwrap();
    let again = scheduler.trigger_immediate(SyncMode::Compact).unwrap();

    assert_eq!(compact.kind, WorkKind::Immediate);
    assert_eq!(compact.max_duration_secs, 120);
    assert_eq!(deep.max_duration_secs, 300);
    assert_eq!(compact.schedule, Schedule::OneOff { expedited: true });
    assert_ne!(compact.name, again.name);

    assert_eq!(platform.one_off_work().len(), 3);
    assert_eq!(scheduler.status().pending_immediate, 3);
}

#[test]
fn test_immediate_degrades_without_expedite() {
    let (scheduler, platform) = scheduler();
    platform.set_grant_expedited(false);

    let spec = scheduler.trigger_immediate(SyncMode::Compact).unwrap();
    assert_eq!(spec.schedule, Schedule::OneOff { expedited: false });

    let queued = platform.one_off_work();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].spec.name, spec.name);
}

#[test]
fn test_cancel_all() {
    let (scheduler, platform) = scheduler();
    scheduler.register_periodic().unwrap();
    scheduler.trigger_immediate(SyncMode::Deep).unwrap();

    scheduler.cancel_all().unwrap();
    assert!(platform.scheduled().is_empty());

    let status = scheduler.status();
    assert!(!status.is_fully_registered());
    assert_eq!(status.pending_immediate, 0);
}

// =============================================================================
// Retry loop
// =============================================================================

fn runner(engine: Arc<ScriptedWalletEngine>) -> SyncRunner {
    let config = BackgroundSyncConfig::default();
    let executor = SyncExecutor::new(
        engine,
        Arc::new(MemoryPreferenceStore::new()),
        Arc::new(MemoryWalletDirectory::new()),
        Arc::new(RecordingNotifier::new()),
        Arc::new(RecordingPromoter::granting()),
        config.clone(),
    );
    SyncRunner::new(Arc::new(executor), config.backoff)
}

fn proxy_refused() -> EngineError {
    EngineError::new("PROXY_CONNECTION_FAILED", "connection refused")
}

#[tokio::test(start_paused = true)]
async fn test_backoff_between_attempts() {
    let engine = Arc::new(ScriptedWalletEngine::new());
    for _ in 0..3 {
        engine.push_failure(proxy_refused());
    }
    let runner = runner(engine.clone());
    let spec = WorkSpec::compact(&BackgroundSyncConfig::default());

    let started = Instant::now();
    let outcome = runner.run(spec, &CancelToken::new()).await.unwrap();

    match outcome {
        AttemptOutcome::Failed(payload) => assert_eq!(payload.error, ErrorCategory::ProxyFailure),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(engine.opened_sessions(), 3);
    assert_eq!(engine.released_sessions(), 3);
    // 30s after attempt 0, 60s after attempt 1
    assert_eq!(started.elapsed(), Duration::from_secs(90));
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success() {
    let engine = Arc::new(ScriptedWalletEngine::new());
    engine.push_failure(proxy_refused());
    engine.push_success(EngineResponse {
        blocks_synced: 9,
        ..Default::default()
    });
    let runner = runner(engine.clone());

    let outcome = runner
        .run(
            WorkSpec::compact(&BackgroundSyncConfig::default()),
            &CancelToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, AttemptOutcome::Succeeded(ref r) if r.blocks_synced == 9));
    assert_eq!(engine.opened_sessions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() {
    let engine = Arc::new(ScriptedWalletEngine::new());
    engine.push_failure(proxy_refused());
    let runner = runner(engine.clone());
    let cancel = CancelToken::new();

    let spec = WorkSpec::compact(&BackgroundSyncConfig::default());
    let (result, ()) = tokio::join!(runner.run(spec, &cancel), async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();
    });

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(engine.opened_sessions(), 1);
    assert_eq!(engine.released_sessions(), 1);
}
