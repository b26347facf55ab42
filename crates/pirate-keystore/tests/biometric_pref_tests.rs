//! Biometric preference coordinator tests
//!
//! Tests cover:
//! - Enable / disable transitions and what they do to the master key
//! - Rollback when key regeneration or the re-wrap prompt fails
//! - Dual-store persistence and the fallback flag file

use pirate_keystore::{
    keys, AuthFailureReason, BiometricPreferenceCoordinator, BiometricState, Error,
    FallbackFlagFile, KeyAlias, KeySealingService, KeystoreError, MemoryKeystore,
    MemoryPreferenceStore, MemorySecretStore, PreferenceStore, ScriptedBiometricGate,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    keystore: Arc<MemoryKeystore>,
    gate: Arc<ScriptedBiometricGate>,
    prefs: Arc<MemoryPreferenceStore>,
    fallback: FallbackFlagFile,
    sealing: Arc<KeySealingService>,
    coordinator: BiometricPreferenceCoordinator,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    harness_in(dir)
}

fn harness_in(dir: TempDir) -> Harness {
    let keystore = Arc::new(MemoryKeystore::with_biometrics());
    let gate = Arc::new(ScriptedBiometricGate::approving());
    let sealing = Arc::new(KeySealingService::new(
        keystore.clone(),
        gate.clone(),
        Arc::new(MemorySecretStore::new()),
    ));
    let prefs = Arc::new(MemoryPreferenceStore::new());
    let fallback = FallbackFlagFile::in_support_dir(dir.path());
    let coordinator =
        BiometricPreferenceCoordinator::new(sealing.clone(), prefs.clone(), fallback.clone());
    Harness {
        keystore,
        gate,
        prefs,
        fallback,
        sealing,
        coordinator,
        _dir: dir,
    }
}

/// Seal and cache a master secret under the current (ungated) master key
async fn cache_seed(h: &Harness) {
    let sealed = h.sealing.seal_master_secret(b"seed-bytes").await.unwrap();
    h.sealing.cache_master_secret(&sealed).unwrap();
}

async fn cached_seed(h: &Harness) -> Vec<u8> {
    let cached = h.sealing.cached_master_secret().unwrap().expect("cached secret");
    h.sealing
        .unseal_master_secret(&cached)
        .await
        .unwrap()
        .to_vec()
}

// =============================================================================
// Transitions
// =============================================================================

#[tokio::test]
async fn test_unchanged_preference_is_noop() {
    let mut h = harness();
    h.coordinator.set_enabled(false).await.unwrap();
    assert!(h.keystore.generation_requests().is_empty());
    assert_eq!(h.fallback.read().unwrap(), None);
}

#[tokio::test]
async fn test_enable_rewraps_cached_secret_under_gated_key() {
    let mut h = harness();
    cache_seed(&h).await;
    let before = h.sealing.master_key_info().unwrap().unwrap().generation;

    h.coordinator.set_enabled(true).await.unwrap();

    // One prompt to re-wrap under the new gated key
    assert_eq!(h.gate.prompt_count(), 1);
    assert!(h.coordinator.is_enabled());
    assert_eq!(h.prefs.get_bool(keys::BIOMETRICS_ENABLED).unwrap(), Some(true));
    assert_eq!(h.fallback.read().unwrap(), Some(true));

    let info = h.sealing.master_key_info().unwrap().unwrap();
    assert!(info.gating.requires_user_auth());
    assert_ne!(info.generation, before);

    assert_eq!(cached_seed(&h).await, b"seed-bytes");
    assert_eq!(h.gate.prompt_count(), 2);
    assert!(h.coordinator.status().unwrap().is_consistent());
}

#[tokio::test]
async fn test_toggle_twice_restores_ungated_behaviour() {
    let mut h = harness();
    h.sealing.seal_item("wallet_pin", b"1234").unwrap();
    cache_seed(&h).await;

    h.coordinator.set_enabled(true).await.unwrap();
    h.coordinator.set_enabled(false).await.unwrap();

    let status = h.coordinator.status().unwrap();
    assert_eq!(status.state, BiometricState::Disabled);
    assert_eq!(status.master_key_gated, Some(false));
    assert!(!status.has_cached_secret);
    assert!(status.is_consistent());

    // Store key items are untouched by master key changes
    assert_eq!(
        h.sealing.unseal_item("wallet_pin").unwrap().unwrap().as_slice(),
        b"1234"
    );

    // Master secret round trip needs no prompt again
    let prompts = h.gate.prompt_count();
    let sealed = h.sealing.seal_master_secret(b"seed-bytes").await.unwrap();
    let plaintext = h.sealing.unseal_master_secret(&sealed).await.unwrap();
    assert_eq!(plaintext.as_slice(), b"seed-bytes");
    assert_eq!(h.gate.prompt_count(), prompts);
}

#[tokio::test]
async fn test_enable_without_cached_secret() {
    let mut h = harness();
    h.coordinator.set_enabled(true).await.unwrap();

    assert_eq!(h.gate.prompt_count(), 0);
    assert!(h.sealing.master_key_requires_biometric().unwrap());
    assert!(h.sealing.cached_master_secret().unwrap().is_none());
}

// =============================================================================
// Rollback
// =============================================================================

#[tokio::test]
async fn test_key_generation_failure_rolls_back_enable() {
    let mut h = harness();
    cache_seed(&h).await;
    h.keystore.fail_next_generation(&KeyAlias::master());

    let err = h.coordinator.set_enabled(true).await.unwrap_err();
    assert!(matches!(err, Error::Keystore(KeystoreError::KeyGeneration(_))));

    assert!(!h.coordinator.is_enabled());
    assert_eq!(h.fallback.read().unwrap(), Some(false));
    assert!(!h.sealing.master_key_requires_biometric().unwrap());

    // Secret read before the failure is available again without a prompt
    assert_eq!(cached_seed(&h).await, b"seed-bytes");
    assert_eq!(h.gate.prompt_count(), 0);
    assert!(h.coordinator.status().unwrap().is_consistent());
}

#[tokio::test]
async fn test_cancelled_rewrap_prompt_rolls_back_enable() {
    let mut h = harness();
    cache_seed(&h).await;
    h.gate
        .reject_next(AuthFailureReason::Cancelled, "User cancelled");

    let err = h.coordinator.set_enabled(true).await.unwrap_err();
    assert!(err.as_auth().map(|a| a.is_user_cancellation()).unwrap_or(false));

    assert!(!h.coordinator.is_enabled());
    assert!(!h.sealing.master_key_requires_biometric().unwrap());
    assert_eq!(cached_seed(&h).await, b"seed-bytes");
}

#[tokio::test]
async fn test_key_generation_failure_rolls_back_disable() {
    let mut h = harness();
    cache_seed(&h).await;
    h.coordinator.set_enabled(true).await.unwrap();
    let generation = h.sealing.master_key_info().unwrap().unwrap().generation;
    h.keystore.fail_next_generation(&KeyAlias::master());

    assert!(h.coordinator.set_enabled(false).await.is_err());

    let status = h.coordinator.status().unwrap();
    assert_eq!(status.state, BiometricState::Enabled);
    assert_eq!(status.master_key_gated, Some(true));
    assert!(status.has_cached_secret);
    assert!(!status.cached_secret_lost);
    assert!(status.is_consistent());

    let info = h.sealing.master_key_info().unwrap().unwrap();
    assert_eq!(info.generation, generation);
    assert_eq!(cached_seed(&h).await, b"seed-bytes");
}

#[tokio::test]
async fn test_both_stores_failing_aborts_before_key_changes() {
    let dir = tempfile::tempdir().unwrap();
    // A file where the prefs directory should be makes the fallback unwritable
    std::fs::write(dir.path().join("prefs"), b"not a directory").unwrap();
    let mut h = harness_in(dir);
    cache_seed(&h).await;
    let generation = h.sealing.master_key_info().unwrap().unwrap().generation;
    h.prefs.set_available(false);

    let err = h.coordinator.set_enabled(true).await.unwrap_err();
    assert!(matches!(err, Error::Preference(_)));

    let info = h.sealing.master_key_info().unwrap().unwrap();
    assert_eq!(info.generation, generation);
    assert!(!info.gating.requires_user_auth());
    assert!(h.sealing.cached_master_secret().unwrap().is_some());
    assert_eq!(h.gate.prompt_count(), 0);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_fallback_file_read_when_primary_unavailable() {
    let mut h = harness();
    h.coordinator.set_enabled(true).await.unwrap();

    h.prefs.set_available(false);
    assert!(h.coordinator.is_enabled());
    assert_eq!(h.coordinator.state(), BiometricState::Enabled);
}

#[tokio::test]
async fn test_primary_write_failure_is_tolerated() {
    let mut h = harness();
    h.prefs.set_available(false);

    h.coordinator.set_enabled(true).await.unwrap();

    assert_eq!(h.fallback.read().unwrap(), Some(true));
    assert!(h.sealing.master_key_requires_biometric().unwrap());
}
