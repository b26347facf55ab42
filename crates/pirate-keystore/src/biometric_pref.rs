//! Biometric preference coordinator
//!
//! Keeps three things in agreement: the persisted biometric flag, the master
//! key's gating policy and the cached wrapped master secret. A change either
//! completes or is rolled back best-effort to the previous state.
//!
//! Transition steps:
//! 1. read the current flag; no-op if unchanged
//! 2. persist the new flag to the primary store and the fallback file
//! 3. when enabling, unseal the cached wrapped secret (may prompt)
//! 4. when disabling, clear the cached wrapped secret
//! 5. regenerate the master key with the new gating policy
//! 6. re-wrap the secret read in step 3 under the new key and cache it
//! 7. on any failure, roll back and surface the original error

use crate::envelope::SealedBlob;
use crate::preferences::{keys, FallbackFlagFile, PreferenceStore};
use crate::sealing::KeySealingService;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Persisted biometric state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiometricState {
    /// Master key is ungated
    Disabled,
    /// Master key requires user authentication
    Enabled,
}

impl From<bool> for BiometricState {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

/// Snapshot of the three coordinated values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricStatus {
    /// Persisted flag
    pub state: BiometricState,
    /// Gating of the current master key; `None` when no master key exists
    pub master_key_gated: Option<bool>,
    /// Whether a wrapped master secret is cached
    pub has_cached_secret: bool,
    /// A failed transition could not put back a secret that was cached before it
    pub cached_secret_lost: bool,
}

impl BiometricStatus {
    /// Flag matches the key policy, a cached secret has a key to open it, and
    /// no cached secret went missing in a failed transition
    pub fn is_consistent(&self) -> bool {
        let enabled = self.state == BiometricState::Enabled;
        let policy_matches = self.master_key_gated.unwrap_or(false) == enabled;
        let cache_openable = !self.has_cached_secret || self.master_key_gated.is_some();
        policy_matches && cache_openable && !self.cached_secret_lost
    }
}

/// What a transition has done so far, for rollback
#[derive(Default)]
struct TransitionProgress {
    generation_before: Option<u64>,
    secret: Option<Zeroizing<Vec<u8>>>,
    cleared: Option<SealedBlob>,
    key_switch_attempted: bool,
}

/// Single writer of the biometric flag and the master key policy
pub struct BiometricPreferenceCoordinator {
    sealing: Arc<KeySealingService>,
    primary: Arc<dyn PreferenceStore>,
    fallback: FallbackFlagFile,
    cache_lost: bool,
}

impl BiometricPreferenceCoordinator {
    /// Create coordinator
    pub fn new(
        sealing: Arc<KeySealingService>,
        primary: Arc<dyn PreferenceStore>,
        fallback: FallbackFlagFile,
    ) -> Self {
        Self {
            sealing,
            primary,
            fallback,
            cache_lost: false,
        }
    }

    /// Current flag. Reads the fallback file if the primary store fails and
    /// logs a warning when the flag disagrees with the key policy.
    pub fn is_enabled(&self) -> bool {
        let enabled = self.read_flag();
        match self.status_with(enabled) {
            Ok(status) if !status.is_consistent() => {
                warn!("Biometric state inconsistent: {:?}", status);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to validate biometric state: {}", e),
        }
        enabled
    }

    /// Current flag as a state
    pub fn state(&self) -> BiometricState {
        self.is_enabled().into()
    }

    /// Flag, key policy and cache in one snapshot
    pub fn status(&self) -> Result<BiometricStatus> {
        self.status_with(self.read_flag())
    }

    /// Enable or disable biometric gating of the master key.
    ///
    /// Takes `&mut self` so only one transition can run at a time.
    pub async fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        let previous = self.read_flag();
        if previous == enabled {
            debug!("Biometric preference already {}", enabled);
            return Ok(());
        }

        info!("Changing biometric preference: {} -> {}", previous, enabled);
        self.persist(enabled)?;

        let mut progress = TransitionProgress::default();
        match self.apply(enabled, &mut progress).await {
            Ok(()) => {
                info!("Biometric preference set to {}", enabled);
                Ok(())
            }
            Err(e) => {
                error!("Biometric preference change failed, rolling back: {}", e);
                let had_cache = progress.secret.is_some() || progress.cleared.is_some();
                let restored = self.rollback(previous, progress).await;
                if had_cache && !restored {
                    self.cache_lost = true;
                }
                Err(e)
            }
        }
    }

    fn read_flag(&self) -> bool {
        match self.primary.get_bool(keys::BIOMETRICS_ENABLED) {
            Ok(value) => value.unwrap_or(false),
            Err(primary_err) => {
                warn!(
                    "Primary preference store unavailable ({}), reading fallback file",
                    primary_err
                );
                match self.fallback.read() {
                    Ok(value) => value.unwrap_or(false),
                    Err(e) => {
                        warn!("Fallback flag file unreadable: {}", e);
                        false
                    }
                }
            }
        }
    }

    fn status_with(&self, enabled: bool) -> Result<BiometricStatus> {
        let has_cached_secret = self.sealing.cached_master_secret()?.is_some();
        Ok(BiometricStatus {
            state: enabled.into(),
            master_key_gated: self
                .sealing
                .master_key_info()?
                .map(|info| info.gating.requires_user_auth()),
            has_cached_secret,
            cached_secret_lost: self.cache_lost && !has_cached_secret,
        })
    }

    /// Write both stores; fails only when neither accepted the value
    fn persist(&self, enabled: bool) -> Result<()> {
        let primary = self.primary.set_bool(keys::BIOMETRICS_ENABLED, enabled);
        let fallback = self.fallback.write(enabled);
        match (primary, fallback) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => {
                warn!("Primary preference write failed, fallback file updated: {}", e);
                Ok(())
            }
            (Ok(()), Err(e)) => {
                warn!("Fallback flag file write failed: {}", e);
                Ok(())
            }
            (Err(p), Err(f)) => Err(Error::Preference(format!(
                "biometric flag not persisted (primary: {}; fallback: {})",
                p, f
            ))),
        }
    }

    async fn apply(&self, enabled: bool, progress: &mut TransitionProgress) -> Result<()> {
        progress.generation_before = self.sealing.master_key_info()?.map(|info| info.generation);

        if enabled {
            if let Some(cached) = self.sealing.cached_master_secret()? {
                progress.secret = Some(self.sealing.unseal_master_secret(&cached).await?);
            }
        } else {
            progress.cleared = self.sealing.cached_master_secret()?;
            self.sealing.clear_cached_master_secret()?;
        }

        progress.key_switch_attempted = true;
        self.sealing.set_master_key_biometric(enabled)?;

        if let Some(secret) = progress.secret.as_ref() {
            let sealed = self.sealing.seal_master_secret(secret).await?;
            self.sealing.cache_master_secret(&sealed)?;
        }
        Ok(())
    }

    /// Returns whether the cached secret (if there was one) is back in place
    async fn rollback(&self, previous: bool, progress: TransitionProgress) -> bool {
        if let Err(e) = self.persist(previous) {
            error!("Rollback: biometric flag not restored: {}", e);
        }

        if progress.key_switch_attempted {
            if let Err(e) = self.sealing.set_master_key_biometric(previous) {
                error!("Rollback: master key policy not restored: {}", e);
            }
        }

        let generation_after = match self.sealing.master_key_info() {
            Ok(info) => info.map(|info| info.generation),
            Err(e) => {
                error!("Rollback: master key unreadable: {}", e);
                return progress.secret.is_none() && progress.cleared.is_none();
            }
        };

        if generation_after.is_some() && generation_after == progress.generation_before {
            // Original key survived; the cleared blob still opens with it
            return match progress.cleared {
                Some(blob) => match self.sealing.cache_master_secret(&blob) {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Rollback: cached master secret not restored: {}", e);
                        false
                    }
                },
                None => true,
            };
        }

        if let Some(secret) = progress.secret {
            match self.sealing.seal_master_secret(&secret).await {
                Ok(sealed) => match self.sealing.cache_master_secret(&sealed) {
                    Ok(()) => return true,
                    Err(e) => error!("Rollback: cached master secret not restored: {}", e),
                },
                Err(e) => error!("Rollback: master secret not resealed: {}", e),
            }
            false
        } else if progress.cleared.is_some() {
            warn!("Rollback: cached master secret was bound to a replaced key and is gone");
            false
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_consistency() {
        let consistent = BiometricStatus {
            state: BiometricState::Enabled,
            master_key_gated: Some(true),
            has_cached_secret: true,
            cached_secret_lost: false,
        };
        assert!(consistent.is_consistent());

        let never_sealed = BiometricStatus {
            state: BiometricState::Disabled,
            master_key_gated: None,
            has_cached_secret: false,
            cached_secret_lost: false,
        };
        assert!(never_sealed.is_consistent());

        let mismatch = BiometricStatus {
            state: BiometricState::Disabled,
            master_key_gated: Some(true),
            has_cached_secret: false,
            cached_secret_lost: false,
        };
        assert!(!mismatch.is_consistent());

        let orphaned_cache = BiometricStatus {
            state: BiometricState::Disabled,
            master_key_gated: None,
            has_cached_secret: true,
            cached_secret_lost: false,
        };
        assert!(!orphaned_cache.is_consistent());

        let lost_cache = BiometricStatus {
            state: BiometricState::Enabled,
            master_key_gated: Some(true),
            has_cached_secret: false,
            cached_secret_lost: true,
        };
        assert!(!lost_cache.is_consistent());
    }

    #[test]
    fn test_state_from_bool() {
        assert_eq!(BiometricState::from(true), BiometricState::Enabled);
        assert_eq!(BiometricState::from(false), BiometricState::Disabled);
    }
}
