//! Key sealing service
//!
//! Orchestrates the hardware keystore, the envelope cipher and the biometric
//! gate. Named secrets are sealed under the `store` alias; the wallet master
//! secret is sealed under the `master` alias, which may be biometric-gated.

use crate::alias::{KeyAlias, KeyGating, KeyGenPolicy};
use crate::biometric::{run_gated, AuthPrompt, BiometricGate};
use crate::envelope::{EnvelopeCipher, SealedBlob};
use crate::keystore::{HardwareKeystore, KeyInfo, KeystoreCapabilities};
use crate::secret_store::{NamedSecret, SecretStore, WRAPPED_MASTER_SECRET_ID};
use crate::{Error, KeystoreError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Capability summary exposed to the onboarding and settings flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealingCapabilities {
    /// Hardware-backed key storage present
    pub has_hardware_backed_store: bool,
    /// Secure hardware module (StrongBox / Secure Enclave) present
    pub has_secure_hardware_module: bool,
    /// Biometric or device credential enrolled
    pub has_biometrics: bool,
}

/// Seals and unseals wallet secrets with hardware-backed keys
pub struct KeySealingService {
    keystore: Arc<dyn HardwareKeystore>,
    gate: Arc<dyn BiometricGate>,
    secrets: Arc<dyn SecretStore>,
    envelope: EnvelopeCipher,
    policy: KeyGenPolicy,
}

impl KeySealingService {
    /// Create with the default key generation policy
    pub fn new(
        keystore: Arc<dyn HardwareKeystore>,
        gate: Arc<dyn BiometricGate>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            envelope: EnvelopeCipher::new(Arc::clone(&keystore)),
            keystore,
            gate,
            secrets,
            policy: KeyGenPolicy::default(),
        }
    }

    /// Override the key generation policy
    pub fn with_policy(mut self, policy: KeyGenPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Capability introspection, side-effect free
    pub fn capabilities(&self) -> SealingCapabilities {
        let caps = self.keystore.capabilities();
        SealingCapabilities {
            has_hardware_backed_store: caps.has_hardware_backed_store,
            has_secure_hardware_module: caps.has_secure_hardware_module,
            has_biometrics: caps.has_biometrics,
        }
    }

    /// Full keystore capability report
    pub fn keystore_capabilities(&self) -> KeystoreCapabilities {
        self.keystore.capabilities()
    }

    // ---------------------------------------------------------------------
    // Named secrets (store key)
    // ---------------------------------------------------------------------

    /// Seal `plaintext` under the store key and persist it as `key_id`
    pub fn seal_item(&self, key_id: &str, plaintext: &[u8]) -> Result<SealedBlob> {
        let alias = KeyAlias::store();
        self.ensure_key(&alias, KeyGating::None)?;
        let sealed = self.envelope.seal(&alias, plaintext)?;
        self.secrets.save(&NamedSecret {
            key_id: key_id.to_string(),
            sealed: sealed.clone(),
        })?;
        debug!("Sealed item {} ({} bytes)", key_id, sealed.len());
        Ok(sealed)
    }

    /// Unseal the secret stored as `key_id`; `None` if no entry exists
    pub fn unseal_item(&self, key_id: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let Some(secret) = self.secrets.load(key_id)? else {
            return Ok(None);
        };
        let plaintext = self.envelope.unseal(&KeyAlias::store(), &secret.sealed)?;
        Ok(Some(plaintext))
    }

    /// Whether a secret is stored as `key_id`
    pub fn has_item(&self, key_id: &str) -> Result<bool> {
        Ok(self.secrets.read(key_id)?.is_some())
    }

    /// Remove the secret stored as `key_id`
    pub fn delete_item(&self, key_id: &str) -> Result<()> {
        self.secrets.remove(key_id)?;
        debug!("Deleted item {}", key_id);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Master secret (master key, optionally gated)
    // ---------------------------------------------------------------------

    /// Seal the master secret. Prompts when the master key is gated.
    pub async fn seal_master_secret(&self, plaintext: &[u8]) -> Result<SealedBlob> {
        let alias = KeyAlias::master();
        self.ensure_key(&alias, KeyGating::None)?;
        let cipher = self.envelope.begin_seal(&alias)?;
        let nonce = cipher.nonce();
        let ciphertext =
            run_gated(self.gate.as_ref(), &AuthPrompt::protect(), cipher, plaintext).await?;
        Ok(SealedBlob::from_parts(nonce, &ciphertext))
    }

    /// Unseal the master secret. Prompts when the master key is gated.
    ///
    /// Fails closed if the master key does not exist.
    pub async fn unseal_master_secret(&self, sealed: &SealedBlob) -> Result<Zeroizing<Vec<u8>>> {
        let cipher = self.envelope.begin_unseal(&KeyAlias::master(), sealed)?;
        run_gated(self.gate.as_ref(), &AuthPrompt::unlock(), cipher, sealed.ciphertext()).await
    }

    /// Metadata of the current master key
    pub fn master_key_info(&self) -> Result<Option<KeyInfo>> {
        self.keystore.key_info(&KeyAlias::master())
    }

    /// Whether the master key was created with a biometric requirement
    pub fn master_key_requires_biometric(&self) -> Result<bool> {
        Ok(self
            .master_key_info()?
            .map(|info| info.gating.requires_user_auth())
            .unwrap_or(false))
    }

    /// Switch the master key's gating policy.
    ///
    /// Generates a new key under the master alias; everything sealed with the
    /// previous key becomes unreadable and must be resealed by the caller.
    /// The previous key is replaced only once the new one exists, so a failed
    /// generation leaves it in place. No-op when the existing key already has
    /// the requested policy.
    pub fn set_master_key_biometric(&self, required: bool) -> Result<()> {
        let alias = KeyAlias::master();
        if let Some(info) = self.keystore.key_info(&alias)? {
            if info.gating.requires_user_auth() == required {
                debug!("Master key already has biometric={}, keeping it", required);
                return Ok(());
            }
        }

        let gating = self.gating_for(required);
        info!("Regenerating master key with biometric={}", required);
        self.create_key(&alias, gating)
    }

    /// Delete the master key and any cached wrapped secret
    pub fn reset_master_key(&self) -> Result<()> {
        self.clear_cached_master_secret()?;
        self.keystore.delete_key(&KeyAlias::master())?;
        info!("Master key reset");
        Ok(())
    }

    /// Cached wrapped master secret used for biometric unlock
    pub fn cached_master_secret(&self) -> Result<Option<SealedBlob>> {
        Ok(self
            .secrets
            .load(WRAPPED_MASTER_SECRET_ID)?
            .map(|secret| secret.sealed))
    }

    /// Replace the cached wrapped master secret
    pub fn cache_master_secret(&self, sealed: &SealedBlob) -> Result<()> {
        self.secrets.save(&NamedSecret {
            key_id: WRAPPED_MASTER_SECRET_ID.to_string(),
            sealed: sealed.clone(),
        })
    }

    /// Drop the cached wrapped master secret
    pub fn clear_cached_master_secret(&self) -> Result<()> {
        self.secrets.remove(WRAPPED_MASTER_SECRET_ID)
    }

    // ---------------------------------------------------------------------
    // Key creation
    // ---------------------------------------------------------------------

    fn gating_for(&self, required: bool) -> KeyGating {
        if !required {
            return KeyGating::None;
        }
        let per_operation = self.keystore.capabilities().per_operation_auth;
        if !per_operation {
            warn!(
                "Per-operation authorization unavailable; master key uses a {}s validity window",
                self.policy.fallback_validity.as_secs()
            );
        }
        self.policy.biometric_gating(per_operation)
    }

    fn ensure_key(&self, alias: &KeyAlias, gating: KeyGating) -> Result<()> {
        if self.keystore.contains_alias(alias)? {
            return Ok(());
        }
        self.create_key(alias, gating)
    }

    /// Secure module first, baseline key if the module refuses
    fn create_key(&self, alias: &KeyAlias, gating: KeyGating) -> Result<()> {
        let caps = self.keystore.capabilities();
        if self.policy.prefer_secure_module && caps.has_secure_hardware_module {
            match self
                .keystore
                .generate_key(&self.policy.spec(alias, true, gating))
            {
                Ok(()) => {
                    info!("Generated secure-module key {}", alias);
                    return Ok(());
                }
                Err(Error::Keystore(KeystoreError::SecureModuleRejected(reason))) => {
                    warn!(
                        "Secure module rejected {} ({}), generating baseline key",
                        alias, reason
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.keystore
            .generate_key(&self.policy.spec(alias, false, gating))?;
        info!("Generated key {}", alias);
        Ok(())
    }
}
