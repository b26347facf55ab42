//! Hardware keystore capability
//!
//! The platform keystore (Android Keystore with StrongBox, Apple Keychain with
//! Secure Enclave, ...) is modelled as an injected capability: create or fetch
//! a named AES-256-GCM key, and run encrypt/decrypt operations with it. Raw key
//! material never leaves the implementation.
//!
//! [`MemoryKeystore`] implements the same interface in process memory so the
//! sealing, rollback and retry logic can be exercised without real hardware.

use crate::alias::{AuthValidity, KeyAlias, KeyGating, KeyGenSpec};
use crate::envelope::NONCE_LEN;
use crate::{KeystoreError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use parking_lot::{Mutex, RwLock};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use zeroize::Zeroizing;

/// Platform capabilities for secure storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreCapabilities {
    /// Has hardware-backed key storage (TEE, Keychain)
    pub has_hardware_backed_store: bool,
    /// Has a dedicated secure chip (StrongBox, Secure Enclave)
    pub has_secure_hardware_module: bool,
    /// Has an enrolled biometric or device credential
    pub has_biometrics: bool,
    /// Available biometric type
    pub biometric_type: BiometricType,
    /// Supports per-operation authorization parameters
    pub per_operation_auth: bool,
    /// Platform name
    pub platform: Platform,
}

impl Default for KeystoreCapabilities {
    fn default() -> Self {
        Self {
            has_hardware_backed_store: false,
            has_secure_hardware_module: false,
            has_biometrics: false,
            biometric_type: BiometricType::None,
            per_operation_auth: false,
            platform: Platform::Unknown,
        }
    }
}

/// Supported platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    /// Android (Keystore, StrongBox)
    Android,
    /// iOS (Keychain, Secure Enclave)
    Ios,
    /// macOS (Keychain, Secure Enclave)
    MacOs,
    /// Windows (DPAPI)
    Windows,
    /// Linux (libsecret)
    Linux,
    /// Unknown platform
    Unknown,
}

impl Platform {
    /// Detect current platform at compile time
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }
}

/// Biometric authentication type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiometricType {
    /// Fingerprint sensor
    Fingerprint,
    /// Face recognition
    Face,
    /// Iris scanner
    Iris,
    /// Multiple types available
    Multiple,
    /// Unknown or unavailable
    None,
}

/// Metadata the keystore reports for an existing key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    /// Key alias
    pub alias: KeyAlias,
    /// Authentication requirement fixed at creation
    pub gating: KeyGating,
    /// Whether the key lives in the secure hardware module
    pub secure_module_backed: bool,
    /// Opaque value that changes every time the alias is regenerated
    pub generation: u64,
}

/// Direction of a cipher operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherOp {
    /// Encrypt with a keystore-chosen nonce
    Encrypt,
    /// Decrypt with the nonce stored in the sealed blob
    Decrypt {
        /// GCM nonce
        nonce: [u8; NONCE_LEN],
    },
}

/// A cipher initialized inside the keystore, pending finalization.
///
/// For gated keys the cipher is unusable until a [`crate::BiometricGate`]
/// grants authorization for this specific operation.
pub trait KeystoreCipher: Send {
    /// Alias the cipher was initialized with
    fn alias(&self) -> &KeyAlias;

    /// Nonce used by this operation
    fn nonce(&self) -> [u8; NONCE_LEN];

    /// Whether a user challenge is still needed before [`Self::do_final`]
    fn requires_authentication(&self) -> bool;

    /// Mark the operation authorized. Only biometric gates call this, after
    /// the platform confirmed the challenge.
    fn grant_authorization(&mut self);

    /// Run the operation. Encrypt returns `ciphertext || tag`, decrypt returns plaintext.
    fn do_final(self: Box<Self>, input: &[u8]) -> Result<Vec<u8>>;
}

/// Boxed pending cipher
pub type BoxedCipher = Box<dyn KeystoreCipher>;

/// Hardware keystore abstraction
pub trait HardwareKeystore: Send + Sync {
    /// Get platform capabilities (side-effect free)
    fn capabilities(&self) -> KeystoreCapabilities;

    /// Check whether a key exists under `alias`
    fn contains_alias(&self, alias: &KeyAlias) -> Result<bool>;

    /// Metadata for an existing key
    fn key_info(&self, alias: &KeyAlias) -> Result<Option<KeyInfo>>;

    /// Generate a key, replacing any existing key under the same alias.
    ///
    /// Fails with [`KeystoreError::SecureModuleRejected`] when secure module
    /// backing was requested but cannot be honoured.
    fn generate_key(&self, spec: &KeyGenSpec) -> Result<()>;

    /// Delete the key under `alias` (no-op if absent)
    fn delete_key(&self, alias: &KeyAlias) -> Result<()>;

    /// Initialize a cipher for one operation with the key under `alias`
    fn init_cipher(&self, alias: &KeyAlias, op: CipherOp) -> Result<BoxedCipher>;
}

struct StoredKey {
    material: Zeroizing<[u8; 32]>,
    info: KeyInfo,
    authorized_at: Option<Instant>,
}

type KeyTable = Arc<RwLock<HashMap<KeyAlias, StoredKey>>>;

/// In-memory keystore for tests and platforms without native integration.
///
/// Performs real AES-256-GCM with keys held in process memory. Failure
/// injection hooks let tests script unavailability, secure-module rejection
/// and failed key generation.
pub struct MemoryKeystore {
    capabilities: KeystoreCapabilities,
    keys: KeyTable,
    next_generation: AtomicU64,
    available: AtomicBool,
    reject_secure_module: AtomicBool,
    failing_generations: Mutex<Vec<KeyAlias>>,
    generation_requests: Mutex<Vec<KeyGenSpec>>,
}

impl MemoryKeystore {
    /// Create with software-only capabilities
    pub fn new() -> Self {
        Self::with_capabilities(KeystoreCapabilities {
            has_hardware_backed_store: true,
            platform: Platform::current(),
            ..Default::default()
        })
    }

    /// Create with custom capabilities
    pub fn with_capabilities(capabilities: KeystoreCapabilities) -> Self {
        Self {
            capabilities,
            keys: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            available: AtomicBool::new(true),
            reject_secure_module: AtomicBool::new(false),
            failing_generations: Mutex::new(Vec::new()),
            generation_requests: Mutex::new(Vec::new()),
        }
    }

    /// Capabilities of a device with a secure module and enrolled biometrics
    pub fn with_biometrics() -> Self {
        Self::with_capabilities(KeystoreCapabilities {
            has_hardware_backed_store: true,
            has_secure_hardware_module: true,
            has_biometrics: true,
            biometric_type: BiometricType::Fingerprint,
            per_operation_auth: true,
            platform: Platform::current(),
        })
    }

    /// Simulate the keystore going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Make the secure module refuse every key request
    pub fn set_reject_secure_module(&self, reject: bool) {
        self.reject_secure_module.store(reject, Ordering::Release);
    }

    /// Fail the next key generation for `alias`
    pub fn fail_next_generation(&self, alias: &KeyAlias) {
        self.failing_generations.lock().push(alias.clone());
    }

    /// Every generation request received, in order (including rejected ones)
    pub fn generation_requests(&self) -> Vec<KeyGenSpec> {
        self.generation_requests.lock().clone()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(KeystoreError::Unavailable("keystore not reachable".to_string()).into())
        }
    }
}

impl Default for MemoryKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareKeystore for MemoryKeystore {
    fn capabilities(&self) -> KeystoreCapabilities {
        self.capabilities.clone()
    }

    fn contains_alias(&self, alias: &KeyAlias) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.keys.read().contains_key(alias))
    }

    fn key_info(&self, alias: &KeyAlias) -> Result<Option<KeyInfo>> {
        self.ensure_available()?;
        Ok(self.keys.read().get(alias).map(|k| k.info.clone()))
    }

    fn generate_key(&self, spec: &KeyGenSpec) -> Result<()> {
        self.ensure_available()?;
        self.generation_requests.lock().push(spec.clone());

        if spec.secure_module_backed
            && (!self.capabilities.has_secure_hardware_module
                || self.reject_secure_module.load(Ordering::Acquire))
        {
            return Err(KeystoreError::SecureModuleRejected(format!(
                "secure module cannot hold {}",
                spec.alias
            ))
            .into());
        }

        if spec.key_size_bits != 256 {
            return Err(KeystoreError::KeyGeneration(format!(
                "unsupported key size {}",
                spec.key_size_bits
            ))
            .into());
        }

        if spec.gating.requires_user_auth() && !self.capabilities.has_biometrics {
            return Err(KeystoreError::KeyGeneration(
                "no biometric or device credential enrolled".to_string(),
            )
            .into());
        }

        {
            let mut failing = self.failing_generations.lock();
            if let Some(pos) = failing.iter().position(|a| a == &spec.alias) {
                failing.remove(pos);
                return Err(KeystoreError::KeyGeneration(format!(
                    "injected failure for {}",
                    spec.alias
                ))
                .into());
            }
        }

        let mut material = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut material[..]);

        let info = KeyInfo {
            alias: spec.alias.clone(),
            gating: spec.gating,
            secure_module_backed: spec.secure_module_backed,
            generation: self.next_generation.fetch_add(1, Ordering::AcqRel),
        };

        self.keys.write().insert(
            spec.alias.clone(),
            StoredKey {
                material,
                info,
                authorized_at: None,
            },
        );
        Ok(())
    }

    fn delete_key(&self, alias: &KeyAlias) -> Result<()> {
        self.ensure_available()?;
        self.keys.write().remove(alias);
        Ok(())
    }

    fn init_cipher(&self, alias: &KeyAlias, op: CipherOp) -> Result<BoxedCipher> {
        self.ensure_available()?;
        let keys = self.keys.read();
        let stored = keys
            .get(alias)
            .ok_or_else(|| KeystoreError::KeyNotFound(alias.to_string()))?;

        let requires_auth = match stored.info.gating {
            KeyGating::None => false,
            KeyGating::UserAuthentication { validity, .. } => match validity {
                AuthValidity::PerOperation => true,
                AuthValidity::Window(window) => !stored
                    .authorized_at
                    .map(|at| at.elapsed() < window)
                    .unwrap_or(false),
            },
        };

        let nonce = match op {
            CipherOp::Encrypt => {
                let mut nonce = [0u8; NONCE_LEN];
                OsRng.fill_bytes(&mut nonce);
                nonce
            }
            CipherOp::Decrypt { nonce } => nonce,
        };

        Ok(Box::new(MemoryCipher {
            alias: alias.clone(),
            material: stored.material.clone(),
            generation: stored.info.generation,
            encrypt: matches!(op, CipherOp::Encrypt),
            nonce,
            requires_auth,
            authorized: false,
            keys: Arc::clone(&self.keys),
        }))
    }
}

struct MemoryCipher {
    alias: KeyAlias,
    material: Zeroizing<[u8; 32]>,
    generation: u64,
    encrypt: bool,
    nonce: [u8; NONCE_LEN],
    requires_auth: bool,
    authorized: bool,
    keys: KeyTable,
}

impl KeystoreCipher for MemoryCipher {
    fn alias(&self) -> &KeyAlias {
        &self.alias
    }

    fn nonce(&self) -> [u8; NONCE_LEN] {
        self.nonce
    }

    fn requires_authentication(&self) -> bool {
        self.requires_auth && !self.authorized
    }

    fn grant_authorization(&mut self) {
        self.authorized = true;
        if let Some(stored) = self.keys.write().get_mut(&self.alias) {
            if stored.info.generation == self.generation {
                stored.authorized_at = Some(Instant::now());
            }
        }
    }

    fn do_final(self: Box<Self>, input: &[u8]) -> Result<Vec<u8>> {
        if self.requires_authentication() {
            return Err(KeystoreError::AuthorizationRequired(self.alias.to_string()).into());
        }

        // A key regenerated after this cipher was initialized invalidates it
        let still_valid = self
            .keys
            .read()
            .get(&self.alias)
            .map(|k| k.info.generation == self.generation)
            .unwrap_or(false);
        if !still_valid {
            let invalidated = KeystoreError::KeyNotFound(format!("{} was invalidated", self.alias));
            return Err(invalidated.into());
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.material.as_slice()));
        let nonce = Nonce::from_slice(&self.nonce);
        let output = if self.encrypt {
            cipher.encrypt(nonce, input)
        } else {
            cipher.decrypt(nonce, input)
        };
        output.map_err(|_| KeystoreError::Cipher("authentication tag mismatch".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::KeyGenPolicy;

    fn plain_spec(alias: &KeyAlias) -> KeyGenSpec {
        KeyGenPolicy::default().spec(alias, false, KeyGating::None)
    }

    #[test]
    fn test_platform_detection() {
        let platform = Platform::current();
        assert!(matches!(
            platform,
            Platform::Android
                | Platform::Ios
                | Platform::MacOs
                | Platform::Windows
                | Platform::Linux
                | Platform::Unknown
        ));
    }

    #[test]
    fn test_encrypt_decrypt_with_generated_key() {
        let keystore = MemoryKeystore::new();
        let alias = KeyAlias::store();
        keystore.generate_key(&plain_spec(&alias)).unwrap();

        let enc = keystore.init_cipher(&alias, CipherOp::Encrypt).unwrap();
        let nonce = enc.nonce();
        let ciphertext = enc.do_final(b"secret").unwrap();
        assert_eq!(ciphertext.len(), b"secret".len() + 16);

        let dec = keystore
            .init_cipher(&alias, CipherOp::Decrypt { nonce })
            .unwrap();
        assert_eq!(dec.do_final(&ciphertext).unwrap(), b"secret");
    }

    #[test]
    fn test_missing_alias_fails_closed() {
        let keystore = MemoryKeystore::new();
        let err = keystore
            .init_cipher(&KeyAlias::master(), CipherOp::Encrypt)
            .err()
            .unwrap();
        assert!(matches!(err, crate::Error::Keystore(KeystoreError::KeyNotFound(_))));
    }

    #[test]
    fn test_secure_module_rejected_without_hardware() {
        let keystore = MemoryKeystore::new();
        let spec = KeyGenPolicy::default().spec(&KeyAlias::store(), true, KeyGating::None);
        let err = keystore.generate_key(&spec).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Keystore(KeystoreError::SecureModuleRejected(_))
        ));
        assert!(!keystore.contains_alias(&KeyAlias::store()).unwrap());
    }

    #[test]
    fn test_gated_key_requires_authorization() {
        let keystore = MemoryKeystore::with_biometrics();
        let alias = KeyAlias::master();
        let gating = KeyGenPolicy::default().biometric_gating(true);
        keystore
            .generate_key(&KeyGenPolicy::default().spec(&alias, false, gating))
            .unwrap();

        let enc = keystore.init_cipher(&alias, CipherOp::Encrypt).unwrap();
        assert!(enc.requires_authentication());
        let err = enc.do_final(b"x").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Keystore(KeystoreError::AuthorizationRequired(_))
        ));

        let mut enc = keystore.init_cipher(&alias, CipherOp::Encrypt).unwrap();
        enc.grant_authorization();
        assert!(!enc.requires_authentication());
        assert!(enc.do_final(b"x").is_ok());
    }

    #[test]
    fn test_validity_window_reuses_authorization() {
        let keystore = MemoryKeystore::with_biometrics();
        let alias = KeyAlias::master();
        let gating = KeyGenPolicy::default().biometric_gating(false);
        keystore
            .generate_key(&KeyGenPolicy::default().spec(&alias, false, gating))
            .unwrap();

        let mut first = keystore.init_cipher(&alias, CipherOp::Encrypt).unwrap();
        assert!(first.requires_authentication());
        first.grant_authorization();
        first.do_final(b"x").unwrap();

        // Within the 30s window the next operation needs no challenge
        let second = keystore.init_cipher(&alias, CipherOp::Encrypt).unwrap();
        assert!(!second.requires_authentication());
    }

    #[test]
    fn test_regeneration_invalidates_old_ciphertext() {
        let keystore = MemoryKeystore::new();
        let alias = KeyAlias::master();
        keystore.generate_key(&plain_spec(&alias)).unwrap();
        let first_gen = keystore.key_info(&alias).unwrap().unwrap().generation;

        let enc = keystore.init_cipher(&alias, CipherOp::Encrypt).unwrap();
        let nonce = enc.nonce();
        let ciphertext = enc.do_final(b"seed").unwrap();

        keystore.generate_key(&plain_spec(&alias)).unwrap();
        assert_ne!(keystore.key_info(&alias).unwrap().unwrap().generation, first_gen);

        let dec = keystore
            .init_cipher(&alias, CipherOp::Decrypt { nonce })
            .unwrap();
        assert!(dec.do_final(&ciphertext).is_err());
    }

    #[test]
    fn test_unavailable_keystore() {
        let keystore = MemoryKeystore::new();
        keystore.set_available(false);
        assert!(matches!(
            keystore.contains_alias(&KeyAlias::store()),
            Err(crate::Error::Keystore(KeystoreError::Unavailable(_)))
        ));
    }
}
