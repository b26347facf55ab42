//! Hardware-backed key sealing for Pirate Wallet
//!
//! Seals wallet secrets with AES-256-GCM keys that never leave the platform
//! keystore, and coordinates the user's biometric preference with the master
//! key's authentication policy.
//!
//! ## Keys
//!
//! - **Store key** (`pirate_wallet_store`): seals named secrets, never gated
//! - **Master key** (`pirate_wallet_master`): seals the wallet master secret,
//!   optionally gated by biometrics or device credential
//!
//! Both prefer the secure hardware module (StrongBox / Secure Enclave) and
//! fall back to the baseline hardware store when the module refuses.
//!
//! ## Sealed blob
//!
//! `[nonce(12)][ciphertext || tag(16)]`, base64-encoded at rest.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod alias;
pub mod biometric;
pub mod biometric_pref;
pub mod envelope;
pub mod error;
pub mod keystore;
pub mod preferences;
pub mod sealing;
pub mod secret_store;

pub use alias::{
    AuthValidity, Authenticators, BlockMode, KeyAlias, KeyGating, KeyGenPolicy, KeyGenSpec,
    Padding, KEYSTORE_ALIAS_PREFIX,
};
pub use biometric::{AuthPrompt, AuthorizedCipher, BiometricGate, ScriptedBiometricGate};
pub use biometric_pref::{BiometricPreferenceCoordinator, BiometricState, BiometricStatus};
pub use envelope::{EnvelopeCipher, SealedBlob, MIN_SEALED_LEN, NONCE_LEN, TAG_LEN};
pub use error::{AuthError, AuthFailureReason, Error, KeystoreError, Result};
pub use keystore::{
    BiometricType, BoxedCipher, CipherOp, HardwareKeystore, KeyInfo, KeystoreCapabilities,
    KeystoreCipher, MemoryKeystore, Platform,
};
pub use preferences::{keys, FallbackFlagFile, MemoryPreferenceStore, PreferenceStore};
pub use sealing::{KeySealingService, SealingCapabilities};
pub use secret_store::{MemorySecretStore, NamedSecret, SecretStore, WRAPPED_MASTER_SECRET_ID};
