//! Key aliases and key generation policy
//!
//! An alias's gating requirement is fixed when the key is generated. Changing
//! it means generating a new key under the same alias and resealing the data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Alias prefix shared by all wallet keys
pub const KEYSTORE_ALIAS_PREFIX: &str = "pirate_wallet_";

/// Opaque identifier for a hardware-backed symmetric key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyAlias(String);

impl KeyAlias {
    /// Create an alias from an arbitrary name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// General-purpose key wrapping named secrets
    pub fn store() -> Self {
        Self(format!("{}store", KEYSTORE_ALIAS_PREFIX))
    }

    /// Key wrapping the wallet master secret (optionally biometric-gated)
    pub fn master() -> Self {
        Self(format!("{}master", KEYSTORE_ALIAS_PREFIX))
    }

    /// Alias as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticators accepted for a gated key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticators {
    /// Class 3 (strong) biometrics
    pub biometric_strong: bool,
    /// PIN / pattern / password
    pub device_credential: bool,
}

impl Authenticators {
    /// Strong biometric OR device credential
    pub const STRONG_OR_CREDENTIAL: Authenticators = Authenticators {
        biometric_strong: true,
        device_credential: true,
    };
}

/// How long a successful challenge authorizes the key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthValidity {
    /// Every cipher operation needs its own challenge
    PerOperation,
    /// Any challenge unlocks the key for a fixed window
    Window(Duration),
}

/// Authentication requirement attached to a key at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyGating {
    /// Usable without user presence
    None,
    /// Usable only after a biometric / device-credential challenge
    UserAuthentication {
        /// Accepted authenticators
        authenticators: Authenticators,
        /// Authorization lifetime
        validity: AuthValidity,
    },
}

impl KeyGating {
    /// Whether this gating involves a user challenge
    pub fn requires_user_auth(&self) -> bool {
        matches!(self, KeyGating::UserAuthentication { .. })
    }
}

/// Block mode requested for generated keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockMode {
    /// Galois/Counter Mode
    Gcm,
}

/// Padding requested for generated keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    /// No padding (GCM is a stream mode)
    None,
}

/// Parameters for one key generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenSpec {
    /// Alias to generate under (replaces any existing key)
    pub alias: KeyAlias,
    /// Key size in bits
    pub key_size_bits: u16,
    /// Block mode
    pub block_mode: BlockMode,
    /// Padding
    pub padding: Padding,
    /// Request secure hardware module backing
    pub secure_module_backed: bool,
    /// User authentication requirement
    pub gating: KeyGating,
}

/// Key generation policy shared by all aliases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyGenPolicy {
    /// Key size in bits
    pub key_size_bits: u16,
    /// Ask for secure module backing when the device has one
    pub prefer_secure_module: bool,
    /// Validity window used when per-operation authorization is unsupported
    pub fallback_validity: Duration,
}

impl KeyGenPolicy {
    /// Validity window used on platforms without per-operation auth parameters
    pub const DEFAULT_FALLBACK_VALIDITY_SECS: u64 = 30;

    /// Build a generation spec for `alias`
    pub fn spec(
        &self,
        alias: &KeyAlias,
        secure_module_backed: bool,
        gating: KeyGating,
    ) -> KeyGenSpec {
        KeyGenSpec {
            alias: alias.clone(),
            key_size_bits: self.key_size_bits,
            block_mode: BlockMode::Gcm,
            padding: Padding::None,
            secure_module_backed,
            gating,
        }
    }

    /// Gating for a biometric-required key on a platform with or without
    /// per-operation authorization parameters
    pub fn biometric_gating(&self, per_operation_supported: bool) -> KeyGating {
        let validity = if per_operation_supported {
            AuthValidity::PerOperation
        } else {
            AuthValidity::Window(self.fallback_validity)
        };
        KeyGating::UserAuthentication {
            authenticators: Authenticators::STRONG_OR_CREDENTIAL,
            validity,
        }
    }
}

impl Default for KeyGenPolicy {
    fn default() -> Self {
        Self {
            key_size_bits: 256,
            prefer_secure_module: true,
            fallback_validity: Duration::from_secs(Self::DEFAULT_FALLBACK_VALIDITY_SECS),
        }
    }
}
