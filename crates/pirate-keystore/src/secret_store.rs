//! Named secret persistence
//!
//! Sealed values are stored base64-encoded in a simple string-keyed store.
//! Entries are created on store, overwritten on re-store and removed on
//! delete; nothing expires implicitly.

use crate::envelope::SealedBlob;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Entry id under which the biometric-unlock copy of the master secret is cached
pub const WRAPPED_MASTER_SECRET_ID: &str = "wrapped_master_secret";

/// `(keyId, sealedValue)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSecret {
    /// Caller-chosen identifier
    pub key_id: String,
    /// Sealed value
    pub sealed: SealedBlob,
}

/// String-keyed store for sealed values
pub trait SecretStore: Send + Sync {
    /// Read the raw stored string
    fn read(&self, key_id: &str) -> Result<Option<String>>;

    /// Write (or overwrite) the stored string
    fn write(&self, key_id: &str, value: &str) -> Result<()>;

    /// Remove the entry (no-op if absent)
    fn remove(&self, key_id: &str) -> Result<()>;

    /// Load a named secret, parsing the sealed blob
    fn load(&self, key_id: &str) -> Result<Option<NamedSecret>> {
        match self.read(key_id)? {
            Some(encoded) => Ok(Some(NamedSecret {
                key_id: key_id.to_string(),
                sealed: SealedBlob::from_base64(&encoded)?,
            })),
            None => Ok(None),
        }
    }

    /// Persist a named secret
    fn save(&self, secret: &NamedSecret) -> Result<()> {
        self.write(&secret.key_id, &secret.sealed.to_base64())
    }
}

/// In-memory secret store
pub struct MemorySecretStore {
    entries: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemorySecretStore {
    /// Create empty store
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for MemorySecretStore {
    fn read(&self, key_id: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key_id).cloned())
    }

    fn write(&self, key_id: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(Error::SecretStore(format!("write rejected for {}", key_id)));
        }
        self.entries
            .write()
            .insert(key_id.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key_id: &str) -> Result<()> {
        self.entries.write().remove(key_id);
        Ok(())
    }
}
