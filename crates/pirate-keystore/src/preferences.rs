//! Persisted preference substrate
//!
//! Two independent stores:
//! - the primary, encrypted-at-rest key-value store (biometric flag, tunnel
//!   settings, last-sync timestamps, active wallet id), and
//! - a plain fallback file holding only the biometric flag, read when the
//!   primary store is unavailable.

use crate::{Error, Result};
use directories::ProjectDirs;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Preference key names shared by both subsystems
pub mod keys {
    /// Biometric gating flag (`"true"` / `"false"`)
    pub const BIOMETRICS_ENABLED: &str = "biometrics_enabled";
    /// Tunnel mode (`"tor"`, `"socks5"`, `"direct"`)
    pub const TUNNEL_MODE: &str = "tunnel_mode";
    /// SOCKS5 proxy URL, credentials included
    pub const PROXY_URL: &str = "tunnel_proxy_url";
    /// Unix seconds of the last successful compact sync
    pub const LAST_COMPACT_SYNC: &str = "last_compact_sync";
    /// Unix seconds of the last successful deep sync
    pub const LAST_DEEP_SYNC: &str = "last_deep_sync";
    /// Pinned wallet for background sync
    pub const ACTIVE_WALLET_ID: &str = "active_wallet_id";
    /// Last wallet picked by round-robin selection
    pub const BG_SYNC_CURSOR: &str = "bg_rr_cursor";
}

/// Fallback file name under `<support-dir>/prefs/`
pub const BIOMETRIC_FALLBACK_FILE: &str = "biometrics_enabled.txt";

/// Primary preference store
pub trait PreferenceStore: Send + Sync {
    /// Read a string value
    fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value
    fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value
    fn remove(&self, key: &str) -> Result<()>;

    /// Read a boolean stored as `"true"` / `"false"`
    fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.get_string(key)?.and_then(|v| parse_bool(&v)))
    }

    /// Write a boolean
    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_string(key, if value { "true" } else { "false" })
    }

    /// Read an integer
    fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get_string(key)?.and_then(|v| v.trim().parse().ok()))
    }

    /// Write an integer
    fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set_string(key, &value.to_string())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// In-memory preference store with an availability switch
pub struct MemoryPreferenceStore {
    values: RwLock<HashMap<String, String>>,
    available: AtomicBool,
}

impl MemoryPreferenceStore {
    /// Create empty store
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the encrypted store failing to open (or recovering)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::Preference("preference store unavailable".to_string()))
        }
    }
}

impl Default for MemoryPreferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.ensure_available()?;
        Ok(self.values.read().get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_available()?;
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.ensure_available()?;
        self.values.write().remove(key);
        Ok(())
    }
}

/// Application support directory
pub fn support_dir() -> Result<PathBuf> {
    ProjectDirs::from("com", "Pirate", "PirateWallet")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| {
            Error::Preference("cannot resolve application support directory".to_string())
        })
}

/// Plain-text fallback copy of the biometric flag
#[derive(Debug, Clone)]
pub struct FallbackFlagFile {
    path: PathBuf,
}

impl FallbackFlagFile {
    /// File at `<support_dir>/prefs/biometrics_enabled.txt`
    pub fn in_support_dir(support_dir: &Path) -> Self {
        Self {
            path: support_dir.join("prefs").join(BIOMETRIC_FALLBACK_FILE),
        }
    }

    /// File under the platform support directory
    pub fn default_location() -> Result<Self> {
        Ok(Self::in_support_dir(&support_dir()?))
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the flag; `None` if the file is missing or holds anything else
    pub fn read(&self) -> Result<Option<bool>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(parse_bool(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the flag, creating `prefs/` if needed
    pub fn write(&self, value: bool) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, if value { "true" } else { "false" })?;
        Ok(())
    }
}
