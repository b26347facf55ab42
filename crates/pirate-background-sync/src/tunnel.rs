//! Privacy-preserving network tunnel selection for background sync
//!
//! Every sync attempt takes an immutable [`TunnelConfig`] snapshot before it
//! calls the wallet engine, so a settings change mid-run cannot alter the
//! routing of an attempt already in flight.

use crate::Result;
use pirate_keystore::{keys, PreferenceStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Network path for wallet engine traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    /// Tor (anonymity network)
    Tor,
    /// SOCKS5 proxy
    Socks5,
    /// Direct connection (not recommended for privacy)
    Direct,
}

impl TunnelMode {
    /// Persisted / wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelMode::Tor => "tor",
            TunnelMode::Socks5 => "socks5",
            TunnelMode::Direct => "direct",
        }
    }

    /// Parse a persisted name
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tor" | "anonymity" => Some(TunnelMode::Tor),
            "socks5" | "proxy" => Some(TunnelMode::Socks5),
            "direct" => Some(TunnelMode::Direct),
            _ => None,
        }
    }
}

impl fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunnel snapshot for one sync attempt
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Network path
    pub mode: TunnelMode,
    /// Proxy URL for [`TunnelMode::Socks5`], credentials included
    pub proxy_url: Option<String>,
}

impl TunnelConfig {
    /// Tor
    pub fn tor() -> Self {
        Self {
            mode: TunnelMode::Tor,
            proxy_url: None,
        }
    }

    /// SOCKS5 proxy; `None` leaves the engine to report the missing endpoint
    pub fn socks5(proxy_url: Option<String>) -> Self {
        Self {
            mode: TunnelMode::Socks5,
            proxy_url,
        }
    }

    /// Direct connection
    pub fn direct() -> Self {
        Self {
            mode: TunnelMode::Direct,
            proxy_url: None,
        }
    }

    /// Check if tunnel is privacy-preserving
    pub fn is_privacy_preserving(&self) -> bool {
        self.mode != TunnelMode::Direct
    }

    /// Proxy URL safe for logs
    pub fn redacted_proxy_url(&self) -> Option<String> {
        self.proxy_url.as_deref().map(redact_proxy_url)
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self::tor()
    }
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("mode", &self.mode)
            .field("proxy_url", &self.redacted_proxy_url())
            .finish()
    }
}

/// Replace URL credentials with `***`
pub fn redact_proxy_url(url: &str) -> String {
    if let Some(scheme_pos) = url.find("://") {
        let auth_start = scheme_pos + 3;
        if let Some(at_pos) = url[auth_start..].rfind('@') {
            let at_pos = auth_start + at_pos;
            return format!("{}***@{}", &url[..auth_start], &url[at_pos + 1..]);
        }
    }
    url.to_string()
}

/// Reads the persisted tunnel selection
#[derive(Clone)]
pub struct TunnelConfigResolver {
    prefs: Arc<dyn PreferenceStore>,
}

impl TunnelConfigResolver {
    /// Create resolver over the preference store
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        Self { prefs }
    }

    /// Snapshot the current selection.
    ///
    /// Missing, unknown or unreadable settings resolve to Tor.
    pub fn resolve(&self) -> TunnelConfig {
        let mode = match self.prefs.get_string(keys::TUNNEL_MODE) {
            Ok(Some(value)) => TunnelMode::parse(&value).unwrap_or_else(|| {
                warn!("Unknown tunnel mode '{}', using Tor", value);
                TunnelMode::Tor
            }),
            Ok(None) => TunnelMode::Tor,
            Err(e) => {
                warn!("Tunnel settings unreadable ({}), using Tor", e);
                return TunnelConfig::tor();
            }
        };

        let config = match mode {
            TunnelMode::Tor => TunnelConfig::tor(),
            TunnelMode::Direct => TunnelConfig::direct(),
            TunnelMode::Socks5 => {
                let url = match self.prefs.get_string(keys::PROXY_URL) {
                    Ok(url) => url.filter(|u| !u.trim().is_empty()),
                    Err(e) => {
                        warn!("Proxy URL unreadable: {}", e);
                        None
                    }
                };
                TunnelConfig::socks5(url)
            }
        };

        if !config.is_privacy_preserving() {
            warn!("Direct connection mode - privacy not guaranteed");
        }
        debug!("Resolved tunnel {:?}", config);
        config
    }

    /// Persist a selection
    pub fn persist(&self, config: &TunnelConfig) -> Result<()> {
        self.prefs.set_string(keys::TUNNEL_MODE, config.mode.as_str())?;
        match &config.proxy_url {
            Some(url) => self.prefs.set_string(keys::PROXY_URL, url)?,
            None => self.prefs.remove(keys::PROXY_URL)?,
        }
        Ok(())
    }
}
