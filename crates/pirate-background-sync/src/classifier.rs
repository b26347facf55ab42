//! Sync failure taxonomy
//!
//! Engine failures are categorized by their code first. Unrecognized codes
//! fall back to matching the failure text word by word, case-insensitively,
//! in priority order: anonymity network, proxy, generic transport, then
//! everything else.

use crate::engine::{codes, EngineError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of sync failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Tor circuit failure
    AnonymityNetworkFailure,
    /// SOCKS5 proxy failure
    ProxyFailure,
    /// Other transport or tunnel failure
    GenericNetworkFailure,
    /// Anything else
    Unknown,
}

impl ErrorCategory {
    /// Attempts allowed before the failure becomes terminal
    pub fn max_retries(&self) -> u32 {
        match self {
            ErrorCategory::AnonymityNetworkFailure => 3,
            ErrorCategory::ProxyFailure => 2,
            ErrorCategory::GenericNetworkFailure => 3,
            ErrorCategory::Unknown => 3,
        }
    }

    /// Whether another attempt is allowed after attempt number `attempt` (0-based)
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries()
    }

    /// Stable name used in failure payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::AnonymityNetworkFailure => "anonymity_network_failure",
            ErrorCategory::ProxyFailure => "proxy_failure",
            ErrorCategory::GenericNetworkFailure => "generic_network_failure",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Terminal-failure notification title
    pub fn notification_title(&self) -> &'static str {
        match self {
            ErrorCategory::AnonymityNetworkFailure => "Tor connection failed",
            ErrorCategory::ProxyFailure => "Proxy connection failed",
            ErrorCategory::GenericNetworkFailure | ErrorCategory::Unknown => "Sync failed",
        }
    }

    /// Terminal-failure notification body
    pub fn notification_text(&self) -> &'static str {
        match self {
            ErrorCategory::AnonymityNetworkFailure => {
                "Background sync could not reach the network over Tor. Tor may be disabled or \
                 unreachable. Open Pirate Wallet to check your privacy settings."
            }
            ErrorCategory::ProxyFailure => "Could not connect through your proxy.",
            ErrorCategory::GenericNetworkFailure => "Could not connect. Will retry later.",
            ErrorCategory::Unknown => "Background sync stopped. Will retry later.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw failure with its category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Category
    pub category: ErrorCategory,
    /// Original failure text
    pub message: String,
}

/// How a signal matches one word of the failure text
#[derive(Clone, Copy)]
enum Signal {
    /// Whole word only ("tor" must not hit "history" or "store")
    Word(&'static str),
    /// Word prefix ("socks" hits "socks5")
    Stem(&'static str),
}

impl Signal {
    fn matches(self, word: &str) -> bool {
        match self {
            Signal::Word(w) => word == w,
            Signal::Stem(stem) => word.starts_with(stem),
        }
    }
}

const ANONYMITY_SIGNALS: &[Signal] = &[Signal::Word("tor"), Signal::Stem("anonymity")];
const PROXY_SIGNALS: &[Signal] = &[Signal::Stem("socks"), Signal::Stem("proxy")];
const NETWORK_SIGNALS: &[Signal] = &[
    Signal::Stem("network"),
    Signal::Stem("transport"),
    Signal::Stem("tunnel"),
    Signal::Stem("connection"),
];

/// Map a raw failure text to its category
pub fn classify(raw: &str) -> ClassifiedError {
    let lowered = raw.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let matches = |signals: &[Signal]| {
        signals
            .iter()
            .any(|signal| words.iter().any(|word| signal.matches(word)))
    };

    let category = if matches(ANONYMITY_SIGNALS) {
        ErrorCategory::AnonymityNetworkFailure
    } else if matches(PROXY_SIGNALS) {
        ErrorCategory::ProxyFailure
    } else if matches(NETWORK_SIGNALS) {
        ErrorCategory::GenericNetworkFailure
    } else {
        ErrorCategory::Unknown
    };

    ClassifiedError {
        category,
        message: raw.to_string(),
    }
}

/// Map an engine failure to its category, trusting a known code over the text
pub fn classify_engine_error(error: &EngineError) -> ClassifiedError {
    let category = match error.code.as_str() {
        codes::ANONYMITY_NETWORK_CONNECTION_FAILED => ErrorCategory::AnonymityNetworkFailure,
        codes::PROXY_CONNECTION_FAILED => ErrorCategory::ProxyFailure,
        codes::NETWORK_ERROR => ErrorCategory::GenericNetworkFailure,
        _ => return classify(&error.to_string()),
    };

    ClassifiedError {
        category,
        message: error.to_string(),
    }
}
