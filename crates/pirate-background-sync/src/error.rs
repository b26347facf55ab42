//! Error types for background sync

use crate::engine::EngineError;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wallet engine rejected the request outright
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Preference store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Work platform refused a request
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Every known wallet is busy
    #[error("No wallets available for background sync")]
    NoWallets,

    /// JSON encoding/decoding
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation cancelled
    #[error("Cancelled")]
    Cancelled,
}

impl From<pirate_keystore::Error> for Error {
    fn from(e: pirate_keystore::Error) -> Self {
        Error::Storage(format!("{}", e))
    }
}
