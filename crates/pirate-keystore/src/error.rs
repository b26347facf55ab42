//! Error types
//!
//! Keystore and cipher failures are always fatal to the calling operation and
//! are never retried silently. Authentication failures are surfaced separately
//! so the unlock and settings flows can decide whether to re-prompt.

/// Hardware keystore errors
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    /// Keystore is not reachable on this device
    #[error("Keystore unavailable: {0}")]
    Unavailable(String),

    /// No key exists under the requested alias
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Sealed blob is malformed or undersized
    #[error("Corrupt sealed blob: {0}")]
    CorruptBlob(String),

    /// Cipher operation failed (includes authentication tag mismatch)
    #[error("Cipher error: {0}")]
    Cipher(String),

    /// Key generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Secure hardware module refused the requested key parameters
    #[error("Secure hardware module rejected key parameters: {0}")]
    SecureModuleRejected(String),

    /// Cipher used before the user authorized it
    #[error("Key {0} requires user authentication")]
    AuthorizationRequired(String),
}

/// Why a biometric / device-credential challenge did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    /// User dismissed the prompt
    Cancelled,
    /// Too many attempts, temporary lockout
    LockedOut,
    /// Too many attempts, device credential required to unlock biometrics
    LockedOutPermanent,
    /// No biometric or device credential enrolled
    NoneEnrolled,
    /// Sensor missing or busy
    HardwareUnavailable,
    /// Credential not recognized
    Failed,
    /// Prompt timed out
    Timeout,
}

/// Biometric challenge rejected, cancelled or locked out
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Authentication failed ({reason:?}): {message}")]
pub struct AuthError {
    /// Rejection reason reported by the platform
    pub reason: AuthFailureReason,
    /// Platform message, suitable for inline display
    pub message: String,
}

impl AuthError {
    /// Create a new authentication error
    pub fn new(reason: AuthFailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// User backed out of the prompt (as opposed to the platform refusing it)
    pub fn is_user_cancellation(&self) -> bool {
        self.reason == AuthFailureReason::Cancelled
    }

    /// Re-prompting cannot succeed until the lockout clears
    pub fn is_lockout(&self) -> bool {
        matches!(
            self.reason,
            AuthFailureReason::LockedOut | AuthFailureReason::LockedOutPermanent
        )
    }
}

/// Key sealing errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Keystore error
    #[error(transparent)]
    Keystore(#[from] KeystoreError),

    /// Authentication error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Preference store error
    #[error("Preference error: {0}")]
    Preference(String),

    /// Secret store error
    #[error("Secret store error: {0}")]
    SecretStore(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this is a keystore failure
    pub fn is_keystore(&self) -> bool {
        matches!(self, Error::Keystore(_))
    }

    /// Returns the authentication failure, if any
    pub fn as_auth(&self) -> Option<&AuthError> {
        match self {
            Error::Auth(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
