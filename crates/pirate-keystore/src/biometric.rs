//! Biometric / device-credential gate
//!
//! A gate presents one modal challenge bound to one pending cipher operation
//! and resolves exactly once. Platform implementations must run the prompt on
//! the UI-capable execution context. No retry logic lives here.

use crate::keystore::BoxedCipher;
use crate::{AuthError, AuthFailureReason, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use zeroize::Zeroizing;

/// Text shown on the authentication prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPrompt {
    /// Prompt title
    pub title: String,
    /// Prompt subtitle
    pub subtitle: String,
}

impl AuthPrompt {
    /// Create a prompt
    pub fn new(title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: subtitle.into(),
        }
    }

    /// Prompt used when unlocking the master secret
    pub fn unlock() -> Self {
        Self::new("Unlock Pirate Wallet", "Authenticate to access your wallet keys")
    }

    /// Prompt used when (re)sealing the master secret
    pub fn protect() -> Self {
        Self::new("Protect Pirate Wallet", "Authenticate to secure your wallet keys")
    }
}

/// A cipher the user has authorized; consumed by one operation
pub struct AuthorizedCipher {
    cipher: BoxedCipher,
}

impl AuthorizedCipher {
    /// Wrap a cipher after the platform confirmed the challenge
    pub fn grant(mut cipher: BoxedCipher) -> Self {
        cipher.grant_authorization();
        Self { cipher }
    }

    /// Unwrap for finalization
    pub fn into_inner(self) -> BoxedCipher {
        self.cipher
    }
}

/// Presents a challenge bound to a pending cipher operation
#[async_trait]
pub trait BiometricGate: Send + Sync {
    /// Show the prompt and resolve with the authorized cipher or the
    /// platform's rejection reason
    async fn authenticate(
        &self,
        prompt: &AuthPrompt,
        cipher: BoxedCipher,
    ) -> std::result::Result<AuthorizedCipher, AuthError>;
}

/// Gate with pre-scripted outcomes, for tests and headless platforms.
///
/// Outcomes are consumed in order; once the script is exhausted every
/// challenge succeeds.
pub struct ScriptedBiometricGate {
    script: Mutex<VecDeque<std::result::Result<(), AuthError>>>,
    prompts: Mutex<Vec<AuthPrompt>>,
}

impl ScriptedBiometricGate {
    /// Gate that approves every challenge
    pub fn approving() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a rejection for the next challenge
    pub fn reject_next(&self, reason: AuthFailureReason, message: &str) {
        self.script
            .lock()
            .push_back(Err(AuthError::new(reason, message)));
    }

    /// Queue an approval for the next challenge
    pub fn approve_next(&self) {
        self.script.lock().push_back(Ok(()));
    }

    /// Number of challenges presented so far
    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Prompts presented so far
    pub fn prompts(&self) -> Vec<AuthPrompt> {
        self.prompts.lock().clone()
    }
}

impl Default for ScriptedBiometricGate {
    fn default() -> Self {
        Self::approving()
    }
}

#[async_trait]
impl BiometricGate for ScriptedBiometricGate {
    async fn authenticate(
        &self,
        prompt: &AuthPrompt,
        cipher: BoxedCipher,
    ) -> std::result::Result<AuthorizedCipher, AuthError> {
        self.prompts.lock().push(prompt.clone());
        let outcome = self.script.lock().pop_front().unwrap_or(Ok(()));
        outcome.map(|()| AuthorizedCipher::grant(cipher))
    }
}

/// Finalize `cipher`, challenging the user first when the key demands it
pub(crate) async fn run_gated(
    gate: &dyn BiometricGate,
    prompt: &AuthPrompt,
    cipher: BoxedCipher,
    input: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = if cipher.requires_authentication() {
        tracing::debug!("Key {} requires user authentication", cipher.alias());
        gate.authenticate(prompt, cipher).await?.into_inner()
    } else {
        cipher
    };
    cipher.do_final(input).map(Zeroizing::new)
}
