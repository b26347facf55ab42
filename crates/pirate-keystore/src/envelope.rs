//! Envelope cipher and sealed blob layout
//!
//! Sealed blob format: `[nonce(12)][ciphertext || tag(16)]`.
//! The keystore chooses the nonce for every encryption; the blob carries it so
//! decryption can re-initialize the cipher.

use crate::keystore::{BoxedCipher, CipherOp, HardwareKeystore};
use crate::{KeyAlias, KeystoreError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// GCM nonce length
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// Shortest blob accepted for unsealing
pub const MIN_SEALED_LEN: usize = NONCE_LEN + 1;

/// Nonce + ciphertext + tag produced by [`EnvelopeCipher`]
#[derive(Clone, PartialEq, Eq)]
pub struct SealedBlob(Vec<u8>);

impl SealedBlob {
    /// Parse raw bytes, rejecting anything shorter than [`MIN_SEALED_LEN`]
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < MIN_SEALED_LEN {
            return Err(KeystoreError::CorruptBlob(format!(
                "sealed blob too short: {} bytes (minimum {})",
                bytes.len(),
                MIN_SEALED_LEN
            ))
            .into());
        }
        Ok(Self(bytes))
    }

    /// Assemble from a nonce and `ciphertext || tag`
    pub fn from_parts(nonce: [u8; NONCE_LEN], ciphertext: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        bytes.extend_from_slice(&nonce);
        bytes.extend_from_slice(ciphertext);
        Self(bytes)
    }

    /// Decode from the base64 form used in string-keyed stores
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| KeystoreError::CorruptBlob(format!("invalid base64: {}", e)))?;
        Self::from_bytes(bytes)
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Nonce prefix
    pub fn nonce(&self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&self.0[..NONCE_LEN]);
        nonce
    }

    /// `ciphertext || tag`
    pub fn ciphertext(&self) -> &[u8] {
        &self.0[NONCE_LEN..]
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Total length
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Never true for a parsed blob; present for API completeness
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SealedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedBlob").field("len", &self.0.len()).finish()
    }
}

/// AES-256-GCM seal/unseal over keystore-held keys.
///
/// Each operation is split in two halves so a biometric gate can authorize
/// the pending cipher in between. [`Self::seal`] and [`Self::unseal`] run
/// both halves for keys that need no challenge.
#[derive(Clone)]
pub struct EnvelopeCipher {
    keystore: Arc<dyn HardwareKeystore>,
}

impl EnvelopeCipher {
    /// Create over a keystore
    pub fn new(keystore: Arc<dyn HardwareKeystore>) -> Self {
        Self { keystore }
    }

    /// Initialize an encrypt cipher for `alias`
    pub fn begin_seal(&self, alias: &KeyAlias) -> Result<BoxedCipher> {
        self.keystore.init_cipher(alias, CipherOp::Encrypt)
    }

    /// Encrypt `plaintext` with an initialized (and, if needed, authorized) cipher
    pub fn finish_seal(cipher: BoxedCipher, plaintext: &[u8]) -> Result<SealedBlob> {
        let nonce = cipher.nonce();
        let ciphertext = cipher.do_final(plaintext)?;
        Ok(SealedBlob::from_parts(nonce, &ciphertext))
    }

    /// Initialize a decrypt cipher for `blob` under `alias`
    pub fn begin_unseal(&self, alias: &KeyAlias, blob: &SealedBlob) -> Result<BoxedCipher> {
        self.keystore
            .init_cipher(alias, CipherOp::Decrypt { nonce: blob.nonce() })
    }

    /// Decrypt `blob` with an initialized (and, if needed, authorized) cipher
    pub fn finish_unseal(cipher: BoxedCipher, blob: &SealedBlob) -> Result<Zeroizing<Vec<u8>>> {
        if cipher.nonce() != blob.nonce() {
            let mismatch = KeystoreError::Cipher("cipher nonce does not match blob".to_string());
            return Err(mismatch.into());
        }
        cipher.do_final(blob.ciphertext()).map(Zeroizing::new)
    }

    /// Seal with a key that requires no user challenge
    pub fn seal(&self, alias: &KeyAlias, plaintext: &[u8]) -> Result<SealedBlob> {
        Self::finish_seal(self.begin_seal(alias)?, plaintext)
    }

    /// Unseal with a key that requires no user challenge
    pub fn unseal(&self, alias: &KeyAlias, blob: &SealedBlob) -> Result<Zeroizing<Vec<u8>>> {
        Self::finish_unseal(self.begin_unseal(alias, blob)?, blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{KeyGating, KeyGenPolicy};
    use crate::keystore::MemoryKeystore;

    fn cipher_with_store_key() -> EnvelopeCipher {
        let keystore = MemoryKeystore::new();
        keystore
            .generate_key(&KeyGenPolicy::default().spec(&KeyAlias::store(), false, KeyGating::None))
            .unwrap();
        EnvelopeCipher::new(Arc::new(keystore))
    }

    #[test]
    fn test_blob_layout() {
        let envelope = cipher_with_store_key();
        let blob = envelope.seal(&KeyAlias::store(), b"hello").unwrap();
        assert_eq!(blob.len(), NONCE_LEN + 5 + TAG_LEN);
        assert_eq!(blob.ciphertext().len(), 5 + TAG_LEN);
    }

    #[test]
    fn test_seal_unseal() {
        let envelope = cipher_with_store_key();
        let blob = envelope.seal(&KeyAlias::store(), b"hello").unwrap();
        let plaintext = envelope.unseal(&KeyAlias::store(), &blob).unwrap();
        assert_eq!(plaintext.as_slice(), b"hello");
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let envelope = cipher_with_store_key();
        let a = envelope.seal(&KeyAlias::store(), b"same").unwrap();
        let b = envelope.seal(&KeyAlias::store(), b"same").unwrap();
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a, b);
    }

    #[test]
    fn test_undersized_blob_rejected() {
        let err = SealedBlob::from_bytes(vec![0u8; 12]).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Keystore(KeystoreError::CorruptBlob(_))
        ));
        assert!(SealedBlob::from_bytes(vec![0u8; 13]).is_ok());
    }

    #[test]
    fn test_tampered_blob_fails_closed() {
        let envelope = cipher_with_store_key();
        let blob = envelope.seal(&KeyAlias::store(), b"hello").unwrap();
        let mut bytes = blob.as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = SealedBlob::from_bytes(bytes).unwrap();
        assert!(matches!(
            envelope.unseal(&KeyAlias::store(), &tampered),
            Err(crate::Error::Keystore(KeystoreError::Cipher(_)))
        ));
    }

    #[test]
    fn test_wrong_alias_fails_closed() {
        let envelope = cipher_with_store_key();
        let blob = envelope.seal(&KeyAlias::store(), b"hello").unwrap();
        assert!(envelope.unseal(&KeyAlias::master(), &blob).is_err());
    }

    #[test]
    fn test_base64_form() {
        let envelope = cipher_with_store_key();
        let blob = envelope.seal(&KeyAlias::store(), b"hello").unwrap();
        let decoded = SealedBlob::from_base64(&blob.to_base64()).unwrap();
        assert_eq!(decoded, blob);
        assert!(SealedBlob::from_base64("AAAA").is_err());
    }
}
