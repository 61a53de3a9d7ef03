//! AES-256-GCM sealing for credential tokens at rest.
//!
//! Payload layout: `version (1) | nonce (12) | ciphertext + tag`. The credential identity and
//! provider are bound as associated data, so a token copied onto another credential row fails
//! to open.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_SEALED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_SEALED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("unsupported token payload version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("sealed token payload is truncated")]
    Truncated,
}

/// 32-byte key wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey([REDACTED])")
    }
}

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(CryptoKey(bytes))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

fn associated_data(identity: &str, provider: &str) -> Vec<u8> {
    format!("{identity}|{provider}").into_bytes()
}

/// Encrypts a token for the credential identified by `identity`/`provider`.
pub fn seal_token(
    key: &CryptoKey,
    identity: &str,
    provider: &str,
    token: &str,
) -> Result<Vec<u8>, CryptoError> {
    let aad = associated_data(identity, provider);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = key
        .cipher()
        .encrypt(
            &nonce,
            Payload {
                msg: token.as_bytes(),
                aad: &aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    sealed.push(VERSION_SEALED);
    sealed.extend_from_slice(&nonce);
    sealed.append(&mut ciphertext);
    Ok(sealed)
}

/// Decrypts a token sealed by [`seal_token`] for the same identity and provider.
pub fn open_token(
    key: &CryptoKey,
    identity: &str,
    provider: &str,
    sealed: &[u8],
) -> Result<String, CryptoError> {
    let Some(&version) = sealed.first() else {
        return Err(CryptoError::Truncated);
    };
    if version != VERSION_SEALED {
        return Err(CryptoError::UnsupportedVersion(version));
    }
    if sealed.len() < MIN_SEALED_LEN {
        return Err(CryptoError::Truncated);
    }

    let nonce = Nonce::from_slice(&sealed[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let aad = associated_data(identity, provider);

    let plaintext = key
        .cipher()
        .decrypt(
            nonce,
            Payload {
                msg: &sealed[VERSION_FIELD_LEN + NONCE_LEN..],
                aad: &aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    #[test]
    fn sealed_token_opens_for_same_identity() {
        let key = test_key();
        let sealed = seal_token(&key, "google:42", "google", "ya29.token").unwrap();

        assert_eq!(sealed[0], VERSION_SEALED);
        assert_eq!(
            open_token(&key, "google:42", "google", &sealed).unwrap(),
            "ya29.token"
        );
    }

    #[test]
    fn token_bound_to_other_identity_fails() {
        let key = test_key();
        let sealed = seal_token(&key, "google:42", "google", "ya29.token").unwrap();

        assert!(open_token(&key, "google:43", "google", &sealed).is_err());
        assert!(open_token(&key, "google:42", "facebook", &sealed).is_err());
    }

    #[test]
    fn tampered_payload_fails() {
        let key = test_key();
        let mut sealed = seal_token(&key, "fb:1", "facebook", "EAAB").unwrap();
        sealed[14] ^= 0x01;

        assert!(matches!(
            open_token(&key, "fb:1", "facebook", &sealed),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn nonces_differ_between_seals() {
        let key = test_key();
        let first = seal_token(&key, "fb:1", "facebook", "EAAB").unwrap();
        let second = seal_token(&key, "fb:1", "facebook", "EAAB").unwrap();

        assert_ne!(&first[1..13], &second[1..13]);
    }

    #[test]
    fn unknown_version_and_short_payloads_are_rejected() {
        let key = test_key();
        assert!(matches!(
            open_token(&key, "a", "b", b"plain-token"),
            Err(CryptoError::UnsupportedVersion(b'p'))
        ));
        assert!(matches!(
            open_token(&key, "a", "b", &[VERSION_SEALED, 0x02]),
            Err(CryptoError::Truncated)
        ));
        assert!(matches!(
            open_token(&key, "a", "b", &[]),
            Err(CryptoError::Truncated)
        ));
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(CryptoKey::new(vec![0u8; 16]).is_err());
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
    }
}
