// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Secret Cipher
//!
//! AES-256-GCM encryption for tenant database passwords at rest.
//!
//! ## Blob format
//!
//! ```text
//! base64_standard( nonce[12] || ciphertext || tag[16] )
//! ```
//!
//! A fresh random nonce is drawn for every call to [`SecretCipher::encrypt`],
//! so encrypting the same plaintext twice yields different blobs.
//!
//! ## Key derivation
//!
//! | Mode | 32-byte key |
//! |------|-------------|
//! | [`KeyDerivation::Legacy`] | secret truncated, or right-padded with `0x00` |
//! | [`KeyDerivation::Sha256`] | `SHA-256(secret)` |
//!
//! `Legacy` reproduces the key existing rows were written with; switching a
//! running deployment to `Sha256` requires re-encrypting every row.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::warn;

pub use crate::domain::config::KeyDerivation;
use crate::domain::tenant::EncryptedSecret;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("encryption key is empty")]
    InvalidKey,

    /// Not valid base64, shorter than a nonce, or not UTF-8 once decrypted.
    #[error("malformed ciphertext: {0}")]
    Format(&'static str),

    /// Tag check failed: wrong key or tampered blob.
    #[error("ciphertext failed authentication")]
    Authentication,

    #[error("encryption failed")]
    Encryption,
}

/// Symmetric cipher keyed once at startup and shared across tasks.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(secret: &str, derivation: KeyDerivation) -> Result<Self, CipherError> {
        if secret.is_empty() {
            return Err(CipherError::InvalidKey);
        }
        let key = derive_key(secret.as_bytes(), derivation);
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CipherError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(EncryptedSecret::new(STANDARD.encode(blob)))
    }

    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<String, CipherError> {
        let blob = STANDARD
            .decode(secret.expose_blob())
            .map_err(|_| CipherError::Format("not valid base64"))?;
        if blob.len() < NONCE_LEN {
            return Err(CipherError::Format("shorter than nonce"));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Format("plaintext is not UTF-8"))
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(<redacted>)")
    }
}

fn derive_key(secret: &[u8], derivation: KeyDerivation) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    match derivation {
        KeyDerivation::Legacy => {
            if secret.len() < KEY_LEN {
                warn!(
                    "Encryption key is {} bytes; zero-padding to {}",
                    secret.len(),
                    KEY_LEN
                );
            }
            let n = secret.len().min(KEY_LEN);
            key[..n].copy_from_slice(&secret[..n]);
        }
        KeyDerivation::Sha256 => {
            key.copy_from_slice(&Sha256::digest(secret));
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn cipher() -> SecretCipher {
        SecretCipher::new(KEY, KeyDerivation::Legacy).unwrap()
    }

    fn tamper(secret: &EncryptedSecret, index: usize) -> EncryptedSecret {
        let mut bytes = STANDARD.decode(secret.expose_blob()).unwrap();
        bytes[index] ^= 0x01;
        EncryptedSecret::new(STANDARD.encode(bytes))
    }

    #[test]
    fn test_round_trip() {
        let c = cipher();
        for plaintext in ["s3cret-Pa55", "", "ünïcødé ☃"] {
            let blob = c.encrypt(plaintext).unwrap();
            assert_eq!(c.decrypt(&blob).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let c = cipher();
        let a = c.encrypt("same").unwrap();
        let b = c.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_blob_layout() {
        let blob = cipher().encrypt("abc").unwrap();
        let bytes = STANDARD.decode(blob.expose_blob()).unwrap();
        // nonce + plaintext + tag
        assert_eq!(bytes.len(), NONCE_LEN + 3 + 16);
    }

    #[test]
    fn test_tampering_is_detected() {
        let c = cipher();
        let blob = c.encrypt("s3cret").unwrap();
        // flip a nonce bit, a ciphertext bit and a tag bit
        for index in [0, NONCE_LEN, NONCE_LEN + 6 + 15] {
            assert!(matches!(
                c.decrypt(&tamper(&blob, index)),
                Err(CipherError::Authentication)
            ));
        }
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let blob = cipher().encrypt("s3cret").unwrap();
        let other = SecretCipher::new("another-key", KeyDerivation::Legacy).unwrap();
        assert!(matches!(other.decrypt(&blob), Err(CipherError::Authentication)));
    }

    #[test]
    fn test_legacy_short_key_is_zero_padded() {
        let short = SecretCipher::new("short-key", KeyDerivation::Legacy).unwrap();
        let padded = format!("short-key{}", "\0".repeat(32 - "short-key".len()));
        let explicit = SecretCipher::new(&padded, KeyDerivation::Legacy).unwrap();

        let blob = short.encrypt("s3cret").unwrap();
        assert_eq!(explicit.decrypt(&blob).unwrap(), "s3cret");
    }

    #[test]
    fn test_legacy_long_key_is_truncated() {
        let long = SecretCipher::new(&format!("{KEY}-extra-bytes"), KeyDerivation::Legacy).unwrap();
        let blob = long.encrypt("s3cret").unwrap();
        assert_eq!(cipher().decrypt(&blob).unwrap(), "s3cret");
    }

    #[test]
    fn test_sha256_derivation_differs_from_legacy() {
        let hashed = SecretCipher::new(KEY, KeyDerivation::Sha256).unwrap();
        let blob = hashed.encrypt("s3cret").unwrap();
        assert_eq!(hashed.decrypt(&blob).unwrap(), "s3cret");
        assert!(matches!(cipher().decrypt(&blob), Err(CipherError::Authentication)));
    }

    #[test]
    fn test_malformed_blobs() {
        let c = cipher();
        assert!(matches!(
            c.decrypt(&EncryptedSecret::new("not base64!!")),
            Err(CipherError::Format(_))
        ));
        let short = EncryptedSecret::new(STANDARD.encode([0u8; 8]));
        assert!(matches!(c.decrypt(&short), Err(CipherError::Format(_))));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            SecretCipher::new("", KeyDerivation::Legacy),
            Err(CipherError::InvalidKey)
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        assert_eq!(format!("{:?}", cipher()), "SecretCipher(<redacted>)");
    }
}
