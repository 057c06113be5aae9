//! Symmetric encryption of stored secrets keyed by a live server token.
//!
//! Unlike a master-password box, the key here is derived from a bearer
//! token the server already issued — high entropy by construction — so a
//! single SHA-256 digest is the key, not a deliberately slow password KDF.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::errors::CoreError;

const NONCE_LEN: usize = 12;
const AAD: &[u8] = b"docsync-crypto-box-v1";

/// Encrypts and decrypts small secrets (proxy passwords, cached
/// credentials) using the current auth token as the key-encryption key.
pub struct CryptoBox {
    key: [u8; 32],
}

impl CryptoBox {
    pub fn new(token: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let key = hasher.finalize().into();
        CryptoBox { key }
    }

    /// Encrypts `plaintext`, returning a `nonce:ciphertext` envelope string
    /// with both parts base64-encoded.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CoreError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = aes_gcm::aead::Payload {
            msg: plaintext.as_bytes(),
            aad: AAD,
        };
        let ciphertext = cipher
            .encrypt(nonce, payload)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        Ok(format!(
            "{}:{}",
            BASE64.encode(nonce_bytes),
            BASE64.encode(ciphertext)
        ))
    }

    /// Decrypts an envelope produced by [`CryptoBox::encrypt`]. Returns a
    /// crypto error if the token doesn't match the one used to encrypt, or
    /// the envelope is malformed.
    pub fn decrypt(&self, envelope: &str) -> Result<String, CoreError> {
        let (nonce_part, data_part) = envelope
            .split_once(':')
            .ok_or_else(|| CoreError::Crypto("malformed envelope".into()))?;

        let nonce_bytes = BASE64
            .decode(nonce_part)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;
        let ciphertext = BASE64
            .decode(data_part)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = aes_gcm::aead::Payload {
            msg: &ciphertext,
            aad: AAD,
        };
        let mut plaintext = cipher
            .decrypt(nonce, payload)
            .map_err(|_| CoreError::Crypto("decryption failed — wrong token or corrupted data".into()))?;

        let result = String::from_utf8(plaintext.clone())
            .map_err(|e| CoreError::Crypto(e.to_string()));
        plaintext.zeroize();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let box_ = CryptoBox::new("tok-abc123");
        let envelope = box_.encrypt("hunter2").unwrap();
        assert_eq!(box_.decrypt(&envelope).unwrap(), "hunter2");
    }

    #[test]
    fn wrong_token_fails_to_decrypt() {
        let encryptor = CryptoBox::new("tok-abc123");
        let envelope = encryptor.encrypt("hunter2").unwrap();

        let decryptor = CryptoBox::new("tok-other");
        let err = decryptor.decrypt(&envelope).unwrap_err();
        assert!(err.to_string().contains("decryption failed"));
    }

    #[test]
    fn malformed_envelope_is_rejected() {
        let box_ = CryptoBox::new("tok-abc123");
        let err = box_.decrypt("not-a-valid-envelope").unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn different_tokens_derive_different_keys() {
        let a = CryptoBox::new("tok-a");
        let b = CryptoBox::new("tok-b");
        assert_ne!(a.key, b.key);
    }
}
