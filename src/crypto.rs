//! Passphrase-derived encryption for note and credential content.
//!
//! Each record gets a fresh random salt; the key is derived from
//! (passphrase, salt) with Argon2id and the content is sealed with
//! ChaCha20-Poly1305. Salt and ciphertext travel as base64.

use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};
use rand_core::RngCore;
use thiserror::Error;

use crate::error::ApiError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid passphrase or corrupted content")]
    InvalidPassphrase,
    #[error("encryption failure: {0}")]
    Encryption(String),
}

impl From<CryptoError> for ApiError {
    fn from(error: CryptoError) -> Self {
        match error {
            CryptoError::InvalidPassphrase => {
                ApiError::Auth("Invalid passphrase or corrupted note content".into())
            }
            CryptoError::Encryption(message) => ApiError::Internal(message),
        }
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Key, CryptoError> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    Ok(Key::from(key))
}

pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    B64.encode(salt)
}

/// Encrypt `plaintext` under `passphrase` with a fresh salt.
/// Returns `(ciphertext_b64, salt_b64)`.
pub fn encrypt(plaintext: &str, passphrase: &str) -> Result<(String, String), CryptoError> {
    let salt = generate_salt();
    let ciphertext = encrypt_with_salt(plaintext, passphrase, &salt)?;
    Ok((ciphertext, salt))
}

/// Encrypt under an existing salt. Used where several fields of one record
/// share a salt (the credentials row).
pub fn encrypt_with_salt(
    plaintext: &str,
    passphrase: &str,
    salt_b64: &str,
) -> Result<String, CryptoError> {
    let salt = B64
        .decode(salt_b64)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let key = derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new(&key);
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&sealed);

    Ok(B64.encode(blob))
}

/// Decrypt a `(ciphertext_b64, salt_b64)` pair produced by [`encrypt`].
/// Fails with `InvalidPassphrase` on a wrong passphrase or tampered data.
pub fn decrypt(ciphertext: &str, salt: &str, passphrase: &str) -> Result<String, CryptoError> {
    let salt = B64.decode(salt).map_err(|_| CryptoError::InvalidPassphrase)?;
    let blob = B64
        .decode(ciphertext)
        .map_err(|_| CryptoError::InvalidPassphrase)?;
    if blob.len() <= NONCE_LEN {
        return Err(CryptoError::InvalidPassphrase);
    }

    let key = derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new(&key);
    let (nonce, sealed) = blob.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::InvalidPassphrase)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidPassphrase)
}

/// Generate a random notes key, used so remote sessions can decrypt
/// without re-deriving from the login passphrase.
pub fn generate_notes_key() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    B64.encode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let (ciphertext, salt) = encrypt("grocery budget notes", "hunter2").unwrap();
        let plaintext = decrypt(&ciphertext, &salt, "hunter2").unwrap();
        assert_eq!(plaintext, "grocery budget notes");
    }

    #[test]
    fn fresh_salt_per_record() {
        let (_, salt_a) = encrypt("same content", "p").unwrap();
        let (_, salt_b) = encrypt("same content", "p").unwrap();
        assert_ne!(salt_a, salt_b);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let (ciphertext, salt) = encrypt("secret", "right").unwrap();
        let result = decrypt(&ciphertext, &salt, "wrong");
        assert!(matches!(result, Err(CryptoError::InvalidPassphrase)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (ciphertext, salt) = encrypt("secret", "p").unwrap();
        let mut blob = B64.decode(&ciphertext).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        let tampered = B64.encode(blob);
        assert!(matches!(
            decrypt(&tampered, &salt, "p"),
            Err(CryptoError::InvalidPassphrase)
        ));
    }

    #[test]
    fn empty_content_round_trips() {
        let (ciphertext, salt) = encrypt("", "p").unwrap();
        assert_eq!(decrypt(&ciphertext, &salt, "p").unwrap(), "");
    }
}
