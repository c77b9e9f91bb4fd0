//! Encryption of secret values at rest.
//!
//! The key is derived with Argon2 from a passphrase and a per-stack salt kept
//! in the state header. Values are sealed with ChaCha20-Poly1305 under a fresh
//! random nonce.

use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde_json::Value;
use std::fmt;

use crate::error::StateError;
use crate::resource::OutputValue;

use super::types::StoredValue;

/// Environment variable holding the passphrase.
pub const PASSPHRASE_ENV: &str = "IPFS_DEPLOY_PASSPHRASE";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Seals and opens secret values.
pub struct SecretsManager {
    key: Option<[u8; KEY_LEN]>,
}

impl fmt::Debug for SecretsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsManager")
            .field("unlocked", &self.key.is_some())
            .finish()
    }
}

impl SecretsManager {
    /// Generates a new random salt, base64.
    #[must_use]
    pub fn generate_salt() -> String {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        STANDARD.encode(salt)
    }

    /// A manager without a key. Plain values pass through; secrets fail.
    #[must_use]
    pub const fn locked() -> Self {
        Self { key: None }
    }

    /// Derives the key from `passphrase` and `salt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the salt is not valid base64 or derivation fails.
    pub fn from_passphrase(passphrase: &str, salt: &str) -> Result<Self, StateError> {
        let salt = STANDARD.decode(salt).map_err(|e| StateError::Crypto {
            message: format!("Invalid encryption salt: {e}"),
        })?;
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| StateError::Crypto {
                message: format!("Key derivation failed: {e}"),
            })?;
        Ok(Self { key: Some(key) })
    }

    /// Reads the passphrase from the environment; locked if unset.
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation fails.
    pub fn from_env(salt: &str) -> Result<Self, StateError> {
        match std::env::var(PASSPHRASE_ENV) {
            Ok(passphrase) if !passphrase.is_empty() => Self::from_passphrase(&passphrase, salt),
            _ => Ok(Self::locked()),
        }
    }

    /// Returns true if secrets can be sealed and opened.
    #[must_use]
    pub const fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305, StateError> {
        let key = self.key.as_ref().ok_or(StateError::SecretsLocked)?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(key)))
    }

    /// Encrypts a value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::SecretsLocked`] without a key.
    pub fn seal(&self, value: &Value) -> Result<StoredValue, StateError> {
        let cipher = self.cipher()?;
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| StateError::serialization(format!("Failed to serialize secret: {e}")))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| StateError::Crypto {
                message: format!("Encryption failed: {e}"),
            })?;

        let mut payload = nonce.to_vec();
        payload.extend_from_slice(&ciphertext);
        Ok(StoredValue::Secret {
            ciphertext: STANDARD.encode(payload),
        })
    }

    /// Decrypts a sealed payload.
    fn unseal(&self, ciphertext: &str) -> Result<Value, StateError> {
        let cipher = self.cipher()?;
        let payload = STANDARD.decode(ciphertext).map_err(|e| StateError::Crypto {
            message: format!("Invalid secret encoding: {e}"),
        })?;
        if payload.len() < NONCE_LEN {
            return Err(StateError::Crypto {
                message: String::from("Secret payload is truncated"),
            });
        }
        let (nonce, sealed) = payload.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| StateError::Crypto {
                message: String::from("Decryption failed; wrong passphrase?"),
            })?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| StateError::corrupted(format!("Secret is not valid JSON: {e}")))
    }

    /// Stores an output, sealing it when secret.
    ///
    /// # Errors
    ///
    /// Returns an error if a secret cannot be sealed.
    pub fn store(&self, output: &OutputValue) -> Result<StoredValue, StateError> {
        if output.secret {
            self.seal(&output.value)
        } else {
            Ok(StoredValue::Plain(output.value.clone()))
        }
    }

    /// Opens a stored value.
    ///
    /// # Errors
    ///
    /// Returns an error if a secret cannot be opened.
    pub fn open(&self, stored: &StoredValue) -> Result<OutputValue, StateError> {
        match stored {
            StoredValue::Plain(value) => Ok(OutputValue::plain(value.clone())),
            StoredValue::Secret { ciphertext } => self.unseal(ciphertext).map(OutputValue::secret),
        }
    }
}
