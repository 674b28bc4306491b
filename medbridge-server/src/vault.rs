//! Encryption of EHR tokens at rest using AES-256-GCM
//!
//! Ciphertext text form is `base64(nonce || ciphertext)` with a random
//! 96-bit nonce per value. Without a key the vault is a pass-through.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use std::fmt;
use thiserror::Error;

/// Nonce size for AES-256-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits)
const KEY_SIZE: usize = 32;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),
}

/// Result of opening a stored value.
///
/// Values that do not decrypt are handed back unchanged, which keeps rows
/// written before a key was configured readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    Decrypted(String),
    /// Not ciphertext under the current key
    Passthrough(String),
    /// No key configured
    Disabled(String),
}

impl Opened {
    pub fn into_inner(self) -> String {
        match self {
            Opened::Decrypted(v) | Opened::Passthrough(v) | Opened::Disabled(v) => v,
        }
    }
}

#[derive(Clone)]
pub struct CredentialVault {
    cipher: Option<Aes256Gcm>,
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl CredentialVault {
    /// Vault from the configured key; absent or blank means disabled
    pub fn from_config(key: Option<&str>) -> Result<Self, VaultError> {
        match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key_str) => Ok(Self::new(parse_key(key_str)?)),
            None => Ok(Self::disabled()),
        }
    }

    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Some(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))),
        }
    }

    pub fn disabled() -> Self {
        Self { cipher: None }
    }

    /// Fresh random key, base64 encoded
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        BASE64.encode(key)
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let Some(cipher) = &self.cipher else {
            return Ok(plaintext.to_string());
        };
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encrypt(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    pub fn open(&self, stored: &str) -> Opened {
        let Some(cipher) = &self.cipher else {
            return Opened::Disabled(stored.to_string());
        };

        let Ok(sealed) = BASE64.decode(stored) else {
            return Opened::Passthrough(stored.to_string());
        };
        if sealed.len() <= NONCE_SIZE {
            return Opened::Passthrough(stored.to_string());
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        match cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .ok()
            .and_then(|plain| String::from_utf8(plain).ok())
        {
            Some(plain) => Opened::Decrypted(plain),
            None => Opened::Passthrough(stored.to_string()),
        }
    }

    pub fn decrypt(&self, stored: &str) -> String {
        self.open(stored).into_inner()
    }
}

/// Parse a key from a hex or base64 string
fn parse_key(key_str: &str) -> Result<[u8; KEY_SIZE], VaultError> {
    if key_str.len() == KEY_SIZE * 2
        && let Ok(bytes) = hex::decode(key_str)
    {
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        return Ok(key);
    }

    let bytes = BASE64
        .decode(key_str)
        .map_err(|e| VaultError::InvalidKey(format!("not hex or base64: {e}")))?;

    if bytes.len() != KEY_SIZE {
        return Err(VaultError::InvalidKey(format!(
            "key must be {} bytes, got {}",
            KEY_SIZE,
            bytes.len()
        )));
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}
