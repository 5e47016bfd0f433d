//! Symmetric encryption using AES-GCM and ChaCha20-Poly1305
//!
//! Authenticated encryption for wrapped keys, escrowed private keys and
//! sealed content.

use crate::{CryptoError, Result, keys::{KEY_SIZE, NONCE_SIZE, SymmetricKey, fill_random}};
use aes_gcm::{
    Aes256Gcm, KeyInit,
    aead::{Aead as AeadTrait, Payload},
};
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// A nonce for AEAD encryption
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce {
    #[serde(with = "crate::encoding::base64_array")]
    bytes: [u8; NONCE_SIZE],
}

impl Nonce {
    /// Generate a random nonce
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; NONCE_SIZE];
        fill_random(&mut bytes)?;
        Ok(Self { bytes })
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonce(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; NONCE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the nonce bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.bytes
    }
}

/// Supported AEAD ciphers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AeadCipher {
    /// AES-256-GCM
    #[default]
    Aes256Gcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl AeadCipher {
    /// Get the algorithm identifier string
    pub fn algorithm_id(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256-GCM",
            Self::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }

    /// Parse an algorithm identifier produced by `algorithm_id`
    pub fn from_algorithm_id(id: &str) -> Option<Self> {
        match id {
            "AES-256-GCM" => Some(Self::Aes256Gcm),
            "ChaCha20-Poly1305" => Some(Self::ChaCha20Poly1305),
            _ => None,
        }
    }

    /// Get the authentication tag size
    pub fn tag_size(&self) -> usize {
        16 // Both use 128-bit tags
    }
}

/// AEAD encryption/decryption interface
pub struct Aead {
    cipher: AeadCipher,
    key: [u8; KEY_SIZE],
}

impl Drop for Aead {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl Aead {
    /// Create a new AEAD instance with the given key and cipher
    pub fn new(key: &SymmetricKey, cipher: AeadCipher) -> Self {
        Self {
            cipher,
            key: *key.as_bytes(),
        }
    }

    /// Encrypt data with the given nonce and associated data
    pub fn encrypt_with_aad(&self, nonce: &Nonce, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        match self.cipher {
            AeadCipher::Aes256Gcm => {
                let nonce_arr = aes_gcm::Nonce::from_slice(nonce.as_bytes());
                let cipher = Aes256Gcm::new_from_slice(&self.key)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
                cipher
                    .encrypt(nonce_arr, Payload { msg: plaintext, aad })
                    .map_err(|e| CryptoError::Encryption(e.to_string()))
            }
            AeadCipher::ChaCha20Poly1305 => {
                let nonce_arr = chacha20poly1305::Nonce::from_slice(nonce.as_bytes());
                let payload = chacha20poly1305::aead::Payload { msg: plaintext, aad };
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
                cipher
                    .encrypt(nonce_arr, payload)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))
            }
        }
    }

    /// Decrypt data with the given nonce and associated data
    pub fn decrypt_with_aad(&self, nonce: &Nonce, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        match self.cipher {
            AeadCipher::Aes256Gcm => {
                let nonce_arr = aes_gcm::Nonce::from_slice(nonce.as_bytes());
                let cipher = Aes256Gcm::new_from_slice(&self.key)
                    .map_err(|e| CryptoError::Decryption(e.to_string()))?;
                cipher
                    .decrypt(nonce_arr, Payload { msg: ciphertext, aad })
                    .map_err(|e| CryptoError::Decryption(e.to_string()))
            }
            AeadCipher::ChaCha20Poly1305 => {
                let nonce_arr = chacha20poly1305::Nonce::from_slice(nonce.as_bytes());
                let payload = chacha20poly1305::aead::Payload { msg: ciphertext, aad };
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
                    .map_err(|e| CryptoError::Decryption(e.to_string()))?;
                cipher
                    .decrypt(nonce_arr, payload)
                    .map_err(|e| CryptoError::Decryption(e.to_string()))
            }
        }
    }

    /// Get the cipher type
    pub fn cipher(&self) -> AeadCipher {
        self.cipher
    }
}
