//! Password-based protection of private keys
//!
//! Private keys are stored encrypted under a key derived from a password
//! with Argon2id. An optional context string (for example the id of a
//! system key) is bound as AEAD associated data, so a blob only opens with
//! the same password *and* the same context.

use crate::{
    CryptoError, Result,
    keys::{KEY_SIZE, PrivateKey, SymmetricKey, fill_random},
    symmetric::{Aead, AeadCipher, Nonce},
};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Salt length for password key derivation
pub const SALT_SIZE: usize = 16;

const PROTECTED_KEY_VERSION: u8 = 1;

/// Argon2id cost parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP minimum for Argon2id
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheapest parameters Argon2 accepts. Only for tests.
    pub fn minimal() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn derive(&self, password: &[u8], salt: &[u8]) -> Result<SymmetricKey> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, Some(KEY_SIZE))
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid argon2 params: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(password, salt, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let derived = SymmetricKey::from_array(key);
        key.zeroize();
        Ok(derived)
    }
}

/// A private key encrypted under a password
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedPrivateKey {
    version: u8,
    kdf: KdfParams,
    #[serde(with = "crate::encoding::base64_array")]
    salt: [u8; SALT_SIZE],
    nonce: Nonce,
    cipher: AeadCipher,
    #[serde(with = "crate::encoding::base64_vec")]
    ciphertext: Vec<u8>,
}

impl ProtectedPrivateKey {
    /// Encrypt `private_key` under `password`
    pub fn seal(
        private_key: &PrivateKey,
        password: &str,
        context: Option<&str>,
        kdf: KdfParams,
        cipher: AeadCipher,
    ) -> Result<Self> {
        let mut salt = [0u8; SALT_SIZE];
        fill_random(&mut salt)?;
        let kek = kdf.derive(password.as_bytes(), &salt)?;

        let nonce = Nonce::generate()?;
        let ciphertext = Aead::new(&kek, cipher).encrypt_with_aad(
            &nonce,
            private_key.as_bytes(),
            context.unwrap_or_default().as_bytes(),
        )?;

        Ok(Self {
            version: PROTECTED_KEY_VERSION,
            kdf,
            salt,
            nonce,
            cipher,
            ciphertext,
        })
    }

    /// Decrypt with `password`. A wrong password or context fails
    /// authentication instead of producing a wrong key.
    pub fn open(&self, password: &str, context: Option<&str>) -> Result<PrivateKey> {
        if self.version != PROTECTED_KEY_VERSION {
            return Err(CryptoError::InvalidCiphertext(format!(
                "unsupported private key blob version {}",
                self.version
            )));
        }
        let kek = self.kdf.derive(password.as_bytes(), &self.salt)?;
        let mut plaintext = Aead::new(&kek, self.cipher).decrypt_with_aad(
            &self.nonce,
            &self.ciphertext,
            context.unwrap_or_default().as_bytes(),
        )?;
        let key = PrivateKey::from_bytes(&plaintext);
        plaintext.zeroize();
        key
    }

    /// Serialize to the stored blob form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a stored blob
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidCiphertext(format!("malformed private key blob: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(password: &str, context: Option<&str>) -> (PrivateKey, ProtectedPrivateKey) {
        let key = PrivateKey::generate().unwrap();
        let blob = ProtectedPrivateKey::seal(&key, password, context, KdfParams::minimal(), AeadCipher::Aes256Gcm)
            .unwrap();
        (key, blob)
    }

    #[test]
    fn test_seal_open() {
        let (key, blob) = sealed("hunter2", None);
        assert_eq!(blob.open("hunter2", None).unwrap(), key);
    }

    #[test]
    fn test_wrong_password_fails() {
        let (_, blob) = sealed("hunter2", None);
        assert!(matches!(blob.open("hunter3", None), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn test_context_is_bound() {
        let (key, blob) = sealed("secret", Some("master_abc"));
        assert_eq!(blob.open("secret", Some("master_abc")).unwrap(), key);
        assert!(blob.open("secret", Some("pubShare_abc")).is_err());
        assert!(blob.open("secret", None).is_err());
    }

    #[test]
    fn test_blob_serialization() {
        let (key, blob) = sealed("pw", None);
        let parsed = ProtectedPrivateKey::from_bytes(&blob.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.open("pw", None).unwrap(), key);
        assert!(ProtectedPrivateKey::from_bytes(b"{}").is_err());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let bad = KdfParams {
            memory_kib: 0,
            iterations: 0,
            parallelism: 0,
        };
        let key = PrivateKey::generate().unwrap();
        let result = ProtectedPrivateKey::seal(&key, "pw", None, bad, AeadCipher::Aes256Gcm);
        assert!(matches!(result, Err(CryptoError::KeyDerivation(_))));
    }
}
