//! Key types for the sharekey scheme
//!
//! - `SymmetricKey` / `FileKey`: random 256-bit keys protecting one file generation
//! - `PublicKey` / `PrivateKey` / `KeyPair`: X25519 keys that wrap file keys

use crate::{CryptoError, Result, hashing};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a symmetric key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of a nonce in bytes (96 bits for AES-GCM/ChaCha20-Poly1305)
pub const NONCE_SIZE: usize = 12;

/// Size of an X25519 key in bytes
pub const ASYMMETRIC_KEY_SIZE: usize = 32;

/// Fill `buf` from the OS RNG, surfacing entropy failures instead of panicking
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))
}

/// `N` random bytes from the OS RNG
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// A 256-bit symmetric key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; KEY_SIZE],
}

/// The per-file symmetric key. Never persisted in the clear.
pub type FileKey = SymmetricKey;

impl SymmetricKey {
    /// Generate a new random key
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; KEY_SIZE];
        fill_random(&mut key)?;
        Ok(Self { key })
    }

    /// Create a key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "symmetric key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    pub(crate) fn from_array(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for SymmetricKey {}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// A public key for asymmetric encryption (X25519)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: [u8; ASYMMETRIC_KEY_SIZE],
}

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ASYMMETRIC_KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "public key must be {} bytes, got {}",
                ASYMMETRIC_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; ASYMMETRIC_KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; ASYMMETRIC_KEY_SIZE] {
        &self.bytes
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.bytes)
    }

    /// Decode from base64
    pub fn from_base64(s: &str) -> Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(s.trim())?;
        Self::from_bytes(&bytes)
    }

    /// Short hex fingerprint, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = hashing::hash(&self.bytes);
        hex::encode(digest.prefix(8))
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

/// A private key for asymmetric encryption (X25519)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    bytes: [u8; ASYMMETRIC_KEY_SIZE],
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; ASYMMETRIC_KEY_SIZE];
        fill_random(&mut bytes)?;
        Ok(Self { bytes })
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ASYMMETRIC_KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "private key must be {} bytes, got {}",
                ASYMMETRIC_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; ASYMMETRIC_KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; ASYMMETRIC_KEY_SIZE] {
        &self.bytes
    }

    /// Derive the public key from this private key
    pub fn public_key(&self) -> PublicKey {
        use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
        let secret = StaticSecret::from(self.bytes);
        let public = X25519Public::from(&secret);
        PublicKey {
            bytes: *public.as_bytes(),
        }
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for PrivateKey {}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey(public={})", self.public_key().fingerprint())
    }
}

/// A key pair owned by a user or by the system (master, recovery, public share)
#[derive(Clone, Debug)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    ///
    /// Fails with `CryptoError::KeyGeneration` when the OS RNG cannot
    /// deliver entropy.
    pub fn generate() -> Result<Self> {
        let private = PrivateKey::generate()?;
        Ok(Self::from_private_key(private))
    }

    /// Create from an existing private key
    pub fn from_private_key(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    /// Get the private key
    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}
