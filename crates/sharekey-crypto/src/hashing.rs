//! Hashing utilities using BLAKE3
//!
//! Used for key derivation inside the wrapping scheme and for short
//! fingerprints that are safe to put in logs.

use crate::{CryptoError, Result};
use std::fmt;

/// Size of a BLAKE3 hash output in bytes (256 bits)
pub const HASH_BYTE_SIZE: usize = 32;

/// Type alias for hash output bytes
pub type HashOutput = [u8; HASH_BYTE_SIZE];

/// A BLAKE3 hash wrapper with convenience methods
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Blake3Hash(HashOutput);

impl Blake3Hash {
    /// Create a hash from a hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH_BYTE_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "hash must be {} bytes, got {}",
                HASH_BYTE_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; HASH_BYTE_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get the hash as bytes
    pub fn as_bytes(&self) -> &HashOutput {
        &self.0
    }

    /// Convert to a hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the first N bytes for use as a prefix
    pub fn prefix(&self, n: usize) -> &[u8] {
        &self.0[..n.min(HASH_BYTE_SIZE)]
    }
}

impl fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blake3Hash({})", self.to_hex())
    }
}

impl fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<blake3::Hash> for Blake3Hash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

/// Hash the given data using BLAKE3
pub fn hash(data: &[u8]) -> Blake3Hash {
    blake3::hash(data).into()
}

/// Derive a key from several inputs under a context string.
///
/// Each part is length-prefixed so that `("ab", "c")` and `("a", "bc")`
/// derive different keys.
pub fn derive_key(context: &str, parts: &[&[u8]]) -> Blake3Hash {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}
