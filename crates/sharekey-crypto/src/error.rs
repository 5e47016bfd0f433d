//! Error types for the sharekey-crypto crate
//!
//! Every variant here is an *expected* cryptographic outcome (wrong password,
//! corrupt blob, exhausted entropy). Callers in `sharekey-core` turn them into
//! `false`/`None` results; policy problems live in the core's own error type.

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key, wrong password or tampered data)
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Password-based key derivation failed
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Invalid key format or length
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid ciphertext format
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Invalid or unsupported header
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Content already carries an encryption header
    #[error("content is already encrypted")]
    AlreadyEncrypted,

    /// Invalid nonce
    #[error("invalid nonce: {0}")]
    InvalidNonce(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Base64 decode error
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Hex decode error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
