//! Error types for the sharekey-core crate

use thiserror::Error;

/// Result type alias using `KeyError`
pub type Result<T> = std::result::Result<T, KeyError>;

/// Result type alias for collaborator storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors raised by storage collaborators
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Path does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Path is not a directory
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Path is malformed or escapes the storage root
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Encrypted content whose key material cannot be recovered
    #[error("file is encrypted and cannot be read: {0}")]
    Unreadable(String),
}

/// Errors that can occur in key management
#[derive(Error, Debug)]
pub enum KeyError {
    /// A principal has no private key blob
    #[error("private key missing for {uid}")]
    PrivateKeyMissing { uid: String },

    /// A principal has no public key
    #[error("public key missing for {uid}")]
    PublicKeyMissing { uid: String },

    /// The session holds no decrypted private key
    #[error("no private key cached in the session")]
    SessionKeyMissing,

    /// Master-key mode needs the instance secret
    #[error("master key password requested but no secret is configured")]
    MasterKeySecretMissing,

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Decrypt-all values requested outside decrypt-all mode
    #[error("decrypt-all mode is not activated")]
    DecryptAllNotActivated,

    /// Decrypt-all mode is on but a value was never provided
    #[error("decrypt-all mode is activated but the {0} is missing")]
    DecryptAllStateInvalid(&'static str),

    /// Storage collaborator error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Crypto error
    #[error("crypto error: {0}")]
    Crypto(#[from] sharekey_crypto::CryptoError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for KeyError {
    fn from(e: config::ConfigError) -> Self {
        KeyError::Config(e.to_string())
    }
}
