//! # Sharekey Crypto
//!
//! Cryptographic primitives for per-file hybrid encryption.
//!
//! This crate provides:
//! - **Key pairs**: X25519 keys owned by users and by the system
//! - **Password escrow**: Argon2id + AEAD protection of private keys at rest
//! - **Key wrapping**: one file key wrapped once per recipient
//! - **Headers**: versioned `HBEGIN ... HEND` tags on encrypted content
//!
//! ## Example
//!
//! ```rust,ignore
//! use sharekey_crypto::{Crypt, CryptConfig};
//! use std::collections::BTreeMap;
//!
//! let crypt = Crypt::new(CryptConfig::default())?;
//! let alice = crypt.create_key_pair()?;
//!
//! let file_key = crypt.generate_file_key()?;
//! let mut recipients = BTreeMap::new();
//! recipients.insert("alice".to_string(), alice.public_key().clone());
//!
//! let wrapped = crypt.multi_key_encrypt(&file_key, &recipients, 1)?;
//! let unwrapped = crypt.multi_key_decrypt(&wrapped["alice"], alice.private_key())?;
//! assert_eq!(file_key, unwrapped);
//! ```

pub mod content;
pub mod crypt;
mod encoding;
pub mod error;
pub mod hashing;
pub mod header;
pub mod keys;
pub mod password;
pub mod symmetric;
pub mod wrap;

pub use content::{open_content, seal_content};
pub use crypt::{Crypt, CryptConfig, DEFAULT_MODULE_ID};
pub use error::{CryptoError, Result};
pub use hashing::Blake3Hash;
pub use header::Header;
pub use keys::{FileKey, KeyPair, PrivateKey, PublicKey, SymmetricKey};
pub use password::{KdfParams, ProtectedPrivateKey};
pub use symmetric::{Aead, AeadCipher, Nonce};
pub use wrap::{KeyUnwrapper, KeyWrapper, WrappedKey};

/// The version of the cryptographic format
pub const CRYPTO_VERSION: u8 = 1;
