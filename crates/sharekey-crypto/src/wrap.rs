//! Key wrapping for multiple recipients
//!
//! A file key is wrapped for each recipient with an ephemeral-static X25519
//! exchange. The wrapping key is derived with BLAKE3 from the shared secret
//! and both public keys, and the file key is sealed with an AEAD whose
//! associated data binds the format version and the key generation.

use crate::{
    CRYPTO_VERSION, CryptoError, Result, hashing,
    keys::{FileKey, KEY_SIZE, PrivateKey, PublicKey, SymmetricKey, fill_random},
    symmetric::{Aead, AeadCipher, Nonce},
};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

/// Key derivation context for wrapping keys
const WRAP_CONTEXT: &str = "sharekey-wrap-v1";

/// A file key wrapped for one recipient
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Version of the wrapping format
    pub version: u8,
    /// The encrypted version of the file this wrap was produced for
    pub generation: u32,
    /// Ephemeral public key of the sender
    #[serde(with = "crate::encoding::base64_array")]
    pub ephemeral_public: [u8; 32],
    /// The nonce used for AEAD
    pub nonce: Nonce,
    /// The AEAD cipher used
    pub cipher: AeadCipher,
    /// The sealed file key
    #[serde(with = "crate::encoding::base64_vec")]
    pub ciphertext: Vec<u8>,
}

impl WrappedKey {
    /// Serialize to the stored blob form
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a stored blob
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let wrapped: Self = serde_json::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidCiphertext(format!("malformed share key: {}", e)))?;
        if wrapped.version != CRYPTO_VERSION {
            return Err(CryptoError::InvalidCiphertext(format!(
                "unsupported share key version {}",
                wrapped.version
            )));
        }
        Ok(wrapped)
    }

    fn aad(version: u8, generation: u32) -> [u8; 5] {
        let mut aad = [0u8; 5];
        aad[0] = version;
        aad[1..].copy_from_slice(&generation.to_be_bytes());
        aad
    }
}

fn derive_wrapping_key(shared_secret: &[u8], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> SymmetricKey {
    let derived = hashing::derive_key(WRAP_CONTEXT, &[shared_secret, ephemeral, recipient]);
    SymmetricKey::from_array(*derived.as_bytes())
}

/// Wraps file keys for a single recipient
pub struct KeyWrapper {
    recipient: PublicKey,
    cipher: AeadCipher,
}

impl KeyWrapper {
    /// Create a wrapper for the given recipient
    pub fn new(recipient: &PublicKey, cipher: AeadCipher) -> Self {
        Self {
            recipient: recipient.clone(),
            cipher,
        }
    }

    /// Wrap `file_key` for the recipient, tagged with `generation`
    pub fn wrap(&self, file_key: &FileKey, generation: u32) -> Result<WrappedKey> {
        let mut seed = [0u8; 32];
        fill_random(&mut seed)?;
        let ephemeral_secret = StaticSecret::from(seed);
        seed.zeroize();
        let ephemeral_public = X25519Public::from(&ephemeral_secret);

        let recipient_x25519 = X25519Public::from(*self.recipient.as_bytes());
        let shared_secret = ephemeral_secret.diffie_hellman(&recipient_x25519);
        if !shared_secret.was_contributory() {
            return Err(CryptoError::InvalidKey(
                "recipient public key is a low-order point".to_string(),
            ));
        }

        let wrapping_key = derive_wrapping_key(
            shared_secret.as_bytes(),
            ephemeral_public.as_bytes(),
            self.recipient.as_bytes(),
        );

        let nonce = Nonce::generate()?;
        let aead = Aead::new(&wrapping_key, self.cipher);
        let ciphertext = aead.encrypt_with_aad(
            &nonce,
            file_key.as_bytes(),
            &WrappedKey::aad(CRYPTO_VERSION, generation),
        )?;

        Ok(WrappedKey {
            version: CRYPTO_VERSION,
            generation,
            ephemeral_public: *ephemeral_public.as_bytes(),
            nonce,
            cipher: self.cipher,
            ciphertext,
        })
    }
}

/// Unwraps file keys with a recipient's private key
pub struct KeyUnwrapper<'a> {
    private: &'a PrivateKey,
}

impl<'a> KeyUnwrapper<'a> {
    /// Create an unwrapper for the given private key
    pub fn new(private: &'a PrivateKey) -> Self {
        Self { private }
    }

    /// Recover the file key from a wrap
    pub fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<FileKey> {
        let secret = StaticSecret::from(*self.private.as_bytes());
        let ephemeral = X25519Public::from(wrapped.ephemeral_public);
        let shared_secret = secret.diffie_hellman(&ephemeral);

        let recipient = self.private.public_key();
        let wrapping_key = derive_wrapping_key(
            shared_secret.as_bytes(),
            &wrapped.ephemeral_public,
            recipient.as_bytes(),
        );

        let aead = Aead::new(&wrapping_key, wrapped.cipher);
        let mut plaintext = aead.decrypt_with_aad(
            &wrapped.nonce,
            &wrapped.ciphertext,
            &WrappedKey::aad(wrapped.version, wrapped.generation),
        )?;

        if plaintext.len() != KEY_SIZE {
            plaintext.zeroize();
            return Err(CryptoError::InvalidCiphertext(
                "unwrapped key has the wrong length".to_string(),
            ));
        }
        let key = FileKey::from_bytes(&plaintext);
        plaintext.zeroize();
        key
    }
}
