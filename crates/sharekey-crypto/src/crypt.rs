//! The `Crypt` facade used by the key manager
//!
//! Bundles the configured module id, cipher and KDF cost so callers do not
//! thread them through every call.

use crate::{
    Result,
    content,
    header::{self, Header},
    keys::{FileKey, KeyPair, PrivateKey, PublicKey},
    password::{KdfParams, ProtectedPrivateKey},
    symmetric::AeadCipher,
    wrap::{KeyUnwrapper, KeyWrapper, WrappedKey},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Module id written into headers when none is configured
pub const DEFAULT_MODULE_ID: &str = "SHAREKEY_DEFAULT_MODULE";

/// Header format version
pub const HEADER_VERSION: u32 = 1;

/// Configuration for [`Crypt`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptConfig {
    /// Encryption module id recorded in headers
    pub module_id: String,
    /// AEAD cipher for new content, wraps and private keys
    pub cipher: AeadCipher,
    /// Argon2id cost for password-protected private keys
    pub kdf: KdfParams,
}

impl Default for CryptConfig {
    fn default() -> Self {
        Self {
            module_id: DEFAULT_MODULE_ID.to_string(),
            cipher: AeadCipher::default(),
            kdf: KdfParams::default(),
        }
    }
}

/// Key-wrapping primitives
#[derive(Clone, Debug)]
pub struct Crypt {
    config: CryptConfig,
    header: Header,
}

impl Crypt {
    /// Create from configuration. Fails if the module id cannot appear in a header.
    pub fn new(config: CryptConfig) -> Result<Self> {
        let header = Header::new(config.module_id.clone(), config.cipher, HEADER_VERSION)?;
        Ok(Self { config, header })
    }

    pub fn config(&self) -> &CryptConfig {
        &self.config
    }

    /// Generate a fresh X25519 key pair
    pub fn create_key_pair(&self) -> Result<KeyPair> {
        KeyPair::generate()
    }

    /// Protect a private key with a password, returning the stored blob
    pub fn encrypt_private_key(&self, private_key: &PrivateKey, password: &str, context: Option<&str>) -> Result<Vec<u8>> {
        ProtectedPrivateKey::seal(private_key, password, context, self.config.kdf, self.config.cipher)?.to_bytes()
    }

    /// Open a stored private key blob
    pub fn decrypt_private_key(&self, blob: &[u8], password: &str, context: Option<&str>) -> Result<PrivateKey> {
        ProtectedPrivateKey::from_bytes(blob)?.open(password, context)
    }

    /// Header for newly encrypted content
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Rendered header bytes
    pub fn generate_header(&self) -> Vec<u8> {
        self.header.to_bytes()
    }

    /// Prefix `data` with the header unless it already has one
    pub fn tag(&self, data: &[u8]) -> Vec<u8> {
        header::tag(&self.header, data)
    }

    /// Generate a fresh file key
    pub fn generate_file_key(&self) -> Result<FileKey> {
        FileKey::generate()
    }

    /// Wrap `file_key` once for every recipient.
    ///
    /// Fails as a whole if any single wrap fails, so callers never persist a
    /// partial recipient set.
    pub fn multi_key_encrypt(
        &self,
        file_key: &FileKey,
        recipients: &BTreeMap<String, PublicKey>,
        generation: u32,
    ) -> Result<BTreeMap<String, WrappedKey>> {
        recipients
            .iter()
            .map(|(principal, public)| {
                KeyWrapper::new(public, self.config.cipher)
                    .wrap(file_key, generation)
                    .map(|wrapped| (principal.clone(), wrapped))
            })
            .collect()
    }

    /// Unwrap one recipient's share key
    pub fn multi_key_decrypt(&self, wrapped: &WrappedKey, private_key: &PrivateKey) -> Result<FileKey> {
        KeyUnwrapper::new(private_key).unwrap_key(wrapped)
    }

    /// Seal content under `file_key` with this module's header
    pub fn seal_content(&self, file_key: &FileKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        content::seal_content(&self.header, file_key, plaintext)
    }

    /// Open sealed content
    pub fn open_content(&self, file_key: &FileKey, data: &[u8]) -> Result<Vec<u8>> {
        content::open_content(file_key, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CryptoError;
    use proptest::prelude::*;

    fn crypt() -> Crypt {
        Crypt::new(CryptConfig {
            kdf: KdfParams::minimal(),
            ..CryptConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_module_id_rejected() {
        let config = CryptConfig {
            module_id: "bad:id".to_string(),
            ..CryptConfig::default()
        };
        assert!(matches!(Crypt::new(config), Err(CryptoError::InvalidHeader(_))));
    }

    #[test]
    fn test_private_key_escrow() {
        let crypt = crypt();
        let pair = crypt.create_key_pair().unwrap();
        let blob = crypt.encrypt_private_key(pair.private_key(), "pw", Some("ctx")).unwrap();

        let opened = crypt.decrypt_private_key(&blob, "pw", Some("ctx")).unwrap();
        assert_eq!(&opened, pair.private_key());
        assert!(crypt.decrypt_private_key(&blob, "wrong", Some("ctx")).is_err());
    }

    #[test]
    fn test_fan_out_excludes_non_recipients() {
        let crypt = crypt();
        let alice = crypt.create_key_pair().unwrap();
        let bob = crypt.create_key_pair().unwrap();
        let mallory = crypt.create_key_pair().unwrap();
        let file_key = crypt.generate_file_key().unwrap();

        let mut recipients = BTreeMap::new();
        recipients.insert("alice".to_string(), alice.public_key().clone());
        recipients.insert("bob".to_string(), bob.public_key().clone());
        let wrapped = crypt.multi_key_encrypt(&file_key, &recipients, 1).unwrap();

        assert_eq!(wrapped.len(), 2);
        assert_eq!(crypt.multi_key_decrypt(&wrapped["alice"], alice.private_key()).unwrap(), file_key);
        assert_eq!(crypt.multi_key_decrypt(&wrapped["bob"], bob.private_key()).unwrap(), file_key);
        for entry in wrapped.values() {
            assert!(crypt.multi_key_decrypt(entry, mallory.private_key()).is_err());
        }
    }

    #[test]
    fn test_generate_header_and_tag() {
        let crypt = crypt();
        let header = crypt.generate_header();
        assert!(header.starts_with(b"HBEGIN:encryption_module:SHAREKEY_DEFAULT_MODULE:"));
        let tagged = crypt.tag(b"x");
        assert_eq!(crypt.tag(&tagged), tagged);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_content_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let crypt = crypt();
            let key = crypt.generate_file_key().unwrap();
            // Inputs that happen to start with a header are refused, not double-tagged
            prop_assume!(!crate::header::has_header(&plaintext));
            let sealed = crypt.seal_content(&key, &plaintext).unwrap();
            prop_assert_eq!(crypt.open_content(&key, &sealed).unwrap(), plaintext);
        }

        #[test]
        fn prop_every_recipient_unwraps(count in 1usize..6, generation in any::<u32>()) {
            let crypt = crypt();
            let file_key = crypt.generate_file_key().unwrap();
            let pairs: Vec<KeyPair> = (0..count).map(|_| crypt.create_key_pair().unwrap()).collect();
            let recipients: BTreeMap<String, PublicKey> = pairs
                .iter()
                .enumerate()
                .map(|(i, p)| (format!("user{}", i), p.public_key().clone()))
                .collect();

            let wrapped = crypt.multi_key_encrypt(&file_key, &recipients, generation).unwrap();
            prop_assert_eq!(wrapped.len(), count);
            for (i, pair) in pairs.iter().enumerate() {
                let entry = &wrapped[&format!("user{}", i)];
                prop_assert_eq!(entry.generation, generation);
                prop_assert_eq!(crypt.multi_key_decrypt(entry, pair.private_key()).unwrap(), file_key.clone());
            }
        }
    }
}
