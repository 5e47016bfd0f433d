//! Encryption configuration

use crate::{KeyError, Result, paths};
use serde::{Deserialize, Serialize};
use sharekey_crypto::{AeadCipher, CryptConfig, DEFAULT_MODULE_ID, KdfParams, hashing};
use std::path::Path;
use tracing::error;

/// Environment variable prefix, e.g. `SHAREKEY_SECRET`
pub const ENV_PREFIX: &str = "SHAREKEY";

const MASTER_PASSWORD_CONTEXT: &str = "sharekey master key password v1";

/// A mount point inside every user's `files` area
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    /// Path relative to the user's `files` area, e.g. `/shared`
    pub path: String,
    /// Whether content written below this mount is encrypted
    #[serde(default = "default_true")]
    pub encrypted: bool,
    /// Whether the mount is shared by all users (keys live outside user homes)
    #[serde(default)]
    pub system_wide: bool,
}

fn default_true() -> bool {
    true
}

impl MountPoint {
    fn contains(&self, rel: &str) -> bool {
        let mount = self.path.trim_end_matches('/');
        rel == mount || rel.starts_with(&format!("{}/", mount))
    }
}

/// Encryption settings for the key manager and its collaborators
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Encryption module id, used in headers and key folder names
    pub module_id: String,
    /// One system-wide key pair wraps all file keys
    pub master_key_enabled: bool,
    /// Instance secret the master key password is derived from
    pub secret: String,
    /// Fixed key ids. Generated and stored in app config when unset.
    pub master_key_id: Option<String>,
    pub public_share_key_id: Option<String>,
    pub recovery_key_id: Option<String>,
    /// Mount points with their own encryption policy
    pub mount_points: Vec<MountPoint>,
    /// Argon2id cost for password-protected private keys
    pub kdf: KdfParams,
    /// AEAD cipher for new content and wraps
    pub cipher: AeadCipher,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            module_id: DEFAULT_MODULE_ID.to_string(),
            master_key_enabled: false,
            secret: String::new(),
            master_key_id: None,
            public_share_key_id: None,
            recovery_key_id: None,
            mount_points: Vec::new(),
            kdf: KdfParams::default(),
            cipher: AeadCipher::default(),
        }
    }
}

impl EncryptionConfig {
    /// Load from an optional TOML file overlaid with `SHAREKEY_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise fail deep inside an operation
    pub fn validate(&self) -> Result<()> {
        paths::validate_component(&self.module_id)
            .map_err(|_| KeyError::Config(format!("invalid module id {:?}", self.module_id)))?;
        for id in [&self.master_key_id, &self.public_share_key_id, &self.recovery_key_id]
            .into_iter()
            .flatten()
        {
            paths::validate_component(id).map_err(|_| KeyError::Config(format!("invalid key id {:?}", id)))?;
        }
        for mount in &self.mount_points {
            if !mount.path.starts_with('/') || mount.path.len() < 2 {
                return Err(KeyError::Config(format!(
                    "mount point path must be absolute and non-root: {:?}",
                    mount.path
                )));
            }
        }
        Ok(())
    }

    pub fn is_master_key_enabled(&self) -> bool {
        self.master_key_enabled
    }

    /// Password protecting the system private keys.
    ///
    /// Derived from the instance secret; an empty secret is a fatal
    /// misconfiguration.
    pub fn master_key_password(&self) -> Result<String> {
        if self.secret.is_empty() {
            error!("master key password requested but no secret is configured");
            return Err(KeyError::MasterKeySecretMissing);
        }
        Ok(hashing::derive_key(MASTER_PASSWORD_CONTEXT, &[self.secret.as_bytes()]).to_hex())
    }

    /// Settings for the crypto layer
    pub fn crypt_config(&self) -> CryptConfig {
        CryptConfig {
            module_id: self.module_id.clone(),
            cipher: self.cipher,
            kdf: self.kdf,
        }
    }

    /// The innermost mount containing a path relative to a `files` area
    pub fn mount_for(&self, rel: &str) -> Option<&MountPoint> {
        self.mount_points
            .iter()
            .filter(|m| m.contains(rel))
            .max_by_key(|m| m.path.trim_end_matches('/').len())
    }

    /// Whether content at a full path should be encrypted. Paths outside a
    /// `files` area and outside any mount are encrypted.
    pub fn is_encrypted_path(&self, path: &str) -> bool {
        match paths::split_user_path(path) {
            Some(parts) if parts.area == paths::FILES_AREA => {
                self.mount_for(parts.rel).map(|m| m.encrypted).unwrap_or(true)
            }
            _ => true,
        }
    }

    /// The system-wide mount containing `rel`, if any
    pub fn system_mount_for(&self, rel: &str) -> Option<&MountPoint> {
        self.mount_for(rel).filter(|m| m.system_wide)
    }

    /// Paths of every configured system-wide mount
    pub fn system_mount_paths(&self) -> Vec<String> {
        self.mount_points
            .iter()
            .filter(|m| m.system_wide)
            .map(|m| m.path.trim_end_matches('/').to_string())
            .collect()
    }
}
