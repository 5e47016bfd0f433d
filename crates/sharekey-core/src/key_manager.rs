//! Key manager
//!
//! Orchestrates key storage and reconstructs file keys. Two modes:
//!
//! - **per-user**: every user owns a key pair protected by their login
//!   password, and file keys are wrapped for each reader;
//! - **master key**: one system key pair, protected by a password derived
//!   from the instance secret, wraps every file key.
//!
//! Cryptographic failures (wrong password, corrupt blob) surface as
//! `false`/`None` with a log line. Misconfiguration is always an error.

use crate::{
    KeyError, Result,
    access::AccessList,
    app_config::{APP_ID, AppConfigStore, LEGACY_APP_ID},
    config::EncryptionConfig,
    file_cache::{FileCache, FileInfoUpdate},
    key_storage::{FILE_KEY_ID, KeyKind, KeyStorage, share_key_id},
    policy::RecoveryPolicy,
    session::{Session, SessionStatus},
};
use serde::{Deserialize, Serialize};
use sharekey_crypto::{AeadCipher, Crypt, FileKey, PrivateKey, PublicKey, WrappedKey, keys::random_bytes};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The per-file key record stored next to the share keys
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileKeyRecord {
    /// Generation the current share keys were produced for
    pub generation: u32,
    /// Cipher of the wraps
    pub cipher: AeadCipher,
    /// Principals holding a share key
    pub recipients: Vec<String>,
}

/// Ids of the system key pairs, resolved once per key manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyIds {
    pub master_key_id: String,
    pub public_share_key_id: String,
    pub recovery_key_id: String,
}

impl KeyIds {
    /// Take each id from configuration, else from app config, else
    /// generate one and store it in app config.
    pub fn resolve(config: &EncryptionConfig, app_config: &dyn AppConfigStore) -> Result<Self> {
        Ok(Self {
            master_key_id: resolve_id(config.master_key_id.as_deref(), app_config, "masterKeyId", "master")?,
            public_share_key_id: resolve_id(
                config.public_share_key_id.as_deref(),
                app_config,
                "publicShareKeyId",
                "pubShare",
            )?,
            recovery_key_id: resolve_id(config.recovery_key_id.as_deref(), app_config, "recoveryKeyId", "recovery")?,
        })
    }
}

fn resolve_id(configured: Option<&str>, app_config: &dyn AppConfigStore, app_key: &str, prefix: &str) -> Result<String> {
    if let Some(id) = configured {
        return Ok(id.to_string());
    }
    if let Some(id) = app_config.get_app_value(APP_ID, app_key).filter(|id| !id.is_empty()) {
        return Ok(id);
    }
    // Not migrated yet: adopt the legacy id so existing system keys stay reachable
    if let Some(id) = app_config.get_app_value(LEGACY_APP_ID, app_key).filter(|id| !id.is_empty()) {
        app_config.set_app_value(APP_ID, app_key, &id);
        info!(key = app_key, id = %id, "adopted legacy system key id");
        return Ok(id);
    }
    let id = format!("{}_{}", prefix, hex::encode(random_bytes::<4>()?));
    app_config.set_app_value(APP_ID, app_key, &id);
    info!(key = app_key, id = %id, "generated system key id");
    Ok(id)
}

/// Stored key blobs of one file, taken before they are replaced
#[derive(Clone, Debug, Default)]
pub struct FileKeySnapshot {
    blobs: Vec<(String, Vec<u8>)>,
}

impl FileKeySnapshot {
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

/// Users split by whether they can receive share keys
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShareReadiness {
    pub ready: Vec<String>,
    pub not_ready: Vec<String>,
}

/// Storage collaborators shared by the core components
#[derive(Clone)]
pub struct Backends {
    pub key_storage: Arc<dyn KeyStorage>,
    pub file_cache: Arc<dyn FileCache>,
    pub app_config: Arc<dyn AppConfigStore>,
}

/// Key storage orchestration and file-key reconstruction
pub struct KeyManager {
    config: EncryptionConfig,
    crypt: Crypt,
    session: Arc<Session>,
    storage: Arc<dyn KeyStorage>,
    file_cache: Arc<dyn FileCache>,
    policy: RecoveryPolicy,
    key_ids: KeyIds,
}

impl KeyManager {
    /// Create a key manager. Key ids are resolved here and never change.
    pub fn new(config: EncryptionConfig, backends: &Backends, session: Arc<Session>) -> Result<Self> {
        config.validate()?;
        let crypt = Crypt::new(config.crypt_config())?;
        let key_ids = KeyIds::resolve(&config, backends.app_config.as_ref())?;
        Ok(Self {
            config,
            crypt,
            session,
            storage: Arc::clone(&backends.key_storage),
            file_cache: Arc::clone(&backends.file_cache),
            policy: RecoveryPolicy::new(Arc::clone(&backends.app_config)),
            key_ids,
        })
    }

    pub fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    pub fn crypt(&self) -> &Crypt {
        &self.crypt
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn key_ids(&self) -> &KeyIds {
        &self.key_ids
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    pub(crate) fn storage(&self) -> &dyn KeyStorage {
        self.storage.as_ref()
    }

    pub(crate) fn file_cache(&self) -> &dyn FileCache {
        self.file_cache.as_ref()
    }

    pub fn is_master_key_enabled(&self) -> bool {
        self.config.is_master_key_enabled()
    }

    pub fn get_master_key_id(&self) -> &str {
        &self.key_ids.master_key_id
    }

    pub fn get_public_share_key_id(&self) -> &str {
        &self.key_ids.public_share_key_id
    }

    pub fn get_recovery_key_id(&self) -> &str {
        &self.key_ids.recovery_key_id
    }

    /// Password of the system private keys
    pub fn get_master_key_password(&self) -> Result<String> {
        self.config.master_key_password()
    }

    // ---- user keys ----

    /// Whether both halves of a user's key pair are stored
    pub fn user_has_keys(&self, uid: &str) -> Result<bool> {
        Ok(self.storage.get_user_key(uid, KeyKind::Private)?.is_some()
            && self.storage.get_user_key(uid, KeyKind::Public)?.is_some())
    }

    /// A user's encrypted private key blob
    pub fn get_private_key(&self, uid: &str) -> Result<Vec<u8>> {
        self.storage
            .get_user_key(uid, KeyKind::Private)?
            .ok_or_else(|| KeyError::PrivateKeyMissing { uid: uid.to_string() })
    }

    pub fn set_private_key(&self, uid: &str, blob: &[u8]) -> Result<()> {
        Ok(self.storage.set_user_key(uid, KeyKind::Private, blob)?)
    }

    /// A user's public key
    pub fn get_public_key(&self, uid: &str) -> Result<PublicKey> {
        let blob = self
            .storage
            .get_user_key(uid, KeyKind::Public)?
            .ok_or_else(|| KeyError::PublicKeyMissing { uid: uid.to_string() })?;
        parse_public_key(&blob)
    }

    pub fn set_public_key(&self, uid: &str, key: &PublicKey) -> Result<()> {
        Ok(self.storage.set_user_key(uid, KeyKind::Public, key.to_base64().as_bytes())?)
    }

    /// Create the key set of a user at first login. Returns false when the
    /// user already has keys.
    #[instrument(skip(self, password))]
    pub fn create_user_keys(&self, uid: &str, password: &str) -> Result<bool> {
        if self.user_has_keys(uid)? {
            return Ok(false);
        }
        let password = self.user_key_password(password)?;
        let pair = self.crypt.create_key_pair()?;
        let blob = self.crypt.encrypt_private_key(pair.private_key(), &password, Some(uid))?;
        self.set_private_key(uid, &blob)?;
        self.set_public_key(uid, pair.public_key())?;
        info!(uid, fingerprint = %pair.public_key().fingerprint(), "created user key pair");
        Ok(true)
    }

    /// Re-encrypt a user's private key under a new password. False when
    /// the old password does not open it.
    #[instrument(skip(self, old_password, new_password))]
    pub fn change_user_password(&self, uid: &str, old_password: &str, new_password: &str) -> Result<bool> {
        if self.is_master_key_enabled() {
            debug!(uid, "user keys follow the master key password");
            return Ok(false);
        }
        let blob = self.get_private_key(uid)?;
        let private_key = match self.crypt.decrypt_private_key(&blob, old_password, Some(uid)) {
            Ok(key) => key,
            Err(e) => {
                warn!(uid, error = %e, "old password does not open the private key");
                return Ok(false);
            }
        };
        let blob = self.crypt.encrypt_private_key(&private_key, new_password, Some(uid))?;
        self.set_private_key(uid, &blob)?;
        info!(uid, "private key password changed");
        Ok(true)
    }

    /// Remove a deleted user's key pair
    #[instrument(skip(self))]
    pub fn delete_user_keys(&self, uid: &str) -> Result<()> {
        self.storage.delete_user_key(uid, KeyKind::Private)?;
        self.storage.delete_user_key(uid, KeyKind::Public)?;
        info!(uid, "deleted user key pair");
        Ok(())
    }

    fn user_key_password(&self, password: &str) -> Result<String> {
        if self.is_master_key_enabled() {
            self.get_master_key_password()
        } else {
            Ok(password.to_string())
        }
    }

    /// Decrypt a private key blob, logging instead of failing on a bad password
    fn open_private_key(&self, blob: &[u8], password: &str, principal: &str) -> Option<PrivateKey> {
        match self.crypt.decrypt_private_key(blob, password, Some(principal)) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(principal, error = %e, "could not decrypt private key");
                None
            }
        }
    }

    // ---- login ----

    /// Decrypt the login principal's private key into the session.
    ///
    /// The status is `InitExecuted` from the start; it only becomes
    /// `InitSuccessful` once the key is cached.
    #[instrument(skip(self, password))]
    pub fn init(&self, uid: &str, password: &str) -> Result<bool> {
        self.session.set_status(SessionStatus::InitExecuted);

        let private_key = if self.is_master_key_enabled() {
            let password = self.get_master_key_password()?;
            let master_id = self.get_master_key_id();
            match self.storage.get_system_user_key(master_id, KeyKind::Private)? {
                Some(blob) => self.open_private_key(&blob, &password, master_id),
                None => {
                    warn!(key_id = master_id, "master private key is missing");
                    None
                }
            }
        } else {
            match self.storage.get_user_key(uid, KeyKind::Private)? {
                Some(blob) => self.open_private_key(&blob, password, uid),
                None => {
                    warn!(uid, "private key is missing");
                    None
                }
            }
        };

        let Some(private_key) = private_key else {
            return Ok(false);
        };
        self.session.set_private_key(private_key);
        self.session.set_status(SessionStatus::InitSuccessful);
        info!(uid, "session initialized");
        Ok(true)
    }

    /// Enter decrypt-all mode for `uid` using the user's login password
    #[instrument(skip(self, password))]
    pub fn prepare_decrypt_all(&self, uid: &str, password: &str) -> Result<bool> {
        let (principal, password) = if self.is_master_key_enabled() {
            (self.get_master_key_id().to_string(), self.get_master_key_password()?)
        } else {
            (uid.to_string(), password.to_string())
        };
        let blob = if self.is_master_key_enabled() {
            self.get_system_private_key(&principal)?
        } else {
            self.get_private_key(uid)?
        };
        match self.open_private_key(&blob, &password, &principal) {
            Some(key) => {
                self.session.prepare_decrypt_all(uid, Some(key));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ---- system keys ----

    /// A system private key blob
    pub fn get_system_private_key(&self, key_id: &str) -> Result<Vec<u8>> {
        self.storage
            .get_system_user_key(key_id, KeyKind::Private)?
            .ok_or_else(|| KeyError::PrivateKeyMissing { uid: key_id.to_string() })
    }

    pub fn set_system_private_key(&self, key_id: &str, blob: &[u8]) -> Result<()> {
        Ok(self.storage.set_system_user_key(key_id, KeyKind::Private, blob)?)
    }

    /// A system public key
    pub fn get_system_public_key(&self, key_id: &str) -> Result<PublicKey> {
        let blob = self
            .storage
            .get_system_user_key(key_id, KeyKind::Public)?
            .ok_or_else(|| KeyError::PublicKeyMissing { uid: key_id.to_string() })?;
        parse_public_key(&blob)
    }

    pub fn get_public_master_key(&self) -> Result<PublicKey> {
        self.get_system_public_key(self.get_master_key_id())
    }

    pub fn get_public_share_key(&self) -> Result<PublicKey> {
        self.get_system_public_key(self.get_public_share_key_id())
    }

    pub fn get_recovery_public_key(&self) -> Result<PublicKey> {
        self.get_system_public_key(self.get_recovery_key_id())
    }

    /// Open a system private key with the master password. `None` when the
    /// blob is missing or does not open.
    fn open_system_private_key(&self, key_id: &str) -> Result<Option<PrivateKey>> {
        let password = self.get_master_key_password()?;
        match self.storage.get_system_user_key(key_id, KeyKind::Private)? {
            Some(blob) => Ok(self.open_private_key(&blob, &password, key_id)),
            None => {
                debug!(key_id, "system private key is missing");
                Ok(None)
            }
        }
    }

    /// Create the master key pair if master-key mode is on and it is missing
    #[instrument(skip(self))]
    pub fn validate_master_key(&self) -> Result<()> {
        if !self.is_master_key_enabled() {
            return Ok(());
        }
        self.ensure_system_key_pair(&self.key_ids.master_key_id)
    }

    /// Create the public share key pair if it is missing
    #[instrument(skip(self))]
    pub fn validate_public_share_key(&self) -> Result<()> {
        self.ensure_system_key_pair(&self.key_ids.public_share_key_id)
    }

    fn ensure_system_key_pair(&self, key_id: &str) -> Result<()> {
        let has_private = self.storage.get_system_user_key(key_id, KeyKind::Private)?.is_some();
        let has_public = self.storage.get_system_user_key(key_id, KeyKind::Public)?.is_some();
        if has_private && has_public {
            return Ok(());
        }

        let password = self.get_master_key_password()?;
        if !has_private {
            let pair = self.crypt.create_key_pair()?;
            let blob = self.crypt.encrypt_private_key(pair.private_key(), &password, Some(key_id))?;
            if self.storage.set_system_user_key_if_absent(key_id, KeyKind::Private, &blob)? {
                self.storage
                    .set_system_user_key(key_id, KeyKind::Public, pair.public_key().to_base64().as_bytes())?;
                info!(key_id, fingerprint = %pair.public_key().fingerprint(), "created system key pair");
                return Ok(());
            }
            debug!(key_id, "system key pair was created concurrently");
        }

        // The private half exists; restore a missing public half from it
        if self.storage.get_system_user_key(key_id, KeyKind::Public)?.is_none() {
            let private_key = self
                .open_system_private_key(key_id)?
                .ok_or_else(|| KeyError::PublicKeyMissing { uid: key_id.to_string() })?;
            self.storage
                .set_system_user_key(key_id, KeyKind::Public, private_key.public_key().to_base64().as_bytes())?;
            info!(key_id, "restored system public key");
        }
        Ok(())
    }

    // ---- recipients ----

    /// Split `uids` into users that have a public key and users that do not
    pub fn filter_share_ready_users<'a, I>(&self, uids: I) -> Result<ShareReadiness>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut readiness = ShareReadiness::default();
        for uid in uids {
            if self.storage.get_user_key(uid, KeyKind::Public)?.is_some() {
                readiness.ready.push(uid.clone());
            } else {
                debug!(uid = %uid, "user has no public key yet");
                readiness.not_ready.push(uid.clone());
            }
        }
        Ok(readiness)
    }

    /// Public keys of `uids`. Every user must have one.
    pub fn get_public_keys<'a, I>(&self, uids: I) -> Result<BTreeMap<String, PublicKey>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        uids.into_iter()
            .map(|uid| Ok((uid.clone(), self.get_public_key(uid)?)))
            .collect()
    }

    /// Add the public share key when the file has a public link, and the
    /// recovery key when the owner opted in to recovery.
    pub fn add_system_keys(
        &self,
        access: &AccessList,
        public_keys: &mut BTreeMap<String, PublicKey>,
        owner_uid: &str,
    ) -> Result<()> {
        if access.public {
            public_keys.insert(self.get_public_share_key_id().to_string(), self.get_public_share_key()?);
        }
        if self.policy.is_recovery_enabled_for_user(owner_uid) {
            public_keys.insert(self.get_recovery_key_id().to_string(), self.get_recovery_public_key()?);
        }
        Ok(())
    }

    /// Everyone a file key must be wrapped for
    pub fn recipients_for(&self, access: &AccessList, owner_uid: &str) -> Result<BTreeMap<String, PublicKey>> {
        if self.is_master_key_enabled() {
            let mut keys = BTreeMap::new();
            keys.insert(self.get_master_key_id().to_string(), self.get_public_master_key()?);
            return Ok(keys);
        }

        let readiness = self.filter_share_ready_users(&access.users)?;
        if !readiness.ready.iter().any(|uid| uid == owner_uid) {
            return Err(KeyError::PublicKeyMissing { uid: owner_uid.to_string() });
        }
        let mut keys = self.get_public_keys(&readiness.ready)?;
        self.add_system_keys(access, &mut keys, owner_uid)?;
        Ok(keys)
    }

    /// Wrap `file_key` for `recipients` and replace the stored keys of `path`
    pub fn share_file_key(
        &self,
        path: &str,
        file_key: &FileKey,
        recipients: &BTreeMap<String, PublicKey>,
        generation: u32,
    ) -> Result<()> {
        let wrapped = self.crypt.multi_key_encrypt(file_key, recipients, generation)?;
        self.set_all_file_keys(path, &wrapped, generation)
    }

    // ---- file keys ----

    /// Reconstruct the file key of `path` for `uid`, or for the system-wide
    /// context when `uid` is `None`.
    #[instrument(skip(self))]
    pub fn get_file_key(&self, path: &str, uid: Option<&str>) -> Result<Option<FileKey>> {
        let Some((principal, private_key)) = self.resolve_reader(uid)? else {
            return Ok(None);
        };

        let wrapped = match self.get_share_key(path, &principal) {
            Ok(Some(wrapped)) => wrapped,
            Ok(None) => {
                debug!(path, principal = %principal, "no share key");
                return Ok(None);
            }
            Err(KeyError::Crypto(e)) => {
                warn!(path, principal = %principal, error = %e, "malformed share key");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let version = self.get_version(path);
        if version != 0 && wrapped.generation != version {
            debug!(
                path,
                principal = %principal,
                share_key_generation = wrapped.generation,
                version,
                "stale share key"
            );
            return Ok(None);
        }

        match self.crypt.multi_key_decrypt(&wrapped, &private_key) {
            Ok(file_key) => Ok(Some(file_key)),
            Err(e) => {
                warn!(path, principal = %principal, error = %e, "could not unwrap file key");
                Ok(None)
            }
        }
    }

    /// Principal and private key used to read file keys
    fn resolve_reader(&self, uid: Option<&str>) -> Result<Option<(String, PrivateKey)>> {
        if self.session.decrypt_all_mode_activated() {
            return Ok(Some((self.session.decrypt_all_uid()?, self.session.decrypt_all_key()?)));
        }

        if self.is_master_key_enabled() {
            let master_id = self.get_master_key_id().to_string();
            let private_key = if self.session.is_private_key_set() {
                self.session.private_key()?
            } else {
                match self.open_system_private_key(&master_id)? {
                    Some(key) => key,
                    None => return Ok(None),
                }
            };
            return Ok(Some((master_id, private_key)));
        }

        match uid {
            None => {
                let share_id = self.get_public_share_key_id().to_string();
                Ok(self.open_system_private_key(&share_id)?.map(|key| (share_id, key)))
            }
            Some(uid) => match self.session.private_key() {
                Ok(key) => Ok(Some((uid.to_string(), key))),
                Err(KeyError::SessionKeyMissing) => {
                    debug!(uid, "session has no private key");
                    Ok(None)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// The file key record of `path`
    pub fn get_encrypted_file_key(&self, path: &str) -> Result<Option<FileKeyRecord>> {
        match self.storage.get_file_key(path, FILE_KEY_ID)? {
            Some(blob) => Ok(Some(serde_json::from_slice(&blob)?)),
            None => Ok(None),
        }
    }

    /// Replace every stored key of `path` with `wrapped`
    pub fn set_all_file_keys(&self, path: &str, wrapped: &BTreeMap<String, WrappedKey>, generation: u32) -> Result<()> {
        self.storage.delete_all_file_keys(path)?;
        let record = FileKeyRecord {
            generation,
            cipher: self.crypt.config().cipher,
            recipients: wrapped.keys().cloned().collect(),
        };
        self.storage.set_file_key(path, FILE_KEY_ID, &serde_json::to_vec(&record)?)?;
        for (principal, key) in wrapped {
            self.storage.set_file_key(path, &share_key_id(principal), &key.to_bytes()?)?;
        }
        debug!(path, generation, recipients = wrapped.len(), "stored file keys");
        Ok(())
    }

    /// One principal's share key of `path`
    pub fn get_share_key(&self, path: &str, principal: &str) -> Result<Option<WrappedKey>> {
        match self.storage.get_file_key(path, &share_key_id(principal))? {
            Some(blob) => Ok(Some(WrappedKey::from_bytes(&blob)?)),
            None => Ok(None),
        }
    }

    /// Revoke one principal's share key. Returns whether it existed.
    pub fn delete_share_key(&self, path: &str, principal: &str) -> Result<bool> {
        let deleted = self.storage.delete_file_key(path, &share_key_id(principal))?;
        if deleted {
            if let Some(mut record) = self.get_encrypted_file_key(path)? {
                record.recipients.retain(|p| p != principal);
                self.storage.set_file_key(path, FILE_KEY_ID, &serde_json::to_vec(&record)?)?;
            }
        }
        Ok(deleted)
    }

    pub fn delete_all_file_keys(&self, path: &str) -> Result<()> {
        Ok(self.storage.delete_all_file_keys(path)?)
    }

    /// Move key material along with a renamed file
    pub fn rename_file_keys(&self, from: &str, to: &str) -> Result<()> {
        Ok(self.storage.rename_file_keys(from, to)?)
    }

    /// Copy of every stored key blob of `path`
    pub fn file_key_snapshot(&self, path: &str) -> Result<FileKeySnapshot> {
        let mut blobs = Vec::new();
        for key_id in self.storage.list_file_key_ids(path)? {
            if let Some(blob) = self.storage.get_file_key(path, &key_id)? {
                blobs.push((key_id, blob));
            }
        }
        Ok(FileKeySnapshot { blobs })
    }

    /// Put back the key blobs of `snapshot`, dropping anything written since
    pub fn restore_file_keys(&self, path: &str, snapshot: &FileKeySnapshot) -> Result<()> {
        self.storage.delete_all_file_keys(path)?;
        for (key_id, blob) in &snapshot.blobs {
            self.storage.set_file_key(path, key_id, blob)?;
        }
        debug!(path, keys = snapshot.blobs.len(), "restored file keys");
        Ok(())
    }

    // ---- versions ----

    /// Encrypted version of `path`; 0 when unknown
    pub fn get_version(&self, path: &str) -> u32 {
        self.file_cache.get(path).map(|row| row.encrypted_version).unwrap_or(0)
    }

    /// Record the encrypted version of `path`. No-op without file info.
    pub fn set_version(&self, path: &str, version: u32) {
        let Some(row) = self.file_cache.get(path) else {
            debug!(path, version, "no file info, version not recorded");
            return;
        };
        self.file_cache.update(
            row.file_id,
            FileInfoUpdate {
                encrypted_version: Some(version),
                ..FileInfoUpdate::default()
            },
        );
    }
}

fn parse_public_key(blob: &[u8]) -> Result<PublicKey> {
    let text = std::str::from_utf8(blob)
        .map_err(|e| sharekey_crypto::CryptoError::InvalidKey(format!("public key is not text: {}", e)))?;
    Ok(PublicKey::from_base64(text)?)
}
