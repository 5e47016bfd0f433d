//! Key storage collaborator
//!
//! Layout written by [`ViewKeyStorage`] (module id `M`):
//!
//! ```text
//! /<uid>/files_encryption/M/<uid>.privateKey         user private key
//! /files_encryption/M/<id>.publicKey                  user and system public keys
//! /files_encryption/M/<id>.privateKey                 system private keys
//! /<uid>/files_encryption/keys/<area>/<path>/M/       per-file keys
//! /files_encryption/keys/files/<mount>/<path>/M/      per-file keys on system-wide mounts
//! ```

use crate::config::EncryptionConfig;
use crate::error::{StorageError, StorageResult};
use crate::paths;
use crate::view::FileView;
use std::sync::Arc;
use tracing::debug;

/// Key id of the per-file key record
pub const FILE_KEY_ID: &str = "fileKey";

const SHARE_KEY_SUFFIX: &str = ".shareKey";

/// Key id of a principal's share key
pub fn share_key_id(principal: &str) -> String {
    format!("{}{}", principal, SHARE_KEY_SUFFIX)
}

/// Principal of a share key id, if it is one
pub fn principal_of(key_id: &str) -> Option<&str> {
    key_id.strip_suffix(SHARE_KEY_SUFFIX).filter(|p| !p.is_empty())
}

/// Which half of a key pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    Private,
    Public,
}

impl KeyKind {
    /// File name suffix of this kind
    pub fn suffix(&self) -> &'static str {
        match self {
            KeyKind::Private => "privateKey",
            KeyKind::Public => "publicKey",
        }
    }
}

/// Durable, path-addressable storage of key blobs
pub trait KeyStorage: Send + Sync {
    /// A user's key blob
    fn get_user_key(&self, uid: &str, kind: KeyKind) -> StorageResult<Option<Vec<u8>>>;

    /// Store a user's key blob
    fn set_user_key(&self, uid: &str, kind: KeyKind, data: &[u8]) -> StorageResult<()>;

    /// Delete a user's key blob
    fn delete_user_key(&self, uid: &str, kind: KeyKind) -> StorageResult<()>;

    /// A system key blob (master, public share, recovery)
    fn get_system_user_key(&self, key_id: &str, kind: KeyKind) -> StorageResult<Option<Vec<u8>>>;

    /// Store a system key blob
    fn set_system_user_key(&self, key_id: &str, kind: KeyKind, data: &[u8]) -> StorageResult<()>;

    /// Store a system key blob only if none exists. Returns whether it wrote.
    fn set_system_user_key_if_absent(&self, key_id: &str, kind: KeyKind, data: &[u8]) -> StorageResult<bool>;

    /// A per-file key blob (`fileKey` or `<principal>.shareKey`)
    fn get_file_key(&self, path: &str, key_id: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Store a per-file key blob
    fn set_file_key(&self, path: &str, key_id: &str, data: &[u8]) -> StorageResult<()>;

    /// Delete a per-file key blob. Returns whether it existed.
    fn delete_file_key(&self, path: &str, key_id: &str) -> StorageResult<bool>;

    /// Delete every key blob of a file
    fn delete_all_file_keys(&self, path: &str) -> StorageResult<()>;

    /// Move a file's key blobs along with the file
    fn rename_file_keys(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Ids of every key blob stored for a file
    fn list_file_key_ids(&self, path: &str) -> StorageResult<Vec<String>>;
}

/// Key storage over any [`FileView`]
pub struct ViewKeyStorage {
    view: Arc<dyn FileView>,
    module_id: String,
    config: EncryptionConfig,
}

impl ViewKeyStorage {
    /// Create key storage for the configured module and mounts
    pub fn new(view: Arc<dyn FileView>, config: &EncryptionConfig) -> Self {
        Self {
            view,
            module_id: config.module_id.clone(),
            config: config.clone(),
        }
    }

    /// Folder holding system keys and all public keys
    pub fn system_key_dir(&self) -> String {
        format!("/files_encryption/{}", self.module_id)
    }

    fn user_key_path(&self, uid: &str, kind: KeyKind) -> StorageResult<String> {
        let uid = paths::validate_component(uid)?;
        Ok(match kind {
            KeyKind::Private => format!(
                "/{}/files_encryption/{}/{}.{}",
                uid,
                self.module_id,
                uid,
                kind.suffix()
            ),
            KeyKind::Public => self.system_key_path(uid, kind)?,
        })
    }

    fn system_key_path(&self, key_id: &str, kind: KeyKind) -> StorageResult<String> {
        let key_id = paths::validate_component(key_id)?;
        Ok(format!("{}/{}.{}", self.system_key_dir(), key_id, kind.suffix()))
    }

    /// Folder whose `M` child holds a file's keys. Renaming it moves the
    /// keys of a folder's children too.
    pub fn file_key_base(&self, path: &str) -> StorageResult<String> {
        let path = paths::normalize(path)?;
        let parts = paths::split_user_path(&path).ok_or_else(|| StorageError::InvalidPath(path.clone()))?;
        if parts.rel.is_empty() {
            return Err(StorageError::InvalidPath(path.clone()));
        }
        if parts.area == paths::FILES_AREA && self.config.system_mount_for(parts.rel).is_some() {
            return Ok(format!("/files_encryption/keys/{}{}", paths::FILES_AREA, parts.rel));
        }
        Ok(format!(
            "/{}/files_encryption/keys/{}{}",
            parts.uid, parts.area, parts.rel
        ))
    }

    /// Folder holding a file's keys
    pub fn file_key_dir(&self, path: &str) -> StorageResult<String> {
        Ok(paths::join(&self.file_key_base(path)?, &self.module_id))
    }

    fn file_key_path(&self, path: &str, key_id: &str) -> StorageResult<String> {
        let key_id = paths::validate_component(key_id)?;
        Ok(paths::join(&self.file_key_dir(path)?, key_id))
    }

    fn read_optional(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        match self.view.read(path) {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Ok(Some(data)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl KeyStorage for ViewKeyStorage {
    fn get_user_key(&self, uid: &str, kind: KeyKind) -> StorageResult<Option<Vec<u8>>> {
        self.read_optional(&self.user_key_path(uid, kind)?)
    }

    fn set_user_key(&self, uid: &str, kind: KeyKind, data: &[u8]) -> StorageResult<()> {
        self.view.write(&self.user_key_path(uid, kind)?, data)
    }

    fn delete_user_key(&self, uid: &str, kind: KeyKind) -> StorageResult<()> {
        self.view.remove(&self.user_key_path(uid, kind)?)
    }

    fn get_system_user_key(&self, key_id: &str, kind: KeyKind) -> StorageResult<Option<Vec<u8>>> {
        self.read_optional(&self.system_key_path(key_id, kind)?)
    }

    fn set_system_user_key(&self, key_id: &str, kind: KeyKind, data: &[u8]) -> StorageResult<()> {
        self.view.write(&self.system_key_path(key_id, kind)?, data)
    }

    fn set_system_user_key_if_absent(&self, key_id: &str, kind: KeyKind, data: &[u8]) -> StorageResult<bool> {
        self.view.write_new(&self.system_key_path(key_id, kind)?, data)
    }

    fn get_file_key(&self, path: &str, key_id: &str) -> StorageResult<Option<Vec<u8>>> {
        self.read_optional(&self.file_key_path(path, key_id)?)
    }

    fn set_file_key(&self, path: &str, key_id: &str, data: &[u8]) -> StorageResult<()> {
        self.view.write(&self.file_key_path(path, key_id)?, data)
    }

    fn delete_file_key(&self, path: &str, key_id: &str) -> StorageResult<bool> {
        let key_path = self.file_key_path(path, key_id)?;
        if !self.view.exists(&key_path) {
            return Ok(false);
        }
        self.view.remove(&key_path)?;
        Ok(true)
    }

    fn delete_all_file_keys(&self, path: &str) -> StorageResult<()> {
        self.view.remove_dir(&self.file_key_dir(path)?)
    }

    fn rename_file_keys(&self, from: &str, to: &str) -> StorageResult<()> {
        let source = self.file_key_base(from)?;
        let target = self.file_key_base(to)?;
        if source == target || !self.view.exists(&source) {
            return Ok(());
        }
        debug!(from = %source, to = %target, "moving file keys");
        if self.view.exists(&target) {
            // Only this module's keys move; the target keeps anything else
            let source_dir = paths::join(&source, &self.module_id);
            if self.view.exists(&source_dir) {
                self.view.rename(&source_dir, &paths::join(&target, &self.module_id))?;
            }
            return Ok(());
        }
        self.view.rename(&source, &target)
    }

    fn list_file_key_ids(&self, path: &str) -> StorageResult<Vec<String>> {
        match self.view.list_dir(&self.file_key_dir(path)?) {
            Ok(ids) => Ok(ids),
            Err(StorageError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
