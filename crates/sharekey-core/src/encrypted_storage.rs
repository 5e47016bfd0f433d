//! Encrypting storage wrapper
//!
//! Ties the key manager to a [`FileView`]: content written below an
//! encrypted mount is sealed under a fresh file key that is wrapped for
//! everyone on the file's access list. Paths are relative to the user's
//! `files` area.

use crate::{
    Result,
    access::AccessListProvider,
    error::StorageError,
    file_cache::FileInfoUpdate,
    key_manager::KeyManager,
    paths,
    view::FileView,
};
use sharekey_crypto::header;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Read/write/rename with transparent encryption
pub struct EncryptedStorage {
    view: Arc<dyn FileView>,
    key_manager: Arc<KeyManager>,
    access: Arc<dyn AccessListProvider>,
}

impl EncryptedStorage {
    pub fn new(view: Arc<dyn FileView>, key_manager: Arc<KeyManager>, access: Arc<dyn AccessListProvider>) -> Self {
        Self {
            view,
            key_manager,
            access,
        }
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.key_manager
    }

    /// Write `data` to `path` in the files area of `uid`
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn write(&self, uid: &str, path: &str, data: &[u8]) -> Result<()> {
        let full = paths::user_file_path(uid, path)?;
        let km = &self.key_manager;

        if !km.config().is_encrypted_path(&full) {
            self.view.write(&full, data)?;
            km.file_cache().put(
                &full,
                FileInfoUpdate {
                    encrypted: Some(false),
                    size: Some(data.len() as u64),
                    unencrypted_size: Some(data.len() as u64),
                    ..FileInfoUpdate::default()
                },
            );
            return Ok(());
        }

        if header::has_header(data) {
            // Already sealed content keeps its header and its key material
            debug!(path = %full, "content already carries a header, stored as-is");
            self.view.write(&full, data)?;
            km.file_cache().put(
                &full,
                FileInfoUpdate {
                    encrypted: Some(true),
                    size: Some(data.len() as u64),
                    ..FileInfoUpdate::default()
                },
            );
            return Ok(());
        }

        let file_key = km.crypt().generate_file_key()?;
        let sealed = km.crypt().seal_content(&file_key, data)?;
        let recipients = km.recipients_for(&self.access.access_list(&full), uid)?;
        let generation = km.get_version(&full) + 1;

        // New share keys and content land together or not at all
        let previous = km.file_key_snapshot(&full)?;
        let stored = km
            .share_file_key(&full, &file_key, &recipients, generation)
            .and_then(|()| Ok(self.view.write(&full, &sealed)?));
        if let Err(e) = stored {
            warn!(path = %full, error = %e, "write failed, restoring previous file keys");
            if let Err(restore) = km.restore_file_keys(&full, &previous) {
                warn!(path = %full, error = %restore, "could not restore previous file keys");
            }
            return Err(e);
        }
        km.file_cache().put(
            &full,
            FileInfoUpdate {
                encrypted: Some(true),
                encrypted_version: Some(generation),
                size: Some(sealed.len() as u64),
                unencrypted_size: Some(data.len() as u64),
            },
        );
        debug!(path = %full, generation, recipients = recipients.len(), "wrote encrypted content");
        Ok(())
    }

    /// Read `path` from the files area of `uid`. Encrypted content whose
    /// key cannot be recovered is an error, never garbage.
    #[instrument(skip(self))]
    pub fn read(&self, uid: &str, path: &str) -> Result<Vec<u8>> {
        let full = paths::user_file_path(uid, path)?;
        let data = self.view.read(&full)?;
        if !header::has_header(&data) {
            return Ok(data);
        }

        let Some(file_key) = self.key_manager.get_file_key(&full, Some(uid))? else {
            return Err(StorageError::Unreadable(full).into());
        };
        match self.key_manager.crypt().open_content(&file_key, &data) {
            Ok(plaintext) => Ok(plaintext),
            Err(e) => {
                warn!(path = %full, error = %e, "could not open content");
                Err(StorageError::Unreadable(full).into())
            }
        }
    }

    /// Move a file with its key material. Bytes move unchanged.
    #[instrument(skip(self))]
    pub fn rename(&self, uid: &str, from: &str, to: &str) -> Result<()> {
        let source = paths::user_file_path(uid, from)?;
        let target = paths::user_file_path(uid, to)?;
        let km = &self.key_manager;

        self.view.rename(&source, &target)?;
        km.rename_file_keys(&source, &target)?;
        km.file_cache().rename(&source, &target);
        km.file_cache().put(
            &target,
            FileInfoUpdate {
                encrypted: Some(km.config().is_encrypted_path(&target)),
                ..FileInfoUpdate::default()
            },
        );
        Ok(())
    }

    /// Delete a file with its key material
    #[instrument(skip(self))]
    pub fn delete(&self, uid: &str, path: &str) -> Result<()> {
        let full = paths::user_file_path(uid, path)?;
        self.view.remove(&full)?;
        self.key_manager.delete_all_file_keys(&full)?;
        self.key_manager.file_cache().remove(&full);
        Ok(())
    }
}
