//! Admin recovery
//!
//! The recovery key pair is an escrow principal. Its private key is
//! protected by an administrator-chosen recovery password. Users who opt
//! in get a recovery share key on every file they own, which lets an
//! administrator re-wrap their files after a lost login password.

use crate::{
    KeyError, Result,
    access::AccessListProvider,
    key_manager::KeyManager,
    key_storage::KeyKind,
    paths,
};
use serde::Serialize;
use sharekey_crypto::PrivateKey;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Outcome of a recovery batch
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Files processed successfully
    pub processed_count: usize,
    /// Files that failed
    pub failed_count: usize,
    /// Files without the needed key material
    pub skipped_count: usize,
    /// Paths that failed with error messages
    pub failures: Vec<(String, String)>,
}

impl RecoveryReport {
    fn record(&mut self, path: &str, outcome: Result<bool>) {
        match outcome {
            Ok(true) => self.processed_count += 1,
            Ok(false) => self.skipped_count += 1,
            Err(e) => {
                warn!(path, error = %e, "recovery step failed");
                self.failed_count += 1;
                self.failures.push((path.to_string(), e.to_string()));
            }
        }
    }
}

/// Administrative recovery operations
pub struct Recovery {
    key_manager: Arc<KeyManager>,
    access: Arc<dyn AccessListProvider>,
}

impl Recovery {
    pub fn new(key_manager: Arc<KeyManager>, access: Arc<dyn AccessListProvider>) -> Self {
        Self { key_manager, access }
    }

    fn recovery_key_id(&self) -> &str {
        self.key_manager.get_recovery_key_id()
    }

    /// Whether the administrator enabled the recovery key
    pub fn is_recovery_key_enabled(&self) -> bool {
        self.key_manager.policy().is_recovery_admin_enabled()
    }

    /// Create the recovery key pair if needed and turn recovery on.
    ///
    /// Returns false when an existing recovery key does not open with
    /// `password`. Only a verified password enables recovery.
    #[instrument(skip(self, password))]
    pub fn enable_admin_recovery(&self, password: &str) -> Result<bool> {
        let key_id = self.recovery_key_id().to_string();
        let storage = self.key_manager.storage();
        let crypt = self.key_manager.crypt();

        if storage.get_system_user_key(&key_id, KeyKind::Private)?.is_none() {
            let pair = crypt.create_key_pair()?;
            let blob = crypt.encrypt_private_key(pair.private_key(), password, Some(&key_id))?;
            if storage.set_system_user_key_if_absent(&key_id, KeyKind::Private, &blob)? {
                storage.set_system_user_key(&key_id, KeyKind::Public, pair.public_key().to_base64().as_bytes())?;
                info!(key_id = %key_id, fingerprint = %pair.public_key().fingerprint(), "created recovery key pair");
            }
        }

        let Some(private_key) = self.open_recovery_key(password)? else {
            warn!(key_id = %key_id, "recovery password rejected");
            return Ok(false);
        };
        if storage.get_system_user_key(&key_id, KeyKind::Public)?.is_none() {
            storage.set_system_user_key(&key_id, KeyKind::Public, private_key.public_key().to_base64().as_bytes())?;
            info!(key_id = %key_id, "restored recovery public key");
        }
        self.key_manager.policy().set_recovery_admin_enabled(true);
        info!("admin recovery enabled");
        Ok(true)
    }

    /// Turn recovery off. The key pair is kept.
    #[instrument(skip(self, password))]
    pub fn disable_admin_recovery(&self, password: &str) -> Result<bool> {
        if !self.check_recovery_password(password)? {
            warn!("recovery password rejected");
            return Ok(false);
        }
        self.key_manager.policy().set_recovery_admin_enabled(false);
        info!("admin recovery disabled");
        Ok(true)
    }

    /// Whether `password` opens the stored recovery private key
    pub fn check_recovery_password(&self, password: &str) -> Result<bool> {
        Ok(self.open_recovery_key(password)?.is_some())
    }

    fn open_recovery_key(&self, password: &str) -> Result<Option<PrivateKey>> {
        let key_id = self.recovery_key_id();
        let Some(blob) = self.key_manager.storage().get_system_user_key(key_id, KeyKind::Private)? else {
            return Ok(None);
        };
        match self.key_manager.crypt().decrypt_private_key(&blob, password, Some(key_id)) {
            Ok(key) => Ok(Some(key)),
            Err(e) => {
                warn!(key_id, error = %e, "could not decrypt recovery key");
                Ok(None)
            }
        }
    }

    /// Re-encrypt the recovery private key under a new password
    #[instrument(skip(self, new_password, old_password))]
    pub fn change_recovery_key_password(&self, new_password: &str, old_password: &str) -> Result<bool> {
        let Some(private_key) = self.open_recovery_key(old_password)? else {
            return Ok(false);
        };
        let key_id = self.recovery_key_id();
        let blob = self
            .key_manager
            .crypt()
            .encrypt_private_key(&private_key, new_password, Some(key_id))?;
        self.key_manager.set_system_private_key(key_id, &blob)?;
        info!(key_id, "recovery key password changed");
        Ok(true)
    }

    pub fn is_recovery_enabled_for_user(&self, uid: &str) -> bool {
        self.key_manager.policy().is_recovery_enabled_for_user(uid)
    }

    /// Record a user's opt-in. Existing files change with
    /// [`Recovery::add_recovery_keys`] and [`Recovery::remove_recovery_keys`].
    pub fn set_recovery_for_user(&self, uid: &str, enabled: bool) {
        self.key_manager.policy().set_recovery_for_user(uid, enabled);
    }

    /// Encrypted files owned by `uid`
    fn owned_encrypted_files(&self, uid: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", paths::user_file_path(uid, "")?.trim_end_matches('/'));
        Ok(self
            .key_manager
            .file_cache()
            .encrypted_rows()
            .into_iter()
            .map(|row| row.path)
            .filter(|path| path.starts_with(&prefix))
            .collect())
    }

    /// Add the recovery share key to every file `uid` owns. Needs the
    /// owner's key in the session.
    #[instrument(skip(self))]
    pub fn add_recovery_keys(&self, uid: &str) -> Result<RecoveryReport> {
        let recovery_public = self.key_manager.get_recovery_public_key()?;
        let mut report = RecoveryReport::default();
        for path in self.owned_encrypted_files(uid)? {
            let outcome = self.add_recovery_key(&path, uid, &recovery_public);
            report.record(&path, outcome);
        }
        info!(uid, processed = report.processed_count, failed = report.failed_count, "added recovery keys");
        Ok(report)
    }

    fn add_recovery_key(&self, path: &str, uid: &str, recovery_public: &sharekey_crypto::PublicKey) -> Result<bool> {
        let Some(file_key) = self.key_manager.get_file_key(path, Some(uid))? else {
            return Ok(false);
        };
        let Some(generation) = self.current_generation(path)? else {
            return Ok(false);
        };
        let mut recipients = self.key_manager.recipients_for(&self.access.access_list(path), uid)?;
        recipients.insert(self.recovery_key_id().to_string(), recovery_public.clone());
        self.key_manager.share_file_key(path, &file_key, &recipients, generation)?;
        Ok(true)
    }

    /// Delete the recovery share key from every file `uid` owns
    #[instrument(skip(self))]
    pub fn remove_recovery_keys(&self, uid: &str) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for path in self.owned_encrypted_files(uid)? {
            let outcome = self.key_manager.delete_share_key(&path, self.recovery_key_id());
            report.record(&path, outcome);
        }
        info!(uid, processed = report.processed_count, "removed recovery keys");
        Ok(report)
    }

    /// Every encrypted file in a user's files area, paired with its owner
    fn all_encrypted_files(&self) -> Vec<(String, String)> {
        self.key_manager
            .file_cache()
            .encrypted_rows()
            .into_iter()
            .filter_map(|row| {
                let parts = paths::split_user_path(&row.path)?;
                if parts.area != paths::FILES_AREA || parts.rel.is_empty() {
                    return None;
                }
                let owner = parts.uid.to_string();
                Some((row.path, owner))
            })
            .collect()
    }

    /// Re-wrap files for their current readers using the recovery key.
    ///
    /// With a `uid` only that user's files are walked. Without one every
    /// user's files are, which needs admin recovery to be enabled. `None`
    /// when `password` does not open the recovery key.
    #[instrument(skip(self, password))]
    pub fn recover_users_files(&self, password: &str, uid: Option<&str>) -> Result<Option<RecoveryReport>> {
        let files = match uid {
            Some(uid) => self
                .owned_encrypted_files(uid)?
                .into_iter()
                .map(|path| (path, uid.to_string()))
                .collect::<Vec<_>>(),
            None if self.is_recovery_key_enabled() => self.all_encrypted_files(),
            None => {
                return Err(KeyError::Config(
                    "recovering all users needs admin recovery to be enabled".to_string(),
                ));
            }
        };
        let Some(private_key) = self.open_recovery_key(password)? else {
            return Ok(None);
        };
        let mut report = RecoveryReport::default();
        for (path, owner) in files {
            let outcome = self.recover_file(&path, &private_key, &owner);
            report.record(&path, outcome);
        }
        info!(
            uid = uid.unwrap_or("*"),
            processed = report.processed_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            "recovered user files"
        );
        Ok(Some(report))
    }

    /// Unwrap one file's key with the recovery key and wrap it again for the
    /// owner's current key and every other reader. The generation is kept.
    ///
    /// Returns false when the file has no recovery share key.
    pub fn recover_file(&self, path: &str, recovery_key: &PrivateKey, owner_uid: &str) -> Result<bool> {
        let Some(wrapped) = self.key_manager.get_share_key(path, self.recovery_key_id())? else {
            return Ok(false);
        };
        let file_key = self.key_manager.crypt().multi_key_decrypt(&wrapped, recovery_key)?;

        let mut recipients = self.key_manager.recipients_for(&self.access.access_list(path), owner_uid)?;
        recipients.insert(self.recovery_key_id().to_string(), recovery_key.public_key());
        self.key_manager
            .share_file_key(path, &file_key, &recipients, wrapped.generation)?;
        Ok(true)
    }

    fn current_generation(&self, path: &str) -> Result<Option<u32>> {
        match self.key_manager.get_version(path) {
            0 => Ok(self.key_manager.get_encrypted_file_key(path)?.map(|record| record.generation)),
            version => Ok(Some(version)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessList;
    use crate::file_cache::{FileCache, FileInfoUpdate};
    use crate::testing::Fixture;
    use crate::view::FileView;

    fn recovery(fixture: &Fixture) -> Recovery {
        Recovery::new(fixture.key_manager().clone(), fixture.shares.clone())
    }

    /// Store an encrypted file row with share keys for its readers
    fn encrypted_file(fixture: &Fixture, path: &str, owner: &str) -> sharekey_crypto::FileKey {
        let km = fixture.key_manager();
        let file_key = km.crypt().generate_file_key().unwrap();
        let recipients = km.recipients_for(&fixture.shares.access_list(path), owner).unwrap();
        km.share_file_key(path, &file_key, &recipients, 1).unwrap();
        fixture.file_cache.put(
            path,
            FileInfoUpdate {
                encrypted: Some(true),
                encrypted_version: Some(1),
                ..Default::default()
            },
        );
        file_key
    }

    #[test_log::test]
    fn test_enable_disable_admin_recovery() {
        let fixture = Fixture::new();
        let recovery = recovery(&fixture);
        assert!(!recovery.is_recovery_key_enabled());
        assert!(!recovery.check_recovery_password("admin").unwrap());

        assert!(recovery.enable_admin_recovery("admin").unwrap());
        assert!(recovery.is_recovery_key_enabled());
        assert!(recovery.check_recovery_password("admin").unwrap());

        // An existing key with a different password is not replaced
        assert!(!recovery.enable_admin_recovery("other").unwrap());
        assert!(!recovery.disable_admin_recovery("other").unwrap());
        assert!(recovery.is_recovery_key_enabled());

        assert!(recovery.disable_admin_recovery("admin").unwrap());
        assert!(!recovery.is_recovery_key_enabled());
        assert!(recovery.enable_admin_recovery("admin").unwrap());
    }

    #[test]
    fn test_change_recovery_password() {
        let fixture = Fixture::new();
        let recovery = recovery(&fixture);
        recovery.enable_admin_recovery("old").unwrap();

        assert!(!recovery.change_recovery_key_password("new", "wrong").unwrap());
        assert!(recovery.change_recovery_key_password("new", "old").unwrap());
        assert!(recovery.check_recovery_password("new").unwrap());
        assert!(!recovery.check_recovery_password("old").unwrap());
    }

    #[test]
    fn test_user_flag() {
        let fixture = Fixture::new();
        let recovery = recovery(&fixture);
        recovery.set_recovery_for_user("alice", true);
        assert!(!recovery.is_recovery_enabled_for_user("alice"));
        recovery.enable_admin_recovery("admin").unwrap();
        assert!(recovery.is_recovery_enabled_for_user("alice"));
    }

    #[test_log::test]
    fn test_add_and_remove_recovery_keys() {
        let fixture = Fixture::new();
        let km = fixture.key_manager();
        let recovery = recovery(&fixture);
        km.create_user_keys("alice", "pw").unwrap();
        km.init("alice", "pw").unwrap();
        recovery.enable_admin_recovery("admin").unwrap();

        encrypted_file(&fixture, "/alice/files/a.txt", "alice");
        encrypted_file(&fixture, "/alice/files/dir/b.txt", "alice");
        let recovery_id = km.get_recovery_key_id().to_string();
        assert!(km.get_share_key("/alice/files/a.txt", &recovery_id).unwrap().is_none());

        recovery.set_recovery_for_user("alice", true);
        let report = recovery.add_recovery_keys("alice").unwrap();
        assert_eq!(report.processed_count, 2);
        assert_eq!(report.failed_count, 0);
        let wrapped = km.get_share_key("/alice/files/dir/b.txt", &recovery_id).unwrap().unwrap();
        assert_eq!(wrapped.generation, 1);

        recovery.set_recovery_for_user("alice", false);
        let report = recovery.remove_recovery_keys("alice").unwrap();
        assert_eq!(report.processed_count, 2);
        assert!(km.get_share_key("/alice/files/a.txt", &recovery_id).unwrap().is_none());
        assert!(km.get_share_key("/alice/files/a.txt", "alice").unwrap().is_some());
    }

    #[test_log::test]
    fn test_recover_users_files_after_key_loss() {
        let fixture = Fixture::new();
        let km = fixture.key_manager();
        let recovery = recovery(&fixture);
        recovery.enable_admin_recovery("admin").unwrap();
        km.create_user_keys("alice", "pw").unwrap();
        recovery.set_recovery_for_user("alice", true);

        fixture.shares.share_with_user("/alice/files/shared.txt", "bob");
        km.create_user_keys("bob", "bobpw").unwrap();
        let lost = encrypted_file(&fixture, "/alice/files/shared.txt", "alice");
        let access = fixture.shares.access_list("/alice/files/shared.txt");
        assert_eq!(access, AccessList {
            users: ["alice".to_string(), "bob".to_string()].into_iter().collect(),
            public: false,
        });

        // Alice forgets her password and gets a new key pair
        km.delete_user_keys("alice").unwrap();
        km.create_user_keys("alice", "new-pw").unwrap();

        assert!(recovery.recover_users_files("wrong", Some("alice")).unwrap().is_none());
        let report = recovery.recover_users_files("admin", Some("alice")).unwrap().unwrap();
        assert_eq!(report.processed_count, 1);
        assert!(report.failures.is_empty());

        km.init("alice", "new-pw").unwrap();
        assert_eq!(km.get_file_key("/alice/files/shared.txt", Some("alice")).unwrap(), Some(lost));
        assert_eq!(km.get_version("/alice/files/shared.txt"), 1);
    }

    #[test]
    fn test_recover_isolates_per_file_failures() {
        let fixture = Fixture::new();
        let km = fixture.key_manager();
        let recovery = recovery(&fixture);
        recovery.enable_admin_recovery("admin").unwrap();
        km.create_user_keys("alice", "pw").unwrap();
        recovery.set_recovery_for_user("alice", true);

        encrypted_file(&fixture, "/alice/files/good.txt", "alice");
        encrypted_file(&fixture, "/alice/files/bad.txt", "alice");
        let recovery_id = km.get_recovery_key_id().to_string();
        km.storage()
            .set_file_key("/alice/files/bad.txt", &crate::key_storage::share_key_id(&recovery_id), b"junk")
            .unwrap();

        // A file without any recovery share key is skipped
        fixture.file_cache.put(
            "/alice/files/plain-keys.txt",
            FileInfoUpdate {
                encrypted: Some(true),
                ..Default::default()
            },
        );

        let report = recovery.recover_users_files("admin", Some("alice")).unwrap().unwrap();
        assert_eq!(report.processed_count, 1);
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.failures[0].0, "/alice/files/bad.txt");
    }

    #[test_log::test]
    fn test_recover_all_users_files() {
        let fixture = Fixture::new();
        let km = fixture.key_manager();
        let recovery = recovery(&fixture);
        km.create_user_keys("alice", "pw").unwrap();
        km.create_user_keys("bob", "pw").unwrap();

        // Not available while admin recovery is off
        assert!(matches!(recovery.recover_users_files("admin", None), Err(KeyError::Config(_))));

        recovery.enable_admin_recovery("admin").unwrap();
        recovery.set_recovery_for_user("alice", true);
        recovery.set_recovery_for_user("bob", true);
        let alice_key = encrypted_file(&fixture, "/alice/files/a.txt", "alice");
        let bob_key = encrypted_file(&fixture, "/bob/files/b.txt", "bob");

        km.delete_user_keys("alice").unwrap();
        km.create_user_keys("alice", "new").unwrap();
        km.delete_user_keys("bob").unwrap();
        km.create_user_keys("bob", "new").unwrap();

        let report = recovery.recover_users_files("admin", None).unwrap().unwrap();
        assert_eq!(report.processed_count, 2);
        assert_eq!(report.failed_count, 0);

        let alice = fixture.key_manager_with_session(Arc::new(crate::session::Session::new()));
        alice.init("alice", "new").unwrap();
        assert_eq!(alice.get_file_key("/alice/files/a.txt", Some("alice")).unwrap(), Some(alice_key));
        let bob = fixture.key_manager_with_session(Arc::new(crate::session::Session::new()));
        bob.init("bob", "new").unwrap();
        assert_eq!(bob.get_file_key("/bob/files/b.txt", Some("bob")).unwrap(), Some(bob_key));
    }

    #[test]
    fn test_enable_restores_missing_public_half() {
        let fixture = Fixture::new();
        let km = fixture.key_manager();
        let recovery = recovery(&fixture);
        recovery.enable_admin_recovery("admin").unwrap();
        let expected = km.get_recovery_public_key().unwrap();

        let key_id = km.get_recovery_key_id().to_string();
        fixture
            .view
            .remove(&format!("/files_encryption/TEST/{}.publicKey", key_id))
            .unwrap();
        assert!(km.get_recovery_public_key().is_err());

        // A wrong password restores nothing
        assert!(!recovery.enable_admin_recovery("wrong").unwrap());
        assert!(km.get_recovery_public_key().is_err());

        assert!(recovery.enable_admin_recovery("admin").unwrap());
        assert_eq!(km.get_recovery_public_key().unwrap(), expected);
    }
}
