//! Key layout migration
//!
//! Moves key material from the legacy flat layout into per-module folders,
//! merges legacy app config values and fixes file cache sizes. Every step
//! is idempotent. A key whose destination already exists is left in place
//! and counted as skipped.
//!
//! Legacy to new layout, for module `M` and user `U`:
//!
//! ```text
//! /U/files_encryption/U.privateKey              -> /U/files_encryption/M/U.privateKey
//! /files_encryption/public_keys/X.publicKey     -> /files_encryption/M/X.publicKey
//! /files_encryption/X.privateKey                -> /files_encryption/M/X.privateKey
//! /U/files_encryption/keys/<path>/<key>         -> /U/files_encryption/keys/files/<path>/M/<key>
//! /U/files_trashbin/keys/<path>/<key>           -> /U/files_encryption/keys/files_trashbin/<path>/M/<key>
//! /files_encryption/keys/<mount>/<path>/<key>   -> /files_encryption/keys/files/<mount>/<path>/M/<key>
//! ```

use crate::{
    Result,
    access::UserDirectory,
    app_config::{APP_ID, AppConfigStore, LEGACY_APP_ID},
    config::EncryptionConfig,
    error::{StorageError, StorageResult},
    file_cache::{FileCache, FileInfoUpdate},
    paths::{self, FILES_AREA, TRASH_AREA},
    policy::{RECOVERY_ADMIN_ENABLED, RECOVERY_ENABLED},
    view::FileView,
};
use semver::Version;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Layout version written once a migration completes
pub const LAYOUT_VERSION: &str = "2.0.0";

/// App value holding the installed layout version
pub const INSTALLED_VERSION: &str = "installed_version";

/// App values carried over from the legacy app id
const MERGED_APP_VALUES: [&str; 4] = ["recoveryKeyId", "publicShareKeyId", RECOVERY_ADMIN_ENABLED, "masterKeyId"];

const LEGACY_RECOVERY_ENABLED: &str = "recovery_enabled";
const LEGACY_MIGRATION_STATUS: &str = "migration_status";

const SYSTEM_DIR: &str = "/files_encryption";
const LEGACY_PUBLIC_KEY_DIR: &str = "/files_encryption/public_keys";
const KEYS_DIR: &str = "keys";

/// Counters of one migration run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Whether the migration ran at all
    pub performed: bool,
    /// Key files moved to their new location
    pub moved: usize,
    /// Key files left behind because their destination exists
    pub skipped: usize,
    /// Emptied legacy folders removed
    pub removed_dirs: usize,
    /// Legacy config values merged or dropped
    pub db_values_merged: usize,
    /// File cache rows whose size was fixed
    pub cache_rows_updated: usize,
}

/// Legacy key layout migration
pub struct Migration {
    view: Arc<dyn FileView>,
    app_config: Arc<dyn AppConfigStore>,
    file_cache: Arc<dyn FileCache>,
    users: Arc<dyn UserDirectory>,
    config: EncryptionConfig,
}

impl Migration {
    pub fn new(
        view: Arc<dyn FileView>,
        app_config: Arc<dyn AppConfigStore>,
        file_cache: Arc<dyn FileCache>,
        users: Arc<dyn UserDirectory>,
        config: &EncryptionConfig,
    ) -> Self {
        Self {
            view,
            app_config,
            file_cache,
            users,
            config: config.clone(),
        }
    }

    fn module_id(&self) -> &str {
        &self.config.module_id
    }

    /// Whether the recorded layout version predates this layout
    pub fn is_needed(&self) -> bool {
        let Some(installed) = self.app_config.get_app_value(APP_ID, INSTALLED_VERSION) else {
            return true;
        };
        match (Version::parse(installed.trim()), Version::parse(LAYOUT_VERSION)) {
            (Ok(installed), Ok(current)) => installed < current,
            _ => {
                warn!(installed = %installed, "unparsable installed layout version");
                true
            }
        }
    }

    /// Run every step when the recorded layout version is missing or older
    #[instrument(skip(self))]
    pub fn run(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        if !self.is_needed() {
            debug!("key layout is current");
            return Ok(report);
        }

        let moved = self.reorganize_folder_structure()?;
        report.moved = moved.moved;
        report.skipped = moved.skipped;
        report.removed_dirs = moved.removed_dirs;
        report.db_values_merged = self.update_db();
        report.cache_rows_updated = self.update_file_cache();
        report.performed = true;

        self.app_config.set_app_value(APP_ID, INSTALLED_VERSION, LAYOUT_VERSION);
        info!(
            moved = report.moved,
            skipped = report.skipped,
            db_values = report.db_values_merged,
            cache_rows = report.cache_rows_updated,
            "key layout migrated"
        );
        Ok(report)
    }

    /// Move every legacy key file into the per-module layout
    #[instrument(skip(self))]
    pub fn reorganize_folder_structure(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        self.reorganize_system_folder(&mut report)?;
        for uid in self.users.users() {
            if paths::validate_component(&uid).is_err() {
                warn!(uid = %uid, "skipping user with invalid id");
                continue;
            }
            self.reorganize_user(&uid, &mut report)?;
        }
        Ok(report)
    }

    fn reorganize_system_folder(&self, report: &mut MigrationReport) -> StorageResult<()> {
        let target_dir = paths::join(SYSTEM_DIR, self.module_id());

        for name in self.list_files(LEGACY_PUBLIC_KEY_DIR)? {
            if name.ends_with(".publicKey") {
                self.move_key(&paths::join(LEGACY_PUBLIC_KEY_DIR, &name), &paths::join(&target_dir, &name), report)?;
            }
        }
        self.remove_if_empty(LEGACY_PUBLIC_KEY_DIR, report)?;

        for name in self.list_files(SYSTEM_DIR)? {
            if name.ends_with(".privateKey") {
                self.move_key(&paths::join(SYSTEM_DIR, &name), &paths::join(&target_dir, &name), report)?;
            }
        }

        let keys_root = paths::join(SYSTEM_DIR, KEYS_DIR);
        for mount in self.config.system_mount_paths() {
            let legacy = format!("{}{}", keys_root, mount);
            if self.view.is_dir(&legacy) {
                self.migrate_key_tree(&legacy, &mount, "", false, report)?;
            }
        }
        Ok(())
    }

    fn reorganize_user(&self, uid: &str, report: &mut MigrationReport) -> StorageResult<()> {
        let user_dir = format!("/{}/files_encryption", uid);
        let key_name = format!("{}.privateKey", uid);
        let legacy_private = paths::join(&user_dir, &key_name);
        if self.view.exists(&legacy_private) && !self.view.is_dir(&legacy_private) {
            let target = paths::join(&paths::join(&user_dir, self.module_id()), &key_name);
            self.move_key(&legacy_private, &target, report)?;
        }

        let keys_root = paths::join(&user_dir, KEYS_DIR);
        for name in self.list_dirs(&keys_root)? {
            // Already the new layout's area folders
            if name == FILES_AREA || name == TRASH_AREA {
                continue;
            }
            self.migrate_key_tree(&paths::join(&keys_root, &name), &format!("/{}", name), uid, false, report)?;
        }

        let trash_keys = format!("/{}/{}/{}", uid, TRASH_AREA, KEYS_DIR);
        if self.view.is_dir(&trash_keys) {
            for name in self.list_dirs(&trash_keys)? {
                self.migrate_key_tree(&paths::join(&trash_keys, &name), &format!("/{}", name), uid, true, report)?;
            }
            self.remove_if_empty(&trash_keys, report)?;
        }
        Ok(())
    }

    /// Walk a legacy key folder. Files found directly in a folder are that
    /// file's keys; folders named after the module are already migrated.
    fn migrate_key_tree(
        &self,
        legacy_dir: &str,
        key_path: &str,
        uid: &str,
        in_trash: bool,
        report: &mut MigrationReport,
    ) -> StorageResult<()> {
        for name in self.view.list_dir(legacy_dir)? {
            let source = paths::join(legacy_dir, &name);
            if self.view.is_dir(&source) {
                if name == self.module_id() {
                    continue;
                }
                self.migrate_key_tree(&source, &paths::join(key_path, &name), uid, in_trash, report)?;
                continue;
            }
            match self.get_target_dir(uid, key_path, &name, in_trash) {
                Some(target_dir) => self.move_key(&source, &paths::join(&target_dir, &name), report)?,
                None => report.skipped += 1,
            }
        }
        self.remove_if_empty(legacy_dir, report)
    }

    /// New key folder for the legacy keys of `key_path`, a path relative to
    /// the user's files (or trash) area. An empty `uid` means the system key
    /// tree, which only maps onto configured system mounts.
    ///
    /// `None` means skip: no known mount for a system key, or `filename`
    /// already exists at the destination.
    pub fn get_target_dir(&self, uid: &str, key_path: &str, filename: &str, in_trash: bool) -> Option<String> {
        let key_path = paths::normalize(key_path).ok()?;
        let system_mount = !in_trash && self.config.system_mount_for(&key_path).is_some();
        if uid.is_empty() && !system_mount {
            warn!(key_path = %key_path, filename, in_trash, "no system mount for legacy key, left in place");
            return None;
        }
        let base = if system_mount {
            format!("{}/{}/{}{}", SYSTEM_DIR, KEYS_DIR, FILES_AREA, key_path)
        } else {
            let area = if in_trash { TRASH_AREA } else { FILES_AREA };
            format!("/{}/files_encryption/{}/{}{}", uid, KEYS_DIR, area, key_path)
        };
        let target_dir = paths::join(&base, self.module_id());
        if self.view.exists(&paths::join(&target_dir, filename)) {
            warn!(
                uid,
                key_path = %key_path,
                filename,
                "migration target already exists, legacy key left in place"
            );
            return None;
        }
        Some(target_dir)
    }

    fn move_key(&self, source: &str, target: &str, report: &mut MigrationReport) -> StorageResult<()> {
        if self.view.exists(target) {
            warn!(source, target, "migration target already exists, legacy key left in place");
            report.skipped += 1;
            return Ok(());
        }
        self.view.mkdir_all(paths::parent(target))?;
        self.view.rename(source, target)?;
        debug!(source, target, "moved key");
        report.moved += 1;
        Ok(())
    }

    fn remove_if_empty(&self, dir: &str, report: &mut MigrationReport) -> StorageResult<()> {
        if self.view.is_dir(dir) && self.view.list_dir(dir)?.is_empty() {
            self.view.remove_dir(dir)?;
            report.removed_dirs += 1;
        }
        Ok(())
    }

    fn list_entries(&self, dir: &str, want_dirs: bool) -> StorageResult<Vec<String>> {
        let names = match self.view.list_dir(dir) {
            Ok(names) => names,
            Err(StorageError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(names
            .into_iter()
            .filter(|name| self.view.is_dir(&paths::join(dir, name)) == want_dirs)
            .collect())
    }

    fn list_files(&self, dir: &str) -> StorageResult<Vec<String>> {
        self.list_entries(dir, false)
    }

    fn list_dirs(&self, dir: &str) -> StorageResult<Vec<String>> {
        self.list_entries(dir, true)
    }

    /// Merge legacy app and user config values into the current app id.
    /// Values already present under the current app id win. Returns the
    /// number of legacy values consumed.
    #[instrument(skip(self))]
    pub fn update_db(&self) -> usize {
        let mut merged = 0;
        for key in MERGED_APP_VALUES {
            let Some(legacy) = self.app_config.get_app_value(LEGACY_APP_ID, key) else {
                continue;
            };
            if self.app_config.get_app_value(APP_ID, key).is_none() {
                self.app_config.set_app_value(APP_ID, key, &legacy);
            }
            self.app_config.delete_app_value(LEGACY_APP_ID, key);
            merged += 1;
        }

        for uid in self.app_config.users_with_value(LEGACY_APP_ID, LEGACY_RECOVERY_ENABLED) {
            if let Some(legacy) = self.app_config.get_user_value(&uid, LEGACY_APP_ID, LEGACY_RECOVERY_ENABLED) {
                if self.app_config.get_user_value(&uid, APP_ID, RECOVERY_ENABLED).is_none() {
                    self.app_config.set_user_value(&uid, APP_ID, RECOVERY_ENABLED, &legacy);
                }
            }
            self.app_config.delete_user_value(&uid, LEGACY_APP_ID, LEGACY_RECOVERY_ENABLED);
            merged += 1;
        }

        for uid in self.app_config.users_with_value(LEGACY_APP_ID, LEGACY_MIGRATION_STATUS) {
            self.app_config.delete_user_value(&uid, LEGACY_APP_ID, LEGACY_MIGRATION_STATUS);
            merged += 1;
        }

        if merged > 0 {
            info!(merged, "merged legacy config values");
        }
        merged
    }

    /// Report the plaintext size for encrypted files. Returns the number of
    /// rows changed.
    #[instrument(skip(self))]
    pub fn update_file_cache(&self) -> usize {
        let mut updated = 0;
        for row in self.file_cache.encrypted_rows() {
            if row.size == row.unencrypted_size {
                continue;
            }
            let update = FileInfoUpdate {
                size: Some(row.unencrypted_size),
                ..FileInfoUpdate::default()
            };
            if self.file_cache.update(row.file_id, update) {
                updated += 1;
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::StaticUserDirectory;
    use crate::app_config::MemoryAppConfig;
    use crate::config::MountPoint;
    use crate::file_cache::MemoryFileCache;
    use crate::view::MemoryView;

    struct Setup {
        view: Arc<MemoryView>,
        app_config: Arc<MemoryAppConfig>,
        file_cache: Arc<MemoryFileCache>,
        migration: Migration,
    }

    fn setup() -> Setup {
        let view = Arc::new(MemoryView::new());
        let app_config = Arc::new(MemoryAppConfig::new());
        let file_cache = Arc::new(MemoryFileCache::new());
        let config = EncryptionConfig {
            module_id: "M".to_string(),
            mount_points: vec![MountPoint {
                path: "/shared".to_string(),
                encrypted: true,
                system_wide: true,
            }],
            ..EncryptionConfig::default()
        };
        let migration = Migration::new(
            view.clone(),
            app_config.clone(),
            file_cache.clone(),
            Arc::new(StaticUserDirectory::new(["alice"])),
            &config,
        );
        Setup {
            view,
            app_config,
            file_cache,
            migration,
        }
    }

    fn legacy_tree(view: &MemoryView) {
        view.write("/files_encryption/public_keys/alice.publicKey", b"pub").unwrap();
        view.write("/files_encryption/recovery_1.privateKey", b"rec").unwrap();
        view.write("/alice/files_encryption/alice.privateKey", b"priv").unwrap();
        view.write("/alice/files_encryption/keys/docs/a.txt/fileKey", b"fk").unwrap();
        view.write("/alice/files_encryption/keys/docs/a.txt/alice.shareKey", b"sk").unwrap();
        view.write("/alice/files_trashbin/keys/old.txt.d1/fileKey", b"tfk").unwrap();
        view.write("/files_encryption/keys/shared/s.txt/fileKey", b"sfk").unwrap();
    }

    #[test_log::test]
    fn test_reorganize_moves_every_key() {
        let s = setup();
        legacy_tree(&s.view);

        let report = s.migration.reorganize_folder_structure().unwrap();
        assert_eq!(report.moved, 7);
        assert_eq!(report.skipped, 0);

        let expected = [
            ("/files_encryption/M/alice.publicKey", "pub"),
            ("/files_encryption/M/recovery_1.privateKey", "rec"),
            ("/alice/files_encryption/M/alice.privateKey", "priv"),
            ("/alice/files_encryption/keys/files/docs/a.txt/M/fileKey", "fk"),
            ("/alice/files_encryption/keys/files/docs/a.txt/M/alice.shareKey", "sk"),
            ("/alice/files_encryption/keys/files_trashbin/old.txt.d1/M/fileKey", "tfk"),
            ("/files_encryption/keys/files/shared/s.txt/M/fileKey", "sfk"),
        ];
        for (path, content) in expected {
            assert_eq!(s.view.read(path).unwrap(), content.as_bytes(), "{}", path);
        }
        assert!(!s.view.exists("/files_encryption/public_keys"));
        assert!(!s.view.exists("/alice/files_encryption/keys/docs"));
        assert!(!s.view.exists("/alice/files_trashbin/keys"));
        assert!(!s.view.exists("/files_encryption/keys/shared"));
    }

    #[test]
    fn test_reorganize_is_idempotent() {
        let s = setup();
        legacy_tree(&s.view);
        s.migration.reorganize_folder_structure().unwrap();
        let before = s.view.file_paths();

        let report = s.migration.reorganize_folder_structure().unwrap();
        assert_eq!(report, MigrationReport::default());
        assert_eq!(s.view.file_paths(), before);
    }

    #[test]
    fn test_existing_target_is_never_overwritten() {
        let s = setup();
        s.view.write("/alice/files_encryption/keys/docs/a.txt/fileKey", b"legacy").unwrap();
        s.view.write("/alice/files_encryption/keys/files/docs/a.txt/M/fileKey", b"new").unwrap();

        assert!(s.migration.get_target_dir("alice", "/docs/a.txt", "fileKey", false).is_none());
        assert_eq!(
            s.migration.get_target_dir("alice", "/docs/a.txt", "alice.shareKey", false).as_deref(),
            Some("/alice/files_encryption/keys/files/docs/a.txt/M")
        );

        let report = s.migration.reorganize_folder_structure().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(s.view.read("/alice/files_encryption/keys/files/docs/a.txt/M/fileKey").unwrap(), b"new");
        assert!(s.view.exists("/alice/files_encryption/keys/docs/a.txt/fileKey"));
    }

    #[test]
    fn test_target_dir_rules() {
        let s = setup();
        assert_eq!(
            s.migration.get_target_dir("alice", "/shared/x", "fileKey", false).as_deref(),
            Some("/files_encryption/keys/files/shared/x/M")
        );
        assert_eq!(
            s.migration.get_target_dir("alice", "/shared/x", "fileKey", true).as_deref(),
            Some("/alice/files_encryption/keys/files_trashbin/shared/x/M")
        );
    }

    #[test]
    fn test_unmapped_system_key_is_skipped() {
        let s = setup();
        assert!(s.migration.get_target_dir("", "/unknown_mount/x.txt", "fileKey", false).is_none());
        assert!(s.migration.get_target_dir("", "/shared/x", "fileKey", true).is_none());
        assert_eq!(
            s.migration.get_target_dir("", "/shared/x", "fileKey", false).as_deref(),
            Some("/files_encryption/keys/files/shared/x/M")
        );
    }

    #[test]
    fn test_update_db_merges_legacy_values() {
        let s = setup();
        let app = &s.app_config;
        app.set_app_value(LEGACY_APP_ID, "recoveryKeyId", "recovery_old");
        app.set_app_value(LEGACY_APP_ID, "publicShareKeyId", "pubShare_old");
        app.set_app_value(APP_ID, "publicShareKeyId", "pubShare_new");
        app.set_user_value("alice", LEGACY_APP_ID, LEGACY_RECOVERY_ENABLED, "1");
        app.set_user_value("bob", LEGACY_APP_ID, LEGACY_RECOVERY_ENABLED, "1");
        app.set_user_value("bob", APP_ID, RECOVERY_ENABLED, "0");
        app.set_user_value("alice", LEGACY_APP_ID, LEGACY_MIGRATION_STATUS, "1");

        assert_eq!(s.migration.update_db(), 5);

        assert_eq!(app.get_app_value(APP_ID, "recoveryKeyId").as_deref(), Some("recovery_old"));
        assert_eq!(app.get_app_value(APP_ID, "publicShareKeyId").as_deref(), Some("pubShare_new"));
        assert!(app.get_app_value(LEGACY_APP_ID, "recoveryKeyId").is_none());
        assert!(app.get_app_value(LEGACY_APP_ID, "publicShareKeyId").is_none());
        assert_eq!(app.get_user_value("alice", APP_ID, RECOVERY_ENABLED).as_deref(), Some("1"));
        assert_eq!(app.get_user_value("bob", APP_ID, RECOVERY_ENABLED).as_deref(), Some("0"));
        assert!(app.get_user_value("alice", LEGACY_APP_ID, LEGACY_MIGRATION_STATUS).is_none());

        assert_eq!(s.migration.update_db(), 0);
    }

    #[test]
    fn test_update_file_cache() {
        let s = setup();
        s.file_cache.put(
            "/alice/files/a.txt",
            FileInfoUpdate {
                encrypted: Some(true),
                size: Some(8192),
                unencrypted_size: Some(3),
                ..Default::default()
            },
        );
        s.file_cache.put(
            "/alice/files/plain.txt",
            FileInfoUpdate {
                size: Some(10),
                unencrypted_size: Some(0),
                ..Default::default()
            },
        );

        assert_eq!(s.migration.update_file_cache(), 1);
        assert_eq!(s.file_cache.get("/alice/files/a.txt").unwrap().size, 3);
        assert_eq!(s.file_cache.get("/alice/files/plain.txt").unwrap().size, 10);
        assert_eq!(s.migration.update_file_cache(), 0);
    }

    #[test]
    fn test_run_records_layout_version() {
        let s = setup();
        legacy_tree(&s.view);
        assert!(s.migration.is_needed());

        let report = s.migration.run().unwrap();
        assert!(report.performed);
        assert_eq!(report.moved, 7);
        assert_eq!(s.app_config.get_app_value(APP_ID, INSTALLED_VERSION).as_deref(), Some(LAYOUT_VERSION));

        let again = s.migration.run().unwrap();
        assert!(!again.performed);
    }

    #[test]
    fn test_old_or_garbled_version_triggers_migration() {
        let s = setup();
        s.app_config.set_app_value(APP_ID, INSTALLED_VERSION, "1.7.0");
        assert!(s.migration.is_needed());
        s.app_config.set_app_value(APP_ID, INSTALLED_VERSION, "not a version");
        assert!(s.migration.is_needed());
        s.app_config.set_app_value(APP_ID, INSTALLED_VERSION, "2.1.0");
        assert!(!s.migration.is_needed());
    }
}
