//! Admin state over a local data directory
//!
//! Key files live in the data directory itself. App config values and file
//! cache rows are kept in a JSON state file at its root.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sharekey_core::{
    AccessList, AccessListProvider, AppConfigSnapshot, Backends, EncryptionConfig, FileInfo, KeyManager, LocalView,
    MemoryAppConfig, MemoryFileCache, Migration, Recovery, Session, ViewKeyStorage, ViewUserDirectory, paths,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// State file name inside the data directory
pub const STATE_FILE: &str = ".sharekey-state.json";

/// Persisted app config and file cache
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub app_config: AppConfigSnapshot,
    #[serde(default)]
    pub file_cache: Vec<FileInfo>,
}

impl StateFile {
    /// Load the state of `data_dir`; empty when there is none yet
    pub fn load(data_dir: &Path) -> anyhow::Result<Self> {
        let path = data_dir.join(STATE_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "no state file yet");
            return Ok(Self::default());
        }
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    /// Replace the state file of `data_dir`
    pub fn save(&self, data_dir: &Path) -> anyhow::Result<()> {
        let path = data_dir.join(STATE_FILE);
        let tmp = data_dir.join(format!("{}.tmp", STATE_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

/// Everything an admin command needs
pub struct AdminContext {
    data_dir: PathBuf,
    config: EncryptionConfig,
    view: Arc<LocalView>,
    app_config: Arc<MemoryAppConfig>,
    file_cache: Arc<MemoryFileCache>,
    key_manager: Arc<KeyManager>,
}

impl AdminContext {
    /// Open the data directory
    pub fn open(data_dir: &Path, config: EncryptionConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(data_dir.is_dir(), "data directory {} does not exist", data_dir.display());
        let state = StateFile::load(data_dir)?;

        let view = Arc::new(LocalView::new(data_dir));
        let app_config = Arc::new(MemoryAppConfig::from_snapshot(state.app_config));
        let file_cache = Arc::new(MemoryFileCache::from_rows(state.file_cache));
        let backends = Backends {
            key_storage: Arc::new(ViewKeyStorage::new(view.clone(), &config)),
            file_cache: file_cache.clone(),
            app_config: app_config.clone(),
        };
        let key_manager = Arc::new(KeyManager::new(config.clone(), &backends, Arc::new(Session::new()))?);

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config,
            view,
            app_config,
            file_cache,
            key_manager,
        })
    }

    /// Write app config and file cache back to the state file
    pub fn save(&self) -> anyhow::Result<()> {
        StateFile {
            app_config: self.app_config.snapshot(),
            file_cache: self.file_cache.rows(),
        }
        .save(&self.data_dir)
    }

    pub fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    pub fn view(&self) -> &Arc<LocalView> {
        &self.view
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.key_manager
    }

    pub fn app_config(&self) -> &Arc<MemoryAppConfig> {
        &self.app_config
    }

    pub fn file_cache(&self) -> &Arc<MemoryFileCache> {
        &self.file_cache
    }

    /// Home folders found in the data directory
    pub fn users(&self) -> ViewUserDirectory {
        ViewUserDirectory::new(self.view.clone())
    }

    pub fn migration(&self) -> Migration {
        Migration::new(
            self.view.clone(),
            self.app_config.clone(),
            self.file_cache.clone(),
            Arc::new(self.users()),
            &self.config,
        )
    }

    pub fn recovery(&self) -> Recovery {
        Recovery::new(
            self.key_manager.clone(),
            Arc::new(RecordedAccess::new(self.key_manager.clone())),
        )
    }
}

/// Access lists rebuilt from the recipients recorded with each file.
///
/// The admin tool has no sharing backend, so the last wrap of a file is
/// the best record of who may read it.
pub struct RecordedAccess {
    key_manager: Arc<KeyManager>,
}

impl RecordedAccess {
    pub fn new(key_manager: Arc<KeyManager>) -> Self {
        Self { key_manager }
    }
}

impl AccessListProvider for RecordedAccess {
    fn access_list(&self, path: &str) -> AccessList {
        let mut access = AccessList::default();
        if let Some(parts) = paths::split_user_path(path) {
            access.users.insert(parts.uid.to_string());
        }

        let record = match self.key_manager.get_encrypted_file_key(path) {
            Ok(Some(record)) => record,
            Ok(None) => return access,
            Err(e) => {
                warn!(path, error = %e, "unreadable file key record");
                return access;
            }
        };

        let ids = self.key_manager.key_ids();
        for principal in record.recipients {
            if principal == ids.public_share_key_id {
                access.public = true;
            } else if principal != ids.master_key_id && principal != ids.recovery_key_id {
                access.users.insert(principal);
            }
        }
        access
    }
}
