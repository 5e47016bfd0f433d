//! Shared fixtures for unit tests

use crate::{
    access::ShareTable,
    app_config::MemoryAppConfig,
    config::EncryptionConfig,
    file_cache::MemoryFileCache,
    key_manager::{Backends, KeyManager},
    key_storage::ViewKeyStorage,
    session::Session,
    view::MemoryView,
};
use sharekey_crypto::KdfParams;
use std::sync::Arc;

pub(crate) struct Fixture {
    pub view: Arc<MemoryView>,
    pub app_config: Arc<MemoryAppConfig>,
    pub file_cache: Arc<MemoryFileCache>,
    pub shares: Arc<ShareTable>,
    pub backends: Backends,
    pub config: EncryptionConfig,
    key_manager: Arc<KeyManager>,
}

impl Fixture {
    /// Per-user mode with a secret and cheap KDF parameters
    pub fn config() -> EncryptionConfig {
        EncryptionConfig {
            module_id: "TEST".to_string(),
            secret: "test-secret".to_string(),
            kdf: KdfParams::minimal(),
            ..EncryptionConfig::default()
        }
    }

    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    pub fn with_config(config: EncryptionConfig) -> Self {
        let view = Arc::new(MemoryView::new());
        let app_config = Arc::new(MemoryAppConfig::new());
        let file_cache = Arc::new(MemoryFileCache::new());
        let backends = Backends {
            key_storage: Arc::new(ViewKeyStorage::new(view.clone(), &config)),
            file_cache: file_cache.clone(),
            app_config: app_config.clone(),
        };
        let key_manager =
            Arc::new(KeyManager::new(config.clone(), &backends, Arc::new(Session::new())).unwrap());
        Self {
            view,
            app_config,
            file_cache,
            shares: Arc::new(ShareTable::new()),
            backends,
            config,
            key_manager,
        }
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.key_manager
    }

    /// Another manager over the same backends, as a second login would see it
    pub fn key_manager_with_session(&self, session: Arc<Session>) -> KeyManager {
        KeyManager::new(self.config.clone(), &self.backends, session).unwrap()
    }
}
