//! Recovery flags stored in app configuration

use crate::app_config::{APP_ID, AppConfigStore};
use std::sync::Arc;

/// App value holding the global recovery switch
pub const RECOVERY_ADMIN_ENABLED: &str = "recoveryAdminEnabled";

/// User value holding a user's recovery opt-in
pub const RECOVERY_ENABLED: &str = "recoveryEnabled";

/// Reads and writes the recovery flags
#[derive(Clone)]
pub struct RecoveryPolicy {
    app_config: Arc<dyn AppConfigStore>,
}

impl RecoveryPolicy {
    pub fn new(app_config: Arc<dyn AppConfigStore>) -> Self {
        Self { app_config }
    }

    /// Whether the administrator enabled the recovery key
    pub fn is_recovery_admin_enabled(&self) -> bool {
        self.app_config.get_app_value(APP_ID, RECOVERY_ADMIN_ENABLED).as_deref() == Some("1")
    }

    pub(crate) fn set_recovery_admin_enabled(&self, enabled: bool) {
        self.app_config
            .set_app_value(APP_ID, RECOVERY_ADMIN_ENABLED, if enabled { "1" } else { "0" });
    }

    /// Whether new file keys of `uid` include the recovery key
    pub fn is_recovery_enabled_for_user(&self, uid: &str) -> bool {
        self.is_recovery_admin_enabled()
            && self.app_config.get_user_value(uid, APP_ID, RECOVERY_ENABLED).as_deref() == Some("1")
    }

    /// Record a user's recovery opt-in
    pub fn set_recovery_for_user(&self, uid: &str, enabled: bool) {
        self.app_config
            .set_user_value(uid, APP_ID, RECOVERY_ENABLED, if enabled { "1" } else { "0" });
    }
}
