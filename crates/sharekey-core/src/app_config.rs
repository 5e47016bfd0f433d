//! App configuration collaborator
//!
//! Small string values keyed by app id, globally and per user. Recovery
//! flags, key ids and the installed layout version live here.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// App id of the current key layout
pub const APP_ID: &str = "encryption";

/// App id used before the layout migration
pub const LEGACY_APP_ID: &str = "files_encryption";

/// Key/value store of app settings
pub trait AppConfigStore: Send + Sync {
    fn get_app_value(&self, app: &str, key: &str) -> Option<String>;
    fn set_app_value(&self, app: &str, key: &str, value: &str);
    fn delete_app_value(&self, app: &str, key: &str);

    fn get_user_value(&self, uid: &str, app: &str, key: &str) -> Option<String>;
    fn set_user_value(&self, uid: &str, app: &str, key: &str, value: &str);
    fn delete_user_value(&self, uid: &str, app: &str, key: &str);

    /// Users that have a value for `app`/`key`
    fn users_with_value(&self, app: &str, key: &str) -> Vec<String>;
}

/// Serializable copy of an [`AppConfigStore`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfigSnapshot {
    /// app -> key -> value
    #[serde(default)]
    pub app: BTreeMap<String, BTreeMap<String, String>>,
    /// uid -> app -> key -> value
    #[serde(default)]
    pub user: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
}

/// In-memory app configuration
#[derive(Default)]
pub struct MemoryAppConfig {
    app: DashMap<(String, String), String>,
    user: DashMap<(String, String, String), String>,
}

impl MemoryAppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a snapshot
    pub fn from_snapshot(snapshot: AppConfigSnapshot) -> Self {
        let config = Self::new();
        for (app, values) in snapshot.app {
            for (key, value) in values {
                config.app.insert((app.clone(), key), value);
            }
        }
        for (uid, apps) in snapshot.user {
            for (app, values) in apps {
                for (key, value) in values {
                    config.user.insert((uid.clone(), app.clone(), key), value);
                }
            }
        }
        config
    }

    /// Export every value
    pub fn snapshot(&self) -> AppConfigSnapshot {
        let mut snapshot = AppConfigSnapshot::default();
        for entry in self.app.iter() {
            let (app, key) = entry.key();
            snapshot
                .app
                .entry(app.clone())
                .or_default()
                .insert(key.clone(), entry.value().clone());
        }
        for entry in self.user.iter() {
            let (uid, app, key) = entry.key();
            snapshot
                .user
                .entry(uid.clone())
                .or_default()
                .entry(app.clone())
                .or_default()
                .insert(key.clone(), entry.value().clone());
        }
        snapshot
    }
}

fn app_key(app: &str, key: &str) -> (String, String) {
    (app.to_string(), key.to_string())
}

fn user_key(uid: &str, app: &str, key: &str) -> (String, String, String) {
    (uid.to_string(), app.to_string(), key.to_string())
}

impl AppConfigStore for MemoryAppConfig {
    fn get_app_value(&self, app: &str, key: &str) -> Option<String> {
        self.app.get(&app_key(app, key)).map(|v| v.value().clone())
    }

    fn set_app_value(&self, app: &str, key: &str, value: &str) {
        self.app.insert(app_key(app, key), value.to_string());
    }

    fn delete_app_value(&self, app: &str, key: &str) {
        self.app.remove(&app_key(app, key));
    }

    fn get_user_value(&self, uid: &str, app: &str, key: &str) -> Option<String> {
        self.user.get(&user_key(uid, app, key)).map(|v| v.value().clone())
    }

    fn set_user_value(&self, uid: &str, app: &str, key: &str, value: &str) {
        self.user.insert(user_key(uid, app, key), value.to_string());
    }

    fn delete_user_value(&self, uid: &str, app: &str, key: &str) {
        self.user.remove(&user_key(uid, app, key));
    }

    fn users_with_value(&self, app: &str, key: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .user
            .iter()
            .filter(|e| e.key().1 == app && e.key().2 == key)
            .map(|e| e.key().0.clone())
            .collect();
        users.sort();
        users
    }
}
