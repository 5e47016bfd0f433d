//! Sharing and user directory collaborators

use crate::paths;
use crate::view::FileView;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Who may read a file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessList {
    /// Users with read access, owner included
    pub users: BTreeSet<String>,
    /// Whether the file is reachable through a public link
    pub public: bool,
}

/// Resolves the access list of a file
pub trait AccessListProvider: Send + Sync {
    fn access_list(&self, path: &str) -> AccessList;
}

/// Lists known users
pub trait UserDirectory: Send + Sync {
    fn users(&self) -> Vec<String>;
}

#[derive(Clone, Debug, Default)]
struct ShareEntry {
    users: BTreeSet<String>,
    public: bool,
}

/// In-memory sharing table. Shares on a folder apply to everything below it.
#[derive(Default)]
pub struct ShareTable {
    shares: DashMap<String, ShareEntry>,
}

impl ShareTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share `path` with `uid`
    pub fn share_with_user(&self, path: &str, uid: &str) {
        self.shares.entry(path.to_string()).or_default().users.insert(uid.to_string());
    }

    /// Stop sharing `path` with `uid`
    pub fn unshare_with_user(&self, path: &str, uid: &str) {
        if let Some(mut entry) = self.shares.get_mut(path) {
            entry.users.remove(uid);
        }
    }

    /// Toggle the public link on `path`
    pub fn set_public(&self, path: &str, public: bool) {
        self.shares.entry(path.to_string()).or_default().public = public;
    }
}

impl AccessListProvider for ShareTable {
    fn access_list(&self, path: &str) -> AccessList {
        let mut access = AccessList::default();
        if let Some(parts) = paths::split_user_path(path) {
            access.users.insert(parts.uid.to_string());
        }

        let mut current = path.to_string();
        loop {
            if let Some(entry) = self.shares.get(&current) {
                access.users.extend(entry.users.iter().cloned());
                access.public |= entry.public;
            }
            if current == "/" {
                break;
            }
            current = paths::parent(&current).to_string();
        }
        access
    }
}

/// Fixed list of users
#[derive(Clone, Debug, Default)]
pub struct StaticUserDirectory {
    users: Vec<String>,
}

impl StaticUserDirectory {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

impl UserDirectory for StaticUserDirectory {
    fn users(&self) -> Vec<String> {
        self.users.clone()
    }
}

/// Users discovered as top-level home folders of a view
pub struct ViewUserDirectory {
    view: Arc<dyn FileView>,
}

impl ViewUserDirectory {
    pub fn new(view: Arc<dyn FileView>) -> Self {
        Self { view }
    }
}

impl UserDirectory for ViewUserDirectory {
    fn users(&self) -> Vec<String> {
        let entries = self.view.list_dir("/").unwrap_or_default();
        entries
            .into_iter()
            .filter(|name| !name.starts_with('.') && name != "files_encryption")
            .filter(|name| self.view.is_dir(&format!("/{}", name)))
            .collect()
    }
}
