//! File cache collaborator
//!
//! Holds the per-file metadata rows the key manager reads: the `encrypted`
//! flag, the encrypted version and the two sizes.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A file cache row
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: u64,
    pub path: String,
    pub encrypted: bool,
    /// Generation of the current share keys; 0 when unknown
    pub encrypted_version: u32,
    /// Size on storage
    pub size: u64,
    /// Size of the plaintext
    pub unencrypted_size: u64,
}

/// A partial update of a row
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileInfoUpdate {
    pub encrypted: Option<bool>,
    pub encrypted_version: Option<u32>,
    pub size: Option<u64>,
    pub unencrypted_size: Option<u64>,
}

impl FileInfoUpdate {
    fn apply(&self, info: &mut FileInfo) {
        if let Some(encrypted) = self.encrypted {
            info.encrypted = encrypted;
        }
        if let Some(version) = self.encrypted_version {
            info.encrypted_version = version;
        }
        if let Some(size) = self.size {
            info.size = size;
        }
        if let Some(size) = self.unencrypted_size {
            info.unencrypted_size = size;
        }
    }
}

/// Per-file metadata store
pub trait FileCache: Send + Sync {
    /// Row for a full path
    fn get(&self, path: &str) -> Option<FileInfo>;

    /// Insert or update the row for `path`
    fn put(&self, path: &str, update: FileInfoUpdate) -> FileInfo;

    /// Update a row by id. Returns whether the row existed.
    fn update(&self, file_id: u64, update: FileInfoUpdate) -> bool;

    /// Move a row, and the rows below it, to a new path
    fn rename(&self, from: &str, to: &str);

    /// Drop the row for `path`
    fn remove(&self, path: &str);

    /// Every row flagged `encrypted`
    fn encrypted_rows(&self) -> Vec<FileInfo>;
}

/// In-memory file cache
#[derive(Clone, Default)]
pub struct MemoryFileCache {
    rows: Arc<DashMap<String, FileInfo>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryFileCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Load previously exported rows
    pub fn from_rows(rows: Vec<FileInfo>) -> Self {
        let cache = Self::new();
        let max_id = rows.iter().map(|r| r.file_id).max().unwrap_or(0);
        cache.next_id.store(max_id, Ordering::SeqCst);
        for row in rows {
            cache.rows.insert(row.path.clone(), row);
        }
        cache
    }

    /// Export every row, sorted by path
    pub fn rows(&self) -> Vec<FileInfo> {
        let mut rows: Vec<FileInfo> = self.rows.iter().map(|e| e.value().clone()).collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl FileCache for MemoryFileCache {
    fn get(&self, path: &str) -> Option<FileInfo> {
        self.rows.get(path).map(|e| e.value().clone())
    }

    fn put(&self, path: &str, update: FileInfoUpdate) -> FileInfo {
        let mut entry = self.rows.entry(path.to_string()).or_insert_with(|| FileInfo {
            file_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            path: path.to_string(),
            ..FileInfo::default()
        });
        update.apply(entry.value_mut());
        entry.value().clone()
    }

    fn update(&self, file_id: u64, update: FileInfoUpdate) -> bool {
        for mut entry in self.rows.iter_mut() {
            if entry.file_id == file_id {
                update.apply(entry.value_mut());
                return true;
            }
        }
        false
    }

    fn rename(&self, from: &str, to: &str) {
        let prefix = format!("{}/", from);
        let moved: Vec<String> = self
            .rows
            .iter()
            .filter(|e| e.key() == from || e.key().starts_with(&prefix))
            .map(|e| e.key().clone())
            .collect();
        for old in moved {
            if let Some((_, mut row)) = self.rows.remove(&old) {
                row.path = format!("{}{}", to, &old[from.len()..]);
                self.rows.insert(row.path.clone(), row);
            }
        }
    }

    fn remove(&self, path: &str) {
        self.rows.remove(path);
    }

    fn encrypted_rows(&self) -> Vec<FileInfo> {
        let mut rows: Vec<FileInfo> = self
            .rows
            .iter()
            .filter(|e| e.encrypted)
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|r| r.file_id);
        rows
    }
}
