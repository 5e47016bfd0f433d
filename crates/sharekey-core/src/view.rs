//! Hierarchical file view collaborators
//!
//! `FileView` is the minimal path-addressed storage the key manager and
//! migration need. `write_new` is the create-if-absent primitive; backends
//! implement it atomically.

use crate::error::{StorageError, StorageResult};
use crate::paths;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

/// Path-addressed storage of opaque blobs
pub trait FileView: Send + Sync {
    /// Read a whole file
    fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Write a whole file, creating parent directories
    fn write(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    /// Write only if nothing exists at `path`. Returns whether it wrote.
    fn write_new(&self, path: &str, data: &[u8]) -> StorageResult<bool>;

    /// Whether a file or directory exists at `path`
    fn exists(&self, path: &str) -> bool;

    /// Whether `path` is a directory
    fn is_dir(&self, path: &str) -> bool;

    /// Create a directory and its parents
    fn mkdir_all(&self, path: &str) -> StorageResult<()>;

    /// Move a file or directory, creating the target's parents
    fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Remove a file. Missing files are not an error.
    fn remove(&self, path: &str) -> StorageResult<()>;

    /// Remove a directory and everything below it
    fn remove_dir(&self, path: &str) -> StorageResult<()>;

    /// Names of the entries directly below `path`, sorted
    fn list_dir(&self, path: &str) -> StorageResult<Vec<String>>;
}

#[derive(Clone, Debug)]
enum Node {
    File(Vec<u8>),
    Dir,
}

/// In-memory view for tests
#[derive(Default)]
pub struct MemoryView {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl MemoryView {
    /// Create an empty view
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files stored
    pub fn file_count(&self) -> usize {
        self.nodes
            .read()
            .values()
            .filter(|n| matches!(n, Node::File(_)))
            .count()
    }

    /// All file paths, sorted
    pub fn file_paths(&self) -> Vec<String> {
        self.nodes
            .read()
            .iter()
            .filter(|(_, n)| matches!(n, Node::File(_)))
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn ensure_parents(nodes: &mut BTreeMap<String, Node>, path: &str) -> StorageResult<()> {
        let mut dir = paths::parent(path).to_string();
        let mut missing = Vec::new();
        while dir != "/" {
            match nodes.get(&dir) {
                Some(Node::Dir) => break,
                Some(Node::File(_)) => return Err(StorageError::NotADirectory(dir)),
                None => {
                    missing.push(dir.clone());
                    dir = paths::parent(&dir).to_string();
                }
            }
        }
        for dir in missing {
            nodes.insert(dir, Node::Dir);
        }
        Ok(())
    }

    fn descendants(nodes: &BTreeMap<String, Node>, path: &str) -> Vec<String> {
        let prefix = if path == "/" { "/".to_string() } else { format!("{}/", path) };
        nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

impl FileView for MemoryView {
    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let path = paths::normalize(path)?;
        match self.nodes.read().get(&path) {
            Some(Node::File(data)) => Ok(data.clone()),
            _ => Err(StorageError::NotFound(path)),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let path = paths::normalize(path)?;
        let mut nodes = self.nodes.write();
        if let Some(Node::Dir) = nodes.get(&path) {
            return Err(StorageError::InvalidPath(path));
        }
        Self::ensure_parents(&mut nodes, &path)?;
        nodes.insert(path, Node::File(data.to_vec()));
        Ok(())
    }

    fn write_new(&self, path: &str, data: &[u8]) -> StorageResult<bool> {
        let path = paths::normalize(path)?;
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&path) {
            return Ok(false);
        }
        Self::ensure_parents(&mut nodes, &path)?;
        nodes.insert(path, Node::File(data.to_vec()));
        Ok(true)
    }

    fn exists(&self, path: &str) -> bool {
        match paths::normalize(path) {
            Ok(p) => p == "/" || self.nodes.read().contains_key(&p),
            Err(_) => false,
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        match paths::normalize(path) {
            Ok(p) => p == "/" || matches!(self.nodes.read().get(&p), Some(Node::Dir)),
            Err(_) => false,
        }
    }

    fn mkdir_all(&self, path: &str) -> StorageResult<()> {
        let path = paths::normalize(path)?;
        if path == "/" {
            return Ok(());
        }
        let mut nodes = self.nodes.write();
        match nodes.get(&path) {
            Some(Node::Dir) => Ok(()),
            Some(Node::File(_)) => Err(StorageError::NotADirectory(path)),
            None => {
                Self::ensure_parents(&mut nodes, &path)?;
                nodes.insert(path, Node::Dir);
                Ok(())
            }
        }
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let from = paths::normalize(from)?;
        let to = paths::normalize(to)?;
        if from == to {
            return Ok(());
        }
        if to.starts_with(&format!("{}/", from)) {
            return Err(StorageError::InvalidPath(to));
        }
        let mut nodes = self.nodes.write();
        let node = nodes
            .remove(&from)
            .ok_or_else(|| StorageError::NotFound(from.clone()))?;
        if let Err(e) = Self::ensure_parents(&mut nodes, &to) {
            nodes.insert(from, node);
            return Err(e);
        }

        // Replace whatever was at the target
        for stale in Self::descendants(&nodes, &to) {
            nodes.remove(&stale);
        }
        for child in Self::descendants(&nodes, &from) {
            if let Some(moved) = nodes.remove(&child) {
                let suffix = &child[from.len()..];
                nodes.insert(format!("{}{}", to, suffix), moved);
            }
        }
        nodes.insert(to, node);
        Ok(())
    }

    fn remove(&self, path: &str) -> StorageResult<()> {
        let path = paths::normalize(path)?;
        let mut nodes = self.nodes.write();
        match nodes.get(&path) {
            Some(Node::Dir) => Err(StorageError::InvalidPath(path)),
            Some(Node::File(_)) => {
                nodes.remove(&path);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn remove_dir(&self, path: &str) -> StorageResult<()> {
        let path = paths::normalize(path)?;
        let mut nodes = self.nodes.write();
        for child in Self::descendants(&nodes, &path) {
            nodes.remove(&child);
        }
        if path != "/" {
            nodes.remove(&path);
        }
        Ok(())
    }

    fn list_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        let path = paths::normalize(path)?;
        let nodes = self.nodes.read();
        if path != "/" && !matches!(nodes.get(&path), Some(Node::Dir)) {
            return Err(StorageError::NotFound(path));
        }
        let prefix_len = if path == "/" { 1 } else { path.len() + 1 };
        Ok(Self::descendants(&nodes, &path)
            .into_iter()
            .filter(|child| !child[prefix_len..].contains('/'))
            .map(|child| child[prefix_len..].to_string())
            .collect())
    }
}

/// View over a local directory
pub struct LocalView {
    root: PathBuf,
}

impl LocalView {
    /// Create a view rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let normalized = paths::normalize(path)?;
        Ok(self.root.join(normalized.trim_start_matches('/')))
    }

    fn create_parent(target: &std::path::Path) -> StorageResult<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn not_found_is_ok(result: std::io::Result<()>) -> StorageResult<()> {
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => Ok(other?),
    }
}

impl FileView for LocalView {
    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let target = self.resolve(path)?;
        fs::read(&target).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::Io(e),
        })
    }

    fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let target = self.resolve(path)?;
        Self::create_parent(&target)?;
        fs::write(&target, data)?;
        Ok(())
    }

    fn write_new(&self, path: &str, data: &[u8]) -> StorageResult<bool> {
        let target = self.resolve(path)?;
        Self::create_parent(&target)?;
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(data)?;
        file.sync_all()?;
        Ok(true)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_dir()).unwrap_or(false)
    }

    fn mkdir_all(&self, path: &str) -> StorageResult<()> {
        fs::create_dir_all(self.resolve(path)?)?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if !source.exists() {
            return Err(StorageError::NotFound(from.to_string()));
        }
        Self::create_parent(&target)?;
        if target.is_dir() && source.is_dir() {
            fs::remove_dir_all(&target)?;
        }
        fs::rename(&source, &target)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> StorageResult<()> {
        not_found_is_ok(fs::remove_file(self.resolve(path)?))
    }

    fn remove_dir(&self, path: &str) -> StorageResult<()> {
        not_found_is_ok(fs::remove_dir_all(self.resolve(path)?))
    }

    fn list_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        let target = self.resolve(path)?;
        let entries = fs::read_dir(&target).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::Io(e),
        })?;
        let mut names = Vec::new();
        for entry in entries {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}
