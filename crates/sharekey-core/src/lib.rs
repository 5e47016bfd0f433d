//! # Sharekey Core
//!
//! Key management for per-file hybrid encryption.
//!
//! This crate provides:
//! - **Session**: per-login cache of the decrypted private key
//! - **Key Manager**: key storage orchestration and file-key reconstruction
//! - **Recovery**: admin escrow key and re-wrapping after a lost password
//! - **Migration**: legacy key layout and config upgrade
//! - **Encrypted Storage**: transparent encrypt-on-write over a file view
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Encrypted Storage   │   Recovery      │
//! ├─────────────────────────────────────────┤
//! │   Key Manager   │   Session             │   Migration
//! ├─────────────────────────────────────────┤
//! │   sharekey-crypto                       │
//! ├─────────────────────────────────────────┤
//! │   KeyStorage / FileView / FileCache / AppConfigStore
//! └─────────────────────────────────────────┘
//! ```

pub mod access;
pub mod app_config;
pub mod config;
pub mod encrypted_storage;
pub mod error;
pub mod file_cache;
pub mod key_manager;
pub mod key_storage;
pub mod migration;
pub mod paths;
pub mod policy;
pub mod recovery;
pub mod session;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use access::{AccessList, AccessListProvider, ShareTable, StaticUserDirectory, UserDirectory, ViewUserDirectory};
pub use app_config::{AppConfigSnapshot, AppConfigStore, MemoryAppConfig};
pub use config::{EncryptionConfig, MountPoint};
pub use encrypted_storage::EncryptedStorage;
pub use error::{KeyError, Result, StorageError, StorageResult};
pub use file_cache::{FileCache, FileInfo, FileInfoUpdate, MemoryFileCache};
pub use key_manager::{Backends, FileKeyRecord, FileKeySnapshot, KeyIds, KeyManager, ShareReadiness};
pub use key_storage::{KeyKind, KeyStorage, ViewKeyStorage};
pub use migration::{Migration, MigrationReport};
pub use recovery::{Recovery, RecoveryReport};
pub use session::{Session, SessionStatus};
pub use view::{FileView, LocalView, MemoryView};
