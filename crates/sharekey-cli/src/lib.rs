//! # Sharekey Admin
//!
//! Administration tool for a sharekey data directory.
//!
//! This crate provides:
//! - **Migration**: move legacy keys into the current layout
//! - **Recovery**: enable, disable and use the admin recovery key
//! - **Status**: key ids, flags and counts at a glance

pub mod commands;
pub mod state;

pub use commands::{Command, Status, execute};
pub use state::{AdminContext, RecordedAccess, StateFile};
