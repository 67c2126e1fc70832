//! Platform Backup Library
//!
//! Point-in-time backup and restore of a containerised platform deployment:
//! configuration tree, named volumes, database dumps and search index
//! snapshots, packaged into one versioned archive.

pub mod archive;
pub mod config;
pub mod fs;
pub mod orchestrator;
pub mod poll;
pub mod runtime;
pub mod staging;
pub mod transfer;
pub mod utils;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{Config, Deployment};
pub use orchestrator::{BackupOrchestrator, BackupOutcome, Operator, Phase, Platform, RestoreOrchestrator};
pub use utils::errors::{BackupError, Result};
