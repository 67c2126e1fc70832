//! Ownership marker for the staging area.
//!
//! The lock is a sibling file (`<staging>.lock`) created with exclusive-create
//! semantics and holding who started the operation. It is never taken over
//! automatically: a leftover lock means an interrupted run and must be
//! discarded explicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: i32,
    pub host: String,
    pub operation: String,
    pub started_at: DateTime<Utc>,
}

impl LockInfo {
    pub fn current(operation: &str) -> Self {
        Self {
            pid: nix::unistd::getpid().as_raw(),
            host: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            operation: operation.to_string(),
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct StagingLock {
    path: PathBuf,
    info: LockInfo,
}

impl StagingLock {
    /// Lock file path guarding `staging_dir`.
    pub fn path_for(staging_dir: &Path) -> PathBuf {
        let mut name = staging_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        staging_dir.with_file_name(name)
    }

    /// Create the lock file; fails with `AlreadyExists` if another holds it.
    pub fn create(staging_dir: &Path, operation: &str) -> io::Result<Self> {
        let path = Self::path_for(staging_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let info = LockInfo::current(operation);
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
        file.sync_all()?;

        Ok(Self { path, info })
    }

    /// Holder recorded in an existing lock file, if it can be read.
    pub fn read(staging_dir: &Path) -> Option<LockInfo> {
        let content = fs::read_to_string(Self::path_for(staging_dir)).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn exists(staging_dir: &Path) -> bool {
        Self::path_for(staging_dir).symlink_metadata().is_ok()
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn release(self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_and_readable() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let staging = temp_dir.path().join(".current");

        let lock = StagingLock::create(&staging, "backup")?;
        assert_eq!(StagingLock::path_for(&staging), temp_dir.path().join(".current.lock"));

        let err = StagingLock::create(&staging, "backup").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        let holder = StagingLock::read(&staging).expect("lock metadata");
        assert_eq!(holder.pid, std::process::id() as i32);
        assert_eq!(&holder, lock.info());

        lock.release()?;
        assert!(!StagingLock::exists(&staging));
        Ok(())
    }
}
