//! Staging area lifecycle.
//!
//! A backup assembles its archive in a single well-known directory guarded by
//! a [`lock::StagingLock`]. An existing directory or lock means an earlier run
//! was interrupted; [`acquire`] refuses it until the caller has confirmed and
//! called [`discard`]. A restore stages into the deployment's own backup
//! mounts, prepared by [`initialize_for_restore`].

pub mod lock;

use crate::archive::layout;
use crate::fs::{permissions, recreate_dir, remove_path};
use crate::utils::errors::{BackupError, Remediation, Result};
use lock::StagingLock;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// An exclusively held staging directory.
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    lock: StagingLock,
}

impl StagingArea {
    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join(layout::CONFIG_DIR)
    }

    pub fn volumes_dir(&self) -> PathBuf {
        self.root.join(layout::VOLUMES_DIR)
    }

    pub fn db_dir(&self) -> PathBuf {
        self.root.join(layout::DB_DIR)
    }

    pub fn search_dir(&self) -> PathBuf {
        self.root.join(layout::SEARCH_DIR)
    }

    pub fn lock(&self) -> &StagingLock {
        &self.lock
    }
}

/// Take exclusive ownership of `path`.
///
/// Fails with [`BackupError::Conflict`] when the directory or its lock already
/// exists. The directory itself is created by [`initialize_for_backup`].
pub fn acquire(path: &Path, operation: &str) -> Result<StagingArea> {
    if path.symlink_metadata().is_ok() || StagingLock::exists(path) {
        return Err(BackupError::Conflict {
            path: path.to_path_buf(),
            holder: StagingLock::read(path),
        });
    }

    let lock = StagingLock::create(path, operation).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => BackupError::Conflict {
            path: path.to_path_buf(),
            holder: StagingLock::read(path),
        },
        _ => BackupError::Io(e),
    })?;

    info!(path = %path.display(), operation, "Acquired staging area");
    Ok(StagingArea { root: path.to_path_buf(), lock })
}

/// Delete a leftover staging directory and its lock. Only call this after the
/// operator has confirmed the partial contents may go.
pub fn discard(path: &Path) -> Result<()> {
    warn!(path = %path.display(), "Discarding partial staging area");
    if path.symlink_metadata().is_ok() {
        remove_path(path)?;
    }
    let lock_path = StagingLock::path_for(path);
    if lock_path.symlink_metadata().is_ok() {
        fs::remove_file(lock_path)?;
    }
    Ok(())
}

/// Create the staging root with its `config/`, `volumes/` and `db/` subtrees.
pub fn initialize_for_backup(area: &StagingArea) -> Result<()> {
    fs::create_dir(area.path())?;
    for dir in [area.config_dir(), area.volumes_dir(), area.db_dir()] {
        fs::create_dir(dir)?;
    }
    Ok(())
}

/// Delete the staging tree and give up the lock.
pub fn release(area: StagingArea) -> Result<()> {
    if area.root.symlink_metadata().is_ok() {
        remove_path(&area.root)?;
    }
    area.lock.release()?;
    info!(path = %area.root.display(), "Released staging area");
    Ok(())
}

/// Restore-side staging directories under the deployment's backup root.
#[derive(Debug, Clone)]
pub struct RestoreStaging {
    /// Mounted into the database container as its backup directory
    pub db_dir: PathBuf,
    /// Mounted into the search container as its snapshot repository
    pub search_dir: PathBuf,
}

/// Recreate `<backup_root>/.db` and `<backup_root>/.opensearch` empty. The
/// search directory gets group rwx so a search engine running under a
/// different uid can write to it.
pub fn initialize_for_restore(backup_root: &Path) -> Result<RestoreStaging> {
    let staging = RestoreStaging {
        db_dir: backup_root.join(".db"),
        search_dir: backup_root.join(".opensearch"),
    };

    let prepare = || -> io::Result<()> {
        recreate_dir(&staging.db_dir)?;
        recreate_dir(&staging.search_dir)?;
        permissions::set_mode(&staging.search_dir, permissions::OWNER_GROUP_RWX)
    };
    prepare().map_err(|e| {
        permission_error(e, backup_root, &[staging.db_dir.as_path(), staging.search_dir.as_path()])
    })?;

    Ok(staging)
}

/// Data directories recreated under a configuration root before a restore.
const CONFIG_DATA_DIRS: [&str; 3] = ["data/db", "data/opensearch", "data/events"];

/// Directories a fresh configuration root needs, created if missing.
const CONFIG_SKELETON_DIRS: [&str; 3] = ["data/nas/data", "ui", "auth/certificates"];

/// Search engine data directory inside a configuration root.
pub fn search_data_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("data/opensearch")
}

/// Prepare a reset configuration root to receive a restore.
pub fn initialize_config_root(config_dir: &Path) -> Result<()> {
    let prepare = || -> io::Result<()> {
        fs::create_dir_all(config_dir)?;
        for dir in CONFIG_DATA_DIRS {
            recreate_dir(&config_dir.join(dir))?;
        }
        permissions::set_mode(&search_data_dir(config_dir), permissions::OWNER_GROUP_RWX)?;
        for dir in CONFIG_SKELETON_DIRS {
            fs::create_dir_all(config_dir.join(dir))?;
        }
        Ok(())
    };

    let stale: Vec<PathBuf> = ["data/opensearch", "data/db"]
        .iter()
        .map(|d| config_dir.join(d))
        .collect();
    let stale_refs: Vec<&Path> = stale.iter().map(PathBuf::as_path).collect();
    prepare().map_err(|e| permission_error(e, config_dir, &stale_refs))
}

/// Map a permission failure to an error telling the operator what to delete.
fn permission_error(err: io::Error, path: &Path, to_delete: &[&Path]) -> BackupError {
    if err.kind() != io::ErrorKind::PermissionDenied {
        return BackupError::Io(err);
    }
    let commands = to_delete
        .iter()
        .map(|dir| format!("sudo rm -rf {}", dir.display()));
    BackupError::Permission {
        path: path.to_path_buf(),
        source: err,
        remediation: Remediation::new(commands),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_refuses_existing_area() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(".current");
        fs::create_dir(&path)?;
        fs::write(path.join("partial.dump"), b"half")?;

        let err = acquire(&path, "backup").unwrap_err();
        assert!(matches!(err, BackupError::Conflict { .. }));
        // nothing was touched
        assert!(path.join("partial.dump").exists());

        discard(&path)?;
        let area = acquire(&path, "backup")?;
        initialize_for_backup(&area)?;
        assert!(area.config_dir().is_dir());
        assert!(area.volumes_dir().is_dir());
        assert!(area.db_dir().is_dir());
        Ok(())
    }

    #[test]
    fn test_conflict_reports_holder() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(".current");
        let _held = acquire(&path, "backup")?;

        match acquire(&path, "backup").unwrap_err() {
            BackupError::Conflict { holder: Some(holder), .. } => {
                assert_eq!(holder.operation, "backup");
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn test_release_removes_tree_and_lock() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(".current");
        let area = acquire(&path, "backup")?;
        initialize_for_backup(&area)?;
        fs::write(area.db_dir().join("x.dump"), b"x")?;

        release(area)?;

        assert!(!path.exists());
        assert!(!StagingLock::exists(&path));
        acquire(&path, "backup")?;
        Ok(())
    }

    #[test]
    fn test_initialize_for_restore_recreates_dirs() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join(".db"))?;
        fs::write(root.join(".db/old.dump"), b"old")?;

        let staging = initialize_for_restore(root)?;

        assert!(staging.db_dir.is_dir());
        assert!(!staging.db_dir.join("old.dump").exists());
        assert_eq!(permissions::mode_of(&staging.search_dir)?, 0o770);
        Ok(())
    }

    #[test]
    fn test_initialize_config_root() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_dir = temp_dir.path().join("cfg");

        initialize_config_root(&config_dir)?;

        for dir in CONFIG_DATA_DIRS.iter().chain(CONFIG_SKELETON_DIRS.iter()) {
            assert!(config_dir.join(dir).is_dir(), "{dir} missing");
        }
        assert_eq!(permissions::mode_of(&search_data_dir(&config_dir))?, 0o770);
        Ok(())
    }

    #[test]
    fn test_permission_error_lists_remediation() {
        let err = permission_error(
            io::Error::from(io::ErrorKind::PermissionDenied),
            Path::new("/backup"),
            &[Path::new("/backup/.db")],
        );
        assert!(err.to_string().contains("sudo rm -rf /backup/.db"));

        let err = permission_error(io::Error::from(io::ErrorKind::NotFound), Path::new("/x"), &[]);
        assert!(matches!(err, BackupError::Io(_)));
    }
}
