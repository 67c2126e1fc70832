//! Configuration tree transfer between a live configuration root and staging.

use crate::fs::{copy_tree, replace_tree, CopyOptions};
use crate::utils::errors::{BackupError, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Files copied from the configuration root.
pub const CONFIG_FILES: [&str; 2] = [".env", "traefik.yaml"];

/// Service configuration directories copied from the configuration root.
pub const CONFIG_DIRS: [&str; 4] = ["core", "auth", "sync", "opensearch"];

/// Copy the allow-listed entries from `live_dir` into `staging_dir`.
///
/// Every entry must exist; nothing is copied when one is missing.
pub fn backup(live_dir: &Path, staging_dir: &Path) -> Result<()> {
    for name in CONFIG_FILES.iter().chain(CONFIG_DIRS.iter()) {
        let path = live_dir.join(name);
        if !path.exists() {
            return Err(BackupError::NotFound(path));
        }
    }

    fs::create_dir_all(staging_dir)?;
    for file in CONFIG_FILES {
        fs::copy(live_dir.join(file), staging_dir.join(file))?;
    }
    for dir in CONFIG_DIRS {
        let stats = copy_tree(&live_dir.join(dir), &staging_dir.join(dir), CopyOptions::default())?;
        debug!(dir, files = stats.files, bytes = stats.bytes, "Copied configuration directory");
    }

    info!(from = %live_dir.display(), "Configuration backed up");
    Ok(())
}

/// Copy the allow-listed entries from `staging_dir` back into `live_dir`.
/// Existing directories are replaced, not merged.
pub fn restore(live_dir: &Path, staging_dir: &Path) -> Result<()> {
    for name in CONFIG_FILES.iter().chain(CONFIG_DIRS.iter()) {
        let path = staging_dir.join(name);
        if !path.exists() {
            return Err(BackupError::NotFound(path));
        }
    }

    fs::create_dir_all(live_dir)?;
    for file in CONFIG_FILES {
        fs::copy(staging_dir.join(file), live_dir.join(file))?;
    }
    for dir in CONFIG_DIRS {
        replace_tree(&staging_dir.join(dir), &live_dir.join(dir))?;
    }

    info!(to = %live_dir.display(), "Configuration restored");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::walker::list_files;
    use crate::testing::write_live_config as live_config;
    use tempfile::TempDir;

    #[test]
    fn test_backup_copies_allow_list_only() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let live = temp_dir.path().join("live");
        live_config(&live)?;
        fs::create_dir_all(live.join("data/db"))?;
        fs::write(live.join("data/db/PG_VERSION"), b"14")?;

        let staging = temp_dir.path().join("staging");
        backup(&live, &staging)?;

        assert!(!staging.join("data").exists());
        assert_eq!(fs::read(staging.join(".env"))?, fs::read(live.join(".env"))?);
        assert_eq!(list_files(&staging)?.len(), 6);
        Ok(())
    }

    #[test]
    fn test_backup_fails_on_missing_entry() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let live = temp_dir.path().join("live");
        live_config(&live)?;
        fs::remove_file(live.join("traefik.yaml"))?;

        let staging = temp_dir.path().join("staging");
        match backup(&live, &staging).unwrap_err() {
            BackupError::NotFound(path) => assert_eq!(path, live.join("traefik.yaml")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!staging.exists());
        Ok(())
    }

    #[test]
    fn test_restore_replaces_existing_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let staging = temp_dir.path().join("staging");
        live_config(&staging)?;

        let live = temp_dir.path().join("live");
        fs::create_dir_all(live.join("core"))?;
        fs::write(live.join("core/leftover.yaml"), b"old")?;

        restore(&live, &staging)?;

        assert!(!live.join("core/leftover.yaml").exists());
        assert_eq!(list_files(&live)?, list_files(&staging)?);
        Ok(())
    }
}
