//! Archive packaging and unpacking.
//!
//! An archive is a gzip-compressed tar of the staging tree. Only its internal
//! layout is a contract: five top-level entries, all required.

use crate::fs::walker::missing_entries;
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::info;

pub mod layout {
    pub const CONFIG_DIR: &str = "config";
    pub const VOLUMES_DIR: &str = "volumes";
    pub const DB_DIR: &str = "db";
    pub const SEARCH_DIR: &str = "search";
    pub const VERSION_FILE: &str = "version.json";

    /// Entries every archive must contain.
    pub const REQUIRED: [&str; 5] = [CONFIG_DIR, VOLUMES_DIR, DB_DIR, SEARCH_DIR, VERSION_FILE];
}

const ARCHIVE_PREFIX: &str = "hoss-backup-";
const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Archive file name for a backup taken at `now`.
pub fn archive_name(now: DateTime<Utc>) -> String {
    format!("{}{}.{}", ARCHIVE_PREFIX, now.format("%Y-%m-%dT%H%M%SZ"), ARCHIVE_EXTENSION)
}

/// Fail with [`BackupError::ArchiveFormat`] unless every required entry exists under `root`.
pub fn validate_layout(root: &Path) -> Result<()> {
    let missing = missing_entries(root, &layout::REQUIRED);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(BackupError::ArchiveFormat { path: root.to_path_buf(), missing })
    }
}

/// Package `staging` into `<archives_dir>/<archive_name(now)>`.
///
/// The archive is written under a `.partial` name and renamed once complete,
/// so an interrupted run never leaves a plausible-looking archive behind.
pub async fn package(staging: &Path, archives_dir: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    validate_layout(staging)?;
    fs::create_dir_all(archives_dir)?;

    let final_path = archives_dir.join(archive_name(now));
    let partial_path = final_path.with_extension("gz.partial");

    let staging_owned = staging.to_path_buf();
    let partial_owned = partial_path.clone();
    tokio::task::spawn_blocking(move || write_archive(&staging_owned, &partial_owned))
        .await
        .map_err(|e| BackupError::Io(std::io::Error::other(e)))??;

    fs::rename(&partial_path, &final_path)?;
    info!(archive = %final_path.display(), "Packaged backup archive");
    Ok(final_path)
}

fn write_archive(staging: &Path, output: &Path) -> Result<()> {
    let file = File::create(output)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", staging)?;

    let mut writer = builder.into_inner()?.finish()?;
    writer.flush()?;
    Ok(())
}

/// Unpack `archive` into `dest` and check its layout.
pub async fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    if !archive.is_file() {
        return Err(BackupError::NotFound(archive.to_path_buf()));
    }
    fs::create_dir_all(dest)?;

    let archive_owned = archive.to_path_buf();
    let dest_owned = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = File::open(&archive_owned)?;
        let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));
        tar.set_preserve_permissions(true);
        tar.unpack(&dest_owned)?;
        Ok(())
    })
    .await
    .map_err(|e| BackupError::Io(std::io::Error::other(e)))??;

    validate_layout(dest).map_err(|e| match e {
        BackupError::ArchiveFormat { missing, .. } => {
            BackupError::ArchiveFormat { path: archive.to_path_buf(), missing }
        }
        other => other,
    })?;

    info!(archive = %archive.display(), dest = %dest.display(), "Unpacked backup archive");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::walker::list_files;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn complete_tree(root: &Path) -> Result<()> {
        for dir in [layout::CONFIG_DIR, layout::VOLUMES_DIR, layout::DB_DIR, layout::SEARCH_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }
        fs::write(root.join(layout::VERSION_FILE), br#"{"version":"2.3.1","build":"abc"}"#)?;
        fs::write(root.join("config/.env"), b"UID=1000\n")?;
        fs::create_dir_all(root.join("volumes/auth"))?;
        fs::write(root.join("volumes/auth/private.pem"), b"key")?;
        Ok(())
    }

    #[test]
    fn test_archive_name_uses_utc_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(archive_name(now), "hoss-backup-2024-03-09T070501Z.tar.gz");
    }

    #[tokio::test]
    async fn test_package_then_unpack_preserves_tree() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let staging = temp_dir.path().join("staging");
        complete_tree(&staging)?;

        let archive = package(&staging, &temp_dir.path().join("backups"), Utc::now()).await?;
        assert!(archive.to_string_lossy().ends_with(".tar.gz"));
        assert_eq!(fs::read_dir(temp_dir.path().join("backups"))?.count(), 1);

        let restored = temp_dir.path().join("restored");
        unpack(&archive, &restored).await?;
        assert_eq!(list_files(&restored)?, list_files(&staging)?);
        assert_eq!(fs::read(restored.join("volumes/auth/private.pem"))?, b"key");
        Ok(())
    }

    #[tokio::test]
    async fn test_package_refuses_partial_staging() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let staging = temp_dir.path().join("staging");
        complete_tree(&staging)?;
        fs::remove_dir_all(staging.join(layout::SEARCH_DIR))?;

        let err = package(&staging, &temp_dir.path().join("backups"), Utc::now()).await.unwrap_err();
        match err {
            BackupError::ArchiveFormat { missing, .. } => assert_eq!(missing, vec!["search"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!temp_dir.path().join("backups").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_unpack_rejects_incomplete_archive() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let tree = temp_dir.path().join("tree");
        complete_tree(&tree)?;
        fs::remove_file(tree.join(layout::VERSION_FILE))?;
        let archive = temp_dir.path().join("broken.tar.gz");
        write_archive(&tree, &archive)?;

        let err = unpack(&archive, &temp_dir.path().join("out")).await.unwrap_err();
        match err {
            BackupError::ArchiveFormat { path, missing } => {
                assert_eq!(path, archive);
                assert_eq!(missing, vec!["version.json"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }
}
