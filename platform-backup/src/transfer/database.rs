//! Database dumps, and the init script that restores them.
//!
//! Dumps are produced inside the running database container into its backup
//! mount. A restore cannot run against the serving container, so it is
//! deferred: the dumps are staged into the mount and a script dropped into the
//! container's init-script directory applies them on the next cold start,
//! then deletes them.

use crate::config::DatabaseConfig;
use crate::fs::{move_file, permissions};
use crate::runtime::{CommandRunner, Docker};
use crate::utils::errors::{BackupError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the generated restore script. Init scripts run in lexical order,
/// so it sorts after the database creation script.
pub const RESTORE_SCRIPT: &str = "zz-restore-db.sh";

/// Init script shipped with the platform that creates the databases.
pub const CREATE_SCRIPT: &str = "create-databases.sh";

/// File name of the dump for `database`, both in the mount and in the archive.
pub fn dump_file_name(database: &str) -> String {
    format!("postgres-{}-backup.dump", database)
}

#[derive(Clone)]
pub struct DatabaseCredentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct DatabaseTransfer<'a, R> {
    docker: &'a Docker<R>,
    container: &'a str,
    settings: &'a DatabaseConfig,
}

impl<'a, R: CommandRunner> DatabaseTransfer<'a, R> {
    pub fn new(docker: &'a Docker<R>, container: &'a str, settings: &'a DatabaseConfig) -> Self {
        Self { docker, container, settings }
    }

    /// Remove dumps a previous, interrupted run left in the host backup directory.
    pub fn clear_stale_dumps(&self, host_backup_dir: &Path) -> Result<()> {
        for database in &self.settings.names {
            let path = host_backup_dir.join(dump_file_name(database));
            if path.exists() {
                debug!(path = %path.display(), "Removing stale dump");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Dump `database` inside the container, then move the dump from the host
    /// side of the backup mount into `staging_db_dir`. Returns the staged path.
    pub async fn dump_database(
        &self,
        credentials: &DatabaseCredentials,
        database: &str,
        host_backup_dir: &Path,
        staging_db_dir: &Path,
    ) -> Result<PathBuf> {
        let file_name = dump_file_name(database);
        let script = format!(
            "{} -Fc -U {} {} > {}/{}",
            self.settings.dump_tool, credentials.user, database, self.settings.backup_mount, file_name
        );

        info!(database, container = self.container, "Dumping database");
        let id = self.docker.container_id(self.container).await?;
        let output = self
            .docker
            .exec(&id, false, &[("PGPASSWORD", credentials.password.as_str())], &script)
            .await?;
        if !output.success() {
            return Err(BackupError::DatabaseTransfer {
                database: database.to_string(),
                output: output.combined(),
            });
        }

        let produced = host_backup_dir.join(&file_name);
        if !produced.is_file() {
            return Err(BackupError::DatabaseTransfer {
                database: database.to_string(),
                output: format!("dump not found at {}", produced.display()),
            });
        }

        let staged = staging_db_dir.join(&file_name);
        move_file(&produced, &staged)?;
        debug!(database, path = %staged.display(), "Dump staged");
        Ok(staged)
    }

    /// Move every dump from an unpacked archive's `db/` into the host backup directory.
    pub fn stage_restore(&self, unpacked_db_dir: &Path, host_backup_dir: &Path) -> Result<()> {
        for database in &self.settings.names {
            let file_name = dump_file_name(database);
            let source = unpacked_db_dir.join(&file_name);
            if !source.is_file() {
                return Err(BackupError::NotFound(source));
            }
            move_file(&source, &host_backup_dir.join(&file_name))?;
        }
        info!(dir = %host_backup_dir.display(), "Database dumps staged for restore");
        Ok(())
    }

    /// Restoration script for the configured databases.
    pub fn restoration_script(&self) -> RestorationScript {
        RestorationScript {
            databases: self.settings.names.clone(),
            mount_dir: self.settings.backup_mount.clone(),
            restore_tool: self.settings.restore_tool.clone(),
        }
    }
}

/// Deferred database restore, run once by the database container on its next
/// cold start. It deletes its input dumps when done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorationScript {
    pub databases: Vec<String>,
    pub mount_dir: String,
    pub restore_tool: String,
}

impl RestorationScript {
    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/bash\n\nset -e\nset -u\n");
        script.push_str("echo \"Restoring database from backup\"\n");
        for database in &self.databases {
            script.push_str(&format!(
                "{} -U $POSTGRES_USER -d {} {}/{}\n",
                self.restore_tool,
                database,
                self.mount_dir,
                dump_file_name(database)
            ));
        }
        for database in &self.databases {
            script.push_str(&format!("rm {}/{}\n", self.mount_dir, dump_file_name(database)));
        }
        script.push_str("echo \"Database restore complete!\"\n");
        script
    }

    /// Write the script into `init_dir` and make it and the creation script
    /// executable by everyone.
    pub fn write(&self, init_dir: &Path) -> Result<PathBuf> {
        let create_script = init_dir.join(CREATE_SCRIPT);
        if !create_script.is_file() {
            return Err(BackupError::NotFound(create_script));
        }

        let path = init_dir.join(RESTORE_SCRIPT);
        fs::write(&path, self.render())?;
        permissions::add_mode_bits(&path, permissions::READ_EXECUTE_ALL)?;
        permissions::add_mode_bits(&create_script, permissions::READ_EXECUTE_ALL)?;

        info!(path = %path.display(), "Wrote database restore script");
        Ok(path)
    }
}
