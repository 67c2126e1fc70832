//! Configuration management for the backup engine.
//!
//! Tool settings load from an optional TOML file with every field defaulted.
//! The deployment itself (paths, ids, credentials) comes from the platform's
//! `.env` file in the configuration root.

use crate::poll::PollPolicy;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Name of the primary configuration file inside a configuration root.
pub const ENV_FILE: &str = ".env";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub docker: DockerConfig,
    pub database: DatabaseConfig,
    pub search: SearchConfig,
    pub polling: PollingConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Image used for ephemeral volume-copy helpers
    pub helper_image: String,

    /// Name filter of the database container
    pub database_container: String,

    /// Name filter of the search engine container
    pub search_container: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Databases dumped and restored, in order
    pub names: Vec<String>,

    /// Backup directory as mounted inside the database container
    pub backup_mount: String,

    /// Init-script directory, relative to the configuration root
    pub init_scripts_dir: PathBuf,

    /// Dump tool inside the database container
    pub dump_tool: String,

    /// Restore tool inside the database container
    pub restore_tool: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Snapshot repository name
    pub repository: String,

    /// Snapshot repository location inside the search container
    pub mount_path: String,

    /// Port the engine listens on inside its container
    pub port: u16,

    /// Fixed uid/gid the search engine runs as
    pub engine_uid: u32,

    /// Pause after repository registration and before destructive operations
    pub settle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub snapshot: PollPolicy,
    pub container: PollPolicy,
    pub health: PollPolicy,
    pub ownership: PollPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            helper_image: "busybox".to_string(),
            database_container: "server_db_1".to_string(),
            search_container: "server_opensearch_1".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            names: vec!["hoss_core".to_string(), "hoss_auth".to_string()],
            backup_mount: "/mnt/backup".to_string(),
            init_scripts_dir: PathBuf::from("core/db-init-scripts"),
            dump_tool: "/usr/local/bin/pg_dump".to_string(),
            restore_tool: "/usr/local/bin/pg_restore".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            repository: "hoss-backup-repository".to_string(),
            mount_path: "/mnt/snapshots".to_string(),
            port: 9200,
            engine_uid: 1000,
            settle_secs: 5,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            snapshot: PollPolicy::new(5, 120),
            container: PollPolicy::new(5, 36),
            health: PollPolicy::new(5, 36),
            ownership: PollPolicy::new(2, 90),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Config {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load settings from `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

/// Deployment values read from the platform's environment file.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub backup_root: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub postgres_user: String,
    pub postgres_password: String,
}

impl Deployment {
    /// Read `<config_dir>/.env`.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let env_file = config_dir.join(ENV_FILE);
        Self::from_map(&read_env_file(&env_file)?)
    }

    pub fn from_map(values: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            backup_root: expand_home(Path::new(required(values, "BACKUP_ROOT")?)),
            uid: parse_id(values, "UID")?,
            gid: parse_id(values, "GID")?,
            postgres_user: required(values, "POSTGRES_USER")?.to_string(),
            postgres_password: required(values, "POSTGRES_PASSWORD")?.to_string(),
        })
    }

    /// Directory mounted into the database container for dumps
    pub fn database_backup_dir(&self) -> PathBuf {
        self.backup_root.join(".db")
    }

    /// Host side of the search engine's snapshot repository mount
    pub fn snapshot_dir(&self) -> PathBuf {
        self.backup_root.join(".opensearch")
    }

    /// Well-known staging path for in-flight backups
    pub fn staging_dir(&self) -> PathBuf {
        self.backup_root.join(".current")
    }

    /// Where finished archives are written
    pub fn archives_dir(&self) -> PathBuf {
        self.backup_root.join("backups")
    }
}

/// Parse an environment file into a flat map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Err(BackupError::NotFound(path.to_path_buf()));
    }

    let mut values = HashMap::new();
    let iter = dotenvy::from_path_iter(path)
        .map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))?;
    for item in iter {
        let (key, value) =
            item.map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))?;
        values.insert(key, value);
    }

    Ok(values)
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

fn required<'a>(values: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    values
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BackupError::Config(format!("missing {} in deployment environment", key)))
}

fn parse_id(values: &HashMap<String, String>, key: &str) -> Result<u32> {
    let raw = required(values, key)?;
    raw.trim()
        .parse()
        .map_err(|_| BackupError::Config(format!("{} must be a numeric id, got '{}'", key, raw)))
}
