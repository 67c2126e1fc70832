//! Error types for the backup engine.

use crate::orchestrator::Phase;
use crate::staging::lock::LockInfo;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Exact shell commands an operator must run before retrying.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Remediation(pub Vec<String>);

impl Remediation {
    pub fn new(commands: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(commands.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        writeln!(f)?;
        write!(f, "Run the following before retrying:")?;
        for command in &self.0 {
            write!(f, "\n  {}", command)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Required path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Staging area {} already exists{}", path.display(), describe_holder(holder))]
    Conflict {
        path: PathBuf,
        holder: Option<LockInfo>,
    },

    #[error("Permission denied preparing {}: {source}{remediation}", path.display())]
    Permission {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        remediation: Remediation,
    },

    #[error("{operation} failed: {output}")]
    Transfer { operation: String, output: String },

    #[error("Database '{database}' transfer failed: {output}")]
    DatabaseTransfer { database: String, output: String },

    #[error("Timed out waiting for {target} after {attempts} attempts (last status: {last_status}){remediation}")]
    ReadinessTimeout {
        target: String,
        attempts: u32,
        last_status: String,
        remediation: Remediation,
    },

    #[error(
        "The platform version ({live}) is not compatible with the backup version ({backup}). \
         Backups are compatible with a platform's major.minor version; install a platform at a \
         compatible version, restore, then upgrade if needed"
    )]
    IncompatibleVersion { backup: String, live: String },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Search API error: {0}")]
    SearchApi(String),

    #[error("Archive {} is missing required entries: {}", path.display(), missing.join(", "))]
    ArchiveFormat { path: PathBuf, missing: Vec<String> },

    #[error("An existing installation was detected at {}; reset the local installation before restoring", .0.display())]
    TargetNotReset(PathBuf),

    #[error("{phase} failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<BackupError>,
    },
}

impl BackupError {
    /// Attach remediation commands to a readiness or permission failure.
    pub fn with_remediation(self, commands: Remediation) -> Self {
        match self {
            BackupError::ReadinessTimeout { target, attempts, last_status, .. } => {
                BackupError::ReadinessTimeout { target, attempts, last_status, remediation: commands }
            }
            BackupError::Permission { path, source, .. } => {
                BackupError::Permission { path, source, remediation: commands }
            }
            other => other,
        }
    }

    /// The phase an orchestrator aborted in, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            BackupError::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The underlying component error, unwrapping the phase context.
    pub fn root(&self) -> &BackupError {
        match self {
            BackupError::Phase { source, .. } => source.root(),
            other => other,
        }
    }
}

fn describe_holder(holder: &Option<LockInfo>) -> String {
    match holder {
        Some(info) => format!(
            " (started by pid {} on {} for {} at {})",
            info.pid, info.host, info.operation, info.started_at
        ),
        None => String::new(),
    }
}

/// Tags a component result with the orchestration phase it ran in.
pub trait PhaseContext<T> {
    fn during(self, phase: Phase) -> Result<T>;
}

impl<T> PhaseContext<T> for Result<T> {
    fn during(self, phase: Phase) -> Result<T> {
        self.map_err(|e| match e {
            already @ BackupError::Phase { .. } => already,
            source => BackupError::Phase { phase, source: Box::new(source) },
        })
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remediation_renders_commands() {
        let err = BackupError::ReadinessTimeout {
            target: "group 1000 on /data".into(),
            attempts: 3,
            last_status: "gid 1001".into(),
            remediation: Remediation::default(),
        }
        .with_remediation(Remediation::new(["sudo chgrp 1000 /data"]));

        let message = err.to_string();
        assert!(message.contains("after 3 attempts"));
        assert!(message.ends_with("Run the following before retrying:\n  sudo chgrp 1000 /data"));
    }

    #[test]
    fn test_phase_context_wraps_once() {
        let result: Result<()> = Err(BackupError::Snapshot("FAILED".into()));
        let err = result.during(Phase::Search).during(Phase::Package).unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Search));
        assert!(matches!(err.root(), BackupError::Snapshot(_)));
        assert!(err.to_string().starts_with("Search index backup failed"));
    }
}
