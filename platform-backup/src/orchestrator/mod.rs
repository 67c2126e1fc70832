//! Backup and restore sequencing.
//!
//! Both orchestrators run their phases strictly in order. The first failure
//! aborts the run and comes back wrapped in [`BackupError::Phase`] naming the
//! phase it happened in.
//!
//! [`BackupError::Phase`]: crate::utils::errors::BackupError::Phase

pub mod backup;
pub mod restore;

pub use backup::{BackupOrchestrator, BackupOutcome};
pub use restore::{RestoreOrchestrator, RestoreSummary};

use crate::config::Config;
use crate::runtime::{Docker, SystemRunner};
use crate::transfer::DockerSearchApi;
use crate::version::DiscoveryClient;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Preflight,
    Staging,
    Configuration,
    Volumes,
    Database,
    Search,
    Package,
    Unpack,
    PrepareFilesystem,
    ConfigurationRestore,
    VolumesRestore,
    DatabaseRestore,
    SearchStaging,
    AwaitPlatform,
    VersionCheck,
    SearchRestore,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Preflight => "Preflight check",
            Phase::Staging => "Staging area preparation",
            Phase::Configuration => "Configuration backup",
            Phase::Volumes => "Volume backup",
            Phase::Database => "Database backup",
            Phase::Search => "Search index backup",
            Phase::Package => "Packaging",
            Phase::Unpack => "Archive unpacking",
            Phase::PrepareFilesystem => "Filesystem preparation",
            Phase::ConfigurationRestore => "Configuration restore",
            Phase::VolumesRestore => "Volume restore",
            Phase::DatabaseRestore => "Database restore preparation",
            Phase::SearchStaging => "Search index staging",
            Phase::AwaitPlatform => "Waiting for platform start",
            Phase::VersionCheck => "Version compatibility check",
            Phase::SearchRestore => "Search index restore",
            Phase::Cleanup => "Cleanup",
        };
        f.write_str(name)
    }
}

/// The person running the tool: sees phase progress and notices, answers
/// confirmations. Purely observational apart from [`Operator::confirm`].
pub trait Operator: Send + Sync {
    fn phase(&self, phase: Phase);

    fn notice(&self, message: &str);

    /// Ask a yes/no question. `false` cancels the operation.
    fn confirm(&self, prompt: &str) -> bool;
}

/// External systems an orchestrator drives.
#[derive(Debug, Clone)]
pub struct Platform<R, S, V> {
    pub docker: Docker<R>,
    pub search: S,
    pub versions: V,
}

impl Platform<SystemRunner, DockerSearchApi<SystemRunner>, DiscoveryClient> {
    /// The local platform, reached through the docker CLI and `endpoint`.
    pub fn local(config: &Config, endpoint: &str) -> Self {
        let docker = Docker::new(SystemRunner, config.docker.helper_image.clone());
        let search = DockerSearchApi::new(docker.clone(), config.docker.search_container.clone(), config.search.port);
        Self { docker, search, versions: DiscoveryClient::new(endpoint) }
    }
}
