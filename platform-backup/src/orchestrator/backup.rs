//! Backup sequence.

use super::{Operator, Phase, Platform};
use crate::archive;
use crate::config::{Config, Deployment};
use crate::runtime::CommandRunner;
use crate::staging::{self, StagingArea};
use crate::transfer::search::snapshot_name;
use crate::transfer::{
    config_tree, DatabaseCredentials, DatabaseTransfer, Ownership, SearchApi, SearchIndexTransfer, VolumeTransfer,
    VOLUME_ROLES,
};
use crate::utils::errors::{BackupError, PhaseContext, Result};
use crate::version::VersionSource;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const STAGING_OPERATION: &str = "backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Path of the finished archive
    Completed(PathBuf),
    /// The operator declined to discard a leftover staging area
    Cancelled,
}

pub struct BackupOrchestrator<'a, R, S, V> {
    config: &'a Config,
    platform: &'a Platform<R, S, V>,
    operator: &'a dyn Operator,
}

impl<'a, R, S, V> BackupOrchestrator<'a, R, S, V>
where
    R: CommandRunner,
    S: SearchApi,
    V: VersionSource,
{
    pub fn new(config: &'a Config, platform: &'a Platform<R, S, V>, operator: &'a dyn Operator) -> Self {
        Self { config, platform, operator }
    }

    fn begin(&self, phase: Phase) {
        info!(phase = %phase, "Starting phase");
        self.operator.phase(phase);
    }

    /// Back up the deployment whose configuration root is `config_dir`.
    ///
    /// On failure the staging area is left in place for inspection; the next
    /// run will ask before discarding it.
    pub async fn run(&self, config_dir: &Path) -> Result<BackupOutcome> {
        self.begin(Phase::Preflight);
        let deployment = Deployment::load(config_dir).during(Phase::Preflight)?;

        self.begin(Phase::Staging);
        let area = match self.acquire_staging(&deployment)? {
            Some(area) => area,
            None => {
                info!("Backup cancelled by operator");
                return Ok(BackupOutcome::Cancelled);
            }
        };
        let db_transfer = DatabaseTransfer::new(
            &self.platform.docker,
            &self.config.docker.database_container,
            &self.config.database,
        );
        staging::initialize_for_backup(&area)
            .and_then(|_| db_transfer.clear_stale_dumps(&deployment.database_backup_dir()))
            .during(Phase::Staging)?;

        self.begin(Phase::Configuration);
        self.backup_configuration(config_dir, &area).await.during(Phase::Configuration)?;

        self.begin(Phase::Volumes);
        let volumes = VolumeTransfer::new(&self.platform.docker);
        let owner = Ownership::new(deployment.uid, deployment.gid);
        for role in &VOLUME_ROLES {
            volumes
                .backup_volume(role, &area.volumes_dir(), owner)
                .await
                .during(Phase::Volumes)?;
        }

        self.begin(Phase::Database);
        let credentials = DatabaseCredentials {
            user: deployment.postgres_user.clone(),
            password: deployment.postgres_password.clone(),
        };
        for database in &self.config.database.names {
            db_transfer
                .dump_database(&credentials, database, &deployment.database_backup_dir(), &area.db_dir())
                .await
                .during(Phase::Database)?;
        }

        self.begin(Phase::Search);
        let search = SearchIndexTransfer::new(&self.platform.search, &self.config.search);
        async {
            search.ensure_snapshot_repository().await?;
            search
                .create_snapshot(
                    &snapshot_name(Utc::now()),
                    &deployment.snapshot_dir(),
                    &area.search_dir(),
                    self.config.polling.snapshot,
                )
                .await
        }
        .await
        .during(Phase::Search)?;

        self.begin(Phase::Package);
        let archive = archive::package(area.path(), &deployment.archives_dir(), Utc::now())
            .await
            .during(Phase::Package)?;

        self.begin(Phase::Cleanup);
        staging::release(area).during(Phase::Cleanup)?;

        info!(archive = %archive.display(), "Backup complete");
        Ok(BackupOutcome::Completed(archive))
    }

    /// Acquire the staging area, asking the operator before discarding a
    /// leftover one. `None` means the operator said no.
    fn acquire_staging(&self, deployment: &Deployment) -> Result<Option<StagingArea>> {
        let path = deployment.staging_dir();
        match staging::acquire(&path, STAGING_OPERATION) {
            Ok(area) => Ok(Some(area)),
            Err(conflict @ BackupError::Conflict { .. }) => {
                warn!(error = %conflict, "Existing backup in progress detected");
                self.operator.notice(&format!("WARNING: {}", conflict));
                if !self.operator.confirm("Delete partial backup and create new?") {
                    return Ok(None);
                }
                staging::discard(&path).during(Phase::Staging)?;
                staging::acquire(&path, STAGING_OPERATION).map(Some).during(Phase::Staging)
            }
            Err(e) => Err(e).during(Phase::Staging),
        }
    }

    async fn backup_configuration(&self, config_dir: &Path, area: &StagingArea) -> Result<()> {
        config_tree::backup(config_dir, &area.config_dir())?;
        let version = self.platform.versions.live_version().await?;
        version.write_to(area.path())?;
        info!(version = %version.version, build = %version.build, "Recorded platform version");
        Ok(())
    }
}
