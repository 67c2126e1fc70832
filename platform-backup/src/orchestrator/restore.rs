//! Restore sequence.
//!
//! A restore prepares everything on disk, then hands control back to the
//! operator to start the platform: the database applies its dumps and the
//! search engine mounts its snapshot repository only when their containers
//! boot. Once the search service is healthy and the live version is known to
//! be compatible, the snapshot is restored over the fresh indices.

use super::{Operator, Phase, Platform};
use crate::archive::{self, layout};
use crate::config::{Config, Deployment, ENV_FILE};
use crate::fs::{copy_tree, remove_path, CopyOptions};
use crate::poll::{wait_for_container, wait_for_group};
use crate::runtime::CommandRunner;
use crate::staging::{self, RestoreStaging};
use crate::transfer::{config_tree, DatabaseTransfer, SearchApi, SearchIndexTransfer, VolumeTransfer, VOLUME_ROLES};
use crate::utils::errors::{BackupError, PhaseContext, Remediation, Result};
use crate::version::{check_compatibility, VersionManifest, VersionSource};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// What a finished restore brought back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub snapshot: String,
    pub version: VersionManifest,
}

pub struct RestoreOrchestrator<'a, R, S, V> {
    config: &'a Config,
    platform: &'a Platform<R, S, V>,
    operator: &'a dyn Operator,
    scratch_root: PathBuf,
}

impl<'a, R, S, V> RestoreOrchestrator<'a, R, S, V>
where
    R: CommandRunner,
    S: SearchApi,
    V: VersionSource,
{
    pub fn new(config: &'a Config, platform: &'a Platform<R, S, V>, operator: &'a dyn Operator) -> Self {
        Self { config, platform, operator, scratch_root: std::env::temp_dir() }
    }

    /// Directory under which the archive is unpacked. Defaults to the system temp dir.
    pub fn with_scratch_root(mut self, scratch_root: impl Into<PathBuf>) -> Self {
        self.scratch_root = scratch_root.into();
        self
    }

    fn begin(&self, phase: Phase) {
        info!(phase = %phase, "Starting phase");
        self.operator.phase(phase);
    }

    /// Restore `archive` into the reset configuration root `config_dir`.
    ///
    /// The unpack directory is removed only when the restore succeeds.
    pub async fn run(&self, config_dir: &Path, archive_path: &Path) -> Result<RestoreSummary> {
        self.begin(Phase::Preflight);
        if config_dir.join(ENV_FILE).exists() {
            let refused: Result<RestoreSummary> = Err(BackupError::TargetNotReset(config_dir.to_path_buf()));
            return refused.during(Phase::Preflight);
        }

        self.begin(Phase::Unpack);
        let unpacked = self.scratch_root.join(format!("platform-restore-{}", Uuid::new_v4()));
        archive::unpack(archive_path, &unpacked).await.during(Phase::Unpack)?;
        let deployment = Deployment::load(&unpacked.join(layout::CONFIG_DIR)).during(Phase::Unpack)?;
        info!(dir = %unpacked.display(), backup_root = %deployment.backup_root.display(), "Archive unpacked");

        self.begin(Phase::PrepareFilesystem);
        let restore_staging = self.prepare_filesystem(config_dir, &deployment).await.during(Phase::PrepareFilesystem)?;

        self.begin(Phase::ConfigurationRestore);
        config_tree::restore(config_dir, &unpacked.join(layout::CONFIG_DIR)).during(Phase::ConfigurationRestore)?;

        self.begin(Phase::VolumesRestore);
        let volumes = VolumeTransfer::new(&self.platform.docker);
        for role in &VOLUME_ROLES {
            let src = unpacked.join(layout::VOLUMES_DIR).join(role.staging_name);
            volumes.restore_volume(role, &src).await.during(Phase::VolumesRestore)?;
        }

        self.begin(Phase::DatabaseRestore);
        let db_transfer = DatabaseTransfer::new(
            &self.platform.docker,
            &self.config.docker.database_container,
            &self.config.database,
        );
        db_transfer
            .stage_restore(&unpacked.join(layout::DB_DIR), &restore_staging.db_dir)
            .and_then(|_| {
                db_transfer
                    .restoration_script()
                    .write(&config_dir.join(&self.config.database.init_scripts_dir))
            })
            .during(Phase::DatabaseRestore)?;

        self.begin(Phase::SearchStaging);
        copy_tree(&unpacked.join(layout::SEARCH_DIR), &restore_staging.search_dir, CopyOptions { merge: true })
            .map_err(BackupError::from)
            .during(Phase::SearchStaging)?;

        self.begin(Phase::AwaitPlatform);
        self.operator.notice("*** Ready for restore. Please start the platform! ***");
        let search = SearchIndexTransfer::new(&self.platform.search, &self.config.search);
        async {
            wait_for_container(
                &self.platform.docker,
                &self.config.docker.search_container,
                self.config.polling.container,
            )
            .await?;
            self.operator.notice("Platform detected, waiting for services to be ready...");
            search.wait_for_health(self.config.polling.health).await
        }
        .await
        .during(Phase::AwaitPlatform)?;

        // Nothing destructive happens on the search engine before this check.
        self.begin(Phase::VersionCheck);
        let version = self.check_version(&unpacked).await.during(Phase::VersionCheck)?;

        self.begin(Phase::SearchRestore);
        let snapshot = async {
            search.ensure_snapshot_repository().await?;
            let snapshot = search.latest_snapshot().await?;
            search.delete_conflicting_indices(&snapshot).await?;
            search.restore_snapshot(&snapshot).await?;
            Ok::<_, BackupError>(snapshot)
        }
        .await
        .during(Phase::SearchRestore)?;

        self.begin(Phase::Cleanup);
        remove_path(&unpacked).map_err(BackupError::from).during(Phase::Cleanup)?;
        self.platform
            .docker
            .clear_directory(&self.config.docker.search_container, &self.config.search.mount_path)
            .await
            .during(Phase::Cleanup)?;

        info!(snapshot = %snapshot.name, version = %version.version, "Restore complete");
        Ok(RestoreSummary { snapshot: snapshot.name, version })
    }

    /// Reinitialize the configuration root and the backup mounts. When the
    /// deployment runs under a uid other than the search engine's, the
    /// operator has to hand the search bind mounts to the engine's group;
    /// this waits until they have.
    async fn prepare_filesystem(&self, config_dir: &Path, deployment: &Deployment) -> Result<RestoreStaging> {
        staging::initialize_config_root(config_dir)?;
        let restore_staging = staging::initialize_for_restore(&deployment.backup_root)?;

        let engine_gid = self.config.search.engine_uid;
        if deployment.uid == engine_gid {
            return Ok(restore_staging);
        }

        let bind_mounts = [staging::search_data_dir(config_dir), restore_staging.search_dir.clone()];
        let remediation = Remediation::new(bind_mounts.iter().flat_map(|dir| {
            [
                format!("sudo chmod g+rwx {}", dir.display()),
                format!("sudo chgrp {} {}", engine_gid, dir.display()),
            ]
        }));
        warn!(uid = deployment.uid, engine_uid = engine_gid, "Search bind mounts need group remediation");
        self.operator.notice(&format!(
            "Please run the following commands to prepare bind mount ownership:\n\n  {}\n",
            remediation.0.join("\n  ")
        ));

        for dir in &bind_mounts {
            wait_for_group(dir, engine_gid, self.config.polling.ownership)
                .await
                .map_err(|e| e.with_remediation(remediation.clone()))?;
        }
        Ok(restore_staging)
    }

    async fn check_version(&self, unpacked: &Path) -> Result<VersionManifest> {
        let backup = VersionManifest::read_from(unpacked)?;
        let live = self.platform.versions.live_version().await?;
        if !check_compatibility(&backup, &live) {
            return Err(BackupError::IncompatibleVersion { backup: backup.version, live: live.version });
        }
        info!(backup = %backup.version, live = %live.version, "Platform version is compatible");
        Ok(backup)
    }
}
