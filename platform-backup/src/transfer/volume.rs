//! Named volume transfer through throwaway helper containers.
//!
//! A helper mounts the volume next to a host directory, copies with `cp -a`
//! and fixes ownership afterwards. On backup the copy is handed to the
//! invoking user; on restore each volume gets the fixed identity its service
//! expects.

use crate::runtime::{CommandRunner, Docker, Mount};
use crate::utils::errors::Result;
use std::fmt;
use std::path::Path;
use tracing::info;

const HELPER_BACKUP_MOUNT: &str = "/mnt/backup";

/// Numeric owner applied with `chown -R`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl Ownership {
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// A volume the platform keeps state in, with the identity its consumer runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeRole {
    /// Docker volume name
    pub volume: &'static str,
    /// Directory name under `volumes/` in the archive
    pub staging_name: &'static str,
    /// Owner applied after a restore
    pub owner: Ownership,
    /// `(file, mode)` pairs applied inside the volume after a restore
    pub modes: &'static [(&'static str, &'static str)],
}

impl VolumeRole {
    fn mount_point(&self) -> String {
        format!("/mnt/{}", self.staging_name)
    }
}

pub const AUTH_SECRETS: VolumeRole = VolumeRole {
    volume: "server_auth-secrets",
    staging_name: "auth",
    owner: Ownership::new(1001, 1001),
    modes: &[("private.pem", "600")],
};

pub const LDAP_VOL0: VolumeRole = VolumeRole {
    volume: "server_ldap-vol0",
    staging_name: "ldap-vol0",
    owner: Ownership::new(911, 911),
    modes: &[],
};

pub const LDAP_VOL1: VolumeRole = VolumeRole {
    volume: "server_ldap-vol1",
    staging_name: "ldap-vol1",
    owner: Ownership::new(911, 911),
    modes: &[],
};

/// Auth secrets first, then both directory-service volumes.
pub const VOLUME_ROLES: [VolumeRole; 3] = [AUTH_SECRETS, LDAP_VOL0, LDAP_VOL1];

pub struct VolumeTransfer<'a, R> {
    docker: &'a Docker<R>,
}

impl<'a, R: CommandRunner> VolumeTransfer<'a, R> {
    pub fn new(docker: &'a Docker<R>) -> Self {
        Self { docker }
    }

    /// Copy `role`'s volume to `<dest_dir>/<staging_name>`, owned by `owner`.
    pub async fn backup_volume(&self, role: &VolumeRole, dest_dir: &Path, owner: Ownership) -> Result<()> {
        let source = role.mount_point();
        let copied = format!("{}/{}", HELPER_BACKUP_MOUNT, role.staging_name);
        let owner_spec = owner.to_string();
        let mounts = [Mount::volume(role.volume, &source), Mount::bind(dest_dir, HELPER_BACKUP_MOUNT)];
        let operation = format!("Backing up volume {}", role.volume);

        self.docker
            .run_helper(&mounts, &["cp", "-a", source.as_str(), HELPER_BACKUP_MOUNT], &operation)
            .await?;
        self.docker
            .run_helper(&mounts, &["chown", "-R", owner_spec.as_str(), copied.as_str()], &operation)
            .await?;

        info!(volume = role.volume, owner = %owner, "Volume backed up");
        Ok(())
    }

    /// Copy `src_dir` into `role`'s volume, creating the volume if needed, then
    /// apply the role's fixed owner and file modes.
    pub async fn restore_volume(&self, role: &VolumeRole, src_dir: &Path) -> Result<()> {
        self.docker.ensure_volume(role.volume).await?;

        let target = role.mount_point();
        let mounts = [Mount::volume(role.volume, &target), Mount::bind(src_dir, HELPER_BACKUP_MOUNT)];
        let operation = format!("Restoring volume {}", role.volume);
        let source_contents = format!("{}/.", HELPER_BACKUP_MOUNT);
        let target_dir = format!("{}/", target);
        let owner_spec = role.owner.to_string();

        self.docker
            .run_helper(&mounts, &["cp", "-a", source_contents.as_str(), target_dir.as_str()], &operation)
            .await?;
        self.docker
            .run_helper(&mounts, &["chown", "-R", owner_spec.as_str(), target_dir.as_str()], &operation)
            .await?;
        for &(file, mode) in role.modes {
            let path = format!("{}/{}", target, file);
            self.docker.run_helper(&mounts, &["chmod", mode, path.as_str()], &operation).await?;
        }

        info!(volume = role.volume, owner = %role.owner, "Volume restored");
        Ok(())
    }
}
