//! Subsystem transfers: each moves one kind of platform state between the
//! live deployment and a staging tree.

pub mod config_tree;
pub mod database;
pub mod search;
pub mod volume;

pub use database::{DatabaseCredentials, DatabaseTransfer, RestorationScript};
pub use search::{DockerSearchApi, SearchApi, SearchIndexTransfer, SnapshotRecord, SnapshotState};
pub use volume::{Ownership, VolumeRole, VolumeTransfer, VOLUME_ROLES};
