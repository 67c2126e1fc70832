//! Permission bit helpers for staged files.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

/// Read + execute for owner, group, and other.
pub const READ_EXECUTE_ALL: u32 = 0o555;

/// Full access for owner and group, nothing for other.
pub const OWNER_GROUP_RWX: u32 = 0o770;

/// Set the permission bits of `path` to exactly `mode`.
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// OR `bits` into the existing permission bits of `path`.
pub fn add_mode_bits(path: &Path, bits: u32) -> io::Result<()> {
    let current = fs::metadata(path)?.permissions().mode();
    set_mode(path, current | bits)
}

/// Permission bits of `path`, without the file type.
pub fn mode_of(path: &Path) -> io::Result<u32> {
    Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
}

/// Group owner of `path`.
pub fn group_of(path: &Path) -> io::Result<u32> {
    Ok(fs::metadata(path)?.gid())
}
