//! Recursive directory copies with metadata preservation.
//!
//! Copies keep permission bits and recreate symlinks instead of following them,
//! so a staged tree matches the live one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Summary of a finished copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub bytes: u64,
}

/// Options for tree copies
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    /// Allow `dst` to exist already; files in it are overwritten, others kept.
    /// An existing `dst` keeps its own mode.
    pub merge: bool,
}

/// Copy the tree rooted at `src` to `dst`.
///
/// Fails with `AlreadyExists` when `dst` exists and `options.merge` is unset.
pub fn copy_tree(src: &Path, dst: &Path, options: CopyOptions) -> io::Result<CopyStats> {
    if !src.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", src.display()),
        ));
    }
    if dst.exists() && !options.merge {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", dst.display()),
        ));
    }

    let keep_root_mode = dst.exists();
    let mut stats = CopyStats::default();
    let mut dir_modes = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            if entry.depth() == 0 && keep_root_mode {
                continue;
            }
            dir_modes.push((target, entry.metadata().map_err(io::Error::from)?.permissions()));
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            // fs::copy carries the permission bits over
            stats.bytes += fs::copy(entry.path(), &target)?;
            stats.files += 1;
        }
    }

    // Directory modes last, deepest first, so read-only dirs can still be filled
    for (dir, permissions) in dir_modes.into_iter().rev() {
        fs::set_permissions(&dir, permissions)?;
    }

    Ok(stats)
}

/// Replace `dst` with a copy of `src`, removing whatever was at `dst`.
pub fn replace_tree(src: &Path, dst: &Path) -> io::Result<CopyStats> {
    if dst.symlink_metadata().is_ok() {
        remove_path(dst)?;
    }
    copy_tree(src, dst, CopyOptions::default())
}

/// Move a file, falling back to copy + remove across filesystems.
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Err(rename_err) = fs::rename(src, dst) {
        if !src.exists() {
            return Err(rename_err);
        }
        fs::copy(src, dst)?;
        fs::remove_file(src)?;
    }
    Ok(())
}

/// Remove a file, symlink, or directory tree.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = path.symlink_metadata()?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Delete `dir` if present and create it again, empty.
pub fn recreate_dir(dir: &Path) -> io::Result<()> {
    if dir.symlink_metadata().is_ok() {
        remove_path(dir)?;
    }
    fs::create_dir_all(dir)
}

/// Top-level entries of `root` that are missing, in the order given.
pub fn missing_entries(root: &Path, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter(|name| !root.join(name).exists())
        .map(|name| name.to_string())
        .collect()
}

/// Every regular file below `root`, relative to it, sorted.
pub fn list_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.path().strip_prefix(root).unwrap_or(entry.path()).to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}
