//! File system helpers shared by the staging area and the transfers.

pub mod permissions;
pub mod walker;

pub use walker::{copy_tree, move_file, recreate_dir, remove_path, replace_tree, CopyOptions, CopyStats};
