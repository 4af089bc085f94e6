//! Pathname to inode resolution, supplied by the host.

use crate::path::{Ino, SusPathname};
use std::os::unix::fs::MetadataExt;

/// Resolves a pathname to the inode currently behind it.
pub trait InodeResolver: Send + Sync {
    /// `None` when the path does not exist right now.
    fn resolve(&self, path: &SusPathname) -> Option<Ino>;
}

/// Resolver backed by `lstat(2)` on the running system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsInodeResolver;

impl InodeResolver for FsInodeResolver {
    fn resolve(&self, path: &SusPathname) -> Option<Ino> {
        std::fs::symlink_metadata(path.as_str())
            .ok()
            .map(|m| Ino(m.ino()))
    }
}
