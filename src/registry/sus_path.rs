//! Sus path table: objects hidden from lookups and directory listings.

use super::Upsert;
use crate::config::shard_amount;
use crate::path::{Ino, SusPathname};
use crate::tags::{InodeTagStore, Tag};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One hidden object.
///
/// `target_ino` is [`Ino::NONE`] for path-only entries on emulated storage,
/// which are matched by pathname and never tagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SusPathEntry {
    pub target_ino: Ino,
    pub target_pathname: SusPathname,
}

impl SusPathEntry {
    /// Entry for `target_pathname`; pass [`Ino::NONE`] for a path-only entry.
    pub fn new(target_ino: Ino, target_pathname: SusPathname) -> Self {
        Self {
            target_ino,
            target_pathname,
        }
    }

    /// Whether the entry is matched by pathname only.
    pub fn is_path_only(&self) -> bool {
        self.target_ino.is_none()
    }
}

/// Who registered a pathname: any number of inodes, plus an optional
/// path-only registration.
#[derive(Debug, Clone, Default)]
struct PathOwners {
    path_only: bool,
    inodes: BTreeSet<Ino>,
}

impl PathOwners {
    fn is_empty(&self) -> bool {
        !self.path_only && self.inodes.is_empty()
    }
}

/// Hidden objects indexed by inode, with a pathname index on the side.
///
/// The pathname index counts every registration of a path separately, so
/// dropping one owner never unhides a path another owner still holds.
#[derive(Debug)]
pub struct SusPathTable {
    by_ino: DashMap<Ino, SusPathEntry>,
    by_path: DashMap<SusPathname, PathOwners>,
    /// Pathnames re-registered on every app spawn.
    loop_paths: RwLock<Vec<SusPathname>>,
    write_lock: Mutex<()>,
}

impl Default for SusPathTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SusPathTable {
    pub fn new() -> Self {
        Self {
            by_ino: DashMap::with_shard_amount(shard_amount()),
            by_path: DashMap::new(),
            loop_paths: RwLock::new(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Insert or update an entry.
    ///
    /// A second registration for the same inode replaces the pathname in
    /// place. The PATH tag is set while the inode's entry guard is held.
    pub fn upsert(&self, entry: SusPathEntry, tags: &InodeTagStore) -> Upsert {
        let _guard = self.write_lock.lock();

        if entry.is_path_only() {
            let mut owners = self.by_path.entry(entry.target_pathname).or_default();
            let was_set = std::mem::replace(&mut owners.path_only, true);
            return if was_set {
                Upsert::Updated
            } else {
                Upsert::Inserted
            };
        }

        let ino = entry.target_ino;
        match self.by_ino.entry(ino) {
            Entry::Occupied(mut occupied) => {
                let old_path = occupied.get().target_pathname.clone();
                if old_path != entry.target_pathname {
                    self.release_path(&old_path, ino);
                    self.claim_path(entry.target_pathname.clone(), ino);
                }
                occupied.get_mut().target_pathname = entry.target_pathname;
                Upsert::Updated
            }
            Entry::Vacant(vacant) => {
                self.claim_path(entry.target_pathname.clone(), ino);
                let _entry = vacant.insert(entry);
                tags.set_tag(ino, Tag::Path);
                Upsert::Inserted
            }
        }
    }

    /// Remove the entry for an inode and clear its tag.
    ///
    /// The pathname stays hidden while any other registration holds it.
    pub fn remove(&self, ino: Ino, tags: &InodeTagStore) -> Option<SusPathEntry> {
        let _guard = self.write_lock.lock();

        match self.by_ino.entry(ino) {
            Entry::Occupied(occupied) => {
                tags.clear_tag(ino, Tag::Path);
                let entry = occupied.remove();
                self.release_path(&entry.target_pathname, ino);
                Some(entry)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Remove a path-only entry. Inode entries on the same path are kept.
    pub fn remove_path_only(&self, path: &SusPathname) -> bool {
        let _guard = self.write_lock.lock();
        let mut removed = false;
        self.by_path.remove_if_mut(path, |_, owners| {
            removed = std::mem::take(&mut owners.path_only);
            owners.is_empty()
        });
        removed
    }

    fn claim_path(&self, path: SusPathname, ino: Ino) {
        self.by_path.entry(path).or_default().inodes.insert(ino);
    }

    fn release_path(&self, path: &SusPathname, ino: Ino) {
        self.by_path.remove_if_mut(path, |_, owners| {
            owners.inodes.remove(&ino);
            owners.is_empty()
        });
    }

    /// Entry registered for `ino`, if any.
    pub fn get(&self, ino: Ino) -> Option<SusPathEntry> {
        self.by_ino.get(&ino).map(|e| e.value().clone())
    }

    /// Whether `ino` is hidden.
    pub fn contains(&self, ino: Ino) -> bool {
        self.by_ino.contains_key(&ino)
    }

    /// Whether `path` or one of its ancestors is registered.
    pub fn covers_path(&self, path: &SusPathname) -> bool {
        path.ancestors().any(|p| self.by_path.contains_key(p))
    }

    /// Record a pathname for re-registration on every app spawn.
    pub fn add_loop_path(&self, path: SusPathname) {
        let mut paths = self.loop_paths.write();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    /// Loop pathnames in registration order.
    pub fn loop_paths(&self) -> Vec<SusPathname> {
        self.loop_paths.read().clone()
    }

    /// Inode entries plus path-only entries.
    pub fn len(&self) -> usize {
        self.by_ino.len() + self.path_only().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty() && self.by_ino.is_empty()
    }

    /// Inode-keyed entries sorted by inode.
    pub fn entries(&self) -> Vec<SusPathEntry> {
        let mut entries: Vec<SusPathEntry> =
            self.by_ino.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.target_ino);
        entries
    }

    /// Path-only entries sorted by pathname.
    pub fn path_only(&self) -> Vec<SusPathname> {
        let mut paths: Vec<SusPathname> = self
            .by_path
            .iter()
            .filter(|e| e.value().path_only)
            .map(|e| e.key().clone())
            .collect();
        paths.sort();
        paths
    }
}
