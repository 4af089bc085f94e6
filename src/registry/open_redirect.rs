//! Open redirect table: opens of one inode are serviced from another path.

use super::Upsert;
use crate::config::shard_amount;
use crate::path::{Ino, SusPathname};
use crate::tags::{InodeTagStore, Tag};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRedirectEntry {
    pub target_ino: Ino,
    pub target_pathname: SusPathname,
    pub redirected_pathname: SusPathname,
}

#[derive(Debug)]
pub struct OpenRedirectTable {
    entries: DashMap<Ino, OpenRedirectEntry>,
}

impl Default for OpenRedirectTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenRedirectTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_shard_amount(shard_amount()),
        }
    }

    /// Insert or update the redirect for `entry.target_ino`, tagging the
    /// inode on first insert.
    pub fn upsert(&self, entry: OpenRedirectEntry, tags: &InodeTagStore) -> Upsert {
        let ino = entry.target_ino;
        match self.entries.entry(ino) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                existing.target_pathname = entry.target_pathname;
                existing.redirected_pathname = entry.redirected_pathname;
                Upsert::Updated
            }
            Entry::Vacant(vacant) => {
                let _entry = vacant.insert(entry);
                tags.set_tag(ino, Tag::OpenRedirect);
                Upsert::Inserted
            }
        }
    }

    /// Remove the redirect for `ino` and clear its tag.
    pub fn remove(&self, ino: Ino, tags: &InodeTagStore) -> Option<OpenRedirectEntry> {
        match self.entries.entry(ino) {
            Entry::Occupied(occupied) => {
                tags.clear_tag(ino, Tag::OpenRedirect);
                Some(occupied.remove())
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Pathname opens of `ino` are sent to.
    pub fn redirect_for(&self, ino: Ino) -> Option<SusPathname> {
        self.entries
            .get(&ino)
            .map(|e| e.redirected_pathname.clone())
    }

    /// Entries sorted by target inode.
    pub fn entries(&self) -> Vec<OpenRedirectEntry> {
        let mut entries: Vec<OpenRedirectEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.target_ino);
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
