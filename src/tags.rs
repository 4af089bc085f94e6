//! Inode tag store.
//!
//! A side table of concealment markers keyed by inode number. It never holds
//! a reference to a host inode; the host reports destruction through
//! [`crate::SusfsContext::on_inode_evicted`] and the markers are dropped then.
//!
//! Tags are a pre-filter only. A tag is set if and only if the matching
//! registry entry exists, and registries set or clear tags while holding the
//! entry guard for the same inode.

use crate::config::shard_amount;
use crate::path::Ino;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

/// One concealment marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Tag {
    Path,
    Mount,
    Kstat,
    OpenRedirect,
}

/// The markers carried by one inode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    pub path: bool,
    pub mount: bool,
    pub kstat: bool,
    pub open_redirect: bool,
}

impl TagSet {
    pub fn contains(&self, tag: Tag) -> bool {
        match tag {
            Tag::Path => self.path,
            Tag::Mount => self.mount,
            Tag::Kstat => self.kstat,
            Tag::OpenRedirect => self.open_redirect,
        }
    }

    fn slot(&mut self, tag: Tag) -> &mut bool {
        match tag {
            Tag::Path => &mut self.path,
            Tag::Mount => &mut self.mount,
            Tag::Kstat => &mut self.kstat,
            Tag::OpenRedirect => &mut self.open_redirect,
        }
    }

    pub fn is_empty(&self) -> bool {
        Tag::iter().all(|tag| !self.contains(tag))
    }

    /// The tags present, in declaration order.
    pub fn tags(&self) -> Vec<Tag> {
        Tag::iter().filter(|&tag| self.contains(tag)).collect()
    }
}

/// Concurrent side table of inode tags.
#[derive(Debug)]
pub struct InodeTagStore {
    tags: DashMap<Ino, TagSet>,
}

impl Default for InodeTagStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTagStore {
    pub fn new() -> Self {
        Self {
            tags: DashMap::with_shard_amount(shard_amount()),
        }
    }

    /// Mark `ino` with `tag`. Setting a tag twice is a no-op.
    pub fn set_tag(&self, ino: Ino, tag: Tag) {
        *self.tags.entry(ino).or_default().slot(tag) = true;
    }

    /// Clear one tag. The inode's row is dropped once no tag remains.
    pub fn clear_tag(&self, ino: Ino, tag: Tag) {
        self.tags.remove_if_mut(&ino, |_, set| {
            *set.slot(tag) = false;
            set.is_empty()
        });
    }

    /// Hot-path check. Untagged inodes never reach a registry lookup.
    pub fn has_tag(&self, ino: Ino, tag: Tag) -> bool {
        self.tags
            .get(&ino)
            .map(|set| set.contains(tag))
            .unwrap_or(false)
    }

    /// All tags of `ino`; empty when it has none.
    pub fn tags_of(&self, ino: Ino) -> TagSet {
        self.tags.get(&ino).map(|set| *set).unwrap_or_default()
    }

    /// Drop every tag of an inode.
    pub fn forget(&self, ino: Ino) -> TagSet {
        self.tags.remove(&ino).map(|(_, set)| set).unwrap_or_default()
    }

    /// Number of inodes carrying at least one tag.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Sorted copy of every tagged inode.
    pub fn snapshot(&self) -> Vec<(Ino, TagSet)> {
        let mut rows: Vec<(Ino, TagSet)> =
            self.tags.iter().map(|r| (*r.key(), *r.value())).collect();
        rows.sort_by_key(|(ino, _)| *ino);
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_has() {
        let store = InodeTagStore::new();
        store.set_tag(Ino(10), Tag::Path);

        assert!(store.has_tag(Ino(10), Tag::Path));
        assert!(!store.has_tag(Ino(10), Tag::Kstat));
        assert!(!store.has_tag(Ino(11), Tag::Path));
    }

    #[test]
    fn test_independent_bits() {
        let store = InodeTagStore::new();
        store.set_tag(Ino(7), Tag::Path);
        store.set_tag(Ino(7), Tag::OpenRedirect);

        store.clear_tag(Ino(7), Tag::Path);
        assert!(!store.has_tag(Ino(7), Tag::Path));
        assert!(store.has_tag(Ino(7), Tag::OpenRedirect));
        assert_eq!(store.tags_of(Ino(7)).tags(), vec![Tag::OpenRedirect]);
    }

    #[test]
    fn test_row_dropped_when_empty() {
        let store = InodeTagStore::new();
        store.set_tag(Ino(3), Tag::Mount);
        store.clear_tag(Ino(3), Tag::Mount);
        assert!(store.is_empty());

        // Clearing an absent row is a no-op.
        store.clear_tag(Ino(4), Tag::Kstat);
        assert!(store.is_empty());
    }

    #[test]
    fn test_forget() {
        let store = InodeTagStore::new();
        store.set_tag(Ino(1), Tag::Path);
        store.set_tag(Ino(1), Tag::Kstat);

        let dropped = store.forget(Ino(1));
        assert!(dropped.path && dropped.kstat);
        assert_eq!(store.tags_of(Ino(1)), TagSet::default());
    }
}
