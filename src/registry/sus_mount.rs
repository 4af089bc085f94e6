//! Sus mount list: mounts removed from mount enumeration.

use super::Upsert;
use crate::path::{DevId, Ino, SusPathname};
use crate::tags::{InodeTagStore, Tag};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One mount to hide, matched by pathname and device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SusMountEntry {
    pub target_pathname: SusPathname,
    pub target_dev: DevId,
    /// Inode of the mount root, when the registrant knows it.
    #[serde(default)]
    pub root_ino: Option<Ino>,
}

impl SusMountEntry {
    pub fn new(target_pathname: SusPathname, target_dev: DevId) -> Self {
        Self {
            target_pathname,
            target_dev,
            root_ino: None,
        }
    }

    /// Also match the mount by its root inode.
    pub fn with_root_ino(mut self, ino: Ino) -> Self {
        self.root_ino = Some(ino);
        self
    }

    /// Exact pathname and device match.
    pub fn matches(&self, pathname: &str, dev: DevId) -> bool {
        self.target_dev == dev && self.target_pathname.as_str() == pathname
    }
}

/// Sus mounts in registration order.
#[derive(Debug, Default)]
pub struct SusMountList {
    entries: RwLock<Vec<SusMountEntry>>,
}

impl SusMountList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, or update the root inode of an existing
    /// pathname+device pair without moving it.
    pub fn upsert(&self, entry: SusMountEntry, tags: &InodeTagStore) -> Upsert {
        let mut entries = self.entries.write();

        let existing = entries
            .iter()
            .position(|e| e.target_pathname == entry.target_pathname && e.target_dev == entry.target_dev);

        match existing {
            Some(pos) => {
                let old_root = entries[pos].root_ino;
                if entry.root_ino.is_some() && entry.root_ino != old_root {
                    entries[pos].root_ino = entry.root_ino;
                    if let Some(old) = old_root {
                        if !entries.iter().any(|e| e.root_ino == Some(old)) {
                            tags.clear_tag(old, Tag::Mount);
                        }
                    }
                    if let Some(new) = entry.root_ino {
                        tags.set_tag(new, Tag::Mount);
                    }
                }
                Upsert::Updated
            }
            None => {
                if let Some(root) = entry.root_ino {
                    tags.set_tag(root, Tag::Mount);
                }
                entries.push(entry);
                Upsert::Inserted
            }
        }
    }

    /// Forget `ino` as the root of every entry and clear its MOUNT tag.
    pub fn forget_root(&self, ino: Ino, tags: &InodeTagStore) -> usize {
        let mut entries = self.entries.write();
        let mut cleared = 0;
        for entry in entries.iter_mut().filter(|e| e.root_ino == Some(ino)) {
            entry.root_ino = None;
            cleared += 1;
        }
        if cleared > 0 {
            tags.clear_tag(ino, Tag::Mount);
        }
        cleared
    }

    /// Whether a mount at `pathname` on `dev` is registered.
    pub fn matches(&self, pathname: &str, dev: DevId) -> bool {
        self.entries.read().iter().any(|e| e.matches(pathname, dev))
    }

    /// Whether a registered mount is rooted at `ino`.
    pub fn has_root(&self, ino: Ino) -> bool {
        self.entries.read().iter().any(|e| e.root_ino == Some(ino))
    }

    /// Entries in registration order.
    pub fn entries(&self) -> Vec<SusMountEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> SusPathname {
        SusPathname::new(s).unwrap()
    }

    #[test]
    fn test_registration_order_kept() {
        let tags = InodeTagStore::new();
        let list = SusMountList::new();
        list.upsert(SusMountEntry::new(path("/system/bin"), DevId(3)), &tags);
        list.upsert(SusMountEntry::new(path("/debug_ramdisk"), DevId(7)), &tags);
        list.upsert(SusMountEntry::new(path("/system/bin"), DevId(9)), &tags);

        let names: Vec<(String, u64)> = list
            .entries()
            .iter()
            .map(|e| (e.target_pathname.to_string(), e.target_dev.0))
            .collect();
        assert_eq!(
            names,
            vec![
                ("/system/bin".to_string(), 3),
                ("/debug_ramdisk".to_string(), 7),
                ("/system/bin".to_string(), 9),
            ]
        );
    }

    #[test]
    fn test_duplicate_is_update() {
        let tags = InodeTagStore::new();
        let list = SusMountList::new();
        assert_eq!(
            list.upsert(SusMountEntry::new(path("/debug_ramdisk"), DevId(7)), &tags),
            Upsert::Inserted
        );
        assert_eq!(
            list.upsert(
                SusMountEntry::new(path("/debug_ramdisk"), DevId(7)).with_root_ino(Ino(2)),
                &tags
            ),
            Upsert::Updated
        );
        assert_eq!(list.len(), 1);
        assert!(list.has_root(Ino(2)));
        assert!(tags.has_tag(Ino(2), Tag::Mount));
    }

    #[test]
    fn test_match_requires_device() {
        let tags = InodeTagStore::new();
        let list = SusMountList::new();
        list.upsert(SusMountEntry::new(path("/debug_ramdisk"), DevId(7)), &tags);

        assert!(list.matches("/debug_ramdisk", DevId(7)));
        assert!(!list.matches("/debug_ramdisk", DevId(8)));
        assert!(!list.matches("/debug_ramdisk/x", DevId(7)));
    }

    #[test]
    fn test_forget_root() {
        let tags = InodeTagStore::new();
        let list = SusMountList::new();
        list.upsert(
            SusMountEntry::new(path("/debug_ramdisk"), DevId(7)).with_root_ino(Ino(11)),
            &tags,
        );

        assert_eq!(list.forget_root(Ino(11), &tags), 1);
        assert!(!tags.has_tag(Ino(11), Tag::Mount));
        assert!(list.matches("/debug_ramdisk", DevId(7)));
    }
}
