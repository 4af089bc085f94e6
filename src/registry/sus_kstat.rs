//! Spoofed kstat table.
//!
//! Bound entries are keyed by a live inode and tagged KSTAT. Static entries
//! are registered before the real inode is known; they wait in a pending
//! list, matched by pathname, until [`SusKstatTable::bind`] moves them into
//! the bound table.

use super::Upsert;
use crate::config::shard_amount;
use crate::error::{Error, Result};
use crate::path::{DevId, Ino, SusPathname};
use crate::tags::{InodeTagStore, Tag};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Seconds and nanoseconds of a timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

/// The stat fields a sus kstat entry replaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoofedStat {
    pub ino: Ino,
    pub dev: DevId,
    pub nlink: u32,
    pub size: i64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
    pub blksize: u64,
    pub blocks: u64,
}

/// A stat result as produced by the host, before spoofing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KStat {
    pub ino: Ino,
    pub dev: DevId,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
    pub blksize: u64,
    pub blocks: u64,
}

impl SpoofedStat {
    /// Overlay the spoofed fields; mode, owner and rdev stay untouched.
    pub fn apply(&self, stat: &mut KStat) {
        stat.ino = self.ino;
        stat.dev = self.dev;
        stat.nlink = self.nlink;
        stat.size = self.size;
        stat.atime = self.atime;
        stat.mtime = self.mtime;
        stat.ctime = self.ctime;
        stat.blksize = self.blksize;
        stat.blocks = self.blocks;
    }
}

/// A sus kstat record as registered over the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SusKstat {
    pub is_statically: bool,
    pub target_ino: Ino,
    pub target_pathname: SusPathname,
    pub spoofed: SpoofedStat,
}

impl SusKstat {
    pub fn new(target_ino: Ino, target_pathname: SusPathname, spoofed: SpoofedStat) -> Self {
        Self {
            is_statically: false,
            target_ino,
            target_pathname,
            spoofed,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    record: SusKstat,
    /// Registration sequence; larger is newer.
    seq: u64,
}

/// Bound and pending sus kstat entries.
#[derive(Debug)]
pub struct SusKstatTable {
    bound: DashMap<Ino, Slot>,
    pending: RwLock<Vec<Slot>>,
    seq: AtomicU64,
    write_lock: Mutex<()>,
}

impl Default for SusKstatTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SusKstatTable {
    pub fn new() -> Self {
        Self {
            bound: DashMap::with_shard_amount(shard_amount()),
            pending: RwLock::new(Vec::new()),
            seq: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a bound entry, replacing the fields of an existing one.
    pub fn add_bound(&self, mut record: SusKstat, tags: &InodeTagStore) -> Result<Upsert> {
        if record.target_ino.is_none() {
            return Err(Error::InvalidArgument(
                "bound sus kstat needs a target inode".to_string(),
            ));
        }
        record.is_statically = false;

        let _guard = self.write_lock.lock();
        let seq = self.next_seq();
        Ok(self.install(record, seq, tags))
    }

    /// Register a pending entry keyed by pathname.
    pub fn add_static(&self, mut record: SusKstat) -> Upsert {
        record.is_statically = true;

        let _guard = self.write_lock.lock();
        let seq = self.next_seq();
        let mut pending = self.pending.write();
        match pending
            .iter_mut()
            .find(|s| s.record.target_pathname == record.target_pathname)
        {
            Some(slot) => {
                slot.record = record;
                slot.seq = seq;
                Upsert::Updated
            }
            None => {
                pending.push(Slot { record, seq });
                Upsert::Inserted
            }
        }
    }

    /// Rebind the bound entry registered for `record.target_pathname` to
    /// `record.target_ino` and overwrite its spoofed fields.
    ///
    /// An inode already bound for a different pathname is left alone and
    /// the update fails with `AlreadyExists`.
    pub fn update(&self, record: SusKstat, tags: &InodeTagStore) -> Result<()> {
        if record.target_ino.is_none() {
            return Err(Error::InvalidArgument(
                "sus kstat update needs a target inode".to_string(),
            ));
        }

        let _guard = self.write_lock.lock();
        let current = self.bound_ino_for(&record.target_pathname).ok_or_else(|| {
            Error::NotFound(format!("no sus kstat for {}", record.target_pathname))
        })?;
        if let Some(owner) = self.foreign_owner(record.target_ino, &record.target_pathname) {
            return Err(Error::AlreadyExists(format!(
                "inode {} is bound for {}",
                record.target_ino, owner
            )));
        }

        let seq = self.next_seq();
        if current != record.target_ino {
            self.evict(current, tags);
        }
        self.install(
            SusKstat {
                is_statically: false,
                ..record
            },
            seq,
            tags,
        );
        Ok(())
    }

    /// Bind the newest pending entry for `path` to `real_ino`.
    ///
    /// Returns `false` without touching anything when no pending entry
    /// exists, when a bound entry for the same pathname was registered
    /// after it, or when `real_ino` is bound for another pathname.
    pub fn bind(&self, path: &SusPathname, real_ino: Ino, tags: &InodeTagStore) -> bool {
        if real_ino.is_none() {
            return false;
        }

        let _guard = self.write_lock.lock();
        let mut pending = self.pending.write();
        let Some(pos) = pending
            .iter()
            .enumerate()
            .filter(|(_, s)| &s.record.target_pathname == path)
            .max_by_key(|(_, s)| s.seq)
            .map(|(pos, _)| pos)
        else {
            return false;
        };

        let rival = self
            .bound
            .iter()
            .filter(|s| &s.record.target_pathname == path)
            .map(|s| (*s.key(), s.seq))
            .max_by_key(|(_, seq)| *seq);
        if let Some((_, rival_seq)) = rival {
            if rival_seq > pending[pos].seq {
                return false;
            }
        }

        if self.foreign_owner(real_ino, path).is_some() {
            return false;
        }

        let slot = pending.remove(pos);
        drop(pending);

        if let Some((rival_ino, _)) = rival {
            if rival_ino != real_ino {
                self.evict(rival_ino, tags);
            }
        }

        let mut record = slot.record;
        record.is_statically = false;
        record.target_ino = real_ino;
        self.install(record, slot.seq, tags);
        true
    }

    /// Remove the bound entry for `ino` and clear its tag.
    pub fn remove(&self, ino: Ino, tags: &InodeTagStore) -> Option<SusKstat> {
        let _guard = self.write_lock.lock();
        self.evict(ino, tags)
    }

    /// Spoofed fields for a bound inode.
    pub fn get(&self, ino: Ino) -> Option<SpoofedStat> {
        self.bound.get(&ino).map(|s| s.record.spoofed)
    }

    /// Full record bound at `ino`.
    pub fn get_record(&self, ino: Ino) -> Option<SusKstat> {
        self.bound.get(&ino).map(|s| s.record.clone())
    }

    /// Bound records sorted by inode.
    pub fn bound(&self) -> Vec<SusKstat> {
        let mut records: Vec<SusKstat> = self.bound.iter().map(|s| s.record.clone()).collect();
        records.sort_by_key(|r| r.target_ino);
        records
    }

    /// Pending records in registration order.
    pub fn pending(&self) -> Vec<SusKstat> {
        self.pending.read().iter().map(|s| s.record.clone()).collect()
    }

    /// No bound and no pending entries.
    pub fn is_empty(&self) -> bool {
        self.bound.is_empty() && self.pending.read().is_empty()
    }

    /// Pathname bound at `ino`, if it differs from `path`.
    fn foreign_owner(&self, ino: Ino, path: &SusPathname) -> Option<SusPathname> {
        self.bound
            .get(&ino)
            .map(|s| s.record.target_pathname.clone())
            .filter(|owner| owner != path)
    }

    fn bound_ino_for(&self, path: &SusPathname) -> Option<Ino> {
        self.bound
            .iter()
            .filter(|s| &s.record.target_pathname == path)
            .max_by_key(|s| s.seq)
            .map(|s| *s.key())
    }

    /// Insert or overwrite a bound slot. Caller holds `write_lock`.
    fn install(&self, record: SusKstat, seq: u64, tags: &InodeTagStore) -> Upsert {
        let ino = record.target_ino;
        match self.bound.entry(ino) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.record = record;
                slot.seq = seq;
                Upsert::Updated
            }
            Entry::Vacant(vacant) => {
                let _entry = vacant.insert(Slot { record, seq });
                tags.set_tag(ino, Tag::Kstat);
                Upsert::Inserted
            }
        }
    }

    /// Remove a bound slot. Caller holds `write_lock`.
    fn evict(&self, ino: Ino, tags: &InodeTagStore) -> Option<SusKstat> {
        match self.bound.entry(ino) {
            Entry::Occupied(occupied) => {
                tags.clear_tag(ino, Tag::Kstat);
                Some(occupied.remove().record)
            }
            Entry::Vacant(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> SusPathname {
        SusPathname::new(s).unwrap()
    }

    fn spoof(size: i64) -> SpoofedStat {
        SpoofedStat {
            ino: Ino(1000),
            dev: DevId(64),
            nlink: 2,
            size,
            blksize: 4096,
            blocks: 8,
            ..Default::default()
        }
    }

    #[test]
    fn test_add_bound_tags_inode() {
        let tags = InodeTagStore::new();
        let table = SusKstatTable::new();
        table
            .add_bound(SusKstat::new(Ino(12), path("/system/lib/libc.so"), spoof(10)), &tags)
            .unwrap();

        assert_eq!(table.get(Ino(12)).unwrap().size, 10);
        assert!(tags.has_tag(Ino(12), Tag::Kstat));
    }

    #[test]
    fn test_add_bound_requires_ino() {
        let tags = InodeTagStore::new();
        let table = SusKstatTable::new();
        let result = table.add_bound(SusKstat::new(Ino::NONE, path("/x"), spoof(0)), &tags);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_static_not_tagged_until_bound() {
        let tags = InodeTagStore::new();
        let table = SusKstatTable::new();
        table.add_static(SusKstat::new(Ino::NONE, path("/data/adb/modules"), spoof(0)));

        assert!(tags.is_empty());
        assert_eq!(table.pending().len(), 1);
        assert!(table.pending()[0].is_statically);

        assert!(table.bind(&path("/data/adb/modules"), Ino(12345), &tags));
        assert!(tags.has_tag(Ino(12345), Tag::Kstat));
        assert!(table.pending().is_empty());

        let record = table.get_record(Ino(12345)).unwrap();
        assert!(!record.is_statically);
        assert_eq!(record.target_ino, Ino(12345));
    }

    #[test]
    fn test_bind_is_idempotent() {
        let tags = InodeTagStore::new();
        let table = SusKstatTable::new();
        table.add_static(SusKstat::new(Ino::NONE, path("/data/adb/modules"), spoof(0)));

        assert!(table.bind(&path("/data/adb/modules"), Ino(7), &tags));
        let before = table.bound();
        assert!(!table.bind(&path("/data/adb/modules"), Ino(7), &tags));
        assert_eq!(table.bound(), before);
    }

    #[test]
    fn test_bind_without_pending() {
        let tags = InodeTagStore::new();
        let table = SusKstatTable::new();
        assert!(!table.bind(&path("/nothing"), Ino(1), &tags));
        assert!(table.is_empty());
        assert!(tags.is_empty());
    }

    #[test]
    fn test_newer_bound_entry_wins_over_stale_pending() {
        let tags = InodeTagStore::new();
        let table = SusKstatTable::new();
        table.add_static(SusKstat::new(Ino::NONE, path("/vendor/bin/x"), spoof(1)));
        table
            .add_bound(SusKstat::new(Ino(50), path("/vendor/bin/x"), spoof(2)), &tags)
            .unwrap();

        assert!(!table.bind(&path("/vendor/bin/x"), Ino(51), &tags));
        assert_eq!(table.get(Ino(50)).unwrap().size, 2);
        assert!(table.get(Ino(51)).is_none());
        assert_eq!(table.pending().len(), 1);
    }

    #[test]
    fn test_newer_pending_replaces_older_bound() {
        let tags = InodeTagStore::new();
        let table = SusKstatTable::new();
        table
            .add_bound(SusKstat::new(Ino(50), path("/vendor/bin/x"), spoof(2)), &tags)
            .unwrap();
        table.add_static(SusKstat::new(Ino::NONE, path("/vendor/bin/x"), spoof(1)));

        assert!(table.bind(&path("/vendor/bin/x"), Ino(51), &tags));
        assert!(table.get(Ino(50)).is_none());
        assert!(!tags.has_tag(Ino(50), Tag::Kstat));
        assert_eq!(table.get(Ino(51)).unwrap().size, 1);
    }

    #[test]
    fn test_update_rekeys_entry() {
        let tags = InodeTagStore::new();
        let table = SusKstatTable::new();
        table
            .add_bound(SusKstat::new(Ino(20), path("/system/etc/hosts"), spoof(100)), &tags)
            .unwrap();

        table
            .update(SusKstat::new(Ino(21), path("/system/etc/hosts"), spoof(200)), &tags)
            .unwrap();

        assert!(table.get(Ino(20)).is_none());
        assert!(!tags.has_tag(Ino(20), Tag::Kstat));
        assert_eq!(table.get(Ino(21)).unwrap().size, 200);
        assert!(tags.has_tag(Ino(21), Tag::Kstat));
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let tags = InodeTagStore::new();
        let table = SusKstatTable::new();
        let result = table.update(SusKstat::new(Ino(21), path("/missing"), spoof(0)), &tags);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_apply_keeps_unspoofed_fields() {
        let mut stat = KStat {
            ino: Ino(5),
            mode: 0o100644,
            uid: 1000,
            size: 99,
            ..Default::default()
        };
        spoof(0).apply(&mut stat);

        assert_eq!(stat.ino, Ino(1000));
        assert_eq!(stat.size, 0);
        assert_eq!(stat.mode, 0o100644);
        assert_eq!(stat.uid, 1000);
    }

    #[test]
    fn test_update_onto_foreign_inode_is_rejected() {
        let tags = InodeTagStore::new();
        let table = SusKstatTable::new();
        table
            .add_bound(SusKstat::new(Ino(10), path("/system/a"), spoof(1)), &tags)
            .unwrap();
        table
            .add_bound(SusKstat::new(Ino(20), path("/system/b"), spoof(2)), &tags)
            .unwrap();
        let before = table.bound();

        let result = table.update(SusKstat::new(Ino(20), path("/system/a"), spoof(3)), &tags);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
        assert_eq!(table.bound(), before);
        assert!(tags.has_tag(Ino(10), Tag::Kstat));
        assert_eq!(table.get_record(Ino(20)).unwrap().target_pathname, path("/system/b"));
    }

    #[test]
    fn test_bind_onto_foreign_inode_declines() {
        let tags = InodeTagStore::new();
        let table = SusKstatTable::new();
        table
            .add_bound(SusKstat::new(Ino(20), path("/system/b"), spoof(2)), &tags)
            .unwrap();
        table.add_static(SusKstat::new(Ino::NONE, path("/system/a"), spoof(1)));
        let bound = table.bound();
        let pending = table.pending();

        assert!(!table.bind(&path("/system/a"), Ino(20), &tags));
        assert_eq!(table.bound(), bound);
        assert_eq!(table.pending(), pending);

        assert!(table.bind(&path("/system/a"), Ino(21), &tags));
        assert_eq!(table.get_record(Ino(20)).unwrap().target_pathname, path("/system/b"));
    }
}
