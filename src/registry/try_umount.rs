//! Try-umount list: mounts actively detached during a sweep.

use super::Upsert;
use crate::error::Error;
use crate::path::SusPathname;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// How a try-umount target is unmounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum UmountMode {
    Default,
    Detach,
}

impl UmountMode {
    /// Flags for `umount2(2)`.
    pub fn flags(self) -> libc::c_int {
        match self {
            UmountMode::Default => 0,
            UmountMode::Detach => libc::MNT_DETACH,
        }
    }
}

impl TryFrom<i32> for UmountMode {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Error> {
        match value {
            0 => Ok(UmountMode::Default),
            1 => Ok(UmountMode::Detach),
            other => Err(Error::InvalidArgument(format!(
                "mnt_mode {} is out of range",
                other
            ))),
        }
    }
}

impl From<UmountMode> for i32 {
    fn from(mode: UmountMode) -> Self {
        match mode {
            UmountMode::Default => 0,
            UmountMode::Detach => 1,
        }
    }
}

/// One mount to unmount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryUmountEntry {
    pub target_pathname: SusPathname,
    pub mnt_mode: UmountMode,
}

impl TryUmountEntry {
    pub fn new(target_pathname: SusPathname, mnt_mode: UmountMode) -> Self {
        Self {
            target_pathname,
            mnt_mode,
        }
    }
}

/// Try-umount targets in registration order.
///
/// Nested mounts must be registered before their parents; the list does
/// not reorder anything.
#[derive(Debug, Default)]
pub struct TryUmountList {
    entries: RwLock<Vec<TryUmountEntry>>,
}

impl TryUmountList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, or change the mode of an already registered pathname
    /// without moving it.
    pub fn upsert(&self, entry: TryUmountEntry) -> Upsert {
        let mut entries = self.entries.write();
        match entries
            .iter_mut()
            .find(|e| e.target_pathname == entry.target_pathname)
        {
            Some(existing) => {
                existing.mnt_mode = entry.mnt_mode;
                Upsert::Updated
            }
            None => {
                entries.push(entry);
                Upsert::Inserted
            }
        }
    }

    /// Entries in registration order.
    pub fn entries(&self) -> Vec<TryUmountEntry> {
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
    fn test_mode_range() {
        assert_eq!(UmountMode::try_from(0).unwrap(), UmountMode::Default);
        assert_eq!(UmountMode::try_from(1).unwrap(), UmountMode::Detach);
        assert!(UmountMode::try_from(2).is_err());
        assert!(UmountMode::try_from(-1).is_err());
        assert_eq!(UmountMode::Detach.flags(), libc::MNT_DETACH);
    }

    #[test]
    fn test_order_and_update() {
        let list = TryUmountList::new();
        list.upsert(TryUmountEntry::new(path("/system/etc/hosts"), UmountMode::Default));
        list.upsert(TryUmountEntry::new(path("/system/bin"), UmountMode::Default));
        let outcome =
            list.upsert(TryUmountEntry::new(path("/system/etc/hosts"), UmountMode::Detach));

        assert_eq!(outcome, Upsert::Updated);
        let entries = list.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].target_pathname, path("/system/etc/hosts"));
        assert_eq!(entries[0].mnt_mode, UmountMode::Detach);
        assert_eq!(entries[1].target_pathname, path("/system/bin"));
    }
}
