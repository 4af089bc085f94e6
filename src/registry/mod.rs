//! Registry tables.
//!
//! Five keyed collections decide what gets concealed:
//! - sus paths and open redirects, keyed by inode
//! - spoofed kstat, keyed by inode, plus pending entries keyed by pathname
//! - sus mounts and try-umount targets, kept in registration order
//!
//! Inode-keyed tables pair every entry with a tag in the
//! [`InodeTagStore`](crate::tags::InodeTagStore).

mod open_redirect;
mod singletons;
mod sus_kstat;
mod sus_mount;
mod sus_path;
mod try_umount;

pub use open_redirect::{OpenRedirectEntry, OpenRedirectTable};
pub use singletons::{Settings, SusSuMode, UnameSpoof, Utsname};
pub use sus_kstat::{KStat, SpoofedStat, SusKstat, SusKstatTable, Timespec};
pub use sus_mount::{SusMountEntry, SusMountList};
pub use sus_path::{SusPathEntry, SusPathTable};
pub use try_umount::{TryUmountEntry, TryUmountList, UmountMode};

/// Result of an insert-or-update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}
