//! Mount namespace access and the mount sweep engine.
//!
//! The host supplies a [`MountHost`]: a point-in-time snapshot of the
//! namespace plus an unmount primitive. The sweep decides, per mount,
//! whether to hide it from enumeration and whether to unmount it.

mod proc;
mod sweep;

pub use proc::{parse_mountinfo, DryRunHost, ProcMountHost};
pub use sweep::{MountSweepEngine, SweepPhase, SweepReport, SweepScope, UmountAttempt};

use crate::path::{DevId, Ino};
use crate::registry::UmountMode;
use serde::{Deserialize, Serialize};

/// One mount as reported by the host, in namespace order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    pub mount_id: u64,
    pub pathname: String,
    pub dev: DevId,
    /// Inode of the mount root, when the host could stat it.
    #[serde(default)]
    pub root_ino: Option<Ino>,
}

impl MountRecord {
    pub fn new(mount_id: u64, pathname: impl Into<String>, dev: DevId) -> Self {
        Self {
            mount_id,
            pathname: pathname.into(),
            dev,
            root_ino: None,
        }
    }

    pub fn with_root_ino(mut self, ino: Ino) -> Self {
        self.root_ino = Some(ino);
        self
    }
}

/// Mount namespace access supplied by the host.
pub trait MountHost: Send + Sync {
    /// Enumerate the caller's mount namespace in kernel order.
    fn snapshot(&self) -> std::io::Result<Vec<MountRecord>>;

    /// Unmount one mount.
    fn umount(&self, mount: &MountRecord, mode: UmountMode) -> std::io::Result<()>;

    /// Name of this host (for logging).
    fn name(&self) -> &'static str;
}
