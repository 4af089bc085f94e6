//! Protocol constants and runtime configuration.

use crate::path::SusPathname;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Capacity of a pathname buffer, terminator included.
pub const MAX_LEN_PATHNAME: usize = 256;

/// Capacity of a uname field, terminator excluded.
pub const NEW_UTS_LEN: usize = 64;

/// Capacity of the fake cmdline/bootconfig buffer, terminator included.
pub const FAKE_CMDLINE_OR_BOOTCONFIG_SIZE: usize = 4096;

/// log2 of the bucket count used by the inode-keyed tables.
pub const HASH_BITS: u32 = 10;

/// Version reported by `SHOW_VERSION`.
pub const SUSFS_VERSION: &str = "v3.1.9-8e43b2d6@susfs-test";

/// Variant reported by `SHOW_VARIANT`.
pub const SUSFS_VARIANT: &str = "susfs";

/// Working directory used by magic mount.
pub const MAGIC_MOUNT_WORKDIR: &str = "/debug_ramdisk/mount/";

/// Uname field value meaning "keep the real value".
pub const UNAME_KEEP_REAL: &str = "default";

/// Default Android data root.
pub const DEFAULT_ANDROID_DATA_ROOT: &str = "/sdcard/Android/data";

/// Default sdcard root.
pub const DEFAULT_SDCARD_ROOT: &str = "/sdcard";

/// Number of shards for the inode-keyed maps.
pub fn shard_amount() -> usize {
    1 << HASH_BITS
}

/// Initial settings for a concealment context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SusfsConfig {
    /// Start with subsystem logging enabled.
    pub enable_log: bool,

    /// Kernel symbols of the framework are hidden (build-time capability).
    pub hide_symbols: bool,

    /// Magic mount support is compiled in (build-time capability).
    pub magic_mount: bool,

    /// Root of per-app data on emulated storage.
    pub android_data_root: String,

    /// Root of emulated storage.
    pub sdcard_root: String,

    /// Hide sus mounts from su processes as well.
    pub hide_sus_mounts_for_all_procs: bool,

    /// Run try-umount for isolated services spawned by zygote.
    pub umount_for_zygote_iso_service: bool,

    /// Spoof the AVC denial log.
    pub avc_log_spoofing: bool,
}

impl Default for SusfsConfig {
    fn default() -> Self {
        Self {
            enable_log: false,
            hide_symbols: false,
            magic_mount: false,
            android_data_root: DEFAULT_ANDROID_DATA_ROOT.to_string(),
            sdcard_root: DEFAULT_SDCARD_ROOT.to_string(),
            hide_sus_mounts_for_all_procs: true,
            umount_for_zygote_iso_service: false,
            avc_log_spoofing: false,
        }
    }
}

impl SusfsConfig {
    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SusfsConfig = serde_json::from_str(&content)?;
        config
            .validate()
            .map_err(crate::Error::InvalidArgument)?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        for (name, root) in [
            ("android_data_root", &self.android_data_root),
            ("sdcard_root", &self.sdcard_root),
        ] {
            SusPathname::new(root).map_err(|e| format!("{}: {}", name, e))?;
        }
        Ok(())
    }
}
