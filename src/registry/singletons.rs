//! Singleton records: uname spoof, sus-su mode and runtime settings.

use crate::config::{SusfsConfig, UNAME_KEEP_REAL};
use crate::error::{Error, Result};
use crate::path::{SusPathname, UtsField};
use serde::{Deserialize, Serialize};

/// Kernel version strings as reported by `uname(2)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utsname {
    pub release: String,
    pub version: String,
}

/// Replacement `release`/`version` strings.
///
/// A field set to `default` keeps the real value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnameSpoof {
    pub release: UtsField,
    pub version: UtsField,
}

impl UnameSpoof {
    pub fn new(release: &str, version: &str) -> Result<Self> {
        Ok(Self {
            release: UtsField::new(release)?,
            version: UtsField::new(version)?,
        })
    }

    /// Spoofed release and version over `real`. A field set to
    /// [`UNAME_KEEP_REAL`] passes the real value through.
    pub fn apply(&self, real: &Utsname) -> Utsname {
        let pick = |spoof: &UtsField, real: &str| {
            if spoof.as_str() == UNAME_KEEP_REAL {
                real.to_string()
            } else {
                spoof.as_str().to_string()
            }
        };
        Utsname {
            release: pick(&self.release, &real.release),
            version: pick(&self.version, &real.version),
        }
    }
}

/// How the companion privilege-elevation path is concealed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum SusSuMode {
    #[default]
    Disabled,
    WithHooks,
    WithOverlay,
}

impl TryFrom<i32> for SusSuMode {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(SusSuMode::Disabled),
            1 => Ok(SusSuMode::WithHooks),
            2 => Ok(SusSuMode::WithOverlay),
            other => Err(Error::InvalidArgument(format!(
                "sus_su mode {} is out of range",
                other
            ))),
        }
    }
}

impl From<SusSuMode> for i32 {
    fn from(mode: SusSuMode) -> Self {
        match mode {
            SusSuMode::Disabled => 0,
            SusSuMode::WithHooks => 1,
            SusSuMode::WithOverlay => 2,
        }
    }
}

/// Runtime switches set by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub android_data_root: SusPathname,
    pub sdcard_root: SusPathname,
    pub hide_sus_mounts_for_all_procs: bool,
    pub umount_for_zygote_iso_service: bool,
    pub avc_log_spoofing: bool,
}

impl Settings {
    /// Validated settings from a loaded configuration.
    pub fn from_config(config: &SusfsConfig) -> Result<Self> {
        Ok(Self {
            android_data_root: SusPathname::new(&config.android_data_root)?,
            sdcard_root: SusPathname::new(&config.sdcard_root)?,
            hide_sus_mounts_for_all_procs: config.hide_sus_mounts_for_all_procs,
            umount_for_zygote_iso_service: config.umount_for_zygote_iso_service,
            avc_log_spoofing: config.avc_log_spoofing,
        })
    }

    /// Whether `path` lives on emulated storage, where inode numbers are
    /// not stable and entries are matched by pathname.
    pub fn is_emulated_storage(&self, path: &SusPathname) -> bool {
        path.is_under(&self.android_data_root) || path.is_under(&self.sdcard_root)
    }
}
