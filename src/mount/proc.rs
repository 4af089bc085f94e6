//! Linux mount host backed by `/proc/self/mountinfo` and `umount2(2)`.

use super::{MountHost, MountRecord};
use crate::path::{DevId, Ino};
use crate::registry::UmountMode;
use std::ffi::CString;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

/// Default mountinfo location for the calling process.
pub const SELF_MOUNTINFO: &str = "/proc/self/mountinfo";

/// Mount host for the running system.
#[derive(Debug, Clone)]
pub struct ProcMountHost {
    mountinfo: PathBuf,
}

impl Default for ProcMountHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcMountHost {
    pub fn new() -> Self {
        Self {
            mountinfo: PathBuf::from(SELF_MOUNTINFO),
        }
    }

    /// Read mounts from another mountinfo file, e.g. `/proc/<pid>/mountinfo`.
    pub fn with_mountinfo(path: impl Into<PathBuf>) -> Self {
        Self {
            mountinfo: path.into(),
        }
    }
}

impl MountHost for ProcMountHost {
    fn snapshot(&self) -> io::Result<Vec<MountRecord>> {
        let content = std::fs::read_to_string(&self.mountinfo)?;
        let mounts = parse_mountinfo(&content)
            .into_iter()
            .map(|mount| match std::fs::symlink_metadata(&mount.pathname) {
                Ok(meta) => mount.with_root_ino(Ino(meta.ino())),
                Err(_) => mount,
            })
            .collect();
        Ok(mounts)
    }

    fn umount(&self, mount: &MountRecord, mode: UmountMode) -> io::Result<()> {
        let target = CString::new(mount.pathname.as_str())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // SAFETY: `target` is a valid NUL-terminated string for the call.
        let ret = unsafe { libc::umount2(target.as_ptr(), mode.flags()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "procfs"
    }
}

/// Parse mountinfo lines, skipping malformed ones.
///
/// Format: `id parent major:minor root mount_point options ...`.
pub fn parse_mountinfo(content: &str) -> Vec<MountRecord> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }

            let mount_id = fields[0].parse::<u64>().ok()?;
            let (major, minor) = fields[2].split_once(':')?;
            let major = major.parse::<u32>().ok()?;
            let minor = minor.parse::<u32>().ok()?;
            let dev = libc::makedev(major, minor) as u64;

            Some(MountRecord::new(mount_id, unescape(fields[4]), DevId(dev)))
        })
        .collect()
}

/// Undo the kernel's octal escaping of space, tab, newline and backslash.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Wraps a host and logs unmounts instead of performing them.
#[derive(Debug, Clone, Default)]
pub struct DryRunHost<H> {
    inner: H,
}

impl<H: MountHost> DryRunHost<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: MountHost> MountHost for DryRunHost<H> {
    fn snapshot(&self) -> io::Result<Vec<MountRecord>> {
        self.inner.snapshot()
    }

    fn umount(&self, mount: &MountRecord, mode: UmountMode) -> io::Result<()> {
        log::info!(
            target: "susfs",
            "dry run: would umount '{}' (id {}) with {:?}",
            mount.pathname,
            mount.mount_id,
            mode
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}
