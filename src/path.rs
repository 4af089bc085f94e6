//! Bounded pathname and identity types.
//!
//! Every pathname that crosses the control plane is validated once, at
//! construction, and is immutable afterwards. Oversized input is rejected,
//! never truncated.

use crate::config::{FAKE_CMDLINE_OR_BOOTCONFIG_SIZE, MAX_LEN_PATHNAME, NEW_UTS_LEN};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inode number of a host filesystem object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ino(pub u64);

impl Ino {
    /// Placeholder carried by path-only and static entries.
    pub const NONE: Ino = Ino(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Ino {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device number of a mounted filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevId(pub u64);

impl fmt::Display for DevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated absolute pathname that fits a 256-byte buffer with its terminator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SusPathname(String);

impl SusPathname {
    /// Validate a pathname.
    ///
    /// Paths must be absolute, shorter than [`MAX_LEN_PATHNAME`] bytes and
    /// free of NUL bytes and `.`/`..` components. A trailing slash is dropped.
    pub fn new(path: &str) -> Result<Self> {
        if path.len() >= MAX_LEN_PATHNAME {
            return Err(Error::InvalidArgument(format!(
                "pathname is {} bytes, limit is {}",
                path.len(),
                MAX_LEN_PATHNAME - 1
            )));
        }
        if path.contains('\0') {
            return Err(Error::InvalidArgument(
                "pathname contains a NUL byte".to_string(),
            ));
        }
        if !path.starts_with('/') {
            return Err(Error::InvalidArgument(format!(
                "pathname must be absolute: {}",
                path
            )));
        }

        for component in path.split('/') {
            if component == "." || component == ".." {
                return Err(Error::InvalidArgument(format!(
                    "invalid path component in {}",
                    path
                )));
            }
        }

        let trimmed = path.trim_end_matches('/');
        let normalized = if trimmed.is_empty() { "/" } else { trimmed };
        Ok(Self(normalized.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Whether this path equals `root` or lies beneath it, component-wise.
    pub fn is_under(&self, root: &SusPathname) -> bool {
        if root.is_root() {
            return true;
        }
        match self.0.strip_prefix(root.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// This path followed by each of its ancestors, root last.
    pub fn ancestors(&self) -> impl Iterator<Item = &str> {
        let s = self.0.as_str();
        let mut next = Some(s);
        std::iter::from_fn(move || {
            let current = next?;
            next = match current.rfind('/') {
                Some(0) if current.len() > 1 => Some("/"),
                Some(0) => None,
                Some(pos) => Some(&current[..pos]),
                None => None,
            };
            Some(current)
        })
    }
}

impl TryFrom<String> for SusPathname {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<SusPathname> for String {
    fn from(p: SusPathname) -> Self {
        p.0
    }
}

impl std::borrow::Borrow<str> for SusPathname {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SusPathname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One uname field (`release` or `version`), at most 64 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UtsField(String);

impl UtsField {
    pub fn new(value: &str) -> Result<Self> {
        if value.len() > NEW_UTS_LEN {
            return Err(Error::InvalidArgument(format!(
                "uname field is {} bytes, limit is {}",
                value.len(),
                NEW_UTS_LEN
            )));
        }
        if value.contains('\0') {
            return Err(Error::InvalidArgument(
                "uname field contains a NUL byte".to_string(),
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UtsField {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<UtsField> for String {
    fn from(f: UtsField) -> Self {
        f.0
    }
}

/// Replacement content for `/proc/cmdline` or `/proc/bootconfig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FakeCmdline(String);

impl FakeCmdline {
    pub fn new(value: &str) -> Result<Self> {
        if value.len() >= FAKE_CMDLINE_OR_BOOTCONFIG_SIZE {
            return Err(Error::InvalidArgument(format!(
                "cmdline is {} bytes, limit is {}",
                value.len(),
                FAKE_CMDLINE_OR_BOOTCONFIG_SIZE - 1
            )));
        }
        if value.contains('\0') {
            return Err(Error::InvalidArgument(
                "cmdline contains a NUL byte".to_string(),
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl TryFrom<String> for FakeCmdline {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<FakeCmdline> for String {
    fn from(c: FakeCmdline) -> Self {
        c.0
    }
}
