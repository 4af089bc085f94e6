//! Error and status types for the concealment core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for susfs operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while registering or resolving concealment entries.
#[derive(Error, Debug)]
pub enum Error {
    /// Oversized pathname, out-of-range enum, missing required field.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Lookup, update or bind against a key that is not registered.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The protocol forbids overwriting this entry.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Raised by the caller-authentication layer, never by the dispatcher.
    #[error("Permission denied")]
    PermissionDenied,

    /// Opcode outside the closed command set.
    #[error("Unknown command: {0:#x}")]
    UnknownCommand(u32),

    /// The mount namespace could not be enumerated.
    #[error("Mount namespace unavailable: {0}")]
    Namespace(#[source] std::io::Error),

    /// I/O error talking to the host.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload or script could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Status code reported back to the control-plane caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    HostFailure,
}

impl Status {
    /// Errno-style code: zero on success, negative errno otherwise.
    pub fn code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::InvalidArgument => -libc::EINVAL,
            Status::NotFound => -libc::ENOENT,
            Status::AlreadyExists => -libc::EEXIST,
            Status::PermissionDenied => -libc::EPERM,
            Status::HostFailure => -libc::EIO,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl From<&Error> for Status {
    fn from(e: &Error) -> Self {
        match e {
            Error::InvalidArgument(_) | Error::UnknownCommand(_) | Error::Serialization(_) => {
                Status::InvalidArgument
            }
            Error::NotFound(_) => Status::NotFound,
            Error::AlreadyExists(_) => Status::AlreadyExists,
            Error::PermissionDenied => Status::PermissionDenied,
            Error::Namespace(_) | Error::Io(_) => Status::HostFailure,
        }
    }
}
