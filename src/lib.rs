//! SUSFS Concealment Core
//!
//! Registry and control-plane core for hiding filesystem objects, mounts and
//! stat metadata from ordinary introspection.
//!
//! # Features
//!
//! - **Registries**: sus paths, sus mounts, spoofed kstat, try-umount targets
//!   and open redirects, each validated at registration
//! - **Inode Tags**: a side table of per-inode markers so hot-path lookups
//!   skip untagged objects
//! - **Mount Sweep**: best-effort hide and unmount pass over a mount
//!   namespace snapshot
//! - **Command Dispatcher**: the closed opcode set, decoded once and applied
//!   all-or-nothing
//!
//! # Architecture
//!
//! ```text
//! opcode + payload → Command → Dispatcher → SusfsContext ← LookupEngine
//!                                              ↑
//!                                       MountSweepEngine → MountHost
//! ```
//!
//! # Example
//!
//! ```rust
//! use susfs::lookup::{Target, Visibility};
//! use susfs::mount::{DryRunHost, ProcMountHost};
//! use susfs::path::{Ino, SusPathname};
//! use susfs::registry::SusPathEntry;
//! use susfs::{Command, Dispatcher, LookupEngine, SusfsContext};
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(SusfsContext::default());
//! let dispatcher = Dispatcher::new(ctx.clone(), Arc::new(DryRunHost::new(ProcMountHost::new())));
//!
//! let entry = SusPathEntry::new(Ino(1234), SusPathname::new("/data/adb/ksu").unwrap());
//! dispatcher.dispatch(Command::AddSusPath(entry)).unwrap();
//!
//! let lookup = LookupEngine::new(ctx);
//! assert_eq!(
//!     lookup.resolve_path_visibility(Target::Inode(Ino(1234))),
//!     Visibility::Hidden
//! );
//! ```

pub mod logging;

pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod features;
pub mod lookup;
pub mod mount;
pub mod path;
pub mod registry;
pub mod resolver;
pub mod tags;

pub use command::{Command, Dispatcher, Reply, Response};
pub use config::SusfsConfig;
pub use context::{RegistrySnapshot, SusfsContext};
pub use error::{Error, Result, Status};
pub use lookup::LookupEngine;
pub use mount::MountSweepEngine;
