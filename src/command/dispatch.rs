//! Command dispatcher.

use super::Command;
use crate::config::{SUSFS_VARIANT, SUSFS_VERSION};
use crate::context::SusfsContext;
use crate::error::{Result, Status};
use crate::features::{Feature, FeatureStatus};
use crate::logging::sus_log;
use crate::mount::{MountHost, MountSweepEngine, SweepReport, SweepScope};
use crate::registry::SusSuMode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Payload returned by a successful command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Response {
    Done,
    Version(String),
    Variant(String),
    EnabledFeatures(String),
    FeatureStatus(Vec<(Feature, bool)>),
    SusSuReady(bool),
    SusSuMode(SusSuMode),
    Sweep(SweepReport),
}

/// Status plus response, as handed back over the raw transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub status: Status,
    /// Errno-style form of `status`.
    pub code: i32,
    pub response: Option<Response>,
}

impl Reply {
    fn ok(response: Response) -> Self {
        Self {
            status: Status::Success,
            code: Status::Success.code(),
            response: Some(response),
        }
    }

    fn err(status: Status) -> Self {
        Self {
            status,
            code: status.code(),
            response: None,
        }
    }
}

/// Applies commands to a context, one at a time.
///
/// The caller is assumed to have authenticated the requester already.
pub struct Dispatcher {
    ctx: Arc<SusfsContext>,
    host: Arc<dyn MountHost>,
    sweeper: MountSweepEngine,
    serial: Mutex<()>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<SusfsContext>, host: Arc<dyn MountHost>) -> Self {
        Self {
            sweeper: MountSweepEngine::new(ctx.clone()),
            ctx,
            host,
            serial: Mutex::new(()),
        }
    }

    /// Context the dispatcher writes to.
    pub fn context(&self) -> &Arc<SusfsContext> {
        &self.ctx
    }

    /// Apply one decoded command.
    pub fn dispatch(&self, command: Command) -> Result<Response> {
        let _serial = self.serial.lock();
        let opcode = command.opcode();
        sus_log!(self.ctx, debug, "dispatch {} ({:#x})", opcode, opcode.code());

        let ctx = &self.ctx;
        let response = match command {
            Command::AddSusPath(entry) => {
                ctx.add_sus_path(entry)?;
                Response::Done
            }
            Command::AddSusPathLoop(entries) => {
                ctx.add_sus_path_loop(entries)?;
                Response::Done
            }
            Command::SetAndroidDataRootPath(path) => {
                ctx.set_android_data_root(path);
                Response::Done
            }
            Command::SetSdcardRootPath(path) => {
                ctx.set_sdcard_root(path);
                Response::Done
            }
            Command::AddSusMount(entry) => {
                ctx.add_sus_mount(entry);
                Response::Done
            }
            Command::HideSusMountsForAllProcs(enabled) => {
                ctx.set_hide_sus_mounts_for_all_procs(enabled);
                Response::Done
            }
            Command::UmountForZygoteIsoService(enabled) => {
                ctx.set_umount_for_zygote_iso_service(enabled);
                Response::Done
            }
            Command::AddSusKstat(record) => {
                ctx.add_sus_kstat(record)?;
                Response::Done
            }
            Command::UpdateSusKstat(record) => {
                ctx.update_sus_kstat(record)?;
                Response::Done
            }
            Command::AddSusKstatStatically(record) => {
                ctx.add_sus_kstat_statically(record);
                Response::Done
            }
            Command::AddTryUmount(entry) => {
                ctx.add_try_umount(entry);
                Response::Done
            }
            Command::RunUmountForCurrentMntNs => {
                let report = self
                    .sweeper
                    .sweep(self.host.as_ref(), SweepScope::CurrentNamespace)?;
                Response::Sweep(report)
            }
            Command::SetUname(spoof) => {
                ctx.set_uname(spoof);
                Response::Done
            }
            Command::EnableLog(enabled) => {
                ctx.set_log_enabled(enabled);
                Response::Done
            }
            Command::SetCmdlineOrBootconfig(cmdline) => {
                ctx.set_cmdline(cmdline);
                Response::Done
            }
            Command::AddOpenRedirect(entry) => {
                ctx.add_open_redirect(entry)?;
                Response::Done
            }
            Command::SusSu(mode) => {
                ctx.set_sus_su_mode(mode);
                Response::Done
            }
            Command::ShowVersion => Response::Version(SUSFS_VERSION.to_string()),
            Command::ShowEnabledFeatures => Response::EnabledFeatures(ctx.features().render()),
            Command::ShowVariant => Response::Variant(SUSFS_VARIANT.to_string()),
            Command::IsSusSuReady => Response::SusSuReady(ctx.is_sus_su_ready()),
            Command::ShowSusSuWorkingMode => Response::SusSuMode(ctx.sus_su_mode()),
            Command::EnableAvcLogSpoofing(enabled) => {
                ctx.set_avc_log_spoofing(enabled);
                Response::Done
            }
            Command::GetSusfsFeatureStatus => {
                let status: FeatureStatus = ctx.features();
                Response::FeatureStatus(status.all())
            }
        };
        Ok(response)
    }

    /// Decode and apply a raw opcode and payload. Errors become a status.
    pub fn dispatch_raw(&self, opcode: u32, payload: &[u8]) -> Reply {
        let result = Command::decode(opcode, payload).and_then(|command| self.dispatch(command));
        match result {
            Ok(response) => Reply::ok(response),
            Err(e) => {
                sus_log!(self.ctx, warn, "command {:#x} rejected: {}", opcode, e);
                Reply::err(Status::from(&e))
            }
        }
    }
}
