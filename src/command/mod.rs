//! Control-plane commands.
//!
//! Every mutation and query arrives as one [`Command`]. The numeric opcode
//! and its `bincode` payload are decoded once, at the boundary, by
//! [`Command::decode`]; everything after that matches on the enum.
//!
//! Scripts use the JSON form:
//!
//! ```json
//! {"op": "add_try_umount", "args": {"target_pathname": "/system/bin", "mnt_mode": 1}}
//! {"op": "run_umount_for_current_mnt_ns"}
//! ```

mod dispatch;

pub use dispatch::{Dispatcher, Reply, Response};

use crate::error::{Error, Result};
use crate::path::{FakeCmdline, SusPathname};
use crate::registry::{
    OpenRedirectEntry, SusKstat, SusMountEntry, SusPathEntry, SusSuMode, TryUmountEntry,
    UnameSpoof,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, FromRepr};

/// Numeric command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u32)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    AddSusPath = 0x1,
    AddSusPathLoop = 0x2,
    SetAndroidDataRootPath = 0x3,
    SetSdcardRootPath = 0x4,
    AddSusMount = 0x5,
    HideSusMountsForAllProcs = 0x6,
    UmountForZygoteIsoService = 0x7,
    AddSusKstat = 0x8,
    UpdateSusKstat = 0x9,
    AddSusKstatStatically = 0x10,
    AddTryUmount = 0x11,
    RunUmountForCurrentMntNs = 0x12,
    SetUname = 0x13,
    EnableLog = 0x14,
    SetCmdlineOrBootconfig = 0x15,
    AddOpenRedirect = 0x16,
    SusSu = 0x17,
    ShowVersion = 0x18,
    ShowEnabledFeatures = 0x19,
    ShowVariant = 0x1A,
    IsSusSuReady = 0x1B,
    ShowSusSuWorkingMode = 0x1C,
    EnableAvcLogSpoofing = 0x1D,
    GetSusfsFeatureStatus = 0x1E,
}

impl Opcode {
    /// Wire id of the opcode.
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Opcode {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Opcode::from_repr(value).ok_or(Error::UnknownCommand(value))
    }
}

/// A decoded control-plane command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Command {
    AddSusPath(SusPathEntry),
    AddSusPathLoop(Vec<SusPathEntry>),
    SetAndroidDataRootPath(SusPathname),
    SetSdcardRootPath(SusPathname),
    AddSusMount(SusMountEntry),
    HideSusMountsForAllProcs(bool),
    UmountForZygoteIsoService(bool),
    AddSusKstat(SusKstat),
    UpdateSusKstat(SusKstat),
    AddSusKstatStatically(SusKstat),
    AddTryUmount(TryUmountEntry),
    RunUmountForCurrentMntNs,
    SetUname(UnameSpoof),
    EnableLog(bool),
    SetCmdlineOrBootconfig(FakeCmdline),
    AddOpenRedirect(OpenRedirectEntry),
    SusSu(SusSuMode),
    ShowVersion,
    ShowEnabledFeatures,
    ShowVariant,
    IsSusSuReady,
    ShowSusSuWorkingMode,
    EnableAvcLogSpoofing(bool),
    GetSusfsFeatureStatus,
}

impl Command {
    /// Opcode this command is sent under.
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::AddSusPath(_) => Opcode::AddSusPath,
            Command::AddSusPathLoop(_) => Opcode::AddSusPathLoop,
            Command::SetAndroidDataRootPath(_) => Opcode::SetAndroidDataRootPath,
            Command::SetSdcardRootPath(_) => Opcode::SetSdcardRootPath,
            Command::AddSusMount(_) => Opcode::AddSusMount,
            Command::HideSusMountsForAllProcs(_) => Opcode::HideSusMountsForAllProcs,
            Command::UmountForZygoteIsoService(_) => Opcode::UmountForZygoteIsoService,
            Command::AddSusKstat(_) => Opcode::AddSusKstat,
            Command::UpdateSusKstat(_) => Opcode::UpdateSusKstat,
            Command::AddSusKstatStatically(_) => Opcode::AddSusKstatStatically,
            Command::AddTryUmount(_) => Opcode::AddTryUmount,
            Command::RunUmountForCurrentMntNs => Opcode::RunUmountForCurrentMntNs,
            Command::SetUname(_) => Opcode::SetUname,
            Command::EnableLog(_) => Opcode::EnableLog,
            Command::SetCmdlineOrBootconfig(_) => Opcode::SetCmdlineOrBootconfig,
            Command::AddOpenRedirect(_) => Opcode::AddOpenRedirect,
            Command::SusSu(_) => Opcode::SusSu,
            Command::ShowVersion => Opcode::ShowVersion,
            Command::ShowEnabledFeatures => Opcode::ShowEnabledFeatures,
            Command::ShowVariant => Opcode::ShowVariant,
            Command::IsSusSuReady => Opcode::IsSusSuReady,
            Command::ShowSusSuWorkingMode => Opcode::ShowSusSuWorkingMode,
            Command::EnableAvcLogSpoofing(_) => Opcode::EnableAvcLogSpoofing,
            Command::GetSusfsFeatureStatus => Opcode::GetSusfsFeatureStatus,
        }
    }

    /// Decode a raw opcode and its `bincode` payload.
    ///
    /// Commands without arguments ignore the payload. Every pathname and
    /// enum in the payload is validated while decoding, so a command that
    /// decodes is well formed.
    pub fn decode(opcode: u32, payload: &[u8]) -> Result<Self> {
        fn arg<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
            Ok(bincode::deserialize(payload)?)
        }

        let command = match Opcode::try_from(opcode)? {
            Opcode::AddSusPath => Command::AddSusPath(arg(payload)?),
            Opcode::AddSusPathLoop => Command::AddSusPathLoop(arg(payload)?),
            Opcode::SetAndroidDataRootPath => Command::SetAndroidDataRootPath(arg(payload)?),
            Opcode::SetSdcardRootPath => Command::SetSdcardRootPath(arg(payload)?),
            Opcode::AddSusMount => Command::AddSusMount(arg(payload)?),
            Opcode::HideSusMountsForAllProcs => Command::HideSusMountsForAllProcs(arg(payload)?),
            Opcode::UmountForZygoteIsoService => {
                Command::UmountForZygoteIsoService(arg(payload)?)
            }
            Opcode::AddSusKstat => Command::AddSusKstat(arg(payload)?),
            Opcode::UpdateSusKstat => Command::UpdateSusKstat(arg(payload)?),
            Opcode::AddSusKstatStatically => Command::AddSusKstatStatically(arg(payload)?),
            Opcode::AddTryUmount => Command::AddTryUmount(arg(payload)?),
            Opcode::RunUmountForCurrentMntNs => Command::RunUmountForCurrentMntNs,
            Opcode::SetUname => Command::SetUname(arg(payload)?),
            Opcode::EnableLog => Command::EnableLog(arg(payload)?),
            Opcode::SetCmdlineOrBootconfig => Command::SetCmdlineOrBootconfig(arg(payload)?),
            Opcode::AddOpenRedirect => Command::AddOpenRedirect(arg(payload)?),
            Opcode::SusSu => Command::SusSu(arg(payload)?),
            Opcode::ShowVersion => Command::ShowVersion,
            Opcode::ShowEnabledFeatures => Command::ShowEnabledFeatures,
            Opcode::ShowVariant => Command::ShowVariant,
            Opcode::IsSusSuReady => Command::IsSusSuReady,
            Opcode::ShowSusSuWorkingMode => Command::ShowSusSuWorkingMode,
            Opcode::EnableAvcLogSpoofing => Command::EnableAvcLogSpoofing(arg(payload)?),
            Opcode::GetSusfsFeatureStatus => Command::GetSusfsFeatureStatus,
        };
        Ok(command)
    }

    /// Encode the arguments as a `bincode` payload for [`Command::decode`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Command::AddSusPath(entry) => bincode::serialize(entry)?,
            Command::AddSusPathLoop(entries) => bincode::serialize(entries)?,
            Command::SetAndroidDataRootPath(path) | Command::SetSdcardRootPath(path) => {
                bincode::serialize(path)?
            }
            Command::AddSusMount(entry) => bincode::serialize(entry)?,
            Command::HideSusMountsForAllProcs(flag)
            | Command::UmountForZygoteIsoService(flag)
            | Command::EnableLog(flag)
            | Command::EnableAvcLogSpoofing(flag) => bincode::serialize(flag)?,
            Command::AddSusKstat(record)
            | Command::UpdateSusKstat(record)
            | Command::AddSusKstatStatically(record) => bincode::serialize(record)?,
            Command::AddTryUmount(entry) => bincode::serialize(entry)?,
            Command::SetUname(spoof) => bincode::serialize(spoof)?,
            Command::SetCmdlineOrBootconfig(cmdline) => bincode::serialize(cmdline)?,
            Command::AddOpenRedirect(entry) => bincode::serialize(entry)?,
            Command::SusSu(mode) => bincode::serialize(mode)?,
            Command::RunUmountForCurrentMntNs
            | Command::ShowVersion
            | Command::ShowEnabledFeatures
            | Command::ShowVariant
            | Command::IsSusSuReady
            | Command::ShowSusSuWorkingMode
            | Command::GetSusfsFeatureStatus => Vec::new(),
        };
        Ok(payload)
    }

    /// Parse a JSON script: one command per non-empty line, or a JSON array.
    pub fn parse_script(script: &str) -> Result<Vec<Command>> {
        let trimmed = script.trim_start();
        if trimmed.starts_with('[') {
            return Ok(serde_json::from_str(trimmed)?);
        }
        script
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("//"))
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }
}
