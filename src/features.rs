//! Capability flags reported by `SHOW_ENABLED_FEATURES` and
//! `GET_SUSFS_FEATURE_STATUS`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{Display, EnumIter, IntoEnumIterator};

/// One concealment capability.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Feature {
    SusPath,
    SusMount,
    SusKstat,
    TryUmount,
    SpoofUname,
    OpenRedirect,
    SusSu,
    EnableLog,
    HideSymbols,
    SpoofCmdline,
    MagicMount,
}

impl Feature {
    /// Kernel config symbol the capability was historically gated by.
    pub fn config_name(self) -> &'static str {
        match self {
            Feature::SusPath => "CONFIG_KSU_SUSFS_SUS_PATH",
            Feature::SusMount => "CONFIG_KSU_SUSFS_SUS_MOUNT",
            Feature::SusKstat => "CONFIG_KSU_SUSFS_SUS_KSTAT",
            Feature::TryUmount => "CONFIG_KSU_SUSFS_TRY_UMOUNT",
            Feature::SpoofUname => "CONFIG_KSU_SUSFS_SPOOF_UNAME",
            Feature::OpenRedirect => "CONFIG_KSU_SUSFS_OPEN_REDIRECT",
            Feature::SusSu => "CONFIG_KSU_SUSFS_SUS_SU",
            Feature::EnableLog => "CONFIG_KSU_SUSFS_ENABLE_LOG",
            Feature::HideSymbols => "CONFIG_KSU_SUSFS_HIDE_KSU_SUSFS_SYMBOLS",
            Feature::SpoofCmdline => "CONFIG_KSU_SUSFS_SPOOF_CMDLINE_OR_BOOTCONFIG",
            Feature::MagicMount => "CONFIG_KSU_SUSFS_HAS_MAGIC_MOUNT",
        }
    }
}

/// The set of capabilities switched on so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureStatus {
    enabled: BTreeSet<Feature>,
}

impl FeatureStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a capability enabled. Returns `true` on first enablement.
    pub fn enable(&mut self, feature: Feature) -> bool {
        self.enabled.insert(feature)
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.enabled.iter().copied()
    }

    /// Every capability paired with its state, in declaration order.
    pub fn all(&self) -> Vec<(Feature, bool)> {
        Feature::iter().map(|f| (f, self.is_enabled(f))).collect()
    }

    /// One config symbol per enabled capability, newline separated.
    pub fn render(&self) -> String {
        self.iter()
            .map(|f| format!("{}\n", f.config_name()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_once() {
        let mut status = FeatureStatus::new();
        assert!(status.enable(Feature::SusPath));
        assert!(!status.enable(Feature::SusPath));
        assert!(status.is_enabled(Feature::SusPath));
        assert!(!status.is_enabled(Feature::SusMount));
    }

    #[test]
    fn test_all_covers_every_feature() {
        let status = FeatureStatus::new();
        assert_eq!(status.all().len(), 11);
        assert!(status.all().iter().all(|(_, on)| !on));
    }

    #[test]
    fn test_render() {
        let mut status = FeatureStatus::new();
        status.enable(Feature::TryUmount);
        status.enable(Feature::SusPath);
        assert_eq!(
            status.render(),
            "CONFIG_KSU_SUSFS_SUS_PATH\nCONFIG_KSU_SUSFS_TRY_UMOUNT\n"
        );
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Feature::SpoofCmdline.to_string(), "spoof_cmdline");
    }
}
