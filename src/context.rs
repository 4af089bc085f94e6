//! The concealment context: every registry, the tag store and the singleton
//! records, owned by one object.
//!
//! A context is created once when the subsystem starts and shared by the
//! lookup engine, the mount sweep engine and the command dispatcher. Tests
//! build a fresh context each.

use crate::config::SusfsConfig;
use crate::error::{Error, Result};
use crate::features::{Feature, FeatureStatus};
use crate::logging::sus_log;
use crate::path::{FakeCmdline, Ino, SusPathname};
use crate::registry::{
    OpenRedirectEntry, OpenRedirectTable, Settings, SusKstat, SusKstatTable, SusMountEntry,
    SusMountList, SusPathEntry, SusPathTable, SusSuMode, TryUmountEntry, TryUmountList,
    UnameSpoof, Upsert,
};
use crate::resolver::InodeResolver;
use crate::tags::{InodeTagStore, TagSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared concealment state.
#[derive(Debug)]
pub struct SusfsContext {
    sus_paths: SusPathTable,
    sus_mounts: SusMountList,
    sus_kstats: SusKstatTable,
    try_umounts: TryUmountList,
    open_redirects: OpenRedirectTable,
    tags: InodeTagStore,
    uname: RwLock<Option<UnameSpoof>>,
    cmdline: RwLock<Option<FakeCmdline>>,
    sus_su_mode: RwLock<SusSuMode>,
    sus_su_ready: AtomicBool,
    settings: RwLock<Settings>,
    features: RwLock<FeatureStatus>,
    log_enabled: AtomicBool,
}

impl Default for SusfsContext {
    fn default() -> Self {
        Self::build(
            &SusfsConfig::default(),
            Settings::from_config(&SusfsConfig::default())
                .unwrap_or_else(|_| unreachable!("default roots are valid")),
        )
    }
}

impl SusfsContext {
    /// Create a context from a configuration.
    pub fn new(config: &SusfsConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidArgument)?;
        let settings = Settings::from_config(config)?;
        Ok(Self::build(config, settings))
    }

    fn build(config: &SusfsConfig, settings: Settings) -> Self {
        let mut features = FeatureStatus::new();
        if config.hide_symbols {
            features.enable(Feature::HideSymbols);
        }
        if config.magic_mount {
            features.enable(Feature::MagicMount);
        }
        if config.enable_log {
            features.enable(Feature::EnableLog);
        }

        Self {
            sus_paths: SusPathTable::new(),
            sus_mounts: SusMountList::new(),
            sus_kstats: SusKstatTable::new(),
            try_umounts: TryUmountList::new(),
            open_redirects: OpenRedirectTable::new(),
            tags: InodeTagStore::new(),
            uname: RwLock::new(None),
            cmdline: RwLock::new(None),
            sus_su_mode: RwLock::new(SusSuMode::Disabled),
            sus_su_ready: AtomicBool::new(false),
            settings: RwLock::new(settings),
            features: RwLock::new(features),
            log_enabled: AtomicBool::new(config.enable_log),
        }
    }

    /// Hidden objects, keyed by inode with a pathname index.
    pub fn sus_paths(&self) -> &SusPathTable {
        &self.sus_paths
    }

    /// Mounts hidden from non-su processes.
    pub fn sus_mounts(&self) -> &SusMountList {
        &self.sus_mounts
    }

    /// Spoofed stat records, bound and pending.
    pub fn sus_kstats(&self) -> &SusKstatTable {
        &self.sus_kstats
    }

    /// Unmount targets in registration order.
    pub fn try_umounts(&self) -> &TryUmountList {
        &self.try_umounts
    }

    /// Open redirects keyed by target inode.
    pub fn open_redirects(&self) -> &OpenRedirectTable {
        &self.open_redirects
    }

    /// Per-inode markers consulted before any table lookup.
    pub fn tags(&self) -> &InodeTagStore {
        &self.tags
    }

    /// Whether `sus_log!` output is emitted.
    pub fn log_enabled(&self) -> bool {
        self.log_enabled.load(Ordering::Relaxed)
    }

    /// Switch the log gate. Enabling also reports the ENABLE_LOG feature.
    pub fn set_log_enabled(&self, enabled: bool) {
        self.log_enabled.store(enabled, Ordering::Relaxed);
        if enabled {
            self.enable_feature(Feature::EnableLog);
        }
        log::info!(target: "susfs", "logging {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Copy of the feature set as of now.
    pub fn features(&self) -> FeatureStatus {
        self.features.read().clone()
    }

    fn enable_feature(&self, feature: Feature) {
        if self.features.write().enable(feature) {
            sus_log!(self, debug, "feature {} enabled", feature);
        }
    }

    /// Copy of the storage roots and behaviour switches.
    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    // --- sus path ---

    /// Register a hidden object.
    ///
    /// An entry without an inode is only accepted on emulated storage.
    pub fn add_sus_path(&self, entry: SusPathEntry) -> Result<Upsert> {
        self.check_sus_path(&entry)?;
        let outcome = self.sus_paths.upsert(entry.clone(), &self.tags);
        self.enable_feature(Feature::SusPath);
        sus_log!(
            self,
            info,
            "sus_path {:?}: ino {} '{}'",
            outcome,
            entry.target_ino,
            entry.target_pathname
        );
        Ok(outcome)
    }

    /// Register a batch of hidden objects and remember them for
    /// re-registration on every app spawn. Nothing is applied unless every
    /// entry is valid.
    pub fn add_sus_path_loop(&self, entries: Vec<SusPathEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Err(Error::InvalidArgument(
                "sus path loop batch is empty".to_string(),
            ));
        }
        for entry in &entries {
            self.check_sus_path(entry)?;
        }

        let count = entries.len();
        for entry in entries {
            self.sus_paths.add_loop_path(entry.target_pathname.clone());
            self.sus_paths.upsert(entry, &self.tags);
        }
        self.enable_feature(Feature::SusPath);
        sus_log!(self, info, "sus_path_loop: {} entries", count);
        Ok(count)
    }

    /// Re-resolve every loop pathname and register its current inode.
    /// Returns how many pathnames resolved.
    pub fn reapply_sus_path_loop(&self, resolver: &dyn InodeResolver) -> usize {
        let settings = self.settings();
        let mut applied = 0;
        for path in self.sus_paths.loop_paths() {
            let ino = match resolver.resolve(&path) {
                Some(ino) => ino,
                None if settings.is_emulated_storage(&path) => Ino::NONE,
                None => continue,
            };
            self.sus_paths
                .upsert(SusPathEntry::new(ino, path), &self.tags);
            applied += 1;
        }
        sus_log!(self, debug, "sus_path_loop reapplied: {} entries", applied);
        applied
    }

    fn check_sus_path(&self, entry: &SusPathEntry) -> Result<()> {
        if entry.is_path_only() && !self.settings.read().is_emulated_storage(&entry.target_pathname) {
            return Err(Error::InvalidArgument(format!(
                "sus path '{}' needs an inode outside emulated storage",
                entry.target_pathname
            )));
        }
        Ok(())
    }

    /// Unregister the object hidden under `ino`.
    pub fn remove_sus_path(&self, ino: Ino) -> Result<SusPathEntry> {
        self.sus_paths
            .remove(ino, &self.tags)
            .ok_or_else(|| Error::NotFound(format!("no sus path for inode {}", ino)))
    }

    /// Change the Android data root. Later path-only entries are checked
    /// against the new root.
    pub fn set_android_data_root(&self, path: SusPathname) {
        sus_log!(self, info, "android data root set to '{}'", path);
        self.settings.write().android_data_root = path;
    }

    pub fn set_sdcard_root(&self, path: SusPathname) {
        sus_log!(self, info, "sdcard root set to '{}'", path);
        self.settings.write().sdcard_root = path;
    }

    // --- sus mount ---

    /// Register a mount to hide. Keyed by pathname plus device.
    pub fn add_sus_mount(&self, entry: SusMountEntry) -> Upsert {
        let outcome = self.sus_mounts.upsert(entry.clone(), &self.tags);
        self.enable_feature(Feature::SusMount);
        sus_log!(
            self,
            info,
            "sus_mount {:?}: '{}' dev {}",
            outcome,
            entry.target_pathname,
            entry.target_dev
        );
        outcome
    }

    pub fn set_hide_sus_mounts_for_all_procs(&self, enabled: bool) {
        self.settings.write().hide_sus_mounts_for_all_procs = enabled;
        sus_log!(self, info, "hide sus mounts for all procs: {}", enabled);
    }

    pub fn set_umount_for_zygote_iso_service(&self, enabled: bool) {
        self.settings.write().umount_for_zygote_iso_service = enabled;
        sus_log!(self, info, "umount for zygote iso service: {}", enabled);
    }

    // --- sus kstat ---

    /// Register spoofed stat fields for a known inode.
    pub fn add_sus_kstat(&self, record: SusKstat) -> Result<Upsert> {
        let ino = record.target_ino;
        let outcome = self.sus_kstats.add_bound(record, &self.tags)?;
        self.enable_feature(Feature::SusKstat);
        sus_log!(self, info, "sus_kstat {:?}: ino {}", outcome, ino);
        Ok(outcome)
    }

    /// Move an existing kstat entry for the same pathname to a new inode.
    ///
    /// Fails with `NotFound` when the pathname has no bound entry and with
    /// `AlreadyExists` when the new inode belongs to another pathname.
    pub fn update_sus_kstat(&self, record: SusKstat) -> Result<()> {
        let path = record.target_pathname.clone();
        let ino = record.target_ino;
        self.sus_kstats.update(record, &self.tags)?;
        sus_log!(self, info, "sus_kstat updated: '{}' -> ino {}", path, ino);
        Ok(())
    }

    /// Park a kstat record until its real inode is bound.
    pub fn add_sus_kstat_statically(&self, record: SusKstat) -> Upsert {
        let path = record.target_pathname.clone();
        let outcome = self.sus_kstats.add_static(record);
        self.enable_feature(Feature::SusKstat);
        sus_log!(self, info, "sus_kstat static {:?}: '{}'", outcome, path);
        outcome
    }

    /// Bind a pending static kstat entry to its real inode.
    pub fn bind_static_kstat(&self, path: &SusPathname, real_ino: Ino) -> bool {
        let bound = self.sus_kstats.bind(path, real_ino, &self.tags);
        if bound {
            sus_log!(self, debug, "sus_kstat bound: '{}' -> ino {}", path, real_ino);
        }
        bound
    }

    /// Unregister the bound kstat entry for `ino`.
    pub fn remove_sus_kstat(&self, ino: Ino) -> Result<SusKstat> {
        self.sus_kstats
            .remove(ino, &self.tags)
            .ok_or_else(|| Error::NotFound(format!("no sus kstat for inode {}", ino)))
    }

    // --- try umount ---

    /// Register an unmount target. An update keeps the original position.
    pub fn add_try_umount(&self, entry: TryUmountEntry) -> Upsert {
        let outcome = self.try_umounts.upsert(entry.clone());
        self.enable_feature(Feature::TryUmount);
        sus_log!(
            self,
            info,
            "try_umount {:?}: '{}' {:?}",
            outcome,
            entry.target_pathname,
            entry.mnt_mode
        );
        outcome
    }

    // --- open redirect ---

    /// Register a redirect for opens of `target_ino`.
    pub fn add_open_redirect(&self, entry: OpenRedirectEntry) -> Result<Upsert> {
        if entry.target_ino.is_none() {
            return Err(Error::InvalidArgument(
                "open redirect needs a target inode".to_string(),
            ));
        }
        let outcome = self.open_redirects.upsert(entry.clone(), &self.tags);
        self.enable_feature(Feature::OpenRedirect);
        sus_log!(
            self,
            info,
            "open_redirect {:?}: '{}' -> '{}'",
            outcome,
            entry.target_pathname,
            entry.redirected_pathname
        );
        Ok(outcome)
    }

    /// Unregister the open redirect for `ino`.
    pub fn remove_open_redirect(&self, ino: Ino) -> Result<OpenRedirectEntry> {
        self.open_redirects
            .remove(ino, &self.tags)
            .ok_or_else(|| Error::NotFound(format!("no open redirect for inode {}", ino)))
    }

    // --- singletons ---

    /// Replace the uname spoof.
    pub fn set_uname(&self, spoof: UnameSpoof) {
        sus_log!(
            self,
            info,
            "uname spoof: release '{}' version '{}'",
            spoof.release.as_str(),
            spoof.version.as_str()
        );
        *self.uname.write() = Some(spoof);
        self.enable_feature(Feature::SpoofUname);
    }

    /// Current uname spoof, if one was set.
    pub fn uname(&self) -> Option<UnameSpoof> {
        self.uname.read().clone()
    }

    /// Replace the fake cmdline or bootconfig.
    pub fn set_cmdline(&self, cmdline: FakeCmdline) {
        sus_log!(self, info, "cmdline spoof: {} bytes", cmdline.as_bytes().len());
        *self.cmdline.write() = Some(cmdline);
        self.enable_feature(Feature::SpoofCmdline);
    }

    /// Current fake cmdline or bootconfig, if one was set.
    pub fn cmdline(&self) -> Option<FakeCmdline> {
        self.cmdline.read().clone()
    }

    pub fn set_sus_su_mode(&self, mode: SusSuMode) {
        *self.sus_su_mode.write() = mode;
        if mode != SusSuMode::Disabled {
            self.enable_feature(Feature::SusSu);
        }
        sus_log!(self, info, "sus_su mode: {:?}", mode);
    }

    /// Working mode last set through SUS_SU.
    pub fn sus_su_mode(&self) -> SusSuMode {
        *self.sus_su_mode.read()
    }

    /// Raised by the host once the sus-su companion is in place.
    pub fn set_sus_su_ready(&self, ready: bool) {
        self.sus_su_ready.store(ready, Ordering::Release);
    }

    /// Whether the host has raised the sus-su ready flag.
    pub fn is_sus_su_ready(&self) -> bool {
        self.sus_su_ready.load(Ordering::Acquire)
    }

    pub fn set_avc_log_spoofing(&self, enabled: bool) {
        self.settings.write().avc_log_spoofing = enabled;
        sus_log!(self, info, "avc log spoofing: {}", enabled);
    }

    // --- lifecycle ---

    /// Destruction notification for a host inode: drop every inode-keyed
    /// entry and tag that refers to it.
    pub fn on_inode_evicted(&self, ino: Ino) -> TagSet {
        let before = self.tags.tags_of(ino);
        if before.is_empty() {
            return before;
        }

        self.sus_paths.remove(ino, &self.tags);
        self.sus_kstats.remove(ino, &self.tags);
        self.open_redirects.remove(ino, &self.tags);
        self.sus_mounts.forget_root(ino, &self.tags);
        self.tags.forget(ino);

        sus_log!(self, debug, "inode {} evicted, dropped {:?}", ino, before.tags());
        before
    }

    /// Point-in-time copy of every registry, for comparison and reporting.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            sus_paths: self.sus_paths.entries(),
            sus_path_only: self.sus_paths.path_only(),
            sus_path_loop: self.sus_paths.loop_paths(),
            sus_mounts: self.sus_mounts.entries(),
            sus_kstats: self.sus_kstats.bound(),
            sus_kstats_pending: self.sus_kstats.pending(),
            try_umounts: self.try_umounts.entries(),
            open_redirects: self.open_redirects.entries(),
            tags: self.tags.snapshot(),
            uname: self.uname(),
            cmdline: self.cmdline(),
            sus_su_mode: self.sus_su_mode(),
            settings: self.settings(),
            features: self.features(),
            log_enabled: self.log_enabled(),
        }
    }
}

/// Serializable copy of a context's registries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub sus_paths: Vec<SusPathEntry>,
    pub sus_path_only: Vec<SusPathname>,
    pub sus_path_loop: Vec<SusPathname>,
    pub sus_mounts: Vec<SusMountEntry>,
    pub sus_kstats: Vec<SusKstat>,
    pub sus_kstats_pending: Vec<SusKstat>,
    pub try_umounts: Vec<TryUmountEntry>,
    pub open_redirects: Vec<OpenRedirectEntry>,
    pub tags: Vec<(Ino, TagSet)>,
    pub uname: Option<UnameSpoof>,
    pub cmdline: Option<FakeCmdline>,
    pub sus_su_mode: SusSuMode,
    pub settings: Settings,
    pub features: FeatureStatus,
    pub log_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::DevId;
    use crate::registry::SpoofedStat;
    use crate::tags::Tag;
    use std::collections::HashMap;

    fn path(s: &str) -> SusPathname {
        SusPathname::new(s).unwrap()
    }

    struct MapResolver(HashMap<String, u64>);

    impl InodeResolver for MapResolver {
        fn resolve(&self, path: &SusPathname) -> Option<Ino> {
            self.0.get(path.as_str()).map(|&i| Ino(i))
        }
    }

    #[test]
    fn test_config_capabilities_reported() {
        let config = SusfsConfig {
            hide_symbols: true,
            magic_mount: true,
            ..Default::default()
        };
        let ctx = SusfsContext::new(&config).unwrap();
        let features = ctx.features();
        assert!(features.is_enabled(Feature::HideSymbols));
        assert!(features.is_enabled(Feature::MagicMount));
        assert!(!features.is_enabled(Feature::SusPath));
    }

    #[test]
    fn test_path_only_outside_storage_rejected() {
        let ctx = SusfsContext::default();
        let result = ctx.add_sus_path(SusPathEntry::new(Ino::NONE, path("/data/adb/ksu")));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(!ctx.features().is_enabled(Feature::SusPath));
    }

    #[test]
    fn test_path_only_follows_root_changes() {
        let ctx = SusfsContext::default();
        let entry = SusPathEntry::new(Ino::NONE, path("/storage/emulated/0/Android/data/x"));
        assert!(ctx.add_sus_path(entry.clone()).is_err());

        ctx.set_sdcard_root(path("/storage/emulated/0"));
        assert!(ctx.add_sus_path(entry).is_ok());
    }

    #[test]
    fn test_loop_batch_is_all_or_nothing() {
        let ctx = SusfsContext::default();
        let batch = vec![
            SusPathEntry::new(Ino(3), path("/data/local/tmp/frida")),
            SusPathEntry::new(Ino::NONE, path("/data/local/tmp/bad")),
        ];
        assert!(ctx.add_sus_path_loop(batch).is_err());
        assert!(ctx.sus_paths().is_empty());
        assert!(ctx.sus_paths().loop_paths().is_empty());
        assert!(ctx.tags().is_empty());
    }

    #[test]
    fn test_reapply_loop_picks_up_new_inode() {
        let ctx = SusfsContext::default();
        ctx.add_sus_path_loop(vec![SusPathEntry::new(Ino(3), path("/data/local/tmp/frida"))])
            .unwrap();

        let resolver = MapResolver(HashMap::from([("/data/local/tmp/frida".to_string(), 99)]));
        assert_eq!(ctx.reapply_sus_path_loop(&resolver), 1);
        assert!(ctx.sus_paths().contains(Ino(99)));
        assert!(ctx.tags().has_tag(Ino(99), Tag::Path));

        let empty = MapResolver(HashMap::new());
        assert_eq!(ctx.reapply_sus_path_loop(&empty), 0);
    }

    #[test]
    fn test_evict_drops_entries_and_tags() {
        let ctx = SusfsContext::default();
        ctx.add_sus_path(SusPathEntry::new(Ino(8), path("/system/xbin/su")))
            .unwrap();
        ctx.add_sus_kstat(SusKstat::new(
            Ino(8),
            path("/system/xbin/su"),
            SpoofedStat::default(),
        ))
        .unwrap();
        ctx.add_sus_mount(
            SusMountEntry::new(path("/system/xbin"), DevId(4)).with_root_ino(Ino(8)),
        );

        let dropped = ctx.on_inode_evicted(Ino(8));
        assert!(dropped.path && dropped.kstat && dropped.mount);
        assert!(ctx.tags().is_empty());
        assert!(ctx.sus_paths().get(Ino(8)).is_none());
        assert!(ctx.sus_kstats().get(Ino(8)).is_none());
        assert!(ctx.sus_mounts().matches("/system/xbin", DevId(4)));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let ctx = SusfsContext::default();
        assert!(matches!(ctx.remove_sus_path(Ino(1)), Err(Error::NotFound(_))));
        assert!(matches!(ctx.remove_sus_kstat(Ino(1)), Err(Error::NotFound(_))));
        assert!(matches!(
            ctx.remove_open_redirect(Ino(1)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_sus_su_feature_only_when_enabled() {
        let ctx = SusfsContext::default();
        ctx.set_sus_su_mode(SusSuMode::Disabled);
        assert!(!ctx.features().is_enabled(Feature::SusSu));
        ctx.set_sus_su_mode(SusSuMode::WithOverlay);
        assert!(ctx.features().is_enabled(Feature::SusSu));
        assert_eq!(ctx.sus_su_mode(), SusSuMode::WithOverlay);
    }

    #[test]
    fn test_evicting_resolved_inode_keeps_path_only_loop_entry() {
        let ctx = SusfsContext::default();
        let data = path("/sdcard/Android/data/com.topjohnwu.magisk");
        ctx.add_sus_path_loop(vec![SusPathEntry::new(Ino::NONE, data.clone())])
            .unwrap();

        let resolver = MapResolver(HashMap::from([(data.as_str().to_string(), 77)]));
        assert_eq!(ctx.reapply_sus_path_loop(&resolver), 1);
        assert!(ctx.sus_paths().contains(Ino(77)));

        ctx.on_inode_evicted(Ino(77));
        assert!(!ctx.sus_paths().contains(Ino(77)));
        assert!(ctx.sus_paths().covers_path(&data));
        assert_eq!(ctx.sus_paths().path_only(), vec![data]);
    }

    #[test]
    fn test_removing_inode_entry_keeps_path_only_entry() {
        let ctx = SusfsContext::default();
        let data = path("/sdcard/Android/data/com.x");
        ctx.add_sus_path(SusPathEntry::new(Ino::NONE, data.clone()))
            .unwrap();
        ctx.add_sus_path(SusPathEntry::new(Ino(5), data.clone()))
            .unwrap();

        ctx.remove_sus_path(Ino(5)).unwrap();
        assert!(ctx.sus_paths().covers_path(&data));
        assert!(ctx
            .sus_paths()
            .covers_path(&path("/sdcard/Android/data/com.x/files")));
    }
}
