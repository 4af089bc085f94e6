//! Mount sweep engine.
//!
//! One sweep walks a single namespace snapshot through
//! `Scanning -> Deciding -> Acting -> Done`:
//!
//! - **Scanning** takes the snapshot; failing to read the namespace aborts
//!   the sweep.
//! - **Deciding** marks mounts matching a sus mount as hidden, either by
//!   pathname and device or by a tagged root inode, and schedules an unmount for every mount matching a try-umount
//!   pathname.
//! - **Acting** unmounts strictly in try-umount registration order. A failed
//!   unmount is counted and the sweep moves on.
//! - **Done** reports the counts.

use super::{MountHost, MountRecord};
use crate::context::SusfsContext;
use crate::error::{Error, Result};
use crate::logging::sus_log;
use crate::registry::UmountMode;
use crate::tags::Tag;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Who the sweep runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepScope {
    /// Explicit request from the control plane for its own namespace.
    CurrentNamespace,
    /// A freshly spawned app process.
    AppSpawn,
    /// An isolated service spawned by zygote.
    IsolatedServiceSpawn,
    /// A process granted root by the framework.
    SuProcess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepPhase {
    Scanning,
    Deciding,
    Acting,
    Done,
}

/// One unmount the sweep attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmountAttempt {
    pub mount_id: u64,
    pub pathname: String,
    pub mode: UmountMode,
    /// `None` on success.
    pub error: Option<String>,
}

/// Outcome of a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub phase: SweepPhase,
    /// Mounts left in the enumeration: neither hidden nor unmounted.
    pub visible: Vec<MountRecord>,
    pub hidden: usize,
    pub unmounted: usize,
    pub failed: usize,
    /// Unmount attempts in the order they were issued.
    pub attempts: Vec<UmountAttempt>,
}

/// Runs sweeps against a [`SusfsContext`].
#[derive(Debug, Clone)]
pub struct MountSweepEngine {
    ctx: Arc<SusfsContext>,
}

struct Plan {
    hidden: HashSet<u64>,
    umounts: Vec<(MountRecord, UmountMode)>,
}

impl MountSweepEngine {
    pub fn new(ctx: Arc<SusfsContext>) -> Self {
        Self { ctx }
    }

    /// Sweep the namespace exposed by `host`.
    pub fn sweep(&self, host: &dyn MountHost, scope: SweepScope) -> Result<SweepReport> {
        let mut phase = SweepPhase::Scanning;
        sus_log!(self.ctx, debug, "sweep {:?} on {}: {:?}", scope, host.name(), phase);

        let mounts = host.snapshot().map_err(Error::Namespace)?;

        phase = self.advance(phase, SweepPhase::Deciding);
        let plan = self.decide(&mounts, scope);

        phase = self.advance(phase, SweepPhase::Acting);
        let mut attempts = Vec::with_capacity(plan.umounts.len());
        let mut unmounted_ids = HashSet::new();
        for (mount, mode) in &plan.umounts {
            let error = match host.umount(mount, *mode) {
                Ok(()) => {
                    unmounted_ids.insert(mount.mount_id);
                    sus_log!(self.ctx, info, "umounted '{}' ({:?})", mount.pathname, mode);
                    None
                }
                Err(e) => {
                    sus_log!(self.ctx, warn, "failed to umount '{}': {}", mount.pathname, e);
                    Some(e.to_string())
                }
            };
            attempts.push(UmountAttempt {
                mount_id: mount.mount_id,
                pathname: mount.pathname.clone(),
                mode: *mode,
                error,
            });
        }

        phase = self.advance(phase, SweepPhase::Done);
        let unmounted = unmounted_ids.len();
        let failed = attempts.len() - unmounted;
        let visible = mounts
            .into_iter()
            .filter(|m| !plan.hidden.contains(&m.mount_id) && !unmounted_ids.contains(&m.mount_id))
            .collect();

        Ok(SweepReport {
            phase,
            visible,
            hidden: plan.hidden.len(),
            unmounted,
            failed,
            attempts,
        })
    }

    /// Only hide sus mounts from `mounts`, e.g. for a `/proc/mounts` read.
    pub fn filter_visible(&self, mounts: Vec<MountRecord>, scope: SweepScope) -> Vec<MountRecord> {
        if !self.hides_for(scope) {
            return mounts;
        }
        mounts.into_iter().filter(|m| !self.is_sus_mount(m)).collect()
    }

    fn is_sus_mount(&self, mount: &MountRecord) -> bool {
        let by_root = mount.root_ino.is_some_and(|ino| {
            self.ctx.tags().has_tag(ino, Tag::Mount) && self.ctx.sus_mounts().has_root(ino)
        });
        by_root || self.ctx.sus_mounts().matches(&mount.pathname, mount.dev)
    }

    fn advance(&self, from: SweepPhase, to: SweepPhase) -> SweepPhase {
        sus_log!(self.ctx, debug, "sweep {:?} -> {:?}", from, to);
        to
    }

    fn hides_for(&self, scope: SweepScope) -> bool {
        match scope {
            SweepScope::SuProcess => self.ctx.settings().hide_sus_mounts_for_all_procs,
            _ => true,
        }
    }

    fn umounts_for(&self, scope: SweepScope) -> bool {
        match scope {
            SweepScope::CurrentNamespace | SweepScope::AppSpawn => true,
            SweepScope::IsolatedServiceSpawn => self.ctx.settings().umount_for_zygote_iso_service,
            SweepScope::SuProcess => false,
        }
    }

    fn decide(&self, mounts: &[MountRecord], scope: SweepScope) -> Plan {
        let try_umounts = self.ctx.try_umounts().entries();

        let hidden = if self.hides_for(scope) {
            mounts
                .iter()
                .filter(|m| self.is_sus_mount(m))
                .map(|m| m.mount_id)
                .collect()
        } else {
            HashSet::new()
        };

        let mut umounts = Vec::new();
        if self.umounts_for(scope) {
            let mut scheduled = HashSet::new();
            for entry in &try_umounts {
                // Stacked mounts on one path come off top first.
                for mount in mounts
                    .iter()
                    .rev()
                    .filter(|m| m.pathname == entry.target_pathname.as_str())
                {
                    if scheduled.insert(mount.mount_id) {
                        umounts.push((mount.clone(), entry.mnt_mode));
                    }
                }
            }
        }

        Plan { hidden, umounts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{DevId, Ino, SusPathname};
    use crate::registry::{SusMountEntry, TryUmountEntry};
    use parking_lot::Mutex;
    use std::io;

    struct FakeHost {
        mounts: Vec<MountRecord>,
        busy: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeHost {
        fn new(mounts: Vec<MountRecord>) -> Self {
            Self {
                mounts,
                busy: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl MountHost for FakeHost {
        fn snapshot(&self) -> io::Result<Vec<MountRecord>> {
            Ok(self.mounts.clone())
        }

        fn umount(&self, mount: &MountRecord, _mode: UmountMode) -> io::Result<()> {
            self.calls.lock().push(mount.pathname.clone());
            if self.busy.contains(&mount.pathname) {
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    struct BrokenHost;

    impl MountHost for BrokenHost {
        fn snapshot(&self) -> io::Result<Vec<MountRecord>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "no mountinfo"))
        }

        fn umount(&self, _: &MountRecord, _: UmountMode) -> io::Result<()> {
            unreachable!("nothing to unmount")
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn path(s: &str) -> SusPathname {
        SusPathname::new(s).unwrap()
    }

    fn namespace() -> Vec<MountRecord> {
        vec![
            MountRecord::new(1, "/", DevId(1)),
            MountRecord::new(2, "/system/bin", DevId(3)),
            MountRecord::new(3, "/debug_ramdisk", DevId(7)),
            MountRecord::new(4, "/system/etc/hosts", DevId(3)),
        ]
    }

    #[test]
    fn test_hide_only() {
        let ctx = Arc::new(SusfsContext::default());
        ctx.add_sus_mount(SusMountEntry::new(path("/debug_ramdisk"), DevId(7)));

        let host = FakeHost::new(namespace());
        let report = MountSweepEngine::new(ctx)
            .sweep(&host, SweepScope::AppSpawn)
            .unwrap();

        assert_eq!(report.phase, SweepPhase::Done);
        assert_eq!(report.hidden, 1);
        assert_eq!(report.unmounted, 0);
        assert_eq!(report.failed, 0);
        assert!(report.visible.iter().all(|m| m.pathname != "/debug_ramdisk"));
        assert_eq!(report.visible.len(), 3);
        assert!(host.calls.lock().is_empty());
    }

    #[test]
    fn test_device_must_match_to_hide() {
        let ctx = Arc::new(SusfsContext::default());
        ctx.add_sus_mount(SusMountEntry::new(path("/debug_ramdisk"), DevId(8)));

        let host = FakeHost::new(namespace());
        let report = MountSweepEngine::new(ctx)
            .sweep(&host, SweepScope::AppSpawn)
            .unwrap();
        assert_eq!(report.hidden, 0);
        assert_eq!(report.visible.len(), 4);
    }

    #[test]
    fn test_umount_in_registration_order() {
        let ctx = Arc::new(SusfsContext::default());
        ctx.add_try_umount(TryUmountEntry::new(path("/system/etc/hosts"), UmountMode::Default));
        ctx.add_try_umount(TryUmountEntry::new(path("/debug_ramdisk"), UmountMode::Detach));
        ctx.add_try_umount(TryUmountEntry::new(path("/system/bin"), UmountMode::Default));

        let host = FakeHost::new(namespace());
        let report = MountSweepEngine::new(ctx)
            .sweep(&host, SweepScope::CurrentNamespace)
            .unwrap();

        assert_eq!(
            *host.calls.lock(),
            vec!["/system/etc/hosts", "/debug_ramdisk", "/system/bin"]
        );
        assert_eq!(report.unmounted, 3);
        assert_eq!(report.attempts[1].mode, UmountMode::Detach);
        assert_eq!(report.visible.len(), 1);
    }

    #[test]
    fn test_failed_umount_does_not_abort() {
        let ctx = Arc::new(SusfsContext::default());
        ctx.add_try_umount(TryUmountEntry::new(path("/system/bin"), UmountMode::Default));
        ctx.add_try_umount(TryUmountEntry::new(path("/debug_ramdisk"), UmountMode::Default));

        let mut host = FakeHost::new(namespace());
        host.busy.push("/system/bin".to_string());
        let report = MountSweepEngine::new(ctx)
            .sweep(&host, SweepScope::AppSpawn)
            .unwrap();

        assert_eq!(report.phase, SweepPhase::Done);
        assert_eq!(report.unmounted, 1);
        assert_eq!(report.failed, 1);
        assert!(report.attempts[0].error.is_some());
        assert!(report.attempts[1].error.is_none());
        assert!(report.visible.iter().any(|m| m.pathname == "/system/bin"));
    }

    #[test]
    fn test_stacked_mounts_acted_once_each() {
        let ctx = Arc::new(SusfsContext::default());
        ctx.add_try_umount(TryUmountEntry::new(path("/system/bin"), UmountMode::Default));

        let mut mounts = namespace();
        mounts.push(MountRecord::new(9, "/system/bin", DevId(30)));
        let host = FakeHost::new(mounts);
        let report = MountSweepEngine::new(ctx)
            .sweep(&host, SweepScope::AppSpawn)
            .unwrap();

        let ids: Vec<u64> = report.attempts.iter().map(|a| a.mount_id).collect();
        assert_eq!(ids, vec![9, 2]);
        assert_eq!(report.unmounted, 2);
    }

    #[test]
    fn test_hide_and_umount_are_independent() {
        let ctx = Arc::new(SusfsContext::default());
        ctx.add_sus_mount(SusMountEntry::new(path("/debug_ramdisk"), DevId(7)));
        ctx.add_try_umount(TryUmountEntry::new(path("/debug_ramdisk"), UmountMode::Detach));
        ctx.add_try_umount(TryUmountEntry::new(path("/system/bin"), UmountMode::Default));

        let host = FakeHost::new(namespace());
        let report = MountSweepEngine::new(ctx)
            .sweep(&host, SweepScope::AppSpawn)
            .unwrap();
        assert_eq!(report.hidden, 1);
        assert_eq!(report.unmounted, 2);
        assert_eq!(report.visible.len(), 2);
    }

    #[test]
    fn test_scope_rules() {
        let ctx = Arc::new(SusfsContext::default());
        ctx.add_sus_mount(SusMountEntry::new(path("/debug_ramdisk"), DevId(7)));
        ctx.add_try_umount(TryUmountEntry::new(path("/system/bin"), UmountMode::Default));
        let engine = MountSweepEngine::new(ctx.clone());

        let host = FakeHost::new(namespace());
        let report = engine.sweep(&host, SweepScope::IsolatedServiceSpawn).unwrap();
        assert_eq!(report.hidden, 1);
        assert_eq!(report.unmounted, 0);

        ctx.set_umount_for_zygote_iso_service(true);
        let report = engine.sweep(&host, SweepScope::IsolatedServiceSpawn).unwrap();
        assert_eq!(report.unmounted, 1);

        let report = engine.sweep(&host, SweepScope::SuProcess).unwrap();
        assert_eq!(report.hidden, 1);
        assert_eq!(report.unmounted, 0);

        ctx.set_hide_sus_mounts_for_all_procs(false);
        let report = engine.sweep(&host, SweepScope::SuProcess).unwrap();
        assert_eq!(report.hidden, 0);
    }

    #[test]
    fn test_scan_failure_aborts() {
        let ctx = Arc::new(SusfsContext::default());
        let result = MountSweepEngine::new(ctx).sweep(&BrokenHost, SweepScope::AppSpawn);
        assert!(matches!(result, Err(Error::Namespace(_))));
    }

    #[test]
    fn test_filter_visible() {
        let ctx = Arc::new(SusfsContext::default());
        ctx.add_sus_mount(SusMountEntry::new(path("/debug_ramdisk"), DevId(7)));
        let engine = MountSweepEngine::new(ctx);

        let visible = engine.filter_visible(namespace(), SweepScope::AppSpawn);
        assert_eq!(visible.len(), 3);
    }

    #[test]
    fn test_hidden_by_root_inode() {
        let ctx = Arc::new(SusfsContext::default());
        ctx.add_sus_mount(
            SusMountEntry::new(path("/mnt/vendor/ksu"), DevId(40)).with_root_ino(Ino(500)),
        );

        let mut mounts = namespace();
        mounts.push(MountRecord::new(5, "/system/lib/ksu", DevId(41)).with_root_ino(Ino(500)));
        mounts.push(MountRecord::new(6, "/system/lib/other", DevId(41)).with_root_ino(Ino(501)));
        let host = FakeHost::new(mounts.clone());
        let engine = MountSweepEngine::new(ctx.clone());

        let report = engine.sweep(&host, SweepScope::AppSpawn).unwrap();
        assert_eq!(report.hidden, 1);
        assert!(report.visible.iter().all(|m| m.mount_id != 5));
        assert_eq!(engine.filter_visible(mounts.clone(), SweepScope::AppSpawn).len(), 5);

        ctx.on_inode_evicted(Ino(500));
        let report = engine.sweep(&host, SweepScope::AppSpawn).unwrap();
        assert_eq!(report.hidden, 0);
        assert_eq!(engine.filter_visible(mounts, SweepScope::AppSpawn).len(), 6);
    }
}
