//! Lookup engine: the read side called from VFS hook sites.
//!
//! Inode queries consult the tag store first and only touch a registry when
//! the tag is present, so untagged objects cost one sharded read.

use crate::context::SusfsContext;
use crate::logging::sus_log;
use crate::path::{Ino, SusPathname};
use crate::registry::{KStat, SpoofedStat, Utsname};
use crate::tags::Tag;
use std::borrow::Cow;
use std::sync::Arc;

/// Object whose visibility is being asked about.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Inode(Ino),
    Path(&'a SusPathname),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Read-only view over a [`SusfsContext`].
#[derive(Debug, Clone)]
pub struct LookupEngine {
    ctx: Arc<SusfsContext>,
}

impl LookupEngine {
    pub fn new(ctx: Arc<SusfsContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &SusfsContext {
        &self.ctx
    }

    /// Hidden iff a sus path covers the object.
    pub fn resolve_path_visibility(&self, target: Target<'_>) -> Visibility {
        let hidden = match target {
            Target::Inode(ino) => {
                self.ctx.tags().has_tag(ino, Tag::Path) && self.ctx.sus_paths().contains(ino)
            }
            Target::Path(path) => self.ctx.sus_paths().covers_path(path),
        };

        if hidden {
            sus_log!(self.ctx, debug, "hiding {:?}", target);
            Visibility::Hidden
        } else {
            Visibility::Visible
        }
    }

    /// Spoofed stat fields for a bound inode.
    pub fn resolve_kstat(&self, ino: Ino) -> Option<SpoofedStat> {
        if !self.ctx.tags().has_tag(ino, Tag::Kstat) {
            return None;
        }
        self.ctx.sus_kstats().get(ino)
    }

    /// Overlay spoofed fields onto a real stat result. Returns whether
    /// anything was replaced.
    pub fn apply_kstat(&self, ino: Ino, stat: &mut KStat) -> bool {
        match self.resolve_kstat(ino) {
            Some(spoofed) => {
                spoofed.apply(stat);
                sus_log!(self.ctx, debug, "spoofed kstat of ino {}", ino);
                true
            }
            None => false,
        }
    }

    /// Pathname to open instead of `ino`.
    pub fn resolve_open_redirect(&self, ino: Ino) -> Option<SusPathname> {
        if !self.ctx.tags().has_tag(ino, Tag::OpenRedirect) {
            return None;
        }
        let redirect = self.ctx.open_redirects().redirect_for(ino);
        if let Some(to) = &redirect {
            sus_log!(self.ctx, debug, "redirecting open of ino {} to '{}'", ino, to);
        }
        redirect
    }

    /// Whether the mount rooted at `ino` is a sus mount.
    pub fn resolve_mount_visibility(&self, ino: Ino) -> Visibility {
        if self.ctx.tags().has_tag(ino, Tag::Mount) && self.ctx.sus_mounts().has_root(ino) {
            Visibility::Hidden
        } else {
            Visibility::Visible
        }
    }

    /// Bind a pending static kstat entry once its inode is known.
    pub fn bind_static_kstat(&self, path: &SusPathname, real_ino: Ino) -> bool {
        self.ctx.bind_static_kstat(path, real_ino)
    }

    /// Version strings with the uname spoof applied.
    pub fn resolve_uname(&self, real: &Utsname) -> Utsname {
        match self.ctx.uname() {
            Some(spoof) => spoof.apply(real),
            None => real.clone(),
        }
    }

    /// `/proc/cmdline` or `/proc/bootconfig` content with the spoof applied.
    pub fn resolve_cmdline<'a>(&self, real: &'a [u8]) -> Cow<'a, [u8]> {
        match self.ctx.cmdline() {
            Some(fake) => Cow::Owned(fake.as_bytes().to_vec()),
            None => Cow::Borrowed(real),
        }
    }

    /// Whether AVC log spoofing is switched on.
    pub fn avc_log_spoofing(&self) -> bool {
        self.ctx.settings().avc_log_spoofing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{DevId, FakeCmdline};
    use crate::registry::{
        OpenRedirectEntry, SusKstat, SusMountEntry, SusPathEntry, UnameSpoof,
    };

    fn path(s: &str) -> SusPathname {
        SusPathname::new(s).unwrap()
    }

    fn engine() -> LookupEngine {
        LookupEngine::new(Arc::new(SusfsContext::default()))
    }

    #[test]
    fn test_visibility_by_inode() {
        let lookup = engine();
        lookup
            .context()
            .add_sus_path(SusPathEntry::new(Ino(77), path("/data/adb/ksud")))
            .unwrap();

        assert_eq!(
            lookup.resolve_path_visibility(Target::Inode(Ino(77))),
            Visibility::Hidden
        );
        assert_eq!(
            lookup.resolve_path_visibility(Target::Inode(Ino(78))),
            Visibility::Visible
        );
    }

    #[test]
    fn test_visibility_by_path_covers_children() {
        let lookup = engine();
        lookup
            .context()
            .add_sus_path(SusPathEntry::new(Ino(77), path("/data/adb")))
            .unwrap();

        let child = path("/data/adb/modules/zygisk");
        let sibling = path("/data/adbx");
        assert_eq!(
            lookup.resolve_path_visibility(Target::Path(&child)),
            Visibility::Hidden
        );
        assert_eq!(
            lookup.resolve_path_visibility(Target::Path(&sibling)),
            Visibility::Visible
        );
    }

    #[test]
    fn test_kstat_overlay() {
        let lookup = engine();
        let spoofed = SpoofedStat {
            ino: Ino(500),
            size: 4096,
            ..Default::default()
        };
        lookup
            .context()
            .add_sus_kstat(SusKstat::new(Ino(12), path("/system/lib/libx.so"), spoofed))
            .unwrap();

        let mut stat = KStat {
            ino: Ino(12),
            size: 1,
            mode: 0o100755,
            ..Default::default()
        };
        assert!(lookup.apply_kstat(Ino(12), &mut stat));
        assert_eq!(stat.ino, Ino(500));
        assert_eq!(stat.size, 4096);
        assert_eq!(stat.mode, 0o100755);

        let mut other = KStat::default();
        assert!(!lookup.apply_kstat(Ino(13), &mut other));
        assert_eq!(other, KStat::default());
    }

    #[test]
    fn test_open_redirect() {
        let lookup = engine();
        lookup
            .context()
            .add_open_redirect(OpenRedirectEntry {
                target_ino: Ino(30),
                target_pathname: path("/system/etc/hosts"),
                redirected_pathname: path("/data/adb/hosts"),
            })
            .unwrap();

        assert_eq!(
            lookup.resolve_open_redirect(Ino(30)),
            Some(path("/data/adb/hosts"))
        );
        assert_eq!(lookup.resolve_open_redirect(Ino(31)), None);
    }

    #[test]
    fn test_mount_visibility_by_root() {
        let lookup = engine();
        lookup.context().add_sus_mount(
            SusMountEntry::new(path("/debug_ramdisk"), DevId(7)).with_root_ino(Ino(2)),
        );
        assert_eq!(lookup.resolve_mount_visibility(Ino(2)), Visibility::Hidden);
        assert_eq!(lookup.resolve_mount_visibility(Ino(3)), Visibility::Visible);
    }

    #[test]
    fn test_uname_and_cmdline() {
        let lookup = engine();
        let real = Utsname {
            release: "5.15.0-ksu".to_string(),
            version: "#1".to_string(),
        };
        assert_eq!(lookup.resolve_uname(&real), real);
        assert_eq!(
            &*lookup.resolve_cmdline(b"androidboot.verifiedbootstate=orange"),
            b"androidboot.verifiedbootstate=orange"
        );

        lookup
            .context()
            .set_uname(UnameSpoof::new("5.15.0-stock", "default").unwrap());
        lookup
            .context()
            .set_cmdline(FakeCmdline::new("androidboot.verifiedbootstate=green").unwrap());

        let spoofed = lookup.resolve_uname(&real);
        assert_eq!(spoofed.release, "5.15.0-stock");
        assert_eq!(spoofed.version, "#1");
        assert_eq!(
            &*lookup.resolve_cmdline(b"androidboot.verifiedbootstate=orange"),
            b"androidboot.verifiedbootstate=green"
        );
    }
}
