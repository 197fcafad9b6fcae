//! Path resolution.
//!
//! An application path is either `"<digit>:rest"`, naming a mount slot
//! explicitly, or plain `rest`, which targets the current mount point of the
//! [`ResolveContext`]. `rest` is handed to the backend untouched, except that
//! `"."` and `""` mean the backend root.
//!
//! `..` is deliberately left alone here. Each backend decides what climbing
//! above its root means: the RAM store clamps, HTTPS rejects, and a network
//! filesystem lets its server decide.

use crate::error::{VfsError, VfsResult};
use crate::mount::{MAX_MOUNTS, MountTable};

/// Which mount a path without a prefix targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolveContext {
    /// Current mount point index.
    pub current_mount: usize,
}

impl ResolveContext {
    /// Context targeting `current_mount`.
    pub fn new(current_mount: usize) -> Self {
        Self { current_mount }
    }
}

/// A path relative to a backend's configured root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BackendPath(String);

impl BackendPath {
    /// The backend root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Wrap a backend-relative path, normalizing `"."` to the root.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        if path == "." {
            Self::root()
        } else {
            Self(path)
        }
    }

    /// True for the backend root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw relative path as passed by the caller.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path components with `.` and empty segments dropped and `..` popping,
    /// clamped so that climbing above the root stays at the root.
    pub fn clamped(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for seg in self.0.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    out.pop();
                }
                s => out.push(s),
            }
        }
        out
    }

    /// Like [`clamped`](Self::clamped), but returns `None` if `..` would
    /// climb above the root at any point.
    pub fn contained(&self) -> Option<Vec<&str>> {
        let mut out = Vec::new();
        for seg in self.0.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    out.pop()?;
                }
                s => out.push(s),
            }
        }
        Some(out)
    }
}

impl std::fmt::Display for BackendPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            f.write_str(".")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Result of resolving an application path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Target mount slot.
    pub mount: usize,
    /// Path relative to that mount's root.
    pub path: BackendPath,
    /// True if the path carried an explicit `"<digit>:"` prefix.
    pub explicit: bool,
}

/// Split an optional `"<digit>:"` prefix off `path`.
///
/// Only a single ASCII digit followed by `:` counts as a prefix; anything
/// else is part of the path.
pub fn split_mount_prefix(path: &str) -> (Option<usize>, &str) {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_digit() && bytes[1] == b':' {
        (Some(usize::from(bytes[0] - b'0')), &path[2..])
    } else {
        (None, path)
    }
}

/// Turns application paths into `(mount, backend path)` pairs.
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'a> {
    mounts: &'a MountTable,
}

impl<'a> PathResolver<'a> {
    /// Resolver over the given mount table.
    pub fn new(mounts: &'a MountTable) -> Self {
        Self { mounts }
    }

    /// Resolve `path` against `ctx`.
    ///
    /// Fails before any backend is touched: `EINVAL` for embedded NULs or an
    /// out-of-range index, `ENOTMOUNTED` if the target slot is empty.
    pub fn resolve(&self, ctx: ResolveContext, path: &str) -> VfsResult<Resolved> {
        if path.contains('\0') {
            return Err(VfsError::invalid_path(path.replace('\0', "\\0")));
        }

        let (prefix, rest) = split_mount_prefix(path);
        let mount = prefix.unwrap_or(ctx.current_mount);
        if mount >= MAX_MOUNTS {
            return Err(VfsError::invalid_argument(format!(
                "mount index {mount} out of range"
            )));
        }
        if !self.mounts.is_mounted(mount) {
            return Err(VfsError::NotMounted(mount));
        }

        Ok(Resolved {
            mount,
            path: BackendPath::new(rest),
            explicit: prefix.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Driver, LocalDriver, RamStore};
    use crate::mount::MountSlot;
    use spdos_types::Errno;

    fn table_with(slots: &[usize]) -> MountTable {
        let store = RamStore::shared();
        let mut table = MountTable::new(Driver::Local(LocalDriver::at_root(store.clone())));
        for &index in slots {
            let slot = MountSlot::new(
                index,
                "ram",
                "/",
                None,
                None,
                Driver::Local(LocalDriver::at_root(store.clone())),
            );
            table.insert(slot).unwrap();
        }
        table
    }

    #[test]
    fn test_split_prefix() {
        assert_eq!(split_mount_prefix("1:folder/file"), (Some(1), "folder/file"));
        assert_eq!(split_mount_prefix("0:"), (Some(0), ""));
        assert_eq!(split_mount_prefix("folder/file"), (None, "folder/file"));
        assert_eq!(split_mount_prefix("a:b"), (None, "a:b"));
        assert_eq!(split_mount_prefix("12:x"), (None, "12:x"));
        assert_eq!(split_mount_prefix("1"), (None, "1"));
    }

    #[test]
    fn test_explicit_prefix_ignores_current() {
        let table = table_with(&[1]);
        let resolver = PathResolver::new(&table);

        for current in [0, 1] {
            let r = resolver
                .resolve(ResolveContext::new(current), "1:folder/file")
                .unwrap();
            assert_eq!(r.mount, 1);
            assert_eq!(r.path.as_str(), "folder/file");
            assert!(r.explicit);
        }
    }

    #[test]
    fn test_implicit_uses_current() {
        let table = table_with(&[1]);
        let resolver = PathResolver::new(&table);

        let r = resolver.resolve(ResolveContext::new(0), "folder/file").unwrap();
        assert_eq!(r.mount, 0);
        let r = resolver.resolve(ResolveContext::new(1), "folder/file").unwrap();
        assert_eq!(r.mount, 1);
        assert!(!r.explicit);
    }

    #[test]
    fn test_dot_and_empty_are_root() {
        let table = table_with(&[]);
        let resolver = PathResolver::new(&table);
        let ctx = ResolveContext::default();

        assert!(resolver.resolve(ctx, ".").unwrap().path.is_root());
        assert!(resolver.resolve(ctx, "").unwrap().path.is_root());
        assert!(resolver.resolve(ctx, "0:.").unwrap().path.is_root());
        assert!(!resolver.resolve(ctx, "./x").unwrap().path.is_root());
    }

    #[test]
    fn test_resolution_errors() {
        let table = table_with(&[]);
        let resolver = PathResolver::new(&table);
        let ctx = ResolveContext::default();

        let err = resolver.resolve(ctx, "2:file").unwrap_err();
        assert_eq!(err.errno(), Errno::ENOTMOUNTED);

        let err = resolver.resolve(ctx, "7:file").unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);

        let err = resolver.resolve(ResolveContext::new(3), "file").unwrap_err();
        assert_eq!(err.errno(), Errno::ENOTMOUNTED);

        let err = resolver.resolve(ctx, "bad\0name").unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
    }

    #[test]
    fn test_dotdot_left_for_backends() {
        let table = table_with(&[]);
        let resolver = PathResolver::new(&table);
        let r = resolver.resolve(ResolveContext::default(), "../../etc").unwrap();
        assert_eq!(r.path.as_str(), "../../etc");

        assert_eq!(r.path.clamped(), vec!["etc"]);
        assert_eq!(r.path.contained(), None);
        assert_eq!(
            BackendPath::new("a/../b/./c").contained(),
            Some(vec!["b", "c"])
        );
    }
}
