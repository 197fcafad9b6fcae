//! Backend capability interface.
//!
//! Every storage medium implements [`BackendOps`]. Operations a medium cannot
//! support fall through to the default methods and report `ENOSYS`, so the
//! dispatcher never has to ask whether an operation exists.
//!
//! Calls are blocking: a backend returns only once its operation completed,
//! failed, or hit its own deadline.

use std::str::FromStr;

use spdos_types::{DirEntry, FileAttr, OpenFlags, Whence};
use strum::EnumString;

use crate::error::{VfsError, VfsResult};
use crate::path::BackendPath;

/// Backend-private handle for an open file or directory stream.
///
/// Only meaningful to the backend that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendHandle(pub u32);

/// Which family of backend sits behind a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum BackendKind {
    /// RAM-resident store.
    #[strum(serialize = "local", serialize = "ram", serialize = "xfs")]
    Local,
    /// Read-only HTTP(S) fetch.
    #[strum(serialize = "https", serialize = "http")]
    Https,
    /// Request/response network filesystem.
    #[strum(serialize = "netfs", serialize = "tnfs")]
    NetworkFs,
}

impl BackendKind {
    /// Parse a protocol alias (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Https => "https",
            BackendKind::NetworkFs => "netfs",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Core backend operations.
///
/// Paths are always relative to the backend's root; the dispatcher handles
/// mount selection. Handles are private to the backend.
pub trait BackendOps {
    /// Which family this backend belongs to.
    fn kind(&self) -> BackendKind;

    // ========================================================================
    // Files
    // ========================================================================

    /// Open a file.
    fn open(&mut self, path: &BackendPath, flags: OpenFlags, mode: u32) -> VfsResult<BackendHandle>;

    /// Close a file handle, releasing whatever the backend holds for it.
    fn close(&mut self, handle: BackendHandle) -> VfsResult<()>;

    /// Read up to `buf.len()` bytes at the handle's position.
    ///
    /// May return fewer bytes than requested without that meaning end of
    /// stream; only `Ok(0)` does.
    fn read(&mut self, handle: BackendHandle, buf: &mut [u8]) -> VfsResult<usize>;

    /// Write `buf` at the handle's position. May write fewer bytes.
    fn write(&mut self, handle: BackendHandle, buf: &[u8]) -> VfsResult<usize> {
        let _ = (handle, buf);
        Err(VfsError::not_supported("write"))
    }

    /// Reposition the handle, returning the new offset.
    fn lseek(&mut self, handle: BackendHandle, pos: i64, whence: Whence) -> VfsResult<u64>;

    /// Current position, if the backend knows it without a round trip.
    fn position(&self, handle: BackendHandle) -> Option<u64> {
        let _ = handle;
        None
    }

    // ========================================================================
    // Metadata and directories
    // ========================================================================

    /// Get attributes.
    fn stat(&mut self, path: &BackendPath) -> VfsResult<FileAttr>;

    /// Open a directory stream.
    fn opendir(&mut self, path: &BackendPath) -> VfsResult<BackendHandle>;

    /// Next entry, or `None` once the stream is exhausted.
    fn readdir(&mut self, handle: BackendHandle) -> VfsResult<Option<DirEntry>>;

    /// Close a directory stream.
    fn closedir(&mut self, handle: BackendHandle) -> VfsResult<()>;

    // ========================================================================
    // Namespace changes
    // ========================================================================

    /// Create a directory.
    fn mkdir(&mut self, path: &BackendPath, mode: u32) -> VfsResult<()> {
        let _ = (path, mode);
        Err(VfsError::not_supported("mkdir"))
    }

    /// Remove an empty directory.
    fn rmdir(&mut self, path: &BackendPath) -> VfsResult<()> {
        let _ = path;
        Err(VfsError::not_supported("rmdir"))
    }

    /// Rename within this backend.
    fn rename(&mut self, from: &BackendPath, to: &BackendPath) -> VfsResult<()> {
        let _ = (from, to);
        Err(VfsError::not_supported("rename"))
    }

    /// Remove a file.
    fn unlink(&mut self, path: &BackendPath) -> VfsResult<()> {
        let _ = path;
        Err(VfsError::not_supported("unlink"))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Release everything: open handles, sessions, connections.
    ///
    /// Called once on unmount, after every descriptor has been closed.
    fn shutdown(&mut self) {}
}
