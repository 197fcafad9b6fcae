//! Storage backends.
//!
//! Backends implement [`BackendOps`] for different storage media. A mounted
//! backend is held as a [`Driver`], a closed set of variants the dispatcher
//! matches on.

mod https;
mod local;
pub mod loopback;
mod memory;
mod netfs;
mod ureq_transport;

pub use https::{
    DEFAULT_BUFFER_LIMIT, DEFAULT_INDEX_LIMIT, HttpBody, HttpRequest, HttpResponse, HttpTransport,
    HttpsDriver, HttpsOptions, TransportError, parse_index,
};
pub use local::LocalDriver;
pub use loopback::{Fault, LoopbackConnector};
pub use memory::{DEFAULT_MAX_FILE_SIZE, RamStore, SharedRamStore};
pub use netfs::{
    NetFsDriver, NetFsOptions, NetRequest, NetResponse, NetSession, SessionConnector,
    SessionError,
};
pub use ureq_transport::UreqTransport;

use spdos_types::{DirEntry, FileAttr, OpenFlags, Whence};

use crate::error::VfsResult;
use crate::ops::{BackendHandle, BackendKind, BackendOps};
use crate::path::BackendPath;

/// A mounted backend.
#[derive(Debug)]
pub enum Driver {
    Local(LocalDriver),
    Https(HttpsDriver),
    NetworkFs(NetFsDriver),
}

macro_rules! dispatch {
    ($self:ident, $d:ident => $call:expr) => {
        match $self {
            Driver::Local($d) => $call,
            Driver::Https($d) => $call,
            Driver::NetworkFs($d) => $call,
        }
    };
}

impl BackendOps for Driver {
    fn kind(&self) -> BackendKind {
        dispatch!(self, d => d.kind())
    }

    fn open(&mut self, path: &BackendPath, flags: OpenFlags, mode: u32) -> VfsResult<BackendHandle> {
        dispatch!(self, d => d.open(path, flags, mode))
    }

    fn close(&mut self, handle: BackendHandle) -> VfsResult<()> {
        dispatch!(self, d => d.close(handle))
    }

    fn read(&mut self, handle: BackendHandle, buf: &mut [u8]) -> VfsResult<usize> {
        dispatch!(self, d => d.read(handle, buf))
    }

    fn write(&mut self, handle: BackendHandle, buf: &[u8]) -> VfsResult<usize> {
        dispatch!(self, d => d.write(handle, buf))
    }

    fn lseek(&mut self, handle: BackendHandle, pos: i64, whence: Whence) -> VfsResult<u64> {
        dispatch!(self, d => d.lseek(handle, pos, whence))
    }

    fn position(&self, handle: BackendHandle) -> Option<u64> {
        dispatch!(self, d => d.position(handle))
    }

    fn stat(&mut self, path: &BackendPath) -> VfsResult<FileAttr> {
        dispatch!(self, d => d.stat(path))
    }

    fn opendir(&mut self, path: &BackendPath) -> VfsResult<BackendHandle> {
        dispatch!(self, d => d.opendir(path))
    }

    fn readdir(&mut self, handle: BackendHandle) -> VfsResult<Option<DirEntry>> {
        dispatch!(self, d => d.readdir(handle))
    }

    fn closedir(&mut self, handle: BackendHandle) -> VfsResult<()> {
        dispatch!(self, d => d.closedir(handle))
    }

    fn mkdir(&mut self, path: &BackendPath, mode: u32) -> VfsResult<()> {
        dispatch!(self, d => d.mkdir(path, mode))
    }

    fn rmdir(&mut self, path: &BackendPath) -> VfsResult<()> {
        dispatch!(self, d => d.rmdir(path))
    }

    fn rename(&mut self, from: &BackendPath, to: &BackendPath) -> VfsResult<()> {
        dispatch!(self, d => d.rename(from, to))
    }

    fn unlink(&mut self, path: &BackendPath) -> VfsResult<()> {
        dispatch!(self, d => d.unlink(path))
    }

    fn shutdown(&mut self) {
        dispatch!(self, d => d.shutdown())
    }
}
