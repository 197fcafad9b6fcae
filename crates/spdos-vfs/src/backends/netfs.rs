//! Network filesystem backend.
//!
//! Every operation is one request/response round trip over a [`NetSession`].
//! The wire protocol lives behind that trait; this driver only maps handles
//! and classifies failures:
//!
//! | session failure      | errno               | handle afterwards |
//! |----------------------|---------------------|-------------------|
//! | timeout              | `ETIMEDOUT`         | untouched         |
//! | dropped / transient  | `EAGAIN`            | untouched         |
//! | server status        | as sent             | untouched         |
//! | malformed reply      | `EIO`               | poisoned          |
//!
//! A poisoned handle answers `EIO` to everything until it is closed.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use spdos_types::{DirEntry, Errno, FileAttr, OpenFlags, Whence};
use thiserror::Error;
use tracing::warn;

use crate::error::{VfsError, VfsResult};
use crate::mount::{Credentials, MountRequest};
use crate::ops::{BackendHandle, BackendKind, BackendOps};
use crate::path::BackendPath;

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tuning knobs for network filesystem mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetFsOptions {
    /// Deadline for each round trip.
    pub timeout: Duration,
}

impl Default for NetFsOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Request sent over a session. Handles are the server's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetRequest {
    Mount {
        root: String,
        credentials: Option<Credentials>,
    },
    Umount,
    Open {
        path: String,
        flags: i32,
        mode: u32,
    },
    Close {
        handle: u32,
    },
    Read {
        handle: u32,
        len: usize,
    },
    Write {
        handle: u32,
        data: Vec<u8>,
    },
    Seek {
        handle: u32,
        pos: i64,
        whence: Whence,
    },
    Stat {
        path: String,
    },
    OpenDir {
        path: String,
    },
    ReadDir {
        handle: u32,
    },
    CloseDir {
        handle: u32,
    },
    Mkdir {
        path: String,
        mode: u32,
    },
    Rmdir {
        path: String,
    },
    Unlink {
        path: String,
    },
    Rename {
        from: String,
        to: String,
    },
}

/// Successful reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetResponse {
    Ok,
    Handle(u32),
    Data(Vec<u8>),
    Count(usize),
    Offset(u64),
    Attr(FileAttr),
    Entry(Option<DirEntry>),
}

/// Failed round trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No reply within the deadline.
    #[error("timed out: {0}")]
    TimedOut(String),
    /// Request or reply lost; the session is still usable.
    #[error("transient: {0}")]
    Transient(String),
    /// Server rejected the request with an errno.
    #[error("server status {0}")]
    Status(Errno),
    /// Reply could not be understood.
    #[error("protocol: {0}")]
    Protocol(String),
}

impl SessionError {
    fn into_vfs(self, context: &str) -> VfsError {
        match self {
            SessionError::TimedOut(msg) => VfsError::TimedOut(format!("{context}: {msg}")),
            SessionError::Transient(msg) => VfsError::Transient(format!("{context}: {msg}")),
            SessionError::Status(errno) => VfsError::remote(errno, context),
            SessionError::Protocol(msg) => VfsError::Protocol(format!("{context}: {msg}")),
        }
    }
}

/// One connected session.
pub trait NetSession: Send {
    fn call(&mut self, request: NetRequest, timeout: Duration) -> Result<NetResponse, SessionError>;
}

/// Opens sessions to a host.
pub trait SessionConnector: Send + Sync {
    fn connect(&self, host: &str, timeout: Duration) -> Result<Box<dyn NetSession>, SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteKind {
    File,
    Directory,
}

#[derive(Debug)]
struct Remote {
    id: u32,
    kind: RemoteKind,
    pos: Option<u64>,
    append: bool,
    poisoned: bool,
}

/// Network filesystem backend.
pub struct NetFsDriver {
    session: Box<dyn NetSession>,
    host: String,
    options: NetFsOptions,
    handles: HashMap<u32, Remote>,
    next_handle: u32,
}

impl fmt::Debug for NetFsDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetFsDriver")
            .field("host", &self.host)
            .field("options", &self.options)
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

fn unexpected(op: &str, reply: &NetResponse) -> VfsError {
    VfsError::Protocol(format!("{op}: unexpected reply {reply:?}"))
}

impl NetFsDriver {
    /// Connect and mount `request.path` on `request.hostname`.
    #[tracing::instrument(skip(connector, request), name = "netfs.connect", fields(host = ?request.hostname, root = %request.path))]
    pub fn connect(
        request: &MountRequest,
        connector: &dyn SessionConnector,
        options: NetFsOptions,
    ) -> VfsResult<Self> {
        let host = match request.hostname.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                return Err(VfsError::invalid_argument(
                    "network filesystem mount needs a hostname",
                ));
            }
        };

        let mut session = connector
            .connect(&host, options.timeout)
            .map_err(|e| e.into_vfs("connect"))?;
        let mount = NetRequest::Mount {
            root: request.path.clone(),
            credentials: request.credentials.clone(),
        };
        match session.call(mount, options.timeout) {
            Ok(NetResponse::Ok) => {}
            Ok(other) => return Err(unexpected("mount", &other)),
            Err(e) => return Err(e.into_vfs("mount")),
        }

        Ok(Self {
            session,
            host,
            options,
            handles: HashMap::new(),
            next_handle: 1,
        })
    }

    /// Number of open handles, poisoned ones included.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn call(&mut self, op: &str, request: NetRequest) -> VfsResult<NetResponse> {
        self.session
            .call(request, self.options.timeout)
            .map_err(|e| e.into_vfs(op))
    }

    fn alloc(&mut self, remote: Remote) -> BackendHandle {
        loop {
            let id = self.next_handle;
            self.next_handle = self.next_handle.wrapping_add(1).max(1);
            if !self.handles.contains_key(&id) {
                self.handles.insert(id, remote);
                return BackendHandle(id);
            }
        }
    }

    /// Look up a live handle of the given kind.
    fn remote(&self, handle: BackendHandle, kind: RemoteKind) -> VfsResult<u32> {
        let remote = self
            .handles
            .get(&handle.0)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| VfsError::bad_descriptor(format!("netfs handle {}", handle.0)))?;
        if remote.poisoned {
            return Err(VfsError::Poisoned(format!("netfs handle {}", handle.0)));
        }
        Ok(remote.id)
    }

    fn poison(&mut self, handle: BackendHandle, err: &VfsError) {
        if let Some(remote) = self.handles.get_mut(&handle.0) {
            warn!(handle = handle.0, host = %self.host, error = %err, "poisoning netfs handle");
            remote.poisoned = true;
        }
    }

    /// Round trip on behalf of `handle`. Protocol failures poison it.
    fn call_on(
        &mut self,
        handle: BackendHandle,
        op: &str,
        request: NetRequest,
    ) -> VfsResult<NetResponse> {
        let result = self.call(op, request);
        if let Err(err @ VfsError::Protocol(_)) = &result {
            self.poison(handle, err);
        }
        result
    }

    /// Poison `handle` for a reply of the wrong shape and report it.
    fn reject(&mut self, handle: BackendHandle, op: &str, reply: &NetResponse) -> VfsError {
        let err = unexpected(op, reply);
        self.poison(handle, &err);
        err
    }

    fn close_remote(&mut self, handle: BackendHandle, kind: RemoteKind) -> VfsResult<()> {
        let remote = self
            .handles
            .get(&handle.0)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| VfsError::bad_descriptor(format!("netfs handle {}", handle.0)))?;
        let (id, poisoned) = (remote.id, remote.poisoned);
        self.handles.remove(&handle.0);

        let request = match kind {
            RemoteKind::File => NetRequest::Close { handle: id },
            RemoteKind::Directory => NetRequest::CloseDir { handle: id },
        };
        match self.call("close", request) {
            Ok(_) => Ok(()),
            Err(e) if poisoned => {
                warn!(handle = handle.0, error = %e, "close of poisoned handle failed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn expect_ok(&mut self, op: &str, request: NetRequest) -> VfsResult<()> {
        match self.call(op, request)? {
            NetResponse::Ok => Ok(()),
            other => Err(unexpected(op, &other)),
        }
    }
}

impl BackendOps for NetFsDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::NetworkFs
    }

    fn open(&mut self, path: &BackendPath, flags: OpenFlags, mode: u32) -> VfsResult<BackendHandle> {
        let request = NetRequest::Open {
            path: path.to_string(),
            flags: flags.bits(),
            mode,
        };
        match self.call("open", request)? {
            NetResponse::Handle(id) => Ok(self.alloc(Remote {
                id,
                kind: RemoteKind::File,
                pos: Some(0),
                append: flags.append,
                poisoned: false,
            })),
            other => Err(unexpected("open", &other)),
        }
    }

    fn close(&mut self, handle: BackendHandle) -> VfsResult<()> {
        self.close_remote(handle, RemoteKind::File)
    }

    fn read(&mut self, handle: BackendHandle, buf: &mut [u8]) -> VfsResult<usize> {
        let id = self.remote(handle, RemoteKind::File)?;
        let request = NetRequest::Read {
            handle: id,
            len: buf.len(),
        };
        match self.call_on(handle, "read", request)? {
            NetResponse::Data(data) if data.len() <= buf.len() => {
                buf[..data.len()].copy_from_slice(&data);
                if let Some(remote) = self.handles.get_mut(&handle.0) {
                    remote.pos = remote.pos.map(|p| p + data.len() as u64);
                }
                Ok(data.len())
            }
            other => Err(self.reject(handle, "read", &other)),
        }
    }

    fn write(&mut self, handle: BackendHandle, buf: &[u8]) -> VfsResult<usize> {
        let id = self.remote(handle, RemoteKind::File)?;
        let request = NetRequest::Write {
            handle: id,
            data: buf.to_vec(),
        };
        match self.call_on(handle, "write", request)? {
            NetResponse::Count(n) if n <= buf.len() => {
                if let Some(remote) = self.handles.get_mut(&handle.0) {
                    remote.pos = if remote.append {
                        None
                    } else {
                        remote.pos.map(|p| p + n as u64)
                    };
                }
                Ok(n)
            }
            other => Err(self.reject(handle, "write", &other)),
        }
    }

    fn lseek(&mut self, handle: BackendHandle, pos: i64, whence: Whence) -> VfsResult<u64> {
        let id = self.remote(handle, RemoteKind::File)?;
        let request = NetRequest::Seek {
            handle: id,
            pos,
            whence,
        };
        match self.call_on(handle, "lseek", request)? {
            NetResponse::Offset(offset) => {
                if let Some(remote) = self.handles.get_mut(&handle.0) {
                    remote.pos = Some(offset);
                }
                Ok(offset)
            }
            other => Err(self.reject(handle, "lseek", &other)),
        }
    }

    fn position(&self, handle: BackendHandle) -> Option<u64> {
        self.handles.get(&handle.0).and_then(|r| r.pos)
    }

    fn stat(&mut self, path: &BackendPath) -> VfsResult<FileAttr> {
        let request = NetRequest::Stat {
            path: path.to_string(),
        };
        match self.call("stat", request)? {
            NetResponse::Attr(attr) => Ok(attr),
            other => Err(unexpected("stat", &other)),
        }
    }

    fn opendir(&mut self, path: &BackendPath) -> VfsResult<BackendHandle> {
        let request = NetRequest::OpenDir {
            path: path.to_string(),
        };
        match self.call("opendir", request)? {
            NetResponse::Handle(id) => Ok(self.alloc(Remote {
                id,
                kind: RemoteKind::Directory,
                pos: None,
                append: false,
                poisoned: false,
            })),
            other => Err(unexpected("opendir", &other)),
        }
    }

    fn readdir(&mut self, handle: BackendHandle) -> VfsResult<Option<DirEntry>> {
        let id = self.remote(handle, RemoteKind::Directory)?;
        match self.call_on(handle, "readdir", NetRequest::ReadDir { handle: id })? {
            NetResponse::Entry(entry) => Ok(entry),
            other => Err(self.reject(handle, "readdir", &other)),
        }
    }

    fn closedir(&mut self, handle: BackendHandle) -> VfsResult<()> {
        self.close_remote(handle, RemoteKind::Directory)
    }

    fn mkdir(&mut self, path: &BackendPath, mode: u32) -> VfsResult<()> {
        self.expect_ok(
            "mkdir",
            NetRequest::Mkdir {
                path: path.to_string(),
                mode,
            },
        )
    }

    fn rmdir(&mut self, path: &BackendPath) -> VfsResult<()> {
        self.expect_ok(
            "rmdir",
            NetRequest::Rmdir {
                path: path.to_string(),
            },
        )
    }

    fn rename(&mut self, from: &BackendPath, to: &BackendPath) -> VfsResult<()> {
        self.expect_ok(
            "rename",
            NetRequest::Rename {
                from: from.to_string(),
                to: to.to_string(),
            },
        )
    }

    fn unlink(&mut self, path: &BackendPath) -> VfsResult<()> {
        self.expect_ok(
            "unlink",
            NetRequest::Unlink {
                path: path.to_string(),
            },
        )
    }

    fn shutdown(&mut self) {
        let open: Vec<(u32, RemoteKind)> = self.handles.iter().map(|(&h, r)| (h, r.kind)).collect();
        for (handle, kind) in open {
            if let Err(e) = self.close_remote(BackendHandle(handle), kind) {
                warn!(handle, error = %e, "netfs close during shutdown failed");
            }
        }
        if let Err(e) = self.call("umount", NetRequest::Umount) {
            warn!(host = %self.host, error = %e, "netfs umount failed");
        }
    }
}
