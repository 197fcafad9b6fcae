//! In-process network filesystem server.
//!
//! [`LoopbackConnector`] answers [`NetRequest`]s from a RAM store, so the
//! network filesystem driver can be mounted and exercised without a network.
//! It can shorten transfers and inject failures to reproduce what a real
//! server over a lossy link does.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use spdos_types::{Errno, OpenFlags};

use super::local::LocalDriver;
use super::memory::{RamStore, SharedRamStore};
use super::netfs::{NetRequest, NetResponse, NetSession, SessionConnector, SessionError};
use crate::error::VfsError;
use crate::ops::{BackendHandle, BackendOps};
use crate::path::BackendPath;

/// Failure applied to the next request of any session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Request is lost; the caller sees a timeout.
    TimedOut,
    /// Request is dropped; the caller sees a transient error.
    Transient,
    /// Reply cannot be decoded.
    Protocol,
    /// Reply decodes but has the wrong shape for the request.
    Garbled,
}

#[derive(Debug)]
struct LoopbackState {
    store: SharedRamStore,
    max_transfer: Option<usize>,
    faults: VecDeque<Fault>,
    live: usize,
    refuse: bool,
}

/// Connector serving sessions from a RAM store.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    state: Arc<Mutex<LoopbackState>>,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnector {
    /// Serve a fresh, empty store.
    pub fn new() -> Self {
        Self::with_store(RamStore::shared())
    }

    /// Serve an existing store.
    pub fn with_store(store: SharedRamStore) -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopbackState {
                store,
                max_transfer: None,
                faults: VecDeque::new(),
                live: 0,
                refuse: false,
            })),
        }
    }

    /// Cap every read and write at `max` bytes.
    pub fn with_max_transfer(self, max: usize) -> Self {
        self.state.lock().max_transfer = Some(max.max(1));
        self
    }

    /// Refuse every connection attempt.
    pub fn refusing(self) -> Self {
        self.state.lock().refuse = true;
        self
    }

    /// Queue a fault for the next request.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Sessions connected and not yet dropped.
    pub fn live_sessions(&self) -> usize {
        self.state.lock().live
    }

    /// The store being served.
    pub fn store(&self) -> SharedRamStore {
        self.state.lock().store.clone()
    }
}

impl SessionConnector for LoopbackConnector {
    fn connect(&self, host: &str, _timeout: Duration) -> Result<Box<dyn NetSession>, SessionError> {
        let mut state = self.state.lock();
        if state.refuse {
            return Err(SessionError::Transient(format!("{host}: connection refused")));
        }
        state.live += 1;
        Ok(Box::new(LoopbackSession {
            state: self.state.clone(),
            driver: None,
        }))
    }
}

struct LoopbackSession {
    state: Arc<Mutex<LoopbackState>>,
    driver: Option<LocalDriver>,
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.shutdown();
        }
        let mut state = self.state.lock();
        state.live = state.live.saturating_sub(1);
    }
}

fn status(e: VfsError) -> SessionError {
    SessionError::Status(e.errno())
}

impl LoopbackSession {
    fn serve(&mut self, request: NetRequest, max: usize) -> Result<NetResponse, SessionError> {
        if let NetRequest::Mount { root, .. } = &request {
            let store = self.state.lock().store.clone();
            self.driver = Some(LocalDriver::new(store, root).map_err(status)?);
            return Ok(NetResponse::Ok);
        }

        let driver = self
            .driver
            .as_mut()
            .ok_or(SessionError::Status(Errno::EINVAL))?;
        let reply = match request {
            NetRequest::Mount { .. } => NetResponse::Ok,
            NetRequest::Umount => {
                driver.shutdown();
                self.driver = None;
                NetResponse::Ok
            }
            NetRequest::Open { path, flags, mode } => {
                let flags =
                    OpenFlags::from_bits(flags).ok_or(SessionError::Status(Errno::EINVAL))?;
                let handle = driver
                    .open(&BackendPath::new(path), flags, mode)
                    .map_err(status)?;
                NetResponse::Handle(handle.0)
            }
            NetRequest::Close { handle } => {
                driver.close(BackendHandle(handle)).map_err(status)?;
                NetResponse::Ok
            }
            NetRequest::Read { handle, len } => {
                let mut buf = vec![0u8; len.min(max)];
                let n = driver.read(BackendHandle(handle), &mut buf).map_err(status)?;
                buf.truncate(n);
                NetResponse::Data(buf)
            }
            NetRequest::Write { handle, data } => {
                let len = data.len().min(max);
                let n = driver
                    .write(BackendHandle(handle), &data[..len])
                    .map_err(status)?;
                NetResponse::Count(n)
            }
            NetRequest::Seek { handle, pos, whence } => {
                let offset = driver
                    .lseek(BackendHandle(handle), pos, whence)
                    .map_err(status)?;
                NetResponse::Offset(offset)
            }
            NetRequest::Stat { path } => {
                NetResponse::Attr(driver.stat(&BackendPath::new(path)).map_err(status)?)
            }
            NetRequest::OpenDir { path } => {
                let handle = driver.opendir(&BackendPath::new(path)).map_err(status)?;
                NetResponse::Handle(handle.0)
            }
            NetRequest::ReadDir { handle } => {
                NetResponse::Entry(driver.readdir(BackendHandle(handle)).map_err(status)?)
            }
            NetRequest::CloseDir { handle } => {
                driver.closedir(BackendHandle(handle)).map_err(status)?;
                NetResponse::Ok
            }
            NetRequest::Mkdir { path, mode } => {
                driver.mkdir(&BackendPath::new(path), mode).map_err(status)?;
                NetResponse::Ok
            }
            NetRequest::Rmdir { path } => {
                driver.rmdir(&BackendPath::new(path)).map_err(status)?;
                NetResponse::Ok
            }
            NetRequest::Unlink { path } => {
                driver.unlink(&BackendPath::new(path)).map_err(status)?;
                NetResponse::Ok
            }
            NetRequest::Rename { from, to } => {
                driver
                    .rename(&BackendPath::new(from), &BackendPath::new(to))
                    .map_err(status)?;
                NetResponse::Ok
            }
        };
        Ok(reply)
    }
}

impl NetSession for LoopbackSession {
    fn call(&mut self, request: NetRequest, _timeout: Duration) -> Result<NetResponse, SessionError> {
        let (fault, max) = {
            let mut state = self.state.lock();
            (state.faults.pop_front(), state.max_transfer.unwrap_or(usize::MAX))
        };
        match fault {
            Some(Fault::TimedOut) => Err(SessionError::TimedOut("no reply".into())),
            Some(Fault::Transient) => Err(SessionError::Transient("datagram dropped".into())),
            Some(Fault::Protocol) => Err(SessionError::Protocol("undecodable reply".into())),
            Some(Fault::Garbled) => Ok(match request {
                NetRequest::Open { .. } | NetRequest::OpenDir { .. } => {
                    NetResponse::Data(vec![0xFF])
                }
                _ => NetResponse::Handle(u32::MAX),
            }),
            None => self.serve(request, max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spdos_types::Whence;

    fn session(connector: &LoopbackConnector) -> Box<dyn NetSession> {
        let mut s = connector.connect("loopback", Duration::from_secs(1)).unwrap();
        let mount = NetRequest::Mount {
            root: ".".into(),
            credentials: None,
        };
        assert_eq!(s.call(mount, Duration::from_secs(1)).unwrap(), NetResponse::Ok);
        s
    }

    #[test]
    fn test_requests_before_mount_rejected() {
        let connector = LoopbackConnector::new();
        let mut s = connector.connect("loopback", Duration::from_secs(1)).unwrap();
        let err = s
            .call(NetRequest::Stat { path: ".".into() }, Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err, SessionError::Status(Errno::EINVAL));
    }

    #[test]
    fn test_mount_missing_root() {
        let connector = LoopbackConnector::new();
        let mut s = connector.connect("loopback", Duration::from_secs(1)).unwrap();
        let mount = NetRequest::Mount {
            root: "missing".into(),
            credentials: None,
        };
        assert_eq!(
            s.call(mount, Duration::from_secs(1)).unwrap_err(),
            SessionError::Status(Errno::ENOENT)
        );
    }

    #[test]
    fn test_max_transfer_shortens_reads() {
        let connector = LoopbackConnector::new().with_max_transfer(2);
        let mut s = session(&connector);
        let t = Duration::from_secs(1);

        let NetResponse::Handle(h) = s
            .call(
                NetRequest::Open {
                    path: "f".into(),
                    flags: OpenFlags::read_write().bits() | spdos_types::O_CREAT,
                    mode: 0o644,
                },
                t,
            )
            .unwrap()
        else {
            panic!("expected handle");
        };
        let written = s
            .call(
                NetRequest::Write {
                    handle: h,
                    data: b"hello".to_vec(),
                },
                t,
            )
            .unwrap();
        assert_eq!(written, NetResponse::Count(2));

        s.call(
            NetRequest::Seek {
                handle: h,
                pos: 0,
                whence: Whence::Set,
            },
            t,
        )
        .unwrap();
        let read = s.call(NetRequest::Read { handle: h, len: 100 }, t).unwrap();
        assert_eq!(read, NetResponse::Data(b"he".to_vec()));
    }

    #[test]
    fn test_faults_apply_once() {
        let connector = LoopbackConnector::new();
        let mut s = session(&connector);
        let t = Duration::from_secs(1);
        connector.inject(Fault::Protocol);
        assert!(matches!(
            s.call(NetRequest::Stat { path: ".".into() }, t),
            Err(SessionError::Protocol(_))
        ));
        assert!(matches!(
            s.call(NetRequest::Stat { path: ".".into() }, t),
            Ok(NetResponse::Attr(_))
        ));
    }

    #[test]
    fn test_sessions_counted() {
        let connector = LoopbackConnector::new();
        let a = session(&connector);
        let b = session(&connector);
        assert_eq!(connector.live_sessions(), 2);
        drop(a);
        drop(b);
        assert_eq!(connector.live_sessions(), 0);
    }
}
