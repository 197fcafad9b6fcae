//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use spdos_vfs::backends::{
    HttpBody, HttpRequest, HttpResponse, HttpTransport, HttpsDriver, TransportError,
};
use spdos_vfs::{
    BackendKind, BackendRegistry, Driver, DriverFactory, HttpsOptions, LoopbackConnector,
    MountRequest, NetFsOptions, Vfs, VfsResult,
};

/// Route test logs through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
struct FakeState {
    files: BTreeMap<String, Vec<u8>>,
    live: usize,
    requests: usize,
}

/// In-memory HTTP server. Every response holds a "connection" until its
/// body is dropped, so leaks show up in [`FakeHttp::live_connections`].
#[derive(Debug, Clone, Default)]
pub struct FakeHttp {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `data` at `/path`.
    pub fn serve(&self, path: &str, data: impl Into<Vec<u8>>) -> &Self {
        self.state
            .lock()
            .files
            .insert(path.trim_start_matches('/').to_string(), data.into());
        self
    }

    pub fn live_connections(&self) -> usize {
        self.state.lock().live
    }

    pub fn requests(&self) -> usize {
        self.state.lock().requests
    }

    fn index(files: &BTreeMap<String, Vec<u8>>, dir: &str) -> Option<Vec<u8>> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let mut lines = Vec::new();
        for (path, data) in files.range(prefix.clone()..) {
            let Some(rest) = path.strip_prefix(&prefix) else {
                break;
            };
            let line = match rest.split_once('/') {
                Some((sub, _)) => format!("{sub}/"),
                None => format!("{rest}\t{}", data.len()),
            };
            if lines.last() != Some(&line) {
                lines.push(line);
            }
        }
        if lines.is_empty() && !dir.is_empty() {
            return None;
        }
        Some(lines.join("\n").into_bytes())
    }
}

struct FakeBody {
    data: Vec<u8>,
    pos: usize,
    state: Arc<Mutex<FakeState>>,
}

impl HttpBody for FakeBody {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Drop for FakeBody {
    fn drop(&mut self) {
        self.state.lock().live -= 1;
    }
}

impl HttpTransport for FakeHttp {
    fn get(
        &mut self,
        request: &HttpRequest,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let path = request
            .url
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, path)| path.to_string())
            .unwrap_or_default();

        let mut state = self.state.lock();
        state.requests += 1;
        let found = match path.strip_suffix('/') {
            Some(dir) => Self::index(&state.files, dir),
            None if path.is_empty() => Self::index(&state.files, ""),
            None => state.files.get(&path).cloned(),
        };
        let (status, data) = match found {
            Some(data) => (200, data),
            None => (404, b"not found".to_vec()),
        };
        state.live += 1;
        drop(state);

        Ok(HttpResponse {
            status,
            content_length: Some(data.len() as u64),
            body: Box::new(FakeBody {
                data,
                pos: 0,
                state: self.state.clone(),
            }),
        })
    }
}

/// Builds HTTPS drivers over a shared [`FakeHttp`].
pub struct FakeHttpsFactory {
    pub http: FakeHttp,
    pub options: HttpsOptions,
}

impl DriverFactory for FakeHttpsFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Https
    }

    fn create(&self, request: &MountRequest) -> VfsResult<Driver> {
        Ok(Driver::Https(HttpsDriver::new(
            request,
            Box::new(self.http.clone()),
            self.options.clone(),
        )?))
    }
}

/// Registry with the local defaults, `https` served by `http`, and `tnfs`
/// served by `netfs`.
pub fn registry(http: &FakeHttp, netfs: &LoopbackConnector) -> BackendRegistry {
    let mut registry = BackendRegistry::default();
    registry.register(
        "https",
        FakeHttpsFactory {
            http: http.clone(),
            options: HttpsOptions::default(),
        },
    );
    registry.register_network_fs("tnfs", Arc::new(netfs.clone()), NetFsOptions::default());
    registry
}

/// Dispatcher over [`registry`].
pub fn vfs(http: &FakeHttp, netfs: &LoopbackConnector) -> Vfs {
    init_tracing();
    Vfs::with_registry(registry(http, netfs), 64)
}
