//! Read-only HTTP(S) backend.
//!
//! Each open file is one GET. The driver never sees sockets: it talks to an
//! [`HttpTransport`] and owns the per-handle stream state on top of it.
//!
//! ```text
//!              open (body <= buffer_limit)
//!   GET ──┬──────────────────────────────▶ Buffered   (seekable)
//!         │ open (unknown or large body)
//!         └──────────────────────────────▶ Streaming ──read 0──▶ Exhausted
//!                                              │
//!                                              └─ transport error ─▶ Failed
//! ```
//!
//! A timeout mid-body is reported as `ETIMEDOUT` and leaves the stream as it
//! was, so the caller may retry the read. Any other transport failure is
//! reported as `EIO` and moves the handle to `Failed`, after which it only
//! answers `EIO`.
//!
//! Directory listings come from `GET <dir>/`, read as a plain-text index:
//! one entry per line, directories suffixed with `/`, optionally followed by
//! a tab and a decimal size.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use spdos_types::{DirEntry, FileAttr, OpenFlags, Whence};
use thiserror::Error;

use crate::error::{VfsError, VfsResult};
use crate::mount::{Credentials, MountRequest};
use crate::ops::{BackendHandle, BackendKind, BackendOps};
use crate::path::BackendPath;

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default largest body that is buffered (and therefore seekable).
pub const DEFAULT_BUFFER_LIMIT: usize = 16 * 1024;

/// Default largest directory index read by `opendir`.
pub const DEFAULT_INDEX_LIMIT: usize = 256 * 1024;

/// Tuning knobs for HTTPS mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpsOptions {
    /// Deadline for connecting and for each individual socket read.
    pub timeout: Duration,
    /// Bodies with a known length up to this size are read fully at open.
    pub buffer_limit: usize,
    /// Directory indexes larger than this fail with `EFBIG`.
    pub index_limit: usize,
}

impl Default for HttpsOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            index_limit: DEFAULT_INDEX_LIMIT,
        }
    }
}

/// A GET request as handed to the transport.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub credentials: Option<Credentials>,
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("url", &self.url)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

/// Failure below the HTTP status layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Deadline elapsed. The connection, if any, is still usable.
    #[error("timed out: {0}")]
    TimedOut(String),
    /// Could not reach the server.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Connection broke or the response was unreadable.
    #[error("transport I/O: {0}")]
    Io(String),
}

impl From<TransportError> for VfsError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::TimedOut(msg) => VfsError::TimedOut(msg),
            TransportError::Connect(msg) => VfsError::Transient(msg),
            TransportError::Io(msg) => VfsError::other(msg),
        }
    }
}

/// Response body. Dropping it releases the underlying connection.
pub trait HttpBody: Send {
    /// Read more body bytes. `Ok(0)` is end of body.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Status line, length and body of a response.
pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Box<dyn HttpBody>,
}

impl HttpResponse {
    /// True for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Something that can perform a blocking GET.
///
/// `timeout` bounds connecting and each read of the body, not the lifetime
/// of the response.
pub trait HttpTransport: Send {
    fn get(&mut self, request: &HttpRequest, timeout: Duration)
    -> Result<HttpResponse, TransportError>;
}

fn status_error(status: u16, url: &str) -> VfsError {
    match status {
        404 | 410 => VfsError::not_found(url),
        401 | 403 => VfsError::permission_denied(url),
        _ => VfsError::other(format!("HTTP {status} for {url}")),
    }
}

/// Parse a plain-text directory index.
pub fn parse_index(text: &str) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        let (name, size) = match line.split_once('\t') {
            Some((name, size)) => (name, size.trim().parse::<u64>().ok()),
            None => (line, None),
        };
        let (name, is_dir) = match name.strip_suffix('/') {
            Some(stripped) => (stripped, true),
            None => (name, false),
        };
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            continue;
        }
        let mut entry = if is_dir {
            DirEntry::directory(name)
        } else {
            DirEntry::file(name)
        };
        if let Some(size) = size {
            entry = entry.with_size(size);
        }
        entries.push(entry);
    }
    entries
}

/// Percent-encode a path segment, leaving RFC 3986 unreserved bytes alone.
fn encode_segment(segment: &str, out: &mut String) {
    for &b in segment.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
}

enum Stream {
    Buffered { data: Vec<u8>, pos: u64 },
    Streaming { body: Box<dyn HttpBody>, pos: u64 },
    Exhausted { pos: u64 },
    Failed,
}

impl Stream {
    fn position(&self) -> Option<u64> {
        match self {
            Stream::Buffered { pos, .. }
            | Stream::Streaming { pos, .. }
            | Stream::Exhausted { pos } => Some(*pos),
            Stream::Failed => None,
        }
    }
}

#[derive(Debug)]
struct DirCursor {
    entries: Vec<DirEntry>,
    next: usize,
}

/// HTTP(S) backend.
pub struct HttpsDriver {
    transport: Box<dyn HttpTransport>,
    scheme: &'static str,
    host: String,
    root: Vec<String>,
    credentials: Option<Credentials>,
    options: HttpsOptions,
    files: HashMap<u32, Stream>,
    dirs: HashMap<u32, DirCursor>,
    next_handle: u32,
}

impl fmt::Debug for HttpsDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpsDriver")
            .field("base", &self.base_url())
            .field("options", &self.options)
            .field("open_files", &self.files.len())
            .field("open_dirs", &self.dirs.len())
            .finish_non_exhaustive()
    }
}

impl HttpsDriver {
    /// Build a driver for `request`. No network traffic happens here.
    ///
    /// The scheme follows the protocol string (`http` stays plain, anything
    /// else is `https`). A hostname is required.
    pub fn new(
        request: &MountRequest,
        transport: Box<dyn HttpTransport>,
        options: HttpsOptions,
    ) -> VfsResult<Self> {
        let host = match request.hostname.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => host.trim_end_matches('/').to_string(),
            _ => return Err(VfsError::invalid_argument("https mount needs a hostname")),
        };
        let scheme = if request.protocol.eq_ignore_ascii_case("http") {
            "http"
        } else {
            "https"
        };
        let root = BackendPath::new(request.path.as_str())
            .contained()
            .ok_or_else(|| VfsError::invalid_path(request.path.clone()))?
            .into_iter()
            .map(str::to_owned)
            .collect();

        Ok(Self {
            transport,
            scheme,
            host,
            root,
            credentials: request.credentials.clone(),
            options,
            files: HashMap::new(),
            dirs: HashMap::new(),
            next_handle: 1,
        })
    }

    /// Number of open file and directory handles.
    pub fn open_handles(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    /// Root-relative components, rejecting paths that climb out of the root.
    fn full(&self, path: &BackendPath) -> VfsResult<Vec<String>> {
        let rel = path
            .contained()
            .ok_or_else(|| VfsError::invalid_path(path.to_string()))?;
        Ok(self
            .root
            .iter()
            .map(String::as_str)
            .chain(rel)
            .map(str::to_owned)
            .collect())
    }

    fn url(&self, parts: &[String], dir: bool) -> String {
        let mut url = self.base_url();
        for part in parts {
            url.push('/');
            encode_segment(part, &mut url);
        }
        if dir || parts.is_empty() {
            url.push('/');
        }
        url
    }

    /// GET `parts`, failing on any non-2xx status. The rejected response is
    /// dropped before returning, releasing its connection.
    fn fetch(&mut self, parts: &[String], dir: bool) -> VfsResult<HttpResponse> {
        let request = HttpRequest {
            url: self.url(parts, dir),
            credentials: self.credentials.clone(),
        };
        tracing::trace!(url = %request.url, "GET");
        let response = self.transport.get(&request, self.options.timeout)?;
        if !response.is_success() {
            let err = status_error(response.status, &request.url);
            drop(response);
            return Err(err);
        }
        Ok(response)
    }

    /// Read a whole body, failing with `EFBIG` once it passes `limit`.
    fn read_all(body: &mut dyn HttpBody, hint: usize, limit: usize) -> VfsResult<Vec<u8>> {
        let mut data = Vec::with_capacity(hint.min(limit));
        let mut chunk = [0u8; 1024];
        loop {
            let n = body.read(&mut chunk)?;
            if n == 0 {
                return Ok(data);
            }
            if data.len() + n > limit {
                return Err(VfsError::FileTooLarge {
                    size: (data.len() + n) as u64,
                    limit: limit as u64,
                });
            }
            data.extend_from_slice(&chunk[..n]);
        }
    }

    fn alloc_handle(&mut self) -> BackendHandle {
        loop {
            let id = self.next_handle;
            self.next_handle = self.next_handle.wrapping_add(1).max(1);
            if !self.files.contains_key(&id) && !self.dirs.contains_key(&id) {
                return BackendHandle(id);
            }
        }
    }

    fn stream(&mut self, handle: BackendHandle) -> VfsResult<&mut Stream> {
        self.files
            .get_mut(&handle.0)
            .ok_or_else(|| VfsError::bad_descriptor(format!("file handle {}", handle.0)))
    }
}

impl BackendOps for HttpsDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Https
    }

    fn open(&mut self, path: &BackendPath, flags: OpenFlags, _mode: u32) -> VfsResult<BackendHandle> {
        if flags.mutates() || flags.create {
            return Err(VfsError::ReadOnly);
        }
        let parts = self.full(path)?;
        if parts.is_empty() {
            return Err(VfsError::is_a_directory(path.to_string()));
        }

        let mut response = self.fetch(&parts, false)?;
        let limit = self.options.buffer_limit as u64;
        let stream = match response.content_length {
            Some(len) if len <= limit => {
                let data = Self::read_all(
                    response.body.as_mut(),
                    len as usize,
                    self.options.buffer_limit,
                )?;
                Stream::Buffered { data, pos: 0 }
            }
            _ => Stream::Streaming {
                body: response.body,
                pos: 0,
            },
        };

        let handle = self.alloc_handle();
        self.files.insert(handle.0, stream);
        Ok(handle)
    }

    fn close(&mut self, handle: BackendHandle) -> VfsResult<()> {
        self.files
            .remove(&handle.0)
            .map(|_| ())
            .ok_or_else(|| VfsError::bad_descriptor(format!("file handle {}", handle.0)))
    }

    fn read(&mut self, handle: BackendHandle, buf: &mut [u8]) -> VfsResult<usize> {
        let stream = self.stream(handle)?;
        match stream {
            Stream::Buffered { data, pos } => {
                let start = usize::try_from(*pos).unwrap_or(usize::MAX).min(data.len());
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                *pos += n as u64;
                Ok(n)
            }
            Stream::Streaming { body, pos } => match body.read(buf) {
                Ok(0) => {
                    let pos = *pos;
                    *stream = Stream::Exhausted { pos };
                    Ok(0)
                }
                Ok(n) => {
                    *pos += n as u64;
                    Ok(n)
                }
                Err(TransportError::TimedOut(msg)) => Err(VfsError::TimedOut(msg)),
                Err(e) => {
                    tracing::warn!(handle = handle.0, error = %e, "https stream failed");
                    *stream = Stream::Failed;
                    Err(VfsError::other(format!("https handle {}: {e}", handle.0)))
                }
            },
            Stream::Exhausted { .. } => Ok(0),
            Stream::Failed => Err(VfsError::Poisoned(format!("https handle {}", handle.0))),
        }
    }

    fn lseek(&mut self, handle: BackendHandle, pos: i64, whence: Whence) -> VfsResult<u64> {
        let stream = self.stream(handle)?;
        match stream {
            Stream::Buffered { data, pos: current } => {
                let target = whence
                    .apply(pos, *current, data.len() as u64)
                    .ok_or_else(|| VfsError::invalid_argument(format!("seek to {pos}")))?;
                *current = target;
                Ok(target)
            }
            Stream::Streaming { pos: current, .. } | Stream::Exhausted { pos: current } => {
                if whence == Whence::Cur && pos == 0 {
                    Ok(*current)
                } else {
                    Err(VfsError::IllegalSeek)
                }
            }
            Stream::Failed => Err(VfsError::Poisoned(format!("https handle {}", handle.0))),
        }
    }

    fn position(&self, handle: BackendHandle) -> Option<u64> {
        self.files.get(&handle.0).and_then(Stream::position)
    }

    fn stat(&mut self, path: &BackendPath) -> VfsResult<FileAttr> {
        let parts = self.full(path)?;
        if parts.is_empty() {
            return Ok(FileAttr::directory(0o555));
        }

        match self.fetch(&parts, false) {
            Ok(response) => Ok(FileAttr::file(response.content_length.unwrap_or(0), 0o444)),
            Err(VfsError::NotFound(_)) => {
                self.fetch(&parts, true)?;
                Ok(FileAttr::directory(0o555))
            }
            Err(e) => Err(e),
        }
    }

    fn opendir(&mut self, path: &BackendPath) -> VfsResult<BackendHandle> {
        let parts = self.full(path)?;
        let limit = self.options.index_limit;
        let mut response = self.fetch(&parts, true)?;
        let hint = match response.content_length {
            Some(len) if len > limit as u64 => {
                return Err(VfsError::FileTooLarge {
                    size: len,
                    limit: limit as u64,
                });
            }
            Some(len) => len as usize,
            None => 0,
        };
        let raw = Self::read_all(response.body.as_mut(), hint, limit)?;
        drop(response);

        let entries = parse_index(&String::from_utf8_lossy(&raw));
        let handle = self.alloc_handle();
        self.dirs.insert(handle.0, DirCursor { entries, next: 0 });
        Ok(handle)
    }

    fn readdir(&mut self, handle: BackendHandle) -> VfsResult<Option<DirEntry>> {
        let cursor = self
            .dirs
            .get_mut(&handle.0)
            .ok_or_else(|| VfsError::bad_descriptor(format!("dir handle {}", handle.0)))?;
        let entry = cursor.entries.get(cursor.next).cloned();
        if entry.is_some() {
            cursor.next += 1;
        }
        Ok(entry)
    }

    fn closedir(&mut self, handle: BackendHandle) -> VfsResult<()> {
        self.dirs
            .remove(&handle.0)
            .map(|_| ())
            .ok_or_else(|| VfsError::bad_descriptor(format!("dir handle {}", handle.0)))
    }

    fn shutdown(&mut self) {
        self.files.clear();
        self.dirs.clear();
    }
}
