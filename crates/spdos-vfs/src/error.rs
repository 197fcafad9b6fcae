//! VFS error types.

use std::io;

use spdos_types::{Errno, StatError};
use thiserror::Error;

/// VFS error type.
///
/// Every variant maps onto exactly one [`Errno`]; that code is what ABI
/// callers see.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Filesystem is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Invalid path (escapes root, embedded NUL, bad mount prefix).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid argument (bad index, bad flags, wrong handle kind).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Protocol string not in the registry.
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Mount slot occupied or otherwise busy.
    #[error("busy: {0}")]
    Busy(String),

    /// Nothing is mounted at the slot.
    #[error("mount point {0} is not mounted")]
    NotMounted(usize),

    /// Descriptor id not open, or access mode forbids the operation.
    #[error("bad descriptor: {0}")]
    BadDescriptor(String),

    /// Descriptor belonged to a mount that has since been unmounted.
    #[error("descriptor {0} refers to an unmounted filesystem")]
    Stale(i32),

    /// Descriptor table is full.
    #[error("too many open descriptors")]
    TooManyOpen,

    /// Backend does not implement the operation.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// Seek on a non-seekable stream.
    #[error("illegal seek")]
    IllegalSeek,

    /// Cross-device rename.
    #[error("cross-device link")]
    CrossDeviceLink,

    /// Write would take a file past `limit` bytes.
    #[error("file would grow to {size} bytes, limit is {limit}")]
    FileTooLarge { size: u64, limit: u64 },

    /// Backend could not allocate room for the data.
    #[error("no space left: {0}")]
    NoSpace(String),

    /// File name too long for the caller's buffer.
    #[error("file name too long")]
    NameTooLong,

    /// Backend deadline elapsed. Retryable.
    #[error("timed out: {0}")]
    TimedOut(String),

    /// Transient network failure. Retryable.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed or unexpected reply from a remote backend.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Descriptor unusable after an earlier protocol failure.
    #[error("descriptor unusable after earlier failure: {0}")]
    Poisoned(String),

    /// Errno reported verbatim by a remote backend.
    #[error("{context}: {errno}")]
    Remote { errno: Errno, context: String },

    /// A dispatcher call was made while another was still in flight.
    #[error("nested dispatch while a call is in flight")]
    Reentrant,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a BadDescriptor error.
    pub fn bad_descriptor(msg: impl Into<String>) -> Self {
        Self::BadDescriptor(msg.into())
    }

    /// Create a NotSupported error.
    pub fn not_supported(op: &'static str) -> Self {
        Self::NotSupported(op)
    }

    /// Create a Remote error carrying a server-side errno.
    pub fn remote(errno: Errno, context: impl Into<String>) -> Self {
        Self::Remote {
            errno,
            context: context.into(),
        }
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// The code returned to ABI callers.
    pub fn errno(&self) -> Errno {
        match self {
            VfsError::NotFound(_) => Errno::ENOENT,
            VfsError::AlreadyExists(_) => Errno::EEXIST,
            VfsError::PermissionDenied(_) => Errno::EACCES,
            VfsError::ReadOnly => Errno::EROFS,
            VfsError::NotADirectory(_) => Errno::ENOTDIR,
            VfsError::IsADirectory(_) => Errno::EISDIR,
            VfsError::DirectoryNotEmpty(_) => Errno::ENOTEMPTY,
            VfsError::InvalidPath(_) | VfsError::InvalidArgument(_) => Errno::EINVAL,
            VfsError::UnknownProtocol(_) => Errno::ENODEV,
            VfsError::Busy(_) | VfsError::Reentrant => Errno::EBUSY,
            VfsError::NotMounted(_) => Errno::ENOTMOUNTED,
            VfsError::BadDescriptor(_) | VfsError::Stale(_) => Errno::EBADF,
            VfsError::TooManyOpen => Errno::EMFILE,
            VfsError::NotSupported(_) => Errno::ENOSYS,
            VfsError::IllegalSeek => Errno::ESPIPE,
            VfsError::CrossDeviceLink => Errno::EXDEV,
            VfsError::NameTooLong => Errno::ENAMETOOLONG,
            VfsError::FileTooLarge { .. } => Errno::EFBIG,
            VfsError::NoSpace(_) => Errno::ENOSPC,
            VfsError::TimedOut(_) => Errno::ETIMEDOUT,
            VfsError::Transient(_) => Errno::EAGAIN,
            VfsError::Protocol(_) | VfsError::Poisoned(_) => Errno::EIO,
            VfsError::Remote { errno, .. } => *errno,
            VfsError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => Errno::ENOENT,
                io::ErrorKind::PermissionDenied => Errno::EACCES,
                io::ErrorKind::TimedOut => Errno::ETIMEDOUT,
                _ => Errno::EIO,
            },
            VfsError::Other(_) => Errno::EIO,
        }
    }

    /// The negative value returned to ABI callers.
    pub fn as_neg(&self) -> i32 {
        self.errno().as_neg()
    }

    /// True if the caller may retry the identical call.
    pub fn is_retryable(&self) -> bool {
        self.errno().is_retryable()
    }
}

impl From<StatError> for VfsError {
    fn from(e: StatError) -> Self {
        VfsError::InvalidArgument(e.to_string())
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Io(e) => e,
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::InvalidPath(msg) | VfsError::InvalidArgument(msg) => {
                io::Error::new(io::ErrorKind::InvalidInput, msg)
            }
            VfsError::TimedOut(msg) => io::Error::new(io::ErrorKind::TimedOut, msg),
            VfsError::NotSupported(op) => io::Error::new(io::ErrorKind::Unsupported, op),
            other => io::Error::other(other.to_string()),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
