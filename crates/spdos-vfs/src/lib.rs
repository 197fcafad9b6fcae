//! # spdos-vfs
//!
//! Mount-point virtual filesystem dispatcher.
//!
//! One descriptor interface (`open/read/write/lseek/close`, directory
//! streams, namespace operations, `stat`) routed to whichever backend is
//! mounted in one of [`MAX_MOUNTS`] slots:
//!
//! - `ram`/`xfs`/`local`: a RAM-resident store shared by every local mount
//! - `https`/`http`: read-only files fetched over HTTP(S)
//! - any name registered with a [`SessionConnector`]: a network filesystem
//!
//! Paths may name a slot explicitly (`"1:games/boot.tap"`) or fall back to
//! the current mount point carried in a [`ResolveContext`]. The [`spdos`]
//! module wraps a process-wide [`Vfs`] in the integer, negative-errno ABI of
//! the SDK header.

pub mod backends;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod mount;
pub mod ops;
pub mod path;
pub mod registry;
pub mod spdos;
pub mod vfs;

pub use backends::{
    Driver, HttpTransport, HttpsOptions, LocalDriver, LoopbackConnector, NetFsOptions, RamStore,
    SessionConnector,
};
pub use config::{ConfigError, VfsConfig};
pub use descriptor::{DescriptorKind, Fd};
pub use error::{VfsError, VfsResult};
pub use mount::{Credentials, MAX_MOUNTS, MountInfo, MountRequest};
pub use ops::{BackendHandle, BackendKind, BackendOps};
pub use path::{BackendPath, ResolveContext};
pub use registry::{BackendRegistry, DriverFactory};
pub use vfs::Vfs;

pub use spdos_types::{
    DirEntry, Errno, FileAttr, FileType, OpenFlags, STAT_RECORD_LEN, StatRecord, Whence,
};
