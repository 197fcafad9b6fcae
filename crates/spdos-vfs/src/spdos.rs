//! Integer ABI.
//!
//! Free functions shaped like the SDK's C header: paths in, descriptor ids
//! and byte counts out, failures as negative errno values. They run against
//! one process-wide [`Vfs`] and one process-wide current mount point.
//!
//! Calls are not re-entrant. A call made while another is still in flight
//! (for example from inside a driver factory) fails with `-EBUSY`.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use spdos_types::{OpenFlags, STAT_RECORD_LEN, Whence};

use crate::descriptor::Fd;
use crate::error::{VfsError, VfsResult};
use crate::mount::{Credentials, MountRequest};
use crate::path::ResolveContext;
use crate::vfs::Vfs;

/// `readbyte` at end of file.
pub const EOF: i32 = -1;

/// `readdir` produced an entry.
pub const DIR_ENTRY: i32 = 0;

/// `readdir` reached the end of the stream.
pub const DIR_END: i32 = 1;

static VFS: Mutex<Option<Vfs>> = parking_lot::const_mutex(None);
static CURRENT_MOUNT: AtomicUsize = AtomicUsize::new(0);

fn with_vfs<T>(f: impl FnOnce(&mut Vfs) -> VfsResult<T>) -> VfsResult<T> {
    let mut guard = VFS.try_lock().ok_or(VfsError::Reentrant)?;
    f(guard.get_or_insert_with(Vfs::new))
}

fn ctx() -> ResolveContext {
    ResolveContext::new(CURRENT_MOUNT.load(Ordering::Relaxed))
}

fn status(result: VfsResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.as_neg(),
    }
}

fn value(result: VfsResult<i32>) -> i32 {
    result.unwrap_or_else(|e| e.as_neg())
}

fn count(result: VfsResult<usize>) -> isize {
    match result {
        Ok(n) => isize::try_from(n).unwrap_or(isize::MAX),
        Err(e) => e.as_neg() as isize,
    }
}

/// Replace the process-wide dispatcher and reset the current mount to 0.
///
/// Returns the previous dispatcher, if one had been created.
pub fn install(vfs: Vfs) -> VfsResult<Option<Vfs>> {
    let mut guard = VFS.try_lock().ok_or(VfsError::Reentrant)?;
    CURRENT_MOUNT.store(0, Ordering::Relaxed);
    Ok(guard.replace(vfs))
}

/// Run `f` against the process-wide dispatcher.
pub fn with<T>(f: impl FnOnce(&mut Vfs) -> VfsResult<T>) -> VfsResult<T> {
    with_vfs(f)
}

// ============================================================================
// Files
// ============================================================================

pub fn open(path: &str, flags: i32, mode: u32) -> i32 {
    let Some(flags) = OpenFlags::from_bits(flags) else {
        return VfsError::invalid_argument(format!("open flags {flags:#x}")).as_neg();
    };
    value(with_vfs(|vfs| vfs.open(ctx(), path, flags, mode)))
}

pub fn close(fd: Fd) -> i32 {
    status(with_vfs(|vfs| vfs.close(fd)))
}

pub fn read(fd: Fd, buf: &mut [u8]) -> isize {
    count(with_vfs(|vfs| vfs.read(fd, buf)))
}

pub fn write(fd: Fd, buf: &[u8]) -> isize {
    count(with_vfs(|vfs| vfs.write(fd, buf)))
}

/// One byte (0..=255), [`EOF`] at end of file, or a negative errno.
pub fn readbyte(fd: Fd) -> i32 {
    let mut byte = [0u8; 1];
    match with_vfs(|vfs| vfs.read(fd, &mut byte)) {
        Ok(0) => EOF,
        Ok(_) => i32::from(byte[0]),
        Err(e) => e.as_neg(),
    }
}

/// Write one byte. Returns the byte written, or a negative errno.
pub fn writebyte(fd: Fd, c: u8) -> i32 {
    match with_vfs(|vfs| vfs.write(fd, &[c])) {
        Ok(0) => VfsError::Transient(format!("descriptor {fd} accepted no bytes")).as_neg(),
        Ok(_) => i32::from(c),
        Err(e) => e.as_neg(),
    }
}

/// New offset, or a negative errno.
pub fn lseek(fd: Fd, pos: i64, whence: i32) -> i64 {
    let result = Whence::from_raw(whence)
        .ok_or_else(|| VfsError::invalid_argument(format!("whence {whence}")))
        .and_then(|whence| with_vfs(|vfs| vfs.lseek(fd, pos, whence)));
    match result {
        Ok(offset) => i64::try_from(offset).unwrap_or(i64::MAX),
        Err(e) => i64::from(e.as_neg()),
    }
}

// ============================================================================
// Directories
// ============================================================================

pub fn opendir(path: &str) -> i32 {
    value(with_vfs(|vfs| vfs.opendir(ctx(), path)))
}

/// Write the next entry's name into `buf`, NUL-terminated.
///
/// [`DIR_ENTRY`] if an entry was written, [`DIR_END`] at the end of the
/// stream, or a negative errno (`-ENAMETOOLONG` if the name plus its NUL does
/// not fit; that entry is consumed).
pub fn readdir(dh: Fd, buf: &mut [u8]) -> i32 {
    let result = with_vfs(|vfs| vfs.readdir(dh)).and_then(|entry| {
        let Some(entry) = entry else {
            return Ok(DIR_END);
        };
        let name = entry.name.as_bytes();
        if name.len() >= buf.len() {
            return Err(VfsError::NameTooLong);
        }
        buf[..name.len()].copy_from_slice(name);
        buf[name.len()] = 0;
        Ok(DIR_ENTRY)
    });
    value(result)
}

pub fn closedir(dh: Fd) -> i32 {
    status(with_vfs(|vfs| vfs.closedir(dh)))
}

// ============================================================================
// Namespace and metadata
// ============================================================================

pub fn mkdir(path: &str) -> i32 {
    status(with_vfs(|vfs| vfs.mkdir(ctx(), path)))
}

pub fn rmdir(path: &str) -> i32 {
    status(with_vfs(|vfs| vfs.rmdir(ctx(), path)))
}

pub fn rename(from: &str, to: &str) -> i32 {
    status(with_vfs(|vfs| vfs.rename(ctx(), from, to)))
}

pub fn unlink(path: &str) -> i32 {
    status(with_vfs(|vfs| vfs.unlink(ctx(), path)))
}

pub fn remove(path: &str) -> i32 {
    status(with_vfs(|vfs| vfs.remove(ctx(), path)))
}

/// Write a stat record into the first [`STAT_RECORD_LEN`] bytes of `buf`.
pub fn stat(path: &str, buf: &mut [u8]) -> i32 {
    if buf.len() < STAT_RECORD_LEN {
        return VfsError::invalid_argument("stat buffer too small").as_neg();
    }
    let record = match with_vfs(|vfs| vfs.stat(ctx(), path)) {
        Ok(record) => record,
        Err(e) => return e.as_neg(),
    };
    status(record.encode_into(buf).map_err(VfsError::from))
}

/// 1 for a directory, 0 for anything else, or a negative errno.
pub fn isdir(path: &str) -> i32 {
    value(with_vfs(|vfs| vfs.isdir(ctx(), path)).map(i32::from))
}

// ============================================================================
// Mounts
// ============================================================================

/// Mount a backend. Argument order follows the SDK header.
pub fn mount(
    index: i32,
    password: Option<&str>,
    user: Option<&str>,
    path: &str,
    hostname: Option<&str>,
    protocol: &str,
) -> i32 {
    let Ok(index) = usize::try_from(index) else {
        return VfsError::invalid_argument(format!("mount index {index}")).as_neg();
    };
    let request = MountRequest {
        index,
        protocol: protocol.to_string(),
        path: path.to_string(),
        hostname: hostname.map(str::to_string),
        credentials: Credentials::from_parts(user, password),
    };
    status(with_vfs(|vfs| vfs.mount(request)))
}

pub fn umount(index: i32) -> i32 {
    let Ok(index) = usize::try_from(index) else {
        return VfsError::invalid_argument(format!("mount index {index}")).as_neg();
    };
    status(with_vfs(|vfs| vfs.umount(index)))
}

/// Make `index` the mount used by paths without a prefix.
pub fn setmountpoint(index: i32) -> i32 {
    let Ok(index) = usize::try_from(index) else {
        return VfsError::invalid_argument(format!("mount index {index}")).as_neg();
    };
    status(with_vfs(|vfs| vfs.setmountpoint(index)).map(|ctx| {
        CURRENT_MOUNT.store(ctx.current_mount, Ordering::Relaxed);
    }))
}

pub fn getmountpoint() -> i32 {
    CURRENT_MOUNT.load(Ordering::Relaxed) as i32
}
