//! The dispatcher.
//!
//! [`Vfs`] owns the registry, the mount table and the descriptor table, and
//! routes every call to the backend behind the right mount. Path operations
//! take an explicit [`ResolveContext`]; descriptor operations only need the
//! descriptor.
//!
//! Nothing here retries. A backend failure is reported on the call that hit
//! it and affects only that descriptor.

use spdos_types::{DirEntry, FileAttr, OpenFlags, StatRecord, Whence};

use crate::backends::Driver;
use crate::descriptor::{
    DEFAULT_MAX_DESCRIPTORS, DescriptorKind, DescriptorState, DescriptorTable, Fd,
};
use crate::error::{VfsError, VfsResult};
use crate::mount::{MountInfo, MountRequest, MountSlot, MountTable};
use crate::ops::{BackendHandle, BackendOps};
use crate::path::{PathResolver, ResolveContext, Resolved};
use crate::registry::BackendRegistry;

/// Mode used for directories created through [`Vfs::mkdir`].
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Mount-point VFS dispatcher.
#[derive(Debug)]
pub struct Vfs {
    registry: BackendRegistry,
    mounts: MountTable,
    descriptors: DescriptorTable,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// Dispatcher with the default protocols and descriptor limit.
    pub fn new() -> Self {
        Self::with_registry(BackendRegistry::default(), DEFAULT_MAX_DESCRIPTORS)
    }

    /// Dispatcher over `registry`. Slot 0 is bound to the registry's RAM
    /// store.
    pub fn with_registry(registry: BackendRegistry, max_descriptors: usize) -> Self {
        let mounts = MountTable::new(registry.root_driver());
        Self {
            registry,
            mounts,
            descriptors: DescriptorTable::new(max_descriptors),
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Mutable registry, for adding protocols after construction.
    pub fn registry_mut(&mut self) -> &mut BackendRegistry {
        &mut self.registry
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    // ========================================================================
    // Mounts
    // ========================================================================

    /// Mount a backend.
    ///
    /// Checks run in order: `EINVAL` for a bad index, `ENODEV` for an unknown
    /// protocol, `EBUSY` for an occupied slot. Driver construction errors
    /// come back unchanged.
    #[tracing::instrument(skip(self, request), name = "vfs.mount", fields(index = request.index, protocol = %request.protocol))]
    pub fn mount(&mut self, request: MountRequest) -> VfsResult<()> {
        MountTable::check_index(request.index)?;
        let factory = self.registry.lookup(&request.protocol)?;
        self.mounts.check_free(request.index)?;

        let driver = factory.create(&request)?;
        self.mounts.insert(MountSlot::from_request(&request, driver))?;
        tracing::info!(root = %request.path, host = ?request.hostname, "mounted");
        Ok(())
    }

    /// Unmount a slot.
    ///
    /// Every descriptor on the slot goes stale first; their backend handles
    /// are closed best-effort, then the driver is shut down.
    #[tracing::instrument(skip(self), name = "vfs.umount")]
    pub fn umount(&mut self, index: usize) -> VfsResult<()> {
        let mut slot = self.mounts.remove(index)?;

        for desc in self.descriptors.invalidate_mount(index) {
            let result = match desc.kind {
                DescriptorKind::File => slot.driver.close(desc.handle),
                DescriptorKind::Directory => slot.driver.closedir(desc.handle),
            };
            if let Err(e) = result {
                tracing::warn!(fd = desc.id, error = %e, "closing handle during umount failed");
            }
        }
        slot.driver.shutdown();
        tracing::info!(protocol = %slot.protocol, "unmounted");
        Ok(())
    }

    /// Fail unless `index` names an occupied slot.
    pub fn check_mount_point(&self, index: usize) -> VfsResult<()> {
        self.mounts.get(index).map(|_| ())
    }

    /// Context targeting `index`, once it is known to be mounted.
    pub fn setmountpoint(&self, index: usize) -> VfsResult<ResolveContext> {
        self.check_mount_point(index)?;
        Ok(ResolveContext::new(index))
    }

    /// Occupied slots.
    pub fn mounts(&self) -> Vec<MountInfo> {
        self.mounts.list()
    }

    /// Resolve an application path without touching any backend.
    pub fn resolve(&self, ctx: ResolveContext, path: &str) -> VfsResult<Resolved> {
        PathResolver::new(&self.mounts).resolve(ctx, path)
    }

    fn driver(&mut self, mount: usize) -> VfsResult<&mut Driver> {
        Ok(&mut self.mounts.get_mut(mount)?.driver)
    }

    /// Close a backend handle that never got a descriptor.
    fn abandon(&mut self, mount: usize, handle: BackendHandle, kind: DescriptorKind) {
        let result = self.driver(mount).and_then(|driver| match kind {
            DescriptorKind::File => driver.close(handle),
            DescriptorKind::Directory => driver.closedir(handle),
        });
        if let Err(e) = result {
            tracing::warn!(mount, handle = handle.0, error = %e, "closing unallocated handle failed");
        }
    }

    /// Poison `fd` if `result` is a protocol failure.
    fn track<T>(&mut self, fd: Fd, result: VfsResult<T>) -> VfsResult<T> {
        if let Err(VfsError::Protocol(_) | VfsError::Poisoned(_)) = &result {
            tracing::warn!(fd, "descriptor poisoned");
            self.descriptors.poison(fd);
        }
        result
    }

    /// Mirror the backend position into the descriptor after a transfer.
    fn advance(&mut self, fd: Fd, mount: usize, handle: BackendHandle, n: usize) {
        let pos = self
            .mounts
            .get(mount)
            .ok()
            .and_then(|slot| slot.driver.position(handle));
        if let Ok(desc) = self.descriptors.get_mut(fd, DescriptorKind::File) {
            desc.offset = pos.unwrap_or(desc.offset + n as u64);
        }
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Open a file.
    pub fn open(
        &mut self,
        ctx: ResolveContext,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Fd> {
        let resolved = self.resolve(ctx, path)?;
        if !self.descriptors.has_capacity() {
            return Err(VfsError::TooManyOpen);
        }

        let driver = self.driver(resolved.mount)?;
        let handle = driver.open(&resolved.path, flags, mode)?;
        match self
            .descriptors
            .allocate(resolved.mount, handle, flags, DescriptorKind::File)
        {
            Ok(fd) => {
                tracing::debug!(fd, mount = resolved.mount, path = %resolved.path, "open");
                Ok(fd)
            }
            Err(e) => {
                self.abandon(resolved.mount, handle, DescriptorKind::File);
                Err(e)
            }
        }
    }

    /// Close a file. The descriptor is released even if the backend fails.
    pub fn close(&mut self, fd: Fd) -> VfsResult<()> {
        let desc = self.descriptors.release(fd, DescriptorKind::File)?;
        tracing::debug!(fd, mount = desc.mount, "close");
        if desc.state == DescriptorState::Stale {
            return Ok(());
        }
        self.driver(desc.mount)?.close(desc.handle)
    }

    /// Read into `buf`. `Ok(0)` is end of file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> VfsResult<usize> {
        let desc = self.descriptors.get(fd, DescriptorKind::File)?;
        if !desc.flags.read {
            return Err(VfsError::bad_descriptor(format!("descriptor {fd} is write-only")));
        }
        let (mount, handle) = (desc.mount, desc.handle);

        let result = self.driver(mount)?.read(handle, buf);
        let n = self.track(fd, result)?;
        self.advance(fd, mount, handle, n);
        tracing::debug!(fd, mount, n, "read");
        Ok(n)
    }

    /// Write `buf`. May write fewer bytes than given.
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> VfsResult<usize> {
        let desc = self.descriptors.get(fd, DescriptorKind::File)?;
        if !desc.flags.write {
            return Err(VfsError::bad_descriptor(format!("descriptor {fd} is read-only")));
        }
        let (mount, handle) = (desc.mount, desc.handle);

        let result = self.driver(mount)?.write(handle, buf);
        let n = self.track(fd, result)?;
        self.advance(fd, mount, handle, n);
        tracing::debug!(fd, mount, n, "write");
        Ok(n)
    }

    /// Reposition a file, returning the new offset.
    pub fn lseek(&mut self, fd: Fd, pos: i64, whence: Whence) -> VfsResult<u64> {
        let desc = self.descriptors.get(fd, DescriptorKind::File)?;
        let (mount, handle) = (desc.mount, desc.handle);

        let result = self.driver(mount)?.lseek(handle, pos, whence);
        let offset = self.track(fd, result)?;
        self.descriptors.get_mut(fd, DescriptorKind::File)?.offset = offset;
        tracing::debug!(fd, mount, offset, "lseek");
        Ok(offset)
    }

    /// Current offset of a file.
    pub fn tell(&self, fd: Fd) -> VfsResult<u64> {
        Ok(self.descriptors.get(fd, DescriptorKind::File)?.offset)
    }

    // ========================================================================
    // Directories
    // ========================================================================

    /// Open a directory stream.
    pub fn opendir(&mut self, ctx: ResolveContext, path: &str) -> VfsResult<Fd> {
        let resolved = self.resolve(ctx, path)?;
        if !self.descriptors.has_capacity() {
            return Err(VfsError::TooManyOpen);
        }

        let handle = self.driver(resolved.mount)?.opendir(&resolved.path)?;
        match self.descriptors.allocate(
            resolved.mount,
            handle,
            OpenFlags::read(),
            DescriptorKind::Directory,
        ) {
            Ok(fd) => {
                tracing::debug!(fd, mount = resolved.mount, path = %resolved.path, "opendir");
                Ok(fd)
            }
            Err(e) => {
                self.abandon(resolved.mount, handle, DescriptorKind::Directory);
                Err(e)
            }
        }
    }

    /// Next entry, or `None` at the end of the stream.
    pub fn readdir(&mut self, fd: Fd) -> VfsResult<Option<DirEntry>> {
        let desc = self.descriptors.get(fd, DescriptorKind::Directory)?;
        let (mount, handle) = (desc.mount, desc.handle);
        let result = self.driver(mount)?.readdir(handle);
        self.track(fd, result)
    }

    /// Close a directory stream. Released even if the backend fails.
    pub fn closedir(&mut self, fd: Fd) -> VfsResult<()> {
        let desc = self.descriptors.release(fd, DescriptorKind::Directory)?;
        tracing::debug!(fd, mount = desc.mount, "closedir");
        if desc.state == DescriptorState::Stale {
            return Ok(());
        }
        self.driver(desc.mount)?.closedir(desc.handle)
    }

    // ========================================================================
    // Namespace
    // ========================================================================

    pub fn mkdir(&mut self, ctx: ResolveContext, path: &str) -> VfsResult<()> {
        let resolved = self.resolve(ctx, path)?;
        tracing::debug!(mount = resolved.mount, path = %resolved.path, "mkdir");
        self.driver(resolved.mount)?
            .mkdir(&resolved.path, DEFAULT_DIR_MODE)
    }

    pub fn rmdir(&mut self, ctx: ResolveContext, path: &str) -> VfsResult<()> {
        let resolved = self.resolve(ctx, path)?;
        tracing::debug!(mount = resolved.mount, path = %resolved.path, "rmdir");
        self.driver(resolved.mount)?.rmdir(&resolved.path)
    }

    pub fn unlink(&mut self, ctx: ResolveContext, path: &str) -> VfsResult<()> {
        let resolved = self.resolve(ctx, path)?;
        tracing::debug!(mount = resolved.mount, path = %resolved.path, "unlink");
        self.driver(resolved.mount)?.unlink(&resolved.path)
    }

    /// Rename within one mount. `EXDEV` if the paths resolve to different
    /// mounts.
    pub fn rename(&mut self, ctx: ResolveContext, from: &str, to: &str) -> VfsResult<()> {
        let from = self.resolve(ctx, from)?;
        let to = self.resolve(ctx, to)?;
        if from.mount != to.mount {
            return Err(VfsError::CrossDeviceLink);
        }
        tracing::debug!(mount = from.mount, from = %from.path, to = %to.path, "rename");
        self.driver(from.mount)?.rename(&from.path, &to.path)
    }

    /// Remove a file or an empty directory.
    pub fn remove(&mut self, ctx: ResolveContext, path: &str) -> VfsResult<()> {
        let resolved = self.resolve(ctx, path)?;
        let driver = self.driver(resolved.mount)?;
        if driver.stat(&resolved.path)?.is_dir() {
            driver.rmdir(&resolved.path)
        } else {
            driver.unlink(&resolved.path)
        }
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Backend attributes.
    pub fn attr(&mut self, ctx: ResolveContext, path: &str) -> VfsResult<FileAttr> {
        let resolved = self.resolve(ctx, path)?;
        self.driver(resolved.mount)?.stat(&resolved.path)
    }

    /// Attributes as a fixed-layout stat record.
    pub fn stat(&mut self, ctx: ResolveContext, path: &str) -> VfsResult<StatRecord> {
        let attr = self.attr(ctx, path)?;
        Ok(StatRecord::from(&attr))
    }

    pub fn isdir(&mut self, ctx: ResolveContext, path: &str) -> VfsResult<bool> {
        Ok(self.attr(ctx, path)?.is_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::LoopbackConnector;
    use crate::backends::NetFsOptions;
    use spdos_types::Errno;
    use std::sync::Arc;

    fn ctx() -> ResolveContext {
        ResolveContext::default()
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn write_file(vfs: &mut Vfs, path: &str, data: &[u8]) {
        let fd = vfs
            .open(ctx(), path, OpenFlags::create_truncate(), 0o644)
            .unwrap();
        assert_eq!(vfs.write(fd, data).unwrap(), data.len());
        vfs.close(fd).unwrap();
    }

    #[test]
    fn test_mount_error_order() {
        let mut vfs = Vfs::new();
        let err = vfs.mount(MountRequest::new(4, "gopher", "/")).unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
        let err = vfs.mount(MountRequest::new(0, "gopher", "/")).unwrap_err();
        assert_eq!(err.errno(), Errno::ENODEV);
        let err = vfs.mount(MountRequest::new(0, "ram", "/")).unwrap_err();
        assert_eq!(err.errno(), Errno::EBUSY);
        vfs.mount(MountRequest::new(1, "RAM", "/")).unwrap();
        assert_eq!(vfs.mounts().len(), 2);
    }

    #[test]
    fn test_umount_errors() {
        let mut vfs = Vfs::new();
        assert_eq!(vfs.umount(0).unwrap_err().errno(), Errno::EBUSY);
        assert_eq!(vfs.umount(2).unwrap_err().errno(), Errno::ENOTMOUNTED);
        assert_eq!(vfs.umount(8).unwrap_err().errno(), Errno::EINVAL);
    }

    #[test]
    fn test_setmountpoint_validates() {
        let mut vfs = Vfs::new();
        assert_eq!(vfs.setmountpoint(1).unwrap_err().errno(), Errno::ENOTMOUNTED);
        assert_eq!(vfs.setmountpoint(5).unwrap_err().errno(), Errno::EINVAL);
        vfs.mount(MountRequest::new(1, "ram", "/")).unwrap();
        assert_eq!(vfs.setmountpoint(1).unwrap(), ResolveContext::new(1));
    }

    #[test]
    fn test_offset_mirrored() {
        let mut vfs = Vfs::new();
        write_file(&mut vfs, "f", b"0123456789");
        let fd = vfs.open(ctx(), "f", OpenFlags::read(), 0).unwrap();
        let mut buf = [0u8; 4];
        vfs.read(fd, &mut buf).unwrap();
        assert_eq!(vfs.tell(fd).unwrap(), 4);
        assert_eq!(vfs.lseek(fd, -2, Whence::End).unwrap(), 8);
        assert_eq!(vfs.tell(fd).unwrap(), 8);
        vfs.close(fd).unwrap();
    }

    #[test]
    fn test_access_mode_checked_by_dispatcher() {
        let mut vfs = Vfs::new();
        write_file(&mut vfs, "f", b"x");
        let fd = vfs.open(ctx(), "f", OpenFlags::read(), 0).unwrap();
        assert_eq!(vfs.write(fd, b"y").unwrap_err().errno(), Errno::EBADF);
        vfs.close(fd).unwrap();
    }

    #[test]
    fn test_kind_mismatch() {
        let mut vfs = Vfs::new();
        write_file(&mut vfs, "f", b"x");
        let dir = vfs.opendir(ctx(), ".").unwrap();
        let file = vfs.open(ctx(), "f", OpenFlags::read(), 0).unwrap();

        assert_eq!(vfs.read(dir, &mut [0u8; 1]).unwrap_err().errno(), Errno::EINVAL);
        assert_eq!(vfs.readdir(file).unwrap_err().errno(), Errno::EINVAL);
        assert_eq!(vfs.close(dir).unwrap_err().errno(), Errno::EINVAL);
        assert_eq!(vfs.closedir(file).unwrap_err().errno(), Errno::EINVAL);

        vfs.closedir(dir).unwrap();
        vfs.close(file).unwrap();
        assert_eq!(vfs.close(file).unwrap_err().errno(), Errno::EBADF);
    }

    #[test]
    fn test_emfile_leaves_no_backend_handle() {
        let mut vfs = Vfs::with_registry(BackendRegistry::default(), 1);
        write_file(&mut vfs, "f", b"x");
        let fd = vfs.open(ctx(), "f", OpenFlags::read(), 0).unwrap();
        let err = vfs.open(ctx(), "f", OpenFlags::read(), 0).unwrap_err();
        assert_eq!(err.errno(), Errno::EMFILE);
        let err = vfs.opendir(ctx(), ".").unwrap_err();
        assert_eq!(err.errno(), Errno::EMFILE);
        vfs.close(fd).unwrap();
        assert!(vfs.opendir(ctx(), ".").is_ok());
    }

    #[test]
    fn test_rename_across_mounts() {
        let mut vfs = Vfs::new();
        vfs.mount(MountRequest::new(1, "ram", "/")).unwrap();
        write_file(&mut vfs, "f", b"x");
        let err = vfs.rename(ctx(), "f", "1:g").unwrap_err();
        assert_eq!(err.errno(), Errno::EXDEV);
        vfs.rename(ctx(), "f", "0:g").unwrap();
        assert!(!vfs.isdir(ctx(), "g").unwrap());
    }

    #[test]
    fn test_remove_file_or_directory() {
        let mut vfs = Vfs::new();
        vfs.mkdir(ctx(), "d").unwrap();
        write_file(&mut vfs, "f", b"x");
        vfs.remove(ctx(), "d").unwrap();
        vfs.remove(ctx(), "f").unwrap();
        assert_eq!(vfs.remove(ctx(), "f").unwrap_err().errno(), Errno::ENOENT);
    }

    #[test]
    fn test_umount_makes_descriptors_stale() {
        let mut vfs = Vfs::new();
        vfs.mount(MountRequest::new(1, "ram", "/")).unwrap();
        write_file(&mut vfs, "1:f", b"data");
        let fd = vfs.open(ctx(), "1:f", OpenFlags::read(), 0).unwrap();
        let dir = vfs.opendir(ctx(), "1:.").unwrap();

        vfs.umount(1).unwrap();
        assert_eq!(vfs.read(fd, &mut [0u8; 4]).unwrap_err().errno(), Errno::EBADF);
        assert_eq!(vfs.readdir(dir).unwrap_err().errno(), Errno::EBADF);

        vfs.mount(MountRequest::new(1, "ram", "/")).unwrap();
        assert_eq!(vfs.read(fd, &mut [0u8; 4]).unwrap_err().errno(), Errno::EBADF);

        vfs.close(fd).unwrap();
        vfs.closedir(dir).unwrap();
        assert!(vfs.descriptors().is_empty());
    }

    #[test]
    fn test_protocol_failure_poisons_only_that_descriptor() {
        let connector = LoopbackConnector::new();
        let mut registry = BackendRegistry::default();
        registry.register_network_fs("tnfs", Arc::new(connector.clone()), NetFsOptions::default());
        let mut vfs = Vfs::with_registry(registry, 8);
        vfs.mount(MountRequest::new(2, "tnfs", "/").with_hostname("loopback"))
            .unwrap();

        let bad = vfs.open(ctx(), "2:a", OpenFlags::create_truncate(), 0o644).unwrap();
        let good = vfs.open(ctx(), "2:b", OpenFlags::create_truncate(), 0o644).unwrap();

        connector.inject(crate::backends::Fault::Protocol);
        assert_eq!(vfs.write(bad, b"x").unwrap_err().errno(), Errno::EIO);
        assert_eq!(vfs.write(bad, b"x").unwrap_err().errno(), Errno::EIO);
        assert_eq!(vfs.write(good, b"ok").unwrap(), 2);

        vfs.close(bad).unwrap();
        vfs.close(good).unwrap();
    }

    #[test]
    fn test_abandoned_handle_failure_is_logged() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut vfs = Vfs::new();
            vfs.abandon(0, BackendHandle(999), DescriptorKind::File);
            vfs.abandon(0, BackendHandle(999), DescriptorKind::Directory);
        });

        let text = String::from_utf8_lossy(&logs.0.lock()).into_owned();
        assert_eq!(text.matches("closing unallocated handle failed").count(), 2);
        assert!(text.contains("handle=999"));
    }
}
