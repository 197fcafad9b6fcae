//! Local backend over the RAM store.
//!
//! All operations are relative to `root`. For example, if `root` is `games`,
//! then opening `"zx/boot.tap"` opens `games/zx/boot.tap` in the store.
//!
//! `..` never escapes the root: climbing above it stays at the root.

use std::collections::HashMap;

use spdos_types::{DirEntry, FileAttr, OpenFlags, Whence};

use super::memory::{Ino, SharedRamStore};
use crate::error::{VfsError, VfsResult};
use crate::ops::{BackendHandle, BackendKind, BackendOps};
use crate::path::BackendPath;

#[derive(Debug)]
struct OpenFile {
    ino: Ino,
    pos: u64,
    flags: OpenFlags,
}

#[derive(Debug)]
struct DirCursor {
    entries: Vec<DirEntry>,
    next: usize,
}

/// Local backend.
#[derive(Debug)]
pub struct LocalDriver {
    store: SharedRamStore,
    root: Vec<String>,
    files: HashMap<u32, OpenFile>,
    dirs: HashMap<u32, DirCursor>,
    next_handle: u32,
}

impl LocalDriver {
    /// Driver rooted at the top of `store`.
    pub fn at_root(store: SharedRamStore) -> Self {
        Self {
            store,
            root: Vec::new(),
            files: HashMap::new(),
            dirs: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Driver rooted at `root` inside `store`. The root must be an existing
    /// directory.
    pub fn new(store: SharedRamStore, root: &str) -> VfsResult<Self> {
        let parts: Vec<String> = BackendPath::new(root)
            .clamped()
            .into_iter()
            .map(str::to_owned)
            .collect();
        {
            let guard = store.lock();
            let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
            if !guard.stat(&refs)?.is_dir() {
                return Err(VfsError::not_a_directory(root));
            }
        }
        Ok(Self {
            root: parts,
            ..Self::at_root(store)
        })
    }

    /// Number of open file and directory handles.
    pub fn open_handles(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    fn full<'a>(&'a self, path: &'a BackendPath) -> Vec<&'a str> {
        let mut parts: Vec<&str> = self.root.iter().map(String::as_str).collect();
        parts.extend(path.clamped());
        parts
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

    fn file_mut(&mut self, handle: BackendHandle) -> VfsResult<&mut OpenFile> {
        self.files
            .get_mut(&handle.0)
            .ok_or_else(|| VfsError::bad_descriptor(format!("file handle {}", handle.0)))
    }
}

impl BackendOps for LocalDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn open(&mut self, path: &BackendPath, flags: OpenFlags, mode: u32) -> VfsResult<BackendHandle> {
        let ino = {
            let parts = self.full(path);
            let mut store = self.store.lock();
            let ino = match store.lookup(&parts) {
                Some(_) if flags.create && flags.exclusive => {
                    return Err(VfsError::already_exists(path.to_string()));
                }
                Some(ino) => {
                    if store.kind(ino)?.is_dir() {
                        return Err(VfsError::is_a_directory(path.to_string()));
                    }
                    if flags.truncate && flags.write {
                        store.truncate(ino, 0)?;
                    }
                    ino
                }
                None if flags.create || (flags.truncate && flags.write) => {
                    store.create_file(&parts, mode & 0o777)?
                }
                None => return Err(VfsError::not_found(path.to_string())),
            };
            store.retain(ino)?;
            ino
        };

        let handle = self.alloc_handle();
        self.files.insert(handle.0, OpenFile { ino, pos: 0, flags });
        Ok(handle)
    }

    fn close(&mut self, handle: BackendHandle) -> VfsResult<()> {
        let file = self
            .files
            .remove(&handle.0)
            .ok_or_else(|| VfsError::bad_descriptor(format!("file handle {}", handle.0)))?;
        self.store.lock().release(file.ino);
        Ok(())
    }

    fn read(&mut self, handle: BackendHandle, buf: &mut [u8]) -> VfsResult<usize> {
        let store = self.store.clone();
        let file = self.file_mut(handle)?;
        if !file.flags.read {
            return Err(VfsError::bad_descriptor("not open for reading"));
        }
        let n = store.lock().read_at(file.ino, file.pos, buf)?;
        file.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, handle: BackendHandle, buf: &[u8]) -> VfsResult<usize> {
        let store = self.store.clone();
        let file = self.file_mut(handle)?;
        if !file.flags.write {
            return Err(VfsError::bad_descriptor("not open for writing"));
        }
        let mut store = store.lock();
        if file.flags.append {
            file.pos = store.len(file.ino)?;
        }
        let n = store.write_at(file.ino, file.pos, buf)?;
        file.pos += n as u64;
        Ok(n)
    }

    fn lseek(&mut self, handle: BackendHandle, pos: i64, whence: Whence) -> VfsResult<u64> {
        let store = self.store.clone();
        let file = self.file_mut(handle)?;
        let len = store.lock().len(file.ino)?;
        let target = whence
            .apply(pos, file.pos, len)
            .ok_or_else(|| VfsError::invalid_argument(format!("seek to {pos} from {whence:?}")))?;
        file.pos = target;
        Ok(target)
    }

    fn position(&self, handle: BackendHandle) -> Option<u64> {
        self.files.get(&handle.0).map(|f| f.pos)
    }

    fn stat(&mut self, path: &BackendPath) -> VfsResult<FileAttr> {
        let parts = self.full(path);
        self.store.lock().stat(&parts)
    }

    fn opendir(&mut self, path: &BackendPath) -> VfsResult<BackendHandle> {
        let entries = {
            let parts = self.full(path);
            self.store.lock().children(&parts)?
        };
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

    fn mkdir(&mut self, path: &BackendPath, mode: u32) -> VfsResult<()> {
        let parts = self.full(path);
        self.store.lock().mkdir(&parts, mode & 0o777)
    }

    fn rmdir(&mut self, path: &BackendPath) -> VfsResult<()> {
        if path.clamped().is_empty() {
            return Err(VfsError::permission_denied("cannot remove mount root"));
        }
        let parts = self.full(path);
        self.store.lock().rmdir(&parts)
    }

    fn rename(&mut self, from: &BackendPath, to: &BackendPath) -> VfsResult<()> {
        if from.clamped().is_empty() || to.clamped().is_empty() {
            return Err(VfsError::permission_denied("cannot rename mount root"));
        }
        let from = self.full(from);
        let to = self.full(to);
        self.store.lock().rename(&from, &to)
    }

    fn unlink(&mut self, path: &BackendPath) -> VfsResult<()> {
        let parts = self.full(path);
        self.store.lock().unlink(&parts)
    }

    fn shutdown(&mut self) {
        let mut store = self.store.lock();
        for (_, file) in self.files.drain() {
            store.release(file.ino);
        }
        self.dirs.clear();
    }
}
