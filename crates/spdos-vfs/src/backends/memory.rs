//! RAM-resident store.
//!
//! One store can back several local mounts at different roots, so it lives
//! behind a shared lock and knows nothing about handles or mounts. Paths are
//! already-normalized component lists, `[]` being the store root.
//!
//! Files are inodes referenced from the path map. Unlinking removes the name;
//! the inode stays alive while any handle still has it open.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use spdos_types::{DirEntry, FileAttr, FileType};

use crate::error::{VfsError, VfsResult};

/// Store shared between local drivers.
pub type SharedRamStore = Arc<Mutex<RamStore>>;

/// Inode number.
pub type Ino = u64;

const ROOT_INO: Ino = 0;

/// Default per-file size limit.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Debug)]
struct Inode {
    kind: FileType,
    data: Vec<u8>,
    perm: u32,
    mtime: SystemTime,
    /// Still reachable through a path.
    linked: bool,
    /// Open handles.
    open: usize,
}

impl Inode {
    fn new(kind: FileType, perm: u32) -> Self {
        Self {
            kind,
            data: Vec::new(),
            perm,
            mtime: SystemTime::now(),
            linked: true,
            open: 0,
        }
    }

    fn attr(&self) -> FileAttr {
        let attr = match self.kind {
            FileType::File => FileAttr::file(self.data.len() as u64, self.perm),
            FileType::Directory => FileAttr::directory(self.perm),
        };
        attr.with_mtime(self.mtime)
    }
}

/// In-memory filesystem tree.
#[derive(Debug)]
pub struct RamStore {
    /// Joined path (`"a/b"`, root is `""`) to inode.
    paths: BTreeMap<String, Ino>,
    inodes: HashMap<Ino, Inode>,
    next_ino: Ino,
    max_file_size: u64,
}

impl Default for RamStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RamStore {
    /// Create a new empty store containing only the root directory.
    pub fn new() -> Self {
        let mut paths = BTreeMap::new();
        let mut inodes = HashMap::new();
        paths.insert(String::new(), ROOT_INO);
        inodes.insert(ROOT_INO, Inode::new(FileType::Directory, 0o755));
        Self {
            paths,
            inodes,
            next_ino: ROOT_INO + 1,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Largest size a file may grow to.
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn set_max_file_size(&mut self, limit: u64) {
        self.max_file_size = limit;
    }

    /// Create a new empty store wrapped for sharing.
    pub fn shared() -> SharedRamStore {
        Arc::new(Mutex::new(Self::new()))
    }

    fn join(parts: &[&str]) -> String {
        parts.join("/")
    }

    fn children_prefix(key: &str) -> String {
        if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        }
    }

    /// Look up a path.
    pub fn lookup(&self, parts: &[&str]) -> Option<Ino> {
        self.paths.get(&Self::join(parts)).copied()
    }

    fn inode(&self, ino: Ino) -> VfsResult<&Inode> {
        self.inodes
            .get(&ino)
            .ok_or_else(|| VfsError::other(format!("dangling inode {ino}")))
    }

    fn inode_mut(&mut self, ino: Ino) -> VfsResult<&mut Inode> {
        self.inodes
            .get_mut(&ino)
            .ok_or_else(|| VfsError::other(format!("dangling inode {ino}")))
    }

    fn alloc(&mut self, kind: FileType, perm: u32) -> Ino {
        let ino = self.next_ino;
        self.next_ino += 1;
        self.inodes.insert(ino, Inode::new(kind, perm));
        ino
    }

    /// Attributes of an inode.
    pub fn attr(&self, ino: Ino) -> VfsResult<FileAttr> {
        Ok(self.inode(ino)?.attr())
    }

    /// Kind of an inode.
    pub fn kind(&self, ino: Ino) -> VfsResult<FileType> {
        Ok(self.inode(ino)?.kind)
    }

    /// Attributes at a path.
    pub fn stat(&self, parts: &[&str]) -> VfsResult<FileAttr> {
        let ino = self
            .lookup(parts)
            .ok_or_else(|| VfsError::not_found(Self::join(parts)))?;
        self.attr(ino)
    }

    /// Fail unless the parent of `parts` exists and is a directory.
    fn check_parent(&self, parts: &[&str]) -> VfsResult<()> {
        let Some((_, parent)) = parts.split_last() else {
            return Err(VfsError::already_exists("/"));
        };
        match self.lookup(parent) {
            Some(ino) if self.kind(ino)?.is_dir() => Ok(()),
            Some(_) => Err(VfsError::not_a_directory(Self::join(parent))),
            None => Err(VfsError::not_found(Self::join(parent))),
        }
    }

    /// Create an empty regular file. The parent must exist.
    pub fn create_file(&mut self, parts: &[&str], perm: u32) -> VfsResult<Ino> {
        self.check_parent(parts)?;
        let key = Self::join(parts);
        if self.paths.contains_key(&key) {
            return Err(VfsError::already_exists(key));
        }
        let ino = self.alloc(FileType::File, perm);
        self.paths.insert(key, ino);
        Ok(ino)
    }

    /// Create a directory. The parent must exist.
    pub fn mkdir(&mut self, parts: &[&str], perm: u32) -> VfsResult<()> {
        self.check_parent(parts)?;
        let key = Self::join(parts);
        if self.paths.contains_key(&key) {
            return Err(VfsError::already_exists(key));
        }
        let ino = self.alloc(FileType::Directory, perm);
        self.paths.insert(key, ino);
        Ok(())
    }

    fn has_children(&self, key: &str) -> bool {
        let prefix = Self::children_prefix(key);
        self.paths
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .any(|(k, _)| !k.is_empty())
    }

    /// Direct children of a directory, sorted by name.
    pub fn children(&self, parts: &[&str]) -> VfsResult<Vec<DirEntry>> {
        let key = Self::join(parts);
        let ino = self
            .paths
            .get(&key)
            .copied()
            .ok_or_else(|| VfsError::not_found(key.clone()))?;
        if !self.kind(ino)?.is_dir() {
            return Err(VfsError::not_a_directory(key));
        }

        let prefix = Self::children_prefix(&key);
        let mut entries = Vec::new();
        for (path, &child) in self.paths.range(prefix.clone()..) {
            if !path.starts_with(&prefix) {
                break;
            }
            let name = &path[prefix.len()..];
            if name.is_empty() || name.contains('/') {
                continue;
            }
            let node = self.inode(child)?;
            let mut entry = DirEntry::new(name, node.kind);
            if node.kind.is_file() {
                entry = entry.with_size(node.data.len() as u64);
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Remove an empty directory.
    pub fn rmdir(&mut self, parts: &[&str]) -> VfsResult<()> {
        if parts.is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        let key = Self::join(parts);
        let ino = self
            .paths
            .get(&key)
            .copied()
            .ok_or_else(|| VfsError::not_found(key.clone()))?;
        if !self.kind(ino)?.is_dir() {
            return Err(VfsError::not_a_directory(key));
        }
        if self.has_children(&key) {
            return Err(VfsError::directory_not_empty(key));
        }
        self.paths.remove(&key);
        self.inodes.remove(&ino);
        Ok(())
    }

    /// Remove a file name. Open handles keep the data alive.
    pub fn unlink(&mut self, parts: &[&str]) -> VfsResult<()> {
        let key = Self::join(parts);
        let ino = self
            .paths
            .get(&key)
            .copied()
            .ok_or_else(|| VfsError::not_found(key.clone()))?;
        if self.kind(ino)?.is_dir() {
            return Err(VfsError::is_a_directory(key));
        }
        self.paths.remove(&key);
        let node = self.inode_mut(ino)?;
        node.linked = false;
        if node.open == 0 {
            self.inodes.remove(&ino);
        }
        Ok(())
    }

    /// Rename a file or directory, replacing a compatible destination.
    pub fn rename(&mut self, from: &[&str], to: &[&str]) -> VfsResult<()> {
        if from.is_empty() || to.is_empty() {
            return Err(VfsError::permission_denied("cannot rename root"));
        }
        let from_key = Self::join(from);
        let to_key = Self::join(to);
        let ino = self
            .paths
            .get(&from_key)
            .copied()
            .ok_or_else(|| VfsError::not_found(from_key.clone()))?;
        if from_key == to_key {
            return Ok(());
        }
        self.check_parent(to)?;

        let moving_dir = self.kind(ino)?.is_dir();
        if moving_dir && to_key.starts_with(&Self::children_prefix(&from_key)) {
            return Err(VfsError::invalid_argument(format!(
                "cannot move {from_key} into itself"
            )));
        }

        if let Some(existing) = self.paths.get(&to_key).copied() {
            match (moving_dir, self.kind(existing)?.is_dir()) {
                (true, true) => {
                    if self.has_children(&to_key) {
                        return Err(VfsError::directory_not_empty(to_key));
                    }
                    self.paths.remove(&to_key);
                    self.inodes.remove(&existing);
                }
                (false, false) => self.unlink(to)?,
                (true, false) => return Err(VfsError::not_a_directory(to_key)),
                (false, true) => return Err(VfsError::is_a_directory(to_key)),
            }
        }

        self.paths.remove(&from_key);
        self.paths.insert(to_key.clone(), ino);

        if moving_dir {
            let old_prefix = Self::children_prefix(&from_key);
            let moved: Vec<(String, Ino)> = self
                .paths
                .range(old_prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&old_prefix))
                .map(|(k, &v)| (k.clone(), v))
                .collect();
            for (old, child) in moved {
                self.paths.remove(&old);
                let suffix = &old[old_prefix.len()..];
                self.paths.insert(format!("{to_key}/{suffix}"), child);
            }
        }
        Ok(())
    }

    /// `size` as a length, or `EFBIG` past the limit.
    fn check_size(&self, size: u64) -> VfsResult<usize> {
        if size > self.max_file_size {
            return Err(VfsError::FileTooLarge {
                size,
                limit: self.max_file_size,
            });
        }
        usize::try_from(size).map_err(|_| VfsError::FileTooLarge {
            size,
            limit: usize::MAX as u64,
        })
    }

    /// Note a new open handle on `ino`.
    pub fn retain(&mut self, ino: Ino) -> VfsResult<()> {
        self.inode_mut(ino)?.open += 1;
        Ok(())
    }

    /// Drop an open handle on `ino`, freeing it if it was unlinked.
    pub fn release(&mut self, ino: Ino) {
        if let Some(node) = self.inodes.get_mut(&ino) {
            node.open = node.open.saturating_sub(1);
            if node.open == 0 && !node.linked {
                self.inodes.remove(&ino);
            }
        }
    }

    /// Current length of a file.
    pub fn len(&self, ino: Ino) -> VfsResult<u64> {
        Ok(self.inode(ino)?.data.len() as u64)
    }

    /// Copy bytes at `offset` into `buf`, returning how many were copied.
    pub fn read_at(&self, ino: Ino, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let data = &self.inode(ino)?.data;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(buf.len()).min(data.len());
        buf[..end - start].copy_from_slice(&data[start..end]);
        Ok(end - start)
    }

    /// Write `buf` at `offset`, zero-filling any gap past the old end.
    pub fn write_at(&mut self, ino: Ino, offset: u64, buf: &[u8]) -> VfsResult<usize> {
        self.inode(ino)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(VfsError::FileTooLarge {
                size: u64::MAX,
                limit: self.max_file_size,
            })?;
        let end = self.check_size(end)?;
        let offset = end - buf.len();
        let node = self.inode_mut(ino)?;
        grow(&mut node.data, end)?;
        node.data[offset..end].copy_from_slice(buf);
        node.mtime = SystemTime::now();
        Ok(buf.len())
    }

    /// Truncate or extend a file.
    pub fn truncate(&mut self, ino: Ino, len: u64) -> VfsResult<()> {
        let len = self.check_size(len)?;
        let node = self.inode_mut(ino)?;
        if len > node.data.len() {
            grow(&mut node.data, len)?;
        } else {
            node.data.truncate(len);
        }
        node.mtime = SystemTime::now();
        Ok(())
    }
}

/// Zero-extend `data` to `len` bytes, `ENOSPC` if the allocation fails.
fn grow(data: &mut Vec<u8>, len: usize) -> VfsResult<()> {
    if let Some(extra) = len.checked_sub(data.len()) {
        data.try_reserve_exact(extra)
            .map_err(|e| VfsError::NoSpace(format!("growing file to {len} bytes: {e}")))?;
        data.resize(len, 0);
    }
    Ok(())
}
