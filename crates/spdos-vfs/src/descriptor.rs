//! Descriptor table.
//!
//! Maps the integer ids handed to applications onto `(mount, backend handle)`
//! pairs. Ids 0..=2 are reserved; the first id issued is 3. A released id is
//! reissued before the counter grows, lowest first.

use std::collections::{BTreeMap, BTreeSet};

use spdos_types::OpenFlags;

use crate::error::{VfsError, VfsResult};
use crate::ops::BackendHandle;

/// Descriptor id as seen by applications.
pub type Fd = i32;

/// First id handed out.
pub const FIRST_DESCRIPTOR: Fd = 3;

/// Default table capacity.
pub const DEFAULT_MAX_DESCRIPTORS: usize = 64;

/// File or directory stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    File,
    Directory,
}

/// Whether a descriptor can still be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorState {
    Live,
    /// Its mount went away. Only `close` is accepted.
    Stale,
    /// Its backend returned garbage. Only `close` is accepted.
    Poisoned,
}

/// One open file or directory stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub id: Fd,
    pub mount: usize,
    pub handle: BackendHandle,
    /// Mirrored after every read, write and seek.
    pub offset: u64,
    pub flags: OpenFlags,
    pub kind: DescriptorKind,
    pub state: DescriptorState,
}

/// Open descriptors.
#[derive(Debug)]
pub struct DescriptorTable {
    entries: BTreeMap<Fd, Descriptor>,
    free: BTreeSet<Fd>,
    next: Fd,
    capacity: usize,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DESCRIPTORS)
    }
}

impl DescriptorTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            free: BTreeSet::new(),
            next: FIRST_DESCRIPTOR,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if another descriptor can be allocated.
    pub fn has_capacity(&self) -> bool {
        self.entries.len() < self.capacity
    }

    /// Register a freshly opened backend handle.
    pub fn allocate(
        &mut self,
        mount: usize,
        handle: BackendHandle,
        flags: OpenFlags,
        kind: DescriptorKind,
    ) -> VfsResult<Fd> {
        if !self.has_capacity() {
            return Err(VfsError::TooManyOpen);
        }
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                let id = self.next;
                self.next = self
                    .next
                    .checked_add(1)
                    .ok_or(VfsError::TooManyOpen)?;
                id
            }
        };
        self.entries.insert(
            id,
            Descriptor {
                id,
                mount,
                handle,
                offset: 0,
                flags,
                kind,
                state: DescriptorState::Live,
            },
        );
        Ok(id)
    }

    fn lookup(&self, fd: Fd, kind: DescriptorKind) -> VfsResult<&Descriptor> {
        let desc = self
            .entries
            .get(&fd)
            .ok_or_else(|| VfsError::bad_descriptor(format!("descriptor {fd} is not open")))?;
        if desc.kind != kind {
            return Err(VfsError::invalid_argument(format!(
                "descriptor {fd} is a {:?}, not a {kind:?}",
                desc.kind
            )));
        }
        Ok(desc)
    }

    /// A usable descriptor of `kind`.
    ///
    /// `EBADF` if unknown or stale, `EINVAL` if the kind is wrong, `EIO` if
    /// poisoned.
    pub fn get(&self, fd: Fd, kind: DescriptorKind) -> VfsResult<&Descriptor> {
        let desc = self.lookup(fd, kind)?;
        match desc.state {
            DescriptorState::Live => Ok(desc),
            DescriptorState::Stale => Err(VfsError::Stale(fd)),
            DescriptorState::Poisoned => Err(VfsError::Poisoned(format!("descriptor {fd}"))),
        }
    }

    /// Mutable access to a usable descriptor; same checks as [`get`](Self::get).
    pub fn get_mut(&mut self, fd: Fd, kind: DescriptorKind) -> VfsResult<&mut Descriptor> {
        self.get(fd, kind)?;
        self.entries
            .get_mut(&fd)
            .ok_or_else(|| VfsError::bad_descriptor(format!("descriptor {fd} is not open")))
    }

    /// Mark a descriptor unusable after a protocol failure.
    pub fn poison(&mut self, fd: Fd) {
        if let Some(desc) = self.entries.get_mut(&fd) {
            if desc.state == DescriptorState::Live {
                desc.state = DescriptorState::Poisoned;
            }
        }
    }

    /// Remove a descriptor of `kind`, whatever its state, freeing its id.
    pub fn release(&mut self, fd: Fd, kind: DescriptorKind) -> VfsResult<Descriptor> {
        self.lookup(fd, kind)?;
        let desc = self
            .entries
            .remove(&fd)
            .ok_or_else(|| VfsError::bad_descriptor(format!("descriptor {fd} is not open")))?;
        self.free.insert(fd);
        Ok(desc)
    }

    /// Mark every descriptor on `mount` stale and return the ones that were
    /// not already, so their backend handles can be closed.
    pub fn invalidate_mount(&mut self, mount: usize) -> Vec<Descriptor> {
        let mut invalidated = Vec::new();
        for desc in self.entries.values_mut() {
            if desc.mount == mount && desc.state != DescriptorState::Stale {
                desc.state = DescriptorState::Stale;
                invalidated.push(desc.clone());
            }
        }
        invalidated
    }

    /// Descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spdos_types::Errno;

    fn open(table: &mut DescriptorTable, mount: usize) -> Fd {
        table
            .allocate(mount, BackendHandle(1), OpenFlags::read(), DescriptorKind::File)
            .unwrap()
    }

    #[test]
    fn test_ids_start_at_three_and_reuse_lowest() {
        let mut table = DescriptorTable::default();
        let a = open(&mut table, 0);
        let b = open(&mut table, 0);
        let c = open(&mut table, 0);
        assert_eq!((a, b, c), (3, 4, 5));

        table.release(c, DescriptorKind::File).unwrap();
        table.release(a, DescriptorKind::File).unwrap();
        assert_eq!(open(&mut table, 0), 3);
        assert_eq!(open(&mut table, 0), 5);
        assert_eq!(open(&mut table, 0), 6);
    }

    #[test]
    fn test_capacity() {
        let mut table = DescriptorTable::new(2);
        open(&mut table, 0);
        open(&mut table, 0);
        assert!(!table.has_capacity());
        let err = table
            .allocate(0, BackendHandle(9), OpenFlags::read(), DescriptorKind::File)
            .unwrap_err();
        assert_eq!(err.errno(), Errno::EMFILE);
    }

    #[test]
    fn test_kind_and_unknown() {
        let mut table = DescriptorTable::default();
        let fd = open(&mut table, 0);
        assert_eq!(
            table.get(fd, DescriptorKind::Directory).unwrap_err().errno(),
            Errno::EINVAL
        );
        assert_eq!(
            table.release(fd, DescriptorKind::Directory).unwrap_err().errno(),
            Errno::EINVAL
        );
        assert_eq!(
            table.get(99, DescriptorKind::File).unwrap_err().errno(),
            Errno::EBADF
        );
        table.release(fd, DescriptorKind::File).unwrap();
        assert_eq!(
            table.release(fd, DescriptorKind::File).unwrap_err().errno(),
            Errno::EBADF
        );
    }

    #[test]
    fn test_invalidate_mount() {
        let mut table = DescriptorTable::default();
        let on_one = open(&mut table, 1);
        let on_zero = open(&mut table, 0);
        let also_one = open(&mut table, 1);

        let stale = table.invalidate_mount(1);
        assert_eq!(
            stale.iter().map(|d| d.id).collect::<Vec<_>>(),
            vec![on_one, also_one]
        );
        assert!(table.invalidate_mount(1).is_empty());

        assert_eq!(
            table.get(on_one, DescriptorKind::File).unwrap_err().errno(),
            Errno::EBADF
        );
        assert!(table.get(on_zero, DescriptorKind::File).is_ok());

        let released = table.release(on_one, DescriptorKind::File).unwrap();
        assert_eq!(released.state, DescriptorState::Stale);
    }

    #[test]
    fn test_poison() {
        let mut table = DescriptorTable::default();
        let fd = open(&mut table, 2);
        table.poison(fd);
        assert_eq!(
            table.get_mut(fd, DescriptorKind::File).unwrap_err().errno(),
            Errno::EIO
        );
        assert!(table.release(fd, DescriptorKind::File).is_ok());
        assert!(table.is_empty());
    }
}
