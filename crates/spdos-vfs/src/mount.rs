//! Mount table with fixed, index-addressed slots.
//!
//! Slot 0 always holds a local backend and cannot be unmounted. The other
//! slots are filled by `mount` and emptied by `umount`.

use std::fmt;

use crate::backends::Driver;
use crate::error::{VfsError, VfsResult};
use crate::ops::{BackendKind, BackendOps};

/// Number of mount slots.
pub const MAX_MOUNTS: usize = 4;

/// User and password for a mount.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Credentials from the optional ABI arguments; `None` if neither is set.
    pub fn from_parts(user: Option<&str>, password: Option<&str>) -> Option<Self> {
        if user.is_none() && password.is_none() {
            return None;
        }
        Some(Self::new(user.unwrap_or_default(), password.unwrap_or_default()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything `mount` is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Target slot.
    pub index: usize,
    /// Protocol string, looked up case-insensitively in the registry.
    pub protocol: String,
    /// Root path on the backend.
    pub path: String,
    pub hostname: Option<String>,
    pub credentials: Option<Credentials>,
}

impl MountRequest {
    pub fn new(index: usize, protocol: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            index,
            protocol: protocol.into(),
            path: path.into(),
            hostname: None,
            credentials: None,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// An occupied slot.
#[derive(Debug)]
pub struct MountSlot {
    pub index: usize,
    pub kind: BackendKind,
    pub protocol: String,
    pub root: String,
    pub hostname: Option<String>,
    pub credentials: Option<Credentials>,
    pub driver: Driver,
}

impl MountSlot {
    /// Build a slot. The kind is taken from the driver.
    pub fn new(
        index: usize,
        protocol: impl Into<String>,
        root: impl Into<String>,
        hostname: Option<String>,
        credentials: Option<Credentials>,
        driver: Driver,
    ) -> Self {
        Self {
            index,
            kind: driver.kind(),
            protocol: protocol.into(),
            root: root.into(),
            hostname,
            credentials,
            driver,
        }
    }

    /// Slot built from the request that produced `driver`.
    pub fn from_request(request: &MountRequest, driver: Driver) -> Self {
        Self::new(
            request.index,
            request.protocol.clone(),
            request.path.clone(),
            request.hostname.clone(),
            request.credentials.clone(),
            driver,
        )
    }

    pub fn info(&self) -> MountInfo {
        MountInfo {
            index: self.index,
            kind: self.kind,
            protocol: self.protocol.clone(),
            root: self.root.clone(),
            hostname: self.hostname.clone(),
            user: self.credentials.as_ref().map(|c| c.user.clone()),
        }
    }
}

/// Information about a mount point. Never carries a password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub index: usize,
    pub kind: BackendKind,
    pub protocol: String,
    pub root: String,
    pub hostname: Option<String>,
    pub user: Option<String>,
}

/// Fixed table of mount slots.
#[derive(Debug)]
pub struct MountTable {
    slots: [Option<MountSlot>; MAX_MOUNTS],
}

impl MountTable {
    /// Table with `local` bound to slot 0 and every other slot empty.
    pub fn new(local: Driver) -> Self {
        let mut slots: [Option<MountSlot>; MAX_MOUNTS] = std::array::from_fn(|_| None);
        slots[0] = Some(MountSlot::new(0, "ram", "/", None, None, local));
        Self { slots }
    }

    /// Fail with `EINVAL` unless `index` names a slot.
    pub fn check_index(index: usize) -> VfsResult<()> {
        if index < MAX_MOUNTS {
            Ok(())
        } else {
            Err(VfsError::invalid_argument(format!(
                "mount index {index} out of range 0..{MAX_MOUNTS}"
            )))
        }
    }

    pub fn is_mounted(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(Option::is_some)
    }

    /// Fail with `EBUSY` if the slot is taken.
    pub fn check_free(&self, index: usize) -> VfsResult<()> {
        Self::check_index(index)?;
        if self.is_mounted(index) {
            return Err(VfsError::Busy(format!("mount point {index} is in use")));
        }
        Ok(())
    }

    /// Occupy the slot named by `slot.index`.
    pub fn insert(&mut self, slot: MountSlot) -> VfsResult<()> {
        self.check_free(slot.index)?;
        let index = slot.index;
        self.slots[index] = Some(slot);
        Ok(())
    }

    /// Empty a slot and hand back what was in it.
    pub fn remove(&mut self, index: usize) -> VfsResult<MountSlot> {
        Self::check_index(index)?;
        if index == 0 {
            return Err(VfsError::Busy("mount point 0 cannot be unmounted".into()));
        }
        self.slots[index].take().ok_or(VfsError::NotMounted(index))
    }

    pub fn get(&self, index: usize) -> VfsResult<&MountSlot> {
        Self::check_index(index)?;
        self.slots[index].as_ref().ok_or(VfsError::NotMounted(index))
    }

    pub fn get_mut(&mut self, index: usize) -> VfsResult<&mut MountSlot> {
        Self::check_index(index)?;
        self.slots[index].as_mut().ok_or(VfsError::NotMounted(index))
    }

    /// Occupied slots in index order.
    pub fn list(&self) -> Vec<MountInfo> {
        self.slots.iter().flatten().map(MountSlot::info).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{LocalDriver, RamStore};
    use spdos_types::Errno;

    fn local() -> Driver {
        Driver::Local(LocalDriver::at_root(RamStore::shared()))
    }

    #[test]
    fn test_slot_zero_is_local_and_permanent() {
        let mut table = MountTable::new(local());
        assert!(table.is_mounted(0));
        assert_eq!(table.get(0).unwrap().kind, BackendKind::Local);
        assert_eq!(table.remove(0).unwrap_err().errno(), Errno::EBUSY);
        assert!(table.is_mounted(0));
    }

    #[test]
    fn test_insert_and_remove() {
        let mut table = MountTable::new(local());
        table
            .insert(MountSlot::new(2, "xfs", "/", None, None, local()))
            .unwrap();
        let err = table
            .insert(MountSlot::new(2, "xfs", "/", None, None, local()))
            .unwrap_err();
        assert_eq!(err.errno(), Errno::EBUSY);

        let slot = table.remove(2).unwrap();
        assert_eq!(slot.protocol, "xfs");
        assert_eq!(table.remove(2).unwrap_err().errno(), Errno::ENOTMOUNTED);
        assert_eq!(table.remove(9).unwrap_err().errno(), Errno::EINVAL);
        assert_eq!(table.get(3).unwrap_err().errno(), Errno::ENOTMOUNTED);
    }

    #[test]
    fn test_list_hides_password() {
        let mut table = MountTable::new(local());
        let slot = MountSlot::new(
            1,
            "ram",
            "/",
            Some("host".into()),
            Some(Credentials::new("guest", "hunter2")),
            local(),
        );
        table.insert(slot).unwrap();

        let list = table.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].index, 1);
        assert_eq!(list[1].user.as_deref(), Some("guest"));
        assert!(!format!("{:?}", table).contains("hunter2"));
    }

    #[test]
    fn test_credentials_from_parts() {
        assert_eq!(Credentials::from_parts(None, None), None);
        assert_eq!(
            Credentials::from_parts(Some("u"), None),
            Some(Credentials::new("u", ""))
        );
    }
}
