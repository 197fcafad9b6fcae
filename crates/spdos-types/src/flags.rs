//! Open flags and seek origins.
//!
//! Bit values match what the host tooling sends on the wire
//! (`O_WRONLY | O_CREAT | O_TRUNC == 0x0301`).

/// Read-only access mode.
pub const O_RDONLY: i32 = 0;
/// Write-only access mode.
pub const O_WRONLY: i32 = 1;
/// Read/write access mode.
pub const O_RDWR: i32 = 2;
/// Mask selecting the access mode.
pub const O_ACCMODE: i32 = 3;
/// Every write goes to the end of the file.
pub const O_APPEND: i32 = 0x0008;
/// Create the file if missing.
pub const O_CREAT: i32 = 0x0100;
/// Truncate to zero length on open.
pub const O_TRUNC: i32 = 0x0200;
/// With `O_CREAT`, fail if the file exists.
pub const O_EXCL: i32 = 0x0400;

/// Seek relative to the start.
pub const SEEK_SET: i32 = 0;
/// Seek relative to the current offset.
pub const SEEK_CUR: i32 = 1;
/// Seek relative to the end.
pub const SEEK_END: i32 = 2;

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write-only access.
    pub fn write_only() -> Self {
        Self {
            read: false,
            write: true,
            ..Default::default()
        }
    }

    /// Read/write access.
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Create and truncate, write-only (`O_WRONLY | O_CREAT | O_TRUNC`).
    pub fn create_truncate() -> Self {
        Self {
            read: false,
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    /// Decode raw `O_*` bits. Returns `None` for the reserved access mode 3.
    pub fn from_bits(bits: i32) -> Option<Self> {
        let (read, write) = match bits & O_ACCMODE {
            O_RDONLY => (true, false),
            O_WRONLY => (false, true),
            O_RDWR => (true, true),
            _ => return None,
        };
        Some(Self {
            read,
            write,
            append: bits & O_APPEND != 0,
            create: bits & O_CREAT != 0,
            truncate: bits & O_TRUNC != 0,
            exclusive: bits & O_EXCL != 0,
        })
    }

    /// Encode back into raw `O_*` bits.
    pub fn bits(&self) -> i32 {
        let mut bits = match (self.read, self.write) {
            (_, false) => O_RDONLY,
            (false, true) => O_WRONLY,
            (true, true) => O_RDWR,
        };
        if self.append {
            bits |= O_APPEND;
        }
        if self.create {
            bits |= O_CREAT;
        }
        if self.truncate {
            bits |= O_TRUNC;
        }
        if self.exclusive {
            bits |= O_EXCL;
        }
        bits
    }

    /// True if the open may modify the file's contents.
    pub fn mutates(&self) -> bool {
        self.write || self.truncate || self.append
    }
}

/// Origin for `lseek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the file.
    Set,
    /// From the current offset.
    Cur,
    /// From the end of the file.
    End,
}

impl Whence {
    /// Decode a raw `SEEK_*` value.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            SEEK_SET => Some(Whence::Set),
            SEEK_CUR => Some(Whence::Cur),
            SEEK_END => Some(Whence::End),
            _ => None,
        }
    }

    /// Resolve `pos` against the current offset and file length.
    ///
    /// Returns `None` if the result would be negative or overflow.
    pub fn apply(self, pos: i64, current: u64, len: u64) -> Option<u64> {
        let base = match self {
            Whence::Set => 0,
            Whence::Cur => current,
            Whence::End => len,
        };
        let target = i128::from(base) + i128::from(pos);
        u64::try_from(target).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_tool_bits() {
        let flags = OpenFlags::from_bits(O_WRONLY | O_CREAT | O_TRUNC).unwrap();
        assert!(!flags.read);
        assert!(flags.write);
        assert!(flags.create);
        assert!(flags.truncate);
        assert_eq!(flags.bits(), 0x0301);
        assert_eq!(flags, OpenFlags::create_truncate());
    }

    #[test]
    fn test_access_modes() {
        assert_eq!(OpenFlags::from_bits(O_RDONLY), Some(OpenFlags::read()));
        assert_eq!(OpenFlags::from_bits(O_RDWR), Some(OpenFlags::read_write()));
        assert_eq!(OpenFlags::from_bits(3), None);
        assert!(OpenFlags::from_bits(O_RDONLY | O_APPEND).unwrap().mutates());
        assert!(!OpenFlags::read().mutates());
    }

    #[test]
    fn test_whence_apply() {
        assert_eq!(Whence::Set.apply(10, 4, 100), Some(10));
        assert_eq!(Whence::Cur.apply(-4, 4, 100), Some(0));
        assert_eq!(Whence::Cur.apply(-5, 4, 100), None);
        assert_eq!(Whence::End.apply(-1, 0, 100), Some(99));
        assert_eq!(Whence::from_raw(7), None);
        assert_eq!(Whence::from_raw(SEEK_END), Some(Whence::End));
    }
}
