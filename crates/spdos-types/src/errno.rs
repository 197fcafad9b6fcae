//! Error codes returned (negated) across the integer ABI.

use strum::{EnumIter, IntoStaticStr};

/// Error code enum shared by every backend.
///
/// Values follow the POSIX numbering where one exists. `ENOTMOUNTED` has no
/// POSIX counterpart and sits in an otherwise unused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter)]
#[repr(i32)]
pub enum Errno {
    /// No such file or directory.
    ENOENT = 2,
    /// I/O error, or a descriptor made unusable by an earlier failure.
    EIO = 5,
    /// Unknown descriptor, or access mode forbids the operation.
    EBADF = 9,
    /// Transient failure, try again.
    EAGAIN = 11,
    /// Permission denied.
    EACCES = 13,
    /// Mount slot occupied, or nested dispatch.
    EBUSY = 16,
    /// Already exists.
    EEXIST = 17,
    /// Rename across mount points.
    EXDEV = 18,
    /// Unknown protocol.
    ENODEV = 19,
    /// Not a directory.
    ENOTDIR = 20,
    /// Is a directory.
    EISDIR = 21,
    /// Invalid argument.
    EINVAL = 22,
    /// Descriptor table full.
    EMFILE = 24,
    /// Write would grow a file past the backend's size limit.
    EFBIG = 27,
    /// Backend ran out of room.
    ENOSPC = 28,
    /// Seek on a stream that cannot seek.
    ESPIPE = 29,
    /// Read-only filesystem.
    EROFS = 30,
    /// File name too long.
    ENAMETOOLONG = 36,
    /// Operation not supported by this backend.
    ENOSYS = 38,
    /// Directory not empty.
    ENOTEMPTY = 39,
    /// Mount slot has nothing mounted.
    ENOTMOUNTED = 80,
    /// Backend did not answer within its deadline.
    ETIMEDOUT = 110,
}

impl Errno {
    /// Positive numeric code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// The value returned to ABI callers (always negative).
    pub fn as_neg(self) -> i32 {
        -(self as i32)
    }

    /// Symbolic name, e.g. `"ENOENT"`.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Look up a code, accepting either sign.
    pub fn from_code(code: i32) -> Option<Self> {
        use strum::IntoEnumIterator;
        let code = code.checked_abs()?;
        Self::iter().find(|e| e.code() == code)
    }

    /// Errors a caller may retry with the identical call.
    pub fn is_retryable(self) -> bool {
        matches!(self, Errno::EAGAIN | Errno::ETIMEDOUT)
    }
}

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
