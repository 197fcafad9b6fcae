//! The fixed-layout stat record.
//!
//! Callers read this buffer through a raw struct cast, so offsets and byte
//! order are part of the ABI:
//!
//! ```text
//! offset  len  field
//! 0       2    mode  (u16 LE, S_IF* type bits + permission bits)
//! 2       4    reserved
//! 6       4    size  (u32 LE, bytes)
//! 10      12   reserved
//! ```

use thiserror::Error;

use crate::entry::{FileAttr, FileType};

/// Total length of an encoded record.
pub const STAT_RECORD_LEN: usize = 22;
/// Byte offset of the mode field.
pub const STAT_MODE_OFFSET: usize = 0;
/// Byte offset of the size field.
pub const STAT_SIZE_OFFSET: usize = 6;

/// Mask for the file type bits of `mode`.
pub const S_IFMT: u16 = 0xF000;
/// Directory.
pub const S_IFDIR: u16 = 0x4000;
/// Regular file.
pub const S_IFREG: u16 = 0x8000;

/// Stat decoding error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatError {
    /// Buffer shorter than [`STAT_RECORD_LEN`].
    #[error("stat buffer too short: {got} bytes, need {need}")]
    Truncated { got: usize, need: usize },
}

/// Decoded stat record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatRecord {
    /// Type and permission bits.
    pub mode: u16,
    /// Size in bytes.
    pub size: u32,
}

impl StatRecord {
    /// Record for a regular file. Sizes beyond `u32::MAX` saturate.
    pub fn file(size: u64, perm: u16) -> Self {
        Self {
            mode: S_IFREG | (perm & 0o777),
            size: u32::try_from(size).unwrap_or(u32::MAX),
        }
    }

    /// Record for a directory.
    pub fn directory(perm: u16) -> Self {
        Self {
            mode: S_IFDIR | (perm & 0o777),
            size: 0,
        }
    }

    /// True if the directory type bit is set.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// True if the regular-file type bit is set.
    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Permission bits.
    pub fn perm(&self) -> u16 {
        self.mode & 0o777
    }

    /// Serialize into the fixed layout. Reserved bytes are zero.
    pub fn encode(&self) -> [u8; STAT_RECORD_LEN] {
        let mut buf = [0u8; STAT_RECORD_LEN];
        buf[STAT_MODE_OFFSET..STAT_MODE_OFFSET + 2].copy_from_slice(&self.mode.to_le_bytes());
        buf[STAT_SIZE_OFFSET..STAT_SIZE_OFFSET + 4].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Serialize into the front of a caller buffer, leaving bytes past the
    /// record untouched.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<(), StatError> {
        if buf.len() < STAT_RECORD_LEN {
            return Err(StatError::Truncated {
                got: buf.len(),
                need: STAT_RECORD_LEN,
            });
        }
        buf[..STAT_RECORD_LEN].copy_from_slice(&self.encode());
        Ok(())
    }

    /// Parse the fixed layout. Reserved bytes are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, StatError> {
        if buf.len() < STAT_RECORD_LEN {
            return Err(StatError::Truncated {
                got: buf.len(),
                need: STAT_RECORD_LEN,
            });
        }
        let mode = u16::from_le_bytes([buf[STAT_MODE_OFFSET], buf[STAT_MODE_OFFSET + 1]]);
        let size = u32::from_le_bytes([
            buf[STAT_SIZE_OFFSET],
            buf[STAT_SIZE_OFFSET + 1],
            buf[STAT_SIZE_OFFSET + 2],
            buf[STAT_SIZE_OFFSET + 3],
        ]);
        Ok(Self { mode, size })
    }
}

impl From<&FileAttr> for StatRecord {
    fn from(attr: &FileAttr) -> Self {
        let perm = (attr.perm & 0o777) as u16;
        match attr.kind {
            FileType::Directory => StatRecord::directory(perm),
            FileType::File => StatRecord::file(attr.size, perm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_of_300_bytes() {
        let bytes = StatRecord::file(300, 0o644).encode();
        assert_eq!(&bytes[6..10], &[0x2C, 0x01, 0x00, 0x00]);
        assert_eq!(u32::from_le_bytes(bytes[6..10].try_into().unwrap()), 300);

        let decoded = StatRecord::decode(&bytes).unwrap();
        assert!(decoded.is_file());
        assert!(!decoded.is_dir());
        assert_eq!(decoded.size, 300);
        assert_eq!(decoded.perm(), 0o644);
    }

    #[test]
    fn test_directory_bits() {
        let bytes = StatRecord::directory(0o755).encode();
        let mode = u16::from_le_bytes([bytes[0], bytes[1]]);
        assert_ne!(mode & S_IFDIR, 0);
        assert_eq!(mode & S_IFREG, 0);
        assert_eq!(&bytes[6..10], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_reserved_bytes_zeroed_and_tail_untouched() {
        let mut buf = [0xAAu8; 64];
        StatRecord::file(1, 0o600).encode_into(&mut buf).unwrap();
        assert_eq!(&buf[2..6], &[0, 0, 0, 0]);
        assert!(buf[10..STAT_RECORD_LEN].iter().all(|&b| b == 0));
        assert!(buf[STAT_RECORD_LEN..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_size_saturates() {
        let record = StatRecord::file(u64::from(u32::MAX) + 10, 0o644);
        assert_eq!(record.size, u32::MAX);
    }

    #[test]
    fn test_short_buffer() {
        let err = StatRecord::decode(&[0u8; 9]).unwrap_err();
        assert_eq!(err, StatError::Truncated { got: 9, need: STAT_RECORD_LEN });
        assert!(StatRecord::default().encode_into(&mut [0u8; 4]).is_err());
    }

    #[test]
    fn test_from_attr() {
        let rec = StatRecord::from(&FileAttr::file(42, 0o640));
        assert!(rec.is_file());
        assert_eq!(rec.size, 42);
        assert!(StatRecord::from(&FileAttr::directory(0o755)).is_dir());
    }
}
