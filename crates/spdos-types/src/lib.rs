//! Shared types for the spdos virtual filesystem.
//!
//! This crate is the leaf every other spdos crate builds on. It has **no
//! internal spdos dependencies** and carries the pieces of the ABI that have
//! to stay bit-exact no matter which backend answers a call:
//!
//! | Type            | Purpose                                           |
//! |-----------------|---------------------------------------------------|
//! | [`Errno`]       | Negative return codes crossing the ABI            |
//! | [`StatRecord`]  | Fixed-layout metadata buffer filled by `stat`     |
//! | [`OpenFlags`]   | Decoded `O_*` bits passed to `open`               |
//! | [`Whence`]      | `SEEK_*` origin for `lseek`                       |
//! | [`FileAttr`]    | Backend-neutral metadata before encoding          |
//! | [`DirEntry`]    | One name produced by `readdir`                    |

mod entry;
mod errno;
mod flags;
mod stat;

pub use entry::{DirEntry, FileAttr, FileType};
pub use errno::Errno;
pub use flags::{
    O_ACCMODE, O_APPEND, O_CREAT, O_EXCL, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY, OpenFlags,
    SEEK_CUR, SEEK_END, SEEK_SET, Whence,
};
pub use stat::{
    S_IFDIR, S_IFMT, S_IFREG, STAT_MODE_OFFSET, STAT_RECORD_LEN, STAT_SIZE_OFFSET, StatError,
    StatRecord,
};
