//! Error taxonomy for the FAT32 storage stack.
//!
//! Every public operation under `fs::` returns a `Result` instead of
//! consulting a thread-local last-error, unlike the C driver this crate's
//! semantics were distilled from.

use core::fmt::{self, Display, Formatter};

use crate::drivers::ata::AtaError;

/// Errors raised by the page cache's buffer pool and per-file page list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// `gfd` does not index a live Global File Table entry.
    OutOfBounds,
    /// GFT entry exists but has no attached file node.
    Invalid,
    /// Page list lookup for `(gfd, page)` found no record.
    FinfoNotFound,
    /// No free buffer left in the pool.
    Deplet,
    /// `release_buffer` was called with an empty page list.
    BadPages,
    /// `release_buffer` did not find `page` in the file's page list.
    PageNotFound,
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds => f.write_str("gfd out of bounds"),
            Self::Invalid => f.write_str("gfd has no attached file node"),
            Self::FinfoNotFound => f.write_str("page not resident in cache"),
            Self::Deplet => f.write_str("page cache buffer pool exhausted"),
            Self::BadPages => f.write_str("release called on empty page list"),
            Self::PageNotFound => f.write_str("page not found in file's page list"),
        }
    }
}

/// Errors raised anywhere in the FAT32 driver or VFS glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// A collaborator (block device, VMM) reported a transport failure.
    Ata(AtaErrorKind),
    /// An argument violated a precondition (bad gfd, empty name, ...).
    BadArguments,
    /// A VFS node was in a state its operation table doesn't expect.
    InvalidNodeStructure,
    /// The page cache pool could not satisfy a buffer request.
    CacheFull,
    /// Catch-all for conditions not covered by a more specific variant.
    GeneralError,
    /// The volume (or a directory's cluster chain) has no free space left.
    NoSpace,
    /// A lookup (file, directory, cluster) did not find its target.
    NotFound,
    /// An operation expecting a regular file was given a directory.
    IsDirectory,
    /// A directory entry or FAT value failed structural validation.
    CorruptEntry,
}

/// Transport-level detail preserved across the `AtaError -> FsError` boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtaErrorKind {
    DeviceError,
    DeviceFault,
    LbaOutOfRange,
}

impl From<AtaError> for AtaErrorKind {
    fn from(value: AtaError) -> Self {
        match value {
            AtaError::DeviceError => Self::DeviceError,
            AtaError::DeviceFault => Self::DeviceFault,
            AtaError::LbaOutOfRange => Self::LbaOutOfRange,
        }
    }
}

impl From<AtaError> for FsError {
    fn from(value: AtaError) -> Self {
        Self::Ata(value.into())
    }
}

impl From<CacheError> for FsError {
    fn from(value: CacheError) -> Self {
        match value {
            CacheError::OutOfBounds | CacheError::Invalid => Self::BadArguments,
            CacheError::FinfoNotFound | CacheError::PageNotFound => Self::NotFound,
            CacheError::Deplet => Self::CacheFull,
            CacheError::BadPages => Self::GeneralError,
        }
    }
}

impl Display for FsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ata(kind) => write!(f, "storage transport error: {:?}", kind),
            Self::BadArguments => f.write_str("bad arguments"),
            Self::InvalidNodeStructure => f.write_str("invalid node structure"),
            Self::CacheFull => f.write_str("page cache buffer pool exhausted"),
            Self::GeneralError => f.write_str("general filesystem error"),
            Self::NoSpace => f.write_str("no space left on device"),
            Self::NotFound => f.write_str("not found"),
            Self::IsDirectory => f.write_str("is a directory"),
            Self::CorruptEntry => f.write_str("corrupt directory or FAT entry"),
        }
    }
}
