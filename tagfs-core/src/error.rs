//! Error taxonomy shared by every fallible operation in the crate.

use std::path::PathBuf;

use thiserror::Error;

/// The kinds of failure a tagfs operation can report.
///
/// Structural validation errors (bad magic, wrong meta-file size) are
/// recovered by refusing the operation or, in `mkmeta`, by unlinking and
/// rebuilding. Transient I/O errors are surfaced verbatim via [`Error::Io`].
#[derive(Debug, Error)]
pub enum Error {
    /// The target file does not reside on a tagfs mount (the NOP ioctl
    /// failed).
    #[error("not a tagfs file")]
    NotTagfs,

    /// The log has no remaining free entry slots.
    #[error("log is full")]
    LogFull,

    /// A path failed validation (not under the mount, absolute where a
    /// relative path was required, etc).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The superblock's magic number did not match the expected sentinel.
    #[error("invalid superblock")]
    InvalidSuperblock,

    /// The allocator could not find a contiguous free range of the
    /// requested size.
    #[error("allocation failed")]
    AllocationFailed,

    /// The target of a create operation already exists.
    #[error("already exists: {0}")]
    AlreadyExists(PathBuf),

    /// The device is currently mounted and the requested operation
    /// requires it not to be.
    #[error("device is busy (mounted)")]
    DeviceBusy,

    /// A transient I/O error, surfaced verbatim.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The requested operation is not implemented for this configuration.
    #[error("not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;
