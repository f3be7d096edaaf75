//! Error taxonomy for filesystem operations
//!
//! Every dispatched call resolves to either a value or an [`FsError`]; the
//! FUSE layer turns the error into the matching negative POSIX code via
//! [`FsError::errno`]. Backing-store errors keep their original errno so the
//! caller sees exactly what the host filesystem reported.

use thiserror::Error;

pub type FsResult<T> = Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such entry")]
    NotFound,

    #[error("entry already exists")]
    AlreadyExists,

    #[error("permission denied")]
    PermissionDenied,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no space left on backing store")]
    NoSpace,

    #[error("backing store error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index storage error: {0}")]
    Store(#[from] sled::Error),

    /// Index invariant violation. Fails the triggering call only; the
    /// process keeps serving.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FsError {
    /// The POSIX error number for this error, always positive.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::PermissionDenied => libc::EACCES,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::NoSpace => libc::ENOSPC,
            FsError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            FsError::Store(_) => libc::EIO,
            FsError::Internal(_) => libc::EIO,
        }
    }

    /// Build an error from a raw errno reported by the backing store.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ENOENT => FsError::NotFound,
            libc::EEXIST => FsError::AlreadyExists,
            libc::EACCES | libc::EPERM => FsError::PermissionDenied,
            libc::ENOTDIR => FsError::NotADirectory,
            libc::EISDIR => FsError::IsADirectory,
            libc::ENOTEMPTY => FsError::NotEmpty,
            libc::EINVAL => FsError::InvalidArgument("invalid argument".into()),
            libc::ENOSPC => FsError::NoSpace,
            other => FsError::Io(std::io::Error::from_raw_os_error(other)),
        }
    }
}

impl From<nix::errno::Errno> for FsError {
    fn from(errno: nix::errno::Errno) -> Self {
        FsError::from_errno(errno as i32)
    }
}
