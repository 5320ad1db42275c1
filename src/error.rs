use libc::{c_int, EEXIST, EIO, ENOENT, ENOTEMPTY, EPERM};
use thiserror::Error;

/// Errors produced by the filesystem core.
///
/// The first three variants are expected logical outcomes and are reported
/// to the kernel without an error-level log entry. Everything else maps to
/// `EIO` and must be logged with its originating cause before it leaves the
/// operations layer.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such entry")]
    NotFound,

    #[error("entry already exists")]
    AlreadyExists,

    #[error("directory not empty")]
    NotEmpty,

    #[error("operation not permitted")]
    NotPermitted,

    /// The blob model only accepts whole files, so writes must arrive in
    /// order. `written` is the amount of contiguous data buffered so far.
    #[error("non-sequential write at offset {offset}, expected {written}")]
    NonSequentialWrite { offset: u64, written: u64 },

    #[error("truncate to non-zero size is not supported")]
    PartialTruncate,

    /// The backing store reported a non-null last-error after a mutation.
    #[error("update conflict: {0}")]
    UpdateConflict(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl FsError {
    pub fn errno(&self) -> c_int {
        match self {
            FsError::NotFound => ENOENT,
            FsError::AlreadyExists => EEXIST,
            FsError::NotEmpty => ENOTEMPTY,
            FsError::NotPermitted => EPERM,
            FsError::NonSequentialWrite { .. }
            | FsError::PartialTruncate
            | FsError::UpdateConflict(_)
            | FsError::Backend(_) => EIO,
        }
    }

    /// True for outcomes the caller recovers from locally; these are not
    /// worth an error-level log record.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            FsError::NotFound | FsError::AlreadyExists | FsError::NotEmpty | FsError::NotPermitted
        )
    }
}

pub type FsResult<T> = Result<T, FsError>;
