//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! A missing snapshot and an unchanged commit are outcomes, not errors; see
//! [`VersionStore`](crate::VersionStore) for how those are reported.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Another process held the repository lock for longer than we were
    /// prepared to wait.
    #[display("repository locked: {}", _0.display())]
    LockTimeout(#[error(not(source))] PathBuf),
    /// The backing command failed for a reason other than lock contention.
    #[display("backend error: {_0}")]
    Backend(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains invalid characters or escapes root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// URL cannot be turned into an article file name.
    #[display("unsupported article URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    #[display("invalid commit id: {_0}")]
    InvalidCommitId(#[error(not(source))] String),
    /// Partition has no repository (call `ensure_repository` first).
    #[display("unknown partition: {_0}")]
    UnknownPartition(#[error(not(source))] String),
    #[display("git executable not found in PATH")]
    GitNotFound,
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_) | Self::Io(_))
    }

    /// Returns `true` for lock contention that survived every retry.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout(_))
    }
}
