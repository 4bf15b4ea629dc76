//! Migration Error Types

use derive_more::{Display, Error};

/// A migration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not read the legacy dataset")]
    Source,
    #[display("version store error")]
    Storage,
    #[display("metadata store error")]
    Metadata,
    /// Repository locks were still held after every retry and a forced
    /// clean-up. The whole process should stop and be retried later.
    #[display("version store locks are persistently held")]
    LockContention,
    /// Content exists in the store but doesn't match what the metadata
    /// says. Only the article concerned is abandoned.
    #[display(
        "cannot reconcile legacy version {legacy_version} of legacy article {legacy_article} \
         with article {live_article}: {reason}"
    )]
    Consistency {
        legacy_article: i64,
        legacy_version: i64,
        live_article: i64,
        live_version: Option<i64>,
        commit: Option<String>,
        reason: &'static str,
    },
    #[display("invalid legacy timestamp: {_0}")]
    InvalidTimestamp(#[error(not(source))] String),
    #[display("unknown time zone: {_0}")]
    UnknownTimeZone(#[error(not(source))] String),
    /// A failure followed the previous one too closely to try again.
    #[display("migration failed again shortly after the previous failure")]
    RepeatedFailure,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Source | ErrorKind::Storage | ErrorKind::Metadata)
    }

    /// Errors that stop the whole migration rather than one attempt of it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::LockContention | ErrorKind::RepeatedFailure)
    }
}

/// Raise a version store error, singling out persistent lock contention.
pub(crate) fn from_store(err: presswatch_storage::error::Error) -> Error {
    let kind = match err.is_lock_timeout() {
        true => ErrorKind::LockContention,
        false => ErrorKind::Storage,
    };
    err.raise(kind)
}
