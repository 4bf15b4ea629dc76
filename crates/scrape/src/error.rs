//! Scrape Error Types

use derive_more::{Display, Error};

/// A scrape error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for scrape operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The request failed in a way retrying won't fix.
    #[display("failed to fetch {_0}")]
    Fetch(#[error(not(source))] String),
    /// Transient failures persisted through every retry.
    #[display("gave up fetching {_0} after repeated transient failures")]
    TooManyAttempts(#[error(not(source))] String),
    #[display("could not parse fetched page")]
    Parse,
    #[display("version store error")]
    Storage,
    #[display("metadata store error")]
    Metadata,
    #[display("article discovery failed")]
    Discovery,
    #[display("maintenance failed")]
    Maintenance,
    #[display("no parser registered for {_0}")]
    NoParser(#[error(not(source))] String),
    #[display("invalid scrape configuration: {_0}")]
    Config(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TooManyAttempts(_))
    }
}
