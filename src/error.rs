use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("version store unavailable")]
    Storage,
    #[display("metadata store unavailable")]
    Metadata,
    #[display("scrape cycle aborted")]
    Scrape,
    #[display("migration aborted")]
    Migrate,
    #[display("version {_0} not found")]
    VersionNotFound(#[error(not(source))] i64),
    #[display("snapshot of version {_0} is missing from the version store")]
    SnapshotMissing(#[error(not(source))] i64),
    #[display("could not write to standard output")]
    Output,
}
