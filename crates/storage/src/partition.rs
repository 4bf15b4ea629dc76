use crate::error::{ErrorKind, Result};
use crate::path::validate;
use derive_more::Display;
use std::path::Path;
use time::UtcDateTime;

/// Key of a time-bucketed repository, relative to the storage root.
///
/// Live partitions are named after the calendar month (`2024-05`); the
/// legacy catch-all bucket is `old`; migrated history is nested under a
/// prefix (`migrated/2014-03`).
#[derive(Debug, Clone, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{_0}")]
pub struct Partition(String);

impl Partition {
    /// Key of the legacy, unpartitioned bucket.
    pub const LEGACY: &str = "old";

    /// Validate and wrap a partition key.
    ///
    /// ```
    /// use presswatch_storage::Partition;
    ///
    /// assert!(Partition::new("2024-05").is_ok());
    /// assert!(Partition::new("migrated/2014-03").is_ok());
    /// assert!(Partition::new("../elsewhere").is_err());
    /// ```
    pub fn new(key: impl AsRef<str>) -> Result<Self> {
        let key = key.as_ref();
        let validated = validate(key)?;
        match validated.to_str() {
            Some(normalized) => Ok(Self(normalized.to_string())),
            None => exn::bail!(ErrorKind::InvalidPath(validated)),
        }
    }

    /// The monthly partition containing `at` (UTC).
    pub fn for_month(at: UtcDateTime) -> Self {
        Self(format!("{:04}-{:02}", at.year(), u8::from(at.month())))
    }

    pub fn is_legacy(&self) -> bool {
        self.0 == Self::LEGACY
    }

    /// The same partition nested below `prefix`.
    pub fn nested_under(&self, prefix: &str) -> Result<Self> {
        Self::new(format!("{prefix}/{}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

/// Immutable handle to one committed snapshot (a commit hash).
#[derive(Debug, Clone, Display, PartialEq, Eq, Hash)]
#[display("{_0}")]
pub struct CommitId(String);

impl CommitId {
    /// Accepts abbreviated or full hexadecimal object names.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref().trim();
        if id.len() < 4 || id.len() > 64 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            exn::bail!(ErrorKind::InvalidCommitId(id.to_string()));
        }
        Ok(Self(id.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    #[rstest]
    #[case(datetime!(2024-05-31 23:59:59 UTC), "2024-05")]
    #[case(datetime!(2009-01-01 00:00:00 UTC), "2009-01")]
    fn test_for_month(#[case] at: time::OffsetDateTime, #[case] expected: &str) {
        assert_eq!(Partition::for_month(at.to_utc()).as_str(), expected);
    }

    #[test]
    fn test_nested_under() {
        let partition = Partition::new("2014-03").unwrap();
        assert_eq!(partition.nested_under("migrated").unwrap().as_str(), "migrated/2014-03");
        assert!(partition.nested_under("..").is_err());
    }

    #[test]
    fn test_legacy() {
        assert!(Partition::new("old").unwrap().is_legacy());
        assert!(!Partition::new("2014-03").unwrap().is_legacy());
    }

    #[rstest]
    #[case("0123abcd", true)]
    #[case("0123ABCD", true)]
    #[case("abc", false)]
    #[case("--help", false)]
    #[case("HEAD", false)]
    fn test_commit_id(#[case] id: &str, #[case] valid: bool) {
        assert_eq!(CommitId::new(id).is_ok(), valid);
    }
}
