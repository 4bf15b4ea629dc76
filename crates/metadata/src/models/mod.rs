mod article;
mod issue;
mod version;

pub use self::article::{Article, NewArticle};
pub(crate) use self::article::{ArticleRow, NewArticleRow};
pub use self::issue::MigrationIssue;
pub use self::version::{MigratedFrom, NewVersion, Version};
pub(crate) use self::version::{NewVersionRow, VersionRow};

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::UtcDateTime;

pub(crate) fn to_timestamp(at: UtcDateTime) -> i64 {
    at.unix_timestamp()
}

pub(crate) fn from_timestamp(ts: i64, what: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(ts).or_raise(|| ErrorKind::InvalidData(what))
}

pub(crate) fn from_optional_timestamp(ts: Option<i64>, what: &'static str) -> Result<Option<UtcDateTime>> {
    ts.map(|ts| from_timestamp(ts, what)).transpose()
}
