use super::{from_optional_timestamp, from_timestamp, to_timestamp};
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use presswatch_storage::Partition;
use std::path::PathBuf;
use time::UtcDateTime;

/// A tracked article URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: i64,
    pub url: String,
    pub initial_date: UtcDateTime,
    /// When a snapshot last produced a new version.
    pub last_update: Option<UtcDateTime>,
    /// When the article was last fetched, whether or not it changed.
    pub last_check: Option<UtcDateTime>,
    /// The version store partition holding the article's live history.
    pub partition: Partition,
    pub is_migrated: bool,
    pub migrated_article_id: Option<i64>,
}

impl Article {
    /// Path of the article's snapshot inside its partition.
    pub fn filename(&self) -> presswatch_storage::error::Result<PathBuf> {
        presswatch_storage::article_path(&self.url)
    }

    /// The most recent moment the article is known to have changed.
    pub fn last_activity(&self) -> UtcDateTime {
        self.last_update.unwrap_or(self.initial_date)
    }
}

/// An article about to be registered.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub url: String,
    pub initial_date: UtcDateTime,
    pub partition: Partition,
    pub last_update: Option<UtcDateTime>,
    pub last_check: Option<UtcDateTime>,
    /// Set when the article is carried across from the legacy system.
    pub migrated_article_id: Option<i64>,
}

impl NewArticle {
    /// A freshly discovered article, partitioned by the month it was found.
    pub fn discovered(url: impl Into<String>, at: UtcDateTime) -> Self {
        Self {
            url: url.into(),
            initial_date: at,
            partition: Partition::for_month(at),
            last_update: None,
            last_check: None,
            migrated_article_id: None,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ArticleRow {
    id: i64,
    url: String,
    initial_date: i64,
    last_update: Option<i64>,
    last_check: Option<i64>,
    partition: String,
    is_migrated: bool,
    migrated_article_id: Option<i64>,
}

impl TryFrom<ArticleRow> for Article {
    type Error = Error;
    fn try_from(row: ArticleRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            url: row.url,
            initial_date: from_timestamp(row.initial_date, "initial date")?,
            last_update: from_optional_timestamp(row.last_update, "last update")?,
            last_check: from_optional_timestamp(row.last_check, "last check")?,
            partition: Partition::new(&row.partition).or_raise(|| ErrorKind::InvalidData("partition"))?,
            is_migrated: row.is_migrated,
            migrated_article_id: row.migrated_article_id,
        })
    }
}

pub(crate) struct NewArticleRow {
    pub(crate) url: String,
    pub(crate) initial_date: i64,
    pub(crate) last_update: Option<i64>,
    pub(crate) last_check: Option<i64>,
    pub(crate) partition: String,
    pub(crate) is_migrated: bool,
    pub(crate) migrated_article_id: Option<i64>,
}

impl From<&NewArticle> for NewArticleRow {
    fn from(article: &NewArticle) -> Self {
        Self {
            url: article.url.clone(),
            initial_date: to_timestamp(article.initial_date),
            last_update: article.last_update.map(to_timestamp),
            last_check: article.last_check.map(to_timestamp),
            partition: article.partition.as_str().to_string(),
            is_migrated: article.migrated_article_id.is_some(),
            migrated_article_id: article.migrated_article_id,
        }
    }
}
