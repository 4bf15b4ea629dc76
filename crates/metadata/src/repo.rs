//! Repository for articles, their versions, and migration bookkeeping.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{
    Article, ArticleRow, MigrationIssue, NewArticle, NewArticleRow, NewVersion, NewVersionRow, Version, VersionRow,
    from_optional_timestamp, to_timestamp,
};
use exn::{OptionExt, ResultExt};
use presswatch_storage::{CommitId, Partition};
use sqlx::SqlitePool;
use time::UtcDateTime;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Articles
    // =========================================================================

    #[instrument(skip(self, article), fields(url = %article.url))]
    pub async fn insert_article(&self, article: &NewArticle) -> Result<Article> {
        let row = NewArticleRow::from(article);
        let inserted: ArticleRow = sqlx::query_as(include_str!("../queries/insert_article.sql"))
            .bind(row.url)
            .bind(row.initial_date)
            .bind(row.last_update)
            .bind(row.last_check)
            .bind(row.partition)
            .bind(row.is_migrated)
            .bind(row.migrated_article_id)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        inserted.try_into()
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let row: Option<ArticleRow> = sqlx::query_as(include_str!("../queries/get_article.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.try_into()).transpose()
    }

    /// Like [`get_article`](Self::get_article), but a missing article is an error.
    pub async fn require_article(&self, id: i64) -> Result<Article> {
        self.get_article(id).await?.ok_or_raise(|| ErrorKind::ArticleNotFound(id))
    }

    pub async fn get_article_by_url(&self, url: impl AsRef<str>) -> Result<Option<Article>> {
        let row: Option<ArticleRow> = sqlx::query_as(include_str!("../queries/get_article_by_url.sql"))
            .bind(url.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.try_into()).transpose()
    }

    pub async fn article_exists(&self, url: impl AsRef<str>) -> Result<bool> {
        sqlx::query_scalar(include_str!("../queries/article_exists.sql"))
            .bind(url.as_ref())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// The live article created from a legacy article, if any.
    pub async fn get_article_by_migrated_id(&self, legacy_article_id: i64) -> Result<Option<Article>> {
        let row: Option<ArticleRow> = sqlx::query_as(include_str!("../queries/get_article_by_migrated_id.sql"))
            .bind(legacy_article_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.try_into()).transpose()
    }

    /// Persist the check and update times of an article.
    pub async fn save_article_state(&self, article: &Article) -> Result<()> {
        let result = sqlx::query(include_str!("../queries/update_article_state.sql"))
            .bind(article.last_check.map(to_timestamp))
            .bind(article.last_update.map(to_timestamp))
            .bind(article.id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::ArticleNotFound(article.id));
        }
        Ok(())
    }

    /// Articles eligible for a recheck.
    ///
    /// With a `horizon`, only articles updated (or first seen) after it are
    /// returned; without one every article is. Articles in the legacy bucket
    /// are never returned.
    pub async fn list_recheck_candidates(&self, horizon: Option<UtcDateTime>) -> Result<Vec<Article>> {
        let rows: Vec<ArticleRow> = sqlx::query_as(include_str!("../queries/list_recheck_candidates.sql"))
            .bind(Partition::LEGACY)
            .bind(horizon.map(to_timestamp))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// The earliest first-seen date among live (non-migrated) articles.
    ///
    /// Legacy articles first seen before this moment cannot exist in the live
    /// system and are carried across without a merge.
    pub async fn migration_cutoff(&self) -> Result<Option<UtcDateTime>> {
        let cutoff: Option<i64> = sqlx::query_scalar(include_str!("../queries/migration_cutoff.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        from_optional_timestamp(cutoff, "migration cutoff")
    }

    // =========================================================================
    // Versions
    // =========================================================================

    #[instrument(skip(self, version), fields(article = version.article_id, commit = %version.commit))]
    pub async fn insert_version(&self, version: &NewVersion) -> Result<Version> {
        let row = NewVersionRow::try_from(version)?;
        let inserted: VersionRow = sqlx::query_as(include_str!("../queries/insert_version.sql"))
            .bind(row.article_id)
            .bind(row.commit_id)
            .bind(row.partition)
            .bind(row.title)
            .bind(row.byline)
            .bind(row.captured_at)
            .bind(row.boring)
            .bind(row.diff_json)
            .bind(row.is_migrated)
            .bind(row.migrated_commit_id)
            .bind(row.migrated_version_id)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        inserted.try_into()
    }

    pub async fn get_version(&self, id: i64) -> Result<Option<Version>> {
        let row: Option<VersionRow> = sqlx::query_as(include_str!("../queries/get_version.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.try_into()).transpose()
    }

    /// All versions of an article, oldest first.
    pub async fn versions_for_article(&self, article_id: i64) -> Result<Vec<Version>> {
        let rows: Vec<VersionRow> = sqlx::query_as(include_str!("../queries/list_versions_for_article.sql"))
            .bind(article_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// The earliest version of an article that was scraped by the live
    /// system rather than replayed from the legacy one.
    pub async fn earliest_live_version(&self, article_id: i64) -> Result<Option<Version>> {
        let row: Option<VersionRow> = sqlx::query_as(include_str!("../queries/earliest_live_version.sql"))
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.try_into()).transpose()
    }

    /// The version replayed from the given legacy version, if any.
    pub async fn get_version_by_migrated_id(&self, legacy_version_id: i64) -> Result<Option<Version>> {
        let row: Option<VersionRow> = sqlx::query_as(include_str!("../queries/get_versions_by_migrated_id.sql"))
            .bind(legacy_version_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.try_into()).transpose()
    }

    pub async fn get_version_by_commit(&self, partition: &Partition, commit: &CommitId) -> Result<Option<Version>> {
        let row: Option<VersionRow> = sqlx::query_as(include_str!("../queries/get_version_by_commit.sql"))
            .bind(partition.as_str())
            .bind(commit.as_str())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.try_into()).transpose()
    }

    pub async fn count_versions(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/count_versions.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("version count"))
    }

    // =========================================================================
    // Migration bookkeeping
    // =========================================================================

    /// The highest legacy article id a migration has fully processed.
    pub async fn load_watermark(&self, name: &str) -> Result<Option<i64>> {
        sqlx::query_scalar(include_str!("../queries/load_watermark.sql"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    pub async fn save_watermark(&self, name: &str, watermark: i64) -> Result<()> {
        sqlx::query(include_str!("../queries/save_watermark.sql"))
            .bind(name)
            .bind(watermark)
            .bind(to_timestamp(UtcDateTime::now()))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn record_migration_issue(&self, issue: &MigrationIssue) -> Result<()> {
        sqlx::query(include_str!("../queries/insert_migration_issue.sql"))
            .bind(to_timestamp(UtcDateTime::now()))
            .bind(&issue.message)
            .bind(issue.legacy_article_id)
            .bind(issue.legacy_version_id)
            .bind(issue.live_article_id)
            .bind(issue.live_version_id)
            .bind(issue.commit.as_deref())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn count_migration_issues(&self, legacy_article_id: i64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/count_migration_issues.sql"))
            .bind(legacy_article_id)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("issue count"))
    }
}
