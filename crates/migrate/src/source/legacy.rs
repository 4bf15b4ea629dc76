//! The legacy SQLite database and snapshot repositories.

use super::{LegacyArticle, LegacyRecord, LegacyVersion, SourceDataset};
use crate::error::{ErrorKind, Result};
use crate::zone::LocalZone;
use async_trait::async_trait;
use exn::ResultExt;
use presswatch_storage::{CommitId, Partition, StoreHandle, article_path};
use presswatch_text::DiffStats;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use tracing::instrument;

#[derive(sqlx::FromRow)]
struct ArticleRow {
    id: i64,
    url: String,
    initial_date: String,
    last_update: Option<String>,
    last_check: Option<String>,
    git_dir: String,
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: i64,
    article_id: i64,
    v: String,
    title: String,
    byline: String,
    date: String,
    boring: bool,
    diff_json: Option<String>,
}

/// Legacy metadata in a read-only SQLite database, with snapshot text served
/// from the legacy repositories.
pub struct LegacyDataset {
    pool: SqlitePool,
    snapshots: StoreHandle,
    zone: LocalZone,
}

impl LegacyDataset {
    /// Open the legacy database at `path` read-only.
    pub async fn open(path: impl AsRef<Path>, snapshots: StoreHandle, zone: LocalZone) -> Result<Self> {
        let options = SqliteConnectOptions::new().filename(path.as_ref()).read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Source)?;
        Ok(Self::new(pool, snapshots, zone))
    }

    pub fn new(pool: SqlitePool, snapshots: StoreHandle, zone: LocalZone) -> Self {
        Self { pool, snapshots, zone }
    }

    fn article(&self, row: ArticleRow) -> Result<LegacyArticle> {
        let partition = Partition::new(&row.git_dir).or_raise(|| ErrorKind::Source)?;
        Ok(LegacyArticle {
            id: row.id,
            url: row.url,
            initial_date: self.zone.parse(&row.initial_date)?,
            last_update: row.last_update.as_deref().map(|at| self.zone.parse(at)).transpose()?,
            last_check: row.last_check.as_deref().map(|at| self.zone.parse(at)).transpose()?,
            partition,
        })
    }

    fn version(&self, row: VersionRow) -> Result<LegacyVersion> {
        let diff = row.diff_json.as_deref().and_then(|json| match serde_json::from_str::<DiffStats>(json) {
            Ok(diff) => Some(diff),
            Err(err) => {
                tracing::debug!(version = row.id, error = %err, "Ignoring unreadable diff statistics");
                None
            },
        });
        Ok(LegacyVersion {
            id: row.id,
            commit: row.v,
            title: row.title,
            byline: row.byline,
            captured_at: self.zone.parse(&row.date)?,
            boring: row.boring,
            diff,
        })
    }
}

#[async_trait]
impl SourceDataset for LegacyDataset {
    #[instrument(skip(self))]
    async fn batch(&self, from: i64, limit: u32) -> Result<Vec<LegacyRecord>> {
        let articles: Vec<ArticleRow> = sqlx::query_as(include_str!("../../queries/legacy_articles.sql"))
            .bind(from)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Source)?;
        let (Some(first), Some(last)) = (articles.first(), articles.last()) else {
            return Ok(Vec::new());
        };
        let versions: Vec<VersionRow> = sqlx::query_as(include_str!("../../queries/legacy_versions.sql"))
            .bind(first.id)
            .bind(last.id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Source)?;

        let mut by_article: HashMap<i64, Vec<LegacyVersion>> = HashMap::new();
        for row in versions {
            let article_id = row.article_id;
            by_article.entry(article_id).or_default().push(self.version(row)?);
        }
        articles
            .into_iter()
            .map(|row| -> Result<LegacyRecord> {
                let article = self.article(row)?;
                let mut versions = by_article.remove(&article.id).unwrap_or_default();
                // Local-time ordering can differ from UTC ordering around a
                // change back from daylight time.
                versions.sort_by_key(|version| (version.captured_at, version.id));
                Ok(LegacyRecord { article, versions })
            })
            .collect()
    }

    async fn text(&self, article: &LegacyArticle, version: &LegacyVersion) -> Result<Option<Vec<u8>>> {
        let Ok(commit) = CommitId::new(&version.commit) else {
            tracing::warn!(version = version.id, commit = version.commit, "Legacy version has no usable commit");
            return Ok(None);
        };
        let Ok(path) = article_path(&article.url) else {
            tracing::warn!(article = article.id, url = article.url, "Legacy article URL has no snapshot path");
            return Ok(None);
        };
        self.snapshots
            .read_at(&article.partition, &commit, &path)
            .await
            .or_raise(|| ErrorKind::Source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presswatch_storage::backend::MockStore;
    use presswatch_storage::{CommitOutcome, VersionStore};
    use std::sync::Arc;
    use time::macros::utc_datetime;

    const SCHEMA: &str = r#"
        CREATE TABLE Articles (
            id INTEGER PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            initial_date TEXT NOT NULL,
            last_update TEXT,
            last_check TEXT,
            git_dir TEXT NOT NULL
        );
        CREATE TABLE version (
            id INTEGER PRIMARY KEY,
            article_id INTEGER NOT NULL REFERENCES Articles (id),
            v TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            byline TEXT NOT NULL,
            date TEXT NOT NULL,
            boring INTEGER NOT NULL DEFAULT 0,
            diff_json TEXT
        );
    "#;

    async fn legacy_pool() -> SqlitePool {
        let options = SqliteConnectOptions::new().filename(":memory:");
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await.unwrap();
        sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();
        pool
    }

    async fn insert_article(pool: &SqlitePool, id: i64, url: &str, initial_date: &str, git_dir: &str) {
        sqlx::query("INSERT INTO Articles (id, url, initial_date, last_check, git_dir) VALUES (?, ?, ?, ?, ?)")
            .bind(id)
            .bind(url)
            .bind(initial_date)
            .bind(initial_date)
            .bind(git_dir)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn insert_version(pool: &SqlitePool, id: i64, article_id: i64, v: &str, date: &str, diff: Option<&str>) {
        sqlx::query(
            "INSERT INTO version (id, article_id, v, title, byline, date, diff_json)
             VALUES (?, ?, ?, 'T', 'B', ?, ?)",
        )
            .bind(id)
            .bind(article_id)
            .bind(v)
            .bind(date)
            .bind(diff)
            .execute(pool)
            .await
            .unwrap();
    }

    fn dataset(pool: SqlitePool, snapshots: Arc<MockStore>) -> LegacyDataset {
        LegacyDataset::new(pool, snapshots, LocalZone::new("America/New_York").unwrap())
    }

    #[tokio::test]
    async fn test_batch_groups_versions_and_converts_times() {
        let pool = legacy_pool().await;
        insert_article(&pool, 1, "http://www.example.com/a", "2013-06-01 08:00:00", "old").await;
        insert_article(&pool, 2, "http://www.example.com/b", "2013-06-02 08:00:00.5", "2013-06").await;
        insert_article(&pool, 3, "http://www.example.com/c", "2013-06-03 08:00:00", "2013-06").await;
        insert_version(&pool, 10, 1, "aaaa", "2013-06-01 09:00:00", None).await;
        insert_version(&pool, 11, 2, "bbbb", "2013-06-02 10:00:00", None).await;
        insert_version(&pool, 12, 1, "cccc", "2013-06-01 08:30:00", Some(r#"{"chars_added": 3, "chars_removed": 1}"#))
            .await;
        insert_version(&pool, 13, 3, "dddd", "2013-06-03 09:00:00", Some("not json")).await;

        let dataset = dataset(pool, Arc::new(MockStore::default()));
        let batch = dataset.batch(1, 2).await.unwrap();
        assert_eq!(batch.len(), 2);
        let first = &batch[0];
        assert_eq!(first.article.initial_date, utc_datetime!(2013-06-01 12:00));
        assert!(first.article.partition.is_legacy());
        assert_eq!(first.versions.iter().map(|v| v.id).collect::<Vec<_>>(), vec![12, 10]);
        assert_eq!(first.versions[0].diff, Some(DiffStats { chars_added: 3, chars_removed: 1 }));
        assert_eq!(batch[1].article.initial_date, utc_datetime!(2013-06-02 12:00:00.5));

        let rest = dataset.batch(3, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].versions[0].diff, None);
        assert!(dataset.batch(4, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_text_reads_legacy_repository() {
        let snapshots = Arc::new(MockStore::default());
        let partition = Partition::new("old").unwrap();
        let url = "http://www.example.com/a";
        snapshots.ensure_repository(&partition).await.unwrap();
        let CommitOutcome::Created(commit) = snapshots
            .commit(&partition, &article_path(url).unwrap(), b"legacy text", "Adding file")
            .await
            .unwrap()
        else {
            panic!("expected a commit");
        };

        let pool = legacy_pool().await;
        insert_article(&pool, 1, url, "2013-06-01 08:00:00", "old").await;
        insert_version(&pool, 10, 1, commit.as_str(), "2013-06-01 09:00:00", None).await;
        insert_version(&pool, 11, 1, "not-a-hash", "2013-06-01 10:00:00", None).await;
        insert_version(&pool, 12, 1, "abcdef12", "2013-06-01 11:00:00", None).await;

        let dataset = dataset(pool, snapshots);
        let record = dataset.batch(0, 10).await.unwrap().remove(0);
        let texts = [
            dataset.text(&record.article, &record.versions[0]).await.unwrap(),
            dataset.text(&record.article, &record.versions[1]).await.unwrap(),
            dataset.text(&record.article, &record.versions[2]).await.unwrap(),
        ];
        assert_eq!(texts, [Some(b"legacy text".to_vec()), None, None]);
    }
}
