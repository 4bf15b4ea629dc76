//! Batched, resumable migration of the whole legacy dataset.

use crate::error::{Error, ErrorKind, Result, from_store};
use crate::merge::{MergeReport, Merger};
use crate::source::SourceHandle;
use exn::ResultExt;
use presswatch_config::MigrateConfig;
use presswatch_metadata::{MigrationIssue, Repository};
use presswatch_storage::{Partition, StoreHandle};
use std::time::{Duration, Instant};
use time::UtcDateTime;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Name the legacy migration's watermark is stored under.
pub const WATERMARK: &str = "legacy";

#[derive(Debug, Clone)]
pub struct Settings {
    pub watermark: String,
    pub partition_prefix: String,
    pub batch_size: u32,
    pub compact_every: u32,
    pub repeat_guard: Duration,
}

impl From<&MigrateConfig> for Settings {
    fn from(config: &MigrateConfig) -> Self {
        Self {
            watermark: WATERMARK.to_string(),
            partition_prefix: config.partition_prefix.clone(),
            batch_size: config.batch_size,
            compact_every: config.compact_every,
            repeat_guard: config.repeat_guard(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub batches: usize,
    pub articles: usize,
    /// Legacy articles first seen after live tracking began.
    pub after_cutoff: usize,
    pub replayed: usize,
    pub already_migrated: usize,
    pub unavailable: usize,
    pub covered: usize,
    /// Articles abandoned on a consistency error.
    pub issues: usize,
    pub interrupted: bool,
}

impl RunReport {
    fn add(&mut self, merged: MergeReport) {
        self.replayed += merged.replayed;
        self.already_migrated += merged.already_migrated;
        self.unavailable += merged.unavailable;
        self.covered += merged.covered;
    }
}

/// Where a batch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEnd {
    /// Smallest legacy article id not yet processed.
    pub watermark: i64,
    pub exhausted: bool,
    pub interrupted: bool,
}

/// Decides when a target partition is due for compaction: after every
/// `every` articles and whenever the target changes.
#[derive(Debug)]
struct Compactor {
    current: Option<Partition>,
    since: u32,
    every: u32,
}

impl Compactor {
    fn new(every: u32) -> Self {
        Self { current: None, since: 0, every: every.max(1) }
    }

    /// Record that the next article goes to `next`; returns the partition to
    /// compact first, if any.
    fn before(&mut self, next: &Partition) -> Option<Partition> {
        let due = self.current.as_ref().filter(|current| *current != next || self.since >= self.every).cloned();
        if due.is_some() {
            self.since = 0;
        }
        self.since += 1;
        self.current = Some(next.clone());
        due
    }

    fn finish(&mut self) -> Option<Partition> {
        self.since = 0;
        self.current.take()
    }
}

pub struct Migration {
    merger: Merger,
    store: StoreHandle,
    repo: Repository,
    source: SourceHandle,
    settings: Settings,
}

impl Migration {
    pub fn new(store: StoreHandle, repo: Repository, source: SourceHandle, settings: Settings) -> Self {
        let merger = Merger::new(store.clone(), repo.clone(), source.clone(), settings.partition_prefix.clone());
        Self { merger, store, repo, source, settings }
    }

    /// Migrate from the stored watermark to the end of the dataset, or until
    /// `cancel` fires.
    #[instrument(skip_all, fields(watermark_name = %self.settings.watermark))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let cutoff = self.repo.migration_cutoff().await.or_raise(|| ErrorKind::Metadata)?;
        let stored = self.repo.load_watermark(&self.settings.watermark).await.or_raise(|| ErrorKind::Metadata)?;
        let mut watermark = stored.unwrap_or(0);
        tracing::info!(watermark, cutoff = ?cutoff, "Starting legacy migration");

        let mut report = RunReport::default();
        let mut compactor = Compactor::new(self.settings.compact_every);
        loop {
            let end = self.run_batch(watermark, cutoff, cancel, &mut compactor, &mut report).await?;
            if end.watermark != watermark {
                self.repo
                    .save_watermark(&self.settings.watermark, end.watermark)
                    .await
                    .or_raise(|| ErrorKind::Metadata)?;
                watermark = end.watermark;
            }
            if end.interrupted {
                tracing::warn!(watermark, "Migration interrupted");
                report.interrupted = true;
                break;
            }
            if end.exhausted {
                break;
            }
        }
        if let Some(partition) = compactor.finish() {
            self.store.compact(&partition).await.map_err(from_store)?;
        }
        tracing::info!(
            articles = report.articles,
            replayed = report.replayed,
            issues = report.issues,
            watermark,
            "Legacy migration finished"
        );
        Ok(report)
    }

    /// Merge the next batch of legacy articles starting at id `from`.
    async fn run_batch(
        &self,
        from: i64,
        cutoff: Option<UtcDateTime>,
        cancel: &CancellationToken,
        compactor: &mut Compactor,
        report: &mut RunReport,
    ) -> Result<BatchEnd> {
        let records = self.source.batch(from, self.settings.batch_size).await?;
        if records.is_empty() {
            return Ok(BatchEnd { watermark: from, exhausted: true, interrupted: false });
        }
        report.batches += 1;
        tracing::debug!(from, size = records.len(), "Migrating batch");

        let mut watermark = from;
        for record in &records {
            if cancel.is_cancelled() {
                return Ok(BatchEnd { watermark, exhausted: false, interrupted: true });
            }
            if cutoff.is_some_and(|cutoff| record.article.initial_date >= cutoff) {
                report.after_cutoff += 1;
            } else {
                let target = self.merger.target_partition(&record.article)?;
                if let Some(partition) = compactor.before(&target) {
                    self.store.compact(&partition).await.map_err(from_store)?;
                }
                match self.merger.merge(record).await {
                    Ok(merged) => report.add(merged),
                    Err(err) => self.abandon(err, report).await?,
                }
                report.articles += 1;
            }
            watermark = record.article.id + 1;
        }
        Ok(BatchEnd { watermark, exhausted: false, interrupted: false })
    }

    /// Log and persist a consistency failure; any other error is returned.
    async fn abandon(&self, err: Error, report: &mut RunReport) -> Result<()> {
        let Some(issue) = issue(&err) else {
            return Err(err);
        };
        tracing::error!(
            legacy_article = issue.legacy_article_id,
            legacy_version = ?issue.legacy_version_id,
            live_article = ?issue.live_article_id,
            commit = ?issue.commit,
            error = ?err,
            "Abandoning legacy article"
        );
        self.repo.record_migration_issue(&issue).await.or_raise(|| ErrorKind::Metadata)?;
        report.issues += 1;
        Ok(())
    }

    /// Repeat [`run`](Self::run) until it completes.
    ///
    /// Fatal errors stop immediately. Other failures start over from the
    /// stored watermark, unless the previous failure (or the start) was less
    /// than the repeat guard ago.
    pub async fn run_until_done(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let mut last_failure = Instant::now();
        loop {
            let err = match self.run(cancel).await {
                Ok(report) => return Ok(report),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => err,
            };
            if last_failure.elapsed() < self.settings.repeat_guard {
                tracing::error!(error = ?err, "Migration failed again too soon, giving up");
                return Err(err.raise(ErrorKind::RepeatedFailure));
            }
            tracing::warn!(error = ?err, retryable = err.is_retryable(), "Migration failed, starting over");
            last_failure = Instant::now();
        }
    }
}

fn issue(err: &Error) -> Option<MigrationIssue> {
    let ErrorKind::Consistency { legacy_article, legacy_version, live_article, live_version, commit, .. } = &**err
    else {
        return None;
    };
    Some(MigrationIssue {
        legacy_article_id: *legacy_article,
        legacy_version_id: Some(*legacy_version),
        live_article_id: Some(*live_article),
        live_version_id: *live_version,
        commit: commit.clone(),
        message: (**err).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::tests::Fixture;
    use crate::source::tests::{legacy_article, legacy_version};
    use presswatch_metadata::NewArticle;
    use presswatch_storage::{VersionStore, article_path};
    use time::macros::utc_datetime;

    const START: UtcDateTime = utc_datetime!(2013-06-01 12:00);

    fn settings(compact_every: u32, repeat_guard: Duration) -> Settings {
        Settings {
            watermark: WATERMARK.to_string(),
            partition_prefix: "migrated".to_string(),
            batch_size: 2,
            compact_every,
            repeat_guard,
        }
    }

    fn migration(fixture: &Fixture, settings: Settings) -> Migration {
        Migration::new(fixture.store.clone(), fixture.repo.clone(), fixture.source.clone(), settings)
    }

    fn url(id: i64) -> String {
        format!("http://www.example.com/story-{id}")
    }

    /// Legacy article `id` with a single version holding `text`.
    fn add_legacy(fixture: &Fixture, id: i64, text: &str) {
        let article = legacy_article(id, &url(id), START, "old");
        fixture.source.add(article, vec![(legacy_version(id * 100, START), Some(text))]);
    }

    #[test]
    fn test_compactor() {
        let a = Partition::new("migrated/2013-06").unwrap();
        let b = Partition::new("migrated/2013-07").unwrap();
        let mut compactor = Compactor::new(2);
        assert_eq!(compactor.before(&a), None);
        assert_eq!(compactor.before(&a), None);
        assert_eq!(compactor.before(&a), Some(a.clone()));
        assert_eq!(compactor.before(&b), Some(a.clone()));
        assert_eq!(compactor.finish(), Some(b));
        assert_eq!(compactor.finish(), None);
    }

    #[tokio::test]
    async fn test_run_migrates_everything_and_resumes_from_watermark() {
        let fixture = Fixture::new().await;
        for id in 1..=5 {
            add_legacy(&fixture, id, &format!("text {id}"));
        }
        let migration = migration(&fixture, settings(20, Duration::ZERO));
        let report = migration.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.articles, 5);
        assert_eq!(report.replayed, 5);
        assert_eq!(report.batches, 3);
        assert_eq!(fixture.repo.load_watermark(WATERMARK).await.unwrap(), Some(6));
        let partition = Partition::new("migrated/2013-06").unwrap();
        assert_eq!(fixture.store.compactions(&partition).await, 1);

        add_legacy(&fixture, 6, "text 6");
        let again = migration.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(again.articles, 1);
        assert_eq!(fixture.repo.count_versions().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_compacts_every_few_articles() {
        let fixture = Fixture::new().await;
        for id in 1..=3 {
            add_legacy(&fixture, id, "text");
        }
        migration(&fixture, settings(1, Duration::ZERO)).run(&CancellationToken::new()).await.unwrap();
        let partition = Partition::new("migrated/2013-06").unwrap();
        assert_eq!(fixture.store.compactions(&partition).await, 3);
    }

    #[tokio::test]
    async fn test_articles_after_cutoff_are_left_alone() {
        let fixture = Fixture::new().await;
        fixture.repo.insert_article(&NewArticle::discovered("http://www.example.com/live", START)).await.unwrap();
        add_legacy(&fixture, 1, "before");
        let late = legacy_article(2, &url(2), START + time::Duration::days(1), "old");
        fixture.source.add(late, vec![(legacy_version(200, START), Some("after"))]);
        fixture.source.add(legacy_article(0, &url(0), START - time::Duration::days(1), "old"), vec![]);

        let report = migration(&fixture, settings(20, Duration::ZERO)).run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.articles, 1);
        assert_eq!(report.after_cutoff, 2);
        assert!(fixture.repo.get_article_by_url(url(0)).await.unwrap().is_some());
        assert!(fixture.repo.get_article_by_url(url(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consistency_failures_are_recorded_and_skipped() {
        let fixture = Fixture::new().await;
        add_legacy(&fixture, 1, "orphan");
        add_legacy(&fixture, 2, "fine");
        let target = Partition::new("migrated/2013-06").unwrap();
        fixture.store.ensure_repository(&target).await.unwrap();
        let path = article_path(&url(1)).unwrap();
        fixture.store.commit(&target, &path, b"orphan", "Migrating").await.unwrap();

        let report = migration(&fixture, settings(20, Duration::ZERO)).run(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.issues, 1);
        assert_eq!(report.replayed, 1);
        assert_eq!(fixture.repo.count_migration_issues(1).await.unwrap(), 1);
        assert_eq!(fixture.repo.load_watermark(WATERMARK).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_cancelled_run_keeps_watermark() {
        let fixture = Fixture::new().await;
        add_legacy(&fixture, 1, "text");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = migration(&fixture, settings(20, Duration::ZERO)).run(&cancel).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.articles, 0);
        assert_eq!(fixture.repo.load_watermark(WATERMARK).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_until_done_retries() {
        let fixture = Fixture::new().await;
        add_legacy(&fixture, 1, "text");
        fixture.source.fail_next(1);
        let report = migration(&fixture, settings(20, Duration::ZERO))
            .run_until_done(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.articles, 1);
    }

    #[tokio::test]
    async fn test_run_until_done_guards_against_repeated_failure() {
        let fixture = Fixture::new().await;
        add_legacy(&fixture, 1, "text");
        fixture.source.fail_next(1);
        let err = migration(&fixture, settings(20, Duration::from_secs(3600)))
            .run_until_done(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::RepeatedFailure));
        assert!(err.is_fatal());
    }
}
