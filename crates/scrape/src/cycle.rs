//! One scrape cycle: discover, register, prioritize, maintain, recheck.

use crate::discover::dedupe;
use crate::error::{ErrorKind, Result};
use crate::parser::{FetchOutcome, ParserRegistry};
use crate::priority::select;
use exn::{OptionExt, ResultExt};
use presswatch_config::ScrapeConfig;
use presswatch_metadata::{Article, NewArticle, NewVersion, Repository};
use presswatch_storage::{CommitOutcome, Partition, StoreHandle, commit_message};
use presswatch_text::{Classification, Classifier};
use time::UtcDateTime;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Knobs of the scrape cycle.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Articles with no activity for this long are no longer rechecked.
    pub retention: time::Duration,
    /// Longer URLs are skipped at registration.
    pub max_url_length: usize,
    pub diff_timeout: std::time::Duration,
}

impl From<&ScrapeConfig> for Settings {
    fn from(config: &ScrapeConfig) -> Self {
        Self {
            retention: time::Duration::days(i64::from(config.retention_days)),
            max_url_length: config.max_url_length,
            diff_timeout: config.diff_timeout(),
        }
    }
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub discovered: u64,
    pub registered: u64,
    pub skipped_too_long: u64,
    pub selected: u64,
    pub committed: u64,
    pub unchanged: u64,
    pub boring: u64,
    pub not_articles: u64,
    pub failed: u64,
    /// Cancellation stopped the recheck phase early.
    pub interrupted: bool,
}

/// Outcome of rechecking one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recheck {
    Committed { version_id: i64, boring: bool },
    /// The snapshot is byte-identical to the committed one.
    Unchanged,
    NotAnArticle,
    Gone,
}

pub struct Scraper {
    store: StoreHandle,
    repo: Repository,
    parsers: ParserRegistry,
    classifier: Classifier,
    settings: Settings,
}

impl Scraper {
    pub fn new(store: StoreHandle, repo: Repository, parsers: ParserRegistry, settings: Settings) -> Self {
        let classifier = Classifier::new(settings.diff_timeout);
        Self { store, repo, parsers, classifier, settings }
    }

    /// Run one full cycle.
    ///
    /// Failures while discovering, registering or maintaining abort the cycle.
    /// Failures while rechecking a single article are logged, counted, and
    /// the cycle moves on. Cancellation is honoured between articles.
    #[instrument(skip(self, cancel), fields(store = self.store.name()))]
    pub async fn run_cycle(&self, update_all: bool, cancel: &CancellationToken) -> Result<CycleReport> {
        let now = UtcDateTime::now();
        let current = Partition::for_month(now);
        let mut report = CycleReport::default();

        let cleared = self.store.clear_stale_locks().await.or_raise(|| ErrorKind::Maintenance)?;
        if cleared > 0 {
            tracing::warn!(cleared, "Removed stale lock files");
        }
        self.store.ensure_repository(&current).await.or_raise(|| ErrorKind::Maintenance)?;

        let urls = self.discover().await?;
        report.discovered = urls.len() as u64;
        self.register(&urls, now, &mut report).await?;

        let candidates = self.candidates(now, update_all).await?;
        let eligible = candidates.len();
        let selected = select(candidates, now, update_all);
        report.selected = selected.len() as u64;
        tracing::info!(selected = selected.len(), eligible, "Articles passed the filter");

        // Compact before rechecking so it happens even if the cycle is killed.
        tracing::info!(partition = %current, "Starting garbage collection");
        self.store.compact(&current).await.or_raise(|| ErrorKind::Maintenance)?;

        let total = selected.len();
        for (index, article) in selected.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(remaining = total - index, "Cycle interrupted");
                report.interrupted = true;
                break;
            }
            tracing::debug!(article = article.id, position = index + 1, total, url = %article.url, "Checking article");
            self.recheck_isolated(article, &mut report).await;
        }
        tracing::info!(?report, "Cycle finished");
        Ok(report)
    }

    #[instrument(skip(self))]
    async fn discover(&self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        for parser in self.parsers.parsers() {
            let found = parser.feed_urls().await.or_raise(|| ErrorKind::Discovery)?;
            tracing::debug!(parser = parser.name(), found = found.len(), "Collected feed URLs");
            urls.extend(found);
        }
        let urls = dedupe(urls);
        tracing::info!(found = urls.len(), "Discovered article URLs");
        Ok(urls)
    }

    #[instrument(skip(self, urls, report), fields(urls = urls.len()))]
    async fn register(&self, urls: &[String], now: UtcDateTime, report: &mut CycleReport) -> Result<()> {
        for url in urls {
            if url.chars().count() > self.settings.max_url_length {
                tracing::debug!(url, "Skipping URL because it is too long");
                report.skipped_too_long += 1;
                continue;
            }
            if self.repo.article_exists(url).await.or_raise(|| ErrorKind::Metadata)? {
                continue;
            }
            let article = self
                .repo
                .insert_article(&NewArticle::discovered(url.as_str(), now))
                .await
                .or_raise(|| ErrorKind::Metadata)?;
            tracing::debug!(article = article.id, url, "Added article");
            report.registered += 1;
        }
        tracing::info!(added = report.registered, skipped = report.skipped_too_long, "Registered new URLs");
        Ok(())
    }

    async fn candidates(&self, now: UtcDateTime, update_all: bool) -> Result<Vec<Article>> {
        let horizon = (!update_all).then(|| now - self.settings.retention);
        self.repo.list_recheck_candidates(horizon).await.or_raise(|| ErrorKind::Metadata)
    }

    /// Recheck one article, absorbing its failure into the report.
    ///
    /// The last check time is recorded whatever the outcome.
    async fn recheck_isolated(&self, mut article: Article, report: &mut CycleReport) {
        article.last_check = Some(UtcDateTime::now());
        match self.recheck(&mut article).await {
            Ok(Recheck::Committed { boring, .. }) => {
                report.committed += 1;
                if boring {
                    report.boring += 1;
                }
            },
            Ok(Recheck::Unchanged) => report.unchanged += 1,
            Ok(Recheck::NotAnArticle | Recheck::Gone) => report.not_articles += 1,
            Err(err) => {
                report.failed += 1;
                tracing::error!(article = article.id, url = %article.url, error = ?err, "Failed to update article");
            },
        }
        if let Err(err) = self.repo.save_article_state(&article).await {
            report.failed += 1;
            tracing::error!(article = article.id, error = ?err, "Failed to record article check");
        }
    }

    /// Fetch an article and commit a new snapshot if it changed.
    ///
    /// Updates `article.last_update` in memory when the change is not boring;
    /// persisting the article is left to the caller.
    #[instrument(skip(self, article), fields(article = article.id, url = %article.url))]
    pub async fn recheck(&self, article: &mut Article) -> Result<Recheck> {
        let parser = self
            .parsers
            .for_url(&article.url)
            .ok_or_raise(|| ErrorKind::NoParser(article.url.clone()))?;
        let fetched = match parser.fetch(&article.url).await? {
            FetchOutcome::Article(fetched) => fetched,
            FetchOutcome::NotAnArticle => {
                tracing::debug!("Not a real article");
                return Ok(Recheck::NotAnArticle);
            },
            FetchOutcome::Gone => return Ok(Recheck::Gone),
        };
        let snapshot = fetched.snapshot();
        let path = article.filename().or_raise(|| ErrorKind::Storage)?;
        let partition = &article.partition;
        self.store.ensure_repository(partition).await.or_raise(|| ErrorKind::Storage)?;

        let previous = self.store.read_current(partition, &path).await.or_raise(|| ErrorKind::Storage)?;
        let classification = match &previous {
            Some(previous) if *previous == snapshot => return Ok(Recheck::Unchanged),
            Some(previous) => self.classifier.classify(previous, &snapshot),
            None => Classification { boring: false, diff: None },
        };
        let message = commit_message(&path, previous.is_none());
        let outcome = self.store.commit(partition, &path, &snapshot, &message).await;
        let commit = match outcome.or_raise(|| ErrorKind::Storage)? {
            CommitOutcome::Created(commit) => commit,
            CommitOutcome::NoChange => return Ok(Recheck::Unchanged),
        };
        tracing::debug!(commit = %commit, boring = classification.boring, "Committed snapshot");

        let version = self
            .repo
            .insert_version(&NewVersion {
                article_id: article.id,
                commit,
                partition: partition.clone(),
                title: fetched.title,
                byline: fetched.byline,
                captured_at: fetched.captured_at,
                boring: classification.boring,
                diff: classification.diff,
                migrated: None,
            })
            .await
            .or_raise(|| ErrorKind::Metadata)?;
        tracing::info!(article = article.id, version = version.id, boring = version.boring, "Saved new version");
        if !classification.boring {
            article.last_update = Some(fetched.captured_at);
        }
        Ok(Recheck::Committed { version_id: version.id, boring: classification.boring })
    }
}
