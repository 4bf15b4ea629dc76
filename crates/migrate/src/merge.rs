//! Merging one legacy article's history into the live store.
//!
//! A legacy article whose URL is unknown live is created and its whole
//! history replayed. When the URL is already tracked, only the legacy
//! versions older than the first live version, and not identical to it, are
//! replayed: the backward scan from the last earlier legacy version skips
//! candidates whose text equals the first live snapshot, and everything up to
//! the first differing one is replayed. When every candidate matches, the
//! oldest legacy version alone is kept as an anchor.
//!
//! Replayed snapshots are committed into `<prefix>/<legacy partition>` so
//! the live repositories never have older content written over their head.

use crate::error::{ErrorKind, Result, from_store};
use crate::source::{LegacyArticle, LegacyRecord, LegacyVersion, SourceHandle};
use exn::ResultExt;
use presswatch_metadata::{Article, MigratedFrom, NewArticle, NewVersion, Repository};
use presswatch_storage::{CommitId, CommitOutcome, Partition, StoreHandle};
use std::path::Path;
use time::macros::format_description;
use tracing::instrument;

/// Which part of a legacy history to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    All,
    /// Versions `0..=index`.
    Through(usize),
}

impl Plan {
    fn select(self, versions: &[LegacyVersion]) -> &[LegacyVersion] {
        match self {
            Plan::All => versions,
            Plan::Through(index) => &versions[..=index.min(versions.len().saturating_sub(1))],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Legacy versions committed and recorded.
    pub replayed: usize,
    /// Legacy versions recorded by an earlier run.
    pub already_migrated: usize,
    /// Legacy versions whose text could not be retrieved.
    pub unavailable: usize,
    /// Legacy versions whose content was already committed under another
    /// migrated version.
    pub covered: usize,
}

pub struct Merger {
    store: StoreHandle,
    repo: Repository,
    source: SourceHandle,
    prefix: String,
}

impl Merger {
    pub fn new(store: StoreHandle, repo: Repository, source: SourceHandle, prefix: impl Into<String>) -> Self {
        Self { store, repo, source, prefix: prefix.into() }
    }

    /// Partition that replayed snapshots of `article` are committed into.
    pub fn target_partition(&self, article: &LegacyArticle) -> Result<Partition> {
        let base = match article.partition.is_legacy() {
            true => Partition::for_month(article.initial_date),
            false => article.partition.clone(),
        };
        base.nested_under(&self.prefix).map_err(from_store)
    }

    #[instrument(skip(self, record), fields(legacy = record.article.id, url = %record.article.url))]
    pub async fn merge(&self, record: &LegacyRecord) -> Result<MergeReport> {
        let target = self.target_partition(&record.article)?;
        let existing = self.repo.get_article_by_url(&record.article.url).await.or_raise(|| ErrorKind::Metadata)?;
        let (live, plan) = match existing {
            Some(live) => {
                let plan = self.plan(record, &live).await?;
                (live, plan)
            },
            None => (self.create_article(&record.article, &target).await?, Plan::All),
        };
        tracing::debug!(live = live.id, ?plan, versions = record.versions.len(), "Merging legacy history");
        self.replay(&record.article, &live, &target, plan.select(&record.versions)).await
    }

    async fn create_article(&self, legacy: &LegacyArticle, target: &Partition) -> Result<Article> {
        let article = NewArticle {
            url: legacy.url.clone(),
            initial_date: legacy.initial_date,
            partition: target.clone(),
            last_update: legacy.last_update,
            last_check: legacy.last_check,
            migrated_article_id: Some(legacy.id),
        };
        let created = self.repo.insert_article(&article).await.or_raise(|| ErrorKind::Metadata)?;
        tracing::info!(legacy = legacy.id, live = created.id, partition = %target, "Created migrated article");
        Ok(created)
    }

    /// Decide how much of the legacy history of an article that is already
    /// tracked live needs replaying.
    pub async fn plan(&self, record: &LegacyRecord, live: &Article) -> Result<Plan> {
        let earliest = self.repo.earliest_live_version(live.id).await.or_raise(|| ErrorKind::Metadata)?;
        let Some(earliest) = earliest else {
            return Ok(Plan::All);
        };
        let Some(boundary) = record.versions.iter().rposition(|v| v.captured_at < earliest.captured_at) else {
            return Ok(Plan::All);
        };
        let path = live.filename().map_err(from_store)?;
        let live_text = self.store.read_at(&earliest.partition, &earliest.commit, &path).await.map_err(from_store)?;
        if live_text.is_none() {
            tracing::warn!(live = live.id, version = earliest.id, "Earliest live snapshot is unreadable");
        }

        let mut retrieved = false;
        for index in (0..=boundary).rev() {
            let Some(text) = self.source.text(&record.article, &record.versions[index]).await? else {
                continue;
            };
            if live_text.as_deref() == Some(text.as_slice()) {
                retrieved = true;
                continue;
            }
            if retrieved {
                self.warn_if_reverted(record, boundary, &text).await?;
            }
            return Ok(Plan::Through(index));
        }
        match retrieved {
            true => Ok(Plan::Through(0)),
            false => Ok(Plan::All),
        }
    }

    /// Warn when text preceding the matching candidates shows up again after
    /// the boundary, meaning the article was reverted at some point.
    async fn warn_if_reverted(&self, record: &LegacyRecord, boundary: usize, text: &[u8]) -> Result<()> {
        for version in &record.versions[boundary + 1..] {
            if self.source.text(&record.article, version).await?.as_deref() == Some(text) {
                tracing::warn!(
                    legacy = record.article.id,
                    version = version.id,
                    "Legacy history reverts to content older than the first live snapshot"
                );
                break;
            }
        }
        Ok(())
    }

    async fn replay(
        &self,
        legacy: &LegacyArticle,
        live: &Article,
        target: &Partition,
        versions: &[LegacyVersion],
    ) -> Result<MergeReport> {
        self.store.ensure_repository(target).await.map_err(from_store)?;
        let path = live.filename().map_err(from_store)?;
        let mut report = MergeReport::default();
        for version in versions {
            let recorded = self.repo.get_version_by_migrated_id(version.id).await.or_raise(|| ErrorKind::Metadata)?;
            if let Some(recorded) = recorded {
                let exists = self.store.commit_exists(&recorded.partition, &recorded.commit).await.map_err(from_store)?;
                if !exists {
                    exn::bail!(ErrorKind::Consistency {
                        legacy_article: legacy.id,
                        legacy_version: version.id,
                        live_article: live.id,
                        live_version: Some(recorded.id),
                        commit: Some(recorded.commit.to_string()),
                        reason: "migrated version points at a commit missing from the store",
                    });
                }
                report.already_migrated += 1;
                continue;
            }
            let Some(text) = self.source.text(legacy, version).await? else {
                tracing::warn!(legacy = legacy.id, version = version.id, "Legacy snapshot unavailable, skipping");
                report.unavailable += 1;
                continue;
            };
            let message = commit_message(&legacy.url, version)?;
            let outcome = self.store.commit(target, &path, &text, &message).await.map_err(from_store)?;
            match outcome {
                CommitOutcome::Created(commit) => {
                    if self.attributed(target, &commit).await? {
                        tracing::warn!(%commit, "Commit already attributed, discarding working tree");
                        self.store.discard_changes(target).await.map_err(from_store)?;
                        report.covered += 1;
                        continue;
                    }
                    self.record(live, target, commit, version).await?;
                    report.replayed += 1;
                },
                CommitOutcome::NoChange => {
                    self.resolve_unchanged(legacy, live, target, &path, version).await?;
                    report.covered += 1;
                },
            }
        }
        tracing::info!(
            legacy = legacy.id,
            live = live.id,
            replayed = report.replayed,
            already_migrated = report.already_migrated,
            unavailable = report.unavailable,
            covered = report.covered,
            "Merged legacy article"
        );
        Ok(report)
    }

    async fn attributed(&self, partition: &Partition, commit: &CommitId) -> Result<bool> {
        let version = self.repo.get_version_by_commit(partition, commit).await.or_raise(|| ErrorKind::Metadata)?;
        Ok(version.is_some_and(|version| version.is_migrated))
    }

    /// An unrecorded legacy version produced no commit: its content must be
    /// the content of a version some earlier migration recorded.
    async fn resolve_unchanged(
        &self,
        legacy: &LegacyArticle,
        live: &Article,
        target: &Partition,
        path: &Path,
        version: &LegacyVersion,
    ) -> Result<()> {
        let last = self.store.last_commit_touching(target, path).await.map_err(from_store)?;
        if let Some(commit) = &last
            && self.attributed(target, commit).await?
        {
            tracing::debug!(version = version.id, %commit, "Content already covered by a migrated version");
            return Ok(());
        }
        exn::bail!(ErrorKind::Consistency {
            legacy_article: legacy.id,
            legacy_version: version.id,
            live_article: live.id,
            live_version: None,
            commit: last.map(|commit| commit.to_string()),
            reason: "content is committed but no migrated version records it",
        })
    }

    async fn record(
        &self,
        live: &Article,
        target: &Partition,
        commit: CommitId,
        version: &LegacyVersion,
    ) -> Result<()> {
        let new = NewVersion {
            article_id: live.id,
            commit,
            partition: target.clone(),
            title: version.title.clone(),
            byline: version.byline.clone(),
            captured_at: version.captured_at,
            boring: version.boring,
            diff: version.diff,
            migrated: Some(MigratedFrom { version_id: version.id, commit: version.commit.clone() }),
        };
        self.repo.insert_version(&new).await.or_raise(|| ErrorKind::Metadata)?;
        Ok(())
    }
}

fn commit_message(url: &str, version: &LegacyVersion) -> Result<String> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
    let date = version
        .captured_at
        .format(format)
        .or_raise(|| ErrorKind::InvalidTimestamp(version.captured_at.to_string()))?;
    Ok(format!("Migrating {url} from {date}"))
}
