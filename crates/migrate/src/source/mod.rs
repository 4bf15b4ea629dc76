//! Read access to the legacy dataset.

mod legacy;

pub use self::legacy::LegacyDataset;
use crate::error::Result;
use async_trait::async_trait;
use presswatch_storage::Partition;
use presswatch_text::DiffStats;
use std::sync::Arc;
use time::UtcDateTime;

/// A tracked article as the legacy system recorded it. Timestamps are
/// already converted to UTC.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyArticle {
    pub id: i64,
    pub url: String,
    pub initial_date: UtcDateTime,
    pub last_update: Option<UtcDateTime>,
    pub last_check: Option<UtcDateTime>,
    /// Repository holding the article's history in the legacy snapshot store.
    pub partition: Partition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyVersion {
    pub id: i64,
    /// Commit in the legacy snapshot store, as recorded (it may not resolve).
    pub commit: String,
    pub title: String,
    pub byline: String,
    pub captured_at: UtcDateTime,
    pub boring: bool,
    pub diff: Option<DiffStats>,
}

/// A legacy article with its versions in capture order.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyRecord {
    pub article: LegacyArticle,
    pub versions: Vec<LegacyVersion>,
}

#[async_trait]
pub trait SourceDataset: Send + Sync {
    /// Up to `limit` articles with an id of at least `from`, in id order.
    /// An empty batch means the dataset is exhausted.
    async fn batch(&self, from: i64, limit: u32) -> Result<Vec<LegacyRecord>>;

    /// Snapshot text of `version`, or `None` if it cannot be retrieved.
    async fn text(&self, article: &LegacyArticle, version: &LegacyVersion) -> Result<Option<Vec<u8>>>;
}

pub type SourceHandle = Arc<dyn SourceDataset>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// An in-memory legacy dataset.
    #[derive(Default)]
    pub(crate) struct FakeDataset {
        records: Mutex<Vec<LegacyRecord>>,
        texts: Mutex<HashMap<i64, Vec<u8>>>,
        /// Number of upcoming `batch` calls that fail.
        failures: AtomicUsize,
    }

    impl FakeDataset {
        pub(crate) fn add(&self, article: LegacyArticle, versions: Vec<(LegacyVersion, Option<&str>)>) {
            let mut texts = self.texts.lock().unwrap();
            let versions = versions
                .into_iter()
                .map(|(version, text)| {
                    if let Some(text) = text {
                        texts.insert(version.id, text.as_bytes().to_vec());
                    }
                    version
                })
                .collect();
            let mut records = self.records.lock().unwrap();
            records.push(LegacyRecord { article, versions });
            records.sort_by_key(|record| record.article.id);
        }

        pub(crate) fn fail_next(&self, times: usize) {
            self.failures.store(times, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SourceDataset for FakeDataset {
        async fn batch(&self, from: i64, limit: u32) -> Result<Vec<LegacyRecord>> {
            let pending = self.failures.load(Ordering::SeqCst);
            if pending > 0 {
                self.failures.store(pending - 1, Ordering::SeqCst);
                exn::bail!(ErrorKind::Source);
            }
            let records = self.records.lock().unwrap();
            let batch = records.iter().filter(|record| record.article.id >= from).take(limit as usize);
            Ok(batch.cloned().collect())
        }

        async fn text(&self, _article: &LegacyArticle, version: &LegacyVersion) -> Result<Option<Vec<u8>>> {
            Ok(self.texts.lock().unwrap().get(&version.id).cloned())
        }
    }

    pub(crate) fn legacy_article(id: i64, url: &str, initial_date: UtcDateTime, partition: &str) -> LegacyArticle {
        LegacyArticle {
            id,
            url: url.to_string(),
            initial_date,
            last_update: None,
            last_check: None,
            partition: Partition::new(partition).unwrap(),
        }
    }

    pub(crate) fn legacy_version(id: i64, captured_at: UtcDateTime) -> LegacyVersion {
        LegacyVersion {
            id,
            commit: format!("{id:040x}"),
            title: format!("Title {id}"),
            byline: "By A. Reporter".to_string(),
            captured_at,
            boring: false,
            diff: None,
        }
    }
}
