use crate::error::{ErrorKind, Result};
use crate::project_dirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn data_dir() -> PathBuf {
    project_dirs().map_or_else(|| PathBuf::from("."), |dirs| dirs.data_dir().to_path_buf())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub scrape: ScrapeConfig,
    pub migrate: MigrateConfig,
}

impl Config {
    pub(crate) fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| exn::Exn::from(ErrorKind::Invalid(reason.to_string()));
        if self.storage.locks.attempts == 0 {
            return Err(invalid("storage.locks.attempts must be at least 1"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections must be at least 1"));
        }
        if self.scrape.retention_days == 0 {
            return Err(invalid("scrape.retention_days must be at least 1"));
        }
        if self.scrape.max_url_length == 0 {
            return Err(invalid("scrape.max_url_length must be at least 1"));
        }
        if self.migrate.batch_size == 0 || self.migrate.compact_every == 0 {
            return Err(invalid("migrate.batch_size and migrate.compact_every must be at least 1"));
        }
        if let Some(source) = self.scrape.sources.iter().find(|source| source.domains.is_empty()) {
            return Err(invalid(&format!("source `{}` has no domains", source.name)));
        }
        Ok(())
    }
}

/// Name and email recorded on commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one repository per partition.
    pub root: PathBuf,
    pub identity: IdentityConfig,
    pub locks: LockConfig,
}
impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("articles"),
            identity: IdentityConfig {
                name: "Presswatch Scraper".to_string(),
                email: "scraper@presswatch.invalid".to_string(),
            },
            locks: LockConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub stale_after_secs: u64,
    pub wait_secs: u64,
    pub poll_millis: u64,
    pub attempts: u32,
    pub retry_sleep_secs: u64,
}
impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 300,
            wait_secs: 15,
            poll_millis: 100,
            attempts: 5,
            retry_sleep_secs: 5,
        }
    }
}
impl LockConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_millis)
    }
    pub fn retry_sleep(&self) -> Duration {
        Duration::from_secs(self.retry_sleep_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    /// How long a write waits on another process's transaction.
    pub busy_timeout_millis: u64,
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: data_dir().join("presswatch.sqlite"), max_connections: 5, busy_timeout_millis: 5000 }
    }
}
impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Articles with no activity for this long are no longer re-checked.
    pub retention_days: u32,
    /// URLs longer than this are never registered.
    pub max_url_length: usize,
    /// Time budget for one word diff.
    pub diff_timeout_secs: u64,
    pub fetch: FetchConfig,
    pub sources: Vec<SourceConfig>,
}
impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            retention_days: 366,
            max_url_length: 2048,
            diff_timeout_secs: 3,
            fetch: FetchConfig::default(),
            sources: Vec::new(),
        }
    }
}
impl ScrapeConfig {
    pub fn diff_timeout(&self) -> Duration {
        Duration::from_secs(self.diff_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    /// Extra attempts after the first on transient failures.
    pub retries: u32,
    pub backoff_millis: u64,
    pub user_agent: String,
    /// Page content that marks an interstitial (an advert, a "please wait"
    /// page) to be fetched again.
    pub retry_markers: Vec<String>,
}
impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            retries: 5,
            backoff_millis: 500,
            user_agent: concat!("presswatch/", env!("CARGO_PKG_VERSION")).to_string(),
            retry_markers: Vec::new(),
        }
    }
}
impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_millis)
    }
}

/// A news source handled by the selector-driven parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Hosts whose articles this source parses.
    pub domains: Vec<String>,
    /// Pages scanned for links to articles.
    #[serde(default)]
    pub feeder_pages: Vec<String>,
    /// Regular expression an article link must match.
    pub feeder_pattern: String,
    /// CSS selector for the headline.
    pub title: String,
    #[serde(default)]
    pub byline: Option<String>,
    #[serde(default)]
    pub dateline: Option<String>,
    /// CSS selector for body paragraphs.
    pub body: String,
    /// Pages without a match for this selector are not articles.
    #[serde(default)]
    pub article_marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// SQLite copy of the legacy metadata database.
    pub source_database: PathBuf,
    /// Directory holding the legacy partition repositories.
    pub source_snapshots: PathBuf,
    /// Zone the legacy naive timestamps were recorded in.
    pub timezone: String,
    /// Migrated history is committed below this prefix.
    pub partition_prefix: String,
    pub batch_size: u32,
    /// Compact a partition after this many articles.
    pub compact_every: u32,
    /// A failure this soon after the previous one aborts the run.
    pub repeat_guard_secs: u64,
    pub identity: IdentityConfig,
}
impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            source_database: data_dir().join("legacy.sqlite"),
            source_snapshots: data_dir().join("legacy"),
            timezone: "America/New_York".to_string(),
            partition_prefix: "migrated".to_string(),
            batch_size: 1000,
            compact_every: 20,
            repeat_guard_secs: 120,
            identity: IdentityConfig {
                name: "Presswatch Migration".to_string(),
                email: "migration@presswatch.invalid".to_string(),
            },
        }
    }
}
impl MigrateConfig {
    pub fn repeat_guard(&self) -> Duration {
        Duration::from_secs(self.repeat_guard_secs)
    }
}
