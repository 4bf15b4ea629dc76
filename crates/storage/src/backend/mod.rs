//! Version store trait and implementations.
//!
//! This module defines the [`VersionStore`] trait: a commit-based backing
//! store with one repository per [`Partition`] and one file per article.

mod git;
#[cfg(feature = "mock")]
mod mock;

pub use self::git::{GitStore, Identity, LockPolicy};
#[cfg(feature = "mock")]
pub use self::mock::MockStore;
use crate::error::Result;
use crate::partition::{CommitId, Partition};
use async_trait::async_trait;
use std::path::Path;

/// Result of [`VersionStore::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new commit was created.
    Created(CommitId),
    /// The content was byte-identical to what is already committed; history
    /// was left untouched.
    NoChange,
}

/// Commit message for a snapshot of `path`.
pub fn commit_message(path: &Path, first: bool) -> String {
    match first {
        true => format!("Adding file {}", path.display()),
        false => format!("Change to {}", path.display()),
    }
}

/// Commit-based snapshot storage.
///
/// Paths are relative to the partition's repository and are validated with
/// [`validate_path`](crate::validate_path) by every implementation. Operations
/// on one partition serialize through the backend's own locking; callers
/// never need to coordinate beyond not running [`compact`](Self::compact)
/// twice at once on the same partition.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use presswatch_storage::{CommitOutcome, Partition, VersionStore, error::Result};
///
/// async fn record(store: &dyn VersionStore, partition: &Partition, data: &[u8]) -> Result<bool> {
///     let path = Path::new("www.example.com/story");
///     store.ensure_repository(partition).await?;
///     let outcome = store.commit(partition, path, data, "Change to story").await?;
///     Ok(matches!(outcome, CommitOutcome::Created(_)))
/// }
/// ```
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Name of the store, for logging only.
    fn name(&self) -> &str;

    /// Create the partition's repository if it doesn't exist yet.
    ///
    /// A fresh repository gets its commit identity configured and an empty
    /// initial commit, so it is never without history.
    async fn ensure_repository(&self, partition: &Partition) -> Result<()>;

    /// Currently committed content of `path`, or `None` if the path has never
    /// been committed on the current line of history.
    async fn read_current(&self, partition: &Partition, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Write `data` to `path` and commit it.
    async fn commit(&self, partition: &Partition, path: &Path, data: &[u8], message: &str) -> Result<CommitOutcome>;

    /// Content of `path` as of commit `id`, or `None` if it didn't exist
    /// there (or the commit is unknown).
    async fn read_at(&self, partition: &Partition, id: &CommitId, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Garbage-collect the partition's repository.
    async fn compact(&self, partition: &Partition) -> Result<()>;

    /// Identifier of the latest commit in the partition.
    async fn most_recent_commit_id(&self, partition: &Partition) -> Result<CommitId>;

    /// Most recent commit that modified `path`, if any.
    async fn last_commit_touching(&self, partition: &Partition, path: &Path) -> Result<Option<CommitId>>;

    /// Whether `id` names a commit in the partition.
    async fn commit_exists(&self, partition: &Partition, id: &CommitId) -> Result<bool>;

    /// Throw away uncommitted changes in the partition's working tree.
    async fn discard_changes(&self, partition: &Partition) -> Result<()>;

    /// Every partition that currently has a repository.
    async fn list_partitions(&self) -> Result<Vec<Partition>>;

    /// Remove lock artifacts left behind by crashed processes, across every
    /// partition. Returns how many were removed.
    async fn clear_stale_locks(&self) -> Result<usize>;
}
