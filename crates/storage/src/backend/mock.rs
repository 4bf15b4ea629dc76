//! In-memory version store for testing.

use crate::backend::{CommitOutcome, VersionStore};
use crate::error::{ErrorKind, Result};
use crate::partition::{CommitId, Partition};
use crate::path::validate as validate_path;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

struct MockCommit {
    id: CommitId,
    /// Path modified by this commit (`None` for the initial commit).
    touched: Option<PathBuf>,
    tree: HashMap<PathBuf, Vec<u8>>,
}

#[derive(Default)]
struct MockRepository {
    history: Vec<MockCommit>,
    compactions: usize,
    discards: usize,
}
impl MockRepository {
    fn head(&self) -> Option<&MockCommit> {
        self.history.last()
    }
}

/// In-memory version store for testing.
///
/// Each partition keeps its full commit history in memory; commit ids are
/// BLAKE3 hashes of the partition, position and content, so they are stable
/// across test runs.
///
/// # Examples
///
/// ```
/// use presswatch_storage::backend::MockStore;
/// use presswatch_storage::{CommitOutcome, Partition, VersionStore};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MockStore::default();
/// let partition = Partition::new("2024-05")?;
/// store.ensure_repository(&partition).await?;
/// let outcome = store.commit(&partition, Path::new("a"), b"data", "Adding file a").await?;
/// assert!(matches!(outcome, CommitOutcome::Created(_)));
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockStore {
    repositories: RwLock<HashMap<Partition, MockRepository>>,
}

impl MockStore {
    /// Number of commits in a partition, including the initial commit.
    pub async fn commit_count(&self, partition: &Partition) -> usize {
        self.repositories.read().await.get(partition).map_or(0, |repo| repo.history.len())
    }

    /// Number of times [`compact`](VersionStore::compact) ran on a partition.
    pub async fn compactions(&self, partition: &Partition) -> usize {
        self.repositories.read().await.get(partition).map_or(0, |repo| repo.compactions)
    }

    /// Number of times [`discard_changes`](VersionStore::discard_changes) ran
    /// on a partition.
    pub async fn discards(&self, partition: &Partition) -> usize {
        self.repositories.read().await.get(partition).map_or(0, |repo| repo.discards)
    }

    fn unknown(partition: &Partition) -> ErrorKind {
        ErrorKind::UnknownPartition(partition.to_string())
    }

    fn make_id(partition: &Partition, position: usize, path: &Path, data: &[u8]) -> Result<CommitId> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(partition.as_str().as_bytes());
        hasher.update(&position.to_le_bytes());
        hasher.update(path.as_os_str().as_encoded_bytes());
        hasher.update(data);
        // Same length as a SHA-1 object name.
        CommitId::new(&hasher.finalize().to_hex()[..40])
    }
}

#[async_trait]
impl VersionStore for MockStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn ensure_repository(&self, partition: &Partition) -> Result<()> {
        let mut repositories = self.repositories.write().await;
        if repositories.contains_key(partition) {
            return Ok(());
        }
        let initial = MockCommit {
            id: Self::make_id(partition, 0, Path::new(""), b"")?,
            touched: None,
            tree: HashMap::new(),
        };
        let repository = MockRepository {
            history: vec![initial],
            ..MockRepository::default()
        };
        repositories.insert(partition.clone(), repository);
        Ok(())
    }

    async fn read_current(&self, partition: &Partition, path: &Path) -> Result<Option<Vec<u8>>> {
        let path = validate_path(path)?;
        let repositories = self.repositories.read().await;
        let repository = repositories.get(partition).ok_or_else(|| Self::unknown(partition))?;
        Ok(repository.head().and_then(|head| head.tree.get(&path).cloned()))
    }

    async fn commit(&self, partition: &Partition, path: &Path, data: &[u8], _message: &str) -> Result<CommitOutcome> {
        let path = validate_path(path)?;
        let mut repositories = self.repositories.write().await;
        let repository = repositories.get_mut(partition).ok_or_else(|| Self::unknown(partition))?;
        let mut tree = repository.head().map(|head| head.tree.clone()).unwrap_or_default();
        if tree.get(&path).is_some_and(|existing| existing == data) {
            return Ok(CommitOutcome::NoChange);
        }
        let id = Self::make_id(partition, repository.history.len(), &path, data)?;
        tree.insert(path.clone(), data.to_vec());
        repository.history.push(MockCommit {
            id: id.clone(),
            touched: Some(path),
            tree,
        });
        Ok(CommitOutcome::Created(id))
    }

    async fn read_at(&self, partition: &Partition, id: &CommitId, path: &Path) -> Result<Option<Vec<u8>>> {
        let path = validate_path(path)?;
        let repositories = self.repositories.read().await;
        let repository = repositories.get(partition).ok_or_else(|| Self::unknown(partition))?;
        let commit = repository.history.iter().find(|commit| &commit.id == id);
        Ok(commit.and_then(|commit| commit.tree.get(&path).cloned()))
    }

    async fn compact(&self, partition: &Partition) -> Result<()> {
        let mut repositories = self.repositories.write().await;
        let repository = repositories.get_mut(partition).ok_or_else(|| Self::unknown(partition))?;
        repository.compactions += 1;
        Ok(())
    }

    async fn most_recent_commit_id(&self, partition: &Partition) -> Result<CommitId> {
        let repositories = self.repositories.read().await;
        let repository = repositories.get(partition).ok_or_else(|| Self::unknown(partition))?;
        match repository.head() {
            Some(head) => Ok(head.id.clone()),
            None => exn::bail!(ErrorKind::Backend("empty history".to_string())),
        }
    }

    async fn last_commit_touching(&self, partition: &Partition, path: &Path) -> Result<Option<CommitId>> {
        let path = validate_path(path)?;
        let repositories = self.repositories.read().await;
        let repository = repositories.get(partition).ok_or_else(|| Self::unknown(partition))?;
        let commit = repository.history.iter().rev().find(|commit| commit.touched.as_ref() == Some(&path));
        Ok(commit.map(|commit| commit.id.clone()))
    }

    async fn commit_exists(&self, partition: &Partition, id: &CommitId) -> Result<bool> {
        let repositories = self.repositories.read().await;
        let repository = repositories.get(partition).ok_or_else(|| Self::unknown(partition))?;
        Ok(repository.history.iter().any(|commit| &commit.id == id))
    }

    async fn discard_changes(&self, partition: &Partition) -> Result<()> {
        let mut repositories = self.repositories.write().await;
        let repository = repositories.get_mut(partition).ok_or_else(|| Self::unknown(partition))?;
        repository.discards += 1;
        Ok(())
    }

    async fn list_partitions(&self) -> Result<Vec<Partition>> {
        let mut partitions = self.repositories.read().await.keys().cloned().collect::<Vec<_>>();
        partitions.sort();
        Ok(partitions)
    }

    async fn clear_stale_locks(&self) -> Result<usize> {
        Ok(0)
    }
}
