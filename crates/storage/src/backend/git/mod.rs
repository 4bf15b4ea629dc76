//! Git-backed version store.
//!
//! Each partition is a plain git repository below the storage root and each
//! article a file within it. Commands are run through the `git` executable
//! found on `PATH`.

mod command;
mod lock;

use crate::backend::{CommitOutcome, VersionStore};
use crate::error::{ErrorKind, Result};
use crate::partition::{CommitId, Partition};
use crate::path::{git_path, validate as validate_path};
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::instrument;

/// Name and email recorded on commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}
impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { name: name.into(), email: email.into() }
    }
}

/// How long to wait on, and when to give up on, repository locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Lock files older than this are left over from a crashed process.
    pub stale_after: Duration,
    /// Maximum wait for `index.lock` before a single attempt gives up.
    pub wait: Duration,
    /// Polling interval while waiting.
    pub poll: Duration,
    /// Attempts before lock files are forcibly removed.
    pub attempts: u32,
    /// Pause between attempts.
    pub retry_sleep: Duration,
}
impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5 * 60),
            wait: Duration::from_secs(15),
            poll: Duration::from_millis(100),
            attempts: 5,
            retry_sleep: Duration::from_secs(5),
        }
    }
}

/// Version store keeping one git repository per partition.
///
/// # Examples
///
/// ```no_run
/// use presswatch_storage::backend::{GitStore, Identity};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let identity = Identity::new("Scraper", "scraper@example.com");
/// let store = GitStore::new("articles", "/srv/articles", identity)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GitStore {
    name: String,
    /// Directory holding every partition
    root: PathBuf,
    /// Absolute path of the git executable
    git: PathBuf,
    identity: Identity,
    locks: LockPolicy,
}

impl GitStore {
    /// Create a store rooted at the absolute directory `root`, creating it if
    /// necessary.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>, identity: Identity) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Not worth making the constructor async for a one-off.
            sync_create_dir(&root).map_err(ErrorKind::Io)?;
        }
        let git = which::which("git").or_raise(|| ErrorKind::GitNotFound)?;
        Ok(Self {
            name: name.into(),
            root,
            git,
            identity,
            locks: LockPolicy::default(),
        })
    }

    pub fn with_lock_policy(mut self, locks: LockPolicy) -> Self {
        self.locks = locks;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: &Partition) -> PathBuf {
        self.root.join(partition.as_path())
    }

    /// Directory of an existing repository.
    async fn repository(&self, partition: &Partition) -> Result<PathBuf> {
        let dir = self.partition_dir(partition);
        if !fs::try_exists(dir.join(".git")).await.map_err(ErrorKind::Io)? {
            exn::bail!(ErrorKind::UnknownPartition(partition.to_string()));
        }
        Ok(dir)
    }

    fn identity_args(&self) -> [String; 2] {
        [
            format!("user.name={}", self.identity.name),
            format!("user.email={}", self.identity.email),
        ]
    }

    async fn show(&self, repository: &Path, object: &str) -> Result<Option<Vec<u8>>> {
        let output = self.git(repository, &["show", object]).await?;
        if output.status.success() {
            return Ok(Some(output.stdout));
        }
        if output.is_missing() {
            return Ok(None);
        }
        output.check("show").map(|_| None)
    }

    /// Write a snapshot into the working tree, creating directories as
    /// needed. Every directory on the way and the file itself are left
    /// world-writable so that the scraper and the migration, running as
    /// different users, can share repositories.
    async fn write_snapshot(&self, repository: &Path, relative: &Path, data: &[u8]) -> Result<()> {
        let mut current = repository.to_path_buf();
        if let Some(parent) = relative.parent() {
            for component in parent.components() {
                current.push(component);
                match fs::create_dir(&current).await {
                    Ok(()) => {},
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {},
                    Err(e) => exn::bail!(ErrorKind::Io(e)),
                }
                make_shared(&current).await?;
            }
        }
        let file = repository.join(relative);
        fs::write(&file, data).await.map_err(ErrorKind::Io)?;
        make_shared(&file).await
    }
}

/// Open up `path` to every user. Paths that already are open are left
/// alone, as only their owner may change their mode.
#[cfg(unix)]
async fn make_shared(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path).await.map_err(ErrorKind::Io)?.permissions().mode();
    if mode & 0o777 == 0o777 {
        return Ok(());
    }
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)).await.map_err(ErrorKind::Io)?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_shared(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl VersionStore for GitStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn ensure_repository(&self, partition: &Partition) -> Result<()> {
        let dir = self.partition_dir(partition);
        if fs::try_exists(dir.join(".git")).await.map_err(ErrorKind::Io)? {
            return Ok(());
        }
        tracing::info!(partition = %partition, path = %dir.display(), "Creating repository");
        fs::create_dir_all(&dir).await.map_err(ErrorKind::Io)?;
        self.git(&dir, &["init", "--quiet"]).await?.check("init")?;
        self.git(&dir, &["config", "user.name", &self.identity.name]).await?.check("config")?;
        self.git(&dir, &["config", "user.email", &self.identity.email]).await?.check("config")?;
        self.git(&dir, &["commit", "--quiet", "--allow-empty", "-m", "Initial commit"])
            .await?
            .check("commit")?;
        make_shared(&dir).await
    }

    async fn read_current(&self, partition: &Partition, path: &Path) -> Result<Option<Vec<u8>>> {
        let repository = self.repository(partition).await?;
        let object = format!("HEAD:{}", git_path(path)?);
        self.show(&repository, &object).await
    }

    #[instrument(skip(self, data, message), fields(store = %self.name, size = data.len()))]
    async fn commit(&self, partition: &Partition, path: &Path, data: &[u8], message: &str) -> Result<CommitOutcome> {
        let repository = self.repository(partition).await?;
        let relative = validate_path(path)?;
        let spec = git_path(&relative)?;
        self.write_snapshot(&repository, &relative, data).await?;
        self.git(&repository, &["add", "--", &spec]).await?.check("add")?;
        let staged = self.git(&repository, &["diff", "--cached", "--quiet", "--", &spec]).await?;
        match staged.status.code() {
            Some(0) => return Ok(CommitOutcome::NoChange),
            Some(1) => {},
            _ => {
                staged.check("diff")?;
            },
        }
        let [name, email] = self.identity_args();
        self.git(&repository, &["-c", &name, "-c", &email, "commit", "--quiet", "-m", message, "--", &spec])
            .await?
            .check("commit")?;
        let id = self.most_recent_commit_id(partition).await?;
        tracing::debug!(commit = %id, "Committed snapshot");
        Ok(CommitOutcome::Created(id))
    }

    async fn read_at(&self, partition: &Partition, id: &CommitId, path: &Path) -> Result<Option<Vec<u8>>> {
        let repository = self.repository(partition).await?;
        let object = format!("{id}:{}", git_path(path)?);
        self.show(&repository, &object).await
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn compact(&self, partition: &Partition) -> Result<()> {
        let repository = self.repository(partition).await?;
        self.git(&repository, &["gc", "--quiet"]).await?.check("gc")?;
        Ok(())
    }

    async fn most_recent_commit_id(&self, partition: &Partition) -> Result<CommitId> {
        let repository = self.repository(partition).await?;
        let output = self.git(&repository, &["rev-list", "HEAD", "-n1"]).await?.check("rev-list")?;
        CommitId::new(output.text())
    }

    async fn last_commit_touching(&self, partition: &Partition, path: &Path) -> Result<Option<CommitId>> {
        let repository = self.repository(partition).await?;
        let spec = git_path(path)?;
        let output = self
            .git(&repository, &["log", "-n1", "--pretty=format:%H", "--", &spec])
            .await?
            .check("log")?;
        match output.text() {
            hash if hash.is_empty() => Ok(None),
            hash => CommitId::new(hash).map(Some),
        }
    }

    async fn commit_exists(&self, partition: &Partition, id: &CommitId) -> Result<bool> {
        let repository = self.repository(partition).await?;
        let object = format!("{id}^{{commit}}");
        let output = self.git(&repository, &["cat-file", "-e", &object]).await?;
        Ok(output.status.success())
    }

    async fn discard_changes(&self, partition: &Partition) -> Result<()> {
        let repository = self.repository(partition).await?;
        self.git(&repository, &["reset", "--hard", "--quiet"]).await?.check("reset")?;
        Ok(())
    }

    async fn list_partitions(&self) -> Result<Vec<Partition>> {
        let mut partitions = Vec::new();
        // Partitions sit directly below the root, or one level further down
        // when nested under a prefix.
        let mut pending = vec![(self.root.clone(), 0)];
        while let Some((dir, depth)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(ErrorKind::Io)?;
            while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
                if !entry.file_type().await.map_err(ErrorKind::Io)?.is_dir() {
                    continue;
                }
                let path = entry.path();
                if fs::try_exists(path.join(".git")).await.map_err(ErrorKind::Io)? {
                    let Ok(relative) = path.strip_prefix(&self.root) else {
                        continue;
                    };
                    let Some(key) = relative.to_str() else {
                        tracing::warn!(path = %path.display(), "Skipping partition with non-UTF-8 name");
                        continue;
                    };
                    partitions.push(Partition::new(key)?);
                } else if depth == 0 {
                    pending.push((path, depth + 1));
                }
            }
        }
        partitions.sort();
        Ok(partitions)
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn clear_stale_locks(&self) -> Result<usize> {
        let mut removed = 0;
        for partition in self.list_partitions().await? {
            removed += lock::clear_stale(&self.partition_dir(&partition), self.locks.stale_after).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store in a fresh temporary directory, or `None` when git isn't
    /// installed (the test is then skipped).
    fn store() -> Option<(tempfile::TempDir, GitStore)> {
        if which::which("git").is_err() {
            eprintln!("git not found; skipping");
            return None;
        }
        let dir = tempfile::tempdir().unwrap();
        let store = GitStore::new("test", dir.path(), Identity::new("Test", "test@example.com")).unwrap();
        Some((dir, store))
    }

    fn partition() -> Partition {
        Partition::new("2024-05").unwrap()
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let result = GitStore::new("test", "relative/path", Identity::new("a", "b"));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ensure_repository_is_idempotent() {
        let Some((_dir, store)) = store() else { return };
        store.ensure_repository(&partition()).await.unwrap();
        let initial = store.most_recent_commit_id(&partition()).await.unwrap();
        store.ensure_repository(&partition()).await.unwrap();
        assert_eq!(store.most_recent_commit_id(&partition()).await.unwrap(), initial);
    }

    #[tokio::test]
    async fn test_unknown_partition() {
        let Some((_dir, store)) = store() else { return };
        let err = store.read_current(&partition(), Path::new("a")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownPartition(_)));
    }

    #[tokio::test]
    async fn test_commit_and_read_back() {
        let Some((_dir, store)) = store() else { return };
        let partition = partition();
        let path = Path::new("https:/www.example.com/2024/05/story");
        store.ensure_repository(&partition).await.unwrap();
        assert_eq!(store.read_current(&partition, path).await.unwrap(), None);

        let CommitOutcome::Created(first) = store.commit(&partition, path, b"one\n", "Adding file").await.unwrap()
        else {
            panic!("expected a commit");
        };
        let CommitOutcome::Created(second) = store.commit(&partition, path, b"two\n", "Change").await.unwrap() else {
            panic!("expected a commit");
        };
        assert_ne!(first, second);
        assert_eq!(store.read_current(&partition, path).await.unwrap().as_deref(), Some(&b"two\n"[..]));
        assert_eq!(store.read_at(&partition, &first, path).await.unwrap().as_deref(), Some(&b"one\n"[..]));
        assert_eq!(store.last_commit_touching(&partition, path).await.unwrap(), Some(second.clone()));
        assert!(store.commit_exists(&partition, &second).await.unwrap());
    }

    #[tokio::test]
    async fn test_unchanged_commit_leaves_history_alone() {
        let Some((_dir, store)) = store() else { return };
        let partition = partition();
        let path = Path::new("www.example.com/story");
        store.ensure_repository(&partition).await.unwrap();
        store.commit(&partition, path, b"same\n", "Adding file").await.unwrap();
        let head = store.most_recent_commit_id(&partition).await.unwrap();
        let outcome = store.commit(&partition, path, b"same\n", "Change").await.unwrap();
        assert_eq!(outcome, CommitOutcome::NoChange);
        assert_eq!(store.most_recent_commit_id(&partition).await.unwrap(), head);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_snapshot_paths_are_world_writable() {
        use std::os::unix::fs::PermissionsExt;
        let Some((_dir, store)) = store() else { return };
        let partition = partition();
        store.ensure_repository(&partition).await.unwrap();
        let repository = store.root().join("2024-05");
        // Left behind with a narrower mode, e.g. by a checkout.
        let existing = repository.join("www.example.com");
        std::fs::create_dir(&existing).unwrap();
        std::fs::set_permissions(&existing, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path = Path::new("www.example.com/2024/05/story");
        store.commit(&partition, path, b"one\n", "Adding file").await.unwrap();
        let mode = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;
        let shared = [
            repository.clone(),
            existing.clone(),
            existing.join("2024"),
            existing.join("2024/05"),
            repository.join(path),
        ];
        for path in &shared {
            assert_eq!(mode(path), 0o777, "{} is not shared", path.display());
        }
    }

    #[tokio::test]
    async fn test_read_at_missing_path_and_commit() {
        let Some((_dir, store)) = store() else { return };
        let partition = partition();
        store.ensure_repository(&partition).await.unwrap();
        let head = store.most_recent_commit_id(&partition).await.unwrap();
        assert_eq!(store.read_at(&partition, &head, Path::new("nope")).await.unwrap(), None);
        let unknown = CommitId::new("0123456789abcdef0123456789abcdef01234567").unwrap();
        assert_eq!(store.read_at(&partition, &unknown, Path::new("nope")).await.unwrap(), None);
        assert!(!store.commit_exists(&partition, &unknown).await.unwrap());
        assert_eq!(store.last_commit_touching(&partition, Path::new("nope")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_partitions_includes_nested() {
        let Some((_dir, store)) = store() else { return };
        let nested = Partition::new("migrated/2014-03").unwrap();
        store.ensure_repository(&partition()).await.unwrap();
        store.ensure_repository(&nested).await.unwrap();
        store.compact(&nested).await.unwrap();
        assert_eq!(store.list_partitions().await.unwrap(), vec![partition(), nested]);
    }

    #[tokio::test]
    async fn test_stale_locks_are_cleared_before_commands_run() {
        let Some((_dir, store)) = store() else { return };
        let store = store.with_lock_policy(LockPolicy {
            stale_after: Duration::ZERO,
            wait: Duration::from_millis(50),
            poll: Duration::from_millis(10),
            attempts: 1,
            retry_sleep: Duration::ZERO,
        });
        let partition = partition();
        store.ensure_repository(&partition).await.unwrap();
        let lock = store.root().join("2024-05/.git/index.lock");
        std::fs::write(&lock, b"").unwrap();
        assert_eq!(store.clear_stale_locks().await.unwrap(), 1);
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn test_held_lock_is_forced_after_retries() {
        let Some((_dir, store)) = store() else { return };
        let store = store.with_lock_policy(LockPolicy {
            stale_after: Duration::from_secs(300),
            wait: Duration::from_millis(30),
            poll: Duration::from_millis(10),
            attempts: 2,
            retry_sleep: Duration::from_millis(10),
        });
        let partition = partition();
        store.ensure_repository(&partition).await.unwrap();
        std::fs::write(store.root().join("2024-05/.git/index.lock"), b"").unwrap();
        let outcome = store.commit(&partition, Path::new("a"), b"data\n", "Adding file a").await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Created(_)));
    }
}
