//! Repository lock artifacts.
//!
//! Git serializes writers through lock files inside `.git`. A process that
//! dies mid-command leaves them behind and every later command fails, so
//! they are waited on, expired and, as a last resort, removed.

use crate::error::{ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::time::{Instant, sleep};

const GIT_DIR: &str = ".git";
const INDEX_LOCK: &str = "index.lock";
const FIXED_LOCKS: [&str; 3] = [INDEX_LOCK, "HEAD.lock", "gc.pid.lock"];

/// Whether a failed git command failed because someone else held a lock.
pub(crate) fn is_lock_conflict(stderr: &str) -> bool {
    stderr.contains("Another git process seems to be running")
        || (stderr.contains(".lock") && (stderr.contains("File exists") || stderr.contains("Unable to create")))
}

/// Wait for `index.lock` to disappear, polling every `poll` until `wait` has
/// elapsed.
pub(crate) async fn wait_for_index(repository: &Path, wait: Duration, poll: Duration) -> Result<()> {
    let lock = repository.join(GIT_DIR).join(INDEX_LOCK);
    let deadline = Instant::now() + wait;
    while fs::try_exists(&lock).await.map_err(ErrorKind::Io)? {
        if Instant::now() + poll >= deadline {
            exn::bail!(ErrorKind::LockTimeout(lock));
        }
        sleep(poll).await;
    }
    Ok(())
}

/// Lock files currently present in the repository.
async fn artifacts(repository: &Path) -> Result<Vec<PathBuf>> {
    let git_dir = repository.join(GIT_DIR);
    let mut found = Vec::new();
    for name in FIXED_LOCKS {
        let path = git_dir.join(name);
        if fs::try_exists(&path).await.map_err(ErrorKind::Io)? {
            found.push(path);
        }
    }
    let heads = git_dir.join("refs").join("heads");
    let mut entries = match fs::read_dir(&heads).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => exn::bail!(ErrorKind::Io(e)),
    };
    while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
        if entry.file_name().to_string_lossy().ends_with(".lock") {
            found.push(entry.path());
        }
    }
    Ok(found)
}

async fn remove(lock: &Path) -> Result<bool> {
    match fs::remove_file(lock).await {
        Ok(()) => Ok(true),
        // Released by its owner in the meantime.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => exn::bail!(ErrorKind::Io(e)),
    }
}

/// Remove lock artifacts older than `older_than`.
pub(crate) async fn clear_stale(repository: &Path, older_than: Duration) -> Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;
    for lock in artifacts(repository).await? {
        let modified = match fs::metadata(&lock).await {
            Ok(metadata) => metadata.modified().map_err(ErrorKind::Io)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        };
        // A timestamp in the future counts as fresh.
        let age = now.duration_since(modified).unwrap_or_default();
        if age >= older_than && remove(&lock).await? {
            tracing::warn!(lock = %lock.display(), age_secs = age.as_secs(), "Removed stale lock file");
            removed += 1;
        }
    }
    Ok(removed)
}

/// Remove every lock artifact regardless of age.
pub(crate) async fn force_clear(repository: &Path) -> Result<usize> {
    let mut removed = 0;
    for lock in artifacts(repository).await? {
        if remove(&lock).await? {
            tracing::warn!(lock = %lock.display(), "Forcibly removed lock file");
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fake_repository() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git/refs/heads")).unwrap();
        dir
    }

    #[rstest]
    #[case("fatal: Unable to create '/x/.git/index.lock': File exists.", true)]
    #[case("Another git process seems to be running in this repository", true)]
    #[case("fatal: path 'a' does not exist in 'HEAD'", false)]
    #[case("", false)]
    fn test_is_lock_conflict(#[case] stderr: &str, #[case] expected: bool) {
        assert_eq!(is_lock_conflict(stderr), expected);
    }

    #[tokio::test]
    async fn test_wait_without_lock_returns_immediately() {
        let repo = fake_repository();
        wait_for_index(repo.path(), Duration::from_millis(50), Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_times_out_on_held_lock() {
        let repo = fake_repository();
        std::fs::write(repo.path().join(".git/index.lock"), b"").unwrap();
        let err = wait_for_index(repo.path(), Duration::from_millis(50), Duration::from_millis(10)).await.unwrap_err();
        assert!(err.is_lock_timeout());
    }

    #[tokio::test]
    async fn test_fresh_locks_are_not_stale() {
        let repo = fake_repository();
        std::fs::write(repo.path().join(".git/index.lock"), b"").unwrap();
        assert_eq!(clear_stale(repo.path(), Duration::from_secs(300)).await.unwrap(), 0);
        assert!(repo.path().join(".git/index.lock").exists());
    }

    #[tokio::test]
    async fn test_old_locks_are_stale() {
        let repo = fake_repository();
        std::fs::write(repo.path().join(".git/index.lock"), b"").unwrap();
        std::fs::write(repo.path().join(".git/refs/heads/master.lock"), b"").unwrap();
        std::fs::write(repo.path().join(".git/refs/heads/master"), b"").unwrap();
        assert_eq!(clear_stale(repo.path(), Duration::ZERO).await.unwrap(), 2);
        assert!(!repo.path().join(".git/index.lock").exists());
        assert!(repo.path().join(".git/refs/heads/master").exists());
    }

    #[tokio::test]
    async fn test_force_clear() {
        let repo = fake_repository();
        std::fs::write(repo.path().join(".git/HEAD.lock"), b"").unwrap();
        assert_eq!(force_clear(repo.path()).await.unwrap(), 1);
        assert_eq!(force_clear(repo.path()).await.unwrap(), 0);
    }
}
