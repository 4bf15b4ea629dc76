use super::GitStore;
use super::lock;
use crate::error::{ErrorKind, Result};
use std::path::Path;
use std::process::{ExitStatus, Output};
use tokio::process::Command;

/// Captured result of one git invocation.
pub(crate) struct GitOutput {
    pub(crate) status: ExitStatus,
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: String,
}
impl From<Output> for GitOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status,
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}
impl GitOutput {
    /// Fail with [`ErrorKind::Backend`] unless the command succeeded.
    pub(crate) fn check(self, what: &str) -> Result<Self> {
        if !self.status.success() {
            exn::bail!(ErrorKind::Backend(format!("git {what} failed ({}): {}", self.status, self.stderr.trim())));
        }
        Ok(self)
    }

    /// Standard output as trimmed text.
    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    /// Whether a failed `show` means the object simply isn't there.
    pub(crate) fn is_missing(&self) -> bool {
        let stderr = &self.stderr;
        stderr.contains("does not exist")
            || stderr.contains("exists on disk, but not in")
            || stderr.contains("invalid object name")
            || stderr.contains("bad revision")
            || stderr.contains("unknown revision")
    }
}

impl GitStore {
    /// Run git in `repository`, honouring the lock policy.
    ///
    /// Lock contention is retried `attempts` times with `retry_sleep` in
    /// between. After that the lock files are removed and one final attempt
    /// is made; if that also hits a lock, [`ErrorKind::LockTimeout`] is
    /// returned. Non-zero exit statuses are otherwise returned to the caller
    /// as-is.
    pub(crate) async fn git(&self, repository: &Path, args: &[&str]) -> Result<GitOutput> {
        let attempts = self.locks.attempts.max(1);
        for attempt in 1..=attempts {
            match self.git_once(repository, args).await {
                Err(e) if e.is_lock_timeout() => {
                    tracing::warn!(repository = %repository.display(), attempt, attempts, "Repository is locked");
                    if attempt < attempts {
                        tokio::time::sleep(self.locks.retry_sleep).await;
                    }
                },
                result => return result,
            }
        }
        tracing::warn!(
            repository = %repository.display(),
            "Repository still locked; clearing locks for a final attempt"
        );
        lock::force_clear(repository).await?;
        self.git_once(repository, args).await
    }

    async fn git_once(&self, repository: &Path, args: &[&str]) -> Result<GitOutput> {
        lock::wait_for_index(repository, self.locks.wait, self.locks.poll).await?;
        tracing::trace!(repository = %repository.display(), ?args, "git");
        let output = Command::new(&self.git)
            .args(args)
            .current_dir(repository)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ErrorKind::Io)?;
        let output = GitOutput::from(output);
        if !output.status.success() && lock::is_lock_conflict(&output.stderr) {
            exn::bail!(ErrorKind::LockTimeout(repository.to_path_buf()));
        }
        Ok(output)
    }
}
