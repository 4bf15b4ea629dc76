//! Path validation and article file naming.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the repository root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use presswatch_storage::validate_path;
/// assert!(validate_path("www.example.com/2024/05/story.html").is_ok());
/// assert!(validate_path("a/../story.html").is_ok()); // (never leaves the root)
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././correct//./story/").unwrap(),
///     Path::new("correct/story")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls, so reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    // Git's own metadata directory is off limits to article files.
    if components.first().is_some_and(|first| *first == ".git") {
        exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// File name of an article inside its partition, derived from its URL.
///
/// Trailing slashes are dropped and the scheme stripped. HTTPS URLs keep a
/// literal `https:/` prefix so that files named before HTTPS existed on a
/// site don't collide with the HTTPS copies.
///
/// ```
/// use std::path::Path;
/// use presswatch_storage::article_path;
///
/// assert_eq!(article_path("http://example.com/story/").unwrap(), Path::new("example.com/story"));
/// assert_eq!(article_path("https://example.com/story").unwrap(), Path::new("https:/example.com/story"));
/// assert!(article_path("ftp://example.com/story").is_err());
/// ```
pub fn article_path(url: &str) -> Result<PathBuf> {
    let url = url.trim_end_matches('/');
    let relative = if let Some(rest) = url.strip_prefix("http://") {
        rest.to_string()
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("https:/{rest}")
    } else {
        exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
    };
    validate(relative)
}

/// A validated path rendered the way git expects it on the command line.
pub(crate) fn git_path(path: &Path) -> Result<String> {
    let validated = validate(path)?;
    let segments = validated
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>();
    match segments {
        Some(segments) => Ok(segments.join("/")),
        None => exn::bail!(ErrorKind::InvalidPath(validated)),
    }
}
