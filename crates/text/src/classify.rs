use crate::canonical::canonicalize;
use crate::consts::LEGACY_CHARSETS;
use crate::diff::{DiffStats, diff_stats};
use encoding_rs::Encoding;
use std::time::Duration;
use tracing::instrument;

/// Time budget for the character diff of a single pair of snapshots.
pub const DEFAULT_DIFF_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of comparing a new snapshot against the one stored before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// The difference is noise (date line, whitespace, charset) and should
    /// not be surfaced as a new visible version.
    pub boring: bool,
    /// Size of the change; only present for real changes.
    pub diff: Option<DiffStats>,
}
impl Classification {
    fn boring() -> Self {
        Self { boring: true, diff: None }
    }
}

/// Decides whether a change between two snapshots is meaningful.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    diff_timeout: Duration,
}
impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_DIFF_TIMEOUT)
    }
}
impl Classifier {
    pub fn new(diff_timeout: Duration) -> Self {
        Self { diff_timeout }
    }

    /// Classify the change from `previous` to `new`.
    ///
    /// 1. Canonical forms with the same words after the first (date) line
    ///    are boring.
    /// 2. If re-encoding the canonical previous text in one of the legacy
    ///    charsets reproduces `new` byte for byte, the change is a charset
    ///    artifact and is boring. This is a heuristic and nothing more.
    /// 3. Anything else is a real change; the raw texts are diffed and the
    ///    inserted and deleted characters counted.
    #[instrument(level = "debug", skip_all, fields(previous = previous.len(), new = new.len()))]
    pub fn classify(&self, previous: &[u8], new: &[u8]) -> Classification {
        let previous_text = String::from_utf8_lossy(previous);
        let new_text = String::from_utf8_lossy(new);
        let previous_canonical = canonicalize(&previous_text);
        let new_canonical = canonicalize(&new_text);

        if body_words(&previous_canonical).eq(body_words(&new_canonical)) {
            tracing::debug!("Only the date line or whitespace changed");
            return Classification::boring();
        }
        if let Some(encoding) = reencoding_match(&previous_canonical, new) {
            tracing::debug!(charset = encoding.name(), "Change explained by re-encoding");
            return Classification::boring();
        }
        let stats = diff_stats(&previous_text, &new_text, self.diff_timeout);
        Classification { boring: false, diff: Some(stats) }
    }
}

/// Classify with the default diff budget.
pub fn classify(previous: &[u8], new: &[u8]) -> Classification {
    Classifier::default().classify(previous, new)
}

fn body_words(canonical: &str) -> std::str::SplitWhitespace<'_> {
    canonical.split_once('\n').map_or("", |(_, body)| body).split_whitespace()
}

/// Find the first legacy charset in which `text` encodes to exactly
/// `target`. Charsets without an encoder, and encodings that had to
/// substitute unmappable characters, count as no match.
pub fn reencoding_match(text: &str, target: &[u8]) -> Option<&'static Encoding> {
    LEGACY_CHARSETS.iter().find_map(|label| {
        let Some(encoding) = Encoding::for_label(label.as_bytes()) else {
            tracing::trace!(charset = label, "No encoder for legacy charset");
            return None;
        };
        let (bytes, _, unmappable) = encoding.encode(text);
        (!unmappable && bytes.as_ref() == target).then_some(encoding)
    })
}
