//! Word-level diff between two snapshots.
//!
//! Diffing whole words rather than characters keeps a rewritten phrase
//! together as one removal and one insertion, instead of a confetti of
//! single-character edits that happen to share letters.

use serde::{Deserialize, Serialize};
use similar::{Algorithm, ChangeTag, TextDiff};
use std::time::Duration;

/// Characters added and removed between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub chars_added: u64,
    pub chars_removed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fragment {
    pub(crate) tag: ChangeTag,
    pub(crate) text: String,
}

/// Diff `old` against `new` and report the size of the edits in characters.
pub(crate) fn diff_stats(old: &str, new: &str, timeout: Duration) -> DiffStats {
    diff_fragments(old, new, timeout).iter().fold(DiffStats::default(), |mut stats, fragment| {
        let len = fragment.text.chars().count() as u64;
        match fragment.tag {
            ChangeTag::Insert => stats.chars_added += len,
            ChangeTag::Delete => stats.chars_removed += len,
            ChangeTag::Equal => {},
        }
        stats
    })
}

/// Run the word diff and coalesce consecutive changes of the same kind.
///
/// Replaced words come out as a deletion followed by an insertion. Exceeding
/// `timeout` still produces a valid (if less minimal) diff.
pub(crate) fn diff_fragments(old: &str, new: &str, timeout: Duration) -> Vec<Fragment> {
    let diff = TextDiff::configure().algorithm(Algorithm::Myers).timeout(timeout).diff_words(old, new);
    let mut fragments: Vec<Fragment> = Vec::new();
    for change in diff.iter_all_changes() {
        match fragments.last_mut() {
            Some(last) if last.tag == change.tag() => last.text.push_str(change.value()),
            _ => fragments.push(Fragment { tag: change.tag(), text: change.value().to_string() }),
        }
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const BUDGET: Duration = Duration::from_secs(3);

    fn fragment(tag: ChangeTag, text: &str) -> Fragment {
        Fragment { tag, text: text.to_string() }
    }

    #[test]
    fn test_insertion_only() {
        let stats = diff_stats("hello world", "hello brave world", BUDGET);
        assert_eq!(stats, DiffStats { chars_added: 6, chars_removed: 0 });
    }

    #[test]
    fn test_identical_text_has_no_edits() {
        let stats = diff_stats("unchanged", "unchanged", BUDGET);
        assert_eq!(stats, DiffStats::default());
        assert_eq!(diff_fragments("unchanged", "unchanged", BUDGET), vec![fragment(ChangeTag::Equal, "unchanged")]);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let stats = diff_stats("un café noir", "un thé noir", BUDGET);
        assert_eq!(stats, DiffStats { chars_added: 3, chars_removed: 4 });
    }

    #[rstest]
    #[case::replaced_word("the cat sat", "the dog sat", vec![
        fragment(ChangeTag::Equal, "the "),
        fragment(ChangeTag::Delete, "cat"),
        fragment(ChangeTag::Insert, "dog"),
        fragment(ChangeTag::Equal, " sat"),
    ])]
    #[case::rewritten_phrase("Minister resigns", "Minister refuses to resign", vec![
        fragment(ChangeTag::Equal, "Minister "),
        fragment(ChangeTag::Delete, "resigns"),
        fragment(ChangeTag::Insert, "refuses to resign"),
    ])]
    fn test_fragments_keep_words_whole(#[case] old: &str, #[case] new: &str, #[case] expected: Vec<Fragment>) {
        assert_eq!(diff_fragments(old, new, BUDGET), expected);
    }

    #[test]
    fn test_rewritten_phrase_counts_whole_words() {
        let stats = diff_stats("Minister resigns", "Minister refuses to resign", BUDGET);
        assert_eq!(stats, DiffStats { chars_added: 17, chars_removed: 7 });
    }
}
