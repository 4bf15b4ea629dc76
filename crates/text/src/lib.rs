//! Text normalization and change classification for article snapshots.
//!
//! Snapshots are compared in their canonical form so that whitespace noise
//! and mangled encodings never show up as a "real" change. Everything in this
//! crate is pure and synchronous; the only budgeted work is the character
//! diff, which gives up gracefully when its time budget runs out.

mod canonical;
mod classify;
mod consts;
mod diff;

pub use crate::canonical::{canonicalize, repair_double_encoding, strip_whitespace};
pub use crate::classify::{Classification, Classifier, DEFAULT_DIFF_TIMEOUT, classify, reencoding_match};
pub use crate::diff::DiffStats;
