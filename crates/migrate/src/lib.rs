//! Migration of the legacy revision history into the live store.
//!
//! The legacy system kept the same kind of history: a SQLite database of
//! articles and versions (with naive local timestamps) and one git repository
//! per partition. [`Migration`] walks the legacy articles in id order, in
//! resumable batches, and hands each one to the [`Merger`], which replays
//! only the part of its history the live store doesn't already have.

pub mod error;
mod merge;
mod runner;
mod source;
mod zone;

pub use crate::merge::{MergeReport, Merger, Plan};
pub use crate::runner::{Migration, RunReport, Settings, WATERMARK};
pub use crate::source::{LegacyArticle, LegacyDataset, LegacyRecord, LegacyVersion, SourceDataset, SourceHandle};
pub use crate::zone::LocalZone;
