//! Snapshot storage for tracked articles.
//!
//! Every article is a single file inside a time-partitioned repository; each
//! committed snapshot gets an immutable [`CommitId`] that later retrieves
//! exactly those bytes. The [`VersionStore`] trait is the only way the rest of
//! the workspace touches the repositories.

pub mod backend;
pub mod error;
mod partition;
mod path;

pub use crate::backend::{CommitOutcome, VersionStore, commit_message};
pub use crate::partition::{CommitId, Partition};
pub use crate::path::{article_path, validate as validate_path};
use std::sync::Arc;

pub type StoreHandle = Arc<dyn VersionStore + Send + Sync>;
