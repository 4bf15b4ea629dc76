//! SQLite metadata store for tracked articles.
//!
//! The content of every snapshot lives in the version store; this database
//! only records which article URLs are tracked, when they were last checked
//! or changed, and one row per committed snapshot pointing at its commit.
//!
//! # Architecture
//! - **Articles**: one per tracked URL, with the partition its history lives
//!   in. Articles brought across from the legacy system remember the legacy
//!   article id they came from.
//! - **Versions**: one per commit, carrying the title, byline, boring flag and
//!   diff statistics of that snapshot. Migrated versions remember the legacy
//!   version id and commit they replay.
//! - **Migration bookkeeping**: a resumable watermark per migration and a log
//!   of articles the migration could not carry across.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::{Database, PoolSettings};
pub use crate::models::{Article, MigratedFrom, MigrationIssue, NewArticle, NewVersion, Version};
pub use crate::repo::Repository;
