//! The scrape side of presswatch.
//!
//! A cycle discovers candidate article URLs on each source's feeder pages,
//! registers the new ones, picks the articles due for a recheck, and
//! commits a snapshot of every article whose content changed. Parsing is
//! delegated to [`ArticleParser`] implementations looked up by domain in a
//! [`ParserRegistry`].

mod consts;
mod cycle;
mod discover;
pub mod error;
mod fetch;
mod history;
mod parser;
pub mod priority;
mod url;

pub use crate::cycle::{CycleReport, Recheck, Scraper, Settings};
pub use crate::discover::feed_links;
pub use crate::fetch::{FetchPolicy, HttpFetcher, Page};
pub use crate::history::fetch_text;
pub use crate::parser::{ArticleParser, FetchOutcome, Fetched, ParserHandle, ParserRegistry, SelectorParser, UNDATED};
pub use crate::url::{canonicalize_url, host};
