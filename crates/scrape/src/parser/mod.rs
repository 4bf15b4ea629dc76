//! Article parsers and the registry that picks one by URL domain.

mod selector;

pub use self::selector::SelectorParser;
use crate::error::{ErrorKind, Result};
use crate::fetch::{FetchPolicy, HttpFetcher};
use crate::url::host;
use async_trait::async_trait;
use presswatch_config::ScrapeConfig;
use presswatch_text::canonicalize;
use std::collections::HashMap;
use std::sync::Arc;
use time::UtcDateTime;

/// The parts of an article page that make up a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub title: String,
    pub byline: String,
    pub body: String,
    /// Publication or update line as printed on the page. It becomes the
    /// first line of the snapshot and is ignored when deciding whether a
    /// change is boring. Pages without one get [`UNDATED`] instead.
    pub dateline: String,
    pub captured_at: UtcDateTime,
}

/// First snapshot line for pages that print no dateline.
///
/// The line must never be empty: blank leading lines are stripped, which
/// would leave the headline in the position the classifier ignores.
pub const UNDATED: &str = "Undated";

impl Fetched {
    /// Canonical bytes committed to the version store.
    pub fn snapshot(&self) -> Vec<u8> {
        let dateline = self.dateline.split_whitespace().collect::<Vec<_>>().join(" ");
        let dateline = if dateline.is_empty() { UNDATED } else { dateline.as_str() };
        let joined = [dateline, self.title.as_str(), self.byline.as_str(), self.body.as_str()].join("\n");
        canonicalize(&joined).into_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Article(Fetched),
    /// The page exists but isn't an article (an index page, a video, ...).
    NotAnArticle,
    /// The page no longer exists.
    Gone,
}

/// Fetches and parses articles of one news source.
#[async_trait]
pub trait ArticleParser: Send + Sync {
    fn name(&self) -> &str;

    /// Lower-cased hosts this parser handles.
    fn domains(&self) -> &[String];

    async fn fetch(&self, url: &str) -> Result<FetchOutcome>;

    /// Candidate article URLs currently linked from the source's feeder pages.
    async fn feed_urls(&self) -> Result<Vec<String>>;
}

pub type ParserHandle = Arc<dyn ArticleParser>;

/// Maps domains to the parser responsible for them.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    by_domain: HashMap<String, ParserHandle>,
    parsers: Vec<ParserHandle>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a [`SelectorParser`] for every configured source, sharing one
    /// HTTP client between them.
    pub fn from_config(config: &ScrapeConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(FetchPolicy::from(&config.fetch))?;
        let mut registry = Self::new();
        for source in &config.sources {
            registry.register(Arc::new(SelectorParser::new(source, fetcher.clone())?))?;
        }
        Ok(registry)
    }

    /// Add a parser. A domain may only be claimed by one parser.
    pub fn register(&mut self, parser: ParserHandle) -> Result<()> {
        for domain in parser.domains() {
            let domain = domain.to_ascii_lowercase();
            if let Some(existing) = self.by_domain.get(&domain) {
                exn::bail!(ErrorKind::Config(format!(
                    "domain {domain} claimed by both {} and {}",
                    existing.name(),
                    parser.name()
                )));
            }
            self.by_domain.insert(domain, parser.clone());
        }
        self.parsers.push(parser);
        Ok(())
    }

    pub fn for_url(&self, url: &str) -> Option<&ParserHandle> {
        self.by_domain.get(&host(url)?)
    }

    pub fn parsers(&self) -> &[ParserHandle] {
        &self.parsers
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}
