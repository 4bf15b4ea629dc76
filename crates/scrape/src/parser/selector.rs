use crate::consts::WHITESPACE_RUN;
use crate::discover::feed_links;
use crate::error::{ErrorKind, Result};
use crate::fetch::{HttpFetcher, Page};
use crate::parser::{ArticleParser, FetchOutcome, Fetched};
use async_trait::async_trait;
use exn::ResultExt;
use presswatch_config::SourceConfig;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use time::UtcDateTime;
use tracing::instrument;

fn selector(source: &str, field: &str, css: &str) -> Result<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Ok(selector),
        Err(err) => exn::bail!(ErrorKind::Config(format!("{source}: invalid {field} selector {css:?}: {err}"))),
    }
}

fn optional_selector(source: &str, field: &str, css: Option<&str>) -> Result<Option<Selector>> {
    css.map(|css| selector(source, field, css)).transpose()
}

/// Collapsed text content of an element.
fn text_of(element: ElementRef<'_>) -> String {
    let text = element.text().collect::<String>();
    WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned()
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document.select(selector).map(text_of).find(|text| !text.is_empty())
}

/// A parser driven entirely by configured CSS selectors.
///
/// The title and body selectors are required; a page where either matches
/// nothing is not an article. When an article marker is configured, a page
/// without it is not an article either. Every body match becomes one
/// paragraph of the snapshot.
pub struct SelectorParser {
    name: String,
    domains: Vec<String>,
    feeder_pages: Vec<String>,
    feeder_pattern: Regex,
    title: Selector,
    byline: Option<Selector>,
    dateline: Option<Selector>,
    body: Selector,
    article_marker: Option<Selector>,
    fetcher: HttpFetcher,
}

impl SelectorParser {
    pub fn new(source: &SourceConfig, fetcher: HttpFetcher) -> Result<Self> {
        let name = source.name.as_str();
        let feeder_pattern = Regex::new(&source.feeder_pattern)
            .or_raise(|| ErrorKind::Config(format!("{name}: invalid feeder pattern")))?;
        Ok(Self {
            name: source.name.clone(),
            domains: source.domains.iter().map(|domain| domain.to_ascii_lowercase()).collect(),
            feeder_pages: source.feeder_pages.clone(),
            feeder_pattern,
            title: selector(name, "title", &source.title)?,
            byline: optional_selector(name, "byline", source.byline.as_deref())?,
            dateline: optional_selector(name, "dateline", source.dateline.as_deref())?,
            body: selector(name, "body", &source.body)?,
            article_marker: optional_selector(name, "article marker", source.article_marker.as_deref())?,
            fetcher,
        })
    }

    /// Parse a fetched page.
    pub fn parse(&self, html: &str, captured_at: UtcDateTime) -> FetchOutcome {
        let document = Html::parse_document(html);
        if let Some(marker) = &self.article_marker
            && document.select(marker).next().is_none()
        {
            return FetchOutcome::NotAnArticle;
        }
        let Some(title) = first_text(&document, &self.title) else {
            return FetchOutcome::NotAnArticle;
        };
        let paragraphs = document.select(&self.body).map(text_of).filter(|p| !p.is_empty()).collect::<Vec<_>>();
        if paragraphs.is_empty() {
            return FetchOutcome::NotAnArticle;
        }
        let optional = |selector: &Option<Selector>| {
            selector.as_ref().and_then(|selector| first_text(&document, selector)).unwrap_or_default()
        };
        FetchOutcome::Article(Fetched {
            title,
            byline: optional(&self.byline),
            body: paragraphs.join("\n\n"),
            dateline: optional(&self.dateline),
            captured_at,
        })
    }
}

#[async_trait]
impl ArticleParser for SelectorParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn domains(&self) -> &[String] {
        &self.domains
    }

    #[instrument(skip(self), fields(parser = %self.name))]
    async fn fetch(&self, url: &str) -> Result<FetchOutcome> {
        match self.fetcher.get(url).await? {
            Page::Found(html) => Ok(self.parse(&html, UtcDateTime::now())),
            Page::Gone => {
                tracing::warn!(url, "Article missing");
                Ok(FetchOutcome::Gone)
            },
        }
    }

    #[instrument(skip(self), fields(parser = %self.name))]
    async fn feed_urls(&self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        for feeder in &self.feeder_pages {
            match self.fetcher.get(feeder).await.or_raise(|| ErrorKind::Discovery)? {
                Page::Found(html) => urls.extend(feed_links(&html, feeder, &self.feeder_pattern)),
                Page::Gone => tracing::warn!(feeder, "Feeder page missing"),
            }
        }
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::{policy, serve};

    fn source() -> SourceConfig {
        SourceConfig {
            name: "example".to_string(),
            domains: vec!["WWW.Example.com".to_string()],
            feeder_pages: Vec::new(),
            feeder_pattern: r"^https?://[^/]+/\d{4}/".to_string(),
            title: "h1.headline".to_string(),
            byline: Some(".byline".to_string()),
            dateline: Some("time".to_string()),
            body: "article p".to_string(),
            article_marker: Some("meta[property='og:type'][content='article']".to_string()),
        }
    }

    fn parser() -> SelectorParser {
        SelectorParser::new(&source(), HttpFetcher::new(policy(0)).unwrap()).unwrap()
    }

    const ARTICLE: &str = r#"
        <html><head><meta property="og:type" content="article"></head><body>
            <h1 class="headline">  Storm   hits coast </h1>
            <p class="byline">By A. Reporter</p>
            <time>May 1, 2024</time>
            <article>
                <p>The storm made landfall
                   early on Tuesday.</p>
                <p></p>
                <p>Residents were evacuated.</p>
            </article>
        </body></html>
    "#;

    #[test]
    fn test_parse_article() {
        let now = UtcDateTime::now();
        let FetchOutcome::Article(fetched) = parser().parse(ARTICLE, now) else {
            panic!("expected an article");
        };
        assert_eq!(fetched.title, "Storm hits coast");
        assert_eq!(fetched.byline, "By A. Reporter");
        assert_eq!(fetched.dateline, "May 1, 2024");
        assert_eq!(fetched.body, "The storm made landfall early on Tuesday.\n\nResidents were evacuated.");
        assert_eq!(fetched.captured_at, now);
    }

    #[test]
    fn test_missing_marker_is_not_an_article() {
        let html = ARTICLE.replace("content=\"article\"", "content=\"website\"");
        assert_eq!(parser().parse(&html, UtcDateTime::now()), FetchOutcome::NotAnArticle);
    }

    #[test]
    fn test_missing_body_is_not_an_article() {
        let html = r#"<meta property="og:type" content="article"><h1 class="headline">Title</h1>"#;
        assert_eq!(parser().parse(html, UtcDateTime::now()), FetchOutcome::NotAnArticle);
    }

    #[test]
    fn test_domains_are_lower_cased() {
        assert_eq!(parser().domains(), ["www.example.com".to_string()]);
    }

    #[test]
    fn test_invalid_selector_is_a_config_error() {
        let mut source = source();
        source.body = "p[".to_string();
        let err = SelectorParser::new(&source, HttpFetcher::new(policy(0)).unwrap()).err().unwrap();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }

    #[tokio::test]
    async fn test_fetch_and_feed() {
        let feeder = r#"<a href="/2024/05/01/story.html">a</a><a href="/about">b</a>"#;
        let (address, _) = serve(vec![(200, feeder), (200, ARTICLE), (404, "")]).await;
        let mut source = source();
        source.feeder_pages = vec![format!("{address}/")];
        let parser = SelectorParser::new(&source, HttpFetcher::new(policy(0)).unwrap()).unwrap();

        let urls = parser.feed_urls().await.unwrap();
        assert_eq!(urls, vec![format!("{address}/2024/05/01/story.html")]);
        assert!(matches!(parser.fetch(&urls[0]).await.unwrap(), FetchOutcome::Article(_)));
        assert_eq!(parser.fetch(&urls[0]).await.unwrap(), FetchOutcome::Gone);
    }
}
