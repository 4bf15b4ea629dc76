//! Feed discovery: candidate article links on a feeder page.

use crate::consts::ANCHOR_SELECTOR;
use crate::url::{absolutize, canonicalize_url, site_root};
use regex::Regex;
use scraper::Html;
use std::collections::HashSet;

/// Links on `html` (fetched from `feeder_url`) that match `pattern`.
///
/// Links without a scheme are resolved against the feeder site's root
/// before matching.
pub fn feed_links(html: &str, feeder_url: &str, pattern: &Regex) -> Vec<String> {
    let Some(root) = site_root(feeder_url) else {
        tracing::warn!(feeder_url, "Feeder page URL has no host");
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter_map(|href| absolutize(&root, href.trim()))
        .filter(|url| pattern.is_match(url))
        .collect()
}

/// Canonicalize URLs and drop duplicates, keeping first-seen order.
pub(crate) fn dedupe(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .map(|url| canonicalize_url(&url))
        .filter(|url| !url.is_empty() && seen.insert(url.clone()))
        .collect()
}
