//! URL helpers shared by discovery and the parser registry.

use reqwest::Url;

/// Strip the query string and fragment from a discovered URL.
///
/// ```
/// use presswatch_scrape::canonicalize_url;
///
/// assert_eq!(canonicalize_url(" http://example.com/a?x=1#top "), "http://example.com/a");
/// ```
pub fn canonicalize_url(url: &str) -> String {
    let url = url.trim();
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].trim().to_string()
}

/// Lower-cased host of `url`, if it has one.
pub fn host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.host_str().map(str::to_ascii_lowercase)
}

/// Root (`scheme://host[:port]/`) of the site `url` belongs to.
pub(crate) fn site_root(url: &str) -> Option<Url> {
    let parsed = Url::parse(url).ok()?;
    parsed.host_str()?;
    parsed.join("/").ok()
}

/// Turn a link found on a feeder page into an absolute URL.
///
/// Links that already carry a scheme are kept verbatim. Anything else is
/// joined onto the site root, so a relative link such as `2024/05/story.html`
/// resolves against `/` rather than the feeder page's directory.
pub(crate) fn absolutize(root: &Url, href: &str) -> Option<String> {
    if Url::parse(href).is_ok() {
        return Some(href.to_string());
    }
    if root.path() != "/" {
        return None;
    }
    root.join(href).ok().map(String::from)
}
