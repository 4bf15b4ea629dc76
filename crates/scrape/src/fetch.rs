//! HTTP page fetching with bounded retries.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use presswatch_config::FetchConfig;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// How pages are requested and when a failed request is worth repeating.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub retries: u32,
    pub backoff: Duration,
    pub user_agent: String,
    /// A page containing any of these is treated like a 503.
    pub retry_markers: Vec<String>,
}

impl From<&FetchConfig> for FetchPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retries: config.retries,
            backoff: config.backoff(),
            user_agent: config.user_agent.clone(),
            retry_markers: config.retry_markers.clone(),
        }
    }
}

/// A fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Found(String),
    /// The server answered 404 or 410.
    Gone,
}

enum Attempt {
    Done(Page),
    Transient(&'static str),
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    policy: Arc<FetchPolicy>,
}

impl HttpFetcher {
    pub fn new(policy: FetchPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(policy.timeout)
            .user_agent(policy.user_agent.as_str())
            .build()
            .or_raise(|| ErrorKind::Config("could not build HTTP client".to_string()))?;
        Ok(Self { client, policy: Arc::new(policy) })
    }

    /// Fetch `url`, retrying timeouts, 503s and pages carrying a retry marker.
    ///
    /// Fails with [`ErrorKind::TooManyAttempts`] once every retry was spent
    /// on transient failures, and with [`ErrorKind::Fetch`] on any other
    /// unsuccessful response.
    #[instrument(skip(self))]
    pub async fn get(&self, url: &str) -> Result<Page> {
        let mut attempt = 0;
        loop {
            match self.attempt(url).await? {
                Attempt::Done(page) => return Ok(page),
                Attempt::Transient(reason) if attempt < self.policy.retries => {
                    attempt += 1;
                    tracing::warn!(url, attempt, reason, "Transient failure, retrying");
                    tokio::time::sleep(self.policy.backoff).await;
                },
                Attempt::Transient(reason) => {
                    tracing::error!(url, reason, "Too many attempts");
                    exn::bail!(ErrorKind::TooManyAttempts(url.to_string()));
                },
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<Attempt> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return Ok(Attempt::Transient("timed out")),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Fetch(url.to_string())),
        };
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => return Ok(Attempt::Done(Page::Gone)),
            StatusCode::SERVICE_UNAVAILABLE => return Ok(Attempt::Transient("service unavailable")),
            status if !status.is_success() => exn::bail!(ErrorKind::Fetch(format!("{url} ({status})"))),
            _ => {},
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) if err.is_timeout() => return Ok(Attempt::Transient("timed out reading body")),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Fetch(url.to_string())),
        };
        if self.policy.retry_markers.iter().any(|marker| body.contains(marker.as_str())) {
            return Ok(Attempt::Transient("retry marker in page"));
        }
        Ok(Attempt::Done(Page::Found(body)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `responses` in order, one per connection, then stop accepting.
    pub(crate) async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                let mut request = Vec::new();
                let mut buffer = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let read = socket.read(&mut buffer).await.unwrap();
                    if read == 0 {
                        break;
                    }
                    request.extend_from_slice(&buffer[..read]);
                }
                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: text/html; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        (address, hits)
    }

    pub(crate) fn policy(retries: u32) -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_secs(5),
            retries,
            backoff: Duration::from_millis(1),
            user_agent: "presswatch-test".to_string(),
            retry_markers: vec!["<title>Advertisement</title>".to_string()],
        }
    }

    #[tokio::test]
    async fn test_found() {
        let (address, hits) = serve(vec![(200, "<p>hello</p>")]).await;
        let fetcher = HttpFetcher::new(policy(0)).unwrap();
        let page = fetcher.get(&format!("{address}/story")).await.unwrap();
        assert_eq!(page, Page::Found("<p>hello</p>".to_string()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_pages_are_gone() {
        let (address, _) = serve(vec![(404, "nope"), (410, "gone")]).await;
        let fetcher = HttpFetcher::new(policy(0)).unwrap();
        assert_eq!(fetcher.get(&address).await.unwrap(), Page::Gone);
        assert_eq!(fetcher.get(&address).await.unwrap(), Page::Gone);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (address, hits) = serve(vec![
            (503, "busy"),
            (200, "<title>Advertisement</title>"),
            (200, "<p>story</p>"),
        ])
        .await;
        let fetcher = HttpFetcher::new(policy(2)).unwrap();
        let page = fetcher.get(&address).await.unwrap();
        assert_eq!(page, Page::Found("<p>story</p>".to_string()));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (address, hits) = serve(vec![(503, "busy"), (503, "busy"), (503, "busy")]).await;
        let fetcher = HttpFetcher::new(policy(2)).unwrap();
        let err = fetcher.get(&address).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TooManyAttempts(_)));
        assert!(err.is_retryable());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_server_errors_are_not_retried() {
        let (address, hits) = serve(vec![(500, "broken"), (200, "never served")]).await;
        let fetcher = HttpFetcher::new(policy(3)).unwrap();
        let err = fetcher.get(&address).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Fetch(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
