//! HTTP document fetching.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use tracing::debug;
use url::Url;

use kbharvest_shared::{HarvestError, Result};

/// User-Agent string for all harvest requests.
pub const USER_AGENT: &str = concat!("kbharvest/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects followed per request.
const MAX_REDIRECTS: usize = 5;

/// A fetched page: the requested URL, the HTTP status and the body.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: Url,
    pub status: u16,
    pub body: String,
}

impl FetchedDocument {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx answer into a transport error.
    pub fn ensure_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HarvestError::Transport(format!(
                "{}: HTTP {}",
                self.url, self.status
            )))
        }
    }

    /// Parse the body as an HTML document.
    ///
    /// `Html` is not `Send`; parse, select, and drop it before the next `.await`.
    pub fn parse(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

/// Visits a URL and returns its document.
///
/// A non-2xx status is not an error at this level; callers decide
/// (list pages may still carry a next link, article pages may not).
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedDocument>;
}

/// `reqwest`-backed fetcher with a fixed connect/read timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs.max(1));
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedDocument> {
        debug!(%url, "fetching document");

        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            if e.is_timeout() {
                HarvestError::Transport(format!("{url}: timed out"))
            } else {
                HarvestError::Transport(format!("{url}: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::Transport(format!("{url}: body read failed: {e}")))?;

        Ok(FetchedDocument {
            url: url.clone(),
            status,
            body,
        })
    }
}
