//! List-page crawl strategy.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use scraper::Selector;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use kbharvest_crawler::{
    DocumentFetcher, FetchedDocument, id_from_url, normalize_url, parse_selector, select_links,
};
use kbharvest_shared::{CrawlConfig, DiscoveryUnit, HarvestError, Result};

use crate::{DiscoveryStats, UnitSource};

/// Walks paginated list pages starting at a seed URL.
pub struct CrawlSource {
    fetcher: Arc<dyn DocumentFetcher>,
    seed: Url,
    item_selector: Selector,
    next_selector: Selector,
    item_pattern: Regex,
    id_suffix_len: usize,
}

impl CrawlSource {
    /// Build a crawl source from the `[crawl]` config section.
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, config: &CrawlConfig) -> Result<Self> {
        let seed = Url::parse(&config.seed_url).map_err(|e| {
            HarvestError::config(format!("invalid seed URL '{}': {e}", config.seed_url))
        })?;
        let item_pattern = Regex::new(&config.item_pattern).map_err(|e| {
            HarvestError::config(format!("invalid item pattern '{}': {e}", config.item_pattern))
        })?;

        Ok(Self {
            fetcher,
            seed,
            item_selector: parse_selector(&config.item_selector)?,
            next_selector: parse_selector(&config.next_selector)?,
            item_pattern,
            id_suffix_len: config.id_suffix_len,
        })
    }

    /// Dedup key of an article link: the article id it maps to.
    ///
    /// Links whose id cannot be derived keep their normalized URL as key;
    /// extraction reports them later.
    fn article_key(&self, url: &Url) -> String {
        id_from_url(url, self.id_suffix_len).unwrap_or_else(|_| normalize_url(url))
    }

    /// Item links and next-page candidates of one list page.
    fn scan(&self, doc: &FetchedDocument) -> (Vec<Url>, Vec<Url>) {
        let html = doc.parse();
        let items = select_links(&html, &self.item_selector, &doc.url);
        let next = select_links(&html, &self.next_selector, &doc.url);
        (items, next)
    }
}

#[async_trait]
impl UnitSource for CrawlSource {
    fn strategy(&self) -> &'static str {
        "crawl"
    }

    fn origin(&self) -> String {
        self.seed.to_string()
    }

    #[instrument(skip_all, fields(seed = %self.seed))]
    async fn discover(&self, units: mpsc::Sender<DiscoveryUnit>) -> Result<DiscoveryStats> {
        let mut stats = DiscoveryStats::default();
        let mut visited_pages = HashSet::new();
        let mut sent = HashSet::new();
        let mut current = Some(self.seed.clone());

        while let Some(page_url) = current.take() {
            if !visited_pages.insert(normalize_url(&page_url)) {
                warn!(%page_url, "next-page link points to a visited page, stopping");
                break;
            }

            debug!(%page_url, "visiting list page");
            let doc = self
                .fetcher
                .fetch(&page_url)
                .await
                .map_err(|e| HarvestError::Discovery(format!("list page {page_url}: {e}")))?;
            stats.pages += 1;

            let (items, next_links) = self.scan(&doc);

            let mut candidates: Vec<Url> = Vec::new();
            for link in next_links {
                if !candidates.iter().any(|c| normalize_url(c) == normalize_url(&link)) {
                    candidates.push(link);
                }
            }
            if candidates.len() > 1 {
                warn!(
                    %page_url,
                    count = candidates.len(),
                    "several next-page links, following the first"
                );
            }
            current = candidates.into_iter().next();

            if !doc.is_success() {
                if current.is_some() {
                    warn!(%page_url, status = doc.status, "list page failed, skipping to next page");
                    stats.skipped_pages += 1;
                    continue;
                }
                return Err(HarvestError::Discovery(format!(
                    "list page {page_url}: HTTP {}",
                    doc.status
                )));
            }

            let mut page_units = 0;
            for url in items {
                if !self.item_pattern.is_match(url.as_str()) {
                    stats.ignored += 1;
                    continue;
                }
                if !sent.insert(self.article_key(&url)) {
                    stats.duplicates += 1;
                    continue;
                }
                if units.send(DiscoveryUnit::Page(url)).await.is_err() {
                    debug!("unit consumer closed, stopping crawl");
                    stats.cancelled = true;
                    return Ok(stats);
                }
                stats.units += 1;
                page_units += 1;
            }

            info!(
                %page_url,
                page = stats.pages,
                units = page_units,
                has_next = current.is_some(),
                "list page scanned"
            );
        }

        info!(
            pages = stats.pages,
            units = stats.units,
            ignored = stats.ignored,
            duplicates = stats.duplicates,
            "crawl discovery complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbharvest_crawler::HttpFetcher;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::discover_all;

    fn config(seed: String) -> CrawlConfig {
        CrawlConfig {
            seed_url: seed,
            item_selector: ".result-table .result-cell a[href]".into(),
            item_pattern: r"/kb/doc/\?id=\d{9}$".into(),
            next_selector: ".results_summary a[href]".into(),
            ..CrawlConfig::default()
        }
    }

    fn list_page(items: &[&str], next: Option<&str>) -> String {
        let cells: String = items
            .iter()
            .map(|href| format!(r#"<div class="result-cell"><a href="{href}">Article</a></div>"#))
            .collect();
        let next = next
            .map(|href| format!(r#"<div class="results_summary"><a href="{href}">Next</a></div>"#))
            .unwrap_or_default();
        format!(r#"<html><body><div class="result-table">{cells}</div>{next}</body></html>"#)
    }

    async fn mount(server: &MockServer, page: &str, body: String) {
        Mock::given(method("GET"))
            .and(path("/kb/"))
            .and(query_param("page", page))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn source(server: &MockServer) -> CrawlSource {
        let fetcher = Arc::new(HttpFetcher::new(5).unwrap());
        CrawlSource::new(fetcher, &config(format!("{}/kb/?page=1", server.uri()))).unwrap()
    }

    fn ids(units: &[DiscoveryUnit]) -> Vec<String> {
        units
            .iter()
            .map(|u| match u {
                DiscoveryUnit::Page(url) => url.query().unwrap_or_default().to_string(),
                DiscoveryUnit::Record(r) => r.id.clone(),
            })
            .collect()
    }

    #[tokio::test]
    async fn two_items_then_empty_last_page() {
        let server = MockServer::start().await;
        mount(
            &server,
            "1",
            list_page(
                &["/kb/doc/?id=000021082", "/kb/doc/?id=000020001"],
                Some("/kb/?page=2"),
            ),
        )
        .await;
        mount(&server, "2", list_page(&[], None)).await;

        let (units, stats) = discover_all(&source(&server)).await.unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(ids(&units), vec!["id=000021082", "id=000020001"]);
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.units, 2);
    }

    #[tokio::test]
    async fn non_matching_links_are_ignored_and_duplicates_dropped() {
        let server = MockServer::start().await;
        mount(
            &server,
            "1",
            list_page(
                &["/kb/doc/?id=000021082", "/blog/post-1", "/kb/doc/?id=123"],
                Some("/kb/?page=2"),
            ),
        )
        .await;
        mount(
            &server,
            "2",
            list_page(&["/kb/doc/?id=000021082", "/kb/doc/?id=000020002"], None),
        )
        .await;

        let (units, stats) = discover_all(&source(&server)).await.unwrap();

        assert_eq!(ids(&units), vec!["id=000021082", "id=000020002"]);
        assert_eq!(stats.ignored, 2);
        assert_eq!(stats.duplicates, 1);
    }

    #[tokio::test]
    async fn aliased_links_to_one_article_yield_one_unit() {
        let server = MockServer::start().await;
        mount(
            &server,
            "1",
            list_page(
                &["/kb/doc/?id=000021082", "/kb/doc?id=000021082"],
                None,
            ),
        )
        .await;

        let fetcher = Arc::new(HttpFetcher::new(5).unwrap());
        let mut cfg = config(format!("{}/kb/?page=1", server.uri()));
        cfg.item_pattern = r"/kb/doc/?\?id=\d{9}$".into();
        let source = CrawlSource::new(fetcher, &cfg).unwrap();

        let (units, stats) = discover_all(&source).await.unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(stats.duplicates, 1);
    }

    #[tokio::test]
    async fn cyclic_next_link_terminates() {
        let server = MockServer::start().await;
        mount(
            &server,
            "1",
            list_page(&["/kb/doc/?id=000021082"], Some("/kb/?page=2")),
        )
        .await;
        mount(
            &server,
            "2",
            list_page(&["/kb/doc/?id=000020001"], Some("/kb/?page=1")),
        )
        .await;

        let (units, stats) = discover_all(&source(&server)).await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(stats.pages, 2);
    }

    #[tokio::test]
    async fn unreachable_seed_is_discovery_error() {
        let server = MockServer::start().await;
        Mock::given(path("/kb/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = discover_all(&source(&server)).await.unwrap_err();
        assert_eq!(err.kind(), kbharvest_shared::ErrorKind::Discovery);
    }

    #[tokio::test]
    async fn failed_page_with_next_link_is_skipped() {
        let server = MockServer::start().await;
        mount(
            &server,
            "1",
            list_page(&["/kb/doc/?id=000021082"], Some("/kb/?page=2")),
        )
        .await;
        Mock::given(path("/kb/"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_string(list_page(&["/kb/doc/?id=000099999"], Some("/kb/?page=3"))),
            )
            .mount(&server)
            .await;
        mount(&server, "3", list_page(&["/kb/doc/?id=000020003"], None)).await;

        let (units, stats) = discover_all(&source(&server)).await.unwrap();
        assert_eq!(ids(&units), vec!["id=000021082", "id=000020003"]);
        assert_eq!(stats.skipped_pages, 1);
    }

    #[tokio::test]
    async fn closed_consumer_cancels_quietly() {
        let server = MockServer::start().await;
        mount(
            &server,
            "1",
            list_page(&["/kb/doc/?id=000021082", "/kb/doc/?id=000020001"], None),
        )
        .await;

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let stats = source(&server).discover(tx).await.unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.units, 0);
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let mut cfg = config("https://kb.example.com/kb/".into());
        cfg.item_pattern = "(unclosed".into();
        let fetcher = Arc::new(HttpFetcher::new(5).unwrap());
        let err = CrawlSource::new(fetcher, &cfg).err().unwrap();
        assert_eq!(err.kind(), kbharvest_shared::ErrorKind::Config);
    }
}
