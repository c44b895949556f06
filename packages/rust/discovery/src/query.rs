//! Query strategy: paged reads from an external record store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use kbharvest_crawler::USER_AGENT;
use kbharvest_shared::{DiscoveryUnit, HarvestError, QueryConfig, QueryRecord, Result};

use crate::{DiscoveryStats, UnitSource};

/// One page of query results.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPage {
    #[serde(default)]
    pub total_size: Option<u64>,
    /// `true` once this page is the last one.
    pub done: bool,
    /// Continuation cursor for the next page.
    #[serde(default)]
    pub next_records_url: Option<String>,
    #[serde(default)]
    pub records: Vec<Value>,
}

/// Client for a record store that pages results with continuation cursors.
///
/// Session establishment happens before construction.
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Run `query` and return its first page.
    async fn query(&self, query: &str) -> Result<ResultPage>;

    /// Fetch the page behind a continuation cursor.
    async fn query_more(&self, cursor: &str) -> Result<ResultPage>;
}

// ---------------------------------------------------------------------------
// REST client
// ---------------------------------------------------------------------------

/// `reqwest` client for a `/services/data/<version>/query` REST endpoint
/// authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct RestQueryClient {
    client: Client,
    instance_url: Url,
    api_version: String,
    access_token: String,
}

impl RestQueryClient {
    pub fn new(
        instance_url: &str,
        api_version: &str,
        access_token: String,
        timeout_secs: u64,
    ) -> Result<Self> {
        let instance_url = Url::parse(instance_url).map_err(|e| {
            HarvestError::config(format!("invalid instance URL '{instance_url}': {e}"))
        })?;
        let timeout = Duration::from_secs(timeout_secs.max(1));
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            instance_url,
            api_version: api_version.to_string(),
            access_token,
        })
    }

    /// Build a client from the `[query]` config section and a resolved token.
    pub fn from_config(config: &QueryConfig, access_token: String, timeout_secs: u64) -> Result<Self> {
        if config.instance_url.trim().is_empty() {
            return Err(HarvestError::config(
                "query.instance_url is required for the query strategy",
            ));
        }
        Self::new(&config.instance_url, &config.api_version, access_token, timeout_secs)
    }

    async fn get_page(&self, url: Url) -> Result<ResultPage> {
        debug!(%url, "requesting result page");

        let response = self
            .client
            .get(url.as_str())
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| HarvestError::Discovery(format!("{}: {e}", url.path())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(HarvestError::Discovery(format!(
                "{}: HTTP {status}: {snippet}",
                url.path()
            )));
        }

        response
            .json::<ResultPage>()
            .await
            .map_err(|e| HarvestError::Discovery(format!("{}: malformed result page: {e}", url.path())))
    }
}

#[async_trait]
impl QueryClient for RestQueryClient {
    async fn query(&self, query: &str) -> Result<ResultPage> {
        let mut url = self
            .instance_url
            .join(&format!("/services/data/{}/query/", self.api_version))
            .map_err(|e| HarvestError::config(format!("invalid api version: {e}")))?;
        url.query_pairs_mut().append_pair("q", query);
        self.get_page(url).await
    }

    async fn query_more(&self, cursor: &str) -> Result<ResultPage> {
        let url = self
            .instance_url
            .join(cursor)
            .map_err(|e| HarvestError::Discovery(format!("invalid cursor '{cursor}': {e}")))?;
        self.get_page(url).await
    }
}

// ---------------------------------------------------------------------------
// QuerySource
// ---------------------------------------------------------------------------

/// Accumulates every record of a query, then sends one unit per record.
pub struct QuerySource {
    client: Arc<dyn QueryClient>,
    query: String,
    id_field: String,
    instance_url: Option<Url>,
}

impl QuerySource {
    pub fn new(client: Arc<dyn QueryClient>, config: &QueryConfig) -> Result<Self> {
        if config.soql.trim().is_empty() {
            return Err(HarvestError::config("query.soql must not be empty"));
        }
        let instance_url = if config.instance_url.trim().is_empty() {
            None
        } else {
            Some(Url::parse(&config.instance_url).map_err(|e| {
                HarvestError::config(format!(
                    "invalid instance URL '{}': {e}",
                    config.instance_url
                ))
            })?)
        };

        Ok(Self {
            client,
            query: config.soql.clone(),
            id_field: config.id_field.clone(),
            instance_url,
        })
    }

    /// Read every page, following cursors until the store reports `done`.
    async fn accumulate(&self, stats: &mut DiscoveryStats) -> Result<Vec<Value>> {
        let mut page = self
            .client
            .query(&self.query)
            .await
            .map_err(|e| as_discovery("initial query", e))?;
        stats.pages = 1;
        let mut records = std::mem::take(&mut page.records);
        let mut seen_cursors = HashSet::new();

        while !page.done {
            let cursor = page.next_records_url.take().ok_or_else(|| {
                HarvestError::Discovery(format!(
                    "result page {} is not the last but carries no cursor",
                    stats.pages
                ))
            })?;
            if !seen_cursors.insert(cursor.clone()) {
                return Err(HarvestError::Discovery(format!(
                    "cursor '{cursor}' returned twice"
                )));
            }

            page = self
                .client
                .query_more(&cursor)
                .await
                .map_err(|e| as_discovery(&format!("result page {}", stats.pages + 1), e))?;
            stats.pages += 1;
            debug!(page = stats.pages, records = page.records.len(), "result page read");
            records.append(&mut page.records);
        }

        Ok(records)
    }

    fn to_record(&self, value: Value) -> Option<QueryRecord> {
        let Value::Object(fields) = value else {
            return None;
        };
        let id = match fields.get(&self.id_field) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return None,
        };

        let record_url = fields
            .get("attributes")
            .and_then(|a| a.get("url"))
            .and_then(Value::as_str);
        let source_ref = match (record_url, &self.instance_url) {
            (Some(path), Some(base)) => base
                .join(path)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| path.to_string()),
            (Some(path), None) => path.to_string(),
            (None, _) => id.clone(),
        };

        Some(QueryRecord {
            id,
            source_ref,
            fields,
        })
    }
}

fn as_discovery(context: &str, err: HarvestError) -> HarvestError {
    match err {
        HarvestError::Discovery(msg) => HarvestError::Discovery(format!("{context}: {msg}")),
        other => HarvestError::Discovery(format!("{context}: {other}")),
    }
}

#[async_trait]
impl UnitSource for QuerySource {
    fn strategy(&self) -> &'static str {
        "query"
    }

    fn origin(&self) -> String {
        self.query.clone()
    }

    #[instrument(skip_all, fields(id_field = %self.id_field))]
    async fn discover(&self, units: mpsc::Sender<DiscoveryUnit>) -> Result<DiscoveryStats> {
        let mut stats = DiscoveryStats::default();
        let records = self.accumulate(&mut stats).await?;
        info!(pages = stats.pages, records = records.len(), "query results accumulated");

        let mut seen = HashSet::new();
        for value in records {
            let Some(record) = self.to_record(value) else {
                warn!(field = %self.id_field, "record without a usable id, skipping");
                stats.ignored += 1;
                continue;
            };
            if !seen.insert(record.id.clone()) {
                stats.duplicates += 1;
                continue;
            }
            if units.send(DiscoveryUnit::Record(record)).await.is_err() {
                debug!("unit consumer closed, stopping");
                stats.cancelled = true;
                return Ok(stats);
            }
            stats.units += 1;
        }

        Ok(stats)
    }
}
