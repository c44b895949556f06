//! Paginated discovery of article references.
//!
//! Two strategies produce the same lazy, finite sequence of
//! [`DiscoveryUnit`]s through the [`UnitSource`] trait:
//! - [`CrawlSource`] walks list pages and follows their "next page" link,
//!   sending units as soon as each page is scanned.
//! - [`QuerySource`] pages through an external record store with
//!   continuation cursors and sends units only once every page is in.
//!
//! Units flow through a bounded `tokio::sync::mpsc` channel; dropping the
//! receiver stops discovery at the next send.

mod crawl;
mod query;

use async_trait::async_trait;
use tokio::sync::mpsc;

use kbharvest_shared::{DiscoveryUnit, Result};

pub use crawl::CrawlSource;
pub use query::{QueryClient, QuerySource, RestQueryClient, ResultPage};

/// Capacity of the channel between discovery and the fetch scheduler.
pub const DISCOVERY_BUFFER: usize = 64;

/// Counters describing one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    /// List pages or query pages fetched.
    pub pages: usize,
    /// Units sent downstream.
    pub units: usize,
    /// Links or records that did not qualify (pattern mismatch, missing id).
    pub ignored: usize,
    /// Units suppressed because they were already sent this run.
    pub duplicates: usize,
    /// List pages skipped after a non-success status.
    pub skipped_pages: usize,
    /// The consumer hung up before discovery finished.
    pub cancelled: bool,
}

/// A paginated source of discovery units.
#[async_trait]
pub trait UnitSource: Send + Sync {
    /// Strategy name recorded in the manifest (`crawl` or `query`).
    fn strategy(&self) -> &'static str;

    /// Seed URL or query string, for the manifest and logs.
    fn origin(&self) -> String;

    /// Send every unit of this run, in page order, then return.
    ///
    /// Never sends the same article twice. A closed channel ends discovery
    /// early with `cancelled` set, not with an error.
    async fn discover(&self, units: mpsc::Sender<DiscoveryUnit>) -> Result<DiscoveryStats>;
}

/// Run `source` to completion and collect its units.
pub async fn discover_all(source: &dyn UnitSource) -> Result<(Vec<DiscoveryUnit>, DiscoveryStats)> {
    let (tx, mut rx) = mpsc::channel(DISCOVERY_BUFFER);
    let collect = async {
        let mut units = Vec::new();
        while let Some(unit) = rx.recv().await {
            units.push(unit);
        }
        units
    };
    let (stats, units) = tokio::join!(source.discover(tx), collect);
    Ok((units, stats?))
}
