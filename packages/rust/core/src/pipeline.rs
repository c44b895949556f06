//! End-to-end harvest: discovery → fetch → extract → assemble → write → manifest.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use kbharvest_crawler::{ArticleSource, DocumentFetcher, HttpFetcher, SectionExtractor};
use kbharvest_discovery::{
    CrawlSource, DISCOVERY_BUFFER, DiscoveryStats, QuerySource, RestQueryClient, UnitSource,
};
use kbharvest_markdown::{HtmdTransformer, MarkdownTransformer};
use kbharvest_shared::{
    CrawlConfig, DiscoveryUnit, FetchFailure, ManifestEntry, QueryConfig, Result, RunConfig,
};

use crate::assembler::DocumentAssembler;
use crate::scheduler::{FetchScheduler, SchedulerConfig, UnitProcessor};
use crate::sink::{OutputSink, Reconciliation};

/// Everything a harvest run needs besides its [`RunConfig`].
pub struct HarvestJob {
    pub source: Arc<dyn UnitSource>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub extractor: SectionExtractor,
    pub transformer: Arc<dyn MarkdownTransformer>,
}

impl HarvestJob {
    /// Crawl list pages from `crawl.seed_url` and fetch every matching article page.
    pub fn crawl(crawl: &CrawlConfig, run: &RunConfig) -> Result<Self> {
        let fetcher: Arc<dyn DocumentFetcher> = Arc::new(HttpFetcher::new(run.timeout_secs)?);
        let source = CrawlSource::new(Arc::clone(&fetcher), crawl)?;
        let extractor =
            SectionExtractor::for_pages(&run.sections, &crawl.title_selector, crawl.id_suffix_len)?;

        Ok(Self {
            source: Arc::new(source),
            fetcher,
            extractor,
            transformer: Arc::new(HtmdTransformer::new()),
        })
    }

    /// Read every record matched by `query.soql` through the REST API.
    pub fn query(query: &QueryConfig, access_token: String, run: &RunConfig) -> Result<Self> {
        let client = RestQueryClient::from_config(query, access_token, run.timeout_secs)?;
        let source = QuerySource::new(Arc::new(client), query)?;

        Ok(Self {
            source: Arc::new(source),
            fetcher: Arc::new(HttpFetcher::new(run.timeout_secs)?),
            extractor: SectionExtractor::for_records(&run.sections, &query.title_field),
            transformer: Arc::new(HtmdTransformer::new()),
        })
    }
}

/// Result of a completed harvest run.
#[derive(Debug)]
pub struct HarvestReport {
    pub run_id: Uuid,
    /// `crawl` or `query`.
    pub strategy: String,
    /// Seed URL or query string.
    pub source: String,
    pub discovery: DiscoveryStats,
    pub succeeded: usize,
    /// Units skipped under collect-and-continue.
    pub failures: Vec<FetchFailure>,
    pub manifest_path: PathBuf,
    pub reconciliation: Reconciliation,
    pub elapsed: Duration,
}

impl HarvestReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once per unit with the running totals.
    fn unit_finished(
        &self,
        unit: &str,
        failure: Option<&FetchFailure>,
        succeeded: usize,
        failed: usize,
    );
    /// Called when the run completes.
    fn done(&self, report: &HarvestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn unit_finished(
        &self,
        _unit: &str,
        _failure: Option<&FetchFailure>,
        _succeeded: usize,
        _failed: usize,
    ) {
    }
    fn done(&self, _report: &HarvestReport) {}
}

/// Fetch (for pages), extract, assemble and write one unit.
struct ArticleProcessor {
    fetcher: Arc<dyn DocumentFetcher>,
    extractor: SectionExtractor,
    assembler: DocumentAssembler,
    sink: Arc<OutputSink>,
}

#[async_trait]
impl UnitProcessor for ArticleProcessor {
    async fn process(&self, seq: u64, unit: DiscoveryUnit) -> Result<ManifestEntry> {
        let raw = match &unit {
            DiscoveryUnit::Page(url) => {
                let doc = self.fetcher.fetch(url).await?.ensure_success()?;
                self.extractor.extract(ArticleSource::Page(&doc))?
            }
            DiscoveryUnit::Record(record) => self.extractor.extract(ArticleSource::Record(record))?,
        };
        let article = self.assembler.assemble(raw)?;
        self.sink.write(seq, &article)
    }
}

/// Run a harvest.
///
/// 1. Discovery sends units into a bounded channel
/// 2. The scheduler processes them concurrently as they arrive
/// 3. The manifest is written once, ordered by discovery
/// 4. Manifest entries are reconciled against files on disk
///
/// A discovery error or a fail-fast abort returns the error and writes no
/// manifest. Articles written before the abort stay on disk.
#[instrument(skip_all, fields(strategy = job.source.strategy(), output = %run.output_dir.display()))]
pub async fn harvest(
    job: HarvestJob,
    run: &RunConfig,
    progress: &dyn ProgressReporter,
) -> Result<HarvestReport> {
    let start = Instant::now();
    let run_id = Uuid::now_v7();
    run.validate()?;

    let sink = Arc::new(OutputSink::new(&run.output_dir)?);
    let processor = Arc::new(ArticleProcessor {
        fetcher: job.fetcher,
        extractor: job.extractor,
        assembler: DocumentAssembler::new(job.transformer, run.section_order()),
        sink: Arc::clone(&sink),
    });

    let strategy = job.source.strategy();
    let origin = job.source.origin();
    info!(%run_id, strategy, source = %origin, "starting harvest");

    progress.phase("Harvesting articles");
    let (tx, rx) = mpsc::channel(DISCOVERY_BUFFER);
    let scheduler = FetchScheduler::new(SchedulerConfig::from(run));
    let (discovered, mut outcome) = tokio::join!(
        job.source.discover(tx),
        scheduler.run(rx, processor, progress)
    );

    let discovery = discovered.inspect_err(|e| error!(error = %e, "discovery failed"))?;

    if outcome.aborted && !outcome.failures.is_empty() {
        let first = outcome.failures.remove(0);
        error!(unit = %first.unit, kind = %first.kind(), "aborting run on first failure");
        return Err(first.error);
    }

    progress.phase("Writing manifest");
    sink.write_manifest(&run.manifest_path, run_id, strategy, &origin)?;
    let reconciliation = sink.reconcile()?;

    let report = HarvestReport {
        run_id,
        strategy: strategy.to_string(),
        source: origin,
        discovery,
        succeeded: outcome.succeeded,
        failures: outcome.failures,
        manifest_path: run.manifest_path.clone(),
        reconciliation,
        elapsed: start.elapsed(),
    };

    info!(
        succeeded = report.succeeded,
        failed = report.failed(),
        elapsed_ms = report.elapsed.as_millis(),
        "harvest complete"
    );
    progress.done(&report);
    Ok(report)
}
