//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use kbharvest_core::merge::{DEFAULT_SEPARATOR, MergeOptions, merge_directory};
use kbharvest_core::pipeline::{HarvestJob, HarvestReport, ProgressReporter, harvest};
use kbharvest_shared::{
    AppConfig, FailurePolicy, FetchFailure, RunConfig, init_config, load_config, load_config_from,
    resolve_access_token,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbharvest: turn a knowledge base into Markdown files and a manifest.
#[derive(Parser)]
#[command(
    name = "kbharvest",
    version,
    about = "Harvest knowledge-base articles into Markdown files plus a JSON manifest.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.kbharvest/kbharvest.toml.
    #[arg(long, env = "KBHARVEST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl paginated list pages and harvest every matching article page.
    Crawl {
        /// First list page (overrides crawl.seed_url).
        #[arg(long, env = "KBHARVEST_SEED_URL")]
        seed_url: Option<String>,

        /// Regex an article URL must match (overrides crawl.item_pattern).
        #[arg(long)]
        pattern: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Harvest the records returned by a query against the record store.
    Query {
        /// Record store base URL (overrides query.instance_url).
        #[arg(long, env = "KBHARVEST_INSTANCE_URL")]
        instance_url: Option<String>,

        /// Query string (overrides query.soql).
        #[arg(long)]
        soql: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Merge a directory of Markdown articles into one AI-ready document.
    Merge {
        /// Directory containing the .md files to merge.
        input_dir: PathBuf,

        /// Merged Markdown file to write.
        output_file: PathBuf,

        /// Context for the AI, placed before the articles.
        #[arg(long)]
        context: Option<String>,

        /// Instructions for the AI, placed before the articles.
        #[arg(long)]
        prompt: Option<String>,

        /// Separator between articles.
        #[arg(long, default_value = DEFAULT_SEPARATOR)]
        separator: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Run settings shared by `crawl` and `query`.
#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Directory for the per-article files (created if missing).
    #[arg(short, long, env = "KBHARVEST_OUTPUT_DIR")]
    pub out: Option<PathBuf>,

    /// Path of the manifest JSON.
    #[arg(long, env = "KBHARVEST_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Maximum articles fetched at once.
    #[arg(short, long, env = "KBHARVEST_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Abort the whole run on the first failed article.
    #[arg(long)]
    pub fail_fast: bool,

    /// Upper bound of the random delay before each fetch, in milliseconds.
    #[arg(long)]
    pub max_delay_ms: Option<u64>,

    /// Connect/read timeout per request, in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "kbharvest=info",
        1 => "kbharvest=debug",
        _ => "kbharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Crawl {
            seed_url,
            pattern,
            run,
        } => cmd_crawl(config_path.as_deref(), seed_url, pattern, &run).await,
        Command::Query {
            instance_url,
            soql,
            run,
        } => cmd_query(config_path.as_deref(), instance_url, soql, &run).await,
        Command::Merge {
            input_dir,
            output_file,
            context,
            prompt,
            separator,
        } => cmd_merge(
            &input_dir,
            &output_file,
            MergeOptions {
                context,
                prompt,
                separator,
            },
        ),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    Ok(match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

/// Merge flag overrides into the file config and build the run settings.
fn run_config(config: &mut AppConfig, args: &RunArgs) -> Result<RunConfig> {
    let defaults = &mut config.defaults;
    if let Some(out) = &args.out {
        defaults.output_dir = out.to_string_lossy().into_owned();
    }
    if let Some(manifest) = &args.manifest {
        defaults.manifest_path = manifest.to_string_lossy().into_owned();
    }
    if let Some(concurrency) = args.concurrency {
        defaults.concurrency = concurrency;
    }
    if args.fail_fast {
        defaults.failure_policy = FailurePolicy::FailFast;
    }
    if let Some(ms) = args.max_delay_ms {
        defaults.max_delay_ms = ms;
    }
    if let Some(secs) = args.timeout_secs {
        defaults.timeout_secs = secs;
    }

    let run = RunConfig::from(&*config);
    run.validate()?;

    std::fs::create_dir_all(&run.output_dir).map_err(|e| {
        eyre!(
            "cannot create output directory '{}': {e}",
            run.output_dir.display()
        )
    })?;
    Ok(run)
}

async fn cmd_crawl(
    config_path: Option<&Path>,
    seed_url: Option<String>,
    pattern: Option<String>,
    args: &RunArgs,
) -> Result<()> {
    let mut config = load(config_path)?;
    if let Some(seed) = seed_url {
        config.crawl.seed_url = seed;
    }
    if let Some(pattern) = pattern {
        config.crawl.item_pattern = pattern;
    }
    let run = run_config(&mut config, args)?;

    info!(
        seed = %config.crawl.seed_url,
        out = %run.output_dir.display(),
        concurrency = run.concurrency,
        policy = %run.failure_policy,
        "starting crawl"
    );

    let job = HarvestJob::crawl(&config.crawl, &run)?;
    let reporter = CliProgress::new();
    let report = harvest(job, &run, &reporter).await?;
    print_report(&report);
    Ok(())
}

async fn cmd_query(
    config_path: Option<&Path>,
    instance_url: Option<String>,
    soql: Option<String>,
    args: &RunArgs,
) -> Result<()> {
    let mut config = load(config_path)?;
    if let Some(url) = instance_url {
        config.query.instance_url = url;
    }
    if let Some(soql) = soql {
        config.query.soql = soql;
    }

    // Validate the token before doing anything
    let token = resolve_access_token(&config.query)?;
    let run = run_config(&mut config, args)?;

    info!(
        instance = %config.query.instance_url,
        out = %run.output_dir.display(),
        policy = %run.failure_policy,
        "starting query harvest"
    );

    let job = HarvestJob::query(&config.query, token, &run)?;
    let reporter = CliProgress::new();
    let report = harvest(job, &run, &reporter).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &HarvestReport) {
    println!();
    println!("  Harvest complete ({})", report.strategy);
    println!("  Run:         {}", report.run_id);
    println!("  Discovered:  {}", report.discovery.units);
    println!("  Written:     {}", report.succeeded);
    println!("  Failed:      {}", report.failed());
    println!("  Manifest:    {}", report.manifest_path.display());
    println!(
        "  On disk:     {} files ({} in manifest)",
        report.reconciliation.files_on_disk, report.reconciliation.manifest_entries
    );
    println!("  Time:        {:.1}s", report.elapsed.as_secs_f64());

    if !report.reconciliation.is_consistent() {
        println!();
        println!("  warning: manifest and output directory disagree");
    }
    if !report.failures.is_empty() {
        println!();
        println!("  Failures:");
        for failure in &report.failures {
            println!("    [{}] {}: {}", failure.kind(), failure.unit, failure.error);
        }
    }
    println!();
}

fn cmd_merge(input_dir: &Path, output_file: &Path, options: MergeOptions) -> Result<()> {
    let report = merge_directory(input_dir, output_file, &options)?;
    if report.articles == 0 {
        println!("No Markdown files found in {}", input_dir.display());
    }
    println!(
        "Merged {} files into {}",
        report.articles,
        report.output.display()
    );
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn unit_finished(
        &self,
        unit: &str,
        failure: Option<&FetchFailure>,
        succeeded: usize,
        failed: usize,
    ) {
        if let Some(failure) = failure {
            self.spinner
                .println(format!("  ✗ {unit}: {}", failure.error));
        }
        self.spinner
            .set_message(format!("[{succeeded} ok, {failed} failed] {unit}"));
    }

    fn done(&self, _report: &HarvestReport) {
        self.spinner.finish_and_clear();
    }
}
