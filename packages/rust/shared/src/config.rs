//! Application configuration for kbharvest.
//!
//! User config lives at `~/.kbharvest/kbharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbharvest";

// ---------------------------------------------------------------------------
// Config structs (matching kbharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Run-wide defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// List-page crawl settings.
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// External record query settings.
    #[serde(default)]
    pub query: QueryConfig,

    /// Article sections, in canonical render order.
    #[serde(default = "default_sections")]
    pub sections: Vec<SectionSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            crawl: CrawlConfig::default(),
            query: QueryConfig::default(),
            sections: default_sections(),
        }
    }
}

/// What to do when a single article fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Log the failure, leave the article out of the manifest, keep going.
    #[default]
    CollectAndContinue,
    /// Abort the whole run on the first failure.
    FailFast,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CollectAndContinue => f.write_str("collect-and-continue"),
            Self::FailFast => f.write_str("fail-fast"),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory receiving one `<id>.md` per article. Must exist.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Where the manifest JSON is written.
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,

    /// Maximum articles fetched concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// `collect-and-continue` or `fail-fast`.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Upper bound of the random delay before each article fetch (0 disables).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Connect/read timeout for every HTTP request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            manifest_path: default_manifest_path(),
            concurrency: default_concurrency(),
            failure_policy: FailurePolicy::default(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_output_dir() -> String {
    "./website/docs/kbs".into()
}
fn default_manifest_path() -> String {
    "book.json".into()
}
fn default_concurrency() -> usize {
    5
}
fn default_max_delay_ms() -> u64 {
    250
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// First list page.
    #[serde(default = "default_seed_url")]
    pub seed_url: String,

    /// CSS selector for article links on a list page.
    #[serde(default = "default_item_selector")]
    pub item_selector: String,

    /// Regex an absolute item URL must match to become a discovery unit.
    #[serde(default = "default_item_pattern")]
    pub item_pattern: String,

    /// CSS selector for the "next page" link.
    #[serde(default = "default_next_selector")]
    pub next_selector: String,

    /// CSS selector for the article title on an article page.
    #[serde(default = "default_title_selector")]
    pub title_selector: String,

    /// The article id is the last `id_suffix_len` characters of its URL.
    #[serde(default = "default_id_suffix_len")]
    pub id_suffix_len: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seed_url: default_seed_url(),
            item_selector: default_item_selector(),
            item_pattern: default_item_pattern(),
            next_selector: default_next_selector(),
            title_selector: default_title_selector(),
            id_suffix_len: default_id_suffix_len(),
        }
    }
}

fn default_seed_url() -> String {
    "https://www.suse.com/support/kb/?id=SUSE+Rancher".into()
}
fn default_item_selector() -> String {
    ".result-table .result-cell a[href]".into()
}
fn default_item_pattern() -> String {
    r"www\.suse\.com/support/kb/(.*)/?id(.*)".into()
}
fn default_next_selector() -> String {
    ".results_summary a[href]".into()
}
fn default_title_selector() -> String {
    "h1".into()
}
fn default_id_suffix_len() -> usize {
    9
}

/// `[query]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Base URL of the record store instance.
    #[serde(default)]
    pub instance_url: String,

    /// REST API version segment.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Name of the env var holding the access token (never store the token itself).
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Query string sent to the record store.
    #[serde(default = "default_soql")]
    pub soql: String,

    /// Record field used verbatim as the article id.
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Record field holding the article title.
    #[serde(default = "default_title_field")]
    pub title_field: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            instance_url: String::new(),
            api_version: default_api_version(),
            access_token_env: default_access_token_env(),
            soql: default_soql(),
            id_field: default_id_field(),
            title_field: default_title_field(),
        }
    }
}

fn default_api_version() -> String {
    "v59.0".into()
}
fn default_access_token_env() -> String {
    "KBHARVEST_ACCESS_TOKEN".into()
}
fn default_soql() -> String {
    "SELECT Id, ArticleNumber, Title, Situation__c, Cause__c, Resolution__c, \
     Additional_Information__c FROM Knowledge__kav WHERE PublishStatus = 'Online'"
        .into()
}
fn default_id_field() -> String {
    "ArticleNumber".into()
}
fn default_title_field() -> String {
    "Title".into()
}

/// `[[sections]]` entry: one named body section of an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    /// Heading used in the rendered document.
    pub name: String,
    /// CSS selector on crawled article pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Field name on query records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl SectionSpec {
    pub fn new(name: &str, selector: Option<&str>, field: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.map(String::from),
            field: field.map(String::from),
        }
    }
}

fn default_sections() -> Vec<SectionSpec> {
    vec![
        SectionSpec::new("Situation", Some("#situation"), Some("Situation__c")),
        SectionSpec::new("Cause", Some("#cause"), Some("Cause__c")),
        SectionSpec::new("Resolution", Some("#resolution"), Some("Resolution__c")),
        SectionSpec::new(
            "Additional Information",
            Some("#additional-information"),
            Some("Additional_Information__c"),
        ),
    ]
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime settings shared by both discovery strategies.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
    /// Sections in canonical order.
    pub sections: Vec<SectionSpec>,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.defaults.output_dir),
            manifest_path: PathBuf::from(&config.defaults.manifest_path),
            concurrency: config.defaults.concurrency,
            failure_policy: config.defaults.failure_policy,
            max_delay_ms: config.defaults.max_delay_ms,
            timeout_secs: config.defaults.timeout_secs,
            sections: config.sections.clone(),
        }
    }
}

impl RunConfig {
    /// Section names in canonical render order.
    pub fn section_order(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.name.clone()).collect()
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(HarvestError::config("concurrency must be at least 1"));
        }
        if self.sections.is_empty() {
            return Err(HarvestError::config("at least one [[sections]] entry is required"));
        }
        let mut seen = HashSet::new();
        for section in &self.sections {
            if section.name.trim().is_empty() {
                return Err(HarvestError::config("section names must not be empty"));
            }
            if !seen.insert(section.name.as_str()) {
                return Err(HarvestError::config(format!(
                    "duplicate section name '{}'",
                    section.name
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbharvest/kbharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the query access token from the env var named in the config.
pub fn resolve_access_token(config: &QueryConfig) -> Result<String> {
    let var_name = &config.access_token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(HarvestError::config(format!(
            "access token not found. Set the {var_name} environment variable \
             to a session token for {}",
            if config.instance_url.is_empty() {
                "the record store"
            } else {
                config.instance_url.as_str()
            }
        ))),
    }
}
