//! Shared types, error model, and configuration for kbharvest.
//!
//! This crate is the foundation depended on by all other kbharvest crates.
//! It provides:
//! - [`HarvestError`]: the unified error type, classified by [`ErrorKind`]
//! - Domain types ([`Article`], [`RawArticle`], [`DiscoveryUnit`], [`FetchResult`], [`Manifest`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, DefaultsConfig, FailurePolicy, QueryConfig, RunConfig, SectionSpec,
    config_dir, config_file_path, init_config, load_config, load_config_from, resolve_access_token,
};
pub use error::{ErrorKind, HarvestError, Result};
pub use types::{
    Article, CURRENT_SCHEMA_VERSION, DiscoveryUnit, FetchFailure, FetchResult, Manifest,
    ManifestEntry, QueryRecord, RawArticle, content_hash,
};
