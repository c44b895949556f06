//! Article page fetching and section extraction.
//!
//! This crate provides:
//! - [`fetch`]: the [`DocumentFetcher`] seam and its `reqwest` implementation
//! - [`links`]: CSS-selected link collection for list pages
//! - [`extract`]: the [`SectionExtractor`] turning pages or records into raw articles

pub mod extract;
pub mod fetch;
pub mod links;

pub use extract::{ArticleSource, IdRule, SectionExtractor, id_from_url};
pub use fetch::{DocumentFetcher, FetchedDocument, HttpFetcher, USER_AGENT};
pub use links::{normalize_url, parse_selector, select_links};
