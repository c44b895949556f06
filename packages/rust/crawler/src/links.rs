//! Link selection on list pages.

use scraper::{Html, Selector};
use url::Url;

use kbharvest_shared::{HarvestError, Result};

/// Parse a CSS selector from configuration.
pub fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| HarvestError::config(format!("invalid CSS selector '{selector}': {e}")))
}

/// Absolute URLs of every `href` under `selector`, in document order.
///
/// Anchor-only, `javascript:` and `mailto:` links are skipped and fragments
/// are stripped.
pub fn select_links(doc: &Html, selector: &Selector, base_url: &Url) -> Vec<Url> {
    doc.select(selector)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|href| {
            !href.is_empty()
                && !href.starts_with('#')
                && !href.starts_with("javascript:")
                && !href.starts_with("mailto:")
        })
        .filter_map(|href| base_url.join(href).ok())
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .collect()
}

/// Normalize a URL for deduplication (no fragment, no trailing slash except at the root).
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && normalized.path() != "/" {
        s.pop();
    }
    s
}
