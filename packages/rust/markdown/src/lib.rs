//! HTML-to-Markdown conversion for article sections.
//!
//! Converts HTML fragments to Markdown using the `htmd` crate, then applies
//! a series of cleanup passes to nest headings, tidy whitespace and code
//! blocks, and resolve relative links.

mod cleanup;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use kbharvest_shared::{HarvestError, Result};

/// Tags dropped entirely during conversion.
const SKIP_TAGS: [&str; 6] = ["script", "style", "nav", "iframe", "noscript", "svg"];

/// Default heading offset: section bodies sit under a `##` heading.
pub const SECTION_HEADING_OFFSET: usize = 2;

// ---------------------------------------------------------------------------
// Transformer seam
// ---------------------------------------------------------------------------

/// Converts one HTML fragment to Markdown text.
///
/// The pipeline only depends on this trait, so tests can substitute a
/// transformer that fails on demand.
pub trait MarkdownTransformer: Send + Sync {
    /// Convert `html` to Markdown, resolving relative links against `base_url`.
    fn to_markdown(&self, html: &str, base_url: Option<&Url>) -> Result<String>;
}

/// The production transformer backed by `htmd`.
#[derive(Debug, Clone)]
pub struct HtmdTransformer {
    heading_offset: usize,
}

impl HtmdTransformer {
    pub fn new() -> Self {
        Self {
            heading_offset: SECTION_HEADING_OFFSET,
        }
    }

    /// Override how many levels section headings are pushed down.
    pub fn with_heading_offset(mut self, offset: usize) -> Self {
        self.heading_offset = offset;
        self
    }
}

impl Default for HtmdTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownTransformer for HtmdTransformer {
    fn to_markdown(&self, html: &str, base_url: Option<&Url>) -> Result<String> {
        convert_fragment(html, base_url, self.heading_offset)
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert one HTML fragment to cleaned Markdown.
///
/// 1. Pre-processes HTML tables into Markdown tables
/// 2. Converts HTML → Markdown via `htmd`
/// 3. Runs the cleanup pipeline
///
/// The returned text has no surrounding blank lines and is empty when the
/// fragment has no visible content.
#[instrument(skip(html), fields(html_len = html.len()))]
pub fn convert_fragment(html: &str, base_url: Option<&Url>, heading_offset: usize) -> Result<String> {
    if html.trim().is_empty() {
        return Ok(String::new());
    }

    let html = preprocess_tables(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let raw_markdown = converter
        .convert(&html)
        .map_err(|e| HarvestError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    Ok(cleanup::run_pipeline(&raw_markdown, base_url, heading_offset))
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

/// Replace HTML `<table>` elements with Markdown table syntax before htmd
/// conversion, since `htmd` 0.1 flattens tables into plain text.
fn preprocess_tables(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let Ok(table_sel) = Selector::parse("table") else {
        return html.to_string();
    };

    if doc.select(&table_sel).next().is_none() {
        return html.to_string();
    }

    // Work on the parser's serialization so table markup matches exactly
    // (the parser inserts implied `<tbody>` elements).
    let mut result = doc.root_element().inner_html();
    for table in doc.select(&table_sel) {
        let rows = table_rows(&table);
        if rows.is_empty() {
            continue;
        }
        result = result.replacen(&table.html(), &render_table(&rows), 1);
    }
    result
}

/// Cell text per row; a row of `<th>` cells counts as the header.
fn table_rows(table: &ElementRef) -> Vec<(bool, Vec<String>)> {
    let (Ok(tr_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("th, td")) else {
        return Vec::new();
    };

    table
        .select(&tr_sel)
        .filter_map(|tr| {
            let cells: Vec<ElementRef> = tr.select(&cell_sel).collect();
            if cells.is_empty() {
                return None;
            }
            let header = cells.iter().all(|c| c.value().name() == "th");
            let texts = cells
                .iter()
                .map(|c| {
                    c.text()
                        .collect::<String>()
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .replace('|', "\\|")
                })
                .collect();
            Some((header, texts))
        })
        .collect()
}

/// Render rows as a GitHub-flavored Markdown table. Without a header row the
/// first row is promoted.
fn render_table(rows: &[(bool, Vec<String>)]) -> String {
    let width = rows.iter().map(|(_, r)| r.len()).max().unwrap_or(0);
    let line = |cells: &[String]| {
        let mut padded: Vec<&str> = cells.iter().map(String::as_str).collect();
        padded.resize(width, "");
        format!("| {} |\n", padded.join(" | "))
    };

    let header_idx = rows.iter().position(|(h, _)| *h).unwrap_or(0);
    let mut md = String::from("\n\n");
    md.push_str(&line(&rows[header_idx].1));
    md.push_str(&format!("|{}\n", " --- |".repeat(width)));
    for (i, (_, cells)) in rows.iter().enumerate() {
        if i != header_idx {
            md.push_str(&line(cells));
        }
    }
    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(html: &str) -> String {
        HtmdTransformer::new()
            .to_markdown(html, None)
            .expect("conversion succeeds")
    }

    #[test]
    fn convert_simple_paragraph() {
        assert_eq!(convert("<p>A</p>"), "A");
    }

    #[test]
    fn convert_empty_fragment() {
        assert_eq!(convert(""), "");
        assert_eq!(convert("   \n "), "");
    }

    #[test]
    fn convert_nests_headings_under_sections() {
        let md = convert("<h1>Overview</h1><p>Text</p>");
        assert!(md.contains("### Overview"), "got: {md}");
        assert!(!md.lines().any(|l| l.starts_with("# ")));
    }

    #[test]
    fn heading_offset_can_be_disabled() {
        let md = HtmdTransformer::new()
            .with_heading_offset(0)
            .to_markdown("<h2>Steps</h2>", None)
            .unwrap();
        assert_eq!(md, "## Steps");
    }

    #[test]
    fn convert_preserves_code_blocks() {
        let html = r#"<pre><code class="language-bash">kubectl drain node-1
</code></pre>"#;
        let md = convert(html);
        assert!(md.contains("```"));
        assert!(md.contains("kubectl drain node-1"));
    }

    #[test]
    fn convert_handles_lists() {
        let md = convert("<ul><li>First</li><li>Second</li></ul>");
        assert!(md.contains("First"));
        assert!(md.contains("Second"));
        assert!(md.lines().filter(|l| l.trim_start().starts_with(['*', '-'])).count() >= 2);
    }

    #[test]
    fn convert_preserves_tables() {
        let html = "<table><tr><th>Version</th><th>Status</th></tr>\
                    <tr><td>2.7</td><td>Fixed</td></tr></table>";
        let md = convert(html);
        assert!(md.contains("| Version | Status |"), "got: {md}");
        assert!(md.contains("| 2.7 | Fixed |"), "got: {md}");
    }

    #[test]
    fn convert_resolves_relative_links() {
        let base = Url::parse("https://kb.example.com/support/kb/doc/?id=000021082").unwrap();
        let md = HtmdTransformer::new()
            .to_markdown(r#"<p><a href="/support/kb/doc/?id=000020001">related</a></p>"#, Some(&base))
            .unwrap();
        assert!(md.contains("(https://kb.example.com/support/kb/doc/?id=000020001)"), "got: {md}");
    }

    #[test]
    fn convert_drops_scripts() {
        let md = convert("<p>Visible</p><script>alert('x')</script>");
        assert_eq!(md, "Visible");
    }

    #[test]
    fn conversion_is_deterministic() {
        let html = "<h2>Cause</h2><p>The <b>etcd</b> snapshot was <i>corrupt</i>.</p>";
        assert_eq!(convert(html), convert(html));
    }
}
