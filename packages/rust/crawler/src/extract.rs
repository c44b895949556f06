//! Section extraction: one raw document or record → `{id, title, sections}`.

use std::collections::BTreeMap;

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use kbharvest_shared::{HarvestError, QueryRecord, RawArticle, Result, SectionSpec};

use crate::fetch::FetchedDocument;
use crate::links::parse_selector;

/// The raw material of one article.
#[derive(Debug, Clone, Copy)]
pub enum ArticleSource<'a> {
    Page(&'a FetchedDocument),
    Record(&'a QueryRecord),
}

/// How article identifiers are derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdRule {
    /// The last `n` characters of the article URL.
    UrlSuffix(usize),
    /// The record's id field, verbatim.
    RecordField,
}

/// Pulls the identifier, title and named HTML sections out of an article.
///
/// Selectors are compiled once at construction so every unit shares them.
#[derive(Debug)]
pub struct SectionExtractor {
    id_rule: IdRule,
    title_selector: Option<Selector>,
    title_field: Option<String>,
    sections: Vec<(String, SectionSource)>,
}

#[derive(Debug)]
enum SectionSource {
    Selector(Selector),
    Field(String),
}

impl SectionExtractor {
    /// Extractor for crawled article pages.
    ///
    /// Sections without a `selector` are not extracted from pages.
    pub fn for_pages(
        sections: &[SectionSpec],
        title_selector: &str,
        id_suffix_len: usize,
    ) -> Result<Self> {
        if id_suffix_len == 0 {
            return Err(HarvestError::config("id_suffix_len must be at least 1"));
        }
        let sections = sections
            .iter()
            .filter_map(|s| s.selector.as_deref().map(|sel| (s.name.clone(), sel)))
            .map(|(name, sel)| Ok((name, SectionSource::Selector(parse_selector(sel)?))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id_rule: IdRule::UrlSuffix(id_suffix_len),
            title_selector: Some(parse_selector(title_selector)?),
            title_field: None,
            sections,
        })
    }

    /// Extractor for query records.
    ///
    /// Sections without a `field` are not extracted from records.
    pub fn for_records(sections: &[SectionSpec], title_field: &str) -> Self {
        let sections = sections
            .iter()
            .filter_map(|s| {
                s.field
                    .as_ref()
                    .map(|f| (s.name.clone(), SectionSource::Field(f.clone())))
            })
            .collect();

        Self {
            id_rule: IdRule::RecordField,
            title_selector: None,
            title_field: Some(title_field.to_string()),
            sections,
        }
    }

    /// Extract from a fetched article page or a query record.
    pub fn extract(&self, source: ArticleSource<'_>) -> Result<RawArticle> {
        match source {
            ArticleSource::Page(doc) => self.extract_page(doc),
            ArticleSource::Record(record) => self.extract_record(record),
        }
    }

    /// Extract from an article page. Missing sections become empty strings.
    pub fn extract_page(&self, doc: &FetchedDocument) -> Result<RawArticle> {
        let id = match self.id_rule {
            IdRule::UrlSuffix(n) => id_from_url(&doc.url, n)?,
            IdRule::RecordField => {
                return Err(HarvestError::validation(
                    "record extractor cannot read article pages",
                ));
            }
        };

        let html = doc.parse();
        let title = self
            .title_selector
            .as_ref()
            .and_then(|sel| first_text(&html, sel))
            .unwrap_or_default();

        let mut sections = BTreeMap::new();
        for (name, source) in &self.sections {
            if let SectionSource::Selector(sel) = source {
                let fragment = html
                    .select(sel)
                    .next()
                    .map(|el| el.inner_html().trim().to_string())
                    .unwrap_or_default();
                sections.insert(name.clone(), fragment);
            }
        }

        debug!(%id, title = %title, sections = sections.len(), "extracted page");

        Ok(RawArticle {
            id,
            title,
            source_ref: doc.url.to_string(),
            sections,
        })
    }

    /// Extract from a query record. Null or missing fields become empty strings.
    pub fn extract_record(&self, record: &QueryRecord) -> Result<RawArticle> {
        let id = record.id.trim().to_string();
        validate_id(&id)?;

        let title = self
            .title_field
            .as_deref()
            .and_then(|f| record.field_str(f))
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        let mut sections = BTreeMap::new();
        for (name, source) in &self.sections {
            if let SectionSource::Field(field) = source {
                let fragment = record.field_str(field).unwrap_or_default().trim();
                sections.insert(name.clone(), fragment.to_string());
            }
        }

        Ok(RawArticle {
            id,
            title,
            source_ref: record.source_ref.clone(),
            sections,
        })
    }
}

/// Trimmed, whitespace-collapsed text of the first element matching `sel`.
fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel).next().map(|el| {
        el.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    })
}

/// The last `len` characters of the URL.
///
/// Assumes every article URL ends in a fixed-width identifier
/// (`...?id=000021082`); URLs shorter than `len` are rejected.
pub fn id_from_url(url: &Url, len: usize) -> Result<String> {
    let s = url.as_str();
    let count = s.chars().count();
    if count < len {
        return Err(HarvestError::validation(format!(
            "URL '{s}' is shorter than the {len}-character id suffix"
        )));
    }
    let id: String = s.chars().skip(count - len).collect();
    validate_id(&id)?;
    Ok(id)
}

/// Ids become file names: reject empty ids and anything that could escape
/// the output directory.
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
        return Err(HarvestError::validation(format!(
            "'{id}' is not a usable article id"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_sections() -> Vec<SectionSpec> {
        vec![
            SectionSpec::new("Situation", Some("#situation"), Some("Situation__c")),
            SectionSpec::new("Cause", Some("#cause"), Some("Cause__c")),
            SectionSpec::new("Resolution", Some("#resolution"), None),
        ]
    }

    fn doc(url: &str, body: &str) -> FetchedDocument {
        FetchedDocument {
            url: Url::parse(url).unwrap(),
            status: 200,
            body: body.to_string(),
        }
    }

    #[test]
    fn id_is_url_suffix() {
        let url = Url::parse("https://www.suse.com/support/kb/doc/?id=000021082").unwrap();
        assert_eq!(id_from_url(&url, 9).unwrap(), "000021082");
    }

    #[test]
    fn id_from_short_url_is_rejected() {
        let url = Url::parse("http://a.io/").unwrap();
        assert!(id_from_url(&url, 40).is_err());
    }

    #[test]
    fn id_with_path_separator_is_rejected() {
        let url = Url::parse("https://kb.example.com/support/kb/doc/").unwrap();
        let err = id_from_url(&url, 9).unwrap_err();
        assert_eq!(err.kind(), kbharvest_shared::ErrorKind::Validation);
    }

    #[test]
    fn extract_page_pulls_title_and_sections() {
        let extractor = SectionExtractor::for_pages(&page_sections(), "h1", 9).unwrap();
        let page = doc(
            "https://kb.example.com/support/kb/doc/?id=000021082",
            r#"<html><body><div class="col_one">
                <h1>  Upgrade   stalls </h1>
                <div id="situation"><p>Upgrade hangs at 50%.</p></div>
                <div id="resolution"><p>Restart the agent.</p></div>
            </div></body></html>"#,
        );

        let raw = extractor.extract_page(&page).unwrap();
        assert_eq!(raw.id, "000021082");
        assert_eq!(raw.title, "Upgrade stalls");
        assert_eq!(raw.source_ref, "https://kb.example.com/support/kb/doc/?id=000021082");
        assert_eq!(raw.sections["Situation"], "<p>Upgrade hangs at 50%.</p>");
        assert_eq!(raw.sections["Cause"], "");
        assert_eq!(raw.sections["Resolution"], "<p>Restart the agent.</p>");
    }

    #[test]
    fn extract_page_without_title_yields_empty_title() {
        let extractor = SectionExtractor::for_pages(&page_sections(), "h1", 9).unwrap();
        let page = doc("https://kb.example.com/doc/?id=000000001", "<p>no heading</p>");
        let raw = extractor.extract_page(&page).unwrap();
        assert_eq!(raw.title, "");
    }

    #[test]
    fn extract_record_reads_fields() {
        let extractor = SectionExtractor::for_records(&page_sections(), "Title");
        let mut fields = serde_json::Map::new();
        fields.insert("Title".into(), serde_json::json!("Node not ready"));
        fields.insert("Situation__c".into(), serde_json::json!("<p>A</p>"));
        fields.insert("Cause__c".into(), serde_json::Value::Null);
        let record = QueryRecord {
            id: "000020001".into(),
            source_ref: "/services/data/v59.0/sobjects/Knowledge__kav/ka0".into(),
            fields,
        };

        let raw = extractor.extract_record(&record).unwrap();
        assert_eq!(raw.id, "000020001");
        assert_eq!(raw.title, "Node not ready");
        assert_eq!(raw.sections["Situation"], "<p>A</p>");
        assert_eq!(raw.sections["Cause"], "");
        // Resolution has no field mapping, so it is not part of record extraction.
        assert!(!raw.sections.contains_key("Resolution"));
    }

    #[test]
    fn zero_suffix_len_is_config_error() {
        let err = SectionExtractor::for_pages(&page_sections(), "h1", 0).unwrap_err();
        assert_eq!(err.kind(), kbharvest_shared::ErrorKind::Config);
    }
}
