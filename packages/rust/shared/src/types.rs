//! Core domain types for harvested knowledge-base articles.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::error::{ErrorKind, HarvestError};

/// Current schema version for the manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// DiscoveryUnit
// ---------------------------------------------------------------------------

/// A flat record returned by the external query source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    /// Verbatim value of the configured id field.
    pub id: String,
    /// Record URL (from `attributes.url`) or the id when the source gives none.
    pub source_ref: String,
    /// All fields of the record, by API name.
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl QueryRecord {
    /// String value of a field, or `None` if absent, null or not a string.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}

/// One pending article reference awaiting fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryUnit {
    /// An article page found by crawling list pages.
    Page(Url),
    /// A record accumulated from the query source.
    Record(QueryRecord),
}

impl DiscoveryUnit {
    /// Dedup key: the URL for pages, the record id for records.
    pub fn key(&self) -> String {
        match self {
            Self::Page(url) => url.to_string(),
            Self::Record(record) => record.id.clone(),
        }
    }
}

impl std::fmt::Display for DiscoveryUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(url) => write!(f, "{url}"),
            Self::Record(record) => write!(f, "record {}", record.id),
        }
    }
}

// ---------------------------------------------------------------------------
// Articles
// ---------------------------------------------------------------------------

/// Output of the section extractor: an article before assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArticle {
    /// Stable, non-empty identifier (also the output file stem).
    pub id: String,
    /// Article title, may be empty.
    pub title: String,
    /// URL or external record reference for traceability.
    pub source_ref: String,
    /// Section name to raw HTML fragment.
    pub sections: BTreeMap<String, String>,
}

/// A fully assembled article. The rendered document is derived at
/// construction and cannot be changed afterwards.
#[derive(Debug, Clone)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub source_ref: String,
    pub sections: BTreeMap<String, String>,
    rendered_document: String,
}

impl Article {
    pub fn new(raw: RawArticle, rendered_document: String) -> Self {
        Self {
            id: raw.id,
            title: raw.title,
            source_ref: raw.source_ref,
            sections: raw.sections,
            rendered_document,
        }
    }

    /// The final Markdown text.
    pub fn rendered_document(&self) -> &str {
        &self.rendered_document
    }

    /// Manifest metadata for this article (everything except the rendered text).
    pub fn to_entry(&self) -> ManifestEntry {
        ManifestEntry {
            id: self.id.clone(),
            title: self.title.clone(),
            source_ref: self.source_ref.clone(),
            sections: self.sections.clone(),
            content_hash: content_hash(&self.rendered_document),
        }
    }
}

// ---------------------------------------------------------------------------
// FetchResult
// ---------------------------------------------------------------------------

/// A unit that could not be turned into an article.
#[derive(Debug)]
pub struct FetchFailure {
    /// Display form of the discovery unit.
    pub unit: String,
    pub error: HarvestError,
}

impl FetchFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

/// Outcome of processing exactly one discovery unit.
#[derive(Debug)]
pub enum FetchResult {
    Completed(ManifestEntry),
    Failed(FetchFailure),
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// One successfully written article in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub title: String,
    pub source_ref: String,
    /// Raw HTML sections as extracted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sections: BTreeMap<String, String>,
    /// SHA-256 of the rendered Markdown document.
    pub content_hash: String,
}

/// The manifest JSON written once at the end of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    /// Identifier of the run that produced this manifest.
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Discovery strategy: `crawl` or `query`.
    pub strategy: String,
    /// Seed URL or query string.
    pub source: String,
    pub article_count: usize,
    /// Articles in discovery order.
    pub articles: Vec<ManifestEntry>,
}

/// Compute SHA-256 hash of content as lowercase hex.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str) -> RawArticle {
        let mut sections = BTreeMap::new();
        sections.insert("Situation".to_string(), "<p>A</p>".to_string());
        RawArticle {
            id: id.into(),
            title: "Node drain hangs".into(),
            source_ref: format!("https://kb.example.com/support/kb/doc/?id={id}"),
            sections,
        }
    }

    #[test]
    fn discovery_unit_key_and_display() {
        let url = Url::parse("https://kb.example.com/support/kb/doc/?id=000021082").unwrap();
        let unit = DiscoveryUnit::Page(url.clone());
        assert_eq!(unit.key(), url.to_string());
        assert_eq!(unit.to_string(), url.to_string());

        let record = DiscoveryUnit::Record(QueryRecord {
            id: "000020001".into(),
            source_ref: "000020001".into(),
            fields: serde_json::Map::new(),
        });
        assert_eq!(record.key(), "000020001");
        assert_eq!(record.to_string(), "record 000020001");
    }

    #[test]
    fn record_field_str_ignores_non_strings() {
        let mut fields = serde_json::Map::new();
        fields.insert("Title".into(), serde_json::json!("Upgrade fails"));
        fields.insert("Cause__c".into(), serde_json::Value::Null);
        fields.insert("Views".into(), serde_json::json!(12));
        let record = QueryRecord {
            id: "1".into(),
            source_ref: "1".into(),
            fields,
        };
        assert_eq!(record.field_str("Title"), Some("Upgrade fails"));
        assert_eq!(record.field_str("Cause__c"), None);
        assert_eq!(record.field_str("Views"), None);
        assert_eq!(record.field_str("Missing"), None);
    }

    #[test]
    fn article_entry_hashes_rendered_document() {
        let article = Article::new(raw("000021082"), "# Node drain hangs\n".into());
        let entry = article.to_entry();
        assert_eq!(entry.id, "000021082");
        assert_eq!(entry.content_hash, content_hash("# Node drain hangs\n"));
        assert_eq!(entry.sections.len(), 1);
    }

    #[test]
    fn test_content_hash() {
        let hash = content_hash("hello world");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn manifest_serialization() {
        let article = Article::new(raw("000021082"), "body".into());
        let manifest = Manifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: Uuid::now_v7(),
            generated_at: Utc::now(),
            strategy: "crawl".into(),
            source: "https://kb.example.com/support/kb/".into(),
            article_count: 1,
            articles: vec![article.to_entry()],
        };

        let json = serde_json::to_string_pretty(&manifest).expect("serialize");
        assert!(!json.contains("rendered_document"));
        let parsed: Manifest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(parsed.articles[0].id, "000021082");
        assert_eq!(parsed.articles[0].sections["Situation"], "<p>A</p>");
    }

    #[test]
    fn fetch_failure_reports_kind_and_message() {
        let failure = FetchFailure {
            unit: "https://kb.example.com/a".into(),
            error: HarvestError::Conversion("unbalanced tags".into()),
        };
        assert_eq!(failure.kind(), ErrorKind::Conversion);
        assert!(failure.message().contains("unbalanced tags"));
    }
}
