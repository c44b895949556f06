//! Document assembly: extracted sections → one Markdown document per article.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use url::Url;

use kbharvest_markdown::MarkdownTransformer;
use kbharvest_shared::{Article, HarvestError, RawArticle, Result};

/// Renders articles in a fixed canonical section order.
#[derive(Clone)]
pub struct DocumentAssembler {
    transformer: Arc<dyn MarkdownTransformer>,
    section_order: Vec<String>,
}

impl DocumentAssembler {
    pub fn new(transformer: Arc<dyn MarkdownTransformer>, section_order: Vec<String>) -> Self {
        Self {
            transformer,
            section_order,
        }
    }

    /// Assemble one article.
    ///
    /// Layout:
    ///
    /// ```text
    /// # <title>
    ///
    /// [<id>](<source_ref>)
    ///
    /// ## <Section>
    ///
    /// <section markdown>
    /// ```
    ///
    /// Sections follow the canonical order; absent or empty ones are skipped.
    /// Any conversion failure fails the whole article, and an article with no
    /// surviving section is an assembly error.
    #[instrument(skip_all, fields(id = %raw.id))]
    pub fn assemble(&self, raw: RawArticle) -> Result<Article> {
        let base_url = Url::parse(&raw.source_ref).ok();

        let mut body = String::new();
        let mut rendered_sections = 0;

        for name in &self.section_order {
            let html = raw.sections.get(name).map(|s| s.trim()).unwrap_or_default();
            if html.is_empty() {
                warn!(id = %raw.id, section = %name, "section missing or empty, skipping");
                continue;
            }

            let markdown = self.transformer.to_markdown(html, base_url.as_ref())?;
            if markdown.trim().is_empty() {
                warn!(id = %raw.id, section = %name, "section has no visible content, skipping");
                continue;
            }

            body.push_str("\n## ");
            body.push_str(name);
            body.push_str("\n\n");
            body.push_str(markdown.trim_end());
            body.push('\n');
            rendered_sections += 1;
        }

        if rendered_sections == 0 {
            return Err(HarvestError::assembly(format!(
                "article {} has no non-empty sections",
                raw.id
            )));
        }

        let title = if raw.title.trim().is_empty() {
            raw.id.as_str()
        } else {
            raw.title.trim()
        };

        let mut document = format!("# {title}\n\n{}\n", metadata_line(&raw.id, &raw.source_ref));
        document.push_str(&body);

        debug!(sections = rendered_sections, bytes = document.len(), "article assembled");
        Ok(Article::new(raw, document))
    }
}

/// Link the id to its source when the source is an absolute URL.
fn metadata_line(id: &str, source_ref: &str) -> String {
    match Url::parse(source_ref) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => format!("[{id}]({url})"),
        _ if source_ref.is_empty() || source_ref == id => id.to_string(),
        _ => format!("{id} ({source_ref})"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use kbharvest_markdown::HtmdTransformer;

    use super::*;

    /// Fails on any fragment containing `<bad>`.
    struct PickyTransformer;

    impl MarkdownTransformer for PickyTransformer {
        fn to_markdown(&self, html: &str, _base_url: Option<&Url>) -> Result<String> {
            if html.contains("<bad>") {
                Err(HarvestError::Conversion("unsupported element <bad>".into()))
            } else {
                Ok(html.replace("<p>", "").replace("</p>", ""))
            }
        }
    }

    fn order() -> Vec<String> {
        ["Situation", "Cause", "Resolution"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn raw(sections: &[(&str, &str)]) -> RawArticle {
        RawArticle {
            id: "000021082".into(),
            title: "Upgrade stalls".into(),
            source_ref: "https://kb.example.com/support/kb/doc/?id=000021082".into(),
            sections: sections
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn assembler() -> DocumentAssembler {
        DocumentAssembler::new(Arc::new(HtmdTransformer::new()), order())
    }

    #[test]
    fn only_present_sections_are_rendered() {
        let article = assembler()
            .assemble(raw(&[("Situation", "<p>A</p>"), ("Resolution", "")]))
            .unwrap();

        assert_eq!(
            article.rendered_document(),
            "# Upgrade stalls\n\n\
             [000021082](https://kb.example.com/support/kb/doc/?id=000021082)\n\n\
             ## Situation\n\nA\n"
        );
    }

    #[test]
    fn sections_follow_canonical_order() {
        let article = assembler()
            .assemble(raw(&[
                ("Resolution", "<p>Restart the agent.</p>"),
                ("Situation", "<p>Upgrade hangs.</p>"),
                ("Cause", "<p>Stale lock.</p>"),
            ]))
            .unwrap();
        let doc = article.rendered_document();

        let situation = doc.find("## Situation").unwrap();
        let cause = doc.find("## Cause").unwrap();
        let resolution = doc.find("## Resolution").unwrap();
        assert!(situation < cause && cause < resolution);
    }

    #[test]
    fn section_headings_nest_below_subsections() {
        let article = assembler()
            .assemble(raw(&[("Situation", "<h2>Symptoms</h2><p>Pods crash.</p>")]))
            .unwrap();
        assert!(article.rendered_document().contains("\n#### Symptoms\n"));
    }

    #[test]
    fn output_is_deterministic() {
        let input = raw(&[
            ("Situation", "<p>A <a href=\"/doc/2\">link</a></p>"),
            ("Cause", "<ul><li>x</li><li>y</li></ul>"),
        ]);
        let first = assembler().assemble(input.clone()).unwrap();
        let second = assembler().assemble(input).unwrap();
        assert_eq!(first.rendered_document(), second.rendered_document());
        assert_eq!(first.to_entry().content_hash, second.to_entry().content_hash);
    }

    #[test]
    fn no_surviving_section_is_assembly_error() {
        let err = assembler()
            .assemble(raw(&[("Situation", "   "), ("Unlisted", "<p>x</p>")]))
            .unwrap_err();
        assert_eq!(err.kind(), kbharvest_shared::ErrorKind::Assembly);
    }

    #[test]
    fn conversion_failure_fails_the_article() {
        let assembler = DocumentAssembler::new(Arc::new(PickyTransformer), order());
        let err = assembler
            .assemble(raw(&[("Situation", "<p>fine</p>"), ("Cause", "<bad>")]))
            .unwrap_err();
        assert_eq!(err.kind(), kbharvest_shared::ErrorKind::Conversion);
    }

    #[test]
    fn empty_title_falls_back_to_id() {
        let mut input = raw(&[("Situation", "<p>A</p>")]);
        input.title = String::new();
        let article = assembler().assemble(input).unwrap();
        assert!(article.rendered_document().starts_with("# 000021082\n"));
    }

    #[test]
    fn record_source_ref_is_not_linked() {
        assert_eq!(
            metadata_line("000001", "/services/data/v59.0/sobjects/Knowledge__kav/ka0"),
            "000001 (/services/data/v59.0/sobjects/Knowledge__kav/ka0)"
        );
        assert_eq!(metadata_line("000001", "000001"), "000001");
    }
}
