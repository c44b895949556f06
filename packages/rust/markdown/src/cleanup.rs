//! Post-conversion cleanup passes for section Markdown.
//!
//! Each pass is a function `&str -> String` applied in sequence. Passes that
//! only make sense on prose go through [`map_prose_lines`], which leaves fenced
//! code blocks untouched.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on the raw Markdown of one section.
///
/// The result has no leading or trailing blank lines, so the assembler
/// controls spacing between sections.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>, heading_offset: usize) -> String {
    let mut result = md.replace("\r\n", "\n");

    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = nest_headings(&result, heading_offset);
    result = resolve_links(&result, base_url);
    result = trim_trailing_whitespace(&result);
    result = collapse_blank_lines(&result);

    result.trim_matches('\n').to_string()
}

/// Apply `f` to every line outside fenced code blocks.
fn map_prose_lines(md: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut in_fence = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence {
                line.to_string()
            } else {
                f(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Headings
// ---------------------------------------------------------------------------

/// Push every ATX heading `offset` levels deeper, capped at H6.
///
/// Section bodies are rendered under a `##` subsection heading, so an `<h1>`
/// inside a section must not outrank the article title.
fn nest_headings(md: &str, offset: usize) -> String {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid regex"));

    if offset == 0 {
        return md.to_string();
    }

    map_prose_lines(md, |line| match H_RE.captures(line) {
        Some(caps) => {
            let level = (caps[1].len() + offset).min(6);
            format!("{} {}", "#".repeat(level), &caps[2])
        }
        None => line.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Code fences
// ---------------------------------------------------------------------------

/// Turn class-like fence hints (`language-js`, `lang-python`, `highlight-rust`)
/// into plain language names.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^([ \t]*)```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "$1```$2").to_string()
}

// ---------------------------------------------------------------------------
// Leftover HTML
// ---------------------------------------------------------------------------

/// Remove layout tags that survived conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static LAYOUT_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary|font|center)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    map_prose_lines(md, |line| LAYOUT_TAG_RE.replace_all(line, "").to_string())
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Resolve relative link targets against the article URL. Images, anchors,
/// absolute and `mailto:` links are left alone.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    let Some(base) = base_url else {
        return md.to_string();
    };

    map_prose_lines(md, |line| {
        LINK_RE
            .replace_all(line, |caps: &regex::Captures| {
                let (bang, text, href) = (&caps[1], &caps[2], &caps[3]);
                let keep = !bang.is_empty()
                    || href.starts_with('#')
                    || href.starts_with("mailto:")
                    || Url::parse(href).is_ok();
                if keep {
                    return caps[0].to_string();
                }
                match base.join(href) {
                    Ok(resolved) => format!("[{text}]({resolved})"),
                    Err(_) => caps[0].to_string(),
                }
            })
            .to_string()
    })
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

fn trim_trailing_whitespace(md: &str) -> String {
    md.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// Collapse runs of blank lines to a single blank line, outside code fences.
fn collapse_blank_lines(md: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_fence = false;
    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        let blank = line.trim().is_empty();
        if blank && !in_fence && out.last().is_some_and(|prev| prev.trim().is_empty()) {
            continue;
        }
        out.push(line);
    }
    out.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nest_headings_shifts_levels() {
        let input = "# Title\n\ntext\n\n### Deep";
        let result = nest_headings(input, 2);
        assert_eq!(result, "### Title\n\ntext\n\n##### Deep");
    }

    #[test]
    fn nest_headings_caps_at_h6() {
        assert_eq!(nest_headings("##### Five", 2), "###### Five");
    }

    #[test]
    fn nest_headings_ignores_code_fences() {
        let input = "```bash\n# not a heading\n```";
        assert_eq!(nest_headings(input, 2), input);
    }

    #[test]
    fn collapse_blank_lines_keeps_single_blank() {
        let input = "a\n\n\n\n\nb";
        assert_eq!(collapse_blank_lines(input), "a\n\nb");
    }

    #[test]
    fn collapse_blank_lines_preserves_fenced_blanks() {
        let input = "```\nx\n\n\ny\n```";
        assert_eq!(collapse_blank_lines(input), input);
    }

    #[test]
    fn fix_code_block_languages_strips_prefix() {
        let input = "```language-yaml\nkey: value\n```";
        assert!(fix_code_block_languages(input).starts_with("```yaml"));
    }

    #[test]
    fn strip_leftover_html_removes_layout_tags() {
        let input = "<div class=\"note\">Restart the agent</div>";
        assert_eq!(strip_leftover_html(input), "Restart the agent");
    }

    #[test]
    fn strip_leftover_html_preserves_code_blocks() {
        let input = "```html\n<div>keep</div>\n```";
        assert_eq!(strip_leftover_html(input), input);
    }

    #[test]
    fn resolve_links_relative_resolved() {
        let base = Url::parse("https://kb.example.com/support/kb/doc/?id=000021082").unwrap();
        let result = resolve_links("See [the guide](/docs/upgrade)", Some(&base));
        assert_eq!(result, "See [the guide](https://kb.example.com/docs/upgrade)");
    }

    #[test]
    fn resolve_links_leaves_absolute_anchor_and_images() {
        let base = Url::parse("https://kb.example.com/").unwrap();
        let input = "[a](https://other.org/x) [b](#top) ![img](/logo.png)";
        assert_eq!(resolve_links(input, Some(&base)), input);
    }

    #[test]
    fn full_pipeline_cleans_section() {
        let input = "\n\n<span>Intro</span>   \n\n\n\n# Steps\n\n```lang-sh\nkubectl get nodes\n```\n\n";
        let result = run_pipeline(input, None, 2);
        assert_eq!(
            result,
            "Intro\n\n### Steps\n\n```sh\nkubectl get nodes\n```"
        );
    }
}
