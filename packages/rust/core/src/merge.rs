//! Merge a directory of article files into one AI-ready Markdown document.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use kbharvest_shared::{HarvestError, Result};

use crate::sink::write_atomic;

/// Top-level heading of every merged document.
pub const MERGED_HEADING: &str = "# Merged Knowledge Base for AI";

/// Default separator between articles.
pub const DEFAULT_SEPARATOR: &str = "---";

/// Optional preamble and article separator for [`merge_directory`].
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Background for the reader, rendered under `### AI Context`.
    pub context: Option<String>,
    /// Instructions for the reader, rendered under `### AI Prompt`.
    pub prompt: Option<String>,
    pub separator: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            context: None,
            prompt: None,
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub articles: usize,
    pub output: PathBuf,
}

/// Merge every `.md` file of `input_dir`, sorted by file name, into `output_file`.
///
/// An empty directory still produces the preamble and heading.
#[instrument(skip(options), fields(input = %input_dir.display(), output = %output_file.display()))]
pub fn merge_directory(
    input_dir: &Path,
    output_file: &Path,
    options: &MergeOptions,
) -> Result<MergeReport> {
    if !input_dir.is_dir() {
        return Err(HarvestError::io(
            input_dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "input directory does not exist"),
        ));
    }

    // The output may live inside the input directory, under any spelling.
    let output_key = resolve(output_file);
    let mut paths = Vec::new();
    let entries = std::fs::read_dir(input_dir).map_err(|e| HarvestError::io(input_dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| HarvestError::io(input_dir, e))?.path();
        if !path.is_file() || !path.extension().is_some_and(|ext| ext == "md") {
            continue;
        }
        if path == output_file || (output_key.is_some() && resolve(&path) == output_key) {
            continue;
        }
        paths.push(path);
    }
    paths.sort();

    let mut articles = Vec::with_capacity(paths.len());
    for path in &paths {
        let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        articles.push((title, content));
    }

    if articles.is_empty() {
        warn!("no Markdown files found");
    }

    write_atomic(output_file, &render_merged(&articles, options))?;
    info!(articles = articles.len(), "merged knowledge base written");

    Ok(MergeReport {
        articles: articles.len(),
        output: output_file.to_path_buf(),
    })
}

/// Absolute, symlink-free form of `path`. A file that does not exist yet
/// resolves through its parent directory.
fn resolve(path: &Path) -> Option<PathBuf> {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return Some(canonical);
    }
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::canonicalize(parent).ok().map(|p| p.join(name))
}

/// Render `(title, content)` pairs into the merged document.
pub fn render_merged(articles: &[(String, String)], options: &MergeOptions) -> String {
    let separator = options.separator.as_str();
    let mut out = String::new();

    for (heading, text) in [
        ("AI Context", options.context.as_deref()),
        ("AI Prompt", options.prompt.as_deref()),
    ] {
        if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
            out.push_str(&format!("### {heading}\n\n{text}\n\n{separator}\n\n"));
        }
    }

    out.push_str(MERGED_HEADING);
    out.push('\n');

    for (i, (title, content)) in articles.iter().enumerate() {
        if i > 0 {
            out.push_str(&format!("\n{separator}\n"));
        }
        out.push_str(&format!("\n## Article: {title}\n\n{}\n", content.trim_end()));
    }

    out
}
