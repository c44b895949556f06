//! Output sink: one Markdown file per article plus the run manifest.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use kbharvest_shared::{
    Article, CURRENT_SCHEMA_VERSION, HarvestError, Manifest, ManifestEntry, Result,
};

/// Writes article files and collects their manifest entries.
///
/// Entries are appended from concurrent workers and read back once, in
/// discovery order, when the run finishes.
#[derive(Debug)]
pub struct OutputSink {
    dir: PathBuf,
    entries: Mutex<Vec<(u64, ManifestEntry)>>,
}

/// Manifest entries vs. Markdown files actually present in the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub manifest_entries: usize,
    pub files_on_disk: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.manifest_entries == self.files_on_disk
    }
}

impl OutputSink {
    /// Open a sink over an existing directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(HarvestError::io(
                &dir,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "output directory does not exist",
                ),
            ));
        }
        Ok(Self {
            dir,
            entries: Mutex::new(Vec::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file an article id is written to.
    pub fn article_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.md"))
    }

    /// Write `<dir>/<id>.md`, replacing any previous version, and record the
    /// article under discovery sequence number `seq`.
    ///
    /// The file is written to a temp name and renamed into place, so readers
    /// never see a partial document.
    pub fn write(&self, seq: u64, article: &Article) -> Result<ManifestEntry> {
        let target = self.article_path(&article.id);
        write_atomic(&target, article.rendered_document())?;
        debug!(path = %target.display(), bytes = article.rendered_document().len(), "wrote article");

        let entry = article.to_entry();
        self.append(seq, entry.clone());
        Ok(entry)
    }

    /// Record a manifest entry.
    ///
    /// One file per id means one entry per id: a later write of the same id
    /// replaces the recorded entry and keeps the earlier sequence number.
    pub fn append(&self, seq: u64, entry: ManifestEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|(_, e)| e.id == entry.id) {
            Some((existing_seq, existing)) => {
                warn!(id = %entry.id, "article written twice in one run, keeping one entry");
                *existing_seq = (*existing_seq).min(seq);
                *existing = entry;
            }
            None => entries.push((seq, entry)),
        }
    }

    /// All recorded entries, ordered by discovery sequence.
    pub fn snapshot(&self) -> Vec<ManifestEntry> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Serialize the manifest once, atomically.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn write_manifest(
        &self,
        path: &Path,
        run_id: Uuid,
        strategy: &str,
        source: &str,
    ) -> Result<Manifest> {
        let articles = self.snapshot();
        let manifest = Manifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id,
            generated_at: Utc::now(),
            strategy: strategy.to_string(),
            source: source.to_string(),
            article_count: articles.len(),
            articles,
        };

        let json = serde_json::to_string_pretty(&manifest).map_err(|e| {
            HarvestError::validation(format!("manifest serialization failed: {e}"))
        })?;
        write_atomic(path, &json)?;

        info!(articles = manifest.article_count, "manifest written");
        Ok(manifest)
    }

    /// Number of `.md` files in the output directory.
    pub fn count_files(&self) -> Result<usize> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| HarvestError::io(&self.dir, e))?;
        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|e| HarvestError::io(&self.dir, e))?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Compare recorded entries with files on disk; warn when they diverge.
    pub fn reconcile(&self) -> Result<Reconciliation> {
        let manifest_entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let report = Reconciliation {
            manifest_entries,
            files_on_disk: self.count_files()?,
        };

        if report.is_consistent() {
            info!(files = report.files_on_disk, "output directory matches manifest");
        } else {
            warn!(
                manifest_entries = report.manifest_entries,
                files_on_disk = report.files_on_disk,
                dir = %self.dir.display(),
                "manifest and output directory disagree"
            );
        }
        Ok(report)
    }
}

/// Write `content` to a hidden temp file next to `target`, then rename it over `target`.
///
/// Temp names are unique per call so concurrent writers never share one.
pub(crate) fn write_atomic(target: &Path, content: &str) -> Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| HarvestError::validation(format!("{} has no file name", target.display())))?;
    let temp = target.with_file_name(format!(".{file_name}.{}.tmp", Uuid::now_v7()));

    std::fs::write(&temp, content).map_err(|e| HarvestError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        HarvestError::io(target, e)
    })?;
    Ok(())
}
