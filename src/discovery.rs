//! Work discovery: sample directories under the input root, then candidate
//! files per category inside each sample.
//!
//! Everything here is lazy. Sample directories are listed as the walk
//! advances and each category directory is globbed only when the previous
//! one has been handed out, so re-running discovery always re-reads the
//! filesystem from scratch.

use crate::constants;
use crate::observability::metrics;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One candidate file ready for conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub sample_dir: PathBuf,
    pub category: String,
    pub input_path: PathBuf,
}

/// Immediate child directories of `input_root`, in directory-listing order.
///
/// Plain files are skipped. Symlinks are followed, so a link to a directory
/// counts as a sample directory.
pub fn sample_dirs(input_root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(input_root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry under input root");
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
}

/// Glob pattern for candidate files of one sample/category pair.
///
/// The directory part is escaped so only the file name acts as a pattern.
/// Returns `None` for directories whose path is not valid UTF-8.
pub fn candidate_pattern(sample_dir: &Path, category: &str) -> Option<String> {
    let dir = sample_dir.join(category);
    let dir = dir.to_str()?;
    let escaped = PathBuf::from(glob::Pattern::escape(dir));
    escaped
        .join(constants::candidate_file_pattern())
        .to_str()
        .map(|s| s.to_string())
}

/// Expand the candidate glob for one sample/category pair.
///
/// A missing category directory simply yields no files.
pub fn candidate_files(sample_dir: &Path, category: &str) -> Vec<PathBuf> {
    let Some(pattern) = candidate_pattern(sample_dir, category) else {
        warn!(sample = %sample_dir.display(), category, "Skipping category: path is not valid UTF-8");
        return Vec::new();
    };

    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!(%pattern, error = %e, "Skipping category: invalid glob pattern");
            return Vec::new();
        }
    };

    paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable glob match");
                None
            }
        })
        .filter(|path| path.is_file())
        .collect()
}

/// Lazy enumeration of work items for an input root and category list
pub struct Discovery<'a> {
    input_root: &'a Path,
    categories: &'a [String],
}

impl<'a> Discovery<'a> {
    pub fn new(input_root: &'a Path, categories: &'a [String]) -> Self {
        Self { input_root, categories }
    }

    /// Work items grouped by sample; within a sample, categories come in
    /// declared order and files in glob order.
    pub fn work_items(&self) -> impl Iterator<Item = WorkItem> + 'a {
        let categories = self.categories;
        sample_dirs(self.input_root).flat_map(move |sample| {
            debug!(sample = %sample.display(), "Scanning sample directory");
            metrics::sample_scanned();

            categories.iter().flat_map(move |category| {
                let sample_dir = sample.clone();
                let files = candidate_files(&sample_dir, category);
                if !files.is_empty() {
                    debug!(sample = %sample_dir.display(), %category, count = files.len(), "Matched candidate files");
                }
                files.into_iter().map(move |input_path| WorkItem {
                    sample_dir: sample_dir.clone(),
                    category: category.clone(),
                    input_path,
                })
            })
        })
    }
}
