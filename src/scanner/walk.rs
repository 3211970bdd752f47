use crate::config::AppConfig;
use crate::error::Error;
use crate::model::MediaFile;
use crate::platform;
use crate::progress::{CancelToken, ProgressReporter};
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Which files count as media and which are ignored.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    extensions: Vec<String>,
    ignore: Vec<Pattern>,
    skip_samples: bool,
}

impl ScanFilter {
    pub fn new(extensions: &[String], ignore_globs: &[String], skip_samples: bool) -> Result<Self, Error> {
        let ignore = ignore_globs
            .iter()
            .map(|glob| {
                Pattern::new(glob).map_err(|e| {
                    Error::InvalidConfig(format!("invalid ignore pattern '{}': {}", glob, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            extensions: extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignore,
            skip_samples,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        Self::new(
            &config.normalized_extensions(),
            &config.ignore_patterns,
            config.skip_samples,
        )
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.iter().any(|pattern| pattern.matches_path(path))
    }

    fn has_media_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .map(|e| self.extensions.iter().any(|allowed| *allowed == e))
            .unwrap_or(false)
    }
}

/// Sample clips shipped alongside releases.
pub fn is_sample(path: &Path) -> bool {
    let in_sample_dir = path
        .parent()
        .map(|parent| {
            parent.components().any(|c| {
                let name = c.as_os_str().to_string_lossy().to_ascii_lowercase();
                name == "sample" || name == "samples"
            })
        })
        .unwrap_or(false);
    if in_sample_dir {
        return true;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    stem.starts_with("sample") || stem.ends_with("-sample") || stem.ends_with(".sample")
}

/// Counters for entries that were seen but not catalogued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub skipped_samples: usize,
    pub skipped_ignored: usize,
    pub unreadable: Vec<String>,
}

impl ScanStats {
    fn merge(&mut self, other: ScanStats) {
        self.skipped_samples += other.skipped_samples;
        self.skipped_ignored += other.skipped_ignored;
        self.unreadable.extend(other.unreadable);
    }
}

/// Lazy traversal of one root. Yields media files with only structural
/// attributes populated. Symlinks are never followed.
pub struct RootScan<'a> {
    root: PathBuf,
    walker: walkdir::IntoIter,
    filter: &'a ScanFilter,
    stats: ScanStats,
}

impl<'a> RootScan<'a> {
    pub fn new(root: &Path, filter: &'a ScanFilter) -> Self {
        Self::from_walker(root, WalkDir::new(root), filter)
    }

    /// Visits siblings in file-name order, so a truncated walk always
    /// stops at the same place.
    pub fn sorted(root: &Path, filter: &'a ScanFilter) -> Self {
        Self::from_walker(root, WalkDir::new(root).sort_by_file_name(), filter)
    }

    fn from_walker(root: &Path, walker: WalkDir, filter: &'a ScanFilter) -> Self {
        Self {
            root: root.to_path_buf(),
            walker: walker.follow_links(false).into_iter(),
            filter,
            stats: ScanStats::default(),
        }
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn into_stats(self) -> ScanStats {
        self.stats
    }
}

impl Iterator for RootScan<'_> {
    type Item = MediaFile;

    fn next(&mut self) -> Option<MediaFile> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let location = err
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| self.root.display().to_string());
                    warn!("Skipping unreadable entry {}: {}", location, err);
                    self.stats.unreadable.push(location);
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_dir() {
                if entry.depth() > 0 && self.filter.is_ignored(path) {
                    trace!("Ignoring directory {}", path.display());
                    self.stats.skipped_ignored += 1;
                    self.walker.skip_current_dir();
                }
                continue;
            }
            if !entry.file_type().is_file() || !self.filter.has_media_extension(path) {
                continue;
            }
            if self.filter.is_ignored(path) {
                self.stats.skipped_ignored += 1;
                continue;
            }
            if self.filter.skip_samples && is_sample(path) {
                debug!("Skipping sample {}", path.display());
                self.stats.skipped_samples += 1;
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("Error getting metadata for {}: {}", path.display(), err);
                    self.stats.unreadable.push(path.display().to_string());
                    continue;
                }
            };

            let identity = platform::file_identity(path, &metadata);
            let mut file = MediaFile::new(
                path.to_path_buf(),
                self.root.clone(),
                metadata.len(),
                identity.device,
                identity.inode,
                identity.nlink,
            );
            file.modified = platform::modified_secs(&metadata);
            return Some(file);
        }
    }
}

/// Result of traversing every root.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files: Vec<MediaFile>,
    pub stats: ScanStats,
    /// The walk stopped early at the file cap.
    pub capped: bool,
}

fn walk_root(
    root: &str,
    filter: &ScanFilter,
    limit: Option<usize>,
    found: &AtomicUsize,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<(Vec<MediaFile>, ScanStats), Error> {
    let mut scan = match limit {
        Some(_) => RootScan::sorted(Path::new(root), filter),
        None => RootScan::new(Path::new(root), filter),
    };
    let mut files = Vec::new();
    for file in scan.by_ref() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let count = found.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 100 == 0 {
            reporter.on_scan_progress(count, &file.path_str());
        }
        files.push(file);
        if limit.is_some_and(|limit| count >= limit) {
            break;
        }
    }
    debug!("Root {} yielded {} media files", root, files.len());
    Ok((files, scan.into_stats()))
}

/// Walks roots in parallel. Files come back sorted by path with ids assigned
/// in that order. A root that cannot be opened is recorded as unreadable and
/// the remaining roots are still scanned.
///
/// With `max_files`, roots are walked one after another in sorted order and
/// the walk stops once the cap is reached.
pub fn scan_roots(
    roots: &[String],
    filter: &ScanFilter,
    max_files: Option<usize>,
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
) -> Result<ScanOutcome, Error> {
    let mut outcome = ScanOutcome::default();
    let mut readable = Vec::new();
    for root in roots {
        match fs::read_dir(root) {
            Ok(_) => readable.push(root.as_str()),
            Err(err) => {
                warn!("Skipping unreadable root {}: {}", root, err);
                outcome.stats.unreadable.push(root.clone());
            }
        }
    }

    let found = AtomicUsize::new(0);
    let per_root = match max_files {
        None => readable
            .par_iter()
            .map(|root| walk_root(root, filter, None, &found, cancel, reporter))
            .collect::<Result<Vec<_>, Error>>()?,
        Some(limit) => {
            let mut per_root = Vec::new();
            for root in &readable {
                if found.load(Ordering::Relaxed) >= limit {
                    outcome.capped = true;
                    break;
                }
                per_root.push(walk_root(root, filter, Some(limit), &found, cancel, reporter)?);
            }
            per_root
        }
    };

    for (files, stats) in per_root {
        outcome.files.extend(files);
        outcome.stats.merge(stats);
    }
    if max_files.is_some_and(|limit| outcome.files.len() >= limit) {
        outcome.capped = true;
    }
    outcome.files.sort_by(|a, b| a.path.cmp(&b.path));
    outcome.files.dedup_by(|a, b| a.path == b.path);
    for (id, file) in outcome.files.iter_mut().enumerate() {
        file.id = id;
    }
    Ok(outcome)
}
