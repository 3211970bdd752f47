use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Trait for reporting audit progress.
///
/// The CLI implements it with indicatif bars. All methods have default no-op
/// implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_progress(&self, _files_found: usize, _current_path: &str) {}
    fn on_scan_complete(&self, _total_files: usize, _duration_secs: f64) {}
    fn on_sources_start(&self, _sources: usize) {}
    fn on_source_complete(&self, _source: &str, _records: Option<usize>) {}
    fn on_probe_start(&self, _total_files: usize) {}
    fn on_probe_progress(&self, _probed: usize, _total_files: usize) {}
    fn on_probe_complete(&self, _probed: usize, _duration_secs: f64) {}
    fn on_plan_complete(&self, _actionable: usize, _report_only: usize) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Cooperative stop flag. Checked between files, never mid-file.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
