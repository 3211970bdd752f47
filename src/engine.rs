use crate::analysis::{
    analyze_waste, path_view_warnings, plan_deletions, season_conflicts, DeletePlan, PlanPolicy,
    SeasonConflict, WasteReport,
};
use crate::config::{self, AppConfig, PathMapping, ProbeScope};
use crate::error::Error;
use crate::identity::{self, Grouping, IdentityGroup};
use crate::mapping::PathMapper;
use crate::model::{FileId, MediaFile};
use crate::progress::{CancelToken, ProgressReporter};
use crate::protection::{
    sources_from_config, NlinkMismatch, PendingFetch, ProtectionResolver, ProtectionSource,
    SourceFailure, UnmatchedRecord,
};
use crate::scanner::{self, FfprobeProber, ProbeCache, Prober, ScanFilter};
use crate::scoring::Scorer;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const LOCK_FILE: &str = ".audit.lock";

/// Serializes audits sharing a report directory. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(report_dir: &Path, run_id: &str) -> Result<Self, Error> {
        fs::create_dir_all(report_dir)?;
        let path = report_dir.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::AuditInProgress(path.display().to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        writeln!(file, "{} {}", run_id, chrono::Local::now().to_rfc3339())?;
        debug!("Acquired run lock {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("Could not release run lock {}: {}", self.path.display(), err);
        }
    }
}

/// Everything non-fatal that went wrong or looked suspicious during a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub failed_sources: Vec<SourceFailure>,
    pub unreadable: Vec<String>,
    pub skipped_samples: usize,
    pub skipped_ignored: usize,
    pub probe_failures: Vec<(String, String)>,
    pub probes_from_cache: usize,
    pub unmatched_records: Vec<UnmatchedRecord>,
    pub unmapped_records: HashMap<String, usize>,
    pub inactive_torrents: usize,
    pub nlink_mismatches: Vec<NlinkMismatch>,
    pub queued_files: usize,
    /// Arr-managed files whose instance reports the quality cutoff unmet.
    pub upgrades_recommended: Vec<String>,
    pub file_cap_reached: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    pub scan: Duration,
    pub sources: Duration,
    pub probe: Duration,
    pub analysis: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub run_id: String,
    pub started_at: String,
    pub roots: Vec<String>,
    pub delete_scope: String,
    pub files: Vec<MediaFile>,
    pub grouping: Grouping,
    pub plan: DeletePlan,
    pub waste: WasteReport,
    pub season_conflicts: Vec<SeasonConflict>,
    pub diagnostics: Diagnostics,
    pub timings: StageTimings,
}

impl AuditReport {
    pub fn file(&self, id: FileId) -> &MediaFile {
        &self.files[id]
    }

    pub fn duplicate_groups(&self) -> impl Iterator<Item = &IdentityGroup> {
        self.grouping.duplicates()
    }

    pub fn reclaimable_bytes(&self) -> u64 {
        self.plan.reclaimable_bytes(&self.files)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

pub struct AuditEngine {
    config: AppConfig,
    sources: Vec<Arc<dyn ProtectionSource>>,
    extra_mappings: Vec<(String, Vec<PathMapping>)>,
    prober: Arc<dyn Prober>,
}

impl AuditEngine {
    /// Sources and prober come from the configuration; both can be replaced.
    pub fn new(config: AppConfig) -> Self {
        let sources = sources_from_config(&config);
        let prober = Arc::new(FfprobeProber::new(
            &config.probe.binary,
            Duration::from_secs(config.probe.timeout_secs),
        ));
        Self {
            config,
            sources,
            extra_mappings: Vec::new(),
            prober,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn with_sources(mut self, sources: Vec<Arc<dyn ProtectionSource>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn ProtectionSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Mappings for sources that are not part of the configuration.
    pub fn with_path_mappings(mut self, source: &str, mappings: Vec<PathMapping>) -> Self {
        self.extra_mappings.push((source.to_string(), mappings));
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    fn check_cancel(cancel: &CancelToken) -> Result<(), Error> {
        if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs the whole pipeline:
    /// 1. Validate configuration and take the run lock
    /// 2. Start source fetches, scan roots in parallel
    /// 3. Classify names, resolve protection, group
    /// 4. Probe within the configured scope
    /// 5. Score, analyze waste, plan deletions
    pub fn run(&self, reporter: &dyn ProgressReporter, cancel: &CancelToken) -> Result<AuditReport, Error> {
        let run_start = Instant::now();
        self.config.validate()?;
        let mut mapper = PathMapper::from_config(&self.config)?;
        for (source, mappings) in &self.extra_mappings {
            mapper.add_source(source, mappings.clone())?;
        }
        let filter = ScanFilter::from_config(&self.config)?;

        let now = chrono::Local::now();
        let run_id = now.format("%Y%m%d-%H%M%S").to_string();
        let _lock = RunLock::acquire(Path::new(&self.config.report_dir), &run_id)?;

        let roots = config::non_overlapping_directories(self.config.roots.clone());
        info!("Auditing roots: {:?}", roots);
        let mut diagnostics = Diagnostics {
            warnings: path_view_warnings(&roots),
            ..Default::default()
        };
        for warning in &diagnostics.warnings {
            warn!("{}", warning);
        }
        let mut timings = StageTimings::default();

        // Phase 1: sources in the background, scan in the foreground
        reporter.on_sources_start(self.sources.len());
        let sources_start = Instant::now();
        let pending = PendingFetch::spawn(&self.sources);

        info!("Scanning files...");
        reporter.on_scan_start();
        let scan_start = Instant::now();
        let outcome = scanner::scan_roots(&roots, &filter, self.config.max_files, cancel, reporter)?;
        timings.scan = scan_start.elapsed();
        if let Some(limit) = self.config.max_files.filter(|_| outcome.capped) {
            let warning = format!(
                "Scan stopped at the file cap of {}; later files were not audited",
                limit
            );
            warn!("{}", warning);
            diagnostics.warnings.push(warning);
            diagnostics.file_cap_reached = true;
        }
        let mut files = outcome.files;
        diagnostics.unreadable = outcome.stats.unreadable;
        diagnostics.skipped_samples = outcome.stats.skipped_samples;
        diagnostics.skipped_ignored = outcome.stats.skipped_ignored;
        reporter.on_scan_complete(files.len(), timings.scan.as_secs_f64());
        debug!(
            "Scan completed in {:.2}s: {} media files",
            timings.scan.as_secs_f64(),
            files.len()
        );
        Self::check_cancel(cancel)?;

        identity::classify(&mut files, self.config.content_type);

        // Phase 2: protection
        let fetched = pending.collect(reporter);
        timings.sources = sources_start.elapsed();
        diagnostics.failed_sources = fetched.failures;
        let summary = ProtectionResolver::new(&mapper, &files).resolve(&mut files, &fetched.batches);
        diagnostics.unmatched_records = summary.unmatched;
        diagnostics.unmapped_records = summary.unmapped;
        diagnostics.inactive_torrents = summary.inactive_torrents;
        diagnostics.nlink_mismatches = summary.nlink_mismatches;
        diagnostics.queued_files = summary.queued_matched;
        diagnostics.upgrades_recommended = files
            .iter()
            .filter(|f| f.protection.upgrade_recommended())
            .map(|f| f.path_str())
            .collect();
        if !diagnostics.upgrades_recommended.is_empty() {
            info!(
                "{} managed files are below their quality cutoff",
                diagnostics.upgrades_recommended.len()
            );
        }
        Self::check_cancel(cancel)?;

        // Phase 3: grouping and probing
        let grouping = identity::group_files(&files);
        let probe_ids: Vec<FileId> = match self.config.probe.scope {
            ProbeScope::None => Vec::new(),
            ProbeScope::Dupes => grouping.duplicate_members(),
            ProbeScope::All => (0..files.len()).collect(),
        };
        if !probe_ids.is_empty() {
            info!("Probing {} files...", probe_ids.len());
            let probe_start = Instant::now();
            let cache_path = PathBuf::from(self.config.probe_cache_path());
            let cache = ProbeCache::load(&cache_path).unwrap_or_else(|err| {
                warn!("Probe cache unavailable, starting empty: {}", err);
                ProbeCache::default()
            });
            let stats = scanner::probe_files(
                &mut files,
                &probe_ids,
                self.prober.as_ref(),
                &cache,
                self.config.probe.workers,
                cancel,
                reporter,
            )?;
            if let Err(err) = cache.save(&cache_path) {
                warn!("Could not save probe cache: {}", err);
            }
            timings.probe = probe_start.elapsed();
            reporter.on_probe_complete(stats.probed + stats.cached, timings.probe.as_secs_f64());
            diagnostics.probes_from_cache = stats.cached;
            diagnostics.probe_failures = stats.failed;
        }
        Self::check_cancel(cancel)?;

        // Phase 4: scoring and planning
        let analysis_start = Instant::now();
        Scorer::from_config(&self.config).score_all(&mut files, &grouping);
        let waste = analyze_waste(&files);
        let conflicts = season_conflicts(&files, &self.config.delete_scope);
        let plan = plan_deletions(&files, &grouping, &PlanPolicy::from_config(&self.config));
        reporter.on_plan_complete(plan.actionable.len(), plan.report_only.len());
        timings.analysis = analysis_start.elapsed();
        timings.total = run_start.elapsed();

        info!(
            "Audit {} finished in {:.2}s: {} files, {} duplicate groups, {} actionable deletions",
            run_id,
            timings.total.as_secs_f64(),
            files.len(),
            grouping.duplicates().count(),
            plan.actionable.len()
        );

        Ok(AuditReport {
            run_id,
            started_at: now.to_rfc3339(),
            roots,
            delete_scope: self.config.delete_scope.clone(),
            files,
            grouping,
            plan,
            waste,
            season_conflicts: conflicts,
            diagnostics,
            timings,
        })
    }
}
