use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

use media_audit::analysis::{DeletePlanEntry, PlanReason};
use media_audit::config::{
    AppConfig, ArrInstanceConfig, ArrKind, AvoidMode, PathMapping, ProbeScope, ScoreFactor,
};
use media_audit::model::MediaAttributes;
use media_audit::protection::{ProtectionRecord, ProtectionSource, SourceKind, StaticSource};
use media_audit::scanner::Prober;
use media_audit::{AuditEngine, AuditReport, CancelToken, Error, SilentReporter};

/// Reads quality off the file name instead of running ffprobe.
struct NameProber;

impl Prober for NameProber {
    fn probe(&self, path: &Path) -> Result<MediaAttributes, Error> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let height = if name.contains("2160p") {
            2160
        } else if name.contains("720p") {
            720
        } else {
            1080
        };
        let language = if name.contains("DEU") { "deu" } else { "eng" };
        Ok(MediaAttributes {
            height: Some(height),
            video_codec: Some("h264".to_string()),
            audio_codecs: vec!["aac".to_string()],
            audio_languages: [language.to_string()].into_iter().collect(),
            audio_channels_max: Some(2),
            ..Default::default()
        })
    }
}

struct BrokenSource;

impl ProtectionSource for BrokenSource {
    fn id(&self) -> &str {
        "radarr"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Arr
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(200)
    }

    fn fetch(&self) -> Result<Vec<ProtectionRecord>, Error> {
        Err(Error::Source("radarr".to_string(), "connection refused".to_string()))
    }
}

struct Library {
    _tmp: TempDir,
    library: PathBuf,
    torrents: PathBuf,
    reports: PathBuf,
}

impl Library {
    fn new() -> Self {
        let tmp = tempdir().unwrap();
        let library = tmp.path().join("media").join("library");
        let torrents = tmp.path().join("media").join("torrents");
        let reports = tmp.path().join("reports");
        fs::create_dir_all(&library).unwrap();
        fs::create_dir_all(&torrents).unwrap();
        Self {
            _tmp: tmp,
            library,
            torrents,
            reports,
        }
    }

    fn write(&self, path: &Path, size: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; size]).unwrap();
    }

    fn config(&self) -> AppConfig {
        AppConfig {
            roots: vec![s(&self.library), s(&self.torrents)],
            delete_scope: s(&self.torrents),
            report_dir: s(&self.reports),
            ..AppConfig::default()
        }
    }
}

fn s(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn names(entries: &[DeletePlanEntry]) -> BTreeSet<(String, PlanReason)> {
    entries
        .iter()
        .map(|e| {
            let name = Path::new(&e.path).file_name().unwrap().to_string_lossy().to_string();
            (name, e.reason)
        })
        .collect()
}

fn run(engine: &AuditEngine) -> AuditReport {
    engine.run(&SilentReporter, &CancelToken::new()).unwrap()
}

/// Layout:
///   library/Show/Season 01/
///     Show - S01E01 - 1080p.mkv   (sonarr, hardlinked into torrents, seeding)
///     Show - S01E02 - 1080p.mkv   (sonarr)
///     Show - S01E03 - 2160p.mkv
///     Show - S01E04 - 720p.mkv
///     sample/Show - S01E05 - sample.mkv
///     notes.txt
///   library/random_clip.mkv
///   torrents/
///     Show.S01E01.1080p.WEB-DL-GRP.mkv   (hardlink of library S01E01)
///     Show.S01E02.2160p.WEB-DL-GRP.mkv
///     Show.S01E03.720p.HDTV-GRP.mkv
///     Show.S01E04.2160p.WEB-DL-GRP.mkv
fn create_show_tree(lib: &Library) -> AuditEngine {
    let season = lib.library.join("Show").join("Season 01");
    lib.write(&season.join("Show - S01E01 - 1080p.mkv"), 4096);
    fs::hard_link(
        season.join("Show - S01E01 - 1080p.mkv"),
        lib.torrents.join("Show.S01E01.1080p.WEB-DL-GRP.mkv"),
    )
    .unwrap();
    lib.write(&season.join("Show - S01E02 - 1080p.mkv"), 3000);
    lib.write(&lib.torrents.join("Show.S01E02.2160p.WEB-DL-GRP.mkv"), 5000);
    lib.write(&season.join("Show - S01E03 - 2160p.mkv"), 5000);
    lib.write(&lib.torrents.join("Show.S01E03.720p.HDTV-GRP.mkv"), 2000);
    lib.write(&season.join("Show - S01E04 - 720p.mkv"), 2000);
    lib.write(&lib.torrents.join("Show.S01E04.2160p.WEB-DL-GRP.mkv"), 5000);
    lib.write(&season.join("sample").join("Show - S01E05 - sample.mkv"), 100);
    lib.write(&season.join("notes.txt"), 10);
    lib.write(&lib.library.join("random_clip.mkv"), 10);

    AuditEngine::new(lib.config())
        .with_prober(Arc::new(NameProber))
        .with_source(Arc::new(StaticSource::managed(
            "sonarr",
            &[
                "/tv/Show/Season 01/Show - S01E01 - 1080p.mkv",
                "/tv/Show/Season 01/Show - S01E02 - 1080p.mkv",
            ],
        )))
        .with_source(Arc::new(StaticSource::seeding(
            "qbittorrent",
            &["/downloads/Show.S01E01.1080p.WEB-DL-GRP.mkv"],
        )))
        .with_path_mappings("sonarr", vec![PathMapping::new("/tv", &s(&lib.library)).unwrap()])
        .with_path_mappings(
            "qbittorrent",
            vec![PathMapping::new("/downloads", &s(&lib.torrents)).unwrap()],
        )
}

#[test]
fn test_full_audit_pipeline() {
    let lib = Library::new();
    let engine = create_show_tree(&lib);
    let report = run(&engine);

    // 8 episodes plus the unparseable clip; sample and notes are skipped
    assert_eq!(report.files.len(), 9);
    assert_eq!(report.diagnostics.skipped_samples, 1);
    assert_eq!(report.grouping.unclassified.len(), 1);
    assert!(report
        .file(report.grouping.unclassified[0])
        .path_str()
        .ends_with("random_clip.mkv"));
    assert_eq!(report.duplicate_groups().count(), 4);

    assert_eq!(
        names(&report.plan.actionable),
        [
            ("Show.S01E02.2160p.WEB-DL-GRP.mkv".to_string(), PlanReason::KeeperProtected),
            ("Show.S01E03.720p.HDTV-GRP.mkv".to_string(), PlanReason::LowerQuality),
        ]
        .into_iter()
        .collect()
    );
    assert_eq!(
        names(&report.plan.report_only),
        [("Show - S01E04 - 720p.mkv".to_string(), PlanReason::OutsideScope)]
            .into_iter()
            .collect()
    );
    assert_eq!(report.reclaimable_bytes(), 7000);

    // Hardlinked pair is one unit: nothing to delete, one hardlink set
    assert_eq!(report.waste.hardlink_sets.len(), 1);
    assert!(report.waste.missing_hardlinks.is_empty());
    assert_eq!(report.waste.seeding.len(), 1);
    assert!(report.diagnostics.failed_sources.is_empty());
    assert!(report.diagnostics.unmatched_records.is_empty());
}

#[test]
fn test_mapped_records_protect_local_paths() {
    let lib = Library::new();
    let engine = create_show_tree(&lib);
    let report = run(&engine);

    let managed: Vec<_> = report
        .files
        .iter()
        .filter(|f| f.protection.arr_managed())
        .map(|f| f.file_name())
        .collect();
    assert_eq!(managed.len(), 2);
    assert!(managed.iter().all(|name| name.starts_with("Show - S01E0")));

    let seeding = report.files.iter().find(|f| f.protection.is_seeding()).unwrap();
    assert_eq!(seeding.path, lib.torrents.join("Show.S01E01.1080p.WEB-DL-GRP.mkv"));
    assert_eq!(seeding.nlink, 2);
}

#[test]
fn test_plan_never_touches_protected_or_out_of_scope_files() {
    let lib = Library::new();
    let engine = create_show_tree(&lib);
    let report = run(&engine);

    for entry in &report.plan.actionable {
        let file = report.file(entry.file);
        assert!(!file.protection.arr_managed(), "{} is managed", entry.path);
        assert!(entry.path.starts_with(&s(&lib.torrents)));
        assert!(entry.keeper.is_some());
    }
}

#[test]
fn test_repeated_runs_produce_the_same_plan() {
    let lib = Library::new();
    let engine = create_show_tree(&lib);
    let first = run(&engine);
    let second = run(&engine);

    assert_eq!(names(&first.plan.actionable), names(&second.plan.actionable));
    assert_eq!(names(&first.plan.report_only), names(&second.plan.report_only));
    assert!(second.diagnostics.probes_from_cache > 0);
    assert!(lib.reports.join("probe-cache.json").exists());
}

fn language_pair(lib: &Library) {
    let season = lib.library.join("Show").join("Season 01");
    lib.write(&season.join("Show - S01E01 - 1080p DEU.mkv"), 3000);
    lib.write(&lib.torrents.join("Show.S01E01.2160p.ENG.mkv"), 5000);
}

fn language_config(lib: &Library) -> AppConfig {
    AppConfig {
        delete_scope: s(lib.library.parent().unwrap()),
        ..lib.config()
    }
}

#[test]
fn test_resolution_first_keeps_higher_resolution() {
    let lib = Library::new();
    language_pair(&lib);
    let report = run(&AuditEngine::new(language_config(&lib)).with_prober(Arc::new(NameProber)));

    assert_eq!(
        names(&report.plan.actionable),
        [("Show - S01E01 - 1080p DEU.mkv".to_string(), PlanReason::LowerQuality)]
            .into_iter()
            .collect()
    );
}

#[test]
fn test_language_first_keeps_primary_language() {
    let lib = Library::new();
    language_pair(&lib);
    let mut config = language_config(&lib);
    config.score_priority = vec![
        ScoreFactor::Language,
        ScoreFactor::Resolution,
        ScoreFactor::CustomFormat,
        ScoreFactor::Codec,
    ];
    let report = run(&AuditEngine::new(config).with_prober(Arc::new(NameProber)));

    assert_eq!(
        names(&report.plan.actionable),
        [("Show.S01E01.2160p.ENG.mkv".to_string(), PlanReason::LowerQuality)]
            .into_iter()
            .collect()
    );
}

#[test]
fn test_strict_avoid_excludes_avoided_file_from_keeping() {
    let lib = Library::new();
    language_pair(&lib);
    let mut config = language_config(&lib);
    config.score_priority = vec![
        ScoreFactor::Language,
        ScoreFactor::Resolution,
        ScoreFactor::CustomFormat,
        ScoreFactor::Codec,
    ];
    config.languages.avoid = vec!["de".to_string()];
    config.languages.avoid_mode = AvoidMode::Strict;
    let report = run(&AuditEngine::new(config).with_prober(Arc::new(NameProber)));

    assert!(report.plan.actionable.is_empty());
    assert_eq!(
        names(&report.plan.report_only),
        [("Show - S01E01 - 1080p DEU.mkv".to_string(), PlanReason::AvoidedLanguage)]
            .into_iter()
            .collect()
    );
    let keeper = report.plan.decisions[0].keeper.unwrap();
    assert_eq!(report.file(keeper).file_name(), "Show.S01E01.2160p.ENG.mkv");
}

#[test]
fn test_probe_disabled_falls_back_to_name_hints() {
    let lib = Library::new();
    language_pair(&lib);
    let mut config = language_config(&lib);
    config.probe.scope = ProbeScope::None;
    config.probe.binary = "/nonexistent/ffprobe".to_string();
    let report = run(&AuditEngine::new(config));

    assert!(report.files.iter().all(|f| f.probed.is_none()));
    assert!(report.diagnostics.probe_failures.is_empty());
    assert_eq!(
        names(&report.plan.actionable),
        [("Show - S01E01 - 1080p DEU.mkv".to_string(), PlanReason::LowerQuality)]
            .into_iter()
            .collect()
    );
}

#[test]
fn test_failing_sources_degrade_to_diagnostics() {
    let lib = Library::new();
    language_pair(&lib);
    let mut config = language_config(&lib);
    config.arr.push(ArrInstanceConfig {
        name: "sonarr".to_string(),
        kind: ArrKind::Sonarr,
        snapshot: s(&lib.reports.join("missing-sonarr.json")),
        queue_snapshot: None,
        path_mappings: Vec::new(),
        timeout_secs: 1,
        enabled: true,
    });
    let report = run(
        &AuditEngine::new(config)
            .with_prober(Arc::new(NameProber))
            .with_source(Arc::new(BrokenSource)),
    );

    let failed: BTreeSet<_> = report
        .diagnostics
        .failed_sources
        .iter()
        .map(|f| f.source.clone())
        .collect();
    assert_eq!(failed, ["radarr".to_string(), "sonarr".to_string()].into_iter().collect());
    assert_eq!(report.plan.actionable.len(), 1);
}

#[test]
fn test_unmapped_records_are_reported() {
    let lib = Library::new();
    language_pair(&lib);
    let report = run(
        &AuditEngine::new(language_config(&lib))
            .with_prober(Arc::new(NameProber))
            .with_source(Arc::new(StaticSource::managed("radarr", &["/movies/Heat (1995)/Heat.mkv"]))),
    );

    assert_eq!(report.diagnostics.unmapped_records.get("radarr"), Some(&1));
    assert_eq!(report.diagnostics.unmatched_records.len(), 1);
    assert!(report.files.iter().all(|f| !f.protection.is_protected()));
}

#[test]
fn test_concurrent_audit_is_refused() {
    let lib = Library::new();
    language_pair(&lib);
    fs::create_dir_all(&lib.reports).unwrap();
    fs::write(lib.reports.join(".audit.lock"), "other run").unwrap();

    let result = AuditEngine::new(language_config(&lib))
        .with_prober(Arc::new(NameProber))
        .run(&SilentReporter, &CancelToken::new());
    assert!(matches!(result, Err(Error::AuditInProgress(_))));
    // The other run's lock is left alone
    assert!(lib.reports.join(".audit.lock").exists());
}

#[test]
fn test_cancelled_audit_stops() {
    let lib = Library::new();
    language_pair(&lib);
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = AuditEngine::new(language_config(&lib))
        .with_prober(Arc::new(NameProber))
        .run(&SilentReporter, &cancel);
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!lib.reports.join(".audit.lock").exists());
}

#[test]
fn test_missing_root_is_reported_and_other_roots_scanned() {
    let lib = Library::new();
    language_pair(&lib);
    let archive = s(&lib.library.with_file_name("archive"));
    let mut config = language_config(&lib);
    config.roots.push(archive.clone());

    let report = run(&AuditEngine::new(config).with_prober(Arc::new(NameProber)));
    assert_eq!(report.diagnostics.unreadable, vec![archive]);
    assert_eq!(report.files.len(), 2);
    assert_eq!(report.plan.actionable.len(), 1);
}

#[test]
fn test_queued_download_is_not_deleted() {
    let lib = Library::new();
    language_pair(&lib);
    let report = run(
        &AuditEngine::new(language_config(&lib))
            .with_prober(Arc::new(NameProber))
            .with_source(Arc::new(StaticSource::queued(
                "sonarr",
                &["/downloads/Show/Season 01/Show - S01E01 - 1080p DEU.mkv"],
            )))
            .with_path_mappings(
                "sonarr",
                vec![PathMapping::new("/downloads", &s(&lib.library)).unwrap()],
            ),
    );

    assert_eq!(report.diagnostics.queued_files, 1);
    assert!(report.plan.actionable.is_empty());
    assert_eq!(
        names(&report.plan.report_only),
        [("Show - S01E01 - 1080p DEU.mkv".to_string(), PlanReason::InQueue)]
            .into_iter()
            .collect()
    );
}

#[test]
fn test_unmet_cutoff_is_reported_as_upgrade() {
    let lib = Library::new();
    language_pair(&lib);
    let library_copy = lib
        .library
        .join("Show")
        .join("Season 01")
        .join("Show - S01E01 - 1080p DEU.mkv");
    let report = run(
        &AuditEngine::new(language_config(&lib))
            .with_prober(Arc::new(NameProber))
            .with_source(Arc::new(StaticSource::new(
                "sonarr",
                SourceKind::Arr,
                vec![ProtectionRecord::Managed {
                    path: s(&library_copy),
                    custom_format_score: Some(10),
                    cutoff_met: Some(false),
                }],
            ))),
    );

    assert_eq!(report.diagnostics.upgrades_recommended, vec![s(&library_copy)]);
    // The managed copy is kept; the better unmanaged one goes
    assert_eq!(
        names(&report.plan.actionable),
        [("Show.S01E01.2160p.ENG.mkv".to_string(), PlanReason::KeeperProtected)]
            .into_iter()
            .collect()
    );
}

#[test]
fn test_file_cap_limits_the_catalog() {
    let lib = Library::new();
    let engine = create_show_tree(&lib);
    let mut config = engine.config().clone();
    config.max_files = Some(3);
    let report = run(&AuditEngine::new(config).with_prober(Arc::new(NameProber)));

    assert_eq!(report.files.len(), 3);
    assert!(report.diagnostics.file_cap_reached);
    assert!(report.files.iter().all(|f| f.path.starts_with(&lib.library)));
}
