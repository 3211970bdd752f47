use crate::config::{AppConfig, ArrInstanceConfig, ArrKind, TorrentClientConfig};
use crate::error::Error;
use crate::progress::ProgressReporter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Torrent states that keep a torrent's files in use.
pub const ACTIVE_TORRENT_STATES: &[&str] = &[
    "uploading",
    "stalledUP",
    "queuedUP",
    "forcedUP",
    "seeding",
    "downloading",
    "stalledDL",
    "queuedDL",
    "forcedDL",
    "metaDL",
    "allocating",
    "checkingDL",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Arr,
    Torrent,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Arr => write!(f, "arr"),
            SourceKind::Torrent => write!(f, "torrent"),
        }
    }
}

/// Source-agnostic record. Paths are still in the source's namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionRecord {
    Managed {
        path: String,
        custom_format_score: Option<i64>,
        cutoff_met: Option<bool>,
    },
    Seeding {
        save_path: String,
        content_path: String,
        torrent: String,
        active: bool,
    },
    Queued {
        path: String,
        status: String,
        title: String,
    },
}

/// Anything that can say which files it is responsible for.
pub trait ProtectionSource: Send + Sync {
    /// Name used for path mappings and diagnostics.
    fn id(&self) -> &str;
    fn kind(&self) -> SourceKind;
    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }
    fn fetch(&self) -> Result<Vec<ProtectionRecord>, Error>;
}

/// Records fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticSource {
    id: String,
    kind: SourceKind,
    records: Vec<ProtectionRecord>,
}

impl StaticSource {
    pub fn new(id: &str, kind: SourceKind, records: Vec<ProtectionRecord>) -> Self {
        Self {
            id: id.to_string(),
            kind,
            records,
        }
    }

    pub fn managed(id: &str, paths: &[&str]) -> Self {
        let records = paths
            .iter()
            .map(|p| ProtectionRecord::Managed {
                path: p.to_string(),
                custom_format_score: None,
                cutoff_met: None,
            })
            .collect();
        Self::new(id, SourceKind::Arr, records)
    }

    pub fn queued(id: &str, paths: &[&str]) -> Self {
        let records = paths
            .iter()
            .map(|p| ProtectionRecord::Queued {
                path: p.to_string(),
                status: "downloading".to_string(),
                title: p.rsplit('/').next().unwrap_or(p).to_string(),
            })
            .collect();
        Self::new(id, SourceKind::Arr, records)
    }

    pub fn seeding(id: &str, content_paths: &[&str]) -> Self {
        let records = content_paths
            .iter()
            .map(|p| ProtectionRecord::Seeding {
                save_path: parent_of(p),
                content_path: p.to_string(),
                torrent: p.rsplit('/').next().unwrap_or(p).to_string(),
                active: true,
            })
            .collect();
        Self::new(id, SourceKind::Torrent, records)
    }
}

impl ProtectionSource for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn fetch(&self) -> Result<Vec<ProtectionRecord>, Error> {
        Ok(self.records.clone())
    }
}

fn parent_of(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

fn join_remote(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrFileEntry {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    custom_format_score: Option<i64>,
    #[serde(default)]
    quality_cutoff_not_met: Option<bool>,
    #[serde(default)]
    movie_file: Option<Box<ArrFileEntry>>,
    #[serde(default)]
    episode_file: Option<Box<ArrFileEntry>>,
}

impl ArrFileEntry {
    fn into_record(self) -> Option<ProtectionRecord> {
        if let Some(path) = self.path.filter(|p| !p.is_empty()) {
            return Some(ProtectionRecord::Managed {
                path,
                custom_format_score: self.custom_format_score,
                cutoff_met: self.quality_cutoff_not_met.map(|not_met| !not_met),
            });
        }
        self.movie_file
            .or(self.episode_file)
            .and_then(|nested| nested.into_record())
    }
}

/// Decodes an arr file-list export. Entries may carry `path` directly or
/// nest it under `movieFile` / `episodeFile`.
pub fn parse_arr_snapshot(json: &str) -> Result<Vec<ProtectionRecord>, Error> {
    let entries: Vec<ArrFileEntry> = serde_json::from_str(json)?;
    Ok(entries.into_iter().filter_map(ArrFileEntry::into_record).collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueEntry {
    #[serde(default)]
    output_path: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueueExport {
    Paged { records: Vec<QueueEntry> },
    List(Vec<QueueEntry>),
}

/// Decodes an arr download-queue export, either the paged `{"records": [..]}`
/// form or a bare list. Items without an `outputPath` are dropped.
pub fn parse_arr_queue(json: &str) -> Result<Vec<ProtectionRecord>, Error> {
    let entries = match serde_json::from_str::<QueueExport>(json)? {
        QueueExport::Paged { records } => records,
        QueueExport::List(records) => records,
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let path = entry.output_path.filter(|p| !p.is_empty())?;
            Some(ProtectionRecord::Queued {
                path,
                status: entry.status.unwrap_or_else(|| "unknown".to_string()),
                title: entry.title.unwrap_or_default(),
            })
        })
        .collect())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TorrentFileEntry {
    Name(String),
    Detailed { name: String },
}

impl TorrentFileEntry {
    fn name(&self) -> &str {
        match self {
            TorrentFileEntry::Name(name) | TorrentFileEntry::Detailed { name } => name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TorrentEntry {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    save_path: String,
    #[serde(default)]
    content_path: Option<String>,
    #[serde(default)]
    files: Vec<TorrentFileEntry>,
}

/// Decodes a torrent-list export. Multi-file torrents with a `files` list
/// yield one record per file under `save_path`.
pub fn parse_torrent_snapshot(json: &str) -> Result<Vec<ProtectionRecord>, Error> {
    let entries: Vec<TorrentEntry> = serde_json::from_str(json)?;
    let mut records = Vec::new();
    for entry in entries {
        let active = ACTIVE_TORRENT_STATES.contains(&entry.state.as_str());
        let torrent = if entry.name.is_empty() {
            entry.hash.clone()
        } else {
            entry.name.clone()
        };
        let content_path = entry
            .content_path
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| join_remote(&entry.save_path, &entry.name));

        let single_file = entry.files.len() == 1 && !entry.files[0].name().contains('/');
        if entry.files.is_empty() || single_file {
            records.push(ProtectionRecord::Seeding {
                save_path: entry.save_path,
                content_path,
                torrent,
                active,
            });
            continue;
        }
        for file in &entry.files {
            records.push(ProtectionRecord::Seeding {
                save_path: entry.save_path.clone(),
                content_path: join_remote(&entry.save_path, file.name()),
                torrent: torrent.clone(),
                active,
            });
        }
    }
    Ok(records)
}

/// An arr instance read from its JSON export, plus its download queue when
/// one is configured.
#[derive(Debug, Clone)]
pub struct ArrSnapshotSource {
    name: String,
    kind: ArrKind,
    snapshot: PathBuf,
    queue_snapshot: Option<PathBuf>,
    timeout: Duration,
}

impl ArrSnapshotSource {
    pub fn from_config(config: &ArrInstanceConfig) -> Self {
        Self {
            name: config.name.clone(),
            kind: config.kind,
            snapshot: PathBuf::from(&config.snapshot),
            queue_snapshot: config.queue_snapshot.as_ref().map(PathBuf::from),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn read(&self, path: &Path) -> Result<String, Error> {
        fs::read_to_string(path).map_err(|e| Error::Source(self.name.clone(), format!("{}: {}", path.display(), e)))
    }
}

impl ProtectionSource for ArrSnapshotSource {
    fn id(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Arr
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn fetch(&self) -> Result<Vec<ProtectionRecord>, Error> {
        let text = self.read(&self.snapshot)?;
        let mut records = parse_arr_snapshot(&text).map_err(|e| Error::Source(self.name.clone(), e.to_string()))?;
        debug!("[{} {}] {} managed files", self.kind, self.name, records.len());
        if let Some(queue) = &self.queue_snapshot {
            let text = self.read(queue)?;
            let queued = parse_arr_queue(&text).map_err(|e| Error::Source(self.name.clone(), e.to_string()))?;
            debug!("[{} {}] {} queued downloads", self.kind, self.name, queued.len());
            records.extend(queued);
        }
        Ok(records)
    }
}

/// A torrent client read from its JSON export.
#[derive(Debug, Clone)]
pub struct TorrentSnapshotSource {
    name: String,
    snapshot: PathBuf,
    timeout: Duration,
}

impl TorrentSnapshotSource {
    pub fn from_config(config: &TorrentClientConfig) -> Self {
        Self {
            name: config.name.clone(),
            snapshot: PathBuf::from(&config.snapshot),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl ProtectionSource for TorrentSnapshotSource {
    fn id(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Torrent
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn fetch(&self) -> Result<Vec<ProtectionRecord>, Error> {
        let text = fs::read_to_string(&self.snapshot)
            .map_err(|e| Error::Source(self.name.clone(), format!("{}: {}", self.snapshot.display(), e)))?;
        parse_torrent_snapshot(&text).map_err(|e| Error::Source(self.name.clone(), e.to_string()))
    }
}

/// Enabled sources in configuration order: arr instances, then the torrent
/// client.
pub fn sources_from_config(config: &AppConfig) -> Vec<Arc<dyn ProtectionSource>> {
    let mut sources: Vec<Arc<dyn ProtectionSource>> = Vec::new();
    for instance in config.arr.iter().filter(|i| i.enabled) {
        sources.push(Arc::new(ArrSnapshotSource::from_config(instance)));
    }
    if let Some(torrent) = config.torrent.as_ref().filter(|t| t.enabled) {
        sources.push(Arc::new(TorrentSnapshotSource::from_config(torrent)));
    }
    sources
}

/// Records fetched from one source.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: String,
    pub kind: SourceKind,
    pub records: Vec<ProtectionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub batches: Vec<SourceBatch>,
    pub failures: Vec<SourceFailure>,
}

struct InFlight {
    id: String,
    kind: SourceKind,
    deadline: Instant,
    timeout: Duration,
    rx: mpsc::Receiver<Result<Vec<ProtectionRecord>, Error>>,
}

/// Fetches started in the background; collected once the scan is done.
pub struct PendingFetch {
    in_flight: Vec<InFlight>,
}

impl PendingFetch {
    /// One thread per source. A source that overruns its timeout is
    /// abandoned; its thread finishes on its own.
    pub fn spawn(sources: &[Arc<dyn ProtectionSource>]) -> Self {
        let started = Instant::now();
        let in_flight = sources
            .iter()
            .map(|source| {
                let (tx, rx) = mpsc::channel();
                let worker = Arc::clone(source);
                thread::spawn(move || {
                    let _ = tx.send(worker.fetch());
                });
                InFlight {
                    id: source.id().to_string(),
                    kind: source.kind(),
                    deadline: started + source.timeout(),
                    timeout: source.timeout(),
                    rx,
                }
            })
            .collect();
        Self { in_flight }
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Results stay in source order regardless of completion order.
    pub fn collect(self, reporter: &dyn ProgressReporter) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        for flight in self.in_flight {
            let wait = flight.deadline.saturating_duration_since(Instant::now());
            let result = match flight.rx.recv_timeout(wait) {
                Ok(result) => result,
                Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::Source(
                    flight.id.clone(),
                    format!("timed out after {}s", flight.timeout.as_secs()),
                )),
                Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Source(
                    flight.id.clone(),
                    "fetch thread exited without a result".to_string(),
                )),
            };
            match result {
                Ok(records) => {
                    info!("Source {} ({}) returned {} records", flight.id, flight.kind, records.len());
                    reporter.on_source_complete(&flight.id, Some(records.len()));
                    outcome.batches.push(SourceBatch {
                        source: flight.id,
                        kind: flight.kind,
                        records,
                    });
                }
                Err(err) => {
                    warn!("Source {} unavailable, continuing without it: {}", flight.id, err);
                    reporter.on_source_complete(&flight.id, None);
                    outcome.failures.push(SourceFailure {
                        source: flight.id,
                        error: err.to_string(),
                    });
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;

    #[test]
    fn test_parse_arr_snapshot_shapes() {
        let json = r#"[
            {"path": "/tv/Show/Season 01/Show - S01E01.mkv", "customFormatScore": 120, "qualityCutoffNotMet": false},
            {"title": "Film", "movieFile": {"path": "/movies/Film (2020)/Film.mkv", "qualityCutoffNotMet": true}},
            {"title": "Missing file"}
        ]"#;
        let records = parse_arr_snapshot(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            ProtectionRecord::Managed {
                path: "/tv/Show/Season 01/Show - S01E01.mkv".to_string(),
                custom_format_score: Some(120),
                cutoff_met: Some(true),
            }
        );
        assert_eq!(
            records[1],
            ProtectionRecord::Managed {
                path: "/movies/Film (2020)/Film.mkv".to_string(),
                custom_format_score: None,
                cutoff_met: Some(false),
            }
        );
    }

    #[test]
    fn test_parse_torrent_snapshot() {
        let json = r#"[
            {"hash": "aa", "name": "Show.S01E01.mkv", "state": "stalledUP",
             "save_path": "/data/torrents/", "content_path": "/data/torrents/Show.S01E01.mkv"},
            {"hash": "bb", "name": "Show.S01", "state": "pausedUP",
             "save_path": "/data/torrents", "content_path": "/data/torrents/Show.S01",
             "files": ["Show.S01/Show.S01E01.mkv", {"name": "Show.S01/Show.S01E02.mkv"}]}
        ]"#;
        let records = parse_torrent_snapshot(json).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0],
            ProtectionRecord::Seeding {
                save_path: "/data/torrents/".to_string(),
                content_path: "/data/torrents/Show.S01E01.mkv".to_string(),
                torrent: "Show.S01E01.mkv".to_string(),
                active: true,
            }
        );
        match &records[2] {
            ProtectionRecord::Seeding {
                content_path,
                active,
                ..
            } => {
                assert_eq!(content_path, "/data/torrents/Show.S01/Show.S01E02.mkv");
                assert!(!active);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_parse_arr_queue_shapes() {
        let paged = r#"{"page": 1, "records": [
            {"title": "Show.S01E03.1080p", "status": "downloading", "outputPath": "/downloads/Show.S01E03.1080p.mkv"},
            {"title": "Show.S01E04.1080p", "status": "queued"}
        ]}"#;
        let records = parse_arr_queue(paged).unwrap();
        assert_eq!(
            records,
            vec![ProtectionRecord::Queued {
                path: "/downloads/Show.S01E03.1080p.mkv".to_string(),
                status: "downloading".to_string(),
                title: "Show.S01E03.1080p".to_string(),
            }]
        );

        let list = r#"[{"outputPath": "/downloads/Film.mkv"}]"#;
        match &parse_arr_queue(list).unwrap()[0] {
            ProtectionRecord::Queued { status, title, .. } => {
                assert_eq!(status, "unknown");
                assert!(title.is_empty());
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_arr_source_reads_queue_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let files = dir.path().join("sonarr.json");
        let queue = dir.path().join("queue.json");
        fs::write(&files, r#"[{"path": "/tv/a.mkv"}]"#).unwrap();
        fs::write(&queue, r#"[{"outputPath": "/downloads/b.mkv", "status": "importPending"}]"#).unwrap();
        let source = ArrSnapshotSource {
            name: "sonarr".to_string(),
            kind: ArrKind::Sonarr,
            snapshot: files,
            queue_snapshot: Some(queue),
            timeout: Duration::from_secs(1),
        };
        let records = source.fetch().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[1], ProtectionRecord::Queued { path, .. } if path == "/downloads/b.mkv"));
    }

    struct SlowSource;

    impl ProtectionSource for SlowSource {
        fn id(&self) -> &str {
            "slow"
        }
        fn kind(&self) -> SourceKind {
            SourceKind::Arr
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }
        fn fetch(&self) -> Result<Vec<ProtectionRecord>, Error> {
            thread::sleep(Duration::from_secs(2));
            Ok(Vec::new())
        }
    }

    struct BrokenSource;

    impl ProtectionSource for BrokenSource {
        fn id(&self) -> &str {
            "broken"
        }
        fn kind(&self) -> SourceKind {
            SourceKind::Torrent
        }
        fn fetch(&self) -> Result<Vec<ProtectionRecord>, Error> {
            Err(Error::Source("broken".to_string(), "connection refused".to_string()))
        }
    }

    #[test]
    fn test_failed_sources_degrade_to_diagnostics() {
        let sources: Vec<Arc<dyn ProtectionSource>> = vec![
            Arc::new(SlowSource),
            Arc::new(StaticSource::managed("sonarr", &["/tv/a.mkv"])),
            Arc::new(BrokenSource),
        ];
        let outcome = PendingFetch::spawn(&sources).collect(&SilentReporter);
        assert_eq!(outcome.batches.len(), 1);
        assert_eq!(outcome.batches[0].source, "sonarr");
        let failed: Vec<&str> = outcome.failures.iter().map(|f| f.source.as_str()).collect();
        assert_eq!(failed, vec!["slow", "broken"]);
        assert!(outcome.failures[0].error.contains("timed out"));
    }

    #[test]
    fn test_missing_snapshot_is_a_source_error() {
        let source = TorrentSnapshotSource {
            name: "qbittorrent".to_string(),
            snapshot: PathBuf::from("/nonexistent/torrents.json"),
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(source.fetch(), Err(Error::Source(..))));
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/data/torrents/a.mkv"), "/data/torrents");
        assert_eq!(parent_of("/a.mkv"), "/");
    }
}
