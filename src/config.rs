use crate::error::Error;
use crate::language;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Directories that may never be used as the delete scope itself.
const SYSTEM_DIRECTORIES: &[&str] = &[
    "/", "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib64", "/mnt", "/opt", "/proc",
    "/root", "/run", "/sbin", "/srv", "/sys", "/tmp", "/usr", "/var",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub roots: Vec<String>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_report_dir")]
    pub report_dir: String,
    #[serde(default)]
    pub delete_scope: String,
    #[serde(default)]
    pub content_type: ContentTypePolicy,
    #[serde(default = "default_true")]
    pub skip_samples: bool,
    #[serde(default)]
    pub include_hardlinked: bool,
    #[serde(default = "default_true")]
    pub protect_seeding: bool,
    #[serde(default = "default_true")]
    pub protect_arr_managed: bool,
    /// Stop cataloguing after this many media files. Unlimited when unset.
    #[serde(default)]
    pub max_files: Option<usize>,
    #[serde(default = "default_true")]
    pub case_sensitive_paths: bool,
    #[serde(default = "default_score_priority")]
    pub score_priority: Vec<ScoreFactor>,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub languages: LanguagePolicy,
    #[serde(default)]
    pub arr: Vec<ArrInstanceConfig>,
    #[serde(default)]
    pub torrent: Option<TorrentClientConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            ignore_patterns: Vec::new(),
            extensions: default_extensions(),
            report_dir: default_report_dir(),
            delete_scope: String::new(),
            content_type: ContentTypePolicy::default(),
            skip_samples: true,
            include_hardlinked: false,
            protect_seeding: true,
            protect_arr_managed: true,
            max_files: None,
            case_sensitive_paths: true,
            score_priority: default_score_priority(),
            probe: ProbeConfig::default(),
            languages: LanguagePolicy::default(),
            arr: Vec::new(),
            torrent: None,
        }
    }
}

/// How files are classified when the name alone is ambiguous, and which
/// language pair applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentTypePolicy {
    #[default]
    Auto,
    Series,
    Anime,
    Movie,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeScope {
    None,
    #[default]
    Dupes,
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AvoidMode {
    #[default]
    IfNoPrefer,
    Strict,
    ReportOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFactor {
    Resolution,
    Language,
    CustomFormat,
    Codec,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub scope: ProbeScope,
    #[serde(default = "default_probe_workers")]
    pub workers: usize,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_binary")]
    pub binary: String,
    /// Defaults to `<report_dir>/probe-cache.json`.
    #[serde(default)]
    pub cache_file: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            scope: ProbeScope::default(),
            workers: default_probe_workers(),
            timeout_secs: default_probe_timeout(),
            binary: default_probe_binary(),
            cache_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LanguagePolicy {
    /// Primary and secondary audio language for films and series.
    #[serde(default = "default_standard_languages")]
    pub standard: Vec<String>,
    /// Primary and secondary audio language for anime.
    #[serde(default = "default_anime_languages")]
    pub anime: Vec<String>,
    #[serde(default)]
    pub avoid: Vec<String>,
    #[serde(default)]
    pub avoid_mode: AvoidMode,
}

impl Default for LanguagePolicy {
    fn default() -> Self {
        Self {
            standard: default_standard_languages(),
            anime: default_anime_languages(),
            avoid: Vec::new(),
            avoid_mode: AvoidMode::default(),
        }
    }
}

impl LanguagePolicy {
    /// Returns a copy with every code normalized to ISO 639-2.
    pub fn normalized(&self) -> LanguagePolicy {
        let norm = |codes: &[String]| -> Vec<String> {
            codes
                .iter()
                .map(|c| language::normalize_code(c))
                .filter(|c| !c.is_empty())
                .collect()
        };
        LanguagePolicy {
            standard: norm(&self.standard),
            anime: norm(&self.anime),
            avoid: norm(&self.avoid),
            avoid_mode: self.avoid_mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrKind {
    Sonarr,
    Radarr,
}

impl fmt::Display for ArrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrKind::Sonarr => write!(f, "sonarr"),
            ArrKind::Radarr => write!(f, "radarr"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArrInstanceConfig {
    pub name: String,
    pub kind: ArrKind,
    /// JSON export of the instance's file list.
    pub snapshot: String,
    /// JSON export of the instance's download queue.
    #[serde(default)]
    pub queue_snapshot: Option<String>,
    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TorrentClientConfig {
    #[serde(default = "default_torrent_name")]
    pub name: String,
    /// JSON export of the client's torrent list.
    pub snapshot: String,
    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// One `external -> local` prefix pair. Accepts either a table or an
/// `"EXTERNAL:LOCAL"` string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "RawMapping")]
pub struct PathMapping {
    pub external: String,
    pub local: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMapping {
    Pair(String),
    Table { external: String, local: String },
}

impl TryFrom<RawMapping> for PathMapping {
    type Error = Error;

    fn try_from(raw: RawMapping) -> Result<Self, Self::Error> {
        match raw {
            RawMapping::Pair(s) => s.parse(),
            RawMapping::Table { external, local } => PathMapping::new(&external, &local),
        }
    }
}

impl FromStr for PathMapping {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((external, local)) => PathMapping::new(external, local),
            None => Err(Error::InvalidMapping(
                s.to_string(),
                "expected EXTERNAL:LOCAL".to_string(),
            )),
        }
    }
}

impl PathMapping {
    pub fn new(external: &str, local: &str) -> Result<Self, Error> {
        let mapping = PathMapping {
            external: external.trim().to_string(),
            local: local.trim().to_string(),
        };
        mapping.check()?;
        Ok(mapping)
    }

    pub fn check(&self) -> Result<(), Error> {
        let label = format!("{}:{}", self.external, self.local);
        if self.external.is_empty() || self.local.is_empty() {
            return Err(Error::InvalidMapping(label, "empty prefix".to_string()));
        }
        if !self.external.starts_with('/') || !self.local.starts_with('/') {
            return Err(Error::InvalidMapping(
                label,
                "both prefixes must be absolute".to_string(),
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Rejects anything that would make the run unsafe or meaningless.
    /// Called before scanning starts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.roots.is_empty() {
            return Err(Error::InvalidConfig("no roots configured".to_string()));
        }
        for root in &self.roots {
            if !Path::new(root).is_absolute() {
                return Err(Error::InvalidConfig(format!("root '{}' is not absolute", root)));
            }
        }

        let scope = self.delete_scope.trim();
        if scope.is_empty() {
            return Err(Error::InvalidScope(scope.to_string(), "not configured".to_string()));
        }
        if !Path::new(scope).is_absolute() {
            return Err(Error::InvalidScope(scope.to_string(), "not absolute".to_string()));
        }
        let trimmed = scope.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
        if SYSTEM_DIRECTORIES.contains(&trimmed) {
            return Err(Error::InvalidScope(
                scope.to_string(),
                "system directory".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for factor in &self.score_priority {
            if !seen.insert(*factor) {
                return Err(Error::InvalidConfig(format!(
                    "score factor {:?} listed twice",
                    factor
                )));
            }
        }

        if self.max_files == Some(0) {
            return Err(Error::InvalidConfig("max_files must be at least 1".to_string()));
        }

        if self.probe.workers == 0 {
            return Err(Error::InvalidConfig("probe.workers must be at least 1".to_string()));
        }

        for instance in &self.arr {
            if instance.name.trim().is_empty() {
                return Err(Error::InvalidConfig("arr instance without a name".to_string()));
            }
            for mapping in &instance.path_mappings {
                mapping.check()?;
            }
        }
        if let Some(torrent) = &self.torrent {
            for mapping in &torrent.path_mappings {
                mapping.check()?;
            }
        }

        for pattern in &self.ignore_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                Error::InvalidConfig(format!("invalid ignore pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(())
    }

    pub fn probe_cache_path(&self) -> String {
        match &self.probe.cache_file {
            Some(path) => path.clone(),
            None => Path::new(&self.report_dir)
                .join("probe-cache.json")
                .to_string_lossy()
                .into_owned(),
        }
    }

    /// Lower-cased extensions without the leading dot.
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }
}

pub fn load_configuration(name: &str) -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name(name).required(false))
        .add_source(
            Environment::with_prefix("MEDIA_AUDIT")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("roots")
                .with_list_parse_key("extensions")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        if result.iter().any(|kept| dir_path.starts_with(Path::new(kept))) {
            continue;
        }
        result.retain(|kept| !Path::new(kept).starts_with(dir_path));
        result.push(dir);
    }

    result
}

fn default_true() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    ["mkv", "mp4", "m4v", "avi", "mov", "ts", "wmv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_report_dir() -> String {
    "./reports".to_string()
}

fn default_score_priority() -> Vec<ScoreFactor> {
    vec![
        ScoreFactor::Resolution,
        ScoreFactor::Language,
        ScoreFactor::CustomFormat,
        ScoreFactor::Codec,
    ]
}

fn default_probe_workers() -> usize {
    2
}

fn default_probe_timeout() -> u64 {
    30
}

fn default_probe_binary() -> String {
    "ffprobe".to_string()
}

fn default_standard_languages() -> Vec<String> {
    vec!["deu".to_string(), "eng".to_string()]
}

fn default_anime_languages() -> Vec<String> {
    vec!["deu".to_string(), "jpn".to_string()]
}

fn default_source_timeout() -> u64 {
    15
}

fn default_torrent_name() -> String {
    "qbittorrent".to_string()
}
