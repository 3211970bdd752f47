use crate::scoring::QualityScore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Index of a file in the run's catalog.
pub type FileId = usize;

/// Identity of a hardlink set. Two catalog entries with equal keys are the
/// same bytes on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InodeKey {
    pub device: u64,
    pub inode: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Episode,
    Movie,
    Unknown,
}

/// Selects which preferred-language pair applies to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageProfile {
    Standard,
    Anime,
}

/// Logical content identity. String parts are already normalized
/// (lower-cased, whitespace collapsed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentKey {
    Episode {
        series: String,
        season: u32,
        episode: u32,
        last_episode: Option<u32>,
    },
    Absolute {
        series: String,
        number: u32,
    },
    Movie {
        title: String,
        year: u16,
    },
}

impl ContentKey {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentKey::Episode { .. } | ContentKey::Absolute { .. } => ContentKind::Episode,
            ContentKey::Movie { .. } => ContentKind::Movie,
        }
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKey::Episode {
                series,
                season,
                episode,
                last_episode: Some(last),
            } => write!(f, "{} S{:02}E{:02}-E{:02}", series, season, episode, last),
            ContentKey::Episode {
                series,
                season,
                episode,
                last_episode: None,
            } => write!(f, "{} S{:02}E{:02}", series, season, episode),
            ContentKey::Absolute { series, number } => write!(f, "{} #{}", series, number),
            ContentKey::Movie { title, year } => write!(f, "{} ({})", title, year),
        }
    }
}

/// Attributes recovered from the file name alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NameHints {
    pub resolution: Option<u32>,
    pub source: Option<String>,
    pub video_codec: Option<String>,
    pub audio_hints: Vec<String>,
    pub audio_languages: BTreeSet<String>,
    pub subtitle_languages: BTreeSet<String>,
    pub hdr: bool,
    pub release_group: Option<String>,
}

/// Attributes reported by the media prober.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct MediaAttributes {
    pub height: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codecs: Vec<String>,
    pub audio_languages: BTreeSet<String>,
    pub subtitle_languages: BTreeSet<String>,
    pub hdr: bool,
    pub audio_channels_max: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrMatch {
    pub instance: String,
    pub custom_format_score: Option<i64>,
    pub cutoff_met: Option<bool>,
}

impl ArrMatch {
    /// The instance reports its quality cutoff as not met.
    pub fn upgrade_recommended(&self) -> bool {
        self.cutoff_met == Some(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedingMatch {
    pub client: String,
    pub torrent: String,
    /// Link count observed when the record was matched.
    pub nlink_at_match: u64,
}

/// A download an arr instance is still importing to this path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueMatch {
    pub instance: String,
    pub status: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Protection {
    pub arr: Option<ArrMatch>,
    pub seeding: Option<SeedingMatch>,
    pub queued: Option<QueueMatch>,
}

impl Protection {
    pub fn arr_managed(&self) -> bool {
        self.arr.is_some()
    }

    pub fn is_seeding(&self) -> bool {
        self.seeding.is_some()
    }

    pub fn in_queue(&self) -> bool {
        self.queued.is_some()
    }

    pub fn is_protected(&self) -> bool {
        self.arr_managed() || self.is_seeding() || self.in_queue()
    }

    pub fn upgrade_recommended(&self) -> bool {
        self.arr.as_ref().map(ArrMatch::upgrade_recommended).unwrap_or(false)
    }
}

/// One physical file discovered during the scan.
#[derive(Debug, Clone, Serialize)]
pub struct MediaFile {
    pub id: FileId,
    pub path: PathBuf,
    pub root: PathBuf,
    pub size: u64,
    pub modified: i64,
    pub device: u64,
    pub inode: u64,
    pub nlink: u64,
    pub container: String,
    pub kind: ContentKind,
    pub profile: LanguageProfile,
    pub key: Option<ContentKey>,
    pub hints: NameHints,
    pub probed: Option<MediaAttributes>,
    pub probe_error: Option<String>,
    pub protection: Protection,
    pub score: Option<QualityScore>,
    pub avoided_language: bool,
    pub language_note: String,
}

impl MediaFile {
    /// A bare record with only structural attributes populated.
    pub fn new(path: PathBuf, root: PathBuf, size: u64, device: u64, inode: u64, nlink: u64) -> Self {
        let container = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Self {
            id: 0,
            path,
            root,
            size,
            modified: 0,
            device,
            inode,
            nlink,
            container,
            kind: ContentKind::Unknown,
            profile: LanguageProfile::Standard,
            key: None,
            hints: NameHints::default(),
            probed: None,
            probe_error: None,
            protection: Protection::default(),
            score: None,
            avoided_language: false,
            language_note: String::new(),
        }
    }

    pub fn inode_key(&self) -> InodeKey {
        InodeKey {
            device: self.device,
            inode: self.inode,
        }
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn file_name(&self) -> &str {
        file_name_of(&self.path)
    }

    pub fn resolution(&self) -> Option<u32> {
        self.probed
            .as_ref()
            .and_then(|a| a.height)
            .or(self.hints.resolution)
    }

    pub fn video_codec(&self) -> Option<String> {
        self.probed
            .as_ref()
            .and_then(|a| a.video_codec.clone())
            .or_else(|| self.hints.video_codec.clone())
            .map(|c| c.to_ascii_lowercase())
    }

    pub fn audio_languages(&self) -> BTreeSet<String> {
        let mut langs = self.hints.audio_languages.clone();
        if let Some(attrs) = &self.probed {
            langs.extend(attrs.audio_languages.iter().cloned());
        }
        langs.remove("und");
        langs
    }

    pub fn subtitle_languages(&self) -> BTreeSet<String> {
        let mut langs = self.hints.subtitle_languages.clone();
        if let Some(attrs) = &self.probed {
            langs.extend(attrs.subtitle_languages.iter().cloned());
        }
        langs
    }

    pub fn audio_codecs(&self) -> BTreeSet<String> {
        let mut codecs: BTreeSet<String> = self.hints.audio_hints.iter().cloned().collect();
        if let Some(attrs) = &self.probed {
            codecs.extend(attrs.audio_codecs.iter().map(|c| c.to_ascii_lowercase()));
        }
        codecs
    }

    pub fn hdr(&self) -> bool {
        self.hints.hdr || self.probed.as_ref().map(|a| a.hdr).unwrap_or(false)
    }

    pub fn custom_format_score(&self) -> Option<i64> {
        self.protection
            .arr
            .as_ref()
            .and_then(|arr| arr.custom_format_score)
    }
}

pub(crate) fn file_name_of(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}
