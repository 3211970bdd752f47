//! Ordinal quality scores for ranking members of one identity group.
//!
//! A score is only meaningful relative to other scores built with the same
//! priority list. Factors are compared lexicographically in the configured
//! order, followed by audio quality, release source and finally file size.

use crate::config::{AppConfig, AvoidMode, LanguagePolicy, ScoreFactor};
use crate::identity::Grouping;
use crate::model::{LanguageProfile, MediaFile};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Language tier given to avoided-language files in a group where nobody
/// carries a preferred language.
const AVOID_PENALTY_TIER: i64 = -1;

#[derive(Debug, Clone, Serialize)]
pub struct QualityScore {
    pub resolution: i64,
    pub language: i64,
    pub custom_format: i64,
    pub codec: i64,
    pub audio: i64,
    pub source: i64,
    pub size: u64,
    rank: Vec<i64>,
}

impl QualityScore {
    fn rerank(&mut self, priority: &[ScoreFactor]) {
        self.rank.clear();
        for factor in priority {
            self.rank.push(match factor {
                ScoreFactor::Resolution => self.resolution,
                ScoreFactor::Language => self.language,
                ScoreFactor::CustomFormat => self.custom_format,
                ScoreFactor::Codec => self.codec,
            });
        }
        self.rank.push(self.audio);
        self.rank.push(self.source);
        self.rank.push(i64::try_from(self.size).unwrap_or(i64::MAX));
    }

    pub fn rank(&self) -> &[i64] {
        &self.rank
    }
}

impl PartialEq for QualityScore {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
    }
}

impl Eq for QualityScore {}

impl PartialOrd for QualityScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QualityScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank.cmp(&other.rank)
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "res={} lang={} cf={} codec={} audio={} src={}",
            self.resolution, self.language, self.custom_format, self.codec, self.audio, self.source
        )
    }
}

pub fn resolution_tier(height: Option<u32>) -> i64 {
    match height {
        Some(h) if h >= 1400 => 4,
        Some(h) if h >= 900 => 3,
        Some(h) if h >= 600 => 2,
        Some(h) if h > 0 => 1,
        _ => 0,
    }
}

pub fn codec_tier(codec: Option<&str>) -> i64 {
    match codec {
        Some("av1") => 4,
        Some("hevc" | "h265" | "x265" | "vp9") => 3,
        Some("h264" | "x264" | "avc") => 2,
        Some("mpeg4" | "xvid" | "divx" | "mpeg2" | "mpeg2video" | "vc1" | "msmpeg4v3") => 1,
        _ => 0,
    }
}

/// Release source parsed from the file name; remux above disc encodes
/// above web releases above broadcast captures.
pub fn source_tier(source: Option<&str>) -> i64 {
    match source {
        Some("remux") => 5,
        Some("bluray") => 4,
        Some("webdl") => 3,
        Some("webrip") => 2,
        Some("hdtv") => 1,
        _ => 0,
    }
}

/// Best audio codec tier plus a channel bonus.
pub fn audio_tier(codecs: &BTreeSet<String>, channels: Option<u32>) -> i64 {
    let codec = codecs
        .iter()
        .map(|c| match c.as_str() {
            "truehd" | "atmos" => 6,
            "dtshd" | "dts-hd" => 5,
            "flac" => 4,
            "dts" | "eac3" => 3,
            "ac3" => 2,
            "aac" | "opus" => 1,
            _ => 0,
        })
        .max()
        .unwrap_or(0);
    let channels = match channels {
        Some(c) if c >= 8 => 2,
        Some(c) if c >= 6 => 1,
        _ => 0,
    };
    codec * 3 + channels
}

pub struct Scorer {
    priority: Vec<ScoreFactor>,
    languages: LanguagePolicy,
}

impl Scorer {
    pub fn new(priority: Vec<ScoreFactor>, languages: &LanguagePolicy) -> Self {
        Self {
            priority,
            languages: languages.normalized(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.score_priority.clone(), &config.languages)
    }

    pub fn avoid_mode(&self) -> AvoidMode {
        self.languages.avoid_mode
    }

    fn preferred_pair(&self, profile: LanguageProfile) -> (Option<&str>, Option<&str>) {
        let pair = match profile {
            LanguageProfile::Standard => &self.languages.standard,
            LanguageProfile::Anime => &self.languages.anime,
        };
        (
            pair.first().map(String::as_str),
            pair.get(1).map(String::as_str),
        )
    }

    /// 4 = primary and secondary audio, 3 = primary, 2 = secondary with
    /// primary subtitles, 1 = secondary, 0 = neither.
    pub fn language_tier(&self, file: &MediaFile) -> (i64, String) {
        let audio = file.audio_languages();
        let subs = file.subtitle_languages();
        let (primary, secondary) = self.preferred_pair(file.profile);
        let has = |code: Option<&str>| code.map(|c| audio.contains(c)).unwrap_or(false);
        let has_primary = has(primary);
        let has_secondary = has(secondary);
        let primary_subs = primary.map(|c| subs.contains(c)).unwrap_or(false);
        let upper = |code: Option<&str>| code.unwrap_or("?").to_ascii_uppercase();

        match (has_primary, has_secondary) {
            (true, true) => (4, format!("{}+{} audio", upper(primary), upper(secondary))),
            (true, false) => (3, format!("{} audio", upper(primary))),
            (false, true) if primary_subs => (
                2,
                format!("{} audio + {} subs", upper(secondary), upper(primary)),
            ),
            (false, true) => (1, format!("{} audio", upper(secondary))),
            (false, false) => (0, "no preferred language".to_string()),
        }
    }

    pub fn has_avoided_language(&self, file: &MediaFile) -> bool {
        !self.languages.avoid.is_empty()
            && file
                .audio_languages()
                .iter()
                .any(|lang| self.languages.avoid.contains(lang))
    }

    /// Context-free score of one file.
    pub fn score(&self, file: &MediaFile) -> QualityScore {
        let (language, _) = self.language_tier(file);
        let channels = file.probed.as_ref().and_then(|a| a.audio_channels_max);
        let mut score = QualityScore {
            resolution: resolution_tier(file.resolution()),
            language,
            custom_format: file.custom_format_score().unwrap_or(0),
            codec: codec_tier(file.video_codec().as_deref()),
            audio: audio_tier(&file.audio_codecs(), channels),
            source: source_tier(file.hints.source.as_deref()),
            size: file.size,
            rank: Vec::with_capacity(self.priority.len() + 3),
        };
        score.rerank(&self.priority);
        score
    }

    /// Scores every file, then applies the group-level avoid penalty.
    pub fn score_all(&self, files: &mut [MediaFile], grouping: &Grouping) {
        for file in files.iter_mut() {
            let (_, note) = self.language_tier(file);
            file.score = Some(self.score(file));
            file.avoided_language = self.has_avoided_language(file);
            file.language_note = if file.avoided_language {
                format!("{} [avoided language]", note)
            } else {
                note
            };
        }

        if self.languages.avoid_mode != AvoidMode::IfNoPrefer {
            return;
        }
        for group in grouping.duplicates() {
            let any_preferred = group.members.iter().any(|&id| {
                files[id]
                    .score
                    .as_ref()
                    .map(|s| s.language > 0)
                    .unwrap_or(false)
            });
            if any_preferred {
                continue;
            }
            for &id in &group.members {
                let file = &mut files[id];
                if !file.avoided_language {
                    continue;
                }
                if let Some(score) = file.score.as_mut() {
                    score.language = AVOID_PENALTY_TIER;
                    score.rerank(&self.priority);
                    debug!("Avoid penalty applied to {}", file.path.display());
                }
                file.language_note.push_str(" [PENALTY]");
            }
        }
    }
}

/// Best first: higher score, then more links, then shorter path, then
/// lexical path so the order is total.
pub fn compare_candidates(a: &MediaFile, b: &MediaFile) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.nlink.cmp(&a.nlink))
        .then_with(|| a.path.as_os_str().len().cmp(&b.path.as_os_str().len()))
        .then_with(|| a.path.cmp(&b.path))
}
