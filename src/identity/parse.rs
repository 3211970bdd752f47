use crate::config::ContentTypePolicy;
use crate::language;
use crate::model::{ContentKey, ContentKind, LanguageProfile, NameHints};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

lazy_static! {
    static ref EPISODE_RE: Regex = Regex::new(
        r"(?i)(?:^|[^a-z0-9])S(?P<s>\d{1,2})[ ._]?E(?P<e>\d{1,3})(?:-?E(?P<e2>\d{1,3})|-(?P<e3>\d{1,3})(?:[^a-z0-9]|$))?"
    )
    .unwrap();
    static ref CROSS_RE: Regex =
        Regex::new(r"(?i)(?:^|[^a-z0-9])(?P<s>\d{1,2})x(?P<e>\d{2,3})(?:[^a-z0-9]|$)").unwrap();
    static ref ABSOLUTE_RE: Regex =
        Regex::new(r"\s-\s(?P<abs>\d{2,4})(?:v\d)?(?:\s|$)").unwrap();
    static ref RESOLUTION_RE: Regex =
        Regex::new(r"(?i)(?:^|[^a-z0-9])(?P<res>2160|1080|720|576|480|360)[pi](?:[^a-z0-9]|$)").unwrap();
    static ref UHD_RE: Regex = Regex::new(r"(?i)\b(?:4k|uhd)\b").unwrap();
    static ref HDR_RE: Regex =
        Regex::new(r"(?i)\b(?:hdr|hdr10|hdr10plus|dv|dovi|dolby[ .]?vision)\b").unwrap();
    static ref RELEASE_GROUP_RE: Regex =
        Regex::new(r"-(?P<grp>[A-Za-z0-9][A-Za-z0-9._]+)$").unwrap();
    static ref LEADING_TAGS_RE: Regex = Regex::new(r"^(?:\s*\[[^\]]*\])+").unwrap();
    static ref SEASON_DIR_RE: Regex =
        Regex::new(r"(?i)^(?:season|staffel|series|s)[ ._]*\d{1,3}$|^specials?$").unwrap();
    static ref FANSUB_RE: Regex = Regex::new(
        r"(?i)\[[^\]]*(?:fansub|horriblesubs|erai-raws|subsplease|abj|gertv)[^\]]*\]|-(?:Erai-raws|HorribleSubs|SubsPlease|ABJ|GERTv)\b"
    )
    .unwrap();
    static ref SOURCE_HINTS: Vec<(&'static str, Regex)> = vec![
        ("remux", Regex::new(r"(?i)\bremux\b").unwrap()),
        ("bluray", Regex::new(r"(?i)\bblu[- .]?ray\b|\bbdrip\b").unwrap()),
        ("webdl", Regex::new(r"(?i)\bweb[- .]?dl\b").unwrap()),
        ("webrip", Regex::new(r"(?i)\bweb[- .]?rip\b").unwrap()),
        ("hdtv", Regex::new(r"(?i)\bhdtv\b").unwrap()),
    ];
    static ref CODEC_HINTS: Vec<(&'static str, Regex)> = vec![
        ("av1", Regex::new(r"(?i)\bav1\b").unwrap()),
        ("hevc", Regex::new(r"(?i)\bhevc\b|\bx265\b|\bh\.?265\b").unwrap()),
        ("h264", Regex::new(r"(?i)\bh\.?264\b|\bx264\b|\bavc\b").unwrap()),
        ("xvid", Regex::new(r"(?i)\bxvid\b|\bdivx\b").unwrap()),
        ("mpeg2", Regex::new(r"(?i)\bmpeg-?2\b").unwrap()),
    ];
    static ref AUDIO_HINTS: Vec<(&'static str, Regex)> = vec![
        ("truehd", Regex::new(r"(?i)\btruehd\b").unwrap()),
        ("atmos", Regex::new(r"(?i)\batmos\b").unwrap()),
        ("dtshd", Regex::new(r"(?i)\bdts[- .]?hd\b|\bdtshd\b").unwrap()),
        ("dts", Regex::new(r"(?i)\bdts\b").unwrap()),
        ("eac3", Regex::new(r"(?i)\be-?ac-?3\b|\bddp").unwrap()),
        ("ac3", Regex::new(r"(?i)\bac-?3\b|\bdd5").unwrap()),
        ("aac", Regex::new(r"(?i)\baac").unwrap()),
        ("flac", Regex::new(r"(?i)\bflac\b").unwrap()),
    ];
}

/// Everything recovered from a path without opening the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub key: Option<ContentKey>,
    pub kind: ContentKind,
    pub profile: LanguageProfile,
    pub hints: NameHints,
}

pub fn parse_path(path: &Path, policy: ContentTypePolicy) -> ParsedName {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let episode = parse_episode(path, &stem);
    let absolute = if episode.is_none() {
        parse_absolute(path, &stem)
    } else {
        None
    };
    let movie = parse_movie(path, &stem);

    let key = match (episode.or(absolute), movie) {
        (Some(ep), Some(mv)) => match ambiguity_winner(path, policy) {
            ContentKind::Movie => Some(mv),
            _ => Some(ep),
        },
        (Some(ep), None) => Some(ep),
        (None, Some(mv)) => Some(mv),
        (None, None) => None,
    };

    let kind = key.as_ref().map(ContentKey::kind).unwrap_or(ContentKind::Unknown);
    let profile = detect_profile(path, &stem, key.as_ref(), policy);
    let hints = parse_hints(&stem, profile == LanguageProfile::Anime);

    ParsedName {
        key,
        kind,
        profile,
        hints,
    }
}

/// Collapses whitespace and lower-cases; the key equality form.
pub fn normalize_key_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn clean_title(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| match c {
            '.' | '_' | '(' | ')' | '[' | ']' | '{' | '}' => ' ',
            other => other,
        })
        .collect();
    let trimmed = replaced.trim().trim_end_matches(['-', ' ']).trim_start_matches(['-', ' ']);
    normalize_key_text(trimmed)
}

fn ambiguity_winner(path: &Path, policy: ContentTypePolicy) -> ContentKind {
    match policy {
        ContentTypePolicy::Movie => ContentKind::Movie,
        ContentTypePolicy::Series | ContentTypePolicy::Anime => ContentKind::Episode,
        ContentTypePolicy::Auto => {
            let lower = path.to_string_lossy().to_lowercase();
            if lower.contains("/movies/") || lower.contains("/filme/") {
                ContentKind::Movie
            } else {
                ContentKind::Episode
            }
        }
    }
}

fn parse_episode(path: &Path, stem: &str) -> Option<ContentKey> {
    let (caps, start) = match EPISODE_RE.captures(stem) {
        Some(caps) => {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            (caps, start)
        }
        None => {
            let caps = CROSS_RE.captures(stem)?;
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            (caps, start)
        }
    };

    let season: u32 = caps.name("s")?.as_str().parse().ok()?;
    let episode: u32 = caps.name("e")?.as_str().parse().ok()?;
    let last_episode = caps
        .name("e2")
        .or_else(|| caps.name("e3"))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|last| *last > episode);

    let series = series_from_prefix(&stem[..start]).or_else(|| series_from_folders(path))?;
    Some(ContentKey::Episode {
        series,
        season,
        episode,
        last_episode,
    })
}

fn parse_absolute(path: &Path, stem: &str) -> Option<ContentKey> {
    let caps = ABSOLUTE_RE.captures(stem)?;
    let number: u32 = caps.name("abs")?.as_str().parse().ok()?;
    if (1900..=2099).contains(&number) {
        return None;
    }
    let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
    let series = series_from_prefix(&stem[..start]).or_else(|| series_from_folders(path))?;
    Some(ContentKey::Absolute { series, number })
}

fn series_from_prefix(prefix: &str) -> Option<String> {
    let without_tags = LEADING_TAGS_RE.replace(prefix, "");
    let series = clean_title(&without_tags);
    if series.is_empty() {
        None
    } else {
        Some(series)
    }
}

fn series_from_folders(path: &Path) -> Option<String> {
    path.ancestors()
        .skip(1)
        .filter_map(|dir| dir.file_name().and_then(|n| n.to_str()))
        .find(|name| !SEASON_DIR_RE.is_match(name))
        .map(clean_title)
        .filter(|s| !s.is_empty())
}

fn parse_movie(path: &Path, stem: &str) -> Option<ContentKey> {
    title_and_year(stem).or_else(|| {
        path.parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(title_and_year)
    })
}

/// The last plausible year token that has a title in front of it. Tokens
/// after the first quality marker are ignored.
fn title_and_year(text: &str) -> Option<ContentKey> {
    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || "._-()[]{}".contains(c))
        .filter(|t| !t.is_empty())
        .collect();

    let mut found: Option<(usize, u16)> = None;
    for (idx, token) in tokens.iter().enumerate() {
        if is_quality_marker(token) {
            break;
        }
        if token.len() == 4 {
            if let Ok(year) = token.parse::<u16>() {
                if (1900..=2099).contains(&year) && idx > 0 {
                    found = Some((idx, year));
                }
            }
        }
    }

    let (idx, year) = found?;
    let title = clean_title(&tokens[..idx].join(" "));
    if title.is_empty() {
        return None;
    }
    Some(ContentKey::Movie { title, year })
}

fn is_quality_marker(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    matches!(
        lower.as_str(),
        "2160p" | "1080p" | "1080i" | "720p" | "576p" | "480p" | "4k" | "uhd" | "bluray"
            | "remux" | "web" | "webrip" | "hdtv" | "x264" | "x265" | "hevc"
    )
}

fn detect_profile(
    path: &Path,
    stem: &str,
    key: Option<&ContentKey>,
    policy: ContentTypePolicy,
) -> LanguageProfile {
    match policy {
        ContentTypePolicy::Anime => return LanguageProfile::Anime,
        ContentTypePolicy::Series | ContentTypePolicy::Movie => return LanguageProfile::Standard,
        ContentTypePolicy::Auto => {}
    }
    let in_anime_dir = path
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .any(|c| c.eq_ignore_ascii_case("anime") || c.eq_ignore_ascii_case("animes"));
    if in_anime_dir || FANSUB_RE.is_match(stem) || matches!(key, Some(ContentKey::Absolute { .. }))
    {
        LanguageProfile::Anime
    } else {
        LanguageProfile::Standard
    }
}

fn first_hint(text: &str, hints: &[(&'static str, Regex)]) -> Option<String> {
    hints
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(name, _)| name.to_string())
}

pub fn parse_hints(stem: &str, is_anime: bool) -> NameHints {
    let resolution = RESOLUTION_RE
        .captures(stem)
        .and_then(|caps| caps.name("res"))
        .and_then(|m| m.as_str().parse().ok())
        .or_else(|| UHD_RE.is_match(stem).then_some(2160));

    let audio_hints = AUDIO_HINTS
        .iter()
        .filter(|(_, re)| re.is_match(stem))
        .map(|(name, _)| name.to_string())
        .collect();

    NameHints {
        resolution,
        source: first_hint(stem, &SOURCE_HINTS),
        video_codec: first_hint(stem, &CODEC_HINTS),
        audio_hints,
        audio_languages: language::audio_languages_from_name(stem, is_anime),
        subtitle_languages: language::subtitle_languages_from_name(stem),
        hdr: HDR_RE.is_match(stem),
        release_group: RELEASE_GROUP_RE
            .captures(stem)
            .and_then(|caps| caps.name("grp"))
            .map(|m| m.as_str().to_string()),
    }
}
