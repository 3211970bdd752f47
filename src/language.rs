use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

lazy_static! {
    static ref BRACKET_COMBO_RE: Regex = Regex::new(
        r"(?i)\[((?:DE|EN|JA|JP|GER|ENG|JPN|JAP)(?:\+(?:DE|EN|JA|JP|GER|ENG|JPN|JAP))*)\]"
    )
    .unwrap();
    static ref MULTI_GERMAN_RE: Regex = Regex::new(r"(?i)\bMulti[- .]?German\b").unwrap();
    static ref GERMAN_JAP_RE: Regex = Regex::new(r"(?i)\bGerman[- .]?(?:JAP|JPN)\b").unwrap();
    static ref GERMAN_DL_RE: Regex = Regex::new(r"(?i)\bGerman[ .]DL\b").unwrap();
    static ref DL_RE: Regex =
        Regex::new(r"(?i)\bDL\b|\bDual[- .]?(?:Audio|Language)?\b|\bMulti\b").unwrap();
    static ref JAPANESE_TOKEN_RE: Regex = Regex::new(r"(?i)\b(?:JA|JAP|JPN|Japanese)\b").unwrap();
    static ref ENGLISH_TOKEN_RE: Regex = Regex::new(r"(?i)\b(?:EN|ENG|English)\b").unwrap();
    static ref JAPANESE_GROUP_RE: Regex = Regex::new(
        r"(?i)-(?:Erai-raws|HorribleSubs|SubsPlease|Tsundere-Raws|Anime-Land|Ohys-Raws|NC-Raws|Judas|DDY)$"
    )
    .unwrap();
    static ref GERMAN_GROUP_RE: Regex =
        Regex::new(r"(?i)-(?:ABJ|GERTv|German-Anime|GerAnime|ANiME-RG|TVS|PL3X|TELEPOOL)$").unwrap();
    static ref GERMAN_SUB_RE: Regex = Regex::new(r"(?i)(?:german|ger|deu)[._-]?subs?").unwrap();
    static ref ENGLISH_SUB_RE: Regex = Regex::new(r"(?i)(?:english|eng)[._-]?subs?").unwrap();
    static ref JAPANESE_SUB_RE: Regex = Regex::new(r"(?i)(?:japanese|jpn|jap)[._-]?subs?").unwrap();
}

/// Normalizes a language code or name to its ISO 639-2 form.
/// Unknown codes are returned lower-cased.
pub fn normalize_code(code: &str) -> String {
    let code = code.trim().to_ascii_lowercase();
    let mapped = match code.as_str() {
        "en" | "english" | "eng" => "eng",
        "de" | "ger" | "german" | "deutsch" | "deu" => "deu",
        "ja" | "jp" | "jap" | "japanese" | "jpn" => "jpn",
        "fr" | "french" | "fra" | "fre" => "fra",
        "es" | "spanish" | "spa" => "spa",
        "it" | "italian" | "ita" => "ita",
        "pt" | "portuguese" | "por" => "por",
        "ru" | "russian" | "rus" => "rus",
        "zh" | "chinese" | "zho" | "chi" => "zho",
        "ko" | "korean" | "kor" => "kor",
        _ => return code,
    };
    mapped.to_string()
}

/// Audio languages a release name advertises.
pub fn audio_languages_from_name(stem: &str, is_anime: bool) -> BTreeSet<String> {
    let mut langs = BTreeSet::new();

    for caps in BRACKET_COMBO_RE.captures_iter(stem) {
        for code in caps[1].split('+') {
            langs.insert(normalize_code(code));
        }
    }

    if MULTI_GERMAN_RE.is_match(stem) {
        langs.insert("deu".to_string());
        if is_anime {
            if JAPANESE_TOKEN_RE.is_match(stem) {
                langs.insert("jpn".to_string());
            }
        } else if ENGLISH_TOKEN_RE.is_match(stem) {
            langs.insert("eng".to_string());
        }
    }

    if GERMAN_JAP_RE.is_match(stem) {
        langs.insert("deu".to_string());
        langs.insert("jpn".to_string());
    }

    if GERMAN_DL_RE.is_match(stem) {
        langs.insert("deu".to_string());
        if is_anime || JAPANESE_TOKEN_RE.is_match(stem) {
            langs.insert("jpn".to_string());
        } else {
            langs.insert("eng".to_string());
        }
    }

    if langs.is_empty() && JAPANESE_GROUP_RE.is_match(stem) {
        langs.insert("jpn".to_string());
    }
    if GERMAN_GROUP_RE.is_match(stem) {
        langs.insert("deu".to_string());
    }

    if langs.is_empty() {
        for token in stem.split(|c: char| !c.is_ascii_alphanumeric()) {
            match token.to_ascii_uppercase().as_str() {
                "GERMAN" | "DEU" | "GER" => {
                    langs.insert("deu".to_string());
                }
                "ENGLISH" | "ENG" => {
                    langs.insert("eng".to_string());
                }
                "JAPANESE" | "JPN" | "JAP" => {
                    langs.insert("jpn".to_string());
                }
                "FRENCH" | "VFF" | "TRUEFRENCH" => {
                    langs.insert("fra".to_string());
                }
                _ => {}
            }
        }
    }

    // "German DL" style dual releases only name the first language.
    if langs.len() == 1 && langs.contains("deu") && DL_RE.is_match(stem) {
        langs.insert(if is_anime { "jpn" } else { "eng" }.to_string());
    }

    langs
}

pub fn subtitle_languages_from_name(stem: &str) -> BTreeSet<String> {
    let mut subs = BTreeSet::new();
    if GERMAN_SUB_RE.is_match(stem) {
        subs.insert("deu".to_string());
    }
    if ENGLISH_SUB_RE.is_match(stem) {
        subs.insert("eng".to_string());
    }
    if JAPANESE_SUB_RE.is_match(stem) {
        subs.insert("jpn".to_string());
    }
    subs
}
