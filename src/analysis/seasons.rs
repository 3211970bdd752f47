use crate::mapping::is_lexically_under;
use crate::model::{ContentKey, MediaFile};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

lazy_static! {
    static ref SEASON_FOLDER_RE: Regex = Regex::new(r"(?i)^(?:season|staffel)[ ._]*(\d{1,3})$").unwrap();
}

/// One season of a show stored under differently spelled folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonConflict {
    pub series: String,
    pub season: u32,
    pub folders: Vec<String>,
    pub recommended: String,
}

pub fn season_conflicts(files: &[MediaFile], delete_scope: &str) -> Vec<SeasonConflict> {
    let mut seen: BTreeMap<(String, u32), BTreeSet<String>> = BTreeMap::new();

    for file in files {
        let series = match &file.key {
            Some(ContentKey::Episode { series, .. }) | Some(ContentKey::Absolute { series, .. }) => series,
            _ => continue,
        };
        if !is_lexically_under(&file.path_str(), delete_scope) {
            continue;
        }
        let folder = file
            .path
            .parent()
            .into_iter()
            .flat_map(|p| p.components())
            .filter_map(|c| c.as_os_str().to_str())
            .find_map(|name| {
                SEASON_FOLDER_RE
                    .captures(name)
                    .and_then(|caps| caps[1].parse::<u32>().ok())
                    .map(|n| (n, name.to_string()))
            });
        if let Some((season, name)) = folder {
            seen.entry((series.clone(), season)).or_default().insert(name);
        }
    }

    seen.into_iter()
        .filter(|(_, folders)| folders.len() > 1)
        .map(|((series, season), folders)| SeasonConflict {
            series,
            season,
            folders: folders.into_iter().collect(),
            recommended: format!("Season {:02}", season),
        })
        .collect()
}
