use crate::config::ContentTypePolicy;
use crate::identity::parse::parse_path;
use crate::model::{ContentKey, FileId, MediaFile};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub type GroupId = usize;

/// Files believed to be the same episode or movie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityGroup {
    pub id: GroupId,
    pub key: ContentKey,
    pub members: Vec<FileId>,
}

impl IdentityGroup {
    pub fn is_duplicate(&self) -> bool {
        self.members.len() > 1
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Grouping {
    pub groups: Vec<IdentityGroup>,
    /// Files whose name yielded no content key. Kept in the catalog but
    /// never deduplicated.
    pub unclassified: Vec<FileId>,
}

impl Grouping {
    pub fn duplicates(&self) -> impl Iterator<Item = &IdentityGroup> {
        self.groups.iter().filter(|g| g.is_duplicate())
    }

    /// Members of every multi-member group, in id order.
    pub fn duplicate_members(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self
            .duplicates()
            .flat_map(|g| g.members.iter().copied())
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Fills in key, kind, profile and name hints for every file.
pub fn classify(files: &mut [MediaFile], policy: ContentTypePolicy) {
    for file in files.iter_mut() {
        let parsed = parse_path(&file.path, policy);
        file.key = parsed.key;
        file.kind = parsed.kind;
        file.profile = parsed.profile;
        file.hints = parsed.hints;
    }
}

/// Clusters files by exact key equality. Group ids follow key order, so the
/// same catalog always produces the same ids.
pub fn group_files(files: &[MediaFile]) -> Grouping {
    let mut by_key: BTreeMap<&ContentKey, Vec<FileId>> = BTreeMap::new();
    let mut unclassified = Vec::new();

    for file in files {
        match &file.key {
            Some(key) => by_key.entry(key).or_default().push(file.id),
            None => {
                debug!("Unclassified: {}", file.path.display());
                unclassified.push(file.id);
            }
        }
    }

    let groups: Vec<IdentityGroup> = by_key
        .into_iter()
        .enumerate()
        .map(|(id, (key, mut members))| {
            members.sort_unstable();
            IdentityGroup {
                id,
                key: key.clone(),
                members,
            }
        })
        .collect();

    let grouping = Grouping {
        groups,
        unclassified,
    };
    info!(
        "Grouped {} files into {} identities ({} with duplicates, {} unclassified)",
        files.len(),
        grouping.groups.len(),
        grouping.duplicates().count(),
        grouping.unclassified.len()
    );
    grouping
}
