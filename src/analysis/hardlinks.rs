use crate::model::{FileId, InodeKey, MediaFile};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// An arr-managed file that is also seeding from a separate copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingHardlink {
    pub file: FileId,
    pub path: String,
    pub size: u64,
    pub instance: String,
    pub torrent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardlinkSet {
    pub inode: InodeKey,
    pub nlink: u64,
    pub size: u64,
    pub members: Vec<FileId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WasteReport {
    pub missing_hardlinks: Vec<MissingHardlink>,
    pub wasted_bytes: u64,
    pub seeding: Vec<FileId>,
    /// Seeding with no arr instance claiming the file.
    pub orphaned_seeding: Vec<FileId>,
    /// Inodes reached through more than one scanned path.
    pub hardlink_sets: Vec<HardlinkSet>,
}

/// Cross-source storage duplication. Independent of identity groups.
pub fn analyze_waste(files: &[MediaFile]) -> WasteReport {
    let mut report = WasteReport::default();
    let mut by_inode: BTreeMap<InodeKey, Vec<FileId>> = BTreeMap::new();

    for file in files {
        by_inode.entry(file.inode_key()).or_default().push(file.id);

        let Some(seeding) = &file.protection.seeding else {
            continue;
        };
        report.seeding.push(file.id);
        match &file.protection.arr {
            None => report.orphaned_seeding.push(file.id),
            Some(arr) if file.nlink == 1 => {
                report.wasted_bytes += file.size;
                report.missing_hardlinks.push(MissingHardlink {
                    file: file.id,
                    path: file.path_str(),
                    size: file.size,
                    instance: arr.instance.clone(),
                    torrent: seeding.torrent.clone(),
                });
            }
            Some(_) => {}
        }
    }

    report.hardlink_sets = by_inode
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(inode, members)| {
            let first = &files[members[0]];
            HardlinkSet {
                inode,
                nlink: first.nlink,
                size: first.size,
                members,
            }
        })
        .collect();

    info!(
        "Waste: {} missing hardlinks ({} bytes), {} seeding, {} orphaned, {} hardlink sets",
        report.missing_hardlinks.len(),
        report.wasted_bytes,
        report.seeding.len(),
        report.orphaned_seeding.len(),
        report.hardlink_sets.len()
    );
    report
}

/// Unraid exposes the same disks as `/mnt/user`, `/mnt/diskN` and
/// `/mnt/cache`. Hardlinks never span those views.
pub fn path_view_warnings(roots: &[String]) -> Vec<String> {
    let has = |pred: &dyn Fn(&str) -> bool| roots.iter().any(|r| pred(r.as_str()));
    let is_disk = |r: &str| {
        r.strip_prefix("/mnt/disk")
            .map(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            .unwrap_or(false)
    };
    let has_user = has(&|r| r.starts_with("/mnt/user"));
    let mut warnings = Vec::new();
    if has_user && has(&is_disk) {
        warnings.push("roots mix /mnt/user and /mnt/diskN paths; hardlinks may not be detected".to_string());
    }
    if has_user && has(&|r| r.starts_with("/mnt/cache")) {
        warnings.push("roots mix /mnt/user and /mnt/cache paths; hardlinks may not be detected".to_string());
    }
    warnings
}
