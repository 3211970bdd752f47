use crate::mapping::PathMapper;
use crate::model::{ArrMatch, FileId, MediaFile, QueueMatch, SeedingMatch};
use crate::platform;
use crate::protection::sources::{ProtectionRecord, SourceBatch, SourceKind};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use tracing::{debug, info, warn};

/// A record whose mapped path is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedRecord {
    pub source: String,
    pub path: String,
    pub mapped: bool,
}

/// Link count at match time differed from the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NlinkMismatch {
    pub path: String,
    pub scan_nlink: u64,
    pub match_nlink: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProtectionSummary {
    pub arr_matched: usize,
    pub seeding_matched: usize,
    pub queued_matched: usize,
    pub inactive_torrents: usize,
    /// Records that passed through without any mapping, per source.
    pub unmapped: HashMap<String, usize>,
    pub unmatched: Vec<UnmatchedRecord>,
    pub nlink_mismatches: Vec<NlinkMismatch>,
}

/// Merges external records into the catalog's protection flags by exact
/// path equality after mapping.
pub struct ProtectionResolver<'a> {
    mapper: &'a PathMapper,
    /// Several files share a key when matching ignores case.
    index: HashMap<String, Vec<FileId>>,
}

impl<'a> ProtectionResolver<'a> {
    pub fn new(mapper: &'a PathMapper, files: &[MediaFile]) -> Self {
        let mut index: HashMap<String, Vec<FileId>> = HashMap::new();
        for file in files {
            index.entry(mapper.match_key(&file.path_str())).or_default().push(file.id);
        }
        for ids in index.values().filter(|ids| ids.len() > 1) {
            let paths: Vec<String> = ids.iter().map(|&id| files[id].path_str()).collect();
            warn!("Paths differ only in case, records match all of them: {:?}", paths);
        }
        Self { mapper, index }
    }

    fn lookup(&self, source: &str, external: &str, summary: &mut ProtectionSummary) -> Result<&[FileId], UnmatchedRecord> {
        let mapped = self.mapper.map(source, external);
        if !mapped.is_mapped() {
            debug!("[{}] no mapping applied to {}", source, external);
            *summary.unmapped.entry(source.to_string()).or_default() += 1;
        }
        let was_mapped = mapped.is_mapped();
        let local = mapped.into_path();
        match self.index.get(&self.mapper.match_key(&local)) {
            Some(ids) => Ok(ids.as_slice()),
            None => Err(UnmatchedRecord {
                source: source.to_string(),
                path: local,
                mapped: was_mapped,
            }),
        }
    }

    /// Batches are applied in order; the first arr, seeding or queue match
    /// for a file is the one retained.
    pub fn resolve(&self, files: &mut [MediaFile], batches: &[SourceBatch]) -> ProtectionSummary {
        let mut summary = ProtectionSummary::default();

        for batch in batches {
            for record in &batch.records {
                match (batch.kind, record) {
                    (
                        SourceKind::Arr,
                        ProtectionRecord::Managed {
                            path,
                            custom_format_score,
                            cutoff_met,
                        },
                    ) => match self.lookup(&batch.source, path, &mut summary) {
                        Ok(ids) => {
                            for &id in ids {
                                let file = &mut files[id];
                                if file.protection.arr.is_none() {
                                    file.protection.arr = Some(ArrMatch {
                                        instance: batch.source.clone(),
                                        custom_format_score: *custom_format_score,
                                        cutoff_met: *cutoff_met,
                                    });
                                    summary.arr_matched += 1;
                                }
                            }
                        }
                        Err(unmatched) => summary.unmatched.push(unmatched),
                    },
                    (SourceKind::Arr, ProtectionRecord::Queued { path, status, title }) => {
                        match self.lookup(&batch.source, path, &mut summary) {
                            Ok(ids) => {
                                for &id in ids {
                                    let file = &mut files[id];
                                    if file.protection.queued.is_none() {
                                        debug!("{} is in the {} queue ({})", file.path.display(), batch.source, status);
                                        file.protection.queued = Some(QueueMatch {
                                            instance: batch.source.clone(),
                                            status: status.clone(),
                                            title: title.clone(),
                                        });
                                        summary.queued_matched += 1;
                                    }
                                }
                            }
                            Err(unmatched) => summary.unmatched.push(unmatched),
                        }
                    }
                    (
                        SourceKind::Torrent,
                        ProtectionRecord::Seeding {
                            content_path,
                            torrent,
                            active,
                            ..
                        },
                    ) => {
                        if !active {
                            summary.inactive_torrents += 1;
                            continue;
                        }
                        match self.lookup(&batch.source, content_path, &mut summary) {
                            Ok(ids) => {
                                for &id in ids {
                                    let file = &mut files[id];
                                    if file.protection.seeding.is_some() {
                                        continue;
                                    }
                                    let match_nlink = current_nlink(file);
                                    if match_nlink != file.nlink {
                                        warn!(
                                            "Link count of {} changed since scan ({} -> {})",
                                            file.path.display(),
                                            file.nlink,
                                            match_nlink
                                        );
                                        summary.nlink_mismatches.push(NlinkMismatch {
                                            path: file.path_str(),
                                            scan_nlink: file.nlink,
                                            match_nlink,
                                        });
                                    }
                                    file.protection.seeding = Some(SeedingMatch {
                                        client: batch.source.clone(),
                                        torrent: torrent.clone(),
                                        nlink_at_match: match_nlink,
                                    });
                                    summary.seeding_matched += 1;
                                }
                            }
                            Err(unmatched) => summary.unmatched.push(unmatched),
                        }
                    }
                    (kind, record) => {
                        warn!("[{}] ignoring {:?} from a {} source", batch.source, record, kind);
                    }
                }
            }
        }

        info!(
            "Protection: {} arr-managed, {} seeding, {} queued, {} unmatched records",
            summary.arr_matched,
            summary.seeding_matched,
            summary.queued_matched,
            summary.unmatched.len()
        );
        summary
    }
}

/// Falls back to the scan value when the file cannot be re-read.
fn current_nlink(file: &MediaFile) -> u64 {
    match fs::symlink_metadata(&file.path) {
        Ok(metadata) => platform::file_identity(&file.path, &metadata).nlink,
        Err(err) => {
            debug!("Cannot re-read {}: {}", file.path.display(), err);
            file.nlink
        }
    }
}
