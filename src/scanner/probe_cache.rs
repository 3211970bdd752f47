use crate::error::Error;
use crate::model::{MediaAttributes, MediaFile};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheEntry {
    size: u64,
    mtime: i64,
    device: u64,
    inode: u64,
    attributes: MediaAttributes,
}

impl CacheEntry {
    fn is_valid_for(&self, file: &MediaFile) -> bool {
        self.size == file.size
            && self.mtime == file.modified
            && self.device == file.device
            && self.inode == file.inode
    }
}

/// Probe results keyed by path. An entry is only reused while size, mtime
/// and inode still match.
#[derive(Debug, Default)]
pub struct ProbeCache {
    entries: DashMap<String, CacheEntry>,
    dirty: AtomicBool,
}

impl ProbeCache {
    /// A missing file yields an empty cache; a corrupt one is discarded.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        let stored: BTreeMap<String, CacheEntry> = match serde_json::from_str(&text) {
            Ok(stored) => stored,
            Err(err) => {
                warn!("Discarding unreadable probe cache {}: {}", path.display(), err);
                return Ok(Self::default());
            }
        };
        debug!("Loaded {} probe cache entries from {}", stored.len(), path.display());
        Ok(Self {
            entries: stored.into_iter().collect(),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn get(&self, file: &MediaFile) -> Option<MediaAttributes> {
        let entry = self.entries.get(&file.path_str())?;
        if entry.is_valid_for(file) {
            Some(entry.attributes.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, file: &MediaFile, attributes: MediaAttributes) {
        self.entries.insert(
            file.path_str(),
            CacheEntry {
                size: file.size,
                mtime: file.modified,
                device: file.device,
                inode: file.inode,
                attributes,
            },
        );
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes through a temp file and rename. No-op when nothing changed.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if !self.dirty.load(Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let sorted: BTreeMap<String, CacheEntry> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&sorted)?)?;
        fs::rename(&tmp, path)?;
        self.dirty.store(false, Ordering::Relaxed);
        info!("Saved {} probe cache entries to {}", sorted.len(), path.display());
        Ok(())
    }

    /// Removes the cache file. Returns whether one existed.
    pub fn clear(path: &Path) -> Result<bool, Error> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
