use std::fs::Metadata;
use std::path::Path;

/// Device, inode and link count of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
    pub nlink: u64,
}

#[cfg(unix)]
pub fn file_identity(_path: &Path, metadata: &Metadata) -> FileIdentity {
    use std::os::unix::fs::MetadataExt;
    FileIdentity {
        device: metadata.dev(),
        inode: metadata.ino(),
        nlink: metadata.nlink(),
    }
}

/// Without inode numbers every path is its own hardlink set.
#[cfg(not(unix))]
pub fn file_identity(path: &Path, _metadata: &Metadata) -> FileIdentity {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    FileIdentity {
        device: 0,
        inode: hasher.finish(),
        nlink: 1,
    }
}

pub fn modified_secs(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
