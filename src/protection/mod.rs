pub mod resolver;
pub mod sources;

pub use resolver::{NlinkMismatch, ProtectionResolver, ProtectionSummary, UnmatchedRecord};
pub use sources::{
    sources_from_config, ArrSnapshotSource, FetchOutcome, PendingFetch, ProtectionRecord,
    ProtectionSource, SourceBatch, SourceFailure, SourceKind, StaticSource,
    TorrentSnapshotSource,
};
