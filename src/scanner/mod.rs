pub mod probe;
pub mod probe_cache;
pub mod walk;

pub use probe::{probe_files, FfprobeProber, ProbeStats, Prober};
pub use probe_cache::ProbeCache;
pub use walk::{scan_roots, RootScan, ScanFilter, ScanOutcome, ScanStats};
