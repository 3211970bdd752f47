pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod language;
pub mod mapping;
pub mod model;
pub mod platform;
pub mod progress;
pub mod protection;
pub mod scanner;
pub mod scoring;

pub use config::AppConfig;
pub use engine::{AuditEngine, AuditReport, Diagnostics, RunLock};
pub use error::Error;
pub use progress::{CancelToken, ProgressReporter, SilentReporter};
