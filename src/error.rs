use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid path mapping '{0}': {1}")]
    InvalidMapping(String, String),

    #[error("Invalid delete scope '{0}': {1}")]
    InvalidScope(String, String),

    #[error("Source '{0}' failed: {1}")]
    Source(String, String),

    #[error("Probe failed for {0}: {1}")]
    Probe(String, String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("An audit is already running (lock held at {0})")]
    AuditInProgress(String),

    #[error("Audit cancelled")]
    Cancelled,
}

impl Error {
    /// Errors that must stop a run before any scanning happens.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::InvalidConfig(_)
                | Error::InvalidMapping(..)
                | Error::InvalidScope(..)
        )
    }
}
