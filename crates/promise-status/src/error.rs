//! Error types for promise-status

use thiserror::Error;

/// Misuse of a tracker or its configuration.
///
/// A rejected operation is never reported here; it is `Phase::Rejected` data.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid delay: {field} must be non-negative, got {value}ms")]
    InvalidDelay { field: &'static str, value: i64 },

    #[error("Tracker has been disposed")]
    Disposed,

    #[error("Tracker was already disposed")]
    AlreadyDisposed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid delay error
    pub fn invalid_delay(field: &'static str, value: i64) -> Self {
        Error::InvalidDelay { field, value }
    }
}
