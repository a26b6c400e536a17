use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchlistError {
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WatchlistError {
    /// Every error is scoped to the single operation that raised it.
    pub fn is_recoverable(&self) -> bool {
        true
    }

    /// Collapse backend-specific failures into `RemoteUnavailable`.
    ///
    /// Domain errors (`NotFound`, `PermissionDenied`, ...) pass through.
    pub fn into_remote(self) -> Self {
        match self {
            WatchlistError::Database(e) => WatchlistError::RemoteUnavailable(e.to_string()),
            WatchlistError::Io(e) => WatchlistError::RemoteUnavailable(e.to_string()),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchlistError>;
