//! Error types for the matching engine.
//!
//! Only [`MatchError::CatalogUnavailable`] is fatal for a run. The other
//! matching-time kinds are recovered locally and surface as
//! [`Diagnostic`](crate::models::Diagnostic) values instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchError {
    /// Catalog snapshot empty or unreadable
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// A catalog record or requested track missing required fields
    #[error("Malformed entry: {0}")]
    MalformedEntry(String),

    /// Unexpected failure while scoring one candidate pair
    #[error("Scoring failure: {0}")]
    ScoringFailure(String),

    /// Normalization cache unreadable or inconsistent
    #[error("Normalization cache corrupted: {0}")]
    CacheCorruption(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Playlist file could not be interpreted
    #[error("Playlist error: {0}")]
    Playlist(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, MatchError>;
