//! Error taxonomy for the two real fallibility boundaries: source adapters
//! and the cache store. Everything above these boundaries (task wiring,
//! startup) uses `anyhow::Result` with `.context(...)`, matching main.rs.

use thiserror::Error;

/// Errors an adapter call can return. Never retried internally — retry
/// policy belongs to the collector loop that owns the schedule.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("rate limited: next call allowed in {0:?}")]
    RateLimited(std::time::Duration),

    #[error("failed to parse response: {0}")]
    ParseFailed(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("response failed validation: {0}")]
    InvalidData(String),
}

/// Errors surfaced by the cache store. Callers treat any of these as
/// "unable to persist" and fall back to their prior behavior.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    #[error("failed to encode payload: {0}")]
    EncodeFailed(#[from] serde_json::Error),
}

pub type SourceResult<T> = Result<T, SourceError>;
pub type StoreResult<T> = Result<T, StoreError>;
