//! Error taxonomy (spec §7). Each kind is a real type so call sites can match
//! on it; `CoreError` aggregates the ones that cross component boundaries.

use thiserror::Error;

/// Fatal at startup: missing or invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("missing required secret: {0}")]
    MissingSecret(&'static str),
    #[error("failed to read config overlay file {path}: {source}")]
    OverlayIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config overlay file {path}: {source}")]
    OverlayParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Store-level failures. `NotFound` is routinely recovered by the caller;
/// the others are expected to surface.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store integrity error: {0}")]
    Integrity(String),
    #[error("store I/O error: {0}")]
    Io(String),
    #[error("store conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(e.to_string()),
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(e.to_string())
            }
            _ => StoreError::Integrity(e.to_string()),
        }
    }
}

/// Embedder-level failures (spec §4.3). Only `Transient` is retried.
#[derive(Debug, Error, Clone)]
pub enum EmbedError {
    #[error("transient embedding error: {0}")]
    Transient(String),
    #[error("fatal embedding error: {0}")]
    Fatal(String),
    #[error("embedder circuit is open")]
    CircuitOpen,
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimMismatch { expected: usize, got: usize },
}

/// Invalid inputs (bad agent id, oversized payload, malformed filter, …).
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid agent id: {0}")]
    InvalidAgentId(String),
    #[error("payload too large: {0} bytes (max {1})")]
    PayloadTooLarge(usize, usize),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Top-level aggregate used by components (e.g. `Lifecycle`) that can
/// surface more than one error kind from a single call.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Errors specific to the recall path, which alone carries the deadline
/// semantics of spec §5 "Cancellation".
#[derive(Debug, Error)]
pub enum RecallError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("recall deadline exceeded")]
    Timeout,
}

impl From<StoreError> for RecallError {
    fn from(e: StoreError) -> Self {
        RecallError::Core(CoreError::Store(e))
    }
}

impl From<ValidationError> for RecallError {
    fn from(e: ValidationError) -> Self {
        RecallError::Core(CoreError::Validation(e))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
