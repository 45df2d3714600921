use tantivy::TantivyError;
use tantivy::directory::error::OpenDirectoryError;
use tantivy::query::QueryParserError;
use thiserror::Error;

/// Failures reported by a lookup backend.
///
/// Callers in the resolution layer log these and degrade; they never reach
/// the transport layer directly.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("{backend} query failed: {reason}")]
    Query {
        backend: &'static str,
        reason: String,
    },

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("Query parse error: {0}")]
    QueryParse(#[from] QueryParserError),

    #[error("Directory error: {0}")]
    Directory(#[from] OpenDirectoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No active batch. Call start_batch() first")]
    NoActiveBatch,

    #[error("Lock poisoned")]
    LockPoisoned,
}

impl BackendError {
    pub fn query(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Query {
            backend,
            reason: reason.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
