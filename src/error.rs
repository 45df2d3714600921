//! Error taxonomy exposed to callers of the resolution engine.
//!
//! Only total failures surface here. A single backend failing is logged and
//! absorbed by the component that called it, and "symbol not found" is an
//! empty result rather than an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;

#[derive(Error, Debug)]
pub enum CodeSearchError {
    #[error("All backends failed during {operation}: {}", .reasons.join("; "))]
    BackendUnavailable {
        operation: String,
        reasons: Vec<String>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid argument '{field}': {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CodeSearchResult<T> = Result<T, CodeSearchError>;

/// Machine-readable error codes carried in response envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Ok,
    NotFound,
    BackendUnavailable,
    Cancelled,
    InvalidArgument,
    CacheError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotFound => "NOT_FOUND",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::Cancelled => "CANCELLED",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::CacheError => "CACHE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl CodeSearchError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::Cache(_) => ErrorCode::CacheError,
            Self::Serialization(_) | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Short, actionable steps shown to the caller alongside the error code.
    pub fn recovery_steps(&self) -> Vec<String> {
        let steps: &[&str] = match self {
            Self::BackendUnavailable { .. } => &[
                "Ensure the workspace is indexed",
                "Check that the symbol store and full-text index are reachable",
                "Retry once indexing has finished",
            ],
            Self::Cancelled => &["Retry the request", "Reduce depth or max_results to finish sooner"],
            Self::InvalidArgument { field, .. } => match *field {
                "max_depth" | "depth" => &["Use a depth between 1 and the configured maximum"],
                "direction" => &["Use one of: up, down, both (trace) or incoming, outgoing, both (dependencies)"],
                "workspace" => &["Pass the path of an indexed workspace"],
                _ => &["Check the request parameters"],
            },
            Self::Cache(_) => &["Run cache_manage with operation=clear", "Retry with no_cache=true"],
            Self::Serialization(_) | Self::Internal(_) => &["Retry the request", "Check server logs for details"],
        };
        steps.iter().map(|s| s.to_string()).collect()
    }
}

impl From<tokio::task::JoinError> for CodeSearchError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Internal(format!("background task failed: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_unavailable_message_lists_reasons() {
        let err = CodeSearchError::BackendUnavailable {
            operation: "resolve".to_string(),
            reasons: vec!["exact: offline".to_string(), "fulltext: locked".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "All backends failed during resolve: exact: offline; fulltext: locked"
        );
        assert_eq!(err.code(), ErrorCode::BackendUnavailable);
        assert!(!err.recovery_steps().is_empty());
    }

    #[test]
    fn test_cancelled_is_distinct_from_unavailable() {
        let err = CodeSearchError::Cancelled;
        assert_eq!(err.code(), ErrorCode::Cancelled);
        assert_eq!(err.code().as_str(), "CANCELLED");
    }

    #[test]
    fn test_invalid_argument_steps_depend_on_field() {
        let depth = CodeSearchError::invalid("max_depth", "must be at least 1");
        assert!(depth.recovery_steps()[0].contains("depth"));

        let workspace = CodeSearchError::invalid("workspace", "empty");
        assert!(workspace.recovery_steps()[0].contains("indexed workspace"));
    }
}
