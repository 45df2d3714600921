//! Cache-specific errors.
//!
//! None of these are fatal to a request: read failures degrade to a miss and
//! write failures are logged.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache entry could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid invalidation pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Cache is disabled")]
    Disabled,
}

pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    pub fn invalid_pattern(pattern: &str, err: glob::PatternError) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.msg.to_string(),
        }
    }
}
