//! Semantic similarity backend.
//!
//! Nearest-neighbour search over symbol embeddings. The index is optional:
//! when nothing has been embedded it reports itself unavailable and the
//! resolver skips the semantic tier without counting it as a failure.

pub mod simple;

use async_trait::async_trait;

use crate::storage::BackendResult;
use crate::types::Symbol;

pub use simple::{Embedder, HashingEmbedder, MemorySemanticIndex};

#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Cheap capability check; false when no embeddings have been built.
    async fn is_available(&self) -> bool;

    /// Symbols most similar to `name`, best first, similarity in `-1.0..=1.0`.
    async fn search_similar(&self, name: &str, max_results: usize)
    -> BackendResult<Vec<(Symbol, f32)>>;
}

/// Similarity threshold recommendations based on testing
pub mod thresholds {
    /// Same concept, different wording
    pub const VERY_SIMILAR: f32 = 0.85;

    /// Related concepts; default for cross-language bridging
    pub const SIMILAR: f32 = 0.70;

    pub const RELATED: f32 = 0.50;

    pub const DEFAULT: f32 = SIMILAR;
}
