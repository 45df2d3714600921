//! In-process semantic index over symbol name embeddings.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::SemanticIndex;
use crate::storage::{BackendError, BackendResult};
use crate::types::Symbol;
use crate::utils::split_words;

/// Turns text into a fixed-size vector. Model loading lives outside this crate.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> BackendResult<Vec<f32>>;
}

/// Feature-hashing embedder over identifier words and their character trigrams.
///
/// `get_user`, `getUser` and `GetUser` embed identically; names sharing
/// words land close together. Good enough for naming-level similarity.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        (hasher.finish() % self.dimensions as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> BackendResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in split_words(text) {
            vector[self.bucket(&word)] += 2.0;
            let chars: Vec<char> = format!("^{word}$").chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                vector[self.bucket(&trigram)] += 1.0;
            }
        }
        Ok(vector)
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

pub struct MemorySemanticIndex {
    embedder: Box<dyn Embedder>,
    embeddings: RwLock<Vec<(Symbol, Vec<f32>)>>,
    /// Scripted answers returned for every query, bypassing the embedder
    fixed: RwLock<Option<Vec<(Symbol, f32)>>>,
    failure: RwLock<Option<String>>,
    search_calls: AtomicUsize,
}

impl std::fmt::Debug for MemorySemanticIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySemanticIndex")
            .field("embeddings", &self.embeddings.read().len())
            .field("fixed", &self.fixed.read().is_some())
            .finish()
    }
}

impl MemorySemanticIndex {
    pub fn new(embedder: impl Embedder + 'static) -> Self {
        Self {
            embedder: Box::new(embedder),
            embeddings: RwLock::new(Vec::new()),
            fixed: RwLock::new(None),
            failure: RwLock::new(None),
            search_calls: AtomicUsize::new(0),
        }
    }

    /// An index with no embeddings; reports itself unavailable.
    pub fn empty() -> Self {
        Self::new(HashingEmbedder::default())
    }

    /// An index that answers every query with `results`.
    pub fn with_fixed_results(results: Vec<(Symbol, f32)>) -> Self {
        let index = Self::empty();
        *index.fixed.write() = Some(results);
        index
    }

    /// Embed the symbol's name and store it.
    pub fn index_symbol(&self, symbol: Symbol) -> BackendResult<()> {
        let embedding = self.embedder.embed(&symbol.name)?;
        if embedding.len() != self.embedder.dimensions() {
            return Err(BackendError::query(
                "semantic",
                format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.embedder.dimensions(),
                    embedding.len()
                ),
            ));
        }
        self.embeddings.write().push((symbol, embedding));
        Ok(())
    }

    pub fn embedding_count(&self) -> usize {
        self.embeddings.read().len()
    }

    pub fn clear(&self) {
        self.embeddings.write().clear();
    }

    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.write() = Some(reason.into());
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SemanticIndex for MemorySemanticIndex {
    async fn is_available(&self) -> bool {
        self.fixed.read().is_some() || !self.embeddings.read().is_empty()
    }

    async fn search_similar(
        &self,
        name: &str,
        max_results: usize,
    ) -> BackendResult<Vec<(Symbol, f32)>> {
        self.search_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(reason) = self.failure.read().as_ref() {
            return Err(BackendError::Unavailable(reason.clone()));
        }

        if let Some(fixed) = self.fixed.read().as_ref() {
            return Ok(fixed.iter().take(max_results).cloned().collect());
        }

        let query = self.embedder.embed(name)?;
        let embeddings = self.embeddings.read();
        let mut similarities: Vec<(Symbol, f32)> = embeddings
            .iter()
            .map(|(symbol, embedding)| (symbol.clone(), cosine_similarity(&query, embedding)))
            .collect();

        similarities.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| a.0.file_path.cmp(&b.0.file_path))
                .then_with(|| a.0.line.cmp(&b.0.line))
        });
        similarities.truncate(max_results);
        Ok(similarities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolKind;

    fn symbol(name: &str, file: &str, language: &str) -> Symbol {
        Symbol::new(name, SymbolKind::Function, file, 1, language)
    }

    #[test]
    fn test_cosine_similarity() {
        let v1 = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v1, &v1) - 1.0).abs() < 0.001);

        let v3 = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&v1, &v3).abs() < 0.001);

        let v4 = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v1, &v4) + 1.0).abs() < 0.001);

        assert_eq!(cosine_similarity(&v1, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_naming_conventions_embed_identically() {
        let embedder = HashingEmbedder::default();
        let snake = embedder.embed("get_user_profile").unwrap();
        let camel = embedder.embed("getUserProfile").unwrap();
        assert!((cosine_similarity(&snake, &camel) - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_empty_index_is_unavailable() {
        let index = MemorySemanticIndex::empty();
        assert!(!index.is_available().await);

        index
            .index_symbol(symbol("get_user", "api/users.py", "python"))
            .unwrap();
        assert!(index.is_available().await);
        assert_eq!(index.embedding_count(), 1);
    }

    #[tokio::test]
    async fn test_search_ranks_related_names_first() {
        let index = MemorySemanticIndex::empty();
        index
            .index_symbol(symbol("fetch_user_profile", "api/users.py", "python"))
            .unwrap();
        index
            .index_symbol(symbol("compute_tax_rate", "billing/tax.py", "python"))
            .unwrap();

        let results = index.search_similar("fetchUserProfile", 2).await.unwrap();
        assert_eq!(results[0].0.name, "fetch_user_profile");
        assert!(results[0].1 > 0.99);
        assert!(results[1].1 < 0.5);
        assert_eq!(index.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_fixed_results_and_failure() {
        let index = MemorySemanticIndex::with_fixed_results(vec![
            (symbol("A", "a.ts", "typescript"), 0.9),
            (symbol("B", "b.ts", "typescript"), 0.8),
        ]);
        assert!(index.is_available().await);
        assert_eq!(index.search_similar("x", 1).await.unwrap().len(), 1);

        index.fail_with("model offline");
        assert!(index.search_similar("x", 1).await.is_err());
    }
}
