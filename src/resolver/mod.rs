//! Tiered symbol resolution.
//!
//! Tier 1 asks the exact-match store. Any hit there is authoritative and is
//! returned without touching the other backends. On a miss the full-text
//! tier and the semantic tier run concurrently, their candidates are merged
//! by `(file_path, name)` and ranked.
//!
//! A failing tier is logged and contributes nothing. Only when every tier
//! that was attempted failed does the call fail with `BackendUnavailable`.
//! There is no per-tier timeout; the cancellation token bounds the call.

pub mod fuzzy;
pub mod merge;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cache::typed::{get_typed, set_typed};
use crate::cache::{CacheCoordinator, SetOptions};
use crate::config::ResolutionConfig;
use crate::error::{CodeSearchError, CodeSearchResult};
use crate::semantic::SemanticIndex;
use crate::storage::{ExactMatchStore, FullTextIndex, FullTextQuery, Hit, SearchField, fields};
use crate::types::{
    OriginTier, ResolutionResult, Symbol, SymbolCandidate, SymbolKind, TierCounts,
};
use crate::utils::{ensure_active, run_cancellable};

use fuzzy::{NameMatcher, select_field, simple_name};
use merge::{merge_candidates, rank_candidates};

/// Resolves a symbol name to ranked candidate declarations.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(
        &self,
        name: &str,
        options: &ResolveOptions,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<ResolutionResult>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveOptions {
    pub workspace: String,
    #[serde(default)]
    pub symbol_type: Option<SymbolKind>,
    #[serde(default)]
    pub case_sensitive: bool,
    pub max_results: usize,
    #[serde(default)]
    pub include_references: bool,
    /// Skip the cache read; the fresh result is still cached
    #[serde(default)]
    pub no_cache: bool,
}

impl ResolveOptions {
    pub fn new(workspace: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            symbol_type: None,
            case_sensitive: false,
            max_results: 50,
            include_references: false,
            no_cache: false,
        }
    }

    pub fn symbol_type(mut self, kind: Option<SymbolKind>) -> Self {
        self.symbol_type = kind;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn include_references(mut self, include: bool) -> Self {
        self.include_references = include;
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn validate(&self, name: &str) -> CodeSearchResult<()> {
        if name.trim().is_empty() {
            return Err(CodeSearchError::invalid("symbol", "symbol name must not be empty"));
        }
        if self.workspace.trim().is_empty() {
            return Err(CodeSearchError::invalid("workspace", "workspace must not be empty"));
        }
        if self.max_results == 0 {
            return Err(CodeSearchError::invalid("max_results", "must be at least 1"));
        }
        Ok(())
    }

    /// `resolve:{workspace}:{name}:{kind|*}:{cs}:{max}:{refs}`
    pub fn cache_key(&self, name: &str) -> String {
        let name = if self.case_sensitive {
            name.trim().to_string()
        } else {
            name.trim().to_lowercase()
        };
        let kind = self.symbol_type.map_or("*", |k| k.as_str());
        format!(
            "resolve:{}:{}:{}:{}:{}:{}",
            self.workspace, name, kind, self.case_sensitive, self.max_results, self.include_references
        )
    }
}

/// Outcome of one tier; a skip is not a failure.
#[derive(Debug)]
enum TierOutcome {
    Candidates(Vec<SymbolCandidate>),
    Skipped,
    Failed(String),
}

impl TierOutcome {
    fn into_candidates(self) -> Vec<SymbolCandidate> {
        match self {
            Self::Candidates(candidates) => candidates,
            Self::Skipped | Self::Failed(_) => Vec::new(),
        }
    }
}

pub struct TieredSymbolResolver {
    exact: Arc<dyn ExactMatchStore>,
    fulltext: Arc<dyn FullTextIndex>,
    semantic: Option<Arc<dyn SemanticIndex>>,
    cache: Arc<dyn CacheCoordinator>,
    config: ResolutionConfig,
}

impl TieredSymbolResolver {
    pub fn new(
        exact: Arc<dyn ExactMatchStore>,
        fulltext: Arc<dyn FullTextIndex>,
        semantic: Option<Arc<dyn SemanticIndex>>,
        cache: Arc<dyn CacheCoordinator>,
        config: ResolutionConfig,
    ) -> Self {
        Self {
            exact,
            fulltext,
            semantic,
            cache,
            config,
        }
    }

    fn matches_kind(kind: SymbolKind, wanted: Option<SymbolKind>) -> bool {
        wanted.is_none_or(|wanted| wanted == kind)
    }

    /// Qualified queries (`App.UserService`, `users::load`) must match the
    /// symbol's namespace/containing type suffix.
    fn matches_qualifier(symbol: &Symbol, query: &str, case_sensitive: bool) -> bool {
        let query = query.trim().replace("::", ".");
        if !query.contains('.') {
            return true;
        }
        let key = symbol.symbol_ref().key();
        if case_sensitive {
            key == query || key.ends_with(&format!(".{query}"))
        } else {
            let key = key.to_lowercase();
            let query = query.to_lowercase();
            key == query || key.ends_with(&format!(".{query}"))
        }
    }

    fn exact_result(
        &self,
        name: &str,
        options: &ResolveOptions,
        mut symbols: Vec<Symbol>,
    ) -> (Vec<SymbolCandidate>, usize) {
        symbols.retain(|s| Self::matches_kind(s.kind, options.symbol_type));

        // Popularity first
        symbols.sort_by(|a, b| {
            b.reference_count
                .cmp(&a.reference_count)
                .then_with(|| a.file_path.cmp(&b.file_path))
                .then_with(|| a.line.cmp(&b.line))
        });
        // Overloads share a candidate; the most referenced one stands for all
        let mut seen = HashSet::new();
        symbols.retain(|s| seen.insert((s.file_path.clone(), s.name.clone())));
        let total = symbols.len();
        symbols.truncate(options.max_results);

        tracing::debug!(target: "resolver", "'{name}': {total} exact match(es), skipping fuzzy tiers");
        let candidates = symbols
            .into_iter()
            .map(|s| SymbolCandidate::from_symbol(s, 1.0, OriginTier::Exact))
            .collect();
        (candidates, total)
    }

    /// Map one hit's declarations to candidates.
    fn candidates_from_hit(
        hit: &Hit,
        top_score: f32,
        field: SearchField,
        matcher: &mut NameMatcher,
        kind: Option<SymbolKind>,
    ) -> Vec<SymbolCandidate> {
        let Some(path) = hit.path() else {
            return Vec::new();
        };
        let mut info = match hit.type_info() {
            Ok(Some(info)) => info,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::debug!(target: "resolver", "undecodable type_info in {path}: {e}");
                return Vec::new();
            }
        };
        if info.language.is_empty() {
            if let Some(language) = hit.field(fields::LANGUAGE) {
                info.language = language.to_string();
            }
        }

        let hit_score = if top_score > 0.0 {
            (hit.score / top_score).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let symbols = info.symbols(path);
        let mut candidates: Vec<SymbolCandidate> = symbols
            .iter()
            .filter(|s| Self::matches_kind(s.kind, kind))
            .filter_map(|s| {
                matcher.score(&s.name).map(|name_score| {
                    SymbolCandidate::from_symbol(
                        s.clone(),
                        0.5 * hit_score + 0.5 * name_score,
                        OriginTier::Fulltext,
                    )
                })
            })
            .collect();

        // Prose queries rarely match a declaration name; attribute the hit to
        // the document's primary type instead
        if candidates.is_empty() && field == SearchField::Content {
            if let Some(primary) = symbols
                .into_iter()
                .find(|s| s.kind.is_type() && Self::matches_kind(s.kind, kind))
            {
                candidates.push(SymbolCandidate::from_symbol(
                    primary,
                    0.5 * hit_score,
                    OriginTier::Fulltext,
                ));
            }
        }

        candidates
    }

    async fn fulltext_tier(&self, name: &str, options: &ResolveOptions) -> TierOutcome {
        let field = select_field(name);
        let query = FullTextQuery::new(name.trim(), field)
            .with_kind_hint(options.symbol_type)
            .fuzzy(field == SearchField::SymbolName);

        let hits = match self
            .fulltext
            .search(&options.workspace, &query, options.max_results.saturating_mul(2))
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(target: "resolver", "full-text tier failed for '{name}': {e}");
                return TierOutcome::Failed(format!("fulltext: {e}"));
            }
        };

        let top_score = hits.iter().map(|h| h.score).fold(0.0f32, f32::max);
        let mut matcher = NameMatcher::new(simple_name(name));
        let candidates: Vec<SymbolCandidate> = hits
            .iter()
            .flat_map(|hit| {
                Self::candidates_from_hit(hit, top_score, field, &mut matcher, options.symbol_type)
            })
            .collect();

        tracing::debug!(target: "resolver", "'{name}': {} hit(s) -> {} full-text candidate(s)", hits.len(), candidates.len());
        TierOutcome::Candidates(candidates)
    }

    async fn semantic_tier(&self, name: &str, options: &ResolveOptions) -> TierOutcome {
        if !self.config.semantic_enabled {
            return TierOutcome::Skipped;
        }
        let Some(semantic) = &self.semantic else {
            return TierOutcome::Skipped;
        };
        if !semantic.is_available().await {
            tracing::debug!(target: "resolver", "semantic index has no embeddings, skipping");
            return TierOutcome::Skipped;
        }

        let wanted = options
            .max_results
            .saturating_mul(self.config.semantic_candidate_multiplier.max(1));
        match semantic.search_similar(simple_name(name), wanted).await {
            Ok(similar) => TierOutcome::Candidates(
                similar
                    .into_iter()
                    .filter(|(symbol, similarity)| {
                        *similarity > 0.0 && Self::matches_kind(symbol.kind, options.symbol_type)
                    })
                    .map(|(symbol, similarity)| {
                        SymbolCandidate::from_symbol(symbol, similarity, OriginTier::Semantic)
                    })
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(target: "resolver", "semantic tier failed for '{name}': {e}");
                TierOutcome::Failed(format!("semantic: {e}"))
            }
        }
    }

    /// Best-effort reference counts; a failed count is `None`.
    async fn enrich(
        &self,
        candidates: Vec<SymbolCandidate>,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<Vec<SymbolCandidate>> {
        let mut tasks = JoinSet::new();
        for (index, candidate) in candidates.iter().enumerate() {
            let exact = Arc::clone(&self.exact);
            let name = candidate.name.clone();
            tasks.spawn(async move {
                let count = match exact.count_references_by_name(&name).await {
                    Ok(count) => Some(count),
                    Err(e) => {
                        tracing::debug!(target: "resolver", "reference count for '{name}' unavailable: {e}");
                        None
                    }
                };
                (index, count)
            });
        }

        let counts = run_cancellable(cancel, async move {
            let mut counts = vec![None; tasks.len()];
            while let Some(joined) = tasks.join_next().await {
                if let Ok((index, count)) = joined {
                    counts[index] = count;
                }
            }
            counts
        })
        .await?;

        Ok(candidates
            .iter()
            .zip(counts)
            .map(|(candidate, count)| candidate.with_reference_count(count))
            .collect())
    }

    async fn finish(
        &self,
        name: &str,
        options: &ResolveOptions,
        candidates: Vec<SymbolCandidate>,
        total_count: usize,
        started: Instant,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<ResolutionResult> {
        let candidates = if options.include_references && self.config.reference_enrichment {
            self.enrich(candidates, cancel).await?
        } else {
            candidates
        };

        let result = ResolutionResult {
            query: name.to_string(),
            tier_counts: TierCounts::tally(&candidates),
            candidates,
            total_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let key = options.cache_key(name);
        run_cancellable(
            cancel,
            set_typed(self.cache.as_ref(), &key, &result, SetOptions::default()),
        )
        .await?;
        Ok(result)
    }
}

#[async_trait]
impl Resolver for TieredSymbolResolver {
    async fn resolve(
        &self,
        name: &str,
        options: &ResolveOptions,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<ResolutionResult> {
        options.validate(name)?;
        ensure_active(cancel)?;
        let started = Instant::now();
        let name = name.trim();

        if !options.no_cache {
            let key = options.cache_key(name);
            let cached: Option<ResolutionResult> =
                run_cancellable(cancel, get_typed(self.cache.as_ref(), &key)).await?;
            if let Some(cached) = cached {
                return Ok(cached);
            }
        }

        let mut failures = Vec::new();

        // Tier 1
        let lookup = simple_name(name);
        match run_cancellable(cancel, self.exact.find_by_name(lookup, options.case_sensitive)).await? {
            Ok(mut symbols) => {
                symbols.retain(|s| Self::matches_qualifier(s, name, options.case_sensitive));
                if !symbols.is_empty() {
                    let (candidates, total) = self.exact_result(name, options, symbols);
                    return self
                        .finish(name, options, candidates, total, started, cancel)
                        .await;
                }
            }
            Err(e) => {
                tracing::warn!(target: "resolver", "exact tier failed for '{name}': {e}");
                failures.push(format!("exact: {e}"));
            }
        }

        // Tiers 2 and 3, concurrently
        let (fulltext, semantic) = run_cancellable(cancel, async {
            tokio::join!(
                self.fulltext_tier(name, options),
                self.semantic_tier(name, options)
            )
        })
        .await?;

        let exact_failed = !failures.is_empty();
        if let TierOutcome::Failed(reason) = &fulltext {
            failures.push(reason.clone());
        }
        let semantic_succeeded = matches!(semantic, TierOutcome::Candidates(_));
        if let TierOutcome::Failed(reason) = &semantic {
            failures.push(reason.clone());
        }
        let fulltext_failed = matches!(fulltext, TierOutcome::Failed(_));
        if exact_failed && fulltext_failed && !semantic_succeeded {
            return Err(CodeSearchError::BackendUnavailable {
                operation: format!("resolve '{name}'"),
                reasons: failures,
            });
        }

        let mut merged = merge_candidates(fulltext.into_candidates(), semantic.into_candidates());
        rank_candidates(&mut merged, name, options.case_sensitive);
        let total = merged.len();
        merged.truncate(options.max_results);

        self.finish(name, options, merged, total, started, cancel).await
    }
}
