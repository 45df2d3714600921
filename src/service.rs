//! Operation surface consumed by transports.
//!
//! `CodeSearchService` wires the resolver, analyzer, tracer and cache together
//! from explicitly injected backends and wraps every outcome in an
//! [`Envelope`]. Nothing here panics or returns a bare error: failures become
//! error envelopes carrying a code and recovery steps.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::{
    CacheCoordinator, CacheError, CacheHealth, CacheStatistics, InvalidationStrategy, NoopCache,
    TwoLevelCache,
};
use crate::config::{CacheConfig, Settings};
use crate::error::{CodeSearchError, CodeSearchResult};
use crate::graph::{AnalyzeOptions, DependencyGraphAnalyzer, GraphAnalysisResult, GraphAnalyzer};
use crate::io::insights;
use crate::io::{EntityType, Envelope};
use crate::log_event;
use crate::resolver::{ResolveOptions, Resolver, TieredSymbolResolver};
use crate::semantic::SemanticIndex;
use crate::storage::{ExactMatchStore, FullTextIndex};
use crate::trace::{CallPathResult, CallPathTracer, TraceOptions, Tracer};
use crate::types::ResolutionResult;

/// Administrative cache operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum CacheOperation {
    Statistics,
    Clear,
    /// Resolve each symbol so later lookups hit the cache
    Warm {
        workspace: String,
        symbols: Vec<String>,
    },
    Invalidate {
        #[serde(default)]
        keys: Option<Vec<String>>,
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        strategy: InvalidationStrategy,
    },
    Health,
    Config,
}

impl CacheOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Statistics => "statistics",
            Self::Clear => "clear",
            Self::Warm { .. } => "warm",
            Self::Invalidate { .. } => "invalidate",
            Self::Health => "health",
            Self::Config => "config",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum CacheManageResult {
    Statistics { statistics: CacheStatistics },
    Clear { removed: usize },
    Warm { warmed: usize, failed: Vec<String> },
    Invalidate { invalidated: usize, strategy: InvalidationStrategy },
    Health { health: CacheHealth },
    Config { config: CacheConfig },
}

pub struct CodeSearchService {
    settings: Settings,
    resolver: Arc<TieredSymbolResolver>,
    analyzer: DependencyGraphAnalyzer,
    tracer: CallPathTracer,
    cache: Arc<dyn CacheCoordinator>,
}

impl CodeSearchService {
    pub fn new(
        settings: Settings,
        store: Arc<dyn ExactMatchStore>,
        fulltext: Arc<dyn FullTextIndex>,
        semantic: Option<Arc<dyn SemanticIndex>>,
        cache: Arc<dyn CacheCoordinator>,
    ) -> Self {
        let resolver = Arc::new(TieredSymbolResolver::new(
            Arc::clone(&store),
            Arc::clone(&fulltext),
            semantic.clone(),
            Arc::clone(&cache),
            settings.resolution.clone(),
        ));
        let analyzer = DependencyGraphAnalyzer::new(
            resolver.clone(),
            Arc::clone(&store),
            Arc::clone(&fulltext),
            Arc::clone(&cache),
            settings.graph.clone(),
        );
        let tracer = CallPathTracer::new(
            store,
            fulltext,
            semantic,
            Arc::clone(&cache),
            settings.trace.clone(),
        );

        Self {
            settings,
            resolver,
            analyzer,
            tracer,
            cache,
        }
    }

    /// Like [`new`](Self::new), with the cache built from `settings.cache`.
    pub async fn open(
        settings: Settings,
        store: Arc<dyn ExactMatchStore>,
        fulltext: Arc<dyn FullTextIndex>,
        semantic: Option<Arc<dyn SemanticIndex>>,
    ) -> CodeSearchResult<Self> {
        let cache: Arc<dyn CacheCoordinator> =
            match TwoLevelCache::from_config(&settings.cache, settings.cache_dir()).await {
                Ok(cache) => Arc::new(cache),
                Err(CacheError::Disabled) => Arc::new(NoopCache),
                Err(e) => return Err(e.into()),
            };
        Ok(Self::new(settings, store, fulltext, semantic, cache))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<dyn CacheCoordinator> {
        &self.cache
    }

    pub async fn resolve_symbol(
        &self,
        symbol: &str,
        options: &ResolveOptions,
        cancel: &CancellationToken,
    ) -> Envelope<ResolutionResult> {
        let started = Instant::now();
        match self.resolver.resolve(symbol, options, cancel).await {
            Ok(result) => {
                let hint = insights::resolution_hint(&result);
                let count = result.candidates.len();
                let truncated = result.total_count > count;
                let envelope = if result.is_empty() {
                    Envelope::not_found(format!("Symbol '{}' not found", symbol.trim()))
                        .with_data(result)
                } else {
                    let insights = insights::resolution_insights(&result);
                    Envelope::success(result)
                        .with_message(format!("Found {count} candidate(s)"))
                        .with_insights(insights)
                };
                let envelope = envelope
                    .with_entity_type(EntityType::Symbol)
                    .with_query(symbol.trim())
                    .with_count(count)
                    .with_truncated(truncated)
                    .with_duration_ms(started.elapsed().as_millis() as u64);
                match hint {
                    Some(hint) => envelope.with_hint(hint),
                    None => envelope,
                }
            }
            Err(e) => failure(&e, symbol, started),
        }
    }

    pub async fn analyze_dependencies(
        &self,
        options: &AnalyzeOptions,
        cancel: &CancellationToken,
    ) -> Envelope<GraphAnalysisResult> {
        let started = Instant::now();
        match self.analyzer.analyze(options, cancel).await {
            Ok(result) => {
                let hint = insights::graph_hint(&result);
                let count = result.graph.nodes.len();
                let envelope = if result.found {
                    let insights = insights::graph_insights(&result);
                    Envelope::success(result)
                        .with_message(format!("Dependency graph with {count} node(s)"))
                        .with_insights(insights)
                } else {
                    Envelope::not_found(format!("Symbol '{}' not found", options.symbol.trim()))
                        .with_data(result)
                };
                let envelope = envelope
                    .with_entity_type(EntityType::DependencyGraph)
                    .with_query(options.symbol.trim())
                    .with_count(count)
                    .with_depth(options.max_depth)
                    .with_duration_ms(started.elapsed().as_millis() as u64);
                match hint {
                    Some(hint) => envelope.with_hint(hint),
                    None => envelope,
                }
            }
            Err(e) => failure(&e, &options.symbol, started),
        }
    }

    pub async fn trace_call_path(
        &self,
        options: &TraceOptions,
        cancel: &CancellationToken,
    ) -> Envelope<CallPathResult> {
        let started = Instant::now();
        match self.tracer.trace(options, cancel).await {
            Ok(result) => {
                let hint = insights::trace_hint(&result);
                let insights = insights::trace_insights(&result);
                let count = result.total_nodes;
                let envelope = if result.is_empty() {
                    Envelope::not_found(format!("No call paths found for '{}'", options.symbol.trim()))
                        .with_data(result)
                } else {
                    Envelope::success(result).with_message(format!("Traced {count} node(s)"))
                };
                let envelope = envelope
                    .with_insights(insights)
                    .with_entity_type(EntityType::CallTree)
                    .with_query(options.symbol.trim())
                    .with_count(count)
                    .with_depth(options.max_depth)
                    .with_duration_ms(started.elapsed().as_millis() as u64);
                match hint {
                    Some(hint) => envelope.with_hint(hint),
                    None => envelope,
                }
            }
            Err(e) => failure(&e, &options.symbol, started),
        }
    }

    pub async fn cache_manage(
        &self,
        operation: CacheOperation,
        cancel: &CancellationToken,
    ) -> Envelope<CacheManageResult> {
        let started = Instant::now();
        let name = operation.name();
        match self.run_cache_operation(operation, cancel).await {
            Ok(result) => {
                let (entity, message) = match &result {
                    CacheManageResult::Statistics { statistics } => (
                        EntityType::CacheStatistics,
                        format!("Hit ratio {:.2}", statistics.hit_ratio),
                    ),
                    CacheManageResult::Health { health } => (
                        EntityType::CacheHealth,
                        format!("Cache health {}/100", health.score),
                    ),
                    CacheManageResult::Clear { removed } => {
                        (EntityType::CacheOperation, format!("Removed {removed} entr(ies)"))
                    }
                    CacheManageResult::Warm { warmed, failed } => (
                        EntityType::CacheOperation,
                        format!("Warmed {warmed} symbol(s), {} failed", failed.len()),
                    ),
                    CacheManageResult::Invalidate { invalidated, strategy } => (
                        EntityType::CacheOperation,
                        format!("Invalidated {invalidated} entr(ies) ({strategy:?})"),
                    ),
                    CacheManageResult::Config { .. } => {
                        (EntityType::CacheOperation, "Current cache configuration".to_string())
                    }
                };
                let insights = match &result {
                    CacheManageResult::Health { health } => health.issues.clone(),
                    _ => Vec::new(),
                };
                Envelope::success(result)
                    .with_message(message)
                    .with_insights(insights)
                    .with_entity_type(entity)
                    .with_query(name)
                    .with_duration_ms(started.elapsed().as_millis() as u64)
            }
            Err(e) => failure(&e, name, started),
        }
    }

    async fn run_cache_operation(
        &self,
        operation: CacheOperation,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<CacheManageResult> {
        match operation {
            CacheOperation::Statistics => Ok(CacheManageResult::Statistics {
                statistics: self.cache.statistics().await,
            }),
            CacheOperation::Health => Ok(CacheManageResult::Health {
                health: self.cache.health().await,
            }),
            CacheOperation::Config => Ok(CacheManageResult::Config {
                config: self.settings.cache.clone(),
            }),
            CacheOperation::Clear => {
                let removed = self.cache.clear().await?;
                log_event!("cache", "cleared", "{removed} entries");
                Ok(CacheManageResult::Clear { removed })
            }
            CacheOperation::Warm { workspace, symbols } => {
                let options = ResolveOptions::new(workspace)
                    .max_results(self.settings.resolution.default_max_results);
                let mut warmed = 0;
                let mut failed = Vec::new();
                for symbol in symbols {
                    match self.resolver.resolve(&symbol, &options, cancel).await {
                        Ok(_) => warmed += 1,
                        Err(CodeSearchError::Cancelled) => return Err(CodeSearchError::Cancelled),
                        Err(e) => {
                            tracing::warn!(target: "cache", "warming '{symbol}' failed: {e}");
                            failed.push(symbol);
                        }
                    }
                }
                Ok(CacheManageResult::Warm { warmed, failed })
            }
            CacheOperation::Invalidate {
                keys,
                pattern,
                strategy,
            } => {
                if keys.as_ref().is_none_or(|k| k.is_empty()) && pattern.is_none() {
                    return Err(CodeSearchError::invalid(
                        "operation",
                        "invalidate needs keys or a pattern",
                    ));
                }
                let mut invalidated = 0;
                if let Some(keys) = keys {
                    invalidated += self.cache.invalidate(&keys, strategy).await?;
                }
                if let Some(pattern) = pattern {
                    invalidated += self.cache.invalidate_by_pattern(&pattern, strategy).await?;
                }
                Ok(CacheManageResult::Invalidate {
                    invalidated,
                    strategy,
                })
            }
        }
    }
}

fn failure<T>(err: &CodeSearchError, query: &str, started: Instant) -> Envelope<T> {
    tracing::debug!("{query}: {err}");
    Envelope::from_error(err)
        .with_query(query.trim())
        .with_duration_ms(started.elapsed().as_millis() as u64)
}
