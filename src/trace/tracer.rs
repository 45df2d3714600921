use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::naming::naming_variants;
use super::{
    CallPathNode, CallPathResult, MatchKind, TraceDirection, TraceOptions, Tracer, is_entry_point,
};
use crate::cache::typed::{get_typed, set_typed};
use crate::cache::{CacheCoordinator, SetOptions};
use crate::config::TraceConfig;
use crate::error::{CodeSearchError, CodeSearchResult};
use crate::resolver::fuzzy::simple_name;
use crate::semantic::SemanticIndex;
use crate::storage::{ExactMatchStore, FullTextIndex, FullTextQuery, SearchField};
use crate::types::{Reference, Symbol, SymbolRef};
use crate::utils::{ensure_active, run_cancellable};
use crate::{debug_event, log_event};

const NAMING_VARIANT_CONFIDENCE: f32 = 0.9;
const ROOT_LOOKUP_HITS: usize = 10;

/// One step of a walk: the symbol being expanded and its language when known.
#[derive(Debug, Clone)]
struct Frontier {
    symbol: SymbolRef,
    language: Option<String>,
}

impl Frontier {
    fn from_symbol(symbol: &Symbol) -> Self {
        Self {
            symbol: symbol.symbol_ref(),
            language: Some(symbol.language.clone()),
        }
    }

    fn crosses_language(&self, other: &str) -> bool {
        self.language.as_deref().is_some_and(|own| own != other)
    }
}

/// Which way edges are followed on a single walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Up,
    Down,
}

struct WalkContext<'a> {
    cancel: &'a CancellationToken,
    max_depth: u32,
    walk: Walk,
    semantic: Option<&'a dyn SemanticIndex>,
    /// Symbols whose subtree was already produced on this walk
    expanded: Mutex<HashSet<String>>,
}

type NodesFuture<'a> = Pin<Box<dyn Future<Output = CodeSearchResult<Vec<CallPathNode>>> + Send + 'a>>;

pub struct CallPathTracer {
    exact: Arc<dyn ExactMatchStore>,
    fulltext: Arc<dyn FullTextIndex>,
    semantic: Option<Arc<dyn SemanticIndex>>,
    cache: Arc<dyn CacheCoordinator>,
    config: TraceConfig,
}

impl CallPathTracer {
    pub fn new(
        exact: Arc<dyn ExactMatchStore>,
        fulltext: Arc<dyn FullTextIndex>,
        semantic: Option<Arc<dyn SemanticIndex>>,
        cache: Arc<dyn CacheCoordinator>,
        config: TraceConfig,
    ) -> Self {
        Self {
            exact,
            fulltext,
            semantic,
            cache,
            config,
        }
    }

    /// Locate the traced symbol. The boolean is true when the exact store knew it.
    async fn locate_root(
        &self,
        options: &TraceOptions,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<(Frontier, bool)> {
        let query = options.symbol.trim();
        let name = simple_name(query);
        let qualified = query.replace("::", ".");

        match run_cancellable(cancel, self.exact.find_by_name(name, options.case_sensitive)).await? {
            Ok(mut symbols) if !symbols.is_empty() => {
                symbols.sort_by(|a, b| (&a.file_path, a.line).cmp(&(&b.file_path, b.line)));
                let best = symbols
                    .iter()
                    .find(|s| s.symbol_ref().key().ends_with(&qualified))
                    .unwrap_or(&symbols[0]);
                return Ok((Frontier::from_symbol(best), true));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(target: "trace", "existence check for '{name}' failed: {e}"),
        }

        // Best effort: a declaration the full-text index knows under this name
        let lookup = FullTextQuery::new(name, SearchField::SymbolName).fuzzy(true);
        match run_cancellable(
            cancel,
            self.fulltext.search(&options.workspace, &lookup, ROOT_LOOKUP_HITS),
        )
        .await?
        {
            Ok(hits) => {
                for hit in &hits {
                    let (Some(path), Ok(Some(info))) = (hit.path(), hit.type_info()) else {
                        continue;
                    };
                    if let Some(symbol) = info
                        .symbols(path)
                        .into_iter()
                        .find(|s| s.name.eq_ignore_ascii_case(name))
                    {
                        return Ok((Frontier::from_symbol(&symbol), false));
                    }
                }
            }
            Err(e) => tracing::warn!(target: "trace", "full-text lookup for '{name}' failed: {e}"),
        }

        Ok((
            Frontier {
                symbol: SymbolRef::named(name),
                language: None,
            },
            false,
        ))
    }

    async fn direct_references(
        &self,
        ctx: &WalkContext<'_>,
        frontier: &Frontier,
        depth: u32,
    ) -> CodeSearchResult<Vec<Reference>> {
        let fetched = match ctx.walk {
            Walk::Up => run_cancellable(ctx.cancel, self.exact.find_references_to(&frontier.symbol)).await?,
            Walk::Down => {
                run_cancellable(ctx.cancel, self.exact.find_references_from(&frontier.symbol)).await?
            }
        };
        match fetched {
            Ok(mut references) => {
                references.sort_by(|a, b| (&a.file_path, a.line).cmp(&(&b.file_path, b.line)));
                Ok(references)
            }
            // Without the first level there is nothing to trace
            Err(e) if depth == 1 => Err(CodeSearchError::BackendUnavailable {
                operation: "trace".to_string(),
                reasons: vec![e.to_string()],
            }),
            Err(e) => {
                tracing::warn!(target: "trace", "references of '{}' unavailable: {e}", frontier.symbol);
                Ok(Vec::new())
            }
        }
    }

    /// Declarations of the frontier's name in other conventions and other languages.
    async fn naming_bridges(
        &self,
        ctx: &WalkContext<'_>,
        frontier: &Frontier,
    ) -> CodeSearchResult<Vec<Symbol>> {
        let mut bridged = Vec::new();
        for variant in naming_variants(&frontier.symbol.name) {
            match run_cancellable(ctx.cancel, self.exact.find_by_name(&variant, true)).await? {
                Ok(symbols) => bridged.extend(
                    symbols
                        .into_iter()
                        .filter(|s| frontier.crosses_language(&s.language)),
                ),
                Err(e) => tracing::debug!(target: "trace", "variant lookup '{variant}' failed: {e}"),
            }
        }
        Ok(bridged)
    }

    /// Similar symbols in other languages at or above the bridge threshold.
    async fn semantic_bridges(
        &self,
        ctx: &WalkContext<'_>,
        frontier: &Frontier,
    ) -> CodeSearchResult<Vec<(Symbol, f32)>> {
        let Some(semantic) = ctx.semantic else {
            return Ok(Vec::new());
        };
        let found = run_cancellable(
            ctx.cancel,
            semantic.search_similar(&frontier.symbol.name, self.config.semantic_bridge_candidates),
        )
        .await?;
        match found {
            Ok(similar) => Ok(similar
                .into_iter()
                .filter(|(symbol, score)| {
                    *score >= self.config.semantic_bridge_threshold
                        && frontier.crosses_language(&symbol.language)
                })
                .collect()),
            Err(e) => {
                tracing::warn!(target: "trace", "semantic bridging for '{}' failed: {e}", frontier.symbol);
                Ok(Vec::new())
            }
        }
    }

    fn node(
        ctx: &WalkContext<'_>,
        frontier: &Frontier,
        neighbor: &SymbolRef,
        depth: u32,
        match_kind: MatchKind,
        confidence: f32,
    ) -> CallPathNode {
        let identifier = neighbor.key();
        let (containing, target) = match ctx.walk {
            Walk::Up => (identifier.clone(), frontier.symbol.key()),
            Walk::Down => (frontier.symbol.key(), identifier.clone()),
        };
        CallPathNode {
            identifier,
            depth,
            containing_symbol: Some(containing),
            target_symbol: Some(target),
            is_semantic_match: match_kind == MatchKind::Semantic,
            confidence,
            file_path: String::new(),
            line: 0,
            language: String::new(),
            kind: None,
            match_kind,
            is_entry_point: false,
            children: Vec::new(),
        }
    }

    /// Nodes at `depth` below `frontier`, each carrying its own subtree.
    fn expand<'a>(
        &'a self,
        ctx: &'a WalkContext<'a>,
        frontier: Frontier,
        path: Vec<String>,
        depth: u32,
    ) -> NodesFuture<'a> {
        Box::pin(async move {
            if depth > ctx.max_depth {
                return Ok(Vec::new());
            }
            ensure_active(ctx.cancel)?;

            let mut path = path;
            path.push(frontier.symbol.key());

            let mut seen: HashSet<String> = HashSet::new();
            let mut pending: Vec<(CallPathNode, Frontier)> = Vec::new();

            for reference in self.direct_references(ctx, &frontier, depth).await? {
                let neighbor = match ctx.walk {
                    Walk::Up => reference.source.clone(),
                    Walk::Down => reference.target.clone(),
                };
                if !seen.insert(neighbor.key()) {
                    continue;
                }
                let mut node = Self::node(ctx, &frontier, &neighbor, depth, MatchKind::Direct, 1.0);
                node.file_path = reference.file_path.clone();
                node.line = reference.line;
                node.language = reference.language.clone();
                node.kind = Some(reference.kind);
                let next = Frontier {
                    symbol: neighbor,
                    language: Some(reference.language.clone()),
                };
                pending.push((node, next));
            }

            for symbol in self.naming_bridges(ctx, &frontier).await? {
                let neighbor = symbol.symbol_ref();
                if !seen.insert(neighbor.key()) {
                    continue;
                }
                let mut node = Self::node(
                    ctx,
                    &frontier,
                    &neighbor,
                    depth,
                    MatchKind::NamingVariant,
                    NAMING_VARIANT_CONFIDENCE,
                );
                node.file_path = symbol.file_path.clone();
                node.line = symbol.line;
                node.language = symbol.language.clone();
                pending.push((node, Frontier::from_symbol(&symbol)));
            }

            for (symbol, similarity) in self.semantic_bridges(ctx, &frontier).await? {
                let neighbor = symbol.symbol_ref();
                // Anything with a recorded or naming-convention link is already present
                if !seen.insert(neighbor.key()) {
                    continue;
                }
                let mut node = Self::node(ctx, &frontier, &neighbor, depth, MatchKind::Semantic, similarity);
                node.file_path = symbol.file_path.clone();
                node.line = symbol.line;
                node.language = symbol.language.clone();
                debug_event!("trace", "semantic bridge", "{} -> {} ({similarity:.2})", frontier.symbol, node.identifier);
                pending.push((node, Frontier::from_symbol(&symbol)));
            }

            let mut nodes = Vec::with_capacity(pending.len());
            for (mut node, next) in pending {
                node.is_entry_point = is_entry_point(&node.identifier, &node.file_path);
                // A symbol on this path closes a cycle; one expanded elsewhere is a leaf
                let expand = depth < ctx.max_depth
                    && !path.contains(&node.identifier)
                    && ctx.expanded.lock().insert(node.identifier.clone());
                if expand {
                    node.children = self.expand(ctx, next, path.clone(), depth + 1).await?;
                }
                nodes.push(node);
            }
            Ok(nodes)
        })
    }

    async fn walk(
        &self,
        root: &Frontier,
        walk: Walk,
        options: &TraceOptions,
        semantic: Option<&dyn SemanticIndex>,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<Vec<CallPathNode>> {
        let ctx = WalkContext {
            cancel,
            max_depth: options.max_depth,
            walk,
            semantic,
            expanded: Mutex::new(HashSet::from([root.symbol.key()])),
        };
        self.expand(&ctx, root.clone(), Vec::new(), 1).await
    }

    async fn ready_semantic(
        &self,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<Option<&dyn SemanticIndex>> {
        let Some(semantic) = self.semantic.as_deref() else {
            return Ok(None);
        };
        let available = run_cancellable(cancel, semantic.is_available()).await?;
        Ok(available.then_some(semantic))
    }
}

fn summarize(options: &TraceOptions, verified: bool, nodes: Vec<CallPathNode>) -> CallPathResult {
    let mut total_nodes = 0;
    let mut semantic_bridges = 0;
    let mut entry_points = BTreeSet::new();
    for root in &nodes {
        root.walk(&mut |node| {
            total_nodes += 1;
            if node.match_kind == MatchKind::Semantic {
                semantic_bridges += 1;
            }
            if node.is_entry_point {
                entry_points.insert(node.identifier.clone());
            }
        });
    }

    CallPathResult {
        symbol: options.symbol.trim().to_string(),
        direction: options.direction,
        max_depth: options.max_depth,
        verified,
        nodes,
        total_nodes,
        semantic_bridges,
        entry_points: entry_points.into_iter().collect(),
    }
}

#[async_trait]
impl Tracer for CallPathTracer {
    async fn trace(
        &self,
        options: &TraceOptions,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<CallPathResult> {
        options.validate(self.config.max_depth)?;
        ensure_active(cancel)?;

        let key = options.cache_key();
        if !options.no_cache {
            let cached: Option<CallPathResult> =
                run_cancellable(cancel, get_typed(self.cache.as_ref(), &key)).await?;
            if let Some(cached) = cached {
                return Ok(cached);
            }
        }

        let (root, verified) = self.locate_root(options, cancel).await?;
        if verified {
            debug_event!("trace", "verified", "'{}' found in symbol store", root.symbol);
        } else {
            log_event!("trace", "fuzzy", "'{}' not found exactly, tracing best effort", options.symbol);
        }

        let semantic = self.ready_semantic(cancel).await?;
        let nodes = match options.direction {
            TraceDirection::Up => self.walk(&root, Walk::Up, options, semantic, cancel).await?,
            TraceDirection::Down => self.walk(&root, Walk::Down, options, semantic, cancel).await?,
            TraceDirection::Both => {
                let mut nodes = self.walk(&root, Walk::Up, options, semantic, cancel).await?;
                nodes.extend(self.walk(&root, Walk::Down, options, semantic, cancel).await?);
                nodes
            }
        };

        let result = summarize(options, verified, nodes);
        tracing::debug!(
            target: "trace",
            "'{}' {}: {} node(s), {} semantic bridge(s)",
            result.symbol,
            result.direction,
            result.total_nodes,
            result.semantic_bridges
        );

        run_cancellable(cancel, set_typed(self.cache.as_ref(), &key, &result, SetOptions::default())).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{NoopCache, TwoLevelCache};
    use crate::semantic::MemorySemanticIndex;
    use crate::storage::{MemoryFullTextIndex, MemorySymbolStore};
    use crate::types::SymbolKind;

    fn tracer(
        store: Arc<MemorySymbolStore>,
        semantic: Option<Arc<dyn SemanticIndex>>,
        cache: Arc<dyn CacheCoordinator>,
    ) -> CallPathTracer {
        CallPathTracer::new(
            store,
            Arc::new(MemoryFullTextIndex::new()),
            semantic,
            cache,
            TraceConfig::default(),
        )
    }

    fn function(name: &str, file: &str, language: &str) -> Symbol {
        Symbol::new(name, SymbolKind::Function, file, 1, language)
    }

    /// `c3 -> c2 -> c1 -> target`
    fn caller_chain() -> Arc<MemorySymbolStore> {
        let store = Arc::new(MemorySymbolStore::new());
        store.add_symbol(function("target", "src/target.rs", "rust"));
        store.add_call("c1", "target", "src/c1.rs", "rust");
        store.add_call("c2", "c1", "src/c2.rs", "rust");
        store.add_call("c3", "c2", "src/c3.rs", "rust");
        store
    }

    #[tokio::test]
    async fn test_up_trace_respects_depth() {
        let tracer = tracer(caller_chain(), None, Arc::new(NoopCache));
        let options = TraceOptions::new("target", "ws").max_depth(2);

        let result = tracer.trace(&options, &CancellationToken::new()).await.unwrap();

        assert!(result.verified);
        assert_eq!(result.nodes.len(), 1);
        let c1 = &result.nodes[0];
        assert_eq!(c1.identifier, "c1");
        assert_eq!(c1.depth, 1);
        assert_eq!(c1.target_symbol.as_deref(), Some("target"));
        assert_eq!(c1.children.len(), 1);
        assert_eq!(c1.children[0].identifier, "c2");
        assert!(c1.children[0].children.is_empty());
        assert_eq!(result.total_nodes, 2);
    }

    #[tokio::test]
    async fn test_down_trace_and_both() {
        let store = caller_chain();
        store.add_call("target", "helper", "src/target.rs", "rust");
        let tracer = tracer(store, None, Arc::new(NoopCache));

        let down = tracer
            .trace(
                &TraceOptions::new("target", "ws").direction(TraceDirection::Down),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(down.nodes.len(), 1);
        assert_eq!(down.nodes[0].identifier, "helper");
        assert_eq!(down.nodes[0].containing_symbol.as_deref(), Some("target"));

        let both = tracer
            .trace(
                &TraceOptions::new("target", "ws").direction(TraceDirection::Both).max_depth(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = both.nodes.iter().map(|n| n.identifier.as_str()).collect();
        assert_eq!(ids, vec!["c1", "helper"]);
    }

    #[tokio::test]
    async fn test_recursion_terminates() {
        let store = Arc::new(MemorySymbolStore::new());
        store.add_symbol(function("ping", "src/net.rs", "rust"));
        store.add_call("ping", "pong", "src/net.rs", "rust");
        store.add_call("pong", "ping", "src/net.rs", "rust");
        let tracer = tracer(store, None, Arc::new(NoopCache));

        let result = tracer
            .trace(
                &TraceOptions::new("ping", "ws").direction(TraceDirection::Down).max_depth(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // ping -> pong -> ping (not expanded)
        assert_eq!(result.total_nodes, 2);
        assert_eq!(result.nodes[0].children[0].identifier, "ping");
        assert!(result.nodes[0].children[0].children.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_traced_best_effort() {
        let store = Arc::new(MemorySymbolStore::new());
        store.add_call("caller", "ghost", "src/a.rs", "rust");
        let tracer = tracer(store, None, Arc::new(NoopCache));

        let result = tracer
            .trace(&TraceOptions::new("ghost", "ws"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.verified);
        assert_eq!(result.nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_naming_variant_bridges_languages() {
        let store = Arc::new(MemorySymbolStore::new());
        store.add_symbol(function("getUserData", "web/api.ts", "typescript"));
        store.add_symbol(function("get_user_data", "service/users.py", "python"));
        // Same language, different convention: not a bridge
        store.add_symbol(function("GetUserData", "web/legacy.ts", "typescript"));
        let tracer = tracer(store, None, Arc::new(NoopCache));

        let result = tracer
            .trace(
                &TraceOptions::new("getUserData", "ws").direction(TraceDirection::Down).max_depth(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.nodes.len(), 1);
        let node = &result.nodes[0];
        assert_eq!(node.identifier, "get_user_data");
        assert_eq!(node.match_kind, MatchKind::NamingVariant);
        assert_eq!(node.confidence, NAMING_VARIANT_CONFIDENCE);
        assert_eq!(node.language, "python");
        assert!(!node.is_semantic_match);
    }

    #[tokio::test]
    async fn test_semantic_bridge_threshold() {
        let store = Arc::new(MemorySymbolStore::new());
        store.add_symbol(function("fetchProfile", "web/profile.ts", "typescript"));
        let semantic: Arc<dyn SemanticIndex> = Arc::new(MemorySemanticIndex::with_fixed_results(vec![
            (function("load_profile", "svc/profile.py", "python"), 0.82),
            (function("load_avatar", "svc/avatar.py", "python"), 0.55),
            (function("fetchProfileCached", "web/cache.ts", "typescript"), 0.95),
        ]));
        let tracer = tracer(store, Some(semantic), Arc::new(NoopCache));

        let result = tracer
            .trace(
                &TraceOptions::new("fetchProfile", "ws").max_depth(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.semantic_bridges, 1);
        let node = &result.nodes[0];
        assert_eq!(node.identifier, "load_profile");
        assert!(node.is_semantic_match);
        assert_eq!(node.confidence, 0.82);
    }

    #[tokio::test]
    async fn test_entry_points_are_flagged() {
        let store = Arc::new(MemorySymbolStore::new());
        store.add_symbol(function("save", "src/repo.rs", "rust"));
        store.add_call("OrderController", "save", "src/controllers/order.rs", "rust");
        let tracer = tracer(store, None, Arc::new(NoopCache));

        let result = tracer
            .trace(&TraceOptions::new("save", "ws"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.nodes[0].is_entry_point);
        assert_eq!(result.entry_points, vec!["OrderController"]);
    }

    #[tokio::test]
    async fn test_first_level_failure_is_unavailable() {
        let store = caller_chain();
        let tracer = tracer(store.clone(), None, Arc::new(NoopCache));
        store.fail_with("store offline");

        let err = tracer
            .trace(&TraceOptions::new("target", "ws"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CodeSearchError::BackendUnavailable { .. }));
    }

    /// Never reports availability.
    struct StalledSemantic;

    #[async_trait]
    impl SemanticIndex for StalledSemantic {
        async fn is_available(&self) -> bool {
            std::future::pending().await
        }

        async fn search_similar(
            &self,
            _name: &str,
            _max_results: usize,
        ) -> crate::storage::BackendResult<Vec<(Symbol, f32)>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_cancel_while_checking_semantic_availability() {
        let tracer = tracer(caller_chain(), Some(Arc::new(StalledSemantic)), Arc::new(NoopCache));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            tracer.trace(&TraceOptions::new("target", "ws"), &cancel),
        )
        .await
        .expect("cancellation ends the trace");
        assert!(matches!(outcome, Err(CodeSearchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_results_are_cached() {
        let store = caller_chain();
        let cache: Arc<dyn CacheCoordinator> = Arc::new(TwoLevelCache::in_memory(100, None));
        let tracer = tracer(store.clone(), None, cache);
        let options = TraceOptions::new("target", "ws");

        let first = tracer.trace(&options, &CancellationToken::new()).await.unwrap();
        let calls = store.calls().total();
        let second = tracer.trace(&options, &CancellationToken::new()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.calls().total(), calls);

        tracer
            .trace(&options.clone().no_cache(true), &CancellationToken::new())
            .await
            .unwrap();
        assert!(store.calls().total() > calls);
    }
}
