//! Concurrent depth-bounded traversal.
//!
//! Each call allocates one [`Traversal`] arena (visited set, cycle list, edge
//! map) that every branch shares through an `Arc`. Branches at one level run
//! on a `JoinSet` and are awaited together before the level completes. A
//! semaphore bounds how many backend fetches are in flight; permits are
//! released before children are awaited.

use async_trait::async_trait;
use dashmap::DashSet;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::metrics::compute_metrics;
use super::{
    AnalyzeOptions, CircularDependency, DependencyGraph, EdgeDirection, GraphAnalysisResult,
    GraphAnalyzer, GraphEdge, GraphNode,
};
use crate::cache::typed::{get_typed, set_typed};
use crate::cache::{CacheCoordinator, SetOptions};
use crate::config::GraphConfig;
use crate::error::{CodeSearchError, CodeSearchResult};
use crate::resolver::{ResolveOptions, Resolver};
use crate::storage::{ExactMatchStore, FullTextIndex, FullTextQuery, SearchField};
use crate::types::{Reference, ReferenceKind, SymbolRef};
use crate::utils::{ensure_active, infer_project, is_test_path, run_cancellable};

const TEXT_FALLBACK_LIMIT: usize = 50;

type EdgeKey = (String, String, EdgeDirection);

#[derive(Debug, Default)]
struct NodeInfo {
    name: String,
    file_path: Option<String>,
    files: BTreeSet<String>,
}

/// Shared state for one top-level `analyze` call.
struct Traversal {
    exact: Arc<dyn ExactMatchStore>,
    fulltext: Arc<dyn FullTextIndex>,
    options: AnalyzeOptions,
    root_key: String,
    root_file: Option<String>,
    cancel: CancellationToken,
    permits: Semaphore,
    visited: DashSet<(EdgeDirection, String)>,
    cycles: Mutex<Vec<CircularDependency>>,
    edges: Mutex<IndexMap<EdgeKey, GraphEdge>>,
    nodes: Mutex<BTreeMap<String, NodeInfo>>,
}

type VisitFuture = Pin<Box<dyn Future<Output = CodeSearchResult<()>> + Send>>;

impl Traversal {
    fn keep(&self, reference: &Reference) -> bool {
        (self.options.include_tests || !is_test_path(&reference.file_path))
            && (self.options.include_external || !reference.is_external)
    }

    fn note_node(&self, symbol: &SymbolRef, file: Option<&str>) {
        let mut nodes = self.nodes.lock();
        let info = nodes.entry(symbol.key()).or_insert_with(|| NodeInfo {
            name: symbol.name.clone(),
            ..NodeInfo::default()
        });
        if let Some(file) = file {
            if info.file_path.is_none() {
                info.file_path = Some(file.to_string());
            }
            info.files.insert(file.to_string());
        }
    }

    fn record_edge(&self, from: &SymbolRef, to: &SymbolRef, direction: EdgeDirection, reference: &Reference, depth: u32) {
        // The usage site lives in the dependent's body
        self.note_node(from, Some(&reference.file_path));
        self.note_node(to, None);

        let key = (from.key(), to.key(), direction);
        self.edges.lock().entry(key.clone()).or_insert_with(|| GraphEdge {
            from: key.0,
            to: key.1,
            direction,
            kind: reference.kind,
            file_path: reference.file_path.clone(),
            line: reference.line,
            depth,
        });
    }

    async fn fetch(&self, node: &SymbolRef, direction: EdgeDirection, is_root: bool) -> CodeSearchResult<Vec<Reference>> {
        let _permit = run_cancellable(&self.cancel, self.permits.acquire())
            .await?
            .map_err(|e| CodeSearchError::Internal(format!("traversal semaphore closed: {e}")))?;

        let fetched = match direction {
            EdgeDirection::Incoming => run_cancellable(&self.cancel, self.exact.find_references_to(node)).await?,
            EdgeDirection::Outgoing => run_cancellable(&self.cancel, self.exact.find_references_from(node)).await?,
        };

        let references = match fetched {
            Ok(references) => references,
            Err(e) => {
                tracing::warn!(target: "graph", "{} references of '{}' unavailable: {e}", direction.as_str(), node.key());
                Vec::new()
            }
        };

        if references.is_empty() && is_root && direction == EdgeDirection::Incoming {
            return self.text_fallback(node).await;
        }
        Ok(references)
    }

    /// Usages found only by full-text search, attributed to each file's primary type.
    async fn text_fallback(&self, node: &SymbolRef) -> CodeSearchResult<Vec<Reference>> {
        let query = FullTextQuery::new(node.name.clone(), SearchField::Content);
        let hits = match run_cancellable(
            &self.cancel,
            self.fulltext.search(&self.options.workspace, &query, TEXT_FALLBACK_LIMIT),
        )
        .await?
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(target: "graph", "text fallback for '{}' failed: {e}", node.name);
                return Ok(Vec::new());
            }
        };

        let mut references = Vec::new();
        for hit in hits {
            let Some(path) = hit.path() else { continue };
            if self.root_file.as_deref() == Some(path) {
                continue;
            }
            let info = hit.type_info().ok().flatten();
            let language = hit
                .field(crate::storage::fields::LANGUAGE)
                .unwrap_or_default()
                .to_string();
            let Some(owner) = info.as_ref().and_then(|i| i.primary_type()) else {
                continue;
            };
            if owner == node.name {
                continue;
            }
            let mut source = SymbolRef::named(owner);
            source.namespace = info.as_ref().and_then(|i| i.namespace.clone());
            references.push(Reference::new(
                source,
                node.clone(),
                ReferenceKind::TextReference,
                path,
                0,
                language,
            ));
        }
        tracing::debug!(target: "graph", "text fallback for '{}': {} reference(s)", node.name, references.len());
        Ok(references)
    }

    fn visit(
        self: Arc<Self>,
        node: SymbolRef,
        path: Vec<String>,
        remaining: u32,
        direction: EdgeDirection,
    ) -> VisitFuture {
        Box::pin(async move {
            let key = node.key();

            if path.contains(&key) {
                let mut cycle = path.clone();
                cycle.push(key);
                tracing::debug!(target: "graph", "cycle: {}", cycle.join(" -> "));
                self.cycles.lock().push(CircularDependency {
                    path: cycle,
                    direction,
                });
                return Ok(());
            }
            if remaining == 0 {
                return Ok(());
            }
            if !self.visited.insert((direction, key.clone())) {
                return Ok(());
            }

            let is_root = path.is_empty();
            let references = self.fetch(&node, direction, is_root).await?;
            let depth = path.len() as u32 + 1;

            let mut children: Vec<SymbolRef> = Vec::new();
            let mut seen = HashSet::new();
            for reference in references.iter().filter(|r| self.keep(r)) {
                let neighbor = match direction {
                    EdgeDirection::Incoming => reference.source.clone(),
                    EdgeDirection::Outgoing => reference.target.clone(),
                };
                match direction {
                    EdgeDirection::Incoming => self.record_edge(&neighbor, &node, direction, reference, depth),
                    EdgeDirection::Outgoing => self.record_edge(&node, &neighbor, direction, reference, depth),
                }
                if seen.insert(neighbor.key()) {
                    children.push(neighbor);
                }
            }

            let mut child_path = path;
            child_path.push(key);

            let mut tasks = JoinSet::new();
            for child in children {
                tasks.spawn(Arc::clone(&self).visit(child, child_path.clone(), remaining - 1, direction));
            }
            while let Some(joined) = tasks.join_next().await {
                joined??;
            }
            Ok(())
        })
    }

    fn into_result(self: Arc<Self>, started: Instant, config: &GraphConfig) -> GraphAnalysisResult {
        let mut edges: Vec<GraphEdge> = self.edges.lock().values().cloned().collect();
        edges.sort_by(|a, b| {
            (&a.from, &a.to, a.direction).cmp(&(&b.from, &b.to, b.direction))
        });

        let cycles: BTreeSet<CircularDependency> = self.cycles.lock().iter().cloned().collect();
        let cycles: Vec<CircularDependency> = cycles.into_iter().collect();

        let nodes: Vec<GraphNode> = self
            .nodes
            .lock()
            .iter()
            .map(|(id, info)| GraphNode {
                id: id.clone(),
                name: info.name.clone(),
                file_path: info.file_path.clone(),
                incoming_count: edges.iter().filter(|e| &e.to == id).count(),
                outgoing_count: edges.iter().filter(|e| &e.from == id).count(),
                projects: info
                    .files
                    .iter()
                    .map(|f| infer_project(f))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
                is_root: *id == self.root_key,
            })
            .collect();

        let metrics = compute_metrics(&self.root_key, &nodes, &edges, &cycles, config);

        GraphAnalysisResult {
            symbol: self.options.symbol.clone(),
            found: true,
            root: Some(self.root_key.clone()),
            direction: self.options.direction,
            max_depth: self.options.max_depth,
            graph: DependencyGraph { nodes, edges },
            circular_dependencies: cycles,
            metrics,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

pub struct DependencyGraphAnalyzer {
    resolver: Arc<dyn Resolver>,
    exact: Arc<dyn ExactMatchStore>,
    fulltext: Arc<dyn FullTextIndex>,
    cache: Arc<dyn CacheCoordinator>,
    config: GraphConfig,
}

impl DependencyGraphAnalyzer {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        exact: Arc<dyn ExactMatchStore>,
        fulltext: Arc<dyn FullTextIndex>,
        cache: Arc<dyn CacheCoordinator>,
        config: GraphConfig,
    ) -> Self {
        Self {
            resolver,
            exact,
            fulltext,
            cache,
            config,
        }
    }

    fn not_found(options: &AnalyzeOptions, started: Instant) -> GraphAnalysisResult {
        GraphAnalysisResult {
            symbol: options.symbol.clone(),
            found: false,
            root: None,
            direction: options.direction,
            max_depth: options.max_depth,
            graph: DependencyGraph::default(),
            circular_dependencies: Vec::new(),
            metrics: Default::default(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[async_trait]
impl GraphAnalyzer for DependencyGraphAnalyzer {
    async fn analyze(
        &self,
        options: &AnalyzeOptions,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<GraphAnalysisResult> {
        options.validate(self.config.max_depth)?;
        ensure_active(cancel)?;
        let started = Instant::now();

        let key = options.cache_key();
        let cached: Option<GraphAnalysisResult> =
            run_cancellable(cancel, get_typed(self.cache.as_ref(), &key)).await?;
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let resolved = self
            .resolver
            .resolve(
                options.symbol.trim(),
                &ResolveOptions::new(options.workspace.clone()).max_results(5),
                cancel,
            )
            .await?;
        let Some(root) = resolved.best() else {
            tracing::debug!(target: "graph", "'{}' did not resolve", options.symbol);
            return Ok(Self::not_found(options, started));
        };

        let root_ref = root.symbol_ref();
        let traversal = Arc::new(Traversal {
            exact: Arc::clone(&self.exact),
            fulltext: Arc::clone(&self.fulltext),
            options: options.clone(),
            root_key: root_ref.key(),
            root_file: Some(root.file_path.clone()),
            cancel: cancel.clone(),
            permits: Semaphore::new(self.config.max_concurrency.max(1)),
            visited: DashSet::new(),
            cycles: Mutex::new(Vec::new()),
            edges: Mutex::new(IndexMap::new()),
            nodes: Mutex::new(BTreeMap::new()),
        });
        traversal.note_node(&root_ref, Some(&root.file_path));

        let mut walks = JoinSet::new();
        for direction in options.direction.edge_directions() {
            walks.spawn(Arc::clone(&traversal).visit(
                root_ref.clone(),
                Vec::new(),
                options.max_depth,
                *direction,
            ));
        }
        while let Some(joined) = walks.join_next().await {
            joined??;
        }

        let result = traversal.into_result(started, &self.config);
        tracing::debug!(
            target: "graph",
            "'{}': {} node(s), {} edge(s), {} cycle(s) in {}ms",
            options.symbol,
            result.graph.nodes.len(),
            result.graph.edges.len(),
            result.circular_dependencies.len(),
            result.elapsed_ms
        );

        run_cancellable(cancel, set_typed(self.cache.as_ref(), &key, &result, SetOptions::default())).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopCache;
    use crate::config::ResolutionConfig;
    use crate::graph::Direction;
    use crate::resolver::TieredSymbolResolver;
    use crate::storage::{MemoryFullTextIndex, MemorySymbolStore};
    use crate::types::{Symbol, SymbolKind};

    fn analyzer(store: Arc<MemorySymbolStore>, fulltext: Arc<MemoryFullTextIndex>) -> DependencyGraphAnalyzer {
        let cache: Arc<dyn CacheCoordinator> = Arc::new(NoopCache);
        let resolver = Arc::new(TieredSymbolResolver::new(
            store.clone(),
            fulltext.clone(),
            None,
            cache.clone(),
            ResolutionConfig::default(),
        ));
        DependencyGraphAnalyzer::new(resolver, store, fulltext, cache, GraphConfig::default())
    }

    fn declare(store: &MemorySymbolStore, name: &str) {
        store.add_symbol(Symbol::new(name, SymbolKind::Function, format!("src/{name}.rs"), 1, "rust"));
    }

    #[tokio::test]
    async fn test_unresolved_symbol_is_not_found() {
        let store = Arc::new(MemorySymbolStore::new());
        let analyzer = analyzer(store, Arc::new(MemoryFullTextIndex::new()));

        let result = analyzer
            .analyze(&AnalyzeOptions::new("Ghost", "ws"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.found);
        assert!(result.graph.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_test_files_are_filtered() {
        let store = Arc::new(MemorySymbolStore::new());
        declare(&store, "parse");
        store.add_call("run", "parse", "src/run.rs", "rust");
        store.add_call("test_parse", "parse", "tests/parse.rs", "rust");
        let analyzer = analyzer(store, Arc::new(MemoryFullTextIndex::new()));

        let options = AnalyzeOptions::new("parse", "ws").direction(Direction::Incoming).max_depth(1);
        let without = analyzer.analyze(&options, &CancellationToken::new()).await.unwrap();
        assert_eq!(without.graph.edges.len(), 1);

        let with = analyzer
            .analyze(&options.include_tests(true), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(with.graph.edges.len(), 2);
    }

    #[tokio::test]
    async fn test_external_references_are_filtered() {
        let store = Arc::new(MemorySymbolStore::new());
        declare(&store, "main");
        store.add_reference(
            Reference::new(
                SymbolRef::named("main"),
                SymbolRef::named("serde_json::to_string"),
                ReferenceKind::Call,
                "src/main.rs",
                3,
                "rust",
            )
            .external(),
        );
        store.add_call("main", "helper", "src/main.rs", "rust");
        let analyzer = analyzer(store, Arc::new(MemoryFullTextIndex::new()));

        let options = AnalyzeOptions::new("main", "ws").direction(Direction::Outgoing).max_depth(1);
        let result = analyzer.analyze(&options, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.graph.edges.len(), 1);
        assert_eq!(result.graph.edges[0].to, "helper");

        let result = analyzer
            .analyze(&options.include_external(true), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.graph.edges.len(), 2);
    }

    #[tokio::test]
    async fn test_edge_orientation_and_node_counts() {
        let store = Arc::new(MemorySymbolStore::new());
        declare(&store, "service");
        store.add_call("controller", "service", "api/controller.rs", "rust");
        store.add_call("service", "repository", "core/service.rs", "rust");
        let analyzer = analyzer(store, Arc::new(MemoryFullTextIndex::new()));

        let result = analyzer
            .analyze(&AnalyzeOptions::new("service", "ws").max_depth(1), &CancellationToken::new())
            .await
            .unwrap();

        let pairs: Vec<(&str, &str)> = result
            .graph
            .edges
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        assert_eq!(pairs, vec![("controller", "service"), ("service", "repository")]);

        let root = result.graph.nodes.iter().find(|n| n.is_root).unwrap();
        assert_eq!(root.id, "service");
        assert_eq!(root.incoming_count, 1);
        assert_eq!(root.outgoing_count, 1);
        assert_eq!(result.metrics.instability, 0.5);

        let controller = result.graph.nodes.iter().find(|n| n.id == "controller").unwrap();
        assert_eq!(controller.projects, vec!["api"]);
    }

    #[tokio::test]
    async fn test_mutual_dependency_is_reported_as_cycle() {
        let store = Arc::new(MemorySymbolStore::new());
        declare(&store, "A");
        store.add_call("A", "B", "src/A.rs", "rust");
        store.add_call("B", "A", "src/B.rs", "rust");
        let analyzer = analyzer(store, Arc::new(MemoryFullTextIndex::new()));

        let options = AnalyzeOptions::new("A", "ws").direction(Direction::Outgoing).max_depth(5);
        let result = analyzer.analyze(&options, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.circular_dependencies.len(), 1);
        assert_eq!(result.circular_dependencies[0].path, vec!["A", "B", "A"]);
        assert_eq!(result.metrics.circular_dependency_count, 1);
        assert_eq!(result.graph.edges.len(), 2);
    }

    #[tokio::test]
    async fn test_depth_bounds_the_walk() {
        let store = Arc::new(MemorySymbolStore::new());
        declare(&store, "a");
        store.add_call("a", "b", "src/a.rs", "rust");
        store.add_call("b", "c", "src/b.rs", "rust");
        store.add_call("c", "d", "src/c.rs", "rust");
        let analyzer = analyzer(store, Arc::new(MemoryFullTextIndex::new()));

        let options = AnalyzeOptions::new("a", "ws").direction(Direction::Outgoing).max_depth(2);
        let result = analyzer.analyze(&options, &CancellationToken::new()).await.unwrap();

        let depths: Vec<(&str, u32)> = result
            .graph
            .edges
            .iter()
            .map(|e| (e.to.as_str(), e.depth))
            .collect();
        assert_eq!(depths, vec![("b", 1), ("c", 2)]);
        assert!(result.graph.nodes.iter().all(|n| n.id != "d"));
    }

    #[tokio::test]
    async fn test_fully_connected_graph_terminates() {
        let store = Arc::new(MemorySymbolStore::new());
        let names: Vec<String> = (0..6).map(|i| format!("n{i}")).collect();
        declare(&store, &names[0]);
        for from in &names {
            for to in &names {
                if from != to {
                    store.add_call(from, to, &format!("src/{from}.rs"), "rust");
                }
            }
        }
        let analyzer = analyzer(store.clone(), Arc::new(MemoryFullTextIndex::new()));

        let options = AnalyzeOptions::new("n0", "ws").direction(Direction::Outgoing).max_depth(10);
        let result = analyzer.analyze(&options, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.graph.nodes.len(), 6);
        assert_eq!(result.graph.edges.len(), 30);
        assert!(!result.circular_dependencies.is_empty());
        // Every node is expanded exactly once
        assert_eq!(
            store.calls().references_from.load(std::sync::atomic::Ordering::Relaxed),
            6
        );
    }

    #[tokio::test]
    async fn test_root_without_references_uses_text_fallback() {
        use crate::storage::{IndexedDocument, TypeDeclaration, TypeInfo};

        let store = Arc::new(MemorySymbolStore::new());
        store.add_symbol(Symbol::new("Invoice", SymbolKind::Class, "src/Invoice.cs", 3, "csharp"));
        let fulltext = Arc::new(MemoryFullTextIndex::new());
        let doc = |path: &str, owner: &str, content: &str| {
            IndexedDocument::new(
                path,
                "csharp",
                content,
                TypeInfo {
                    language: "csharp".to_string(),
                    namespace: None,
                    types: vec![TypeDeclaration {
                        name: owner.to_string(),
                        kind: SymbolKind::Class,
                        signature: None,
                        line: 1,
                        column: 0,
                        modifiers: Vec::new(),
                        base_type: None,
                        interfaces: Vec::new(),
                    }],
                    methods: Vec::new(),
                },
            )
        };
        fulltext.add_document("ws", doc("src/Invoice.cs", "Invoice", "class Invoice {}"));
        fulltext.add_document("ws", doc("src/Billing.cs", "BillingService", "new Invoice()"));
        let analyzer = analyzer(store, fulltext);

        let options = AnalyzeOptions::new("Invoice", "ws").direction(Direction::Incoming).max_depth(1);
        let result = analyzer.analyze(&options, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.graph.edges.len(), 1);
        let edge = &result.graph.edges[0];
        assert_eq!(edge.from, "BillingService");
        assert_eq!(edge.to, "Invoice");
        assert_eq!(edge.kind, ReferenceKind::TextReference);
        assert_eq!(edge.file_path, "src/Billing.cs");
    }

    #[tokio::test]
    async fn test_cancelled_analysis() {
        let store = Arc::new(MemorySymbolStore::new());
        declare(&store, "a");
        let analyzer = analyzer(store, Arc::new(MemoryFullTextIndex::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = analyzer
            .analyze(&AnalyzeOptions::new("a", "ws"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CodeSearchError::Cancelled));
    }
}
