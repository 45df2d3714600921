//! In-memory backends.
//!
//! `MemorySymbolStore` is a concurrent symbol table with the same lookup
//! semantics as the persisted store. `MemoryFullTextIndex` scores documents
//! with the fuzzy name matcher instead of BM25. Both can be told to fail and
//! count their calls, which is how tier short-circuiting is verified.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    BackendError, BackendResult, ExactMatchStore, FullTextIndex, FullTextQuery, Hit,
    IndexedDocument, SearchField,
};
use crate::resolver::fuzzy::NameMatcher;
use crate::types::{Reference, Symbol, SymbolRef};

/// Per-method call counters.
#[derive(Debug, Default)]
pub struct CallCounters {
    pub find_by_name: AtomicUsize,
    pub count_references: AtomicUsize,
    pub references_to: AtomicUsize,
    pub references_from: AtomicUsize,
    pub search: AtomicUsize,
}

impl CallCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> usize {
        self.find_by_name.load(Ordering::Relaxed)
            + self.count_references.load(Ordering::Relaxed)
            + self.references_to.load(Ordering::Relaxed)
            + self.references_from.load(Ordering::Relaxed)
            + self.search.load(Ordering::Relaxed)
    }
}

fn same_symbol(query: &SymbolRef, candidate: &SymbolRef) -> bool {
    if query.name != candidate.name {
        return false;
    }
    match (&query.containing_type, &candidate.containing_type) {
        (Some(a), Some(b)) if a != b => return false,
        _ => {}
    }
    !matches!((&query.namespace, &candidate.namespace), (Some(a), Some(b)) if a != b)
}

#[derive(Debug, Default)]
pub struct MemorySymbolStore {
    by_name: DashMap<String, Vec<Symbol>>,
    /// lowercase name -> exact names
    by_lower: DashMap<String, Vec<String>>,
    references: RwLock<Vec<Reference>>,
    failure: RwLock<Option<String>>,
    calls: CallCounters,
}

impl MemorySymbolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_symbol(&self, symbol: Symbol) {
        let lower = symbol.name.to_lowercase();
        let mut names = self.by_lower.entry(lower).or_default();
        if !names.contains(&symbol.name) {
            names.push(symbol.name.clone());
        }
        drop(names);
        self.by_name
            .entry(symbol.name.clone())
            .or_default()
            .push(symbol);
    }

    pub fn add_reference(&self, reference: Reference) {
        self.references.write().push(reference);
    }

    /// Convenience for graph fixtures: `source` calls `target` from `file_path`.
    pub fn add_call(&self, source: &str, target: &str, file_path: &str, language: &str) {
        let line = self.references.read().len() as u32 + 1;
        self.add_reference(Reference::new(
            SymbolRef::named(source),
            SymbolRef::named(target),
            crate::types::ReferenceKind::Call,
            file_path,
            line,
            language,
        ));
    }

    /// Every subsequent call fails with `reason` until [`recover`](Self::recover).
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.write() = Some(reason.into());
    }

    pub fn recover(&self) {
        *self.failure.write() = None;
    }

    pub fn calls(&self) -> &CallCounters {
        &self.calls
    }

    pub fn symbol_count(&self) -> usize {
        self.by_name.iter().map(|entry| entry.value().len()).sum()
    }

    fn check_failure(&self) -> BackendResult<()> {
        match self.failure.read().as_ref() {
            Some(reason) => Err(BackendError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ExactMatchStore for MemorySymbolStore {
    async fn find_by_name(&self, name: &str, case_sensitive: bool) -> BackendResult<Vec<Symbol>> {
        CallCounters::bump(&self.calls.find_by_name);
        self.check_failure()?;

        if case_sensitive {
            return Ok(self
                .by_name
                .get(name)
                .map(|entry| entry.value().clone())
                .unwrap_or_default());
        }

        let names = self
            .by_lower
            .get(&name.to_lowercase())
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        Ok(names
            .iter()
            .filter_map(|exact| self.by_name.get(exact).map(|e| e.value().clone()))
            .flatten()
            .collect())
    }

    async fn count_references_by_name(&self, name: &str) -> BackendResult<usize> {
        CallCounters::bump(&self.calls.count_references);
        self.check_failure()?;
        Ok(self
            .references
            .read()
            .iter()
            .filter(|r| r.target.name == name)
            .count())
    }

    async fn find_references_to(&self, target: &SymbolRef) -> BackendResult<Vec<Reference>> {
        CallCounters::bump(&self.calls.references_to);
        self.check_failure()?;
        Ok(self
            .references
            .read()
            .iter()
            .filter(|r| same_symbol(target, &r.target))
            .cloned()
            .collect())
    }

    async fn find_references_from(&self, source: &SymbolRef) -> BackendResult<Vec<Reference>> {
        CallCounters::bump(&self.calls.references_from);
        self.check_failure()?;
        Ok(self
            .references
            .read()
            .iter()
            .filter(|r| same_symbol(source, &r.source))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryFullTextIndex {
    documents: DashMap<String, Vec<IndexedDocument>>,
    failure: RwLock<Option<String>>,
    calls: CallCounters,
}

impl MemoryFullTextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&self, workspace: &str, document: IndexedDocument) {
        self.documents
            .entry(workspace.to_string())
            .or_default()
            .push(document);
    }

    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.write() = Some(reason.into());
    }

    pub fn recover(&self) {
        *self.failure.write() = None;
    }

    pub fn calls(&self) -> &CallCounters {
        &self.calls
    }

    fn score_document(document: &IndexedDocument, query: &FullTextQuery) -> Option<f32> {
        let base = match query.field {
            SearchField::SymbolName => {
                let mut matcher = NameMatcher::new(&query.text);
                let needle = query.text.to_lowercase();
                document
                    .declaration_names()
                    .filter_map(|name| {
                        if query.fuzzy {
                            matcher.score(name)
                        } else if name.to_lowercase().contains(&needle) {
                            Some(1.0)
                        } else {
                            None
                        }
                    })
                    .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))))?
            }
            SearchField::Content => {
                let needle = query.text.to_lowercase();
                let occurrences = document.content.to_lowercase().matches(&needle).count();
                if occurrences == 0 {
                    return None;
                }
                occurrences as f32
            }
        };

        let boost = match query.kind_hint {
            Some(kind) if document.declares_kind(kind) => 1.5,
            _ => 1.0,
        };
        Some(base * boost)
    }
}

#[async_trait]
impl FullTextIndex for MemoryFullTextIndex {
    async fn search(
        &self,
        workspace: &str,
        query: &FullTextQuery,
        max_results: usize,
    ) -> BackendResult<Vec<Hit>> {
        CallCounters::bump(&self.calls.search);
        if let Some(reason) = self.failure.read().as_ref() {
            return Err(BackendError::query("fulltext", reason.clone()));
        }
        if query.text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let Some(documents) = self.documents.get(workspace) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<Hit> = documents
            .iter()
            .filter_map(|doc| {
                Self::score_document(doc, query).map(|score| Hit {
                    score,
                    fields: doc.stored_fields(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.path().cmp(&b.path()))
        });
        hits.truncate(max_results);
        Ok(hits)
    }
}
