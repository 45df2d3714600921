//! Call path tracing.
//!
//! Walks caller (`up`) or callee (`down`) relationships from a symbol and
//! returns the discovered paths as trees. Symbols in other languages are
//! bridged in by naming convention and, when an embedding index is present,
//! by semantic similarity.

pub mod naming;
mod tracer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use crate::error::{CodeSearchError, CodeSearchResult};
use crate::types::ReferenceKind;

pub use tracer::CallPathTracer;

#[async_trait]
pub trait Tracer: Send + Sync {
    async fn trace(
        &self,
        options: &TraceOptions,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<CallPathResult>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceDirection {
    /// Callers
    #[default]
    Up,
    /// Callees
    Down,
    Both,
}

impl TraceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for TraceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceDirection {
    type Err = CodeSearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" | "upstream" | "callers" => Ok(Self::Up),
            "down" | "downstream" | "callees" => Ok(Self::Down),
            "both" => Ok(Self::Both),
            other => Err(CodeSearchError::invalid(
                "direction",
                format!("'{other}' is not one of up, down, both"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceOptions {
    pub symbol: String,
    pub workspace: String,
    #[serde(default)]
    pub direction: TraceDirection,
    pub max_depth: u32,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub no_cache: bool,
}

impl TraceOptions {
    pub fn new(symbol: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            workspace: workspace.into(),
            direction: TraceDirection::Up,
            max_depth: 3,
            case_sensitive: false,
            no_cache: false,
        }
    }

    pub fn direction(mut self, direction: TraceDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn validate(&self, depth_limit: u32) -> CodeSearchResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(CodeSearchError::invalid("symbol", "symbol name must not be empty"));
        }
        if self.workspace.trim().is_empty() {
            return Err(CodeSearchError::invalid("workspace", "workspace must not be empty"));
        }
        if self.max_depth == 0 || self.max_depth > depth_limit {
            return Err(CodeSearchError::invalid(
                "max_depth",
                format!("must be between 1 and {depth_limit}, got {}", self.max_depth),
            ));
        }
        Ok(())
    }

    /// `trace:{workspace}:{symbol}:{direction}:{depth}:{case_sensitive}`
    pub fn cache_key(&self) -> String {
        format!(
            "trace:{}:{}:{}:{}:{}",
            self.workspace,
            self.symbol.trim(),
            self.direction,
            self.max_depth,
            self.case_sensitive
        )
    }
}

/// How a node was connected to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Recorded reference between the two symbols
    Direct,
    /// Same name in another naming convention and another language
    NamingVariant,
    /// Embedding similarity across languages
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPathNode {
    /// Key of the symbol this node stands for
    pub identifier: String,
    /// 1 for direct callers/callees of the traced symbol
    pub depth: u32,
    /// Symbol whose body holds the reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containing_symbol: Option<String>,
    /// Symbol being referenced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_symbol: Option<String>,
    pub is_semantic_match: bool,
    pub confidence: f32,
    pub file_path: String,
    pub line: u32,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ReferenceKind>,
    pub match_kind: MatchKind,
    pub is_entry_point: bool,
    pub children: Vec<CallPathNode>,
}

impl CallPathNode {
    /// Nodes in this subtree, self included.
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(CallPathNode::subtree_size).sum::<usize>()
    }

    /// Depth-first visit of this subtree, self first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a CallPathNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.children
            .iter()
            .map(CallPathNode::max_depth)
            .max()
            .unwrap_or(self.depth)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPathResult {
    pub symbol: String,
    pub direction: TraceDirection,
    pub max_depth: u32,
    /// The symbol was found in the exact-match store before tracing
    pub verified: bool,
    pub nodes: Vec<CallPathNode>,
    pub total_nodes: usize,
    pub semantic_bridges: usize,
    pub entry_points: Vec<String>,
}

impl CallPathResult {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn languages(&self) -> Vec<String> {
        let mut languages = std::collections::BTreeSet::new();
        for root in &self.nodes {
            root.walk(&mut |node| {
                if !node.language.is_empty() {
                    languages.insert(node.language.clone());
                }
            });
        }
        languages.into_iter().collect()
    }
}

const ENTRY_NAMES: &[&str] = &["main", "Main"];
const ENTRY_SUFFIXES: &[&str] = &["Handler", "Controller", "Endpoint"];
const ENTRY_PREFIXES: &[&str] = &["handle", "Handle"];
const ENTRY_PATHS: &[&str] = &["controllers/", "handlers/", "routes/", "Controllers/", "Handlers/", "Routes/"];
const ENTRY_FILES: &[&str] = &["main.rs", "Program.cs", "main.go", "main.py", "index.ts"];

/// Application boundary by name or location. Used for insights only.
pub fn is_entry_point(identifier: &str, file_path: &str) -> bool {
    let name = identifier.rsplit('.').next().unwrap_or(identifier);
    if ENTRY_NAMES.contains(&name)
        || identifier
            .split('.')
            .any(|segment| ENTRY_SUFFIXES.iter().any(|s| segment.ends_with(s)))
        || ENTRY_PREFIXES.iter().any(|p| {
            name.strip_prefix(p)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(|c: char| c.is_uppercase() || c == '_'))
        })
    {
        return true;
    }
    let path = file_path.replace('\\', "/");
    let file_name = path.rsplit('/').next().unwrap_or(&path);
    ENTRY_PATHS.iter().any(|p| path.contains(p)) || ENTRY_FILES.contains(&file_name)
}
