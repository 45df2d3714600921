//! Dependency graph analysis.
//!
//! Builds the incoming and/or outgoing relationship graph around a symbol,
//! records circular dependencies, and derives coupling metrics and layer
//! violations from the finished graph.
//!
//! Edge orientation is uniform: `from` depends on `to`. An outgoing edge
//! points from the symbol being expanded to what it references; an incoming
//! edge points from the referrer to the symbol being expanded.

mod analyzer;
pub mod metrics;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use crate::error::{CodeSearchError, CodeSearchResult};
use crate::types::ReferenceKind;

pub use analyzer::DependencyGraphAnalyzer;
pub use metrics::{CouplingLevel, GraphMetrics, Layer, LayerViolation};

#[async_trait]
pub trait GraphAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        options: &AnalyzeOptions,
        cancel: &CancellationToken,
    ) -> CodeSearchResult<GraphAnalysisResult>;
}

/// Which side of the graph to walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
    #[default]
    Both,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Both => "both",
        }
    }

    pub fn edge_directions(&self) -> &'static [EdgeDirection] {
        match self {
            Self::Incoming => &[EdgeDirection::Incoming],
            Self::Outgoing => &[EdgeDirection::Outgoing],
            Self::Both => &[EdgeDirection::Incoming, EdgeDirection::Outgoing],
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = CodeSearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incoming" | "in" | "callers" => Ok(Self::Incoming),
            "outgoing" | "out" | "callees" => Ok(Self::Outgoing),
            "both" | "all" => Ok(Self::Both),
            other => Err(CodeSearchError::invalid(
                "direction",
                format!("'{other}' is not one of incoming, outgoing, both"),
            )),
        }
    }
}

/// Traversal side an edge was discovered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDirection {
    Incoming,
    Outgoing,
}

impl EdgeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeOptions {
    pub symbol: String,
    pub workspace: String,
    #[serde(default)]
    pub direction: Direction,
    pub max_depth: u32,
    #[serde(default)]
    pub include_tests: bool,
    #[serde(default)]
    pub include_external: bool,
}

impl AnalyzeOptions {
    pub fn new(symbol: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            workspace: workspace.into(),
            direction: Direction::Both,
            max_depth: 3,
            include_tests: false,
            include_external: false,
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn include_tests(mut self, include: bool) -> Self {
        self.include_tests = include;
        self
    }

    pub fn include_external(mut self, include: bool) -> Self {
        self.include_external = include;
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
                "depth",
                format!("must be between 1 and {depth_limit}, got {}", self.max_depth),
            ));
        }
        Ok(())
    }

    /// `deps:{workspace}:{symbol}:{direction}:{depth}:{tests}:{external}`
    pub fn cache_key(&self) -> String {
        format!(
            "deps:{}:{}:{}:{}:{}:{}",
            self.workspace,
            self.symbol.trim(),
            self.direction,
            self.max_depth,
            self.include_tests,
            self.include_external
        )
    }
}

/// A logical component: one symbol key with its aggregated edge counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable symbol key (namespace.containing_type.name)
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub incoming_count: usize,
    pub outgoing_count: usize,
    pub projects: Vec<String>,
    pub is_root: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub direction: EdgeDirection,
    pub kind: ReferenceKind,
    pub file_path: String,
    pub line: u32,
    /// Traversal level the edge was found at, root edges are 1
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CircularDependency {
    /// Ends with the element that closed the cycle
    pub path: Vec<String>,
    pub direction: EdgeDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphAnalysisResult {
    pub symbol: String,
    /// False when the symbol did not resolve; the graph is then empty
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    pub direction: Direction,
    pub max_depth: u32,
    pub graph: DependencyGraph,
    pub circular_dependencies: Vec<CircularDependency>,
    pub metrics: GraphMetrics,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing() {
        assert_eq!("Incoming".parse::<Direction>().unwrap(), Direction::Incoming);
        assert_eq!("both".parse::<Direction>().unwrap(), Direction::Both);
        let err = "sideways".parse::<Direction>().unwrap_err();
        assert!(matches!(err, CodeSearchError::InvalidArgument { field: "direction", .. }));
    }

    #[test]
    fn test_depth_validation() {
        let options = AnalyzeOptions::new("A", "ws");
        assert!(options.clone().max_depth(0).validate(10).is_err());
        assert!(options.clone().max_depth(11).validate(10).is_err());
        assert!(options.max_depth(10).validate(10).is_ok());
    }

    #[test]
    fn test_cache_key() {
        let options = AnalyzeOptions::new("UserService", "/repo")
            .direction(Direction::Outgoing)
            .max_depth(2);
        assert_eq!(options.cache_key(), "deps:/repo:UserService:outgoing:2:false:false");
    }
}
