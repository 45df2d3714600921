//! Coupling metrics and layering heuristics over a finished graph.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use super::{CircularDependency, EdgeDirection, GraphEdge, GraphNode};
use crate::config::GraphConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouplingLevel {
    #[default]
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Presentation,
    Business,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerViolation {
    pub from: String,
    pub to: String,
    pub from_layer: Layer,
    pub to_layer: Layer,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    /// Edges found walking incoming references
    pub incoming_count: usize,
    /// Edges found walking outgoing references
    pub outgoing_count: usize,
    /// Distinct direct dependents of the root
    pub afferent_coupling: usize,
    /// Distinct direct dependencies of the root
    pub efferent_coupling: usize,
    pub unique_files: usize,
    pub unique_symbols: usize,
    /// `outgoing / (incoming + outgoing)`, 0 when both are 0
    pub instability: f64,
    pub coupling_level: CouplingLevel,
    pub circular_dependency_count: usize,
    pub layer_violations: Vec<LayerViolation>,
    pub health_score: u8,
}

const PRESENTATION: &[&str] = &["Controller", "View", "Page", "Component", "Screen", "Handler"];
const BUSINESS: &[&str] = &["Service", "Manager", "UseCase", "Interactor"];
const DATA: &[&str] = &["Repository", "Repo", "Dao", "DbContext", "Store", "Gateway"];

/// Layer of a component, judged by the suffix of its type name.
pub fn classify_layer(id: &str) -> Option<Layer> {
    // `App.Web.UserController.Index` -> check every segment, innermost type wins
    for segment in id.rsplit('.') {
        let matches = |suffixes: &[&str]| suffixes.iter().any(|s| segment.ends_with(s));
        if matches(PRESENTATION) {
            return Some(Layer::Presentation);
        }
        if matches(DATA) {
            return Some(Layer::Data);
        }
        if matches(BUSINESS) {
            return Some(Layer::Business);
        }
    }
    None
}

fn violation_reason(from: Layer, to: Layer) -> Option<&'static str> {
    match (from, to) {
        (Layer::Presentation, Layer::Data) => Some("presentation layer bypasses business layer"),
        (Layer::Data, Layer::Presentation) | (Layer::Data, Layer::Business) => {
            Some("data layer depends on a higher layer")
        }
        _ => None,
    }
}

pub fn detect_layer_violations(edges: &[GraphEdge]) -> Vec<LayerViolation> {
    let mut seen = HashSet::new();
    let mut violations = Vec::new();
    for edge in edges {
        let (Some(from_layer), Some(to_layer)) = (classify_layer(&edge.from), classify_layer(&edge.to))
        else {
            continue;
        };
        if let Some(reason) = violation_reason(from_layer, to_layer) {
            if seen.insert((edge.from.clone(), edge.to.clone())) {
                violations.push(LayerViolation {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    from_layer,
                    to_layer,
                    reason: reason.to_string(),
                });
            }
        }
    }
    violations
}

pub fn instability(incoming: usize, outgoing: usize) -> f64 {
    let total = incoming + outgoing;
    if total == 0 {
        0.0
    } else {
        outgoing as f64 / total as f64
    }
}

pub fn coupling_level(direct: usize, config: &GraphConfig) -> CouplingLevel {
    if direct <= config.coupling_low {
        CouplingLevel::Low
    } else if direct > config.coupling_high {
        CouplingLevel::High
    } else {
        CouplingLevel::Moderate
    }
}

fn health_score(cycles: usize, violations: usize, coupling: CouplingLevel) -> u8 {
    let cycle_penalty = (cycles * 10).min(40);
    let layer_penalty = (violations * 5).min(25);
    let coupling_penalty = match coupling {
        CouplingLevel::Low => 0,
        CouplingLevel::Moderate => 5,
        CouplingLevel::High => 20,
    };
    100usize.saturating_sub(cycle_penalty + layer_penalty + coupling_penalty) as u8
}

pub fn compute_metrics(
    root: &str,
    nodes: &[GraphNode],
    edges: &[GraphEdge],
    cycles: &[CircularDependency],
    config: &GraphConfig,
) -> GraphMetrics {
    let incoming_count = edges
        .iter()
        .filter(|e| e.direction == EdgeDirection::Incoming)
        .count();
    let outgoing_count = edges.len() - incoming_count;

    let afferent: BTreeSet<&str> = edges
        .iter()
        .filter(|e| e.direction == EdgeDirection::Incoming && e.to == root)
        .map(|e| e.from.as_str())
        .collect();
    let efferent: BTreeSet<&str> = edges
        .iter()
        .filter(|e| e.direction == EdgeDirection::Outgoing && e.from == root)
        .map(|e| e.to.as_str())
        .collect();

    let unique_files: BTreeSet<&str> = edges.iter().map(|e| e.file_path.as_str()).collect();

    let coupling = coupling_level(afferent.len() + efferent.len(), config);
    let layer_violations = detect_layer_violations(edges);

    GraphMetrics {
        incoming_count,
        outgoing_count,
        afferent_coupling: afferent.len(),
        efferent_coupling: efferent.len(),
        unique_files: unique_files.len(),
        unique_symbols: nodes.len(),
        instability: instability(incoming_count, outgoing_count),
        coupling_level: coupling,
        circular_dependency_count: cycles.len(),
        health_score: health_score(cycles.len(), layer_violations.len(), coupling),
        layer_violations,
    }
}
