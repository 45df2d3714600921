//! Human-readable observations over typed results.
//!
//! Every function here is pure: same result in, same lines out.

use crate::graph::{CouplingLevel, GraphAnalysisResult};
use crate::trace::{CallPathResult, MatchKind};
use crate::types::ResolutionResult;

const AMBIGUITY_THRESHOLD: usize = 3;

pub fn resolution_insights(result: &ResolutionResult) -> Vec<String> {
    let mut insights = Vec::new();
    if result.is_empty() {
        return insights;
    }

    let tiers = &result.tier_counts;
    if tiers.exact > 0 {
        insights.push(format!("{} exact match(es) in the symbol store", tiers.exact));
    } else {
        insights.push(format!(
            "No exact match; {} full-text and {} semantic candidate(s)",
            tiers.fulltext, tiers.semantic
        ));
    }

    if result.total_count >= AMBIGUITY_THRESHOLD {
        let files: std::collections::BTreeSet<&str> =
            result.candidates.iter().map(|c| c.file_path.as_str()).collect();
        insights.push(format!(
            "Ambiguous name: {} candidates across {} file(s)",
            result.total_count,
            files.len()
        ));
    }

    if let Some(popular) = result
        .candidates
        .iter()
        .filter(|c| c.reference_count.is_some())
        .max_by_key(|c| c.reference_count.unwrap_or(0))
    {
        if let Some(count) = popular.reference_count {
            insights.push(format!("Most referenced: {} ({count} reference(s))", popular.name));
        }
    }

    insights
}

pub fn resolution_hint(result: &ResolutionResult) -> Option<String> {
    if result.is_empty() {
        Some("Check the spelling, try a partial name, or drop the symbol type filter".to_string())
    } else if result.tier_counts.exact == 0 {
        Some("Results are approximate; pass the exact declared name for an authoritative match".to_string())
    } else {
        None
    }
}

fn describe_instability(instability: f64) -> &'static str {
    if instability < 0.3 {
        "stable (mostly depended upon)"
    } else if instability > 0.7 {
        "unstable (mostly depends on others)"
    } else {
        "balanced"
    }
}

pub fn graph_insights(result: &GraphAnalysisResult) -> Vec<String> {
    let mut insights = Vec::new();
    if !result.found {
        return insights;
    }
    let metrics = &result.metrics;

    insights.push(format!(
        "{} dependent(s), {} dependenc(ies) at the root",
        metrics.afferent_coupling, metrics.efferent_coupling
    ));
    insights.push(format!(
        "Instability {:.2}: {}",
        metrics.instability,
        describe_instability(metrics.instability)
    ));

    match metrics.coupling_level {
        CouplingLevel::High => insights.push(
            "High coupling: changes here are likely to ripple; consider splitting responsibilities"
                .to_string(),
        ),
        CouplingLevel::Moderate => insights.push("Moderate coupling".to_string()),
        CouplingLevel::Low => {}
    }

    if let Some(cycle) = result.circular_dependencies.first() {
        insights.push(format!(
            "{} circular dependenc(ies), e.g. {}",
            result.circular_dependencies.len(),
            cycle.path.join(" -> ")
        ));
    }

    for violation in &metrics.layer_violations {
        insights.push(format!(
            "Layer violation: {} -> {} ({})",
            violation.from, violation.to, violation.reason
        ));
    }

    let projects: std::collections::BTreeSet<&str> = result
        .graph
        .nodes
        .iter()
        .flat_map(|n| n.projects.iter().map(String::as_str))
        .collect();
    if projects.len() > 1 {
        insights.push(format!("Spans {} projects", projects.len()));
    }

    insights.push(format!("Health score {}/100", metrics.health_score));
    insights
}

pub fn graph_hint(result: &GraphAnalysisResult) -> Option<String> {
    if !result.found {
        Some("Resolve the symbol first to check its exact name".to_string())
    } else if result.graph.edges.is_empty() {
        Some("No relationships found; try direction=both or include_tests=true".to_string())
    } else {
        None
    }
}

pub fn trace_insights(result: &CallPathResult) -> Vec<String> {
    let mut insights = Vec::new();
    if !result.verified {
        insights.push(format!(
            "'{}' was not found exactly; the trace is best effort",
            result.symbol
        ));
    }
    if result.is_empty() {
        return insights;
    }

    insights.push(format!(
        "{} node(s) across {} root path(s)",
        result.total_nodes,
        result.nodes.len()
    ));

    let languages = result.languages();
    if languages.len() > 1 {
        insights.push(format!("Crosses languages: {}", languages.join(", ")));
    }

    let mut variants = 0;
    for root in &result.nodes {
        root.walk(&mut |node| {
            if node.match_kind == MatchKind::NamingVariant {
                variants += 1;
            }
        });
    }
    if variants > 0 {
        insights.push(format!("{variants} naming-convention bridge(s)"));
    }
    if result.semantic_bridges > 0 {
        insights.push(format!(
            "{} semantic bridge(s); verify these before relying on them",
            result.semantic_bridges
        ));
    }

    if !result.entry_points.is_empty() {
        insights.push(format!("Entry points: {}", result.entry_points.join(", ")));
    }
    insights
}

pub fn trace_hint(result: &CallPathResult) -> Option<String> {
    if result.is_empty() {
        Some("No callers or callees found; try direction=both or a larger max_depth".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        CircularDependency, DependencyGraph, Direction, EdgeDirection, GraphMetrics,
    };
    use crate::trace::{CallPathNode, TraceDirection};
    use crate::types::{OriginTier, Symbol, SymbolCandidate, SymbolKind, TierCounts};

    fn candidate(name: &str, file: &str, refs: Option<usize>) -> SymbolCandidate {
        SymbolCandidate::from_symbol(
            Symbol::new(name, SymbolKind::Class, file, 1, "csharp"),
            1.0,
            OriginTier::Exact,
        )
        .with_reference_count(refs)
    }

    #[test]
    fn test_resolution_insights() {
        let candidates = vec![
            candidate("Order", "a.cs", Some(3)),
            candidate("Order", "b.cs", Some(12)),
            candidate("Order", "c.cs", None),
        ];
        let result = ResolutionResult {
            query: "Order".to_string(),
            total_count: candidates.len(),
            tier_counts: TierCounts::tally(&candidates),
            candidates,
            elapsed_ms: 1,
        };

        let insights = resolution_insights(&result);
        assert_eq!(insights[0], "3 exact match(es) in the symbol store");
        assert!(insights[1].starts_with("Ambiguous name: 3 candidates across 3 file(s)"));
        assert_eq!(insights[2], "Most referenced: Order (12 reference(s))");
        assert!(resolution_hint(&result).is_none());
    }

    #[test]
    fn test_graph_insights_report_cycles() {
        let result = GraphAnalysisResult {
            symbol: "A".to_string(),
            found: true,
            root: Some("A".to_string()),
            direction: Direction::Outgoing,
            max_depth: 5,
            graph: DependencyGraph::default(),
            circular_dependencies: vec![CircularDependency {
                path: vec!["A".to_string(), "B".to_string(), "A".to_string()],
                direction: EdgeDirection::Outgoing,
            }],
            metrics: GraphMetrics {
                instability: 1.0,
                health_score: 90,
                ..GraphMetrics::default()
            },
            elapsed_ms: 2,
        };

        let insights = graph_insights(&result);
        assert!(insights.iter().any(|i| i.contains("A -> B -> A")));
        assert!(insights.iter().any(|i| i.contains("unstable")));
        assert_eq!(insights.last().unwrap(), "Health score 90/100");
        assert!(graph_hint(&result).is_some());
    }

    #[test]
    fn test_trace_insights() {
        let node = |id: &str, language: &str, kind: MatchKind| CallPathNode {
            identifier: id.to_string(),
            depth: 1,
            containing_symbol: None,
            target_symbol: None,
            is_semantic_match: kind == MatchKind::Semantic,
            confidence: 0.8,
            file_path: String::new(),
            line: 0,
            language: language.to_string(),
            kind: None,
            match_kind: kind,
            is_entry_point: false,
            children: Vec::new(),
        };
        let result = CallPathResult {
            symbol: "getUser".to_string(),
            direction: TraceDirection::Up,
            max_depth: 2,
            verified: false,
            nodes: vec![
                node("get_user", "python", MatchKind::NamingVariant),
                node("loadUser", "typescript", MatchKind::Semantic),
            ],
            total_nodes: 2,
            semantic_bridges: 1,
            entry_points: vec!["UserController".to_string()],
        };

        let insights = trace_insights(&result);
        assert!(insights[0].contains("best effort"));
        assert!(insights.contains(&"Crosses languages: python, typescript".to_string()));
        assert!(insights.contains(&"1 naming-convention bridge(s)".to_string()));
        assert!(insights.iter().any(|i| i.starts_with("1 semantic bridge(s)")));
        assert!(insights.contains(&"Entry points: UserController".to_string()));
    }
}
