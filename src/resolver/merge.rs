//! Merging and ranking of tier results.
//!
//! Arrival order of concurrent tiers never influences the output: merging is
//! keyed by `(file_path, name)` and decided by score, and ranking is a total
//! order.

use indexmap::IndexMap;
use std::cmp::Ordering;

use super::fuzzy::simple_name;
use crate::types::{OriginTier, SymbolCandidate};

/// One record per `(file_path, name)`, keeping the higher score.
///
/// Equal scores keep the candidate already present, and full-text candidates
/// are inserted first, so a tie between tiers resolves to full-text.
pub fn merge_candidates(
    fulltext: Vec<SymbolCandidate>,
    semantic: Vec<SymbolCandidate>,
) -> Vec<SymbolCandidate> {
    let mut merged: IndexMap<(String, String), SymbolCandidate> = IndexMap::new();

    for candidate in fulltext.into_iter().chain(semantic) {
        let key = (candidate.file_path.clone(), candidate.name.clone());
        match merged.get(&key) {
            Some(existing) if existing.score >= candidate.score => {}
            _ => {
                merged.insert(key, candidate);
            }
        }
    }

    merged.into_values().collect()
}

/// Candidate name equals the queried name (last segment for qualified queries).
pub fn is_exact_name(candidate: &SymbolCandidate, query: &str, case_sensitive: bool) -> bool {
    let wanted = simple_name(query);
    if case_sensitive {
        candidate.name == wanted
    } else {
        candidate.name.eq_ignore_ascii_case(wanted)
    }
}

fn tier_rank(tier: OriginTier) -> u8 {
    match tier {
        OriginTier::Exact => 0,
        OriginTier::Fulltext => 1,
        OriginTier::Semantic => 2,
    }
}

/// Exact-name matches first, then score, then location.
pub fn rank_candidates(candidates: &mut [SymbolCandidate], query: &str, case_sensitive: bool) {
    candidates.sort_by(|a, b| {
        let a_exact = is_exact_name(a, query, case_sensitive);
        let b_exact = is_exact_name(b, query, case_sensitive);
        b_exact
            .cmp(&a_exact)
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.line.cmp(&b.line))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| tier_rank(a.origin_tier).cmp(&tier_rank(b.origin_tier)))
    });
}
