//! Query shaping and fuzzy name scoring for the full-text tier.

use nucleo_matcher::pattern::{CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher, Utf32String};
use regex::Regex;
use std::sync::LazyLock;

use crate::storage::SearchField;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*((\.|::)[A-Za-z_$][A-Za-z0-9_$]*)*$")
        .expect("identifier pattern is valid")
});

/// True for plain or qualified identifiers (`Foo`, `a.b.C`, `mod::item`).
pub fn looks_like_identifier(query: &str) -> bool {
    IDENTIFIER.is_match(query.trim())
}

/// Identifiers go to the symbol-name field, everything else to content.
pub fn select_field(query: &str) -> SearchField {
    if looks_like_identifier(query) {
        SearchField::SymbolName
    } else {
        SearchField::Content
    }
}

/// Last segment of a qualified name (`App.Users.UserService` -> `UserService`).
pub fn simple_name(query: &str) -> &str {
    query
        .rsplit(['.', ':'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(query)
}

/// Scores candidate names against one query, normalized to `0.0..=1.0`.
///
/// The ceiling is the query's score against itself, so a perfect match is 1.0
/// and abbreviations such as `UsrSvc` for `UserService` land in between.
pub struct NameMatcher {
    pattern: Pattern,
    matcher: Matcher,
    ceiling: f32,
}

impl NameMatcher {
    pub fn new(query: &str) -> Self {
        // Strip nucleo's pattern syntax so identifiers are always literal atoms
        let literal: String = query
            .chars()
            .filter(|c| !matches!(c, '^' | '$' | '!' | '\''))
            .collect();
        let pattern = Pattern::parse(&literal, CaseMatching::Ignore, Normalization::Smart);
        let mut matcher = Matcher::new(Config::DEFAULT);

        let own = Utf32String::from(literal.as_str());
        let ceiling = pattern
            .score(own.slice(..), &mut matcher)
            .unwrap_or(1)
            .max(1) as f32;

        Self {
            pattern,
            matcher,
            ceiling,
        }
    }

    pub fn score(&mut self, name: &str) -> Option<f32> {
        let haystack = Utf32String::from(name);
        self.pattern
            .score(haystack.slice(..), &mut self.matcher)
            .map(|raw| (raw as f32 / self.ceiling).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_detection() {
        assert!(looks_like_identifier("UserService"));
        assert!(looks_like_identifier("App.Services.UserService"));
        assert!(looks_like_identifier("crate::config::Settings"));
        assert!(looks_like_identifier("$scope"));
        assert!(!looks_like_identifier("find all users"));
        assert!(!looks_like_identifier("user-service"));
        assert!(!looks_like_identifier(""));
    }

    #[test]
    fn test_field_selection() {
        assert_eq!(select_field("GetUser"), SearchField::SymbolName);
        assert_eq!(select_field("where users are loaded"), SearchField::Content);
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(simple_name("App.Users.UserService"), "UserService");
        assert_eq!(simple_name("config::Settings"), "Settings");
        assert_eq!(simple_name("Plain"), "Plain");
    }

    #[test]
    fn test_abbreviation_scores_below_exact() {
        let mut exact = NameMatcher::new("UserService");
        let exact_score = exact.score("UserService").unwrap();
        assert!((exact_score - 1.0).abs() < f32::EPSILON);

        let mut typo = NameMatcher::new("UsrSvc");
        let partial = typo.score("UserService").unwrap();
        assert!(partial > 0.0 && partial <= 1.0);

        assert!(typo.score("OrderRepository").is_none());
    }
}
