//! Core data model shared by the resolver, graph analyzer and call-path tracer.
//!
//! Everything here is request-scoped except what the cache stores, and every
//! type serializes with `snake_case` fields so responses have a stable shape.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Class,
    Struct,
    Interface,
    Trait,
    Enum,
    Record,
    Module,
    Namespace,
    Function,
    Method,
    Constructor,
    Property,
    Field,
    Variable,
    Constant,
    TypeAlias,
    Macro,
    Unknown,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Interface => "interface",
            Self::Trait => "trait",
            Self::Enum => "enum",
            Self::Record => "record",
            Self::Module => "module",
            Self::Namespace => "namespace",
            Self::Function => "function",
            Self::Method => "method",
            Self::Constructor => "constructor",
            Self::Property => "property",
            Self::Field => "field",
            Self::Variable => "variable",
            Self::Constant => "constant",
            Self::TypeAlias => "type_alias",
            Self::Macro => "macro",
            Self::Unknown => "unknown",
        }
    }

    /// Types are the declarations other code depends on structurally.
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            Self::Class
                | Self::Struct
                | Self::Interface
                | Self::Trait
                | Self::Enum
                | Self::Record
                | Self::TypeAlias
        )
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function | Self::Method | Self::Constructor)
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "class" => Self::Class,
            "struct" => Self::Struct,
            "interface" => Self::Interface,
            "trait" => Self::Trait,
            "enum" => Self::Enum,
            "record" => Self::Record,
            "module" | "mod" => Self::Module,
            "namespace" | "package" => Self::Namespace,
            "function" | "fn" | "func" => Self::Function,
            "method" => Self::Method,
            "constructor" | "ctor" => Self::Constructor,
            "property" => Self::Property,
            "field" => Self::Field,
            "variable" | "var" => Self::Variable,
            "constant" | "const" => Self::Constant,
            "type_alias" | "typealias" | "type" => Self::TypeAlias,
            "macro" => Self::Macro,
            other => return Err(format!("unknown symbol kind: {other}")),
        };
        Ok(kind)
    }
}

/// A declaration as the exact-match store knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub language: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containing_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    /// Usage count recorded at extraction time; drives popularity ordering.
    #[serde(default)]
    pub reference_count: u32,
}

impl Symbol {
    pub fn new(
        name: impl Into<String>,
        kind: SymbolKind,
        file_path: impl Into<String>,
        line: u32,
        language: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            signature: None,
            file_path: file_path.into(),
            line,
            column: 0,
            language: language.into(),
            modifiers: Vec::new(),
            namespace: None,
            containing_type: None,
            base_type: None,
            interfaces: Vec::new(),
            reference_count: 0,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = column;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_containing_type(mut self, containing_type: impl Into<String>) -> Self {
        self.containing_type = Some(containing_type.into());
        self
    }

    pub fn with_base_type(mut self, base_type: impl Into<String>) -> Self {
        self.base_type = Some(base_type.into());
        self
    }

    pub fn with_interfaces<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = interfaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_modifiers<I, S>(mut self, modifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modifiers = modifiers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reference_count(mut self, count: u32) -> Self {
        self.reference_count = count;
        self
    }

    pub fn symbol_ref(&self) -> SymbolRef {
        SymbolRef {
            name: self.name.clone(),
            containing_type: self.containing_type.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// Logical handle on a symbol, independent of where it is declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containing_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SymbolRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            containing_type: None,
            namespace: None,
        }
    }

    pub fn with_containing_type(mut self, containing_type: impl Into<String>) -> Self {
        self.containing_type = Some(containing_type.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Stable key: namespace + containing type + name, dot separated.
    pub fn key(&self) -> String {
        [
            self.namespace.as_deref(),
            self.containing_type.as_deref(),
            Some(self.name.as_str()),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
    }
}

impl fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Call,
    TypeUsage,
    Inheritance,
    Implementation,
    Import,
    TextReference,
    Other,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::TypeUsage => "type_usage",
            Self::Inheritance => "inheritance",
            Self::Implementation => "implementation",
            Self::Import => "import",
            Self::TextReference => "text_reference",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One usage site: `source` refers to `target` at `file_path:line`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub source: SymbolRef,
    pub target: SymbolRef,
    pub kind: ReferenceKind,
    pub file_path: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    pub language: String,
    /// Target lives outside the workspace (package, assembly, crate dependency).
    #[serde(default)]
    pub is_external: bool,
}

impl Reference {
    pub fn new(
        source: SymbolRef,
        target: SymbolRef,
        kind: ReferenceKind,
        file_path: impl Into<String>,
        line: u32,
        language: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            kind,
            file_path: file_path.into(),
            line,
            column: 0,
            language: language.into(),
            is_external: false,
        }
    }

    pub fn external(mut self) -> Self {
        self.is_external = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginTier {
    Exact,
    Fulltext,
    Semantic,
}

/// A resolved symbol occurrence produced by one of the tiers.
///
/// Candidates are never edited after a tier emits them; later stages pick
/// between candidates or build a replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolCandidate {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub language: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containing_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    pub score: f32,
    pub origin_tier: OriginTier,
    #[serde(default)]
    pub reference_count: Option<usize>,
}

impl SymbolCandidate {
    pub fn from_symbol(symbol: Symbol, score: f32, origin_tier: OriginTier) -> Self {
        Self {
            name: symbol.name,
            kind: symbol.kind,
            signature: symbol.signature,
            file_path: symbol.file_path,
            line: symbol.line,
            column: symbol.column,
            language: symbol.language,
            modifiers: symbol.modifiers,
            namespace: symbol.namespace,
            containing_type: symbol.containing_type,
            base_type: symbol.base_type,
            interfaces: symbol.interfaces,
            score: score.clamp(0.0, 1.0),
            origin_tier,
            reference_count: None,
        }
    }

    /// Deduplication identity.
    pub fn identity(&self) -> (&str, &str) {
        (self.file_path.as_str(), self.name.as_str())
    }

    pub fn symbol_ref(&self) -> SymbolRef {
        SymbolRef {
            name: self.name.clone(),
            containing_type: self.containing_type.clone(),
            namespace: self.namespace.clone(),
        }
    }

    /// Copy carrying an enrichment result.
    pub fn with_reference_count(&self, reference_count: Option<usize>) -> Self {
        Self {
            reference_count,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub exact: usize,
    pub fulltext: usize,
    pub semantic: usize,
}

impl TierCounts {
    pub fn tally(candidates: &[SymbolCandidate]) -> Self {
        let mut counts = Self::default();
        for candidate in candidates {
            match candidate.origin_tier {
                OriginTier::Exact => counts.exact += 1,
                OriginTier::Fulltext => counts.fulltext += 1,
                OriginTier::Semantic => counts.semantic += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub query: String,
    pub candidates: Vec<SymbolCandidate>,
    pub total_count: usize,
    pub elapsed_ms: u64,
    pub tier_counts: TierCounts,
}

impl ResolutionResult {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn best(&self) -> Option<&SymbolCandidate> {
        self.candidates.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_ref_key_skips_missing_parts() {
        let plain = SymbolRef::named("run");
        assert_eq!(plain.key(), "run");

        let qualified = SymbolRef::named("run")
            .with_containing_type("Worker")
            .with_namespace("App.Jobs");
        assert_eq!(qualified.key(), "App.Jobs.Worker.run");
    }

    #[test]
    fn test_symbol_kind_parsing() {
        assert_eq!("Class".parse::<SymbolKind>().unwrap(), SymbolKind::Class);
        assert_eq!("fn".parse::<SymbolKind>().unwrap(), SymbolKind::Function);
        assert_eq!(
            "type-alias".parse::<SymbolKind>().unwrap(),
            SymbolKind::TypeAlias
        );
        assert!("widget".parse::<SymbolKind>().is_err());
    }

    #[test]
    fn test_candidate_score_is_clamped() {
        let symbol = Symbol::new("Parse", SymbolKind::Function, "src/a.rs", 1, "rust");
        let candidate = SymbolCandidate::from_symbol(symbol, 1.7, OriginTier::Fulltext);
        assert_eq!(candidate.score, 1.0);
        assert_eq!(candidate.identity(), ("src/a.rs", "Parse"));
    }

    #[test]
    fn test_tier_counts_tally() {
        let make = |name: &str, tier| {
            SymbolCandidate::from_symbol(
                Symbol::new(name, SymbolKind::Class, "a.cs", 1, "csharp"),
                0.5,
                tier,
            )
        };
        let counts = TierCounts::tally(&[
            make("A", OriginTier::Fulltext),
            make("B", OriginTier::Semantic),
            make("C", OriginTier::Fulltext),
        ]);
        assert_eq!(counts.exact, 0);
        assert_eq!(counts.fulltext, 2);
        assert_eq!(counts.semantic, 1);
    }

    #[test]
    fn test_enrichment_leaves_original_untouched() {
        let symbol = Symbol::new("Load", SymbolKind::Method, "a.cs", 3, "csharp");
        let candidate = SymbolCandidate::from_symbol(symbol, 1.0, OriginTier::Exact);
        let enriched = candidate.with_reference_count(Some(4));
        assert_eq!(candidate.reference_count, None);
        assert_eq!(enriched.reference_count, Some(4));
    }
}
