//! Lookup backends consumed by the resolution engine.
//!
//! The engine only talks to these traits. Population of the stores (parsing,
//! tokenizing, writing the index) happens elsewhere; the adapters in this
//! module exist so the engine can run against a real inverted index or an
//! in-memory table.

pub mod error;
pub mod memory;
pub mod tantivy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Reference, Symbol, SymbolKind, SymbolRef};

pub use error::{BackendError, BackendResult};
pub use memory::{MemoryFullTextIndex, MemorySymbolStore};
pub use self::tantivy::TantivyFullTextIndex;

/// Authoritative structured symbol table (declarations plus extracted identifiers).
#[async_trait]
pub trait ExactMatchStore: Send + Sync {
    async fn find_by_name(&self, name: &str, case_sensitive: bool) -> BackendResult<Vec<Symbol>>;

    async fn count_references_by_name(&self, name: &str) -> BackendResult<usize>;

    /// Usages of `target` anywhere in the workspace.
    async fn find_references_to(&self, target: &SymbolRef) -> BackendResult<Vec<Reference>>;

    /// Identifiers referenced from inside the body of `source`.
    async fn find_references_from(&self, source: &SymbolRef) -> BackendResult<Vec<Reference>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    SymbolName,
    Content,
}

impl SearchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SymbolName => "symbol_names",
            Self::Content => "content",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FullTextQuery {
    pub text: String,
    pub field: SearchField,
    /// Boost documents declaring this kind; never a hard filter.
    pub kind_hint: Option<SymbolKind>,
    pub fuzzy: bool,
}

impl FullTextQuery {
    pub fn new(text: impl Into<String>, field: SearchField) -> Self {
        Self {
            text: text.into(),
            field,
            kind_hint: None,
            fuzzy: false,
        }
    }

    pub fn with_kind_hint(mut self, kind: Option<SymbolKind>) -> Self {
        self.kind_hint = kind;
        self
    }

    pub fn fuzzy(mut self, fuzzy: bool) -> Self {
        self.fuzzy = fuzzy;
        self
    }
}

/// Well-known stored field names on full-text hits.
pub mod fields {
    pub const PATH: &str = "path";
    pub const LANGUAGE: &str = "language";
    pub const TYPE_INFO: &str = "type_info";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub score: f32,
    pub fields: BTreeMap<String, String>,
}

impl Hit {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn path(&self) -> Option<&str> {
        self.field(fields::PATH)
    }

    /// Decode the structured declaration metadata stored with the document.
    ///
    /// A missing field yields `Ok(None)`; malformed JSON is an error so the
    /// caller can log it.
    pub fn type_info(&self) -> Result<Option<TypeInfo>, serde_json::Error> {
        match self.field(fields::TYPE_INFO) {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).map(Some),
            _ => Ok(None),
        }
    }
}

/// Declarations extracted from one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub types: Vec<TypeDeclaration>,
    #[serde(default)]
    pub methods: Vec<MethodDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDeclaration {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default)]
    pub signature: Option<String>,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub base_type: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDeclaration {
    pub name: String,
    #[serde(default)]
    pub signature: Option<String>,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default)]
    pub containing_type: Option<String>,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

impl TypeInfo {
    /// Name of the first declared type, used as the component a text hit belongs to.
    pub fn primary_type(&self) -> Option<&str> {
        self.types.first().map(|t| t.name.as_str())
    }

    /// Every declaration as a `Symbol` located in `file_path`.
    pub fn symbols(&self, file_path: &str) -> Vec<Symbol> {
        let mut symbols = Vec::with_capacity(self.types.len() + self.methods.len());

        for decl in &self.types {
            let mut symbol = Symbol::new(
                decl.name.clone(),
                decl.kind,
                file_path,
                decl.line,
                self.language.clone(),
            )
            .with_column(decl.column)
            .with_modifiers(decl.modifiers.iter().cloned())
            .with_interfaces(decl.interfaces.iter().cloned());
            symbol.signature = decl.signature.clone();
            symbol.base_type = decl.base_type.clone();
            symbol.namespace = self.namespace.clone();
            symbols.push(symbol);
        }

        for decl in &self.methods {
            let kind = if decl.containing_type.is_some() {
                SymbolKind::Method
            } else {
                SymbolKind::Function
            };
            let mut symbol = Symbol::new(
                decl.name.clone(),
                kind,
                file_path,
                decl.line,
                self.language.clone(),
            )
            .with_column(decl.column)
            .with_modifiers(decl.modifiers.iter().cloned());
            symbol.signature = decl.signature.clone();
            symbol.containing_type = decl.containing_type.clone();
            symbol.namespace = self.namespace.clone();
            symbols.push(symbol);
        }

        symbols
    }
}

/// A document as handed to a full-text adapter for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub path: String,
    pub language: String,
    pub content: String,
    pub type_info: TypeInfo,
}

impl IndexedDocument {
    pub fn new(
        path: impl Into<String>,
        language: impl Into<String>,
        content: impl Into<String>,
        type_info: TypeInfo,
    ) -> Self {
        Self {
            path: path.into(),
            language: language.into(),
            content: content.into(),
            type_info,
        }
    }

    pub fn declaration_names(&self) -> impl Iterator<Item = &str> {
        self.type_info
            .types
            .iter()
            .map(|t| t.name.as_str())
            .chain(self.type_info.methods.iter().map(|m| m.name.as_str()))
    }

    pub fn declares_kind(&self, kind: SymbolKind) -> bool {
        self.type_info.types.iter().any(|t| t.kind == kind)
            || (kind.is_callable() && !self.type_info.methods.is_empty())
    }

    /// Stored fields returned with every hit on this document.
    pub fn stored_fields(&self) -> BTreeMap<String, String> {
        let mut stored = BTreeMap::new();
        stored.insert(fields::PATH.to_string(), self.path.clone());
        stored.insert(fields::LANGUAGE.to_string(), self.language.clone());
        if let Ok(json) = serde_json::to_string(&self.type_info) {
            stored.insert(fields::TYPE_INFO.to_string(), json);
        }
        stored
    }
}

/// Inverted-index search over document content and declaration metadata.
#[async_trait]
pub trait FullTextIndex: Send + Sync {
    async fn search(
        &self,
        workspace: &str,
        query: &FullTextQuery,
        max_results: usize,
    ) -> BackendResult<Vec<Hit>>;
}
