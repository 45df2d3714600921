//! Tantivy-backed full-text index over source documents.
//!
//! One document per source file. Declaration names are indexed twice: as
//! written and split on case boundaries, so `UserService` also matches a
//! search for `service`. Declaration metadata travels with the document as a
//! stored JSON blob (`type_info`) and is decoded by the resolver.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tantivy::{
    Index, IndexReader, IndexSettings, IndexWriter, ReloadPolicy, TantivyDocument as Document,
    Term,
    collector::TopDocs,
    directory::MmapDirectory,
    query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, Query, QueryParser, TermQuery},
    schema::{
        Field, IndexRecordOption, STORED, STRING, Schema, SchemaBuilder, TextFieldIndexing,
        TextOptions, Value,
    },
};

use super::{
    BackendError, BackendResult, FullTextIndex, FullTextQuery, Hit, IndexedDocument, SearchField,
    fields,
};
use crate::resolver::fuzzy::simple_name;
use crate::utils::split_words;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Schema fields for the source document index
#[derive(Debug, Clone)]
pub struct SourceSchema {
    pub workspace: Field,
    pub path: Field,
    pub language: Field,
    pub symbol_names: Field,
    pub content: Field,
    pub kinds: Field,
    pub type_info: Field,
}

impl SourceSchema {
    pub fn build() -> (Schema, SourceSchema) {
        let mut builder = SchemaBuilder::default();

        // Exact-match filters
        let workspace = builder.add_text_field("workspace", STRING);
        let path = builder.add_text_field(fields::PATH, STRING | STORED);
        let language = builder.add_text_field(fields::LANGUAGE, STRING | STORED);
        let kinds = builder.add_text_field("kinds", STRING);

        let text_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("default")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
        let symbol_names = builder.add_text_field("symbol_names", text_options.clone());
        let content = builder.add_text_field("content", text_options);

        let type_info = builder.add_text_field(fields::TYPE_INFO, STORED);

        let schema = builder.build();
        let source_schema = SourceSchema {
            workspace,
            path,
            language,
            symbol_names,
            content,
            kinds,
            type_info,
        };

        (schema, source_schema)
    }

    fn field_for(&self, field: SearchField) -> Field {
        match field {
            SearchField::SymbolName => self.symbol_names,
            SearchField::Content => self.content,
        }
    }
}

/// Split `UserService` / `user_service` into `user service`.
fn split_identifier(name: &str) -> String {
    split_words(name).join(" ")
}

pub struct TantivyFullTextIndex {
    index: Index,
    reader: IndexReader,
    schema: SourceSchema,
    index_path: Option<PathBuf>,
    writer: Mutex<Option<IndexWriter<Document>>>,
}

impl std::fmt::Debug for TantivyFullTextIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyFullTextIndex")
            .field("index_path", &self.index_path)
            .field("schema", &self.schema)
            .finish()
    }
}

impl TantivyFullTextIndex {
    /// Index held entirely in RAM.
    pub fn in_memory() -> BackendResult<Self> {
        let (schema, source_schema) = SourceSchema::build();
        let index = Index::create_in_ram(schema);
        Self::from_index(index, source_schema, None)
    }

    /// Create or open an on-disk index.
    pub fn open(index_path: impl AsRef<Path>) -> BackendResult<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&index_path)?;

        let (schema, source_schema) = SourceSchema::build();
        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path)?
        } else {
            let dir = MmapDirectory::open(&index_path)?;
            Index::create(dir, schema, IndexSettings::default())?
        };

        Self::from_index(index, source_schema, Some(index_path))
    }

    fn from_index(
        index: Index,
        schema: SourceSchema,
        index_path: Option<PathBuf>,
    ) -> BackendResult<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        reader.reload()?;

        Ok(Self {
            index,
            reader,
            schema,
            index_path,
            writer: Mutex::new(None),
        })
    }

    /// Start a batch operation for adding multiple documents
    pub fn start_batch(&self) -> BackendResult<()> {
        let mut writer = self.writer.lock();
        if writer.is_none() {
            *writer = Some(
                self.index
                    .writer_with_num_threads::<Document>(1, WRITER_HEAP_BYTES)?,
            );
        }
        Ok(())
    }

    /// Add a document to the index (must call start_batch first)
    pub fn add_document(&self, workspace: &str, document: &IndexedDocument) -> BackendResult<()> {
        let mut writer_lock = self.writer.lock();
        let writer = writer_lock.as_mut().ok_or(BackendError::NoActiveBatch)?;

        let mut doc = Document::new();
        doc.add_text(self.schema.workspace, workspace);
        doc.add_text(self.schema.path, &document.path);
        doc.add_text(self.schema.language, &document.language);
        doc.add_text(self.schema.content, &document.content);

        for name in document.declaration_names() {
            doc.add_text(self.schema.symbol_names, name);
            doc.add_text(self.schema.symbol_names, split_identifier(name));
        }
        for decl in &document.type_info.types {
            doc.add_text(self.schema.kinds, decl.kind.as_str());
        }
        if !document.type_info.methods.is_empty() {
            doc.add_text(self.schema.kinds, "method");
            doc.add_text(self.schema.kinds, "function");
        }

        let type_info = serde_json::to_string(&document.type_info)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        doc.add_text(self.schema.type_info, type_info);

        writer.add_document(doc)?;
        Ok(())
    }

    /// Commit the current batch and reload the reader
    pub fn commit_batch(&self) -> BackendResult<()> {
        let mut writer_lock = self.writer.lock();
        if let Some(mut writer) = writer_lock.take() {
            writer.commit()?;
            self.reader.reload()?;
        }
        Ok(())
    }

    /// Index a set of documents in one batch.
    pub fn index_documents<'a>(
        &self,
        workspace: &str,
        documents: impl IntoIterator<Item = &'a IndexedDocument>,
    ) -> BackendResult<()> {
        self.start_batch()?;
        for document in documents {
            self.add_document(workspace, document)?;
        }
        self.commit_batch()
    }

    pub fn document_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }

    fn build_query(&self, workspace: &str, query: &FullTextQuery) -> Box<dyn Query> {
        let field = self.schema.field_for(query.field);

        let parser = QueryParser::for_index(&self.index, vec![field]);
        let (parsed, errors) = parser.parse_query_lenient(&query.text);
        if !errors.is_empty() {
            tracing::debug!(target: "fulltext", "lenient parse of '{}': {} issue(s)", query.text, errors.len());
        }

        let mut matching: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Should, parsed)];
        if query.fuzzy && query.field == SearchField::SymbolName {
            let token: String = simple_name(&query.text)
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            if !token.is_empty() {
                let term = Term::from_field_text(self.schema.symbol_names, &token);
                matching.push((Occur::Should, Box::new(FuzzyTermQuery::new(term, 1, true))));
            }
        }

        let workspace_term = Term::from_field_text(self.schema.workspace, workspace);
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![
            (
                Occur::Must,
                Box::new(TermQuery::new(workspace_term, IndexRecordOption::Basic)),
            ),
            (Occur::Must, Box::new(BooleanQuery::new(matching))),
        ];

        if let Some(kind) = query.kind_hint {
            let kind_term = Term::from_field_text(self.schema.kinds, kind.as_str());
            let kind_query = TermQuery::new(kind_term, IndexRecordOption::Basic);
            clauses.push((Occur::Should, Box::new(BoostQuery::new(Box::new(kind_query), 2.0))));
        }

        Box::new(BooleanQuery::new(clauses))
    }
}

#[async_trait]
impl FullTextIndex for TantivyFullTextIndex {
    async fn search(
        &self,
        workspace: &str,
        query: &FullTextQuery,
        max_results: usize,
    ) -> BackendResult<Vec<Hit>> {
        if query.text.trim().is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        let tantivy_query = self.build_query(workspace, query);
        let searcher = self.reader.searcher();
        let schema = self.schema.clone();

        // Searching is CPU-bound; keep it off the async workers
        tokio::task::spawn_blocking(move || -> BackendResult<Vec<Hit>> {
            let top_docs = searcher.search(&*tantivy_query, &TopDocs::with_limit(max_results))?;

            let mut hits = Vec::with_capacity(top_docs.len());
            for (score, doc_address) in top_docs {
                let doc: Document = searcher.doc(doc_address)?;
                let mut stored = std::collections::BTreeMap::new();
                for (field, name) in [
                    (schema.path, fields::PATH),
                    (schema.language, fields::LANGUAGE),
                    (schema.type_info, fields::TYPE_INFO),
                ] {
                    if let Some(value) = doc.get_first(field).and_then(|v| v.as_str()) {
                        stored.insert(name.to_string(), value.to_string());
                    }
                }
                hits.push(Hit {
                    score,
                    fields: stored,
                });
            }
            Ok(hits)
        })
        .await
        .map_err(|e| BackendError::query("fulltext", e.to_string()))?
    }
}
