pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod io;
pub mod logging;
pub mod resolver;
pub mod semantic;
pub mod service;
pub mod storage;
pub mod trace;
pub mod types;
pub mod utils;

pub use types::*;
pub use cache::{CacheCoordinator, InvalidationStrategy, NoopCache, SetOptions, TwoLevelCache};
pub use config::Settings;
pub use error::{CodeSearchError, CodeSearchResult, ErrorCode};
pub use graph::{AnalyzeOptions, DependencyGraphAnalyzer, Direction, GraphAnalysisResult, GraphAnalyzer};
pub use io::Envelope;
pub use resolver::{ResolveOptions, Resolver, TieredSymbolResolver};
pub use semantic::{MemorySemanticIndex, SemanticIndex};
pub use service::{CacheManageResult, CacheOperation, CodeSearchService};
pub use storage::{ExactMatchStore, FullTextIndex, MemoryFullTextIndex, MemorySymbolStore, TantivyFullTextIndex};
pub use trace::{CallPathResult, CallPathTracer, TraceDirection, TraceOptions, Tracer};
