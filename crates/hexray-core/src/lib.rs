//! Hexray Core - Elixir code intelligence via multi-phase extraction
//!
//! This crate is the extraction / graph / incremental-refresh engine behind
//! the hexray tool:
//! - Multi-phase extraction (tree-sitter syntax, compiler tracer, xref
//!   manifest, Phoenix routes, Ecto schemas, typespecs, diagnostics)
//! - A typed record model with confidence merging across phases
//! - A manifest + JSONL record store with atomic rewrite and streaming read
//! - Fingerprint-based incremental refresh over the module dependency graph
//! - The navigation query engine (definition, references, BFS
//!   callers/callees, routes, schemas, impact analysis)

pub mod changes;
pub mod config;
pub mod discovery;
pub mod extract;
pub mod indexer;
pub mod merge;
pub mod parser;
pub mod query;
pub mod records;
pub mod store;

// Re-exports for convenience
pub use changes::{detect_changes, ChangeSet};
pub use config::{IndexConfig, INDEX_DIR_NAME, MODULE_DENYLIST};
pub use discovery::{discover_sources, SourceFile};
pub use indexer::{IndexOutcome, Indexer, IndexerError, RefreshStatus};
pub use query::{GraphHit, ImpactResult, QueryEngine, QueryError};
pub use records::{
    CallRef, Confidence, DepEdge, DepType, Diagnostic, DirectiveKind, DirectiveRef, Envelope,
    FunctionDef, Mfa, ModuleDef, Record, Route, Schema, Severity, Source, StructDef, TypeDef,
    TypeSpec, Visibility, INDEX_SCHEMA_VERSION,
};
pub use store::{FileState, IndexStore, Manifest, StoreError};
