//! Extraction Phases
//!
//! Seven phases feed the record store, in a fixed order:
//!
//! 1. [`syntactic`] — tree-sitter pass: declarations, directives, calls
//! 2. [`tracer`] — compiler tracer: resolved calls, compile-time deps
//! 3. [`xref`] — compilation manifest: module dependency edges
//! 4. [`routes`] — Phoenix router DSL
//! 5. [`schemas`] — Ecto schema DSL
//! 6. [`typespecs`] — `@spec`/`@type` annotations
//! 7. [`diagnostics`] — compiler diagnostics
//!
//! Every phase fails softly: a file that cannot be read or parsed, or a
//! subprocess that cannot run, contributes nothing. The merge layer
//! ([`crate::merge`]) reconciles overlapping call records by call-site key.

pub mod adapter;
pub mod diagnostics;
pub mod routes;
pub mod schemas;
pub mod syntactic;
pub mod tracer;
pub mod typespecs;
pub mod xref;
