//! Hexray MCP Server
//!
//! Exposes the hexray code graph as MCP tools over stdio so AI assistants
//! can navigate an Elixir codebase: definition and reference lookup,
//! transitive callers/callees, routes, schemas, typespecs, diagnostics and
//! impact analysis. Every query tool brings the index up to date first.

pub mod error;
pub mod server;
pub mod tools;

pub use error::{Result, ServerError};
pub use server::{HexrayServer, ServerConfig};
