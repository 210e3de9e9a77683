//! MCP Tool parameter definitions
//!
//! These structs define the JSON Schema for tool parameters using schemars.

use rmcp::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

/// Parameters for the index tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexParams {
    /// Project root to index
    #[schemars(
        description = "Path to the Elixir project root (defaults to the server's configured root)"
    )]
    pub path: Option<String>,
}

/// Parameters for tools addressing a single function
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MfaParams {
    /// Fully-qualified function reference
    #[schemars(description = "Function reference as Module.name/arity (e.g. \"MyApp.Accounts.get_user/1\")")]
    pub mfa: String,
}

/// Parameters for caller/callee traversal
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TraversalParams {
    /// Fully-qualified function reference
    #[schemars(description = "Function reference as Module.name/arity")]
    pub mfa: String,

    /// Traversal depth
    #[schemars(description = "How many call levels to traverse (default 1)")]
    pub depth: Option<i64>,
}

/// Parameters for module-scoped tools
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModuleParams {
    /// Fully-qualified module name
    #[schemars(description = "Module name (e.g. \"MyApp.User\")")]
    pub module: String,
}

/// Parameters for impact analysis
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImpactParams {
    /// Files to analyze
    #[schemars(description = "Project-relative source files to analyze (e.g. [\"lib/my_app/accounts.ex\"])")]
    pub files: Vec<String>,
}

/// Parameters for tools that take no arguments
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmptyParams {}
