//! Hexray MCP Server implementation
//!
//! Implements the MCP server using the rmcp SDK, exposing:
//! - Index management (index)
//! - Function navigation (function_definition, function_references,
//!   function_callers, function_callees)
//! - DSL views (routes, schema)
//! - Types and diagnostics (function_spec, module_types, type_errors)
//! - Change analysis (impact_analysis)
//!
//! Every query tool calls `ensure_index_current` first, so answers always
//! reflect the tree on disk. Indexing is serialized behind a mutex: the
//! store allows one writer per project root.

use std::path::PathBuf;
use std::sync::Arc;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use tracing::{debug, info};

use hexray_core::{IndexConfig, Indexer, QueryEngine, QueryError, RefreshStatus};

use crate::tools::*;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the project root being served
    pub project_root: PathBuf,
    /// Whether the compiler-backed phases run during (re)indexing
    pub enable_compiler_phases: bool,
}

impl ServerConfig {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            enable_compiler_phases: true,
        }
    }

    pub fn without_compiler_phases(mut self) -> Self {
        self.enable_compiler_phases = false;
        self
    }

    fn index_config(&self) -> IndexConfig {
        let config = IndexConfig::new(&self.project_root);
        if self.enable_compiler_phases {
            config
        } else {
            config.without_compiler_phases()
        }
    }
}

/// Hexray MCP server exposing code-graph tools
#[derive(Clone)]
pub struct HexrayServer {
    indexer: Arc<Indexer>,
    engine: Arc<QueryEngine>,
    /// Serializes indexing runs; the store permits a single writer.
    index_lock: Arc<tokio::sync::Mutex<()>>,
    tool_router: ToolRouter<Self>,
}

fn to_mcp_error(e: impl std::fmt::Display) -> McpError {
    McpError::internal_error(e.to_string(), None)
}

fn query_error(e: QueryError) -> McpError {
    match e {
        QueryError::NoIndex(path) => McpError::invalid_request(
            format!("No index at {}; call the index tool first", path.display()),
            None,
        ),
        other => to_mcp_error(other),
    }
}

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_default(),
    )]))
}

#[tool_router]
impl HexrayServer {
    /// Create a new server instance
    pub fn new(config: ServerConfig) -> crate::Result<Self> {
        info!("Initializing hexray MCP server");
        info!("  Project: {}", config.project_root.display());

        if !config.project_root.is_dir() {
            return Err(crate::ServerError::Index(format!(
                "Project root does not exist: {}",
                config.project_root.display()
            )));
        }

        let index_config = config.index_config();
        let indexer = Indexer::new(index_config);
        let engine = QueryEngine::new(indexer.store().clone());

        Ok(Self {
            indexer: Arc::new(indexer),
            engine: Arc::new(engine),
            index_lock: Arc::new(tokio::sync::Mutex::new(())),
            tool_router: Self::tool_router(),
        })
    }

    /// Bring the index up to date before answering a query.
    async fn ensure_index_current(&self) -> Result<RefreshStatus, McpError> {
        let _guard = self.index_lock.lock().await;
        let indexer = Arc::clone(&self.indexer);
        let status = tokio::task::spawn_blocking(move || indexer.ensure_current())
            .await
            .map_err(to_mcp_error)?
            .map_err(to_mcp_error)?;
        debug!("ensure_index_current: {}", status.as_str());
        Ok(status)
    }

    async fn run_query<T, F>(&self, query: F) -> Result<T, McpError>
    where
        T: Send + 'static,
        F: FnOnce(&QueryEngine) -> Result<T, QueryError> + Send + 'static,
    {
        self.ensure_index_current().await?;
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || query(&engine))
            .await
            .map_err(to_mcp_error)?
            .map_err(query_error)
    }

    // =========================================================================
    // MCP Tools
    // =========================================================================

    #[tool(
        name = "index",
        description = "Build (or rebuild) the code index for the project. Run this once per project, or after large changes; query tools refresh incrementally on their own."
    )]
    async fn index(
        &self,
        Parameters(params): Parameters<IndexParams>,
    ) -> Result<CallToolResult, McpError> {
        let _guard = self.index_lock.lock().await;

        let indexer = match params.path {
            Some(path) => {
                let config = IndexConfig::new(PathBuf::from(path));
                Arc::new(Indexer::new(config))
            }
            None => Arc::clone(&self.indexer),
        };

        let outcome = tokio::task::spawn_blocking(move || indexer.index())
            .await
            .map_err(to_mcp_error)?
            .map_err(to_mcp_error)?;

        json_result(serde_json::json!({
            "success": true,
            "records_indexed": outcome.records_indexed,
            "files_indexed": outcome.files_indexed,
        }))
    }

    #[tool(
        name = "function_definition",
        description = "Find where a function is defined. Takes an MFA like \"MyApp.Accounts.get_user/1\"; returns zero or one definition with file, line span, visibility, and macro flag."
    )]
    async fn function_definition(
        &self,
        Parameters(params): Parameters<MfaParams>,
    ) -> Result<CallToolResult, McpError> {
        let mfa = params.mfa;
        let def = self.run_query(move |e| e.definition(&mfa)).await?;
        let defs: Vec<_> = def.into_iter().collect();
        json_result(serde_json::to_value(defs).map_err(to_mcp_error)?)
    }

    #[tool(
        name = "function_references",
        description = "Find every call site of a function. Takes an MFA; returns caller, file, and line for each reference, sorted by location."
    )]
    async fn function_references(
        &self,
        Parameters(params): Parameters<MfaParams>,
    ) -> Result<CallToolResult, McpError> {
        let mfa = params.mfa;
        let refs = self.run_query(move |e| e.references(&mfa)).await?;
        json_result(serde_json::to_value(refs).map_err(to_mcp_error)?)
    }

    #[tool(
        name = "function_callers",
        description = "Who calls this function, transitively? Takes an MFA and a depth (default 1); returns discovered callers with their distance in call levels."
    )]
    async fn function_callers(
        &self,
        Parameters(params): Parameters<TraversalParams>,
    ) -> Result<CallToolResult, McpError> {
        let mfa = params.mfa;
        let depth = params.depth.unwrap_or(1);
        let hits = self.run_query(move |e| e.callers(&mfa, depth)).await?;
        json_result(serde_json::to_value(hits).map_err(to_mcp_error)?)
    }

    #[tool(
        name = "function_callees",
        description = "What does this function call, transitively? Takes an MFA and a depth (default 1); returns discovered callees with their distance in call levels."
    )]
    async fn function_callees(
        &self,
        Parameters(params): Parameters<TraversalParams>,
    ) -> Result<CallToolResult, McpError> {
        let mfa = params.mfa;
        let depth = params.depth.unwrap_or(1);
        let hits = self.run_query(move |e| e.callees(&mfa, depth)).await?;
        json_result(serde_json::to_value(hits).map_err(to_mcp_error)?)
    }

    #[tool(
        name = "routes",
        description = "List every HTTP route the routers define, fully expanded (scopes folded, resources exploded into CRUD actions), sorted by verb and path."
    )]
    async fn routes(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        let routes = self.run_query(|e| e.routes()).await?;
        json_result(serde_json::to_value(routes).map_err(to_mcp_error)?)
    }

    #[tool(
        name = "schema",
        description = "Show the Ecto schema a module defines: table source, typed fields, and associations. Takes a module name like \"MyApp.User\"."
    )]
    async fn schema(
        &self,
        Parameters(params): Parameters<ModuleParams>,
    ) -> Result<CallToolResult, McpError> {
        let module = params.module;
        let schema = self.run_query(move |e| e.schema(&module)).await?;
        let schemas: Vec<_> = schema.into_iter().collect();
        json_result(serde_json::to_value(schemas).map_err(to_mcp_error)?)
    }

    #[tool(
        name = "impact_analysis",
        description = "What breaks if these files change? Takes project-relative file paths; returns the modules they define, all transitively dependent modules, and the test files covering those modules."
    )]
    async fn impact_analysis(
        &self,
        Parameters(params): Parameters<ImpactParams>,
    ) -> Result<CallToolResult, McpError> {
        let files = params.files;
        let impact = self.run_query(move |e| e.impact(&files)).await?;
        json_result(serde_json::to_value(impact).map_err(to_mcp_error)?)
    }

    #[tool(
        name = "function_spec",
        description = "Show the @spec of a function: parameter types and return type. Takes an MFA."
    )]
    async fn function_spec(
        &self,
        Parameters(params): Parameters<MfaParams>,
    ) -> Result<CallToolResult, McpError> {
        let mfa = params.mfa;
        let specs = self.run_query(move |e| e.function_specs(&mfa)).await?;
        json_result(serde_json::to_value(specs).map_err(to_mcp_error)?)
    }

    #[tool(
        name = "module_types",
        description = "List the types a module defines (@type, @typep, @opaque, @callback, @macrocallback) with their definitions."
    )]
    async fn module_types(
        &self,
        Parameters(params): Parameters<ModuleParams>,
    ) -> Result<CallToolResult, McpError> {
        let module = params.module;
        let types = self.run_query(move |e| e.module_types(&module)).await?;
        json_result(serde_json::to_value(types).map_err(to_mcp_error)?)
    }

    #[tool(
        name = "type_errors",
        description = "List the compiler diagnostics captured during the last indexing compile, sorted by file and line."
    )]
    async fn type_errors(
        &self,
        Parameters(_params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        let diags = self.run_query(|e| e.diagnostics()).await?;
        json_result(serde_json::to_value(diags).map_err(to_mcp_error)?)
    }
}

// Implement ServerHandler for tool routing
#[tool_handler]
impl rmcp::ServerHandler for HexrayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Hexray: code intelligence for Elixir projects.\n\n\
                TOOLS:\n\
                - index: build the index (run once per project)\n\
                - function_definition / function_references: navigate a function\n\
                - function_callers / function_callees: walk the call graph with depth\n\
                - routes: the router's full route table\n\
                - schema: a module's Ecto schema (fields, associations)\n\
                - function_spec / module_types: typespec information\n\
                - type_errors: compiler diagnostics\n\
                - impact_analysis: modules and tests affected by editing given files\n\n\
                MFA format: Module.name/arity (e.g. \"MyApp.Accounts.get_user/1\").\n\
                Query tools keep the index current automatically."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
