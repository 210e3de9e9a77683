//! Query command
//!
//! One subcommand, many query types: the type is a free-form argument so
//! unknown types surface as an error string rather than a parse failure.
//! Every query refreshes the index first.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use hexray_core::{Indexer, QueryEngine};
use tracing::debug;

use crate::GlobalOptions;

/// Query the code index
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Query type: definition | references | callers | callees | routes |
    /// schema | impact | spec | types | diagnostics
    query_type: String,

    /// Function reference (Module.name/arity), for function queries
    #[arg(long)]
    mfa: Option<String>,

    /// Module name, for schema/types queries
    #[arg(long)]
    module: Option<String>,

    /// Files for impact analysis (comma separated or repeated)
    #[arg(long, value_delimiter = ',')]
    files: Vec<String>,

    /// Traversal depth for callers/callees
    #[arg(long, default_value_t = 1)]
    depth: i64,

    /// Project root (default: current directory)
    #[arg(long)]
    path: Option<PathBuf>,
}

pub async fn execute(args: QueryArgs, global: GlobalOptions) -> Result<()> {
    let config = super::index_config(args.path.clone(), global.no_compile);
    let indexer = Indexer::new(config);
    let engine = QueryEngine::new(indexer.store().clone());

    // Queries always answer against the tree on disk.
    let status = tokio::task::spawn_blocking({
        let indexer = indexer.clone();
        move || indexer.ensure_current()
    })
    .await?
    .context("Index refresh failed")?;
    debug!("Index state: {}", status.as_str());

    let query_type = args.query_type.clone();
    let value = tokio::task::spawn_blocking(move || run_query(&engine, &args)).await??;
    super::emit_json(&serde_json::json!({
        "query": query_type,
        "results": value,
    }))
}

fn run_query(engine: &QueryEngine, args: &QueryArgs) -> Result<serde_json::Value> {
    let mfa = || -> Result<&str> {
        args.mfa
            .as_deref()
            .context("this query type requires --mfa")
    };
    let module = || -> Result<&str> {
        args.module
            .as_deref()
            .context("this query type requires --module")
    };

    let value = match args.query_type.as_str() {
        "definition" => {
            let defs: Vec<_> = engine.definition(mfa()?)?.into_iter().collect();
            serde_json::to_value(defs)?
        }
        "references" => serde_json::to_value(engine.references(mfa()?)?)?,
        "callers" => serde_json::to_value(engine.callers(mfa()?, args.depth)?)?,
        "callees" => serde_json::to_value(engine.callees(mfa()?, args.depth)?)?,
        "routes" => serde_json::to_value(engine.routes()?)?,
        "schema" => {
            let schemas: Vec<_> = engine.schema(module()?)?.into_iter().collect();
            serde_json::to_value(schemas)?
        }
        "impact" => {
            if args.files.is_empty() {
                bail!("the impact query requires --files");
            }
            serde_json::to_value(engine.impact(&args.files)?)?
        }
        "spec" => serde_json::to_value(engine.function_specs(mfa()?)?)?,
        "types" => serde_json::to_value(engine.module_types(module()?)?)?,
        "diagnostics" => serde_json::to_value(engine.diagnostics()?)?,
        other => bail!("unknown query type: {}", other),
    };
    Ok(value)
}
