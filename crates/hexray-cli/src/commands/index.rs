//! Index command
//!
//! Runs a full extraction over the project and rewrites the store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use hexray_core::Indexer;
use tracing::info;

use crate::GlobalOptions;

/// Build or rebuild the code index
#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Project root to index (default: current directory)
    #[arg(long)]
    path: Option<PathBuf>,
}

pub async fn execute(args: IndexArgs, global: GlobalOptions) -> Result<()> {
    let config = super::index_config(args.path, global.no_compile);
    info!("Indexing {}", config.project_root.display());

    let indexer = Indexer::new(config);
    let outcome = tokio::task::spawn_blocking(move || indexer.index())
        .await?
        .context("Indexing failed")?;

    info!(
        "Indexed {} records from {} files",
        outcome.records_indexed, outcome.files_indexed
    );
    super::emit_json(&serde_json::json!({
        "success": true,
        "records_indexed": outcome.records_indexed,
        "files_indexed": outcome.files_indexed,
    }))
}
