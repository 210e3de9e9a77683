//! Clean command
//!
//! Removes a project's `.hexray` directory.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use hexray_core::IndexStore;
use tracing::info;

use crate::GlobalOptions;

/// Remove the index directory
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Project root (default: current directory)
    #[arg(long)]
    path: Option<PathBuf>,
}

pub async fn execute(args: CleanArgs, _global: GlobalOptions) -> Result<()> {
    let root = super::resolve_root(args.path);
    let store = IndexStore::for_project(&root);

    let existed = store.index_exists() || store.index_dir().exists();
    store.clear()?;
    if existed {
        info!("Removed {}", store.index_dir().display());
    }

    super::emit_json(&serde_json::json!({
        "success": true,
        "removed": existed,
    }))
}
