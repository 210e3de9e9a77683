//! Status command
//!
//! Reports what the index knows about a project without touching it.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use hexray_core::IndexStore;

use crate::GlobalOptions;

/// Show index status for a project
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Project root (default: current directory)
    #[arg(long)]
    path: Option<PathBuf>,
}

pub async fn execute(args: StatusArgs, _global: GlobalOptions) -> Result<()> {
    let root = super::resolve_root(args.path);
    let store = IndexStore::for_project(&root);

    if !store.index_exists() {
        return super::emit_json(&serde_json::json!({
            "indexed": false,
            "index_dir": store.index_dir().display().to_string(),
        }));
    }

    let manifest = store.read_manifest()?;
    super::emit_json(&serde_json::json!({
        "indexed": true,
        "index_dir": store.index_dir().display().to_string(),
        "schema_version": manifest.schema_version,
        "schema_compatible": manifest.schema_compatible(),
        "tool_version": manifest.tool_version,
        "project_root": manifest.project_root,
        "record_count": manifest.record_count,
        "file_count": manifest.file_count,
        "module_count": manifest.modules.len(),
        "generated_at": manifest.generated_at,
    }))
}
