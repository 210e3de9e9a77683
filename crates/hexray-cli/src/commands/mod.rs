//! CLI command implementations

pub mod clean;
pub mod index;
pub mod mcp;
pub mod query;
pub mod status;

use std::path::PathBuf;

use hexray_core::IndexConfig;

/// Resolve the project root: an explicit `--path`, else the current
/// directory.
pub fn resolve_root(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Build the index configuration a command should run with.
pub fn index_config(path: Option<PathBuf>, no_compile: bool) -> IndexConfig {
    let config = IndexConfig::new(resolve_root(path));
    if no_compile {
        config.without_compiler_phases()
    } else {
        config
    }
}

/// Print the machine-readable result object to stdout.
pub fn emit_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
