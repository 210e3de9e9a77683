//! Source File Discovery
//!
//! Enumerates the `.ex`/`.exs` files of a project with a stable ordering so
//! that repeated runs see the same file list in the same order.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{normalize_path, IndexConfig};

/// Errors during source discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Project root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// A discovered source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Root-relative path with forward slashes; the form records carry.
    pub rel_path: String,
}

/// Whether a path names an Elixir source file.
pub fn is_elixir_source(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("ex") | Some("exs")
    )
}

/// Enumerate the project's source files, sorted by relative path.
///
/// Walks the configured source roots with gitignore awareness, skipping the
/// configured exclude directories. Roots that do not exist contribute
/// nothing (a plain project has no `apps/`, an umbrella may have no `lib/`).
pub fn discover_sources(config: &IndexConfig) -> Result<Vec<SourceFile>> {
    let root = config
        .project_root
        .canonicalize()
        .map_err(|_| DiscoveryError::RootNotFound(config.project_root.clone()))?;

    let mut files = Vec::new();

    for source_root in &config.source_roots {
        let base = root.join(source_root);
        if !base.is_dir() {
            continue;
        }

        let exclude_dirs = config.exclude_dirs.clone();
        let walker = WalkBuilder::new(&base)
            .follow_links(false)
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .filter_entry(move |entry| {
                if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !exclude_dirs.contains(name.as_ref())
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error walking {}: {}", base.display(), e);
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            if !is_elixir_source(path) {
                continue;
            }
            files.push(SourceFile {
                path: path.to_path_buf(),
                rel_path: normalize_path(&root, path),
            });
        }
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    files.dedup_by(|a, b| a.rel_path == b.rel_path);

    debug!("Discovered {} source files under {:?}", files.len(), root);
    Ok(files)
}
