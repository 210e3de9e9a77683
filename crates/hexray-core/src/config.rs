//! Index Configuration
//!
//! Where to look for sources, what to skip, and how the external compiler
//! is invoked. Defaults cover a conventional Mix project (plain or umbrella);
//! everything is overridable by the embedding CLI or server.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the hidden directory the index lives in.
pub const INDEX_DIR_NAME: &str = ".hexray";

/// Modules whose calls the compiler-backed phases drop as noise.
///
/// Meta-programming and compiler-internal modules only; data-structure
/// stdlib calls (Enum, Map, String) are kept since those are the references
/// a navigation user wants to see.
pub const MODULE_DENYLIST: &[&str] = &[
    "Kernel",
    "Kernel.SpecialForms",
    "Kernel.Utils",
    "Kernel.LexicalTracker",
    "Kernel.Typespec",
    "Protocol",
    "Module",
    "Macro",
    "Macro.Env",
    "Code",
    "Record",
    ":elixir_bootstrap",
    ":elixir_def",
    ":elixir_module",
    ":elixir_quote",
    ":elixir_utils",
    ":erlang",
];

/// Configuration for one indexing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Absolute path to the project root.
    pub project_root: PathBuf,
    /// Root-relative directories scanned for `.ex`/`.exs` sources.
    pub source_roots: Vec<String>,
    /// Directory names never descended into.
    pub exclude_dirs: HashSet<String>,
    /// Soft per-file parse timeout for the syntactic worker pool.
    pub parse_timeout_micros: u64,
    /// Whether the compiler-backed phases (tracer, xref, diagnostics) run.
    pub enable_compiler_phases: bool,
    /// Executable used to drive the target project (`mix`).
    pub mix_command: String,
    /// Executable used to run adapter scripts (`elixir`).
    pub elixir_command: String,
}

impl IndexConfig {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let exclude_dirs: HashSet<String> = [
            "_build",
            "deps",
            "node_modules",
            "priv",
            "assets",
            "cover",
            "doc",
            ".elixir_ls",
            ".git",
            INDEX_DIR_NAME,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            project_root: project_root.into(),
            source_roots: vec!["lib".into(), "apps".into(), "test".into(), "config".into()],
            exclude_dirs,
            parse_timeout_micros: 2_000_000,
            enable_compiler_phases: true,
            mix_command: "mix".into(),
            elixir_command: "elixir".into(),
        }
    }

    /// Disable the subprocess-backed phases (used by tests and offline runs).
    pub fn without_compiler_phases(mut self) -> Self {
        self.enable_compiler_phases = false;
        self
    }

    /// `.hexray` directory for this project.
    pub fn index_dir(&self) -> PathBuf {
        self.project_root.join(INDEX_DIR_NAME)
    }

    /// Extractor-owned scratch directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.index_dir().join("cache")
    }

    /// Whether a root-relative path lies under a test root.
    pub fn is_test_file(&self, rel_path: &str) -> bool {
        is_test_path(rel_path)
    }

    /// Whether a module is on the uniform extractor denylist.
    pub fn is_denied_module(&self, module: &str) -> bool {
        MODULE_DENYLIST.contains(&module)
    }
}

/// Whether a root-relative path lies under a test root
/// (`test/` or `apps/<app>/test/`).
pub fn is_test_path(rel_path: &str) -> bool {
    let rel_path = rel_path.replace('\\', "/");
    if rel_path.starts_with("test/") {
        return true;
    }
    if let Some(rest) = rel_path.strip_prefix("apps/") {
        if let Some((_, tail)) = rest.split_once('/') {
            return tail.starts_with("test/");
        }
    }
    false
}

/// Normalize a path for record attribution: relative to the project root
/// where possible, forward slashes always.
pub fn normalize_path(project_root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(project_root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}
