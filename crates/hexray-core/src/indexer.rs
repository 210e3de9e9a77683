//! Indexer Orchestration
//!
//! Runs the extraction pipeline end to end: discovery → phases 1–7 → merge
//! → store, and drives incremental refresh from the change detector.
//! `ensure_current` is the entry point queries call before reading the
//! store: it rebuilds on a missing or schema-incompatible index, refreshes
//! when fingerprints moved, and is a no-op otherwise.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::{debug, info};

use crate::changes::{detect_changes, ChangeSet};
use crate::config::IndexConfig;
use crate::discovery::{discover_sources, DiscoveryError, SourceFile};
use crate::extract::{diagnostics, routes, schemas, syntactic, tracer, typespecs, xref};
use crate::merge::{merge, PhaseOutputs};
use crate::records::{Envelope, Record};
use crate::store::{file_state, FileState, IndexStore, Manifest, StoreError};

/// Errors during an indexing run.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, IndexerError>;

/// Summary of one indexing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOutcome {
    pub records_indexed: usize,
    pub files_indexed: usize,
    pub full_rebuild: bool,
}

/// What `ensure_current` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStatus {
    /// The index matched the tree; nothing was touched.
    Current,
    /// Changed and affected files were re-extracted in place.
    Refreshed(IndexOutcome),
    /// The index was missing or incompatible and was rebuilt from scratch.
    Rebuilt(IndexOutcome),
}

impl RefreshStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshStatus::Current => "current",
            RefreshStatus::Refreshed(_) => "refreshed",
            RefreshStatus::Rebuilt(_) => "rebuilt",
        }
    }
}

/// Drives extraction and refresh for one project root.
#[derive(Debug, Clone)]
pub struct Indexer {
    config: IndexConfig,
    store: IndexStore,
}

impl Indexer {
    pub fn new(config: IndexConfig) -> Self {
        let store = IndexStore::new(config.index_dir());
        Self { config, store }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Full build: extract everything and rewrite the store.
    pub fn index(&self) -> Result<IndexOutcome> {
        let files = discover_sources(&self.config)?;
        info!("Indexing {} files", files.len());

        let outputs = self.run_phases(&files, &HashMap::new());
        let records = merge(outputs);
        let manifest = self.build_manifest(&files, &records, None)?;

        self.store.write_records(&records)?;
        self.store.write_manifest(&manifest)?;

        info!("Indexed {} records from {} files", records.len(), files.len());
        Ok(IndexOutcome {
            records_indexed: records.len(),
            files_indexed: files.len(),
            full_rebuild: true,
        })
    }

    /// Bring the index up to date with the tree, doing as little as the
    /// fingerprints allow.
    pub fn ensure_current(&self) -> Result<RefreshStatus> {
        if !self.store.index_exists() {
            debug!("No index present, rebuilding");
            return Ok(RefreshStatus::Rebuilt(self.index()?));
        }

        let manifest = match self.store.read_manifest() {
            Ok(manifest) if manifest.schema_compatible() => manifest,
            Ok(manifest) => {
                info!(
                    "Index schema {} incompatible with {}, rebuilding",
                    manifest.schema_version,
                    crate::records::INDEX_SCHEMA_VERSION
                );
                return Ok(RefreshStatus::Rebuilt(self.index()?));
            }
            Err(e) => {
                debug!("Manifest unreadable ({}), rebuilding", e);
                return Ok(RefreshStatus::Rebuilt(self.index()?));
            }
        };

        let files = discover_sources(&self.config)?;
        let changes = detect_changes(&files, &manifest);
        if !changes.has_changes() {
            debug!("Index is current");
            return Ok(RefreshStatus::Current);
        }

        info!(
            "Refreshing index: {} changed/affected files",
            changes.total_changes()
        );
        let outcome = self.refresh(&files, &manifest, &changes)?;
        Ok(RefreshStatus::Refreshed(outcome))
    }

    /// Incremental refresh: drop records of changed and affected files,
    /// re-extract just those, and rewrite.
    fn refresh(
        &self,
        files: &[SourceFile],
        manifest: &Manifest,
        changes: &ChangeSet,
    ) -> Result<IndexOutcome> {
        let reindex = changes.files_to_reindex();
        let remove = changes.files_to_remove();

        let subset: Vec<SourceFile> = files
            .iter()
            .filter(|f| reindex.contains(&f.rel_path))
            .cloned()
            .collect();

        // The xref fallback needs module attribution for unchanged files
        // too; seed it from the stored manifest.
        let mut known_modules: HashMap<String, Vec<String>> = manifest
            .files
            .iter()
            .filter(|(path, _)| !remove.contains(*path))
            .map(|(path, state)| (path.clone(), state.modules.clone()))
            .collect();
        known_modules.retain(|_, modules| !modules.is_empty());

        let mut outputs = self.run_phases(&subset, &known_modules);
        // Compiler-backed call records cover the whole project; scope them
        // to the files being re-extracted so unchanged files keep their
        // stored records.
        outputs.tracer.calls.retain(|c| reindex.contains(&c.file));

        let mut remainder = self
            .store
            .remove_records_for_files(remove.iter().map(|s| s.as_str()))?;
        // Dependency edges and diagnostics carry no per-file attribution
        // the remove set could target; they are replaced wholesale.
        remainder.retain(|env| {
            !matches!(env.record, Record::DepEdge(_) | Record::Diagnostic(_))
        });

        let fresh = merge(outputs);
        let mut combined = remainder;
        combined.extend(fresh);

        let new_manifest = self.build_manifest(files, &combined, Some((manifest, changes)))?;
        self.store.rewrite_records(&combined)?;
        self.store.write_manifest(&new_manifest)?;

        Ok(IndexOutcome {
            records_indexed: combined.len(),
            files_indexed: subset.len(),
            full_rebuild: false,
        })
    }

    /// Run phases 1–7 over the given files. `extra_file_modules` augments
    /// the module map handed to the xref fallback (used on refresh, where
    /// unchanged files are not re-parsed).
    fn run_phases(
        &self,
        files: &[SourceFile],
        extra_file_modules: &HashMap<String, Vec<String>>,
    ) -> PhaseOutputs {
        let syntactic = syntactic::extract(&self.config, files);

        let mut file_modules: HashMap<String, Vec<String>> = extra_file_modules.clone();
        for module in &syntactic.modules {
            file_modules
                .entry(module.file.clone())
                .or_default()
                .push(module.module.clone());
        }

        let tracer = tracer::extract(&self.config);
        let xref_deps = xref::extract(&self.config, &file_modules);
        let routes = routes::extract(&self.config, files);
        let schemas = schemas::extract(&self.config, files);
        let typespecs = typespecs::extract(&self.config, files);
        let diagnostics = diagnostics::extract(&self.config);

        PhaseOutputs {
            syntactic,
            tracer,
            xref_deps,
            routes,
            schemas,
            typespecs,
            diagnostics,
        }
    }

    /// Assemble the manifest for the current tree and record set. On
    /// refresh, file states of unchanged files are reused from the prior
    /// manifest rather than re-hashed.
    fn build_manifest(
        &self,
        files: &[SourceFile],
        records: &[Envelope],
        reuse: Option<(&Manifest, &ChangeSet)>,
    ) -> Result<Manifest> {
        let project_root = self
            .config
            .project_root
            .canonicalize()
            .unwrap_or_else(|_| self.config.project_root.clone());
        let mut manifest = Manifest::new(&project_root);

        // Module attribution per file, from the record set itself.
        let mut modules_by_file: HashMap<&str, Vec<String>> = HashMap::new();
        for envelope in records {
            if let Record::ModuleDef(def) = &envelope.record {
                modules_by_file
                    .entry(def.file.as_str())
                    .or_default()
                    .push(def.module.clone());
            }
        }

        let reusable: Option<(&BTreeMap<String, FileState>, std::collections::BTreeSet<String>)> =
            reuse.map(|(prior, changes)| {
                let stale: std::collections::BTreeSet<String> = changes
                    .files_to_reindex()
                    .union(&changes.files_to_remove())
                    .cloned()
                    .collect();
                (&prior.files, stale)
            });

        for file in files {
            let modules = modules_by_file
                .get(file.rel_path.as_str())
                .cloned()
                .unwrap_or_default();

            let state = match &reusable {
                Some((prior_files, stale)) if !stale.contains(&file.rel_path) => {
                    match prior_files.get(&file.rel_path) {
                        Some(state) => state.clone(),
                        None => file_state(&file.rel_path, &file.path, modules)?,
                    }
                }
                _ => file_state(&file.rel_path, &file.path, modules)?,
            };
            manifest.files.insert(file.rel_path.clone(), state);
        }

        // module → file: sorted iteration makes the winner deterministic
        // when a module name appears in more than one file.
        let mut sorted_files: Vec<&SourceFile> = files.iter().collect();
        sorted_files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        for file in sorted_files {
            if let Some(modules) = modules_by_file.get(file.rel_path.as_str()) {
                for module in modules {
                    manifest
                        .modules
                        .insert(module.clone(), file.rel_path.clone());
                }
            }
        }

        // module → dependents, from the dependency edges.
        for envelope in records {
            if let Record::DepEdge(edge) = &envelope.record {
                manifest
                    .dependents
                    .entry(edge.to.clone())
                    .or_default()
                    .push(edge.from.clone());
            }
        }
        for dependents in manifest.dependents.values_mut() {
            dependents.sort();
            dependents.dedup();
        }

        manifest.record_count = records.len();
        manifest.file_count = files.len();
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixture_project() -> TempDir {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "lib/a.ex",
            "defmodule A do\n  def foo do\n    B.bar()\n  end\nend\n",
        );
        write(
            temp.path(),
            "lib/b.ex",
            "defmodule B do\n  def bar do\n    :ok\n  end\nend\n",
        );
        temp
    }

    fn indexer_for(temp: &TempDir) -> Indexer {
        Indexer::new(IndexConfig::new(temp.path()).without_compiler_phases())
    }

    #[test]
    fn full_index_writes_records_and_manifest() {
        let temp = fixture_project();
        let indexer = indexer_for(&temp);
        let outcome = indexer.index().unwrap();
        assert!(outcome.full_rebuild);
        assert_eq!(outcome.files_indexed, 2);
        assert!(outcome.records_indexed >= 5);

        let manifest = indexer.store().read_manifest().unwrap();
        assert_eq!(manifest.file_count, 2);
        assert_eq!(manifest.record_count, outcome.records_indexed);
        assert_eq!(manifest.modules.get("A").map(|s| s.as_str()), Some("lib/a.ex"));
    }

    #[test]
    fn double_index_is_byte_identical() {
        let temp = fixture_project();
        let indexer = indexer_for(&temp);
        indexer.index().unwrap();
        let index_path = temp.path().join(".hexray/index.jsonl");
        let first = fs::read(&index_path).unwrap();
        indexer.index().unwrap();
        let second = fs::read(&index_path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ensure_current_rebuilds_then_reports_current() {
        let temp = fixture_project();
        let indexer = indexer_for(&temp);

        let status = indexer.ensure_current().unwrap();
        assert!(matches!(status, RefreshStatus::Rebuilt(_)));

        let status = indexer.ensure_current().unwrap();
        assert_eq!(status, RefreshStatus::Current);

        let manifest_before = indexer.store().read_manifest().unwrap();
        indexer.ensure_current().unwrap();
        let manifest_after = indexer.store().read_manifest().unwrap();
        assert_eq!(manifest_before.record_count, manifest_after.record_count);
    }

    #[test]
    fn ensure_current_refreshes_on_content_change() {
        let temp = fixture_project();
        let indexer = indexer_for(&temp);
        indexer.index().unwrap();

        write(
            temp.path(),
            "lib/b.ex",
            "defmodule B do\n  def bar do\n    :changed\n  end\n\n  def extra do\n    :new\n  end\nend\n",
        );

        let status = indexer.ensure_current().unwrap();
        let RefreshStatus::Refreshed(outcome) = status else {
            panic!("expected refresh, got {:?}", status);
        };
        assert!(!outcome.full_rebuild);
        assert_eq!(outcome.files_indexed, 1);

        // The new function is queryable.
        let engine = crate::query::QueryEngine::new(indexer.store().clone());
        assert!(engine.definition("B.extra/0").unwrap().is_some());
        // Untouched file records are intact.
        assert!(engine.definition("A.foo/0").unwrap().is_some());
    }

    #[test]
    fn unchanged_file_records_survive_refresh_bit_identical() {
        let temp = fixture_project();
        let indexer = indexer_for(&temp);
        indexer.index().unwrap();

        let records_for = |path: &str| -> Vec<String> {
            indexer
                .store()
                .stream_records()
                .unwrap()
                .filter(|e| e.record.file() == Some(path))
                .map(|e| e.to_json_line().unwrap())
                .collect()
        };
        let a_before = records_for("lib/a.ex");

        write(
            temp.path(),
            "lib/b.ex",
            "defmodule B do\n  def bar do\n    :changed\n  end\nend\n",
        );
        indexer.ensure_current().unwrap();

        assert_eq!(records_for("lib/a.ex"), a_before);
    }

    #[test]
    fn deleted_file_records_are_removed() {
        let temp = fixture_project();
        let indexer = indexer_for(&temp);
        indexer.index().unwrap();

        fs::remove_file(temp.path().join("lib/b.ex")).unwrap();
        let status = indexer.ensure_current().unwrap();
        assert!(matches!(status, RefreshStatus::Refreshed(_)));

        let engine = crate::query::QueryEngine::new(indexer.store().clone());
        assert!(engine.definition("B.bar/0").unwrap().is_none());
        let manifest = indexer.store().read_manifest().unwrap();
        assert!(!manifest.files.contains_key("lib/b.ex"));
    }

    #[test]
    fn incompatible_schema_triggers_rebuild() {
        let temp = fixture_project();
        let indexer = indexer_for(&temp);
        indexer.index().unwrap();

        let mut manifest = indexer.store().read_manifest().unwrap();
        manifest.schema_version = "0".to_string();
        indexer.store().write_manifest(&manifest).unwrap();

        let status = indexer.ensure_current().unwrap();
        assert!(matches!(status, RefreshStatus::Rebuilt(_)));
        assert!(indexer.store().read_manifest().unwrap().schema_compatible());
    }
}
