//! Change Detector
//!
//! Compares the current enumeration of source files against the manifest's
//! per-file state and computes which files must be re-extracted. A file is
//! modified only when a (mtime, size) difference is confirmed by a content
//! hash mismatch; dependents of changed modules are pulled in through a BFS
//! over the manifest's module→dependents map.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::time::UNIX_EPOCH;

use tracing::debug;

use crate::discovery::SourceFile;
use crate::store::{fingerprint_file, Manifest};

/// Outcome of a change-detection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// Unchanged files whose records must regenerate because a module they
    /// depend on changed.
    pub affected: Vec<String>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty()
            || !self.modified.is_empty()
            || !self.deleted.is_empty()
            || !self.affected.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len() + self.affected.len()
    }

    /// `added ∪ modified ∪ affected`: the files to re-extract.
    pub fn files_to_reindex(&self) -> BTreeSet<String> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.affected.iter())
            .cloned()
            .collect()
    }

    /// `modified ∪ deleted ∪ affected`: the files whose stored records must
    /// be dropped.
    pub fn files_to_remove(&self) -> BTreeSet<String> {
        self.modified
            .iter()
            .chain(self.deleted.iter())
            .chain(self.affected.iter())
            .cloned()
            .collect()
    }
}

/// Diff the current file enumeration against the stored manifest.
pub fn detect_changes(current: &[SourceFile], manifest: &Manifest) -> ChangeSet {
    let current_paths: HashSet<&str> = current.iter().map(|f| f.rel_path.as_str()).collect();

    let mut added = Vec::new();
    let mut modified = Vec::new();

    for file in current {
        match manifest.files.get(&file.rel_path) {
            None => added.push(file.rel_path.clone()),
            Some(stored) => {
                let Ok(metadata) = std::fs::metadata(&file.path) else {
                    // Unreadable now but present in the walk: treat as
                    // modified so the extractor decides.
                    modified.push(file.rel_path.clone());
                    continue;
                };
                let mtime = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                if mtime == stored.mtime && metadata.len() == stored.size {
                    continue;
                }
                // (mtime, size) moved; only a hash mismatch counts.
                match fingerprint_file(&file.path) {
                    Ok(fingerprint) if fingerprint == stored.fingerprint => {}
                    _ => modified.push(file.rel_path.clone()),
                }
            }
        }
    }

    let deleted: Vec<String> = manifest
        .files
        .keys()
        .filter(|path| !current_paths.contains(path.as_str()))
        .cloned()
        .collect();

    let affected = affected_files(manifest, &modified, &deleted, &added);

    let changeset = ChangeSet {
        added,
        modified,
        deleted,
        affected,
    };
    debug!(
        "Change detection: {} added, {} modified, {} deleted, {} affected",
        changeset.added.len(),
        changeset.modified.len(),
        changeset.deleted.len(),
        changeset.affected.len()
    );
    changeset
}

/// BFS the dependents map from the modules declared by changed files, then
/// translate dependent modules back to files. Files already changed or
/// added are excluded.
fn affected_files(
    manifest: &Manifest,
    modified: &[String],
    deleted: &[String],
    added: &[String],
) -> Vec<String> {
    let changed: HashSet<&String> = modified.iter().chain(deleted.iter()).collect();

    let mut seed_modules: VecDeque<String> = VecDeque::new();
    let mut visited: HashSet<String> = HashSet::new();
    for path in &changed {
        if let Some(state) = manifest.files.get(*path) {
            for module in &state.modules {
                if visited.insert(module.clone()) {
                    seed_modules.push_back(module.clone());
                }
            }
        }
    }

    let mut dependent_modules: BTreeSet<String> = BTreeSet::new();
    while let Some(module) = seed_modules.pop_front() {
        if let Some(dependents) = manifest.dependents.get(&module) {
            for dependent in dependents {
                if visited.insert(dependent.clone()) {
                    dependent_modules.insert(dependent.clone());
                    seed_modules.push_back(dependent.clone());
                }
            }
        }
    }

    let excluded: HashSet<&String> = changed.iter().copied().chain(added.iter()).collect();

    let mut affected: BTreeSet<String> = BTreeSet::new();
    for module in &dependent_modules {
        if let Some(file) = manifest.modules.get(module) {
            if !excluded.contains(file) {
                affected.insert(file.clone());
            }
        }
    }
    affected.into_iter().collect()
}
