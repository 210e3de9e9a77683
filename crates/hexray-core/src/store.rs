//! Persistence Store
//!
//! On-disk layout rooted at the project's `.hexray/` directory:
//!
//! - `manifest.json` — schema version, tool version, project root, per-file
//!   state table, module→file map, module→dependents map, counts, timestamp
//! - `index.jsonl` — one record envelope per line
//! - `cache/` — extractor-owned scratch
//!
//! Writers rewrite `index.jsonl` atomically (write to a temporary path,
//! rename over); readers stream line by line. One indexing run owns the
//! directory at a time.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::INDEX_DIR_NAME;
use crate::records::{Envelope, INDEX_SCHEMA_VERSION};

const MANIFEST_FILE: &str = "manifest.json";
const INDEX_FILE: &str = "index.jsonl";
const CACHE_DIR: &str = "cache";

/// Errors during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No index found at {0}")]
    NoIndex(PathBuf),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Manifest
// ============================================================================

/// Per-file fingerprint state recorded in the manifest. An unchanged
/// (mtime, size, fingerprint) triple fully determines that a file does not
/// need re-extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub path: String,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
    pub size: u64,
    /// 128-bit content fingerprint (truncated SHA-256), hex.
    pub fingerprint: String,
    /// Modules defined in this file.
    #[serde(default)]
    pub modules: Vec<String>,
}

/// The index metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: String,
    pub tool_version: String,
    pub project_root: String,
    /// Per-file state table, keyed by root-relative path.
    pub files: BTreeMap<String, FileState>,
    /// module → defining file.
    pub modules: BTreeMap<String, String>,
    /// module → modules depending on it.
    pub dependents: BTreeMap<String, Vec<String>>,
    pub record_count: usize,
    pub file_count: usize,
    /// Seconds since the epoch at write time.
    pub generated_at: u64,
}

impl Manifest {
    pub fn new(project_root: &Path) -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            project_root: project_root.display().to_string(),
            files: BTreeMap::new(),
            modules: BTreeMap::new(),
            dependents: BTreeMap::new(),
            record_count: 0,
            file_count: 0,
            generated_at: unix_now(),
        }
    }

    /// Whether this manifest was written by a compatible schema.
    pub fn schema_compatible(&self) -> bool {
        self.schema_version == INDEX_SCHEMA_VERSION
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Capture the current [`FileState`] of a file on disk.
pub fn file_state(rel_path: &str, abs_path: &Path, modules: Vec<String>) -> Result<FileState> {
    let metadata = std::fs::metadata(abs_path)?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(FileState {
        path: rel_path.to_string(),
        mtime,
        size: metadata.len(),
        fingerprint: fingerprint_file(abs_path)?,
        modules,
    })
}

/// 128-bit content fingerprint: SHA-256 truncated to its first 16 bytes.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(8192, file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = std::io::Read::read(&mut reader, &mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    let digest = hasher.finalize();
    Ok(hex(&digest[..16]))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

// ============================================================================
// Store
// ============================================================================

/// Handle on a project's `.hexray/` directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    index_dir: PathBuf,
}

impl IndexStore {
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
        }
    }

    /// Store rooted at `<project>/.hexray`.
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(INDEX_DIR_NAME))
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.index_dir.join(MANIFEST_FILE)
    }

    fn index_path(&self) -> PathBuf {
        self.index_dir.join(INDEX_FILE)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.index_dir.join(CACHE_DIR)
    }

    /// Create the directory layout if missing.
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(self.cache_dir())?;
        Ok(())
    }

    /// Both the manifest and the record file are present.
    pub fn index_exists(&self) -> bool {
        self.manifest_path().is_file() && self.index_path().is_file()
    }

    /// Remove the entire index directory.
    pub fn clear(&self) -> Result<()> {
        if self.index_dir.exists() {
            std::fs::remove_dir_all(&self.index_dir)?;
            info!("Cleared index at {}", self.index_dir.display());
        }
        Ok(())
    }

    /// Truncate-and-rewrite the record file atomically: write to a
    /// temporary sibling, then rename over `index.jsonl`.
    pub fn write_records(&self, records: &[Envelope]) -> Result<()> {
        self.init()?;
        let tmp_path = self.index_dir.join(format!("{}.tmp", INDEX_FILE));
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for record in records {
                let line = record.to_json_line()?;
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp_path, self.index_path())?;
        debug!("Wrote {} records", records.len());
        Ok(())
    }

    /// Atomic full rewrite; alias of [`IndexStore::write_records`] kept for
    /// call sites that replace the whole record set.
    pub fn rewrite_records(&self, records: &[Envelope]) -> Result<()> {
        self.write_records(records)
    }

    /// Append records to the existing file without rewriting.
    pub fn append_records(&self, records: &[Envelope]) -> Result<()> {
        self.init()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.index_path())?;
        let mut writer = BufWriter::new(file);
        for record in records {
            let line = record.to_json_line()?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Lazy line-by-line read of the record file. Malformed lines are
    /// skipped with a warning rather than failing the stream.
    pub fn stream_records(&self) -> Result<RecordStream> {
        let path = self.index_path();
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NoIndex(path.clone())
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(RecordStream {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    /// Stream the record file, dropping any record attributed to one of
    /// `files`; returns the remainder in order.
    pub fn remove_records_for_files<'a, I>(&self, files: I) -> Result<Vec<Envelope>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let files: std::collections::HashSet<&str> = files.into_iter().collect();
        let remainder = self
            .stream_records()?
            .filter(|envelope| match envelope.record.file() {
                Some(file) => !files.contains(file),
                None => true,
            })
            .collect();
        Ok(remainder)
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.init()?;
        let tmp_path = self.index_dir.join(format!("{}.tmp", MANIFEST_FILE));
        {
            let file = File::create(&tmp_path)?;
            serde_json::to_writer_pretty(BufWriter::new(file), manifest)?;
        }
        std::fs::rename(&tmp_path, self.manifest_path())?;
        Ok(())
    }

    pub fn read_manifest(&self) -> Result<Manifest> {
        let path = self.manifest_path();
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NoIndex(path.clone())
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// Pull iterator over `index.jsonl`.
pub struct RecordStream {
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
}

impl Iterator for RecordStream {
    type Item = Envelope;

    fn next(&mut self) -> Option<Envelope> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!("Read error in index.jsonl: {}", e);
                    return None;
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match Envelope::from_json_line(&line) {
                Ok(envelope) => return Some(envelope),
                Err(e) => {
                    warn!("Skipping malformed record at line {}: {}", self.line_no, e);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{CallRef, ModuleDef, Record};
    use tempfile::TempDir;

    fn sample_records() -> Vec<Envelope> {
        vec![
            Envelope::syntactic(Record::ModuleDef(ModuleDef {
                module: "A".into(),
                file: "lib/a.ex".into(),
                line: 1,
                end_line: 3,
                behaviours: vec![],
            })),
            Envelope::compiler(Record::CallRef(CallRef {
                caller: "A.foo/0".into(),
                callee: Some("B.bar/0".into()),
                file: "lib/a.ex".into(),
                line: 2,
            })),
            Envelope::syntactic(Record::ModuleDef(ModuleDef {
                module: "B".into(),
                file: "lib/b.ex".into(),
                line: 1,
                end_line: 3,
                behaviours: vec![],
            })),
        ]
    }

    #[test]
    fn write_then_stream_round_trips() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::new(temp.path().join(".hexray"));
        let records = sample_records();
        store.write_records(&records).unwrap();
        let read: Vec<Envelope> = store.stream_records().unwrap().collect();
        assert_eq!(read, records);
    }

    #[test]
    fn append_extends_the_file() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::new(temp.path().join(".hexray"));
        let records = sample_records();
        store.write_records(&records[..1]).unwrap();
        store.append_records(&records[1..]).unwrap();
        let read: Vec<Envelope> = store.stream_records().unwrap().collect();
        assert_eq!(read, records);
    }

    #[test]
    fn remove_records_for_files_filters_by_attribution() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::new(temp.path().join(".hexray"));
        store.write_records(&sample_records()).unwrap();
        let remainder = store.remove_records_for_files(["lib/a.ex"]).unwrap();
        assert_eq!(remainder.len(), 1);
        assert_eq!(remainder[0].record.file(), Some("lib/b.ex"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::new(temp.path().join(".hexray"));
        store.write_records(&sample_records()).unwrap();
        // Corrupt the middle of the file.
        let path = store.index_path();
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("this is not json\n");
        std::fs::write(&path, content).unwrap();
        let read: Vec<Envelope> = store.stream_records().unwrap().collect();
        assert_eq!(read.len(), 3);
    }

    #[test]
    fn manifest_round_trips_modulo_timestamp() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::new(temp.path().join(".hexray"));
        let mut manifest = Manifest::new(temp.path());
        manifest.record_count = 42;
        manifest.modules.insert("A".into(), "lib/a.ex".into());
        manifest
            .dependents
            .insert("A".into(), vec!["B".into(), "C".into()]);
        store.write_manifest(&manifest).unwrap();
        let read = store.read_manifest().unwrap();
        assert_eq!(read.record_count, manifest.record_count);
        assert_eq!(read.modules, manifest.modules);
        assert_eq!(read.dependents, manifest.dependents);
        assert_eq!(read.schema_version, INDEX_SCHEMA_VERSION);
        assert!(read.schema_compatible());
    }

    #[test]
    fn index_exists_requires_both_files() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::new(temp.path().join(".hexray"));
        assert!(!store.index_exists());
        store.write_records(&sample_records()).unwrap();
        assert!(!store.index_exists());
        store.write_manifest(&Manifest::new(temp.path())).unwrap();
        assert!(store.index_exists());
        store.clear().unwrap();
        assert!(!store.index_exists());
    }

    #[test]
    fn missing_index_is_a_no_index_error() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::new(temp.path().join(".hexray"));
        assert!(matches!(
            store.stream_records(),
            Err(StoreError::NoIndex(_))
        ));
    }

    #[test]
    fn fingerprint_is_128_bits_and_content_addressed() {
        let temp = TempDir::new().unwrap();
        let path_a = temp.path().join("a.ex");
        let path_b = temp.path().join("b.ex");
        std::fs::write(&path_a, "defmodule A do end").unwrap();
        std::fs::write(&path_b, "defmodule A do end").unwrap();

        let fp_a = fingerprint_file(&path_a).unwrap();
        let fp_b = fingerprint_file(&path_b).unwrap();
        assert_eq!(fp_a.len(), 32);
        assert_eq!(fp_a, fp_b);

        std::fs::write(&path_b, "defmodule B do end").unwrap();
        assert_ne!(fp_a, fingerprint_file(&path_b).unwrap());
    }

    #[test]
    fn double_write_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let store = IndexStore::new(temp.path().join(".hexray"));
        let records = sample_records();
        store.write_records(&records).unwrap();
        let first = std::fs::read(store.index_path()).unwrap();
        store.write_records(&records).unwrap();
        let second = std::fs::read(store.index_path()).unwrap();
        assert_eq!(first, second);
    }
}
