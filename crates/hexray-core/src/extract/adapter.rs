//! Adapter-Script Plumbing
//!
//! The compiler-backed phases (tracer, xref, diagnostics) all work the same
//! way: write a short Elixir script next to the target project, run it as a
//! subprocess, read back a tab-separated event file, and clean everything
//! up. Script paths carry a unique identifier so concurrent runs on
//! different projects never collide. Every failure here is soft: callers
//! get `None` and contribute an empty result.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A unique identifier for one adapter run: pid, wall clock, and a
/// process-local counter.
pub fn unique_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let count = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}_{}", std::process::id(), nanos, count)
}

/// A script (or scratch file) removed on drop.
pub struct TempScript {
    path: PathBuf,
}

impl TempScript {
    pub fn create(path: PathBuf, content: &str) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(Self { path })
    }

    /// Track an existing path (e.g. the event file the script writes).
    pub fn track(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempScript {
    fn drop(&mut self) {
        if self.path.is_dir() {
            let _ = std::fs::remove_dir_all(&self.path);
        } else {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Run a prepared command to completion, returning `None` (with a log line)
/// on spawn failure or nonzero exit.
pub fn run_command(command: &mut Command, what: &str) -> Option<()> {
    debug!("Running {}: {:?}", what, command);
    match command.output() {
        Ok(output) if output.status.success() => Some(()),
        Ok(output) => {
            warn!(
                "{} exited with {}: {}",
                what,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            None
        }
        Err(e) => {
            warn!("{} failed to start: {}", what, e);
            None
        }
    }
}

/// Run a prepared command, returning its stdout on success.
pub fn run_command_stdout(command: &mut Command, what: &str) -> Option<String> {
    debug!("Running {}: {:?}", what, command);
    match command.output() {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => {
            warn!(
                "{} exited with {}: {}",
                what,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            None
        }
        Err(e) => {
            warn!("{} failed to start: {}", what, e);
            None
        }
    }
}

/// Read the event file a script produced, as trimmed non-empty lines.
pub fn read_event_lines(path: &Path) -> Option<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(
            content
                .lines()
                .map(|l| l.trim_end().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
        ),
        Err(e) => {
            debug!("No event file at {}: {}", path.display(), e);
            None
        }
    }
}

/// Split one tab-separated event line into fields.
pub fn split_fields(line: &str) -> Vec<&str> {
    line.split('\t').collect()
}
