//! Diagnostic Extractor
//!
//! Runs a forced compile wrapped in the compiler's diagnostic-capturing
//! scope and collects severity/message/location tuples. Only runs when the
//! detected Elixir version exposes `Code.with_diagnostics` (1.15+); any
//! failure yields an empty result.

use std::process::Command;

use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::extract::adapter::{
    read_event_lines, run_command, run_command_stdout, split_fields, unique_id, TempScript,
};
use crate::records::{Diagnostic, Severity};

/// Minimum Elixir version exposing `Code.with_diagnostics`.
const MIN_VERSION: (u32, u32) = (1, 15);

/// Run the diagnostic phase against the project.
pub fn extract(config: &IndexConfig) -> Vec<Diagnostic> {
    if !config.enable_compiler_phases {
        debug!("Compiler phases disabled, skipping diagnostics");
        return Vec::new();
    }

    match elixir_version(config) {
        Some(version) if version >= MIN_VERSION => {}
        Some(version) => {
            debug!(
                "Elixir {}.{} lacks diagnostic capture, skipping",
                version.0, version.1
            );
            return Vec::new();
        }
        None => return Vec::new(),
    }

    let id = unique_id();
    let script_path = config.project_root.join(format!(".hexray_diag_{}.exs", id));
    let events_path = config.cache_dir().join(format!("diag_{}.tsv", id));

    if std::fs::create_dir_all(config.cache_dir()).is_err() {
        return Vec::new();
    }

    let script = match TempScript::create(script_path, &diagnostics_script(&events_path)) {
        Ok(s) => s,
        Err(e) => {
            debug!("Cannot write diagnostics script: {}", e);
            return Vec::new();
        }
    };
    let events = TempScript::track(events_path);

    let mut command = Command::new(&config.mix_command);
    command
        .args(["run", "--no-compile", "--no-start"])
        .arg(script.path())
        .current_dir(&config.project_root);
    if run_command(&mut command, "diagnostic compile").is_none() {
        return Vec::new();
    }

    let Some(lines) = read_event_lines(events.path()) else {
        return Vec::new();
    };
    let diagnostics = parse_diag_lines(config, &lines);
    info!("Captured {} diagnostics", diagnostics.len());
    diagnostics
}

/// Decode `diag\tseverity\tmessage\tfile\tline` lines.
pub fn parse_diag_lines(config: &IndexConfig, lines: &[String]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for line in lines {
        if let ["diag", severity, message, file, line_no] = split_fields(line).as_slice() {
            let Ok(line_no) = line_no.parse::<u32>() else {
                continue;
            };
            let file = crate::config::normalize_path(
                &config.project_root,
                std::path::Path::new(file),
            );
            diagnostics.push(Diagnostic {
                severity: Severity::from_str_lossy(severity),
                message: message.to_string(),
                file,
                line: line_no,
                source_tag: Some("elixir".to_string()),
            });
        }
    }
    diagnostics.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
    diagnostics
}

/// Detect the Elixir version as (major, minor).
fn elixir_version(config: &IndexConfig) -> Option<(u32, u32)> {
    let mut command = Command::new(&config.elixir_command);
    command.arg("--version");
    let stdout = run_command_stdout(&mut command, "elixir --version")?;
    parse_version(&stdout)
}

/// Pull `(major, minor)` out of `elixir --version` output.
pub fn parse_version(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().find(|l| l.trim_start().starts_with("Elixir"))?;
    let version = line.trim_start().strip_prefix("Elixir")?.trim();
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn diagnostics_script(events_path: &std::path::Path) -> String {
    format!(
        r#"events_path = {events:?}

write = fn fields ->
  line = fields |> Enum.map(&String.replace(&1, ["\t", "\n"], " ")) |> Enum.join("\t")
  File.write!(events_path, line <> "\n", [:append])
end

{{_result, diagnostics}} =
  Code.with_diagnostics(fn ->
    try do
      {{:ok, Mix.Task.run("compile", ["--force"])}}
    rescue
      error -> {{:error, error}}
    end
  end)

for diagnostic <- diagnostics do
  line =
    case Map.get(diagnostic, :position) do
      {{line, _column}} -> line
      line when is_integer(line) -> line
      _ -> 0
    end

  write.([
    "diag",
    Atom.to_string(diagnostic.severity),
    diagnostic.message,
    diagnostic.file || "",
    Integer.to_string(line)
  ])
end
"#,
        events = events_path
    )
}
