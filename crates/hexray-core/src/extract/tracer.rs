//! Compiler-Trace Extractor
//!
//! Drives a forced compile of the target project with a tracer module that
//! reports every resolved remote/imported call and compile-time relation.
//! The tracer is a generated adapter script placed next to the project; it
//! appends tab-separated events to a scratch file which is read back and
//! deleted once the compile finishes. The compile runs against a clean
//! build directory so the tracer observes every module.
//!
//! Calls resolved here carry high confidence and overwrite the syntactic
//! pass's unresolved markers through the call-site key.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::extract::adapter::{
    read_event_lines, run_command, split_fields, unique_id, TempScript,
};
use crate::records::{format_mfa, CallRef, DepEdge, DepType};

/// Results of the compiler-trace phase.
#[derive(Debug, Default, Clone)]
pub struct TracerResult {
    pub calls: Vec<CallRef>,
    pub deps: Vec<DepEdge>,
}

/// Run the tracer against the project. Any failure along the way (missing
/// mix, compile error, unreadable event file) yields an empty result.
pub fn extract(config: &IndexConfig) -> TracerResult {
    if !config.enable_compiler_phases {
        debug!("Compiler phases disabled, skipping tracer");
        return TracerResult::default();
    }

    let id = unique_id();
    let script_path = config
        .project_root
        .join(format!(".hexray_trace_{}.exs", id));
    let events_path = config.cache_dir().join(format!("trace_{}.tsv", id));
    let build_path = config.cache_dir().join(format!("build_{}", id));

    if std::fs::create_dir_all(config.cache_dir()).is_err() {
        return TracerResult::default();
    }

    let script = match TempScript::create(script_path, &tracer_script(&events_path)) {
        Ok(s) => s,
        Err(e) => {
            debug!("Cannot write tracer script: {}", e);
            return TracerResult::default();
        }
    };
    let events = TempScript::track(events_path);
    let build = TempScript::track(build_path);

    let mut command = Command::new(&config.elixir_command);
    command
        .arg("-r")
        .arg(script.path())
        .arg("-S")
        .arg(&config.mix_command)
        .args(["compile", "--force", "--tracer", "Hexray.TraceSink"])
        .env("MIX_BUILD_PATH", build.path())
        .current_dir(&config.project_root);

    if run_command(&mut command, "traced compile").is_none() {
        return TracerResult::default();
    }

    let Some(lines) = read_event_lines(events.path()) else {
        return TracerResult::default();
    };

    let result = parse_events(config, &lines);
    info!(
        "Tracer collected {} calls, {} dep edges",
        result.calls.len(),
        result.deps.len()
    );
    result
}

/// Decode event lines, applying the macro-line heuristic, the module
/// denylist, and call-site deduplication.
pub fn parse_events(config: &IndexConfig, lines: &[String]) -> TracerResult {
    let mut result = TracerResult::default();
    let mut seen_calls: HashSet<(String, u32, String)> = HashSet::new();
    let mut seen_deps: HashSet<(String, String, DepType)> = HashSet::new();

    for line in lines {
        let fields = split_fields(line);
        match fields.as_slice() {
            ["call", caller_mod, caller_fun, caller_arity, callee_mod, name, arity, file, line] => {
                let (Ok(caller_arity), Ok(arity), Ok(line)) = (
                    caller_arity.parse::<u32>(),
                    arity.parse::<u32>(),
                    line.parse::<u32>(),
                ) else {
                    continue;
                };
                // Line <= 1 means macro-generated; drop as noise.
                if line <= 1 {
                    continue;
                }
                if *caller_mod == "nil" || config.is_denied_module(callee_mod) {
                    continue;
                }
                let file = relative_file(&config.project_root, file);
                let callee = format_mfa(callee_mod, name, arity);
                if !seen_calls.insert((file.clone(), line, callee.clone())) {
                    continue;
                }
                result.calls.push(CallRef {
                    caller: format_mfa(caller_mod, caller_fun, caller_arity),
                    callee: Some(callee),
                    file,
                    line,
                });
            }
            ["dep", from, to, dep_type] => {
                if *from == "nil" || config.is_denied_module(to) {
                    continue;
                }
                let Some(dep_type) = DepType::from_label(dep_type) else {
                    continue;
                };
                if !seen_deps.insert((from.to_string(), to.to_string(), dep_type)) {
                    continue;
                }
                result.deps.push(DepEdge {
                    from: from.to_string(),
                    to: to.to_string(),
                    dep_type,
                });
            }
            _ => {}
        }
    }

    result
        .calls
        .sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
    result
}

fn relative_file(project_root: &Path, file: &str) -> String {
    let path = Path::new(file);
    crate::config::normalize_path(project_root, path)
}

/// The generated tracer module. Events are tab-separated so the target
/// project needs no serialization dependency; tabs and newlines inside
/// values are replaced with spaces.
fn tracer_script(events_path: &Path) -> String {
    format!(
        r#"defmodule Hexray.TraceSink do
  @events_path {events:?}

  def trace({{kind, meta, module, name, arity}}, env)
      when kind in [:remote_function, :remote_macro, :imported_function, :imported_macro] do
    record(env, module, name, arity, meta)
  end

  def trace({{:struct_expansion, _meta, module, _keys}}, env), do: dep(env, module)
  def trace({{:require, _meta, module, _opts}}, env), do: dep(env, module)
  def trace(_event, _env), do: :ok

  defp record(env, module, name, arity, meta) do
    case env.function do
      {{fun, fun_arity}} ->
        line = Keyword.get(meta, :line, 0)

        write([
          "call",
          render(env.module),
          Atom.to_string(fun),
          Integer.to_string(fun_arity),
          render(module),
          Atom.to_string(name),
          Integer.to_string(arity),
          env.file,
          Integer.to_string(line)
        ])

      nil ->
        :ok
    end
  end

  defp dep(env, module) do
    write(["dep", render(env.module), render(module), "compile"])
  end

  defp render(nil), do: "nil"
  defp render(module), do: inspect(module)

  defp write(fields) do
    line = fields |> Enum.map(&String.replace(&1, ["\t", "\n"], " ")) |> Enum.join("\t")
    File.write!(@events_path, line <> "\n", [:append])
    :ok
  end
end
"#,
        events = events_path
    )
}
