//! Cross-Reference Extractor
//!
//! Reads the target project's compilation manifest for inter-module
//! dependency edges (compile / runtime / export). The manifest is decoded
//! inside the target project by a generated helper script — its on-disk
//! layout is an Erlang term that shifts between compiler releases, so the
//! decode happens where the layout is native. When the helper cannot decode
//! the manifest, the extractor falls back to `mix xref graph --format json`
//! and translates its file-level nodes to modules through the module→file
//! map supplied by the caller.

use std::collections::{BTreeSet, HashMap};
use std::process::Command;

use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::extract::adapter::{
    read_event_lines, run_command, run_command_stdout, split_fields, unique_id, TempScript,
};
use crate::records::{DepEdge, DepType};

/// Run the xref phase. `file_modules` maps root-relative file paths to the
/// modules they define (from the syntactic pass); it is only needed by the
/// JSON fallback. Failures yield an empty edge set.
pub fn extract(config: &IndexConfig, file_modules: &HashMap<String, Vec<String>>) -> Vec<DepEdge> {
    if !config.enable_compiler_phases {
        debug!("Compiler phases disabled, skipping xref");
        return Vec::new();
    }

    if let Some(edges) = manifest_edges(config) {
        info!("Xref manifest yielded {} dep edges", edges.len());
        return edges;
    }

    debug!("Manifest path unavailable, falling back to mix xref");
    let edges = xref_graph_edges(config, file_modules);
    info!("Xref fallback yielded {} dep edges", edges.len());
    edges
}

/// Primary path: decode the compile manifest via a helper script.
fn manifest_edges(config: &IndexConfig) -> Option<Vec<DepEdge>> {
    let id = unique_id();
    let script_path = config.project_root.join(format!(".hexray_xref_{}.exs", id));
    let events_path = config.cache_dir().join(format!("xref_{}.tsv", id));

    std::fs::create_dir_all(config.cache_dir()).ok()?;

    let script = TempScript::create(script_path, &manifest_script(&events_path)).ok()?;
    let events = TempScript::track(events_path);

    let mut command = Command::new(&config.mix_command);
    command
        .args(["run", "--no-start"])
        .arg(script.path())
        .current_dir(&config.project_root);
    run_command(&mut command, "xref manifest read")?;

    let lines = read_event_lines(events.path())?;
    let edges = parse_dep_lines(config, &lines);
    if edges.is_empty() {
        // Empty can mean a decode mismatch; let the fallback have a try.
        None
    } else {
        Some(edges)
    }
}

/// Decode `dep\tfrom\tto\ttype` lines, deduplicating by (from, to, type).
pub fn parse_dep_lines(config: &IndexConfig, lines: &[String]) -> Vec<DepEdge> {
    let mut seen = BTreeSet::new();
    let mut edges = Vec::new();
    for line in lines {
        if let ["dep", from, to, label] = split_fields(line).as_slice() {
            if *from == "nil" || from == to || config.is_denied_module(to) {
                continue;
            }
            let Some(dep_type) = DepType::from_label(label) else {
                continue;
            };
            if seen.insert((from.to_string(), to.to_string(), dep_type)) {
                edges.push(DepEdge {
                    from: from.to_string(),
                    to: to.to_string(),
                    dep_type,
                });
            }
        }
    }
    edges
}

/// Fallback path: `mix xref graph --format json` gives file-level
/// dependencies; translate both endpoints through the module map.
fn xref_graph_edges(
    config: &IndexConfig,
    file_modules: &HashMap<String, Vec<String>>,
) -> Vec<DepEdge> {
    let mut command = Command::new(&config.mix_command);
    command
        .args(["xref", "graph", "--format", "json"])
        .current_dir(&config.project_root);
    let Some(stdout) = run_command_stdout(&mut command, "mix xref graph") else {
        return Vec::new();
    };

    let Ok(value) = serde_json::from_str::<serde_json::Value>(&stdout) else {
        debug!("mix xref output was not JSON");
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    let mut edges = Vec::new();

    let nodes = match value.as_array() {
        Some(nodes) => nodes.clone(),
        None => value
            .get("nodes")
            .and_then(|n| n.as_array())
            .cloned()
            .unwrap_or_default(),
    };

    for node in &nodes {
        let Some(source) = node.get("source").and_then(|s| s.as_str()) else {
            continue;
        };
        let Some(from_modules) = file_modules.get(source) else {
            continue;
        };
        let Some(deps) = node.get("deps").and_then(|d| d.as_array()) else {
            continue;
        };
        for dep in deps {
            let target = dep
                .get("source")
                .or_else(|| dep.get("sink"))
                .and_then(|s| s.as_str());
            let Some(target) = target else {
                continue;
            };
            let dep_type = dep
                .get("label")
                .and_then(|l| l.as_str())
                .and_then(DepType::from_label)
                .unwrap_or(DepType::Runtime);
            let Some(to_modules) = file_modules.get(target) else {
                continue;
            };
            for from in from_modules {
                for to in to_modules {
                    if from == to || config.is_denied_module(to) {
                        continue;
                    }
                    if seen.insert((from.clone(), to.clone(), dep_type)) {
                        edges.push(DepEdge {
                            from: from.clone(),
                            to: to.clone(),
                            dep_type,
                        });
                    }
                }
            }
        }
    }

    edges
}

/// The manifest-decoding helper. Halts with a nonzero status on any layout
/// mismatch so the caller falls back to `mix xref`.
fn manifest_script(events_path: &std::path::Path) -> String {
    format!(
        r#"events_path = {events:?}

write = fn fields ->
  line = fields |> Enum.map(&String.replace(&1, ["\t", "\n"], " ")) |> Enum.join("\t")
  File.write!(events_path, line <> "\n", [:append])
end

render = fn
  nil -> "nil"
  module -> inspect(module)
end

try do
  Mix.Task.run("compile", [])

  manifest = Path.join(Mix.Project.manifest_path(), "compile.elixir")
  {{:ok, binary}} = File.read(manifest)
  [_version | terms] = :erlang.binary_to_term(binary)

  for {{:source, _source, _size, _digest, compile_refs, export_refs, runtime_refs, _compile_env,
       _external, _warnings, modules}} <- terms,
      from <- modules,
      {{refs, kind}} <- [{{compile_refs, "compile"}}, {{export_refs, "export"}}, {{runtime_refs, "runtime"}}],
      to <- refs do
    write.(["dep", render.(from), render.(to), kind])
  end
rescue
  _ -> System.halt(2)
catch
  _, _ -> System.halt(2)
end
"#,
        events = events_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;

    fn config() -> IndexConfig {
        IndexConfig::new("/tmp/proj")
    }

    #[test]
    fn parses_and_dedups_dep_lines() {
        let lines = vec![
            "dep\tMyApp.A\tMyApp.B\tcompile".to_string(),
            "dep\tMyApp.A\tMyApp.B\tcompile".to_string(),
            "dep\tMyApp.A\tMyApp.B\truntime".to_string(),
            "dep\tMyApp.A\tMyApp.C\texport".to_string(),
        ];
        let edges = parse_dep_lines(&config(), &lines);
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0].dep_type, DepType::Compile);
        assert_eq!(edges[1].dep_type, DepType::Runtime);
        assert_eq!(edges[2].dep_type, DepType::Export);
    }

    #[test]
    fn self_edges_and_denied_targets_drop() {
        let lines = vec![
            "dep\tMyApp.A\tMyApp.A\tcompile".to_string(),
            "dep\tMyApp.A\tKernel\tcompile".to_string(),
            "dep\tnil\tMyApp.B\tcompile".to_string(),
            "dep\tMyApp.A\tMyApp.B\tbogus".to_string(),
        ];
        assert!(parse_dep_lines(&config(), &lines).is_empty());
    }

    #[test]
    fn disabled_compiler_phases_yield_empty() {
        let config = IndexConfig::new("/tmp/proj").without_compiler_phases();
        assert!(extract(&config, &HashMap::new()).is_empty());
    }
}
