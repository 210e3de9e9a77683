//! Type-Annotation Extractor
//!
//! Walks module attribute nodes matching `@spec`, `@type`, `@typep`,
//! `@opaque`, `@callback`, and `@macrocallback`, emitting [`TypeSpec`] and
//! [`TypeDef`] records with textual renderings sliced from the source.

use std::time::Duration;

use tracing::debug;
use tree_sitter::Node;

use crate::config::IndexConfig;
use crate::discovery::SourceFile;
use crate::parser::{
    argument_nodes, block_statements, call_do_block, call_head, node_text, start_line, ExParser,
};
use crate::records::{TypeDef, TypeDefKind, TypeSpec};

/// Results of the annotation pass.
#[derive(Debug, Default, Clone)]
pub struct TypespecResult {
    pub specs: Vec<TypeSpec>,
    pub typedefs: Vec<TypeDef>,
}

/// Run the annotation pass over the given files.
pub fn extract(config: &IndexConfig, files: &[SourceFile]) -> TypespecResult {
    let timeout = Duration::from_micros(config.parse_timeout_micros);
    let mut result = TypespecResult::default();

    for file in files {
        let Ok(content) = std::fs::read_to_string(&file.path) else {
            continue;
        };
        if !content.contains('@') {
            continue;
        }
        let mut parser = match ExParser::new(timeout) {
            Ok(p) => p,
            Err(e) => {
                debug!("Parser init failed: {}", e);
                continue;
            }
        };
        let tree = match parser.parse(&content) {
            Ok(t) => t,
            Err(e) => {
                debug!("Parse failed for {}: {}", file.rel_path, e);
                continue;
            }
        };
        let partial = extract_source(&content, tree.root_node(), &file.rel_path);
        result.specs.extend(partial.specs);
        result.typedefs.extend(partial.typedefs);
    }

    result
        .specs
        .sort_by(|a, b| (&a.module, &a.name, a.arity, a.line).cmp(&(&b.module, &b.name, b.arity, b.line)));
    result
        .typedefs
        .sort_by(|a, b| (&a.module, &a.name, a.arity, a.line).cmp(&(&b.module, &b.name, b.arity, b.line)));
    result
}

/// Extract annotations from one parsed source.
pub fn extract_source(source: &str, root: Node, rel_path: &str) -> TypespecResult {
    let mut result = TypespecResult::default();
    walk_modules(root, source, rel_path, &mut Vec::new(), &mut result);
    result
}

fn walk_modules(
    node: Node,
    source: &str,
    file: &str,
    module_stack: &mut Vec<String>,
    result: &mut TypespecResult,
) {
    if node.kind() == "call" && call_head(node, source) == Some("defmodule") {
        let args = argument_nodes(node);
        if let Some(name_node) = args.first().filter(|n| n.kind() == "alias") {
            module_stack.push(node_text(*name_node, source).to_string());
            let module = module_stack.join(".");
            if let Some(block) = call_do_block(node) {
                for stmt in block_statements(block) {
                    visit_attribute(stmt, source, file, &module, result);
                    walk_modules(stmt, source, file, module_stack, result);
                }
            }
            module_stack.pop();
            return;
        }
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    for child in children {
        walk_modules(child, source, file, module_stack, result);
    }
}

fn visit_attribute(node: Node, source: &str, file: &str, module: &str, result: &mut TypespecResult) {
    // Attributes parse as `@` unary operators whose operand is a call:
    // `@spec foo(a) :: b` → @(spec(foo(a) :: b)).
    if node.kind() != "unary_operator" {
        return;
    }
    let Some(operand) = node.child_by_field_name("operand") else {
        return;
    };
    if operand.kind() != "call" {
        return;
    }
    let Some(attr) = call_head(operand, source) else {
        return;
    };

    let kind = match attr {
        "spec" => None,
        "type" => Some(TypeDefKind::Type),
        "typep" => Some(TypeDefKind::PrivateType),
        "opaque" => Some(TypeDefKind::Opaque),
        "callback" => Some(TypeDefKind::Callback),
        "macrocallback" => Some(TypeDefKind::Macrocallback),
        _ => return,
    };

    let Some(body) = argument_nodes(operand).into_iter().next() else {
        return;
    };
    let Some(parts) = split_signature(body, source) else {
        return;
    };

    let line = start_line(node);
    match kind {
        None => result.specs.push(TypeSpec {
            module: module.to_string(),
            name: parts.name,
            arity: parts.params.len() as u32,
            params: parts.params,
            return_type: parts.definition,
            file: file.to_string(),
            line,
        }),
        Some(kind) => result.typedefs.push(TypeDef {
            module: module.to_string(),
            name: parts.name,
            arity: parts.params.len() as u32,
            kind,
            params: parts.params,
            definition: parts.definition,
            file: file.to_string(),
            line,
        }),
    }
}

struct Signature {
    name: String,
    params: Vec<String>,
    definition: String,
}

/// Split `name(params) :: definition`, unwrapping an outer `when`
/// constraint list if present. Heads without `::` (rare, but `@type t`
/// alone is invalid anyway) are skipped.
fn split_signature(node: Node, source: &str) -> Option<Signature> {
    let node = unwrap_when(node, source);
    if node.kind() != "binary_operator" {
        return None;
    }
    let op = node.child_by_field_name("operator")?;
    if op.kind() != "::" {
        return None;
    }
    let left = node.child_by_field_name("left")?;
    let right = node.child_by_field_name("right")?;

    let (name, params) = head_parts(left, source)?;
    Some(Signature {
        name,
        params,
        definition: node_text(right, source).trim().to_string(),
    })
}

fn unwrap_when<'t>(node: Node<'t>, source: &str) -> Node<'t> {
    if node.kind() == "binary_operator" {
        if let Some(op) = node.child_by_field_name("operator") {
            if node_text(op, source) == "when" {
                if let Some(left) = node.child_by_field_name("left") {
                    return left;
                }
            }
        }
    }
    node
}

fn head_parts(node: Node, source: &str) -> Option<(String, Vec<String>)> {
    match node.kind() {
        "call" => {
            let target = node.child_by_field_name("target")?;
            if target.kind() != "identifier" {
                return None;
            }
            let params = argument_nodes(node)
                .iter()
                .map(|p| node_text(*p, source).trim().to_string())
                .collect();
            Some((node_text(target, source).to_string(), params))
        }
        "identifier" => Some((node_text(node, source).to_string(), Vec::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn extract_str(source: &str) -> TypespecResult {
        let mut parser = ExParser::new(Duration::from_secs(2)).unwrap();
        let tree = parser.parse(source).unwrap();
        extract_source(source, tree.root_node(), "lib/app/accounts.ex")
    }

    #[test]
    fn specs_capture_params_and_return() {
        let result = extract_str(
            r#"
defmodule App.Accounts do
  @spec get_user(integer(), keyword()) :: User.t() | nil
  def get_user(id, opts), do: nil
end
"#,
        );
        assert_eq!(result.specs.len(), 1);
        let spec = &result.specs[0];
        assert_eq!(spec.module, "App.Accounts");
        assert_eq!(spec.name, "get_user");
        assert_eq!(spec.arity, 2);
        assert_eq!(spec.params, vec!["integer()", "keyword()"]);
        assert_eq!(spec.return_type, "User.t() | nil");
    }

    #[test]
    fn spec_when_constraints_are_unwrapped() {
        let result = extract_str(
            r#"
defmodule App.Util do
  @spec wrap(t) :: [t] when t: term()
  def wrap(x), do: [x]
end
"#,
        );
        assert_eq!(result.specs.len(), 1);
        assert_eq!(result.specs[0].params, vec!["t"]);
        assert_eq!(result.specs[0].return_type, "[t]");
    }

    #[test]
    fn typedef_kinds() {
        let result = extract_str(
            r#"
defmodule App.Types do
  @type id :: integer()
  @typep secret :: binary()
  @opaque token(inner) :: {:token, inner}
  @callback handle(term()) :: :ok | :error
  @macrocallback expand(Macro.t()) :: Macro.t()
end
"#,
        );
        let kinds: Vec<TypeDefKind> = result.typedefs.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TypeDefKind::Type,
                TypeDefKind::PrivateType,
                TypeDefKind::Opaque,
                TypeDefKind::Callback,
                TypeDefKind::Macrocallback,
            ]
        );

        let token = result
            .typedefs
            .iter()
            .find(|t| t.name == "token")
            .unwrap();
        assert_eq!(token.arity, 1);
        assert_eq!(token.params, vec!["inner"]);
        assert_eq!(token.definition, "{:token, inner}");
    }

    #[test]
    fn other_attributes_are_ignored() {
        let result = extract_str(
            r#"
defmodule App.Doc do
  @moduledoc "docs"
  @doc "fun docs"
  @behaviour GenServer
  def go, do: :ok
end
"#,
        );
        assert!(result.specs.is_empty());
        assert!(result.typedefs.is_empty());
    }
}
