//! Schema Extractor
//!
//! Walks Ecto `schema`/`embedded_schema` blocks and emits [`Schema`]
//! records: table source, typed fields in declaration order, and
//! associations. Related modules referenced through aliases declared in the
//! surrounding module are resolved to their full names.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;
use tree_sitter::Node;

use crate::config::IndexConfig;
use crate::discovery::SourceFile;
use crate::parser::{
    argument_nodes, atom_name, block_statements, call_do_block, call_head, keyword_value,
    node_text, start_line, string_value, trailing_keywords, end_line, ExParser,
};
use crate::records::{Association, AssociationKind, Schema, SchemaField};

/// Whether a file participates in schema extraction.
pub fn is_schema_source(content: &str) -> bool {
    content.contains("Ecto.Schema")
        || content.contains("embedded_schema")
        || content.contains("schema \"")
}

/// Run the schema pass over the given files. Output is sorted by module.
pub fn extract(config: &IndexConfig, files: &[SourceFile]) -> Vec<Schema> {
    let timeout = Duration::from_micros(config.parse_timeout_micros);
    let mut schemas = Vec::new();

    for file in files {
        let Ok(content) = std::fs::read_to_string(&file.path) else {
            continue;
        };
        if !is_schema_source(&content) {
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
        schemas.extend(extract_source(&content, tree.root_node(), &file.rel_path));
    }

    schemas.sort_by(|a, b| a.module.cmp(&b.module));
    schemas
}

/// Extract schemas from one parsed source.
pub fn extract_source(source: &str, root: Node, rel_path: &str) -> Vec<Schema> {
    let mut schemas = Vec::new();
    walk_modules(root, source, rel_path, &mut Vec::new(), &mut schemas);
    schemas
}

fn walk_modules(
    node: Node,
    source: &str,
    file: &str,
    module_stack: &mut Vec<String>,
    schemas: &mut Vec<Schema>,
) {
    if node.kind() == "call" && call_head(node, source) == Some("defmodule") {
        let args = argument_nodes(node);
        if let Some(name_node) = args.first().filter(|n| n.kind() == "alias") {
            module_stack.push(node_text(*name_node, source).to_string());
            let module = module_stack.join(".");
            if let Some(block) = call_do_block(node) {
                let aliases = collect_aliases(block, source);
                for stmt in block_statements(block) {
                    find_schema_blocks(stmt, source, file, &module, &aliases, schemas);
                    walk_modules(stmt, source, file, module_stack, schemas);
                }
            }
            module_stack.pop();
            return;
        }
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    for child in children {
        walk_modules(child, source, file, module_stack, schemas);
    }
}

/// Aliases declared in a module body, for resolving related modules:
/// `alias App.Post` maps `Post`, `alias App.Post, as: P` maps `P`.
fn collect_aliases(do_block: Node, source: &str) -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    for stmt in block_statements(do_block) {
        if stmt.kind() != "call" || call_head(stmt, source) != Some("alias") {
            continue;
        }
        let args = argument_nodes(stmt);
        let Some(target) = args.first().filter(|n| n.kind() == "alias") else {
            continue;
        };
        let full = node_text(*target, source).to_string();
        let short = trailing_keywords(stmt)
            .and_then(|kw| keyword_value(kw, source, "as"))
            .map(|v| node_text(v, source).to_string())
            .or_else(|| full.rsplit('.').next().map(|s| s.to_string()));
        if let Some(short) = short {
            aliases.insert(short, full);
        }
    }
    aliases
}

fn find_schema_blocks(
    node: Node,
    source: &str,
    file: &str,
    module: &str,
    aliases: &HashMap<String, String>,
    schemas: &mut Vec<Schema>,
) {
    if node.kind() != "call" {
        return;
    }
    match call_head(node, source) {
        Some("schema") => {
            let table = argument_nodes(node)
                .first()
                .and_then(|a| string_value(*a, source));
            if let Some(block) = call_do_block(node) {
                schemas.push(build_schema(
                    node, block, source, file, module, table, aliases,
                ));
            }
        }
        Some("embedded_schema") => {
            if let Some(block) = call_do_block(node) {
                schemas.push(build_schema(node, block, source, file, module, None, aliases));
            }
        }
        _ => {}
    }
}

fn build_schema(
    node: Node,
    block: Node,
    source: &str,
    file: &str,
    module: &str,
    table: Option<String>,
    aliases: &HashMap<String, String>,
) -> Schema {
    let mut fields: Vec<SchemaField> = Vec::new();
    let mut associations = Vec::new();

    let push_field = |fields: &mut Vec<SchemaField>, name: String, type_spelling: String| {
        if !fields.iter().any(|f| f.name == name) {
            fields.push(SchemaField {
                name,
                type_spelling,
            });
        }
    };

    for stmt in block_statements(block) {
        if stmt.kind() != "call" {
            continue;
        }
        let args = argument_nodes(stmt);
        match call_head(stmt, source) {
            Some("field") => {
                let Some(name) = args.first().and_then(|a| atom_name(*a, source)) else {
                    continue;
                };
                let type_spelling = args
                    .get(1)
                    .map(|t| render_type(*t, source))
                    .unwrap_or_else(|| "string".to_string());
                push_field(&mut fields, name, type_spelling);
            }
            Some("timestamps") => {
                push_field(&mut fields, "inserted_at".into(), "naive_datetime".into());
                push_field(&mut fields, "updated_at".into(), "naive_datetime".into());
            }
            Some(head) => {
                if let Some(kind) = AssociationKind::from_macro(head) {
                    let Some(name) = args.first().and_then(|a| atom_name(*a, source)) else {
                        continue;
                    };
                    let Some(related_node) = args.get(1) else {
                        continue;
                    };
                    let related = render_related(*related_node, source, aliases);
                    associations.push(Association {
                        kind,
                        name,
                        related,
                    });
                }
            }
            None => {}
        }
    }

    Schema {
        module: module.to_string(),
        source: table,
        file: file.to_string(),
        line: start_line(node),
        end_line: end_line(node),
        fields,
        associations,
    }
}

/// Stable textual rendering for a field type: atoms lose the colon, tuples
/// render braced, aliases stay verbatim.
fn render_type(node: Node, source: &str) -> String {
    match node.kind() {
        "atom" | "quoted_atom" => atom_name(node, source).unwrap_or_default(),
        "tuple" => {
            let mut cursor = node.walk();
            let inner: Vec<String> = node
                .named_children(&mut cursor)
                .map(|c| render_type(c, source))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        _ => node_text(node, source).to_string(),
    }
}

/// Render an association's related module: aliases resolve through the
/// module's alias table, module atoms are stringified.
fn render_related(node: Node, source: &str, aliases: &HashMap<String, String>) -> String {
    match node.kind() {
        "alias" => {
            let text = node_text(node, source);
            let mut segments = text.splitn(2, '.');
            let head = segments.next().unwrap_or(text);
            match (aliases.get(head), segments.next()) {
                (Some(full), Some(rest)) => format!("{}.{}", full, rest),
                (Some(full), None) => full.clone(),
                (None, _) => text.to_string(),
            }
        }
        "atom" | "quoted_atom" => atom_name(node, source).unwrap_or_default(),
        _ => node_text(node, source).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn extract_str(source: &str) -> Vec<Schema> {
        let mut parser = ExParser::new(Duration::from_secs(2)).unwrap();
        let tree = parser.parse(source).unwrap();
        extract_source(source, tree.root_node(), "lib/app/user.ex")
    }

    #[test]
    fn schema_with_fields_timestamps_and_assoc() {
        let schemas = extract_str(
            r#"
defmodule App.User do
  use Ecto.Schema

  schema "users" do
    field :email, :string
    has_many :posts, App.Post
    timestamps()
  end
end
"#,
        );
        assert_eq!(schemas.len(), 1);
        let schema = &schemas[0];
        assert_eq!(schema.module, "App.User");
        assert_eq!(schema.source.as_deref(), Some("users"));

        let fields: Vec<(String, String)> = schema
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.type_spelling.clone()))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("email".into(), "string".into()),
                ("inserted_at".into(), "naive_datetime".into()),
                ("updated_at".into(), "naive_datetime".into()),
            ]
        );

        assert_eq!(schema.associations.len(), 1);
        let assoc = &schema.associations[0];
        assert_eq!(assoc.kind, AssociationKind::HasMany);
        assert_eq!(assoc.name, "posts");
        assert_eq!(assoc.related, "App.Post");
    }

    #[test]
    fn embedded_schema_has_null_source() {
        let schemas = extract_str(
            r#"
defmodule App.Address do
  use Ecto.Schema

  embedded_schema do
    field :street
    field :tags, {:array, :string}
  end
end
"#,
        );
        let schema = &schemas[0];
        assert_eq!(schema.source, None);
        assert_eq!(schema.fields[0].type_spelling, "string");
        assert_eq!(schema.fields[1].type_spelling, "{array, string}");
    }

    #[test]
    fn related_modules_resolve_through_aliases() {
        let schemas = extract_str(
            r#"
defmodule App.Post do
  use Ecto.Schema

  alias App.Accounts.User
  alias App.Tagging.Tag, as: T

  schema "posts" do
    belongs_to :author, User
    many_to_many :tags, T, join_through: "posts_tags"
    embeds_one :meta, Meta
  end
end
"#,
        );
        let related: Vec<&str> = schemas[0]
            .associations
            .iter()
            .map(|a| a.related.as_str())
            .collect();
        assert_eq!(related, vec!["App.Accounts.User", "App.Tagging.Tag", "Meta"]);
    }

    #[test]
    fn field_names_are_unique_within_a_schema() {
        let schemas = extract_str(
            r#"
defmodule App.Dup do
  use Ecto.Schema

  schema "dups" do
    field :name, :string
    field :name, :binary
  end
end
"#,
        );
        assert_eq!(schemas[0].fields.len(), 1);
        assert_eq!(schemas[0].fields[0].type_spelling, "string");
    }

    #[test]
    fn association_kinds_map_from_macros() {
        let schemas = extract_str(
            r#"
defmodule App.Thing do
  use Ecto.Schema

  schema "things" do
    belongs_to :owner, App.User
    has_one :profile, App.Profile
    has_many :items, App.Item
    embeds_many :notes, App.Note
  end
end
"#,
        );
        let kinds: Vec<AssociationKind> = schemas[0]
            .associations
            .iter()
            .map(|a| a.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                AssociationKind::BelongsTo,
                AssociationKind::HasOne,
                AssociationKind::HasMany,
                AssociationKind::EmbedsMany,
            ]
        );
    }
}
