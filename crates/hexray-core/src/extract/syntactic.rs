//! Syntactic Extractor
//!
//! Recursive descent over each file's concrete syntax tree, collecting
//! module definitions, function definitions, directives, struct
//! definitions, and call sites. Files are parsed independently and in
//! parallel; any per-file failure yields an empty contribution.
//!
//! Unqualified calls that are not reserved syntactic forms are emitted with
//! a `None` callee: an intentional "unresolved local call" marker that the
//! compiler-trace phase overwrites through the call-site key.

use std::time::Duration;

use rayon::prelude::*;
use tracing::debug;
use tree_sitter::Node;

use crate::config::IndexConfig;
use crate::discovery::SourceFile;
use crate::parser::{
    argument_nodes, atom_name, block_statements, call_do_block, call_head, end_line,
    keyword_value, node_text, pair_key_name, start_line, trailing_keywords, ExParser,
};
use crate::records::{
    format_mfa, CallRef, DirectiveKind, DirectiveRef, FunctionDef, ModuleDef, StructDef,
    StructField, Visibility,
};

/// Identifier-headed forms that are part of the language surface, not calls.
///
/// Definition and directive heads, control flow, and the quoting forms.
/// Operators, captures, and type ascription never parse as `call` nodes in
/// the grammar, so they need no entry here. This list is the only
/// language-specific knowledge the extractor needs.
const RESERVED_FORMS: &[&str] = &[
    "defmodule",
    "def",
    "defp",
    "defmacro",
    "defmacrop",
    "defprotocol",
    "defimpl",
    "defdelegate",
    "defguard",
    "defguardp",
    "defexception",
    "defoverridable",
    "defstruct",
    "alias",
    "import",
    "require",
    "use",
    "if",
    "unless",
    "case",
    "cond",
    "for",
    "with",
    "receive",
    "try",
    "quote",
    "unquote",
    "unquote_splicing",
];

fn is_reserved_form(head: &str) -> bool {
    RESERVED_FORMS.contains(&head)
}

/// Everything the syntactic pass learns about a set of files.
#[derive(Debug, Default, Clone)]
pub struct SyntacticResult {
    pub modules: Vec<ModuleDef>,
    pub functions: Vec<FunctionDef>,
    pub calls: Vec<CallRef>,
    pub directives: Vec<DirectiveRef>,
    pub structs: Vec<StructDef>,
}

impl SyntacticResult {
    fn merge(&mut self, other: SyntacticResult) {
        self.modules.extend(other.modules);
        self.functions.extend(other.functions);
        self.calls.extend(other.calls);
        self.directives.extend(other.directives);
        self.structs.extend(other.structs);
    }

    /// Deterministic ordering: modules by name, functions by
    /// (module, name, arity), the rest by (file, line).
    fn sort(&mut self) {
        self.modules.sort_by(|a, b| a.module.cmp(&b.module));
        self.functions.sort_by(|a, b| {
            (&a.module, &a.name, a.arity).cmp(&(&b.module, &b.name, b.arity))
        });
        self.calls
            .sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        self.directives
            .sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        self.structs
            .sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
    }
}

/// Run the syntactic pass over the given files, in parallel.
pub fn extract(config: &IndexConfig, files: &[SourceFile]) -> SyntacticResult {
    let timeout = Duration::from_micros(config.parse_timeout_micros);

    let partials: Vec<SyntacticResult> = files
        .par_iter()
        .map(|file| {
            let mut parser = match ExParser::new(timeout) {
                Ok(p) => p,
                Err(e) => {
                    debug!("Parser init failed: {}", e);
                    return SyntacticResult::default();
                }
            };
            match parser.parse_file(&file.path) {
                Some((source, tree)) => extract_source(&source, tree.root_node(), &file.rel_path),
                None => SyntacticResult::default(),
            }
        })
        .collect();

    let mut result = SyntacticResult::default();
    for partial in partials {
        result.merge(partial);
    }
    result.sort();
    result
}

/// Extract from a single parsed source. Public for the DSL extractors and
/// tests, which reuse the same descent.
pub fn extract_source(source: &str, root: Node, rel_path: &str) -> SyntacticResult {
    let mut walker = Walker {
        source,
        file: rel_path,
        result: SyntacticResult::default(),
        module_stack: Vec::new(),
        current_fn: None,
    };
    walker.visit_children(root);
    walker.result
}

/// Descent context: the module stack and the enclosing function MFA.
struct Walker<'s> {
    source: &'s str,
    file: &'s str,
    result: SyntacticResult,
    module_stack: Vec<String>,
    current_fn: Option<String>,
}

impl<'s> Walker<'s> {
    fn current_module(&self) -> Option<String> {
        if self.module_stack.is_empty() {
            None
        } else {
            Some(self.module_stack.join("."))
        }
    }

    fn visit_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn visit(&mut self, node: Node) {
        if node.kind() != "call" {
            self.visit_children(node);
            return;
        }

        match call_head(node, self.source) {
            Some("defmodule") => self.enter_module(node),
            Some(head @ ("def" | "defp" | "defmacro" | "defmacrop")) => {
                self.enter_function(node, head)
            }
            Some("alias") => self.record_directive(node, DirectiveKind::Alias),
            Some("import") => self.record_directive(node, DirectiveKind::Import),
            Some("require") => self.record_directive(node, DirectiveKind::Require),
            Some("use") => self.record_directive(node, DirectiveKind::Use),
            Some("defstruct") => self.record_struct(node),
            Some(head) if is_reserved_form(head) => self.visit_children(node),
            Some(head) => {
                // Unqualified call: unresolved local marker when inside a
                // known function.
                if self.current_fn.is_some() {
                    self.record_call(node, None, head.to_string());
                }
                self.visit_children(node);
            }
            None => {
                if let Some((module, name)) = qualified_target(node, self.source) {
                    if self.current_fn.is_some() {
                        self.record_call(node, Some(module), name);
                    }
                }
                self.visit_children(node);
            }
        }
    }

    fn enter_module(&mut self, node: Node) {
        let args = argument_nodes(node);
        let name = match args.first() {
            Some(n) if n.kind() == "alias" => node_text(*n, self.source).to_string(),
            _ => {
                self.visit_children(node);
                return;
            }
        };

        self.module_stack.push(name);
        let module = self.module_stack.join(".");

        let behaviours = call_do_block(node)
            .map(|block| collect_behaviours(block, self.source))
            .unwrap_or_default();

        self.result.modules.push(ModuleDef {
            module,
            file: self.file.to_string(),
            line: start_line(node),
            end_line: end_line(node),
            behaviours,
        });

        if let Some(block) = call_do_block(node) {
            for stmt in block_statements(block) {
                self.visit(stmt);
            }
        }
        self.module_stack.pop();
    }

    fn enter_function(&mut self, node: Node, head: &str) {
        let Some(module) = self.current_module() else {
            self.visit_children(node);
            return;
        };
        let args = argument_nodes(node);
        let Some(head_node) = args.first() else {
            return;
        };
        let Some((name, arity)) = function_signature(*head_node, self.source) else {
            return;
        };

        let visibility = match head {
            "defp" | "defmacrop" => Visibility::Private,
            _ => Visibility::Public,
        };
        let is_macro = matches!(head, "defmacro" | "defmacrop");

        self.result.functions.push(FunctionDef {
            module: module.clone(),
            name: name.clone(),
            arity,
            visibility,
            is_macro,
            file: self.file.to_string(),
            line: start_line(node),
            end_line: end_line(node),
        });

        let previous = self.current_fn.replace(format_mfa(&module, &name, arity));

        // Body: `do ... end` block or the `do:` keyword form.
        if let Some(block) = call_do_block(node) {
            for stmt in block_statements(block) {
                self.visit(stmt);
            }
        } else if let Some(keywords) = trailing_keywords(node) {
            if let Some(body) = keyword_value(keywords, self.source, "do") {
                self.visit(body);
            }
        }

        self.current_fn = previous;
    }

    fn record_directive(&mut self, node: Node, kind: DirectiveKind) {
        let Some(module) = self.current_module() else {
            return;
        };
        let args = argument_nodes(node);
        let Some(first) = args.first() else {
            return;
        };

        let line = start_line(node);
        let keywords = trailing_keywords(node);

        let as_alias = keywords
            .and_then(|kw| keyword_value(kw, self.source, "as"))
            .map(|v| node_text(v, self.source).to_string());
        let only = keywords
            .and_then(|kw| keyword_value(kw, self.source, "only"))
            .map(|v| selector_list(v, self.source));
        let except = keywords
            .and_then(|kw| keyword_value(kw, self.source, "except"))
            .map(|v| selector_list(v, self.source));

        for target in directive_targets(*first, self.source) {
            self.result.directives.push(DirectiveRef {
                kind,
                module: module.clone(),
                target,
                file: self.file.to_string(),
                line,
                as_alias: as_alias.clone(),
                only: only.clone(),
                except: except.clone(),
            });
        }
    }

    fn record_struct(&mut self, node: Node) {
        let Some(module) = self.current_module() else {
            return;
        };
        let args = argument_nodes(node);

        let mut fields = Vec::new();
        // `defstruct [:a, :b]`, `defstruct a: 1, b: nil`, or a mix inside
        // one list.
        let field_nodes: Vec<Node> = match args.first() {
            Some(list) if list.kind() == "list" => {
                let mut cursor = list.walk();
                list.named_children(&mut cursor).collect()
            }
            Some(kw) if kw.kind() == "keywords" => {
                let mut cursor = kw.walk();
                kw.named_children(&mut cursor).collect()
            }
            _ => Vec::new(),
        };

        for field in field_nodes {
            match field.kind() {
                "atom" | "quoted_atom" => {
                    if let Some(name) = atom_name(field, self.source) {
                        fields.push(StructField {
                            name,
                            default: None,
                        });
                    }
                }
                "pair" => {
                    if let Some(name) = pair_key_name(field, self.source) {
                        let default = field
                            .child_by_field_name("value")
                            .map(|v| node_text(v, self.source).to_string());
                        fields.push(StructField { name, default });
                    }
                }
                "keywords" => {
                    let mut cursor = field.walk();
                    let pairs: Vec<Node> = field.named_children(&mut cursor).collect();
                    for pair in pairs {
                        if let Some(name) = pair_key_name(pair, self.source) {
                            let default = pair
                                .child_by_field_name("value")
                                .map(|v| node_text(v, self.source).to_string());
                            fields.push(StructField { name, default });
                        }
                    }
                }
                _ => {}
            }
        }

        self.result.structs.push(StructDef {
            module,
            file: self.file.to_string(),
            line: start_line(node),
            fields,
        });
    }

    fn record_call(&mut self, node: Node, module: Option<String>, name: String) {
        let Some(caller) = self.current_fn.clone() else {
            return;
        };
        let mut arity = argument_nodes(node).len() as u32;
        if is_pipe_target(node) {
            arity += 1;
        }
        let callee = module.map(|m| format_mfa(&m, &name, arity));
        self.result.calls.push(CallRef {
            caller,
            callee,
            file: self.file.to_string(),
            line: start_line(node),
        });
    }
}

/// `(name, arity)` of a definition head: `foo(a, b)`, bare `foo`, or a
/// `when`-guarded head.
fn function_signature(head: Node, source: &str) -> Option<(String, u32)> {
    match head.kind() {
        "call" => {
            let target = head.child_by_field_name("target")?;
            if target.kind() != "identifier" {
                return None;
            }
            let name = node_text(target, source).to_string();
            let arity = argument_nodes(head).len() as u32;
            Some((name, arity))
        }
        "identifier" => Some((node_text(head, source).to_string(), 0)),
        "binary_operator" => {
            let op = head.child_by_field_name("operator")?;
            if node_text(op, source) != "when" {
                return None;
            }
            function_signature(head.child_by_field_name("left")?, source)
        }
        _ => None,
    }
}

/// For a qualified call `Mod.Sub.fun(...)`, the (module, function) pair.
fn qualified_target(node: Node, source: &str) -> Option<(String, String)> {
    let target = node.child_by_field_name("target")?;
    if target.kind() != "dot" {
        return None;
    }
    let left = target.child_by_field_name("left")?;
    let right = target.child_by_field_name("right")?;
    if right.kind() != "identifier" {
        return None;
    }
    if left.kind() != "alias" {
        // Calls through variables, module attributes, or erlang atoms are
        // left to the compiler tracer.
        return None;
    }
    Some((
        node_text(left, source).to_string(),
        node_text(right, source).to_string(),
    ))
}

/// Whether a call is the right-hand side of `|>` (its arity is one higher
/// than the visible argument count).
fn is_pipe_target(node: Node) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    if parent.kind() != "binary_operator" {
        return false;
    }
    // The operator token's kind is the operator text itself in this grammar.
    let Some(op) = parent.child_by_field_name("operator") else {
        return false;
    };
    if op.kind() != "|>" {
        return false;
    }
    parent
        .child_by_field_name("right")
        .map(|r| r.id() == node.id())
        .unwrap_or(false)
}

/// Expand a directive target: a plain alias, or the multi-alias form
/// `Mod.{A, B}`.
fn directive_targets(node: Node, source: &str) -> Vec<String> {
    match node.kind() {
        "alias" => vec![node_text(node, source).to_string()],
        "identifier" if node_text(node, source) == "__MODULE__" => {
            vec!["__MODULE__".to_string()]
        }
        "dot" => {
            let Some(left) = node.child_by_field_name("left") else {
                return Vec::new();
            };
            let Some(right) = node.child_by_field_name("right") else {
                return Vec::new();
            };
            let prefix = node_text(left, source).to_string();
            if right.kind() == "tuple" {
                let mut cursor = right.walk();
                right
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "alias")
                    .map(|c| format!("{}.{}", prefix, node_text(c, source)))
                    .collect()
            } else {
                vec![format!("{}.{}", prefix, node_text(right, source))]
            }
        }
        _ => Vec::new(),
    }
}

/// Render `only:`/`except:` selectors (`[bar: 1, baz: 2]`) as
/// `name/arity` strings; non-keyword entries render verbatim.
fn selector_list(node: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    if node.kind() != "list" {
        out.push(node_text(node, source).to_string());
        return out;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    for child in children {
        match child.kind() {
            "keywords" => {
                let mut kcursor = child.walk();
                let pairs: Vec<Node> = child.named_children(&mut kcursor).collect();
                for pair in pairs {
                    if let Some(name) = pair_key_name(pair, source) {
                        let arity = pair
                            .child_by_field_name("value")
                            .map(|v| node_text(v, source).trim().to_string())
                            .unwrap_or_default();
                        out.push(format!("{}/{}", name, arity));
                    }
                }
            }
            "pair" => {
                if let Some(name) = pair_key_name(child, source) {
                    let arity = child
                        .child_by_field_name("value")
                        .map(|v| node_text(v, source).trim().to_string())
                        .unwrap_or_default();
                    out.push(format!("{}/{}", name, arity));
                }
            }
            "atom" | "quoted_atom" => {
                if let Some(name) = atom_name(child, source) {
                    out.push(name);
                }
            }
            _ => out.push(node_text(child, source).to_string()),
        }
    }
    out
}

/// `@behaviour` targets declared directly in a module body.
fn collect_behaviours(do_block: Node, source: &str) -> Vec<String> {
    let mut behaviours = Vec::new();
    for stmt in block_statements(do_block) {
        if stmt.kind() != "unary_operator" {
            continue;
        }
        let Some(operand) = stmt.child_by_field_name("operand") else {
            continue;
        };
        if operand.kind() != "call" {
            continue;
        }
        if call_head(operand, source) != Some("behaviour") {
            continue;
        }
        if let Some(target) = argument_nodes(operand).first() {
            if target.kind() == "alias" {
                behaviours.push(node_text(*target, source).to_string());
            }
        }
    }
    behaviours
}
