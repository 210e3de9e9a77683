//! Tree-Sitter Parser for Elixir Sources
//!
//! Wraps the `tree-sitter-elixir` grammar and provides the small set of
//! concrete-syntax helpers the extractors share: reading a `call` node's
//! target, arguments, and `do` block, and rendering atoms, aliases, keywords
//! and strings to text.
//!
//! The extractors never execute any macro; everything downstream is shape
//! matching over the tree produced here.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use tree_sitter::{Node, Parser, Tree};

/// Errors that can occur during parsing.
#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Failed to set language: {0}")]
    LanguageSet(String),

    /// The parser gave up (malformed input or soft timeout hit).
    #[error("Failed to parse source")]
    ParseFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ParserError>;

/// An Elixir parser with a soft per-file timeout.
///
/// Parse workers are data-independent; a worker that times out contributes
/// an empty result rather than failing the run.
pub struct ExParser {
    parser: Parser,
}

impl ExParser {
    /// Create a parser. `timeout` bounds a single `parse` call; zero
    /// disables the bound.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_elixir::LANGUAGE.into())
            .map_err(|e| ParserError::LanguageSet(e.to_string()))?;
        if !timeout.is_zero() {
            #[allow(deprecated)]
            parser.set_timeout_micros(timeout.as_micros() as u64);
        }
        Ok(Self { parser })
    }

    /// Parse source text into a syntax tree.
    pub fn parse(&mut self, source: &str) -> Result<Tree> {
        self.parser.parse(source, None).ok_or(ParserError::ParseFailed)
    }

    /// Parse a file, soft-failing to `None` on read or parse errors.
    pub fn parse_file(&mut self, path: &Path) -> Option<(String, Tree)> {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                debug!("Cannot read {}: {}", path.display(), e);
                return None;
            }
        };
        match self.parse(&source) {
            Ok(tree) => Some((source, tree)),
            Err(e) => {
                debug!("Parse failed for {}: {}", path.display(), e);
                None
            }
        }
    }
}

// ============================================================================
// CST helpers
// ============================================================================

/// Source text of a node.
pub fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// 1-based start line.
pub fn start_line(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-based end line.
pub fn end_line(node: Node) -> u32 {
    node.end_position().row as u32 + 1
}

/// For a `call` node, the text of its `target` field when that target is a
/// plain identifier (`def`, `scope`, `field`, ...). Qualified targets
/// (`Mod.fun`) return `None`.
pub fn call_head<'a>(node: Node, source: &'a str) -> Option<&'a str> {
    let target = node.child_by_field_name("target")?;
    if target.kind() == "identifier" {
        Some(node_text(target, source))
    } else {
        None
    }
}

/// The `arguments` child of a `call` node.
pub fn call_arguments(node: Node) -> Option<Node> {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .find(|c| c.kind() == "arguments");
    found
}

/// Named argument nodes of a `call`, excluding comments.
pub fn argument_nodes(node: Node) -> Vec<Node> {
    match call_arguments(node) {
        Some(args) => {
            let mut cursor = args.walk();
            args.named_children(&mut cursor)
                .filter(|c| c.kind() != "comment")
                .collect()
        }
        None => Vec::new(),
    }
}

/// The `do_block` child of a `call` node.
pub fn call_do_block(node: Node) -> Option<Node> {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .find(|c| c.kind() == "do_block");
    found
}

/// Statement nodes of a `do_block` body (skips comments and the
/// `after`/`else`/`rescue` sub-blocks).
pub fn block_statements(do_block: Node) -> Vec<Node> {
    let mut cursor = do_block.walk();
    do_block
        .named_children(&mut cursor)
        .filter(|c| {
            !matches!(
                c.kind(),
                "comment" | "after_block" | "rescue_block" | "catch_block" | "else_block"
            )
        })
        .collect()
}

/// Render an atom node (`:foo`, `:"quoted"`) to its bare name.
pub fn atom_name(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "atom" => Some(node_text(node, source).trim_start_matches(':').to_string()),
        "quoted_atom" => {
            let mut cursor = node.walk();
            let inner = node
                .named_children(&mut cursor)
                .find(|c| c.kind() == "quoted_content")
                .map(|c| node_text(c, source).to_string());
            inner
        }
        _ => None,
    }
}

/// Render a plain string literal; `None` for interpolated strings.
pub fn string_value(node: Node, source: &str) -> Option<String> {
    if node.kind() != "string" {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    match children.as_slice() {
        [] => Some(String::new()),
        [only] if only.kind() == "quoted_content" => Some(node_text(*only, source).to_string()),
        _ => None,
    }
}

/// Keyword key name of a `pair` node (`only: ...` → `only`).
pub fn pair_key_name(pair: Node, source: &str) -> Option<String> {
    let key = pair.child_by_field_name("key")?;
    match key.kind() {
        "keyword" => Some(
            node_text(key, source)
                .trim_end()
                .trim_end_matches(':')
                .to_string(),
        ),
        "quoted_keyword" => {
            let mut cursor = key.walk();
            let inner = key
                .named_children(&mut cursor)
                .find(|c| c.kind() == "quoted_content")
                .map(|c| node_text(c, source).to_string());
            inner
        }
        _ => None,
    }
}

/// The `keywords` trailing-argument node of a `call`'s arguments, if any.
pub fn trailing_keywords(node: Node) -> Option<Node> {
    argument_nodes(node)
        .into_iter()
        .rev()
        .find(|c| c.kind() == "keywords")
}

/// Look up a keyword value (`opts[:key]`) inside a `keywords` node.
pub fn keyword_value<'t>(keywords: Node<'t>, source: &str, key: &str) -> Option<Node<'t>> {
    let mut cursor = keywords.walk();
    for pair in keywords.named_children(&mut cursor) {
        if pair.kind() != "pair" {
            continue;
        }
        if pair_key_name(pair, source).as_deref() == Some(key) {
            return pair.child_by_field_name("value");
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(source: &str) -> (String, Tree) {
        let mut parser = ExParser::new(Duration::from_secs(2)).unwrap();
        let tree = parser.parse(source).unwrap();
        (source.to_string(), tree)
    }

    /// First `call` node in the tree, depth-first.
    fn first_call(tree: &Tree) -> Node<'_> {
        fn walk<'t>(node: Node<'t>) -> Option<Node<'t>> {
            if node.kind() == "call" {
                return Some(node);
            }
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            children.into_iter().find_map(walk)
        }
        walk(tree.root_node()).expect("no call node")
    }

    #[test]
    fn parses_a_module() {
        let (source, tree) = parse("defmodule Foo do\n  def bar, do: :ok\nend\n");
        let call = first_call(&tree);
        assert_eq!(call_head(call, &source), Some("defmodule"));
        assert_eq!(start_line(call), 1);
        assert_eq!(end_line(call), 3);
    }

    #[test]
    fn reads_call_arguments() {
        let (source, tree) = parse("get \"/users\", UserController, :index\n");
        let call = first_call(&tree);
        assert_eq!(call_head(call, &source), Some("get"));
        let args = argument_nodes(call);
        assert_eq!(args.len(), 3);
        assert_eq!(string_value(args[0], &source), Some("/users".into()));
        assert_eq!(node_text(args[1], &source), "UserController");
        assert_eq!(atom_name(args[2], &source), Some("index".into()));
    }

    #[test]
    fn reads_keyword_options() {
        let (source, tree) = parse("resources \"/users\", UserController, only: [:index, :show]\n");
        let call = first_call(&tree);
        let keywords = trailing_keywords(call).expect("keywords");
        let only = keyword_value(keywords, &source, "only").expect("only");
        assert_eq!(only.kind(), "list");
        assert!(keyword_value(keywords, &source, "except").is_none());
    }

    #[test]
    fn block_statements_skip_comments() {
        let (_, tree) = parse("defmodule Foo do\n  # comment\n  def a, do: 1\n  def b, do: 2\nend\n");
        let module = first_call(&tree);
        let block = call_do_block(module).expect("do block");
        assert_eq!(block_statements(block).len(), 2);
    }

    #[test]
    fn parse_failure_is_soft_for_files() {
        let mut parser = ExParser::new(Duration::from_secs(2)).unwrap();
        assert!(parser
            .parse_file(Path::new("/nonexistent/file.ex"))
            .is_none());
    }
}
