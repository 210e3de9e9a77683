//! Record Model for the Hexray Index
//!
//! Every fact the extractors learn about a project is a [`Record`]: a module
//! or function definition, a call site, a directive, a Phoenix route, an
//! Ecto schema, a typespec, a diagnostic, or a dependency edge. Records are
//! persisted as one JSON envelope per line in `index.jsonl`:
//!
//! ```json
//! {"kind": "function_def", "data": {...}, "source": "syntactic", "confidence": "medium"}
//! ```
//!
//! The `source`/`confidence` pair drives cross-phase merging: the compiler
//! tracer outranks the xref manifest, which outranks the syntactic pass.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Version tag written into `manifest.json`. A mismatch forces a full rebuild.
pub const INDEX_SCHEMA_VERSION: &str = "1";

// ============================================================================
// Provenance
// ============================================================================

/// Which extraction phase produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Tree-sitter pass over the concrete syntax tree.
    Syntactic,
    /// Compiler tracer events (resolved symbols).
    Compiler,
    /// Compilation-manifest cross references.
    Xref,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Syntactic => "syntactic",
            Source::Compiler => "compiler",
            Source::Xref => "xref",
        }
    }

    /// Merge priority: higher wins when two phases report the same call site.
    pub fn priority(&self) -> u8 {
        match self {
            Source::Syntactic => 0,
            Source::Xref => 1,
            Source::Compiler => 2,
        }
    }
}

/// How much the producing phase trusts a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

// ============================================================================
// MFA
// ============================================================================

/// A fully-qualified function reference: `Module.Sub.name/arity`.
///
/// The grammar is `<Module>(.<Submodule>)*.<name>/<arity>` where module
/// segments start with an uppercase letter, the function name with a
/// lowercase letter or underscore (trailing `?`/`!` allowed), and the arity
/// is a non-negative integer. Strings violating the grammar parse to `None`,
/// which query callers turn into an empty result rather than an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mfa {
    pub module: String,
    pub name: String,
    pub arity: u32,
}

impl Mfa {
    pub fn new(module: impl Into<String>, name: impl Into<String>, arity: u32) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            arity,
        }
    }

    /// Parse an `Module.name/arity` string, returning `None` on any grammar
    /// violation.
    pub fn parse(s: &str) -> Option<Self> {
        let (head, arity) = s.rsplit_once('/')?;
        let arity: u32 = arity.parse().ok()?;
        let (module, name) = head.rsplit_once('.')?;
        if module.is_empty() || name.is_empty() {
            return None;
        }
        if !module.split('.').all(is_module_segment) {
            return None;
        }
        if !is_function_name(name) {
            return None;
        }
        Some(Self::new(module, name, arity))
    }
}

impl fmt::Display for Mfa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.module, self.name, self.arity)
    }
}

fn is_module_segment(seg: &str) -> bool {
    let mut chars = seg.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_function_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    let rest: Vec<char> = chars.collect();
    for (i, c) in rest.iter().copied().enumerate() {
        let last = i + 1 == rest.len();
        match c {
            c if c.is_ascii_alphanumeric() || c == '_' => {}
            '?' | '!' if last => {}
            _ => return false,
        }
    }
    true
}

/// Format a module/function/arity triple as an MFA string.
pub fn format_mfa(module: &str, name: &str, arity: u32) -> String {
    format!("{}.{}/{}", module, name, arity)
}

// ============================================================================
// Record kinds
// ============================================================================

/// Function visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// A `defmodule` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    /// Fully-qualified module name (nested modules joined with `.`).
    pub module: String,
    pub file: String,
    pub line: u32,
    pub end_line: u32,
    /// `@behaviour` targets declared in the module body.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub behaviours: Vec<String>,
}

/// A `def`/`defp`/`defmacro`/`defmacrop` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub module: String,
    pub name: String,
    pub arity: u32,
    pub visibility: Visibility,
    #[serde(rename = "macro")]
    pub is_macro: bool,
    pub file: String,
    pub line: u32,
    pub end_line: u32,
}

impl FunctionDef {
    pub fn mfa(&self) -> String {
        format_mfa(&self.module, &self.name, self.arity)
    }
}

/// A call site. `callee` is `None` for unresolved local calls from the
/// syntactic pass; later phases overwrite those through the call-site key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRef {
    /// MFA of the enclosing function.
    pub caller: String,
    /// MFA of the called function, when resolved.
    pub callee: Option<String>,
    pub file: String,
    pub line: u32,
}

impl CallRef {
    /// Primary key for cross-phase deduplication.
    pub fn call_site_key(&self) -> (String, u32, Option<String>) {
        (self.file.clone(), self.line, self.callee.clone())
    }
}

/// Directive kinds establishing compile-time module relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveKind {
    Alias,
    Import,
    Require,
    Use,
}

impl DirectiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectiveKind::Alias => "alias",
            DirectiveKind::Import => "import",
            DirectiveKind::Require => "require",
            DirectiveKind::Use => "use",
        }
    }
}

/// An `alias`/`import`/`require`/`use` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveRef {
    pub kind: DirectiveKind,
    /// Module issuing the directive.
    pub module: String,
    /// Module the directive points at.
    pub target: String,
    pub file: String,
    pub line: u32,
    /// `as:` rename, when present.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub as_alias: Option<String>,
    /// `only:` selectors as `name/arity` strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<Vec<String>>,
    /// `except:` selectors as `name/arity` strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<Vec<String>>,
}

/// One field of a `defstruct`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    /// Default value literal, rendered from source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// A `defstruct` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub module: String,
    pub file: String,
    pub line: u32,
    pub fields: Vec<StructField>,
}

/// A concrete route folded out of the router DSL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// HTTP verb, uppercased.
    pub verb: String,
    /// Fully-expanded path, starting with `/`, no doubled slashes.
    pub path: String,
    /// Controller module, fully qualified after scope-alias folding.
    pub controller: String,
    pub action: String,
    /// Router module the route was declared in.
    pub router: String,
    pub file: String,
    pub line: u32,
}

impl Route {
    /// Unique key: (verb, path, controller, action).
    pub fn key(&self) -> (String, String, String, String) {
        (
            self.verb.clone(),
            self.path.clone(),
            self.controller.clone(),
            self.action.clone(),
        )
    }
}

/// Ecto association kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    BelongsTo,
    HasOne,
    HasMany,
    ManyToMany,
    EmbedsOne,
    EmbedsMany,
}

impl AssociationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationKind::BelongsTo => "belongs_to",
            AssociationKind::HasOne => "has_one",
            AssociationKind::HasMany => "has_many",
            AssociationKind::ManyToMany => "many_to_many",
            AssociationKind::EmbedsOne => "embeds_one",
            AssociationKind::EmbedsMany => "embeds_many",
        }
    }

    pub fn from_macro(name: &str) -> Option<Self> {
        match name {
            "belongs_to" => Some(AssociationKind::BelongsTo),
            "has_one" => Some(AssociationKind::HasOne),
            "has_many" => Some(AssociationKind::HasMany),
            "many_to_many" => Some(AssociationKind::ManyToMany),
            "embeds_one" => Some(AssociationKind::EmbedsOne),
            "embeds_many" => Some(AssociationKind::EmbedsMany),
            _ => None,
        }
    }
}

/// One typed field of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    /// Stable textual rendering of the field type (`string`, `{array, string}`).
    #[serde(rename = "type")]
    pub type_spelling: String,
}

/// One association of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub kind: AssociationKind,
    pub name: String,
    /// Related module, fully resolved where the source allows.
    pub related: String,
}

/// An Ecto `schema`/`embedded_schema` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub module: String,
    /// Table source; `None` for embedded schemas.
    pub source: Option<String>,
    pub file: String,
    pub line: u32,
    pub end_line: u32,
    /// Fields in declaration order.
    pub fields: Vec<SchemaField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub associations: Vec<Association>,
}

/// A `@spec` annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    pub module: String,
    pub name: String,
    pub arity: u32,
    /// Parameter type spellings, left to right.
    pub params: Vec<String>,
    /// Return type spelling.
    #[serde(rename = "return")]
    pub return_type: String,
    pub file: String,
    pub line: u32,
}

/// Kinds of type-level definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDefKind {
    Type,
    PrivateType,
    Opaque,
    Callback,
    Macrocallback,
}

impl TypeDefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeDefKind::Type => "type",
            TypeDefKind::PrivateType => "private_type",
            TypeDefKind::Opaque => "opaque",
            TypeDefKind::Callback => "callback",
            TypeDefKind::Macrocallback => "macrocallback",
        }
    }
}

/// A `@type`/`@typep`/`@opaque`/`@callback`/`@macrocallback` annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub module: String,
    pub name: String,
    pub arity: u32,
    pub kind: TypeDefKind,
    /// Parameter names, left to right.
    pub params: Vec<String>,
    /// Definition spelling, rendered from source.
    pub definition: String,
    pub file: String,
    pub line: u32,
}

/// Diagnostic severities, matching the compiler's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl Severity {
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "error" => Severity::Error,
            "info" => Severity::Info,
            "hint" => Severity::Hint,
            _ => Severity::Warning,
        }
    }
}

/// A compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: String,
    pub line: u32,
    /// Originating compiler stage, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
}

/// Inter-module dependency types from the compilation manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepType {
    Compile,
    Runtime,
    Export,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Compile => "compile",
            DepType::Runtime => "runtime",
            DepType::Export => "export",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "compile" => Some(DepType::Compile),
            "runtime" => Some(DepType::Runtime),
            "export" => Some(DepType::Export),
            _ => None,
        }
    }
}

/// A module dependency edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepEdge {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub dep_type: DepType,
}

impl DepEdge {
    /// Unique key: (from, to, type).
    pub fn key(&self) -> (String, String, DepType) {
        (self.from.clone(), self.to.clone(), self.dep_type)
    }
}

// ============================================================================
// The Record sum type
// ============================================================================

/// Any record the index can hold, tagged for the on-disk envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Record {
    ModuleDef(ModuleDef),
    FunctionDef(FunctionDef),
    CallRef(CallRef),
    DirectiveRef(DirectiveRef),
    StructDef(StructDef),
    Route(Route),
    Schema(Schema),
    TypeSpec(TypeSpec),
    TypeDef(TypeDef),
    Diagnostic(Diagnostic),
    DepEdge(DepEdge),
}

/// All record kind tags, for cross-cutting operations.
pub const RECORD_KINDS: &[&str] = &[
    "module_def",
    "function_def",
    "call_ref",
    "directive_ref",
    "struct_def",
    "route",
    "schema",
    "type_spec",
    "type_def",
    "diagnostic",
    "dep_edge",
];

impl Record {
    /// The envelope `kind` tag for this record.
    pub fn kind(&self) -> &'static str {
        match self {
            Record::ModuleDef(_) => "module_def",
            Record::FunctionDef(_) => "function_def",
            Record::CallRef(_) => "call_ref",
            Record::DirectiveRef(_) => "directive_ref",
            Record::StructDef(_) => "struct_def",
            Record::Route(_) => "route",
            Record::Schema(_) => "schema",
            Record::TypeSpec(_) => "type_spec",
            Record::TypeDef(_) => "type_def",
            Record::Diagnostic(_) => "diagnostic",
            Record::DepEdge(_) => "dep_edge",
        }
    }

    /// The file a record is attributed to. Dependency edges carry none.
    pub fn file(&self) -> Option<&str> {
        match self {
            Record::ModuleDef(r) => Some(&r.file),
            Record::FunctionDef(r) => Some(&r.file),
            Record::CallRef(r) => Some(&r.file),
            Record::DirectiveRef(r) => Some(&r.file),
            Record::StructDef(r) => Some(&r.file),
            Record::Route(r) => Some(&r.file),
            Record::Schema(r) => Some(&r.file),
            Record::TypeSpec(r) => Some(&r.file),
            Record::TypeDef(r) => Some(&r.file),
            Record::Diagnostic(r) => Some(&r.file),
            Record::DepEdge(_) => None,
        }
    }
}

// ============================================================================
// On-disk envelope
// ============================================================================

/// One line of `index.jsonl`: a record plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub record: Record,
    pub source: Source,
    pub confidence: Confidence,
}

impl Envelope {
    pub fn new(record: Record, source: Source, confidence: Confidence) -> Self {
        Self {
            record,
            source,
            confidence,
        }
    }

    /// Syntactic records default to medium confidence.
    pub fn syntactic(record: Record) -> Self {
        Self::new(record, Source::Syntactic, Confidence::Medium)
    }

    /// Tracer records are high confidence: the compiler resolved the symbol.
    pub fn compiler(record: Record) -> Self {
        Self::new(record, Source::Compiler, Confidence::High)
    }

    /// Xref records are high confidence module-level facts.
    pub fn xref(record: Record) -> Self {
        Self::new(record, Source::Xref, Confidence::High)
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mfa_parses_well_formed_strings() {
        let mfa = Mfa::parse("MyApp.Accounts.get_user/1").unwrap();
        assert_eq!(mfa.module, "MyApp.Accounts");
        assert_eq!(mfa.name, "get_user");
        assert_eq!(mfa.arity, 1);
        assert_eq!(mfa.to_string(), "MyApp.Accounts.get_user/1");

        let mfa = Mfa::parse("App.valid?/0").unwrap();
        assert_eq!(mfa.name, "valid?");
        assert_eq!(mfa.arity, 0);
    }

    #[test]
    fn mfa_rejects_grammar_violations() {
        assert!(Mfa::parse("no_module/1").is_none());
        assert!(Mfa::parse("Mod.fun").is_none());
        assert!(Mfa::parse("Mod.fun/-1").is_none());
        assert!(Mfa::parse("Mod.fun/abc").is_none());
        assert!(Mfa::parse("lower.fun/1").is_none());
        assert!(Mfa::parse("Mod.Fun/1").is_none());
        assert!(Mfa::parse("").is_none());
        assert!(Mfa::parse("Mod./1").is_none());
    }

    #[test]
    fn envelope_round_trips_every_kind() {
        let records = vec![
            Record::ModuleDef(ModuleDef {
                module: "MyApp.Accounts".into(),
                file: "lib/my_app/accounts.ex".into(),
                line: 1,
                end_line: 40,
                behaviours: vec!["GenServer".into()],
            }),
            Record::FunctionDef(FunctionDef {
                module: "MyApp.Accounts".into(),
                name: "get_user".into(),
                arity: 1,
                visibility: Visibility::Public,
                is_macro: false,
                file: "lib/my_app/accounts.ex".into(),
                line: 10,
                end_line: 14,
            }),
            Record::CallRef(CallRef {
                caller: "MyApp.Accounts.get_user/1".into(),
                callee: None,
                file: "lib/my_app/accounts.ex".into(),
                line: 12,
            }),
            Record::DirectiveRef(DirectiveRef {
                kind: DirectiveKind::Import,
                module: "MyApp.Accounts".into(),
                target: "Ecto.Query".into(),
                file: "lib/my_app/accounts.ex".into(),
                line: 3,
                as_alias: None,
                only: Some(vec!["from/2".into()]),
                except: None,
            }),
            Record::StructDef(StructDef {
                module: "MyApp.User".into(),
                file: "lib/my_app/user.ex".into(),
                line: 5,
                fields: vec![StructField {
                    name: "email".into(),
                    default: Some("nil".into()),
                }],
            }),
            Record::Route(Route {
                verb: "GET".into(),
                path: "/api/users".into(),
                controller: "MyAppWeb.UserController".into(),
                action: "index".into(),
                router: "MyAppWeb.Router".into(),
                file: "lib/my_app_web/router.ex".into(),
                line: 12,
            }),
            Record::Schema(Schema {
                module: "MyApp.User".into(),
                source: Some("users".into()),
                file: "lib/my_app/user.ex".into(),
                line: 4,
                end_line: 12,
                fields: vec![SchemaField {
                    name: "email".into(),
                    type_spelling: "string".into(),
                }],
                associations: vec![Association {
                    kind: AssociationKind::HasMany,
                    name: "posts".into(),
                    related: "MyApp.Post".into(),
                }],
            }),
            Record::TypeSpec(TypeSpec {
                module: "MyApp.Accounts".into(),
                name: "get_user".into(),
                arity: 1,
                params: vec!["integer()".into()],
                return_type: "User.t() | nil".into(),
                file: "lib/my_app/accounts.ex".into(),
                line: 9,
            }),
            Record::TypeDef(TypeDef {
                module: "MyApp.User".into(),
                name: "t".into(),
                arity: 0,
                kind: TypeDefKind::Opaque,
                params: vec![],
                definition: "%__MODULE__{}".into(),
                file: "lib/my_app/user.ex".into(),
                line: 3,
            }),
            Record::Diagnostic(Diagnostic {
                severity: Severity::Warning,
                message: "variable \"x\" is unused".into(),
                file: "lib/my_app/accounts.ex".into(),
                line: 11,
                source_tag: Some("elixir".into()),
            }),
            Record::DepEdge(DepEdge {
                from: "MyAppWeb.UserController".into(),
                to: "MyApp.Accounts".into(),
                dep_type: DepType::Compile,
            }),
        ];

        for record in records {
            let envelope = Envelope::syntactic(record.clone());
            let line = envelope.to_json_line().unwrap();
            let back = Envelope::from_json_line(&line).unwrap();
            assert_eq!(back, envelope, "round trip failed for {}", record.kind());
        }
    }

    #[test]
    fn envelope_line_shape() {
        let envelope = Envelope::compiler(Record::CallRef(CallRef {
            caller: "A.foo/0".into(),
            callee: Some("B.bar/0".into()),
            file: "lib/a.ex".into(),
            line: 3,
        }));
        let line = envelope.to_json_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["kind"], "call_ref");
        assert_eq!(value["source"], "compiler");
        assert_eq!(value["confidence"], "high");
        assert_eq!(value["data"]["callee"], "B.bar/0");
    }

    #[test]
    fn kind_registry_is_complete() {
        assert_eq!(RECORD_KINDS.len(), 11);
        assert!(RECORD_KINDS.contains(&"dep_edge"));
    }

    #[test]
    fn source_priority_ordering() {
        assert!(Source::Compiler.priority() > Source::Xref.priority());
        assert!(Source::Xref.priority() > Source::Syntactic.priority());
    }
}
