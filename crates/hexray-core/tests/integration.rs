//! Integration tests for the hexray-core pipeline.
//!
//! Runs the full index → store → query path over a curated Phoenix-style
//! fixture project. The compiler-backed phases (tracer, xref, diagnostics)
//! are disabled: against a fixture tree with no mix available they would
//! contribute empty results anyway, which is their specified soft-failure
//! behavior.

use std::fs;
use std::path::{Path, PathBuf};

use hexray_core::{
    IndexConfig, Indexer, QueryEngine, RefreshStatus, Visibility,
};
use tempfile::TempDir;

/// Copy the fixture project into a temp dir so indexing never dirties the
/// checked-in fixtures.
fn fixture_project() -> TempDir {
    let source = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("phoenix_app");
    let temp = TempDir::new().unwrap();
    copy_tree(&source, temp.path());
    temp
}

fn copy_tree(from: &Path, to: &Path) {
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry.unwrap();
        let rel = entry.path().strip_prefix(from).unwrap();
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).unwrap();
        } else {
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::copy(entry.path(), &target).unwrap();
        }
    }
}

fn indexed_project() -> (TempDir, Indexer, QueryEngine) {
    let temp = fixture_project();
    let indexer = Indexer::new(IndexConfig::new(temp.path()).without_compiler_phases());
    indexer.index().unwrap();
    let engine = QueryEngine::new(indexer.store().clone());
    (temp, indexer, engine)
}

// ============================================================================
// Definitions and references
// ============================================================================

#[test]
fn definition_lookup_finds_functions_and_visibility() {
    let (_temp, _indexer, engine) = indexed_project();

    let def = engine
        .definition("MyApp.Accounts.get_user/1")
        .unwrap()
        .expect("definition");
    assert_eq!(def.file, "lib/my_app/accounts.ex");
    assert_eq!(def.visibility, Visibility::Public);

    let private = engine
        .definition("MyApp.Accounts.build_changeset/1")
        .unwrap()
        .expect("private definition");
    assert_eq!(private.visibility, Visibility::Private);

    assert!(engine.definition("MyApp.Accounts.missing/9").unwrap().is_none());
}

#[test]
fn references_point_at_call_sites() {
    let (_temp, _indexer, engine) = indexed_project();

    // The controller calls Accounts.list_users() through its alias; the
    // syntactic pass records the callee as spelled.
    let refs = engine.references("Accounts.list_users/0").unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].file, "lib/my_app_web/controllers/user_controller.ex");
    assert_eq!(refs[0].caller, "MyAppWeb.API.UserController.index/2");
}

#[test]
fn callers_and_callees_traverse_the_graph() {
    let (_temp, _indexer, engine) = indexed_project();

    let callers = engine.callers("Accounts.list_users/0", 1).unwrap();
    assert_eq!(callers.len(), 1);
    assert_eq!(callers[0].mfa, "MyAppWeb.API.UserController.index/2");
    assert_eq!(callers[0].depth, 1);

    let callees = engine
        .callees("MyAppWeb.API.UserController.index/2", 1)
        .unwrap();
    assert!(callees.iter().any(|h| h.mfa == "Accounts.list_users/0"));

    // Depth zero is empty, and an unknown MFA is empty rather than an error.
    assert!(engine.callers("Accounts.list_users/0", 0).unwrap().is_empty());
    assert!(engine.callers("Nope.nope/0", 3).unwrap().is_empty());
}

// ============================================================================
// Routes
// ============================================================================

#[test]
fn scoped_routes_fold_prefixes_and_aliases() {
    let (_temp, _indexer, engine) = indexed_project();
    let routes = engine.routes().unwrap();

    let users = routes
        .iter()
        .find(|r| r.path == "/api/users")
        .expect("users route");
    assert_eq!(users.verb, "GET");
    assert_eq!(users.controller, "MyAppWeb.API.UserController");
    assert_eq!(users.action, "index");
    assert_eq!(users.router, "MyAppWeb.Router");
}

#[test]
fn resources_expand_and_filter() {
    let (_temp, _indexer, engine) = indexed_project();
    let routes = engine.routes().unwrap();

    let posts: Vec<_> = routes
        .iter()
        .filter(|r| r.path.starts_with("/api/posts"))
        .collect();
    // only: [:index, :show]
    assert_eq!(posts.len(), 2);
    assert!(posts
        .iter()
        .any(|r| r.verb == "GET" && r.path == "/api/posts" && r.action == "index"));
    assert!(posts
        .iter()
        .any(|r| r.verb == "GET" && r.path == "/api/posts/:id" && r.action == "show"));
}

#[test]
fn live_routes_and_global_ordering() {
    let (_temp, _indexer, engine) = indexed_project();
    let routes = engine.routes().unwrap();

    let dashboard = routes
        .iter()
        .find(|r| r.path == "/dashboard")
        .expect("live route");
    assert_eq!(dashboard.verb, "GET");
    assert_eq!(dashboard.action, "live");
    assert_eq!(dashboard.controller, "MyAppWeb.DashboardLive");

    // Sorted by (verb, path); paths well-formed.
    let keys: Vec<(&str, &str)> = routes
        .iter()
        .map(|r| (r.verb.as_str(), r.path.as_str()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    for route in &routes {
        assert!(route.path.starts_with('/'));
        assert!(!route.path.contains("//"));
    }
}

// ============================================================================
// Schemas
// ============================================================================

#[test]
fn user_schema_has_fields_timestamps_and_associations() {
    let (_temp, _indexer, engine) = indexed_project();

    let schema = engine.schema("MyApp.User").unwrap().expect("schema");
    assert_eq!(schema.source.as_deref(), Some("users"));

    let fields: Vec<(&str, &str)> = schema
        .fields
        .iter()
        .map(|f| (f.name.as_str(), f.type_spelling.as_str()))
        .collect();
    assert_eq!(
        fields,
        vec![
            ("email", "string"),
            ("name", "string"),
            ("inserted_at", "naive_datetime"),
            ("updated_at", "naive_datetime"),
        ]
    );

    assert_eq!(schema.associations.len(), 1);
    let assoc = &schema.associations[0];
    assert_eq!(assoc.name, "posts");
    // `Post` resolves through `alias MyApp.Post`.
    assert_eq!(assoc.related, "MyApp.Post");

    // Field names unique per schema record.
    let mut names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), schema.fields.len());
}

#[test]
fn belongs_to_schema() {
    let (_temp, _indexer, engine) = indexed_project();
    let schema = engine.schema("MyApp.Post").unwrap().expect("schema");
    assert_eq!(schema.source.as_deref(), Some("posts"));
    assert_eq!(schema.associations[0].related, "MyApp.User");
    assert!(engine.schema("MyApp.Accounts").unwrap().is_none());
}

// ============================================================================
// Typespecs
// ============================================================================

#[test]
fn specs_and_module_types_are_queryable() {
    let (_temp, _indexer, engine) = indexed_project();

    let specs = engine.function_specs("MyApp.Accounts.get_user/1").unwrap();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].params, vec!["integer()"]);
    assert_eq!(specs[0].return_type, "User.t() | nil");

    let types = engine.module_types("MyApp.User").unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].name, "t");
    assert_eq!(types[0].definition, "%__MODULE__{}");
}

// ============================================================================
// Impact analysis
// ============================================================================

#[test]
fn impact_reports_changed_modules_and_test_files() {
    let (_temp, _indexer, engine) = indexed_project();

    let impact = engine
        .impact(&["lib/my_app/accounts.ex".to_string()])
        .unwrap();
    assert_eq!(impact.changed_modules, vec!["MyApp.Accounts"]);
    assert!(impact
        .affected_modules
        .contains(&"MyApp.Accounts".to_string()));
    // The test file aliases MyApp.Accounts and lives under test/.
    assert_eq!(impact.test_files, vec!["test/my_app/accounts_test.exs"]);
}

// ============================================================================
// Determinism and refresh
// ============================================================================

#[test]
fn double_index_is_byte_identical() {
    let (temp, indexer, _engine) = indexed_project();
    let index_path = temp.path().join(".hexray").join("index.jsonl");
    let first = fs::read(&index_path).unwrap();
    indexer.index().unwrap();
    let second = fs::read(&index_path).unwrap();
    assert_eq!(first, second);
}

#[test]
fn ensure_current_is_a_noop_without_changes() {
    let (_temp, indexer, _engine) = indexed_project();

    let before = indexer.store().read_manifest().unwrap();
    let status = indexer.ensure_current().unwrap();
    assert_eq!(status, RefreshStatus::Current);
    let after = indexer.store().read_manifest().unwrap();
    assert_eq!(before.record_count, after.record_count);
    assert_eq!(before.files, after.files);
}

#[test]
fn refresh_picks_up_edits_and_preserves_the_rest() {
    let (temp, indexer, engine) = indexed_project();

    // Add a function to the accounts context.
    let accounts_path = temp.path().join("lib/my_app/accounts.ex");
    let mut content = fs::read_to_string(&accounts_path).unwrap();
    content = content.replace(
        "  defp build_changeset(attrs) do",
        "  def delete_user(user) do\n    Repo.delete(user)\n  end\n\n  defp build_changeset(attrs) do",
    );
    fs::write(&accounts_path, content).unwrap();

    let status = indexer.ensure_current().unwrap();
    assert!(matches!(status, RefreshStatus::Refreshed(_)));

    assert!(engine
        .definition("MyApp.Accounts.delete_user/1")
        .unwrap()
        .is_some());
    // Untouched records still present.
    assert!(engine.definition("MyApp.User.changeset/2").unwrap().is_some());
    let routes = engine.routes().unwrap();
    assert!(routes.iter().any(|r| r.path == "/api/users"));
}

#[test]
fn index_is_rebuilt_after_clear() {
    let (_temp, indexer, engine) = indexed_project();
    indexer.store().clear().unwrap();
    assert!(engine.routes().is_err());

    let status = indexer.ensure_current().unwrap();
    assert!(matches!(status, RefreshStatus::Rebuilt(_)));
    assert!(!engine.routes().unwrap().is_empty());
}
