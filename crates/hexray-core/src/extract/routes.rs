//! Route Extractor
//!
//! Folds the Phoenix router DSL into concrete [`Route`] records: nested
//! `scope` blocks contribute path and alias prefixes, verb macros emit one
//! route each, `resources` expands into the CRUD set, and `live` emits a
//! GET route. All recognition is AST shape-matching; the DSL is never
//! executed.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::debug;
use tree_sitter::Node;

use crate::config::IndexConfig;
use crate::discovery::SourceFile;
use crate::parser::{
    argument_nodes, atom_name, block_statements, call_do_block, call_head, keyword_value,
    node_text, start_line, string_value, trailing_keywords, ExParser,
};
use crate::records::Route;

/// HTTP verb macros recognized inside a router body.
const VERB_FORMS: &[&str] = &[
    "get", "post", "put", "patch", "delete", "head", "options", "connect", "trace",
];

/// `resources` expansion: (action, verb, path suffix). `update` appears
/// twice, once per verb.
const RESOURCE_ACTIONS: &[(&str, &str, &str)] = &[
    ("index", "GET", ""),
    ("edit", "GET", "/:id/edit"),
    ("new", "GET", "/new"),
    ("show", "GET", "/:id"),
    ("create", "POST", ""),
    ("update", "PUT", "/:id"),
    ("update", "PATCH", "/:id"),
    ("delete", "DELETE", "/:id"),
];

/// Whether a file participates in route extraction at all.
pub fn is_router_source(content: &str) -> bool {
    content.contains("Phoenix.Router") || content.contains(", :router")
}

/// Run the routing pass over the given files.
///
/// Returns the globally-sorted, unique route list: sorted by (verb, path),
/// deduplicated by (verb, path, controller, action). Within a file, routes
/// are discovered in source order before the final sort.
pub fn extract(config: &IndexConfig, files: &[SourceFile]) -> Vec<Route> {
    let timeout = Duration::from_micros(config.parse_timeout_micros);
    let mut routes = Vec::new();

    for file in files {
        let Ok(content) = std::fs::read_to_string(&file.path) else {
            continue;
        };
        if !is_router_source(&content) {
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
        routes.extend(extract_source(&content, tree.root_node(), &file.rel_path));
    }

    sort_and_dedup(routes)
}

/// Extract routes from one parsed router source.
pub fn extract_source(source: &str, root: Node, rel_path: &str) -> Vec<Route> {
    let mut routes = Vec::new();
    collect_modules(root, source, rel_path, &mut routes);
    routes
}

fn sort_and_dedup(routes: Vec<Route>) -> Vec<Route> {
    let mut seen = BTreeSet::new();
    let mut unique: Vec<Route> = routes
        .into_iter()
        .filter(|r| seen.insert(r.key()))
        .collect();
    unique.sort_by(|a, b| (&a.verb, &a.path).cmp(&(&b.verb, &b.path)));
    unique
}

fn collect_modules(node: Node, source: &str, file: &str, routes: &mut Vec<Route>) {
    if node.kind() == "call" && call_head(node, source) == Some("defmodule") {
        let args = argument_nodes(node);
        if let Some(name_node) = args.first().filter(|n| n.kind() == "alias") {
            let router = node_text(*name_node, source).to_string();
            if let Some(block) = call_do_block(node) {
                let ctx = Fold {
                    path_prefix: String::new(),
                    alias_prefix: String::new(),
                    router: &router,
                    file,
                };
                for stmt in block_statements(block) {
                    walk(stmt, source, &ctx, routes);
                }
            }
            return;
        }
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    for child in children {
        collect_modules(child, source, file, routes);
    }
}

/// Folding context carried down nested scopes.
struct Fold<'a> {
    path_prefix: String,
    alias_prefix: String,
    router: &'a str,
    file: &'a str,
}

fn walk(node: Node, source: &str, ctx: &Fold, routes: &mut Vec<Route>) {
    if node.kind() != "call" {
        // Router bodies can nest routes under `if` or custom macros; keep
        // descending with the same fold.
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            walk(child, source, ctx, routes);
        }
        return;
    }

    match call_head(node, source) {
        Some("scope") => enter_scope(node, source, ctx, routes),
        Some("resources") => expand_resources(node, source, ctx, routes),
        Some("live") => emit_live(node, source, ctx, routes),
        Some(head) if VERB_FORMS.contains(&head) => emit_verb(node, source, head, ctx, routes),
        _ => {
            if let Some(block) = call_do_block(node) {
                for stmt in block_statements(block) {
                    walk(stmt, source, ctx, routes);
                }
            }
        }
    }
}

fn enter_scope(node: Node, source: &str, ctx: &Fold, routes: &mut Vec<Route>) {
    let args = argument_nodes(node);
    let keywords = trailing_keywords(node);

    let local_path = args
        .iter()
        .find_map(|a| string_value(*a, source))
        .or_else(|| {
            keywords
                .and_then(|kw| keyword_value(kw, source, "path"))
                .and_then(|v| string_value(v, source))
        })
        .unwrap_or_default();

    let local_alias = args
        .iter()
        .find(|a| a.kind() == "alias")
        .map(|a| node_text(*a, source).to_string())
        .or_else(|| {
            keywords
                .and_then(|kw| keyword_value(kw, source, "alias"))
                .map(|v| node_text(v, source).to_string())
        });

    let inner = Fold {
        path_prefix: join_paths(&ctx.path_prefix, &local_path),
        alias_prefix: match local_alias {
            Some(alias) => qualify(&ctx.alias_prefix, &alias),
            None => ctx.alias_prefix.clone(),
        },
        router: ctx.router,
        file: ctx.file,
    };

    if let Some(block) = call_do_block(node) {
        for stmt in block_statements(block) {
            walk(stmt, source, &inner, routes);
        }
    }
}

fn emit_verb(node: Node, source: &str, verb: &str, ctx: &Fold, routes: &mut Vec<Route>) {
    let args = argument_nodes(node);
    let Some(local_path) = args.first().and_then(|a| string_value(*a, source)) else {
        return;
    };
    let Some(controller) = args.get(1).map(|a| node_text(*a, source).to_string()) else {
        return;
    };
    let action = args
        .get(2)
        .and_then(|a| atom_name(*a, source))
        .unwrap_or_default();
    if action.is_empty() {
        return;
    }

    routes.push(Route {
        verb: verb.to_uppercase(),
        path: join_paths(&ctx.path_prefix, &local_path),
        controller: qualify(&ctx.alias_prefix, &controller),
        action,
        router: ctx.router.to_string(),
        file: ctx.file.to_string(),
        line: start_line(node),
    });
}

fn emit_live(node: Node, source: &str, ctx: &Fold, routes: &mut Vec<Route>) {
    let args = argument_nodes(node);
    let Some(local_path) = args.first().and_then(|a| string_value(*a, source)) else {
        return;
    };
    let Some(view) = args.get(1).map(|a| node_text(*a, source).to_string()) else {
        return;
    };

    routes.push(Route {
        verb: "GET".to_string(),
        path: join_paths(&ctx.path_prefix, &local_path),
        controller: qualify(&ctx.alias_prefix, &view),
        action: "live".to_string(),
        router: ctx.router.to_string(),
        file: ctx.file.to_string(),
        line: start_line(node),
    });
}

fn expand_resources(node: Node, source: &str, ctx: &Fold, routes: &mut Vec<Route>) {
    let args = argument_nodes(node);
    let Some(local_path) = args.first().and_then(|a| string_value(*a, source)) else {
        return;
    };
    let Some(controller) = args.get(1).map(|a| node_text(*a, source).to_string()) else {
        return;
    };

    let keywords = trailing_keywords(node);
    let only = keywords
        .and_then(|kw| keyword_value(kw, source, "only"))
        .map(|v| action_filter(v, source));
    let except = keywords
        .and_then(|kw| keyword_value(kw, source, "except"))
        .map(|v| action_filter(v, source));

    let base = join_paths(&ctx.path_prefix, &local_path);
    let controller = qualify(&ctx.alias_prefix, &controller);
    let line = start_line(node);

    for (action, verb, suffix) in RESOURCE_ACTIONS {
        if let Some(ref only) = only {
            if !only.contains(&action.to_string()) {
                continue;
            }
        }
        if let Some(ref except) = except {
            if except.contains(&action.to_string()) {
                continue;
            }
        }
        routes.push(Route {
            verb: verb.to_string(),
            path: join_paths(&base, suffix),
            controller: controller.clone(),
            action: action.to_string(),
            router: ctx.router.to_string(),
            file: ctx.file.to_string(),
            line,
        });
    }

    // Nested resources see the parent's member path as their prefix.
    if let Some(block) = call_do_block(node) {
        let parent = local_path.trim_matches('/');
        let nested_prefix = join_paths(
            &base,
            &format!("/:{}_id", singularize(parent)),
        );
        let inner = Fold {
            path_prefix: nested_prefix,
            alias_prefix: ctx.alias_prefix.clone(),
            router: ctx.router,
            file: ctx.file,
        };
        for stmt in block_statements(block) {
            walk(stmt, source, &inner, routes);
        }
    }
}

fn action_filter(node: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    if node.kind() == "list" {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            if let Some(name) = atom_name(child, source) {
                out.push(name);
            }
        }
    } else if let Some(name) = atom_name(node, source) {
        out.push(name);
    }
    out
}

/// Join two path segments with a single slash, no doubled slashes, and no
/// trailing slash unless the result is the bare root.
pub fn join_paths(prefix: &str, local: &str) -> String {
    let mut joined = String::from("/");
    for segment in prefix.split('/').chain(local.split('/')) {
        if segment.is_empty() {
            continue;
        }
        if !joined.ends_with('/') {
            joined.push('/');
        }
        joined.push_str(segment);
    }
    joined
}

/// Qualify a controller with the folded alias prefix unless it is already
/// qualified with it.
fn qualify(alias_prefix: &str, controller: &str) -> String {
    if alias_prefix.is_empty() {
        return controller.to_string();
    }
    if controller == alias_prefix
        || controller.starts_with(&format!("{}.", alias_prefix))
    {
        return controller.to_string();
    }
    format!("{}.{}", alias_prefix, controller)
}

/// Purely syntactic singularization: `ies→y`, else `es→ε`, else `s→ε`,
/// else identity.
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{}y", stem)
    } else if let Some(stem) = word.strip_suffix("es") {
        stem.to_string()
    } else if let Some(stem) = word.strip_suffix('s') {
        stem.to_string()
    } else {
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn extract_str(source: &str) -> Vec<Route> {
        let mut parser = ExParser::new(Duration::from_secs(2)).unwrap();
        let tree = parser.parse(source).unwrap();
        sort_and_dedup(extract_source(source, tree.root_node(), "lib/app_web/router.ex"))
    }

    #[test]
    fn scoped_get_route() {
        let routes = extract_str(
            r#"
defmodule AppWeb.Router do
  use AppWeb, :router

  scope "/api", AppWeb.API do
    get "/users", UserController, :index
  end
end
"#,
        );
        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.verb, "GET");
        assert_eq!(route.path, "/api/users");
        assert_eq!(route.controller, "AppWeb.API.UserController");
        assert_eq!(route.action, "index");
        assert_eq!(route.router, "AppWeb.Router");
    }

    #[test]
    fn resources_expand_to_eight_routes() {
        let routes = extract_str(
            r#"
defmodule AppWeb.Router do
  use AppWeb, :router

  resources "/users", UserController
end
"#,
        );
        let pairs: Vec<(String, String, String)> = routes
            .iter()
            .map(|r| (r.verb.clone(), r.path.clone(), r.action.clone()))
            .collect();
        assert_eq!(routes.len(), 8);
        assert!(pairs.contains(&("GET".into(), "/users".into(), "index".into())));
        assert!(pairs.contains(&("GET".into(), "/users/:id".into(), "show".into())));
        assert!(pairs.contains(&("GET".into(), "/users/new".into(), "new".into())));
        assert!(pairs.contains(&("GET".into(), "/users/:id/edit".into(), "edit".into())));
        assert!(pairs.contains(&("POST".into(), "/users".into(), "create".into())));
        assert!(pairs.contains(&("PUT".into(), "/users/:id".into(), "update".into())));
        assert!(pairs.contains(&("PATCH".into(), "/users/:id".into(), "update".into())));
        assert!(pairs.contains(&("DELETE".into(), "/users/:id".into(), "delete".into())));
    }

    #[test]
    fn resources_only_and_except_filter_actions() {
        let routes = extract_str(
            r#"
defmodule AppWeb.Router do
  use AppWeb, :router

  resources "/posts", PostController, only: [:index, :show]
  resources "/tags", TagController, except: [:delete]
end
"#,
        );
        let posts: Vec<&Route> = routes.iter().filter(|r| r.path.starts_with("/posts")).collect();
        assert_eq!(posts.len(), 2);

        let tags: Vec<&Route> = routes.iter().filter(|r| r.path.starts_with("/tags")).collect();
        assert_eq!(tags.len(), 7);
        assert!(!tags.iter().any(|r| r.action == "delete"));
    }

    #[test]
    fn nested_resources_use_singular_parent_id() {
        let routes = extract_str(
            r#"
defmodule AppWeb.Router do
  use AppWeb, :router

  resources "/companies", CompanyController, only: [:index] do
    resources "/branches", BranchController, only: [:index]
  end
end
"#,
        );
        assert!(routes
            .iter()
            .any(|r| r.path == "/companies/:company_id/branches" && r.action == "index"));
    }

    #[test]
    fn live_routes_are_get_with_live_action() {
        let routes = extract_str(
            r#"
defmodule AppWeb.Router do
  use AppWeb, :router

  scope "/", AppWeb do
    live "/dashboard", DashboardLive
  end
end
"#,
        );
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].verb, "GET");
        assert_eq!(routes[0].action, "live");
        assert_eq!(routes[0].controller, "AppWeb.DashboardLive");
    }

    #[test]
    fn nested_scopes_fold_paths_and_aliases() {
        let routes = extract_str(
            r#"
defmodule AppWeb.Router do
  use AppWeb, :router

  scope "/api", AppWeb.API do
    scope "/v1", V1 do
      get "/status", StatusController, :show
    end
  end
end
"#,
        );
        assert_eq!(routes[0].path, "/api/v1/status");
        assert_eq!(routes[0].controller, "AppWeb.API.V1.StatusController");
    }

    #[test]
    fn already_qualified_controller_is_left_alone() {
        let routes = extract_str(
            r#"
defmodule AppWeb.Router do
  use AppWeb, :router

  scope "/admin", Admin do
    get "/home", Admin.HomeController, :index
  end
end
"#,
        );
        assert_eq!(routes[0].controller, "Admin.HomeController");
    }

    #[test]
    fn routes_sort_globally_by_verb_and_path() {
        let routes = extract_str(
            r#"
defmodule AppWeb.Router do
  use AppWeb, :router

  post "/b", BController, :create
  get "/z", ZController, :index
  get "/a", AController, :index
end
"#,
        );
        let order: Vec<(String, String)> = routes
            .iter()
            .map(|r| (r.verb.clone(), r.path.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("GET".into(), "/a".into()),
                ("GET".into(), "/z".into()),
                ("POST".into(), "/b".into()),
            ]
        );
    }

    #[test]
    fn path_join_rules() {
        assert_eq!(join_paths("", ""), "/");
        assert_eq!(join_paths("/api", "/users"), "/api/users");
        assert_eq!(join_paths("/api/", "/users/"), "/api/users");
        assert_eq!(join_paths("", "/users"), "/users");
        assert_eq!(join_paths("/api", ""), "/api");
    }

    #[test]
    fn singularize_rules() {
        assert_eq!(singularize("companies"), "company");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("fish"), "fish");
    }

    #[test]
    fn property_paths_start_with_slash_and_never_double() {
        let routes = extract_str(
            r#"
defmodule AppWeb.Router do
  use AppWeb, :router

  scope "/", AppWeb do
    get "/", PageController, :home
    resources "/users", UserController do
      resources "/posts", PostController, only: [:index]
    end
  end
end
"#,
        );
        for route in &routes {
            assert!(route.path.starts_with('/'), "path {}", route.path);
            assert!(!route.path.contains("//"), "path {}", route.path);
        }
    }
}
