//! Query Engine
//!
//! Navigation queries over the record store: definition lookup, reference
//! search, transitive caller/callee traversal, routes, schemas, typespecs,
//! diagnostics, and change-impact analysis.
//!
//! Simple queries stream `index.jsonl` and filter; graph queries
//! materialize the call or dependency records into a petgraph `DiGraph`
//! with interned MFA/module nodes and run a BFS with a visited set and
//! per-level depth counter. Cyclic graphs are handled by the visited set;
//! an unknown MFA or a non-positive depth yields an empty result rather
//! than an error.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;
use thiserror::Error;

use crate::config::is_test_path;
use crate::records::{
    CallRef, Diagnostic, DirectiveKind, FunctionDef, Mfa, Record, Route, Schema, TypeDef,
    TypeSpec,
};
use crate::store::{IndexStore, StoreError};

/// Errors surfaced to query callers.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No index has been built for this project yet.
    #[error("No index found at {0}; run `hexray index` first")]
    NoIndex(PathBuf),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NoIndex(path) => QueryError::NoIndex(path),
            other => QueryError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

/// One node discovered by a caller/callee traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphHit {
    pub mfa: String,
    pub depth: u32,
}

/// Result of an impact-analysis query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImpactResult {
    pub changed_modules: Vec<String>,
    pub affected_modules: Vec<String>,
    pub test_files: Vec<String>,
}

/// Query interface over a project's index.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: IndexStore,
}

impl QueryEngine {
    pub fn new(store: IndexStore) -> Self {
        Self { store }
    }

    pub fn for_project(project_root: &Path) -> Self {
        Self::new(IndexStore::for_project(project_root))
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    fn ensure_index(&self) -> Result<()> {
        if self.store.index_exists() {
            Ok(())
        } else {
            Err(QueryError::NoIndex(self.store.index_dir().to_path_buf()))
        }
    }

    /// The defining record of an MFA; at most one exists.
    pub fn definition(&self, mfa: &str) -> Result<Option<FunctionDef>> {
        self.ensure_index()?;
        let Some(mfa) = Mfa::parse(mfa) else {
            return Ok(None);
        };
        let found = self.store.stream_records()?.find_map(|env| match env.record {
            Record::FunctionDef(def)
                if def.module == mfa.module && def.name == mfa.name && def.arity == mfa.arity =>
            {
                Some(def)
            }
            _ => None,
        });
        Ok(found)
    }

    /// All call sites whose callee is the given MFA, sorted by (file, line).
    pub fn references(&self, mfa: &str) -> Result<Vec<CallRef>> {
        self.ensure_index()?;
        if Mfa::parse(mfa).is_none() {
            return Ok(Vec::new());
        }
        let mut refs: Vec<CallRef> = self
            .store
            .stream_records()?
            .filter_map(|env| match env.record {
                Record::CallRef(call) if call.callee.as_deref() == Some(mfa) => Some(call),
                _ => None,
            })
            .collect();
        refs.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        Ok(refs)
    }

    /// Transitive callers of an MFA up to `depth` levels.
    pub fn callers(&self, mfa: &str, depth: i64) -> Result<Vec<GraphHit>> {
        self.traverse(mfa, depth, Direction::Incoming)
    }

    /// Transitive callees of an MFA up to `depth` levels.
    pub fn callees(&self, mfa: &str, depth: i64) -> Result<Vec<GraphHit>> {
        self.traverse(mfa, depth, Direction::Outgoing)
    }

    fn traverse(&self, mfa: &str, depth: i64, direction: Direction) -> Result<Vec<GraphHit>> {
        self.ensure_index()?;
        if depth <= 0 || Mfa::parse(mfa).is_none() {
            return Ok(Vec::new());
        }

        let (graph, nodes) = self.call_graph()?;
        let Some(&start) = nodes.get(mfa) else {
            return Ok(Vec::new());
        };

        let depth = depth as u32;
        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue: VecDeque<(NodeIndex, u32)> = VecDeque::from([(start, 0)]);
        let mut hits = Vec::new();

        while let Some((node, level)) = queue.pop_front() {
            if level == depth {
                continue;
            }
            // petgraph iterates neighbors newest-edge-first; reverse to
            // keep record order as the tie-break.
            let mut neighbors: Vec<NodeIndex> = graph.neighbors_directed(node, direction).collect();
            neighbors.reverse();
            for neighbor in neighbors {
                if visited.insert(neighbor) {
                    hits.push(GraphHit {
                        mfa: graph[neighbor].clone(),
                        depth: level + 1,
                    });
                    queue.push_back((neighbor, level + 1));
                }
            }
        }
        Ok(hits)
    }

    /// Caller→callee graph over all resolved call records, deduplicated.
    fn call_graph(&self) -> Result<(DiGraph<String, ()>, HashMap<String, NodeIndex>)> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
        let mut edges: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();

        let intern = |graph: &mut DiGraph<String, ()>,
                      nodes: &mut HashMap<String, NodeIndex>,
                      mfa: &str| {
            *nodes
                .entry(mfa.to_string())
                .or_insert_with(|| graph.add_node(mfa.to_string()))
        };

        for envelope in self.store.stream_records()? {
            if let Record::CallRef(call) = envelope.record {
                let Some(callee) = call.callee else {
                    continue;
                };
                let from = intern(&mut graph, &mut nodes, &call.caller);
                let to = intern(&mut graph, &mut nodes, &callee);
                if edges.insert((from, to)) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        Ok((graph, nodes))
    }

    /// All routes, sorted by (verb, path).
    pub fn routes(&self) -> Result<Vec<Route>> {
        self.ensure_index()?;
        let mut routes: Vec<Route> = self
            .store
            .stream_records()?
            .filter_map(|env| match env.record {
                Record::Route(route) => Some(route),
                _ => None,
            })
            .collect();
        routes.sort_by(|a, b| (&a.verb, &a.path).cmp(&(&b.verb, &b.path)));
        Ok(routes)
    }

    /// The schema declared by a module, if any.
    pub fn schema(&self, module: &str) -> Result<Option<Schema>> {
        self.ensure_index()?;
        let found = self.store.stream_records()?.find_map(|env| match env.record {
            Record::Schema(schema) if schema.module == module => Some(schema),
            _ => None,
        });
        Ok(found)
    }

    /// `@spec` records for an MFA.
    pub fn function_specs(&self, mfa: &str) -> Result<Vec<TypeSpec>> {
        self.ensure_index()?;
        let Some(mfa) = Mfa::parse(mfa) else {
            return Ok(Vec::new());
        };
        let specs = self
            .store
            .stream_records()?
            .filter_map(|env| match env.record {
                Record::TypeSpec(spec)
                    if spec.module == mfa.module
                        && spec.name == mfa.name
                        && spec.arity == mfa.arity =>
                {
                    Some(spec)
                }
                _ => None,
            })
            .collect();
        Ok(specs)
    }

    /// Type definitions declared by a module, sorted by (name, arity).
    pub fn module_types(&self, module: &str) -> Result<Vec<TypeDef>> {
        self.ensure_index()?;
        let mut defs: Vec<TypeDef> = self
            .store
            .stream_records()?
            .filter_map(|env| match env.record {
                Record::TypeDef(def) if def.module == module => Some(def),
                _ => None,
            })
            .collect();
        defs.sort_by(|a, b| (&a.name, a.arity).cmp(&(&b.name, b.arity)));
        Ok(defs)
    }

    /// All captured diagnostics, sorted by (file, line).
    pub fn diagnostics(&self) -> Result<Vec<Diagnostic>> {
        self.ensure_index()?;
        let mut diags: Vec<Diagnostic> = self
            .store
            .stream_records()?
            .filter_map(|env| match env.record {
                Record::Diagnostic(diag) => Some(diag),
                _ => None,
            })
            .collect();
        diags.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        Ok(diags)
    }

    /// Change-impact closure for a set of files: the modules they define,
    /// every module transitively depending on those, and the test files
    /// wired to the affected set through use/import/alias directives.
    pub fn impact(&self, files: &[String]) -> Result<ImpactResult> {
        self.ensure_index()?;

        let project_root = self
            .store
            .read_manifest()
            .map(|m| m.project_root)
            .unwrap_or_default();
        let targets: HashSet<String> = files
            .iter()
            .map(|f| normalize_query_path(&project_root, f))
            .collect();

        // One pass to pull the three record kinds the closure needs.
        let mut changed_modules: BTreeSet<String> = BTreeSet::new();
        let mut dep_edges: Vec<(String, String)> = Vec::new();
        let mut directives: Vec<(DirectiveKind, String, String)> = Vec::new();

        for envelope in self.store.stream_records()? {
            match envelope.record {
                Record::ModuleDef(def) => {
                    if targets.contains(&def.file) {
                        changed_modules.insert(def.module);
                    }
                }
                Record::DepEdge(edge) => dep_edges.push((edge.from, edge.to)),
                Record::DirectiveRef(dir) => {
                    if matches!(
                        dir.kind,
                        DirectiveKind::Use | DirectiveKind::Import | DirectiveKind::Alias
                    ) {
                        directives.push((dir.kind, dir.target, dir.file));
                    }
                }
                _ => {}
            }
        }

        // Reverse dependency graph: to → from, i.e. module → dependents.
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
        let mut edges: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
        for (from, to) in &dep_edges {
            let to_index = *nodes
                .entry(to.clone())
                .or_insert_with(|| graph.add_node(to.clone()));
            let from_index = *nodes
                .entry(from.clone())
                .or_insert_with(|| graph.add_node(from.clone()));
            if edges.insert((to_index, from_index)) {
                graph.add_edge(to_index, from_index, ());
            }
        }

        let mut affected: BTreeSet<String> = changed_modules.clone();
        let mut queue: VecDeque<NodeIndex> = changed_modules
            .iter()
            .filter_map(|m| nodes.get(m).copied())
            .collect();
        let mut visited: HashSet<NodeIndex> = queue.iter().copied().collect();
        while let Some(node) = queue.pop_front() {
            for neighbor in graph.neighbors_directed(node, Direction::Outgoing) {
                if visited.insert(neighbor) {
                    affected.insert(graph[neighbor].clone());
                    queue.push_back(neighbor);
                }
            }
        }

        let test_files: BTreeSet<String> = directives
            .iter()
            .filter(|(_, target, file)| affected.contains(target) && is_test_path(file))
            .map(|(_, _, file)| file.clone())
            .collect();

        Ok(ImpactResult {
            changed_modules: changed_modules.into_iter().collect(),
            affected_modules: affected.into_iter().collect(),
            test_files: test_files.into_iter().collect(),
        })
    }
}

/// Normalize a caller-supplied path so it compares against record
/// attribution: forward slashes, no leading `./`, project-root prefix
/// stripped.
fn normalize_query_path(project_root: &str, input: &str) -> String {
    let mut path = input.replace('\\', "/");
    if !project_root.is_empty() {
        let root = project_root.replace('\\', "/");
        let root = root.trim_end_matches('/');
        if let Some(rest) = path.strip_prefix(root) {
            path = rest.trim_start_matches('/').to_string();
        }
    }
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    path
}
