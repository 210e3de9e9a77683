//! Merge / Confidence Layer
//!
//! Reconciles the outputs of all extraction phases into the final record
//! list. Non-call records are concatenated; call records are folded into an
//! insertion-ordered table keyed by call-site key, inserted syntactic →
//! xref → compiler so that higher-confidence entries overwrite. Unresolved
//! local-call markers are dropped once any phase resolved a call at the
//! same file and line. Dependency edges are concatenated then deduplicated
//! by (from, to, type).
//!
//! The on-disk line order of the store equals the output order here, which
//! is fixed, so indexing the same tree twice produces identical bytes.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::extract::syntactic::SyntacticResult;
use crate::extract::tracer::TracerResult;
use crate::extract::typespecs::TypespecResult;
use crate::records::{
    CallRef, Confidence, DepEdge, Diagnostic, Envelope, Record, Route, Schema, Source,
};

/// Everything the phases produced for one extraction run.
#[derive(Debug, Default, Clone)]
pub struct PhaseOutputs {
    pub syntactic: SyntacticResult,
    pub tracer: TracerResult,
    pub xref_deps: Vec<DepEdge>,
    pub routes: Vec<Route>,
    pub schemas: Vec<Schema>,
    pub typespecs: TypespecResult,
    pub diagnostics: Vec<Diagnostic>,
}

/// Fold all phase outputs into the final envelope list.
pub fn merge(outputs: PhaseOutputs) -> Vec<Envelope> {
    let PhaseOutputs {
        syntactic,
        tracer,
        xref_deps,
        routes,
        schemas,
        typespecs,
        diagnostics,
    } = outputs;

    let mut records = Vec::new();

    for module in syntactic.modules {
        records.push(Envelope::syntactic(Record::ModuleDef(module)));
    }
    for function in syntactic.functions {
        records.push(Envelope::syntactic(Record::FunctionDef(function)));
    }

    for call in merge_calls(syntactic.calls, Vec::new(), tracer.calls) {
        let envelope = match call.source {
            Source::Compiler => Envelope::compiler(Record::CallRef(call.call)),
            Source::Xref => Envelope::xref(Record::CallRef(call.call)),
            Source::Syntactic => {
                // Unresolved markers stay low confidence; resolved
                // qualified calls are medium.
                let confidence = if call.call.callee.is_some() {
                    Confidence::Medium
                } else {
                    Confidence::Low
                };
                Envelope::new(Record::CallRef(call.call), Source::Syntactic, confidence)
            }
        };
        records.push(envelope);
    }

    for directive in syntactic.directives {
        records.push(Envelope::syntactic(Record::DirectiveRef(directive)));
    }
    for struct_def in syntactic.structs {
        records.push(Envelope::syntactic(Record::StructDef(struct_def)));
    }
    for route in routes {
        records.push(Envelope::new(
            Record::Route(route),
            Source::Syntactic,
            Confidence::High,
        ));
    }
    for schema in schemas {
        records.push(Envelope::new(
            Record::Schema(schema),
            Source::Syntactic,
            Confidence::High,
        ));
    }
    for spec in typespecs.specs {
        records.push(Envelope::new(
            Record::TypeSpec(spec),
            Source::Syntactic,
            Confidence::High,
        ));
    }
    for typedef in typespecs.typedefs {
        records.push(Envelope::new(
            Record::TypeDef(typedef),
            Source::Syntactic,
            Confidence::High,
        ));
    }

    for edge in merge_deps(xref_deps, tracer.deps) {
        records.push(Envelope::new(
            Record::DepEdge(edge.edge),
            edge.source,
            Confidence::High,
        ));
    }

    for diagnostic in diagnostics {
        records.push(Envelope::compiler(Record::Diagnostic(diagnostic)));
    }

    records
}

struct MergedCall {
    call: CallRef,
    source: Source,
}

/// Fold calls by call-site key with fixed insertion order (syntactic →
/// xref → compiler). Higher-priority sources overwrite in place, keeping
/// table order stable. Unresolved markers at a (file, line) where some
/// phase resolved a callee are dropped.
fn merge_calls(
    syntactic: Vec<CallRef>,
    xref: Vec<CallRef>,
    compiler: Vec<CallRef>,
) -> Vec<MergedCall> {
    let mut order: Vec<(String, u32, Option<String>)> = Vec::new();
    let mut table: HashMap<(String, u32, Option<String>), MergedCall> = HashMap::new();

    for (calls, source) in [
        (syntactic, Source::Syntactic),
        (xref, Source::Xref),
        (compiler, Source::Compiler),
    ] {
        for call in calls {
            let key = call.call_site_key();
            match table.entry(key) {
                Entry::Occupied(mut existing) => {
                    if source.priority() >= existing.get().source.priority() {
                        existing.insert(MergedCall { call, source });
                    }
                }
                Entry::Vacant(slot) => {
                    order.push(slot.key().clone());
                    slot.insert(MergedCall { call, source });
                }
            }
        }
    }

    // A resolved call at the same site supersedes the syntactic pass's
    // unresolved marker.
    let resolved_sites: HashSet<(String, u32)> = order
        .iter()
        .filter(|(_, _, callee)| callee.is_some())
        .map(|(file, line, _)| (file.clone(), *line))
        .collect();

    order
        .into_iter()
        .filter(|(file, line, callee)| {
            callee.is_some() || !resolved_sites.contains(&(file.clone(), *line))
        })
        .filter_map(|key| table.remove(&key))
        .collect()
}

struct MergedDep {
    edge: DepEdge,
    source: Source,
}

/// Concatenate xref then compiler dep edges, deduplicating by
/// (from, to, type); the first occurrence wins.
fn merge_deps(xref: Vec<DepEdge>, compiler: Vec<DepEdge>) -> Vec<MergedDep> {
    let mut seen = BTreeSet::new();
    let mut merged = Vec::new();
    for (edges, source) in [(xref, Source::Xref), (compiler, Source::Compiler)] {
        for edge in edges {
            if seen.insert(edge.key()) {
                merged.push(MergedDep { edge, source });
            }
        }
    }
    merged
}
