// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The graph reducer.  Two jobs: eliding pure-copy assignments inside
//! template graphs (shrinking the kernel's load/store count), and
//! collapsing assign-mapping chains to their root source.  Sum mappings
//! are never collapsed; they are re-evaluated by the runtime fixed-point
//! loop every derivative call.

use std::collections::{HashMap, HashSet};

use crate::common::{canonicalize, Ident, Result};
use crate::datamodel;
use crate::graph::{Graph, NodeKind, Role};
use crate::model_err;
use crate::template::{CompilationContext, SCOPE_PREFIX};
use crate::variable::Variable;

/// Every variable id a mapping reads or writes; those keep their slots.
pub fn mapping_endpoints(mappings: &[datamodel::Mapping]) -> HashSet<Ident> {
    let mut endpoints = HashSet::new();
    for m in mappings.iter() {
        endpoints.insert(canonicalize(&m.target));
        for s in m.sources.iter() {
            endpoints.insert(canonicalize(s));
        }
    }
    endpoints
}

/// A scope tag is elidable only if the variable bound to it is internal in
/// *every* instance of the template: not observable, not a state or a
/// derivative, not `must_map`, and not a mapping endpoint.  Instances share
/// one compiled kernel, so the decision has to be uniform.
fn elidable_tags(
    scope: &[Ident],
    instances: &[&datamodel::Instance],
    vars: &HashMap<Ident, Variable>,
    endpoints: &HashSet<Ident>,
) -> HashSet<Ident> {
    let mut elidable: HashSet<Ident> = scope.iter().cloned().collect();
    for instance in instances.iter() {
        for (tag, var_id) in scope.iter().zip(instance.variables.iter()) {
            let var_id = canonicalize(var_id);
            let keep = match vars.get(&var_id) {
                Some(var) => {
                    var.observable
                        || var.is_state()
                        || var.is_derivative()
                        || var.must_map
                        || endpoints.contains(&var_id)
                }
                None => true,
            };
            if keep {
                elidable.remove(tag);
            }
        }
    }
    elidable
}

/// Walks the value subtree of an assign, checking whether it reads `id`.
fn stmt_reads(graph: &Graph, assign: &str, id: &str) -> bool {
    let mut stack: Vec<Ident> = match graph.child(assign, Role::Value) {
        Some(value) => vec![value.clone()],
        None => return false,
    };
    let mut seen: HashSet<Ident> = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == id {
            return true;
        }
        if !seen.insert(node.clone()) {
            continue;
        }
        for (_, child) in graph.children(&node).iter() {
            stack.push(child.clone());
        }
    }
    false
}

/// Elides copy assigns (`scope.y = scope.x` with `y` elidable) until none
/// remain, rewiring consumers of the target to read the source directly.
/// Terminates because each elision removes two nodes.
fn elide_copies(graph: &mut Graph, elidable: &HashSet<Ident>) -> usize {
    let mut n_elided = 0;
    loop {
        let assigns = graph.assigns();
        let candidate = assigns.iter().enumerate().find_map(|(pos, assign)| {
            let target = graph.child(assign, Role::Target0)?.clone();
            let source = graph.child(assign, Role::Value)?.clone();
            let tag = target.strip_prefix(SCOPE_PREFIX)?;
            if !elidable.contains(tag) {
                return None;
            }
            if !matches!(graph.node(&source), Some(NodeKind::VarRef { .. })) {
                return None;
            }
            // exactly one producer for the target
            let producers = graph
                .consumers(&target)
                .iter()
                .filter(|(_, role)| *role == Role::Target0)
                .count();
            if producers != 1 {
                return None;
            }
            // a statement before the copy reads the stale value of the
            // target; rewiring it to the source would change what it sees
            let read_before_write = assigns
                .iter()
                .take(pos)
                .any(|a| stmt_reads(graph, a, &target));
            if read_before_write {
                return None;
            }
            // the source must not be reassigned after the copy runs
            let reassigned_later = assigns.iter().skip(pos + 1).any(|a| {
                graph.child(a, Role::Target0).map(|t| t.as_str()) == Some(source.as_str())
            });
            if reassigned_later {
                return None;
            }
            Some((assign.clone(), target, source))
        });

        match candidate {
            Some((assign, target, source)) => {
                graph.rewire_consumers(&target, &source);
                graph.remove_node(&assign);
                graph.remove_node(&target);
                n_elided += 1;
            }
            None => return n_elided,
        }
    }
}

/// Runs copy elision over every registered template.
pub fn reduce_templates(
    ctx: &mut CompilationContext,
    instances: &[datamodel::Instance],
    vars: &HashMap<Ident, Variable>,
    mappings: &[datamodel::Mapping],
) {
    let endpoints = mapping_endpoints(mappings);

    let mut by_template: HashMap<Ident, Vec<&datamodel::Instance>> = HashMap::new();
    for instance in instances.iter() {
        by_template
            .entry(canonicalize(&instance.equation))
            .or_default()
            .push(instance);
    }

    let idents: Vec<Ident> = ctx.template_idents().to_vec();
    for ident in idents.iter() {
        let instances = match by_template.get(ident) {
            Some(instances) => instances,
            None => continue,
        };
        let scope = ctx.template(ident).unwrap().scope.clone();
        let elidable = elidable_tags(&scope, instances, vars, &endpoints);
        if elidable.is_empty() {
            continue;
        }
        let template = ctx.template_mut(ident).unwrap();
        elide_copies(&mut template.graph, &elidable);
    }
}

/// Chases each assign-mapped variable to the root of its copy chain.  A
/// root is a variable with no assign source of its own; sum targets are
/// roots too, since their value is produced at runtime.  A cycle of pure
/// assigns (including a self-assignment) can never settle and is fatal.
pub fn resolve_assign_roots(
    vars: &HashMap<Ident, Variable>,
) -> Result<HashMap<Ident, Ident>> {
    let mut roots: HashMap<Ident, Ident> = HashMap::new();
    for var in vars.values() {
        if var.assign_source.is_none() {
            continue;
        }
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(&var.id);
        let mut cursor = var;
        while let Some(source_id) = &cursor.assign_source {
            if !visited.insert(source_id) {
                return model_err!(CyclicAssignment, var.id.clone());
            }
            cursor = &vars[source_id.as_str()];
        }
        roots.insert(var.id.clone(), cursor.id.clone());
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{Equation, Instance, Variable as DmVariable, VariableKind};
    use crate::variable::build_variable_table;

    fn make_var(path: &str, tag: &str, kind: VariableKind) -> DmVariable {
        DmVariable::new(&format!("{}.{}", path, tag), tag, kind, 0.0, path)
    }

    fn fixture() -> (
        CompilationContext,
        Vec<Instance>,
        HashMap<Ident, Variable>,
    ) {
        let mut ctx = CompilationContext::new();
        // `tmp` is a pure copy of the flux; only the derivative consumes it
        ctx.register(&Equation {
            ident: "relay".to_string(),
            scope: vec![
                "x".to_string(),
                "x_dot".to_string(),
                "tmp".to_string(),
                "k".to_string(),
            ],
            source: "scope.tmp = scope.k\nscope.x_dot = scope.tmp * scope.x".to_string(),
        })
        .unwrap();

        let instances = vec![Instance {
            path: "sys.a".to_string(),
            equation: "relay".to_string(),
            variables: vec![
                "sys.a.x".to_string(),
                "sys.a.x_dot".to_string(),
                "sys.a.tmp".to_string(),
                "sys.a.k".to_string(),
            ],
        }];
        let vars = build_variable_table(&[
            make_var("sys.a", "x", VariableKind::State),
            make_var("sys.a", "x_dot", VariableKind::Derivative),
            make_var("sys.a", "tmp", VariableKind::Parameter).internal(),
            make_var("sys.a", "k", VariableKind::Parameter),
        ])
        .unwrap();
        (ctx, instances, vars)
    }

    #[test]
    fn test_copy_elision() {
        let (mut ctx, instances, vars) = fixture();
        let before = ctx.template("relay").unwrap().graph.len();
        reduce_templates(&mut ctx, &instances, &vars, &[]);
        let graph = &ctx.template("relay").unwrap().graph;
        // the copy assign and scope.tmp are gone
        assert_eq!(graph.len(), before - 2);
        assert!(!graph.contains("scope.tmp"));
        assert_eq!(graph.assigns().len(), 1);
    }

    #[test]
    fn test_read_before_write_keeps_copy() {
        let mut ctx = CompilationContext::new();
        // the derivative reads tmp before the copy refreshes it, so the
        // stale value is load-bearing and the copy must survive
        ctx.register(&Equation {
            ident: "delay".to_string(),
            scope: vec![
                "x".to_string(),
                "x_dot".to_string(),
                "tmp".to_string(),
                "k".to_string(),
            ],
            source: "scope.x_dot = scope.tmp\nscope.tmp = scope.k".to_string(),
        })
        .unwrap();

        let instances = vec![Instance {
            path: "sys.a".to_string(),
            equation: "delay".to_string(),
            variables: vec![
                "sys.a.x".to_string(),
                "sys.a.x_dot".to_string(),
                "sys.a.tmp".to_string(),
                "sys.a.k".to_string(),
            ],
        }];
        let vars = build_variable_table(&[
            make_var("sys.a", "x", VariableKind::State),
            make_var("sys.a", "x_dot", VariableKind::Derivative),
            make_var("sys.a", "tmp", VariableKind::Parameter).internal(),
            make_var("sys.a", "k", VariableKind::Parameter),
        ])
        .unwrap();

        let before = ctx.template("delay").unwrap().graph.len();
        reduce_templates(&mut ctx, &instances, &vars, &[]);
        let graph = &ctx.template("delay").unwrap().graph;
        assert_eq!(graph.len(), before);
        assert!(graph.contains("scope.tmp"));
        assert_eq!(graph.assigns().len(), 2);
    }

    #[test]
    fn test_observable_keeps_slot() {
        let (mut ctx, instances, mut vars) = fixture();
        vars.get_mut("sys.a.tmp").unwrap().observable = true;
        let before = ctx.template("relay").unwrap().graph.len();
        reduce_templates(&mut ctx, &instances, &vars, &[]);
        assert_eq!(ctx.template("relay").unwrap().graph.len(), before);
    }

    #[test]
    fn test_mapping_endpoint_keeps_slot() {
        let (mut ctx, instances, vars) = fixture();
        let mappings = vec![datamodel::Mapping {
            target: "elsewhere.p".to_string(),
            sources: vec!["sys.a.tmp".to_string()],
            kind: datamodel::MappingKind::Assign,
        }];
        let before = ctx.template("relay").unwrap().graph.len();
        reduce_templates(&mut ctx, &instances, &vars, &mappings);
        assert_eq!(ctx.template("relay").unwrap().graph.len(), before);
    }

    fn chain_vars(edges: &[(&str, &str)]) -> HashMap<Ident, Variable> {
        let mut ids: HashSet<&str> = HashSet::new();
        for (a, b) in edges.iter() {
            ids.insert(a);
            ids.insert(b);
        }
        let dm: Vec<DmVariable> = ids
            .iter()
            .map(|id| DmVariable::new(id, id, VariableKind::Parameter, 0.0, "sys"))
            .collect();
        let mut vars = build_variable_table(&dm).unwrap();
        for (target, source) in edges.iter() {
            vars.get_mut(*target)
                .unwrap()
                .set_assign_source(source.to_string())
                .unwrap();
        }
        vars
    }

    #[test]
    fn test_assign_chain_roots() {
        let vars = chain_vars(&[("a", "b"), ("b", "c")]);
        let roots = resolve_assign_roots(&vars).unwrap();
        assert_eq!(roots["a"], "c");
        assert_eq!(roots["b"], "c");
        assert!(!roots.contains_key("c"));
    }

    #[test]
    fn test_assign_cycle() {
        let vars = chain_vars(&[("a", "b"), ("b", "a")]);
        let err = resolve_assign_roots(&vars).unwrap_err();
        assert_eq!(err.code, crate::common::ErrorCode::CyclicAssignment);
    }

    #[test]
    fn test_self_assign_cycle() {
        let vars = chain_vars(&[("a", "a")]);
        let err = resolve_assign_roots(&vars).unwrap_err();
        assert_eq!(err.code, crate::common::ErrorCode::CyclicAssignment);
    }

    #[test]
    fn test_chain_stops_at_sum_target() {
        let mut vars = chain_vars(&[("a", "b")]);
        let dm = DmVariable::new("c", "c", VariableKind::Parameter, 0.0, "sys");
        let mut c = Variable::from(&dm);
        c.set_sum_sources(vec!["a".to_string()]).unwrap();
        vars.insert("c".to_string(), c);
        vars.get_mut("b")
            .unwrap()
            .set_assign_source("c".to_string())
            .unwrap();

        let roots = resolve_assign_roots(&vars).unwrap();
        // b copies from the sum target c, which is a runtime-produced root
        assert_eq!(roots["a"], "c");
        assert_eq!(roots["b"], "c");
    }
}
