// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The mapping compiler: expands declared inter-instance couplings into
//! explicit graph nodes.  An assign mapping becomes one Assign node wired
//! from the qualified source; a sum mapping becomes a right-folded chain
//! of binary adds feeding an Assign node.

use std::collections::HashMap;

use crate::ast::BinaryOp;
use crate::common::{canonicalize, Error, ErrorCode, ErrorKind, Ident, Result};
use crate::datamodel;
use crate::datamodel::MappingKind;
use crate::graph::{Graph, NodeId, NodeKind, Role};
use crate::model_err;
use crate::template::CompilationContext;
use crate::variable::Variable;

struct MappingCompiler<'a> {
    ctx: &'a mut CompilationContext,
    graph: &'a mut Graph,
    vars: &'a mut HashMap<Ident, Variable>,
    // variable id -> its VarRef node in the global graph
    endpoints: HashMap<Ident, NodeId>,
}

impl<'a> MappingCompiler<'a> {
    fn new(
        ctx: &'a mut CompilationContext,
        graph: &'a mut Graph,
        vars: &'a mut HashMap<Ident, Variable>,
    ) -> Self {
        let mut endpoints = HashMap::new();
        for id in graph.node_ids() {
            if let Some(NodeKind::VarRef {
                var_id: Some(var_id),
            }) = graph.node(id)
            {
                endpoints.insert(var_id.clone(), id.clone());
            }
        }
        MappingCompiler {
            ctx,
            graph,
            vars,
            endpoints,
        }
    }

    /// The VarRef node backing a variable, created on demand for variables
    /// no equation references.
    fn endpoint(&mut self, var_id: &str) -> Result<NodeId> {
        let var = match self.vars.get(var_id) {
            Some(var) => var,
            None => return model_err!(MappingFailed, var_id.to_string()),
        };
        if let Some(node_id) = self.endpoints.get(var_id) {
            return Ok(node_id.clone());
        }
        let node_id = var.full_name();
        if self.graph.contains(&node_id) {
            return model_err!(IdentifierCollision, node_id);
        }
        self.graph.add_node(
            node_id.clone(),
            NodeKind::VarRef {
                var_id: Some(var_id.to_string()),
            },
        )?;
        self.endpoints.insert(var_id.to_string(), node_id.clone());
        Ok(node_id)
    }

    fn fold_sum(&mut self, sources: &[NodeId]) -> Result<NodeId> {
        if sources.len() == 1 {
            return Ok(sources[0].clone());
        }
        let rest = self.fold_sum(&sources[1..])?;
        let id = self.ctx.next_mapping_id();
        self.graph
            .add_node(id.clone(), NodeKind::BinOp(BinaryOp::Add))?;
        self.graph.add_edge(&id, &sources[0], Role::Left);
        self.graph.add_edge(&id, &rest, Role::Right);
        Ok(id)
    }

    fn compile(&mut self, mapping: &datamodel::Mapping) -> Result<()> {
        let target_id = canonicalize(&mapping.target);
        let sources: Vec<Ident> = mapping.sources.iter().map(|s| canonicalize(s)).collect();

        let arity_ok = match mapping.kind {
            MappingKind::Assign => sources.len() == 1,
            MappingKind::Sum => !sources.is_empty(),
        };
        if !arity_ok {
            return Err(Error::new(
                ErrorKind::Model,
                ErrorCode::BadConfig,
                Some(format!(
                    "{}: {:?} mapping with {} sources",
                    target_id,
                    mapping.kind,
                    sources.len()
                )),
            ));
        }

        let target_node = self.endpoint(&target_id)?;
        let source_nodes: Vec<NodeId> = sources
            .iter()
            .map(|s| self.endpoint(s))
            .collect::<Result<_>>()?;

        // record resolution state first; it owns the exclusivity and
        // fixed-variable checks
        let target_var = self.vars.get_mut(&target_id).unwrap();
        match mapping.kind {
            MappingKind::Assign => {
                target_var.set_assign_source(sources[0].clone())?;
            }
            MappingKind::Sum => {
                target_var.set_sum_sources(sources.clone())?;
            }
        }

        let value_node = match mapping.kind {
            MappingKind::Assign => source_nodes[0].clone(),
            MappingKind::Sum => self.fold_sum(&source_nodes)?,
        };
        let assign = self.ctx.next_mapping_id();
        self.graph.add_node(assign.clone(), NodeKind::Assign)?;
        self.graph.add_edge(&assign, &target_node, Role::Target0);
        self.graph.add_edge(&assign, &value_node, Role::Value);
        Ok(())
    }
}

/// Compiles every mapping into the global graph and the variable table,
/// then checks that all `must_map` variables were resolved.
pub fn compile_mappings(
    ctx: &mut CompilationContext,
    graph: &mut Graph,
    vars: &mut HashMap<Ident, Variable>,
    mappings: &[datamodel::Mapping],
) -> Result<()> {
    let mut compiler = MappingCompiler::new(ctx, graph, vars);
    for mapping in mappings.iter() {
        compiler.compile(mapping)?;
    }

    let mut unmapped: Vec<&Ident> = vars
        .values()
        .filter(|v| v.must_map && v.assign_source.is_none())
        .map(|v| &v.id)
        .collect();
    if !unmapped.is_empty() {
        unmapped.sort();
        return model_err!(NotMapped, unmapped[0].clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{Mapping, Variable as DmVariable, VariableKind};
    use crate::variable::build_variable_table;

    fn fixture(must_map_target: bool) -> (CompilationContext, Graph, HashMap<Ident, Variable>) {
        let mut dm_vars = vec![];
        let target =
            DmVariable::new("sys.sink.p", "p", VariableKind::Parameter, 0.0, "sys.sink");
        dm_vars.push(if must_map_target {
            target.must_map()
        } else {
            target
        });
        for tag in ["x", "y", "z"] {
            dm_vars.push(DmVariable::new(
                &format!("sys.src.{}", tag),
                tag,
                VariableKind::Parameter,
                1.0,
                "sys.src",
            ));
        }
        let vars = build_variable_table(&dm_vars).unwrap();
        (CompilationContext::new(), Graph::new(), vars)
    }

    fn sum_mapping(sources: &[&str]) -> Mapping {
        Mapping {
            target: "sys.sink.p".to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            kind: MappingKind::Sum,
        }
    }

    #[test]
    fn test_assign_mapping() {
        let (mut ctx, mut graph, mut vars) = fixture(true);
        let mappings = vec![Mapping {
            target: "sys.sink.p".to_string(),
            sources: vec!["sys.src.x".to_string()],
            kind: MappingKind::Assign,
        }];
        compile_mappings(&mut ctx, &mut graph, &mut vars, &mappings).unwrap();

        assert_eq!(
            vars["sys.sink.p"].assign_source.as_deref(),
            Some("sys.src.x")
        );
        let assigns = graph.assigns();
        assert_eq!(assigns.len(), 1);
        assert_eq!(
            graph.child(&assigns[0], Role::Target0).unwrap(),
            "sys.sink.p"
        );
        assert_eq!(graph.child(&assigns[0], Role::Value).unwrap(), "sys.src.x");
    }

    #[test]
    fn test_sum_mapping_right_fold() {
        let (mut ctx, mut graph, mut vars) = fixture(false);
        let mappings = vec![sum_mapping(&["sys.src.x", "sys.src.y", "sys.src.z"])];
        compile_mappings(&mut ctx, &mut graph, &mut vars, &mappings).unwrap();

        let assigns = graph.assigns();
        let add = graph.child(&assigns[0], Role::Value).unwrap().clone();
        // x + (y + z)
        assert_eq!(graph.child(&add, Role::Left).unwrap(), "sys.src.x");
        let inner = graph.child(&add, Role::Right).unwrap().clone();
        assert_eq!(graph.child(&inner, Role::Left).unwrap(), "sys.src.y");
        assert_eq!(graph.child(&inner, Role::Right).unwrap(), "sys.src.z");
    }

    #[test]
    fn test_single_source_sum_is_copy() {
        let (mut ctx, mut graph, mut vars) = fixture(false);
        let mappings = vec![sum_mapping(&["sys.src.x"])];
        compile_mappings(&mut ctx, &mut graph, &mut vars, &mappings).unwrap();

        let assigns = graph.assigns();
        // no add chain at all, just the bare source
        assert_eq!(graph.child(&assigns[0], Role::Value).unwrap(), "sys.src.x");
        assert_eq!(vars["sys.sink.p"].sum_sources, vec!["sys.src.x".to_string()]);
    }

    #[test]
    fn test_unresolved_source() {
        let (mut ctx, mut graph, mut vars) = fixture(false);
        let mappings = vec![Mapping {
            target: "sys.sink.p".to_string(),
            sources: vec!["sys.src.nope".to_string()],
            kind: MappingKind::Assign,
        }];
        let err = compile_mappings(&mut ctx, &mut graph, &mut vars, &mappings).unwrap_err();
        assert_eq!(err.code, ErrorCode::MappingFailed);
    }

    #[test]
    fn test_fixed_target() {
        let (mut ctx, mut graph, mut vars) = fixture(false);
        vars.get_mut("sys.sink.p").unwrap().fixed = true;
        let mappings = vec![sum_mapping(&["sys.src.x"])];
        let err = compile_mappings(&mut ctx, &mut graph, &mut vars, &mappings).unwrap_err();
        assert_eq!(err.code, ErrorCode::FixedMapped);
    }

    #[test]
    fn test_duplicate_mapping() {
        let (mut ctx, mut graph, mut vars) = fixture(false);
        let mappings = vec![
            Mapping {
                target: "sys.sink.p".to_string(),
                sources: vec!["sys.src.x".to_string()],
                kind: MappingKind::Assign,
            },
            sum_mapping(&["sys.src.y"]),
        ];
        let err = compile_mappings(&mut ctx, &mut graph, &mut vars, &mappings).unwrap_err();
        assert_eq!(err.code, ErrorCode::DuplicateMapping);
    }

    #[test]
    fn test_must_map_unresolved() {
        let (mut ctx, mut graph, mut vars) = fixture(true);
        let err = compile_mappings(&mut ctx, &mut graph, &mut vars, &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotMapped);
    }
}
