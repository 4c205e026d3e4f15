// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Equation templates: each unique equation body is parsed and lowered to a
//! symbolic subgraph exactly once, no matter how many instances share it.
//! All compilation-scoped state (the cache, id counters) lives on
//! `CompilationContext`, created fresh per assembly.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, Stmt};
use crate::builtins::is_builtin_fn;
use crate::common::{canonicalize, Error, ErrorCode, ErrorKind, Ident, Result};
use crate::datamodel;
use crate::graph::{Graph, NodeKind, Role};
use crate::model_err;
use crate::parser;

/// The namespace prefix every template-local node carries; qualification
/// rewrites it to the instance path.
pub const SCOPE_PREFIX: &str = "scope.";

#[derive(Clone, Debug)]
pub struct Template {
    pub ident: Ident,
    pub scope: Vec<Ident>,
    pub source: String,
    pub graph: Graph,
}

#[derive(Default)]
pub struct CompilationContext {
    templates: HashMap<Ident, Template>,
    template_order: Vec<Ident>,
    n_mappings: usize,
}

impl CompilationContext {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers an equation, parsing its body only if the template is new.
    /// Re-registering the same ident with identical source is a cache hit;
    /// with different source it is a collision.
    pub fn register(&mut self, eq: &datamodel::Equation) -> Result<&Template> {
        let ident = canonicalize(&eq.ident);
        if let Some(cached) = self.templates.get(&ident) {
            if cached.source != eq.source {
                return model_err!(DuplicateTemplate, ident);
            }
            return Ok(&self.templates[&ident]);
        }

        let scope: Vec<Ident> = eq.scope.iter().map(|t| canonicalize(t)).collect();
        let stmts = parser::parse(&eq.source).map_err(|errs| {
            let err = &errs[0];
            Error::new(
                ErrorKind::Variable,
                err.code,
                Some(format!("{} at offset {}", ident, err.location)),
            )
        })?;
        let graph = build_template_graph(&ident, &scope, &stmts)?;

        self.template_order.push(ident.clone());
        self.templates.insert(
            ident.clone(),
            Template {
                ident: ident.clone(),
                scope,
                source: eq.source.clone(),
                graph,
            },
        );
        Ok(&self.templates[&ident])
    }

    pub fn template(&self, ident: &str) -> Option<&Template> {
        self.templates.get(ident)
    }

    pub fn template_mut(&mut self, ident: &str) -> Option<&mut Template> {
        self.templates.get_mut(ident)
    }

    /// Registration order; deterministic for a deterministic input.
    pub fn template_idents(&self) -> &[Ident] {
        &self.template_order
    }

    /// Fresh node id for a mapping-injected node in the global graph.
    pub fn next_mapping_id(&mut self) -> Ident {
        let id = format!("__mapping_{}", self.n_mappings);
        self.n_mappings += 1;
        id
    }
}

struct GraphBuilder<'a> {
    ident: &'a str,
    scope: &'a [Ident],
    graph: Graph,
    // per-template ordinal, so re-parsing yields identical node ids
    n_ops: usize,
}

impl<'a> GraphBuilder<'a> {
    fn next_op_id(&mut self) -> Ident {
        let id = format!("{}__op_{}", SCOPE_PREFIX, self.n_ops);
        self.n_ops += 1;
        id
    }

    fn add_op(&mut self, kind: NodeKind) -> Result<Ident> {
        let id = self.next_op_id();
        self.graph.add_node(id.clone(), kind)?;
        Ok(id)
    }

    fn err<T>(&self, code: ErrorCode, what: &str) -> Result<T> {
        Err(Error::new(
            ErrorKind::Variable,
            code,
            Some(format!("{}: {}", self.ident, what)),
        ))
    }

    fn var_ref(&mut self, name: &str) -> Result<Ident> {
        let name = canonicalize(name);
        if name != "time" {
            match name.strip_prefix(SCOPE_PREFIX) {
                Some(tag) => {
                    if !self.scope.iter().any(|t| t == tag) {
                        return self.err(ErrorCode::BadScopeBinding, &name);
                    }
                }
                None => {
                    return self.err(ErrorCode::UnknownDependency, &name);
                }
            }
        }
        self.graph
            .ensure_node(&name, NodeKind::VarRef { var_id: None });
        Ok(name)
    }

    fn walk(&mut self, expr: &Expr) -> Result<Ident> {
        match expr {
            Expr::Const(text, value) => self.add_op(NodeKind::Const {
                text: text.clone(),
                value: *value,
            }),
            Expr::Var(name) => self.var_ref(name),
            Expr::App(func, args) => {
                if !is_builtin_fn(func) {
                    return self.err(ErrorCode::UnknownBuiltin, func);
                }
                let arg_ids: Vec<Ident> =
                    args.iter().map(|a| self.walk(a)).collect::<Result<_>>()?;
                let id = self.add_op(NodeKind::Call(func.clone()))?;
                for (i, arg) in arg_ids.iter().enumerate() {
                    self.graph.add_edge(&id, arg, Role::Arg(i));
                }
                Ok(id)
            }
            Expr::Op1(op, operand) => {
                let operand = self.walk(operand)?;
                let id = self.add_op(NodeKind::UnaryOp(*op))?;
                self.graph.add_edge(&id, &operand, Role::Operand);
                Ok(id)
            }
            Expr::Op2(op, l, r) => {
                let l = self.walk(l)?;
                let r = self.walk(r)?;
                if is_comparison(*op) {
                    let id = self.add_op(NodeKind::Compare(*op))?;
                    self.graph.add_edge(&id, &l, Role::Comp(0));
                    self.graph.add_edge(&id, &r, Role::Comp(1));
                    Ok(id)
                } else {
                    let id = self.add_op(NodeKind::BinOp(*op))?;
                    self.graph.add_edge(&id, &l, Role::Left);
                    self.graph.add_edge(&id, &r, Role::Right);
                    Ok(id)
                }
            }
            Expr::If(cond, t, f) => {
                let cond = self.walk(cond)?;
                let t = self.walk(t)?;
                let f = self.walk(f)?;
                let id = self.add_op(NodeKind::IfExp)?;
                self.graph.add_edge(&id, &cond, Role::Arg(0));
                self.graph.add_edge(&id, &t, Role::Arg(1));
                self.graph.add_edge(&id, &f, Role::Arg(2));
                Ok(id)
            }
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        let target = canonicalize(&stmt.target);
        match target.strip_prefix(SCOPE_PREFIX) {
            Some(tag) if self.scope.iter().any(|t| t == tag) => {}
            Some(_) => return self.err(ErrorCode::BadScopeBinding, &target),
            None => return self.err(ErrorCode::BadAssignTarget, &target),
        }
        let value = self.walk(&stmt.value)?;
        self.graph
            .ensure_node(&target, NodeKind::VarRef { var_id: None });
        let assign = self.add_op(NodeKind::Assign)?;
        self.graph.add_edge(&assign, &target, Role::Target0);
        self.graph.add_edge(&assign, &value, Role::Value);
        Ok(())
    }
}

fn is_comparison(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Gte | BinaryOp::Lte | BinaryOp::Eq | BinaryOp::Neq
    )
}

fn build_template_graph(ident: &str, scope: &[Ident], stmts: &[Stmt]) -> Result<Graph> {
    let mut builder = GraphBuilder {
        ident,
        scope,
        graph: Graph::new(),
        n_ops: 0,
    };
    for stmt in stmts.iter() {
        builder.stmt(stmt)?;
    }
    Ok(builder.graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::Equation;

    fn thermal_eq() -> Equation {
        Equation {
            ident: "thermal".to_string(),
            scope: vec![
                "t1".to_string(),
                "t2".to_string(),
                "k".to_string(),
                "q".to_string(),
            ],
            source: "scope.q = scope.k * (scope.t2 - scope.t1)".to_string(),
        }
    }

    #[test]
    fn test_register_is_deterministic() {
        let mut ctx_a = CompilationContext::new();
        let mut ctx_b = CompilationContext::new();
        let eq = thermal_eq();
        let a = ctx_a.register(&eq).unwrap();
        let b = ctx_b.register(&eq).unwrap();
        let a_ids: Vec<_> = a.graph.node_ids().collect();
        let b_ids: Vec<_> = b.graph.node_ids().collect();
        assert_eq!(a_ids, b_ids);
        for id in a.graph.node_ids() {
            assert_eq!(a.graph.node(id), b.graph.node(id));
            assert_eq!(a.graph.children(id), b.graph.children(id));
        }
    }

    #[test]
    fn test_register_caches() {
        let mut ctx = CompilationContext::new();
        let eq = thermal_eq();
        let n = ctx.register(&eq).unwrap().graph.len();
        ctx.register(&eq).unwrap();
        assert_eq!(ctx.template_idents().len(), 1);
        assert_eq!(ctx.template("thermal").unwrap().graph.len(), n);
    }

    #[test]
    fn test_register_collision() {
        let mut ctx = CompilationContext::new();
        ctx.register(&thermal_eq()).unwrap();
        let mut other = thermal_eq();
        other.source = "scope.q = 0.0".to_string();
        let err = ctx.register(&other).unwrap_err();
        assert_eq!(err.code, ErrorCode::DuplicateTemplate);
    }

    #[test]
    fn test_bad_scope_binding() {
        let mut ctx = CompilationContext::new();
        let mut eq = thermal_eq();
        eq.source = "scope.q = scope.k * scope.t3".to_string();
        let err = ctx.register(&eq).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadScopeBinding);
    }

    #[test]
    fn test_unknown_builtin() {
        let mut ctx = CompilationContext::new();
        let mut eq = thermal_eq();
        eq.source = "scope.q = frobnicate(scope.k)".to_string();
        let err = ctx.register(&eq).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownBuiltin);
    }

    #[test]
    fn test_time_is_global() {
        let mut ctx = CompilationContext::new();
        let mut eq = thermal_eq();
        eq.source = "scope.q = scope.k * time".to_string();
        let tmpl = ctx.register(&eq).unwrap();
        assert!(tmpl.graph.contains("time"));
    }
}
