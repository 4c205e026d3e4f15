// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Kernel lowering: assigns every variable a flat slot, orders templates
//! along the mapping dependency graph, and lowers each template's reduced
//! subgraph into an offset-based expression list executed once per
//! instance.  Both kernel backends are compiled from the same lowered
//! expressions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::ast::{BinaryOp, UnaryOp};
use crate::bytecode::{ByteCode, ByteCodeBuilder, BuiltinId, Opcode};
use crate::common::{canonicalize, Error, ErrorCode, ErrorKind, Ident, Result};
use crate::datamodel::{Config, SystemSpec, VariableKind};
use crate::graph::{Graph, NodeKind, Role};
use crate::mapping::compile_mappings;
use crate::qualify::qualify;
use crate::reduce::{reduce_templates, resolve_assign_roots};
use crate::sim_err;
use crate::template::{CompilationContext, SCOPE_PREFIX};
use crate::variable::{build_variable_table, Variable};

/// slot 0 of the store always holds the simulation time
pub const TIME_OFF: usize = 0;
pub const IMPLICIT_SLOT_COUNT: usize = 1;

type BuiltinFn = crate::builtins::BuiltinFn<Expr>;

/// A lowered expression.  `Var` and `AssignCurr` offsets are relative to
/// the executing instance's base slot; `Time` is the global time slot.
#[derive(PartialEq, Clone, Debug)]
pub(crate) enum Expr {
    Const(f64),
    Var(usize),
    Time,
    App(BuiltinFn),
    Op2(BinaryOp, Box<Expr>, Box<Expr>),
    Op1(UnaryOp, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    AssignCurr(usize, Box<Expr>),
}

/// One template's compiled kernel, run once per instance base offset.
#[derive(Clone, Debug)]
pub(crate) struct CompiledKernel {
    pub(crate) ident: Ident,
    pub(crate) scope_len: usize,
    pub(crate) base_offsets: Vec<usize>,
    pub(crate) exprs: Vec<Expr>,
    pub(crate) bytecode: Arc<ByteCode>,
}

#[derive(Clone, Debug)]
pub struct CompiledSystem {
    pub(crate) name: String,
    pub(crate) n_slots: usize,
    pub(crate) initials: Vec<f64>,
    // qualified name -> flat slot; includes the implicit `time`
    pub(crate) offsets: HashMap<Ident, usize>,
    // template dependency order
    pub(crate) kernels: Vec<CompiledKernel>,
    // (target, source) slot pairs, applied before the kernels run
    pub(crate) copies: Vec<(usize, usize)>,
    // (target, sources) slot tables, applied before and after the kernels
    pub(crate) sums: Vec<(usize, Vec<usize>)>,
    // mapping source slots; their settling ends the fixed-point loop
    pub(crate) watch: Vec<usize>,
    pub(crate) states: Vec<usize>,
    pub(crate) derivatives: Vec<usize>,
    pub(crate) config: Config,
}

impl CompiledSystem {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_slots(&self) -> usize {
        self.n_slots
    }

    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    /// Flat slot of a qualified variable name, for history columns and
    /// external aliasing.
    pub fn var_offset(&self, name: &str) -> Option<usize> {
        self.offsets.get(&canonicalize(name)).copied()
    }
}

struct Context<'a> {
    ident: &'a str,
    scope: &'a [Ident],
}

impl<'a> Context<'a> {
    fn get_offset(&self, node_id: &str) -> Result<usize> {
        let tag = match node_id.strip_prefix(SCOPE_PREFIX) {
            Some(tag) => tag,
            None => return sim_err!(UnknownDependency, node_id.to_string()),
        };
        match self.scope.iter().position(|t| t == tag) {
            Some(off) => Ok(off),
            None => sim_err!(UnknownDependency, node_id.to_string()),
        }
    }

    fn lower(&self, graph: &Graph, node_id: &str) -> Result<Expr> {
        let kind = match graph.node(node_id) {
            Some(kind) => kind,
            None => return sim_err!(DoesNotExist, node_id.to_string()),
        };
        let expr = match kind {
            NodeKind::VarRef { .. } => {
                if node_id == "time" {
                    Expr::Time
                } else {
                    Expr::Var(self.get_offset(node_id)?)
                }
            }
            NodeKind::Const { value, .. } => Expr::Const(*value),
            NodeKind::UnaryOp(op) => {
                let operand = match graph.child(node_id, Role::Operand) {
                    Some(operand) => self.lower(graph, operand)?,
                    None => return sim_err!(Generic, node_id.to_string()),
                };
                match op {
                    UnaryOp::Positive => operand,
                    UnaryOp::Negative => Expr::Op2(
                        BinaryOp::Sub,
                        Box::new(Expr::Const(0.0)),
                        Box::new(operand),
                    ),
                    UnaryOp::Not => Expr::Op1(UnaryOp::Not, Box::new(operand)),
                }
            }
            NodeKind::BinOp(op) => {
                let l = self.lower_child(graph, node_id, Role::Left)?;
                let r = self.lower_child(graph, node_id, Role::Right)?;
                Expr::Op2(*op, Box::new(l), Box::new(r))
            }
            NodeKind::Compare(op) => {
                let l = self.lower_child(graph, node_id, Role::Comp(0))?;
                let r = self.lower_child(graph, node_id, Role::Comp(1))?;
                Expr::Op2(*op, Box::new(l), Box::new(r))
            }
            NodeKind::Call(func) => {
                let args: Result<Vec<Expr>> = graph
                    .children(node_id)
                    .iter()
                    .map(|(_, arg)| self.lower(graph, arg))
                    .collect();
                let mut args = args?;

                macro_rules! check_arity {
                    ($builtin_fn:tt, 0) => {{
                        if !args.is_empty() {
                            return sim_err!(BadBuiltinArgs, self.ident.to_string());
                        }

                        BuiltinFn::$builtin_fn
                    }};
                    ($builtin_fn:tt, 1) => {{
                        if args.len() != 1 {
                            return sim_err!(BadBuiltinArgs, self.ident.to_string());
                        }

                        let a = args.remove(0);
                        BuiltinFn::$builtin_fn(Box::new(a))
                    }};
                    ($builtin_fn:tt, 2) => {{
                        if args.len() != 2 {
                            return sim_err!(BadBuiltinArgs, self.ident.to_string());
                        }

                        let b = args.remove(1);
                        let a = args.remove(0);
                        BuiltinFn::$builtin_fn(Box::new(a), Box::new(b))
                    }};
                    ($builtin_fn:tt, 2, 3) => {{
                        if args.len() == 2 {
                            let b = args.remove(1);
                            let a = args.remove(0);
                            BuiltinFn::$builtin_fn(Box::new(a), Box::new(b), None)
                        } else if args.len() == 3 {
                            let c = args.remove(2);
                            let b = args.remove(1);
                            let a = args.remove(0);
                            BuiltinFn::$builtin_fn(Box::new(a), Box::new(b), Some(Box::new(c)))
                        } else {
                            return sim_err!(BadBuiltinArgs, self.ident.to_string());
                        }
                    }};
                }

                let builtin = match func.as_str() {
                    "abs" => check_arity!(Abs, 1),
                    "arccos" => check_arity!(Arccos, 1),
                    "arcsin" => check_arity!(Arcsin, 1),
                    "arctan" => check_arity!(Arctan, 1),
                    "cos" => check_arity!(Cos, 1),
                    "exp" => check_arity!(Exp, 1),
                    "inf" => check_arity!(Inf, 0),
                    "int" => check_arity!(Int, 1),
                    "ln" => check_arity!(Ln, 1),
                    "log10" => check_arity!(Log10, 1),
                    "max" => check_arity!(Max, 2),
                    "min" => check_arity!(Min, 2),
                    "pi" => check_arity!(Pi, 0),
                    "safediv" => check_arity!(SafeDiv, 2, 3),
                    "sin" => check_arity!(Sin, 1),
                    "sqrt" => check_arity!(Sqrt, 1),
                    "tan" => check_arity!(Tan, 1),
                    _ => {
                        return sim_err!(UnknownBuiltin, self.ident.to_string());
                    }
                };
                Expr::App(builtin)
            }
            NodeKind::IfExp => {
                let cond = self.lower_child(graph, node_id, Role::Arg(0))?;
                let t = self.lower_child(graph, node_id, Role::Arg(1))?;
                let f = self.lower_child(graph, node_id, Role::Arg(2))?;
                Expr::If(Box::new(cond), Box::new(t), Box::new(f))
            }
            NodeKind::Assign => {
                // assigns are statements, never subexpressions
                return sim_err!(Generic, node_id.to_string());
            }
        };
        Ok(expr)
    }

    fn lower_child(&self, graph: &Graph, node_id: &str, role: Role) -> Result<Expr> {
        match graph.child(node_id, role) {
            Some(child) => self.lower(graph, child),
            None => sim_err!(Generic, node_id.to_string()),
        }
    }

    fn lower_template(&self, graph: &Graph) -> Result<Vec<Expr>> {
        let mut exprs = Vec::new();
        for assign in graph.assigns() {
            let target = match graph.child(&assign, Role::Target0) {
                Some(target) => target,
                None => return sim_err!(Generic, assign),
            };
            let off = self.get_offset(target)?;
            let value = self.lower_child(graph, &assign, Role::Value)?;
            exprs.push(Expr::AssignCurr(off, Box::new(value)));
        }
        Ok(exprs)
    }
}

fn emit(builder: &mut ByteCodeBuilder, expr: &Expr) {
    match expr {
        Expr::Const(value) => {
            let id = builder.intern_literal(*value);
            builder.push_opcode(Opcode::LoadConstant { id });
        }
        Expr::Var(off) => builder.push_opcode(Opcode::LoadVar { off: *off as u16 }),
        Expr::Time => builder.push_opcode(Opcode::LoadGlobalVar {
            off: TIME_OFF as u16,
        }),
        Expr::App(builtin) => {
            let func = match builtin {
                BuiltinFn::Abs(a) => {
                    emit(builder, a);
                    BuiltinId::Abs
                }
                BuiltinFn::Arccos(a) => {
                    emit(builder, a);
                    BuiltinId::Arccos
                }
                BuiltinFn::Arcsin(a) => {
                    emit(builder, a);
                    BuiltinId::Arcsin
                }
                BuiltinFn::Arctan(a) => {
                    emit(builder, a);
                    BuiltinId::Arctan
                }
                BuiltinFn::Cos(a) => {
                    emit(builder, a);
                    BuiltinId::Cos
                }
                BuiltinFn::Exp(a) => {
                    emit(builder, a);
                    BuiltinId::Exp
                }
                BuiltinFn::Inf => BuiltinId::Inf,
                BuiltinFn::Int(a) => {
                    emit(builder, a);
                    BuiltinId::Int
                }
                BuiltinFn::Ln(a) => {
                    emit(builder, a);
                    BuiltinId::Ln
                }
                BuiltinFn::Log10(a) => {
                    emit(builder, a);
                    BuiltinId::Log10
                }
                BuiltinFn::Max(a, b) => {
                    emit(builder, a);
                    emit(builder, b);
                    BuiltinId::Max
                }
                BuiltinFn::Min(a, b) => {
                    emit(builder, a);
                    emit(builder, b);
                    BuiltinId::Min
                }
                BuiltinFn::Pi => BuiltinId::Pi,
                BuiltinFn::SafeDiv(a, b, default) => {
                    emit(builder, a);
                    emit(builder, b);
                    // the VM always pops three arguments for safediv
                    match default {
                        Some(c) => emit(builder, c),
                        None => emit(builder, &Expr::Const(0.0)),
                    }
                    BuiltinId::SafeDiv
                }
                BuiltinFn::Sin(a) => {
                    emit(builder, a);
                    BuiltinId::Sin
                }
                BuiltinFn::Sqrt(a) => {
                    emit(builder, a);
                    BuiltinId::Sqrt
                }
                BuiltinFn::Tan(a) => {
                    emit(builder, a);
                    BuiltinId::Tan
                }
            };
            builder.push_opcode(Opcode::Apply { func });
        }
        Expr::Op2(op, l, r) => {
            emit(builder, l);
            emit(builder, r);
            let op = match op {
                BinaryOp::Add => crate::bytecode::Op2::Add,
                BinaryOp::Sub => crate::bytecode::Op2::Sub,
                BinaryOp::Exp => crate::bytecode::Op2::Exp,
                BinaryOp::Mul => crate::bytecode::Op2::Mul,
                BinaryOp::Div => crate::bytecode::Op2::Div,
                BinaryOp::Mod => crate::bytecode::Op2::Mod,
                BinaryOp::Gt => crate::bytecode::Op2::Gt,
                BinaryOp::Gte => crate::bytecode::Op2::Gte,
                BinaryOp::Lt => crate::bytecode::Op2::Lt,
                BinaryOp::Lte => crate::bytecode::Op2::Lte,
                BinaryOp::Eq => crate::bytecode::Op2::Eq,
                BinaryOp::Neq => crate::bytecode::Op2::Neq,
                BinaryOp::And => crate::bytecode::Op2::And,
                BinaryOp::Or => crate::bytecode::Op2::Or,
            };
            builder.push_opcode(Opcode::Op2 { op });
        }
        Expr::Op1(UnaryOp::Not, operand) => {
            emit(builder, operand);
            builder.push_opcode(Opcode::Not {});
        }
        Expr::Op1(_, operand) => {
            // Positive and Negative were normalized away at lowering
            emit(builder, operand);
        }
        Expr::If(cond, t, f) => {
            emit(builder, t);
            emit(builder, f);
            emit(builder, cond);
            builder.push_opcode(Opcode::SetCond {});
            builder.push_opcode(Opcode::If {});
        }
        Expr::AssignCurr(off, value) => {
            emit(builder, value);
            builder.push_opcode(Opcode::AssignCurr { off: *off as u16 });
        }
    }
}

fn compile_bytecode(exprs: &[Expr]) -> ByteCode {
    let mut builder = ByteCodeBuilder::default();
    for expr in exprs.iter() {
        emit(&mut builder, expr);
    }
    builder.push_opcode(Opcode::Ret);
    builder.finish()
}

/// Postorder traversal of the template dependency graph, so a mapping's
/// source templates run before its target template.  Mapping cycles are
/// legal (the runtime fixed point settles them), so a back-edge is simply
/// skipped rather than rejected.
fn topo_sort(templates: &[Ident], deps: &HashMap<Ident, HashSet<Ident>>) -> Vec<Ident> {
    fn visit(
        ident: &Ident,
        deps: &HashMap<Ident, HashSet<Ident>>,
        used: &mut HashSet<Ident>,
        result: &mut Vec<Ident>,
    ) {
        if used.contains(ident) {
            return;
        }
        used.insert(ident.clone());
        if let Some(template_deps) = deps.get(ident) {
            let mut template_deps: Vec<&Ident> = template_deps.iter().collect();
            template_deps.sort();
            for dep in template_deps.into_iter() {
                visit(dep, deps, used, result);
            }
        }
        result.push(ident.clone());
    }

    let mut result: Vec<Ident> = Vec::with_capacity(templates.len());
    let mut used: HashSet<Ident> = HashSet::new();
    for ident in templates.iter() {
        visit(ident, deps, &mut used, &mut result);
    }
    result
}

fn place(
    var: &Variable,
    next_off: &mut usize,
    var_offs: &mut HashMap<Ident, usize>,
    offsets: &mut HashMap<Ident, usize>,
    states: &mut Vec<usize>,
    derivatives: &mut Vec<usize>,
) {
    let off = *next_off;
    *next_off += 1;
    var_offs.insert(var.id.clone(), off);
    offsets.insert(var.full_name(), off);
    match var.kind {
        VariableKind::State => states.push(off),
        VariableKind::Derivative => derivatives.push(off),
        _ => {}
    }
}

fn validate_config(config: &Config) -> Result<()> {
    if !(config.tolerance.is_finite() && config.tolerance > 0.0) {
        return sim_err!(BadConfig, "tolerance".to_string());
    }
    if config.max_iterations == 0 {
        return sim_err!(BadConfig, "max_iterations".to_string());
    }
    if config.historian_capacity == 0 {
        return sim_err!(BadConfig, "historian_capacity".to_string());
    }
    Ok(())
}

pub fn compile(spec: &SystemSpec) -> Result<CompiledSystem> {
    validate_config(&spec.config)?;

    let mut vars = build_variable_table(&spec.variables)?;

    let mut ctx = CompilationContext::new();
    for eq in spec.equations.iter() {
        ctx.register(eq)?;
    }

    let mut by_template: HashMap<Ident, Vec<usize>> = HashMap::new();
    for (i, instance) in spec.instances.iter().enumerate() {
        let eq_ident = canonicalize(&instance.equation);
        if ctx.template(&eq_ident).is_none() {
            return Err(Error::new(
                ErrorKind::Model,
                ErrorCode::DoesNotExist,
                Some(eq_ident),
            ));
        }
        by_template.entry(eq_ident).or_default().push(i);
    }

    if spec.config.chain_reduction {
        reduce_templates(&mut ctx, &spec.instances, &vars, &spec.mappings);
    }

    let mut global = Graph::new();
    for instance in spec.instances.iter() {
        let template = ctx.template(&canonicalize(&instance.equation)).unwrap();
        global.merge(qualify(template, instance, &vars)?)?;
    }

    compile_mappings(&mut ctx, &mut global, &mut vars, &spec.mappings)?;

    // run even when chain reduction is off: assign cycles are fatal
    let roots = resolve_assign_roots(&vars)?;

    // which template each variable's slot belongs to, for ordering
    let mut var_template: HashMap<Ident, Ident> = HashMap::new();
    for instance in spec.instances.iter() {
        for var_id in instance.variables.iter() {
            var_template.insert(canonicalize(var_id), canonicalize(&instance.equation));
        }
    }
    let mut deps: HashMap<Ident, HashSet<Ident>> = HashMap::new();
    for mapping in spec.mappings.iter() {
        let target_tmpl = match var_template.get(&canonicalize(&mapping.target)) {
            Some(t) => t.clone(),
            None => continue,
        };
        for source in mapping.sources.iter() {
            if let Some(source_tmpl) = var_template.get(&canonicalize(source)) {
                if *source_tmpl != target_tmpl {
                    deps.entry(target_tmpl.clone())
                        .or_default()
                        .insert(source_tmpl.clone());
                }
            }
        }
    }
    let template_order = topo_sort(ctx.template_idents(), &deps);

    // flat layout: time, then (template, instance, scope slot), then any
    // variable no instance binds (mapping-only endpoints)
    let mut var_offs: HashMap<Ident, usize> = HashMap::new();
    let mut offsets: HashMap<Ident, usize> = HashMap::new();
    offsets.insert("time".to_string(), TIME_OFF);
    let mut next_off = IMPLICIT_SLOT_COUNT;
    let mut states: Vec<usize> = Vec::new();
    let mut derivatives: Vec<usize> = Vec::new();

    let mut kernels: Vec<CompiledKernel> = Vec::new();
    for tmpl_ident in template_order.iter() {
        let instance_idxs = match by_template.get(tmpl_ident) {
            Some(idxs) => idxs,
            None => continue,
        };
        let template = ctx.template(tmpl_ident).unwrap();

        let mut base_offsets = Vec::with_capacity(instance_idxs.len());
        for &i in instance_idxs.iter() {
            let instance = &spec.instances[i];
            base_offsets.push(next_off);
            for var_id in instance.variables.iter() {
                let var_id = canonicalize(var_id);
                if var_offs.contains_key(&var_id) {
                    return sim_err!(NotSimulatable, var_id);
                }
                let var = &vars[&var_id];
                place(
                    var,
                    &mut next_off,
                    &mut var_offs,
                    &mut offsets,
                    &mut states,
                    &mut derivatives,
                );
            }
        }

        let lowering = Context {
            ident: tmpl_ident,
            scope: &template.scope,
        };
        let exprs = lowering.lower_template(&template.graph)?;
        let bytecode = Arc::new(compile_bytecode(&exprs));
        kernels.push(CompiledKernel {
            ident: tmpl_ident.clone(),
            scope_len: template.scope.len(),
            base_offsets,
            exprs,
            bytecode,
        });
    }

    let unbound: Vec<&Variable> = spec
        .variables
        .iter()
        .map(|v| &vars[&canonicalize(&v.id)])
        .filter(|v| !var_offs.contains_key(&v.id))
        .collect();
    for var in unbound.into_iter() {
        place(
            var,
            &mut next_off,
            &mut var_offs,
            &mut offsets,
            &mut states,
            &mut derivatives,
        );
    }
    let n_slots = next_off;

    if states.len() != derivatives.len() {
        return sim_err!(NotSimulatable, spec.name.clone());
    }

    let mut initials = vec![0.0; n_slots];
    for (var_id, off) in var_offs.iter() {
        initials[*off] = vars[var_id].value;
    }

    let resolve = |id: &Ident| -> usize {
        let root = if spec.config.chain_reduction {
            roots.get(id).unwrap_or(id)
        } else {
            id
        };
        var_offs[root]
    };

    let mut copies: Vec<(usize, usize)> = Vec::new();
    let mut sums: Vec<(usize, Vec<usize>)> = Vec::new();
    for var in vars.values() {
        if let Some(source) = &var.assign_source {
            let source = if spec.config.chain_reduction {
                resolve(&var.id)
            } else {
                var_offs[source]
            };
            copies.push((var_offs[&var.id], source));
        } else if !var.sum_sources.is_empty() {
            let source_offs: Vec<usize> = var.sum_sources.iter().map(&resolve).collect();
            sums.push((var_offs[&var.id], source_offs));
        }
    }
    copies.sort_unstable();
    sums.sort_unstable();

    // the fixed-point loop watches the mapping *sources*: a copy target is
    // refreshed before the kernels run, so only its source reveals whether
    // the pass changed anything
    let mut watch: Vec<usize> = copies
        .iter()
        .map(|(_, source)| *source)
        .chain(sums.iter().flat_map(|(_, sources)| sources.iter().copied()))
        .collect();
    watch.sort_unstable();
    watch.dedup();

    Ok(CompiledSystem {
        name: spec.name.clone(),
        n_slots,
        initials,
        offsets,
        kernels,
        copies,
        sums,
        watch,
        states,
        derivatives,
        config: spec.config.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{
        Equation, Instance, Mapping, MappingKind, Variable as DmVariable,
    };

    fn decay_spec(n: usize) -> SystemSpec {
        let mut spec = SystemSpec::new("decay");
        spec.equations.push(Equation {
            ident: "decay".to_string(),
            scope: vec!["x".to_string(), "x_dot".to_string(), "k".to_string()],
            source: "scope.x_dot = -scope.k * scope.x".to_string(),
        });
        for i in 0..n {
            let path = format!("sys.c{}", i);
            spec.variables.push(DmVariable::new(
                &format!("{}.x", path),
                "x",
                VariableKind::State,
                1.0,
                &path,
            ));
            spec.variables.push(DmVariable::new(
                &format!("{}.x_dot", path),
                "x_dot",
                VariableKind::Derivative,
                0.0,
                &path,
            ));
            spec.variables.push(DmVariable::new(
                &format!("{}.k", path),
                "k",
                VariableKind::Parameter,
                0.5,
                &path,
            ));
            spec.instances.push(Instance {
                path: path.clone(),
                equation: "decay".to_string(),
                variables: vec![
                    format!("{}.x", path),
                    format!("{}.x_dot", path),
                    format!("{}.k", path),
                ],
            });
        }
        spec
    }

    #[test]
    fn test_layout_batches_instances() {
        let sys = compile(&decay_spec(3)).unwrap();
        assert_eq!(sys.n_slots, 1 + 3 * 3);
        assert_eq!(sys.kernels.len(), 1);
        let kernel = &sys.kernels[0];
        assert_eq!(kernel.scope_len, 3);
        // instances laid out contiguously, one kernel for all three
        assert_eq!(kernel.base_offsets, vec![1, 4, 7]);
        assert_eq!(sys.var_offset("sys.c1.x"), Some(4));
        assert_eq!(sys.var_offset("time"), Some(0));
        assert_eq!(sys.n_states(), 3);
        assert_eq!(sys.derivatives.len(), 3);
        // state i pairs with derivative i
        assert_eq!(sys.states, vec![1, 4, 7]);
        assert_eq!(sys.derivatives, vec![2, 5, 8]);
    }

    #[test]
    fn test_lowered_exprs() {
        let sys = compile(&decay_spec(1)).unwrap();
        let exprs = &sys.kernels[0].exprs;
        assert_eq!(exprs.len(), 1);
        // scope.x_dot = (0 - scope.k) * scope.x
        assert_eq!(
            exprs[0],
            Expr::AssignCurr(
                1,
                Box::new(Expr::Op2(
                    BinaryOp::Mul,
                    Box::new(Expr::Op2(
                        BinaryOp::Sub,
                        Box::new(Expr::Const(0.0)),
                        Box::new(Expr::Var(2)),
                    )),
                    Box::new(Expr::Var(0)),
                )),
            )
        );
    }

    #[test]
    fn test_topo_orders_source_template_first() {
        let mut spec = decay_spec(1);
        // a second template whose output feeds c0's k
        spec.equations.push(Equation {
            ident: "gain".to_string(),
            scope: vec!["out".to_string()],
            source: "scope.out = 0.25 * 2".to_string(),
        });
        spec.variables.push(DmVariable::new(
            "sys.g.out",
            "out",
            VariableKind::Parameter,
            0.0,
            "sys.g",
        ));
        spec.instances.push(Instance {
            path: "sys.g".to_string(),
            equation: "gain".to_string(),
            variables: vec!["sys.g.out".to_string()],
        });
        spec.mappings.push(Mapping {
            target: "sys.c0.k".to_string(),
            sources: vec!["sys.g.out".to_string()],
            kind: MappingKind::Assign,
        });

        let sys = compile(&spec).unwrap();
        let order: Vec<&str> = sys.kernels.iter().map(|k| k.ident.as_str()).collect();
        assert_eq!(order, vec!["gain", "decay"]);
        assert_eq!(sys.copies.len(), 1);
        let (target, source) = sys.copies[0];
        assert_eq!(target, sys.var_offset("sys.c0.k").unwrap());
        assert_eq!(source, sys.var_offset("sys.g.out").unwrap());
        assert_eq!(sys.watch, vec![source]);
    }

    #[test]
    fn test_state_derivative_mismatch() {
        let mut spec = decay_spec(1);
        spec.variables.push(
            DmVariable::new("sys.lone", "lone", VariableKind::State, 0.0, "sys"),
        );
        let err = compile(&spec).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotSimulatable);
    }

    #[test]
    fn test_bad_builtin_args() {
        let mut spec = decay_spec(1);
        spec.equations[0].source = "scope.x_dot = max(scope.x)".to_string();
        let err = compile(&spec).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadBuiltinArgs);
    }

    #[test]
    fn test_bad_config() {
        let mut spec = decay_spec(1);
        spec.config.max_iterations = 0;
        let err = compile(&spec).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadConfig);
    }
}
