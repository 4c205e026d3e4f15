// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The numeric runtime: a flat value store, the fixed-point `compute()`
//! loop, allocation-free derivative evaluation, and the historian.

use std::collections::HashMap;

use float_cmp::approx_eq;

use crate::bytecode::{BuiltinId, ByteCode, Op2, Opcode};
use crate::common::{Ident, Result};
use crate::compiler::{CompiledSystem, TIME_OFF};
use crate::datamodel::KernelBackend;
use crate::interpreter::{self, is_truthy};
use crate::sim_err;

#[derive(Clone, Debug)]
struct Stack {
    stack: Vec<f64>,
}

impl Stack {
    fn new() -> Stack {
        Stack {
            stack: Vec::with_capacity(32),
        }
    }

    #[inline(always)]
    fn push(&mut self, value: f64) {
        self.stack.push(value)
    }

    #[inline(always)]
    fn pop(&mut self) -> f64 {
        self.stack.pop().unwrap()
    }
}

fn apply(func: BuiltinId, stack: &mut Stack) -> f64 {
    match func {
        BuiltinId::Abs => stack.pop().abs(),
        BuiltinId::Arccos => stack.pop().acos(),
        BuiltinId::Arcsin => stack.pop().asin(),
        BuiltinId::Arctan => stack.pop().atan(),
        BuiltinId::Cos => stack.pop().cos(),
        BuiltinId::Exp => stack.pop().exp(),
        BuiltinId::Inf => f64::INFINITY,
        BuiltinId::Int => stack.pop().trunc(),
        BuiltinId::Ln => stack.pop().ln(),
        BuiltinId::Log10 => stack.pop().log10(),
        BuiltinId::Max => {
            let b = stack.pop();
            let a = stack.pop();
            a.max(b)
        }
        BuiltinId::Min => {
            let b = stack.pop();
            let a = stack.pop();
            a.min(b)
        }
        BuiltinId::Pi => std::f64::consts::PI,
        BuiltinId::SafeDiv => {
            // the compiler always emits three arguments
            let c = stack.pop();
            let b = stack.pop();
            let a = stack.pop();
            if b != 0.0 {
                a / b
            } else {
                c
            }
        }
        BuiltinId::Sin => stack.pop().sin(),
        BuiltinId::Sqrt => stack.pop().sqrt(),
        BuiltinId::Tan => stack.pop().tan(),
    }
}

fn apply_op2(op: Op2, l: f64, r: f64) -> f64 {
    match op {
        Op2::Add => l + r,
        Op2::Sub => l - r,
        Op2::Exp => l.powf(r),
        Op2::Mul => l * r,
        Op2::Div => l / r,
        Op2::Mod => l.rem_euclid(r),
        Op2::Gt => (l > r) as i8 as f64,
        Op2::Gte => (l >= r) as i8 as f64,
        Op2::Lt => (l < r) as i8 as f64,
        Op2::Lte => (l <= r) as i8 as f64,
        Op2::Eq => approx_eq!(f64, l, r) as i8 as f64,
        Op2::Neq => !approx_eq!(f64, l, r) as i8 as f64,
        Op2::And => (is_truthy(l) && is_truthy(r)) as i8 as f64,
        Op2::Or => (is_truthy(l) || is_truthy(r)) as i8 as f64,
    }
}

/// Runs one kernel for the instance at `base`.
fn eval(bytecode: &ByteCode, base: usize, curr: &mut [f64], stack: &mut Stack) {
    let mut condition = false;

    for op in bytecode.code.iter().cloned() {
        match op {
            Opcode::Op2 { op } => {
                let r = stack.pop();
                let l = stack.pop();
                stack.push(apply_op2(op, l, r));
            }
            Opcode::Not {} => {
                let r = stack.pop();
                stack.push((!is_truthy(r)) as i8 as f64);
            }
            Opcode::LoadConstant { id } => {
                stack.push(bytecode.literals[id as usize]);
            }
            Opcode::LoadVar { off } => {
                stack.push(curr[base + off as usize]);
            }
            Opcode::LoadGlobalVar { off } => {
                stack.push(curr[off as usize]);
            }
            Opcode::SetCond {} => {
                condition = is_truthy(stack.pop());
            }
            Opcode::If {} => {
                let f = stack.pop();
                let t = stack.pop();
                stack.push(if condition { t } else { f });
            }
            Opcode::Apply { func } => {
                let result = apply(func, stack);
                stack.push(result);
            }
            Opcode::AssignCurr { off } => {
                curr[base + off as usize] = stack.pop();
                debug_assert_eq!(0, stack.stack.len());
            }
            Opcode::Ret => {
                break;
            }
        }
    }
}

#[derive(Debug)]
pub struct Results {
    pub offsets: HashMap<Ident, usize>,
    // one large allocation
    pub data: Box<[f64]>,
    pub step_size: usize,
    pub step_count: usize,
}

impl Results {
    pub fn print_tsv(&self) {
        let var_names = {
            let offset_name_map: HashMap<usize, &str> =
                self.offsets.iter().map(|(k, v)| (*v, k.as_str())).collect();
            let mut var_names: Vec<&str> = Vec::with_capacity(self.step_size);
            for i in 0..(self.step_size) {
                let name = if offset_name_map.contains_key(&i) {
                    offset_name_map[&i]
                } else {
                    "UNKNOWN"
                };
                var_names.push(name);
            }
            var_names
        };

        // print header
        for (i, id) in var_names.iter().enumerate() {
            print!("{}", id);
            if i == var_names.len() - 1 {
                println!();
            } else {
                print!("\t");
            }
        }

        for curr in self.iter() {
            for (i, val) in curr.iter().enumerate() {
                print!("{}", val);
                if i == var_names.len() - 1 {
                    println!();
                } else {
                    print!("\t");
                }
            }
        }
    }

    pub fn iter(&self) -> std::iter::Take<std::slice::Chunks<f64>> {
        self.data.chunks(self.step_size).take(self.step_count)
    }
}

/// The runtime model: owns the flat store and drives the compiled kernels.
#[derive(Debug)]
pub struct Vm {
    compiled: CompiledSystem,
    curr: Box<[f64]>,
    stack: Stack,
    watch_prev: Vec<f64>,
    historian: Box<[f64]>,
    historian_ix: usize,
}

impl Vm {
    pub fn new(compiled: CompiledSystem) -> Vm {
        let curr = compiled.initials.clone().into_boxed_slice();
        let watch_prev = vec![0.0; compiled.watch.len()];
        let historian =
            vec![0.0; compiled.n_slots() * compiled.config.historian_capacity].into_boxed_slice();
        Vm {
            compiled,
            curr,
            stack: Stack::new(),
            watch_prev,
            historian,
            historian_ix: 0,
        }
    }

    pub fn var_offset(&self, name: &str) -> Option<usize> {
        self.compiled.var_offset(name)
    }

    pub fn time(&self) -> f64 {
        self.curr[TIME_OFF]
    }

    pub fn set_time(&mut self, t: f64) {
        self.curr[TIME_OFF] = t;
    }

    pub fn read_variable(&self, off: usize) -> Option<f64> {
        self.curr.get(off).copied()
    }

    pub fn write_variable(&mut self, off: usize, value: f64) -> Result<()> {
        match self.curr.get_mut(off) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => sim_err!(DoesNotExist, format!("slot {}", off)),
        }
    }

    pub fn get_states(&self) -> Vec<f64> {
        self.compiled
            .states
            .iter()
            .map(|off| self.curr[*off])
            .collect()
    }

    pub fn update_states(&mut self, states: &[f64]) -> Result<()> {
        if states.len() != self.compiled.states.len() {
            return sim_err!(
                BadConfig,
                format!(
                    "expected {} states, got {}",
                    self.compiled.states.len(),
                    states.len()
                )
            );
        }
        for (i, off) in self.compiled.states.iter().enumerate() {
            self.curr[*off] = states[i];
        }
        Ok(())
    }

    pub fn get_derivatives(&self) -> Vec<f64> {
        self.compiled
            .derivatives
            .iter()
            .map(|off| self.curr[*off])
            .collect()
    }

    /// One right-hand-side evaluation for a solver: sets time, loads the
    /// state vector, recomputes, and reads the derivatives back out.  No
    /// allocation happens on this path.
    pub fn derivative(&mut self, t: f64, states: &[f64], derivatives: &mut [f64]) -> Result<()> {
        if derivatives.len() != self.compiled.derivatives.len() {
            return sim_err!(
                BadConfig,
                format!(
                    "expected {} derivative slots, got {}",
                    self.compiled.derivatives.len(),
                    derivatives.len()
                )
            );
        }
        self.set_time(t);
        self.update_states(states)?;
        self.compute()?;
        for (i, off) in self.compiled.derivatives.iter().enumerate() {
            derivatives[i] = self.curr[*off];
        }
        Ok(())
    }

    /// Brings the store to a fixed point of the coupled equations: mapped
    /// slots are snapshotted, sums and copies are refreshed, every kernel
    /// runs once, and the pass repeats until no watched slot moved more
    /// than the tolerance.  Exceeding the iteration cap is an error; a
    /// system with no mappings converges on the first pass.
    pub fn compute(&mut self) -> Result<()> {
        let tolerance = self.compiled.config.tolerance;
        for _ in 0..self.compiled.config.max_iterations {
            for (i, off) in self.compiled.watch.iter().enumerate() {
                self.watch_prev[i] = self.curr[*off];
            }

            self.apply_sums();
            self.apply_copies();
            self.run_kernels();
            self.apply_sums();

            let converged = self
                .compiled
                .watch
                .iter()
                .enumerate()
                .all(|(i, off)| (self.curr[*off] - self.watch_prev[i]).abs() <= tolerance);
            if converged {
                return Ok(());
            }
        }
        sim_err!(ConvergenceFailed, self.compiled.name().to_string())
    }

    fn apply_copies(&mut self) {
        for (target, source) in self.compiled.copies.iter() {
            self.curr[*target] = self.curr[*source];
        }
    }

    fn apply_sums(&mut self) {
        for (target, sources) in self.compiled.sums.iter() {
            let mut acc = 0.0;
            for off in sources.iter() {
                acc += self.curr[*off];
            }
            self.curr[*target] = acc;
        }
    }

    fn run_kernels(&mut self) {
        for kernel in self.compiled.kernels.iter() {
            for base in kernel.base_offsets.iter().copied() {
                match self.compiled.config.backend {
                    KernelBackend::Interpreted => {
                        for expr in kernel.exprs.iter() {
                            interpreter::eval(expr, base, &mut self.curr);
                        }
                    }
                    KernelBackend::ByteCode => {
                        eval(&kernel.bytecode, base, &mut self.curr, &mut self.stack);
                    }
                }
            }
        }
    }

    /// Appends a time-stamped snapshot of the full store to the historian.
    pub fn historian_update(&mut self, t: f64) -> Result<()> {
        if self.historian_ix >= self.compiled.config.historian_capacity {
            return sim_err!(HistorianFull, self.compiled.name().to_string());
        }
        self.curr[TIME_OFF] = t;
        let n_slots = self.compiled.n_slots();
        let row_start = self.historian_ix * n_slots;
        self.historian[row_start..row_start + n_slots].copy_from_slice(&self.curr);
        self.historian_ix += 1;
        Ok(())
    }

    pub fn step_count(&self) -> usize {
        self.historian_ix
    }

    pub fn into_results(self) -> Results {
        let step_size = self.compiled.n_slots();
        Results {
            offsets: self.compiled.offsets,
            data: self.historian,
            step_size,
            step_count: self.historian_ix,
        }
    }
}
