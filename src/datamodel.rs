// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The contract consumed from the assembly/DSL front end: a flat variable
//! table, equation templates bound to scope types, scope instances, and the
//! inter-instance variable couplings.  Whichever front end is used must
//! produce this deterministically; the engine treats it as ground truth.

use serde::{Deserialize, Serialize};

use crate::common::Ident;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    State,
    Derivative,
    Parameter,
    Constant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: Ident,
    /// the tag local to the owning scope, e.g. `t1`
    pub tag: Ident,
    pub kind: VariableKind,
    /// initial value; mutated only by the kernel/runtime after assembly
    pub value: f64,
    /// dotted path of the owning instance, e.g. `sys.body1.thermal`
    pub path: Ident,
    /// read-only: mapping this variable is a compile-time error
    pub fixed: bool,
    /// must resolve to exactly one mapping source by end of compilation
    pub must_map: bool,
    /// recorded by the historian or addressed by external callbacks; an
    /// observable variable always keeps a materialized slot
    pub observable: bool,
}

impl Variable {
    pub fn new(id: &str, tag: &str, kind: VariableKind, value: f64, path: &str) -> Self {
        Variable {
            id: id.to_string(),
            tag: tag.to_string(),
            kind,
            value,
            path: path.to_string(),
            fixed: false,
            must_map: false,
            observable: true,
        }
    }

    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    pub fn must_map(mut self) -> Self {
        self.must_map = true;
        self
    }

    pub fn internal(mut self) -> Self {
        self.observable = false;
        self
    }
}

/// One equation template: a scope type (ordered tag list) plus the equation
/// body evaluated against it.  Parsed once regardless of instance count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub ident: Ident,
    pub scope: Vec<Ident>,
    pub source: String,
}

/// One equation scope: an instantiation of a template at a unique path.
/// `variables` is parallel to the template's `scope` list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub path: Ident,
    pub equation: Ident,
    pub variables: Vec<Ident>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingKind {
    Assign,
    Sum,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub target: Ident,
    pub sources: Vec<Ident>,
    pub kind: MappingKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelBackend {
    /// walk the lowered expression trees directly
    Interpreted,
    /// compile the lowered expressions to stack bytecode ahead of time
    ByteCode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// absolute tolerance for the per-evaluation fixed-point loop
    pub tolerance: f64,
    /// iteration cap for the fixed-point loop; exceeding it fails the
    /// evaluation with `convergence_failed`
    pub max_iterations: usize,
    /// number of time-stamped snapshots the historian preallocates
    pub historian_capacity: usize,
    pub backend: KernelBackend,
    /// disable to compile without copy-chain removal (differential testing)
    pub chain_reduction: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tolerance: 1e-6,
            max_iterations: 100,
            historian_capacity: 1024,
            backend: KernelBackend::ByteCode,
            chain_reduction: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemSpec {
    pub name: String,
    pub variables: Vec<Variable>,
    pub equations: Vec<Equation>,
    pub instances: Vec<Instance>,
    pub mappings: Vec<Mapping>,
    pub config: Config,
}

impl SystemSpec {
    pub fn new(name: &str) -> Self {
        SystemSpec {
            name: name.to_string(),
            variables: vec![],
            equations: vec![],
            instances: vec![],
            mappings: vec![],
            config: Config::default(),
        }
    }
}
