// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Compiles networks of per-component equation fragments into batched
//! numeric kernels, and runs them behind a fixed-point resolution loop
//! driven by an external integrator.

#![forbid(unsafe_code)]

#[macro_use]
pub mod common;
mod ast;
mod builtins;
mod bytecode;
mod compiler;
pub mod datamodel;
mod graph;
mod interpreter;
mod mapping;
mod parser;
mod qualify;
mod reduce;
mod template;
mod token;
mod variable;
mod vm;

pub use self::common::{canonicalize, Error, ErrorCode, ErrorKind, Ident, Result};
pub use self::compiler::{compile, CompiledSystem};
pub use self::vm::{Results, Vm};
