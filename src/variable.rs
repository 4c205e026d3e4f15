// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;

use crate::common::{canonicalize, Error, ErrorCode, ErrorKind, Ident, Result};
use crate::datamodel;
use crate::datamodel::VariableKind;
use crate::model_err;

/// The compiler's record for one variable: the datamodel fields plus the
/// mapping resolution state accumulated while mappings are compiled.  A
/// variable holds an assign source XOR sum sources, never both.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub id: Ident,
    pub tag: Ident,
    pub kind: VariableKind,
    pub value: f64,
    pub path: Ident,
    pub fixed: bool,
    pub must_map: bool,
    pub observable: bool,
    pub assign_source: Option<Ident>,
    pub sum_sources: Vec<Ident>,
}

impl Variable {
    pub fn from(var: &datamodel::Variable) -> Self {
        Variable {
            id: canonicalize(&var.id),
            tag: canonicalize(&var.tag),
            kind: var.kind,
            value: var.value,
            path: canonicalize(&var.path),
            fixed: var.fixed,
            must_map: var.must_map,
            observable: var.observable,
            assign_source: None,
            sum_sources: vec![],
        }
    }

    /// The globally unique qualified name, `path.tag`.
    pub fn full_name(&self) -> Ident {
        format!("{}.{}", self.path, self.tag)
    }

    pub fn is_mapped(&self) -> bool {
        self.assign_source.is_some() || !self.sum_sources.is_empty()
    }

    pub fn is_state(&self) -> bool {
        self.kind == VariableKind::State
    }

    pub fn is_derivative(&self) -> bool {
        self.kind == VariableKind::Derivative
    }

    pub fn set_assign_source(&mut self, source: Ident) -> Result<()> {
        if self.fixed {
            return mapping_err(ErrorCode::FixedMapped, &self.id);
        }
        if self.is_mapped() {
            return mapping_err(ErrorCode::DuplicateMapping, &self.id);
        }
        self.assign_source = Some(source);
        Ok(())
    }

    pub fn set_sum_sources(&mut self, sources: Vec<Ident>) -> Result<()> {
        if self.fixed {
            return mapping_err(ErrorCode::FixedMapped, &self.id);
        }
        if self.is_mapped() {
            return mapping_err(ErrorCode::DuplicateMapping, &self.id);
        }
        self.sum_sources = sources;
        Ok(())
    }
}

fn mapping_err(code: ErrorCode, id: &str) -> Result<()> {
    Err(Error::new(ErrorKind::Model, code, Some(id.to_string())))
}

/// Builds the id-keyed variable table, canonicalizing names and rejecting
/// duplicate ids.
pub fn build_variable_table(vars: &[datamodel::Variable]) -> Result<HashMap<Ident, Variable>> {
    let mut table: HashMap<Ident, Variable> = HashMap::with_capacity(vars.len());
    for var in vars.iter() {
        let var = Variable::from(var);
        if table.contains_key(&var.id) {
            return model_err!(DuplicateVariable, var.id);
        }
        table.insert(var.id.clone(), var);
    }
    Ok(table)
}
