// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Instance qualification: cloning a template subgraph into the namespace
//! of one instance.  Node ids are prefixed with the instance path, so
//! uniqueness of qualified ids follows structurally from uniqueness of
//! paths rather than from naming convention.

use std::collections::HashMap;

use crate::common::{canonicalize, Error, ErrorCode, ErrorKind, Ident, Result};
use crate::datamodel;
use crate::graph::{Graph, NodeKind};
use crate::model_err;
use crate::template::{Template, SCOPE_PREFIX};
use crate::variable::Variable;

fn rewrite(id: &str, path: &str) -> Ident {
    match id.strip_prefix(SCOPE_PREFIX) {
        Some(rest) => format!("{}.{}", path, rest),
        // the `time` global is shared, not per-instance
        None => id.to_string(),
    }
}

/// Clones `template`'s graph for one instance, rewriting every node id
/// with the instance path and attaching to each scope VarRef the id of the
/// global variable bound at that scope slot.
pub fn qualify(
    template: &Template,
    instance: &datamodel::Instance,
    vars: &HashMap<Ident, Variable>,
) -> Result<Graph> {
    let path = canonicalize(&instance.path);
    if instance.variables.len() != template.scope.len() {
        return Err(Error::new(
            ErrorKind::Model,
            ErrorCode::BadScopeBinding,
            Some(format!(
                "{}: {} bindings for {} scope slots",
                path,
                instance.variables.len(),
                template.scope.len()
            )),
        ));
    }

    let mut bound: HashMap<&str, Ident> = HashMap::with_capacity(template.scope.len());
    for (tag, var_id) in template.scope.iter().zip(instance.variables.iter()) {
        let var_id = canonicalize(var_id);
        if !vars.contains_key(&var_id) {
            return model_err!(DoesNotExist, var_id);
        }
        bound.insert(tag.as_str(), var_id);
    }

    let mut qualified = Graph::new();
    for id in template.graph.node_ids() {
        let kind = match template.graph.node(id).unwrap() {
            NodeKind::VarRef { .. } => match id.strip_prefix(SCOPE_PREFIX) {
                Some(tag) => NodeKind::VarRef {
                    var_id: Some(bound[tag].clone()),
                },
                None => NodeKind::VarRef { var_id: None },
            },
            kind => kind.clone(),
        };
        qualified.add_node(rewrite(id, &path), kind)?;
    }
    for id in template.graph.node_ids() {
        let from = rewrite(id, &path);
        for (role, to) in template.graph.children(id) {
            qualified.add_edge(&from, &rewrite(to, &path), *role);
        }
    }
    Ok(qualified)
}
