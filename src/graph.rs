// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The symbolic equation graph: role-labeled edges over a closed set of
//! node kinds.  Template subgraphs, qualified instance subgraphs, and the
//! mapping-injected coupling nodes all share this representation.

use std::collections::HashMap;

use crate::ast::{BinaryOp, UnaryOp};
use crate::common::{Ident, Result};
use crate::model_err;

pub type NodeId = Ident;

/// Every node is one of these kinds; matching is exhaustive everywhere a
/// graph is consumed.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// a reference to a named value; `var_id` is the backing global
    /// variable id, attached during qualification (None in templates and
    /// for the implicit `time` global)
    VarRef { var_id: Option<Ident> },
    Const { text: String, value: f64 },
    UnaryOp(UnaryOp),
    BinOp(BinaryOp),
    Compare(BinaryOp),
    Call(Ident),
    IfExp,
    Assign,
}

/// Edge roles; each node kind admits a fixed set:
/// UnaryOp: Operand.  BinOp: Left, Right.  Compare: Comp(0), Comp(1).
/// Call: Arg(0..n).  IfExp: Arg(0)=condition, Arg(1)=then, Arg(2)=else.
/// Assign: Target0, Value.  VarRef and Const are leaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Left,
    Right,
    Value,
    Target0,
    Operand,
    Arg(usize),
    Comp(usize),
}

#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: HashMap<NodeId, NodeKind>,
    // insertion order; assignment statements stay in source order
    order: Vec<NodeId>,
    out_edges: HashMap<NodeId, Vec<(Role, NodeId)>>,
    in_edges: HashMap<NodeId, Vec<(NodeId, Role)>>,
}

impl Graph {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&NodeKind> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.order.iter()
    }

    pub fn add_node(&mut self, id: NodeId, kind: NodeKind) -> Result<()> {
        if self.nodes.contains_key(&id) {
            return model_err!(IdentifierCollision, id);
        }
        self.order.push(id.clone());
        self.nodes.insert(id, kind);
        Ok(())
    }

    /// Adds the node if absent; used for VarRef endpoints that several
    /// statements or mappings may all reference.
    pub fn ensure_node(&mut self, id: &str, kind: NodeKind) {
        if !self.nodes.contains_key(id) {
            self.order.push(id.to_string());
            self.nodes.insert(id.to_string(), kind);
        }
    }

    pub fn add_edge(&mut self, from: &str, to: &str, role: Role) {
        debug_assert!(self.nodes.contains_key(from) && self.nodes.contains_key(to));
        self.out_edges
            .entry(from.to_string())
            .or_default()
            .push((role, to.to_string()));
        self.in_edges
            .entry(to.to_string())
            .or_default()
            .push((from.to_string(), role));
    }

    /// Out-edges of `id` in insertion order.
    pub fn children(&self, id: &str) -> &[(Role, NodeId)] {
        self.out_edges.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn child(&self, id: &str, role: Role) -> Option<&NodeId> {
        self.children(id)
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, to)| to)
    }

    /// In-edges of `id`: every (consumer, role) pair that reads it.
    pub fn consumers(&self, id: &str) -> &[(NodeId, Role)] {
        self.in_edges.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Redirects every edge pointing at `from` to point at `to` instead.
    pub fn rewire_consumers(&mut self, from: &str, to: &str) {
        let consumers = self.in_edges.remove(from).unwrap_or_default();
        for (consumer, role) in consumers.iter() {
            if let Some(edges) = self.out_edges.get_mut(consumer) {
                for edge in edges.iter_mut() {
                    if edge.0 == *role && edge.1 == from {
                        edge.1 = to.to_string();
                    }
                }
            }
        }
        let mut consumers: Vec<(NodeId, Role)> = consumers;
        self.in_edges
            .entry(to.to_string())
            .or_default()
            .append(&mut consumers);
    }

    /// Removes a node and its out-edges.  The caller must have rewired or
    /// removed all consumers first.
    pub fn remove_node(&mut self, id: &str) {
        debug_assert!(self.consumers(id).is_empty());
        if let Some(edges) = self.out_edges.remove(id) {
            for (role, to) in edges.iter() {
                if let Some(ins) = self.in_edges.get_mut(to) {
                    ins.retain(|(from, r)| !(from == id && r == role));
                }
            }
        }
        self.in_edges.remove(id);
        self.nodes.remove(id);
        self.order.retain(|n| n != id);
    }

    /// Assign nodes in insertion (statement) order.
    pub fn assigns(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .filter(|id| matches!(self.nodes.get(*id), Some(NodeKind::Assign)))
            .cloned()
            .collect()
    }

    /// Merges another graph in.  A shared node id is fatal, except for
    /// structurally identical VarRef nodes (the `time` global and mapping
    /// endpoints), which unify into one node.
    pub fn merge(&mut self, mut other: Graph) -> Result<()> {
        for id in other.order.iter() {
            if let Some(kind) = self.nodes.get(id) {
                let shared = matches!(kind, NodeKind::VarRef { .. })
                    && other.nodes.get(id) == Some(kind);
                if !shared {
                    return model_err!(IdentifierCollision, id.clone());
                }
            }
        }
        for id in other.order.into_iter() {
            let kind = other.nodes.remove(&id).unwrap();
            if !self.nodes.contains_key(&id) {
                self.order.push(id.clone());
                self.nodes.insert(id, kind);
            }
        }
        for (from, edges) in other.out_edges.into_iter() {
            for (role, to) in edges.into_iter() {
                self.out_edges
                    .entry(from.clone())
                    .or_default()
                    .push((role, to.clone()));
                self.in_edges.entry(to).or_default().push((from.clone(), role));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorCode;

    fn var(id: Option<&str>) -> NodeKind {
        NodeKind::VarRef {
            var_id: id.map(|s| s.to_string()),
        }
    }

    // scope.y = scope.x  (an assign that purely copies)
    fn copy_graph() -> Graph {
        let mut g = Graph::new();
        g.add_node("scope.x".to_string(), var(None)).unwrap();
        g.add_node("scope.y".to_string(), var(None)).unwrap();
        g.add_node("scope.__op0".to_string(), NodeKind::Assign).unwrap();
        g.add_edge("scope.__op0", "scope.y", Role::Target0);
        g.add_edge("scope.__op0", "scope.x", Role::Value);
        g
    }

    #[test]
    fn test_roles() {
        let g = copy_graph();
        assert_eq!(g.child("scope.__op0", Role::Target0).unwrap(), "scope.y");
        assert_eq!(g.child("scope.__op0", Role::Value).unwrap(), "scope.x");
        assert_eq!(g.consumers("scope.x").len(), 1);
        assert_eq!(g.assigns(), vec!["scope.__op0".to_string()]);
    }

    #[test]
    fn test_rewire_and_remove() {
        let mut g = copy_graph();
        g.add_node("scope.__op1".to_string(), NodeKind::UnaryOp(UnaryOp::Negative))
            .unwrap();
        g.add_edge("scope.__op1", "scope.y", Role::Operand);

        // make downstream read scope.x directly, then drop the copy
        g.rewire_consumers("scope.y", "scope.x");
        assert_eq!(g.child("scope.__op1", Role::Operand).unwrap(), "scope.x");
        assert_eq!(g.child("scope.__op0", Role::Target0).unwrap(), "scope.x");

        g.rewire_consumers("scope.__op0", "scope.x");
        g.remove_node("scope.__op0");
        g.remove_node("scope.y");
        assert_eq!(g.len(), 2);
        assert!(!g.contains("scope.y"));
    }

    #[test]
    fn test_merge_collision() {
        let mut a = copy_graph();
        let b = copy_graph();
        let err = a.merge(b).unwrap_err();
        assert_eq!(err.code, ErrorCode::IdentifierCollision);
    }
}
