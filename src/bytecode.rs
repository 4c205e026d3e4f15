// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;

use ordered_float::OrderedFloat;

pub type LiteralId = u16;
pub type VariableOffset = u16;

#[derive(Copy, Clone, Debug)]
pub(crate) enum BuiltinId {
    Abs,
    Arccos,
    Arcsin,
    Arctan,
    Cos,
    Exp,
    Inf,
    Int,
    Ln,
    Log10,
    Max,
    Min,
    Pi,
    SafeDiv,
    Sin,
    Sqrt,
    Tan,
}

#[derive(Copy, Clone, Debug)]
pub(crate) enum Op2 {
    Add,
    Sub,
    Exp,
    Mul,
    Div,
    Mod,
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    And,
    Or,
}

/// Opcodes for the stack kernel.  `LoadVar`/`AssignCurr` offsets are
/// relative to the executing instance's base slot; `LoadGlobalVar` is an
/// absolute offset (the `time` slot).
#[derive(Clone, Debug)]
pub(crate) enum Opcode {
    Op2 { op: Op2 },
    Not {},
    LoadConstant { id: LiteralId },
    LoadVar { off: VariableOffset },
    LoadGlobalVar { off: VariableOffset },
    SetCond {},
    If {},
    Apply { func: BuiltinId },
    AssignCurr { off: VariableOffset },
    Ret,
}

#[derive(Clone, Debug, Default)]
pub struct ByteCode {
    pub(crate) literals: Vec<f64>,
    pub(crate) code: Vec<Opcode>,
}

#[derive(Clone, Debug, Default)]
pub struct ByteCodeBuilder {
    bytecode: ByteCode,
    interned_literals: HashMap<OrderedFloat<f64>, LiteralId>,
}

impl ByteCodeBuilder {
    pub(crate) fn intern_literal(&mut self, lit: f64) -> LiteralId {
        let key: OrderedFloat<f64> = lit.into();
        if self.interned_literals.contains_key(&key) {
            return self.interned_literals[&key];
        }
        self.bytecode.literals.push(lit);
        let literal_id = (self.bytecode.literals.len() - 1) as u16;
        self.interned_literals.insert(key, literal_id);
        literal_id
    }

    pub(crate) fn push_opcode(&mut self, op: Opcode) {
        self.bytecode.code.push(op)
    }

    pub(crate) fn finish(self) -> ByteCode {
        self.bytecode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memoizing_interning() {
        let mut bytecode = ByteCodeBuilder::default();
        let a1 = bytecode.intern_literal(1.0);
        let b1 = bytecode.intern_literal(1.01);
        let b2 = bytecode.intern_literal(1.01);
        let a2 = bytecode.intern_literal(1.0);

        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
        assert_ne!(a1, b1);

        let bytecode = bytecode.finish();
        assert_eq!(2, bytecode.literals.len());
    }

    #[test]
    fn test_opcode_size() {
        use std::mem::size_of;
        assert!(size_of::<Opcode>() <= 4);
    }
}
