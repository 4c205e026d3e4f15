// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The tree-walking kernel backend: directly evaluates a template's
//! lowered expression list against the flat store.

use float_cmp::approx_eq;

use crate::ast::{BinaryOp, UnaryOp};
use crate::builtins::BuiltinFn;
use crate::compiler::{Expr, TIME_OFF};

pub(crate) fn is_truthy(n: f64) -> bool {
    let is_false = approx_eq!(f64, n, 0.0);
    !is_false
}

/// Evaluates one lowered expression for the instance at `base`.
pub(crate) fn eval(expr: &Expr, base: usize, curr: &mut [f64]) -> f64 {
    match expr {
        Expr::Const(n) => *n,
        Expr::Var(off) => curr[base + *off],
        Expr::Time => curr[TIME_OFF],
        Expr::App(builtin) => match builtin {
            BuiltinFn::Abs(a) => eval(a, base, curr).abs(),
            BuiltinFn::Arccos(a) => eval(a, base, curr).acos(),
            BuiltinFn::Arcsin(a) => eval(a, base, curr).asin(),
            BuiltinFn::Arctan(a) => eval(a, base, curr).atan(),
            BuiltinFn::Cos(a) => eval(a, base, curr).cos(),
            BuiltinFn::Exp(a) => eval(a, base, curr).exp(),
            BuiltinFn::Inf => f64::INFINITY,
            BuiltinFn::Int(a) => eval(a, base, curr).trunc(),
            BuiltinFn::Ln(a) => eval(a, base, curr).ln(),
            BuiltinFn::Log10(a) => eval(a, base, curr).log10(),
            BuiltinFn::Max(a, b) => {
                let a = eval(a, base, curr);
                let b = eval(b, base, curr);
                a.max(b)
            }
            BuiltinFn::Min(a, b) => {
                let a = eval(a, base, curr);
                let b = eval(b, base, curr);
                a.min(b)
            }
            BuiltinFn::Pi => std::f64::consts::PI,
            BuiltinFn::SafeDiv(a, b, default) => {
                let a = eval(a, base, curr);
                let b = eval(b, base, curr);
                if b != 0.0 {
                    a / b
                } else if let Some(default) = default {
                    eval(default, base, curr)
                } else {
                    0.0
                }
            }
            BuiltinFn::Sin(a) => eval(a, base, curr).sin(),
            BuiltinFn::Sqrt(a) => eval(a, base, curr).sqrt(),
            BuiltinFn::Tan(a) => eval(a, base, curr).tan(),
        },
        Expr::Op2(op, l, r) => {
            let l = eval(l, base, curr);
            let r = eval(r, base, curr);
            match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Exp => l.powf(r),
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                BinaryOp::Mod => l.rem_euclid(r),
                BinaryOp::Gt => (l > r) as i8 as f64,
                BinaryOp::Gte => (l >= r) as i8 as f64,
                BinaryOp::Lt => (l < r) as i8 as f64,
                BinaryOp::Lte => (l <= r) as i8 as f64,
                BinaryOp::Eq => approx_eq!(f64, l, r) as i8 as f64,
                BinaryOp::Neq => !approx_eq!(f64, l, r) as i8 as f64,
                BinaryOp::And => (is_truthy(l) && is_truthy(r)) as i8 as f64,
                BinaryOp::Or => (is_truthy(l) || is_truthy(r)) as i8 as f64,
            }
        }
        Expr::Op1(UnaryOp::Not, operand) => {
            let operand = eval(operand, base, curr);
            (!is_truthy(operand)) as i8 as f64
        }
        Expr::Op1(_, operand) => eval(operand, base, curr),
        Expr::If(cond, t, f) => {
            if is_truthy(eval(cond, base, curr)) {
                eval(t, base, curr)
            } else {
                eval(f, base, curr)
            }
        }
        Expr::AssignCurr(off, value) => {
            let value = eval(value, base, curr);
            curr[base + *off] = value;
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_arithmetic() {
        let mut curr = vec![0.0, 3.0, 4.0];
        let expr = Expr::Op2(
            BinaryOp::Add,
            Box::new(Expr::Var(0)),
            Box::new(Expr::Op2(
                BinaryOp::Mul,
                Box::new(Expr::Var(1)),
                Box::new(Expr::Const(2.0)),
            )),
        );
        assert_eq!(eval(&expr, 1, &mut curr), 11.0);
    }

    #[test]
    fn test_eval_if() {
        let mut curr = vec![0.0, -2.0];
        // if x < 0 then -x else x
        let expr = Expr::If(
            Box::new(Expr::Op2(
                BinaryOp::Lt,
                Box::new(Expr::Var(0)),
                Box::new(Expr::Const(0.0)),
            )),
            Box::new(Expr::Op2(
                BinaryOp::Sub,
                Box::new(Expr::Const(0.0)),
                Box::new(Expr::Var(0)),
            )),
            Box::new(Expr::Var(0)),
        );
        assert_eq!(eval(&expr, 1, &mut curr), 2.0);
    }

    #[test]
    fn test_eval_safediv() {
        let mut curr = vec![0.0];
        let div = |num: f64, den: f64| {
            Expr::App(BuiltinFn::SafeDiv(
                Box::new(Expr::Const(num)),
                Box::new(Expr::Const(den)),
                None,
            ))
        };
        assert_eq!(eval(&div(6.0, 3.0), 0, &mut curr), 2.0);
        assert_eq!(eval(&div(6.0, 0.0), 0, &mut curr), 0.0);
    }

    #[test]
    fn test_eval_assign() {
        let mut curr = vec![0.0, 0.0, 5.0];
        let expr = Expr::AssignCurr(0, Box::new(Expr::Var(1)));
        eval(&expr, 1, &mut curr);
        assert_eq!(curr[1], 5.0);
    }

    #[test]
    fn test_eval_time() {
        let mut curr = vec![7.5, 0.0];
        assert_eq!(eval(&Expr::Time, 1, &mut curr), 7.5);
    }
}
