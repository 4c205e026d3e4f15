// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

#[derive(PartialEq, Clone, Debug)]
pub enum BuiltinFn<Expr> {
    Abs(Box<Expr>),
    Arccos(Box<Expr>),
    Arcsin(Box<Expr>),
    Arctan(Box<Expr>),
    Cos(Box<Expr>),
    Exp(Box<Expr>),
    Inf,
    Int(Box<Expr>),
    Ln(Box<Expr>),
    Log10(Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
    Pi,
    SafeDiv(Box<Expr>, Box<Expr>, Option<Box<Expr>>),
    Sin(Box<Expr>),
    Sqrt(Box<Expr>),
    Tan(Box<Expr>),
}

pub fn is_builtin_fn(name: &str) -> bool {
    matches!(
        name,
        "abs"
            | "arccos"
            | "arcsin"
            | "arctan"
            | "cos"
            | "exp"
            | "inf"
            | "int"
            | "ln"
            | "log10"
            | "max"
            | "min"
            | "pi"
            | "safediv"
            | "sin"
            | "sqrt"
            | "tan"
    )
}

#[test]
fn test_is_builtin_fn() {
    assert!(is_builtin_fn("min"));
    assert!(!is_builtin_fn("minz"));
    assert!(is_builtin_fn("log10"));
}
