// Copyright 2021 The Model Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;
use std::{error, result};

use lazy_static::lazy_static;
use regex::Regex;

pub type Ident = String;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    NoError, // will never be produced
    DoesNotExist,
    InvalidToken,
    UnrecognizedEof,
    UnrecognizedToken,
    ExtraToken,
    ExpectedNumber,
    EmptyEquation,
    BadAssignTarget,
    UnknownBuiltin,
    BadBuiltinArgs,
    UnknownDependency,
    DuplicateVariable,
    DuplicateTemplate,
    BadScopeBinding,
    IdentifierCollision,
    MappingFailed,
    DuplicateMapping,
    NotMapped,
    FixedMapped,
    CyclicAssignment,
    NotSimulatable,
    BadConfig,
    ConvergenceFailed,
    HistorianFull,
    Generic,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            DoesNotExist => "does_not_exist",
            InvalidToken => "invalid_token",
            UnrecognizedEof => "unrecognized_eof",
            UnrecognizedToken => "unrecognized_token",
            ExtraToken => "extra_token",
            ExpectedNumber => "expected_number",
            EmptyEquation => "empty_equation",
            BadAssignTarget => "bad_assign_target",
            UnknownBuiltin => "unknown_builtin",
            BadBuiltinArgs => "bad_builtin_args",
            UnknownDependency => "unknown_dependency",
            DuplicateVariable => "duplicate_variable",
            DuplicateTemplate => "duplicate_template",
            BadScopeBinding => "bad_scope_binding",
            IdentifierCollision => "identifier_collision",
            MappingFailed => "mapping_failed",
            DuplicateMapping => "duplicate_mapping",
            NotMapped => "not_mapped",
            FixedMapped => "fixed_mapped",
            CyclicAssignment => "cyclic_assignment",
            NotSimulatable => "not_simulatable",
            BadConfig => "bad_config",
            ConvergenceFailed => "convergence_failed",
            HistorianFull => "historian_full",
            Generic => "generic",
        };

        write!(f, "{}", name)
    }
}

/// An error localized to a single equation body; `location` is a byte
/// offset into the statement's source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EquationError {
    pub location: usize,
    pub code: ErrorCode,
}

impl fmt::Display for EquationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.location, self.code)
    }
}

#[macro_export]
macro_rules! eqn_err(
    ($code:tt, $off:expr) => {{
        use $crate::common::{EquationError, ErrorCode};
        Err(EquationError{ location: $off, code: ErrorCode::$code})
    }}
);

#[macro_export]
macro_rules! model_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Model, ErrorCode::$code, Some($str)))
    }}
);

#[macro_export]
macro_rules! sim_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(
            ErrorKind::Simulation,
            ErrorCode::$code,
            Some($str),
        ))
    }};
    ($code:tt) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Simulation, ErrorCode::$code, None))
    }};
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Model,
    Simulation,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub(crate) details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
        }
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }
}

impl From<EquationError> for Error {
    fn from(err: EquationError) -> Self {
        Error {
            kind: ErrorKind::Variable,
            code: err.code,
            details: Some(format!("at offset {}", err.location)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Model => "ModelError",
            ErrorKind::Simulation => "SimulationError",
            ErrorKind::Variable => "VariableError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;
pub type EquationResult<T> = result::Result<T, EquationError>;

/// Normalizes a variable tag or instance path: trims, folds interior
/// whitespace to underscores, lowercases.
pub fn canonicalize(name: &str) -> String {
    let name = name.trim();

    lazy_static! {
        static ref UNDERSCORE_RE: Regex = Regex::new(r"\\n|\\r|\n|\r| |\x{00A0}").unwrap();
    }
    let name = UNDERSCORE_RE.replace_all(name, "_");

    name.to_lowercase()
}

#[test]
fn test_canonicalize() {
    assert!(canonicalize("   a b") == "a_b");
    assert!(canonicalize("Body1.Thermal") == "body1.thermal");
    assert!(canonicalize("t1") == "t1");
}
