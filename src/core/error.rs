// This module defines the error types of the weaver using the thiserror crate for
// idiomatic Rust error handling. WeaveError covers structural failures that abort a
// weaving run: malformed method bodies, stale instruction references, unresolved
// declaring types and failures wrapped with the call site they happened in.
// DeclarationError describes injectable candidates that are declared in a way the
// weaver cannot use; those are reported and the candidate is excluded, they never
// abort the run. ParseError is produced by the textual module reader.

//! Error types for the weaver.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use crate::ir::InstId;

/// Structural failure while weaving. Aborts the remainder of the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeaveError {
    #[error("Instruction {0} is not part of the body")]
    DanglingInstruction(InstId),

    #[error("Malformed method body: {reason}")]
    MalformedBody { reason: String },

    #[error("Method body is empty")]
    EmptyBody,

    #[error("Type not found: {name}")]
    TypeNotFound { name: String },

    #[error("Method location {type_path:?}#{method} does not exist")]
    MethodNotFound { type_path: Vec<usize>, method: usize },

    #[error("While weaving {method}")]
    CallSite {
        method: String,
        #[source]
        source: Box<WeaveError>,
    },
}

impl WeaveError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        WeaveError::MalformedBody {
            reason: reason.into(),
        }
    }

    /// Attach the call site a failure happened in.
    pub fn at(self, method: impl Into<String>) -> Self {
        WeaveError::CallSite {
            method: method.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for weaving operations.
pub type WeaveResult<T> = Result<T, WeaveError>;

/// An injectable candidate that cannot be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    #[error("Injection target must be static: {method}")]
    NotStatic { method: String },

    #[error("{kind} injection target must return {expected}, found {found}: {method}")]
    WrongReturnType {
        method: String,
        kind: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("At most one #result parameter is allowed: {method}")]
    MultipleResults { method: String },

    #[error("#result parameter '{param}' must be declared out: {method}")]
    ResultNotOut { method: String, param: String },

    #[error("#result parameters are only allowed on return-condition targets: {method}")]
    MisplacedResult { method: String },
}

/// Error produced by the textual module reader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Undefined label '{label}' in method {method}")]
    UndefinedLabel { method: String, label: String },

    #[error("Label '{label}' in method {method} is not followed by an instruction")]
    DanglingLabel { method: String, label: String },

    #[error("Unknown {what} '{name}' in method {method}")]
    UnknownName {
        method: String,
        what: &'static str,
        name: String,
    },
}

pub type ParseResult<T> = Result<T, ParseError>;
