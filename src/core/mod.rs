// This module serves as the hub for the weaver's ambient infrastructure: error types
// (structural weave failures, candidate declaration errors, parse errors), the leveled
// diagnostics channel with its collecting sink and reporter front end, and the run
// configuration. Everything in here is shared by the module model, the weaving
// pipeline and the interpreter.

//! Core infrastructure shared by the module model, the weaver and the
//! interpreter.

pub mod config;
pub mod diagnostics;
pub mod error;

pub use config::WeaveConfig;
pub use diagnostics::{Diagnostic, DiagnosticSink, Diagnostics, Reporter, Severity};
pub use error::{DeclarationError, ParseError, ParseResult, WeaveError, WeaveResult};
