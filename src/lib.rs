//! ilweave - marker-driven weaving of stack-machine method bodies.
//!
//! Methods annotated with markers get calls injected into their bodies at
//! build time. Each marker type declares injectable candidates; the weaver
//! picks the most specific candidate whose parameters can all be sourced
//! from the annotated method (marker literals, the method's own arguments
//! and fields, the receiver, the method name) and rewrites the body for the
//! marker's kind: a plain call, a boolean guard with early return, or an
//! acquire/release scope protected by a finally region.
//!
//! # Primary Usage
//!
//! ```ignore
//! use ilweave::{weave, Diagnostics, Module};
//!
//! let mut module = Module::parse(&text)?;
//! let mut diagnostics = Diagnostics::new();
//! let summary = weave(&mut module, &mut diagnostics);
//! println!("{}", module);
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - Module model, text format reader and printer, type hierarchy
//! - [`weave`] - Descriptors, candidate registry, binder, rewriters, driver
//! - [`core`] - Errors, diagnostics channel, configuration
//! - [`vm`] - Reference interpreter used to check woven output by behavior

pub mod core;
pub mod ir;
pub mod vm;
pub mod weave;

pub use crate::core::{
    DeclarationError, Diagnostic, DiagnosticSink, Diagnostics, ParseError, Severity, WeaveConfig, WeaveError,
};
pub use crate::ir::{Body, MethodRef, Module, Opcode, TypeHierarchy, TypeRef};
pub use crate::vm::{Value, Vm, VmError};
pub use crate::weave::{weave, weave_with, MarkerKind, ReturnShape, ReturnShapeTable, WeaveSummary, Weaver};
