//! Weaving run configuration.

use crate::weave::return_shape::{ReturnShape, ReturnShapeTable};

/// Options for one weaving run.
#[derive(Debug, Clone, Default)]
pub struct WeaveConfig {
    /// Forward debug-level diagnostics (match misses, candidate discovery) to
    /// the sink. They are always sent to the `log` facade.
    pub record_debug: bool,

    /// Strategies used to synthesize the early-return value of a
    /// return-condition guard.
    pub return_shapes: ReturnShapeTable,
}

impl WeaveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, record_debug: bool) -> Self {
        self.record_debug = record_debug;
        self
    }

    /// Register an additional return shape. Later registrations win over
    /// earlier ones and over the built-in shapes.
    pub fn with_return_shape(mut self, shape: ReturnShape) -> Self {
        self.return_shapes.register(shape);
        self
    }
}
