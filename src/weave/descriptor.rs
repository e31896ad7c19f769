//! Marker descriptors.
//!
//! A marker application is reduced once, up front, to a [`MarkerDescriptor`]:
//! its kind, the explicit target name if one was given, and the literal
//! arguments bound to the marker's constructor parameters.

use std::fmt;

use crate::core::diagnostics::Reporter;
use crate::ir::{well_known as wk, Literal, MarkerApplication, Module, TypeHierarchy, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// Unconditional call before the original body.
    Execute,
    /// Acquire a disposable handle and release it on every exit path.
    Scope,
    /// Boolean guard with a synthesized early return.
    ReturnCondition,
}

impl MarkerKind {
    /// Kind of a marker type, found by walking its bases to one of the three
    /// marker roots. `None` for types that are not markers.
    pub fn classify(hierarchy: &TypeHierarchy, marker: &TypeRef) -> Option<Self> {
        if hierarchy.is_assignable_to_name(marker, wk::EXECUTE_MARKER) {
            Some(MarkerKind::Execute)
        } else if hierarchy.is_assignable_to_name(marker, wk::SCOPE_MARKER) {
            Some(MarkerKind::Scope)
        } else if hierarchy.is_assignable_to_name(marker, wk::RETURN_CONDITION_MARKER) {
            Some(MarkerKind::ReturnCondition)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MarkerKind::Execute => "Execute",
            MarkerKind::Scope => "Scope",
            MarkerKind::ReturnCondition => "ReturnCondition",
        }
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerDescriptor {
    pub marker_type: TypeRef,
    pub kind: MarkerKind,
    /// Only candidates with this name may be selected.
    pub target: Option<String>,
    /// Constructor-bound literals in declaration order.
    pub literals: Vec<(String, Literal)>,
}

impl MarkerDescriptor {
    pub fn literal(&self, name: &str) -> Option<&Literal> {
        self.literals
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }
}

/// Build the descriptor of one marker application.
///
/// Returns `None` when the application's type is not a marker. Malformed
/// arguments are reported as warnings and leave the literal list empty.
pub fn extract(
    module: &Module,
    hierarchy: &TypeHierarchy,
    app: &MarkerApplication,
    reporter: &mut Reporter<'_>,
) -> Option<MarkerDescriptor> {
    if !hierarchy.contains(&app.marker) {
        reporter.debug(format!("Ignoring application of unknown type {}", app.marker));
        return None;
    }
    let kind = MarkerKind::classify(hierarchy, &app.marker)?;

    let mut target = None;
    for (name, value) in &app.properties {
        match (name.as_str(), value) {
            (wk::TARGET_PROPERTY, Literal::Str(method)) => target = Some(method.clone()),
            (wk::TARGET_PROPERTY, other) => reporter.warning(format!(
                "@{}: property '{}' must be a string, found {}",
                app.marker,
                wk::TARGET_PROPERTY,
                other.type_name()
            )),
            (other, _) => reporter.warning(format!(
                "@{}: unknown property '{}'",
                app.marker, other
            )),
        }
    }

    let ctor = module
        .find_type(&app.marker.name)
        .map(|ty| ty.ctor.as_slice())
        .unwrap_or_default();

    let mut literals = Vec::new();
    if ctor.len() != app.args.len() {
        reporter.warning(format!(
            "@{}: expected {} constructor arguments, found {}",
            app.marker,
            ctor.len(),
            app.args.len()
        ));
    } else if let Some((param, arg)) = ctor
        .iter()
        .zip(&app.args)
        .find(|(param, arg)| !hierarchy.is_assignable(&arg.type_ref(), &param.ty))
    {
        reporter.warning(format!(
            "@{}: argument {} does not match constructor parameter {} {}",
            app.marker, arg, param.ty, param.name
        ));
    } else {
        literals = ctor
            .iter()
            .zip(&app.args)
            .filter(|(param, _)| param.bound)
            .map(|(param, arg)| (param.bound_name().to_string(), arg.clone()))
            .collect();
    }

    log::trace!(
        "@{} -> {} marker, target {:?}, {} literals",
        app.marker,
        kind,
        target,
        literals.len()
    );
    Some(MarkerDescriptor {
        marker_type: app.marker.clone(),
        kind,
        target,
        literals,
    })
}
