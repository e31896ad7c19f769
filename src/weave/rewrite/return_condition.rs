//! Boolean guard with a synthesized early return.
//!
//! ```text
//!     <args> [ldloca result]
//!     call Guard
//!     brtrue body
//!     <early-return value>
//!     ret
//! body:
//!     [nop]            ; only if a region starts at the original entry
//!     <original body>
//! ```

use super::{entry, load_args};
use crate::core::diagnostics::Reporter;
use crate::core::error::WeaveResult;
use crate::ir::{Body, LocalId, Opcode, TypeHierarchy, TypeRef};
use crate::weave::binder::{Binding, CallSite};
use crate::weave::return_shape::{ReturnShapeTable, ShapeInput};

pub fn rewrite(
    body: &mut Body,
    binding: &Binding,
    site: &CallSite,
    shapes: &ReturnShapeTable,
    hierarchy: &TypeHierarchy,
    reporter: &mut Reporter<'_>,
) -> WeaveResult<()> {
    let first = entry(body)?;
    let result = binding
        .candidate
        .result_spec()
        .map(|spec| body.add_local(spec.ty.clone(), None).map(|local| (local, spec.ty.clone())))
        .transpose()?;

    // A region must not be entered by a branch from outside, so the guard
    // jumps to a nop in front of it instead.
    let region_at_entry = body
        .regions()
        .iter()
        .any(|r| r.try_start == first || r.handler_start == first);
    let boundary = if region_at_entry {
        body.insert_before(first, Opcode::Nop)?
    } else {
        first
    };

    let mut ops = load_args(&binding.args, site, result.as_ref().map(|(local, _)| *local))?;
    ops.push(Opcode::Call(binding.candidate.method.clone()));
    ops.push(Opcode::BrTrue(boundary));
    ops.extend(early_return(site, result.as_ref(), shapes, hierarchy, reporter));
    ops.push(Opcode::Ret);

    log::trace!(
        "{}: guard {} (boundary nop: {})",
        site.display_name(),
        binding.candidate.method,
        region_at_entry
    );
    body.insert_all_before(boundary, ops)?;
    Ok(())
}

/// Value returned when the guard fails: the out-result if it fits the
/// return type, else the matching return shape, else the type's default.
fn early_return(
    site: &CallSite,
    result: Option<&(LocalId, TypeRef)>,
    shapes: &ReturnShapeTable,
    hierarchy: &TypeHierarchy,
    reporter: &mut Reporter<'_>,
) -> Vec<Opcode> {
    let ret = &site.return_type;
    if let Some((local, ty)) = result {
        if hierarchy.is_assignable(ty, ret) {
            return vec![Opcode::LdLoc(*local)];
        }
    }
    match shapes.select(ret) {
        Some(shape) => {
            let input = ShapeInput {
                return_type: ret,
                result: result.map(|(local, ty)| (*local, ty)),
                hierarchy,
            };
            shape.emit(&input)
        }
        None => {
            reporter.debug(format!(
                "{}: no return shape for {}, returning its default",
                site.display_name(),
                ret
            ));
            vec![Opcode::LdDefault(ret.clone())]
        }
    }
}
