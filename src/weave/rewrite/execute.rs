//! Unconditional call injection.

use super::{entry, load_args};
use crate::core::error::WeaveResult;
use crate::ir::{Body, Opcode};
use crate::weave::binder::{Binding, CallSite};

/// Call the candidate before the first instruction, discarding its result.
pub fn rewrite(body: &mut Body, binding: &Binding, site: &CallSite) -> WeaveResult<()> {
    let first = entry(body)?;
    let mut ops = load_args(&binding.args, site, None)?;
    ops.push(Opcode::Call(binding.candidate.method.clone()));
    if !binding.candidate.returns.is_void() {
        ops.push(Opcode::Pop);
    }
    log::trace!(
        "{}: execute {} ({} instructions)",
        site.display_name(),
        binding.candidate.method,
        ops.len()
    );
    body.insert_all_before(first, ops)?;
    Ok(())
}
