// This module wraps a call site body in an acquire/release scope. The candidate is
// called before the original first instruction and its handle is kept in a fresh
// local. Everything from the original entry to the end of the body becomes a try region,
// followed by a finally handler that disposes the handle and a shared exit sequence.
// Every ret of the protected body is turned into a leave to that exit, staging the
// return value through a second local when the call site returns one.
//
//     <args>
//     call Factory
//     stloc handle
//   entry:                          try {
//     <original body, ret -> [stloc value] leave exit>
//   release:                        } finally {
//     ldloc handle                    class handles are null-checked,
//     brfalse done                    struct handles are disposed in place
//     ldloc handle                    through ldloca
//     callvirt IDisposable::dispose()
//   done:
//     endfinally                    }
//   exit:
//     [ldloc value]
//     ret

//! Acquire/release scope wrapping.

use super::{entry, load_args};
use crate::core::error::WeaveResult;
use crate::ir::{Body, ExceptionRegion, InstId, MethodRef, Opcode, RegionKind, TypeHierarchy};
use crate::weave::binder::{Binding, CallSite};

pub fn rewrite(body: &mut Body, binding: &Binding, site: &CallSite, hierarchy: &TypeHierarchy) -> WeaveResult<()> {
    let first = entry(body)?;
    let handle_ty = binding.candidate.returns.clone();
    let by_value = hierarchy.is_value_type(&handle_ty);
    let handle = body.add_local(handle_ty, None)?;

    let mut acquire = load_args(&binding.args, site, None)?;
    acquire.push(Opcode::Call(binding.candidate.method.clone()));
    acquire.push(Opcode::StLoc(handle));
    body.insert_all_before(first, acquire)?;

    let returns: Vec<InstId> = body
        .iter()
        .filter(|(_, op)| matches!(op, Opcode::Ret))
        .map(|(id, _)| id)
        .collect();
    let value = if site.return_type.is_void() {
        None
    } else {
        Some(body.add_local(site.return_type.clone(), None)?)
    };

    let release = if by_value {
        let start = body.push(Opcode::LdLocA(handle));
        body.push(Opcode::CallVirt(MethodRef::dispose()));
        body.push(Opcode::EndFinally);
        start
    } else {
        let start = body.push(Opcode::LdLoc(handle));
        let skip = body.push(Opcode::Nop);
        body.push(Opcode::LdLoc(handle));
        body.push(Opcode::CallVirt(MethodRef::dispose()));
        let done = body.push(Opcode::EndFinally);
        body.replace(skip, Opcode::BrFalse(done))?;
        start
    };

    let exit = match value {
        Some(local) => {
            let exit = body.push(Opcode::LdLoc(local));
            body.push(Opcode::Ret);
            exit
        }
        None => body.push(Opcode::Ret),
    };

    for ret in &returns {
        match value {
            Some(local) => {
                body.replace(*ret, Opcode::StLoc(local))?;
                body.insert_after(*ret, Opcode::Leave(exit))?;
            }
            None => {
                body.replace(*ret, Opcode::Leave(exit))?;
            }
        }
    }

    // Regions that ran to the end of the body now stop where the release
    // handler begins.
    for region in body.regions_mut() {
        if region.try_end.is_none() {
            region.try_end = Some(release);
        }
        if region.handler_end.is_none() {
            region.handler_end = Some(release);
        }
    }
    body.add_region(ExceptionRegion {
        kind: RegionKind::Finally,
        try_start: first,
        try_end: Some(release),
        handler_start: release,
        handler_end: Some(exit),
    })?;

    log::trace!(
        "{}: scope {} ({} handle, {} returns rerouted)",
        site.display_name(),
        binding.candidate.method,
        if by_value { "struct" } else { "class" },
        returns.len()
    );
    Ok(())
}
