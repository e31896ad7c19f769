//! Body rewriters, one per marker kind.
//!
//! Each rewriter receives the call site's current body and the selected
//! [`Binding`](super::binder::Binding) and splices its code in place. All of
//! them insert before the first instruction, so branches that targeted the
//! original entry keep doing so.

pub mod execute;
pub mod return_condition;
pub mod scope;

use super::binder::{ArgSource, CallSite};
use crate::core::error::{WeaveError, WeaveResult};
use crate::ir::{Body, InstId, LocalId, Opcode};

/// Instructions loading every bound argument, in parameter order.
/// `result` is the local receiving the out-result, when there is one.
pub fn load_args(args: &[ArgSource], site: &CallSite, result: Option<LocalId>) -> WeaveResult<Vec<Opcode>> {
    let mut ops = Vec::with_capacity(args.len() + 1);
    for arg in args {
        match arg {
            ArgSource::Literal(value) => ops.push(Opcode::Const(value.clone())),
            ArgSource::CallerParam(index) => ops.push(Opcode::LdArg(*index)),
            ArgSource::InstanceField(field) => {
                ops.push(Opcode::LdThis);
                ops.push(Opcode::LdFld(field.clone()));
            }
            ArgSource::StaticField(field) => ops.push(Opcode::LdSFld(field.clone())),
            ArgSource::FieldAddress(field) => {
                ops.push(Opcode::LdThis);
                ops.push(Opcode::LdFldA(field.clone()));
            }
            ArgSource::StaticFieldAddress(field) => ops.push(Opcode::LdSFldA(field.clone())),
            ArgSource::Receiver => ops.push(Opcode::LdThis),
            ArgSource::MethodName(name) => ops.push(Opcode::Const(crate::ir::Literal::Str(name.clone()))),
            ArgSource::ResultOut(_) => match result {
                Some(local) => ops.push(Opcode::LdLocA(local)),
                None => {
                    return Err(WeaveError::malformed(format!(
                        "out-result argument without a result local in {}",
                        site.display_name()
                    )))
                }
            },
        }
    }
    Ok(ops)
}

pub(crate) fn entry(body: &Body) -> WeaveResult<InstId> {
    body.first().ok_or(WeaveError::EmptyBody)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FieldRef, Literal, TypeRef};

    fn site() -> CallSite {
        CallSite {
            declaring_type: TypeRef::named("Widget"),
            method_name: "go".to_string(),
            is_static: false,
            params: Vec::new(),
            fields: Vec::new(),
            return_type: TypeRef::void(),
        }
    }

    #[test]
    fn test_load_sequences() {
        let args = vec![
            ArgSource::Literal(Literal::Int(1)),
            ArgSource::CallerParam(2),
            ArgSource::InstanceField(FieldRef::new("Widget", "a")),
            ArgSource::StaticField(FieldRef::new("Widget", "b")),
            ArgSource::FieldAddress(FieldRef::new("Widget", "c")),
            ArgSource::StaticFieldAddress(FieldRef::new("Widget", "d")),
            ArgSource::Receiver,
            ArgSource::MethodName("go".to_string()),
            ArgSource::ResultOut(TypeRef::named("int")),
        ];
        let local = LocalId::from_index(4);
        let ops = load_args(&args, &site(), Some(local)).unwrap();
        assert_eq!(
            ops,
            vec![
                Opcode::Const(Literal::Int(1)),
                Opcode::LdArg(2),
                Opcode::LdThis,
                Opcode::LdFld(FieldRef::new("Widget", "a")),
                Opcode::LdSFld(FieldRef::new("Widget", "b")),
                Opcode::LdThis,
                Opcode::LdFldA(FieldRef::new("Widget", "c")),
                Opcode::LdSFldA(FieldRef::new("Widget", "d")),
                Opcode::LdThis,
                Opcode::Const(Literal::Str("go".to_string())),
                Opcode::LdLocA(local),
            ]
        );
    }

    #[test]
    fn test_result_without_local_is_rejected() {
        let args = vec![ArgSource::ResultOut(TypeRef::named("int"))];
        assert!(load_args(&args, &site(), None).is_err());
    }
}
