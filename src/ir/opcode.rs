//! Instruction set of method bodies.

use std::fmt;

use super::body::{InstId, LocalId};
use super::{well_known, Literal, TypeRef};

/// Reference to a method: declaring type, name, parameter types and the
/// generic arguments of a generic method instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub generic_args: Vec<TypeRef>,
    pub params: Vec<TypeRef>,
}

impl MethodRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, params: Vec<TypeRef>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            generic_args: Vec::new(),
            params,
        }
    }

    pub fn with_generic_args(mut self, args: Vec<TypeRef>) -> Self {
        self.generic_args = args;
        self
    }

    /// `IDisposable::dispose()`
    pub fn dispose() -> Self {
        Self::new(well_known::DISPOSABLE, well_known::DISPOSE, Vec::new())
    }

    /// Lookup key without the signature: `Owner::name`.
    pub fn short_key(&self) -> String {
        format!("{}::{}", self.owner, self.name)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)?;
        if !self.generic_args.is_empty() {
            f.write_str("<")?;
            for (i, arg) in self.generic_args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", arg)?;
            }
            f.write_str(">")?;
        }
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
}

impl FieldRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    Nop,
    /// Load a declared parameter (receiver excluded).
    LdArg(u16),
    /// Load the receiver of an instance method.
    LdThis,
    LdLoc(LocalId),
    StLoc(LocalId),
    /// Load the address of a local.
    LdLocA(LocalId),
    /// Load through an address.
    LdInd,
    /// Store through an address: pops value, then address.
    StInd,
    Const(Literal),
    LdNull,
    /// Default value of a type: zero for primitives, null otherwise.
    LdDefault(TypeRef),
    LdFld(FieldRef),
    StFld(FieldRef),
    LdSFld(FieldRef),
    StSFld(FieldRef),
    /// Address of an instance field: pops the object.
    LdFldA(FieldRef),
    /// Address of a static field.
    LdSFldA(FieldRef),
    NewObj(TypeRef),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Ceq,
    Cgt,
    Clt,
    Br(InstId),
    BrTrue(InstId),
    BrFalse(InstId),
    /// Exit a protected region, running the finally handlers left behind.
    Leave(InstId),
    EndFinally,
    Throw,
    Ret,
    Pop,
    Dup,
    Call(MethodRef),
    /// Dispatch on the runtime type of the receiver.
    CallVirt(MethodRef),
}

impl Opcode {
    pub fn mnemonic(&self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "nop",
            LdArg(_) => "ldarg",
            LdThis => "ldthis",
            LdLoc(_) => "ldloc",
            StLoc(_) => "stloc",
            LdLocA(_) => "ldloca",
            LdInd => "ldind",
            StInd => "stind",
            Const(Literal::Int(_)) => "ldc.i4",
            Const(Literal::Long(_)) => "ldc.i8",
            Const(Literal::ULong(_)) => "ldc.u8",
            Const(Literal::Float(_)) => "ldc.r4",
            Const(Literal::Double(_)) => "ldc.r8",
            Const(Literal::Str(_)) => "ldstr",
            Const(Literal::Bool(_)) => "ldc.bool",
            LdNull => "ldnull",
            LdDefault(_) => "lddefault",
            LdFld(_) => "ldfld",
            StFld(_) => "stfld",
            LdSFld(_) => "ldsfld",
            StSFld(_) => "stsfld",
            LdFldA(_) => "ldflda",
            LdSFldA(_) => "ldsflda",
            NewObj(_) => "newobj",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Rem => "rem",
            Ceq => "ceq",
            Cgt => "cgt",
            Clt => "clt",
            Br(_) => "br",
            BrTrue(_) => "brtrue",
            BrFalse(_) => "brfalse",
            Leave(_) => "leave",
            EndFinally => "endfinally",
            Throw => "throw",
            Ret => "ret",
            Pop => "pop",
            Dup => "dup",
            Call(_) => "call",
            CallVirt(_) => "callvirt",
        }
    }

    pub fn branch_target(&self) -> Option<InstId> {
        match self {
            Opcode::Br(t) | Opcode::BrTrue(t) | Opcode::BrFalse(t) | Opcode::Leave(t) => Some(*t),
            _ => None,
        }
    }

    pub fn local(&self) -> Option<LocalId> {
        match self {
            Opcode::LdLoc(l) | Opcode::StLoc(l) | Opcode::LdLocA(l) => Some(*l),
            _ => None,
        }
    }

    /// Control never falls through to the next instruction.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Opcode::Br(_) | Opcode::Leave(_) | Opcode::EndFinally | Opcode::Throw | Opcode::Ret
        )
    }
}

/// Context-free rendering: locals and arguments by index, branch targets by
/// instruction id. The module printer renders names and labels instead.
impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Opcode::*;
        let m = self.mnemonic();
        match self {
            LdArg(i) => write!(f, "{} {}", m, i),
            LdLoc(l) | StLoc(l) | LdLocA(l) => write!(f, "{} ${}", m, l.index()),
            Const(Literal::Int(v)) => write!(f, "{} {}", m, v),
            Const(Literal::Long(v)) => write!(f, "{} {}", m, v),
            Const(Literal::ULong(v)) => write!(f, "{} {}", m, v),
            Const(Literal::Float(v)) => write!(f, "{} {:?}", m, v),
            Const(Literal::Double(v)) => write!(f, "{} {:?}", m, v),
            Const(Literal::Str(s)) => write!(f, "{} {}", m, super::printer::quote(s)),
            Const(Literal::Bool(b)) => write!(f, "{} {}", m, b),
            LdDefault(t) | NewObj(t) => write!(f, "{} {}", m, t),
            LdFld(r) | StFld(r) | LdSFld(r) | StSFld(r) | LdFldA(r) | LdSFldA(r) => write!(f, "{} {}", m, r),
            Br(t) | BrTrue(t) | BrFalse(t) | Leave(t) => write!(f, "{} {}", m, t),
            Call(r) | CallVirt(r) => write!(f, "{} {}", m, r),
            _ => f.write_str(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_ref_display() {
        let mref = MethodRef::new("Task", "from_result", vec![TypeRef::named("int")])
            .with_generic_args(vec![TypeRef::named("int")]);
        assert_eq!(mref.to_string(), "Task::from_result<int>(int)");
        assert_eq!(mref.short_key(), "Task::from_result");
        assert_eq!(MethodRef::dispose().to_string(), "IDisposable::dispose()");
    }

    #[test]
    fn test_branch_queries() {
        let target = InstId::from_index(3);
        assert_eq!(Opcode::Leave(target).branch_target(), Some(target));
        assert_eq!(Opcode::Ret.branch_target(), None);
        assert!(Opcode::Throw.ends_flow());
        assert!(!Opcode::BrTrue(target).ends_flow());
        assert_eq!(Opcode::Const(Literal::Long(1)).mnemonic(), "ldc.i8");
    }
}
