//! Early-return value synthesis for return-condition guards.
//!
//! When a guard fails and its out-result cannot be returned directly, the
//! value the call site returns is produced by the first [`ReturnShape`]
//! matching the declared return type. The table is ordered; shapes
//! registered later are tried first, so a host can override the built-ins.

use std::fmt;

use crate::ir::{well_known as wk, LocalId, MethodRef, Opcode, TypeHierarchy, TypeRef};

/// What a shape may draw on when emitting its instructions.
pub struct ShapeInput<'a> {
    pub return_type: &'a TypeRef,
    /// The guard's out-result local and its type, if the candidate has one.
    pub result: Option<(LocalId, &'a TypeRef)>,
    pub hierarchy: &'a TypeHierarchy,
}

impl ShapeInput<'_> {
    /// Load the out-result if it fits `ty`, otherwise the default of `ty`.
    pub fn result_or_default(&self, ty: &TypeRef) -> Opcode {
        match self.result {
            Some((local, result_ty)) if self.hierarchy.is_assignable(result_ty, ty) => Opcode::LdLoc(local),
            _ => Opcode::LdDefault(ty.clone()),
        }
    }
}

pub type ShapeMatcher = fn(&TypeRef) -> bool;
pub type ShapeEmitter = fn(&ShapeInput<'_>) -> Vec<Opcode>;

#[derive(Clone, Copy)]
pub struct ReturnShape {
    pub name: &'static str,
    matches: ShapeMatcher,
    emit: ShapeEmitter,
}

impl ReturnShape {
    pub fn new(name: &'static str, matches: ShapeMatcher, emit: ShapeEmitter) -> Self {
        Self { name, matches, emit }
    }

    pub fn matches(&self, ty: &TypeRef) -> bool {
        (self.matches)(ty)
    }

    /// Instructions leaving the early-return value on the stack.
    pub fn emit(&self, input: &ShapeInput<'_>) -> Vec<Opcode> {
        (self.emit)(input)
    }
}

impl fmt::Debug for ReturnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnShape").field("name", &self.name).finish()
    }
}

fn completed(owner: &str) -> Vec<Opcode> {
    vec![Opcode::Call(MethodRef::new(owner, "get_completed", Vec::new()))]
}

fn from_result(owner: &str, input: &ShapeInput<'_>) -> Vec<Opcode> {
    let Some(wrapped) = input.return_type.args.first() else {
        return vec![Opcode::LdDefault(input.return_type.clone())];
    };
    let factory = MethodRef::new(owner, "from_result", vec![wrapped.clone()]).with_generic_args(vec![wrapped.clone()]);
    vec![input.result_or_default(wrapped), Opcode::Call(factory)]
}

fn is_generic_of(ty: &TypeRef, name: &str) -> bool {
    ty.name == name && ty.args.len() == 1
}

#[derive(Debug, Clone)]
pub struct ReturnShapeTable {
    shapes: Vec<ReturnShape>,
}

impl ReturnShapeTable {
    pub fn empty() -> Self {
        Self { shapes: Vec::new() }
    }

    pub fn register(&mut self, shape: ReturnShape) {
        self.shapes.push(shape);
    }

    pub fn select(&self, ty: &TypeRef) -> Option<&ReturnShape> {
        self.shapes.iter().rev().find(|shape| shape.matches(ty))
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// `void`, `Task`, `ValueTask`, `Task<T>` and `ValueTask<T>`.
impl Default for ReturnShapeTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register(ReturnShape::new("void", |ty| ty.is_void(), |_| Vec::new()));
        table.register(ReturnShape::new(
            "Task",
            |ty| ty.is(wk::TASK),
            |_| completed(wk::TASK),
        ));
        table.register(ReturnShape::new(
            "ValueTask",
            |ty| ty.is(wk::VALUE_TASK),
            |_| completed(wk::VALUE_TASK),
        ));
        table.register(ReturnShape::new(
            "Task<T>",
            |ty| is_generic_of(ty, wk::TASK),
            |input| from_result(wk::TASK, input),
        ));
        table.register(ReturnShape::new(
            "ValueTask<T>",
            |ty| is_generic_of(ty, wk::VALUE_TASK),
            |input| from_result(wk::VALUE_TASK, input),
        ));
        table
    }
}
