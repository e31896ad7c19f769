// This module is a small reference interpreter for module bodies. It exists so that
// woven output can be checked by behavior rather than by instruction listings: the
// tests run a method before and after weaving and compare what it returns, what it
// throws and which host callbacks it reached. Methods without a body are served by
// native callbacks registered on the interpreter, looked up by their full signature
// first and by `Owner::name` second. Protected regions follow the usual rules: leave
// runs the finally handlers it crosses from the innermost outwards, an exception
// unwinds to the nearest catch running finally handlers on the way, and ret inside a
// protected region returns directly.

//! Reference interpreter for woven modules.

pub mod value;

pub use value::{Address, Object, ObjectRef, Value};

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;
use thiserror::Error;

use crate::core::error::WeaveError;
use crate::ir::{
    well_known as wk, Body, FieldRef, InstId, MethodDef, MethodRef, Module, Opcode, RegionKind, TypeDef,
    TypeKind, TypeRef,
};

/// Interpreted calls nest on the native stack; keep the cap well inside a
/// test thread's default stack.
const MAX_CALL_DEPTH: usize = 64;

#[derive(Error, Debug, Clone)]
pub enum VmError {
    /// An exception nobody caught.
    #[error("Unhandled exception: {0}")]
    Thrown(Value),

    #[error("Evaluation stack underflow in {0}")]
    StackUnderflow(String),

    #[error("Type mismatch in {method}: {message}")]
    TypeMismatch { method: String, message: String },

    #[error("Unknown method {0}")]
    UnknownMethod(String),

    #[error("Native method {0} is not bound")]
    UnboundNative(String),

    #[error("Unknown field {0}")]
    UnknownField(String),

    #[error("Unknown type {0}")]
    UnknownType(String),

    #[error("Execution fell off the end of {0}")]
    FellOffEnd(String),

    #[error("endfinally outside of a finally handler in {0}")]
    InvalidFinally(String),

    #[error("Call depth limit exceeded")]
    CallDepthExceeded,

    #[error(transparent)]
    Malformed(#[from] WeaveError),
}

pub type VmResult<T> = Result<T, VmError>;

/// Host implementation of a method without a body. Instance methods receive
/// the receiver as the first argument.
pub type Native = Box<dyn Fn(&[Value]) -> VmResult<Value>>;

pub struct Vm<'m> {
    module: &'m Module,
    natives: HashMap<String, Native>,
    /// Static fields live in shared cells so their address can be taken.
    statics: HashMap<String, Rc<RefCell<Value>>>,
    depth: usize,
}

impl<'m> Vm<'m> {
    /// Interpreter over `module` with the task factories already bound.
    pub fn new(module: &'m Module) -> Self {
        let mut vm = Self {
            module,
            natives: HashMap::new(),
            statics: HashMap::new(),
            depth: 0,
        };
        for owner in [wk::TASK, wk::VALUE_TASK] {
            vm.bind_native(format!("{}::get_completed", owner), |_| Ok(Value::Completed(None)));
            vm.bind_native(format!("{}::from_result", owner), |args| {
                let value = args.first().cloned().unwrap_or(Value::Null);
                Ok(Value::Completed(Some(Box::new(value))))
            });
        }
        vm
    }

    /// Bind a host callback under a full signature (`Owner::name(int)`) or
    /// under `Owner::name` for every overload.
    pub fn bind_native(
        &mut self,
        key: impl Into<String>,
        native: impl Fn(&[Value]) -> VmResult<Value> + 'static,
    ) -> &mut Self {
        self.natives.insert(key.into(), Box::new(native));
        self
    }

    /// Current value of a static field, its zero value if never stored.
    pub fn static_field(&self, owner: &str, name: &str) -> VmResult<Value> {
        let field = FieldRef::new(owner, name);
        self.load_static(&field)
    }

    pub fn set_static_field(&mut self, owner: &str, name: &str, value: Value) {
        let key = FieldRef::new(owner, name).to_string();
        match self.statics.get(&key) {
            Some(cell) => *cell.borrow_mut() = value,
            None => {
                self.statics.insert(key, Rc::new(RefCell::new(value)));
            }
        }
    }

    /// Allocate an instance of a declared type with zeroed fields.
    pub fn new_object(&self, ty: &str) -> VmResult<Value> {
        let mut fields = HashMap::new();
        let mut current = Some(
            self.module
                .find_type(ty)
                .ok_or_else(|| VmError::UnknownType(ty.to_string()))?,
        );
        let mut guard = 0;
        while let Some(def) = current {
            for field in def.fields.iter().filter(|f| !f.is_static) {
                fields
                    .entry(field.name.clone())
                    .or_insert_with(|| self.zero(&field.ty));
            }
            current = def.base.as_ref().and_then(|b| self.module.find_type(&b.name));
            guard += 1;
            if guard > 64 {
                break;
            }
        }
        Ok(Value::object(ty, fields))
    }

    /// Invoke the first method called `name` on `owner`. For instance
    /// methods `args[0]` is the receiver.
    pub fn invoke(&mut self, owner: &str, name: &str, args: Vec<Value>) -> VmResult<Value> {
        let module = self.module;
        let ty = module
            .find_type(owner)
            .ok_or_else(|| VmError::UnknownType(owner.to_string()))?;
        let method = ty
            .methods
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| VmError::UnknownMethod(format!("{}::{}", owner, name)))?;
        match &method.body {
            Some(_) => self.run_method(ty, method, args),
            None => self.call_native(&method.method_ref(owner), args),
        }
    }

    fn zero(&self, ty: &TypeRef) -> Value {
        let declared_struct = ty.args.is_empty()
            && self
                .module
                .find_type(&ty.name)
                .is_some_and(|def| def.kind == TypeKind::Struct);
        if declared_struct {
            if let Ok(value) = self.new_object(&ty.name) {
                return value;
            }
        }
        Value::zero(ty)
    }

    fn load_static(&self, field: &FieldRef) -> VmResult<Value> {
        if let Some(cell) = self.statics.get(&field.to_string()) {
            return Ok(cell.borrow().clone());
        }
        let ty = self.static_type(field)?;
        Ok(self.zero(ty))
    }

    /// Cell of a static field, created with its zero value on first use.
    fn static_slot(&mut self, field: &FieldRef) -> VmResult<Rc<RefCell<Value>>> {
        let key = field.to_string();
        if let Some(cell) = self.statics.get(&key) {
            return Ok(cell.clone());
        }
        let zero = self.zero(self.static_type(field)?);
        let cell = Rc::new(RefCell::new(zero));
        self.statics.insert(key, cell.clone());
        Ok(cell)
    }

    fn static_type(&self, field: &FieldRef) -> VmResult<&'m TypeRef> {
        let module = self.module;
        module
            .find_type(&field.owner)
            .and_then(|ty| ty.field(&field.name))
            .filter(|f| f.is_static)
            .map(|f| &f.ty)
            .ok_or_else(|| VmError::UnknownField(field.to_string()))
    }

    fn call_native(&mut self, mref: &MethodRef, args: Vec<Value>) -> VmResult<Value> {
        let keys = [mref.to_string(), mref.short_key()];
        if let Some(native) = keys.iter().find_map(|k| self.natives.get(k)) {
            return native(&args);
        }
        if self.module.resolve_method(mref).is_some() {
            Err(VmError::UnboundNative(mref.to_string()))
        } else {
            Err(VmError::UnknownMethod(mref.to_string()))
        }
    }

    fn run_method(&mut self, owner: &'m TypeDef, method: &'m MethodDef, args: Vec<Value>) -> VmResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(VmError::CallDepthExceeded);
        }
        self.depth += 1;
        let result = self.execute(owner, method, args);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, owner: &'m TypeDef, method: &'m MethodDef, mut args: Vec<Value>) -> VmResult<Value> {
        let name = format!("{}::{}", owner.name, method.name);
        let body = method
            .body
            .as_ref()
            .ok_or_else(|| VmError::UnboundNative(name.clone()))?;
        body.validate().map_err(|e| e.at(&name))?;

        let this = if method.is_static {
            None
        } else if args.is_empty() {
            return Err(VmError::StackUnderflow(name));
        } else {
            Some(args.remove(0))
        };
        let locals = body
            .locals()
            .iter()
            .map(|local| Rc::new(RefCell::new(self.zero(&local.ty))))
            .collect();
        let mut frame = Box::new(Frame::new(name, method, body, this, args, locals));
        log::trace!("enter {}", frame.name);

        loop {
            let at = frame.pc;
            let op = *frame
                .ops
                .get(at)
                .ok_or_else(|| VmError::FellOffEnd(frame.name.clone()))?;
            frame.pc += 1;
            match self.step(&mut frame, op, at) {
                Ok(Flow::Next) => {}
                Ok(Flow::Return(value)) => {
                    log::trace!("leave {} -> {}", frame.name, value);
                    return Ok(value);
                }
                Ok(Flow::Escape(exception)) => return Err(VmError::Thrown(exception)),
                Err(VmError::Thrown(exception)) => {
                    if let Some(exception) = frame.unwind(exception, at, 0) {
                        return Err(VmError::Thrown(exception));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn step(&mut self, frame: &mut Frame<'m>, op: &'m Opcode, at: usize) -> VmResult<Flow> {
        match op {
            Opcode::Nop => {}
            Opcode::LdArg(index) => {
                let value = frame
                    .args
                    .get(*index as usize)
                    .cloned()
                    .ok_or_else(|| frame.mismatch(format!("no argument {}", index)))?;
                frame.stack.push(value);
            }
            Opcode::LdThis => {
                let this = frame
                    .this
                    .clone()
                    .ok_or_else(|| frame.mismatch("ldthis in a static method"))?;
                frame.stack.push(this);
            }
            Opcode::LdLoc(local) => {
                let value = frame.local(local.index())?.borrow().clone();
                frame.stack.push(value);
            }
            Opcode::StLoc(local) => {
                let value = frame.pop()?;
                *frame.local(local.index())?.borrow_mut() = value;
            }
            Opcode::LdLocA(local) => {
                let slot = frame.local(local.index())?.clone();
                frame.stack.push(Value::Ref(Address::Slot(slot)));
            }
            Opcode::LdInd => {
                let address = frame.pop()?;
                match address {
                    Value::Ref(address) => frame.stack.push(address.load()),
                    other => return Err(frame.mismatch(format!("ldind through {}", other))),
                }
            }
            Opcode::StInd => {
                let value = frame.pop()?;
                match frame.pop()? {
                    Value::Ref(address) => address.store(value),
                    other => return Err(frame.mismatch(format!("stind through {}", other))),
                }
            }
            Opcode::Const(literal) => frame.stack.push(Value::from_literal(literal)),
            Opcode::LdNull => frame.stack.push(Value::Null),
            Opcode::LdDefault(ty) => {
                let value = self.zero(ty);
                frame.stack.push(value);
            }
            Opcode::LdFld(field) => {
                let object = frame.pop_object()?;
                let value = object
                    .borrow()
                    .fields
                    .get(&field.name)
                    .cloned()
                    .ok_or_else(|| VmError::UnknownField(field.to_string()))?;
                frame.stack.push(value);
            }
            Opcode::StFld(field) => {
                let value = frame.pop()?;
                let object = frame.pop_object()?;
                let mut object = object.borrow_mut();
                match object.fields.get_mut(&field.name) {
                    Some(slot) => *slot = value,
                    None => return Err(VmError::UnknownField(field.to_string())),
                }
            }
            Opcode::LdSFld(field) => {
                let value = self.load_static(field)?;
                frame.stack.push(value);
            }
            Opcode::StSFld(field) => {
                let value = frame.pop()?;
                *self.static_slot(field)?.borrow_mut() = value;
            }
            Opcode::LdFldA(field) => {
                let object = frame.pop_object()?;
                if !object.borrow().fields.contains_key(&field.name) {
                    return Err(VmError::UnknownField(field.to_string()));
                }
                frame.stack.push(Value::Ref(Address::Field(object, field.name.clone())));
            }
            Opcode::LdSFldA(field) => {
                let cell = self.static_slot(field)?;
                frame.stack.push(Value::Ref(Address::Slot(cell)));
            }
            Opcode::NewObj(ty) => {
                let object = self.new_object(&ty.name)?;
                frame.stack.push(object);
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Rem => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                let result = arithmetic(op, lhs, rhs).map_err(|message| frame.mismatch(message))?;
                frame.stack.push(result?);
            }
            Opcode::Ceq => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.stack.push(Value::Bool(lhs == rhs));
            }
            Opcode::Cgt | Opcode::Clt => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                let ordering = compare(&lhs, &rhs)
                    .ok_or_else(|| frame.mismatch(format!("cannot compare {} and {}", lhs, rhs)))?;
                let result = match op {
                    Opcode::Cgt => ordering.is_gt(),
                    _ => ordering.is_lt(),
                };
                frame.stack.push(Value::Bool(result));
            }
            Opcode::Br(target) => frame.pc = frame.position(*target)?,
            Opcode::BrTrue(target) | Opcode::BrFalse(target) => {
                let taken = frame.pop()?.is_truthy() == matches!(op, Opcode::BrTrue(_));
                if taken {
                    frame.pc = frame.position(*target)?;
                }
            }
            Opcode::Leave(target) => {
                let target = frame.position(*target)?;
                let crossed = frame
                    .regions
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.kind == RegionKind::Finally && r.guards(at) && !r.guards(target))
                    .map(|(i, _)| i)
                    .collect();
                frame.stack.clear();
                frame.continue_leave(target, crossed);
            }
            Opcode::EndFinally => match frame.pending.pop() {
                Some(Pending::Leave { target, rest }) => frame.continue_leave(target, rest),
                Some(Pending::Unwind { exception, origin, next }) => {
                    if let Some(exception) = frame.unwind(exception, origin, next) {
                        return Ok(Flow::Escape(exception));
                    }
                }
                None => return Err(VmError::InvalidFinally(frame.name.clone())),
            },
            Opcode::Throw => {
                let exception = match frame.pop()? {
                    Value::Null => Value::str("NullReferenceException"),
                    other => other,
                };
                return Err(VmError::Thrown(exception));
            }
            Opcode::Ret => {
                let value = if frame.returns_value {
                    frame.pop()?
                } else {
                    Value::Void
                };
                return Ok(Flow::Return(value));
            }
            Opcode::Pop => {
                frame.pop()?;
            }
            Opcode::Dup => {
                let top = frame.pop()?;
                frame.stack.push(top.clone());
                frame.stack.push(top);
            }
            Opcode::Call(mref) => self.call(frame, mref, false)?,
            Opcode::CallVirt(mref) => self.call(frame, mref, true)?,
        }
        Ok(Flow::Next)
    }

    fn call(&mut self, frame: &mut Frame<'m>, mref: &MethodRef, dispatch: bool) -> VmResult<()> {
        let module = self.module;
        let argc = mref.params.len();
        if frame.stack.len() < argc {
            return Err(VmError::StackUnderflow(frame.name.clone()));
        }
        let mut args = frame.stack.split_off(frame.stack.len() - argc);
        let resolved = module.resolve_method(mref);
        let instance = dispatch || resolved.is_some_and(|(_, m)| !m.is_static);
        if instance {
            let receiver = frame.pop()?;
            args.insert(0, receiver);
        }

        let result = if dispatch {
            self.call_virtual(mref, args)?
        } else {
            match resolved {
                Some((ty, method)) if method.body.is_some() => self.run_method(ty, method, args)?,
                _ => self.call_native(mref, args)?,
            }
        };
        if !matches!(result, Value::Void) {
            frame.stack.push(result);
        }
        Ok(())
    }

    fn call_virtual(&mut self, mref: &MethodRef, mut args: Vec<Value>) -> VmResult<Value> {
        let module = self.module;
        let receiver = args[0].load();
        if receiver == Value::Null {
            return Err(VmError::Thrown(Value::str("NullReferenceException")));
        }
        args[0] = receiver.clone();
        let runtime = receiver.type_name();
        let concrete = MethodRef::new(runtime.as_str(), mref.name.as_str(), mref.params.clone());
        match module.resolve_method(&concrete) {
            Some((ty, method)) if method.body.is_some() => self.run_method(ty, method, args),
            _ => {
                let keys = [concrete.to_string(), concrete.short_key()];
                if let Some(native) = keys.iter().find_map(|k| self.natives.get(k)) {
                    return native(&args);
                }
                self.call_native(mref, args)
            }
        }
    }
}

enum Flow {
    Next,
    Return(Value),
    Escape(Value),
}

/// Continuation of a finally handler once it reaches endfinally.
enum Pending {
    Leave { target: usize, rest: Vec<usize> },
    Unwind { exception: Value, origin: usize, next: usize },
}

/// Region with positional, exclusive bounds.
#[derive(Debug, Clone, Copy)]
struct Span {
    kind: RegionKind,
    try_start: usize,
    try_end: usize,
    handler_start: usize,
}

impl Span {
    fn guards(&self, pc: usize) -> bool {
        self.try_start <= pc && pc < self.try_end
    }
}

struct Frame<'m> {
    name: String,
    returns_value: bool,
    ops: Vec<&'m Opcode>,
    positions: HashMap<InstId, usize>,
    /// Innermost protected range first.
    regions: Vec<Span>,
    this: Option<Value>,
    args: Vec<Value>,
    locals: Vec<Rc<RefCell<Value>>>,
    stack: Vec<Value>,
    pending: Vec<Pending>,
    pc: usize,
}

impl<'m> Frame<'m> {
    fn new(
        name: String,
        method: &'m MethodDef,
        body: &'m Body,
        this: Option<Value>,
        args: Vec<Value>,
        locals: Vec<Rc<RefCell<Value>>>,
    ) -> Self {
        let positions = body.positions();
        let end = body.len();
        let at = |id: Option<InstId>| id.and_then(|id| positions.get(&id).copied()).unwrap_or(end);
        let mut regions: Vec<Span> = body
            .regions()
            .iter()
            .map(|r| Span {
                kind: r.kind,
                try_start: at(Some(r.try_start)),
                try_end: at(r.try_end),
                handler_start: at(Some(r.handler_start)),
            })
            .collect();
        regions.sort_by_key(|r| r.try_end - r.try_start);
        Self {
            name,
            returns_value: !method.return_type.is_void(),
            ops: body.iter().map(|(_, op)| op).collect(),
            positions,
            regions,
            this,
            args,
            locals,
            stack: Vec::new(),
            pending: Vec::new(),
            pc: 0,
        }
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::StackUnderflow(self.name.clone()))
    }

    fn pop_object(&mut self) -> VmResult<ObjectRef> {
        match self.pop()?.load() {
            Value::Object(object) => Ok(object),
            Value::Null => Err(VmError::Thrown(Value::str("NullReferenceException"))),
            other => Err(self.mismatch(format!("field access on {}", other))),
        }
    }

    fn local(&self, index: usize) -> VmResult<&Rc<RefCell<Value>>> {
        self.locals
            .get(index)
            .ok_or_else(|| self.mismatch(format!("no local {}", index)))
    }

    fn position(&self, id: InstId) -> VmResult<usize> {
        self.positions
            .get(&id)
            .copied()
            .ok_or(VmError::Malformed(WeaveError::DanglingInstruction(id)))
    }

    fn mismatch(&self, message: impl Into<String>) -> VmError {
        VmError::TypeMismatch {
            method: self.name.clone(),
            message: message.into(),
        }
    }

    fn continue_leave(&mut self, target: usize, mut crossed: Vec<usize>) {
        if crossed.is_empty() {
            self.pc = target;
            return;
        }
        let region = crossed.remove(0);
        self.pending.push(Pending::Leave { target, rest: crossed });
        self.pc = self.regions[region].handler_start;
    }

    /// Transfer control to the next handler guarding `origin`, searching
    /// regions from index `from`. Returns the exception if none is left.
    fn unwind(&mut self, exception: Value, origin: usize, from: usize) -> Option<Value> {
        let found = self
            .regions
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, r)| r.guards(origin))
            .map(|(i, r)| (i, *r));
        let Some((index, region)) = found else {
            return Some(exception);
        };
        self.stack.clear();
        self.pc = region.handler_start;
        match region.kind {
            RegionKind::Catch => self.stack.push(exception),
            RegionKind::Finally => self.pending.push(Pending::Unwind {
                exception,
                origin,
                next: index + 1,
            }),
        }
        None
    }
}

/// Binary arithmetic. The outer error is a type mismatch, the inner one an
/// exception raised by the operation itself.
fn arithmetic(op: &Opcode, lhs: Value, rhs: Value) -> Result<VmResult<Value>, String> {
    macro_rules! integral {
        ($variant:ident, $a:expr, $b:expr) => {{
            let (a, b) = ($a, $b);
            let divides = matches!(op, Opcode::Div | Opcode::Rem);
            if divides && b == 0 {
                return Ok(Err(VmError::Thrown(Value::str("DivideByZeroException"))));
            }
            Value::$variant(match op {
                Opcode::Add => a.wrapping_add(b),
                Opcode::Sub => a.wrapping_sub(b),
                Opcode::Mul => a.wrapping_mul(b),
                Opcode::Div => a.wrapping_div(b),
                _ => a.wrapping_rem(b),
            })
        }};
    }
    macro_rules! floating {
        ($variant:ident, $a:expr, $b:expr) => {{
            let (a, b) = ($a, $b);
            Value::$variant(match op {
                Opcode::Add => a + b,
                Opcode::Sub => a - b,
                Opcode::Mul => a * b,
                Opcode::Div => a / b,
                _ => a % b,
            })
        }};
    }
    let value = match (lhs, rhs) {
        (Value::I32(a), Value::I32(b)) => integral!(I32, a, b),
        (Value::I64(a), Value::I64(b)) => integral!(I64, a, b),
        (Value::U64(a), Value::U64(b)) => integral!(U64, a, b),
        (Value::F32(a), Value::F32(b)) => floating!(F32, a, b),
        (Value::F64(a), Value::F64(b)) => floating!(F64, a, b),
        (Value::Str(a), Value::Str(b)) if matches!(op, Opcode::Add) => Value::str(&format!("{}{}", a, b)),
        (lhs, rhs) => return Err(format!("{} on {} and {}", op.mnemonic(), lhs, rhs)),
    };
    Ok(Ok(value))
}

fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::I32(a), Value::I32(b)) => a.partial_cmp(b),
        (Value::I64(a), Value::I64(b)) => a.partial_cmp(b),
        (Value::U64(a), Value::U64(b)) => a.partial_cmp(b),
        (Value::F32(a), Value::F32(b)) => a.partial_cmp(b),
        (Value::F64(a), Value::F64(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn module(text: &str) -> Module {
        Module::parse(text).unwrap()
    }

    #[test]
    fn test_arithmetic_and_branches() {
        let m = module(
            r#"
class M {
  static method int abs(int x) {
    ldarg x
    ldc.i4 0
    clt
    brfalse done
    ldc.i4 0
    ldarg x
    sub
    ret
  done:
    ldarg x
    ret
  }
}
"#,
        );
        let mut vm = Vm::new(&m);
        assert_eq!(vm.invoke("M", "abs", vec![Value::I32(-7)]).unwrap(), Value::I32(7));
        assert_eq!(vm.invoke("M", "abs", vec![Value::I32(3)]).unwrap(), Value::I32(3));
    }

    #[test]
    fn test_leave_runs_finally_and_catch_handles_throw() {
        let m = module(
            r#"
class M {
  static field int cleaned
  static method int guarded(bool fail) {
    .try t0 f0 finally f0 f1
    .try t0 t1 catch c0 f0
  t0:
    ldarg fail
    brfalse ok
    ldstr "boom"
    throw
  ok:
    leave out
  t1:
  c0:
    pop
    leave caught
  f0:
    ldsfld M::cleaned
    ldc.i4 1
    add
    stsfld M::cleaned
    endfinally
  f1:
  out:
    ldc.i4 1
    ret
  caught:
    ldc.i4 2
    ret
  }
}
"#,
        );
        let mut vm = Vm::new(&m);
        assert_eq!(vm.invoke("M", "guarded", vec![Value::Bool(false)]).unwrap(), Value::I32(1));
        assert_eq!(vm.static_field("M", "cleaned").unwrap(), Value::I32(1));
        assert_eq!(vm.invoke("M", "guarded", vec![Value::Bool(true)]).unwrap(), Value::I32(2));
        assert_eq!(vm.static_field("M", "cleaned").unwrap(), Value::I32(2));
    }

    #[test]
    fn test_unhandled_exception_runs_finally_then_escapes() {
        let m = module(
            r#"
class M {
  static method void fail() native
  static method void run() {
    .try t0 t1 finally t1 t2
  t0:
    call M::fail()
    leave t2
  t1:
    call M::cleanup()
    endfinally
  t2:
    ret
  }
  static method void cleanup() native
}
"#,
        );
        let cleaned = Rc::new(Cell::new(0));
        let seen = cleaned.clone();
        let mut vm = Vm::new(&m);
        vm.bind_native("M::fail", |_| Err(VmError::Thrown(Value::str("fail"))));
        vm.bind_native("M::cleanup", move |_| {
            seen.set(seen.get() + 1);
            Ok(Value::Void)
        });
        match vm.invoke("M", "run", Vec::new()) {
            Err(VmError::Thrown(Value::Str(s))) => assert_eq!(&*s, "fail"),
            other => panic!("expected escaping exception, got {:?}", other),
        }
        assert_eq!(cleaned.get(), 1);
    }

    #[test]
    fn test_virtual_call_dispatches_on_runtime_type() {
        let m = module(
            r#"
class Base {
  method int id() {
    ldc.i4 1
    ret
  }
}
class Derived : Base {
  field int n
  method int id() {
    ldthis
    ldfld Derived::n
    ret
  }
}
class M {
  static method int run() {
    local Base b
    newobj Derived
    dup
    ldc.i4 9
    stfld Derived::n
    stloc b
    ldloc b
    callvirt Base::id()
    ret
  }
}
"#,
        );
        let mut vm = Vm::new(&m);
        assert_eq!(vm.invoke("M", "run", Vec::new()).unwrap(), Value::I32(9));
    }

    #[test]
    fn test_out_parameter_written_through_address() {
        let m = module(
            r#"
class M {
  static method bool give(out int r) {
    ldarg r
    ldc.i4 42
    stind
    ldc.bool true
    ret
  }
  static method int run() {
    local int v
    ldloca v
    call M::give(int)
    pop
    ldloc v
    ret
  }
}
"#,
        );
        let mut vm = Vm::new(&m);
        assert_eq!(vm.invoke("M", "run", Vec::new()).unwrap(), Value::I32(42));
    }

    #[test]
    fn test_unbound_native_and_recursion_limit() {
        let m = module(
            r#"
class M {
  static method void host() native
  static method void forever() {
    call M::forever()
    ret
  }
  static method int countdown(int n) {
    ldarg n
    brfalse done
    ldarg n
    ldc.i4 1
    sub
    call M::countdown(int)
    ldc.i4 1
    add
    ret
  done:
    ldc.i4 0
    ret
  }
}
"#,
        );
        let mut vm = Vm::new(&m);
        assert!(matches!(vm.invoke("M", "host", Vec::new()), Err(VmError::UnboundNative(_))));
        assert!(matches!(vm.invoke("M", "forever", Vec::new()), Err(VmError::CallDepthExceeded)));
        // The failed run leaves the depth counter balanced.
        assert!(matches!(vm.invoke("M", "forever", Vec::new()), Err(VmError::CallDepthExceeded)));
        let depth = (MAX_CALL_DEPTH - 1) as i32;
        assert_eq!(vm.invoke("M", "countdown", vec![Value::I32(depth)]).unwrap(), Value::I32(depth));
    }

    #[test]
    fn test_task_factories_are_bound() {
        let m = module(
            r#"
class M {
  static method Task<int> run() {
    ldc.i4 3
    call Task::from_result<int>(int)
    ret
  }
}
"#,
        );
        let mut vm = Vm::new(&m);
        let task = vm.invoke("M", "run", Vec::new()).unwrap();
        assert_eq!(task.task_result(), Some(&Value::I32(3)));
    }
}
