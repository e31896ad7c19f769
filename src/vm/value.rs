//! Runtime values of the interpreter.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::ir::{well_known as wk, Literal, TypeRef};

/// Heap object. Struct instances are boxed as objects too; dispose through
/// an address therefore mutates the instance held by the local.
#[derive(Debug)]
pub struct Object {
    pub ty: String,
    pub fields: HashMap<String, Value>,
}

pub type ObjectRef = Rc<RefCell<Object>>;

/// Target of a by-ref value: a local or static slot, or a field of an object.
#[derive(Debug, Clone)]
pub enum Address {
    Slot(Rc<RefCell<Value>>),
    Field(ObjectRef, String),
}

impl Address {
    pub fn load(&self) -> Value {
        match self {
            Address::Slot(slot) => slot.borrow().clone(),
            Address::Field(object, name) => object.borrow().fields.get(name).cloned().unwrap_or(Value::Null),
        }
    }

    pub fn store(&self, value: Value) {
        match self {
            Address::Slot(slot) => *slot.borrow_mut() = value,
            Address::Field(object, name) => {
                object.borrow_mut().fields.insert(name.clone(), value);
            }
        }
    }

    fn same(&self, other: &Address) -> bool {
        match (self, other) {
            (Address::Slot(a), Address::Slot(b)) => Rc::ptr_eq(a, b),
            (Address::Field(a, x), Address::Field(b, y)) => Rc::ptr_eq(a, b) && x == y,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    /// Result of a method returning nothing. Never pushed on the stack.
    Void,
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(Rc<str>),
    Object(ObjectRef),
    /// Address of a slot or a field.
    Ref(Address),
    /// A completed `Task`/`ValueTask`, with its result if it has one.
    Completed(Option<Box<Value>>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn object(ty: impl Into<String>, fields: HashMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(Object {
            ty: ty.into(),
            fields,
        })))
    }

    pub fn from_literal(literal: &Literal) -> Self {
        match literal {
            Literal::Int(v) => Value::I32(*v),
            Literal::Long(v) => Value::I64(*v),
            Literal::ULong(v) => Value::U64(*v),
            Literal::Float(v) => Value::F32(*v),
            Literal::Double(v) => Value::F64(*v),
            Literal::Str(s) => Value::str(s),
            Literal::Bool(b) => Value::Bool(*b),
        }
    }

    /// Zero value of a primitive type, `null` otherwise.
    pub fn zero(ty: &TypeRef) -> Self {
        if !ty.args.is_empty() {
            return Value::Null;
        }
        match ty.name.as_str() {
            wk::BOOL => Value::Bool(false),
            wk::INT => Value::I32(0),
            wk::LONG => Value::I64(0),
            wk::ULONG => Value::U64(0),
            wk::FLOAT => Value::F32(0.0),
            wk::DOUBLE => Value::F64(0.0),
            _ => Value::Null,
        }
    }

    /// Name of the runtime type, used for virtual dispatch.
    pub fn type_name(&self) -> String {
        match self {
            Value::Void => wk::VOID.to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(_) => wk::BOOL.to_string(),
            Value::I32(_) => wk::INT.to_string(),
            Value::I64(_) => wk::LONG.to_string(),
            Value::U64(_) => wk::ULONG.to_string(),
            Value::F32(_) => wk::FLOAT.to_string(),
            Value::F64(_) => wk::DOUBLE.to_string(),
            Value::Str(_) => wk::STRING.to_string(),
            Value::Object(obj) => obj.borrow().ty.clone(),
            Value::Ref(address) => address.load().type_name(),
            Value::Completed(_) => wk::TASK.to_string(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Void | Value::Null => false,
            Value::Bool(b) => *b,
            Value::I32(v) => *v != 0,
            Value::I64(v) => *v != 0,
            Value::U64(v) => *v != 0,
            Value::F32(v) => *v != 0.0,
            Value::F64(v) => *v != 0.0,
            _ => true,
        }
    }

    /// Follow an address to the value stored behind it.
    pub fn load(&self) -> Value {
        match self {
            Value::Ref(address) => address.load(),
            other => other.clone(),
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Result carried by a completed task.
    pub fn task_result(&self) -> Option<&Value> {
        match self {
            Value::Completed(Some(v)) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Ref(a), Value::Ref(b)) => a.same(b),
            (Value::Completed(a), Value::Completed(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("void"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}L", v),
            Value::U64(v) => write!(f, "{}UL", v),
            Value::F32(v) => write!(f, "{:?}f", v),
            Value::F64(v) => write!(f, "{:?}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(obj) => write!(f, "<{}>", obj.borrow().ty),
            Value::Ref(address) => write!(f, "&{}", address.load()),
            Value::Completed(None) => f.write_str("<completed>"),
            Value::Completed(Some(v)) => write!(f, "<completed {}>", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values() {
        assert_eq!(Value::zero(&TypeRef::named("int")), Value::I32(0));
        assert_eq!(Value::zero(&TypeRef::named("bool")), Value::Bool(false));
        assert_eq!(Value::zero(&TypeRef::named("Widget")), Value::Null);
        assert_eq!(
            Value::zero(&TypeRef::generic("Task", vec![TypeRef::named("int")])),
            Value::Null
        );
    }

    #[test]
    fn test_identity_equality_for_objects() {
        let a = Value::object("A", HashMap::new());
        let b = Value::object("A", HashMap::new());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.type_name(), "A");
        assert!(a.is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn test_load_through_reference() {
        let slot = Rc::new(RefCell::new(Value::I32(4)));
        let r = Value::Ref(Address::Slot(slot.clone()));
        *slot.borrow_mut() = Value::I32(5);
        assert_eq!(r.load(), Value::I32(5));
        assert_eq!(r.type_name(), "int");
    }

    #[test]
    fn test_store_through_field_address() {
        let mut fields = HashMap::new();
        fields.insert("count".to_string(), Value::I32(1));
        let object = Value::object("Widget", fields);
        let Value::Object(inner) = &object else {
            unreachable!()
        };
        let address = Address::Field(inner.clone(), "count".to_string());
        address.store(Value::I32(8));
        assert_eq!(inner.borrow().fields.get("count"), Some(&Value::I32(8)));
        assert_eq!(Value::Ref(address.clone()), Value::Ref(address));
    }
}
