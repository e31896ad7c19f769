//! In-memory module model.
//!
//! A [`Module`] is a tree of [`TypeDef`]s whose methods carry marker
//! applications and stack-machine bodies. This is the representation the
//! weaver reads markers from and rewrites in place.
//!
//! # Text format
//!
//! ```text
//! ; Comments start with semicolon
//! class Log : ExecuteMarker {
//!   ctor(bind string tag)
//!   target(priority = 1) static method void Write(string tag, #caller string name) native
//! }
//!
//! class Widget {
//!   field int count
//!
//!   @Log("widget")
//!   method int bump(int by) {
//!     ldthis
//!     ldfld Widget::count
//!     ldarg by
//!     add
//!     ret
//!   }
//! }
//! ```

use std::fmt;

pub mod body;
pub mod hierarchy;
pub mod opcode;
pub mod parser;
pub mod printer;

pub use body::{Body, ExceptionRegion, InstId, Local, LocalId, RegionKind};
pub use hierarchy::TypeHierarchy;
pub use opcode::{FieldRef, MethodRef, Opcode};

use crate::core::error::{WeaveError, WeaveResult};

/// Names of the types every module can refer to without declaring them.
pub mod well_known {
    pub const VOID: &str = "void";
    pub const BOOL: &str = "bool";
    pub const INT: &str = "int";
    pub const LONG: &str = "long";
    pub const ULONG: &str = "ulong";
    pub const FLOAT: &str = "float";
    pub const DOUBLE: &str = "double";
    pub const STRING: &str = "string";
    pub const OBJECT: &str = "object";
    pub const DISPOSABLE: &str = "IDisposable";
    pub const DISPOSE: &str = "dispose";
    pub const TASK: &str = "Task";
    pub const VALUE_TASK: &str = "ValueTask";
    pub const MARKER: &str = "Marker";
    pub const EXECUTE_MARKER: &str = "ExecuteMarker";
    pub const SCOPE_MARKER: &str = "ScopeMarker";
    pub const RETURN_CONDITION_MARKER: &str = "ReturnConditionMarker";
    /// Marker property naming the explicit injection target.
    pub const TARGET_PROPERTY: &str = "method";
}

/// Reference to a type, possibly a generic instantiation such as `Task<int>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef {
    pub name: String,
    pub args: Vec<TypeRef>,
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn generic(name: impl Into<String>, args: Vec<TypeRef>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    pub fn void() -> Self {
        Self::named(well_known::VOID)
    }

    pub fn is_void(&self) -> bool {
        self.name == well_known::VOID && self.args.is_empty()
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name && self.args.is_empty()
    }

    /// Key of the generic definition: `Task` for `Task`, ``Task`1`` for `Task<int>`.
    pub fn definition_key(&self) -> String {
        if self.args.is_empty() {
            self.name.clone()
        } else {
            format!("{}`{}", self.name, self.args.len())
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.args.is_empty() {
            f.write_str("<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", arg)?;
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

/// Literal value carried by a marker application or a constant instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
    Str(String),
    Bool(bool),
}

impl Literal {
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Int(_) => well_known::INT,
            Literal::Long(_) => well_known::LONG,
            Literal::ULong(_) => well_known::ULONG,
            Literal::Float(_) => well_known::FLOAT,
            Literal::Double(_) => well_known::DOUBLE,
            Literal::Str(_) => well_known::STRING,
            Literal::Bool(_) => well_known::BOOL,
        }
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef::named(self.type_name())
    }
}

/// Prints in the marker-argument syntax of the text format.
impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Long(v) => write!(f, "{}L", v),
            Literal::ULong(v) => write!(f, "{}UL", v),
            Literal::Float(v) => write!(f, "{:?}f", v),
            Literal::Double(v) => write!(f, "{:?}", v),
            Literal::Str(s) => write!(f, "{}", printer::quote(s)),
            Literal::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Class,
    Struct,
    Interface,
}

impl TypeKind {
    pub fn keyword(self) -> &'static str {
        match self {
            TypeKind::Class => "class",
            TypeKind::Struct => "struct",
            TypeKind::Interface => "interface",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
    pub is_static: bool,
}

/// Constructor parameter of a marker type. Only `bound` parameters become
/// literal parameters of the marker, under `alias` when given.
#[derive(Debug, Clone, PartialEq)]
pub struct CtorParam {
    pub name: String,
    pub ty: TypeRef,
    pub bound: bool,
    pub alias: Option<String>,
}

impl CtorParam {
    pub fn bound_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// How an injectable's parameter asks to be sourced from the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamAttr {
    /// `#arg(name)`
    CallerArgument(String),
    /// `#field(name)`
    CallerField(String),
    /// `#this`
    CallerInstance,
    /// `#caller`
    CallerMethodName,
    /// `#result`
    Result,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub ty: TypeRef,
    pub is_out: bool,
    /// Passed by reference (`ref T name`); `ldarg` yields the address.
    pub is_ref: bool,
    pub attrs: Vec<ParamAttr>,
}

impl ParamDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            is_out: false,
            is_ref: false,
            attrs: Vec::new(),
        }
    }
}

/// Declares a method as an injection target of its (marker) type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetDecl {
    pub priority: i32,
}

/// A marker as written on a method: `@Name(positional..., prop = value)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerApplication {
    pub marker: TypeRef,
    pub args: Vec<Literal>,
    pub properties: Vec<(String, Literal)>,
}

impl MarkerApplication {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: TypeRef::named(marker),
            args: Vec::new(),
            properties: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: String,
    pub is_static: bool,
    pub return_type: TypeRef,
    pub params: Vec<ParamDef>,
    pub markers: Vec<MarkerApplication>,
    pub target: Option<TargetDecl>,
    /// `None` for native methods supplied by the host.
    pub body: Option<Body>,
}

impl MethodDef {
    pub fn new(name: impl Into<String>, return_type: TypeRef) -> Self {
        Self {
            name: name.into(),
            is_static: false,
            return_type,
            params: Vec::new(),
            markers: Vec::new(),
            target: None,
            body: None,
        }
    }

    pub fn param_types(&self) -> Vec<TypeRef> {
        self.params.iter().map(|p| p.ty.clone()).collect()
    }

    pub fn method_ref(&self, owner: &str) -> MethodRef {
        MethodRef::new(owner, &self.name, self.param_types())
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    pub base: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub ctor: Vec<CtorParam>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
    pub nested: Vec<TypeDef>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            base: None,
            interfaces: Vec::new(),
            ctor: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            nested: Vec::new(),
        }
    }

    pub fn type_ref(&self) -> TypeRef {
        TypeRef::named(&self.name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Position of a method inside the type tree: indices of the enclosing
/// types from the module root, then the method index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodLoc {
    pub type_path: Vec<usize>,
    pub method: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub types: Vec<TypeDef>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> crate::core::error::ParseResult<Self> {
        parser::parse_module(text)
    }

    /// All types, nested ones included, in declaration order (outer first).
    pub fn all_types(&self) -> Vec<&TypeDef> {
        fn walk<'a>(ty: &'a TypeDef, out: &mut Vec<&'a TypeDef>) {
            out.push(ty);
            for nested in &ty.nested {
                walk(nested, out);
            }
        }
        let mut out = Vec::new();
        for ty in &self.types {
            walk(ty, &mut out);
        }
        out
    }

    pub fn find_type(&self, name: &str) -> Option<&TypeDef> {
        self.all_types().into_iter().find(|t| t.name == name)
    }

    /// Locations of every method in the module, outer types before nested
    /// types, declaration order otherwise.
    pub fn method_locations(&self) -> Vec<MethodLoc> {
        fn walk(ty: &TypeDef, path: &mut Vec<usize>, out: &mut Vec<MethodLoc>) {
            for method in 0..ty.methods.len() {
                out.push(MethodLoc {
                    type_path: path.clone(),
                    method,
                });
            }
            for (i, nested) in ty.nested.iter().enumerate() {
                path.push(i);
                walk(nested, path, out);
                path.pop();
            }
        }
        let mut out = Vec::new();
        for (i, ty) in self.types.iter().enumerate() {
            let mut path = vec![i];
            walk(ty, &mut path, &mut out);
        }
        out
    }

    fn type_at(&self, path: &[usize]) -> Option<&TypeDef> {
        let (first, rest) = path.split_first()?;
        let mut ty = self.types.get(*first)?;
        for &i in rest {
            ty = ty.nested.get(i)?;
        }
        Some(ty)
    }

    fn type_at_mut(&mut self, path: &[usize]) -> Option<&mut TypeDef> {
        let (first, rest) = path.split_first()?;
        let mut ty = self.types.get_mut(*first)?;
        for &i in rest {
            ty = ty.nested.get_mut(i)?;
        }
        Some(ty)
    }

    /// The method at `loc` together with its declaring type.
    pub fn method_at(&self, loc: &MethodLoc) -> WeaveResult<(&TypeDef, &MethodDef)> {
        self.type_at(&loc.type_path)
            .and_then(|ty| ty.methods.get(loc.method).map(|m| (ty, m)))
            .ok_or_else(|| WeaveError::MethodNotFound {
                type_path: loc.type_path.clone(),
                method: loc.method,
            })
    }

    pub fn method_at_mut(&mut self, loc: &MethodLoc) -> WeaveResult<&mut MethodDef> {
        self.type_at_mut(&loc.type_path)
            .and_then(|ty| ty.methods.get_mut(loc.method))
            .ok_or_else(|| WeaveError::MethodNotFound {
                type_path: loc.type_path.clone(),
                method: loc.method,
            })
    }

    /// First method called `name` declared directly on `owner`.
    pub fn find_method(&self, owner: &str, name: &str) -> Option<&MethodDef> {
        self.find_type(owner)?.methods.iter().find(|m| m.name == name)
    }

    /// Resolve a method reference against the declaring type and its bases.
    /// Exact parameter types are preferred; a name and arity match is
    /// accepted otherwise. Returns the type that actually declares the method.
    pub fn resolve_method(&self, mref: &MethodRef) -> Option<(&TypeDef, &MethodDef)> {
        let mut owner = self.find_type(&mref.owner);
        let mut fallback = None;
        let mut guard = 0;
        while let Some(ty) = owner {
            for method in ty.methods.iter().filter(|m| m.name == mref.name) {
                if method.param_types() == mref.params {
                    return Some((ty, method));
                }
                if fallback.is_none() && method.params.len() == mref.params.len() {
                    fallback = Some((ty, method));
                }
            }
            guard += 1;
            if guard > 64 {
                break;
            }
            owner = ty.base.as_ref().and_then(|b| self.find_type(&b.name));
        }
        fallback
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        printer::write_module(f, self)
    }
}
