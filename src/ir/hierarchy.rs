//! Type-compatibility queries over the module's type graph.
//!
//! [`TypeHierarchy`] snapshots the base-type and interface edges of the
//! built-in types and every type declared in a module. Assignability walks
//! those edges and is memoized per (type, target name) pair, since the binder
//! asks the same questions for every candidate of every call site.

use std::cell::RefCell;

use hashbrown::HashMap;

use super::{well_known as wk, Module, TypeKind, TypeRef};

#[derive(Debug, Clone)]
struct TypeInfo {
    kind: TypeKind,
    base: Option<TypeRef>,
    interfaces: Vec<TypeRef>,
}

#[derive(Debug)]
pub struct TypeHierarchy {
    types: HashMap<String, TypeInfo>,
    memo: RefCell<HashMap<(String, String), bool>>,
}

impl TypeHierarchy {
    /// Built-in types only.
    pub fn builtin() -> Self {
        let mut types = HashMap::new();
        let mut add = |name: &str, kind: TypeKind, base: Option<&str>, interfaces: &[&str]| {
            types.insert(
                name.to_string(),
                TypeInfo {
                    kind,
                    base: base.map(TypeRef::named),
                    interfaces: interfaces.iter().map(|i| TypeRef::named(*i)).collect(),
                },
            );
        };
        add(wk::OBJECT, TypeKind::Class, None, &[]);
        add(wk::STRING, TypeKind::Class, Some(wk::OBJECT), &[]);
        for primitive in [wk::BOOL, wk::INT, wk::LONG, wk::ULONG, wk::FLOAT, wk::DOUBLE] {
            add(primitive, TypeKind::Struct, Some(wk::OBJECT), &[]);
        }
        add(wk::DISPOSABLE, TypeKind::Interface, None, &[]);
        add(wk::TASK, TypeKind::Class, Some(wk::OBJECT), &[]);
        add("Task`1", TypeKind::Class, Some(wk::TASK), &[]);
        add(wk::VALUE_TASK, TypeKind::Struct, Some(wk::OBJECT), &[]);
        add("ValueTask`1", TypeKind::Struct, Some(wk::OBJECT), &[]);
        add(wk::MARKER, TypeKind::Interface, None, &[]);
        for marker in [wk::EXECUTE_MARKER, wk::SCOPE_MARKER, wk::RETURN_CONDITION_MARKER] {
            add(marker, TypeKind::Class, Some(wk::OBJECT), &[wk::MARKER]);
        }
        Self {
            types,
            memo: RefCell::new(HashMap::new()),
        }
    }

    /// Built-in types plus every type declared in `module`, nested ones
    /// included. Declared classes without a base derive from `object`.
    pub fn new(module: &Module) -> Self {
        let mut hierarchy = Self::builtin();
        for ty in module.all_types() {
            let base = match (&ty.base, ty.kind) {
                (Some(base), _) => Some(base.clone()),
                (None, TypeKind::Interface) => None,
                (None, _) => Some(TypeRef::named(wk::OBJECT)),
            };
            hierarchy.types.insert(
                ty.name.clone(),
                TypeInfo {
                    kind: ty.kind,
                    base,
                    interfaces: ty.interfaces.clone(),
                },
            );
        }
        hierarchy
    }

    pub fn contains(&self, ty: &TypeRef) -> bool {
        self.types.contains_key(&ty.definition_key())
    }

    pub fn kind(&self, ty: &TypeRef) -> Option<TypeKind> {
        self.types.get(&ty.definition_key()).map(|info| info.kind)
    }

    pub fn is_value_type(&self, ty: &TypeRef) -> bool {
        self.kind(ty) == Some(TypeKind::Struct)
    }

    /// Can a value of type `from` be used where `to` is expected?
    ///
    /// Identity, `object`, and any type reachable through base-type or
    /// interface edges qualify. Generic instantiations are invariant.
    pub fn is_assignable(&self, from: &TypeRef, to: &TypeRef) -> bool {
        if from == to {
            return true;
        }
        if from.is_void() || to.is_void() {
            return false;
        }
        if !to.args.is_empty() {
            return false;
        }
        if to.name == wk::OBJECT {
            return true;
        }
        self.is_assignable_to_name(from, &to.name)
    }

    /// Memoized walk from `from` towards a non-generic type named `to`.
    pub fn is_assignable_to_name(&self, from: &TypeRef, to: &str) -> bool {
        let key = (from.definition_key(), to.to_string());
        if let Some(&known) = self.memo.borrow().get(&key) {
            return known;
        }
        // Guards against cyclic declarations while the walk is in progress.
        self.memo.borrow_mut().insert(key.clone(), false);

        let result = if key.0 == to {
            true
        } else {
            match self.types.get(&key.0) {
                Some(info) => {
                    info.interfaces
                        .iter()
                        .any(|i| self.is_assignable_to_name(i, to))
                        || info
                            .base
                            .as_ref()
                            .is_some_and(|b| self.is_assignable_to_name(b, to))
                }
                None => false,
            }
        };
        self.memo.borrow_mut().insert(key, result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::TypeDef;

    fn t(name: &str) -> TypeRef {
        TypeRef::named(name)
    }

    fn module() -> Module {
        let mut base = TypeDef::new("Base", TypeKind::Class);
        base.interfaces.push(t("IThing"));
        let mut derived = TypeDef::new("Derived", TypeKind::Class);
        derived.base = Some(t("Base"));
        let thing = TypeDef::new("IThing", TypeKind::Interface);
        let mut handle = TypeDef::new("Handle", TypeKind::Struct);
        handle.interfaces.push(t(wk::DISPOSABLE));
        Module {
            types: vec![base, derived, thing, handle],
        }
    }

    #[test]
    fn test_assignable_through_bases_and_interfaces() {
        let h = TypeHierarchy::new(&module());
        assert!(h.is_assignable(&t("Derived"), &t("Base")));
        assert!(h.is_assignable(&t("Derived"), &t("IThing")));
        assert!(h.is_assignable(&t("Derived"), &t("object")));
        assert!(!h.is_assignable(&t("Base"), &t("Derived")));
        assert!(h.is_assignable(&t("Handle"), &t(wk::DISPOSABLE)));
        assert!(h.is_value_type(&t("Handle")));
        assert!(!h.is_value_type(&t("Derived")));
    }

    #[test]
    fn test_primitives_are_exact() {
        let h = TypeHierarchy::builtin();
        assert!(h.is_assignable(&t("int"), &t("int")));
        assert!(!h.is_assignable(&t("int"), &t("float")));
        assert!(!h.is_assignable(&t("int"), &t("string")));
        assert!(h.is_assignable(&t("string"), &t("object")));
        assert!(!h.is_assignable(&t("void"), &t("object")));
    }

    #[test]
    fn test_generic_instantiations() {
        let h = TypeHierarchy::builtin();
        let task_int = TypeRef::generic("Task", vec![t("int")]);
        let task_long = TypeRef::generic("Task", vec![t("long")]);
        assert!(h.is_assignable(&task_int, &t("Task")));
        assert!(!h.is_assignable(&task_int, &task_long));
        assert!(h.is_assignable(&task_int, &task_int.clone()));
        assert!(!h.is_assignable(&t("Task"), &task_int));
    }

    #[test]
    fn test_markers_reach_marker_root() {
        let mut log = TypeDef::new("Log", TypeKind::Class);
        log.base = Some(t(wk::EXECUTE_MARKER));
        let h = TypeHierarchy::new(&Module { types: vec![log] });
        assert!(h.is_assignable_to_name(&t("Log"), wk::MARKER));
        assert!(h.is_assignable_to_name(&t("Log"), wk::EXECUTE_MARKER));
        assert!(!h.is_assignable_to_name(&t("Log"), wk::SCOPE_MARKER));
    }

    #[test]
    fn test_cyclic_bases_terminate() {
        let mut a = TypeDef::new("A", TypeKind::Class);
        a.base = Some(t("B"));
        let mut b = TypeDef::new("B", TypeKind::Class);
        b.base = Some(t("A"));
        let h = TypeHierarchy::new(&Module { types: vec![a, b] });
        assert!(!h.is_assignable(&t("A"), &t("C")));
        assert!(h.is_assignable(&t("A"), &t("B")));
    }
}
