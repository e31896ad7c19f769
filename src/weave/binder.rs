// This module decides whether an injectable candidate can be called from a given call
// site, and if so where each of its arguments comes from. Each parameter is checked on
// its own against the call site's parameters, the declaring type's own fields, the
// receiver, the call site's name and the marker's literals. A candidate matches only
// when every parameter resolves; selection walks the registry order and stops at the
// first match, so ranking is decided entirely by the registry.

//! Argument binding.

use super::descriptor::MarkerDescriptor;
use crate::core::error::{WeaveError, WeaveResult};
use super::registry::{BindingKind, CandidateMethod, ParameterBindingSpec};
use crate::ir::{well_known as wk, FieldDef, FieldRef, Literal, MethodDef, ParamDef, TypeDef, TypeHierarchy, TypeRef};

/// Snapshot of the method being woven, as far as binding is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub declaring_type: TypeRef,
    pub method_name: String,
    pub is_static: bool,
    pub params: Vec<ParamDef>,
    /// Fields declared by the type itself; inherited fields are not visible.
    pub fields: Vec<FieldDef>,
    pub return_type: TypeRef,
}

impl CallSite {
    /// Fails when the method has more parameters than `ldarg` can address.
    pub fn capture(owner: &TypeDef, method: &MethodDef) -> WeaveResult<Self> {
        if u16::try_from(method.params.len()).is_err() {
            return Err(WeaveError::malformed(format!(
                "{} declares more than {} parameters",
                method.name,
                u16::MAX
            )));
        }
        Ok(Self {
            declaring_type: owner.type_ref(),
            method_name: method.name.clone(),
            is_static: method.is_static,
            params: method.params.clone(),
            fields: owner.fields.clone(),
            return_type: method.return_type.clone(),
        })
    }

    /// Parameter by name, with its `ldarg` index. `out` parameters are never
    /// bindable; `ref` parameters are, but only to `ref` candidate parameters.
    pub fn param(&self, name: &str) -> Option<(u16, &ParamDef)> {
        self.params
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name && !p.is_out)
            .and_then(|(i, p)| u16::try_from(i).ok().map(|i| (i, p)))
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// `Owner::name` for diagnostics.
    pub fn display_name(&self) -> String {
        format!("{}::{}", self.declaring_type, self.method_name)
    }
}

/// Where a bound argument is loaded from.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgSource {
    Literal(Literal),
    CallerParam(u16),
    InstanceField(FieldRef),
    StaticField(FieldRef),
    /// Address of a field of the receiver, for a `ref` parameter.
    FieldAddress(FieldRef),
    StaticFieldAddress(FieldRef),
    Receiver,
    MethodName(String),
    /// Address of a fresh local of the given type.
    ResultOut(TypeRef),
}

/// A selected candidate with one source per parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub candidate: CandidateMethod,
    pub args: Vec<ArgSource>,
}

pub struct ArgumentBinder<'h> {
    hierarchy: &'h TypeHierarchy,
}

impl<'h> ArgumentBinder<'h> {
    pub fn new(hierarchy: &'h TypeHierarchy) -> Self {
        Self { hierarchy }
    }

    fn assignable(&self, from: &TypeRef, to: &TypeRef) -> bool {
        self.hierarchy.is_assignable(from, to)
    }

    /// By-ref slots are invariant: a `ref` parameter only takes a slot of
    /// exactly its type.
    fn compatible(&self, from: &TypeRef, spec: &ParameterBindingSpec) -> bool {
        if spec.by_ref {
            *from == spec.ty
        } else {
            self.assignable(from, &spec.ty)
        }
    }

    fn caller_param(&self, spec: &ParameterBindingSpec, site: &CallSite) -> Option<ArgSource> {
        site.param(&spec.name)
            .filter(|(_, p)| p.is_ref == spec.by_ref && self.compatible(&p.ty, spec))
            .map(|(index, _)| ArgSource::CallerParam(index))
    }

    /// Source of one parameter, or `None` if the call site cannot supply it.
    pub fn bind_param(
        &self,
        spec: &ParameterBindingSpec,
        site: &CallSite,
        descriptor: &MarkerDescriptor,
    ) -> Option<ArgSource> {
        match spec.kind {
            BindingKind::ResultOut => Some(ArgSource::ResultOut(spec.ty.clone())),
            BindingKind::CallerField => {
                let field = site.field(&spec.name)?;
                if !self.compatible(&field.ty, spec) {
                    return None;
                }
                let fref = FieldRef::new(&site.declaring_type.name, &field.name);
                match (field.is_static, spec.by_ref) {
                    (true, false) => Some(ArgSource::StaticField(fref)),
                    (true, true) => Some(ArgSource::StaticFieldAddress(fref)),
                    _ if site.is_static => None,
                    (false, false) => Some(ArgSource::InstanceField(fref)),
                    (false, true) => Some(ArgSource::FieldAddress(fref)),
                }
            }
            BindingKind::CallerMethodName => (!spec.by_ref && self.assignable(&TypeRef::named(wk::STRING), &spec.ty))
                .then(|| ArgSource::MethodName(site.method_name.clone())),
            BindingKind::CallerInstance => (!spec.by_ref
                && !site.is_static
                && self.assignable(&site.declaring_type, &spec.ty))
            .then_some(ArgSource::Receiver),
            BindingKind::CallerArgument => self.caller_param(spec, site),
            BindingKind::Default => {
                let literal = descriptor
                    .literal(&spec.name)
                    .filter(|value| !spec.by_ref && self.assignable(&value.type_ref(), &spec.ty))
                    .map(|value| ArgSource::Literal(value.clone()));
                literal.or_else(|| self.caller_param(spec, site))
            }
        }
    }

    /// Sources for every parameter of `candidate`, or `None` if any
    /// parameter is unsatisfiable.
    pub fn bind(
        &self,
        candidate: &CandidateMethod,
        site: &CallSite,
        descriptor: &MarkerDescriptor,
    ) -> Option<Vec<ArgSource>> {
        candidate
            .params
            .iter()
            .map(|spec| {
                let source = self.bind_param(spec, site, descriptor);
                if source.is_none() {
                    log::trace!(
                        "{}: parameter {:?} '{}' of {} is unsatisfiable",
                        site.display_name(),
                        spec.kind,
                        spec.name,
                        candidate.method
                    );
                }
                source
            })
            .collect()
    }

    /// First candidate, in registry order, whose parameters all bind. An
    /// explicit target on the descriptor restricts the search to that name.
    pub fn select(
        &self,
        candidates: &[CandidateMethod],
        site: &CallSite,
        descriptor: &MarkerDescriptor,
    ) -> Option<Binding> {
        candidates
            .iter()
            .filter(|c| descriptor.target.as_deref().map_or(true, |t| c.name() == t))
            .find_map(|candidate| {
                self.bind(candidate, site, descriptor).map(|args| Binding {
                    candidate: candidate.clone(),
                    args,
                })
            })
    }
}
