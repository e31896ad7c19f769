//! Injectable candidates per marker type.
//!
//! The registry scans a marker type and its bases for methods declared as
//! injection targets, validates them against the marker kind and sorts the
//! usable ones by specificity. Each marker type is built once per run.

use std::cmp::Reverse;

use hashbrown::{HashMap, HashSet};

use super::descriptor::{MarkerDescriptor, MarkerKind};
use crate::core::diagnostics::Reporter;
use crate::core::error::DeclarationError;
use crate::ir::{well_known as wk, MethodDef, MethodRef, Module, ParamAttr, ParamDef, TypeDef, TypeHierarchy, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Marker literal or same-named call-site parameter.
    Default,
    CallerArgument,
    CallerField,
    CallerInstance,
    CallerMethodName,
    ResultOut,
}

/// How one candidate parameter wants to be sourced.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBindingSpec {
    pub kind: BindingKind,
    /// Name looked up at the call site: the attribute argument for
    /// `#arg`/`#field`, the parameter's own name otherwise.
    pub name: String,
    pub ty: TypeRef,
    /// `ref` parameter: bound to an address, never to a value.
    pub by_ref: bool,
}

impl ParameterBindingSpec {
    pub fn from_param(param: &ParamDef) -> Self {
        let (kind, name) = match param.attrs.first() {
            Some(ParamAttr::CallerArgument(name)) => (BindingKind::CallerArgument, name.clone()),
            Some(ParamAttr::CallerField(name)) => (BindingKind::CallerField, name.clone()),
            Some(ParamAttr::CallerInstance) => (BindingKind::CallerInstance, param.name.clone()),
            Some(ParamAttr::CallerMethodName) => (BindingKind::CallerMethodName, param.name.clone()),
            Some(ParamAttr::Result) => (BindingKind::ResultOut, param.name.clone()),
            None => (BindingKind::Default, param.name.clone()),
        };
        Self {
            kind,
            name,
            ty: param.ty.clone(),
            by_ref: param.is_ref,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMethod {
    pub method: MethodRef,
    pub returns: TypeRef,
    pub priority: i32,
    pub params: Vec<ParameterBindingSpec>,
}

impl CandidateMethod {
    pub fn name(&self) -> &str {
        &self.method.name
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// The out-result parameter, if the candidate declares one.
    pub fn result_spec(&self) -> Option<&ParameterBindingSpec> {
        self.params.iter().find(|p| p.kind == BindingKind::ResultOut)
    }
}

/// Check one injection target against the rules of its marker kind.
pub fn validate(
    kind: MarkerKind,
    owner: &TypeDef,
    method: &MethodDef,
    hierarchy: &TypeHierarchy,
) -> Result<CandidateMethod, DeclarationError> {
    let mref = method.method_ref(&owner.name);
    let display = mref.to_string();

    if !method.is_static {
        return Err(DeclarationError::NotStatic { method: display });
    }

    let ret = &method.return_type;
    let (ok, expected) = match kind {
        MarkerKind::Execute => (ret.is_void(), wk::VOID),
        MarkerKind::ReturnCondition => (hierarchy.is_assignable(ret, &TypeRef::named(wk::BOOL)), wk::BOOL),
        MarkerKind::Scope => (
            hierarchy.is_assignable(ret, &TypeRef::named(wk::DISPOSABLE)),
            wk::DISPOSABLE,
        ),
    };
    if !ok {
        return Err(DeclarationError::WrongReturnType {
            method: display,
            kind: kind.name(),
            expected,
            found: ret.to_string(),
        });
    }

    let params: Vec<ParameterBindingSpec> = method.params.iter().map(ParameterBindingSpec::from_param).collect();
    let results: Vec<&ParamDef> = method
        .params
        .iter()
        .zip(&params)
        .filter(|(_, spec)| spec.kind == BindingKind::ResultOut)
        .map(|(param, _)| param)
        .collect();
    if results.len() > 1 {
        return Err(DeclarationError::MultipleResults { method: display });
    }
    if let Some(param) = results.first() {
        if kind != MarkerKind::ReturnCondition {
            return Err(DeclarationError::MisplacedResult { method: display });
        }
        if !param.is_out {
            return Err(DeclarationError::ResultNotOut {
                method: display,
                param: param.name.clone(),
            });
        }
    }

    Ok(CandidateMethod {
        method: mref,
        returns: ret.clone(),
        priority: method.target.map_or(0, |t| t.priority),
        params,
    })
}

/// Memoized candidate lists, keyed by marker type.
#[derive(Debug, Default)]
pub struct CandidateRegistry {
    cache: HashMap<String, Vec<CandidateMethod>>,
}

impl CandidateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidates of the descriptor's marker type, best first. Built and
    /// reported on first request, served from the cache afterwards.
    pub fn candidates(
        &mut self,
        module: &Module,
        hierarchy: &TypeHierarchy,
        descriptor: &MarkerDescriptor,
        reporter: &mut Reporter<'_>,
    ) -> &[CandidateMethod] {
        let key = descriptor.marker_type.to_string();
        if !self.cache.contains_key(&key) {
            let built = build(module, hierarchy, &descriptor.marker_type, descriptor.kind, reporter);
            self.cache.insert(key.clone(), built);
        }
        self.cache.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Scan `marker` and its bases. A derived declaration hides a base
/// declaration with the same name and parameter types.
pub fn build(
    module: &Module,
    hierarchy: &TypeHierarchy,
    marker: &TypeRef,
    kind: MarkerKind,
    reporter: &mut Reporter<'_>,
) -> Vec<CandidateMethod> {
    let mut seen: HashSet<(String, Vec<TypeRef>)> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();

    let mut current = module.find_type(&marker.name);
    while let Some(ty) = current {
        if !visited.insert(ty.name.clone()) {
            break;
        }
        for method in ty.methods.iter().filter(|m| m.target.is_some()) {
            if !seen.insert((method.name.clone(), method.param_types())) {
                reporter.debug(format!(
                    "{} is hidden by a derived declaration",
                    method.method_ref(&ty.name)
                ));
                continue;
            }
            match validate(kind, ty, method, hierarchy) {
                Ok(candidate) => {
                    reporter.debug(format!(
                        "Candidate {} (priority {}, arity {}) for @{}",
                        candidate.method,
                        candidate.priority,
                        candidate.arity(),
                        marker
                    ));
                    candidates.push(candidate);
                }
                Err(e) => reporter.error(e.to_string()),
            }
        }
        current = ty.base.as_ref().and_then(|b| module.find_type(&b.name));
    }

    candidates.sort_by_cached_key(|c| {
        (
            Reverse(c.priority),
            Reverse(c.arity()),
            c.method.name.clone(),
            c.method.to_string(),
        )
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diagnostics::{Diagnostics, Severity};

    fn build_for(text: &str, marker: &str, kind: MarkerKind) -> (Vec<CandidateMethod>, Diagnostics) {
        let module = Module::parse(text).unwrap();
        let hierarchy = TypeHierarchy::new(&module);
        let mut sink = Diagnostics::new();
        let built = {
            let mut reporter = Reporter::new(&mut sink, false);
            build(&module, &hierarchy, &TypeRef::named(marker), kind, &mut reporter)
        };
        (built, sink)
    }

    fn names(candidates: &[CandidateMethod]) -> Vec<String> {
        candidates.iter().map(|c| c.method.to_string()).collect()
    }

    #[test]
    fn test_sorted_by_priority_then_arity() {
        let text = r#"
class Log : ExecuteMarker {
  target static method void Run(int a) native
  target static method void Run(int a, int b) native
  target(priority = 5) static method void Low() native
  target static method void Alpha(int a) native
}
"#;
        let (built, sink) = build_for(text, "Log", MarkerKind::Execute);
        assert!(sink.is_empty());
        assert_eq!(
            names(&built),
            vec![
                "Log::Low()",
                "Log::Run(int, int)",
                "Log::Alpha(int)",
                "Log::Run(int)",
            ]
        );
    }

    #[test]
    fn test_invalid_declarations_are_reported_and_excluded() {
        let text = r#"
class Guard : ReturnConditionMarker {
  target method bool Instance() native
  target static method int Wrong() native
  target static method bool Twice(#result out int a, #result out int b) native
  target static method bool NotOut(#result int a) native
  target static method bool Good(#result out int a) native
}
"#;
        let (built, sink) = build_for(text, "Guard", MarkerKind::ReturnCondition);
        assert_eq!(names(&built), vec!["Guard::Good(int)"]);
        assert_eq!(sink.count(Severity::Error), 4);
        assert_eq!(built[0].result_spec().map(|s| s.name.as_str()), Some("a"));
    }

    #[test]
    fn test_kind_specific_return_types() {
        let text = r#"
class Handle impl IDisposable {
}
class Use : ScopeMarker {
  target static method Handle Open() native
  target static method int Bad() native
  target static method Handle WithResult(#result out int a) native
}
"#;
        let (built, sink) = build_for(text, "Use", MarkerKind::Scope);
        assert_eq!(names(&built), vec!["Use::Open()"]);
        let errors: Vec<_> = sink.with_severity(Severity::Error).map(|d| d.message.clone()).collect();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|m| m.contains("return-condition")));
    }

    #[test]
    fn test_inherited_targets_and_hiding() {
        let text = r#"
class Base : ExecuteMarker {
  target static method void Run(int a) native
  target static method void Extra() native
}
class Derived : Base {
  target(priority = 1) static method void Run(int a) native
}
"#;
        let (built, _) = build_for(text, "Derived", MarkerKind::Execute);
        assert_eq!(names(&built), vec!["Derived::Run(int)", "Base::Extra()"]);
        assert_eq!(built[0].priority, 1);
    }

    #[test]
    fn test_binding_specs() {
        let text = r#"
class Log : ExecuteMarker {
  target static method void Run(#arg(x) int a, #field(f) string b, #this object c, #caller string d, int e) native
}
"#;
        let (built, _) = build_for(text, "Log", MarkerKind::Execute);
        let kinds: Vec<_> = built[0].params.iter().map(|p| (p.kind, p.name.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (BindingKind::CallerArgument, "x"),
                (BindingKind::CallerField, "f"),
                (BindingKind::CallerInstance, "c"),
                (BindingKind::CallerMethodName, "d"),
                (BindingKind::Default, "e"),
            ]
        );
    }
}
