// This module is the weaving driver. It walks every method of a module (outer types
// before nested ones), extracts the descriptors of the markers applied to it and
// processes them in reverse declaration order on a working copy of the body: registry
// lookup, argument binding, then the rewriter of the marker's kind. The copy replaces
// the method body only when every marker of the method went through, so a structural
// failure leaves the failing method untouched while methods woven before it keep
// their output. Such a failure aborts the rest of the run and is reported as an
// exception diagnostic; match misses are reported at debug level and skipped.

//! Weaving pipeline.

pub mod binder;
pub mod descriptor;
pub mod registry;
pub mod return_shape;
pub mod rewrite;

pub use binder::{ArgSource, ArgumentBinder, Binding, CallSite};
pub use descriptor::{MarkerDescriptor, MarkerKind};
pub use registry::{BindingKind, CandidateMethod, CandidateRegistry, ParameterBindingSpec};
pub use return_shape::{ReturnShape, ReturnShapeTable, ShapeInput};

use crate::core::config::WeaveConfig;
use crate::core::diagnostics::{DiagnosticSink, Reporter};
use crate::core::error::WeaveResult;
use crate::ir::{Body, Module, TypeHierarchy};

/// Outcome counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeaveSummary {
    /// Methods carrying at least one marker.
    pub call_sites: usize,
    /// Marker applications that were woven.
    pub applied: usize,
    /// Marker applications no candidate matched.
    pub missed: usize,
    /// A structural failure stopped the run early.
    pub aborted: bool,
}

/// Owns the candidate cache and the diagnostics front end for a run.
pub struct Weaver<'s> {
    config: WeaveConfig,
    registry: CandidateRegistry,
    reporter: Reporter<'s>,
}

impl<'s> Weaver<'s> {
    pub fn new(config: WeaveConfig, sink: &'s mut dyn DiagnosticSink) -> Self {
        let reporter = Reporter::new(sink, config.record_debug);
        Self {
            config,
            registry: CandidateRegistry::new(),
            reporter,
        }
    }

    pub fn registry(&self) -> &CandidateRegistry {
        &self.registry
    }

    /// Weave every annotated method of `module` in place.
    pub fn run(&mut self, module: &mut Module) -> WeaveSummary {
        let hierarchy = TypeHierarchy::new(module);
        let mut summary = WeaveSummary::default();
        if let Err(e) = self.weave_module(module, &hierarchy, &mut summary) {
            self.reporter.exception(&e);
            summary.aborted = true;
        }
        log::info!(
            "Woven {} of {} marker applications on {} call sites{}",
            summary.applied,
            summary.applied + summary.missed,
            summary.call_sites,
            if summary.aborted { " (aborted)" } else { "" }
        );
        summary
    }

    fn weave_module(
        &mut self,
        module: &mut Module,
        hierarchy: &TypeHierarchy,
        summary: &mut WeaveSummary,
    ) -> WeaveResult<()> {
        for loc in module.method_locations() {
            let (owner, method) = module.method_at(&loc)?;
            if method.markers.is_empty() {
                continue;
            }
            let descriptors: Vec<MarkerDescriptor> = method
                .markers
                .iter()
                .filter_map(|app| descriptor::extract(module, hierarchy, app, &mut self.reporter))
                .collect();
            if descriptors.is_empty() {
                continue;
            }
            summary.call_sites += 1;

            let site =
                CallSite::capture(owner, method).map_err(|e| e.at(format!("{}::{}", owner.name, method.name)))?;
            let Some(original) = &method.body else {
                self.reporter.debug(format!("{} has no body to weave", site.display_name()));
                continue;
            };
            self.reporter.debug(format!(
                "Weaving {} ({} markers)",
                site.display_name(),
                descriptors.len()
            ));

            let mut body = original.clone();
            body.validate().map_err(|e| e.at(site.display_name()))?;
            for desc in descriptors.iter().rev() {
                if self.weave_marker(module, hierarchy, &site, desc, &mut body)? {
                    summary.applied += 1;
                } else {
                    summary.missed += 1;
                }
            }
            module.method_at_mut(&loc)?.body = Some(body);
        }
        Ok(())
    }

    /// Apply one marker to `body`. `Ok(false)` on a match miss.
    fn weave_marker(
        &mut self,
        module: &Module,
        hierarchy: &TypeHierarchy,
        site: &CallSite,
        desc: &MarkerDescriptor,
        body: &mut Body,
    ) -> WeaveResult<bool> {
        let binding = {
            let candidates = self.registry.candidates(module, hierarchy, desc, &mut self.reporter);
            ArgumentBinder::new(hierarchy).select(candidates, site, desc)
        };
        let Some(binding) = binding else {
            let target = desc
                .target
                .as_ref()
                .map(|t| format!(" named '{}'", t))
                .unwrap_or_default();
            self.reporter.debug(format!(
                "No injection target{} of @{} matches {}",
                target,
                desc.marker_type,
                site.display_name()
            ));
            return Ok(false);
        };

        self.reporter.debug(format!(
            "{}: @{} -> {}",
            site.display_name(),
            desc.marker_type,
            binding.candidate.method
        ));
        let applied = match desc.kind {
            MarkerKind::Execute => rewrite::execute::rewrite(body, &binding, site),
            MarkerKind::ReturnCondition => rewrite::return_condition::rewrite(
                body,
                &binding,
                site,
                &self.config.return_shapes,
                hierarchy,
                &mut self.reporter,
            ),
            MarkerKind::Scope => rewrite::scope::rewrite(body, &binding, site, hierarchy),
        };
        applied.map_err(|e| e.at(site.display_name()))?;
        Ok(true)
    }
}

/// Weave `module` with the default configuration.
pub fn weave(module: &mut Module, sink: &mut dyn DiagnosticSink) -> WeaveSummary {
    weave_with(module, WeaveConfig::default(), sink)
}

pub fn weave_with(module: &mut Module, config: WeaveConfig, sink: &mut dyn DiagnosticSink) -> WeaveSummary {
    Weaver::new(config, sink).run(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diagnostics::{Diagnostics, Severity};
    use crate::ir::Opcode;

    #[test]
    fn test_reverse_declaration_order() {
        let text = r#"
class A : ExecuteMarker {
  target static method void Run() native
}
class B : ExecuteMarker {
  target static method void Run() native
}
class W {
  @A
  @B
  static method void f() {
    ret
  }
}
"#;
        let mut module = Module::parse(text).unwrap();
        let mut sink = Diagnostics::new();
        let summary = weave(&mut module, &mut sink);
        assert_eq!(
            summary,
            WeaveSummary {
                call_sites: 1,
                applied: 2,
                missed: 0,
                aborted: false
            }
        );
        let ops = module.find_method("W", "f").unwrap().body.as_ref().unwrap().ops();
        assert_eq!(
            ops,
            vec![
                Opcode::Call(crate::ir::MethodRef::new("A", "Run", vec![])),
                Opcode::Call(crate::ir::MethodRef::new("B", "Run", vec![])),
                Opcode::Ret,
            ]
        );
    }

    #[test]
    fn test_miss_leaves_body_and_is_debug_only() {
        let text = r#"
class A : ExecuteMarker {
  target static method void Run(int level) native
}
class W {
  @A
  static method void f() {
    ret
  }
}
"#;
        let mut module = Module::parse(text).unwrap();
        let before = module.clone();
        let mut sink = Diagnostics::new();
        let summary = weave_with(&mut module, WeaveConfig::new().with_debug(true), &mut sink);
        assert_eq!(summary.missed, 1);
        assert_eq!(module, before);
        assert!(!sink.has_errors());
        assert!(sink
            .with_severity(Severity::Debug)
            .any(|d| d.message.contains("No injection target")));
    }

    #[test]
    fn test_structural_failure_aborts_and_keeps_earlier_output() {
        let text = r#"
class A : ExecuteMarker {
  target static method void Run() native
}
class W {
  @A
  static method void good() {
    ret
  }
  @A
  static method void bad() {
    ret
  }
  @A
  static method void later() {
    ret
  }
}
"#;
        let mut module = Module::parse(text).unwrap();
        // Corrupt `bad` with a branch to an instruction that does not exist.
        let bad = module.types[1].methods[1].body.as_mut().unwrap();
        let first = bad.first().unwrap();
        bad.insert_before(first, Opcode::Br(crate::ir::InstId::from_index(40)))
            .unwrap();
        let bad_before = module.types[1].methods[1].clone();

        let mut sink = Diagnostics::new();
        let summary = weave(&mut module, &mut sink);
        assert!(summary.aborted);
        assert_eq!(summary.applied, 1);
        assert_eq!(sink.count(Severity::Exception), 1);
        assert!(sink.entries()[0].message.starts_with("While weaving W::bad"));

        assert_eq!(module.types[1].methods[0].body.as_ref().unwrap().len(), 2);
        assert_eq!(module.types[1].methods[1], bad_before);
        assert_eq!(module.types[1].methods[2].body.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_registry_is_built_once_per_marker_type() {
        let text = r#"
class A : ExecuteMarker {
  target method void Broken() native
  target static method void Run() native
}
class W {
  @A
  static method void f() { ret }
  @A
  static method void g() { ret }
}
"#;
        let mut module = Module::parse(text).unwrap();
        let mut sink = Diagnostics::new();
        let mut weaver = Weaver::new(WeaveConfig::default(), &mut sink);
        let summary = weaver.run(&mut module);
        assert_eq!(summary.applied, 2);
        assert_eq!(weaver.registry().len(), 1);
        drop(weaver);
        // The declaration error is reported once, not once per call site.
        assert_eq!(sink.count(Severity::Error), 1);
        assert_eq!(module.find_method("W", "g").unwrap().body.as_ref().unwrap().len(), 2);
    }
}
