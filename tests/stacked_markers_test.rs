//! Many markers of mixed kinds on one call site, checked against an unwoven
//! copy of the same body.

use ilweave::{weave, Diagnostics, Module, Value, Vm};

const PRELUDE: &str = r#"
class Counter {
  static field int ticks
  static field int acquired
  static field int released
}
class Handle impl IDisposable {
  method void dispose() {
    ldsfld Counter::released
    ldc.i4 1
    add
    stsfld Counter::released
    ret
  }
}
class Tick : ExecuteMarker {
  target static method void Run() {
    ldsfld Counter::ticks
    ldc.i4 1
    add
    stsfld Counter::ticks
    ret
  }
}
class Pass : ReturnConditionMarker {
  target static method bool Check(int x) {
    ldarg x
    ldc.i4 -100
    cgt
    ret
  }
}
class Guard : ScopeMarker {
  target static method Handle Open() {
    ldsfld Counter::acquired
    ldc.i4 1
    add
    stsfld Counter::acquired
    newobj Handle
    ret
  }
}
"#;

/// `x < 0 ? 0 : x * 3 + 7`, failing on `x == 13`.
const BODY: &str = r#"
    ldarg x
    ldc.i4 0
    clt
    brfalse positive
    ldc.i4 0
    ret
  positive:
    ldarg x
    ldc.i4 13
    ceq
    brfalse compute
    ldstr "unlucky"
    throw
  compute:
    ldarg x
    ldc.i4 3
    mul
    ldc.i4 7
    add
    ret
"#;

fn module_with(markers: &[&str]) -> Module {
    let _ = env_logger::builder().is_test(true).try_init();
    let applications: String = markers.iter().map(|m| format!("  @{}\n", m)).collect();
    let text = format!(
        "{PRELUDE}\nclass Work {{\n{applications}  static method int compute(int x) {{\n{BODY}  }}\n  static method int reference(int x) {{\n{BODY}  }}\n}}\n"
    );
    let mut module = Module::parse(&text).unwrap_or_else(|e| panic!("Failed to parse module: {e}"));
    let mut diagnostics = Diagnostics::new();
    let summary = weave(&mut module, &mut diagnostics);
    assert!(!summary.aborted, "weave aborted: {:?}", diagnostics.entries());
    assert!(!diagnostics.has_errors(), "{:?}", diagnostics.entries());
    assert_eq!(summary.applied, markers.len());
    module
}

fn counter(vm: &Vm<'_>, name: &str) -> i32 {
    vm.static_field("Counter", name)
        .ok()
        .and_then(|v| v.as_i32())
        .unwrap_or(-1)
}

#[test]
fn test_thirty_mixed_markers_preserve_result() {
    let kinds = ["Tick", "Pass", "Guard"];
    let markers: Vec<&str> = (0..30).map(|i| kinds[i % kinds.len()]).collect();
    let module = module_with(&markers);
    let mut vm = Vm::new(&module);

    let mut calls = 0;
    for x in [5, -4, 0, 21] {
        let expected = vm.invoke("Work", "reference", vec![Value::I32(x)]).unwrap();
        let actual = vm.invoke("Work", "compute", vec![Value::I32(x)]).unwrap();
        assert_eq!(actual, expected, "compute({x})");
        calls += 1;
    }
    assert!(vm.invoke("Work", "compute", vec![Value::I32(13)]).is_err());
    assert!(vm.invoke("Work", "reference", vec![Value::I32(13)]).is_err());
    calls += 1;

    assert_eq!(counter(&vm, "ticks"), 10 * calls);
    assert_eq!(counter(&vm, "acquired"), 10 * calls);
    assert_eq!(counter(&vm, "released"), 10 * calls);
}

#[test]
fn test_failing_guard_short_circuits_inner_markers() {
    let module = module_with(&["Guard", "Pass", "Tick"]);
    let mut vm = Vm::new(&module);

    // Guard wraps Pass, which wraps Tick: a failing guard skips the tick
    // but the scope around it is still released.
    assert_eq!(vm.invoke("Work", "compute", vec![Value::I32(-200)]).unwrap(), Value::I32(0));
    assert_eq!(counter(&vm, "ticks"), 0);
    assert_eq!(counter(&vm, "acquired"), 1);
    assert_eq!(counter(&vm, "released"), 1);

    assert_eq!(vm.invoke("Work", "compute", vec![Value::I32(1)]).unwrap(), Value::I32(10));
    assert_eq!(counter(&vm, "ticks"), 1);
    assert_eq!(counter(&vm, "released"), 2);
}

#[test]
fn test_counter_matches_invocations() {
    let module = module_with(&["Tick"]);
    let mut vm = Vm::new(&module);
    let inputs = [3, -1, 13, 0, 13, 8];
    for x in inputs {
        let _ = vm.invoke("Work", "compute", vec![Value::I32(x)]);
    }
    assert_eq!(counter(&vm, "ticks"), inputs.len() as i32);
}
