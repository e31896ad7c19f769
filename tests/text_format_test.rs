//! Woven modules printed in the text format parse back to modules that print
//! and behave the same.

use ilweave::{weave, Diagnostics, Module, Value, Vm};

const SOURCE: &str = r#"
; Everything the rewriters produce: injected calls, guards with out-results,
; scopes with staged return values and pinned regions.
class Counter {
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
class Log : ExecuteMarker {
  ctor(bind("tag") string label)
  target static method void Write(string tag, #caller string name) native
}
class Cached : ReturnConditionMarker {
  target static method bool Lookup(int key, #result out int value) {
    ldarg key
    ldc.i4 0
    cgt
    brfalse miss
    ldarg value
    ldarg key
    stind
    ldc.bool false
    ret
  miss:
    ldc.bool true
    ret
  }
}
class Guard : ScopeMarker {
  target static method Handle Open() {
    newobj Handle
    ret
  }
}
class Work {
  @Log("work")
  @Guard
  @Cached
  static method int run(int key) {
    .try body handler catch handler end
  body:
    ldc.i4 100
    ldarg key
    ldc.i4 -5
    sub
    div
    ret
  handler:
    pop
    ldc.i4 -1
    ret
  }
}
"#;

fn woven() -> Module {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut module = Module::parse(SOURCE).unwrap_or_else(|e| panic!("Failed to parse module: {e}"));
    let mut diagnostics = Diagnostics::new();
    let summary = weave(&mut module, &mut diagnostics);
    assert_eq!(summary.applied, 3, "{:?}", diagnostics.entries());
    module
}

fn run(module: &Module, key: i32) -> (Value, Vec<String>, Value) {
    let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = log.clone();
    let mut vm = Vm::new(module);
    vm.bind_native("Log::Write", move |args| {
        let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        sink.borrow_mut().push(rendered.join(" "));
        Ok(Value::Void)
    });
    let result = vm.invoke("Work", "run", vec![Value::I32(key)]).unwrap();
    let released = vm.static_field("Counter", "released").unwrap();
    let entries = log.borrow().clone();
    (result, entries, released)
}

#[test]
fn test_printed_module_is_stable() {
    let module = woven();
    let printed = module.to_string();
    let reparsed = Module::parse(&printed).unwrap_or_else(|e| panic!("Failed to reparse: {e}\n{printed}"));
    assert_eq!(reparsed.to_string(), printed);
    assert!(printed.contains(".try"), "{printed}");
    assert!(printed.contains("finally"), "{printed}");
}

#[test]
fn test_reparsed_module_behaves_the_same() {
    let module = woven();
    let reparsed = Module::parse(&module.to_string()).unwrap();
    for key in [3, -5, 0, -1] {
        assert_eq!(run(&module, key), run(&reparsed, key), "run({key})");
    }

    let (result, log, released) = run(&module, -5);
    assert_eq!(result, Value::I32(-1));
    assert_eq!(log, vec![r#""work" "run""#]);
    assert_eq!(released, Value::I32(1));

    // A cache hit leaves through the guard, still inside the scope.
    let (result, _, released) = run(&module, 3);
    assert_eq!(result, Value::I32(3));
    assert_eq!(released, Value::I32(1));

    let (result, _, _) = run(&module, -1);
    assert_eq!(result, Value::I32(25));
}
