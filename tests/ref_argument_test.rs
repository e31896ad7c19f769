//! By-ref candidate parameters: a `ref` parameter binds to a same-named `ref`
//! parameter of the call site, or to the address of a caller field.

use std::cell::RefCell;
use std::rc::Rc;

use ilweave::vm::Address;
use ilweave::{weave, Diagnostics, Module, Value, Vm};

const MODULE: &str = r#"
class MathF {
  static method float Pow(float a, float b) native
}
class Pow1 : ExecuteMarker {
  target static method void Run(float f, float p, ref float result) {
    ldarg result
    ldarg f
    ldarg p
    call MathF::Pow(float, float)
    stind
    ret
  }
}
class Pow2 : ExecuteMarker {
  target static method void Run(float f, float p, #field(m_Result) ref float result, #field(m_Result) ref float result2) {
    ldarg result
    ldarg f
    ldarg p
    call MathF::Pow(float, float)
    stind
    ret
  }
}
class Bump : ExecuteMarker {
  target static method void Run(#field(hits) ref int counter) {
    ldarg counter
    ldarg counter
    ldind
    ldc.i4 1
    add
    stind
    ret
  }
}
class Calc {
  field float m_Result
  static field int hits

  @Pow1
  method void pow1(float f, float p, ref float result) {
    ret
  }
  @Pow2
  method void pow2(float f, float p) {
    ret
  }
  @Bump
  static method void tick() {
    ret
  }
  @Pow1
  method void by_value(float f, float p, float result) {
    ret
  }
  @Pow2
  static method void no_receiver(float f, float p) {
    ret
  }
}
"#;

fn woven() -> Module {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut module = Module::parse(MODULE).unwrap_or_else(|e| panic!("Failed to parse module: {e}"));
    let mut diagnostics = Diagnostics::new();
    let summary = weave(&mut module, &mut diagnostics);
    assert!(!summary.aborted, "weave aborted: {:?}", diagnostics.entries());
    assert_eq!(summary.applied, 3, "{:?}", diagnostics.entries());
    assert_eq!(summary.missed, 2, "{:?}", diagnostics.entries());
    module
}

fn vm(module: &Module) -> Vm<'_> {
    let mut vm = Vm::new(module);
    vm.bind_native("MathF::Pow", |args| match (&args[0], &args[1]) {
        (Value::F32(a), Value::F32(b)) => Ok(Value::F32(a.powf(*b))),
        _ => Ok(Value::Null),
    });
    vm
}

const CASES: [(f32, f32); 4] = [(1.0, 1.0), (2.0, 2.0), (4.0, 2.0), (22.0, 22.0)];

#[test]
fn test_ref_parameter_writes_back_to_caller() {
    let module = woven();
    let mut vm = vm(&module);
    let calc = vm.new_object("Calc").unwrap();
    for (f, p) in CASES {
        let slot = Rc::new(RefCell::new(Value::F32(0.0)));
        let result = Value::Ref(Address::Slot(slot.clone()));
        vm.invoke("Calc", "pow1", vec![calc.clone(), Value::F32(f), Value::F32(p), result])
            .unwrap();
        assert_eq!(*slot.borrow(), Value::F32(f.powf(p)), "pow1({f}, {p})");
    }
}

#[test]
fn test_ref_field_loads_field_address() {
    let module = woven();
    let body = module.find_method("Calc", "pow2").unwrap().body.as_ref().unwrap();
    let printed = module.to_string();
    assert!(printed.contains("ldflda Calc::m_Result"), "{printed}");
    assert!(body.validate().is_ok());

    let mut vm = vm(&module);
    let calc = vm.new_object("Calc").unwrap();
    for (f, p) in CASES {
        vm.invoke("Calc", "pow2", vec![calc.clone(), Value::F32(f), Value::F32(p)])
            .unwrap();
        let Value::Object(object) = &calc else {
            panic!("expected an object, got {calc}");
        };
        let stored = object.borrow().fields.get("m_Result").cloned();
        assert_eq!(stored, Some(Value::F32(f.powf(p))), "pow2({f}, {p})");
    }
}

#[test]
fn test_ref_static_field_updates_in_place() {
    let module = woven();
    assert!(module.to_string().contains("ldsflda Calc::hits"));
    let mut vm = vm(&module);
    for _ in 0..3 {
        vm.invoke("Calc", "tick", Vec::new()).unwrap();
    }
    assert_eq!(vm.static_field("Calc", "hits").unwrap(), Value::I32(3));
}

#[test]
fn test_by_ref_and_by_value_do_not_mix() {
    let module = woven();
    // Neither site was rewritten: a by-value parameter cannot stand in for
    // `ref float result`, and a static site has no receiver for the field.
    for name in ["by_value", "no_receiver"] {
        let body = module.find_method("Calc", name).unwrap().body.as_ref().unwrap();
        assert_eq!(body.len(), 1, "{name}");
    }
}

#[test]
fn test_ref_parameters_survive_printing() {
    let module = woven();
    let printed = module.to_string();
    assert!(printed.contains("ref float result"), "{printed}");
    let reparsed = Module::parse(&printed).unwrap_or_else(|e| panic!("Failed to reparse: {e}\n{printed}"));
    assert_eq!(reparsed.to_string(), printed);
}
