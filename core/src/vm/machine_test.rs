use std::cell::RefCell;
use std::rc::Rc;

use super::*;
use crate::error::{ErrorKind, SourceLoc};
use crate::tac::{Line, Op};
use crate::val::{FuncDef, Param, ValList, ValMap, ValStr, Value};

fn num(n: f64) -> Value {
    Value::Number(n)
}

/// Shared output buffer plus a machine writing into it.
fn machine_with_output(code: Vec<Line>) -> (Machine, Rc<RefCell<String>>) {
    let buffer = Rc::new(RefCell::new(String::new()));
    let sink = Rc::clone(&buffer);
    let machine = Machine::from_code(code, move |text| sink.borrow_mut().push_str(text));
    (machine, buffer)
}

fn run_to_completion(machine: &mut Machine) {
    for _ in 0..10_000 {
        if machine.done() {
            return;
        }
        machine.step().expect("program runs without errors");
    }
    panic!("program did not finish within the step budget");
}

fn root_var(machine: &Machine, name: &str) -> Value {
    machine
        .get_top_context()
        .root_context()
        .get_var(&ValStr::new(name))
        .expect("variable is set")
}

fn print_handler(
    machine: &mut Machine,
    context: &ContextHandle,
    _partial: Option<PartialResult>,
) -> crate::error::Result<IntrinsicResult> {
    let v = context.get_var(&ValStr::new("s"))?;
    machine.print(&v.to_display_string());
    v.unref();
    Ok(IntrinsicResult::null())
}

fn register_print() {
    Intrinsic::create("print")
        .add_param("s", Value::Null)
        .register(print_handler);
}

#[test]
fn test_end_to_end_arithmetic_and_print() {
    register_print();
    let code = vec![
        Line::new(Value::var("x"), Op::AssignA, num(1.0), Value::Null),
        Line::new(Value::temp(1), Op::APlusB, Value::var("x"), num(2.0)),
        Line::new(Value::var("y"), Op::AssignA, Value::temp(1), Value::Null),
        Line::new(Value::Null, Op::PushParam, Value::var("y"), Value::Null),
        Line::new(Value::temp(2), Op::CallFuncA, Value::var("print"), num(1.0)),
    ];
    let (mut machine, output) = machine_with_output(code);
    run_to_completion(&mut machine);
    assert_eq!(&*output.borrow(), "3");
}

#[test]
fn test_call_binds_args_and_defaults() {
    // f = function(a, b=10) return a + b
    let f = FuncDef::new(
        vec![
            Param::new("a"),
            Param::with_default("b", num(10.0)),
        ],
        vec![
            Line::new(Value::temp(1), Op::APlusB, Value::var("a"), Value::var("b")),
            Line::new(Value::temp(0), Op::ReturnA, Value::temp(1), Value::Null),
        ],
    );
    let code = vec![
        Line::new(Value::var("f"), Op::AssignA, Value::Function(f), Value::Null),
        Line::new(Value::Null, Op::PushParam, num(5.0), Value::Null),
        Line::new(Value::temp(1), Op::CallFuncA, Value::var("f"), num(1.0)),
        Line::new(Value::var("r"), Op::AssignA, Value::temp(1), Value::Null),
    ];
    let (mut machine, _) = machine_with_output(code);
    run_to_completion(&mut machine);
    let r = root_var(&machine, "r");
    assert_eq!(r, num(15.0));
}

#[test]
fn test_surplus_arguments_are_rejected() {
    let f = FuncDef::new(vec![Param::new("a")], Vec::new());
    let code = vec![
        Line::new(Value::var("f"), Op::AssignA, Value::Function(f), Value::Null),
        Line::new(Value::Null, Op::PushParam, num(1.0), Value::Null),
        Line::new(Value::Null, Op::PushParam, num(2.0), Value::Null),
        Line::new(Value::temp(1), Op::CallFuncA, Value::var("f"), num(2.0)),
    ];
    let (mut machine, _) = machine_with_output(code);
    let mut failure = None;
    for _ in 0..100 {
        if machine.done() {
            break;
        }
        if let Err(e) = machine.step() {
            failure = Some(e);
            break;
        }
    }
    let err = failure.expect("surplus arguments fail the call");
    assert_eq!(err.kind, ErrorKind::TooManyArguments);
    machine.stop();
    assert!(machine.done());
}

#[test]
fn test_container_literals_never_alias() {
    // The same literal executes twice; each execution must produce a
    // fresh list.
    let literal = ValList::from_values(vec![num(1.0), num(2.0)]);
    let code = vec![
        Line::new(Value::var("x"), Op::AssignA, Value::List(literal.clone()), Value::Null),
        Line::new(Value::var("y"), Op::AssignA, Value::List(literal.clone()), Value::Null),
    ];
    let (mut machine, _) = machine_with_output(code);
    run_to_completion(&mut machine);
    let x = root_var(&machine, "x");
    let y = root_var(&machine, "y");
    match (&x, &y) {
        (Value::List(a), Value::List(b)) => {
            assert!(!a.ptr_eq(b));
            assert!(!a.ptr_eq(&literal));
            // Mutating one copy leaves the other untouched.
            a.push(num(3.0)).unwrap();
            assert_eq!(a.count(), 3);
            assert_eq!(b.count(), 2);
        }
        _ => panic!("expected two lists"),
    }
    x.unref();
    y.unref();
    literal.unref();
}

#[test]
fn test_copy_clones_a_runtime_container() {
    let literal = ValList::from_values(vec![num(1.0), num(2.0)]);
    let code = vec![
        Line::new(Value::var("x"), Op::AssignA, Value::List(literal.clone()), Value::Null),
        Line::new(Value::var("y"), Op::CopyA, Value::var("x"), Value::Null),
    ];
    let (mut machine, _) = machine_with_output(code);
    run_to_completion(&mut machine);
    let x = root_var(&machine, "x");
    let y = root_var(&machine, "y");
    match (&x, &y) {
        (Value::List(a), Value::List(b)) => {
            // A plain assignment would alias; copy must not.
            assert!(!a.ptr_eq(b));
            a.push(num(3.0)).unwrap();
            assert_eq!(a.count(), 3);
            assert_eq!(b.count(), 2);
        }
        _ => panic!("expected two lists"),
    }
    x.unref();
    y.unref();
    literal.unref();
}

#[test]
fn test_goto_truly_lets_fuzzy_values_fall_through() {
    let code = vec![
        Line::new(Value::Null, Op::GotoAifTrulyB, num(3.0), num(0.5)),
        Line::new(Value::var("fell_through"), Op::AssignA, num(1.0), Value::Null),
        Line::new(Value::Null, Op::GotoAifTrulyB, num(4.0), num(1.0)),
        Line::new(Value::var("skipped"), Op::AssignA, num(1.0), Value::Null),
    ];
    let (mut machine, _) = machine_with_output(code);
    run_to_completion(&mut machine);
    assert_eq!(root_var(&machine, "fell_through"), num(1.0));
    // The fully-true jump at line 2 must step over line 3.
    let err = machine
        .get_top_context()
        .get_var(&ValStr::new("skipped"))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UndefinedIdentifier(_)));
}

#[test]
fn test_dot_call_binds_self_through_isa_chain() {
    // describe = function() return self.name
    let describe = FuncDef::new(
        Vec::new(),
        vec![
            Line::new(Value::temp(1), Op::ElemBofA, Value::var("self"), Value::ident("name")),
            Line::new(Value::temp(0), Op::ReturnA, Value::temp(1), Value::Null),
        ],
    );
    let base_literal = ValMap::new();
    base_literal.set_str("describe", Value::Function(describe));
    let code = vec![
        Line::new(Value::var("base"), Op::AssignA, Value::Map(base_literal.clone()), Value::Null),
        Line::new(Value::var("child"), Op::AssignA, Value::Map(ValMap::new()), Value::Null),
        Line::new(
            Value::seq_elem(Value::var("child"), Value::ident("__isa")),
            Op::AssignA,
            Value::var("base"),
            Value::Null,
        ),
        Line::new(
            Value::seq_elem(Value::var("child"), Value::ident("name")),
            Op::AssignA,
            Value::string("Ada"),
            Value::Null,
        ),
        // The method lives on base; the receiver is child.
        Line::new(
            Value::temp(1),
            Op::CallFuncA,
            Value::seq_elem(Value::var("child"), Value::ident("describe")),
            num(0.0),
        ),
        Line::new(Value::var("r"), Op::AssignA, Value::temp(1), Value::Null),
    ];
    let (mut machine, _) = machine_with_output(code);
    run_to_completion(&mut machine);
    let r = root_var(&machine, "r");
    assert_eq!(r.to_display_string(), "Ada");
    r.unref();
    base_literal.unref();
}

fn countdown_handler(
    machine: &mut Machine,
    _context: &ContextHandle,
    partial: Option<PartialResult>,
) -> crate::error::Result<IntrinsicResult> {
    let n = match &partial {
        Some(p) => p.value.as_number()?,
        None => 3.0,
    };
    if n <= 0.0 {
        Ok(IntrinsicResult::done(Value::string("liftoff")))
    } else {
        machine.yield_now();
        Ok(IntrinsicResult::partial(num(n - 1.0)))
    }
}

#[test]
fn test_partial_result_reenters_until_done() {
    Intrinsic::create("countdown").register(countdown_handler);
    let code = vec![
        Line::new(Value::temp(1), Op::CallFuncA, Value::var("countdown"), num(0.0)),
        Line::new(Value::var("r"), Op::AssignA, Value::temp(1), Value::Null),
    ];
    let (mut machine, _) = machine_with_output(code);
    let mut yields = 0;
    for _ in 0..100 {
        if machine.done() {
            break;
        }
        machine.step().unwrap();
        if machine.yielding() {
            yields += 1;
        }
    }
    assert!(machine.done());
    assert_eq!(yields, 3);
    let r = root_var(&machine, "r");
    assert_eq!(r.to_display_string(), "liftoff");
}

#[test]
fn test_stop_unwinds_to_root() {
    // spin = function() ... goto 0 ...
    let spin = FuncDef::new(
        Vec::new(),
        vec![Line::new(Value::Null, Op::GotoA, num(0.0), Value::Null)],
    );
    let code = vec![
        Line::new(Value::var("spin"), Op::AssignA, Value::Function(spin), Value::Null),
        Line::new(Value::temp(1), Op::CallFuncA, Value::var("spin"), num(0.0)),
    ];
    let (mut machine, _) = machine_with_output(code);
    let root = machine.get_top_context();
    for _ in 0..10 {
        machine.step().unwrap();
    }
    assert!(!machine.get_top_context().ptr_eq(&root));
    machine.stop();
    assert!(machine.get_top_context().ptr_eq(&root));
    assert!(machine.done());
}

#[test]
fn test_manual_call_stores_result() {
    let f = FuncDef::new(
        Vec::new(),
        vec![Line::new(Value::temp(0), Op::ReturnA, num(42.0), Value::Null)],
    );
    let (mut machine, _) = machine_with_output(Vec::new());
    machine
        .manually_push_call(f, Vec::new(), Some(Value::var("r")))
        .unwrap();
    run_to_completion(&mut machine);
    let r = root_var(&machine, "r");
    assert_eq!(r, num(42.0));
}

#[test]
fn test_reset_allows_a_clean_rerun() {
    let code = vec![Line::new(Value::var("n"), Op::AssignA, num(7.0), Value::Null)];
    let (mut machine, _) = machine_with_output(code);
    run_to_completion(&mut machine);
    assert_eq!(root_var(&machine, "n"), num(7.0));
    machine.reset();
    assert!(!machine.done());
    // Locals were cleared by the reset.
    let err = machine
        .get_top_context()
        .get_var(&ValStr::new("n"))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UndefinedIdentifier(_)));
    run_to_completion(&mut machine);
    assert_eq!(root_var(&machine, "n"), num(7.0));
}

#[test]
fn test_step_errors_carry_the_source_location() {
    let code = vec![
        Line::new(Value::temp(1), Op::APlusB, Value::var("missing"), num(1.0))
            .at(SourceLoc::line(7)),
    ];
    let (mut machine, _) = machine_with_output(code);
    let err = machine.step().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UndefinedIdentifier(_)));
    assert_eq!(err.location, Some(SourceLoc::line(7)));
}

#[test]
fn test_implicit_results_are_captured_only_in_repl_mode() {
    let code = vec![Line::new(Value::Null, Op::AssignImplicit, num(9.0), Value::Null)];
    let (mut machine, _) = machine_with_output(code.clone());
    run_to_completion(&mut machine);
    assert!(machine
        .get_top_context()
        .get_var(&ValStr::new("_"))
        .is_err());

    let (mut machine, _) = machine_with_output(code);
    machine.store_implicit = true;
    run_to_completion(&mut machine);
    assert_eq!(root_var(&machine, "_"), num(9.0));
}
