use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use tacvm_core::val::{FuncDef, ValMap, ValStr};
use tacvm_core::vm::{ContextHandle, Intrinsic, IntrinsicResult, PartialResult};
use tacvm_core::{Line, Machine, Op, Value};

/// Run hand-assembled TAC demo programs on the tacvm core.
///
/// The core executes pre-compiled three-address code; this binary stands in
/// for the compiler by assembling a few small programs directly and then
/// driving the step loop the way an embedding host would.
#[derive(Parser)]
#[command(name = "tacvm", version)]
struct Args {
    /// Demo program to run.
    #[arg(value_enum, default_value = "hello")]
    demo: Demo,

    /// Print the TAC listing before running.
    #[arg(long)]
    dump: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Demo {
    /// x = 1; y = x + 2; print y
    Hello,
    /// Count from 1 to 5, printing each number.
    Count,
    /// Prototype-chain method dispatch through `__isa`.
    Object,
    /// Cooperative waiting via the partial-result protocol.
    Wait,
}

fn num(n: f64) -> Value {
    Value::Number(n)
}

fn print_handler(
    machine: &mut Machine,
    context: &ContextHandle,
    _partial: Option<PartialResult>,
) -> tacvm_core::Result<IntrinsicResult> {
    let v = context.get_var(&ValStr::new("s"))?;
    machine.print(&v.to_display_string());
    machine.print("\n");
    v.unref();
    Ok(IntrinsicResult::null())
}

fn time_handler(
    machine: &mut Machine,
    _context: &ContextHandle,
    _partial: Option<PartialResult>,
) -> tacvm_core::Result<IntrinsicResult> {
    Ok(IntrinsicResult::done(num(machine.run_time())))
}

/// First invocation computes a deadline and yields; re-invocations keep
/// yielding until the machine clock passes it.
fn wait_handler(
    machine: &mut Machine,
    context: &ContextHandle,
    partial: Option<PartialResult>,
) -> tacvm_core::Result<IntrinsicResult> {
    let deadline = match partial {
        Some(p) => p.value.as_number()?,
        None => {
            let seconds = context.get_var(&ValStr::new("seconds"))?;
            machine.run_time() + seconds.as_number()?
        }
    };
    if machine.run_time() >= deadline {
        Ok(IntrinsicResult::null())
    } else {
        machine.yield_now();
        Ok(IntrinsicResult::partial(num(deadline)))
    }
}

fn register_intrinsics() {
    Intrinsic::create("print")
        .add_param("s", Value::Null)
        .register(print_handler);
    Intrinsic::create("time").register(time_handler);
    Intrinsic::create("wait")
        .add_param("seconds", num(1.0))
        .register(wait_handler);
}

fn print_line(value: Value) -> Vec<Line> {
    vec![
        Line::new(Value::Null, Op::PushParam, value, Value::Null),
        Line::new(Value::temp(15), Op::CallFuncA, Value::var("print"), num(1.0)),
    ]
}

fn hello_program() -> Vec<Line> {
    let mut code = vec![
        Line::new(Value::var("x"), Op::AssignA, num(1.0), Value::Null),
        Line::new(Value::temp(1), Op::APlusB, Value::var("x"), num(2.0)),
        Line::new(Value::var("y"), Op::AssignA, Value::temp(1), Value::Null),
    ];
    code.extend(print_line(Value::var("y")));
    code
}

// i = 1; while i <= 5: print i; i = i + 1
fn count_program() -> Vec<Line> {
    let mut code = vec![Line::new(Value::var("i"), Op::AssignA, num(1.0), Value::Null)];
    code.extend(print_line(Value::var("i")));
    code.extend(vec![
        Line::new(Value::temp(1), Op::APlusB, Value::var("i"), num(1.0)),
        Line::new(Value::var("i"), Op::AssignA, Value::temp(1), Value::Null),
        Line::new(Value::temp(2), Op::ALessOrEqualB, Value::var("i"), num(5.0)),
        Line::new(Value::Null, Op::GotoAifB, num(1.0), Value::temp(2)),
    ]);
    code
}

// base = {describe: function() return "I am " + self.name}
// child = {__isa: base, name: "tac"}
// print child.describe()
fn object_program() -> Vec<Line> {
    let describe = FuncDef::new(
        Vec::new(),
        vec![
            Line::new(Value::temp(1), Op::ElemBofA, Value::var("self"), Value::ident("name")),
            Line::new(Value::temp(2), Op::APlusB, Value::string("I am "), Value::temp(1)),
            Line::new(Value::temp(0), Op::ReturnA, Value::temp(2), Value::Null),
        ],
    );
    let base_literal = ValMap::new();
    base_literal.set_str("describe", Value::Function(describe));
    let mut code = vec![
        Line::new(Value::var("base"), Op::AssignA, Value::Map(base_literal), Value::Null),
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
            Value::string("tac"),
            Value::Null,
        ),
        Line::new(
            Value::temp(1),
            Op::CallFuncA,
            Value::seq_elem(Value::var("child"), Value::ident("describe")),
            num(0.0),
        ),
    ];
    code.extend(print_line(Value::temp(1)));
    code
}

// print "tick"; wait 0.2; print "tock at " + time
fn wait_program() -> Vec<Line> {
    let mut code = print_line(Value::string("tick"));
    code.extend(vec![
        Line::new(Value::Null, Op::PushParam, num(0.2), Value::Null),
        Line::new(Value::temp(1), Op::CallFuncA, Value::var("wait"), num(1.0)),
        Line::new(Value::temp(2), Op::CallFuncA, Value::var("time"), num(0.0)),
        Line::new(Value::temp(3), Op::APlusB, Value::string("tock at "), Value::temp(2)),
    ]);
    code.extend(print_line(Value::temp(3)));
    code
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    register_intrinsics();

    let code = match args.demo {
        Demo::Hello => hello_program(),
        Demo::Count => count_program(),
        Demo::Object => object_program(),
        Demo::Wait => wait_program(),
    };
    let mut machine = Machine::from_code(code, |text| print!("{text}"));
    if args.dump {
        print!("{}", machine.dump());
    }

    let mut steps = 0u64;
    while !machine.done() {
        machine.step()?;
        steps += 1;
        if machine.yielding() {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
    tracing::debug!(steps, run_time = machine.run_time(), "program finished");
    Ok(())
}
