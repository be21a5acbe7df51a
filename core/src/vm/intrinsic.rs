use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::tac::{Line, Op};
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{FuncDef, Param, Value};
use crate::vm::context::ContextHandle;
use crate::vm::machine::Machine;

/// What one intrinsic invocation produced. `done == false` means the
/// intrinsic is mid-operation: `value` is an opaque resume token the
/// machine hands back on re-execution, not a script-visible result.
#[derive(Debug)]
pub struct IntrinsicResult {
    pub value: Value,
    pub done: bool,
}

impl IntrinsicResult {
    pub fn done(value: Value) -> Self {
        Self { value, done: true }
    }

    pub fn null() -> Self {
        Self::done(Value::Null)
    }

    pub fn partial(token: Value) -> Self {
        Self {
            value: token,
            done: false,
        }
    }
}

/// The in-flight token as the frame carries it between steps.
pub type PartialResult = IntrinsicResult;

/// Host function backing an intrinsic. Runs in the calling frame: bound
/// arguments are read back out of `context` by name. Receives the resume
/// token when the previous invocation reported not-done.
pub type IntrinsicFn =
    fn(&mut Machine, &ContextHandle, Option<PartialResult>) -> Result<IntrinsicResult>;

struct Registry {
    list: Vec<Rc<Intrinsic>>,
    by_name: FastHashMap<String, u16>,
}

thread_local! {
    // Pools and machines are per-thread; so is the registry.
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry {
        list: Vec::new(),
        by_name: fast_hash_map_new(),
    });
}

/// A named host function callable from script code.
///
/// Each intrinsic is wrapped in a `FuncDef` whose body is a single
/// call-intrinsic line, so argument binding, defaults, and the return
/// protocol all go through the ordinary call machinery.
pub struct Intrinsic {
    name: String,
    id: u16,
    func: Rc<FuncDef>,
    handler: IntrinsicFn,
}

impl Intrinsic {
    /// Start building an intrinsic. Finish with `IntrinsicBuilder::register`.
    pub fn create(name: &str) -> IntrinsicBuilder {
        IntrinsicBuilder {
            name: name.to_string(),
            params: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// The callable wrapper; this is what variable lookup hands out.
    #[inline]
    pub fn func(&self) -> Rc<FuncDef> {
        Rc::clone(&self.func)
    }

    #[inline]
    pub(crate) fn handler(&self) -> IntrinsicFn {
        self.handler
    }

    pub fn get_by_name(name: &str) -> Option<Rc<Intrinsic>> {
        REGISTRY.with(|r| {
            let reg = r.borrow();
            let id = *reg.by_name.get(name)?;
            reg.list.get(id as usize).map(Rc::clone)
        })
    }

    pub fn get_by_id(id: u16) -> Option<Rc<Intrinsic>> {
        REGISTRY.with(|r| r.borrow().list.get(id as usize).map(Rc::clone))
    }
}

pub struct IntrinsicBuilder {
    name: String,
    params: Vec<Param>,
}

impl IntrinsicBuilder {
    pub fn add_param(mut self, name: &str, default: Value) -> Self {
        self.params.push(Param::with_default(name, default));
        self
    }

    /// Build the wrapper `FuncDef` and publish the intrinsic. Registering
    /// a name again replaces the previous handler under the same id.
    pub fn register(self, handler: IntrinsicFn) -> Rc<Intrinsic> {
        REGISTRY.with(|r| {
            let mut reg = r.borrow_mut();
            let id = match reg.by_name.get(self.name.as_str()) {
                Some(id) => *id,
                None => reg.list.len() as u16,
            };
            let code = vec![Line::new(
                Value::temp(0),
                Op::CallIntrinsicA,
                Value::Number(id as f64),
                Value::Null,
            )];
            let intrinsic = Rc::new(Intrinsic {
                name: self.name.clone(),
                id,
                func: FuncDef::new(self.params, code),
                handler,
            });
            if (id as usize) < reg.list.len() {
                reg.list[id as usize] = Rc::clone(&intrinsic);
            } else {
                reg.list.push(Rc::clone(&intrinsic));
            }
            reg.by_name.insert(self.name, id);
            intrinsic
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(
        _machine: &mut Machine,
        _context: &ContextHandle,
        _partial: Option<PartialResult>,
    ) -> Result<IntrinsicResult> {
        Ok(IntrinsicResult::null())
    }

    #[test]
    fn test_register_and_look_up() {
        let intr = Intrinsic::create("reg_lookup_demo")
            .add_param("a", Value::Null)
            .add_param("b", Value::Number(10.0))
            .register(noop);
        let by_name = Intrinsic::get_by_name("reg_lookup_demo").unwrap();
        assert_eq!(by_name.id(), intr.id());
        let by_id = Intrinsic::get_by_id(intr.id()).unwrap();
        assert_eq!(by_id.name(), "reg_lookup_demo");
    }

    #[test]
    fn test_wrapper_body_is_one_intrinsic_call() {
        let intr = Intrinsic::create("wrapper_shape_demo").register(noop);
        let func = intr.func();
        assert_eq!(func.code.len(), 1);
        let line = &func.code[0];
        assert_eq!(line.op, Op::CallIntrinsicA);
        assert_eq!(line.a, Value::Number(intr.id() as f64));
    }

    #[test]
    fn test_reregistering_keeps_the_id() {
        let first = Intrinsic::create("rereg_demo").register(noop);
        let second = Intrinsic::create("rereg_demo")
            .add_param("x", Value::Null)
            .register(noop);
        assert_eq!(first.id(), second.id());
        let current = Intrinsic::get_by_id(first.id()).unwrap();
        assert_eq!(current.func().params.len(), 1);
    }
}
