use std::rc::Rc;

use crate::error::{ErrorKind, Result, RuntimeError};
use crate::tac::Line;
use crate::val::pool::{Handle, Pool, PoolKind};
use crate::val::{BuiltinId, FuncDef, ValMap, ValStr, Value};
use crate::vm::intrinsic::{Intrinsic, PartialResult};

/// One activation record: the code being executed, a cursor into it, and
/// everything the frame owns while it runs. Contexts are pooled; a frame
/// popped from the machine's stack goes back to the free list once its
/// last count drops.
#[derive(Debug, Default)]
pub struct Context {
    pub(crate) code: Rc<Vec<Line>>,
    pub(crate) line_num: usize,
    /// Local variable map, created on first write.
    pub(crate) variables: Option<ValMap>,
    /// Enclosing lexical scope when running a closure body.
    pub(crate) outer_vars: Option<ValMap>,
    /// Arguments pushed by `PushParam`, waiting for the next call.
    pub(crate) args: Vec<Value>,
    /// The calling frame. Shares the stack's handle without owning a
    /// count; parents outlive their children on the stack.
    pub(crate) parent: Option<ContextHandle>,
    /// Where the caller wants this frame's return value stored.
    pub(crate) result_storage: Option<Value>,
    /// Temp slots; slot 0 is the return value.
    pub(crate) temps: Vec<Value>,
    /// Resume token of an intrinsic that reported not-done.
    pub(crate) partial_result: Option<PartialResult>,
    /// How many bare-expression results this frame has captured.
    pub(crate) implicit_count: usize,
}

impl PoolKind for Context {
    const KIND: &'static str = "context";

    fn recycle(&mut self) {
        self.code = Rc::new(Vec::new());
        self.line_num = 0;
        if let Some(vars) = self.variables.take() {
            vars.unref();
        }
        if let Some(outer) = self.outer_vars.take() {
            outer.unref();
        }
        for arg in self.args.drain(..) {
            arg.unref();
        }
        self.parent = None;
        self.result_storage = None;
        for temp in self.temps.drain(..) {
            temp.unref();
        }
        if let Some(partial) = self.partial_result.take() {
            partial.value.unref();
        }
        self.implicit_count = 0;
    }

    fn with_pool<R>(f: impl FnOnce(&Pool<Self>) -> R) -> R {
        thread_local! {
            static POOL: Pool<Context> = Pool::new();
        }
        POOL.with(f)
    }
}

impl Context {
    /// A fresh root frame over `code`, count 1, no parent.
    pub fn root(code: Vec<Line>) -> ContextHandle {
        let handle = ContextHandle::acquire();
        handle.borrow_mut().code = Rc::new(code);
        handle
    }

    /// The locals map, created on first use. Returns an uncounted clone of
    /// the handle; the context keeps the owning count.
    fn locals(&mut self) -> ValMap {
        match &self.variables {
            Some(vars) => vars.clone(),
            None => {
                let vars = ValMap::new();
                self.variables = Some(vars.clone());
                vars
            }
        }
    }
}

/// Pooled, counted handle to a call frame.
pub type ContextHandle = Handle<Context>;

impl Handle<Context> {
    /// Walk the parent chain to the root frame.
    pub fn root_context(&self) -> ContextHandle {
        let mut current = self.clone();
        loop {
            let parent = current.borrow().parent.clone();
            match parent {
                Some(p) => current = p,
                None => return current,
            }
        }
    }

    /// Owned (+1) handle to this frame's locals map.
    pub fn locals_map(&self) -> ValMap {
        let map = self.borrow_mut().locals();
        map.ref_();
        map
    }

    #[inline]
    pub fn finished(&self) -> bool {
        let c = self.borrow();
        c.line_num >= c.code.len()
    }

    /// Variable read, owned result. Resolution order: the scope
    /// pseudo-variables, this frame's locals, the enclosing closure scope,
    /// root globals, then the intrinsic registry by name.
    pub fn get_var(&self, name: &ValStr) -> Result<Value> {
        match name.builtin() {
            Some(BuiltinId::Locals) => return Ok(Value::Map(self.locals_map())),
            Some(BuiltinId::Globals) => return Ok(Value::Map(self.root_context().locals_map())),
            Some(BuiltinId::Outer) => {
                let outer = self.borrow().outer_vars.clone();
                return Ok(Value::Map(match outer {
                    Some(o) => {
                        o.ref_();
                        o
                    }
                    None => self.root_context().locals_map(),
                }));
            }
            _ => {}
        }
        let key = Value::Str(name.clone());
        let (vars, outer) = {
            let c = self.borrow();
            (c.variables.clone(), c.outer_vars.clone())
        };
        if let Some(vars) = vars {
            if let Some(v) = vars.get_local(&key) {
                return Ok(v);
            }
        }
        if let Some(outer) = outer {
            if let Some(v) = outer.get_local(&key) {
                return Ok(v);
            }
        }
        let root = self.root_context();
        if !root.ptr_eq(self) {
            let globals = root.borrow().variables.clone();
            if let Some(globals) = globals {
                if let Some(v) = globals.get_local(&key) {
                    return Ok(v);
                }
            }
        }
        if let Some(intrinsic) = Intrinsic::get_by_name(name.as_str()) {
            return Ok(Value::Function(intrinsic.func()));
        }
        Err(RuntimeError::undefined(name.as_str()))
    }

    /// Store an owned value under `name` in this frame's locals. The scope
    /// pseudo-variables are read-only.
    pub fn set_var(&self, name: &ValStr, value: Value) -> Result<()> {
        if matches!(
            name.builtin(),
            Some(BuiltinId::Locals | BuiltinId::Globals | BuiltinId::Outer)
        ) {
            value.unref();
            return Err(RuntimeError::type_mismatch(format!(
                "cannot assign to {}",
                name.as_str()
            )));
        }
        let locals = self.borrow_mut().locals();
        locals.set(Value::Str(name.clone()), value);
        Ok(())
    }

    /// Owned temp read; an unwritten slot reads as null.
    pub fn get_temp(&self, slot: usize) -> Value {
        let c = self.borrow();
        match c.temps.get(slot) {
            Some(v) => {
                v.ref_();
                v.clone()
            }
            None => Value::Null,
        }
    }

    /// Store an owned value in a temp slot, releasing the displaced one.
    pub fn set_temp(&self, slot: usize, value: Value) {
        let mut c = self.borrow_mut();
        if c.temps.len() <= slot {
            c.temps.resize(slot + 1, Value::Null);
        }
        let old = std::mem::replace(&mut c.temps[slot], value);
        old.unref();
    }

    /// Move a temp out, leaving null. Count transfers to the caller.
    pub(crate) fn take_temp(&self, slot: usize) -> Value {
        let mut c = self.borrow_mut();
        match c.temps.get_mut(slot) {
            Some(v) => std::mem::replace(v, Value::Null),
            None => Value::Null,
        }
    }

    /// Queue an owned argument for the next call from this frame.
    pub fn push_arg(&self, value: Value) {
        self.borrow_mut().args.push(value);
    }

    /// Build the callee frame for `func`: consume the `arg_count` most
    /// recently pushed arguments and bind them to declared parameters in
    /// push order, fill missing trailing parameters from their defaults,
    /// and reject surplus arguments. A receiver binds as `self`; when the
    /// first declared parameter is literally named `self` it consumes the
    /// receiver slot and positional binding starts after it.
    ///
    /// All `Option` inputs are owned and consumed, error or not.
    pub fn next_call_context(
        &self,
        func: &Rc<FuncDef>,
        arg_count: usize,
        self_value: Option<Value>,
        super_value: Option<Value>,
        outer: Option<ValMap>,
        result_storage: Option<Value>,
    ) -> Result<ContextHandle> {
        let release_inputs = |args: Vec<Value>| {
            for a in args {
                a.unref();
            }
        };
        let mut args = Vec::with_capacity(arg_count);
        {
            let mut c = self.borrow_mut();
            if c.args.len() < arg_count {
                drop(c);
                if let Some(v) = self_value {
                    v.unref();
                }
                if let Some(v) = super_value {
                    v.unref();
                }
                if let Some(o) = outer {
                    o.unref();
                }
                return Err(RuntimeError::runtime("argument stack underflow"));
            }
            let at = c.args.len() - arg_count;
            args.extend(c.args.drain(at..));
        }
        let offset = usize::from(
            self_value.is_some()
                && func
                    .params
                    .first()
                    .is_some_and(|p| p.name.builtin() == Some(BuiltinId::SelfIdent)),
        );
        if arg_count > func.params.len() - offset {
            release_inputs(args);
            if let Some(v) = self_value {
                v.unref();
            }
            if let Some(v) = super_value {
                v.unref();
            }
            if let Some(o) = outer {
                o.unref();
            }
            return Err(RuntimeError::new(ErrorKind::TooManyArguments));
        }
        let ctx = ContextHandle::acquire();
        {
            let mut c = ctx.borrow_mut();
            c.code = Rc::clone(&func.code);
            c.outer_vars = outer;
            c.parent = Some(self.clone());
            c.result_storage = result_storage;
        }
        let bound = (|| -> Result<()> {
            if let Some(v) = self_value {
                ctx.set_var(&ValStr::from_builtin(BuiltinId::SelfIdent), v)?;
            }
            if let Some(v) = super_value {
                ctx.set_var(&ValStr::from_builtin(BuiltinId::Super), v)?;
            }
            for (i, arg) in args.into_iter().enumerate() {
                ctx.set_var(&func.params[i + offset].name, arg)?;
            }
            for param in func.params.iter().skip(offset + arg_count) {
                let default = param.default.clone();
                default.ref_();
                ctx.set_var(&param.name, default)?;
            }
            Ok(())
        })();
        if let Err(e) = bound {
            ctx.unref();
            return Err(e);
        }
        Ok(ctx)
    }

    /// Rewind this frame for re-execution: temps, pending args, and any
    /// resume token are released; locals too when `clear_vars` is set.
    pub fn reset(&self, clear_vars: bool) {
        let mut c = self.borrow_mut();
        c.line_num = 0;
        for temp in c.temps.drain(..) {
            temp.unref();
        }
        for arg in c.args.drain(..) {
            arg.unref();
        }
        if let Some(partial) = c.partial_result.take() {
            partial.value.unref();
        }
        c.implicit_count = 0;
        if clear_vars {
            if let Some(vars) = c.variables.take() {
                vars.unref();
            }
        }
    }
}
