use std::rc::Rc;
use std::time::Instant;

use crate::error::{Result, RuntimeError};
use crate::tac::eval;
use crate::tac::{Line, Op};
use crate::val::{key_not_found, BoundFunc, BuiltinId, FuncDef, ValList, ValMap, ValStr, Value};
use crate::vm::context::{Context, ContextHandle};
use crate::vm::intrinsic::Intrinsic;

/// The interpreter driver: a stack of call frames over pre-compiled code,
/// executed one line per `step`. The host owns the loop; the machine never
/// blocks and never spawns.
pub struct Machine {
    stack: Vec<ContextHandle>,
    start_time: Instant,
    yielding: bool,
    /// When set, bare-expression results are captured into `_` (REPL mode).
    pub store_implicit: bool,
    output: Box<dyn FnMut(&str)>,
}

impl Machine {
    /// Take ownership of a root frame. `output` receives everything the
    /// program prints.
    pub fn new(root: ContextHandle, output: impl FnMut(&str) + 'static) -> Self {
        Self {
            stack: vec![root],
            start_time: Instant::now(),
            yielding: false,
            store_implicit: false,
            output: Box::new(output),
        }
    }

    /// Convenience: wrap `code` in a fresh root frame.
    pub fn from_code(code: Vec<Line>, output: impl FnMut(&str) + 'static) -> Self {
        Self::new(Context::root(code), output)
    }

    fn top(&self) -> ContextHandle {
        self.stack
            .last()
            .cloned()
            .expect("the context stack always holds the root frame")
    }

    /// The currently executing frame.
    pub fn get_top_context(&self) -> ContextHandle {
        self.top()
    }

    /// Whether only the root frame remains and it has run off its code.
    pub fn done(&self) -> bool {
        self.stack.len() == 1 && self.top().finished()
    }

    /// Seconds since this machine was created (or last reset).
    pub fn run_time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Whether the last step asked the host to pause the loop.
    #[inline]
    pub fn yielding(&self) -> bool {
        self.yielding
    }

    /// Called by intrinsics that want the host loop to back off until the
    /// next step (cooperative wait).
    pub fn yield_now(&mut self) {
        self.yielding = true;
    }

    /// Send text to the host output sink.
    pub fn print(&mut self, text: &str) {
        (self.output)(text);
    }

    /// Execute one line. Finished frames are popped (running the return
    /// protocol) first; errors come back annotated with the failing line's
    /// source location.
    pub fn step(&mut self) -> Result<()> {
        self.yielding = false;
        while self.top().finished() {
            if self.stack.len() == 1 {
                return Ok(());
            }
            self.pop_frame()?;
        }
        let ctx = self.top();
        let line = {
            let mut c = ctx.borrow_mut();
            let line = c.code[c.line_num].clone();
            c.line_num += 1;
            line
        };
        tracing::trace!(%line, depth = self.stack.len(), "step");
        match self.exec_line(&ctx, &line) {
            Ok(()) => Ok(()),
            Err(e) => Err(match &line.location {
                Some(loc) => e.with_location(loc.clone()),
                None => e,
            }),
        }
    }

    /// Host-driven invocation: push a frame for `func` over `args` (owned).
    /// The return value lands in `result_storage` of the frame below, or is
    /// discarded when none is given.
    pub fn manually_push_call(
        &mut self,
        func: Rc<FuncDef>,
        args: Vec<Value>,
        result_storage: Option<Value>,
    ) -> Result<()> {
        let argc = args.len();
        let top = self.top();
        for arg in args {
            top.push_arg(arg);
        }
        let sub = top.next_call_context(&func, argc, None, None, None, result_storage)?;
        self.stack.push(sub);
        Ok(())
    }

    /// Abandon everything above the root frame and mark the root finished.
    /// Safe to call at any point, including after a step error.
    pub fn stop(&mut self) {
        while self.stack.len() > 1 {
            if let Some(frame) = self.stack.pop() {
                frame.unref();
            }
        }
        let root = self.top();
        let mut c = root.borrow_mut();
        c.line_num = c.code.len();
    }

    /// Unwind and rewind the root frame for a clean re-run.
    pub fn reset(&mut self) {
        self.stop();
        self.top().reset(true);
        self.start_time = Instant::now();
        self.yielding = false;
    }

    /// TAC listing of the live stack, innermost frame first, with a cursor
    /// marker on the next line to execute.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (depth, frame) in self.stack.iter().enumerate().rev() {
            let c = frame.borrow();
            out.push_str(&format!("frame {depth}:\n"));
            for (i, line) in c.code.iter().enumerate() {
                let marker = if i == c.line_num { '>' } else { ' ' };
                out.push_str(&format!("{marker} {i:4}: {line}\n"));
            }
        }
        out
    }

    /// Return protocol: the popped frame's temp 0 is its return value; it
    /// lands wherever the frame's creator asked.
    fn pop_frame(&mut self) -> Result<()> {
        let Some(frame) = self.stack.pop() else {
            return Ok(());
        };
        let result = frame.take_temp(0);
        let storage = frame.borrow_mut().result_storage.take();
        let outcome = match storage {
            Some(dest) => {
                let top = self.top();
                self.store(&top, &dest, result)
            }
            None => {
                result.unref();
                Ok(())
            }
        };
        frame.unref();
        outcome
    }

    /// Resolve an operand to a concrete owned value. Container literals
    /// produce a fresh container each time, with embedded references
    /// resolved, so executing the same line twice never aliases.
    fn resolve(&mut self, ctx: &ContextHandle, value: &Value) -> Result<Value> {
        match value {
            Value::Var(name) => ctx.get_var(name),
            Value::Temp(slot) => Ok(ctx.get_temp(*slot as usize)),
            Value::SeqElem(elem) => {
                let seq = self.resolve(ctx, &elem.seq)?;
                let index = match self.resolve(ctx, &elem.index) {
                    Ok(v) => v,
                    Err(e) => {
                        seq.unref();
                        return Err(e);
                    }
                };
                let out = eval::elem_b_of_a(&seq, &index);
                seq.unref();
                index.unref();
                out
            }
            Value::List(literal) => {
                let template: Vec<Value> = literal.with_slice(|items| items.to_vec());
                let mut items = Vec::with_capacity(template.len());
                for item in &template {
                    match self.resolve(ctx, item) {
                        Ok(v) => items.push(v),
                        Err(e) => {
                            for v in items {
                                v.unref();
                            }
                            return Err(e);
                        }
                    }
                }
                Ok(Value::List(ValList::from_values(items)))
            }
            Value::Map(literal) => {
                let template: Vec<(Value, Value)> = literal.with_entries(|es| es.to_vec());
                let out = ValMap::new();
                for (key, val) in &template {
                    let key = match self.resolve(ctx, key) {
                        Ok(k) => k,
                        Err(e) => {
                            out.unref();
                            return Err(e);
                        }
                    };
                    let val = match self.resolve(ctx, val) {
                        Ok(v) => v,
                        Err(e) => {
                            key.unref();
                            out.unref();
                            return Err(e);
                        }
                    };
                    out.set(key, val);
                }
                Ok(Value::Map(out))
            }
            // A bare function value closes over the current scope.
            Value::Function(func) => {
                let locals = ctx.locals_map();
                let bound = BoundFunc::bind(Rc::clone(func), locals.clone());
                locals.unref();
                Ok(Value::Bound(bound))
            }
            other => Ok(other.clone()),
        }
    }

    /// Store an owned value into an assignment target.
    fn store(&mut self, ctx: &ContextHandle, dest: &Value, value: Value) -> Result<()> {
        match dest {
            Value::Null => {
                value.unref();
                Ok(())
            }
            Value::Temp(slot) => {
                ctx.set_temp(*slot as usize, value);
                Ok(())
            }
            Value::Var(name) => ctx.set_var(name, value),
            Value::SeqElem(elem) => {
                let seq = match self.resolve(ctx, &elem.seq) {
                    Ok(s) => s,
                    Err(e) => {
                        value.unref();
                        return Err(e);
                    }
                };
                let index = match self.resolve(ctx, &elem.index) {
                    Ok(i) => i,
                    Err(e) => {
                        seq.unref();
                        value.unref();
                        return Err(e);
                    }
                };
                let outcome = match &seq {
                    Value::Map(map) => {
                        map.set(index, value);
                        Ok(())
                    }
                    Value::List(list) => {
                        let at = index.to_int();
                        index.unref();
                        match at {
                            Ok(at) => list.set(at, value),
                            Err(e) => {
                                value.unref();
                                Err(e)
                            }
                        }
                    }
                    other => {
                        let name = other.type_name();
                        index.unref();
                        value.unref();
                        Err(RuntimeError::type_mismatch(format!(
                            "cannot assign into {name}"
                        )))
                    }
                };
                seq.unref();
                outcome
            }
            other => Err(RuntimeError::runtime(format!(
                "{} is not an assignment target",
                other.to_code_string()
            ))),
        }
    }

    fn exec_line(&mut self, ctx: &ContextHandle, line: &Line) -> Result<()> {
        match line.op {
            Op::Noop => Ok(()),
            Op::AssignA => {
                let v = self.resolve(ctx, &line.a)?;
                self.store(ctx, &line.dest, v)
            }
            Op::CopyA => {
                let v = self.resolve(ctx, &line.a)?;
                self.store(ctx, &line.dest, eval::copy_value(v))
            }
            Op::AssignImplicit => {
                let v = self.resolve(ctx, &line.a)?;
                if self.store_implicit {
                    ctx.borrow_mut().implicit_count += 1;
                    ctx.set_var(&ValStr::new("_"), v)
                } else {
                    v.unref();
                    Ok(())
                }
            }
            Op::GotoA => {
                let target = self.resolve(ctx, &line.a)?;
                ctx.borrow_mut().line_num = target.to_int()? as usize;
                Ok(())
            }
            Op::GotoAifB | Op::GotoAifTrulyB | Op::GotoAifNotB => {
                let cond = self.resolve(ctx, &line.b)?;
                let weight = cond.truthiness();
                cond.unref();
                let jump = match line.op {
                    Op::GotoAifB => weight != 0.0,
                    // Only fully-true jumps; fuzzy intermediates fall through.
                    Op::GotoAifTrulyB => weight.abs() >= 1.0,
                    _ => weight == 0.0,
                };
                if jump {
                    let target = self.resolve(ctx, &line.a)?;
                    ctx.borrow_mut().line_num = target.to_int()? as usize;
                }
                Ok(())
            }
            Op::PushParam => {
                let v = self.resolve(ctx, &line.a)?;
                ctx.push_arg(v);
                Ok(())
            }
            Op::CallFuncA => self.exec_call(ctx, line),
            Op::CallIntrinsicA => self.exec_intrinsic(ctx, line),
            Op::ReturnA => {
                let v = self.resolve(ctx, &line.a)?;
                {
                    let mut c = ctx.borrow_mut();
                    c.line_num = c.code.len();
                }
                ctx.set_temp(0, v);
                Ok(())
            }
            _ => {
                let a = self.resolve(ctx, &line.a)?;
                let b = match self.resolve(ctx, &line.b) {
                    Ok(b) => b,
                    Err(e) => {
                        a.unref();
                        return Err(e);
                    }
                };
                let result = eval::eval_binop(line.op, &a, &b);
                a.unref();
                b.unref();
                self.store(ctx, &line.dest, result?)
            }
        }
    }

    /// Call protocol. A dot-syntax callee resolves through the prototype
    /// chain and carries the receiver in as `self`; `super` becomes the
    /// `__isa` of the map the function was actually found in. Calling
    /// through `super` keeps the current `self` instead of rebinding it.
    fn exec_call(&mut self, ctx: &ContextHandle, line: &Line) -> Result<()> {
        let argc = {
            let n = self.resolve(ctx, &line.b)?;
            let argc = n.to_int();
            n.unref();
            argc? as usize
        };
        let mut self_value: Option<Value> = None;
        let mut super_value: Option<Value> = None;
        let callee = match &line.a {
            Value::SeqElem(elem) => {
                let via_super =
                    matches!(&elem.seq, Value::Var(n) if n.builtin() == Some(BuiltinId::Super));
                let receiver = self.resolve(ctx, &elem.seq)?;
                let index = match self.resolve(ctx, &elem.index) {
                    Ok(v) => v,
                    Err(e) => {
                        receiver.unref();
                        return Err(e);
                    }
                };
                let found = match &receiver {
                    Value::Map(map) => match map.lookup_chain(&index) {
                        Ok(Some((value, owner))) => {
                            super_value = Some(match owner.isa_parent() {
                                Some(parent) => Value::Map(parent),
                                None => Value::Null,
                            });
                            owner.unref();
                            Ok(value)
                        }
                        Ok(None) => Err(key_not_found(&index)),
                        Err(e) => Err(e),
                    },
                    _ => eval::elem_b_of_a(&receiver, &index),
                };
                index.unref();
                let found = match found {
                    Ok(v) => v,
                    Err(e) => {
                        receiver.unref();
                        if let Some(sv) = super_value.take() {
                            sv.unref();
                        }
                        return Err(e);
                    }
                };
                if via_super {
                    receiver.unref();
                    self_value = Some(
                        ctx.get_var(&ValStr::from_builtin(BuiltinId::SelfIdent))
                            .unwrap_or(Value::Null),
                    );
                } else {
                    self_value = Some(receiver);
                }
                found
            }
            other => self.resolve(ctx, other)?,
        };
        match callee {
            Value::Bound(bound) => {
                let outer = bound.outer().clone();
                outer.ref_();
                let sub = ctx.next_call_context(
                    &bound.func,
                    argc,
                    self_value,
                    super_value,
                    Some(outer),
                    Some(line.dest.clone()),
                )?;
                self.stack.push(sub);
                Ok(())
            }
            Value::Function(func) => {
                let sub = ctx.next_call_context(
                    &func,
                    argc,
                    self_value,
                    super_value,
                    None,
                    Some(line.dest.clone()),
                )?;
                self.stack.push(sub);
                Ok(())
            }
            // A non-function callee with no arguments degenerates to a
            // plain read; with arguments it is an error.
            other => {
                if let Some(sv) = self_value {
                    sv.unref();
                }
                if let Some(sv) = super_value {
                    sv.unref();
                }
                if argc == 0 {
                    self.store(ctx, &line.dest, other)
                } else {
                    let name = other.type_name();
                    other.unref();
                    Err(RuntimeError::type_mismatch(format!(
                        "{name} is not callable"
                    )))
                }
            }
        }
    }

    /// Intrinsic dispatch, in the calling frame. A not-done result rewinds
    /// the cursor so the same line re-executes next step with the resume
    /// token handed back in.
    fn exec_intrinsic(&mut self, ctx: &ContextHandle, line: &Line) -> Result<()> {
        let id = line.a.to_int()? as u16;
        let intrinsic = Intrinsic::get_by_id(id)
            .ok_or_else(|| RuntimeError::runtime(format!("unknown intrinsic id {id}")))?;
        let partial = ctx.borrow_mut().partial_result.take();
        let result = (intrinsic.handler())(self, ctx, partial)?;
        if result.done {
            self.store(ctx, &line.dest, result.value)
        } else {
            let mut c = ctx.borrow_mut();
            c.partial_result = Some(result);
            c.line_num -= 1;
            Ok(())
        }
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        for frame in self.stack.drain(..) {
            frame.unref();
        }
    }
}
