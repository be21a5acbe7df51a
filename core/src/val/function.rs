use std::rc::Rc;

use crate::tac::Line;
use crate::val::map::ValMap;
use crate::val::{ValStr, Value};

/// One declared parameter: name plus the default used when the caller
/// supplies fewer arguments.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: ValStr,
    pub default: Value,
}

impl Param {
    pub fn new(name: &str) -> Self {
        Self {
            name: ValStr::new(name),
            default: Value::Null,
        }
    }

    pub fn with_default(name: &str, default: Value) -> Self {
        Self {
            name: ValStr::new(name),
            default,
        }
    }
}

/// A compiled callable unit: parameter list plus a TAC body. Immutable
/// once compiled, shared by plain `Rc` (never pooled).
#[derive(Debug)]
pub struct FuncDef {
    pub params: Vec<Param>,
    pub code: Rc<Vec<Line>>,
}

impl FuncDef {
    pub fn new(params: Vec<Param>, code: Vec<Line>) -> Rc<Self> {
        Rc::new(Self {
            params,
            code: Rc::new(code),
        })
    }

    /// Signature text for display/code forms: `FUNCTION(a, b=10)`.
    pub fn signature(&self) -> String {
        let mut out = String::from("FUNCTION(");
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(p.name.as_str());
            if !p.default.is_null() {
                out.push('=');
                out.push_str(&p.default.to_code_string());
            }
        }
        out.push(')');
        out
    }
}

/// A function paired with the variable map of its enclosing lexical scope.
/// This is the closure value the machine actually invokes; the bare
/// `FuncDef` only exists inside compiled code.
#[derive(Debug)]
pub struct BoundFunc {
    pub func: Rc<FuncDef>,
    outer: ValMap,
}

impl BoundFunc {
    /// Takes one owned count on `outer`, released when the last handle to
    /// this closure goes away.
    pub fn bind(func: Rc<FuncDef>, outer: ValMap) -> Rc<Self> {
        outer.ref_();
        Rc::new(Self { func, outer })
    }

    #[inline]
    pub fn outer(&self) -> &ValMap {
        &self.outer
    }
}

impl Drop for BoundFunc {
    fn drop(&mut self) {
        self.outer.unref();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_includes_defaults() {
        let func = FuncDef::new(
            vec![Param::new("a"), Param::with_default("b", Value::Number(10.0))],
            Vec::new(),
        );
        assert_eq!(func.signature(), "FUNCTION(a, b=10)");
    }

    #[test]
    fn test_bound_func_owns_one_outer_count() {
        let outer = ValMap::new();
        let func = FuncDef::new(Vec::new(), Vec::new());
        let bound = BoundFunc::bind(func, outer.clone());
        assert_eq!(outer.refs(), 2);
        drop(bound);
        assert_eq!(outer.refs(), 1);
        outer.unref();
    }
}
