use std::fmt;
use std::hash::Hasher;
use std::rc::Rc;

use rustc_hash::FxHasher;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::error::{Result, RuntimeError};

mod custom;
mod function;
pub mod ident;
mod list;
mod map;
pub mod pool;

pub use custom::CustomValue;
pub use function::{BoundFunc, FuncDef, Param};
pub use ident::BuiltinId;
pub use list::ValList;
pub use map::{MapKey, ValMap, key_not_found};

/// Recursion budget shared by deep equality and deep hashing. When it runs
/// out, equality reports 0.5 ("uncertain") instead of looping on cycles.
pub const MAX_EQUALITY_DEPTH: usize = 16;

/// Longest `__isa` prototype chain a lookup will walk.
pub const MAX_ISA_DEPTH: usize = 16;

/// Hard cap on the byte length any single operation may produce.
pub const MAX_STRING_SIZE: usize = 0xFF_FFFF;

/// Hard cap on the element count any single operation may produce.
pub const MAX_LIST_COUNT: usize = 0xFF_FFFF;

/// Immutable string payload: shared text plus the built-in identifier tag
/// when the text is one of the well-known hot names. The tag carries a
/// stable per-identifier ID, so map lookups on these keys skip hashing.
#[derive(Clone)]
pub struct ValStr {
    text: Rc<str>,
    builtin: Option<BuiltinId>,
}

impl ValStr {
    pub fn new(text: &str) -> Self {
        Self {
            text: Rc::from(text),
            builtin: BuiltinId::from_name(text),
        }
    }

    pub fn from_builtin(id: BuiltinId) -> Self {
        Self {
            text: Rc::from(id.as_str()),
            builtin: Some(id),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[inline]
    pub fn builtin(&self) -> Option<BuiltinId> {
        self.builtin
    }

    #[inline]
    pub fn is_builtin(&self) -> bool {
        self.builtin.is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl PartialEq for ValStr {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        match (self.builtin, other.builtin) {
            // Identity comparison on the stable IDs; no text walk.
            (Some(a), Some(b)) => a == b,
            (None, None) => self.text == other.text,
            _ => false,
        }
    }
}

impl Eq for ValStr {}

impl fmt::Debug for ValStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValStr({:?})", &*self.text)
    }
}

/// Lazily resolved "index into this value": both a read expression and an
/// assignment target inside compiled code.
#[derive(Debug, Clone)]
pub struct SeqElemRef {
    pub seq: Value,
    pub index: Value,
}

/// The tagged value union the machine executes against.
///
/// `Var`, `Temp`, and `SeqElem` are indirections that exist only inside
/// compiled code; they resolve to concrete values before any operator
/// sees them.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    /// Placeholder standing in where a real null cannot appear (map key
    /// slots). Behaves as null in every operation.
    KeyNull,
    Number(f64),
    Str(ValStr),
    List(ValList),
    Map(ValMap),
    Function(Rc<FuncDef>),
    Bound(Rc<BoundFunc>),
    Custom(Rc<dyn CustomValue>),
    Var(ValStr),
    Temp(u16),
    SeqElem(Rc<SeqElemRef>),
}

impl Value {
    /// String constructor for text data. Same behavior as [`Value::ident`]
    /// (`ValStr::new` always tags built-in names, so fast-slot dispatch
    /// works no matter how the string was made); the two names exist to
    /// record intent at the call site.
    #[inline]
    pub fn string(text: &str) -> Value {
        Value::Str(ValStr::new(text))
    }

    /// String constructor for identifier positions (map keys, member
    /// names). See [`Value::string`].
    #[inline]
    pub fn ident(name: &str) -> Value {
        Value::Str(ValStr::new(name))
    }

    #[inline]
    pub fn var(name: &str) -> Value {
        Value::Var(ValStr::new(name))
    }

    #[inline]
    pub fn temp(slot: u16) -> Value {
        Value::Temp(slot)
    }

    pub fn seq_elem(seq: Value, index: Value) -> Value {
        Value::SeqElem(Rc::new(SeqElemRef { seq, index }))
    }

    #[inline]
    pub fn zero() -> Value {
        Value::Number(0.0)
    }

    #[inline]
    pub fn one() -> Value {
        Value::Number(1.0)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::KeyNull)
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null | Value::KeyNull => "null",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Function(_) | Value::Bound(_) => "funcRef",
            Value::Custom(c) => c.type_name(),
            Value::Var(_) | Value::Temp(_) | Value::SeqElem(_) => "unresolved",
        }
    }

    /// Increment the pool reference count (no-op for unpooled kinds).
    #[inline]
    pub fn ref_(&self) {
        match self {
            Value::List(l) => l.ref_(),
            Value::Map(m) => m.ref_(),
            _ => {}
        }
    }

    /// Decrement the pool reference count (no-op for unpooled kinds).
    #[inline]
    pub fn unref(&self) {
        match self {
            Value::List(l) => l.unref(),
            Value::Map(m) => m.unref(),
            _ => {}
        }
    }

    /// Fuzzy boolean weight: 0 is false, 1 is true, in-between values are
    /// probabilistic truth. Numbers pass through raw.
    pub fn truthiness(&self) -> f64 {
        match self {
            Value::Null | Value::KeyNull => 0.0,
            Value::Number(n) => *n,
            Value::Str(s) => {
                if s.is_empty() {
                    0.0
                } else {
                    1.0
                }
            }
            Value::List(l) => {
                if l.is_empty() {
                    0.0
                } else {
                    1.0
                }
            }
            Value::Map(m) => {
                if m.is_empty() {
                    0.0
                } else {
                    1.0
                }
            }
            Value::Function(_) | Value::Bound(_) => 1.0,
            Value::Custom(c) => c.truthiness(),
            Value::Var(_) | Value::Temp(_) | Value::SeqElem(_) => 0.0,
        }
    }

    /// Numeric weight; null coerces to 0, non-numeric kinds are an error.
    pub fn as_number(&self) -> Result<f64> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Null | Value::KeyNull => Ok(0.0),
            Value::Custom(c) => c.as_number(),
            other => Err(RuntimeError::type_mismatch(format!(
                "number required, got {}",
                other.type_name()
            ))),
        }
    }

    /// Integer read for cursor targets and argument counts.
    pub fn to_int(&self) -> Result<i64> {
        let n = self.as_number()?;
        if !n.is_finite() {
            return Err(RuntimeError::type_mismatch("finite number required"));
        }
        Ok(n as i64)
    }

    /// Deep content hash with the shared recursion budget.
    pub fn hash_value(&self, depth: usize) -> u64 {
        let mut hasher = FxHasher::default();
        match self {
            Value::Null | Value::KeyNull => hasher.write_u8(0),
            Value::Number(n) => {
                let n = if *n == 0.0 { 0.0 } else { *n }; // -0.0 folds into 0.0
                hasher.write_u64(n.to_bits());
            }
            Value::Str(s) => hasher.write(s.as_str().as_bytes()),
            Value::List(l) => {
                if depth == 0 {
                    hasher.write_u8(1);
                } else {
                    l.with_slice(|items| {
                        for item in items {
                            hasher.write_u64(item.hash_value(depth - 1));
                        }
                    });
                }
            }
            Value::Map(m) => hasher.write_u64(m.hash_value(depth)),
            Value::Function(f) => hasher.write_usize(Rc::as_ptr(f) as usize),
            Value::Bound(b) => hasher.write_usize(Rc::as_ptr(&b.func) as usize),
            Value::Custom(c) => hasher.write_u64(c.hash_value()),
            Value::Var(_) | Value::Temp(_) | Value::SeqElem(_) => hasher.write_u8(2),
        }
        hasher.finish()
    }

    /// Three-valued equality: 1 equal, 0 unequal, 0.5 "recursion budget
    /// exhausted, assume nothing". Callers that need a strict answer must
    /// treat only 1 as equal.
    pub fn equality(&self, other: &Value, depth: usize) -> f64 {
        // Custom values get first say, from either side.
        if let Value::Custom(c) = self {
            return c.equality(other);
        }
        if let Value::Custom(c) = other {
            return c.equality(self);
        }
        match (self, other) {
            (Value::Null | Value::KeyNull, Value::Null | Value::KeyNull) => 1.0,
            (Value::Null | Value::KeyNull, _) | (_, Value::Null | Value::KeyNull) => 0.0,
            (Value::Number(a), Value::Number(b)) => {
                if a == b {
                    1.0
                } else {
                    0.0
                }
            }
            (Value::Str(a), Value::Str(b)) => {
                if a == b {
                    1.0
                } else {
                    0.0
                }
            }
            (Value::List(a), Value::List(b)) => {
                if a.ptr_eq(b) {
                    return 1.0;
                }
                if depth == 0 {
                    return 0.5;
                }
                if a.count() != b.count() {
                    return 0.0;
                }
                a.with_slice(|xs| {
                    b.with_slice(|ys| {
                        let mut result = 1.0f64;
                        for (x, y) in xs.iter().zip(ys.iter()) {
                            let eq = x.equality(y, depth - 1);
                            if eq == 0.0 {
                                return 0.0;
                            }
                            result = result.min(eq);
                        }
                        result
                    })
                })
            }
            (Value::Map(a), Value::Map(b)) => a.equality(b, depth),
            (Value::Function(a), Value::Function(b)) => {
                if Rc::ptr_eq(a, b) {
                    1.0
                } else {
                    0.0
                }
            }
            (Value::Bound(a), Value::Bound(b)) => {
                if Rc::ptr_eq(&a.func, &b.func) && a.outer().ptr_eq(b.outer()) {
                    1.0
                } else {
                    0.0
                }
            }
            (Value::Bound(a), Value::Function(b)) | (Value::Function(b), Value::Bound(a)) => {
                if Rc::ptr_eq(&a.func, b) {
                    1.0
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    /// Display form: what `print` shows. Strings are raw, containers render
    /// JSON-style, numbers drop a redundant decimal point.
    pub fn to_display_string(&self) -> String {
        self.to_string()
    }

    /// Code form: how a literal producing this value would be written.
    pub fn to_code_string(&self) -> String {
        match self {
            Value::Null | Value::KeyNull => "null".to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('"');
                for ch in s.as_str().chars() {
                    if ch == '"' {
                        out.push('"');
                    }
                    out.push(ch);
                }
                out.push('"');
                out
            }
            Value::List(l) => {
                let mut out = String::from("[");
                l.with_slice(|items| {
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&item.to_code_string());
                    }
                });
                out.push(']');
                out
            }
            Value::Map(m) => {
                let mut out = String::from("{");
                m.with_entries(|entries| {
                    for (i, (k, v)) in entries.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&k.to_code_string());
                        out.push_str(": ");
                        out.push_str(&v.to_code_string());
                    }
                });
                out.push('}');
                out
            }
            Value::Function(f) => f.signature(),
            Value::Bound(b) => b.func.signature(),
            Value::Custom(c) => c.to_code_string(),
            Value::Var(name) => name.as_str().to_string(),
            Value::Temp(slot) => format!("_{slot}"),
            Value::SeqElem(e) => format!("{}[{}]", e.seq.to_code_string(), e.index.to_code_string()),
        }
    }
}

/// Number→text without a redundant decimal point: integral magnitudes take
/// the itoa fast path, everything else goes through ryu.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if n == n.trunc() && n.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        buf.format(n as i64).to_string()
    } else {
        let mut buf = ryu::Buffer::new();
        buf.format(n).to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null | Value::KeyNull => write!(f, "null"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s.as_str()),
            Value::List(_) | Value::Map(_) => match serde_json::to_string(self) {
                Ok(s) => write!(f, "{}", s),
                Err(_) => write!(f, "{}", self.to_code_string()),
            },
            Value::Function(func) => write!(f, "{}", func.signature()),
            Value::Bound(b) => write!(f, "{}", b.func.signature()),
            Value::Custom(c) => write!(f, "{}", c.to_display_string()),
            Value::Var(_) | Value::Temp(_) | Value::SeqElem(_) => {
                write!(f, "{}", self.to_code_string())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null | Value::KeyNull => serializer.serialize_unit(),
            Value::Number(n) => {
                if *n == n.trunc() && n.abs() < 1e15 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::Str(s) => serializer.serialize_str(s.as_str()),
            Value::List(l) => l.with_slice(|items| {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }),
            Value::Map(m) => m.with_entries(|entries| {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(&k.to_display_string(), v)?;
                }
                map.end()
            }),
            // Callables and indirections have no data form; placeholder.
            Value::Function(_) | Value::Bound(_) => serializer.serialize_str("<function>"),
            Value::Custom(c) => serializer.serialize_str(&c.to_display_string()),
            Value::Var(_) | Value::Temp(_) | Value::SeqElem(_) => {
                serializer.serialize_str(&self.to_code_string())
            }
        }
    }
}

/// Strict equality for host-side code and tests: containers compare by
/// identity, everything else by content. Script-level `==` goes through
/// `equality` instead.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            _ => self.equality(other, MAX_EQUALITY_DEPTH) == 1.0,
        }
    }
}
