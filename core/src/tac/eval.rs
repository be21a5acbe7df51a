use crate::error::{Result, RuntimeError};
use crate::tac::Op;
use crate::val::{MAX_EQUALITY_DEPTH, MAX_STRING_SIZE, ValMap, Value, key_not_found};

#[inline]
fn abs_clamp01(n: f64) -> f64 {
    n.abs().clamp(0.0, 1.0)
}

fn err_op(a: &Value, op: Op, b: &Value) -> RuntimeError {
    let sym = op.symbol().unwrap_or("<?>");
    RuntimeError::type_mismatch(format!("{} {} {}", a.type_name(), sym, b.type_name()))
}

/// Dispatch one value-level opcode over two fully resolved operands and
/// return the owned result. Control-flow and call opcodes never reach
/// this table; the machine handles them directly.
pub fn eval_binop(op: Op, a: &Value, b: &Value) -> Result<Value> {
    // Host-defined kinds get first refusal before any built-in rule.
    if let Value::Custom(c) = a {
        if let Some(r) = c.arithmetic(op, b, false) {
            return r;
        }
    }
    if let Value::Custom(c) = b {
        if let Some(r) = c.arithmetic(op, a, true) {
            return r;
        }
    }
    match op {
        Op::APlusB => op_add(a, b),
        Op::AMinusB => op_subtract(a, b),
        Op::ATimesB => op_multiply(a, b),
        Op::ADividedByB => op_divide(a, b),
        Op::AModB => Ok(Value::Number(a.as_number()? % b.as_number()?)),
        Op::APowB => Ok(Value::Number(a.as_number()?.powf(b.as_number()?))),
        Op::AEqualB => Ok(Value::Number(a.equality(b, MAX_EQUALITY_DEPTH))),
        Op::ANotEqualB => Ok(Value::Number(1.0 - a.equality(b, MAX_EQUALITY_DEPTH))),
        Op::AGreaterThanB | Op::AGreatOrEqualB | Op::ALessThanB | Op::ALessOrEqualB => {
            Ok(op_compare(op, a, b))
        }
        Op::AisaB => op_isa(a, b),
        Op::AAndB => {
            let x = abs_clamp01(a.truthiness());
            let y = abs_clamp01(b.truthiness());
            Ok(Value::Number(x * y))
        }
        Op::AOrB => {
            let x = abs_clamp01(a.truthiness());
            let y = abs_clamp01(b.truthiness());
            Ok(Value::Number((x + y - x * y).clamp(0.0, 1.0)))
        }
        Op::NotA => Ok(Value::Number(1.0 - abs_clamp01(a.truthiness()))),
        Op::LengthOfA => op_length(a),
        Op::ElemBofA => elem_b_of_a(a, b),
        Op::ElemBofIterA => elem_b_of_iter_a(a, b),
        other => Err(RuntimeError::runtime(format!(
            "opcode {other:?} is not a value operation"
        ))),
    }
}

fn op_add(a: &Value, b: &Value) -> Result<Value> {
    // String coercion wins whenever either side is a string.
    if matches!(a, Value::Str(_)) || matches!(b, Value::Str(_)) {
        return concat_display(a, b);
    }
    match (a, b) {
        (Value::List(x), Value::List(y)) => Ok(Value::List(x.concat(y)?)),
        (Value::Map(x), Value::Map(y)) => Ok(Value::Map(x.merged(y))),
        (Value::List(_), _) | (_, Value::List(_)) | (Value::Map(_), _) | (_, Value::Map(_)) => {
            Err(err_op(a, Op::APlusB, b))
        }
        _ => Ok(Value::Number(a.as_number()? + b.as_number()?)),
    }
}

fn op_subtract(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        // String minus string strips one trailing occurrence.
        (Value::Str(x), Value::Str(y)) => {
            let out = match x.as_str().strip_suffix(y.as_str()) {
                Some(rest) if !y.is_empty() => rest,
                _ => x.as_str(),
            };
            Ok(Value::string(out))
        }
        (Value::Str(_), _) | (_, Value::Str(_)) => Err(err_op(a, Op::AMinusB, b)),
        (Value::List(_), _) | (_, Value::List(_)) | (Value::Map(_), _) | (_, Value::Map(_)) => {
            Err(err_op(a, Op::AMinusB, b))
        }
        _ => Ok(Value::Number(a.as_number()? - b.as_number()?)),
    }
}

fn op_multiply(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Str(s), Value::Number(n)) => replicate_string(s.as_str(), *n),
        (Value::List(l), Value::Number(n)) => Ok(Value::List(l.replicate(*n)?)),
        (Value::Str(_), _) | (Value::List(_), _) | (Value::Map(_), _) => {
            Err(err_op(a, Op::ATimesB, b))
        }
        (_, Value::Str(_)) | (_, Value::List(_)) | (_, Value::Map(_)) => {
            Err(err_op(a, Op::ATimesB, b))
        }
        _ => Ok(Value::Number(a.as_number()? * b.as_number()?)),
    }
}

fn op_divide(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        // Division by a factor is replication by its reciprocal.
        (Value::Str(s), Value::Number(n)) => replicate_string(s.as_str(), 1.0 / *n),
        (Value::List(l), Value::Number(n)) => Ok(Value::List(l.replicate(1.0 / *n)?)),
        (Value::Str(_), _) | (Value::List(_), _) | (Value::Map(_), _) => {
            Err(err_op(a, Op::ADividedByB, b))
        }
        (_, Value::Str(_)) | (_, Value::List(_)) | (_, Value::Map(_)) => {
            Err(err_op(a, Op::ADividedByB, b))
        }
        // IEEE semantics: division by zero yields an infinity, not an error.
        _ => Ok(Value::Number(a.as_number()? / b.as_number()?)),
    }
}

/// Ordered comparison: numbers and strings order; any other pairing has
/// no defined order and yields null.
fn op_compare(op: Op, a: &Value, b: &Value) -> Value {
    let ord = match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => x.as_str().partial_cmp(y.as_str()),
        _ => None,
    };
    let Some(ord) = ord else {
        return Value::Null;
    };
    let hit = match op {
        Op::AGreaterThanB => ord == std::cmp::Ordering::Greater,
        Op::AGreatOrEqualB => ord != std::cmp::Ordering::Less,
        Op::ALessThanB => ord == std::cmp::Ordering::Less,
        Op::ALessOrEqualB => ord != std::cmp::Ordering::Greater,
        _ => unreachable!("non-comparison opcode"),
    };
    Value::Number(if hit { 1.0 } else { 0.0 })
}

fn op_isa(a: &Value, b: &Value) -> Result<Value> {
    if b.is_null() {
        return Ok(Value::Number(if a.is_null() { 1.0 } else { 0.0 }));
    }
    match (a, b) {
        (Value::Map(x), Value::Map(y)) => Ok(Value::Number(if x.isa(y)? { 1.0 } else { 0.0 })),
        _ => Ok(Value::zero()),
    }
}

fn op_length(a: &Value) -> Result<Value> {
    match a {
        Value::Str(s) => Ok(Value::Number(s.as_str().chars().count() as f64)),
        Value::List(l) => Ok(Value::Number(l.count() as f64)),
        Value::Map(m) => Ok(Value::Number(m.count() as f64)),
        Value::Null | Value::KeyNull => Ok(Value::zero()),
        other => Err(RuntimeError::type_mismatch(format!(
            "{} has no length",
            other.type_name()
        ))),
    }
}

fn concat_display(a: &Value, b: &Value) -> Result<Value> {
    let left = a.to_display_string();
    let right = b.to_display_string();
    if left.len() + right.len() > MAX_STRING_SIZE {
        return Err(RuntimeError::limit(format!(
            "string too large (max {MAX_STRING_SIZE} bytes)"
        )));
    }
    let mut out = String::with_capacity(left.len() + right.len());
    out.push_str(&left);
    out.push_str(&right);
    Ok(Value::string(&out))
}

/// Replication with a truncated fractional prefix: `"abc" * 2.5` is
/// `"abcabca"` (7 = floor(3 * 2.5) characters).
fn replicate_string(s: &str, factor: f64) -> Result<Value> {
    if factor <= 0.0 || s.is_empty() {
        return Ok(Value::string(""));
    }
    let chars: Vec<char> = s.chars().collect();
    let total = (chars.len() as f64 * factor).floor() as usize;
    if total > MAX_STRING_SIZE {
        return Err(RuntimeError::limit(format!(
            "string too large (max {MAX_STRING_SIZE} bytes)"
        )));
    }
    let mut out = String::with_capacity(total);
    for i in 0..total {
        out.push(chars[i % chars.len()]);
    }
    Ok(Value::string(&out))
}

fn string_char_at(s: &str, index: i64) -> Result<Value> {
    let count = s.chars().count() as i64;
    let idx = if index < 0 { index + count } else { index };
    if idx < 0 || idx >= count {
        return Err(RuntimeError::index_out_of_range(index, count as usize));
    }
    let ch = s.chars().nth(idx as usize).expect("index checked in range");
    Ok(Value::string(&ch.to_string()))
}

/// Index/dot access. A string index falls through to prototype-chain name
/// resolution regardless of the container kind, unifying `a.b` and
/// `a["b"]` into one path.
pub fn elem_b_of_a(a: &Value, b: &Value) -> Result<Value> {
    match a {
        Value::Map(map) => match map.lookup_chain(b)? {
            Some((value, owner)) => {
                owner.unref();
                Ok(value)
            }
            None => Err(key_not_found(b)),
        },
        Value::List(list) => match b {
            Value::Number(n) => list.get(*n as i64),
            Value::Str(_) => Err(key_not_found(b)),
            _ => Err(RuntimeError::type_mismatch(format!(
                "list index must be a number, got {}",
                b.type_name()
            ))),
        },
        Value::Str(s) => match b {
            Value::Number(n) => string_char_at(s.as_str(), *n as i64),
            Value::Str(_) => Err(key_not_found(b)),
            _ => Err(RuntimeError::type_mismatch(format!(
                "string index must be a number, got {}",
                b.type_name()
            ))),
        },
        Value::Custom(c) => c.lookup(b).ok_or_else(|| key_not_found(b)),
        // Members on numbers and functions resolve the same way; without
        // a host type library there is nothing to find.
        Value::Number(_) | Value::Function(_) | Value::Bound(_) if matches!(b, Value::Str(_)) => {
            Err(key_not_found(b))
        }
        other => Err(RuntimeError::type_mismatch(format!(
            "{} is not indexable",
            other.type_name()
        ))),
    }
}

/// Positional access for iteration: lists and strings by position, maps
/// yield a `{key, value}` pair map per entry. No prototype walk.
fn elem_b_of_iter_a(a: &Value, b: &Value) -> Result<Value> {
    let index = b.to_int()?;
    match a {
        Value::List(list) => list.get(index),
        Value::Str(s) => string_char_at(s.as_str(), index),
        Value::Map(map) => {
            let (k, v) = map.entry_at(index)?;
            let pair = ValMap::new();
            pair.set_str("key", k);
            pair.set_str("value", v);
            Ok(Value::Map(pair))
        }
        other => Err(RuntimeError::type_mismatch(format!(
            "{} is not iterable",
            other.type_name()
        ))),
    }
}

/// Shallow-copy a container value, used by the copy-assignment opcode so
/// repeated execution of one instruction never shares mutable state.
pub fn copy_value(v: Value) -> Value {
    match &v {
        Value::List(l) => {
            let copy = Value::List(l.shallow_copy());
            v.unref();
            copy
        }
        Value::Map(m) => {
            let copy = Value::Map(m.shallow_copy());
            v.unref();
            copy
        }
        _ => v,
    }
}
