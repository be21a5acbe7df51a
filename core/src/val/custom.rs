use std::fmt::Debug;

use crate::error::{Result, RuntimeError};
use crate::tac::Op;
use crate::val::Value;

/// Host extension point: a first-class value kind the core knows nothing
/// about. Custom values participate in operator dispatch with first
/// refusal (`arithmetic` runs before any built-in rule whenever either
/// operand is custom) and in member resolution via `lookup`.
pub trait CustomValue: Debug {
    fn type_name(&self) -> &'static str;

    fn to_display_string(&self) -> String;

    fn to_code_string(&self) -> String {
        self.to_display_string()
    }

    fn hash_value(&self) -> u64;

    /// Three-valued equality against any other value (1, 0, or 0.5).
    fn equality(&self, other: &Value) -> f64;

    fn truthiness(&self) -> f64 {
        1.0
    }

    fn as_number(&self) -> Result<f64> {
        Err(RuntimeError::type_mismatch(format!(
            "{} has no numeric value",
            self.type_name()
        )))
    }

    /// First refusal on an arithmetic/comparison opcode. `reversed` means
    /// this value was operand B. Return `None` to decline and fall back to
    /// the built-in rules.
    fn arithmetic(&self, op: Op, other: &Value, reversed: bool) -> Option<Result<Value>> {
        let _ = (op, other, reversed);
        None
    }

    /// Member resolution for index/dot access. Returned values must carry
    /// an owned (+1) count. Return `None` for "no such member".
    fn lookup(&self, key: &Value) -> Option<Value> {
        let _ = key;
        None
    }
}
