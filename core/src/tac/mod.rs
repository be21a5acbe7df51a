use std::fmt;

use crate::error::SourceLoc;
use crate::val::Value;

pub mod eval;

#[cfg(test)]
mod eval_test;

/// Three-address-code opcodes. `A`/`B` name the source operands of the
/// instruction; most opcodes write one result into the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Noop,
    AssignA,
    /// Bare-expression result capture (REPL echo).
    AssignImplicit,
    APlusB,
    AMinusB,
    ATimesB,
    ADividedByB,
    AModB,
    APowB,
    AEqualB,
    ANotEqualB,
    AGreaterThanB,
    AGreatOrEqualB,
    ALessThanB,
    ALessOrEqualB,
    AisaB,
    AAndB,
    AOrB,
    NotA,
    GotoA,
    GotoAifB,
    /// Jumps only on fully-true (>= 1) values, letting fuzzy intermediates
    /// fall through; used for short-circuit `or`.
    GotoAifTrulyB,
    GotoAifNotB,
    PushParam,
    CallFuncA,
    CallIntrinsicA,
    ReturnA,
    ElemBofA,
    /// Positional element access for iteration; never walks the
    /// prototype chain.
    ElemBofIterA,
    LengthOfA,
    /// Assignment that additionally clones a container operand.
    CopyA,
}

impl Op {
    pub(crate) fn symbol(self) -> Option<&'static str> {
        match self {
            Op::APlusB => Some("+"),
            Op::AMinusB => Some("-"),
            Op::ATimesB => Some("*"),
            Op::ADividedByB => Some("/"),
            Op::AModB => Some("%"),
            Op::APowB => Some("^"),
            Op::AEqualB => Some("=="),
            Op::ANotEqualB => Some("!="),
            Op::AGreaterThanB => Some(">"),
            Op::AGreatOrEqualB => Some(">="),
            Op::ALessThanB => Some("<"),
            Op::ALessOrEqualB => Some("<="),
            Op::AisaB => Some("isa"),
            Op::AAndB => Some("and"),
            Op::AOrB => Some("or"),
            _ => None,
        }
    }
}

/// One compiled instruction: destination, opcode, and up to two source
/// operands, plus the source location the compiler recorded for error
/// reporting.
#[derive(Debug, Clone)]
pub struct Line {
    pub dest: Value,
    pub op: Op,
    pub a: Value,
    pub b: Value,
    pub location: Option<SourceLoc>,
}

impl Line {
    pub fn new(dest: Value, op: Op, a: Value, b: Value) -> Self {
        Self {
            dest,
            op,
            a,
            b,
            location: None,
        }
    }

    pub fn at(mut self, location: SourceLoc) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dest = self.dest.to_code_string();
        let a = self.a.to_code_string();
        let b = self.b.to_code_string();
        if let Some(sym) = self.op.symbol() {
            return write!(f, "{dest} := {a} {sym} {b}");
        }
        match self.op {
            Op::Noop => write!(f, "noop"),
            Op::AssignA => write!(f, "{dest} := {a}"),
            Op::AssignImplicit => write!(f, "implicit result := {a}"),
            Op::NotA => write!(f, "{dest} := not {a}"),
            Op::GotoA => write!(f, "goto {a}"),
            Op::GotoAifB => write!(f, "goto {a} if {b}"),
            Op::GotoAifTrulyB => write!(f, "goto {a} if truly {b}"),
            Op::GotoAifNotB => write!(f, "goto {a} if not {b}"),
            Op::PushParam => write!(f, "push param {a}"),
            Op::CallFuncA => write!(f, "{dest} := call {a} with {b} args"),
            Op::CallIntrinsicA => write!(f, "intrinsic {a}"),
            Op::ReturnA => write!(f, "return {a}"),
            Op::ElemBofA => write!(f, "{dest} := {a}[{b}]"),
            Op::ElemBofIterA => write!(f, "{dest} := {a} iter {b}"),
            Op::LengthOfA => write!(f, "{dest} := len({a})"),
            Op::CopyA => write!(f, "{dest} := copy of {a}"),
            _ => write!(f, "{dest} := {a} <op {:?}> {b}", self.op),
        }
    }
}
