use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Where a TAC line came from in the original source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    /// Source unit name (file, buffer, ...), if the compiler recorded one.
    pub context: Option<Arc<str>>,
    pub line: u32,
}

impl SourceLoc {
    pub fn new(context: Option<Arc<str>>, line: u32) -> Self {
        Self { context, line }
    }

    pub fn line(line: u32) -> Self {
        Self { context: None, line }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "[{} line {}]", ctx, self.line),
            None => write!(f, "[line {}]", self.line),
        }
    }
}

/// Language-level error categories. Raised at the point of detection and
/// re-raised to the host from `Machine::step`; the VM never swallows one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("Undefined Identifier: '{0}' is unknown in this context")]
    UndefinedIdentifier(String),
    #[error("Too Many Arguments")]
    TooManyArguments,
    #[error("Type Error: {0}")]
    TypeMismatch(String),
    #[error("Index Error (index {index} out of range; count is {count})")]
    IndexOutOfRange { index: i64, count: usize },
    #[error("Key Not Found: '{0}' not found in map")]
    KeyNotFound(String),
    #[error("Limit Exceeded: {0}")]
    LimitExceeded(String),
    #[error("Runtime Error: {0}")]
    Runtime(String),
}

/// An `ErrorKind` plus the source location of the failing line, attached
/// once at the `Machine::step` boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub location: Option<SourceLoc>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, location: None }
    }

    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Runtime(msg.into()))
    }

    pub fn type_mismatch<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::TypeMismatch(msg.into()))
    }

    pub fn undefined<S: Into<String>>(name: S) -> Self {
        Self::new(ErrorKind::UndefinedIdentifier(name.into()))
    }

    pub fn key_not_found<S: Into<String>>(key: S) -> Self {
        Self::new(ErrorKind::KeyNotFound(key.into()))
    }

    pub fn index_out_of_range(index: i64, count: usize) -> Self {
        Self::new(ErrorKind::IndexOutOfRange { index, count })
    }

    pub fn limit<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::LimitExceeded(msg.into()))
    }

    /// Attach a source location unless one is already present.
    pub fn with_location(mut self, loc: SourceLoc) -> Self {
        if self.location.is_none() {
            self.location = Some(loc);
        }
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} {}", self.kind, loc),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<ErrorKind> for RuntimeError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        let err = RuntimeError::undefined("foo").with_location(SourceLoc::line(3));
        assert_eq!(
            err.to_string(),
            "Undefined Identifier: 'foo' is unknown in this context [line 3]"
        );
    }

    #[test]
    fn test_with_location_keeps_first() {
        let err = RuntimeError::runtime("boom")
            .with_location(SourceLoc::line(1))
            .with_location(SourceLoc::line(9));
        assert_eq!(err.location, Some(SourceLoc::line(1)));
    }

    #[test]
    fn test_index_error_reports_bound() {
        let err = RuntimeError::index_out_of_range(5, 3);
        assert_eq!(err.to_string(), "Index Error (index 5 out of range; count is 3)");
    }
}
