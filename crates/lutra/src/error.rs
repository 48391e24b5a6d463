//! Error taxonomy and propagation types.
//!
//! Inside the engine, errors are values: the VM carries a [`RunError`] through
//! `Result` and `?`, and `throw`/`try` move the same payloads around as
//! JavaScript values. The embedder sees [`Exception`], which carries the
//! resolved message, the script name, a line, and a captured backtrace.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Value;

/// Result alias for the lexer and parser.
pub(crate) type LexResult<T> = Result<T, JsError>;

/// Result alias for operations that can raise a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// JavaScript error classes thrown by the engine.
///
/// The string representation matches the JS constructor name, which is what
/// `err.name` reports and what backtraces print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum JsErrorKind {
    /// Base error class.
    Error,
    /// Legacy placeholder; never raised by the engine itself.
    EvalError,
    /// Invariant violations inside the engine.
    InternalError,
    /// Out-of-memory. Materializes as the VM's pre-allocated singleton so the
    /// failure path never allocates.
    MemoryError,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    #[strum(serialize = "URIError")]
    UriError,
}

/// An error produced by the engine before it has been materialized as a heap
/// object: kind, message, and the source line when known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsError {
    pub kind: JsErrorKind,
    pub message: String,
    pub line: Option<u32>,
}

impl JsError {
    pub(crate) fn new(kind: JsErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub(crate) fn syntax(message: impl Into<String>, line: u32) -> Self {
        Self {
            kind: JsErrorKind::SyntaxError,
            message: message.into(),
            line: Some(line),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::new(JsErrorKind::TypeError, message)
    }

    pub(crate) fn reference(message: impl Into<String>) -> Self {
        Self::new(JsErrorKind::ReferenceError, message)
    }

    pub(crate) fn range(message: impl Into<String>) -> Self {
        Self::new(JsErrorKind::RangeError, message)
    }

    pub(crate) fn uri(message: impl Into<String>) -> Self {
        Self::new(JsErrorKind::UriError, message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(JsErrorKind::InternalError, message)
    }

    /// The distinguished allocation-failure error. Carries no message so the
    /// reporting path allocates nothing beyond this struct.
    pub(crate) fn memory() -> Self {
        Self {
            kind: JsErrorKind::MemoryError,
            message: String::new(),
            line: None,
        }
    }

    pub(crate) fn with_line(mut self, line: u32) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }
}

impl fmt::Display for JsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// A runtime failure travelling up the VM: either an engine-raised error that
/// has not touched the heap yet, or an arbitrary value thrown by `throw`.
#[derive(Debug, Clone)]
pub(crate) enum RunError {
    /// Engine-raised; materialized into an Error object only when caught by
    /// a `catch` or surfaced to the embedder.
    Js(JsError),
    /// A value thrown by user code; `throw 42` throws the number itself.
    Thrown(Value),
}

impl From<JsError> for RunError {
    fn from(err: JsError) -> Self {
        Self::Js(err)
    }
}

/// One entry of a captured backtrace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Function name, or `"main"` / `"module"` for top-level code.
    pub name: String,
    pub line: u32,
}

/// The embedder-facing error type.
///
/// Produced when a syntax error rejects a compilation or when an uncaught
/// throw escapes `run()`; implements `std::error::Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    pub kind: JsErrorKind,
    pub message: String,
    pub file_name: String,
    pub line: Option<u32>,
    pub stack: Vec<StackFrame>,
}

impl Exception {
    pub(crate) fn from_js(err: JsError, file_name: &str) -> Self {
        Self {
            kind: err.kind,
            message: err.message,
            file_name: file_name.to_owned(),
            line: err.line,
            stack: Vec::new(),
        }
    }

    /// Renders the backtrace the way `Error.prototype.stack` does.
    #[must_use]
    pub fn stack_string(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "{}", self.kind);
        if !self.message.is_empty() {
            let _ = write!(out, ": {}", self.message);
        }
        for frame in &self.stack {
            let _ = write!(out, "\n    at {} ({}:{})", frame.name, self.file_name, frame.line);
        }
        out
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)?;
        } else {
            write!(f, "{}: {}", self.kind, self.message)?;
        }
        match self.line {
            Some(line) => write!(f, " in {}:{}", self.file_name, line),
            None => Ok(()),
        }
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_js_constructors() {
        assert_eq!(JsErrorKind::UriError.to_string(), "URIError");
        assert_eq!(JsErrorKind::TypeError.to_string(), "TypeError");
        assert_eq!("SyntaxError".parse::<JsErrorKind>().unwrap(), JsErrorKind::SyntaxError);
    }

    #[test]
    fn exception_display() {
        let exc = Exception::from_js(JsError::syntax("unexpected token \")\"", 3), "test.js");
        assert_eq!(exc.to_string(), "SyntaxError: unexpected token \")\" in test.js:3");
    }
}
