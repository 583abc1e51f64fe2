//! Runtime error types and error handling.
//!
//! This module provides the error type raised by the bytecode loop and the
//! host API surface, along with script-level stack trace information.

use std::fmt;

use crate::source::StackTraceFrame;

/// The kind of runtime error.
///
/// Static (parser/analyzer) errors are produced by the external compiler and
/// never reach this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reference to an undefined symbol
    Undefined,
    /// Redefinition of an existing symbol without override
    Defined,
    /// Access to a private member from outside its namespace
    PrivateMember,
    /// Call target is not callable
    NotCallable,
    /// `new` applied to something that cannot be constructed
    NotNewable,
    /// Call target is null
    CallNullObject,
    /// Member access on a null object without nullable access
    VisitMemberOfNullObject,
    /// Subscript key has the wrong kind for the collection
    SubGetKey,
    /// `delete` applied to something that is not a struct or namespace entry
    Delete,
    /// Subscript assignment on a null object
    NullSubSetKey,
    /// `as` applied to a non-instance value
    Castee,
    /// `as` target type is not in the value's hierarchy
    TypeCast,
    /// Instantiation of an abstract class
    Abstracted,
    /// Spread applied to a value that cannot be spread
    NotSpreadableObj,
    /// More positional arguments than declared parameters
    ExtraPositionalArg,
    /// Fewer positional arguments than required parameters
    MissingPositionalArg,
    /// Named argument does not match a declared parameter
    ExtraNamedArg,
    /// Instruction byte does not decode to an opcode
    UnknownOpCode,
    /// Literal kind byte does not decode to a value type
    UnknownValueType,
    /// Malformed bytecode (bad magic, truncated read, corrupt pool)
    Bytecode,
    /// Incompatible compiler version stamp
    Version,
    /// Error raised by an external function or a rejected host future
    Extern,
    /// `throw` statement in script code
    ScriptThrows,
    /// Failed `assert` statement
    AssertionFailed,
    /// External binding id not found in the registry
    UndefinedExternal,
    /// Module or resource key not known to the resource context
    ResourceNotFound,
}

/// A runtime error with message, source position and script stack trace.
///
/// # Examples
///
/// ```
/// use core_types::{HtError, ErrorKind};
///
/// let error = HtError::not_callable("3");
/// assert_eq!(error.kind, ErrorKind::NotCallable);
/// assert!(error.message.contains("3"));
/// ```
#[derive(Debug, Clone)]
pub struct HtError {
    /// The kind of error
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Additional detail, e.g. the stringified operand of a throw
    pub extra: Option<String>,
    /// Suggested correction, when one is known
    pub correction: Option<String>,
    /// Source file the error occurred in
    pub filename: Option<String>,
    /// 1-based source line
    pub line: Option<u32>,
    /// 1-based source column
    pub column: Option<u32>,
    /// Script-level stack trace, innermost frame first
    pub stack: Vec<StackTraceFrame>,
}

impl HtError {
    /// Create an error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            extra: None,
            correction: None,
            filename: None,
            line: None,
            column: None,
            stack: Vec::new(),
        }
    }

    /// Attach the source position the loop was at when the error was raised.
    ///
    /// Existing position information is kept, so the innermost site wins when
    /// the error crosses several re-entries.
    pub fn with_position(mut self, filename: &str, line: u32, column: u32) -> Self {
        if self.filename.is_none() {
            self.filename = Some(filename.to_string());
            self.line = Some(line);
            self.column = Some(column);
        }
        self
    }

    /// Attach the script-level stack trace, if none was recorded yet.
    pub fn with_stack(mut self, stack: Vec<StackTraceFrame>) -> Self {
        if self.stack.is_empty() {
            self.stack = stack;
        }
        self
    }

    /// Undefined symbol reference.
    pub fn undefined(id: &str) -> Self {
        Self::new(ErrorKind::Undefined, format!("Undefined symbol: [{}]", id))
    }

    /// Redefinition of an existing symbol.
    pub fn defined(id: &str) -> Self {
        Self::new(ErrorKind::Defined, format!("[{}] is already defined", id))
    }

    /// Private member accessed from outside its namespace.
    pub fn private_member(id: &str) -> Self {
        Self::new(
            ErrorKind::PrivateMember,
            format!("Cannot access private member [{}]", id),
        )
    }

    /// Call applied to a value that is not callable.
    pub fn not_callable(repr: &str) -> Self {
        Self::new(ErrorKind::NotCallable, format!("[{}] is not callable", repr))
    }

    /// `new` applied to a value that cannot be constructed.
    pub fn not_newable(repr: &str) -> Self {
        Self::new(
            ErrorKind::NotNewable,
            format!("[{}] is not newable", repr),
        )
    }

    /// Call applied to null.
    pub fn call_null_object() -> Self {
        Self::new(ErrorKind::CallNullObject, "Calling method on null object")
    }

    /// Member access on null without nullable access.
    pub fn visit_member_of_null_object(key: &str) -> Self {
        Self::new(
            ErrorKind::VisitMemberOfNullObject,
            format!("Visiting member [{}] on null object", key),
        )
    }

    /// Subscript key of the wrong kind.
    pub fn sub_get_key(key: &str) -> Self {
        Self::new(ErrorKind::SubGetKey, format!("Invalid subscript key: [{}]", key))
    }

    /// Subscript assignment on null.
    pub fn null_sub_set_key() -> Self {
        Self::new(ErrorKind::NullSubSetKey, "Subscript assignment on null object")
    }

    /// `delete` on something that cannot be deleted.
    pub fn delete() -> Self {
        Self::new(ErrorKind::Delete, "Can only delete struct or namespace members")
    }

    /// Cast applied to a non-instance value.
    pub fn castee(repr: &str) -> Self {
        Self::new(ErrorKind::Castee, format!("Illegal cast target: [{}]", repr))
    }

    /// Cast to a type outside the value's hierarchy.
    pub fn type_cast(from: &str, to: &str) -> Self {
        Self::new(
            ErrorKind::TypeCast,
            format!("Cannot cast [{}] into type [{}]", from, to),
        )
    }

    /// Instantiation of an abstract class.
    pub fn abstracted(id: &str) -> Self {
        Self::new(
            ErrorKind::Abstracted,
            format!("Cannot create instance from abstract class [{}]", id),
        )
    }

    /// Spread on a value that cannot be spread.
    pub fn not_spreadable(repr: &str) -> Self {
        Self::new(
            ErrorKind::NotSpreadableObj,
            format!("[{}] is not spreadable", repr),
        )
    }

    /// Too many positional arguments.
    pub fn extra_positional_arg(func: &str) -> Self {
        Self::new(
            ErrorKind::ExtraPositionalArg,
            format!("Too many positional arguments for [{}]", func),
        )
    }

    /// A required positional parameter received no argument.
    pub fn missing_positional_arg(param: &str, func: &str) -> Self {
        Self::new(
            ErrorKind::MissingPositionalArg,
            format!("Missing argument [{}] for [{}]", param, func),
        )
    }

    /// Named argument without a matching declared parameter.
    pub fn extra_named_arg(id: &str, func: &str) -> Self {
        Self::new(
            ErrorKind::ExtraNamedArg,
            format!("Undefined named argument [{}] for [{}]", id, func),
        )
    }

    /// Unknown instruction byte.
    pub fn unknown_opcode(byte: u8) -> Self {
        Self::new(ErrorKind::UnknownOpCode, format!("Unknown opcode [{:#04x}]", byte))
    }

    /// Unknown literal kind byte.
    pub fn unknown_value_type(byte: u8) -> Self {
        Self::new(
            ErrorKind::UnknownValueType,
            format!("Unknown value type code [{:#04x}]", byte),
        )
    }

    /// Malformed bytecode.
    pub fn bytecode(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Bytecode, detail)
    }

    /// Incompatible compiler version.
    pub fn version(have: &str, want: &str) -> Self {
        Self::new(
            ErrorKind::Version,
            format!("Incompatible version: bytecode [{}], interpreter [{}]", have, want),
        )
    }

    /// Error raised from an external function or rejected host future.
    pub fn extern_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Extern, detail)
    }

    /// `throw` in script code; the payload is the stringified operand.
    pub fn script_throws(payload: impl Into<String>) -> Self {
        let payload = payload.into();
        let mut error = Self::new(ErrorKind::ScriptThrows, format!("Thrown: {}", payload));
        error.extra = Some(payload);
        error
    }

    /// Failed assertion, optionally with the asserted expression text.
    pub fn assertion_failed(description: &str) -> Self {
        Self::new(
            ErrorKind::AssertionFailed,
            format!("Assertion failed on [{}]", description),
        )
    }

    /// External binding id not found.
    pub fn undefined_external(id: &str) -> Self {
        Self::new(
            ErrorKind::UndefinedExternal,
            format!("Undefined external symbol: [{}]", id),
        )
    }

    /// Module or resource key not found.
    pub fn resource_not_found(key: &str) -> Self {
        Self::new(
            ErrorKind::ResourceNotFound,
            format!("Resource with key [{}] not found", key),
        )
    }
}

impl fmt::Display for HtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let (Some(filename), Some(line), Some(column)) =
            (&self.filename, self.line, self.column)
        {
            write!(f, " [{}:{}:{}]", filename, line, column)?;
        }
        for frame in &self.stack {
            write!(f, "\n  {}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for HtError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        assert_eq!(HtError::undefined("x").kind, ErrorKind::Undefined);
        assert_eq!(HtError::call_null_object().kind, ErrorKind::CallNullObject);
        assert_eq!(HtError::bytecode("bad").kind, ErrorKind::Bytecode);
        assert_eq!(
            HtError::type_cast("B", "C").kind,
            ErrorKind::TypeCast
        );
    }

    #[test]
    fn test_with_position_keeps_innermost() {
        let error = HtError::undefined("x")
            .with_position("a.ht", 3, 7)
            .with_position("b.ht", 9, 1);
        assert_eq!(error.filename.as_deref(), Some("a.ht"));
        assert_eq!(error.line, Some(3));
        assert_eq!(error.column, Some(7));
    }

    #[test]
    fn test_script_throws_carries_payload() {
        let error = HtError::script_throws("boom");
        assert_eq!(error.kind, ErrorKind::ScriptThrows);
        assert_eq!(error.extra.as_deref(), Some("boom"));
    }

    #[test]
    fn test_display_with_position() {
        let error = HtError::undefined("x").with_position("main.ht", 2, 5);
        let text = error.to_string();
        assert!(text.contains("Undefined"));
        assert!(text.contains("main.ht:2:5"));
    }
}
