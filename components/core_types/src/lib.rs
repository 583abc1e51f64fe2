//! Core script value types and error handling.
//!
//! This crate provides the foundational types for the script runtime,
//! including value representation, runtime error types, type objects,
//! source location tracking, and the semantic version tuple carried by
//! compiled bytecode.
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of script values
//! - [`HtError`] - Runtime errors with script-level stack traces
//! - [`ErrorKind`] - Types of runtime errors
//! - [`HtType`] - Intrinsic, nominal, function and structural type objects
//! - [`SourcePosition`] - Source code location
//! - [`StackTraceFrame`] - Script-level call stack frame information
//! - [`HtVersion`] - Semantic version tuple with the compatibility rule
//!
//! # Examples
//!
//! ```
//! use core_types::{Value, HtError, ErrorKind};
//!
//! let num = Value::Integer(42);
//! assert_eq!(num.type_name(), "int");
//!
//! let error = HtError::undefined("x");
//! assert_eq!(error.kind, ErrorKind::Undefined);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod htype;
mod source;
mod value;
mod version;

pub use error::{ErrorKind, HtError};
pub use htype::{FunctionType, HtType, IntrinsicType, NominalType, ParameterType, StructuralType};
pub use source::{SourcePosition, SourceType, StackTraceFrame};
pub use value::{CastView, ClassId, FunctionId, InstanceId, NamespaceId, StructId, Value};
pub use version::HtVersion;
