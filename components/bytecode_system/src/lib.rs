//! Bytecode format for the script runtime.
//!
//! This crate defines both halves of the wire format:
//! - [`BytecodeReader`] - a bounds-checked cursor used by the dispatch loop
//! - [`BytecodeEmitter`] - the builder driven by the external compiler and
//!   by tests to assemble loadable images
//! - [`Opcode`], [`LiteralKind`], [`Register`] - the fixed byte values
//!
//! A bytecode image is a flat little-endian byte stream: a header (magic,
//! compiler version, timestamp, filename, source kind), the three global
//! constant tables, the instruction stream, and an end-of-code terminator.
//!
//! # Example
//!
//! ```
//! use bytecode_system::{BytecodeEmitter, BytecodeHeader, BytecodeReader};
//! use core_types::SourceType;
//!
//! let mut emitter = BytecodeEmitter::new("main.ht", SourceType::Script);
//! emitter.local_int(42);
//! emitter.end_module();
//! let bytes = emitter.finish();
//!
//! let mut reader = BytecodeReader::new(bytes);
//! let header = BytecodeHeader::read(&mut reader).unwrap();
//! assert_eq!(header.filename, "main.ht");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod emitter;
mod opcode;
mod reader;

pub use emitter::{
    BytecodeEmitter, BytecodeHeader, FuncSpec, ParamSpec, RedirectSpec, StructField, VarDeclFlags,
};
pub use opcode::{
    DeleteKind, FunctionCategory, IntrinsicCode, LiteralKind, Opcode, Register, TypeCode, MAGIC,
    REGISTER_COUNT,
};
pub use reader::BytecodeReader;
