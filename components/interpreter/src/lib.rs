//! Bytecode interpreter for the script runtime.
//!
//! This crate provides the virtual machine core:
//! - Heap arenas for structs, instances, classes, functions and namespaces
//! - The opcode dispatch loop with register-bank stack frames
//! - The namespace and module system with deferred import resolution
//! - The async bridge: suspension records and the resume pump
//! - The host API surface ([`Vm`]) and external binding registries
//!
//! # Example
//!
//! ```
//! use bytecode_system::BytecodeEmitter;
//! use core_types::{SourceType, Value};
//! use interpreter::{InterpreterConfig, Vm};
//!
//! let mut emitter = BytecodeEmitter::new("main.ht", SourceType::Script);
//! emitter.local_int(42);
//! emitter.end_module();
//! let bytes = emitter.finish();
//!
//! let mut vm = Vm::new(InterpreterConfig::default());
//! vm.init().unwrap();
//! let result = vm
//!     .load_bytecode(bytes, "main", false, None, vec![], vec![])
//!     .unwrap();
//! assert_eq!(result, Value::Integer(42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod access;
mod calls;
pub mod class;
pub mod config;
pub mod console;
pub mod context;
pub mod declaration;
mod dispatch;
pub mod frame;
pub mod function;
pub mod heap;
pub mod hstruct;
pub mod interop;
pub mod lexicon;
pub mod module;
pub mod namespace;
mod preincludes;
mod type_system;
pub mod vm;

pub use class::{HtClass, HtInstance, InstanceFrame, InstanceProbe};
pub use config::InterpreterConfig;
pub use console::{ConsoleObject, ConsoleWriter};
pub use context::{HtContext, Suspension};
pub use declaration::{DeclKind, Declaration, LateInit};
pub use frame::{LoopRecord, StackFrame};
pub use function::{HtFunction, HtParameter, RedirectingConstructor};
pub use heap::Heap;
pub use hstruct::{HtStruct, StructProbe};
pub use interop::{
    BoundExternalMethod, ExternalArguments, ExternalBindings, ExternalClass, ExternalClassRef,
    ExternalFunction, ExternalFunctionTypedef, ExternalReflection,
};
pub use module::{
    ByteModule, MemoryResourceContext, ResourceContext, SourceCompiler, SourceFile,
};
pub use namespace::{HtNamespace, UnresolvedImport};
pub use vm::Vm;
