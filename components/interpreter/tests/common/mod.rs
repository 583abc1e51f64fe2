//! Shared helpers for assembling and running bytecode in tests.
//!
//! The compiler is an external collaborator, so tests speak the wire format
//! directly through the emitter, which also pins the format.

#![allow(dead_code)]

use bytecode_system::{BytecodeEmitter, StructField};
use core_types::{HtError, SourceType, Value};
use interpreter::{InterpreterConfig, Vm};

/// A fresh, initialized interpreter.
pub fn new_vm() -> Vm {
    let mut vm = Vm::new(InterpreterConfig::default());
    vm.init().expect("init should succeed");
    vm
}

/// A fresh interpreter with a custom configuration.
pub fn new_vm_with(config: InterpreterConfig) -> Vm {
    let mut vm = Vm::new(config);
    vm.init().expect("init should succeed");
    vm
}

/// Assemble a script-mode module image.
pub fn script_image(build: impl FnOnce(&mut BytecodeEmitter)) -> Vec<u8> {
    let mut emitter = BytecodeEmitter::new("main.ht", SourceType::Script);
    build(&mut emitter);
    emitter.end_module();
    emitter.finish()
}

/// Load a script image into an interpreter and return its value.
pub fn eval_script(
    vm: &mut Vm,
    build: impl FnOnce(&mut BytecodeEmitter),
) -> Result<Value, HtError> {
    vm.load_bytecode(script_image(build), "main", false, None, vec![], vec![])
}

/// Run a script in a fresh interpreter, panicking on errors.
pub fn run_script(build: impl FnOnce(&mut BytecodeEmitter)) -> Value {
    let mut vm = new_vm();
    eval_script(&mut vm, build).expect("script should run")
}

/// A positional call argument.
pub fn arg<'a>(
    build: impl FnOnce(&mut BytecodeEmitter) + 'a,
) -> (bool, Box<dyn FnOnce(&mut BytecodeEmitter) + 'a>) {
    (false, Box::new(build))
}

/// A spread call argument.
pub fn spread_arg<'a>(
    build: impl FnOnce(&mut BytecodeEmitter) + 'a,
) -> (bool, Box<dyn FnOnce(&mut BytecodeEmitter) + 'a>) {
    (true, Box::new(build))
}

/// A named call argument.
pub fn named_arg<'a>(
    name: &'a str,
    build: impl FnOnce(&mut BytecodeEmitter) + 'a,
) -> (&'a str, Box<dyn FnOnce(&mut BytecodeEmitter) + 'a>) {
    (name, Box::new(build))
}

/// A `key: value` struct literal field.
pub fn field<'a>(
    key: &'a str,
    build: impl FnOnce(&mut BytecodeEmitter) + 'a,
) -> StructField<'a> {
    StructField::Field(key, Box::new(build))
}

/// A `...source` struct literal field.
pub fn spread_field<'a>(build: impl FnOnce(&mut BytecodeEmitter) + 'a) -> StructField<'a> {
    StructField::Spread(Box::new(build))
}

/// Typed `None` for optional emitter regions.
pub fn no_init() -> Option<fn(&mut BytecodeEmitter)> {
    None
}
