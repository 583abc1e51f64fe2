//! Modules, imports, exports, resources and bytecode validation.

mod common;

use bytecode_system::{BytecodeEmitter, FuncSpec, Register, VarDeclFlags};
use common::*;
use core_types::{ErrorKind, HtError, HtVersion, SourceType, Value};
use interpreter::{MemoryResourceContext, SourceCompiler, Vm};
use std::collections::HashMap;

fn mutable() -> VarDeclFlags {
    VarDeclFlags {
        is_mutable: true,
        ..Default::default()
    }
}

/// Stands in for the external compiler: maps source keys to prebuilt images.
struct StubCompiler {
    images: HashMap<String, Vec<u8>>,
}

impl StubCompiler {
    fn new() -> Self {
        Self {
            images: HashMap::new(),
        }
    }

    fn add(&mut self, key: &str, image: Vec<u8>) {
        self.images.insert(key.to_string(), image);
    }
}

impl SourceCompiler for StubCompiler {
    fn compile(
        &mut self,
        _source: &str,
        key: &str,
        _source_type: SourceType,
    ) -> Result<Vec<u8>, HtError> {
        self.images
            .get(key)
            .cloned()
            .ok_or_else(|| HtError::resource_not_found(key))
    }
}

#[test]
fn test_import_show_filter() {
    // a.ht: var hidden = 1; var shown = 2
    // b.ht: import 'a.ht' show shown; shown
    let mut emitter = BytecodeEmitter::new("a.ht", SourceType::Script);
    emitter.var_decl("hidden", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(1)));
    emitter.var_decl("shown", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(2)));
    emitter.end_file();
    emitter.file("b.ht", SourceType::Script);
    emitter.import_export_decl(Some("a.ht"), &["shown"], None, false, false);
    emitter.identifier("shown", true);
    emitter.end_module();

    let mut vm = new_vm();
    let result = vm
        .load_bytecode(emitter.finish(), "main", false, None, vec![], vec![])
        .unwrap();
    assert_eq!(result, Value::Integer(2));

    // `hidden` was not copied
    let error = vm.fetch("hidden").unwrap_err();
    assert_eq!(error.kind, ErrorKind::Undefined);
}

#[test]
fn test_import_missing_shown_symbol_fails() {
    let mut emitter = BytecodeEmitter::new("a.ht", SourceType::Script);
    emitter.var_decl("x", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(1)));
    emitter.end_file();
    emitter.file("b.ht", SourceType::Script);
    emitter.import_export_decl(Some("a.ht"), &["ghost"], None, false, false);
    emitter.end_module();

    let mut vm = new_vm();
    let error = vm
        .load_bytecode(emitter.finish(), "main", false, None, vec![], vec![])
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Undefined);
}

#[test]
fn test_import_with_alias() {
    let mut emitter = BytecodeEmitter::new("math.ht", SourceType::Script);
    emitter.var_decl("tau", mutable(), None, Some(|e: &mut BytecodeEmitter| {
        e.local_float(6.28)
    }));
    emitter.end_file();
    emitter.file("main.ht", SourceType::Script);
    emitter.import_export_decl(Some("math.ht"), &[], Some("math"), false, false);
    // math.tau
    emitter.identifier("math", true);
    emitter.store(Register::PostfixObject);
    emitter.identifier("tau", false);
    emitter.store(Register::PostfixKey);
    emitter.member_get(false);
    emitter.end_module();

    let mut vm = new_vm();
    let result = vm
        .load_bytecode(emitter.finish(), "main", false, None, vec![], vec![])
        .unwrap();
    assert_eq!(result, Value::Float(6.28));
}

#[test]
fn test_explicit_exports_limit_the_default() {
    // lib.ht exports only `shown`; a plain import copies just that
    let mut emitter = BytecodeEmitter::new("lib.ht", SourceType::Script);
    emitter.var_decl("shown", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(1)));
    emitter.var_decl("other", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(2)));
    emitter.import_export_decl(None, &["shown"], None, true, false);
    emitter.end_file();
    emitter.file("main.ht", SourceType::Script);
    emitter.import_export_decl(Some("lib.ht"), &[], None, false, false);
    emitter.identifier("shown", true);
    emitter.end_module();

    let mut vm = new_vm();
    let result = vm
        .load_bytecode(emitter.finish(), "main", false, None, vec![], vec![])
        .unwrap();
    assert_eq!(result, Value::Integer(1));
    assert_eq!(vm.fetch("other").unwrap_err().kind, ErrorKind::Undefined);
}

#[test]
fn test_private_symbols_never_exported() {
    let mut emitter = BytecodeEmitter::new("lib.ht", SourceType::Script);
    emitter.var_decl("_secret", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(1)));
    emitter.end_file();
    emitter.file("main.ht", SourceType::Script);
    emitter.import_export_decl(Some("lib.ht"), &[], None, false, false);
    emitter.identifier("_secret", true);
    emitter.end_module();

    let mut vm = new_vm();
    let error = vm
        .load_bytecode(emitter.finish(), "main", false, None, vec![], vec![])
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Undefined);
}

#[test]
fn test_preloaded_module_import() {
    // Load a module, then import it by cache id from a script
    let mut vm = new_vm();
    let library = {
        let mut emitter = BytecodeEmitter::new("lib.ht", SourceType::Module);
        emitter.var_decl("answer", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_int(42)
        }));
        emitter.end_module();
        emitter.finish()
    };
    vm.load_bytecode(library, "lib", false, None, vec![], vec![])
        .unwrap();

    let result = eval_script(&mut vm, |e| {
        e.import_export_decl(Some("module:lib"), &[], None, false, true);
        e.identifier("answer", true);
    })
    .unwrap();
    assert_eq!(result, Value::Integer(42));
}

#[test]
fn test_json_resource_import() {
    let mut resources = MemoryResourceContext::new();
    resources.add(
        "config.json",
        SourceType::Json,
        "{\"name\": \"demo\", \"port\": 8080}",
    );
    let mut vm = Vm::default().with_resource_context(Box::new(resources));
    vm.init().unwrap();

    let result = eval_script(&mut vm, |e| {
        e.import_export_decl(Some("config.json"), &[], Some("config"), false, false);
        e.identifier("config", true);
        e.store(Register::PostfixObject);
        e.identifier("port", false);
        e.store(Register::PostfixKey);
        e.member_get(false);
    })
    .unwrap();
    assert_eq!(result, Value::Integer(8080));
}

#[test]
fn test_require_compiles_on_demand() {
    let mut resources = MemoryResourceContext::new();
    resources.add("util.ht", SourceType::Module, "var double = ...");
    let mut compiler = StubCompiler::new();
    compiler.add("util.ht", {
        let mut emitter = BytecodeEmitter::new("util.ht", SourceType::Module);
        emitter.var_decl("answer", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_int(42)
        }));
        emitter.end_module();
        emitter.finish()
    });
    let mut vm = Vm::default()
        .with_resource_context(Box::new(resources))
        .with_compiler(Box::new(compiler));
    vm.init().unwrap();

    let namespace = vm.require("util.ht").unwrap();
    let ns = match namespace {
        Value::Namespace(ns) => ns,
        other => panic!("expected a namespace, got {:?}", other),
    };
    let decl = vm.heap().ns_lookup(ns, "answer", None, false).unwrap().unwrap();
    assert_eq!(decl.value, Value::Integer(42));

    // A second require returns the cached module
    assert_eq!(vm.require("util.ht").unwrap(), Value::Namespace(ns));
}

#[test]
fn test_eval_without_compiler_fails() {
    let mut vm = new_vm();
    let error = vm.eval("1 + 1", None, None, None, vec![], vec![]).unwrap_err();
    assert_eq!(error.kind, ErrorKind::Extern);
}

#[test]
fn test_magic_mismatch_fails_bytecode() {
    let mut vm = new_vm();
    let mut bytes = script_image(|e| e.local_int(1));
    bytes[0] = 0x00;
    let error = vm
        .load_bytecode(bytes, "main", false, None, vec![], vec![])
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Bytecode);
}

#[test]
fn test_compiler_version_drift_fails_version() {
    let mut vm = new_vm();
    let mut emitter = BytecodeEmitter::new("main.ht", SourceType::Script)
        .with_version(HtVersion::new(9, 0, 0));
    emitter.local_int(1);
    emitter.end_module();
    let error = vm
        .load_bytecode(emitter.finish(), "main", false, None, vec![], vec![])
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Version);
    // The interpreter survives and can still load valid images
    let result = eval_script(&mut vm, |e| e.local_int(1)).unwrap();
    assert_eq!(result, Value::Integer(1));
}

#[test]
fn test_invoke_on_load() {
    let mut vm = new_vm();
    let image = script_image(|e| {
        e.func_decl(FuncSpec::function("answer", |e| e.local_int(42)));
    });
    let result = vm
        .load_bytecode(image, "main", false, Some("answer"), vec![], vec![])
        .unwrap();
    assert_eq!(result, Value::Integer(42));
}

#[test]
fn test_globally_import_folds_into_global() {
    let mut vm = new_vm();
    let image = script_image(|e| {
        e.var_decl("shared", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_int(7)
        }));
    });
    vm.load_bytecode(image, "first", true, None, vec![], vec![])
        .unwrap();

    // A second, unrelated module sees the folded symbol through the chain
    let result = eval_script(&mut vm, |e| {
        e.identifier("shared", true);
    })
    .unwrap();
    assert_eq!(result, Value::Integer(7));
}

#[test]
fn test_module_mode_defers_imports_to_end() {
    // In module mode the import record resolves at end of module, not at
    // its declaration site
    let mut vm = new_vm();
    let library = {
        let mut emitter = BytecodeEmitter::new("lib.ht", SourceType::Module);
        emitter.var_decl("answer", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_int(42)
        }));
        emitter.end_module();
        emitter.finish()
    };
    vm.load_bytecode(library, "lib", false, None, vec![], vec![])
        .unwrap();

    let module = {
        let mut emitter = BytecodeEmitter::new("user.ht", SourceType::Module);
        emitter.import_export_decl(Some("module:lib"), &[], None, false, true);
        emitter.func_decl(FuncSpec::function("read", |e| {
            e.identifier("answer", true);
        }));
        emitter.end_module();
        emitter.finish()
    };
    vm.load_bytecode(module, "user", false, None, vec![], vec![])
        .unwrap();
    let result = vm.invoke("read", vec![], vec![]).unwrap();
    assert_eq!(result, Value::Integer(42));
}

#[test]
fn test_compiled_at_and_version_are_recorded() {
    let mut vm = new_vm();
    let mut emitter = BytecodeEmitter::new("main.ht", SourceType::Script)
        .with_compiled_at("2024-06-01T12:00:00Z");
    emitter.local_int(1);
    emitter.end_module();
    vm.load_bytecode(emitter.finish(), "main", false, None, vec![], vec![])
        .unwrap();
    let module = vm.module("main").expect("module should be cached");
    assert_eq!(module.compiled_at, "2024-06-01T12:00:00Z");
    assert_eq!(module.compiler_version, HtVersion::interpreter());
}

#[test]
fn test_kt_version_constant_defined() {
    let mut vm = new_vm();
    let version = vm.fetch("kHetuVersion").unwrap();
    assert_eq!(
        version,
        Value::String(HtVersion::interpreter().to_string())
    );
}
