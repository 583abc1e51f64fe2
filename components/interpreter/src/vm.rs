//! The interpreter facade: the host API surface.
//!
//! One [`Vm`] owns the heap, the module cache, the external binding
//! registries and the async pump. Hosts drive it through `eval`,
//! `load_bytecode`, `require`, `invoke` and the `bind_external_*` family,
//! and pump outstanding awaits with [`Vm::drive`].

use async_runtime::{with_future, FutureState, SharedFuture};
use bytecode_system::{BytecodeHeader, BytecodeReader, Opcode};
use core_types::{HtError, HtVersion, NamespaceId, SourceType, StackTraceFrame, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::calls::CallSite;
use crate::config::InterpreterConfig;
use crate::console::ConsoleObject;
use crate::context::Suspension;
use crate::declaration::{DeclKind, Declaration};
use crate::dispatch::{ExecState, LoopExit};
use crate::frame::StackFrame;
use crate::heap::Heap;
use crate::interop::{
    ExternalBindings, ExternalClass, ExternalClassRef, ExternalFunction,
    ExternalFunctionTypedef, ExternalReflection,
};
use crate::lexicon;
use crate::module::{ByteModule, MemoryResourceContext, ResourceContext, SourceCompiler};
use crate::namespace::UnresolvedImport;
use crate::preincludes;

/// A suspended async call paired with the future its completion resolves.
pub(crate) struct PendingResume {
    /// The suspension returned out of the loop
    pub suspension: Suspension,
    /// The async call's host-visible result future
    pub result: SharedFuture,
}

/// One interpreter instance.
///
/// # Examples
///
/// ```
/// use interpreter::{InterpreterConfig, Vm};
///
/// let mut vm = Vm::new(InterpreterConfig::default());
/// vm.init().unwrap();
/// assert!(vm.fetch("kHetuVersion").is_ok());
/// ```
pub struct Vm {
    pub(crate) config: InterpreterConfig,
    pub(crate) heap: Heap,
    pub(crate) global: NamespaceId,
    pub(crate) modules: HashMap<String, ByteModule>,
    pub(crate) bindings: ExternalBindings,
    pub(crate) console: Rc<ConsoleObject>,
    pub(crate) resources: Box<dyn ResourceContext>,
    pub(crate) compiler: Option<Box<dyn SourceCompiler>>,
    pub(crate) frames: Vec<StackFrame>,
    pub(crate) pending: Vec<PendingResume>,
    pub(crate) tracked_futures: Vec<Rc<RefCell<dyn Any>>>,
    pub(crate) stack_trace: Vec<StackTraceFrame>,
    entry_module: Option<String>,
    initialized: bool,
}

impl Vm {
    /// Create an interpreter with the given configuration.
    pub fn new(config: InterpreterConfig) -> Self {
        let mut heap = Heap::new();
        let global = heap.alloc_namespace(lexicon::GLOBAL, None, None);
        heap.namespace_mut(global).will_export_all = true;
        Self {
            config,
            heap,
            global,
            modules: HashMap::new(),
            bindings: ExternalBindings::new(),
            console: Rc::new(ConsoleObject::new()),
            resources: Box::new(MemoryResourceContext::new()),
            compiler: None,
            frames: vec![StackFrame::new()],
            pending: Vec::new(),
            tracked_futures: Vec::new(),
            stack_trace: Vec::new(),
            entry_module: None,
            initialized: false,
        }
    }

    /// Replace the resource context.
    pub fn with_resource_context(mut self, resources: Box<dyn ResourceContext>) -> Self {
        self.resources = resources;
        self
    }

    /// Install a source compiler for `eval` and dynamic `require`.
    pub fn with_compiler(mut self, compiler: Box<dyn SourceCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Capture console output into a shared buffer instead of stdout.
    pub fn with_console_capture(mut self, output: Rc<RefCell<Vec<String>>>) -> Self {
        self.console = Rc::new(ConsoleObject::with_capture(output));
        self
    }

    /// Install the preincluded bindings and globals. Idempotent.
    pub fn init(&mut self) -> Result<(), HtError> {
        if self.initialized {
            return Ok(());
        }
        preincludes::install(self)?;
        self.heap.ns_define(
            self.global,
            Declaration::immutable(
                lexicon::VERSION_CONSTANT,
                DeclKind::Constant,
                Value::String(HtVersion::interpreter().to_string()),
            ),
            true,
        )?;
        self.heap.ns_define(
            self.global,
            Declaration::immutable(
                lexicon::GLOBAL,
                DeclKind::Namespace,
                Value::Namespace(self.global),
            ),
            true,
        )?;
        self.initialized = true;
        Ok(())
    }

    /// The global namespace handle.
    pub fn global_namespace(&self) -> NamespaceId {
        self.global
    }

    /// Shared view of the heap, for hosts inspecting results.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// A cached module by id.
    pub fn module(&self, id: &str) -> Option<&ByteModule> {
        self.modules.get(id)
    }

    /// Current depth of the frame stack.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether the base frame's registers and auxiliary stacks are cleared.
    pub fn base_frame_cleared(&self) -> bool {
        self.frames.first().map(StackFrame::is_cleared).unwrap_or(false)
    }

    // -- loading ------------------------------------------------------------

    /// Install and run a bytecode image as a module.
    ///
    /// Fatal conditions (bad magic, incompatible compiler version, corrupt
    /// pools) fail this call and leave the interpreter otherwise intact.
    pub fn load_bytecode(
        &mut self,
        bytes: Vec<u8>,
        module_id: &str,
        globally_import: bool,
        invoke: Option<&str>,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
    ) -> Result<Value, HtError> {
        let mut reader = BytecodeReader::new(bytes);
        let header = BytecodeHeader::read(&mut reader)?;
        // Constant pools sit between the header and the instructions
        while reader.has_remaining() {
            let at = reader.ip();
            let byte = reader.read_u8()?;
            match Opcode::from_byte(byte) {
                Some(Opcode::ConstIntTable) => reader.read_const_int_table()?,
                Some(Opcode::ConstFloatTable) => reader.read_const_float_table()?,
                Some(Opcode::ConstStringTable) => reader.read_const_string_table()?,
                _ => {
                    reader.set_ip(at);
                    break;
                }
            }
        }

        let source_type = header.source_type;
        let namespace = if source_type == SourceType::Literal {
            self.global
        } else {
            let ns = self
                .heap
                .alloc_namespace(&header.filename, Some(self.global), None);
            self.heap.namespace_mut(ns).will_export_all = true;
            ns
        };
        let module = ByteModule {
            id: module_id.to_string(),
            reader: reader.clone(),
            compiler_version: header.compiler_version,
            bytecode_version: header.bytecode_version,
            compiled_at: header.compiled_at,
            source_type,
            namespaces: [(header.filename.clone(), namespace)].into_iter().collect(),
            namespace_order: vec![header.filename.clone()],
            json_sources: HashMap::new(),
        };
        self.modules.insert(module_id.to_string(), module);
        self.entry_module = Some(module_id.to_string());

        let mut state = ExecState {
            module: module_id.to_string(),
            reader,
            namespace,
            ns_stack: Vec::new(),
            class_stack: Vec::new(),
            filename: header.filename,
            line: 0,
            column: 0,
            function_name: module_id.to_string(),
        };
        let exit = self.run(&mut state)?;
        let value = match exit {
            LoopExit::Module(value) | LoopExit::Code(value) => value,
            LoopExit::Suspended(_) => {
                return Err(HtError::extern_error(
                    "await is not allowed at the top level of a module",
                ))
            }
            _ => return Err(HtError::bytecode("Unbalanced module image")),
        };

        self.resolve_module_imports(module_id)?;
        if globally_import {
            if let Some(entry) = self
                .modules
                .get(module_id)
                .and_then(ByteModule::entry_namespace)
            {
                self.heap.ns_import(self.global, entry, &[], false)?;
            }
        }
        if !self.config.resolve_external_functions_dynamically {
            self.validate_external_bindings(module_id)?;
        }
        self.reset_base_frame();

        if let Some(name) = invoke {
            return self.invoke(name, positional, named);
        }
        match source_type {
            SourceType::Script | SourceType::Literal => Ok(value),
            _ => {
                let entry = self
                    .modules
                    .get(module_id)
                    .and_then(ByteModule::entry_namespace)
                    .unwrap_or(self.global);
                Ok(Value::Namespace(entry))
            }
        }
    }

    /// Render an error through the console when the policy asks for it,
    /// before handing it back to the caller.
    fn processed(&self, error: HtError) -> HtError {
        if self.config.process_error {
            self.console.diagnostic(&error.to_string());
        }
        error
    }

    /// Compile and load a source string.
    pub fn eval(
        &mut self,
        source: &str,
        filename: Option<&str>,
        module_id: Option<&str>,
        invoke: Option<&str>,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
    ) -> Result<Value, HtError> {
        let filename = filename.unwrap_or("script").to_string();
        let module_id = module_id.map(str::to_string).unwrap_or_else(|| filename.clone());
        let bytes = self.compile(source, &filename, SourceType::Script)?;
        let value = self
            .load_bytecode(bytes, &module_id, false, invoke, positional, named)
            .map_err(|e| self.processed(e))?;
        self.drive()?;
        Ok(value)
    }

    /// Compile and load a source resolved through the resource context.
    pub fn eval_file(
        &mut self,
        key: &str,
        invoke: Option<&str>,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
    ) -> Result<Value, HtError> {
        let file = self.resources.resolve(key)?;
        let bytes = self.compile(&file.content, key, file.kind)?;
        let value = self
            .load_bytecode(bytes, key, false, invoke, positional, named)
            .map_err(|e| self.processed(e))?;
        self.drive()?;
        Ok(value)
    }

    /// Compile a source through the installed compiler.
    pub fn compile(
        &mut self,
        source: &str,
        key: &str,
        source_type: SourceType,
    ) -> Result<Vec<u8>, HtError> {
        match &mut self.compiler {
            Some(compiler) => compiler.compile(source, key, source_type),
            None => Err(HtError::extern_error(
                "No source compiler is installed on this interpreter",
            )),
        }
    }

    /// Dynamically load a module and return its top-level namespace.
    pub fn require(&mut self, path: &str) -> Result<Value, HtError> {
        if let Some(entry) = self.modules.get(path).and_then(ByteModule::entry_namespace) {
            return Ok(Value::Namespace(entry));
        }
        let file = self.resources.resolve(path)?;
        let bytes = self.compile(&file.content, path, file.kind)?;
        self.load_bytecode(bytes, path, false, None, Vec::new(), Vec::new())?;
        let entry = self
            .modules
            .get(path)
            .and_then(ByteModule::entry_namespace)
            .ok_or_else(|| HtError::resource_not_found(path))?;
        Ok(Value::Namespace(entry))
    }

    // -- symbols ------------------------------------------------------------

    /// Define a symbol in the global namespace.
    pub fn define(
        &mut self,
        id: &str,
        value: Value,
        is_mutable: bool,
        allow_override: bool,
    ) -> Result<(), HtError> {
        self.heap.ns_define(
            self.global,
            Declaration::variable(id, value, is_mutable),
            allow_override,
        )
    }

    /// Read a symbol from the entry module's namespace, falling back to the
    /// global namespace.
    pub fn fetch(&mut self, id: &str) -> Result<Value, HtError> {
        let ns = self.entry_namespace();
        self.lookup_value(ns, id, None, true)?
            .ok_or_else(|| HtError::undefined(id))
    }

    /// Assign a symbol in the entry module's namespace chain.
    pub fn assign(&mut self, id: &str, value: Value) -> Result<(), HtError> {
        let ns = self.entry_namespace();
        let assigned = self.heap.ns_assign(ns, id, value, None, true, false)?;
        if assigned {
            Ok(())
        } else {
            Err(HtError::undefined(id))
        }
    }

    /// Call a named function of the entry module with host arguments.
    pub fn invoke(
        &mut self,
        name: &str,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
    ) -> Result<Value, HtError> {
        let ns = self.entry_namespace();
        let callable = self
            .lookup_value(ns, name, None, true)?
            .ok_or_else(|| HtError::undefined(name))?;
        let value = self
            .call_callable(&callable, positional, named, CallSite::host())
            .map_err(|e| self.processed(e))?;
        self.drive()?;
        Ok(value)
    }

    fn entry_namespace(&self) -> NamespaceId {
        self.entry_module
            .as_ref()
            .and_then(|id| self.modules.get(id))
            .and_then(ByteModule::entry_namespace)
            .unwrap_or(self.global)
    }

    // -- external bindings ----------------------------------------------------

    /// Bind a top-level external function (`name`).
    pub fn bind_external_function(&mut self, id: &str, function: ExternalFunction) {
        self.bindings.bind_function(id, function);
    }

    /// Bind an external method (`Class::method` or `Class.static`).
    pub fn bind_external_method(&mut self, id: &str, function: ExternalFunction) {
        self.bindings.bind_function(id, function);
    }

    /// Bind an external class handle.
    pub fn bind_external_class(&mut self, class: Rc<dyn ExternalClass>) {
        self.bindings.bind_class(class);
    }

    /// Bind a function typedef wrapper.
    pub fn bind_external_function_type(&mut self, id: &str, wrapper: ExternalFunctionTypedef) {
        self.bindings.bind_function_typedef(id, wrapper);
    }

    /// Register an external type reflection hook.
    pub fn bind_external_reflection(&mut self, reflection: ExternalReflection) {
        self.bindings.bind_reflection(reflection);
    }

    /// The console the `console` preinclude writes through.
    pub fn console(&self) -> Rc<ConsoleObject> {
        self.console.clone()
    }

    // -- async pump -----------------------------------------------------------

    /// Resume every suspension whose awaited future settled and fire due
    /// future reactions, until no more progress can be made.
    ///
    /// Hosts call this after resolving futures they handed to script code.
    pub fn drive(&mut self) -> Result<(), HtError> {
        loop {
            let mut progressed = false;

            let entries = std::mem::take(&mut self.pending);
            for entry in entries {
                let status = with_future(&entry.suspension.awaited, |future| {
                    (future.state, future.result.clone(), future.error.clone())
                });
                match status {
                    Some((FutureState::Pending, _, _)) | None => self.pending.push(entry),
                    Some((FutureState::Resolved, result, _)) => {
                        progressed = true;
                        self.resume(entry, result.unwrap_or(Value::Null))?;
                    }
                    Some((FutureState::Rejected, _, error)) => {
                        progressed = true;
                        let context = &entry.suspension.context;
                        let error = error
                            .unwrap_or_else(|| HtError::extern_error("future rejected"));
                        let error = HtError::extern_error(error.message).with_position(
                            &context.filename,
                            context.line,
                            context.column,
                        );
                        entry.result.borrow_mut().reject(error);
                    }
                }
            }

            let tracked = std::mem::take(&mut self.tracked_futures);
            for cell in tracked {
                let due = with_future(&cell, |future| {
                    if future.is_settled() && !future.reactions.is_empty() {
                        let result = future.result.clone().unwrap_or(Value::Null);
                        Some((future.take_reactions(), result))
                    } else {
                        None
                    }
                })
                .flatten();
                if let Some((reactions, result)) = due {
                    for callback in reactions {
                        progressed = true;
                        self.call_callable(
                            &callback,
                            vec![result.clone()],
                            Vec::new(),
                            CallSite::host(),
                        )?;
                    }
                }
                self.tracked_futures.push(cell);
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    /// Re-enter the loop at a suspension with the awaited result preloaded.
    fn resume(&mut self, entry: PendingResume, value: Value) -> Result<(), HtError> {
        let PendingResume { suspension, result } = entry;
        let context = suspension.context;
        let reader = match self.modules.get(&context.module) {
            Some(module) => module.reader.clone(),
            None => {
                result
                    .borrow_mut()
                    .reject(HtError::resource_not_found(&context.module));
                return Ok(());
            }
        };
        self.frames.push(suspension.frame);
        self.set_local(value);
        let mut state = ExecState {
            module: context.module,
            reader,
            namespace: context.namespace,
            ns_stack: Vec::new(),
            class_stack: Vec::new(),
            filename: context.filename,
            line: context.line,
            column: context.column,
            function_name: context.function_name,
        };
        state.reader.set_ip(context.ip);
        match self.run(&mut state) {
            Ok(LoopExit::Func(value)) => {
                self.frames.pop();
                result.borrow_mut().resolve(value);
            }
            Ok(LoopExit::Suspended(suspension)) => {
                self.pending.push(PendingResume { suspension, result });
            }
            Ok(_) => {
                self.frames.pop();
                result
                    .borrow_mut()
                    .reject(HtError::bytecode("Unbalanced resumed body"));
            }
            Err(error) => {
                self.frames.pop();
                result.borrow_mut().reject(error);
            }
        }
        Ok(())
    }

    // -- imports ---------------------------------------------------------------

    fn resolve_module_imports(&mut self, module_id: &str) -> Result<(), HtError> {
        let order = match self.modules.get(module_id) {
            Some(module) => module.namespace_order.clone(),
            None => return Ok(()),
        };
        let mut visited = HashSet::new();
        for key in order {
            let ns = match self.modules.get(module_id).and_then(|m| m.namespaces.get(&key)) {
                Some(ns) => *ns,
                None => continue,
            };
            self.resolve_ns_imports(module_id, ns, &mut visited)?;
        }
        Ok(())
    }

    fn resolve_ns_imports(
        &mut self,
        module_id: &str,
        ns: NamespaceId,
        visited: &mut HashSet<NamespaceId>,
    ) -> Result<(), HtError> {
        if !visited.insert(ns) {
            return Ok(());
        }
        let imports = std::mem::take(&mut self.heap.namespace_mut(ns).imports);
        for import in imports {
            self.resolve_one_import(module_id, ns, import, visited)?;
        }
        Ok(())
    }

    /// Resolve a single recorded import into its namespace.
    ///
    /// Script-mode modules call this immediately at the import declaration;
    /// module-mode sources call it for every record at end of module.
    pub(crate) fn resolve_one_import(
        &mut self,
        module_id: &str,
        ns: NamespaceId,
        import: UnresolvedImport,
        visited: &mut HashSet<NamespaceId>,
    ) -> Result<(), HtError> {
        let path = match &import.from_path {
            Some(path) => path.clone(),
            None => return Ok(()),
        };
        if import.is_preloaded || path.starts_with(lexicon::MODULE_PREFIX) {
            let target = path
                .strip_prefix(lexicon::MODULE_PREFIX)
                .unwrap_or(&path)
                .to_string();
            let entry = self
                .modules
                .get(&target)
                .and_then(ByteModule::entry_namespace)
                .ok_or_else(|| HtError::resource_not_found(&target))?;
            self.bind_import(ns, entry, &import)
        } else if lexicon::is_script_path(&path) {
            // A file of the current module, or a separately cached module
            let source = self
                .modules
                .get(module_id)
                .and_then(|m| m.namespaces.get(&path).copied())
                .or_else(|| {
                    self.modules
                        .get(&path)
                        .and_then(ByteModule::entry_namespace)
                })
                .ok_or_else(|| HtError::resource_not_found(&path))?;
            // The source file's own imports resolve first, depth-first
            self.resolve_ns_imports(module_id, source, visited)?;
            self.bind_import(ns, source, &import)
        } else {
            let value = self.json_resource(module_id, &path)?;
            let alias = import
                .alias
                .clone()
                .unwrap_or_else(|| Self::path_stem(&path));
            self.heap
                .ns_define(ns, Declaration::variable(&alias, value, false), true)
        }
    }

    /// Whether a module's imports resolve immediately at declaration.
    pub(crate) fn resolves_imports_immediately(&self, module_id: &str) -> bool {
        self.modules
            .get(module_id)
            .map(|module| module.source_type != SourceType::Module)
            .unwrap_or(true)
    }

    /// Check every external reference a module declared against the binding
    /// registries.
    ///
    /// Runs at the end of `load_bytecode` when
    /// `resolve_external_functions_dynamically` is off; unbound ids fail the
    /// load with *undefinedExternal* instead of surfacing at call time.
    fn validate_external_bindings(&self, module_id: &str) -> Result<(), HtError> {
        let module = match self.modules.get(module_id) {
            Some(module) => module,
            None => return Ok(()),
        };
        let namespaces: Vec<NamespaceId> = module
            .namespace_order
            .iter()
            .filter_map(|key| module.namespaces.get(key).copied())
            .collect();
        let mut visited = HashSet::new();
        for ns in namespaces {
            self.validate_ns_externals(ns, &mut visited)?;
        }
        Ok(())
    }

    fn validate_ns_externals(
        &self,
        ns: NamespaceId,
        visited: &mut HashSet<NamespaceId>,
    ) -> Result<(), HtError> {
        if !visited.insert(ns) {
            return Ok(());
        }
        for decl in self.heap.namespace(ns).symbols.values() {
            match &decl.value {
                Value::Function(fid) => {
                    let function = self.heap.function(*fid);
                    if function.is_external {
                        let full_id = self.external_binding_id(function);
                        if !self.bindings.has_function(&full_id) {
                            return Err(HtError::undefined_external(&full_id));
                        }
                    }
                }
                Value::ExternFunction(id) => {
                    if !self.bindings.has_function(id) {
                        return Err(HtError::undefined_external(id));
                    }
                }
                Value::Class(class_id) => {
                    let class = self.heap.class(*class_id);
                    if class.is_external && !self.bindings.has_class(&class.id) {
                        return Err(HtError::undefined_external(&class.id));
                    }
                    // External methods of the class live in its namespace
                    self.validate_ns_externals(class.namespace, visited)?;
                }
                Value::Namespace(inner) if decl.kind == DeclKind::Namespace => {
                    self.validate_ns_externals(*inner, visited)?;
                }
                Value::ExternObject(cell) => {
                    if decl.is_external {
                        if let Some(class_ref) = cell.borrow().downcast_ref::<ExternalClassRef>()
                        {
                            if !self.bindings.has_class(&class_ref.id) {
                                return Err(HtError::undefined_external(&class_ref.id));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn bind_import(
        &mut self,
        dst: NamespaceId,
        src: NamespaceId,
        import: &UnresolvedImport,
    ) -> Result<(), HtError> {
        match &import.alias {
            Some(alias) if import.show_list.is_empty() => {
                self.heap.ns_define(
                    dst,
                    Declaration::immutable(alias, DeclKind::Import, Value::Namespace(src)),
                    true,
                )?;
                Ok(())
            }
            Some(alias) => {
                let wrapper = self.heap.alloc_namespace(alias, Some(dst), None);
                self.heap
                    .ns_import(wrapper, src, &import.show_list, false)?;
                self.heap.ns_define(
                    dst,
                    Declaration::immutable(alias, DeclKind::Import, Value::Namespace(wrapper)),
                    true,
                )?;
                Ok(())
            }
            None => self
                .heap
                .ns_import(dst, src, &import.show_list, import.is_exported),
        }
    }

    fn json_resource(&mut self, module_id: &str, path: &str) -> Result<Value, HtError> {
        if let Some(value) = self
            .modules
            .get(module_id)
            .and_then(|m| m.json_sources.get(path))
        {
            return Ok(value.clone());
        }
        let file = self.resources.resolve(path)?;
        let json: serde_json::Value = serde_json::from_str(&file.content)
            .map_err(|e| HtError::extern_error(format!("Bad JSON resource [{}]: {}", path, e)))?;
        let value = self.json_to_value(&json);
        if let Some(module) = self.modules.get_mut(module_id) {
            module
                .json_sources
                .insert(path.to_string(), value.clone());
        }
        Ok(value)
    }

    fn path_stem(path: &str) -> String {
        let name = path.rsplit('/').next().unwrap_or(path);
        match name.split_once('.') {
            Some((stem, _)) => stem.to_string(),
            None => name.to_string(),
        }
    }

    /// Decode a JSON document into runtime values: objects become structs,
    /// arrays become lists.
    pub fn json_to_value(&mut self, json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                let items = items.iter().map(|item| self.json_to_value(item)).collect();
                Value::list(items)
            }
            serde_json::Value::Object(fields) => {
                let sid = self.heap.alloc_struct(None, None, self.global);
                for (key, field) in fields {
                    let value = self.json_to_value(field);
                    self.heap.struct_set_field(sid, key, value);
                }
                Value::Struct(sid)
            }
        }
    }

    /// Encode a runtime value as a JSON document.
    pub fn value_to_json(&self, value: &Value) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(n) => serde_json::Value::from(*n),
            Value::Float(n) => serde_json::Value::from(*n),
            Value::BigInt(n) => serde_json::Value::String(n.to_string()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items.borrow().iter().map(|v| self.value_to_json(v)).collect(),
            ),
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.to_string(), self.value_to_json(v)))
                    .collect(),
            ),
            Value::Struct(sid) => {
                let mut object = serde_json::Map::new();
                for key in self.heap.struct_keys(*sid) {
                    let field = self.heap.hstruct(*sid).fields[&key].clone();
                    object.insert(key, self.value_to_json(&field));
                }
                serde_json::Value::Object(object)
            }
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(InterpreterConfig::default())
    }
}
