//! The call opcode and the function binding protocol.

use async_runtime::{share, to_value, HtFuture};
use bytecode_system::FunctionCategory;
use core_types::{ClassId, FunctionId, HtError, HtType, StructId, Value};

use crate::context::Suspension;
use crate::declaration::{DeclKind, Declaration};
use crate::dispatch::{ExecState, LoopExit};
use crate::frame::StackFrame;
use crate::function::{HtFunction, RedirectingConstructor};
use crate::hstruct::StructProbe;
use crate::interop::{BoundExternalMethod, ExternalArguments, ExternalClassRef};
use crate::lexicon;
use crate::vm::{PendingResume, Vm};

/// Source position of a call site, carried into stack traces.
#[derive(Debug, Clone)]
pub(crate) struct CallSite {
    pub filename: String,
    pub line: u32,
    pub column: u32,
}

impl CallSite {
    pub(crate) fn of(state: &ExecState) -> Self {
        Self {
            filename: state.filename.clone(),
            line: state.line,
            column: state.column,
        }
    }

    pub(crate) fn host() -> Self {
        Self {
            filename: "<host>".to_string(),
            line: 0,
            column: 0,
        }
    }
}

/// How a function body finished.
pub(crate) enum BodyOutcome {
    Value(Value),
    Suspended(Suspension),
}

impl Vm {
    /// The `call` opcode: flags, callee, argument regions, dispatch.
    pub(crate) fn handle_call(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let callee = self.local();
        let has_new = state.reader.read_bool()?;
        let is_nullable = state.reader.read_bool()?;
        let _callee_id = if state.reader.read_bool()? {
            Some(state.reader.read_const_string()?)
        } else {
            None
        };
        let positional_count = state.reader.read_u8()? as usize;
        let mut positional = Vec::with_capacity(positional_count);
        for _ in 0..positional_count {
            let is_spread = state.reader.read_bool()?;
            let value = self.run_prefixed_expr(state)?;
            if is_spread {
                match value {
                    Value::List(items) => positional.extend(items.borrow().iter().cloned()),
                    other => return Err(HtError::not_spreadable(other.type_name())),
                }
            } else {
                positional.push(value);
            }
        }
        let named_count = state.reader.read_u8()? as usize;
        let mut named = Vec::with_capacity(named_count);
        for _ in 0..named_count {
            let name = state.reader.read_const_string()?;
            let value = self.run_prefixed_expr(state)?;
            named.push((name, value));
        }

        if callee.is_null() {
            if is_nullable {
                self.set_local(Value::Null);
                return Ok(());
            }
            return Err(HtError::call_null_object());
        }
        if has_new {
            let newable = matches!(
                callee,
                Value::Class(_) | Value::Type(_) | Value::Struct(_)
            ) || matches!(&callee, Value::ExternObject(cell) if cell.borrow().is::<ExternalClassRef>());
            if !newable {
                return Err(HtError::not_newable(&self.heap.type_display(&callee)));
            }
        }
        let site = CallSite::of(state);
        let value = self.call_callable(&callee, positional, named, site)?;
        self.set_local(value);
        Ok(())
    }

    /// Invoke any callable value.
    pub(crate) fn call_callable(
        &mut self,
        callee: &Value,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
        site: CallSite,
    ) -> Result<Value, HtError> {
        match callee {
            Value::Function(fid) => self.call_function(*fid, positional, named, site),
            Value::ExternFunction(id) => {
                let callable = self.bindings.function(id)?;
                callable(
                    self,
                    ExternalArguments {
                        receiver: None,
                        positional,
                        named,
                    },
                )
            }
            Value::Class(class_id) => self.construct(*class_id, None, positional, named, site),
            Value::Type(declared) => match declared.as_ref() {
                HtType::Nominal(nominal) => match nominal.resolved {
                    Some(class_id) => self.construct(class_id, None, positional, named, site),
                    None => Err(HtError::not_callable(&nominal.id)),
                },
                other => Err(HtError::not_callable(&other.to_string())),
            },
            Value::Struct(sid) => self.construct_struct(*sid, positional, named, site),
            Value::ExternObject(cell) => {
                let bound = cell.borrow().downcast_ref::<BoundExternalMethod>().cloned();
                if let Some(bound) = bound {
                    let callable = self.bindings.function(&bound.id)?;
                    return callable(
                        self,
                        ExternalArguments {
                            receiver: Some(bound.receiver),
                            positional,
                            named,
                        },
                    );
                }
                let class_ref = cell.borrow().downcast_ref::<ExternalClassRef>().cloned();
                if let Some(class_ref) = class_ref {
                    let handle = self.bindings.class(&class_ref.id)?;
                    let ctor = handle.member_get(lexicon::CONSTRUCTOR)?;
                    return self.call_callable(&ctor, positional, named, site);
                }
                Err(HtError::not_callable(&callee.to_string()))
            }
            Value::Null => Err(HtError::call_null_object()),
            other => Err(HtError::not_callable(&self.heap.type_display(other))),
        }
    }

    /// The binding protocol for declared functions.
    pub(crate) fn call_function(
        &mut self,
        fid: FunctionId,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
        site: CallSite,
    ) -> Result<Value, HtError> {
        let function = self.heap.function(fid).clone();

        if function.is_external {
            let full_id = self.external_binding_id(&function);
            let callable = self.bindings.function(&full_id)?;
            return callable(
                self,
                ExternalArguments {
                    receiver: function.bound_receiver.clone(),
                    positional,
                    named,
                },
            );
        }
        if function.is_abstract {
            return Err(HtError::abstracted(function.display_name()));
        }

        let closure = function.closure.unwrap_or(self.global);
        let call_ns =
            self.heap
                .alloc_namespace(function.display_name(), Some(closure), function.class_id);
        if let Some(receiver) = &function.bound_receiver {
            self.heap.ns_define(
                call_ns,
                Declaration::immutable(lexicon::THIS, DeclKind::Parameter, receiver.clone()),
                true,
            )?;
        }
        self.bind_parameters(&function, call_ns, positional, named)?;

        if function.is_async {
            let result = share(HtFuture::new());
            match self.run_body(&function, call_ns, &site) {
                Ok(BodyOutcome::Value(value)) => result.borrow_mut().resolve(value),
                Ok(BodyOutcome::Suspended(suspension)) => self.pending.push(PendingResume {
                    suspension,
                    result: result.clone(),
                }),
                Err(error) => result.borrow_mut().reject(error),
            }
            self.track_future(&result);
            return Ok(to_value(&result));
        }

        match self.run_body(&function, call_ns, &site)? {
            BodyOutcome::Value(value) => {
                if function.category == FunctionCategory::Constructor {
                    Ok(function.bound_receiver.clone().unwrap_or(Value::Null))
                } else {
                    Ok(value)
                }
            }
            BodyOutcome::Suspended(_) => Err(HtError::extern_error(
                "await outside an async function body",
            )),
        }
    }

    /// Bind arguments to parameters in the call namespace.
    fn bind_parameters(
        &mut self,
        function: &HtFunction,
        call_ns: core_types::NamespaceId,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
    ) -> Result<(), HtError> {
        let positional_capacity = function
            .params
            .iter()
            .filter(|p| !p.is_named && !p.is_variadic)
            .count();
        let has_variadic = function.params.iter().any(|p| p.is_variadic);
        if positional.len() > positional_capacity && !has_variadic {
            return Err(HtError::extra_positional_arg(function.display_name()));
        }
        for (name, _) in &named {
            let declared = function
                .params
                .iter()
                .any(|p| p.is_named && &p.id == name);
            if !declared {
                return Err(HtError::extra_named_arg(name, function.display_name()));
            }
        }

        let mut positional_iter = positional.into_iter();
        for param in &function.params {
            let value = if param.is_variadic {
                Value::list(positional_iter.by_ref().collect())
            } else if param.is_named {
                match named.iter().find(|(name, _)| name == &param.id) {
                    Some((_, value)) => value.clone(),
                    None => self.parameter_default(function, param, call_ns)?,
                }
            } else {
                match positional_iter.next() {
                    Some(value) => value,
                    None => {
                        if param.is_optional {
                            self.parameter_default(function, param, call_ns)?
                        } else {
                            return Err(HtError::missing_positional_arg(
                                &param.id,
                                function.display_name(),
                            ));
                        }
                    }
                }
            };
            let mut decl = Declaration::variable(&param.id, value, true);
            decl.kind = DeclKind::Parameter;
            decl.declared_type = param.declared_type.clone();
            self.heap.ns_define(call_ns, decl, true)?;
        }
        Ok(())
    }

    fn parameter_default(
        &mut self,
        function: &HtFunction,
        param: &crate::function::HtParameter,
        call_ns: core_types::NamespaceId,
    ) -> Result<Value, HtError> {
        match (param.default_ip, &function.module) {
            (Some(ip), Some(module)) => {
                let module = module.clone();
                self.run_region(&module, ip, call_ns, &param.id)
            }
            _ => Ok(Value::Null),
        }
    }

    /// Run a constructor redirect and the body, inside a fresh frame.
    fn run_body(
        &mut self,
        function: &HtFunction,
        call_ns: core_types::NamespaceId,
        site: &CallSite,
    ) -> Result<BodyOutcome, HtError> {
        self.frames.push(StackFrame::new());
        self.stack_trace.push(core_types::StackTraceFrame::new(
            function.display_name(),
            &site.filename,
            site.line,
            site.column,
        ));
        let outcome = self.run_body_inner(function, call_ns, site);
        match outcome {
            Ok(BodyOutcome::Suspended(suspension)) => {
                // The await site already moved the frame into the suspension
                self.stack_trace.pop();
                Ok(BodyOutcome::Suspended(suspension))
            }
            Ok(BodyOutcome::Value(value)) => {
                self.frames.pop();
                self.stack_trace.pop();
                Ok(BodyOutcome::Value(value))
            }
            Err(error) => {
                self.frames.pop();
                self.stack_trace.pop();
                Err(error)
            }
        }
    }

    fn run_body_inner(
        &mut self,
        function: &HtFunction,
        call_ns: core_types::NamespaceId,
        site: &CallSite,
    ) -> Result<BodyOutcome, HtError> {
        if function.category == FunctionCategory::Constructor {
            if let Some(redirect) = &function.redirecting {
                self.run_redirect(function, redirect, call_ns, site)?;
            }
        }
        let ip = match function.definition_ip {
            Some(ip) => ip,
            None => return Ok(BodyOutcome::Value(Value::Null)),
        };
        let module = function
            .module
            .clone()
            .ok_or_else(|| HtError::bytecode("Function body without a module"))?;
        let reader = self
            .modules
            .get(&module)
            .ok_or_else(|| HtError::resource_not_found(&module))?
            .reader
            .clone();
        let mut state = ExecState {
            module,
            reader,
            namespace: call_ns,
            ns_stack: Vec::new(),
            class_stack: Vec::new(),
            filename: site.filename.clone(),
            line: function.definition_line,
            column: function.definition_column,
            function_name: function.display_name().to_string(),
        };
        state.reader.set_ip(ip);
        match self.run(&mut state)? {
            LoopExit::Func(value) => Ok(BodyOutcome::Value(value)),
            LoopExit::Suspended(suspension) => Ok(BodyOutcome::Suspended(suspension)),
            _ => Err(HtError::bytecode("Unbalanced function body")),
        }
    }

    fn run_redirect(
        &mut self,
        function: &HtFunction,
        redirect: &RedirectingConstructor,
        call_ns: core_types::NamespaceId,
        site: &CallSite,
    ) -> Result<(), HtError> {
        let module = function
            .module
            .clone()
            .ok_or_else(|| HtError::bytecode("Redirect without a module"))?;
        let mut positional = Vec::with_capacity(redirect.positional_ips.len());
        for ip in &redirect.positional_ips {
            positional.push(self.run_region(&module, *ip, call_ns, function.display_name())?);
        }
        let mut named = Vec::with_capacity(redirect.named_ips.len());
        for (name, ip) in &redirect.named_ips {
            let value = self.run_region(&module, *ip, call_ns, function.display_name())?;
            named.push((name.clone(), value));
        }
        let class_id = function
            .class_id
            .ok_or_else(|| HtError::bytecode("Redirect outside a class"))?;
        let (target_class, ctor_name) = if redirect.callee == lexicon::SUPER {
            let super_class = self
                .heap
                .class(class_id)
                .super_class
                .ok_or_else(|| HtError::undefined(lexicon::SUPER))?;
            (super_class, Self::constructor_name(redirect.key.as_deref()))
        } else {
            (class_id, Self::constructor_name(Some(&redirect.callee)))
        };
        let target = self
            .find_constructor(target_class, &ctor_name)
            .ok_or_else(|| HtError::undefined(&ctor_name))?;
        let receiver = function
            .bound_receiver
            .clone()
            .ok_or_else(|| HtError::bytecode("Redirect without a receiver"))?;
        let bound = self.heap.bind_function(target, receiver);
        self.call_function(bound, positional, named, site.clone())?;
        Ok(())
    }

    fn constructor_name(key: Option<&str>) -> String {
        match key {
            Some(key) => format!("{}${}", lexicon::CONSTRUCTOR, key),
            None => lexicon::CONSTRUCTOR.to_string(),
        }
    }

    fn find_constructor(&self, class_id: ClassId, name: &str) -> Option<FunctionId> {
        for level in self.heap.class_chain(class_id) {
            let class_ns = self.heap.class(level).namespace;
            if let Ok(Some(decl)) = self.heap.ns_lookup(class_ns, name, None, false) {
                if let Value::Function(fid) = decl.value {
                    return Some(fid);
                }
            }
        }
        None
    }

    /// Instantiate a class: reject abstract, initialize the field frames
    /// base-first, then invoke the requested constructor.
    pub(crate) fn construct(
        &mut self,
        class_id: ClassId,
        key: Option<&str>,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
        site: CallSite,
    ) -> Result<Value, HtError> {
        let class = self.heap.class(class_id).clone();
        if class.is_abstract {
            return Err(HtError::abstracted(&class.id));
        }
        if class.is_external {
            let handle = self.bindings.class(&class.id)?;
            let ctor = handle.member_get(lexicon::CONSTRUCTOR)?;
            return self.call_callable(&ctor, positional, named, site);
        }
        let instance = self.heap.alloc_instance(class_id);
        self.init_instance_fields(instance, class_id)?;
        let ctor_name = Self::constructor_name(key);
        match self.find_constructor(class_id, &ctor_name) {
            Some(ctor) => {
                let bound = self.heap.bind_function(ctor, Value::Instance(instance));
                self.call_function(bound, positional, named, site)?;
            }
            None => {
                if key.is_some() {
                    return Err(HtError::undefined(&ctor_name));
                }
            }
        }
        Ok(Value::Instance(instance))
    }

    fn init_instance_fields(
        &mut self,
        instance: core_types::InstanceId,
        class_id: ClassId,
    ) -> Result<(), HtError> {
        let chain = self.heap.class_chain(class_id);
        for level in chain.into_iter().rev() {
            let class_ns = self.heap.class(level).namespace;
            let mut fields: Vec<Declaration> = self
                .heap
                .namespace(class_ns)
                .symbols
                .values()
                .filter(|decl| decl.is_field && !decl.is_static)
                .cloned()
                .collect();
            if fields.is_empty() {
                continue;
            }
            fields.sort_by(|a, b| a.id.cmp(&b.id));
            let init_ns =
                self.heap
                    .alloc_namespace(lexicon::CONSTRUCTOR, Some(class_ns), Some(level));
            self.heap.ns_define(
                init_ns,
                Declaration::immutable(
                    lexicon::THIS,
                    DeclKind::Parameter,
                    Value::Instance(instance),
                ),
                true,
            )?;
            for decl in fields {
                let value = match (&decl.kind, &decl.late_init, &decl.value) {
                    (DeclKind::Function, _, Value::Function(fid)) => {
                        Value::Function(self.heap.bind_function(*fid, Value::Instance(instance)))
                    }
                    (_, Some(late), _) => {
                        self.run_region(&late.module, late.ip, init_ns, &decl.id)?
                    }
                    _ => decl.value.clone(),
                };
                self.heap
                    .instance_set_field(instance, &decl.id, value, Some(level));
            }
        }
        Ok(())
    }

    /// Instantiate a struct template: the new struct delegates to the
    /// template and runs its constructor entry when one exists.
    pub(crate) fn construct_struct(
        &mut self,
        template: StructId,
        positional: Vec<Value>,
        named: Vec<(String, Value)>,
        site: CallSite,
    ) -> Result<Value, HtError> {
        let namespace = self.hstruct_namespace(template);
        let created = self.heap.alloc_struct(None, Some(template), namespace);
        if let StructProbe::Field(Value::Function(ctor)) =
            self.heap.struct_probe(template, lexicon::CONSTRUCTOR)
        {
            let bound = self.heap.bind_function(ctor, Value::Struct(created));
            self.call_function(bound, positional, named, site)?;
        }
        Ok(Value::Struct(created))
    }

    fn hstruct_namespace(&self, sid: StructId) -> core_types::NamespaceId {
        self.heap.hstruct(sid).namespace
    }

    pub(crate) fn external_binding_id(&self, function: &HtFunction) -> String {
        match function.class_id {
            Some(class_id) => {
                let class_name = self.heap.class(class_id).id.clone();
                if function.category == FunctionCategory::Constructor {
                    match &function.id {
                        Some(id) => format!("{}.{}", class_name, id),
                        None => class_name,
                    }
                } else if function.is_static {
                    format!("{}.{}", class_name, function.display_name())
                } else {
                    format!("{}::{}", class_name, function.display_name())
                }
            }
            None => function.display_name().to_string(),
        }
    }

    /// Track a future cell so the pump fires its settled reactions.
    pub(crate) fn track_future(&mut self, future: &async_runtime::SharedFuture) {
        self.tracked_futures
            .push(future.clone() as std::rc::Rc<std::cell::RefCell<dyn std::any::Any>>);
    }

    /// Track an untyped future cell (e.g. one handed in by the host).
    pub(crate) fn track_future_cell(
        &mut self,
        cell: std::rc::Rc<std::cell::RefCell<dyn std::any::Any>>,
    ) {
        self.tracked_futures.push(cell);
    }

    /// Clear the transient register state after a top-level run, keeping the
    /// base frame itself alive.
    pub(crate) fn reset_base_frame(&mut self) {
        if let Some(frame) = self.frames.first_mut() {
            frame.clear();
        }
    }
}
