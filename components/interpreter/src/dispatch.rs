//! The opcode dispatch loop.
//!
//! One decoder keyed on the next instruction byte. Sub-expressions (call
//! arguments, branch regions, default values) run through the same loop
//! recursively and terminate on `EndOfExec`; function bodies terminate on
//! `EndOfFunc`; modules on `EndOfModule`. The only suspension point is the
//! await opcode, which snapshots the current context and unwinds the loop
//! with a [`Suspension`].

use async_runtime::{future_cell, with_future, FutureState, HtFuture};
use bytecode_system::{
    DeleteKind, FunctionCategory, IntrinsicCode, LiteralKind, Opcode, Register, TypeCode,
};
use core_types::{
    CastView, ClassId, ErrorKind, FunctionId, HtError, HtType, IntrinsicType, NamespaceId,
    NominalType, ParameterType, SourceType, StackTraceFrame, StructId, Value,
};
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::class::HtClass;
use crate::context::{HtContext, Suspension};
use crate::declaration::{DeclKind, Declaration, LateInit};
use crate::frame::{LoopRecord, StackFrame};
use crate::function::{HtFunction, HtParameter, RedirectingConstructor};
use crate::interop::ExternalClassRef;
use crate::lexicon;
use crate::vm::Vm;

/// Execution position of one loop entry.
#[derive(Debug, Clone)]
pub(crate) struct ExecState {
    /// Module the cursor reads from
    pub module: String,
    /// Private cursor over the module's bytes
    pub reader: bytecode_system::BytecodeReader,
    /// Current namespace
    pub namespace: NamespaceId,
    /// Namespaces shadowed by open class/namespace/block declarations
    pub ns_stack: Vec<NamespaceId>,
    /// Open class declarations, innermost last
    pub class_stack: Vec<ClassId>,
    /// Current source file
    pub filename: String,
    /// Current source line
    pub line: u32,
    /// Current source column
    pub column: u32,
    /// Executing function name, for stack traces
    pub function_name: String,
}

impl ExecState {
    /// Snapshot the state into a context record.
    pub fn context(&self) -> HtContext {
        HtContext {
            module: self.module.clone(),
            filename: self.filename.clone(),
            ip: self.reader.ip(),
            line: self.line,
            column: self.column,
            namespace: self.namespace,
            function_name: self.function_name.clone(),
        }
    }
}

/// How one loop entry ended.
#[derive(Debug)]
pub(crate) enum LoopExit {
    /// An expression region ended (`EndOfExec`)
    Expr(Value),
    /// A function body returned (`EndOfFunc`)
    Func(Value),
    /// A module finished (`EndOfModule`)
    Module(Value),
    /// The image ended (`EndOfCode` or end of buffer)
    Code(Value),
    /// An await observed a pending future
    Suspended(Suspension),
}

impl Vm {
    // -- register helpers ---------------------------------------------------

    pub(crate) fn frame(&self) -> &StackFrame {
        self.frames.last().expect("frame stack underflow")
    }

    pub(crate) fn frame_mut(&mut self) -> &mut StackFrame {
        self.frames.last_mut().expect("frame stack underflow")
    }

    pub(crate) fn local(&self) -> Value {
        self.frame().get(Register::LocalValue).clone()
    }

    pub(crate) fn set_local(&mut self, value: Value) {
        self.frame_mut().set(Register::LocalValue, value);
    }

    fn reg(&self, register: Register) -> Value {
        self.frame().get(register).clone()
    }

    /// Boolean coercion under the configured policy.
    pub(crate) fn truthy(&self, value: &Value) -> bool {
        if self.config.allow_implicit_empty_value_to_false_conversion {
            match value {
                Value::Struct(sid) => self.heap.struct_length(*sid) != 0,
                other => !other.is_empty_value(),
            }
        } else {
            value.is_truthy()
        }
    }

    /// Value type with reflection refinement for opaque host objects.
    pub(crate) fn value_type_of(&self, value: &Value) -> HtType {
        if let Value::ExternObject(cell) = value {
            if cell.borrow().is::<HtFuture>() {
                return HtType::nominal("Future");
            }
            if let Some(id) = self.bindings.reflect(value) {
                return HtType::nominal(&id);
            }
        }
        self.heap.type_of(value)
    }

    // -- the loop -----------------------------------------------------------

    /// Process instructions until a terminator or a suspension.
    pub(crate) fn run(&mut self, state: &mut ExecState) -> Result<LoopExit, HtError> {
        loop {
            if !state.reader.has_remaining() {
                return Ok(LoopExit::Code(self.local()));
            }
            match self.step(state) {
                Ok(None) => continue,
                Ok(Some(exit)) => return Ok(exit),
                Err(error) => {
                    return Err(error
                        .with_position(&state.filename, state.line, state.column)
                        .with_stack(self.capture_stack_trace()))
                }
            }
        }
    }

    /// Run an inline expression region ending with `EndOfExec`.
    pub(crate) fn run_expr(&mut self, state: &mut ExecState) -> Result<Value, HtError> {
        match self.run(state)? {
            LoopExit::Expr(value) => Ok(value),
            LoopExit::Suspended(_) => Err(HtError::extern_error(
                "await must be a top-level expression of an async function body",
            )),
            _ => Err(HtError::bytecode("Unbalanced expression region")),
        }
    }

    /// Read a u16 length prefix, then run the region as an expression.
    pub(crate) fn run_prefixed_expr(&mut self, state: &mut ExecState) -> Result<Value, HtError> {
        let _len = state.reader.read_u16()?;
        self.run_expr(state)
    }

    /// Read a u16 length prefix and skip the region.
    pub(crate) fn skip_prefixed(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let len = state.reader.read_u16()? as usize;
        state.reader.skip(len)
    }

    fn step(&mut self, state: &mut ExecState) -> Result<Option<LoopExit>, HtError> {
        let byte = state.reader.read_u8()?;
        let opcode = Opcode::from_byte(byte).ok_or_else(|| HtError::unknown_opcode(byte))?;
        match opcode {
            Opcode::EndOfCode => return Ok(Some(LoopExit::Code(self.local()))),
            Opcode::EndOfModule => return Ok(Some(LoopExit::Module(self.local()))),
            Opcode::EndOfExec => return Ok(Some(LoopExit::Expr(self.local()))),
            Opcode::EndOfFunc => return Ok(Some(LoopExit::Func(self.local()))),
            Opcode::EndOfFile | Opcode::EndOfStmt => {}
            Opcode::EndOfCodeBlock => {
                if let Some(outer) = state.ns_stack.pop() {
                    state.namespace = outer;
                }
            }
            Opcode::CodeBlock => {
                let id = state.reader.read_const_string()?;
                state.ns_stack.push(state.namespace);
                state.namespace = self
                    .heap
                    .alloc_namespace(&id, Some(state.namespace), None);
            }
            Opcode::File => {
                let kind_byte = state.reader.read_u8()?;
                let kind = SourceType::from_byte(kind_byte)
                    .ok_or_else(|| HtError::bytecode(format!("Unknown source kind [{}]", kind_byte)))?;
                let filename = state.reader.read_utf8()?;
                let namespace = if kind == SourceType::Literal {
                    self.global
                } else {
                    self.heap.alloc_namespace(&filename, Some(self.global), None)
                };
                if let Some(module) = self.modules.get_mut(&state.module) {
                    module.namespaces.insert(filename.clone(), namespace);
                    module.namespace_order.push(filename.clone());
                }
                self.heap.namespace_mut(namespace).will_export_all = true;
                state.filename = filename;
                state.namespace = namespace;
            }
            Opcode::LineInfo => {
                state.line = state.reader.read_u16()? as u32;
                state.column = state.reader.read_u16()? as u32;
            }
            Opcode::ConstIntTable => state.reader.read_const_int_table()?,
            Opcode::ConstFloatTable => state.reader.read_const_float_table()?,
            Opcode::ConstStringTable => state.reader.read_const_string_table()?,
            Opcode::CreateStackFrame => self.frames.push(StackFrame::new()),
            Opcode::RetractStackFrame => {
                let retired = self
                    .frames
                    .pop()
                    .ok_or_else(|| HtError::bytecode("Stack frame underflow"))?;
                let value = retired.get(Register::LocalValue).clone();
                self.set_local(value);
            }
            Opcode::Local => self.handle_literal(state)?,
            Opcode::Register => {
                let index = state.reader.read_u8()?;
                let register = Register::from_byte(index)
                    .ok_or_else(|| HtError::bytecode(format!("Bad register index [{}]", index)))?;
                let value = self.local();
                self.frame_mut().set(register, value);
            }

            Opcode::Skip => {
                let distance = state.reader.read_i16()? as i64;
                let target = state.reader.ip() as i64 + distance;
                state.reader.set_ip(target as usize);
            }
            Opcode::Goto => {
                let offset = state.reader.read_u16()? as usize;
                let anchor = *self
                    .frame()
                    .anchors
                    .last()
                    .ok_or_else(|| HtError::bytecode("Goto without an anchor"))?;
                state.reader.set_ip(anchor + offset);
            }
            Opcode::Anchor => {
                let ip = state.reader.ip();
                self.frame_mut().anchors.push(ip);
            }
            Opcode::ClearAnchor => {
                self.frame_mut()
                    .anchors
                    .pop()
                    .ok_or_else(|| HtError::bytecode("Anchor stack underflow"))?;
            }
            Opcode::LoopPoint => {
                let continue_offset = state.reader.read_u16()? as usize;
                let break_offset = state.reader.read_u16()? as usize;
                let start_ip = state.reader.ip();
                let record = LoopRecord {
                    start_ip,
                    continue_ip: start_ip + continue_offset,
                    break_ip: start_ip + break_offset,
                    namespace: state.namespace,
                };
                self.frame_mut().loops.push(record);
            }
            Opcode::BreakLoop => {
                let record = self
                    .frame_mut()
                    .loops
                    .pop()
                    .ok_or_else(|| HtError::bytecode("Break outside a loop"))?;
                state.reader.set_ip(record.break_ip);
                state.namespace = record.namespace;
            }
            Opcode::ContinueLoop => {
                let record = self
                    .frame()
                    .loops
                    .last()
                    .ok_or_else(|| HtError::bytecode("Continue outside a loop"))?
                    .clone();
                state.reader.set_ip(record.continue_ip);
                state.namespace = record.namespace;
            }
            Opcode::IfStmt => {
                let then_len = state.reader.read_u16()? as usize;
                let condition = self.local();
                if !self.truthy(&condition) {
                    state.reader.skip(then_len)?;
                }
            }
            Opcode::WhileStmt => {
                let condition = self.local();
                if !self.truthy(&condition) {
                    let record = self
                        .frame_mut()
                        .loops
                        .pop()
                        .ok_or_else(|| HtError::bytecode("While check outside a loop"))?;
                    state.reader.set_ip(record.break_ip);
                    state.namespace = record.namespace;
                }
            }
            Opcode::DoStmt => {
                let has_condition = state.reader.read_bool()?;
                let repeat = if has_condition {
                    let condition = self.local();
                    self.truthy(&condition)
                } else {
                    false
                };
                if repeat {
                    let start = self
                        .frame()
                        .loops
                        .last()
                        .ok_or_else(|| HtError::bytecode("Do check outside a loop"))?
                        .start_ip;
                    state.reader.set_ip(start);
                } else {
                    self.frame_mut().loops.pop();
                }
            }
            Opcode::SwitchStmt => self.handle_switch(state)?,

            Opcode::Assign => {
                let symbol = match self.reg(Register::LocalSymbol) {
                    Value::String(id) => id,
                    other => {
                        return Err(HtError::bytecode(format!(
                            "Assignment target is not a symbol: {}",
                            other
                        )))
                    }
                };
                let value = self.reg(Register::AssignRight);
                let from = self.heap.namespace(state.namespace).full_name.clone();
                let assigned = self.heap.ns_assign(
                    state.namespace,
                    &symbol,
                    value.clone(),
                    Some(&from),
                    true,
                    self.config.allow_implicit_variable_declaration,
                )?;
                if !assigned {
                    return Err(HtError::undefined(&symbol));
                }
                self.set_local(value);
            }
            Opcode::MemberGet => {
                let is_nullable = state.reader.read_bool()?;
                let object = self.reg(Register::PostfixObject);
                let key = match self.reg(Register::PostfixKey) {
                    Value::String(key) => key,
                    other => return Err(HtError::sub_get_key(&other.to_string())),
                };
                let from = self.heap.namespace(state.namespace).full_name.clone();
                let value = self.member_get_value(&object, &key, is_nullable, &from, state)?;
                self.set_local(value);
            }
            Opcode::MemberSet => {
                let is_nullable = state.reader.read_bool()?;
                let object = self.reg(Register::PostfixObject);
                let key = match self.reg(Register::PostfixKey) {
                    Value::String(key) => key,
                    other => return Err(HtError::sub_get_key(&other.to_string())),
                };
                let value = self.reg(Register::AssignRight);
                let from = self.heap.namespace(state.namespace).full_name.clone();
                self.member_set_value(&object, &key, value.clone(), is_nullable, &from, state)?;
                self.set_local(value);
            }
            Opcode::SubGet => {
                let is_nullable = state.reader.read_bool()?;
                let object = self.reg(Register::PostfixObject);
                let key = self.local();
                let from = self.heap.namespace(state.namespace).full_name.clone();
                let value = self.sub_get_value(&object, &key, is_nullable, &from, state)?;
                self.set_local(value);
            }
            Opcode::SubSet => {
                let is_nullable = state.reader.read_bool()?;
                let object = self.reg(Register::PostfixObject);
                let key = self.local();
                let value = self.reg(Register::AssignRight);
                let from = self.heap.namespace(state.namespace).full_name.clone();
                self.sub_set_value(&object, &key, value.clone(), is_nullable, &from, state)?;
                self.set_local(value);
            }
            Opcode::LogicalOr => {
                let len = state.reader.read_u16()? as usize;
                let left = self.reg(Register::OrLeft);
                if self.truthy(&left) {
                    state.reader.skip(len)?;
                    self.set_local(Value::Boolean(true));
                } else {
                    let right = self.run_expr(state)?;
                    let result = self.truthy(&right);
                    self.set_local(Value::Boolean(result));
                }
            }
            Opcode::LogicalAnd => {
                let len = state.reader.read_u16()? as usize;
                let left = self.reg(Register::AndLeft);
                if self.truthy(&left) {
                    let right = self.run_expr(state)?;
                    let result = self.truthy(&right);
                    self.set_local(Value::Boolean(result));
                } else {
                    state.reader.skip(len)?;
                    self.set_local(Value::Boolean(false));
                }
            }
            Opcode::IfNull => {
                let len = state.reader.read_u16()? as usize;
                let left = self.reg(Register::IfNullLeft);
                if left.is_null() {
                    let right = self.run_expr(state)?;
                    self.set_local(right);
                } else {
                    state.reader.skip(len)?;
                    self.set_local(left);
                }
            }
            Opcode::Equal => {
                let left = self.reg(Register::EqualLeft);
                let right = self.local();
                self.set_local(Value::Boolean(self.values_equal(&left, &right)));
            }
            Opcode::NotEqual => {
                let left = self.reg(Register::EqualLeft);
                let right = self.local();
                self.set_local(Value::Boolean(!self.values_equal(&left, &right)));
            }
            Opcode::Lesser => self.compare(|ord| ord == std::cmp::Ordering::Less)?,
            Opcode::Greater => self.compare(|ord| ord == std::cmp::Ordering::Greater)?,
            Opcode::LesserOrEqual => self.compare(|ord| ord != std::cmp::Ordering::Greater)?,
            Opcode::GreaterOrEqual => self.compare(|ord| ord != std::cmp::Ordering::Less)?,
            Opcode::TypeAs => {
                let target = self.read_type_expr(state)?;
                let target = self.heap.resolve_type(&target, state.namespace);
                let castee = self.reg(Register::RelationLeft);
                let value = self.cast_value(&castee, &target)?;
                self.set_local(value);
            }
            Opcode::TypeIs => {
                let target = self.read_type_expr(state)?;
                let target = self.heap.resolve_type(&target, state.namespace);
                let value = self.reg(Register::RelationLeft);
                let value_type = self.value_type_of(&value);
                self.set_local(Value::Boolean(self.heap.is_a(&value_type, &target)));
            }
            Opcode::TypeIsNot => {
                let target = self.read_type_expr(state)?;
                let target = self.heap.resolve_type(&target, state.namespace);
                let value = self.reg(Register::RelationLeft);
                let value_type = self.value_type_of(&value);
                self.set_local(Value::Boolean(!self.heap.is_a(&value_type, &target)));
            }
            Opcode::Add
            | Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Divide
            | Opcode::TruncatingDivide
            | Opcode::Modulo => {
                let left = self.reg(match opcode {
                    Opcode::Add | Opcode::Subtract => Register::AdditiveLeft,
                    _ => Register::MultiplicativeLeft,
                });
                let right = self.local();
                let value = self.arithmetic(opcode, &left, &right)?;
                self.set_local(value);
            }
            Opcode::Negative => {
                let value = match self.local() {
                    Value::Integer(n) => Value::Integer(-n),
                    Value::Float(n) => Value::Float(-n),
                    Value::BigInt(n) => Value::BigInt(-n),
                    Value::Null if self.config.allow_implicit_null_to_zero_conversion => {
                        Value::Integer(0)
                    }
                    other => {
                        return Err(HtError::extern_error(format!(
                            "Cannot negate a value of type [{}]",
                            other.type_name()
                        )))
                    }
                };
                self.set_local(value);
            }
            Opcode::LogicalNot => {
                let value = self.local();
                let result = !self.truthy(&value);
                self.set_local(Value::Boolean(result));
            }
            Opcode::BitwiseNot => {
                let value = match self.local() {
                    Value::Integer(n) => Value::Integer(!n),
                    Value::BigInt(n) => Value::BigInt(!n),
                    other => {
                        return Err(HtError::extern_error(format!(
                            "Bitwise not on a value of type [{}]",
                            other.type_name()
                        )))
                    }
                };
                self.set_local(value);
            }
            Opcode::BitwiseOr
            | Opcode::BitwiseXor
            | Opcode::BitwiseAnd
            | Opcode::LeftShift
            | Opcode::RightShift
            | Opcode::UnsignedRightShift => {
                let left = self.reg(match opcode {
                    Opcode::BitwiseOr => Register::BitwiseOrLeft,
                    Opcode::BitwiseXor => Register::BitwiseXorLeft,
                    Opcode::BitwiseAnd => Register::BitwiseAndLeft,
                    _ => Register::BitwiseShiftLeft,
                });
                let right = self.local();
                let value = self.bitwise(opcode, &left, &right)?;
                self.set_local(value);
            }
            Opcode::TypeValueOf => {
                let value = self.local();
                let value_type = self.value_type_of(&value);
                self.set_local(Value::Type(Box::new(value_type)));
            }
            Opcode::DecltypeOf => {
                let symbol = match self.reg(Register::LocalSymbol) {
                    Value::String(id) => id,
                    other => return Err(HtError::undefined(&other.to_string())),
                };
                let from = self.heap.namespace(state.namespace).full_name.clone();
                let decl = self
                    .heap
                    .ns_lookup(state.namespace, &symbol, Some(&from), true)?
                    .ok_or_else(|| HtError::undefined(&symbol))?;
                let declared = decl
                    .declared_type
                    .unwrap_or_else(|| self.value_type_of(&decl.value));
                self.set_local(Value::Type(Box::new(declared)));
            }
            Opcode::AwaitedValue => {
                let value = self.local();
                if let Some(cell) = future_cell(&value) {
                    let settled = with_future(&cell, |future| match future.state {
                        FutureState::Pending => None,
                        FutureState::Resolved => {
                            Some(Ok(future.result.clone().unwrap_or(Value::Null)))
                        }
                        FutureState::Rejected => Some(Err(future
                            .error
                            .clone()
                            .unwrap_or_else(|| HtError::extern_error("future rejected")))),
                    })
                    .flatten();
                    match settled {
                        Some(Ok(result)) => self.set_local(result),
                        Some(Err(mut error)) => {
                            if error.kind != ErrorKind::Extern {
                                error = HtError::extern_error(error.message.clone());
                            }
                            return Err(error);
                        }
                        None => {
                            let context = state.context();
                            let frame = self
                                .frames
                                .pop()
                                .ok_or_else(|| HtError::bytecode("Await without a frame"))?;
                            return Ok(Some(LoopExit::Suspended(Suspension {
                                awaited: cell,
                                context,
                                frame,
                            })));
                        }
                    }
                }
                // Awaiting a plain value yields the value itself
            }
            Opcode::Call => self.handle_call(state)?,
            Opcode::Assertion => {
                let description = state.reader.read_utf8()?;
                let value = self.local();
                if !self.truthy(&value) {
                    return Err(HtError::assertion_failed(&description));
                }
            }
            Opcode::Throws => {
                let value = self.local();
                return Err(HtError::script_throws(value.to_string()));
            }
            Opcode::Delete => self.handle_delete(state)?,

            Opcode::ImportExportDecl => self.handle_import_export_decl(state)?,
            Opcode::TypeAliasDecl => {
                let id = state.reader.read_const_string()?;
                let declared = self.read_type_expr(state)?;
                let declared = self.heap.resolve_type(&declared, state.namespace);
                self.heap.ns_define(
                    state.namespace,
                    Declaration::immutable(&id, DeclKind::TypeAlias, Value::Type(Box::new(declared))),
                    false,
                )?;
            }
            Opcode::FuncDecl => self.handle_func_decl(state)?,
            Opcode::ClassDecl => self.handle_class_decl(state)?,
            Opcode::ClassDeclEnd => self.handle_class_decl_end(state)?,
            Opcode::ExternalEnumDecl => {
                let id = state.reader.read_const_string()?;
                let handle = Value::ExternObject(std::rc::Rc::new(std::cell::RefCell::new(
                    ExternalClassRef { id: id.clone() },
                )));
                let mut decl = Declaration::immutable(&id, DeclKind::ExternalEnum, handle);
                decl.is_external = true;
                self.heap.ns_define(state.namespace, decl, false)?;
            }
            Opcode::StructDecl => self.handle_struct_decl(state)?,
            Opcode::VarDecl => self.handle_var_decl(state)?,
            Opcode::DestructuringDecl => self.handle_destructuring_decl(state)?,
            Opcode::ConstDecl => {
                let id = state.reader.read_const_string()?;
                let kind = state.reader.read_u8()?;
                let index = state.reader.read_u16()?;
                let value = match kind {
                    0 => Value::Integer(state.reader.const_int(index)?),
                    1 => Value::Float(state.reader.const_float(index)?),
                    2 => Value::String(state.reader.const_string(index)?.to_string()),
                    other => {
                        return Err(HtError::bytecode(format!(
                            "Unknown constant kind [{}]",
                            other
                        )))
                    }
                };
                self.heap.ns_define(
                    state.namespace,
                    Declaration::immutable(&id, DeclKind::Constant, value),
                    false,
                )?;
            }
            Opcode::NamespaceDecl => {
                let id = state.reader.read_const_string()?;
                let namespace = self
                    .heap
                    .alloc_namespace(&id, Some(state.namespace), None);
                self.heap.ns_define(
                    state.namespace,
                    Declaration::immutable(&id, DeclKind::Namespace, Value::Namespace(namespace)),
                    true,
                )?;
                state.ns_stack.push(state.namespace);
                state.namespace = namespace;
            }
            Opcode::NamespaceDeclEnd => {
                state.namespace = state
                    .ns_stack
                    .pop()
                    .ok_or_else(|| HtError::bytecode("Namespace end without a start"))?;
            }
        }
        Ok(None)
    }

    // -- comparisons and arithmetic -----------------------------------------

    fn values_equal(&self, left: &Value, right: &Value) -> bool {
        if self.config.allow_implicit_null_to_zero_conversion {
            match (left, right) {
                (Value::Null, Value::Integer(n)) | (Value::Integer(n), Value::Null) => {
                    return *n == 0
                }
                (Value::Null, Value::Float(n)) | (Value::Float(n), Value::Null) => {
                    return *n == 0.0
                }
                _ => {}
            }
        }
        left == right
    }

    fn compare(
        &mut self,
        accept: impl Fn(std::cmp::Ordering) -> bool,
    ) -> Result<(), HtError> {
        let left = self.reg(Register::RelationLeft);
        let right = self.local();
        let ordering = self.numeric_ordering(&left, &right)?;
        self.set_local(Value::Boolean(accept(ordering)));
        Ok(())
    }

    fn numeric_ordering(
        &self,
        left: &Value,
        right: &Value,
    ) -> Result<std::cmp::Ordering, HtError> {
        if let (Value::BigInt(a), Value::BigInt(b)) = (left, right) {
            return Ok(a.cmp(b));
        }
        let a = self.number_operand(left)?;
        let b = self.number_operand(right)?;
        a.partial_cmp(&b).ok_or_else(|| {
            HtError::extern_error("Comparison with NaN has no ordering")
        })
    }

    fn number_operand(&self, value: &Value) -> Result<f64, HtError> {
        match value {
            Value::Integer(n) => Ok(*n as f64),
            Value::Float(n) => Ok(*n),
            Value::BigInt(n) => Ok(n.to_f64().unwrap_or(f64::NAN)),
            Value::Null if self.config.allow_implicit_null_to_zero_conversion => Ok(0.0),
            other => Err(HtError::extern_error(format!(
                "Numeric operation on a value of type [{}]",
                other.type_name()
            ))),
        }
    }

    fn arithmetic(&self, opcode: Opcode, left: &Value, right: &Value) -> Result<Value, HtError> {
        // String concatenation rides on the add opcode
        if opcode == Opcode::Add {
            if let (Value::String(a), Value::String(b)) = (left, right) {
                return Ok(Value::String(format!("{}{}", a, b)));
            }
        }
        // Big integer arithmetic stays arbitrary-precision when both sides
        // are integral
        let as_bigint = |value: &Value| -> Option<BigInt> {
            match value {
                Value::BigInt(n) => Some(n.clone()),
                Value::Integer(n) => Some(BigInt::from(*n)),
                _ => None,
            }
        };
        if matches!(left, Value::BigInt(_)) || matches!(right, Value::BigInt(_)) {
            if let (Some(a), Some(b)) = (as_bigint(left), as_bigint(right)) {
                return match opcode {
                    Opcode::Add => Ok(Value::BigInt(a + b)),
                    Opcode::Subtract => Ok(Value::BigInt(a - b)),
                    Opcode::Multiply => Ok(Value::BigInt(a * b)),
                    Opcode::TruncatingDivide | Opcode::Modulo => {
                        if b == BigInt::from(0) {
                            return Err(HtError::extern_error("Integer division by zero"));
                        }
                        if opcode == Opcode::TruncatingDivide {
                            Ok(Value::BigInt(a / b))
                        } else {
                            Ok(Value::BigInt(a % b))
                        }
                    }
                    Opcode::Divide => {
                        let a = a.to_f64().unwrap_or(f64::NAN);
                        let b = b.to_f64().unwrap_or(f64::NAN);
                        Ok(Value::Float(a / b))
                    }
                    _ => unreachable!(),
                };
            }
        }
        let int_pair = |left: &Value, right: &Value| -> Option<(i64, i64)> {
            let coerce = |value: &Value| match value {
                Value::Integer(n) => Some(*n),
                Value::Null if self.config.allow_implicit_null_to_zero_conversion => Some(0),
                _ => None,
            };
            Some((coerce(left)?, coerce(right)?))
        };
        match opcode {
            Opcode::Add | Opcode::Subtract | Opcode::Multiply | Opcode::Modulo => {
                if let Some((a, b)) = int_pair(left, right) {
                    return match opcode {
                        Opcode::Add => Ok(Value::Integer(a.wrapping_add(b))),
                        Opcode::Subtract => Ok(Value::Integer(a.wrapping_sub(b))),
                        Opcode::Multiply => Ok(Value::Integer(a.wrapping_mul(b))),
                        Opcode::Modulo => {
                            if b == 0 {
                                Err(HtError::extern_error("Integer modulo by zero"))
                            } else {
                                Ok(Value::Integer(a % b))
                            }
                        }
                        _ => unreachable!(),
                    };
                }
                let a = self.number_operand(left)?;
                let b = self.number_operand(right)?;
                Ok(Value::Float(match opcode {
                    Opcode::Add => a + b,
                    Opcode::Subtract => a - b,
                    Opcode::Multiply => a * b,
                    Opcode::Modulo => a % b,
                    _ => unreachable!(),
                }))
            }
            Opcode::Divide => {
                let a = self.number_operand(left)?;
                let b = self.number_operand(right)?;
                Ok(Value::Float(a / b))
            }
            Opcode::TruncatingDivide => {
                if let Some((a, b)) = int_pair(left, right) {
                    if b == 0 {
                        return Err(HtError::extern_error("Integer division by zero"));
                    }
                    return Ok(Value::Integer(a / b));
                }
                let a = self.number_operand(left)?;
                let b = self.number_operand(right)?;
                Ok(Value::Integer((a / b).trunc() as i64))
            }
            _ => unreachable!(),
        }
    }

    fn bitwise(&self, opcode: Opcode, left: &Value, right: &Value) -> Result<Value, HtError> {
        let int_of = |value: &Value| -> Result<i64, HtError> {
            match value {
                Value::Integer(n) => Ok(*n),
                Value::Null if self.config.allow_implicit_null_to_zero_conversion => Ok(0),
                other => Err(HtError::extern_error(format!(
                    "Bitwise operation on a value of type [{}]",
                    other.type_name()
                ))),
            }
        };
        let a = int_of(left)?;
        let b = int_of(right)?;
        Ok(Value::Integer(match opcode {
            Opcode::BitwiseOr => a | b,
            Opcode::BitwiseXor => a ^ b,
            Opcode::BitwiseAnd => a & b,
            Opcode::LeftShift => a.wrapping_shl(b as u32),
            Opcode::RightShift => a.wrapping_shr(b as u32),
            Opcode::UnsignedRightShift => ((a as u64).wrapping_shr(b as u32)) as i64,
            _ => unreachable!(),
        }))
    }

    // -- casts ---------------------------------------------------------------

    fn cast_value(&self, castee: &Value, target: &HtType) -> Result<Value, HtError> {
        let instance = match castee {
            Value::Instance(iid) => *iid,
            Value::Cast(view) => view.instance,
            other => return Err(HtError::castee(&self.heap.type_display(other))),
        };
        let target_class = match target {
            HtType::Nominal(nominal) => nominal.resolved,
            _ => None,
        };
        let target_class = target_class
            .ok_or_else(|| HtError::type_cast(&self.heap.type_display(castee), &target.to_string()))?;
        let class_id = self.heap.instance(instance).class_id;
        if !self.heap.class_extends(class_id, target_class) {
            return Err(HtError::type_cast(
                &self.heap.class(class_id).id,
                &self.heap.class(target_class).id,
            ));
        }
        Ok(Value::Cast(CastView {
            instance,
            class_id: target_class,
        }))
    }

    // -- switch ---------------------------------------------------------------

    fn handle_switch(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let has_condition = state.reader.read_bool()?;
        let case_count = state.reader.read_u8()? as usize;
        let end_offset = state.reader.read_u16()? as usize;
        let base = state.reader.ip();
        let condition = has_condition.then(|| self.local());
        let mut matched = false;
        for _ in 0..case_count {
            let case_value = self.run_prefixed_expr(state)?;
            let hit = match &condition {
                Some(condition) => self.values_equal(&case_value, condition),
                None => self.truthy(&case_value),
            };
            if hit {
                let branch = self.run_prefixed_expr(state)?;
                self.set_local(branch);
                matched = true;
                break;
            }
            self.skip_prefixed(state)?;
        }
        if !matched {
            // The cursor sits right at the else flag after the last case
            let has_else = state.reader.read_bool()?;
            if has_else {
                let value = self.run_prefixed_expr(state)?;
                self.set_local(value);
            }
        }
        state.reader.set_ip(base + end_offset);
        Ok(())
    }

    // -- literals --------------------------------------------------------------

    fn handle_literal(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let byte = state.reader.read_u8()?;
        let kind = LiteralKind::from_byte(byte).ok_or_else(|| HtError::unknown_value_type(byte))?;
        match kind {
            LiteralKind::Null => self.set_local(Value::Null),
            LiteralKind::Bool => {
                let value = state.reader.read_bool()?;
                self.set_local(Value::Boolean(value));
            }
            LiteralKind::ConstInt => {
                let index = state.reader.read_u16()?;
                let value = state.reader.const_int(index)?;
                self.set_local(Value::Integer(value));
            }
            LiteralKind::ConstFloat => {
                let index = state.reader.read_u16()?;
                let value = state.reader.const_float(index)?;
                self.set_local(Value::Float(value));
            }
            LiteralKind::ConstString => {
                let index = state.reader.read_u16()?;
                let value = state.reader.const_string(index)?.to_string();
                self.set_local(Value::String(value));
            }
            LiteralKind::String => {
                let value = state.reader.read_utf8()?;
                self.set_local(Value::String(value));
            }
            LiteralKind::BigInt => {
                let digits = state.reader.read_utf8()?;
                let value = digits
                    .parse::<BigInt>()
                    .map_err(|e| HtError::bytecode(format!("Bad bigint literal: {}", e)))?;
                self.set_local(Value::BigInt(value));
            }
            LiteralKind::StringInterpolation => {
                let template = state.reader.read_utf8()?;
                let count = state.reader.read_u8()? as usize;
                let mut rendered = template;
                for i in 0..count {
                    let value = self.run_prefixed_expr(state)?;
                    rendered = rendered.replace(&format!("{{{}}}", i), &value.to_string());
                }
                self.set_local(Value::String(rendered));
            }
            LiteralKind::Identifier => {
                let id = state.reader.read_const_string()?;
                let is_local = state.reader.read_bool()?;
                self.frame_mut()
                    .set(Register::LocalSymbol, Value::String(id.clone()));
                if is_local {
                    let from = self.heap.namespace(state.namespace).full_name.clone();
                    let value = self
                        .lookup_value(state.namespace, &id, Some(&from), true)?
                        .ok_or_else(|| HtError::undefined(&id))?;
                    self.set_local(value);
                } else {
                    self.set_local(Value::String(id));
                }
            }
            LiteralKind::Group => {
                let value = self.run_prefixed_expr(state)?;
                self.set_local(value);
            }
            LiteralKind::List => {
                let count = state.reader.read_u16()? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    let is_spread = state.reader.read_bool()?;
                    let value = self.run_prefixed_expr(state)?;
                    if is_spread {
                        match value {
                            Value::List(source) => items.extend(source.borrow().iter().cloned()),
                            other => {
                                return Err(HtError::not_spreadable(other.type_name()))
                            }
                        }
                    } else {
                        items.push(value);
                    }
                }
                self.set_local(Value::list(items));
            }
            LiteralKind::Struct => {
                let value = self.handle_struct_literal(state)?;
                self.set_local(value);
            }
            LiteralKind::Function => {
                let function = self.read_function(state, FunctionCategory::Literal)?;
                let external_type_id = function.external_type_id.clone();
                let fid = self.alloc_closure(function, state.namespace);
                let value = match external_type_id {
                    Some(typedef) => {
                        let wrapper = self.bindings.function_typedef(&typedef)?;
                        wrapper(self, fid)?
                    }
                    None => Value::Function(fid),
                };
                self.set_local(value);
            }
            LiteralKind::Type => {
                let declared = self.read_type_expr(state)?;
                let declared = self.heap.resolve_type(&declared, state.namespace);
                self.set_local(Value::Type(Box::new(declared)));
            }
        }
        Ok(())
    }

    fn alloc_closure(&mut self, mut function: HtFunction, namespace: NamespaceId) -> FunctionId {
        if function.closure.is_none() {
            function.closure = Some(namespace);
        }
        self.heap.alloc_function(function)
    }

    fn handle_struct_literal(&mut self, state: &mut ExecState) -> Result<Value, HtError> {
        let id = if state.reader.read_bool()? {
            Some(state.reader.read_const_string()?)
        } else {
            None
        };
        let prototype = if state.reader.read_bool()? {
            let proto_id = state.reader.read_const_string()?;
            let from = self.heap.namespace(state.namespace).full_name.clone();
            let proto_value = self
                .lookup_value(state.namespace, &proto_id, Some(&from), true)?
                .ok_or_else(|| HtError::undefined(&proto_id))?;
            match proto_value {
                Value::Struct(sid) => Some(sid),
                other => return Err(HtError::not_spreadable(other.type_name())),
            }
        } else {
            None
        };
        let sid = self
            .heap
            .alloc_struct(id.as_deref(), prototype, state.namespace);
        let field_count = state.reader.read_u16()? as usize;
        for _ in 0..field_count {
            let field_kind = state.reader.read_u8()?;
            match field_kind {
                0 => {
                    let key = state.reader.read_const_string()?;
                    let value = self.run_prefixed_expr(state)?;
                    self.heap.struct_set_field(sid, &key, value);
                }
                1 => {
                    let source = self.run_prefixed_expr(state)?;
                    self.spread_into_struct(sid, &source)?;
                }
                other => {
                    return Err(HtError::bytecode(format!(
                        "Unknown struct field kind [{}]",
                        other
                    )))
                }
            }
        }
        Ok(Value::Struct(sid))
    }

    fn spread_into_struct(&mut self, sid: StructId, source: &Value) -> Result<(), HtError> {
        match source {
            Value::Struct(other) => {
                self.heap.struct_assign(sid, *other);
                Ok(())
            }
            Value::Map(entries) => {
                let entries: Vec<(String, Value)> = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect();
                for (key, value) in entries {
                    self.heap.struct_set_field(sid, &key, value);
                }
                Ok(())
            }
            other => Err(HtError::not_spreadable(other.type_name())),
        }
    }

    // -- type expressions -------------------------------------------------------

    fn read_type_expr(&mut self, state: &mut ExecState) -> Result<HtType, HtError> {
        let byte = state.reader.read_u8()?;
        let code = TypeCode::from_byte(byte)
            .ok_or_else(|| HtError::bytecode(format!("Unknown type code [{}]", byte)))?;
        match code {
            TypeCode::Intrinsic => {
                let atom_byte = state.reader.read_u8()?;
                let atom = IntrinsicCode::from_byte(atom_byte).ok_or_else(|| {
                    HtError::bytecode(format!("Unknown intrinsic type [{}]", atom_byte))
                })?;
                Ok(HtType::Intrinsic(match atom {
                    IntrinsicCode::Any => IntrinsicType::Any,
                    IntrinsicCode::Unknown => IntrinsicType::Unknown,
                    IntrinsicCode::Void => IntrinsicType::Void,
                    IntrinsicCode::Never => IntrinsicType::Never,
                    IntrinsicCode::Type => IntrinsicType::Type,
                    IntrinsicCode::Function => IntrinsicType::Function,
                    IntrinsicCode::Namespace => IntrinsicType::Namespace,
                    IntrinsicCode::Null => IntrinsicType::Null,
                }))
            }
            TypeCode::Nominal => {
                let id = state.reader.read_const_string()?;
                let is_nullable = state.reader.read_bool()?;
                let arg_count = state.reader.read_u8()? as usize;
                let mut type_args = Vec::with_capacity(arg_count);
                for _ in 0..arg_count {
                    type_args.push(self.read_type_expr(state)?);
                }
                Ok(HtType::Nominal(NominalType {
                    id,
                    type_args,
                    is_nullable,
                    namespaces: Vec::new(),
                    resolved: None,
                }))
            }
            TypeCode::Function => {
                let param_count = state.reader.read_u8()? as usize;
                let mut parameter_types = Vec::with_capacity(param_count);
                for _ in 0..param_count {
                    let id = if state.reader.read_bool()? {
                        Some(state.reader.read_const_string()?)
                    } else {
                        None
                    };
                    let is_optional = state.reader.read_bool()?;
                    let is_variadic = state.reader.read_bool()?;
                    let declared = self.read_type_expr(state)?;
                    parameter_types.push(ParameterType {
                        id: id.clone(),
                        declared,
                        is_optional,
                        is_variadic,
                    });
                }
                let return_type = self.read_type_expr(state)?;
                Ok(HtType::Function(Box::new(core_types::FunctionType {
                    parameter_types,
                    return_type,
                })))
            }
            TypeCode::Structural => {
                let field_count = state.reader.read_u16()? as usize;
                let mut field_types = Vec::with_capacity(field_count);
                for _ in 0..field_count {
                    let id = state.reader.read_const_string()?;
                    let declared = self.read_type_expr(state)?;
                    field_types.push((id, declared));
                }
                Ok(HtType::Structural(core_types::StructuralType { field_types }))
            }
        }
    }

    // -- declarations -----------------------------------------------------------

    fn handle_var_decl(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let id = state.reader.read_const_string()?;
        let is_field = state.reader.read_bool()?;
        let is_external = state.reader.read_bool()?;
        let is_static = state.reader.read_bool()?;
        let is_mutable = state.reader.read_bool()?;
        let is_late_initialized = state.reader.read_bool()?;
        let declared_type = if state.reader.read_bool()? {
            let declared = self.read_type_expr(state)?;
            Some(self.heap.resolve_type(&declared, state.namespace))
        } else {
            None
        };
        let has_initializer = state.reader.read_bool()?;

        let mut decl = Declaration::variable(&id, Value::Null, is_mutable);
        decl.is_external = is_external;
        decl.is_static = is_static;
        decl.is_field = is_field;
        decl.declared_type = declared_type;

        if has_initializer {
            if is_field || is_late_initialized {
                // Record the region; first read (or construction) executes it
                let len = state.reader.read_u16()? as usize;
                decl.late_init = Some(LateInit {
                    module: state.module.clone(),
                    ip: state.reader.ip(),
                    line: state.line,
                    column: state.column,
                    namespace: state.namespace,
                });
                state.reader.skip(len)?;
                self.set_local(Value::Null);
            } else {
                let value = self.run_prefixed_expr(state)?;
                decl.value = value.clone();
                if self.config.allow_initialization_expression_result {
                    self.set_local(value);
                } else {
                    self.set_local(Value::Null);
                }
            }
        } else {
            self.set_local(Value::Null);
        }
        self.heap.ns_define(state.namespace, decl, false)?;
        Ok(())
    }

    fn handle_destructuring_decl(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let is_list_pattern = state.reader.read_bool()?;
        let is_mutable = state.reader.read_bool()?;
        let count = state.reader.read_u8()? as usize;
        let mut targets = Vec::with_capacity(count);
        for _ in 0..count {
            let symbol = state.reader.read_const_string()?;
            let key = state.reader.read_const_string()?;
            targets.push((symbol, key));
        }
        let source = self.run_prefixed_expr(state)?;
        for (index, (symbol, key)) in targets.into_iter().enumerate() {
            let value = if is_list_pattern {
                match &source {
                    Value::List(items) => {
                        items.borrow().get(index).cloned().unwrap_or(Value::Null)
                    }
                    other => return Err(HtError::not_spreadable(other.type_name())),
                }
            } else {
                let from = self.heap.namespace(state.namespace).full_name.clone();
                self.member_get_value(&source, &key, true, &from, state)?
            };
            self.heap.ns_define(
                state.namespace,
                Declaration::variable(&symbol, value, is_mutable),
                false,
            )?;
        }
        Ok(())
    }

    fn handle_struct_decl(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let id = state.reader.read_const_string()?;
        let _prototype_id = if state.reader.read_bool()? {
            Some(state.reader.read_const_string()?)
        } else {
            None
        };
        let len = state.reader.read_u16()? as usize;
        let mut decl = Declaration::immutable(&id, DeclKind::StructTemplate, Value::Null);
        decl.late_init = Some(LateInit {
            module: state.module.clone(),
            ip: state.reader.ip(),
            line: state.line,
            column: state.column,
            namespace: state.namespace,
        });
        state.reader.skip(len)?;
        self.heap.ns_define(state.namespace, decl, false)?;
        Ok(())
    }

    fn handle_import_export_decl(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let is_exported = state.reader.read_bool()?;
        let is_preloaded = state.reader.read_bool()?;
        let from_path = if state.reader.read_bool()? {
            Some(state.reader.read_const_string()?)
        } else {
            None
        };
        let show_count = state.reader.read_u8()? as usize;
        let mut show_list = Vec::with_capacity(show_count);
        for _ in 0..show_count {
            show_list.push(state.reader.read_const_string()?);
        }
        let alias = if state.reader.read_bool()? {
            Some(state.reader.read_const_string()?)
        } else {
            None
        };
        match from_path {
            None => {
                // Export adjustment on the current namespace
                self.heap
                    .namespace_mut(state.namespace)
                    .declare_export(&show_list);
            }
            Some(path) => {
                let record = crate::namespace::UnresolvedImport {
                    from_path: Some(path),
                    alias,
                    show_list,
                    is_exported,
                    is_preloaded,
                };
                // Script and literal sources resolve imports on the spot;
                // module sources defer until end of module
                if self.resolves_imports_immediately(&state.module) {
                    let module = state.module.clone();
                    let mut visited = std::collections::HashSet::new();
                    self.resolve_one_import(&module, state.namespace, record, &mut visited)?;
                } else {
                    self.heap
                        .namespace_mut(state.namespace)
                        .declare_import(record);
                }
            }
        }
        Ok(())
    }

    fn handle_class_decl(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let id = state.reader.read_const_string()?;
        let is_external = state.reader.read_bool()?;
        let is_abstract = state.reader.read_bool()?;
        let has_user_defined_constructor = state.reader.read_bool()?;
        let super_type = if state.reader.read_bool()? {
            let declared = self.read_type_expr(state)?;
            Some(self.heap.resolve_type(&declared, state.namespace))
        } else {
            None
        };
        let super_class = match &super_type {
            Some(HtType::Nominal(nominal)) => nominal.resolved,
            _ => None,
        };
        let class_ns = self.heap.alloc_namespace(&id, Some(state.namespace), None);
        let mut class = HtClass::new(&id, class_ns);
        class.is_external = is_external;
        class.is_abstract = is_abstract;
        class.has_user_defined_constructor = has_user_defined_constructor;
        class.super_type = super_type;
        class.super_class = super_class;
        let class_id = self.heap.alloc_class(class);
        self.heap.namespace_mut(class_ns).class_id = Some(class_id);
        self.heap.ns_define(
            state.namespace,
            Declaration::immutable(&id, DeclKind::Class, Value::Class(class_id)),
            false,
        )?;
        state.ns_stack.push(state.namespace);
        state.class_stack.push(class_id);
        state.namespace = class_ns;
        Ok(())
    }

    fn handle_class_decl_end(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let class_id = state
            .class_stack
            .pop()
            .ok_or_else(|| HtError::bytecode("Class end without a start"))?;
        state.namespace = state
            .ns_stack
            .pop()
            .ok_or_else(|| HtError::bytecode("Class end without a namespace"))?;
        let class = self.heap.class(class_id).clone();
        if !class.is_abstract && !class.has_user_defined_constructor {
            // Synthesize the implicit zero-argument constructor
            let ctor = HtFunction {
                internal_name: lexicon::CONSTRUCTOR.to_string(),
                id: None,
                class_id: Some(class_id),
                closure: Some(class.namespace),
                module: None,
                category: FunctionCategory::Constructor,
                is_async: false,
                is_field: false,
                is_external: false,
                is_static: false,
                is_const: false,
                is_abstract: false,
                external_type_id: None,
                params: Vec::new(),
                declared_return_type: None,
                definition_ip: None,
                definition_line: 0,
                definition_column: 0,
                redirecting: None,
                bound_receiver: None,
            };
            let fid = self.heap.alloc_function(ctor);
            self.heap.ns_define(
                class.namespace,
                Declaration::immutable(
                    lexicon::CONSTRUCTOR,
                    DeclKind::Function,
                    Value::Function(fid),
                ),
                true,
            )?;
        }
        Ok(())
    }

    fn handle_func_decl(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let function = self.read_function(state, FunctionCategory::Normal)?;
        let define_as = match function.category {
            FunctionCategory::Getter | FunctionCategory::Setter | FunctionCategory::Constructor => {
                function.internal_name.clone()
            }
            _ => function
                .id
                .clone()
                .unwrap_or_else(|| function.internal_name.clone()),
        };
        let is_external = function.is_external;
        let is_static = function.is_static;
        let is_field = function.is_field;
        let fid = self.alloc_closure(function, state.namespace);
        let mut decl = Declaration::immutable(&define_as, DeclKind::Function, Value::Function(fid));
        decl.is_external = is_external;
        decl.is_static = is_static;
        decl.is_field = is_field;
        self.heap.ns_define(state.namespace, decl, true)?;
        Ok(())
    }

    /// Decode a function declaration or literal at the cursor.
    fn read_function(
        &mut self,
        state: &mut ExecState,
        default_category: FunctionCategory,
    ) -> Result<HtFunction, HtError> {
        let internal_name = state.reader.read_const_string()?;
        let id = if state.reader.read_bool()? {
            Some(state.reader.read_const_string()?)
        } else {
            None
        };
        let category_byte = state.reader.read_u8()?;
        let category = FunctionCategory::from_byte(category_byte)
            .ok_or_else(|| HtError::bytecode(format!("Unknown function category [{}]", category_byte)))?;
        let category = if category == FunctionCategory::Normal {
            default_category
        } else {
            category
        };
        let is_async = state.reader.read_bool()?;
        let is_field = state.reader.read_bool()?;
        let is_external = state.reader.read_bool()?;
        let is_static = state.reader.read_bool()?;
        let is_const = state.reader.read_bool()?;
        let external_type_id = if state.reader.read_bool()? {
            Some(state.reader.read_const_string()?)
        } else {
            None
        };
        let param_count = state.reader.read_u8()? as usize;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            let param_id = state.reader.read_const_string()?;
            let is_optional = state.reader.read_bool()?;
            let is_variadic = state.reader.read_bool()?;
            let is_named = state.reader.read_bool()?;
            let declared_type = if state.reader.read_bool()? {
                Some(self.read_type_expr(state)?)
            } else {
                None
            };
            let default_ip = if state.reader.read_bool()? {
                let len = state.reader.read_u16()? as usize;
                let ip = state.reader.ip();
                state.reader.skip(len)?;
                Some(ip)
            } else {
                None
            };
            params.push(HtParameter {
                id: param_id,
                declared_type,
                default_ip,
                is_optional,
                is_variadic,
                is_named,
            });
        }
        let declared_return_type = if state.reader.read_bool()? {
            Some(self.read_type_expr(state)?)
        } else {
            None
        };
        let redirecting = if category == FunctionCategory::Constructor {
            if state.reader.read_bool()? {
                let callee = state.reader.read_const_string()?;
                let key = if state.reader.read_bool()? {
                    Some(state.reader.read_const_string()?)
                } else {
                    None
                };
                let positional_count = state.reader.read_u8()? as usize;
                let mut positional_ips = Vec::with_capacity(positional_count);
                for _ in 0..positional_count {
                    let len = state.reader.read_u16()? as usize;
                    positional_ips.push(state.reader.ip());
                    state.reader.skip(len)?;
                }
                let named_count = state.reader.read_u8()? as usize;
                let mut named_ips = Vec::with_capacity(named_count);
                for _ in 0..named_count {
                    let name = state.reader.read_const_string()?;
                    let len = state.reader.read_u16()? as usize;
                    named_ips.push((name, state.reader.ip()));
                    state.reader.skip(len)?;
                }
                Some(RedirectingConstructor {
                    callee,
                    key,
                    positional_ips,
                    named_ips,
                })
            } else {
                None
            }
        } else {
            None
        };
        let is_abstract = state.reader.read_bool()?;
        let (definition_ip, definition_line, definition_column) = if state.reader.read_bool()? {
            let line = state.reader.read_u16()? as u32;
            let column = state.reader.read_u16()? as u32;
            let len = state.reader.read_u16()? as usize;
            let ip = state.reader.ip();
            state.reader.skip(len)?;
            (Some(ip), line, column)
        } else {
            (None, 0, 0)
        };
        Ok(HtFunction {
            internal_name,
            id,
            class_id: state.class_stack.last().copied(),
            closure: None,
            module: Some(state.module.clone()),
            category,
            is_async,
            is_field,
            is_external,
            is_static,
            is_const,
            is_abstract,
            external_type_id,
            params,
            declared_return_type,
            definition_ip,
            definition_line,
            definition_column,
            redirecting,
            bound_receiver: None,
        })
    }

    // -- delete -------------------------------------------------------------------

    fn handle_delete(&mut self, state: &mut ExecState) -> Result<(), HtError> {
        let kind_byte = state.reader.read_u8()?;
        let kind = DeleteKind::from_byte(kind_byte)
            .ok_or_else(|| HtError::bytecode(format!("Unknown delete kind [{}]", kind_byte)))?;
        match kind {
            DeleteKind::Local => {
                let id = state.reader.read_const_string()?;
                if !self.heap.ns_delete(state.namespace, &id) {
                    return Err(HtError::delete());
                }
            }
            DeleteKind::Member => {
                let key = state.reader.read_const_string()?;
                match self.reg(Register::PostfixObject) {
                    Value::Struct(sid) => {
                        self.heap.struct_delete_field(sid, &key);
                    }
                    Value::Namespace(ns) => {
                        if !self.heap.ns_delete(ns, &key) {
                            return Err(HtError::delete());
                        }
                    }
                    _ => return Err(HtError::delete()),
                }
            }
            DeleteKind::Sub => {
                let key = self.local().to_string();
                match self.reg(Register::PostfixObject) {
                    Value::Struct(sid) => {
                        self.heap.struct_delete_field(sid, &key);
                    }
                    _ => return Err(HtError::delete()),
                }
            }
        }
        Ok(())
    }

    // -- symbol resolution ---------------------------------------------------------

    /// Look up a symbol and force its deferred initializer if needed.
    pub(crate) fn lookup_value(
        &mut self,
        ns: NamespaceId,
        id: &str,
        from: Option<&str>,
        recursive: bool,
    ) -> Result<Option<Value>, HtError> {
        let found = self.heap.ns_lookup_with_home(ns, id, from, recursive)?;
        let (decl, home) = match found {
            Some(found) => found,
            None => return Ok(None),
        };
        match decl.late_init {
            Some(late) => {
                let value = self.run_region(&late.module, late.ip, late.namespace, id)?;
                if let Some(slot) = self.heap.namespace_mut(home).symbols.get_mut(id) {
                    slot.value = value.clone();
                    slot.late_init = None;
                }
                Ok(Some(value))
            }
            None => Ok(Some(decl.value)),
        }
    }

    /// Run an expression region of a module at an absolute ip.
    ///
    /// Used for deferred initializers, parameter defaults and constructor
    /// redirect arguments. The region gets its own frame so it cannot
    /// disturb staged operands of the interrupted expression.
    pub(crate) fn run_region(
        &mut self,
        module: &str,
        ip: usize,
        namespace: NamespaceId,
        function_name: &str,
    ) -> Result<Value, HtError> {
        let reader = self
            .modules
            .get(module)
            .ok_or_else(|| HtError::resource_not_found(module))?
            .reader
            .clone();
        let mut state = ExecState {
            module: module.to_string(),
            reader,
            namespace,
            ns_stack: Vec::new(),
            class_stack: Vec::new(),
            filename: module.to_string(),
            line: 0,
            column: 0,
            function_name: function_name.to_string(),
        };
        state.reader.set_ip(ip);
        self.frames.push(StackFrame::new());
        let result = self.run_expr(&mut state);
        self.frames.pop();
        result
    }

    pub(crate) fn capture_stack_trace(&self) -> Vec<StackTraceFrame> {
        let count = self.config.stack_trace_display_count;
        let mut trace: Vec<StackTraceFrame> =
            self.stack_trace.iter().rev().take(count).cloned().collect();
        trace.shrink_to_fit();
        trace
    }
}
