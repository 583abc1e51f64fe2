//! Bytecode image builder.
//!
//! The emitter is the writing half of the wire format: the external compiler
//! drives it to produce loadable images, and integration tests use it to
//! assemble modules directly. Inline regions (branch bodies, call arguments,
//! default values) are length-prefixed and patched after their content is
//! written.

use core_types::{HtError, HtType, HtVersion, SourceType};

use crate::opcode::{
    DeleteKind, FunctionCategory, IntrinsicCode, LiteralKind, Opcode, Register, TypeCode, MAGIC,
};

/// Flags of a variable declaration.
#[derive(Debug, Clone, Copy, Default)]
pub struct VarDeclFlags {
    /// Declared inside a class body as an instance field
    pub is_field: bool,
    /// Bound to an external value
    pub is_external: bool,
    /// Static class member
    pub is_static: bool,
    /// Re-assignable
    pub is_mutable: bool,
    /// Initializer runs on first read instead of at declaration
    pub is_late_initialized: bool,
}

/// One parameter of a function declaration or literal.
pub struct ParamSpec<'a> {
    /// Parameter name
    pub id: &'a str,
    /// May be omitted by the caller
    pub is_optional: bool,
    /// Collects trailing positional arguments into a list
    pub is_variadic: bool,
    /// Passed by name
    pub is_named: bool,
    /// Declared type
    pub declared_type: Option<HtType>,
    /// Default value expression
    pub default: Option<Box<dyn FnOnce(&mut BytecodeEmitter) + 'a>>,
}

impl<'a> ParamSpec<'a> {
    /// A required positional parameter without type or default.
    pub fn positional(id: &'a str) -> Self {
        Self {
            id,
            is_optional: false,
            is_variadic: false,
            is_named: false,
            declared_type: None,
            default: None,
        }
    }

    /// A named parameter.
    pub fn named(id: &'a str) -> Self {
        Self {
            is_named: true,
            ..Self::positional(id)
        }
    }

    /// An optional positional parameter with a default expression.
    pub fn optional(id: &'a str, default: impl FnOnce(&mut BytecodeEmitter) + 'a) -> Self {
        Self {
            is_optional: true,
            default: Some(Box::new(default)),
            ..Self::positional(id)
        }
    }

    /// A variadic tail parameter.
    pub fn variadic(id: &'a str) -> Self {
        Self {
            is_variadic: true,
            ..Self::positional(id)
        }
    }
}

/// Everything needed to emit a function declaration or literal.
pub struct FuncSpec<'a> {
    /// Internal (mangled) name
    pub internal_name: &'a str,
    /// Public id, when the function is bound to one
    pub id: Option<&'a str>,
    /// Category byte
    pub category: FunctionCategory,
    /// Async wrapper flag
    pub is_async: bool,
    /// Field-function flag (method stored on instances)
    pub is_field: bool,
    /// External dispatch flag
    pub is_external: bool,
    /// Static class member flag
    pub is_static: bool,
    /// Const function flag
    pub is_const: bool,
    /// Abstract (no body) flag
    pub is_abstract: bool,
    /// External function typedef id for host re-wrapping
    pub external_type_id: Option<&'a str>,
    /// Parameters in declaration order
    pub params: Vec<ParamSpec<'a>>,
    /// Declared return type
    pub return_type: Option<HtType>,
    /// Redirecting constructor record
    pub redirecting: Option<RedirectSpec<'a>>,
    /// Source position of the definition
    pub line: u16,
    /// Source column of the definition
    pub column: u16,
    /// Body statements, ending implicitly with `EndOfFunc`
    pub body: Option<Box<dyn FnOnce(&mut BytecodeEmitter) + 'a>>,
}

impl<'a> FuncSpec<'a> {
    /// A plain named function with a body.
    pub fn function(id: &'a str, body: impl FnOnce(&mut BytecodeEmitter) + 'a) -> Self {
        Self {
            internal_name: id,
            id: Some(id),
            category: FunctionCategory::Normal,
            is_async: false,
            is_field: false,
            is_external: false,
            is_static: false,
            is_const: false,
            is_abstract: false,
            external_type_id: None,
            params: Vec::new(),
            return_type: None,
            redirecting: None,
            line: 0,
            column: 0,
            body: Some(Box::new(body)),
        }
    }

    /// An anonymous function literal with a body.
    pub fn literal(body: impl FnOnce(&mut BytecodeEmitter) + 'a) -> Self {
        Self {
            category: FunctionCategory::Literal,
            id: None,
            ..Self::function("$literal", body)
        }
    }
}

/// A redirecting constructor target with its argument expressions.
pub struct RedirectSpec<'a> {
    /// `super` or the name of a sibling constructor's class
    pub callee: &'a str,
    /// Named constructor key on the callee, when present
    pub key: Option<&'a str>,
    /// Positional argument expressions
    pub positional: Vec<Box<dyn FnOnce(&mut BytecodeEmitter) + 'a>>,
    /// Named argument expressions
    pub named: Vec<(&'a str, Box<dyn FnOnce(&mut BytecodeEmitter) + 'a>)>,
}

/// One field of a struct literal.
pub enum StructField<'a> {
    /// `key: value`
    Field(&'a str, Box<dyn FnOnce(&mut BytecodeEmitter) + 'a>),
    /// `...source`
    Spread(Box<dyn FnOnce(&mut BytecodeEmitter) + 'a>),
}

/// Builder for one bytecode image.
///
/// # Examples
///
/// ```
/// use bytecode_system::{BytecodeEmitter, BytecodeReader, MAGIC};
/// use core_types::SourceType;
///
/// let mut emitter = BytecodeEmitter::new("main.ht", SourceType::Script);
/// emitter.local_int(42);
/// emitter.end_module();
/// let bytes = emitter.finish();
///
/// let mut reader = BytecodeReader::new(bytes);
/// assert_eq!(reader.read_u32().unwrap(), MAGIC);
/// ```
pub struct BytecodeEmitter {
    code: Vec<u8>,
    const_ints: Vec<i64>,
    const_floats: Vec<f64>,
    const_strings: Vec<String>,
    version: HtVersion,
    bytecode_version: Option<HtVersion>,
    compiled_at: String,
    filename: String,
    source_type: SourceType,
}

impl BytecodeEmitter {
    /// Create an emitter for one source file.
    pub fn new(filename: &str, source_type: SourceType) -> Self {
        Self {
            code: Vec::new(),
            const_ints: Vec::new(),
            const_floats: Vec::new(),
            const_strings: Vec::new(),
            version: HtVersion::interpreter(),
            bytecode_version: None,
            compiled_at: String::new(),
            filename: filename.to_string(),
            source_type,
        }
    }

    /// Override the compiler version stamp.
    pub fn with_version(mut self, version: HtVersion) -> Self {
        self.version = version;
        self
    }

    /// Attach an explicit bytecode format version.
    pub fn with_bytecode_version(mut self, version: HtVersion) -> Self {
        self.bytecode_version = Some(version);
        self
    }

    /// Set the compile timestamp stamped into the header.
    pub fn with_compiled_at(mut self, timestamp: &str) -> Self {
        self.compiled_at = timestamp.to_string();
        self
    }

    // -- low-level writing --------------------------------------------------

    /// Append a raw byte.
    pub fn write_u8(&mut self, value: u8) {
        self.code.push(value);
    }

    /// Append a boolean as one byte.
    pub fn write_bool(&mut self, value: bool) {
        self.code.push(value as u8);
    }

    /// Append a little-endian i16.
    pub fn write_i16(&mut self, value: i16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian u16.
    pub fn write_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian u32.
    pub fn write_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian i64.
    pub fn write_i64(&mut self, value: i64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian f64.
    pub fn write_f64(&mut self, value: f64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a u32-length-prefixed UTF-8 string.
    pub fn write_utf8(&mut self, text: &str) {
        self.write_u32(text.len() as u32);
        self.code.extend_from_slice(text.as_bytes());
    }

    /// Append an opcode byte.
    pub fn op(&mut self, opcode: Opcode) {
        self.code.push(opcode as u8);
    }

    /// Intern a string into the constant pool and return its index.
    pub fn intern_string(&mut self, text: &str) -> u16 {
        if let Some(index) = self.const_strings.iter().position(|s| s == text) {
            return index as u16;
        }
        self.const_strings.push(text.to_string());
        (self.const_strings.len() - 1) as u16
    }

    /// Intern an int into the constant pool and return its index.
    pub fn intern_int(&mut self, value: i64) -> u16 {
        if let Some(index) = self.const_ints.iter().position(|&n| n == value) {
            return index as u16;
        }
        self.const_ints.push(value);
        (self.const_ints.len() - 1) as u16
    }

    /// Intern a float into the constant pool and return its index.
    pub fn intern_float(&mut self, value: f64) -> u16 {
        if let Some(index) = self
            .const_floats
            .iter()
            .position(|&n| n.to_bits() == value.to_bits())
        {
            return index as u16;
        }
        self.const_floats.push(value);
        (self.const_floats.len() - 1) as u16
    }

    /// Write an interned string index.
    pub fn write_string_index(&mut self, text: &str) {
        let index = self.intern_string(text);
        self.write_u16(index);
    }

    // -- regions ------------------------------------------------------------

    /// Write a u16-length-prefixed raw region (executed inline or skipped).
    pub fn guarded_region(&mut self, body: impl FnOnce(&mut Self)) {
        let slot = self.code.len();
        self.write_u16(0);
        let start = self.code.len();
        body(self);
        let len = (self.code.len() - start) as u16;
        self.code[slot..slot + 2].copy_from_slice(&len.to_le_bytes());
    }

    /// Write a u16-length-prefixed expression region ending with `EndOfExec`.
    pub fn expr_region(&mut self, body: impl FnOnce(&mut Self)) {
        self.guarded_region(|e| {
            body(e);
            e.op(Opcode::EndOfExec);
        });
    }

    /// Emit a forward `Skip` over the body.
    pub fn skip_over(&mut self, body: impl FnOnce(&mut Self)) {
        self.op(Opcode::Skip);
        let slot = self.code.len();
        self.write_i16(0);
        let start = self.code.len();
        body(self);
        let len = (self.code.len() - start) as i16;
        self.code[slot..slot + 2].copy_from_slice(&len.to_le_bytes());
    }

    // -- literals and registers ---------------------------------------------

    /// Load null into the local value slot.
    pub fn local_null(&mut self) {
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::Null as u8);
    }

    /// Load a boolean literal.
    pub fn local_bool(&mut self, value: bool) {
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::Bool as u8);
        self.write_bool(value);
    }

    /// Load an integer literal through the constant pool.
    pub fn local_int(&mut self, value: i64) {
        let index = self.intern_int(value);
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::ConstInt as u8);
        self.write_u16(index);
    }

    /// Load a float literal through the constant pool.
    pub fn local_float(&mut self, value: f64) {
        let index = self.intern_float(value);
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::ConstFloat as u8);
        self.write_u16(index);
    }

    /// Load a string literal through the constant pool.
    pub fn local_string(&mut self, text: &str) {
        let index = self.intern_string(text);
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::ConstString as u8);
        self.write_u16(index);
    }

    /// Load an inline (non-interned) string literal.
    pub fn local_inline_string(&mut self, text: &str) {
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::String as u8);
        self.write_utf8(text);
    }

    /// Load a big integer literal from its decimal digits.
    pub fn local_bigint(&mut self, digits: &str) {
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::BigInt as u8);
        self.write_utf8(digits);
    }

    /// Load an interpolated string: `{0}`, `{1}`, … slots in the template
    /// are replaced with the stringified values of the trailing expressions.
    pub fn local_interpolation<'a>(
        &mut self,
        template: &str,
        exprs: Vec<Box<dyn FnOnce(&mut Self) + 'a>>,
    ) {
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::StringInterpolation as u8);
        self.write_utf8(template);
        self.write_u8(exprs.len() as u8);
        for expr in exprs {
            self.expr_region(expr);
        }
    }

    /// Load an identifier: resolved through the namespace chain when
    /// `is_local`, otherwise staged as a symbol name for later opcodes.
    pub fn identifier(&mut self, id: &str, is_local: bool) {
        let index = self.intern_string(id);
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::Identifier as u8);
        self.write_u16(index);
        self.write_bool(is_local);
    }

    /// Load a parenthesized group.
    pub fn local_group(&mut self, body: impl FnOnce(&mut Self)) {
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::Group as u8);
        self.expr_region(body);
    }

    /// Load a list literal.
    pub fn local_list<'a>(&mut self, items: Vec<(bool, Box<dyn FnOnce(&mut Self) + 'a>)>) {
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::List as u8);
        self.write_u16(items.len() as u16);
        for (is_spread, expr) in items {
            self.write_bool(is_spread);
            self.expr_region(expr);
        }
    }

    /// Load a struct literal.
    pub fn local_struct(
        &mut self,
        id: Option<&str>,
        prototype_id: Option<&str>,
        fields: Vec<StructField<'_>>,
    ) {
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::Struct as u8);
        match id {
            Some(id) => {
                self.write_bool(true);
                self.write_string_index(id);
            }
            None => self.write_bool(false),
        }
        match prototype_id {
            Some(proto) => {
                self.write_bool(true);
                self.write_string_index(proto);
            }
            None => self.write_bool(false),
        }
        self.write_u16(fields.len() as u16);
        for field in fields {
            match field {
                StructField::Field(key, expr) => {
                    self.write_u8(0);
                    self.write_string_index(key);
                    self.expr_region(expr);
                }
                StructField::Spread(expr) => {
                    self.write_u8(1);
                    self.expr_region(expr);
                }
            }
        }
    }

    /// Load a function literal.
    pub fn local_function(&mut self, spec: FuncSpec<'_>) {
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::Function as u8);
        self.write_func(spec);
    }

    /// Load a type literal.
    pub fn local_type(&mut self, declared: &HtType) {
        self.op(Opcode::Local);
        self.write_u8(LiteralKind::Type as u8);
        self.write_type_expr(declared);
    }

    /// Copy the local value into a named register.
    pub fn store(&mut self, register: Register) {
        self.op(Opcode::Register);
        self.write_u8(register as u8);
    }

    /// Update the current source position.
    pub fn line_info(&mut self, line: u16, column: u16) {
        self.op(Opcode::LineInfo);
        self.write_u16(line);
        self.write_u16(column);
    }

    // -- type expressions ---------------------------------------------------

    /// Encode a type expression.
    pub fn write_type_expr(&mut self, declared: &HtType) {
        match declared {
            HtType::Intrinsic(intrinsic) => {
                self.write_u8(TypeCode::Intrinsic as u8);
                let code = match intrinsic {
                    core_types::IntrinsicType::Any => IntrinsicCode::Any,
                    core_types::IntrinsicType::Unknown => IntrinsicCode::Unknown,
                    core_types::IntrinsicType::Void => IntrinsicCode::Void,
                    core_types::IntrinsicType::Never => IntrinsicCode::Never,
                    core_types::IntrinsicType::Type => IntrinsicCode::Type,
                    core_types::IntrinsicType::Function => IntrinsicCode::Function,
                    core_types::IntrinsicType::Namespace => IntrinsicCode::Namespace,
                    core_types::IntrinsicType::Null => IntrinsicCode::Null,
                };
                self.write_u8(code as u8);
            }
            HtType::Nominal(nominal) => {
                self.write_u8(TypeCode::Nominal as u8);
                self.write_string_index(&nominal.id);
                self.write_bool(nominal.is_nullable);
                self.write_u8(nominal.type_args.len() as u8);
                for arg in &nominal.type_args {
                    self.write_type_expr(arg);
                }
            }
            HtType::Function(func) => {
                self.write_u8(TypeCode::Function as u8);
                self.write_u8(func.parameter_types.len() as u8);
                for param in &func.parameter_types {
                    match &param.id {
                        Some(id) => {
                            self.write_bool(true);
                            self.write_string_index(id);
                        }
                        None => self.write_bool(false),
                    }
                    self.write_bool(param.is_optional);
                    self.write_bool(param.is_variadic);
                    self.write_type_expr(&param.declared);
                }
                self.write_type_expr(&func.return_type);
            }
            HtType::Structural(structural) => {
                self.write_u8(TypeCode::Structural as u8);
                self.write_u16(structural.field_types.len() as u16);
                for (id, field) in &structural.field_types {
                    self.write_string_index(id);
                    self.write_type_expr(field);
                }
            }
        }
    }

    // -- declarations -------------------------------------------------------

    /// Emit a variable declaration.
    pub fn var_decl(
        &mut self,
        id: &str,
        flags: VarDeclFlags,
        declared_type: Option<&HtType>,
        initializer: Option<impl FnOnce(&mut Self)>,
    ) {
        self.op(Opcode::VarDecl);
        self.write_string_index(id);
        self.write_bool(flags.is_field);
        self.write_bool(flags.is_external);
        self.write_bool(flags.is_static);
        self.write_bool(flags.is_mutable);
        self.write_bool(flags.is_late_initialized);
        match declared_type {
            Some(declared) => {
                self.write_bool(true);
                self.write_type_expr(declared);
            }
            None => self.write_bool(false),
        }
        match initializer {
            Some(init) => {
                self.write_bool(true);
                self.expr_region(init);
            }
            None => self.write_bool(false),
        }
    }

    /// Emit a compile-time int constant declaration.
    pub fn const_decl_int(&mut self, id: &str, value: i64) {
        let index = self.intern_int(value);
        self.op(Opcode::ConstDecl);
        self.write_string_index(id);
        self.write_u8(0);
        self.write_u16(index);
    }

    /// Emit a compile-time float constant declaration.
    pub fn const_decl_float(&mut self, id: &str, value: f64) {
        let index = self.intern_float(value);
        self.op(Opcode::ConstDecl);
        self.write_string_index(id);
        self.write_u8(1);
        self.write_u16(index);
    }

    /// Emit a compile-time string constant declaration.
    pub fn const_decl_string(&mut self, id: &str, value: &str) {
        let index = self.intern_string(value);
        self.op(Opcode::ConstDecl);
        self.write_string_index(id);
        self.write_u8(2);
        self.write_u16(index);
    }

    /// Emit a destructuring declaration. Each target is `(symbol, key)`;
    /// list patterns ignore the key and bind by position.
    pub fn destructuring_decl(
        &mut self,
        targets: &[(&str, &str)],
        is_list_pattern: bool,
        is_mutable: bool,
        initializer: impl FnOnce(&mut Self),
    ) {
        self.op(Opcode::DestructuringDecl);
        self.write_bool(is_list_pattern);
        self.write_bool(is_mutable);
        self.write_u8(targets.len() as u8);
        for (symbol, key) in targets {
            self.write_string_index(symbol);
            self.write_string_index(key);
        }
        self.expr_region(initializer);
    }

    /// Emit a type alias declaration.
    pub fn type_alias_decl(&mut self, id: &str, declared: &HtType) {
        self.op(Opcode::TypeAliasDecl);
        self.write_string_index(id);
        self.write_type_expr(declared);
    }

    /// Emit an external enum declaration.
    pub fn external_enum_decl(&mut self, id: &str) {
        self.op(Opcode::ExternalEnumDecl);
        self.write_string_index(id);
    }

    /// Emit an import/export declaration record.
    #[allow(clippy::too_many_arguments)]
    pub fn import_export_decl(
        &mut self,
        from_path: Option<&str>,
        show: &[&str],
        alias: Option<&str>,
        is_exported: bool,
        is_preloaded: bool,
    ) {
        self.op(Opcode::ImportExportDecl);
        self.write_bool(is_exported);
        self.write_bool(is_preloaded);
        match from_path {
            Some(path) => {
                self.write_bool(true);
                self.write_string_index(path);
            }
            None => self.write_bool(false),
        }
        self.write_u8(show.len() as u8);
        for id in show {
            self.write_string_index(id);
        }
        match alias {
            Some(alias) => {
                self.write_bool(true);
                self.write_string_index(alias);
            }
            None => self.write_bool(false),
        }
    }

    /// Emit a namespace declaration with its body.
    pub fn namespace_decl(&mut self, id: &str, body: impl FnOnce(&mut Self)) {
        self.op(Opcode::NamespaceDecl);
        self.write_string_index(id);
        body(self);
        self.op(Opcode::NamespaceDeclEnd);
    }

    /// Emit a class declaration with its body.
    pub fn class_decl(
        &mut self,
        id: &str,
        is_external: bool,
        is_abstract: bool,
        has_user_defined_constructor: bool,
        super_type: Option<&HtType>,
        body: impl FnOnce(&mut Self),
    ) {
        self.op(Opcode::ClassDecl);
        self.write_string_index(id);
        self.write_bool(is_external);
        self.write_bool(is_abstract);
        self.write_bool(has_user_defined_constructor);
        match super_type {
            Some(declared) => {
                self.write_bool(true);
                self.write_type_expr(declared);
            }
            None => self.write_bool(false),
        }
        body(self);
        self.op(Opcode::ClassDeclEnd);
    }

    /// Emit a named struct declaration whose definition region is a struct
    /// literal evaluated lazily on first use.
    pub fn struct_decl(
        &mut self,
        id: &str,
        prototype_id: Option<&str>,
        definition: impl FnOnce(&mut Self),
    ) {
        self.op(Opcode::StructDecl);
        self.write_string_index(id);
        match prototype_id {
            Some(proto) => {
                self.write_bool(true);
                self.write_string_index(proto);
            }
            None => self.write_bool(false),
        }
        self.expr_region(definition);
    }

    /// Emit a function declaration.
    pub fn func_decl(&mut self, spec: FuncSpec<'_>) {
        self.op(Opcode::FuncDecl);
        self.write_func(spec);
    }

    fn write_func(&mut self, spec: FuncSpec<'_>) {
        self.write_string_index(spec.internal_name);
        match spec.id {
            Some(id) => {
                self.write_bool(true);
                self.write_string_index(id);
            }
            None => self.write_bool(false),
        }
        self.write_u8(spec.category as u8);
        self.write_bool(spec.is_async);
        self.write_bool(spec.is_field);
        self.write_bool(spec.is_external);
        self.write_bool(spec.is_static);
        self.write_bool(spec.is_const);
        match spec.external_type_id {
            Some(id) => {
                self.write_bool(true);
                self.write_string_index(id);
            }
            None => self.write_bool(false),
        }
        self.write_u8(spec.params.len() as u8);
        for param in spec.params {
            self.write_string_index(param.id);
            self.write_bool(param.is_optional);
            self.write_bool(param.is_variadic);
            self.write_bool(param.is_named);
            match &param.declared_type {
                Some(declared) => {
                    self.write_bool(true);
                    let declared = declared.clone();
                    self.write_type_expr(&declared);
                }
                None => self.write_bool(false),
            }
            match param.default {
                Some(default) => {
                    self.write_bool(true);
                    self.expr_region(default);
                }
                None => self.write_bool(false),
            }
        }
        match &spec.return_type {
            Some(declared) => {
                self.write_bool(true);
                let declared = declared.clone();
                self.write_type_expr(&declared);
            }
            None => self.write_bool(false),
        }
        if spec.category == FunctionCategory::Constructor {
            match spec.redirecting {
                Some(redirect) => {
                    self.write_bool(true);
                    self.write_string_index(redirect.callee);
                    match redirect.key {
                        Some(key) => {
                            self.write_bool(true);
                            self.write_string_index(key);
                        }
                        None => self.write_bool(false),
                    }
                    self.write_u8(redirect.positional.len() as u8);
                    for expr in redirect.positional {
                        self.expr_region(expr);
                    }
                    self.write_u8(redirect.named.len() as u8);
                    for (name, expr) in redirect.named {
                        self.write_string_index(name);
                        self.expr_region(expr);
                    }
                }
                None => self.write_bool(false),
            }
        }
        self.write_bool(spec.is_abstract);
        match spec.body {
            Some(body) => {
                self.write_bool(true);
                self.write_u16(spec.line);
                self.write_u16(spec.column);
                self.guarded_region(|e| {
                    body(e);
                    e.op(Opcode::EndOfFunc);
                });
            }
            None => self.write_bool(false),
        }
    }

    // -- operators and statements -------------------------------------------

    /// Emit a member read. Expects the object in `PostfixObject` and the
    /// key in `PostfixKey`.
    pub fn member_get(&mut self, is_nullable: bool) {
        self.op(Opcode::MemberGet);
        self.write_bool(is_nullable);
    }

    /// Emit a member write. Expects the value in `AssignRight` as well.
    pub fn member_set(&mut self, is_nullable: bool) {
        self.op(Opcode::MemberSet);
        self.write_bool(is_nullable);
    }

    /// Emit a subscript read. Expects the key in the local value slot.
    pub fn sub_get(&mut self, is_nullable: bool) {
        self.op(Opcode::SubGet);
        self.write_bool(is_nullable);
    }

    /// Emit a subscript write.
    pub fn sub_set(&mut self, is_nullable: bool) {
        self.op(Opcode::SubSet);
        self.write_bool(is_nullable);
    }

    /// Emit an `if`: the condition must already be in the local value slot.
    pub fn if_stmt(&mut self, then_branch: impl FnOnce(&mut Self)) {
        self.op(Opcode::IfStmt);
        self.guarded_region(then_branch);
    }

    /// Emit an `if`/`else`: the then branch jumps over the else branch.
    pub fn if_else(
        &mut self,
        then_branch: impl FnOnce(&mut Self),
        else_branch: impl FnOnce(&mut Self),
    ) {
        self.op(Opcode::IfStmt);
        let then_slot = self.code.len();
        self.write_u16(0);
        let then_start = self.code.len();
        then_branch(self);
        self.op(Opcode::Skip);
        let skip_slot = self.code.len();
        self.write_i16(0);
        let then_len = (self.code.len() - then_start) as u16;
        self.code[then_slot..then_slot + 2].copy_from_slice(&then_len.to_le_bytes());
        let else_start = self.code.len();
        else_branch(self);
        let else_len = (self.code.len() - else_start) as i16;
        self.code[skip_slot..skip_slot + 2].copy_from_slice(&else_len.to_le_bytes());
    }

    /// Emit a while loop: `condition` leaves its value in the local slot.
    pub fn while_loop(
        &mut self,
        condition: impl FnOnce(&mut Self),
        body: impl FnOnce(&mut Self),
    ) {
        self.op(Opcode::LoopPoint);
        let continue_slot = self.code.len();
        self.write_u16(0);
        let break_slot = self.code.len();
        self.write_u16(0);
        let start = self.code.len();
        condition(self);
        self.op(Opcode::WhileStmt);
        body(self);
        // Loop back to the condition check
        self.op(Opcode::Skip);
        let distance = -((self.code.len() + 2 - start) as i16);
        self.write_i16(distance);
        let end = self.code.len();
        // Continue re-checks the condition; break lands after the loop
        self.code[continue_slot..continue_slot + 2].copy_from_slice(&0u16.to_le_bytes());
        let break_offset = (end - start) as u16;
        self.code[break_slot..break_slot + 2].copy_from_slice(&break_offset.to_le_bytes());
    }

    /// Emit a do-while loop.
    pub fn do_loop(
        &mut self,
        body: impl FnOnce(&mut Self),
        condition: Option<impl FnOnce(&mut Self)>,
    ) {
        self.op(Opcode::LoopPoint);
        let continue_slot = self.code.len();
        self.write_u16(0);
        let break_slot = self.code.len();
        self.write_u16(0);
        let start = self.code.len();
        body(self);
        let continue_offset = (self.code.len() - start) as u16;
        match condition {
            Some(cond) => {
                cond(self);
                self.op(Opcode::DoStmt);
                self.write_bool(true);
            }
            None => {
                self.op(Opcode::DoStmt);
                self.write_bool(false);
            }
        }
        let end = self.code.len();
        self.code[continue_slot..continue_slot + 2]
            .copy_from_slice(&continue_offset.to_le_bytes());
        let break_offset = (end - start) as u16;
        self.code[break_slot..break_slot + 2].copy_from_slice(&break_offset.to_le_bytes());
    }

    /// Emit a switch. Layout: has-condition, case count, end offset, then
    /// per case a condition region and a branch region, then an optional
    /// else region.
    pub fn switch_stmt<'a>(
        &mut self,
        has_condition: bool,
        cases: Vec<(
            Box<dyn FnOnce(&mut Self) + 'a>,
            Box<dyn FnOnce(&mut Self) + 'a>,
        )>,
        else_branch: Option<Box<dyn FnOnce(&mut Self) + 'a>>,
    ) {
        self.op(Opcode::SwitchStmt);
        self.write_bool(has_condition);
        self.write_u8(cases.len() as u8);
        let end_slot = self.code.len();
        self.write_u16(0);
        let base = self.code.len();
        for (case_expr, branch) in cases {
            self.expr_region(case_expr);
            self.expr_region(branch);
        }
        match else_branch {
            Some(branch) => {
                self.write_bool(true);
                self.expr_region(branch);
            }
            None => self.write_bool(false),
        }
        let end_offset = (self.code.len() - base) as u16;
        self.code[end_slot..end_slot + 2].copy_from_slice(&end_offset.to_le_bytes());
    }

    /// Emit a short-circuit `||`: left operand must be in `OrLeft`.
    pub fn logical_or(&mut self, right: impl FnOnce(&mut Self)) {
        self.op(Opcode::LogicalOr);
        self.expr_region(right);
    }

    /// Emit a short-circuit `&&`: left operand must be in `AndLeft`.
    pub fn logical_and(&mut self, right: impl FnOnce(&mut Self)) {
        self.op(Opcode::LogicalAnd);
        self.expr_region(right);
    }

    /// Emit `??`: left operand must be in `IfNullLeft`.
    pub fn if_null(&mut self, right: impl FnOnce(&mut Self)) {
        self.op(Opcode::IfNull);
        self.expr_region(right);
    }

    /// Emit a cast: castee must be in `RelationLeft`.
    pub fn type_as(&mut self, target: &HtType) {
        self.op(Opcode::TypeAs);
        self.write_type_expr(target);
    }

    /// Emit a type test: operand must be in `RelationLeft`.
    pub fn type_is(&mut self, target: &HtType) {
        self.op(Opcode::TypeIs);
        self.write_type_expr(target);
    }

    /// Emit a negated type test.
    pub fn type_is_not(&mut self, target: &HtType) {
        self.op(Opcode::TypeIsNot);
        self.write_type_expr(target);
    }

    /// Emit a call. The callee must be in the local value slot.
    pub fn call<'a>(
        &mut self,
        has_new_operator: bool,
        is_nullable: bool,
        callee_id: Option<&str>,
        positional: Vec<(bool, Box<dyn FnOnce(&mut Self) + 'a>)>,
        named: Vec<(&str, Box<dyn FnOnce(&mut Self) + 'a>)>,
    ) {
        self.op(Opcode::Call);
        self.write_bool(has_new_operator);
        self.write_bool(is_nullable);
        match callee_id {
            Some(id) => {
                self.write_bool(true);
                self.write_string_index(id);
            }
            None => self.write_bool(false),
        }
        self.write_u8(positional.len() as u8);
        for (is_spread, expr) in positional {
            self.write_bool(is_spread);
            self.expr_region(expr);
        }
        self.write_u8(named.len() as u8);
        for (name, expr) in named {
            self.write_string_index(name);
            self.expr_region(expr);
        }
    }

    /// Emit an assertion over the local value.
    pub fn assertion(&mut self, description: &str) {
        self.op(Opcode::Assertion);
        self.write_utf8(description);
    }

    /// Emit a delete of a local symbol.
    pub fn delete_local(&mut self, id: &str) {
        self.op(Opcode::Delete);
        self.write_u8(DeleteKind::Local as u8);
        self.write_string_index(id);
    }

    /// Emit a delete of a member of the postfix object.
    pub fn delete_member(&mut self, key: &str) {
        self.op(Opcode::Delete);
        self.write_u8(DeleteKind::Member as u8);
        self.write_string_index(key);
    }

    /// Emit the end-of-statement marker.
    pub fn end_stmt(&mut self) {
        self.op(Opcode::EndOfStmt);
    }

    /// Start a new source file section inside the module.
    pub fn file(&mut self, filename: &str, kind: SourceType) {
        self.op(Opcode::File);
        self.write_u8(kind.to_byte());
        self.write_utf8(filename);
    }

    /// Emit the end-of-file marker.
    pub fn end_file(&mut self) {
        self.op(Opcode::EndOfFile);
    }

    /// Wrap the body in its own stack frame, as the compiler does around
    /// compound sub-expressions.
    pub fn framed(&mut self, body: impl FnOnce(&mut Self)) {
        self.op(Opcode::CreateStackFrame);
        body(self);
        self.op(Opcode::RetractStackFrame);
    }

    /// Emit the end-of-module marker.
    pub fn end_module(&mut self) {
        self.op(Opcode::EndOfModule);
    }

    // -- assembly -----------------------------------------------------------

    /// Assemble the final image: header, constant tables, code, terminator.
    pub fn finish(self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        Self::append_version(&mut bytes, &self.version);
        match &self.bytecode_version {
            Some(version) => {
                bytes.push(1);
                Self::append_version(&mut bytes, version);
            }
            None => bytes.push(0),
        }
        Self::append_utf8(&mut bytes, &self.compiled_at);
        Self::append_utf8(&mut bytes, &self.filename);
        bytes.push(self.source_type.to_byte());

        bytes.push(Opcode::ConstIntTable as u8);
        bytes.extend_from_slice(&(self.const_ints.len() as u16).to_le_bytes());
        for value in &self.const_ints {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.push(Opcode::ConstFloatTable as u8);
        bytes.extend_from_slice(&(self.const_floats.len() as u16).to_le_bytes());
        for value in &self.const_floats {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.push(Opcode::ConstStringTable as u8);
        bytes.extend_from_slice(&(self.const_strings.len() as u16).to_le_bytes());
        for value in &self.const_strings {
            Self::append_utf8(&mut bytes, value);
        }

        bytes.extend_from_slice(&self.code);
        bytes.push(Opcode::EndOfCode as u8);
        bytes
    }

    fn append_utf8(bytes: &mut Vec<u8>, text: &str) {
        bytes.extend_from_slice(&(text.len() as u32).to_le_bytes());
        bytes.extend_from_slice(text.as_bytes());
    }

    fn append_version(bytes: &mut Vec<u8>, version: &HtVersion) {
        bytes.push(version.major);
        bytes.push(version.minor);
        bytes.extend_from_slice(&version.patch.to_le_bytes());
        bytes.push(version.pre.len() as u8);
        for chunk in &version.pre {
            Self::append_utf8(bytes, chunk);
        }
        bytes.push(version.build.len() as u8);
        for chunk in &version.build {
            Self::append_utf8(bytes, chunk);
        }
    }
}

/// Parsed bytecode header, the counterpart of [`BytecodeEmitter::finish`].
#[derive(Debug, Clone)]
pub struct BytecodeHeader {
    /// Compiler version stamp
    pub compiler_version: HtVersion,
    /// Explicit bytecode format version, when stamped
    pub bytecode_version: Option<HtVersion>,
    /// UTC compile timestamp as written by the compiler
    pub compiled_at: String,
    /// Entry filename
    pub filename: String,
    /// Kind of the compiled source
    pub source_type: SourceType,
}

impl BytecodeHeader {
    /// Read and validate a header at the reader's current position.
    ///
    /// Fails with *bytecode* on a magic mismatch and with *version* when the
    /// compiler stamp is incompatible with this interpreter.
    pub fn read(reader: &mut crate::reader::BytecodeReader) -> Result<Self, HtError> {
        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(HtError::bytecode(format!(
                "Invalid bytecode signature [{:#010x}]",
                magic
            )));
        }
        let compiler_version = reader.read_version()?;
        let interpreter = HtVersion::interpreter();
        if !compiler_version.is_compatible_with(&interpreter) {
            return Err(HtError::version(
                &compiler_version.to_string(),
                &interpreter.to_string(),
            ));
        }
        let bytecode_version = if reader.read_bool()? {
            Some(reader.read_version()?)
        } else {
            None
        };
        let compiled_at = reader.read_utf8()?;
        let filename = reader.read_utf8()?;
        let source_byte = reader.read_u8()?;
        let source_type = SourceType::from_byte(source_byte)
            .ok_or_else(|| HtError::bytecode(format!("Unknown source kind [{}]", source_byte)))?;
        Ok(Self {
            compiler_version,
            bytecode_version,
            compiled_at,
            filename,
            source_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::BytecodeReader;

    #[test]
    fn test_header_roundtrip() {
        let emitter = BytecodeEmitter::new("main.ht", SourceType::Script)
            .with_compiled_at("2024-01-01T00:00:00Z");
        let bytes = emitter.finish();
        let mut reader = BytecodeReader::new(bytes);
        let header = BytecodeHeader::read(&mut reader).unwrap();
        assert_eq!(header.filename, "main.ht");
        assert_eq!(header.source_type, SourceType::Script);
        assert_eq!(header.compiled_at, "2024-01-01T00:00:00Z");
        assert_eq!(header.compiler_version, HtVersion::interpreter());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = BytecodeEmitter::new("main.ht", SourceType::Script).finish();
        bytes[0] = 0xFF;
        let mut reader = BytecodeReader::new(bytes);
        let error = BytecodeHeader::read(&mut reader).unwrap_err();
        assert_eq!(error.kind, core_types::ErrorKind::Bytecode);
    }

    #[test]
    fn test_incompatible_version_rejected() {
        let emitter = BytecodeEmitter::new("main.ht", SourceType::Script)
            .with_version(HtVersion::new(9, 0, 0));
        let bytes = emitter.finish();
        let mut reader = BytecodeReader::new(bytes);
        let error = BytecodeHeader::read(&mut reader).unwrap_err();
        assert_eq!(error.kind, core_types::ErrorKind::Version);
    }

    #[test]
    fn test_string_interning_dedups() {
        let mut emitter = BytecodeEmitter::new("main.ht", SourceType::Script);
        let a = emitter.intern_string("x");
        let b = emitter.intern_string("x");
        let c = emitter.intern_string("y");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_expr_region_is_length_prefixed() {
        let mut emitter = BytecodeEmitter::new("main.ht", SourceType::Script);
        emitter.expr_region(|e| e.local_null());
        // u16 length, then Local + Null + EndOfExec
        assert_eq!(emitter.code.len(), 2 + 3);
        assert_eq!(&emitter.code[0..2], &3u16.to_le_bytes());
        assert_eq!(emitter.code[4], Opcode::EndOfExec as u8);
    }

    #[test]
    fn test_tables_precede_code() {
        let mut emitter = BytecodeEmitter::new("main.ht", SourceType::Script);
        emitter.local_int(40);
        emitter.end_module();
        let bytes = emitter.finish();
        let mut reader = BytecodeReader::new(bytes);
        BytecodeHeader::read(&mut reader).unwrap();
        assert_eq!(reader.read_u8().unwrap(), Opcode::ConstIntTable as u8);
        reader.read_const_int_table().unwrap();
        assert_eq!(reader.const_int(0).unwrap(), 40);
    }
}
