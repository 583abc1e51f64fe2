//! Host interop: external functions, methods, classes, typedefs, reflection.
//!
//! Binding ids follow the naming convention: top-level `name`, static
//! member or constructor `Class.name`, instance method `Class::name`.

use core_types::{FunctionId, HtError, Value};
use std::collections::HashMap;
use std::rc::Rc;

use crate::vm::Vm;

/// Arguments passed to an external function.
#[derive(Debug, Clone, Default)]
pub struct ExternalArguments {
    /// Bound receiver for instance methods
    pub receiver: Option<Value>,
    /// Positional arguments, spreads already flattened
    pub positional: Vec<Value>,
    /// Named arguments in call order
    pub named: Vec<(String, Value)>,
}

impl ExternalArguments {
    /// The n-th positional argument, or null.
    pub fn positional_or_null(&self, index: usize) -> Value {
        self.positional.get(index).cloned().unwrap_or(Value::Null)
    }

    /// A named argument by id.
    pub fn named_arg(&self, id: &str) -> Option<&Value> {
        self.named
            .iter()
            .find(|(name, _)| name == id)
            .map(|(_, value)| value)
    }
}

/// A host function callable from script code.
pub type ExternalFunction = Rc<dyn Fn(&mut Vm, ExternalArguments) -> Result<Value, HtError>>;

/// Re-wraps a script function as a host callable, keyed by typedef id.
pub type ExternalFunctionTypedef = Rc<dyn Fn(&mut Vm, FunctionId) -> Result<Value, HtError>>;

/// Derives a bound type id from an opaque host value, or passes.
pub type ExternalReflection = Rc<dyn Fn(&Value) -> Option<String>>;

/// A host class exposed to script code.
///
/// Statics and constructors resolve through [`ExternalClass::member_get`];
/// member access on encapsulated host values of this type id resolves
/// through the instance hooks.
pub trait ExternalClass {
    /// The type id the class is bound under.
    fn type_id(&self) -> &str;

    /// Read a static member or constructor.
    fn member_get(&self, id: &str) -> Result<Value, HtError> {
        Err(HtError::undefined_external(&format!(
            "{}.{}",
            self.type_id(),
            id
        )))
    }

    /// Read an instance member of an encapsulated host value.
    fn instance_member_get(&self, _object: &Value, id: &str) -> Result<Value, HtError> {
        Err(HtError::undefined_external(&format!(
            "{}::{}",
            self.type_id(),
            id
        )))
    }

    /// Write an instance member of an encapsulated host value.
    fn instance_member_set(
        &self,
        _object: &Value,
        id: &str,
        _value: Value,
    ) -> Result<(), HtError> {
        Err(HtError::undefined_external(&format!(
            "{}::{}",
            self.type_id(),
            id
        )))
    }
}

/// Marker stored as an extern object for a declared external class.
#[derive(Debug, Clone)]
pub struct ExternalClassRef {
    /// The bound class id
    pub id: String,
}

/// An instance method picked off an encapsulated value, with its receiver.
#[derive(Debug, Clone)]
pub struct BoundExternalMethod {
    /// Full binding id, e.g. `List::add`
    pub id: String,
    /// The receiver the method was read from
    pub receiver: Value,
}

/// Registries of everything the host has bound into the interpreter.
#[derive(Default)]
pub struct ExternalBindings {
    functions: HashMap<String, ExternalFunction>,
    classes: HashMap<String, Rc<dyn ExternalClass>>,
    function_typedefs: HashMap<String, ExternalFunctionTypedef>,
    reflections: Vec<ExternalReflection>,
}

impl std::fmt::Debug for ExternalBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalBindings")
            .field("functions", &self.functions.len())
            .field("classes", &self.classes.len())
            .field("function_typedefs", &self.function_typedefs.len())
            .field("reflections", &self.reflections.len())
            .finish()
    }
}

impl ExternalBindings {
    /// Create empty registries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a function (or method, using the id convention).
    pub fn bind_function(&mut self, id: &str, function: ExternalFunction) {
        self.functions.insert(id.to_string(), function);
    }

    /// Look up a function by full id.
    pub fn function(&self, id: &str) -> Result<ExternalFunction, HtError> {
        self.functions
            .get(id)
            .cloned()
            .ok_or_else(|| HtError::undefined_external(id))
    }

    /// Whether a function id is bound.
    pub fn has_function(&self, id: &str) -> bool {
        self.functions.contains_key(id)
    }

    /// Bind a class handle.
    pub fn bind_class(&mut self, class: Rc<dyn ExternalClass>) {
        self.classes.insert(class.type_id().to_string(), class);
    }

    /// Look up a class handle by type id.
    pub fn class(&self, id: &str) -> Result<Rc<dyn ExternalClass>, HtError> {
        self.classes
            .get(id)
            .cloned()
            .ok_or_else(|| HtError::undefined_external(id))
    }

    /// Whether a class id is bound.
    pub fn has_class(&self, id: &str) -> bool {
        self.classes.contains_key(id)
    }

    /// Bind a function typedef wrapper.
    pub fn bind_function_typedef(&mut self, id: &str, wrapper: ExternalFunctionTypedef) {
        self.function_typedefs.insert(id.to_string(), wrapper);
    }

    /// Look up a function typedef wrapper.
    pub fn function_typedef(&self, id: &str) -> Result<ExternalFunctionTypedef, HtError> {
        self.function_typedefs
            .get(id)
            .cloned()
            .ok_or_else(|| HtError::undefined_external(id))
    }

    /// Register a reflection hook, consulted in registration order.
    pub fn bind_reflection(&mut self, reflection: ExternalReflection) {
        self.reflections.push(reflection);
    }

    /// Derive a type id for an opaque host value through the hooks.
    pub fn reflect(&self, value: &Value) -> Option<String> {
        self.reflections.iter().find_map(|hook| hook(value))
    }
}
