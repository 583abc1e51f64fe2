//! Function objects: script bodies, external bindings, constructors.

use bytecode_system::FunctionCategory;
use core_types::{ClassId, FunctionType, HtType, NamespaceId, ParameterType, Value};

/// One declared parameter.
#[derive(Debug, Clone)]
pub struct HtParameter {
    /// Parameter name
    pub id: String,
    /// Declared type
    pub declared_type: Option<HtType>,
    /// Start of the default value region, when one was compiled
    pub default_ip: Option<usize>,
    /// May be omitted
    pub is_optional: bool,
    /// Collects trailing positional arguments
    pub is_variadic: bool,
    /// Passed by name
    pub is_named: bool,
}

/// A redirecting constructor record: the target constructor is invoked with
/// the recorded argument regions before the body runs.
#[derive(Debug, Clone)]
pub struct RedirectingConstructor {
    /// `super` or a sibling constructor's class name
    pub callee: String,
    /// Named constructor key on the callee
    pub key: Option<String>,
    /// Start ips of the positional argument regions
    pub positional_ips: Vec<usize>,
    /// Named argument regions
    pub named_ips: Vec<(String, usize)>,
}

/// A function value.
#[derive(Debug, Clone)]
pub struct HtFunction {
    /// Internal (mangled) name
    pub internal_name: String,
    /// Public id, when bound to one
    pub id: Option<String>,
    /// Owning class for methods and constructors
    pub class_id: Option<ClassId>,
    /// Captured closure namespace
    pub closure: Option<NamespaceId>,
    /// Module the body and default regions live in
    pub module: Option<String>,
    /// Category (normal, constructor, getter, setter, literal)
    pub category: FunctionCategory,
    /// Wraps its result in a future
    pub is_async: bool,
    /// Stored per-instance instead of on the class
    pub is_field: bool,
    /// Dispatches through the external registry
    pub is_external: bool,
    /// Static class member
    pub is_static: bool,
    /// Constant function
    pub is_const: bool,
    /// Declared without a body
    pub is_abstract: bool,
    /// Typedef id used to re-wrap the function as a host callable
    pub external_type_id: Option<String>,
    /// Parameters in declaration order
    pub params: Vec<HtParameter>,
    /// Declared return type
    pub declared_return_type: Option<HtType>,
    /// Start of the body region
    pub definition_ip: Option<usize>,
    /// Source line of the definition
    pub definition_line: u32,
    /// Source column of the definition
    pub definition_column: u32,
    /// Redirecting constructor record
    pub redirecting: Option<RedirectingConstructor>,
    /// Receiver bound by member access
    pub bound_receiver: Option<Value>,
}

impl HtFunction {
    /// Name used in stack traces and error messages.
    pub fn display_name(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.internal_name)
    }

    /// Number of required positional parameters.
    pub fn min_arity(&self) -> usize {
        self.params
            .iter()
            .filter(|p| !p.is_optional && !p.is_variadic && !p.is_named)
            .count()
    }

    /// The function type built from the declared signature.
    pub fn value_type(&self) -> HtType {
        let parameter_types = self
            .params
            .iter()
            .map(|p| ParameterType {
                id: p.is_named.then(|| p.id.clone()),
                declared: p
                    .declared_type
                    .clone()
                    .unwrap_or_else(HtType::any),
                is_optional: p.is_optional,
                is_variadic: p.is_variadic,
            })
            .collect();
        HtType::Function(Box::new(FunctionType {
            parameter_types,
            return_type: self
                .declared_return_type
                .clone()
                .unwrap_or_else(HtType::any),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_function() -> HtFunction {
        HtFunction {
            internal_name: "add".to_string(),
            id: Some("add".to_string()),
            class_id: None,
            closure: None,
            module: None,
            category: FunctionCategory::Normal,
            is_async: false,
            is_field: false,
            is_external: false,
            is_static: false,
            is_const: false,
            is_abstract: false,
            external_type_id: None,
            params: vec![
                HtParameter {
                    id: "a".to_string(),
                    declared_type: Some(HtType::nominal("int")),
                    default_ip: None,
                    is_optional: false,
                    is_variadic: false,
                    is_named: false,
                },
                HtParameter {
                    id: "rest".to_string(),
                    declared_type: None,
                    default_ip: None,
                    is_optional: false,
                    is_variadic: true,
                    is_named: false,
                },
            ],
            declared_return_type: Some(HtType::nominal("int")),
            definition_ip: None,
            definition_line: 0,
            definition_column: 0,
            redirecting: None,
            bound_receiver: None,
        }
    }

    #[test]
    fn test_min_arity_skips_optional_and_variadic() {
        let function = sample_function();
        assert_eq!(function.min_arity(), 1);
    }

    #[test]
    fn test_value_type_shape() {
        let function = sample_function();
        assert_eq!(function.value_type().to_string(), "(int, ...any) -> int");
    }
}
