//! Interpreter configuration.

use serde::{Deserialize, Serialize};

/// Tunable policies of one interpreter instance.
///
/// Every implicit coercion of the language is a single flag here, enforced
/// at the opcodes it affects.
///
/// # Examples
///
/// ```
/// use interpreter::InterpreterConfig;
///
/// let config = InterpreterConfig::default();
/// assert!(config.allow_implicit_null_to_zero_conversion);
/// assert!(!config.allow_implicit_variable_declaration);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterpreterConfig {
    /// Assigning to an undefined identifier declares it instead of failing
    pub allow_implicit_variable_declaration: bool,
    /// `null` counts as `0` in arithmetic and comparisons
    pub allow_implicit_null_to_zero_conversion: bool,
    /// Empty values (`0`, `''`, `'false'`, empty collections) are falsy
    pub allow_implicit_empty_value_to_false_conversion: bool,
    /// A variable declaration's initializer also becomes the statement value
    pub allow_initialization_expression_result: bool,
    /// Unresolved external bindings fail at call time instead of load time
    pub resolve_external_functions_dynamically: bool,
    /// Maximum number of stack trace frames rendered on errors
    pub stack_trace_display_count: usize,
    /// Render errors through the console instead of returning them raw
    pub process_error: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            allow_implicit_variable_declaration: false,
            allow_implicit_null_to_zero_conversion: true,
            allow_implicit_empty_value_to_false_conversion: true,
            allow_initialization_expression_result: false,
            resolve_external_functions_dynamically: true,
            stack_trace_display_count: 10,
            process_error: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serde_roundtrip() {
        let config = InterpreterConfig {
            allow_implicit_variable_declaration: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let restored: InterpreterConfig = serde_json::from_str(&json).unwrap();
        assert!(restored.allow_implicit_variable_declaration);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let restored: InterpreterConfig =
            serde_json::from_str("{\"processError\": true}").unwrap();
        assert!(restored.process_error);
        assert!(restored.allow_implicit_null_to_zero_conversion);
    }
}
