//! Named declarations stored in namespaces.

use core_types::{HtType, NamespaceId, Value};

use crate::lexicon;

/// What kind of entity a declaration names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// A mutable or immutable variable
    Variable,
    /// A compile-time constant from the module pools
    Constant,
    /// A function
    Function,
    /// A class
    Class,
    /// A named struct template
    StructTemplate,
    /// A type alias
    TypeAlias,
    /// A bound parameter inside a call namespace
    Parameter,
    /// An external class handle
    ExternalClass,
    /// An external enum handle
    ExternalEnum,
    /// A symbol copied in by an import
    Import,
    /// A nested namespace
    Namespace,
}

/// Deferred initializer of a late-initialized variable.
///
/// The first read of the variable executes the recorded bytecode region in
/// the recorded namespace.
#[derive(Debug, Clone)]
pub struct LateInit {
    /// Module the initializer bytes live in
    pub module: String,
    /// Start of the initializer region
    pub ip: usize,
    /// Source line of the initializer
    pub line: u32,
    /// Source column of the initializer
    pub column: u32,
    /// Namespace the initializer runs in
    pub namespace: NamespaceId,
}

/// One named entry of a namespace.
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Symbol id
    pub id: String,
    /// Entity kind
    pub kind: DeclKind,
    /// Current value
    pub value: Value,
    /// Declared type, when one was written
    pub declared_type: Option<HtType>,
    /// Whether assignment is allowed
    pub is_mutable: bool,
    /// Whether the value resolves through the external registry
    pub is_external: bool,
    /// Whether this is a static class member
    pub is_static: bool,
    /// Whether this declares a per-instance field of a class
    pub is_field: bool,
    /// Privacy cache; the prefix rule on `id` is authoritative
    pub is_private: bool,
    /// Deferred initializer record, cleared after first resolution
    pub late_init: Option<LateInit>,
    /// Documentation comment carried from source
    pub documentation: Option<String>,
}

impl Declaration {
    /// A mutable or immutable variable declaration.
    pub fn variable(id: &str, value: Value, is_mutable: bool) -> Self {
        Self::new(id, DeclKind::Variable, value, is_mutable)
    }

    /// An immutable declaration of the given kind.
    pub fn immutable(id: &str, kind: DeclKind, value: Value) -> Self {
        Self::new(id, kind, value, false)
    }

    fn new(id: &str, kind: DeclKind, value: Value, is_mutable: bool) -> Self {
        Self {
            id: id.to_string(),
            kind,
            value,
            declared_type: None,
            is_mutable,
            is_external: false,
            is_static: false,
            is_field: false,
            is_private: lexicon::is_private(id),
            late_init: None,
            documentation: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_cache_follows_prefix() {
        let hidden = Declaration::variable("_x", Value::Null, true);
        let shown = Declaration::variable("x", Value::Null, true);
        assert!(hidden.is_private);
        assert!(!shown.is_private);
    }
}
