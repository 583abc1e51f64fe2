//! Loaded modules, the resource context, and the compiler contract.

use bytecode_system::BytecodeReader;
use core_types::{HtError, HtVersion, NamespaceId, SourceType, Value};
use std::collections::HashMap;

/// One loaded bytecode module.
///
/// The reader holds the raw bytes and constant pools; executions clone it
/// into private cursors. Namespaces are recorded per file in load order so
/// import resolution can address them by path and find the entry namespace.
#[derive(Debug, Clone)]
pub struct ByteModule {
    /// Module id (the key in the cache)
    pub id: String,
    /// Byte buffer with constant pools, shared by all cursors
    pub reader: BytecodeReader,
    /// Compiler version stamped into the image
    pub compiler_version: HtVersion,
    /// Explicit bytecode format version, when stamped
    pub bytecode_version: Option<HtVersion>,
    /// UTC compile timestamp as written by the compiler
    pub compiled_at: String,
    /// Kind of the compiled source
    pub source_type: SourceType,
    /// Per-file namespaces
    pub namespaces: HashMap<String, NamespaceId>,
    /// File keys in load order; the last one is the entry namespace
    pub namespace_order: Vec<String>,
    /// Decoded JSON resources bound by imports
    pub json_sources: HashMap<String, Value>,
}

impl ByteModule {
    /// The entry (last loaded) namespace of the module.
    pub fn entry_namespace(&self) -> Option<NamespaceId> {
        self.namespace_order
            .last()
            .and_then(|key| self.namespaces.get(key))
            .copied()
    }
}

/// One source mapped by the resource context.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Kind of the source
    pub kind: SourceType,
    /// Text content (script source or JSON)
    pub content: String,
}

/// Maps module keys to source text.
///
/// The interpreter consults the context for dynamic `require`, `evalFile`
/// and JSON resource imports. File-system and archive-backed contexts live
/// with the host; the in-memory implementation below serves embedding and
/// tests.
pub trait ResourceContext {
    /// Resolve a key to a source, failing with *resourceNotFound*.
    fn resolve(&self, key: &str) -> Result<SourceFile, HtError>;
}

/// In-memory resource context.
///
/// # Examples
///
/// ```
/// use interpreter::{MemoryResourceContext, ResourceContext};
/// use core_types::SourceType;
///
/// let mut context = MemoryResourceContext::new();
/// context.add("a.ht", SourceType::Module, "var x = 1");
/// assert!(context.resolve("a.ht").is_ok());
/// assert!(context.resolve("b.ht").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryResourceContext {
    files: HashMap<String, SourceFile>,
}

impl MemoryResourceContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under a key.
    pub fn add(&mut self, key: &str, kind: SourceType, content: &str) {
        self.files.insert(
            key.to_string(),
            SourceFile {
                kind,
                content: content.to_string(),
            },
        );
    }
}

impl ResourceContext for MemoryResourceContext {
    fn resolve(&self, key: &str) -> Result<SourceFile, HtError> {
        self.files
            .get(key)
            .cloned()
            .ok_or_else(|| HtError::resource_not_found(key))
    }
}

/// The compiler contract: source text in, loadable bytecode out.
///
/// The compiler itself (lexer, parser, analyzer, code generator) is an
/// external collaborator; `eval` and dynamic `require` drive it through
/// this trait when one is installed.
pub trait SourceCompiler {
    /// Compile one source into a bytecode image.
    fn compile(
        &mut self,
        source: &str,
        key: &str,
        source_type: SourceType,
    ) -> Result<Vec<u8>, HtError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::ErrorKind;

    #[test]
    fn test_memory_context_miss() {
        let context = MemoryResourceContext::new();
        let error = context.resolve("missing.ht").unwrap_err();
        assert_eq!(error.kind, ErrorKind::ResourceNotFound);
    }

    #[test]
    fn test_entry_namespace_is_last() {
        let module = ByteModule {
            id: "m".to_string(),
            reader: BytecodeReader::new(Vec::new()),
            compiler_version: HtVersion::interpreter(),
            bytecode_version: None,
            compiled_at: String::new(),
            source_type: SourceType::Module,
            namespaces: [
                ("a.ht".to_string(), NamespaceId(1)),
                ("b.ht".to_string(), NamespaceId(2)),
            ]
            .into_iter()
            .collect(),
            namespace_order: vec!["a.ht".to_string(), "b.ht".to_string()],
            json_sources: HashMap::new(),
        };
        assert_eq!(module.entry_namespace(), Some(NamespaceId(2)));
    }
}
