//! Fixed identifiers and prefixes of the language runtime.

/// Prefix marking a symbol as private to its namespace.
pub const PRIVATE_PREFIX: &str = "_";

/// Prefix marking a struct key as internal (skipped by clone, keys, spread).
pub const INTERNAL_PREFIX: &str = "$";

/// Member key that reads or replaces a struct's prototype.
pub const PROTOTYPE: &str = "prototype";

/// Internal name of a default constructor.
pub const CONSTRUCTOR: &str = "$construct";

/// Prefix of getter entries: a member read of `x` probes `get$x`.
pub const GETTER_PREFIX: &str = "get$";

/// Prefix of setter entries: a member write of `x` probes `set$x`.
pub const SETTER_PREFIX: &str = "set$";

/// The receiver keyword.
pub const THIS: &str = "this";

/// The super-constructor callee keyword.
pub const SUPER: &str = "super";

/// The global namespace id.
pub const GLOBAL: &str = "global";

/// Path prefix marking an import source as an already-cached module.
pub const MODULE_PREFIX: &str = "module:";

/// File extensions treated as script sources by the import resolver.
pub const SOURCE_EXTENSIONS: [&str; 2] = [".ht", ".hts"];

/// Name of the version constant installed by `init`.
pub const VERSION_CONSTANT: &str = "kHetuVersion";

/// Whether an identifier is private under the prefix rule.
///
/// The prefix check is authoritative; declaration flags only cache it.
pub fn is_private(id: &str) -> bool {
    id.starts_with(PRIVATE_PREFIX)
}

/// Whether a struct key is internal under the prefix rule.
pub fn is_internal(id: &str) -> bool {
    id.starts_with(INTERNAL_PREFIX)
}

/// Whether an import path names a script source (rather than JSON).
pub fn is_script_path(path: &str) -> bool {
    SOURCE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
