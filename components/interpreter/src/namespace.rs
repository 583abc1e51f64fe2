//! Named scopes with symbols, imports, exports and visibility.
//!
//! Namespaces form a chain through their `closure` handle; recursive lookup
//! walks the chain outward. Private symbols (prefix rule) are only visible
//! to lookups whose `from` path starts with the owning namespace's full
//! name. The operations that walk the chain live on [`crate::heap::Heap`],
//! which owns the arena.

use core_types::{ClassId, NamespaceId};
use std::collections::{HashMap, HashSet};

use crate::declaration::Declaration;

/// A recorded, not yet resolved import declaration.
#[derive(Debug, Clone)]
pub struct UnresolvedImport {
    /// Source path; `None` turns the record into an export adjustment
    pub from_path: Option<String>,
    /// Alias namespace the symbols are wrapped into
    pub alias: Option<String>,
    /// Ids to copy; empty means all exported symbols
    pub show_list: Vec<String>,
    /// Whether the imported symbols are re-exported
    pub is_exported: bool,
    /// Whether the path names an already-cached module
    pub is_preloaded: bool,
}

/// A named scope.
#[derive(Debug, Clone, Default)]
pub struct HtNamespace {
    /// Scope id (last path segment)
    pub id: String,
    /// Owning class, for class namespaces
    pub class_id: Option<ClassId>,
    /// Enclosing namespace
    pub closure: Option<NamespaceId>,
    /// Dotted path from the root, used by the privacy rule
    pub full_name: String,
    /// Own declarations
    pub symbols: HashMap<String, Declaration>,
    /// Symbols copied in by resolved imports
    pub imported_symbols: HashMap<String, Declaration>,
    /// Imports recorded during execution, resolved at end of module
    pub imports: Vec<UnresolvedImport>,
    /// Explicitly exported ids
    pub exports: HashSet<String>,
    /// Whether every public symbol is exported
    pub will_export_all: bool,
}

impl HtNamespace {
    /// Whether `id` is exported from this namespace.
    pub fn exports_symbol(&self, id: &str) -> bool {
        if crate::lexicon::is_private(id) {
            return false;
        }
        if self.will_export_all && self.exports.is_empty() {
            return true;
        }
        self.exports.contains(id)
    }

    /// Record an export adjustment: an empty list exports everything.
    pub fn declare_export(&mut self, ids: &[String]) {
        if ids.is_empty() {
            self.will_export_all = true;
        } else {
            for id in ids {
                self.exports.insert(id.clone());
            }
        }
    }

    /// Record an import for deferred resolution.
    pub fn declare_import(&mut self, import: UnresolvedImport) {
        self.imports.push(import);
    }
}
