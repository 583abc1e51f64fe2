//! Arena storage for interpreter-owned objects.
//!
//! Structs, instances, classes, functions and namespaces reference each
//! other freely (closures, prototypes, receivers). Storing them in per-kind
//! arenas addressed by integer handles keeps those links cycle-free and
//! cheap to copy.

use core_types::{ClassId, FunctionId, HtError, InstanceId, NamespaceId, StructId, Value};

use crate::class::{HtClass, HtInstance, InstanceFrame};
use crate::declaration::Declaration;
use crate::function::HtFunction;
use crate::hstruct::HtStruct;
use crate::lexicon;
use crate::namespace::HtNamespace;

/// The object arenas of one interpreter instance.
#[derive(Debug, Default)]
pub struct Heap {
    structs: Vec<HtStruct>,
    instances: Vec<HtInstance>,
    classes: Vec<HtClass>,
    functions: Vec<HtFunction>,
    namespaces: Vec<HtNamespace>,
    anonymous_counter: usize,
}

impl Heap {
    /// Create empty arenas.
    pub fn new() -> Self {
        Self::default()
    }

    // -- namespaces ---------------------------------------------------------

    /// Allocate a namespace enclosed by `closure`.
    pub fn alloc_namespace(
        &mut self,
        id: &str,
        closure: Option<NamespaceId>,
        class_id: Option<ClassId>,
    ) -> NamespaceId {
        let full_name = match closure {
            Some(outer) => {
                let outer_name = &self.namespace(outer).full_name;
                if outer_name.is_empty() {
                    id.to_string()
                } else {
                    format!("{}.{}", outer_name, id)
                }
            }
            None => id.to_string(),
        };
        self.namespaces.push(HtNamespace {
            id: id.to_string(),
            class_id,
            closure,
            full_name,
            ..Default::default()
        });
        NamespaceId(self.namespaces.len() - 1)
    }

    /// Shared view of a namespace.
    pub fn namespace(&self, id: NamespaceId) -> &HtNamespace {
        &self.namespaces[id.0]
    }

    /// Mutable view of a namespace.
    pub fn namespace_mut(&mut self, id: NamespaceId) -> &mut HtNamespace {
        &mut self.namespaces[id.0]
    }

    /// Define a declaration in a namespace.
    ///
    /// Fails with *defined* when the id exists and `allow_override` is off.
    pub fn ns_define(
        &mut self,
        ns: NamespaceId,
        decl: Declaration,
        allow_override: bool,
    ) -> Result<(), HtError> {
        let namespace = self.namespace_mut(ns);
        if !allow_override && namespace.symbols.contains_key(&decl.id) {
            return Err(HtError::defined(&decl.id));
        }
        namespace.symbols.insert(decl.id.clone(), decl);
        Ok(())
    }

    /// Remove a declaration from a namespace.
    pub fn ns_delete(&mut self, ns: NamespaceId, id: &str) -> bool {
        self.namespace_mut(ns).symbols.remove(id).is_some()
    }

    /// Look up a declaration, optionally walking enclosing closures.
    ///
    /// `from` is the full name of the accessing scope; it gates private
    /// symbols under the prefix rule.
    pub fn ns_lookup(
        &self,
        ns: NamespaceId,
        id: &str,
        from: Option<&str>,
        recursive: bool,
    ) -> Result<Option<Declaration>, HtError> {
        let mut current = Some(ns);
        while let Some(here) = current {
            let namespace = self.namespace(here);
            let found = namespace
                .symbols
                .get(id)
                .or_else(|| namespace.imported_symbols.get(id));
            if let Some(decl) = found {
                if lexicon::is_private(id) {
                    if let Some(from) = from {
                        if !from.starts_with(&namespace.full_name) {
                            return Err(HtError::private_member(id));
                        }
                    }
                }
                return Ok(Some(decl.clone()));
            }
            if !recursive {
                break;
            }
            current = namespace.closure;
        }
        Ok(None)
    }

    /// Like [`Heap::ns_lookup`], but also reports the namespace the
    /// declaration lives in, for write-backs after late initialization.
    pub fn ns_lookup_with_home(
        &self,
        ns: NamespaceId,
        id: &str,
        from: Option<&str>,
        recursive: bool,
    ) -> Result<Option<(Declaration, NamespaceId)>, HtError> {
        let mut current = Some(ns);
        while let Some(here) = current {
            let namespace = self.namespace(here);
            let found = namespace
                .symbols
                .get(id)
                .or_else(|| namespace.imported_symbols.get(id));
            if let Some(decl) = found {
                if lexicon::is_private(id) {
                    if let Some(from) = from {
                        if !from.starts_with(&namespace.full_name) {
                            return Err(HtError::private_member(id));
                        }
                    }
                }
                return Ok(Some((decl.clone(), here)));
            }
            if !recursive {
                break;
            }
            current = namespace.closure;
        }
        Ok(None)
    }

    /// Write a value through the namespace chain.
    ///
    /// Returns `true` when an existing declaration was assigned. When the id
    /// is absent everywhere, defines it in `ns` if `define_if_absent`, else
    /// returns `false`.
    pub fn ns_assign(
        &mut self,
        ns: NamespaceId,
        id: &str,
        value: Value,
        from: Option<&str>,
        recursive: bool,
        define_if_absent: bool,
    ) -> Result<bool, HtError> {
        let mut current = Some(ns);
        while let Some(here) = current {
            let namespace = self.namespace(here);
            if namespace.symbols.contains_key(id) {
                if lexicon::is_private(id) {
                    if let Some(from) = from {
                        if !from.starts_with(&namespace.full_name) {
                            return Err(HtError::private_member(id));
                        }
                    }
                }
                if let Some(decl) = self.namespace_mut(here).symbols.get_mut(id) {
                    if !decl.is_mutable && decl.late_init.is_none() {
                        return Err(HtError::new(
                            core_types::ErrorKind::Defined,
                            format!("[{}] is immutable and cannot be assigned", id),
                        ));
                    }
                    decl.value = value;
                    decl.late_init = None;
                }
                return Ok(true);
            }
            if !recursive {
                break;
            }
            current = namespace.closure;
        }
        if define_if_absent {
            self.ns_define(ns, Declaration::variable(id, value, true), false)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Copy `src`'s exported symbols into `dst`.
    ///
    /// A non-empty `show` list filters the copied ids; missing listed ids
    /// fail with *undefined*.
    pub fn ns_import(
        &mut self,
        dst: NamespaceId,
        src: NamespaceId,
        show: &[String],
        is_exported: bool,
    ) -> Result<(), HtError> {
        let source = self.namespace(src);
        let mut copied: Vec<Declaration> = Vec::new();
        if show.is_empty() {
            for (id, decl) in &source.symbols {
                if source.exports_symbol(id) {
                    copied.push(decl.clone());
                }
            }
            for (id, decl) in &source.imported_symbols {
                if source.exports_symbol(id) {
                    copied.push(decl.clone());
                }
            }
        } else {
            for id in show {
                let found = source
                    .symbols
                    .get(id)
                    .or_else(|| source.imported_symbols.get(id));
                match found {
                    Some(decl) if source.exports_symbol(id) => copied.push(decl.clone()),
                    _ => return Err(HtError::undefined(id)),
                }
            }
        }
        let destination = self.namespace_mut(dst);
        for decl in copied {
            let id = decl.id.clone();
            destination.imported_symbols.insert(id.clone(), decl);
            if is_exported {
                destination.exports.insert(id);
            }
        }
        Ok(())
    }

    // -- structs ------------------------------------------------------------

    /// Allocate a struct; anonymous literals get a synthesized id.
    pub fn alloc_struct(
        &mut self,
        id: Option<&str>,
        prototype: Option<StructId>,
        namespace: NamespaceId,
    ) -> StructId {
        let id = match id {
            Some(id) => id.to_string(),
            None => {
                self.anonymous_counter += 1;
                format!("{}struct{}", lexicon::INTERNAL_PREFIX, self.anonymous_counter)
            }
        };
        self.structs.push(HtStruct {
            id,
            prototype,
            keys: Vec::new(),
            fields: Default::default(),
            namespace,
        });
        StructId(self.structs.len() - 1)
    }

    /// Shared view of a struct.
    pub fn hstruct(&self, id: StructId) -> &HtStruct {
        &self.structs[id.0]
    }

    /// Mutable view of a struct.
    pub fn hstruct_mut(&mut self, id: StructId) -> &mut HtStruct {
        &mut self.structs[id.0]
    }

    // -- classes and instances ----------------------------------------------

    /// Allocate a class.
    pub fn alloc_class(&mut self, class: HtClass) -> ClassId {
        self.classes.push(class);
        ClassId(self.classes.len() - 1)
    }

    /// Shared view of a class.
    pub fn class(&self, id: ClassId) -> &HtClass {
        &self.classes[id.0]
    }

    /// Mutable view of a class.
    pub fn class_mut(&mut self, id: ClassId) -> &mut HtClass {
        &mut self.classes[id.0]
    }

    /// The inheritance chain of a class, most derived first.
    pub fn class_chain(&self, id: ClassId) -> Vec<ClassId> {
        let mut chain = vec![id];
        let mut current = self.class(id).super_class;
        while let Some(ancestor) = current {
            chain.push(ancestor);
            current = self.class(ancestor).super_class;
        }
        chain
    }

    /// Whether `class_id` is `ancestor` or derives from it.
    pub fn class_extends(&self, class_id: ClassId, ancestor: ClassId) -> bool {
        self.class_chain(class_id).contains(&ancestor)
    }

    /// Allocate an instance with one field frame per ancestor class.
    pub fn alloc_instance(&mut self, class_id: ClassId) -> InstanceId {
        let frames = self
            .class_chain(class_id)
            .into_iter()
            .map(|class_id| InstanceFrame {
                class_id,
                fields: Default::default(),
            })
            .collect();
        self.instances.push(HtInstance { class_id, frames });
        InstanceId(self.instances.len() - 1)
    }

    /// Shared view of an instance.
    pub fn instance(&self, id: InstanceId) -> &HtInstance {
        &self.instances[id.0]
    }

    /// Mutable view of an instance.
    pub fn instance_mut(&mut self, id: InstanceId) -> &mut HtInstance {
        &mut self.instances[id.0]
    }

    // -- functions ----------------------------------------------------------

    /// Allocate a function.
    pub fn alloc_function(&mut self, function: HtFunction) -> FunctionId {
        self.functions.push(function);
        FunctionId(self.functions.len() - 1)
    }

    /// Shared view of a function.
    pub fn function(&self, id: FunctionId) -> &HtFunction {
        &self.functions[id.0]
    }

    /// Mutable view of a function.
    pub fn function_mut(&mut self, id: FunctionId) -> &mut HtFunction {
        &mut self.functions[id.0]
    }

    /// Clone a function with its receiver bound, as member access does.
    pub fn bind_function(&mut self, id: FunctionId, receiver: Value) -> FunctionId {
        let mut bound = self.function(id).clone();
        bound.bound_receiver = Some(receiver);
        self.alloc_function(bound)
    }
}
