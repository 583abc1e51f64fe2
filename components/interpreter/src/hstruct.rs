//! Dynamic prototype objects.
//!
//! A struct is an ordered mapping with an optional prototype forming a
//! delegation chain. Member reads probe own fields, then getters, then the
//! prototype, threading the original receiver through so inherited
//! functions still bind `this` to the receiver. Keys starting with the
//! internal prefix are invisible to clone, spread, keys and length.

use core_types::{FunctionId, NamespaceId, StructId, Value};
use std::collections::HashMap;

use crate::heap::Heap;
use crate::lexicon;

/// A dynamic prototype object.
#[derive(Debug, Clone, Default)]
pub struct HtStruct {
    /// Struct id; anonymous literals get a synthesized one
    pub id: String,
    /// Parent in the delegation chain
    pub prototype: Option<StructId>,
    /// Field keys in insertion order
    pub keys: Vec<String>,
    /// Field values
    pub fields: HashMap<String, Value>,
    /// Namespace the struct's functions close over
    pub namespace: NamespaceId,
}

/// Result of probing one struct (and optionally its chain) for a member.
#[derive(Debug, Clone)]
pub enum StructProbe {
    /// A plain field value
    Field(Value),
    /// A getter entry that must be invoked with the receiver
    Getter(FunctionId),
    /// Nothing found
    NotFound,
}

impl Heap {
    /// Write an own field, keeping insertion order on first write.
    pub fn struct_set_field(&mut self, sid: StructId, key: &str, value: Value) {
        let hstruct = self.hstruct_mut(sid);
        if !hstruct.fields.contains_key(key) {
            hstruct.keys.push(key.to_string());
        }
        hstruct.fields.insert(key.to_string(), value);
    }

    /// Remove an own field.
    pub fn struct_delete_field(&mut self, sid: StructId, key: &str) -> bool {
        let hstruct = self.hstruct_mut(sid);
        if hstruct.fields.remove(key).is_some() {
            hstruct.keys.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Probe for a member along the prototype chain.
    ///
    /// Own field wins over an own getter; the prototype is only consulted
    /// when this level has neither.
    pub fn struct_probe(&self, sid: StructId, key: &str) -> StructProbe {
        let mut current = Some(sid);
        let getter_key = format!("{}{}", lexicon::GETTER_PREFIX, key);
        while let Some(here) = current {
            let hstruct = self.hstruct(here);
            if let Some(value) = hstruct.fields.get(key) {
                return StructProbe::Field(value.clone());
            }
            if let Some(Value::Function(getter)) = hstruct.fields.get(&getter_key) {
                return StructProbe::Getter(*getter);
            }
            current = hstruct.prototype;
        }
        StructProbe::NotFound
    }

    /// Probe for a setter entry along the prototype chain.
    pub fn struct_probe_setter(&self, sid: StructId, key: &str) -> Option<FunctionId> {
        let setter_key = format!("{}{}", lexicon::SETTER_PREFIX, key);
        let mut current = Some(sid);
        while let Some(here) = current {
            if let Some(Value::Function(setter)) = self.hstruct(here).fields.get(&setter_key) {
                return Some(*setter);
            }
            current = self.hstruct(here).prototype;
        }
        None
    }

    /// Whether `key` resolves anywhere along the chain.
    pub fn struct_contains(&self, sid: StructId, key: &str) -> bool {
        !matches!(self.struct_probe(sid, key), StructProbe::NotFound)
    }

    /// Deep copy, skipping internal keys unless `with_internals`.
    ///
    /// Nested structs are cloned recursively; other values are shared the
    /// way ordinary assignment shares them.
    pub fn struct_clone(&mut self, sid: StructId, with_internals: bool) -> StructId {
        let source = self.hstruct(sid);
        let prototype = source.prototype;
        let namespace = source.namespace;
        let entries: Vec<(String, Value)> = source
            .keys
            .iter()
            .filter(|key| with_internals || !lexicon::is_internal(key))
            .map(|key| (key.clone(), source.fields[key].clone()))
            .collect();
        let clone = self.alloc_struct(None, prototype, namespace);
        for (key, value) in entries {
            let value = match value {
                Value::Struct(nested) => Value::Struct(self.struct_clone(nested, with_internals)),
                other => other,
            };
            self.struct_set_field(clone, &key, value);
        }
        clone
    }

    /// Copy every non-internal own key of `src` into `dst`, overwriting.
    pub fn struct_assign(&mut self, dst: StructId, src: StructId) {
        let entries: Vec<(String, Value)> = {
            let source = self.hstruct(src);
            source
                .keys
                .iter()
                .filter(|key| !lexicon::is_internal(key))
                .map(|key| (key.clone(), source.fields[key].clone()))
                .collect()
        };
        for (key, value) in entries {
            self.struct_set_field(dst, &key, value);
        }
    }

    /// Copy the non-internal own keys of `src` that are absent in `dst`.
    pub fn struct_merge(&mut self, dst: StructId, src: StructId) {
        let entries: Vec<(String, Value)> = {
            let source = self.hstruct(src);
            source
                .keys
                .iter()
                .filter(|key| !lexicon::is_internal(key))
                .map(|key| (key.clone(), source.fields[key].clone()))
                .collect()
        };
        for (key, value) in entries {
            if !self.hstruct(dst).fields.contains_key(&key) {
                self.struct_set_field(dst, &key, value);
            }
        }
    }

    /// Non-internal own keys, in insertion order.
    pub fn struct_keys(&self, sid: StructId) -> Vec<String> {
        self.hstruct(sid)
            .keys
            .iter()
            .filter(|key| !lexicon::is_internal(key))
            .cloned()
            .collect()
    }

    /// Non-internal own values, in key order.
    pub fn struct_values(&self, sid: StructId) -> Vec<Value> {
        let hstruct = self.hstruct(sid);
        hstruct
            .keys
            .iter()
            .filter(|key| !lexicon::is_internal(key))
            .map(|key| hstruct.fields[key].clone())
            .collect()
    }

    /// Number of non-internal own keys.
    pub fn struct_length(&self, sid: StructId) -> usize {
        self.struct_keys(sid).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_struct(heap: &mut Heap) -> StructId {
        let ns = heap.alloc_namespace("test", None, None);
        heap.alloc_struct(None, None, ns)
    }

    #[test]
    fn test_field_order_preserved() {
        let mut heap = Heap::new();
        let sid = empty_struct(&mut heap);
        heap.struct_set_field(sid, "b", Value::Integer(2));
        heap.struct_set_field(sid, "a", Value::Integer(1));
        heap.struct_set_field(sid, "b", Value::Integer(3));
        assert_eq!(heap.struct_keys(sid), vec!["b", "a"]);
    }

    #[test]
    fn test_prototype_probe() {
        let mut heap = Heap::new();
        let parent = empty_struct(&mut heap);
        heap.struct_set_field(parent, "inherited", Value::Integer(1));
        let ns = heap.hstruct(parent).namespace;
        let child = heap.alloc_struct(None, Some(parent), ns);
        heap.struct_set_field(child, "own", Value::Integer(2));

        assert!(matches!(
            heap.struct_probe(child, "own"),
            StructProbe::Field(Value::Integer(2))
        ));
        assert!(matches!(
            heap.struct_probe(child, "inherited"),
            StructProbe::Field(Value::Integer(1))
        ));
        assert!(matches!(
            heap.struct_probe(child, "missing"),
            StructProbe::NotFound
        ));
    }

    #[test]
    fn test_clone_skips_internals_and_is_deep() {
        let mut heap = Heap::new();
        let nested = empty_struct(&mut heap);
        heap.struct_set_field(nested, "n", Value::Integer(1));
        let sid = empty_struct(&mut heap);
        heap.struct_set_field(sid, "child", Value::Struct(nested));
        heap.struct_set_field(sid, "$internal", Value::Integer(9));

        let clone = heap.struct_clone(sid, false);
        assert_eq!(heap.struct_keys(clone), vec!["child"]);
        let cloned_child = match heap.hstruct(clone).fields["child"] {
            Value::Struct(id) => id,
            _ => panic!("expected struct"),
        };
        assert_ne!(cloned_child, nested);
        // Mutating the clone's child leaves the original untouched
        heap.struct_set_field(cloned_child, "n", Value::Integer(5));
        assert_eq!(heap.hstruct(nested).fields["n"], Value::Integer(1));
    }

    #[test]
    fn test_assign_overwrites_merge_fills() {
        let mut heap = Heap::new();
        let dst = empty_struct(&mut heap);
        heap.struct_set_field(dst, "x", Value::Integer(1));
        let src = empty_struct(&mut heap);
        heap.struct_set_field(src, "x", Value::Integer(10));
        heap.struct_set_field(src, "y", Value::Integer(20));

        heap.struct_merge(dst, src);
        assert_eq!(heap.hstruct(dst).fields["x"], Value::Integer(1));
        assert_eq!(heap.hstruct(dst).fields["y"], Value::Integer(20));

        heap.struct_assign(dst, src);
        assert_eq!(heap.hstruct(dst).fields["x"], Value::Integer(10));
    }

    #[test]
    fn test_length_ignores_internal_keys() {
        let mut heap = Heap::new();
        let sid = empty_struct(&mut heap);
        heap.struct_set_field(sid, "a", Value::Integer(1));
        heap.struct_set_field(sid, "$construct", Value::Null);
        assert_eq!(heap.struct_length(sid), 1);
    }
}
