//! Nominal object orientation: classes, instances and cast views.

use core_types::{ClassId, FunctionId, HtType, InstanceId, NamespaceId, Value};
use std::collections::HashMap;

use crate::heap::Heap;
use crate::lexicon;

/// A declared class.
#[derive(Debug, Clone)]
pub struct HtClass {
    /// Class name
    pub id: String,
    /// Resolved superclass
    pub super_class: Option<ClassId>,
    /// Declared super type expression, kept for `is`/`as` display
    pub super_type: Option<HtType>,
    /// Cannot be instantiated
    pub is_abstract: bool,
    /// Members dispatch through the external registry
    pub is_external: bool,
    /// Declared as an enum
    pub is_enum: bool,
    /// A constructor was declared in source
    pub has_user_defined_constructor: bool,
    /// The class body namespace (methods, statics, nested declarations)
    pub namespace: NamespaceId,
}

impl HtClass {
    /// A plain class with defaults for every flag.
    pub fn new(id: &str, namespace: NamespaceId) -> Self {
        Self {
            id: id.to_string(),
            super_class: None,
            super_type: None,
            is_abstract: false,
            is_external: false,
            is_enum: false,
            has_user_defined_constructor: false,
            namespace,
        }
    }
}

/// Field storage of one class level of an instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceFrame {
    /// The class level this frame belongs to
    pub class_id: ClassId,
    /// Fields declared at this level
    pub fields: HashMap<String, Value>,
}

impl InstanceFrame {
    /// Create an empty frame for a class level.
    pub fn new(class_id: ClassId) -> Self {
        Self {
            class_id,
            fields: HashMap::new(),
        }
    }
}

/// A class instance: one field frame per ancestor, most derived first.
#[derive(Debug, Clone)]
pub struct HtInstance {
    /// The class the instance was constructed from
    pub class_id: ClassId,
    /// Field frames, most derived first
    pub frames: Vec<InstanceFrame>,
}

/// Result of probing an instance for a member.
#[derive(Debug, Clone)]
pub enum InstanceProbe {
    /// A field value from one of the frames
    Field(Value),
    /// A method found in a class namespace
    Method(FunctionId),
    /// A getter found in a class namespace
    Getter(FunctionId),
    /// Nothing found
    NotFound,
}

impl Heap {
    /// Probe an instance for a member, starting at `from_class` (or the
    /// most derived class) and walking the hierarchy upward.
    ///
    /// Field frames are consulted level by level; at each level the class
    /// namespace is probed for a method or getter of the same name.
    pub fn instance_probe(
        &self,
        instance_id: InstanceId,
        key: &str,
        from_class: Option<ClassId>,
    ) -> InstanceProbe {
        let instance = self.instance(instance_id);
        let getter_key = format!("{}{}", lexicon::GETTER_PREFIX, key);
        let mut started = from_class.is_none();
        for frame in &instance.frames {
            if !started {
                started = Some(frame.class_id) == from_class;
                if !started {
                    continue;
                }
            }
            if let Some(value) = frame.fields.get(key) {
                return InstanceProbe::Field(value.clone());
            }
            let class_ns = self.class(frame.class_id).namespace;
            if let Ok(Some(decl)) = self.ns_lookup(class_ns, key, None, false) {
                // Per-instance field declarations are templates; the live
                // values sit in the instance frames probed above.
                if !decl.is_static && !decl.is_field {
                    if let Value::Function(method) = decl.value {
                        return InstanceProbe::Method(method);
                    }
                    return InstanceProbe::Field(decl.value);
                }
            }
            if let Ok(Some(decl)) = self.ns_lookup(class_ns, &getter_key, None, false) {
                if let Value::Function(getter) = decl.value {
                    return InstanceProbe::Getter(getter);
                }
            }
        }
        InstanceProbe::NotFound
    }

    /// Probe the class hierarchy for a setter entry.
    pub fn instance_probe_setter(
        &self,
        instance_id: InstanceId,
        key: &str,
        from_class: Option<ClassId>,
    ) -> Option<FunctionId> {
        let instance = self.instance(instance_id);
        let setter_key = format!("{}{}", lexicon::SETTER_PREFIX, key);
        let mut started = from_class.is_none();
        for frame in &instance.frames {
            if !started {
                started = Some(frame.class_id) == from_class;
                if !started {
                    continue;
                }
            }
            let class_ns = self.class(frame.class_id).namespace;
            if let Ok(Some(decl)) = self.ns_lookup(class_ns, &setter_key, None, false) {
                if let Value::Function(setter) = decl.value {
                    return Some(setter);
                }
            }
        }
        None
    }

    /// Write an instance field into the frame of the class that declares
    /// it, falling back to the most derived frame.
    pub fn instance_set_field(
        &mut self,
        instance_id: InstanceId,
        key: &str,
        value: Value,
        from_class: Option<ClassId>,
    ) {
        let start = {
            let instance = self.instance(instance_id);
            let mut index = 0;
            if let Some(from) = from_class {
                if let Some(found) = instance.frames.iter().position(|f| f.class_id == from) {
                    index = found;
                }
            }
            index
        };
        let instance = self.instance_mut(instance_id);
        for frame in instance.frames[start..].iter_mut() {
            if frame.fields.contains_key(key) {
                frame.fields.insert(key.to_string(), value);
                return;
            }
        }
        instance.frames[start]
            .fields
            .insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_hierarchy(heap: &mut Heap) -> (ClassId, ClassId, InstanceId) {
        let root = heap.alloc_namespace("global", None, None);
        let ns_a = heap.alloc_namespace("A", Some(root), None);
        let ns_b = heap.alloc_namespace("B", Some(root), None);
        let a = heap.alloc_class(HtClass::new("A", ns_a));
        let mut class_b = HtClass::new("B", ns_b);
        class_b.super_class = Some(a);
        let b = heap.alloc_class(class_b);
        let instance = heap.alloc_instance(b);
        (a, b, instance)
    }

    #[test]
    fn test_shadowed_field_reads_most_derived() {
        let mut heap = Heap::new();
        let (a, b, instance) = two_level_hierarchy(&mut heap);
        // Both levels declare `n`
        {
            let frames = &mut heap.instance_mut(instance).frames;
            frames[0].fields.insert("n".to_string(), Value::String("B".to_string()));
            frames[1].fields.insert("n".to_string(), Value::String("A".to_string()));
        }
        match heap.instance_probe(instance, "n", None) {
            InstanceProbe::Field(Value::String(s)) => assert_eq!(s, "B"),
            other => panic!("unexpected probe result: {:?}", other),
        }
        // Restricted to the ancestor level, the ancestor's field wins
        match heap.instance_probe(instance, "n", Some(a)) {
            InstanceProbe::Field(Value::String(s)) => assert_eq!(s, "A"),
            other => panic!("unexpected probe result: {:?}", other),
        }
        let _ = b;
    }

    #[test]
    fn test_set_field_updates_declaring_frame() {
        let mut heap = Heap::new();
        let (_, _, instance) = two_level_hierarchy(&mut heap);
        heap.instance_mut(instance).frames[1]
            .fields
            .insert("x".to_string(), Value::Integer(1));
        heap.instance_set_field(instance, "x", Value::Integer(2), None);
        assert_eq!(
            heap.instance(instance).frames[1].fields["x"],
            Value::Integer(2)
        );
        assert!(!heap.instance(instance).frames[0].fields.contains_key("x"));
    }
}
