//! Member and subscript access across every value kind.
//!
//! Uniform encapsulation: structs and instances resolve through their own
//! storage and namespaces, host primitives resolve through the external
//! class bound to their canonical type id, and opaque host objects resolve
//! through the registered reflection hooks.

use async_runtime::HtFuture;
use core_types::{ClassId, HtError, InstanceId, Value};

use crate::calls::CallSite;
use crate::class::InstanceProbe;
use crate::dispatch::ExecState;
use crate::hstruct::StructProbe;
use crate::interop::ExternalClassRef;
use crate::lexicon;
use crate::vm::Vm;

impl Vm {
    /// Member read with receiver binding and getter invocation.
    pub(crate) fn member_get_value(
        &mut self,
        object: &Value,
        key: &str,
        is_nullable: bool,
        from: &str,
        state: &ExecState,
    ) -> Result<Value, HtError> {
        match object {
            Value::Null => {
                if is_nullable {
                    Ok(Value::Null)
                } else {
                    Err(HtError::visit_member_of_null_object(key))
                }
            }
            Value::Struct(sid) => {
                if key == lexicon::PROTOTYPE {
                    return Ok(match self.heap.hstruct(*sid).prototype {
                        Some(prototype) => Value::Struct(prototype),
                        None => Value::Null,
                    });
                }
                if lexicon::is_private(key) {
                    let owner = self
                        .heap
                        .namespace(self.heap.hstruct(*sid).namespace)
                        .full_name
                        .clone();
                    if !from.starts_with(&owner) {
                        return Err(HtError::private_member(key));
                    }
                }
                match self.heap.struct_probe(*sid, key) {
                    StructProbe::Field(Value::Function(fid)) => {
                        Ok(Value::Function(self.heap.bind_function(fid, object.clone())))
                    }
                    StructProbe::Field(value) => Ok(value),
                    StructProbe::Getter(getter) => {
                        let bound = self.heap.bind_function(getter, object.clone());
                        self.call_function(bound, Vec::new(), Vec::new(), CallSite::of(state))
                    }
                    StructProbe::NotFound => self.extern_instance_member(object, "struct", key),
                }
            }
            Value::Instance(iid) => self.instance_member(object, *iid, None, key, from, state),
            Value::Cast(view) => {
                self.instance_member(object, view.instance, Some(view.class_id), key, from, state)
            }
            Value::Class(class_id) => self.class_member(*class_id, key, from, state),
            Value::Namespace(ns) => self
                .lookup_value(*ns, key, Some(from), false)?
                .ok_or_else(|| HtError::undefined(key)),
            Value::ExternObject(cell) => {
                let class_ref = cell.borrow().downcast_ref::<ExternalClassRef>().cloned();
                if let Some(class_ref) = class_ref {
                    let handle = self.bindings.class(&class_ref.id)?;
                    return handle.member_get(key);
                }
                if cell.borrow().is::<HtFuture>() {
                    return self.extern_instance_member(object, "Future", key);
                }
                match self.bindings.reflect(object) {
                    Some(type_id) => self.extern_instance_member(object, &type_id, key),
                    None => Err(HtError::undefined(key)),
                }
            }
            Value::Boolean(_)
            | Value::Integer(_)
            | Value::Float(_)
            | Value::BigInt(_)
            | Value::String(_)
            | Value::List(_)
            | Value::Map(_) => self.extern_instance_member(object, object.type_name(), key),
            Value::Function(_) | Value::ExternFunction(_) | Value::Type(_) => {
                Err(HtError::undefined(key))
            }
        }
    }

    fn extern_instance_member(
        &mut self,
        object: &Value,
        type_id: &str,
        key: &str,
    ) -> Result<Value, HtError> {
        let handle = self
            .bindings
            .class(type_id)
            .map_err(|_| HtError::undefined(key))?;
        handle.instance_member_get(object, key)
    }

    fn instance_member(
        &mut self,
        object: &Value,
        iid: InstanceId,
        from_class: Option<ClassId>,
        key: &str,
        from: &str,
        state: &ExecState,
    ) -> Result<Value, HtError> {
        if lexicon::is_private(key) {
            let class_id = self.heap.instance(iid).class_id;
            let owner = self
                .heap
                .namespace(self.heap.class(class_id).namespace)
                .full_name
                .clone();
            if !from.starts_with(&owner) {
                return Err(HtError::private_member(key));
            }
        }
        match self.heap.instance_probe(iid, key, from_class) {
            InstanceProbe::Field(Value::Function(fid)) | InstanceProbe::Method(fid) => {
                Ok(Value::Function(self.heap.bind_function(fid, object.clone())))
            }
            InstanceProbe::Field(value) => Ok(value),
            InstanceProbe::Getter(getter) => {
                let bound = self.heap.bind_function(getter, object.clone());
                self.call_function(bound, Vec::new(), Vec::new(), CallSite::of(state))
            }
            InstanceProbe::NotFound => Err(HtError::undefined(key)),
        }
    }

    fn class_member(
        &mut self,
        class_id: ClassId,
        key: &str,
        from: &str,
        state: &ExecState,
    ) -> Result<Value, HtError> {
        let class_ns = self.heap.class(class_id).namespace;
        if let Some(value) = self.lookup_value(class_ns, key, Some(from), false)? {
            return Ok(value);
        }
        // Static getter
        let getter_key = format!("{}{}", lexicon::GETTER_PREFIX, key);
        if let Some(Value::Function(getter)) =
            self.lookup_value(class_ns, &getter_key, Some(from), false)?
        {
            return self.call_function(getter, Vec::new(), Vec::new(), CallSite::of(state));
        }
        // Named constructor
        let ctor_key = format!("{}${}", lexicon::CONSTRUCTOR, key);
        if let Some(value) = self.lookup_value(class_ns, &ctor_key, Some(from), false)? {
            return Ok(value);
        }
        Err(HtError::undefined(key))
    }

    /// Member write with setter invocation.
    pub(crate) fn member_set_value(
        &mut self,
        object: &Value,
        key: &str,
        value: Value,
        is_nullable: bool,
        from: &str,
        state: &ExecState,
    ) -> Result<(), HtError> {
        match object {
            Value::Null => {
                if is_nullable {
                    Ok(())
                } else {
                    Err(HtError::visit_member_of_null_object(key))
                }
            }
            Value::Struct(sid) => {
                if key == lexicon::PROTOTYPE {
                    return match value {
                        Value::Struct(prototype) => {
                            self.heap.hstruct_mut(*sid).prototype = Some(prototype);
                            Ok(())
                        }
                        Value::Null => {
                            self.heap.hstruct_mut(*sid).prototype = None;
                            Ok(())
                        }
                        other => Err(HtError::extern_error(format!(
                            "A prototype must be a struct, got [{}]",
                            other.type_name()
                        ))),
                    };
                }
                if lexicon::is_private(key) {
                    let owner = self
                        .heap
                        .namespace(self.heap.hstruct(*sid).namespace)
                        .full_name
                        .clone();
                    if !from.starts_with(&owner) {
                        return Err(HtError::private_member(key));
                    }
                }
                if self.heap.hstruct(*sid).fields.contains_key(key) {
                    self.heap.struct_set_field(*sid, key, value);
                    return Ok(());
                }
                if let Some(setter) = self.heap.struct_probe_setter(*sid, key) {
                    let bound = self.heap.bind_function(setter, object.clone());
                    self.call_function(bound, vec![value], Vec::new(), CallSite::of(state))?;
                    return Ok(());
                }
                self.heap.struct_set_field(*sid, key, value);
                Ok(())
            }
            Value::Instance(iid) => {
                self.instance_member_set(object, *iid, None, key, value, from, state)
            }
            Value::Cast(view) => self.instance_member_set(
                object,
                view.instance,
                Some(view.class_id),
                key,
                value,
                from,
                state,
            ),
            Value::Class(class_id) => {
                let class_ns = self.heap.class(*class_id).namespace;
                let assigned =
                    self.heap
                        .ns_assign(class_ns, key, value, Some(from), false, false)?;
                if assigned {
                    Ok(())
                } else {
                    Err(HtError::undefined(key))
                }
            }
            Value::Namespace(ns) => {
                let assigned = self
                    .heap
                    .ns_assign(*ns, key, value, Some(from), false, false)?;
                if assigned {
                    Ok(())
                } else {
                    Err(HtError::undefined(key))
                }
            }
            Value::ExternObject(_) => match self.bindings.reflect(object) {
                Some(type_id) => {
                    let handle = self
                        .bindings
                        .class(&type_id)
                        .map_err(|_| HtError::undefined(key))?;
                    handle.instance_member_set(object, key, value)
                }
                None => Err(HtError::undefined(key)),
            },
            other => {
                let handle = self
                    .bindings
                    .class(other.type_name())
                    .map_err(|_| HtError::undefined(key))?;
                handle.instance_member_set(object, key, value)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn instance_member_set(
        &mut self,
        object: &Value,
        iid: InstanceId,
        from_class: Option<ClassId>,
        key: &str,
        value: Value,
        from: &str,
        state: &ExecState,
    ) -> Result<(), HtError> {
        if lexicon::is_private(key) {
            let class_id = self.heap.instance(iid).class_id;
            let owner = self
                .heap
                .namespace(self.heap.class(class_id).namespace)
                .full_name
                .clone();
            if !from.starts_with(&owner) {
                return Err(HtError::private_member(key));
            }
        }
        let has_field = {
            let instance = self.heap.instance(iid);
            let mut started = from_class.is_none();
            let mut found = false;
            for frame in &instance.frames {
                if !started {
                    started = Some(frame.class_id) == from_class;
                    if !started {
                        continue;
                    }
                }
                if frame.fields.contains_key(key) {
                    found = true;
                    break;
                }
            }
            found
        };
        if has_field {
            self.heap.instance_set_field(iid, key, value, from_class);
            return Ok(());
        }
        if let Some(setter) = self.heap.instance_probe_setter(iid, key, from_class) {
            let bound = self.heap.bind_function(setter, object.clone());
            self.call_function(bound, vec![value], Vec::new(), CallSite::of(state))?;
            return Ok(());
        }
        Err(HtError::undefined(key))
    }

    /// Subscript read: integer keys for lists and strings, structural keys
    /// for maps, member semantics for objects.
    pub(crate) fn sub_get_value(
        &mut self,
        object: &Value,
        key: &Value,
        is_nullable: bool,
        from: &str,
        state: &ExecState,
    ) -> Result<Value, HtError> {
        match object {
            Value::Null => {
                if is_nullable {
                    Ok(Value::Null)
                } else {
                    Err(HtError::visit_member_of_null_object(&key.to_string()))
                }
            }
            Value::List(items) => {
                let index = key
                    .as_index()
                    .ok_or_else(|| HtError::sub_get_key(&key.to_string()))?;
                let items = items.borrow();
                if index < 0 || index as usize >= items.len() {
                    return Err(HtError::extern_error(format!(
                        "Subscript index [{}] out of range [{}]",
                        index,
                        items.len()
                    )));
                }
                Ok(items[index as usize].clone())
            }
            Value::Map(entries) => {
                let entries = entries.borrow();
                Ok(entries
                    .iter()
                    .find(|(entry_key, _)| entry_key == key)
                    .map(|(_, value)| value.clone())
                    .unwrap_or(Value::Null))
            }
            Value::String(text) => {
                let index = key
                    .as_index()
                    .ok_or_else(|| HtError::sub_get_key(&key.to_string()))?;
                text.chars()
                    .nth(index as usize)
                    .map(|c| Value::String(c.to_string()))
                    .ok_or_else(|| {
                        HtError::extern_error(format!(
                            "Subscript index [{}] out of range [{}]",
                            index,
                            text.chars().count()
                        ))
                    })
            }
            Value::Struct(_)
            | Value::Instance(_)
            | Value::Cast(_)
            | Value::Namespace(_)
            | Value::Class(_) => {
                let key = match key {
                    Value::String(key) => key.clone(),
                    other => other.to_string(),
                };
                self.member_get_value(object, &key, is_nullable, from, state)
            }
            _ => Err(HtError::sub_get_key(&key.to_string())),
        }
    }

    /// Subscript write.
    pub(crate) fn sub_set_value(
        &mut self,
        object: &Value,
        key: &Value,
        value: Value,
        is_nullable: bool,
        from: &str,
        state: &ExecState,
    ) -> Result<(), HtError> {
        match object {
            Value::Null => {
                if is_nullable {
                    Ok(())
                } else {
                    Err(HtError::null_sub_set_key())
                }
            }
            Value::List(items) => {
                let index = key
                    .as_index()
                    .ok_or_else(|| HtError::sub_get_key(&key.to_string()))?;
                let mut items = items.borrow_mut();
                let len = items.len();
                match index {
                    i if i >= 0 && (i as usize) < len => {
                        items[i as usize] = value;
                        Ok(())
                    }
                    i if i >= 0 && i as usize == len => {
                        items.push(value);
                        Ok(())
                    }
                    _ => Err(HtError::extern_error(format!(
                        "Subscript index [{}] out of range [{}]",
                        index, len
                    ))),
                }
            }
            Value::Map(entries) => {
                let mut entries = entries.borrow_mut();
                match entries.iter_mut().find(|(entry_key, _)| entry_key == key) {
                    Some((_, slot)) => *slot = value,
                    None => entries.push((key.clone(), value)),
                }
                Ok(())
            }
            Value::Struct(_) | Value::Instance(_) | Value::Cast(_) | Value::Namespace(_) => {
                let key = match key {
                    Value::String(key) => key.clone(),
                    other => other.to_string(),
                };
                self.member_set_value(object, &key, value, is_nullable, from, state)
            }
            _ => Err(HtError::sub_get_key(&key.to_string())),
        }
    }
}
