//! Preincluded bindings installed by `init`.
//!
//! Covers the core library surface every embedder gets for free: `console`,
//! `JSON`, `Future`, instance methods of the host primitives (strings,
//! lists, maps, numbers), struct reflection methods, `range` and `print`.
//! Everything goes through the same external registries a host would use.

use async_runtime::{share, to_value, with_future, HtFuture};
use core_types::{HtError, Value};
use std::cell::RefCell;
use std::rc::Rc;

use crate::interop::{BoundExternalMethod, ExternalArguments, ExternalClass, ExternalClassRef};
use crate::declaration::{DeclKind, Declaration};
use crate::vm::Vm;

/// A host class whose members resolve by name lists.
///
/// Statics resolve to `id.key` external functions, instance methods to
/// `id::key` bound methods; `direct` intercepts property-style reads.
struct BuiltinClass {
    id: &'static str,
    statics: &'static [&'static str],
    methods: &'static [&'static str],
    direct: fn(&Value, &str) -> Option<Value>,
}

fn no_direct(_object: &Value, _key: &str) -> Option<Value> {
    None
}

impl ExternalClass for BuiltinClass {
    fn type_id(&self) -> &str {
        self.id
    }

    fn member_get(&self, id: &str) -> Result<Value, HtError> {
        if self.statics.contains(&id) {
            return Ok(Value::ExternFunction(format!("{}.{}", self.id, id)));
        }
        Err(HtError::undefined_external(&format!("{}.{}", self.id, id)))
    }

    fn instance_member_get(&self, object: &Value, id: &str) -> Result<Value, HtError> {
        if let Some(value) = (self.direct)(object, id) {
            return Ok(value);
        }
        if self.methods.contains(&id) {
            return Ok(Value::ExternObject(Rc::new(RefCell::new(
                BoundExternalMethod {
                    id: format!("{}::{}", self.id, id),
                    receiver: object.clone(),
                },
            ))));
        }
        Err(HtError::undefined(id))
    }
}

fn class_ref(id: &str) -> Value {
    Value::ExternObject(Rc::new(RefCell::new(ExternalClassRef { id: id.to_string() })))
}

fn receiver(args: &ExternalArguments) -> Result<Value, HtError> {
    args.receiver
        .clone()
        .ok_or_else(|| HtError::extern_error("Instance method called without a receiver"))
}

/// Install every preincluded binding. Called once by `init`.
pub(crate) fn install(vm: &mut Vm) -> Result<(), HtError> {
    install_console(vm)?;
    install_json(vm)?;
    install_future(vm)?;
    install_strings(vm);
    install_lists(vm);
    install_maps(vm);
    install_numbers(vm);
    install_structs(vm);
    install_globals(vm)?;
    Ok(())
}

fn define_global(vm: &mut Vm, id: &str, value: Value) -> Result<(), HtError> {
    vm.heap.ns_define(
        vm.global,
        Declaration::immutable(id, DeclKind::ExternalClass, value),
        true,
    )
}

fn install_console(vm: &mut Vm) -> Result<(), HtError> {
    vm.bind_external_class(Rc::new(BuiltinClass {
        id: "console",
        statics: &["log", "warn", "error", "info"],
        methods: &[],
        direct: no_direct,
    }));
    for level in ["log", "warn", "error", "info"] {
        vm.bind_external_method(
            &format!("console.{}", level),
            Rc::new(move |vm: &mut Vm, args: ExternalArguments| {
                let console = vm.console();
                match level {
                    "warn" => console.warn(&args.positional),
                    "error" => console.error(&args.positional),
                    "info" => console.info(&args.positional),
                    _ => console.log(&args.positional),
                }
                Ok(Value::Null)
            }),
        );
    }
    define_global(vm, "console", class_ref("console"))
}

fn install_json(vm: &mut Vm) -> Result<(), HtError> {
    vm.bind_external_class(Rc::new(BuiltinClass {
        id: "JSON",
        statics: &["stringify", "parse"],
        methods: &[],
        direct: no_direct,
    }));
    vm.bind_external_method(
        "JSON.stringify",
        Rc::new(|vm: &mut Vm, args: ExternalArguments| {
            let json = vm.value_to_json(&args.positional_or_null(0));
            serde_json::to_string(&json)
                .map(Value::String)
                .map_err(|e| HtError::extern_error(format!("JSON stringify failed: {}", e)))
        }),
    );
    vm.bind_external_method(
        "JSON.parse",
        Rc::new(|vm: &mut Vm, args: ExternalArguments| {
            let text = match args.positional_or_null(0) {
                Value::String(text) => text,
                other => return Err(HtError::extern_error(format!("Not a JSON string: {}", other))),
            };
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| HtError::extern_error(format!("JSON parse failed: {}", e)))?;
            Ok(vm.json_to_value(&json))
        }),
    );
    define_global(vm, "JSON", class_ref("JSON"))
}

fn install_future(vm: &mut Vm) -> Result<(), HtError> {
    fn future_direct(object: &Value, key: &str) -> Option<Value> {
        if key != "isComplete" {
            return None;
        }
        match object {
            Value::ExternObject(cell) => with_future(cell, |future| {
                Value::Boolean(future.is_settled())
            }),
            _ => None,
        }
    }
    vm.bind_external_class(Rc::new(BuiltinClass {
        id: "Future",
        statics: &["value"],
        methods: &["then"],
        direct: future_direct,
    }));
    // Future.value(x) builds an already-resolved future
    vm.bind_external_method(
        "Future.value",
        Rc::new(|vm: &mut Vm, args: ExternalArguments| {
            let shared = share(HtFuture::new());
            shared.borrow_mut().resolve(args.positional_or_null(0));
            vm.track_future(&shared);
            Ok(to_value(&shared))
        }),
    );
    // Future(fn) runs the computation and resolves with its result
    vm.bind_external_method(
        "Future",
        Rc::new(|vm: &mut Vm, args: ExternalArguments| {
            let callback = args.positional_or_null(0);
            let shared = share(HtFuture::new());
            match vm.call_callable(
                &callback,
                Vec::new(),
                Vec::new(),
                crate::calls::CallSite::host(),
            ) {
                Ok(value) => shared.borrow_mut().resolve(value),
                Err(error) => shared.borrow_mut().reject(error),
            }
            vm.track_future(&shared);
            Ok(to_value(&shared))
        }),
    );
    vm.bind_external_method(
        "Future::then",
        Rc::new(|vm: &mut Vm, args: ExternalArguments| {
            let object = receiver(&args)?;
            let callback = args.positional_or_null(0);
            match async_runtime::future_cell(&object) {
                Some(cell) => {
                    with_future(&cell, |future| future.then(callback.clone()));
                    // Keep the cell tracked so the pump fires the reaction
                    vm.track_future_cell(cell);
                }
                None => {
                    return Err(HtError::extern_error("then() called on a non-future"));
                }
            }
            vm.drive()?;
            Ok(Value::Null)
        }),
    );
    define_global(vm, "Future", class_ref("Future"))
}

fn install_strings(vm: &mut Vm) {
    fn string_direct(object: &Value, key: &str) -> Option<Value> {
        let text = match object {
            Value::String(text) => text,
            _ => return None,
        };
        match key {
            "length" => Some(Value::Integer(text.chars().count() as i64)),
            "isEmpty" => Some(Value::Boolean(text.is_empty())),
            "isNotEmpty" => Some(Value::Boolean(!text.is_empty())),
            _ => None,
        }
    }
    vm.bind_external_class(Rc::new(BuiltinClass {
        id: "str",
        statics: &["parse"],
        methods: &[
            "toString",
            "contains",
            "startsWith",
            "endsWith",
            "indexOf",
            "trim",
            "toUpperCase",
            "toLowerCase",
            "split",
        ],
        direct: string_direct,
    }));
    vm.bind_external_method(
        "str.parse",
        Rc::new(|_vm, args| Ok(Value::String(args.positional_or_null(0).to_string()))),
    );
    let text_of = |args: &ExternalArguments| -> Result<String, HtError> {
        match receiver(args)? {
            Value::String(text) => Ok(text),
            other => Err(HtError::extern_error(format!("Not a string: {}", other))),
        }
    };
    let arg_text = |args: &ExternalArguments, index: usize| -> Result<String, HtError> {
        match args.positional_or_null(index) {
            Value::String(text) => Ok(text),
            other => Err(HtError::extern_error(format!("Not a string: {}", other))),
        }
    };
    vm.bind_external_method(
        "str::toString",
        Rc::new(move |_vm, args| Ok(Value::String(text_of(&args)?))),
    );
    vm.bind_external_method(
        "str::contains",
        Rc::new(move |_vm, args| {
            Ok(Value::Boolean(text_of(&args)?.contains(&arg_text(&args, 0)?)))
        }),
    );
    vm.bind_external_method(
        "str::startsWith",
        Rc::new(move |_vm, args| {
            Ok(Value::Boolean(
                text_of(&args)?.starts_with(&arg_text(&args, 0)?),
            ))
        }),
    );
    vm.bind_external_method(
        "str::endsWith",
        Rc::new(move |_vm, args| {
            Ok(Value::Boolean(text_of(&args)?.ends_with(&arg_text(&args, 0)?)))
        }),
    );
    vm.bind_external_method(
        "str::indexOf",
        Rc::new(move |_vm, args| {
            let text = text_of(&args)?;
            let needle = arg_text(&args, 0)?;
            Ok(Value::Integer(
                text.find(&needle).map(|i| i as i64).unwrap_or(-1),
            ))
        }),
    );
    vm.bind_external_method(
        "str::trim",
        Rc::new(move |_vm, args| Ok(Value::String(text_of(&args)?.trim().to_string()))),
    );
    vm.bind_external_method(
        "str::toUpperCase",
        Rc::new(move |_vm, args| Ok(Value::String(text_of(&args)?.to_uppercase()))),
    );
    vm.bind_external_method(
        "str::toLowerCase",
        Rc::new(move |_vm, args| Ok(Value::String(text_of(&args)?.to_lowercase()))),
    );
    vm.bind_external_method(
        "str::split",
        Rc::new(move |_vm, args| {
            let text = text_of(&args)?;
            let separator = arg_text(&args, 0)?;
            Ok(Value::list(
                text.split(&separator)
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        }),
    );
}

fn install_lists(vm: &mut Vm) {
    fn list_direct(object: &Value, key: &str) -> Option<Value> {
        let items = match object {
            Value::List(items) => items,
            _ => return None,
        };
        let items = items.borrow();
        match key {
            "length" => Some(Value::Integer(items.len() as i64)),
            "isEmpty" => Some(Value::Boolean(items.is_empty())),
            "isNotEmpty" => Some(Value::Boolean(!items.is_empty())),
            "first" => Some(items.first().cloned().unwrap_or(Value::Null)),
            "last" => Some(items.last().cloned().unwrap_or(Value::Null)),
            _ => None,
        }
    }
    vm.bind_external_class(Rc::new(BuiltinClass {
        id: "List",
        statics: &[],
        methods: &[
            "add", "addAll", "contains", "elementAt", "join", "clear", "removeAt", "removeLast",
        ],
        direct: list_direct,
    }));
    let items_of = |args: &ExternalArguments| -> Result<Rc<RefCell<Vec<Value>>>, HtError> {
        match receiver(args)? {
            Value::List(items) => Ok(items),
            other => Err(HtError::extern_error(format!("Not a list: {}", other))),
        }
    };
    vm.bind_external_method(
        "List::add",
        Rc::new(move |_vm, args| {
            let items = items_of(&args)?;
            items.borrow_mut().extend(args.positional.iter().cloned());
            Ok(Value::Null)
        }),
    );
    vm.bind_external_method(
        "List::addAll",
        Rc::new(move |_vm, args| {
            let items = items_of(&args)?;
            match args.positional_or_null(0) {
                Value::List(other) => {
                    let other = other.borrow().clone();
                    items.borrow_mut().extend(other);
                    Ok(Value::Null)
                }
                other => Err(HtError::extern_error(format!("Not a list: {}", other))),
            }
        }),
    );
    vm.bind_external_method(
        "List::contains",
        Rc::new(move |_vm, args| {
            let items = items_of(&args)?;
            let needle = args.positional_or_null(0);
            let found = items.borrow().iter().any(|item| item == &needle);
            Ok(Value::Boolean(found))
        }),
    );
    vm.bind_external_method(
        "List::elementAt",
        Rc::new(move |_vm, args| {
            let items = items_of(&args)?;
            let index = args
                .positional_or_null(0)
                .as_index()
                .ok_or_else(|| HtError::sub_get_key("elementAt"))?;
            let value = items
                .borrow()
                .get(index as usize)
                .cloned()
                .unwrap_or(Value::Null);
            Ok(value)
        }),
    );
    vm.bind_external_method(
        "List::join",
        Rc::new(move |_vm, args| {
            let items = items_of(&args)?;
            let separator = match args.positional_or_null(0) {
                Value::String(separator) => separator,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            let joined = items
                .borrow()
                .iter()
                .map(|item| item.to_string())
                .collect::<Vec<_>>()
                .join(&separator);
            Ok(Value::String(joined))
        }),
    );
    vm.bind_external_method(
        "List::clear",
        Rc::new(move |_vm, args| {
            items_of(&args)?.borrow_mut().clear();
            Ok(Value::Null)
        }),
    );
    vm.bind_external_method(
        "List::removeAt",
        Rc::new(move |_vm, args| {
            let items = items_of(&args)?;
            let index = args
                .positional_or_null(0)
                .as_index()
                .ok_or_else(|| HtError::sub_get_key("removeAt"))?;
            let mut items = items.borrow_mut();
            if index < 0 || index as usize >= items.len() {
                return Err(HtError::extern_error(format!(
                    "Subscript index [{}] out of range [{}]",
                    index,
                    items.len()
                )));
            }
            Ok(items.remove(index as usize))
        }),
    );
    vm.bind_external_method(
        "List::removeLast",
        Rc::new(move |_vm, args| {
            Ok(items_of(&args)?.borrow_mut().pop().unwrap_or(Value::Null))
        }),
    );
}

fn install_maps(vm: &mut Vm) {
    fn map_direct(object: &Value, key: &str) -> Option<Value> {
        let entries = match object {
            Value::Map(entries) => entries,
            _ => return None,
        };
        let entries = entries.borrow();
        match key {
            "length" => Some(Value::Integer(entries.len() as i64)),
            "isEmpty" => Some(Value::Boolean(entries.is_empty())),
            "isNotEmpty" => Some(Value::Boolean(!entries.is_empty())),
            "keys" => Some(Value::list(entries.iter().map(|(k, _)| k.clone()).collect())),
            "values" => Some(Value::list(entries.iter().map(|(_, v)| v.clone()).collect())),
            _ => None,
        }
    }
    vm.bind_external_class(Rc::new(BuiltinClass {
        id: "Map",
        statics: &[],
        methods: &["containsKey", "remove", "clear"],
        direct: map_direct,
    }));
    let entries_of = |args: &ExternalArguments| -> Result<Rc<RefCell<Vec<(Value, Value)>>>, HtError> {
        match receiver(args)? {
            Value::Map(entries) => Ok(entries),
            other => Err(HtError::extern_error(format!("Not a map: {}", other))),
        }
    };
    vm.bind_external_method(
        "Map::containsKey",
        Rc::new(move |_vm, args| {
            let entries = entries_of(&args)?;
            let key = args.positional_or_null(0);
            let found = entries.borrow().iter().any(|(entry_key, _)| entry_key == &key);
            Ok(Value::Boolean(found))
        }),
    );
    vm.bind_external_method(
        "Map::remove",
        Rc::new(move |_vm, args| {
            let entries = entries_of(&args)?;
            let key = args.positional_or_null(0);
            let mut entries = entries.borrow_mut();
            match entries.iter().position(|(entry_key, _)| entry_key == &key) {
                Some(index) => Ok(entries.remove(index).1),
                None => Ok(Value::Null),
            }
        }),
    );
    vm.bind_external_method(
        "Map::clear",
        Rc::new(move |_vm, args| {
            entries_of(&args)?.borrow_mut().clear();
            Ok(Value::Null)
        }),
    );
}

fn install_numbers(vm: &mut Vm) {
    fn int_direct(_object: &Value, _key: &str) -> Option<Value> {
        None
    }
    fn float_direct(object: &Value, key: &str) -> Option<Value> {
        match (object, key) {
            (Value::Float(n), "isNaN") => Some(Value::Boolean(n.is_nan())),
            _ => None,
        }
    }
    vm.bind_external_class(Rc::new(BuiltinClass {
        id: "int",
        statics: &["parse"],
        methods: &["toString", "abs"],
        direct: int_direct,
    }));
    vm.bind_external_class(Rc::new(BuiltinClass {
        id: "float",
        statics: &["parse"],
        methods: &["toString", "abs", "floor", "ceil", "round", "truncate"],
        direct: float_direct,
    }));
    vm.bind_external_class(Rc::new(BuiltinClass {
        id: "bigint",
        statics: &["parse"],
        methods: &["toString"],
        direct: no_direct,
    }));
    vm.bind_external_method(
        "int.parse",
        Rc::new(|_vm, args| match args.positional_or_null(0) {
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| HtError::extern_error(format!("int.parse failed: {}", e))),
            other => Err(HtError::extern_error(format!("Not a string: {}", other))),
        }),
    );
    vm.bind_external_method(
        "float.parse",
        Rc::new(|_vm, args| match args.positional_or_null(0) {
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| HtError::extern_error(format!("float.parse failed: {}", e))),
            other => Err(HtError::extern_error(format!("Not a string: {}", other))),
        }),
    );
    vm.bind_external_method(
        "bigint.parse",
        Rc::new(|_vm, args| match args.positional_or_null(0) {
            Value::String(text) => text
                .trim()
                .parse::<num_bigint::BigInt>()
                .map(Value::BigInt)
                .map_err(|e| HtError::extern_error(format!("bigint.parse failed: {}", e))),
            other => Err(HtError::extern_error(format!("Not a string: {}", other))),
        }),
    );
    for id in ["int", "float", "bigint"] {
        vm.bind_external_method(
            &format!("{}::toString", id),
            Rc::new(|_vm, args| Ok(Value::String(receiver(&args)?.to_string()))),
        );
    }
    vm.bind_external_method(
        "int::abs",
        Rc::new(|_vm, args| match receiver(&args)? {
            Value::Integer(n) => Ok(Value::Integer(n.abs())),
            other => Err(HtError::extern_error(format!("Not an int: {}", other))),
        }),
    );
    vm.bind_external_method(
        "float::abs",
        Rc::new(|_vm, args| match receiver(&args)? {
            Value::Float(n) => Ok(Value::Float(n.abs())),
            other => Err(HtError::extern_error(format!("Not a float: {}", other))),
        }),
    );
    for (id, op) in [
        ("floor", f64::floor as fn(f64) -> f64),
        ("ceil", f64::ceil),
        ("round", f64::round),
        ("truncate", f64::trunc),
    ] {
        vm.bind_external_method(
            &format!("float::{}", id),
            Rc::new(move |_vm, args| match receiver(&args)? {
                Value::Float(n) => Ok(Value::Integer(op(n) as i64)),
                Value::Integer(n) => Ok(Value::Integer(n)),
                other => Err(HtError::extern_error(format!("Not a float: {}", other))),
            }),
        );
    }
}

fn install_structs(vm: &mut Vm) {
    vm.bind_external_class(Rc::new(BuiltinClass {
        id: "struct",
        statics: &[],
        methods: &[
            "keys", "values", "length", "isEmpty", "isNotEmpty", "clone", "assign", "merge",
            "contains", "toString", "toJSON",
        ],
        direct: no_direct,
    }));
    let struct_of = |args: &ExternalArguments| -> Result<core_types::StructId, HtError> {
        match receiver(args)? {
            Value::Struct(sid) => Ok(sid),
            other => Err(HtError::extern_error(format!("Not a struct: {}", other))),
        }
    };
    vm.bind_external_method(
        "struct::keys",
        Rc::new(move |vm: &mut Vm, args| {
            let sid = struct_of(&args)?;
            Ok(Value::list(
                vm.heap
                    .struct_keys(sid)
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ))
        }),
    );
    vm.bind_external_method(
        "struct::values",
        Rc::new(move |vm: &mut Vm, args| {
            let sid = struct_of(&args)?;
            Ok(Value::list(vm.heap.struct_values(sid)))
        }),
    );
    vm.bind_external_method(
        "struct::length",
        Rc::new(move |vm: &mut Vm, args| {
            let sid = struct_of(&args)?;
            Ok(Value::Integer(vm.heap.struct_length(sid) as i64))
        }),
    );
    vm.bind_external_method(
        "struct::isEmpty",
        Rc::new(move |vm: &mut Vm, args| {
            let sid = struct_of(&args)?;
            Ok(Value::Boolean(vm.heap.struct_length(sid) == 0))
        }),
    );
    vm.bind_external_method(
        "struct::isNotEmpty",
        Rc::new(move |vm: &mut Vm, args| {
            let sid = struct_of(&args)?;
            Ok(Value::Boolean(vm.heap.struct_length(sid) != 0))
        }),
    );
    vm.bind_external_method(
        "struct::clone",
        Rc::new(move |vm: &mut Vm, args| {
            let sid = struct_of(&args)?;
            let with_internals = matches!(args.positional_or_null(0), Value::Boolean(true));
            Ok(Value::Struct(vm.heap.struct_clone(sid, with_internals)))
        }),
    );
    vm.bind_external_method(
        "struct::assign",
        Rc::new(move |vm: &mut Vm, args| {
            let sid = struct_of(&args)?;
            match args.positional_or_null(0) {
                Value::Struct(other) => {
                    vm.heap.struct_assign(sid, other);
                    Ok(Value::Null)
                }
                other => Err(HtError::extern_error(format!("Not a struct: {}", other))),
            }
        }),
    );
    vm.bind_external_method(
        "struct::merge",
        Rc::new(move |vm: &mut Vm, args| {
            let sid = struct_of(&args)?;
            match args.positional_or_null(0) {
                Value::Struct(other) => {
                    vm.heap.struct_merge(sid, other);
                    Ok(Value::Null)
                }
                other => Err(HtError::extern_error(format!("Not a struct: {}", other))),
            }
        }),
    );
    vm.bind_external_method(
        "struct::contains",
        Rc::new(move |vm: &mut Vm, args| {
            let sid = struct_of(&args)?;
            let key = args.positional_or_null(0).to_string();
            Ok(Value::Boolean(vm.heap.struct_contains(sid, &key)))
        }),
    );
    vm.bind_external_method(
        "struct::toString",
        Rc::new(move |vm: &mut Vm, args| {
            let sid = struct_of(&args)?;
            let json = vm.value_to_json(&Value::Struct(sid));
            Ok(Value::String(json.to_string()))
        }),
    );
    vm.bind_external_method(
        "struct::toJSON",
        Rc::new(move |vm: &mut Vm, args| {
            let sid = struct_of(&args)?;
            let json = vm.value_to_json(&Value::Struct(sid));
            serde_json::to_string(&json)
                .map(Value::String)
                .map_err(|e| HtError::extern_error(format!("JSON stringify failed: {}", e)))
        }),
    );
}

fn install_globals(vm: &mut Vm) -> Result<(), HtError> {
    vm.bind_external_function(
        "print",
        Rc::new(|vm: &mut Vm, args: ExternalArguments| {
            vm.console().log(&args.positional);
            Ok(Value::Null)
        }),
    );
    vm.bind_external_function(
        "range",
        Rc::new(|_vm, args: ExternalArguments| {
            let (start, end, step) = match (
                args.positional_or_null(0).as_index(),
                args.positional.get(1).and_then(Value::as_index),
                args.positional.get(2).and_then(Value::as_index),
            ) {
                (Some(end), None, None) => (0, end, 1),
                (Some(start), Some(end), None) => (start, end, 1),
                (Some(start), Some(end), Some(step)) if step != 0 => (start, end, step),
                _ => return Err(HtError::extern_error("range expects integer bounds")),
            };
            let mut items = Vec::new();
            let mut current = start;
            while (step > 0 && current < end) || (step < 0 && current > end) {
                items.push(Value::Integer(current));
                current += step;
            }
            Ok(Value::list(items))
        }),
    );
    define_global(vm, "print", Value::ExternFunction("print".to_string()))?;
    define_global(vm, "range", Value::ExternFunction("range".to_string()))?;
    Ok(())
}
