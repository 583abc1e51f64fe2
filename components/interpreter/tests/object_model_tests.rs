//! Structs, classes, instances, casts, types and visibility.

mod common;

use bytecode_system::{
    BytecodeEmitter, FuncSpec, FunctionCategory, Opcode, ParamSpec, Register, VarDeclFlags,
};
use common::*;
use core_types::{ErrorKind, HtType, Value};

fn mutable() -> VarDeclFlags {
    VarDeclFlags {
        is_mutable: true,
        ..Default::default()
    }
}

fn field_flags() -> VarDeclFlags {
    VarDeclFlags {
        is_field: true,
        is_mutable: true,
        ..Default::default()
    }
}

/// Emit `object.key` with both operands staged.
fn member_of(e: &mut BytecodeEmitter, object: &str, key: &str) {
    e.identifier(object, true);
    e.store(Register::PostfixObject);
    e.identifier(key, false);
    e.store(Register::PostfixKey);
    e.member_get(false);
}

#[test]
fn test_struct_literal_fields_and_order() {
    let mut vm = new_vm();
    eval_script(&mut vm, |e| {
        e.var_decl("s", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_struct(None, None, vec![
                field("b", |e| e.local_int(2)),
                field("a", |e| e.local_int(1)),
            ]);
        }));
    })
    .unwrap();
    let sid = match vm.fetch("s").unwrap() {
        Value::Struct(sid) => sid,
        other => panic!("expected a struct, got {:?}", other),
    };
    assert_eq!(vm.heap().struct_keys(sid), vec!["b", "a"]);
}

#[test]
fn test_struct_spread() {
    // var a = { x: 1 }; var b = { ...a, y: 2 }
    let mut vm = new_vm();
    eval_script(&mut vm, |e| {
        e.var_decl("a", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_struct(None, None, vec![field("x", |e| e.local_int(1))]);
        }));
        e.var_decl("b", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_struct(None, None, vec![
                spread_field(|e| e.identifier("a", true)),
                field("y", |e| e.local_int(2)),
            ]);
        }));
    })
    .unwrap();
    let sid = match vm.fetch("b").unwrap() {
        Value::Struct(sid) => sid,
        other => panic!("expected a struct, got {:?}", other),
    };
    assert_eq!(vm.heap().struct_keys(sid), vec!["x", "y"]);
    assert_eq!(vm.heap().hstruct(sid).fields["x"], Value::Integer(1));
    assert_eq!(vm.heap().hstruct(sid).fields["y"], Value::Integer(2));
}

#[test]
fn test_prototype_binds_original_receiver() {
    // var p = { greet: function () => this.name }
    // var s = { name: 'jim' }; s.prototype = p; s.greet()
    let result = run_script(|e| {
        e.var_decl("p", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_struct(None, None, vec![field("greet", |e| {
                e.local_function(FuncSpec::literal(|e| {
                    member_of(e, "this", "name");
                }));
            })]);
        }));
        e.var_decl("s", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_struct(None, None, vec![field("name", |e| e.local_string("jim"))]);
        }));
        // s.prototype = p
        e.identifier("p", true);
        e.store(Register::AssignRight);
        e.identifier("s", true);
        e.store(Register::PostfixObject);
        e.identifier("prototype", false);
        e.store(Register::PostfixKey);
        e.member_set(false);
        // s.greet()
        member_of(e, "s", "greet");
        e.call(false, false, None, vec![], vec![]);
    });
    assert_eq!(result, Value::String("jim".to_string()));
}

#[test]
fn test_struct_clone_equals_original() {
    let mut vm = new_vm();
    eval_script(&mut vm, |e| {
        e.var_decl("s", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_struct(None, None, vec![
                field("a", |e| e.local_int(1)),
                field("nested", |e| {
                    e.local_struct(None, None, vec![field("n", |e| e.local_int(2))]);
                }),
                field("$internal", |e| e.local_int(9)),
            ]);
        }));
        // var c = s.clone()
        e.var_decl("c", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            member_of(e, "s", "clone");
            e.call(false, false, None, vec![], vec![]);
        }));
        // var cc = c.clone()
        e.var_decl("cc", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            member_of(e, "c", "clone");
            e.call(false, false, None, vec![], vec![]);
        }));
    })
    .unwrap();
    let original = match vm.fetch("s").unwrap() {
        Value::Struct(sid) => sid,
        _ => panic!("expected struct"),
    };
    let clone = match vm.fetch("c").unwrap() {
        Value::Struct(sid) => sid,
        _ => panic!("expected struct"),
    };
    let clone_of_clone = match vm.fetch("cc").unwrap() {
        Value::Struct(sid) => sid,
        _ => panic!("expected struct"),
    };
    // Every non-internal key matches; internal keys are dropped
    for key in vm.heap().struct_keys(original) {
        match (&vm.heap().hstruct(original).fields[&key], &vm.heap().hstruct(clone).fields[&key]) {
            (Value::Struct(_), Value::Struct(_)) => {}
            (a, b) => assert_eq!(a, b, "field {} should survive cloning", key),
        }
    }
    assert!(!vm.heap().hstruct(clone).fields.contains_key("$internal"));
    assert_eq!(
        vm.heap().struct_keys(clone),
        vm.heap().struct_keys(clone_of_clone)
    );
}

#[test]
fn test_struct_keys_and_length_methods() {
    let result = run_script(|e| {
        e.var_decl("s", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_struct(None, None, vec![
                field("a", |e| e.local_int(1)),
                field("$hidden", |e| e.local_int(2)),
                field("b", |e| e.local_int(3)),
            ]);
        }));
        member_of(e, "s", "length");
        e.call(false, false, None, vec![], vec![]);
    });
    assert_eq!(result, Value::Integer(2));
}

#[test]
fn test_struct_getter_and_setter_entries() {
    let result = run_script(|e| {
        e.var_decl("s", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_struct(None, None, vec![
                field("_size", |e| e.local_int(1)),
                field("get$size", |e| {
                    e.local_function(FuncSpec::literal(|e| {
                        member_of(e, "this", "_size");
                    }));
                }),
                field("set$size", |e| {
                    e.local_function(FuncSpec {
                        params: vec![ParamSpec::positional("value")],
                        ..FuncSpec::literal(|e| {
                            e.identifier("value", true);
                            e.store(Register::AssignRight);
                            e.identifier("this", true);
                            e.store(Register::PostfixObject);
                            e.identifier("_size", false);
                            e.store(Register::PostfixKey);
                            e.member_set(false);
                        })
                    });
                }),
            ]);
        }));
        // s.size = 5 (runs the setter)
        e.local_int(5);
        e.store(Register::AssignRight);
        e.identifier("s", true);
        e.store(Register::PostfixObject);
        e.identifier("size", false);
        e.store(Register::PostfixKey);
        e.member_set(false);
        // s.size (runs the getter)
        member_of(e, "s", "size");
    });
    assert_eq!(result, Value::Integer(5));
}

#[test]
fn test_inheritance_and_cast() {
    // class A { var n = 'A' }; class B extends A { var n = 'B' }
    // var b = B(); (b as A).n
    let result = run_script(|e| {
        e.class_decl("A", false, false, false, None, |e| {
            e.var_decl("n", field_flags(), None, Some(|e: &mut BytecodeEmitter| {
                e.local_string("A");
            }));
        });
        e.class_decl("B", false, false, false, Some(&HtType::nominal("A")), |e| {
            e.var_decl("n", field_flags(), None, Some(|e: &mut BytecodeEmitter| {
                e.local_string("B");
            }));
        });
        e.var_decl("b", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.identifier("B", true);
            e.call(false, false, Some("B"), vec![], vec![]);
        }));
        // (b as A).n
        e.identifier("b", true);
        e.store(Register::RelationLeft);
        e.type_as(&HtType::nominal("A"));
        e.store(Register::PostfixObject);
        e.identifier("n", false);
        e.store(Register::PostfixKey);
        e.member_get(false);
    });
    assert_eq!(result, Value::String("A".to_string()));
}

#[test]
fn test_uncast_member_reads_most_derived() {
    let result = run_script(|e| {
        e.class_decl("A", false, false, false, None, |e| {
            e.var_decl("n", field_flags(), None, Some(|e: &mut BytecodeEmitter| {
                e.local_string("A");
            }));
        });
        e.class_decl("B", false, false, false, Some(&HtType::nominal("A")), |e| {
            e.var_decl("n", field_flags(), None, Some(|e: &mut BytecodeEmitter| {
                e.local_string("B");
            }));
        });
        e.var_decl("b", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.identifier("B", true);
            e.call(false, false, Some("B"), vec![], vec![]);
        }));
        member_of(e, "b", "n");
    });
    assert_eq!(result, Value::String("B".to_string()));
}

#[test]
fn test_cast_of_non_instance_fails() {
    let mut vm = new_vm();
    let error = eval_script(&mut vm, |e| {
        e.class_decl("A", false, false, false, None, |_| {});
        e.local_int(3);
        e.store(Register::RelationLeft);
        e.type_as(&HtType::nominal("A"));
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Castee);
}

#[test]
fn test_cast_outside_hierarchy_fails() {
    let mut vm = new_vm();
    let error = eval_script(&mut vm, |e| {
        e.class_decl("A", false, false, false, None, |_| {});
        e.class_decl("C", false, false, false, None, |_| {});
        e.var_decl("a", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.identifier("A", true);
            e.call(false, false, Some("A"), vec![], vec![]);
        }));
        e.identifier("a", true);
        e.store(Register::RelationLeft);
        e.type_as(&HtType::nominal("C"));
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::TypeCast);
}

#[test]
fn test_abstract_class_cannot_instantiate() {
    let mut vm = new_vm();
    let error = eval_script(&mut vm, |e| {
        e.class_decl("Base", false, true, false, None, |_| {});
        e.identifier("Base", true);
        e.call(true, false, Some("Base"), vec![], vec![]);
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Abstracted);
}

#[test]
fn test_static_members() {
    let result = run_script(|e| {
        e.class_decl("Counter", false, false, false, None, |e| {
            e.var_decl(
                "label",
                VarDeclFlags {
                    is_static: true,
                    is_mutable: true,
                    ..Default::default()
                },
                None,
                Some(|e: &mut BytecodeEmitter| e.local_string("counter")),
            );
        });
        member_of(e, "Counter", "label");
    });
    assert_eq!(result, Value::String("counter".to_string()));
}

#[test]
fn test_class_getter() {
    let result = run_script(|e| {
        e.class_decl("C", false, false, false, None, |e| {
            e.func_decl(FuncSpec {
                internal_name: "get$seven",
                category: FunctionCategory::Getter,
                ..FuncSpec::function("get$seven", |e| e.local_int(7))
            });
        });
        e.var_decl("c", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.identifier("C", true);
            e.call(false, false, Some("C"), vec![], vec![]);
        }));
        member_of(e, "c", "seven");
    });
    assert_eq!(result, Value::Integer(7));
}

#[test]
fn test_method_binds_this() {
    let result = run_script(|e| {
        e.class_decl("Greeter", false, false, false, None, |e| {
            e.var_decl("name", field_flags(), None, Some(|e: &mut BytecodeEmitter| {
                e.local_string("ada");
            }));
            e.func_decl(FuncSpec::function("greet", |e| {
                member_of(e, "this", "name");
            }));
        });
        e.var_decl("g", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.identifier("Greeter", true);
            e.call(false, false, Some("Greeter"), vec![], vec![]);
        }));
        member_of(e, "g", "greet");
        e.call(false, false, None, vec![], vec![]);
    });
    assert_eq!(result, Value::String("ada".to_string()));
}

#[test]
fn test_private_namespace_member() {
    let mut vm = new_vm();
    let error = eval_script(&mut vm, |e| {
        e.namespace_decl("inner", |e| {
            e.var_decl("_secret", mutable(), None, Some(|e: &mut BytecodeEmitter| {
                e.local_int(1);
            }));
        });
        member_of(e, "inner", "_secret");
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::PrivateMember);
}

#[test]
fn test_private_member_visible_from_inside() {
    let result = run_script(|e| {
        e.var_decl("_secret", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_int(21);
        }));
        // Same namespace: the prefix rule allows the read
        e.identifier("_secret", true);
        e.store(Register::AdditiveLeft);
        e.identifier("_secret", true);
        e.op(Opcode::Add);
    });
    assert_eq!(result, Value::Integer(42));
}

#[test]
fn test_named_struct_template() {
    let result = run_script(|e| {
        e.struct_decl("Point", None, |e| {
            e.local_struct(Some("Point"), None, vec![
                field("x", |e| e.local_int(0)),
                field("y", |e| e.local_int(0)),
            ]);
        });
        e.var_decl("p", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.identifier("Point", true);
            e.call(true, false, Some("Point"), vec![], vec![]);
        }));
        // p.x = 3
        e.local_int(3);
        e.store(Register::AssignRight);
        e.identifier("p", true);
        e.store(Register::PostfixObject);
        e.identifier("x", false);
        e.store(Register::PostfixKey);
        e.member_set(false);
        member_of(e, "p", "x");
    });
    assert_eq!(result, Value::Integer(3));
}

#[test]
fn test_destructuring_struct_and_list() {
    let result = run_script(|e| {
        e.destructuring_decl(
            &[("first", "a"), ("second", "b")],
            false,
            true,
            |e| {
                e.local_struct(None, None, vec![
                    field("a", |e| e.local_int(40)),
                    field("b", |e| e.local_int(2)),
                ]);
            },
        );
        e.destructuring_decl(&[("head", ""), ("tail", "")], true, true, |e| {
            e.local_list(vec![arg(|e| e.local_int(100)), arg(|e| e.local_int(200))]);
        });
        e.identifier("first", true);
        e.store(Register::AdditiveLeft);
        e.identifier("second", true);
        e.op(Opcode::Add);
    });
    assert_eq!(result, Value::Integer(42));
}

#[test]
fn test_type_is_and_type_of() {
    let result = run_script(|e| {
        e.local_int(3);
        e.store(Register::RelationLeft);
        e.type_is(&HtType::nominal("int"));
    });
    assert_eq!(result, Value::Boolean(true));

    let result = run_script(|e| {
        e.class_decl("A", false, false, false, None, |_| {});
        e.class_decl("B", false, false, false, Some(&HtType::nominal("A")), |_| {});
        e.var_decl("b", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.identifier("B", true);
            e.call(false, false, Some("B"), vec![], vec![]);
        }));
        e.identifier("b", true);
        e.store(Register::RelationLeft);
        e.type_is(&HtType::nominal("A"));
    });
    assert_eq!(result, Value::Boolean(true));
}

#[test]
fn test_type_value_of_every_value_conforms_to_any() {
    let result = run_script(|e| {
        e.local_string("x");
        e.op(Opcode::TypeValueOf);
        e.store(Register::RelationLeft);
        // `typeof 'x' is any` must hold
        e.local_int(0);
        e.op(Opcode::EndOfStmt);
        e.type_is(&HtType::any());
    });
    assert_eq!(result, Value::Boolean(true));
}

#[test]
fn test_delete_struct_member() {
    let mut vm = new_vm();
    eval_script(&mut vm, |e| {
        e.var_decl("s", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_struct(None, None, vec![
                field("a", |e| e.local_int(1)),
                field("b", |e| e.local_int(2)),
            ]);
        }));
        e.identifier("s", true);
        e.store(Register::PostfixObject);
        e.delete_member("a");
    })
    .unwrap();
    let sid = match vm.fetch("s").unwrap() {
        Value::Struct(sid) => sid,
        _ => panic!("expected struct"),
    };
    assert_eq!(vm.heap().struct_keys(sid), vec!["b"]);
}
