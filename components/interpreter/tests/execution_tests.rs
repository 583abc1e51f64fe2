//! Execution semantics: expressions, control flow, policies, errors.

mod common;

use bytecode_system::{BytecodeEmitter, FuncSpec, Opcode, Register, VarDeclFlags};
use common::*;
use core_types::{ErrorKind, Value};
use interpreter::{InterpreterConfig, Vm};
use std::cell::RefCell;
use std::rc::Rc;

fn mutable() -> VarDeclFlags {
    VarDeclFlags {
        is_mutable: true,
        ..Default::default()
    }
}

#[test]
fn test_variable_and_addition() {
    // var x = 40; x + 2
    let result = run_script(|e| {
        e.var_decl("x", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(40)));
        e.identifier("x", true);
        e.store(Register::AdditiveLeft);
        e.local_int(2);
        e.op(Opcode::Add);
    });
    assert_eq!(result, Value::Integer(42));
}

#[test]
fn test_division_kinds() {
    let quotient = run_script(|e| {
        e.local_int(7);
        e.store(Register::MultiplicativeLeft);
        e.local_int(2);
        e.op(Opcode::Divide);
    });
    assert_eq!(quotient, Value::Float(3.5));

    let truncated = run_script(|e| {
        e.local_int(7);
        e.store(Register::MultiplicativeLeft);
        e.local_int(2);
        e.op(Opcode::TruncatingDivide);
    });
    assert_eq!(truncated, Value::Integer(3));
}

#[test]
fn test_string_concatenation() {
    let result = run_script(|e| {
        e.local_string("foo");
        e.store(Register::AdditiveLeft);
        e.local_string("bar");
        e.op(Opcode::Add);
    });
    assert_eq!(result, Value::String("foobar".to_string()));
}

#[test]
fn test_bigint_multiplication() {
    let result = run_script(|e| {
        e.local_bigint("123456789012345678901234567890");
        e.store(Register::MultiplicativeLeft);
        e.local_int(2);
        e.op(Opcode::Multiply);
    });
    assert_eq!(
        result.to_string(),
        "246913578024691357802469135780"
    );
}

#[test]
fn test_comparisons() {
    let result = run_script(|e| {
        e.local_int(3);
        e.store(Register::RelationLeft);
        e.local_float(3.5);
        e.op(Opcode::Lesser);
    });
    assert_eq!(result, Value::Boolean(true));

    let result = run_script(|e| {
        e.local_int(3);
        e.store(Register::EqualLeft);
        e.local_float(3.0);
        e.op(Opcode::Equal);
    });
    assert_eq!(result, Value::Boolean(true));
}

#[test]
fn test_null_coerces_to_zero_in_comparison() {
    let result = run_script(|e| {
        e.local_null();
        e.store(Register::RelationLeft);
        e.local_int(1);
        e.op(Opcode::Lesser);
    });
    assert_eq!(result, Value::Boolean(true));
}

#[test]
fn test_logical_or_skips_right_side() {
    // true || (throw) must not evaluate the right side
    let result = run_script(|e| {
        e.local_bool(true);
        e.store(Register::OrLeft);
        e.logical_or(|e| {
            e.local_string("boom");
            e.op(Opcode::Throws);
        });
    });
    assert_eq!(result, Value::Boolean(true));
}

#[test]
fn test_logical_and_evaluates_right_side() {
    let result = run_script(|e| {
        e.local_bool(true);
        e.store(Register::AndLeft);
        e.logical_and(|e| e.local_int(0));
    });
    // 0 is falsy under the lenient policy
    assert_eq!(result, Value::Boolean(false));
}

#[test]
fn test_if_null_takes_left_when_not_null() {
    let result = run_script(|e| {
        e.local_int(5);
        e.store(Register::IfNullLeft);
        e.if_null(|e| e.local_int(9));
    });
    assert_eq!(result, Value::Integer(5));

    let result = run_script(|e| {
        e.local_null();
        e.store(Register::IfNullLeft);
        e.if_null(|e| e.local_int(9));
    });
    assert_eq!(result, Value::Integer(9));
}

#[test]
fn test_if_statement_with_else() {
    // if (false) { 1 } else { 2 }
    let result = run_script(|e| {
        e.local_bool(false);
        e.if_else(|e| e.local_int(1), |e| e.local_int(2));
    });
    assert_eq!(result, Value::Integer(2));

    let result = run_script(|e| {
        e.local_bool(true);
        e.if_else(|e| e.local_int(1), |e| e.local_int(2));
    });
    assert_eq!(result, Value::Integer(1));
}

#[test]
fn test_while_loop_sums() {
    // var i = 0; var sum = 0; while (i < 5) { sum = sum + i; i = i + 1 }; sum
    let result = run_script(|e| {
        e.var_decl("i", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(0)));
        e.var_decl("sum", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(0)));
        e.while_loop(
            |e| {
                e.identifier("i", true);
                e.store(Register::RelationLeft);
                e.local_int(5);
                e.op(Opcode::Lesser);
            },
            |e| {
                e.framed(|e| {
                    e.identifier("sum", true);
                    e.store(Register::AdditiveLeft);
                    e.identifier("i", true);
                    e.op(Opcode::Add);
                });
                e.store(Register::AssignRight);
                e.identifier("sum", false);
                e.op(Opcode::Assign);
                e.framed(|e| {
                    e.identifier("i", true);
                    e.store(Register::AdditiveLeft);
                    e.local_int(1);
                    e.op(Opcode::Add);
                });
                e.store(Register::AssignRight);
                e.identifier("i", false);
                e.op(Opcode::Assign);
            },
        );
        e.identifier("sum", true);
    });
    assert_eq!(result, Value::Integer(10));
}

#[test]
fn test_do_loop_runs_once() {
    // var n = 0; do { n = n + 1 } while (false); n
    let result = run_script(|e| {
        e.var_decl("n", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(0)));
        e.do_loop(
            |e| {
                e.framed(|e| {
                    e.identifier("n", true);
                    e.store(Register::AdditiveLeft);
                    e.local_int(1);
                    e.op(Opcode::Add);
                });
                e.store(Register::AssignRight);
                e.identifier("n", false);
                e.op(Opcode::Assign);
            },
            Some(|e: &mut BytecodeEmitter| e.local_bool(false)),
        );
        e.identifier("n", true);
    });
    assert_eq!(result, Value::Integer(1));
}

#[test]
fn test_break_leaves_loop() {
    // var n = 0; while (true) { break }; n
    let result = run_script(|e| {
        e.var_decl("n", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(7)));
        e.while_loop(
            |e| e.local_bool(true),
            |e| e.op(Opcode::BreakLoop),
        );
        e.identifier("n", true);
    });
    assert_eq!(result, Value::Integer(7));
}

#[test]
fn test_switch_matches_case() {
    let result = run_script(|e| {
        e.local_int(2);
        e.switch_stmt(
            true,
            vec![
                (
                    Box::new(|e: &mut BytecodeEmitter| e.local_int(1)),
                    Box::new(|e: &mut BytecodeEmitter| e.local_string("one")),
                ),
                (
                    Box::new(|e: &mut BytecodeEmitter| e.local_int(2)),
                    Box::new(|e: &mut BytecodeEmitter| e.local_string("two")),
                ),
            ],
            Some(Box::new(|e: &mut BytecodeEmitter| e.local_string("other"))),
        );
    });
    assert_eq!(result, Value::String("two".to_string()));
}

#[test]
fn test_switch_falls_back_to_else() {
    let result = run_script(|e| {
        e.local_int(9);
        e.switch_stmt(
            true,
            vec![(
                Box::new(|e: &mut BytecodeEmitter| e.local_int(1)),
                Box::new(|e: &mut BytecodeEmitter| e.local_string("one")),
            )],
            Some(Box::new(|e: &mut BytecodeEmitter| e.local_string("other"))),
        );
    });
    assert_eq!(result, Value::String("other".to_string()));
}

#[test]
fn test_assignment_to_undefined_fails_by_default() {
    let mut vm = new_vm();
    let error = eval_script(&mut vm, |e| {
        e.local_int(1);
        e.store(Register::AssignRight);
        e.identifier("ghost", false);
        e.op(Opcode::Assign);
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Undefined);
}

#[test]
fn test_implicit_declaration_policy() {
    let config = InterpreterConfig {
        allow_implicit_variable_declaration: true,
        ..Default::default()
    };
    let mut vm = new_vm_with(config);
    let result = eval_script(&mut vm, |e| {
        e.local_int(1);
        e.store(Register::AssignRight);
        e.identifier("ghost", false);
        e.op(Opcode::Assign);
        e.identifier("ghost", true);
    })
    .unwrap();
    assert_eq!(result, Value::Integer(1));
}

#[test]
fn test_static_external_resolution_rejects_unbound_at_load() {
    let image = script_image(|e| {
        e.func_decl(FuncSpec {
            is_external: true,
            body: None,
            ..FuncSpec::function("missing", |_| {})
        });
    });

    // Under dynamic resolution the unbound declaration loads fine
    let mut vm = new_vm();
    vm.load_bytecode(image.clone(), "main", false, None, vec![], vec![])
        .unwrap();

    // Static resolution rejects it at load time, before any call
    let config = InterpreterConfig {
        resolve_external_functions_dynamically: false,
        ..Default::default()
    };
    let mut vm = new_vm_with(config.clone());
    let error = vm
        .load_bytecode(image.clone(), "main", false, None, vec![], vec![])
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::UndefinedExternal);
    assert!(error.message.contains("missing"));

    // With the binding installed the same image passes the check
    let mut vm = new_vm_with(config);
    vm.bind_external_function("missing", Rc::new(|_vm, _args| Ok(Value::Integer(1))));
    vm.load_bytecode(image, "main", false, None, vec![], vec![])
        .unwrap();
}

#[test]
fn test_initializer_statement_value_policy() {
    // Off by default: a declaration statement has no value
    let mut vm = new_vm();
    let result = eval_script(&mut vm, |e| {
        e.var_decl("x", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(40)));
    })
    .unwrap();
    assert_eq!(result, Value::Null);

    // On: the initializer also becomes the statement value
    let config = InterpreterConfig {
        allow_initialization_expression_result: true,
        ..Default::default()
    };
    let mut vm = new_vm_with(config);
    let result = eval_script(&mut vm, |e| {
        e.var_decl("x", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(40)));
    })
    .unwrap();
    assert_eq!(result, Value::Integer(40));
}

#[test]
fn test_null_arithmetic_without_coercion_policy() {
    let config = InterpreterConfig {
        allow_implicit_null_to_zero_conversion: false,
        ..Default::default()
    };
    let mut vm = new_vm_with(config.clone());
    let error = eval_script(&mut vm, |e| {
        e.local_null();
        e.store(Register::AdditiveLeft);
        e.local_int(1);
        e.op(Opcode::Add);
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Extern);

    // Comparisons stop coercing as well
    let mut vm = new_vm_with(config);
    let error = eval_script(&mut vm, |e| {
        e.local_null();
        e.store(Register::RelationLeft);
        e.local_int(1);
        e.op(Opcode::Lesser);
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Extern);
}

#[test]
fn test_stack_trace_display_count_limits_frames() {
    let config = InterpreterConfig {
        stack_trace_display_count: 1,
        ..Default::default()
    };
    let mut vm = new_vm_with(config);
    let error = eval_script(&mut vm, |e| {
        e.func_decl(FuncSpec::function("inner", |e| {
            e.local_string("bang");
            e.op(Opcode::Throws);
        }));
        e.func_decl(FuncSpec::function("outer", |e| {
            e.identifier("inner", true);
            e.call(false, false, None, vec![], vec![]);
        }));
        e.identifier("outer", true);
        e.call(false, false, None, vec![], vec![]);
    })
    .unwrap_err();
    // Two frames were live; the display count trims the trace to one
    assert_eq!(error.stack.len(), 1);
    assert_eq!(error.stack[0].function_name, "inner");
}

#[test]
fn test_process_error_renders_through_console() {
    let output = Rc::new(RefCell::new(Vec::new()));
    let config = InterpreterConfig {
        process_error: true,
        ..Default::default()
    };
    let mut vm = Vm::new(config).with_console_capture(output.clone());
    vm.init().unwrap();
    vm.load_bytecode(
        script_image(|e| {
            e.func_decl(FuncSpec::function("explode", |e| {
                e.local_string("bang");
                e.op(Opcode::Throws);
            }));
        }),
        "main",
        false,
        None,
        vec![],
        vec![],
    )
    .unwrap();

    let error = vm.invoke("explode", vec![], vec![]).unwrap_err();
    assert_eq!(error.kind, ErrorKind::ScriptThrows);
    // The error was also rendered through the console writer
    assert!(output
        .borrow()
        .iter()
        .any(|line| line.contains("ScriptThrows")));
}

#[test]
fn test_strict_truthiness_policy() {
    let config = InterpreterConfig {
        allow_implicit_empty_value_to_false_conversion: false,
        ..Default::default()
    };
    let mut vm = new_vm_with(config);
    // Under the strict policy a non-boolean condition is falsy
    let result = eval_script(&mut vm, |e| {
        e.local_int(0);
        e.local_int(1);
        e.if_stmt(|e| e.local_int(99));
    })
    .unwrap();
    assert_ne!(result, Value::Integer(99));
}

#[test]
fn test_string_interpolation() {
    let result = run_script(|e| {
        e.var_decl("n", mutable(), None, Some(|e: &mut BytecodeEmitter| e.local_int(6)));
        e.local_interpolation(
            "{0} times 7 is {1}",
            vec![
                Box::new(|e: &mut BytecodeEmitter| e.identifier("n", true)),
                Box::new(|e: &mut BytecodeEmitter| {
                    e.framed(|e| {
                        e.identifier("n", true);
                        e.store(Register::MultiplicativeLeft);
                        e.local_int(7);
                        e.op(Opcode::Multiply);
                    });
                }),
            ],
        );
    });
    assert_eq!(result, Value::String("6 times 7 is 42".to_string()));
}

#[test]
fn test_assertion_failure() {
    let mut vm = new_vm();
    let error = eval_script(&mut vm, |e| {
        e.local_bool(false);
        e.assertion("x > 0");
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::AssertionFailed);
    assert!(error.message.contains("x > 0"));
}

#[test]
fn test_throw_carries_payload() {
    let mut vm = new_vm();
    let error = eval_script(&mut vm, |e| {
        e.local_string("kaput");
        e.op(Opcode::Throws);
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::ScriptThrows);
    assert_eq!(error.extra.as_deref(), Some("kaput"));
}

#[test]
fn test_unknown_opcode() {
    let mut vm = new_vm();
    let error = eval_script(&mut vm, |e| {
        e.write_u8(0xF0);
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::UnknownOpCode);
}

#[test]
fn test_error_carries_position() {
    let mut vm = new_vm();
    let error = eval_script(&mut vm, |e| {
        e.line_info(12, 3);
        e.identifier("ghost", true);
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Undefined);
    assert_eq!(error.line, Some(12));
    assert_eq!(error.column, Some(3));
    assert_eq!(error.filename.as_deref(), Some("main.ht"));
}

#[test]
fn test_frame_stack_invariant_after_module() {
    let mut vm = new_vm();
    eval_script(&mut vm, |e| {
        e.framed(|e| {
            e.local_int(1);
            e.store(Register::AdditiveLeft);
            e.local_int(2);
            e.op(Opcode::Add);
        });
    })
    .unwrap();
    assert_eq!(vm.frame_depth(), 1);
    assert!(vm.base_frame_cleared());
}

#[test]
fn test_group_literal() {
    let result = run_script(|e| {
        e.local_group(|e| {
            e.local_int(5);
            e.store(Register::AdditiveLeft);
            e.local_int(4);
            e.op(Opcode::Add);
        });
    });
    assert_eq!(result, Value::Integer(9));
}

#[test]
fn test_const_decl() {
    let result = run_script(|e| {
        e.const_decl_string("greeting", "hello");
        e.identifier("greeting", true);
    });
    assert_eq!(result, Value::String("hello".to_string()));
}

#[test]
fn test_goto_follows_anchor() {
    let result = run_script(|e| {
        e.op(Opcode::Anchor);
        // Jump over the throw: goto operand (3 bytes) plus the skipped
        // region (5 bytes)
        e.op(Opcode::Goto);
        e.write_u16(8);
        e.local_string("boom");
        e.op(Opcode::Throws);
        e.op(Opcode::ClearAnchor);
        e.local_int(42);
    });
    assert_eq!(result, Value::Integer(42));
}

#[test]
fn test_list_literal_with_spread() {
    let result = run_script(|e| {
        e.var_decl("a", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_list(vec![
                arg(|e| e.local_int(1)),
                arg(|e| e.local_int(2)),
            ]);
        }));
        e.local_list(vec![
            spread_arg(|e| e.identifier("a", true)),
            arg(|e| e.local_int(3)),
        ]);
    });
    match result {
        Value::List(items) => {
            let items = items.borrow();
            assert_eq!(items.len(), 3);
            assert_eq!(items[2], Value::Integer(3));
        }
        other => panic!("expected a list, got {:?}", other),
    }
}

#[test]
fn test_subscript_read_and_write() {
    let result = run_script(|e| {
        e.var_decl("xs", mutable(), None, Some(|e: &mut BytecodeEmitter| {
            e.local_list(vec![arg(|e| e.local_int(10)), arg(|e| e.local_int(20))]);
        }));
        // xs[1] = 25
        e.local_int(25);
        e.store(Register::AssignRight);
        e.identifier("xs", true);
        e.store(Register::PostfixObject);
        e.local_int(1);
        e.sub_set(false);
        // xs[1]
        e.identifier("xs", true);
        e.store(Register::PostfixObject);
        e.local_int(1);
        e.sub_get(false);
    });
    assert_eq!(result, Value::Integer(25));
}

#[test]
fn test_subscript_requires_integer_key_on_lists() {
    let mut vm = new_vm();
    let error = eval_script(&mut vm, |e| {
        e.local_list(vec![arg(|e| e.local_int(1))]);
        e.store(Register::PostfixObject);
        e.local_float(0.5);
        e.sub_get(false);
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::SubGetKey);
}

#[test]
fn test_nullable_member_access_on_null() {
    let result = run_script(|e| {
        e.local_null();
        e.store(Register::PostfixObject);
        e.identifier("whatever", false);
        e.store(Register::PostfixKey);
        e.member_get(true);
    });
    assert_eq!(result, Value::Null);

    let mut vm = new_vm();
    let error = eval_script(&mut vm, |e| {
        e.local_null();
        e.store(Register::PostfixObject);
        e.identifier("whatever", false);
        e.store(Register::PostfixKey);
        e.member_get(false);
    })
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::VisitMemberOfNullObject);
}
