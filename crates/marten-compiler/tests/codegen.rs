//! End-to-end lowering tests: build small chunks by hand, compile them,
//! and assert on the emitted instruction stream and debug tables.

use marten_bytecode::{Constant, Opcode, Prototype, UpvalueDesc};
use marten_compiler::ast::{BinOp, Block, Call, Expr, IfArm, LogOp, Stat};
use marten_compiler::{compile_chunk, CompileError};

fn int(value: i64) -> Expr {
    Expr::Integer { line: 1, value }
}

fn name(n: &str) -> Expr {
    Expr::Name {
        line: 1,
        name: n.to_string(),
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        line: 1,
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn call(callee: Expr, args: Vec<Expr>) -> Call {
    Call {
        line: 1,
        last_line: 1,
        callee: Box::new(callee),
        method: None,
        args,
    }
}

fn local(names: &[&str], values: Vec<Expr>) -> Stat {
    Stat::LocalDecl {
        last_line: 1,
        names: names.iter().map(|s| s.to_string()).collect(),
        values,
    }
}

fn block(stats: Vec<Stat>) -> Block {
    Block {
        last_line: 1,
        stats,
        ret_exps: None,
    }
}

fn returning(stats: Vec<Stat>, ret_exps: Vec<Expr>) -> Block {
    Block {
        last_line: 1,
        stats,
        ret_exps: Some(ret_exps),
    }
}

fn chunk(stats: Vec<Stat>) -> Prototype {
    compile_chunk(&block(stats), "@test.mn").unwrap()
}

fn ops(p: &Prototype) -> Vec<Opcode> {
    p.code.iter().map(|i| i.opcode().unwrap()).collect()
}

/// Invariants every compiled prototype must satisfy, recursively.
fn check_proto(p: &Prototype) {
    assert_eq!(p.code.len(), p.line_info.len());
    assert!(p.max_register_referenced() < u32::from(p.max_stack_size));
    assert!(p.max_stack_size >= 2);
    for (pc, inst) in p.code.iter().enumerate() {
        if matches!(
            inst.opcode(),
            Some(Opcode::Jmp | Opcode::ForLoop | Opcode::ForPrep | Opcode::TForLoop)
        ) {
            let target = pc as i32 + 1 + inst.sbx();
            assert!(
                target >= 0 && (target as usize) < p.code.len(),
                "jump at {pc} lands at {target}, out of bounds"
            );
        }
    }
    for v in &p.local_vars {
        assert!(v.end_pc >= v.start_pc, "local {} dies before it lives", v.name);
    }
    for child in &p.protos {
        check_proto(child);
    }
}

#[test]
fn test_local_arith_uses_rk_constants() {
    let p = chunk(vec![local(&["a"], vec![binary(BinOp::Add, int(1), int(2))])]);
    assert_eq!(ops(&p), vec![Opcode::Add, Opcode::Return]);
    let add = p.code[0];
    assert_eq!(add.a(), 0);
    assert_eq!(add.b(), 0x100);
    assert_eq!(add.c(), 0x101);
    assert_eq!(
        p.constants,
        vec![Constant::Integer(1), Constant::Integer(2)]
    );
    assert_eq!(p.max_stack_size, 2);
    assert_eq!(p.local_vars[0].name, "a");
    check_proto(&p);
}

#[test]
fn test_while_true_break_jumps_converge() {
    let p = chunk(vec![Stat::Loop {
        init: vec![],
        cond: Expr::True { line: 1 },
        step: None,
        body: block(vec![Stat::Break { line: 1 }]),
    }]);
    assert_eq!(
        ops(&p),
        vec![
            Opcode::LoadBool,
            Opcode::Test,
            Opcode::Jmp,
            Opcode::Jmp,
            Opcode::Jmp,
            Opcode::Return,
        ]
    );
    // Exit jump and break both land on the RETURN past the loop.
    assert_eq!(2 + 1 + p.code[2].sbx(), 5);
    assert_eq!(3 + 1 + p.code[3].sbx(), 5);
    // The backward jump re-tests the condition.
    assert_eq!(4 + 1 + p.code[4].sbx(), 0);
    check_proto(&p);
}

#[test]
fn test_continue_lands_on_step_statement() {
    let step = Stat::Assign {
        last_line: 1,
        targets: vec![name("i")],
        values: vec![binary(BinOp::Add, name("i"), int(1))],
    };
    let p = chunk(vec![Stat::Loop {
        init: vec![local(&["i"], vec![int(0)])],
        cond: Expr::True { line: 1 },
        step: Some(Box::new(step)),
        body: block(vec![Stat::Continue { line: 1 }]),
    }]);
    // LOADK, LOADBOOL, TEST, JMP(exit), JMP(continue), ADD, MOVE, JMP(back), RETURN
    assert_eq!(p.code[4].opcode(), Some(Opcode::Jmp));
    assert_eq!(4 + 1 + p.code[4].sbx(), 5);
    assert_eq!(p.code[5].opcode(), Some(Opcode::Add));
    check_proto(&p);
}

#[test]
fn test_counting_loop() {
    let step = Stat::Assign {
        last_line: 1,
        targets: vec![name("i")],
        values: vec![binary(BinOp::Add, name("i"), int(1))],
    };
    let p = chunk(vec![Stat::Loop {
        init: vec![local(&["i"], vec![int(1)])],
        cond: binary(BinOp::Le, name("i"), int(3)),
        step: Some(Box::new(step)),
        body: block(vec![Stat::Call(call(name("f"), vec![]))]),
    }]);
    let o = ops(&p);
    assert!(o.contains(&Opcode::Le));
    assert!(o.contains(&Opcode::Call));
    assert!(p.code.iter().any(|i| {
        i.opcode() == Some(Opcode::Jmp) && i.sbx() < 0
    }));
    check_proto(&p);
}

#[test]
fn test_upvalue_captured_from_parent_stack() {
    let inner = Expr::Function {
        line: 1,
        last_line: 1,
        params: vec![],
        is_vararg: false,
        body: Box::new(returning(vec![], vec![name("x")])),
    };
    let p = chunk(vec![local(&["x"], vec![int(1)]), local(&["f"], vec![inner])]);
    assert_eq!(p.protos.len(), 1);
    let f = &p.protos[0];
    assert_eq!(
        f.upvalues,
        vec![UpvalueDesc {
            in_stack: true,
            index: 0
        }]
    );
    assert_eq!(f.upvalue_names, vec!["x".to_string()]);
    assert_eq!(ops(f), vec![Opcode::GetUpval, Opcode::Return, Opcode::Return]);
    // Nothing referenced a global, so the chunk captures no upvalue.
    assert!(p.upvalues.is_empty());
    check_proto(&p);
}

#[test]
fn test_upvalue_chains_through_intermediate_function() {
    let innermost = Expr::Function {
        line: 1,
        last_line: 1,
        params: vec![],
        is_vararg: false,
        body: Box::new(returning(vec![], vec![name("u")])),
    };
    let outer = Expr::Function {
        line: 1,
        last_line: 1,
        params: vec![],
        is_vararg: false,
        body: Box::new(returning(vec![], vec![innermost])),
    };
    let p = chunk(vec![local(&["u"], vec![int(1)]), local(&["f"], vec![outer])]);
    let mid = &p.protos[0];
    let leaf = &mid.protos[0];
    assert_eq!(
        mid.upvalues,
        vec![UpvalueDesc {
            in_stack: true,
            index: 0
        }]
    );
    assert_eq!(
        leaf.upvalues,
        vec![UpvalueDesc {
            in_stack: false,
            index: 0
        }]
    );
    assert_eq!(leaf.upvalue_names, vec!["u".to_string()]);
    check_proto(&p);
}

#[test]
fn test_globals_route_through_env() {
    let p = chunk(vec![
        Stat::Assign {
            last_line: 1,
            targets: vec![name("x")],
            values: vec![int(1)],
        },
        local(&["y"], vec![name("x")]),
    ]);
    assert_eq!(
        ops(&p),
        vec![
            Opcode::LoadK,
            Opcode::SetTabUp,
            Opcode::GetTabUp,
            Opcode::Return,
        ]
    );
    let set = p.code[1];
    assert_eq!(set.a(), 0); // _ENV is upvalue 0
    assert_eq!(set.b(), 0x100); // key "x" as RK constant
    let get = p.code[2];
    assert_eq!(get.b(), 0);
    assert_eq!(get.c(), 0x100);
    assert_eq!(p.upvalue_names, vec!["_ENV".to_string()]);
    assert_eq!(
        p.upvalues,
        vec![UpvalueDesc {
            in_stack: true,
            index: 0
        }]
    );
    check_proto(&p);
}

#[test]
fn test_logical_chain_shares_exit() {
    let chain = Expr::Logical {
        line: 1,
        op: LogOp::And,
        exps: vec![name("x"), name("y"), name("z")],
    };
    let p = chunk(vec![
        local(&["x", "y", "z"], vec![int(1), int(2), int(3)]),
        local(&["a"], vec![chain]),
    ]);
    assert_eq!(
        ops(&p),
        vec![
            Opcode::LoadK,
            Opcode::LoadK,
            Opcode::LoadK,
            Opcode::TestSet,
            Opcode::Jmp,
            Opcode::TestSet,
            Opcode::Jmp,
            Opcode::Move,
            Opcode::Return,
        ]
    );
    // Both short-circuit jumps land just past the final MOVE.
    assert_eq!(4 + 1 + p.code[4].sbx(), 8);
    assert_eq!(6 + 1 + p.code[6].sbx(), 8);
    // `and` bails when the operand tests false.
    assert_eq!(p.code[3].c(), 0);
    check_proto(&p);
}

#[test]
fn test_table_constructor_flushes_in_batches() {
    let keys: Vec<Option<Expr>> = (0..51).map(|_| None).collect();
    let values: Vec<Expr> = (0..51).map(int).collect();
    let table = Expr::Table {
        line: 1,
        last_line: 1,
        keys,
        values,
    };
    let p = chunk(vec![local(&["t"], vec![table])]);
    assert_eq!(p.code[0].opcode(), Some(Opcode::NewTable));
    assert_eq!(p.code[0].b(), 29); // 51 array slots, fb-encoded
    assert_eq!(p.code[0].c(), 0);
    let setlists: Vec<_> = p
        .code
        .iter()
        .filter(|i| i.opcode() == Some(Opcode::SetList))
        .collect();
    assert_eq!(setlists.len(), 2);
    assert_eq!((setlists[0].b(), setlists[0].c()), (50, 1));
    assert_eq!((setlists[1].b(), setlists[1].c()), (1, 2));
    check_proto(&p);
}

#[test]
fn test_keyed_table_entries_use_settable() {
    let table = Expr::Table {
        line: 1,
        last_line: 1,
        keys: vec![Some(Expr::Str {
            line: 1,
            value: "k".to_string(),
        })],
        values: vec![int(7)],
    };
    let p = chunk(vec![local(&["t"], vec![table])]);
    assert_eq!(
        ops(&p),
        vec![
            Opcode::NewTable,
            Opcode::LoadK,
            Opcode::LoadK,
            Opcode::SetTable,
            Opcode::Return,
        ]
    );
    check_proto(&p);
}

#[test]
fn test_constructor_value_keeps_table_register() {
    // The declared slot holds the table itself; the entry temporary must
    // claim the register above it, not overwrite the table.
    let table = Expr::Table {
        line: 1,
        last_line: 1,
        keys: vec![None],
        values: vec![int(5)],
    };
    let p = chunk(vec![local(&["t"], vec![table])]);
    assert_eq!(
        ops(&p),
        vec![
            Opcode::NewTable,
            Opcode::LoadK,
            Opcode::SetList,
            Opcode::Return,
        ]
    );
    assert_eq!(p.code[0].a(), 0);
    assert_eq!(p.code[1].a(), 1);
    assert_eq!((p.code[2].a(), p.code[2].b(), p.code[2].c()), (0, 1, 1));
    check_proto(&p);
}

#[test]
fn test_for_in_desugars_to_generic_for() {
    let iter = Expr::Call(call(name("pairs"), vec![name("t")]));
    let p = chunk(vec![Stat::ForIn {
        line_of_body: 1,
        names: vec!["k".to_string(), "v".to_string()],
        exps: vec![iter],
        body: block(vec![]),
    }]);
    let o = ops(&p);
    let tfc = o.iter().position(|&op| op == Opcode::TForCall).unwrap();
    assert_eq!(o[tfc + 1], Opcode::TForLoop);
    assert_eq!(p.code[tfc].c(), 2); // two loop variables
    let names: Vec<&str> = p.local_vars.iter().map(|v| v.name.as_str()).collect();
    assert!(names.contains(&"(for generator)"));
    assert!(names.contains(&"(for state)"));
    assert!(names.contains(&"(for control)"));
    assert!(names.contains(&"k"));
    check_proto(&p);
}

#[test]
fn test_method_call_uses_self() {
    let p = chunk(vec![
        local(
            &["o"],
            vec![Expr::Table {
                line: 1,
                last_line: 1,
                keys: vec![],
                values: vec![],
            }],
        ),
        Stat::Call(Call {
            line: 1,
            last_line: 1,
            callee: Box::new(name("o")),
            method: Some("m".to_string()),
            args: vec![int(1), int(2)],
        }),
    ]);
    assert_eq!(
        ops(&p),
        vec![
            Opcode::NewTable,
            Opcode::Move,
            Opcode::Self_,
            Opcode::LoadK,
            Opcode::LoadK,
            Opcode::Call,
            Opcode::Return,
        ]
    );
    let c = p.code[5];
    assert_eq!(c.b(), 4); // receiver + two arguments + 1
    assert_eq!(c.c(), 1); // results discarded
    check_proto(&p);
}

#[test]
fn test_method_arguments_land_above_receiver() {
    // SELF puts the receiver one past the callee register; arguments of
    // a call statement must start above it.
    let p = chunk(vec![
        local(
            &["o"],
            vec![Expr::Table {
                line: 1,
                last_line: 1,
                keys: vec![],
                values: vec![],
            }],
        ),
        Stat::Call(Call {
            line: 1,
            last_line: 1,
            callee: Box::new(name("o")),
            method: Some("m".to_string()),
            args: vec![int(7)],
        }),
    ]);
    assert_eq!(
        ops(&p),
        vec![
            Opcode::NewTable,
            Opcode::Move,
            Opcode::Self_,
            Opcode::LoadK,
            Opcode::Call,
            Opcode::Return,
        ]
    );
    let self_inst = p.code[2];
    assert_eq!((self_inst.a(), self_inst.b()), (1, 1));
    // Callee at 1, receiver at 2, argument at 3.
    assert_eq!(p.code[3].a(), 3);
    assert_eq!((p.code[4].a(), p.code[4].b(), p.code[4].c()), (1, 3, 1));
    check_proto(&p);
}

#[test]
fn test_return_forms() {
    // Bare return.
    let p = compile_chunk(&returning(vec![], vec![]), "@t").unwrap();
    assert_eq!(ops(&p), vec![Opcode::Return, Opcode::Return]);
    assert_eq!(p.code[0].b(), 1);

    // Returning a local reuses its register directly.
    let p = compile_chunk(
        &returning(vec![local(&["x"], vec![int(1)])], vec![name("x")]),
        "@t",
    )
    .unwrap();
    assert_eq!(ops(&p), vec![Opcode::LoadK, Opcode::Return, Opcode::Return]);
    assert_eq!(p.code[1].a(), 0);
    assert_eq!(p.code[1].b(), 2);

    // A lone call in return position becomes a tail call.
    let p = compile_chunk(
        &returning(vec![], vec![Expr::Call(call(name("f"), vec![]))]),
        "@t",
    )
    .unwrap();
    assert_eq!(
        ops(&p),
        vec![
            Opcode::GetTabUp,
            Opcode::TailCall,
            Opcode::Return,
            Opcode::Return,
        ]
    );
    assert_eq!(p.code[2].b(), 0); // return all results
    check_proto(&p);
}

#[test]
fn test_chunk_is_vararg() {
    let p = compile_chunk(&returning(vec![], vec![Expr::Vararg { line: 1 }]), "@t").unwrap();
    assert!(p.is_vararg);
    assert_eq!(
        ops(&p),
        vec![Opcode::VarArg, Opcode::Return, Opcode::Return]
    );
    assert_eq!(p.code[0].b(), 0); // all varargs
    check_proto(&p);
}

#[test]
fn test_vararg_rejected_in_fixed_function() {
    let inner = Expr::Function {
        line: 1,
        last_line: 1,
        params: vec!["a".to_string()],
        is_vararg: false,
        body: Box::new(returning(vec![], vec![Expr::Vararg { line: 4 }])),
    };
    let result = compile_chunk(&block(vec![local(&["f"], vec![inner])]), "@t");
    assert_eq!(
        result,
        Err(CompileError::VarargOutsideVarargFunction { line: 4 })
    );
}

#[test]
fn test_break_and_continue_outside_loop_rejected() {
    assert_eq!(
        compile_chunk(&block(vec![Stat::Break { line: 9 }]), "@t"),
        Err(CompileError::BreakOutsideLoop { line: 9 })
    );
    assert_eq!(
        compile_chunk(&block(vec![Stat::Continue { line: 9 }]), "@t"),
        Err(CompileError::ContinueOutsideLoop { line: 9 })
    );
}

#[test]
fn test_register_ceiling_reported() {
    let names: Vec<String> = (0..300).map(|i| format!("v{i}")).collect();
    let stat = Stat::LocalDecl {
        last_line: 1,
        names,
        values: vec![],
    };
    assert_eq!(
        compile_chunk(&block(vec![stat]), "@t"),
        Err(CompileError::TooManyRegisters)
    );
}

#[test]
fn test_nesting_limit_reported() {
    let mut body = block(vec![]);
    for _ in 0..201 {
        let f = Expr::Function {
            line: 2,
            last_line: 2,
            params: vec![],
            is_vararg: false,
            body: Box::new(body),
        };
        body = returning(vec![], vec![f]);
    }
    assert!(matches!(
        compile_chunk(&body, "@t"),
        Err(CompileError::NestingTooDeep { .. })
    ));
}

#[test]
fn test_if_chain_with_else() {
    let arms = vec![
        IfArm {
            init: vec![],
            cond: binary(BinOp::Lt, name("x"), int(0)),
            body: block(vec![Stat::Assign {
                last_line: 1,
                targets: vec![name("r")],
                values: vec![int(1)],
            }]),
        },
        IfArm {
            init: vec![],
            cond: Expr::True { line: 1 },
            body: block(vec![Stat::Assign {
                last_line: 1,
                targets: vec![name("r")],
                values: vec![int(2)],
            }]),
        },
    ];
    let p = chunk(vec![local(&["x"], vec![int(5)]), Stat::If { arms }]);
    let o = ops(&p);
    // One TEST per arm; the first arm's exit jump skips the else arm.
    assert_eq!(o.iter().filter(|&&op| op == Opcode::Test).count(), 2);
    assert!(o.contains(&Opcode::SetTabUp));
    check_proto(&p);
}

#[test]
fn test_multi_assignment_arity() {
    // a, b = f()  -- trailing call stretched to two results
    let p = chunk(vec![
        local(&["a", "b"], vec![int(1), int(2)]),
        Stat::Assign {
            last_line: 1,
            targets: vec![name("a"), name("b")],
            values: vec![Expr::Call(call(name("f"), vec![]))],
        },
    ]);
    let call_inst = p
        .code
        .iter()
        .find(|i| i.opcode() == Some(Opcode::Call))
        .unwrap();
    assert_eq!(call_inst.c(), 3); // two results
    let moves = p
        .code
        .iter()
        .filter(|i| i.opcode() == Some(Opcode::Move))
        .count();
    assert_eq!(moves, 2);
    check_proto(&p);
}

#[test]
fn test_composite_chunk_round_trips() {
    let inner = Expr::Function {
        line: 3,
        last_line: 5,
        params: vec!["n".to_string()],
        is_vararg: false,
        body: Box::new(returning(
            vec![],
            vec![binary(BinOp::Mul, name("n"), name("scale"))],
        )),
    };
    let table = Expr::Table {
        line: 1,
        last_line: 1,
        keys: vec![
            None,
            Some(Expr::Str {
                line: 1,
                value: "name".to_string(),
            }),
        ],
        values: vec![
            int(10),
            Expr::Str {
                line: 1,
                value: "marten".to_string(),
            },
        ],
    };
    let p = chunk(vec![
        local(&["scale"], vec![Expr::Float { line: 1, value: 2.5 }]),
        local(&["f"], vec![inner]),
        local(&["t"], vec![table]),
        Stat::Loop {
            init: vec![local(&["i"], vec![int(0)])],
            cond: binary(BinOp::Lt, name("i"), int(10)),
            step: Some(Box::new(Stat::Assign {
                last_line: 1,
                targets: vec![name("i")],
                values: vec![binary(BinOp::Add, name("i"), int(1))],
            })),
            body: block(vec![Stat::Call(call(name("f"), vec![name("i")]))]),
        },
    ]);
    check_proto(&p);

    let bytes = marten_bytecode::dump(&p);
    let back = marten_bytecode::undump(&bytes).unwrap();
    assert_eq!(back, p);
}
