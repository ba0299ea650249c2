mod common;

use vase::distill::{distill_file, DistillConfig};
use vase::instrument::{instrument_module, InstrumentError};
use vase::interp::{no_externs, observation_sink, Interp, Value};
use vase::ir::{
    BinOp, BlockId, CmpOp, Const, FCmpOp, Func, Instr, InstrKind, Module, Operand, Terminator, Ty,
};
use vase::solve::{Query, Solver, VaseConfig, VaseSolver};
use vase::value_log::{Record, ValueLog, SINK_SYMBOL};

use common::EnumSolver;

/// `int classify(int x) { if (x < 10) return 1; return 0; }`, declared at
/// line 10 with the branch at line 42.
fn classify_module() -> Module {
    let mut func = Func::new("classify", 10);
    let x = func.add_param(Ty::I32, Some("x"));

    let entry = func.entry;
    let b_then = func.add_block();
    let b_else = func.add_block();

    let cmp = func.push_instr(
        entry,
        Instr::new(
            InstrKind::Cmp {
                op: CmpOp::SLt,
                args: [x.into(), Operand::int(10, 32)],
            },
            Ty::BOOL,
        )
        .at_line(42),
    );
    func.blocks[entry].term = Terminator::CondBr(cmp.into(), [b_then, b_else]);
    func.blocks[entry].term_line = Some(42);
    func.blocks[b_then].term = Terminator::Ret(Some(Operand::int(1, 32)));
    func.blocks[b_else].term = Terminator::Ret(Some(Operand::int(0, 32)));

    let mut module = Module::default();
    module.funcs.insert(func);

    module
}

fn only_func(module: &Module) -> &Func {
    module.funcs.values().next().unwrap()
}

/// Sink calls in a block, as `(loc, side, name, value operand)`.
fn sink_calls(func: &Func, block: BlockId) -> Vec<(i64, i64, String, Operand)> {
    func.blocks[block]
        .body
        .iter()
        .filter_map(|&id| match &func.instrs[id].kind {
            InstrKind::Call { callee, args } if callee == SINK_SYMBOL => {
                let int = |op: &Operand| match op {
                    Operand::Const(Const::Int { value, .. }) => *value,
                    other => panic!("expected an int immediate, got {other:?}"),
                };
                let name = match &args[2] {
                    Operand::Const(Const::Str(name)) => name.clone(),
                    other => panic!("expected a name immediate, got {other:?}"),
                };

                Some((int(&args[0]), int(&args[1]), name, args[3].clone()))
            }

            _ => None,
        })
        .collect()
}

#[test]
fn test_branch_observation_basics() {
    let mut module = classify_module();
    let stats = instrument_module(&mut module).unwrap();

    assert_eq!(stats.branches, 1);
    assert_eq!(stats.values_logged, 2);
    assert_eq!(stats.entry_args, 1);
    assert_eq!(stats.skipped_nondominating, 0);

    let func = only_func(&module);
    func.verify().unwrap();

    let entry_calls = sink_calls(func, func.entry);
    assert_eq!(entry_calls.len(), 1);
    assert_eq!(entry_calls[0].0, 10);
    assert_eq!(entry_calls[0].1, -1);
    assert_eq!(entry_calls[0].2, "x");

    let [b_then, b_else] = match func.blocks[func.entry].term {
        Terminator::CondBr(_, succs) => succs,
        ref other => panic!("unexpected terminator {other:?}"),
    };

    for (block, side) in [(b_then, 1), (b_else, 0)] {
        let calls = sink_calls(func, block);

        // The constant operand of the comparison is not observed.
        assert_eq!(calls.len(), 1, "expected one call on side {side}");
        assert_eq!(calls[0].0, 42);
        assert_eq!(calls[0].1, side);
        assert_eq!(calls[0].2, "x");
    }
}

#[test]
fn test_narrow_operands_are_zero_extended() {
    let mut func = Func::new("is_a", 3);
    let ch = func.add_param(Ty::I8, Some("ch"));

    let entry = func.entry;
    let b_then = func.add_block();
    let b_else = func.add_block();

    let cmp = func.push_instr(
        entry,
        Instr::new(
            InstrKind::Cmp {
                op: CmpOp::Eq,
                args: [ch.into(), Operand::int(65, 8)],
            },
            Ty::BOOL,
        )
        .at_line(4),
    );
    func.blocks[entry].term = Terminator::CondBr(cmp.into(), [b_then, b_else]);
    func.blocks[entry].term_line = Some(4);
    func.blocks[b_then].term = Terminator::Ret(None);
    func.blocks[b_else].term = Terminator::Ret(None);

    let mut module = Module::default();
    module.funcs.insert(func);
    instrument_module(&mut module).unwrap();

    let func = only_func(&module);
    func.verify().unwrap();

    let [b_then, _] = match func.blocks[func.entry].term {
        Terminator::CondBr(_, succs) => succs,
        ref other => panic!("unexpected terminator {other:?}"),
    };

    let calls = sink_calls(func, b_then);
    assert_eq!(calls.len(), 1);

    let cast = calls[0].3.as_instr().expect("logged value must be a cast");
    assert_eq!(func.instrs[cast].ty, Ty::I32);
    assert!(
        matches!(&func.instrs[cast].kind, InstrKind::ZExt { arg } if *arg == Operand::Instr(ch)),
        "expected a zero extension of the i8 operand"
    );
}

#[test]
fn test_wide_operands_are_truncated() {
    let mut func = Func::new("fits", 6);
    let len = func.add_param(Ty::I64, Some("len"));

    let entry = func.entry;
    let b_then = func.add_block();
    let b_else = func.add_block();

    let cmp = func.push_instr(
        entry,
        Instr::new(
            InstrKind::Cmp {
                op: CmpOp::ULt,
                args: [len.into(), Operand::int(4096, 64)],
            },
            Ty::BOOL,
        )
        .at_line(7),
    );
    func.blocks[entry].term = Terminator::CondBr(cmp.into(), [b_then, b_else]);
    func.blocks[entry].term_line = Some(7);
    func.blocks[b_then].term = Terminator::Ret(None);
    func.blocks[b_else].term = Terminator::Ret(None);

    let mut module = Module::default();
    module.funcs.insert(func);
    instrument_module(&mut module).unwrap();

    let func = only_func(&module);
    func.verify().unwrap();

    let [b_then, _] = match func.blocks[func.entry].term {
        Terminator::CondBr(_, succs) => succs,
        ref other => panic!("unexpected terminator {other:?}"),
    };

    let calls = sink_calls(func, b_then);
    assert_eq!(calls.len(), 1);

    let cast = calls[0].3.as_instr().expect("logged value must be a cast");
    assert_eq!(func.instrs[cast].ty, Ty::I32);
    assert!(
        matches!(&func.instrs[cast].kind, InstrKind::Trunc { arg } if *arg == Operand::Instr(len)),
        "expected a truncation of the i64 operand"
    );
}

#[test]
fn test_nondominating_value_is_skipped() {
    // A: if (p) goto E else goto B;
    // B: t = x + 1; if (t > 0) goto E else goto F;
    // E and F return. E has two predecessors, so t (defined in B) does not
    // reach insertion into E; the false side F still gets its observation.
    let mut func = Func::new("f", 1);
    let p = func.add_param(Ty::BOOL, Some("p"));
    let x = func.add_param(Ty::I32, Some("x"));

    let entry = func.entry;
    let b = func.add_block();
    let e = func.add_block();
    let f = func.add_block();

    func.blocks[entry].term = Terminator::CondBr(p.into(), [e, b]);
    func.blocks[entry].term_line = Some(2);

    let t = func.push_instr(
        b,
        Instr::new(
            InstrKind::Binary {
                op: BinOp::Add,
                args: [x.into(), Operand::int(1, 32)],
            },
            Ty::I32,
        ),
    );
    let cmp = func.push_instr(
        b,
        Instr::new(
            InstrKind::Cmp {
                op: CmpOp::SGt,
                args: [t.into(), Operand::int(0, 32)],
            },
            Ty::BOOL,
        ),
    );
    func.blocks[b].term = Terminator::CondBr(cmp.into(), [e, f]);
    func.blocks[b].term_line = Some(3);

    func.blocks[e].term = Terminator::Ret(Some(Operand::int(0, 32)));
    func.blocks[f].term = Terminator::Ret(Some(Operand::int(1, 32)));

    let mut module = Module::default();
    module.funcs.insert(func);
    let stats = instrument_module(&mut module).unwrap();

    assert_eq!(stats.branches, 2);
    assert_eq!(stats.skipped_nondominating, 1);

    let func = only_func(&module);
    func.verify().unwrap();

    // E observes only p (the entry branch condition, a parameter).
    let names = |block| {
        sink_calls(func, block)
            .into_iter()
            .map(|(_, _, name, _)| name)
            .collect::<Vec<_>>()
    };

    assert_eq!(names(e), ["p"]);
    assert_eq!(names(f), ["tmp_0"]);
    assert_eq!(names(b), ["p"]);
}

#[test]
fn test_insertion_skips_leading_phis() {
    // A: if (x < 0) goto D else goto C;
    // C: goto D;
    // D: m = phi [A: 1, C: 0]; if (m == x) goto E else goto F;
    let mut func = Func::new("g", 1);
    let x = func.add_param(Ty::I32, Some("x"));

    let entry = func.entry;
    let c = func.add_block();
    let d = func.add_block();
    let e = func.add_block();
    let f = func.add_block();

    let cmp = func.push_instr(
        entry,
        Instr::new(
            InstrKind::Cmp {
                op: CmpOp::SLt,
                args: [x.into(), Operand::int(0, 32)],
            },
            Ty::BOOL,
        )
        .at_line(5),
    );
    func.blocks[entry].term = Terminator::CondBr(cmp.into(), [d, c]);
    func.blocks[entry].term_line = Some(5);

    func.blocks[c].term = Terminator::Br(d);

    let m = func.push_instr(
        d,
        Instr::named(
            InstrKind::Phi {
                incoming: vec![(entry, Operand::int(1, 32)), (c, Operand::int(0, 32))],
            },
            Ty::I32,
            "m",
        ),
    );
    let cmp2 = func.push_instr(
        d,
        Instr::new(
            InstrKind::Cmp {
                op: CmpOp::Eq,
                args: [m.into(), x.into()],
            },
            Ty::BOOL,
        )
        .at_line(9),
    );
    func.blocks[d].term = Terminator::CondBr(cmp2.into(), [e, f]);
    func.blocks[d].term_line = Some(9);

    func.blocks[e].term = Terminator::Ret(Some(Operand::int(1, 32)));
    func.blocks[f].term = Terminator::Ret(Some(Operand::int(0, 32)));

    let mut module = Module::default();
    module.funcs.insert(func);
    instrument_module(&mut module).unwrap();

    let func = only_func(&module);
    func.verify().unwrap();

    // The phi stays first in its block; the observation of x from the entry
    // branch lands right after it.
    assert_eq!(func.blocks[d].body[0], m);
    let d_calls = sink_calls(func, d);
    assert_eq!(d_calls.len(), 1);
    assert_eq!((d_calls[0].0, d_calls[0].1, d_calls[0].2.as_str()), (5, 1, "x"));

    // Both operands of the second comparison are observed on each side.
    let e_names = sink_calls(func, e)
        .into_iter()
        .map(|call| call.2)
        .collect::<Vec<_>>();
    assert_eq!(e_names, ["m", "x"]);
}

#[test]
fn test_float_comparison_logs_markers() {
    let mut func = Func::new("h", 7);
    let a = func.add_param(Ty::Float, Some("a"));
    let b = func.add_param(Ty::Float, Some("b"));

    let entry = func.entry;
    let b_then = func.add_block();
    let b_else = func.add_block();

    let cmp = func.push_instr(
        entry,
        Instr::new(
            InstrKind::FCmp {
                op: FCmpOp::Lt,
                args: [a.into(), b.into()],
            },
            Ty::BOOL,
        )
        .at_line(8),
    );
    func.blocks[entry].term = Terminator::CondBr(cmp.into(), [b_then, b_else]);
    func.blocks[entry].term_line = Some(8);
    func.blocks[b_then].term = Terminator::Ret(None);
    func.blocks[b_else].term = Terminator::Ret(None);

    let mut module = Module::default();
    module.funcs.insert(func);
    let stats = instrument_module(&mut module).unwrap();

    assert_eq!(stats.markers, 6);
    assert_eq!(stats.values_logged, 0);
    assert_eq!(stats.entry_args, 0);

    let func = only_func(&module);
    func.verify().unwrap();

    for (block, side) in [(b_then, 1i64), (b_else, 0i64)] {
        let calls = sink_calls(func, block);
        let names = calls.iter().map(|call| call.2.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["fcmp_result", "a_fcmp", "b_fcmp"]);

        for (_, call_side, _, value) in &calls {
            assert_eq!(*call_side, side);
            assert_eq!(*value, Operand::int(side, 32));
        }
    }
}

#[test]
fn test_reinstrumentation_is_refused() {
    let mut module = classify_module();
    instrument_module(&mut module).unwrap();

    assert_eq!(
        instrument_module(&mut module),
        Err(InstrumentError::AlreadyInstrumented(SINK_SYMBOL.to_owned()))
    );
}

#[test]
fn test_verify_rejects_use_before_def() {
    let mut func = Func::new("broken", 1);
    let x = func.add_param(Ty::I32, Some("x"));

    let entry = func.entry;
    let unreachable = func.add_block();

    // t is defined in an unreachable block but used in the entry.
    let t = func.push_instr(
        unreachable,
        Instr::new(
            InstrKind::Binary {
                op: BinOp::Add,
                args: [x.into(), Operand::int(1, 32)],
            },
            Ty::I32,
        ),
    );
    func.blocks[unreachable].term = Terminator::Ret(None);

    func.push_instr(
        entry,
        Instr::new(
            InstrKind::Binary {
                op: BinOp::Add,
                args: [t.into(), Operand::int(2, 32)],
            },
            Ty::I32,
        ),
    );
    func.blocks[entry].term = Terminator::Ret(None);

    assert!(func.verify().is_err());
}

#[test]
fn test_instrumentation_preserves_semantics() {
    let pristine = classify_module();
    let mut instrumented = pristine.clone();
    instrument_module(&mut instrumented).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let log = ValueLog::new(dir.path().join("vase_value_log.txt"));

    let (pristine_id, _) = pristine.func_by_name("classify").unwrap();
    let (instrumented_id, _) = instrumented.func_by_name("classify").unwrap();

    for x in -5..15 {
        let mut silent = no_externs();
        let expected = Interp::new(&pristine, &mut silent)
            .run(pristine_id, &[Value::i32(x)])
            .unwrap();

        let mut sink = observation_sink(&log);
        let actual = Interp::new(&instrumented, &mut sink)
            .run(instrumented_id, &[Value::i32(x)])
            .unwrap();

        assert_eq!(actual, expected, "divergence on input {x}");
    }

    // The only observable difference is the log.
    let contents = std::fs::read_to_string(log.path()).unwrap();
    assert!(!contents.is_empty());
}

#[test]
fn test_pipeline_from_runs_to_injection() {
    let mut module = classify_module();
    instrument_module(&mut module).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("vase_value_log.txt");
    let log = ValueLog::new(&log_path);
    let (func_id, _) = module.func_by_name("classify").unwrap();

    // Three runs take the true side with x = 7, three the false side with
    // x = 12.
    for x in [7, 7, 7, 12, 12, 12] {
        let mut sink = observation_sink(&log);
        Interp::new(&module, &mut sink)
            .run(func_id, &[Value::i32(x)])
            .unwrap();
    }

    let contents = std::fs::read_to_string(&log_path).unwrap();

    for line in contents.lines() {
        line.parse::<Record>().expect("log lines parse as records");
    }

    let (map, summary) = distill_file(&log_path, &DistillConfig::default());
    assert_eq!(summary.entry_skipped, 6);
    assert_eq!(map.get("loc:42:branch:1").unwrap()["x"][0].value, "7");
    assert_eq!(map.get("loc:42:branch:0").unwrap()["x"][0].value, "12");

    let map_path = dir.path().join("limitedValuedMap.json");
    std::fs::write(&map_path, map.to_json()).unwrap();

    // A query tagged with the true side of the branch gets steered toward
    // the concretely observed value.
    let mut solver = VaseSolver::new(EnumSolver::new(), VaseConfig::with_map(&map_path));
    let array = vase::expr::Array::new("loc:42:branch:1_input", 1);
    let query = Query::new(
        vec![vase::expr::Expr::eq(
            vase::expr::Expr::read_at(&array, 0),
            vase::expr::Expr::read_at(&array, 0),
        )],
        vase::expr::Expr::bool(true),
    );

    let values = solver.initial_values(&query, &[array.clone()]).unwrap();
    assert_eq!(values, Some(vec![vec![7]]));
}
