//! Full `lower -> optimize -> generate -> execute` pipeline, exercised
//! against hand-built programs for the pipeline's canonical end-to-end
//! scenarios, plus property-style checks on the guarantees the pipeline
//! stages are supposed to hold by construction.

use oaf_core::ast::{AssignOp, Expr, Program, Stmt, TopLevelItem};
use oaf_core::instruction::BinaryOp;
use oaf_core::vm::Value;
use oaf_core::{lower, optimize, vm, OptimizationLevel};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn var(name: &str, init: Expr) -> TopLevelItem {
    TopLevelItem::Statement(Stmt::VarDecl { declared_type: None, name: name.into(), init })
}

fn stmt(s: Stmt) -> TopLevelItem {
    TopLevelItem::Statement(s)
}

fn ident(name: &str) -> Expr {
    Expr::Ident(name.into())
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
}

fn run_pipeline(program: &Program, level: OptimizationLevel) -> vm::ExecutionResult {
    let mut ir = lower::lower(program).expect("lowering a well-formed program never fails");
    optimize::optimize(&mut ir, level).expect("optimizing a valid module never fails");
    let bc = oaf_core::bytecode::generate(&ir).expect("generating from a valid module never fails");
    vm::execute(&bc, None)
}

fn int_return(result: &vm::ExecutionResult) -> i64 {
    match &result.return_value {
        Some(Value::Int(i)) => *i,
        other => panic!("expected Int return, got {:?}", other),
    }
}

#[test]
fn sum_one_to_ten_via_a_while_loop() {
    let program = Program {
        items: vec![
            var("total", Expr::Int(0)),
            var("i", Expr::Int(1)),
            stmt(Stmt::Loop {
                cond: binary(BinaryOp::Le, ident("i"), Expr::Int(10)),
                body: vec![
                    Stmt::Assign { name: "total".into(), op: AssignOp::Add, value: ident("i") },
                    Stmt::Assign { name: "i".into(), op: AssignOp::Add, value: Expr::Int(1) },
                ],
            }),
            stmt(Stmt::Return(Some(ident("total")))),
        ],
    };
    let result = run_pipeline(&program, OptimizationLevel::Standard);
    assert!(result.success);
    assert_eq!(int_return(&result), 55);
}

#[test]
fn countdown_from_a_thousand_takes_the_fast_path() {
    vm::clear_fastpath_cache();
    let program = Program {
        items: vec![
            var("total", Expr::Int(0)),
            var("i", Expr::Int(1000)),
            stmt(Stmt::Loop {
                cond: binary(BinaryOp::Gt, ident("i"), Expr::Int(0)),
                body: vec![
                    Stmt::Assign { name: "total".into(), op: AssignOp::Add, value: ident("i") },
                    Stmt::Assign { name: "i".into(), op: AssignOp::Sub, value: Expr::Int(1) },
                ],
            }),
            stmt(Stmt::Return(Some(ident("total")))),
        ],
    };
    let result = run_pipeline(&program, OptimizationLevel::Standard);
    assert!(result.success);
    assert_eq!(int_return(&result), 500_500);
}

#[test]
fn add_two_locals() {
    let program = Program {
        items: vec![
            var("a", Expr::Int(1)),
            var("b", Expr::Int(2)),
            stmt(Stmt::Return(Some(binary(BinaryOp::Add, ident("a"), ident("b"))))),
        ],
    };
    let result = run_pipeline(&program, OptimizationLevel::None);
    assert!(result.success);
    assert_eq!(int_return(&result), 3);
}

#[test]
fn array_writes_and_reads_round_trip() {
    let program = Program {
        items: vec![
            var("arr", Expr::NewArray(Box::new(Expr::Int(3)))),
            stmt(Stmt::IndexAssign { target: ident("arr"), index: Expr::Int(0), op: AssignOp::Assign, value: Expr::Int(10) }),
            stmt(Stmt::IndexAssign { target: ident("arr"), index: Expr::Int(1), op: AssignOp::Assign, value: Expr::Int(20) }),
            stmt(Stmt::IndexAssign { target: ident("arr"), index: Expr::Int(2), op: AssignOp::Assign, value: Expr::Int(30) }),
            stmt(Stmt::Return(Some(Expr::Index { target: Box::new(ident("arr")), index: Box::new(Expr::Int(1)) }))),
        ],
    };
    let result = run_pipeline(&program, OptimizationLevel::Standard);
    assert!(result.success);
    assert_eq!(int_return(&result), 20);
}

#[test]
fn array_index_out_of_range_fails_with_a_clear_message() {
    let program = Program {
        items: vec![
            var("arr", Expr::NewArray(Box::new(Expr::Int(2)))),
            stmt(Stmt::IndexAssign { target: ident("arr"), index: Expr::Int(5), op: AssignOp::Assign, value: Expr::Int(1) }),
            stmt(Stmt::Return(Some(Expr::Int(0)))),
        ],
    };
    let result = run_pipeline(&program, OptimizationLevel::Standard);
    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("out of range"));
}

#[test]
fn parallel_loop_reduction_sums_zero_through_999() {
    let program = Program {
        items: vec![
            var("sum", Expr::Int(0)),
            stmt(Stmt::ParallelLoop {
                iter_var: "i".into(),
                count: Expr::Int(1000),
                body: vec![Stmt::Assign { name: "sum".into(), op: AssignOp::Add, value: ident("i") }],
            }),
            stmt(Stmt::Return(Some(ident("sum")))),
        ],
    };
    let result = run_pipeline(&program, OptimizationLevel::Standard);
    assert!(result.success);
    assert_eq!(int_return(&result), 499_500);
}

#[test]
fn every_optimization_level_agrees_on_the_same_answer() {
    let program = Program {
        items: vec![
            var("total", Expr::Int(0)),
            var("i", Expr::Int(1)),
            stmt(Stmt::Loop {
                cond: binary(BinaryOp::Le, ident("i"), Expr::Int(25)),
                body: vec![
                    Stmt::Assign { name: "total".into(), op: AssignOp::Add, value: ident("i") },
                    Stmt::Assign { name: "i".into(), op: AssignOp::Add, value: Expr::Int(1) },
                ],
            }),
            stmt(Stmt::Return(Some(ident("total")))),
        ],
    };
    for level in [OptimizationLevel::None, OptimizationLevel::Basic, OptimizationLevel::Standard] {
        let result = run_pipeline(&program, level);
        assert!(result.success);
        assert_eq!(int_return(&result), 325, "level {:?} disagreed", level);
    }
}

#[test]
fn division_by_a_folded_zero_constant_saturates_instead_of_panicking() {
    let program = Program {
        items: vec![
            var("zero", Expr::Int(0)),
            stmt(Stmt::Return(Some(binary(BinaryOp::Div, Expr::Int(10), ident("zero"))))),
        ],
    };
    let result = run_pipeline(&program, OptimizationLevel::Standard);
    assert!(result.success);
    assert_eq!(int_return(&result), 0);
}

proptest! {
    /// Builds a chain of variable declarations where each step either
    /// assigns a fresh constant or directly copies the previous
    /// variable, then returns the last one. Copy propagation and
    /// dead-store elimination must never change which value comes out
    /// the other end, no matter how constants and copies interleave.
    #[test]
    fn copy_propagation_preserves_value_across_interleaved_assignments(
        steps in prop::collection::vec((any::<bool>(), -1000i64..1000i64), 1..12)
    ) {
        let mut items = Vec::new();
        let mut expected: i64 = 0;
        let mut prev_name: Option<String> = None;
        for (i, (copy_previous, value)) in steps.iter().enumerate() {
            let name = format!("v{i}");
            let init = match (&prev_name, copy_previous) {
                (Some(prev), true) => ident(prev),
                _ => Expr::Int(*value),
            };
            if !(*copy_previous && prev_name.is_some()) {
                expected = *value;
            }
            items.push(var(&name, init));
            prev_name = Some(name);
        }
        items.push(stmt(Stmt::Return(Some(ident(prev_name.as_ref().unwrap())))));
        let program = Program { items };

        let unoptimized = run_pipeline(&program, OptimizationLevel::None);
        let optimized = run_pipeline(&program, OptimizationLevel::Standard);
        prop_assert!(unoptimized.success);
        prop_assert!(optimized.success);
        assert_eq!(int_return(&unoptimized), expected);
        assert_eq!(int_return(&optimized), expected);
    }
}
