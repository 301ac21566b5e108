//! Smoke-test harness: builds one of a handful of canned programs,
//! pushes it through the full pipeline, and prints the result. Not part
//! of the pipeline's public contract — picking a scenario by name is
//! the only argument handling this does.

use oaf_core::ast::{AssignOp, Expr, Program, Stmt, TopLevelItem};
use oaf_core::instruction::BinaryOp;
use oaf_core::OptimizationLevel;

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

/// `flux total=0; flux i=1; loop i<=10 => total+=i; i+=1;;; return total;`
fn scenario_sum_to_ten() -> Program {
    Program {
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
    }
}

/// `flux total=0; flux i=1000; loop i>0 => total+=i; i-=1;;; return total;`
fn scenario_countdown_sum() -> Program {
    Program {
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
    }
}

/// `flux a=1; flux b=2; return a+b;`
fn scenario_add_two_locals() -> Program {
    Program {
        items: vec![
            var("a", Expr::Int(1)),
            var("b", Expr::Int(2)),
            stmt(Stmt::Return(Some(binary(BinaryOp::Add, ident("a"), ident("b"))))),
        ],
    }
}

/// `flux arr = newarray 3; arr[0]=10; arr[1]=20; arr[2]=30; return arr[1];`
fn scenario_array_roundtrip() -> Program {
    Program {
        items: vec![
            var("arr", Expr::NewArray(Box::new(Expr::Int(3)))),
            stmt(Stmt::IndexAssign { target: ident("arr"), index: Expr::Int(0), op: AssignOp::Assign, value: Expr::Int(10) }),
            stmt(Stmt::IndexAssign { target: ident("arr"), index: Expr::Int(1), op: AssignOp::Assign, value: Expr::Int(20) }),
            stmt(Stmt::IndexAssign { target: ident("arr"), index: Expr::Int(2), op: AssignOp::Assign, value: Expr::Int(30) }),
            stmt(Stmt::Return(Some(Expr::Index { target: Box::new(ident("arr")), index: Box::new(Expr::Int(1)) }))),
        ],
    }
}

/// `flux arr = newarray 2; arr[5] = 1; return 0;`
fn scenario_array_out_of_range() -> Program {
    Program {
        items: vec![
            var("arr", Expr::NewArray(Box::new(Expr::Int(2)))),
            stmt(Stmt::IndexAssign { target: ident("arr"), index: Expr::Int(5), op: AssignOp::Assign, value: Expr::Int(1) }),
            stmt(Stmt::Return(Some(Expr::Int(0)))),
        ],
    }
}

/// `flux sum = 0; parallel loop i => 1000 => sum += i;;; return sum;`
fn scenario_parallel_sum() -> Program {
    Program {
        items: vec![
            var("sum", Expr::Int(0)),
            stmt(Stmt::ParallelLoop {
                iter_var: "i".into(),
                count: Expr::Int(1000),
                body: vec![Stmt::Assign { name: "sum".into(), op: AssignOp::Add, value: ident("i") }],
            }),
            stmt(Stmt::Return(Some(ident("sum")))),
        ],
    }
}

fn scenario_by_name(name: &str) -> Option<Program> {
    Some(match name {
        "sum_to_ten" => scenario_sum_to_ten(),
        "countdown_sum" => scenario_countdown_sum(),
        "add_two_locals" => scenario_add_two_locals(),
        "array_roundtrip" => scenario_array_roundtrip(),
        "array_out_of_range" => scenario_array_out_of_range(),
        "parallel_sum" => scenario_parallel_sum(),
        _ => return None,
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let name = std::env::args().nth(1).unwrap_or_else(|| "sum_to_ten".to_string());
    let Some(program) = scenario_by_name(&name) else {
        anyhow::bail!(
            "unknown scenario {:?}; choose one of: sum_to_ten, countdown_sum, add_two_locals, array_roundtrip, array_out_of_range, parallel_sum",
            name
        );
    };
    let result = oaf_core::run(&program, OptimizationLevel::Standard, None)?;
    if result.success {
        println!("Return: {}", result.return_value.map(|v| v.to_string()).unwrap_or_default());
    } else {
        println!("Failed: {}", result.error_message.unwrap_or_default());
    }
    Ok(())
}
