//! CFG-IR lowering, bytecode generation, and the dual-path bytecode VM
//! for the Oaf language core.
//!
//! The pipeline is a straight line: [`ast::Program`] -> [`lower::lower`]
//! -> [`module::IrModule`] -> [`optimize::optimize`] (in place) ->
//! [`bytecode::generate`] -> [`bytecode::BytecodeProgram`] ->
//! [`vm::execute`]. Each stage's error type lives in [`error`] and is
//! named after the stage, not the failure.

pub mod arith;
pub mod ast;
pub mod bytecode;
pub mod error;
pub mod function;
pub mod instruction;
pub mod lower;
pub mod module;
pub mod optimize;
pub mod value;
pub mod vm;

pub use ast::Program;
pub use bytecode::BytecodeProgram;
pub use error::{BytecodeError, LowerError, OptimizeError, VmError};
pub use module::IrModule;
pub use optimize::{OptimizationLevel, OptimizationStats};
pub use vm::ExecutionResult;

/// Runs the full pipeline against `program` at the given optimization
/// level and executes `entry_name` (or the lowered module's own entry
/// function if `None`).
pub fn run(program: &Program, level: OptimizationLevel, entry_name: Option<&str>) -> Result<ExecutionResult, PipelineError> {
    let mut ir = lower::lower(program)?;
    optimize::optimize(&mut ir, level)?;
    let bytecode = bytecode::generate(&ir)?;
    Ok(vm::execute(&bytecode, entry_name))
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Lower(#[from] LowerError),
    #[error(transparent)]
    Optimize(#[from] OptimizeError),
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Program, Stmt, TopLevelItem};

    #[test]
    fn pipeline_runs_a_trivial_program_end_to_end() {
        let program = Program {
            items: vec![
                TopLevelItem::Statement(Stmt::VarDecl { declared_type: None, name: "a".into(), init: Expr::Int(1) }),
                TopLevelItem::Statement(Stmt::VarDecl { declared_type: None, name: "b".into(), init: Expr::Int(2) }),
                TopLevelItem::Statement(Stmt::Return(Some(Expr::Binary {
                    op: crate::instruction::BinaryOp::Add,
                    left: Box::new(Expr::Ident("a".into())),
                    right: Box::new(Expr::Ident("b".into())),
                }))),
            ],
        };
        let result = run(&program, OptimizationLevel::Standard, None).unwrap();
        assert!(result.success);
        match result.return_value {
            Some(vm::Value::Int(3)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
