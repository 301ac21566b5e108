//! Error taxonomy for the three pipeline stages.
//!
//! The Lowerer and Optimizer presume well-formed input (a prior type
//! checker already rejected anything these would reject); their error
//! variants exist only to turn an internal-contract violation into a
//! `Result` instead of a panic. The VM's error variants are the ones a
//! well-formed program can actually trigger at runtime and are the ones
//! [`crate::vm::ExecutionResult`] surfaces to callers.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LowerError {
    #[error("unresolved symbol: {0}")]
    UnresolvedSymbol(String),
    #[error("unknown aggregate type: {0}")]
    UnknownAggregate(String),
    #[error("internal lowering invariant violated: {0}")]
    Internal(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptimizeError {
    #[error("internal optimizer invariant violated: {0}")]
    Internal(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BytecodeError {
    #[error("label {0} does not resolve to any block")]
    UnresolvedLabel(String),
    #[error("internal bytecode generation invariant violated: {0}")]
    Internal(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("entry function not found: {0}")]
    EntryNotFound(String),
    #[error("unsupported opcode at instruction {0}")]
    UnsupportedOpcode(usize),
    #[error("array index {index} out of range for length {length}")]
    ArrayIndexOutOfRange { index: i64, length: usize },
    #[error("slot {0} does not hold an array")]
    NotAnArray(usize),
    #[error("parallel loop body violation: {0}")]
    ParallelBodyViolation(String),
    #[error("Thrown: {error} ({detail})")]
    ThrownByProgram { error: String, detail: String },
    #[error("parallel_for_begin at instruction {0} has no resolvable matching end")]
    UnresolvedParallelEnd(usize),
}
