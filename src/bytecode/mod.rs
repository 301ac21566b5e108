//! The flat, slot-addressed bytecode format the generator emits and the
//! VM executes.

mod generator;
mod peephole;

pub use generator::generate;

/// Decodes a `Cast` instruction's target-type operand. Shared by the
/// generator (encoding) and the VM's fast path (eligibility + execution).
pub(crate) fn target_kind(kind: i32) -> IrType {
    generator::ir_type_from_kind(kind)
}

pub(crate) fn binary_op(kind: i32) -> crate::instruction::BinaryOp {
    generator::binary_op_from_kind(kind)
}

pub(crate) fn unary_op(kind: i32) -> crate::instruction::UnaryOp {
    generator::unary_op_from_kind(kind)
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{ConstPayload, IrType};

/// Every opcode the generator can emit. `JumpIfBinaryIntTrue` and
/// `JumpIfBinaryIntConstRightTrue` only ever appear after the peephole
/// pass has fused a compare with its following branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    Nop,
    LoadConst,
    Move,
    Unary,
    Binary,
    BinaryInt,
    BinaryIntConstRight,
    JumpIfBinaryIntTrue,
    JumpIfBinaryIntConstRightTrue,
    Cast,
    Jump,
    JumpIfTrue,
    JumpIfFalse,
    Print,
    Throw,
    ArrayCreate,
    ArrayGet,
    ArraySet,
    ParallelForBegin,
    ParallelForEnd,
    ParallelReduceAdd,
    Return,
}

/// One bytecode instruction: an opcode plus up to four operands. The
/// meaning of each operand slot is opcode-dependent (see the table in
/// `generator`); `-1` marks an unused or absent operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instr {
    pub op: Opcode,
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub d: i32,
}

impl Instr {
    pub fn new(op: Opcode) -> Self {
        Self { op, a: -1, b: -1, c: -1, d: -1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytecodeFunction {
    pub name: String,
    pub slot_count: usize,
    /// `(type, literal)` pairs in first-use order; interned so identical
    /// literals of the same type share one index.
    pub constants: Vec<(IrType, ConstPayload)>,
    pub instructions: Vec<Instr>,
    /// `None` means "dynamic" — the function's `Return`s do not all
    /// agree on one of `Int`/`Bool`.
    pub inferred_return_type: Option<IrType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytecodeProgram {
    pub entry: String,
    pub functions: Vec<BytecodeFunction>,
}

impl BytecodeProgram {
    pub fn get_function(&self, name: &str) -> Option<&BytecodeFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {} {}", self.op, self.a, self.b, self.c, self.d)
    }
}

impl fmt::Display for BytecodeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fn {} (slots={}) {{", self.name, self.slot_count)?;
        for (ix, instr) in self.instructions.iter().enumerate() {
            writeln!(f, "  {:4}: {}", ix, instr)?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for BytecodeProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for function in &self.functions {
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}
