//! IR instruction and basic-block model for the Oaf language core.

use std::fmt;
use serde::{Deserialize, Serialize};
use crate::value::{IrType, IrValue};

/// A label identifying a basic block, unique within its function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label(pub String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".{}", self.0)
    }
}

/// Binary operators. `Xand` is the logical/bitwise complement of `Xor`
/// (true exactly when both operands agree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Root,
    Shl,
    Shr,
    UShl,
    UShr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitOr,
    BitXor,
    BitXand,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    LogicalXand,
}

impl BinaryOp {
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
                | BinaryOp::BitXand
                | BinaryOp::LogicalAnd
                | BinaryOp::LogicalOr
                | BinaryOp::LogicalXor
                | BinaryOp::LogicalXand
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::Root => "root",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::UShl => "ushl",
            BinaryOp::UShr => "ushr",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::BitAnd => "band",
            BinaryOp::BitOr => "bor",
            BinaryOp::BitXor => "bxor",
            BinaryOp::BitXand => "bxand",
            BinaryOp::LogicalAnd => "and",
            BinaryOp::LogicalOr => "or",
            BinaryOp::LogicalXor => "xor",
            BinaryOp::LogicalXand => "xand",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Identity,
    Negate,
    LogicalNot,
    BitwiseNot,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOp::Identity => "id",
            UnaryOp::Negate => "neg",
            UnaryOp::LogicalNot => "not",
            UnaryOp::BitwiseNot => "bnot",
        };
        write!(f, "{}", s)
    }
}

/// IR instructions. Each non-terminator instruction that defines a
/// `Temporary` has no side effects; writes to `Variable` destinations,
/// array stores, `Print`, `Throw`, every `ParallelFor*`/`ParallelReduceAdd`,
/// and every terminator do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Assign { dst: IrValue, src: IrValue },
    Unary { dst: IrValue, op: UnaryOp, x: IrValue },
    Binary { dst: IrValue, op: BinaryOp, x: IrValue, y: IrValue },
    Cast { dst: IrValue, src: IrValue, target_type: IrType },
    Print { x: IrValue },
    ArrayCreate { dst: IrValue, length: IrValue },
    ArrayGet { dst: IrValue, arr: IrValue, idx: IrValue },
    ArraySet { arr: IrValue, idx: IrValue, v: IrValue },
    ParallelForBegin { count: IrValue, iter_var: IrValue },
    ParallelForEnd,
    ParallelReduceAdd { target: IrValue, contribution: IrValue },

    Branch { cond: IrValue, true_label: Label, false_label: Label },
    Jump { label: Label },
    Return { value: Option<IrValue> },
    Throw { error: Option<IrValue>, detail: Option<IrValue> },
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Branch { .. } | Instruction::Jump { .. } | Instruction::Return { .. } | Instruction::Throw { .. }
        )
    }

    pub fn has_side_effects(&self) -> bool {
        match self {
            Instruction::Assign { dst, .. } => dst.is_variable(),
            Instruction::Unary { dst, .. } | Instruction::Binary { dst, .. } | Instruction::Cast { dst, .. } => dst.is_variable(),
            Instruction::ArrayGet { dst, .. } => dst.is_variable(),
            Instruction::ArrayCreate { dst, .. } => dst.is_variable(),
            Instruction::Print { .. }
            | Instruction::ArraySet { .. }
            | Instruction::ParallelForBegin { .. }
            | Instruction::ParallelForEnd
            | Instruction::ParallelReduceAdd { .. }
            | Instruction::Branch { .. }
            | Instruction::Jump { .. }
            | Instruction::Return { .. }
            | Instruction::Throw { .. } => true,
        }
    }

    /// The temporary this instruction defines, if any (never a `Variable`:
    /// variable destinations are reported through `has_side_effects`).
    pub fn defined_temporary(&self) -> Option<&str> {
        let dst = match self {
            Instruction::Assign { dst, .. }
            | Instruction::Unary { dst, .. }
            | Instruction::Binary { dst, .. }
            | Instruction::Cast { dst, .. }
            | Instruction::ArrayCreate { dst, .. }
            | Instruction::ArrayGet { dst, .. } => dst,
            _ => return None,
        };
        match dst {
            IrValue::Temporary(_, name) => Some(name.as_str()),
            _ => None,
        }
    }

    /// All read operands, in evaluation order. Destinations of
    /// `Assign`/`Unary`/`Binary`/`Cast`/`ArrayCreate`/`ArrayGet` are
    /// writes, never reads, and are excluded.
    pub fn reads(&self) -> Vec<&IrValue> {
        match self {
            Instruction::Assign { src, .. } => vec![src],
            Instruction::Unary { x, .. } => vec![x],
            Instruction::Binary { x, y, .. } => vec![x, y],
            Instruction::Cast { src, .. } => vec![src],
            Instruction::Print { x } => vec![x],
            Instruction::ArrayCreate { length, .. } => vec![length],
            Instruction::ArrayGet { arr, idx, .. } => vec![arr, idx],
            Instruction::ArraySet { arr, idx, v } => vec![arr, idx, v],
            Instruction::ParallelForBegin { count, .. } => vec![count],
            Instruction::ParallelForEnd => vec![],
            Instruction::ParallelReduceAdd { target, contribution } => vec![target, contribution],
            Instruction::Branch { cond, .. } => vec![cond],
            Instruction::Jump { .. } => vec![],
            Instruction::Return { value } => value.iter().collect(),
            Instruction::Throw { error, detail } => error.iter().chain(detail.iter()).collect(),
        }
    }

    /// Rewrite every read operand in place via `f`. Used by copy
    /// propagation and constant folding.
    pub fn rewrite_reads(&mut self, mut f: impl FnMut(&IrValue) -> Option<IrValue>) {
        fn maybe(v: &mut IrValue, f: &mut dyn FnMut(&IrValue) -> Option<IrValue>) {
            if let Some(replacement) = f(v) {
                *v = replacement;
            }
        }
        match self {
            Instruction::Assign { src, .. } => maybe(src, &mut f),
            Instruction::Unary { x, .. } => maybe(x, &mut f),
            Instruction::Binary { x, y, .. } => {
                maybe(x, &mut f);
                maybe(y, &mut f);
            }
            Instruction::Cast { src, .. } => maybe(src, &mut f),
            Instruction::Print { x } => maybe(x, &mut f),
            Instruction::ArrayCreate { length, .. } => maybe(length, &mut f),
            Instruction::ArrayGet { arr, idx, .. } => {
                maybe(arr, &mut f);
                maybe(idx, &mut f);
            }
            Instruction::ArraySet { arr, idx, v } => {
                maybe(arr, &mut f);
                maybe(idx, &mut f);
                maybe(v, &mut f);
            }
            Instruction::ParallelForBegin { count, .. } => maybe(count, &mut f),
            Instruction::ParallelForEnd => {}
            Instruction::ParallelReduceAdd { contribution, .. } => maybe(contribution, &mut f),
            Instruction::Branch { cond, .. } => maybe(cond, &mut f),
            Instruction::Jump { .. } => {}
            Instruction::Return { value } => {
                if let Some(v) = value {
                    maybe(v, &mut f);
                }
            }
            Instruction::Throw { error, detail } => {
                if let Some(e) = error {
                    maybe(e, &mut f);
                }
                if let Some(d) = detail {
                    maybe(d, &mut f);
                }
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Assign { dst, src } => write!(f, "  {} = {}", dst, src),
            Instruction::Unary { dst, op, x } => write!(f, "  {} = {} {}", dst, op, x),
            Instruction::Binary { dst, op, x, y } => write!(f, "  {} = {} {} {}", dst, op, x, y),
            Instruction::Cast { dst, src, target_type } => write!(f, "  {} = cast {} as {}", dst, src, target_type),
            Instruction::Print { x } => write!(f, "  print {}", x),
            Instruction::ArrayCreate { dst, length } => write!(f, "  {} = newarray {}", dst, length),
            Instruction::ArrayGet { dst, arr, idx } => write!(f, "  {} = {}[{}]", dst, arr, idx),
            Instruction::ArraySet { arr, idx, v } => write!(f, "  {}[{}] = {}", arr, idx, v),
            Instruction::ParallelForBegin { count, iter_var } => write!(f, "  parallel_for_begin {} -> {}", count, iter_var),
            Instruction::ParallelForEnd => write!(f, "  parallel_for_end"),
            Instruction::ParallelReduceAdd { target, contribution } => write!(f, "  {} += {} (reduce)", target, contribution),
            Instruction::Branch { cond, true_label, false_label } => write!(f, "  branch {} {} {}", cond, true_label, false_label),
            Instruction::Jump { label } => write!(f, "  jump {}", label),
            Instruction::Return { value } => match value {
                Some(v) => write!(f, "  return {}", v),
                None => write!(f, "  return"),
            },
            Instruction::Throw { error, detail } => {
                write!(f, "  throw")?;
                if let Some(e) = error {
                    write!(f, " {}", e)?;
                }
                if let Some(d) = detail {
                    write!(f, " {}", d)?;
                }
                Ok(())
            }
        }
    }
}

/// A maximal straight-line sequence of instructions. A block is
/// *terminated* once its final instruction is a terminator; pushing past
/// that point is a lowerer bug and is rejected rather than silently
/// accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub label: Label,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(label: Label) -> Self {
        Self { label, instructions: Vec::new() }
    }

    pub fn is_terminated(&self) -> bool {
        self.instructions.last().is_some_and(Instruction::is_terminator)
    }

    /// Append an instruction. Returns `false` without appending if the
    /// block is already terminated.
    #[must_use]
    pub fn push(&mut self, instruction: Instruction) -> bool {
        if self.is_terminated() {
            return false;
        }
        self.instructions.push(instruction);
        true
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }

    /// Labels this block may transfer control to.
    pub fn successors(&self) -> Vec<&Label> {
        match self.terminator() {
            Some(Instruction::Branch { true_label, false_label, .. }) => vec![true_label, false_label],
            Some(Instruction::Jump { label }) => vec![label],
            _ => vec![],
        }
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.label.0)?;
        for instruction in &self.instructions {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::IrValue;

    #[test]
    fn block_terminates_and_rejects_further_pushes() {
        let mut block = BasicBlock::new(Label::new("start"));
        assert!(!block.is_terminated());
        assert!(block.push(Instruction::Print { x: IrValue::int(1) }));
        assert!(block.push(Instruction::Return { value: None }));
        assert!(block.is_terminated());
        assert!(!block.push(Instruction::Print { x: IrValue::int(2) }));
        assert_eq!(block.instructions.len(), 2);
    }

    #[test]
    fn successors_cover_branch_and_jump() {
        let mut block = BasicBlock::new(Label::new("cond"));
        block.push(Instruction::Branch {
            cond: IrValue::boolean(true),
            true_label: Label::new("then"),
            false_label: Label::new("else"),
        });
        let succ: Vec<&str> = block.successors().iter().map(|l| l.0.as_str()).collect();
        assert_eq!(succ, vec!["then", "else"]);
    }

    #[test]
    fn temporary_writes_have_no_side_effects_variable_writes_do() {
        let tmp_write = Instruction::Assign { dst: IrValue::Temporary(IrType::Int, "t0".into()), src: IrValue::int(1) };
        assert!(!tmp_write.has_side_effects());
        let var_write = Instruction::Assign { dst: IrValue::Variable(IrType::Int, "x".into()), src: IrValue::int(1) };
        assert!(var_write.has_side_effects());
    }

    #[test]
    fn reads_exclude_destinations() {
        let inst = Instruction::Binary {
            dst: IrValue::Temporary(IrType::Int, "t0".into()),
            op: BinaryOp::Add,
            x: IrValue::Variable(IrType::Int, "a".into()),
            y: IrValue::Variable(IrType::Int, "b".into()),
        };
        let reads = inst.reads();
        assert_eq!(reads.len(), 2);
        assert!(reads.iter().all(|v| v.is_variable()));
    }
}
