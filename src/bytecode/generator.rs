//! AST-free lowering from `IrModule` to `BytecodeProgram`: slot
//! allocation, constant-pool interning, label fix-up, integer
//! specialization, and (via [`super::peephole`]) the post-emit peephole
//! pass.

use std::collections::HashMap;

use super::peephole;
use super::{BytecodeFunction, BytecodeProgram, Instr, Opcode};
use crate::error::BytecodeError;
use crate::function::IrFunction;
use crate::instruction::{BinaryOp, Instruction, Label, UnaryOp};
use crate::module::IrModule;
use crate::value::{ConstPayload, IrType, IrValue};

pub fn generate(module: &IrModule) -> Result<BytecodeProgram, BytecodeError> {
    let mut functions = Vec::with_capacity(module.functions.len());
    for function in &module.functions {
        functions.push(generate_function(function)?);
    }
    let entry = module.entry_function_name().unwrap_or("main").to_string();
    Ok(BytecodeProgram { entry, functions })
}

pub(crate) fn ir_type_kind(ty: IrType) -> i32 {
    match ty {
        IrType::Void => 0,
        IrType::Int => 1,
        IrType::Float => 2,
        IrType::Bool => 3,
        IrType::Char => 4,
        IrType::String => 5,
        IrType::Unknown => 6,
    }
}

pub(crate) fn ir_type_from_kind(kind: i32) -> IrType {
    match kind {
        0 => IrType::Void,
        1 => IrType::Int,
        2 => IrType::Float,
        3 => IrType::Bool,
        4 => IrType::Char,
        5 => IrType::String,
        _ => IrType::Unknown,
    }
}

fn binary_op_kind(op: BinaryOp) -> i32 {
    op as i32
}

pub(crate) fn binary_op_from_kind(kind: i32) -> BinaryOp {
    const ORDER: &[BinaryOp] = &[
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Mod,
        BinaryOp::Root,
        BinaryOp::Shl,
        BinaryOp::Shr,
        BinaryOp::UShl,
        BinaryOp::UShr,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::BitAnd,
        BinaryOp::BitOr,
        BinaryOp::BitXor,
        BinaryOp::BitXand,
        BinaryOp::LogicalAnd,
        BinaryOp::LogicalOr,
        BinaryOp::LogicalXor,
        BinaryOp::LogicalXand,
    ];
    ORDER[kind as usize]
}

fn unary_op_kind(op: UnaryOp) -> i32 {
    op as i32
}

pub(crate) fn unary_op_from_kind(kind: i32) -> UnaryOp {
    const ORDER: &[UnaryOp] = &[UnaryOp::Identity, UnaryOp::Negate, UnaryOp::LogicalNot, UnaryOp::BitwiseNot];
    ORDER[kind as usize]
}

enum FixupTarget {
    A,
    B,
    D,
}

struct FnBuilder {
    next_slot: i32,
    slots: HashMap<String, i32>,
    constants: Vec<(IrType, ConstPayload)>,
    const_index: HashMap<String, usize>,
    instructions: Vec<Instr>,
    fixups: Vec<(usize, FixupTarget, Label)>,
    block_starts: HashMap<Label, usize>,
    parallel_begin_stack: Vec<usize>,
}

impl FnBuilder {
    fn new() -> Self {
        Self {
            next_slot: 0,
            slots: HashMap::new(),
            constants: Vec::new(),
            const_index: HashMap::new(),
            instructions: Vec::new(),
            fixups: Vec::new(),
            block_starts: HashMap::new(),
            parallel_begin_stack: Vec::new(),
        }
    }

    fn fresh_slot(&mut self) -> i32 {
        let s = self.next_slot;
        self.next_slot += 1;
        s
    }

    fn named_slot(&mut self, name: &str) -> i32 {
        if let Some(&s) = self.slots.get(name) {
            return s;
        }
        let s = self.fresh_slot();
        self.slots.insert(name.to_string(), s);
        s
    }

    fn intern_const(&mut self, ty: IrType, payload: &ConstPayload) -> usize {
        let key = format!("{}:{}", ir_type_kind(ty), payload.intern_key());
        if let Some(&ix) = self.const_index.get(&key) {
            return ix;
        }
        let ix = self.constants.len();
        self.constants.push((ty, payload.clone()));
        self.const_index.insert(key, ix);
        ix
    }

    /// Slot for a destination operand (always `Variable`/`Temporary`).
    fn dst_slot(&mut self, v: &IrValue) -> i32 {
        self.named_slot(v.name().expect("destination operands are never constants"))
    }

    /// Slot for a read operand. A `Constant` never aliases an existing
    /// slot: it gets a fresh one and an emitted `LoadConst`.
    fn operand_slot(&mut self, v: &IrValue) -> i32 {
        match v {
            IrValue::Variable(_, name) | IrValue::Temporary(_, name) => self.named_slot(name),
            IrValue::Constant(ty, payload) => {
                let cix = self.intern_const(*ty, payload);
                let dst = self.fresh_slot();
                let mut instr = Instr::new(Opcode::LoadConst);
                instr.a = dst;
                instr.b = cix as i32;
                self.instructions.push(instr);
                dst
            }
        }
    }

    fn push(&mut self, instr: Instr) -> usize {
        self.instructions.push(instr);
        self.instructions.len() - 1
    }

    fn fixup(&mut self, ix: usize, target: FixupTarget, label: Label) {
        self.fixups.push((ix, target, label));
    }

    fn codegen_block_instruction(&mut self, instr: &Instruction) -> Result<(), BytecodeError> {
        match instr {
            Instruction::Assign { dst, src } => {
                if let IrValue::Constant(ty, payload) = src {
                    let cix = self.intern_const(*ty, payload);
                    let dst_slot = self.dst_slot(dst);
                    let mut i = Instr::new(Opcode::LoadConst);
                    i.a = dst_slot;
                    i.b = cix as i32;
                    self.push(i);
                } else {
                    let src_slot = self.operand_slot(src);
                    let dst_slot = self.dst_slot(dst);
                    let mut i = Instr::new(Opcode::Move);
                    i.a = dst_slot;
                    i.b = src_slot;
                    self.push(i);
                }
            }
            Instruction::Unary { dst, op, x } => {
                let x_slot = self.operand_slot(x);
                let dst_slot = self.dst_slot(dst);
                let mut i = Instr::new(Opcode::Unary);
                i.a = dst_slot;
                i.b = unary_op_kind(*op);
                i.c = x_slot;
                self.push(i);
            }
            Instruction::Binary { dst, op, x, y } => self.codegen_binary(dst, *op, x, y),
            Instruction::Cast { dst, src, target_type } => {
                let src_slot = self.operand_slot(src);
                let dst_slot = self.dst_slot(dst);
                let mut i = Instr::new(Opcode::Cast);
                i.a = dst_slot;
                i.b = src_slot;
                i.c = ir_type_kind(*target_type);
                self.push(i);
            }
            Instruction::Print { x } => {
                let x_slot = self.operand_slot(x);
                let mut i = Instr::new(Opcode::Print);
                i.a = x_slot;
                self.push(i);
            }
            Instruction::ArrayCreate { dst, length } => {
                let len_slot = self.operand_slot(length);
                let dst_slot = self.dst_slot(dst);
                let mut i = Instr::new(Opcode::ArrayCreate);
                i.a = dst_slot;
                i.b = len_slot;
                self.push(i);
            }
            Instruction::ArrayGet { dst, arr, idx } => {
                let arr_slot = self.operand_slot(arr);
                let idx_slot = self.operand_slot(idx);
                let dst_slot = self.dst_slot(dst);
                let mut i = Instr::new(Opcode::ArrayGet);
                i.a = dst_slot;
                i.b = arr_slot;
                i.c = idx_slot;
                self.push(i);
            }
            Instruction::ArraySet { arr, idx, v } => {
                let arr_slot = self.operand_slot(arr);
                let idx_slot = self.operand_slot(idx);
                let v_slot = self.operand_slot(v);
                let mut i = Instr::new(Opcode::ArraySet);
                i.a = arr_slot;
                i.b = idx_slot;
                i.c = v_slot;
                self.push(i);
            }
            Instruction::ParallelForBegin { count, iter_var } => {
                let count_slot = self.operand_slot(count);
                let iter_slot = self.dst_slot(iter_var);
                let mut i = Instr::new(Opcode::ParallelForBegin);
                i.a = count_slot;
                i.b = iter_slot;
                let ix = self.push(i);
                self.parallel_begin_stack.push(ix);
            }
            Instruction::ParallelForEnd => {
                let end_ix = self.push(Instr::new(Opcode::ParallelForEnd));
                if let Some(begin_ix) = self.parallel_begin_stack.pop() {
                    self.instructions[begin_ix].c = end_ix as i32;
                } else {
                    return Err(BytecodeError::Internal("ParallelForEnd with no matching Begin".to_string()));
                }
            }
            Instruction::ParallelReduceAdd { target, contribution } => {
                let target_slot = self.operand_slot(target);
                let value_slot = self.operand_slot(contribution);
                let mut i = Instr::new(Opcode::ParallelReduceAdd);
                i.a = target_slot;
                i.b = value_slot;
                self.push(i);
            }
            Instruction::Branch { cond, true_label, false_label } => {
                let cond_slot = self.operand_slot(cond);
                let mut jt = Instr::new(Opcode::JumpIfTrue);
                jt.a = cond_slot;
                let jt_ix = self.push(jt);
                self.fixup(jt_ix, FixupTarget::B, true_label.clone());
                let j = Instr::new(Opcode::Jump);
                let j_ix = self.push(j);
                self.fixup(j_ix, FixupTarget::A, false_label.clone());
            }
            Instruction::Jump { label } => {
                let j = Instr::new(Opcode::Jump);
                let ix = self.push(j);
                self.fixup(ix, FixupTarget::A, label.clone());
            }
            Instruction::Return { value } => {
                let slot = value.as_ref().map(|v| self.operand_slot(v)).unwrap_or(-1);
                let mut i = Instr::new(Opcode::Return);
                i.a = slot;
                self.push(i);
            }
            Instruction::Throw { error, detail } => {
                let err_slot = error.as_ref().map(|v| self.operand_slot(v)).unwrap_or(-1);
                let detail_slot = detail.as_ref().map(|v| self.operand_slot(v)).unwrap_or(-1);
                let mut i = Instr::new(Opcode::Throw);
                i.a = err_slot;
                i.b = detail_slot;
                self.push(i);
            }
        }
        Ok(())
    }

    fn codegen_binary(&mut self, dst: &IrValue, op: BinaryOp, x: &IrValue, y: &IrValue) {
        let specializable = x.ir_type().is_integer_like() && y.ir_type().is_integer_like();
        if specializable {
            let x_const = x.as_int_literal();
            let y_const = y.as_int_literal();
            match (x_const, y_const) {
                (Some(cx), None) if op.is_commutative() => {
                    let y_slot = self.operand_slot(y);
                    let cix = self.intern_const(IrType::Int, &ConstPayload::Int(cx));
                    let dst_slot = self.dst_slot(dst);
                    let mut i = Instr::new(Opcode::BinaryIntConstRight);
                    i.a = dst_slot;
                    i.b = binary_op_kind(op);
                    i.c = y_slot;
                    i.d = cix as i32;
                    self.push(i);
                    return;
                }
                (None, Some(cy)) => {
                    let x_slot = self.operand_slot(x);
                    let cix = self.intern_const(IrType::Int, &ConstPayload::Int(cy));
                    let dst_slot = self.dst_slot(dst);
                    let mut i = Instr::new(Opcode::BinaryIntConstRight);
                    i.a = dst_slot;
                    i.b = binary_op_kind(op);
                    i.c = x_slot;
                    i.d = cix as i32;
                    self.push(i);
                    return;
                }
                _ => {
                    let x_slot = self.operand_slot(x);
                    let y_slot = self.operand_slot(y);
                    let dst_slot = self.dst_slot(dst);
                    let mut i = Instr::new(Opcode::BinaryInt);
                    i.a = dst_slot;
                    i.b = binary_op_kind(op);
                    i.c = x_slot;
                    i.d = y_slot;
                    self.push(i);
                    return;
                }
            }
        }
        let x_slot = self.operand_slot(x);
        let y_slot = self.operand_slot(y);
        let dst_slot = self.dst_slot(dst);
        let mut i = Instr::new(Opcode::Binary);
        i.a = dst_slot;
        i.b = binary_op_kind(op);
        i.c = x_slot;
        i.d = y_slot;
        self.push(i);
    }

    fn apply_fixups(&mut self) -> Result<(), BytecodeError> {
        let end = self.instructions.len();
        let fixups = std::mem::take(&mut self.fixups);
        for (ix, target, label) in fixups {
            let resolved = self.block_starts.get(&label).copied().unwrap_or(end);
            match target {
                FixupTarget::A => self.instructions[ix].a = resolved as i32,
                FixupTarget::B => self.instructions[ix].b = resolved as i32,
                FixupTarget::D => self.instructions[ix].d = resolved as i32,
            }
        }
        Ok(())
    }
}

fn infer_return_type(function: &IrFunction) -> Option<IrType> {
    let mut found: Option<IrType> = None;
    for (_, instruction) in function.iter_instructions() {
        if let Instruction::Return { value } = instruction {
            let this = match value {
                Some(v) => v.ir_type(),
                None => IrType::Void,
            };
            if this == IrType::Unknown {
                return None;
            }
            match found {
                None => found = Some(this),
                Some(t) if t == this => {}
                Some(_) => return None,
            }
        }
    }
    found
}

fn generate_function(function: &IrFunction) -> Result<BytecodeFunction, BytecodeError> {
    let mut builder = FnBuilder::new();
    for block in &function.blocks {
        builder.block_starts.insert(block.label.clone(), builder.instructions.len());
        for instruction in &block.instructions {
            builder.codegen_block_instruction(instruction)?;
        }
    }
    builder.apply_fixups()?;

    if !builder.parallel_begin_stack.is_empty() {
        return Err(BytecodeError::Internal("unterminated ParallelForBegin".to_string()));
    }

    let mut instructions = builder.instructions;
    peephole::run(&mut instructions);

    let inferred_return_type = infer_return_type(function);
    log::debug!(
        "generated bytecode for {}: {} instr, {} slots, return_type={:?}",
        function.name,
        instructions.len(),
        builder.next_slot,
        inferred_return_type
    );

    Ok(BytecodeFunction {
        name: function.name.clone(),
        slot_count: builder.next_slot as usize,
        constants: builder.constants,
        instructions,
        inferred_return_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::BasicBlock;
    use crate::module::IrModule;

    fn terminated(label: &str, instrs: Vec<Instruction>) -> BasicBlock {
        let mut b = BasicBlock::new(Label::new(label));
        for i in instrs {
            b.push(i);
        }
        b
    }

    #[test]
    fn constant_right_operand_specializes_without_a_loadconst() {
        let mut f = IrFunction::new("main");
        f.add_block(terminated(
            "entry",
            vec![
                Instruction::Binary {
                    dst: IrValue::Temporary(IrType::Int, "t0".into()),
                    op: BinaryOp::Add,
                    x: IrValue::Variable(IrType::Int, "a".into()),
                    y: IrValue::int(1),
                },
                Instruction::Return { value: Some(IrValue::Temporary(IrType::Int, "t0".into())) },
            ],
        ));
        let bc = generate_function(&f).unwrap();
        assert!(bc.instructions.iter().any(|i| i.op == Opcode::BinaryIntConstRight));
        assert!(!bc.instructions.iter().any(|i| i.op == Opcode::LoadConst && i.b == 0 && bc.constants[0].1 == ConstPayload::Int(1)));
    }

    #[test]
    fn commutative_const_on_left_swaps_to_const_right() {
        let mut f = IrFunction::new("main");
        f.add_block(terminated(
            "entry",
            vec![
                Instruction::Binary {
                    dst: IrValue::Temporary(IrType::Int, "t0".into()),
                    op: BinaryOp::Add,
                    x: IrValue::int(1),
                    y: IrValue::Variable(IrType::Int, "a".into()),
                },
                Instruction::Return { value: Some(IrValue::Temporary(IrType::Int, "t0".into())) },
            ],
        ));
        let bc = generate_function(&f).unwrap();
        let fused = bc.instructions.iter().find(|i| i.op == Opcode::BinaryIntConstRight).unwrap();
        assert_eq!(bc.constants[fused.d as usize].1, ConstPayload::Int(1));
    }

    #[test]
    fn labels_resolve_across_blocks() {
        let mut f = IrFunction::new("main");
        f.add_block(terminated(
            "entry",
            vec![Instruction::Jump { label: Label::new("target") }],
        ));
        f.add_block(terminated("target", vec![Instruction::Return { value: None }]));
        let bc = generate_function(&f).unwrap();
        let jump = bc.instructions.iter().find(|i| i.op == Opcode::Jump).unwrap();
        assert!((jump.a as usize) < bc.instructions.len());
    }

    #[test]
    fn program_entry_is_first_module_function() {
        let mut module = IrModule::new();
        let mut f = IrFunction::new("main");
        f.add_block(terminated("entry", vec![Instruction::Return { value: None }]));
        module.add_function(f);
        let program = generate(&module).unwrap();
        assert_eq!(program.entry, "main");
    }
}
