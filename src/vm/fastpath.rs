//! The integer fast path: an eligibility predicate that decodes a
//! [`BytecodeFunction`] into a flat `i64`-slot program, plus the two
//! interpreter modes over that decoded form.
//!
//! A function is eligible when every constant it carries is
//! integer-like and every instruction it contains belongs to the opcode
//! subset this module knows how to execute without ever boxing a
//! [`super::value::Value`]. Ineligibility is not an error: callers fall
//! back to the generic interpreter.

use crate::bytecode::{BytecodeFunction, Instr, Opcode};
use crate::error::VmError;
use crate::instruction::BinaryOp;
use crate::value::{ConstPayload, IrType};

use super::value::Value;

const ELIGIBLE_OPCODES: &[Opcode] = &[
    Opcode::Nop,
    Opcode::LoadConst,
    Opcode::Move,
    Opcode::Unary,
    Opcode::BinaryInt,
    Opcode::BinaryIntConstRight,
    Opcode::JumpIfBinaryIntTrue,
    Opcode::JumpIfBinaryIntConstRightTrue,
    Opcode::Cast,
    Opcode::Jump,
    Opcode::JumpIfTrue,
    Opcode::JumpIfFalse,
    Opcode::Return,
];

/// How a fast-path run's final slot value should be boxed on return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnMode {
    Int,
    Bool,
    Char,
    /// Neither the bytecode generator's `Return`-type scan nor the
    /// eligibility check could pin down a single static return type;
    /// the interpreter tracks, per slot, whether its current value
    /// originated from a boolean-producing operation and boxes
    /// accordingly at the `Return` that is actually taken.
    DynamicBool,
}

#[derive(Debug, Clone)]
pub struct DecodedProgram {
    pub slot_count: usize,
    pub instructions: Vec<Instr>,
    pub constants: Vec<i64>,
    pub constant_is_bool: Vec<bool>,
    pub return_mode: ReturnMode,
}

fn produces_bool(op: BinaryOp) -> bool {
    op.is_comparison()
        || matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr | BinaryOp::LogicalXor | BinaryOp::LogicalXand)
}

/// Returns `None` when `function` contains anything the fast path
/// cannot execute; a negative result is cached by the caller so the
/// check runs at most once per function.
pub fn try_decode(function: &BytecodeFunction) -> Option<DecodedProgram> {
    if !function.constants.iter().all(|(ty, _)| ty.is_integer_like()) {
        return None;
    }
    if !function.instructions.iter().all(|i| ELIGIBLE_OPCODES.contains(&i.op)) {
        return None;
    }
    for instr in &function.instructions {
        if instr.op == Opcode::Cast {
            let target = crate::bytecode::target_kind(instr.c);
            if !matches!(target, IrType::Int | IrType::Bool | IrType::Char) {
                return None;
            }
        }
    }

    let constants: Vec<i64> = function
        .constants
        .iter()
        .map(|(_, payload)| match payload {
            ConstPayload::Int(i) => *i,
            ConstPayload::Bool(b) => *b as i64,
            ConstPayload::Char(c) => *c as i64,
            _ => 0,
        })
        .collect();
    let constant_is_bool: Vec<bool> = function.constants.iter().map(|(ty, _)| *ty == IrType::Bool).collect();

    let return_mode = match function.inferred_return_type {
        Some(IrType::Int) => ReturnMode::Int,
        Some(IrType::Bool) => ReturnMode::Bool,
        Some(IrType::Char) => ReturnMode::Char,
        _ => ReturnMode::DynamicBool,
    };

    Some(DecodedProgram {
        slot_count: function.slot_count,
        instructions: function.instructions.clone(),
        constants,
        constant_is_bool,
        return_mode,
    })
}

pub struct FastOutcome {
    pub value: Value,
}

/// Runs the decoded program to completion from slot state `slots`
/// (caller-owned so counted parallel loops can hand in a per-iteration
/// clone). `is_bool` tracks, per slot, whether `DynamicBool` mode should
/// box that slot's value as `Bool` if it is the one returned.
pub fn run(program: &DecodedProgram, slots: &mut [i64]) -> Result<FastOutcome, VmError> {
    let mut is_bool = vec![false; program.slot_count];
    let mut pc = 0usize;
    loop {
        let Some(instr) = program.instructions.get(pc) else {
            return Ok(FastOutcome { value: Value::Null });
        };
        match instr.op {
            Opcode::Nop => {}
            Opcode::LoadConst => {
                let cix = instr.b as usize;
                slots[instr.a as usize] = program.constants[cix];
                is_bool[instr.a as usize] = program.constant_is_bool[cix];
                pc += 1;
                continue;
            }
            Opcode::Move => {
                slots[instr.a as usize] = slots[instr.b as usize];
                is_bool[instr.a as usize] = is_bool[instr.b as usize];
                pc += 1;
                continue;
            }
            Opcode::Unary => {
                let op = crate::bytecode::unary_op(instr.b);
                let x = slots[instr.c as usize];
                slots[instr.a as usize] = crate::arith::eval_unary_int(op, x);
                is_bool[instr.a as usize] = matches!(op, crate::instruction::UnaryOp::LogicalNot) || (op == crate::instruction::UnaryOp::Identity && is_bool[instr.c as usize]);
                pc += 1;
                continue;
            }
            Opcode::BinaryInt => {
                let op = crate::bytecode::binary_op(instr.b);
                let x = slots[instr.c as usize];
                let y = slots[instr.d as usize];
                slots[instr.a as usize] = crate::arith::eval_binary_int(op, x, y);
                is_bool[instr.a as usize] = produces_bool(op);
                pc += 1;
                continue;
            }
            Opcode::BinaryIntConstRight => {
                let op = crate::bytecode::binary_op(instr.b);
                let x = slots[instr.c as usize];
                let y = program.constants[instr.d as usize];
                slots[instr.a as usize] = crate::arith::eval_binary_int(op, x, y);
                is_bool[instr.a as usize] = produces_bool(op);
                pc += 1;
                continue;
            }
            Opcode::JumpIfBinaryIntTrue => {
                let op = crate::bytecode::binary_op(instr.a);
                let x = slots[instr.b as usize];
                let y = slots[instr.c as usize];
                if crate::arith::i64_to_bool(crate::arith::eval_binary_int(op, x, y)) {
                    pc = instr.d as usize;
                    continue;
                }
                pc += 1;
                continue;
            }
            Opcode::JumpIfBinaryIntConstRightTrue => {
                let op = crate::bytecode::binary_op(instr.a);
                let x = slots[instr.b as usize];
                let y = program.constants[instr.c as usize];
                if crate::arith::i64_to_bool(crate::arith::eval_binary_int(op, x, y)) {
                    pc = instr.d as usize;
                    continue;
                }
                pc += 1;
                continue;
            }
            Opcode::Cast => {
                let target = crate::bytecode::target_kind(instr.c);
                let src = slots[instr.b as usize];
                slots[instr.a as usize] = src;
                is_bool[instr.a as usize] = target == IrType::Bool;
                pc += 1;
                continue;
            }
            Opcode::Jump => {
                pc = instr.a as usize;
                continue;
            }
            Opcode::JumpIfTrue => {
                if crate::arith::i64_to_bool(slots[instr.a as usize]) {
                    pc = instr.b as usize;
                    continue;
                }
                pc += 1;
                continue;
            }
            Opcode::JumpIfFalse => {
                if !crate::arith::i64_to_bool(slots[instr.a as usize]) {
                    pc = instr.b as usize;
                    continue;
                }
                pc += 1;
                continue;
            }
            Opcode::Return => {
                let value = if instr.a < 0 {
                    Value::Null
                } else {
                    let raw = slots[instr.a as usize];
                    match program.return_mode {
                        ReturnMode::Int => Value::Int(raw),
                        ReturnMode::Bool => Value::Bool(crate::arith::i64_to_bool(raw)),
                        ReturnMode::Char => Value::Char(raw as u32),
                        ReturnMode::DynamicBool => {
                            if is_bool[instr.a as usize] {
                                Value::Bool(crate::arith::i64_to_bool(raw))
                            } else {
                                Value::Int(raw)
                            }
                        }
                    }
                };
                return Ok(FastOutcome { value });
            }
            _ => return Err(VmError::UnsupportedOpcode(pc)),
        }
        pc += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BytecodeFunction, Instr, Opcode};
    use crate::value::{ConstPayload, IrType};

    fn fn_with(instructions: Vec<Instr>, constants: Vec<(IrType, ConstPayload)>, slot_count: usize, ret: Option<IrType>) -> BytecodeFunction {
        BytecodeFunction { name: "f".into(), slot_count, constants, instructions, inferred_return_type: ret }
    }

    #[test]
    fn decodes_and_runs_a_pure_int_function() {
        let bf = fn_with(
            vec![
                Instr { op: Opcode::LoadConst, a: 0, b: 0, c: -1, d: -1 },
                Instr { op: Opcode::Return, a: 0, b: -1, c: -1, d: -1 },
            ],
            vec![(IrType::Int, ConstPayload::Int(42))],
            1,
            Some(IrType::Int),
        );
        let decoded = try_decode(&bf).expect("eligible");
        let mut slots = vec![0i64; decoded.slot_count];
        let outcome = run(&decoded, &mut slots).unwrap();
        match outcome.value {
            Value::Int(42) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn float_constant_makes_the_function_ineligible() {
        let bf = fn_with(
            vec![Instr { op: Opcode::Return, a: -1, b: -1, c: -1, d: -1 }],
            vec![(IrType::Float, ConstPayload::Float(1.0))],
            0,
            None,
        );
        assert!(try_decode(&bf).is_none());
    }

    #[test]
    fn dynamic_return_boxes_bool_when_the_live_slot_came_from_a_comparison() {
        let bf = fn_with(
            vec![
                Instr { op: Opcode::LoadConst, a: 0, b: 0, c: -1, d: -1 },
                Instr { op: Opcode::LoadConst, a: 1, b: 1, c: -1, d: -1 },
                Instr { op: Opcode::BinaryInt, a: 2, b: 10 /*Lt*/, c: 0, d: 1 },
                Instr { op: Opcode::Return, a: 2, b: -1, c: -1, d: -1 },
            ],
            vec![(IrType::Int, ConstPayload::Int(1)), (IrType::Int, ConstPayload::Int(2))],
            3,
            None,
        );
        let decoded = try_decode(&bf).expect("eligible");
        let mut slots = vec![0i64; decoded.slot_count];
        let outcome = run(&decoded, &mut slots).unwrap();
        assert!(matches!(outcome.value, Value::Bool(true)));
    }

    #[test]
    fn a_char_typed_return_boxes_as_char_not_int() {
        let bf = fn_with(
            vec![
                Instr { op: Opcode::LoadConst, a: 0, b: 0, c: -1, d: -1 },
                Instr { op: Opcode::Cast, a: 0, b: 0, c: 4 /*Char*/, d: -1 },
                Instr { op: Opcode::Return, a: 0, b: -1, c: -1, d: -1 },
            ],
            vec![(IrType::Int, ConstPayload::Int(65))],
            1,
            Some(IrType::Char),
        );
        let decoded = try_decode(&bf).expect("eligible");
        assert!(matches!(decoded.return_mode, ReturnMode::Char));
        let mut slots = vec![0i64; decoded.slot_count];
        let outcome = run(&decoded, &mut slots).unwrap();
        match outcome.value {
            Value::Char(65) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
