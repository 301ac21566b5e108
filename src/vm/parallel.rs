//! Execution of a counted parallel loop's body: validate the body is
//! restricted to what can run safely off the main interpreter loop, run
//! one iteration per rayon task against its own cloned slot vector, and
//! merge the per-iteration `ParallelReduceAdd` contributions back with a
//! single wrapping add per target slot.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::bytecode::{BytecodeFunction, BytecodeProgram, Instr, Opcode};
use crate::error::VmError;

use super::value::Value;

#[derive(Debug)]
pub struct LoopResult {
    /// `(target slot, summed contribution)`, one entry per distinct
    /// `ParallelReduceAdd` target touched by the body.
    pub reductions: Vec<(usize, i64)>,
}

/// Opcodes a parallel loop body may contain. `Print`, `Throw`, `Return`,
/// and any other `ParallelFor*` are rejected outright; a `Jump`/branch
/// that targets outside the body range is rejected too, since nothing
/// outside the body is reachable once the loop forks into tasks.
fn body_opcode_allowed(op: Opcode) -> bool {
    !matches!(op, Opcode::Print | Opcode::Throw | Opcode::Return | Opcode::ParallelForBegin | Opcode::ParallelForEnd)
}

fn validate_body(instructions: &[Instr], body_start: usize, body_end: usize) -> Result<(), VmError> {
    for (offset, instr) in instructions[body_start..body_end].iter().enumerate() {
        let ix = body_start + offset;
        if !body_opcode_allowed(instr.op) {
            return Err(VmError::ParallelBodyViolation(format!("instruction {} uses opcode {} which is not allowed in a parallel loop body", ix, instr.op)));
        }
        for target in jump_targets(instr) {
            if target < body_start || target >= body_end {
                return Err(VmError::ParallelBodyViolation(format!("instruction {} jumps outside the loop body", ix)));
            }
        }
    }
    Ok(())
}

fn jump_targets(instr: &Instr) -> Vec<usize> {
    match instr.op {
        Opcode::Jump => vec![instr.a as usize],
        Opcode::JumpIfTrue | Opcode::JumpIfFalse => vec![instr.b as usize],
        Opcode::JumpIfBinaryIntTrue | Opcode::JumpIfBinaryIntConstRightTrue => vec![instr.d as usize],
        _ => vec![],
    }
}

fn const_to_long(function: &BytecodeFunction, cix: usize) -> i64 {
    match &function.constants[cix].1 {
        crate::value::ConstPayload::Int(i) => *i,
        crate::value::ConstPayload::Bool(b) => *b as i64,
        crate::value::ConstPayload::Char(c) => *c as i64,
        _ => 0,
    }
}

/// Runs the body once against `slots` (a fresh per-iteration clone),
/// accumulating reduction contributions locally rather than writing
/// them straight back, since concurrent iterations must never share
/// mutable slot state.
fn run_body_once(function: &BytecodeFunction, body_start: usize, body_end: usize, slots: &mut [Value]) -> HashMap<usize, i64> {
    let mut local_reductions: HashMap<usize, i64> = HashMap::new();
    let mut pc = body_start;
    while pc < body_end {
        let instr = &function.instructions[pc];
        match instr.op {
            Opcode::Nop => pc += 1,
            Opcode::LoadConst => {
                slots[instr.a as usize] = Value::from(&function.constants[instr.b as usize].1);
                pc += 1;
            }
            Opcode::Move => {
                slots[instr.a as usize] = slots[instr.b as usize].clone();
                pc += 1;
            }
            Opcode::Unary => {
                let op = crate::bytecode::unary_op(instr.b);
                let x = slots[instr.c as usize].to_long().unwrap_or(0);
                slots[instr.a as usize] = Value::Int(crate::arith::eval_unary_int(op, x));
                pc += 1;
            }
            Opcode::Binary | Opcode::BinaryInt => {
                let op = crate::bytecode::binary_op(instr.b);
                let x = slots[instr.c as usize].to_long().unwrap_or(0);
                let y = slots[instr.d as usize].to_long().unwrap_or(0);
                let raw = crate::arith::eval_binary_int(op, x, y);
                slots[instr.a as usize] = if op.is_comparison() { Value::Bool(crate::arith::i64_to_bool(raw)) } else { Value::Int(raw) };
                pc += 1;
            }
            Opcode::BinaryIntConstRight => {
                let op = crate::bytecode::binary_op(instr.b);
                let x = slots[instr.c as usize].to_long().unwrap_or(0);
                let y = const_to_long(function, instr.d as usize);
                let raw = crate::arith::eval_binary_int(op, x, y);
                slots[instr.a as usize] = if op.is_comparison() { Value::Bool(crate::arith::i64_to_bool(raw)) } else { Value::Int(raw) };
                pc += 1;
            }
            Opcode::JumpIfBinaryIntTrue => {
                let op = crate::bytecode::binary_op(instr.a);
                let x = slots[instr.b as usize].to_long().unwrap_or(0);
                let y = slots[instr.c as usize].to_long().unwrap_or(0);
                pc = if crate::arith::i64_to_bool(crate::arith::eval_binary_int(op, x, y)) { instr.d as usize } else { pc + 1 };
            }
            Opcode::JumpIfBinaryIntConstRightTrue => {
                let op = crate::bytecode::binary_op(instr.a);
                let x = slots[instr.b as usize].to_long().unwrap_or(0);
                let y = const_to_long(function, instr.c as usize);
                pc = if crate::arith::i64_to_bool(crate::arith::eval_binary_int(op, x, y)) { instr.d as usize } else { pc + 1 };
            }
            Opcode::Cast => {
                let target = crate::bytecode::target_kind(instr.c);
                let src = slots[instr.b as usize].clone();
                slots[instr.a as usize] = match target {
                    crate::value::IrType::Float => Value::Float(src.to_double().unwrap_or(0.0)),
                    crate::value::IrType::Bool => Value::Bool(src.to_bool()),
                    crate::value::IrType::Char => Value::Char(src.to_long().unwrap_or(0) as u32),
                    _ => Value::Int(src.to_long().unwrap_or(0)),
                };
                pc += 1;
            }
            Opcode::Jump => pc = instr.a as usize,
            Opcode::JumpIfTrue => pc = if slots[instr.a as usize].to_bool() { instr.b as usize } else { pc + 1 },
            Opcode::JumpIfFalse => pc = if !slots[instr.a as usize].to_bool() { instr.b as usize } else { pc + 1 },
            Opcode::ArrayCreate => {
                let len = slots[instr.b as usize].to_long().unwrap_or(0).max(0) as usize;
                slots[instr.a as usize] = Value::array(vec![Value::Null; len]);
                pc += 1;
            }
            Opcode::ArrayGet => {
                if let Value::Array(arr) = &slots[instr.b as usize] {
                    let idx = slots[instr.c as usize].to_long().unwrap_or(0).max(0) as usize;
                    let v = arr.read().get(idx).cloned().unwrap_or(Value::Null);
                    slots[instr.a as usize] = v;
                }
                pc += 1;
            }
            Opcode::ArraySet => {
                let idx = slots[instr.b as usize].to_long().unwrap_or(0);
                let value = slots[instr.c as usize].clone();
                if let Value::Array(arr) = &slots[instr.a as usize] {
                    let mut guard = arr.write();
                    if idx >= 0 && (idx as usize) < guard.len() {
                        guard[idx as usize] = value;
                    }
                }
                pc += 1;
            }
            Opcode::ParallelReduceAdd => {
                let target_slot = instr.a as usize;
                let contribution = slots[instr.b as usize].to_long().unwrap_or(0);
                *local_reductions.entry(target_slot).or_insert(0) = local_reductions.get(&target_slot).copied().unwrap_or(0).wrapping_add(contribution);
                pc += 1;
            }
            _ => pc += 1,
        }
    }
    local_reductions
}

/// Runs every iteration of the counted loop beginning at `begin_pc`
/// (a `ParallelForBegin`) whose body ends at `end_ix` (the matching
/// `ParallelForEnd`), in parallel via rayon, and merges the per-iteration
/// reduction maps with a wrapping add.
pub fn run_counted_loop(
    _program: &BytecodeProgram,
    function: &BytecodeFunction,
    base_slots: &[Value],
    begin_pc: usize,
    end_ix: usize,
) -> Result<LoopResult, VmError> {
    let begin = &function.instructions[begin_pc];
    let count = base_slots[begin.a as usize].to_long().unwrap_or(0);
    let iter_slot = begin.b as usize;
    let body_start = begin_pc + 1;
    let body_end = end_ix;

    if count <= 0 {
        return Ok(LoopResult { reductions: Vec::new() });
    }
    validate_body(&function.instructions, body_start, body_end)?;

    let partials: Vec<HashMap<usize, i64>> = (0..count)
        .into_par_iter()
        .map(|i| {
            let mut slots = base_slots.to_vec();
            slots[iter_slot] = Value::Int(i);
            run_body_once(function, body_start, body_end, &mut slots)
        })
        .collect();

    let mut merged: HashMap<usize, i64> = HashMap::new();
    for partial in partials {
        for (slot, value) in partial {
            let entry = merged.entry(slot).or_insert(0);
            *entry = entry.wrapping_add(value);
        }
    }
    Ok(LoopResult { reductions: merged.into_iter().collect() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instr;
    use crate::value::{ConstPayload, IrType};

    fn function_with_body(body: Vec<Instr>) -> BytecodeFunction {
        let mut instructions = vec![Instr { op: Opcode::ParallelForBegin, a: 0, b: 1, c: -1, d: -1 }];
        let begin_to_end = body.len() + 1;
        instructions.extend(body);
        instructions.push(Instr { op: Opcode::ParallelForEnd, a: -1, b: -1, c: -1, d: -1 });
        instructions[0].c = begin_to_end as i32;
        BytecodeFunction {
            name: "f".into(),
            slot_count: 3,
            constants: vec![(IrType::Int, ConstPayload::Int(1000))],
            instructions,
            inferred_return_type: None,
        }
    }

    #[test]
    fn sums_zero_through_n_minus_one_via_reduction() {
        let f = function_with_body(vec![Instr { op: Opcode::ParallelReduceAdd, a: 2, b: 1, c: -1, d: -1 }]);
        let program = BytecodeProgram { entry: f.name.clone(), functions: vec![f.clone()] };
        let mut slots = vec![Value::Int(1000), Value::Int(0), Value::Int(0)];
        let result = run_counted_loop(&program, &f, &slots, 0, f.instructions.len() - 1).unwrap();
        let total: i64 = result.reductions.iter().filter(|(s, _)| *s == 2).map(|(_, v)| v).sum();
        assert_eq!(total, 499_500);
        slots[2] = Value::Int(0);
    }

    #[test]
    fn zero_count_runs_no_iterations() {
        let f = function_with_body(vec![Instr { op: Opcode::ParallelReduceAdd, a: 2, b: 1, c: -1, d: -1 }]);
        let program = BytecodeProgram { entry: f.name.clone(), functions: vec![f.clone()] };
        let slots = vec![Value::Int(0), Value::Int(0), Value::Int(0)];
        let result = run_counted_loop(&program, &f, &slots, 0, f.instructions.len() - 1).unwrap();
        assert!(result.reductions.is_empty());
    }

    #[test]
    fn a_print_in_the_body_is_rejected() {
        let f = function_with_body(vec![Instr { op: Opcode::Print, a: 1, b: -1, c: -1, d: -1 }]);
        let program = BytecodeProgram { entry: f.name.clone(), functions: vec![f.clone()] };
        let slots = vec![Value::Int(1000), Value::Int(0), Value::Int(0)];
        let err = run_counted_loop(&program, &f, &slots, 0, f.instructions.len() - 1).unwrap_err();
        assert!(matches!(err, VmError::ParallelBodyViolation(_)));
    }
}
