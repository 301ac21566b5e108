//! The boxed-value interpreter: executes any [`BytecodeFunction`],
//! including the opcodes the integer fast path cannot handle (`Print`,
//! `Throw`, arrays, parallel loops). Always correct; the fast path exists
//! purely as a speed-up for the subset of programs eligible for it.

use crate::bytecode::{BytecodeFunction, BytecodeProgram, Instr, Opcode};
use crate::error::VmError;

use super::parallel;
use super::value::Value;

#[derive(Debug)]
pub struct Outcome {
    pub value: Value,
}

fn eval_binary(op_kind: i32, x: &Value, y: &Value) -> Result<Value, VmError> {
    let op = crate::bytecode::binary_op(op_kind);
    if op == crate::instruction::BinaryOp::Eq || op == crate::instruction::BinaryOp::Ne {
        let eq = x.values_equal(y);
        return Ok(Value::Bool(if op == crate::instruction::BinaryOp::Eq { eq } else { !eq }));
    }
    if let (Value::String(a), Value::String(b)) = (x, y) {
        if op == crate::instruction::BinaryOp::Add {
            return Ok(Value::String(format!("{}{}", a, b).into()));
        }
    }
    if matches!(x, Value::Float(_)) || matches!(y, Value::Float(_)) {
        let xf = x.to_double().unwrap_or(0.0);
        let yf = y.to_double().unwrap_or(0.0);
        if let Some(b) = crate::arith::eval_binary_float_comparison(op, xf, yf) {
            return Ok(Value::Bool(b));
        }
        return Ok(Value::Float(crate::arith::eval_binary_float(op, xf, yf)));
    }
    let xi = x.to_long().unwrap_or(0);
    let yi = y.to_long().unwrap_or(0);
    let raw = crate::arith::eval_binary_int(op, xi, yi);
    if op.is_comparison()
        || matches!(
            op,
            crate::instruction::BinaryOp::LogicalAnd
                | crate::instruction::BinaryOp::LogicalOr
                | crate::instruction::BinaryOp::LogicalXor
                | crate::instruction::BinaryOp::LogicalXand
        )
    {
        Ok(Value::Bool(crate::arith::i64_to_bool(raw)))
    } else {
        Ok(Value::Int(raw))
    }
}

fn eval_unary(op_kind: i32, x: &Value) -> Value {
    let op = crate::bytecode::unary_op(op_kind);
    if let Value::Float(f) = x {
        return Value::Float(crate::arith::eval_unary_float(op, *f));
    }
    let xi = x.to_long().unwrap_or(0);
    let raw = crate::arith::eval_unary_int(op, xi);
    if op == crate::instruction::UnaryOp::LogicalNot {
        Value::Bool(crate::arith::i64_to_bool(raw))
    } else {
        Value::Int(raw)
    }
}

fn cast_value(x: &Value, target: crate::value::IrType) -> Value {
    use crate::value::IrType;
    match target {
        IrType::Int => Value::Int(x.to_long().unwrap_or(0)),
        IrType::Float => Value::Float(x.to_double().unwrap_or(0.0)),
        IrType::Bool => Value::Bool(x.to_bool()),
        IrType::Char => Value::Char(x.to_long().unwrap_or(0) as u32),
        IrType::String => Value::String(x.to_string().into()),
        IrType::Void | IrType::Unknown => Value::Null,
    }
}

pub fn run(program: &BytecodeProgram, function: &BytecodeFunction) -> Result<Outcome, VmError> {
    let mut slots = vec![Value::Null; function.slot_count];
    let mut pc = 0usize;
    loop {
        let Some(instr) = function.instructions.get(pc) else {
            return Ok(Outcome { value: Value::Null });
        };
        execute_one(program, function, instr, &mut slots, &mut pc)?;
        if let StepResult::Returned(value) = step_return(instr, &slots) {
            return Ok(Outcome { value });
        }
    }
}

enum StepResult {
    Continue,
    Returned(Value),
}

fn step_return(instr: &Instr, slots: &[Value]) -> StepResult {
    if instr.op == Opcode::Return {
        let value = if instr.a < 0 { Value::Null } else { slots[instr.a as usize].clone() };
        StepResult::Returned(value)
    } else {
        StepResult::Continue
    }
}

fn execute_one(
    program: &BytecodeProgram,
    function: &BytecodeFunction,
    instr: &Instr,
    slots: &mut Vec<Value>,
    pc: &mut usize,
) -> Result<(), VmError> {
    match instr.op {
        Opcode::Nop => *pc += 1,
        Opcode::LoadConst => {
            slots[instr.a as usize] = Value::from(&function.constants[instr.b as usize].1);
            *pc += 1;
        }
        Opcode::Move => {
            slots[instr.a as usize] = slots[instr.b as usize].clone();
            *pc += 1;
        }
        Opcode::Unary => {
            slots[instr.a as usize] = eval_unary(instr.b, &slots[instr.c as usize]);
            *pc += 1;
        }
        Opcode::Binary => {
            slots[instr.a as usize] = eval_binary(instr.b, &slots[instr.c as usize], &slots[instr.d as usize])?;
            *pc += 1;
        }
        Opcode::BinaryInt => {
            let op = crate::bytecode::binary_op(instr.b);
            let x = slots[instr.c as usize].to_long().unwrap_or(0);
            let y = slots[instr.d as usize].to_long().unwrap_or(0);
            let raw = crate::arith::eval_binary_int(op, x, y);
            slots[instr.a as usize] = if op.is_comparison() { Value::Bool(crate::arith::i64_to_bool(raw)) } else { Value::Int(raw) };
            *pc += 1;
        }
        Opcode::BinaryIntConstRight => {
            let op = crate::bytecode::binary_op(instr.b);
            let x = slots[instr.c as usize].to_long().unwrap_or(0);
            let y = Value::from(&function.constants[instr.d as usize].1).to_long().unwrap_or(0);
            let raw = crate::arith::eval_binary_int(op, x, y);
            slots[instr.a as usize] = if op.is_comparison() { Value::Bool(crate::arith::i64_to_bool(raw)) } else { Value::Int(raw) };
            *pc += 1;
        }
        Opcode::JumpIfBinaryIntTrue => {
            let op = crate::bytecode::binary_op(instr.a);
            let x = slots[instr.b as usize].to_long().unwrap_or(0);
            let y = slots[instr.c as usize].to_long().unwrap_or(0);
            *pc = if crate::arith::i64_to_bool(crate::arith::eval_binary_int(op, x, y)) { instr.d as usize } else { *pc + 1 };
        }
        Opcode::JumpIfBinaryIntConstRightTrue => {
            let op = crate::bytecode::binary_op(instr.a);
            let x = slots[instr.b as usize].to_long().unwrap_or(0);
            let y = Value::from(&function.constants[instr.c as usize].1).to_long().unwrap_or(0);
            *pc = if crate::arith::i64_to_bool(crate::arith::eval_binary_int(op, x, y)) { instr.d as usize } else { *pc + 1 };
        }
        Opcode::Cast => {
            let target = crate::bytecode::target_kind(instr.c);
            slots[instr.a as usize] = cast_value(&slots[instr.b as usize], target);
            *pc += 1;
        }
        Opcode::Jump => *pc = instr.a as usize,
        Opcode::JumpIfTrue => *pc = if slots[instr.a as usize].to_bool() { instr.b as usize } else { *pc + 1 },
        Opcode::JumpIfFalse => *pc = if !slots[instr.a as usize].to_bool() { instr.b as usize } else { *pc + 1 },
        Opcode::Print => {
            println!("{}", slots[instr.a as usize]);
            *pc += 1;
        }
        Opcode::Throw => {
            let error = if instr.a < 0 { String::new() } else { slots[instr.a as usize].to_string() };
            let detail = if instr.b < 0 { String::new() } else { slots[instr.b as usize].to_string() };
            return Err(VmError::ThrownByProgram { error, detail });
        }
        Opcode::ArrayCreate => {
            let len = slots[instr.b as usize].to_long().unwrap_or(0).max(0) as usize;
            slots[instr.a as usize] = Value::array(vec![Value::Null; len]);
            *pc += 1;
        }
        Opcode::ArrayGet => {
            let Value::Array(arr) = &slots[instr.b as usize] else {
                return Err(VmError::NotAnArray(instr.b as usize));
            };
            let idx = slots[instr.c as usize].to_long().unwrap_or(0);
            let guard = arr.read();
            let value = guard.get(idx.max(0) as usize).cloned();
            match value {
                Some(v) if idx >= 0 => {
                    drop(guard);
                    slots[instr.a as usize] = v;
                    *pc += 1;
                }
                _ => return Err(VmError::ArrayIndexOutOfRange { index: idx, length: guard.len() }),
            }
        }
        Opcode::ArraySet => {
            let idx = slots[instr.b as usize].to_long().unwrap_or(0);
            let value = slots[instr.c as usize].clone();
            let Value::Array(arr) = &slots[instr.a as usize] else {
                return Err(VmError::NotAnArray(instr.a as usize));
            };
            let mut guard = arr.write();
            if idx < 0 || idx as usize >= guard.len() {
                return Err(VmError::ArrayIndexOutOfRange { index: idx, length: guard.len() });
            }
            guard[idx as usize] = value;
            *pc += 1;
        }
        Opcode::ParallelForBegin => {
            let end_ix = instr.c as usize;
            let result = parallel::run_counted_loop(program, function, slots, *pc, end_ix)?;
            slots[instr.b as usize] = Value::Int(0);
            for (target_slot, total) in result.reductions {
                let base = slots[target_slot].to_long().unwrap_or(0);
                slots[target_slot] = Value::Int(base.wrapping_add(total));
            }
            *pc = end_ix + 1;
        }
        Opcode::ParallelForEnd => {
            return Err(VmError::UnresolvedParallelEnd(*pc));
        }
        Opcode::ParallelReduceAdd => {
            let contribution = slots[instr.b as usize].to_long().unwrap_or(0);
            let base = slots[instr.a as usize].to_long().unwrap_or(0);
            slots[instr.a as usize] = Value::Int(base.wrapping_add(contribution));
            *pc += 1;
        }
        Opcode::Return => {
            // handled by the caller via `step_return`; nothing left to do.
        }
    }
    Ok(())
}
