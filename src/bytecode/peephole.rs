//! Peephole optimization over already-label-fixed-up bytecode: fused
//! compare-and-branch, redundant-move elision, then compaction.
//!
//! Runs once, after `generator::generate_function` has emitted and
//! fixed-up every instruction. The first two passes only flag
//! instructions as removable and rewrite operands in place — original
//! instruction indices stay stable until the final compaction pass
//! remaps every jump target through an old->new index table in one
//! shot. None of the three passes change the function's observable
//! behavior (the peephole-equivalence property in the test suite
//! asserts exactly this).

use super::{Instr, Opcode};

#[derive(Clone, Copy)]
enum OperandPos {
    A,
    B,
    C,
    D,
}

fn get(instr: &Instr, pos: OperandPos) -> i32 {
    match pos {
        OperandPos::A => instr.a,
        OperandPos::B => instr.b,
        OperandPos::C => instr.c,
        OperandPos::D => instr.d,
    }
}

fn set(instr: &mut Instr, pos: OperandPos, value: i32) {
    match pos {
        OperandPos::A => instr.a = value,
        OperandPos::B => instr.b = value,
        OperandPos::C => instr.c = value,
        OperandPos::D => instr.d = value,
    }
}

/// Operand positions that hold a jump/branch target instruction index.
fn target_positions(op: Opcode) -> &'static [OperandPos] {
    match op {
        Opcode::Jump => &[OperandPos::A],
        Opcode::JumpIfTrue | Opcode::JumpIfFalse => &[OperandPos::B],
        Opcode::JumpIfBinaryIntTrue | Opcode::JumpIfBinaryIntConstRightTrue => &[OperandPos::D],
        _ => &[],
    }
}

/// The operand position holding this instruction's destination slot, if
/// it writes one.
fn write_pos(op: Opcode) -> Option<OperandPos> {
    match op {
        Opcode::LoadConst
        | Opcode::Move
        | Opcode::Unary
        | Opcode::Binary
        | Opcode::BinaryInt
        | Opcode::BinaryIntConstRight
        | Opcode::Cast
        | Opcode::ArrayCreate
        | Opcode::ArrayGet => Some(OperandPos::A),
        _ => None,
    }
}

/// Operand positions that are slot *reads* (as opposed to opcode tags,
/// constant-pool indices, or jump targets).
fn read_positions(op: Opcode) -> &'static [OperandPos] {
    match op {
        Opcode::Move => &[OperandPos::B],
        Opcode::Unary => &[OperandPos::C],
        Opcode::Binary | Opcode::BinaryInt => &[OperandPos::C, OperandPos::D],
        Opcode::BinaryIntConstRight => &[OperandPos::C],
        Opcode::JumpIfBinaryIntTrue => &[OperandPos::B, OperandPos::C],
        Opcode::JumpIfBinaryIntConstRightTrue => &[OperandPos::B],
        Opcode::Cast => &[OperandPos::B],
        Opcode::JumpIfTrue | Opcode::JumpIfFalse => &[OperandPos::A],
        Opcode::Print => &[OperandPos::A],
        Opcode::Throw => &[OperandPos::A, OperandPos::B],
        Opcode::ArrayCreate => &[OperandPos::B],
        Opcode::ArrayGet => &[OperandPos::B, OperandPos::C],
        Opcode::ArraySet => &[OperandPos::A, OperandPos::B, OperandPos::C],
        Opcode::ParallelForBegin => &[OperandPos::A],
        Opcode::ParallelReduceAdd => &[OperandPos::A, OperandPos::B],
        Opcode::Return => &[OperandPos::A],
        _ => &[],
    }
}

fn reads_slot(instr: &Instr, slot: i32) -> bool {
    if slot < 0 {
        return false;
    }
    read_positions(instr.op).iter().any(|&p| get(instr, p) == slot)
}

fn is_redirectable(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::LoadConst
            | Opcode::Move
            | Opcode::Unary
            | Opcode::Binary
            | Opcode::BinaryInt
            | Opcode::BinaryIntConstRight
            | Opcode::Cast
            | Opcode::ArrayCreate
            | Opcode::ArrayGet
    )
}

fn branch_target_set(instructions: &[Instr]) -> std::collections::HashSet<usize> {
    let mut targets = std::collections::HashSet::new();
    for instr in instructions {
        for &pos in target_positions(instr.op) {
            let t = get(instr, pos);
            if t >= 0 {
                targets.insert(t as usize);
            }
        }
    }
    targets
}

/// Whether `slot` is read by any *still-live* instruction at or after
/// `from`, skipping instructions already flagged removed.
fn slot_read_after(instructions: &[Instr], removed: &[bool], from: usize, slot: i32) -> bool {
    instructions[from..]
        .iter()
        .zip(&removed[from..])
        .any(|(instr, dead)| !dead && reads_slot(instr, slot))
}

pub fn run(instructions: &mut Vec<Instr>) {
    let mut removed = vec![false; instructions.len()];
    fuse_compare_and_branch(instructions, &mut removed);
    elide_redundant_moves(instructions, &mut removed);
    compact(instructions, &removed);
}

fn fuse_compare_and_branch(instructions: &mut [Instr], removed: &mut [bool]) {
    let branch_targets = branch_target_set(instructions);
    let mut i = 0;
    while i + 1 < instructions.len() {
        if removed[i] {
            i += 1;
            continue;
        }
        let producer = instructions[i];
        let consumer = instructions[i + 1];
        let is_int_binary = matches!(producer.op, Opcode::BinaryInt | Opcode::BinaryIntConstRight);
        if is_int_binary
            && !removed[i + 1]
            && consumer.op == Opcode::JumpIfTrue
            && consumer.a == producer.a
            && !branch_targets.contains(&(i + 1))
            && !slot_read_after(instructions, removed, i + 2, producer.a)
        {
            let fused_op = if producer.op == Opcode::BinaryInt {
                Opcode::JumpIfBinaryIntTrue
            } else {
                Opcode::JumpIfBinaryIntConstRightTrue
            };
            let mut fused = Instr::new(fused_op);
            fused.a = producer.b; // comparison operator tag
            fused.b = producer.c; // left slot
            fused.c = producer.d; // right slot or constant index
            fused.d = consumer.b; // branch target (an original instruction index)
            instructions[i] = fused;
            removed[i + 1] = true;
            i += 2;
            continue;
        }
        i += 1;
    }
}

fn elide_redundant_moves(instructions: &mut [Instr], removed: &mut [bool]) {
    for i in 0..instructions.len().saturating_sub(1) {
        if removed[i] {
            continue;
        }
        let producer = instructions[i];
        let next_ix = i + 1;
        if removed[next_ix] {
            continue;
        }
        let mover = instructions[next_ix];
        if mover.op != Opcode::Move || !is_redirectable(producer.op) {
            continue;
        }
        let Some(write) = write_pos(producer.op) else { continue };
        let producer_dst = get(&producer, write);
        if mover.b != producer_dst {
            continue;
        }
        if slot_read_after(instructions, removed, i + 2, producer_dst) {
            continue;
        }
        set(&mut instructions[i], write, mover.a);
        removed[next_ix] = true;
    }
}

/// Drops every instruction flagged in `removed` and rewrites every
/// remaining jump/branch target through an old->new index table built
/// over the *original* index space. A target that pointed at (or past)
/// the old end, or at an instruction that turned out to be removed,
/// lands on the new end or on whatever instruction now occupies that
/// position — forward-looking, since none of the removed opcodes here
/// have any control effect of their own.
fn compact(instructions: &mut Vec<Instr>, removed: &[bool]) {
    let old_len = instructions.len();
    let new_len = removed.iter().filter(|&&r| !r).count();

    let mut new_index_of = vec![0i32; old_len];
    let mut n = 0i32;
    for i in 0..old_len {
        if !removed[i] {
            new_index_of[i] = n;
            n += 1;
        }
    }

    let mut forward_map = vec![0i32; old_len + 1];
    forward_map[old_len] = new_len as i32;
    for i in (0..old_len).rev() {
        forward_map[i] = if !removed[i] { new_index_of[i] } else { forward_map[i + 1] };
    }

    let remap = |t: i32| -> i32 {
        if t < 0 {
            t
        } else if (t as usize) <= old_len {
            forward_map[t as usize]
        } else {
            new_len as i32
        }
    };

    let mut compacted = Vec::with_capacity(new_len);
    for (i, instr) in instructions.iter().enumerate() {
        if removed[i] {
            continue;
        }
        let mut instr = *instr;
        for &pos in target_positions(instr.op) {
            let t = get(&instr, pos);
            set(&mut instr, pos, remap(t));
        }
        compacted.push(instr);
    }
    *instructions = compacted;
}
