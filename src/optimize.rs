//! IR optimization passes: constant folding, copy propagation, dead-store
//! elimination, and dead-temporary elimination, run to a per-function
//! fixpoint.
//!
//! Narrowed to the four passes this pipeline actually needs and composed
//! as a proper fixpoint loop rather than a single linear sweep.

use std::collections::{HashMap, HashSet};

use crate::arith::{eval_binary_float, eval_binary_float_comparison, eval_binary_int, eval_unary_float, eval_unary_int, float_to_int, int_to_float};
use crate::error::OptimizeError;
use crate::function::IrFunction;
use crate::instruction::{BasicBlock, Instruction};
use crate::module::IrModule;
use crate::value::{ConstPayload, IrType, IrValue};

/// Safety bound on fixpoint iterations; real functions converge in a
/// handful of passes and this only guards against an optimizer bug
/// looping forever.
const MAX_ITERATIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationLevel {
    /// No optimization; the bytecode generator sees the Lowerer's raw
    /// output.
    None,
    /// All four passes, run once (no fixpoint iteration).
    Basic,
    /// All four passes, run to a per-function fixpoint.
    Standard,
}

#[derive(Debug, Clone, Default)]
pub struct OptimizationStats {
    pub constants_folded: usize,
    pub copies_propagated: usize,
    pub dead_stores_removed: usize,
    pub dead_temporaries_removed: usize,
    pub passes_run: usize,
}

impl OptimizationStats {
    fn merge(&mut self, other: OptimizationStats) {
        self.constants_folded += other.constants_folded;
        self.copies_propagated += other.copies_propagated;
        self.dead_stores_removed += other.dead_stores_removed;
        self.dead_temporaries_removed += other.dead_temporaries_removed;
        self.passes_run += other.passes_run;
    }
}

pub fn optimize(module: &mut IrModule, level: OptimizationLevel) -> Result<OptimizationStats, OptimizeError> {
    let mut stats = OptimizationStats::default();
    if level == OptimizationLevel::None {
        return Ok(stats);
    }
    for function in &mut module.functions {
        stats.merge(optimize_function(function, level)?);
    }
    Ok(stats)
}

fn optimize_function(function: &mut IrFunction, level: OptimizationLevel) -> Result<OptimizationStats, OptimizeError> {
    let mut stats = OptimizationStats::default();
    let max_iterations = if level == OptimizationLevel::Standard { MAX_ITERATIONS } else { 1 };
    for iteration in 0..max_iterations {
        let mut changed = false;
        changed |= constant_folding(function, &mut stats);
        changed |= copy_propagation(function, &mut stats);
        changed |= dead_store_elimination(function, &mut stats);
        changed |= dead_temporary_elimination(function, &mut stats);
        stats.passes_run += 1;
        log::trace!("optimize[{}] pass {} changed={}", function.name, iteration, changed);
        if !changed {
            break;
        }
    }
    Ok(stats)
}

fn const_of(v: &IrValue) -> Option<(IrType, &ConstPayload)> {
    match v {
        IrValue::Constant(ty, payload) => Some((*ty, payload)),
        _ => None,
    }
}

fn fold_binary(op: crate::instruction::BinaryOp, x: &IrValue, y: &IrValue) -> Option<IrValue> {
    let (xt, xp) = const_of(x)?;
    let (yt, yp) = const_of(y)?;
    let numeric = xt.is_numeric() || xt.is_integer_like();
    if !numeric || !(yt.is_numeric() || yt.is_integer_like()) {
        if op.is_comparison() {
            if let (ConstPayload::String(a), ConstPayload::String(b)) = (xp, yp) {
                let result = match op {
                    crate::instruction::BinaryOp::Eq => a == b,
                    crate::instruction::BinaryOp::Ne => a != b,
                    _ => return None,
                };
                return Some(IrValue::boolean(result));
            }
        }
        return None;
    }

    let use_float = xt == IrType::Float || yt == IrType::Float;
    if use_float {
        let xf = match xp {
            ConstPayload::Float(f) => *f,
            ConstPayload::Int(i) => int_to_float(*i),
            _ => return None,
        };
        let yf = match yp {
            ConstPayload::Float(f) => *f,
            ConstPayload::Int(i) => int_to_float(*i),
            _ => return None,
        };
        if op.is_comparison() {
            let result = eval_binary_float_comparison(op, xf, yf)?;
            return Some(IrValue::boolean(result));
        }
        return Some(IrValue::Constant(IrType::Float, ConstPayload::Float(eval_binary_float(op, xf, yf))));
    }

    let xi = x.as_int_literal()?;
    let yi = y.as_int_literal()?;
    if op.is_comparison() {
        let result = eval_binary_int(op, xi, yi) != 0;
        return Some(IrValue::boolean(result));
    }
    Some(IrValue::Constant(IrType::Int, ConstPayload::Int(eval_binary_int(op, xi, yi))))
}

fn fold_unary(op: crate::instruction::UnaryOp, x: &IrValue) -> Option<IrValue> {
    let (xt, xp) = const_of(x)?;
    match xp {
        ConstPayload::Float(f) => Some(IrValue::Constant(IrType::Float, ConstPayload::Float(eval_unary_float(op, *f)))),
        _ => {
            let xi = x.as_int_literal()?;
            let result = eval_unary_int(op, xi);
            let ty = if op == crate::instruction::UnaryOp::LogicalNot { IrType::Bool } else { xt };
            Some(IrValue::Constant(ty, ConstPayload::Int(result)))
        }
    }
}

fn fold_cast(src: &IrValue, target: IrType) -> Option<IrValue> {
    let (ty, payload) = const_of(src)?;
    match (ty, target) {
        (IrType::Float, IrType::Int) => {
            if let ConstPayload::Float(f) = payload {
                return Some(IrValue::Constant(IrType::Int, ConstPayload::Int(float_to_int(*f))));
            }
            None
        }
        (_, IrType::Float) => {
            let i = src.as_int_literal()?;
            Some(IrValue::Constant(IrType::Float, ConstPayload::Float(int_to_float(i))))
        }
        (_, IrType::Int) | (_, IrType::Bool) | (_, IrType::Char) => {
            let i = src.as_int_literal()?;
            let payload = match target {
                IrType::Bool => ConstPayload::Bool(i != 0),
                IrType::Char => ConstPayload::Char(char::from_u32(i as u32).unwrap_or('\u{FFFD}')),
                _ => ConstPayload::Int(i),
            };
            Some(IrValue::Constant(target, payload))
        }
        _ => None,
    }
}

fn constant_folding(function: &mut IrFunction, stats: &mut OptimizationStats) -> bool {
    let mut changed = false;
    for block in &mut function.blocks {
        for instruction in &mut block.instructions {
            let folded = match instruction {
                Instruction::Binary { dst, op, x, y } => fold_binary(*op, x, y).map(|v| (dst.clone(), v)),
                Instruction::Unary { dst, op, x } => fold_unary(*op, x).map(|v| (dst.clone(), v)),
                Instruction::Cast { dst, src, target_type } => fold_cast(src, *target_type).map(|v| (dst.clone(), v)),
                _ => None,
            };
            if let Some((dst, value)) = folded {
                *instruction = Instruction::Assign { dst, src: value };
                stats.constants_folded += 1;
                changed = true;
            }
        }
    }
    changed
}

/// Tracks two maps, `Temporary -> Value` (its ultimate source) and
/// `Variable -> Value` (the last value directly assigned to it), per
/// basic block: sound for temporaries unconditionally (every temporary
/// is defined exactly once, enforced by
/// [`IrFunction::validate_single_assignment`]), and for variables only
/// between the direct assignment and the next write to that variable.
/// Any write to a `Variable` destination clears both maps outright
/// (conservative aliasing — this pass does not reason about which
/// reads could actually be affected), and so does crossing a
/// `ParallelFor*` boundary, since a parallel body's iterations may run
/// concurrently with whatever comes after.
fn copy_propagation(function: &mut IrFunction, stats: &mut OptimizationStats) -> bool {
    fn resolve(temp_copies: &HashMap<String, IrValue>, var_copies: &HashMap<String, IrValue>, v: &IrValue) -> Option<IrValue> {
        let mut current = v;
        let mut seen = HashSet::new();
        let mut result = None;
        loop {
            let (map, key) = match current {
                IrValue::Temporary(_, name) => (temp_copies, name.as_str()),
                IrValue::Variable(_, name) => (var_copies, name.as_str()),
                _ => break,
            };
            if !seen.insert((current.is_temporary(), key.to_string())) {
                break;
            }
            match map.get(key) {
                Some(next) => {
                    result = Some(next.clone());
                    current = next;
                }
                None => break,
            }
        }
        result
    }

    let mut changed = false;
    for block in &mut function.blocks {
        let mut temp_copies: HashMap<String, IrValue> = HashMap::new();
        let mut var_copies: HashMap<String, IrValue> = HashMap::new();
        for instruction in &mut block.instructions {
            instruction.rewrite_reads(|v| {
                let resolved = resolve(&temp_copies, &var_copies, v);
                if resolved.is_some() {
                    changed = true;
                }
                resolved
            });

            if matches!(instruction, Instruction::ParallelForBegin { .. } | Instruction::ParallelForEnd) {
                temp_copies.clear();
                var_copies.clear();
                continue;
            }

            match instruction {
                Instruction::Assign { dst: IrValue::Temporary(_, name), src } => {
                    if src.is_constant() || src.is_temporary() {
                        temp_copies.insert(name.clone(), src.clone());
                    }
                }
                Instruction::Assign { dst: IrValue::Variable(_, name), src } => {
                    temp_copies.clear();
                    var_copies.clear();
                    let is_self_copy = matches!(src, IrValue::Variable(_, src_name) if src_name == name);
                    if !is_self_copy && (src.is_constant() || src.is_variable()) {
                        var_copies.insert(name.clone(), src.clone());
                    }
                }
                _ => {
                    if matches!(destination(instruction), Some(IrValue::Variable(_, _))) {
                        temp_copies.clear();
                        var_copies.clear();
                    }
                }
            }
        }
    }
    if changed {
        stats.copies_propagated += 1;
    }
    changed
}

fn destination(instruction: &Instruction) -> Option<&IrValue> {
    match instruction {
        Instruction::Assign { dst, .. }
        | Instruction::Unary { dst, .. }
        | Instruction::Binary { dst, .. }
        | Instruction::Cast { dst, .. }
        | Instruction::ArrayCreate { dst, .. }
        | Instruction::ArrayGet { dst, .. } => Some(dst),
        _ => None,
    }
}

fn variable_name(v: &IrValue) -> Option<&str> {
    match v {
        IrValue::Variable(_, name) => Some(name.as_str()),
        _ => None,
    }
}

fn block_gen_kill(block: &BasicBlock) -> (HashSet<String>, HashSet<String>) {
    let mut defined_so_far = HashSet::new();
    let mut gen = HashSet::new();
    let mut kill = HashSet::new();
    for instruction in &block.instructions {
        for read in instruction.reads() {
            if let Some(name) = variable_name(read) {
                if !defined_so_far.contains(name) {
                    gen.insert(name.to_string());
                }
            }
        }
        if let Some(dst) = destination(instruction) {
            if let Some(name) = variable_name(dst) {
                kill.insert(name.to_string());
                defined_so_far.insert(name.to_string());
            }
        }
    }
    (gen, kill)
}

/// Removes a write to a `Variable` when that value is never read before
/// the next write or function exit. Computed via classic backward
/// liveness: a block-level gen/kill fixpoint over the CFG, then a
/// per-instruction backward walk within each block.
fn dead_store_elimination(function: &mut IrFunction, stats: &mut OptimizationStats) -> bool {
    let n = function.blocks.len();
    if n == 0 {
        return false;
    }
    let label_index = function.label_index();
    let gen_kill: Vec<(HashSet<String>, HashSet<String>)> = function.blocks.iter().map(block_gen_kill).collect();
    let mut live_in: Vec<HashSet<String>> = vec![HashSet::new(); n];
    let mut live_out: Vec<HashSet<String>> = vec![HashSet::new(); n];

    loop {
        let mut stable = true;
        for i in 0..n {
            let mut new_out = HashSet::new();
            for succ in function.blocks[i].successors() {
                if let Some(&s) = label_index.get(succ) {
                    new_out.extend(live_in[s].iter().cloned());
                }
            }
            let (gen, kill) = &gen_kill[i];
            let mut new_in = gen.clone();
            new_in.extend(new_out.iter().filter(|v| !kill.contains(*v)).cloned());
            if new_in != live_in[i] || new_out != live_out[i] {
                stable = false;
            }
            live_in[i] = new_in;
            live_out[i] = new_out;
        }
        if stable {
            break;
        }
    }

    let mut changed = false;
    for (i, block) in function.blocks.iter_mut().enumerate() {
        let mut live = live_out[i].clone();
        let mut keep = vec![true; block.instructions.len()];
        for (idx, instruction) in block.instructions.iter().enumerate().rev() {
            let is_pure_store = matches!(
                instruction,
                Instruction::Assign { .. } | Instruction::Unary { .. } | Instruction::Binary { .. } | Instruction::Cast { .. }
            );
            if is_pure_store {
                if let Some(name) = destination(instruction).and_then(variable_name) {
                    if !live.contains(name) {
                        keep[idx] = false;
                        changed = true;
                        continue;
                    }
                    live.remove(name);
                }
            }
            for read in instruction.reads() {
                if let Some(name) = variable_name(read) {
                    live.insert(name.to_string());
                }
            }
        }
        if keep.iter().any(|k| !k) {
            let mut i2 = 0;
            block.instructions.retain(|_| {
                let k = keep[i2];
                i2 += 1;
                k
            });
        }
    }
    if changed {
        stats.dead_stores_removed += 1;
    }
    changed
}

/// A `Temporary`-defining instruction has no side effects, so it is dead
/// once nothing reads the temporary it defines.
fn dead_temporary_elimination(function: &mut IrFunction, stats: &mut OptimizationStats) -> bool {
    let mut used: HashSet<String> = HashSet::new();
    for block in &function.blocks {
        for instruction in &block.instructions {
            for read in instruction.reads() {
                if let IrValue::Temporary(_, name) = read {
                    used.insert(name.clone());
                }
            }
        }
    }

    let mut changed = false;
    for block in &mut function.blocks {
        let before = block.instructions.len();
        block.instructions.retain(|instruction| match instruction.defined_temporary() {
            Some(name) => used.contains(name),
            None => true,
        });
        if block.instructions.len() != before {
            changed = true;
        }
    }
    if changed {
        stats.dead_temporaries_removed += 1;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{BinaryOp, Label, UnaryOp};

    fn single_block_fn(instructions: Vec<Instruction>) -> IrFunction {
        let mut f = IrFunction::new("main");
        let mut b = BasicBlock::new(Label::new("entry"));
        for i in instructions {
            b.push(i);
        }
        f.add_block(b);
        f
    }

    #[test]
    fn folds_constant_binary_add() {
        let mut f = single_block_fn(vec![
            Instruction::Binary { dst: IrValue::Temporary(IrType::Int, "t0".into()), op: BinaryOp::Add, x: IrValue::int(2), y: IrValue::int(3) },
            Instruction::Return { value: Some(IrValue::Temporary(IrType::Int, "t0".into())) },
        ]);
        let mut stats = OptimizationStats::default();
        constant_folding(&mut f, &mut stats);
        assert_eq!(stats.constants_folded, 1);
        assert!(matches!(f.blocks[0].instructions[0], Instruction::Assign { src: IrValue::Constant(_, ConstPayload::Int(5)), .. }));
    }

    #[test]
    fn division_by_constant_zero_folds_to_zero_not_a_panic() {
        let mut f = single_block_fn(vec![
            Instruction::Binary { dst: IrValue::Temporary(IrType::Int, "t0".into()), op: BinaryOp::Div, x: IrValue::int(7), y: IrValue::int(0) },
            Instruction::Return { value: Some(IrValue::Temporary(IrType::Int, "t0".into())) },
        ]);
        let mut stats = OptimizationStats::default();
        constant_folding(&mut f, &mut stats);
        assert!(matches!(f.blocks[0].instructions[0], Instruction::Assign { src: IrValue::Constant(_, ConstPayload::Int(0)), .. }));
    }

    #[test]
    fn copy_propagation_chases_temporary_chains() {
        let mut f = single_block_fn(vec![
            Instruction::Assign { dst: IrValue::Temporary(IrType::Int, "t0".into()), src: IrValue::int(9) },
            Instruction::Assign { dst: IrValue::Temporary(IrType::Int, "t1".into()), src: IrValue::Temporary(IrType::Int, "t0".into()) },
            Instruction::Return { value: Some(IrValue::Temporary(IrType::Int, "t1".into())) },
        ]);
        let mut stats = OptimizationStats::default();
        copy_propagation(&mut f, &mut stats);
        assert!(matches!(f.blocks[0].instructions[2], Instruction::Return { value: Some(IrValue::Constant(_, ConstPayload::Int(9))) }));
    }

    #[test]
    fn copy_propagation_chases_a_direct_variable_assignment() {
        let mut f = single_block_fn(vec![
            Instruction::Assign { dst: IrValue::Variable(IrType::Int, "y".into()), src: IrValue::int(7) },
            Instruction::Assign { dst: IrValue::Variable(IrType::Int, "x".into()), src: IrValue::Variable(IrType::Int, "y".into()) },
            Instruction::Return { value: Some(IrValue::Variable(IrType::Int, "x".into())) },
        ]);
        let mut stats = OptimizationStats::default();
        copy_propagation(&mut f, &mut stats);
        assert!(matches!(f.blocks[0].instructions[2], Instruction::Return { value: Some(IrValue::Constant(_, ConstPayload::Int(7))) }));
    }

    #[test]
    fn a_write_to_any_variable_clears_both_copy_maps() {
        // `x`'s copy entry is wiped out by the write to `y`, even though
        // `y`'s write never touches `x` itself: copy propagation clears
        // both maps on any variable write rather than only the written
        // name's own entry.
        let mut f = single_block_fn(vec![
            Instruction::Assign { dst: IrValue::Variable(IrType::Int, "x".into()), src: IrValue::int(1) },
            Instruction::Assign { dst: IrValue::Variable(IrType::Int, "y".into()), src: IrValue::Variable(IrType::Int, "x".into()) },
            Instruction::Assign { dst: IrValue::Variable(IrType::Int, "z".into()), src: IrValue::Variable(IrType::Int, "x".into()) },
        ]);
        let mut stats = OptimizationStats::default();
        copy_propagation(&mut f, &mut stats);
        assert!(matches!(
            &f.blocks[0].instructions[1],
            Instruction::Assign { src: IrValue::Constant(_, ConstPayload::Int(1)), .. }
        ));
        assert!(matches!(
            &f.blocks[0].instructions[2],
            Instruction::Assign { src: IrValue::Variable(_, name), .. } if name == "x"
        ));
    }

    #[test]
    fn dead_store_removes_overwritten_variable_write() {
        let mut f = single_block_fn(vec![
            Instruction::Assign { dst: IrValue::Variable(IrType::Int, "x".into()), src: IrValue::int(1) },
            Instruction::Assign { dst: IrValue::Variable(IrType::Int, "x".into()), src: IrValue::int(2) },
            Instruction::Return { value: Some(IrValue::Variable(IrType::Int, "x".into())) },
        ]);
        let mut stats = OptimizationStats::default();
        dead_store_elimination(&mut f, &mut stats);
        assert_eq!(f.blocks[0].instructions.len(), 2);
        assert!(matches!(&f.blocks[0].instructions[0], Instruction::Assign { src: IrValue::Constant(_, ConstPayload::Int(2)), .. }));
    }

    #[test]
    fn dead_temporary_elimination_drops_unread_definitions() {
        let mut f = single_block_fn(vec![
            Instruction::Unary { dst: IrValue::Temporary(IrType::Int, "t0".into()), op: UnaryOp::Negate, x: IrValue::int(1) },
            Instruction::Return { value: None },
        ]);
        let mut stats = OptimizationStats::default();
        dead_temporary_elimination(&mut f, &mut stats);
        assert_eq!(f.blocks[0].instructions.len(), 1);
    }

    #[test]
    fn fixpoint_composes_folding_propagation_and_dead_temp_elimination() {
        let mut module = IrModule::new();
        module.add_function(single_block_fn(vec![
            Instruction::Binary { dst: IrValue::Temporary(IrType::Int, "t0".into()), op: BinaryOp::Add, x: IrValue::int(1), y: IrValue::int(1) },
            Instruction::Assign { dst: IrValue::Temporary(IrType::Int, "t1".into()), src: IrValue::Temporary(IrType::Int, "t0".into()) },
            Instruction::Return { value: Some(IrValue::Temporary(IrType::Int, "t1".into())) },
        ]));
        let stats = optimize(&mut module, OptimizationLevel::Standard).unwrap();
        assert!(stats.constants_folded >= 1);
        let main = module.get_function("main").unwrap();
        assert!(matches!(
            main.blocks[0].instructions.last(),
            Some(Instruction::Return { value: Some(IrValue::Constant(_, ConstPayload::Int(2))) })
        ));
    }
}
