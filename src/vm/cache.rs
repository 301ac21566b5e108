//! Process-wide cache of the fast-path eligibility check, keyed by
//! function name. Decoding a function's bytecode into fast-path form is
//! pure but not free; since a given [`crate::bytecode::BytecodeProgram`]
//! never mutates after [`crate::bytecode::generate`] produces it, the
//! positive and negative results are safe to memoize for the life of
//! the process.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::bytecode::BytecodeFunction;

use super::fastpath::DecodedProgram;

static CACHE: Lazy<RwLock<HashMap<String, Option<DecodedProgram>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Returns the decoded fast-path program for `function`, computing and
/// memoizing it on first lookup. `None` means the function was checked
/// and found ineligible; callers should not retry the check.
pub fn get_or_decode(function: &BytecodeFunction) -> Option<DecodedProgram> {
    if let Some(entry) = CACHE.read().get(&function.name) {
        return entry.clone();
    }
    let decoded = super::fastpath::try_decode(function);
    CACHE.write().insert(function.name.clone(), decoded.clone());
    decoded
}

/// Drops every memoized entry. Exposed for tests and for callers that
/// re-run the pipeline against a changed program in the same process.
pub fn clear() {
    CACHE.write().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instr, Opcode};
    use crate::value::{ConstPayload, IrType};

    #[test]
    fn eligibility_is_memoized_across_calls() {
        clear();
        let bf = BytecodeFunction {
            name: "cached_fn".into(),
            slot_count: 1,
            constants: vec![(IrType::Int, ConstPayload::Int(7))],
            instructions: vec![
                Instr { op: Opcode::LoadConst, a: 0, b: 0, c: -1, d: -1 },
                Instr { op: Opcode::Return, a: 0, b: -1, c: -1, d: -1 },
            ],
            inferred_return_type: Some(IrType::Int),
        };
        assert!(get_or_decode(&bf).is_some());
        assert!(CACHE.read().contains_key("cached_fn"));
        assert!(get_or_decode(&bf).is_some());
    }

    #[test]
    fn negative_results_are_memoized_too() {
        clear();
        let bf = BytecodeFunction {
            name: "ineligible_fn".into(),
            slot_count: 0,
            constants: vec![(IrType::String, ConstPayload::String("x".into()))],
            instructions: vec![],
            inferred_return_type: None,
        };
        assert!(get_or_decode(&bf).is_none());
        assert!(matches!(CACHE.read().get("ineligible_fn"), Some(None)));
    }
}
