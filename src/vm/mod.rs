//! The dual-path bytecode VM: a generic boxed-value interpreter backing
//! every function, and a per-function integer fast path selected when a
//! function's bytecode is entirely integer-shaped.

mod cache;
mod fastpath;
mod generic;
mod parallel;
pub mod value;

use crate::bytecode::BytecodeProgram;
use crate::error::VmError;

pub use value::Value;

/// What a pipeline caller actually wants back: either the returned value
/// or the error message a failed run produced. Intentionally flat (no
/// nested `Result`) since `main.rs`/`bc_run` and the integration tests
/// both just want to match on success.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub return_value: Option<Value>,
    pub error_message: Option<String>,
}

impl ExecutionResult {
    fn ok(value: Value) -> Self {
        Self { success: true, return_value: Some(value), error_message: None }
    }

    fn err(error: VmError) -> Self {
        Self { success: false, return_value: None, error_message: Some(error.to_string()) }
    }
}

/// Runs `entry_name` (or the program's own entry if `None`) to
/// completion. Every function gets one shot at the fast-path cache
/// before falling back to the generic interpreter; a function that
/// throws or hits a runtime error surfaces as `success: false` rather
/// than propagating a `Result` error, matching how a caller embedding
/// this VM wants to report a program failure versus a host-side bug.
pub fn execute(program: &BytecodeProgram, entry_name: Option<&str>) -> ExecutionResult {
    let name = entry_name.unwrap_or(program.entry.as_str());
    let Some(function) = program.get_function(name) else {
        return ExecutionResult::err(VmError::EntryNotFound(name.to_string()));
    };

    if let Some(decoded) = cache::get_or_decode(function) {
        let mut slots = vec![0i64; decoded.slot_count];
        log::debug!("running {} on the fast path ({} slots)", function.name, decoded.slot_count);
        return match fastpath::run(&decoded, &mut slots) {
            Ok(outcome) => ExecutionResult::ok(outcome.value),
            Err(e) => ExecutionResult::err(e),
        };
    }

    log::debug!("running {} on the generic interpreter", function.name);
    match generic::run(program, function) {
        Ok(outcome) => ExecutionResult::ok(outcome.value),
        Err(e) => ExecutionResult::err(e),
    }
}

/// Drops every memoized fast-path eligibility result. Exposed so tests
/// and long-lived hosts that reload a program under the same function
/// names don't see a stale decision.
pub fn clear_fastpath_cache() {
    cache::clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BytecodeFunction, Instr, Opcode};
    use crate::value::{ConstPayload, IrType};

    #[test]
    fn missing_entry_function_is_reported_not_panicked() {
        let program = BytecodeProgram { entry: "main".into(), functions: vec![] };
        let result = execute(&program, None);
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("main"));
    }

    #[test]
    fn a_pure_int_function_runs_on_the_fast_path() {
        clear_fastpath_cache();
        let f = BytecodeFunction {
            name: "main".into(),
            slot_count: 1,
            constants: vec![(IrType::Int, ConstPayload::Int(55))],
            instructions: vec![
                Instr { op: Opcode::LoadConst, a: 0, b: 0, c: -1, d: -1 },
                Instr { op: Opcode::Return, a: 0, b: -1, c: -1, d: -1 },
            ],
            inferred_return_type: Some(IrType::Int),
        };
        let program = BytecodeProgram { entry: "main".into(), functions: vec![f] };
        let result = execute(&program, None);
        assert!(result.success);
        match result.return_value {
            Some(Value::Int(55)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn a_function_using_print_falls_back_to_the_generic_interpreter() {
        clear_fastpath_cache();
        let f = BytecodeFunction {
            name: "main".into(),
            slot_count: 1,
            constants: vec![(IrType::String, ConstPayload::String("hi".into()))],
            instructions: vec![
                Instr { op: Opcode::LoadConst, a: 0, b: 0, c: -1, d: -1 },
                Instr { op: Opcode::Return, a: 0, b: -1, c: -1, d: -1 },
            ],
            inferred_return_type: None,
        };
        let program = BytecodeProgram { entry: "main".into(), functions: vec![f] };
        let result = execute(&program, None);
        assert!(result.success);
    }
}
