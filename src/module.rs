//! IR module system for the Oaf language core.

use std::fmt;
use serde::{Deserialize, Serialize};
use crate::function::IrFunction;

/// An ordered list of functions. The core lowerer always emits exactly
/// one function named `main`; the model admits more so a future
/// extension (user-defined functions) does not need a new container
/// type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrModule {
    pub functions: Vec<IrFunction>,
}

impl IrModule {
    pub fn new() -> Self {
        Self { functions: Vec::new() }
    }

    pub fn add_function(&mut self, function: IrFunction) {
        self.functions.push(function);
    }

    pub fn get_function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn get_function_mut(&mut self, name: &str) -> Option<&mut IrFunction> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn entry_function_name(&self) -> Option<&str> {
        self.functions.first().map(|f| f.name.as_str())
    }
}

impl Default for IrModule {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for function in &self.functions {
            writeln!(f, "{}", function)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_function_is_the_first_added() {
        let mut module = IrModule::new();
        module.add_function(IrFunction::new("main"));
        module.add_function(IrFunction::new("helper"));
        assert_eq!(module.entry_function_name(), Some("main"));
    }

    #[test]
    fn lookup_by_name() {
        let mut module = IrModule::new();
        module.add_function(IrFunction::new("main"));
        assert!(module.get_function("main").is_some());
        assert!(module.get_function("missing").is_none());
    }
}
