//! IR function representation for the Oaf language core.

use std::fmt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use crate::instruction::{BasicBlock, Instruction, Label};

/// An IR function: an ordered list of basic blocks reached by label. The
/// first block is the entry. The label-to-block mapping is a partial
/// function built from the block list, not an independent source of
/// truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrFunction {
    pub name: String,
    pub blocks: Vec<BasicBlock>,
    /// Set once the bytecode generator records which return type (if
    /// any single one) every `Return` in this function carries.
    pub inferred_return_type: Option<crate::value::IrType>,
}

impl IrFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), blocks: Vec::new(), inferred_return_type: None }
    }

    pub fn entry_label(&self) -> Option<&Label> {
        self.blocks.first().map(|b| &b.label)
    }

    pub fn add_block(&mut self, block: BasicBlock) {
        self.blocks.push(block);
    }

    pub fn block_index(&self, label: &Label) -> Option<usize> {
        self.blocks.iter().position(|b| &b.label == label)
    }

    pub fn get_block(&self, label: &Label) -> Option<&BasicBlock> {
        self.block_index(label).map(|i| &self.blocks[i])
    }

    pub fn get_block_mut(&mut self, label: &Label) -> Option<&mut BasicBlock> {
        let idx = self.block_index(label)?;
        Some(&mut self.blocks[idx])
    }

    /// A fast label->index lookup table, rebuilt on demand by passes that
    /// do many lookups (liveness, the bytecode generator's label fixup).
    pub fn label_index(&self) -> IndexMap<Label, usize> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.label.clone(), i))
            .collect()
    }

    /// Every `Branch`/`Jump` target must resolve to a block in this
    /// function. Returns the first dangling label found, if any.
    pub fn validate_labels(&self) -> Result<(), String> {
        let known = self.label_index();
        for block in &self.blocks {
            for successor in block.successors() {
                if !known.contains_key(successor) {
                    return Err(format!("block {} jumps to undefined label {}", block.label.0, successor.0));
                }
            }
        }
        Ok(())
    }

    /// Every block is terminated; this holds after the lowerer's
    /// tail-void rule has run on each block.
    pub fn validate_termination(&self) -> Result<(), String> {
        for block in &self.blocks {
            if !block.is_terminated() {
                return Err(format!("block {} is not terminated", block.label.0));
            }
        }
        Ok(())
    }

    /// No temporary name is the destination of two distinct defining
    /// instructions.
    pub fn validate_single_assignment(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for block in &self.blocks {
            for instruction in &block.instructions {
                if let Some(name) = instruction.defined_temporary() {
                    if !seen.insert(name.to_string()) {
                        return Err(format!("temporary {} redefined", name));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        self.validate_termination()?;
        self.validate_labels()?;
        self.validate_single_assignment()
    }

    pub fn iter_instructions(&self) -> impl Iterator<Item = (&Label, &Instruction)> {
        self.blocks.iter().flat_map(|b| b.instructions.iter().map(move |i| (&b.label, i)))
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fn {} {{", self.name)?;
        for block in &self.blocks {
            write!(f, "{}", block)?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::IrValue;

    fn terminated_block(name: &str) -> BasicBlock {
        let mut b = BasicBlock::new(Label::new(name));
        b.push(Instruction::Return { value: None });
        b
    }

    #[test]
    fn entry_label_is_first_block() {
        let mut func = IrFunction::new("main");
        func.add_block(terminated_block("entry"));
        func.add_block(terminated_block("after"));
        assert_eq!(func.entry_label(), Some(&Label::new("entry")));
    }

    #[test]
    fn validate_labels_rejects_dangling_jump() {
        let mut func = IrFunction::new("main");
        let mut b = BasicBlock::new(Label::new("entry"));
        b.push(Instruction::Jump { label: Label::new("nowhere") });
        func.add_block(b);
        assert!(func.validate_labels().is_err());
    }

    #[test]
    fn validate_single_assignment_rejects_redefinition() {
        let mut func = IrFunction::new("main");
        let mut b = BasicBlock::new(Label::new("entry"));
        b.push(Instruction::Assign { dst: IrValue::Temporary(crate::value::IrType::Int, "t0".into()), src: IrValue::int(1) });
        b.push(Instruction::Assign { dst: IrValue::Temporary(crate::value::IrType::Int, "t0".into()), src: IrValue::int(2) });
        b.push(Instruction::Return { value: None });
        func.add_block(b);
        assert!(func.validate_single_assignment().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_function() {
        let mut func = IrFunction::new("main");
        func.add_block(terminated_block("entry"));
        assert!(func.validate().is_ok());
    }
}
