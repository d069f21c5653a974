//! Compilation unit: the instruction pool and the control-flow graph of code blocks.
//!
//! Both are produced by the front end and only read by the abstract machine. Instructions and
//! blocks are addressed by dense indices into the program.

use std::ops::Range;

use log::warn;

use crate::address::Sign;
use crate::arith;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::instruction::{IfCond, Instruction, Operand};
use crate::interp::operand_to_sign;
use crate::machine::Machine;

pub type InstIndex = u32;
pub type BlockIndex = u32;

/// Outgoing edge of a code block.
///
/// A conditional branch is taken when `left` compares to `right` in one of the enabled ways
/// (`eq`, `lt`, `gt`); an unconditional one is always taken. A missing `right` operand compares
/// against zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub target: BlockIndex,
    pub conditional: bool,
    pub left: Option<Operand>,
    pub right: Option<Operand>,
    pub eq: bool,
    pub lt: bool,
    pub gt: bool,
    /// Pruned by the front end; never followed.
    pub disabled: bool,
}

impl Branch {
    pub fn goto(target: BlockIndex) -> Self {
        Self {
            target,
            conditional: false,
            left: None,
            right: None,
            eq: false,
            lt: false,
            gt: false,
            disabled: false,
        }
    }

    /// Branch taken when `if-<cond> left, right` holds.
    pub fn when(cond: IfCond, left: Operand, right: Option<Operand>, target: BlockIndex) -> Self {
        let (eq, lt, gt) = match cond {
            IfCond::Eq => (true, false, false),
            IfCond::Ne => (false, true, true),
            IfCond::Gt => (false, false, true),
            IfCond::Ge => (true, false, true),
            IfCond::Le => (true, true, false),
            IfCond::Lt => (false, true, false),
        };
        Self {
            target,
            conditional: true,
            left: Some(left),
            right,
            eq,
            lt,
            gt,
            disabled: false,
        }
    }

    /// Branch taken when this one is not, leading to `target`.
    pub fn otherwise(&self, target: BlockIndex) -> Self {
        Self {
            target,
            eq: !self.eq,
            lt: !self.lt,
            gt: !self.gt,
            ..self.clone()
        }
    }

    pub fn disable(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Signs of `left - right` under which the branch is taken.
    pub fn accepted(&self) -> Sign {
        let mut sign = Sign::EMPTY;
        if self.lt {
            sign |= Sign::NEGATIVE;
        }
        if self.eq {
            sign |= Sign::ZERO;
        }
        if self.gt {
            sign |= Sign::POSITIVE;
        }
        sign
    }

    /// Whether the branch may be taken from `frame`.
    ///
    /// Operands that carry no sign information make the branch feasible.
    pub fn is_feasible(&self, frame: &Frame, m: &Machine) -> Result<bool> {
        if self.disabled {
            return Ok(false);
        }
        if !self.conditional {
            return Ok(true);
        }
        let left = match &self.left {
            Some(op) => operand_to_sign(frame, m, op)?,
            None => return Ok(true),
        };
        let right = match &self.right {
            Some(op) => operand_to_sign(frame, m, op)?,
            None => Sign::ZERO,
        };
        if left.is_empty() || right.is_empty() {
            warn!("branch to block {} compares an unknown value", self.target);
            return Ok(true);
        }
        Ok(arith::sub(left, right).intersects(self.accepted()))
    }
}

/// Straight-line range of instructions `begin..end`, entered only at `begin`.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    pub index: BlockIndex,
    pub begin: InstIndex,
    pub end: InstIndex,
    /// Registers used by the method.
    pub nregs: usize,
    pub branches: Vec<Branch>,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
    blocks: Vec<CodeBlock>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_instructions(&self) -> usize {
        self.instructions.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn push_instruction(&mut self, inst: Instruction) -> InstIndex {
        self.instructions.push(inst);
        (self.instructions.len() - 1) as InstIndex
    }

    /// Append a straight-line sequence, chaining every instruction to the following one.
    pub fn push_code(&mut self, code: impl IntoIterator<Item = Instruction>) -> Range<InstIndex> {
        let begin = self.instructions.len() as InstIndex;
        for inst in code {
            let index = self.push_instruction(inst);
            if index > begin {
                self.instructions[index as usize - 1].next = Some(index);
            }
        }
        begin..self.instructions.len() as InstIndex
    }

    /// Append a code block over already pushed instructions.
    pub fn push_block(&mut self, range: Range<InstIndex>, nregs: usize, branches: Vec<Branch>) -> Result<BlockIndex> {
        if range.end as usize > self.instructions.len() {
            return Err(Error::UnknownInstruction(range.end.saturating_sub(1)));
        }
        let index = self.blocks.len() as BlockIndex;
        self.blocks.push(CodeBlock {
            index,
            begin: range.start,
            end: range.end.max(range.start),
            nregs,
            branches,
        });
        Ok(index)
    }

    /// Replace the branches of a block, e.g. to close a loop once its target exists.
    pub fn set_branches(&mut self, block: BlockIndex, branches: Vec<Branch>) -> Result<()> {
        self.blocks
            .get_mut(block as usize)
            .ok_or(Error::UnknownBlock(block))?
            .branches = branches;
        Ok(())
    }

    pub fn instruction(&self, index: InstIndex) -> Result<&Instruction> {
        self.instructions
            .get(index as usize)
            .ok_or(Error::UnknownInstruction(index))
    }

    pub fn block(&self, index: BlockIndex) -> Result<&CodeBlock> {
        self.blocks.get(index as usize).ok_or(Error::UnknownBlock(index))
    }

    /// Instructions of a block in program order, with their indices.
    pub fn instructions<'a>(&'a self, block: &CodeBlock) -> impl Iterator<Item = (InstIndex, &'a Instruction)> + 'a {
        let begin = block.begin;
        let end = (block.end as usize).min(self.instructions.len());
        self.instructions[(begin as usize).min(end)..end]
            .iter()
            .enumerate()
            .map(move |(i, inst)| (begin + i as InstIndex, inst))
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::class::ClassTable;

    #[test]
    fn test_push_code_links() -> Result<()> {
        let mut program = Program::new();
        let range = program.push_code([Instruction::nop(), Instruction::nop(), Instruction::nop()]);
        assert_eq!(range, 0..3);
        assert_eq!(program.num_instructions(), 3);
        assert_eq!(program.instruction(0)?.next, Some(1));
        assert_eq!(program.instruction(1)?.next, Some(2));
        assert_eq!(program.instruction(2)?.next, None);
        let b = program.push_block(range, 1, vec![])?;
        assert_eq!(program.instructions(program.block(b)?).map(|(i, _)| i).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(program.block(1).err(), Some(Error::UnknownBlock(1)));
        assert!(program.push_block(0..4, 1, vec![]).is_err());
        Ok(())
    }

    #[test]
    fn test_accepted() {
        let b = Branch::when(IfCond::Ge, Operand::register(0), None, 1);
        assert_eq!(b.accepted(), Sign::ZERO | Sign::POSITIVE);
        assert_eq!(b.otherwise(2).accepted(), Sign::NEGATIVE);
        assert_eq!(Branch::when(IfCond::Ne, Operand::register(0), None, 1).accepted(), Sign::NEGATIVE | Sign::POSITIVE);
    }

    #[test]
    fn test_feasible() -> Result<()> {
        let classes = ClassTable::new();
        let m = Machine::new(&classes);
        let mut frame = Frame::new(2, &m);
        frame.register_load(&m, 0, 0, Sign::POSITIVE.into())?;
        frame.register_load(&m, 0, 1, Sign::NEGATIVE.into())?;

        let gt = Branch::when(IfCond::Gt, Operand::register(0), Some(Operand::register(1)), 1);
        assert!(gt.is_feasible(&frame, &m)?);
        assert!(!gt.otherwise(2).is_feasible(&frame, &m)?);

        let eqz = Branch::when(IfCond::Eq, Operand::register(0), None, 1);
        assert!(!eqz.is_feasible(&frame, &m)?);
        assert!(Branch::goto(0).is_feasible(&frame, &m)?);
        assert!(!Branch::goto(0).disable().is_feasible(&frame, &m)?);

        // Unknown register contents never rule a branch out.
        frame.register_clear(&m, 0, 0)?;
        assert!(eqz.is_feasible(&frame, &m)?);
        Ok(())
    }
}
