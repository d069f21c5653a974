//! Block graph: the abstract counterpart of a method's control-flow graph.
//!
//! Construction walks the blocks reachable from the entry with an explicit worklist and creates
//! one node per block. A block that already has a node is not expanded again, which also stops
//! the walk on back-edges. Nodes are never revisited once built, so a loop body is interpreted
//! from the state of its first entry only.

use std::collections::{HashMap, HashSet};

use log::{debug, error, warn};

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::interp::interpret_block;
use crate::machine::Machine;
use crate::program::{BlockIndex, Program};

#[derive(Debug, Clone)]
pub struct BlockNode {
    pub block: BlockIndex,
    /// Frame the block is interpreted from.
    pub input: Frame,
    /// Successor block of each branch, `None` for a disabled branch.
    pub fanout: Vec<Option<BlockIndex>>,
}

#[derive(Debug, Clone)]
pub struct BlockGraph {
    entry: BlockIndex,
    nodes: Vec<BlockNode>,
    index: HashMap<BlockIndex, usize>,
}

impl BlockGraph {
    /// Build the graph of every block reachable from `entry`.
    pub fn new(program: &Program, entry: BlockIndex, m: &Machine) -> Result<Self> {
        let mut nodes = Vec::new();
        let mut index = HashMap::new();
        let mut worklist = vec![entry];

        while let Some(block) = worklist.pop() {
            if index.contains_key(&block) {
                continue;
            }
            let code = program.block(block).map_err(|e| {
                error!("can not create a node for code block {}: {}", block, e);
                e
            })?;

            let fanout: Vec<Option<BlockIndex>> = code
                .branches
                .iter()
                .map(|b| if b.disabled { None } else { Some(b.target) })
                .collect();
            // Reversed, so that successors are expanded in branch order.
            worklist.extend(fanout.iter().rev().flatten().filter(|t| !index.contains_key(*t)));

            debug!("new node for block {} with {} branches", block, fanout.len());
            index.insert(block, nodes.len());
            nodes.push(BlockNode {
                block,
                input: Frame::new(code.nregs, m),
                fanout,
            });
        }

        Ok(Self { entry, nodes, index })
    }

    pub fn entry(&self) -> BlockIndex {
        self.entry
    }

    /// Number of nodes, one per distinct reachable block.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, block: BlockIndex) -> Option<&BlockNode> {
        self.index.get(&block).map(|&i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, block: BlockIndex) -> Option<&mut BlockNode> {
        self.index.get(&block).map(|&i| &mut self.nodes[i])
    }

    /// Nodes in construction order, the entry first.
    pub fn nodes(&self) -> impl Iterator<Item = &BlockNode> {
        self.nodes.iter()
    }

    /// Interpret one block from its node's input frame.
    pub fn interpret(&self, program: &Program, block: BlockIndex, m: &Machine) -> Result<Frame> {
        let node = self.node(block).ok_or(Error::UnknownBlock(block))?;
        let code = program.block(block)?;
        Ok(interpret_block(program, code, &node.input, m))
    }

    /// Successors of a block that may be entered from `output`.
    pub fn feasible_successors(
        &self,
        program: &Program,
        block: BlockIndex,
        output: &Frame,
        m: &Machine,
    ) -> Result<Vec<BlockIndex>> {
        let node = self.node(block).ok_or(Error::UnknownBlock(block))?;
        let code = program.block(block)?;
        let mut successors = Vec::new();
        for (branch, target) in code.branches.iter().zip(&node.fanout) {
            let Some(target) = *target else { continue };
            let feasible = branch.is_feasible(output, m).unwrap_or_else(|e| {
                warn!("can not evaluate branch {} -> {}: {}", block, target, e);
                true
            });
            if feasible {
                successors.push(target);
            }
        }
        Ok(successors)
    }

    /// Interpret every reachable block once, in depth-first order from the entry.
    ///
    /// Each block starts from a fork of the output of the first predecessor that reached it, and
    /// only branches feasible from that output are followed. Returns the output frame of every
    /// interpreted block in visiting order.
    pub fn walk(&self, program: &Program, m: &Machine) -> Result<Vec<(BlockIndex, Frame)>> {
        let entry = self.node(self.entry).ok_or(Error::UnknownBlock(self.entry))?;
        let mut visited = HashSet::new();
        let mut outputs = Vec::new();
        let mut stack = vec![(self.entry, entry.input.fork())];

        while let Some((block, input)) = stack.pop() {
            if !visited.insert(block) {
                continue;
            }
            let output = interpret_block(program, program.block(block)?, &input, m);
            let successors = self.feasible_successors(program, block, &output, m)?;
            for &target in successors.iter().rev() {
                if !visited.contains(&target) {
                    stack.push((target, output.fork()));
                }
            }
            outputs.push((block, output));
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::address::Sign;
    use crate::class::ClassTable;
    use crate::instruction::{IfCond, Instruction, Operand};
    use crate::program::Branch;

    #[test]
    fn test_diamond() -> Result<()> {
        let classes = ClassTable::new();
        let m = Machine::new(&classes);
        let mut program = Program::new();
        let r0 = program.push_code([Instruction::constant(0, Operand::int(1))]);
        let r1 = program.push_code([Instruction::nop()]);
        let r2 = program.push_code([Instruction::nop()]);
        let r3 = program.push_code([Instruction::nop()]);
        let taken = Branch::when(IfCond::Gt, Operand::register(0), None, 1);
        let b0 = program.push_block(r0, 1, vec![taken.clone(), taken.otherwise(2)])?;
        program.push_block(r1, 1, vec![Branch::goto(3)])?;
        program.push_block(r2, 1, vec![Branch::goto(3)])?;
        program.push_block(r3, 1, vec![])?;

        let graph = BlockGraph::new(&program, b0, &m)?;
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.node(0).map(|n| n.fanout.clone()), Some(vec![Some(1), Some(2)]));
        assert_eq!(graph.nodes().map(|n| n.block).collect::<Vec<_>>(), vec![0, 1, 3, 2]);

        // Only the taken side of the condition is walked.
        let outputs = graph.walk(&program, &m)?;
        assert_eq!(outputs.iter().map(|(b, _)| *b).collect::<Vec<_>>(), vec![0, 1, 3]);
        Ok(())
    }

    #[test]
    fn test_disabled_branch() -> Result<()> {
        let classes = ClassTable::new();
        let m = Machine::new(&classes);
        let mut program = Program::new();
        let r0 = program.push_code([Instruction::nop()]);
        let r1 = program.push_code([Instruction::nop()]);
        program.push_block(r0, 1, vec![Branch::goto(1).disable()])?;
        program.push_block(r1, 1, vec![])?;
        let graph = BlockGraph::new(&program, 0, &m)?;
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.node(0).map(|n| n.fanout.clone()), Some(vec![None]));
        assert!(graph.node(1).is_none());
        Ok(())
    }

    #[test]
    fn test_unknown_target() -> Result<()> {
        let classes = ClassTable::new();
        let m = Machine::new(&classes);
        let mut program = Program::new();
        let r0 = program.push_code([Instruction::nop()]);
        program.push_block(r0, 1, vec![Branch::goto(5)])?;
        assert_eq!(BlockGraph::new(&program, 0, &m).err(), Some(Error::UnknownBlock(5)));
        assert!(BlockGraph::new(&program, 1, &m).is_err());
        Ok(())
    }

    #[test]
    fn test_interpret_node() -> Result<()> {
        let classes = ClassTable::new();
        let m = Machine::new(&classes);
        let mut program = Program::new();
        let r0 = program.push_code([Instruction::constant(0, Operand::int(-2))]);
        program.push_block(r0, 1, vec![])?;
        let graph = BlockGraph::new(&program, 0, &m)?;
        let output = graph.interpret(&program, 0, &m)?;
        assert_eq!(output.register(0)?, m.sets().singleton(Sign::NEGATIVE.into()));
        assert!(graph.interpret(&program, 3, &m).is_err());
        Ok(())
    }

    #[test]
    fn test_seeded_input() -> Result<()> {
        let classes = ClassTable::new();
        let m = Machine::new(&classes);
        let mut program = Program::new();
        let r0 = program.push_code([Instruction::mov(Operand::register(1), Operand::register(0))]);
        let r1 = program.push_code([Instruction::nop()]);
        let taken = Branch::when(IfCond::Lt, Operand::register(1), None, 1);
        program.push_block(r0, 2, vec![taken])?;
        program.push_block(r1, 2, vec![])?;

        let mut graph = BlockGraph::new(&program, 0, &m)?;
        assert!(graph.node_mut(7).is_none());
        let node = graph.node_mut(0).ok_or(Error::UnknownBlock(0))?;
        node.input.register_load(&m, 0, 0, Sign::NEGATIVE.into())?;

        let output = graph.interpret(&program, 0, &m)?;
        assert_eq!(output.register(1)?, m.sets().singleton(Sign::NEGATIVE.into()));
        assert_eq!(graph.feasible_successors(&program, 0, &output, &m)?, vec![1]);
        assert_eq!(graph.walk(&program, &m)?.len(), 2);
        Ok(())
    }
}
