use super::{BlockId, InstId};

/// A basic block of instructions with its control flow edges.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub(crate) insts: Vec<InstId>,
    pub(crate) imm_predecessors: Vec<BlockId>,
    pub(crate) imm_successors: Vec<BlockId>,
    /// Backend specific data like a SPIR-V label id.
    pub definition: u32,
}

impl Block {
    pub fn instructions(&self) -> &[InstId] {
        &self.insts
    }

    pub fn imm_predecessors(&self) -> &[BlockId] {
        &self.imm_predecessors
    }

    pub fn imm_successors(&self) -> &[BlockId] {
        &self.imm_successors
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}
