//! Code generation for host graphics APIs.
//!
//! Each backend walks the [SyntaxNode] list of a finished [Program]
//! and emits the instructions of each block with a dispatch on the [Opcode].
//! Opcodes a backend does not emit fail with [CompileError::UnsupportedOpcode].
//! Resource bindings are assigned in [Info](crate::ir::Info) descriptor order using [Bindings].
mod bindings;
pub mod glasm;
pub mod glsl;
pub mod spirv;

pub use bindings::{BindingClass, Bindings, StageBindings};

use crate::error::CompileError;
use crate::ir::{BlockId, InstId, Opcode, Program, SyntaxNode, Value};

pub(crate) fn unsupported(backend: &'static str, opcode: Opcode) -> CompileError {
    CompileError::UnsupportedOpcode { backend, opcode }
}

/// The number of uses of each instruction after resolving identities.
///
/// Only instructions in reachable blocks and syntax node conditions are counted.
/// Arguments of instructions emitted with another instruction are not uses.
pub(crate) fn resolved_use_counts(program: &Program) -> Vec<u32> {
    let pool = &program.pool;
    let mut counts = vec![0; pool.num_insts()];
    let mut add = |value: Value| {
        if let Some(inst) = pool.resolve_inst(value) {
            counts[inst.index()] += 1;
        }
    };
    for inst in program.instructions() {
        let op = pool.opcode(inst);
        if op.is_pseudo_instruction() || matches!(op, Opcode::Identity | Opcode::Void) {
            continue;
        }
        for arg in pool.inst(inst).args() {
            add(*arg);
        }
    }
    for node in &program.syntax_list {
        if let Some(cond) = node.cond() {
            add(cond);
        }
    }
    counts
}

/// A bit for each block reachable from the entry.
pub(crate) fn reachable_blocks(program: &Program) -> Vec<bool> {
    let mut reachable = vec![false; program.pool.num_blocks()];
    for block in &program.post_order_blocks {
        reachable[block.index()] = true;
    }
    reachable
}

/// The leading phi nodes of `block`.
pub(crate) fn phis(program: &Program, block: BlockId) -> Vec<InstId> {
    program
        .pool
        .block(block)
        .instructions()
        .iter()
        .copied()
        .take_while(|i| program.pool.inst(*i).is_phi())
        .collect()
}

/// Instructions the backends skip because another instruction emits them.
pub(crate) fn is_emitted_elsewhere(op: Opcode) -> bool {
    op.is_pseudo_instruction() || matches!(op, Opcode::Phi | Opcode::Identity | Opcode::Void)
}

/// The number of loop nodes enclosing each node in `syntax_list`.
pub(crate) fn loop_depths(syntax_list: &[SyntaxNode]) -> Vec<usize> {
    let mut depth = 0;
    syntax_list
        .iter()
        .map(|node| {
            match node {
                SyntaxNode::Loop { .. } => depth += 1,
                SyntaxNode::Repeat { .. } => depth -= 1,
                _ => (),
            }
            depth
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrEmitter;
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;

    #[test]
    fn use_counts_resolve_identities() {
        let mut program = Program::new(Stage::Compute);
        let block = program.pool.new_block();
        program.blocks = vec![block];
        program.post_order_blocks = vec![block];
        program.syntax_list = vec![SyntaxNode::Block(block), SyntaxNode::Return];

        let mut ir = IrEmitter::new(&mut program.pool, block);
        let lane = ir.lane_id();
        let copy = ir.emit(Opcode::Identity, &[lane]);
        let sum = ir.iadd(copy, lane);
        ir.reference(sum);

        let counts = resolved_use_counts(&program);
        let lane = lane.inst().unwrap();
        let sum = sum.inst().unwrap();
        // Both arguments of the addition resolve to the lane id.
        assert_eq!(2, counts[lane.index()]);
        assert_eq!(1, counts[sum.index()]);
    }
}
