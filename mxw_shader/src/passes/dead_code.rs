use crate::error::CompileError;
use crate::ir::{Opcode, Program};

/// Remove instructions without uses or side effects.
///
/// Blocks are visited in post order and instructions in reverse
/// so that removing an instruction can make its arguments dead in the same sweep.
pub fn dead_code_elimination(program: &mut Program) -> Result<(), CompileError> {
    let pool = &mut program.pool;
    for block in program.post_order_blocks.iter().copied() {
        let insts = pool.block(block).instructions().to_vec();
        for inst in insts.iter().rev().copied() {
            let i = pool.inst(inst);
            if i.opcode() != Opcode::Void && !i.has_uses() && !i.may_have_side_effects() {
                pool.invalidate(inst)?;
            }
        }

        // Retired instructions stay in the pool but are detached from the block.
        let (live, dead): (Vec<_>, Vec<_>) = insts
            .into_iter()
            .partition(|i| pool.opcode(*i) != Opcode::Void);
        for inst in dead {
            pool.inst_mut(inst).block = None;
        }
        pool.block_mut(block).insts = live;
    }
    Ok(())
}
