use std::fmt::Write;

use mxw_lib::header::OutputTopology;
use mxw_lib::Stage;

use super::shader_info::Info;
use super::syntax::SyntaxNode;
use super::value::Value;
use super::{BlockId, InstId, ObjectPool, Opcode};

/// A translated shader program.
#[derive(Debug, Clone)]
pub struct Program {
    pub pool: ObjectPool,
    /// Structured control flow for backends.
    pub syntax_list: Vec<SyntaxNode>,
    /// Reachable blocks in the order they appear in [syntax_list](#structfield.syntax_list).
    pub blocks: Vec<BlockId>,
    pub post_order_blocks: Vec<BlockId>,
    pub info: Info,
    pub stage: Stage,
    pub start_address: u32,
    pub is_geometry_passthrough: bool,
    /// Tessellation control output vertices or geometry shader invocations.
    pub invocations: u32,
    pub local_memory_size: u32,
    pub shared_memory_size: u32,
    pub workgroup_size: [u32; 3],
    pub output_topology: Option<OutputTopology>,
    pub output_vertices: u32,
}

impl Program {
    pub fn new(stage: Stage) -> Self {
        Self {
            pool: ObjectPool::new(),
            syntax_list: Vec::new(),
            blocks: Vec::new(),
            post_order_blocks: Vec::new(),
            info: Info::default(),
            stage,
            start_address: 0,
            is_geometry_passthrough: false,
            invocations: 1,
            local_memory_size: 0,
            shared_memory_size: 0,
            workgroup_size: [1, 1, 1],
            output_topology: None,
            output_vertices: 0,
        }
    }

    /// The instructions of every block in program order.
    pub fn instructions(&self) -> impl Iterator<Item = InstId> + '_ {
        self.blocks
            .iter()
            .flat_map(|b| self.pool.block(*b).instructions().iter().copied())
    }

    /// The instructions of every block in post order
    /// with instructions in each block in program order.
    pub fn post_order_instructions(&self) -> Vec<InstId> {
        self.post_order_blocks
            .iter()
            .flat_map(|b| self.pool.block(*b).instructions().iter().copied())
            .collect()
    }

    /// A human readable listing of every block and instruction.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            self.dump_block(&mut out, *block);
        }
        out
    }

    fn dump_block(&self, out: &mut String, block: BlockId) {
        let b = self.pool.block(block);
        let preds: Vec<_> = b.imm_predecessors().iter().map(|p| p.index()).collect();
        let _ = writeln!(out, "Block {} (preds: {preds:?})", block.index());
        for inst in b.instructions() {
            let _ = writeln!(out, "    {}", self.dump_inst(*inst));
        }
    }

    fn dump_inst(&self, id: InstId) -> String {
        let inst = self.pool.inst(id);
        let mut line = String::new();
        if !inst.result_type().is_empty() {
            let _ = write!(line, "%{} = ", id.index());
        }
        line.push_str(inst.opcode().name());

        if inst.opcode() == Opcode::Phi {
            let operands: Vec<_> = inst
                .phi_operands()
                .map(|(b, v)| format!("[ {}, Block {} ]", format_value(v), b.index()))
                .collect();
            let _ = write!(line, " {}", operands.join(", "));
        } else if inst.num_args() > 0 {
            let args: Vec<_> = inst.args().iter().map(|v| format_value(*v)).collect();
            let _ = write!(line, " {}", args.join(", "));
        }

        if inst.flags() != 0 && inst.opcode() != Opcode::Phi {
            let _ = write!(line, " (flags: {:#x})", inst.flags());
        }
        if inst.use_count() > 0 {
            let _ = write!(line, " (uses: {})", inst.use_count());
        }
        line
    }
}

fn format_value(value: Value) -> String {
    match value {
        Value::Void => "void".to_string(),
        Value::Inst(i) => format!("%{}", i.index()),
        Value::Label(b) => format!("Block {}", b.index()),
        Value::Reg(r) => r.to_string(),
        Value::Pred(p) => p.to_string(),
        Value::Attribute(a) => a.to_string(),
        Value::Patch(p) => p.to_string(),
        Value::U1(v) => v.to_string(),
        Value::U8(v) => format!("#{v}"),
        Value::U16(v) => format!("#{v}"),
        Value::U32(v) => format!("#{v}"),
        Value::U64(v) => format!("#{v}"),
        Value::F32(v) => format!("#{v:?}"),
        Value::F64(v) => format!("#{v:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Reg;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn dump_single_block() {
        let mut program = Program::new(Stage::Compute);
        let block = program.pool.new_block();
        program.blocks.push(block);

        let pool = &mut program.pool;
        let r1 = pool
            .append_inst(block, Opcode::GetRegister, &[Reg(1).into()], 0)
            .unwrap();
        let add = pool
            .append_inst(block, Opcode::IAdd32, &[r1.into(), Value::U32(4)], 0)
            .unwrap();
        pool.append_inst(block, Opcode::SetRegister, &[Reg(0).into(), add.into()], 0)
            .unwrap();

        assert_eq!(
            indoc! {"
                Block 0 (preds: [])
                    %0 = GetRegister R1 (uses: 1)
                    %1 = IAdd32 %0, #4 (uses: 1)
                    SetRegister R0, %1
            "},
            program.dump()
        );
    }
}
