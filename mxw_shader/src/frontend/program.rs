use log::debug;
use mxw_lib::{Stage, TextureType};

use super::control_flow::Cfg;
use super::structurize::{structurize, Stmt};
use super::translate::translate_block;
use crate::environment::Environment;
use crate::error::CompileError;
use crate::ir::{
    post_order, BlockId, Info, IrEmitter, Opcode, Program, Reg, StorageBufferDescriptor,
    SyntaxNode, TextureInstInfo, Value,
};
use crate::logic_error;
use crate::passes;
use crate::profile::Profile;

/// Translate the program described by `env` and run the optimization passes.
#[tracing::instrument(skip_all)]
pub fn translate_program(
    env: &mut dyn Environment,
    profile: &Profile,
) -> Result<Program, CompileError> {
    let start_address = env.start_address();
    let cfg = Cfg::new(env, start_address)?;
    let stmts = structurize(&cfg)?;

    let mut program = Program::new(env.stage());
    program.start_address = start_address;
    SyntaxBuilder::new(env, &cfg, &mut program).build(&stmts)?;

    program.blocks = syntax_blocks(&program.syntax_list);
    let entry = *program
        .blocks
        .first()
        .ok_or_else(|| logic_error!("Program has no blocks"))?;
    program.post_order_blocks = post_order(&program.pool, entry);
    remove_unreachable_blocks(&mut program);

    set_stage_fields(env, &mut program);
    debug!(
        "Translated {:?} program with {} blocks",
        program.stage,
        program.blocks.len()
    );

    if !profile.support_float16 {
        passes::lower_fp16_to_fp32(&mut program)?;
    }
    passes::ssa_rewrite(&mut program)?;
    passes::global_memory_to_storage_buffer(&mut program)?;
    passes::texture_pass(env, &mut program)?;
    passes::constant_propagation(&mut program)?;
    passes::dead_code_elimination(&mut program)?;
    passes::verification(&program)?;
    passes::collect_shader_info(env, &mut program)?;
    if program.stage == Stage::Fragment {
        passes::collect_interpolation_info(env, &mut program)?;
    }
    passes::add_nvn_storage_buffers(&mut program);
    Ok(program)
}

/// Combine the two halves of a vertex program into a single program running `vertex_a` first.
///
/// Both programs must already be fully translated.
/// The descriptors of `vertex_b` are joined into the lists of `vertex_a`.
#[tracing::instrument(skip_all)]
pub fn merge_dual_vertex_programs(
    mut vertex_a: Program,
    mut vertex_b: Program,
    env_vertex_b: &mut dyn Environment,
) -> Result<Program, CompileError> {
    // The epilogue of A and the prologue of B would run in the middle of the merged program.
    remove_opcode(&mut vertex_a, Opcode::Epilogue)?;
    remove_opcode(&mut vertex_b, Opcode::Prologue)?;

    let mut info = vertex_a.info;
    join_descriptors(&mut info, &mut vertex_b)?;

    let (inst_offset, block_offset) = vertex_a.pool.absorb(vertex_b.pool);
    let remap = |b: BlockId| b.offset(block_offset);

    let mut result = Program::new(Stage::VertexB);
    result.pool = vertex_a.pool;
    result.start_address = vertex_b.start_address;

    // Every exit of A continues with B.
    result.syntax_list = vertex_a.syntax_list;
    result
        .syntax_list
        .retain(|node| !matches!(node, SyntaxNode::Return));
    result
        .syntax_list
        .extend(vertex_b.syntax_list.into_iter().map(|mut node| {
            node.map_blocks(remap);
            if let Some(cond) = node.cond_mut() {
                *cond = remap_value(*cond, inst_offset, block_offset);
            }
            node
        }));
    result.blocks = syntax_blocks(&result.syntax_list);

    result.post_order_blocks = vertex_b
        .post_order_blocks
        .iter()
        .map(|b| remap(*b))
        .chain(vertex_a.post_order_blocks.iter().copied())
        .collect();

    result.info = info;
    result.local_memory_size = vertex_a.local_memory_size.max(vertex_b.local_memory_size);
    for (a, b) in result
        .info
        .input_generics
        .iter_mut()
        .zip(vertex_b.info.input_generics.iter())
    {
        a.used |= b.used;
    }
    for (a, b) in result
        .info
        .stores_generics
        .iter_mut()
        .zip(vertex_b.info.stores_generics.iter())
    {
        *a |= *b;
    }

    passes::dead_code_elimination(&mut result)?;
    passes::verification(&result)?;
    passes::collect_shader_info(env_vertex_b, &mut result)?;
    Ok(result)
}

fn add_storage_buffer(info: &mut Info, desc: StorageBufferDescriptor) -> usize {
    let buffers = &mut info.storage_buffers_descriptors;
    match buffers
        .iter()
        .position(|d| d.cbuf_index == desc.cbuf_index && d.cbuf_offset == desc.cbuf_offset)
    {
        Some(index) => {
            buffers[index].is_written |= desc.is_written;
            index
        }
        None => {
            buffers.push(desc);
            buffers.len() - 1
        }
    }
}

/// Add the descriptors of `vertex_b` to `info`
/// and point the resource instructions of `vertex_b` at the joined descriptors.
fn join_descriptors(info: &mut Info, vertex_b: &mut Program) -> Result<(), CompileError> {
    let b = &vertex_b.info;
    let storage_buffers: Vec<_> = b
        .storage_buffers_descriptors
        .iter()
        .map(|d| add_storage_buffer(info, *d))
        .collect();
    let textures: Vec<_> = b
        .texture_descriptors
        .iter()
        .map(|d| passes::add_texture(info, *d))
        .collect();
    let texture_buffers: Vec<_> = b
        .texture_buffer_descriptors
        .iter()
        .map(|d| passes::add_texture_buffer(info, *d))
        .collect();
    let images: Vec<_> = b
        .image_descriptors
        .iter()
        .map(|d| passes::add_image(info, *d))
        .collect();
    let image_buffers: Vec<_> = b
        .image_buffer_descriptors
        .iter()
        .map(|d| passes::add_image_buffer(info, *d))
        .collect();

    let insts: Vec<_> = vertex_b.instructions().collect();
    let pool = &mut vertex_b.pool;
    for inst in insts {
        let op = pool.opcode(inst);
        if op.is_storage() {
            let index = pool
                .resolve(pool.inst(inst).arg(0))
                .u32()
                .ok_or_else(|| logic_error!("Dynamic storage buffer index in {op:?}"))?;
            let joined = joined_index(&storage_buffers, index, op)?;
            pool.set_arg(inst, 0, Value::U32(joined as u32))?;
        } else if op.is_texture() || op.is_image() {
            let mut flags = TextureInstInfo::from(pool.inst(inst).flags());
            let is_buffer = flags.texture_type_enum() == TextureType::Buffer;
            let indices = match (op.is_image(), is_buffer) {
                (true, true) => &image_buffers,
                (true, false) => &images,
                (false, true) => &texture_buffers,
                (false, false) => &textures,
            };
            let joined = joined_index(indices, u32::from(flags.descriptor_index()), op)?;
            flags.set_descriptor_index(joined as u16);
            pool.inst_mut(inst).set_flags(flags.flags());
        }
    }
    Ok(())
}

fn joined_index(indices: &[usize], index: u32, op: Opcode) -> Result<usize, CompileError> {
    indices
        .get(index as usize)
        .copied()
        .ok_or_else(|| logic_error!("{op:?} uses missing descriptor {index}"))
}

fn remap_value(value: Value, inst_offset: u32, block_offset: u32) -> Value {
    match value {
        Value::Inst(i) => Value::Inst(i.offset(inst_offset)),
        Value::Label(b) => Value::Label(b.offset(block_offset)),
        v => v,
    }
}

fn remove_opcode(program: &mut Program, op: Opcode) -> Result<(), CompileError> {
    let insts: Vec<_> = program
        .instructions()
        .filter(|i| program.pool.opcode(*i) == op)
        .collect();
    for inst in insts {
        program.pool.invalidate(inst)?;
        program.pool.remove_inst_from_block(inst);
    }
    Ok(())
}

/// The blocks in the order they appear in the syntax list.
fn syntax_blocks(syntax_list: &[SyntaxNode]) -> Vec<BlockId> {
    syntax_list
        .iter()
        .filter_map(|node| match node {
            SyntaxNode::Block(b) => Some(*b),
            _ => None,
        })
        .collect()
}

/// Drop blocks the entry can not reach like the continue block of a loop that always exits.
fn remove_unreachable_blocks(program: &mut Program) {
    if program.blocks.len() == program.post_order_blocks.len() {
        return;
    }
    let mut reachable = vec![false; program.pool.num_blocks()];
    for b in &program.post_order_blocks {
        reachable[b.index()] = true;
    }
    let before = program.blocks.len();
    program.blocks.retain(|b| reachable[b.index()]);
    debug!(
        "Removed {} unreachable blocks",
        before - program.blocks.len()
    );
}

fn set_stage_fields(env: &dyn Environment, program: &mut Program) {
    let sph = env.sph();
    match program.stage {
        Stage::TessellationControl => {
            program.invocations = u32::from(sph.common2.threads_per_input_primitive());
        }
        Stage::Geometry => {
            program.output_topology = sph.output_topology();
            program.output_vertices = u32::from(sph.common4.max_output_vertices().value());
            program.invocations = u32::from(sph.common2.threads_per_input_primitive()).max(1);
        }
        Stage::Compute => {
            program.workgroup_size = env.workgroup_size();
            program.shared_memory_size = env.shared_memory_size();
        }
        _ => (),
    }
    program.local_memory_size = env.local_memory_size();
}

/// Emits blocks and syntax nodes for structured statements.
struct SyntaxBuilder<'a> {
    env: &'a mut dyn Environment,
    cfg: &'a Cfg,
    program: &'a mut Program,
    /// The block receiving instructions or `None` after control left the current path.
    current: Option<BlockId>,
    loop_merges: Vec<BlockId>,
}

impl<'a> SyntaxBuilder<'a> {
    fn new(env: &'a mut dyn Environment, cfg: &'a Cfg, program: &'a mut Program) -> Self {
        Self {
            env,
            cfg,
            program,
            current: None,
            loop_merges: Vec::new(),
        }
    }

    fn build(mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        let entry = self.program.pool.new_block();
        self.begin_block(entry);
        IrEmitter::new(&mut self.program.pool, entry).prologue();

        self.stmts(stmts)?;
        if self.current.is_some() {
            self.program.syntax_list.push(SyntaxNode::Unreachable);
        }
        Ok(())
    }

    fn begin_block(&mut self, block: BlockId) {
        self.program.syntax_list.push(SyntaxNode::Block(block));
        self.current = Some(block);
    }

    fn ir(&mut self, block: BlockId) -> IrEmitter<'_> {
        IrEmitter::new(&mut self.program.pool, block)
    }

    fn stmts(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            if self.current.is_none() {
                break;
            }
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        let Some(block) = self.current else {
            return Ok(());
        };
        match stmt {
            Stmt::Code(flow) => {
                translate_block(&mut *self.env, &mut self.program.pool, block, self.cfg, *flow)?;
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let value = self.ir(block).get_pred(cond.pred, cond.negate);
                self.if_stmt(value, then)?;
                if !otherwise.is_empty() {
                    if let Some(merge) = self.current {
                        let not_value = self.ir(merge).logical_not(value);
                        self.if_stmt(not_value, otherwise)?;
                    }
                }
            }
            Stmt::Loop { body, repeat } => {
                let pool = &mut self.program.pool;
                let body_block = pool.new_block();
                let continue_block = pool.new_block();
                let merge = pool.new_block();
                pool.add_branch(block, body_block)?;
                self.program.syntax_list.push(SyntaxNode::Loop {
                    body: body_block,
                    continue_block,
                    merge,
                });

                self.begin_block(body_block);
                self.loop_merges.push(merge);
                self.stmts(body)?;
                self.loop_merges.pop();

                let falls_through = if let Some(end) = self.current {
                    self.program.pool.add_branch(end, continue_block)?;
                    true
                } else {
                    false
                };
                self.begin_block(continue_block);
                let cond = if falls_through {
                    let mut ir = self.ir(continue_block);
                    let value = ir.get_pred(repeat.pred, repeat.negate);
                    ir.condition_ref(value)
                } else {
                    Value::U1(false)
                };
                self.program.syntax_list.push(SyntaxNode::Repeat {
                    cond,
                    loop_header: body_block,
                    merge,
                });
                let pool = &mut self.program.pool;
                pool.add_branch(continue_block, body_block)?;
                pool.add_branch(continue_block, merge)?;
                self.begin_block(merge);
            }
            Stmt::Break(cond) => {
                let merge = *self
                    .loop_merges
                    .last()
                    .ok_or_else(|| logic_error!("Break outside of a loop"))?;
                let mut ir = self.ir(block);
                let value = ir.get_pred(cond.pred, cond.negate);
                let cond = ir.condition_ref(value);

                let pool = &mut self.program.pool;
                let skip = pool.new_block();
                pool.add_branch(block, merge)?;
                pool.add_branch(block, skip)?;
                self.program
                    .syntax_list
                    .push(SyntaxNode::Break { cond, merge, skip });
                self.begin_block(skip);
            }
            Stmt::Return => {
                if self.program.stage == Stage::Fragment {
                    self.exit_fragment(block)?;
                }
                self.ir(block).epilogue();
                self.program.syntax_list.push(SyntaxNode::Return);
                self.current = None;
            }
        }
        Ok(())
    }

    fn if_stmt(&mut self, cond: Value, body: &[Stmt]) -> Result<(), CompileError> {
        let Some(header) = self.current else {
            return Ok(());
        };
        let cond = self.ir(header).condition_ref(cond);

        let pool = &mut self.program.pool;
        let body_block = pool.new_block();
        let merge = pool.new_block();
        pool.add_branch(header, body_block)?;
        pool.add_branch(header, merge)?;
        self.program.syntax_list.push(SyntaxNode::If {
            cond,
            body: body_block,
            merge,
        });

        self.begin_block(body_block);
        self.stmts(body)?;
        if let Some(end) = self.current {
            self.program.pool.add_branch(end, merge)?;
        }
        self.program.syntax_list.push(SyntaxNode::EndIf { merge });
        self.begin_block(merge);
        Ok(())
    }

    /// Write the fragment outputs from consecutive registers starting at R0.
    fn exit_fragment(&mut self, block: BlockId) -> Result<(), CompileError> {
        let ps = self.env.sph().ps().map_err(|e| {
            CompileError::Runtime(format!("Failed to read pixel shader header: {e}"))
        })?;
        let mut ir = IrEmitter::new(&mut self.program.pool, block);
        let mut reg = Reg(0);
        for render_target in 0..8 {
            for component in 0..4 {
                if ps.is_color_component_written(render_target, component) {
                    let value = ir.get_reg(reg);
                    let value = ir.bit_cast_to_float(value);
                    ir.set_frag_color(render_target as u32, component as u32, value);
                    reg = reg.offset(1);
                }
            }
        }
        if ps.omap.sample_mask() {
            let value = ir.get_reg(reg);
            ir.set_sample_mask(value);
        }
        if ps.omap.depth() {
            let value = ir.get_reg(reg.offset(1));
            let value = ir.bit_cast_to_float(value);
            ir.set_frag_depth(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::test_environment;
    use crate::ir::{Attribute, TextureDescriptor};
    use mxw_lib::header::ProgramHeader;
    use pretty_assertions::assert_eq;

    fn syntax(stage: Stage, sph: ProgramHeader, insns: &[u64]) -> Program {
        let mut env = test_environment(stage, sph, insns);
        let cfg = Cfg::new(&mut env, 0).unwrap();
        let stmts = structurize(&cfg).unwrap();
        let mut program = Program::new(stage);
        SyntaxBuilder::new(&mut env, &cfg, &mut program)
            .build(&stmts)
            .unwrap();
        program.blocks = syntax_blocks(&program.syntax_list);
        program.post_order_blocks = post_order(&program.pool, program.blocks[0]);
        program
    }

    fn empty_sph() -> ProgramHeader {
        ProgramHeader::from_bytes(&[0u8; 0x50]).unwrap()
    }

    #[test]
    fn straight_line_program() {
        // MOV32I R0, 0x3f800000; EXIT
        let program = syntax(
            Stage::Compute,
            empty_sph(),
            &[0x0103f80000070000, 0xe30000000007000f],
        );
        let b = program.blocks[0];
        assert_eq!(
            vec![SyntaxNode::Block(b), SyntaxNode::Return],
            program.syntax_list
        );
        let ops: Vec<_> = program
            .pool
            .block(b)
            .instructions()
            .iter()
            .map(|i| program.pool.opcode(*i))
            .collect();
        assert_eq!(
            vec![Opcode::Prologue, Opcode::SetRegister, Opcode::Epilogue],
            ops
        );
    }

    #[test]
    fn predicated_instruction_becomes_if() {
        // @P0 MOV32I R0, 0x3f800000; EXIT
        let program = syntax(
            Stage::Compute,
            empty_sph(),
            &[0x0103f80000000000, 0xe30000000007000f],
        );
        assert!(matches!(
            program.syntax_list.as_slice(),
            [
                SyntaxNode::Block(_),
                SyntaxNode::If { .. },
                SyntaxNode::Block(_),
                SyntaxNode::EndIf { .. },
                SyntaxNode::Block(_),
                SyntaxNode::Return
            ]
        ));
        assert_eq!(program.blocks.len(), program.post_order_blocks.len());
    }

    #[test]
    fn fragment_exit_writes_outputs() {
        let mut bytes = [0u8; 0x50];
        // Render target 0 with all components and depth.
        bytes[0x14 + 0x3c - 4..0x14 + 0x3c].copy_from_slice(&0x2u32.to_le_bytes());
        bytes[0x14 + 0x3c - 8..0x14 + 0x3c - 4].copy_from_slice(&0xfu32.to_le_bytes());
        let sph = ProgramHeader::from_bytes(&bytes).unwrap();

        let program = syntax(Stage::Fragment, sph, &[0xe30000000007000f]);
        let ops: Vec<_> = program
            .instructions()
            .map(|i| program.pool.opcode(i))
            .filter(|op| matches!(op, Opcode::SetFragColor | Opcode::SetFragDepth))
            .collect();
        assert_eq!(
            vec![
                Opcode::SetFragColor,
                Opcode::SetFragColor,
                Opcode::SetFragColor,
                Opcode::SetFragColor,
                Opcode::SetFragDepth
            ],
            ops
        );
    }

    fn single_block(stage: Stage, f: impl FnOnce(&mut IrEmitter)) -> Program {
        let mut program = Program::new(stage);
        let block = program.pool.new_block();
        program.blocks = vec![block];
        program.post_order_blocks = vec![block];
        program.syntax_list = vec![SyntaxNode::Block(block), SyntaxNode::Return];
        f(&mut IrEmitter::new(&mut program.pool, block));
        program
    }

    fn merge(vertex_a: Program, vertex_b: Program) -> Program {
        let mut env = test_environment(Stage::VertexB, empty_sph(), &[]);
        merge_dual_vertex_programs(vertex_a, vertex_b, &mut env).unwrap()
    }

    /// `PackUint2x32(CompositeConstructU32x2(cbuf[0][offset], cbuf[0][offset + 4]))`
    fn cbuf_pointer(ir: &mut IrEmitter, offset: u32) -> Value {
        let low = ir.get_cbuf_u32(Value::U32(0), Value::U32(offset));
        let high = ir.get_cbuf_u32(Value::U32(0), Value::U32(offset + 4));
        let vector = ir.composite_construct(&[low, high]);
        ir.pack_uint_2x32(vector)
    }

    fn load_global(ir: &mut IrEmitter, offset: u32) {
        let pointer = cbuf_pointer(ir, offset);
        let load = ir.load_global(Opcode::LoadGlobal32, pointer);
        ir.reference(load);
    }

    fn sample(ir: &mut IrEmitter, handle: u32) {
        let mut info = TextureInstInfo::default();
        info.set_texture_type_enum(TextureType::Color2D);
        let value = ir.image_op(
            Opcode::ImageSampleImplicitLod,
            &[Value::U32(handle), Value::F32(0.5), Value::Void, Value::Void],
            info,
        );
        ir.reference(value);
    }

    #[test]
    fn merge_drops_every_return_of_vertex_a() {
        let mut a = Program::new(Stage::VertexA);
        let entry = a.pool.new_block();
        let body = a.pool.new_block();
        let merge_block = a.pool.new_block();
        a.pool.add_branch(entry, body).unwrap();
        a.pool.add_branch(entry, merge_block).unwrap();
        IrEmitter::new(&mut a.pool, merge_block).set_attribute(
            Attribute::generic(0, 0),
            Value::F32(1.0),
            Value::U32(0),
        );
        a.syntax_list = vec![
            SyntaxNode::Block(entry),
            SyntaxNode::If {
                cond: Value::U1(true),
                body,
                merge: merge_block,
            },
            SyntaxNode::Block(body),
            SyntaxNode::Return,
            SyntaxNode::EndIf { merge: merge_block },
            SyntaxNode::Block(merge_block),
            SyntaxNode::Return,
        ];
        a.blocks = syntax_blocks(&a.syntax_list);
        a.post_order_blocks = post_order(&a.pool, entry);
        let a_post_order = a.post_order_blocks.clone();

        let b = single_block(Stage::VertexB, |ir| {
            ir.set_attribute(Attribute::generic(1, 0), Value::F32(2.0), Value::U32(0));
        });
        let b_block = b.blocks[0].offset(3);

        let merged = merge(a, b);
        assert_eq!(Stage::VertexB, merged.stage);
        assert_eq!(
            vec![
                SyntaxNode::Block(entry),
                SyntaxNode::If {
                    cond: Value::U1(true),
                    body,
                    merge: merge_block,
                },
                SyntaxNode::Block(body),
                SyntaxNode::EndIf { merge: merge_block },
                SyntaxNode::Block(merge_block),
                SyntaxNode::Block(b_block),
                SyntaxNode::Return,
            ],
            merged.syntax_list
        );
        assert_eq!(vec![entry, body, merge_block, b_block], merged.blocks);

        // The blocks of B come first in post order.
        let mut expected = vec![b_block];
        expected.extend(a_post_order);
        assert_eq!(expected, merged.post_order_blocks);
    }

    #[test]
    fn merge_generic_flags() {
        let mut a = single_block(Stage::VertexA, |_| ());
        a.info.input_generics[0].used = true;
        a.info.stores_generics[4] = true;
        let mut b = single_block(Stage::VertexB, |_| ());
        b.info.input_generics[2].used = true;
        b.info.stores_generics[5] = true;

        let merged = merge(a, b);
        assert!(merged.info.input_generics[0].used);
        assert!(merged.info.input_generics[2].used);
        assert!(!merged.info.input_generics[1].used);
        assert!(merged.info.stores_generics[4]);
        assert!(merged.info.stores_generics[5]);
    }

    #[test]
    fn merge_joins_storage_buffers() {
        let mut a = single_block(Stage::VertexA, |ir| load_global(ir, 0x110));
        passes::global_memory_to_storage_buffer(&mut a).unwrap();

        let mut b = single_block(Stage::VertexB, |ir| {
            load_global(ir, 0x120);
            load_global(ir, 0x110);
            let pointer = cbuf_pointer(ir, 0x110);
            ir.write_global(Opcode::WriteGlobal32, pointer, Value::U32(1));
        });
        passes::global_memory_to_storage_buffer(&mut b).unwrap();
        assert_eq!(0x120, b.info.storage_buffers_descriptors[0].cbuf_offset);

        let merged = merge(a, b);
        assert_eq!(
            vec![
                StorageBufferDescriptor {
                    cbuf_index: 0,
                    cbuf_offset: 0x110,
                    count: 1,
                    is_written: true
                },
                StorageBufferDescriptor {
                    cbuf_index: 0,
                    cbuf_offset: 0x120,
                    count: 1,
                    is_written: false
                }
            ],
            merged.info.storage_buffers_descriptors
        );

        let accesses: Vec<_> = merged
            .instructions()
            .filter(|i| merged.pool.opcode(*i).is_storage())
            .map(|i| (merged.pool.opcode(i), merged.pool.inst(i).arg(0)))
            .collect();
        assert_eq!(
            vec![
                (Opcode::LoadStorage32, Value::U32(0)),
                (Opcode::LoadStorage32, Value::U32(1)),
                (Opcode::LoadStorage32, Value::U32(0)),
                (Opcode::WriteStorage32, Value::U32(0)),
            ],
            accesses
        );
    }

    #[test]
    fn merge_joins_textures() {
        let mut env = test_environment(Stage::VertexA, empty_sph(), &[]);
        let mut a = single_block(Stage::VertexA, |ir| sample(ir, 0x40));
        passes::texture_pass(&mut env, &mut a).unwrap();

        let mut b = single_block(Stage::VertexB, |ir| {
            sample(ir, 0x44);
            sample(ir, 0x40);
        });
        passes::texture_pass(&mut env, &mut b).unwrap();

        let merged = merge(a, b);
        let texture = |cbuf_offset| TextureDescriptor {
            texture_type: TextureType::Color2D,
            is_depth: false,
            cbuf_index: 1,
            cbuf_offset,
            count: 1,
        };
        assert_eq!(
            vec![texture(0x40), texture(0x44)],
            merged.info.texture_descriptors
        );

        let indices: Vec<_> = merged
            .instructions()
            .filter(|i| merged.pool.opcode(*i).is_texture())
            .map(|i| TextureInstInfo::from(merged.pool.inst(i).flags()).descriptor_index())
            .collect();
        assert_eq!(vec![0, 1, 0], indices);
    }
}
