//! Rewrite global memory accesses through pointers stored in constant buffers
//! into storage buffer accesses.
use indexmap::IndexSet;
use log::warn;

use super::track::{breadth_first_search, cbuf_u32_addr, Bias, CbufAddr};
use crate::error::CompileError;
use crate::ir::{InstId, IrEmitter, ObjectPool, Opcode, Program, StorageBufferDescriptor, Type, Value};
use crate::logic_error;

/// The driver region of constant buffer 0 containing storage buffer pointers.
/// Pointers outside this region are only considered if no pointer inside it is found.
const NVN_BIAS: Bias = Bias {
    index: 0,
    offset_begin: 0x110,
    offset_end: 0x610,
};

/// Storage buffer pointers in constant buffers are always 16 byte aligned.
const POINTER_ALIGNMENT: u32 = 16;

/// The low 32 bits of a global address and the immediate byte offset applied to it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LowAddr {
    value: Value,
    imm_offset: i32,
}

/// Find the low 32 bits of the pointer for a global memory instruction.
///
/// Addresses are expected to be built as
/// `IAdd64(PackUint2x32(CompositeConstructU32x2(low, high)), offset)`
/// with the immediate offset being optional.
fn track_low_address(pool: &ObjectPool, inst: InstId) -> Option<LowAddr> {
    let addr = pool.resolve(pool.inst(inst).arg(0));
    let mut addr_inst = addr.inst()?;

    let mut imm_offset = 0;
    if pool.opcode(addr_inst) == Opcode::IAdd64 {
        // Constant propagation moves immediates to the second argument.
        let offset = pool.resolve(pool.inst(addr_inst).arg(1)).u64()?;
        imm_offset = offset as i64 as i32;
        addr_inst = pool.resolve_inst(pool.inst(addr_inst).arg(0))?;
    }
    if pool.opcode(addr_inst) == Opcode::PackUint2x32 {
        addr_inst = pool.resolve_inst(pool.inst(addr_inst).arg(0))?;
    }
    if pool.opcode(addr_inst) != Opcode::CompositeConstructU32x2 {
        return None;
    }
    Some(LowAddr {
        value: pool.inst(addr_inst).arg(0),
        imm_offset,
    })
}

/// Search for the constant buffer pointer that `value` was computed from.
fn track(pool: &ObjectPool, value: Value, bias: Option<&Bias>) -> Option<CbufAddr> {
    breadth_first_search(pool, value, |inst| {
        let addr = cbuf_u32_addr(pool, inst)?;
        if addr.offset % POINTER_ALIGNMENT != 0 {
            return None;
        }
        if let Some(bias) = bias {
            if !bias.contains(addr) {
                return None;
            }
        }
        Some(addr)
    })
}

fn track_storage_buffer(pool: &ObjectPool, inst: InstId) -> Option<CbufAddr> {
    let low_addr = track_low_address(pool, inst)?;
    track(pool, low_addr.value, Some(&NVN_BIAS)).or_else(|| track(pool, low_addr.value, None))
}

/// The byte offset into the storage buffer for a global memory instruction.
fn storage_offset(ir: &mut IrEmitter, inst: InstId, buffer: CbufAddr) -> Value {
    let offset = match track_low_address(ir.pool, inst) {
        Some(low_addr) => {
            if low_addr.imm_offset != 0 {
                ir.iadd(low_addr.value, Value::U32(low_addr.imm_offset as u32))
            } else {
                low_addr.value
            }
        }
        None => {
            let addr = ir.pool.inst(inst).arg(0);
            ir.uconvert(addr, 32)
        }
    };
    // The low bits of the base pointer convert the address to an offset in bytes.
    let base = ir.get_cbuf_u32(Value::U32(buffer.index), Value::U32(buffer.offset));
    ir.isub(offset, base)
}

fn replace_with_storage(
    pool: &mut ObjectPool,
    inst: InstId,
    descriptor_index: usize,
    buffer: CbufAddr,
) -> Result<(), CompileError> {
    let op = pool.opcode(inst);
    let Some(storage_op) = op.global_to_storage() else {
        return Err(logic_error!("{op:?} is not a global memory instruction"));
    };
    let Some(mut ir) = IrEmitter::before(pool, inst) else {
        return Err(logic_error!("{op:?} is not in a block"));
    };

    let offset = storage_offset(&mut ir, inst, buffer);
    let (flags, value_args) = {
        let inst = ir.pool.inst(inst);
        (inst.flags(), inst.args()[1..].to_vec())
    };
    let mut args = vec![Value::U32(descriptor_index as u32), offset];
    args.extend(value_args);
    let storage = ir.emit_flags(storage_op, &args, flags);

    if op.return_type() == Type::VOID {
        pool.invalidate(inst)
    } else {
        pool.replace_uses_with(inst, storage)
    }
}

/// Remove an access whose address could not be resolved.
/// Loads and atomics produce zero and stores have no effect.
fn discard_global_memory(pool: &mut ObjectPool, inst: InstId) -> Result<(), CompileError> {
    let ty = pool.opcode(inst).return_type();
    if ty == Type::VOID {
        return pool.invalidate(inst);
    }

    let zero = match Value::zero(ty) {
        Some(zero) => zero,
        None => {
            let Some(mut ir) = IrEmitter::before(pool, inst) else {
                return Err(logic_error!("{inst:?} is not in a block"));
            };
            let zeros = vec![Value::U32(0); ty.component_count()];
            ir.composite_construct(&zeros)
        }
    };
    pool.replace_uses_with(inst, zero)
}

/// Convert global memory instructions to storage buffer instructions.
///
/// Each distinct constant buffer pointer becomes a storage buffer descriptor in discovery order.
/// Instructions whose pointer cannot be tracked are discarded instead of failing the program.
pub fn global_memory_to_storage_buffer(program: &mut Program) -> Result<(), CompileError> {
    let mut buffers = IndexSet::new();
    let mut written = IndexSet::new();
    let mut to_replace = Vec::new();
    let mut to_discard = Vec::new();

    for block in program.post_order_blocks.iter().rev() {
        for inst in program.pool.block(*block).instructions() {
            let op = program.pool.opcode(*inst);
            if !op.is_global_memory() {
                continue;
            }
            match track_storage_buffer(&program.pool, *inst) {
                Some(buffer) => {
                    buffers.insert(buffer);
                    if !op.is_load_global() {
                        written.insert(buffer);
                    }
                    to_replace.push((*inst, buffer));
                }
                None => to_discard.push((*block, *inst)),
            }
        }
    }

    for buffer in &buffers {
        program
            .info
            .storage_buffers_descriptors
            .push(StorageBufferDescriptor {
                cbuf_index: buffer.index,
                cbuf_offset: buffer.offset,
                count: 1,
                is_written: written.contains(buffer),
            });
    }

    for (inst, buffer) in to_replace {
        let Some(index) = buffers.get_index_of(&buffer) else {
            return Err(logic_error!("Storage buffer {buffer:?} not found"));
        };
        replace_with_storage(&mut program.pool, inst, index, buffer)?;
    }

    for (block, inst) in to_discard {
        let op = program.pool.opcode(inst);
        warn!("Discarding {op:?} in block {} with an untracked address", block.index());
        discard_global_memory(&mut program.pool, inst)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;

    fn single_block_program() -> Program {
        let mut program = Program::new(Stage::Compute);
        let block = program.pool.new_block();
        program.blocks = vec![block];
        program.post_order_blocks = vec![block];
        program
    }

    /// `PackUint2x32(CompositeConstructU32x2(cbuf[index][offset], cbuf[index][offset + 4]))`
    fn cbuf_pointer(ir: &mut IrEmitter, index: u32, offset: u32) -> Value {
        let low = ir.get_cbuf_u32(Value::U32(index), Value::U32(offset));
        let high = ir.get_cbuf_u32(Value::U32(index), Value::U32(offset + 4));
        let vector = ir.composite_construct(&[low, high]);
        ir.pack_uint_2x32(vector)
    }

    #[test]
    fn load_with_immediate_offset() {
        let mut program = single_block_program();
        let block = program.blocks[0];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let pointer = cbuf_pointer(&mut ir, 0, 0x110);
        let address = ir.iadd(pointer, Value::U64(8));
        let load = ir.load_global(Opcode::LoadGlobal32, address);
        ir.reference(load);

        global_memory_to_storage_buffer(&mut program).unwrap();

        assert_eq!(
            vec![StorageBufferDescriptor {
                cbuf_index: 0,
                cbuf_offset: 0x110,
                count: 1,
                is_written: false
            }],
            program.info.storage_buffers_descriptors
        );

        let pool = &program.pool;
        let storage = pool.resolve_inst(load).unwrap();
        assert_eq!(Opcode::LoadStorage32, pool.opcode(storage));
        assert_eq!(Value::U32(0), pool.inst(storage).arg(0));

        // (low + 8) - cbuf[0][0x110]
        let offset = pool.resolve_inst(pool.inst(storage).arg(1)).unwrap();
        assert_eq!(Opcode::ISub32, pool.opcode(offset));
        let sum = pool.resolve_inst(pool.inst(offset).arg(0)).unwrap();
        assert_eq!(Opcode::IAdd32, pool.opcode(sum));
        assert_eq!(Value::U32(8), pool.inst(sum).arg(1));
        let base = pool.resolve_inst(pool.inst(offset).arg(1)).unwrap();
        assert_eq!(Opcode::GetCbufU32, pool.opcode(base));
        assert_eq!(
            &[Value::U32(0), Value::U32(0x110)],
            pool.inst(base).args()
        );
    }

    #[test]
    fn store_marks_written() {
        let mut program = single_block_program();
        let block = program.blocks[0];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let pointer = cbuf_pointer(&mut ir, 3, 0x20);
        ir.write_global(Opcode::WriteGlobal32, pointer, Value::U32(7));
        let pointer = cbuf_pointer(&mut ir, 3, 0x20);
        let load = ir.load_global(Opcode::LoadGlobal64, pointer);
        ir.reference(load);

        global_memory_to_storage_buffer(&mut program).unwrap();

        assert_eq!(1, program.info.storage_buffers_descriptors.len());
        assert!(program.info.storage_buffers_descriptors[0].is_written);

        let ops: Vec<_> = program
            .instructions()
            .map(|i| program.pool.opcode(i))
            .filter(|op| matches!(op, Opcode::WriteStorage32 | Opcode::LoadStorage64))
            .collect();
        assert_eq!(vec![Opcode::WriteStorage32, Opcode::LoadStorage64], ops);
    }

    #[test]
    fn prefer_driver_region() {
        let mut program = single_block_program();
        let block = program.blocks[0];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        // The user buffer is found first by an unbiased search.
        let user = ir.get_cbuf_u32(Value::U32(2), Value::U32(0x0));
        let driver = ir.get_cbuf_u32(Value::U32(0), Value::U32(0x120));
        let scaled = ir.imul(driver, Value::U32(1));
        let low = ir.iadd(user, scaled);
        let vector = ir.composite_construct(&[low, Value::U32(0)]);
        let pointer = ir.pack_uint_2x32(vector);
        let load = ir.load_global(Opcode::LoadGlobal32, pointer);
        ir.reference(load);

        global_memory_to_storage_buffer(&mut program).unwrap();
        assert_eq!(0, program.info.storage_buffers_descriptors[0].cbuf_index);
        assert_eq!(0x120, program.info.storage_buffers_descriptors[0].cbuf_offset);
    }

    #[test]
    fn discard_untracked_load() {
        let mut program = single_block_program();
        let block = program.blocks[0];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let lane = ir.lane_id();
        let address = ir.uconvert(lane, 64);
        let load = ir.load_global(Opcode::LoadGlobal32, address);
        ir.reference(load);
        ir.write_global(Opcode::WriteGlobal32, address, Value::U32(1));

        global_memory_to_storage_buffer(&mut program).unwrap();

        assert!(program.info.storage_buffers_descriptors.is_empty());
        assert_eq!(Value::U32(0), program.pool.resolve(load));
        assert!(!program
            .instructions()
            .any(|i| program.pool.opcode(i) == Opcode::WriteGlobal32));
    }

    #[test]
    fn discard_untracked_vector_load() {
        let mut program = single_block_program();
        let block = program.blocks[0];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let lane = ir.lane_id();
        let address = ir.uconvert(lane, 64);
        let load = ir.load_global(Opcode::LoadGlobal128, address);
        ir.reference(load);

        global_memory_to_storage_buffer(&mut program).unwrap();
        assert_eq!(
            Some(Opcode::CompositeConstructU32x4),
            program.pool.resolve_opcode(load)
        );
    }
}
