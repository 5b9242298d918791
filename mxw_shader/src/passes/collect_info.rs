//! Usage flags and constant buffer descriptors for a finished program.
use mxw_lib::{Stage, TextureType};

use crate::environment::Environment;
use crate::error::CompileError;
use crate::ir::{
    Attribute, ConstantBufferDescriptor, FmzMode, FpControl, ImageFormat, Info, InstId,
    ObjectPool, Opcode, Patch, Program, TextureInstInfo, Type, MAX_CBUFS, NUM_NVN_BUFFERS,
};
use crate::{invalid_argument, not_implemented};

/// The size of each storage buffer entry in the driver constant buffer region.
pub(super) const NVN_BUFFER_STRIDE: u32 = 0x10;

/// The largest addressable constant buffer size in bytes.
const MAX_CBUF_SIZE: u32 = 0x10000;

/// The start of the storage buffer pointers for `stage` in constant buffer 0.
pub fn nvn_buffer_base(stage: Stage) -> u32 {
    match stage {
        Stage::VertexA | Stage::VertexB => 0x110,
        Stage::TessellationControl => 0x210,
        Stage::TessellationEval => 0x310,
        Stage::Geometry => 0x410,
        Stage::Fragment => 0x510,
        Stage::Compute => 0x310,
    }
}

fn cbuf_type(op: Opcode) -> (Type, u32) {
    match op {
        Opcode::GetCbufU8 | Opcode::GetCbufS8 => (Type::U8, 1),
        Opcode::GetCbufU16 | Opcode::GetCbufS16 => (Type::U16, 2),
        Opcode::GetCbufF32 => (Type::F32, 4),
        Opcode::GetCbufU32x2 => (Type::U32X2, 8),
        _ => (Type::U32, 4),
    }
}

fn storage_type(op: Opcode) -> Type {
    match op {
        Opcode::LoadStorageU8
        | Opcode::LoadStorageS8
        | Opcode::WriteStorageU8
        | Opcode::WriteStorageS8 => Type::U8,
        Opcode::LoadStorageU16
        | Opcode::LoadStorageS16
        | Opcode::WriteStorageU16
        | Opcode::WriteStorageS16 => Type::U16,
        Opcode::LoadStorage64 | Opcode::WriteStorage64 => Type::U32X2,
        Opcode::LoadStorage128 | Opcode::WriteStorage128 => Type::U32X4,
        _ => Type::U32,
    }
}

fn is_shared(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::LoadSharedU8
            | Opcode::LoadSharedS8
            | Opcode::LoadSharedU16
            | Opcode::LoadSharedS16
            | Opcode::LoadSharedU32
            | Opcode::LoadSharedU64
            | Opcode::LoadSharedU128
            | Opcode::WriteSharedU8
            | Opcode::WriteSharedU16
            | Opcode::WriteSharedU32
            | Opcode::WriteSharedU64
            | Opcode::WriteSharedU128
    )
}

fn uses_small_int(op: Opcode) -> (bool, bool) {
    let int8 = matches!(
        op,
        Opcode::LoadGlobalU8
            | Opcode::LoadGlobalS8
            | Opcode::WriteGlobalU8
            | Opcode::WriteGlobalS8
            | Opcode::LoadStorageU8
            | Opcode::LoadStorageS8
            | Opcode::WriteStorageU8
            | Opcode::WriteStorageS8
            | Opcode::LoadSharedU8
            | Opcode::LoadSharedS8
            | Opcode::WriteSharedU8
    );
    let int16 = matches!(
        op,
        Opcode::LoadGlobalU16
            | Opcode::LoadGlobalS16
            | Opcode::WriteGlobalU16
            | Opcode::WriteGlobalS16
            | Opcode::LoadStorageU16
            | Opcode::LoadStorageS16
            | Opcode::WriteStorageU16
            | Opcode::WriteStorageS16
            | Opcode::LoadSharedU16
            | Opcode::LoadSharedS16
            | Opcode::WriteSharedU16
    );
    (int8, int16)
}

fn visit_types(info: &mut Info, op: Opcode) {
    let types = op
        .arg_types()
        .iter()
        .fold(op.return_type(), |acc, ty| acc | *ty);
    if types.intersects(Type::F16 | Type::F16X2 | Type::F16X3 | Type::F16X4) {
        info.uses_fp16 = true;
    }
    if types.intersects(Type::F64 | Type::F64X2 | Type::F64X3 | Type::F64X4) {
        info.uses_fp64 = true;
    }
    if types.intersects(Type::U8) {
        info.uses_int8 = true;
    }
    if types.intersects(Type::U16) {
        info.uses_int16 = true;
    }
    if types.intersects(Type::U64) {
        info.uses_int64 = true;
    }
    let (int8, int16) = uses_small_int(op);
    info.uses_int8 |= int8;
    info.uses_int16 |= int16;
}

fn visit_fp_control(info: &mut Info, op: Opcode, flags: u32) {
    if matches!(op, Opcode::FPAdd32 | Opcode::FPMul32 | Opcode::FPFma32) {
        match FpControl::from(flags).fmz_mode() {
            FmzMode::Ftz | FmzMode::Fmz => info.uses_fp32_denorms_flush = true,
            FmzMode::None => info.uses_fp32_denorms_preserve = true,
            FmzMode::DontCare => (),
        }
    }
}

fn visit_load_attribute(info: &mut Info, attr: Attribute) {
    if let Some(index) = attr.generic_index() {
        info.input_generics[index].used = true;
        return;
    }
    if attr.is_position() {
        info.loads_position = true;
        return;
    }
    match attr {
        Attribute::PRIMITIVE_ID => info.loads_primitive_id = true,
        Attribute::LAYER => info.loads_layer = true,
        Attribute::VIEWPORT_INDEX => info.loads_viewport_index = true,
        Attribute::INSTANCE_ID => info.loads_instance_id = true,
        Attribute::VERTEX_ID => info.loads_vertex_id = true,
        Attribute::FRONT_FACE => info.loads_front_face = true,
        Attribute::POINT_SPRITE_S | Attribute::POINT_SPRITE_T => info.loads_point_coord = true,
        Attribute::TESS_EVAL_POINT_U | Attribute::TESS_EVAL_POINT_V => {
            info.loads_tess_coord = true
        }
        _ => (),
    }
}

fn visit_store_attribute(info: &mut Info, attr: Attribute) {
    if let Some(index) = attr.generic_index() {
        info.stores_generics[index] = true;
        return;
    }
    if attr.is_position() {
        info.stores_position = true;
        return;
    }
    if attr.is_clip_distance() {
        info.stores_clip_distances |= 1 << (attr.0 - Attribute::CLIP_DISTANCE_0.0);
        return;
    }
    match attr {
        Attribute::POINT_SIZE => info.stores_point_size = true,
        Attribute::LAYER => info.stores_layer = true,
        Attribute::VIEWPORT_INDEX => info.stores_viewport_index = true,
        _ => (),
    }
}

fn visit_patch(info: &mut Info, patch: Patch, is_store: bool) {
    if let Some(index) = patch.generic_index() {
        info.uses_patches[index] = true;
    } else if is_store {
        if patch.0 <= Patch::TESS_LOD_BOTTOM.0 {
            info.stores_tess_level_outer = true;
        } else if patch.0 <= Patch::TESS_LOD_INTERIOR_V.0 {
            info.stores_tess_level_inner = true;
        }
    }
}

fn visit_cbuf(
    info: &mut Info,
    pool: &ObjectPool,
    inst: InstId,
    op: Opcode,
) -> Result<(), CompileError> {
    let i = pool.inst(inst);
    let Some(index) = pool.resolve(i.arg(0)).u32() else {
        return Err(not_implemented!("Dynamic constant buffer index"));
    };
    if index as usize >= MAX_CBUFS {
        return Err(invalid_argument!("Constant buffer index {index} out of range"));
    }

    if info.constant_buffer_mask & (1 << index) == 0 {
        info.constant_buffer_mask |= 1 << index;
        info.constant_buffer_descriptors
            .push(ConstantBufferDescriptor { index, count: 1 });
    }

    let (ty, size) = cbuf_type(op);
    info.used_constant_buffer_types |= ty;

    let used_size = &mut info.constant_buffer_used_sizes[index as usize];
    match pool.resolve(i.arg(1)).u32() {
        Some(offset) => {
            // Negative signed offsets are clamped to the end of the buffer.
            let end = (u64::from(offset) + u64::from(size)).next_multiple_of(16);
            let end = end.min(u64::from(MAX_CBUF_SIZE)) as u32;
            *used_size = (*used_size).max(end);

            let base = info.nvn_buffer_base;
            let nvn_end = base + NVN_BUFFER_STRIDE * NUM_NVN_BUFFERS as u32;
            if index == 0 && offset >= base && offset < nvn_end {
                info.nvn_buffer_used |= 1 << ((offset - base) / NVN_BUFFER_STRIDE);
            }
        }
        // Dynamic offsets can read the entire buffer.
        None => *used_size = MAX_CBUF_SIZE,
    }
    Ok(())
}

fn visit_image(info: &mut Info, op: Opcode, flags: u32) {
    let texture = TextureInstInfo::from(flags);
    let is_typeless = ImageFormat::from_index(texture.image_format().value()) == ImageFormat::Typeless;
    match op {
        Opcode::ImageRead => info.uses_typeless_image_reads |= is_typeless,
        Opcode::ImageWrite => info.uses_typeless_image_writes |= is_typeless,
        _ => (),
    }
    if texture.texture_type_enum() == TextureType::Buffer {
        info.uses_image_buffers = true;
    }
}

fn visit_texture(info: &mut Info, op: Opcode, flags: u32) {
    let texture = TextureInstInfo::from(flags);
    match op {
        Opcode::ImageSampleImplicitLod => info.uses_derivatives = true,
        Opcode::ImageSampleDrefImplicitLod => {
            info.uses_derivatives = true;
            // Stages without derivatives sample array and cube shadows at an explicit lod.
            let ty = texture.texture_type_enum();
            info.uses_shadow_lod |= ty.is_array() || ty == TextureType::ColorCube;
        }
        _ => (),
    }
}

fn visit(info: &mut Info, pool: &ObjectPool, inst: InstId) -> Result<(), CompileError> {
    let i = pool.inst(inst);
    let op = i.opcode();
    visit_types(info, op);
    visit_fp_control(info, op, i.flags());

    match op {
        Opcode::WorkgroupId => info.uses_workgroup_id = true,
        Opcode::LocalInvocationId => info.uses_local_invocation_id = true,
        Opcode::InvocationId => info.uses_invocation_id = true,
        Opcode::SampleId => info.uses_sample_id = true,
        Opcode::IsHelperInvocation => info.uses_is_helper_invocation = true,
        Opcode::LaneId => info.uses_subgroup_invocation_id = true,
        Opcode::GetAttribute | Opcode::GetAttributeU32 => {
            if let Some(attr) = i.arg(0).attribute() {
                visit_load_attribute(info, attr);
            }
        }
        Opcode::SetAttribute => {
            if let Some(attr) = i.arg(0).attribute() {
                visit_store_attribute(info, attr);
            }
        }
        Opcode::GetAttributeIndexed => info.loads_indexed_attributes = true,
        Opcode::SetAttributeIndexed => info.stores_indexed_attributes = true,
        Opcode::GetPatch | Opcode::SetPatch => {
            if let Some(patch) = i.arg(0).patch() {
                visit_patch(info, patch, op == Opcode::SetPatch);
            }
        }
        Opcode::SetFragColor => {
            let Some(rt) = i.arg(0).u32() else {
                return Err(not_implemented!("Dynamic render target index"));
            };
            if let Some(stored) = info.stores_frag_color.get_mut(rt as usize) {
                *stored = true;
            }
        }
        Opcode::SetSampleMask => info.stores_sample_mask = true,
        Opcode::SetFragDepth => info.stores_frag_depth = true,
        Opcode::DemoteToHelperInvocation => info.uses_demote_to_helper_invocation = true,
        Opcode::VoteAll | Opcode::VoteAny | Opcode::VoteEqual | Opcode::SubgroupBallot => {
            info.uses_subgroup_vote = true
        }
        Opcode::ShuffleIndex
        | Opcode::ShuffleUp
        | Opcode::ShuffleDown
        | Opcode::ShuffleButterfly => info.uses_subgroup_shuffles = true,
        Opcode::GetSparseFromOp => info.uses_sparse_residency = true,
        Opcode::LoadLocal | Opcode::WriteLocal => info.uses_local_memory = true,
        op if op.is_cbuf_read() => visit_cbuf(info, pool, inst, op)?,
        op if op.is_image() => visit_image(info, op, i.flags()),
        op if op.is_texture() => visit_texture(info, op, i.flags()),
        op if op.is_global_memory() => {
            info.uses_global_memory = true;
            if op.is_load_global() {
                info.loads_global_memory = true;
            } else {
                info.stores_global_memory = true;
            }
            info.uses_global_atomics |= op.is_global_atomic();
        }
        op if op.is_storage() => {
            info.used_storage_buffer_types |= storage_type(op);
            info.uses_storage_atomics |= matches!(
                op,
                Opcode::StorageAtomicIAdd32 | Opcode::StorageAtomicExchange32
            );
        }
        op if is_shared(op) => info.uses_shared_memory = true,
        _ => (),
    }
    Ok(())
}

/// Record the features and resources used by the instructions of `program`.
///
/// Constant buffers get a descriptor the first time their index is read.
/// Constant buffer indices must be immediates.
pub fn collect_shader_info(
    env: &mut dyn Environment,
    program: &mut Program,
) -> Result<(), CompileError> {
    program.info.nvn_buffer_base = nvn_buffer_base(env.stage());
    for inst in program.post_order_instructions() {
        visit(&mut program.info, &program.pool, inst)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::test_environment;
    use crate::ir::{IrEmitter, Value};
    use mxw_lib::header::ProgramHeader;
    use pretty_assertions::assert_eq;

    fn collect(stage: Stage, f: impl FnOnce(&mut IrEmitter)) -> Result<Info, CompileError> {
        let mut program = Program::new(stage);
        let block = program.pool.new_block();
        program.blocks = vec![block];
        program.post_order_blocks = vec![block];
        f(&mut IrEmitter::new(&mut program.pool, block));

        let sph = ProgramHeader::from_bytes(&[0u8; 0x50]).unwrap();
        let mut env = test_environment(stage, sph, &[]);
        collect_shader_info(&mut env, &mut program)?;
        Ok(program.info)
    }

    #[test]
    fn constant_buffers_are_unique() {
        let info = collect(Stage::Fragment, |ir| {
            ir.get_cbuf_u32(Value::U32(3), Value::U32(0x10));
            ir.get_cbuf_f32(Value::U32(1), Value::U32(0x0));
            ir.get_cbuf_u32(Value::U32(3), Value::U32(0x40));
        })
        .unwrap();

        assert_eq!(
            vec![
                ConstantBufferDescriptor { index: 3, count: 1 },
                ConstantBufferDescriptor { index: 1, count: 1 }
            ],
            info.constant_buffer_descriptors
        );
        assert_eq!(0b1010, info.constant_buffer_mask);
        assert_eq!(0x50, info.constant_buffer_used_sizes[3]);
        assert_eq!(0x10, info.constant_buffer_used_sizes[1]);
        assert_eq!(Type::U32 | Type::F32, info.used_constant_buffer_types);
    }

    #[test]
    fn dynamic_cbuf_index() {
        let result = collect(Stage::Fragment, |ir| {
            let index = ir.lane_id();
            ir.get_cbuf_u32(index, Value::U32(0));
        });
        assert!(matches!(result, Err(CompileError::NotImplemented(_))));
    }

    #[test]
    fn nvn_buffer_slots() {
        let info = collect(Stage::Fragment, |ir| {
            ir.get_cbuf_u32(Value::U32(0), Value::U32(0x510));
            ir.get_cbuf_u32(Value::U32(0), Value::U32(0x534));
            ir.get_cbuf_u32(Value::U32(0), Value::U32(0x110));
        })
        .unwrap();
        assert_eq!(0x510, info.nvn_buffer_base);
        assert_eq!(0b101, info.nvn_buffer_used);
    }

    #[test]
    fn negative_cbuf_offset() {
        let info = collect(Stage::Fragment, |ir| {
            ir.get_cbuf_u32(Value::U32(1), Value::U32(-4i32 as u32));
            ir.get_cbuf_u32(Value::U32(2), Value::U32(0xfff8));
        })
        .unwrap();
        assert_eq!(MAX_CBUF_SIZE, info.constant_buffer_used_sizes[1]);
        assert_eq!(0x10000, info.constant_buffer_used_sizes[2]);
        assert_eq!(0, info.nvn_buffer_used);
    }

    #[test]
    fn attributes() {
        let info = collect(Stage::VertexB, |ir| {
            ir.get_attribute(Attribute::generic(2, 1), Value::U32(0));
            ir.get_attribute_u32(Attribute::VERTEX_ID, Value::U32(0));
            ir.set_attribute(Attribute::POSITION_X, Value::F32(0.0), Value::U32(0));
            ir.set_attribute(Attribute::generic(5, 0), Value::F32(0.0), Value::U32(0));
            ir.set_attribute(Attribute::CLIP_DISTANCE_0.add(2), Value::F32(0.0), Value::U32(0));
        })
        .unwrap();
        assert!(info.input_generics[2].used);
        assert!(!info.input_generics[0].used);
        assert!(info.loads_vertex_id);
        assert!(info.stores_position);
        assert!(info.stores_generics[5]);
        assert_eq!(0b100, info.stores_clip_distances);
    }

    #[test]
    fn fragment_outputs_and_subgroups() {
        let info = collect(Stage::Fragment, |ir| {
            ir.set_frag_color(1, 2, Value::F32(1.0));
            ir.set_frag_depth(Value::F32(0.5));
            ir.vote_any(Value::U1(true));
            ir.demote_to_helper_invocation();
            ir.load_shared(Opcode::LoadSharedU8, Value::U32(0));
        })
        .unwrap();
        assert_eq!([false, true, false, false, false, false, false, false], info.stores_frag_color);
        assert!(info.stores_frag_depth);
        assert!(info.uses_subgroup_vote);
        assert!(info.uses_demote_to_helper_invocation);
        assert!(info.uses_shared_memory);
        assert!(info.uses_int8);
        assert!(!info.uses_fp64);
    }
}
