//! Resolve texture and image handles to resource descriptors.
use log::trace;
use mxw_lib::TextureType;

use super::track::{breadth_first_search, cbuf_u32_addr, CbufAddr};
use crate::environment::Environment;
use crate::error::CompileError;
use crate::ir::{
    ImageBufferDescriptor, ImageDescriptor, ImageFormat, Info, InstId, ObjectPool, Opcode,
    Program, TextureBufferDescriptor, TextureDescriptor, TextureInstInfo, Value,
};
use crate::not_implemented;

/// The constant buffer location of the handle for a texture instruction.
fn track_handle(
    env: &dyn Environment,
    pool: &ObjectPool,
    inst: InstId,
) -> Result<CbufAddr, CompileError> {
    match pool.resolve(pool.inst(inst).arg(0)) {
        // Bound handles are byte offsets into the texture constant buffer.
        Value::U32(offset) => Ok(CbufAddr {
            index: env.texture_bound_buffer(),
            offset,
        }),
        handle => breadth_first_search(pool, handle, |i| cbuf_u32_addr(pool, i)).ok_or_else(
            || not_implemented!("Failed to track bindless handle for {:?}", pool.opcode(inst)),
        ),
    }
}

/// Guest fetches from 1D textures may access texture buffers.
fn resolve_texture_type(
    env: &mut dyn Environment,
    op: Opcode,
    ty: TextureType,
    cbuf: CbufAddr,
) -> TextureType {
    if op == Opcode::ImageFetch && ty == TextureType::Color1D {
        let guest_type = env
            .read_cbuf_value(cbuf.index, cbuf.offset)
            .and_then(|handle| env.read_texture_type(handle));
        if let Ok(TextureType::Buffer) = guest_type {
            return TextureType::Buffer;
        }
    }
    ty
}

pub(crate) fn add_texture(info: &mut Info, desc: TextureDescriptor) -> usize {
    match info.texture_descriptors.iter().position(|d| {
        d.texture_type == desc.texture_type
            && d.is_depth == desc.is_depth
            && d.cbuf_index == desc.cbuf_index
            && d.cbuf_offset == desc.cbuf_offset
    }) {
        Some(index) => index,
        None => {
            info.texture_descriptors.push(desc);
            info.texture_descriptors.len() - 1
        }
    }
}

pub(crate) fn add_texture_buffer(info: &mut Info, desc: TextureBufferDescriptor) -> usize {
    match info
        .texture_buffer_descriptors
        .iter()
        .position(|d| d.cbuf_index == desc.cbuf_index && d.cbuf_offset == desc.cbuf_offset)
    {
        Some(index) => index,
        None => {
            info.texture_buffer_descriptors.push(desc);
            info.texture_buffer_descriptors.len() - 1
        }
    }
}

pub(crate) fn add_image(info: &mut Info, desc: ImageDescriptor) -> usize {
    match info.image_descriptors.iter().position(|d| {
        d.texture_type == desc.texture_type
            && d.format == desc.format
            && d.cbuf_index == desc.cbuf_index
            && d.cbuf_offset == desc.cbuf_offset
    }) {
        Some(index) => {
            let existing = &mut info.image_descriptors[index];
            existing.is_written |= desc.is_written;
            existing.is_read |= desc.is_read;
            index
        }
        None => {
            info.image_descriptors.push(desc);
            info.image_descriptors.len() - 1
        }
    }
}

pub(crate) fn add_image_buffer(info: &mut Info, desc: ImageBufferDescriptor) -> usize {
    match info.image_buffer_descriptors.iter().position(|d| {
        d.format == desc.format
            && d.cbuf_index == desc.cbuf_index
            && d.cbuf_offset == desc.cbuf_offset
    }) {
        Some(index) => {
            let existing = &mut info.image_buffer_descriptors[index];
            existing.is_written |= desc.is_written;
            existing.is_read |= desc.is_read;
            index
        }
        None => {
            info.image_buffer_descriptors.push(desc);
            info.image_buffer_descriptors.len() - 1
        }
    }
}

/// Assign a descriptor to every texture and image instruction.
///
/// Instructions accessing the same constant buffer handle with the same type share a descriptor.
/// The handle argument is cleared and the descriptor index is stored in the [TextureInstInfo].
pub fn texture_pass(env: &mut dyn Environment, program: &mut Program) -> Result<(), CompileError> {
    let insts: Vec<_> = program
        .post_order_blocks
        .iter()
        .rev()
        .flat_map(|b| program.pool.block(*b).instructions().to_vec())
        .filter(|i| {
            let op = program.pool.opcode(*i);
            op.is_texture() || op.is_image()
        })
        .collect();

    for inst in insts {
        let op = program.pool.opcode(inst);
        let mut flags = TextureInstInfo::from(program.pool.inst(inst).flags());
        let cbuf = track_handle(&*env, &program.pool, inst)?;
        let ty = resolve_texture_type(env, op, flags.texture_type_enum(), cbuf);
        flags.set_texture_type_enum(ty);

        let info = &mut program.info;
        let index = if op.is_image() {
            let format = ImageFormat::from_index(flags.image_format().value());
            let is_written = op == Opcode::ImageWrite;
            let is_read = op == Opcode::ImageRead;
            if ty == TextureType::Buffer {
                add_image_buffer(
                    info,
                    ImageBufferDescriptor {
                        format,
                        is_written,
                        is_read,
                        cbuf_index: cbuf.index,
                        cbuf_offset: cbuf.offset,
                        count: 1,
                    },
                )
            } else {
                add_image(
                    info,
                    ImageDescriptor {
                        texture_type: ty,
                        format,
                        is_written,
                        is_read,
                        cbuf_index: cbuf.index,
                        cbuf_offset: cbuf.offset,
                        count: 1,
                    },
                )
            }
        } else if ty == TextureType::Buffer {
            add_texture_buffer(
                info,
                TextureBufferDescriptor {
                    cbuf_index: cbuf.index,
                    cbuf_offset: cbuf.offset,
                    count: 1,
                },
            )
        } else {
            add_texture(
                info,
                TextureDescriptor {
                    texture_type: ty,
                    is_depth: flags.is_depth(),
                    cbuf_index: cbuf.index,
                    cbuf_offset: cbuf.offset,
                    count: 1,
                },
            )
        };
        trace!("{op:?} uses cbuf {cbuf:?} as descriptor {index}");

        flags.set_descriptor_index(index as u16);
        program.pool.inst_mut(inst).set_flags(flags.flags());
        program.pool.set_arg(inst, 0, Value::Void)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{test_environment, FileEnvironment};
    use crate::ir::IrEmitter;
    use mxw_lib::header::ProgramHeader;
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;

    fn sample(ir: &mut IrEmitter, handle: Value, ty: TextureType, is_depth: bool) -> Value {
        let mut info = TextureInstInfo::default();
        info.set_texture_type_enum(ty);
        info.set_is_depth(is_depth);
        ir.image_op(
            Opcode::ImageSampleImplicitLod,
            &[handle, Value::F32(0.5), Value::Void, Value::Void],
            info,
        )
    }

    fn program_and_env() -> (Program, FileEnvironment) {
        let mut program = Program::new(Stage::Fragment);
        let block = program.pool.new_block();
        program.blocks = vec![block];
        program.post_order_blocks = vec![block];
        let sph = ProgramHeader::from_bytes(&[0u8; 0x50]).unwrap();
        (program, test_environment(Stage::Fragment, sph, &[]))
    }

    #[test]
    fn bound_textures_are_deduplicated() {
        let (mut program, mut env) = program_and_env();
        let block = program.blocks[0];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let a = sample(&mut ir, Value::U32(0x40), TextureType::Color2D, false);
        let b = sample(&mut ir, Value::U32(0x44), TextureType::Color2D, false);
        let c = sample(&mut ir, Value::U32(0x40), TextureType::Color2D, false);

        texture_pass(&mut env, &mut program).unwrap();

        assert_eq!(
            vec![
                TextureDescriptor {
                    texture_type: TextureType::Color2D,
                    is_depth: false,
                    cbuf_index: 1,
                    cbuf_offset: 0x40,
                    count: 1
                },
                TextureDescriptor {
                    texture_type: TextureType::Color2D,
                    is_depth: false,
                    cbuf_index: 1,
                    cbuf_offset: 0x44,
                    count: 1
                }
            ],
            program.info.texture_descriptors
        );
        let index = |v: Value| {
            let inst = program.pool.inst(v.inst().unwrap());
            assert_eq!(Value::Void, inst.arg(0));
            TextureInstInfo::from(inst.flags()).descriptor_index()
        };
        assert_eq!(vec![0, 1, 0], vec![index(a), index(b), index(c)]);
    }

    #[test]
    fn bindless_handle_from_cbuf() {
        let (mut program, mut env) = program_and_env();
        let block = program.blocks[0];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let handle = ir.get_cbuf_u32(Value::U32(3), Value::U32(0x8));
        let masked = ir.bitwise_and(handle, Value::U32(0xfffff));
        sample(&mut ir, masked, TextureType::ColorCube, true);

        texture_pass(&mut env, &mut program).unwrap();

        assert_eq!(1, program.info.texture_descriptors.len());
        let desc = program.info.texture_descriptors[0];
        assert_eq!((3, 0x8), (desc.cbuf_index, desc.cbuf_offset));
        assert!(desc.is_depth);
        assert_eq!(TextureType::ColorCube, desc.texture_type);
    }

    #[test]
    fn untracked_bindless_handle() {
        let (mut program, mut env) = program_and_env();
        let block = program.blocks[0];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let handle = ir.lane_id();
        sample(&mut ir, handle, TextureType::Color2D, false);

        assert!(matches!(
            texture_pass(&mut env, &mut program),
            Err(CompileError::NotImplemented(_))
        ));
    }

    #[test]
    fn image_flags_are_merged() {
        let (mut program, mut env) = program_and_env();
        let block = program.blocks[0];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let mut info = TextureInstInfo::default();
        info.set_texture_type_enum(TextureType::Color2D);
        ir.image_op(Opcode::ImageRead, &[Value::U32(0x10), Value::U32(0)], info);
        ir.image_op(
            Opcode::ImageWrite,
            &[Value::U32(0x10), Value::U32(0), Value::U32(0)],
            info,
        );

        texture_pass(&mut env, &mut program).unwrap();

        assert_eq!(1, program.info.image_descriptors.len());
        assert!(program.info.image_descriptors[0].is_read);
        assert!(program.info.image_descriptors[0].is_written);
    }
}
