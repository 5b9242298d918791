use mxw_lib::{Stage, TextureType};
use rspirv::dr::Operand;
use rspirv::spirv::{self, Capability, Dim, ImageOperands, Word};

use super::declarations::{Image, Texture};
use super::EmitContext;
use crate::error::CompileError;
use crate::ir::{ImageFormat, InstId, Opcode, TextureInstInfo, Type, Value};
use crate::{logic_error, not_implemented};

pub(super) fn image_format(format: ImageFormat) -> spirv::ImageFormat {
    match format {
        ImageFormat::Typeless => spirv::ImageFormat::Unknown,
        ImageFormat::R8Uint => spirv::ImageFormat::R8ui,
        ImageFormat::R8Sint => spirv::ImageFormat::R8i,
        ImageFormat::R16Uint => spirv::ImageFormat::R16ui,
        ImageFormat::R16Sint => spirv::ImageFormat::R16i,
        ImageFormat::R32Uint => spirv::ImageFormat::R32ui,
        ImageFormat::R32G32Uint => spirv::ImageFormat::Rg32ui,
        ImageFormat::R32G32B32A32Uint => spirv::ImageFormat::Rgba32ui,
    }
}

/// Formats outside the core set of storage image formats.
pub(super) fn format_capability(format: ImageFormat) -> Option<Capability> {
    match format {
        ImageFormat::R8Uint
        | ImageFormat::R8Sint
        | ImageFormat::R16Uint
        | ImageFormat::R16Sint
        | ImageFormat::R32G32Uint => Some(Capability::StorageImageExtendedFormats),
        _ => None,
    }
}

pub(super) fn is_signed_format(format: ImageFormat) -> bool {
    matches!(format, ImageFormat::R8Sint | ImageFormat::R16Sint)
}

/// The image dimension and the capability it requires for sampled or `storage` images.
pub(super) fn texture_dim(ty: TextureType, storage: bool) -> (Dim, Option<Capability>) {
    let pick = |sampled, image| Some(if storage { image } else { sampled });
    match ty {
        TextureType::Color1D | TextureType::ColorArray1D => {
            (Dim::Dim1D, pick(Capability::Sampled1D, Capability::Image1D))
        }
        TextureType::Color2D | TextureType::ColorArray2D | TextureType::Color2DRect => {
            (Dim::Dim2D, None)
        }
        TextureType::Color3D => (Dim::Dim3D, None),
        TextureType::ColorCube => (Dim::DimCube, None),
        TextureType::ColorArrayCube => (
            Dim::DimCube,
            pick(Capability::SampledCubeArray, Capability::ImageCubeArray),
        ),
        TextureType::Buffer => (
            Dim::DimBuffer,
            pick(Capability::SampledBuffer, Capability::ImageBuffer),
        ),
    }
}

/// The number of components returned by size queries.
fn size_dimensions(ty: TextureType) -> u32 {
    match ty {
        TextureType::ColorCube => 2,
        TextureType::ColorArrayCube => 3,
        ty => (ty.coordinate_count() + ty.is_array() as usize) as u32,
    }
}

/// The level of detail for sampling.
#[derive(Clone, Copy)]
enum Lod {
    /// Derivatives with an optional bias.
    Implicit(Option<Word>),
    Explicit(Word),
}

/// Image operands in the order of their mask bits.
struct Operands {
    mask: ImageOperands,
    ids: Vec<Operand>,
}

impl Default for Operands {
    fn default() -> Self {
        Self {
            mask: ImageOperands::empty(),
            ids: Vec::new(),
        }
    }
}

impl Operands {
    fn add(&mut self, mask: ImageOperands, id: Word) {
        self.mask |= mask;
        self.ids.push(Operand::IdRef(id));
    }

    fn optional_mask(&self) -> Option<ImageOperands> {
        (!self.mask.is_empty()).then_some(self.mask)
    }
}

impl EmitContext<'_> {
    fn texture_info(&self, inst: InstId) -> TextureInstInfo {
        TextureInstInfo::from(self.program.pool.inst(inst).flags())
    }

    fn texture(&self, info: TextureInstInfo) -> Result<Texture, CompileError> {
        let index = info.descriptor_index() as usize;
        let textures = match info.texture_type_enum() {
            TextureType::Buffer => &self.resources.texture_buffers,
            _ => &self.resources.textures,
        };
        textures
            .get(index)
            .copied()
            .ok_or_else(|| logic_error!("Texture {index} has no descriptor"))
    }

    fn image(&self, info: TextureInstInfo) -> Result<Image, CompileError> {
        let index = info.descriptor_index() as usize;
        let images = match info.texture_type_enum() {
            TextureType::Buffer => &self.resources.image_buffers,
            _ => &self.resources.images,
        };
        images
            .get(index)
            .copied()
            .ok_or_else(|| logic_error!("Image {index} has no descriptor"))
    }

    /// Load the image of a texture without the sampler.
    fn load_image(&mut self, texture: Texture) -> Result<Word, CompileError> {
        match texture.sampled_image_type {
            Some(sampled_image_type) => {
                let sampled = self
                    .builder
                    .load(sampled_image_type, None, texture.var, None, [])?;
                Ok(self.builder.image(texture.image_type, None, sampled)?)
            }
            None => Ok(self
                .builder
                .load(texture.image_type, None, texture.var, None, [])?),
        }
    }

    fn optional_arg(&mut self, inst: InstId, index: usize) -> Result<Option<Word>, CompileError> {
        if self.program.pool.inst(inst).arg(index).is_void() {
            Ok(None)
        } else {
            self.a(inst, index).map(Some)
        }
    }

    /// Add a texel offset as a constant when possible.
    fn texel_offset(
        &mut self,
        inst: InstId,
        index: usize,
        operands: &mut Operands,
    ) -> Result<(), CompileError> {
        let program = self.program;
        let pool = &program.pool;
        match pool.resolve(pool.inst(inst).arg(index)) {
            Value::Void => (),
            Value::U32(v) => {
                let offset = self.i32_const(v as i32);
                operands.add(ImageOperands::CONST_OFFSET, offset);
            }
            value @ Value::Inst(offset) => {
                let offset_inst = pool.inst(offset);
                let is_composite = matches!(
                    offset_inst.opcode(),
                    Opcode::CompositeConstructU32x2
                        | Opcode::CompositeConstructU32x3
                        | Opcode::CompositeConstructU32x4
                );
                let elements = offset_inst
                    .args()
                    .iter()
                    .map(|a| pool.resolve(*a).u32())
                    .collect::<Option<Vec<_>>>();
                match elements {
                    Some(elements) if is_composite => {
                        let ty = self.signed_type(elements.len() as u32);
                        let elements: Vec<_> = elements
                            .into_iter()
                            .map(|e| self.i32_const(e as i32))
                            .collect();
                        let offset = self.builder.constant_composite(ty, elements);
                        operands.add(ImageOperands::CONST_OFFSET, offset);
                    }
                    _ => {
                        self.capability(Capability::ImageGatherExtended);
                        let offset = self.id(value)?;
                        operands.add(ImageOperands::OFFSET, offset);
                    }
                }
            }
            v => return Err(logic_error!("Invalid texel offset {v:?}")),
        }
        Ok(())
    }

    pub(super) fn emit_image_sample(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let texture = self.texture(info)?;
        let sampled_image_type = texture
            .sampled_image_type
            .ok_or_else(|| not_implemented!("Sampling texture buffers"))?;
        let is_dref = op == Opcode::ImageSampleDrefImplicitLod;
        let (lod_index, offset_index) = if is_dref { (3, 4) } else { (2, 3) };

        let coords = self.a(inst, 1)?;
        let dref = if is_dref { Some(self.a(inst, 2)?) } else { None };
        let lod_arg = self.optional_arg(inst, lod_index)?;
        let lod = match op {
            Opcode::ImageSampleExplicitLod => {
                Lod::Explicit(lod_arg.unwrap_or_else(|| self.f32_const(0.0)))
            }
            // Implicit derivatives are only defined for fragment shaders.
            _ if self.program.stage != Stage::Fragment => Lod::Explicit(self.f32_const(0.0)),
            Opcode::ImageSampleDrefImplicitLod => {
                Lod::Implicit(lod_arg.filter(|_| info.has_bias()))
            }
            _ => Lod::Implicit(lod_arg),
        };

        let mut operands = Operands::default();
        match lod {
            Lod::Implicit(Some(bias)) => operands.add(ImageOperands::BIAS, bias),
            Lod::Implicit(None) => (),
            Lod::Explicit(lod) => operands.add(ImageOperands::LOD, lod),
        }
        self.texel_offset(inst, offset_index, &mut operands)?;

        let sampled = self
            .builder
            .load(sampled_image_type, None, texture.var, None, [])?;
        let ty = self.result_type(inst)?;
        let id = self.def(inst);
        let b = &mut self.builder;
        let mask = operands.optional_mask();
        match (dref, lod) {
            (None, Lod::Implicit(_)) => {
                b.image_sample_implicit_lod(ty, Some(id), sampled, coords, mask, operands.ids)?
            }
            (None, Lod::Explicit(_)) => b.image_sample_explicit_lod(
                ty,
                Some(id),
                sampled,
                coords,
                operands.mask,
                operands.ids,
            )?,
            (Some(dref), Lod::Implicit(_)) => b.image_sample_dref_implicit_lod(
                ty,
                Some(id),
                sampled,
                coords,
                dref,
                mask,
                operands.ids,
            )?,
            (Some(dref), Lod::Explicit(_)) => b.image_sample_dref_explicit_lod(
                ty,
                Some(id),
                sampled,
                coords,
                dref,
                operands.mask,
                operands.ids,
            )?,
        };
        Ok(())
    }

    pub(super) fn emit_image_fetch(&mut self, inst: InstId) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let ty = info.texture_type_enum();
        let texture = self.texture(info)?;
        let coords = self.a(inst, 1)?;

        let mut operands = Operands::default();
        if ty != TextureType::Buffer {
            let lod = self.a(inst, 3)?;
            operands.add(ImageOperands::LOD, lod);
        }
        self.texel_offset(inst, 2, &mut operands)?;

        let image = self.load_image(texture)?;
        let result_type = self.result_type(inst)?;
        let id = self.def(inst);
        let mask = operands.optional_mask();
        self.builder
            .image_fetch(result_type, Some(id), image, coords, mask, operands.ids)?;
        Ok(())
    }

    pub(super) fn emit_image_query_dimensions(&mut self, inst: InstId) -> Result<(), CompileError> {
        self.capability(Capability::ImageQuery);
        let info = self.texture_info(inst);
        let ty = info.texture_type_enum();
        let texture = self.texture(info)?;
        let image = self.load_image(texture)?;
        let u32_type = self.u32_type;

        let count = size_dimensions(ty);
        let size_type = match count {
            1 => u32_type,
            n => {
                let ir_type = if n == 2 { Type::U32X2 } else { Type::U32X3 };
                self.ty(ir_type)?
            }
        };
        let (size, levels) = if ty == TextureType::Buffer {
            let size = self.builder.image_query_size(size_type, None, image)?;
            (size, self.u32_const(1))
        } else {
            let lod = self.a(inst, 1)?;
            let size = self
                .builder
                .image_query_size_lod(size_type, None, image, lod)?;
            let levels = self.builder.image_query_levels(u32_type, None, image)?;
            (size, levels)
        };

        let mut components = if count == 1 {
            vec![size]
        } else {
            (0..count)
                .map(|i| self.builder.composite_extract(u32_type, None, size, [i]))
                .collect::<Result<Vec<_>, _>>()?
        };
        let zero = self.u32_const(0);
        components.resize(3, zero);
        components.push(levels);

        let result_type = self.result_type(inst)?;
        let id = self.def(inst);
        self.builder
            .composite_construct(result_type, Some(id), components)?;
        Ok(())
    }

    pub(super) fn emit_image_read(&mut self, inst: InstId) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let image = self.image(info)?;
        let coords = self.a(inst, 1)?;
        let handle = self.builder.load(image.image_type, None, image.var, None, [])?;
        let result_type = self.result_type(inst)?;
        let id = self.def(inst);
        if is_signed_format(image.format) {
            let ivec4 = self.signed_type(4);
            let texel = self
                .builder
                .image_read(ivec4, None, handle, coords, None, [])?;
            self.builder.bitcast(result_type, Some(id), texel)?;
        } else {
            self.builder
                .image_read(result_type, Some(id), handle, coords, None, [])?;
        }
        Ok(())
    }

    pub(super) fn emit_image_write(&mut self, inst: InstId) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let image = self.image(info)?;
        let coords = self.a(inst, 1)?;
        let mut texel = self.a(inst, 2)?;
        let handle = self.builder.load(image.image_type, None, image.var, None, [])?;
        if is_signed_format(image.format) {
            let ivec4 = self.signed_type(4);
            texel = self.builder.bitcast(ivec4, None, texel)?;
        }
        self.builder.image_write(handle, coords, texel, None, [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::spirv::tests::{emit, ops, single_block};
    use crate::ir::{
        ImageDescriptor, ImageFormat, IrEmitter, Opcode, TextureBufferDescriptor,
        TextureDescriptor, TextureInstInfo, Value,
    };
    use mxw_lib::{Stage, TextureType};
    use pretty_assertions::assert_eq;
    use rspirv::dr::{Instruction, Module, Operand};
    use rspirv::spirv::{Capability, ImageOperands, Op};

    fn texture(ty: TextureType, is_depth: bool) -> TextureDescriptor {
        TextureDescriptor {
            texture_type: ty,
            is_depth,
            cbuf_index: 0,
            cbuf_offset: 0x40,
            count: 1,
        }
    }

    fn info(ty: TextureType) -> TextureInstInfo {
        let mut info = TextureInstInfo::default();
        info.set_texture_type_enum(ty);
        info
    }

    fn find(module: &Module, op: Op) -> &Instruction {
        module.functions[0]
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .find(|i| i.class.opcode == op)
            .unwrap()
    }

    fn has_capability(module: &Module, capability: Capability) -> bool {
        module
            .capabilities
            .iter()
            .any(|i| i.operands[0] == Operand::Capability(capability))
    }

    #[test]
    fn sample_with_bias_and_offset() {
        let (mut program, block) = single_block(Stage::Fragment);
        program.info.texture_descriptors = vec![texture(TextureType::Color2D, false)];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let coords = ir.composite_construct(&[Value::F32(0.5), Value::F32(0.25)]);
        let offset = ir.composite_construct(&[Value::U32(1), Value::U32(0xffff_ffff)]);
        let mut texture_info = info(TextureType::Color2D);
        texture_info.set_has_bias(true);
        let sample = ir.image_op(
            Opcode::ImageSampleImplicitLod,
            &[Value::Void, coords, Value::F32(1.0), offset],
            texture_info,
        );
        let x = ir.composite_extract(sample, 0);
        ir.set_frag_color(0, 0, x);

        let module = emit(&program);
        assert_eq!(
            vec![
                Op::CompositeConstruct,
                Op::CompositeConstruct,
                Op::Load,
                Op::ImageSampleImplicitLod,
                Op::CompositeExtract,
                Op::AccessChain,
                Op::Store,
                Op::Return
            ],
            ops(&module)
        );
        assert_eq!(
            Operand::ImageOperands(ImageOperands::BIAS | ImageOperands::CONST_OFFSET),
            find(&module, Op::ImageSampleImplicitLod).operands[2]
        );
    }

    #[test]
    fn depth_compare_outside_fragment() {
        let (mut program, block) = single_block(Stage::VertexB);
        program.info.texture_descriptors = vec![texture(TextureType::ColorArray2D, true)];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let coords = ir.composite_construct(&[Value::F32(0.5), Value::F32(0.5), Value::F32(2.0)]);
        let mut texture_info = info(TextureType::ColorArray2D);
        texture_info.set_is_depth(true);
        let shadow = ir.image_op(
            Opcode::ImageSampleDrefImplicitLod,
            &[Value::Void, coords, Value::F32(0.75), Value::Void, Value::Void],
            texture_info,
        );
        ir.set_attribute(crate::ir::Attribute::generic(0, 0), shadow, Value::U32(0));

        let module = emit(&program);
        assert_eq!(
            Operand::ImageOperands(ImageOperands::LOD),
            find(&module, Op::ImageSampleDrefExplicitLod).operands[3]
        );
    }

    #[test]
    fn query_cube_dimensions() {
        let (mut program, block) = single_block(Stage::Compute);
        program.info.texture_descriptors = vec![texture(TextureType::ColorCube, false)];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let size = ir.image_op(
            Opcode::ImageQueryDimensions,
            &[Value::Void, Value::U32(0)],
            info(TextureType::ColorCube),
        );
        let levels = ir.composite_extract(size, 3);
        ir.write_local(Value::U32(0), levels);

        let module = emit(&program);
        assert_eq!(
            vec![
                Op::Load,
                Op::Image,
                Op::ImageQuerySizeLod,
                Op::ImageQueryLevels,
                Op::CompositeExtract,
                Op::CompositeExtract,
                Op::CompositeConstruct,
                Op::CompositeExtract,
                Op::AccessChain,
                Op::Store,
                Op::Return
            ],
            ops(&module)
        );
        assert!(has_capability(&module, Capability::ImageQuery));
    }

    #[test]
    fn texture_buffer_fetch() {
        let (mut program, block) = single_block(Stage::Fragment);
        program.info.texture_buffer_descriptors = vec![TextureBufferDescriptor {
            cbuf_index: 0,
            cbuf_offset: 0x30,
            count: 1,
        }];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let texel = ir.image_op(
            Opcode::ImageFetch,
            &[Value::Void, Value::U32(7), Value::Void, Value::Void],
            info(TextureType::Buffer),
        );
        let x = ir.composite_extract(texel, 0);
        ir.set_frag_color(0, 0, x);

        let module = emit(&program);
        assert_eq!(2, find(&module, Op::ImageFetch).operands.len());
        assert!(has_capability(&module, Capability::SampledBuffer));
    }

    #[test]
    fn signed_images_are_bit_cast() {
        let (mut program, block) = single_block(Stage::Compute);
        program.info.image_descriptors = vec![ImageDescriptor {
            texture_type: TextureType::Color2D,
            format: ImageFormat::R16Sint,
            is_written: true,
            is_read: true,
            cbuf_index: 0,
            cbuf_offset: 0x50,
            count: 1,
        }];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let coords = ir.composite_construct(&[Value::U32(1), Value::U32(2)]);
        let texel = ir.image_op(
            Opcode::ImageRead,
            &[Value::Void, coords],
            info(TextureType::Color2D),
        );
        ir.image_op(
            Opcode::ImageWrite,
            &[Value::Void, coords, texel],
            info(TextureType::Color2D),
        );

        let module = emit(&program);
        assert_eq!(
            vec![
                Op::CompositeConstruct,
                Op::Load,
                Op::ImageRead,
                Op::Bitcast,
                Op::Load,
                Op::Bitcast,
                Op::ImageWrite,
                Op::Return
            ],
            ops(&module)
        );
        assert!(has_capability(&module, Capability::StorageImageExtendedFormats));
    }
}
