use mxw_lib::{Stage, TextureType};

use super::declarations::is_signed_format;
use super::EmitContext;
use crate::error::CompileError;
use crate::ir::{ImageFormat, InstId, Opcode, TextureInstInfo, Value};
use crate::{logic_error, not_implemented};

/// The number of integer coordinates including the array layer.
fn coordinate_dimensions(ty: TextureType) -> usize {
    ty.coordinate_count() + ty.is_array() as usize
}

/// The number of components returned by `textureSize`.
fn size_dimensions(ty: TextureType) -> usize {
    match ty {
        TextureType::ColorCube => 2,
        TextureType::ColorArrayCube => 3,
        ty => coordinate_dimensions(ty),
    }
}

fn int_vector(count: usize, value: &str) -> String {
    match count {
        1 => format!("int({value})"),
        n => format!("ivec{n}({value})"),
    }
}

impl EmitContext<'_> {
    fn texture_info(&self, inst: InstId) -> TextureInstInfo {
        TextureInstInfo::from(self.program.pool.inst(inst).flags())
    }

    fn texture_name(&self, info: TextureInstInfo) -> Result<String, CompileError> {
        let index = info.descriptor_index() as usize;
        let descriptors = &self.program.info;
        let (count, kind) = match info.texture_type_enum() {
            TextureType::Buffer => (descriptors.texture_buffer_descriptors.len(), "texbuf"),
            _ => (descriptors.texture_descriptors.len(), "tex"),
        };
        if index >= count {
            return Err(logic_error!("Texture {index} has no descriptor"));
        }
        Ok(format!("{}_{kind}{index}", self.prefix()))
    }

    fn image_name(&self, info: TextureInstInfo) -> Result<(String, ImageFormat), CompileError> {
        let index = info.descriptor_index() as usize;
        let descriptors = &self.program.info;
        let (format, kind) = match info.texture_type_enum() {
            TextureType::Buffer => (
                descriptors.image_buffer_descriptors.get(index).map(|d| d.format),
                "imgbuf",
            ),
            _ => (
                descriptors.image_descriptors.get(index).map(|d| d.format),
                "img",
            ),
        };
        let format = format.ok_or_else(|| logic_error!("Image {index} has no descriptor"))?;
        Ok((format!("{}_{kind}{index}", self.prefix()), format))
    }

    /// The optional argument at `index` or `None` if it is void.
    fn optional_arg(&mut self, inst: InstId, index: usize) -> Result<Option<String>, CompileError> {
        if self.program.pool.inst(inst).arg(index).is_void() {
            Ok(None)
        } else {
            self.a(inst, index).map(Some)
        }
    }

    /// Texel offsets must be constant expressions in GLSL.
    fn texel_offset(&mut self, inst: InstId, index: usize) -> Result<Option<String>, CompileError> {
        let program = self.program;
        let pool = &program.pool;
        let value = pool.resolve(pool.inst(inst).arg(index));
        match value {
            Value::Void => Ok(None),
            Value::U32(v) => Ok(Some((v as i32).to_string())),
            Value::Inst(offset) => {
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
                    .map(|a| pool.resolve(*a).u32().map(|v| (v as i32).to_string()))
                    .collect::<Option<Vec<_>>>();
                match elements {
                    Some(elements) if is_composite => {
                        let count = elements.len();
                        self.discard_arg(value);
                        Ok(Some(format!("ivec{count}({})", elements.join(", "))))
                    }
                    _ => Err(not_implemented!("Non-constant texel offset")),
                }
            }
            v => Err(logic_error!("Invalid texel offset {v:?}")),
        }
    }

    pub(super) fn emit_image_sample(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let ty = info.texture_type_enum();
        let texture = self.texture_name(info)?;
        let coords = self.a(inst, 1)?;

        let expr = if op == Opcode::ImageSampleDrefImplicitLod {
            let dref = self.a(inst, 2)?;
            let lod = self.optional_arg(inst, 3)?;
            let offset = self.texel_offset(inst, 4)?;
            // Cube array shadows pass the reference as a separate argument.
            let (coords, dref_arg) = if ty == TextureType::ColorArrayCube {
                (coords, format!(", {dref}"))
            } else {
                let count = coordinate_dimensions(ty).max(2) + 1;
                (format!("vec{count}({coords}, {dref})"), String::new())
            };
            match (lod, offset) {
                (Some(bias), None) if info.has_bias() => {
                    format!("texture({texture}, {coords}{dref_arg}, {bias})")
                }
                (Some(bias), Some(offset)) if info.has_bias() => {
                    format!("textureOffset({texture}, {coords}{dref_arg}, {offset}, {bias})")
                }
                (_, offset) if self.program.stage != Stage::Fragment => match offset {
                    Some(offset) => {
                        format!("textureLodOffset({texture}, {coords}{dref_arg}, 0.0, {offset})")
                    }
                    None => format!("textureLod({texture}, {coords}{dref_arg}, 0.0)"),
                },
                (_, Some(offset)) => {
                    format!("textureOffset({texture}, {coords}{dref_arg}, {offset})")
                }
                (_, None) => format!("texture({texture}, {coords}{dref_arg})"),
            }
        } else {
            let lod = self.optional_arg(inst, 2)?;
            let offset = self.texel_offset(inst, 3)?;
            let explicit_lod = if op == Opcode::ImageSampleExplicitLod {
                Some(lod.clone().unwrap_or_else(|| "0.0".to_string()))
            } else if self.program.stage != Stage::Fragment {
                // Implicit derivatives are only defined for fragment shaders.
                Some("0.0".to_string())
            } else {
                None
            };
            match (explicit_lod, lod, offset) {
                (Some(lod), _, None) => format!("textureLod({texture}, {coords}, {lod})"),
                (Some(lod), _, Some(offset)) => {
                    format!("textureLodOffset({texture}, {coords}, {lod}, {offset})")
                }
                (None, Some(bias), None) => format!("texture({texture}, {coords}, {bias})"),
                (None, Some(bias), Some(offset)) => {
                    format!("textureOffset({texture}, {coords}, {offset}, {bias})")
                }
                (None, None, None) => format!("texture({texture}, {coords})"),
                (None, None, Some(offset)) => {
                    format!("textureOffset({texture}, {coords}, {offset})")
                }
            }
        };
        self.define_result(inst, expr)
    }

    pub(super) fn emit_image_fetch(&mut self, inst: InstId) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let ty = info.texture_type_enum();
        let texture = self.texture_name(info)?;
        let coords = self.a(inst, 1)?;
        let coords = int_vector(coordinate_dimensions(ty), &coords);
        let offset = self.texel_offset(inst, 2)?;
        let lod = self.a(inst, 3)?;

        let expr = match (ty, offset) {
            (TextureType::Buffer, _) => format!("texelFetch({texture}, {coords})"),
            (TextureType::Color2DRect, None) => format!("texelFetch({texture}, {coords})"),
            (TextureType::Color2DRect, Some(offset)) => {
                format!("texelFetchOffset({texture}, {coords}, {offset})")
            }
            (_, None) => format!("texelFetch({texture}, {coords}, int({lod}))"),
            (_, Some(offset)) => {
                format!("texelFetchOffset({texture}, {coords}, int({lod}), {offset})")
            }
        };
        self.define_result(inst, expr)
    }

    pub(super) fn emit_image_query_dimensions(&mut self, inst: InstId) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let ty = info.texture_type_enum();
        let texture = self.texture_name(info)?;
        let lod = self.a(inst, 1)?;

        let (size, levels) = match ty {
            TextureType::Buffer => (format!("textureSize({texture})"), "1u".to_string()),
            TextureType::Color2DRect => (format!("textureSize({texture})"), "1u".to_string()),
            _ => (
                format!("textureSize({texture}, int({lod}))"),
                format!("uint(textureQueryLevels({texture}))"),
            ),
        };
        let count = size_dimensions(ty);
        let size = match count {
            1 => format!("uint({size})"),
            n => format!("uvec{n}({size})"),
        };
        let padding = ", 0u".repeat(3 - count);
        self.define_result(inst, format!("uvec4({size}{padding}, {levels})"))
    }

    pub(super) fn emit_image_read(&mut self, inst: InstId) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let ty = info.texture_type_enum();
        let (image, format) = self.image_name(info)?;
        let coords = self.a(inst, 1)?;
        let coords = int_vector(coordinate_dimensions(ty), &coords);
        let expr = if is_signed_format(format) {
            format!("uvec4(imageLoad({image}, {coords}))")
        } else {
            format!("imageLoad({image}, {coords})")
        };
        self.define_result(inst, expr)
    }

    pub(super) fn emit_image_write(&mut self, inst: InstId) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let ty = info.texture_type_enum();
        let (image, format) = self.image_name(info)?;
        let coords = self.a(inst, 1)?;
        let coords = int_vector(coordinate_dimensions(ty), &coords);
        let value = self.a(inst, 2)?;
        if is_signed_format(format) {
            self.line(format_args!("imageStore({image}, {coords}, ivec4({value}));"));
        } else {
            self.line(format_args!("imageStore({image}, {coords}, {value});"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::glsl::tests::{body, emit, single_block};
    use crate::ir::{
        Attribute, ImageDescriptor, ImageFormat, IrEmitter, Opcode, TextureDescriptor,
        TextureInstInfo, Value,
    };
    use crate::backend::glsl::emit_glsl;
    use crate::backend::Bindings;
    use crate::error::CompileError;
    use crate::profile::{Profile, RuntimeInfo};
    use bilge::prelude::*;
    use indoc::indoc;
    use mxw_lib::{Stage, TextureType};
    use pretty_assertions::assert_eq;

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

        assert_eq!(
            indoc! {"
                float f_0;
                uvec2 u2_0;
                vec2 f2_0;
                vec4 f4_0;
                f2_0 = vec2(0.5, 0.25);
                u2_0 = uvec2(1u, 4294967295u);
                f4_0 = textureOffset(fs_tex0, f2_0, ivec2(1, -1), 1.0);
                f_0 = f4_0.x;
                frag_color0.x = f_0;
                return;
            "},
            body(&emit(&program))
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
        ir.set_attribute(Attribute::generic(0, 0), shadow, Value::U32(0));

        assert_eq!(
            indoc! {"
                float f_0;
                vec3 f3_0;
                f3_0 = vec3(0.5, 0.5, 2.0);
                f_0 = textureLod(vs_tex0, vec4(f3_0, 0.75), 0.0);
                out_attr0.x = f_0;
                return;
            "},
            body(&emit(&program))
        );
    }

    #[test]
    fn fetch_and_query() {
        let (mut program, block) = single_block(Stage::Compute);
        program.info.texture_descriptors = vec![texture(TextureType::Color2D, false)];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let size = ir.image_op(
            Opcode::ImageQueryDimensions,
            &[Value::Void, Value::U32(0)],
            info(TextureType::Color2D),
        );
        let width = ir.composite_extract(size, 0);
        let coords = ir.composite_construct(&[width, Value::U32(3)]);
        let texel = ir.image_op(
            Opcode::ImageFetch,
            &[Value::Void, coords, Value::Void, Value::U32(0)],
            info(TextureType::Color2D),
        );
        let x = ir.composite_extract(texel, 0);
        let bits = ir.bit_cast_to_uint(x);
        ir.write_local(Value::U32(0), bits);

        assert_eq!(
            indoc! {"
                uint u_0;
                float f_0;
                uvec2 u2_0;
                uvec4 u4_0;
                vec4 f4_0;
                u4_0 = uvec4(uvec2(textureSize(cs_tex0, int(0u))), 0u, uint(textureQueryLevels(cs_tex0)));
                u_0 = u4_0.x;
                u2_0 = uvec2(u_0, 3u);
                f4_0 = texelFetch(cs_tex0, ivec2(u2_0), int(0u));
                f_0 = f4_0.x;
                u_0 = floatBitsToUint(f_0);
                lmem[0u] = u_0;
                return;
            "},
            body(&emit(&program))
        );
    }

    #[test]
    fn signed_image_store() {
        let (mut program, block) = single_block(Stage::Compute);
        program.info.image_descriptors = vec![ImageDescriptor {
            texture_type: TextureType::Color2D,
            format: ImageFormat::R16Sint,
            is_written: true,
            is_read: false,
            cbuf_index: 0,
            cbuf_offset: 0x10,
            count: 1,
        }];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let coords = ir.composite_construct(&[Value::U32(1), Value::U32(2)]);
        let color = ir.composite_construct(&[
            Value::U32(7),
            Value::U32(0),
            Value::U32(0),
            Value::U32(0),
        ]);
        let mut image_info = info(TextureType::Color2D);
        image_info.set_image_format(u4::new(ImageFormat::R16Sint as u8));
        ir.image_op(Opcode::ImageWrite, &[Value::Void, coords, color], image_info);

        assert_eq!(
            indoc! {"
                uvec2 u2_0;
                uvec4 u4_0;
                u2_0 = uvec2(1u, 2u);
                u4_0 = uvec4(7u, 0u, 0u, 0u);
                imageStore(cs_img0, ivec2(u2_0), ivec4(u4_0));
                return;
            "},
            body(&emit(&program))
        );
    }

    #[test]
    fn dynamic_offsets_are_not_implemented() {
        let (mut program, block) = single_block(Stage::Fragment);
        program.info.texture_descriptors = vec![texture(TextureType::Color1D, false)];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let offset = ir.lane_id();
        let sample = ir.image_op(
            Opcode::ImageSampleImplicitLod,
            &[Value::Void, Value::F32(0.5), Value::Void, offset],
            info(TextureType::Color1D),
        );
        let x = ir.composite_extract(sample, 0);
        ir.set_frag_color(0, 0, x);

        let result = emit_glsl(
            &Profile::default(),
            &RuntimeInfo::default(),
            &program,
            &mut Bindings::default(),
        );
        assert!(matches!(result, Err(CompileError::NotImplemented(_))));
    }
}
