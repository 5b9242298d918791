use mxw_lib::{Stage, TextureType};

use super::instructions::swizzle;
use super::EmitContext;
use crate::error::CompileError;
use crate::ir::{ImageFormat, InstId, Opcode, TextureInstInfo, Value};
use crate::{logic_error, not_implemented};

fn texture_target(ty: TextureType, is_shadow: bool) -> &'static str {
    match (ty, is_shadow) {
        (TextureType::Color1D, false) => "1D",
        (TextureType::ColorArray1D, false) => "ARRAY1D",
        (TextureType::Color2D, false) => "2D",
        (TextureType::ColorArray2D, false) => "ARRAY2D",
        (TextureType::Color3D, _) => "3D",
        (TextureType::ColorCube, false) => "CUBE",
        (TextureType::ColorArrayCube, false) => "ARRAYCUBE",
        (TextureType::Color2DRect, false) => "RECT",
        (TextureType::Buffer, _) => "BUFFER",
        (TextureType::Color1D, true) => "SHADOW1D",
        (TextureType::ColorArray1D, true) => "SHADOWARRAY1D",
        (TextureType::Color2D, true) => "SHADOW2D",
        (TextureType::ColorArray2D, true) => "SHADOWARRAY2D",
        (TextureType::ColorCube, true) => "SHADOWCUBE",
        (TextureType::ColorArrayCube, true) => "SHADOWARRAYCUBE",
        (TextureType::Color2DRect, true) => "SHADOWRECT",
    }
}

/// The number of coordinates including the array layer.
fn coordinate_dimensions(ty: TextureType) -> usize {
    ty.coordinate_count() + ty.is_array() as usize
}

fn image_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::R8Sint | ImageFormat::R16Sint => "S32X4",
        _ => "U32X4",
    }
}

impl EmitContext<'_> {
    fn texture_info(&self, inst: InstId) -> TextureInstInfo {
        TextureInstInfo::from(self.program.pool.inst(inst).flags())
    }

    fn texture_binding(&self, info: TextureInstInfo) -> Result<u32, CompileError> {
        let index = info.descriptor_index() as usize;
        let bindings = match info.texture_type_enum() {
            TextureType::Buffer => &self.bindings.texture_buffers,
            _ => &self.bindings.textures,
        };
        bindings
            .get(index)
            .copied()
            .ok_or_else(|| logic_error!("Texture {index} has no descriptor"))
    }

    fn image_binding(&self, info: TextureInstInfo) -> Result<(u32, ImageFormat), CompileError> {
        let index = info.descriptor_index() as usize;
        let descriptors = &self.program.info;
        let (binding, format) = match info.texture_type_enum() {
            TextureType::Buffer => (
                self.bindings.image_buffers.get(index),
                descriptors.image_buffer_descriptors.get(index).map(|d| d.format),
            ),
            _ => (
                self.bindings.images.get(index),
                descriptors.image_descriptors.get(index).map(|d| d.format),
            ),
        };
        match (binding, format) {
            (Some(binding), Some(format)) => Ok((*binding, format)),
            _ => Err(logic_error!("Image {index} has no descriptor")),
        }
    }

    /// Copy the coordinate argument into the scratch register.
    fn scratch_coords(&mut self, inst: InstId, index: usize, ty: &str) -> Result<(), CompileError> {
        let value = self.program.pool.inst(inst).arg(index);
        let is_vector = self.program.pool.value_type(value).component_count() > 1;
        let coords = self.arg(value)?;
        if is_vector {
            self.line(format_args!("MOV.{ty} RC,{coords};"));
        } else {
            self.line(format_args!("MOV.{ty} RC.x,{coords};"));
        }
        Ok(())
    }

    fn optional_arg(&mut self, inst: InstId, index: usize) -> Result<Option<String>, CompileError> {
        if self.program.pool.inst(inst).arg(index).is_void() {
            Ok(None)
        } else {
            self.a(inst, index).map(Some)
        }
    }

    /// Offsets are immediates after the texture target.
    fn texel_offset(&mut self, inst: InstId, index: usize) -> Result<String, CompileError> {
        let program = self.program;
        let pool = &program.pool;
        let value = pool.resolve(pool.inst(inst).arg(index));
        match value {
            Value::Void => Ok(String::new()),
            Value::U32(v) => Ok(format!(",({})", v as i32)),
            Value::Inst(offset) => {
                let elements = pool
                    .inst(offset)
                    .args()
                    .iter()
                    .map(|a| pool.resolve(*a).u32().map(|v| (v as i32).to_string()))
                    .collect::<Option<Vec<_>>>();
                match elements {
                    Some(elements) if pool.inst(offset).num_args() > 1 => {
                        self.discard_arg(value);
                        Ok(format!(",({})", elements.join(",")))
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
        let binding = self.texture_binding(info)?;
        let is_dref = op == Opcode::ImageSampleDrefImplicitLod;
        let target = texture_target(ty, is_dref);
        let dimensions = coordinate_dimensions(ty);

        self.scratch_coords(inst, 1, "F")?;
        let (dref, lod, offset) = if is_dref {
            let dref = self.a(inst, 2)?;
            (Some(dref), self.optional_arg(inst, 3)?, self.texel_offset(inst, 4)?)
        } else {
            (None, self.optional_arg(inst, 2)?, self.texel_offset(inst, 3)?)
        };

        // The reference and level of detail go in the components after the coordinates.
        let mut extra = Vec::new();
        let mut next_component = if is_dref { dimensions.max(2) } else { 3 };
        if let Some(dref) = dref {
            if next_component < 4 {
                self.line(format_args!("MOV.F RC.{},{dref};", swizzle(next_component as u32)?));
                next_component = 4;
            } else {
                extra.push(dref);
            }
        }
        let (mnemonic, lod) = match lod {
            Some(lod) if op == Opcode::ImageSampleExplicitLod => ("TXL", Some(lod)),
            Some(bias) if !is_dref || info.has_bias() => {
                if self.program.stage == Stage::Fragment {
                    ("TXB", Some(bias))
                } else {
                    ("TXL", Some("0.0".to_string()))
                }
            }
            _ if op == Opcode::ImageSampleExplicitLod || self.program.stage != Stage::Fragment => {
                // Implicit derivatives are only defined for fragment shaders.
                ("TXL", Some("0.0".to_string()))
            }
            _ => ("TEX", None),
        };
        if let Some(lod) = lod {
            if next_component < 4 && dimensions < 4 {
                self.line(format_args!("MOV.F RC.w,{lod};"));
            } else {
                extra.push(lod);
            }
        }

        if let Some(ret) = self.define(inst)? {
            let extra: String = extra.iter().map(|e| format!(",{e}")).collect();
            self.line(format_args!(
                "{mnemonic}.F {ret},RC{extra},texture[{binding}],{target}{offset};"
            ));
        }
        Ok(())
    }

    pub(super) fn emit_image_fetch(&mut self, inst: InstId) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let ty = info.texture_type_enum();
        let binding = self.texture_binding(info)?;
        self.scratch_coords(inst, 1, "S")?;
        let offset = self.texel_offset(inst, 2)?;
        let lod = self.a(inst, 3)?;
        if !matches!(ty, TextureType::Buffer | TextureType::Color2DRect) {
            self.line(format_args!("MOV.S RC.w,{lod};"));
        }
        if let Some(ret) = self.define(inst)? {
            let target = texture_target(ty, false);
            self.line(format_args!(
                "TXF.F {ret},RC,texture[{binding}],{target}{offset};"
            ));
        }
        Ok(())
    }

    pub(super) fn emit_image_query_dimensions(&mut self, inst: InstId) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let ty = info.texture_type_enum();
        let binding = self.texture_binding(info)?;
        let lod = self.a(inst, 1)?;
        if let Some(ret) = self.define(inst)? {
            let target = texture_target(ty, false);
            self.line(format_args!("MOV.S RC.x,{lod};"));
            self.line(format_args!("TXQ {ret},RC.x,texture[{binding}],{target};"));
            // The number of levels is not available to assembly programs.
            self.line(format_args!("MOV.U {ret}.w,1;"));
        }
        Ok(())
    }

    pub(super) fn emit_image_read(&mut self, inst: InstId) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let ty = info.texture_type_enum();
        let (binding, format) = self.image_binding(info)?;
        self.scratch_coords(inst, 1, "S")?;
        if let Some(ret) = self.define(inst)? {
            let target = texture_target(ty, false);
            let image_type = image_type(format);
            self.line(format_args!(
                "LOADIM.{image_type} {ret},RC,image[{binding}],{target};"
            ));
        }
        Ok(())
    }

    pub(super) fn emit_image_write(&mut self, inst: InstId) -> Result<(), CompileError> {
        let info = self.texture_info(inst);
        let ty = info.texture_type_enum();
        let (binding, format) = self.image_binding(info)?;
        self.scratch_coords(inst, 1, "S")?;
        let value = self.a(inst, 2)?;
        let target = texture_target(ty, false);
        let image_type = image_type(format);
        self.line(format_args!(
            "STOREIM.{image_type} image[{binding}],{value},RC,{target};"
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::glasm::tests::{body, emit, single_block};
    use crate::ir::{
        ImageDescriptor, ImageFormat, IrEmitter, Opcode, TextureDescriptor, TextureInstInfo, Value,
    };
    use bilge::prelude::*;
    use indoc::indoc;
    use mxw_lib::{Stage, TextureType};
    use pretty_assertions::assert_eq;

    fn info(ty: TextureType) -> TextureInstInfo {
        let mut info = TextureInstInfo::default();
        info.set_texture_type_enum(ty);
        info
    }

    #[test]
    fn sample_with_bias_and_offset() {
        let (mut program, block) = single_block(Stage::Fragment);
        program.info.texture_descriptors = vec![TextureDescriptor {
            texture_type: TextureType::Color2D,
            is_depth: false,
            cbuf_index: 0,
            cbuf_offset: 0x40,
            count: 1,
        }];
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
                MOV.F R0.x,0.5;
                MOV.F R0.y,0.25;
                MOV.U R1.x,1;
                MOV.U R1.y,4294967295;
                MOV.F RC,R0;
                MOV.F RC.w,1.0;
                TXB.F R2,RC,texture[0],2D,(1,-1);
                MOV.U R0.x,R2.x;
                MOV.F frag_color0.x,R0.x;
                RET;
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
                MOV.U R0.x,1;
                MOV.U R0.y,2;
                MOV.U R1.x,7;
                MOV.U R1.y,0;
                MOV.U R1.z,0;
                MOV.U R1.w,0;
                MOV.S RC,R0;
                STOREIM.S32X4 image[0],R1,RC,2D;
                RET;
            "},
            body(&emit(&program))
        );
    }
}
