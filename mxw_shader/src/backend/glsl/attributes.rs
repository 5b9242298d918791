use log::warn;
use mxw_lib::Stage;

use super::instructions::swizzle;
use super::EmitContext;
use crate::error::CompileError;
use crate::ir::{Attribute, InstId, Patch, Value};
use crate::{logic_error, not_implemented};

impl EmitContext<'_> {
    fn attribute_arg(&self, inst: InstId) -> Result<Attribute, CompileError> {
        self.program
            .pool
            .inst(inst)
            .arg(0)
            .attribute()
            .ok_or_else(|| logic_error!("Expected an attribute argument"))
    }

    fn patch_arg(&self, inst: InstId) -> Result<Patch, CompileError> {
        self.program
            .pool
            .inst(inst)
            .arg(0)
            .patch()
            .ok_or_else(|| logic_error!("Expected a patch argument"))
    }

    /// Inputs of these stages are arrays indexed by vertex.
    fn has_vertex_arrays(&self) -> bool {
        matches!(
            self.program.stage,
            Stage::TessellationControl | Stage::TessellationEval | Stage::Geometry
        )
    }

    /// An integer built in variable bit cast to the attribute register.
    fn integer_attribute(&self, attr: Attribute) -> Option<&'static str> {
        match attr {
            Attribute::PRIMITIVE_ID => Some("gl_PrimitiveID"),
            Attribute::INSTANCE_ID => Some("gl_InstanceID"),
            Attribute::VERTEX_ID => Some("gl_VertexID"),
            Attribute::LAYER => Some("gl_Layer"),
            Attribute::VIEWPORT_INDEX => Some("gl_ViewportIndex"),
            _ => None,
        }
    }

    fn float_attribute(&self, attr: Attribute, vertex: &str) -> Result<String, CompileError> {
        let element = swizzle(attr.element() as u32)?;
        if let Some(index) = attr.generic_index() {
            return if self.has_vertex_arrays() {
                Ok(format!("in_attr{index}[{vertex}].{element}"))
            } else {
                Ok(format!("in_attr{index}.{element}"))
            };
        }
        if attr.is_position() {
            return match self.program.stage {
                Stage::Fragment => Ok(format!("gl_FragCoord.{element}")),
                Stage::VertexA | Stage::VertexB | Stage::Compute => Err(not_implemented!(
                    "Read position in {:?} stage",
                    self.program.stage
                )),
                _ => Ok(format!("gl_in[{vertex}].gl_Position.{element}")),
            };
        }
        match attr {
            Attribute::FRONT_FACE => Ok("intBitsToFloat(gl_FrontFacing ? -1 : 0)".to_string()),
            Attribute::POINT_SPRITE_S => Ok("gl_PointCoord.x".to_string()),
            Attribute::POINT_SPRITE_T => Ok("gl_PointCoord.y".to_string()),
            Attribute::TESS_EVAL_POINT_U => Ok("gl_TessCoord.x".to_string()),
            Attribute::TESS_EVAL_POINT_V => Ok("gl_TessCoord.y".to_string()),
            attr => match self.integer_attribute(attr) {
                Some(name) => Ok(format!("intBitsToFloat({name})")),
                None => Err(not_implemented!("Read attribute {attr}")),
            },
        }
    }

    pub(super) fn emit_get_attribute(
        &mut self,
        inst: InstId,
        is_integer: bool,
    ) -> Result<(), CompileError> {
        let attr = self.attribute_arg(inst)?;
        let vertex = self.a(inst, 1)?;
        let expr = match (is_integer, self.integer_attribute(attr)) {
            (true, Some(name)) => format!("uint({name})"),
            (true, None) => format!("floatBitsToUint({})", self.float_attribute(attr, &vertex)?),
            (false, _) => self.float_attribute(attr, &vertex)?,
        };
        self.define_result(inst, expr)
    }

    pub(super) fn emit_set_attribute(&mut self, inst: InstId) -> Result<(), CompileError> {
        let attr = self.attribute_arg(inst)?;
        let value = self.a(inst, 1)?;
        self.a(inst, 2)?;
        let stage = self.program.stage;
        let element = swizzle(attr.element() as u32)?;

        if let Some(index) = attr.generic_index() {
            if stage == Stage::TessellationControl {
                self.line(format_args!(
                    "out_attr{index}[gl_InvocationID].{element} = {value};"
                ));
            } else {
                self.line(format_args!("out_attr{index}.{element} = {value};"));
            }
            return Ok(());
        }
        if attr.is_position() {
            if stage == Stage::TessellationControl {
                self.line(format_args!(
                    "gl_out[gl_InvocationID].gl_Position.{element} = {value};"
                ));
            } else {
                self.line(format_args!("gl_Position.{element} = {value};"));
            }
            return Ok(());
        }
        if attr.is_clip_distance() {
            let index = attr.0 - Attribute::CLIP_DISTANCE_0.0;
            self.line(format_args!("gl_ClipDistance[{index}] = {value};"));
            return Ok(());
        }
        match attr {
            Attribute::POINT_SIZE => self.line(format_args!("gl_PointSize = {value};")),
            Attribute::LAYER | Attribute::VIEWPORT_INDEX => {
                let name = if attr == Attribute::LAYER {
                    "gl_Layer"
                } else {
                    "gl_ViewportIndex"
                };
                if stage == Stage::Geometry
                    || self.profile.support_viewport_index_layer_non_geometry
                {
                    self.line(format_args!("{name} = floatBitsToInt({value});"));
                } else {
                    warn!("Skipped write to {attr} in {stage:?} stage");
                }
            }
            attr => return Err(not_implemented!("Write attribute {attr}")),
        }
        Ok(())
    }

    fn patch_expr(&self, patch: Patch) -> Result<String, CompileError> {
        match patch {
            Patch::TESS_LOD_LEFT => Ok("gl_TessLevelOuter[0]".to_string()),
            Patch::TESS_LOD_TOP => Ok("gl_TessLevelOuter[1]".to_string()),
            Patch::TESS_LOD_RIGHT => Ok("gl_TessLevelOuter[2]".to_string()),
            Patch::TESS_LOD_BOTTOM => Ok("gl_TessLevelOuter[3]".to_string()),
            Patch::TESS_LOD_INTERIOR_U => Ok("gl_TessLevelInner[0]".to_string()),
            Patch::TESS_LOD_INTERIOR_V => Ok("gl_TessLevelInner[1]".to_string()),
            patch => {
                let name = self
                    .patch_name(patch)
                    .ok_or_else(|| not_implemented!("Patch {patch:?}"))?;
                Ok(format!("{name}.{}", swizzle(patch.element() as u32)?))
            }
        }
    }

    pub(super) fn emit_get_patch(&mut self, inst: InstId) -> Result<(), CompileError> {
        let patch = self.patch_arg(inst)?;
        let expr = self.patch_expr(patch)?;
        self.define_result(inst, expr)
    }

    pub(super) fn emit_set_patch(&mut self, inst: InstId) -> Result<(), CompileError> {
        if self.program.stage != Stage::TessellationControl {
            return Err(logic_error!(
                "Patch write in {:?} stage",
                self.program.stage
            ));
        }
        let patch = self.patch_arg(inst)?;
        let target = self.patch_expr(patch)?;
        let value = self.a(inst, 1)?;
        self.line(format_args!("{target} = {value};"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::glsl::tests::{body, emit, single_block};
    use crate::ir::{Attribute, IrEmitter, Patch, Value};
    use indoc::indoc;
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;

    #[test]
    fn fragment_inputs() {
        let (mut program, block) = single_block(Stage::Fragment);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let x = ir.get_attribute(Attribute::generic(2, 1), Value::U32(0));
        let coord = ir.get_attribute(Attribute::POSITION_W, Value::U32(0));
        let id = ir.get_attribute_u32(Attribute::PRIMITIVE_ID, Value::U32(0));
        ir.set_frag_color(0, 0, x);
        ir.set_frag_color(0, 1, coord);
        ir.set_sample_mask(id);

        assert_eq!(
            indoc! {"
                uint u_0;
                float f_0, f_1;
                f_0 = in_attr2.y;
                f_1 = gl_FragCoord.w;
                u_0 = uint(gl_PrimitiveID);
                frag_color0.x = f_0;
                frag_color0.y = f_1;
                gl_SampleMask[0] = int(u_0);
                return;
            "},
            body(&emit(&program))
        );
    }

    #[test]
    fn geometry_inputs_are_per_vertex() {
        let (mut program, block) = single_block(Stage::Geometry);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let x = ir.get_attribute(Attribute::POSITION_X, Value::U32(2));
        ir.set_attribute(Attribute::generic(0, 0), x, Value::U32(0));
        ir.emit_vertex(Value::U32(0));

        assert_eq!(
            indoc! {"
                float f_0;
                f_0 = gl_in[2u].gl_Position.x;
                out_attr0.x = f_0;
                EmitVertex();
                return;
            "},
            body(&emit(&program))
        );
    }

    #[test]
    fn tessellation_levels() {
        let (mut program, block) = single_block(Stage::TessellationControl);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        ir.set_patch(Patch::TESS_LOD_INTERIOR_U, Value::F32(4.0));
        ir.set_patch(Patch(Patch::COMPONENT_0.0 + 5), Value::F32(1.0));

        assert_eq!(
            indoc! {"
                gl_TessLevelInner[0] = 4.0;
                patch1.y = 1.0;
                return;
            "},
            body(&emit(&program))
        );
    }
}
