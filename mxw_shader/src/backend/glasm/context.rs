use log::warn;
use mxw_lib::Stage;

use super::instructions::swizzle;
use super::EmitContext;
use crate::error::CompileError;
use crate::ir::{Attribute, InstId, Opcode, Patch};
use crate::{logic_error, not_implemented};

/// The load and store suffix for the width of `op`.
fn memory_type(op: Opcode) -> Result<&'static str, CompileError> {
    match op {
        Opcode::GetCbufU8
        | Opcode::LoadStorageU8
        | Opcode::LoadSharedU8
        | Opcode::WriteStorageU8
        | Opcode::WriteSharedU8 => Ok("U8"),
        Opcode::GetCbufS8 | Opcode::LoadStorageS8 | Opcode::LoadSharedS8 | Opcode::WriteStorageS8 => {
            Ok("S8")
        }
        Opcode::GetCbufU16
        | Opcode::LoadStorageU16
        | Opcode::LoadSharedU16
        | Opcode::WriteStorageU16
        | Opcode::WriteSharedU16 => Ok("U16"),
        Opcode::GetCbufS16
        | Opcode::LoadStorageS16
        | Opcode::LoadSharedS16
        | Opcode::WriteStorageS16 => Ok("S16"),
        Opcode::GetCbufU32
        | Opcode::LoadStorage32
        | Opcode::LoadSharedU32
        | Opcode::WriteStorage32
        | Opcode::WriteSharedU32 => Ok("U32"),
        Opcode::GetCbufF32 => Ok("F32"),
        Opcode::GetCbufU32x2
        | Opcode::LoadStorage64
        | Opcode::LoadSharedU64
        | Opcode::WriteStorage64
        | Opcode::WriteSharedU64 => Ok("U32X2"),
        Opcode::LoadStorage128
        | Opcode::LoadSharedU128
        | Opcode::WriteStorage128
        | Opcode::WriteSharedU128 => Ok("U32X4"),
        op => Err(logic_error!("{op:?} is not a memory access")),
    }
}

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

    fn has_vertex_arrays(&self) -> bool {
        matches!(
            self.program.stage,
            Stage::TessellationControl | Stage::TessellationEval | Stage::Geometry
        )
    }

    /// Built in inputs holding integers.
    fn integer_attribute(&self, attr: Attribute) -> Option<&'static str> {
        match attr {
            Attribute::PRIMITIVE_ID => Some("primitive.id"),
            Attribute::INSTANCE_ID => Some("vertex.instance"),
            Attribute::VERTEX_ID => Some("vertex.id"),
            Attribute::LAYER => Some("fragment.layer"),
            Attribute::VIEWPORT_INDEX => Some("fragment.viewportindex"),
            _ => None,
        }
    }

    fn input_attribute(&self, attr: Attribute, vertex: &str) -> Result<String, CompileError> {
        let element = swizzle(attr.element() as u32)?;
        if let Some(name) = self.integer_attribute(attr) {
            return Ok(format!("{name}.x"));
        }
        if let Some(index) = attr.generic_index() {
            return match self.program.stage {
                Stage::Fragment => Ok(format!("in_attr{index}.{element}")),
                _ if self.has_vertex_arrays() => {
                    Ok(format!("vertex[{vertex}].attrib[{index}].{element}"))
                }
                _ => Ok(format!("vertex.attrib[{index}].{element}")),
            };
        }
        if attr.is_position() {
            return match self.program.stage {
                Stage::Fragment => Ok(format!("fragment.position.{element}")),
                _ if self.has_vertex_arrays() => {
                    Ok(format!("vertex[{vertex}].position.{element}"))
                }
                stage => Err(not_implemented!("Read position in {stage:?} stage")),
            };
        }
        match attr {
            Attribute::POINT_SPRITE_S => Ok("fragment.pointcoord.x".to_string()),
            Attribute::POINT_SPRITE_T => Ok("fragment.pointcoord.y".to_string()),
            Attribute::TESS_EVAL_POINT_U => Ok("vertex.tesscoord.x".to_string()),
            Attribute::TESS_EVAL_POINT_V => Ok("vertex.tesscoord.y".to_string()),
            attr => Err(not_implemented!("Read attribute {attr}")),
        }
    }

    pub(super) fn emit_get_attribute(
        &mut self,
        inst: InstId,
        is_integer: bool,
    ) -> Result<(), CompileError> {
        let attr = self.attribute_arg(inst)?;
        let vertex = self.a(inst, 1)?;
        if attr == Attribute::FRONT_FACE {
            // Front facing is positive and back facing is negative.
            if let Some(ret) = self.define(inst)? {
                self.line("SGT.F.CC RC.x,fragment.facing.x,0.0;");
                self.line(format_args!("MOV.S {ret},0;"));
                self.line(format_args!("MOV.S {ret}(NE.x),-1;"));
            }
            return Ok(());
        }
        let source = self.input_attribute(attr, &vertex)?;
        let mnemonic = if is_integer || self.integer_attribute(attr).is_some() {
            "MOV.U"
        } else {
            "MOV.F"
        };
        if let Some(ret) = self.define(inst)? {
            self.line(format_args!("{mnemonic} {ret},{source};"));
        }
        Ok(())
    }

    pub(super) fn emit_set_attribute(&mut self, inst: InstId) -> Result<(), CompileError> {
        let attr = self.attribute_arg(inst)?;
        let value = self.a(inst, 1)?;
        self.a(inst, 2)?;
        let element = swizzle(attr.element() as u32)?;

        if let Some(index) = attr.generic_index() {
            self.line(format_args!("MOV.F out_attr{index}.{element},{value};"));
            return Ok(());
        }
        if attr.is_position() {
            self.line(format_args!("MOV.F result.position.{element},{value};"));
            return Ok(());
        }
        if attr.is_clip_distance() {
            let index = attr.0 - Attribute::CLIP_DISTANCE_0.0;
            self.line(format_args!("MOV.F result.clip[{index}].x,{value};"));
            return Ok(());
        }
        match attr {
            Attribute::POINT_SIZE => self.line(format_args!("MOV.F result.pointsize.x,{value};")),
            Attribute::LAYER | Attribute::VIEWPORT_INDEX => {
                let target = if attr == Attribute::LAYER {
                    "result.layer.x"
                } else {
                    "result.viewport.x"
                };
                let stage = self.program.stage;
                if stage == Stage::Geometry
                    || self.profile.support_viewport_index_layer_non_geometry
                {
                    self.line(format_args!("MOV.S {target},{value};"));
                } else {
                    warn!("Skipped write to {attr} in {stage:?} stage");
                }
            }
            attr => return Err(not_implemented!("Write attribute {attr}")),
        }
        Ok(())
    }

    /// The patch attribute read in tessellation evaluation or written in tessellation control.
    fn patch_target(&self, patch: Patch, base: &str) -> Result<String, CompileError> {
        match patch {
            Patch::TESS_LOD_LEFT => Ok(format!("{base}.tessouter[0].x")),
            Patch::TESS_LOD_TOP => Ok(format!("{base}.tessouter[1].x")),
            Patch::TESS_LOD_RIGHT => Ok(format!("{base}.tessouter[2].x")),
            Patch::TESS_LOD_BOTTOM => Ok(format!("{base}.tessouter[3].x")),
            Patch::TESS_LOD_INTERIOR_U => Ok(format!("{base}.tessinner[0].x")),
            Patch::TESS_LOD_INTERIOR_V => Ok(format!("{base}.tessinner[1].x")),
            patch => {
                let index = patch
                    .generic_index()
                    .ok_or_else(|| not_implemented!("Patch {patch:?}"))?;
                let element = swizzle(patch.element() as u32)?;
                Ok(format!("{base}.attrib[{index}].{element}"))
            }
        }
    }

    pub(super) fn emit_get_patch(&mut self, inst: InstId) -> Result<(), CompileError> {
        let patch = self.patch_arg(inst)?;
        let base = match self.program.stage {
            Stage::TessellationControl => "result.patch",
            _ => "primitive.patch",
        };
        let source = self.patch_target(patch, base)?;
        if let Some(ret) = self.define(inst)? {
            self.line(format_args!("MOV.F {ret},{source};"));
        }
        Ok(())
    }

    pub(super) fn emit_set_patch(&mut self, inst: InstId) -> Result<(), CompileError> {
        if self.program.stage != Stage::TessellationControl {
            return Err(logic_error!(
                "Patch write in {:?} stage",
                self.program.stage
            ));
        }
        let patch = self.patch_arg(inst)?;
        let target = self.patch_target(patch, "result.patch")?;
        let value = self.a(inst, 1)?;
        self.line(format_args!("MOV.F {target},{value};"));
        Ok(())
    }

    pub(super) fn emit_get_cbuf(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let index = self.imm(inst, 0)?;
        self.a(inst, 0)?;
        if !self
            .program
            .info
            .constant_buffer_descriptors
            .iter()
            .any(|d| d.index == index)
        {
            return Err(logic_error!("Constant buffer {index} has no descriptor"));
        }
        let offset = self.a(inst, 1)?;
        let ty = memory_type(op)?;
        if let Some(ret) = self.define(inst)? {
            self.line(format_args!("LDC.{ty} {ret},c{index}[{offset}];"));
        }
        Ok(())
    }

    fn ssbo_name(&mut self, inst: InstId) -> Result<String, CompileError> {
        let index = self.imm(inst, 0)?;
        self.a(inst, 0)?;
        if index as usize >= self.program.info.storage_buffers_descriptors.len() {
            return Err(logic_error!("Storage buffer {index} has no descriptor"));
        }
        Ok(format!("ssbo{index}"))
    }

    pub(super) fn emit_load_storage(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let name = self.ssbo_name(inst)?;
        let offset = self.a(inst, 1)?;
        let ty = memory_type(op)?;
        if let Some(ret) = self.define(inst)? {
            self.line(format_args!("LDB.{ty} {ret},{name}[{offset}];"));
        }
        Ok(())
    }

    pub(super) fn emit_write_storage(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let name = self.ssbo_name(inst)?;
        let offset = self.a(inst, 1)?;
        let value = self.a(inst, 2)?;
        let ty = memory_type(op)?;
        self.line(format_args!("STB.{ty} {value},{name}[{offset}];"));
        Ok(())
    }

    pub(super) fn emit_storage_atomic(
        &mut self,
        inst: InstId,
        operation: &str,
    ) -> Result<(), CompileError> {
        let name = self.ssbo_name(inst)?;
        let offset = self.a(inst, 1)?;
        let value = self.a(inst, 2)?;
        if let Some(ret) = self.define(inst)? {
            self.line(format_args!(
                "ATOMB.{operation}.U32 {ret},{value},{name}[{offset}];"
            ));
        }
        Ok(())
    }

    pub(super) fn emit_load_shared(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let offset = self.a(inst, 0)?;
        let ty = memory_type(op)?;
        if let Some(ret) = self.define(inst)? {
            self.line(format_args!("LDS.{ty} {ret},shared_mem[{offset}];"));
        }
        Ok(())
    }

    pub(super) fn emit_write_shared(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let offset = self.a(inst, 0)?;
        let value = self.a(inst, 1)?;
        let ty = memory_type(op)?;
        self.line(format_args!("STS.{ty} {value},shared_mem[{offset}];"));
        Ok(())
    }
}
