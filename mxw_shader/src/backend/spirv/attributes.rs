use log::warn;
use mxw_lib::Stage;
use rspirv::spirv::{BuiltIn, Capability, StorageClass, Word};

use super::declarations::Var;
use super::EmitContext;
use crate::error::CompileError;
use crate::ir::{Attribute, InstId, Patch};
use crate::{logic_error, not_implemented};

/// Where a scalar attribute lives.
enum Location {
    /// A component of a float variable.
    Component(Var, Option<u32>),
    /// An integer built in loaded as a whole.
    Integer(BuiltIn),
    FrontFace,
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

    fn input_location(&mut self, attr: Attribute) -> Result<Location, CompileError> {
        let stage = self.program.stage;
        let element = Some(attr.element() as u32);
        if let Some(index) = attr.generic_index() {
            return Ok(Location::Component(Var::InputGeneric(index), element));
        }
        if attr.is_position() {
            return match stage {
                Stage::Fragment => Ok(Location::Component(Var::Input(BuiltIn::FragCoord), element)),
                Stage::VertexA | Stage::VertexB | Stage::Compute => {
                    Err(not_implemented!("Read position in {stage:?} stage"))
                }
                _ => Ok(Location::Component(Var::Input(BuiltIn::Position), element)),
            };
        }
        match attr {
            Attribute::FRONT_FACE => Ok(Location::FrontFace),
            Attribute::POINT_SPRITE_S => Ok(Location::Component(Var::Input(BuiltIn::PointCoord), Some(0))),
            Attribute::POINT_SPRITE_T => Ok(Location::Component(Var::Input(BuiltIn::PointCoord), Some(1))),
            Attribute::TESS_EVAL_POINT_U => {
                Ok(Location::Component(Var::Input(BuiltIn::TessCoord), Some(0)))
            }
            Attribute::TESS_EVAL_POINT_V => {
                Ok(Location::Component(Var::Input(BuiltIn::TessCoord), Some(1)))
            }
            Attribute::PRIMITIVE_ID => Ok(Location::Integer(BuiltIn::PrimitiveId)),
            Attribute::INSTANCE_ID => Ok(Location::Integer(BuiltIn::InstanceIndex)),
            Attribute::VERTEX_ID => Ok(Location::Integer(BuiltIn::VertexIndex)),
            Attribute::LAYER => {
                self.capability(Capability::Geometry);
                Ok(Location::Integer(BuiltIn::Layer))
            }
            Attribute::VIEWPORT_INDEX => {
                self.capability(Capability::MultiViewport);
                Ok(Location::Integer(BuiltIn::ViewportIndex))
            }
            attr => Err(not_implemented!("Read attribute {attr}")),
        }
    }

    /// Indices selecting a component of `var` after the vertex index for arrayed inputs.
    fn component_pointer(
        &mut self,
        var: Var,
        class: StorageClass,
        indices: Vec<Word>,
    ) -> Result<Word, CompileError> {
        let base = self.io_var(var)?;
        let pointer = self.pointer(class, self.f32_type);
        Ok(self.builder.access_chain(pointer, None, base, indices)?)
    }

    pub(super) fn emit_get_attribute(
        &mut self,
        inst: InstId,
        is_integer: bool,
    ) -> Result<(), CompileError> {
        let attr = self.attribute_arg(inst)?;
        let location = self.input_location(attr)?;
        let u32_type = self.u32_type;
        let f32_type = self.f32_type;

        // The value in its natural type and whether it is a float.
        let (value, is_float) = match location {
            Location::Component(var, element) => {
                let mut indices = Vec::new();
                let arrayed = matches!(var, Var::InputGeneric(_) | Var::Input(BuiltIn::Position));
                if arrayed && self.has_vertex_arrays() {
                    indices.push(self.a(inst, 1)?);
                }
                if let Some(element) = element {
                    indices.push(self.u32_const(element));
                }
                let pointer = self.component_pointer(var, StorageClass::Input, indices)?;
                (self.builder.load(f32_type, None, pointer, None, [])?, true)
            }
            Location::Integer(builtin) => {
                let var = self.io_var(Var::Input(builtin))?;
                (self.builder.load(u32_type, None, var, None, [])?, false)
            }
            Location::FrontFace => {
                let var = self.io_var(Var::Input(BuiltIn::FrontFacing))?;
                let bool_type = self.bool_type;
                let front = self.builder.load(bool_type, None, var, None, [])?;
                let all = self.u32_const(u32::MAX);
                let none = self.u32_const(0);
                let mask = self.builder.select(u32_type, None, front, all, none)?;
                (mask, false)
            }
        };

        let id = self.def(inst);
        match (is_integer, is_float) {
            (true, true) => self.builder.bitcast(u32_type, Some(id), value)?,
            (false, false) => self.builder.bitcast(f32_type, Some(id), value)?,
            (true, false) => self.builder.copy_object(u32_type, Some(id), value)?,
            (false, true) => self.builder.copy_object(f32_type, Some(id), value)?,
        };
        Ok(())
    }

    /// The per invocation index for outputs of tessellation control shaders.
    fn invocation_index(&mut self) -> Result<Vec<Word>, CompileError> {
        if self.program.stage != Stage::TessellationControl {
            return Ok(Vec::new());
        }
        let var = self.io_var(Var::Input(BuiltIn::InvocationId))?;
        let u32_type = self.u32_type;
        Ok(vec![self.builder.load(u32_type, None, var, None, [])?])
    }

    pub(super) fn emit_set_attribute(&mut self, inst: InstId) -> Result<(), CompileError> {
        let attr = self.attribute_arg(inst)?;
        let value = self.a(inst, 1)?;
        let stage = self.program.stage;
        let element = attr.element() as u32;

        if let Some(index) = attr.generic_index() {
            let mut indices = self.invocation_index()?;
            indices.push(self.u32_const(element));
            let pointer =
                self.component_pointer(Var::OutputGeneric(index), StorageClass::Output, indices)?;
            self.builder.store(pointer, value, None, [])?;
            return Ok(());
        }
        if attr.is_position() {
            let mut indices = self.invocation_index()?;
            indices.push(self.u32_const(element));
            let pointer = self.component_pointer(
                Var::Output(BuiltIn::Position),
                StorageClass::Output,
                indices,
            )?;
            self.builder.store(pointer, value, None, [])?;
            return Ok(());
        }
        if attr.is_clip_distance() {
            self.capability(Capability::ClipDistance);
            let index = self.u32_const((attr.0 - Attribute::CLIP_DISTANCE_0.0) as u32);
            let pointer = self.component_pointer(
                Var::Output(BuiltIn::ClipDistance),
                StorageClass::Output,
                vec![index],
            )?;
            self.builder.store(pointer, value, None, [])?;
            return Ok(());
        }
        match attr {
            Attribute::POINT_SIZE => {
                let var = self.io_var(Var::Output(BuiltIn::PointSize))?;
                self.builder.store(var, value, None, [])?;
            }
            Attribute::LAYER | Attribute::VIEWPORT_INDEX => {
                let builtin = if attr == Attribute::LAYER {
                    BuiltIn::Layer
                } else {
                    BuiltIn::ViewportIndex
                };
                if stage == Stage::Geometry {
                    if builtin == BuiltIn::ViewportIndex {
                        self.capability(Capability::MultiViewport);
                    }
                } else if self.profile.support_viewport_index_layer_non_geometry {
                    self.capability(Capability::ShaderViewportIndexLayerEXT);
                    self.extension("SPV_EXT_shader_viewport_index_layer");
                } else {
                    warn!("Skipped write to {attr} in {stage:?} stage");
                    return Ok(());
                }
                let var = self.io_var(Var::Output(builtin))?;
                let u32_type = self.u32_type;
                let bits = self.builder.bitcast(u32_type, None, value)?;
                self.builder.store(var, bits, None, [])?;
            }
            attr => return Err(not_implemented!("Write attribute {attr}")),
        }
        Ok(())
    }

    /// The pointer to a per patch component.
    fn patch_pointer(&mut self, patch: Patch) -> Result<Word, CompileError> {
        let is_output = self.program.stage == Stage::TessellationControl;
        let class = if is_output {
            StorageClass::Output
        } else {
            StorageClass::Input
        };
        let (builtin, index) = match patch {
            Patch::TESS_LOD_LEFT
            | Patch::TESS_LOD_TOP
            | Patch::TESS_LOD_RIGHT
            | Patch::TESS_LOD_BOTTOM => (Some(BuiltIn::TessLevelOuter), patch.0 as u32),
            Patch::TESS_LOD_INTERIOR_U | Patch::TESS_LOD_INTERIOR_V => (
                Some(BuiltIn::TessLevelInner),
                (patch.0 - Patch::TESS_LOD_INTERIOR_U.0) as u32,
            ),
            patch => (None, patch.element() as u32),
        };
        let var = match (builtin, is_output) {
            (Some(builtin), true) => Var::Output(builtin),
            (Some(builtin), false) => Var::Input(builtin),
            (None, _) => {
                let generic = patch
                    .generic_index()
                    .ok_or_else(|| not_implemented!("Patch {patch:?}"))?;
                Var::Patch(generic)
            }
        };
        let index = self.u32_const(index);
        self.component_pointer(var, class, vec![index])
    }

    pub(super) fn emit_get_patch(&mut self, inst: InstId) -> Result<(), CompileError> {
        let patch = self.patch_arg(inst)?;
        let pointer = self.patch_pointer(patch)?;
        let f32_type = self.f32_type;
        let id = self.def(inst);
        self.builder.load(f32_type, Some(id), pointer, None, [])?;
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
        let value = self.a(inst, 1)?;
        let pointer = self.patch_pointer(patch)?;
        self.builder.store(pointer, value, None, [])?;
        Ok(())
    }

    fn frag_color_pointer(&mut self, target: u32, component: u32) -> Result<Word, CompileError> {
        let component = self.u32_const(component);
        self.component_pointer(
            Var::FragColor(target as usize),
            StorageClass::Output,
            vec![component],
        )
    }

    pub(super) fn emit_set_frag_color(&mut self, inst: InstId) -> Result<(), CompileError> {
        let target = self.imm(inst, 0)?;
        let component = self.imm(inst, 1)?;
        let value = self.a(inst, 2)?;
        let pointer = self.frag_color_pointer(target, component)?;
        self.builder.store(pointer, value, None, [])?;
        Ok(())
    }

    /// Read back a component written to a color output.
    pub(super) fn load_frag_color_component(
        &mut self,
        target: u32,
        component: u32,
    ) -> Result<Word, CompileError> {
        let pointer = self.frag_color_pointer(target, component)?;
        let f32_type = self.f32_type;
        Ok(self.builder.load(f32_type, None, pointer, None, [])?)
    }

    pub(super) fn emit_set_sample_mask(&mut self, inst: InstId) -> Result<(), CompileError> {
        let value = self.a(inst, 0)?;
        let var = self.io_var(Var::Output(BuiltIn::SampleMask))?;
        let pointer = self.pointer(StorageClass::Output, self.u32_type);
        let index = self.u32_const(0);
        let element = self.builder.access_chain(pointer, None, var, [index])?;
        self.builder.store(element, value, None, [])?;
        Ok(())
    }

    pub(super) fn emit_set_frag_depth(&mut self, inst: InstId) -> Result<(), CompileError> {
        let value = self.a(inst, 0)?;
        let var = self.io_var(Var::Output(BuiltIn::FragDepth))?;
        self.builder.store(var, value, None, [])?;
        Ok(())
    }
}
