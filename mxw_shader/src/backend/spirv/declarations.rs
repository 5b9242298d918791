use mxw_lib::header::{OutputTopology, NUM_GENERICS};
use mxw_lib::Stage;
use rspirv::dr::Operand;
use rspirv::spirv::{BuiltIn, Capability, Decoration, ExecutionMode, ExecutionModel, StorageClass, Word};

use super::image::{format_capability, image_format, is_signed_format, texture_dim};
use super::EmitContext;
use crate::error::CompileError;
use crate::ir::{Attribute, ImageFormat, InstId, Interpolation, Type};
use crate::logic_error;
use crate::profile::{CompareFunction, InputTopology, TessPrimitive, TessSpacing};

/// Constant buffers are declared with the maximum size of 64 KiB.
const CBUF_VEC4_COUNT: u32 = 4096;
/// The maximum number of vertices in a tessellation patch.
const MAX_PATCH_VERTICES: u32 = 32;

/// A sampled texture or texture buffer.
#[derive(Debug, Clone, Copy)]
pub(super) struct Texture {
    pub var: Word,
    pub image_type: Word,
    /// The combined image sampler type or `None` for texture buffers.
    pub sampled_image_type: Option<Word>,
}

/// A storage image or image buffer.
#[derive(Debug, Clone, Copy)]
pub(super) struct Image {
    pub var: Word,
    pub image_type: Word,
    pub format: ImageFormat,
}

/// Descriptor backed variables indexed like the descriptor lists of the program info.
#[derive(Debug, Default)]
pub(super) struct Resources {
    /// The uniform buffer for each constant buffer index.
    pub cbufs: Vec<(u32, Word)>,
    pub ssbos: Vec<Word>,
    pub texture_buffers: Vec<Texture>,
    pub textures: Vec<Texture>,
    pub image_buffers: Vec<Image>,
    pub images: Vec<Image>,
    pub shared: Option<Word>,
    pub local: Option<Word>,
}

/// Input and output variables created on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Var {
    Input(BuiltIn),
    Output(BuiltIn),
    InputGeneric(usize),
    OutputGeneric(usize),
    Patch(usize),
    FragColor(usize),
}

fn execution_model(stage: Stage) -> ExecutionModel {
    match stage {
        Stage::VertexA | Stage::VertexB => ExecutionModel::Vertex,
        Stage::TessellationControl => ExecutionModel::TessellationControl,
        Stage::TessellationEval => ExecutionModel::TessellationEvaluation,
        Stage::Geometry => ExecutionModel::Geometry,
        Stage::Fragment => ExecutionModel::Fragment,
        Stage::Compute => ExecutionModel::GLCompute,
    }
}

/// The comparison failing the alpha test.
fn alpha_test_fail(func: CompareFunction) -> Option<Comparison> {
    match func {
        CompareFunction::Never | CompareFunction::Always => None,
        CompareFunction::Less => Some(Comparison::GreaterThanEqual),
        CompareFunction::Equal => Some(Comparison::NotEqual),
        CompareFunction::LessThanEqual => Some(Comparison::GreaterThan),
        CompareFunction::Greater => Some(Comparison::LessThanEqual),
        CompareFunction::NotEqual => Some(Comparison::Equal),
        CompareFunction::GreaterThanEqual => Some(Comparison::LessThan),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
}

impl EmitContext<'_> {
    fn binding_decorations(&mut self, var: Word, binding: u32) {
        self.builder
            .decorate(var, Decoration::DescriptorSet, [Operand::LiteralBit32(0)]);
        self.builder
            .decorate(var, Decoration::Binding, [Operand::LiteralBit32(binding)]);
        // Only input and output variables are listed before SPIR-V 1.4.
        if self.supports_version(4) {
            self.interface.push(var);
        }
    }

    pub(super) fn array_type(&mut self, element: Word, length: u32) -> Word {
        let length = self.u32_const(length);
        self.builder.type_array(element, length)
    }

    /// Declare a variable for every descriptor in the program info.
    pub(super) fn declare_resources(&mut self) -> Result<(), CompileError> {
        let program = self.program;
        let info = &program.info;

        if !info.constant_buffer_descriptors.is_empty() {
            let vec4 = self.ty(Type::U32X4)?;
            let array = self.array_type(vec4, CBUF_VEC4_COUNT);
            self.builder
                .decorate(array, Decoration::ArrayStride, [Operand::LiteralBit32(16)]);
            let block = self.builder.type_struct([array]);
            self.builder
                .member_decorate(block, 0, Decoration::Offset, [Operand::LiteralBit32(0)]);
            self.builder.decorate(block, Decoration::Block, []);
            let pointer = self.pointer(StorageClass::Uniform, block);
            for (desc, binding) in info
                .constant_buffer_descriptors
                .iter()
                .zip(self.bindings.uniform_buffers.clone())
            {
                let var = self
                    .builder
                    .variable(pointer, None, StorageClass::Uniform, None);
                self.builder.name(var, format!("cbuf{}", desc.index));
                self.binding_decorations(var, binding);
                self.resources.cbufs.push((desc.index, var));
            }
        }

        if !info.storage_buffers_descriptors.is_empty() {
            if !self.supports_version(3) {
                self.extension("SPV_KHR_storage_buffer_storage_class");
            }
            let u32_type = self.u32_type;
            let array = self.builder.type_runtime_array(u32_type);
            self.builder
                .decorate(array, Decoration::ArrayStride, [Operand::LiteralBit32(4)]);
            let block = self.builder.type_struct([array]);
            self.builder
                .member_decorate(block, 0, Decoration::Offset, [Operand::LiteralBit32(0)]);
            self.builder.decorate(block, Decoration::Block, []);
            let pointer = self.pointer(StorageClass::StorageBuffer, block);
            for (i, (desc, binding)) in info
                .storage_buffers_descriptors
                .iter()
                .zip(self.bindings.storage_buffers.clone())
                .enumerate()
            {
                let var = self
                    .builder
                    .variable(pointer, None, StorageClass::StorageBuffer, None);
                self.builder.name(var, format!("ssbo{i}"));
                if !desc.is_written {
                    self.builder.decorate(var, Decoration::NonWritable, []);
                }
                self.binding_decorations(var, binding);
                self.resources.ssbos.push(var);
            }
        }

        for binding in self.bindings.texture_buffers.clone() {
            self.capability(Capability::SampledBuffer);
            let f32_type = self.f32_type;
            let image_type = self.builder.type_image(
                f32_type,
                rspirv::spirv::Dim::DimBuffer,
                0,
                0,
                0,
                1,
                rspirv::spirv::ImageFormat::Unknown,
                None,
            );
            let pointer = self.pointer(StorageClass::UniformConstant, image_type);
            let var = self
                .builder
                .variable(pointer, None, StorageClass::UniformConstant, None);
            self.binding_decorations(var, binding);
            self.resources.texture_buffers.push(Texture {
                var,
                image_type,
                sampled_image_type: None,
            });
        }

        for (desc, binding) in info
            .texture_descriptors
            .iter()
            .zip(self.bindings.textures.clone())
        {
            let (dim, capability) = texture_dim(desc.texture_type, false);
            if let Some(capability) = capability {
                self.capability(capability);
            }
            let f32_type = self.f32_type;
            let image_type = self.builder.type_image(
                f32_type,
                dim,
                desc.is_depth as u32,
                desc.texture_type.is_array() as u32,
                0,
                1,
                rspirv::spirv::ImageFormat::Unknown,
                None,
            );
            let sampled_image_type = self.builder.type_sampled_image(image_type);
            let pointer = self.pointer(StorageClass::UniformConstant, sampled_image_type);
            let var = self
                .builder
                .variable(pointer, None, StorageClass::UniformConstant, None);
            self.binding_decorations(var, binding);
            self.resources.textures.push(Texture {
                var,
                image_type,
                sampled_image_type: Some(sampled_image_type),
            });
        }

        let image_buffers = info
            .image_buffer_descriptors
            .iter()
            .map(|d| (mxw_lib::TextureType::Buffer, d.format, d.is_written, d.is_read));
        let images = info
            .image_descriptors
            .iter()
            .map(|d| (d.texture_type, d.format, d.is_written, d.is_read));
        let bindings = self
            .bindings
            .image_buffers
            .iter()
            .chain(&self.bindings.images)
            .copied()
            .collect::<Vec<_>>();
        for ((texture_type, format, is_written, is_read), binding) in
            image_buffers.chain(images).zip(bindings)
        {
            let (dim, capability) = texture_dim(texture_type, true);
            if let Some(capability) = capability {
                self.capability(capability);
            }
            if let Some(capability) = format_capability(format) {
                self.capability(capability);
            }
            if format == ImageFormat::Typeless {
                if is_read {
                    self.capability(Capability::StorageImageReadWithoutFormat);
                }
                if is_written {
                    self.capability(Capability::StorageImageWriteWithoutFormat);
                }
            }
            let sampled_type = if is_signed_format(format) {
                self.signed_type(1)
            } else {
                self.u32_type
            };
            let image_type = self.builder.type_image(
                sampled_type,
                dim,
                0,
                texture_type.is_array() as u32,
                0,
                2,
                image_format(format),
                None,
            );
            let pointer = self.pointer(StorageClass::UniformConstant, image_type);
            let var = self
                .builder
                .variable(pointer, None, StorageClass::UniformConstant, None);
            if !is_written {
                self.builder.decorate(var, Decoration::NonWritable, []);
            }
            if !is_read {
                self.builder.decorate(var, Decoration::NonReadable, []);
            }
            self.binding_decorations(var, binding);
            let image = Image {
                var,
                image_type,
                format,
            };
            if texture_type == mxw_lib::TextureType::Buffer {
                self.resources.image_buffers.push(image);
            } else {
                self.resources.images.push(image);
            }
        }
        Ok(())
    }

    /// The workgroup shared memory as an array of 32-bit words.
    pub(super) fn shared_memory(&mut self) -> Word {
        if let Some(var) = self.resources.shared {
            return var;
        }
        let words = self.program.shared_memory_size.div_ceil(4).max(1);
        let u32_type = self.u32_type;
        let array = self.array_type(u32_type, words);
        let pointer = self.pointer(StorageClass::Workgroup, array);
        let var = self
            .builder
            .variable(pointer, None, StorageClass::Workgroup, None);
        self.builder.name(var, "smem");
        if self.supports_version(4) {
            self.interface.push(var);
        }
        self.resources.shared = Some(var);
        var
    }

    /// The thread local memory as an array of 32-bit words.
    pub(super) fn local_memory(&mut self) -> Word {
        if let Some(var) = self.resources.local {
            return var;
        }
        let words = self.program.local_memory_size.div_ceil(4).max(1);
        let u32_type = self.u32_type;
        let array = self.array_type(u32_type, words);
        let pointer = self.pointer(StorageClass::Private, array);
        let var = self
            .builder
            .variable(pointer, None, StorageClass::Private, None);
        self.builder.name(var, "lmem");
        if self.supports_version(4) {
            self.interface.push(var);
        }
        self.resources.local = Some(var);
        var
    }

    /// Inputs of these stages are arrays indexed by vertex.
    pub(super) fn has_vertex_arrays(&self) -> bool {
        matches!(
            self.program.stage,
            Stage::TessellationControl | Stage::TessellationEval | Stage::Geometry
        )
    }

    fn input_vertex_count(&self) -> u32 {
        match self.program.stage {
            Stage::Geometry => self.runtime_info.input_topology.vertex_count(),
            _ => MAX_PATCH_VERTICES,
        }
    }

    /// The storage class and pointee type of `var`.
    fn io_type(&mut self, var: Var) -> Result<(StorageClass, Word), CompileError> {
        let stage = self.program.stage;
        let vec4 = self.ty(Type::F32X4)?;
        let per_vertex_input = self.has_vertex_arrays();
        let per_invocation_output = stage == Stage::TessellationControl;
        let (class, ty) = match var {
            Var::InputGeneric(_) | Var::Input(BuiltIn::Position) if per_vertex_input => {
                let count = self.input_vertex_count();
                (StorageClass::Input, self.array_type(vec4, count))
            }
            Var::InputGeneric(_) => (StorageClass::Input, vec4),
            Var::OutputGeneric(_) | Var::Output(BuiltIn::Position) if per_invocation_output => {
                let count = self.program.invocations.max(1);
                (StorageClass::Output, self.array_type(vec4, count))
            }
            Var::OutputGeneric(_) | Var::FragColor(_) => (StorageClass::Output, vec4),
            Var::Patch(_) if stage == Stage::TessellationControl => (StorageClass::Output, vec4),
            Var::Patch(_) => (StorageClass::Input, vec4),
            Var::Input(builtin) => (StorageClass::Input, self.builtin_type(builtin)?),
            Var::Output(builtin) => (StorageClass::Output, self.builtin_type(builtin)?),
        };
        Ok((class, ty))
    }

    fn builtin_type(&mut self, builtin: BuiltIn) -> Result<Word, CompileError> {
        match builtin {
            BuiltIn::Position | BuiltIn::FragCoord => self.ty(Type::F32X4),
            BuiltIn::PointCoord => self.ty(Type::F32X2),
            BuiltIn::TessCoord => self.ty(Type::F32X3),
            BuiltIn::WorkgroupId | BuiltIn::LocalInvocationId => self.ty(Type::U32X3),
            BuiltIn::PointSize | BuiltIn::FragDepth => Ok(self.f32_type),
            BuiltIn::FrontFacing | BuiltIn::HelperInvocation => Ok(self.bool_type),
            BuiltIn::TessLevelOuter => Ok(self.array_type(self.f32_type, 4)),
            BuiltIn::TessLevelInner => Ok(self.array_type(self.f32_type, 2)),
            BuiltIn::ClipDistance => Ok(self.array_type(self.f32_type, 8)),
            BuiltIn::SampleMask => Ok(self.array_type(self.u32_type, 1)),
            BuiltIn::PrimitiveId
            | BuiltIn::InstanceIndex
            | BuiltIn::VertexIndex
            | BuiltIn::Layer
            | BuiltIn::ViewportIndex
            | BuiltIn::SampleId
            | BuiltIn::InvocationId
            | BuiltIn::SubgroupLocalInvocationId => Ok(self.u32_type),
            builtin => Err(logic_error!("Unexpected built in {builtin:?}")),
        }
    }

    fn decorate_io(&mut self, var: Var, id: Word) {
        let stage = self.program.stage;
        let location = |index: usize| Operand::LiteralBit32(index as u32);
        match var {
            Var::Input(builtin) | Var::Output(builtin) => {
                self.builder
                    .decorate(id, Decoration::BuiltIn, [Operand::BuiltIn(builtin)]);
                if matches!(builtin, BuiltIn::TessLevelOuter | BuiltIn::TessLevelInner) {
                    self.builder.decorate(id, Decoration::Patch, []);
                }
                let is_integer_input = matches!(
                    builtin,
                    BuiltIn::PrimitiveId
                        | BuiltIn::Layer
                        | BuiltIn::ViewportIndex
                        | BuiltIn::SampleId
                );
                if stage == Stage::Fragment && matches!(var, Var::Input(_)) && is_integer_input {
                    self.builder.decorate(id, Decoration::Flat, []);
                }
                if var == Var::Output(BuiltIn::Position) {
                    self.decorate_xfb(id, Attribute::POSITION_X);
                }
            }
            Var::InputGeneric(index) => {
                self.builder
                    .decorate(id, Decoration::Location, [location(index)]);
                if stage == Stage::Fragment {
                    match self.program.info.input_generics[index].interpolation {
                        Interpolation::Flat => self.builder.decorate(id, Decoration::Flat, []),
                        Interpolation::NoPerspective => {
                            self.builder.decorate(id, Decoration::NoPerspective, [])
                        }
                        Interpolation::Smooth => (),
                    }
                }
            }
            Var::OutputGeneric(index) => {
                self.builder
                    .decorate(id, Decoration::Location, [location(index)]);
                self.decorate_xfb(id, Attribute::generic(index, 0));
            }
            Var::FragColor(index) => {
                self.builder
                    .decorate(id, Decoration::Location, [location(index)]);
            }
            Var::Patch(index) => {
                self.builder.decorate(id, Decoration::Patch, []);
                self.builder
                    .decorate(id, Decoration::Location, [location(index)]);
            }
        }
    }

    /// Capture the output starting at `attribute` with transform feedback if it has a varying.
    fn decorate_xfb(&mut self, id: Word, attribute: Attribute) {
        let Some(Some(varying)) = self.runtime_info.xfb_varyings.get(attribute.0 as usize) else {
            return;
        };
        let varying = *varying;
        let literal = Operand::LiteralBit32;
        self.builder
            .decorate(id, Decoration::XfbBuffer, [literal(varying.buffer)]);
        self.builder
            .decorate(id, Decoration::XfbStride, [literal(varying.stride)]);
        self.builder
            .decorate(id, Decoration::Offset, [literal(varying.offset)]);
        self.capability(Capability::TransformFeedback);
    }

    /// The variable for an input or output declared on first use.
    pub(super) fn io_var(&mut self, var: Var) -> Result<Word, CompileError> {
        if let Some(id) = self.vars.get(&var) {
            return Ok(*id);
        }
        let (class, ty) = self.io_type(var)?;
        let pointer = self.pointer(class, ty);
        let id = self.builder.variable(pointer, None, class, None);
        self.decorate_io(var, id);
        self.interface.push(id);
        self.vars.insert(var, id);
        Ok(id)
    }

    /// Load a built in input as the result of `inst`.
    pub(super) fn emit_builtin(
        &mut self,
        inst: InstId,
        builtin: BuiltIn,
    ) -> Result<(), CompileError> {
        let var = self.io_var(Var::Input(builtin))?;
        let ty = self.result_type(inst)?;
        let id = self.def(inst);
        self.builder.load(ty, Some(id), var, None, [])?;
        Ok(())
    }

    pub(super) fn declare_entry_point(&mut self, main: Word) -> Result<(), CompileError> {
        let program = self.program;
        let stage = program.stage;
        let interface = self.interface.clone();
        self.builder
            .entry_point(execution_model(stage), main, "main", interface);
        if self.capabilities.contains(&Capability::TransformFeedback) {
            self.builder.execution_mode(main, ExecutionMode::Xfb, []);
        }

        match stage {
            Stage::Compute => {
                let [x, y, z] = program.workgroup_size;
                self.builder
                    .execution_mode(main, ExecutionMode::LocalSize, [x, y, z]);
            }
            Stage::Fragment => {
                let origin = if self.profile.lower_left_origin_mode {
                    ExecutionMode::OriginLowerLeft
                } else {
                    ExecutionMode::OriginUpperLeft
                };
                self.builder.execution_mode(main, origin, []);
                if self.runtime_info.force_early_z {
                    self.builder
                        .execution_mode(main, ExecutionMode::EarlyFragmentTests, []);
                }
                if program.info.stores_frag_depth
                    || self.vars.contains_key(&Var::Output(BuiltIn::FragDepth))
                {
                    self.builder
                        .execution_mode(main, ExecutionMode::DepthReplacing, []);
                }
            }
            Stage::Geometry => {
                self.capability(Capability::Geometry);
                let input = match self.runtime_info.input_topology {
                    InputTopology::Points => ExecutionMode::InputPoints,
                    InputTopology::Lines => ExecutionMode::InputLines,
                    InputTopology::LinesAdjacency => ExecutionMode::InputLinesAdjacency,
                    InputTopology::Triangles => ExecutionMode::Triangles,
                    InputTopology::TrianglesAdjacency => ExecutionMode::InputTrianglesAdjacency,
                };
                let output = match program.output_topology {
                    Some(OutputTopology::PointList) => ExecutionMode::OutputPoints,
                    Some(OutputTopology::LineStrip) => ExecutionMode::OutputLineStrip,
                    Some(OutputTopology::TriangleStrip) | None => {
                        ExecutionMode::OutputTriangleStrip
                    }
                };
                self.builder.execution_mode(main, input, []);
                self.builder.execution_mode(main, output, []);
                self.builder.execution_mode(
                    main,
                    ExecutionMode::OutputVertices,
                    [program.output_vertices.max(1)],
                );
                self.builder.execution_mode(
                    main,
                    ExecutionMode::Invocations,
                    [program.invocations.max(1)],
                );
            }
            Stage::TessellationControl => {
                self.capability(Capability::Tessellation);
                self.builder.execution_mode(
                    main,
                    ExecutionMode::OutputVertices,
                    [program.invocations.max(1)],
                );
            }
            Stage::TessellationEval => {
                self.capability(Capability::Tessellation);
                let primitive = match self.runtime_info.tess_primitive {
                    TessPrimitive::Isolines => ExecutionMode::Isolines,
                    TessPrimitive::Triangles => ExecutionMode::Triangles,
                    TessPrimitive::Quads => ExecutionMode::Quads,
                };
                let spacing = match self.runtime_info.tess_spacing {
                    TessSpacing::Equal => ExecutionMode::SpacingEqual,
                    TessSpacing::FractionalOdd => ExecutionMode::SpacingFractionalOdd,
                    TessSpacing::FractionalEven => ExecutionMode::SpacingFractionalEven,
                };
                let order = if self.runtime_info.tess_clockwise {
                    ExecutionMode::VertexOrderCw
                } else {
                    ExecutionMode::VertexOrderCcw
                };
                self.builder.execution_mode(main, primitive, []);
                self.builder.execution_mode(main, spacing, []);
                self.builder.execution_mode(main, order, []);
            }
            Stage::VertexA | Stage::VertexB => (),
        }
        Ok(())
    }

    pub(super) fn emit_prologue(&mut self) -> Result<(), CompileError> {
        let program = self.program;
        if matches!(
            program.stage,
            Stage::Fragment | Stage::Compute | Stage::TessellationControl
        ) {
            return Ok(());
        }
        let vec4 = self.ty(Type::F32X4)?;
        let zero = self.f32_const(0.0);
        let one = self.f32_const(1.0);
        let default = self.builder.constant_composite(vec4, [zero, zero, zero, one]);

        let info = &program.info;
        if info.stores_position {
            let var = self.io_var(Var::Output(BuiltIn::Position))?;
            self.builder.store(var, default, None, [])?;
        }
        for i in 0..NUM_GENERICS {
            if info.stores_generics[i] {
                let var = self.io_var(Var::OutputGeneric(i))?;
                self.builder.store(var, default, None, [])?;
            }
        }
        Ok(())
    }

    pub(super) fn emit_epilogue(&mut self) -> Result<(), CompileError> {
        match self.program.stage {
            Stage::Fragment => {
                let Some(func) = self.runtime_info.alpha_test_func else {
                    return Ok(());
                };
                if !self.program.info.stores_frag_color[0] {
                    return Ok(());
                }
                match func {
                    CompareFunction::Always => (),
                    CompareFunction::Never => {
                        let cond = self.bool_const(true);
                        self.emit_conditional_kill(cond)?;
                    }
                    func => {
                        if let Some(compare) = alpha_test_fail(func) {
                            let alpha = self.load_frag_color_component(0, 3)?;
                            let reference = self.f32_const(self.runtime_info.alpha_test_reference);
                            let bool_type = self.bool_type;
                            let b = &mut self.builder;
                            let cond = match compare {
                                Comparison::Equal => {
                                    b.f_ord_equal(bool_type, None, alpha, reference)?
                                }
                                Comparison::NotEqual => {
                                    b.f_unord_not_equal(bool_type, None, alpha, reference)?
                                }
                                Comparison::LessThan => {
                                    b.f_ord_less_than(bool_type, None, alpha, reference)?
                                }
                                Comparison::LessThanEqual => {
                                    b.f_ord_less_than_equal(bool_type, None, alpha, reference)?
                                }
                                Comparison::GreaterThan => {
                                    b.f_ord_greater_than(bool_type, None, alpha, reference)?
                                }
                                Comparison::GreaterThanEqual => b.f_ord_greater_than_equal(
                                    bool_type, None, alpha, reference,
                                )?,
                            };
                            self.emit_conditional_kill(cond)?;
                        }
                    }
                }
            }
            Stage::Compute => (),
            _ => {
                if let Some(size) = self.runtime_info.fixed_state_point_size {
                    let var = self.io_var(Var::Output(BuiltIn::PointSize))?;
                    let size = self.f32_const(size);
                    self.builder.store(var, size, None, [])?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::spirv::tests::{decorations, emit, emit_with, ops, single_block, vulkan_profile};
    use crate::ir::{
        Attribute, ConstantBufferDescriptor, IrEmitter, StorageBufferDescriptor, TextureDescriptor,
        Value,
    };
    use crate::profile::{RuntimeInfo, TransformFeedbackVarying};
    use pretty_assertions::assert_eq;
    use rspirv::spirv::Op;

    fn execution_modes(module: &rspirv::dr::Module) -> Vec<Operand> {
        module
            .execution_modes
            .iter()
            .map(|i| i.operands[1].clone())
            .collect()
    }

    #[test]
    fn fragment_declarations() {
        let (mut program, block) = single_block(Stage::Fragment);
        program.info.input_generics[1].used = true;
        program.info.input_generics[1].interpolation = Interpolation::NoPerspective;
        program.info.stores_frag_color[0] = true;
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let x = ir.get_attribute(Attribute::generic(1, 2), Value::U32(0));
        ir.set_frag_color(0, 0, x);

        let module = emit(&program);
        assert_eq!(
            Operand::ExecutionModel(ExecutionModel::Fragment),
            module.entry_points[0].operands[0]
        );
        // The input and output are both listed by the entry point.
        assert_eq!(5, module.entry_points[0].operands.len());
        assert_eq!(
            vec![Operand::ExecutionMode(ExecutionMode::OriginUpperLeft)],
            execution_modes(&module)
        );
        assert_eq!(
            vec![
                vec![Operand::LiteralBit32(1)],
                vec![Operand::LiteralBit32(0)]
            ],
            decorations(&module, Decoration::Location)
        );
        assert_eq!(1, decorations(&module, Decoration::NoPerspective).len());
        assert_eq!(
            vec![
                Op::AccessChain,
                Op::Load,
                Op::AccessChain,
                Op::Store,
                Op::Return
            ],
            ops(&module)
        );
    }

    #[test]
    fn resource_bindings() {
        let (mut program, _) = single_block(Stage::Fragment);
        let info = &mut program.info;
        info.constant_buffer_descriptors = vec![
            ConstantBufferDescriptor { index: 0, count: 1 },
            ConstantBufferDescriptor { index: 3, count: 1 },
        ];
        info.storage_buffers_descriptors = vec![StorageBufferDescriptor {
            cbuf_index: 0,
            cbuf_offset: 0x110,
            count: 1,
            is_written: false,
        }];
        info.texture_descriptors = vec![TextureDescriptor {
            texture_type: mxw_lib::TextureType::ColorArrayCube,
            is_depth: false,
            cbuf_index: 0,
            cbuf_offset: 0x20,
            count: 1,
        }];

        let profile = crate::profile::Profile::default();
        let module = emit_with(&profile, &RuntimeInfo::default(), &program);
        assert_eq!(
            vec![
                vec![Operand::LiteralBit32(0)],
                vec![Operand::LiteralBit32(1)],
                vec![Operand::LiteralBit32(0)],
                vec![Operand::LiteralBit32(0)],
            ],
            decorations(&module, Decoration::Binding)
        );
        assert_eq!(1, decorations(&module, Decoration::NonWritable).len());
        // Storage buffers need an extension before SPIR-V 1.3.
        assert_eq!(
            vec![Operand::LiteralString(
                "SPV_KHR_storage_buffer_storage_class".to_string()
            )],
            module.extensions[0].operands
        );
        let capabilities: Vec<_> = module
            .capabilities
            .iter()
            .map(|i| i.operands[0].clone())
            .collect();
        assert!(capabilities.contains(&Operand::Capability(Capability::SampledCubeArray)));
    }

    #[test]
    fn tessellation_eval_modes() {
        let (program, _) = single_block(Stage::TessellationEval);
        let runtime_info = RuntimeInfo {
            tess_primitive: TessPrimitive::Quads,
            tess_spacing: TessSpacing::FractionalOdd,
            tess_clockwise: true,
            ..Default::default()
        };

        let module = emit_with(&vulkan_profile(), &runtime_info, &program);
        assert_eq!(
            vec![
                Operand::ExecutionMode(ExecutionMode::Quads),
                Operand::ExecutionMode(ExecutionMode::SpacingFractionalOdd),
                Operand::ExecutionMode(ExecutionMode::VertexOrderCw),
            ],
            execution_modes(&module)
        );
    }

    #[test]
    fn transform_feedback_outputs() {
        let (mut program, block) = single_block(Stage::VertexB);
        program.info.stores_generics[1] = true;
        let mut ir = IrEmitter::new(&mut program.pool, block);
        ir.set_attribute(Attribute::generic(1, 0), Value::F32(1.0), Value::U32(0));

        let mut runtime_info = RuntimeInfo {
            xfb_varyings: vec![None; 256],
            ..Default::default()
        };
        runtime_info.xfb_varyings[Attribute::generic(1, 0).0 as usize] =
            Some(TransformFeedbackVarying {
                buffer: 2,
                stride: 32,
                offset: 16,
                components: 4,
            });

        let module = emit_with(&vulkan_profile(), &runtime_info, &program);
        assert_eq!(
            vec![vec![Operand::LiteralBit32(2)]],
            decorations(&module, Decoration::XfbBuffer)
        );
        assert_eq!(
            vec![vec![Operand::LiteralBit32(32)]],
            decorations(&module, Decoration::XfbStride)
        );
        assert_eq!(
            vec![vec![Operand::LiteralBit32(16)]],
            decorations(&module, Decoration::Offset)
        );
        assert_eq!(
            vec![Operand::ExecutionMode(ExecutionMode::Xfb)],
            execution_modes(&module)
        );
    }

    #[test]
    fn alpha_test_kills() {
        let (mut program, block) = single_block(Stage::Fragment);
        program.info.stores_frag_color[0] = true;
        let mut ir = IrEmitter::new(&mut program.pool, block);
        ir.set_frag_color(0, 3, Value::F32(0.25));
        ir.epilogue();

        let runtime_info = RuntimeInfo {
            alpha_test_func: Some(CompareFunction::Greater),
            alpha_test_reference: 0.5,
            ..Default::default()
        };
        let module = emit_with(&vulkan_profile(), &runtime_info, &program);
        assert_eq!(
            vec![
                Op::AccessChain,
                Op::Store,
                Op::AccessChain,
                Op::Load,
                Op::FOrdLessThanEqual,
                Op::SelectionMerge,
                Op::BranchConditional,
                Op::Kill,
                Op::Return
            ],
            ops(&module)
        );
    }

    #[test]
    fn vertex_prologue_and_point_size() {
        let (mut program, block) = single_block(Stage::VertexB);
        program.info.stores_position = true;
        let mut ir = IrEmitter::new(&mut program.pool, block);
        ir.prologue();
        ir.set_attribute(Attribute::POSITION_X, Value::F32(1.0), Value::U32(0));
        ir.epilogue();

        let runtime_info = RuntimeInfo {
            fixed_state_point_size: Some(2.0),
            ..Default::default()
        };
        let module = emit_with(&vulkan_profile(), &runtime_info, &program);
        assert_eq!(
            vec![Op::Store, Op::AccessChain, Op::Store, Op::Store, Op::Return],
            ops(&module)
        );
        assert_eq!(
            vec![
                vec![Operand::BuiltIn(BuiltIn::Position)],
                vec![Operand::BuiltIn(BuiltIn::PointSize)]
            ],
            decorations(&module, Decoration::BuiltIn)
        );
    }
}
