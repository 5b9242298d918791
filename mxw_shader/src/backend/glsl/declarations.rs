use std::fmt::Write;

use log::warn;
use mxw_lib::header::{OutputTopology, NUM_GENERICS};
use mxw_lib::{Stage, TextureType};

use super::EmitContext;
use crate::error::CompileError;
use crate::ir::{ImageFormat, Interpolation, Patch};
use crate::not_implemented;
use crate::profile::{CompareFunction, InputTopology, TessPrimitive, TessSpacing};

/// The number of `uvec4` elements declared for each constant buffer.
pub const CBUF_ELEMENTS: u32 = 4096;

/// The prefix for resource names to avoid collisions between linked stages.
pub(super) fn stage_prefix(stage: Stage) -> &'static str {
    match stage {
        Stage::VertexA | Stage::VertexB => "vs",
        Stage::TessellationControl => "tcs",
        Stage::TessellationEval => "tes",
        Stage::Geometry => "gs",
        Stage::Fragment => "fs",
        Stage::Compute => "cs",
    }
}

fn sampler_type(ty: TextureType, is_depth: bool) -> Result<&'static str, CompileError> {
    match (ty, is_depth) {
        (TextureType::Color1D, false) => Ok("sampler1D"),
        (TextureType::ColorArray1D, false) => Ok("sampler1DArray"),
        (TextureType::Color2D, false) => Ok("sampler2D"),
        (TextureType::ColorArray2D, false) => Ok("sampler2DArray"),
        (TextureType::Color3D, false) => Ok("sampler3D"),
        (TextureType::ColorCube, false) => Ok("samplerCube"),
        (TextureType::ColorArrayCube, false) => Ok("samplerCubeArray"),
        (TextureType::Color2DRect, false) => Ok("sampler2DRect"),
        (TextureType::Buffer, _) => Ok("samplerBuffer"),
        (TextureType::Color1D, true) => Ok("sampler1DShadow"),
        (TextureType::ColorArray1D, true) => Ok("sampler1DArrayShadow"),
        (TextureType::Color2D, true) => Ok("sampler2DShadow"),
        (TextureType::ColorArray2D, true) => Ok("sampler2DArrayShadow"),
        (TextureType::ColorCube, true) => Ok("samplerCubeShadow"),
        (TextureType::ColorArrayCube, true) => Ok("samplerCubeArrayShadow"),
        (TextureType::Color2DRect, true) => Ok("sampler2DRectShadow"),
        (TextureType::Color3D, true) => Err(not_implemented!("Depth compare for 3D textures")),
    }
}

fn image_dimension(ty: TextureType) -> &'static str {
    match ty {
        TextureType::Color1D => "1D",
        TextureType::ColorArray1D => "1DArray",
        TextureType::Color2D => "2D",
        TextureType::ColorArray2D => "2DArray",
        TextureType::Color3D => "3D",
        TextureType::ColorCube => "Cube",
        TextureType::ColorArrayCube => "CubeArray",
        TextureType::Buffer => "Buffer",
        TextureType::Color2DRect => "2DRect",
    }
}

/// Signed formats use `iimage` types and everything else uses `uimage` types.
pub(super) fn is_signed_format(format: ImageFormat) -> bool {
    matches!(format, ImageFormat::R8Sint | ImageFormat::R16Sint)
}

fn format_qualifier(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Typeless => None,
        ImageFormat::R8Uint => Some("r8ui"),
        ImageFormat::R8Sint => Some("r8i"),
        ImageFormat::R16Uint => Some("r16ui"),
        ImageFormat::R16Sint => Some("r16i"),
        ImageFormat::R32Uint => Some("r32ui"),
        ImageFormat::R32G32Uint => Some("rg32ui"),
        ImageFormat::R32G32B32A32Uint => Some("rgba32ui"),
    }
}

fn image_declaration(
    out: &mut String,
    binding: u32,
    ty: TextureType,
    format: ImageFormat,
    is_read: bool,
    is_written: bool,
    name: &str,
) {
    let sign = if is_signed_format(format) { "i" } else { "u" };
    let format = format_qualifier(format)
        .map(|f| format!(", {f}"))
        .unwrap_or_default();
    let access = match (is_read, is_written) {
        (true, false) => "readonly ",
        (false, true) => "writeonly ",
        _ => "",
    };
    let _ = writeln!(
        out,
        "layout(binding = {binding}{format}) uniform {access}{sign}image{} {name};",
        image_dimension(ty)
    );
}

fn compare_operator(func: CompareFunction) -> Option<&'static str> {
    match func {
        CompareFunction::Never | CompareFunction::Always => None,
        CompareFunction::Less => Some("<"),
        CompareFunction::Equal => Some("=="),
        CompareFunction::LessThanEqual => Some("<="),
        CompareFunction::Greater => Some(">"),
        CompareFunction::NotEqual => Some("!="),
        CompareFunction::GreaterThanEqual => Some(">="),
    }
}

impl EmitContext<'_> {
    pub(super) fn prefix(&self) -> &'static str {
        stage_prefix(self.program.stage)
    }

    fn is_per_vertex_input_stage(&self) -> bool {
        matches!(
            self.program.stage,
            Stage::TessellationControl | Stage::TessellationEval | Stage::Geometry
        )
    }

    fn stores_layer_or_viewport(&self) -> bool {
        let info = &self.program.info;
        self.program.stage != Stage::Geometry
            && (info.stores_layer || info.stores_viewport_index)
            && self.profile.support_viewport_index_layer_non_geometry
    }

    /// Everything before the main function.
    pub(super) fn header(&self) -> String {
        let mut out = "#version 450\n".to_string();
        self.extensions(&mut out);
        self.layouts(&mut out);
        self.inputs(&mut out);
        self.outputs(&mut out);
        self.resources(&mut out);
        out.push('\n');
        out
    }

    fn extensions(&self, out: &mut String) {
        let info = &self.program.info;
        let mut enable = |name: &str| {
            let _ = writeln!(out, "#extension {name} : enable");
        };
        if info.uses_fp16 {
            enable("GL_NV_gpu_shader5");
        }
        if info.uses_int64 {
            enable("GL_ARB_gpu_shader_int64");
        }
        let uses_subgroups = info.uses_subgroup_vote
            || info.uses_subgroup_shuffles
            || info.uses_subgroup_mask
            || info.uses_subgroup_invocation_id;
        if uses_subgroups {
            enable("GL_KHR_shader_subgroup_basic");
        }
        if info.uses_subgroup_vote && self.profile.support_vote {
            enable("GL_KHR_shader_subgroup_vote");
        }
        if info.uses_subgroup_mask {
            enable("GL_KHR_shader_subgroup_ballot");
        }
        if info.uses_subgroup_shuffles {
            enable("GL_KHR_shader_subgroup_shuffle");
        }
        if info.uses_demote_to_helper_invocation && self.profile.support_demote_to_helper_invocation
        {
            enable("GL_EXT_demote_to_helper_invocation");
        }
        if self.stores_layer_or_viewport() {
            enable("GL_ARB_shader_viewport_layer_array");
        }
        if info.uses_typeless_image_reads && self.profile.support_typeless_image_loads {
            enable("GL_EXT_shader_image_load_formatted");
        }
        if info.uses_shadow_lod && self.program.stage != Stage::Fragment {
            enable("GL_EXT_texture_shadow_lod");
        }
        if info.uses_sparse_residency && self.profile.support_gl_sparse_textures {
            enable("GL_ARB_sparse_texture2");
        }
    }

    fn layouts(&self, out: &mut String) {
        let program = self.program;
        match program.stage {
            Stage::Compute => {
                let [x, y, z] = program.workgroup_size;
                let _ = writeln!(
                    out,
                    "layout(local_size_x = {x}, local_size_y = {y}, local_size_z = {z}) in;"
                );
            }
            Stage::Geometry => {
                let input = match self.runtime_info.input_topology {
                    InputTopology::Points => "points",
                    InputTopology::Lines => "lines",
                    InputTopology::LinesAdjacency => "lines_adjacency",
                    InputTopology::Triangles => "triangles",
                    InputTopology::TrianglesAdjacency => "triangles_adjacency",
                };
                let _ = writeln!(out, "layout({input}) in;");
                if program.invocations > 1 {
                    let _ = writeln!(out, "layout(invocations = {}) in;", program.invocations);
                }
                let output = match program.output_topology {
                    Some(OutputTopology::PointList) => "points",
                    Some(OutputTopology::LineStrip) => "line_strip",
                    Some(OutputTopology::TriangleStrip) | None => "triangle_strip",
                };
                let _ = writeln!(
                    out,
                    "layout({output}, max_vertices = {}) out;",
                    program.output_vertices.max(1)
                );
            }
            Stage::TessellationControl => {
                let _ = writeln!(out, "layout(vertices = {}) out;", program.invocations);
            }
            Stage::TessellationEval => {
                let primitive = match self.runtime_info.tess_primitive {
                    TessPrimitive::Isolines => "isolines",
                    TessPrimitive::Triangles => "triangles",
                    TessPrimitive::Quads => "quads",
                };
                let spacing = match self.runtime_info.tess_spacing {
                    TessSpacing::Equal => "equal_spacing",
                    TessSpacing::FractionalOdd => "fractional_odd_spacing",
                    TessSpacing::FractionalEven => "fractional_even_spacing",
                };
                let winding = if self.runtime_info.tess_clockwise { "cw" } else { "ccw" };
                let _ = writeln!(out, "layout({primitive}, {spacing}, {winding}) in;");
            }
            Stage::Fragment => {
                if self.runtime_info.force_early_z {
                    let _ = writeln!(out, "layout(early_fragment_tests) in;");
                }
                if self.profile.lower_left_origin_mode && program.info.loads_position {
                    let _ = writeln!(out, "layout(origin_upper_left) in vec4 gl_FragCoord;");
                }
            }
            Stage::VertexA | Stage::VertexB => (),
        }
    }

    fn inputs(&self, out: &mut String) {
        let info = &self.program.info;
        if self.program.stage == Stage::Compute {
            return;
        }
        let array = if self.is_per_vertex_input_stage() { "[]" } else { "" };
        for (i, input) in info.input_generics.iter().enumerate() {
            if !input.used {
                continue;
            }
            let interpolation = match (self.program.stage, input.interpolation) {
                (Stage::Fragment, Interpolation::Flat) => "flat ",
                (Stage::Fragment, Interpolation::NoPerspective) => "noperspective ",
                _ => "",
            };
            let _ = writeln!(
                out,
                "layout(location = {i}) {interpolation}in vec4 in_attr{i}{array};"
            );
        }
        if self.program.stage == Stage::TessellationEval {
            for (i, used) in info.uses_patches.iter().enumerate() {
                if *used {
                    let _ = writeln!(out, "layout(location = {i}) patch in vec4 patch{i};");
                }
            }
        }
    }

    fn outputs(&self, out: &mut String) {
        let info = &self.program.info;
        match self.program.stage {
            Stage::Compute => (),
            Stage::Fragment => {
                for (i, stored) in info.stores_frag_color.iter().enumerate() {
                    if *stored || self.profile.need_declared_frag_colors {
                        let _ = writeln!(out, "layout(location = {i}) out vec4 frag_color{i};");
                    }
                }
            }
            stage => {
                let array = if stage == Stage::TessellationControl { "[]" } else { "" };
                for (i, stored) in info.stores_generics.iter().enumerate() {
                    if *stored {
                        let _ = writeln!(out, "layout(location = {i}) out vec4 out_attr{i}{array};");
                    }
                }
                if stage == Stage::TessellationControl {
                    for (i, used) in info.uses_patches.iter().enumerate() {
                        if *used {
                            let _ = writeln!(out, "layout(location = {i}) patch out vec4 patch{i};");
                        }
                    }
                }
                if info.stores_clip_distances != 0 {
                    let _ = writeln!(
                        out,
                        "out float gl_ClipDistance[{}];",
                        crate::ir::Attribute::NUM_CLIP_DISTANCES
                    );
                }
            }
        }
    }

    fn resources(&self, out: &mut String) {
        let program = self.program;
        let info = &program.info;
        let p = self.prefix();

        for (desc, binding) in info
            .constant_buffer_descriptors
            .iter()
            .zip(&self.bindings.uniform_buffers)
        {
            let i = desc.index;
            let _ = writeln!(
                out,
                "layout(std140, binding = {binding}) uniform {p}_cbuf_block{i} {{\n    uvec4 {p}_cbuf{i}[{CBUF_ELEMENTS}];\n}};"
            );
        }
        for (i, (desc, binding)) in info
            .storage_buffers_descriptors
            .iter()
            .zip(&self.bindings.storage_buffers)
            .enumerate()
        {
            let access = if desc.is_written { "" } else { "readonly " };
            let _ = writeln!(
                out,
                "layout(std430, binding = {binding}) {access}buffer {p}_ssbo_block{i} {{\n    uint {p}_ssbo{i}[];\n}};"
            );
        }
        for (i, binding) in self.bindings.texture_buffers.iter().enumerate() {
            let _ = writeln!(
                out,
                "layout(binding = {binding}) uniform samplerBuffer {p}_texbuf{i};"
            );
        }
        for (i, (desc, binding)) in info
            .image_buffer_descriptors
            .iter()
            .zip(&self.bindings.image_buffers)
            .enumerate()
        {
            image_declaration(
                out,
                *binding,
                TextureType::Buffer,
                desc.format,
                desc.is_read,
                desc.is_written,
                &format!("{p}_imgbuf{i}"),
            );
        }
        for (i, (desc, binding)) in info
            .texture_descriptors
            .iter()
            .zip(&self.bindings.textures)
            .enumerate()
        {
            match sampler_type(desc.texture_type, desc.is_depth) {
                Ok(sampler) => {
                    let _ = writeln!(out, "layout(binding = {binding}) uniform {sampler} {p}_tex{i};");
                }
                // Instructions using the texture fail with the same error.
                Err(e) => warn!("Skipped texture {i}: {e}"),
            }
        }
        for (i, (desc, binding)) in info
            .image_descriptors
            .iter()
            .zip(&self.bindings.images)
            .enumerate()
        {
            image_declaration(
                out,
                *binding,
                desc.texture_type,
                desc.format,
                desc.is_read,
                desc.is_written,
                &format!("{p}_img{i}"),
            );
        }

        if info.uses_shared_memory {
            let words = program.shared_memory_size.div_ceil(4).max(1);
            let _ = writeln!(out, "shared uint smem[{words}];");
        }
    }

    /// Declarations inside the main function.
    pub(super) fn local_declarations(&self) -> String {
        let program = self.program;
        if program.info.uses_local_memory || program.local_memory_size > 0 {
            let words = program.local_memory_size.div_ceil(4).max(1);
            format!("    uint lmem[{words}];\n")
        } else {
            String::new()
        }
    }

    /// Default values for outputs the program may only partially write.
    pub(super) fn emit_prologue(&mut self) -> Result<(), CompileError> {
        let program = self.program;
        let stage = program.stage;
        if matches!(
            stage,
            Stage::Fragment | Stage::Compute | Stage::TessellationControl
        ) {
            return Ok(());
        }
        let info = &program.info;
        if info.stores_position {
            self.line("gl_Position = vec4(0.0, 0.0, 0.0, 1.0);");
        }
        for i in 0..NUM_GENERICS {
            if info.stores_generics[i] {
                self.line(format_args!("out_attr{i} = vec4(0.0, 0.0, 0.0, 1.0);"));
            }
        }
        Ok(())
    }

    pub(super) fn emit_epilogue(&mut self) -> Result<(), CompileError> {
        match self.program.stage {
            Stage::Fragment => {
                if let Some(func) = self.runtime_info.alpha_test_func {
                    if !self.program.info.stores_frag_color[0] {
                        return Ok(());
                    }
                    match func {
                        CompareFunction::Always => (),
                        CompareFunction::Never => self.line("discard;"),
                        func => {
                            let reference = super::f32_literal(self.runtime_info.alpha_test_reference);
                            if let Some(op) = compare_operator(func) {
                                self.line(format_args!(
                                    "if (!(frag_color0.a {op} {reference})) {{ discard; }}"
                                ));
                            }
                        }
                    }
                }
            }
            Stage::Compute => (),
            _ => {
                if let Some(size) = self.runtime_info.fixed_state_point_size {
                    let size = super::f32_literal(size);
                    self.line(format_args!("gl_PointSize = {size};"));
                }
            }
        }
        Ok(())
    }

    /// The name of a generic patch vector.
    pub(super) fn patch_name(&self, patch: Patch) -> Option<String> {
        patch.generic_index().map(|i| format!("patch{i}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::glsl::emit_glsl;
    use crate::backend::glsl::tests::single_block;
    use crate::backend::Bindings;
    use crate::ir::{
        ConstantBufferDescriptor, ImageDescriptor, IrEmitter, StorageBufferDescriptor,
        TextureDescriptor, Value,
    };
    use crate::profile::{Profile, RuntimeInfo};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn header(program: &crate::ir::Program, profile: &Profile, runtime_info: &RuntimeInfo) -> String {
        let source = emit_glsl(profile, runtime_info, program, &mut Bindings::default()).unwrap();
        let end = source.find("void main() {").unwrap();
        source[..end].to_string()
    }

    #[test]
    fn fragment_resources() {
        let (mut program, _) = single_block(Stage::Fragment);
        let info = &mut program.info;
        info.input_generics[0].used = true;
        info.input_generics[3].used = true;
        info.input_generics[3].interpolation = Interpolation::Flat;
        info.stores_frag_color[0] = true;
        info.constant_buffer_descriptors = vec![ConstantBufferDescriptor { index: 3, count: 1 }];
        info.storage_buffers_descriptors = vec![StorageBufferDescriptor {
            cbuf_index: 0,
            cbuf_offset: 0x110,
            count: 1,
            is_written: false,
        }];
        info.texture_descriptors = vec![
            TextureDescriptor {
                texture_type: TextureType::Color2D,
                is_depth: false,
                cbuf_index: 2,
                cbuf_offset: 0x20,
                count: 1,
            },
            TextureDescriptor {
                texture_type: TextureType::ColorArray2D,
                is_depth: true,
                cbuf_index: 2,
                cbuf_offset: 0x24,
                count: 1,
            },
        ];

        assert_eq!(
            indoc! {"
                #version 450
                layout(location = 0) in vec4 in_attr0;
                layout(location = 3) flat in vec4 in_attr3;
                layout(location = 0) out vec4 frag_color0;
                layout(std140, binding = 0) uniform fs_cbuf_block3 {
                    uvec4 fs_cbuf3[4096];
                };
                layout(std430, binding = 0) readonly buffer fs_ssbo_block0 {
                    uint fs_ssbo0[];
                };
                layout(binding = 0) uniform sampler2D fs_tex0;
                layout(binding = 1) uniform sampler2DArrayShadow fs_tex1;

            "},
            header(&program, &Profile::default(), &RuntimeInfo::default())
        );
    }

    #[test]
    fn compute_layout_and_images() {
        let (mut program, _) = single_block(Stage::Compute);
        program.workgroup_size = [8, 4, 1];
        program.shared_memory_size = 0x100;
        let info = &mut program.info;
        info.uses_shared_memory = true;
        info.uses_subgroup_shuffles = true;
        info.image_descriptors = vec![ImageDescriptor {
            texture_type: TextureType::Color2D,
            format: ImageFormat::R32Uint,
            is_written: true,
            is_read: false,
            cbuf_index: 1,
            cbuf_offset: 0x40,
            count: 1,
        }];

        assert_eq!(
            indoc! {"
                #version 450
                #extension GL_KHR_shader_subgroup_basic : enable
                #extension GL_KHR_shader_subgroup_shuffle : enable
                layout(local_size_x = 8, local_size_y = 4, local_size_z = 1) in;
                layout(binding = 0, r32ui) uniform writeonly uimage2D cs_img0;
                shared uint smem[64];

            "},
            header(&program, &Profile::default(), &RuntimeInfo::default())
        );
    }

    #[test]
    fn geometry_layouts() {
        let (mut program, _) = single_block(Stage::Geometry);
        program.invocations = 2;
        program.output_topology = Some(OutputTopology::TriangleStrip);
        program.output_vertices = 3;
        program.info.input_generics[1].used = true;
        program.info.stores_generics[1] = true;
        let runtime_info = RuntimeInfo {
            input_topology: InputTopology::Triangles,
            ..Default::default()
        };

        assert_eq!(
            indoc! {"
                #version 450
                layout(triangles) in;
                layout(invocations = 2) in;
                layout(triangle_strip, max_vertices = 3) out;
                layout(location = 1) in vec4 in_attr1[];
                layout(location = 1) out vec4 out_attr1;

            "},
            header(&program, &Profile::default(), &runtime_info)
        );
    }

    #[test]
    fn vertex_prologue_and_point_size() {
        let (mut program, block) = single_block(Stage::VertexB);
        program.info.stores_position = true;
        program.info.stores_generics[2] = true;
        let mut ir = IrEmitter::new(&mut program.pool, block);
        ir.prologue();
        ir.set_attribute(crate::ir::Attribute::POSITION_X, Value::F32(0.5), Value::U32(0));
        ir.epilogue();

        let runtime_info = RuntimeInfo {
            fixed_state_point_size: Some(2.0),
            ..Default::default()
        };
        let source = emit_glsl(
            &Profile::default(),
            &runtime_info,
            &program,
            &mut Bindings::default(),
        )
        .unwrap();
        assert_eq!(
            indoc! {"
                gl_Position = vec4(0.0, 0.0, 0.0, 1.0);
                out_attr2 = vec4(0.0, 0.0, 0.0, 1.0);
                gl_Position.x = 0.5;
                gl_PointSize = 2.0;
                return;
            "},
            crate::backend::glsl::tests::body(&source)
        );
    }

    #[test]
    fn alpha_test_discards() {
        let (mut program, block) = single_block(Stage::Fragment);
        program.info.stores_frag_color[0] = true;
        let mut ir = IrEmitter::new(&mut program.pool, block);
        ir.set_frag_color(0, 3, Value::F32(0.25));
        ir.epilogue();

        let runtime_info = RuntimeInfo {
            alpha_test_func: Some(CompareFunction::GreaterThanEqual),
            alpha_test_reference: 0.5,
            ..Default::default()
        };
        let source = emit_glsl(
            &Profile::default(),
            &runtime_info,
            &program,
            &mut Bindings::default(),
        )
        .unwrap();
        assert_eq!(
            indoc! {"
                frag_color0.w = 0.25;
                if (!(frag_color0.a >= 0.5)) { discard; }
                return;
            "},
            crate::backend::glsl::tests::body(&source)
        );
    }
}
