use std::fmt::Write;

use mxw_lib::header::{OutputTopology, NUM_GENERICS};
use mxw_lib::Stage;

use super::{f32_literal, EmitContext};
use crate::error::CompileError;
use crate::ir::Interpolation;
use crate::profile::{CompareFunction, InputTopology, TessPrimitive, TessSpacing};

fn program_type(stage: Stage) -> &'static str {
    match stage {
        Stage::VertexA | Stage::VertexB => "!!NVvp5.0",
        Stage::TessellationControl => "!!NVtcp5.0",
        Stage::TessellationEval => "!!NVtep5.0",
        Stage::Geometry => "!!NVgp5.0",
        Stage::Fragment => "!!NVfp5.0",
        Stage::Compute => "!!NVcp5.0",
    }
}

/// The comparison failing the alpha test.
fn alpha_test_fail(func: CompareFunction) -> Option<&'static str> {
    match func {
        CompareFunction::Never | CompareFunction::Always => None,
        CompareFunction::Less => Some("SGE"),
        CompareFunction::Equal => Some("SNE"),
        CompareFunction::LessThanEqual => Some("SGT"),
        CompareFunction::Greater => Some("SLE"),
        CompareFunction::NotEqual => Some("SEQ"),
        CompareFunction::GreaterThanEqual => Some("SLT"),
    }
}

impl EmitContext<'_> {
    /// Everything before the register declarations.
    pub(super) fn header(&self) -> String {
        let mut out = format!("{}\n", program_type(self.program.stage));
        self.options(&mut out);
        self.layouts(&mut out);
        self.attributes(&mut out);
        self.resources(&mut out);
        out
    }

    fn options(&self, out: &mut String) {
        let info = &self.program.info;
        let mut option = |name: &str| {
            let _ = writeln!(out, "OPTION {name};");
        };
        option("NV_internal");
        if info.uses_fp64 {
            option("NV_gpu_program_fp64");
        }
        if !info.storage_buffers_descriptors.is_empty() {
            option("NV_shader_storage_buffer");
        }
        if info.uses_subgroup_vote || info.uses_subgroup_mask || info.uses_subgroup_invocation_id
        {
            option("NV_shader_thread_group");
        }
        if self.program.stage != Stage::Geometry
            && (info.stores_layer || info.stores_viewport_index)
            && self.profile.support_viewport_index_layer_non_geometry
        {
            option("NV_viewport_array2");
        }
        if self.program.stage == Stage::Fragment && self.runtime_info.force_early_z {
            option("NV_early_fragment_tests");
        }
    }

    fn layouts(&self, out: &mut String) {
        let program = self.program;
        match program.stage {
            Stage::Compute => {
                let [x, y, z] = program.workgroup_size;
                let _ = writeln!(out, "GROUP_SIZE {x} {y} {z};");
                if program.info.uses_shared_memory {
                    let _ = writeln!(out, "SHARED_MEMORY {};", program.shared_memory_size);
                    let _ = writeln!(out, "SHARED shared_mem[]={{program.sharedmem}};");
                }
            }
            Stage::Geometry => {
                let input = match self.runtime_info.input_topology {
                    InputTopology::Points => "POINTS",
                    InputTopology::Lines => "LINES",
                    InputTopology::LinesAdjacency => "LINES_ADJACENCY",
                    InputTopology::Triangles => "TRIANGLES",
                    InputTopology::TrianglesAdjacency => "TRIANGLES_ADJACENCY",
                };
                let output = match program.output_topology {
                    Some(OutputTopology::PointList) => "POINTS",
                    Some(OutputTopology::LineStrip) => "LINE_STRIP",
                    Some(OutputTopology::TriangleStrip) | None => "TRIANGLE_STRIP",
                };
                let _ = writeln!(out, "PRIMITIVE_IN {input};");
                let _ = writeln!(out, "PRIMITIVE_OUT {output};");
                let _ = writeln!(out, "VERTICES_OUT {};", program.output_vertices.max(1));
                if program.invocations > 1 {
                    let _ = writeln!(out, "INVOCATIONS {};", program.invocations);
                }
            }
            Stage::TessellationControl => {
                let _ = writeln!(out, "VERTICES_OUT {};", program.invocations);
            }
            Stage::TessellationEval => {
                let mode = match self.runtime_info.tess_primitive {
                    TessPrimitive::Isolines => "ISOLINES",
                    TessPrimitive::Triangles => "TRIANGLES",
                    TessPrimitive::Quads => "QUADS",
                };
                let spacing = match self.runtime_info.tess_spacing {
                    TessSpacing::Equal => "EQUAL",
                    TessSpacing::FractionalOdd => "FRACTIONAL_ODD",
                    TessSpacing::FractionalEven => "FRACTIONAL_EVEN",
                };
                let order = if self.runtime_info.tess_clockwise { "CW" } else { "CCW" };
                let _ = writeln!(out, "TESS_MODE {mode};");
                let _ = writeln!(out, "TESS_SPACING {spacing};");
                let _ = writeln!(out, "TESS_VERTEX_ORDER {order};");
            }
            Stage::Fragment | Stage::VertexA | Stage::VertexB => (),
        }
    }

    fn attributes(&self, out: &mut String) {
        let info = &self.program.info;
        match self.program.stage {
            Stage::Compute => (),
            Stage::Fragment => {
                for (i, input) in info.input_generics.iter().enumerate() {
                    if !input.used {
                        continue;
                    }
                    let interpolation = match input.interpolation {
                        Interpolation::Flat => "FLAT ",
                        Interpolation::NoPerspective => "NOPERSPECTIVE ",
                        Interpolation::Smooth => "",
                    };
                    let _ = writeln!(out, "{interpolation}ATTRIB in_attr{i}=fragment.attrib[{i}];");
                }
                for (i, stored) in info.stores_frag_color.iter().enumerate() {
                    if *stored || self.profile.need_declared_frag_colors {
                        let _ = writeln!(out, "OUTPUT frag_color{i}=result.color[{i}];");
                    }
                }
            }
            _ => {
                for (i, stored) in info.stores_generics.iter().enumerate() {
                    if *stored {
                        let _ = writeln!(out, "OUTPUT out_attr{i}=result.attrib[{i}];");
                    }
                }
            }
        }
    }

    fn resources(&self, out: &mut String) {
        let info = &self.program.info;
        for (desc, binding) in info
            .constant_buffer_descriptors
            .iter()
            .zip(&self.bindings.uniform_buffers)
        {
            let _ = writeln!(
                out,
                "CBUFFER c{}[]={{program.buffer[{binding}]}};",
                desc.index
            );
        }
        for (i, binding) in self.bindings.storage_buffers.iter().enumerate() {
            let _ = writeln!(out, "STORAGE ssbo{i}[]={{program.storage[{binding}]}};");
        }
    }

    /// Declarations after the temporaries.
    pub(super) fn local_declarations(&self) -> String {
        let program = self.program;
        if program.info.uses_local_memory || program.local_memory_size > 0 {
            let words = program.local_memory_size.div_ceil(4).max(1);
            format!("TEMP lmem[{words}];\n")
        } else {
            String::new()
        }
    }

    pub(super) fn emit_prologue(&mut self) -> Result<(), CompileError> {
        let program = self.program;
        if matches!(
            program.stage,
            Stage::Fragment | Stage::Compute | Stage::TessellationControl
        ) {
            return Ok(());
        }
        let info = &program.info;
        if info.stores_position {
            self.line("MOV.F result.position,{0,0,0,1};");
        }
        for i in 0..NUM_GENERICS {
            if info.stores_generics[i] {
                self.line(format_args!("MOV.F out_attr{i},{{0,0,0,1}};"));
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
                    CompareFunction::Never => self.line("KIL TR.x;"),
                    func => {
                        if let Some(compare) = alpha_test_fail(func) {
                            let reference = f32_literal(self.runtime_info.alpha_test_reference);
                            self.line(format_args!(
                                "{compare}.F.CC RC.x,frag_color0.w,{reference};"
                            ));
                            self.line("KIL NE.x;");
                        }
                    }
                }
            }
            Stage::Compute => (),
            _ => {
                if let Some(size) = self.runtime_info.fixed_state_point_size {
                    let size = f32_literal(size);
                    self.line(format_args!("MOV.F result.pointsize.x,{size};"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::glasm::emit_glasm;
    use crate::backend::glasm::tests::{body, single_block};
    use crate::backend::Bindings;
    use crate::ir::{ConstantBufferDescriptor, IrEmitter, StorageBufferDescriptor, Value};
    use crate::profile::{Profile, RuntimeInfo};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn header(program: &crate::ir::Program, runtime_info: &RuntimeInfo) -> String {
        let source = emit_glasm(
            &Profile::default(),
            runtime_info,
            program,
            &mut Bindings::default(),
        )
        .unwrap();
        let end = source.find("TEMP RC;").unwrap();
        source[..end].to_string()
    }

    #[test]
    fn fragment_declarations() {
        let (mut program, _) = single_block(Stage::Fragment);
        let info = &mut program.info;
        info.input_generics[1].used = true;
        info.input_generics[1].interpolation = Interpolation::NoPerspective;
        info.stores_frag_color[0] = true;
        info.constant_buffer_descriptors = vec![ConstantBufferDescriptor { index: 2, count: 1 }];
        info.storage_buffers_descriptors = vec![StorageBufferDescriptor {
            cbuf_index: 0,
            cbuf_offset: 0x110,
            count: 1,
            is_written: false,
        }];

        assert_eq!(
            indoc! {"
                !!NVfp5.0
                OPTION NV_internal;
                OPTION NV_shader_storage_buffer;
                NOPERSPECTIVE ATTRIB in_attr1=fragment.attrib[1];
                OUTPUT frag_color0=result.color[0];
                CBUFFER c2[]={program.buffer[0]};
                STORAGE ssbo0[]={program.storage[0]};
            "},
            header(&program, &RuntimeInfo::default())
        );
    }

    #[test]
    fn tessellation_eval_layout() {
        let (program, _) = single_block(Stage::TessellationEval);
        let runtime_info = RuntimeInfo {
            tess_primitive: TessPrimitive::Quads,
            tess_spacing: TessSpacing::FractionalOdd,
            tess_clockwise: true,
            ..Default::default()
        };

        assert_eq!(
            indoc! {"
                !!NVtep5.0
                OPTION NV_internal;
                TESS_MODE QUADS;
                TESS_SPACING FRACTIONAL_ODD;
                TESS_VERTEX_ORDER CW;
            "},
            header(&program, &runtime_info)
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
        let source = emit_glasm(
            &Profile::default(),
            &runtime_info,
            &program,
            &mut Bindings::default(),
        )
        .unwrap();
        assert_eq!(
            indoc! {"
                MOV.F frag_color0.w,0.25;
                SLE.F.CC RC.x,frag_color0.w,0.5;
                KIL NE.x;
                RET;
            "},
            body(&source)
        );
    }
}
