//! Translating, emitting and linking the programs of a pipeline.
use log::debug;
use mxw_lib::key::{
    ComputePipelineKey, GraphicsPipelineKey, TransformFeedbackState,
    MAX_TRANSFORM_FEEDBACK_VARYINGS,
};
use mxw_lib::Stage;
use mxw_shader::backend::Bindings;
use mxw_shader::environment::Environment;
use mxw_shader::error::CompileError;
use mxw_shader::frontend::{merge_dual_vertex_programs, translate_program};
use mxw_shader::ir::Program;
use mxw_shader::profile::{Profile, RuntimeInfo, TransformFeedbackVarying};
use mxw_shader::{emit_code, Backend};

use crate::device::{Device, StageCode};
use crate::error::PipelineError;
use crate::layout::StageLayout;
use crate::state::{tess_primitive, tess_spacing, PrimitiveTopology};

/// The number of scalar attributes addressable by transform feedback varyings.
const NUM_XFB_ATTRIBUTES: usize = 256;

/// A linked graphics pipeline and the resources used by each stage.
#[derive(Debug)]
pub struct GraphicsPipeline<P> {
    pub key: GraphicsPipelineKey,
    pub program: P,
    /// The layout for each active stage in pipeline order.
    /// Dual vertex programs are merged into a single stage.
    pub stages: Vec<StageLayout>,
}

#[derive(Debug)]
pub struct ComputePipeline<P> {
    pub key: ComputePipelineKey,
    pub program: P,
    pub layout: StageLayout,
}

/// Code generation settings shared by every pipeline in a cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    pub backend: Backend,
    pub profile: Profile,
}

fn compile_error(stage: Stage) -> impl Fn(CompileError) -> PipelineError {
    move |source| PipelineError::Compile { stage, source }
}

/// Build the graphics pipeline for `key` with one environment for each program slot.
///
/// Slots without an environment are disabled.
#[tracing::instrument(skip_all)]
pub fn build_graphics_pipeline<D: Device>(
    device: &D,
    context: &mut D::Context,
    options: &CompileOptions,
    key: &GraphicsPipelineKey,
    environments: &mut [Option<&mut dyn Environment>],
) -> Result<GraphicsPipeline<D::Program>, PipelineError> {
    let profile = &options.profile;

    let mut programs: Vec<Program> = Vec::new();
    let mut vertex_a = None;
    for env in environments.iter_mut().flatten() {
        let stage = env.stage();
        let program = translate_program(&mut **env, profile).map_err(compile_error(stage))?;
        match (stage, vertex_a.take()) {
            (Stage::VertexA, _) => vertex_a = Some(program),
            (Stage::VertexB, Some(a)) => {
                debug!("Merging dual vertex programs");
                let merged = merge_dual_vertex_programs(a, program, &mut **env)
                    .map_err(compile_error(stage))?;
                programs.push(merged);
            }
            _ => programs.push(program),
        }
    }
    if programs.first().map(|p| p.stage) != Some(Stage::VertexB) {
        return Err(PipelineError::MissingVertexProgram);
    }

    // Transform feedback captures the outputs of the last stage before rasterization.
    let last_vertex_stage = programs
        .iter()
        .rposition(|p| p.stage != Stage::Fragment)
        .unwrap_or_default();

    let unified = profile.unified_descriptor_binding;
    let mut bindings = Bindings::default();
    let mut stages = Vec::new();
    let mut layouts = Vec::new();
    for (i, program) in programs.iter().enumerate() {
        let previous = i.checked_sub(1).map(|p| &programs[p]);
        let runtime_info = runtime_info(key, previous, i == last_vertex_stage);

        let mut stage_bindings = bindings;
        let code = emit_code(
            options.backend,
            profile,
            &runtime_info,
            program,
            &mut bindings,
        )
        .map_err(compile_error(program.stage))?;

        layouts.push(StageLayout::new(
            program.stage,
            program.info.clone(),
            &mut stage_bindings,
            unified,
        ));
        stages.push(StageCode {
            stage: program.stage,
            code,
        });
    }

    let program = device.link_graphics(context, &stages)?;
    Ok(GraphicsPipeline {
        key: *key,
        program,
        stages: layouts,
    })
}

#[tracing::instrument(skip_all)]
pub fn build_compute_pipeline<D: Device>(
    device: &D,
    context: &mut D::Context,
    options: &CompileOptions,
    key: &ComputePipelineKey,
    env: &mut dyn Environment,
) -> Result<ComputePipeline<D::Program>, PipelineError> {
    let profile = &options.profile;
    let program = translate_program(env, profile).map_err(compile_error(Stage::Compute))?;

    let mut bindings = Bindings::default();
    let code = emit_code(
        options.backend,
        profile,
        &RuntimeInfo::default(),
        &program,
        &mut bindings,
    )
    .map_err(compile_error(Stage::Compute))?;

    let layout = StageLayout::new(
        Stage::Compute,
        program.info,
        &mut Bindings::default(),
        profile.unified_descriptor_binding,
    );
    let program = device.link_compute(
        context,
        &StageCode {
            stage: Stage::Compute,
            code,
        },
    )?;
    Ok(ComputePipeline {
        key: *key,
        program,
        layout,
    })
}

fn runtime_info(
    key: &GraphicsPipelineKey,
    previous: Option<&Program>,
    is_last_vertex_stage: bool,
) -> RuntimeInfo {
    let bits = key.bits();
    let topology =
        PrimitiveTopology::from_index(bits.gs_input_topology().value()).unwrap_or_default();

    let mut info = RuntimeInfo {
        previous_stage_stores: previous
            .map(|p| p.info.stores_generics)
            .unwrap_or_default(),
        input_topology: topology.input_topology(),
        tess_primitive: tess_primitive(bits.tessellation_primitive().value()),
        tess_spacing: tess_spacing(bits.tessellation_spacing().value()),
        tess_clockwise: bits.tessellation_clockwise(),
        force_early_z: bits.early_z(),
        ..Default::default()
    };
    if bits.xfb_enabled() && is_last_vertex_stage {
        info.xfb_varyings = xfb_varyings(&key.xfb_state);
    }
    info
}

/// The captured varying for each attribute index written by transform feedback.
///
/// Consecutive components of the same vector are captured as a single varying.
pub fn xfb_varyings(state: &TransformFeedbackState) -> Vec<Option<TransformFeedbackVarying>> {
    let mut varyings = vec![None; NUM_XFB_ATTRIBUTES];
    for (buffer, (layout, locations)) in state.layouts.iter().zip(&state.varyings).enumerate() {
        let count = (layout.varying_count as usize).min(MAX_TRANSFORM_FEEDBACK_VARYINGS);
        let mut i = 0;
        while i < count {
            let start = i;
            let location = usize::from(locations[i]);
            let mut components = 1;
            if location % 4 == 0 {
                while components < 4
                    && i + 1 < count
                    && usize::from(locations[i + 1]) == location + components
                {
                    i += 1;
                    components += 1;
                }
            }
            varyings[location] = Some(TransformFeedbackVarying {
                buffer: buffer as u32,
                stride: layout.stride,
                offset: start as u32 * 4,
                components: components as u32,
            });
            i += 1;
        }
    }
    varyings
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;
    use pretty_assertions::assert_eq;

    #[test]
    fn xfb_vectors_are_combined() {
        let mut state = TransformFeedbackState::zeroed();
        state.layouts[1].stride = 32;
        state.layouts[1].varying_count = 6;
        // Position and the x and y components of generic 0.
        state.varyings[1][..6].copy_from_slice(&[28, 29, 30, 31, 32, 33]);

        let varyings = xfb_varyings(&state);
        assert_eq!(
            Some(TransformFeedbackVarying {
                buffer: 1,
                stride: 32,
                offset: 0,
                components: 4
            }),
            varyings[28]
        );
        assert_eq!(
            Some(TransformFeedbackVarying {
                buffer: 1,
                stride: 32,
                offset: 16,
                components: 2
            }),
            varyings[32]
        );
        assert_eq!(None, varyings[29]);
        assert_eq!(2, varyings.iter().flatten().count());
    }

    #[test]
    fn xfb_unaligned_components() {
        let mut state = TransformFeedbackState::zeroed();
        state.layouts[0].stride = 8;
        state.layouts[0].varying_count = 2;
        state.varyings[0][..2].copy_from_slice(&[33, 34]);

        let varyings = xfb_varyings(&state);
        assert_eq!(Some(0), varyings[33].map(|v| v.offset));
        assert_eq!(Some(4), varyings[34].map(|v| v.offset));
        assert_eq!(Some(1), varyings[34].map(|v| v.components));
    }

    #[test]
    fn runtime_info_from_key() {
        let mut key = GraphicsPipelineKey::default();
        let mut bits = key.bits();
        bits.set_early_z(true);
        bits.set_gs_input_topology(bilge::prelude::u4::new(
            PrimitiveTopology::LinesAdjacency as u8,
        ));
        key.set_bits(bits);

        let mut previous = Program::new(Stage::VertexB);
        previous.info.stores_generics[3] = true;

        let info = runtime_info(&key, Some(&previous), true);
        assert!(info.force_early_z);
        assert!(info.previous_stage_stores[3]);
        assert_eq!(
            mxw_shader::profile::InputTopology::LinesAdjacency,
            info.input_topology
        );
        // Transform feedback is disabled.
        assert!(info.xfb_varyings.is_empty());
    }
}
