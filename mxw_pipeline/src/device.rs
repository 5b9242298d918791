use mxw_lib::Stage;
use mxw_shader::ShaderCode;

use crate::error::PipelineError;

/// The emitted code for a single pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageCode {
    pub stage: Stage,
    pub code: ShaderCode,
}

/// The host graphics API used to link emitted code into pipeline objects.
///
/// Host programs are tied to the context that created them,
/// so each compiler thread uses its own [Device::Context].
pub trait Device: Send + Sync + 'static {
    /// A host graphics context owned by a single thread.
    type Context: Send + 'static;
    /// A linked host program for all stages of a pipeline.
    type Program: Send + Sync + 'static;

    fn create_context(&self) -> Result<Self::Context, PipelineError>;

    /// Link the code for each active graphics stage in pipeline order.
    fn link_graphics(
        &self,
        context: &mut Self::Context,
        stages: &[StageCode],
    ) -> Result<Self::Program, PipelineError>;

    fn link_compute(
        &self,
        context: &mut Self::Context,
        stage: &StageCode,
    ) -> Result<Self::Program, PipelineError>;
}
