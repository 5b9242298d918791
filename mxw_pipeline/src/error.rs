use mxw_lib::error::{LoadPipelineCacheError, ReadFileError};
use mxw_lib::Stage;
use mxw_shader::error::CompileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("error compiling {stage:?} program: {source}")]
    Compile {
        stage: Stage,
        #[source]
        source: CompileError,
    },

    #[error("error linking host program: {0}")]
    Link(String),

    #[error("error creating host context: {0}")]
    Context(String),

    #[error("failed to read guest memory at {address:#x}")]
    GuestMemory { address: u64 },

    #[error("program at {address:#x} has no end within {max_size:#x} bytes")]
    ProgramSize { address: u64, max_size: u32 },

    #[error("graphics pipeline has no vertex program")]
    MissingVertexProgram,

    #[error("error reading or writing binary data")]
    Binrw(#[from] binrw::Error),
}

/// Errors while loading pipelines from the disk cache.
#[derive(Debug, Error)]
pub enum LoadDiskCacheError {
    #[error("error reading pipeline cache file")]
    Read(#[from] ReadFileError),

    #[error("error reading pipeline cache record")]
    Record(#[from] LoadPipelineCacheError),

    #[error("compute pipeline record has no environment")]
    MissingEnvironment,

    #[error("error creating cache directory or compiler workers")]
    Io(#[from] std::io::Error),
}
