use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadFileError {
    #[error("error reading data: {0}")]
    Io(#[from] std::io::Error),

    #[error("error reading data: {0}")]
    Binrw(#[from] binrw::Error),
}

#[derive(Debug, Error)]
pub enum LoadPipelineCacheError {
    #[error("error reading pipeline cache file")]
    Read(#[source] ReadFileError),

    #[error("pipeline cache version {version} does not match expected version {expected}")]
    Version { version: u32, expected: u32 },

    #[error("pipeline cache key has {actual} bytes but expected {expected} bytes")]
    KeySize { actual: usize, expected: usize },
}

impl From<binrw::Error> for LoadPipelineCacheError {
    fn from(value: binrw::Error) -> Self {
        Self::Read(ReadFileError::Binrw(value))
    }
}

impl From<std::io::Error> for LoadPipelineCacheError {
    fn from(value: std::io::Error) -> Self {
        Self::Read(ReadFileError::Io(value))
    }
}
