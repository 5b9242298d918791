use mxw_lib::environment::EnvironmentBlob;
use mxw_lib::header::ProgramHeader;
use mxw_lib::{Stage, TextureType};

use crate::error::CompileError;

/// Access to the guest state of a single shader program.
///
/// Addresses are byte offsets relative to the code base.
/// Scheduling words occur every 32 bytes starting at [Environment::start_address].
pub trait Environment {
    fn read_instruction(&mut self, address: u32) -> Result<u64, CompileError>;

    /// Read a 32-bit value from a constant buffer for resolving texture handles.
    fn read_cbuf_value(&mut self, index: u32, offset: u32) -> Result<u32, CompileError>;

    fn read_texture_type(&mut self, handle: u32) -> Result<TextureType, CompileError>;

    /// The constant buffer index containing bound texture handles.
    fn texture_bound_buffer(&self) -> u32;

    fn local_memory_size(&self) -> u32;

    fn shared_memory_size(&self) -> u32;

    fn workgroup_size(&self) -> [u32; 3];

    fn sph(&self) -> &ProgramHeader;

    fn stage(&self) -> Stage;

    /// The address of the first instruction bundle.
    fn start_address(&self) -> u32;
}

/// An environment replaying a serialized [EnvironmentBlob].
#[derive(Debug, Clone)]
pub struct FileEnvironment {
    blob: EnvironmentBlob,
}

impl FileEnvironment {
    pub fn new(blob: EnvironmentBlob) -> Self {
        Self { blob }
    }

    pub fn blob(&self) -> &EnvironmentBlob {
        &self.blob
    }
}

impl Environment for FileEnvironment {
    fn read_instruction(&mut self, address: u32) -> Result<u64, CompileError> {
        self.blob.read_instruction(address).ok_or_else(|| {
            CompileError::Runtime(format!(
                "Out of bounds instruction read at address {address:#x}"
            ))
        })
    }

    fn read_cbuf_value(&mut self, index: u32, offset: u32) -> Result<u32, CompileError> {
        self.blob.read_cbuf_value(index, offset).ok_or_else(|| {
            CompileError::Runtime(format!(
                "Uncached constant buffer value at index {index} offset {offset:#x}"
            ))
        })
    }

    fn read_texture_type(&mut self, handle: u32) -> Result<TextureType, CompileError> {
        self.blob.read_texture_type(handle).ok_or_else(|| {
            CompileError::Runtime(format!("Uncached texture type for handle {handle:#x}"))
        })
    }

    fn texture_bound_buffer(&self) -> u32 {
        self.blob.texture_bound
    }

    fn local_memory_size(&self) -> u32 {
        self.blob.local_memory_size
    }

    fn shared_memory_size(&self) -> u32 {
        self.blob.shared_memory_size
    }

    fn workgroup_size(&self) -> [u32; 3] {
        self.blob.workgroup_size
    }

    fn sph(&self) -> &ProgramHeader {
        &self.blob.sph
    }

    fn stage(&self) -> Stage {
        self.blob.stage
    }

    fn start_address(&self) -> u32 {
        self.blob.start_address
    }
}

/// A scheduling word with default stall counts.
#[cfg(test)]
pub(crate) const SCHED_WORD: u64 = 0x001f8000fc0007e0;

/// An environment starting at address 0 with a scheduling word before every 3 instructions.
#[cfg(test)]
pub(crate) fn test_environment(
    stage: Stage,
    sph: ProgramHeader,
    insns: &[u64],
) -> FileEnvironment {
    let code = insns
        .chunks(3)
        .flat_map(|bundle| std::iter::once(SCHED_WORD).chain(bundle.iter().copied()))
        .collect();
    FileEnvironment::new(EnvironmentBlob {
        stage,
        start_address: 0,
        read_lowest: 0,
        texture_bound: 1,
        local_memory_size: 0x100,
        shared_memory_size: 0x400,
        workgroup_size: [32, 1, 1],
        sph,
        code,
        cbuf_values: Vec::new(),
        texture_types: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn read_from_blob() {
        let sph = ProgramHeader::from_bytes(&[0u8; 0x50]).unwrap();
        let mut env = test_environment(Stage::Compute, sph, &[1, 2, 3, 4]);
        assert_eq!(Ok(SCHED_WORD), env.read_instruction(0));
        assert_eq!(Ok(3), env.read_instruction(0x18));
        assert_eq!(Ok(4), env.read_instruction(0x28));
        assert!(matches!(
            env.read_instruction(0x30),
            Err(CompileError::Runtime(_))
        ));
        assert!(env.read_cbuf_value(0, 0).is_err());
        assert_eq!([32, 1, 1], env.workgroup_size());
    }
}
