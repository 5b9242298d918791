//! Shader environments reading programs directly from guest memory.
//!
//! Each environment records every value the translator reads,
//! so the program can be serialized to the disk cache and translated again later
//! without access to guest memory.
use std::sync::Arc;

use indexmap::IndexMap;
use log::warn;
use mxw_lib::environment::{CbufValue, EnvironmentBlob, TextureTypeEntry};
use mxw_lib::header::{ProgramHeader, PROGRAM_HEADER_SIZE};
use mxw_lib::{Stage, TextureType};
use mxw_shader::environment::Environment;
use mxw_shader::error::CompileError;
use mxw_shader::ir::MAX_CBUFS;

use crate::error::PipelineError;
use crate::state::{
    ComputeState, ConstBufferBinding, DescriptorTable, GraphicsState, PROGRAM_STAGES,
};

/// Branches to the current instruction mark the end of a program.
const SELF_BRANCH_A: u64 = 0xe2400fffff87000f;
const SELF_BRANCH_B: u64 = 0xe2400fffff07000f;

/// The maximum number of bytes scanned when searching for the end of a program.
pub const MAX_PROGRAM_SIZE: u32 = 0x100000;

/// The size in bytes of a texture header (TIC) entry.
const TIC_ENTRY_SIZE: u64 = 0x20;

/// Read access to the GPU address space.
pub trait GuestMemory: Send + Sync {
    fn read_u64(&self, address: u64) -> Option<u64>;

    fn read_u32(&self, address: u64) -> Option<u32>;
}

/// State shared by graphics and compute environments.
struct GenericEnvironment {
    memory: Arc<dyn GuestMemory>,
    program_base: u64,
    stage: Stage,
    start_address: u32,
    sph: ProgramHeader,
    texture_bound: u32,
    local_memory_size: u32,
    shared_memory_size: u32,
    workgroup_size: [u32; 3],
    tic: DescriptorTable,
    const_buffers: [ConstBufferBinding; MAX_CBUFS],

    /// Words read ahead of time for the address range starting at `cached_lowest`.
    code: Vec<u64>,
    cached_lowest: u32,
    read_lowest: u32,
    read_highest: u32,
    cbuf_values: IndexMap<(u32, u32), u32>,
    texture_types: IndexMap<u32, TextureType>,
    unique_hash: u64,
}

impl GenericEnvironment {
    /// Read the program from `cached_lowest` until the end of the program after `start_address`.
    fn analyze(&mut self, cached_lowest: u32) -> Result<(), PipelineError> {
        let size = self.find_size()?;
        let cached_highest = self.start_address + size;

        self.code = (cached_lowest..cached_highest)
            .step_by(8)
            .map(|address| self.read_word(address))
            .collect::<Result<_, _>>()?;
        self.cached_lowest = cached_lowest;
        self.unique_hash = mxw_lib::hash::hash_code(&self.code);
        Ok(())
    }

    fn find_size(&self) -> Result<u32, PipelineError> {
        // Scheduling words at the start of each 32 byte bundle are never branches.
        for offset in (8..MAX_PROGRAM_SIZE).step_by(8).filter(|o| o % 32 != 0) {
            let word = self.read_word(self.start_address + offset)?;
            if word == SELF_BRANCH_A || word == SELF_BRANCH_B {
                return Ok(offset + 8);
            }
        }
        Err(PipelineError::ProgramSize {
            address: self.program_base + u64::from(self.start_address),
            max_size: MAX_PROGRAM_SIZE,
        })
    }

    fn read_word(&self, address: u32) -> Result<u64, PipelineError> {
        let address = self.program_base + u64::from(address);
        self.memory
            .read_u64(address)
            .ok_or(PipelineError::GuestMemory { address })
    }

    fn cached_word(&self, address: u32) -> Option<u64> {
        let offset = address.checked_sub(self.cached_lowest)?;
        self.code.get(offset as usize / 8).copied()
    }

    fn read_instruction(&mut self, address: u32) -> Result<u64, CompileError> {
        self.read_lowest = self.read_lowest.min(address);
        self.read_highest = self.read_highest.max(address);
        match self.cached_word(address) {
            Some(word) => Ok(word),
            None => self.read_word(address).map_err(|e| {
                CompileError::Runtime(format!("Instruction read at {address:#x} failed: {e}"))
            }),
        }
    }

    fn read_cbuf_value(&mut self, index: u32, offset: u32) -> Result<u32, CompileError> {
        let binding = self
            .const_buffers
            .get(index as usize)
            .ok_or_else(|| CompileError::InvalidArgument(format!("Cbuf index {index}")))?;

        let value = if binding.enabled && offset.saturating_add(4) <= binding.size {
            let address = binding.address + u64::from(offset);
            self.memory.read_u32(address).ok_or_else(|| {
                CompileError::Runtime(format!("Cbuf read at {address:#x} failed"))
            })?
        } else {
            // Unbound buffers read as zero on hardware.
            0
        };
        self.cbuf_values.insert((index, offset), value);
        Ok(value)
    }

    fn read_texture_type(&mut self, handle: u32) -> Result<TextureType, CompileError> {
        let texture_type = texture_type(self.memory.as_ref(), &self.tic, handle)?;
        self.texture_types.insert(handle, texture_type);
        Ok(texture_type)
    }

    fn to_blob(&self) -> Result<EnvironmentBlob, PipelineError> {
        let cached_highest = self.cached_lowest + self.code.len() as u32 * 8;
        let lowest = self.read_lowest.min(self.cached_lowest);
        let highest = (self.read_highest + 8).max(cached_highest);

        let code = (lowest..highest)
            .step_by(8)
            .map(|address| match self.cached_word(address) {
                Some(word) => Ok(word),
                None => self.read_word(address),
            })
            .collect::<Result<_, _>>()?;

        Ok(EnvironmentBlob {
            stage: self.stage,
            start_address: self.start_address,
            read_lowest: lowest,
            texture_bound: self.texture_bound,
            local_memory_size: self.local_memory_size,
            shared_memory_size: self.shared_memory_size,
            workgroup_size: self.workgroup_size,
            sph: self.sph,
            code,
            cbuf_values: self
                .cbuf_values
                .iter()
                .map(|(&(index, offset), &value)| CbufValue {
                    index,
                    offset,
                    value,
                })
                .collect(),
            texture_types: self
                .texture_types
                .iter()
                .map(|(&handle, &texture_type)| TextureTypeEntry {
                    handle,
                    texture_type,
                })
                .collect(),
        })
    }
}

/// Decode the texture type from the texture header for `handle`.
fn texture_type(
    memory: &dyn GuestMemory,
    tic: &DescriptorTable,
    handle: u32,
) -> Result<TextureType, CompileError> {
    let index = handle & 0xfffff;
    if index > tic.limit {
        warn!("Texture handle {handle:#x} exceeds TIC limit {}", tic.limit);
    }
    let entry = tic.address + u64::from(index) * TIC_ENTRY_SIZE;
    let read = |offset: u64| {
        memory
            .read_u32(entry + offset)
            .ok_or_else(|| CompileError::Runtime(format!("TIC read at {entry:#x} failed")))
    };
    let word4 = read(0x10)?;
    let word5 = read(0x14)?;

    let normalized_coords = (word5 >> 31) & 1 != 0;
    match (word4 >> 23) & 0xf {
        0 => Ok(TextureType::Color1D),
        1 | 7 if normalized_coords => Ok(TextureType::Color2D),
        1 | 7 => Ok(TextureType::Color2DRect),
        2 => Ok(TextureType::Color3D),
        3 => Ok(TextureType::ColorCube),
        4 => Ok(TextureType::ColorArray1D),
        5 => Ok(TextureType::ColorArray2D),
        6 => Ok(TextureType::Buffer),
        8 => Ok(TextureType::ColorArrayCube),
        value => Err(CompileError::InvalidArgument(format!(
            "Invalid texture type {value} for handle {handle:#x}"
        ))),
    }
}

/// The environment for a program slot of the current graphics state.
pub struct GraphicsEnvironment {
    env: GenericEnvironment,
    /// The program slot in [GraphicsState::programs].
    pub index: usize,
}

impl GraphicsEnvironment {
    /// Read the header and code for program slot `index`.
    pub fn new(
        memory: Arc<dyn GuestMemory>,
        state: &GraphicsState,
        index: usize,
    ) -> Result<Self, PipelineError> {
        let stage = PROGRAM_STAGES[index];
        let offset = state.programs[index].offset;
        let header_address = state.program_base + u64::from(offset);
        let words = (0..PROGRAM_HEADER_SIZE as u64 / 8)
            .map(|i| {
                let address = header_address + i * 8;
                memory
                    .read_u64(address)
                    .ok_or(PipelineError::GuestMemory { address })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sph = ProgramHeader::from_words(&words)?;

        let stage_index = stage.graphics_index().unwrap_or_default();
        let local_memory_size =
            sph.local_memory_size() + u64::from(sph.common3.shader_local_memory_crs_size().value());
        let mut env = GenericEnvironment {
            memory,
            program_base: state.program_base,
            stage,
            start_address: offset + PROGRAM_HEADER_SIZE as u32,
            sph,
            texture_bound: state.texture_bound,
            local_memory_size: local_memory_size as u32,
            shared_memory_size: 0,
            workgroup_size: [0; 3],
            tic: state.tic,
            const_buffers: state.resources[stage_index].const_buffers,
            code: Vec::new(),
            cached_lowest: offset,
            read_lowest: u32::MAX,
            read_highest: 0,
            cbuf_values: IndexMap::new(),
            texture_types: IndexMap::new(),
            unique_hash: 0,
        };
        // The cached code includes the header to distinguish identical code with different headers.
        env.analyze(offset)?;
        Ok(Self { env, index })
    }

    pub fn unique_hash(&self) -> u64 {
        self.env.unique_hash
    }

    pub fn to_blob(&self) -> Result<EnvironmentBlob, PipelineError> {
        self.env.to_blob()
    }
}

/// The environment for the program of the current compute dispatch.
pub struct ComputeEnvironment {
    env: GenericEnvironment,
}

impl ComputeEnvironment {
    pub fn new(memory: Arc<dyn GuestMemory>, state: &ComputeState) -> Result<Self, PipelineError> {
        let mut env = GenericEnvironment {
            memory,
            program_base: state.program_base,
            stage: Stage::Compute,
            start_address: state.start_address,
            // Compute programs have no header.
            sph: ProgramHeader::from_bytes(&[0u8; PROGRAM_HEADER_SIZE])?,
            texture_bound: state.texture_bound,
            local_memory_size: state.local_memory_size,
            shared_memory_size: state.shared_memory_size,
            workgroup_size: state.workgroup_size,
            tic: state.tic,
            const_buffers: state.resources.const_buffers,
            code: Vec::new(),
            cached_lowest: state.start_address,
            read_lowest: u32::MAX,
            read_highest: 0,
            cbuf_values: IndexMap::new(),
            texture_types: IndexMap::new(),
            unique_hash: 0,
        };
        env.analyze(state.start_address)?;
        Ok(Self { env })
    }

    pub fn unique_hash(&self) -> u64 {
        self.env.unique_hash
    }

    pub fn to_blob(&self) -> Result<EnvironmentBlob, PipelineError> {
        self.env.to_blob()
    }
}

macro_rules! impl_environment {
    ($($ty:ty),*) => {
        $(
            impl Environment for $ty {
                fn read_instruction(&mut self, address: u32) -> Result<u64, CompileError> {
                    self.env.read_instruction(address)
                }

                fn read_cbuf_value(&mut self, index: u32, offset: u32) -> Result<u32, CompileError> {
                    self.env.read_cbuf_value(index, offset)
                }

                fn read_texture_type(&mut self, handle: u32) -> Result<TextureType, CompileError> {
                    self.env.read_texture_type(handle)
                }

                fn texture_bound_buffer(&self) -> u32 {
                    self.env.texture_bound
                }

                fn local_memory_size(&self) -> u32 {
                    self.env.local_memory_size
                }

                fn shared_memory_size(&self) -> u32 {
                    self.env.shared_memory_size
                }

                fn workgroup_size(&self) -> [u32; 3] {
                    self.env.workgroup_size
                }

                fn sph(&self) -> &ProgramHeader {
                    &self.env.sph
                }

                fn stage(&self) -> Stage {
                    self.env.stage
                }

                fn start_address(&self) -> u32 {
                    self.env.start_address
                }
            }
        )*
    };
}

impl_environment!(GraphicsEnvironment, ComputeEnvironment);

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    pub const SCHED_WORD: u64 = 0x001f8000fc0007e0;
    // MOV32I R0, 0x3f800000
    pub const MOV32I: u64 = 0x0103f80000070000;
    pub const EXIT: u64 = 0xe30000000007000f;

    /// Guest memory backed by a sparse map of 32-bit words.
    #[derive(Default)]
    pub struct TestMemory {
        pub words: BTreeMap<u64, u32>,
    }

    impl TestMemory {
        pub fn write_u64(&mut self, address: u64, value: u64) {
            self.words.insert(address, value as u32);
            self.words.insert(address + 4, (value >> 32) as u32);
        }

        pub fn write_u32(&mut self, address: u64, value: u32) {
            self.words.insert(address, value);
        }

        pub fn write_code(&mut self, address: u64, words: &[u64]) {
            for (i, word) in words.iter().enumerate() {
                self.write_u64(address + i as u64 * 8, *word);
            }
        }

        /// Write a compute program at `address` that ends with a self branch.
        pub fn write_program(&mut self, address: u64) {
            self.write_code(
                address,
                &[SCHED_WORD, MOV32I, EXIT, SELF_BRANCH_A, SCHED_WORD],
            );
        }
    }

    impl GuestMemory for TestMemory {
        fn read_u64(&self, address: u64) -> Option<u64> {
            let low = *self.words.get(&address)?;
            let high = *self.words.get(&(address + 4))?;
            Some(u64::from(low) | (u64::from(high) << 32))
        }

        fn read_u32(&self, address: u64) -> Option<u32> {
            self.words.get(&address).copied()
        }
    }

    fn compute_state() -> ComputeState {
        let mut state = ComputeState {
            program_base: 0x10000,
            start_address: 0x100,
            workgroup_size: [32, 1, 1],
            ..Default::default()
        };
        state.resources.const_buffers[0] = ConstBufferBinding {
            enabled: true,
            address: 0x20000,
            size: 0x100,
        };
        state.tic = DescriptorTable {
            address: 0x30000,
            limit: 4,
        };
        state
    }

    #[test]
    fn find_program_end() {
        let mut memory = TestMemory::default();
        memory.write_program(0x10100);
        let env = ComputeEnvironment::new(Arc::new(memory), &compute_state()).unwrap();
        assert_eq!(
            vec![SCHED_WORD, MOV32I, EXIT, SELF_BRANCH_A],
            env.env.code
        );
        assert_eq!(
            mxw_lib::hash::hash_code(&[SCHED_WORD, MOV32I, EXIT, SELF_BRANCH_A]),
            env.unique_hash()
        );
    }

    #[test]
    fn missing_program_end() {
        let mut memory = TestMemory::default();
        memory.write_code(0x10100, &[SCHED_WORD, MOV32I, EXIT]);
        let result = ComputeEnvironment::new(Arc::new(memory), &compute_state());
        assert!(matches!(
            result,
            Err(PipelineError::GuestMemory { address: 0x10118 })
        ));
    }

    #[test]
    fn record_cbuf_and_texture_reads() {
        let mut memory = TestMemory::default();
        memory.write_program(0x10100);
        memory.write_u32(0x20010, 0x1234);
        // TIC entry 2 is a cube map.
        memory.write_u32(0x30050, 3 << 23);
        memory.write_u32(0x30054, 1 << 31);

        let mut env = ComputeEnvironment::new(Arc::new(memory), &compute_state()).unwrap();
        assert_eq!(Ok(0x1234), env.read_cbuf_value(0, 0x10));
        // Unbound buffers read as zero.
        assert_eq!(Ok(0), env.read_cbuf_value(1, 0x10));
        assert_eq!(Ok(TextureType::ColorCube), env.read_texture_type(0x0010_0002));
        assert_eq!(Ok(MOV32I), env.read_instruction(0x108));

        let blob = env.to_blob().unwrap();
        assert_eq!(0x100, blob.read_lowest);
        assert_eq!(Some(MOV32I), blob.read_instruction(0x108));
        assert_eq!(Some(0x1234), blob.read_cbuf_value(0, 0x10));
        assert_eq!(Some(0), blob.read_cbuf_value(1, 0x10));
        assert_eq!(
            Some(TextureType::ColorCube),
            blob.read_texture_type(0x0010_0002)
        );
    }

    #[test]
    fn unnormalized_2d_textures_are_rect() {
        let mut memory = TestMemory::default();
        memory.write_u32(0x30010, 1 << 23);
        memory.write_u32(0x30014, 0);
        let tic = DescriptorTable {
            address: 0x30000,
            limit: 0,
        };
        assert_eq!(Ok(TextureType::Color2DRect), texture_type(&memory, &tic, 0));
    }

    #[test]
    fn graphics_program_after_header() {
        let mut memory = TestMemory::default();
        let mut header = [0u64; 10];
        // Render target 0 for the fragment output map.
        header[9] = 0xf;
        memory.write_code(0x10200, &header);
        memory.write_program(0x10250);

        let mut state = GraphicsState {
            program_base: 0x10000,
            ..Default::default()
        };
        state.programs[5].enabled = true;
        state.programs[5].offset = 0x200;

        let mut env = GraphicsEnvironment::new(Arc::new(memory), &state, 5).unwrap();
        assert_eq!(0x250, env.start_address());
        assert_eq!(Ok(SCHED_WORD), env.read_instruction(0x250));
        // The header words are part of the cached code.
        assert_eq!(14, env.env.code.len());
        assert_eq!(0x200, env.to_blob().unwrap().read_lowest);
    }
}
