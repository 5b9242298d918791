//! The 0x50 byte shader program header (SPH) at the start of each Maxwell shader program.
//!
//! The first 20 bytes are common to all stages.
//! The remaining 60 bytes describe the input and output maps
//! and are interpreted differently for pixel shaders.
use bilge::prelude::*;
use binrw::{BinRead, BinResult, BinWrite};

/// The size of [ProgramHeader] in bytes.
pub const PROGRAM_HEADER_SIZE: usize = 0x50;

/// The number of generic attribute vectors available to each stage.
pub const NUM_GENERICS: usize = 32;

#[derive(Debug, BinRead, BinWrite, PartialEq, Eq, Clone, Copy)]
pub struct ProgramHeader {
    pub common0: Common0,
    pub common1: Common1,
    pub common2: Common2,
    pub common3: Common3,
    pub common4: Common4,
    /// The input and output maps. See [ProgramHeader::vtg] and [ProgramHeader::ps].
    pub maps: [u8; 60],
}

#[bitsize(32)]
#[derive(DebugBits, FromBits, BinRead, BinWrite, Clone, Copy, PartialEq, Eq)]
#[br(map = u32::into)]
#[bw(map = |&x| u32::from(x))]
pub struct Common0 {
    /// 1 for VTG stages and 2 for pixel shaders.
    pub sph_type: u5,
    pub version: u5,
    /// See [ShaderType].
    pub shader_type: u4,
    pub mrt_enable: bool,
    pub kills_pixels: bool,
    pub does_global_store: bool,
    pub sass_version: u4,
    pub unk1: u5,
    pub does_load_or_store: bool,
    pub does_fp64: bool,
    pub stream_out_mask: u4,
}

#[bitsize(32)]
#[derive(DebugBits, FromBits, BinRead, BinWrite, Clone, Copy, PartialEq, Eq)]
#[br(map = u32::into)]
#[bw(map = |&x| u32::from(x))]
pub struct Common1 {
    pub shader_local_memory_low_size: u24,
    pub per_patch_attribute_count: u8,
}

#[bitsize(32)]
#[derive(DebugBits, FromBits, BinRead, BinWrite, Clone, Copy, PartialEq, Eq)]
#[br(map = u32::into)]
#[bw(map = |&x| u32::from(x))]
pub struct Common2 {
    pub shader_local_memory_high_size: u24,
    pub threads_per_input_primitive: u8,
}

#[bitsize(32)]
#[derive(DebugBits, FromBits, BinRead, BinWrite, Clone, Copy, PartialEq, Eq)]
#[br(map = u32::into)]
#[bw(map = |&x| u32::from(x))]
pub struct Common3 {
    pub shader_local_memory_crs_size: u24,
    /// See [OutputTopology].
    pub output_topology: u4,
    pub unk1: u4,
}

#[bitsize(32)]
#[derive(DebugBits, FromBits, BinRead, BinWrite, Clone, Copy, PartialEq, Eq)]
#[br(map = u32::into)]
#[bw(map = |&x| u32::from(x))]
pub struct Common4 {
    pub max_output_vertices: u12,
    pub store_req_start: u8,
    pub unk1: u4,
    pub store_req_end: u8,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ShaderType {
    Vertex = 1,
    TessellationInit = 2,
    Tessellation = 3,
    Geometry = 4,
    Pixel = 5,
}

impl TryFrom<u8> for ShaderType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Vertex),
            2 => Ok(Self::TessellationInit),
            3 => Ok(Self::Tessellation),
            4 => Ok(Self::Geometry),
            5 => Ok(Self::Pixel),
            _ => Err(value),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OutputTopology {
    PointList = 1,
    LineStrip = 6,
    TriangleStrip = 7,
}

impl TryFrom<u8> for OutputTopology {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::PointList),
            6 => Ok(Self::LineStrip),
            7 => Ok(Self::TriangleStrip),
            _ => Err(value),
        }
    }
}

/// The maps for vertex, tessellation and geometry programs.
#[derive(Debug, BinRead, BinWrite, PartialEq, Eq, Clone)]
pub struct VtgHeader {
    pub imap_systemvalues_a: [u8; 3],
    pub imap_systemvalues_b: SystemValuesB,
    /// 4 bits for each of the [NUM_GENERICS] generic attributes.
    pub imap_generic_vector: [u8; 16],
    pub imap_color: u16,
    pub imap_systemvalues_c: SystemValuesC,
    pub imap_fixed_fnc_texture: [u8; 5],
    pub imap_unk: u8,

    pub omap_systemvalues_a: [u8; 3],
    pub omap_systemvalues_b: SystemValuesB,
    pub omap_generic_vector: [u8; 16],
    pub omap_color: u16,
    pub omap_systemvalues_c: SystemValuesC,
    pub omap_fixed_fnc_texture: [u8; 5],
    pub omap_unk: u8,
}

#[bitsize(8)]
#[derive(DebugBits, FromBits, BinRead, BinWrite, Clone, Copy, PartialEq, Eq)]
#[br(map = u8::into)]
#[bw(map = |&x| u8::from(x))]
pub struct SystemValuesB {
    pub primitive_array_id: bool,
    pub rt_array_index: bool,
    pub viewport_index: bool,
    pub point_size: bool,
    pub position_x: bool,
    pub position_y: bool,
    pub position_z: bool,
    pub position_w: bool,
}

#[bitsize(16)]
#[derive(DebugBits, FromBits, BinRead, BinWrite, Clone, Copy, PartialEq, Eq)]
#[br(map = u16::into)]
#[bw(map = |&x| u16::from(x))]
pub struct SystemValuesC {
    pub clip_distances: u8,
    pub point_sprite_s: bool,
    pub point_sprite_t: bool,
    pub fog_coordinate: bool,
    pub unk1: bool,
    pub tessellation_eval_point_u: bool,
    pub tessellation_eval_point_v: bool,
    pub instance_id: bool,
    pub vertex_id: bool,
}

/// The maps for pixel programs.
#[derive(Debug, BinRead, BinWrite, PartialEq, Eq, Clone)]
pub struct PixelHeader {
    pub imap_systemvalues_a: [u8; 3],
    pub imap_systemvalues_b: u8,
    pub imap_generic_vector: [PixelImapVector; NUM_GENERICS],
    pub imap_color: u16,
    pub imap_systemvalues_c: u16,
    pub imap_fixed_fnc_texture: [u8; 10],
    pub imap_unk: u16,
    /// 4 component bits for each of the 8 render targets.
    pub omap_target: u32,
    pub omap: PixelOmap,
}

/// How each component of a generic input is interpolated.
#[bitsize(8)]
#[derive(DebugBits, FromBits, BinRead, BinWrite, Clone, Copy, PartialEq, Eq)]
#[br(map = u8::into)]
#[bw(map = |&x| u8::from(x))]
pub struct PixelImapVector {
    pub x: PixelImap,
    pub y: PixelImap,
    pub z: PixelImap,
    pub w: PixelImap,
}

#[bitsize(2)]
#[derive(Debug, FromBits, PartialEq, Eq, Clone, Copy)]
pub enum PixelImap {
    Unused = 0,
    Constant = 1,
    Perspective = 2,
    ScreenLinear = 3,
}

#[bitsize(32)]
#[derive(DebugBits, FromBits, BinRead, BinWrite, Clone, Copy, PartialEq, Eq)]
#[br(map = u32::into)]
#[bw(map = |&x| u32::from(x))]
pub struct PixelOmap {
    pub sample_mask: bool,
    pub depth: bool,
    pub unk1: u30,
}

impl ProgramHeader {
    /// Read the header from the first [PROGRAM_HEADER_SIZE] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> BinResult<Self> {
        crate::read_le(bytes)
    }

    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        crate::write_le(self)
    }

    /// Read the header from the first 10 instruction words of a program.
    pub fn from_words(words: &[u64]) -> BinResult<Self> {
        let bytes: Vec<u8> = words
            .iter()
            .take(PROGRAM_HEADER_SIZE / 8)
            .flat_map(|w| w.to_le_bytes())
            .collect();
        Self::from_bytes(&bytes)
    }

    pub fn shader_type(&self) -> Option<ShaderType> {
        u8::from(self.common0.shader_type()).try_into().ok()
    }

    pub fn output_topology(&self) -> Option<OutputTopology> {
        u8::from(self.common3.output_topology()).try_into().ok()
    }

    /// The local memory size in bytes combining the low and high size fields.
    pub fn local_memory_size(&self) -> u64 {
        u64::from(u32::from(self.common1.shader_local_memory_low_size()))
            | (u64::from(u32::from(self.common2.shader_local_memory_high_size())) << 24)
    }

    /// The maps for vertex, tessellation and geometry stages.
    pub fn vtg(&self) -> BinResult<VtgHeader> {
        crate::read_le(&self.maps)
    }

    /// The maps for pixel shaders.
    pub fn ps(&self) -> BinResult<PixelHeader> {
        crate::read_le(&self.maps)
    }
}

impl VtgHeader {
    fn generic_bits(map: &[u8; 16], index: usize) -> u8 {
        let byte = map[index / 2];
        if index % 2 == 0 {
            byte & 0xF
        } else {
            byte >> 4
        }
    }

    /// Returns `true` if any component of the generic input at `index` is used.
    pub fn is_input_generic_used(&self, index: usize) -> bool {
        Self::generic_bits(&self.imap_generic_vector, index) != 0
    }

    pub fn is_input_generic_component_used(&self, index: usize, component: usize) -> bool {
        (Self::generic_bits(&self.imap_generic_vector, index) >> component) & 1 != 0
    }

    /// Returns `true` if any component of the generic output at `index` is written.
    pub fn is_output_generic_used(&self, index: usize) -> bool {
        Self::generic_bits(&self.omap_generic_vector, index) != 0
    }

    pub fn is_output_generic_component_used(&self, index: usize, component: usize) -> bool {
        (Self::generic_bits(&self.omap_generic_vector, index) >> component) & 1 != 0
    }

    pub fn is_clip_distance_written(&self, index: usize) -> bool {
        (self.omap_systemvalues_c.clip_distances() >> index) & 1 != 0
    }
}

impl PixelHeader {
    pub fn is_input_generic_used(&self, index: usize) -> bool {
        let v = self.imap_generic_vector[index];
        [v.x(), v.y(), v.z(), v.w()]
            .iter()
            .any(|i| *i != PixelImap::Unused)
    }

    /// The interpolation mode of the first used component of the generic input at `index`.
    pub fn generic_input_map(&self, index: usize) -> PixelImap {
        let v = self.imap_generic_vector[index];
        [v.x(), v.y(), v.z(), v.w()]
            .into_iter()
            .find(|i| *i != PixelImap::Unused)
            .unwrap_or(PixelImap::Unused)
    }

    pub fn is_color_component_written(&self, render_target: usize, component: usize) -> bool {
        (self.omap_target >> (render_target * 4 + component)) & 1 != 0
    }

    pub fn is_render_target_written(&self, render_target: usize) -> bool {
        (self.omap_target >> (render_target * 4)) & 0xF != 0
    }
}
