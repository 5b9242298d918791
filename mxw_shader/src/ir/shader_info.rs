//! Usage flags and resource descriptors collected from a translated program.
use mxw_lib::header::NUM_GENERICS;
use mxw_lib::TextureType;
use serde::{Serialize, Serializer};

use super::attribute::Patch;
use super::types::Type;

/// The maximum number of constant buffers bound to a single stage.
pub const MAX_CBUFS: usize = 18;

/// The number of storage buffer slots in the driver constant buffer region.
pub const NUM_NVN_BUFFERS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Interpolation {
    #[default]
    Smooth,
    Flat,
    NoPerspective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct InputVarying {
    pub used: bool,
    pub interpolation: Interpolation,
}

/// The data format for typed image accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ImageFormat {
    #[default]
    Typeless = 0,
    R8Uint = 1,
    R8Sint = 2,
    R16Uint = 3,
    R16Sint = 4,
    R32Uint = 5,
    R32G32Uint = 6,
    R32G32B32A32Uint = 7,
}

impl ImageFormat {
    pub fn from_index(value: u8) -> Self {
        match value {
            1 => Self::R8Uint,
            2 => Self::R8Sint,
            3 => Self::R16Uint,
            4 => Self::R16Sint,
            5 => Self::R32Uint,
            6 => Self::R32G32Uint,
            7 => Self::R32G32B32A32Uint,
            _ => Self::Typeless,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConstantBufferDescriptor {
    pub index: u32,
    pub count: u32,
}

/// A storage buffer whose address and size are stored in a constant buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StorageBufferDescriptor {
    pub cbuf_index: u32,
    pub cbuf_offset: u32,
    pub count: u32,
    pub is_written: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TextureBufferDescriptor {
    pub cbuf_index: u32,
    pub cbuf_offset: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ImageBufferDescriptor {
    pub format: ImageFormat,
    pub is_written: bool,
    pub is_read: bool,
    pub cbuf_index: u32,
    pub cbuf_offset: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TextureDescriptor {
    #[serde(serialize_with = "serialize_texture_type")]
    pub texture_type: TextureType,
    pub is_depth: bool,
    pub cbuf_index: u32,
    pub cbuf_offset: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ImageDescriptor {
    #[serde(serialize_with = "serialize_texture_type")]
    pub texture_type: TextureType,
    pub format: ImageFormat,
    pub is_written: bool,
    pub is_read: bool,
    pub cbuf_index: u32,
    pub cbuf_offset: u32,
    pub count: u32,
}

/// Program usage information and resource descriptors.
///
/// Descriptor order is stable after the passes finish.
/// Backends and the pipeline cache assign bindings by index into each descriptor list.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Info {
    pub uses_workgroup_id: bool,
    pub uses_local_invocation_id: bool,
    pub uses_invocation_id: bool,
    pub uses_sample_id: bool,
    pub uses_is_helper_invocation: bool,
    pub uses_subgroup_invocation_id: bool,

    pub input_generics: [InputVarying; NUM_GENERICS],
    pub loads_position: bool,
    pub loads_primitive_id: bool,
    pub loads_instance_id: bool,
    pub loads_vertex_id: bool,
    pub loads_front_face: bool,
    pub loads_point_coord: bool,
    pub loads_tess_coord: bool,
    pub loads_layer: bool,
    pub loads_viewport_index: bool,
    pub loads_indexed_attributes: bool,

    pub stores_generics: [bool; NUM_GENERICS],
    pub stores_position: bool,
    pub stores_point_size: bool,
    pub stores_layer: bool,
    pub stores_viewport_index: bool,
    /// A bit for each written clip distance.
    pub stores_clip_distances: u8,
    pub stores_indexed_attributes: bool,
    pub stores_frag_color: [bool; 8],
    pub stores_sample_mask: bool,
    pub stores_frag_depth: bool,

    pub uses_patches: [bool; Patch::NUM_GENERICS],
    pub stores_tess_level_outer: bool,
    pub stores_tess_level_inner: bool,

    pub uses_fp16: bool,
    pub uses_fp64: bool,
    pub uses_int8: bool,
    pub uses_int16: bool,
    pub uses_int64: bool,
    pub uses_fp32_denorms_flush: bool,
    pub uses_fp32_denorms_preserve: bool,

    pub uses_demote_to_helper_invocation: bool,
    pub uses_subgroup_vote: bool,
    pub uses_subgroup_shuffles: bool,
    pub uses_subgroup_mask: bool,
    pub uses_derivatives: bool,
    pub uses_sparse_residency: bool,
    pub uses_typeless_image_reads: bool,
    pub uses_typeless_image_writes: bool,
    pub uses_image_buffers: bool,
    pub uses_shadow_lod: bool,

    pub uses_global_memory: bool,
    pub loads_global_memory: bool,
    pub stores_global_memory: bool,
    pub uses_global_atomics: bool,
    pub uses_storage_atomics: bool,
    pub uses_local_memory: bool,
    pub uses_shared_memory: bool,

    #[serde(serialize_with = "serialize_type")]
    pub used_constant_buffer_types: Type,
    #[serde(serialize_with = "serialize_type")]
    pub used_storage_buffer_types: Type,

    /// A bit for each constant buffer index with a descriptor.
    pub constant_buffer_mask: u32,
    /// The highest byte offset read from each constant buffer aligned to 16 bytes.
    pub constant_buffer_used_sizes: [u32; MAX_CBUFS],

    /// The start of the driver storage buffer region in constant buffer 0.
    pub nvn_buffer_base: u32,
    /// A bit for each storage buffer slot read from the driver region.
    pub nvn_buffer_used: u16,

    pub constant_buffer_descriptors: Vec<ConstantBufferDescriptor>,
    pub storage_buffers_descriptors: Vec<StorageBufferDescriptor>,
    pub texture_buffer_descriptors: Vec<TextureBufferDescriptor>,
    pub image_buffer_descriptors: Vec<ImageBufferDescriptor>,
    pub texture_descriptors: Vec<TextureDescriptor>,
    pub image_descriptors: Vec<ImageDescriptor>,
}

impl Info {
    /// Returns `true` if any generic input is used.
    pub fn loads_generics(&self) -> bool {
        self.input_generics.iter().any(|g| g.used)
    }

    pub fn stores_any_generic(&self) -> bool {
        self.stores_generics.iter().any(|g| *g)
    }
}

fn serialize_type<S: Serializer>(ty: &Type, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ty.name())
}

fn serialize_texture_type<S: Serializer>(
    ty: &TextureType,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{ty:?}"))
}
