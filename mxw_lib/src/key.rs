//! Plain old data keys that uniquely identify graphics and compute pipelines.
//!
//! Keys are compared and hashed as raw bytes.
//! Transform feedback state is only part of the key if transform feedback is enabled,
//! so keys with transform feedback disabled ignore any stale varyings.
use std::hash::{Hash, Hasher};
use std::mem::offset_of;

use bilge::prelude::*;
use bytemuck::{Pod, Zeroable};

/// The number of graphics stages including both vertex programs.
pub const NUM_PROGRAMS: usize = 6;

pub const NUM_TRANSFORM_FEEDBACK_BUFFERS: usize = 4;

pub const MAX_TRANSFORM_FEEDBACK_VARYINGS: usize = 128;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GraphicsPipelineKey {
    /// The code hash for each program or 0 if the program is disabled.
    pub unique_hashes: [u64; NUM_PROGRAMS],
    /// Packed state bits. See [GraphicsKeyBits].
    pub raw: u32,
    pub padding: [u32; 3],
    pub xfb_state: TransformFeedbackState,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq, Eq)]
pub struct TransformFeedbackState {
    pub layouts: [TransformFeedbackLayout; NUM_TRANSFORM_FEEDBACK_BUFFERS],
    /// The attribute index of each varying written to each buffer.
    pub varyings: [[u8; MAX_TRANSFORM_FEEDBACK_VARYINGS]; NUM_TRANSFORM_FEEDBACK_BUFFERS],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq, Eq, Default)]
pub struct TransformFeedbackLayout {
    pub stream: u32,
    pub varying_count: u32,
    pub stride: u32,
}

#[bitsize(32)]
#[derive(DebugBits, FromBits, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsKeyBits {
    pub xfb_enabled: bool,
    pub early_z: bool,
    /// The geometry shader input primitive topology.
    pub gs_input_topology: u4,
    pub tessellation_primitive: u2,
    pub tessellation_spacing: u2,
    pub tessellation_clockwise: bool,
    pub unk1: u21,
}

impl GraphicsPipelineKey {
    pub fn bits(&self) -> GraphicsKeyBits {
        GraphicsKeyBits::from(self.raw)
    }

    pub fn set_bits(&mut self, bits: GraphicsKeyBits) {
        self.raw = bits.into();
    }

    /// The number of significant bytes in the key.
    pub fn size(&self) -> usize {
        if self.bits().xfb_enabled() {
            std::mem::size_of::<Self>()
        } else {
            offset_of!(Self, xfb_state)
        }
    }

    /// The significant bytes of the key used for hashing, equality and serialization.
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::bytes_of(self)[..self.size()]
    }

    /// Read a key from its significant bytes.
    /// Any omitted transform feedback state is zeroed.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut key = Self::zeroed();
        let dst = bytemuck::bytes_of_mut(&mut key);
        if bytes.len() > dst.len() {
            return None;
        }
        dst[..bytes.len()].copy_from_slice(bytes);
        (key.size() == bytes.len()).then_some(key)
    }

    pub fn content_hash(&self) -> u64 {
        crate::hash::hash_bytes(self.as_bytes())
    }
}

impl Default for GraphicsPipelineKey {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl PartialEq for GraphicsPipelineKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for GraphicsPipelineKey {}

impl Hash for GraphicsPipelineKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
pub struct ComputePipelineKey {
    pub unique_hash: u64,
    pub shared_memory_size: u32,
    pub workgroup_size: [u32; 3],
}

impl ComputePipelineKey {
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }

    pub fn content_hash(&self) -> u64 {
        crate::hash::hash_bytes(self.as_bytes())
    }
}

impl PartialEq for ComputePipelineKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ComputePipelineKey {}

impl Hash for ComputePipelineKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key_with_hashes(hashes: [u64; NUM_PROGRAMS]) -> GraphicsPipelineKey {
        GraphicsPipelineKey {
            unique_hashes: hashes,
            ..Default::default()
        }
    }

    #[test]
    fn key_size_without_transform_feedback() {
        let key = key_with_hashes([1, 2, 0, 0, 0, 3]);
        assert_eq!(64, key.size());
        assert_eq!(64, key.as_bytes().len());
    }

    #[test]
    fn key_size_with_transform_feedback() {
        let mut key = key_with_hashes([1, 2, 0, 0, 0, 3]);
        let mut bits = key.bits();
        bits.set_xfb_enabled(true);
        key.set_bits(bits);
        assert_eq!(std::mem::size_of::<GraphicsPipelineKey>(), key.size());
    }

    #[test]
    fn keys_ignore_disabled_transform_feedback() {
        let a = key_with_hashes([1, 2, 0, 0, 0, 3]);
        let mut b = a;
        b.xfb_state.varyings[0][0] = 7;
        assert_eq!(a, b);

        let keys: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(1, keys.len());
    }

    #[test]
    fn keys_compare_enabled_transform_feedback() {
        let mut a = key_with_hashes([1, 2, 0, 0, 0, 3]);
        let mut bits = a.bits();
        bits.set_xfb_enabled(true);
        a.set_bits(bits);
        let mut b = a;
        b.xfb_state.varyings[0][0] = 7;
        assert_ne!(a, b);
    }

    #[test]
    fn keys_compare_hashes() {
        assert_ne!(
            key_with_hashes([1, 2, 0, 0, 0, 3]),
            key_with_hashes([1, 2, 0, 0, 0, 4])
        );
    }

    #[test]
    fn graphics_key_from_bytes() {
        let mut key = key_with_hashes([5, 0, 0, 0, 0, 6]);
        let mut bits = key.bits();
        bits.set_early_z(true);
        key.set_bits(bits);
        assert_eq!(Some(key), GraphicsPipelineKey::from_bytes(key.as_bytes()));
        assert_eq!(None, GraphicsPipelineKey::from_bytes(&key.as_bytes()[..60]));
    }

    #[test]
    fn compute_key_from_bytes() {
        let key = ComputePipelineKey {
            unique_hash: 0x1234,
            shared_memory_size: 0x400,
            workgroup_size: [32, 1, 1],
        };
        assert_eq!(24, key.as_bytes().len());
        assert_eq!(Some(key), ComputePipelineKey::from_bytes(key.as_bytes()));
        assert_eq!(None, ComputePipelineKey::from_bytes(&[0u8; 8]));
    }
}
