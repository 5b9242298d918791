//! Host binding layouts for the stages of a pipeline.
use mxw_lib::Stage;
use mxw_shader::backend::{Bindings, StageBindings};
use mxw_shader::ir::Info;

/// The resources of a single stage and where they are bound on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct StageLayout {
    pub stage: Stage,
    /// The first binding of each resource class used by this stage.
    pub base: Bindings,
    /// The binding for each descriptor in [info](#structfield.info).
    pub bindings: StageBindings,
    /// The descriptors used to find resource handles in guest constant buffers at draw time.
    pub info: Info,
}

impl StageLayout {
    /// Assign bindings for `info` starting from `bindings` and advance `bindings` past them.
    ///
    /// This uses the same assignment as the backends,
    /// so the layout matches the bindings in the emitted code.
    pub fn new(stage: Stage, info: Info, bindings: &mut Bindings, unified: bool) -> Self {
        let base = *bindings;
        let stage_bindings = bindings.assign(&info, unified);
        Self {
            stage,
            base,
            bindings: stage_bindings,
            info,
        }
    }

    pub fn texture_count(&self) -> u32 {
        let info = &self.info;
        info.texture_buffer_descriptors
            .iter()
            .map(|d| d.count)
            .chain(info.texture_descriptors.iter().map(|d| d.count))
            .sum()
    }

    pub fn image_count(&self) -> u32 {
        let info = &self.info;
        info.image_buffer_descriptors
            .iter()
            .map(|d| d.count)
            .chain(info.image_descriptors.iter().map(|d| d.count))
            .sum()
    }

    /// The host binding and guest constant buffer location of each texture handle.
    pub fn texture_handles(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        let buffers = self
            .info
            .texture_buffer_descriptors
            .iter()
            .zip(&self.bindings.texture_buffers)
            .flat_map(|(d, binding)| handles(*binding, d.cbuf_index, d.cbuf_offset, d.count));
        let textures = self
            .info
            .texture_descriptors
            .iter()
            .zip(&self.bindings.textures)
            .flat_map(|(d, binding)| handles(*binding, d.cbuf_index, d.cbuf_offset, d.count));
        buffers.chain(textures)
    }
}

/// Where to find the handle for a texture binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureHandle {
    pub binding: u32,
    pub cbuf_index: u32,
    pub cbuf_offset: u32,
}

fn handles(
    binding: u32,
    cbuf_index: u32,
    cbuf_offset: u32,
    count: u32,
) -> impl Iterator<Item = TextureHandle> {
    // Arrays of handles are tightly packed 32-bit values.
    (0..count).map(move |i| TextureHandle {
        binding: binding + i,
        cbuf_index,
        cbuf_offset: cbuf_offset + i * 4,
    })
}
