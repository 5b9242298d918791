use crate::ir::Info;

/// The next free binding for each resource class.
///
/// Descriptors are visited in [Info] order,
/// so programs with the same descriptor lists always get the same bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bindings {
    /// The shared counter when every class uses the same binding space.
    pub unified: u32,
    pub uniform_buffer: u32,
    pub storage_buffer: u32,
    pub texture: u32,
    pub image: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingClass {
    UniformBuffer,
    StorageBuffer,
    Texture,
    Image,
}

/// The host binding for each descriptor in an [Info].
/// Each list has one entry for each descriptor in the corresponding [Info] list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StageBindings {
    pub uniform_buffers: Vec<u32>,
    pub storage_buffers: Vec<u32>,
    pub texture_buffers: Vec<u32>,
    pub image_buffers: Vec<u32>,
    pub textures: Vec<u32>,
    pub images: Vec<u32>,
}

impl Bindings {
    /// Reserve `count` bindings for `class` and return the first binding.
    pub fn next(&mut self, class: BindingClass, count: u32, unified: bool) -> u32 {
        let counter = if unified {
            &mut self.unified
        } else {
            match class {
                BindingClass::UniformBuffer => &mut self.uniform_buffer,
                BindingClass::StorageBuffer => &mut self.storage_buffer,
                BindingClass::Texture => &mut self.texture,
                BindingClass::Image => &mut self.image,
            }
        };
        let binding = *counter;
        *counter += count;
        binding
    }

    /// Assign bindings for every descriptor in `info`.
    pub fn assign(&mut self, info: &Info, unified: bool) -> StageBindings {
        let uniform_buffers = info
            .constant_buffer_descriptors
            .iter()
            .map(|d| self.next(BindingClass::UniformBuffer, d.count, unified))
            .collect();
        let storage_buffers = info
            .storage_buffers_descriptors
            .iter()
            .map(|d| self.next(BindingClass::StorageBuffer, d.count, unified))
            .collect();
        let texture_buffers = info
            .texture_buffer_descriptors
            .iter()
            .map(|d| self.next(BindingClass::Texture, d.count, unified))
            .collect();
        let image_buffers = info
            .image_buffer_descriptors
            .iter()
            .map(|d| self.next(BindingClass::Image, d.count, unified))
            .collect();
        let textures = info
            .texture_descriptors
            .iter()
            .map(|d| self.next(BindingClass::Texture, d.count, unified))
            .collect();
        let images = info
            .image_descriptors
            .iter()
            .map(|d| self.next(BindingClass::Image, d.count, unified))
            .collect();

        StageBindings {
            uniform_buffers,
            storage_buffers,
            texture_buffers,
            image_buffers,
            textures,
            images,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ConstantBufferDescriptor, StorageBufferDescriptor, TextureDescriptor};
    use mxw_lib::TextureType;
    use pretty_assertions::assert_eq;

    fn info() -> Info {
        Info {
            constant_buffer_descriptors: vec![
                ConstantBufferDescriptor { index: 3, count: 1 },
                ConstantBufferDescriptor { index: 0, count: 1 },
            ],
            storage_buffers_descriptors: vec![StorageBufferDescriptor {
                cbuf_index: 0,
                cbuf_offset: 0x110,
                count: 1,
                is_written: true,
            }],
            texture_descriptors: vec![TextureDescriptor {
                texture_type: TextureType::Color2D,
                is_depth: false,
                cbuf_index: 1,
                cbuf_offset: 0x20,
                count: 2,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn separate_binding_spaces() {
        let mut bindings = Bindings::default();
        let stage = bindings.assign(&info(), false);
        assert_eq!(
            StageBindings {
                uniform_buffers: vec![0, 1],
                storage_buffers: vec![0],
                textures: vec![0],
                ..Default::default()
            },
            stage
        );
        assert_eq!(
            Bindings {
                unified: 0,
                uniform_buffer: 2,
                storage_buffer: 1,
                texture: 2,
                image: 0
            },
            bindings
        );
    }

    #[test]
    fn unified_binding_space() {
        let mut bindings = Bindings::default();
        let stage = bindings.assign(&info(), true);
        assert_eq!(vec![0, 1], stage.uniform_buffers);
        assert_eq!(vec![2], stage.storage_buffers);
        assert_eq!(vec![3], stage.textures);
        assert_eq!(5, bindings.unified);
    }

    #[test]
    fn identical_info_identical_bindings() {
        // Bindings continue from the previous stage.
        let mut a = Bindings {
            uniform_buffer: 4,
            ..Default::default()
        };
        let mut b = a;
        assert_eq!(a.assign(&info(), false), b.assign(&info(), false));
        assert_eq!(a, b);
    }
}
