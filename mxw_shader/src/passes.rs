//! Optimization and analysis passes over a translated [Program](crate::ir::Program).
//!
//! [translate_program](crate::frontend::translate_program) runs the passes in a fixed order.
//! Address tracking for storage buffers only recognizes values in SSA form,
//! so [ssa_rewrite] must run before [global_memory_to_storage_buffer].
//! Dead code elimination runs before collecting the shader info
//! to avoid marking features used only by removed instructions.
mod collect_info;
mod constant_propagation;
mod dead_code;
mod global_memory;
mod interpolation;
mod lower_fp16;
mod nvn_buffers;
mod ssa;
mod texture;
mod track;
mod verification;

pub use collect_info::collect_shader_info;
pub use constant_propagation::constant_propagation;
pub use dead_code::dead_code_elimination;
pub use global_memory::global_memory_to_storage_buffer;
pub use interpolation::collect_interpolation_info;
pub use lower_fp16::lower_fp16_to_fp32;
pub use nvn_buffers::add_nvn_storage_buffers;
pub use ssa::ssa_rewrite;
pub use texture::texture_pass;
pub(crate) use texture::{add_image, add_image_buffer, add_texture, add_texture_buffer};
pub use verification::verification;
