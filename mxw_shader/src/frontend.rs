//! Translation of Maxwell microcode into the IR.
//!
//! Programs are decoded into a [Cfg](control_flow::Cfg), converted to structured control flow,
//! and translated one guest block at a time before running the optimization passes.
pub mod control_flow;
pub mod decode;
pub mod instruction;
mod program;
pub mod structurize;
mod translate;

pub use program::{merge_dual_vertex_programs, translate_program};
