//! The SSA intermediate representation shared by the frontend, passes, and backends.
//!
//! Instructions and blocks live in an [ObjectPool] and refer to each other with typed handles.
//! Control flow is stored twice: as edges between [Block]s for analysis
//! and as a structured [SyntaxNode] list for emitting structured code.
mod arena;
mod attribute;
mod block;
mod emitter;
mod inst;
mod modifiers;
mod opcodes;
mod pool;
mod post_order;
mod program;
mod reg;
mod shader_info;
mod syntax;
mod types;
mod value;

pub use arena::{Arena, Handle};
pub use attribute::{Attribute, Patch};
pub use block::Block;
pub use emitter::{FpCompare, IntCompare, IrEmitter};
pub use inst::{AssociatedInsts, Inst};
pub use modifiers::{FmzMode, FpControl, FpRounding, TextureInstInfo};
pub use opcodes::Opcode;
pub use pool::ObjectPool;
pub use post_order::post_order;
pub use program::Program;
pub use reg::{Pred, Reg};
pub use shader_info::*;
pub use syntax::SyntaxNode;
pub use types::{are_types_compatible, Type};
pub use value::Value;

pub type InstId = Handle<Inst>;
pub type BlockId = Handle<Block>;
