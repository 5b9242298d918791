use thiserror::Error;

use crate::ir::Opcode;

/// Errors while translating, optimizing, or emitting a shader program.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CompileError {
    /// An internal invariant of the IR was violated.
    #[error("logic error: {0}")]
    Logic(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    /// A feature or instruction combination that is not supported yet.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{backend} backend does not support opcode {opcode:?}")]
    UnsupportedOpcode {
        backend: &'static str,
        opcode: Opcode,
    },

    #[error("unknown instruction {word:#018x} at address {address:#x}")]
    UnknownInstruction { address: u32, word: u64 },
}

impl From<rspirv::dr::Error> for CompileError {
    fn from(e: rspirv::dr::Error) -> Self {
        Self::Logic(format!("invalid SPIR-V module construction: {e:?}"))
    }
}

/// Shorthand for [CompileError::Logic] with [format] style arguments.
#[macro_export]
macro_rules! logic_error {
    ($($arg:tt)*) => {
        $crate::error::CompileError::Logic(format!($($arg)*))
    };
}

/// Shorthand for [CompileError::NotImplemented] with [format] style arguments.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)*) => {
        $crate::error::CompileError::NotImplemented(format!($($arg)*))
    };
}

/// Shorthand for [CompileError::InvalidArgument] with [format] style arguments.
#[macro_export]
macro_rules! invalid_argument {
    ($($arg:tt)*) => {
        $crate::error::CompileError::InvalidArgument(format!($($arg)*))
    };
}
