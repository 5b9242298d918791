use std::collections::BTreeMap;
use std::fmt::{self, Write};

use crate::error::CompileError;
use crate::ir::Type;
use crate::not_implemented;

/// The number of variables available for each [VarType].
pub const NUM_REGS: usize = 4096;

/// The GLSL type of a variable holding an SSA value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarType {
    U1,
    U32,
    U64,
    F16,
    F32,
    F64,
    U32x2,
    U32x3,
    U32x4,
    F16x2,
    F32x2,
    F32x3,
    F32x4,
}

impl VarType {
    pub fn from_type(ty: Type) -> Result<Self, CompileError> {
        match ty {
            Type::U1 => Ok(Self::U1),
            Type::U8 | Type::U16 | Type::U32 => Ok(Self::U32),
            Type::U64 => Ok(Self::U64),
            Type::F16 => Ok(Self::F16),
            Type::F32 => Ok(Self::F32),
            Type::F64 => Ok(Self::F64),
            Type::U32X2 => Ok(Self::U32x2),
            Type::U32X3 => Ok(Self::U32x3),
            Type::U32X4 => Ok(Self::U32x4),
            Type::F16X2 => Ok(Self::F16x2),
            Type::F32X2 => Ok(Self::F32x2),
            Type::F32X3 => Ok(Self::F32x3),
            Type::F32X4 => Ok(Self::F32x4),
            _ => Err(not_implemented!("GLSL variable of type {}", ty.name())),
        }
    }

    pub fn glsl_name(self) -> &'static str {
        match self {
            Self::U1 => "bool",
            Self::U32 => "uint",
            Self::U64 => "uint64_t",
            Self::F16 => "float16_t",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::U32x2 => "uvec2",
            Self::U32x3 => "uvec3",
            Self::U32x4 => "uvec4",
            Self::F16x2 => "f16vec2",
            Self::F32x2 => "vec2",
            Self::F32x3 => "vec3",
            Self::F32x4 => "vec4",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::U1 => "b",
            Self::U32 => "u",
            Self::U64 => "u64",
            Self::F16 => "h",
            Self::F32 => "f",
            Self::F64 => "d",
            Self::U32x2 => "u2",
            Self::U32x3 => "u3",
            Self::U32x4 => "u4",
            Self::F16x2 => "h2",
            Self::F32x2 => "f2",
            Self::F32x3 => "f3",
            Self::F32x4 => "f4",
        }
    }
}

/// A named GLSL variable like `u_12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id {
    pub ty: VarType,
    pub index: u32,
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.ty.prefix(), self.index)
    }
}

/// Assigns SSA values to a fixed number of reusable variables of each type.
#[derive(Debug, Default)]
pub struct RegAlloc {
    in_use: BTreeMap<VarType, Vec<bool>>,
}

impl RegAlloc {
    /// Take the lowest free variable of type `ty`.
    pub fn define(&mut self, ty: VarType) -> Result<Id, CompileError> {
        let registers = self.in_use.entry(ty).or_default();
        let index = match registers.iter().position(|used| !used) {
            Some(index) => index,
            None if registers.len() < NUM_REGS => {
                registers.push(false);
                registers.len() - 1
            }
            None => return Err(not_implemented!("Register spilling")),
        };
        registers[index] = true;
        Ok(Id {
            ty,
            index: index as u32,
        })
    }

    pub fn free(&mut self, id: Id) {
        if let Some(used) = self
            .in_use
            .get_mut(&id.ty)
            .and_then(|r| r.get_mut(id.index as usize))
        {
            *used = false;
        }
    }

    /// Declarations for every variable that was ever allocated.
    pub fn declarations(&self, indent: &str) -> String {
        let mut out = String::new();
        for (ty, registers) in &self.in_use {
            let names: Vec<_> = (0..registers.len())
                .map(|index| {
                    Id {
                        ty: *ty,
                        index: index as u32,
                    }
                    .to_string()
                })
                .collect();
            for chunk in names.chunks(16) {
                let _ = writeln!(out, "{indent}{} {};", ty.glsl_name(), chunk.join(", "));
            }
        }
        out
    }
}
