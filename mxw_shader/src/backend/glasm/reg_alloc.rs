use std::fmt::{self, Write};

use crate::error::CompileError;
use crate::ir::Type;
use crate::not_implemented;

/// The number of registers in each register file.
pub const NUM_REGS: usize = 4096;

/// 32-bit `R` registers hold up to four components of every 32-bit type.
/// 64-bit values use the `D` registers declared with `LONG TEMP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegFile {
    R,
    D,
}

/// A temporary register like `R12` together with the type of the value it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub file: RegFile,
    pub index: u32,
    pub ty: Type,
}

impl Register {
    pub fn is_vector(&self) -> bool {
        matches!(
            self.ty,
            Type::U32X2 | Type::U32X3 | Type::U32X4 | Type::F32X2 | Type::F32X3 | Type::F32X4
        )
    }

    /// The register without a component mask.
    pub fn name(&self) -> String {
        let file = match self.file {
            RegFile::R => "R",
            RegFile::D => "D",
        };
        format!("{file}{}", self.index)
    }

    /// The move suffix that copies the bits of this register.
    pub fn move_type(&self) -> &'static str {
        match self.file {
            RegFile::R => "U",
            RegFile::D => "U64",
        }
    }
}

/// Scalars are stored in the first component.
impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_vector() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}.x", self.name())
        }
    }
}

fn register_file(ty: Type) -> Result<RegFile, CompileError> {
    match ty {
        Type::U64 | Type::F64 => Ok(RegFile::D),
        Type::U1
        | Type::U8
        | Type::U16
        | Type::U32
        | Type::F16
        | Type::F32
        | Type::F16X2
        | Type::U32X2
        | Type::U32X3
        | Type::U32X4
        | Type::F32X2
        | Type::F32X3
        | Type::F32X4 => Ok(RegFile::R),
        ty => Err(not_implemented!("GLASM register of type {}", ty.name())),
    }
}

#[derive(Debug, Default)]
pub struct RegAlloc {
    r: Vec<bool>,
    d: Vec<bool>,
}

impl RegAlloc {
    /// Take the lowest free register for a value of type `ty`.
    pub fn define(&mut self, ty: Type) -> Result<Register, CompileError> {
        let file = register_file(ty)?;
        let registers = match file {
            RegFile::R => &mut self.r,
            RegFile::D => &mut self.d,
        };
        let index = match registers.iter().position(|used| !used) {
            Some(index) => index,
            None if registers.len() < NUM_REGS => {
                registers.push(false);
                registers.len() - 1
            }
            None => return Err(not_implemented!("Register spilling")),
        };
        registers[index] = true;
        Ok(Register {
            file,
            index: index as u32,
            ty,
        })
    }

    pub fn free(&mut self, register: Register) {
        let registers = match register.file {
            RegFile::R => &mut self.r,
            RegFile::D => &mut self.d,
        };
        if let Some(used) = registers.get_mut(register.index as usize) {
            *used = false;
        }
    }

    pub fn declarations(&self) -> String {
        let mut out = String::new();
        if !self.r.is_empty() {
            let names: Vec<_> = (0..self.r.len()).map(|i| format!("R{i}")).collect();
            let _ = writeln!(out, "TEMP {};", names.join(","));
        }
        if !self.d.is_empty() {
            let names: Vec<_> = (0..self.d.len()).map(|i| format!("D{i}")).collect();
            let _ = writeln!(out, "LONG TEMP {};", names.join(","));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn scalars_and_vectors_share_registers() {
        let mut alloc = RegAlloc::default();
        let a = alloc.define(Type::F32).unwrap();
        let b = alloc.define(Type::U32X4).unwrap();
        let c = alloc.define(Type::U64).unwrap();
        assert_eq!("R0.x", a.to_string());
        assert_eq!("R1", b.to_string());
        assert_eq!("D0.x", c.to_string());

        alloc.free(a);
        assert_eq!("R0", alloc.define(Type::F32X2).unwrap().to_string());
        assert_eq!(
            indoc! {"
                TEMP R0,R1;
                LONG TEMP D0;
            "},
            alloc.declarations()
        );
    }

    #[test]
    fn spilling_is_not_implemented() {
        let mut alloc = RegAlloc::default();
        for _ in 0..NUM_REGS {
            alloc.define(Type::F64).unwrap();
        }
        assert_eq!(
            Err(CompileError::NotImplemented("Register spilling".to_string())),
            alloc.define(Type::U64)
        );
    }
}
