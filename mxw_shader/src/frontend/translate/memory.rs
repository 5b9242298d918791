use super::TranslatorVisitor;
use crate::error::CompileError;
use crate::frontend::instruction::Instruction;
use crate::ir::{Attribute, IntCompare, Opcode, Patch, Reg, Value};
use crate::{invalid_argument, not_implemented};

/// The access size in bits 48 to 50 of the memory instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Size {
    U8,
    S8,
    U16,
    S16,
    B32,
    B64,
    B128,
}

impl Size {
    fn from_bits(bits: u64) -> Result<Self, CompileError> {
        match bits {
            0 => Ok(Size::U8),
            1 => Ok(Size::S8),
            2 => Ok(Size::U16),
            3 => Ok(Size::S16),
            4 => Ok(Size::B32),
            5 => Ok(Size::B64),
            6 => Ok(Size::B128),
            _ => Err(not_implemented!("Memory access size {bits}")),
        }
    }

    /// The number of 32-bit registers read or written.
    fn num_regs(self) -> u8 {
        match self {
            Size::B64 => 2,
            Size::B128 => 4,
            _ => 1,
        }
    }
}

fn check_alignment(reg: Reg, size: Size) -> Result<(), CompileError> {
    if reg.is_aligned(size.num_regs()) {
        Ok(())
    } else {
        Err(not_implemented!("Unaligned register {reg} for {size:?} access"))
    }
}

impl TranslatorVisitor<'_, '_> {
    /// The 64-bit address for global memory instructions.
    fn global_address(&mut self, insn: Instruction) -> Result<Value, CompileError> {
        let reg = insn.src_a();
        let offset = insn.offset24();
        if insn.bit(45) {
            if !reg.is_aligned(2) {
                return Err(not_implemented!("Unaligned address register {reg}"));
            }
            let lo = self.x(reg);
            let hi = self.x(reg.offset(1));
            let vector = self.ir.composite_construct(&[lo, hi]);
            let address = self.ir.pack_uint_2x32(vector);
            Ok(self.ir.iadd(address, Value::U64(offset as i64 as u64)))
        } else {
            let base = self.x(reg);
            let address = self.ir.iadd(base, Value::U32(offset as u32));
            Ok(self.ir.uconvert(address, 64))
        }
    }

    pub(super) fn ldg(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let size = Size::from_bits(insn.bits(48, 3))?;
        check_alignment(insn.dest_reg(), size)?;
        let address = self.global_address(insn)?;
        let op = match size {
            Size::U8 => Opcode::LoadGlobalU8,
            Size::S8 => Opcode::LoadGlobalS8,
            Size::U16 => Opcode::LoadGlobalU16,
            Size::S16 => Opcode::LoadGlobalS16,
            Size::B32 => Opcode::LoadGlobal32,
            Size::B64 => Opcode::LoadGlobal64,
            Size::B128 => Opcode::LoadGlobal128,
        };
        let value = self.ir.load_global(op, address);
        self.set_loaded(insn.dest_reg(), value, size);
        Ok(())
    }

    pub(super) fn stg(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let size = Size::from_bits(insn.bits(48, 3))?;
        check_alignment(insn.dest_reg(), size)?;
        let address = self.global_address(insn)?;
        let op = match size {
            Size::U8 => Opcode::WriteGlobalU8,
            Size::S8 => Opcode::WriteGlobalS8,
            Size::U16 => Opcode::WriteGlobalU16,
            Size::S16 => Opcode::WriteGlobalS16,
            Size::B32 => Opcode::WriteGlobal32,
            Size::B64 => Opcode::WriteGlobal64,
            Size::B128 => Opcode::WriteGlobal128,
        };
        let value = self.get_vector(insn.dest_reg(), size.num_regs());
        self.ir.write_global(op, address, value);
        Ok(())
    }

    fn set_loaded(&mut self, reg: Reg, value: Value, size: Size) {
        if size.num_regs() == 1 {
            self.set_x(reg, value);
        } else {
            self.set_vector(reg, value, size.num_regs());
        }
    }

    pub(super) fn ldc(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let mode = insn.bits(44, 2);
        if mode != 0 {
            return Err(not_implemented!("LDC mode {mode}"));
        }
        let size = Size::from_bits(insn.bits(48, 3))?;
        if size == Size::B128 {
            return Err(invalid_argument!("Invalid LDC size {size:?}"));
        }
        check_alignment(insn.dest_reg(), size)?;

        let index = Value::U32(insn.bits(36, 5) as u32);
        let imm_offset = insn.signed_bits(20, 16) as u32;
        let reg = insn.src_a();
        let offset = if reg.is_zero() {
            Value::U32(imm_offset)
        } else {
            let base = self.x(reg);
            self.ir.iadd(base, Value::U32(imm_offset))
        };

        let (bitsize, is_signed) = match size {
            Size::U8 => (8, false),
            Size::S8 => (8, true),
            Size::U16 => (16, false),
            Size::S16 => (16, true),
            Size::B64 => (64, false),
            _ => (32, false),
        };
        let value = self.ir.get_cbuf(index, offset, bitsize, is_signed);
        self.set_loaded(insn.dest_reg(), value, size);
        Ok(())
    }

    /// The word offset for local memory accesses.
    fn local_word_offset(&mut self, insn: Instruction) -> Value {
        let base = self.x(insn.src_a());
        let address = self.ir.iadd(base, Value::U32(insn.offset24() as u32));
        self.ir.shift_right_arithmetic(address, Value::U32(2))
    }

    fn local_size(insn: Instruction) -> Result<Size, CompileError> {
        match Size::from_bits(insn.bits(48, 3))? {
            size @ (Size::B32 | Size::B64 | Size::B128) => Ok(size),
            size => Err(not_implemented!("Local memory access size {size:?}")),
        }
    }

    pub(super) fn ldl(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let size = Self::local_size(insn)?;
        check_alignment(insn.dest_reg(), size)?;
        let word_offset = self.local_word_offset(insn);
        for i in 0..size.num_regs() {
            let offset = self.ir.iadd(word_offset, Value::U32(i as u32));
            let value = self.ir.load_local(offset);
            self.set_x(insn.dest_reg().offset(i), value);
        }
        Ok(())
    }

    pub(super) fn stl(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let size = Self::local_size(insn)?;
        check_alignment(insn.dest_reg(), size)?;
        let word_offset = self.local_word_offset(insn);
        for i in 0..size.num_regs() {
            let offset = self.ir.iadd(word_offset, Value::U32(i as u32));
            let value = self.x(insn.dest_reg().offset(i));
            self.ir.write_local(offset, value);
        }
        Ok(())
    }

    fn shared_offset(&mut self, insn: Instruction) -> Value {
        let base = self.x(insn.src_a());
        self.ir.iadd(base, Value::U32(insn.offset24() as u32))
    }

    pub(super) fn lds(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let size = Size::from_bits(insn.bits(48, 3))?;
        check_alignment(insn.dest_reg(), size)?;
        let offset = self.shared_offset(insn);
        let op = match size {
            Size::U8 => Opcode::LoadSharedU8,
            Size::S8 => Opcode::LoadSharedS8,
            Size::U16 => Opcode::LoadSharedU16,
            Size::S16 => Opcode::LoadSharedS16,
            Size::B32 => Opcode::LoadSharedU32,
            Size::B64 => Opcode::LoadSharedU64,
            Size::B128 => Opcode::LoadSharedU128,
        };
        let value = self.ir.load_shared(op, offset);
        self.set_loaded(insn.dest_reg(), value, size);
        Ok(())
    }

    pub(super) fn sts(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let size = Size::from_bits(insn.bits(48, 3))?;
        check_alignment(insn.dest_reg(), size)?;
        let offset = self.shared_offset(insn);
        let op = match size {
            Size::U8 | Size::S8 => Opcode::WriteSharedU8,
            Size::U16 | Size::S16 => Opcode::WriteSharedU16,
            Size::B32 => Opcode::WriteSharedU32,
            Size::B64 => Opcode::WriteSharedU64,
            Size::B128 => Opcode::WriteSharedU128,
        };
        let value = self.get_vector(insn.dest_reg(), size.num_regs());
        self.ir.write_shared(op, offset, value);
        Ok(())
    }

    pub(super) fn ald(&mut self, insn: Instruction) -> Result<(), CompileError> {
        if insn.bit(32) {
            return Err(not_implemented!("ALD reading outputs"));
        }
        let offset = insn.bits(20, 10) as u32;
        let num_elements = insn.bits(47, 2) as u8 + 1;
        let index_reg = insn.src_a();
        let vertex = self.x(insn.src_c());
        if offset % 4 != 0 {
            return Err(invalid_argument!("Unaligned attribute offset {offset:#x}"));
        }

        if insn.bit(31) {
            for i in 0..num_elements {
                let patch = Patch::from_offset(offset + i as u32 * 4);
                let value = self.ir.get_patch(patch);
                self.set_f(insn.dest_reg().offset(i), value);
            }
        } else if index_reg.is_zero() {
            for i in 0..num_elements {
                let attribute = Attribute::from_offset(offset + i as u32 * 4);
                if attribute.is_integer() {
                    let value = self.ir.get_attribute_u32(attribute, vertex);
                    self.set_x(insn.dest_reg().offset(i), value);
                } else {
                    let value = self.ir.get_attribute(attribute, vertex);
                    self.set_f(insn.dest_reg().offset(i), value);
                }
            }
        } else {
            let index = self.x(index_reg);
            let base = self.ir.iadd(index, Value::U32(offset));
            for i in 0..num_elements {
                let element_offset = self.ir.iadd(base, Value::U32(i as u32 * 4));
                let value = self.ir.get_attribute_indexed(element_offset, vertex);
                self.set_f(insn.dest_reg().offset(i), value);
            }
        }
        Ok(())
    }

    pub(super) fn ast(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let offset = insn.bits(20, 10) as u32;
        let num_elements = insn.bits(47, 2) as u8 + 1;
        let index_reg = insn.src_a();
        let vertex = self.x(insn.src_c());
        let src = insn.dest_reg();
        if offset % 4 != 0 {
            return Err(invalid_argument!("Unaligned attribute offset {offset:#x}"));
        }

        if insn.bit(31) {
            for i in 0..num_elements {
                let patch = Patch::from_offset(offset + i as u32 * 4);
                let value = self.f(src.offset(i));
                self.ir.set_patch(patch, value);
            }
        } else if index_reg.is_zero() {
            for i in 0..num_elements {
                let attribute = Attribute::from_offset(offset + i as u32 * 4);
                let value = self.f(src.offset(i));
                self.ir.set_attribute(attribute, value, vertex);
            }
        } else {
            let index = self.x(index_reg);
            let base = self.ir.iadd(index, Value::U32(offset));
            for i in 0..num_elements {
                let element_offset = self.ir.iadd(base, Value::U32(i as u32 * 4));
                let value = self.f(src.offset(i));
                self.ir.set_attribute_indexed(element_offset, value, vertex);
            }
        }
        Ok(())
    }

    pub(super) fn ipa(&mut self, insn: Instruction) -> Result<(), CompileError> {
        if insn.bit(38) || !insn.src_a().is_zero() {
            return Err(not_implemented!("IPA indexed attribute"));
        }
        let attribute = Attribute(insn.bits(30, 8) as u16);
        let dest = insn.dest_reg();

        if attribute == Attribute::FRONT_FACE {
            // Front facing fragments read as all bits set.
            let value = self.ir.get_attribute_u32(attribute, Value::U32(0));
            let is_front = self
                .ir
                .icompare(IntCompare::NotEqual, value, Value::U32(0), false);
            let result = self.ir.select(is_front, Value::U32(u32::MAX), Value::U32(0));
            self.set_x(dest, result);
            return Ok(());
        }

        let mut value = if attribute.is_integer() {
            let value = self.ir.get_attribute_u32(attribute, Value::U32(0));
            self.ir.bit_cast_to_float(value)
        } else {
            self.ir.get_attribute(attribute, Value::U32(0))
        };
        match insn.bits(54, 2) {
            // Multiply by the perspective correction from register B.
            1 => {
                let multiplier = self.f(insn.src_b());
                value = self.ir.fp_mul(value, multiplier, Default::default());
            }
            0 | 2 => (),
            mode => return Err(not_implemented!("IPA interpolation mode {mode}")),
        }
        if insn.bit(51) {
            value = self.ir.fp_saturate(value);
        }
        self.set_f(dest, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{opcodes, translate_one};
    use crate::error::CompileError;
    use crate::ir::{Opcode, Value};
    use pretty_assertions::assert_eq;

    #[test]
    fn ldg_64_bit_address() {
        // LDG.E R0, [R2]
        assert_eq!(
            vec![
                Opcode::GetRegister,
                Opcode::GetRegister,
                Opcode::CompositeConstructU32x2,
                Opcode::PackUint2x32,
                Opcode::IAdd64,
                Opcode::LoadGlobal32,
                Opcode::SetRegister
            ],
            opcodes(0xeed4_2000_0007_0200)
        );
    }

    #[test]
    fn ldg_unaligned_pair() {
        // LDG.E.64 R1, [R2]
        assert!(matches!(
            translate_one(0xeed5_2000_0007_0201),
            Err(CompileError::NotImplemented(_))
        ));
    }

    #[test]
    fn ald_generic_vector() {
        // ALD.128 R0, a[0x80]
        let (pool, block) = translate_one(0xefd9_ff80_0807_ff00).unwrap();
        let attributes: Vec<_> = pool
            .block(block)
            .instructions()
            .iter()
            .filter(|i| pool.opcode(**i) == Opcode::GetAttribute)
            .map(|i| pool.inst(*i).arg(0))
            .collect();
        assert_eq!(
            vec![
                Value::Attribute(crate::ir::Attribute::generic(0, 0)),
                Value::Attribute(crate::ir::Attribute::generic(0, 1)),
                Value::Attribute(crate::ir::Attribute::generic(0, 2)),
                Value::Attribute(crate::ir::Attribute::generic(0, 3)),
            ],
            attributes
        );
    }
}
