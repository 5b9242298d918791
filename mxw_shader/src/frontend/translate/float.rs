use super::TranslatorVisitor;
use crate::error::CompileError;
use crate::frontend::decode::{FfmaSrc, Src};
use crate::frontend::instruction::Instruction;
use crate::ir::{FmzMode, FpCompare, FpControl, FpRounding, Pred, Value};
use crate::{invalid_argument, not_implemented};

fn rounding(bits: u64) -> FpRounding {
    match bits {
        0 => FpRounding::Rn,
        1 => FpRounding::Rm,
        2 => FpRounding::Rp,
        _ => FpRounding::Rz,
    }
}

fn fmz_mode(bits: u64) -> Result<FmzMode, CompileError> {
    match bits {
        0 => Ok(FmzMode::None),
        1 => Ok(FmzMode::Ftz),
        2 => Ok(FmzMode::Fmz),
        _ => Err(invalid_argument!("Invalid FMZ mode {bits}")),
    }
}

fn fp_control(rounding: FpRounding, fmz_mode: FmzMode) -> FpControl {
    let mut control = FpControl::default();
    control.set_no_contraction(true);
    control.set_rounding(rounding);
    control.set_fmz_mode(fmz_mode);
    control
}

impl TranslatorVisitor<'_, '_> {
    pub(super) fn fadd(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        if insn.bit(47) {
            return Err(not_implemented!("FADD CC"));
        }
        let b = self.float_src_b(insn, src);
        let ftz = if insn.bit(44) { FmzMode::Ftz } else { FmzMode::None };
        let control = fp_control(rounding(insn.bits(39, 2)), ftz);
        self.add_floats(insn, b, FaddBits {
            neg_a: 48,
            abs_a: 46,
            neg_b: 45,
            abs_b: 49,
            sat: insn.bit(50),
            control,
        })
    }

    pub(super) fn fadd32i(&mut self, insn: Instruction) -> Result<(), CompileError> {
        if insn.bit(52) {
            return Err(not_implemented!("FADD32I CC"));
        }
        let b = Value::F32(f32::from_bits(insn.imm32()));
        let ftz = if insn.bit(55) { FmzMode::Ftz } else { FmzMode::None };
        let control = fp_control(FpRounding::Rn, ftz);
        self.add_floats(insn, b, FaddBits {
            neg_a: 56,
            abs_a: 54,
            neg_b: 53,
            abs_b: 57,
            sat: false,
            control,
        })
    }

    fn add_floats(&mut self, insn: Instruction, b: Value, bits: FaddBits) -> Result<(), CompileError> {
        let a = self.f(insn.src_a());
        let a = self.ir.fp_abs_neg(a, insn.bit(bits.abs_a), insn.bit(bits.neg_a));
        let b = self.ir.fp_abs_neg(b, insn.bit(bits.abs_b), insn.bit(bits.neg_b));
        let mut result = self.ir.fp_add(a, b, bits.control);
        if bits.sat {
            result = self.ir.fp_saturate(result);
        }
        self.set_f(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn fmul(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        if insn.bits(41, 3) != 0 {
            return Err(not_implemented!("FMUL scale"));
        }
        if insn.bit(47) {
            return Err(not_implemented!("FMUL CC"));
        }
        let b = self.float_src_b(insn, src);
        let control = fp_control(rounding(insn.bits(39, 2)), fmz_mode(insn.bits(44, 2))?);
        self.multiply_floats(insn, b, insn.bit(48), insn.bit(50), control)
    }

    pub(super) fn fmul32i(&mut self, insn: Instruction) -> Result<(), CompileError> {
        if insn.bit(52) {
            return Err(not_implemented!("FMUL32I CC"));
        }
        let b = Value::F32(f32::from_bits(insn.imm32()));
        let control = fp_control(FpRounding::Rn, fmz_mode(insn.bits(53, 2))?);
        self.multiply_floats(insn, b, false, insn.bit(55), control)
    }

    fn multiply_floats(
        &mut self,
        insn: Instruction,
        b: Value,
        neg_b: bool,
        sat: bool,
        control: FpControl,
    ) -> Result<(), CompileError> {
        let a = self.f(insn.src_a());
        let b = self.ir.fp_abs_neg(b, false, neg_b);
        let mut result = self.ir.fp_mul(a, b, control);
        if sat {
            result = self.ir.fp_saturate(result);
        }
        self.set_f(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn ffma(&mut self, insn: Instruction, src: FfmaSrc) -> Result<(), CompileError> {
        if insn.bit(47) {
            return Err(not_implemented!("FFMA CC"));
        }
        let a = self.f(insn.src_a());
        let (b, c) = match src {
            FfmaSrc::Reg => (self.f(insn.src_b()), self.f(insn.src_c())),
            FfmaSrc::Rc => (self.f(insn.src_c()), self.cbuf_f32(insn)),
            FfmaSrc::Cr => (self.cbuf_f32(insn), self.f(insn.src_c())),
            FfmaSrc::Imm => (Value::F32(insn.float_imm20()), self.f(insn.src_c())),
        };
        let b = self.ir.fp_abs_neg(b, false, insn.bit(48));
        let c = self.ir.fp_abs_neg(c, false, insn.bit(49));
        let control = fp_control(rounding(insn.bits(51, 2)), fmz_mode(insn.bits(53, 2))?);
        let mut result = self.ir.fp_fma(a, b, c, control);
        if insn.bit(50) {
            result = self.ir.fp_saturate(result);
        }
        self.set_f(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn fmnmx(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        if insn.bit(47) {
            return Err(not_implemented!("FMNMX CC"));
        }
        let a = self.f(insn.src_a());
        let a = self.ir.fp_abs_neg(a, insn.bit(46), insn.bit(48));
        let b = self.float_src_b(insn, src);
        let b = self.ir.fp_abs_neg(b, insn.bit(49), insn.bit(45));
        let pred = self.pred(Pred(insn.bits(39, 3) as u8), insn.bit(42));
        let min = self.ir.fp_min(a, b);
        let max = self.ir.fp_max(a, b);
        let result = self.ir.select(pred, min, max);
        self.set_f(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn fsetp(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        let a = self.f(insn.src_a());
        let a = self.ir.fp_abs_neg(a, insn.bit(7), insn.bit(43));
        let b = self.float_src_b(insn, src);
        let b = self.ir.fp_abs_neg(b, insn.bit(44), insn.bit(6));
        let compare = self.float_compare(insn.bits(48, 4), a, b)?;
        self.set_compare_predicates(insn, compare)
    }

    /// Compare with the 4-bit float comparison field shared by the set instructions.
    fn float_compare(&mut self, op: u64, a: Value, b: Value) -> Result<Value, CompileError> {
        let ordered = |op| (op, true);
        let unordered = |op| (op, false);
        let (compare, is_ordered) = match op {
            0 => return Ok(Value::U1(false)),
            1 => ordered(FpCompare::LessThan),
            2 => ordered(FpCompare::Equal),
            3 => ordered(FpCompare::LessThanEqual),
            4 => ordered(FpCompare::GreaterThan),
            5 => ordered(FpCompare::NotEqual),
            6 => ordered(FpCompare::GreaterThanEqual),
            7 | 8 => {
                let a_nan = self.ir.fp_is_nan(a);
                let b_nan = self.ir.fp_is_nan(b);
                return Ok(if op == 7 {
                    let a_num = self.ir.logical_not(a_nan);
                    let b_num = self.ir.logical_not(b_nan);
                    self.ir.logical_and(a_num, b_num)
                } else {
                    self.ir.logical_or(a_nan, b_nan)
                });
            }
            9 => unordered(FpCompare::LessThan),
            10 => unordered(FpCompare::Equal),
            11 => unordered(FpCompare::LessThanEqual),
            12 => unordered(FpCompare::GreaterThan),
            13 => unordered(FpCompare::NotEqual),
            14 => unordered(FpCompare::GreaterThanEqual),
            15 => return Ok(Value::U1(true)),
            _ => return Err(invalid_argument!("Invalid float comparison {op}")),
        };
        Ok(self.ir.fp_compare(compare, a, b, is_ordered))
    }

    pub(super) fn mufu(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let value = self.f(insn.src_a());
        let value = self.ir.fp_abs_neg(value, insn.bit(46), insn.bit(48));
        let op = insn.bits(20, 4);
        let mut result = match op {
            0 => self.ir.fp_cos(value),
            1 => self.ir.fp_sin(value),
            2 => self.ir.fp_exp2(value),
            3 => self.ir.fp_log2(value),
            4 => self.ir.fp_recip(value),
            5 => self.ir.fp_recip_sqrt(value),
            8 => self.ir.fp_sqrt(value),
            6 | 7 => return Err(not_implemented!("MUFU 64-bit reciprocal operation {op}")),
            _ => return Err(invalid_argument!("Invalid MUFU operation {op}")),
        };
        if insn.bit(50) {
            result = self.ir.fp_saturate(result);
        }
        self.set_f(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn i2f(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        let dest_bits = match insn.bits(8, 2) {
            2 => 32,
            3 => 64,
            format => return Err(not_implemented!("I2F destination format {format}")),
        };
        let is_signed = insn.bit(13);
        let mut value = self.src_b(insn, src);
        value = match insn.bits(10, 2) {
            0 | 1 => {
                let size = if insn.bits(10, 2) == 0 { 8 } else { 16 };
                let offset = insn.bits(41, 2) as u32 * 8;
                self.ir
                    .bit_field_extract(value, Value::U32(offset), Value::U32(size), is_signed)
            }
            2 => value,
            _ => return Err(not_implemented!("I2F 64-bit source")),
        };
        if insn.bit(49) && is_signed {
            value = self.ir.iabs(value);
        }
        if insn.bit(45) {
            value = self.ir.ineg(value);
        }

        let result = self.ir.convert_i_to_f(value, dest_bits, is_signed);
        if dest_bits == 64 {
            self.set_d(insn.dest_reg(), result)
        } else {
            self.set_f(insn.dest_reg(), result);
            Ok(())
        }
    }

    pub(super) fn f2i(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        if insn.bits(8, 2) != 2 {
            return Err(not_implemented!("F2I destination format {}", insn.bits(8, 2)));
        }
        let is_signed = insn.bit(12);
        let round = insn.bits(39, 2);
        let value = match (insn.bits(10, 2), src) {
            (2, _) => self.float_src_b(insn, src),
            (3, Src::Reg) => self.d(insn.src_b())?,
            (format, _) => return Err(not_implemented!("F2I source format {format}")),
        };
        let is_double = insn.bits(10, 2) == 3;
        let value = self.ir.fp_abs_neg(value, insn.bit(49), insn.bit(45));

        let rounded = match (round, is_double) {
            (3, _) => value,
            (_, true) => return Err(not_implemented!("F2I 64-bit rounding mode {round}")),
            (0, false) => self.ir.fp_round_even(value),
            (1, false) => self.ir.fp_floor(value),
            _ => self.ir.fp_ceil(value),
        };
        let result = self.ir.convert_f_to_i(rounded, is_signed);
        self.set_x(insn.dest_reg(), result);
        Ok(())
    }
}

struct FaddBits {
    neg_a: u32,
    abs_a: u32,
    neg_b: u32,
    abs_b: u32,
    sat: bool,
    control: FpControl,
}

#[cfg(test)]
mod tests {
    use super::super::tests::{opcodes, translate_one};
    use crate::ir::{FmzMode, FpControl, FpRounding, Opcode};
    use pretty_assertions::assert_eq;

    #[test]
    fn fadd_immediate() {
        // FADD R0, R1, 1.0
        assert_eq!(
            vec![
                Opcode::GetRegister,
                Opcode::BitCastF32U32,
                Opcode::FPAdd32,
                Opcode::BitCastU32F32,
                Opcode::SetRegister
            ],
            opcodes(0x3858_003f_8007_0100)
        );
    }

    #[test]
    fn fadd_flags() {
        let (pool, block) = translate_one(0x3858_003f_8007_0100).unwrap();
        let add = pool.block(block).instructions()[2];
        let control = FpControl::from(pool.inst(add).flags());
        assert!(control.no_contraction());
        assert_eq!(FpRounding::Rn, control.rounding());
        assert_eq!(FmzMode::None, control.fmz_mode());
    }

    #[test]
    fn mufu_rsq() {
        // MUFU.RSQ R0, R1
        assert_eq!(
            vec![
                Opcode::GetRegister,
                Opcode::BitCastF32U32,
                Opcode::FPRecipSqrt32,
                Opcode::BitCastU32F32,
                Opcode::SetRegister
            ],
            opcodes(0x5080_0000_0057_0100)
        );
    }
}
