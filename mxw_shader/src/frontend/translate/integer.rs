use super::{predicate_combine, TranslatorVisitor};
use crate::error::CompileError;
use crate::frontend::decode::Src;
use crate::frontend::instruction::Instruction;
use crate::ir::{IntCompare, Pred, Value};
use crate::{invalid_argument, not_implemented};

impl TranslatorVisitor<'_, '_> {
    pub(super) fn mov(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        let value = self.src_b(insn, src);
        self.set_x(insn.dest_reg(), value);
        Ok(())
    }

    pub(super) fn mov32i(&mut self, insn: Instruction) -> Result<(), CompileError> {
        self.set_x(insn.dest_reg(), Value::U32(insn.imm32()));
        Ok(())
    }

    pub(super) fn iadd(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        let b = self.src_b(insn, src);
        self.add_integers(insn, b, IaddBits {
            neg_a: 49,
            neg_b: 48,
            x: 43,
            cc: 47,
            sat: Some(50),
        })
    }

    pub(super) fn iadd32i(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let b = Value::U32(insn.imm32());
        self.add_integers(insn, b, IaddBits {
            neg_a: 56,
            neg_b: 0,
            x: 53,
            cc: 52,
            sat: Some(54),
        })
    }

    fn add_integers(&mut self, insn: Instruction, b: Value, bits: IaddBits) -> Result<(), CompileError> {
        if bits.sat.is_some_and(|sat| insn.bit(sat)) {
            return Err(not_implemented!("IADD saturation"));
        }
        let mut a = self.x(insn.src_a());
        let mut b = b;
        if insn.bit(bits.neg_a) {
            a = self.ir.ineg(a);
        }
        // IADD32I has no negated immediate.
        if bits.neg_b != 0 && insn.bit(bits.neg_b) {
            b = self.ir.ineg(b);
        }
        let x = insn.bit(bits.x);
        if x {
            let carry = self.ir.get_c_flag();
            let carry = self.ir.select(carry, Value::U32(1), Value::U32(0));
            b = self.ir.iadd(b, carry);
        }

        let result = self.ir.iadd(a, b);
        if insn.bit(bits.cc) {
            if x {
                return Err(not_implemented!("IADD.X with CC"));
            }
            self.set_flags_from_op(result)?;
        }
        self.set_x(insn.dest_reg(), result);
        Ok(())
    }

    fn set_flags_from_op(&mut self, result: Value) -> Result<(), CompileError> {
        let zero = self.ir.get_zero_from_op(result)?;
        let sign = self.ir.get_sign_from_op(result)?;
        let carry = self.ir.get_carry_from_op(result)?;
        let overflow = self.ir.get_overflow_from_op(result)?;
        self.ir.set_z_flag(zero);
        self.ir.set_s_flag(sign);
        self.ir.set_c_flag(carry);
        self.ir.set_o_flag(overflow);
        Ok(())
    }

    pub(super) fn iadd3(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        if insn.bit(48) {
            return Err(not_implemented!("IADD3.X"));
        }
        if insn.bits(37, 2) != 0 {
            return Err(not_implemented!("IADD3 shifted partial sums"));
        }

        let mut a = self.x(insn.src_a());
        let mut b = self.src_b(insn, src);
        let mut c = self.x(insn.src_c());
        if insn.bit(51) {
            a = self.ir.ineg(a);
        }
        if insn.bit(50) {
            b = self.ir.ineg(b);
        }
        if insn.bit(49) {
            c = self.ir.ineg(c);
        }
        let ab = self.ir.iadd(a, b);
        let result = self.ir.iadd(ab, c);
        if insn.bit(47) {
            self.set_flags_from_op(result)?;
        }
        self.set_x(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn iscadd(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        if insn.bit(47) {
            return Err(not_implemented!("ISCADD CC"));
        }
        let shift = insn.bits(39, 5) as u32;
        let mut a = self.x(insn.src_a());
        let mut b = self.src_b(insn, src);
        if insn.bit(49) {
            a = self.ir.ineg(a);
        }
        if insn.bit(48) {
            b = self.ir.ineg(b);
        }
        let scaled = self.ir.shift_left_logical(a, Value::U32(shift));
        let result = self.ir.iadd(scaled, b);
        self.set_x(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn shl(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        if insn.bit(43) {
            return Err(not_implemented!("SHL.X"));
        }
        if insn.bit(47) {
            return Err(not_implemented!("SHL CC"));
        }
        let base = self.x(insn.src_a());
        let shift = self.src_b(insn, src);
        let result = if insn.bit(39) {
            let shift = self.ir.bitwise_and(shift, Value::U32(31));
            self.ir.shift_left_logical(base, shift)
        } else {
            // Shifts of 32 or more produce zero instead of being undefined.
            let shifted = self.ir.shift_left_logical(base, shift);
            let overflow = self
                .ir
                .icompare(IntCompare::GreaterThanEqual, shift, Value::U32(32), false);
            self.ir.select(overflow, Value::U32(0), shifted)
        };
        self.set_x(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn shr(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        if insn.bit(44) {
            return Err(not_implemented!("SHR.X"));
        }
        if insn.bit(47) {
            return Err(not_implemented!("SHR CC"));
        }
        let is_signed = insn.bit(48);
        let mut base = self.x(insn.src_a());
        if insn.bit(40) {
            base = self.ir.bit_reverse(base);
        }
        let shift = self.src_b(insn, src);

        let result = if insn.bit(39) {
            let shift = self.ir.bitwise_and(shift, Value::U32(31));
            if is_signed {
                self.ir.shift_right_arithmetic(base, shift)
            } else {
                self.ir.shift_right_logical(base, shift)
            }
        } else if is_signed {
            // Arithmetic shifts of 32 or more fill with the sign bit.
            let shift = self.ir.imin(shift, Value::U32(31), false);
            self.ir.shift_right_arithmetic(base, shift)
        } else {
            let shifted = self.ir.shift_right_logical(base, shift);
            let overflow = self
                .ir
                .icompare(IntCompare::GreaterThanEqual, shift, Value::U32(32), false);
            self.ir.select(overflow, Value::U32(0), shifted)
        };
        self.set_x(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn lop(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        if insn.bit(43) {
            return Err(not_implemented!("LOP.X"));
        }
        let a = self.x(insn.src_a());
        let b = self.src_b(insn, src);
        let result = self.logical_operation(a, b, insn.bits(41, 2), insn.bit(39), insn.bit(40))?;

        let pred_result = match insn.bits(44, 2) {
            0 => Value::U1(false),
            1 => Value::U1(true),
            2 => self.ir.icompare(IntCompare::Equal, result, Value::U32(0), false),
            _ => self.ir.icompare(IntCompare::NotEqual, result, Value::U32(0), false),
        };
        self.ir.set_pred(Pred(insn.bits(48, 3) as u8), pred_result);
        if insn.bit(47) {
            self.set_logical_flags(result);
        }
        self.set_x(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn lop32i(&mut self, insn: Instruction) -> Result<(), CompileError> {
        if insn.bit(57) {
            return Err(not_implemented!("LOP32I.X"));
        }
        let a = self.x(insn.src_a());
        let b = Value::U32(insn.imm32());
        let result = self.logical_operation(a, b, insn.bits(53, 2), insn.bit(55), insn.bit(56))?;
        if insn.bit(52) {
            self.set_logical_flags(result);
        }
        self.set_x(insn.dest_reg(), result);
        Ok(())
    }

    fn logical_operation(
        &mut self,
        mut a: Value,
        mut b: Value,
        op: u64,
        invert_a: bool,
        invert_b: bool,
    ) -> Result<Value, CompileError> {
        if invert_a {
            a = self.ir.bitwise_not(a);
        }
        if invert_b {
            b = self.ir.bitwise_not(b);
        }
        match op {
            0 => Ok(self.ir.bitwise_and(a, b)),
            1 => Ok(self.ir.bitwise_or(a, b)),
            2 => Ok(self.ir.bitwise_xor(a, b)),
            3 => Ok(b),
            _ => Err(invalid_argument!("Invalid logical operation {op}")),
        }
    }

    fn set_logical_flags(&mut self, result: Value) {
        let zero = self.ir.icompare(IntCompare::Equal, result, Value::U32(0), false);
        let sign = self.ir.icompare(IntCompare::LessThan, result, Value::U32(0), true);
        self.ir.set_z_flag(zero);
        self.ir.set_s_flag(sign);
        self.ir.set_c_flag(Value::U1(false));
        self.ir.set_o_flag(Value::U1(false));
    }

    pub(super) fn isetp(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        if insn.bit(43) {
            return Err(not_implemented!("ISETP.X"));
        }
        let a = self.x(insn.src_a());
        let b = self.src_b(insn, src);
        let is_signed = insn.bit(48);
        let compare = match insn.bits(49, 3) {
            0 => Value::U1(false),
            1 => self.ir.icompare(IntCompare::LessThan, a, b, is_signed),
            2 => self.ir.icompare(IntCompare::Equal, a, b, is_signed),
            3 => self.ir.icompare(IntCompare::LessThanEqual, a, b, is_signed),
            4 => self.ir.icompare(IntCompare::GreaterThan, a, b, is_signed),
            5 => self.ir.icompare(IntCompare::NotEqual, a, b, is_signed),
            6 => self.ir.icompare(IntCompare::GreaterThanEqual, a, b, is_signed),
            _ => Value::U1(true),
        };
        self.set_compare_predicates(insn, compare)
    }

    /// Write the comparison combined with the boolean operation predicate to both destinations.
    pub(super) fn set_compare_predicates(
        &mut self,
        insn: Instruction,
        compare: Value,
    ) -> Result<(), CompileError> {
        let op = insn.bits(45, 2);
        let bop_pred = self.pred(Pred(insn.bits(39, 3) as u8), insn.bit(42));
        let result_a = predicate_combine(&mut self.ir, compare, bop_pred, op)?;
        let not_compare = self.ir.logical_not(compare);
        let result_b = predicate_combine(&mut self.ir, not_compare, bop_pred, op)?;
        self.ir.set_pred(Pred(insn.bits(3, 3) as u8), result_a);
        self.ir.set_pred(Pred(insn.bits(0, 3) as u8), result_b);
        Ok(())
    }

    pub(super) fn imnmx(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        if insn.bits(43, 2) != 0 {
            return Err(not_implemented!("IMNMX extended mode"));
        }
        if insn.bit(47) {
            return Err(not_implemented!("IMNMX CC"));
        }
        let is_signed = insn.bit(48);
        let a = self.x(insn.src_a());
        let b = self.src_b(insn, src);
        let pred = self.pred(Pred(insn.bits(39, 3) as u8), insn.bit(42));
        let min = self.ir.imin(a, b, is_signed);
        let max = self.ir.imax(a, b, is_signed);
        let result = self.ir.select(pred, min, max);
        self.set_x(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn sel(&mut self, insn: Instruction, src: Src) -> Result<(), CompileError> {
        let pred = self.pred(Pred(insn.bits(39, 3) as u8), insn.bit(42));
        let a = self.x(insn.src_a());
        let b = self.src_b(insn, src);
        let result = self.ir.select(pred, a, b);
        self.set_x(insn.dest_reg(), result);
        Ok(())
    }

    pub(super) fn psetp(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let a = self.pred(Pred(insn.bits(12, 3) as u8), insn.bit(15));
        let b = self.pred(Pred(insn.bits(29, 3) as u8), insn.bit(32));
        let c = self.pred(Pred(insn.bits(39, 3) as u8), insn.bit(42));
        let bop1 = insn.bits(24, 2);
        let bop2 = insn.bits(45, 2);

        let lhs_a = predicate_combine(&mut self.ir, a, b, bop1)?;
        let not_a = self.ir.logical_not(a);
        let lhs_b = predicate_combine(&mut self.ir, not_a, b, bop1)?;
        let result_a = predicate_combine(&mut self.ir, lhs_a, c, bop2)?;
        let result_b = predicate_combine(&mut self.ir, lhs_b, c, bop2)?;
        self.ir.set_pred(Pred(insn.bits(3, 3) as u8), result_a);
        self.ir.set_pred(Pred(insn.bits(0, 3) as u8), result_b);
        Ok(())
    }
}

struct IaddBits {
    neg_a: u32,
    neg_b: u32,
    x: u32,
    cc: u32,
    sat: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::super::tests::opcodes;
    use crate::ir::Opcode;
    use pretty_assertions::assert_eq;

    #[test]
    fn iadd_register() {
        // IADD R0, R1, R2
        assert_eq!(
            vec![
                Opcode::GetRegister,
                Opcode::GetRegister,
                Opcode::IAdd32,
                Opcode::SetRegister
            ],
            opcodes(0x5c10000000270100)
        );
    }

    #[test]
    fn iadd_with_flags() {
        // IADD.CC R0, R1, R2
        assert_eq!(
            vec![
                Opcode::GetRegister,
                Opcode::GetRegister,
                Opcode::IAdd32,
                Opcode::GetZeroFromOp,
                Opcode::GetSignFromOp,
                Opcode::GetCarryFromOp,
                Opcode::GetOverflowFromOp,
                Opcode::SetZFlag,
                Opcode::SetSFlag,
                Opcode::SetCFlag,
                Opcode::SetOFlag,
                Opcode::SetRegister
            ],
            opcodes(0x5c10800000270100)
        );
    }

    #[test]
    fn isetp_writes_both_predicates() {
        // ISETP.LT.AND P0, PT, R1, R2, PT
        let ops = opcodes(0x5b62038000270107);
        assert_eq!(
            vec![
                Opcode::GetRegister,
                Opcode::GetRegister,
                Opcode::ULessThan,
                Opcode::LogicalAnd,
                Opcode::LogicalNot,
                Opcode::LogicalAnd,
                Opcode::SetPred
            ],
            ops
        );
    }
}
