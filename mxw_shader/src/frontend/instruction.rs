use crate::ir::{Pred, Reg};

/// A raw 64-bit Maxwell instruction word with accessors for the common operand fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u64);

impl Instruction {
    /// The unsigned value of `count` bits starting at bit `start`.
    pub fn bits(self, start: u32, count: u32) -> u64 {
        (self.0 >> start) & ((1u64 << count) - 1)
    }

    /// The sign extended value of `count` bits starting at bit `start`.
    pub fn signed_bits(self, start: u32, count: u32) -> i64 {
        let shift = 64 - count;
        ((self.bits(start, count) << shift) as i64) >> shift
    }

    pub fn bit(self, index: u32) -> bool {
        self.bits(index, 1) != 0
    }

    pub fn dest_reg(self) -> Reg {
        Reg(self.bits(0, 8) as u8)
    }

    pub fn src_a(self) -> Reg {
        Reg(self.bits(8, 8) as u8)
    }

    pub fn src_b(self) -> Reg {
        Reg(self.bits(20, 8) as u8)
    }

    pub fn src_c(self) -> Reg {
        Reg(self.bits(39, 8) as u8)
    }

    /// The guard predicate controlling whether the instruction executes.
    pub fn pred(self) -> Pred {
        Pred(self.bits(16, 3) as u8)
    }

    pub fn pred_negated(self) -> bool {
        self.bit(19)
    }

    /// The 20-bit signed integer immediate in bits 20 to 38 with the sign in bit 56.
    pub fn imm20(self) -> u32 {
        let value = self.bits(20, 19) as u32;
        if self.bit(56) {
            value | 0xfff80000
        } else {
            value
        }
    }

    /// The 20-bit float immediate containing the upper bits of an f32.
    pub fn float_imm20(self) -> f32 {
        let value = ((self.bits(20, 19) as u32) << 12) | ((self.bit(56) as u32) << 31);
        f32::from_bits(value)
    }

    pub fn imm32(self) -> u32 {
        self.bits(20, 32) as u32
    }

    /// The constant buffer `(index, byte_offset)` for operands read from a constant buffer.
    pub fn cbuf(self) -> (u32, u32) {
        let offset = self.bits(20, 14) as u32 * 4;
        let index = self.bits(34, 5) as u32;
        (index, offset)
    }

    /// The signed 24-bit byte offset used by branches and memory instructions.
    pub fn offset24(self) -> i32 {
        self.signed_bits(20, 24) as i32
    }

    /// The absolute target of a branch relative to the instruction at `pc`.
    pub fn branch_target(self, pc: u32) -> u32 {
        (pc as i64 + 8 + self.offset24() as i64) as u32
    }

    /// The flow test for control instructions where `0xF` always passes.
    pub fn flow_test(self) -> u32 {
        self.bits(0, 5) as u32
    }
}

/// The flow test value that always passes.
pub const FLOW_TEST_T: u32 = 0xF;
