use super::TranslatorVisitor;
use crate::error::CompileError;
use crate::frontend::instruction::Instruction;
use crate::ir::{Opcode, Pred, Value};
use crate::{invalid_argument, not_implemented};

impl TranslatorVisitor<'_, '_> {
    pub(super) fn s2r(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let register = insn.bits(20, 8);
        let value = match register {
            0 => self.ir.lane_id(),
            17 => self.ir.invocation_id(),
            18 => {
                let direction = self.ir.y_direction();
                self.ir.bit_cast_to_uint(direction)
            }
            19 => {
                let is_helper = self.ir.is_helper_invocation();
                self.ir
                    .select(is_helper, Value::U32(u32::MAX), Value::U32(0))
            }
            33..=35 => {
                let id = self.ir.local_invocation_id();
                self.ir.composite_extract(id, register as u32 - 33)
            }
            37..=39 => {
                let id = self.ir.workgroup_id();
                self.ir.composite_extract(id, register as u32 - 37)
            }
            _ => return Err(not_implemented!("S2R special register {register}")),
        };
        self.set_x(insn.dest_reg(), value);
        Ok(())
    }

    pub(super) fn kil(&mut self, _insn: Instruction) -> Result<(), CompileError> {
        self.ir.demote_to_helper_invocation();
        Ok(())
    }

    pub(super) fn bar(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let mode = insn.bits(32, 3);
        if mode != 0 {
            return Err(not_implemented!("BAR mode {mode}"));
        }
        self.ir.barrier();
        Ok(())
    }

    pub(super) fn membar(&mut self, insn: Instruction) -> Result<(), CompileError> {
        match insn.bits(8, 2) {
            0 => self.ir.workgroup_memory_barrier(),
            1 | 2 => self.ir.device_memory_barrier(),
            level => return Err(invalid_argument!("Invalid MEMBAR level {level}")),
        }
        Ok(())
    }

    pub(super) fn vote(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let pred = self.pred(Pred(insn.bits(39, 3) as u8), insn.bit(42));
        let ballot = self.ir.subgroup_ballot(pred);
        self.set_x(insn.dest_reg(), ballot);

        let result = match insn.bits(48, 2) {
            0 => self.ir.vote_all(pred),
            1 => self.ir.vote_any(pred),
            2 => self.ir.vote_equal(pred),
            mode => return Err(invalid_argument!("Invalid VOTE mode {mode}")),
        };
        self.ir.set_pred(Pred(insn.bits(45, 3) as u8), result);
        Ok(())
    }

    pub(super) fn shfl(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let index = if insn.bit(28) {
            Value::U32(insn.bits(20, 5) as u32)
        } else {
            self.x(insn.src_b())
        };
        let mask = if insn.bit(29) {
            Value::U32(insn.bits(34, 13) as u32)
        } else {
            self.x(insn.src_c())
        };
        let clamp = self
            .ir
            .bit_field_extract(mask, Value::U32(0), Value::U32(5), false);
        let segmentation_mask = self
            .ir
            .bit_field_extract(mask, Value::U32(8), Value::U32(5), false);

        let op = match insn.bits(30, 2) {
            0 => Opcode::ShuffleIndex,
            1 => Opcode::ShuffleUp,
            2 => Opcode::ShuffleDown,
            _ => Opcode::ShuffleButterfly,
        };
        let value = self.x(insn.src_a());
        let result = self
            .ir
            .shuffle(op, value, index, clamp, segmentation_mask);
        let in_bounds = self.ir.get_in_bounds_from_op(result)?;
        self.ir.set_pred(Pred(insn.bits(48, 3) as u8), in_bounds);
        self.set_x(insn.dest_reg(), result);
        Ok(())
    }
}
