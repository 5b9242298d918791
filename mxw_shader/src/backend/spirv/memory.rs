use rspirv::spirv::{Scope, StorageClass, Word};

use super::EmitContext;
use crate::error::CompileError;
use crate::ir::{InstId, Opcode, Type, Value};
use crate::logic_error;

/// A byte offset known at compile time or computed by an instruction.
#[derive(Debug, Clone, Copy)]
enum Offset {
    Immediate(u32),
    Dynamic(Word),
}

/// The bit size and signedness of sub word accesses.
fn sub_word(op: Opcode) -> Option<(u32, bool)> {
    match op {
        Opcode::GetCbufU8 | Opcode::LoadStorageU8 | Opcode::LoadSharedU8 => Some((8, false)),
        Opcode::GetCbufS8 | Opcode::LoadStorageS8 | Opcode::LoadSharedS8 => Some((8, true)),
        Opcode::GetCbufU16 | Opcode::LoadStorageU16 | Opcode::LoadSharedU16 => Some((16, false)),
        Opcode::GetCbufS16 | Opcode::LoadStorageS16 | Opcode::LoadSharedS16 => Some((16, true)),
        Opcode::WriteStorageU8 | Opcode::WriteStorageS8 | Opcode::WriteSharedU8 => {
            Some((8, false))
        }
        Opcode::WriteStorageU16 | Opcode::WriteStorageS16 | Opcode::WriteSharedU16 => {
            Some((16, false))
        }
        _ => None,
    }
}

/// The number of 32-bit words for wide accesses.
fn word_count(op: Opcode) -> u32 {
    match op {
        Opcode::GetCbufU32x2
        | Opcode::LoadStorage64
        | Opcode::WriteStorage64
        | Opcode::LoadSharedU64
        | Opcode::WriteSharedU64 => 2,
        Opcode::LoadStorage128
        | Opcode::WriteStorage128
        | Opcode::LoadSharedU128
        | Opcode::WriteSharedU128 => 4,
        _ => 1,
    }
}

/// A word array variable and the access chain prefix selecting the array.
#[derive(Debug, Clone, Copy)]
struct WordArray {
    var: Word,
    class: StorageClass,
    /// The array is the first member of a block.
    in_block: bool,
    scope: Scope,
}

impl EmitContext<'_> {
    fn offset(&mut self, inst: InstId, index: usize) -> Result<Offset, CompileError> {
        let value = self.program.pool.resolve(self.program.pool.inst(inst).arg(index));
        match value {
            Value::U32(offset) => Ok(Offset::Immediate(offset)),
            _ => self.a(inst, index).map(Offset::Dynamic),
        }
    }

    /// The offset `bytes` after `offset`.
    fn offset_add(&mut self, offset: Offset, bytes: u32) -> Result<Offset, CompileError> {
        match offset {
            Offset::Immediate(o) => Ok(Offset::Immediate(o + bytes)),
            Offset::Dynamic(o) if bytes == 0 => Ok(Offset::Dynamic(o)),
            Offset::Dynamic(o) => {
                let bytes = self.u32_const(bytes);
                let u32_type = self.u32_type;
                Ok(Offset::Dynamic(self.builder.i_add(u32_type, None, o, bytes)?))
            }
        }
    }

    /// The offset shifted right by `shift` bits and masked with `mask`.
    fn offset_bits(
        &mut self,
        offset: Offset,
        shift: u32,
        mask: Option<u32>,
    ) -> Result<Word, CompileError> {
        match offset {
            Offset::Immediate(o) => Ok(self.u32_const((o >> shift) & mask.unwrap_or(u32::MAX))),
            Offset::Dynamic(o) => {
                let u32_type = self.u32_type;
                let shift = self.u32_const(shift);
                let mut value = self
                    .builder
                    .shift_right_logical(u32_type, None, o, shift)?;
                if let Some(mask) = mask {
                    let mask = self.u32_const(mask);
                    value = self.builder.bitwise_and(u32_type, None, value, mask)?;
                }
                Ok(value)
            }
        }
    }

    /// The bit offset of a byte offset in its word.
    fn bit_offset(&mut self, offset: Offset) -> Result<Word, CompileError> {
        match offset {
            Offset::Immediate(o) => Ok(self.u32_const((o % 4) * 8)),
            Offset::Dynamic(o) => {
                let u32_type = self.u32_type;
                let three = self.u32_const(3);
                let byte = self.builder.bitwise_and(u32_type, None, o, three)?;
                Ok(self
                    .builder
                    .shift_left_logical(u32_type, None, byte, three)?)
            }
        }
    }

    fn word_pointer(&mut self, array: WordArray, word: Word) -> Result<Word, CompileError> {
        let pointer = self.pointer(array.class, self.u32_type);
        let indices = if array.in_block {
            vec![self.u32_const(0), word]
        } else {
            vec![word]
        };
        Ok(self
            .builder
            .access_chain(pointer, None, array.var, indices)?)
    }

    fn cbuf_word_pointer(&mut self, var: Word, offset: Offset) -> Result<Word, CompileError> {
        let pointer = self.pointer(StorageClass::Uniform, self.u32_type);
        let member = self.u32_const(0);
        let vector = self.offset_bits(offset, 4, None)?;
        let component = self.offset_bits(offset, 2, Some(3))?;
        Ok(self
            .builder
            .access_chain(pointer, None, var, [member, vector, component])?)
    }

    /// Extract a sub word value with the result id of `inst`.
    fn extract(
        &mut self,
        inst: InstId,
        word: Word,
        offset: Offset,
        bits: u32,
        is_signed: bool,
    ) -> Result<(), CompileError> {
        let bit = self.bit_offset(offset)?;
        let count = self.u32_const(bits);
        let u32_type = self.u32_type;
        let id = self.def(inst);
        if is_signed {
            self.builder
                .bit_field_s_extract(u32_type, Some(id), word, bit, count)?;
        } else {
            self.builder
                .bit_field_u_extract(u32_type, Some(id), word, bit, count)?;
        }
        Ok(())
    }

    pub(super) fn emit_get_cbuf(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let index = self.imm(inst, 0)?;
        let var = self
            .resources
            .cbufs
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, var)| *var)
            .ok_or_else(|| logic_error!("Constant buffer {index} has no descriptor"))?;
        let offset = self.offset(inst, 1)?;
        let u32_type = self.u32_type;

        match op {
            Opcode::GetCbufU32 => {
                let pointer = self.cbuf_word_pointer(var, offset)?;
                let id = self.def(inst);
                self.builder.load(u32_type, Some(id), pointer, None, [])?;
            }
            Opcode::GetCbufF32 => {
                let pointer = self.cbuf_word_pointer(var, offset)?;
                let word = self.builder.load(u32_type, None, pointer, None, [])?;
                let id = self.def(inst);
                let f32_type = self.f32_type;
                self.builder.bitcast(f32_type, Some(id), word)?;
            }
            Opcode::GetCbufU32x2 => {
                let mut words = Vec::new();
                for i in 0..2 {
                    let offset = self.offset_add(offset, i * 4)?;
                    let pointer = self.cbuf_word_pointer(var, offset)?;
                    words.push(self.builder.load(u32_type, None, pointer, None, [])?);
                }
                let ty = self.ty(Type::U32X2)?;
                let id = self.def(inst);
                self.builder.composite_construct(ty, Some(id), words)?;
            }
            op => {
                let (bits, is_signed) =
                    sub_word(op).ok_or_else(|| logic_error!("{op:?} is not a cbuf read"))?;
                let pointer = self.cbuf_word_pointer(var, offset)?;
                let word = self.builder.load(u32_type, None, pointer, None, [])?;
                self.extract(inst, word, offset, bits, is_signed)?;
            }
        }
        Ok(())
    }

    fn ssbo(&self, inst: InstId) -> Result<WordArray, CompileError> {
        let index = self.imm(inst, 0)?;
        let var = self
            .resources
            .ssbos
            .get(index as usize)
            .copied()
            .ok_or_else(|| logic_error!("Storage buffer {index} has no descriptor"))?;
        Ok(WordArray {
            var,
            class: StorageClass::StorageBuffer,
            in_block: true,
            scope: Scope::Device,
        })
    }

    fn shared(&mut self) -> WordArray {
        WordArray {
            var: self.shared_memory(),
            class: StorageClass::Workgroup,
            in_block: false,
            scope: Scope::Workgroup,
        }
    }

    fn load_words(
        &mut self,
        inst: InstId,
        array: WordArray,
        offset: Offset,
        op: Opcode,
    ) -> Result<(), CompileError> {
        let u32_type = self.u32_type;
        if let Some((bits, is_signed)) = sub_word(op) {
            let word = self.offset_bits(offset, 2, None)?;
            let pointer = self.word_pointer(array, word)?;
            let value = self.builder.load(u32_type, None, pointer, None, [])?;
            return self.extract(inst, value, offset, bits, is_signed);
        }
        match word_count(op) {
            1 => {
                let word = self.offset_bits(offset, 2, None)?;
                let pointer = self.word_pointer(array, word)?;
                let id = self.def(inst);
                self.builder.load(u32_type, Some(id), pointer, None, [])?;
            }
            n => {
                let mut words = Vec::new();
                for i in 0..n {
                    let offset = self.offset_add(offset, i * 4)?;
                    let word = self.offset_bits(offset, 2, None)?;
                    let pointer = self.word_pointer(array, word)?;
                    words.push(self.builder.load(u32_type, None, pointer, None, [])?);
                }
                let ty = self.result_type(inst)?;
                let id = self.def(inst);
                self.builder.composite_construct(ty, Some(id), words)?;
            }
        }
        Ok(())
    }

    /// Write `value` at a byte `offset` with the width of `op`.
    fn store_words(
        &mut self,
        array: WordArray,
        offset: Offset,
        op: Opcode,
        value: Word,
    ) -> Result<(), CompileError> {
        let u32_type = self.u32_type;
        if let Some((bits, _)) = sub_word(op) {
            // Neighboring bytes may be written by other invocations.
            let word = self.offset_bits(offset, 2, None)?;
            let pointer = self.word_pointer(array, word)?;
            let bit = self.bit_offset(offset)?;
            let mask = self.u32_const((1u32 << bits) - 1);
            let scope = self.u32_const(array.scope as u32);
            let semantics = self.u32_const(0);

            let shifted_mask = self.builder.shift_left_logical(u32_type, None, mask, bit)?;
            let clear = self.builder.not(u32_type, None, shifted_mask)?;
            self.builder
                .atomic_and(u32_type, None, pointer, scope, semantics, clear)?;
            let masked = self.builder.bitwise_and(u32_type, None, value, mask)?;
            let bits = self.builder.shift_left_logical(u32_type, None, masked, bit)?;
            self.builder
                .atomic_or(u32_type, None, pointer, scope, semantics, bits)?;
            return Ok(());
        }
        match word_count(op) {
            1 => {
                let word = self.offset_bits(offset, 2, None)?;
                let pointer = self.word_pointer(array, word)?;
                self.builder.store(pointer, value, None, [])?;
            }
            n => {
                for i in 0..n {
                    let component = self
                        .builder
                        .composite_extract(u32_type, None, value, [i])?;
                    let offset = self.offset_add(offset, i * 4)?;
                    let word = self.offset_bits(offset, 2, None)?;
                    let pointer = self.word_pointer(array, word)?;
                    self.builder.store(pointer, component, None, [])?;
                }
            }
        }
        Ok(())
    }

    pub(super) fn emit_load_storage(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let array = self.ssbo(inst)?;
        let offset = self.offset(inst, 1)?;
        self.load_words(inst, array, offset, op)
    }

    pub(super) fn emit_write_storage(
        &mut self,
        inst: InstId,
        op: Opcode,
    ) -> Result<(), CompileError> {
        let array = self.ssbo(inst)?;
        let offset = self.offset(inst, 1)?;
        let value = self.a(inst, 2)?;
        self.store_words(array, offset, op, value)
    }

    pub(super) fn emit_storage_atomic(
        &mut self,
        inst: InstId,
        op: Opcode,
    ) -> Result<(), CompileError> {
        let array = self.ssbo(inst)?;
        let offset = self.offset(inst, 1)?;
        let value = self.a(inst, 2)?;
        let word = self.offset_bits(offset, 2, None)?;
        let pointer = self.word_pointer(array, word)?;
        let scope = self.u32_const(Scope::Device as u32);
        let semantics = self.u32_const(0);
        let u32_type = self.u32_type;
        let id = self.def(inst);
        if op == Opcode::StorageAtomicExchange32 {
            self.builder
                .atomic_exchange(u32_type, Some(id), pointer, scope, semantics, value)?;
        } else {
            self.builder
                .atomic_i_add(u32_type, Some(id), pointer, scope, semantics, value)?;
        }
        Ok(())
    }

    pub(super) fn emit_load_shared(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let array = self.shared();
        let offset = self.offset(inst, 0)?;
        self.load_words(inst, array, offset, op)
    }

    pub(super) fn emit_write_shared(
        &mut self,
        inst: InstId,
        op: Opcode,
    ) -> Result<(), CompileError> {
        let array = self.shared();
        let offset = self.offset(inst, 0)?;
        let value = self.a(inst, 1)?;
        self.store_words(array, offset, op, value)
    }

    fn local_pointer(&mut self, inst: InstId) -> Result<Word, CompileError> {
        let var = self.local_memory();
        let word = self.a(inst, 0)?;
        let array = WordArray {
            var,
            class: StorageClass::Private,
            in_block: false,
            scope: Scope::Invocation,
        };
        self.word_pointer(array, word)
    }

    /// Local memory is addressed in words.
    pub(super) fn emit_load_local(&mut self, inst: InstId) -> Result<(), CompileError> {
        let pointer = self.local_pointer(inst)?;
        let u32_type = self.u32_type;
        let id = self.def(inst);
        self.builder.load(u32_type, Some(id), pointer, None, [])?;
        Ok(())
    }

    pub(super) fn emit_write_local(&mut self, inst: InstId) -> Result<(), CompileError> {
        let pointer = self.local_pointer(inst)?;
        let value = self.a(inst, 1)?;
        self.builder.store(pointer, value, None, [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::spirv::tests::{emit, ops, single_block};
    use crate::ir::{ConstantBufferDescriptor, IrEmitter, Opcode, StorageBufferDescriptor, Value};
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;
    use rspirv::dr::{Module, Operand};
    use rspirv::spirv::{Op, Word};

    /// The value of each 32-bit constant operand of the first access chain.
    fn first_access_chain_constants(module: &Module) -> Vec<Option<u32>> {
        let chain = module.functions[0]
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .find(|i| i.class.opcode == Op::AccessChain)
            .unwrap();
        chain.operands[1..]
            .iter()
            .map(|o| match o {
                Operand::IdRef(id) => constant(module, *id),
                _ => None,
            })
            .collect()
    }

    fn constant(module: &Module, id: Word) -> Option<u32> {
        module
            .types_global_values
            .iter()
            .find(|i| i.class.opcode == Op::Constant && i.result_id == Some(id))
            .and_then(|i| match i.operands[0] {
                Operand::LiteralBit32(v) => Some(v),
                _ => None,
            })
    }

    #[test]
    fn constant_buffer_offsets() {
        let (mut program, block) = single_block(Stage::Fragment);
        program.info.constant_buffer_descriptors =
            vec![ConstantBufferDescriptor { index: 2, count: 1 }];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let word = ir.get_cbuf_u32(Value::U32(2), Value::U32(0x28));
        let byte = ir.get_cbuf(Value::U32(2), Value::U32(0x2b), 8, true);
        let sum = ir.iadd(word, byte);
        ir.write_local(Value::U32(0), sum);

        let module = emit(&program);
        assert_eq!(
            vec![
                Op::AccessChain,
                Op::Load,
                Op::AccessChain,
                Op::Load,
                Op::BitFieldSExtract,
                Op::IAdd,
                Op::AccessChain,
                Op::Store,
                Op::Return
            ],
            ops(&module)
        );
        // Member 0, vector 2, component 2.
        assert_eq!(
            vec![Some(0), Some(2), Some(2)],
            first_access_chain_constants(&module)
        );
    }

    #[test]
    fn dynamic_constant_buffer_offset() {
        let (mut program, block) = single_block(Stage::Fragment);
        program.info.constant_buffer_descriptors =
            vec![ConstantBufferDescriptor { index: 0, count: 1 }];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let offset = ir.load_local(Value::U32(0));
        let value = ir.get_cbuf_u32(Value::U32(0), offset);
        ir.write_local(Value::U32(1), value);

        assert_eq!(
            vec![
                Op::AccessChain,
                Op::Load,
                Op::ShiftRightLogical,
                Op::ShiftRightLogical,
                Op::BitwiseAnd,
                Op::AccessChain,
                Op::Load,
                Op::AccessChain,
                Op::Store,
                Op::Return
            ],
            ops(&emit(&program))
        );
    }

    #[test]
    fn storage_buffer_access() {
        let (mut program, block) = single_block(Stage::Compute);
        program.info.storage_buffers_descriptors = vec![StorageBufferDescriptor {
            cbuf_index: 0,
            cbuf_offset: 0x110,
            count: 1,
            is_written: true,
        }];
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let wide = ir.emit(Opcode::LoadStorage64, &[Value::U32(0), Value::U32(8)]);
        ir.emit(Opcode::WriteStorage64, &[Value::U32(0), Value::U32(16), wide]);
        let old = ir.emit(
            Opcode::StorageAtomicIAdd32,
            &[Value::U32(0), Value::U32(4), Value::U32(1)],
        );
        ir.write_local(Value::U32(0), old);

        assert_eq!(
            vec![
                Op::AccessChain,
                Op::Load,
                Op::AccessChain,
                Op::Load,
                Op::CompositeConstruct,
                Op::CompositeExtract,
                Op::AccessChain,
                Op::Store,
                Op::CompositeExtract,
                Op::AccessChain,
                Op::Store,
                Op::AccessChain,
                Op::AtomicIAdd,
                Op::AccessChain,
                Op::Store,
                Op::Return
            ],
            ops(&emit(&program))
        );
    }

    #[test]
    fn shared_sub_word_writes_are_atomic() {
        let (mut program, block) = single_block(Stage::Compute);
        program.shared_memory_size = 64;
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let value = ir.load_shared(Opcode::LoadSharedU32, Value::U32(8));
        ir.write_shared(Opcode::WriteSharedU8, Value::U32(13), value);

        assert_eq!(
            vec![
                Op::AccessChain,
                Op::Load,
                Op::AccessChain,
                Op::ShiftLeftLogical,
                Op::Not,
                Op::AtomicAnd,
                Op::BitwiseAnd,
                Op::ShiftLeftLogical,
                Op::AtomicOr,
                Op::Return
            ],
            ops(&emit(&program))
        );
    }
}
