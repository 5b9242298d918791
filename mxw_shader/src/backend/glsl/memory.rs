use super::instructions::swizzle;
use super::EmitContext;
use crate::error::CompileError;
use crate::ir::{InstId, Opcode, Value};
use crate::logic_error;

/// A byte offset known at compile time or computed by an expression.
enum Offset {
    Immediate(u32),
    Dynamic(String),
}

impl Offset {
    /// The offset `bytes` after this one.
    fn add(&self, bytes: u32) -> Offset {
        match self {
            Offset::Immediate(o) => Offset::Immediate(o + bytes),
            Offset::Dynamic(o) if bytes == 0 => Offset::Dynamic(o.clone()),
            Offset::Dynamic(o) => Offset::Dynamic(format!("({o} + {bytes}u)")),
        }
    }

    /// The index of the 32-bit word containing this offset.
    fn word(&self) -> String {
        match self {
            Offset::Immediate(o) => format!("{}u", o / 4),
            Offset::Dynamic(o) => format!("{o} >> 2"),
        }
    }

    /// The bit offset of this byte offset in its word.
    fn bit(&self) -> String {
        match self {
            Offset::Immediate(o) => format!("{}", (o % 4) * 8),
            Offset::Dynamic(o) => format!("int(({o} & 3u) * 8u)"),
        }
    }
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

fn extract(word: &str, bit: &str, bits: u32, is_signed: bool) -> String {
    if is_signed {
        format!("uint(bitfieldExtract(int({word}), {bit}, {bits}))")
    } else {
        format!("bitfieldExtract({word}, {bit}, {bits})")
    }
}

/// The number of 32-bit words for wide accesses.
fn word_count(op: Opcode) -> usize {
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

impl EmitContext<'_> {
    fn offset(&mut self, inst: InstId, index: usize) -> Result<Offset, CompileError> {
        let value = self.program.pool.resolve(self.program.pool.inst(inst).arg(index));
        match value {
            Value::U32(offset) => Ok(Offset::Immediate(offset)),
            _ => self.a(inst, index).map(Offset::Dynamic),
        }
    }

    /// A 32-bit word from a constant buffer declared as an array of `uvec4`.
    fn cbuf_word(name: &str, offset: &Offset) -> Result<String, CompileError> {
        match offset {
            Offset::Immediate(o) => Ok(format!("{name}[{}].{}", o / 16, swizzle((o / 4) % 4)?)),
            Offset::Dynamic(o) => Ok(format!("{name}[{o} >> 4][({o} >> 2) & 3u]")),
        }
    }

    pub(super) fn emit_get_cbuf(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let index = self.imm(inst, 0)?;
        self.a(inst, 0)?;
        if !self
            .program
            .info
            .constant_buffer_descriptors
            .iter()
            .any(|d| d.index == index)
        {
            return Err(logic_error!("Constant buffer {index} has no descriptor"));
        }
        let name = format!("{}_cbuf{index}", self.prefix());
        let offset = self.offset(inst, 1)?;

        let expr = match op {
            Opcode::GetCbufU32 => Self::cbuf_word(&name, &offset)?,
            Opcode::GetCbufF32 => format!("uintBitsToFloat({})", Self::cbuf_word(&name, &offset)?),
            Opcode::GetCbufU32x2 => format!(
                "uvec2({}, {})",
                Self::cbuf_word(&name, &offset)?,
                Self::cbuf_word(&name, &offset.add(4))?
            ),
            op => {
                let (bits, is_signed) =
                    sub_word(op).ok_or_else(|| logic_error!("{op:?} is not a cbuf read"))?;
                let word = Self::cbuf_word(&name, &offset)?;
                extract(&word, &offset.bit(), bits, is_signed)
            }
        };
        self.define_result(inst, expr)
    }

    fn ssbo_name(&mut self, inst: InstId) -> Result<String, CompileError> {
        let index = self.imm(inst, 0)?;
        self.a(inst, 0)?;
        if index as usize >= self.program.info.storage_buffers_descriptors.len() {
            return Err(logic_error!("Storage buffer {index} has no descriptor"));
        }
        Ok(format!("{}_ssbo{index}", self.prefix()))
    }

    fn load_words(array: &str, offset: &Offset, op: Opcode) -> String {
        let words: Vec<_> = (0..word_count(op) as u32)
            .map(|i| format!("{array}[{}]", offset.add(i * 4).word()))
            .collect();
        match words.len() {
            1 => words.join(""),
            n => format!("uvec{n}({})", words.join(", ")),
        }
    }

    /// Write `value` to `array` at a byte `offset` with the width of `op`.
    fn store_words(
        &mut self,
        array: &str,
        offset: &Offset,
        op: Opcode,
        value: &str,
    ) -> Result<(), CompileError> {
        if let Some((bits, _)) = sub_word(op) {
            // Neighboring bytes may be written by other invocations.
            let word = format!("{array}[{}]", offset.word());
            let bit = offset.bit();
            let mask = (1u32 << bits) - 1;
            self.line(format_args!(
                "atomicAnd({word}, ~({mask:#x}u << {bit}));"
            ));
            self.line(format_args!(
                "atomicOr({word}, ({value} & {mask:#x}u) << {bit});"
            ));
            return Ok(());
        }
        match word_count(op) {
            1 => self.line(format_args!("{array}[{}] = {value};", offset.word())),
            n => {
                for i in 0..n as u32 {
                    let component = swizzle(i)?;
                    self.line(format_args!(
                        "{array}[{}] = {value}.{component};",
                        offset.add(i * 4).word()
                    ));
                }
            }
        }
        Ok(())
    }

    pub(super) fn emit_load_storage(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let name = self.ssbo_name(inst)?;
        let offset = self.offset(inst, 1)?;
        let expr = match sub_word(op) {
            Some((bits, is_signed)) => {
                let word = format!("{name}[{}]", offset.word());
                extract(&word, &offset.bit(), bits, is_signed)
            }
            None => Self::load_words(&name, &offset, op),
        };
        self.define_result(inst, expr)
    }

    pub(super) fn emit_write_storage(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let name = self.ssbo_name(inst)?;
        let offset = self.offset(inst, 1)?;
        let value = self.a(inst, 2)?;
        self.store_words(&name, &offset, op, &value)
    }

    pub(super) fn emit_storage_atomic(
        &mut self,
        inst: InstId,
        function: &str,
    ) -> Result<(), CompileError> {
        let name = self.ssbo_name(inst)?;
        let offset = self.offset(inst, 1)?;
        let value = self.a(inst, 2)?;
        self.define_result(inst, format!("{function}({name}[{}], {value})", offset.word()))
    }

    pub(super) fn emit_load_shared(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let offset = self.offset(inst, 0)?;
        let expr = match sub_word(op) {
            Some((bits, is_signed)) => {
                let word = format!("smem[{}]", offset.word());
                extract(&word, &offset.bit(), bits, is_signed)
            }
            None => Self::load_words("smem", &offset, op),
        };
        self.define_result(inst, expr)
    }

    pub(super) fn emit_write_shared(&mut self, inst: InstId, op: Opcode) -> Result<(), CompileError> {
        let offset = self.offset(inst, 0)?;
        let value = self.a(inst, 1)?;
        self.store_words("smem", &offset, op, &value)
    }
}
