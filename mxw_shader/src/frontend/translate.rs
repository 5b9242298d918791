//! Translation of the non control instructions of a block into IR.
//!
//! Each instruction family lives in its own module and extends [TranslatorVisitor].
use log::trace;

use super::control_flow::Cfg;
use super::decode::{decode, MaxwellOp, Src};
use super::instruction::Instruction;
use crate::environment::Environment;
use crate::error::CompileError;
use crate::ir::{BlockId, IrEmitter, ObjectPool, Pred, Reg, Value};
use crate::{invalid_argument, not_implemented};

mod float;
mod integer;
mod memory;
mod misc;
mod texture;

pub(crate) struct TranslatorVisitor<'p, 'e> {
    pub ir: IrEmitter<'p>,
    pub env: &'e mut dyn Environment,
    /// The address of the instruction being translated.
    pub pc: u32,
}

/// Translate the instructions of the guest block `flow` at the end of `block`.
pub(crate) fn translate_block(
    env: &mut dyn Environment,
    pool: &mut ObjectPool,
    block: BlockId,
    cfg: &Cfg,
    flow: usize,
) -> Result<(), CompileError> {
    let mut visitor = TranslatorVisitor {
        ir: IrEmitter::new(pool, block),
        env,
        pc: 0,
    };
    for address in cfg.addresses(flow) {
        let word = visitor.env.read_instruction(address)?;
        let op = decode(word, address)?;
        // Control instructions are already part of the structured control flow.
        if op.is_control_flow() || matches!(op, MaxwellOp::Ssy | MaxwellOp::Pbk | MaxwellOp::Nop) {
            continue;
        }
        visitor.pc = address;
        visitor.visit(op, Instruction(word))?;
    }
    Ok(())
}

impl TranslatorVisitor<'_, '_> {
    fn visit(&mut self, op: MaxwellOp, insn: Instruction) -> Result<(), CompileError> {
        trace!("{:#06x}: {op:?}", self.pc);
        match op {
            MaxwellOp::Mov(src) => self.mov(insn, src),
            MaxwellOp::Mov32i => self.mov32i(insn),
            MaxwellOp::Iadd(src) => self.iadd(insn, src),
            MaxwellOp::Iadd32i => self.iadd32i(insn),
            MaxwellOp::Iadd3(src) => self.iadd3(insn, src),
            MaxwellOp::Iscadd(src) => self.iscadd(insn, src),
            MaxwellOp::Shl(src) => self.shl(insn, src),
            MaxwellOp::Shr(src) => self.shr(insn, src),
            MaxwellOp::Lop(src) => self.lop(insn, src),
            MaxwellOp::Lop32i => self.lop32i(insn),
            MaxwellOp::Isetp(src) => self.isetp(insn, src),
            MaxwellOp::Imnmx(src) => self.imnmx(insn, src),
            MaxwellOp::Sel(src) => self.sel(insn, src),
            MaxwellOp::Psetp => self.psetp(insn),
            MaxwellOp::Fadd(src) => self.fadd(insn, src),
            MaxwellOp::Fadd32i => self.fadd32i(insn),
            MaxwellOp::Fmul(src) => self.fmul(insn, src),
            MaxwellOp::Fmul32i => self.fmul32i(insn),
            MaxwellOp::Ffma(src) => self.ffma(insn, src),
            MaxwellOp::Fmnmx(src) => self.fmnmx(insn, src),
            MaxwellOp::Fsetp(src) => self.fsetp(insn, src),
            MaxwellOp::Mufu => self.mufu(insn),
            MaxwellOp::I2f(src) => self.i2f(insn, src),
            MaxwellOp::F2i(src) => self.f2i(insn, src),
            MaxwellOp::Ldg => self.ldg(insn),
            MaxwellOp::Stg => self.stg(insn),
            MaxwellOp::Ldc => self.ldc(insn),
            MaxwellOp::Ldl => self.ldl(insn),
            MaxwellOp::Stl => self.stl(insn),
            MaxwellOp::Lds => self.lds(insn),
            MaxwellOp::Sts => self.sts(insn),
            MaxwellOp::Ald => self.ald(insn),
            MaxwellOp::Ast => self.ast(insn),
            MaxwellOp::Ipa => self.ipa(insn),
            MaxwellOp::Tex => self.tex(insn, false),
            MaxwellOp::TexB => self.tex(insn, true),
            MaxwellOp::Tld => self.tld(insn),
            MaxwellOp::Sust => self.sust(insn),
            MaxwellOp::S2r => self.s2r(insn),
            MaxwellOp::Kil => self.kil(insn),
            MaxwellOp::Bar => self.bar(insn),
            MaxwellOp::Membar => self.membar(insn),
            MaxwellOp::Vote => self.vote(insn),
            MaxwellOp::Shfl => self.shfl(insn),
            MaxwellOp::Bra
            | MaxwellOp::Brk
            | MaxwellOp::Exit
            | MaxwellOp::Sync
            | MaxwellOp::Ssy
            | MaxwellOp::Pbk
            | MaxwellOp::Nop => Ok(()),
        }
    }

    pub fn x(&mut self, reg: Reg) -> Value {
        self.ir.get_reg(reg)
    }

    pub fn f(&mut self, reg: Reg) -> Value {
        let value = self.x(reg);
        self.ir.bit_cast_to_float(value)
    }

    /// A 64-bit float from an aligned register pair.
    pub fn d(&mut self, reg: Reg) -> Result<Value, CompileError> {
        if !reg.is_aligned(2) {
            return Err(not_implemented!("Unaligned source register {reg}"));
        }
        let lo = self.x(reg);
        let hi = self.x(reg.offset(1));
        let vector = self.ir.composite_construct(&[lo, hi]);
        Ok(self.ir.pack_double_2x32(vector))
    }

    pub fn set_x(&mut self, reg: Reg, value: Value) {
        self.ir.set_reg(reg, value);
    }

    pub fn set_f(&mut self, reg: Reg, value: Value) {
        let value = self.ir.bit_cast_to_uint(value);
        self.set_x(reg, value);
    }

    pub fn set_d(&mut self, reg: Reg, value: Value) -> Result<(), CompileError> {
        if !reg.is_aligned(2) {
            return Err(not_implemented!("Unaligned destination register {reg}"));
        }
        let vector = self.ir.unpack_double_2x32(value);
        self.set_vector(reg, vector, 2);
        Ok(())
    }

    /// Write the first `count` components of a vector to consecutive registers.
    pub fn set_vector(&mut self, reg: Reg, vector: Value, count: u8) {
        for i in 0..count {
            let element = self.ir.composite_extract(vector, i as u32);
            self.set_x(reg.offset(i), element);
        }
    }

    /// Read `count` consecutive registers into a vector or a scalar for a single register.
    pub fn get_vector(&mut self, reg: Reg, count: u8) -> Value {
        let elements: Vec<_> = (0..count).map(|i| self.x(reg.offset(i))).collect();
        if elements.len() == 1 {
            elements[0]
        } else {
            self.ir.composite_construct(&elements)
        }
    }

    pub fn cbuf_u32(&mut self, insn: Instruction) -> Value {
        let (index, offset) = insn.cbuf();
        self.ir.get_cbuf_u32(Value::U32(index), Value::U32(offset))
    }

    pub fn cbuf_f32(&mut self, insn: Instruction) -> Value {
        let (index, offset) = insn.cbuf();
        self.ir.get_cbuf_f32(Value::U32(index), Value::U32(offset))
    }

    /// The integer second operand from a register, constant buffer, or immediate.
    pub fn src_b(&mut self, insn: Instruction, src: Src) -> Value {
        match src {
            Src::Reg => self.x(insn.src_b()),
            Src::Cbuf => self.cbuf_u32(insn),
            Src::Imm => Value::U32(insn.imm20()),
        }
    }

    /// The float second operand from a register, constant buffer, or immediate.
    pub fn float_src_b(&mut self, insn: Instruction, src: Src) -> Value {
        match src {
            Src::Reg => self.f(insn.src_b()),
            Src::Cbuf => self.cbuf_f32(insn),
            Src::Imm => Value::F32(insn.float_imm20()),
        }
    }

    pub fn pred(&mut self, pred: Pred, negate: bool) -> Value {
        self.ir.get_pred(pred, negate)
    }
}

/// Combine two predicates with the boolean operation in a 2-bit field.
fn predicate_combine(
    ir: &mut IrEmitter,
    a: Value,
    b: Value,
    op: u64,
) -> Result<Value, CompileError> {
    match op {
        0 => Ok(ir.logical_and(a, b)),
        1 => Ok(ir.logical_or(a, b)),
        2 => Ok(ir.logical_xor(a, b)),
        _ => Err(invalid_argument!("Invalid boolean operation {op}")),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ir::Opcode;
    use pretty_assertions::assert_eq;

    /// Translate a single instruction into a new block and return the emitted opcodes.
    pub fn translate_one(insn: u64) -> Result<(ObjectPool, BlockId), CompileError> {
        let sph = mxw_lib::header::ProgramHeader::from_bytes(&[0u8; 0x50]).unwrap();
        let mut env = crate::environment::test_environment(mxw_lib::Stage::Compute, sph, &[insn]);
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        let mut visitor = TranslatorVisitor {
            ir: IrEmitter::new(&mut pool, block),
            env: &mut env,
            pc: 8,
        };
        let op = decode(insn, 8)?;
        visitor.visit(op, Instruction(insn))?;
        Ok((pool, block))
    }

    pub fn opcodes(insn: u64) -> Vec<Opcode> {
        let (pool, block) = translate_one(insn).unwrap();
        pool.block(block)
            .instructions()
            .iter()
            .map(|i| pool.opcode(*i))
            .collect()
    }

    #[test]
    fn skip_control_instructions() {
        let sph = mxw_lib::header::ProgramHeader::from_bytes(&[0u8; 0x50]).unwrap();
        // MOV32I R0, 0x3f800000; NOP; EXIT
        let mut env = crate::environment::test_environment(
            mxw_lib::Stage::Compute,
            sph,
            &[0x0103f80000070000, 0x50b0000000070f00, 0xe30000000007000f],
        );
        let cfg = Cfg::new(&mut env, 0).unwrap();
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        translate_block(&mut env, &mut pool, block, &cfg, 0).unwrap();
        let ops: Vec<_> = pool
            .block(block)
            .instructions()
            .iter()
            .map(|i| pool.opcode(*i))
            .collect();
        assert_eq!(vec![Opcode::SetRegister], ops);
    }
}
