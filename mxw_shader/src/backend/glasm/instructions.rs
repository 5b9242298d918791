use super::{f32_literal, EmitContext, BACKEND};
use crate::backend::unsupported;
use crate::error::CompileError;
use crate::ir::{InstId, Opcode, Type, Value};
use crate::logic_error;

const XYZW: [char; 4] = ['x', 'y', 'z', 'w'];

pub(super) fn swizzle(element: u32) -> Result<char, CompileError> {
    XYZW.get(element as usize)
        .copied()
        .ok_or_else(|| logic_error!("Vector element {element} out of range"))
}

/// The comparison with the opposite result for ordered operands.
fn inverse_compare(mnemonic: &str) -> &'static str {
    match mnemonic {
        "SLT" => "SGE",
        "SGT" => "SLE",
        "SLE" => "SGT",
        "SGE" => "SLT",
        "SEQ" => "SNE",
        _ => "SEQ",
    }
}

impl EmitContext<'_> {
    /// The operand for argument `index` of `inst`.
    pub(super) fn a(&mut self, inst: InstId, index: usize) -> Result<String, CompileError> {
        let value = self.program.pool.inst(inst).arg(index);
        self.arg(value)
    }

    pub(super) fn imm(&mut self, inst: InstId, index: usize) -> Result<u32, CompileError> {
        let value = self.program.pool.resolve(self.program.pool.inst(inst).arg(index));
        value.u32().ok_or_else(|| {
            logic_error!(
                "Argument {index} of {:?} must be an immediate",
                self.program.pool.opcode(inst)
            )
        })
    }

    fn args(&mut self, inst: InstId) -> Result<Vec<String>, CompileError> {
        (0..self.program.pool.inst(inst).num_args())
            .map(|i| self.a(inst, i))
            .collect()
    }

    /// Emit `mnemonic` with the result followed by every argument as operands.
    fn op(&mut self, inst: InstId, mnemonic: &str) -> Result<(), CompileError> {
        let args = self.args(inst)?;
        if let Some(ret) = self.define(inst)? {
            let cc = self.cc(inst);
            self.line(format_args!("{mnemonic}{cc} {ret},{};", args.join(",")));
        }
        self.emit_pseudo_operations(inst)
    }

    /// Write a boolean from the condition code set by a float comparison.
    fn float_compare(&mut self, inst: InstId, mnemonic: &str, ordered: bool) -> Result<(), CompileError> {
        let a = self.a(inst, 0)?;
        let b = self.a(inst, 1)?;
        let Some(ret) = self.define(inst)? else {
            return Ok(());
        };
        // Unordered comparisons test the inverse ordered comparison.
        let (mnemonic, set, unset) = if ordered {
            (mnemonic, "-1", "0")
        } else {
            (inverse_compare(mnemonic), "0", "-1")
        };
        self.line(format_args!("{mnemonic}.F.CC RC.x,{a},{b};"));
        self.line(format_args!("MOV.S {ret},{unset};"));
        self.line(format_args!("MOV.S {ret}(NE.x),{set};"));
        Ok(())
    }

    /// The negation of argument `index` folding immediates.
    fn negated(&mut self, inst: InstId, index: usize) -> Result<String, CompileError> {
        let value = self.program.pool.resolve(self.program.pool.inst(inst).arg(index));
        match value {
            Value::F32(v) => Ok(f32_literal(-v)),
            Value::F64(v) => Ok(format!("{:?}", -v)),
            _ => self.a(inst, index).map(|a| format!("-{a}")),
        }
    }

    fn statement(&mut self, text: &str) -> Result<(), CompileError> {
        self.line(text);
        Ok(())
    }

    fn constant(&mut self, inst: InstId, mnemonic: &str, value: &str) -> Result<(), CompileError> {
        if let Some(ret) = self.define(inst)? {
            self.line(format_args!("{mnemonic} {ret},{value};"));
        }
        Ok(())
    }

    pub(super) fn emit_inst(&mut self, inst: InstId) -> Result<(), CompileError> {
        let op = self.program.pool.opcode(inst);
        match op {
            Opcode::Phi | Opcode::Identity | Opcode::Void | Opcode::Join => Ok(()),
            Opcode::ConditionRef => self.op(inst, "MOV.S"),
            Opcode::Reference => self.a(inst, 0).map(|_| ()),
            Opcode::PhiMove => self.emit_phi_move(inst),

            Opcode::Prologue => self.emit_prologue(),
            Opcode::Epilogue => self.emit_epilogue(),
            Opcode::DemoteToHelperInvocation => self.statement("KIL TR.x;"),
            Opcode::EmitVertex => {
                let stream = self.imm(inst, 0)?;
                self.a(inst, 0)?;
                match stream {
                    0 => self.line("EMIT;"),
                    s => self.line(format_args!("EMITS {s};")),
                }
                Ok(())
            }
            Opcode::EndPrimitive => {
                self.a(inst, 0)?;
                self.statement("ENDPRIM;")
            }
            Opcode::Barrier => self.statement("BAR;"),
            Opcode::WorkgroupMemoryBarrier => self.statement("MEMBAR.CTA;"),
            Opcode::DeviceMemoryBarrier => self.statement("MEMBAR;"),

            Opcode::GetRegister
            | Opcode::SetRegister
            | Opcode::GetPred
            | Opcode::SetPred
            | Opcode::GetZFlag
            | Opcode::GetSFlag
            | Opcode::GetCFlag
            | Opcode::GetOFlag
            | Opcode::SetZFlag
            | Opcode::SetSFlag
            | Opcode::SetCFlag
            | Opcode::SetOFlag => Err(logic_error!("{op:?} must be removed by the SSA pass")),

            Opcode::GetCbufU8
            | Opcode::GetCbufS8
            | Opcode::GetCbufU16
            | Opcode::GetCbufS16
            | Opcode::GetCbufU32
            | Opcode::GetCbufF32
            | Opcode::GetCbufU32x2 => self.emit_get_cbuf(inst, op),

            Opcode::GetAttribute => self.emit_get_attribute(inst, false),
            Opcode::GetAttributeU32 => self.emit_get_attribute(inst, true),
            Opcode::SetAttribute => self.emit_set_attribute(inst),
            Opcode::GetPatch => self.emit_get_patch(inst),
            Opcode::SetPatch => self.emit_set_patch(inst),
            Opcode::SetFragColor => {
                let target = self.imm(inst, 0)?;
                let component = swizzle(self.imm(inst, 1)?)?;
                self.a(inst, 0)?;
                self.a(inst, 1)?;
                let value = self.a(inst, 2)?;
                self.line(format_args!("MOV.F frag_color{target}.{component},{value};"));
                Ok(())
            }
            Opcode::SetSampleMask => {
                let value = self.a(inst, 0)?;
                self.line(format_args!("MOV.S result.samplemask.x,{value};"));
                Ok(())
            }
            Opcode::SetFragDepth => {
                let value = self.a(inst, 0)?;
                self.line(format_args!("MOV.F result.depth.z,{value};"));
                Ok(())
            }
            Opcode::WorkgroupId => self.constant(inst, "MOV.U", "invocation.groupid"),
            Opcode::LocalInvocationId => self.constant(inst, "MOV.U", "invocation.localid"),
            Opcode::InvocationId => self.constant(inst, "MOV.S", "primitive.invocation.x"),
            Opcode::SampleId => self.constant(inst, "MOV.S", "fragment.sampleid.x"),
            Opcode::IsHelperInvocation => {
                self.constant(inst, "MOV.S", "fragment.helperthread.x")
            }
            Opcode::YDirection => {
                let y = if self.runtime_info.y_negate { -1.0 } else { 1.0 };
                self.constant(inst, "MOV.F", &f32_literal(y))
            }

            Opcode::UndefU1 | Opcode::UndefU8 | Opcode::UndefU16 | Opcode::UndefU32 => {
                self.constant(inst, "MOV.S", "0")
            }
            Opcode::UndefU64 => self.constant(inst, "MOV.S64", "0"),

            Opcode::LoadStorageU8
            | Opcode::LoadStorageS8
            | Opcode::LoadStorageU16
            | Opcode::LoadStorageS16
            | Opcode::LoadStorage32
            | Opcode::LoadStorage64
            | Opcode::LoadStorage128 => self.emit_load_storage(inst, op),
            Opcode::WriteStorageU8
            | Opcode::WriteStorageS8
            | Opcode::WriteStorageU16
            | Opcode::WriteStorageS16
            | Opcode::WriteStorage32
            | Opcode::WriteStorage64
            | Opcode::WriteStorage128 => self.emit_write_storage(inst, op),
            Opcode::StorageAtomicIAdd32 => self.emit_storage_atomic(inst, "ADD"),
            Opcode::StorageAtomicExchange32 => self.emit_storage_atomic(inst, "EXCH"),
            Opcode::LoadLocal => {
                let offset = self.a(inst, 0)?;
                self.constant(inst, "MOV.U", &format!("lmem[{offset}].x"))
            }
            Opcode::WriteLocal => {
                let offset = self.a(inst, 0)?;
                let value = self.a(inst, 1)?;
                self.line(format_args!("MOV.U lmem[{offset}].x,{value};"));
                Ok(())
            }
            Opcode::LoadSharedU8
            | Opcode::LoadSharedS8
            | Opcode::LoadSharedU16
            | Opcode::LoadSharedS16
            | Opcode::LoadSharedU32
            | Opcode::LoadSharedU64
            | Opcode::LoadSharedU128 => self.emit_load_shared(inst, op),
            Opcode::WriteSharedU8
            | Opcode::WriteSharedU16
            | Opcode::WriteSharedU32
            | Opcode::WriteSharedU64
            | Opcode::WriteSharedU128 => self.emit_write_shared(inst, op),

            Opcode::CompositeConstructU32x2
            | Opcode::CompositeConstructU32x3
            | Opcode::CompositeConstructU32x4
            | Opcode::CompositeConstructF32x2
            | Opcode::CompositeConstructF32x3
            | Opcode::CompositeConstructF32x4 => self.emit_composite_construct(inst),
            Opcode::CompositeExtractU32x2
            | Opcode::CompositeExtractU32x3
            | Opcode::CompositeExtractU32x4
            | Opcode::CompositeExtractF32x2
            | Opcode::CompositeExtractF32x3
            | Opcode::CompositeExtractF32x4 => {
                let element = swizzle(self.imm(inst, 1)?)?;
                let vector = self.a(inst, 0)?;
                self.a(inst, 1)?;
                self.constant(inst, "MOV.U", &format!("{vector}.{element}"))
            }
            Opcode::CompositeInsertU32x2
            | Opcode::CompositeInsertU32x4
            | Opcode::CompositeInsertF32x4 => self.emit_composite_insert(inst),

            Opcode::SelectU1 | Opcode::SelectU32 | Opcode::SelectF32 => self.op(inst, "CMP.S"),
            Opcode::SelectU64 | Opcode::SelectF64 => {
                let cond = self.a(inst, 0)?;
                let a = self.a(inst, 1)?;
                let b = self.a(inst, 2)?;
                if let Some(ret) = self.define(inst)? {
                    self.line(format_args!("MOV.S.CC RC.x,{cond};"));
                    self.line(format_args!("MOV.U64 {ret},{b};"));
                    self.line(format_args!("MOV.U64 {ret}(NE.x),{a};"));
                }
                Ok(())
            }

            Opcode::BitCastU32F32 | Opcode::BitCastF32U32 => self.op(inst, "MOV.U"),
            Opcode::BitCastU64F64 | Opcode::BitCastF64U64 => self.op(inst, "MOV.U64"),
            Opcode::PackUint2x32 | Opcode::PackDouble2x32 => self.op(inst, "PK64.U"),
            Opcode::UnpackUint2x32 | Opcode::UnpackDouble2x32 => self.op(inst, "UP64.U"),
            Opcode::PackHalf2x16 => self.op(inst, "PK2H"),
            Opcode::UnpackHalf2x16 => self.op(inst, "UP2H"),

            // Emitted with the producer.
            Opcode::GetZeroFromOp
            | Opcode::GetSignFromOp
            | Opcode::GetCarryFromOp
            | Opcode::GetOverflowFromOp
            | Opcode::GetSparseFromOp
            | Opcode::GetInBoundsFromOp => Ok(()),

            Opcode::FPAbs32 => {
                let a = self.a(inst, 0)?;
                self.constant(inst, "MOV.F", &format!("|{a}|"))
            }
            Opcode::FPAbs64 => {
                let a = self.a(inst, 0)?;
                self.constant(inst, "MOV.F64", &format!("|{a}|"))
            }
            Opcode::FPAdd32 => self.op(inst, "ADD.F"),
            Opcode::FPAdd64 => self.op(inst, "ADD.F64"),
            Opcode::FPFma32 => self.op(inst, "MAD.F"),
            Opcode::FPFma64 => self.op(inst, "MAD.F64"),
            Opcode::FPMax32 => self.op(inst, "MAX.F"),
            Opcode::FPMax64 => self.op(inst, "MAX.F64"),
            Opcode::FPMin32 => self.op(inst, "MIN.F"),
            Opcode::FPMin64 => self.op(inst, "MIN.F64"),
            Opcode::FPMul32 => self.op(inst, "MUL.F"),
            Opcode::FPMul64 => self.op(inst, "MUL.F64"),
            Opcode::FPNeg32 => {
                let a = self.negated(inst, 0)?;
                self.constant(inst, "MOV.F", &a)
            }
            Opcode::FPNeg64 => {
                let a = self.negated(inst, 0)?;
                self.constant(inst, "MOV.F64", &a)
            }
            Opcode::FPRecip32 => self.op(inst, "RCP.F"),
            Opcode::FPRecip64 => self.op(inst, "RCP.F64"),
            Opcode::FPRecipSqrt32 => self.op(inst, "RSQ.F"),
            Opcode::FPRecipSqrt64 => self.op(inst, "RSQ.F64"),
            Opcode::FPSqrt => {
                let a = self.a(inst, 0)?;
                if let Some(ret) = self.define(inst)? {
                    self.line(format_args!("RSQ.F {ret},{a};"));
                    self.line(format_args!("RCP.F {ret},{ret};"));
                }
                Ok(())
            }
            Opcode::FPSin => self.op(inst, "SIN"),
            Opcode::FPCos => self.op(inst, "COS"),
            Opcode::FPExp2 => self.op(inst, "EX2"),
            Opcode::FPLog2 => self.op(inst, "LG2"),
            Opcode::FPSaturate32 => self.op(inst, "MOV.F.SAT"),
            Opcode::FPSaturate64 => self.op(inst, "MOV.F64.SAT"),
            Opcode::FPClamp32 => self.emit_clamp(inst, "F"),
            Opcode::FPRoundEven32 => self.op(inst, "ROUND.F"),
            Opcode::FPFloor32 => self.op(inst, "FLR.F"),
            Opcode::FPCeil32 => self.op(inst, "CEIL.F"),
            Opcode::FPTrunc32 => self.op(inst, "TRUNC.F"),
            Opcode::FPOrdEqual32 => self.float_compare(inst, "SEQ", true),
            Opcode::FPUnordEqual32 => self.float_compare(inst, "SNE", false),
            Opcode::FPOrdNotEqual32 | Opcode::FPUnordNotEqual32 => {
                self.float_compare(inst, "SNE", true)
            }
            Opcode::FPOrdLessThan32 => self.float_compare(inst, "SLT", true),
            Opcode::FPUnordLessThan32 => self.float_compare(inst, "SLT", false),
            Opcode::FPOrdGreaterThan32 => self.float_compare(inst, "SGT", true),
            Opcode::FPUnordGreaterThan32 => self.float_compare(inst, "SGT", false),
            Opcode::FPOrdLessThanEqual32 => self.float_compare(inst, "SLE", true),
            Opcode::FPUnordLessThanEqual32 => self.float_compare(inst, "SLE", false),
            Opcode::FPOrdGreaterThanEqual32 => self.float_compare(inst, "SGE", true),
            Opcode::FPUnordGreaterThanEqual32 => self.float_compare(inst, "SGE", false),
            Opcode::FPIsNan32 => {
                let a = self.a(inst, 0)?;
                if let Some(ret) = self.define(inst)? {
                    self.line(format_args!("SNE.F.CC RC.x,{a},{a};"));
                    self.line(format_args!("MOV.S {ret},0;"));
                    self.line(format_args!("MOV.S {ret}(NE.x),-1;"));
                }
                Ok(())
            }

            Opcode::IAdd32 => self.op(inst, "ADD.U"),
            Opcode::IAdd64 => self.op(inst, "ADD.U64"),
            Opcode::ISub32 => self.op(inst, "SUB.U"),
            Opcode::ISub64 => self.op(inst, "SUB.U64"),
            Opcode::IMul32 => self.op(inst, "MUL.S"),
            Opcode::INeg32 => {
                let a = self.a(inst, 0)?;
                self.constant(inst, "SUB.S", &format!("0,{a}"))
            }
            Opcode::INeg64 => {
                let a = self.a(inst, 0)?;
                self.constant(inst, "SUB.S64", &format!("0,{a}"))
            }
            Opcode::IAbs32 => self.op(inst, "ABS.S"),
            Opcode::ShiftLeftLogical32 => self.op(inst, "SHL.U"),
            Opcode::ShiftLeftLogical64 => self.op(inst, "SHL.U64"),
            Opcode::ShiftRightLogical32 => self.op(inst, "SHR.U"),
            Opcode::ShiftRightLogical64 => self.op(inst, "SHR.U64"),
            Opcode::ShiftRightArithmetic32 => self.op(inst, "SHR.S"),
            Opcode::ShiftRightArithmetic64 => self.op(inst, "SHR.S64"),
            Opcode::BitwiseAnd32 => self.op(inst, "AND.U"),
            Opcode::BitwiseOr32 => self.op(inst, "OR.U"),
            Opcode::BitwiseXor32 => self.op(inst, "XOR.U"),
            Opcode::BitwiseNot32 => self.op(inst, "NOT.S"),
            Opcode::BitFieldInsert => {
                let base = self.a(inst, 0)?;
                let insert = self.a(inst, 1)?;
                let offset = self.a(inst, 2)?;
                let count = self.a(inst, 3)?;
                if let Some(ret) = self.define(inst)? {
                    self.line(format_args!("MOV.U RC.x,{count};"));
                    self.line(format_args!("MOV.U RC.y,{offset};"));
                    self.line(format_args!("BFI.U {ret},RC,{insert},{base};"));
                }
                Ok(())
            }
            Opcode::BitFieldSExtract => self.emit_bitfield_extract(inst, "BFE.S"),
            Opcode::BitFieldUExtract => self.emit_bitfield_extract(inst, "BFE.U"),
            Opcode::BitReverse32 => self.op(inst, "BFR.U"),
            Opcode::BitCount32 => self.op(inst, "BTC.U"),
            Opcode::FindSMsb32 => self.op(inst, "BTFM.S"),
            Opcode::FindUMsb32 => self.op(inst, "BTFM.U"),
            Opcode::SMin32 => self.op(inst, "MIN.S"),
            Opcode::UMin32 => self.op(inst, "MIN.U"),
            Opcode::SMax32 => self.op(inst, "MAX.S"),
            Opcode::UMax32 => self.op(inst, "MAX.U"),
            Opcode::SClamp32 => self.emit_clamp(inst, "S"),
            Opcode::UClamp32 => self.emit_clamp(inst, "U"),
            Opcode::SLessThan => self.op(inst, "SLT.S"),
            Opcode::ULessThan => self.op(inst, "SLT.U"),
            Opcode::SLessThanEqual => self.op(inst, "SLE.S"),
            Opcode::ULessThanEqual => self.op(inst, "SLE.U"),
            Opcode::SGreaterThan => self.op(inst, "SGT.S"),
            Opcode::UGreaterThan => self.op(inst, "SGT.U"),
            Opcode::SGreaterThanEqual => self.op(inst, "SGE.S"),
            Opcode::UGreaterThanEqual => self.op(inst, "SGE.U"),
            Opcode::IEqual => self.op(inst, "SEQ.U"),
            Opcode::INotEqual => self.op(inst, "SNE.U"),

            Opcode::LogicalOr => self.op(inst, "OR.S"),
            Opcode::LogicalAnd => self.op(inst, "AND.S"),
            Opcode::LogicalXor => self.op(inst, "XOR.S"),
            Opcode::LogicalNot => self.op(inst, "NOT.S"),

            Opcode::ConvertS32F32 => self.op(inst, "CVT.S32.F32.TRUNC"),
            Opcode::ConvertU32F32 => self.op(inst, "CVT.U32.F32.TRUNC"),
            Opcode::ConvertS32F64 => self.op(inst, "CVT.S32.F64.TRUNC"),
            Opcode::ConvertF32S32 => self.op(inst, "CVT.F32.S32"),
            Opcode::ConvertF32U32 => self.op(inst, "CVT.F32.U32"),
            Opcode::ConvertF64S32 => self.op(inst, "CVT.F64.S32"),
            Opcode::ConvertF64U32 => self.op(inst, "CVT.F64.U32"),
            Opcode::ConvertF32F64 => self.op(inst, "CVT.F32.F64"),
            Opcode::ConvertF64F32 => self.op(inst, "CVT.F64.F32"),
            Opcode::ConvertU32U64 => self.op(inst, "CVT.U32.U64"),
            Opcode::ConvertU64U32 => self.op(inst, "CVT.U64.U32"),

            Opcode::ImageSampleImplicitLod
            | Opcode::ImageSampleExplicitLod
            | Opcode::ImageSampleDrefImplicitLod => self.emit_image_sample(inst, op),
            Opcode::ImageFetch => self.emit_image_fetch(inst),
            Opcode::ImageQueryDimensions => self.emit_image_query_dimensions(inst),
            Opcode::ImageRead => self.emit_image_read(inst),
            Opcode::ImageWrite => self.emit_image_write(inst),

            Opcode::LaneId => self.constant(inst, "MOV.U", "invocation.threadid"),
            Opcode::VoteAll => self.emit_vote(inst, "TGALL.S"),
            Opcode::VoteAny => self.emit_vote(inst, "TGANY.S"),
            Opcode::VoteEqual => self.emit_vote(inst, "TGEQ.S"),
            Opcode::SubgroupBallot => self.op(inst, "TGBALLOT"),

            // Half floats are lowered to 32-bit floats before emitting assembly.
            op => Err(unsupported(BACKEND, op)),
        }
    }

    fn emit_phi_move(&mut self, inst: InstId) -> Result<(), CompileError> {
        let pool = &self.program.pool;
        let phi = pool
            .resolve_inst(pool.inst(inst).arg(0))
            .filter(|p| pool.inst(*p).is_phi())
            .ok_or_else(|| logic_error!("PhiMove target is not a phi"))?;
        let reg = self.phi_reg(phi)?;
        self.discard_arg(Value::Inst(phi));
        let value = self.a(inst, 1)?;
        self.line(format_args!("MOV.{} {reg},{value};", reg.move_type()));
        Ok(())
    }

    fn emit_composite_construct(&mut self, inst: InstId) -> Result<(), CompileError> {
        let args = self.args(inst)?;
        let ty = self.program.pool.inst(inst).result_type();
        let suffix = match ty {
            Type::F32X2 | Type::F32X3 | Type::F32X4 => "F",
            _ => "U",
        };
        if let Some(ret) = self.define(inst)? {
            for (i, arg) in args.iter().enumerate() {
                let component = swizzle(i as u32)?;
                self.line(format_args!("MOV.{suffix} {ret}.{component},{arg};"));
            }
        }
        Ok(())
    }

    fn emit_composite_insert(&mut self, inst: InstId) -> Result<(), CompileError> {
        let element = swizzle(self.imm(inst, 2)?)?;
        let vector = self.a(inst, 0)?;
        let value = self.a(inst, 1)?;
        self.a(inst, 2)?;
        if let Some(ret) = self.define(inst)? {
            self.line(format_args!("MOV.U {ret},{vector};"));
            self.line(format_args!("MOV.U {ret}.{element},{value};"));
        }
        Ok(())
    }

    fn emit_clamp(&mut self, inst: InstId, ty: &str) -> Result<(), CompileError> {
        let value = self.a(inst, 0)?;
        let min = self.a(inst, 1)?;
        let max = self.a(inst, 2)?;
        if let Some(ret) = self.define(inst)? {
            self.line(format_args!("MIN.{ty} RC.x,{value},{max};"));
            self.line(format_args!("MAX.{ty} {ret},RC.x,{min};"));
        }
        Ok(())
    }

    /// The count and offset are packed into the first operand.
    fn emit_bitfield_extract(&mut self, inst: InstId, mnemonic: &str) -> Result<(), CompileError> {
        let base = self.a(inst, 0)?;
        let offset = self.a(inst, 1)?;
        let count = self.a(inst, 2)?;
        if let Some(ret) = self.define(inst)? {
            self.line(format_args!("MOV.U RC.x,{count};"));
            self.line(format_args!("MOV.U RC.y,{offset};"));
            self.line(format_args!("{mnemonic} {ret},RC,{base};"));
        }
        Ok(())
    }

    fn emit_vote(&mut self, inst: InstId, mnemonic: &str) -> Result<(), CompileError> {
        if self.profile.support_vote {
            self.op(inst, mnemonic)
        } else {
            // A single invocation votes for the whole warp.
            self.op(inst, "MOV.S")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::glasm::tests::{body, emit, single_block};
    use crate::backend::glasm::emit_glasm;
    use crate::backend::Bindings;
    use crate::error::CompileError;
    use crate::ir::{FpCompare, FpControl, IrEmitter, Opcode, Value};
    use crate::profile::{Profile, RuntimeInfo};
    use indoc::indoc;
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;

    #[test]
    fn unordered_float_compare() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let lane = ir.lane_id();
        let x = ir.bit_cast_to_float(lane);
        let neg = ir.fp_neg(Value::F32(-0.5));
        let sum = ir.fp_add(x, neg, FpControl::default());
        let lt = ir.fp_compare(FpCompare::LessThan, sum, Value::F32(2.0), false);
        let value = ir.select(lt, Value::U32(1), Value::U32(2));
        ir.write_local(Value::U32(0), value);

        assert_eq!(
            indoc! {"
                MOV.U R0.x,invocation.threadid;
                MOV.U R1.x,R0.x;
                MOV.F R0.x,0.5;
                ADD.F R2.x,R1.x,R0.x;
                SGE.F.CC RC.x,R2.x,2.0;
                MOV.S R0.x,-1;
                MOV.S R0.x(NE.x),0;
                CMP.S R1.x,R0.x,1,2;
                MOV.U lmem[0].x,R1.x;
                RET;
            "},
            body(&emit(&program))
        );
    }

    #[test]
    fn bitfield_extract_packs_operands() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let lane = ir.lane_id();
        let bits = ir.emit(Opcode::BitFieldUExtract, &[lane, Value::U32(4), Value::U32(8)]);
        ir.write_local(Value::U32(2), bits);

        assert_eq!(
            indoc! {"
                MOV.U R0.x,invocation.threadid;
                MOV.U RC.x,8;
                MOV.U RC.y,4;
                BFE.U R1.x,RC,R0.x;
                MOV.U lmem[2].x,R1.x;
                RET;
            "},
            body(&emit(&program))
        );
    }

    #[test]
    fn vectors_use_whole_registers() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let lane = ir.lane_id();
        let vector = ir.composite_construct(&[lane, Value::U32(7)]);
        let y = ir.composite_extract(vector, 1);
        ir.write_local(Value::U32(0), y);

        assert_eq!(
            indoc! {"
                MOV.U R0.x,invocation.threadid;
                MOV.U R1.x,R0.x;
                MOV.U R1.y,7;
                MOV.U R0.x,R1.y;
                MOV.U lmem[0].x,R0.x;
                RET;
            "},
            body(&emit(&program))
        );
    }

    #[test]
    fn shuffles_are_unsupported() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let lane = ir.lane_id();
        let value = ir.emit(
            Opcode::ShuffleIndex,
            &[lane, Value::U32(0), Value::U32(31), Value::U32(0)],
        );
        ir.write_local(Value::U32(0), value);

        let result = emit_glasm(
            &Profile::default(),
            &RuntimeInfo::default(),
            &program,
            &mut Bindings::default(),
        );
        assert_eq!(
            Err(CompileError::UnsupportedOpcode {
                backend: "GLASM",
                opcode: Opcode::ShuffleIndex
            }),
            result
        );
    }
}
