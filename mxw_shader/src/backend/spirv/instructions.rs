use rspirv::dr::{self, Builder, Operand};
use rspirv::spirv::{self, Capability, Decoration, GLOp, MemorySemantics, Scope, Word};

use super::{EmitContext, BACKEND};
use crate::backend::unsupported;
use crate::error::CompileError;
use crate::ir::{FpControl, InstId, Opcode, Type, Value};
use crate::{logic_error, not_implemented};

type Unary = fn(&mut Builder, Word, Option<Word>, Word) -> Result<Word, dr::Error>;
type Binary = fn(&mut Builder, Word, Option<Word>, Word, Word) -> Result<Word, dr::Error>;
type Ternary = fn(&mut Builder, Word, Option<Word>, Word, Word, Word) -> Result<Word, dr::Error>;

impl EmitContext<'_> {
    /// The id for argument `index` of `inst`.
    pub(super) fn a(&mut self, inst: InstId, index: usize) -> Result<Word, CompileError> {
        let value = self.program.pool.inst(inst).arg(index);
        self.id(value)
    }

    /// A constant argument like a vector element index.
    pub(super) fn imm(&self, inst: InstId, index: usize) -> Result<u32, CompileError> {
        let value = self.program.pool.resolve(self.program.pool.inst(inst).arg(index));
        value.u32().ok_or_else(|| {
            logic_error!(
                "Argument {index} of {:?} must be an immediate",
                self.program.pool.opcode(inst)
            )
        })
    }

    fn unary(&mut self, inst: InstId, f: Unary) -> Result<Word, CompileError> {
        let ty = self.result_type(inst)?;
        let a = self.a(inst, 0)?;
        let id = self.def(inst);
        Ok(f(&mut self.builder, ty, Some(id), a)?)
    }

    fn binary(&mut self, inst: InstId, f: Binary) -> Result<Word, CompileError> {
        let ty = self.result_type(inst)?;
        let a = self.a(inst, 0)?;
        let b = self.a(inst, 1)?;
        let id = self.def(inst);
        Ok(f(&mut self.builder, ty, Some(id), a, b)?)
    }

    fn ternary(&mut self, inst: InstId, f: Ternary) -> Result<Word, CompileError> {
        let ty = self.result_type(inst)?;
        let a = self.a(inst, 0)?;
        let b = self.a(inst, 1)?;
        let c = self.a(inst, 2)?;
        let id = self.def(inst);
        Ok(f(&mut self.builder, ty, Some(id), a, b, c)?)
    }

    /// A GLSL.std.450 instruction with every argument of `inst`.
    fn glsl(&mut self, inst: InstId, op: GLOp) -> Result<Word, CompileError> {
        let args = (0..self.program.pool.inst(inst).num_args())
            .map(|i| self.a(inst, i).map(Operand::IdRef))
            .collect::<Result<Vec<_>, _>>()?;
        self.glsl_with(inst, op, args)
    }

    fn glsl_with(
        &mut self,
        inst: InstId,
        op: GLOp,
        args: Vec<Operand>,
    ) -> Result<Word, CompileError> {
        let ty = self.result_type(inst)?;
        let id = self.def(inst);
        let set = self.glsl;
        Ok(self.builder.ext_inst(ty, Some(id), set, op as u32, args)?)
    }

    /// Float arithmetic that respects the [FpControl] flags of `inst`.
    fn fp_binary(&mut self, inst: InstId, f: Binary) -> Result<(), CompileError> {
        let id = self.binary(inst, f)?;
        self.decorate_fp(inst, id);
        Ok(())
    }

    fn decorate_fp(&mut self, inst: InstId, id: Word) {
        let control = FpControl::from(self.program.pool.inst(inst).flags());
        if control.no_contraction() {
            self.builder.decorate(id, Decoration::NoContraction, []);
        }
    }

    /// Clamp using min and max for drivers that miscompile the clamp instructions.
    fn clamp(
        &mut self,
        inst: InstId,
        (clamp, min, max): (GLOp, GLOp, GLOp),
        bounds: Option<(Word, Word)>,
    ) -> Result<(), CompileError> {
        let value = self.a(inst, 0)?;
        let (low, high) = match bounds {
            Some(bounds) => bounds,
            None => (self.a(inst, 1)?, self.a(inst, 2)?),
        };
        if self.profile.has_broken_spirv_clamp {
            let ty = self.result_type(inst)?;
            let set = self.glsl;
            let lower = self.builder.ext_inst(
                ty,
                None,
                set,
                max as u32,
                [Operand::IdRef(value), Operand::IdRef(low)],
            )?;
            self.glsl_with(inst, min, vec![Operand::IdRef(lower), Operand::IdRef(high)])?;
        } else {
            self.glsl_with(
                inst,
                clamp,
                vec![
                    Operand::IdRef(value),
                    Operand::IdRef(low),
                    Operand::IdRef(high),
                ],
            )?;
        }
        Ok(())
    }

    /// The constants 0.0 and 1.0 in the float type of `inst`.
    fn unit_bounds(&mut self, inst: InstId) -> Result<(Word, Word), CompileError> {
        let ty = self.result_type(inst)?;
        match self.program.pool.inst(inst).result_type() {
            Type::F16 => Ok((self.null(ty), self.constant32(ty, 0x3c00))),
            Type::F64 => Ok((self.null(ty), self.id(Value::F64(1.0))?)),
            _ => Ok((self.null(ty), self.f32_const(1.0))),
        }
    }

    fn copy(&mut self, inst: InstId, value: Word) -> Result<(), CompileError> {
        let ty = self.result_type(inst)?;
        let id = self.def(inst);
        self.builder.copy_object(ty, Some(id), value)?;
        Ok(())
    }

    pub(super) fn emit_inst(&mut self, inst: InstId) -> Result<(), CompileError> {
        let op = self.program.pool.opcode(inst);
        match op {
            Opcode::Phi | Opcode::Identity | Opcode::Void | Opcode::Join => Ok(()),
            Opcode::ConditionRef => {
                let value = self.a(inst, 0)?;
                self.copy(inst, value)
            }
            Opcode::Reference => self.a(inst, 0).map(|_| ()),
            Opcode::PhiMove => Err(logic_error!("{op:?} is not valid in SSA form")),

            Opcode::Prologue => self.emit_prologue(),
            Opcode::Epilogue => self.emit_epilogue(),
            Opcode::DemoteToHelperInvocation => {
                if self.profile.support_demote_to_helper_invocation {
                    self.capability(Capability::DemoteToHelperInvocation);
                    if !self.supports_version(6) {
                        self.extension("SPV_EXT_demote_to_helper_invocation");
                    }
                    self.builder.demote_to_helper_invocation()?;
                    Ok(())
                } else {
                    // Killing ends the invocation but keeps the following code reachable.
                    let cond = self.bool_const(true);
                    self.emit_conditional_kill(cond)
                }
            }
            Opcode::EmitVertex | Opcode::EndPrimitive => {
                let stream = self.imm(inst, 0)?;
                if stream != 0 {
                    self.capability(Capability::GeometryStreams);
                }
                let stream_id = self.u32_const(stream);
                match (op, stream) {
                    (Opcode::EmitVertex, 0) => self.builder.emit_vertex()?,
                    (Opcode::EmitVertex, _) => self.builder.emit_stream_vertex(stream_id)?,
                    (_, 0) => self.builder.end_primitive()?,
                    (_, _) => self.builder.end_stream_primitive(stream_id)?,
                }
                Ok(())
            }

            Opcode::Barrier => {
                let execution = self.u32_const(Scope::Workgroup as u32);
                let semantics = self.u32_const(
                    (MemorySemantics::ACQUIRE_RELEASE | MemorySemantics::WORKGROUP_MEMORY).bits(),
                );
                self.builder
                    .control_barrier(execution, execution, semantics)?;
                Ok(())
            }
            Opcode::WorkgroupMemoryBarrier => {
                let scope = self.u32_const(Scope::Workgroup as u32);
                let semantics = self.u32_const(
                    (MemorySemantics::ACQUIRE_RELEASE | MemorySemantics::WORKGROUP_MEMORY).bits(),
                );
                self.builder.memory_barrier(scope, semantics)?;
                Ok(())
            }
            Opcode::DeviceMemoryBarrier => {
                let scope = self.u32_const(Scope::Device as u32);
                let semantics = self.u32_const(
                    (MemorySemantics::ACQUIRE_RELEASE
                        | MemorySemantics::UNIFORM_MEMORY
                        | MemorySemantics::WORKGROUP_MEMORY
                        | MemorySemantics::IMAGE_MEMORY)
                        .bits(),
                );
                self.builder.memory_barrier(scope, semantics)?;
                Ok(())
            }

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
            Opcode::SetFragColor => self.emit_set_frag_color(inst),
            Opcode::SetSampleMask => self.emit_set_sample_mask(inst),
            Opcode::SetFragDepth => self.emit_set_frag_depth(inst),
            Opcode::WorkgroupId => self.emit_builtin(inst, spirv::BuiltIn::WorkgroupId),
            Opcode::LocalInvocationId => {
                self.emit_builtin(inst, spirv::BuiltIn::LocalInvocationId)
            }
            Opcode::InvocationId => self.emit_builtin(inst, spirv::BuiltIn::InvocationId),
            Opcode::SampleId => {
                self.capability(Capability::SampleRateShading);
                self.emit_builtin(inst, spirv::BuiltIn::SampleId)
            }
            Opcode::IsHelperInvocation => {
                self.emit_builtin(inst, spirv::BuiltIn::HelperInvocation)
            }
            Opcode::YDirection => {
                let y = if self.runtime_info.y_negate { -1.0 } else { 1.0 };
                let value = self.f32_const(y);
                self.copy(inst, value)
            }

            Opcode::UndefU1
            | Opcode::UndefU8
            | Opcode::UndefU16
            | Opcode::UndefU32
            | Opcode::UndefU64 => {
                let ty = self.result_type(inst)?;
                let value = self.null(ty);
                self.copy(inst, value)
            }

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
            Opcode::StorageAtomicIAdd32 | Opcode::StorageAtomicExchange32 => {
                self.emit_storage_atomic(inst, op)
            }
            Opcode::LoadLocal => self.emit_load_local(inst),
            Opcode::WriteLocal => self.emit_write_local(inst),
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
            | Opcode::CompositeConstructF16x2
            | Opcode::CompositeConstructF32x2
            | Opcode::CompositeConstructF32x3
            | Opcode::CompositeConstructF32x4 => {
                let ty = self.result_type(inst)?;
                let elements = (0..self.program.pool.inst(inst).num_args())
                    .map(|i| self.a(inst, i))
                    .collect::<Result<Vec<_>, _>>()?;
                let id = self.def(inst);
                self.builder.composite_construct(ty, Some(id), elements)?;
                Ok(())
            }
            Opcode::CompositeExtractU32x2
            | Opcode::CompositeExtractU32x3
            | Opcode::CompositeExtractU32x4
            | Opcode::CompositeExtractF16x2
            | Opcode::CompositeExtractF32x2
            | Opcode::CompositeExtractF32x3
            | Opcode::CompositeExtractF32x4 => {
                let element = self.imm(inst, 1)?;
                let ty = self.result_type(inst)?;
                let vector = self.a(inst, 0)?;
                let id = self.def(inst);
                self.builder
                    .composite_extract(ty, Some(id), vector, [element])?;
                Ok(())
            }
            Opcode::CompositeInsertU32x2
            | Opcode::CompositeInsertU32x4
            | Opcode::CompositeInsertF32x4 => {
                let element = self.imm(inst, 2)?;
                let ty = self.result_type(inst)?;
                let vector = self.a(inst, 0)?;
                let value = self.a(inst, 1)?;
                let id = self.def(inst);
                self.builder
                    .composite_insert(ty, Some(id), value, vector, [element])?;
                Ok(())
            }

            Opcode::SelectU1
            | Opcode::SelectU32
            | Opcode::SelectU64
            | Opcode::SelectF32
            | Opcode::SelectF64 => self.ternary(inst, Builder::select).map(|_| ()),

            Opcode::BitCastU32F32
            | Opcode::BitCastF32U32
            | Opcode::BitCastU64F64
            | Opcode::BitCastF64U64
            | Opcode::PackUint2x32
            | Opcode::UnpackUint2x32
            | Opcode::PackFloat2x16
            | Opcode::UnpackFloat2x16
            | Opcode::PackDouble2x32
            | Opcode::UnpackDouble2x32 => self.unary(inst, Builder::bitcast).map(|_| ()),
            Opcode::BitCastU16F16 | Opcode::BitCastF16U16 => Err(unsupported(BACKEND, op)),
            Opcode::PackHalf2x16 => self.glsl(inst, GLOp::PackHalf2x16).map(|_| ()),
            Opcode::UnpackHalf2x16 => self.glsl(inst, GLOp::UnpackHalf2x16).map(|_| ()),

            // Defined by the instruction producing the secondary result.
            Opcode::GetZeroFromOp
            | Opcode::GetSignFromOp
            | Opcode::GetCarryFromOp
            | Opcode::GetOverflowFromOp
            | Opcode::GetSparseFromOp
            | Opcode::GetInBoundsFromOp => Ok(()),

            Opcode::FPAbs16 | Opcode::FPAbs32 | Opcode::FPAbs64 => {
                self.glsl(inst, GLOp::FAbs).map(|_| ())
            }
            Opcode::FPAdd16 | Opcode::FPAdd32 | Opcode::FPAdd64 => {
                self.fp_binary(inst, Builder::f_add)
            }
            Opcode::FPMul16 | Opcode::FPMul32 | Opcode::FPMul64 => {
                self.fp_binary(inst, Builder::f_mul)
            }
            Opcode::FPFma16 | Opcode::FPFma32 | Opcode::FPFma64 => {
                let id = self.glsl(inst, GLOp::Fma)?;
                self.decorate_fp(inst, id);
                Ok(())
            }
            Opcode::FPMax32 | Opcode::FPMax64 => self.glsl(inst, GLOp::FMax).map(|_| ()),
            Opcode::FPMin32 | Opcode::FPMin64 => self.glsl(inst, GLOp::FMin).map(|_| ()),
            Opcode::FPNeg16 | Opcode::FPNeg32 | Opcode::FPNeg64 => {
                self.unary(inst, Builder::f_negate).map(|_| ())
            }
            Opcode::FPRecip32 | Opcode::FPRecip64 => {
                let ty = self.result_type(inst)?;
                let one = if op == Opcode::FPRecip64 {
                    self.id(Value::F64(1.0))?
                } else {
                    self.f32_const(1.0)
                };
                let value = self.a(inst, 0)?;
                let id = self.def(inst);
                self.builder.f_div(ty, Some(id), one, value)?;
                Ok(())
            }
            Opcode::FPRecipSqrt32 | Opcode::FPRecipSqrt64 => {
                self.glsl(inst, GLOp::InverseSqrt).map(|_| ())
            }
            Opcode::FPSqrt => self.glsl(inst, GLOp::Sqrt).map(|_| ()),
            Opcode::FPSin => self.glsl(inst, GLOp::Sin).map(|_| ()),
            Opcode::FPCos => self.glsl(inst, GLOp::Cos).map(|_| ()),
            Opcode::FPExp2 => self.glsl(inst, GLOp::Exp2).map(|_| ()),
            Opcode::FPLog2 => self.glsl(inst, GLOp::Log2).map(|_| ()),
            Opcode::FPSaturate16 | Opcode::FPSaturate32 | Opcode::FPSaturate64 => {
                let bounds = self.unit_bounds(inst)?;
                self.clamp(inst, (GLOp::FClamp, GLOp::FMin, GLOp::FMax), Some(bounds))
            }
            Opcode::FPClamp32 => self.clamp(inst, (GLOp::FClamp, GLOp::FMin, GLOp::FMax), None),
            Opcode::FPRoundEven32 => self.glsl(inst, GLOp::RoundEven).map(|_| ()),
            Opcode::FPFloor32 => self.glsl(inst, GLOp::Floor).map(|_| ()),
            Opcode::FPCeil32 => self.glsl(inst, GLOp::Ceil).map(|_| ()),
            Opcode::FPTrunc32 => self.glsl(inst, GLOp::Trunc).map(|_| ()),
            Opcode::FPOrdEqual32 => self.binary(inst, Builder::f_ord_equal).map(|_| ()),
            Opcode::FPUnordEqual32 => self.binary(inst, Builder::f_unord_equal).map(|_| ()),
            Opcode::FPOrdNotEqual32 => self.binary(inst, Builder::f_ord_not_equal).map(|_| ()),
            Opcode::FPUnordNotEqual32 => {
                self.binary(inst, Builder::f_unord_not_equal).map(|_| ())
            }
            Opcode::FPOrdLessThan32 => self.binary(inst, Builder::f_ord_less_than).map(|_| ()),
            Opcode::FPUnordLessThan32 => {
                self.binary(inst, Builder::f_unord_less_than).map(|_| ())
            }
            Opcode::FPOrdGreaterThan32 => {
                self.binary(inst, Builder::f_ord_greater_than).map(|_| ())
            }
            Opcode::FPUnordGreaterThan32 => {
                self.binary(inst, Builder::f_unord_greater_than).map(|_| ())
            }
            Opcode::FPOrdLessThanEqual32 => {
                self.binary(inst, Builder::f_ord_less_than_equal).map(|_| ())
            }
            Opcode::FPUnordLessThanEqual32 => {
                self.binary(inst, Builder::f_unord_less_than_equal).map(|_| ())
            }
            Opcode::FPOrdGreaterThanEqual32 => {
                self.binary(inst, Builder::f_ord_greater_than_equal).map(|_| ())
            }
            Opcode::FPUnordGreaterThanEqual32 => {
                self.binary(inst, Builder::f_unord_greater_than_equal).map(|_| ())
            }
            Opcode::FPIsNan32 => self.unary(inst, Builder::is_nan).map(|_| ()),

            Opcode::IAdd32 => {
                let result = self.binary(inst, Builder::i_add)?;
                let operands = (self.a(inst, 0)?, self.a(inst, 1)?);
                self.emit_pseudo_operations(inst, result, Some(operands))
            }
            Opcode::IAdd64 => self.binary(inst, Builder::i_add).map(|_| ()),
            Opcode::ISub32 | Opcode::ISub64 => self.binary(inst, Builder::i_sub).map(|_| ()),
            Opcode::IMul32 => self.binary(inst, Builder::i_mul).map(|_| ()),
            Opcode::INeg32 | Opcode::INeg64 => self.unary(inst, Builder::s_negate).map(|_| ()),
            Opcode::IAbs32 => self.glsl(inst, GLOp::SAbs).map(|_| ()),
            Opcode::ShiftLeftLogical32 | Opcode::ShiftLeftLogical64 => {
                self.binary(inst, Builder::shift_left_logical).map(|_| ())
            }
            Opcode::ShiftRightLogical32 | Opcode::ShiftRightLogical64 => {
                self.binary(inst, Builder::shift_right_logical).map(|_| ())
            }
            Opcode::ShiftRightArithmetic32 | Opcode::ShiftRightArithmetic64 => {
                self.binary(inst, Builder::shift_right_arithmetic).map(|_| ())
            }
            Opcode::BitwiseAnd32 => {
                let result = self.binary(inst, Builder::bitwise_and)?;
                self.emit_pseudo_operations(inst, result, None)
            }
            Opcode::BitwiseOr32 => {
                let result = self.binary(inst, Builder::bitwise_or)?;
                self.emit_pseudo_operations(inst, result, None)
            }
            Opcode::BitwiseXor32 => {
                let result = self.binary(inst, Builder::bitwise_xor)?;
                self.emit_pseudo_operations(inst, result, None)
            }
            Opcode::BitwiseNot32 => self.unary(inst, Builder::not).map(|_| ()),
            Opcode::BitFieldInsert => {
                let ty = self.result_type(inst)?;
                let base = self.a(inst, 0)?;
                let insert = self.a(inst, 1)?;
                let offset = self.a(inst, 2)?;
                let count = self.a(inst, 3)?;
                let id = self.def(inst);
                self.builder
                    .bit_field_insert(ty, Some(id), base, insert, offset, count)?;
                Ok(())
            }
            Opcode::BitFieldSExtract => {
                self.ternary(inst, Builder::bit_field_s_extract).map(|_| ())
            }
            Opcode::BitFieldUExtract => {
                self.ternary(inst, Builder::bit_field_u_extract).map(|_| ())
            }
            Opcode::BitReverse32 => self.unary(inst, Builder::bit_reverse).map(|_| ()),
            Opcode::BitCount32 => self.unary(inst, Builder::bit_count).map(|_| ()),
            Opcode::FindSMsb32 => self.glsl(inst, GLOp::FindSMsb).map(|_| ()),
            Opcode::FindUMsb32 => self.glsl(inst, GLOp::FindUMsb).map(|_| ()),
            Opcode::SMin32 => self.glsl(inst, GLOp::SMin).map(|_| ()),
            Opcode::UMin32 => self.glsl(inst, GLOp::UMin).map(|_| ()),
            Opcode::SMax32 => self.glsl(inst, GLOp::SMax).map(|_| ()),
            Opcode::UMax32 => self.glsl(inst, GLOp::UMax).map(|_| ()),
            Opcode::SClamp32 => self.clamp(inst, (GLOp::SClamp, GLOp::SMin, GLOp::SMax), None),
            Opcode::UClamp32 => self.clamp(inst, (GLOp::UClamp, GLOp::UMin, GLOp::UMax), None),
            Opcode::SLessThan => self.binary(inst, Builder::s_less_than).map(|_| ()),
            Opcode::ULessThan => self.binary(inst, Builder::u_less_than).map(|_| ()),
            Opcode::IEqual => self.binary(inst, Builder::i_equal).map(|_| ()),
            Opcode::SLessThanEqual => self.binary(inst, Builder::s_less_than_equal).map(|_| ()),
            Opcode::ULessThanEqual => self.binary(inst, Builder::u_less_than_equal).map(|_| ()),
            Opcode::SGreaterThan => self.binary(inst, Builder::s_greater_than).map(|_| ()),
            Opcode::UGreaterThan => self.binary(inst, Builder::u_greater_than).map(|_| ()),
            Opcode::INotEqual => self.binary(inst, Builder::i_not_equal).map(|_| ()),
            Opcode::SGreaterThanEqual => {
                self.binary(inst, Builder::s_greater_than_equal).map(|_| ())
            }
            Opcode::UGreaterThanEqual => {
                self.binary(inst, Builder::u_greater_than_equal).map(|_| ())
            }

            Opcode::LogicalOr => self.binary(inst, Builder::logical_or).map(|_| ()),
            Opcode::LogicalAnd => self.binary(inst, Builder::logical_and).map(|_| ()),
            Opcode::LogicalXor => self.binary(inst, Builder::logical_not_equal).map(|_| ()),
            Opcode::LogicalNot => self.unary(inst, Builder::logical_not).map(|_| ()),

            Opcode::ConvertS32F32 | Opcode::ConvertS32F64 => {
                self.unary(inst, Builder::convert_f_to_s).map(|_| ())
            }
            Opcode::ConvertU32F32 => self.unary(inst, Builder::convert_f_to_u).map(|_| ()),
            Opcode::ConvertF32S32 | Opcode::ConvertF64S32 => {
                self.unary(inst, Builder::convert_s_to_f).map(|_| ())
            }
            Opcode::ConvertF32U32 | Opcode::ConvertF64U32 => {
                self.unary(inst, Builder::convert_u_to_f).map(|_| ())
            }
            Opcode::ConvertF16F32
            | Opcode::ConvertF32F16
            | Opcode::ConvertF32F64
            | Opcode::ConvertF64F32 => self.unary(inst, Builder::f_convert).map(|_| ()),
            Opcode::ConvertU32U64 | Opcode::ConvertU64U32 => {
                self.unary(inst, Builder::u_convert).map(|_| ())
            }

            Opcode::ImageSampleImplicitLod
            | Opcode::ImageSampleExplicitLod
            | Opcode::ImageSampleDrefImplicitLod => self.emit_image_sample(inst, op),
            Opcode::ImageFetch => self.emit_image_fetch(inst),
            Opcode::ImageQueryDimensions => self.emit_image_query_dimensions(inst),
            Opcode::ImageRead => self.emit_image_read(inst),
            Opcode::ImageWrite => self.emit_image_write(inst),

            Opcode::LaneId => {
                if self.supports_version(3) {
                    self.capability(Capability::GroupNonUniform);
                } else {
                    self.capability(Capability::SubgroupBallotKHR);
                    self.extension("SPV_KHR_shader_ballot");
                }
                self.emit_builtin(inst, spirv::BuiltIn::SubgroupLocalInvocationId)
            }
            Opcode::VoteAll => self.emit_vote(inst, Builder::group_non_uniform_all),
            Opcode::VoteAny => self.emit_vote(inst, Builder::group_non_uniform_any),
            Opcode::VoteEqual => self.emit_vote(inst, Builder::group_non_uniform_all_equal),
            Opcode::SubgroupBallot => self.emit_ballot(inst),
            Opcode::ShuffleIndex => {
                self.emit_shuffle(inst, Capability::GroupNonUniformShuffle, Builder::group_non_uniform_shuffle)
            }
            Opcode::ShuffleButterfly => self.emit_shuffle(
                inst,
                Capability::GroupNonUniformShuffle,
                Builder::group_non_uniform_shuffle_xor,
            ),
            Opcode::ShuffleUp => self.emit_shuffle(
                inst,
                Capability::GroupNonUniformShuffleRelative,
                Builder::group_non_uniform_shuffle_up,
            ),
            Opcode::ShuffleDown => self.emit_shuffle(
                inst,
                Capability::GroupNonUniformShuffleRelative,
                Builder::group_non_uniform_shuffle_down,
            ),

            op if op.is_global_memory() => Err(unsupported(BACKEND, op)),
            op => Err(unsupported(BACKEND, op)),
        }
    }

    /// The subgroup scope id for non uniform group instructions.
    fn subgroup_scope(&mut self, capability: Capability) -> Result<Word, CompileError> {
        if !self.supports_version(3) {
            return Err(not_implemented!(
                "Subgroup operations before SPIR-V 1.3"
            ));
        }
        self.capability(Capability::GroupNonUniform);
        self.capability(capability);
        Ok(self.u32_const(Scope::Subgroup as u32))
    }

    fn emit_vote(&mut self, inst: InstId, f: Binary) -> Result<(), CompileError> {
        if !self.profile.support_vote {
            // A single invocation votes for the whole warp.
            let value = self.a(inst, 0)?;
            return self.copy(inst, value);
        }
        let scope = self.subgroup_scope(Capability::GroupNonUniformVote)?;
        let ty = self.result_type(inst)?;
        let value = self.a(inst, 0)?;
        let id = self.def(inst);
        f(&mut self.builder, ty, Some(id), scope, value)?;
        Ok(())
    }

    fn emit_ballot(&mut self, inst: InstId) -> Result<(), CompileError> {
        let scope = self.subgroup_scope(Capability::GroupNonUniformBallot)?;
        let vector = self.ty(Type::U32X4)?;
        let pred = self.a(inst, 0)?;
        let ballot = self
            .builder
            .group_non_uniform_ballot(vector, None, scope, pred)?;
        let id = self.def(inst);
        let u32_type = self.u32_type;
        self.builder
            .composite_extract(u32_type, Some(id), ballot, [0])?;
        Ok(())
    }

    fn emit_shuffle(
        &mut self,
        inst: InstId,
        capability: Capability,
        f: Ternary,
    ) -> Result<(), CompileError> {
        let scope = self.subgroup_scope(capability)?;
        let ty = self.result_type(inst)?;
        let value = self.a(inst, 0)?;
        let index = self.a(inst, 1)?;
        // Clamp and segmentation mask are ignored.
        self.a(inst, 2)?;
        self.a(inst, 3)?;
        let id = self.def(inst);
        f(&mut self.builder, ty, Some(id), scope, value, index)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::spirv::tests::{decorations, emit, emit_with, ops, single_block, vulkan_profile};
    use crate::ir::{FpCompare, IrEmitter};
    use crate::profile::{Profile, RuntimeInfo};
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;
    use rspirv::spirv::Op;

    fn ext_inst_numbers(module: &rspirv::dr::Module) -> Vec<u32> {
        module.functions[0]
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| i.class.opcode == Op::ExtInst)
            .filter_map(|i| match i.operands[1] {
                Operand::LiteralExtInstInteger(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn float_arithmetic() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let a = ir.load_local(Value::U32(0));
        let a = ir.bit_cast_to_float(a);
        let mut control = FpControl::default();
        control.set_no_contraction(true);
        let sum = ir.fp_add(a, Value::F32(2.0), control);
        let product = ir.fp_mul(sum, sum, FpControl::default());
        let root = ir.fp_recip_sqrt(product);
        let less = ir.fp_compare(FpCompare::LessThan, root, a, false);
        let value = ir.select(less, root, a);
        let value = ir.bit_cast_to_uint(value);
        ir.write_local(Value::U32(0), value);

        let module = emit(&program);
        assert_eq!(
            vec![
                Op::AccessChain,
                Op::Load,
                Op::Bitcast,
                Op::FAdd,
                Op::FMul,
                Op::ExtInst,
                Op::FUnordLessThan,
                Op::Select,
                Op::Bitcast,
                Op::AccessChain,
                Op::Store,
                Op::Return
            ],
            ops(&module)
        );
        assert_eq!(vec![GLOp::InverseSqrt as u32], ext_inst_numbers(&module));
        // Only the addition disallows contraction.
        assert_eq!(1, decorations(&module, Decoration::NoContraction).len());
    }

    #[test]
    fn broken_clamp_uses_min_and_max() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let a = ir.load_local(Value::U32(0));
        let a = ir.bit_cast_to_float(a);
        let value = ir.fp_saturate(a);
        let value = ir.bit_cast_to_uint(value);
        ir.write_local(Value::U32(0), value);

        let module = emit(&program);
        assert_eq!(vec![GLOp::FClamp as u32], ext_inst_numbers(&module));

        let profile = Profile {
            has_broken_spirv_clamp: true,
            ..vulkan_profile()
        };
        let module = emit_with(&profile, &RuntimeInfo::default(), &program);
        assert_eq!(
            vec![GLOp::FMax as u32, GLOp::FMin as u32],
            ext_inst_numbers(&module)
        );
    }

    #[test]
    fn ballot_reads_the_first_word() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let value = ir.load_local(Value::U32(0));
        let less = ir.icompare(crate::ir::IntCompare::LessThan, value, Value::U32(3), true);
        let ballot = ir.subgroup_ballot(less);
        ir.write_local(Value::U32(1), ballot);

        let module = emit(&program);
        assert_eq!(
            vec![
                Op::AccessChain,
                Op::Load,
                Op::SLessThan,
                Op::GroupNonUniformBallot,
                Op::CompositeExtract,
                Op::AccessChain,
                Op::Store,
                Op::Return
            ],
            ops(&module)
        );
        let capabilities: Vec<_> = module
            .capabilities
            .iter()
            .map(|i| i.operands[0].clone())
            .collect();
        assert!(capabilities.contains(&Operand::Capability(Capability::GroupNonUniformBallot)));
    }

    #[test]
    fn subgroup_operations_need_spirv_1_3() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let value = ir.load_local(Value::U32(0));
        let shuffled = ir.shuffle(
            Opcode::ShuffleButterfly,
            value,
            Value::U32(1),
            Value::U32(0x1f),
            Value::U32(0),
        );
        ir.write_local(Value::U32(1), shuffled);

        let result = crate::backend::spirv::emit_spirv(
            &Profile::default(),
            &RuntimeInfo::default(),
            &program,
            &mut crate::backend::Bindings::default(),
        );
        assert!(matches!(result, Err(CompileError::NotImplemented(_))));
    }

    #[test]
    fn vote_without_support_copies_the_predicate() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let value = ir.load_local(Value::U32(0));
        let equal = ir.icompare(crate::ir::IntCompare::Equal, value, Value::U32(0), false);
        let all = ir.vote_all(equal);
        let value = ir.select(all, Value::U32(1), Value::U32(0));
        ir.write_local(Value::U32(0), value);

        let profile = Profile {
            support_vote: false,
            ..vulkan_profile()
        };
        assert_eq!(
            vec![
                Op::AccessChain,
                Op::Load,
                Op::IEqual,
                Op::CopyObject,
                Op::Select,
                Op::AccessChain,
                Op::Store,
                Op::Return
            ],
            ops(&emit_with(&profile, &RuntimeInfo::default(), &program))
        );
    }

    #[test]
    fn demote_falls_back_to_kill() {
        let (mut program, block) = single_block(Stage::Fragment);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        ir.demote_to_helper_invocation();

        let module = emit(&program);
        assert_eq!(vec![Op::DemoteToHelperInvocation, Op::Return], ops(&module));

        let profile = Profile {
            support_demote_to_helper_invocation: false,
            ..vulkan_profile()
        };
        let module = emit_with(&profile, &RuntimeInfo::default(), &program);
        assert_eq!(
            vec![
                Op::SelectionMerge,
                Op::BranchConditional,
                Op::Kill,
                Op::Return
            ],
            ops(&module)
        );
    }
}
