use super::{f32_literal, EmitContext, BACKEND};
use crate::backend::unsupported;
use crate::error::CompileError;
use crate::ir::{InstId, Opcode, Value};
use crate::logic_error;

const XYZW: [char; 4] = ['x', 'y', 'z', 'w'];

pub(super) fn swizzle(element: u32) -> Result<char, CompileError> {
    XYZW.get(element as usize)
        .copied()
        .ok_or_else(|| logic_error!("Vector element {element} out of range"))
}

impl EmitContext<'_> {
    /// The expression for argument `index` of `inst`.
    pub(super) fn a(&mut self, inst: InstId, index: usize) -> Result<String, CompileError> {
        let value = self.program.pool.inst(inst).arg(index);
        self.arg(value)
    }

    /// A constant argument like a vector element index.
    pub(super) fn imm(&mut self, inst: InstId, index: usize) -> Result<u32, CompileError> {
        let value = self.program.pool.resolve(self.program.pool.inst(inst).arg(index));
        value.u32().ok_or_else(|| {
            logic_error!(
                "Argument {index} of {:?} must be an immediate",
                self.program.pool.opcode(inst)
            )
        })
    }

    fn unary(&mut self, inst: InstId, f: impl Fn(&str) -> String) -> Result<(), CompileError> {
        let a = self.a(inst, 0)?;
        self.define_result(inst, f(&a))
    }

    fn binary(
        &mut self,
        inst: InstId,
        f: impl Fn(&str, &str) -> String,
    ) -> Result<(), CompileError> {
        let a = self.a(inst, 0)?;
        let b = self.a(inst, 1)?;
        self.define_result(inst, f(&a, &b))
    }

    fn ternary(
        &mut self,
        inst: InstId,
        f: impl Fn(&str, &str, &str) -> String,
    ) -> Result<(), CompileError> {
        let a = self.a(inst, 0)?;
        let b = self.a(inst, 1)?;
        let c = self.a(inst, 2)?;
        self.define_result(inst, f(&a, &b, &c))
    }

    fn call(&mut self, inst: InstId, function: &str) -> Result<(), CompileError> {
        let args = (0..self.program.pool.inst(inst).num_args())
            .map(|i| self.a(inst, i))
            .collect::<Result<Vec<_>, _>>()?;
        self.define_result(inst, format!("{function}({})", args.join(", ")))
    }

    pub(super) fn emit_inst(&mut self, inst: InstId) -> Result<(), CompileError> {
        let op = self.program.pool.opcode(inst);
        match op {
            Opcode::Phi | Opcode::Identity | Opcode::Void => Ok(()),
            Opcode::ConditionRef => self.unary(inst, |a| a.to_string()),
            Opcode::Reference => self.a(inst, 0).map(|_| ()),
            Opcode::PhiMove => self.emit_phi_move(inst),
            Opcode::Join => Ok(()),

            Opcode::Prologue => self.emit_prologue(),
            Opcode::Epilogue => self.emit_epilogue(),
            Opcode::DemoteToHelperInvocation => {
                if self.profile.support_demote_to_helper_invocation {
                    self.line("demote;");
                } else {
                    self.line("discard;");
                }
                Ok(())
            }
            Opcode::EmitVertex | Opcode::EndPrimitive => {
                let stream = self.imm(inst, 0)?;
                self.a(inst, 0)?;
                let function = match (op, stream) {
                    (Opcode::EmitVertex, 0) => "EmitVertex()".to_string(),
                    (Opcode::EmitVertex, s) => format!("EmitStreamVertex({s})"),
                    (_, 0) => "EndPrimitive()".to_string(),
                    (_, s) => format!("EndStreamPrimitive({s})"),
                };
                self.line(format_args!("{function};"));
                Ok(())
            }
            Opcode::Barrier => self.statement("barrier();"),
            Opcode::WorkgroupMemoryBarrier => self.statement("groupMemoryBarrier();"),
            Opcode::DeviceMemoryBarrier => self.statement("memoryBarrier();"),

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
                self.line(format_args!("frag_color{target}.{component} = {value};"));
                Ok(())
            }
            Opcode::SetSampleMask => {
                let value = self.a(inst, 0)?;
                self.line(format_args!("gl_SampleMask[0] = int({value});"));
                Ok(())
            }
            Opcode::SetFragDepth => {
                let value = self.a(inst, 0)?;
                self.line(format_args!("gl_FragDepth = {value};"));
                Ok(())
            }
            Opcode::WorkgroupId => self.define_result(inst, "gl_WorkGroupID".to_string()),
            Opcode::LocalInvocationId => {
                self.define_result(inst, "gl_LocalInvocationID".to_string())
            }
            Opcode::InvocationId => self.define_result(inst, "uint(gl_InvocationID)".to_string()),
            Opcode::SampleId => self.define_result(inst, "uint(gl_SampleID)".to_string()),
            Opcode::IsHelperInvocation => {
                self.define_result(inst, "gl_HelperInvocation".to_string())
            }
            Opcode::YDirection => {
                let y = if self.runtime_info.y_negate { -1.0 } else { 1.0 };
                self.define_result(inst, f32_literal(y))
            }

            Opcode::UndefU1 => self.define_result(inst, "false".to_string()),
            Opcode::UndefU8 | Opcode::UndefU16 | Opcode::UndefU32 => {
                self.define_result(inst, "0u".to_string())
            }
            Opcode::UndefU64 => self.define_result(inst, "0ul".to_string()),

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
            Opcode::StorageAtomicIAdd32 => self.emit_storage_atomic(inst, "atomicAdd"),
            Opcode::StorageAtomicExchange32 => self.emit_storage_atomic(inst, "atomicExchange"),
            Opcode::LoadLocal => self.unary(inst, |a| format!("lmem[{a}]")),
            Opcode::WriteLocal => {
                let offset = self.a(inst, 0)?;
                let value = self.a(inst, 1)?;
                self.line(format_args!("lmem[{offset}] = {value};"));
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

            Opcode::CompositeConstructU32x2 => self.call(inst, "uvec2"),
            Opcode::CompositeConstructU32x3 => self.call(inst, "uvec3"),
            Opcode::CompositeConstructU32x4 => self.call(inst, "uvec4"),
            Opcode::CompositeConstructF16x2 => self.call(inst, "f16vec2"),
            Opcode::CompositeConstructF32x2 => self.call(inst, "vec2"),
            Opcode::CompositeConstructF32x3 => self.call(inst, "vec3"),
            Opcode::CompositeConstructF32x4 => self.call(inst, "vec4"),
            Opcode::CompositeExtractU32x2
            | Opcode::CompositeExtractU32x3
            | Opcode::CompositeExtractU32x4
            | Opcode::CompositeExtractF16x2
            | Opcode::CompositeExtractF32x2
            | Opcode::CompositeExtractF32x3
            | Opcode::CompositeExtractF32x4 => {
                let element = swizzle(self.imm(inst, 1)?)?;
                let vector = self.a(inst, 0)?;
                self.a(inst, 1)?;
                self.define_result(inst, format!("{vector}.{element}"))
            }
            Opcode::CompositeInsertU32x2
            | Opcode::CompositeInsertU32x4
            | Opcode::CompositeInsertF32x4 => self.emit_composite_insert(inst),

            Opcode::SelectU1
            | Opcode::SelectU32
            | Opcode::SelectU64
            | Opcode::SelectF32
            | Opcode::SelectF64 => self.ternary(inst, |c, a, b| format!("{c} ? {a} : {b}")),

            Opcode::BitCastU32F32 => self.call(inst, "floatBitsToUint"),
            Opcode::BitCastF32U32 => self.call(inst, "uintBitsToFloat"),
            Opcode::BitCastU64F64 => {
                self.unary(inst, |a| format!("packUint2x32(unpackDouble2x32({a}))"))
            }
            Opcode::BitCastF64U64 => {
                self.unary(inst, |a| format!("packDouble2x32(unpackUint2x32({a}))"))
            }
            Opcode::BitCastU16F16 | Opcode::BitCastF16U16 => Err(unsupported(BACKEND, op)),
            Opcode::PackUint2x32 => self.call(inst, "packUint2x32"),
            Opcode::UnpackUint2x32 => self.call(inst, "unpackUint2x32"),
            Opcode::PackFloat2x16 => self.call(inst, "packFloat2x16"),
            Opcode::UnpackFloat2x16 => self.call(inst, "unpackFloat2x16"),
            Opcode::PackHalf2x16 => self.call(inst, "packHalf2x16"),
            Opcode::UnpackHalf2x16 => self.call(inst, "unpackHalf2x16"),
            Opcode::PackDouble2x32 => self.call(inst, "packDouble2x32"),
            Opcode::UnpackDouble2x32 => self.call(inst, "unpackDouble2x32"),

            // Emitted with the producer.
            Opcode::GetZeroFromOp
            | Opcode::GetSignFromOp
            | Opcode::GetCarryFromOp
            | Opcode::GetOverflowFromOp
            | Opcode::GetSparseFromOp
            | Opcode::GetInBoundsFromOp => Ok(()),

            Opcode::FPAbs16 | Opcode::FPAbs32 | Opcode::FPAbs64 => self.call(inst, "abs"),
            Opcode::FPAdd16 | Opcode::FPAdd32 | Opcode::FPAdd64 => {
                self.binary(inst, |a, b| format!("{a} + {b}"))
            }
            Opcode::FPFma16 | Opcode::FPFma32 | Opcode::FPFma64 => self.call(inst, "fma"),
            Opcode::FPMax32 | Opcode::FPMax64 => self.call(inst, "max"),
            Opcode::FPMin32 | Opcode::FPMin64 => self.call(inst, "min"),
            Opcode::FPMul16 | Opcode::FPMul32 | Opcode::FPMul64 => {
                self.binary(inst, |a, b| format!("{a} * {b}"))
            }
            Opcode::FPNeg16 | Opcode::FPNeg32 | Opcode::FPNeg64 => {
                self.unary(inst, |a| format!("-({a})"))
            }
            Opcode::FPRecip32 => self.unary(inst, |a| format!("1.0 / {a}")),
            Opcode::FPRecip64 => self.unary(inst, |a| format!("1.0lf / {a}")),
            Opcode::FPRecipSqrt32 | Opcode::FPRecipSqrt64 => self.call(inst, "inversesqrt"),
            Opcode::FPSqrt => self.call(inst, "sqrt"),
            Opcode::FPSin => self.call(inst, "sin"),
            Opcode::FPCos => self.call(inst, "cos"),
            Opcode::FPExp2 => self.call(inst, "exp2"),
            Opcode::FPLog2 => self.call(inst, "log2"),
            Opcode::FPSaturate16 => self.unary(inst, |a| {
                format!("clamp({a}, float16_t(0.0), float16_t(1.0))")
            }),
            Opcode::FPSaturate32 => self.unary(inst, |a| format!("clamp({a}, 0.0, 1.0)")),
            Opcode::FPSaturate64 => self.unary(inst, |a| format!("clamp({a}, 0.0lf, 1.0lf)")),
            Opcode::FPClamp32 => self.call(inst, "clamp"),
            Opcode::FPRoundEven32 => self.call(inst, "roundEven"),
            Opcode::FPFloor32 => self.call(inst, "floor"),
            Opcode::FPCeil32 => self.call(inst, "ceil"),
            Opcode::FPTrunc32 => self.call(inst, "trunc"),
            Opcode::FPOrdEqual32 => self.binary(inst, |a, b| format!("{a} == {b}")),
            Opcode::FPOrdNotEqual32 => self.binary(inst, |a, b| {
                format!("{a} != {b} && !isnan({a}) && !isnan({b})")
            }),
            Opcode::FPOrdLessThan32 => self.binary(inst, |a, b| format!("{a} < {b}")),
            Opcode::FPOrdGreaterThan32 => self.binary(inst, |a, b| format!("{a} > {b}")),
            Opcode::FPOrdLessThanEqual32 => self.binary(inst, |a, b| format!("{a} <= {b}")),
            Opcode::FPOrdGreaterThanEqual32 => self.binary(inst, |a, b| format!("{a} >= {b}")),
            // Comparisons with NaN are false except for inequality.
            Opcode::FPUnordEqual32 => self.binary(inst, |a, b| {
                format!("{a} == {b} || isnan({a}) || isnan({b})")
            }),
            Opcode::FPUnordNotEqual32 => self.binary(inst, |a, b| format!("{a} != {b}")),
            Opcode::FPUnordLessThan32 => self.binary(inst, |a, b| format!("!({a} >= {b})")),
            Opcode::FPUnordGreaterThan32 => self.binary(inst, |a, b| format!("!({a} <= {b})")),
            Opcode::FPUnordLessThanEqual32 => self.binary(inst, |a, b| format!("!({a} > {b})")),
            Opcode::FPUnordGreaterThanEqual32 => {
                self.binary(inst, |a, b| format!("!({a} < {b})"))
            }
            Opcode::FPIsNan32 => self.call(inst, "isnan"),

            Opcode::IAdd32 => {
                let a = self.a(inst, 0)?;
                let b = self.a(inst, 1)?;
                self.define_with_operands(inst, format!("{a} + {b}"), Some((&a, &b)))
            }
            Opcode::IAdd64 => self.binary(inst, |a, b| format!("{a} + {b}")),
            Opcode::ISub32 | Opcode::ISub64 => self.binary(inst, |a, b| format!("{a} - {b}")),
            Opcode::IMul32 => self.binary(inst, |a, b| format!("{a} * {b}")),
            Opcode::INeg32 => self.unary(inst, |a| format!("uint(-int({a}))")),
            Opcode::INeg64 => self.unary(inst, |a| format!("uint64_t(-int64_t({a}))")),
            Opcode::IAbs32 => self.unary(inst, |a| format!("uint(abs(int({a})))")),
            Opcode::ShiftLeftLogical32 | Opcode::ShiftLeftLogical64 => {
                self.binary(inst, |a, b| format!("{a} << {b}"))
            }
            Opcode::ShiftRightLogical32 | Opcode::ShiftRightLogical64 => {
                self.binary(inst, |a, b| format!("{a} >> {b}"))
            }
            Opcode::ShiftRightArithmetic32 => {
                self.binary(inst, |a, b| format!("uint(int({a}) >> {b})"))
            }
            Opcode::ShiftRightArithmetic64 => {
                self.binary(inst, |a, b| format!("uint64_t(int64_t({a}) >> {b})"))
            }
            Opcode::BitwiseAnd32 => self.binary(inst, |a, b| format!("{a} & {b}")),
            Opcode::BitwiseOr32 => self.binary(inst, |a, b| format!("{a} | {b}")),
            Opcode::BitwiseXor32 => self.binary(inst, |a, b| format!("{a} ^ {b}")),
            Opcode::BitwiseNot32 => self.unary(inst, |a| format!("~{a}")),
            Opcode::BitFieldInsert => {
                let base = self.a(inst, 0)?;
                let insert = self.a(inst, 1)?;
                let offset = self.a(inst, 2)?;
                let count = self.a(inst, 3)?;
                self.define_result(
                    inst,
                    format!("bitfieldInsert({base}, {insert}, int({offset}), int({count}))"),
                )
            }
            Opcode::BitFieldSExtract => self.ternary(inst, |base, offset, count| {
                format!("uint(bitfieldExtract(int({base}), int({offset}), int({count})))")
            }),
            Opcode::BitFieldUExtract => self.ternary(inst, |base, offset, count| {
                format!("bitfieldExtract({base}, int({offset}), int({count}))")
            }),
            Opcode::BitReverse32 => self.call(inst, "bitfieldReverse"),
            Opcode::BitCount32 => self.unary(inst, |a| format!("uint(bitCount({a}))")),
            Opcode::FindSMsb32 => self.unary(inst, |a| format!("uint(findMSB(int({a})))")),
            Opcode::FindUMsb32 => self.unary(inst, |a| format!("uint(findMSB({a}))")),
            Opcode::SMin32 => self.binary(inst, |a, b| format!("uint(min(int({a}), int({b})))")),
            Opcode::SMax32 => self.binary(inst, |a, b| format!("uint(max(int({a}), int({b})))")),
            Opcode::UMin32 => self.call(inst, "min"),
            Opcode::UMax32 => self.call(inst, "max"),
            Opcode::SClamp32 => self.ternary(inst, |a, b, c| {
                format!("uint(clamp(int({a}), int({b}), int({c})))")
            }),
            Opcode::UClamp32 => self.call(inst, "clamp"),
            Opcode::SLessThan => self.binary(inst, |a, b| format!("int({a}) < int({b})")),
            Opcode::SLessThanEqual => self.binary(inst, |a, b| format!("int({a}) <= int({b})")),
            Opcode::SGreaterThan => self.binary(inst, |a, b| format!("int({a}) > int({b})")),
            Opcode::SGreaterThanEqual => {
                self.binary(inst, |a, b| format!("int({a}) >= int({b})"))
            }
            Opcode::ULessThan => self.binary(inst, |a, b| format!("{a} < {b}")),
            Opcode::ULessThanEqual => self.binary(inst, |a, b| format!("{a} <= {b}")),
            Opcode::UGreaterThan => self.binary(inst, |a, b| format!("{a} > {b}")),
            Opcode::UGreaterThanEqual => self.binary(inst, |a, b| format!("{a} >= {b}")),
            Opcode::IEqual => self.binary(inst, |a, b| format!("{a} == {b}")),
            Opcode::INotEqual => self.binary(inst, |a, b| format!("{a} != {b}")),

            Opcode::LogicalOr => self.binary(inst, |a, b| format!("{a} || {b}")),
            Opcode::LogicalAnd => self.binary(inst, |a, b| format!("{a} && {b}")),
            Opcode::LogicalXor => self.binary(inst, |a, b| format!("{a} ^^ {b}")),
            Opcode::LogicalNot => self.unary(inst, |a| format!("!{a}")),

            Opcode::ConvertS32F32 | Opcode::ConvertS32F64 => {
                self.unary(inst, |a| format!("uint(int({a}))"))
            }
            Opcode::ConvertU32F32 | Opcode::ConvertU32U64 => self.call(inst, "uint"),
            Opcode::ConvertF32S32 => self.unary(inst, |a| format!("float(int({a}))")),
            Opcode::ConvertF64S32 => self.unary(inst, |a| format!("double(int({a}))")),
            Opcode::ConvertF32U32 | Opcode::ConvertF32F16 | Opcode::ConvertF32F64 => {
                self.call(inst, "float")
            }
            Opcode::ConvertF64U32 | Opcode::ConvertF64F32 => self.call(inst, "double"),
            Opcode::ConvertF16F32 => self.call(inst, "float16_t"),
            Opcode::ConvertU64U32 => self.call(inst, "uint64_t"),

            Opcode::ImageSampleImplicitLod
            | Opcode::ImageSampleExplicitLod
            | Opcode::ImageSampleDrefImplicitLod => self.emit_image_sample(inst, op),
            Opcode::ImageFetch => self.emit_image_fetch(inst),
            Opcode::ImageQueryDimensions => self.emit_image_query_dimensions(inst),
            Opcode::ImageRead => self.emit_image_read(inst),
            Opcode::ImageWrite => self.emit_image_write(inst),

            Opcode::LaneId => self.define_result(inst, "gl_SubgroupInvocationID".to_string()),
            Opcode::VoteAll => self.emit_vote(inst, "subgroupAll"),
            Opcode::VoteAny => self.emit_vote(inst, "subgroupAny"),
            Opcode::VoteEqual => self.emit_vote(inst, "subgroupAllEqual"),
            Opcode::SubgroupBallot => self.unary(inst, |p| format!("subgroupBallot({p}).x")),
            Opcode::ShuffleIndex => self.emit_shuffle(inst, "subgroupShuffle"),
            Opcode::ShuffleUp => self.emit_shuffle(inst, "subgroupShuffleUp"),
            Opcode::ShuffleDown => self.emit_shuffle(inst, "subgroupShuffleDown"),
            Opcode::ShuffleButterfly => self.emit_shuffle(inst, "subgroupShuffleXor"),

            op if op.is_global_memory() => Err(unsupported(BACKEND, op)),
            Opcode::GetAttributeIndexed | Opcode::SetAttributeIndexed => {
                Err(unsupported(BACKEND, op))
            }
            op => Err(unsupported(BACKEND, op)),
        }
    }

    fn statement(&mut self, text: &str) -> Result<(), CompileError> {
        self.line(text);
        Ok(())
    }

    fn emit_phi_move(&mut self, inst: InstId) -> Result<(), CompileError> {
        let pool = &self.program.pool;
        let phi = pool
            .resolve_inst(pool.inst(inst).arg(0))
            .filter(|p| pool.inst(*p).is_phi())
            .ok_or_else(|| logic_error!("PhiMove target is not a phi"))?;
        let var = self.phi_var(phi)?;
        self.discard_arg(Value::Inst(phi));
        let value = self.a(inst, 1)?;
        self.line(format_args!("{var} = {value};"));
        Ok(())
    }

    fn emit_composite_insert(&mut self, inst: InstId) -> Result<(), CompileError> {
        let element = swizzle(self.imm(inst, 2)?)?;
        let vector = self.a(inst, 0)?;
        let value = self.a(inst, 1)?;
        self.a(inst, 2)?;
        if !self.is_used(inst) {
            return Ok(());
        }
        let id = self.define_var(inst)?;
        self.line(format_args!("{id} = {vector};"));
        self.line(format_args!("{id}.{element} = {value};"));
        Ok(())
    }

    fn emit_vote(&mut self, inst: InstId, function: &str) -> Result<(), CompileError> {
        if self.profile.support_vote {
            self.call(inst, function)
        } else {
            // A single invocation votes for the whole warp.
            self.unary(inst, |p| p.to_string())
        }
    }

    fn emit_shuffle(&mut self, inst: InstId, function: &str) -> Result<(), CompileError> {
        let value = self.a(inst, 0)?;
        let index = self.a(inst, 1)?;
        // Clamp and segmentation mask are ignored.
        self.a(inst, 2)?;
        self.a(inst, 3)?;
        self.define_result(inst, format!("{function}({value}, {index})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::glsl::tests::{body, emit, single_block};
    use crate::ir::{FpCompare, FpControl, IntCompare, IrEmitter};
    use indoc::indoc;
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_with_carry_and_overflow() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let a = ir.lane_id();
        let b = ir.emit(Opcode::UndefU32, &[]);
        let sum = ir.iadd(a, b);
        let carry = ir.get_carry_from_op(sum).unwrap();
        let overflow = ir.get_overflow_from_op(sum).unwrap();
        let flags = ir.logical_or(carry, overflow);
        let value = ir.select(flags, sum, Value::U32(0));
        ir.write_local(Value::U32(0), value);

        let source = emit(&program);
        assert_eq!(
            indoc! {"
                bool b_0, b_1, b_2;
                uint u_0, u_1, u_2;
                u_0 = gl_SubgroupInvocationID;
                u_1 = 0u;
                u_2 = u_0 + u_1;
                b_0 = u_2 < u_0;
                b_1 = int(~(u_0 ^ u_1) & (u_0 ^ u_2)) < 0;
                b_2 = b_0 || b_1;
                u_0 = b_2 ? u_2 : 0u;
                lmem[0u] = u_0;
                return;
            "},
            body(&source)
        );
    }

    #[test]
    fn unordered_float_compares() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let x = ir.get_cbuf_f32(Value::U32(0), Value::U32(0));
        let neg = ir.fp_neg(Value::F32(-0.5));
        let sum = ir.fp_add(x, neg, FpControl::default());
        let lt = ir.fp_compare(FpCompare::LessThan, sum, Value::F32(2.0), false);
        let eq = ir.fp_compare(FpCompare::Equal, sum, x, false);
        let both = ir.logical_and(lt, eq);
        let value = ir.select(both, Value::U32(1), Value::U32(2));
        ir.write_local(Value::U32(0), value);
        program.info.constant_buffer_descriptors =
            vec![crate::ir::ConstantBufferDescriptor { index: 0, count: 1 }];

        let source = emit(&program);
        assert_eq!(
            indoc! {"
                bool b_0, b_1, b_2;
                uint u_0;
                float f_0, f_1, f_2;
                f_0 = uintBitsToFloat(cs_cbuf0[0].x);
                f_1 = -(-0.5);
                f_2 = f_0 + f_1;
                b_0 = !(f_2 >= 2.0);
                b_1 = f_2 == f_0 || isnan(f_2) || isnan(f_0);
                b_2 = b_0 && b_1;
                u_0 = b_2 ? 1u : 2u;
                lmem[0u] = u_0;
                return;
            "},
            body(&source)
        );
    }

    #[test]
    fn signed_integer_ops() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let a = ir.lane_id();
        let shifted = ir.shift_right_arithmetic(a, Value::U32(2));
        let less = ir.icompare(IntCompare::LessThan, shifted, Value::U32(7), true);
        let value = ir.select(less, shifted, Value::U32(7));
        ir.write_local(Value::U32(1), value);

        let source = emit(&program);
        assert_eq!(
            indoc! {"
                bool b_0;
                uint u_0, u_1;
                u_0 = gl_SubgroupInvocationID;
                u_1 = uint(int(u_0) >> 2u);
                b_0 = int(u_1) < int(7u);
                u_0 = b_0 ? u_1 : 7u;
                lmem[1u] = u_0;
                return;
            "},
            body(&source)
        );
    }

    #[test]
    fn registers_and_predicates_must_not_reach_emission() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let value = ir.get_reg(crate::ir::Reg(1));
        ir.write_local(Value::U32(0), value);

        let result = crate::backend::glsl::emit_glsl(
            &crate::profile::Profile::default(),
            &crate::profile::RuntimeInfo::default(),
            &program,
            &mut crate::backend::Bindings::default(),
        );
        assert!(matches!(result, Err(CompileError::Logic(_))));
    }

    #[test]
    fn global_memory_is_unsupported() {
        let (mut program, block) = single_block(Stage::Compute);
        let mut ir = IrEmitter::new(&mut program.pool, block);
        let value = ir.load_global(Opcode::LoadGlobal32, Value::U64(0x1000));
        ir.write_local(Value::U32(0), value);

        let result = crate::backend::glsl::emit_glsl(
            &crate::profile::Profile::default(),
            &crate::profile::RuntimeInfo::default(),
            &program,
            &mut crate::backend::Bindings::default(),
        );
        assert_eq!(
            Err(CompileError::UnsupportedOpcode {
                backend: "GLSL",
                opcode: Opcode::LoadGlobal32
            }),
            result
        );
    }
}
