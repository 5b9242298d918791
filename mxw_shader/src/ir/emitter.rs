//! A builder for inserting typed instructions into a block.
use super::attribute::{Attribute, Patch};
use super::modifiers::{FpControl, TextureInstInfo};
use super::reg::{Pred, Reg};
use super::types::Type;
use super::value::Value;
use super::{BlockId, InstId, ObjectPool, Opcode};
use crate::error::CompileError;

/// Floating point comparison operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpCompare {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanEqual,
    GreaterThanEqual,
}

/// Integer comparison operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntCompare {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanEqual,
    GreaterThanEqual,
}

/// Inserts instructions at a cursor in a block.
///
/// Each emitted instruction is inserted after the previously emitted instruction.
pub struct IrEmitter<'a> {
    pub pool: &'a mut ObjectPool,
    pub block: BlockId,
    index: usize,
}

impl<'a> IrEmitter<'a> {
    /// An emitter appending to the end of `block`.
    pub fn new(pool: &'a mut ObjectPool, block: BlockId) -> Self {
        let index = pool.block(block).instructions().len();
        Self { pool, block, index }
    }

    /// An emitter inserting before `inst` in its parent block.
    pub fn before(pool: &'a mut ObjectPool, inst: InstId) -> Option<Self> {
        let block = pool.inst(inst).block()?;
        let index = pool.position(inst)?;
        Some(Self { pool, block, index })
    }

    /// An emitter inserting at `index` in `block`.
    pub fn at(pool: &'a mut ObjectPool, block: BlockId, index: usize) -> Self {
        Self { pool, block, index }
    }

    pub fn emit(&mut self, op: Opcode, args: &[Value]) -> Value {
        self.emit_flags(op, args, 0)
    }

    pub fn emit_flags(&mut self, op: Opcode, args: &[Value], flags: u32) -> Value {
        let id = self.pool.emit_inst(op, args, flags);
        self.pool.insert_existing(self.block, self.index, id);
        self.index += 1;
        Value::Inst(id)
    }

    /// Emit a pseudo instruction reading a secondary output of `producer`.
    pub fn emit_pseudo(&mut self, op: Opcode, producer: Value) -> Result<Value, CompileError> {
        let id = self
            .pool
            .insert_inst(self.block, self.index, op, &[producer], 0)?;
        self.index += 1;
        Ok(Value::Inst(id))
    }

    pub fn value_type(&self, value: Value) -> Type {
        self.pool.value_type(value)
    }

    pub fn prologue(&mut self) {
        self.emit(Opcode::Prologue, &[]);
    }

    pub fn epilogue(&mut self) {
        self.emit(Opcode::Epilogue, &[]);
    }

    pub fn demote_to_helper_invocation(&mut self) {
        self.emit(Opcode::DemoteToHelperInvocation, &[]);
    }

    pub fn emit_vertex(&mut self, stream: Value) {
        self.emit(Opcode::EmitVertex, &[stream]);
    }

    pub fn end_primitive(&mut self, stream: Value) {
        self.emit(Opcode::EndPrimitive, &[stream]);
    }

    pub fn barrier(&mut self) {
        self.emit(Opcode::Barrier, &[]);
    }

    pub fn workgroup_memory_barrier(&mut self) {
        self.emit(Opcode::WorkgroupMemoryBarrier, &[]);
    }

    pub fn device_memory_barrier(&mut self) {
        self.emit(Opcode::DeviceMemoryBarrier, &[]);
    }

    /// Mark a condition value as used by control flow.
    pub fn condition_ref(&mut self, cond: Value) -> Value {
        self.emit(Opcode::ConditionRef, &[cond])
    }

    pub fn reference(&mut self, value: Value) {
        self.emit(Opcode::Reference, &[value]);
    }

    pub fn get_reg(&mut self, reg: Reg) -> Value {
        if reg.is_zero() {
            Value::U32(0)
        } else {
            self.emit(Opcode::GetRegister, &[reg.into()])
        }
    }

    pub fn set_reg(&mut self, reg: Reg, value: Value) {
        if !reg.is_zero() {
            self.emit(Opcode::SetRegister, &[reg.into(), value]);
        }
    }

    pub fn get_pred(&mut self, pred: Pred, negate: bool) -> Value {
        if pred.is_true() {
            return Value::U1(!negate);
        }
        let value = self.emit(Opcode::GetPred, &[pred.into()]);
        if negate {
            self.logical_not(value)
        } else {
            value
        }
    }

    pub fn set_pred(&mut self, pred: Pred, value: Value) {
        if !pred.is_true() {
            self.emit(Opcode::SetPred, &[pred.into(), value]);
        }
    }

    pub fn get_z_flag(&mut self) -> Value {
        self.emit(Opcode::GetZFlag, &[])
    }

    pub fn get_s_flag(&mut self) -> Value {
        self.emit(Opcode::GetSFlag, &[])
    }

    pub fn get_c_flag(&mut self) -> Value {
        self.emit(Opcode::GetCFlag, &[])
    }

    pub fn get_o_flag(&mut self) -> Value {
        self.emit(Opcode::GetOFlag, &[])
    }

    pub fn set_z_flag(&mut self, value: Value) {
        self.emit(Opcode::SetZFlag, &[value]);
    }

    pub fn set_s_flag(&mut self, value: Value) {
        self.emit(Opcode::SetSFlag, &[value]);
    }

    pub fn set_c_flag(&mut self, value: Value) {
        self.emit(Opcode::SetCFlag, &[value]);
    }

    pub fn set_o_flag(&mut self, value: Value) {
        self.emit(Opcode::SetOFlag, &[value]);
    }

    /// Read a constant buffer value with the given bit size and signedness.
    pub fn get_cbuf(&mut self, index: Value, offset: Value, bitsize: u32, is_signed: bool) -> Value {
        let op = match (bitsize, is_signed) {
            (8, false) => Opcode::GetCbufU8,
            (8, true) => Opcode::GetCbufS8,
            (16, false) => Opcode::GetCbufU16,
            (16, true) => Opcode::GetCbufS16,
            (64, _) => Opcode::GetCbufU32x2,
            _ => Opcode::GetCbufU32,
        };
        self.emit(op, &[index, offset])
    }

    pub fn get_cbuf_u32(&mut self, index: Value, offset: Value) -> Value {
        self.emit(Opcode::GetCbufU32, &[index, offset])
    }

    pub fn get_cbuf_f32(&mut self, index: Value, offset: Value) -> Value {
        self.emit(Opcode::GetCbufF32, &[index, offset])
    }

    pub fn get_attribute(&mut self, attribute: Attribute, vertex: Value) -> Value {
        self.emit(Opcode::GetAttribute, &[attribute.into(), vertex])
    }

    pub fn get_attribute_u32(&mut self, attribute: Attribute, vertex: Value) -> Value {
        self.emit(Opcode::GetAttributeU32, &[attribute.into(), vertex])
    }

    pub fn set_attribute(&mut self, attribute: Attribute, value: Value, vertex: Value) {
        self.emit(Opcode::SetAttribute, &[attribute.into(), value, vertex]);
    }

    pub fn get_attribute_indexed(&mut self, offset: Value, vertex: Value) -> Value {
        self.emit(Opcode::GetAttributeIndexed, &[offset, vertex])
    }

    pub fn set_attribute_indexed(&mut self, offset: Value, value: Value, vertex: Value) {
        self.emit(Opcode::SetAttributeIndexed, &[offset, value, vertex]);
    }

    pub fn get_patch(&mut self, patch: Patch) -> Value {
        self.emit(Opcode::GetPatch, &[patch.into()])
    }

    pub fn set_patch(&mut self, patch: Patch, value: Value) {
        self.emit(Opcode::SetPatch, &[patch.into(), value]);
    }

    pub fn set_frag_color(&mut self, render_target: u32, component: u32, value: Value) {
        self.emit(
            Opcode::SetFragColor,
            &[render_target.into(), component.into(), value],
        );
    }

    pub fn set_frag_depth(&mut self, value: Value) {
        self.emit(Opcode::SetFragDepth, &[value]);
    }

    pub fn set_sample_mask(&mut self, value: Value) {
        self.emit(Opcode::SetSampleMask, &[value]);
    }

    pub fn workgroup_id(&mut self) -> Value {
        self.emit(Opcode::WorkgroupId, &[])
    }

    pub fn local_invocation_id(&mut self) -> Value {
        self.emit(Opcode::LocalInvocationId, &[])
    }

    pub fn invocation_id(&mut self) -> Value {
        self.emit(Opcode::InvocationId, &[])
    }

    pub fn sample_id(&mut self) -> Value {
        self.emit(Opcode::SampleId, &[])
    }

    pub fn is_helper_invocation(&mut self) -> Value {
        self.emit(Opcode::IsHelperInvocation, &[])
    }

    pub fn y_direction(&mut self) -> Value {
        self.emit(Opcode::YDirection, &[])
    }

    pub fn lane_id(&mut self) -> Value {
        self.emit(Opcode::LaneId, &[])
    }

    pub fn undef(&mut self, ty: Type) -> Value {
        let op = match ty {
            Type::U1 => Opcode::UndefU1,
            Type::U8 => Opcode::UndefU8,
            Type::U16 => Opcode::UndefU16,
            Type::U64 => Opcode::UndefU64,
            _ => Opcode::UndefU32,
        };
        self.emit(op, &[])
    }

    pub fn get_zero_from_op(&mut self, op: Value) -> Result<Value, CompileError> {
        self.emit_pseudo(Opcode::GetZeroFromOp, op)
    }

    pub fn get_sign_from_op(&mut self, op: Value) -> Result<Value, CompileError> {
        self.emit_pseudo(Opcode::GetSignFromOp, op)
    }

    pub fn get_carry_from_op(&mut self, op: Value) -> Result<Value, CompileError> {
        self.emit_pseudo(Opcode::GetCarryFromOp, op)
    }

    pub fn get_overflow_from_op(&mut self, op: Value) -> Result<Value, CompileError> {
        self.emit_pseudo(Opcode::GetOverflowFromOp, op)
    }

    pub fn get_sparse_from_op(&mut self, op: Value) -> Result<Value, CompileError> {
        self.emit_pseudo(Opcode::GetSparseFromOp, op)
    }

    pub fn get_in_bounds_from_op(&mut self, op: Value) -> Result<Value, CompileError> {
        self.emit_pseudo(Opcode::GetInBoundsFromOp, op)
    }

    /// Build a vector from 2 to 4 scalars of the same type.
    pub fn composite_construct(&mut self, elements: &[Value]) -> Value {
        let ty = elements
            .first()
            .map(|e| self.value_type(*e))
            .unwrap_or(Type::U32);
        let op = match (ty, elements.len()) {
            (Type::F16, _) => Opcode::CompositeConstructF16x2,
            (Type::F32, 2) => Opcode::CompositeConstructF32x2,
            (Type::F32, 3) => Opcode::CompositeConstructF32x3,
            (Type::F32, _) => Opcode::CompositeConstructF32x4,
            (_, 2) => Opcode::CompositeConstructU32x2,
            (_, 3) => Opcode::CompositeConstructU32x3,
            _ => Opcode::CompositeConstructU32x4,
        };
        self.emit(op, elements)
    }

    pub fn composite_extract(&mut self, vector: Value, element: u32) -> Value {
        let op = match self.value_type(vector) {
            Type::U32X3 => Opcode::CompositeExtractU32x3,
            Type::U32X4 => Opcode::CompositeExtractU32x4,
            Type::F16X2 => Opcode::CompositeExtractF16x2,
            Type::F32X2 => Opcode::CompositeExtractF32x2,
            Type::F32X3 => Opcode::CompositeExtractF32x3,
            Type::F32X4 => Opcode::CompositeExtractF32x4,
            _ => Opcode::CompositeExtractU32x2,
        };
        self.emit(op, &[vector, element.into()])
    }

    pub fn select(&mut self, cond: Value, true_value: Value, false_value: Value) -> Value {
        let op = match self.value_type(true_value) {
            Type::U1 => Opcode::SelectU1,
            Type::U64 => Opcode::SelectU64,
            Type::F32 => Opcode::SelectF32,
            Type::F64 => Opcode::SelectF64,
            _ => Opcode::SelectU32,
        };
        self.emit(op, &[cond, true_value, false_value])
    }

    /// Reinterpret the bits of a float as an unsigned integer of the same size.
    pub fn bit_cast_to_uint(&mut self, value: Value) -> Value {
        match self.value_type(value) {
            Type::F16 => self.emit(Opcode::BitCastU16F16, &[value]),
            Type::F64 => self.emit(Opcode::BitCastU64F64, &[value]),
            Type::F32 => self.emit(Opcode::BitCastU32F32, &[value]),
            _ => value,
        }
    }

    /// Reinterpret the bits of an unsigned integer as a float of the same size.
    pub fn bit_cast_to_float(&mut self, value: Value) -> Value {
        match self.value_type(value) {
            Type::U16 => self.emit(Opcode::BitCastF16U16, &[value]),
            Type::U64 => self.emit(Opcode::BitCastF64U64, &[value]),
            Type::U32 => self.emit(Opcode::BitCastF32U32, &[value]),
            _ => value,
        }
    }

    pub fn pack_uint_2x32(&mut self, vector: Value) -> Value {
        self.emit(Opcode::PackUint2x32, &[vector])
    }

    pub fn unpack_uint_2x32(&mut self, value: Value) -> Value {
        self.emit(Opcode::UnpackUint2x32, &[value])
    }

    pub fn pack_half_2x16(&mut self, vector: Value) -> Value {
        self.emit(Opcode::PackHalf2x16, &[vector])
    }

    pub fn unpack_half_2x16(&mut self, value: Value) -> Value {
        self.emit(Opcode::UnpackHalf2x16, &[value])
    }

    pub fn pack_double_2x32(&mut self, vector: Value) -> Value {
        self.emit(Opcode::PackDouble2x32, &[vector])
    }

    pub fn unpack_double_2x32(&mut self, value: Value) -> Value {
        self.emit(Opcode::UnpackDouble2x32, &[value])
    }

    fn fp_op(
        &mut self,
        ops: [Opcode; 3],
        args: &[Value],
        control: FpControl,
    ) -> Value {
        let op = match self.value_type(args[0]) {
            Type::F16 => ops[0],
            Type::F64 => ops[2],
            _ => ops[1],
        };
        self.emit_flags(op, args, control.flags())
    }

    pub fn fp_add(&mut self, a: Value, b: Value, control: FpControl) -> Value {
        self.fp_op(
            [Opcode::FPAdd16, Opcode::FPAdd32, Opcode::FPAdd64],
            &[a, b],
            control,
        )
    }

    pub fn fp_mul(&mut self, a: Value, b: Value, control: FpControl) -> Value {
        self.fp_op(
            [Opcode::FPMul16, Opcode::FPMul32, Opcode::FPMul64],
            &[a, b],
            control,
        )
    }

    pub fn fp_fma(&mut self, a: Value, b: Value, c: Value, control: FpControl) -> Value {
        self.fp_op(
            [Opcode::FPFma16, Opcode::FPFma32, Opcode::FPFma64],
            &[a, b, c],
            control,
        )
    }

    pub fn fp_abs(&mut self, value: Value) -> Value {
        self.fp_op(
            [Opcode::FPAbs16, Opcode::FPAbs32, Opcode::FPAbs64],
            &[value],
            FpControl::default(),
        )
    }

    pub fn fp_neg(&mut self, value: Value) -> Value {
        self.fp_op(
            [Opcode::FPNeg16, Opcode::FPNeg32, Opcode::FPNeg64],
            &[value],
            FpControl::default(),
        )
    }

    /// Apply the absolute value and then negation modifiers.
    pub fn fp_abs_neg(&mut self, value: Value, abs: bool, neg: bool) -> Value {
        let value = if abs { self.fp_abs(value) } else { value };
        if neg {
            self.fp_neg(value)
        } else {
            value
        }
    }

    pub fn fp_saturate(&mut self, value: Value) -> Value {
        self.fp_op(
            [
                Opcode::FPSaturate16,
                Opcode::FPSaturate32,
                Opcode::FPSaturate64,
            ],
            &[value],
            FpControl::default(),
        )
    }

    pub fn fp_min(&mut self, a: Value, b: Value) -> Value {
        if self.value_type(a) == Type::F64 {
            self.emit(Opcode::FPMin64, &[a, b])
        } else {
            self.emit(Opcode::FPMin32, &[a, b])
        }
    }

    pub fn fp_max(&mut self, a: Value, b: Value) -> Value {
        if self.value_type(a) == Type::F64 {
            self.emit(Opcode::FPMax64, &[a, b])
        } else {
            self.emit(Opcode::FPMax32, &[a, b])
        }
    }

    pub fn fp_clamp(&mut self, value: Value, min: Value, max: Value) -> Value {
        self.emit(Opcode::FPClamp32, &[value, min, max])
    }

    pub fn fp_recip(&mut self, value: Value) -> Value {
        if self.value_type(value) == Type::F64 {
            self.emit(Opcode::FPRecip64, &[value])
        } else {
            self.emit(Opcode::FPRecip32, &[value])
        }
    }

    pub fn fp_recip_sqrt(&mut self, value: Value) -> Value {
        if self.value_type(value) == Type::F64 {
            self.emit(Opcode::FPRecipSqrt64, &[value])
        } else {
            self.emit(Opcode::FPRecipSqrt32, &[value])
        }
    }

    pub fn fp_sqrt(&mut self, value: Value) -> Value {
        self.emit(Opcode::FPSqrt, &[value])
    }

    pub fn fp_sin(&mut self, value: Value) -> Value {
        self.emit(Opcode::FPSin, &[value])
    }

    pub fn fp_cos(&mut self, value: Value) -> Value {
        self.emit(Opcode::FPCos, &[value])
    }

    pub fn fp_exp2(&mut self, value: Value) -> Value {
        self.emit(Opcode::FPExp2, &[value])
    }

    pub fn fp_log2(&mut self, value: Value) -> Value {
        self.emit(Opcode::FPLog2, &[value])
    }

    pub fn fp_round_even(&mut self, value: Value) -> Value {
        self.emit(Opcode::FPRoundEven32, &[value])
    }

    pub fn fp_floor(&mut self, value: Value) -> Value {
        self.emit(Opcode::FPFloor32, &[value])
    }

    pub fn fp_ceil(&mut self, value: Value) -> Value {
        self.emit(Opcode::FPCeil32, &[value])
    }

    pub fn fp_trunc(&mut self, value: Value) -> Value {
        self.emit(Opcode::FPTrunc32, &[value])
    }

    pub fn fp_is_nan(&mut self, value: Value) -> Value {
        self.emit(Opcode::FPIsNan32, &[value])
    }

    /// Compare two floats with ordered or unordered semantics for NaN.
    pub fn fp_compare(&mut self, compare: FpCompare, a: Value, b: Value, ordered: bool) -> Value {
        let op = match (compare, ordered) {
            (FpCompare::Equal, true) => Opcode::FPOrdEqual32,
            (FpCompare::Equal, false) => Opcode::FPUnordEqual32,
            (FpCompare::NotEqual, true) => Opcode::FPOrdNotEqual32,
            (FpCompare::NotEqual, false) => Opcode::FPUnordNotEqual32,
            (FpCompare::LessThan, true) => Opcode::FPOrdLessThan32,
            (FpCompare::LessThan, false) => Opcode::FPUnordLessThan32,
            (FpCompare::GreaterThan, true) => Opcode::FPOrdGreaterThan32,
            (FpCompare::GreaterThan, false) => Opcode::FPUnordGreaterThan32,
            (FpCompare::LessThanEqual, true) => Opcode::FPOrdLessThanEqual32,
            (FpCompare::LessThanEqual, false) => Opcode::FPUnordLessThanEqual32,
            (FpCompare::GreaterThanEqual, true) => Opcode::FPOrdGreaterThanEqual32,
            (FpCompare::GreaterThanEqual, false) => Opcode::FPUnordGreaterThanEqual32,
        };
        self.emit(op, &[a, b])
    }

    pub fn iadd(&mut self, a: Value, b: Value) -> Value {
        if self.value_type(a) == Type::U64 {
            self.emit(Opcode::IAdd64, &[a, b])
        } else {
            self.emit(Opcode::IAdd32, &[a, b])
        }
    }

    pub fn isub(&mut self, a: Value, b: Value) -> Value {
        if self.value_type(a) == Type::U64 {
            self.emit(Opcode::ISub64, &[a, b])
        } else {
            self.emit(Opcode::ISub32, &[a, b])
        }
    }

    pub fn imul(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::IMul32, &[a, b])
    }

    pub fn ineg(&mut self, value: Value) -> Value {
        if self.value_type(value) == Type::U64 {
            self.emit(Opcode::INeg64, &[value])
        } else {
            self.emit(Opcode::INeg32, &[value])
        }
    }

    pub fn iabs(&mut self, value: Value) -> Value {
        self.emit(Opcode::IAbs32, &[value])
    }

    pub fn shift_left_logical(&mut self, base: Value, shift: Value) -> Value {
        if self.value_type(base) == Type::U64 {
            self.emit(Opcode::ShiftLeftLogical64, &[base, shift])
        } else {
            self.emit(Opcode::ShiftLeftLogical32, &[base, shift])
        }
    }

    pub fn shift_right_logical(&mut self, base: Value, shift: Value) -> Value {
        if self.value_type(base) == Type::U64 {
            self.emit(Opcode::ShiftRightLogical64, &[base, shift])
        } else {
            self.emit(Opcode::ShiftRightLogical32, &[base, shift])
        }
    }

    pub fn shift_right_arithmetic(&mut self, base: Value, shift: Value) -> Value {
        if self.value_type(base) == Type::U64 {
            self.emit(Opcode::ShiftRightArithmetic64, &[base, shift])
        } else {
            self.emit(Opcode::ShiftRightArithmetic32, &[base, shift])
        }
    }

    pub fn bitwise_and(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::BitwiseAnd32, &[a, b])
    }

    pub fn bitwise_or(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::BitwiseOr32, &[a, b])
    }

    pub fn bitwise_xor(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::BitwiseXor32, &[a, b])
    }

    pub fn bitwise_not(&mut self, value: Value) -> Value {
        self.emit(Opcode::BitwiseNot32, &[value])
    }

    pub fn bit_field_insert(&mut self, base: Value, insert: Value, offset: Value, count: Value) -> Value {
        self.emit(Opcode::BitFieldInsert, &[base, insert, offset, count])
    }

    pub fn bit_field_extract(&mut self, base: Value, offset: Value, count: Value, is_signed: bool) -> Value {
        let op = if is_signed {
            Opcode::BitFieldSExtract
        } else {
            Opcode::BitFieldUExtract
        };
        self.emit(op, &[base, offset, count])
    }

    pub fn bit_reverse(&mut self, value: Value) -> Value {
        self.emit(Opcode::BitReverse32, &[value])
    }

    pub fn bit_count(&mut self, value: Value) -> Value {
        self.emit(Opcode::BitCount32, &[value])
    }

    pub fn find_msb(&mut self, value: Value, is_signed: bool) -> Value {
        let op = if is_signed {
            Opcode::FindSMsb32
        } else {
            Opcode::FindUMsb32
        };
        self.emit(op, &[value])
    }

    pub fn imin(&mut self, a: Value, b: Value, is_signed: bool) -> Value {
        let op = if is_signed { Opcode::SMin32 } else { Opcode::UMin32 };
        self.emit(op, &[a, b])
    }

    pub fn imax(&mut self, a: Value, b: Value, is_signed: bool) -> Value {
        let op = if is_signed { Opcode::SMax32 } else { Opcode::UMax32 };
        self.emit(op, &[a, b])
    }

    pub fn iclamp(&mut self, value: Value, min: Value, max: Value, is_signed: bool) -> Value {
        let op = if is_signed {
            Opcode::SClamp32
        } else {
            Opcode::UClamp32
        };
        self.emit(op, &[value, min, max])
    }

    pub fn icompare(&mut self, compare: IntCompare, a: Value, b: Value, is_signed: bool) -> Value {
        let op = match (compare, is_signed) {
            (IntCompare::Equal, _) => Opcode::IEqual,
            (IntCompare::NotEqual, _) => Opcode::INotEqual,
            (IntCompare::LessThan, true) => Opcode::SLessThan,
            (IntCompare::LessThan, false) => Opcode::ULessThan,
            (IntCompare::GreaterThan, true) => Opcode::SGreaterThan,
            (IntCompare::GreaterThan, false) => Opcode::UGreaterThan,
            (IntCompare::LessThanEqual, true) => Opcode::SLessThanEqual,
            (IntCompare::LessThanEqual, false) => Opcode::ULessThanEqual,
            (IntCompare::GreaterThanEqual, true) => Opcode::SGreaterThanEqual,
            (IntCompare::GreaterThanEqual, false) => Opcode::UGreaterThanEqual,
        };
        self.emit(op, &[a, b])
    }

    pub fn logical_or(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::LogicalOr, &[a, b])
    }

    pub fn logical_and(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::LogicalAnd, &[a, b])
    }

    pub fn logical_xor(&mut self, a: Value, b: Value) -> Value {
        self.emit(Opcode::LogicalXor, &[a, b])
    }

    pub fn logical_not(&mut self, value: Value) -> Value {
        match value {
            Value::U1(v) => Value::U1(!v),
            _ => self.emit(Opcode::LogicalNot, &[value]),
        }
    }

    /// Convert a float to a 32-bit integer.
    pub fn convert_f_to_i(&mut self, value: Value, is_signed: bool) -> Value {
        match (self.value_type(value), is_signed) {
            (Type::F64, _) => self.emit(Opcode::ConvertS32F64, &[value]),
            (_, true) => self.emit(Opcode::ConvertS32F32, &[value]),
            (_, false) => self.emit(Opcode::ConvertU32F32, &[value]),
        }
    }

    /// Convert a 32-bit integer to a float with `bitsize` bits.
    pub fn convert_i_to_f(&mut self, value: Value, bitsize: u32, is_signed: bool) -> Value {
        let op = match (bitsize, is_signed) {
            (64, true) => Opcode::ConvertF64S32,
            (64, false) => Opcode::ConvertF64U32,
            (_, true) => Opcode::ConvertF32S32,
            (_, false) => Opcode::ConvertF32U32,
        };
        self.emit(op, &[value])
    }

    /// Convert between float sizes.
    pub fn fp_convert(&mut self, value: Value, bitsize: u32) -> Value {
        match (self.value_type(value), bitsize) {
            (Type::F32, 16) => self.emit(Opcode::ConvertF16F32, &[value]),
            (Type::F32, 64) => self.emit(Opcode::ConvertF64F32, &[value]),
            (Type::F16, 32) => self.emit(Opcode::ConvertF32F16, &[value]),
            (Type::F64, 32) => self.emit(Opcode::ConvertF32F64, &[value]),
            _ => value,
        }
    }

    pub fn uconvert(&mut self, value: Value, bitsize: u32) -> Value {
        match (self.value_type(value), bitsize) {
            (Type::U64, 32) => self.emit(Opcode::ConvertU32U64, &[value]),
            (Type::U32, 64) => self.emit(Opcode::ConvertU64U32, &[value]),
            _ => value,
        }
    }

    pub fn load_global(&mut self, op: Opcode, address: Value) -> Value {
        self.emit(op, &[address])
    }

    pub fn write_global(&mut self, op: Opcode, address: Value, value: Value) {
        self.emit(op, &[address, value]);
    }

    pub fn load_local(&mut self, word_offset: Value) -> Value {
        self.emit(Opcode::LoadLocal, &[word_offset])
    }

    pub fn write_local(&mut self, word_offset: Value, value: Value) {
        self.emit(Opcode::WriteLocal, &[word_offset, value]);
    }

    pub fn load_shared(&mut self, op: Opcode, offset: Value) -> Value {
        self.emit(op, &[offset])
    }

    pub fn write_shared(&mut self, op: Opcode, offset: Value, value: Value) {
        self.emit(op, &[offset, value]);
    }

    /// A texture instruction with the modifiers packed into the flags.
    pub fn image_op(&mut self, op: Opcode, args: &[Value], info: TextureInstInfo) -> Value {
        self.emit_flags(op, args, info.flags())
    }

    pub fn vote_all(&mut self, pred: Value) -> Value {
        self.emit(Opcode::VoteAll, &[pred])
    }

    pub fn vote_any(&mut self, pred: Value) -> Value {
        self.emit(Opcode::VoteAny, &[pred])
    }

    pub fn vote_equal(&mut self, pred: Value) -> Value {
        self.emit(Opcode::VoteEqual, &[pred])
    }

    pub fn subgroup_ballot(&mut self, pred: Value) -> Value {
        self.emit(Opcode::SubgroupBallot, &[pred])
    }

    pub fn shuffle(&mut self, op: Opcode, value: Value, index: Value, clamp: Value, segmentation_mask: Value) -> Value {
        self.emit(op, &[value, index, clamp, segmentation_mask])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn emit_in_order() {
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        let mut ir = IrEmitter::new(&mut pool, block);
        let a = ir.get_reg(Reg(2));
        let b = ir.fp_add(Value::F32(1.0), Value::F32(2.0), FpControl::default());
        assert_eq!(Value::U32(0), ir.get_reg(Reg::RZ));
        assert_eq!(Value::U1(false), ir.get_pred(Pred::PT, true));

        let insts = pool.block(block).instructions();
        assert_eq!(vec![a, b], insts.iter().map(|i| Value::Inst(*i)).collect::<Vec<_>>());
    }

    #[test]
    fn emit_before_instruction() {
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        IrEmitter::new(&mut pool, block).epilogue();
        let last = pool.block(block).instructions()[0];

        let mut ir = IrEmitter::before(&mut pool, last).unwrap();
        let first = ir.lane_id();
        assert_eq!(
            &[first.inst().unwrap(), last],
            pool.block(block).instructions()
        );
    }

    #[test]
    fn typed_dispatch() {
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        let mut ir = IrEmitter::new(&mut pool, block);
        let sum = ir.iadd(Value::U64(1), Value::U64(2));
        let vector = ir.composite_construct(&[Value::F32(0.0), Value::F32(1.0), Value::F32(2.0)]);
        let x = ir.composite_extract(vector, 0);
        assert_eq!(Type::U64, ir.value_type(sum));
        assert_eq!(Type::F32X3, ir.value_type(vector));
        assert_eq!(Opcode::CompositeExtractF32x3, pool.resolve_opcode(x).unwrap());
    }
}
