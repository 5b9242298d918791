//! Folding of constant expressions and simple algebraic identities.
use crate::error::CompileError;
use crate::ir::{InstId, ObjectPool, Opcode, Program, Value};

fn is_commutative(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::IAdd32
            | Opcode::IAdd64
            | Opcode::IMul32
            | Opcode::BitwiseAnd32
            | Opcode::BitwiseOr32
            | Opcode::BitwiseXor32
            | Opcode::FPAdd32
            | Opcode::FPMul32
            | Opcode::FPMin32
            | Opcode::FPMax32
            | Opcode::SMin32
            | Opcode::UMin32
            | Opcode::SMax32
            | Opcode::UMax32
            | Opcode::IEqual
            | Opcode::INotEqual
            | Opcode::LogicalAnd
            | Opcode::LogicalOr
            | Opcode::LogicalXor
    )
}

/// Replace identity arguments with the values they forward.
fn collapse_identities(pool: &mut ObjectPool, inst: InstId) -> Result<(), CompileError> {
    for i in 0..pool.inst(inst).num_args() {
        let arg = pool.inst(inst).arg(i);
        let resolved = pool.resolve(arg);
        if resolved != arg {
            pool.set_arg(inst, i, resolved)?;
        }
    }
    Ok(())
}

/// Move immediates to the second argument.
fn canonicalize(pool: &mut ObjectPool, inst: InstId) -> Result<(), CompileError> {
    let (a, b) = (pool.inst(inst).arg(0), pool.inst(inst).arg(1));
    if a.is_immediate() && !b.is_immediate() {
        pool.set_arg(inst, 0, b)?;
        pool.set_arg(inst, 1, a)?;
    }
    Ok(())
}

fn fold_u32(op: Opcode, a: u32, b: u32) -> Option<u32> {
    match op {
        Opcode::IAdd32 => Some(a.wrapping_add(b)),
        Opcode::ISub32 => Some(a.wrapping_sub(b)),
        Opcode::IMul32 => Some(a.wrapping_mul(b)),
        Opcode::BitwiseAnd32 => Some(a & b),
        Opcode::BitwiseOr32 => Some(a | b),
        Opcode::BitwiseXor32 => Some(a ^ b),
        Opcode::ShiftLeftLogical32 => Some(a.wrapping_shl(b)),
        Opcode::ShiftRightLogical32 => Some(a.wrapping_shr(b)),
        Opcode::ShiftRightArithmetic32 => Some((a as i32).wrapping_shr(b) as u32),
        Opcode::SMin32 => Some((a as i32).min(b as i32) as u32),
        Opcode::UMin32 => Some(a.min(b)),
        Opcode::SMax32 => Some((a as i32).max(b as i32) as u32),
        Opcode::UMax32 => Some(a.max(b)),
        _ => None,
    }
}

fn compare_u32(op: Opcode, a: u32, b: u32) -> Option<bool> {
    let (sa, sb) = (a as i32, b as i32);
    match op {
        Opcode::IEqual => Some(a == b),
        Opcode::INotEqual => Some(a != b),
        Opcode::SLessThan => Some(sa < sb),
        Opcode::ULessThan => Some(a < b),
        Opcode::SLessThanEqual => Some(sa <= sb),
        Opcode::ULessThanEqual => Some(a <= b),
        Opcode::SGreaterThan => Some(sa > sb),
        Opcode::UGreaterThan => Some(a > b),
        Opcode::SGreaterThanEqual => Some(sa >= sb),
        Opcode::UGreaterThanEqual => Some(a >= b),
        _ => None,
    }
}

fn bit_field_extract(base: u32, offset: u32, count: u32, is_signed: bool) -> u32 {
    if count == 0 {
        return 0;
    }
    let count = count.min(32);
    let shifted = base.checked_shr(offset).unwrap_or(0);
    if count == 32 {
        return shifted;
    }
    let value = shifted & ((1u32 << count) - 1);
    if is_signed && value & (1 << (count - 1)) != 0 {
        value | !((1u32 << count) - 1)
    } else {
        value
    }
}

/// The value `inst` can be replaced with if any.
fn fold(pool: &ObjectPool, inst: InstId) -> Option<Value> {
    let i = pool.inst(inst);
    let op = i.opcode();
    let a = i.arg(0);
    let b = i.arg(1);

    // The operand of a unary instruction and the opcode that defines it.
    let def = |value: Value| {
        let id = value.inst()?;
        Some((pool.opcode(id), pool.inst(id)))
    };

    match op {
        Opcode::IAdd32 | Opcode::BitwiseOr32 | Opcode::BitwiseXor32 if b == Value::U32(0) => {
            Some(a)
        }
        Opcode::IMul32 if b == Value::U32(1) => Some(a),
        Opcode::IMul32 | Opcode::BitwiseAnd32 if b == Value::U32(0) => Some(Value::U32(0)),
        Opcode::IAdd64 => match (a, b) {
            (Value::U64(a), Value::U64(b)) => Some(Value::U64(a.wrapping_add(b))),
            (a, Value::U64(0)) => Some(a),
            _ => None,
        },
        Opcode::INeg32 => a.u32().map(|a| Value::U32(a.wrapping_neg())),
        Opcode::BitwiseNot32 => match def(a) {
            Some((Opcode::BitwiseNot32, inner)) => Some(inner.arg(0)),
            _ => a.u32().map(|a| Value::U32(!a)),
        },
        Opcode::BitFieldUExtract | Opcode::BitFieldSExtract => {
            let (base, offset, count) = (a.u32()?, b.u32()?, i.arg(2).u32()?);
            let signed = op == Opcode::BitFieldSExtract;
            Some(Value::U32(bit_field_extract(base, offset, count, signed)))
        }
        Opcode::FPAdd32 => match (a, b) {
            (Value::F32(a), Value::F32(b)) => Some(Value::F32(a + b)),
            _ => None,
        },
        Opcode::FPMul32 => match (a, b) {
            (Value::F32(a), Value::F32(b)) => Some(Value::F32(a * b)),
            _ => None,
        },
        Opcode::FPNeg32 => match def(a) {
            Some((Opcode::FPNeg32, inner)) => Some(inner.arg(0)),
            _ => a.f32().map(|a| Value::F32(-a)),
        },
        Opcode::FPAbs32 => a.f32().map(|a| Value::F32(a.abs())),
        Opcode::LogicalNot => match def(a) {
            Some((Opcode::LogicalNot, inner)) => Some(inner.arg(0)),
            _ => a.u1().map(|a| Value::U1(!a)),
        },
        Opcode::LogicalAnd => match (a, b) {
            (Value::U1(a), Value::U1(b)) => Some(Value::U1(a && b)),
            (a, Value::U1(true)) => Some(a),
            (_, Value::U1(false)) => Some(Value::U1(false)),
            _ => None,
        },
        Opcode::LogicalOr => match (a, b) {
            (Value::U1(a), Value::U1(b)) => Some(Value::U1(a || b)),
            (a, Value::U1(false)) => Some(a),
            (_, Value::U1(true)) => Some(Value::U1(true)),
            _ => None,
        },
        Opcode::LogicalXor => match (a, b) {
            (Value::U1(a), Value::U1(b)) => Some(Value::U1(a ^ b)),
            (a, Value::U1(false)) => Some(a),
            _ => None,
        },
        Opcode::SelectU1
        | Opcode::SelectU32
        | Opcode::SelectU64
        | Opcode::SelectF32
        | Opcode::SelectF64 => match a.u1() {
            Some(true) => Some(b),
            Some(false) => Some(i.arg(2)),
            None => (b == i.arg(2)).then_some(b),
        },
        Opcode::BitCastF32U32 => match def(a) {
            Some((Opcode::BitCastU32F32, inner)) => Some(inner.arg(0)),
            _ => a.u32().map(|a| Value::F32(f32::from_bits(a))),
        },
        Opcode::BitCastU32F32 => match def(a) {
            Some((Opcode::BitCastF32U32, inner)) => Some(inner.arg(0)),
            _ => a.f32().map(|a| Value::U32(a.to_bits())),
        },
        Opcode::PackUint2x32 => match def(a) {
            Some((Opcode::UnpackUint2x32, inner)) => Some(inner.arg(0)),
            _ => None,
        },
        Opcode::UnpackUint2x32 => match def(a) {
            Some((Opcode::PackUint2x32, inner)) => Some(inner.arg(0)),
            _ => None,
        },
        Opcode::PackDouble2x32 => match def(a) {
            Some((Opcode::UnpackDouble2x32, inner)) => Some(inner.arg(0)),
            _ => None,
        },
        Opcode::UnpackDouble2x32 => match def(a) {
            Some((Opcode::PackDouble2x32, inner)) => Some(inner.arg(0)),
            _ => None,
        },
        Opcode::CompositeExtractU32x2
        | Opcode::CompositeExtractU32x3
        | Opcode::CompositeExtractU32x4
        | Opcode::CompositeExtractF32x2
        | Opcode::CompositeExtractF32x3
        | Opcode::CompositeExtractF32x4 => {
            let (construct_op, vector) = def(a)?;
            let is_construct = matches!(
                construct_op,
                Opcode::CompositeConstructU32x2
                    | Opcode::CompositeConstructU32x3
                    | Opcode::CompositeConstructU32x4
                    | Opcode::CompositeConstructF32x2
                    | Opcode::CompositeConstructF32x3
                    | Opcode::CompositeConstructF32x4
            );
            let element = b.u32()? as usize;
            (is_construct && element < vector.num_args()).then(|| vector.arg(element))
        }
        Opcode::ConvertU64U32 => a.u32().map(|a| Value::U64(a as u64)),
        Opcode::ConvertU32U64 => a.u64().map(|a| Value::U32(a as u32)),
        Opcode::ConvertF32U32 => a.u32().map(|a| Value::F32(a as f32)),
        Opcode::ConvertF32S32 => a.u32().map(|a| Value::F32(a as i32 as f32)),
        _ => match (a, b) {
            (Value::U32(a), Value::U32(b)) => fold_u32(op, a, b)
                .map(Value::U32)
                .or_else(|| compare_u32(op, a, b).map(Value::U1)),
            _ => None,
        },
    }
}

/// Fold constants and remove redundant instructions.
///
/// Blocks are visited in reverse post order so that arguments are folded before their users.
pub fn constant_propagation(program: &mut Program) -> Result<(), CompileError> {
    let pool = &mut program.pool;
    for block in program.post_order_blocks.iter().rev() {
        let insts = pool.block(*block).instructions().to_vec();
        for inst in insts {
            let op = pool.opcode(inst);
            if matches!(op, Opcode::Void | Opcode::Identity) {
                continue;
            }
            collapse_identities(pool, inst)?;
            if op == Opcode::Phi || op.is_pseudo_instruction() {
                continue;
            }
            if is_commutative(op) {
                canonicalize(pool, inst)?;
            }
            // Instructions with secondary outputs must stay in place.
            if pool.inst(inst).has_associated_pseudo_operation() {
                continue;
            }
            if let Some(value) = fold(pool, inst) {
                pool.replace_uses_with(inst, value)?;
            }
        }
    }
    Ok(())
}
