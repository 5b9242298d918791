use std::hash::{Hash, Hasher};

use super::attribute::{Attribute, Patch};
use super::reg::{Pred, Reg};
use super::types::Type;
use super::{BlockId, InstId};

/// An instruction argument.
///
/// Values are either immediates or references to the instruction defining the value.
/// Immediates compare by value and instruction references compare by identity.
#[derive(Debug, Clone, Copy, Default)]
pub enum Value {
    #[default]
    Void,
    Inst(InstId),
    Label(BlockId),
    Reg(Reg),
    Pred(Pred),
    Attribute(Attribute),
    Patch(Patch),
    U1(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Returns `true` for anything that is not an instruction reference.
    /// Identity chains are not resolved. See [ObjectPool::resolve](super::ObjectPool::resolve).
    pub fn is_immediate(&self) -> bool {
        !matches!(self, Value::Inst(_))
    }

    /// Returns `true` for numeric constants.
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Value::U1(_)
                | Value::U8(_)
                | Value::U16(_)
                | Value::U32(_)
                | Value::U64(_)
                | Value::F32(_)
                | Value::F64(_)
        )
    }

    pub fn inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(i) => Some(*i),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<BlockId> {
        match self {
            Value::Label(b) => Some(*b),
            _ => None,
        }
    }

    pub fn reg(&self) -> Option<Reg> {
        match self {
            Value::Reg(r) => Some(*r),
            _ => None,
        }
    }

    pub fn pred(&self) -> Option<Pred> {
        match self {
            Value::Pred(p) => Some(*p),
            _ => None,
        }
    }

    pub fn attribute(&self) -> Option<Attribute> {
        match self {
            Value::Attribute(a) => Some(*a),
            _ => None,
        }
    }

    pub fn patch(&self) -> Option<Patch> {
        match self {
            Value::Patch(p) => Some(*p),
            _ => None,
        }
    }

    pub fn u1(&self) -> Option<bool> {
        match self {
            Value::U1(v) => Some(*v),
            _ => None,
        }
    }

    pub fn u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// The raw bits of a 32-bit or smaller constant.
    pub fn bits32(&self) -> Option<u32> {
        match self {
            Value::U1(v) => Some(*v as u32),
            Value::U8(v) => Some(*v as u32),
            Value::U16(v) => Some(*v as u32),
            Value::U32(v) => Some(*v),
            Value::F32(v) => Some(v.to_bits()),
            _ => None,
        }
    }

    /// The type of an immediate. Instruction references report [Type::OPAQUE].
    pub fn immediate_type(&self) -> Type {
        match self {
            Value::Void => Type::VOID,
            Value::Inst(_) => Type::OPAQUE,
            Value::Label(_) => Type::LABEL,
            Value::Reg(_) => Type::REG,
            Value::Pred(_) => Type::PRED,
            Value::Attribute(_) => Type::ATTRIBUTE,
            Value::Patch(_) => Type::PATCH,
            Value::U1(_) => Type::U1,
            Value::U8(_) => Type::U8,
            Value::U16(_) => Type::U16,
            Value::U32(_) => Type::U32,
            Value::U64(_) => Type::U64,
            Value::F32(_) => Type::F32,
            Value::F64(_) => Type::F64,
        }
    }

    /// The zero constant for a scalar or vector type.
    /// Vector zeroes are not representable as immediates and return `None`.
    pub fn zero(ty: Type) -> Option<Self> {
        match ty {
            Type::U1 => Some(Value::U1(false)),
            Type::U8 => Some(Value::U8(0)),
            Type::U16 => Some(Value::U16(0)),
            Type::U32 => Some(Value::U32(0)),
            Type::U64 => Some(Value::U64(0)),
            Type::F32 => Some(Value::F32(0.0)),
            Type::F64 => Some(Value::F64(0.0)),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) => true,
            (Value::Inst(a), Value::Inst(b)) => a == b,
            (Value::Label(a), Value::Label(b)) => a == b,
            (Value::Reg(a), Value::Reg(b)) => a == b,
            (Value::Pred(a), Value::Pred(b)) => a == b,
            (Value::Attribute(a), Value::Attribute(b)) => a == b,
            (Value::Patch(a), Value::Patch(b)) => a == b,
            (Value::U1(a), Value::U1(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a.to_bits() == b.to_bits(),
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Void => (),
            Value::Inst(i) => i.hash(state),
            Value::Label(b) => b.hash(state),
            Value::Reg(r) => r.hash(state),
            Value::Pred(p) => p.hash(state),
            Value::Attribute(a) => a.hash(state),
            Value::Patch(p) => p.hash(state),
            Value::U1(v) => v.hash(state),
            Value::U8(v) => v.hash(state),
            Value::U16(v) => v.hash(state),
            Value::U32(v) => v.hash(state),
            Value::U64(v) => v.hash(state),
            Value::F32(v) => v.to_bits().hash(state),
            Value::F64(v) => v.to_bits().hash(state),
        }
    }
}

impl From<InstId> for Value {
    fn from(value: InstId) -> Self {
        Value::Inst(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::U1(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::U32(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::U64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::F32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<Reg> for Value {
    fn from(value: Reg) -> Self {
        Value::Reg(value)
    }
}

impl From<Pred> for Value {
    fn from(value: Pred) -> Self {
        Value::Pred(value)
    }
}

impl From<Attribute> for Value {
    fn from(value: Attribute) -> Self {
        Value::Attribute(value)
    }
}

impl From<Patch> for Value {
    fn from(value: Patch) -> Self {
        Value::Patch(value)
    }
}
