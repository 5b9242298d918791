use bitflags::bitflags;

bitflags! {
    /// An IR value type.
    ///
    /// Values always have exactly one type bit set.
    /// Multiple bits represent a set of types like the constant buffer types used by a program.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct Type: u32 {
        const OPAQUE = 1 << 0;
        const REG = 1 << 1;
        const PRED = 1 << 2;
        const ATTRIBUTE = 1 << 3;
        const PATCH = 1 << 4;
        const U1 = 1 << 5;
        const U8 = 1 << 6;
        const U16 = 1 << 7;
        const U32 = 1 << 8;
        const U64 = 1 << 9;
        const F16 = 1 << 10;
        const F32 = 1 << 11;
        const F64 = 1 << 12;
        const U32X2 = 1 << 13;
        const U32X3 = 1 << 14;
        const U32X4 = 1 << 15;
        const F16X2 = 1 << 16;
        const F16X3 = 1 << 17;
        const F16X4 = 1 << 18;
        const F32X2 = 1 << 19;
        const F32X3 = 1 << 20;
        const F32X4 = 1 << 21;
        const F64X2 = 1 << 22;
        const F64X3 = 1 << 23;
        const F64X4 = 1 << 24;
        const LABEL = 1 << 25;
    }
}

impl Type {
    pub const VOID: Type = Type::empty();

    /// The name of a single type or the names of each type in a set joined by `|`.
    pub fn name(self) -> String {
        if self.is_empty() {
            return "Void".to_string();
        }
        self.iter()
            .map(single_type_name)
            .collect::<Vec<_>>()
            .join("|")
    }

    /// The number of components for vector types and 1 for scalars.
    pub fn component_count(self) -> usize {
        if self.intersects(Type::U32X2 | Type::F16X2 | Type::F32X2 | Type::F64X2) {
            2
        } else if self.intersects(Type::U32X3 | Type::F16X3 | Type::F32X3 | Type::F64X3) {
            3
        } else if self.intersects(Type::U32X4 | Type::F16X4 | Type::F32X4 | Type::F64X4) {
            4
        } else {
            1
        }
    }
}

fn single_type_name(ty: Type) -> &'static str {
    match ty {
        Type::OPAQUE => "Opaque",
        Type::REG => "Reg",
        Type::PRED => "Pred",
        Type::ATTRIBUTE => "Attribute",
        Type::PATCH => "Patch",
        Type::U1 => "U1",
        Type::U8 => "U8",
        Type::U16 => "U16",
        Type::U32 => "U32",
        Type::U64 => "U64",
        Type::F16 => "F16",
        Type::F32 => "F32",
        Type::F64 => "F64",
        Type::U32X2 => "U32x2",
        Type::U32X3 => "U32x3",
        Type::U32X4 => "U32x4",
        Type::F16X2 => "F16x2",
        Type::F16X3 => "F16x3",
        Type::F16X4 => "F16x4",
        Type::F32X2 => "F32x2",
        Type::F32X3 => "F32x3",
        Type::F32X4 => "F32x4",
        Type::F64X2 => "F64x2",
        Type::F64X3 => "F64x3",
        Type::F64X4 => "F64x4",
        Type::LABEL => "Label",
        _ => "Invalid",
    }
}

/// Returns `true` if a value of type `lhs` can be used where `rhs` is expected.
/// Opaque types are compatible with every type.
pub fn are_types_compatible(lhs: Type, rhs: Type) -> bool {
    lhs == rhs || lhs == Type::OPAQUE || rhs == Type::OPAQUE || lhs.intersects(rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatible_types() {
        assert!(are_types_compatible(Type::U32, Type::U32));
        assert!(are_types_compatible(Type::OPAQUE, Type::F32));
        assert!(are_types_compatible(Type::F32, Type::OPAQUE));
        assert!(are_types_compatible(Type::U32, Type::U32 | Type::F32));
        assert!(!are_types_compatible(Type::U32, Type::F32));
        assert!(!are_types_compatible(Type::VOID, Type::U1));
    }

    #[test]
    fn type_names() {
        assert_eq!("Void", Type::VOID.name());
        assert_eq!("F32x4", Type::F32X4.name());
        assert_eq!("U8|U32", (Type::U8 | Type::U32).name());
    }
}
