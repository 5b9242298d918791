use std::fmt;

/// A 32-bit general purpose register `R0` to `R254` or the zero register [Reg::RZ].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u8);

impl Reg {
    pub const RZ: Reg = Reg(255);
    pub const NUM_USER_REGS: usize = 255;

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_zero(self) -> bool {
        self == Self::RZ
    }

    /// The register `offset` registers after this one for vector operands.
    /// The zero register stays the zero register.
    pub fn offset(self, offset: u8) -> Reg {
        if self.is_zero() {
            self
        } else {
            Reg(self.0.saturating_add(offset).min(254))
        }
    }

    /// Returns `true` if the register index is a multiple of `align`.
    pub fn is_aligned(self, align: u8) -> bool {
        self.is_zero() || self.0 % align == 0
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "RZ")
        } else {
            write!(f, "R{}", self.0)
        }
    }
}

/// A 1-bit predicate register `P0` to `P6` or the always true predicate [Pred::PT].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pred(pub u8);

impl Pred {
    pub const PT: Pred = Pred(7);
    pub const NUM_USER_PREDS: usize = 7;

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_true(self) -> bool {
        self == Self::PT
    }
}

impl fmt::Display for Pred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_true() {
            write!(f, "PT")
        } else {
            write!(f, "P{}", self.0)
        }
    }
}
