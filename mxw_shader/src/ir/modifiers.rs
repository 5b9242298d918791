//! Instruction modifiers packed into the flags of an instruction.
use bilge::prelude::*;
use mxw_lib::TextureType;

#[bitsize(3)]
#[derive(Debug, FromBits, PartialEq, Eq, Clone, Copy)]
pub enum FpRounding {
    DontCare = 0,
    /// Round to nearest even.
    Rn = 1,
    /// Round towards negative infinity.
    Rm = 2,
    /// Round towards positive infinity.
    Rp = 3,
    /// Round towards zero.
    Rz = 4,
    #[fallback]
    Reserved,
}

/// How denormals and multiplications by zero are handled.
#[bitsize(2)]
#[derive(Debug, FromBits, PartialEq, Eq, Clone, Copy)]
pub enum FmzMode {
    DontCare = 0,
    /// Flush denormals to zero.
    Ftz = 1,
    /// Flush denormals to zero and treat `0 * x` as `0` even for infinity and NaN.
    Fmz = 2,
    None = 3,
}

/// Floating point modifiers for arithmetic instructions.
#[bitsize(32)]
#[derive(DebugBits, FromBits, Clone, Copy, PartialEq, Eq)]
pub struct FpControl {
    /// Disallow fusing with other operations like `a * b + c` into a single fma.
    pub no_contraction: bool,
    pub rounding: FpRounding,
    pub fmz_mode: FmzMode,
    pub unk1: u26,
}

impl Default for FpControl {
    fn default() -> Self {
        Self::from(0u32)
    }
}

impl FpControl {
    pub fn flags(self) -> u32 {
        self.into()
    }
}

/// Texture and image instruction modifiers.
#[bitsize(32)]
#[derive(DebugBits, FromBits, Clone, Copy, PartialEq, Eq)]
pub struct TextureInstInfo {
    /// The index into the texture or image descriptors after the texture pass.
    /// The raw handle index before the texture pass.
    pub descriptor_index: u16,
    pub texture_type: u4,
    pub is_depth: bool,
    pub has_bias: bool,
    pub has_lod_clamp: bool,
    pub relaxed_precision: bool,
    pub gather_component: u2,
    pub num_derivatives: u2,
    pub image_format: u4,
}

impl Default for TextureInstInfo {
    fn default() -> Self {
        Self::from(0u32)
    }
}

impl TextureInstInfo {
    pub fn flags(self) -> u32 {
        self.into()
    }

    pub fn texture_type_enum(self) -> TextureType {
        TextureType::from_index(self.texture_type().value()).unwrap_or_default()
    }

    pub fn set_texture_type_enum(&mut self, ty: TextureType) {
        self.set_texture_type(u4::new(ty as u8));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fp_control_bits() {
        let mut control = FpControl::default();
        control.set_no_contraction(true);
        control.set_rounding(FpRounding::Rz);
        control.set_fmz_mode(FmzMode::Ftz);
        assert_eq!(0b01_100_1, control.flags());
        assert_eq!(control, FpControl::from(control.flags()));
    }

    #[test]
    fn texture_info_bits() {
        let mut info = TextureInstInfo::default();
        info.set_descriptor_index(3);
        info.set_texture_type_enum(TextureType::ColorArray2D);
        info.set_is_depth(true);
        assert_eq!(0x0013_0003, info.flags());
        assert_eq!(TextureType::ColorArray2D, info.texture_type_enum());
    }
}
