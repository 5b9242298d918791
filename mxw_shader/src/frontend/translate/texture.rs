use mxw_lib::TextureType;

use super::TranslatorVisitor;
use crate::error::CompileError;
use crate::frontend::instruction::Instruction;
use crate::ir::{ImageFormat, Opcode, Reg, TextureInstInfo, Value};
use crate::not_implemented;
use bilge::prelude::*;

/// The level of detail mode in bits 55 to 57 of TEX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Blod {
    None,
    /// Level of detail zero.
    Lz,
    /// Level of detail bias.
    Lb,
    /// Explicit level of detail.
    Ll,
    Lba,
    Lla,
}

impl Blod {
    fn from_bits(bits: u64) -> Result<Self, CompileError> {
        match bits {
            0 => Ok(Blod::None),
            1 => Ok(Blod::Lz),
            2 => Ok(Blod::Lb),
            3 => Ok(Blod::Ll),
            6 => Ok(Blod::Lba),
            7 => Ok(Blod::Lla),
            _ => Err(not_implemented!("Invalid texture lod mode {bits}")),
        }
    }
}

fn sample_texture_type(bits: u64) -> Result<TextureType, CompileError> {
    match bits {
        0 => Ok(TextureType::Color1D),
        1 => Ok(TextureType::ColorArray1D),
        2 => Ok(TextureType::Color2D),
        3 => Ok(TextureType::ColorArray2D),
        4 => Ok(TextureType::Color3D),
        6 => Ok(TextureType::ColorCube),
        7 => Ok(TextureType::ColorArrayCube),
        _ => Err(not_implemented!("Texture type {bits}")),
    }
}

fn surface_texture_type(bits: u64) -> Result<TextureType, CompileError> {
    match bits {
        0 => Ok(TextureType::Color1D),
        1 => Ok(TextureType::Buffer),
        2 => Ok(TextureType::ColorArray1D),
        3 => Ok(TextureType::Color2D),
        4 => Ok(TextureType::ColorArray2D),
        5 => Ok(TextureType::Color3D),
        _ => Err(not_implemented!("Surface type {bits}")),
    }
}

impl TranslatorVisitor<'_, '_> {
    /// The array layer stored in the low 16 bits of `reg`.
    fn array_layer(&mut self, reg: Reg) -> Value {
        let value = self.x(reg);
        self.ir
            .bit_field_extract(value, Value::U32(0), Value::U32(16), false)
    }

    /// Float sample coordinates with the array layer in `reg` for array textures.
    fn sample_coords(&mut self, reg: Reg, ty: TextureType) -> Value {
        let (layer, first) = if ty.is_array() {
            let layer = self.array_layer(reg);
            (Some(self.ir.convert_i_to_f(layer, 32, false)), reg.offset(1))
        } else {
            (None, reg)
        };
        let mut elements: Vec<_> = (0..ty.coordinate_count() as u8)
            .map(|i| self.f(first.offset(i)))
            .collect();
        elements.extend(layer);
        self.vector_or_scalar(&elements)
    }

    /// Integer fetch coordinates with the array layer in `reg` for array textures.
    fn fetch_coords(&mut self, reg: Reg, ty: TextureType) -> Value {
        let (layer, first) = if ty.is_array() {
            (Some(self.array_layer(reg)), reg.offset(1))
        } else {
            (None, reg)
        };
        let mut elements: Vec<_> = (0..ty.coordinate_count() as u8)
            .map(|i| self.x(first.offset(i)))
            .collect();
        elements.extend(layer);
        self.vector_or_scalar(&elements)
    }

    fn vector_or_scalar(&mut self, elements: &[Value]) -> Value {
        if elements.len() == 1 {
            elements[0]
        } else {
            self.ir.composite_construct(elements)
        }
    }

    /// Texel offsets packed as signed 4-bit values in `reg`.
    fn texel_offset(&mut self, reg: Reg, ty: TextureType) -> Result<Value, CompileError> {
        if matches!(ty, TextureType::ColorCube | TextureType::ColorArrayCube) {
            return Err(not_implemented!("Texel offsets for cube textures"));
        }
        let value = self.x(reg);
        let elements: Vec<_> = (0..ty.coordinate_count() as u32)
            .map(|i| {
                self.ir
                    .bit_field_extract(value, Value::U32(i * 4), Value::U32(4), true)
            })
            .collect();
        Ok(self.vector_or_scalar(&elements))
    }

    /// Write the components enabled in `mask` to consecutive registers starting at `dest`.
    fn write_masked_components(&mut self, dest: Reg, sample: Value, mask: u64) {
        let mut reg = dest;
        for i in 0..4 {
            if mask & (1 << i) != 0 {
                let element = self.ir.composite_extract(sample, i);
                self.set_f(reg, element);
                reg = reg.offset(1);
            }
        }
    }

    pub(super) fn tex(&mut self, insn: Instruction, is_bindless: bool) -> Result<(), CompileError> {
        let ty = sample_texture_type(insn.bits(28, 3))?;
        let mask = insn.bits(31, 4);
        let is_depth = insn.bit(50);
        let has_offset = insn.bit(54);
        let blod = Blod::from_bits(insn.bits(55, 3))?;
        if matches!(blod, Blod::Lba | Blod::Lla) {
            return Err(not_implemented!("Texture lod mode {blod:?}"));
        }
        if is_depth && matches!(blod, Blod::Lz | Blod::Ll) {
            return Err(not_implemented!("Depth compare with explicit lod"));
        }

        let coords = self.sample_coords(insn.src_a(), ty);

        let mut meta = insn.src_b();
        let handle = if is_bindless {
            let handle = self.x(meta);
            meta = meta.offset(1);
            handle
        } else {
            Value::U32(insn.bits(36, 13) as u32 * 4)
        };

        let lod = match blod {
            Blod::Lz => Value::F32(0.0),
            Blod::Lb | Blod::Ll => {
                let lod = self.f(meta);
                meta = meta.offset(1);
                lod
            }
            _ => Value::Void,
        };
        let offset = if has_offset {
            let offset = self.texel_offset(meta, ty)?;
            meta = meta.offset(1);
            offset
        } else {
            Value::Void
        };

        let mut info = TextureInstInfo::default();
        info.set_texture_type_enum(ty);
        info.set_is_depth(is_depth);
        info.set_has_bias(blod == Blod::Lb);

        if is_depth {
            let dref = self.f(meta);
            let sample = self.ir.image_op(
                Opcode::ImageSampleDrefImplicitLod,
                &[handle, coords, dref, lod, offset],
                info,
            );
            if mask != 0 {
                self.set_f(insn.dest_reg(), sample);
            }
        } else {
            let op = match blod {
                Blod::Lz | Blod::Ll => Opcode::ImageSampleExplicitLod,
                _ => Opcode::ImageSampleImplicitLod,
            };
            let sample = self.ir.image_op(op, &[handle, coords, lod, offset], info);
            self.write_masked_components(insn.dest_reg(), sample, mask);
        }
        Ok(())
    }

    pub(super) fn tld(&mut self, insn: Instruction) -> Result<(), CompileError> {
        if insn.bit(50) {
            return Err(not_implemented!("TLD multisample"));
        }
        if insn.bit(54) {
            return Err(not_implemented!("TLD lod clamp"));
        }
        let ty = sample_texture_type(insn.bits(28, 3))?;
        let mask = insn.bits(31, 4);
        let coords = self.fetch_coords(insn.src_a(), ty);

        let mut meta = insn.src_b();
        let lod = if insn.bit(55) {
            let lod = self.x(meta);
            meta = meta.offset(1);
            lod
        } else {
            Value::U32(0)
        };
        let offset = if insn.bit(35) {
            self.texel_offset(meta, ty)?
        } else {
            Value::Void
        };

        let handle = Value::U32(insn.bits(36, 13) as u32 * 4);
        let mut info = TextureInstInfo::default();
        info.set_texture_type_enum(ty);
        let texel = self
            .ir
            .image_op(Opcode::ImageFetch, &[handle, coords, offset, lod], info);
        self.write_masked_components(insn.dest_reg(), texel, mask);
        Ok(())
    }

    pub(super) fn sust(&mut self, insn: Instruction) -> Result<(), CompileError> {
        let ty = surface_texture_type(insn.bits(33, 3))?;
        let handle = if insn.bit(51) {
            Value::U32(insn.bits(36, 13) as u32 * 4)
        } else {
            self.x(insn.src_c())
        };

        let reg = insn.src_a();
        let coords = if ty.is_array() {
            let count = ty.coordinate_count() as u8;
            let mut elements: Vec<_> = (0..count).map(|i| self.x(reg.offset(i))).collect();
            elements.push(self.array_layer(reg.offset(count)));
            self.vector_or_scalar(&elements)
        } else {
            let elements: Vec<_> = (0..ty.coordinate_count() as u8)
                .map(|i| self.x(reg.offset(i)))
                .collect();
            self.vector_or_scalar(&elements)
        };

        let data = insn.dest_reg();
        let (num_regs, format) = if insn.bit(52) {
            match insn.bits(20, 3) {
                4 => (1, ImageFormat::R32Uint),
                5 => (2, ImageFormat::R32G32Uint),
                6 => (4, ImageFormat::R32G32B32A32Uint),
                size => return Err(not_implemented!("SUST.D size {size}")),
            }
        } else {
            let mask = insn.bits(20, 4);
            if mask != 0xF {
                return Err(not_implemented!("SUST.P component mask {mask:#x}"));
            }
            (4, ImageFormat::Typeless)
        };
        let elements: Vec<_> = (0..4u8)
            .map(|i| {
                if i < num_regs {
                    self.x(data.offset(i))
                } else {
                    Value::U32(0)
                }
            })
            .collect();
        let color = self.ir.composite_construct(&elements);

        let mut info = TextureInstInfo::default();
        info.set_texture_type_enum(ty);
        info.set_image_format(u4::new(format as u8));
        self.ir
            .image_op(Opcode::ImageWrite, &[handle, coords, color], info);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{opcodes, translate_one};
    use crate::error::CompileError;
    use crate::ir::{Opcode, TextureInstInfo, Value};
    use mxw_lib::TextureType;
    use pretty_assertions::assert_eq;

    #[test]
    fn tex_bound_2d() {
        // TEX R4, R0, 0x10, 2D, 0xf
        let (pool, block) = translate_one(0xc000_0107_aff7_0004).unwrap();
        let insts = pool.block(block).instructions();
        let sample = insts
            .iter()
            .find(|i| pool.opcode(**i) == Opcode::ImageSampleImplicitLod)
            .unwrap();
        let inst = pool.inst(*sample);
        assert_eq!(Value::U32(0x40), inst.arg(0));
        let info = TextureInstInfo::from(inst.flags());
        assert_eq!(TextureType::Color2D, info.texture_type_enum());
        assert!(!info.is_depth());

        let writes = insts
            .iter()
            .filter(|i| pool.opcode(**i) == Opcode::SetRegister)
            .count();
        assert_eq!(4, writes);
    }

    #[test]
    fn tex_partial_mask() {
        // TEX R4, R0, 0x10, 2D, 0x5
        let ops = opcodes(0xc000_0102_aff7_0004);
        assert_eq!(
            2,
            ops.iter().filter(|op| **op == Opcode::SetRegister).count()
        );
    }

    #[test]
    fn sust_partial_mask() {
        // SUST.P with an RGB mask
        assert!(matches!(
            translate_one(0xeb28_0000_0077_0004),
            Err(CompileError::NotImplemented(_))
        ));
    }
}
