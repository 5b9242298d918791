//! Snapshots of the guest state a shader program reads during translation.
//!
//! A snapshot contains every instruction word, constant buffer value and texture type
//! the translator requested, so the program can be translated again without the guest.
use std::path::Path;

use binrw::{binrw, BinResult};

use crate::error::ReadFileError;
use crate::header::ProgramHeader;
use crate::{parse_count32, write_count32, Stage, TextureType};

#[binrw]
#[derive(Debug, PartialEq, Clone)]
#[brw(magic(b"MXEN"))]
pub struct EnvironmentBlob {
    pub stage: Stage,
    /// The address of the first instruction bundle relative to the code base.
    pub start_address: u32,
    /// The address of the first word in [code](#structfield.code).
    pub read_lowest: u32,
    /// The constant buffer index containing bound texture handles.
    pub texture_bound: u32,
    pub local_memory_size: u32,
    pub shared_memory_size: u32,
    pub workgroup_size: [u32; 3],
    pub sph: ProgramHeader,

    #[br(parse_with = parse_count32)]
    #[bw(write_with = write_count32)]
    pub code: Vec<u64>,

    #[br(parse_with = parse_count32)]
    #[bw(write_with = write_count32)]
    pub cbuf_values: Vec<CbufValue>,

    #[br(parse_with = parse_count32)]
    #[bw(write_with = write_count32)]
    pub texture_types: Vec<TextureTypeEntry>,
}

#[binrw]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct CbufValue {
    pub index: u32,
    pub offset: u32,
    pub value: u32,
}

#[binrw]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TextureTypeEntry {
    /// The raw texture handle combining texture and sampler indices.
    pub handle: u32,
    pub texture_type: TextureType,
}

impl EnvironmentBlob {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ReadFileError> {
        let bytes = std::fs::read(path)?;
        Ok(crate::read_le(&bytes)?)
    }

    pub fn to_bytes(&self) -> BinResult<Vec<u8>> {
        crate::write_le(self)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> BinResult<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// The instruction word at `address` or `None` if the word was never read.
    pub fn read_instruction(&self, address: u32) -> Option<u64> {
        let offset = address.checked_sub(self.read_lowest)?;
        if offset % 8 != 0 {
            return None;
        }
        self.code.get(offset as usize / 8).copied()
    }

    pub fn read_cbuf_value(&self, index: u32, offset: u32) -> Option<u32> {
        self.cbuf_values
            .iter()
            .find(|v| v.index == index && v.offset == offset)
            .map(|v| v.value)
    }

    pub fn read_texture_type(&self, handle: u32) -> Option<TextureType> {
        self.texture_types
            .iter()
            .find(|t| t.handle == handle)
            .map(|t| t.texture_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexlit::hex;
    use pretty_assertions::assert_eq;

    fn blob() -> EnvironmentBlob {
        EnvironmentBlob {
            stage: Stage::Compute,
            start_address: 0x100,
            read_lowest: 0x150,
            texture_bound: 0,
            local_memory_size: 0,
            shared_memory_size: 0x400,
            workgroup_size: [64, 1, 1],
            sph: ProgramHeader::from_bytes(&[0u8; 0x50]).unwrap(),
            code: vec![0x001f8000fc0007e0, 0x50b0000000070f00],
            cbuf_values: vec![CbufValue {
                index: 0,
                offset: 0x110,
                value: 0x1000,
            }],
            texture_types: vec![TextureTypeEntry {
                handle: 8,
                texture_type: TextureType::ColorCube,
            }],
        }
    }

    #[test]
    fn write_read_blob() {
        let blob = blob();
        let bytes = crate::write_le(&blob).unwrap();
        assert_eq!(&hex!(0x4d58454e 06000000 00010000 50010000), &bytes[..16]);
        assert_eq!(blob, crate::read_le(&bytes).unwrap());
    }

    #[test]
    fn read_blob_values() {
        let blob = blob();
        assert_eq!(Some(0x001f8000fc0007e0), blob.read_instruction(0x150));
        assert_eq!(Some(0x50b0000000070f00), blob.read_instruction(0x158));
        assert_eq!(None, blob.read_instruction(0x148));
        assert_eq!(None, blob.read_instruction(0x160));
        assert_eq!(Some(0x1000), blob.read_cbuf_value(0, 0x110));
        assert_eq!(None, blob.read_cbuf_value(1, 0x110));
        assert_eq!(Some(TextureType::ColorCube), blob.read_texture_type(8));
    }
}
