//! A library for the binary formats shared by the Maxwell shader recompiler and its pipeline cache.
//!
//! # Getting Started
//! Shader programs start with a 0x50 byte [ProgramHeader](header::ProgramHeader)
//! followed by the instruction words for the program.
//! Pipelines are identified by a [GraphicsPipelineKey](key::GraphicsPipelineKey)
//! or [ComputePipelineKey](key::ComputePipelineKey) and persisted with their shader environments
//! to a [PipelineCacheFile](cache::PipelineCacheFile).
//!
//! ```rust no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = mxw_lib::cache::PipelineCacheFile::from_file("0100000000010000.bin")?;
//! for record in &cache.records {
//!     println!("{:?} {} environments", record.kind, record.environments.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Design
//! Each binary type derives its reading and writing code from its attribute annotations.
//! Bit packed fields use bitfield types to preserve every bit of the original value,
//! so unmodified inputs always write back identically.
//! Plain old data types like pipeline keys are compared and hashed as raw bytes.
use std::io::{Cursor, Seek};

use binrw::{BinRead, BinReaderExt, BinResult, BinWrite, BinWriterExt};

pub mod cache;
pub mod environment;
pub mod error;
pub mod hash;
pub mod header;
pub mod key;

/// The pipeline stage of a shader program.
///
/// Vertex programs have two variants since a game may provide a second vertex
/// program that gets merged with the first before translation.
#[derive(Debug, BinRead, BinWrite, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[brw(repr(u32))]
pub enum Stage {
    VertexA = 0,
    VertexB = 1,
    TessellationControl = 2,
    TessellationEval = 3,
    Geometry = 4,
    Fragment = 5,
    Compute = 6,
}

impl Stage {
    /// The index into per stage tables like the 5 graphics pipeline stages.
    /// [Stage::VertexA] and [Stage::VertexB] share an index.
    pub fn graphics_index(self) -> Option<usize> {
        match self {
            Stage::VertexA | Stage::VertexB => Some(0),
            Stage::TessellationControl => Some(1),
            Stage::TessellationEval => Some(2),
            Stage::Geometry => Some(3),
            Stage::Fragment => Some(4),
            Stage::Compute => None,
        }
    }
}

/// The dimensionality of a texture or image binding.
#[derive(Debug, BinRead, BinWrite, PartialEq, Eq, Hash, Clone, Copy, Default)]
#[brw(repr(u32))]
pub enum TextureType {
    Color1D = 0,
    ColorArray1D = 1,
    #[default]
    Color2D = 2,
    ColorArray2D = 3,
    Color3D = 4,
    ColorCube = 5,
    ColorArrayCube = 6,
    Buffer = 7,
    Color2DRect = 8,
}

impl TextureType {
    /// The texture type for the raw enum value `value`.
    pub fn from_index(value: u8) -> Option<Self> {
        match value {
            0 => Some(TextureType::Color1D),
            1 => Some(TextureType::ColorArray1D),
            2 => Some(TextureType::Color2D),
            3 => Some(TextureType::ColorArray2D),
            4 => Some(TextureType::Color3D),
            5 => Some(TextureType::ColorCube),
            6 => Some(TextureType::ColorArrayCube),
            7 => Some(TextureType::Buffer),
            8 => Some(TextureType::Color2DRect),
            _ => None,
        }
    }

    /// The number of coordinate components excluding the array layer.
    pub fn coordinate_count(self) -> usize {
        match self {
            TextureType::Color1D | TextureType::ColorArray1D | TextureType::Buffer => 1,
            TextureType::Color2D | TextureType::ColorArray2D | TextureType::Color2DRect => 2,
            TextureType::Color3D | TextureType::ColorCube | TextureType::ColorArrayCube => 3,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            TextureType::ColorArray1D | TextureType::ColorArray2D | TextureType::ColorArrayCube
        )
    }
}

/// Read a little endian value from `bytes`.
pub fn read_le<T>(bytes: &[u8]) -> BinResult<T>
where
    for<'a> T: BinRead<Args<'a> = ()>,
{
    Cursor::new(bytes).read_le()
}

/// Write a little endian value to a new buffer.
pub fn write_le<T>(value: &T) -> BinResult<Vec<u8>>
where
    for<'a> T: BinWrite<Args<'a> = ()>,
{
    let mut writer = Cursor::new(Vec::new());
    writer.write_le(value)?;
    Ok(writer.into_inner())
}

fn parse_count<T, R, N>(reader: &mut R, endian: binrw::Endian) -> BinResult<Vec<T>>
where
    for<'a> T: BinRead<Args<'a> = ()> + 'static,
    for<'a> N: BinRead<Args<'a> = ()> + Into<u64>,
    R: std::io::Read + std::io::Seek,
{
    let pos = reader.stream_position()?;
    let count = N::read_options(reader, endian, ())?.into();
    let count = usize::try_from(count).map_err(|_| binrw::Error::AssertFail {
        pos,
        message: format!("count {count} does not fit in usize"),
    })?;

    <Vec<T>>::read_options(
        reader,
        endian,
        binrw::VecArgs { count, inner: () },
    )
}

pub(crate) fn parse_count32<T, R>(
    reader: &mut R,
    endian: binrw::Endian,
    _args: (),
) -> BinResult<Vec<T>>
where
    for<'a> T: BinRead<Args<'a> = ()> + 'static,
    R: std::io::Read + std::io::Seek,
{
    parse_count::<T, R, u32>(reader, endian)
}

#[binrw::writer(writer, endian)]
pub(crate) fn write_count32<T>(value: &Vec<T>) -> BinResult<()>
where
    for<'a> T: BinWrite<Args<'a> = ()> + 'static,
{
    (value.len() as u32).write_options(writer, endian, ())?;
    value.write_options(writer, endian, ())?;
    Ok(())
}

#[cfg(test)]
#[macro_export]
macro_rules! assert_hex_eq {
    ($a:expr, $b:expr) => {
        pretty_assertions::assert_str_eq!(hex::encode($a), hex::encode($b))
    };
}
