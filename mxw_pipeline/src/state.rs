//! The subset of GPU register state that selects and configures pipelines.
//!
//! Keys only store the state that changes generated code.
//! Everything else in the register state is bound at draw time.
use bilge::prelude::*;
use bytemuck::Zeroable;
use mxw_lib::key::{
    ComputePipelineKey, GraphicsKeyBits, GraphicsPipelineKey, TransformFeedbackState, NUM_PROGRAMS,
};
use mxw_lib::Stage;
use mxw_shader::ir::MAX_CBUFS;
use mxw_shader::profile::{InputTopology, TessPrimitive, TessSpacing};

/// The number of graphics stages with their own constant buffer bindings.
pub const NUM_STAGES: usize = 5;

/// The stage for each program slot in [GraphicsState::programs].
pub const PROGRAM_STAGES: [Stage; NUM_PROGRAMS] = [
    Stage::VertexA,
    Stage::VertexB,
    Stage::TessellationControl,
    Stage::TessellationEval,
    Stage::Geometry,
    Stage::Fragment,
];

/// A program slot in the graphics register state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgramState {
    pub enabled: bool,
    /// The offset of the program header relative to the program base address.
    pub offset: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConstBufferBinding {
    pub enabled: bool,
    pub address: u64,
    pub size: u32,
}

/// The location of the texture header (TIC) table in guest memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorTable {
    pub address: u64,
    /// The index of the last valid entry.
    pub limit: u32,
}

/// Resource state shared by graphics stages and compute dispatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResources {
    pub const_buffers: [ConstBufferBinding; MAX_CBUFS],
}

impl Default for StageResources {
    fn default() -> Self {
        Self {
            const_buffers: [ConstBufferBinding::default(); MAX_CBUFS],
        }
    }
}

/// Primitive topologies using the raw register values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    #[default]
    Points = 0,
    Lines = 1,
    LineLoop = 2,
    LineStrip = 3,
    Triangles = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
    Quads = 7,
    QuadStrip = 8,
    Polygon = 9,
    LinesAdjacency = 10,
    LineStripAdjacency = 11,
    TrianglesAdjacency = 12,
    TriangleStripAdjacency = 13,
    Patches = 14,
}

impl PrimitiveTopology {
    pub fn from_index(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Points),
            1 => Some(Self::Lines),
            2 => Some(Self::LineLoop),
            3 => Some(Self::LineStrip),
            4 => Some(Self::Triangles),
            5 => Some(Self::TriangleStrip),
            6 => Some(Self::TriangleFan),
            7 => Some(Self::Quads),
            8 => Some(Self::QuadStrip),
            9 => Some(Self::Polygon),
            10 => Some(Self::LinesAdjacency),
            11 => Some(Self::LineStripAdjacency),
            12 => Some(Self::TrianglesAdjacency),
            13 => Some(Self::TriangleStripAdjacency),
            14 => Some(Self::Patches),
            _ => None,
        }
    }

    /// The primitive type seen by a geometry program.
    pub fn input_topology(self) -> InputTopology {
        match self {
            Self::Points => InputTopology::Points,
            Self::Lines | Self::LineLoop | Self::LineStrip => InputTopology::Lines,
            Self::LinesAdjacency | Self::LineStripAdjacency => InputTopology::LinesAdjacency,
            Self::TrianglesAdjacency | Self::TriangleStripAdjacency => {
                InputTopology::TrianglesAdjacency
            }
            Self::Triangles
            | Self::TriangleStrip
            | Self::TriangleFan
            | Self::Quads
            | Self::QuadStrip
            | Self::Polygon
            | Self::Patches => InputTopology::Triangles,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TessellationState {
    pub primitive: TessPrimitive,
    pub spacing: TessSpacing,
    pub clockwise: bool,
}

/// Register state for a draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsState {
    /// The GPU address added to every program offset.
    pub program_base: u64,
    pub programs: [ProgramState; NUM_PROGRAMS],
    pub resources: [StageResources; NUM_STAGES],
    /// The constant buffer index containing bound texture handles.
    pub texture_bound: u32,
    pub tic: DescriptorTable,
    pub topology: PrimitiveTopology,
    pub tessellation: TessellationState,
    pub early_z: bool,
    pub xfb_enabled: bool,
    pub xfb_state: TransformFeedbackState,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            program_base: 0,
            programs: [ProgramState::default(); NUM_PROGRAMS],
            resources: Default::default(),
            texture_bound: 0,
            tic: DescriptorTable::default(),
            topology: PrimitiveTopology::default(),
            tessellation: TessellationState::default(),
            early_z: false,
            xfb_enabled: false,
            xfb_state: TransformFeedbackState::zeroed(),
        }
    }
}

impl GraphicsState {
    /// The GPU address of the program header for program slot `index`.
    pub fn program_address(&self, index: usize) -> Option<u64> {
        let program = self.programs.get(index)?;
        program
            .enabled
            .then(|| self.program_base + u64::from(program.offset))
    }

    /// Create the key for the current state with the content hash for each program slot.
    /// Disabled programs should use a hash of 0.
    pub fn pipeline_key(&self, unique_hashes: [u64; NUM_PROGRAMS]) -> GraphicsPipelineKey {
        let mut key = GraphicsPipelineKey {
            unique_hashes,
            ..Default::default()
        };

        // Only geometry programs depend on the input primitive.
        let has_geometry = unique_hashes[4] != 0;
        let gs_input_topology = if has_geometry { self.topology as u8 } else { 0 };
        // Tessellation state only matters with a tessellation evaluation program.
        let tessellation = if unique_hashes[3] != 0 {
            self.tessellation
        } else {
            TessellationState::default()
        };

        key.set_bits(GraphicsKeyBits::new(
            self.xfb_enabled,
            self.early_z,
            u4::new(gs_input_topology),
            u2::new(tess_primitive_index(tessellation.primitive)),
            u2::new(tess_spacing_index(tessellation.spacing)),
            tessellation.clockwise,
            u21::new(0),
        ));
        if self.xfb_enabled {
            key.xfb_state = self.xfb_state;
        }
        key
    }
}

/// Register state and launch descriptor values for a dispatch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ComputeState {
    pub program_base: u64,
    /// The offset of the first instruction relative to the program base address.
    pub start_address: u32,
    pub workgroup_size: [u32; 3],
    pub shared_memory_size: u32,
    pub local_memory_size: u32,
    pub resources: StageResources,
    pub texture_bound: u32,
    pub tic: DescriptorTable,
}

impl ComputeState {
    pub fn program_address(&self) -> u64 {
        self.program_base + u64::from(self.start_address)
    }

    pub fn pipeline_key(&self, unique_hash: u64) -> ComputePipelineKey {
        ComputePipelineKey {
            unique_hash,
            shared_memory_size: self.shared_memory_size,
            workgroup_size: self.workgroup_size,
        }
    }
}

pub(crate) fn tess_primitive_index(value: TessPrimitive) -> u8 {
    match value {
        TessPrimitive::Isolines => 0,
        TessPrimitive::Triangles => 1,
        TessPrimitive::Quads => 2,
    }
}

pub(crate) fn tess_spacing_index(value: TessSpacing) -> u8 {
    match value {
        TessSpacing::Equal => 0,
        TessSpacing::FractionalOdd => 1,
        TessSpacing::FractionalEven => 2,
    }
}

pub(crate) fn tess_primitive(value: u8) -> TessPrimitive {
    match value {
        0 => TessPrimitive::Isolines,
        2 => TessPrimitive::Quads,
        _ => TessPrimitive::Triangles,
    }
}

pub(crate) fn tess_spacing(value: u8) -> TessSpacing {
    match value {
        1 => TessSpacing::FractionalOdd,
        2 => TessSpacing::FractionalEven,
        _ => TessSpacing::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hashes() -> [u64; NUM_PROGRAMS] {
        [0, 0x1111, 0, 0, 0, 0x2222]
    }

    #[test]
    fn same_state_same_key() {
        let state = GraphicsState {
            early_z: true,
            ..Default::default()
        };
        let a = state.pipeline_key(hashes());
        let b = state.clone().pipeline_key(hashes());
        assert_eq!(a, b);
        assert_eq!(a.content_hash(), b.content_hash());
        assert!(a.bits().early_z());
    }

    #[test]
    fn topology_ignored_without_geometry() {
        let points = GraphicsState::default().pipeline_key(hashes());
        let triangles = GraphicsState {
            topology: PrimitiveTopology::Triangles,
            ..Default::default()
        }
        .pipeline_key(hashes());
        assert_eq!(points, triangles);

        let mut with_geometry = hashes();
        with_geometry[4] = 0x3333;
        let key = GraphicsState {
            topology: PrimitiveTopology::TrianglesAdjacency,
            ..Default::default()
        }
        .pipeline_key(with_geometry);
        assert_eq!(12, u8::from(key.bits().gs_input_topology()));
    }

    #[test]
    fn xfb_state_changes_key_size() {
        let mut state = GraphicsState::default();
        state.xfb_state.layouts[0].stride = 16;
        let disabled = state.pipeline_key(hashes());

        state.xfb_enabled = true;
        let enabled = state.pipeline_key(hashes());
        assert!(enabled.size() > disabled.size());
        assert_ne!(disabled, enabled);
        assert_eq!(16, enabled.xfb_state.layouts[0].stride);
        assert_eq!(0, disabled.xfb_state.layouts[0].stride);
    }

    #[test]
    fn tessellation_bits_round_trip() {
        let mut program_hashes = hashes();
        program_hashes[3] = 0x4444;
        let state = GraphicsState {
            tessellation: TessellationState {
                primitive: TessPrimitive::Quads,
                spacing: TessSpacing::FractionalOdd,
                clockwise: true,
            },
            ..Default::default()
        };
        let bits = state.pipeline_key(program_hashes).bits();
        assert_eq!(
            TessPrimitive::Quads,
            tess_primitive(bits.tessellation_primitive().into())
        );
        assert_eq!(
            TessSpacing::FractionalOdd,
            tess_spacing(bits.tessellation_spacing().into())
        );
        assert!(bits.tessellation_clockwise());
    }

    #[test]
    fn adjacency_topologies() {
        assert_eq!(
            InputTopology::LinesAdjacency,
            PrimitiveTopology::from_index(11).unwrap().input_topology()
        );
        assert_eq!(
            InputTopology::Triangles,
            PrimitiveTopology::TriangleFan.input_topology()
        );
        assert_eq!(None, PrimitiveTopology::from_index(15));
    }
}
