//! Host capabilities and per pipeline state consumed by the passes and backends.
use mxw_lib::header::NUM_GENERICS;

/// Host driver capabilities and workarounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    /// The SPIR-V version like `0x00010300` for 1.3.
    pub supported_spirv: u32,
    /// Use a single binding counter shared by all descriptor types.
    pub unified_descriptor_binding: bool,

    /// Native 16-bit float arithmetic.
    /// Programs are lowered to 32-bit floats if this is not supported.
    pub support_float16: bool,
    pub support_float64: bool,
    pub support_int8: bool,
    pub support_int16: bool,
    pub support_int64: bool,

    pub support_fp32_denorm_preserve: bool,
    pub support_fp32_denorm_flush: bool,

    pub support_vote: bool,
    pub support_viewport_index_layer_non_geometry: bool,
    pub support_demote_to_helper_invocation: bool,
    pub support_derivative_control: bool,
    pub support_typeless_image_loads: bool,
    pub support_gl_sparse_textures: bool,

    /// The host subgroup can be larger than the 32 invocations of a guest warp.
    pub warp_size_potentially_larger_than_guest: bool,
    pub lower_left_origin_mode: bool,
    /// Declare every fragment color output even if the program does not write it.
    pub need_declared_frag_colors: bool,

    /// Clamp instructions are miscompiled and must be replaced with min and max.
    pub has_broken_spirv_clamp: bool,
    /// The `precise` qualifier causes incorrect results.
    pub has_gl_precise_bug: bool,
    /// Float comparisons ignore NaN operands.
    pub ignore_nan_fp_comparisons: bool,

    pub gl_max_compute_smem_size: u32,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            supported_spirv: 0x00010000,
            unified_descriptor_binding: false,
            support_float16: true,
            support_float64: true,
            support_int8: true,
            support_int16: true,
            support_int64: true,
            support_fp32_denorm_preserve: false,
            support_fp32_denorm_flush: false,
            support_vote: true,
            support_viewport_index_layer_non_geometry: true,
            support_demote_to_helper_invocation: true,
            support_derivative_control: true,
            support_typeless_image_loads: true,
            support_gl_sparse_textures: false,
            warp_size_potentially_larger_than_guest: false,
            lower_left_origin_mode: false,
            need_declared_frag_colors: false,
            has_broken_spirv_clamp: false,
            has_gl_precise_bug: false,
            ignore_nan_fp_comparisons: false,
            gl_max_compute_smem_size: 0xC000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputTopology {
    #[default]
    Points,
    Lines,
    LinesAdjacency,
    Triangles,
    TrianglesAdjacency,
}

impl InputTopology {
    /// The number of vertices in each input primitive.
    pub fn vertex_count(self) -> u32 {
        match self {
            InputTopology::Points => 1,
            InputTopology::Lines => 2,
            InputTopology::LinesAdjacency => 4,
            InputTopology::Triangles => 3,
            InputTopology::TrianglesAdjacency => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TessPrimitive {
    Isolines,
    #[default]
    Triangles,
    Quads,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TessSpacing {
    #[default]
    Equal,
    FractionalOdd,
    FractionalEven,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessThanEqual,
    Greater,
    NotEqual,
    GreaterThanEqual,
    Always,
}

/// A single varying captured by transform feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformFeedbackVarying {
    pub buffer: u32,
    pub stride: u32,
    pub offset: u32,
    pub components: u32,
}

/// Pipeline state that affects code generation for a single stage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuntimeInfo {
    /// Generic outputs written by the previous stage.
    pub previous_stage_stores: [bool; NUM_GENERICS],
    pub fixed_state_point_size: Option<f32>,
    pub alpha_test_func: Option<CompareFunction>,
    pub alpha_test_reference: f32,
    pub input_topology: InputTopology,
    pub tess_primitive: TessPrimitive,
    pub tess_spacing: TessSpacing,
    pub tess_clockwise: bool,
    pub force_early_z: bool,
    pub y_negate: bool,
    /// Varyings indexed by attribute offset divided by 4.
    pub xfb_varyings: Vec<Option<TransformFeedbackVarying>>,
}
