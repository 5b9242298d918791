use std::fmt;

use mxw_lib::header::NUM_GENERICS;

/// A scalar input or output attribute identified by its byte offset divided by 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attribute(pub u16);

impl Attribute {
    pub const PRIMITIVE_ID: Attribute = Attribute(24);
    pub const LAYER: Attribute = Attribute(25);
    pub const VIEWPORT_INDEX: Attribute = Attribute(26);
    pub const POINT_SIZE: Attribute = Attribute(27);
    pub const POSITION_X: Attribute = Attribute(28);
    pub const POSITION_Y: Attribute = Attribute(29);
    pub const POSITION_Z: Attribute = Attribute(30);
    pub const POSITION_W: Attribute = Attribute(31);
    pub const GENERIC_0_X: Attribute = Attribute(32);
    pub const CLIP_DISTANCE_0: Attribute = Attribute(176);
    pub const POINT_SPRITE_S: Attribute = Attribute(184);
    pub const POINT_SPRITE_T: Attribute = Attribute(185);
    pub const FOG_COORDINATE: Attribute = Attribute(186);
    pub const TESS_EVAL_POINT_U: Attribute = Attribute(188);
    pub const TESS_EVAL_POINT_V: Attribute = Attribute(189);
    pub const INSTANCE_ID: Attribute = Attribute(190);
    pub const VERTEX_ID: Attribute = Attribute(191);
    pub const FRONT_FACE: Attribute = Attribute(255);

    pub const NUM_CLIP_DISTANCES: usize = 8;

    /// The attribute at a byte offset into the attribute space.
    pub fn from_offset(offset: u32) -> Self {
        Self((offset / 4) as u16)
    }

    pub fn offset(self) -> u32 {
        self.0 as u32 * 4
    }

    pub fn generic(index: usize, element: usize) -> Self {
        Self(Self::GENERIC_0_X.0 + (index * 4 + element) as u16)
    }

    pub fn is_generic(self) -> bool {
        self.0 >= Self::GENERIC_0_X.0 && self.0 < Self::GENERIC_0_X.0 + NUM_GENERICS as u16 * 4
    }

    pub fn generic_index(self) -> Option<usize> {
        self.is_generic()
            .then(|| (self.0 - Self::GENERIC_0_X.0) as usize / 4)
    }

    pub fn is_position(self) -> bool {
        self.0 >= Self::POSITION_X.0 && self.0 <= Self::POSITION_W.0
    }

    pub fn is_clip_distance(self) -> bool {
        self.0 >= Self::CLIP_DISTANCE_0.0
            && self.0 < Self::CLIP_DISTANCE_0.0 + Self::NUM_CLIP_DISTANCES as u16
    }

    /// The component index for vector attributes like generics and position.
    pub fn element(self) -> usize {
        self.0 as usize % 4
    }

    /// The attribute `n` components after this one.
    pub fn add(self, n: u16) -> Self {
        Self(self.0 + n)
    }

    /// Attributes read as integers rather than floats.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::PRIMITIVE_ID | Self::LAYER | Self::VIEWPORT_INDEX | Self::INSTANCE_ID | Self::VERTEX_ID
        )
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const XYZW: [char; 4] = ['X', 'Y', 'Z', 'W'];
        if let Some(index) = self.generic_index() {
            return write!(f, "Generic{index}{}", XYZW[self.element()]);
        }
        if self.is_position() {
            return write!(f, "Position{}", XYZW[self.element()]);
        }
        if self.is_clip_distance() {
            return write!(f, "ClipDistance{}", self.0 - Self::CLIP_DISTANCE_0.0);
        }
        match *self {
            Self::PRIMITIVE_ID => write!(f, "PrimitiveId"),
            Self::LAYER => write!(f, "Layer"),
            Self::VIEWPORT_INDEX => write!(f, "ViewportIndex"),
            Self::POINT_SIZE => write!(f, "PointSize"),
            Self::POINT_SPRITE_S => write!(f, "PointSpriteS"),
            Self::POINT_SPRITE_T => write!(f, "PointSpriteT"),
            Self::FOG_COORDINATE => write!(f, "FogCoordinate"),
            Self::TESS_EVAL_POINT_U => write!(f, "TessellationEvaluationPointU"),
            Self::TESS_EVAL_POINT_V => write!(f, "TessellationEvaluationPointV"),
            Self::INSTANCE_ID => write!(f, "InstanceId"),
            Self::VERTEX_ID => write!(f, "VertexId"),
            Self::FRONT_FACE => write!(f, "FrontFace"),
            _ => write!(f, "Attribute{}", self.0),
        }
    }
}

/// A per patch tessellation attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Patch(pub u16);

impl Patch {
    pub const TESS_LOD_LEFT: Patch = Patch(0);
    pub const TESS_LOD_TOP: Patch = Patch(1);
    pub const TESS_LOD_RIGHT: Patch = Patch(2);
    pub const TESS_LOD_BOTTOM: Patch = Patch(3);
    pub const TESS_LOD_INTERIOR_U: Patch = Patch(4);
    pub const TESS_LOD_INTERIOR_V: Patch = Patch(5);
    pub const COMPONENT_0: Patch = Patch(8);

    /// The number of generic patch vectors.
    pub const NUM_GENERICS: usize = 30;

    pub fn from_offset(offset: u32) -> Self {
        Self((offset / 4) as u16)
    }

    pub fn is_generic(self) -> bool {
        self.0 >= Self::COMPONENT_0.0
    }

    pub fn generic_index(self) -> Option<usize> {
        self.is_generic()
            .then(|| (self.0 - Self::COMPONENT_0.0) as usize / 4)
            .filter(|i| *i < Self::NUM_GENERICS)
    }

    pub fn element(self) -> usize {
        (self.0 - Self::COMPONENT_0.0.min(self.0)) as usize % 4
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.generic_index() {
            Some(index) => write!(f, "Patch{index}{}", ['X', 'Y', 'Z', 'W'][self.element()]),
            None => write!(f, "TessLod{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_attributes() {
        let attr = Attribute::from_offset(0x84);
        assert_eq!(Attribute::generic(0, 1), attr);
        assert_eq!(Some(0), attr.generic_index());
        assert_eq!(1, attr.element());
        assert_eq!("Generic0Y", attr.to_string());
        assert_eq!(Some(31), Attribute::generic(31, 3).generic_index());
        assert_eq!(None, Attribute::CLIP_DISTANCE_0.generic_index());
    }

    #[test]
    fn position_attributes() {
        let attr = Attribute::from_offset(0x7c);
        assert_eq!(Attribute::POSITION_W, attr);
        assert!(attr.is_position());
        assert_eq!("PositionW", attr.to_string());
    }

    #[test]
    fn patch_attributes() {
        assert_eq!(Some(1), Patch(13).generic_index());
        assert_eq!(1, Patch(13).element());
        assert_eq!(None, Patch::TESS_LOD_TOP.generic_index());
    }
}
