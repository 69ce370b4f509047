use std::f32::consts::FRAC_PI_2;

use crate::geom::Extent;

/// A pixel length that can be expressed independently of input resolution.
///
/// `Normalized(f)` resolves to `f × √(width × height)`, so the same parameter
/// value produces proportionally identical visual strength on any extent.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ImageUnit {
    Pixels(f32),
    Normalized(f32),
}

impl ImageUnit {
    pub fn resolve(&self, extent: Extent) -> f32 {
        match *self {
            ImageUnit::Pixels(px) => px,
            ImageUnit::Normalized(f) => f * extent.sqrt_area(),
        }
    }

    /// Resolve and round down to a whole pixel count.
    pub fn resolve_floor(&self, extent: Extent) -> u32 {
        self.resolve(extent).max(0.0).floor() as u32
    }
}

/// Angular analogue of [`ImageUnit`].
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RotationUnit {
    Radians(f32),
    /// Rotate a quarter turn only when the two extents disagree on
    /// portrait/landscape orientation.
    OrientationMatch,
}

impl RotationUnit {
    pub fn resolve(&self, from: Extent, to: Extent) -> f32 {
        match *self {
            RotationUnit::Radians(r) => r,
            RotationUnit::OrientationMatch => {
                if from.is_portrait() == to.is_portrait() {
                    0.0
                } else {
                    FRAC_PI_2
                }
            }
        }
    }
}
