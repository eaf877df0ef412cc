//! Planar geometry for the hit overlay
//!
//! The detector reports the target outline and arrow tips in the raw target
//! camera's pixel space. Two mappings bring them into render space:
//!
//! - [`TargetProjection`]: full perspective correction onto a fixed 3:4
//!   rectangle centered in the viewport (see [`Homography`]).
//! - [`OverlayGeometry`]: uniform scaling about the polygon centroid, used
//!   for the grid drawn on top of the live video.
//!
//! Both are derived values. Rebuild them whenever the polygon, viewport or
//! scale changes; never keep one across a polygon update.

pub mod homography;
pub mod overlay;
pub mod projection;

pub use homography::Homography;
pub use overlay::{GridLine, OverlayGeometry};
pub use projection::{TargetProjection, TargetRect, TARGET_ASPECT_H, TARGET_ASPECT_W};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A point in some planar coordinate space.
///
/// Serialized as a two-element array `[x, y]` to match the detector wire format.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Linear interpolation from `self` towards `other`.
    pub fn lerp(self, other: Point, t: f64) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Rendered size of the target video element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// The target quadrilateral as seen by the target camera.
///
/// Corners are ordered top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetPolygon([Point; 4]);

impl TargetPolygon {
    pub fn new(corners: [Point; 4]) -> Self {
        Self(corners)
    }

    /// Build from an arbitrary point list, refusing anything but four finite points.
    pub fn from_points(points: &[Point]) -> Result<Self> {
        let corners: [Point; 4] = points.try_into().map_err(|_| {
            AppError::DegenerateGeometry(format!(
                "target polygon needs exactly 4 points, got {}",
                points.len()
            ))
        })?;

        if let Some(bad) = corners.iter().find(|p| !p.is_finite()) {
            return Err(AppError::DegenerateGeometry(format!(
                "non-finite polygon corner {:?}",
                bad
            )));
        }

        Ok(Self(corners))
    }

    pub fn corners(&self) -> &[Point; 4] {
        &self.0
    }

    pub fn centroid(&self) -> Point {
        let (sx, sy) = self
            .0
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / 4.0, sy / 4.0)
    }
}
