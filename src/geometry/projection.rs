//! Perspective projection of the camera polygon onto the on-screen target

use serde::Serialize;

use super::{Homography, Point, TargetPolygon, Viewport};
use crate::error::{AppError, Result};

/// Physical target face aspect ratio (width : height).
pub const TARGET_ASPECT_W: f64 = 3.0;
pub const TARGET_ASPECT_H: f64 = 4.0;

/// Screen-space placement of the rendered target face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetRect {
    /// Left offset inside the viewport
    pub x: f64,
    /// Top offset inside the viewport
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl TargetRect {
    /// Largest 3:4 rectangle that fits the viewport, shrunk by `scale` and
    /// centered.
    pub fn fit(viewport: Viewport, scale: f64) -> Self {
        let base = (viewport.width / TARGET_ASPECT_W).min(viewport.height / TARGET_ASPECT_H);
        let w = base * TARGET_ASPECT_W * scale;
        let h = base * TARGET_ASPECT_H * scale;
        Self {
            x: (viewport.width - w) / 2.0,
            y: (viewport.height - h) / 2.0,
            w,
            h,
        }
    }

    /// Rectangle corners in local coordinates, in polygon order.
    fn local_corners(&self) -> [Point; 4] {
        [
            Point::new(0.0, 0.0),
            Point::new(self.w, 0.0),
            Point::new(self.w, self.h),
            Point::new(0.0, self.h),
        ]
    }

    pub fn contains_local(&self, p: Point) -> bool {
        (0.0..=self.w).contains(&p.x) && (0.0..=self.h).contains(&p.y)
    }
}

/// Camera polygon → target rectangle mapping for one (polygon, viewport, scale) key.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetProjection {
    polygon: TargetPolygon,
    viewport: Viewport,
    scale: f64,
    rect: TargetRect,
    to_target: Homography,
}

impl TargetProjection {
    pub fn new(polygon: TargetPolygon, viewport: Viewport, scale: f64) -> Result<Self> {
        if !viewport.is_valid() {
            return Err(AppError::DegenerateGeometry(format!(
                "viewport must be positive and finite, got {}x{}",
                viewport.width, viewport.height
            )));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(AppError::DegenerateGeometry(format!(
                "projection scale must be positive, got {}",
                scale
            )));
        }

        let rect = TargetRect::fit(viewport, scale);
        let to_target =
            Homography::from_correspondences(polygon.corners(), &rect.local_corners())?;

        Ok(Self {
            polygon,
            viewport,
            scale,
            rect,
            to_target,
        })
    }

    pub fn rect(&self) -> TargetRect {
        self.rect
    }

    pub fn polygon(&self) -> &TargetPolygon {
        &self.polygon
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Whether this projection was built from exactly these inputs.
    pub fn is_keyed_by(&self, polygon: &TargetPolygon, viewport: Viewport, scale: f64) -> bool {
        self.polygon == *polygon && self.viewport == viewport && self.scale == scale
    }

    /// Camera pixel → target-local coordinates (origin at the rect's top-left).
    pub fn to_target(&self, p: Point) -> Point {
        self.to_target.map(p)
    }

    /// Camera pixel → viewport coordinates.
    pub fn to_viewport(&self, p: Point) -> Point {
        let local = self.to_target(p);
        Point::new(local.x + self.rect.x, local.y + self.rect.y)
    }
}
