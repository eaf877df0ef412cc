//! Target overlay state derived from the latest polygon and viewport

use tracing::warn;

use crate::geometry::{OverlayGeometry, Point, TargetPolygon, TargetProjection, Viewport};

/// Everything the overlay needs to draw, rebuilt whenever the polygon or
/// the viewport changes. `projection` and `overlay` are only present when
/// both inputs are known and the polygon is not degenerate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetScene {
    pub polygon: Option<TargetPolygon>,
    pub viewport: Option<Viewport>,
    pub projection: Option<TargetProjection>,
    pub overlay: Option<OverlayGeometry>,
}

impl TargetScene {
    pub(crate) fn rebuild(&mut self, projection_scale: f64, grid_scale: f64) {
        self.projection = None;
        self.overlay = None;

        let (Some(polygon), Some(viewport)) = (self.polygon, self.viewport) else {
            return;
        };

        match TargetProjection::new(polygon, viewport, projection_scale) {
            Ok(projection) => {
                self.projection = Some(projection);
                self.overlay = Some(OverlayGeometry::new(&polygon, viewport, grid_scale));
            }
            Err(e) => warn!("No target projection for {:?}: {}", polygon.corners(), e),
        }
    }

    /// Camera-space point in target rectangle coordinates
    pub fn to_target(&self, p: Point) -> Option<Point> {
        self.projection.as_ref().map(|projection| projection.to_target(p))
    }

    pub fn is_ready(&self) -> bool {
        self.projection.is_some()
    }
}
