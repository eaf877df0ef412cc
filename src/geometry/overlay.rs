//! Centroid-scaled overlay grid
//!
//! Cheap affine variant for drawing over the live video: the polygon is
//! scaled uniformly about its centroid and re-centered on the viewport. No
//! perspective correction is applied.

use super::{Point, TargetPolygon, Viewport};

/// Number of rows and columns in the scoring grid.
pub const GRID_DIVISIONS: usize = 3;

/// A grid line segment in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLine {
    pub start: Point,
    pub end: Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayGeometry {
    centroid: Point,
    screen_center: Point,
    scale: f64,
    scaled: [Point; 4],
}

impl OverlayGeometry {
    pub fn new(polygon: &TargetPolygon, viewport: Viewport, scale: f64) -> Self {
        let centroid = polygon.centroid();
        let screen_center = viewport.center();
        let scaled =
            (*polygon.corners()).map(|p| Self::scale_about(p, centroid, screen_center, scale));

        Self {
            centroid,
            screen_center,
            scale,
            scaled,
        }
    }

    fn scale_about(p: Point, centroid: Point, screen_center: Point, scale: f64) -> Point {
        Point::new(
            screen_center.x + (p.x - centroid.x) * scale,
            screen_center.y + (p.y - centroid.y) * scale,
        )
    }

    /// `screen_center + (p - centroid) * scale`
    pub fn scaled_point(&self, p: Point) -> Point {
        Self::scale_about(p, self.centroid, self.screen_center, self.scale)
    }

    pub fn scaled_polygon(&self) -> &[Point; 4] {
        &self.scaled
    }

    /// Lines at 1/3 and 2/3 across, running from the top edge to the bottom edge.
    pub fn vertical_lines(&self) -> Vec<GridLine> {
        let [a, b, c, d] = self.scaled;
        (1..GRID_DIVISIONS)
            .map(|i| {
                let t = i as f64 / GRID_DIVISIONS as f64;
                GridLine {
                    start: a.lerp(b, t),
                    end: d.lerp(c, t),
                }
            })
            .collect()
    }

    /// Lines at 1/3 and 2/3 down, running from the left edge to the right edge.
    pub fn horizontal_lines(&self) -> Vec<GridLine> {
        let [a, b, c, d] = self.scaled;
        (1..GRID_DIVISIONS)
            .map(|i| {
                let t = i as f64 / GRID_DIVISIONS as f64;
                GridLine {
                    start: a.lerp(d, t),
                    end: b.lerp(c, t),
                }
            })
            .collect()
    }

    /// Center of the cell at `row`, `col` (both 0-based).
    pub fn cell_center(&self, row: usize, col: usize) -> Point {
        let [a, b, c, d] = self.scaled;
        let n = GRID_DIVISIONS as f64;
        let at = |r: f64, k: f64| a.lerp(b, k / n).lerp(d.lerp(c, k / n), r / n);

        let top_left = at(row as f64, col as f64);
        let bottom_right = at(row as f64 + 1.0, col as f64 + 1.0);
        top_left.lerp(bottom_right, 0.5)
    }

    /// Cell label, numbered 1..=9 row-major.
    pub fn cell_number(row: usize, col: usize) -> usize {
        row * GRID_DIVISIONS + col + 1
    }

    /// All cell centers with their labels.
    pub fn cells(&self) -> Vec<(usize, Point)> {
        (0..GRID_DIVISIONS)
            .flat_map(|row| (0..GRID_DIVISIONS).map(move |col| (row, col)))
            .map(|(row, col)| (Self::cell_number(row, col), self.cell_center(row, col)))
            .collect()
    }
}
