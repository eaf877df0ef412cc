//! Four-point planar homography
//!
//! Solves the 8x8 system relating four source/destination pairs with the
//! ninth coefficient fixed at 1:
//!
//! ```text
//! u = (h0*x + h1*y + h2) / (h6*x + h7*y + 1)
//! v = (h3*x + h4*y + h5) / (h6*x + h7*y + 1)
//! ```

use super::Point;
use crate::error::{AppError, Result};

/// Pivots smaller than this fraction of the largest matrix entry are
/// treated as zero.
const PIVOT_EPSILON: f64 = 1e-10;

/// Projective denominators closer to zero than this map to infinity.
const HORIZON_EPSILON: f64 = 1e-12;

/// Projective transform between two planes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    h: [f64; 9],
}

impl Homography {
    /// Compute the homography taking each `src[i]` onto `dst[i]`.
    ///
    /// Refuses (rather than returning garbage) when fewer or more than four
    /// pairs are given or when the configuration is singular, e.g. three
    /// collinear source points.
    pub fn from_correspondences(src: &[Point], dst: &[Point]) -> Result<Self> {
        if src.len() != 4 || dst.len() != 4 {
            return Err(AppError::DegenerateGeometry(format!(
                "homography needs 4 point pairs, got {} source and {} destination points",
                src.len(),
                dst.len()
            )));
        }
        if src.iter().chain(dst).any(|p| !p.is_finite()) {
            return Err(AppError::DegenerateGeometry(
                "homography points must be finite".to_string(),
            ));
        }

        let mut a = [[0.0f64; 8]; 8];
        let mut b = [0.0f64; 8];

        for (i, (s, d)) in src.iter().zip(dst).enumerate() {
            let (x, y, u, v) = (s.x, s.y, d.x, d.y);
            a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y];
            b[2 * i] = u;
            a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y];
            b[2 * i + 1] = v;
        }

        let solution = solve(a, b).ok_or_else(|| {
            AppError::DegenerateGeometry(
                "point correspondences do not define a homography (singular system)".to_string(),
            )
        })?;

        let mut h = [1.0f64; 9];
        h[..8].copy_from_slice(&solution);
        Ok(Self { h })
    }

    /// Row-major coefficients, `h[8] == 1`.
    pub fn coefficients(&self) -> &[f64; 9] {
        &self.h
    }

    /// Apply the transform with the full projective division.
    pub fn map(&self, p: Point) -> Point {
        let h = &self.h;
        let d = h[6] * p.x + h[7] * p.y + 1.0;
        Point::new(
            (h[0] * p.x + h[1] * p.y + h[2]) / d,
            (h[3] * p.x + h[4] * p.y + h[5]) / d,
        )
    }

    /// Like [`map`](Self::map) but returns `None` for points on the
    /// horizon line, where the division blows up.
    pub fn try_map(&self, p: Point) -> Option<Point> {
        let h = &self.h;
        let d = h[6] * p.x + h[7] * p.y + 1.0;
        if d.abs() < HORIZON_EPSILON {
            return None;
        }
        let mapped = self.map(p);
        mapped.is_finite().then_some(mapped)
    }
}

/// Gauss-Jordan elimination with partial pivoting.
fn solve(mut a: [[f64; 8]; 8], mut b: [f64; 8]) -> Option<[f64; 8]> {
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()));
    if scale == 0.0 {
        return None;
    }
    let tolerance = scale * PIVOT_EPSILON;

    for col in 0..8 {
        let pivot_row = (col..8)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot_row][col].abs() < tolerance {
            return None;
        }

        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        let div = a[col][col];
        for v in &mut a[col][col..] {
            *v /= div;
        }
        b[col] /= div;

        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..8 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    b.iter().all(|v| v.is_finite()).then_some(b)
}
