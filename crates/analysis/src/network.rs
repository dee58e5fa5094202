//! Stream feature assembly, simplification, clipping and output bounding
//!
//! Traced polylines become features with midpoint-sampled attributes and a
//! projected length captured before reprojection. Oversized outputs are
//! bounded by risk-importance ranking, and every emitted line is decimated
//! to the vertex cap with exact first and last vertices.

use crate::report::StreamFeature;
use geo_types::{Coord, LineString};
use hydrorisk_core::raster::GeoTransform;
use ndarray::Array2;

/// Output bounding caps
#[derive(Debug, Clone)]
pub struct BoundParams {
    /// Maximum number of features in the output collection
    pub max_output_features: usize,
    /// Maximum vertices per emitted line
    pub max_line_points: usize,
}

impl Default for BoundParams {
    fn default() -> Self {
        Self {
            max_output_features: 4_000,
            max_line_points: 80,
        }
    }
}

/// Planar length of a line in map units
pub fn line_length(line: &LineString<f64>) -> f64 {
    line.0
        .windows(2)
        .map(|pair| (pair[1].x - pair[0].x).hypot(pair[1].y - pair[0].y))
        .sum()
}

/// The midpoint vertex of a line (the middle of the vertex list)
pub fn line_midpoint(line: &LineString<f64>) -> Option<Coord<f64>> {
    if line.0.is_empty() {
        return None;
    }
    Some(line.0[line.0.len() / 2])
}

/// Nearest-cell sample of a grid at a map coordinate; `None` outside the
/// grid or on non-finite values.
pub fn sample_grid(
    grid: &Array2<f64>,
    transform: &GeoTransform,
    x: f64,
    y: f64,
) -> Option<f64> {
    let (col_f, row_f) = transform.geo_to_pixel(x, y);
    if !col_f.is_finite() || !row_f.is_finite() || col_f < 0.0 || row_f < 0.0 {
        return None;
    }
    let (rows, cols) = grid.dim();
    let row = row_f.floor() as usize;
    let col = col_f.floor() as usize;
    if row >= rows || col >= cols {
        return None;
    }
    let value = grid[(row, col)];
    value.is_finite().then_some(value)
}

/// Decimate a vertex list to at most `max_points` by uniform stride
/// sampling. The first and last vertices are always preserved exactly.
pub fn decimate_line(line: &mut LineString<f64>, max_points: usize) {
    let coords = &mut line.0;
    if coords.len() <= max_points {
        return;
    }
    if max_points < 3 {
        let first = coords[0];
        let last = coords[coords.len() - 1];
        *coords = vec![first, last];
        return;
    }

    let step = (coords.len() / (max_points - 1)).max(1);
    let last = coords[coords.len() - 1];
    let mut reduced: Vec<Coord<f64>> = coords.iter().copied().step_by(step).collect();
    if reduced.last() != Some(&last) {
        reduced.push(last);
    }
    if reduced.len() > max_points {
        reduced.truncate(max_points - 1);
        reduced.push(last);
    }
    *coords = reduced;
}

/// Even-odd ray-casting point-in-polygon test over a (lon, lat) ring
pub fn point_in_ring(lon: f64, lat: f64, ring: &[(f64, f64)]) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let n = ring.len();
    for i in 0..n {
        let (x1, y1) = ring[i];
        let (x2, y2) = ring[(i + 1) % n];
        if (y1 > lat) != (y2 > lat) {
            let dy = y2 - y1;
            let x_intersect = (x2 - x1) * (lat - y1) / if dy != 0.0 { dy } else { 1e-12 } + x1;
            if lon < x_intersect {
                inside = !inside;
            }
        }
    }
    inside
}

/// Whether any vertex of the feature's line lies inside the ring
pub fn feature_intersects_ring(feature: &StreamFeature, ring: &[(f64, f64)]) -> bool {
    feature
        .line
        .0
        .iter()
        .any(|coord| point_in_ring(coord.x, coord.y, ring))
}

/// Bound the output feature set.
///
/// When the count exceeds the cap, the top-`cap` features by risk score
/// (descending; unsampled features rank lowest) are kept. Every kept line
/// is decimated to the vertex cap regardless of truncation. Returns the
/// bounded features and whether truncation occurred.
pub fn limit_output_features(
    mut features: Vec<StreamFeature>,
    params: &BoundParams,
) -> (Vec<StreamFeature>, bool) {
    let truncated = features.len() > params.max_output_features;
    if truncated {
        features.sort_by_key(|f| std::cmp::Reverse(f.properties.risk_score.unwrap_or(0)));
        features.truncate(params.max_output_features);
    }
    for feature in &mut features {
        decimate_line(&mut feature.line, params.max_line_points);
    }
    (features, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(points: Vec<(f64, f64)>) -> LineString<f64> {
        LineString::from(points)
    }

    #[test]
    fn test_line_length() {
        let l = line(vec![(0.0, 0.0), (3.0, 4.0), (3.0, 5.0)]);
        assert_relative_eq!(line_length(&l), 6.0);
    }

    #[test]
    fn test_midpoint_vertex() {
        let l = line(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]);
        let mid = line_midpoint(&l).unwrap();
        assert_relative_eq!(mid.x, 1.0);
    }

    #[test]
    fn test_decimate_preserves_endpoints() {
        let coords: Vec<(f64, f64)> = (0..200).map(|i| (i as f64, 0.0)).collect();
        let mut l = line(coords);
        decimate_line(&mut l, 80);

        assert!(l.0.len() <= 80);
        assert_relative_eq!(l.0.first().unwrap().x, 0.0);
        assert_relative_eq!(l.0.last().unwrap().x, 199.0);
    }

    #[test]
    fn test_decimate_short_line_untouched() {
        let mut l = line(vec![(0.0, 0.0), (1.0, 1.0)]);
        decimate_line(&mut l, 80);
        assert_eq!(l.0.len(), 2);
    }

    #[test]
    fn test_decimate_tiny_cap() {
        let coords: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 0.0)).collect();
        let mut l = line(coords);
        decimate_line(&mut l, 2);
        assert_eq!(l.0.len(), 2);
        assert_relative_eq!(l.0[1].x, 9.0);
    }

    #[test]
    fn test_point_in_ring() {
        let ring = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        assert!(point_in_ring(5.0, 5.0, &ring));
        assert!(!point_in_ring(15.0, 5.0, &ring));
        assert!(!point_in_ring(5.0, -1.0, &ring));
    }

    #[test]
    fn test_limit_keeps_highest_risk() {
        let mut features = Vec::new();
        for score in [10, 90, 50] {
            let mut f = StreamFeature::new(line(vec![(0.0, 0.0), (1.0, 1.0)]), 1.0);
            f.properties.risk_score = Some(score);
            features.push(f);
        }

        let (kept, truncated) = limit_output_features(
            features,
            &BoundParams {
                max_output_features: 2,
                max_line_points: 80,
            },
        );

        assert!(truncated);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].properties.risk_score, Some(90));
        assert_eq!(kept[1].properties.risk_score, Some(50));
    }

    #[test]
    fn test_limit_decimates_even_without_truncation() {
        let coords: Vec<(f64, f64)> = (0..500).map(|i| (i as f64, 0.0)).collect();
        let features = vec![StreamFeature::new(line(coords), 499.0)];

        let (kept, truncated) = limit_output_features(features, &BoundParams::default());
        assert!(!truncated);
        assert!(kept[0].line.0.len() <= 80);
    }

    #[test]
    fn test_sample_grid_nearest_cell() {
        let transform = GeoTransform::new(0.0, 4.0, 1.0, -1.0);
        let mut grid = Array2::from_elem((4, 4), f64::NAN);
        grid[(1, 2)] = 42.0;

        // Center of cell (row 1, col 2) is at (2.5, 2.5)
        assert_eq!(sample_grid(&grid, &transform, 2.5, 2.5), Some(42.0));
        assert_eq!(sample_grid(&grid, &transform, 0.5, 3.5), None, "NaN cell");
        assert_eq!(sample_grid(&grid, &transform, -1.0, 2.5), None, "outside");
    }
}
