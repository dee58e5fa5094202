//! Drainage-network polyline tracing
//!
//! Thresholds flow accumulation into a channel mask and traces it into one
//! polyline per drainage branch: segments start at channel heads (no
//! upstream channel neighbor) and at junction outflows, follow the D8
//! direction from cell center to cell center, and end when they reach a
//! junction (included as the last vertex), leave the channel mask, hit a
//! pit, or run off the grid.

use super::downstream_cell;
use geo_types::{Coord, LineString};
use hydrorisk_core::raster::Raster;
use hydrorisk_core::{Error, Result};
use ndarray::Array2;

/// Parameters for stream network tracing
#[derive(Debug, Clone)]
pub struct StreamTraceParams {
    /// Minimum accumulation (in cell counts / weights) for a cell to be
    /// part of the drainage network.
    pub threshold: f64,
}

impl Default for StreamTraceParams {
    fn default() -> Self {
        Self { threshold: 200.0 }
    }
}

/// Trace the drainage network as polylines in map coordinates.
///
/// Returns one `LineString` per distinct branch; an empty vector when the
/// threshold exceeds the maximum accumulation. Lines with fewer than two
/// vertices (isolated channel cells) are dropped.
pub fn trace_stream_network(
    flow_dir: &Raster<u8>,
    flow_acc: &Raster<f64>,
    params: &StreamTraceParams,
) -> Result<Vec<LineString<f64>>> {
    let (rows, cols) = flow_dir.shape();
    if flow_acc.shape() != (rows, cols) {
        return Err(Error::SizeMismatch {
            er: rows,
            ec: cols,
            ar: flow_acc.rows(),
            ac: flow_acc.cols(),
        });
    }

    // Channel mask
    let mut channel = Array2::<bool>::from_elem((rows, cols), false);
    for row in 0..rows {
        for col in 0..cols {
            let acc = unsafe { flow_acc.get_unchecked(row, col) };
            if acc.is_finite() && acc >= params.threshold {
                channel[(row, col)] = true;
            }
        }
    }

    // Channel in-degree: upstream channel neighbors flowing into each cell
    let mut in_degree = Array2::<u8>::zeros((rows, cols));
    for row in 0..rows {
        for col in 0..cols {
            if !channel[(row, col)] {
                continue;
            }
            let dir = unsafe { flow_dir.get_unchecked(row, col) };
            if let Some((nr, nc)) = downstream_cell(row, col, dir, rows, cols) {
                if channel[(nr, nc)] {
                    in_degree[(nr, nc)] = in_degree[(nr, nc)].saturating_add(1);
                }
            }
        }
    }

    let center = |row: usize, col: usize| -> Coord<f64> {
        let (x, y) = flow_dir.pixel_to_geo(col, row);
        Coord { x, y }
    };

    // Branch starts: heads (nothing upstream) and junction outflows
    let mut lines = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if !channel[(row, col)] {
                continue;
            }
            let degree = in_degree[(row, col)];
            if degree == 1 {
                continue; // mid-segment cell
            }

            let mut vertices = vec![center(row, col)];
            let (mut r, mut c) = (row, col);
            loop {
                let dir = unsafe { flow_dir.get_unchecked(r, c) };
                let Some((nr, nc)) = downstream_cell(r, c, dir, rows, cols) else {
                    break; // pit or off-grid
                };
                if !channel[(nr, nc)] {
                    break;
                }

                vertices.push(center(nr, nc));
                if in_degree[(nr, nc)] >= 2 {
                    break; // junction ends this branch; it starts its own
                }
                r = nr;
                c = nc;
            }

            if vertices.len() >= 2 {
                lines.push(LineString::from(vertices));
            }
        }
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::flow_accumulation::flow_accumulation;
    use crate::hydrology::flow_direction::flow_direction;
    use crate::hydrology::FlowAccumulationParams;
    use hydrorisk_core::GeoTransform;

    fn south_slope(rows: usize, cols: usize) -> Raster<f64> {
        let mut dem = Raster::new(rows, cols);
        dem.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        for row in 0..rows {
            for col in 0..cols {
                dem.set(row, col, (rows - row) as f64 * 10.0).unwrap();
            }
        }
        dem
    }

    #[test]
    fn test_parallel_channels_on_south_slope() {
        // Plane sloping south: each column is its own branch once its
        // accumulation passes the threshold
        let dem = south_slope(10, 10);
        let fdir = flow_direction(&dem).unwrap();
        let acc = flow_accumulation(&fdir, FlowAccumulationParams::default()).unwrap();

        let lines =
            trace_stream_network(&fdir, &acc, &StreamTraceParams { threshold: 5.0 }).unwrap();

        assert_eq!(lines.len(), 10, "one branch per column");
        for line in &lines {
            assert_eq!(line.0.len(), 6, "rows 4..=9 form each branch");
            // Vertices run north to south: y strictly decreasing
            for pair in line.0.windows(2) {
                assert!(pair[1].y < pair[0].y);
            }
        }
    }

    #[test]
    fn test_threshold_above_max_gives_no_lines() {
        let dem = south_slope(6, 6);
        let fdir = flow_direction(&dem).unwrap();
        let acc = flow_accumulation(&fdir, FlowAccumulationParams::default()).unwrap();

        let lines =
            trace_stream_network(&fdir, &acc, &StreamTraceParams { threshold: 1e9 }).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn test_junction_splits_branches() {
        // Two ridges draining into a center column produce a junction:
        // elevation falls towards col 2 and towards the south
        let mut dem = Raster::new(6, 5);
        dem.set_transform(GeoTransform::new(0.0, 6.0, 1.0, -1.0));
        for row in 0..6 {
            for col in 0..5 {
                let ridge = (col as f64 - 2.0).abs();
                dem.set(row, col, (6 - row) as f64 + ridge * 3.0).unwrap();
            }
        }

        let fdir = flow_direction(&dem).unwrap();
        let acc = flow_accumulation(&fdir, FlowAccumulationParams::default()).unwrap();

        // Threshold 2 keeps the tributary columns (acc 2) in the channel
        // mask, so the center column is fed by junctions
        let lines =
            trace_stream_network(&fdir, &acc, &StreamTraceParams { threshold: 2.0 }).unwrap();

        assert!(
            lines.len() >= 2,
            "converging terrain should yield multiple branches, got {}",
            lines.len()
        );
        // Every vertex stays on the grid
        let (min_x, min_y, max_x, max_y) = dem.bounds();
        for line in &lines {
            for v in &line.0 {
                assert!(v.x >= min_x && v.x <= max_x);
                assert!(v.y >= min_y && v.y <= max_y);
            }
        }
    }

}
