//! Upstream-catchment masking
//!
//! Marks every cell whose flow path reaches a pour cell, by breadth-first
//! search against the flow direction: a neighbor belongs to the catchment
//! iff its own direction code points back at the cell it was reached from.

use super::{opposite_dir, D8_OFFSETS};
use hydrorisk_core::raster::Raster;
use hydrorisk_core::{Error, Result};
use ndarray::Array2;
use std::collections::VecDeque;

/// Trace the upstream catchment of a pour cell.
///
/// Returns a mask raster (1 = cell drains through the pour cell, 0
/// otherwise) carrying the direction grid's transform and CRS. The pour
/// cell itself is always part of the mask.
pub fn upstream_mask(flow_dir: &Raster<u8>, pour: (usize, usize)) -> Result<Raster<u8>> {
    let (rows, cols) = flow_dir.shape();
    let (pour_row, pour_col) = pour;

    if pour_row >= rows || pour_col >= cols {
        return Err(Error::IndexOutOfBounds {
            row: pour_row,
            col: pour_col,
            rows,
            cols,
        });
    }

    let mut mask = Array2::<u8>::zeros((rows, cols));
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();

    mask[(pour_row, pour_col)] = 1;
    queue.push_back((pour_row, pour_col));

    while let Some((row, col)) = queue.pop_front() {
        for (idx, &(dr, dc)) in D8_OFFSETS.iter().enumerate() {
            let nr = row as isize + dr;
            let nc = col as isize + dc;

            if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                continue;
            }
            let nr = nr as usize;
            let nc = nc as usize;

            if mask[(nr, nc)] != 0 {
                continue;
            }

            let neighbor_dir = unsafe { flow_dir.get_unchecked(nr, nc) };
            if neighbor_dir == 0 {
                continue;
            }

            // The neighbor sits at offset idx from (row, col); it drains
            // into (row, col) iff its code is the opposite direction.
            if neighbor_dir == opposite_dir((idx + 1) as u8) {
                mask[(nr, nc)] = 1;
                queue.push_back((nr, nc));
            }
        }
    }

    let mut output = flow_dir.with_same_meta::<u8>(rows, cols);
    output.set_nodata(Some(0));
    *output.data_mut() = mask;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::flow_direction::flow_direction;
    use hydrorisk_core::GeoTransform;

    fn plane(rows: usize, cols: usize, z: impl Fn(usize, usize) -> f64) -> Raster<f64> {
        let mut dem = Raster::new(rows, cols);
        dem.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        for row in 0..rows {
            for col in 0..cols {
                dem.set(row, col, z(row, col)).unwrap();
            }
        }
        dem
    }

    #[test]
    fn test_full_catchment_from_lowest_outlet() {
        // West -> east downward slope: a pour point at the easternmost
        // lowest column of its row captures that entire row band; with a
        // single row the whole strip belongs to the catchment
        let dem = plane(1, 6, |_, col| (6 - col) as f64);
        let fdir = flow_direction(&dem).unwrap();
        let mask = upstream_mask(&fdir, (0, 5)).unwrap();

        for col in 0..6 {
            assert_eq!(mask.get(0, col).unwrap(), 1, "col {col} should drain east");
        }
    }

    #[test]
    fn test_catchment_excludes_other_basin() {
        // Ridge at col 3: left half flows west, right half flows east
        let dem = plane(5, 7, |_, col| 10.0 - (col as f64 - 3.0).abs());
        let fdir = flow_direction(&dem).unwrap();

        let mask = upstream_mask(&fdir, (2, 0)).unwrap();
        assert_eq!(mask.get(2, 0).unwrap(), 1);
        assert_eq!(
            mask.get(2, 6).unwrap(),
            0,
            "opposite basin must not be captured"
        );
    }

    #[test]
    fn test_midslope_pour_point_captures_upstream_only() {
        let dem = plane(5, 5, |row, _| (5 - row) as f64 * 10.0);
        let fdir = flow_direction(&dem).unwrap();

        let mask = upstream_mask(&fdir, (2, 2)).unwrap();
        assert_eq!(mask.get(2, 2).unwrap(), 1);
        assert_eq!(mask.get(0, 2).unwrap(), 1, "upstream cell captured");
        assert_eq!(mask.get(4, 2).unwrap(), 0, "downstream cell excluded");
    }

    #[test]
    fn test_pour_point_out_of_bounds() {
        let dem = plane(3, 3, |_, _| 1.0);
        let fdir = flow_direction(&dem).unwrap();
        assert!(upstream_mask(&fdir, (5, 5)).is_err());
    }
}
