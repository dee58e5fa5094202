//! Flat resolution
//!
//! Depression filling leaves contiguous equal-elevation regions with no
//! outward slope, so D8 flow direction is undefined there. This pass
//! imposes a consistent drainage gradient on every flat that has an
//! outlet: a gradient towards lower terrain combined with a weaker
//! gradient away from higher terrain, applied as tiny elevation
//! increments.
//!
//! A flat cell on the raster border drains off-grid and therefore counts
//! as an outlet. Flats with no outlet at all (enclosed by nodata) are
//! left unchanged and stay pits.
//!
//! Reference:
//! Barnes, R., Lehman, C., & Mulla, D. (2014). An efficient assignment of
//! drainage direction over flat surfaces in raster digital elevation
//! models. *Computers & Geosciences*, 62, 128-135.

use super::D8_OFFSETS;
use hydrorisk_core::raster::Raster;
use hydrorisk_core::{Algorithm, Error, Result};
use ndarray::Array2;
use std::collections::VecDeque;

/// Parameters for flat resolution
#[derive(Debug, Clone)]
pub struct FlatParams {
    /// Elevation increment per gradient step. Empirically chosen; small
    /// enough not to disturb real relief, large enough to survive f64
    /// addition against typical elevation magnitudes.
    pub epsilon: f64,
}

impl Default for FlatParams {
    fn default() -> Self {
        Self { epsilon: 1e-5 }
    }
}

/// Flat resolution algorithm
#[derive(Debug, Clone, Default)]
pub struct ResolveFlats;

impl Algorithm for ResolveFlats {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = FlatParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Resolve Flats"
    }

    fn description(&self) -> &'static str {
        "Impose drainage gradients on flat regions (Barnes 2014)"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        resolve_flats(&input, params)
    }
}

/// Resolve flat regions of a (filled) DEM.
///
/// A cell is flat when it is valid, has no strictly lower valid neighbor,
/// and has at least one equal-elevation neighbor. For every flat region
/// with an outlet, each cell's elevation is raised by
/// `epsilon * (2 * dist_towards_lower + dist_away_from_higher)` so the
/// whole region drains towards its outlet(s).
pub fn resolve_flats(dem: &Raster<f64>, params: FlatParams) -> Result<Raster<f64>> {
    let (rows, cols) = dem.shape();
    let nodata = dem.nodata();
    let epsilon = params.epsilon;

    let is_nd = |value: f64| {
        value.is_nan() || nodata.map_or(false, |nd| (value - nd).abs() < f64::EPSILON)
    };

    // Classify flat cells
    let mut flat = Array2::<bool>::from_elem((rows, cols), false);
    for row in 0..rows {
        for col in 0..cols {
            let z = unsafe { dem.get_unchecked(row, col) };
            if is_nd(z) {
                continue;
            }

            let mut has_lower = false;
            let mut has_equal = false;
            for &(dr, dc) in &D8_OFFSETS {
                let nr = row as isize + dr;
                let nc = col as isize + dc;
                if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
                    continue;
                }
                let zn = unsafe { dem.get_unchecked(nr as usize, nc as usize) };
                if is_nd(zn) {
                    continue;
                }
                if zn < z {
                    has_lower = true;
                    break;
                }
                if zn == z {
                    has_equal = true;
                }
            }

            flat[(row, col)] = !has_lower && has_equal;
        }
    }

    // Label flat regions (8-connected components of equal elevation)
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut label_count: u32 = 0;
    for row in 0..rows {
        for col in 0..cols {
            if !flat[(row, col)] || labels[(row, col)] != 0 {
                continue;
            }
            label_count += 1;
            let region = label_count;
            let z = unsafe { dem.get_unchecked(row, col) };

            let mut queue = VecDeque::new();
            labels[(row, col)] = region;
            queue.push_back((row, col));
            while let Some((r, c)) = queue.pop_front() {
                for &(dr, dc) in &D8_OFFSETS {
                    let nr = r as isize + dr;
                    let nc = c as isize + dc;
                    if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
                        continue;
                    }
                    let nr = nr as usize;
                    let nc = nc as usize;
                    if !flat[(nr, nc)] || labels[(nr, nc)] != 0 {
                        continue;
                    }
                    if unsafe { dem.get_unchecked(nr, nc) } != z {
                        continue;
                    }
                    labels[(nr, nc)] = region;
                    queue.push_back((nr, nc));
                }
            }
        }
    }

    // Edge cells: low edges can spill into an equal, drainable neighbor
    // or off the raster border; high edges touch strictly higher terrain.
    let mut dist_low = Array2::<u32>::zeros((rows, cols));
    let mut dist_high = Array2::<u32>::zeros((rows, cols));
    let mut low_queue = VecDeque::new();
    let mut high_queue = VecDeque::new();

    for row in 0..rows {
        for col in 0..cols {
            if !flat[(row, col)] {
                continue;
            }
            let z = unsafe { dem.get_unchecked(row, col) };

            let mut is_low = row == 0 || row == rows - 1 || col == 0 || col == cols - 1;
            let mut is_high = false;
            for &(dr, dc) in &D8_OFFSETS {
                let nr = row as isize + dr;
                let nc = col as isize + dc;
                if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
                    continue;
                }
                let nr = nr as usize;
                let nc = nc as usize;
                let zn = unsafe { dem.get_unchecked(nr, nc) };
                if is_nd(zn) {
                    continue;
                }
                if zn == z && !flat[(nr, nc)] {
                    is_low = true;
                }
                if zn > z {
                    is_high = true;
                }
            }

            if is_low {
                dist_low[(row, col)] = 1;
                low_queue.push_back((row, col));
            }
            if is_high {
                dist_high[(row, col)] = 1;
                high_queue.push_back((row, col));
            }
        }
    }

    let bfs = |dist: &mut Array2<u32>, queue: &mut VecDeque<(usize, usize)>| {
        while let Some((r, c)) = queue.pop_front() {
            let region = labels[(r, c)];
            let d = dist[(r, c)];
            for &(dr, dc) in &D8_OFFSETS {
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
                    continue;
                }
                let nr = nr as usize;
                let nc = nc as usize;
                if labels[(nr, nc)] != region || dist[(nr, nc)] != 0 {
                    continue;
                }
                dist[(nr, nc)] = d + 1;
                queue.push_back((nr, nc));
            }
        }
    };

    bfs(&mut dist_low, &mut low_queue);
    bfs(&mut dist_high, &mut high_queue);

    // Largest away-from-higher distance per region, for inverting that
    // gradient (cells near high edges get the larger increments)
    let mut max_high = vec![0u32; label_count as usize + 1];
    for row in 0..rows {
        for col in 0..cols {
            let region = labels[(row, col)] as usize;
            if region != 0 {
                max_high[region] = max_high[region].max(dist_high[(row, col)]);
            }
        }
    }

    let mut output = dem.clone();
    for row in 0..rows {
        for col in 0..cols {
            let region = labels[(row, col)] as usize;
            if region == 0 || dist_low[(row, col)] == 0 {
                continue; // not flat, or flat with no outlet
            }

            // Low-edge cells start at 1 so they rise above the equal
            // outside neighbor they spill into
            let towards_lower = dist_low[(row, col)] as f64;
            let away_from_higher = if dist_high[(row, col)] > 0 {
                (max_high[region] + 1 - dist_high[(row, col)]) as f64
            } else {
                0.0
            };

            let z = unsafe { dem.get_unchecked(row, col) };
            let adjusted = z + epsilon * (2.0 * towards_lower + away_from_higher);
            unsafe { output.set_unchecked(row, col, adjusted) };
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::{fill_depressions, flow_direction, FillParams};
    use hydrorisk_core::GeoTransform;

    #[test]
    fn test_flat_with_outlet_drains_interior() {
        // 5x5 plateau at z=5 with a single lower outlet cell on the border.
        // Interior cells must all receive a direction; border cells are
        // allowed to stay outlets (they drain off-grid).
        let mut dem = Raster::filled(5, 5, 5.0);
        dem.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));
        dem.set(2, 4, 4.0).unwrap();

        let resolved = resolve_flats(&dem, FlatParams::default()).unwrap();
        let fdir = flow_direction(&resolved).unwrap();

        for row in 1..4 {
            for col in 1..4 {
                assert_ne!(
                    fdir.get(row, col).unwrap(),
                    0,
                    "interior cell ({row}, {col}) should drain after flat resolution"
                );
            }
        }
    }

    #[test]
    fn test_flat_enclosed_by_nodata_unchanged() {
        // A flat sealed off by nodata has no outlet and stays as-is
        let mut dem = Raster::filled(4, 4, f64::NAN);
        dem.set_transform(GeoTransform::new(0.0, 4.0, 1.0, -1.0));
        for row in 1..3 {
            for col in 1..3 {
                dem.set(row, col, 7.0).unwrap();
            }
        }

        let resolved = resolve_flats(&dem, FlatParams::default()).unwrap();
        for row in 1..3 {
            for col in 1..3 {
                assert_eq!(resolved.get(row, col).unwrap(), 7.0);
            }
        }
        assert!(resolved.get(0, 0).unwrap().is_nan());
    }

    #[test]
    fn test_resolution_is_tiny() {
        let mut dem = Raster::filled(5, 5, 5.0);
        dem.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));
        dem.set(2, 4, 4.0).unwrap();

        let resolved = resolve_flats(&dem, FlatParams::default()).unwrap();
        for row in 0..5 {
            for col in 0..5 {
                let delta = resolved.get(row, col).unwrap() - dem.get(row, col).unwrap();
                assert!(
                    (0.0..0.01).contains(&delta),
                    "increment at ({row}, {col}) should be tiny, got {delta}"
                );
            }
        }
    }

    #[test]
    fn test_filled_sink_resolves_to_drainage() {
        // Bowl: flat fill leaves a plateau; flat resolution must drain it
        let mut dem = Raster::new(7, 7);
        dem.set_transform(GeoTransform::new(0.0, 7.0, 1.0, -1.0));
        for row in 0..7 {
            for col in 0..7 {
                let d = (row as f64 - 3.0).hypot(col as f64 - 3.0);
                dem.set(row, col, d).unwrap();
            }
        }
        dem.set(3, 3, -2.0).unwrap(); // deep pit

        let filled = fill_depressions(&dem, FillParams::default()).unwrap();
        let resolved = resolve_flats(&filled, FlatParams::default()).unwrap();
        let fdir = flow_direction(&resolved).unwrap();

        assert_ne!(
            fdir.get(3, 3).unwrap(),
            0,
            "former pit should drain after fill + flat resolution"
        );
    }
}
