//! D8 flow direction
//!
//! Assigns each cell the direction of its steepest downslope neighbor
//! (deterministic eight-node method). Drops are divided by the neighbor
//! distance, so diagonal neighbors compete fairly with cardinal ones.
//!
//! Ties are broken by the iteration order of
//! [`D8_OFFSETS`](super::D8_OFFSETS): the first direction reaching the
//! maximum drop wins. The input should be hydrologically conditioned
//! (depressions filled, flats resolved) for every cell to receive a
//! direction.

use super::{D8_DISTANCE_FACTORS, D8_OFFSETS};
use crate::maybe_rayon::*;
use hydrorisk_core::raster::Raster;
use hydrorisk_core::{Algorithm, Error, Result};
use ndarray::Array2;

/// Flow direction algorithm (D8)
#[derive(Debug, Clone, Default)]
pub struct FlowDirection;

impl Algorithm for FlowDirection {
    type Input = Raster<f64>;
    type Output = Raster<u8>;
    type Params = ();
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Direction (D8)"
    }

    fn description(&self) -> &'static str {
        "Calculate D8 flow direction from a conditioned DEM"
    }

    fn execute(&self, input: Self::Input, _params: Self::Params) -> Result<Self::Output> {
        flow_direction(&input)
    }
}

/// Calculate D8 flow direction from a DEM.
///
/// Returns codes 1..=8 (see the module docs of [`super`]) and 0 for
/// pits, unresolved flats and nodata cells.
pub fn flow_direction(dem: &Raster<f64>) -> Result<Raster<u8>> {
    let (rows, cols) = dem.shape();
    let nodata = dem.nodata();
    let cell_size = dem.cell_size();

    let output_data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0u8; cols];

            for col in 0..cols {
                let center = unsafe { dem.get_unchecked(row, col) };

                if center.is_nan() {
                    continue;
                }
                if let Some(nd) = nodata {
                    if (center - nd).abs() < f64::EPSILON {
                        continue;
                    }
                }

                let mut max_drop = 0.0_f64;
                let mut best_dir: u8 = 0;

                for (idx, &(dr, dc)) in D8_OFFSETS.iter().enumerate() {
                    let nr = row as isize + dr;
                    let nc = col as isize + dc;

                    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                        continue;
                    }

                    let neighbor = unsafe { dem.get_unchecked(nr as usize, nc as usize) };

                    if neighbor.is_nan() {
                        continue;
                    }
                    if let Some(nd) = nodata {
                        if (neighbor - nd).abs() < f64::EPSILON {
                            continue;
                        }
                    }

                    let distance = D8_DISTANCE_FACTORS[idx] * cell_size;
                    let drop = (center - neighbor) / distance;

                    if drop > max_drop {
                        max_drop = drop;
                        best_dir = (idx + 1) as u8;
                    }
                }

                row_data[col] = best_dir;
            }

            row_data
        })
        .collect();

    let mut output = dem.with_same_meta::<u8>(rows, cols);
    output.set_nodata(Some(0));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), output_data).map_err(|e| Error::Other(e.to_string()))?;

    Ok(output)
}
