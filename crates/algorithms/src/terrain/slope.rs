//! Slope from DEMs
//!
//! Rate of change of elevation using the Horn (1981) method: partial
//! derivatives over a 3x3 neighborhood. Output is in degrees; edge cells
//! and cells with incomplete neighborhoods are NaN.

use crate::maybe_rayon::*;
use hydrorisk_core::raster::Raster;
use hydrorisk_core::{Algorithm, Error, Result};
use ndarray::Array2;

/// Parameters for slope calculation
#[derive(Debug, Clone)]
pub struct SlopeParams {
    /// Z-factor for unit conversion (use ~1/111320 per degree when the DEM
    /// is in lat/lon with metre elevations; 1.0 for projected DEMs)
    pub z_factor: f64,
}

impl Default for SlopeParams {
    fn default() -> Self {
        Self { z_factor: 1.0 }
    }
}

/// Slope algorithm
#[derive(Debug, Clone, Default)]
pub struct Slope;

impl Algorithm for Slope {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = SlopeParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Slope"
    }

    fn description(&self) -> &'static str {
        "Calculate slope in degrees from a DEM using Horn's method"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        slope(&input, params)
    }
}

/// Calculate slope in degrees.
///
/// Horn's method over the 3x3 neighborhood
/// ```text
/// a b c
/// d e f
/// g h i
/// ```
/// with `dz/dx = ((c + 2f + i) - (a + 2d + g)) / (8 * cellsize)` and the
/// symmetric expression for `dz/dy`.
pub fn slope(dem: &Raster<f64>, params: SlopeParams) -> Result<Raster<f64>> {
    let (rows, cols) = dem.shape();
    let cell_size = dem.cell_size() * params.z_factor;
    let nodata = dem.nodata();

    let eight_cell_size = 8.0 * cell_size;

    let output_data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];

            for col in 0..cols {
                let e = unsafe { dem.get_unchecked(row, col) };
                if e.is_nan() || (nodata.is_some() && (e - nodata.unwrap()).abs() < f64::EPSILON) {
                    continue;
                }

                // Edges lack the full 3x3 neighborhood
                if row == 0 || row == rows - 1 || col == 0 || col == cols - 1 {
                    continue;
                }

                let a = unsafe { dem.get_unchecked(row - 1, col - 1) };
                let b = unsafe { dem.get_unchecked(row - 1, col) };
                let c = unsafe { dem.get_unchecked(row - 1, col + 1) };
                let d = unsafe { dem.get_unchecked(row, col - 1) };
                let f = unsafe { dem.get_unchecked(row, col + 1) };
                let g = unsafe { dem.get_unchecked(row + 1, col - 1) };
                let h = unsafe { dem.get_unchecked(row + 1, col) };
                let i = unsafe { dem.get_unchecked(row + 1, col + 1) };

                if [a, b, c, d, f, g, h, i].iter().any(|v| v.is_nan()) {
                    continue;
                }

                let dz_dx = ((c + 2.0 * f + i) - (a + 2.0 * d + g)) / eight_cell_size;
                let dz_dy = ((g + 2.0 * h + i) - (a + 2.0 * b + c)) / eight_cell_size;

                row_data[col] = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan().to_degrees();
            }

            row_data
        })
        .collect();

    let mut output = dem.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), output_data).map_err(|e| Error::Other(e.to_string()))?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrorisk_core::GeoTransform;

    #[test]
    fn test_slope_flat_surface() {
        let mut dem: Raster<f64> = Raster::filled(10, 10, 100.0);
        dem.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));

        let result = slope(&dem, SlopeParams::default()).unwrap();
        let val = result.get(5, 5).unwrap();
        assert!(val.abs() < 0.001, "flat surface should have ~0 slope, got {val}");
    }

    #[test]
    fn test_slope_45_degrees() {
        // z = col with cell size 1: gradient 1 in x -> 45 degrees
        let mut dem: Raster<f64> = Raster::new(10, 10);
        dem.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));
        for row in 0..10 {
            for col in 0..10 {
                dem.set(row, col, col as f64).unwrap();
            }
        }

        let result = slope(&dem, SlopeParams::default()).unwrap();
        let val = result.get(5, 5).unwrap();
        assert!((val - 45.0).abs() < 0.1, "expected ~45 degrees, got {val}");
    }

    #[test]
    fn test_slope_uniform_on_tilted_plane() {
        let mut dem: Raster<f64> = Raster::new(10, 10);
        dem.set_transform(GeoTransform::new(0.0, 10.0, 1.0, -1.0));
        for row in 0..10 {
            for col in 0..10 {
                dem.set(row, col, (row + col) as f64).unwrap();
            }
        }

        let result = slope(&dem, SlopeParams::default()).unwrap();
        let v1 = result.get(3, 3).unwrap();
        let v2 = result.get(6, 6).unwrap();
        assert!((v1 - v2).abs() < 0.001, "constant gradient: {v1} vs {v2}");
    }

    #[test]
    fn test_slope_edges_are_nan() {
        let mut dem: Raster<f64> = Raster::filled(5, 5, 1.0);
        dem.set_transform(GeoTransform::new(0.0, 5.0, 1.0, -1.0));

        let result = slope(&dem, SlopeParams::default()).unwrap();
        assert!(result.get(0, 2).unwrap().is_nan());
        assert!(result.get(4, 2).unwrap().is_nan());
        assert!(result.get(2, 0).unwrap().is_nan());
    }
}
