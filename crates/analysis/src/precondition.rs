//! DEM preconditioning
//!
//! Bounds analysis cost by downsampling rasters whose cell count exceeds a
//! fixed budget. The downsampled raster replaces the input by value, so
//! there is no temporary file to clean up on any exit path.

use hydrorisk_core::raster::{resample_bilinear, Raster};
use serde::Serialize;
use tracing::info;

/// Default cell budget: rasters above this are downsampled
pub const MAX_ANALYSIS_CELLS: usize = 4_000_000;

/// Per-axis floor so degenerate AOIs stay analyzable
pub const MIN_WORK_DIM: usize = 256;

/// What the preconditioner did, for the performance block
#[derive(Debug, Clone, Serialize)]
pub struct PreparationInfo {
    pub downsample_applied: bool,
    pub input_width: usize,
    pub input_height: usize,
    pub work_width: usize,
    pub work_height: usize,
    pub scale_factor: f64,
}

/// Downsample `dem` when its cell count exceeds `cell_budget`.
///
/// Scale factor is `sqrt(cells / budget)`, applied per axis with bilinear
/// interpolation and a floor of [`MIN_WORK_DIM`] pixels; the geotransform
/// is rescaled so the raster keeps covering the same extent.
pub fn precondition_dem(dem: Raster<f64>, cell_budget: usize) -> (Raster<f64>, PreparationInfo) {
    let (rows, cols) = dem.shape();
    let total_cells = rows * cols;

    if total_cells <= cell_budget {
        let info = PreparationInfo {
            downsample_applied: false,
            input_width: cols,
            input_height: rows,
            work_width: cols,
            work_height: rows,
            scale_factor: 1.0,
        };
        return (dem, info);
    }

    let scale = (total_cells as f64 / cell_budget as f64).sqrt();
    let work_width = MIN_WORK_DIM.max((cols as f64 / scale) as usize);
    let work_height = MIN_WORK_DIM.max((rows as f64 / scale) as usize);

    let work = resample_bilinear(&dem, work_height, work_width);

    info!(
        input = %format!("{}x{}", cols, rows),
        work = %format!("{}x{}", work_width, work_height),
        scale = %format!("{:.3}", scale),
        "downsample applied"
    );

    let info = PreparationInfo {
        downsample_applied: true,
        input_width: cols,
        input_height: rows,
        work_width,
        work_height,
        scale_factor: (scale * 1000.0).round() / 1000.0,
    };
    (work, info)
}
