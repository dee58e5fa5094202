//! Error types for the analysis pipeline
//!
//! Fatal errors carry the specifics an interactive caller needs to relay:
//! which raster, which coordinate, which stage.

use thiserror::Error;

/// Errors produced by the analysis pipeline
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Core(#[from] hydrorisk_core::Error),

    #[error("DEM {path} has no coordinate reference system; set allow_ungeoreferenced to analyze it anyway")]
    MissingCrs { path: String },

    #[error("pour point ({lat:.6}, {lon:.6}) falls outside the DEM extent")]
    PourPointOutsideDem { lat: f64, lon: f64 },

    #[error("no catchment found at pour point ({lat:.6}, {lon:.6}): the point is outside the drained area or on nodata")]
    EmptyCatchment { lat: f64, lon: f64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result alias for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;
