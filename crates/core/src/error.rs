//! Error types for hydrorisk-core

use thiserror::Error;

/// Main error type for core raster operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read raster {path}: {reason}")]
    RasterRead { path: String, reason: String },

    #[error("invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch {
        er: usize,
        ec: usize,
        ar: usize,
        ac: usize,
    },

    #[error("unsupported CRS pair for reprojection: {src} -> {dst} (supported: EPSG:4326 and UTM EPSG:326xx/327xx)")]
    UnsupportedCrs { src: String, dst: String },

    #[error("flow direction grid contains a cycle ({unresolved} cells never drained): internal flow-routing defect")]
    FlowCycle { unresolved: usize },

    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
