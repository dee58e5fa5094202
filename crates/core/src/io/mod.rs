//! I/O for reading and writing georeferenced rasters

mod native;

pub use native::{read_geotiff, write_geotiff};
