//! Terrain derivatives

mod slope;

pub use slope::{slope, Slope, SlopeParams};
