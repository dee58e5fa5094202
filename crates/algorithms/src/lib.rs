//! # Hydrorisk Algorithms
//!
//! Raster-graph hydrology from Digital Elevation Models:
//! - Priority-Flood depression filling (Barnes 2014) and fill depth
//! - Flat resolution over contiguous equal-elevation regions
//! - D8 flow direction and topological flow accumulation
//! - Drainage-network polyline tracing
//! - Upstream-catchment masking from a pour point
//! - Horn slope

pub mod hydrology;
pub mod terrain;

mod maybe_rayon;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::hydrology::{
        fill_depressions, fill_depth, flow_accumulation, flow_direction, resolve_flats,
        trace_stream_network, upstream_mask, FillParams, FlatParams, FlowAccumulationParams,
        StreamTraceParams,
    };
    pub use crate::terrain::{slope, SlopeParams};
    pub use hydrorisk_core::prelude::*;
}
