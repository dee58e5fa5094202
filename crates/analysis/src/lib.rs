//! # Hydrorisk Analysis
//!
//! DEM-based flood and erosion risk screening: raster preconditioning,
//! flow routing, drainage-network extraction, multi-factor risk fusion,
//! hotspot/ponding detection, catchment delineation and WGS84 output
//! bounding.
//!
//! Entry points:
//! - [`analyze_dem`]: the 7-stage network analysis producing a
//!   GeoJSON-shaped FeatureCollection with an `analysis` block
//! - [`delineate_catchment`]: upstream catchment polygon for a pour point
//!
//! Callers own the [`LayerCache`] for auxiliary rasters and receive
//! progress through a [`ProgressObserver`].

pub mod analyze;
pub mod catchment;
pub mod error;
pub mod hotspots;
pub mod layers;
pub mod network;
pub mod precondition;
pub mod progress;
pub mod report;
pub mod risk;

pub use analyze::{analyze_dem, delineate_catchment, AnalyzeParams, CatchmentParams, WeatherContext};
pub use error::{AnalysisError, Result};
pub use hotspots::{HotspotParams, PondingParams};
pub use layers::{Clock, LayerCache, LayerSource, SystemClock};
pub use network::BoundParams;
pub use precondition::MAX_ANALYSIS_CELLS;
pub use progress::{NullProgress, ProgressObserver};
pub use report::{
    AnalysisBlock, AnalysisType, CatchmentResult, ClassDistribution, Hotspot, Measure, Metrics,
    NetworkAnalysis, RiskClass, Scenario, StreamFeature,
};
