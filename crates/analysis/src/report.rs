//! Serializable result types
//!
//! The output contract is GeoJSON-shaped: a FeatureCollection of stream
//! polylines carrying an `analysis` block, and a polygon FeatureCollection
//! plus area metrics for catchment delineation. Geometry stays typed
//! (`geo_types`) internally and is converted exhaustively at this
//! serialization boundary.

use geo_types::{Geometry, LineString, Polygon};
use hydrorisk_core::vector::geometry_to_geojson;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Analysis mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// Heavy-rain flood screening (multi-factor risk fusion)
    #[default]
    FloodScreening,
    /// Erosion screening (topographic proxy only)
    ErosionScreening,
}

/// Risk class thresholds: >=85 very high, >=70 high, >=45 medium, else low
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskClass {
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            RiskClass::VeryHigh
        } else if score >= 70.0 {
            RiskClass::High
        } else if score >= 45.0 {
            RiskClass::Medium
        } else {
            RiskClass::Low
        }
    }
}

/// Valid-cell counts per risk class; the counts sum to the number of
/// valid cells in the risk surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassDistribution {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub very_high: usize,
}

impl ClassDistribution {
    pub fn add(&mut self, score: f64) {
        match RiskClass::from_score(score) {
            RiskClass::Low => self.low += 1,
            RiskClass::Medium => self.medium += 1,
            RiskClass::High => self.high += 1,
            RiskClass::VeryHigh => self.very_high += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.low + self.medium + self.high + self.very_high
    }
}

/// A rule-based remediation suggestion attached to a hotspot
#[derive(Debug, Clone, Serialize)]
pub struct Measure {
    pub id: &'static str,
    pub title: &'static str,
    pub why: &'static str,
    pub what: &'static str,
    pub effort: &'static str,
    pub time: &'static str,
    pub priority: u8,
}

/// A ranked hazard hotspot
#[derive(Debug, Clone, Serialize)]
pub struct Hotspot {
    pub rank: usize,
    pub lat: f64,
    pub lon: f64,
    pub risk_score: i64,
    pub risk_class: RiskClass,
    pub reason: String,
    pub upstream_area_m2: u64,
    pub upstream_area_km2: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ponding_depth_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotspot_type: Option<&'static str>,
    pub measures: Vec<Measure>,
}

/// Summary projection for one rainfall intensity
#[derive(Debug, Clone, Serialize)]
pub struct Scenario {
    pub rain_mm_per_h: u32,
    pub mean_score: i64,
    pub high_share_percent: f64,
    pub very_high_share_percent: f64,
}

/// Headline metrics of one analysis
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub feature_count: usize,
    pub feature_count_output: usize,
    pub network_length_km: f64,
    pub aoi_area_km2: f64,
    pub risk_score_mean: i64,
    pub risk_score_max: i64,
    pub threshold: u32,
    pub model_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ponding_area_km2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ponding_volume_m3: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ponding_max_depth_m: Option<f64>,
}

/// Which risk inputs were externally supplied vs. proxy-derived, and
/// which rainfall context was used. Immutable once computed.
#[derive(Debug, Clone, Serialize)]
pub struct Assumptions {
    pub soil: &'static str,
    pub impervious: &'static str,
    pub rain_history: &'static str,
    pub rain_proxy: f64,
    pub weather_source: String,
    pub weather_mode: String,
    pub weather_moisture_class: String,
    pub soil_path: Option<String>,
    pub impervious_path: Option<String>,
    pub layer_aoi_buffer_m: f64,
}

/// Preconditioning and output-bounding transparency
#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub downsample_applied: bool,
    pub input_width: usize,
    pub input_height: usize,
    pub work_width: usize,
    pub work_height: usize,
    pub scale_factor: f64,
    pub output_truncated: bool,
    pub max_output_features: usize,
    pub max_line_points: usize,
}

/// The `analysis` block attached to the FeatureCollection
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisBlock {
    pub kind: AnalysisType,
    pub metrics: Metrics,
    pub class_distribution: ClassDistribution,
    pub hotspots: Vec<Hotspot>,
    pub scenarios: Vec<Scenario>,
    pub assumptions: Assumptions,
    pub performance: Performance,
}

/// Midpoint-sampled attributes of one stream feature
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_class: Option<RiskClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acc_cells: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_area_m2: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_area_km2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slope_deg: Option<f64>,
}

/// One drainage branch with its sampled attributes.
///
/// `length_m` is captured from projected coordinates before reprojection
/// and feeds `network_length_km`; it is not serialized.
#[derive(Debug, Clone)]
pub struct StreamFeature {
    pub line: LineString<f64>,
    pub properties: StreamProperties,
    pub(crate) length_m: f64,
}

impl StreamFeature {
    pub fn new(line: LineString<f64>, length_m: f64) -> Self {
        Self {
            line,
            properties: StreamProperties::default(),
            length_m,
        }
    }

    pub fn length_m(&self) -> f64 {
        self.length_m
    }
}

impl Serialize for StreamFeature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("type", "Feature")?;
        map.serialize_entry(
            "geometry",
            &geometry_to_geojson(&Geometry::LineString(self.line.clone())),
        )?;
        map.serialize_entry("properties", &self.properties)?;
        map.end()
    }
}

/// Full network-analysis result: a GeoJSON FeatureCollection (WGS84)
/// carrying the `analysis` block.
#[derive(Debug, Clone)]
pub struct NetworkAnalysis {
    pub features: Vec<StreamFeature>,
    pub analysis: AnalysisBlock,
}

impl Serialize for NetworkAnalysis {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("type", "FeatureCollection")?;
        map.serialize_entry("features", &self.features)?;
        map.serialize_entry("analysis", &self.analysis)?;
        map.end()
    }
}

/// Catchment delineation result: the largest polygon ring (WGS84) plus
/// area metrics derived from the mask cell count.
#[derive(Debug, Clone)]
pub struct CatchmentResult {
    pub polygon: Polygon<f64>,
    pub area_m2: u64,
    pub area_ha: f64,
    pub area_km2: f64,
}

impl Serialize for CatchmentResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let geojson = serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": geometry_to_geojson(&Geometry::Polygon(self.polygon.clone())),
            }],
        });
        let meta = serde_json::json!({
            "area_m2": self.area_m2,
            "area_ha": self.area_ha,
            "area_km2": self.area_km2,
        });

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("geojson", &geojson)?;
        map.serialize_entry("meta", &meta)?;
        map.end()
    }
}
