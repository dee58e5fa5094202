//! Analysis entry points
//!
//! `analyze_dem` runs the seven-stage network analysis: precondition,
//! CRS detection, flow routing, network extraction, risk fusion, hotspot
//! selection and reprojection, with progress checkpoints 1..7 reported in
//! strictly increasing order. `delineate_catchment` traces the upstream
//! catchment of a pour point and polygonizes it.
//!
//! Stages hand grids to each other by value; no numeric grid is shared
//! mutably across stages.

use crate::catchment::{largest_ring, polygonize_mask, rasterize_polygon};
use crate::error::{AnalysisError, Result};
use crate::hotspots::{
    build_hotspots, build_ponding_hotspots, measures_for_hotspot, HotspotInputs, HotspotParams,
    PondingParams,
};
use crate::layers::{resolve_external_factors, LayerCache, LayerSource, DEFAULT_LAYER_AOI_BUFFER_M};
use crate::network::{
    feature_intersects_ring, limit_output_features, line_length, line_midpoint, point_in_ring,
    sample_grid, BoundParams,
};
use crate::precondition::{precondition_dem, MAX_ANALYSIS_CELLS};
use crate::progress::ProgressObserver;
use crate::report::{
    AnalysisBlock, AnalysisType, Assumptions, CatchmentResult, ClassDistribution, Metrics,
    NetworkAnalysis, Performance, RiskClass, Scenario, StreamFeature,
};
use crate::risk::{
    accumulation_norm, erosion_risk_norm, flood_risk_norm, risk_score, scenario_summary,
    slope_norm, RAIN_PROXY_BASELINE,
};
use geo_types::Polygon;
use hydrorisk_algorithms::hydrology::{
    fill_depressions, fill_depth, flow_accumulation, flow_direction, resolve_flats,
    trace_stream_network, upstream_mask, FillParams, FlatParams, FlowAccumulationParams,
    StreamTraceParams,
};
use hydrorisk_algorithms::terrain::{slope, SlopeParams};
use hydrorisk_core::crs::CrsTransformer;
use hydrorisk_core::io::read_geotiff;
use hydrorisk_core::{Raster, CRS};
use ndarray::Array2;
use std::path::Path;
use tracing::info;

const PIPELINE_STEPS: u32 = 7;
const DEFAULT_SCENARIOS_MM_PER_H: [u32; 3] = [30, 50, 100];

/// Externally supplied rainfall context overriding the constant baseline
#[derive(Debug, Clone, Default)]
pub struct WeatherContext {
    /// Rain proxy in [0.05, 1.0]
    pub rain_proxy: Option<f64>,
    /// Scenario intensities in mm/h for the summary projections
    pub scenario_mm_per_h: Option<Vec<f64>>,
    pub source: Option<String>,
    pub mode_used: Option<String>,
    pub moisture_class: Option<String>,
}

/// Parameters for the network analysis
#[derive(Debug, Clone)]
pub struct AnalyzeParams {
    /// Minimum accumulation for a cell to join the drainage network
    pub threshold: u32,
    pub analysis_type: AnalysisType,
    /// Optional AOI polygon as (lat, lon) points; fewer than 3 valid
    /// points fail open (unclipped result)
    pub aoi_polygon: Option<Vec<(f64, f64)>>,
    pub soil_layer: Option<LayerSource>,
    pub impervious_layer: Option<LayerSource>,
    pub weather: Option<WeatherContext>,
    /// Permit analysis of a DEM without CRS; output stays in map/pixel
    /// coordinates
    pub allow_ungeoreferenced: bool,
    pub cell_budget: usize,
    pub layer_aoi_buffer_m: f64,
    pub hotspots: HotspotParams,
    pub ponding: PondingParams,
    pub bounds: BoundParams,
}

impl Default for AnalyzeParams {
    fn default() -> Self {
        Self {
            threshold: 200,
            analysis_type: AnalysisType::FloodScreening,
            aoi_polygon: None,
            soil_layer: None,
            impervious_layer: None,
            weather: None,
            allow_ungeoreferenced: false,
            cell_budget: MAX_ANALYSIS_CELLS,
            layer_aoi_buffer_m: DEFAULT_LAYER_AOI_BUFFER_M,
            hotspots: HotspotParams::default(),
            ponding: PondingParams::default(),
            bounds: BoundParams::default(),
        }
    }
}

/// Parameters for catchment delineation
#[derive(Debug, Clone, Default)]
pub struct CatchmentParams {
    /// Optional AOI polygon as (lat, lon) points clipping the catchment
    /// mask before polygonization (fail-open)
    pub aoi_polygon: Option<Vec<(f64, f64)>>,
}

struct ResolvedWeather {
    rain_proxy: f64,
    scenarios: Vec<u32>,
    source: String,
    mode: String,
    moisture_class: String,
}

fn resolve_weather(context: Option<&WeatherContext>) -> ResolvedWeather {
    let mut resolved = ResolvedWeather {
        rain_proxy: RAIN_PROXY_BASELINE,
        scenarios: DEFAULT_SCENARIOS_MM_PER_H.to_vec(),
        source: "constant_baseline".to_string(),
        mode: "n/a".to_string(),
        moisture_class: "n/a".to_string(),
    };

    let Some(context) = context else {
        return resolved;
    };

    if let Some(rp) = context.rain_proxy {
        if rp.is_finite() {
            resolved.rain_proxy = rp.clamp(0.05, 1.0);
        }
    }
    if let Some(list) = &context.scenario_mm_per_h {
        let mut values: Vec<u32> = list
            .iter()
            .filter(|v| v.is_finite() && **v > 0.0)
            .map(|v| v.round() as u32)
            .collect();
        values.sort_unstable();
        values.dedup();
        if !values.is_empty() {
            values.truncate(3);
            resolved.scenarios = values;
        }
    }
    if let Some(source) = &context.source {
        resolved.source = source.clone();
    }
    if let Some(mode) = &context.mode_used {
        resolved.mode = mode.clone();
    }
    if let Some(moisture) = &context.moisture_class {
        resolved.moisture_class = moisture.clone();
    }

    resolved
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1e3).round() / 1e3
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Run the full network analysis on a DEM file.
pub fn analyze_dem(
    path: impl AsRef<Path>,
    params: &AnalyzeParams,
    cache: &LayerCache,
    progress: &mut dyn ProgressObserver,
) -> Result<NetworkAnalysis> {
    let path = path.as_ref();
    let raw: Raster<f64> = read_geotiff(path)?;
    let (dem, prep) = precondition_dem(raw, params.cell_budget);

    progress.on_step(1, PIPELINE_STEPS, "detecting coordinate reference system");
    let src_crs = dem.crs().cloned();
    if src_crs.is_none() && !params.allow_ungeoreferenced {
        return Err(AnalysisError::MissingCrs {
            path: path.display().to_string(),
        });
    }
    let crs_label = src_crs
        .as_ref()
        .map(|c| c.identifier())
        .unwrap_or_else(|| "none".to_string());
    info!(crs = %crs_label, "source CRS detected");

    let transform = *dem.transform();
    let pixel_area_m2 = dem.pixel_area();
    let (rows, cols) = dem.shape();

    progress.on_step(2, PIPELINE_STEPS, "loading DEM");
    info!(rows, cols, "DEM loaded");

    progress.on_step(3, PIPELINE_STEPS, "filling depressions");
    let filled = fill_depressions(&dem, FillParams::default())?;
    let conditioned = resolve_flats(&filled, FlatParams::default())?;
    let ponding_depth = fill_depth(&dem, &filled)?.into_array();

    progress.on_step(4, PIPELINE_STEPS, "computing flow direction (D8)");
    let fdir = flow_direction(&conditioned)?;

    progress.on_step(5, PIPELINE_STEPS, "computing flow accumulation");
    let mut acc = flow_accumulation(&fdir, FlowAccumulationParams::default())?;
    for ((row, col), value) in dem.data().indexed_iter() {
        if !value.is_finite() {
            unsafe { acc.set_unchecked(row, col, f64::NAN) };
        }
    }

    progress.on_step(6, PIPELINE_STEPS, "extracting drainage network");
    let lines = trace_stream_network(
        &fdir,
        &acc,
        &StreamTraceParams {
            threshold: params.threshold as f64,
        },
    )?;
    let full_feature_count = lines.len();

    // Risk surfaces (slope from the unfilled DEM)
    let slope_deg = slope(&dem, SlopeParams::default())?.into_array();
    let acc_arr = acc.into_array();
    let acc_n = accumulation_norm(&acc_arr);
    let slope_n = slope_norm(&slope_deg);

    let (soil_risk, impervious_risk, provenance) = resolve_external_factors(
        cache,
        params.soil_layer.as_ref(),
        params.impervious_layer.as_ref(),
        (rows, cols),
        &transform,
        src_crs.as_ref(),
        &slope_n,
        &acc_n,
        params.layer_aoi_buffer_m,
    );

    let weather = resolve_weather(params.weather.as_ref());

    let (risk_norm, model_version, rain_history) = match params.analysis_type {
        AnalysisType::ErosionScreening => (
            erosion_risk_norm(&acc_n, &slope_n),
            "erosion-v1-topo",
            "n/a",
        ),
        AnalysisType::FloodScreening => {
            let norm = flood_risk_norm(
                &acc_n,
                &slope_n,
                &soil_risk,
                &impervious_risk,
                weather.rain_proxy,
            );
            let history = if weather.source != "constant_baseline" {
                "weather_driven_proxy"
            } else {
                "constant_baseline"
            };
            (norm, "risk-v2-soil-impervious", history)
        }
    };

    let mut score = risk_score(&risk_norm);
    let mut valid = Array2::from_elem((rows, cols), false);
    for ((row, col), value) in dem.data().indexed_iter() {
        valid[(row, col)] = value.is_finite() && acc_arr[(row, col)].is_finite();
    }
    for ((row, col), ok) in valid.indexed_iter() {
        if !ok {
            score[(row, col)] = f64::NAN;
        }
    }

    // Features with midpoint-sampled attributes, lengths from projected
    // coordinates
    let mut features: Vec<StreamFeature> = lines
        .into_iter()
        .map(|line| {
            let length_m = line_length(&line);
            let mut feature = StreamFeature::new(line, length_m);
            let Some(mid) = line_midpoint(&feature.line) else {
                return feature;
            };
            let Some(sampled) = sample_grid(&score, &transform, mid.x, mid.y) else {
                return feature;
            };
            feature.properties.risk_score = Some(sampled.round() as i64);
            feature.properties.risk_class = Some(RiskClass::from_score(sampled));

            if let Some(acc_mid) = sample_grid(&acc_arr, &transform, mid.x, mid.y) {
                feature.properties.acc_cells = Some(acc_mid.round() as i64);
                let upstream_m2 = acc_mid * pixel_area_m2;
                feature.properties.upstream_area_m2 = Some(upstream_m2.round() as u64);
                feature.properties.upstream_area_km2 = Some(round6(upstream_m2 / 1_000_000.0));
            }
            if let Some(slope_mid) = sample_grid(&slope_deg, &transform, mid.x, mid.y) {
                feature.properties.slope_deg = Some((slope_mid * 10.0).round() / 10.0);
            }
            feature
        })
        .collect();

    // Reproject all geometry to WGS84
    let mut to_wgs84: Option<CrsTransformer> = None;
    if let Some(src) = &src_crs {
        progress.on_step(7, PIPELINE_STEPS, "reprojecting coordinates");
        let transformer = CrsTransformer::between(src, &CRS::wgs84())?;
        for feature in &mut features {
            for coord in &mut feature.line.0 {
                let (x, y) = transformer.transform(coord.x, coord.y);
                coord.x = x;
                coord.y = y;
            }
        }
        if !transformer.is_identity() {
            to_wgs84 = Some(transformer);
        }
    }

    // AOI presentation clip (fail-open on short/invalid polygons)
    let mut clip_ring: Option<Vec<(f64, f64)>> = None;
    if let Some(aoi) = &params.aoi_polygon {
        let ring: Vec<(f64, f64)> = aoi
            .iter()
            .filter(|(lat, lon)| lat.is_finite() && lon.is_finite())
            .map(|&(lat, lon)| (lon, lat))
            .collect();
        if ring.len() >= 3 {
            features.retain(|f| feature_intersects_ring(f, &ring));
            clip_ring = Some(ring);
        }
    }

    let network_length_km = features.iter().map(StreamFeature::length_m).sum::<f64>() / 1000.0;

    let (reduced, truncated) = limit_output_features(features, &params.bounds);

    // Hotspots: terrain first, ponding appended in flood mode, then one
    // re-rank after the optional AOI clip
    let inputs = HotspotInputs {
        risk_score: &score,
        acc: &acc_arr,
        slope_deg: &slope_deg,
        soil_risk: &soil_risk,
        impervious_risk: &impervious_risk,
        transform: &transform,
        to_wgs84: to_wgs84.as_ref(),
        pixel_area_m2,
    };
    let mut hotspots = build_hotspots(&inputs, &params.hotspots);

    if params.analysis_type == AnalysisType::FloodScreening {
        let pond = build_ponding_hotspots(
            &ponding_depth,
            &acc_arr,
            &transform,
            to_wgs84.as_ref(),
            pixel_area_m2,
            &params.ponding,
        );
        for mut hotspot in pond {
            hotspot.rank = hotspots.len() + 1;
            hotspots.push(hotspot);
        }
    }

    for hotspot in &mut hotspots {
        hotspot.measures = measures_for_hotspot(&hotspot.reason, hotspot.risk_score);
    }

    if let Some(ring) = &clip_ring {
        hotspots.retain(|h| point_in_ring(h.lon, h.lat, ring));
        for (idx, hotspot) in hotspots.iter_mut().enumerate() {
            hotspot.rank = idx + 1;
        }
    }

    // Class distribution and score statistics over valid cells
    let mut class_distribution = ClassDistribution::default();
    let mut score_sum = 0.0;
    let mut score_max = f64::NEG_INFINITY;
    let mut valid_count: usize = 0;
    for (&ok, &s) in valid.iter().zip(score.iter()) {
        if ok && s.is_finite() {
            class_distribution.add(s);
            score_sum += s;
            score_max = score_max.max(s);
            valid_count += 1;
        }
    }

    let (ponding_area_km2, ponding_volume_m3, ponding_max_depth_m) =
        if params.analysis_type == AnalysisType::FloodScreening {
            let mut cells: usize = 0;
            let mut volume = 0.0;
            let mut max_depth = 0.0_f64;
            for ((row, col), &depth) in ponding_depth.indexed_iter() {
                if valid[(row, col)] && depth.is_finite() && depth > 0.0 {
                    cells += 1;
                    volume += depth;
                    max_depth = max_depth.max(depth);
                }
            }
            if cells > 0 {
                (
                    Some(round3(cells as f64 * pixel_area_m2 / 1_000_000.0)),
                    Some((volume * pixel_area_m2).round() as u64),
                    Some(round3(max_depth)),
                )
            } else {
                (Some(0.0), Some(0), Some(0.0))
            }
        } else {
            (None, None, None)
        };

    let scenarios: Vec<Scenario> = if params.analysis_type == AnalysisType::FloodScreening {
        weather
            .scenarios
            .iter()
            .map(|&mm| scenario_summary(&risk_norm, &valid, mm))
            .collect()
    } else {
        Vec::new()
    };

    let metrics = Metrics {
        feature_count: full_feature_count,
        feature_count_output: reduced.len(),
        network_length_km: round2(network_length_km),
        aoi_area_km2: round3(valid_count as f64 * pixel_area_m2 / 1_000_000.0),
        risk_score_mean: if valid_count > 0 {
            (score_sum / valid_count as f64).round() as i64
        } else {
            0
        },
        risk_score_max: if valid_count > 0 {
            score_max.round() as i64
        } else {
            0
        },
        threshold: params.threshold,
        model_version,
        ponding_area_km2,
        ponding_volume_m3,
        ponding_max_depth_m,
    };

    let assumptions = Assumptions {
        soil: provenance.soil_source,
        impervious: provenance.impervious_source,
        rain_history,
        rain_proxy: round3(weather.rain_proxy),
        weather_source: weather.source,
        weather_mode: weather.mode,
        weather_moisture_class: weather.moisture_class,
        soil_path: provenance.soil_path,
        impervious_path: provenance.impervious_path,
        layer_aoi_buffer_m: params.layer_aoi_buffer_m,
    };

    let performance = Performance {
        downsample_applied: prep.downsample_applied,
        input_width: prep.input_width,
        input_height: prep.input_height,
        work_width: prep.work_width,
        work_height: prep.work_height,
        scale_factor: prep.scale_factor,
        output_truncated: truncated,
        max_output_features: params.bounds.max_output_features,
        max_line_points: params.bounds.max_line_points,
    };

    info!(
        features = full_feature_count,
        output = reduced.len(),
        "drainage network extracted"
    );

    Ok(NetworkAnalysis {
        features: reduced,
        analysis: AnalysisBlock {
            kind: params.analysis_type,
            metrics,
            class_distribution,
            hotspots,
            scenarios,
            assumptions,
            performance,
        },
    })
}

/// Delineate the upstream catchment polygon for a pour point (WGS84).
pub fn delineate_catchment(
    path: impl AsRef<Path>,
    lat: f64,
    lon: f64,
    params: &CatchmentParams,
    progress: &mut dyn ProgressObserver,
) -> Result<CatchmentResult> {
    let path = path.as_ref();

    progress.on_phase("loading DEM");
    let dem: Raster<f64> = read_geotiff(path)?;
    let Some(src_crs) = dem.crs().cloned() else {
        return Err(AnalysisError::MissingCrs {
            path: path.display().to_string(),
        });
    };
    let transform = *dem.transform();
    let pixel_area_m2 = dem.pixel_area();
    let (rows, cols) = dem.shape();

    let from_wgs84 = CrsTransformer::between(&CRS::wgs84(), &src_crs)?;
    let (x, y) = from_wgs84.transform(lon, lat);

    progress.on_phase("filling depressions");
    let filled = fill_depressions(&dem, FillParams::default())?;
    let conditioned = resolve_flats(&filled, FlatParams::default())?;

    progress.on_phase("computing flow direction (D8)");
    let fdir = flow_direction(&conditioned)?;

    progress.on_phase("delineating catchment");
    let (col_f, row_f) = transform.geo_to_pixel(x, y);
    if !col_f.is_finite()
        || !row_f.is_finite()
        || col_f < 0.0
        || row_f < 0.0
        || row_f >= rows as f64
        || col_f >= cols as f64
    {
        return Err(AnalysisError::PourPointOutsideDem { lat, lon });
    }
    let pour = (row_f.floor() as usize, col_f.floor() as usize);
    if !dem.get(pour.0, pour.1).map(|v| v.is_finite()).unwrap_or(false) {
        return Err(AnalysisError::EmptyCatchment { lat, lon });
    }

    let mut mask = upstream_mask(&fdir, pour)?;
    for ((row, col), value) in dem.data().indexed_iter() {
        if !value.is_finite() {
            unsafe { mask.set_unchecked(row, col, 0) };
        }
    }

    // Optional AOI clip before polygonization (fail-open)
    if let Some(aoi) = &params.aoi_polygon {
        let ring_xy: Vec<(f64, f64)> = aoi
            .iter()
            .filter(|(plat, plon)| plat.is_finite() && plon.is_finite())
            .map(|&(plat, plon)| from_wgs84.transform(plon, plat))
            .collect();
        if ring_xy.len() >= 3 {
            if let Some(aoi_mask) = rasterize_polygon(&ring_xy, (rows, cols), &transform) {
                for ((row, col), &inside) in aoi_mask.indexed_iter() {
                    if !inside {
                        unsafe { mask.set_unchecked(row, col, 0) };
                    }
                }
            }
        }
    }

    let cell_count = mask.data().iter().filter(|&&v| v == 1).count();
    if cell_count == 0 {
        return Err(AnalysisError::EmptyCatchment { lat, lon });
    }
    let area_m2 = cell_count as f64 * pixel_area_m2;

    progress.on_phase("polygonizing catchment");
    let rings = polygonize_mask(&mask);
    let Some(mut ring) = largest_ring(rings) else {
        return Err(AnalysisError::EmptyCatchment { lat, lon });
    };

    let to_wgs84 = CrsTransformer::between(&src_crs, &CRS::wgs84())?;
    for coord in &mut ring.0 {
        let (rx, ry) = to_wgs84.transform(coord.x, coord.y);
        coord.x = rx;
        coord.y = ry;
    }

    info!(cells = cell_count, area_m2, "catchment delineated");

    Ok(CatchmentResult {
        polygon: Polygon::new(ring, Vec::new()),
        area_m2: area_m2.round() as u64,
        area_ha: round3(area_m2 / 10_000.0),
        area_km2: round3(area_m2 / 1_000_000.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_weather_defaults() {
        let resolved = resolve_weather(None);
        assert_eq!(resolved.rain_proxy, RAIN_PROXY_BASELINE);
        assert_eq!(resolved.scenarios, vec![30, 50, 100]);
        assert_eq!(resolved.source, "constant_baseline");
    }

    #[test]
    fn test_resolve_weather_clamps_and_sorts() {
        let context = WeatherContext {
            rain_proxy: Some(2.5),
            scenario_mm_per_h: Some(vec![100.0, 20.0, -5.0, 20.4, 60.0, 40.0]),
            source: Some("radar".to_string()),
            mode_used: Some("nowcast".to_string()),
            moisture_class: Some("wet".to_string()),
        };
        let resolved = resolve_weather(Some(&context));
        assert_eq!(resolved.rain_proxy, 1.0);
        assert_eq!(resolved.scenarios, vec![20, 40, 60]);
        assert_eq!(resolved.source, "radar");
        assert_eq!(resolved.mode, "nowcast");
        assert_eq!(resolved.moisture_class, "wet");
    }

    #[test]
    fn test_resolve_weather_ignores_non_finite_proxy() {
        let context = WeatherContext {
            rain_proxy: Some(f64::NAN),
            ..Default::default()
        };
        let resolved = resolve_weather(Some(&context));
        assert_eq!(resolved.rain_proxy, RAIN_PROXY_BASELINE);
    }
}
