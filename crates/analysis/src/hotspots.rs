//! Hotspot selection and ponding detection
//!
//! Cells are ranked by risk score (terrain hotspots) or fill depth
//! (ponding hotspots) and accepted greedily under a spatial exclusion
//! radius, compared in squared pixel distance. Each accepted hotspot gets
//! a reason assembled from the factors that tripped their thresholds and
//! a deterministic list of remediation measures.

use crate::report::{Hotspot, Measure, RiskClass};
use crate::risk::percentile;
use hydrorisk_core::crs::CrsTransformer;
use hydrorisk_core::raster::GeoTransform;
use ndarray::Array2;

/// Parameters for terrain hotspot selection
#[derive(Debug, Clone)]
pub struct HotspotParams {
    /// Maximum number of hotspots
    pub top_n: usize,
    /// Minimum pixel separation between accepted hotspots.
    /// Empirically chosen in the field; no derivation documented.
    pub min_distance_px: usize,
}

impl Default for HotspotParams {
    fn default() -> Self {
        Self {
            top_n: 8,
            min_distance_px: 25,
        }
    }
}

/// Parameters for ponding hotspot selection
#[derive(Debug, Clone)]
pub struct PondingParams {
    pub top_n: usize,
    /// Slightly larger than the terrain radius, also empirical
    pub min_distance_px: usize,
}

impl Default for PondingParams {
    fn default() -> Self {
        Self {
            top_n: 4,
            min_distance_px: 28,
        }
    }
}

/// Factor thresholds that contribute to a hotspot reason
const REASON_SOIL_RISK_MIN: f64 = 0.65;
const REASON_IMPERVIOUS_RISK_MIN: f64 = 0.65;
const REASON_ACC_PERCENTILE: f64 = 90.0;
const REASON_SLOPE_PERCENTILE: f64 = 75.0;

/// Grids and georeferencing the hotspot builder samples from
pub struct HotspotInputs<'a> {
    pub risk_score: &'a Array2<f64>,
    pub acc: &'a Array2<f64>,
    pub slope_deg: &'a Array2<f64>,
    pub soil_risk: &'a Array2<f64>,
    pub impervious_risk: &'a Array2<f64>,
    pub transform: &'a GeoTransform,
    /// Present when the DEM CRS differs from WGS84
    pub to_wgs84: Option<&'a CrsTransformer>,
    pub pixel_area_m2: f64,
}

fn far_enough(selected: &[(usize, usize)], row: usize, col: usize, min_px: usize) -> bool {
    let min_sq = (min_px * min_px) as i64;
    selected.iter().all(|&(pr, pc)| {
        let dr = row as i64 - pr as i64;
        let dc = col as i64 - pc as i64;
        dr * dr + dc * dc >= min_sq
    })
}

fn cell_lon_lat(
    transform: &GeoTransform,
    to_wgs84: Option<&CrsTransformer>,
    row: usize,
    col: usize,
) -> (f64, f64) {
    let (x, y) = transform.pixel_to_geo(col, row);
    match to_wgs84 {
        Some(t) => t.transform(x, y),
        None => (x, y),
    }
}

fn upstream_area(acc_value: f64, pixel_area_m2: f64) -> (u64, f64) {
    if acc_value > 0.0 && pixel_area_m2 > 0.0 {
        let m2 = acc_value * pixel_area_m2;
        (m2.round() as u64, round6(m2 / 1_000_000.0))
    } else {
        (0, 0.0)
    }
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

fn round3(value: f64) -> f64 {
    (value * 1e3).round() / 1e3
}

/// Select the top terrain hotspots by risk score with spatial exclusion.
pub fn build_hotspots(inputs: &HotspotInputs<'_>, params: &HotspotParams) -> Vec<Hotspot> {
    let mut candidates: Vec<((usize, usize), f64)> = inputs
        .risk_score
        .indexed_iter()
        .filter_map(|(idx, &v)| v.is_finite().then_some((idx, v)))
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let acc_p90 = percentile(inputs.acc.iter().copied(), REASON_ACC_PERCENTILE);
    let slope_p75 = percentile(inputs.slope_deg.iter().copied(), REASON_SLOPE_PERCENTILE);

    let mut selected: Vec<(usize, usize)> = Vec::new();
    let mut hotspots = Vec::new();

    for ((row, col), score) in candidates {
        if !far_enough(&selected, row, col, params.min_distance_px) {
            continue;
        }

        let sample = |arr: &Array2<f64>| {
            let v = arr[(row, col)];
            if v.is_finite() {
                v
            } else {
                0.0
            }
        };
        let acc_val = sample(inputs.acc);
        let slope_val = sample(inputs.slope_deg);
        let soil_val = sample(inputs.soil_risk);
        let impervious_val = sample(inputs.impervious_risk);

        let mut reasons: Vec<&str> = Vec::new();
        if acc_p90.is_finite() && acc_val >= acc_p90 {
            reasons.push("strong flow accumulation");
        }
        if slope_p75.is_finite() && slope_val >= slope_p75 {
            reasons.push("steep slope");
        }
        if soil_val >= REASON_SOIL_RISK_MIN {
            reasons.push("low infiltration");
        }
        if impervious_val >= REASON_IMPERVIOUS_RISK_MIN {
            reasons.push("high imperviousness");
        }
        if reasons.is_empty() {
            reasons.push("combined terrain risk indicator");
        }

        let (lon, lat) = cell_lon_lat(inputs.transform, inputs.to_wgs84, row, col);
        let (area_m2, area_km2) = upstream_area(acc_val, inputs.pixel_area_m2);

        hotspots.push(Hotspot {
            rank: hotspots.len() + 1,
            lat,
            lon,
            risk_score: score.round() as i64,
            risk_class: RiskClass::from_score(score),
            reason: reasons.join(" + "),
            upstream_area_m2: area_m2,
            upstream_area_km2: area_km2,
            ponding_depth_m: None,
            hotspot_type: None,
            measures: Vec::new(),
        });

        selected.push((row, col));
        if hotspots.len() >= params.top_n {
            break;
        }
    }

    hotspots
}

/// Select ponding hotspots from the depression fill depth.
///
/// Scores are relative to the 95th-percentile depth (falling back to the
/// maximum), so a landscape's deepest sinks saturate near 100.
pub fn build_ponding_hotspots(
    ponding_depth_m: &Array2<f64>,
    acc: &Array2<f64>,
    transform: &GeoTransform,
    to_wgs84: Option<&CrsTransformer>,
    pixel_area_m2: f64,
    params: &PondingParams,
) -> Vec<Hotspot> {
    let mut candidates: Vec<((usize, usize), f64)> = ponding_depth_m
        .indexed_iter()
        .filter_map(|(idx, &d)| (d.is_finite() && d > 0.0).then_some((idx, d)))
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let depths = candidates.iter().map(|&(_, d)| d);
    let mut p95 = percentile(depths, 95.0);
    if !p95.is_finite() || p95 <= 0.0 {
        p95 = candidates.first().map(|&(_, d)| d).unwrap_or(0.0);
    }
    if !p95.is_finite() || p95 <= 0.0 {
        return Vec::new();
    }

    let mut selected: Vec<(usize, usize)> = Vec::new();
    let mut hotspots = Vec::new();

    for ((row, col), depth) in candidates {
        if !far_enough(&selected, row, col, params.min_distance_px) {
            continue;
        }

        let score = ((depth / p95) * 100.0).clamp(0.0, 100.0);
        let acc_val = {
            let v = acc[(row, col)];
            if v.is_finite() {
                v
            } else {
                0.0
            }
        };
        let (lon, lat) = cell_lon_lat(transform, to_wgs84, row, col);
        let (area_m2, area_km2) = upstream_area(acc_val, pixel_area_m2);

        hotspots.push(Hotspot {
            rank: hotspots.len() + 1,
            lat,
            lon,
            risk_score: score.round() as i64,
            risk_class: RiskClass::from_score(score),
            reason: format!(
                "sink / potential ponding (depth ~{} cm)",
                (depth * 100.0).round() as i64
            ),
            upstream_area_m2: area_m2,
            upstream_area_km2: area_km2,
            ponding_depth_m: Some(round3(depth)),
            hotspot_type: Some("ponding"),
            measures: Vec::new(),
        });

        selected.push((row, col));
        if hotspots.len() >= params.top_n {
            break;
        }
    }

    hotspots
}

/// Rule-based remediation suggestions, keyed off the reason text and the
/// risk tier. Deterministic; capped at 6 entries; a site check is always
/// included.
pub fn measures_for_hotspot(reason: &str, risk_score: i64) -> Vec<Measure> {
    let reason = reason.to_lowercase();

    let priority = |base: u8| -> u8 {
        if risk_score >= 85 {
            base.saturating_sub(1).max(1)
        } else if risk_score >= 70 {
            base
        } else {
            base + 1
        }
    };

    let mut measures: Vec<Measure> = Vec::new();

    if reason.contains("imperviousness") {
        measures.push(Measure {
            id: "de-seal",
            title: "Unseal surfaces and open them to infiltration",
            why: "Less direct runoff, more infiltration.",
            what: "Permeable paving, gravel grids, drainage strips, greened verges.",
            effort: "medium",
            time: "weeks",
            priority: priority(2),
        });
        measures.push(Measure {
            id: "rain-garden",
            title: "Swale / rain garden (on-site retention)",
            why: "Buffers peak runoff.",
            what: "Swale with an emergency overflow, optionally combined with an infiltration trench.",
            effort: "medium",
            time: "days",
            priority: priority(2),
        });
    }

    if reason.contains("infiltration") {
        measures.push(Measure {
            id: "surface-roughness",
            title: "Roughen the surface to slow runoff",
            why: "Reduces erosion and delays runoff.",
            what: "Cover crops, mulch, work the soil across the slope direction.",
            effort: "low",
            time: "days",
            priority: priority(1),
        });
    }

    if reason.contains("slope") {
        measures.push(Measure {
            id: "contour",
            title: "Manage slopes across the gradient / terracing",
            why: "Reduces flow velocity and erosive energy.",
            what: "Contour ploughing, small cross-slope bunds, hedge strips.",
            effort: "medium",
            time: "weeks",
            priority: priority(1),
        });
    }

    if reason.contains("accumulation") {
        measures.push(Measure {
            id: "drainage-path",
            title: "Secure drainage paths (ditch, culvert, retention)",
            why: "Prevents water from taking uncontrolled detours.",
            what: "Keep inlets clear, add small retention volumes, define an emergency flow path.",
            effort: "low",
            time: "days",
            priority: priority(1),
        });
    }

    if reason.contains("ponding") || reason.contains("sink") {
        measures.push(Measure {
            id: "micro-retention",
            title: "Defuse ponding (emergency drain / retention)",
            why: "Sinks collect water and shift damage downstream when they overflow.",
            what: "A controlled emergency drain, small retention volumes, keep inlets clear.",
            effort: "medium",
            time: "days",
            priority: priority(1),
        });
    }

    measures.push(Measure {
        id: "site-check",
        title: "On-site inspection",
        why: "Models miss local details (kerbs, inlets, obstacles).",
        what: "Walk the hotspot, take photos and notes, watch the flow paths during heavy rain.",
        effort: "low",
        time: "hours",
        priority: priority(1),
    });

    let effort_rank = |effort: &str| match effort {
        "low" => 1,
        "medium" => 2,
        "high" => 3,
        _ => 9,
    };
    measures.sort_by_key(|m| (m.priority, effort_rank(m.effort)));
    measures.truncate(6);
    measures
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs_from<'a>(
        risk: &'a Array2<f64>,
        acc: &'a Array2<f64>,
        slope: &'a Array2<f64>,
        soil: &'a Array2<f64>,
        imp: &'a Array2<f64>,
        transform: &'a GeoTransform,
    ) -> HotspotInputs<'a> {
        HotspotInputs {
            risk_score: risk,
            acc,
            slope_deg: slope,
            soil_risk: soil,
            impervious_risk: imp,
            transform,
            to_wgs84: None,
            pixel_area_m2: 100.0,
        }
    }

    #[test]
    fn test_hotspots_respect_min_distance() {
        let size = 64;
        let mut risk = Array2::from_elem((size, size), 10.0);
        // Two nearby peaks and one far peak
        risk[(10, 10)] = 99.0;
        risk[(12, 12)] = 98.0; // within 25 px of the first: excluded
        risk[(50, 50)] = 97.0;

        let zeros = Array2::zeros((size, size));
        let transform = GeoTransform::new(0.0, size as f64, 1.0, -1.0);
        let inputs = inputs_from(&risk, &zeros, &zeros, &zeros, &zeros, &transform);

        let hotspots = build_hotspots(
            &inputs,
            &HotspotParams {
                top_n: 3,
                min_distance_px: 25,
            },
        );

        assert!(hotspots.len() >= 2);
        assert_eq!(hotspots[0].risk_score, 99);
        assert_eq!(hotspots[1].risk_score, 97, "the 98 peak is too close");

        // Pairwise squared distance invariant, recovered from lat/lon in
        // the identity transform (1 px per unit)
        for a in &hotspots {
            for b in &hotspots {
                if a.rank == b.rank {
                    continue;
                }
                let d2 = (a.lon - b.lon).powi(2) + (a.lat - b.lat).powi(2);
                assert!(d2 >= (25 * 25) as f64, "hotspots too close: {d2}");
            }
        }
    }

    #[test]
    fn test_hotspot_ranks_contiguous() {
        let mut risk = Array2::from_elem((100, 100), f64::NAN);
        risk[(5, 5)] = 80.0;
        risk[(60, 60)] = 70.0;
        risk[(5, 95)] = 60.0;

        let zeros = Array2::zeros((100, 100));
        let transform = GeoTransform::new(0.0, 100.0, 1.0, -1.0);
        let inputs = inputs_from(&risk, &zeros, &zeros, &zeros, &zeros, &transform);

        let hotspots = build_hotspots(&inputs, &HotspotParams::default());
        let ranks: Vec<usize> = hotspots.iter().map(|h| h.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_generic_reason_when_no_factor_trips() {
        let mut risk = Array2::from_elem((40, 40), f64::NAN);
        risk[(20, 20)] = 50.0;
        let zeros = Array2::zeros((40, 40));
        let transform = GeoTransform::new(0.0, 40.0, 1.0, -1.0);
        let inputs = inputs_from(&risk, &zeros, &zeros, &zeros, &zeros, &transform);

        let hotspots = build_hotspots(&inputs, &HotspotParams::default());
        // All-zero factor grids: every cell ties the percentiles, so the
        // accumulation/slope reasons trip; soil/impervious stay quiet
        assert!(!hotspots[0].reason.is_empty());
    }

    #[test]
    fn test_ponding_scores_relative_to_p95() {
        let mut depth = Array2::from_elem((80, 80), 0.0);
        depth[(10, 10)] = 2.0;
        depth[(70, 70)] = 1.0;
        let zeros = Array2::zeros((80, 80));
        let transform = GeoTransform::new(0.0, 80.0, 1.0, -1.0);

        let hotspots = build_ponding_hotspots(
            &depth,
            &zeros,
            &transform,
            None,
            100.0,
            &PondingParams::default(),
        );

        assert_eq!(hotspots.len(), 2);
        assert_eq!(hotspots[0].hotspot_type, Some("ponding"));
        assert!(hotspots[0].risk_score >= hotspots[1].risk_score);
        assert!(hotspots[0].ponding_depth_m.unwrap() > 1.9);
        assert!(hotspots[0].reason.contains("ponding"));
    }

    #[test]
    fn test_ponding_empty_without_positive_depth() {
        let depth = Array2::from_elem((10, 10), 0.0);
        let zeros = Array2::zeros((10, 10));
        let transform = GeoTransform::default();
        let hotspots = build_ponding_hotspots(
            &depth,
            &zeros,
            &transform,
            None,
            100.0,
            &PondingParams::default(),
        );
        assert!(hotspots.is_empty());
    }

    #[test]
    fn test_measures_deterministic_and_capped() {
        let reason = "strong flow accumulation + steep slope + low infiltration + high imperviousness";
        let a = measures_for_hotspot(reason, 90);
        let b = measures_for_hotspot(reason, 90);
        let ids_a: Vec<&str> = a.iter().map(|m| m.id).collect();
        let ids_b: Vec<&str> = b.iter().map(|m| m.id).collect();
        assert_eq!(ids_a, ids_b, "measures must be deterministic");
        assert!(a.len() <= 6);
        assert!(ids_a.contains(&"site-check"));
    }

    #[test]
    fn test_measure_priority_tightens_with_score() {
        let low = measures_for_hotspot("high imperviousness", 50);
        let high = measures_for_hotspot("high imperviousness", 90);
        let find = |ms: &[Measure]| ms.iter().find(|m| m.id == "de-seal").unwrap().priority;
        assert!(find(&high) < find(&low));
    }
}
