//! Risk model
//!
//! Fuses accumulation, slope, soil infiltration, imperviousness and a
//! rainfall proxy into a normalized risk surface, scaled to an integer
//! 0-100 score. Flood screening uses the weighted five-factor fusion;
//! erosion screening is a topographic-only proxy.

use crate::report::Scenario;
use ndarray::Array2;

/// Weight of each flood-screening factor
pub const FLOOD_WEIGHT_ACC: f64 = 0.35;
pub const FLOOD_WEIGHT_SLOPE: f64 = 0.25;
pub const FLOOD_WEIGHT_SOIL: f64 = 0.15;
pub const FLOOD_WEIGHT_IMPERVIOUS: f64 = 0.15;
pub const FLOOD_WEIGHT_RAIN: f64 = 0.10;

/// Rainfall proxy baseline when no weather context is supplied
pub const RAIN_PROXY_BASELINE: f64 = 0.60;

/// Slope is clipped to this ceiling (degrees) before normalization
pub const SLOPE_CLIP_DEG: f64 = 60.0;

/// Min-max normalize finite values to [0, 1], preserving NaN.
///
/// A constant surface normalizes to 0 everywhere (not NaN), matching the
/// behavior thresholds in the model were tuned against.
pub fn normalize(values: &Array2<f64>) -> Array2<f64> {
    let mut vmin = f64::INFINITY;
    let mut vmax = f64::NEG_INFINITY;
    for &v in values.iter() {
        if v.is_finite() {
            vmin = vmin.min(v);
            vmax = vmax.max(v);
        }
    }

    let mut out = Array2::from_elem(values.dim(), f64::NAN);
    if !vmin.is_finite() {
        return out; // no finite input at all
    }

    let range = vmax - vmin;
    for (o, &v) in out.iter_mut().zip(values.iter()) {
        if v.is_finite() {
            *o = if range.abs() < 1e-12 {
                0.0
            } else {
                ((v - vmin) / range).clamp(0.0, 1.0)
            };
        }
    }
    out
}

/// Replace non-finite values by `fill`
pub fn nan_to_num(values: &Array2<f64>, fill: f64) -> Array2<f64> {
    values.mapv(|v| if v.is_finite() { v } else { fill })
}

/// Percentile with linear interpolation over the finite values
/// (numpy `nanpercentile` convention). NaN when no finite value exists.
pub fn percentile(values: impl Iterator<Item = f64>, p: f64) -> f64 {
    let mut finite: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (p / 100.0) * (finite.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return finite[lower];
    }
    let weight = rank - lower as f64;
    finite[lower] * (1.0 - weight) + finite[upper] * weight
}

/// log1p-transform accumulation, then normalize to [0, 1]
pub fn accumulation_norm(acc: &Array2<f64>) -> Array2<f64> {
    let logged = acc.mapv(|v| {
        if v.is_finite() {
            v.max(0.0).ln_1p()
        } else {
            f64::NAN
        }
    });
    normalize(&logged)
}

/// Clip slope to [0, SLOPE_CLIP_DEG] degrees, then normalize to [0, 1]
pub fn slope_norm(slope_deg: &Array2<f64>) -> Array2<f64> {
    let clipped = slope_deg.mapv(|v| {
        if v.is_finite() {
            v.clamp(0.0, SLOPE_CLIP_DEG)
        } else {
            f64::NAN
        }
    });
    normalize(&clipped)
}

/// Flood-screening fusion:
/// `0.35*acc + 0.25*slope + 0.15*soil + 0.15*impervious + 0.10*rain`
/// with documented NaN substitutions per factor.
pub fn flood_risk_norm(
    acc_norm: &Array2<f64>,
    slope_norm: &Array2<f64>,
    soil_risk: &Array2<f64>,
    impervious_risk: &Array2<f64>,
    rain_proxy: f64,
) -> Array2<f64> {
    let acc = nan_to_num(acc_norm, 0.0);
    let slope = nan_to_num(slope_norm, 0.0);
    let soil = nan_to_num(soil_risk, 0.5);
    let impervious = nan_to_num(impervious_risk, 0.35);

    let mut out = Array2::zeros(acc.dim());
    for (((o, &a), (&s, &so)), &im) in out
        .iter_mut()
        .zip(acc.iter())
        .zip(slope.iter().zip(soil.iter()))
        .zip(impervious.iter())
    {
        *o = FLOOD_WEIGHT_ACC * a
            + FLOOD_WEIGHT_SLOPE * s
            + FLOOD_WEIGHT_SOIL * so
            + FLOOD_WEIGHT_IMPERVIOUS * im
            + FLOOD_WEIGHT_RAIN * rain_proxy;
    }
    out
}

/// Erosion-screening fusion: `normalize(acc_norm * slope_norm)`
pub fn erosion_risk_norm(acc_norm: &Array2<f64>, slope_norm: &Array2<f64>) -> Array2<f64> {
    let acc = nan_to_num(acc_norm, 0.0);
    let slope = nan_to_num(slope_norm, 0.0);
    let driver = &acc * &slope;
    normalize(&driver)
}

/// Scale a risk-norm surface to integer scores `round(clip(r*100, 0, 100))`
pub fn risk_score(risk_norm: &Array2<f64>) -> Array2<f64> {
    risk_norm.mapv(|v| {
        if v.is_finite() {
            (v * 100.0).round().clamp(0.0, 100.0)
        } else {
            f64::NAN
        }
    })
}

/// Summary projection for one rainfall intensity.
///
/// The surface is scaled by `mm / 50` and re-clipped, so mean score is
/// monotonically non-decreasing in the rain intensity for a fixed risk
/// surface.
pub fn scenario_summary(
    risk_norm: &Array2<f64>,
    valid: &Array2<bool>,
    rain_mm_per_h: u32,
) -> Scenario {
    let scale = rain_mm_per_h as f64 / 50.0;

    let mut sum = 0.0;
    let mut count: usize = 0;
    let mut high: usize = 0;
    let mut very_high: usize = 0;

    for (&r, &is_valid) in risk_norm.iter().zip(valid.iter()) {
        if !is_valid || !r.is_finite() {
            continue;
        }
        let score = (r * scale).clamp(0.0, 1.0) * 100.0;
        sum += score;
        count += 1;
        if score >= 70.0 {
            high += 1;
        }
        if score >= 85.0 {
            very_high += 1;
        }
    }

    if count == 0 {
        return Scenario {
            rain_mm_per_h,
            mean_score: 0,
            high_share_percent: 0.0,
            very_high_share_percent: 0.0,
        };
    }

    let share = |n: usize| ((n as f64 / count as f64) * 1000.0).round() / 10.0;
    Scenario {
        rain_mm_per_h,
        mean_score: (sum / count as f64).round() as i64,
        high_share_percent: share(high),
        very_high_share_percent: share(very_high),
    }
}
