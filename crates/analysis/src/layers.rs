//! Auxiliary raster layers (soil infiltration, imperviousness)
//!
//! Externally supplied rasters are fetched-or-loaded through an explicit
//! cache owned by the caller, windowed to the DEM extent plus a buffer,
//! and resampled onto the DEM grid across CRSs. Every failure on this
//! path falls back to the documented terrain proxies instead of failing
//! the analysis.

use crate::error::Result;
use crate::risk::{nan_to_num, normalize};
use hydrorisk_core::crs::CrsTransformer;
use hydrorisk_core::io::read_geotiff;
use hydrorisk_core::raster::{GeoTransform, Raster};
use hydrorisk_core::CRS;
use ndarray::{s, Array2};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Default buffer added around the DEM extent when windowing a layer
pub const DEFAULT_LAYER_AOI_BUFFER_M: f64 = 100.0;

/// Default lifetime of in-memory cache entries
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(900);

/// Injected time source so cache expiry is testable
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall-clock time source
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Where an auxiliary layer comes from: a local path, a download URL, or
/// both (the path acts as the cache target for the URL). `crs` overrides
/// the CRS for files without geokeys.
#[derive(Debug, Clone, Default)]
pub struct LayerSource {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub crs: Option<CRS>,
}

type CacheEntry = (SystemTime, Arc<Raster<f64>>);

/// Read-mostly cache for auxiliary rasters, shared across invocations.
///
/// In-memory entries are `key -> (timestamp, raster)` with an injected
/// clock; downloads are guarded by a per-target-path lock so concurrent
/// invocations never race to write the same cached file.
pub struct LayerCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    fetch_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    cache_dir: PathBuf,
    ttl: Duration,
    clock: Box<dyn Clock>,
}

impl LayerCache {
    /// Cache writing downloads under `cache_dir`, with the system clock
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(cache_dir, DEFAULT_CACHE_TTL, Box::new(SystemClock))
    }

    /// Cache with an explicit TTL and time source
    pub fn with_clock(cache_dir: impl Into<PathBuf>, ttl: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fetch_locks: Mutex::new(HashMap::new()),
            cache_dir: cache_dir.into(),
            ttl,
            clock,
        }
    }

    fn get(&self, key: &str) -> Option<Arc<Raster<f64>>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let (stamp, raster) = entries.get(key)?;
        let age = self
            .clock
            .now()
            .duration_since(*stamp)
            .unwrap_or(Duration::ZERO);
        if age > self.ttl {
            entries.remove(key);
            return None;
        }
        Some(Arc::clone(raster))
    }

    fn put(&self, key: String, raster: Arc<Raster<f64>>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, (self.clock.now(), raster));
    }

    /// Number of live in-memory entries
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fetch_lock(&self, target: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.fetch_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry(target.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Resolve a source to a local file: prefer an existing path, else
    /// download the URL once into the cache directory.
    fn ensure_local(&self, source: &LayerSource, label: &str) -> Option<PathBuf> {
        if let Some(path) = &source.path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        let url = source.url.as_deref()?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return None;
        }

        let target = source
            .path
            .clone()
            .unwrap_or_else(|| self.cache_dir.join(cache_file_name(url, label)));

        let lock = self.fetch_lock(&target);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        // Another invocation may have finished the download while we waited
        if target.exists() {
            return Some(target);
        }

        match download(url, &target, label) {
            Ok(()) => Some(target),
            Err(err) => {
                warn!(layer = label, url, error = %err, "layer fetch failed");
                None
            }
        }
    }
}

fn cache_file_name(url: &str, label: &str) -> String {
    let base = url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(label);
    if base.contains('.') {
        base.to_string()
    } else {
        format!("{base}.tif")
    }
}

/// Download `url` to `target` atomically: write a `.part` file, then
/// rename. Partial files are removed on every failure path.
fn download(url: &str, target: &Path, label: &str) -> Result<()> {
    info!(layer = label, url, "downloading layer");

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(hydrorisk_core::Error::Io)?;
    }
    let part = target.with_extension("part");

    let write_part = || -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;
        let response = client.get(url).send()?.error_for_status()?;
        let bytes = response.bytes()?;

        let mut file = std::fs::File::create(&part).map_err(hydrorisk_core::Error::Io)?;
        file.write_all(&bytes).map_err(hydrorisk_core::Error::Io)?;
        Ok(())
    };

    if let Err(err) = write_part() {
        let _ = std::fs::remove_file(&part);
        return Err(err);
    }

    std::fs::rename(&part, target).map_err(hydrorisk_core::Error::Io)?;
    info!(layer = label, path = %target.display(), "layer cached");
    Ok(())
}

/// Load a layer and resample it onto the DEM grid.
///
/// Returns `None` (fail-open) when the source is missing, unreadable,
/// CRS-incompatible, or does not intersect the DEM extent.
pub fn load_layer_on_grid(
    cache: &LayerCache,
    source: &LayerSource,
    label: &str,
    dem_shape: (usize, usize),
    dem_transform: &GeoTransform,
    dem_crs: Option<&CRS>,
    buffer_m: f64,
) -> Option<Array2<f64>> {
    let dem_crs = dem_crs?;
    let path = cache.ensure_local(source, label)?;
    let key = path.display().to_string();

    let layer = match cache.get(&key) {
        Some(raster) => raster,
        None => {
            let mut raster: Raster<f64> = match read_geotiff(&path) {
                Ok(r) => r,
                Err(err) => {
                    warn!(layer = label, path = %key, error = %err, "layer unreadable");
                    return None;
                }
            };
            // Map the declared nodata to NaN once, so sampling only has
            // to test for NaN
            if let Some(nd) = raster.nodata() {
                if !nd.is_nan() {
                    raster.data_mut().mapv_inplace(|v| {
                        if (v - nd).abs() < f64::EPSILON {
                            f64::NAN
                        } else {
                            v
                        }
                    });
                }
            }
            raster.set_nodata(Some(f64::NAN));
            if raster.crs().is_none() {
                raster.set_crs(source.crs.clone());
            }

            let layer_crs = raster.crs().cloned()?;
            let to_layer = CrsTransformer::between(dem_crs, &layer_crs).ok()?;
            let windowed = crop_to_window(&raster, dem_shape, dem_transform, &to_layer, buffer_m)?;

            let shared = Arc::new(windowed);
            cache.put(key.clone(), Arc::clone(&shared));
            shared
        }
    };

    let layer_crs = layer.crs().cloned()?;
    let to_layer = CrsTransformer::between(dem_crs, &layer_crs).ok()?;

    let (rows, cols) = dem_shape;
    let mut out = Array2::from_elem((rows, cols), f64::NAN);
    let mut any_finite = false;
    for row in 0..rows {
        for col in 0..cols {
            let (x, y) = dem_transform.pixel_to_geo(col, row);
            let (lx, ly) = to_layer.transform(x, y);
            let value = sample_bilinear(&layer, lx, ly);
            if value.is_finite() {
                any_finite = true;
            }
            out[(row, col)] = value;
        }
    }

    if any_finite {
        debug!(layer = label, "layer resampled onto DEM grid");
        Some(out)
    } else {
        warn!(layer = label, "layer does not cover the DEM extent");
        None
    }
}

/// Crop a layer raster to the DEM extent (plus buffer) expressed in the
/// layer's CRS, to bound the cached footprint.
fn crop_to_window(
    layer: &Raster<f64>,
    dem_shape: (usize, usize),
    dem_transform: &GeoTransform,
    to_layer: &CrsTransformer,
    buffer_m: f64,
) -> Option<Raster<f64>> {
    let (dem_rows, dem_cols) = dem_shape;
    let (min_x, min_y, max_x, max_y) = dem_transform.bounds(dem_cols, dem_rows);

    // Transform all four corners and take the envelope
    let corners = [
        (min_x, min_y),
        (min_x, max_y),
        (max_x, min_y),
        (max_x, max_y),
    ];
    let mut w_min_x = f64::MAX;
    let mut w_min_y = f64::MAX;
    let mut w_max_x = f64::MIN;
    let mut w_max_y = f64::MIN;
    for &(x, y) in &corners {
        let (tx, ty) = to_layer.transform(x, y);
        w_min_x = w_min_x.min(tx);
        w_min_y = w_min_y.min(ty);
        w_max_x = w_max_x.max(tx);
        w_max_y = w_max_y.max(ty);
    }
    w_min_x -= buffer_m;
    w_min_y -= buffer_m;
    w_max_x += buffer_m;
    w_max_y += buffer_m;

    let (rows, cols) = layer.shape();
    let (c0f, r0f) = layer.geo_to_pixel(w_min_x, w_max_y);
    let (c1f, r1f) = layer.geo_to_pixel(w_max_x, w_min_y);

    let r0 = (r0f.floor().max(0.0) as usize).min(rows);
    let c0 = (c0f.floor().max(0.0) as usize).min(cols);
    let r1 = (r1f.ceil().max(0.0) as usize).min(rows);
    let c1 = (c1f.ceil().max(0.0) as usize).min(cols);

    if r0 >= r1 || c0 >= c1 {
        return None; // no intersection
    }

    let window = layer.data().slice(s![r0..r1, c0..c1]).to_owned();
    let (origin_x, origin_y) = layer.transform().pixel_to_geo_corner(c0, r0);

    let mut out = Raster::from_array(window);
    let gt = layer.transform();
    out.set_transform(GeoTransform {
        origin_x,
        origin_y,
        ..*gt
    });
    out.set_crs(layer.crs().cloned());
    out.set_nodata(Some(f64::NAN));
    Some(out)
}

/// Bilinear sample of a raster at a world coordinate; NaN outside the
/// raster or where no finite corner exists.
fn sample_bilinear(raster: &Raster<f64>, x: f64, y: f64) -> f64 {
    let (rows, cols) = raster.shape();
    let (col_f, row_f) = raster.geo_to_pixel(x, y);

    if !col_f.is_finite() || !row_f.is_finite() {
        return f64::NAN;
    }
    if col_f < 0.0 || row_f < 0.0 || col_f > cols as f64 || row_f > rows as f64 {
        return f64::NAN;
    }

    // Pixel centers sit at integer + 0.5 in pixel coordinates
    let u = col_f - 0.5;
    let v = row_f - 0.5;
    let c0 = (u.floor().max(0.0) as usize).min(cols - 1);
    let r0 = (v.floor().max(0.0) as usize).min(rows - 1);
    let c1 = (c0 + 1).min(cols - 1);
    let r1 = (r0 + 1).min(rows - 1);
    let fc = (u - c0 as f64).clamp(0.0, 1.0);
    let fr = (v - r0 as f64).clamp(0.0, 1.0);

    let corners = [
        (unsafe { raster.get_unchecked(r0, c0) }, (1.0 - fr) * (1.0 - fc)),
        (unsafe { raster.get_unchecked(r0, c1) }, (1.0 - fr) * fc),
        (unsafe { raster.get_unchecked(r1, c0) }, fr * (1.0 - fc)),
        (unsafe { raster.get_unchecked(r1, c1) }, fr * fc),
    ];

    let mut sum = 0.0;
    let mut weight = 0.0;
    for &(value, w) in &corners {
        if value.is_nan() {
            continue;
        }
        sum += value * w;
        weight += w;
    }

    if weight > 0.0 {
        sum / weight
    } else {
        f64::NAN
    }
}

/// Provenance of the soil/impervious factors for the assumptions block
#[derive(Debug, Clone)]
pub struct LayerProvenance {
    pub soil_source: &'static str,
    pub impervious_source: &'static str,
    pub soil_path: Option<String>,
    pub impervious_path: Option<String>,
}

/// Build the soil and imperviousness risk factors.
///
/// External rasters are used when they load and align; otherwise the
/// documented proxies apply: soil risk from slope (flatter terrain is
/// assumed to infiltrate better, so the normalized value is inverted),
/// imperviousness risk from accumulation (strong flow corridors are
/// assumed more sealed downstream).
#[allow(clippy::too_many_arguments)]
pub fn resolve_external_factors(
    cache: &LayerCache,
    soil: Option<&LayerSource>,
    impervious: Option<&LayerSource>,
    dem_shape: (usize, usize),
    dem_transform: &GeoTransform,
    dem_crs: Option<&CRS>,
    slope_norm: &Array2<f64>,
    acc_norm: &Array2<f64>,
    buffer_m: f64,
) -> (Array2<f64>, Array2<f64>, LayerProvenance) {
    let load = |source: Option<&LayerSource>, label: &str| -> Option<(Array2<f64>, String)> {
        let source = source?;
        let grid = load_layer_on_grid(
            cache,
            source,
            label,
            dem_shape,
            dem_transform,
            dem_crs,
            buffer_m,
        )?;
        let path = cache
            .ensure_local(source, label)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Some((grid, path))
    };

    let soil_loaded = load(soil, "soil");
    let impervious_loaded = load(impervious, "impervious");

    let (soil_risk, soil_source, soil_path) = match soil_loaded {
        Some((raw, path)) => {
            // Higher infiltration -> lower risk: invert the normalization
            let infiltration = nan_to_num(&normalize(&raw), 0.5);
            (infiltration.mapv(|v| 1.0 - v), "external", Some(path))
        }
        None => {
            let proxy = nan_to_num(slope_norm, 0.5)
                .mapv(|v| (0.45 + 0.25 * v).clamp(0.0, 1.0));
            (proxy, "proxy", None)
        }
    };

    let (impervious_risk, impervious_source, impervious_path) = match impervious_loaded {
        Some((raw, path)) => (nan_to_num(&normalize(&raw), 0.35), "external", Some(path)),
        None => {
            let proxy = nan_to_num(acc_norm, 0.0)
                .mapv(|v| (0.35 + 0.50 * v).clamp(0.0, 1.0));
            (proxy, "proxy", None)
        }
    };

    info!(
        soil = soil_source,
        impervious = impervious_source,
        "risk factor sources"
    );

    (
        soil_risk,
        impervious_risk,
        LayerProvenance {
            soil_source,
            impervious_source,
            soil_path,
            impervious_path,
        },
    )
}
