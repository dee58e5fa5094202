//! Bilinear raster resampling
//!
//! Used by the DEM preconditioner to shrink rasters whose cell count
//! exceeds the analysis budget. NaN cells do not contaminate their
//! neighborhood: each output cell is the weight-renormalized average of
//! the finite corner samples, and NaN only where no corner is finite.

use crate::raster::Raster;

/// Resample a float raster to a new shape with bilinear interpolation.
///
/// The output carries a geotransform scaled so the raster keeps covering
/// the same extent, and the source CRS. Nodata is represented by NaN.
pub fn resample_bilinear(src: &Raster<f64>, new_rows: usize, new_cols: usize) -> Raster<f64> {
    let (rows, cols) = src.shape();
    let nodata = src.nodata();

    let row_scale = rows as f64 / new_rows as f64;
    let col_scale = cols as f64 / new_cols as f64;

    let mut out = src.with_same_meta::<f64>(new_rows, new_cols);
    out.set_transform(src.transform().scaled(col_scale, row_scale));
    out.set_nodata(Some(f64::NAN));

    for out_row in 0..new_rows {
        // Source position of this output cell's center
        let src_row = (out_row as f64 + 0.5) * row_scale - 0.5;
        let r0 = src_row.floor().max(0.0) as usize;
        let r1 = (r0 + 1).min(rows - 1);
        let fr = (src_row - r0 as f64).clamp(0.0, 1.0);

        for out_col in 0..new_cols {
            let src_col = (out_col as f64 + 0.5) * col_scale - 0.5;
            let c0 = src_col.floor().max(0.0) as usize;
            let c1 = (c0 + 1).min(cols - 1);
            let fc = (src_col - c0 as f64).clamp(0.0, 1.0);

            let corners = [
                (unsafe { src.get_unchecked(r0, c0) }, (1.0 - fr) * (1.0 - fc)),
                (unsafe { src.get_unchecked(r0, c1) }, (1.0 - fr) * fc),
                (unsafe { src.get_unchecked(r1, c0) }, fr * (1.0 - fc)),
                (unsafe { src.get_unchecked(r1, c1) }, fr * fc),
            ];

            let mut sum = 0.0;
            let mut weight = 0.0;
            for &(value, w) in &corners {
                let is_nd = value.is_nan()
                    || nodata.map_or(false, |nd| (value - nd).abs() < f64::EPSILON);
                if is_nd {
                    continue;
                }
                sum += value * w;
                weight += w;
            }

            let value = if weight > 0.0 { sum / weight } else { f64::NAN };
            unsafe { out.set_unchecked(out_row, out_col, value) };
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;
    use approx::assert_relative_eq;

    #[test]
    fn test_resample_constant_surface() {
        let mut src: Raster<f64> = Raster::filled(8, 8, 5.0);
        src.set_transform(GeoTransform::new(0.0, 8.0, 1.0, -1.0));

        let out = resample_bilinear(&src, 4, 4);
        assert_eq!(out.shape(), (4, 4));
        for row in 0..4 {
            for col in 0..4 {
                assert_relative_eq!(out.get(row, col).unwrap(), 5.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_resample_preserves_extent() {
        let mut src: Raster<f64> = Raster::filled(10, 20, 1.0);
        src.set_transform(GeoTransform::new(100.0, 200.0, 2.0, -2.0));

        let out = resample_bilinear(&src, 5, 10);
        let (a0, a1, a2, a3) = src.bounds();
        let (b0, b1, b2, b3) = out.bounds();
        assert_relative_eq!(a0, b0, epsilon = 1e-9);
        assert_relative_eq!(a1, b1, epsilon = 1e-9);
        assert_relative_eq!(a2, b2, epsilon = 1e-9);
        assert_relative_eq!(a3, b3, epsilon = 1e-9);
    }

    #[test]
    fn test_resample_linear_gradient() {
        // z = col on a 1x8 strip halves to a 1x4 strip, still monotone
        let mut src: Raster<f64> = Raster::new(1, 8);
        src.set_transform(GeoTransform::new(0.0, 1.0, 1.0, -1.0));
        for col in 0..8 {
            src.set(0, col, col as f64).unwrap();
        }

        let out = resample_bilinear(&src, 1, 4);
        let mut prev = f64::NEG_INFINITY;
        for col in 0..4 {
            let v = out.get(0, col).unwrap();
            assert!(v > prev, "resampled gradient must stay monotone");
            prev = v;
        }
    }

    #[test]
    fn test_resample_ignores_nan_neighbors() {
        let mut src: Raster<f64> = Raster::filled(4, 4, 2.0);
        src.set_transform(GeoTransform::new(0.0, 4.0, 1.0, -1.0));
        src.set(0, 0, f64::NAN).unwrap();

        let out = resample_bilinear(&src, 2, 2);
        // The NaN corner must not poison the averaged cell
        assert_relative_eq!(out.get(0, 0).unwrap(), 2.0, epsilon = 1e-12);
    }
}
