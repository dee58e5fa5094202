//! Native GeoTIFF reading/writing
//!
//! Uses the `tiff` crate for TIFF I/O and decodes the GeoTIFF metadata the
//! analysis needs: the affine transform (pixel scale + tiepoint), the EPSG
//! code from the GeoKey directory, and the GDAL nodata tag.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_GT_MODEL_TYPE: u16 = 1024;
const KEY_GT_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

/// Read a single-band GeoTIFF file into a Raster.
///
/// Recovers the geotransform, the CRS (EPSG geokeys) and the nodata value
/// when present. Errors carry the offending path so callers can relay an
/// actionable message.
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let read_err = |reason: String| Error::RasterRead {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| read_err(e.to_string()))?;
    let mut decoder = Decoder::new(file).map_err(|e| read_err(e.to_string()))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| read_err(format!("cannot read dimensions: {}", e)))?;

    let rows = height as usize;
    let cols = width as usize;

    let result = decoder
        .read_image()
        .map_err(|e| read_err(format!("cannot read image data: {}", e)))?;

    let data: Vec<T> = match result {
        DecodingResult::F32(buf) => cast_buffer(&buf),
        DecodingResult::F64(buf) => cast_buffer(&buf),
        DecodingResult::U8(buf) => cast_buffer(&buf),
        DecodingResult::U16(buf) => cast_buffer(&buf),
        DecodingResult::U32(buf) => cast_buffer(&buf),
        DecodingResult::I8(buf) => cast_buffer(&buf),
        DecodingResult::I16(buf) => cast_buffer(&buf),
        DecodingResult::I32(buf) => cast_buffer(&buf),
        _ => {
            return Err(read_err("unsupported TIFF pixel format".to_string()));
        }
    };

    if data.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;

    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    raster.set_crs(read_epsg(&mut decoder).map(CRS::from_epsg));
    raster.set_nodata(read_nodata(&mut decoder));

    Ok(raster)
}

fn cast_buffer<S, T>(buf: &[S]) -> Vec<T>
where
    S: Copy + num_traits::NumCast,
    T: RasterElement,
{
    buf.iter()
        .map(|&v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
        .collect()
}

/// GeoTransform from ModelPixelScaleTag + ModelTiepointTag
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }

    // tiepoint: [I, J, K, X, Y, Z]; scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    let pixel_width = scale[0];
    let pixel_height = -scale[1]; // negative for north-up

    Some(GeoTransform::new(origin_x, origin_y, pixel_width, pixel_height))
}

/// EPSG code from the GeoKey directory
/// (ProjectedCSTypeGeoKey first, GeographicTypeGeoKey as fallback)
fn read_epsg<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let directory = decoder
        .get_tag_u64_vec(Tag::GeoKeyDirectoryTag)
        .ok()?;

    // Layout: header [version, revision, minor, key_count] then
    // [key_id, tag_location, count, value] per key; inline values only.
    if directory.len() < 4 {
        return None;
    }
    let key_count = directory[3] as usize;
    let mut geographic = None;

    for i in 0..key_count {
        let base = 4 + i * 4;
        if base + 3 >= directory.len() {
            break;
        }
        let key_id = directory[base] as u16;
        let tag_location = directory[base + 1];
        let value = directory[base + 3] as u32;
        if tag_location != 0 {
            continue;
        }
        match key_id {
            KEY_PROJECTED_CS_TYPE if value != 0 && value != u16::MAX as u32 => {
                return Some(value);
            }
            KEY_GEOGRAPHIC_TYPE if value != 0 && value != u16::MAX as u32 => {
                geographic = Some(value);
            }
            _ => {}
        }
    }

    geographic
}

/// Nodata value from the GDAL_NODATA ASCII tag
fn read_nodata<R: std::io::Read + std::io::Seek, T: RasterElement>(
    decoder: &mut Decoder<R>,
) -> Option<T> {
    let text = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()?;
    let value: f64 = text.trim().trim_end_matches('\0').parse().ok()?;
    num_traits::cast(value)
}

/// Write a Raster to a GeoTIFF file as 32-bit float, with transform,
/// EPSG geokeys and nodata tag.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut encoder = TiffEncoder::new(file)
        .map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;

    let (rows, cols) = raster.shape();

    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
        .collect();

    let mut image = encoder
        .new_image::<Gray32Float>(cols as u32, rows as u32)
        .map_err(|e| Error::Other(format!("cannot create TIFF image: {}", e)))?;

    let gt = raster.transform();

    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), &scale[..])
        .map_err(|e| Error::Other(format!("cannot write scale tag: {}", e)))?;

    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), &tiepoint[..])
        .map_err(|e| Error::Other(format!("cannot write tiepoint tag: {}", e)))?;

    let epsg = raster.crs().and_then(|crs| crs.epsg());
    let geokeys = build_geokey_directory(epsg);
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), &geokeys[..])
        .map_err(|e| Error::Other(format!("cannot write geokey tag: {}", e)))?;

    if let Some(nodata) = raster.nodata().and_then(|nd| nd.to_f64()) {
        let text = if nodata.is_nan() {
            "nan".to_string()
        } else {
            format!("{}", nodata)
        };
        image
            .encoder()
            .write_tag(Tag::Unknown(TAG_GDAL_NODATA), text.as_str())
            .map_err(|e| Error::Other(format!("cannot write nodata tag: {}", e)))?;
    }

    image
        .write_data(&data)
        .map_err(|e| Error::Other(format!("cannot write image data: {}", e)))?;

    Ok(())
}

fn build_geokey_directory(epsg: Option<u32>) -> Vec<u16> {
    match epsg {
        Some(4326) => vec![
            1, 1, 0, 3,
            KEY_GT_MODEL_TYPE, 0, 1, 2, // ModelTypeGeographic
            KEY_GT_RASTER_TYPE, 0, 1, 1, // RasterPixelIsArea
            KEY_GEOGRAPHIC_TYPE, 0, 1, 4326,
        ],
        Some(code) => vec![
            1, 1, 0, 3,
            KEY_GT_MODEL_TYPE, 0, 1, 1, // ModelTypeProjected
            KEY_GT_RASTER_TYPE, 0, 1, 1,
            KEY_PROJECTED_CS_TYPE, 0, 1, code as u16,
        ],
        None => vec![
            1, 1, 0, 2,
            KEY_GT_MODEL_TYPE, 0, 1, 1,
            KEY_GT_RASTER_TYPE, 0, 1, 1,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;
    use approx::assert_relative_eq;

    fn sample_raster() -> Raster<f64> {
        let mut raster: Raster<f64> = Raster::new(4, 5);
        raster.set_transform(GeoTransform::new(500_000.0, 5_700_000.0, 10.0, -10.0));
        raster.set_crs(Some(CRS::from_epsg(32632)));
        for row in 0..4 {
            for col in 0..5 {
                raster.set(row, col, (row * 5 + col) as f64).unwrap();
            }
        }
        raster
    }

    #[test]
    fn test_geotiff_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.tif");

        let raster = sample_raster();
        write_geotiff(&raster, &path).unwrap();

        let loaded: Raster<f64> = read_geotiff(&path).unwrap();
        assert_eq!(loaded.shape(), (4, 5));
        assert_eq!(loaded.crs().and_then(|c| c.epsg()), Some(32632));
        assert_relative_eq!(loaded.transform().origin_x, 500_000.0, epsilon = 1e-6);
        assert_relative_eq!(loaded.transform().pixel_height, -10.0, epsilon = 1e-9);
        assert_relative_eq!(loaded.get(2, 3).unwrap(), 13.0, epsilon = 1e-6);
    }

    #[test]
    fn test_read_missing_file_is_actionable() {
        let err = read_geotiff::<f64, _>("/no/such/raster.tif").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("/no/such/raster.tif"), "message was: {msg}");
    }

    #[test]
    fn test_wgs84_geokeys_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latlon.tif");

        let mut raster = sample_raster();
        raster.set_crs(Some(CRS::wgs84()));
        write_geotiff(&raster, &path).unwrap();

        let loaded: Raster<f64> = read_geotiff(&path).unwrap();
        assert_eq!(loaded.crs().and_then(|c| c.epsg()), Some(4326));
    }
}
