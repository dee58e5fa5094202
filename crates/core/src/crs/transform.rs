//! Pure-Rust WGS84 <-> UTM reprojection (Snyder 1987, USGS formulas).
//!
//! Covers EPSG 326xx (UTM North) and 327xx (UTM South), which handles the
//! projected DEMs this engine sees in practice. No external C dependencies
//! (no libproj). Both directions are implemented: the network output is
//! reprojected to WGS84, and pour points / AOI rings are projected from
//! WGS84 into the DEM's CRS.

use crate::crs::CRS;
use crate::error::{Error, Result};
use geo_types::{Coord, Geometry, LineString};

// WGS84 ellipsoid constants

const A: f64 = 6_378_137.0; // semi-major axis (m)
const F: f64 = 1.0 / 298.257_223_563; // flattening
const E2: f64 = 2.0 * F - F * F; // eccentricity squared
const E_PRIME2: f64 = E2 / (1.0 - E2); // second eccentricity squared
const K0: f64 = 0.9996; // UTM scale factor
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Parse an EPSG code into UTM zone info: `Some((zone, is_north))`.
///
/// - EPSG 326xx -> zone xx, northern hemisphere
/// - EPSG 327xx -> zone xx, southern hemisphere
pub fn parse_utm_epsg(epsg: u32) -> Option<(u32, bool)> {
    if (32601..=32660).contains(&epsg) {
        Some((epsg - 32600, true))
    } else if (32701..=32760).contains(&epsg) {
        Some((epsg - 32700, false))
    } else {
        None
    }
}

/// Coordinate transformer between two CRSs.
///
/// Construct with [`CrsTransformer::between`]; `transform` maps a single
/// `(x, y)` pair, `transform_geometry` rewrites a whole geometry in place.
#[derive(Debug, Clone, Copy)]
pub struct CrsTransformer {
    kind: Kind,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    /// Source and target are equivalent
    Identity,
    /// WGS84 lon/lat -> UTM easting/northing
    ToUtm { zone: u32, north: bool },
    /// UTM easting/northing -> WGS84 lon/lat
    FromUtm { zone: u32, north: bool },
}

impl CrsTransformer {
    /// Build a transformer from `src` to `dst`.
    ///
    /// Returns `Error::UnsupportedCrs` when the pair is neither an identity
    /// nor a WGS84/UTM combination.
    pub fn between(src: &CRS, dst: &CRS) -> Result<Self> {
        if src.is_equivalent(dst) {
            return Ok(Self { kind: Kind::Identity });
        }

        let unsupported = || Error::UnsupportedCrs {
            src: src.identifier(),
            dst: dst.identifier(),
        };

        match (src.epsg(), dst.epsg()) {
            (Some(4326), Some(code)) => {
                let (zone, north) = parse_utm_epsg(code).ok_or_else(unsupported)?;
                Ok(Self {
                    kind: Kind::ToUtm { zone, north },
                })
            }
            (Some(code), Some(4326)) => {
                let (zone, north) = parse_utm_epsg(code).ok_or_else(unsupported)?;
                Ok(Self {
                    kind: Kind::FromUtm { zone, north },
                })
            }
            _ => Err(unsupported()),
        }
    }

    /// Whether this transformer is a no-op
    pub fn is_identity(&self) -> bool {
        matches!(self.kind, Kind::Identity)
    }

    /// Transform one coordinate pair (x, y) / (lon, lat)
    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        match self.kind {
            Kind::Identity => (x, y),
            Kind::ToUtm { zone, north } => wgs84_to_utm(x, y, zone, north),
            Kind::FromUtm { zone, north } => utm_to_wgs84(x, y, zone, north),
        }
    }

    /// Rewrite every coordinate of a geometry in place.
    ///
    /// Handles every `geo_types::Geometry` variant exhaustively so new
    /// geometry kinds cannot silently pass through untransformed.
    pub fn transform_geometry(&self, geometry: &mut Geometry<f64>) {
        if self.is_identity() {
            return;
        }

        match geometry {
            Geometry::Point(p) => self.transform_coord(&mut p.0),
            Geometry::Line(l) => {
                self.transform_coord(&mut l.start);
                self.transform_coord(&mut l.end);
            }
            Geometry::LineString(ls) => self.transform_line_string(ls),
            Geometry::Polygon(poly) => {
                poly.exterior_mut(|ring| self.transform_line_string(ring));
                poly.interiors_mut(|rings| {
                    for ring in rings {
                        self.transform_line_string(ring);
                    }
                });
            }
            Geometry::MultiPoint(mp) => {
                for p in &mut mp.0 {
                    self.transform_coord(&mut p.0);
                }
            }
            Geometry::MultiLineString(mls) => {
                for ls in &mut mls.0 {
                    self.transform_line_string(ls);
                }
            }
            Geometry::MultiPolygon(mpoly) => {
                for poly in &mut mpoly.0 {
                    poly.exterior_mut(|ring| self.transform_line_string(ring));
                    poly.interiors_mut(|rings| {
                        for ring in rings {
                            self.transform_line_string(ring);
                        }
                    });
                }
            }
            Geometry::GeometryCollection(gc) => {
                for g in &mut gc.0 {
                    self.transform_geometry(g);
                }
            }
            Geometry::Rect(rect) => {
                let mut min = rect.min();
                let mut max = rect.max();
                self.transform_coord(&mut min);
                self.transform_coord(&mut max);
                *rect = geo_types::Rect::new(min, max);
            }
            Geometry::Triangle(tri) => {
                self.transform_coord(&mut tri.0);
                self.transform_coord(&mut tri.1);
                self.transform_coord(&mut tri.2);
            }
        }
    }

    fn transform_line_string(&self, ls: &mut LineString<f64>) {
        for coord in &mut ls.0 {
            self.transform_coord(coord);
        }
    }

    fn transform_coord(&self, coord: &mut Coord<f64>) {
        let (x, y) = self.transform(coord.x, coord.y);
        coord.x = x;
        coord.y = y;
    }
}

// Core projection (Snyder 1987, USGS Prof. Paper 1395, pp. 61-64)

/// Convert WGS84 (longitude, latitude) in degrees to UTM (easting, northing)
/// in metres for the given zone and hemisphere.
pub fn wgs84_to_utm(lon_deg: f64, lat_deg: f64, zone: u32, north: bool) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();

    let lon0 = central_meridian(zone);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a_coeff = cos_lat * (lon - lon0);

    let m = meridional_arc(lat);

    let a2 = a_coeff * a_coeff;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    // Snyder eq. 8-9
    let easting = K0
        * n
        * (a_coeff
            + (1.0 - t + c) * a2 * a_coeff / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a_coeff / 120.0)
        + FALSE_EASTING;

    // Snyder eq. 8-10
    let northing = K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    let northing = if north {
        northing
    } else {
        northing + FALSE_NORTHING_SOUTH
    };

    (easting, northing)
}

/// Convert UTM (easting, northing) in metres to WGS84 (longitude, latitude)
/// in degrees for the given zone and hemisphere.
///
/// Snyder 1987, eqs. 8-17 to 8-25 (footpoint latitude series).
pub fn utm_to_wgs84(easting: f64, northing: f64, zone: u32, north: bool) -> (f64, f64) {
    let x = easting - FALSE_EASTING;
    let y = if north {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };

    let lon0 = central_meridian(zone);

    let m = y / K0;
    let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * E2 * E2 / 64.0 - 5.0 * E2 * E2 * E2 / 256.0));

    let e1 = (1.0 - (1.0 - E2).sqrt()) / (1.0 + (1.0 - E2).sqrt());
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;

    // Footpoint latitude (Snyder eq. 3-26)
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let c1 = E_PRIME2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let n1 = A / (1.0 - E2 * sin_phi1 * sin_phi1).sqrt();
    let r1 = A * (1.0 - E2) / (1.0 - E2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = x / (n1 * K0);

    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d3 * d;
    let d5 = d4 * d;
    let d6 = d5 * d;

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * E_PRIME2
                    - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    let lon = lon0
        + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1)
                * d5
                / 120.0)
            / cos_phi1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Central meridian of a UTM zone, in radians
fn central_meridian(zone: u32) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

/// Meridional arc from equator to latitude `lat` (radians).
/// Snyder eq. 3-21.
fn meridional_arc(lat: f64) -> f64 {
    let e2 = E2;
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    A * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, point, polygon};

    fn assert_close(a: f64, b: f64, tol: f64, msg: &str) {
        let diff = (a - b).abs();
        assert!(
            diff < tol,
            "{msg}: expected {b}, got {a}, diff {diff} exceeds tolerance {tol}"
        );
    }

    #[test]
    fn parse_utm_codes() {
        assert_eq!(parse_utm_epsg(32632), Some((32, true)));
        assert_eq!(parse_utm_epsg(32601), Some((1, true)));
        assert_eq!(parse_utm_epsg(32721), Some((21, false)));
        assert_eq!(parse_utm_epsg(4326), None);
        assert_eq!(parse_utm_epsg(32600), None);
        assert_eq!(parse_utm_epsg(32761), None);
    }

    // Reference values from pyproj (PROJ 9.x):
    //   Transformer.from_crs(4326, 32630, always_xy=True)
    //   .transform(-3.7037, 40.4168) -> (440298.94, 4474257.31)
    #[test]
    fn madrid_wgs84_to_utm30n() {
        let (e, n) = wgs84_to_utm(-3.7037, 40.4168, 30, true);
        assert_close(e, 440_298.94, 1.0, "easting");
        assert_close(n, 4_474_257.31, 1.0, "northing");
    }

    // Buenos Aires: (-58.3816, -34.6037) -> UTM 21S (EPSG:32721)
    //   -> (373317.50, 6170036.17)
    #[test]
    fn buenos_aires_wgs84_to_utm21s() {
        let (e, n) = wgs84_to_utm(-58.3816, -34.6037, 21, false);
        assert_close(e, 373_317.50, 1.0, "easting");
        assert_close(n, 6_170_036.17, 1.0, "northing");
    }

    #[test]
    fn equator_central_meridian() {
        let (e, n) = wgs84_to_utm(-3.0, 0.0, 30, true);
        assert_close(e, 500_000.0, 0.01, "easting at CM");
        assert_close(n, 0.0, 0.01, "northing at equator");
    }

    #[test]
    fn utm_roundtrip_north() {
        let (lon0, lat0) = (7.4653, 51.5135);
        let (e, n) = wgs84_to_utm(lon0, lat0, 32, true);
        let (lon1, lat1) = utm_to_wgs84(e, n, 32, true);
        assert_close(lon1, lon0, 1e-7, "lon roundtrip");
        assert_close(lat1, lat0, 1e-7, "lat roundtrip");
    }

    #[test]
    fn utm_roundtrip_south() {
        let (lon0, lat0) = (-58.3816, -34.6037);
        let (e, n) = wgs84_to_utm(lon0, lat0, 21, false);
        let (lon1, lat1) = utm_to_wgs84(e, n, 21, false);
        assert_close(lon1, lon0, 1e-7, "lon roundtrip");
        assert_close(lat1, lat0, 1e-7, "lat roundtrip");
    }

    #[test]
    fn transformer_identity_is_noop() {
        let t = CrsTransformer::between(&CRS::from_epsg(32632), &CRS::from_epsg(32632)).unwrap();
        assert!(t.is_identity());
        assert_eq!(t.transform(123.0, 456.0), (123.0, 456.0));
    }

    #[test]
    fn transformer_rejects_unsupported_pair() {
        let err = CrsTransformer::between(&CRS::from_epsg(3857), &CRS::wgs84());
        assert!(err.is_err());
    }

    #[test]
    fn transformer_geometry_roundtrip() {
        let to_utm = CrsTransformer::between(&CRS::wgs84(), &CRS::from_epsg(32632)).unwrap();
        let back = CrsTransformer::between(&CRS::from_epsg(32632), &CRS::wgs84()).unwrap();

        let original = polygon![
            (x: 7.40, y: 51.50),
            (x: 7.45, y: 51.50),
            (x: 7.45, y: 51.55),
            (x: 7.40, y: 51.55),
            (x: 7.40, y: 51.50),
        ];

        let mut geometry = geo_types::Geometry::Polygon(original.clone());
        to_utm.transform_geometry(&mut geometry);
        back.transform_geometry(&mut geometry);

        let geo_types::Geometry::Polygon(result) = geometry else {
            panic!("variant must be preserved");
        };
        for (a, b) in original.exterior().0.iter().zip(result.exterior().0.iter()) {
            assert_close(b.x, a.x, 1e-7, "x roundtrip");
            assert_close(b.y, a.y, 1e-7, "y roundtrip");
        }
    }

    #[test]
    fn transformer_covers_point_and_line() {
        let t = CrsTransformer::between(&CRS::wgs84(), &CRS::from_epsg(32630)).unwrap();

        let mut p = geo_types::Geometry::Point(point!(x: -3.7037, y: 40.4168));
        t.transform_geometry(&mut p);
        let geo_types::Geometry::Point(p) = p else { unreachable!() };
        assert!(p.x() > 100_000.0, "easting should be in metres");

        let mut ls = geo_types::Geometry::LineString(line_string![
            (x: -3.71, y: 40.41),
            (x: -3.70, y: 40.42),
        ]);
        t.transform_geometry(&mut ls);
        let geo_types::Geometry::LineString(ls) = ls else { unreachable!() };
        assert!(ls.0[0].x > 100_000.0);
    }
}
