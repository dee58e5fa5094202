//! Geometry serialization at the GeoJSON boundary
//!
//! Internally every algorithm works on typed `geo_types` geometry; the
//! dynamic GeoJSON shape only exists at the serialization boundary. The
//! match below is exhaustive so a new geometry variant cannot silently
//! produce an empty document.

use geo_types::{Coord, Geometry, LineString, Polygon};
use serde_json::{json, Value};

fn position(c: &Coord<f64>) -> Value {
    json!([c.x, c.y])
}

fn line_coords(ls: &LineString<f64>) -> Value {
    Value::Array(ls.0.iter().map(position).collect())
}

fn polygon_coords(poly: &Polygon<f64>) -> Value {
    let mut rings = vec![line_coords(poly.exterior())];
    rings.extend(poly.interiors().iter().map(line_coords));
    Value::Array(rings)
}

/// Serialize a geometry as a GeoJSON `geometry` object.
pub fn geometry_to_geojson(geometry: &Geometry<f64>) -> Value {
    match geometry {
        Geometry::Point(p) => json!({
            "type": "Point",
            "coordinates": position(&p.0),
        }),
        Geometry::MultiPoint(mp) => json!({
            "type": "MultiPoint",
            "coordinates": Value::Array(mp.0.iter().map(|p| position(&p.0)).collect()),
        }),
        Geometry::Line(l) => json!({
            "type": "LineString",
            "coordinates": [position(&l.start), position(&l.end)],
        }),
        Geometry::LineString(ls) => json!({
            "type": "LineString",
            "coordinates": line_coords(ls),
        }),
        Geometry::MultiLineString(mls) => json!({
            "type": "MultiLineString",
            "coordinates": Value::Array(mls.0.iter().map(line_coords).collect()),
        }),
        Geometry::Polygon(poly) => json!({
            "type": "Polygon",
            "coordinates": polygon_coords(poly),
        }),
        Geometry::MultiPolygon(mpoly) => json!({
            "type": "MultiPolygon",
            "coordinates": Value::Array(mpoly.0.iter().map(polygon_coords).collect()),
        }),
        Geometry::GeometryCollection(gc) => json!({
            "type": "GeometryCollection",
            "geometries": Value::Array(gc.0.iter().map(geometry_to_geojson).collect()),
        }),
        Geometry::Rect(rect) => {
            json!({
                "type": "Polygon",
                "coordinates": polygon_coords(&rect.to_polygon()),
            })
        }
        Geometry::Triangle(tri) => {
            json!({
                "type": "Polygon",
                "coordinates": polygon_coords(&tri.to_polygon()),
            })
        }
    }
}
