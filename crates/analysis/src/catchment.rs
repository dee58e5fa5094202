//! Catchment mask utilities: AOI rasterization and mask polygonization
//!
//! The upstream mask itself comes from the flow-routing crate; this module
//! turns an AOI polygon into a cell mask (scanline fill over cell centers,
//! fail-open) and turns the final boolean mask into polygon rings (boundary
//! edge chaining), from which only the ring with the largest absolute
//! signed area is kept.

use geo_types::{Coord, LineString};
use hydrorisk_core::raster::{GeoTransform, Raster};
use ndarray::Array2;
use std::collections::HashMap;

/// Rasterize a polygon ring (map coordinates, closed or open) onto a grid:
/// a cell belongs to the mask when its center lies inside the ring
/// (even-odd rule). Returns `None` for degenerate input.
pub fn rasterize_polygon(
    ring: &[(f64, f64)],
    shape: (usize, usize),
    transform: &GeoTransform,
) -> Option<Array2<bool>> {
    if ring.len() < 3 {
        return None;
    }
    if ring.iter().any(|&(x, y)| !x.is_finite() || !y.is_finite()) {
        return None;
    }

    let (rows, cols) = shape;
    let mut mask = Array2::from_elem((rows, cols), false);

    let n = ring.len();
    let mut crossings: Vec<f64> = Vec::new();

    for row in 0..rows {
        let (_, y) = transform.pixel_to_geo(0, row);

        crossings.clear();
        for i in 0..n {
            let (x1, y1) = ring[i];
            let (x2, y2) = ring[(i + 1) % n];
            if (y1 > y) != (y2 > y) {
                let dy = y2 - y1;
                let t = (y - y1) / if dy != 0.0 { dy } else { 1e-12 };
                crossings.push(x1 + t * (x2 - x1));
            }
        }
        if crossings.is_empty() {
            continue;
        }
        crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        for pair in crossings.chunks_exact(2) {
            let (col_a, _) = transform.geo_to_pixel(pair[0], y);
            let (col_b, _) = transform.geo_to_pixel(pair[1], y);
            let (col_a, col_b) = if col_a <= col_b {
                (col_a, col_b)
            } else {
                (col_b, col_a)
            };

            // Cell centers sit at col + 0.5 in pixel coordinates
            let start = (col_a - 0.5).ceil().max(0.0) as usize;
            let end = (col_b - 0.5).floor().min(cols as f64 - 1.0);
            if end < 0.0 {
                continue;
            }
            for col in start..=end as usize {
                mask[(row, col)] = true;
            }
        }
    }

    Some(mask)
}

/// Polygonize a cell mask into closed rings in map coordinates.
///
/// Every boundary side of a mask cell becomes a directed edge between
/// pixel corners; chaining the edges start-to-end yields closed rings
/// (outer boundaries and hole boundaries alike). Ring vertices are pixel
/// corners, so the shoelace area of an outer ring matches the masked cell
/// area exactly for hole-free masks.
pub fn polygonize_mask(mask: &Raster<u8>) -> Vec<LineString<f64>> {
    let (rows, cols) = mask.shape();

    // Directed boundary edges, keyed by start corner (col, row) index.
    // Orientation keeps the mask interior on the left in grid space.
    let mut edges: HashMap<(u32, u32), Vec<(u32, u32)>> = HashMap::new();
    let mut push = |from: (u32, u32), to: (u32, u32)| {
        edges.entry(from).or_default().push(to);
    };

    for row in 0..rows {
        for col in 0..cols {
            if unsafe { mask.get_unchecked(row, col) } == 0 {
                continue;
            }
            let r = row as u32;
            let c = col as u32;

            let outside = |rr: isize, cc: isize| {
                rr < 0
                    || cc < 0
                    || rr as usize >= rows
                    || cc as usize >= cols
                    || unsafe { mask.get_unchecked(rr as usize, cc as usize) } == 0
            };

            if outside(row as isize - 1, col as isize) {
                push((c, r), (c + 1, r)); // north side
            }
            if outside(row as isize, col as isize + 1) {
                push((c + 1, r), (c + 1, r + 1)); // east side
            }
            if outside(row as isize + 1, col as isize) {
                push((c + 1, r + 1), (c, r + 1)); // south side
            }
            if outside(row as isize, col as isize - 1) {
                push((c, r + 1), (c, r)); // west side
            }
        }
    }

    let transform = mask.transform();
    let corner = |&(c, r): &(u32, u32)| -> Coord<f64> {
        let (x, y) = transform.pixel_to_geo_corner(c as usize, r as usize);
        Coord { x, y }
    };

    let mut rings = Vec::new();
    let starts: Vec<(u32, u32)> = edges.keys().copied().collect();

    for start in starts {
        loop {
            let Some(first) = edges.get_mut(&start).and_then(|v| v.pop()) else {
                break;
            };

            let mut ring_corners = vec![start, first];
            let mut current = first;
            while current != start {
                let Some(next) = edges.get_mut(&current).and_then(|v| v.pop()) else {
                    break; // malformed chain; drop this ring
                };
                ring_corners.push(next);
                current = next;
            }

            if current == start && ring_corners.len() >= 4 {
                let coords: Vec<Coord<f64>> = ring_corners.iter().map(corner).collect();
                rings.push(LineString::from(coords));
            }
        }
    }

    rings
}

/// Shoelace signed area of a closed ring in map units
pub fn ring_signed_area(ring: &LineString<f64>) -> f64 {
    let pts = &ring.0;
    if pts.len() < 4 {
        return 0.0;
    }
    let mut sum = 0.0;
    for pair in pts.windows(2) {
        sum += pair[0].x * pair[1].y - pair[1].x * pair[0].y;
    }
    sum / 2.0
}

/// The ring with the largest absolute signed area, if any
pub fn largest_ring(rings: Vec<LineString<f64>>) -> Option<LineString<f64>> {
    rings
        .into_iter()
        .max_by(|a, b| {
            ring_signed_area(a)
                .abs()
                .partial_cmp(&ring_signed_area(b).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrorisk_core::Raster;

    fn grid_transform(rows: usize) -> GeoTransform {
        GeoTransform::new(0.0, rows as f64, 1.0, -1.0)
    }

    #[test]
    fn test_rasterize_square() {
        // Square covering cell centers of cols 1..=3, rows 1..=3
        let transform = grid_transform(6);
        let ring = [(1.0, 5.0), (4.0, 5.0), (4.0, 2.0), (1.0, 2.0)];
        let mask = rasterize_polygon(&ring, (6, 6), &transform).unwrap();

        let count = mask.iter().filter(|&&m| m).count();
        assert_eq!(count, 9, "3x3 block of centers inside");
        assert!(mask[(1, 1)] && mask[(3, 3)]);
        assert!(!mask[(0, 0)] && !mask[(4, 4)]);
    }

    #[test]
    fn test_rasterize_degenerate_fails_open() {
        let transform = grid_transform(4);
        assert!(rasterize_polygon(&[(0.0, 0.0), (1.0, 1.0)], (4, 4), &transform).is_none());
        assert!(rasterize_polygon(
            &[(0.0, 0.0), (1.0, f64::NAN), (1.0, 0.0)],
            (4, 4),
            &transform
        )
        .is_none());
    }

    #[test]
    fn test_polygonize_rectangle_area_matches_cells() {
        let mut mask: Raster<u8> = Raster::new(6, 6);
        mask.set_transform(grid_transform(6));
        for row in 1..4 {
            for col in 2..5 {
                mask.set(row, col, 1).unwrap();
            }
        }

        let rings = polygonize_mask(&mask);
        assert_eq!(rings.len(), 1);
        let area = ring_signed_area(&rings[0]).abs();
        assert!((area - 9.0).abs() < 1e-9, "3x3 cells of unit area, got {area}");
    }

    #[test]
    fn test_polygonize_keeps_largest_of_two_components() {
        let mut mask: Raster<u8> = Raster::new(8, 8);
        mask.set_transform(grid_transform(8));
        // 2x2 block and a separate single cell
        for row in 1..3 {
            for col in 1..3 {
                mask.set(row, col, 1).unwrap();
            }
        }
        mask.set(6, 6, 1).unwrap();

        let rings = polygonize_mask(&mask);
        assert_eq!(rings.len(), 2);

        let largest = largest_ring(rings).unwrap();
        let area = ring_signed_area(&largest).abs();
        assert!((area - 4.0).abs() < 1e-9, "largest component wins, got {area}");
    }

    #[test]
    fn test_polygonize_ring_is_closed() {
        let mut mask: Raster<u8> = Raster::new(4, 4);
        mask.set_transform(grid_transform(4));
        mask.set(1, 1, 1).unwrap();
        mask.set(1, 2, 1).unwrap();

        let rings = polygonize_mask(&mask);
        assert_eq!(rings.len(), 1);
        let ring = &rings[0];
        assert_eq!(ring.0.first(), ring.0.last());
    }
}
