//! Flow accumulation
//!
//! Counts, for every cell, the weighted number of cells draining through
//! it (including the cell itself), by processing cells in drainage order:
//! an in-degree queue realizes the topological ordering in O(N) without
//! any recursive upstream walk.
//!
//! A direction grid that implies a cycle can never be drained completely;
//! that is an engine defect and reported as a fatal error rather than
//! looping.

use super::downstream_cell;
use hydrorisk_core::raster::Raster;
use hydrorisk_core::{Algorithm, Error, Result};
use ndarray::Array2;

/// Parameters for flow accumulation
#[derive(Debug, Clone)]
pub struct FlowAccumulationParams {
    /// Weight contributed by each cell (upstream area per cell).
    /// 1.0 yields plain upstream cell counts.
    pub cell_weight: f64,
}

impl Default for FlowAccumulationParams {
    fn default() -> Self {
        Self { cell_weight: 1.0 }
    }
}

/// Flow accumulation algorithm
#[derive(Debug, Clone, Default)]
pub struct FlowAccumulation;

impl Algorithm for FlowAccumulation {
    type Input = Raster<u8>;
    type Output = Raster<f64>;
    type Params = FlowAccumulationParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Accumulation"
    }

    fn description(&self) -> &'static str {
        "Calculate upstream contributing cells from D8 flow direction"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        flow_accumulation(&input, params)
    }
}

/// Calculate flow accumulation from a D8 flow direction raster.
///
/// Every cell starts at its own weight; headwater cells therefore carry
/// `cell_weight`, and accumulation is monotonically non-decreasing along
/// any downstream path.
///
/// # Errors
/// `Error::FlowCycle` if the direction grid contains a cycle.
pub fn flow_accumulation(
    flow_dir: &Raster<u8>,
    params: FlowAccumulationParams,
) -> Result<Raster<f64>> {
    let (rows, cols) = flow_dir.shape();

    // In-degree: how many cells flow INTO each cell
    let mut in_degree = Array2::<u32>::zeros((rows, cols));
    for row in 0..rows {
        for col in 0..cols {
            let dir = unsafe { flow_dir.get_unchecked(row, col) };
            if let Some((nr, nc)) = downstream_cell(row, col, dir, rows, cols) {
                in_degree[(nr, nc)] += 1;
            }
        }
    }

    // Seed with cells nothing flows into
    let mut accumulation = Array2::<f64>::from_elem((rows, cols), params.cell_weight);
    let mut queue: Vec<(usize, usize)> = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if in_degree[(row, col)] == 0 {
                queue.push((row, col));
            }
        }
    }

    // Drain in topological order
    let mut processed: usize = 0;
    while let Some((row, col)) = queue.pop() {
        processed += 1;

        let dir = unsafe { flow_dir.get_unchecked(row, col) };
        let Some((nr, nc)) = downstream_cell(row, col, dir, rows, cols) else {
            continue; // pit or flows off-grid
        };

        accumulation[(nr, nc)] += accumulation[(row, col)];

        in_degree[(nr, nc)] -= 1;
        if in_degree[(nr, nc)] == 0 {
            queue.push((nr, nc));
        }
    }

    let total = rows * cols;
    if processed != total {
        return Err(Error::FlowCycle {
            unresolved: total - processed,
        });
    }

    let mut output = flow_dir.with_same_meta::<f64>(rows, cols);
    *output.data_mut() = accumulation;

    Ok(output)
}

/// Walk downstream from (row, col), yielding each visited cell.
/// Used by tests to verify accumulation monotonicity along flow paths.
#[cfg(test)]
pub(crate) fn downstream_path(
    flow_dir: &Raster<u8>,
    mut row: usize,
    mut col: usize,
) -> Vec<(usize, usize)> {
    let (rows, cols) = flow_dir.shape();
    let mut path = vec![(row, col)];
    loop {
        let dir = unsafe { flow_dir.get_unchecked(row, col) };
        match downstream_cell(row, col, dir, rows, cols) {
            Some(next) => {
                row = next.0;
                col = next.1;
                path.push(next);
                if path.len() > rows * cols {
                    panic!("downstream walk exceeded grid size: cycle");
                }
            }
            None => return path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::flow_direction::flow_direction;
    use hydrorisk_core::GeoTransform;

    fn east_strip() -> Raster<f64> {
        let mut dem = Raster::new(1, 5);
        dem.set_transform(GeoTransform::new(0.0, 1.0, 1.0, -1.0));
        for col in 0..5 {
            dem.set(0, col, (5 - col) as f64).unwrap();
        }
        dem
    }

    #[test]
    fn test_accumulation_linear_strip() {
        // 1x5 strip sloping east: acc = 1, 2, 3, 4, 5
        let fdir = flow_direction(&east_strip()).unwrap();
        let acc = flow_accumulation(&fdir, FlowAccumulationParams::default()).unwrap();

        for col in 0..5 {
            assert_eq!(acc.get(0, col).unwrap(), (col + 1) as f64);
        }
    }

    #[test]
    fn test_accumulation_convergent() {
        // 3x3 with a low center: center collects all 8 neighbors + itself
        let mut dem = Raster::filled(3, 3, 5.0);
        dem.set_transform(GeoTransform::new(0.0, 3.0, 1.0, -1.0));
        dem.set(1, 1, 1.0).unwrap();

        let fdir = flow_direction(&dem).unwrap();
        let acc = flow_accumulation(&fdir, FlowAccumulationParams::default()).unwrap();

        assert_eq!(acc.get(1, 1).unwrap(), 9.0);
    }

    #[test]
    fn test_accumulation_monotone_downstream() {
        let mut dem = Raster::new(8, 8);
        dem.set_transform(GeoTransform::new(0.0, 8.0, 1.0, -1.0));
        for row in 0..8 {
            for col in 0..8 {
                // Slope to the SE with some relief
                let z = (16 - row - col) as f64 + ((row * col) % 3) as f64 * 0.1;
                dem.set(row, col, z).unwrap();
            }
        }

        let fdir = flow_direction(&dem).unwrap();
        let acc = flow_accumulation(&fdir, FlowAccumulationParams::default()).unwrap();

        for start in [(0usize, 0usize), (2, 5), (5, 2)] {
            let path = downstream_path(&fdir, start.0, start.1);
            let mut prev = f64::NEG_INFINITY;
            for (r, c) in path {
                let value = acc.get(r, c).unwrap();
                assert!(
                    value >= prev,
                    "accumulation decreased along flow path at ({r}, {c})"
                );
                prev = value;
            }
        }
    }

    #[test]
    fn test_cell_weight() {
        let fdir = flow_direction(&east_strip()).unwrap();
        let acc = flow_accumulation(&fdir, FlowAccumulationParams { cell_weight: 2.5 }).unwrap();
        assert_eq!(acc.get(0, 4).unwrap(), 12.5);
    }

    #[test]
    fn test_cycle_is_fatal() {
        // Hand-built two-cell cycle: (0,0) -> E, (0,1) -> W
        let mut fdir: Raster<u8> = Raster::new(1, 2);
        fdir.set(0, 0, 1).unwrap();
        fdir.set(0, 1, 5).unwrap();

        let err = flow_accumulation(&fdir, FlowAccumulationParams::default()).unwrap_err();
        assert!(
            matches!(err, Error::FlowCycle { unresolved: 2 }),
            "expected FlowCycle, got {err:?}"
        );
    }
}
