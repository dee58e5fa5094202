//! Hydrological analysis from Digital Elevation Models
//!
//! - Fill depressions: Priority-Flood (Barnes 2014) pit removal
//! - Resolve flats: impose drainage gradients on equal-elevation regions
//! - Flow direction: D8 single flow direction
//! - Flow accumulation: upstream cell counts in topological order
//! - Stream tracing: drainage-network polylines from an accumulation threshold
//! - Upstream mask: catchment cells draining through a pour point
//!
//! ## D8 direction encoding
//!
//! ```text
//!   4  3  2
//!   5  0  1
//!   6  7  8
//! ```
//! `0` = pit/flat/nodata (no outflow), `1`-`8` = direction to the steepest
//! downslope neighbor.

mod flats;
mod flow_accumulation;
mod flow_direction;
mod priority_flood;
mod stream_trace;
mod watershed;

pub use flats::{resolve_flats, FlatParams, ResolveFlats};
pub use flow_accumulation::{flow_accumulation, FlowAccumulation, FlowAccumulationParams};
pub use flow_direction::{flow_direction, FlowDirection};
pub use priority_flood::{fill_depressions, fill_depth, FillDepressions, FillParams};
pub use stream_trace::{trace_stream_network, StreamTraceParams};
pub use watershed::upstream_mask;

/// D8 neighbor offsets `(row_offset, col_offset)` indexed to match the
/// direction encoding: index 0 ↔ code 1 (E), index 1 ↔ code 2 (NE), ...
///
/// This iteration order doubles as the tie-break priority wherever several
/// neighbors offer the same steepest drop: the first direction in this
/// array wins. Change the order here to change the tie-break everywhere.
pub const D8_OFFSETS: [(isize, isize); 8] = [
    (0, 1),   // 1: E
    (-1, 1),  // 2: NE
    (-1, 0),  // 3: N
    (-1, -1), // 4: NW
    (0, -1),  // 5: W
    (1, -1),  // 6: SW
    (1, 0),   // 7: S
    (1, 1),   // 8: SE
];

/// Distance factors for each D8 direction (diagonals are sqrt(2) longer)
pub const D8_DISTANCE_FACTORS: [f64; 8] = [
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
];

/// The direction code pointing back at the caller: a neighbor reached via
/// code `dir` flows into the center cell iff its own code is `opposite_dir(dir)`.
pub fn opposite_dir(dir: u8) -> u8 {
    if dir == 0 {
        return 0;
    }
    ((dir - 1 + 4) % 8) + 1
}

/// The downstream neighbor of (row, col) for a direction code, if any.
///
/// Returns `None` for code 0 and for neighbors outside the grid.
pub(crate) fn downstream_cell(
    row: usize,
    col: usize,
    dir: u8,
    rows: usize,
    cols: usize,
) -> Option<(usize, usize)> {
    if !(1..=8).contains(&dir) {
        return None;
    }
    let (dr, dc) = D8_OFFSETS[(dir - 1) as usize];
    let nr = row as isize + dr;
    let nc = col as isize + dc;
    if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
        return None;
    }
    Some((nr as usize, nc as usize))
}
