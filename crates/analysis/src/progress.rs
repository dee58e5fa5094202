//! Progress reporting
//!
//! The pipeline reports progress through an observer owned by the caller;
//! the core never assumes a particular transport. The network analysis
//! calls `on_step` at its seven fixed checkpoints in strictly increasing
//! order, never re-entrant. Catchment delineation emits free-text
//! `on_phase` messages instead, since its stage count differs.

/// Observer for pipeline progress events
pub trait ProgressObserver {
    /// A numbered checkpoint of the 7-stage network analysis
    fn on_step(&mut self, _step: u32, _total: u32, _message: &str) {}

    /// A free-text phase message (catchment delineation)
    fn on_phase(&mut self, _message: &str) {}
}

/// Observer that discards all events
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressObserver for NullProgress {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_progress_accepts_events() {
        let mut p = NullProgress;
        p.on_step(1, 7, "start");
        p.on_phase("loading");
    }
}
