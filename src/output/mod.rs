//! Data collection for particle simulations.
//!
//! The simulation loop hands `(time, particles)` to a [`DataCollector`] after
//! every step. Two collectors ship with the crate:
//!
//! - [`SnapshotWriter`]: persists runs to an output directory.
//! - [`MemoryCollector`]: keeps snapshots in memory (tests, embedding).
//!
//! # Output layout
//!
//! ```text
//! <output_directory>/
//!   snapshots.jsonl       one JSON object per step: {"time": t, "particles": [..]}
//!   data_<time>.dat       every export_interval: header "x y z <scalars..>",
//!                         then one whitespace-separated row per particle
//!   scalar_variance.dat   header "time variance", one row per step
//! ```

mod memory;
mod writer;

use std::io;

use crate::compute::Particle;

pub use memory::{MemoryCollector, Snapshot};
pub use writer::{SnapshotWriter, WriterStats};

/// Data collector errors.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Output I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Receives the ensemble state after every step.
pub trait DataCollector {
    /// Record the state at simulated time `time`.
    fn collect(&mut self, time: f64, particles: &[Particle]) -> Result<(), CollectorError>;

    /// Flush buffered output once the run has finished.
    fn finish(&mut self) -> Result<(), CollectorError> {
        Ok(())
    }
}
