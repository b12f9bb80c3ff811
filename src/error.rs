//! Crate-level error taxonomy.
//!
//! Every failure aborts the run: nothing here is retried or clamped.

use crate::compute::{FieldError, MixingError, ReactionError};
use crate::output::CollectorError;
use crate::schema::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// Missing or malformed run parameters.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Malformed field data, out-of-domain time or strict out-of-bounds query.
    #[error("Velocity field error: {0}")]
    Field(#[from] FieldError),

    /// Non-finite scalar state reaching or leaving the reaction integrator.
    #[error("Validation error: {0}")]
    Validation(ReactionError),

    /// The reaction integrator reported a failure of its own.
    #[error("Reaction integrator failure: {0}")]
    Reaction(ReactionError),

    /// The data collector failed.
    #[error("Data collector failure: {0}")]
    Collector(#[from] CollectorError),

    #[error("Micromixing error: {0}")]
    Mixing(#[from] MixingError),

    #[error("Simulation already completed at t={time} after {steps} steps")]
    Completed { time: f64, steps: u64 },

    #[error("Simulation was aborted by an earlier failure")]
    Aborted,
}

impl From<ReactionError> for SimulationError {
    fn from(err: ReactionError) -> Self {
        match err {
            ReactionError::NonFinite { .. } => Self::Validation(err),
            ReactionError::Integrator(_) => Self::Reaction(err),
        }
    }
}

impl SimulationError {
    /// Whether the run hit a time outside a time-indexed field's range.
    pub fn is_out_of_domain(&self) -> bool {
        matches!(self, Self::Field(FieldError::OutOfDomain { .. }))
    }
}

pub type SimulationResult<T> = Result<T, SimulationError>;
