//! Reaction integrator seam.
//!
//! Chemistry is integrated outside this crate. The simulation loop hands each
//! particle's scalar state to a [`ReactionIntegrator`] after mixing and writes
//! the returned state back.

use super::ScalarState;

/// Reaction integration errors.
#[derive(Debug, thiserror::Error)]
pub enum ReactionError {
    #[error("Particle {particle}: scalar '{scalar}' is not finite ({value})")]
    NonFinite {
        particle: usize,
        scalar: String,
        value: f64,
    },
    #[error("Reaction integrator failed: {0}")]
    Integrator(String),
}

/// Advances a particle's chemical state over one time step.
pub trait ReactionIntegrator {
    /// Return the state after integrating `dt`. Implementations must reject
    /// non-finite inputs rather than propagate them.
    fn integrate(
        &mut self,
        particle: usize,
        state: &ScalarState,
        dt: f64,
    ) -> Result<ScalarState, ReactionError>;
}

/// Check every scalar is finite.
pub fn ensure_finite(particle: usize, state: &ScalarState) -> Result<(), ReactionError> {
    match state.iter().find(|(_, v)| !v.is_finite()) {
        Some((scalar, &value)) => Err(ReactionError::NonFinite {
            particle,
            scalar: scalar.clone(),
            value,
        }),
        None => Ok(()),
    }
}

/// Integrator for non-reacting runs: validates and returns the state unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct InertChemistry;

impl ReactionIntegrator for InertChemistry {
    fn integrate(
        &mut self,
        particle: usize,
        state: &ScalarState,
        _dt: f64,
    ) -> Result<ScalarState, ReactionError> {
        ensure_finite(particle, state)?;
        Ok(state.clone())
    }
}

impl<F> ReactionIntegrator for F
where
    F: FnMut(usize, &ScalarState, f64) -> Result<ScalarState, ReactionError>,
{
    fn integrate(
        &mut self,
        particle: usize,
        state: &ScalarState,
        dt: f64,
    ) -> Result<ScalarState, ReactionError> {
        ensure_finite(particle, state)?;
        self(particle, state, dt)
    }
}
