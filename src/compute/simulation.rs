//! Simulation loop - main driver for particle transport and mixing.
//!
//! Orchestrates all stages for each time step:
//! refresh field, transport, strain, mix, react, collect, advance.

use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::{SimulationError, SimulationResult};
use crate::output::DataCollector;
use crate::schema::{ConfigError, PairingPolicy, RunConfig};

use super::{
    MixingClosure, ParticleEnsemble, RateOfStrainEstimator, ReactionIntegrator, ScalarMeans,
    VelocityField, ensure_finite,
};

/// Lifecycle of a [`SimulationLoop`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Constructed, no step taken.
    Idle,
    /// At least one step taken, time remaining.
    Stepping,
    /// All `total_steps` steps taken; further steps are rejected.
    ///
    /// The step count absorbs a relative slack of 1e-9 in `total_time / dt`,
    /// so a `total_time` a hair above `k * dt` completes at `k * dt`.
    Completed,
    /// A step failed; further steps are rejected.
    Aborted,
}

/// Outcome of a full run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub steps: u64,
    pub final_time: f64,
    pub final_means: ScalarMeans,
    pub elapsed: Duration,
}

/// Drives one ensemble through one run. Not restartable.
pub struct SimulationLoop {
    field: VelocityField,
    ensemble: ParticleEnsemble,
    estimator: RateOfStrainEstimator,
    closure: MixingClosure,
    pairing: PairingPolicy,
    rng: StdRng,
    dt: f64,
    total_time: f64,
    total_steps: u64,
    time: f64,
    step: u64,
    state: LoopState,
}

impl SimulationLoop {
    /// Create a loop from configuration, sampling the ensemble from
    /// `config.initial_conditions`.
    pub fn new(config: &RunConfig, field: VelocityField) -> SimulationResult<Self> {
        config.validate()?;
        let mut rng = seeded_rng(config.random_seed);
        let ensemble = ParticleEnsemble::initialize(
            &config.initial_conditions,
            config.num_particles,
            &config.scalar_names,
            config.diffusivity,
            &mut rng,
        )?;
        Self::assemble(config, field, ensemble, rng)
    }

    /// Create a loop around an existing ensemble.
    ///
    /// The ensemble's diffusivity must equal `config.diffusivity`, since one
    /// value drives both the random walk and the adaptive closure.
    pub fn with_ensemble(
        config: &RunConfig,
        field: VelocityField,
        ensemble: ParticleEnsemble,
    ) -> SimulationResult<Self> {
        config.validate()?;
        let rng = seeded_rng(config.random_seed);
        Self::assemble(config, field, ensemble, rng)
    }

    fn assemble(
        config: &RunConfig,
        field: VelocityField,
        ensemble: ParticleEnsemble,
        rng: StdRng,
    ) -> SimulationResult<Self> {
        if field.is_time_dependent() != config.flow_field_time_dependent {
            return Err(ConfigError::TimeDependenceMismatch {
                expected: config.flow_field_time_dependent,
            }
            .into());
        }
        if ensemble.diffusivity() != config.diffusivity {
            return Err(ConfigError::DiffusivityMismatch {
                config: config.diffusivity,
                ensemble: ensemble.diffusivity(),
            }
            .into());
        }

        let closure = MixingClosure::from_config(config);
        if closure.is_pairwise() && ensemble.count() % 2 == 1 {
            log::warn!(
                "{} particles under a pairwise closure: one particle is left unpaired each step",
                ensemble.count()
            );
        }

        Ok(Self {
            field: field.with_boundary_policy(config.boundary_policy),
            ensemble,
            estimator: RateOfStrainEstimator::new(config.strain_epsilon),
            closure,
            pairing: config.pairing_policy,
            rng,
            dt: config.time_step,
            total_time: config.total_time,
            total_steps: config.step_count(),
            time: 0.0,
            step: 0,
            state: LoopState::Idle,
        })
    }

    #[inline]
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Current simulated time.
    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    #[inline]
    pub fn steps_taken(&self) -> u64 {
        self.step
    }

    /// Steps a full run takes.
    #[inline]
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    #[inline]
    pub fn ensemble(&self) -> &ParticleEnsemble {
        &self.ensemble
    }

    #[inline]
    pub fn field(&self) -> &VelocityField {
        &self.field
    }

    #[inline]
    pub fn closure(&self) -> MixingClosure {
        self.closure
    }

    /// Perform one simulation step.
    ///
    /// Any failure moves the loop to [`LoopState::Aborted`]. The step that
    /// reaches `total_time` finishes the collector and moves the loop to
    /// [`LoopState::Completed`].
    pub fn step<R, C>(&mut self, reactor: &mut R, collector: &mut C) -> SimulationResult<LoopState>
    where
        R: ReactionIntegrator + ?Sized,
        C: DataCollector + ?Sized,
    {
        match self.state {
            LoopState::Completed => {
                return Err(SimulationError::Completed {
                    time: self.time,
                    steps: self.step,
                });
            }
            LoopState::Aborted => return Err(SimulationError::Aborted),
            LoopState::Idle => self.state = LoopState::Stepping,
            LoopState::Stepping => {}
        }

        if let Err(err) = self.advance(reactor, collector) {
            log::error!("Step {} at t={} failed: {err}", self.step, self.time);
            self.state = LoopState::Aborted;
            return Err(err);
        }

        if self.step >= self.total_steps {
            self.state = LoopState::Completed;
            if let Err(err) = collector.finish() {
                self.state = LoopState::Aborted;
                return Err(err.into());
            }
        }
        Ok(self.state)
    }

    fn advance<R, C>(&mut self, reactor: &mut R, collector: &mut C) -> SimulationResult<()>
    where
        R: ReactionIntegrator + ?Sized,
        C: DataCollector + ?Sized,
    {
        let dt = self.dt;

        // 1. Field refresh happens before any particle query this step
        self.field.refresh(self.time)?;

        // 2. Transport
        self.ensemble.transport(dt, &self.field, &mut self.rng)?;

        // 3. Mixing against a pre-mixing mean snapshot
        let means = self.ensemble.mean_scalar_values();
        let strains = if self.closure.needs_strain() {
            let positions = self.ensemble.positions();
            Some(
                self.estimator
                    .compute_rate_of_strain_batch(&self.field, &positions)?,
            )
        } else {
            None
        };
        self.closure.mix_ensemble(
            &mut self.ensemble,
            strains.as_deref(),
            &means,
            dt,
            self.pairing,
            &mut self.rng,
        )?;

        // 4. Chemistry
        for (i, particle) in self.ensemble.particles_mut().iter_mut().enumerate() {
            ensure_finite(i, &particle.properties)?;
            let updated = reactor.integrate(i, &particle.properties, dt)?;
            ensure_finite(i, &updated)?;
            particle.update_properties(&updated);
        }

        // 5. Data collection
        collector.collect(self.time, self.ensemble.particles())?;

        // 6. Advance time (from the step count, so no drift accumulates)
        self.step += 1;
        self.time = self.step as f64 * dt;

        log::debug!(
            "Step {}/{} done, t={:.6}",
            self.step,
            self.total_steps,
            self.time
        );
        Ok(())
    }

    /// Run until `total_time`.
    pub fn run<R, C>(&mut self, reactor: &mut R, collector: &mut C) -> SimulationResult<RunSummary>
    where
        R: ReactionIntegrator + ?Sized,
        C: DataCollector + ?Sized,
    {
        log::info!(
            "Starting simulation: {} particles, {} closure, dt={}, total_time={} ({} steps)",
            self.ensemble.count(),
            self.closure.name(),
            self.dt,
            self.total_time,
            self.total_steps
        );
        let start = Instant::now();

        while self.step(reactor, collector)? != LoopState::Completed {}

        let elapsed = start.elapsed();
        log::info!(
            "Simulation completed in {:.2}s ({} steps)",
            elapsed.as_secs_f64(),
            self.step
        );

        Ok(RunSummary {
            steps: self.step,
            final_time: self.time,
            final_means: self.ensemble.mean_scalar_values(),
            elapsed,
        })
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
