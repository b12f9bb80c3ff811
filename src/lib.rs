//! Lagrangian PDF - Stochastic particle transport with micromixing closures.
//!
//! This crate advances an ensemble of notional fluid particles through a
//! prescribed velocity field. Each step advects and diffuses the particles,
//! relaxes their scalar composition with a micromixing closure, and hands the
//! state to an external chemistry integrator and data collector.
//!
//! # Architecture
//!
//! - `schema`: Run configuration and initial conditions
//! - `compute`: Velocity field, strain estimation, ensemble, closures, loop
//! - `output`: Data collectors (snapshot writer, in-memory)
//! - `error`: Run-level error taxonomy
//!
//! # Example
//!
//! ```rust,no_run
//! use lagrangian_pdf::{
//!     compute::{Grid, InertChemistry, SimulationLoop, VelocityField},
//!     output::MemoryCollector,
//!     schema::{InitialConditions, RunConfig},
//! };
//!
//! let config = RunConfig {
//!     initial_conditions: InitialConditions::Uniform {
//!         domain_min: [0.25; 3],
//!         domain_max: [0.75; 3],
//!         composition: [("temperature".to_string(), 300.0)].into(),
//!     },
//!     ..RunConfig::default()
//! };
//! let grid = Grid::uniform([0.0; 3], [1.0; 3], [11; 3])?;
//! let field = VelocityField::from_fn(grid, |[_, y, _]| [y, 0.0, 0.0]);
//!
//! let mut simulation = SimulationLoop::new(&config, field)?;
//! let mut collector = MemoryCollector::new();
//! let summary = simulation.run(&mut InertChemistry, &mut collector)?;
//!
//! println!("Mean temperature: {}", summary.final_means["temperature"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod compute;
pub mod error;
pub mod output;
pub mod schema;

// Re-export commonly used types
pub use compute::{MixingClosure, ParticleEnsemble, SimulationLoop, VelocityField};
pub use error::{SimulationError, SimulationResult};
pub use schema::RunConfig;
