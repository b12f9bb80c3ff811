//! Compute module - Particle transport, strain estimation and micromixing.

mod ensemble;
mod field;
mod mixing;
mod particle;
mod reaction;
mod simulation;
mod strain;

pub use ensemble::*;
pub use field::*;
pub use mixing::*;
pub use particle::*;
pub use reaction::*;
pub use simulation::*;
pub use strain::*;
