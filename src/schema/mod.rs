//! Schema module - Run configuration and initial conditions.

mod config;
mod initial;

pub use config::*;
pub use initial::*;
