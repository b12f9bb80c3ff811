//! Initial particle conditions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// How the ensemble is populated at t = 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitialConditions {
    /// One entry per particle; the ensemble size is the list length.
    Explicit {
        /// Particle specifications.
        particles: Vec<ParticleSpec>,
    },
    /// Positions sampled uniformly in an axis-aligned box, shared composition.
    Uniform {
        /// Lower corner of the sampling box.
        domain_min: [f64; 3],
        /// Upper corner of the sampling box.
        domain_max: [f64; 3],
        /// Baseline scalar values assigned to every particle.
        #[serde(default)]
        composition: BTreeMap<String, f64>,
    },
}

impl Default for InitialConditions {
    fn default() -> Self {
        Self::Uniform {
            domain_min: [0.0; 3],
            domain_max: [1.0; 3],
            composition: BTreeMap::new(),
        }
    }
}

/// A single explicitly placed particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleSpec {
    pub position: [f64; 3],
    #[serde(default)]
    pub properties: BTreeMap<String, f64>,
}

impl InitialConditions {
    /// Scalar names mentioned by these conditions, sorted and deduplicated.
    pub fn scalar_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self {
            Self::Explicit { particles } => particles
                .iter()
                .flat_map(|p| p.properties.keys().cloned())
                .collect(),
            Self::Uniform { composition, .. } => composition.keys().cloned().collect(),
        };
        names.sort();
        names.dedup();
        names
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Explicit { particles } => {
                if particles.is_empty() {
                    return Err(ConfigError::EmptyExplicitConditions);
                }
                for spec in particles {
                    check_finite("position", spec.position.iter().copied())?;
                    for (name, &value) in &spec.properties {
                        check_finite(name, std::iter::once(value))?;
                    }
                }
            }
            Self::Uniform {
                domain_min,
                domain_max,
                composition,
            } => {
                for axis in 0..3 {
                    let (min, max) = (domain_min[axis], domain_max[axis]);
                    if !(min.is_finite() && max.is_finite() && min < max) {
                        return Err(ConfigError::InvalidDomain { axis, min, max });
                    }
                }
                for (name, &value) in composition {
                    check_finite(name, std::iter::once(value))?;
                }
            }
        }
        Ok(())
    }
}

fn check_finite(name: &str, values: impl Iterator<Item = f64>) -> Result<(), ConfigError> {
    for value in values {
        if !value.is_finite() {
            return Err(ConfigError::NonFiniteInitialValue {
                name: name.to_string(),
                value,
            });
        }
    }
    Ok(())
}
