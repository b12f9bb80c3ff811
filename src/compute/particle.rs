//! Notional particles carrying a position and named scalar properties.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Vec3;

/// Ordered mapping from scalar name to value.
pub type ScalarState = BTreeMap<String, f64>;

/// A notional fluid particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Position in physical coordinates.
    pub position: Vec3,
    /// Scalar properties (temperature, pressure, mass fractions, ...).
    pub properties: ScalarState,
    /// Velocity sampled during the last transport step.
    pub velocity: Vec3,
}

impl Particle {
    /// Create a particle at rest.
    pub fn new(position: Vec3, properties: ScalarState) -> Self {
        Self {
            position,
            properties,
            velocity: [0.0; 3],
        }
    }

    /// Translate the particle.
    #[inline]
    pub fn displace(&mut self, displacement: Vec3) {
        for (p, d) in self.position.iter_mut().zip(displacement) {
            *p += d;
        }
    }

    /// Value of a scalar, if carried.
    #[inline]
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.properties.get(name).copied()
    }

    /// Overwrite carried scalars from `update`. Names the particle does not
    /// carry are ignored so the ensemble's shared name set is preserved.
    pub fn update_properties(&mut self, update: &ScalarState) {
        for (name, value) in self.properties.iter_mut() {
            if let Some(&new_value) = update.get(name) {
                *value = new_value;
            }
        }
    }

    /// Whether this particle carries exactly the given (sorted) names.
    pub(crate) fn has_names<'a>(&self, names: impl ExactSizeIterator<Item = &'a String>) -> bool {
        names.len() == self.properties.len()
            && names.zip(self.properties.keys()).all(|(a, b)| a == b)
    }
}
