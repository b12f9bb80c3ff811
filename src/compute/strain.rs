//! Rate-of-strain estimation by central finite differences.
//!
//! The velocity gradient is taken on the continuous (interpolated) field
//! rather than on grid nodes, so it can be evaluated at particle positions.

use rayon::prelude::*;

use super::{FieldError, Vec3, VelocityField};

/// Default finite-difference perturbation.
pub const DEFAULT_STRAIN_EPSILON: f64 = 1e-5;

/// Real 3x3 matrix, row-major: `m[i][j]` is row i, column j.
pub type Matrix3 = [[f64; 3]; 3];

/// Symmetric part of a velocity gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrainTensor(pub Matrix3);

impl StrainTensor {
    /// Symmetric part `0.5 * (g + g^T)` of a gradient.
    pub fn from_gradient(gradient: &Matrix3) -> Self {
        let mut s = [[0.0; 3]; 3];
        for (i, row) in s.iter_mut().enumerate() {
            for (j, entry) in row.iter_mut().enumerate() {
                *entry = 0.5 * (gradient[i][j] + gradient[j][i]);
            }
        }
        Self(s)
    }

    /// Sum of squared entries.
    #[inline]
    pub fn norm_squared(&self) -> f64 {
        self.0.iter().flatten().map(|v| v * v).sum()
    }

    #[inline]
    pub fn trace(&self) -> f64 {
        self.0[0][0] + self.0[1][1] + self.0[2][2]
    }

    #[inline]
    pub fn zero() -> Self {
        Self([[0.0; 3]; 3])
    }
}

/// Estimates velocity gradients and strain tensors from a [`VelocityField`].
#[derive(Debug, Clone, Copy)]
pub struct RateOfStrainEstimator {
    epsilon: f64,
}

impl Default for RateOfStrainEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_STRAIN_EPSILON)
    }
}

impl RateOfStrainEstimator {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    #[inline]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Velocity gradient at `position` from six field samples.
    ///
    /// Column i holds `(v(p + eps e_i) - v(p - eps e_i)) / (2 eps)`, so
    /// `g[r][i] = d v_r / d x_i`.
    pub fn compute_velocity_gradient(
        &self,
        field: &VelocityField,
        position: Vec3,
    ) -> Result<Matrix3, FieldError> {
        let mut gradient = [[0.0; 3]; 3];
        for axis in 0..3 {
            let mut plus = position;
            let mut minus = position;
            plus[axis] += self.epsilon;
            minus[axis] -= self.epsilon;

            let v_plus = field.sample_velocity_at(plus)?;
            let v_minus = field.sample_velocity_at(minus)?;
            for row in 0..3 {
                gradient[row][axis] = (v_plus[row] - v_minus[row]) / (2.0 * self.epsilon);
            }
        }
        Ok(gradient)
    }

    /// Strain tensor `0.5 * (grad u + grad u^T)` at `position`.
    pub fn compute_rate_of_strain(
        &self,
        field: &VelocityField,
        position: Vec3,
    ) -> Result<StrainTensor, FieldError> {
        let gradient = self.compute_velocity_gradient(field, position)?;
        Ok(StrainTensor::from_gradient(&gradient))
    }

    /// Strain tensors for many positions, evaluated in parallel.
    ///
    /// Output order matches `positions`; the first failing query aborts the batch.
    pub fn compute_rate_of_strain_batch(
        &self,
        field: &VelocityField,
        positions: &[Vec3],
    ) -> Result<Vec<StrainTensor>, FieldError> {
        positions
            .par_iter()
            .map(|&p| self.compute_rate_of_strain(field, p))
            .collect()
    }
}
