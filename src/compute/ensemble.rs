//! Particle ensemble: initialization, stochastic transport and statistics.

use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::schema::{ConfigError, InitialConditions};

use super::{FieldError, Particle, ScalarState, Vec3, VelocityField};

/// Per-scalar ensemble means, computed from one consistent ensemble state.
pub type ScalarMeans = ScalarState;

/// Fixed-size set of particles sharing one scalar-name set.
#[derive(Debug, Clone)]
pub struct ParticleEnsemble {
    particles: Vec<Particle>,
    /// Sorted scalar names carried by every particle.
    scalar_names: Vec<String>,
    diffusivity: f64,
}

impl ParticleEnsemble {
    /// Build the ensemble from initial conditions.
    ///
    /// Explicit conditions define one particle each and ignore
    /// `particle_count`. Uniform conditions sample `particle_count` positions
    /// in the configured box. Every particle carries the union of all names
    /// mentioned by the conditions and `extra_names`; absent values are zero.
    pub fn initialize<R: Rng>(
        initial: &InitialConditions,
        particle_count: usize,
        extra_names: &[String],
        diffusivity: f64,
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        check_diffusivity(diffusivity)?;
        initial.validate()?;

        let mut scalar_names = initial.scalar_names();
        scalar_names.extend(extra_names.iter().cloned());
        scalar_names.sort();
        scalar_names.dedup();

        let particles: Vec<Particle> = match initial {
            InitialConditions::Explicit { particles } => {
                if particle_count != particles.len() {
                    log::warn!(
                        "Explicit initial conditions define {} particles; ignoring num_particles = {}",
                        particles.len(),
                        particle_count
                    );
                }
                particles
                    .iter()
                    .map(|spec| {
                        Particle::new(spec.position, normalized(&spec.properties, &scalar_names))
                    })
                    .collect()
            }
            InitialConditions::Uniform {
                domain_min,
                domain_max,
                composition,
            } => {
                if particle_count == 0 {
                    return Err(ConfigError::InvalidParticleCount);
                }
                let baseline = normalized(composition, &scalar_names);
                (0..particle_count)
                    .map(|_| {
                        let position: Vec3 =
                            std::array::from_fn(|k| rng.gen_range(domain_min[k]..domain_max[k]));
                        Particle::new(position, baseline.clone())
                    })
                    .collect()
            }
        };

        log::info!(
            "Initialized {} particles carrying {:?}",
            particles.len(),
            scalar_names
        );

        Ok(Self {
            particles,
            scalar_names,
            diffusivity,
        })
    }

    /// Wrap existing particles, extending each to the union of their names.
    pub fn from_particles(particles: Vec<Particle>, diffusivity: f64) -> Result<Self, ConfigError> {
        check_diffusivity(diffusivity)?;
        if particles.is_empty() {
            return Err(ConfigError::InvalidParticleCount);
        }
        let mut scalar_names: Vec<String> = particles
            .iter()
            .flat_map(|p| p.properties.keys().cloned())
            .collect();
        scalar_names.sort();
        scalar_names.dedup();

        let particles = particles
            .into_iter()
            .map(|mut p| {
                p.properties = normalized(&p.properties, &scalar_names);
                p
            })
            .collect();

        Ok(Self {
            particles,
            scalar_names,
            diffusivity,
        })
    }

    /// Ensemble size.
    #[inline]
    pub fn count(&self) -> usize {
        self.particles.len()
    }

    #[inline]
    pub fn diffusivity(&self) -> f64 {
        self.diffusivity
    }

    #[inline]
    pub fn scalar_names(&self) -> &[String] {
        &self.scalar_names
    }

    #[inline]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable access for mixing and reaction. Callers must keep every
    /// particle's scalar-name set unchanged.
    #[inline]
    pub(crate) fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Current particle positions, in ensemble order.
    pub fn positions(&self) -> Vec<Vec3> {
        self.particles.iter().map(|p| p.position).collect()
    }

    /// Random-walk displacement for one particle over `dt`: each axis is an
    /// independent N(0, 2 D dt) draw.
    pub fn stochastic_displacement<R: Rng>(&self, dt: f64, rng: &mut R) -> Vec3 {
        wiener_increment((2.0 * self.diffusivity * dt).sqrt(), rng)
    }

    /// Advance every particle by `v * dt` plus a random-walk displacement.
    ///
    /// Velocities are sampled in parallel against the frozen field; noise is
    /// drawn sequentially in ensemble order so seeded runs are reproducible.
    pub fn transport<R: Rng>(
        &mut self,
        dt: f64,
        field: &VelocityField,
        rng: &mut R,
    ) -> Result<(), FieldError> {
        let velocities: Vec<Vec3> = self
            .particles
            .par_iter()
            .map(|p| field.sample_velocity_at(p.position))
            .collect::<Result<_, _>>()?;

        let noise: Vec<Vec3> = (0..self.particles.len())
            .map(|_| self.stochastic_displacement(dt, rng))
            .collect();
        let steps = velocities.into_iter().zip(noise);
        for (particle, (velocity, noise)) in self.particles.iter_mut().zip(steps) {
            let displacement: Vec3 = std::array::from_fn(|k| velocity[k] * dt + noise[k]);
            particle.displace(displacement);
            particle.velocity = velocity;
        }

        let outside = self
            .particles
            .iter()
            .filter(|p| !field.grid().contains(p.position))
            .count();
        if outside > 0 {
            log::debug!(
                "{outside} of {} particles are outside the velocity grid envelope",
                self.particles.len()
            );
        }
        Ok(())
    }

    /// Arithmetic mean of every scalar over the current ensemble state.
    pub fn mean_scalar_values(&self) -> ScalarMeans {
        let n = self.particles.len() as f64;
        let mut sums: ScalarMeans = self
            .scalar_names
            .iter()
            .map(|name| (name.clone(), 0.0))
            .collect();
        for particle in &self.particles {
            for (name, value) in &particle.properties {
                if let Some(sum) = sums.get_mut(name) {
                    *sum += value;
                }
            }
        }
        for sum in sums.values_mut() {
            *sum /= n;
        }
        sums
    }

    /// Population variance of one scalar, or `None` if it is not carried.
    pub fn scalar_variance(&self, name: &str) -> Option<f64> {
        scalar_variance(&self.particles, name)
    }

    /// Whether every particle still carries exactly the ensemble's names.
    pub fn names_consistent(&self) -> bool {
        self.particles
            .iter()
            .all(|p| p.has_names(self.scalar_names.iter()))
    }
}

/// Population variance of one scalar over `particles`; `None` if the slice is
/// empty or any particle lacks the scalar.
pub fn scalar_variance(particles: &[Particle], name: &str) -> Option<f64> {
    if particles.is_empty() {
        return None;
    }
    let values: Vec<f64> = particles
        .iter()
        .map(|p| p.scalar(name))
        .collect::<Option<_>>()?;
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    Some(values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n)
}

fn check_diffusivity(diffusivity: f64) -> Result<(), ConfigError> {
    if diffusivity.is_finite() && diffusivity >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidDiffusivity(diffusivity))
    }
}

fn wiener_increment<R: Rng>(sigma: f64, rng: &mut R) -> Vec3 {
    std::array::from_fn(|_| sigma * rng.sample::<f64, _>(StandardNormal))
}

/// Copy `source` restricted to `names`, filling absent names with zero.
fn normalized(source: &ScalarState, names: &[String]) -> ScalarState {
    names
        .iter()
        .map(|name| (name.clone(), source.get(name).copied().unwrap_or(0.0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Grid;
    use crate::schema::ParticleSpec;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::BTreeMap;

    fn spec(position: Vec3, props: &[(&str, f64)]) -> ParticleSpec {
        ParticleSpec {
            position,
            properties: props.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn test_explicit_initialization_normalizes_names() {
        let initial = InitialConditions::Explicit {
            particles: vec![
                spec([0.1, 0.2, 0.3], &[("temperature", 300.0)]),
                spec([0.4, 0.5, 0.6], &[("Y_H2", 0.1)]),
            ],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let ensemble = ParticleEnsemble::initialize(
            &initial,
            2,
            &["pressure".to_string()],
            1e-5,
            &mut rng,
        )
        .unwrap();

        assert_eq!(ensemble.count(), 2);
        assert_eq!(ensemble.scalar_names(), ["Y_H2", "pressure", "temperature"]);
        assert!(ensemble.names_consistent());
        assert_eq!(ensemble.particles()[0].scalar("Y_H2"), Some(0.0));
        assert_eq!(ensemble.particles()[1].scalar("temperature"), Some(0.0));
        assert_eq!(ensemble.particles()[1].position, [0.4, 0.5, 0.6]);
    }

    #[test]
    fn test_uniform_initialization_in_domain() {
        let initial = InitialConditions::Uniform {
            domain_min: [-1.0, 0.0, 2.0],
            domain_max: [1.0, 0.5, 3.0],
            composition: BTreeMap::from([("temperature".to_string(), 300.0)]),
        };
        let mut rng = StdRng::seed_from_u64(7);
        let ensemble = ParticleEnsemble::initialize(&initial, 500, &[], 1e-5, &mut rng).unwrap();

        assert_eq!(ensemble.count(), 500);
        for p in ensemble.particles() {
            assert!((-1.0..1.0).contains(&p.position[0]));
            assert!((0.0..0.5).contains(&p.position[1]));
            assert!((2.0..3.0).contains(&p.position[2]));
            assert_eq!(p.scalar("temperature"), Some(300.0));
        }
    }

    #[test]
    fn test_zero_particles_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let result =
            ParticleEnsemble::initialize(&InitialConditions::default(), 0, &[], 1e-5, &mut rng);
        assert!(matches!(result, Err(ConfigError::InvalidParticleCount)));
    }

    #[test]
    fn test_mean_and_variance() {
        let particles = vec![
            Particle::new([0.0; 3], ScalarState::from([("T".to_string(), 1.0)])),
            Particle::new([0.0; 3], ScalarState::from([("T".to_string(), 3.0)])),
            Particle::new([0.0; 3], ScalarState::from([("T".to_string(), 8.0)])),
        ];
        let ensemble = ParticleEnsemble::from_particles(particles, 0.0).unwrap();

        let means = ensemble.mean_scalar_values();
        assert!((means["T"] - 4.0).abs() < 1e-12);
        let variance = ensemble.scalar_variance("T").unwrap();
        assert!((variance - 26.0 / 3.0).abs() < 1e-12);
        assert!(ensemble.scalar_variance("missing").is_none());
    }

    #[test]
    fn test_transport_deterministic_without_diffusion() {
        let field = VelocityField::from_fn(
            Grid::uniform([0.0; 3], [1.0; 3], [4; 3]).unwrap(),
            |_| [1.0, 0.0, -0.5],
        );
        let particles = vec![Particle::new([0.2, 0.2, 0.2], ScalarState::new())];
        let mut ensemble = ParticleEnsemble::from_particles(particles, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        ensemble.transport(0.1, &field, &mut rng).unwrap();

        let p = &ensemble.particles()[0];
        assert!((p.position[0] - 0.3).abs() < 1e-12);
        assert!((p.position[1] - 0.2).abs() < 1e-12);
        assert!((p.position[2] - 0.15).abs() < 1e-12);
        assert_eq!(p.velocity, [1.0, 0.0, -0.5]);
    }

    #[test]
    fn test_transport_reproducible_with_seed() {
        let field = VelocityField::from_fn(
            Grid::uniform([0.0; 3], [1.0; 3], [4; 3]).unwrap(),
            |[x, y, _]| [-y, x, 0.0],
        );
        let run = || {
            let mut rng = StdRng::seed_from_u64(99);
            let mut ensemble =
                ParticleEnsemble::initialize(&InitialConditions::default(), 64, &[], 1e-3, &mut rng)
                    .unwrap();
            for _ in 0..5 {
                ensemble.transport(0.01, &field, &mut rng).unwrap();
            }
            ensemble.positions()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_transport_displacement_statistics() {
        let diffusivity = 0.5;
        let dt = 0.2;
        let expected = 2.0 * diffusivity * dt;
        let start = [0.5; 3];
        let field = VelocityField::from_fn(
            Grid::uniform([0.0; 3], [1.0; 3], [3; 3]).unwrap(),
            |_| [0.0; 3],
        );
        let samples = 200_000;
        let particles = (0..samples)
            .map(|_| Particle::new(start, ScalarState::new()))
            .collect();
        let mut ensemble = ParticleEnsemble::from_particles(particles, diffusivity).unwrap();
        let mut rng = StdRng::seed_from_u64(2024);

        ensemble.transport(dt, &field, &mut rng).unwrap();

        let mut sum = [0.0; 3];
        let mut sum_sq = [0.0; 3];
        for p in ensemble.particles() {
            for k in 0..3 {
                let d = p.position[k] - start[k];
                sum[k] += d;
                sum_sq[k] += d * d;
            }
        }

        // Standard error of a sample variance is sigma^2 * sqrt(2 / n) ~ 0.3%
        for k in 0..3 {
            let mean = sum[k] / samples as f64;
            let variance = sum_sq[k] / samples as f64 - mean * mean;
            assert!(
                (variance - expected).abs() < 0.02 * expected,
                "Axis {k}: variance {variance}, expected {expected}"
            );
            assert!(mean.abs() < 0.01, "Axis {k}: mean {mean}");
        }
    }

    #[test]
    fn test_invalid_diffusivity_rejected() {
        let particle = || vec![Particle::new([0.0; 3], ScalarState::new())];
        for diffusivity in [-1.0, f64::NAN, f64::INFINITY] {
            let result = ParticleEnsemble::from_particles(particle(), diffusivity);
            assert!(
                matches!(result, Err(ConfigError::InvalidDiffusivity(_))),
                "Expected D = {diffusivity} to be rejected"
            );

            let mut rng = StdRng::seed_from_u64(0);
            let result = ParticleEnsemble::initialize(
                &InitialConditions::default(),
                4,
                &[],
                diffusivity,
                &mut rng,
            );
            assert!(matches!(result, Err(ConfigError::InvalidDiffusivity(_))));
        }
    }
}
