//! Micromixing closures.
//!
//! Two kinds of closure share one contract: they mutate scalar properties only
//! and never move particles.
//!
//! - Relaxation to the mean: `phi <- phi - omega * (phi - mean_phi) * dt`,
//!   with `omega = C * 2D * |S|^2` (adaptive) or a fixed `omega`.
//! - Pairwise exchange: partners move toward their pair average, fully (Curl)
//!   or by a fraction `alpha` (Modified Curl). The pair sum is conserved.
//!
//! The closure is chosen once per run and holds only its parameters.

use rand::Rng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::schema::{MicromixingModel, PairingPolicy, RunConfig};

use super::{Particle, ParticleEnsemble, ScalarMeans, StrainTensor};

/// Micromixing closure with its fixed parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MixingClosure {
    /// Strain-dependent relaxation, `omega = constant * 2 * diffusivity * |S|^2`.
    Adaptive { constant: f64, diffusivity: f64 },
    /// Relaxation at a constant frequency.
    FixedRate { omega: f64 },
    /// Partners both take their pair average.
    Curl,
    /// Partners move a fraction `alpha` of the way to their pair average.
    ModifiedCurl { alpha: f64 },
}

/// Per-call input a closure mixes against.
#[derive(Debug)]
pub enum MixingContext<'a> {
    /// Local strain and the step's ensemble-mean snapshot.
    Relaxation {
        strain: &'a StrainTensor,
        means: &'a ScalarMeans,
        dt: f64,
    },
    /// The partner of a pairwise exchange.
    Pair { partner: &'a mut Particle },
}

impl MixingContext<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Relaxation { .. } => "relaxation",
            Self::Pair { .. } => "pair",
        }
    }
}

/// Micromixing errors.
#[derive(Debug, thiserror::Error)]
pub enum MixingError {
    #[error("{closure} closure cannot mix with a {context} context")]
    ContextMismatch {
        closure: &'static str,
        context: &'static str,
    },
    #[error("Ensemble mean snapshot has no entry for scalar '{0}'")]
    MissingMean(String),
    #[error("Paired particles carry different scalar names")]
    ScalarMismatch,
    #[error("Expected {expected} strain tensors, got {actual}")]
    StrainCount { expected: usize, actual: usize },
}

impl MixingClosure {
    /// Resolve the configured closure.
    ///
    /// `adaptive` and `default` select the strain-dependent closure, `iem`
    /// the fixed-rate relaxation at `micromixing_rate`.
    pub fn from_config(config: &RunConfig) -> Self {
        match config.micromixing_model {
            MicromixingModel::Adaptive | MicromixingModel::Default => Self::Adaptive {
                constant: config.micromixing_constant,
                diffusivity: config.diffusivity,
            },
            MicromixingModel::Iem => Self::FixedRate {
                omega: config.micromixing_rate,
            },
            MicromixingModel::Curl => Self::Curl,
            MicromixingModel::ModifiedCurl => Self::ModifiedCurl {
                alpha: config.alpha,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Adaptive { .. } => "adaptive",
            Self::FixedRate { .. } => "fixed-rate",
            Self::Curl => "curl",
            Self::ModifiedCurl { .. } => "modified-curl",
        }
    }

    #[inline]
    pub fn is_pairwise(&self) -> bool {
        matches!(self, Self::Curl | Self::ModifiedCurl { .. })
    }

    /// Whether mixing reads the local strain tensor.
    #[inline]
    pub fn needs_strain(&self) -> bool {
        matches!(self, Self::Adaptive { .. })
    }

    /// Relaxation frequency for a given strain; `None` for pairwise closures.
    pub fn mixing_frequency(&self, strain: &StrainTensor) -> Option<f64> {
        match *self {
            Self::Adaptive {
                constant,
                diffusivity,
            } => Some(constant * 2.0 * diffusivity * strain.norm_squared()),
            Self::FixedRate { omega } => Some(omega),
            Self::Curl | Self::ModifiedCurl { .. } => None,
        }
    }

    /// Mix one particle against its context.
    pub fn apply_mixing(
        &self,
        target: &mut Particle,
        context: MixingContext<'_>,
    ) -> Result<(), MixingError> {
        match (self, context) {
            (
                Self::Adaptive { .. } | Self::FixedRate { .. },
                MixingContext::Relaxation { strain, means, dt },
            ) => {
                let omega = self.mixing_frequency(strain).unwrap_or(0.0);
                relax_toward_mean(target, omega, means, dt)
            }
            (Self::Curl, MixingContext::Pair { partner }) => exchange(target, partner, 1.0),
            (&Self::ModifiedCurl { alpha }, MixingContext::Pair { partner }) => {
                exchange(target, partner, alpha)
            }
            (_, context) => Err(MixingError::ContextMismatch {
                closure: self.name(),
                context: context.kind(),
            }),
        }
    }

    /// Mix the whole ensemble for one step.
    ///
    /// `means` must be the pre-mixing snapshot of this step. Relaxation
    /// closures need `strains[i]` for particle `i` when [`needs_strain`]
    /// holds, and run in parallel. Pairwise closures partner particles with
    /// `pairing`; with an odd count one particle sits the step out.
    ///
    /// [`needs_strain`]: MixingClosure::needs_strain
    pub fn mix_ensemble<R: Rng>(
        &self,
        ensemble: &mut ParticleEnsemble,
        strains: Option<&[StrainTensor]>,
        means: &ScalarMeans,
        dt: f64,
        pairing: PairingPolicy,
        rng: &mut R,
    ) -> Result<(), MixingError> {
        if self.is_pairwise() {
            let pairs = form_pairs(ensemble.count(), pairing, rng);
            let particles = ensemble.particles_mut();
            for (a, b) in pairs {
                let (target, partner) = pair_mut(particles, a, b);
                self.apply_mixing(target, MixingContext::Pair { partner })?;
            }
            return Ok(());
        }

        let count = ensemble.count();
        let zero = StrainTensor::zero();
        let strains = match strains {
            Some(strains) if strains.len() == count => Some(strains),
            Some(strains) => {
                return Err(MixingError::StrainCount {
                    expected: count,
                    actual: strains.len(),
                });
            }
            None if self.needs_strain() => {
                return Err(MixingError::StrainCount {
                    expected: count,
                    actual: 0,
                });
            }
            None => None,
        };

        ensemble
            .particles_mut()
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(i, particle)| {
                let strain = strains.map_or(&zero, |s| &s[i]);
                self.apply_mixing(particle, MixingContext::Relaxation { strain, means, dt })
            })
    }
}

fn relax_toward_mean(
    particle: &mut Particle,
    omega: f64,
    means: &ScalarMeans,
    dt: f64,
) -> Result<(), MixingError> {
    for (name, value) in particle.properties.iter_mut() {
        let mean = means
            .get(name)
            .ok_or_else(|| MixingError::MissingMean(name.clone()))?;
        *value -= omega * (*value - mean) * dt;
    }
    Ok(())
}

fn exchange(a: &mut Particle, b: &mut Particle, alpha: f64) -> Result<(), MixingError> {
    if !a.properties.keys().eq(b.properties.keys()) {
        return Err(MixingError::ScalarMismatch);
    }
    for (va, vb) in a.properties.values_mut().zip(b.properties.values_mut()) {
        let avg = 0.5 * (*va + *vb);
        *va = (1.0 - alpha) * *va + alpha * avg;
        *vb = (1.0 - alpha) * *vb + alpha * avg;
    }
    Ok(())
}

/// Disjoint index pairs over `count` particles for one step.
///
/// `RandomPermutation` shuffles `0..count` and pairs consecutive entries;
/// `Sequential` pairs `(0, 1), (2, 3), ...`. An odd trailing index is left out.
pub fn form_pairs<R: Rng>(count: usize, policy: PairingPolicy, rng: &mut R) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..count).collect();
    if policy == PairingPolicy::RandomPermutation {
        order.shuffle(rng);
    }
    order.chunks_exact(2).map(|c| (c[0], c[1])).collect()
}

/// Two distinct mutable elements of a slice.
fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    debug_assert_ne!(a, b, "pair indices must differ");
    if a < b {
        let (head, tail) = items.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = items.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ScalarState;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn particle(props: &[(&str, f64)]) -> Particle {
        Particle::new(
            [0.1, 0.2, 0.3],
            props.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        )
    }

    fn shear_strain(rate: f64) -> StrainTensor {
        StrainTensor([[0.0, rate, 0.0], [rate, 0.0, 0.0], [0.0, 0.0, 0.0]])
    }

    #[test]
    fn test_adaptive_closed_form() {
        let closure = MixingClosure::Adaptive {
            constant: 2.0,
            diffusivity: 0.25,
        };
        let strain = shear_strain(1.5);
        let omega = 2.0 * 2.0 * 0.25 * (2.0 * 1.5 * 1.5);
        assert!((closure.mixing_frequency(&strain).unwrap() - omega).abs() < 1e-12);

        let means = ScalarState::from([("T".to_string(), 400.0), ("Y".to_string(), 0.5)]);
        let mut target = particle(&[("T", 300.0), ("Y", 0.1)]);
        let dt = 0.01;

        closure
            .apply_mixing(
                &mut target,
                MixingContext::Relaxation {
                    strain: &strain,
                    means: &means,
                    dt,
                },
            )
            .unwrap();

        let expected_t = 300.0 - omega * (300.0 - 400.0) * dt;
        let expected_y = 0.1 - omega * (0.1 - 0.5) * dt;
        assert!((target.scalar("T").unwrap() - expected_t).abs() < 1e-9);
        assert!((target.scalar("Y").unwrap() - expected_y).abs() < 1e-12);
        assert_eq!(target.position, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_fixed_rate_ignores_strain() {
        let closure = MixingClosure::FixedRate { omega: 3.0 };
        let means = ScalarState::from([("T".to_string(), 0.0)]);

        for strain in [StrainTensor::zero(), shear_strain(10.0)] {
            let mut target = particle(&[("T", 1.0)]);
            closure
                .apply_mixing(
                    &mut target,
                    MixingContext::Relaxation {
                        strain: &strain,
                        means: &means,
                        dt: 0.1,
                    },
                )
                .unwrap();
            assert!((target.scalar("T").unwrap() - 0.7).abs() < 1e-12);
        }
    }

    #[test]
    fn test_curl_averages_pair() {
        let mut a = particle(&[("T", 300.0), ("Y", 0.0)]);
        let mut b = particle(&[("T", 500.0), ("Y", 1.0)]);

        MixingClosure::Curl
            .apply_mixing(&mut a, MixingContext::Pair { partner: &mut b })
            .unwrap();

        assert_eq!(a.properties, b.properties);
        assert_eq!(a.scalar("T"), Some(400.0));
        assert_eq!(a.scalar("Y"), Some(0.5));
    }

    #[test]
    fn test_wrong_context_rejected() {
        let mut a = particle(&[("T", 1.0)]);
        let mut b = particle(&[("T", 2.0)]);
        let result = MixingClosure::FixedRate { omega: 1.0 }
            .apply_mixing(&mut a, MixingContext::Pair { partner: &mut b });
        assert!(matches!(result, Err(MixingError::ContextMismatch { .. })));

        let means = ScalarState::new();
        let strain = StrainTensor::zero();
        let result = MixingClosure::Curl.apply_mixing(
            &mut a,
            MixingContext::Relaxation {
                strain: &strain,
                means: &means,
                dt: 0.1,
            },
        );
        assert!(matches!(result, Err(MixingError::ContextMismatch { .. })));
    }

    #[test]
    fn test_pair_name_mismatch_rejected() {
        let mut a = particle(&[("T", 1.0)]);
        let mut b = particle(&[("Y", 2.0)]);
        let result =
            MixingClosure::Curl.apply_mixing(&mut a, MixingContext::Pair { partner: &mut b });
        assert!(matches!(result, Err(MixingError::ScalarMismatch)));
    }

    #[test]
    fn test_form_pairs_disjoint() {
        let mut rng = StdRng::seed_from_u64(11);
        for policy in [PairingPolicy::RandomPermutation, PairingPolicy::Sequential] {
            let pairs = form_pairs(9, policy, &mut rng);
            assert_eq!(pairs.len(), 4);

            let mut seen: Vec<usize> = pairs.iter().flat_map(|&(a, b)| [a, b]).collect();
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), 8, "pairs must not share particles");
        }

        let pairs = form_pairs(4, PairingPolicy::Sequential, &mut rng);
        assert_eq!(pairs, vec![(0, 1), (2, 3)]);
    }

    #[test]
    fn test_ensemble_relaxation_uses_snapshot() {
        let particles = vec![
            particle(&[("T", 0.0)]),
            particle(&[("T", 10.0)]),
            particle(&[("T", 20.0)]),
        ];
        let mut ensemble = ParticleEnsemble::from_particles(particles, 0.0).unwrap();
        let means = ensemble.mean_scalar_values();
        let mut rng = StdRng::seed_from_u64(0);

        MixingClosure::FixedRate { omega: 1.0 }
            .mix_ensemble(&mut ensemble, None, &means, 0.5, PairingPolicy::Sequential, &mut rng)
            .unwrap();

        let values: Vec<f64> = ensemble
            .particles()
            .iter()
            .map(|p| p.scalar("T").unwrap())
            .collect();
        assert_eq!(values, vec![5.0, 10.0, 15.0]);
    }

    #[test]
    fn test_adaptive_requires_strain() {
        let mut ensemble =
            ParticleEnsemble::from_particles(vec![particle(&[("T", 1.0)])], 1e-3).unwrap();
        let means = ensemble.mean_scalar_values();
        let mut rng = StdRng::seed_from_u64(0);
        let closure = MixingClosure::Adaptive {
            constant: 1.0,
            diffusivity: 1e-3,
        };

        let result =
            closure.mix_ensemble(&mut ensemble, None, &means, 0.1, PairingPolicy::default(), &mut rng);
        assert!(matches!(result, Err(MixingError::StrainCount { .. })));
    }

    #[test]
    fn test_pairwise_ensemble_conserves_totals() {
        let particles: Vec<Particle> = (0..11)
            .map(|i| particle(&[("T", 300.0 + 17.0 * i as f64), ("Y", (i % 3) as f64)]))
            .collect();
        let mut ensemble = ParticleEnsemble::from_particles(particles, 0.0).unwrap();
        let before = ensemble.mean_scalar_values();
        let means = before.clone();
        let mut rng = StdRng::seed_from_u64(5);

        MixingClosure::ModifiedCurl { alpha: 0.3 }
            .mix_ensemble(
                &mut ensemble,
                None,
                &means,
                0.1,
                PairingPolicy::RandomPermutation,
                &mut rng,
            )
            .unwrap();

        let after = ensemble.mean_scalar_values();
        for (name, value) in &before {
            assert!((after[name] - value).abs() < 1e-9, "{name} mean drifted");
        }
    }

    proptest! {
        #[test]
        fn prop_modified_curl_conserves_pair_sum(
            alpha in 0.0f64..=1.0,
            ta in -1e3f64..1e3,
            tb in -1e3f64..1e3,
            ya in 0.0f64..1.0,
            yb in 0.0f64..1.0,
        ) {
            let mut a = particle(&[("T", ta), ("Y", ya)]);
            let mut b = particle(&[("T", tb), ("Y", yb)]);

            MixingClosure::ModifiedCurl { alpha }
                .apply_mixing(&mut a, MixingContext::Pair { partner: &mut b })
                .unwrap();

            let t_sum = a.scalar("T").unwrap() + b.scalar("T").unwrap();
            let y_sum = a.scalar("Y").unwrap() + b.scalar("Y").unwrap();
            prop_assert!((t_sum - (ta + tb)).abs() < 1e-9);
            prop_assert!((y_sum - (ya + yb)).abs() < 1e-12);
        }

        #[test]
        fn prop_curl_conserves_pair_sum(ta in -1e3f64..1e3, tb in -1e3f64..1e3) {
            let mut a = particle(&[("T", ta)]);
            let mut b = particle(&[("T", tb)]);

            MixingClosure::Curl
                .apply_mixing(&mut a, MixingContext::Pair { partner: &mut b })
                .unwrap();

            let sum = a.scalar("T").unwrap() + b.scalar("T").unwrap();
            prop_assert!((sum - (ta + tb)).abs() < 1e-9);
        }

        #[test]
        fn prop_relaxation_closed_form(
            omega in 0.0f64..50.0,
            dt in 1e-4f64..0.1,
            value in -100.0f64..100.0,
            mean in -100.0f64..100.0,
        ) {
            let means = ScalarState::from([("phi".to_string(), mean)]);
            let strain = StrainTensor::zero();
            let mut target = particle(&[("phi", value)]);

            MixingClosure::FixedRate { omega }
                .apply_mixing(&mut target, MixingContext::Relaxation { strain: &strain, means: &means, dt })
                .unwrap();

            let expected = value - omega * (value - mean) * dt;
            prop_assert!((target.scalar("phi").unwrap() - expected).abs() < 1e-9);
        }
    }
}
