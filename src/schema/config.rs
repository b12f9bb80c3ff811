//! Run configuration for particle transport and micromixing simulations.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::InitialConditions;

fn default_diffusivity() -> f64 {
    1e-5
}

fn default_micromixing_constant() -> f64 {
    1.0
}

fn default_micromixing_rate() -> f64 {
    1.0
}

fn default_alpha() -> f64 {
    0.5
}

fn default_num_particles() -> usize {
    100
}

fn default_strain_epsilon() -> f64 {
    1e-5
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("output")
}

fn default_export_interval() -> f64 {
    1.0
}

fn default_variance_scalar() -> String {
    "temperature".to_string()
}

/// Top-level run configuration.
///
/// `time_step` and `total_time` are required; every other key falls back to
/// its documented default when absent from the JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Time step size.
    pub time_step: f64,
    /// Total simulated time.
    pub total_time: f64,
    /// Ensemble diffusivity D driving the random walk (and the adaptive closure).
    #[serde(default = "default_diffusivity")]
    pub diffusivity: f64,
    /// Mixing constant C of the strain-dependent closure.
    #[serde(default = "default_micromixing_constant")]
    pub micromixing_constant: f64,
    /// Closure selected for the whole run.
    #[serde(default)]
    pub micromixing_model: MicromixingModel,
    /// Relaxation frequency of the fixed-rate closure.
    #[serde(default = "default_micromixing_rate")]
    pub micromixing_rate: f64,
    /// Modified Curl exchange coefficient, in [0, 1].
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// How pairwise closures partner particles each step.
    #[serde(default)]
    pub pairing_policy: PairingPolicy,
    /// Ensemble size when particles are sampled (ignored for explicit conditions).
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,
    /// Velocity field document (used by the CLI).
    #[serde(default)]
    pub flow_field_file: Option<PathBuf>,
    /// Whether the velocity field carries a time axis.
    #[serde(default)]
    pub flow_field_time_dependent: bool,
    /// Behavior of velocity queries outside the grid envelope.
    #[serde(default)]
    pub boundary_policy: BoundaryPolicy,
    /// Finite-difference perturbation for the strain estimator.
    #[serde(default = "default_strain_epsilon")]
    pub strain_epsilon: f64,
    /// Particle positions and compositions at t = 0.
    #[serde(default)]
    pub initial_conditions: InitialConditions,
    /// Additional scalars every particle carries (zero unless set initially).
    #[serde(default)]
    pub scalar_names: Vec<String>,
    /// Seed for transport noise, sampling and pairing. Entropy when absent.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Directory receiving snapshots and exported tables.
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    /// Simulated time between exported tables.
    #[serde(default = "default_export_interval")]
    pub export_interval: f64,
    /// Scalar whose ensemble variance is logged each step.
    #[serde(default = "default_variance_scalar")]
    pub variance_scalar: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            time_step: 0.01,
            total_time: 1.0,
            diffusivity: default_diffusivity(),
            micromixing_constant: default_micromixing_constant(),
            micromixing_model: MicromixingModel::default(),
            micromixing_rate: default_micromixing_rate(),
            alpha: default_alpha(),
            pairing_policy: PairingPolicy::default(),
            num_particles: default_num_particles(),
            flow_field_file: None,
            flow_field_time_dependent: false,
            boundary_policy: BoundaryPolicy::default(),
            strain_epsilon: default_strain_epsilon(),
            initial_conditions: InitialConditions::default(),
            scalar_names: Vec::new(),
            random_seed: None,
            output_directory: default_output_directory(),
            export_interval: default_export_interval(),
            variance_scalar: default_variance_scalar(),
        }
    }
}

/// Micromixing closure menu, as spelled in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicromixingModel {
    /// Relaxation to the mean at the fixed `micromixing_rate`.
    Iem,
    /// Pairwise averaging.
    Curl,
    /// Partial pairwise averaging with coefficient `alpha`.
    ModifiedCurl,
    /// Strain-dependent relaxation to the mean.
    Adaptive,
    /// Same as `Adaptive`.
    #[default]
    Default,
}

/// Pairing policy for pairwise closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingPolicy {
    /// Fresh random permutation each step, split into disjoint consecutive pairs.
    #[default]
    RandomPermutation,
    /// Neighbors in ensemble order: (0, 1), (2, 3), ...
    Sequential,
}

/// Velocity query behavior outside the grid envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Linear extrapolation from the boundary cells.
    #[default]
    Extrapolate,
    /// Reject the query with an out-of-bounds error.
    Strict,
}

impl RunConfig {
    /// Parse configuration from a JSON string and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Number of steps the run will take (`ceil(total_time / time_step)`).
    ///
    /// A relative slack of 1e-9 absorbs representation error, so
    /// `total_time = k * time_step` yields exactly `k`.
    pub fn step_count(&self) -> u64 {
        let ratio = self.total_time / self.time_step;
        (ratio - 1e-9 * ratio.max(1.0)).ceil().max(0.0) as u64
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(ConfigError::InvalidTimeStep(self.time_step));
        }
        if !(self.total_time.is_finite() && self.total_time > 0.0) {
            return Err(ConfigError::InvalidTotalTime(self.total_time));
        }
        if !(self.diffusivity.is_finite() && self.diffusivity >= 0.0) {
            return Err(ConfigError::InvalidDiffusivity(self.diffusivity));
        }
        if !(self.micromixing_constant.is_finite() && self.micromixing_constant >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "micromixing_constant",
                value: self.micromixing_constant,
            });
        }
        if !(self.micromixing_rate.is_finite() && self.micromixing_rate >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "micromixing_rate",
                value: self.micromixing_rate,
            });
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ConfigError::InvalidAlpha(self.alpha));
        }
        if self.num_particles == 0 {
            return Err(ConfigError::InvalidParticleCount);
        }
        if !(self.strain_epsilon.is_finite() && self.strain_epsilon > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "strain_epsilon",
                value: self.strain_epsilon,
            });
        }
        if !(self.export_interval.is_finite() && self.export_interval >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "export_interval",
                value: self.export_interval,
            });
        }
        self.initial_conditions.validate()?;
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("time_step must be positive and finite, got {0}")]
    InvalidTimeStep(f64),
    #[error("total_time must be positive and finite, got {0}")]
    InvalidTotalTime(f64),
    #[error("diffusivity must be non-negative and finite, got {0}")]
    InvalidDiffusivity(f64),
    #[error("{name} is out of range: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("alpha must lie in [0, 1], got {0}")]
    InvalidAlpha(f64),
    #[error("num_particles must be non-zero")]
    InvalidParticleCount,
    #[error("Explicit initial conditions list no particles")]
    EmptyExplicitConditions,
    #[error("Sampling domain is degenerate on axis {axis}: [{min}, {max}]")]
    InvalidDomain { axis: usize, min: f64, max: f64 },
    #[error("Initial value for '{name}' is not finite: {value}")]
    NonFiniteInitialValue { name: String, value: f64 },
    #[error("flow_field_file is required to run a simulation")]
    MissingFlowFieldFile,
    #[error("flow_field_time_dependent is {expected} but the loaded field disagrees")]
    TimeDependenceMismatch { expected: bool },
    #[error("diffusivity is {config} but the ensemble was built with {ensemble}")]
    DiffusivityMismatch { config: f64, ensemble: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = RunConfig::from_json_str(r#"{"time_step": 0.1, "total_time": 1.0}"#).unwrap();

        assert_eq!(config.diffusivity, 1e-5);
        assert_eq!(config.micromixing_constant, 1.0);
        assert_eq!(config.micromixing_model, MicromixingModel::Default);
        assert_eq!(config.num_particles, 100);
        assert!(!config.flow_field_time_dependent);
        assert_eq!(config.boundary_policy, BoundaryPolicy::Extrapolate);
        assert_eq!(config.pairing_policy, PairingPolicy::RandomPermutation);
    }

    #[test]
    fn test_missing_required_key_is_fatal() {
        let result = RunConfig::from_json_str(r#"{"time_step": 0.1}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        let result = RunConfig::from_json_str(r#"{"total_time": 1.0}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_model_names() {
        for (name, model) in [
            ("iem", MicromixingModel::Iem),
            ("curl", MicromixingModel::Curl),
            ("modified_curl", MicromixingModel::ModifiedCurl),
            ("adaptive", MicromixingModel::Adaptive),
            ("default", MicromixingModel::Default),
        ] {
            let json = format!(
                r#"{{"time_step": 0.1, "total_time": 1.0, "micromixing_model": "{name}"}}"#
            );
            let config = RunConfig::from_json_str(&json).unwrap();
            assert_eq!(config.micromixing_model, model);
        }

        let bad = r#"{"time_step": 0.1, "total_time": 1.0, "micromixing_model": "lmse"}"#;
        assert!(RunConfig::from_json_str(bad).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            (r#"{"time_step": 0.0, "total_time": 1.0}"#, "time_step"),
            (r#"{"time_step": 0.1, "total_time": -1.0}"#, "total_time"),
            (
                r#"{"time_step": 0.1, "total_time": 1.0, "diffusivity": -1.0}"#,
                "diffusivity",
            ),
            (
                r#"{"time_step": 0.1, "total_time": 1.0, "alpha": 1.5}"#,
                "alpha",
            ),
            (
                r#"{"time_step": 0.1, "total_time": 1.0, "num_particles": 0}"#,
                "num_particles",
            ),
        ];

        for (json, label) in cases {
            assert!(
                RunConfig::from_json_str(json).is_err(),
                "Expected {label} to be rejected"
            );
        }
    }

    #[test]
    fn test_step_count_exact_multiples() {
        let mut config = RunConfig::default();
        for (dt, total, expected) in [(0.1, 1.0, 10), (0.1, 0.3, 3), (0.01, 1.0, 100), (0.3, 1.0, 4)]
        {
            config.time_step = dt;
            config.total_time = total;
            assert_eq!(config.step_count(), expected, "dt={dt}, total={total}");
        }
    }

    #[test]
    fn test_step_count_absorbs_rounding_slack() {
        let mut config = RunConfig::default();
        config.time_step = 0.1;

        // Within the relative slack: completes at exactly k * dt
        config.total_time = 1.0 + 1e-12;
        assert_eq!(config.step_count(), 10);

        // Beyond it: one more step so time reaches total_time
        config.total_time = 1.0 + 1e-6;
        assert_eq!(config.step_count(), 11);
    }

    #[test]
    fn test_omitted_keys_match_default() {
        let parsed = RunConfig::from_json_str(r#"{"time_step": 0.01, "total_time": 1.0}"#).unwrap();
        let default = RunConfig::default();

        assert_eq!(parsed.flow_field_file, default.flow_field_file);
        assert!(parsed.flow_field_file.is_none());
        assert_eq!(parsed.scalar_names, default.scalar_names);
        assert_eq!(parsed.output_directory, default.output_directory);
        assert_eq!(parsed.export_interval, default.export_interval);
        assert_eq!(parsed.variance_scalar, default.variance_scalar);
        assert_eq!(parsed.strain_epsilon, default.strain_epsilon);
    }

    #[test]
    fn test_default_config_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialization() {
        let config = RunConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = RunConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.num_particles, config.num_particles);
        assert_eq!(parsed.micromixing_model, config.micromixing_model);
    }
}
