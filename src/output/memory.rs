//! In-memory snapshot collector.

use serde::{Deserialize, Serialize};

use super::{CollectorError, DataCollector};
use crate::compute::Particle;

/// Ensemble state at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: f64,
    pub particles: Vec<Particle>,
}

/// Collector that keeps every snapshot (or only times, when `times_only`).
#[derive(Debug, Clone, Default)]
pub struct MemoryCollector {
    snapshots: Vec<Snapshot>,
    times_only: bool,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record times without cloning particles.
    pub fn times_only() -> Self {
        Self {
            snapshots: Vec::new(),
            times_only: true,
        }
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn times(&self) -> Vec<f64> {
        self.snapshots.iter().map(|s| s.time).collect()
    }
}

impl DataCollector for MemoryCollector {
    fn collect(&mut self, time: f64, particles: &[Particle]) -> Result<(), CollectorError> {
        let particles = if self.times_only {
            Vec::new()
        } else {
            particles.to_vec()
        };
        self.snapshots.push(Snapshot { time, particles });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ScalarState;

    #[test]
    fn test_collects_snapshots() {
        let particles = vec![Particle::new([0.0; 3], ScalarState::new())];
        let mut collector = MemoryCollector::new();

        collector.collect(0.0, &particles).unwrap();
        collector.collect(0.5, &particles).unwrap();

        assert_eq!(collector.times(), vec![0.0, 0.5]);
        assert_eq!(collector.snapshots()[1].particles.len(), 1);
    }

    #[test]
    fn test_times_only() {
        let particles = vec![Particle::new([0.0; 3], ScalarState::new())];
        let mut collector = MemoryCollector::times_only();

        collector.collect(1.0, &particles).unwrap();

        assert_eq!(collector.times(), vec![1.0]);
        assert!(collector.snapshots()[0].particles.is_empty());
    }
}
