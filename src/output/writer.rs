//! Snapshot writer persisting runs to an output directory.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{CollectorError, DataCollector};
use crate::compute::{Particle, scalar_variance};

const SNAPSHOT_FILE: &str = "snapshots.jsonl";
const VARIANCE_FILE: &str = "scalar_variance.dat";

/// Configuration-driven writer for snapshots, tables and variance history.
///
/// Usage:
/// ```ignore
/// let mut writer = SnapshotWriter::new("output", 0.5, "temperature")?;
/// simulation.run(&mut chemistry, &mut writer)?;
/// ```
pub struct SnapshotWriter {
    directory: PathBuf,
    snapshots: BufWriter<File>,
    variance: BufWriter<File>,
    export_interval: f64,
    variance_scalar: String,
    last_export: Option<f64>,
    steps_written: u64,
    tables_written: u64,
}

#[derive(Serialize)]
struct SnapshotRecord<'a> {
    time: f64,
    particles: &'a [Particle],
}

impl SnapshotWriter {
    /// Create the output directory and open the per-step files.
    ///
    /// A table is exported on the first collection and then whenever at least
    /// `export_interval` of simulated time has passed since the last one.
    pub fn new<P: AsRef<Path>>(
        directory: P,
        export_interval: f64,
        variance_scalar: impl Into<String>,
    ) -> Result<Self, CollectorError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        let snapshots = BufWriter::new(File::create(directory.join(SNAPSHOT_FILE))?);
        let mut variance = BufWriter::new(File::create(directory.join(VARIANCE_FILE))?);
        writeln!(variance, "time variance")?;

        Ok(Self {
            directory,
            snapshots,
            variance,
            export_interval,
            variance_scalar: variance_scalar.into(),
            last_export: None,
            steps_written: 0,
            tables_written: 0,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Counters for the session so far.
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            steps_written: self.steps_written,
            tables_written: self.tables_written,
        }
    }

    fn export_due(&self, time: f64) -> bool {
        match self.last_export {
            None => true,
            Some(last) => time - last >= self.export_interval * (1.0 - 1e-9),
        }
    }

    fn export_table(&mut self, time: f64, particles: &[Particle]) -> Result<(), CollectorError> {
        let path = self.directory.join(format!("data_{time:.2}.dat"));
        let mut out = BufWriter::new(File::create(&path)?);

        let names: Vec<&String> = particles
            .first()
            .map(|p| p.properties.keys().collect())
            .unwrap_or_default();
        let mut header = String::from("x y z");
        for name in &names {
            header.push(' ');
            header.push_str(name);
        }
        writeln!(out, "{header}")?;

        for particle in particles {
            let [x, y, z] = particle.position;
            write!(out, "{x:.18e} {y:.18e} {z:.18e}")?;
            for value in particle.properties.values() {
                write!(out, " {value:.18e}")?;
            }
            writeln!(out)?;
        }
        out.flush()?;

        log::debug!("Exported {} particles to {}", particles.len(), path.display());
        self.tables_written += 1;
        Ok(())
    }
}

impl DataCollector for SnapshotWriter {
    fn collect(&mut self, time: f64, particles: &[Particle]) -> Result<(), CollectorError> {
        serde_json::to_writer(&mut self.snapshots, &SnapshotRecord { time, particles })?;
        self.snapshots.write_all(b"\n")?;

        if let Some(variance) = scalar_variance(particles, &self.variance_scalar) {
            writeln!(self.variance, "{time:.6} {variance:.6}")?;
        }

        if self.export_due(time) {
            self.export_table(time, particles)?;
            self.last_export = Some(time);
        }

        self.steps_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CollectorError> {
        self.snapshots.flush()?;
        self.variance.flush()?;
        log::info!("Wrote {} to {}", self.stats(), self.directory.display());
        Ok(())
    }
}

/// Statistics from a writing session.
#[derive(Debug, Clone, Copy)]
pub struct WriterStats {
    /// Snapshots appended to `snapshots.jsonl`.
    pub steps_written: u64,
    /// `data_<time>.dat` tables exported.
    pub tables_written: u64,
}

impl std::fmt::Display for WriterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} snapshots, {} exported tables",
            self.steps_written, self.tables_written
        )
    }
}
