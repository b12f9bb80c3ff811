//! Velocity field sampling on a structured grid.
//!
//! A field is defined by three strictly increasing coordinate axes and three
//! velocity components stored flat in `[ix][iy][iz]` order (z fastest). A
//! time-indexed field stores one such snapshot per time sample; `refresh`
//! blends the two snapshots bracketing the current time into the buffer that
//! point queries read.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Deserialize;

use crate::schema::BoundaryPolicy;

/// Three-component real vector.
pub type Vec3 = [f64; 3];

/// Velocity field errors.
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("Malformed velocity field: {0}")]
    Malformed(String),
    #[error("Time {time} is outside the field time range [{first}, {last})")]
    OutOfDomain { time: f64, first: f64, last: f64 },
    #[error("Position {position:?} is outside the grid envelope")]
    OutOfBounds { position: Vec3 },
    #[error("Failed to read velocity field file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Malformed velocity field file {path}: {reason}")]
    InvalidFile { path: PathBuf, reason: String },
}

/// Structured grid given by three strictly increasing axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    axes: [Vec<f64>; 3],
}

impl Grid {
    /// Build a grid, checking every axis has at least two strictly increasing
    /// finite coordinates.
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Result<Self, FieldError> {
        for (name, axis) in [("x", &x), ("y", &y), ("z", &z)] {
            if axis.len() < 2 {
                return Err(FieldError::Malformed(format!(
                    "axis {name} needs at least 2 coordinates, got {}",
                    axis.len()
                )));
            }
            check_strictly_increasing(name, axis)?;
        }
        Ok(Self { axes: [x, y, z] })
    }

    /// Uniformly spaced grid over `[min, max]` with `n` points per axis.
    pub fn uniform(min: Vec3, max: Vec3, n: [usize; 3]) -> Result<Self, FieldError> {
        let axis = |k: usize| -> Vec<f64> {
            if n[k] < 2 {
                return vec![min[k]; n[k]];
            }
            let step = (max[k] - min[k]) / (n[k] - 1) as f64;
            (0..n[k]).map(|i| min[k] + step * i as f64).collect()
        };
        Self::new(axis(0), axis(1), axis(2))
    }

    /// Points per axis.
    #[inline]
    pub fn shape(&self) -> [usize; 3] {
        [self.axes[0].len(), self.axes[1].len(), self.axes[2].len()]
    }

    /// Total number of grid nodes.
    #[inline]
    pub fn len(&self) -> usize {
        let [nx, ny, nz] = self.shape();
        nx * ny * nz
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinates along one axis (0 = x, 1 = y, 2 = z).
    #[inline]
    pub fn axis(&self, k: usize) -> &[f64] {
        &self.axes[k]
    }

    /// Flat index of node (ix, iy, iz).
    #[inline]
    pub fn idx(&self, ix: usize, iy: usize, iz: usize) -> usize {
        let [_, ny, nz] = self.shape();
        (ix * ny + iy) * nz + iz
    }

    /// Position of node (ix, iy, iz).
    #[inline]
    pub fn node(&self, ix: usize, iy: usize, iz: usize) -> Vec3 {
        [self.axes[0][ix], self.axes[1][iy], self.axes[2][iz]]
    }

    /// Whether `position` lies inside the closed grid envelope.
    pub fn contains(&self, position: Vec3) -> bool {
        (0..3).all(|k| {
            let axis = &self.axes[k];
            position[k] >= axis[0] && position[k] <= axis[axis.len() - 1]
        })
    }
}

/// One velocity snapshot: u, v, w stored flat in grid order.
#[derive(Debug, Clone, PartialEq)]
pub struct Components {
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub w: Vec<f64>,
}

impl Components {
    /// Sample a closure at every grid node.
    pub fn from_fn(grid: &Grid, f: impl Fn(Vec3) -> Vec3) -> Self {
        let [nx, ny, nz] = grid.shape();
        let size = grid.len();
        let mut out = Self {
            u: Vec::with_capacity(size),
            v: Vec::with_capacity(size),
            w: Vec::with_capacity(size),
        };
        for ix in 0..nx {
            for iy in 0..ny {
                for iz in 0..nz {
                    let [u, v, w] = f(grid.node(ix, iy, iz));
                    out.u.push(u);
                    out.v.push(v);
                    out.w.push(w);
                }
            }
        }
        out
    }

    fn len_check(&self, expected: usize, what: &str) -> Result<(), FieldError> {
        for (name, data) in [("u", &self.u), ("v", &self.v), ("w", &self.w)] {
            if data.len() != expected {
                return Err(FieldError::Malformed(format!(
                    "{what} component {name} has {} values, expected {expected}",
                    data.len()
                )));
            }
        }
        Ok(())
    }

    /// Split time-leading flat components into one snapshot per time sample.
    fn split(self, snapshots: usize, size: usize) -> Vec<Components> {
        (0..snapshots)
            .map(|t| {
                let range = t * size..(t + 1) * size;
                Components {
                    u: self.u[range.clone()].to_vec(),
                    v: self.v[range.clone()].to_vec(),
                    w: self.w[range].to_vec(),
                }
            })
            .collect()
    }
}

/// Sampled velocity field answering point queries by trilinear interpolation.
#[derive(Debug, Clone)]
pub struct VelocityField {
    grid: Grid,
    /// One snapshot for static fields, one per time sample otherwise.
    snapshots: Vec<Components>,
    times: Option<Vec<f64>>,
    /// Snapshot read by queries (blended for time-indexed fields).
    current: Components,
    /// Bracket index and weight of the last refresh.
    blended: Option<(usize, f64)>,
    policy: BoundaryPolicy,
}

impl VelocityField {
    /// Validate and assemble a field.
    ///
    /// Without `times`, each component holds `grid.len()` values. With
    /// `times`, each component holds `times.len() * grid.len()` values, time
    /// leading. Queries against a time-indexed field read the first snapshot
    /// until the first `refresh`.
    pub fn load(
        grid: Grid,
        components: Components,
        times: Option<Vec<f64>>,
    ) -> Result<Self, FieldError> {
        let size = grid.len();
        let snapshots = match &times {
            None => {
                components.len_check(size, "static")?;
                vec![components]
            }
            Some(times) => {
                if times.len() < 2 {
                    return Err(FieldError::Malformed(format!(
                        "time axis needs at least 2 samples, got {}",
                        times.len()
                    )));
                }
                check_strictly_increasing("times", times)?;
                components.len_check(times.len() * size, "time-indexed")?;
                components.split(times.len(), size)
            }
        };

        for snapshot in &snapshots {
            for (name, data) in [("u", &snapshot.u), ("v", &snapshot.v), ("w", &snapshot.w)] {
                if let Some(bad) = data.iter().find(|v| !v.is_finite()) {
                    return Err(FieldError::Malformed(format!(
                        "component {name} contains non-finite value {bad}"
                    )));
                }
            }
        }

        let current = snapshots[0].clone();
        Ok(Self {
            grid,
            snapshots,
            times,
            current,
            blended: None,
            policy: BoundaryPolicy::default(),
        })
    }

    /// Static field sampled from a closure at every grid node.
    pub fn from_fn(grid: Grid, f: impl Fn(Vec3) -> Vec3) -> Self {
        let components = Components::from_fn(&grid, f);
        Self {
            grid,
            current: components.clone(),
            snapshots: vec![components],
            times: None,
            blended: None,
            policy: BoundaryPolicy::default(),
        }
    }

    /// Read a field document from disk (see [`FieldDocument`]).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, FieldError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| FieldError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let invalid = |reason: String| FieldError::InvalidFile {
            path: path.to_path_buf(),
            reason,
        };
        let doc: FieldDocument =
            serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        let field = doc.into_field().map_err(|e| match e {
            FieldError::Malformed(reason) => invalid(reason),
            other => other,
        })?;
        log::info!(
            "Loaded velocity field from {} (grid {:?}, {} snapshot(s))",
            path.display(),
            field.grid.shape(),
            field.snapshots.len()
        );
        Ok(field)
    }

    /// Set the out-of-envelope query policy.
    pub fn with_boundary_policy(mut self, policy: BoundaryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[inline]
    pub fn boundary_policy(&self) -> BoundaryPolicy {
        self.policy
    }

    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Time samples of a time-indexed field.
    pub fn times(&self) -> Option<&[f64]> {
        self.times.as_deref()
    }

    #[inline]
    pub fn is_time_dependent(&self) -> bool {
        self.times.is_some()
    }

    /// Bring the queried snapshot to `current_time`.
    ///
    /// No-op for static fields. For time-indexed fields the bracket is the
    /// first sample strictly greater than `current_time` and its predecessor,
    /// so `current_time` must satisfy `times[0] <= t < times[last]`.
    /// Refreshing to the same bracket and weight twice reuses the blend.
    pub fn refresh(&mut self, current_time: f64) -> Result<(), FieldError> {
        let Some(times) = &self.times else {
            return Ok(());
        };

        let upper = times.partition_point(|&t| t <= current_time);
        if upper == 0 || upper == times.len() {
            return Err(FieldError::OutOfDomain {
                time: current_time,
                first: times[0],
                last: times[times.len() - 1],
            });
        }

        let (t0, t1) = (times[upper - 1], times[upper]);
        let weight = (current_time - t0) / (t1 - t0);
        if self.blended == Some((upper, weight)) {
            return Ok(());
        }

        let (a, b) = (&self.snapshots[upper - 1], &self.snapshots[upper]);
        blend_into(&mut self.current.u, &a.u, &b.u, weight);
        blend_into(&mut self.current.v, &a.v, &b.v, weight);
        blend_into(&mut self.current.w, &a.w, &b.w, weight);
        self.blended = Some((upper, weight));

        log::debug!("Refreshed velocity field at t={current_time} (weight {weight:.4} in [{t0}, {t1}])");
        Ok(())
    }

    /// Interpolated velocity at an arbitrary point.
    ///
    /// Inside the grid envelope this is trilinear interpolation. Outside it,
    /// `Extrapolate` continues the boundary cell's trilinear form linearly
    /// and `Strict` returns [`FieldError::OutOfBounds`].
    pub fn sample_velocity_at(&self, position: Vec3) -> Result<Vec3, FieldError> {
        if self.policy == BoundaryPolicy::Strict && !self.grid.contains(position) {
            return Err(FieldError::OutOfBounds { position });
        }
        if position.iter().any(|c| !c.is_finite()) {
            return Err(FieldError::OutOfBounds { position });
        }

        let (ix, tx) = locate(self.grid.axis(0), position[0]);
        let (iy, ty) = locate(self.grid.axis(1), position[1]);
        let (iz, tz) = locate(self.grid.axis(2), position[2]);

        let mut out = [0.0; 3];
        for (dx, wx) in [(0, 1.0 - tx), (1, tx)] {
            for (dy, wy) in [(0, 1.0 - ty), (1, ty)] {
                for (dz, wz) in [(0, 1.0 - tz), (1, tz)] {
                    let weight = wx * wy * wz;
                    let idx = self.grid.idx(ix + dx, iy + dy, iz + dz);
                    out[0] += weight * self.current.u[idx];
                    out[1] += weight * self.current.v[idx];
                    out[2] += weight * self.current.w[idx];
                }
            }
        }
        Ok(out)
    }
}

/// Lower cell index and (possibly out-of-[0, 1]) fractional offset of `x`.
///
/// The cell index is clamped to the first/last cell, so points outside the
/// axis get a fraction below 0 or above 1 and extrapolate linearly.
#[inline]
fn locate(axis: &[f64], x: f64) -> (usize, f64) {
    let last_cell = axis.len() - 2;
    let i = axis.partition_point(|&c| c <= x).saturating_sub(1).min(last_cell);
    let t = (x - axis[i]) / (axis[i + 1] - axis[i]);
    (i, t)
}

fn blend_into(out: &mut [f64], a: &[f64], b: &[f64], weight: f64) {
    out.par_iter_mut()
        .zip(a.par_iter().zip(b.par_iter()))
        .for_each(|(o, (&va, &vb))| *o = (1.0 - weight) * va + weight * vb);
}

fn check_strictly_increasing(name: &str, values: &[f64]) -> Result<(), FieldError> {
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(FieldError::Malformed(format!(
            "{name} contains non-finite value {bad}"
        )));
    }
    if let Some(i) = values.windows(2).position(|w| w[1] <= w[0]) {
        return Err(FieldError::Malformed(format!(
            "{name} is not strictly increasing at index {}: {} then {}",
            i + 1,
            values[i],
            values[i + 1]
        )));
    }
    Ok(())
}

/// On-disk velocity field document.
///
/// ```json
/// {
///   "x": [..], "y": [..], "z": [..],
///   "u": [[[..]]], "v": [[[..]]], "w": [[[..]]],
///   "times": [..]
/// }
/// ```
///
/// Components are nested arrays shaped `[nx][ny][nz]`, or `[nt][nx][ny][nz]`
/// when `times` is present.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDocument {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub u: NestedArray,
    pub v: NestedArray,
    pub w: NestedArray,
    #[serde(default)]
    pub times: Option<Vec<f64>>,
}

/// Arbitrarily nested numeric array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NestedArray {
    Value(f64),
    List(Vec<NestedArray>),
}

impl NestedArray {
    /// Flatten in row-major order, checking the array is rectangular with
    /// the given shape.
    fn flatten(&self, shape: &[usize], name: &str) -> Result<Vec<f64>, FieldError> {
        let mut out = Vec::with_capacity(shape.iter().product());
        self.flatten_into(shape, name, &mut out)?;
        Ok(out)
    }

    fn flatten_into(&self, shape: &[usize], name: &str, out: &mut Vec<f64>) -> Result<(), FieldError> {
        match (self, shape.split_first()) {
            (NestedArray::Value(v), None) => {
                out.push(*v);
                Ok(())
            }
            (NestedArray::List(items), Some((&len, rest))) if items.len() == len => {
                for item in items {
                    item.flatten_into(rest, name, out)?;
                }
                Ok(())
            }
            _ => Err(FieldError::Malformed(format!(
                "component {name} does not match shape {shape:?}"
            ))),
        }
    }
}

impl FieldDocument {
    /// Validate and convert into a field.
    pub fn into_field(self) -> Result<VelocityField, FieldError> {
        let grid = Grid::new(self.x, self.y, self.z)?;
        let mut shape = grid.shape().to_vec();
        if let Some(times) = &self.times {
            shape.insert(0, times.len());
        }
        let components = Components {
            u: self.u.flatten(&shape, "u")?,
            v: self.v.flatten(&shape, "v")?,
            w: self.w.flatten(&shape, "w")?,
        };
        VelocityField::load(grid, components, self.times)
    }
}
