//! # Orientation Coverage Tracker
//!
//! Tracks which regions of orientation space have been visited during a trial. Orientations are
//! projected onto the unit sphere and accumulated on the nearest vertex of a fixed mesh, either as
//! heat (shown as a heatmap) or as a trace of the most recent points.
//!
//! One or two accumulators may run at once, each with its own projection.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod mesh;
mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub use mesh::*;
pub use params::*;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum number of simultaneous accumulators.
pub const MAX_ACCUMULATORS: usize = 2;

/// Projected vectors shorter than this can't be normalised.
const MIN_PROJECTION_NORM: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error("Mesh resolution {0} is too low, at least {} is required", MIN_RESOLUTION)]
    ResolutionTooLow(usize),

    #[error("Between 1 and {} projections must be tracked, got {0}", MAX_ACCUMULATORS)]
    InvalidProjectionCount(usize),

    #[error("Invalid coverage parameter: {0}")]
    InvalidParam(String),
}

/// How an orientation is mapped onto the unit sphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    /// Direction of the body's local +Z axis.
    Cartesian,

    /// Normalised vector part of the orientation quaternion.
    ///
    /// `q` and `-q` describe the same rotation but project to antipodal points, so a rotation
    /// near the point where the conversion flips the sign of `q` can jump across the sphere.
    Quaternion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverageMode {
    /// Accumulate heat on mesh vertices.
    Heatmap,

    /// Keep a fixed length trace of recent points.
    Trace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeatSubmode {
    /// Heat the nearest vertex on every update.
    Time,

    /// Heat the nearest vertex only when it differs from the previous update's.
    Return,
}

/// Change to an accumulator, published for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CoverageUpdate {
    Heat {
        accumulator: usize,
        vertex: usize,
        heat: f64,
    },
    Trace {
        accumulator: usize,
        point: Vector3<f64>,
    },
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State of one projection's accumulation.
#[derive(Debug, Clone)]
pub struct Accumulator {
    projection: Projection,
    heat: Vec<f64>,

    /// Vertex nearest to the previous point, used by the `Return` submode.
    last_vertex: Option<usize>,

    trace: VecDeque<Vector3<f64>>,
}

#[derive(Debug, Clone)]
pub struct OrientationCoverageTracker {
    params: CoverageParams,
    mesh: SphereMesh,
    accumulators: Vec<Accumulator>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Accumulator {
    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn heat(&self) -> &[f64] {
        &self.heat
    }

    pub fn trace(&self) -> &VecDeque<Vector3<f64>> {
        &self.trace
    }

    pub fn last_vertex(&self) -> Option<usize> {
        self.last_vertex
    }

    fn reset(&mut self) {
        self.heat.iter_mut().for_each(|h| *h = 0.0);
        self.last_vertex = None;
        self.trace.clear();
    }
}

impl OrientationCoverageTracker {
    pub fn new(params: CoverageParams) -> Result<Self, CoverageError> {
        let num_projections = params.projections.len();
        if num_projections == 0 || num_projections > MAX_ACCUMULATORS {
            return Err(CoverageError::InvalidProjectionCount(num_projections));
        }
        if !(params.heat_max > 0.0) {
            return Err(CoverageError::InvalidParam(format!(
                "heat_max must be positive, got {}",
                params.heat_max
            )));
        }
        if params.mode == CoverageMode::Trace && params.trace_capacity == 0 {
            return Err(CoverageError::InvalidParam(String::from(
                "trace_capacity must be at least 1",
            )));
        }

        let mesh = SphereMesh::new(params.mesh_resolution)?;

        let accumulators = params
            .projections
            .iter()
            .map(|&projection| Accumulator {
                projection,
                heat: vec![0.0; mesh.num_vertices()],
                last_vertex: None,
                trace: VecDeque::with_capacity(params.trace_capacity),
            })
            .collect();

        debug!(
            "Coverage tracker initialised with {} vertices and projections {:?}",
            mesh.num_vertices(),
            params.projections
        );

        Ok(Self {
            params,
            mesh,
            accumulators,
        })
    }

    pub fn mesh(&self) -> &SphereMesh {
        &self.mesh
    }

    pub fn params(&self) -> &CoverageParams {
        &self.params
    }

    pub fn accumulators(&self) -> &[Accumulator] {
        &self.accumulators
    }

    /// Project the orientation for every accumulator and add it.
    ///
    /// Returns the changes made. Accumulators whose projection is undefined for this orientation
    /// are left untouched.
    pub fn update(&mut self, rotation: &Matrix3<f64>) -> Vec<CoverageUpdate> {
        let projections: Vec<Projection> =
            self.accumulators.iter().map(|a| a.projection).collect();

        projections
            .into_iter()
            .enumerate()
            .filter_map(|(i, projection)| {
                project(rotation, projection).and_then(|p| self.update_point(i, &p))
            })
            .collect()
    }

    /// Add an already projected point to the given accumulator.
    ///
    /// Returns `None` if nothing changed.
    pub fn update_point(&mut self, index: usize, point: &Vector3<f64>) -> Option<CoverageUpdate> {
        let vertex = self.mesh.nearest(point)?;
        let params = &self.params;
        let acc = self.accumulators.get_mut(index)?;

        match params.mode {
            CoverageMode::Trace => {
                if acc.trace.len() >= params.trace_capacity {
                    acc.trace.pop_front();
                }
                acc.trace.push_back(*point);

                Some(CoverageUpdate::Trace {
                    accumulator: index,
                    point: *point,
                })
            }
            CoverageMode::Heatmap => {
                let step = match params.heat_submode {
                    HeatSubmode::Time => params.time_step,
                    HeatSubmode::Return if acc.last_vertex != Some(vertex) => params.return_step,
                    HeatSubmode::Return => 0.0,
                };
                acc.last_vertex = Some(vertex);

                let heat = &mut acc.heat[vertex];
                if step > 0.0 && *heat < params.heat_max {
                    *heat = (*heat + step).min(params.heat_max);

                    Some(CoverageUpdate::Heat {
                        accumulator: index,
                        vertex,
                        heat: *heat,
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Zero all heat and clear all traces.
    pub fn reset(&mut self) {
        self.accumulators.iter_mut().for_each(Accumulator::reset);
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Project an orientation onto the unit sphere.
///
/// Returns `None` if the projection is undefined, which happens for the quaternion projection of
/// the identity rotation.
pub fn project(rotation: &Matrix3<f64>, projection: Projection) -> Option<Vector3<f64>> {
    let v = match projection {
        Projection::Cartesian => rotation * Vector3::z(),
        Projection::Quaternion => {
            let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
                *rotation,
            ));
            q.imag()
        }
    };

    let norm = v.norm();
    if norm.is_finite() && norm > MIN_PROJECTION_NORM {
        Some(v / norm)
    } else {
        None
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn params(mode: CoverageMode, heat_submode: HeatSubmode) -> CoverageParams {
        CoverageParams {
            mesh_resolution: 12,
            heat_max: 10.0,
            mode,
            heat_submode,
            trace_capacity: 3,
            ..Default::default()
        }
    }

    fn rot_x(angle: f64) -> Matrix3<f64> {
        Rotation3::from_axis_angle(&Vector3::x_axis(), angle).into_inner()
    }

    #[test]
    fn test_projections() {
        let p = project(&Matrix3::identity(), Projection::Cartesian).unwrap();
        assert!((p - Vector3::z()).norm() < 1e-12);

        // Rotating +Z by 90 degrees about X gives -Y
        let p = project(&rot_x(FRAC_PI_2), Projection::Cartesian).unwrap();
        assert!((p - -Vector3::y()).norm() < 1e-12);

        // The quaternion vector part lies along the rotation axis
        let p = project(&rot_x(0.3), Projection::Quaternion).unwrap();
        assert!((p.abs() - Vector3::x()).norm() < 1e-9);

        assert_eq!(project(&Matrix3::identity(), Projection::Quaternion), None);
        assert_eq!(
            project(&Matrix3::from_element(f64::NAN), Projection::Cartesian),
            None
        );
    }

    #[test]
    fn test_time_submode() {
        let mut tracker =
            OrientationCoverageTracker::new(params(CoverageMode::Heatmap, HeatSubmode::Time))
                .unwrap();
        let r = Matrix3::identity();

        for i in 1..=3 {
            let updates = tracker.update(&r);
            assert_eq!(
                updates,
                vec![CoverageUpdate::Heat {
                    accumulator: 0,
                    vertex: 0,
                    heat: 2.0 * i as f64
                }]
            );
        }

        // Heat saturates at the colormap maximum
        for _ in 0..10 {
            tracker.update(&r);
        }
        assert_eq!(tracker.accumulators()[0].heat()[0], 10.0);
        assert!(tracker.update(&r).is_empty());
    }

    #[test]
    fn test_return_submode() {
        let mut tracker =
            OrientationCoverageTracker::new(params(CoverageMode::Heatmap, HeatSubmode::Return))
                .unwrap();
        let a = Matrix3::identity();
        let b = rot_x(FRAC_PI_2);

        assert_eq!(tracker.update(&a).len(), 1);

        // Dwelling does not add heat
        assert!(tracker.update(&a).is_empty());
        assert!(tracker.update(&a).is_empty());
        assert_eq!(tracker.accumulators()[0].heat()[0], 1.0);

        // Leaving and re-entering does
        assert_eq!(tracker.update(&b).len(), 1);
        assert_eq!(tracker.update(&a).len(), 1);
        assert_eq!(tracker.accumulators()[0].heat()[0], 2.0);
    }

    #[test]
    fn test_heat_non_decreasing() {
        let mut tracker =
            OrientationCoverageTracker::new(params(CoverageMode::Heatmap, HeatSubmode::Time))
                .unwrap();
        let mut prev = tracker.accumulators()[0].heat().to_vec();

        for i in 0..200 {
            tracker.update(&rot_x(i as f64 * 0.07));
            let heat = tracker.accumulators()[0].heat();
            assert!(heat.iter().zip(prev.iter()).all(|(h, p)| h >= p));
            assert!(heat.iter().all(|&h| h <= 10.0));
            prev = heat.to_vec();
        }

        tracker.reset();
        assert!(tracker.accumulators()[0].heat().iter().all(|&h| h == 0.0));
        assert_eq!(tracker.accumulators()[0].last_vertex(), None);
    }

    #[test]
    fn test_trace() {
        let mut tracker =
            OrientationCoverageTracker::new(params(CoverageMode::Trace, HeatSubmode::Time))
                .unwrap();

        for i in 0..5 {
            tracker.update(&rot_x(i as f64 * 0.1));
        }

        let trace = tracker.accumulators()[0].trace();
        assert_eq!(trace.len(), 3);

        // The oldest points were dropped
        let expected = project(&rot_x(0.2), Projection::Cartesian).unwrap();
        assert!((trace[0] - expected).norm() < 1e-12);
        assert!(tracker.accumulators()[0].heat().iter().all(|&h| h == 0.0));

        tracker.reset();
        assert!(tracker.accumulators()[0].trace().is_empty());
    }

    #[test]
    fn test_two_accumulators() {
        let mut p = params(CoverageMode::Heatmap, HeatSubmode::Time);
        p.projections = vec![Projection::Cartesian, Projection::Quaternion];
        let mut tracker = OrientationCoverageTracker::new(p).unwrap();

        // Identity has no quaternion projection, only the first accumulator changes
        assert_eq!(tracker.update(&Matrix3::identity()).len(), 1);
        assert_eq!(tracker.update(&rot_x(1.0)).len(), 2);

        let total: Vec<f64> = tracker
            .accumulators()
            .iter()
            .map(|a| a.heat().iter().sum())
            .collect();
        assert_eq!(total, vec![4.0, 2.0]);
    }

    #[test]
    fn test_invalid_params() {
        let mut p = CoverageParams::default();
        p.projections = vec![];
        assert!(matches!(
            OrientationCoverageTracker::new(p),
            Err(CoverageError::InvalidProjectionCount(0))
        ));

        let mut p = CoverageParams::default();
        p.projections = vec![Projection::Cartesian; 3];
        assert!(OrientationCoverageTracker::new(p).is_err());

        let mut p = CoverageParams::default();
        p.mesh_resolution = 1;
        assert!(matches!(
            OrientationCoverageTracker::new(p),
            Err(CoverageError::ResolutionTooLow(1))
        ));
    }
}
