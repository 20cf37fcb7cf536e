//! # Sphere mesh
//!
//! Latitude/longitude triangulation of the unit sphere. Each pole is a single vertex and every
//! ring vertex is stored once, so heat accumulated on a vertex is never split between duplicates.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector3;
use ordered_float::OrderedFloat;
use std::f64::consts::PI;

use super::CoverageError;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Lowest resolution which still produces a closed triangulation.
pub const MIN_RESOLUTION: usize = 3;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SphereMesh {
    resolution: usize,
    vertices: Vec<Vector3<f64>>,
    faces: Vec<[usize; 3]>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SphereMesh {
    /// Build a mesh with `resolution` latitude bands and `resolution` longitude segments.
    pub fn new(resolution: usize) -> Result<Self, CoverageError> {
        if resolution < MIN_RESOLUTION {
            return Err(CoverageError::ResolutionTooLow(resolution));
        }

        let stacks = resolution;
        let slices = resolution;
        let num_rings = stacks - 1;

        let mut vertices = Vec::with_capacity(2 + num_rings * slices);

        // North pole, then rings from north to south, then the south pole
        vertices.push(Vector3::z());
        for i in 1..stacks {
            let theta = PI * i as f64 / stacks as f64;
            for j in 0..slices {
                let phi = 2.0 * PI * j as f64 / slices as f64;
                vertices.push(Vector3::new(
                    theta.sin() * phi.cos(),
                    theta.sin() * phi.sin(),
                    theta.cos(),
                ));
            }
        }
        vertices.push(-Vector3::z());

        let north = 0;
        let south = vertices.len() - 1;
        let ring = |i: usize, j: usize| 1 + (i - 1) * slices + (j % slices);

        let mut faces = Vec::with_capacity(2 * slices * num_rings);

        for j in 0..slices {
            faces.push([north, ring(1, j), ring(1, j + 1)]);
        }
        for i in 1..num_rings {
            for j in 0..slices {
                faces.push([ring(i, j), ring(i + 1, j), ring(i + 1, j + 1)]);
                faces.push([ring(i, j), ring(i + 1, j + 1), ring(i, j + 1)]);
            }
        }
        for j in 0..slices {
            faces.push([south, ring(num_rings, j + 1), ring(num_rings, j)]);
        }

        Ok(Self {
            resolution,
            vertices,
            faces,
        })
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Index of the vertex closest to `point`, or `None` if the point isn't finite.
    pub fn nearest(&self, point: &Vector3<f64>) -> Option<usize> {
        if !point.iter().all(|v| v.is_finite()) {
            return None;
        }

        self.vertices
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| OrderedFloat((*v - point).norm_squared()))
            .map(|(i, _)| i)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_mesh_properties() {
        for res in [3, 4, 10, 40].iter() {
            let mesh = SphereMesh::new(*res).unwrap();
            let v = mesh.num_vertices();

            assert_eq!(v, 2 + (res - 1) * res);

            // A closed triangulated sphere has F = 2V - 4
            assert_eq!(mesh.faces().len(), 2 * v - 4);

            for p in mesh.vertices() {
                assert!((p.norm() - 1.0).abs() < 1e-12);
            }

            // Every edge is shared by exactly two faces
            let mut edges = std::collections::HashMap::new();
            for f in mesh.faces() {
                assert!(f.iter().all(|&i| i < v));
                for k in 0..3 {
                    let (a, b) = (f[k], f[(k + 1) % 3]);
                    *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
                }
            }
            assert!(edges.values().all(|&n| n == 2));

            // Every vertex is used
            let used: HashSet<usize> = mesh.faces().iter().flat_map(|f| f.iter().copied()).collect();
            assert_eq!(used.len(), v);
        }
    }

    #[test]
    fn test_resolution_too_low() {
        assert!(matches!(
            SphereMesh::new(2),
            Err(CoverageError::ResolutionTooLow(2))
        ));
    }

    #[test]
    fn test_nearest() {
        let mesh = SphereMesh::new(10).unwrap();

        assert_eq!(mesh.nearest(&Vector3::z()), Some(0));
        assert_eq!(mesh.nearest(&-Vector3::z()), Some(mesh.num_vertices() - 1));
        assert_eq!(mesh.nearest(&Vector3::new(0.0, 0.0, 0.9)), Some(0));
        assert_eq!(mesh.nearest(&Vector3::new(f64::NAN, 0.0, 1.0)), None);

        // The nearest vertex is at least as close as every other vertex
        let p = Vector3::new(0.3, -0.5, 0.2).normalize();
        let n = mesh.nearest(&p).unwrap();
        let d = (mesh.vertices()[n] - p).norm();
        assert!(mesh.vertices().iter().all(|v| (v - p).norm() >= d));
    }
}
