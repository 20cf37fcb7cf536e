//! Parameters structure for the coverage tracker

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use super::{CoverageMode, HeatSubmode, Projection};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the orientation coverage tracker.
#[derive(Debug, Clone, Deserialize)]
pub struct CoverageParams {
    // ---- MESH ----
    /// Number of latitude bands and of longitude segments of the sphere mesh.
    pub mesh_resolution: usize,

    /// Upper end of the colormap. Vertex heat never exceeds this.
    pub heat_max: f64,

    // ---- ACCUMULATION ----
    pub mode: CoverageMode,

    pub heat_submode: HeatSubmode,

    /// Heat added per update in `Time` submode.
    pub time_step: f64,

    /// Heat added on entering a vertex in `Return` submode.
    pub return_step: f64,

    /// Number of points kept in `Trace` mode.
    pub trace_capacity: usize,

    /// Projections tracked, one accumulator each. One or two entries.
    pub projections: Vec<Projection>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for CoverageParams {
    fn default() -> Self {
        Self {
            mesh_resolution: 40,
            heat_max: 100.0,
            mode: CoverageMode::Heatmap,
            heat_submode: HeatSubmode::Time,
            time_step: 2.0,
            return_step: 1.0,
            trace_capacity: 200,
            projections: vec![Projection::Cartesian],
        }
    }
}
