//! Solve tuning constants and per-call options, centralized in one
//! place rather than scattered as magic numbers through the assembly
//! code.

/// Numerically-tuned constants governing outlier rejection,
/// regularization weight, and NLLS convergence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveTolerances {
    /// Observation marked outlier when its reprojection error exceeds
    /// `outlier_k * median(errors)`.
    pub outlier_k: f64,
    /// Absolute floor (pixels) below which an observation is never
    /// flagged an outlier, regardless of `outlier_k * median`.
    pub outlier_floor_px: f64,
    /// Regularization weight relative to the per-pixel data weight.
    pub regularization_weight: f64,
    pub max_iterations: usize,
    pub gradient_tol: f64,
    pub step_tol: f64,
    pub residual_tol: f64,
}

impl Default for SolveTolerances {
    fn default() -> Self {
        SolveTolerances {
            outlier_k: 4.0,
            outlier_floor_px: 1.0,
            regularization_weight: 1e-3,
            max_iterations: 100,
            gradient_tol: 1e-10,
            step_tol: 1e-10,
            residual_tol: 1e-10,
        }
    }
}

/// Per-camera axis-aligned region of interest, in pixel coordinates.
/// Board observations whose observed pixel falls outside are excluded
/// from assembly for that outer iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub i_camera: usize,
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Roi {
    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x_min && px <= self.x_max && py >= self.y_min && py <= self.y_max
    }
}

/// Per-call knobs for `optimize`. The solver context is threaded
/// through as a separate `&mut SolverContext` argument rather than a
/// field here, so this module has no dependency on `solver.rs`.
#[derive(Debug, Clone, Default)]
pub struct OptimizeOpts {
    pub check_gradient: bool,
    pub verbose: bool,
    pub skip_outlier_rejection: bool,
    pub skipped_observations_board: Vec<usize>,
    pub skipped_observations_point: Vec<usize>,
    pub prior_outlier_indices: Vec<usize>,
    pub roi: Vec<Roi>,
    pub want_intrinsic_covariances: bool,
    pub tolerances: SolveTolerances,
}
