//! Multi-camera bundle-adjustment calibration core: projection models
//! with analytic Jacobians, state packing, measurement assembly, an
//! outlier-rejecting Levenberg-Marquardt solver driver, and a post-solve
//! intrinsic-uncertainty query.

pub mod assembly;
pub mod config;
pub mod distortion;
pub mod error;
pub mod observations;
pub mod pose;
pub mod problem;
pub mod projection;
pub mod solver;
pub mod state;
pub mod stats;
pub mod uncertainty;

pub use config::{OptimizeOpts, Roi, SolveTolerances};
pub use distortion::DistortionFamily;
pub use error::{CalibError, Result};
pub use observations::{FrameObservation, PointObservation};
pub use pose::Pose;
pub use problem::ProblemDetails;
pub use projection::Projection;
pub use solver::{SolveInputs, SolverContext};
pub use state::{Seed, StatePacker};
pub use stats::{IntrinsicCovariance, StatsReport};

use nalgebra::Vector3;

/// Projects one camera-frame point through `family`'s model with
/// optional derivatives. Thin wrapper over [`projection::project_point`].
pub fn project(
    p: &Vector3<f64>,
    family: DistortionFamily,
    intrinsics: &[f64],
    want_dp: bool,
    want_dintrinsics: bool,
) -> Result<Projection> {
    projection::project_point(p, family, intrinsics, want_dp, want_dintrinsics)
}

/// Batch form of [`project`].
pub fn project_many(
    points: &[Vector3<f64>],
    family: DistortionFamily,
    intrinsics: &[f64],
    want_dp: bool,
    want_dintrinsics: bool,
) -> Result<Vec<Projection>> {
    projection::project_many(points, family, intrinsics, want_dp, want_dintrinsics)
}

/// Nominal residual-row count for a problem with these shapes, before
/// any ROI or invalid-projection exclusion.
pub fn measurement_count(
    n_cameras: usize,
    n_board_kept: usize,
    point_observations: &[PointObservation],
    board_width: usize,
    details: &ProblemDetails,
    family: DistortionFamily,
) -> usize {
    assembly::measurement_count(n_cameras, n_board_kept, point_observations, board_width, details, family)
}

/// Parameter count for one camera's distortion block under `family`.
pub fn distortion_param_count(family: DistortionFamily) -> usize {
    distortion::distortion_param_count(family)
}

/// Names of every distortion family this crate supports.
pub fn supported_distortion_models() -> Vec<&'static str> {
    distortion::supported_distortion_models()
}

/// Picks the next distortion family on the path from `current` toward
/// `goal`, one step at a time.
pub fn next_distortion_model(current: DistortionFamily, goal: DistortionFamily) -> DistortionFamily {
    distortion::next_family(current, goal)
}

/// Estimates how much a hypothetical new observation at each ray, seen
/// by camera `i_camera`, would move the solution retained in `ctx`.
pub fn query_intrinsic_outlierness_at(
    rays: &[Vector3<f64>],
    i_camera: usize,
    intrinsics: &[f64],
    ctx: &SolverContext,
    n_outliers: usize,
) -> Result<Vec<f64>> {
    uncertainty::query_intrinsic_outlierness_at(rays, i_camera, intrinsics, ctx, n_outliers)
}

/// Runs the outer outlier-rejection loop around the NLLS solve,
/// mutating `seed` in place and returning a report of the final solve.
pub fn optimize(
    seed: &mut Seed,
    inputs: SolveInputs,
    details: ProblemDetails,
    family: DistortionFamily,
    opts: &OptimizeOpts,
    ctx: Option<&mut SolverContext>,
) -> Result<StatsReport> {
    solver::optimize(seed, inputs, details, family, opts, ctx)
}

/// Consumes and releases a solver context.
pub fn free_solver_context(ctx: SolverContext) {
    ctx.release();
}
