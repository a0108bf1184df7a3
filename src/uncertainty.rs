//! Uncertainty query: reuses the retained `JᵀJ` factor from a
//! converged solve to estimate how much a hypothetical new observation
//! at a given ray would move the solution.

use nalgebra::{DMatrix, Vector3};

use crate::error::{CalibError, Result};
use crate::projection::project_point;
use crate::solver::SolverContext;

/// For each ray, projects it through `intrinsics` with `ctx`'s
/// distortion family to get the 2xN_intrinsics Jacobian restricted to
/// the columns that were free at solve time for camera `i_camera`, then
/// computes `trace(Jv (JᵀJ)⁻¹ Jvᵀ)` via the cached Cholesky factor
/// without re-factoring. The column offset is derived from `i_camera`
/// and the retained solve's camera layout rather than taken from the
/// caller, so a query against one camera can't be pointed at another
/// camera's columns by mistake.
pub fn query_intrinsic_outlierness_at(
    rays: &[Vector3<f64>],
    i_camera: usize,
    intrinsics: &[f64],
    ctx: &SolverContext,
    n_outliers: usize,
) -> Result<Vec<f64>> {
    let factor = ctx.factor().ok_or(CalibError::InvalidContext)?;
    let n_free = ctx.n_intrinsics_free();
    if n_free == 0 {
        return Err(CalibError::InvalidContext);
    }
    let intrinsics_col_offset = ctx.intrinsics_col_offset(i_camera).ok_or(CalibError::InvalidContext)?;
    let details = ctx.details();
    let core_width = crate::distortion::N_INTRINSICS_CORE;

    let n_state = factor.l().ncols();
    let dof_correction = effective_dof_correction(n_outliers, n_state);

    let mut traces = Vec::with_capacity(rays.len());
    for ray in rays {
        let proj = project_point(ray, ctx.family(), intrinsics, false, true)?;
        let d_dintr = proj
            .d_dintrinsics
            .ok_or_else(|| CalibError::InvalidArgument("projection produced no intrinsic jacobian".to_string()))?;

        // d_dintr's columns are always [core(4), distortion(Nd)] in that
        // order; only copy the sub-ranges that were actually free at
        // solve time, since those are the only ones with JᵀJ columns.
        let mut jv = DMatrix::<f64>::zeros(2, n_state);
        for r in 0..2 {
            let mut col = intrinsics_col_offset;
            if details.optimize_intrinsic_core {
                for k in 0..core_width {
                    jv[(r, col + k)] = d_dintr[(r, k)];
                }
                col += core_width;
            }
            if details.optimize_intrinsic_distortions {
                for k in 0..(d_dintr.ncols() - core_width) {
                    jv[(r, col + k)] = d_dintr[(r, core_width + k)];
                }
            }
        }

        let mut trace = 0.0;
        for r in 0..2 {
            let row = jv.row(r).transpose();
            let solved = factor.solve(&row);
            trace += row.dot(&solved);
        }
        traces.push(trace * dof_correction);
    }

    Ok(traces)
}

/// Scales the raw trace by `N / (N - Noutliers)`-style correction so
/// that the effective degrees of freedom after outlier rejection are
/// reflected in the reported outlierness.
fn effective_dof_correction(n_outliers: usize, n_state: usize) -> f64 {
    let denom = (n_state as f64 - n_outliers as f64).max(1.0);
    n_state as f64 / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distortion::DistortionFamily;
    use crate::problem::ProblemDetails;

    #[test]
    fn query_fails_without_a_retained_factor() {
        let ctx = SolverContext::empty(DistortionFamily::None, ProblemDetails::all_on());
        let rays = vec![Vector3::new(0.0, 0.0, 1.0)];
        let intrinsics = [1000.0, 1000.0, 500.0, 500.0];
        let result = query_intrinsic_outlierness_at(&rays, 0, &intrinsics, &ctx, 0);
        assert!(result.is_err());
    }

    #[test]
    fn query_fails_for_an_out_of_range_camera_index() {
        let ctx = SolverContext::empty(DistortionFamily::None, ProblemDetails::all_on());
        let rays = vec![Vector3::new(0.0, 0.0, 1.0)];
        let intrinsics = [1000.0, 1000.0, 500.0, 500.0];
        let result = query_intrinsic_outlierness_at(&rays, 5, &intrinsics, &ctx, 0);
        assert!(result.is_err());
    }

    #[test]
    fn dof_correction_is_at_least_one() {
        assert!(effective_dof_correction(0, 10) >= 1.0);
        assert!(effective_dof_correction(5, 10) > effective_dof_correction(0, 10));
    }
}
