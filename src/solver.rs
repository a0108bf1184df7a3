//! Solver driver: the outer outlier-rejection loop around the external
//! NLLS driver (`levenberg-marquardt`), plus the persistent
//! `SolverContext` that retains the factored normal equations for later
//! uncertainty queries.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn, Owned};

use crate::assembly::{Assembler, RowGroup};
use crate::config::OptimizeOpts;
use crate::distortion::DistortionFamily;
use crate::error::{CalibError, Result};
use crate::observations::{FrameObservation, PointObservation};
use crate::problem::ProblemDetails;
use crate::stats::{IntrinsicCovariance, StatsReport};
use crate::state::{Seed, StatePacker};

/// Opaque, caller-owned object retaining the factored `JᵀJ` from the
/// last converged solve. `None` until a solve populates it;
/// `release()`/`Drop` model the explicit-lifetime ownership a
/// long-lived solver handle needs.
pub struct SolverContext {
    family: DistortionFamily,
    details: ProblemDetails,
    factor: Option<Cholesky<f64, Dyn>>,
    n_intrinsics_free: usize,
    n_cameras: usize,
    /// Column offset of camera 0's first free intrinsic parameter in
    /// the packed state vector; camera `i`'s block starts at
    /// `intrinsics_base_offset + i * n_intrinsics_free`.
    intrinsics_base_offset: usize,
    released: bool,
}

impl SolverContext {
    pub fn empty(family: DistortionFamily, details: ProblemDetails) -> Self {
        SolverContext {
            family,
            details,
            factor: None,
            n_intrinsics_free: 0,
            n_cameras: 0,
            intrinsics_base_offset: 0,
            released: false,
        }
    }

    pub fn has_factor(&self) -> bool {
        self.factor.is_some()
    }

    pub fn family(&self) -> DistortionFamily {
        self.family
    }

    pub fn details(&self) -> ProblemDetails {
        self.details
    }

    pub(crate) fn factor(&self) -> Option<&Cholesky<f64, Dyn>> {
        self.factor.as_ref()
    }

    pub(crate) fn n_intrinsics_free(&self) -> usize {
        self.n_intrinsics_free
    }

    pub(crate) fn n_cameras(&self) -> usize {
        self.n_cameras
    }

    /// Column offset of the given camera's free intrinsic block, or
    /// `None` if the index is out of range for the retained solve.
    pub(crate) fn intrinsics_col_offset(&self, i_camera: usize) -> Option<usize> {
        if i_camera >= self.n_cameras {
            return None;
        }
        Some(self.intrinsics_base_offset + i_camera * self.n_intrinsics_free)
    }

    /// Explicit release. After this the context reads back as empty.
    pub fn release(mut self) {
        self.released = true;
        self.factor = None;
    }
}

impl Drop for SolverContext {
    fn drop(&mut self) {
        if !self.released && self.factor.is_some() {
            log::debug!("SolverContext dropped without an explicit release()");
        }
    }
}

pub struct SolveInputs<'a> {
    pub board_obs: Vec<FrameObservation>,
    pub point_obs: Vec<PointObservation>,
    pub board_spacing: f64,
    pub board_width: usize,
    pub sigma: f64,
    pub imager_sizes: &'a [(f64, f64)],
}

/// Runs the outer outlier-rejection loop to convergence, mutating
/// `seed` in place and returning a report of the final solve.
pub fn optimize(
    seed: &mut Seed,
    mut inputs: SolveInputs,
    details: ProblemDetails,
    family: DistortionFamily,
    opts: &OptimizeOpts,
    ctx: Option<&mut SolverContext>,
) -> Result<StatsReport> {
    if inputs.sigma <= 0.0 {
        return Err(CalibError::InvalidArgument("sigma must be > 0".to_string()));
    }
    if details.is_none() {
        return Err(CalibError::InvalidArgument(
            "ProblemDetails selects no free variable group".to_string(),
        ));
    }
    crate::observations::validate_board_order(&inputs.board_obs)?;
    crate::observations::validate_point_order(&inputs.point_obs)?;
    crate::observations::validate_skip_list(&opts.skipped_observations_board)?;
    crate::observations::validate_skip_list(&opts.skipped_observations_point)?;

    for &i in &opts.skipped_observations_board {
        if let Some(o) = inputs.board_obs.get_mut(i) {
            o.skip_observation = true;
        }
    }
    for &i in &opts.skipped_observations_point {
        if let Some(o) = inputs.point_obs.get_mut(i) {
            o.skip_observation = true;
        }
    }
    crate::observations::derive_frame_skips(&mut inputs.board_obs);
    crate::observations::derive_point_skips(&mut inputs.point_obs);

    let packer = StatePacker::new(
        seed.n_cameras(),
        seed.frames.len(),
        seed.points.len(),
        family,
        details,
        inputs.imager_sizes,
    )?;

    let assembler = Assembler {
        board_spacing: inputs.board_spacing,
        board_width: inputs.board_width,
        sigma: inputs.sigma,
        regularization_weight: opts.tolerances.regularization_weight,
        imager_sizes: inputs.imager_sizes,
        roi: &opts.roi,
    };

    if opts.check_gradient {
        return check_gradient(seed, &packer, &assembler, &inputs);
    }

    let mut board_obs = inputs.board_obs;
    let mut n_outliers = opts.prior_outlier_indices.len();
    // Tracked independently of `skip_observation`: that flag is also set
    // by the caller-supplied `skipped_observations_board` list, which
    // are not outliers and must not appear in `StatsReport.outlier_indices`
    // or count towards `n_outliers`.
    let mut outlier_indices = opts.prior_outlier_indices.clone();
    for &i in &opts.prior_outlier_indices {
        if let Some(o) = board_obs.get_mut(i) {
            o.skip_observation = true;
        }
    }

    loop {
        let x0 = packer.pack(seed)?;
        let problem = BundleProblem::new(seed.clone(), &packer, &assembler, &board_obs, &inputs.point_obs, x0)?;

        let lm = LevenbergMarquardt::new()
            .with_patience(opts.tolerances.max_iterations as u32)
            .with_gtol(opts.tolerances.gradient_tol)
            .with_xtol(opts.tolerances.step_tol)
            .with_ftol(opts.tolerances.residual_tol);
        let (solved, report) = lm.minimize(problem);

        if !matches!(
            report.termination,
            levenberg_marquardt::TerminationReason::Converged { .. }
        ) && !opts.skip_outlier_rejection
        {
            log::warn!("NLLS driver did not converge: {:?}", report.termination);
        } else if opts.verbose {
            log::info!("NLLS driver terminated: {:?}", report.termination);
        }

        packer.unpack(&solved.x, seed)?;

        let assembled = assembler.assemble(seed, &packer, &board_obs, &inputs.point_obs, true)?;
        let per_obs_errors = per_observation_pixel_errors(&assembled, inputs.sigma);

        if opts.skip_outlier_rejection {
            outlier_indices.sort_unstable();
            let stats = finish(
                &assembled,
                &packer,
                inputs.sigma,
                outlier_indices,
                n_outliers,
                opts,
                ctx,
                family,
                details,
                true,
            )?;
            return Ok(stats);
        }

        let errors: Vec<f64> = per_obs_errors.iter().map(|(_, e)| *e).collect();
        let threshold = outlier_threshold(&errors, &opts.tolerances);

        let mut newly_marked = false;
        for (obs_index, err) in &per_obs_errors {
            if *err > threshold && !board_obs[*obs_index].skip_observation {
                board_obs[*obs_index].skip_observation = true;
                newly_marked = true;
                n_outliers += 1;
                outlier_indices.push(*obs_index);
            }
        }
        crate::observations::derive_frame_skips(&mut board_obs);

        if !newly_marked {
            outlier_indices.sort_unstable();
            let converged = matches!(
                report.termination,
                levenberg_marquardt::TerminationReason::Converged { .. }
            );
            let stats = finish(
                &assembled,
                &packer,
                inputs.sigma,
                outlier_indices,
                n_outliers,
                opts,
                ctx,
                family,
                details,
                converged,
            )?;
            return Ok(stats);
        }
        log::debug!("outlier rejection: {n_outliers} observations marked so far");
    }
}

#[allow(clippy::too_many_arguments)]
fn finish(
    assembled: &crate::assembly::AssembledProblem,
    packer: &StatePacker,
    sigma: f64,
    outlier_indices: Vec<usize>,
    n_outliers: usize,
    opts: &OptimizeOpts,
    ctx: Option<&mut SolverContext>,
    family: DistortionFamily,
    details: ProblemDetails,
    converged: bool,
) -> Result<StatsReport> {
    let rms = reprojection_rms_pixels(assembled, sigma);

    let mut covariances = None;
    if let Some(ctx) = ctx {
        let jac = assembled
            .jacobian
            .as_ref()
            .ok_or_else(|| CalibError::NumericalFailure {
                message: "no Jacobian retained to factor".to_string(),
                partial: Box::new(StatsReport::empty()),
            })?;
        let jtj = jac.transpose() * jac;
        match Cholesky::new(jtj) {
            Some(chol) => {
                if opts.want_intrinsic_covariances {
                    covariances = Some(per_camera_intrinsic_covariances(&chol, packer, family, details));
                }
                ctx.n_cameras = packer.n_cameras();
                ctx.intrinsics_base_offset = packer
                    .camera_core_offset(0)
                    .or_else(|| packer.camera_distortion_offset(0))
                    .unwrap_or(0);
                ctx.factor = Some(chol);
                ctx.family = family;
                ctx.details = details;
                ctx.n_intrinsics_free = details.intrinsic_optimization_width(family);
                ctx.released = false;
            }
            None => {
                return Err(CalibError::NumericalFailure {
                    message: "JᵀJ is not positive definite; cannot factor".to_string(),
                    partial: Box::new(StatsReport {
                        rms_reproj_error_pixels: rms,
                        n_outliers,
                        outlier_indices: Vec::new(),
                        residuals: assembled.residuals.iter().copied().collect(),
                        converged: false,
                        intrinsic_covariances: None,
                    }),
                });
            }
        }
    }

    Ok(StatsReport {
        rms_reproj_error_pixels: rms,
        n_outliers,
        outlier_indices,
        residuals: assembled.residuals.iter().copied().collect(),
        converged,
        intrinsic_covariances: covariances,
    })
}

/// Extracts each camera's intrinsic covariance block from `(JᵀJ)⁻¹` via
/// the retained Cholesky factor, restricted to whichever intrinsic
/// columns (core and/or distortion) were free at solve time.
fn per_camera_intrinsic_covariances(
    factor: &Cholesky<f64, Dyn>,
    packer: &StatePacker,
    family: DistortionFamily,
    details: ProblemDetails,
) -> Vec<IntrinsicCovariance> {
    let width = details.intrinsic_optimization_width(family);
    if width == 0 {
        return Vec::new();
    }
    let inv = factor.inverse();
    (0..packer.n_cameras())
        .filter_map(|cam| {
            let offset = packer
                .camera_core_offset(cam)
                .or_else(|| packer.camera_distortion_offset(cam))?;
            let block = inv.view((offset, offset), (width, width));
            let covariance: Vec<f64> = block.iter().copied().collect();
            Some(IntrinsicCovariance {
                i_camera: cam,
                covariance,
                width,
            })
        })
        .collect()
}

/// Unweighted reprojection RMS in pixels, over board and point pixel
/// rows only. Regularization rows and point range rows are excluded:
/// they aren't reprojection error and don't share its units, and
/// including them (as the raw weighted residual vector does) reports a
/// number that is neither pixels nor a pure reprojection metric. Point
/// groups may carry a trailing range row alongside their 2 pixel rows,
/// so only the first 2 rows of each `Point` group are counted.
fn reprojection_rms_pixels(assembled: &crate::assembly::AssembledProblem, sigma: f64) -> f64 {
    let mut sum_sq = 0.0;
    let mut n = 0usize;
    for g in &assembled.row_groups {
        match g {
            RowGroup::Board { row_start, row_count, .. } => {
                for k in 0..*row_count {
                    let v = assembled.residuals[row_start + k] * sigma;
                    sum_sq += v * v;
                }
                n += row_count;
            }
            RowGroup::Point { row_start, row_count, .. } => {
                let pixel_rows = (*row_count).min(2);
                for k in 0..pixel_rows {
                    let v = assembled.residuals[row_start + k] * sigma;
                    sum_sq += v * v;
                }
                n += pixel_rows;
            }
            RowGroup::Regularization { .. } => {}
        }
    }
    if n == 0 {
        return 0.0;
    }
    (sum_sq / n as f64).sqrt()
}

/// Per-board-observation RMS pixel error (unweighted, i.e. back in
/// pixel units) across its kept vertices, used for outlier scoring.
fn per_observation_pixel_errors(
    assembled: &crate::assembly::AssembledProblem,
    sigma: f64,
) -> Vec<(usize, f64)> {
    assembled
        .row_groups
        .iter()
        .filter_map(|g| match g {
            RowGroup::Board {
                obs_index,
                row_start,
                row_count,
            } => {
                let sum_sq: f64 = (0..*row_count)
                    .map(|k| {
                        let v = assembled.residuals[row_start + k] * sigma;
                        v * v
                    })
                    .sum();
                let n_pairs = row_count / 2;
                let rms = if n_pairs > 0 {
                    (sum_sq / n_pairs as f64).sqrt()
                } else {
                    0.0
                };
                Some((*obs_index, rms))
            }
            _ => None,
        })
        .collect()
}

fn outlier_threshold(errors: &[f64], tolerances: &crate::config::SolveTolerances) -> f64 {
    if errors.is_empty() {
        return f64::INFINITY;
    }
    let mut sorted = errors.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = sorted[sorted.len() / 2];
    (tolerances.outlier_k * median).max(tolerances.outlier_floor_px)
}

fn check_gradient(
    seed: &Seed,
    packer: &StatePacker,
    assembler: &Assembler,
    inputs: &SolveInputs,
) -> Result<StatsReport> {
    let x0 = packer.pack(seed)?;
    let base = assembler.assemble(seed, packer, &inputs.board_obs, &inputs.point_obs, true)?;
    let rms = reprojection_rms_pixels(&base, assembler.sigma);
    let analytic = base.jacobian.ok_or_else(|| CalibError::NumericalFailure {
        message: "no analytic jacobian produced".to_string(),
        partial: Box::new(StatsReport::empty()),
    })?;

    let h = 1e-6;
    let mut max_rel_err = 0.0_f64;
    for c in 0..x0.len() {
        let mut plus_seed = seed.clone();
        let mut minus_seed = seed.clone();
        let mut xp = x0.clone();
        xp[c] += h;
        packer.unpack(&xp, &mut plus_seed)?;
        let mut xm = x0.clone();
        xm[c] -= h;
        packer.unpack(&xm, &mut minus_seed)?;

        let rp = assembler.assemble(&plus_seed, packer, &inputs.board_obs, &inputs.point_obs, false)?;
        let rm = assembler.assemble(&minus_seed, packer, &inputs.board_obs, &inputs.point_obs, false)?;

        for r in 0..rp.residuals.len().min(rm.residuals.len()) {
            let numeric = (rp.residuals[r] - rm.residuals[r]) / (2.0 * h);
            let a = analytic[(r, c)];
            let denom = numeric.abs().max(a.abs()).max(1e-9);
            let rel = (numeric - a).abs() / denom;
            if rel > max_rel_err {
                max_rel_err = rel;
            }
        }
    }

    log::debug!("check_gradient: max relative error = {max_rel_err}");
    Ok(StatsReport {
        rms_reproj_error_pixels: rms,
        n_outliers: 0,
        outlier_indices: Vec::new(),
        residuals: vec![max_rel_err],
        converged: true,
        intrinsic_covariances: None,
    })
}

/// Wraps the `Assembler`/`Seed` pair as a `levenberg_marquardt`
/// problem, recomputing the residual/Jacobian whenever the driver
/// updates the parameter vector.
struct BundleProblem<'a> {
    seed: Seed,
    packer: &'a StatePacker,
    assembler: &'a Assembler<'a>,
    board_obs: &'a [FrameObservation],
    point_obs: &'a [PointObservation],
    x: DVector<f64>,
    cached: Option<crate::assembly::AssembledProblem>,
}

impl<'a> BundleProblem<'a> {
    /// Builds the problem and eagerly populates `cached` so the NLLS
    /// driver sees a valid residual/Jacobian pair before its first
    /// `set_params` call (mirrors `bundle-adj`'s constructor, which
    /// calls `set_params` once right after assembling `Self`).
    fn new(
        seed: Seed,
        packer: &'a StatePacker,
        assembler: &'a Assembler<'a>,
        board_obs: &'a [FrameObservation],
        point_obs: &'a [PointObservation],
        x: DVector<f64>,
    ) -> Result<Self> {
        let mut problem = BundleProblem {
            seed,
            packer,
            assembler,
            board_obs,
            point_obs,
            x,
            cached: None,
        };
        problem.recompute()?;
        Ok(problem)
    }

    fn recompute(&mut self) -> Result<()> {
        self.packer.unpack(&self.x, &mut self.seed)?;
        self.cached = Some(self.assembler.assemble(
            &self.seed,
            self.packer,
            self.board_obs,
            self.point_obs,
            true,
        )?);
        Ok(())
    }
}

impl<'a> LeastSquaresProblem<f64, Dyn, Dyn> for BundleProblem<'a> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.x = x.clone();
        if self.recompute().is_err() {
            self.cached = None;
        }
    }

    fn params(&self) -> DVector<f64> {
        self.x.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.cached.as_ref().map(|c| c.residuals.clone())
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        self.cached.as_ref().and_then(|c| c.jacobian.clone())
    }
}
