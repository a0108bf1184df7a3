//! Measurement assembly: turns the current seed and the kept
//! observations into the weighted residual vector and its (logically
//! sparse, densely stored) Jacobian against the packed state vector.

use nalgebra::{DMatrix, DVector, Vector3};

use crate::config::Roi;
use crate::distortion::DistortionFamily;
use crate::error::Result;
use crate::observations::{is_board_kept, is_point_kept, FrameObservation, PointObservation};
use crate::pose::Pose;
use crate::problem::ProblemDetails;
use crate::projection::project_point;
use crate::state::{Seed, StatePacker};

/// Which observation produced a contiguous block of residual rows, for
/// per-observation outlier scoring and reporting.
#[derive(Debug, Clone, Copy)]
pub enum RowGroup {
    Board { obs_index: usize, row_start: usize, row_count: usize },
    Point { obs_index: usize, row_start: usize, row_count: usize },
    Regularization { row_start: usize, row_count: usize },
}

pub struct AssembledProblem {
    pub residuals: DVector<f64>,
    pub jacobian: Option<DMatrix<f64>>,
    pub row_groups: Vec<RowGroup>,
    /// Board (obs_index, vertex_index) pairs excluded this iteration
    /// because the observed pixel fell outside that camera's ROI.
    pub outside_roi: Vec<(usize, usize)>,
    /// Board (obs_index, vertex_index) pairs excluded this iteration
    /// because the vertex projected behind the camera (or through the
    /// center of projection) and produced no valid pixel.
    pub invalid_board: Vec<(usize, usize)>,
    /// Point observation indices excluded this iteration for the same
    /// reason; the whole observation (pixel row and any range row) is
    /// dropped rather than just one vertex.
    pub invalid_point: Vec<usize>,
}

/// The nominal row count, i.e. without any ROI exclusion (ROI exclusion
/// is data-dependent, so this reports the upper bound `assemble`
/// produces when no ROI is configured).
pub fn measurement_count(
    n_cameras: usize,
    n_board_kept: usize,
    point_observations: &[PointObservation],
    board_width: usize,
    details: &ProblemDetails,
    family: DistortionFamily,
) -> usize {
    let board_rows = n_board_kept * 2 * board_width * board_width;
    let point_rows: usize = point_observations
        .iter()
        .filter(|o| is_point_kept(o))
        .map(|o| if matches!(o.range, Some((d, _)) if d > 0.0) { 3 } else { 2 })
        .sum();
    let reg_rows = if details.skip_regularization {
        0
    } else {
        let mut per_cam = 0;
        if details.optimize_intrinsic_core {
            per_cam += 2;
        }
        if details.optimize_intrinsic_distortions {
            per_cam += family.param_count();
        }
        per_cam * n_cameras
    };
    board_rows + point_rows + reg_rows
}

/// Fixed per-call configuration shared by every residual block.
pub struct Assembler<'a> {
    pub board_spacing: f64,
    pub board_width: usize,
    pub sigma: f64,
    pub regularization_weight: f64,
    /// Per-camera imager size `(width, height)`, used as the
    /// regularization prior's pull target (imager center).
    pub imager_sizes: &'a [(f64, f64)],
    pub roi: &'a [Roi],
}

impl<'a> Assembler<'a> {
    pub fn assemble(
        &self,
        seed: &Seed,
        packer: &StatePacker,
        board_obs: &[FrameObservation],
        point_obs: &[PointObservation],
        want_jacobian: bool,
    ) -> Result<AssembledProblem> {
        let n_cameras = packer.n_cameras();
        let family = packer.family();
        let details = packer.details();
        let scale = packer.scale_vector();

        let kept_board_count = board_obs.iter().filter(|o| is_board_kept(o)).count();
        let n_rows_upper = measurement_count(
            n_cameras,
            kept_board_count,
            point_obs,
            self.board_width,
            &details,
            family,
        );

        let mut residuals = Vec::with_capacity(n_rows_upper);
        let mut jac_rows: Vec<Vec<f64>> = Vec::new();
        let n_state = packer.n_state();
        let mut row_groups = Vec::new();
        let mut outside_roi = Vec::new();
        let mut invalid_board = Vec::new();
        let mut invalid_point = Vec::new();

        for (obs_index, o) in board_obs.iter().enumerate() {
            if !is_board_kept(o) {
                continue;
            }
            let row_start = residuals.len();
            let frame_pose = &seed.frames[o.i_frame];
            let cam_core = seed.intrinsics[o.i_camera].clone();

            for i in 0..self.board_width {
                for j in 0..self.board_width {
                    let idx = i * self.board_width + j;
                    let observed = o.pixels[idx];

                    if let Some(roi) = self.roi.iter().find(|r| r.i_camera == o.i_camera) {
                        if !roi.contains(observed.x, observed.y) {
                            outside_roi.push((obs_index, idx));
                            continue;
                        }
                    }

                    let vertex = Vector3::new(
                        i as f64 * self.board_spacing,
                        j as f64 * self.board_spacing,
                        0.0,
                    );
                    let (p_cam, d_pcam_d_frame, d_pcam_d_extr) =
                        self.camera_frame_point(frame_pose, seed, o.i_camera, &vertex);

                    let proj = project_point(&p_cam, family, &cam_core, want_jacobian, want_jacobian)?;
                    if !proj.valid {
                        invalid_board.push((obs_index, idx));
                        continue;
                    }

                    residuals.push((proj.px.x - observed.x) / self.sigma);
                    residuals.push((proj.px.y - observed.y) / self.sigma);

                    if want_jacobian {
                        let d_dp = proj.d_dp.unwrap();
                        let d_dintr = proj.d_dintrinsics.unwrap();
                        let d_px_d_pcam = d_dp; // 2x3

                        for r in 0..2 {
                            let mut row = vec![0.0; n_state];
                            if let Some(base) = packer.camera_core_offset(o.i_camera) {
                                for k in 0..crate::distortion::N_INTRINSICS_CORE {
                                    row[base + k] = d_dintr[(r, k)] / self.sigma * scale[base + k];
                                }
                            }
                            if let Some(base) = packer.camera_distortion_offset(o.i_camera) {
                                for k in 0..family.param_count() {
                                    row[base + k] = d_dintr[(r, 4 + k)] / self.sigma * scale[base + k];
                                }
                            }
                            if let Some(base) = packer.frame_offset(o.i_frame) {
                                // d(px)/d(frame pose) = d(px)/d(p_cam) * d(p_cam)/d(frame pose)
                                let d_px_d_frame = (d_px_d_pcam * d_pcam_d_frame).row(r).into_owned();
                                for k in 0..6 {
                                    row[base + k] = d_px_d_frame[k] / self.sigma * scale[base + k];
                                }
                            }
                            if o.i_camera > 0 {
                                if let Some(base) = packer.extrinsics_offset(o.i_camera) {
                                    let d_px_d_extr = (d_px_d_pcam * d_pcam_d_extr).row(r).into_owned();
                                    for k in 0..6 {
                                        row[base + k] = d_px_d_extr[k] / self.sigma * scale[base + k];
                                    }
                                }
                            }
                            jac_rows.push(row);
                        }
                    }
                }
            }
            let row_count = residuals.len() - row_start;
            if row_count > 0 {
                row_groups.push(RowGroup::Board {
                    obs_index,
                    row_start,
                    row_count,
                });
            }
        }

        for (obs_index, o) in point_obs.iter().enumerate() {
            if !is_point_kept(o) {
                continue;
            }
            let point = seed.points[o.i_point];
            let (p_cam, d_pcam_d_extr) = self.camera_frame_point_only(seed, o.i_camera, &point);

            let proj = project_point(&p_cam, family, &seed.intrinsics[o.i_camera], want_jacobian, want_jacobian)?;
            if !proj.valid {
                invalid_point.push(obs_index);
                continue;
            }

            let row_start = residuals.len();
            residuals.push((proj.px.x - o.px.x) / self.sigma);
            residuals.push((proj.px.y - o.px.y) / self.sigma);

            if want_jacobian {
                let d_dp = proj.d_dp.unwrap();
                let d_dintr = proj.d_dintrinsics.unwrap();
                for r in 0..2 {
                    let mut row = vec![0.0; n_state];
                    if let Some(base) = packer.camera_core_offset(o.i_camera) {
                        for k in 0..crate::distortion::N_INTRINSICS_CORE {
                            row[base + k] = d_dintr[(r, k)] / self.sigma * scale[base + k];
                        }
                    }
                    if let Some(base) = packer.camera_distortion_offset(o.i_camera) {
                        for k in 0..family.param_count() {
                            row[base + k] = d_dintr[(r, 4 + k)] / self.sigma * scale[base + k];
                        }
                    }
                    if o.i_camera > 0 {
                        if let Some(base) = packer.extrinsics_offset(o.i_camera) {
                            let d_px_d_extr = (d_dp * d_pcam_d_extr).row(r).into_owned();
                            for k in 0..6 {
                                row[base + k] = d_px_d_extr[k] / self.sigma * scale[base + k];
                            }
                        }
                    }
                    // d(p_cam)/d(point) is the camera's rotation matrix
                    // (identity for camera 0).
                    let rot = if o.i_camera == 0 {
                        nalgebra::Matrix3::identity()
                    } else {
                        seed.extrinsics[o.i_camera - 1].rotation_matrix()
                    };
                    let base = packer.point_offset(o.i_point);
                    let d_px_d_point = (d_dp * rot).row(r).into_owned();
                    for k in 0..3 {
                        row[base + k] = d_px_d_point[k] / self.sigma * scale[base + k];
                    }
                    jac_rows.push(row);
                }
            }

            if let Some((d, sigma_range)) = o.range {
                if d > 0.0 {
                    let range_pred = p_cam.norm();
                    residuals.push((range_pred - d) / sigma_range);
                    if want_jacobian {
                        let mut row = vec![0.0; n_state];
                        let rot = if o.i_camera == 0 {
                            nalgebra::Matrix3::identity()
                        } else {
                            seed.extrinsics[o.i_camera - 1].rotation_matrix()
                        };
                        // d(||p_cam||)/d(point) = (p_cam/||p_cam||)^T * rot
                        let unit = p_cam / range_pred;
                        let d_range_d_point = unit.transpose() * rot;
                        let base = packer.point_offset(o.i_point);
                        for k in 0..3 {
                            row[base + k] = d_range_d_point[k] / sigma_range * scale[base + k];
                        }
                        if o.i_camera > 0 {
                            if let Some(ebase) = packer.extrinsics_offset(o.i_camera) {
                                let d_pcam_d_extr_row = unit.transpose() * d_pcam_d_extr;
                                for k in 0..6 {
                                    row[ebase + k] = d_pcam_d_extr_row[k] / sigma_range * scale[ebase + k];
                                }
                            }
                        }
                        jac_rows.push(row);
                    }
                }
            }

            let row_count = residuals.len() - row_start;
            row_groups.push(RowGroup::Point {
                obs_index,
                row_start,
                row_count,
            });
        }

        if !details.skip_regularization {
            let row_start = residuals.len();
            for cam in 0..n_cameras {
                if let Some(base) = packer.camera_core_offset(cam) {
                    let (w, h) = self.imager_sizes.get(cam).copied().unwrap_or((0.0, 0.0));
                    let cx0 = w / 2.0;
                    let cy0 = h / 2.0;
                    let cx = seed.intrinsics[cam][2];
                    let cy = seed.intrinsics[cam][3];
                    residuals.push(self.regularization_weight * (cx - cx0));
                    residuals.push(self.regularization_weight * (cy - cy0));
                    if want_jacobian {
                        let mut row_cx = vec![0.0; n_state];
                        row_cx[base + 2] = self.regularization_weight * scale[base + 2];
                        jac_rows.push(row_cx);
                        let mut row_cy = vec![0.0; n_state];
                        row_cy[base + 3] = self.regularization_weight * scale[base + 3];
                        jac_rows.push(row_cy);
                    }
                }
                if let Some(base) = packer.camera_distortion_offset(cam) {
                    for k in 0..family.param_count() {
                        let v = seed.intrinsics[cam][4 + k];
                        residuals.push(self.regularization_weight * v);
                        if want_jacobian {
                            let mut row = vec![0.0; n_state];
                            row[base + k] = self.regularization_weight * scale[base + k];
                            jac_rows.push(row);
                        }
                    }
                }
            }
            let row_count = residuals.len() - row_start;
            if row_count > 0 {
                row_groups.push(RowGroup::Regularization { row_start, row_count });
            }
        }

        let jacobian = if want_jacobian {
            let n_rows = jac_rows.len();
            let mut m = DMatrix::<f64>::zeros(n_rows, n_state);
            for (r, row) in jac_rows.iter().enumerate() {
                for c in 0..n_state {
                    m[(r, c)] = row[c];
                }
            }
            Some(m)
        } else {
            None
        };

        Ok(AssembledProblem {
            residuals: DVector::from_vec(residuals),
            jacobian,
            row_groups,
            outside_roi,
            invalid_board,
            invalid_point,
        })
    }

    /// Maps a board-frame vertex through the frame pose then the
    /// camera's extrinsics (identity for camera 0), returning the
    /// camera-frame point plus `d(p_cam)/d(frame pose)` and
    /// `d(p_cam)/d(extrinsics)` (the latter is zero-sized/unused when
    /// `i_camera == 0`; callers must check before indexing it).
    fn camera_frame_point(
        &self,
        frame_pose: &Pose,
        seed: &Seed,
        i_camera: usize,
        vertex: &Vector3<f64>,
    ) -> (Vector3<f64>, nalgebra::Matrix3x6<f64>, nalgebra::Matrix3x6<f64>) {
        let (p_world, d_pworld_d_frame, _) = frame_pose.transform_point_jacobians(vertex);
        if i_camera == 0 {
            (p_world, d_pworld_d_frame, nalgebra::Matrix3x6::zeros())
        } else {
            let extr = &seed.extrinsics[i_camera - 1];
            let (p_cam, d_pcam_d_extr, d_pcam_d_pworld) = extr.transform_point_jacobians(&p_world);
            let d_pcam_d_frame = d_pcam_d_pworld * d_pworld_d_frame;
            (p_cam, d_pcam_d_frame, d_pcam_d_extr)
        }
    }

    /// Maps a world-frame point through the camera's extrinsics
    /// (identity for camera 0).
    fn camera_frame_point_only(
        &self,
        seed: &Seed,
        i_camera: usize,
        point: &Vector3<f64>,
    ) -> (Vector3<f64>, nalgebra::Matrix3x6<f64>) {
        if i_camera == 0 {
            (*point, nalgebra::Matrix3x6::zeros())
        } else {
            let extr = &seed.extrinsics[i_camera - 1];
            let (p_cam, d_pcam_d_extr, _) = extr.transform_point_jacobians(point);
            (p_cam, d_pcam_d_extr)
        }
    }
}
