//! State packing: maps the in-out seed (intrinsics, extrinsics, frames,
//! points) onto the free-variable vector the NLLS driver sees, and
//! back.

use nalgebra::{DVector, Vector3};

use crate::distortion::DistortionFamily;
use crate::error::{CalibError, Result};
use crate::pose::Pose;
use crate::problem::ProblemDetails;

/// The in-out calibration state: the intrinsics/extrinsics/frames/points
/// arrays are mutated in place by a solve. `extrinsics` holds one `Pose`
/// per non-reference camera (camera 0's pose is implicit identity, never
/// stored).
#[derive(Debug, Clone)]
pub struct Seed {
    /// Per-camera intrinsic vector, width `family.total_intrinsic_count()`.
    pub intrinsics: Vec<Vec<f64>>,
    pub extrinsics: Vec<Pose>,
    pub frames: Vec<Pose>,
    pub points: Vec<Vector3<f64>>,
}

impl Seed {
    pub fn n_cameras(&self) -> usize {
        self.intrinsics.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    intrinsic_width: usize,
    n_cameras: usize,
    n_frames: usize,
    n_points: usize,
    intrinsics_start: usize,
    extrinsics_start: usize,
    frames_start: usize,
    points_start: usize,
    n_state: usize,
}

/// Packs/unpacks a `Seed` against a fixed `(Ncameras, Nframes, Npoints,
/// family, ProblemDetails)` shape. Variable ordering is
/// `[intrinsics(camera 0..Ncameras-1), extrinsics(camera 1..Ncameras-1),
/// frames(0..Nframes-1), points(0..Npoints-1)]`; within a camera's
/// intrinsics block, core precedes distortions. Points are always
/// free: there is no `ProblemDetails` flag gating them.
#[derive(Debug, Clone)]
pub struct StatePacker {
    family: DistortionFamily,
    details: ProblemDetails,
    /// Per-camera focal-length-derived scale for the intrinsic-core
    /// block (one tenth of imager diagonal).
    focal_scale: Vec<f64>,
    layout: Layout,
}

impl StatePacker {
    pub fn new(
        n_cameras: usize,
        n_frames: usize,
        n_points: usize,
        family: DistortionFamily,
        details: ProblemDetails,
        imager_sizes: &[(f64, f64)],
    ) -> Result<Self> {
        if details.optimize_intrinsic_core && imager_sizes.len() != n_cameras {
            return Err(CalibError::InvalidArgument(format!(
                "expected {n_cameras} imager sizes, got {}",
                imager_sizes.len()
            )));
        }
        let focal_scale: Vec<f64> = imager_sizes
            .iter()
            .map(|(w, h)| 0.1 * (w * w + h * h).sqrt())
            .collect();

        let intrinsic_width = details.intrinsic_optimization_width(family);

        let intrinsics_start = 0;
        let extrinsics_start = intrinsics_start + intrinsic_width * n_cameras;
        let n_extrinsics = if details.optimize_extrinsics {
            6 * n_cameras.saturating_sub(1)
        } else {
            0
        };
        let frames_start = extrinsics_start + n_extrinsics;
        let n_frame_vars = if details.optimize_frames { 6 * n_frames } else { 0 };
        let points_start = frames_start + n_frame_vars;
        let n_state = points_start + 3 * n_points;

        Ok(StatePacker {
            family,
            details,
            focal_scale,
            layout: Layout {
                intrinsic_width,
                n_cameras,
                n_frames,
                n_points,
                intrinsics_start,
                extrinsics_start,
                frames_start,
                points_start,
                n_state,
            },
        })
    }

    pub fn n_state(&self) -> usize {
        self.layout.n_state
    }

    pub fn family(&self) -> DistortionFamily {
        self.family
    }

    pub fn details(&self) -> ProblemDetails {
        self.details
    }

    pub fn n_cameras(&self) -> usize {
        self.layout.n_cameras
    }

    pub fn n_frames(&self) -> usize {
        self.layout.n_frames
    }

    pub fn n_points(&self) -> usize {
        self.layout.n_points
    }

    /// Column offset of camera `cam`'s intrinsic-core block, or `None`
    /// if the core is not free.
    pub fn camera_core_offset(&self, cam: usize) -> Option<usize> {
        if !self.details.optimize_intrinsic_core {
            return None;
        }
        Some(self.layout.intrinsics_start + cam * self.layout.intrinsic_width)
    }

    /// Column offset of camera `cam`'s distortion block, or `None` if
    /// distortions are not free.
    pub fn camera_distortion_offset(&self, cam: usize) -> Option<usize> {
        if !self.details.optimize_intrinsic_distortions {
            return None;
        }
        let core_width = if self.details.optimize_intrinsic_core {
            crate::distortion::N_INTRINSICS_CORE
        } else {
            0
        };
        Some(self.layout.intrinsics_start + cam * self.layout.intrinsic_width + core_width)
    }

    /// Column offset of non-reference camera `cam`'s (`cam >= 1`) 6-wide
    /// extrinsic block, or `None` if extrinsics are not free.
    pub fn extrinsics_offset(&self, cam: usize) -> Option<usize> {
        if !self.details.optimize_extrinsics || cam == 0 {
            return None;
        }
        Some(self.layout.extrinsics_start + (cam - 1) * 6)
    }

    /// Column offset of frame `i`'s 6-wide pose block, or `None` if
    /// frames are not free.
    pub fn frame_offset(&self, i: usize) -> Option<usize> {
        if !self.details.optimize_frames {
            return None;
        }
        Some(self.layout.frames_start + i * 6)
    }

    /// Column offset of point `i`'s 3-wide block. Points have no gating
    /// flag in `ProblemDetails` and are always free.
    pub fn point_offset(&self, i: usize) -> usize {
        self.layout.points_start + i * 3
    }

    /// Multiplicative per-variable scale, in state-vector order, so the
    /// NLLS driver sees dimensionless variables.
    pub fn scale_vector(&self) -> DVector<f64> {
        let l = &self.layout;
        let mut scale = DVector::<f64>::from_element(l.n_state, 1.0);

        if self.details.has_any_intrinsic() {
            for cam in 0..l.n_cameras {
                let base = l.intrinsics_start + cam * l.intrinsic_width;
                let mut offset = base;
                if self.details.optimize_intrinsic_core {
                    let s = self.focal_scale.get(cam).copied().unwrap_or(1.0);
                    for k in 0..crate::distortion::N_INTRINSICS_CORE {
                        scale[offset + k] = s;
                    }
                    offset += crate::distortion::N_INTRINSICS_CORE;
                }
                if self.details.optimize_intrinsic_distortions {
                    for k in 0..self.family.param_count() {
                        scale[offset + k] = 1.0;
                    }
                }
            }
        }
        // extrinsics, frames, points: rotations (1 rad), translations
        // and point coordinates (1 m) are already the default scale 1.0.
        scale
    }

    pub fn pack(&self, seed: &Seed) -> Result<DVector<f64>> {
        self.validate_shape(seed)?;
        let l = &self.layout;
        let scale = self.scale_vector();
        let mut x = DVector::<f64>::zeros(l.n_state);

        if self.details.has_any_intrinsic() {
            for cam in 0..l.n_cameras {
                let base = l.intrinsics_start + cam * l.intrinsic_width;
                let mut offset = base;
                let intr = &seed.intrinsics[cam];
                if self.details.optimize_intrinsic_core {
                    for k in 0..crate::distortion::N_INTRINSICS_CORE {
                        x[offset + k] = intr[k] / scale[offset + k];
                    }
                    offset += crate::distortion::N_INTRINSICS_CORE;
                }
                if self.details.optimize_intrinsic_distortions {
                    for k in 0..self.family.param_count() {
                        x[offset + k] = intr[crate::distortion::N_INTRINSICS_CORE + k] / scale[offset + k];
                    }
                }
            }
        }

        if self.details.optimize_extrinsics {
            for cam in 0..l.n_cameras.saturating_sub(1) {
                let base = l.extrinsics_start + cam * 6;
                let pose = &seed.extrinsics[cam];
                for k in 0..3 {
                    x[base + k] = pose.rvec[k];
                }
                for k in 0..3 {
                    x[base + 3 + k] = pose.tvec[k];
                }
            }
        }

        if self.details.optimize_frames {
            for f in 0..l.n_frames {
                let base = l.frames_start + f * 6;
                let pose = &seed.frames[f];
                for k in 0..3 {
                    x[base + k] = pose.rvec[k];
                }
                for k in 0..3 {
                    x[base + 3 + k] = pose.tvec[k];
                }
            }
        }

        for p in 0..l.n_points {
            let base = l.points_start + p * 3;
            for k in 0..3 {
                x[base + k] = seed.points[p][k];
            }
        }

        Ok(x)
    }

    /// Writes `x` back into `seed`, leaving any disabled variable group
    /// untouched.
    pub fn unpack(&self, x: &DVector<f64>, seed: &mut Seed) -> Result<()> {
        if x.len() != self.layout.n_state {
            return Err(CalibError::InvalidArgument(format!(
                "expected state vector of length {}, got {}",
                self.layout.n_state,
                x.len()
            )));
        }
        self.validate_shape(seed)?;
        let l = &self.layout;
        let scale = self.scale_vector();

        if self.details.has_any_intrinsic() {
            for cam in 0..l.n_cameras {
                let base = l.intrinsics_start + cam * l.intrinsic_width;
                let mut offset = base;
                let intr = &mut seed.intrinsics[cam];
                if self.details.optimize_intrinsic_core {
                    for k in 0..crate::distortion::N_INTRINSICS_CORE {
                        intr[k] = x[offset + k] * scale[offset + k];
                    }
                    offset += crate::distortion::N_INTRINSICS_CORE;
                }
                if self.details.optimize_intrinsic_distortions {
                    for k in 0..self.family.param_count() {
                        intr[crate::distortion::N_INTRINSICS_CORE + k] = x[offset + k] * scale[offset + k];
                    }
                }
            }
        }

        if self.details.optimize_extrinsics {
            for cam in 0..l.n_cameras.saturating_sub(1) {
                let base = l.extrinsics_start + cam * 6;
                let rvec = Vector3::new(x[base], x[base + 1], x[base + 2]);
                let tvec = Vector3::new(x[base + 3], x[base + 4], x[base + 5]);
                seed.extrinsics[cam] = Pose::new(rvec, tvec);
            }
        }

        if self.details.optimize_frames {
            for f in 0..l.n_frames {
                let base = l.frames_start + f * 6;
                let rvec = Vector3::new(x[base], x[base + 1], x[base + 2]);
                let tvec = Vector3::new(x[base + 3], x[base + 4], x[base + 5]);
                seed.frames[f] = Pose::new(rvec, tvec);
            }
        }

        for p in 0..l.n_points {
            let base = l.points_start + p * 3;
            seed.points[p] = Vector3::new(x[base], x[base + 1], x[base + 2]);
        }

        Ok(())
    }

    fn validate_shape(&self, seed: &Seed) -> Result<()> {
        let l = &self.layout;
        if seed.intrinsics.len() != l.n_cameras {
            return Err(CalibError::InvalidArgument(format!(
                "expected {} cameras, seed has {}",
                l.n_cameras,
                seed.intrinsics.len()
            )));
        }
        for intr in &seed.intrinsics {
            if intr.len() != self.family.total_intrinsic_count() {
                return Err(CalibError::InvalidArgument(format!(
                    "expected intrinsic width {}, got {}",
                    self.family.total_intrinsic_count(),
                    intr.len()
                )));
            }
        }
        if seed.extrinsics.len() != l.n_cameras.saturating_sub(1) {
            return Err(CalibError::InvalidArgument(format!(
                "expected {} extrinsics, seed has {}",
                l.n_cameras.saturating_sub(1),
                seed.extrinsics.len()
            )));
        }
        if seed.frames.len() != l.n_frames {
            return Err(CalibError::InvalidArgument(format!(
                "expected {} frames, seed has {}",
                l.n_frames,
                seed.frames.len()
            )));
        }
        if seed.points.len() != l.n_points {
            return Err(CalibError::InvalidArgument(format!(
                "expected {} points, seed has {}",
                l.n_points,
                seed.points.len()
            )));
        }
        Ok(())
    }
}
