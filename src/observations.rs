//! Observation types and the ordering/derivation invariants placed on
//! them: board and point observations must arrive pre-sorted,
//! caller-supplied skip lists must be strictly increasing, and
//! `skip_frame`/`skip_point` are *derived* quantities, never accepted
//! from the caller directly.

use nalgebra::Vector2;

use crate::error::{CalibError, Result};

/// One calibration-target (board) observation: a camera saw a W×W grid
/// of planar target corners at capture instant `i_frame`.
#[derive(Debug, Clone)]
pub struct FrameObservation {
    pub i_camera: usize,
    pub i_frame: usize,
    pub skip_frame: bool,
    pub skip_observation: bool,
    /// Row-major W*W observed pixel corners.
    pub pixels: Vec<Vector2<f64>>,
}

/// One isolated-3D-point observation, optionally carrying a range
/// measurement.
#[derive(Debug, Clone)]
pub struct PointObservation {
    pub i_camera: usize,
    pub i_point: usize,
    pub skip_point: bool,
    pub skip_observation: bool,
    pub px: Vector2<f64>,
    /// `Some((d, sigma_range))` with `d > 0` adds a range residual
    /// `(||cameraFramePoint|| - d) / sigma_range`; `None` or `d <= 0`
    /// disables it. `sigma_range` travels with the observation rather
    /// than being derived from the pixel `sigma`: range uncertainty is
    /// an independent per-measurement quantity, not a fixed multiple of
    /// the pixel noise.
    pub range: Option<(f64, f64)>,
}

/// Board observations must be sorted by `(i_frame, i_camera)` ascending.
pub fn validate_board_order(obs: &[FrameObservation]) -> Result<()> {
    for w in obs.windows(2) {
        let (a, b) = (&w[0], &w[1]);
        let key_a = (a.i_frame, a.i_camera);
        let key_b = (b.i_frame, b.i_camera);
        if key_a > key_b {
            return Err(CalibError::InvalidArgument(format!(
                "board observations out of order: {key_a:?} before {key_b:?}"
            )));
        }
    }
    Ok(())
}

/// Point observations must be sorted by `(i_point, i_camera)` ascending.
pub fn validate_point_order(obs: &[PointObservation]) -> Result<()> {
    for w in obs.windows(2) {
        let (a, b) = (&w[0], &w[1]);
        let key_a = (a.i_point, a.i_camera);
        let key_b = (b.i_point, b.i_camera);
        if key_a > key_b {
            return Err(CalibError::InvalidArgument(format!(
                "point observations out of order: {key_a:?} before {key_b:?}"
            )));
        }
    }
    Ok(())
}

/// A caller-supplied skip list (board or point) must be strictly
/// monotonically increasing.
pub fn validate_skip_list(list: &[usize]) -> Result<()> {
    for w in list.windows(2) {
        if w[0] >= w[1] {
            return Err(CalibError::InvalidArgument(
                "skip list is not strictly monotonically increasing".to_string(),
            ));
        }
    }
    Ok(())
}

/// Derives `skip_frame`: a frame is skipped once every observation of
/// it is individually `skip_observation`. This is always derived, never
/// accepted directly from the caller. Assumes `obs` is already sorted
/// by `i_frame`.
pub fn derive_frame_skips(obs: &mut [FrameObservation]) {
    let mut start = 0;
    while start < obs.len() {
        let frame = obs[start].i_frame;
        let mut end = start;
        while end < obs.len() && obs[end].i_frame == frame {
            end += 1;
        }
        let all_skipped = obs[start..end].iter().all(|o| o.skip_observation);
        if all_skipped {
            for o in &mut obs[start..end] {
                o.skip_frame = true;
            }
        }
        start = end;
    }
}

/// Same derivation rule for points, keyed on `i_point`.
pub fn derive_point_skips(obs: &mut [PointObservation]) {
    let mut start = 0;
    while start < obs.len() {
        let point = obs[start].i_point;
        let mut end = start;
        while end < obs.len() && obs[end].i_point == point {
            end += 1;
        }
        let all_skipped = obs[start..end].iter().all(|o| o.skip_observation);
        if all_skipped {
            for o in &mut obs[start..end] {
                o.skip_point = true;
            }
        }
        start = end;
    }
}

/// A board observation is excluded from assembly when either its own
/// `skip_observation` or the derived `skip_frame` is set.
pub fn is_board_kept(o: &FrameObservation) -> bool {
    !o.skip_observation && !o.skip_frame
}

/// A point observation is excluded from assembly when either its own
/// `skip_observation` or the derived `skip_point` is set.
pub fn is_point_kept(o: &PointObservation) -> bool {
    !o.skip_observation && !o.skip_point
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(i_frame: usize, i_camera: usize, skip: bool) -> FrameObservation {
        FrameObservation {
            i_camera,
            i_frame,
            skip_frame: false,
            skip_observation: skip,
            pixels: Vec::new(),
        }
    }

    fn point(i_point: usize, i_camera: usize, skip: bool) -> PointObservation {
        PointObservation {
            i_camera,
            i_point,
            skip_point: false,
            skip_observation: skip,
            px: Vector2::zeros(),
            range: None,
        }
    }

    #[test]
    fn board_order_accepts_sorted_input() {
        let obs = vec![board(0, 0, false), board(0, 1, false), board(1, 0, false)];
        assert!(validate_board_order(&obs).is_ok());
    }

    #[test]
    fn board_order_rejects_out_of_order_input() {
        let obs = vec![board(1, 0, false), board(0, 0, false)];
        assert!(validate_board_order(&obs).is_err());
    }

    #[test]
    fn skip_list_rejects_non_strict_runs() {
        assert!(validate_skip_list(&[0, 1, 1, 2]).is_err());
        assert!(validate_skip_list(&[0, 2, 5]).is_ok());
    }

    #[test]
    fn frame_skip_is_derived_only_when_all_observations_skip() {
        let mut obs = vec![board(0, 0, true), board(0, 1, false), board(1, 0, true), board(1, 1, true)];
        derive_frame_skips(&mut obs);
        assert!(!obs[0].skip_frame);
        assert!(!obs[1].skip_frame);
        assert!(obs[2].skip_frame);
        assert!(obs[3].skip_frame);
    }

    #[test]
    fn point_skip_mirrors_frame_skip_rule() {
        let mut obs = vec![point(0, 0, true), point(0, 1, true), point(1, 0, false)];
        derive_point_skips(&mut obs);
        assert!(obs[0].skip_point);
        assert!(obs[1].skip_point);
        assert!(!obs[2].skip_point);
    }
}
