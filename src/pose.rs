//! Rigid pose composed of a Rodrigues (axis-angle) rotation and a
//! translation, plus analytic Jacobians of the transform with respect
//! to both the pose and the point.
//!
//! The rotation Jacobian uses the Gallego & Yezzi compact form for the
//! derivative of a 3D rotation in exponential coordinates:
//! `d(R(r) p)/dr = -R(r) [p]_x Jr(r)`, with the small-angle limit
//! `-[p]_x` falling out of the same expression as `theta -> 0`.

use nalgebra::{Matrix3, Rotation3, Vector3};

const SMALL_ANGLE_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl Pose {
    pub fn identity() -> Self {
        Pose {
            rvec: Vector3::zeros(),
            tvec: Vector3::zeros(),
        }
    }

    pub fn new(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Pose { rvec, tvec }
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        rodrigues_to_matrix(&self.rvec)
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation_matrix() * p + self.tvec
    }

    /// Returns `(transformed point, d(point)/d(rvec,tvec) [3x6], d(point)/d(p) [3x3])`.
    pub fn transform_point_jacobians(
        &self,
        p: &Vector3<f64>,
    ) -> (Vector3<f64>, nalgebra::Matrix3x6<f64>, Matrix3<f64>) {
        let r = self.rvec;
        let theta = r.norm();
        let rx = skew(&r);
        let rx2 = rx * rx;

        let (a, b) = sin_cos_coeffs(theta);
        let rot = Matrix3::identity() + rx * a + rx2 * b;

        let transformed = rot * p + self.tvec;

        let (jr_a, jr_b) = right_jacobian_coeffs(theta);
        let jr = Matrix3::identity() - rx * jr_a + rx2 * jr_b;

        // d(Rp)/dr = -R [p]_x Jr
        let d_dr = -(rot * skew(p) * jr);
        let d_dt = Matrix3::identity();

        let mut d_dpose = nalgebra::Matrix3x6::<f64>::zeros();
        d_dpose.fixed_view_mut::<3, 3>(0, 0).copy_from(&d_dr);
        d_dpose.fixed_view_mut::<3, 3>(0, 3).copy_from(&d_dt);

        (transformed, d_dpose, rot)
    }

    /// Compose `self` after `inner`: apply `inner` first, then `self`.
    /// Used to chain frame -> extrinsics for board observations.
    pub fn compose(&self, inner: &Pose) -> Pose {
        let r_outer = self.rotation_matrix();
        let r_inner = inner.rotation_matrix();
        let r = r_outer * r_inner;
        let t = r_outer * inner.tvec + self.tvec;
        Pose {
            rvec: Rotation3::from_matrix_unchecked(r).scaled_axis(),
            tvec: t,
        }
    }
}

pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

fn rodrigues_to_matrix(r: &Vector3<f64>) -> Matrix3<f64> {
    let theta = r.norm();
    let rx = skew(r);
    let (a, b) = sin_cos_coeffs(theta);
    Matrix3::identity() + rx * a + rx * rx * b
}

/// Returns `(sin(theta)/theta, (1-cos(theta))/theta^2)`, Taylor-expanded
/// near `theta = 0` to avoid a `0/0` division.
fn sin_cos_coeffs(theta: f64) -> (f64, f64) {
    if theta < SMALL_ANGLE_EPS {
        let t2 = theta * theta;
        (1.0 - t2 / 6.0, 0.5 - t2 / 24.0)
    } else {
        (theta.sin() / theta, (1.0 - theta.cos()) / (theta * theta))
    }
}

/// Returns the two coefficients of the SO(3) right Jacobian
/// `Jr(r) = I - a [r]_x + b [r]_x^2`.
fn right_jacobian_coeffs(theta: f64) -> (f64, f64) {
    if theta < SMALL_ANGLE_EPS {
        let t2 = theta * theta;
        (0.5 - t2 / 24.0, 1.0 / 6.0 - t2 / 120.0)
    } else {
        let t2 = theta * theta;
        (
            (1.0 - theta.cos()) / t2,
            (theta - theta.sin()) / (theta * t2),
        )
    }
}
