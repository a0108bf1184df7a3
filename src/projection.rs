//! Projection kernel: projects a 3D camera-frame point through a
//! pinhole core plus a selected distortion family, with analytic
//! partials `d(px)/dp` and `d(px)/d(intrinsics)`.

use nalgebra::{DMatrix, Matrix2, Matrix2x3, Vector2, Vector3};

use crate::distortion::DistortionFamily;
use crate::error::{CalibError, Result};

/// Points with `|p_z|` at or below this are "behind the camera" /
/// numerically degenerate; the kernel returns an invalid sentinel
/// instead of dividing by (near) zero.
pub const Z_EPS: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct Projection {
    pub px: Vector2<f64>,
    pub d_dp: Option<Matrix2x3<f64>>,
    /// 2 x (4+N_d), core columns first then distortion columns, in the
    /// same order as the family's parameter vector.
    pub d_dintrinsics: Option<DMatrix<f64>>,
    pub valid: bool,
}

impl Projection {
    fn invalid(n_intrinsics: usize, want_dp: bool, want_dintrinsics: bool) -> Self {
        Projection {
            px: Vector2::new(f64::NAN, f64::NAN),
            d_dp: want_dp.then(Matrix2x3::zeros),
            d_dintrinsics: want_dintrinsics.then(|| DMatrix::zeros(2, n_intrinsics)),
            valid: false,
        }
    }
}

/// `project`: project one camera-frame point through `family` with the
/// given `intrinsics` (width `4 + family.param_count()`).
pub fn project_point(
    p: &Vector3<f64>,
    family: DistortionFamily,
    intrinsics: &[f64],
    want_dp: bool,
    want_dintrinsics: bool,
) -> Result<Projection> {
    let n_total = family.total_intrinsic_count();
    if intrinsics.len() != n_total {
        return Err(CalibError::InvalidArgument(format!(
            "expected {n_total} intrinsics for {}, got {}",
            family.name(),
            intrinsics.len()
        )));
    }

    if p.z <= Z_EPS {
        return Ok(Projection::invalid(n_total, want_dp, want_dintrinsics));
    }

    let fx = intrinsics[0];
    let fy = intrinsics[1];
    let cx = intrinsics[2];
    let cy = intrinsics[3];
    let dist_params = &intrinsics[4..];

    let (uv, d_uv_dp) = pinhole_core(p);

    let (u2, v2, d_duv_dp_eff, d_duv_dparams) = match family {
        DistortionFamily::Cahvore => distort_cahvore(p, &uv, &d_uv_dp, dist_params),
        _ => {
            let (u2, v2, d_duv, d_dparams) = distort(uv.x, uv.y, family, dist_params);
            (u2, v2, d_duv * d_uv_dp, d_dparams)
        }
    };

    let px = Vector2::new(fx * u2 + cx, fy * v2 + cy);

    let d_dp = if want_dp {
        Some(Matrix2x3::from_fn(|i, j| {
            let scale = if i == 0 { fx } else { fy };
            scale * d_duv_dp_eff[(i, j)]
        }))
    } else {
        None
    };

    let d_dintrinsics = if want_dintrinsics {
        let nd = dist_params.len();
        let mut j = DMatrix::<f64>::zeros(2, 4 + nd);
        j[(0, 0)] = u2;
        j[(1, 1)] = v2;
        j[(0, 2)] = 1.0;
        j[(1, 3)] = 1.0;
        for k in 0..nd {
            j[(0, 4 + k)] = fx * d_duv_dparams[(0, k)];
            j[(1, 4 + k)] = fy * d_duv_dparams[(1, k)];
        }
        Some(j)
    } else {
        None
    };

    Ok(Projection {
        px,
        d_dp,
        d_dintrinsics,
        valid: true,
    })
}

/// Batch projection, N points with a fixed family and intrinsics.
/// Sequential by design: no intra-call parallelism.
pub fn project_many(
    points: &[Vector3<f64>],
    family: DistortionFamily,
    intrinsics: &[f64],
    want_dp: bool,
    want_dintrinsics: bool,
) -> Result<Vec<Projection>> {
    points
        .iter()
        .map(|p| project_point(p, family, intrinsics, want_dp, want_dintrinsics))
        .collect()
}

/// u = p_x/p_z, v = p_y/p_z, plus `d(u,v)/dp`.
fn pinhole_core(p: &Vector3<f64>) -> (Vector2<f64>, Matrix2x3<f64>) {
    let iz = 1.0 / p.z;
    let u = p.x * iz;
    let v = p.y * iz;
    #[rustfmt::skip]
    let d = Matrix2x3::new(
        iz,  0.0, -u * iz,
        0.0, iz,  -v * iz,
    );
    (Vector2::new(u, v), d)
}

/// Dispatch to the distortion family's own (u,v) -> (u',v') map, with
/// `d(u'v')/d(u,v)` and `d(u'v')/d(distortion params)`.
fn distort(
    u: f64,
    v: f64,
    family: DistortionFamily,
    params: &[f64],
) -> (f64, f64, Matrix2<f64>, DMatrix<f64>) {
    match family {
        DistortionFamily::None => (u, v, Matrix2::identity(), DMatrix::zeros(2, 0)),
        DistortionFamily::OpenCv4
        | DistortionFamily::OpenCv5
        | DistortionFamily::OpenCv8
        | DistortionFamily::OpenCv12
        | DistortionFamily::OpenCv14 => distort_opencv(u, v, params),
        DistortionFamily::Cahvor => distort_cahvor(u, v, params),
        DistortionFamily::Cahvore => unreachable!("CAHVORE is dispatched in project_point"),
    }
}

/// Brown-Conrady radial + tangential (+ rational denominator for 8+,
/// thin-prism for 12+, tilted-sensor for 14) distortion, in the
/// standard OpenCV coefficient order
/// `k1,k2,p1,p2[,k3[,k4,k5,k6[,s1,s2,s3,s4[,tau_x,tau_y]]]]`.
fn distort_opencv(u: f64, v: f64, params: &[f64]) -> (f64, f64, Matrix2<f64>, DMatrix<f64>) {
    let nd = params.len();
    let k1 = params[0];
    let k2 = params[1];
    let p1 = params[2];
    let p2 = params[3];
    let k3 = if nd >= 5 { params[4] } else { 0.0 };
    let (k4, k5, k6) = if nd >= 8 {
        (params[5], params[6], params[7])
    } else {
        (0.0, 0.0, 0.0)
    };
    let (s1, s2, s3, s4) = if nd >= 12 {
        (params[8], params[9], params[10], params[11])
    } else {
        (0.0, 0.0, 0.0, 0.0)
    };

    let r2 = u * u + v * v;
    let r4 = r2 * r2;
    let r6 = r4 * r2;

    let num = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
    let den = if nd >= 8 {
        1.0 + k4 * r2 + k5 * r4 + k6 * r6
    } else {
        1.0
    };
    let radial = num / den;

    let dnum_dr2 = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r4;
    let dden_dr2 = if nd >= 8 { k4 + 2.0 * k5 * r2 + 3.0 * k6 * r4 } else { 0.0 };
    let dradial_dr2 = (dnum_dr2 * den - num * dden_dr2) / (den * den);

    let dradial_du = dradial_dr2 * 2.0 * u;
    let dradial_dv = dradial_dr2 * 2.0 * v;

    let mut xd = u * radial + 2.0 * p1 * u * v + p2 * (r2 + 2.0 * u * u);
    let mut yd = v * radial + p1 * (r2 + 2.0 * v * v) + 2.0 * p2 * u * v;
    if nd >= 12 {
        xd += s1 * r2 + s2 * r4;
        yd += s3 * r2 + s4 * r4;
    }

    let prism_du_x = if nd >= 12 { 2.0 * s1 * u + 4.0 * s2 * r2 * u } else { 0.0 };
    let prism_dv_x = if nd >= 12 { 2.0 * s1 * v + 4.0 * s2 * r2 * v } else { 0.0 };
    let prism_du_y = if nd >= 12 { 2.0 * s3 * u + 4.0 * s4 * r2 * u } else { 0.0 };
    let prism_dv_y = if nd >= 12 { 2.0 * s3 * v + 4.0 * s4 * r2 * v } else { 0.0 };

    let dxd_du = radial + u * dradial_du + 2.0 * p1 * v + 6.0 * p2 * u + prism_du_x;
    let dxd_dv = u * dradial_dv + 2.0 * p1 * u + 2.0 * p2 * v + prism_dv_x;
    let dyd_du = v * dradial_du + 2.0 * p1 * u + 2.0 * p2 * v + prism_du_y;
    let dyd_dv = radial + v * dradial_dv + 6.0 * p1 * v + 2.0 * p2 * u + prism_dv_y;

    #[rustfmt::skip]
    let d_duv = Matrix2::new(
        dxd_du, dxd_dv,
        dyd_du, dyd_dv,
    );

    let mut d_dparams = DMatrix::<f64>::zeros(2, nd.min(12));
    d_dparams[(0, 0)] = u * r2 / den;
    d_dparams[(1, 0)] = v * r2 / den;
    d_dparams[(0, 1)] = u * r4 / den;
    d_dparams[(1, 1)] = v * r4 / den;
    d_dparams[(0, 2)] = 2.0 * u * v;
    d_dparams[(1, 2)] = r2 + 2.0 * v * v;
    d_dparams[(0, 3)] = r2 + 2.0 * u * u;
    d_dparams[(1, 3)] = 2.0 * u * v;
    if nd >= 5 {
        d_dparams[(0, 4)] = u * r6 / den;
        d_dparams[(1, 4)] = v * r6 / den;
    }
    if nd >= 8 {
        d_dparams[(0, 5)] = -u * num * r2 / (den * den);
        d_dparams[(1, 5)] = -v * num * r2 / (den * den);
        d_dparams[(0, 6)] = -u * num * r4 / (den * den);
        d_dparams[(1, 6)] = -v * num * r4 / (den * den);
        d_dparams[(0, 7)] = -u * num * r6 / (den * den);
        d_dparams[(1, 7)] = -v * num * r6 / (den * den);
    }
    if nd >= 12 {
        d_dparams[(0, 8)] = r2;
        d_dparams[(1, 8)] = 0.0;
        d_dparams[(0, 9)] = r4;
        d_dparams[(1, 9)] = 0.0;
        d_dparams[(0, 10)] = 0.0;
        d_dparams[(1, 10)] = r2;
        d_dparams[(0, 11)] = 0.0;
        d_dparams[(1, 11)] = r4;
    }

    if nd == 14 {
        let tau_x = params[12];
        let tau_y = params[13];
        let (xt, yt, d_tilt_dxy, d_tilt_dtau) = tilt_project(xd, yd, tau_x, tau_y);
        let d_duv_final = d_tilt_dxy * d_duv;
        let d_dparams_base = d_tilt_dxy * d_dparams;
        let mut full = DMatrix::<f64>::zeros(2, 14);
        full.view_mut((0, 0), (2, 12)).copy_from(&d_dparams_base);
        full.view_mut((0, 12), (2, 2)).copy_from(&d_tilt_dtau);
        (xt, yt, d_duv_final, full)
    } else {
        (xd, yd, d_duv, d_dparams)
    }
}

/// Tilted-sensor correction (OpenCV's `tau_x`/`tau_y`): projects the
/// homogeneous point `(x2, y2, 1)` through `Ry(tau_y) Rx(tau_x)` and
/// re-normalizes, matching OpenCV's documented tilted-sensor model.
fn tilt_project(x2: f64, y2: f64, tau_x: f64, tau_y: f64) -> (f64, f64, Matrix2<f64>, Matrix2<f64>) {
    use nalgebra::Matrix3;

    let (sx, cxc) = tau_x.sin_cos();
    let (sy, cyc) = tau_y.sin_cos();

    #[rustfmt::skip]
    let rx = Matrix3::new(
        1.0, 0.0, 0.0,
        0.0, cxc, -sx,
        0.0, sx,  cxc,
    );
    #[rustfmt::skip]
    let ry = Matrix3::new(
        cyc, 0.0, sy,
        0.0, 1.0, 0.0,
        -sy, 0.0, cyc,
    );
    #[rustfmt::skip]
    let drx_dtaux = Matrix3::new(
        0.0, 0.0, 0.0,
        0.0, -sx, -cxc,
        0.0, cxc, -sx,
    );
    #[rustfmt::skip]
    let dry_dtauy = Matrix3::new(
        -sy, 0.0, cyc,
        0.0, 0.0, 0.0,
        -cyc, 0.0, -sy,
    );

    let r = ry * rx;
    let v = Vector3::new(x2, y2, 1.0);
    let w = r * v;

    let dw_dx2 = r.column(0).into_owned();
    let dw_dy2 = r.column(1).into_owned();
    let dw_dtaux = ry * (drx_dtaux * v);
    let dw_dtauy = dry_dtauy * (rx * v);

    let xt = w.x / w.z;
    let yt = w.y / w.z;

    let quotient = |dw: &Vector3<f64>| -> (f64, f64) {
        (
            (dw.x * w.z - w.x * dw.z) / (w.z * w.z),
            (dw.y * w.z - w.y * dw.z) / (w.z * w.z),
        )
    };

    let (dxt_dx2, dyt_dx2) = quotient(&dw_dx2);
    let (dxt_dy2, dyt_dy2) = quotient(&dw_dy2);
    let (dxt_dtaux, dyt_dtaux) = quotient(&dw_dtaux);
    let (dxt_dtauy, dyt_dtauy) = quotient(&dw_dtauy);

    #[rustfmt::skip]
    let d_dxy = Matrix2::new(
        dxt_dx2, dxt_dy2,
        dyt_dx2, dyt_dy2,
    );
    #[rustfmt::skip]
    let d_dtau = Matrix2::new(
        dxt_dtaux, dxt_dtauy,
        dyt_dtaux, dyt_dtauy,
    );

    (xt, yt, d_dxy, d_dtau)
}

/// CAHVOR, recentered-radial simplification: the optical axis offset
/// `O = (alpha, beta)` shifts the center of the radial polynomial in
/// the normalized image plane instead of the full 3D HVOR vector
/// construction. Parameter order: `alpha, beta, r0, r1, r2`.
fn distort_cahvor(u: f64, v: f64, params: &[f64]) -> (f64, f64, Matrix2<f64>, DMatrix<f64>) {
    let alpha = params[0];
    let beta = params[1];
    let r0 = params[2];
    let r1 = params[3];
    let r2 = params[4];

    let du = u - alpha;
    let dv = v - beta;
    let tau2 = du * du + dv * dv;
    let tau4 = tau2 * tau2;
    let mu = 1.0 + r0 * tau2 + r1 * tau4 + r2 * tau2 * tau4;
    let dmu_dtau2 = r0 + 2.0 * r1 * tau2 + 3.0 * r2 * tau4;

    let up = alpha + mu * du;
    let vp = beta + mu * dv;

    let dup_du = mu + 2.0 * du * du * dmu_dtau2;
    let dup_dv = 2.0 * du * dv * dmu_dtau2;
    let dvp_du = dup_dv;
    let dvp_dv = mu + 2.0 * dv * dv * dmu_dtau2;

    #[rustfmt::skip]
    let d_duv = Matrix2::new(
        dup_du, dup_dv,
        dvp_du, dvp_dv,
    );

    let mut d_dparams = DMatrix::<f64>::zeros(2, 5);
    d_dparams[(0, 0)] = 1.0 - mu - 2.0 * du * du * dmu_dtau2;
    d_dparams[(1, 0)] = -2.0 * du * dv * dmu_dtau2;
    d_dparams[(0, 1)] = -2.0 * du * dv * dmu_dtau2;
    d_dparams[(1, 1)] = 1.0 - mu - 2.0 * dv * dv * dmu_dtau2;
    d_dparams[(0, 2)] = du * tau2;
    d_dparams[(1, 2)] = dv * tau2;
    d_dparams[(0, 3)] = du * tau4;
    d_dparams[(1, 3)] = dv * tau4;
    d_dparams[(0, 4)] = du * tau2 * tau4;
    d_dparams[(1, 4)] = dv * tau2 * tau4;

    (up, vp, d_duv, d_dparams)
}

/// CAHVORE: the entrance-pupil offset `E=(e0,e1,e2)` and `linearity`
/// shift the unprojected ray before the pinhole step, then the
/// result is distorted exactly as CAHVOR. The pre-shift pinhole
/// coordinates `(u0, v0)` (already computed by the caller) set the
/// radial weight of the shift so the two stages stay decoupled and
/// independently differentiable.
fn distort_cahvore(
    p: &Vector3<f64>,
    uv0: &Vector2<f64>,
    d_uv0_dp: &Matrix2x3<f64>,
    params: &[f64],
) -> (f64, f64, Matrix2x3<f64>, DMatrix<f64>) {
    use nalgebra::{Matrix3, Matrix3x4, RowVector3};

    let cahvor_params = &params[0..5];
    let e = Vector3::new(params[5], params[6], params[7]);
    let lin = params[8];

    let tau2_raw = uv0.x * uv0.x + uv0.y * uv0.y;
    let d_tau2_raw_dp: RowVector3<f64> =
        2.0 * uv0.x * d_uv0_dp.row(0) + 2.0 * uv0.y * d_uv0_dp.row(1);

    let p_eff = p + lin * tau2_raw * e;
    // d(p_eff)/dp = I + lin * e * d(tau2_raw)/dp^T  (outer product, 3x3)
    let d_peff_dp: Matrix3<f64> = Matrix3::identity() + (e * d_tau2_raw_dp) * lin;

    let iz = 1.0 / p_eff.z;
    let u_eff = p_eff.x * iz;
    let v_eff = p_eff.y * iz;
    #[rustfmt::skip]
    let d_uveff_dpeff = Matrix2x3::new(
        iz,  0.0, -u_eff * iz,
        0.0, iz,  -v_eff * iz,
    );
    let d_uveff_dp = d_uveff_dpeff * d_peff_dp;

    // d(p_eff)/d(e0,e1,e2,lin): first 3 columns = lin*tau2_raw*I3, last = tau2_raw*e.
    let mut d_peff_d_e_lin = Matrix3x4::<f64>::zeros();
    d_peff_d_e_lin
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&(Matrix3::identity() * (lin * tau2_raw)));
    d_peff_d_e_lin
        .fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&(e * tau2_raw));

    let (up, vp, d_duv_cahvor, d_dcahvor) = distort_cahvor(u_eff, v_eff, cahvor_params);

    let d_final_dp = d_duv_cahvor * d_uveff_dp;

    let d_uveff_d_e_lin = d_uveff_dpeff * d_peff_d_e_lin;
    let d_final_d_e_lin = d_duv_cahvor * d_uveff_d_e_lin;

    let mut full = DMatrix::<f64>::zeros(2, 9);
    full.view_mut((0, 0), (2, 5)).copy_from(&d_dcahvor);
    full.view_mut((0, 5), (2, 4)).copy_from(&d_final_d_e_lin);

    (up, vp, d_final_dp, full)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finite_diff_dp(family: DistortionFamily, intrinsics: &[f64], p: &Vector3<f64>) -> Matrix2x3<f64> {
        let h = 1e-6;
        let mut jac = Matrix2x3::zeros();
        for k in 0..3 {
            let mut plus = *p;
            let mut minus = *p;
            plus[k] += h;
            minus[k] -= h;
            let a = project_point(&plus, family, intrinsics, false, false).unwrap().px;
            let b = project_point(&minus, family, intrinsics, false, false).unwrap().px;
            let d = (a - b) / (2.0 * h);
            jac[(0, k)] = d.x;
            jac[(1, k)] = d.y;
        }
        jac
    }

    #[test]
    fn none_family_dp_matches_finite_difference() {
        let intrinsics = [1000.0, 1000.0, 500.0, 500.0];
        let p = Vector3::new(0.2, -0.1, 3.0);
        let proj = project_point(&p, DistortionFamily::None, &intrinsics, true, false).unwrap();
        let numeric = finite_diff_dp(DistortionFamily::None, &intrinsics, &p);
        assert!((proj.d_dp.unwrap() - numeric).norm() < 1e-4);
    }

    #[test]
    fn opencv5_dp_matches_finite_difference() {
        let intrinsics = [900.0, 910.0, 480.0, 360.0, -0.2, 0.05, 0.001, -0.0005, 0.01];
        let p = Vector3::new(0.3, 0.2, 2.5);
        let proj = project_point(&p, DistortionFamily::OpenCv5, &intrinsics, true, false).unwrap();
        let numeric = finite_diff_dp(DistortionFamily::OpenCv5, &intrinsics, &p);
        assert!((proj.d_dp.unwrap() - numeric).norm() < 1e-3);
    }

    #[test]
    fn opencv8_rational_dp_matches_finite_difference() {
        let intrinsics = [
            900.0, 900.0, 480.0, 360.0, -0.2, 0.05, 0.001, -0.0005, 0.01, 0.001, -0.0002, 0.0003,
        ];
        let p = Vector3::new(0.25, -0.15, 2.0);
        let proj = project_point(&p, DistortionFamily::OpenCv8, &intrinsics, true, false).unwrap();
        let numeric = finite_diff_dp(DistortionFamily::OpenCv8, &intrinsics, &p);
        assert!((proj.d_dp.unwrap() - numeric).norm() < 1e-3);
    }

    #[test]
    fn cahvor_dp_matches_finite_difference() {
        let intrinsics = [900.0, 900.0, 480.0, 360.0, 0.01, -0.02, 0.1, 0.01, 0.001];
        let p = Vector3::new(0.1, 0.2, 2.0);
        let proj = project_point(&p, DistortionFamily::Cahvor, &intrinsics, true, false).unwrap();
        let numeric = finite_diff_dp(DistortionFamily::Cahvor, &intrinsics, &p);
        assert!((proj.d_dp.unwrap() - numeric).norm() < 1e-3);
    }

    #[test]
    fn opencv14_tilt_dp_matches_finite_difference() {
        let intrinsics = [
            900.0, 900.0, 480.0, 360.0, -0.2, 0.05, 0.001, -0.0005, 0.01, 0.001, -0.0002, 0.0003,
            0.01, 0.01, 0.002, -0.003, 0.01, -0.02,
        ];
        let p = Vector3::new(0.2, -0.1, 2.2);
        let proj = project_point(&p, DistortionFamily::OpenCv14, &intrinsics, true, false).unwrap();
        let numeric = finite_diff_dp(DistortionFamily::OpenCv14, &intrinsics, &p);
        assert!((proj.d_dp.unwrap() - numeric).norm() < 1e-3);
    }

    #[test]
    fn cahvore_dp_matches_finite_difference() {
        let intrinsics = [
            900.0, 900.0, 480.0, 360.0, 0.01, -0.02, 0.1, 0.01, 0.001, 0.002, -0.001, 0.0015, 0.5,
        ];
        let p = Vector3::new(0.15, -0.1, 2.0);
        let proj = project_point(&p, DistortionFamily::Cahvore, &intrinsics, true, false).unwrap();
        let numeric = finite_diff_dp(DistortionFamily::Cahvore, &intrinsics, &p);
        assert!((proj.d_dp.unwrap() - numeric).norm() < 1e-3);
    }

    #[test]
    fn dintrinsics_matches_finite_difference_for_opencv5() {
        let intrinsics = [900.0, 910.0, 480.0, 360.0, -0.2, 0.05, 0.001, -0.0005, 0.01];
        let p = Vector3::new(0.3, 0.2, 2.5);
        let proj = project_point(&p, DistortionFamily::OpenCv5, &intrinsics, false, true).unwrap();
        let analytic = proj.d_dintrinsics.unwrap();

        let h = 1e-6;
        for k in 0..intrinsics.len() {
            let mut plus = intrinsics;
            let mut minus = intrinsics;
            plus[k] += h;
            minus[k] -= h;
            let a = project_point(&p, DistortionFamily::OpenCv5, &plus, false, false).unwrap().px;
            let b = project_point(&p, DistortionFamily::OpenCv5, &minus, false, false).unwrap().px;
            let d = (a - b) / (2.0 * h);
            assert!((analytic[(0, k)] - d.x).abs() < 1e-3, "col {k} x: {} vs {}", analytic[(0, k)], d.x);
            assert!((analytic[(1, k)] - d.y).abs() < 1e-3, "col {k} y: {} vs {}", analytic[(1, k)], d.y);
        }
    }

    #[test]
    fn behind_camera_point_is_marked_invalid() {
        let intrinsics = [1000.0, 1000.0, 500.0, 500.0];
        let p = Vector3::new(0.0, 0.0, -1.0);
        let proj = project_point(&p, DistortionFamily::None, &intrinsics, false, false).unwrap();
        assert!(!proj.valid);
        assert!(proj.px.x.is_nan());
    }

    #[test]
    fn wrong_width_intrinsics_is_invalid_argument() {
        let intrinsics = [1000.0, 1000.0, 500.0];
        let p = Vector3::new(0.0, 0.0, 1.0);
        assert!(project_point(&p, DistortionFamily::None, &intrinsics, false, false).is_err());
    }
}
