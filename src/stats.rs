use serde::{Deserialize, Serialize};

/// Per-camera intrinsic covariance, reported only when
/// `OptimizeOpts::want_intrinsic_covariances` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrinsicCovariance {
    pub i_camera: usize,
    /// Row-major N_intrinsics x N_intrinsics covariance block.
    pub covariance: Vec<f64>,
    pub width: usize,
}

/// Result of a converged (or partially converged) `optimize` call.
///
/// `residuals` and `outlier_indices` are exposed because the residual
/// vector's ordering is part of the stable contract: callers may want
/// to inspect it post-solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub rms_reproj_error_pixels: f64,
    pub n_outliers: usize,
    pub outlier_indices: Vec<usize>,
    pub residuals: Vec<f64>,
    /// Present only when the NLLS driver hit its iteration cap or JᵀJ
    /// could not be factored; a `NumericalFailure` reports partial state
    /// this way instead of aborting.
    pub converged: bool,
    pub intrinsic_covariances: Option<Vec<IntrinsicCovariance>>,
}

impl StatsReport {
    pub fn empty() -> Self {
        StatsReport {
            rms_reproj_error_pixels: f64::NAN,
            n_outliers: 0,
            outlier_indices: Vec::new(),
            residuals: Vec::new(),
            converged: false,
            intrinsic_covariances: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// There is no file format owned by this crate; a caller that wants
    /// to log or persist a solve report does so with its own
    /// `serde_json` value.
    #[test]
    fn report_round_trips_through_json() {
        let report = StatsReport {
            rms_reproj_error_pixels: 0.42,
            n_outliers: 3,
            outlier_indices: vec![1, 9, 20],
            residuals: vec![0.1, -0.2],
            converged: true,
            intrinsic_covariances: Some(vec![IntrinsicCovariance {
                i_camera: 0,
                covariance: vec![1.0, 0.0, 0.0, 1.0],
                width: 2,
            }]),
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: StatsReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.n_outliers, report.n_outliers);
        assert_eq!(back.outlier_indices, report.outlier_indices);
    }
}
