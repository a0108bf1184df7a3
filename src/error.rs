use crate::stats::StatsReport;

/// Every failure mode this crate can report.
///
/// Structural problems (`InvalidArgument`, `InvalidDistortion`,
/// `InvalidContext`) are fatal: the call aborts before touching any
/// in-out buffer. `NumericalFailure` degrades gracefully and still
/// carries whatever partial solution the driver produced.
#[derive(thiserror::Error, Debug, Clone)]
pub enum CalibError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid distortion model: {0}")]
    InvalidDistortion(String),

    #[error("invalid or empty solver context")]
    InvalidContext,

    #[error("NLLS driver failed to converge: {message}")]
    NumericalFailure {
        message: String,
        partial: Box<StatsReport>,
    },
}

pub type Result<T> = std::result::Result<T, CalibError>;
