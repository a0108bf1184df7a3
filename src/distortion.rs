//! Distortion registry: the closed set of lens-distortion families,
//! their parameter counts and names.

use serde::{Deserialize, Serialize};

use crate::error::{CalibError, Result};

/// Number of doubles in the pinhole core (fx, fy, cx, cy).
pub const N_INTRINSICS_CORE: usize = 4;

/// A lens-distortion family. There is no `Invalid` variant: an unknown
/// name or family fails to parse via `Result`, so illegal states are
/// unrepresentable once a `DistortionFamily` exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistortionFamily {
    None,
    OpenCv4,
    OpenCv5,
    OpenCv8,
    OpenCv12,
    OpenCv14,
    Cahvor,
    Cahvore,
}

impl DistortionFamily {
    pub const ALL: [DistortionFamily; 8] = [
        DistortionFamily::None,
        DistortionFamily::OpenCv4,
        DistortionFamily::OpenCv5,
        DistortionFamily::OpenCv8,
        DistortionFamily::OpenCv12,
        DistortionFamily::OpenCv14,
        DistortionFamily::Cahvor,
        DistortionFamily::Cahvore,
    ];

    /// Uppercase token used by `from_name`/`name`.
    pub fn name(self) -> &'static str {
        match self {
            DistortionFamily::None => "NONE",
            DistortionFamily::OpenCv4 => "OPENCV4",
            DistortionFamily::OpenCv5 => "OPENCV5",
            DistortionFamily::OpenCv8 => "OPENCV8",
            DistortionFamily::OpenCv12 => "OPENCV12",
            DistortionFamily::OpenCv14 => "OPENCV14",
            DistortionFamily::Cahvor => "CAHVOR",
            DistortionFamily::Cahvore => "CAHVORE",
        }
    }

    /// Exact-match lookup. Unknown tokens are an `InvalidDistortion`
    /// error rather than a sentinel value.
    pub fn from_name(name: &str) -> Result<DistortionFamily> {
        Self::ALL
            .into_iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| CalibError::InvalidDistortion(format!("unknown distortion model {name}")))
    }

    /// N_d: number of distortion coefficients for this family.
    pub fn param_count(self) -> usize {
        match self {
            DistortionFamily::None => 0,
            DistortionFamily::OpenCv4 => 4,
            DistortionFamily::OpenCv5 => 5,
            DistortionFamily::OpenCv8 => 8,
            DistortionFamily::OpenCv12 => 12,
            DistortionFamily::OpenCv14 => 14,
            DistortionFamily::Cahvor => 5,
            DistortionFamily::Cahvore => 9,
        }
    }

    /// 4 + N_d: total per-camera intrinsic vector width.
    pub fn total_intrinsic_count(self) -> usize {
        N_INTRINSICS_CORE + self.param_count()
    }

    /// Whether this build can actually run this family. Every family is
    /// implemented directly here with no vendored math library gating
    /// any of them, so this is always true; kept as a method so
    /// `supported_distortion_models` has a single source of truth.
    pub fn is_available(self) -> bool {
        true
    }
}

/// Names of every distortion family available in this build.
pub fn supported_distortion_models() -> Vec<&'static str> {
    DistortionFamily::ALL
        .into_iter()
        .filter(|f| f.is_available())
        .map(DistortionFamily::name)
        .collect()
}

pub fn distortion_param_count(family: DistortionFamily) -> usize {
    family.param_count()
}

/// Used by callers warm-starting a solve by gradually enabling more
/// distortion coefficients. Steps through `DistortionFamily::ALL` one
/// family at a time towards `goal`, never overshooting it.
pub fn next_family(current: DistortionFamily, goal: DistortionFamily) -> DistortionFamily {
    if current == goal {
        return current;
    }
    let order: Vec<DistortionFamily> = DistortionFamily::ALL.to_vec();
    let cur_idx = order.iter().position(|&f| f == current);
    let goal_idx = order.iter().position(|&f| f == goal);
    match (cur_idx, goal_idx) {
        (Some(c), Some(g)) if g > c => order[c + 1],
        (Some(c), Some(g)) if g < c => order[c - 1],
        _ => goal,
    }
}
