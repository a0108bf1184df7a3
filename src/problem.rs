//! `ProblemDetails`: which variable groups the solver is free to move.

use serde::{Deserialize, Serialize};

use crate::distortion::DistortionFamily;

/// Immutable record of five independent "is this variable group free"
/// flags. Passed by value through packing and assembly so the
/// projection and assembly stages stay oblivious to which groups are
/// enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub optimize_intrinsic_core: bool,
    pub optimize_intrinsic_distortions: bool,
    pub optimize_extrinsics: bool,
    pub optimize_frames: bool,
    pub skip_regularization: bool,
}

impl ProblemDetails {
    pub fn all_on() -> Self {
        ProblemDetails {
            optimize_intrinsic_core: true,
            optimize_intrinsic_distortions: true,
            optimize_extrinsics: true,
            optimize_frames: true,
            skip_regularization: false,
        }
    }

    /// True when every variable-group flag is off (regularization is
    /// not a variable group, so it is excluded from this check).
    pub fn is_none(&self) -> bool {
        !self.optimize_intrinsic_core
            && !self.optimize_intrinsic_distortions
            && !self.optimize_extrinsics
            && !self.optimize_frames
    }

    pub fn has_any_intrinsic(&self) -> bool {
        self.optimize_intrinsic_core || self.optimize_intrinsic_distortions
    }

    /// Width of the free-intrinsic block for one camera of the given
    /// family under this selection.
    pub fn intrinsic_optimization_width(&self, family: DistortionFamily) -> usize {
        let mut width = 0;
        if self.optimize_intrinsic_core {
            width += crate::distortion::N_INTRINSICS_CORE;
        }
        if self.optimize_intrinsic_distortions {
            width += family.param_count();
        }
        width
    }
}
