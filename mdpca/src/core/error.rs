use std::fmt;

use thiserror::Error;


/// Fatal errors of the analysis core. They are carried inside `anyhow::Error`, recover them
/// with `err.downcast_ref::<AnalysisError>()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("shape mismatch in {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what:     String,
        expected: String,
        found:    String,
    },

    #[error("degenerate simulation box{}: {reason}", .frame.map(|i| format!(" at frame {}", i)).unwrap_or_default())]
    Geometry {
        frame:  Option<usize>,
        reason: String,
    },
}


impl AnalysisError {
    pub fn shape<W, E, F>(what: W, expected: E, found: F) -> Self
    where W: fmt::Display, E: fmt::Debug, F: fmt::Debug {
        Self::ShapeMismatch {
            what:     what.to_string(),
            expected: format!("{:?}", expected),
            found:    format!("{:?}", found),
        }
    }

    pub fn geometry<R: Into<String>>(frame: Option<usize>, reason: R) -> Self {
        Self::Geometry { frame, reason: reason.into() }
    }

    pub fn at_frame(self, iframe: usize) -> Self {
        match self {
            Self::Geometry { frame: None, reason } => Self::Geometry { frame: Some(iframe), reason },
            other => other,
        }
    }
}


/// Non-fatal numerical conditions met during the analysis. The computation proceeds and the
/// conditions are reported back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Degeneracy {
    /// A covariance eigenvalue below zero was set to 0.
    ClampedEigenvalue { index: usize, value: f64 },

    /// Fewer than three non-collinear atoms in the fit subset.
    IllConditionedFit { frame: Option<usize>, natoms: usize },

    /// The optimal orthogonal transform of this frame is a reflection (kept as requested).
    ImproperRotation { frame: usize },
}


impl fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Degeneracy::*;
        match self {
            ClampedEigenvalue { index, value } =>
                write!(f, "eigenvalue #{} = {:e} is negative and clamped to 0", index, value),
            IllConditionedFit { frame: Some(i), natoms } =>
                write!(f, "fit subset of frame {} is ill-conditioned ({} atoms, collinear or too few)", i, natoms),
            IllConditionedFit { frame: None, natoms } =>
                write!(f, "fit subset of the reference is ill-conditioned ({} atoms, collinear or too few)", natoms),
            ImproperRotation { frame } =>
                write!(f, "superposition of frame {} is an improper rotation (reflection)", frame),
        }
    }
}
