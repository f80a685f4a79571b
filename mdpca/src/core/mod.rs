pub mod constants;
pub use constants::*;

pub mod error;
pub use error::{AnalysisError, Degeneracy};

pub mod config;
pub use config::AnalysisConfig;

pub mod selection;
pub use selection::{AtomSubset, Selection};

pub mod linalg;

pub mod geometry;
pub use geometry::*;

pub mod unwrap;
pub use unwrap::unwrap_trajectory;

pub mod align;
pub use align::{Aligner, Alignment, EnsembleSplit, ReflectionPolicy, split_ensemble};

pub mod pca;
pub use pca::{Pca, Scores};

pub mod stats;
pub use stats::*;

pub mod pcoa;
pub use pcoa::{pairwise_rmsd, principal_coordinates, PrincipalCoordinates};

pub mod report;
pub use report::{analyze, AnalysisInput, AnalysisParams, BoxInput, Report};
