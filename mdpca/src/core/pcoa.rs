use rayon::prelude::*;

use shared::{
    ndarray as nd,
    ndarray::{s, Axis},
    warn,
    Result,
};

use crate::core::align::{Aligner, ReflectionPolicy};
use crate::core::error::{AnalysisError, Degeneracy};
use crate::core::linalg::{dmatrix, symmetric_eigen_desc};
use crate::core::selection::AtomSubset;
use crate::core::stats::rmsd;


/// Classical multidimensional scaling of a dissimilarity matrix.
#[derive(Clone, Debug)]
pub struct PrincipalCoordinates {
    /// All eigenvalues of the double-centred matrix, descending, clamped to be non-negative.
    pub eigenvalues: nd::Array1<f64>,
    /// `[nitems, ncomponents]`
    pub coords:      nd::Array2<f64>,
    pub warnings:    Vec<Degeneracy>,
}


/// Symmetric matrix of optimal-superposition RMSD between every pair of frames, in the units of
/// `ensemble`. Rows are computed in parallel.
///
/// Each frame serves once as the reference. Ill-conditioned fits and reflections are logged once
/// for the whole matrix and returned as warnings.
pub fn pairwise_rmsd(ensemble: nd::ArrayView3<f64>, fit: &AtomSubset, policy: ReflectionPolicy)
    -> Result<(nd::Array2<f64>, Vec<Degeneracy>)>
{
    let (nframes, natoms, _) = ensemble.dim();
    fit.check_natoms(natoms, "pairwise ensemble")?;

    let rows = (0 .. nframes).into_par_iter()
        .map(|i| {
            let aligner = Aligner::unlogged(ensemble.slice(s![i, .., ..]), fit, policy)?;
            let alignment = aligner.align_frames(ensemble.slice(s![i + 1 .., .., ..]), None, false)?;
            let nimproper = alignment.warnings.iter()
                .filter(|w| matches!(w, Degeneracy::ImproperRotation { .. }))
                .count();
            Ok((rmsd(&alignment, 1.0)?, aligner.is_well_conditioned(), nimproper))
        })
        .collect::<Result<Vec<(nd::Array1<f64>, bool, usize)>>>()?;

    let mut warnings = vec![];
    let nill = rows.iter().filter(|(_, ok, _)| !ok).count();
    if nill > 0 {
        warn!("Fit atoms of {} out of {} frames are collinear or too few: pairwise superpositions are not unique.", nill, nframes);
        warnings.push(Degeneracy::IllConditionedFit { frame: None, natoms: fit.len() });
    }
    let nimproper: usize = rows.iter().map(|(_, _, n)| n).sum();
    if nimproper > 0 {
        warn!("{} pairwise superpositions are improper rotations.", nimproper);
    }

    let mut ret = nd::Array2::<f64>::zeros((nframes, nframes));
    for (i, (row, _, _)) in rows.into_iter().enumerate() {
        ret.slice_mut(s![i, i + 1 ..]).assign(&row);
        ret.slice_mut(s![i + 1 .., i]).assign(&row);
    }
    Ok((ret, warnings))
}


/// Torgerson scaling: eigendecomposition of `−½ (D − r_i − r_j + r̄)` with `r` the row means of
/// `dissimilarity`. Coordinates are eigenvectors scaled by the square roots of their eigenvalues.
pub fn principal_coordinates(dissimilarity: nd::ArrayView2<f64>, n_components: usize) -> Result<PrincipalCoordinates> {
    let (n, ncols) = dissimilarity.dim();
    if n != ncols {
        return Err(AnalysisError::shape("dissimilarity matrix", (n, n), (n, ncols)).into());
    }

    let r = dissimilarity.mean_axis(Axis(1)).unwrap_or_else(|| nd::Array1::zeros(n));
    let rbar = r.mean().unwrap_or(0.0);

    let row = r.view().insert_axis(Axis(1));
    let col = r.view().insert_axis(Axis(0));
    let centred = (&dissimilarity - &row - &col + rbar) * -0.5;

    let eig = symmetric_eigen_desc(dmatrix(centred.view()));
    let k = n_components.min(n);

    let mut coords = eig.vectors.slice(s![.., .. k]).to_owned();
    for (mut column, lambda) in coords.columns_mut().into_iter().zip(eig.values.iter()) {
        column *= lambda.sqrt();
    }

    Ok(PrincipalCoordinates {
        eigenvalues: eig.values,
        coords,
        warnings: eig.warnings,
    })
}
