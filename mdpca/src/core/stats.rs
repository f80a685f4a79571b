//! RMSD, RMSF and radius of gyration.
//!
//! RMSD and RMSF are both `scale · sqrt(e_ref + e_k − 2·c_k)`, they only differ in the axis the
//! squared norms are averaged over and in the reference/cross terms.
use shared::{
    ndarray as nd,
    ndarray::Axis,
    Result,
};

use crate::core::align::Alignment;
use crate::core::error::AnalysisError;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregation {
    /// One value per frame, averaged over atoms.
    PerFrame,
    /// One value per atom, averaged over frames.
    PerAtom,
}


/// Mean squared norm of `ensemble` (`[nframes, natoms, 3]`) along `axis`.
pub fn extents(ensemble: nd::ArrayView3<f64>, axis: Aggregation) -> nd::Array1<f64> {
    let sq = ensemble.mapv(|x| x * x).sum_axis(Axis(2));
    let (avg_axis, count) = match axis {
        Aggregation::PerFrame => (Axis(1), ensemble.dim().1),
        Aggregation::PerAtom  => (Axis(0), ensemble.dim().0),
    };
    let total = sq.sum_axis(avg_axis);
    if count == 0 { total } else { total / count as f64 }
}


/// `scale · sqrt(max(0, reference_extent + extent_k − 2·cross_k))` for precomputed extents.
pub fn deviation_from_extents(
    reference_extent: f64,
    extents: nd::ArrayView1<f64>,
    cross: Option<nd::ArrayView1<f64>>,
    scale: f64,
    ) -> Result<nd::Array1<f64>>
{
    let mut ret = extents.mapv(|e| reference_extent + e);
    if let Some(c) = cross {
        if c.len() != extents.len() {
            return Err(AnalysisError::shape("cross terms", extents.len(), c.len()).into());
        }
        ret.zip_mut_with(&c, |r, c| *r -= 2.0 * c);
    }
    Ok(ret.mapv_into(|x| scale * x.max(0.0).sqrt()))
}


pub fn deviation(
    ensemble: nd::ArrayView3<f64>,
    axis: Aggregation,
    reference_extent: f64,
    cross: Option<nd::ArrayView1<f64>>,
    scale: f64,
    ) -> Result<nd::Array1<f64>>
{
    deviation_from_extents(reference_extent, extents(ensemble, axis).view(), cross, scale)
}


/// Per-frame RMSD of the fit atoms after optimal superposition.
pub fn rmsd(alignment: &Alignment, scale: f64) -> Result<nd::Array1<f64>> {
    let cross = alignment.singular_values.sum_axis(Axis(1));
    deviation_from_extents(alignment.reference_extent, alignment.extents.view(), Some(cross.view()), scale)
}


/// Per-atom RMSF of an ensemble already centred on its mean structure.
pub fn rmsf(centered: nd::ArrayView3<f64>, scale: f64) -> Result<nd::Array1<f64>> {
    deviation(centered, Aggregation::PerAtom, 0.0, None, scale)
}


/// Per-frame radius of gyration of the fit atoms.
pub fn radius_of_gyration(alignment: &Alignment, scale: f64) -> nd::Array1<f64> {
    alignment.extents.mapv(|e| scale * e.max(0.0).sqrt())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::align::{Aligner, ReflectionPolicy};
    use crate::core::selection::AtomSubset;
    use rand::{SeedableRng, rngs::StdRng};
    use rand_distr::{Distribution, Normal};
    use shared::ndarray::s;

    fn noisy_ensemble(nframes: usize, natoms: usize, seed: u64) -> nd::Array3<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let spread = Normal::new(0.0, 4.0).unwrap();
        let noise = Normal::new(0.0, 0.3).unwrap();
        let base = nd::Array2::from_shape_simple_fn((natoms, 3), || spread.sample(&mut rng));
        nd::Array3::from_shape_fn((nframes, natoms, 3), |(_, i, k)| base[[i, k]] + noise.sample(&mut rng))
    }

    #[test]
    fn test_extents_and_formula() {
        let ens = nd::arr3(&[[[1.0, 0.0, 0.0], [0.0, 2.0, 0.0]], [[0.0, 0.0, 3.0], [1.0, 1.0, 1.0]]]);
        assert_eq!(extents(ens.view(), Aggregation::PerFrame), nd::arr1(&[2.5, 6.0]));
        assert_eq!(extents(ens.view(), Aggregation::PerAtom), nd::arr1(&[5.0, 3.5]));

        let dev = deviation(ens.view(), Aggregation::PerFrame, 1.5, Some(nd::arr1(&[0.0, 5.0]).view()), 2.0).unwrap();
        assert_eq!(dev, nd::arr1(&[4.0, 0.0]));

        assert!(deviation(ens.view(), Aggregation::PerAtom, 0.0, Some(nd::arr1(&[1.0]).view()), 1.0).is_err());
    }

    #[test]
    fn test_rmsd_matches_direct_computation() {
        let ens = noisy_ensemble(6, 9, 11);
        let fit = AtomSubset::from_indices(vec![0, 1, 2, 4, 6, 8], 9).unwrap();
        let reference = ens.slice(s![0, .., ..]);
        let aligner = Aligner::new(reference, &fit, ReflectionPolicy::Proper).unwrap();
        let alignment = aligner.align(ens.view(), None).unwrap();

        let scale = 10.0;
        let values = rmsd(&alignment, scale).unwrap();
        assert!(values[0].abs() < 1e-5);

        let ref_fit = reference.select(Axis(0), fit.indices());
        let ref_fit = &ref_fit - &ref_fit.mean_axis(Axis(0)).unwrap();
        for it in 1 .. 6 {
            let moved = alignment.coords.slice(s![it, .., ..]).select(Axis(0), fit.indices());
            let msd = (&moved - &ref_fit).mapv(|x| x * x).sum() / fit.len() as f64;
            assert!((values[it] - scale * msd.sqrt()).abs() < 1e-8);
            assert!(values[it] > 0.0);
        }

        let rg = radius_of_gyration(&alignment, 1.0);
        let direct = (ref_fit.mapv(|x| x * x).sum() / fit.len() as f64).sqrt();
        assert!((rg[0] - direct).abs() < 1e-12);
    }

    #[test]
    fn test_rmsf_is_standard_deviation() {
        let ens = noisy_ensemble(40, 4, 5);
        let mean = ens.mean_axis(Axis(0)).unwrap();
        let centered = &ens - &mean;
        let values = rmsf(centered.view(), 1.0).unwrap();

        for i in 0 .. 4 {
            let var: f64 = (0 .. 3)
                .map(|k| ens.slice(s![.., i, k]).var(0.0))
                .sum();
            assert!((values[i] - var.sqrt()).abs() < 1e-12);
        }
    }
}
