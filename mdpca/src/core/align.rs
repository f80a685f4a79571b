use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use shared::{
    ndarray as nd,
    ndarray::{s, Axis},
    nalgebra as na,
    warn,
    Result,
};

use crate::core::constants::COLLINEAR_TOL;
use crate::core::error::{AnalysisError, Degeneracy};
use crate::core::linalg::{mat33, mat33_from_view, matrix3};
use crate::core::selection::AtomSubset;


/// What to do when the optimal orthogonal superposition is a reflection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReflectionPolicy {
    /// Flip the axis of the smallest singular value so that `det(R) = +1`.
    #[default]
    #[serde(rename = "proper")]
    Proper,

    /// Keep the uncorrected `U·V`, reported as [`Degeneracy::ImproperRotation`].
    #[serde(rename = "improper")]
    AllowImproper,
}


/// Result of superimposing every frame onto the reference.
#[derive(Clone, Debug)]
pub struct Alignment {
    /// `[nframes, 3, 3]`, aligned row `x` is `R·x`.
    pub rotations:        nd::Array3<f64>,
    /// `[nframes, 3]`, singular values of the cross-covariance with the reflection sign folded in.
    pub singular_values:  nd::Array2<f64>,
    /// Mean squared norm of the centred reference fit atoms.
    pub reference_extent: f64,
    /// Mean squared norm of the centred fit atoms, per frame.
    pub extents:          nd::Array1<f64>,
    /// `[nframes, natoms, 3]`, centred on the fit atoms and rotated.
    pub coords:           nd::Array3<f64>,
    /// `[nframes, natoms, 3]`, rotated with the same matrices as `coords`, never translated.
    pub forces:           Option<nd::Array3<f64>>,
    pub warnings:         Vec<Degeneracy>,
}


struct FrameFit {
    centroid: nd::Array1<f64>,
    rotation: na::Matrix3<f64>,
    singular: [f64; 3],
    extent:   f64,
    improper: bool,
    collinear: bool,
}


/// Kabsch superposition onto a fixed reference structure.
#[derive(Clone, Debug)]
pub struct Aligner {
    fit:        AtomSubset,
    reflection: ReflectionPolicy,
    reference:  nd::Array2<f64>,
    reference_extent: f64,
    well_conditioned: bool,
    warnings:   Vec<Degeneracy>,
}


fn centered(x: nd::Array2<f64>) -> (nd::Array2<f64>, nd::Array1<f64>) {
    let c = x.mean_axis(Axis(0)).unwrap_or_else(|| nd::Array1::zeros(3));
    (x - &c, c)
}


fn extent_of(x: nd::ArrayView2<f64>) -> f64 {
    if x.nrows() == 0 { return 0.0; }
    x.iter().map(|v| v * v).sum::<f64>() / x.nrows() as f64
}


fn is_collinear(sv: &na::Vector3<f64>) -> bool {
    let mut s = [sv[0].abs(), sv[1].abs(), sv[2].abs()];
    s.sort_by(|a, b| b.total_cmp(a));
    s[1] <= COLLINEAR_TOL * s[0]
}


impl Aligner {
    /// `reference` holds all atoms of the system, `[natoms, 3]`; only `fit` atoms are used.
    pub fn new(reference: nd::ArrayView2<f64>, fit: &AtomSubset, reflection: ReflectionPolicy) -> Result<Self> {
        let mut aligner = Self::unlogged(reference, fit, reflection)?;
        if !aligner.well_conditioned {
            warn!("Only {} fit atoms, or the fit atoms of the reference are collinear: the superposition is not unique.", fit.len());
            aligner.warnings.push(Degeneracy::IllConditionedFit { frame: None, natoms: fit.len() });
        }
        Ok(aligner)
    }


    /// Same as [`Aligner::new`] without logging or recording the conditioning of the reference.
    /// Used when many references are fitted in a row and their conditioning is reported once.
    pub(crate) fn unlogged(reference: nd::ArrayView2<f64>, fit: &AtomSubset, reflection: ReflectionPolicy) -> Result<Self> {
        if reference.dim() != (fit.natoms(), 3) {
            return Err(AnalysisError::shape("reference structure", (fit.natoms(), 3), reference.dim()).into());
        }

        let (reference, _) = centered(reference.select(Axis(0), fit.indices()));
        let reference_extent = extent_of(reference.view());

        let well_conditioned = fit.len() >= 3 && {
            let gyr = reference.t().dot(&reference);
            !is_collinear(&matrix3(&mat33_from_view(gyr.view())).singular_values())
        };

        Ok(Self { fit: fit.clone(), reflection, reference, reference_extent, well_conditioned, warnings: vec![] })
    }


    pub fn reference_extent(&self) -> f64 { self.reference_extent }
    pub fn fit(&self) -> &AtomSubset { &self.fit }
    pub fn reflection(&self) -> ReflectionPolicy { self.reflection }
    pub fn is_well_conditioned(&self) -> bool { self.well_conditioned }


    fn fit_frame(&self, frame: nd::ArrayView2<f64>) -> Result<FrameFit> {
        let nfit = self.fit.len();
        let (x, centroid) = centered(frame.select(Axis(0), self.fit.indices()));
        let extent = extent_of(x.view());

        if nfit == 0 {
            return Ok(FrameFit {
                centroid, rotation: na::Matrix3::identity(), singular: [0.0; 3],
                extent, improper: false, collinear: false,
            });
        }

        let h = self.reference.t().dot(&x) / nfit as f64;
        let svd = matrix3(&mat33_from_view(h.view())).svd(true, true);
        let u = svd.u.ok_or_else(|| shared::anyhow::anyhow!("SVD of the cross-covariance did not converge"))?;
        let mut v_t = svd.v_t.ok_or_else(|| shared::anyhow::anyhow!("SVD of the cross-covariance did not converge"))?;
        let mut sv = svd.singular_values;

        let collinear = self.well_conditioned && is_collinear(&sv);

        let mut rotation = u * v_t;
        let mut improper = false;
        if rotation.determinant() < 0.0 {
            match self.reflection {
                ReflectionPolicy::Proper => {
                    let imin = sv.imin();
                    v_t.row_mut(imin).neg_mut();
                    sv[imin] = -sv[imin];
                    rotation = u * v_t;
                },
                ReflectionPolicy::AllowImproper => improper = true,
            }
        }

        Ok(FrameFit {
            centroid, rotation, singular: [sv[0], sv[1], sv[2]],
            extent, improper, collinear,
        })
    }


    /// Superimpose all frames of `coords` (`[nframes, natoms, 3]`) onto the reference and rotate
    /// the co-indexed `forces` with the very same matrices.
    pub fn align(&self, coords: nd::ArrayView3<f64>, forces: Option<nd::ArrayView3<f64>>) -> Result<Alignment> {
        self.align_frames(coords, forces, true)
    }


    pub(crate) fn align_frames(&self, coords: nd::ArrayView3<f64>, forces: Option<nd::ArrayView3<f64>>,
                               log: bool) -> Result<Alignment> {
        let (nframes, natoms, ndim) = coords.dim();
        if natoms != self.fit.natoms() || ndim != 3 {
            return Err(AnalysisError::shape("coordinates", (nframes, self.fit.natoms(), 3), coords.dim()).into());
        }
        if let Some(f) = forces.as_ref() {
            if f.dim() != coords.dim() {
                return Err(AnalysisError::shape("forces", coords.dim(), f.dim()).into());
            }
        }

        let fits = (0 .. nframes).into_par_iter()
            .map(|it| self.fit_frame(coords.index_axis(Axis(0), it)))
            .collect::<Result<Vec<FrameFit>>>()?;

        let mut warnings = self.warnings.clone();
        let mut rotations       = nd::Array3::<f64>::zeros((nframes, 3, 3));
        let mut singular_values = nd::Array2::<f64>::zeros((nframes, 3));
        let mut extents         = nd::Array1::<f64>::zeros(nframes);
        let mut aligned         = nd::Array3::<f64>::zeros((nframes, natoms, 3));
        let mut rotated_forces  = forces.as_ref().map(|f| nd::Array3::<f64>::zeros(f.raw_dim()));

        for (it, fit) in fits.iter().enumerate() {
            if fit.improper {
                if log { warn!("Frame {} is superimposed by an improper rotation.", it); }
                warnings.push(Degeneracy::ImproperRotation { frame: it });
            }
            if fit.collinear {
                if log { warn!("Fit atoms of frame {} are collinear, its rotation is not unique.", it); }
                warnings.push(Degeneracy::IllConditionedFit { frame: Some(it), natoms: self.fit.len() });
            }

            rotations.slice_mut(s![it, .., ..]).assign(&nd::arr2(&mat33(&fit.rotation)));
            singular_values.slice_mut(s![it, ..]).assign(&nd::aview1(&fit.singular));
            extents[it] = fit.extent;

            let rot = rotations.slice(s![it, .., ..]);
            let frame = &coords.slice(s![it, .., ..]) - &fit.centroid;
            aligned.slice_mut(s![it, .., ..]).assign(&frame.dot(&rot.t()));

            if let (Some(f), Some(out)) = (forces.as_ref(), rotated_forces.as_mut()) {
                out.slice_mut(s![it, .., ..]).assign(&f.slice(s![it, .., ..]).dot(&rot.t()));
            }
        }

        Ok(Alignment {
            rotations,
            singular_values,
            reference_extent: self.reference_extent,
            extents,
            coords: aligned,
            forces: rotated_forces,
            warnings,
        })
    }
}


/// Centred and flattened ensemble split into a training and a held-out block.
#[derive(Clone, Debug)]
pub struct EnsembleSplit {
    /// Cross-frame mean structure, `[nreport, 3]`.
    pub mean:     nd::Array2<f64>,
    /// `[split_index, nreport*3]`
    pub training: nd::Array2<f64>,
    /// `[nframes - split_index, nreport*3]`
    pub heldout:  nd::Array2<f64>,
}


impl EnsembleSplit {
    pub fn nframes(&self) -> usize {
        self.training.nrows() + self.heldout.nrows()
    }

    /// Both blocks joined back in frame order as `[nframes, nreport, 3]`.
    pub fn centered(&self) -> Result<nd::Array3<f64>> {
        let joined = nd::concatenate(Axis(0), &[self.training.view(), self.heldout.view()])?;
        Ok(joined.as_standard_layout().into_owned().into_shape((self.nframes(), self.mean.nrows(), 3))?)
    }
}


/// Restrict `aligned` to the `report` atoms, remove the cross-frame mean, flatten each frame to
/// `[x1, y1, z1, x2, ...]` and split the frames at `split_index`.
pub fn split_ensemble(aligned: nd::ArrayView3<f64>, report: &AtomSubset, split_index: usize) -> Result<EnsembleSplit> {
    let (nframes, natoms, _) = aligned.dim();
    report.check_natoms(natoms, "aligned ensemble")?;
    if split_index > nframes {
        return Err(AnalysisError::shape("split index", format!("<= {}", nframes), split_index).into());
    }

    let selected = aligned.select(Axis(1), report.indices());
    let mean = selected.mean_axis(Axis(0))
        .ok_or_else(|| AnalysisError::shape("aligned ensemble", "at least one frame", nframes))?;

    // `select` along the atom axis does not keep the standard layout
    let flat = (selected - &mean).as_standard_layout().into_owned()
        .into_shape((nframes, report.len() * 3))?;
    let training = flat.slice(s![.. split_index, ..]).to_owned();
    let heldout  = flat.slice(s![split_index .., ..]).to_owned();

    Ok(EnsembleSplit { mean, training, heldout })
}
