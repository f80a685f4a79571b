use shared::{
    ndarray as nd,
    ndarray::s,
    debug,
    Result,
};

use crate::core::align::{Aligner, Alignment, EnsembleSplit, ReflectionPolicy, split_ensemble};
use crate::core::error::{AnalysisError, Degeneracy};
use crate::core::geometry::boxes_from_dimensions;
use crate::core::pca::{Pca, Scores};
use crate::core::pcoa::{pairwise_rmsd, principal_coordinates, PrincipalCoordinates};
use crate::core::selection::Selection;
use crate::core::stats::{radius_of_gyration, rmsd, rmsf};
use crate::core::unwrap::unwrap_trajectory;


/// Simulation box of every frame.
#[derive(Clone, Debug)]
pub enum BoxInput {
    /// `[nframes, 6]`: a, b, c, alpha, beta, gamma (degrees).
    Dimensions(nd::Array2<f64>),
    /// `[nframes, 3, 3]`, lattice vectors as rows.
    Matrices(nd::Array3<f64>),
}


#[derive(Clone, Debug)]
pub struct AnalysisInput {
    /// `[nframes, natoms, 3]`, wrapped into the box.
    pub positions: nd::Array3<f64>,
    pub boxes:     BoxInput,
    /// `[nframes, natoms, 3]`, co-indexed with `positions`.
    pub forces:    Option<nd::Array3<f64>>,
    /// `[natoms, 3]`, alignment target and anchor of the first frame.
    pub reference: Option<nd::Array2<f64>>,
}


#[derive(Clone, Debug)]
pub struct AnalysisParams {
    pub selection:    Selection,
    /// Frames before it form the training block of the PCA.
    pub split_index:  usize,
    pub n_components: usize,
    pub reflection:   ReflectionPolicy,
    /// Applied to RMSD, radius of gyration, RMSF and the pairwise RMSD.
    pub unit_scale:   f64,
    pub pairwise:     bool,
    /// Scale squared pairwise RMSD (Euclidean-embeddable) or the plain RMSD matrix.
    pub pcoa_squared: bool,
}


/// Everything one analysis run produces.
#[derive(Clone, Debug)]
pub struct Report {
    pub unwrapped:       nd::Array3<f64>,
    pub alignment:       Alignment,
    pub coords:          EnsembleSplit,
    pub forces:          Option<EnsembleSplit>,
    pub coord_pca:       Pca,
    pub force_pca:       Option<Pca>,
    pub coord_scores:    Scores,
    pub force_scores:    Option<Scores>,
    pub rmsd:            nd::Array1<f64>,
    pub rgyr:            nd::Array1<f64>,
    pub rmsf:            nd::Array1<f64>,
    pub coord_explained: nd::Array1<f64>,
    pub force_explained: Option<nd::Array1<f64>>,
    pub pcoa:            Option<PrincipalCoordinates>,
    pub warnings:        Vec<Degeneracy>,
}


fn resolve_boxes(boxes: &BoxInput, nframes: usize) -> Result<nd::Array3<f64>> {
    match boxes {
        BoxInput::Dimensions(dims) => {
            if dims.nrows() != nframes {
                return Err(AnalysisError::shape("box descriptors", (nframes, 6), dims.dim()).into());
            }
            boxes_from_dimensions(dims.view())
        },
        BoxInput::Matrices(mats) => {
            if mats.dim() != (nframes, 3, 3) {
                return Err(AnalysisError::shape("box matrices", (nframes, 3, 3), mats.dim()).into());
            }
            Ok(mats.clone())
        },
    }
}


/// Unwrap, align, split and decompose one trajectory.
pub fn analyze(inputs: &AnalysisInput, params: &AnalysisParams) -> Result<Report> {
    let (nframes, natoms, ndim) = inputs.positions.dim();
    if nframes == 0 || ndim != 3 {
        return Err(AnalysisError::shape("positions", "(nframes >= 1, natoms, 3)", inputs.positions.dim()).into());
    }
    params.selection.check_natoms(natoms)?;
    if let Some(f) = inputs.forces.as_ref() {
        if f.dim() != inputs.positions.dim() {
            return Err(AnalysisError::shape("forces", inputs.positions.dim(), f.dim()).into());
        }
    }

    let boxes = resolve_boxes(&inputs.boxes, nframes)?;
    let unwrapped = unwrap_trajectory(
        inputs.positions.view(), boxes.view(), inputs.reference.as_ref().map(|r| r.view()))?;
    debug!("Unwrapped {} frames of {} atoms.", nframes, natoms);

    let reference = match inputs.reference.as_ref() {
        Some(r) => r.view(),
        None    => unwrapped.slice(s![0, .., ..]),
    };
    let aligner = Aligner::new(reference, &params.selection.fit, params.reflection)?;
    let alignment = aligner.align(unwrapped.view(), inputs.forces.as_ref().map(|f| f.view()))?;

    let report_atoms = &params.selection.report;
    let coords = split_ensemble(alignment.coords.view(), report_atoms, params.split_index)?;
    let forces = alignment.forces.as_ref()
        .map(|f| split_ensemble(f.view(), report_atoms, params.split_index))
        .transpose()?;

    let coord_pca = Pca::fit(coords.training.view())?;
    let coord_scores = coord_pca.scores(&coords, params.n_components)?;
    let coord_explained = coord_pca.explained_variance(params.n_components);

    let force_pca = forces.as_ref()
        .map(|f| Pca::fit(f.training.view()))
        .transpose()?;
    let force_scores = match (force_pca.as_ref(), forces.as_ref()) {
        (Some(pca), Some(f)) => Some(pca.scores(f, params.n_components)?),
        _ => None,
    };
    let force_explained = force_pca.as_ref().map(|pca| pca.explained_variance(params.n_components));

    let rmsd = rmsd(&alignment, params.unit_scale)?;
    let rgyr = radius_of_gyration(&alignment, params.unit_scale);
    let rmsf = rmsf(coords.centered()?.view(), params.unit_scale)?;

    let mut pairwise_warnings = vec![];
    let pcoa = if params.pairwise {
        let (dist, w) = pairwise_rmsd(alignment.coords.view(), &params.selection.fit, params.reflection)?;
        pairwise_warnings = w;
        let exponent = if params.pcoa_squared { 2 } else { 1 };
        let dissimilarity = dist.mapv(|d| (d * params.unit_scale).powi(exponent));
        Some(principal_coordinates(dissimilarity.view(), params.n_components)?)
    } else {
        None
    };

    let mut warnings = alignment.warnings.clone();
    warnings.extend_from_slice(coord_pca.warnings());
    if let Some(pca) = force_pca.as_ref() {
        warnings.extend_from_slice(pca.warnings());
    }
    warnings.extend(pairwise_warnings);
    if let Some(p) = pcoa.as_ref() {
        warnings.extend_from_slice(&p.warnings);
    }

    Ok(Report {
        unwrapped,
        alignment,
        coords,
        forces,
        coord_pca,
        force_pca,
        coord_scores,
        force_scores,
        rmsd,
        rgyr,
        rmsf,
        coord_explained,
        force_explained,
        pcoa,
        warnings,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::selection::AtomSubset;

    fn small_input(nframes: usize, natoms: usize) -> AnalysisInput {
        let positions = nd::Array3::from_shape_fn((nframes, natoms, 3), |(t, i, k)| {
            2.0 + (i * 3 + k) as f64 * 0.7 + 0.2 * ((t * (i + 1) + k) as f64).sin()
        });
        let dims = nd::Array2::from_shape_fn((nframes, 6), |(_, j)| if j < 3 { 20.0 } else { 90.0 });
        let forces = positions.mapv(|x| (3.0 * x).cos());
        AnalysisInput { positions, boxes: BoxInput::Dimensions(dims), forces: Some(forces), reference: None }
    }

    fn params(natoms: usize, split_index: usize) -> AnalysisParams {
        AnalysisParams {
            selection: Selection::uniform(AtomSubset::all(natoms)),
            split_index,
            n_components: 4,
            reflection: ReflectionPolicy::Proper,
            unit_scale: 10.0,
            pairwise: true,
            pcoa_squared: true,
        }
    }

    #[test]
    fn test_report_shapes() {
        let input = small_input(12, 5);
        let report = analyze(&input, &params(5, 9)).unwrap();

        assert_eq!(report.unwrapped.dim(), (12, 5, 3));
        assert_eq!(report.coords.training.dim(), (9, 15));
        assert_eq!(report.coords.heldout.dim(), (3, 15));
        assert_eq!(report.coord_scores.training.dim(), (9, 4));
        assert_eq!(report.coord_scores.heldout.dim(), (3, 4));
        assert_eq!(report.force_scores.as_ref().unwrap().heldout.dim(), (3, 4));
        assert_eq!(report.coord_explained.len(), 4);
        assert_eq!(report.force_explained.as_ref().unwrap().len(), 4);
        assert_eq!(report.rmsd.len(), 12);
        assert_eq!(report.rgyr.len(), 12);
        assert_eq!(report.rmsf.len(), 5);
        assert!(report.rmsd[0].abs() < 1e-5);

        let pcoa = report.pcoa.as_ref().unwrap();
        assert_eq!(pcoa.coords.dim(), (12, 4));
    }

    #[test]
    fn test_shape_errors() {
        let mut input = small_input(4, 3);
        input.forces = Some(nd::Array3::zeros((4, 2, 3)));
        let err = analyze(&input, &params(3, 3)).unwrap_err();
        assert!(matches!(err.downcast_ref::<AnalysisError>(), Some(AnalysisError::ShapeMismatch { .. })));

        let input = small_input(4, 3);
        assert!(analyze(&input, &params(4, 3)).is_err());
        assert!(analyze(&input, &params(3, 0)).is_err());
        assert!(analyze(&input, &params(3, 5)).is_err());

        let mut input = small_input(4, 3);
        input.boxes = BoxInput::Matrices(nd::Array3::zeros((4, 3, 3)));
        let err = analyze(&input, &params(3, 3)).unwrap_err();
        assert!(matches!(err.downcast_ref::<AnalysisError>(), Some(AnalysisError::Geometry { frame: Some(0), .. })));
    }

    #[test]
    fn test_pcoa_of_plain_rmsd() {
        let input = small_input(8, 4);
        let params = AnalysisParams { pcoa_squared: false, ..params(4, 6) };
        let report = analyze(&input, &params).unwrap();

        let (dist, _) = pairwise_rmsd(report.alignment.coords.view(), &params.selection.fit, params.reflection).unwrap();
        let expect = principal_coordinates((dist * params.unit_scale).view(), params.n_components).unwrap();
        let actual = report.pcoa.as_ref().unwrap();
        for (a, e) in actual.eigenvalues.iter().zip(expect.eigenvalues.iter()) {
            assert!((a - e).abs() < 1e-9 * e.abs().max(1.0));
        }
    }

    #[test]
    fn test_empty_report_subset() {
        let input = small_input(5, 4);
        let mut params = params(4, 4);
        params.selection.report = AtomSubset::from_mask(&[false; 4]);

        let err = analyze(&input, &params).unwrap_err();
        assert!(matches!(err.downcast_ref::<AnalysisError>(), Some(AnalysisError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_collinear_fit_is_reported_once() {
        let mut input = small_input(6, 4);
        for mut frame in input.positions.outer_iter_mut() {
            for i in 0 .. 3 {
                frame.row_mut(i).fill(3.0 + i as f64);
            }
        }
        let mut params = params(4, 5);
        params.selection = Selection::new(
            AtomSubset::from_indices(vec![0, 1, 2], 4).unwrap(), AtomSubset::all(4)).unwrap();

        let report = analyze(&input, &params).unwrap();
        let reference_level = report.warnings.iter()
            .filter(|w| matches!(w, Degeneracy::IllConditionedFit { frame: None, .. }))
            .count();
        // once from the alignment onto frame 0, once for the pairwise matrix
        assert_eq!(reference_level, 2);
    }
}
