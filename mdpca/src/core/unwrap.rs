use shared::{
    ndarray as nd,
    ndarray::s,
    cumsum,
    Result,
};

use crate::core::error::AnalysisError;
use crate::core::geometry::invert_boxes;


/// Map a fractional displacement into `[-0.5, 0.5)`.
#[inline]
pub fn wrap_half(d: f64) -> f64 {
    (d + 0.5).rem_euclid(1.0) - 0.5
}


/// Remove jumps across periodic boundaries.
///
/// `positions` is `[nframes, natoms, 3]`, `boxes` holds one lattice matrix per frame
/// (`[nframes, 3, 3]`, lattice vectors as rows). An atom is assumed to move less than half a box
/// vector between consecutive frames. When `reference` (`[natoms, 3]`) is given, frame 0 is
/// first brought to the periodic image closest to it; otherwise frame 0 is kept as-is.
pub fn unwrap_trajectory(
    positions: nd::ArrayView3<f64>,
    boxes:     nd::ArrayView3<f64>,
    reference: Option<nd::ArrayView2<f64>>,
    ) -> Result<nd::Array3<f64>>
{
    let (nframes, natoms, ndim) = positions.dim();

    if ndim != 3 || nframes == 0 {
        return Err(AnalysisError::shape("positions", "(nframes >= 1, natoms, 3)", positions.shape()).into());
    }
    if boxes.dim() != (nframes, 3, 3) {
        return Err(AnalysisError::shape("boxes", (nframes, 3, 3), boxes.dim()).into());
    }
    if let Some(r) = reference.as_ref() {
        if r.dim() != (natoms, 3) {
            return Err(AnalysisError::shape("reference frame", (natoms, 3), r.dim()).into());
        }
    }

    if natoms == 0 {
        return Ok(nd::Array3::zeros((nframes, 0, 3)));
    }
    if nframes == 1 && reference.is_none() {
        return Ok(positions.to_owned());
    }

    let inv = invert_boxes(boxes)?;

    let mut frac = nd::Array3::<f64>::zeros((nframes, natoms, 3));
    for it in 0 .. nframes {
        frac.slice_mut(s![it, .., ..])
            .assign(&positions.slice(s![it, .., ..]).dot(&inv.slice(s![it, .., ..])));
    }

    let start = match reference {
        Some(r) => {
            let sref = r.dot(&inv.slice(s![0, .., ..]));
            let delta = (&frac.slice(s![0, .., ..]) - &sref).mapv(wrap_half);
            sref + delta
        },
        None => frac.slice(s![0, .., ..]).to_owned(),
    };

    let steps = (&frac.slice(s![1.., .., ..]) - &frac.slice(s![.. -1, .., ..])).mapv(wrap_half);

    let mut unwrapped = nd::Array3::<f64>::zeros((nframes, natoms, 3));
    unwrapped.slice_mut(s![0, .., ..]).assign(&start);
    for iatom in 0 .. natoms {
        for idim in 0 .. 3 {
            let path: Vec<f64> = cumsum(start[[iatom, idim]], steps.slice(s![.., iatom, idim]).iter());
            unwrapped.slice_mut(s![1.., iatom, idim]).assign(&nd::aview1(&path));
        }
    }

    for it in 0 .. nframes {
        let cart = unwrapped.slice(s![it, .., ..]).dot(&boxes.slice(s![it, .., ..]));
        unwrapped.slice_mut(s![it, .., ..]).assign(&cart);
    }

    Ok(unwrapped)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::box_from_dimensions;

    fn cubic_boxes(nframes: usize, a: f64) -> nd::Array3<f64> {
        let cell = box_from_dimensions([a, a, a, 90.0, 90.0, 90.0]).unwrap();
        let cell = nd::arr2(&cell);
        nd::stack(nd::Axis(0), &vec![cell.view(); nframes]).unwrap()
    }

    fn max_abs_diff(a: nd::ArrayView3<f64>, b: nd::ArrayView3<f64>) -> f64 {
        (&a - &b).iter().fold(0.0f64, |acc, x| acc.max(x.abs()))
    }

    #[test]
    fn test_wrap_half() {
        assert_eq!(wrap_half(0.25), 0.25);
        assert_eq!(wrap_half(0.75), -0.25);
        assert_eq!(wrap_half(-0.75), 0.25);
        assert_eq!(wrap_half(0.5), -0.5);
        assert_eq!(wrap_half(-0.5), -0.5);
        assert_eq!(wrap_half(3.0), 0.0);
    }

    #[test]
    fn test_round_trip_triclinic_time_varying_box() {
        let nframes = 40;
        let mut truth = nd::Array3::<f64>::zeros((nframes, 1, 3));
        let mut wrapped = truth.clone();
        let mut boxes = nd::Array3::<f64>::zeros((nframes, 3, 3));

        for it in 0 .. nframes {
            let t = it as f64;
            let scale = 1.0 + 0.01 * (0.3 * t).sin();
            let cell = box_from_dimensions([4.0 * scale, 5.0 * scale, 6.0 * scale, 80.0, 75.0, 100.0]).unwrap();
            let cell = nd::arr2(&cell);
            boxes.slice_mut(s![it, .., ..]).assign(&cell);

            let x = nd::arr1(&[0.9 * t, 3.0 * (0.2 * t).sin(), -0.7 * t]);
            truth.slice_mut(s![it, 0, ..]).assign(&x);

            // jump by integer lattice vectors on most frames, except the first one
            let n = if it == 0 { nd::arr1(&[0.0, 0.0, 0.0]) } else {
                nd::arr1(&[-((it % 3) as f64), (it % 2) as f64 * 2.0, (it / 7) as f64])
            };
            wrapped.slice_mut(s![it, 0, ..]).assign(&(&x + &n.dot(&cell)));
        }

        let unwrapped = unwrap_trajectory(wrapped.view(), boxes.view(), None).unwrap();
        assert!(max_abs_diff(unwrapped.view(), truth.view()) < 1e-9);
    }

    #[test]
    fn test_no_jump_is_identity() {
        let nframes = 10;
        let natoms = 4;
        let pos = nd::Array3::from_shape_fn((nframes, natoms, 3), |(t, i, k)| {
            5.0 + (i as f64) + 0.3 * ((t + k) as f64 * 0.7).cos()
        });
        let boxes = cubic_boxes(nframes, 10.0);
        let unwrapped = unwrap_trajectory(pos.view(), boxes.view(), None).unwrap();
        assert!(max_abs_diff(unwrapped.view(), pos.view()) < 1e-12);
    }

    #[test]
    fn test_wrapped_atom_is_restored() {
        // atom 0 leaves the box through x = 0 between frame 1 and 2
        let pos = nd::arr3(&[
            [[0.8, 5.0, 5.0], [2.0, 2.0, 2.0], [7.0, 7.0, 7.0]],
            [[0.4, 5.0, 5.0], [2.1, 2.0, 2.0], [7.0, 7.1, 7.0]],
            [[9.9, 5.0, 5.0], [2.2, 2.0, 2.0], [7.0, 7.2, 7.0]],
            [[9.6, 5.1, 5.0], [2.3, 2.0, 2.0], [7.0, 7.3, 7.0]],
        ]);
        let boxes = cubic_boxes(4, 10.0);
        let unwrapped = unwrap_trajectory(pos.view(), boxes.view(), None).unwrap();

        let shift: nd::Array1<f64> = &unwrapped.slice(s![2, 0, ..]) - &pos.slice(s![2, 0, ..]);
        assert!((shift[0] + 10.0).abs() < 1e-12);
        assert!(shift[1].abs() < 1e-12 && shift[2].abs() < 1e-12);

        let step: nd::Array1<f64> = &unwrapped.slice(s![2, 0, ..]) - &unwrapped.slice(s![1, 0, ..]);
        assert!((step[0] + 0.5).abs() < 1e-12);
        assert!((unwrapped[[3, 0, 0]] + 0.4).abs() < 1e-12);

        let others = &unwrapped.slice(s![.., 1.., ..]) - &pos.slice(s![.., 1.., ..]);
        assert!(others.iter().all(|x| x.abs() < 1e-12));
    }

    #[test]
    fn test_reference_anchoring() {
        let pos = nd::arr3(&[[[9.5, 1.0, 1.0]], [[9.7, 1.0, 1.0]]]);
        let boxes = cubic_boxes(2, 10.0);
        let reference = nd::arr2(&[[-0.4, 1.0, 1.0]]);

        let unwrapped = unwrap_trajectory(pos.view(), boxes.view(), Some(reference.view())).unwrap();
        assert!((unwrapped[[0, 0, 0]] + 0.5).abs() < 1e-12);
        assert!((unwrapped[[1, 0, 0]] + 0.3).abs() < 1e-12);

        let single = pos.slice(s![..1, .., ..]);
        let same = unwrap_trajectory(single, boxes.slice(s![..1, .., ..]), None).unwrap();
        assert_eq!(same, single);
    }

    #[test]
    fn test_empty_and_mismatched() {
        let pos = nd::Array3::<f64>::zeros((3, 0, 3));
        let boxes = cubic_boxes(3, 10.0);
        let unwrapped = unwrap_trajectory(pos.view(), boxes.view(), None).unwrap();
        assert_eq!(unwrapped.dim(), (3, 0, 3));

        let pos = nd::Array3::<f64>::zeros((3, 2, 3));
        let err = unwrap_trajectory(pos.view(), boxes.slice(s![..2, .., ..]), None).unwrap_err();
        assert!(matches!(err.downcast_ref::<AnalysisError>(), Some(AnalysisError::ShapeMismatch { .. })));

        let reference = nd::Array2::<f64>::zeros((3, 3));
        assert!(unwrap_trajectory(pos.view(), boxes.view(), Some(reference.view())).is_err());

        let mut singular = boxes.clone();
        singular.slice_mut(s![1, 2, ..]).fill(0.0);
        let err = unwrap_trajectory(pos.view(), singular.view(), None).unwrap_err();
        assert!(matches!(err.downcast_ref::<AnalysisError>(), Some(AnalysisError::Geometry { frame: Some(1), .. })));
    }
}
