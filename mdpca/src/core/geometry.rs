use shared::{
    ndarray as nd,
    Mat33,
    Result,
};

use crate::core::constants::{BOX_DET_TOL, EPS};
use crate::core::error::AnalysisError;
use crate::core::linalg::{mat33, mat33_from_view, matrix3};


// Exact values at right angles so that orthorhombic cells come out exactly diagonal.
fn cos_sin_deg(x: f64) -> (f64, f64) {
    if x == 90.0 {
        (0.0, 1.0)
    } else {
        let r = x.to_radians();
        (r.cos(), r.sin())
    }
}


fn cell_from_dimensions(dims: [f64; 6]) -> std::result::Result<Mat33<f64>, AnalysisError> {
    let [a, b, c, alpha, beta, gamma] = dims;

    for (name, l) in [("a", a), ("b", b), ("c", c)] {
        if !(l.is_finite() && l > 0.0) {
            return Err(AnalysisError::geometry(None, format!("length {} = {} is not positive", name, l)));
        }
    }

    for (name, x) in [("alpha", alpha), ("beta", beta), ("gamma", gamma)] {
        if !(x > 0.0 && x < 180.0) {
            return Err(AnalysisError::geometry(None, format!("angle {} = {} is outside (0, 180) degrees", name, x)));
        }
    }

    let (cos_a, _)     = cos_sin_deg(alpha);
    let (cos_b, _)     = cos_sin_deg(beta);
    let (cos_g, sin_g) = cos_sin_deg(gamma);

    if sin_g.abs() <= f64::EPSILON {
        return Err(AnalysisError::geometry(None, "sin(gamma) vanishes"));
    }

    let cx = c * cos_b;
    let cy = c * (cos_a - cos_b * cos_g) / sin_g;
    let mut cz2 = c * c - cx * cx - cy * cy;

    if cz2 < 0.0 {
        if cz2 < -EPS * c * c {
            return Err(AnalysisError::geometry(None,
                format!("angles ({}, {}, {}) do not form a cell", alpha, beta, gamma)));
        }
        cz2 = 0.0;
    }

    Ok([
        [a,          0.0,        0.0],
        [b * cos_g,  b * sin_g,  0.0],
        [cx,         cy,         cz2.sqrt()],
    ])
}


/// Lattice matrix from `[a, b, c, alpha, beta, gamma]`, angles in degrees.
///
/// Rows are the lattice vectors: `a` lies along x, `b` in the xy plane.
pub fn box_from_dimensions(dims: [f64; 6]) -> Result<Mat33<f64>> {
    Ok(cell_from_dimensions(dims)?)
}


/// Per-frame lattice matrices `[nframes, 3, 3]` from descriptors `[nframes, 6]`.
pub fn boxes_from_dimensions(dims: nd::ArrayView2<f64>) -> Result<nd::Array3<f64>> {
    let nframes = dims.nrows();
    if dims.ncols() != 6 {
        return Err(AnalysisError::shape("box descriptors", (nframes, 6), dims.dim()).into());
    }

    let mut ret = nd::Array3::<f64>::zeros((nframes, 3, 3));
    for (iframe, (row, mut out)) in dims.outer_iter().zip(ret.outer_iter_mut()).enumerate() {
        let d = [row[0], row[1], row[2], row[3], row[4], row[5]];
        let cell = cell_from_dimensions(d).map_err(|e| e.at_frame(iframe))?;
        out.assign(&nd::arr2(&cell));
    }

    Ok(ret)
}


/// Inverse of [`box_from_dimensions`]: `[a, b, c, alpha, beta, gamma]` of a lattice matrix.
pub fn dimensions_from_box(cell: &Mat33<f64>) -> Result<[f64; 6]> {
    let m = matrix3(cell);
    let (va, vb, vc) = (m.row(0), m.row(1), m.row(2));
    let (a, b, c) = (va.norm(), vb.norm(), vc.norm());

    if !(a > 0.0 && b > 0.0 && c > 0.0) {
        return Err(AnalysisError::geometry(None, "zero-length lattice vector").into());
    }

    let angle = |x: f64| x.clamp(-1.0, 1.0).acos().to_degrees();
    let alpha = angle(vb.dot(&vc) / (b * c));
    let beta  = angle(va.dot(&vc) / (a * c));
    let gamma = angle(va.dot(&vb) / (a * b));

    Ok([a, b, c, alpha, beta, gamma])
}


fn invert_cell(cell: &Mat33<f64>) -> std::result::Result<Mat33<f64>, AnalysisError> {
    let m = matrix3(cell);
    let scale = m.row(0).norm() * m.row(1).norm() * m.row(2).norm();
    let det = m.determinant();

    if !det.is_finite() || det.abs() <= BOX_DET_TOL * scale {
        return Err(AnalysisError::geometry(None, format!("lattice matrix is singular (det = {:e})", det)));
    }

    m.try_inverse()
        .map(|inv| mat33(&inv))
        .ok_or_else(|| AnalysisError::geometry(None, "lattice matrix is not invertible"))
}


/// Inverse of a lattice matrix. Singular cells are an error, never replaced by identity.
pub fn invert_box(cell: &Mat33<f64>) -> Result<Mat33<f64>> {
    Ok(invert_cell(cell)?)
}


/// Inverse lattice matrices of all frames, `[nframes, 3, 3]`.
pub fn invert_boxes(boxes: nd::ArrayView3<f64>) -> Result<nd::Array3<f64>> {
    let mut ret = nd::Array3::<f64>::zeros(boxes.raw_dim());
    for (iframe, (cell, mut out)) in boxes.outer_iter().zip(ret.outer_iter_mut()).enumerate() {
        let inv = invert_cell(&mat33_from_view(cell)).map_err(|e| e.at_frame(iframe))?;
        out.assign(&nd::arr2(&inv));
    }
    Ok(ret)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &Mat33<f64>, b: &Mat33<f64>, tol: f64) {
        for i in 0 .. 3 {
            for j in 0 .. 3 {
                assert!((a[i][j] - b[i][j]).abs() < tol, "{:?} != {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_cubic_is_diagonal() {
        let cell = box_from_dimensions([10.0, 12.0, 14.0, 90.0, 90.0, 90.0]).unwrap();
        assert_eq!(cell, [[10.0, 0.0, 0.0], [0.0, 12.0, 0.0], [0.0, 0.0, 14.0]]);
    }

    #[test]
    fn test_triclinic() {
        // rhombic dodecahedron (xy-square) as written by GROMACS
        let cell = box_from_dimensions([5.0, 5.0, 5.0, 60.0, 60.0, 90.0]).unwrap();
        let half = 2.5;
        let z = 5.0 * 0.5f64.sqrt();
        assert_close(&cell, &[[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [half, half, z]], 1e-12);

        let dims = dimensions_from_box(&cell).unwrap();
        let expect = [5.0, 5.0, 5.0, 60.0, 60.0, 90.0];
        for (x, y) in dims.iter().zip(expect.iter()) {
            assert!((x - y).abs() < 1e-9);
        }

        let hex = box_from_dimensions([3.0, 3.0, 7.0, 90.0, 90.0, 120.0]).unwrap();
        let back = box_from_dimensions(dimensions_from_box(&hex).unwrap()).unwrap();
        assert_close(&hex, &back, 1e-12);
    }

    #[test]
    fn test_invalid_boxes() {
        let err = box_from_dimensions([1.0, 1.0, 1.0, 90.0, 90.0, 180.0]).unwrap_err();
        assert!(matches!(err.downcast_ref::<AnalysisError>(), Some(AnalysisError::Geometry { .. })));

        assert!(box_from_dimensions([0.0, 1.0, 1.0, 90.0, 90.0, 90.0]).is_err());
        assert!(box_from_dimensions([1.0, 1.0, 1.0, 10.0, 120.0, 90.0]).is_err());
        assert!(box_from_dimensions([1.0, f64::NAN, 1.0, 90.0, 90.0, 90.0]).is_err());

        let dims = nd::arr2(&[
            [1.0, 1.0, 1.0, 90.0, 90.0, 90.0],
            [1.0, 1.0, 1.0, 90.0, 90.0, 0.0],
        ]);
        let err = boxes_from_dimensions(dims.view()).unwrap_err();
        match err.downcast_ref::<AnalysisError>() {
            Some(AnalysisError::Geometry { frame, .. }) => assert_eq!(*frame, Some(1)),
            e => panic!("unexpected error {:?}", e),
        }

        let bad_shape = nd::Array2::<f64>::zeros((2, 5));
        let err = boxes_from_dimensions(bad_shape.view()).unwrap_err();
        assert!(matches!(err.downcast_ref::<AnalysisError>(), Some(AnalysisError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_inverse() {
        let cell = box_from_dimensions([4.0, 5.0, 6.0, 80.0, 70.0, 100.0]).unwrap();
        let inv = invert_box(&cell).unwrap();
        let prod = matrix3(&cell) * matrix3(&inv);
        assert_close(&mat33(&prod), &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], 1e-12);

        let flat = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]];
        assert!(invert_box(&flat).is_err());

        let boxes = nd::stack(nd::Axis(0), &[nd::arr2(&cell).view(), nd::arr2(&flat).view()]).unwrap();
        let err = invert_boxes(boxes.view()).unwrap_err();
        assert!(err.to_string().contains("frame 1"));
    }
}
