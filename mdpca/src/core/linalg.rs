//! Glue between `ndarray` storage and the `nalgebra` decompositions.
use ordered_float::OrderedFloat;
use shared::{
    ndarray as nd,
    nalgebra as na,
    warn,
    Mat33,
};

use crate::core::error::Degeneracy;


pub fn matrix3(m: &Mat33<f64>) -> na::Matrix3<f64> {
    na::Matrix3::from_fn(|i, j| m[i][j])
}


pub fn mat33(m: &na::Matrix3<f64>) -> Mat33<f64> {
    let mut ret = [[0.0; 3]; 3];
    for (i, row) in ret.iter_mut().enumerate() {
        for (j, x) in row.iter_mut().enumerate() {
            *x = m[(i, j)];
        }
    }
    ret
}


pub fn mat33_from_view(v: nd::ArrayView2<f64>) -> Mat33<f64> {
    let mut ret = [[0.0; 3]; 3];
    for (i, row) in ret.iter_mut().enumerate() {
        for (j, x) in row.iter_mut().enumerate() {
            *x = v[[i, j]];
        }
    }
    ret
}


pub fn dmatrix(v: nd::ArrayView2<f64>) -> na::DMatrix<f64> {
    let (nrow, ncol) = v.dim();
    na::DMatrix::from_fn(nrow, ncol, |i, j| v[[i, j]])
}


/// Eigenvalues and eigenvectors of a symmetric matrix, in descending eigenvalue order.
pub struct SortedEigen {
    /// Negative values clamped to exactly 0.
    pub values:   nd::Array1<f64>,
    /// Eigenvectors as columns, `vectors.column(k)` belongs to `values[k]`.
    pub vectors:  nd::Array2<f64>,
    pub warnings: Vec<Degeneracy>,
}


/// Symmetric eigendecomposition sorted by descending eigenvalue.
///
/// Eigenvalues are clamped to be non-negative, as required for covariance and Gram matrices.
/// Negative values larger than round-off (relative to the largest magnitude) are reported.
pub fn symmetric_eigen_desc(mat: na::DMatrix<f64>) -> SortedEigen {
    let n = mat.nrows();
    if n == 0 {
        return SortedEigen { values: nd::Array1::zeros(0), vectors: nd::Array2::zeros((0, 0)), warnings: vec![] };
    }
    let eigen = na::SymmetricEigen::new(mat);

    let mut order: Vec<usize> = (0 .. n).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(OrderedFloat(eigen.eigenvalues[i])));

    let scale = eigen.eigenvalues.iter().fold(0.0f64, |acc, x| acc.max(x.abs()));
    let tol = 1e-12 * scale;

    let mut warnings = vec![];
    let mut values = nd::Array1::<f64>::zeros(n);
    let mut vectors = nd::Array2::<f64>::zeros((n, n));

    for (k, &i) in order.iter().enumerate() {
        let lambda = eigen.eigenvalues[i];
        if lambda < -tol {
            warn!("Eigenvalue #{} = {:e} is negative, clamped to 0.", k, lambda);
            warnings.push(Degeneracy::ClampedEigenvalue { index: k, value: lambda });
        }
        values[k] = lambda.max(0.0);
        for r in 0 .. n {
            vectors[[r, k]] = eigen.eigenvectors[(r, i)];
        }
    }

    SortedEigen { values, vectors, warnings }
}
