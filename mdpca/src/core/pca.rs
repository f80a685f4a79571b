use shared::{
    ndarray as nd,
    ndarray::s,
    Result,
};

use crate::core::align::EnsembleSplit;
use crate::core::error::{AnalysisError, Degeneracy};
use crate::core::linalg::{dmatrix, symmetric_eigen_desc};


/// Projections of the training and the held-out block on the leading components.
#[derive(Clone, Debug)]
pub struct Scores {
    pub training: nd::Array2<f64>,
    pub heldout:  nd::Array2<f64>,
}


/// Principal axes of a centred data block `[nsamples, nfeatures]`.
#[derive(Clone, Debug)]
pub struct Pca {
    eigenvalues: nd::Array1<f64>,
    loadings:    nd::Array2<f64>,
    warnings:    Vec<Degeneracy>,
}


impl Pca {
    /// Eigendecomposition of `XᵀX / nsamples`. `training` is expected to be centred already.
    pub fn fit(training: nd::ArrayView2<f64>) -> Result<Self> {
        let (nsamples, nfeatures) = training.dim();
        if nsamples == 0 {
            return Err(AnalysisError::shape("training block", (">= 1", nfeatures), training.dim()).into());
        }

        let cov = training.t().dot(&training) / nsamples as f64;
        let eig = symmetric_eigen_desc(dmatrix(cov.view()));

        Ok(Self {
            eigenvalues: eig.values,
            loadings:    eig.vectors,
            warnings:    eig.warnings,
        })
    }


    pub fn nfeatures(&self) -> usize { self.eigenvalues.len() }

    /// Descending, non-negative.
    pub fn eigenvalues(&self) -> nd::ArrayView1<f64> { self.eigenvalues.view() }

    /// Orthonormal columns, column `k` belongs to `eigenvalues()[k]`.
    pub fn loadings(&self) -> nd::ArrayView2<f64> { self.loadings.view() }

    pub fn warnings(&self) -> &[Degeneracy] { &self.warnings }


    /// `block · L[:, ..n] / sqrt(nfeatures)`, `n` capped at `nfeatures`.
    pub fn project(&self, block: nd::ArrayView2<f64>, n_components: usize) -> Result<nd::Array2<f64>> {
        let p = self.nfeatures();
        if block.ncols() != p {
            return Err(AnalysisError::shape("projected block", (block.nrows(), p), block.dim()).into());
        }

        let n = n_components.min(p);
        let scale = if p > 0 { (p as f64).sqrt().recip() } else { 0.0 };
        Ok(block.dot(&self.loadings.slice(s![.., .. n])) * scale)
    }


    pub fn scores(&self, split: &EnsembleSplit, n_components: usize) -> Result<Scores> {
        Ok(Scores {
            training: self.project(split.training.view(), n_components)?,
            heldout:  self.project(split.heldout.view(), n_components)?,
        })
    }


    /// Cumulative fraction of the total variance carried by the first `k` components.
    pub fn explained_variance(&self, k: usize) -> nd::Array1<f64> {
        let k = k.min(self.nfeatures());
        let total = self.eigenvalues.sum();
        if total <= 0.0 {
            return nd::Array1::zeros(k);
        }

        let mut acc = 0.0;
        self.eigenvalues.iter()
            .take(k)
            .map(|v| { acc += v; acc / total })
            .collect()
    }
}
