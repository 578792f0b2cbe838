//! Online covariance estimation for adaptive proposals.

use nalgebra::{DMatrix, DVector};

/// Running mean and covariance of the chain history, updated incrementally
/// in the Welford form to stay numerically stable over long runs.
///
/// Every chain state is fed in exactly once per completed step, whether the
/// step accepted or not; history is never discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningCovariance {
    n: u64,
    mean: DVector<f64>,
    m2: DMatrix<f64>,
}

impl RunningCovariance {
    pub fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: DVector::zeros(dim),
            m2: DMatrix::zeros(dim, dim),
        }
    }

    /// Folds one chain state into the running moments.
    pub fn update(&mut self, x: &DVector<f64>) {
        self.n += 1;
        let delta = x - &self.mean;
        self.mean.axpy(1.0 / self.n as f64, &delta, 1.0);
        let delta2 = x - &self.mean;
        // m2 accumulates outer products of pre- and post-update deviations.
        self.m2 += delta * delta2.transpose();
    }

    /// Number of states folded in so far.
    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    /// Empirical covariance, or `None` before two states are available.
    pub fn covariance(&self) -> Option<DMatrix<f64>> {
        if self.n < 2 {
            return None;
        }
        Some(&self.m2 / (self.n - 1) as f64)
    }
}

/// Dimension-dependent optimal scaling for a random-walk proposal,
/// `2.38^2 / d` (Gelman, Roberts & Gilks).
pub fn optimal_scale(dim: usize) -> f64 {
    let s = 2.38;
    s * s / dim as f64
}

/// Derives a stage-1 proposal covariance from an empirical one:
/// `optimal_scale(d) * (cov + epsilon I)`, the jitter guaranteeing the
/// result stays positive definite.
pub fn proposal_covariance(cov: &DMatrix<f64>, epsilon: f64) -> DMatrix<f64> {
    let dim = cov.nrows();
    let mut scaled = cov * optimal_scale(dim);
    let jitter = optimal_scale(dim) * epsilon;
    for i in 0..dim {
        scaled[(i, i)] += jitter;
    }
    scaled
}
