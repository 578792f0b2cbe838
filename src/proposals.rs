/*!
Proposal kernels for the delayed-rejection engine.

Every kernel satisfies one contract, [`ProposalKernel`]: draw a candidate
from the current state and report the log proposal densities in both
directions. The engine combines those with the target density into the
acceptance probability, so structurally different mechanisms (a Gaussian
random walk, simulated Hamiltonian dynamics) plug into the same cascade.

The random source is threaded explicitly through every draw; kernels hold
no hidden RNG state.
*/

use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::core::{sanitize_log_prob, McmcError, Sample};
use crate::distributions::{GradientTarget, TargetDistribution};

/// A candidate move produced by a proposal kernel.
#[derive(Debug, Clone)]
pub struct ProposedMove {
    /// The candidate point.
    pub point: DVector<f64>,
    /// Target log-density at `point`, if the kernel already evaluated it
    /// (Hamiltonian dynamics needs it for the trajectory anyway).
    pub log_prob: Option<f64>,
    /// Log proposal density of reaching `point` from the current state.
    pub log_forward: f64,
    /// Log proposal density of the reverse move.
    pub log_reverse: f64,
}

/// One proposal mechanism, used at a single stage of the cascade.
pub trait ProposalKernel<D: TargetDistribution> {
    /// Draws a candidate from `current`, using `rng` for every random draw.
    fn propose(&self, target: &D, current: &Sample, rng: &mut SmallRng) -> ProposedMove;

    /// Evaluates log q(`to` | `from`), the kernel density between two
    /// arbitrary points. Feeds the reverse-path terms of the generalized
    /// delayed-rejection ratio.
    fn log_density(&self, from: &DVector<f64>, to: &DVector<f64>) -> f64;

    /// Whether this kernel's density is tractable enough for stages beyond
    /// the first. Kernels that return `false` may only be used alone.
    fn supports_delayed_rejection(&self) -> bool {
        true
    }
}

/// Factors `cov`, retrying with escalating diagonal jitter when the matrix
/// is only mildly defective. Returns the (possibly jittered) matrix, its
/// lower Cholesky factor and log-determinant.
pub(crate) fn cholesky_with_jitter(
    cov: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, DMatrix<f64>, f64), McmcError> {
    let scale = cov.diagonal().mean().abs().max(f64::MIN_POSITIVE);
    let mut jitter = 0.0;

    for attempt in 0..5 {
        let candidate = if attempt == 0 {
            cov.clone()
        } else {
            jitter = scale * 1e-12 * 100f64.powi(attempt - 1);
            let mut c = cov.clone();
            for i in 0..c.nrows() {
                c[(i, i)] += jitter;
            }
            c
        };
        if let Some(chol) = candidate.clone().cholesky() {
            if attempt > 0 {
                log::warn!("covariance required jitter {jitter:e} to stay positive definite");
            }
            let l = chol.l();
            let log_det = 2.0 * l.diagonal().iter().map(|x| x.ln()).sum::<f64>();
            return Ok((candidate, l, log_det));
        }
    }

    Err(McmcError::NotPositiveDefinite { jitter })
}

/**
A Gaussian random-walk kernel: `candidate = current + L z` with `z` standard
normal and `L` the Cholesky factor of the stage covariance.

The kernel is symmetric, so its forward and reverse densities always match.
The covariance can be swapped out during a run (covariance adaptation); the
factor is recomputed once per swap, not per draw.
*/
#[derive(Debug, Clone)]
pub struct RandomWalkProposal {
    cov: DMatrix<f64>,
    l: DMatrix<f64>,
    log_det: f64,
}

impl RandomWalkProposal {
    /// Builds a kernel from a symmetric positive-definite covariance.
    pub fn new(cov: DMatrix<f64>) -> Result<Self, McmcError> {
        let (cov, l, log_det) = cholesky_with_jitter(&cov)?;
        Ok(Self { cov, l, log_det })
    }

    /// The covariance currently in use (after any jitter correction).
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.cov
    }

    /// Replaces the covariance, refactoring it once.
    pub fn set_covariance(&mut self, cov: DMatrix<f64>) -> Result<(), McmcError> {
        let (cov, l, log_det) = cholesky_with_jitter(&cov)?;
        self.cov = cov;
        self.l = l;
        self.log_det = log_det;
        Ok(())
    }

    /// Full multivariate-normal log-density of moving `from -> to` under
    /// this kernel's covariance.
    pub fn log_density(&self, from: &DVector<f64>, to: &DVector<f64>) -> f64 {
        let r = to - from;
        let w = self
            .l
            .solve_lower_triangular(&r)
            .expect("cached Cholesky factor has non-zero diagonal");
        -0.5 * (self.dim() as f64 * (2.0 * PI).ln() + self.log_det + w.norm_squared())
    }

    fn dim(&self) -> usize {
        self.cov.nrows()
    }
}

impl<D: TargetDistribution> ProposalKernel<D> for RandomWalkProposal {
    fn propose(&self, _target: &D, current: &Sample, rng: &mut SmallRng) -> ProposedMove {
        let z = DVector::from_fn(self.dim(), |_, _| rng.sample::<f64, _>(StandardNormal));
        let point = &current.point + &self.l * z;
        let log_forward = self.log_density(&current.point, &point);
        ProposedMove {
            point,
            log_prob: None,
            log_forward,
            // Symmetric kernel: the reverse density is identical.
            log_reverse: log_forward,
        }
    }

    fn log_density(&self, from: &DVector<f64>, to: &DVector<f64>) -> f64 {
        RandomWalkProposal::log_density(self, from, to)
    }
}

/**
A Hamiltonian-dynamics kernel: draw an auxiliary momentum, integrate
Hamilton's equations with the leapfrog scheme, and report kinetic energies
as the proposal-density terms.

With `log_forward = -K(p_0)` and `log_reverse = -K(p_end)` the stage-1
acceptance ratio becomes `exp(H(current) - H(proposed))`, the usual
total-energy correction. Integration error grows with the step size, so
tune `step_size` and `n_leapfrog` to keep rejections rare.

The kernel density between two arbitrary points is intractable (it would
marginalize over momenta), so this kernel cannot sit in a multi-stage
cascade; construction of such a sampler fails validation.
*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HamiltonianProposal {
    /// Leapfrog step size.
    pub step_size: f64,
    /// Number of leapfrog steps per proposal.
    pub n_leapfrog: usize,
}

impl HamiltonianProposal {
    pub fn new(step_size: f64, n_leapfrog: usize) -> Result<Self, McmcError> {
        if !(step_size > 0.0) {
            return Err(McmcError::InvalidConfig(
                "leapfrog step size must be positive".into(),
            ));
        }
        if n_leapfrog == 0 {
            return Err(McmcError::InvalidConfig(
                "number of leapfrog steps must be positive".into(),
            ));
        }
        Ok(Self {
            step_size,
            n_leapfrog,
        })
    }

    fn divergence(current: &Sample, p0: DVector<f64>) -> ProposedMove {
        ProposedMove {
            point: current.point.clone(),
            log_prob: Some(f64::NEG_INFINITY),
            log_forward: -0.5 * p0.norm_squared(),
            log_reverse: f64::NEG_INFINITY,
        }
    }
}

impl<D: GradientTarget> ProposalKernel<D> for HamiltonianProposal {
    fn propose(&self, target: &D, current: &Sample, rng: &mut SmallRng) -> ProposedMove {
        let dim = current.dim();
        let p0 = DVector::from_fn(dim, |_, _| rng.sample::<f64, _>(StandardNormal));

        let mut q = current.point.clone();
        let mut p = p0.clone();
        let mut grad = target.grad_unnorm_log_prob(&q);
        let eps = self.step_size;

        for _ in 0..self.n_leapfrog {
            p.axpy(0.5 * eps, &grad, 1.0);
            q.axpy(eps, &p, 1.0);
            if !q.iter().all(|v| v.is_finite()) {
                // Divergent trajectory: hand back an infeasible candidate.
                return Self::divergence(current, p0);
            }
            grad = target.grad_unnorm_log_prob(&q);
            if !grad.iter().all(|v| v.is_finite()) {
                return Self::divergence(current, p0);
            }
            p.axpy(0.5 * eps, &grad, 1.0);
        }

        let log_prob = sanitize_log_prob(target.unnorm_log_prob(&q));
        ProposedMove {
            point: q,
            log_prob: Some(log_prob),
            log_forward: -0.5 * p0.norm_squared(),
            log_reverse: -0.5 * p.norm_squared(),
        }
    }

    fn log_density(&self, _from: &DVector<f64>, _to: &DVector<f64>) -> f64 {
        // Unreachable by construction: supports_delayed_rejection() is
        // false, so the engine never asks for this kernel's density.
        f64::NEG_INFINITY
    }

    fn supports_delayed_rejection(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Gaussian2D;
    use approx::assert_abs_diff_eq;
    use nalgebra::{dmatrix, dvector, Matrix2, Vector2};
    use rand::SeedableRng;

    fn standard_gaussian() -> Gaussian2D {
        Gaussian2D {
            mean: Vector2::new(0.0, 0.0),
            cov: Matrix2::new(1.0, 0.0, 0.0, 1.0),
        }
    }

    #[test]
    fn random_walk_log_density_matches_direct_formula() {
        let rw = RandomWalkProposal::new(dmatrix![4.0, 0.0; 0.0, 0.25]).unwrap();
        let from = dvector![1.0, -1.0];
        let to = dvector![2.0, 0.0];
        // Independent Gaussians: sum of the two univariate log-densities.
        let expected = (-0.5 * (2.0 * PI * 4.0).ln() - 0.5 * 1.0 / 4.0)
            + (-0.5 * (2.0 * PI * 0.25).ln() - 0.5 * 1.0 / 0.25);
        assert_abs_diff_eq!(rw.log_density(&from, &to), expected, epsilon = 1e-12);
    }

    #[test]
    fn random_walk_is_symmetric() {
        let rw = RandomWalkProposal::new(dmatrix![1.0, 0.4; 0.4, 2.0]).unwrap();
        let a = dvector![0.3, 1.7];
        let b = dvector![-1.1, 0.2];
        assert_abs_diff_eq!(
            rw.log_density(&a, &b),
            rw.log_density(&b, &a),
            epsilon = 1e-12
        );
    }

    #[test]
    fn random_walk_draws_are_reproducible() {
        let rw = RandomWalkProposal::new(dmatrix![1.0, 0.0; 0.0, 1.0]).unwrap();
        let target = standard_gaussian();
        let current = Sample::new(dvector![0.0, 0.0], 0.0);

        let mut rng_a = SmallRng::seed_from_u64(7);
        let mut rng_b = SmallRng::seed_from_u64(7);
        let a = rw.propose(&target, &current, &mut rng_a);
        let b = rw.propose(&target, &current, &mut rng_b);
        assert_eq!(a.point, b.point);
        assert_eq!(a.log_forward, b.log_forward);
    }

    #[test]
    fn jitter_recovers_semi_definite_covariance() {
        // Rank-deficient: second row is a copy of the first.
        let cov = dmatrix![1.0, 1.0; 1.0, 1.0];
        let rw = RandomWalkProposal::new(cov).unwrap();
        assert!(rw.covariance()[(0, 0)] > 1.0);
        assert!(rw.covariance()[(0, 0)] < 1.01);
    }

    #[test]
    fn hamiltonian_conserves_energy_for_small_steps() {
        let target = standard_gaussian();
        let current = Sample::new(dvector![1.0, -0.5], target.unnorm_log_prob(&dvector![1.0, -0.5]));

        let energy_error = |step_size: f64| -> f64 {
            let hmc = HamiltonianProposal::new(step_size, 50).unwrap();
            let mut rng = SmallRng::seed_from_u64(11);
            let mv = hmc.propose(&target, &current, &mut rng);
            let log_alpha = mv.log_prob.unwrap() - current.log_prob + mv.log_reverse - mv.log_forward;
            log_alpha.abs()
        };

        // Near-exact energy conservation for a small step size, and a
        // clearly larger error when the step size grows.
        assert!(energy_error(0.01) < 1e-3);
        assert!(energy_error(0.5) > energy_error(0.01));
    }

    #[test]
    fn hamiltonian_rejects_invalid_config() {
        assert!(HamiltonianProposal::new(0.0, 10).is_err());
        assert!(HamiltonianProposal::new(0.1, 0).is_err());
    }
}
