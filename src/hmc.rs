//! A Hamiltonian (Hybrid) Monte Carlo sampler built on the
//! delayed-rejection engine.
//!
//! The sampler runs the engine with a single Hamiltonian-dynamics kernel:
//! momenta are drawn fresh each step, a leapfrog trajectory produces a
//! distant candidate, and the acceptance test corrects for the integration
//! error through the total-energy difference. There is no covariance
//! adaptation here; step size and path length are fixed at construction.
//!
//! The target must expose the gradient of its log-density via
//! [`GradientTarget`](crate::distributions::GradientTarget).

use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::{DMatrix, DVector};

use crate::core::{run_chain, run_chain_with_progress, MarkovChain, McmcError, Sample};
use crate::delayed_rejection::{AcceptanceStats, DelayedRejection};
use crate::distributions::GradientTarget;
use crate::proposals::HamiltonianProposal;

/// A Hamiltonian Monte Carlo sampler with a fixed step size and path
/// length.
///
/// # Examples
///
/// ```rust
/// use dram_mcmc::distributions::Gaussian2D;
/// use dram_mcmc::hmc::HamiltonianMonteCarlo;
/// use nalgebra::{dvector, Matrix2, Vector2};
///
/// let target = Gaussian2D {
///     mean: Vector2::new(0.0, 0.0),
///     cov: Matrix2::new(1.0, 0.0, 0.0, 1.0),
/// };
/// let mut sampler = HamiltonianMonteCarlo::new(target, dvector![1.0, 1.0], 0.1, 20)
///     .unwrap()
///     .set_seed(42);
/// let (samples, _log_probs) = sampler.run(100, 10).unwrap();
/// assert_eq!(samples.nrows(), 100);
/// ```
#[derive(Debug, Clone)]
pub struct HamiltonianMonteCarlo<D> {
    engine: DelayedRejection<D, HamiltonianProposal>,
}

impl<D> HamiltonianMonteCarlo<D>
where
    D: GradientTarget,
{
    /// Builds an HMC sampler taking `n_leapfrog` leapfrog steps of size
    /// `step_size` per proposal.
    pub fn new(
        target: D,
        initial_point: DVector<f64>,
        step_size: f64,
        n_leapfrog: usize,
    ) -> Result<Self, McmcError> {
        let kernel = HamiltonianProposal::new(step_size, n_leapfrog)?;
        let engine = DelayedRejection::new(target, vec![kernel], initial_point)?;
        Ok(Self { engine })
    }

    /// Reseeds the chain's random source for reproducible runs.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.engine = self.engine.set_seed(seed);
        self
    }

    /// The chain's random seed.
    pub fn seed(&self) -> u64 {
        self.engine.seed
    }

    /// Acceptance counters accumulated so far.
    pub fn acceptance(&self) -> AcceptanceStats {
        self.engine.acceptance()
    }

    /// Runs the sampler for `n_discard + n_collect` steps and returns the
    /// collected trajectory and its log-densities.
    pub fn run(
        &mut self,
        n_collect: usize,
        n_discard: usize,
    ) -> Result<(DMatrix<f64>, DVector<f64>), McmcError> {
        run_chain(self, n_collect, n_discard)
    }

    /// Like [`run`](Self::run), with an indicatif progress bar and a final
    /// acceptance summary message.
    pub fn run_progress(
        &mut self,
        n_collect: usize,
        n_discard: usize,
    ) -> Result<(DMatrix<f64>, DVector<f64>), McmcError> {
        let pb = ProgressBar::new(n_collect as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
                .expect("progress bar template is valid")
                .progress_chars("=>-"),
        );
        pb.set_prefix("HMC");

        let result = run_chain_with_progress(self, n_collect, n_discard, &pb);
        pb.finish_with_message(format!("p(accept)≈{:.2}", self.acceptance().overall()));
        result
    }

    /// Clones this sampler into `n_chains` independent chains with seeds
    /// `seed + i`, ready for [`crate::core::run_parallel`].
    pub fn replicate(&self, n_chains: usize) -> Vec<Self>
    where
        D: Clone,
    {
        (0..n_chains)
            .map(|i| self.clone().set_seed(self.seed() + i as u64))
            .collect()
    }
}

impl<D> MarkovChain for HamiltonianMonteCarlo<D>
where
    D: GradientTarget,
{
    fn step(&mut self) -> &Sample {
        self.engine.step()
    }

    fn current(&self) -> &Sample {
        self.engine.current()
    }
}
