/*!
# Delayed-Rejection Adaptive Metropolis (DRAM)

Composes the [delayed-rejection engine](crate::delayed_rejection) with a
cascade of Gaussian random-walk kernels and an online covariance estimator:
stage one proposes with a covariance learned from the chain history, later
stages retry with geometrically shrunk versions of it. Adaptation starts
after a configurable seed period and never discards history; since the
empirical covariance settles as the chain grows, the adaptation diminishes
and the target distribution stays stationary.

## Example

```rust
use dram_mcmc::distributions::Banana;
use dram_mcmc::dram::DelayedRejectionAdaptiveMetropolis;
use nalgebra::{dmatrix, dvector};

let mut sampler = DelayedRejectionAdaptiveMetropolis::new(
    Banana::new(),
    dvector![0.0, -1.0],
    dmatrix![1.0, 0.9; 0.9, 1.0],
)
.unwrap()
.set_seed(42);

let (samples, log_probs) = sampler.run(100, 10).unwrap();
assert_eq!(samples.nrows(), 100);
assert_eq!(log_probs.len(), 100);
println!("acceptance: {:.2}", sampler.acceptance().overall());
```
*/

use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::{DMatrix, DVector};

use crate::adapt::{proposal_covariance, RunningCovariance};
use crate::core::{run_chain, run_chain_with_progress, MarkovChain, McmcError, Sample};
use crate::delayed_rejection::{AcceptanceStats, DelayedRejection};
use crate::distributions::TargetDistribution;
use crate::proposals::RandomWalkProposal;

/// Tuning knobs for [`DelayedRejectionAdaptiveMetropolis`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DramOptions {
    /// Number of delayed-rejection stages.
    pub n_stages: usize,
    /// Steps excluded from the adaptation statistics before updates begin.
    pub adapt_start: u64,
    /// Geometric factor applied to the stage-1 covariance for each later
    /// stage.
    pub shrink_factor: f64,
    /// Relative diagonal jitter added to the empirical covariance.
    pub epsilon: f64,
}

impl Default for DramOptions {
    fn default() -> Self {
        Self {
            n_stages: 2,
            adapt_start: 100,
            shrink_factor: 0.2,
            epsilon: 1e-10,
        }
    }
}

/**
The DRAM sampler: delayed rejection with covariance adaptation.

Stage-1 proposals use the user-supplied seed covariance until `adapt_start`
steps have completed; from then on every step folds the chain state into a
running covariance and rescales the cascade:
stage 1 gets `(2.38^2 / d) * (cov + epsilon I)`, stage `k` gets stage 1
shrunk by `shrink_factor^(k-1)`.
*/
#[derive(Debug, Clone)]
pub struct DelayedRejectionAdaptiveMetropolis<D> {
    engine: DelayedRejection<D, RandomWalkProposal>,
    estimator: RunningCovariance,
    options: DramOptions,
}

impl<D> DelayedRejectionAdaptiveMetropolis<D>
where
    D: TargetDistribution,
{
    /// Builds a DRAM sampler with default options (two stages, seed period
    /// of 100 steps, shrink factor 1/5).
    ///
    /// Fails fast when the covariance does not match the initial point's
    /// dimension or is not positive definite.
    pub fn new(
        target: D,
        initial_point: DVector<f64>,
        initial_cov: DMatrix<f64>,
    ) -> Result<Self, McmcError> {
        Self::with_options(target, initial_point, initial_cov, DramOptions::default())
    }

    /// Like [`new`](Self::new), with explicit options.
    pub fn with_options(
        target: D,
        initial_point: DVector<f64>,
        initial_cov: DMatrix<f64>,
        options: DramOptions,
    ) -> Result<Self, McmcError> {
        let dim = initial_point.len();
        if initial_cov.nrows() != dim || initial_cov.ncols() != dim {
            return Err(McmcError::DimensionMismatch {
                dim,
                rows: initial_cov.nrows(),
                cols: initial_cov.ncols(),
            });
        }
        if options.n_stages == 0 {
            return Err(McmcError::InvalidConfig(
                "number of delayed-rejection stages must be positive".into(),
            ));
        }
        if !(options.shrink_factor > 0.0 && options.shrink_factor <= 1.0) {
            return Err(McmcError::InvalidConfig(
                "shrink factor must lie in (0, 1]".into(),
            ));
        }
        if !(options.epsilon >= 0.0) {
            return Err(McmcError::InvalidConfig(
                "covariance jitter must be non-negative".into(),
            ));
        }

        let mut proposals = Vec::with_capacity(options.n_stages);
        let mut stage_cov = initial_cov;
        for _ in 0..options.n_stages {
            proposals.push(RandomWalkProposal::new(stage_cov.clone())?);
            stage_cov *= options.shrink_factor;
        }

        Self::with_proposals(target, initial_point, proposals, options)
    }

    /// Builds a DRAM sampler from an explicit per-stage kernel list. The
    /// kernels are used as given until adaptation starts rewriting their
    /// covariances.
    pub fn with_proposals(
        target: D,
        initial_point: DVector<f64>,
        proposals: Vec<RandomWalkProposal>,
        options: DramOptions,
    ) -> Result<Self, McmcError> {
        let dim = initial_point.len();
        for kernel in &proposals {
            let cov = kernel.covariance();
            if cov.nrows() != dim || cov.ncols() != dim {
                return Err(McmcError::DimensionMismatch {
                    dim,
                    rows: cov.nrows(),
                    cols: cov.ncols(),
                });
            }
        }
        let engine = DelayedRejection::new(target, proposals, initial_point)?;
        Ok(Self {
            engine,
            estimator: RunningCovariance::new(dim),
            options,
        })
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

    /// Acceptance counters, overall and per stage.
    pub fn acceptance(&self) -> AcceptanceStats {
        self.engine.acceptance()
    }

    /// The covariance currently used by stage `k`.
    pub fn stage_covariance(&self, stage: usize) -> &DMatrix<f64> {
        self.engine.proposals()[stage].covariance()
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
        pb.set_prefix("DRAM");

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

    /// Rescales every stage covariance from the current empirical one.
    fn adapt(&mut self) {
        let Some(emp) = self.estimator.covariance() else {
            return;
        };
        let shrink = self.options.shrink_factor;
        let mut stage_cov = proposal_covariance(&emp, self.options.epsilon);
        for kernel in self.engine.proposals_mut() {
            if let Err(err) = kernel.set_covariance(stage_cov.clone()) {
                // Keep the last good proposal; the chain stays valid.
                log::warn!("skipping covariance update: {err}");
                return;
            }
            stage_cov *= shrink;
        }
    }
}

impl<D> MarkovChain for DelayedRejectionAdaptiveMetropolis<D>
where
    D: TargetDistribution,
{
    /// One DRAM step: a full delayed-rejection cascade, then an adaptation
    /// update once the seed period has passed.
    fn step(&mut self) -> &Sample {
        self.engine.step();

        if self.engine.n_steps() > self.options.adapt_start {
            self.estimator.update(&self.engine.current().point);
            self.adapt();
        }

        self.engine.current()
    }

    fn current(&self) -> &Sample {
        self.engine.current()
    }
}
