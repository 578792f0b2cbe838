/*!
# Delayed-Rejection Engine

One sampling step proposes a candidate and, instead of giving up on
rejection, falls through a cascade of further proposal stages. Each stage
may use a different kernel (in practice: progressively bolder or more
conservative ones), and the acceptance probability at stage `k` carries a
correction for the probability of having rejected every earlier candidate
along the reversed path. That correction is what keeps the target
distribution stationary; reusing the plain Metropolis ratio at stage two or
later would break detailed balance.

The engine is agnostic to the proposal mechanism: it owns an ordered list
of stage kernels satisfying [`ProposalKernel`](crate::proposals::ProposalKernel)
and a seeded random source, threaded through every draw.

## Example

```rust
use dram_mcmc::core::MarkovChain;
use dram_mcmc::delayed_rejection::DelayedRejection;
use dram_mcmc::distributions::Gaussian2D;
use dram_mcmc::proposals::RandomWalkProposal;
use nalgebra::{dmatrix, dvector, Matrix2, Vector2};

let target = Gaussian2D {
    mean: Vector2::new(0.0, 0.0),
    cov: Matrix2::new(1.0, 0.0, 0.0, 1.0),
};
let stages = vec![
    RandomWalkProposal::new(dmatrix![1.0, 0.0; 0.0, 1.0]).unwrap(),
    RandomWalkProposal::new(dmatrix![0.2, 0.0; 0.0, 0.2]).unwrap(),
];
let mut engine = DelayedRejection::new(target, stages, dvector![0.0, 0.0])
    .unwrap()
    .set_seed(42);
engine.step();
assert_eq!(engine.acceptance().n_steps, 1);
```
*/

use nalgebra::DVector;
use rand::prelude::*;

use crate::core::{sanitize_log_prob, MarkovChain, McmcError, Sample};
use crate::distributions::TargetDistribution;
use crate::proposals::ProposalKernel;

/// Acceptance counters accumulated over a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptanceStats {
    /// Total completed steps.
    pub n_steps: u64,
    /// Steps on which stage `k` was attempted.
    pub attempts: Vec<u64>,
    /// Steps accepted at stage `k`.
    pub accepts: Vec<u64>,
}

impl AcceptanceStats {
    /// Fraction of all steps that ended in an acceptance (any stage).
    pub fn overall(&self) -> f64 {
        if self.n_steps == 0 {
            return 0.0;
        }
        self.accepts.iter().sum::<u64>() as f64 / self.n_steps as f64
    }

    /// Acceptance rate of stage `k` among the steps that reached it.
    pub fn per_stage(&self) -> Vec<f64> {
        self.attempts
            .iter()
            .zip(&self.accepts)
            .map(|(&att, &acc)| if att == 0 { 0.0 } else { acc as f64 / att as f64 })
            .collect()
    }
}

/// The delayed-rejection sampling engine: one chain, one ordered list of
/// per-stage proposal kernels, one random source.
#[derive(Debug, Clone)]
pub struct DelayedRejection<D, P> {
    /// The target distribution we want to sample from.
    pub target: D,
    proposals: Vec<P>,
    current: Sample,
    attempts: Vec<u64>,
    accepts: Vec<u64>,
    n_steps: u64,
    /// The chain's random seed.
    pub seed: u64,
    rng: SmallRng,
}

impl<D, P> DelayedRejection<D, P>
where
    D: TargetDistribution,
    P: ProposalKernel<D>,
{
    /// Builds an engine with one proposal kernel per stage, starting at
    /// `initial_point`.
    ///
    /// Fails when no stage is configured, or when a kernel without a
    /// tractable density (e.g. Hamiltonian dynamics) is combined with
    /// further stages.
    pub fn new(target: D, proposals: Vec<P>, initial_point: DVector<f64>) -> Result<Self, McmcError> {
        if proposals.is_empty() {
            return Err(McmcError::InvalidConfig(
                "at least one proposal stage is required".into(),
            ));
        }
        if proposals.len() > 1 && proposals.iter().any(|p| !p.supports_delayed_rejection()) {
            return Err(McmcError::InvalidConfig(
                "multi-stage delayed rejection requires kernels with tractable densities".into(),
            ));
        }

        let n_stages = proposals.len();
        let log_prob = sanitize_log_prob(target.unnorm_log_prob(&initial_point));
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            proposals,
            current: Sample::new(initial_point, log_prob),
            attempts: vec![0; n_stages],
            accepts: vec![0; n_stages],
            n_steps: 0,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Reseeds the chain's random source for reproducible runs.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Number of configured stages.
    pub fn n_stages(&self) -> usize {
        self.proposals.len()
    }

    /// Total completed steps.
    pub fn n_steps(&self) -> u64 {
        self.n_steps
    }

    /// The stage kernels, in cascade order.
    pub fn proposals(&self) -> &[P] {
        &self.proposals
    }

    /// The stage kernels, mutable so samplers can adapt them between steps.
    pub fn proposals_mut(&mut self) -> &mut [P] {
        &mut self.proposals
    }

    /// Acceptance counters accumulated so far.
    pub fn acceptance(&self) -> AcceptanceStats {
        AcceptanceStats {
            n_steps: self.n_steps,
            attempts: self.attempts.clone(),
            accepts: self.accepts.clone(),
        }
    }

    /// Generalized delayed-rejection acceptance probability, in log space.
    ///
    /// `path` is `[current, y_1, ..., y_k]`: the retained state followed by
    /// every candidate proposed this step, the last entry being the one
    /// under consideration. `terminal_delta` is `log q(reverse) - log
    /// q(forward)` of the stage-`k` move itself; it is zero for symmetric
    /// kernels and carries the energy correction for Hamiltonian moves.
    ///
    /// The numerator walks the rejected candidates in reverse order from
    /// `y_k`, the denominator walks them forward from `current`; both
    /// accumulate the intervening kernel densities and `log(1 - alpha_j)`
    /// rejection terms. A zero rejection probability on the forward path
    /// makes the stage certainly non-accepting rather than a fault.
    fn log_alpha(&self, path: &[&Sample], terminal_delta: f64) -> f64 {
        let k = path.len() - 1;
        let start = path[0];
        let cand = path[k];

        if cand.log_prob == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }

        let mut log_num = cand.log_prob;
        let mut log_den = start.log_prob;

        for j in 1..k {
            let q = &self.proposals[j - 1];
            log_den += q.log_density(&start.point, &path[j].point);
            log_num += q.log_density(&cand.point, &path[k - j].point);

            let alpha_fwd = self.log_alpha(&path[..=j], 0.0);
            if alpha_fwd >= 0.0 {
                // The forward path rejected with probability zero here, so
                // this stage can never be reached reversibly.
                return f64::NEG_INFINITY;
            }
            log_den += ln_one_minus_exp(alpha_fwd);

            let reverse: Vec<&Sample> = (0..=j).map(|i| path[k - i]).collect();
            let alpha_rev = self.log_alpha(&reverse, 0.0);
            log_num += ln_one_minus_exp(alpha_rev);
        }

        if log_num == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }
        if log_den == f64::NEG_INFINITY {
            // Infeasible or unreachable history: escape with certainty.
            return 0.0;
        }

        (log_num - log_den + terminal_delta).min(0.0)
    }
}

impl<D, P> MarkovChain for DelayedRejection<D, P>
where
    D: TargetDistribution,
    P: ProposalKernel<D>,
{
    /// Performs one delayed-rejection step.
    ///
    /// Walks the stage cascade until a candidate is accepted or every stage
    /// has rejected; the chain state is only replaced at the end of the
    /// step, and a fully rejected step repeats the previous state.
    fn step(&mut self) -> &Sample {
        self.n_steps += 1;

        let mut path: Vec<Sample> = Vec::with_capacity(self.proposals.len() + 1);
        path.push(self.current.clone());

        for stage in 0..self.proposals.len() {
            self.attempts[stage] += 1;

            let mv = self.proposals[stage].propose(&self.target, &path[0], &mut self.rng);
            let log_prob = match mv.log_prob {
                Some(lp) => sanitize_log_prob(lp),
                None => sanitize_log_prob(self.target.unnorm_log_prob(&mv.point)),
            };
            path.push(Sample::new(mv.point, log_prob));

            let refs: Vec<&Sample> = path.iter().collect();
            let log_alpha = self.log_alpha(&refs, mv.log_reverse - mv.log_forward);

            let u: f64 = self.rng.gen();
            if u.ln() < log_alpha {
                self.current = path.pop().expect("path contains the accepted candidate");
                self.accepts[stage] += 1;
                return &self.current;
            }
        }

        &self.current
    }

    fn current(&self) -> &Sample {
        &self.current
    }
}

/// `ln(1 - exp(x))` for `x <= 0`, stable near both ends.
fn ln_one_minus_exp(x: f64) -> f64 {
    if x >= 0.0 {
        f64::NEG_INFINITY
    } else {
        (-x.exp()).ln_1p()
    }
}
