use indicatif::ProgressBar;
use indicatif::{MultiProgress, ProgressStyle};
use nalgebra as na;
use rayon::prelude::*;
use thiserror::Error;

/// A chain state: a point in parameter space paired with the unnormalized
/// log-density of the target evaluated there.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Position in parameter space.
    pub point: na::DVector<f64>,
    /// Unnormalized target log-density at `point`.
    pub log_prob: f64,
}

impl Sample {
    pub fn new(point: na::DVector<f64>, log_prob: f64) -> Self {
        Self { point, log_prob }
    }

    /// Dimensionality of the underlying point.
    pub fn dim(&self) -> usize {
        self.point.len()
    }
}

/// Errors reported by sampler constructors and run entry points.
#[derive(Debug, Error)]
pub enum McmcError {
    #[error("dimension mismatch: initial point has dimension {dim} but covariance is {rows}x{cols}")]
    DimensionMismatch { dim: usize, rows: usize, cols: usize },

    #[error("covariance matrix is not positive definite (jitter up to {jitter:e} did not recover it)")]
    NotPositiveDefinite { jitter: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Maps NaN log-densities to negative infinity so that a misbehaving target
/// triggers rejection instead of corrupting the acceptance arithmetic.
pub(crate) fn sanitize_log_prob(lp: f64) -> f64 {
    if lp.is_nan() {
        log::warn!("target returned NaN log-density; treating the point as infeasible");
        f64::NEG_INFINITY
    } else {
        lp
    }
}

pub trait MarkovChain {
    /// Does one iteration of the chain, returning the new current state.
    /// Rejected steps return the unchanged previous state.
    fn step(&mut self) -> &Sample;

    /// Get the current state without stepping.
    fn current(&self) -> &Sample;
}

/// Advances `chain` for `n_discard + n_collect` steps and records the last
/// `n_collect` states, one matrix row per step, log-densities alongside.
pub fn run_chain<M: MarkovChain>(
    chain: &mut M,
    n_collect: usize,
    n_discard: usize,
) -> Result<(na::DMatrix<f64>, na::DVector<f64>), McmcError> {
    if n_collect == 0 {
        return Err(McmcError::InvalidConfig(
            "number of samples to collect must be positive".into(),
        ));
    }

    for _ in 0..n_discard {
        chain.step();
    }

    let dim = chain.current().dim();
    let mut out = na::DMatrix::<f64>::zeros(n_collect, dim);
    let mut log_probs = na::DVector::<f64>::zeros(n_collect);

    for i in 0..n_collect {
        let state = chain.step();
        out.row_mut(i).copy_from_slice(state.point.as_slice());
        log_probs[i] = state.log_prob;
    }

    Ok((out, log_probs))
}

pub fn run_chain_with_progress<M: MarkovChain>(
    chain: &mut M,
    n_collect: usize,
    n_discard: usize,
    pb: &ProgressBar,
) -> Result<(na::DMatrix<f64>, na::DVector<f64>), McmcError> {
    if n_collect == 0 {
        return Err(McmcError::InvalidConfig(
            "number of samples to collect must be positive".into(),
        ));
    }

    for _ in 0..n_discard {
        chain.step();
    }

    let dim = chain.current().dim();
    let mut out = na::DMatrix::<f64>::zeros(n_collect, dim);
    let mut log_probs = na::DVector::<f64>::zeros(n_collect);

    pb.set_length(n_collect as u64);

    for i in 0..n_collect {
        let state = chain.step();
        out.row_mut(i).copy_from_slice(state.point.as_slice());
        log_probs[i] = state.log_prob;

        pb.inc(1);
    }

    Ok((out, log_probs))
}

/// Runs independent chains in parallel, one rayon task per chain.
///
/// The chains must already carry distinct seeds; see the samplers'
/// `replicate` methods.
pub fn run_parallel<M>(
    chains: &mut [M],
    n_collect: usize,
    n_discard: usize,
) -> Result<Vec<(na::DMatrix<f64>, na::DVector<f64>)>, McmcError>
where
    M: MarkovChain + Send,
{
    chains
        .par_iter_mut()
        .map(|chain| run_chain(chain, n_collect, n_discard))
        .collect()
}

/// Like [`run_parallel`], with one progress bar per chain.
pub fn run_parallel_with_progress<M>(
    chains: &mut [M],
    n_collect: usize,
    n_discard: usize,
) -> Result<Vec<(na::DMatrix<f64>, na::DVector<f64>)>, McmcError>
where
    M: MarkovChain + Send,
{
    let multi = MultiProgress::new();
    let pb_style = ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .expect("progress bar template is valid")
        .progress_chars("##-");

    chains
        .par_iter_mut()
        .enumerate()
        .map(|(i, chain)| {
            let pb = multi.add(ProgressBar::new(n_collect as u64));
            pb.set_prefix(format!("Chain {i}"));
            pb.set_style(pb_style.clone());

            let result = run_chain_with_progress(chain, n_collect, n_discard, &pb);

            pb.finish_with_message("Done!");
            result
        })
        .collect()
}
