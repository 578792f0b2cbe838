//! Tests verifying the correctness of the DRAM sampler on 2D Gaussian
//! distributions: convergence of sample moments, the delayed-rejection
//! acceptance guarantee, and parallel multi-chain runs.

use dram_mcmc::core::run_parallel;
use dram_mcmc::distributions::Gaussian2D;
use dram_mcmc::dram::{DelayedRejectionAdaptiveMetropolis, DramOptions};
use nalgebra as na;

/// Column means of a samples matrix (rows are draws).
fn col_mean(samples: &na::DMatrix<f64>) -> na::DVector<f64> {
    let n = samples.nrows() as f64;
    na::DVector::from_iterator(samples.ncols(), samples.column_iter().map(|c| c.sum() / n))
}

/// Unbiased sample covariance of a samples matrix (rows are draws).
fn cov(samples: &na::DMatrix<f64>) -> na::DMatrix<f64> {
    let n = samples.nrows() as f64;
    let mean = col_mean(samples);
    let mut centered = samples.clone();
    for mut row in centered.row_iter_mut() {
        for (j, v) in row.iter_mut().enumerate() {
            *v -= mean[j];
        }
    }
    centered.transpose() * centered / (n - 1.0)
}

fn correlated_gaussian() -> Gaussian2D {
    Gaussian2D {
        mean: na::Vector2::new(0.0, 0.0),
        cov: na::Matrix2::new(1.0, 0.9, 0.9, 1.0),
    }
}

/// The sampler recovers mean and covariance of a strongly correlated
/// Gaussian within tolerance after burn-in.
#[test]
fn test_two_d_gaussian_moments() {
    const SAMPLE_SIZE: usize = 10_000;
    const BURNIN: usize = 2_000;
    const SEED: u64 = 42;

    let target = correlated_gaussian();
    let mut sampler = DelayedRejectionAdaptiveMetropolis::new(
        target,
        na::dvector![0.0, -1.0],
        na::dmatrix![1.0, 0.0; 0.0, 1.0],
    )
    .expect("valid configuration")
    .set_seed(SEED);

    let (samples, log_probs) = sampler.run(SAMPLE_SIZE, BURNIN).unwrap();
    assert_eq!(samples.nrows(), SAMPLE_SIZE);
    assert_eq!(log_probs.len(), SAMPLE_SIZE);
    assert!(log_probs.iter().all(|lp| lp.is_finite()));

    let mean = col_mean(&samples);
    assert!(mean[0].abs() < 0.1, "mean[0] off: {}", mean[0]);
    assert!(mean[1].abs() < 0.1, "mean[1] off: {}", mean[1]);

    let cov = cov(&samples);
    assert!((cov[(0, 0)] - 1.0).abs() < 0.15, "cov[0,0] off: {}", cov[(0, 0)]);
    assert!((cov[(1, 1)] - 1.0).abs() < 0.15, "cov[1,1] off: {}", cov[(1, 1)]);
    assert!((cov[(0, 1)] - 0.9).abs() < 0.15, "cov[0,1] off: {}", cov[(0, 1)]);

    let stats = sampler.acceptance();
    assert!(stats.overall() > 0.1 && stats.overall() < 0.9);
}

/// Adding a second delayed-rejection stage can only add acceptances: the
/// overall acceptance rate must not drop below the single-stage run's.
#[test]
fn test_second_stage_never_lowers_acceptance() {
    const SAMPLE_SIZE: usize = 5_000;
    const SEED: u64 = 42;

    let acceptance_with_stages = |n_stages: usize| {
        // Adaptation disabled so both runs keep the same stage-1 kernel; a
        // deliberately wide seed covariance keeps stage-1 acceptance low.
        let opts = DramOptions {
            n_stages,
            adapt_start: u64::MAX,
            ..Default::default()
        };
        let mut sampler = DelayedRejectionAdaptiveMetropolis::with_options(
            correlated_gaussian(),
            na::dvector![0.0, 0.0],
            na::dmatrix![16.0, 0.0; 0.0, 16.0],
            opts,
        )
        .expect("valid configuration")
        .set_seed(SEED);
        sampler.run(SAMPLE_SIZE, 0).unwrap();
        sampler.acceptance()
    };

    let one_stage = acceptance_with_stages(1);
    let two_stage = acceptance_with_stages(2);

    assert!(
        two_stage.overall() >= one_stage.overall(),
        "two-stage acceptance {} fell below single-stage {}",
        two_stage.overall(),
        one_stage.overall()
    );
    // The second stage contributes acceptances of its own.
    assert!(two_stage.accepts[1] > 0);
}

/// Replicated chains run in parallel, stay independent, and each converge.
#[test]
fn test_parallel_chains() {
    const SAMPLE_SIZE: usize = 5_000;
    const BURNIN: usize = 1_000;

    let proto = DelayedRejectionAdaptiveMetropolis::new(
        correlated_gaussian(),
        na::dvector![0.0, 0.0],
        na::dmatrix![1.0, 0.0; 0.0, 1.0],
    )
    .expect("valid configuration")
    .set_seed(7);

    let mut chains = proto.replicate(4);
    let results = run_parallel(&mut chains, SAMPLE_SIZE, BURNIN).unwrap();
    assert_eq!(results.len(), 4);

    // Different seeds produce different trajectories.
    assert_ne!(results[0].0, results[1].0);

    for (samples, _) in &results {
        let mean = col_mean(samples);
        assert!(mean[0].abs() < 0.15);
        assert!(mean[1].abs() < 0.15);
    }
}
