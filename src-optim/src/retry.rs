//! Simple parallel retry: independent restarts with aggregated statistics.
//!
//! Fans `num_retries` independent runs of one optimizer across a worker
//! pool. Every run gets its own derived seed, a uniform starting point and a
//! `0.3 * s` step scale. The engine aggregates the global best plus mean and
//! standard deviation over the runs that beat `improvement_threshold`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use ndarray::Array1;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::logging::{simple_line, ProgressMeter, RetryLogger};
use crate::problem::Problem;
use crate::sampling::{derive_rng, derive_seed, uniform_in};
use crate::{Error, Optimizer, RunOptions};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub num_retries: usize,
    /// 0 picks the machine's logical CPU count.
    pub workers: usize,
    pub seed: u64,
    /// Evaluation budget per run.
    pub max_evals: u64,
    /// Initial step scale as a fraction of the box half-width.
    pub sigma_factor: f64,
    /// Runs below this value enter the mean/stddev statistics.
    pub improvement_threshold: f64,
    pub log_interval: Duration,
    pub target: Option<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            num_retries: 64,
            workers: 0,
            seed: 0,
            max_evals: 50_000,
            sigma_factor: 0.3,
            improvement_threshold: f64::INFINITY,
            log_interval: Duration::from_secs(10),
            target: None,
        }
    }
}

/// Fluent builder for `RetryConfig`.
pub struct RetryConfigBuilder {
    cfg: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: RetryConfig::default(),
        }
    }
    pub fn num_retries(mut self, v: usize) -> Self {
        self.cfg.num_retries = v;
        self
    }
    pub fn workers(mut self, v: usize) -> Self {
        self.cfg.workers = v;
        self
    }
    pub fn seed(mut self, v: u64) -> Self {
        self.cfg.seed = v;
        self
    }
    pub fn max_evals(mut self, v: u64) -> Self {
        self.cfg.max_evals = v;
        self
    }
    pub fn sigma_factor(mut self, v: f64) -> Self {
        self.cfg.sigma_factor = v;
        self
    }
    pub fn improvement_threshold(mut self, v: f64) -> Self {
        self.cfg.improvement_threshold = v;
        self
    }
    pub fn log_interval(mut self, v: Duration) -> Self {
        self.cfg.log_interval = v;
        self
    }
    pub fn target(mut self, v: f64) -> Self {
        self.cfg.target = Some(v);
        self
    }
    pub fn build(self) -> RetryConfig {
        self.cfg
    }
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregated result of a retry fan-out.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetryReport {
    /// Best point over all runs.
    pub x: Array1<f64>,
    /// Objective value at `x`.
    pub fun: f64,
    /// Total objective evaluations consumed.
    pub evals: u64,
    /// Runs attempted (including failed and panicked ones).
    pub retries: usize,
    /// Mean of run results below the improvement threshold.
    pub mean: f64,
    /// Standard deviation of run results below the improvement threshold.
    pub std: f64,
    /// Up to the 20 best run results, ascending.
    pub top: Vec<f64>,
}

struct Aggregate {
    best_x: Option<Array1<f64>>,
    best_f: f64,
    finished: Vec<f64>,
    attempted: usize,
}

impl Aggregate {
    fn top20(&self) -> Vec<f64> {
        let mut sorted = self.finished.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        sorted.truncate(20);
        sorted
    }
}

pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

pub(crate) fn resolve_workers(workers: usize) -> usize {
    if workers == 0 {
        num_cpus::get()
    } else {
        workers
    }
}

/// Run `num_retries` independent restarts of `optimizer` and aggregate the
/// results. Panicked and failed runs are counted as attempted and skipped.
pub fn retry_minimize(
    problem: &Problem,
    optimizer: &dyn Optimizer,
    cfg: &RetryConfig,
    logger: &dyn RetryLogger,
) -> Result<RetryReport, Error> {
    if cfg.num_retries == 0 {
        return Err(Error::InvalidConfig("num_retries must be positive".into()));
    }
    let workers = resolve_workers(cfg.workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;

    let aggregate = Mutex::new(Aggregate {
        best_x: None,
        best_f: f64::INFINITY,
        finished: Vec::with_capacity(cfg.num_retries),
        attempted: 0,
    });
    let meter = ProgressMeter::new(cfg.log_interval);

    pool.install(|| {
        (0..cfg.num_retries).into_par_iter().for_each(|i| {
            if problem.should_stop() {
                return;
            }
            if let Some(target) = cfg.target {
                if aggregate.lock().best_f <= target {
                    return;
                }
            }

            let mut rng = derive_rng(cfg.seed, i as u64);
            let x0 = uniform_in(problem.bounds(), &mut rng);
            let sigma0 = problem.bounds().scale() * cfg.sigma_factor;
            let run = RunOptions {
                x0: Some(x0),
                sigma0: Some(sigma0),
                max_evals: cfg.max_evals,
                seed: derive_seed(cfg.seed, i as u64),
                target: cfg.target,
                workers: 1,
            };

            match catch_unwind(AssertUnwindSafe(|| optimizer.minimize(problem, &run))) {
                Ok(Ok(report)) => {
                    let mut agg = aggregate.lock();
                    agg.attempted += 1;
                    if report.fun.is_finite() {
                        agg.finished.push(report.fun);
                        if report.fun < agg.best_f {
                            agg.best_f = report.fun;
                            agg.best_x = Some(report.x);
                        }
                    }
                }
                Ok(Err(err)) => {
                    log::warn!("retry run {} failed: {}", i, err);
                    aggregate.lock().attempted += 1;
                }
                Err(_) => {
                    log::warn!("retry run {} panicked", i);
                    aggregate.lock().attempted += 1;
                }
            }

            if let Some(t) = meter.due() {
                let agg = aggregate.lock();
                let good: Vec<f64> = agg
                    .finished
                    .iter()
                    .cloned()
                    .filter(|&f| f < cfg.improvement_threshold)
                    .collect();
                let (mean, std) = mean_std(&good);
                let evals = problem.evals();
                logger.log(&simple_line(
                    t,
                    evals as f64 / t.max(1e-9),
                    agg.attempted,
                    evals,
                    agg.best_f,
                    mean,
                    std,
                    &agg.top20(),
                    agg.best_x.as_ref(),
                ));
            }
        })
    });

    let agg = aggregate.into_inner();
    let good: Vec<f64> = agg
        .finished
        .iter()
        .cloned()
        .filter(|&f| f < cfg.improvement_threshold)
        .collect();
    let (mean, std) = mean_std(&good);
    let evals = problem.evals();
    let elapsed = meter.elapsed();
    logger.log(&simple_line(
        elapsed,
        evals as f64 / elapsed.max(1e-9),
        agg.attempted,
        evals,
        agg.best_f,
        mean,
        std,
        &agg.top20(),
        agg.best_x.as_ref(),
    ));

    let top = agg.top20();
    Ok(RetryReport {
        x: agg
            .best_x
            .unwrap_or_else(|| problem.bounds().midpoint()),
        fun: agg.best_f,
        evals,
        retries: agg.attempted,
        mean,
        std,
        top,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmaes::CmaEs;
    use crate::logging::NullLogger;
    use crate::problem::Bounds;
    use ridgeline_testfunctions::sphere;

    #[test]
    fn test_retry_finds_sphere_minimum() {
        let bounds = Bounds::new(
            Array1::from_elem(4, -5.0),
            Array1::from_elem(4, 5.0),
        )
        .unwrap();
        let problem = Problem::new(sphere, bounds);
        let cfg = RetryConfigBuilder::new()
            .num_retries(4)
            .workers(2)
            .seed(11)
            .max_evals(4_000)
            .target(1e-10)
            .build();
        let report = retry_minimize(&problem, &CmaEs::new(), &cfg, &NullLogger).unwrap();
        assert!(report.fun < 1e-8, "fun = {}", report.fun);
        assert!(report.retries >= 1);
        assert!(!report.top.is_empty());
        assert!(report.evals > 0);
    }

    #[test]
    fn test_zero_retries_rejected() {
        let bounds = Bounds::new(
            Array1::from_elem(2, -1.0),
            Array1::from_elem(2, 1.0),
        )
        .unwrap();
        let problem = Problem::new(sphere, bounds);
        let cfg = RetryConfigBuilder::new().num_retries(0).build();
        assert!(retry_minimize(&problem, &CmaEs::new(), &cfg, &NullLogger).is_err());
    }
}
