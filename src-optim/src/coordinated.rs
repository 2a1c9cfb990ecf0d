//! Coordinated retry: the elite-store-driven meta optimizer
//!
//! Workers independently draw work: while the store is still sparse they run
//! cold starts (uniform seed, `0.3 s` step scale); once it has filled past a
//! fifth of its capacity they recombine two rank-sampled elites into a child
//! seed with a slightly extrapolating uniform crossover. Per-run budgets
//! start cheap and double on a fixed completion schedule up to a cap, so the
//! early phase explores and the late phase exploits.
//!
//! Unlike an island model, no population members migrate between runs: only
//! a starting point and a step scale are communicated, which is the minimal
//! unit CMA-ES-style algorithms can rebuild a population from.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ndarray::Array1;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::logging::{coordinated_line, ProgressMeter, RetryLogger};
use crate::problem::Problem;
use crate::retry::{mean_std, resolve_workers, RetryReport};
use crate::sampling::{derive_rng, derive_seed, uniform_in};
use crate::store::{RetryStore, StoreConfig, StoreEntry};
use crate::{Error, Optimizer, RunOptions};

#[derive(Debug, Clone)]
pub struct CoordinatedConfig {
    pub num_retries: usize,
    /// 0 picks the machine's logical CPU count.
    pub workers: usize,
    pub seed: u64,
    /// Per-run evaluation budget at the start of the schedule.
    pub max_evals_init: u64,
    /// Ceiling the per-run budget doubles up to.
    pub max_evals_cap: u64,
    pub store: StoreConfig,
    /// Cold-mode step scale as a fraction of the box half-width.
    pub sigma_factor: f64,
    pub stop_fitness: Option<f64>,
    /// Wall-clock limit for the whole call.
    pub max_time: Option<Duration>,
    pub log_interval: Duration,
}

impl Default for CoordinatedConfig {
    fn default() -> Self {
        Self {
            num_retries: 500,
            workers: 0,
            seed: 0,
            max_evals_init: 1_500,
            max_evals_cap: 50_000,
            store: StoreConfig::default(),
            sigma_factor: 0.3,
            stop_fitness: None,
            max_time: None,
            log_interval: Duration::from_secs(10),
        }
    }
}

/// Fluent builder for `CoordinatedConfig`.
pub struct CoordinatedConfigBuilder {
    cfg: CoordinatedConfig,
}

impl CoordinatedConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: CoordinatedConfig::default(),
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
    pub fn max_evals_init(mut self, v: u64) -> Self {
        self.cfg.max_evals_init = v;
        self
    }
    pub fn max_evals_cap(mut self, v: u64) -> Self {
        self.cfg.max_evals_cap = v;
        self
    }
    pub fn store(mut self, v: StoreConfig) -> Self {
        self.cfg.store = v;
        self
    }
    pub fn capacity(mut self, v: usize) -> Self {
        self.cfg.store.capacity = v;
        self
    }
    pub fn sigma_factor(mut self, v: f64) -> Self {
        self.cfg.sigma_factor = v;
        self
    }
    pub fn stop_fitness(mut self, v: f64) -> Self {
        self.cfg.stop_fitness = Some(v);
        self
    }
    pub fn max_time(mut self, v: Duration) -> Self {
        self.cfg.max_time = Some(v);
        self
    }
    pub fn log_interval(mut self, v: Duration) -> Self {
        self.cfg.log_interval = v;
        self
    }
    pub fn build(self) -> CoordinatedConfig {
        self.cfg
    }
}

impl Default for CoordinatedConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run budget after `completed` finished retries: starts at
/// `max_evals_init`, doubles every `ceil(num_retries / (cap / init))`
/// completions, saturates at `max_evals_cap`.
fn budget_for(completed: usize, cfg: &CoordinatedConfig) -> u64 {
    let ratio = (cfg.max_evals_cap / cfg.max_evals_init).max(1) as usize;
    let step = cfg.num_retries.div_ceil(ratio).max(1);
    let doublings = completed / step;
    if doublings >= 63 {
        return cfg.max_evals_cap;
    }
    (cfg.max_evals_init << doublings).min(cfg.max_evals_cap)
}

/// Child seed from two store entries: uniform crossover with slight
/// extrapolation beyond the segment endpoints, step scale from the parent
/// distance clamped away from zero so a degenerate pair cannot produce a
/// zero-variance start.
fn crossover_seed(
    a: &StoreEntry,
    b: &StoreEntry,
    problem: &Problem,
    rng: &mut rand::rngs::StdRng,
) -> (Array1<f64>, Array1<f64>) {
    use rand::Rng;
    let scale = problem.bounds().scale();
    let n = a.x.len();
    let mut x0 = Array1::zeros(n);
    let mut sigma0 = Array1::zeros(n);
    for i in 0..n {
        let u = -0.1 + 1.2 * rng.random::<f64>();
        x0[i] = a.x[i] + u * (b.x[i] - a.x[i]);
        sigma0[i] = (0.5 * (a.x[i] - b.x[i]).abs()).clamp(1e-6 * scale[i], scale[i]);
    }
    problem.bounds().reflect_into(&mut x0);
    (x0, sigma0)
}

/// Run the coordinated retry loop. Workers draw seeds from the shared store,
/// run `optimizer` under the scheduled budget and admit results back under
/// the store lock. Returns the aggregated best with store statistics.
pub fn coordinated_minimize(
    problem: &Problem,
    optimizer: &dyn Optimizer,
    cfg: &CoordinatedConfig,
    logger: &dyn RetryLogger,
) -> Result<RetryReport, Error> {
    if cfg.num_retries == 0 {
        return Err(Error::InvalidConfig("num_retries must be positive".into()));
    }
    if cfg.max_evals_init == 0 || cfg.max_evals_cap < cfg.max_evals_init {
        return Err(Error::InvalidConfig(
            "budget schedule needs 0 < max_evals_init <= max_evals_cap".into(),
        ));
    }
    let workers = resolve_workers(cfg.workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;

    let store = Mutex::new(RetryStore::new(problem.bounds(), cfg.store.clone())?);
    let completed = AtomicUsize::new(0);
    let meter = ProgressMeter::new(cfg.log_interval);
    let k_min = cfg.store.capacity.div_ceil(5);

    if let Some(limit) = cfg.max_time {
        problem.set_deadline(limit);
    }

    pool.install(|| {
        (0..cfg.num_retries).into_par_iter().for_each(|i| {
            if problem.should_stop() {
                return;
            }
            if let Some(target) = cfg.stop_fitness {
                if store.lock().best_f() <= target {
                    return;
                }
            }

            let mut rng = derive_rng(cfg.seed, i as u64);
            // Mode decision and parent selection share the admission lock.
            let (x0, sigma0, parents) = {
                let guard = store.lock();
                if guard.len() < k_min {
                    (
                        uniform_in(problem.bounds(), &mut rng),
                        problem.bounds().scale() * cfg.sigma_factor,
                        None,
                    )
                } else {
                    match guard.sample_parents(&mut rng) {
                        Some((a, b)) => {
                            let (x0, sigma0) = crossover_seed(&a, &b, problem, &mut rng);
                            (x0, sigma0, Some((a.generation, b.generation)))
                        }
                        // Everything over the seed-count ceiling: cold start.
                        None => (
                            uniform_in(problem.bounds(), &mut rng),
                            problem.bounds().scale() * cfg.sigma_factor,
                            None,
                        ),
                    }
                }
            };

            let run = RunOptions {
                x0: Some(x0),
                sigma0: Some(sigma0),
                max_evals: budget_for(completed.load(Ordering::Relaxed), cfg),
                seed: derive_seed(cfg.seed, i as u64),
                target: cfg.stop_fitness,
                workers: 1,
            };

            match catch_unwind(AssertUnwindSafe(|| optimizer.minimize(problem, &run))) {
                Ok(Ok(report)) => {
                    store.lock().admit(report.x, report.fun, parents);
                }
                Ok(Err(err)) => {
                    log::warn!("coordinated run {} failed: {}", i, err);
                }
                Err(_) => {
                    log::warn!("coordinated run {} panicked", i);
                }
            }
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;

            if let Some(t) = meter.due() {
                let guard = store.lock();
                let top: Vec<f64> = guard.entries().iter().take(20).map(|e| e.f).collect();
                let evals = problem.evals();
                let best = guard.best().map(|(x, _)| x.clone());
                logger.log(&coordinated_line(
                    t,
                    evals as f64 / t.max(1e-9),
                    done,
                    evals,
                    guard.best_f(),
                    guard.worst_f().unwrap_or(f64::INFINITY),
                    guard.len(),
                    &top,
                    best.as_ref(),
                ));
            }
        })
    });

    if cfg.max_time.is_some() {
        problem.clear_deadline();
    }

    let store = store.into_inner();
    let entry_fs: Vec<f64> = store.entries().iter().map(|e| e.f).collect();
    let (mean, std) = mean_std(&entry_fs);
    let top: Vec<f64> = entry_fs.iter().cloned().take(20).collect();
    let evals = problem.evals();
    let elapsed = meter.elapsed();
    let (best_x, best_f) = match store.best() {
        Some((x, f)) => (x.clone(), f),
        None => (problem.bounds().midpoint(), f64::INFINITY),
    };
    logger.log(&coordinated_line(
        elapsed,
        evals as f64 / elapsed.max(1e-9),
        completed.load(Ordering::Relaxed),
        evals,
        best_f,
        store.worst_f().unwrap_or(f64::INFINITY),
        store.len(),
        &top,
        Some(&best_x),
    ));

    Ok(RetryReport {
        x: best_x,
        fun: best_f,
        evals,
        retries: completed.load(Ordering::Relaxed),
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
    fn test_budget_schedule_doubles_to_cap() {
        let cfg = CoordinatedConfigBuilder::new()
            .num_retries(100)
            .max_evals_init(1_000)
            .max_evals_cap(8_000)
            .build();
        // ratio 8 -> step 13
        assert_eq!(budget_for(0, &cfg), 1_000);
        assert_eq!(budget_for(12, &cfg), 1_000);
        assert_eq!(budget_for(13, &cfg), 2_000);
        assert_eq!(budget_for(26, &cfg), 4_000);
        assert_eq!(budget_for(39, &cfg), 8_000);
        assert_eq!(budget_for(99, &cfg), 8_000);
    }

    #[test]
    fn test_coordinated_sphere() {
        let bounds = Bounds::new(
            Array1::from_elem(3, -5.0),
            Array1::from_elem(3, 5.0),
        )
        .unwrap();
        let problem = Problem::new(sphere, bounds);
        let cfg = CoordinatedConfigBuilder::new()
            .num_retries(30)
            .workers(2)
            .seed(4)
            .max_evals_init(500)
            .max_evals_cap(4_000)
            .capacity(50)
            .stop_fitness(1e-10)
            .build();
        let report = coordinated_minimize(&problem, &CmaEs::new(), &cfg, &NullLogger).unwrap();
        assert!(report.fun < 1e-8, "fun = {}", report.fun);
        assert!(problem.bounds().contains(&report.x));
        assert!(report.retries >= 1);
    }

    #[test]
    fn test_invalid_budget_schedule_rejected() {
        let bounds = Bounds::new(
            Array1::from_elem(2, -1.0),
            Array1::from_elem(2, 1.0),
        )
        .unwrap();
        let problem = Problem::new(sphere, bounds);
        let cfg = CoordinatedConfigBuilder::new()
            .max_evals_init(5_000)
            .max_evals_cap(1_000)
            .build();
        assert!(
            coordinated_minimize(&problem, &CmaEs::new(), &cfg, &NullLogger).is_err()
        );
    }
}
