//! Coordinated-retry global optimization in pure Rust using ndarray
//!
//! This crate minimizes bound-constrained, possibly ill-conditioned,
//! non-smooth black-box objectives by running many short independent
//! optimization runs in parallel and seeding later runs from a shared store
//! of elite solutions.
//!
//! Supported features:
//! - Box constraints (lower/upper bounds) with reflection repair
//! - CMA-ES with ask/tell surface and optional parallel population evaluation
//! - Differential evolution (current-to-pbest/1/bin) with temporal-locality
//!   child propagation and age-based reinitialization
//! - Sequence and RandomChoice combinators over optimizers
//! - Simple parallel retry (independent restarts, aggregated statistics)
//! - Coordinated retry: shared elite store, crossover seeding, adaptive
//!   per-run evaluation budgets
//! - Dual annealing and Harris hawks optimizers behind the same contract
//! - Cooperative cancellation, wall-clock deadlines, store checkpointing

#![allow(missing_docs)]

use ndarray::Array1;

pub mod anneal;
pub mod cmaes;
pub mod coordinated;
pub mod de;
pub mod eigen;
pub mod expr;
pub mod hawks;
pub mod logging;
pub mod problem;
pub mod retry;
pub mod sampling;
pub mod store;

pub use anneal::{AnnealConfig, DualAnnealing};
pub use cmaes::{CmaConfig, CmaConfigBuilder, CmaEs, CmaState};
pub use coordinated::{coordinated_minimize, CoordinatedConfig, CoordinatedConfigBuilder};
pub use de::{DeConfig, DeConfigBuilder, DeInit, DeState, DifferentialEvolution};
pub use expr::{RandomChoice, Sequence};
pub use hawks::{HarrisHawks, HawksConfig};
pub use logging::{NullLogger, RetryLogger, StdLogger};
pub use problem::{Bounds, Problem};
pub use retry::{retry_minimize, RetryConfig, RetryConfigBuilder, RetryReport};
pub use store::{RetryStore, StoreConfig, StoreEntry};

/// Library error type. Configuration errors are raised before any objective
/// evaluation; objective failures never surface here (they become infinite
/// candidate values instead).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("lower and upper bounds differ in length: {lower} vs {upper}")]
    BoundsMismatch { lower: usize, upper: usize },
    #[error("bound {index} is empty: lower {lower} must be strictly below upper {upper}")]
    EmptyBound { index: usize, lower: f64, upper: f64 },
    #[error("bounds must have at least one dimension")]
    ZeroDimension,
    #[error("population size must be positive")]
    ZeroPopsize,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Why an optimization run stopped (or did not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Status {
    /// The run may continue; only ever observed between ask/tell rounds.
    Continue,
    /// Target objective value reached.
    StopFitness,
    /// All coordinate standard deviations fell below `tolx`.
    StopTolX,
    /// Best objective value stagnated below `tolfun` over the history window.
    StopTolFun,
    /// Generation or evaluation budget exhausted.
    StopMaxIter,
    /// Numerical degeneracy (covariance conditioning or repeated recovery).
    StopCondition,
    /// An entire generation evaluated to non-finite values.
    StopFitnessInvalid,
    /// Cooperative cancellation or wall-clock deadline.
    Stopped,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Continue)
    }
}

/// Per-run options consumed by [`Optimizer::minimize`]. Produced by hand for
/// single runs and by the retry schedulers for fan-out runs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Initial guess; defaults to a uniform sample in the box.
    pub x0: Option<Array1<f64>>,
    /// Initial per-coordinate step scale; defaults to `0.3 * (hi - lo) / 2`.
    pub sigma0: Option<Array1<f64>>,
    /// Evaluation budget for this run. Zero evaluates the initial guess once.
    pub max_evals: u64,
    /// Seed for the run's private RNG stream.
    pub seed: u64,
    /// Stop as soon as the objective falls to or below this value.
    pub target: Option<f64>,
    /// Worker threads for population evaluation (1 = sequential).
    pub workers: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            x0: None,
            sigma0: None,
            max_evals: 50_000,
            seed: 0,
            target: None,
            workers: 1,
        }
    }
}

impl RunOptions {
    pub fn new(max_evals: u64, seed: u64) -> Self {
        Self {
            max_evals,
            seed,
            ..Self::default()
        }
    }

    pub fn x0(mut self, x0: Array1<f64>) -> Self {
        self.x0 = Some(x0);
        self
    }

    pub fn sigma0(mut self, sigma0: Array1<f64>) -> Self {
        self.sigma0 = Some(sigma0);
        self
    }

    /// Convenience for a scalar step scale applied to every coordinate.
    pub fn sigma_scalar(mut self, sigma: f64, n: usize) -> Self {
        self.sigma0 = Some(Array1::from_elem(n, sigma));
        self
    }

    pub fn target(mut self, target: f64) -> Self {
        self.target = Some(target);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// Result of a single optimization run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Report {
    /// Best point found.
    pub x: Array1<f64>,
    /// Objective value at `x` (`f64::INFINITY` when nothing finite was seen).
    pub fun: f64,
    /// Terminal status of the run.
    pub status: Status,
    /// Generations completed.
    pub nit: usize,
    /// Objective evaluations consumed by this run.
    pub nfev: u64,
    /// Final per-coordinate dispersion, when the algorithm maintains one.
    /// Used by [`Sequence`] to derive the next stage's step size.
    pub sigma: Option<Array1<f64>>,
}

/// The optimizer contract shared by every algorithm and combinator in this
/// crate. Implementations must be re-entrant: all run state lives on the
/// stack of `minimize`, seeded from `opts`.
pub trait Optimizer: Send + Sync {
    fn name(&self) -> &str;

    fn minimize(&self, problem: &Problem, opts: &RunOptions) -> Result<Report, Error>;
}

/// Zero-budget runs short-circuit here: evaluate the initial guess (or the
/// bounds midpoint) exactly once and report it.
pub(crate) fn seed_report(problem: &Problem, opts: &RunOptions) -> Report {
    let mut x = opts
        .x0
        .clone()
        .unwrap_or_else(|| problem.bounds().midpoint());
    problem.bounds().reflect_into(&mut x);
    let fun = problem.eval(&x);
    Report {
        x,
        fun,
        status: Status::StopMaxIter,
        nit: 0,
        nfev: 1,
        sigma: opts.sigma0.clone(),
    }
}
