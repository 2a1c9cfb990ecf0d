//! Objective wrapper and bound-constrained problem definition.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array1;
use parking_lot::Mutex;

use crate::Error;

/// Box constraints: `lower[i] < upper[i]` for every coordinate, validated at
/// construction and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Bounds {
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl Bounds {
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self, Error> {
        if lower.len() != upper.len() {
            return Err(Error::BoundsMismatch {
                lower: lower.len(),
                upper: upper.len(),
            });
        }
        if lower.is_empty() {
            return Err(Error::ZeroDimension);
        }
        for i in 0..lower.len() {
            if !(lower[i] < upper[i]) || !lower[i].is_finite() || !upper[i].is_finite() {
                return Err(Error::EmptyBound {
                    index: i,
                    lower: lower[i],
                    upper: upper[i],
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// Build from `(lower, upper)` pairs.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Result<Self, Error> {
        let lower = Array1::from_iter(pairs.iter().map(|&(lo, _)| lo));
        let upper = Array1::from_iter(pairs.iter().map(|&(_, hi)| hi));
        Self::new(lower, upper)
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &Array1<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &Array1<f64> {
        &self.upper
    }

    /// Center of the box.
    pub fn midpoint(&self) -> Array1<f64> {
        (&self.lower + &self.upper) * 0.5
    }

    /// Half-width of the box per coordinate.
    pub fn scale(&self) -> Array1<f64> {
        (&self.upper - &self.lower) * 0.5
    }

    pub fn contains(&self, x: &Array1<f64>) -> bool {
        x.len() == self.dim()
            && x.iter()
                .enumerate()
                .all(|(i, &xi)| xi >= self.lower[i] && xi <= self.upper[i])
    }

    /// Reflection repair: mirror each out-of-box coordinate against the
    /// violated face. Points far outside collapse to the boundary after a
    /// bounded number of reflections; non-finite coordinates snap to the
    /// midpoint.
    pub fn reflect_into(&self, x: &mut Array1<f64>) {
        for i in 0..x.len() {
            let lo = self.lower[i];
            let hi = self.upper[i];
            if !x[i].is_finite() {
                x[i] = 0.5 * (lo + hi);
                continue;
            }
            for _ in 0..4 {
                if x[i] < lo {
                    x[i] = 2.0 * lo - x[i];
                } else if x[i] > hi {
                    x[i] = 2.0 * hi - x[i];
                } else {
                    break;
                }
            }
            x[i] = x[i].clamp(lo, hi);
        }
    }
}

/// Objective function contract: `Send + Sync` is the caller's declaration
/// that the objective is safe to invoke from worker threads.
pub type Objective = dyn Fn(&Array1<f64>) -> f64 + Send + Sync;

/// The problem handed to optimizers and retry engines: objective, bounds, a
/// global evaluation counter, an optional per-evaluation wall-clock budget,
/// and a cooperative cancellation token with optional deadline.
pub struct Problem {
    func: Arc<Objective>,
    bounds: Bounds,
    evals: AtomicU64,
    eval_timeout: Option<Duration>,
    cancelled: AtomicBool,
    deadline: Mutex<Option<Instant>>,
}

impl Problem {
    pub fn new<F>(func: F, bounds: Bounds) -> Self
    where
        F: Fn(&Array1<f64>) -> f64 + Send + Sync + 'static,
    {
        Self::from_arc(Arc::new(func), bounds)
    }

    pub fn from_arc(func: Arc<Objective>, bounds: Bounds) -> Self {
        Self {
            func,
            bounds,
            evals: AtomicU64::new(0),
            eval_timeout: None,
            cancelled: AtomicBool::new(false),
            deadline: Mutex::new(None),
        }
    }

    /// Discard any evaluation whose wall-clock time exceeds `timeout`.
    /// Closures cannot be preempted, so the result is thrown away after the
    /// fact and the run proceeds as if the objective had failed.
    pub fn with_eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout = Some(timeout);
        self
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn dim(&self) -> usize {
        self.bounds.dim()
    }

    /// Evaluate the objective. NaN, non-finite results and timed-out
    /// evaluations all map to `f64::INFINITY` so they can never poison
    /// statistics downstream.
    pub fn eval(&self, x: &Array1<f64>) -> f64 {
        self.evals.fetch_add(1, Ordering::Relaxed);
        let started = self.eval_timeout.map(|_| Instant::now());
        let value = (self.func)(x);
        if let (Some(timeout), Some(started)) = (self.eval_timeout, started) {
            if started.elapsed() > timeout {
                return f64::INFINITY;
            }
        }
        if value.is_finite() { value } else { f64::INFINITY }
    }

    /// Total evaluations across every run sharing this problem.
    pub fn evals(&self) -> u64 {
        self.evals.load(Ordering::Relaxed)
    }

    /// Request cooperative cancellation. Checked at run dispatch and between
    /// ask/tell rounds; in-flight evaluations are allowed to finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Arm a wall-clock deadline measured from now.
    pub fn set_deadline(&self, after: Duration) {
        *self.deadline.lock() = Some(Instant::now() + after);
    }

    pub fn clear_deadline(&self) {
        *self.deadline.lock() = None;
    }

    pub fn should_stop(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        match *self.deadline.lock() {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

impl fmt::Debug for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Problem")
            .field("dim", &self.bounds.dim())
            .field("evals", &self.evals())
            .field("eval_timeout", &self.eval_timeout)
            .finish()
    }
}

/// Build the evaluation pool once per call; `None` means evaluate inline.
pub(crate) fn build_pool(workers: usize) -> Option<rayon::ThreadPool> {
    if workers <= 1 {
        return None;
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .ok()
}

/// Evaluate a population, preserving submission order in the returned values.
pub(crate) fn evaluate_all(
    problem: &Problem,
    points: &[Array1<f64>],
    pool: Option<&rayon::ThreadPool>,
) -> Vec<f64> {
    use rayon::prelude::*;
    match pool {
        Some(pool) => pool.install(|| points.par_iter().map(|x| problem.eval(x)).collect()),
        None => points.iter().map(|x| problem.eval(x)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(n: usize) -> Bounds {
        Bounds::new(Array1::from_elem(n, -1.0), Array1::from_elem(n, 1.0)).unwrap()
    }

    #[test]
    fn test_bounds_validation() {
        assert!(Bounds::from_pairs(&[(0.0, 1.0), (2.0, 3.0)]).is_ok());
        assert!(matches!(
            Bounds::from_pairs(&[]),
            Err(Error::ZeroDimension)
        ));
        assert!(matches!(
            Bounds::from_pairs(&[(1.0, 1.0)]),
            Err(Error::EmptyBound { .. })
        ));
        assert!(matches!(
            Bounds::new(Array1::zeros(2), Array1::from_elem(3, 1.0)),
            Err(Error::BoundsMismatch { lower: 2, upper: 3 })
        ));
    }

    #[test]
    fn test_reflection_repair() {
        let bounds = unit_box(4);
        let mut x = Array1::from_vec(vec![1.4, -1.4, 25.0, f64::NAN]);
        bounds.reflect_into(&mut x);
        assert!(bounds.contains(&x));
        assert!((x[0] - 0.6).abs() < 1e-12);
        assert!((x[1] + 0.6).abs() < 1e-12);
        // Far outside collapses to the boundary.
        assert_eq!(x[2], 1.0);
        assert_eq!(x[3], 0.0);
    }

    #[test]
    fn test_eval_maps_failures_to_infinity() {
        let bounds = unit_box(2);
        let problem = Problem::new(
            |x: &Array1<f64>| if x[0] > 0.0 { f64::NAN } else { x[1] },
            bounds,
        );
        assert_eq!(problem.eval(&Array1::from_vec(vec![1.0, 3.0])), f64::INFINITY);
        assert_eq!(problem.eval(&Array1::from_vec(vec![-1.0, 3.0])), 3.0);
        assert_eq!(problem.evals(), 2);
    }

    #[test]
    fn test_eval_timeout_discards_result() {
        let bounds = unit_box(1);
        let problem = Problem::new(
            |x: &Array1<f64>| {
                std::thread::sleep(Duration::from_millis(30));
                x[0]
            },
            bounds,
        )
        .with_eval_timeout(Duration::from_millis(1));
        assert_eq!(problem.eval(&Array1::from_vec(vec![0.5])), f64::INFINITY);
        assert_eq!(problem.evals(), 1);
    }

    #[test]
    fn test_cancellation_and_deadline() {
        let problem = Problem::new(|_x: &Array1<f64>| 0.0, unit_box(1));
        assert!(!problem.should_stop());
        problem.set_deadline(Duration::from_secs(3600));
        assert!(!problem.should_stop());
        problem.cancel();
        assert!(problem.should_stop());
    }
}
