//! Algorithm expressions: optimizers composed from optimizers
//!
//! `Sequence` chains stages, handing the best point and final dispersion of
//! one stage to the next; `RandomChoice` picks one optimizer per invocation.
//! Both satisfy [`Optimizer`] themselves, so expressions nest arbitrarily.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::problem::Problem;
use crate::sampling::splitmix64;
use crate::{seed_report, Error, Optimizer, Report, RunOptions, Status};

/// Runs its stages in order, splitting the evaluation budget proportionally
/// to `weights`. Each stage starts from the best point seen so far; a failed
/// stage is logged and skipped.
pub struct Sequence {
    opts: Vec<Arc<dyn Optimizer>>,
    weights: Vec<f64>,
}

impl Sequence {
    pub fn new(opts: Vec<Arc<dyn Optimizer>>, weights: Vec<f64>) -> Result<Self, Error> {
        if opts.is_empty() {
            return Err(Error::InvalidConfig("sequence needs at least one stage".into()));
        }
        if opts.len() != weights.len() {
            return Err(Error::InvalidConfig(format!(
                "sequence has {} stages but {} weights",
                opts.len(),
                weights.len()
            )));
        }
        if weights.iter().any(|&w| !(w > 0.0) || !w.is_finite()) {
            return Err(Error::InvalidConfig(
                "sequence weights must be positive and finite".into(),
            ));
        }
        Ok(Self { opts, weights })
    }

    /// Equal budget share for every stage.
    pub fn even(opts: Vec<Arc<dyn Optimizer>>) -> Result<Self, Error> {
        let weights = vec![1.0; opts.len()];
        Self::new(opts, weights)
    }

    /// Budget for each stage; the final stage absorbs rounding remainder so
    /// the shares always sum to `total`.
    fn shares(&self, total: u64) -> Vec<u64> {
        let wsum: f64 = self.weights.iter().sum();
        let mut shares: Vec<u64> = self
            .weights
            .iter()
            .map(|w| ((w / wsum) * total as f64).floor() as u64)
            .collect();
        let used: u64 = shares.iter().sum();
        if let Some(last) = shares.last_mut() {
            *last += total - used;
        }
        shares
    }
}

impl Optimizer for Sequence {
    fn name(&self) -> &str {
        "sequence"
    }

    fn minimize(&self, problem: &Problem, opts: &RunOptions) -> Result<Report, Error> {
        if opts.max_evals == 0 {
            return Ok(seed_report(problem, opts));
        }
        let shares = self.shares(opts.max_evals);

        let mut best: Option<Report> = None;
        let mut x0 = opts.x0.clone();
        let mut sigma0 = opts.sigma0.clone();
        let mut nfev: u64 = 0;
        let mut last_status = Status::StopMaxIter;

        for (i, (stage, &budget)) in self.opts.iter().zip(shares.iter()).enumerate() {
            if budget == 0 {
                continue;
            }
            let stage_opts = RunOptions {
                x0: x0.clone(),
                sigma0: sigma0.clone(),
                max_evals: budget,
                seed: opts.seed.wrapping_add(i as u64),
                target: opts.target,
                workers: opts.workers,
            };
            match stage.minimize(problem, &stage_opts) {
                Ok(report) => {
                    nfev += report.nfev;
                    last_status = report.status;
                    if report.sigma.is_some() {
                        sigma0 = report.sigma.clone();
                    }
                    let improved = best
                        .as_ref()
                        .map(|b| report.fun < b.fun)
                        .unwrap_or(true);
                    if improved {
                        best = Some(report);
                    }
                    if let Some(b) = &best {
                        x0 = Some(b.x.clone());
                    }
                    if matches!(last_status, Status::StopFitness | Status::Stopped) {
                        break;
                    }
                }
                Err(err) => {
                    log::warn!("sequence stage {} ({}) failed: {}", i, stage.name(), err);
                }
            }
            if problem.should_stop() {
                last_status = Status::Stopped;
                break;
            }
        }

        match best {
            Some(mut report) => {
                report.nfev = nfev;
                report.status = last_status;
                Ok(report)
            }
            // Every stage failed or was starved; fall back to the seed point.
            None => Ok(seed_report(problem, opts)),
        }
    }
}

/// Picks one of its optimizers per invocation by a discrete distribution and
/// hands it the full budget.
pub struct RandomChoice {
    opts: Vec<Arc<dyn Optimizer>>,
    probs: Vec<f64>,
}

impl RandomChoice {
    pub fn new(opts: Vec<Arc<dyn Optimizer>>, probs: Vec<f64>) -> Result<Self, Error> {
        if opts.is_empty() {
            return Err(Error::InvalidConfig(
                "random choice needs at least one optimizer".into(),
            ));
        }
        if opts.len() != probs.len() {
            return Err(Error::InvalidConfig(format!(
                "random choice has {} optimizers but {} probabilities",
                opts.len(),
                probs.len()
            )));
        }
        let total: f64 = probs.iter().sum();
        if probs.iter().any(|&p| !(p >= 0.0) || !p.is_finite()) || total <= 0.0 {
            return Err(Error::InvalidConfig(
                "probabilities must be non-negative with positive sum".into(),
            ));
        }
        Ok(Self { opts, probs })
    }

    /// Uniform choice over the given optimizers.
    pub fn uniform(opts: Vec<Arc<dyn Optimizer>>) -> Result<Self, Error> {
        let probs = vec![1.0; opts.len()];
        Self::new(opts, probs)
    }

    fn pick(&self, seed: u64) -> usize {
        let mut rng = StdRng::seed_from_u64(splitmix64(seed));
        let total: f64 = self.probs.iter().sum();
        let mut draw = rng.random::<f64>() * total;
        for (i, &p) in self.probs.iter().enumerate() {
            draw -= p;
            if draw <= 0.0 {
                return i;
            }
        }
        self.probs.len() - 1
    }
}

impl Optimizer for RandomChoice {
    fn name(&self) -> &str {
        "random_choice"
    }

    fn minimize(&self, problem: &Problem, opts: &RunOptions) -> Result<Report, Error> {
        let choice = self.pick(opts.seed);
        self.opts[choice].minimize(problem, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmaes::CmaEs;
    use crate::de::DifferentialEvolution;
    use crate::problem::Bounds;
    use ndarray::Array1;
    use ridgeline_testfunctions::sphere;

    fn sphere_problem(n: usize) -> Problem {
        let bounds = Bounds::new(Array1::from_elem(n, -5.0), Array1::from_elem(n, 5.0)).unwrap();
        Problem::new(sphere, bounds)
    }

    #[test]
    fn test_singleton_sequence_matches_direct_run() {
        let direct = {
            let problem = sphere_problem(3);
            CmaEs::new()
                .minimize(&problem, &RunOptions::new(2_000, 55))
                .unwrap()
        };
        let chained = {
            let problem = sphere_problem(3);
            let seq = Sequence::new(vec![Arc::new(CmaEs::new())], vec![1.0]).unwrap();
            seq.minimize(&problem, &RunOptions::new(2_000, 55)).unwrap()
        };
        assert_eq!(direct.fun, chained.fun);
        assert_eq!(direct.nfev, chained.nfev);
        for (a, b) in direct.x.iter().zip(chained.x.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_sequence_chains_stages() {
        let problem = sphere_problem(4);
        let seq = Sequence::new(
            vec![
                Arc::new(DifferentialEvolution::new()),
                Arc::new(CmaEs::new()),
            ],
            vec![1.0, 1.0],
        )
        .unwrap();
        let report = seq
            .minimize(&problem, &RunOptions::new(20_000, 9).target(1e-12))
            .unwrap();
        assert!(report.fun < 1e-8, "fun = {}", report.fun);
        assert!(report.nfev <= 20_000 + 200);
    }

    #[test]
    fn test_nested_expressions() {
        let problem = sphere_problem(2);
        let inner = Sequence::even(vec![
            Arc::new(DifferentialEvolution::new()),
            Arc::new(CmaEs::new()),
        ])
        .unwrap();
        let outer = RandomChoice::uniform(vec![
            Arc::new(inner) as Arc<dyn Optimizer>,
            Arc::new(CmaEs::new()),
        ])
        .unwrap();
        let report = outer
            .minimize(&problem, &RunOptions::new(8_000, 17).target(1e-10))
            .unwrap();
        assert!(report.fun < 1e-6, "fun = {}", report.fun);
    }

    #[test]
    fn test_validation_fails_fast() {
        assert!(Sequence::new(vec![], vec![]).is_err());
        assert!(Sequence::new(vec![Arc::new(CmaEs::new())], vec![1.0, 2.0]).is_err());
        assert!(Sequence::new(vec![Arc::new(CmaEs::new())], vec![-1.0]).is_err());
        assert!(RandomChoice::new(vec![Arc::new(CmaEs::new())], vec![0.0]).is_err());
    }

    #[test]
    fn test_random_choice_is_deterministic_per_seed() {
        let rc = RandomChoice::uniform(vec![
            Arc::new(CmaEs::new()) as Arc<dyn Optimizer>,
            Arc::new(DifferentialEvolution::new()),
        ])
        .unwrap();
        assert_eq!(rc.pick(4), rc.pick(4));
    }
}
