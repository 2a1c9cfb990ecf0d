//! Differential evolution optimizer (current-to-pbest/1/bin)
//!
//! DE variant tuned for the retry engines:
//! - mutation factor F and crossover rate CR dithered per offspring
//! - pbest parent drawn from the top 30% of the population
//! - temporal locality: a successful trial spawns a second probe further
//!   along the same improvement direction, the better of the two survives
//! - stochastic age-based reinitialization of stagnant individuals
//!
//! The ask/tell surface returns whatever batch needs evaluating next: the
//! initial population, a full generation of trials, or the follow-up probes
//! (temporal-locality seconds plus reinitialized individuals).

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::problem::{build_pool, evaluate_all, Bounds, Problem};
use crate::sampling::resample_outside;
use crate::{seed_report, Error, Optimizer, Report, RunOptions, Status};

/// Population initialization scheme.
#[derive(Debug, Clone, Copy, Default)]
pub enum DeInit {
    #[default]
    LatinHypercube,
    Random,
}

#[derive(Debug, Clone)]
pub struct DeConfig {
    /// Population size; default `max(5 n, 40)`.
    pub popsize: Option<usize>,
    pub max_iter: usize,
    pub tolx: f64,
    pub tolfun: f64,
    /// Age ceiling for reinitialization; default equals the population size.
    pub age_max: Option<u32>,
    pub init: DeInit,
    /// Override for the stagnation window; default `10 + ceil(30 n / popsize)`.
    pub history: Option<usize>,
}

impl Default for DeConfig {
    fn default() -> Self {
        Self {
            popsize: None,
            max_iter: usize::MAX,
            tolx: 1e-12,
            tolfun: 1e-12,
            age_max: None,
            init: DeInit::default(),
            history: None,
        }
    }
}

/// Fluent builder for `DeConfig`.
pub struct DeConfigBuilder {
    cfg: DeConfig,
}

impl DeConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: DeConfig::default(),
        }
    }
    pub fn popsize(mut self, v: usize) -> Self {
        self.cfg.popsize = Some(v);
        self
    }
    pub fn max_iter(mut self, v: usize) -> Self {
        self.cfg.max_iter = v;
        self
    }
    pub fn tolx(mut self, v: f64) -> Self {
        self.cfg.tolx = v;
        self
    }
    pub fn tolfun(mut self, v: f64) -> Self {
        self.cfg.tolfun = v;
        self
    }
    pub fn age_max(mut self, v: u32) -> Self {
        self.cfg.age_max = Some(v);
        self
    }
    pub fn init(mut self, v: DeInit) -> Self {
        self.cfg.init = v;
        self
    }
    pub fn build(self) -> DeConfig {
        self.cfg
    }
}

impl Default for DeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The differential evolution optimizer. Stateless across runs.
#[derive(Debug, Clone, Default)]
pub struct DifferentialEvolution {
    pub config: DeConfig,
}

impl DifferentialEvolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DeConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Trials,
    Followup,
}

enum FollowupKind {
    /// Temporal-locality probe: replaces the slot only on improvement.
    Probe,
    /// Reinitialized individual: replaces the slot unconditionally.
    Reinit,
}

struct Followup {
    idx: usize,
    x: Array1<f64>,
    kind: FollowupKind,
}

/// Per-run DE state driving the ask/tell loop.
pub struct DeState {
    bounds: Bounds,
    cfg: DeConfig,
    n: usize,
    popsize: usize,
    age_max: u32,
    pop: Vec<Array1<f64>>,
    fitness: Vec<f64>,
    ages: Vec<u32>,
    generation: usize,
    phase: Phase,
    trials: Vec<Array1<f64>>,
    followups: Vec<Followup>,
    hist: Vec<f64>,
    hist_cap: usize,
    target: Option<f64>,
    status: Status,
    rng: StdRng,
}

impl DeState {
    pub fn new(bounds: Bounds, cfg: &DeConfig, opts: &RunOptions) -> Result<Self, Error> {
        let n = bounds.dim();
        if cfg.popsize == Some(0) {
            return Err(Error::ZeroPopsize);
        }
        let popsize = cfg.popsize.unwrap_or((5 * n).max(40)).max(5);
        let age_max = cfg.age_max.unwrap_or(popsize as u32).max(1);
        let hist_cap = cfg.history.unwrap_or(10 + (30 * n).div_ceil(popsize));

        let mut rng = StdRng::seed_from_u64(opts.seed);
        let mut pop = match cfg.init {
            DeInit::LatinHypercube => latin_hypercube(&bounds, popsize, &mut rng),
            DeInit::Random => (0..popsize)
                .map(|_| crate::sampling::uniform_in(&bounds, &mut rng))
                .collect(),
        };
        if let Some(x0) = &opts.x0 {
            let mut seeded = x0.clone();
            bounds.reflect_into(&mut seeded);
            pop[0] = seeded;
        }

        Ok(Self {
            bounds,
            cfg: cfg.clone(),
            n,
            popsize,
            age_max,
            pop,
            fitness: vec![f64::INFINITY; popsize],
            ages: vec![0; popsize],
            generation: 0,
            phase: Phase::Init,
            trials: Vec::new(),
            followups: Vec::new(),
            hist: Vec::new(),
            hist_cap,
            target: opts.target,
            status: Status::Continue,
            rng,
        })
    }

    pub fn popsize(&self) -> usize {
        self.popsize
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn best(&self) -> (&Array1<f64>, f64) {
        let mut best = 0;
        for i in 1..self.popsize {
            if self.fitness[i] < self.fitness[best] {
                best = i;
            }
        }
        (&self.pop[best], self.fitness[best])
    }

    /// Per-coordinate standard deviation of the current population.
    pub fn dispersion(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.n, |j| {
            let mean = self.pop.iter().map(|x| x[j]).sum::<f64>() / self.popsize as f64;
            let var = self
                .pop
                .iter()
                .map(|x| (x[j] - mean) * (x[j] - mean))
                .sum::<f64>()
                / self.popsize as f64;
            var.sqrt()
        })
    }

    /// Next batch of points needing evaluation.
    pub fn ask(&mut self) -> Vec<Array1<f64>> {
        match self.phase {
            Phase::Init => self.pop.clone(),
            Phase::Trials => {
                self.build_trials();
                self.trials.clone()
            }
            Phase::Followup => self.followups.iter().map(|f| f.x.clone()).collect(),
        }
    }

    /// Consume objective values for the batch returned by the last `ask`.
    pub fn tell(&mut self, values: &[f64]) -> Status {
        match self.phase {
            Phase::Init => {
                assert_eq!(values.len(), self.popsize);
                self.fitness.copy_from_slice(values);
                if values.iter().all(|v| !v.is_finite()) {
                    self.status = Status::StopFitnessInvalid;
                    return self.status;
                }
                self.phase = Phase::Trials;
                self.status = Status::Continue;
                self.status
            }
            Phase::Trials => self.tell_trials(values),
            Phase::Followup => self.tell_followups(values),
        }
    }

    fn build_trials(&mut self) {
        let p_top = (0.3 * self.popsize as f64).ceil() as usize;
        let mut order: Vec<usize> = (0..self.popsize).collect();
        order.sort_by(|&a, &b| {
            self.fitness[a]
                .partial_cmp(&self.fitness[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        self.trials.clear();
        for i in 0..self.popsize {
            let f = 0.5 + 0.5 * self.rng.random::<f64>();
            let cr = 0.1 + 0.8 * self.rng.random::<f64>();
            let pbest = order[self.rng.random_range(0..p_top.max(1))];
            let (r1, r2) = self.two_distinct(i);

            let xi = &self.pop[i];
            let mutant = xi
                + &((&self.pop[pbest] - xi) * f)
                + &((&self.pop[r1] - &self.pop[r2]) * f);

            // Binomial crossover with one forced mutant coordinate.
            let jrand = self.rng.random_range(0..self.n);
            let mut trial = xi.clone();
            for j in 0..self.n {
                if j == jrand || self.rng.random::<f64>() < cr {
                    trial[j] = mutant[j];
                }
            }
            resample_outside(&mut trial, &self.bounds, &mut self.rng);
            self.trials.push(trial);
        }
    }

    fn tell_trials(&mut self, values: &[f64]) -> Status {
        assert_eq!(values.len(), self.popsize);
        if values.iter().all(|v| !v.is_finite()) {
            self.status = Status::StopFitnessInvalid;
            return self.status;
        }

        self.followups.clear();
        for i in 0..self.popsize {
            let ft = values[i];
            if ft < self.fitness[i] {
                // Temporal locality: probe further along the improvement
                // direction before the parent is forgotten.
                let alpha = 1.0 + 0.5 * self.rng.random::<f64>();
                let mut probe = &self.pop[i] + &((&self.trials[i] - &self.pop[i]) * alpha);
                resample_outside(&mut probe, &self.bounds, &mut self.rng);
                self.followups.push(Followup {
                    idx: i,
                    x: probe,
                    kind: FollowupKind::Probe,
                });
                self.pop[i] = self.trials[i].clone();
                self.fitness[i] = ft;
                self.ages[i] = 0;
            } else {
                if ft == self.fitness[i] {
                    // Equal fitness: adopt the trial for diversity, no probe.
                    self.pop[i] = self.trials[i].clone();
                }
                self.ages[i] = self.ages[i].saturating_add(1);
                let p = self.ages[i] as f64 / self.age_max as f64;
                if self.rng.random::<f64>() < p {
                    let fresh = crate::sampling::uniform_in(&self.bounds, &mut self.rng);
                    self.followups.push(Followup {
                        idx: i,
                        x: fresh,
                        kind: FollowupKind::Reinit,
                    });
                }
            }
        }

        if self.followups.is_empty() {
            self.finish_generation()
        } else {
            self.phase = Phase::Followup;
            self.status = Status::Continue;
            self.status
        }
    }

    fn tell_followups(&mut self, values: &[f64]) -> Status {
        assert_eq!(values.len(), self.followups.len());
        let followups = std::mem::take(&mut self.followups);
        for (follow, &fv) in followups.iter().zip(values.iter()) {
            match follow.kind {
                FollowupKind::Probe => {
                    if fv < self.fitness[follow.idx] {
                        self.pop[follow.idx] = follow.x.clone();
                        self.fitness[follow.idx] = fv;
                    }
                }
                FollowupKind::Reinit => {
                    self.pop[follow.idx] = follow.x.clone();
                    self.fitness[follow.idx] = fv;
                    self.ages[follow.idx] = 0;
                }
            }
        }
        self.phase = Phase::Trials;
        self.finish_generation()
    }

    fn finish_generation(&mut self) -> Status {
        self.generation += 1;
        let best = self
            .fitness
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        self.hist.push(best);
        if self.hist.len() > self.hist_cap {
            self.hist.remove(0);
        }

        self.status = self.check_stop(best);
        self.status
    }

    fn check_stop(&self, best: f64) -> Status {
        if let Some(target) = self.target {
            if best <= target {
                return Status::StopFitness;
            }
        }
        if self.hist.len() >= self.hist_cap {
            let mean = self.hist.iter().sum::<f64>() / self.hist.len() as f64;
            let var = self
                .hist
                .iter()
                .map(|v| (v - mean) * (v - mean))
                .sum::<f64>()
                / self.hist.len() as f64;
            if var.sqrt() < self.cfg.tolfun {
                return Status::StopTolFun;
            }
        }
        if self.dispersion().iter().all(|&s| s < self.cfg.tolx) {
            return Status::StopTolX;
        }
        if self.generation >= self.cfg.max_iter {
            return Status::StopMaxIter;
        }
        Status::Continue
    }

    fn two_distinct(&mut self, exclude: usize) -> (usize, usize) {
        let mut r1 = self.rng.random_range(0..self.popsize);
        while r1 == exclude {
            r1 = self.rng.random_range(0..self.popsize);
        }
        let mut r2 = self.rng.random_range(0..self.popsize);
        while r2 == exclude || r2 == r1 {
            r2 = self.rng.random_range(0..self.popsize);
        }
        (r1, r2)
    }
}

/// Stratified Latin hypercube sample of the box.
fn latin_hypercube(bounds: &Bounds, count: usize, rng: &mut StdRng) -> Vec<Array1<f64>> {
    let n = bounds.dim();
    let lower = bounds.lower();
    let upper = bounds.upper();
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(n);
    for _ in 0..n {
        let mut vals: Vec<f64> = (0..count)
            .map(|k| ((k as f64) + rng.random::<f64>()) / count as f64)
            .collect();
        vals.shuffle(rng);
        columns.push(vals);
    }
    (0..count)
        .map(|i| {
            Array1::from_shape_fn(n, |j| lower[j] + columns[j][i] * (upper[j] - lower[j]))
        })
        .collect()
}

impl Optimizer for DifferentialEvolution {
    fn name(&self) -> &str {
        "de"
    }

    fn minimize(&self, problem: &Problem, opts: &RunOptions) -> Result<Report, Error> {
        if opts.max_evals == 0 {
            return Ok(seed_report(problem, opts));
        }
        let mut state = DeState::new(problem.bounds().clone(), &self.config, opts)?;
        let pool = build_pool(opts.workers);

        let mut best_x = state.pop[0].clone();
        let mut best_f = f64::INFINITY;
        let mut nfev: u64 = 0;
        let mut status;

        loop {
            if problem.should_stop() {
                status = Status::Stopped;
                break;
            }
            let points = state.ask();
            let values = evaluate_all(problem, &points, pool.as_ref());
            nfev += values.len() as u64;
            for (x, &f) in points.iter().zip(values.iter()) {
                if f < best_f {
                    best_f = f;
                    best_x = x.clone();
                }
            }
            status = state.tell(&values);
            if status.is_terminal() {
                break;
            }
            if nfev >= opts.max_evals {
                status = Status::StopMaxIter;
                break;
            }
        }

        Ok(Report {
            x: best_x,
            fun: best_f,
            status,
            nit: state.generation(),
            nfev,
            sigma: Some(state.dispersion()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use ridgeline_testfunctions::{rastrigin, sphere};

    fn box_problem(n: usize, half: f64) -> Problem {
        let bounds =
            Bounds::new(Array1::from_elem(n, -half), Array1::from_elem(n, half)).unwrap();
        Problem::new(sphere, bounds)
    }

    #[test]
    fn test_population_invariants() {
        let problem = box_problem(3, 5.0);
        let opts = RunOptions::new(5_000, 21);
        let mut state =
            DeState::new(problem.bounds().clone(), &DeConfig::default(), &opts).unwrap();
        let popsize = state.popsize();
        for _ in 0..30 {
            let points = state.ask();
            let values: Vec<f64> = points.iter().map(|x| problem.eval(x)).collect();
            if state.tell(&values).is_terminal() {
                break;
            }
            assert_eq!(state.pop.len(), popsize);
            for x in &state.pop {
                assert!(problem.bounds().contains(x), "member left the box");
            }
        }
    }

    #[test]
    fn test_sphere_converges() {
        let problem = box_problem(6, 5.0);
        let opts = RunOptions::new(40_000, 8).target(1e-8);
        let report = DifferentialEvolution::new().minimize(&problem, &opts).unwrap();
        assert!(report.fun < 1e-6, "fun = {}", report.fun);
        assert!(problem.bounds().contains(&report.x));
    }

    #[test]
    fn test_rastrigin_low_dimension() {
        let bounds =
            Bounds::new(Array1::from_elem(2, -5.12), Array1::from_elem(2, 5.12)).unwrap();
        let problem = Problem::new(rastrigin, bounds);
        let opts = RunOptions::new(30_000, 40).target(1e-6);
        let report = DifferentialEvolution::new().minimize(&problem, &opts).unwrap();
        assert!(report.fun < 1e-2, "fun = {}", report.fun);
    }

    #[test]
    fn test_deterministic_with_fixed_seed() {
        let run = || {
            let problem = box_problem(4, 5.0);
            let opts = RunOptions::new(4_000, 77);
            DifferentialEvolution::new().minimize(&problem, &opts).unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.fun, b.fun);
        assert_eq!(a.nfev, b.nfev);
    }

    #[test]
    fn test_x0_joins_population() {
        let problem = box_problem(3, 5.0);
        let x0 = Array1::from_vec(vec![0.5, -0.5, 0.25]);
        let opts = RunOptions::new(1_000, 3).x0(x0.clone());
        let state = DeState::new(problem.bounds().clone(), &DeConfig::default(), &opts).unwrap();
        for (a, b) in state.pop[0].iter().zip(x0.iter()) {
            assert_eq!(a, b);
        }
    }
}
