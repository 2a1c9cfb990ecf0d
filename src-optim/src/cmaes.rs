//! CMA-ES optimizer with an ask/tell surface
//!
//! Rank-mu + rank-one covariance matrix adaptation evolution strategy.
//! Sampling reads `x = mean + sigma * B * D * z`; out-of-box points are
//! repaired by reflection on `x` while the underlying Gaussian draw `z` is
//! kept for the path updates, so repair only acts through fitness.
//!
//! The eigendecomposition cache `(B, D)` is refreshed every `max(1, n/10)`
//! generations to bound cost; see [`crate::eigen`].

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::eigen::sym_eigen;
use crate::problem::{build_pool, evaluate_all, Bounds, Problem};
use crate::sampling::{standard_normal, uniform_in};
use crate::{seed_report, Error, Optimizer, Report, RunOptions, Status};

/// Tuning knobs for CMA-ES. The defaults follow the standard strategy
/// parameter choices; population size defaults to `max(5, 4 + 3 ln n)`.
#[derive(Debug, Clone)]
pub struct CmaConfig {
    pub popsize: Option<usize>,
    pub max_iter: usize,
    pub tolx: f64,
    pub tolfun: f64,
    pub max_condition: f64,
    /// Override for the stagnation window; default `10 + ceil(30 n / lambda)`.
    pub history: Option<usize>,
}

impl Default for CmaConfig {
    fn default() -> Self {
        Self {
            popsize: None,
            max_iter: usize::MAX,
            tolx: 1e-12,
            tolfun: 1e-12,
            max_condition: 1e14,
            history: None,
        }
    }
}

/// Fluent builder for `CmaConfig`.
pub struct CmaConfigBuilder {
    cfg: CmaConfig,
}

impl CmaConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: CmaConfig::default(),
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
    pub fn max_condition(mut self, v: f64) -> Self {
        self.cfg.max_condition = v;
        self
    }
    pub fn history(mut self, v: usize) -> Self {
        self.cfg.history = Some(v);
        self
    }
    pub fn build(self) -> CmaConfig {
        self.cfg
    }
}

impl Default for CmaConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The CMA-ES optimizer. Stateless across runs; all run state lives in
/// [`CmaState`].
#[derive(Debug, Clone, Default)]
pub struct CmaEs {
    pub config: CmaConfig,
}

impl CmaEs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CmaConfig) -> Self {
        Self { config }
    }
}

/// Per-run CMA-ES state driving the ask/tell loop.
pub struct CmaState {
    bounds: Bounds,
    cfg: CmaConfig,
    n: usize,
    lambda: usize,
    mu: usize,
    weights: Array1<f64>,
    mueff: f64,
    cc: f64,
    cs: f64,
    c1: f64,
    cmu: f64,
    damps: f64,
    chi_n: f64,
    mean: Array1<f64>,
    sigma: f64,
    last_valid_sigma: f64,
    c: Array2<f64>,
    b: Array2<f64>,
    d: Array1<f64>,
    ps: Array1<f64>,
    pc: Array1<f64>,
    generation: usize,
    eigen_generation: usize,
    eigen_gap: usize,
    last_reset: Option<usize>,
    pending: Vec<(Array1<f64>, Array1<f64>)>,
    hist: Vec<f64>,
    hist_cap: usize,
    target: Option<f64>,
    status: Status,
    rng: StdRng,
}

impl CmaState {
    pub fn new(bounds: Bounds, cfg: &CmaConfig, opts: &RunOptions) -> Result<Self, Error> {
        let n = bounds.dim();
        if cfg.popsize == Some(0) {
            return Err(Error::ZeroPopsize);
        }
        let default_lambda = 4 + (3.0 * (n as f64).ln()).floor() as usize;
        let lambda = cfg.popsize.unwrap_or(default_lambda).max(5);
        let mu = lambda / 2;

        let mut weights = Array1::from_shape_fn(mu, |i| {
            ((mu as f64) + 1.0).ln() - ((i as f64) + 1.0).ln()
        });
        let wsum = weights.sum();
        weights.mapv_inplace(|w| w / wsum);
        let mueff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let nf = n as f64;
        let cc = (4.0 + mueff / nf) / (nf + 4.0 + 2.0 * mueff / nf);
        let cs = (mueff + 2.0) / (nf + mueff + 5.0);
        let c1 = 2.0 / ((nf + 1.3).powi(2) + mueff);
        let cmu = (1.0 - c1).min(2.0 * (mueff - 2.0 + 1.0 / mueff) / ((nf + 2.0).powi(2) + mueff));
        let damps = 1.0 + 2.0 * (0.0f64).max(((mueff - 1.0) / (nf + 1.0)).sqrt() - 1.0) + cs;
        let chi_n = nf.sqrt() * (1.0 - 1.0 / (4.0 * nf) + 1.0 / (21.0 * nf * nf));

        let mut rng = StdRng::seed_from_u64(opts.seed);
        let mut mean = opts.x0.clone().unwrap_or_else(|| uniform_in(&bounds, &mut rng));
        bounds.reflect_into(&mut mean);

        let sigma0 = match &opts.sigma0 {
            Some(s) if s.len() == n => s.clone(),
            Some(s) => {
                return Err(Error::InvalidConfig(format!(
                    "sigma0 has {} entries for a {}-dimensional problem",
                    s.len(),
                    n
                )));
            }
            None => bounds.scale() * 0.3,
        };
        let sigma = (sigma0.sum() / nf).max(f64::MIN_POSITIVE);
        let scales = sigma0.mapv(|s| (s / sigma).max(1e-12));
        let c = Array2::from_diag(&scales.mapv(|s| s * s));

        let hist_cap = cfg.history.unwrap_or(10 + (30 * n).div_ceil(lambda));

        Ok(Self {
            bounds,
            cfg: cfg.clone(),
            n,
            lambda,
            mu,
            weights,
            mueff,
            cc,
            cs,
            c1,
            cmu,
            damps,
            chi_n,
            mean,
            sigma,
            last_valid_sigma: sigma,
            c,
            b: Array2::eye(n),
            d: scales,
            ps: Array1::zeros(n),
            pc: Array1::zeros(n),
            generation: 0,
            eigen_generation: 0,
            eigen_gap: (n / 10).max(1),
            last_reset: None,
            pending: Vec::with_capacity(lambda),
            hist: Vec::new(),
            hist_cap,
            target: opts.target,
            status: Status::Continue,
            rng,
        })
    }

    pub fn popsize(&self) -> usize {
        self.lambda
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Per-coordinate standard deviation of the current search distribution.
    pub fn stddev(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.n, |i| self.sigma * self.c[(i, i)].max(0.0).sqrt())
    }

    /// Sample `lambda` feasible points. The Gaussian draws behind each point
    /// are cached for the next [`tell`](Self::tell).
    pub fn ask(&mut self) -> Vec<Array1<f64>> {
        if self.generation.saturating_sub(self.eigen_generation) >= self.eigen_gap {
            self.refresh_eigen();
        }
        self.pending.clear();
        let mut points = Vec::with_capacity(self.lambda);
        for _ in 0..self.lambda {
            let z = standard_normal(self.n, &mut self.rng);
            let y = self.b.dot(&(&self.d * &z));
            let mut x = &self.mean + &(y * self.sigma);
            self.bounds.reflect_into(&mut x);
            self.pending.push((z, x.clone()));
            points.push(x);
        }
        points
    }

    /// Consume the objective values for the last asked population, update the
    /// distribution and report the run status.
    pub fn tell(&mut self, values: &[f64]) -> Status {
        assert_eq!(
            values.len(),
            self.pending.len(),
            "tell must receive one value per asked point"
        );
        self.generation += 1;

        if values.iter().all(|v| !v.is_finite()) {
            self.status = Status::StopFitnessInvalid;
            return self.status;
        }

        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| {
            values[a]
                .partial_cmp(&values[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let best_gen = values[order[0]];

        // Recombination over the mu best, both in x (mean) and z (paths).
        let mut mean_new = Array1::<f64>::zeros(self.n);
        let mut zw = Array1::<f64>::zeros(self.n);
        for (i, &idx) in order.iter().take(self.mu).enumerate() {
            let (z, x) = &self.pending[idx];
            mean_new = mean_new + x * self.weights[i];
            zw = zw + z * self.weights[i];
        }

        let cs_scale = (self.cs * (2.0 - self.cs) * self.mueff).sqrt();
        let bz = self.b.dot(&zw);
        self.ps = &self.ps * (1.0 - self.cs) + &(bz * cs_scale);

        let ps_norm = self.ps.iter().map(|v| v * v).sum::<f64>().sqrt();
        let denom = (1.0 - (1.0 - self.cs).powi(2 * self.generation as i32)).sqrt();
        let hsig = ps_norm / denom.max(f64::MIN_POSITIVE) / self.chi_n
            < 1.4 + 2.0 / (self.n as f64 + 1.0);
        let hsig_f = if hsig { 1.0 } else { 0.0 };

        let yw = self.b.dot(&(&self.d * &zw));
        let cc_scale = (self.cc * (2.0 - self.cc) * self.mueff).sqrt();
        self.pc = &self.pc * (1.0 - self.cc) + &(yw * (hsig_f * cc_scale));

        // Covariance: decay, rank-one (with stall correction), rank-mu.
        let old_c = self.c.clone();
        let decay = 1.0 - self.c1 - self.cmu;
        let stall = (1.0 - hsig_f) * self.cc * (2.0 - self.cc);
        for i in 0..self.n {
            for j in 0..self.n {
                self.c[(i, j)] = decay * old_c[(i, j)]
                    + self.c1 * (self.pc[i] * self.pc[j] + stall * old_c[(i, j)]);
            }
        }
        for (w_idx, &idx) in order.iter().take(self.mu).enumerate() {
            let (z, _) = &self.pending[idx];
            let y = self.b.dot(&(&self.d * z));
            let w = self.cmu * self.weights[w_idx];
            for i in 0..self.n {
                for j in 0..self.n {
                    self.c[(i, j)] += w * y[i] * y[j];
                }
            }
        }
        // Keep C symmetric against floating-point drift.
        for i in 0..self.n {
            for j in (i + 1)..self.n {
                let avg = 0.5 * (self.c[(i, j)] + self.c[(j, i)]);
                self.c[(i, j)] = avg;
                self.c[(j, i)] = avg;
            }
        }

        let arg = (self.cs / self.damps) * (ps_norm / self.chi_n - 1.0);
        self.sigma *= arg.min(1.0).exp();
        self.mean = mean_new;

        if self.sigma.is_finite() && self.sigma > 0.0 {
            self.last_valid_sigma = self.sigma;
        } else {
            self.recover_from_degeneracy();
            if self.status.is_terminal() {
                return self.status;
            }
        }

        self.hist.push(best_gen);
        if self.hist.len() > self.hist_cap {
            self.hist.remove(0);
        }

        self.status = self.check_stop(best_gen);
        self.status
    }

    fn check_stop(&self, best_gen: f64) -> Status {
        if let Some(target) = self.target {
            if best_gen <= target {
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
        if (0..self.n).all(|i| self.sigma * self.c[(i, i)].max(0.0).sqrt() < self.cfg.tolx) {
            return Status::StopTolX;
        }
        let dmax = self.d.iter().cloned().fold(f64::MIN, f64::max);
        let dmin = self.d.iter().cloned().fold(f64::MAX, f64::min);
        if dmin <= 0.0 || (dmax / dmin).powi(2) > self.cfg.max_condition {
            return Status::StopCondition;
        }
        if self.generation >= self.cfg.max_iter {
            return Status::StopMaxIter;
        }
        Status::Continue
    }

    fn refresh_eigen(&mut self) {
        match sym_eigen(&self.c) {
            Some((b, eig)) if eig.iter().all(|&v| v.is_finite() && v > 0.0) => {
                self.b = b;
                self.d = eig.mapv(f64::sqrt);
                self.eigen_generation = self.generation;
            }
            _ => self.recover_from_degeneracy(),
        }
    }

    /// Reset the search distribution to an isotropic Gaussian at the last
    /// valid step size. A second degeneracy within 5 generations terminates
    /// the run.
    fn recover_from_degeneracy(&mut self) {
        if let Some(last) = self.last_reset {
            if self.generation.saturating_sub(last) < 5 {
                self.status = Status::StopCondition;
                return;
            }
        }
        log::debug!(
            "cma-es: covariance degenerate at generation {}, resetting",
            self.generation
        );
        self.c = Array2::eye(self.n);
        self.b = Array2::eye(self.n);
        self.d = Array1::ones(self.n);
        self.ps.fill(0.0);
        self.pc.fill(0.0);
        self.sigma = self.last_valid_sigma;
        self.eigen_generation = self.generation;
        self.last_reset = Some(self.generation);
    }
}

impl Optimizer for CmaEs {
    fn name(&self) -> &str {
        "cmaes"
    }

    fn minimize(&self, problem: &Problem, opts: &RunOptions) -> Result<Report, Error> {
        if opts.max_evals == 0 {
            return Ok(seed_report(problem, opts));
        }
        let mut state = CmaState::new(problem.bounds().clone(), &self.config, opts)?;
        let pool = build_pool(opts.workers);

        let mut best_x = state.mean().clone();
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
            sigma: Some(state.stddev()),
        })
    }
}
