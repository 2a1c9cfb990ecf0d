//! Harris hawks optimizer
//!
//! Population-based surprise-pounce search: the flock circles the current
//! best ("rabbit"), switching between exploration perches and four besiege
//! strategies as the rabbit's escape energy decays, with Levy-flight rapid
//! dives in the late phase. Useful in retry mixes for objectives where
//! covariance adaptation stalls.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::problem::Problem;
use crate::sampling::{standard_normal, uniform_in};
use crate::{seed_report, Error, Optimizer, Report, RunOptions, Status};

/// Levy-flight scale for beta = 1.5, precomputed from the gamma-function
/// expression `(G(1+b) sin(pi b/2) / (G((1+b)/2) b 2^((b-1)/2)))^(1/b)`.
const LEVY_SIGMA: f64 = 0.696_565_7;
const LEVY_BETA: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct HawksConfig {
    /// Flock size; default 30.
    pub popsize: Option<usize>,
}

impl Default for HawksConfig {
    fn default() -> Self {
        Self { popsize: None }
    }
}

/// Harris hawks behind the shared optimizer contract. `sigma0` carries no
/// meaning for this algorithm and is ignored.
#[derive(Debug, Clone, Default)]
pub struct HarrisHawks {
    pub config: HawksConfig,
}

impl HarrisHawks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HawksConfig) -> Self {
        Self { config }
    }
}

fn levy_step(n: usize, rng: &mut StdRng) -> Array1<f64> {
    let u = standard_normal(n, rng);
    let v = standard_normal(n, rng);
    Array1::from_shape_fn(n, |i| {
        0.01 * u[i] * LEVY_SIGMA / v[i].abs().powf(1.0 / LEVY_BETA).max(1e-12)
    })
}

impl Optimizer for HarrisHawks {
    fn name(&self) -> &str {
        "harris_hawks"
    }

    fn minimize(&self, problem: &Problem, opts: &RunOptions) -> Result<Report, Error> {
        if opts.max_evals == 0 {
            return Ok(seed_report(problem, opts));
        }
        if self.config.popsize == Some(0) {
            return Err(Error::ZeroPopsize);
        }
        let bounds = problem.bounds();
        let n = bounds.dim();
        let popsize = self.config.popsize.unwrap_or(30).max(5);
        let mut rng = StdRng::seed_from_u64(opts.seed);

        let mut flock: Vec<Array1<f64>> = (0..popsize)
            .map(|_| uniform_in(bounds, &mut rng))
            .collect();
        if let Some(x0) = &opts.x0 {
            let mut seeded = x0.clone();
            bounds.reflect_into(&mut seeded);
            flock[0] = seeded;
        }
        let mut fitness: Vec<f64> = flock.iter().map(|x| problem.eval(x)).collect();
        let mut nfev = popsize as u64;

        let mut rabbit = 0;
        for i in 1..popsize {
            if fitness[i] < fitness[rabbit] {
                rabbit = i;
            }
        }
        let mut best_x = flock[rabbit].clone();
        let mut best_f = fitness[rabbit];

        let max_iter = (opts.max_evals / popsize as u64).max(1);
        let mut status = Status::StopMaxIter;
        let mut nit = 0usize;

        'outer: for t in 0..max_iter {
            if problem.should_stop() {
                status = Status::Stopped;
                break;
            }
            nit += 1;
            let e1 = 2.0 * (1.0 - t as f64 / max_iter as f64);
            let mean_x =
                Array1::from_shape_fn(n, |j| flock.iter().map(|x| x[j]).sum::<f64>() / popsize as f64);

            for i in 0..popsize {
                if nfev >= opts.max_evals {
                    break 'outer;
                }
                let e0 = 2.0 * rng.random::<f64>() - 1.0;
                let energy = e1 * e0;
                let jump = 2.0 * (1.0 - rng.random::<f64>());

                let mut candidate = if energy.abs() >= 1.0 {
                    // Exploration: random perch.
                    if rng.random::<f64>() >= 0.5 {
                        let other = rng.random_range(0..popsize);
                        let r1 = rng.random::<f64>();
                        let r2 = rng.random::<f64>();
                        Array1::from_shape_fn(n, |j| {
                            flock[other][j]
                                - r1 * (flock[other][j] - 2.0 * r2 * flock[i][j]).abs()
                        })
                    } else {
                        let r3 = rng.random::<f64>();
                        let r4 = rng.random::<f64>();
                        let lower = bounds.lower();
                        let upper = bounds.upper();
                        Array1::from_shape_fn(n, |j| {
                            (best_x[j] - mean_x[j])
                                - r3 * (lower[j] + r4 * (upper[j] - lower[j]))
                        })
                    }
                } else if rng.random::<f64>() >= 0.5 {
                    if energy.abs() >= 0.5 {
                        // Soft besiege.
                        Array1::from_shape_fn(n, |j| {
                            (best_x[j] - flock[i][j])
                                - energy * (jump * best_x[j] - flock[i][j]).abs()
                        })
                    } else {
                        // Hard besiege.
                        Array1::from_shape_fn(n, |j| {
                            best_x[j] - energy * (best_x[j] - flock[i][j]).abs()
                        })
                    }
                } else {
                    // Rapid dives: probe a soft strike, escalate to a Levy
                    // dive when the strike does not pay off.
                    let anchor: &Array1<f64> = if energy.abs() >= 0.5 {
                        &flock[i]
                    } else {
                        &mean_x
                    };
                    let mut strike = Array1::from_shape_fn(n, |j| {
                        best_x[j] - energy * (jump * best_x[j] - anchor[j]).abs()
                    });
                    bounds.reflect_into(&mut strike);
                    let f_strike = problem.eval(&strike);
                    nfev += 1;
                    if f_strike < fitness[i] {
                        strike
                    } else {
                        let levy = levy_step(n, &mut rng);
                        Array1::from_shape_fn(n, |j| {
                            strike[j] + rng.random::<f64>() * levy[j]
                        })
                    }
                };

                bounds.reflect_into(&mut candidate);
                let fc = problem.eval(&candidate);
                nfev += 1;
                if fc < fitness[i] {
                    flock[i] = candidate;
                    fitness[i] = fc;
                    if fc < best_f {
                        best_f = fc;
                        best_x = flock[i].clone();
                    }
                }
            }

            if let Some(target) = opts.target {
                if best_f <= target {
                    status = Status::StopFitness;
                    break;
                }
            }
        }

        Ok(Report {
            x: best_x,
            fun: best_f,
            status,
            nit,
            nfev,
            sigma: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Bounds;
    use ridgeline_testfunctions::sphere;

    #[test]
    fn test_sphere_improves() {
        let bounds = Bounds::new(
            Array1::from_elem(3, -5.0),
            Array1::from_elem(3, 5.0),
        )
        .unwrap();
        let problem = Problem::new(sphere, bounds);
        let opts = RunOptions::new(15_000, 6).target(1e-6);
        let report = HarrisHawks::new().minimize(&problem, &opts).unwrap();
        assert!(report.fun < 1e-2, "fun = {}", report.fun);
        assert!(problem.bounds().contains(&report.x));
    }

    #[test]
    fn test_flock_stays_feasible() {
        let bounds = Bounds::new(
            Array1::from_elem(2, 1.0),
            Array1::from_elem(2, 2.0),
        )
        .unwrap();
        let problem = Problem::new(sphere, bounds);
        let opts = RunOptions::new(2_000, 9);
        let report = HarrisHawks::new().minimize(&problem, &opts).unwrap();
        assert!(problem.bounds().contains(&report.x));
        // Sphere over [1, 2]^2 bottoms out at the lower corner.
        assert!(report.fun >= 2.0 && report.fun < 2.2, "fun = {}", report.fun);
    }
}
