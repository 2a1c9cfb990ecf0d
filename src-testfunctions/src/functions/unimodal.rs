//! Unimodal test functions
//!
//! Single global optimum; used to check convergence speed and precision
//! rather than global exploration.

use ndarray::Array1;

/// Sphere function
/// Global minimum: f(x) = 0 at x = (0, 0, ..., 0)
/// Bounds: x_i in [-5, 5] (any box containing the origin works)
pub fn sphere(x: &Array1<f64>) -> f64 {
    x.iter().map(|&xi| xi * xi).sum()
}

/// Simple quadratic, kept as a separate name for API examples and smoke tests
/// Global minimum: f(x) = 0 at x = (0, 0, ..., 0)
pub fn quadratic(x: &Array1<f64>) -> f64 {
    x.iter().map(|&xi| xi * xi).sum()
}

/// Rosenbrock function - narrow curved valley
/// Global minimum: f(x) = 0 at x = (1, 1, ..., 1)
/// Bounds: x_i in [-5, 10]
pub fn rosenbrock(x: &Array1<f64>) -> f64 {
    let n = x.len();
    let mut total = 0.0;
    for i in 0..n.saturating_sub(1) {
        let a = x[i + 1] - x[i] * x[i];
        let b = 1.0 - x[i];
        total += 100.0 * a * a + b * b;
    }
    total
}

/// Zakharov function - unimodal with a plate-shaped region
/// Global minimum: f(x) = 0 at x = (0, 0, ..., 0)
/// Bounds: x_i in [-5, 10]
pub fn zakharov(x: &Array1<f64>) -> f64 {
    let sum_sq: f64 = x.iter().map(|&xi| xi * xi).sum();
    let weighted: f64 = x
        .iter()
        .enumerate()
        .map(|(i, &xi)| 0.5 * (i as f64 + 1.0) * xi)
        .sum();
    sum_sq + weighted.powi(2) + weighted.powi(4)
}

/// Bent cigar - badly conditioned quadratic (condition number 1e6)
/// Global minimum: f(x) = 0 at x = (0, 0, ..., 0)
/// Bounds: x_i in [-100, 100]
pub fn bent_cigar(x: &Array1<f64>) -> f64 {
    let head = x[0] * x[0];
    let tail: f64 = x.iter().skip(1).map(|&xi| xi * xi).sum();
    head + 1e6 * tail
}
