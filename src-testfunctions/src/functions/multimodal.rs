//! Multimodal test functions
//!
//! These functions have multiple local minima and are used to test the global
//! search capabilities of the retry engines.

use ndarray::Array1;
use std::f64::consts::PI;

/// Rastrigin function - highly multimodal with a regular grid of minima
/// Global minimum: f(x) = 0 at x = (0, 0, ..., 0)
/// Bounds: x_i in [-5.12, 5.12]
pub fn rastrigin(x: &Array1<f64>) -> f64 {
    let n = x.len() as f64;
    10.0 * n
        + x.iter()
            .map(|&xi| xi * xi - 10.0 * (2.0 * PI * xi).cos())
            .sum::<f64>()
}

/// Ackley function - nearly flat outer region, deep hole at the origin
/// Global minimum: f(x) = 0 at x = (0, 0, ..., 0)
/// Bounds: x_i in [-32, 32]
pub fn ackley(x: &Array1<f64>) -> f64 {
    let n = x.len() as f64;
    let sum_sq: f64 = x.iter().map(|&xi| xi * xi).sum();
    let sum_cos: f64 = x.iter().map(|&xi| (2.0 * PI * xi).cos()).sum();
    -20.0 * (-0.2 * (sum_sq / n).sqrt()).exp() - (sum_cos / n).exp() + 20.0 + std::f64::consts::E
}

/// Griewank function - many widespread regularly distributed minima
/// Global minimum: f(x) = 0 at x = (0, 0, ..., 0)
/// Bounds: x_i in [-600, 600]
pub fn griewank(x: &Array1<f64>) -> f64 {
    let sum_squares: f64 = x.iter().map(|&xi| xi * xi).sum();
    let product_cos: f64 = x
        .iter()
        .enumerate()
        .map(|(i, &xi)| (xi / ((i + 1) as f64).sqrt()).cos())
        .product();
    1.0 + sum_squares / 4000.0 - product_cos
}

/// Levy function
/// Global minimum: f(x) = 0 at x = (1, 1, ..., 1)
/// Bounds: x_i in [-10, 10]
pub fn levy(x: &Array1<f64>) -> f64 {
    let n = x.len();
    let w = |xi: f64| 1.0 + (xi - 1.0) / 4.0;
    let w1 = w(x[0]);
    let wn = w(x[n - 1]);
    let mut total = (PI * w1).sin().powi(2);
    for i in 0..n - 1 {
        let wi = w(x[i]);
        total += (wi - 1.0).powi(2) * (1.0 + 10.0 * (PI * wi + 1.0).sin().powi(2));
    }
    total + (wn - 1.0).powi(2) * (1.0 + (2.0 * PI * wn).sin().powi(2))
}

/// Schwefel function - best minimum far from the second best
/// Global minimum: f(x) = 0 at x = (420.9687, ..., 420.9687)
/// Bounds: x_i in [-500, 500]
pub fn schwefel(x: &Array1<f64>) -> f64 {
    let n = x.len() as f64;
    418.9829 * n
        - x.iter()
            .map(|&xi| xi * xi.abs().sqrt().sin())
            .sum::<f64>()
}
