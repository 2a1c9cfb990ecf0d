//! Benchmark objective functions for optimizer testing
//!
//! A small collection of the classic bound-constrained test functions used to
//! exercise the ridgeline optimizers:
//!
//! - **Unimodal**: single global optimum (sphere, rosenbrock, zakharov, ...)
//! - **Multimodal**: many local minima (ackley, rastrigin, griewank, ...)
//!
//! All functions take an `&Array1<f64>` of arbitrary dimension unless noted
//! otherwise and return the objective value to minimize.
//!
//! # Example
//!
//! ```rust
//! use ndarray::Array1;
//! use ridgeline_testfunctions::*;
//!
//! let x = Array1::from_vec(vec![0.0, 0.0]);
//! assert_eq!(sphere(&x), 0.0);
//!
//! let (f, bounds) = lookup("rastrigin").unwrap();
//! assert_eq!(bounds, (-5.12, 5.12));
//! assert!(f(&x) < 1e-12);
//! ```

use ndarray::Array1;

pub mod functions;
pub use functions::*;

/// Build a per-coordinate bounds list with identical `(lower, upper)` in
/// every dimension.
pub fn create_bounds(n: usize, lower: f64, upper: f64) -> Vec<(f64, f64)> {
    vec![(lower, upper); n]
}

/// Look up a test function and its conventional symmetric bounds by name.
///
/// Returns `None` for unknown names. The bounds are the single-coordinate
/// interval; combine with [`create_bounds`] for an n-dimensional box.
pub fn lookup(name: &str) -> Option<(fn(&Array1<f64>) -> f64, (f64, f64))> {
    let entry: (fn(&Array1<f64>) -> f64, (f64, f64)) = match name.to_lowercase().as_str() {
        "sphere" => (sphere, (-5.0, 5.0)),
        "quadratic" => (quadratic, (-5.0, 5.0)),
        "rosenbrock" => (rosenbrock, (-5.0, 10.0)),
        "zakharov" => (zakharov, (-5.0, 10.0)),
        "ackley" => (ackley, (-32.0, 32.0)),
        "rastrigin" => (rastrigin, (-5.12, 5.12)),
        "griewank" => (griewank, (-600.0, 600.0)),
        "levy" => (levy, (-10.0, 10.0)),
        "schwefel" => (schwefel, (-500.0, 500.0)),
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_minima() {
        let zero2 = Array1::from_vec(vec![0.0, 0.0]);
        assert_eq!(sphere(&zero2), 0.0);
        assert!(rastrigin(&zero2).abs() < 1e-12);
        assert!(ackley(&zero2).abs() < 1e-12);
        assert!(griewank(&zero2).abs() < 1e-12);

        let ones5 = Array1::from_elem(5, 1.0);
        assert!(rosenbrock(&ones5).abs() < 1e-12);
        assert!(levy(&ones5).abs() < 1e-12);
    }

    #[test]
    fn test_lookup() {
        assert!(lookup("sphere").is_some());
        assert!(lookup("RASTRIGIN").is_some());
        assert!(lookup("no_such_function").is_none());

        let (f, (lo, hi)) = lookup("ackley").unwrap();
        assert_eq!((lo, hi), (-32.0, 32.0));
        assert!(f(&Array1::zeros(3)).abs() < 1e-12);
    }

    #[test]
    fn test_create_bounds() {
        let b = create_bounds(4, -2.0, 3.0);
        assert_eq!(b.len(), 4);
        assert!(b.iter().all(|&(lo, hi)| lo == -2.0 && hi == 3.0));
    }
}
