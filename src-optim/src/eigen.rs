//! Symmetric eigendecomposition for the covariance adaptation.
//!
//! A cyclic Jacobi sweep is plenty for the matrix sizes CMA-ES works with
//! (tens of coordinates) and keeps the crate free of LAPACK bindings.

use ndarray::{Array1, Array2};

const MAX_SWEEPS: usize = 64;

/// Eigendecomposition of a symmetric matrix: returns `(B, d)` with the
/// eigenvectors as the columns of `B` and the eigenvalues in `d`, so that
/// `A = B * diag(d) * B^T`. Returns `None` when the input contains
/// non-finite entries or the sweeps fail to converge; callers treat that as
/// numerical degeneracy and recover.
pub fn sym_eigen(a: &Array2<f64>) -> Option<(Array2<f64>, Array1<f64>)> {
    let n = a.nrows();
    if n != a.ncols() || a.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mut m = a.clone();
    let mut v: Array2<f64> = Array2::eye(n);

    for _ in 0..MAX_SWEEPS {
        if off_diagonal_norm(&m) <= 1e-14 * diagonal_norm(&m).max(f64::MIN_POSITIVE) {
            return Some((v, m.diag().to_owned()));
        }
        for p in 0..n - 1 {
            for q in p + 1..n {
                let apq = m[(p, q)];
                if apq.abs() <= 1e-300 {
                    continue;
                }
                let theta = (m[(q, q)] - m[(p, p)]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                rotate(&mut m, &mut v, p, q, c, s);
            }
        }
        if m.iter().any(|x| !x.is_finite()) {
            return None;
        }
    }

    if off_diagonal_norm(&m) <= 1e-10 * diagonal_norm(&m).max(f64::MIN_POSITIVE) {
        Some((v, m.diag().to_owned()))
    } else {
        None
    }
}

fn off_diagonal_norm(m: &Array2<f64>) -> f64 {
    let n = m.nrows();
    let mut total = 0.0;
    for i in 0..n {
        for j in i + 1..n {
            total += m[(i, j)] * m[(i, j)];
        }
    }
    total.sqrt()
}

fn diagonal_norm(m: &Array2<f64>) -> f64 {
    m.diag().iter().map(|d| d * d).sum::<f64>().sqrt()
}

/// Two-sided Jacobi rotation in the `(p, q)` plane plus the accumulated
/// eigenvector update.
fn rotate(m: &mut Array2<f64>, v: &mut Array2<f64>, p: usize, q: usize, c: f64, s: f64) {
    let n = m.nrows();
    for k in 0..n {
        let mkp = m[(k, p)];
        let mkq = m[(k, q)];
        m[(k, p)] = c * mkp - s * mkq;
        m[(k, q)] = s * mkp + c * mkq;
    }
    for k in 0..n {
        let mpk = m[(p, k)];
        let mqk = m[(q, k)];
        m[(p, k)] = c * mpk - s * mqk;
        m[(q, k)] = s * mpk + c * mqk;
    }
    for k in 0..n {
        let vkp = v[(k, p)];
        let vkq = v[(k, q)];
        v[(k, p)] = c * vkp - s * vkq;
        v[(k, q)] = s * vkp + c * vkq;
    }
}
