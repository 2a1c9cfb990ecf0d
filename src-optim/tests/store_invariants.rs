use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ndarray::Array1;
use ridgeline::{
    coordinated_minimize, Bounds, CmaEs, CoordinatedConfigBuilder, NullLogger, Problem,
    RetryStore, StoreConfig,
};
use ridgeline_testfunctions::create_bounds;

/// Noisy quadratic: `||x||^2` plus a small deterministic ripple, so nearby
/// runs produce near-duplicate results that exercise the dedup path.
fn noisy_norm(counter: Arc<AtomicU64>) -> impl Fn(&Array1<f64>) -> f64 + Send + Sync {
    move |x: &Array1<f64>| {
        let k = counter.fetch_add(1, Ordering::Relaxed);
        let ripple = 1e-9 * ((k % 101) as f64);
        x.iter().map(|&xi| xi * xi).sum::<f64>() + ripple
    }
}

#[test]
fn test_store_invariants_under_stress() {
    let n = 4;
    let bounds = Bounds::from_pairs(&create_bounds(n, -3.0, 3.0)).unwrap();
    let counter = Arc::new(AtomicU64::new(0));
    let problem = Problem::new(noisy_norm(counter), bounds);

    let capacity = 60;
    let cfg = CoordinatedConfigBuilder::new()
        .num_retries(300)
        .workers(4)
        .seed(99)
        .max_evals_init(300)
        .max_evals_cap(1_200)
        .capacity(capacity)
        .build();
    let report = coordinated_minimize(&problem, &CmaEs::new(), &cfg, &NullLogger).unwrap();
    assert!(report.fun.is_finite());
    assert_eq!(report.retries, 300);
    // The store statistics surfaced in the report obey the invariants.
    assert!(report.top.len() <= 20);
    for pair in report.top.windows(2) {
        assert!(pair[0] <= pair[1], "top list out of order");
    }
    assert!(report.mean >= report.fun);
}

#[test]
fn test_store_admission_invariants_direct() {
    let n = 3;
    let bounds = Bounds::from_pairs(&create_bounds(n, -2.0, 2.0)).unwrap();
    let mut store = RetryStore::new(
        &bounds,
        StoreConfig {
            capacity: 40,
            ..StoreConfig::default()
        },
    )
    .unwrap();

    // Deterministic pseudo-random stream of admissions, including duplicates
    // and non-finite junk.
    let mut state: u64 = 12345;
    let mut next = || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    for i in 0..1_000 {
        let x = Array1::from_shape_fn(n, |_| -2.0 + 4.0 * next());
        let f = if i % 97 == 0 {
            f64::NAN
        } else {
            x.iter().map(|&v| v * v).sum::<f64>()
        };
        store.admit(x, f, None);
    }

    assert!(store.len() <= 40);
    assert!(store.len() > 0);
    let entries = store.entries();
    let dedup_radius = 0.15 * (n as f64).sqrt();
    for (i, e) in entries.iter().enumerate() {
        // Every entry is finite and inside the box.
        assert!(e.f.is_finite());
        assert!(bounds.contains(&e.x), "entry {} outside the box", i);
        // Sorted ascending by f.
        if i > 0 {
            assert!(entries[i - 1].f <= e.f);
        }
        // Normalized objective lands in [0, 1].
        assert!((0.0..=1.0).contains(&e.y));
    }
    // No two survivors are both close in space and close in value.
    for i in 0..entries.len() {
        for j in i + 1..entries.len() {
            let dist = store.normalized_distance(&entries[i].x, &entries[j].x);
            let tol = 0.05 * entries[i].f.abs().max(1.0);
            let close = dist < dedup_radius && (entries[i].f - entries[j].f).abs() < tol;
            assert!(!close, "entries {} and {} violate dedup", i, j);
        }
    }
}

#[test]
fn test_checkpoint_survives_round_trip() {
    let bounds = Bounds::from_pairs(&create_bounds(2, -1.0, 1.0)).unwrap();
    let mut store = RetryStore::new(&bounds, StoreConfig::default()).unwrap();
    for i in 0..25 {
        let t = i as f64 / 25.0;
        let x = Array1::from_vec(vec![t * 0.9, -t * 0.9]);
        store.admit(x, t * 10.0, None);
    }
    let kept = store.len();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("elites.csv");
    store.save_csv(&path).unwrap();

    let mut restored = RetryStore::new(&bounds, StoreConfig::default()).unwrap();
    restored.load_csv(&path).unwrap();
    assert_eq!(restored.len(), kept);
    assert_eq!(restored.best_f(), store.best_f());
}
