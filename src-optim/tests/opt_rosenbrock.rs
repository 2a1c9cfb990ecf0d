use std::sync::Arc;

use ridgeline::{
    retry_minimize, Bounds, CmaEs, DifferentialEvolution, NullLogger, Optimizer, Problem,
    RetryConfigBuilder, Sequence,
};
use ridgeline_testfunctions::{create_bounds, rosenbrock};

fn rosenbrock_problem(n: usize) -> Problem {
    let bounds = Bounds::from_pairs(&create_bounds(n, -5.0, 10.0)).unwrap();
    Problem::new(rosenbrock, bounds)
}

fn de_then_cma() -> Sequence {
    Sequence::even(vec![
        Arc::new(DifferentialEvolution::new()) as Arc<dyn Optimizer>,
        Arc::new(CmaEs::new()),
    ])
    .unwrap()
}

#[test]
fn test_sequence_retry_rosenbrock_5d() {
    // DE roughs out the valley, CMA-ES polishes; a handful of restarts is
    // enough to dodge the local trap near the origin.
    let problem = rosenbrock_problem(5);
    let cfg = RetryConfigBuilder::new()
        .num_retries(16)
        .workers(2)
        .seed(16)
        .max_evals(10_000)
        .target(1e-9)
        .build();
    let report = retry_minimize(&problem, &de_then_cma(), &cfg, &NullLogger).unwrap();
    assert!(report.fun < 1e-6, "fun = {}", report.fun);
    assert!(problem.bounds().contains(&report.x));
    for &xi in report.x.iter() {
        assert!((xi - 1.0).abs() < 1e-2, "x drifted from the optimum: {}", xi);
    }
}

#[test]
fn test_retry_statistics_populated() {
    let problem = rosenbrock_problem(3);
    let cfg = RetryConfigBuilder::new()
        .num_retries(6)
        .workers(2)
        .seed(77)
        .max_evals(4_000)
        .improvement_threshold(1e3)
        .build();
    let report = retry_minimize(&problem, &de_then_cma(), &cfg, &NullLogger).unwrap();
    assert_eq!(report.retries, 6);
    assert!(!report.top.is_empty() && report.top.len() <= 20);
    // Top list is sorted ascending and headed by the best result.
    for pair in report.top.windows(2) {
        assert!(pair[0] <= pair[1]);
    }
    assert_eq!(report.top[0], report.fun);
    assert!(report.mean.is_finite());
    assert!(report.std.is_finite());
    assert!(report.evals > 0);
}
