use std::sync::Arc;

use ridgeline::{
    coordinated_minimize, Bounds, CmaEs, CoordinatedConfigBuilder, DifferentialEvolution,
    NullLogger, Optimizer, Problem, Sequence,
};
use ridgeline_testfunctions::{create_bounds, rastrigin};

#[test]
fn test_coordinated_rastrigin_8d() {
    // Crossover seeding between store elites walks the grid of local minima
    // down to the global basin.
    let bounds = Bounds::from_pairs(&create_bounds(8, -5.12, 5.12)).unwrap();
    let problem = Problem::new(rastrigin, bounds);
    let optimizer = Sequence::even(vec![
        Arc::new(DifferentialEvolution::new()) as Arc<dyn Optimizer>,
        Arc::new(CmaEs::new()),
    ])
    .unwrap();
    let cfg = CoordinatedConfigBuilder::new()
        .num_retries(300)
        .workers(4)
        .seed(2024)
        .max_evals_init(800)
        .max_evals_cap(8_000)
        .capacity(100)
        .stop_fitness(1e-8)
        .build();
    let report = coordinated_minimize(&problem, &optimizer, &cfg, &NullLogger).unwrap();
    assert!(report.fun < 1.0, "fun = {}", report.fun);
    assert!(problem.bounds().contains(&report.x));
}

#[test]
fn test_coordinated_is_deterministic_single_worker() {
    let run = || {
        let bounds = Bounds::from_pairs(&create_bounds(3, -5.12, 5.12)).unwrap();
        let problem = Problem::new(rastrigin, bounds);
        let cfg = CoordinatedConfigBuilder::new()
            .num_retries(20)
            .workers(1)
            .seed(9)
            .max_evals_init(400)
            .max_evals_cap(1_600)
            .capacity(30)
            .build();
        coordinated_minimize(&problem, &CmaEs::new(), &cfg, &NullLogger).unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(a.fun, b.fun);
    assert_eq!(a.evals, b.evals);
    for (x, y) in a.x.iter().zip(b.x.iter()) {
        assert_eq!(x, y);
    }
}
