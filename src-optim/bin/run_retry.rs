//! Benchmark runner: simple or coordinated retry over a named test function.
//!
//! ```text
//! run_retry --function rastrigin --dim 10 --retries 500 --coordinated
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use ridgeline::{
    coordinated_minimize, retry_minimize, Bounds, CmaEs, CoordinatedConfigBuilder,
    DifferentialEvolution, Optimizer, Problem, RetryConfigBuilder, RetryLogger, Sequence,
};
use ridgeline_testfunctions::{create_bounds, lookup};

#[derive(Parser, Debug)]
#[command(
    name = "run_retry",
    about = "Run simple or coordinated retry on a benchmark function"
)]
struct Args {
    /// Test function name (sphere, rosenbrock, rastrigin, ackley, ...)
    #[arg(long, default_value = "rastrigin")]
    function: String,

    /// Problem dimension
    #[arg(long, default_value_t = 10)]
    dim: usize,

    /// Number of retry runs
    #[arg(long, default_value_t = 500)]
    retries: usize,

    /// Worker threads (0 = all logical CPUs)
    #[arg(long, default_value_t = 0)]
    workers: usize,

    /// Base RNG seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Use the coordinated engine instead of independent restarts
    #[arg(long)]
    coordinated: bool,

    /// Stop as soon as the objective reaches this value
    #[arg(long)]
    stop_fitness: Option<f64>,

    /// Wall-clock limit in seconds
    #[arg(long)]
    max_time: Option<u64>,
}

struct StderrLogger;

impl RetryLogger for StderrLogger {
    fn log(&self, line: &str) {
        eprintln!("{}", line);
    }
}

fn main() {
    let args = Args::parse();

    let Some((function, (lo, hi))) = lookup(&args.function) else {
        eprintln!("unknown function: {}", args.function);
        std::process::exit(2);
    };
    let bounds = match Bounds::from_pairs(&create_bounds(args.dim, lo, hi)) {
        Ok(bounds) => bounds,
        Err(err) => {
            eprintln!("bad bounds: {}", err);
            std::process::exit(2);
        }
    };
    let problem = Problem::new(function, bounds);

    let optimizer = match Sequence::even(vec![
        Arc::new(DifferentialEvolution::new()) as Arc<dyn Optimizer>,
        Arc::new(CmaEs::new()),
    ]) {
        Ok(seq) => seq,
        Err(err) => {
            eprintln!("bad optimizer expression: {}", err);
            std::process::exit(2);
        }
    };

    let result = if args.coordinated {
        let mut builder = CoordinatedConfigBuilder::new()
            .num_retries(args.retries)
            .workers(args.workers)
            .seed(args.seed)
            .log_interval(Duration::from_secs(2));
        if let Some(target) = args.stop_fitness {
            builder = builder.stop_fitness(target);
        }
        if let Some(secs) = args.max_time {
            builder = builder.max_time(Duration::from_secs(secs));
        }
        coordinated_minimize(&problem, &optimizer, &builder.build(), &StderrLogger)
    } else {
        let mut builder = RetryConfigBuilder::new()
            .num_retries(args.retries)
            .workers(args.workers)
            .seed(args.seed)
            .log_interval(Duration::from_secs(2));
        if let Some(target) = args.stop_fitness {
            builder = builder.target(target);
        }
        if let Some(secs) = args.max_time {
            problem.set_deadline(Duration::from_secs(secs));
        }
        retry_minimize(&problem, &optimizer, &builder.build(), &StderrLogger)
    };

    match result {
        Ok(report) => {
            println!(
                "{} dim={} retries={} evals={} best={:.6e}",
                args.function, args.dim, report.retries, report.evals, report.fun
            );
            println!("x = {:?}", report.x.to_vec());
        }
        Err(err) => {
            eprintln!("optimization failed: {}", err);
            std::process::exit(1);
        }
    }
}
